//! File backend
//!
//! A single append-only record log. The whole log is replayed into memory on
//! open, so reads never touch disk; writes append one frame each.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::config::{Config, SyncStrategy};
use crate::error::Result;

use super::frame::{decode_frames, encode_frame, LogRecord};
use super::{Backend, RecordType};

/// Log-structured [`Backend`] rooted in a data directory
pub struct FileBackend {
    /// Path of the record log
    path: PathBuf,

    /// Log handle, opened for append
    file: File,

    /// Live records rebuilt from the log
    records: HashMap<(RecordType, Vec<u8>), Bytes>,

    /// LSN for the next appended frame
    next_lsn: u64,

    sync_strategy: SyncStrategy,

    /// Frames appended since the last fsync
    unsynced: usize,

    /// False while a bulk load has per-write durability switched off
    synchronous: bool,

    lock_depth: u32,
}

impl FileBackend {
    const LOG_FILENAME: &'static str = "records.log";
    const COMPACT_SUFFIX: &'static str = "compact";

    /// Open the log under `config.data_dir`, creating it if needed
    pub fn open_with_config(config: &Config) -> Result<Self> {
        Self::open(&config.data_dir, config.sync_strategy)
    }

    /// Open or create the log in `dir` and replay it
    ///
    /// A torn final frame is dropped and the file truncated to the last
    /// intact frame. Damage anywhere else fails the open.
    pub fn open(dir: &Path, sync_strategy: SyncStrategy) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(Self::LOG_FILENAME);

        let image = if path.exists() { fs::read(&path)? } else { Vec::new() };
        let replay = decode_frames(&image)?;

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        if replay.valid_len < image.len() {
            warn!(
                path = %path.display(),
                dropped_bytes = image.len() - replay.valid_len,
                "truncating torn tail of record log"
            );
            file.set_len(replay.valid_len as u64)?;
            file.sync_all()?;
        }

        let mut records = HashMap::new();
        let mut next_lsn = 1;
        let frames = replay.records.len();
        for (lsn, record) in replay.records {
            match record {
                LogRecord::Put { kind, key, data } => {
                    records.insert((kind, key), Bytes::from(data));
                }
                LogRecord::Delete { kind, key } => {
                    records.remove(&(kind, key));
                }
            }
            next_lsn = lsn + 1;
        }

        if frames > 0 {
            info!(
                path = %path.display(),
                frames,
                live_records = records.len(),
                "record log replayed"
            );
        }

        Ok(Self {
            path,
            file,
            records,
            next_lsn,
            sync_strategy,
            unsynced: 0,
            synchronous: true,
            lock_depth: 0,
        })
    }

    /// Append one record and apply the sync strategy
    fn append(&mut self, record: &LogRecord) -> Result<()> {
        let frame = encode_frame(self.next_lsn, record)?;
        self.file.write_all(&frame)?;
        self.next_lsn += 1;
        self.unsynced += 1;

        if self.synchronous {
            let due = match self.sync_strategy {
                SyncStrategy::EveryWrite => true,
                SyncStrategy::EveryNEntries { count } => self.unsynced >= count,
            };
            if due {
                self.sync()?;
            }
        }
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        if self.unsynced > 0 {
            self.file.sync_data()?;
            self.unsynced = 0;
        }
        Ok(())
    }

    /// Rewrite the log so it holds only live records
    pub fn compact(&mut self) -> Result<()> {
        let tmp_path = self.path.with_extension(Self::COMPACT_SUFFIX);
        let mut entries: Vec<_> = self.records.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));

        {
            let mut tmp = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)?;
            let mut lsn = 1;
            for ((kind, key), data) in entries {
                let record = LogRecord::Put {
                    kind: *kind,
                    key: key.clone(),
                    data: data.to_vec(),
                };
                tmp.write_all(&encode_frame(lsn, &record)?)?;
                lsn += 1;
            }
            tmp.sync_all()?;
            self.next_lsn = lsn;
        }

        fs::rename(&tmp_path, &self.path)?;
        self.file = OpenOptions::new().append(true).open(&self.path)?;
        self.unsynced = 0;
        debug!(path = %self.path.display(), live_records = self.records.len(), "record log compacted");
        Ok(())
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of live records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_locked(&self) -> bool {
        self.lock_depth > 0
    }
}

impl Backend for FileBackend {
    fn get(&mut self, key: &[u8], kind: RecordType) -> Result<Option<Bytes>> {
        Ok(self.records.get(&(kind, key.to_vec())).cloned())
    }

    fn put(&mut self, key: &[u8], data: &[u8], kind: RecordType) -> Result<()> {
        self.append(&LogRecord::Put {
            kind,
            key: key.to_vec(),
            data: data.to_vec(),
        })?;
        self.records
            .insert((kind, key.to_vec()), Bytes::copy_from_slice(data));
        Ok(())
    }

    fn delete(&mut self, key: &[u8], kind: RecordType) -> Result<()> {
        if !self.records.contains_key(&(kind, key.to_vec())) {
            return Ok(());
        }
        self.append(&LogRecord::Delete {
            kind,
            key: key.to_vec(),
        })?;
        self.records.remove(&(kind, key.to_vec()));
        Ok(())
    }

    fn lock(&mut self) -> Result<()> {
        self.lock_depth += 1;
        Ok(())
    }

    fn unlock(&mut self) -> Result<()> {
        self.lock_depth = self.lock_depth.saturating_sub(1);
        if self.lock_depth == 0 && self.synchronous {
            self.sync()?;
        }
        Ok(())
    }

    fn set_synchronous(&mut self, synchronous: bool) -> Result<()> {
        self.synchronous = synchronous;
        if synchronous {
            self.sync()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.sync()
    }
}

impl Drop for FileBackend {
    fn drop(&mut self) {
        if let Err(e) = self.sync() {
            warn!(path = %self.path.display(), error = %e, "failed to sync record log on drop");
        }
    }
}
