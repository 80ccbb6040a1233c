//! Record log framing
//!
//! ## Frame Format
//! ```text
//! ┌─────────┬─────────┬─────────┬──────────────────────┐
//! │ LSN (8) │ CRC (4) │ Len (4) │ bincode(LogRecord)   │
//! └─────────┴─────────┴─────────┴──────────────────────┘
//! ```
//! All integers little-endian. The CRC covers LSN, length and body.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

use super::RecordType;

/// Size of the fixed frame header: LSN + CRC + length
pub const FRAME_HEADER_SIZE: usize = 16;

/// One logged mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogRecord {
    Put {
        kind: RecordType,
        key: Vec<u8>,
        data: Vec<u8>,
    },
    Delete {
        kind: RecordType,
        key: Vec<u8>,
    },
}

fn frame_crc(lsn: u64, len: u32, body: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&lsn.to_le_bytes());
    hasher.update(&len.to_le_bytes());
    hasher.update(body);
    hasher.finalize()
}

/// Encode one record as a complete frame
pub(crate) fn encode_frame(lsn: u64, record: &LogRecord) -> Result<Bytes> {
    let body = bincode::serialize(record)?;
    let len = u32::try_from(body.len())
        .map_err(|_| StoreError::Serialization("log record exceeds 4 GiB".into()))?;

    let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + body.len());
    buf.put_u64_le(lsn);
    buf.put_u32_le(frame_crc(lsn, len, &body));
    buf.put_u32_le(len);
    buf.put_slice(&body);
    Ok(buf.freeze())
}

/// Result of scanning a log image
#[derive(Debug, Default)]
pub(crate) struct Replay {
    /// Intact records in log order
    pub records: Vec<(u64, LogRecord)>,
    /// Byte length of the intact prefix
    pub valid_len: usize,
}

/// Decode every intact frame in `image`
///
/// A short or checksum-failing final frame is a torn write and ends the
/// scan; the caller truncates the log to `valid_len`. A bad frame followed
/// by more data is real corruption, and so is a short frame with an intact
/// frame somewhere in the bytes it claims.
pub(crate) fn decode_frames(image: &[u8]) -> Result<Replay> {
    let mut replay = Replay::default();
    let mut pos = 0usize;
    let mut last_lsn = 0u64;

    while pos < image.len() {
        let rest = &image[pos..];
        if rest.len() < FRAME_HEADER_SIZE {
            break;
        }

        let mut header = &rest[..FRAME_HEADER_SIZE];
        let lsn = header.get_u64_le();
        let crc = header.get_u32_le();
        let len = header.get_u32_le();

        let frame_len = FRAME_HEADER_SIZE + len as usize;
        if rest.len() < frame_len {
            // A torn append leaves nothing intact after it
            if let Some(offset) = next_intact_frame(image, pos + 1) {
                return Err(StoreError::BackendCorruption(format!(
                    "frame at offset {} claims {} bytes, but an intact frame follows at offset {}",
                    pos, len, offset
                )));
            }
            break;
        }

        let body = &rest[FRAME_HEADER_SIZE..frame_len];
        if frame_crc(lsn, len, body) != crc {
            if pos + frame_len == image.len() {
                break;
            }
            return Err(StoreError::BackendCorruption(format!(
                "checksum mismatch in frame at offset {}",
                pos
            )));
        }

        if lsn <= last_lsn {
            return Err(StoreError::BackendCorruption(format!(
                "non-increasing LSN {} at offset {}",
                lsn, pos
            )));
        }

        let record: LogRecord = bincode::deserialize(body).map_err(|e| {
            StoreError::BackendCorruption(format!("undecodable frame at offset {}: {}", pos, e))
        })?;

        replay.records.push((lsn, record));
        last_lsn = lsn;
        pos += frame_len;
        replay.valid_len = pos;
    }

    Ok(replay)
}

/// Offset of the first complete, checksum-valid, decodable frame at or
/// after `from`
fn next_intact_frame(image: &[u8], from: usize) -> Option<usize> {
    (from..image.len()).find(|&pos| {
        let rest = &image[pos..];
        if rest.len() < FRAME_HEADER_SIZE {
            return false;
        }
        let mut header = &rest[..FRAME_HEADER_SIZE];
        let lsn = header.get_u64_le();
        let crc = header.get_u32_le();
        let len = header.get_u32_le();
        let Some(body) = rest.get(FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + len as usize) else {
            return false;
        };
        frame_crc(lsn, len, body) == crc && bincode::deserialize::<LogRecord>(body).is_ok()
    })
}
