//! Snapshot reader
//!
//! Parses a complete stream into a [`Snapshot`]. Nothing is installed
//! anywhere until the trailer has been read and the normalisation pass has
//! run.

use std::io::Read;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::lock;
use crate::world::{
    Dbref, Object, AF_ODARK, AF_VISUAL, A_LCON_FMT, A_LEXITS_FMT, A_LOCK, A_NEWOBJS, A_PROGCMD,
};

use super::boolexp::read_lock;
use super::dialect::{effective_flags, layout, Field};
use super::stream::SnapshotStream;
use super::upgrade::{normalize, upgrade_flags};
use super::{Dialect, Snapshot, SnapshotObject, V_MASK, V_QUOTED, V_VISUALATTRS};

/// Text after the leading `*` of the trailer line
const TRAILER_TAIL: &str = "**END OF DUMP***";

/// Read a whole snapshot, in any dialect
///
/// `default_attr_flags` is given to `+A` definitions that carry no flags and
/// to attributes created by name while parsing inline locks.
pub fn read_snapshot<R: Read>(mut input: R, default_attr_flags: u32) -> Result<Snapshot> {
    let mut data = Vec::new();
    input.read_to_end(&mut data)?;

    let mut reader = SnapshotReader::new(SnapshotStream::new(data), default_attr_flags);
    reader.run()?;

    let mut snapshot = reader.snapshot;
    normalize(&mut snapshot);
    info!(
        objects = snapshot.objects.len(),
        dialect = %snapshot.dialect,
        version = snapshot.version,
        flags = snapshot.flags,
        "snapshot read"
    );
    Ok(snapshot)
}

struct SnapshotReader {
    stream: SnapshotStream,
    snapshot: Snapshot,

    /// Header flags as they apply to the detected dialect
    layout_flags: u32,

    header_seen: bool,
    size_seen: bool,
    next_attr: Option<i32>,

    /// Substituted for timestamps the stream does not carry
    now: i64,
}

impl SnapshotReader {
    fn new(stream: SnapshotStream, default_attr_flags: u32) -> Self {
        let mut snapshot = Snapshot::new(default_attr_flags);
        snapshot.dialect = Dialect::Legacy;
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs() as i64);

        Self {
            stream,
            snapshot,
            layout_flags: 0,
            header_seen: false,
            size_seen: false,
            next_attr: None,
            now,
        }
    }

    fn quoted(&self) -> bool {
        self.layout_flags & V_QUOTED != 0
    }

    fn run(&mut self) -> Result<()> {
        loop {
            let Some(c) = self.stream.getc() else {
                return Err(self.stream.error("missing end-of-dump trailer"));
            };

            match c {
                b'-' => self.read_misc_tag(),
                b'+' => self.read_header_record()?,
                b'!' => self.read_object()?,
                b'*' => {
                    let tail = self.stream.getstring(false);
                    if tail != TRAILER_TAIL {
                        return Err(self.stream.error(format!("bad end-of-dump marker: *{}", tail)));
                    }
                    break;
                }
                other => {
                    return Err(self
                        .stream
                        .error(format!("illegal character {:?} between records", other as char)))
                }
            }
        }

        if let Some(next) = self.next_attr {
            let attrs = &mut self.snapshot.attrs;
            attrs.set_next_free(next.max(attrs.next_free()));
        }
        Ok(())
    }

    // =========================================================================
    // Header Records
    // =========================================================================

    fn read_misc_tag(&mut self) {
        match self.stream.getc() {
            Some(b'R') => match self.stream.getref() {
                Ok(count) => self.snapshot.record_players = count,
                Err(e) => warn!(error = %e, "bad record-players tag ignored"),
            },
            tag => {
                let rest = self.stream.getstring(false);
                warn!(line = self.stream.line(), tag = ?tag.map(char::from), rest = %rest, "unknown tag skipped");
            }
        }
    }

    fn read_header_record(&mut self) -> Result<()> {
        let Some(tag) = self.stream.getc() else {
            return Err(self.stream.error("unexpected end of snapshot in header"));
        };

        if let Some(dialect) = Dialect::from_header(tag) {
            if self.header_seen || !self.snapshot.objects.is_empty() {
                let rest = self.stream.getstring(false);
                warn!(line = self.stream.line(), rest = %rest, "duplicate version header ignored");
                return Ok(());
            }
            self.header_seen = true;

            let raw = self.stream.getflags()?;
            self.snapshot.dialect = dialect;
            self.snapshot.version = raw & V_MASK;
            self.snapshot.flags = raw & !V_MASK;
            self.layout_flags = effective_flags(dialect, self.snapshot.flags);
            debug!(dialect = %dialect, version = self.snapshot.version, "snapshot header");
            return Ok(());
        }

        match tag {
            b'S' => {
                if self.size_seen {
                    let rest = self.stream.getstring(false);
                    warn!(line = self.stream.line(), rest = %rest, "duplicate size record ignored");
                } else {
                    let size = self.stream.getref()?;
                    self.snapshot.min_size = usize::try_from(size).unwrap_or(0);
                    self.size_seen = true;
                }
            }
            b'N' => {
                if self.next_attr.is_some() {
                    let rest = self.stream.getstring(false);
                    warn!(line = self.stream.line(), rest = %rest, "duplicate next-attribute record ignored");
                } else {
                    self.next_attr = Some(self.stream.getref()?);
                }
            }
            b'A' => self.read_attr_def()?,
            b'F' => {
                // Free user attribute slot; the allocator does not use it
                self.stream.getref()?;
            }
            other => {
                let rest = self.stream.getstring(false);
                warn!(
                    line = self.stream.line(),
                    tag = %char::from(other),
                    rest = %rest,
                    "unexpected header record ignored"
                );
            }
        }
        Ok(())
    }

    /// `+A<num>` then `"<flags>:<name>"`
    fn read_attr_def(&mut self) -> Result<()> {
        let number = self.stream.getref()?;
        let text = self.stream.getstring(self.quoted());

        let digits = text.bytes().take_while(u8::is_ascii_digit).count();
        let (flags, name) = if digits > 0 {
            let mut flags: u32 = text[..digits].parse().unwrap_or(0);
            if self.snapshot.flags & V_VISUALATTRS == 0 {
                // Before visual flags existed, not ODARK meant VISUAL
                if flags & AF_ODARK != 0 {
                    flags &= !AF_ODARK;
                } else {
                    flags |= AF_VISUAL;
                }
            }
            (flags, text.get(digits + 1..).unwrap_or(""))
        } else {
            (self.snapshot.attrs.default_flags(), text.as_str())
        };

        if let Err(e) = self.snapshot.attrs.define(number, flags, name) {
            warn!(number, name = %name, error = %e, "attribute definition skipped");
        }
        Ok(())
    }

    // =========================================================================
    // Object Blocks
    // =========================================================================

    fn read_object(&mut self) -> Result<()> {
        let dbref: Dbref = self.stream.getref()?;
        if dbref < 0 {
            return Err(self.stream.error(format!("negative object number {}", dbref)));
        }

        let quoted = self.quoted();
        let mut so = SnapshotObject::new(Object::default());
        let mut times_read = false;
        let mut create_read = false;

        for field in layout(self.layout_flags) {
            let obj = &mut so.object;
            match field {
                Field::Name => obj.name = self.stream.getstring(quoted),
                Field::Location => obj.location = self.stream.getref()?,
                Field::Zone => obj.zone = self.stream.getref()?,
                Field::Contents => obj.contents = self.stream.getref()?,
                Field::Exits => obj.exits = self.stream.getref()?,
                Field::Link => obj.link = self.stream.getref()?,
                Field::Next => obj.next = self.stream.getref()?,
                Field::Lock => {
                    if let Some(expr) = read_lock(&mut self.stream, &mut self.snapshot.attrs)? {
                        so.set_attr(A_LOCK, lock::unparse(&expr, &self.snapshot.attrs));
                    }
                }
                Field::Owner => obj.owner = self.stream.getref()?,
                Field::Parent => obj.parent = self.stream.getref()?,
                Field::Pennies => obj.pennies = self.stream.getref()?,
                Field::Flags1 => obj.flags1 = self.stream.getflags()?,
                Field::Flags2 => obj.flags2 = self.stream.getflags()?,
                Field::Flags3 => obj.flags3 = self.stream.getflags()?,
                Field::Powers1 => obj.powers1 = self.stream.getflags()?,
                Field::Powers2 => obj.powers2 = self.stream.getflags()?,
                Field::AccessTime => {
                    obj.access_time = self.stream.getlong()?;
                    times_read = true;
                }
                Field::ModTime => obj.mod_time = self.stream.getlong()?,
                Field::CreateTime => {
                    obj.create_time = self.stream.getlong()?;
                    create_read = true;
                }
                Field::AttrList => self.read_attr_list(dbref, &mut so)?,
            }
        }

        let obj = &mut so.object;
        if !times_read {
            obj.access_time = self.now;
            obj.mod_time = self.now;
        }
        if !create_read {
            obj.create_time = obj.access_time;
        }
        upgrade_flags(self.snapshot.dialect, self.snapshot.version, obj);

        if self.snapshot.objects.insert(dbref, so).is_some() {
            warn!(dbref, "object appears twice; later block kept");
        }
        Ok(())
    }

    /// `>num` / value pairs up to a `<` line
    fn read_attr_list(&mut self, dbref: Dbref, so: &mut SnapshotObject) -> Result<()> {
        let quoted = self.quoted();
        loop {
            match self.stream.getc() {
                Some(b'>') => {
                    let mut attrnum = self.stream.getref()?;
                    if self.snapshot.dialect == Dialect::Mush {
                        attrnum = unscramble_attrnum(attrnum);
                    }
                    let value = self.stream.getstring(quoted);
                    if attrnum > 0 {
                        so.set_attr(attrnum, value);
                    }
                }
                // Blank lines come from values ending in a newline
                Some(b'\n') => {}
                Some(b'<') => {
                    if !self.stream.eat(b'\n') {
                        warn!(dbref, "no line feed after attribute list");
                    }
                    return Ok(());
                }
                Some(c) => {
                    let skipped = self.stream.getstring(quoted);
                    warn!(dbref, ch = %char::from(c), skipped = %skipped, "bad character in attribute list");
                }
                None => return Err(self.stream.error("unexpected end of snapshot in attribute list")),
            }
        }
    }
}

/// 2.x numbered a few built-in attributes differently
fn unscramble_attrnum(attrnum: i32) -> i32 {
    match attrnum {
        208 => A_NEWOBJS,
        209 => A_LCON_FMT,
        210 => A_LEXITS_FMT,
        211 => A_PROGCMD,
        other => other,
    }
}
