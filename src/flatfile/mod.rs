//! Flatfile Interchange Module
//!
//! Line-oriented snapshot format used to move a whole world between
//! servers, and to start one from scratch.
//!
//! ## Responsibilities
//! - Read all four historical dialects, detected from the header
//! - Normalise foreign flag bits, attribute numbers and quota encodings
//! - Write the current dialect, optionally compacting attribute numbers
//! - Read and write the flat (fully parenthesised) lock grammar
//!
//! ## Stream Layout
//! ```text
//!   +T<version|flags>        dialect + feature flags (V/X/T)
//!   +S<db_top>               table size
//!   +N<next attr>            next user attribute number
//!   -R<record players>
//!   +A<num>                  user attribute definition
//!   "<flags>:<name>"
//!   !<dbref>                 ┐
//!   <fields per flags>       │ one block per object
//!   ><attrnum>               │
//!   "<value>"                │
//!   <                        ┘
//!   ***END OF DUMP***
//! ```
//!
//! Loading is all-or-nothing: the stream is parsed completely into a
//! [`Snapshot`] before anything is installed, so a corrupt stream leaves the
//! target database untouched.

mod boolexp;
mod dialect;
mod reader;
mod stream;
mod upgrade;
mod writer;

pub use reader::read_snapshot;
pub use writer::write_snapshot;

use std::collections::BTreeMap;
use std::fmt;

use crate::error::Result;
use crate::world::{AttrRegistry, Dbref, Object};

// =============================================================================
// Version Flags
// =============================================================================

/// Mask for the version number packed into the low bits of the header
pub const V_MASK: u32 = 0x0000_00ff;
pub const V_ZONE: u32 = 0x0000_0100;
pub const V_LINK: u32 = 0x0000_0200;
pub const V_GDBM: u32 = 0x0000_0400;
pub const V_ATRNAME: u32 = 0x0000_0800;
pub const V_ATRKEY: u32 = 0x0000_1000;
pub const V_PARENT: u32 = 0x0000_2000;
pub const V_ATRMONEY: u32 = 0x0000_8000;
pub const V_XFLAGS: u32 = 0x0001_0000;
pub const V_POWERS: u32 = 0x0002_0000;
pub const V_3FLAGS: u32 = 0x0004_0000;
pub const V_QUOTED: u32 = 0x0008_0000;
pub const V_TQUOTAS: u32 = 0x0010_0000;
pub const V_TIMESTAMPS: u32 = 0x0020_0000;
pub const V_VISUALATTRS: u32 = 0x0040_0000;
pub const V_CREATETIME: u32 = 0x0080_0000;
/// Request attribute-number compaction on write; never written out
pub const V_DBCLEAN: u32 = 0x8000_0000;

/// Flags every current-dialect snapshot carries
pub const MANDFLAGS: u32 = V_LINK
    | V_PARENT
    | V_XFLAGS
    | V_ZONE
    | V_POWERS
    | V_3FLAGS
    | V_QUOTED
    | V_TQUOTAS
    | V_TIMESTAMPS
    | V_VISUALATTRS
    | V_CREATETIME;

/// Version number written in current-dialect headers
pub const OUTPUT_VERSION: u32 = 1;

/// Header value for a portable export
pub const EXPORT_VERSION: u32 = OUTPUT_VERSION | MANDFLAGS;

/// End-of-stream sentinel, written on a line of its own
pub const TRAILER: &str = "***END OF DUMP***";

// =============================================================================
// Dialects
// =============================================================================

/// Historical snapshot dialects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    /// No header at all: the oldest format
    Legacy,
    /// `+V` header: 2.x
    Mush,
    /// `+X` header
    Mux,
    /// `+T` header: the current dialect, the only one written
    TinyMush,
}

impl Dialect {
    pub fn from_header(c: u8) -> Option<Self> {
        match c {
            b'V' => Some(Dialect::Mush),
            b'X' => Some(Dialect::Mux),
            b'T' => Some(Dialect::TinyMush),
            _ => None,
        }
    }

    pub fn header_char(self) -> Option<char> {
        match self {
            Dialect::Legacy => None,
            Dialect::Mush => Some('V'),
            Dialect::Mux => Some('X'),
            Dialect::TinyMush => Some('T'),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Dialect::Legacy => "legacy",
            Dialect::Mush => "mush",
            Dialect::Mux => "mux",
            Dialect::TinyMush => "tinymush",
        }
    }

    pub fn is_writable(self) -> bool {
        self == Dialect::TinyMush
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Reports and Options
// =============================================================================

/// Outcome of a successful load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadReport {
    /// Object records read
    pub objects: usize,
    pub dialect: Dialect,
    /// Version number (low header bits)
    pub version: u32,
    /// Feature flags (header bits above the version)
    pub flags: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOptions {
    pub dialect: Dialect,
    /// Version number and feature flags, packed as in the header.
    /// [`V_DBCLEAN`] requests compaction.
    pub version: u32,
}

impl WriteOptions {
    /// Portable export in the current dialect
    pub fn export() -> Self {
        Self {
            dialect: Dialect::TinyMush,
            version: EXPORT_VERSION,
        }
    }

    /// Export with attribute numbers compacted
    pub fn clean_export() -> Self {
        Self {
            dialect: Dialect::TinyMush,
            version: EXPORT_VERSION | V_DBCLEAN,
        }
    }
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self::export()
    }
}

/// Outcome of a successful write
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteReport {
    /// Object blocks written
    pub objects: usize,
    /// User attribute numbers in use before the write
    pub attrs_before: i32,
    /// Next user attribute number written to the header
    pub attr_next: i32,
    /// Definitions dropped because nothing referenced them
    pub attrs_deleted: usize,
    /// Definitions moved to a lower number
    pub attrs_renumbered: usize,
    /// Objects with at least one renumbered attribute
    pub objects_touched: usize,
    /// Individual attribute values written under a new number
    pub attrs_touched: usize,
}

// =============================================================================
// Snapshot
// =============================================================================

/// One object block as read from a stream
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotObject {
    pub object: Object,
    attrs: Vec<(i32, String)>,
}

impl SnapshotObject {
    pub fn new(object: Object) -> Self {
        Self {
            object,
            attrs: Vec::new(),
        }
    }

    pub fn attr(&self, attrnum: i32) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(num, _)| *num == attrnum)
            .map(|(_, value)| value.as_str())
    }

    /// Set an attribute value; an empty value removes it
    pub fn set_attr(&mut self, attrnum: i32, value: impl Into<String>) {
        let value = value.into();
        if value.is_empty() {
            self.attrs.retain(|(num, _)| *num != attrnum);
            self.object.forget_attr(attrnum);
            return;
        }
        match self.attrs.iter_mut().find(|(num, _)| *num == attrnum) {
            Some(slot) => slot.1 = value,
            None => self.attrs.push((attrnum, value)),
        }
        self.object.note_attr(attrnum);
    }

    /// Attribute values in the order they were read
    pub fn attrs(&self) -> impl Iterator<Item = (i32, &str)> + '_ {
        self.attrs.iter().map(|(num, value)| (*num, value.as_str()))
    }
}

/// A whole world parsed from a stream, not yet installed anywhere
pub struct Snapshot {
    pub dialect: Dialect,
    pub version: u32,
    pub flags: u32,
    /// `+S` record, zero when absent
    pub min_size: usize,
    pub record_players: i32,
    pub attrs: AttrRegistry,
    pub objects: BTreeMap<Dbref, SnapshotObject>,
}

impl Snapshot {
    pub fn new(default_attr_flags: u32) -> Self {
        Self {
            dialect: Dialect::TinyMush,
            version: OUTPUT_VERSION,
            flags: 0,
            min_size: 0,
            record_players: 0,
            attrs: AttrRegistry::new(default_attr_flags),
            objects: BTreeMap::new(),
        }
    }

    /// One past the highest object number read
    pub fn db_top(&self) -> Dbref {
        self.objects.keys().next_back().map_or(0, |&last| last + 1)
    }

    pub fn object(&self, dbref: Dbref) -> Option<&SnapshotObject> {
        self.objects.get(&dbref)
    }

    pub fn object_mut(&mut self, dbref: Dbref) -> Option<&mut SnapshotObject> {
        self.objects.get_mut(&dbref)
    }

    pub fn report(&self) -> LoadReport {
        LoadReport {
            objects: self.objects.len(),
            dialect: self.dialect,
            version: self.version,
            flags: self.flags,
        }
    }
}

// =============================================================================
// Snapshot Sources
// =============================================================================

/// Anything the writer can walk: a parsed [`Snapshot`] or a live database
pub trait SnapshotSource {
    /// One past the highest object number
    fn db_top(&self) -> Dbref;

    fn record_players(&self) -> i32;

    fn registry(&self) -> &AttrRegistry;

    fn object(&self, dbref: Dbref) -> Option<&Object>;

    /// Text of one attribute; may fault it in from a backing store
    fn attr_text(&mut self, dbref: Dbref, attrnum: i32) -> Result<Option<String>>;
}

impl SnapshotSource for Snapshot {
    fn db_top(&self) -> Dbref {
        Snapshot::db_top(self)
    }

    fn record_players(&self) -> i32 {
        self.record_players
    }

    fn registry(&self) -> &AttrRegistry {
        &self.attrs
    }

    fn object(&self, dbref: Dbref) -> Option<&Object> {
        self.objects.get(&dbref).map(|so| &so.object)
    }

    fn attr_text(&mut self, dbref: Dbref, attrnum: i32) -> Result<Option<String>> {
        Ok(self
            .objects
            .get(&dbref)
            .and_then(|so| so.attr(attrnum))
            .map(str::to_string))
    }
}
