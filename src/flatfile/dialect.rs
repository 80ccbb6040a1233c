//! Per-object field layout
//!
//! The fields of an object block, in stream order, each with the header
//! flag condition under which it is present. The reader and the writer both
//! walk this one table.

use super::{
    Dialect, V_3FLAGS, V_ATRKEY, V_ATRMONEY, V_ATRNAME, V_CREATETIME, V_GDBM, V_LINK, V_PARENT,
    V_POWERS, V_QUOTED, V_TIMESTAMPS, V_XFLAGS, V_ZONE,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Field {
    Name,
    Location,
    Zone,
    Contents,
    Exits,
    Link,
    Next,
    Lock,
    Owner,
    Parent,
    Pennies,
    Flags1,
    Flags2,
    Flags3,
    Powers1,
    Powers2,
    AccessTime,
    ModTime,
    CreateTime,
    /// `>num` / value pairs up to a `<` line
    AttrList,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Presence {
    Always,
    /// Present when the flag is set
    If(u32),
    /// Present when the flag is clear
    Unless(u32),
    /// Present unless every bit of the mask is set
    UnlessAll(u32),
}

impl Presence {
    fn holds(self, flags: u32) -> bool {
        match self {
            Presence::Always => true,
            Presence::If(bit) => flags & bit != 0,
            Presence::Unless(bit) => flags & bit == 0,
            Presence::UnlessAll(mask) => flags & mask != mask,
        }
    }
}

const OBJECT_LAYOUT: &[(Field, Presence)] = &[
    (Field::Name, Presence::UnlessAll(V_GDBM | V_ATRNAME)),
    (Field::Location, Presence::Always),
    (Field::Zone, Presence::If(V_ZONE)),
    (Field::Contents, Presence::Always),
    (Field::Exits, Presence::Always),
    (Field::Link, Presence::If(V_LINK)),
    (Field::Next, Presence::Always),
    (Field::Lock, Presence::Unless(V_ATRKEY)),
    (Field::Owner, Presence::Always),
    (Field::Parent, Presence::If(V_PARENT)),
    (Field::Pennies, Presence::Unless(V_ATRMONEY)),
    (Field::Flags1, Presence::Always),
    (Field::Flags2, Presence::If(V_XFLAGS)),
    (Field::Flags3, Presence::If(V_3FLAGS)),
    (Field::Powers1, Presence::If(V_POWERS)),
    (Field::Powers2, Presence::If(V_POWERS)),
    (Field::AccessTime, Presence::If(V_TIMESTAMPS)),
    (Field::ModTime, Presence::If(V_TIMESTAMPS)),
    (Field::CreateTime, Presence::If(V_CREATETIME)),
    (Field::AttrList, Presence::Unless(V_GDBM)),
];

/// Fields present in an object block under `flags`
pub(crate) fn layout(flags: u32) -> impl Iterator<Item = Field> {
    OBJECT_LAYOUT
        .iter()
        .filter(move |(_, presence)| presence.holds(flags))
        .map(|(field, _)| *field)
}

/// Header flags as they apply to a dialect
///
/// 2.x headers predate the third flag word, powers and quoted strings, so
/// those bits mean nothing there. The headerless dialect has no flags.
pub(crate) fn effective_flags(dialect: Dialect, flags: u32) -> u32 {
    match dialect {
        Dialect::Legacy => 0,
        Dialect::Mush => flags & !(V_3FLAGS | V_POWERS | V_QUOTED),
        Dialect::Mux | Dialect::TinyMush => flags,
    }
}
