//! Object records

use serde::{Deserialize, Serialize};

use super::flags::{GOING, TYPE_EXIT, TYPE_GARBAGE, TYPE_MASK, TYPE_PLAYER, TYPE_ROOM, TYPE_THING};
use super::{Dbref, NOTHING};

/// Object type, encoded in the low bits of flag word 1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    Room,
    Thing,
    Exit,
    Player,
    Garbage,
    /// A type code this store does not know
    Other(u32),
}

impl ObjectType {
    pub fn from_flags(flags1: u32) -> Self {
        match flags1 & TYPE_MASK {
            TYPE_ROOM => ObjectType::Room,
            TYPE_THING => ObjectType::Thing,
            TYPE_EXIT => ObjectType::Exit,
            TYPE_PLAYER => ObjectType::Player,
            TYPE_GARBAGE => ObjectType::Garbage,
            other => ObjectType::Other(other),
        }
    }

    pub fn type_bits(self) -> u32 {
        match self {
            ObjectType::Room => TYPE_ROOM,
            ObjectType::Thing => TYPE_THING,
            ObjectType::Exit => TYPE_EXIT,
            ObjectType::Player => TYPE_PLAYER,
            ObjectType::Garbage => TYPE_GARBAGE,
            ObjectType::Other(bits) => bits & TYPE_MASK,
        }
    }
}

/// One world object: its fixed fields and the numbers of the attributes it
/// carries. Attribute values live in the cache and backing store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Object {
    pub name: String,
    pub location: Dbref,
    pub zone: Dbref,
    pub contents: Dbref,
    pub exits: Dbref,
    pub link: Dbref,
    pub next: Dbref,
    pub owner: Dbref,
    pub parent: Dbref,
    pub pennies: i32,
    pub flags1: u32,
    pub flags2: u32,
    pub flags3: u32,
    pub powers1: u32,
    pub powers2: u32,
    pub access_time: i64,
    pub mod_time: i64,
    pub create_time: i64,

    /// Attribute numbers present on this object, ascending
    pub attrs: Vec<i32>,

    /// Changed since the last checkpoint
    #[serde(skip)]
    pub dirty: bool,
}

impl Default for Object {
    fn default() -> Self {
        Self {
            name: String::new(),
            location: NOTHING,
            zone: NOTHING,
            contents: NOTHING,
            exits: NOTHING,
            link: NOTHING,
            next: NOTHING,
            owner: NOTHING,
            parent: NOTHING,
            pennies: 0,
            flags1: TYPE_GARBAGE | GOING,
            flags2: 0,
            flags3: 0,
            powers1: 0,
            powers2: 0,
            access_time: 0,
            mod_time: 0,
            create_time: 0,
            attrs: Vec::new(),
            dirty: false,
        }
    }
}

impl Object {
    /// A fresh object of the given type
    pub fn new(name: impl Into<String>, kind: ObjectType, owner: Dbref) -> Self {
        Self {
            name: name.into(),
            owner,
            flags1: kind.type_bits(),
            dirty: true,
            ..Default::default()
        }
    }

    pub fn object_type(&self) -> ObjectType {
        ObjectType::from_flags(self.flags1)
    }

    pub fn is_player(&self) -> bool {
        self.object_type() == ObjectType::Player
    }

    pub fn is_going(&self) -> bool {
        self.flags1 & GOING != 0
    }

    pub fn has_attr(&self, attrnum: i32) -> bool {
        self.attrs.binary_search(&attrnum).is_ok()
    }

    /// Record that `attrnum` is present. Returns true if it was new.
    pub(crate) fn note_attr(&mut self, attrnum: i32) -> bool {
        match self.attrs.binary_search(&attrnum) {
            Ok(_) => false,
            Err(pos) => {
                self.attrs.insert(pos, attrnum);
                true
            }
        }
    }

    /// Record that `attrnum` is gone. Returns true if it was present.
    pub(crate) fn forget_attr(&mut self, attrnum: i32) -> bool {
        match self.attrs.binary_search(&attrnum) {
            Ok(pos) => {
                self.attrs.remove(pos);
                true
            }
            Err(_) => false,
        }
    }
}
