//! Attribute definitions
//!
//! Every attribute has a number and a name. Numbers below
//! [`A_USER_START`] are built in; the rest are defined at run time (or by a
//! snapshot's `+A` records) and handed out from `next_free`.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, StoreError};
use crate::htab::{HashKey, HashTable, KeyKind};

// =============================================================================
// Built-in Attribute Numbers
// =============================================================================

pub const A_OSUCC: i32 = 1;
pub const A_OFAIL: i32 = 2;
pub const A_FAIL: i32 = 3;
pub const A_SUCC: i32 = 4;
pub const A_PASS: i32 = 5;
pub const A_DESC: i32 = 6;
pub const A_SEX: i32 = 7;
pub const A_ODROP: i32 = 8;
pub const A_DROP: i32 = 9;
pub const A_ASUCC: i32 = 12;
pub const A_AFAIL: i32 = 13;
pub const A_STARTUP: i32 = 19;
pub const A_COST: i32 = 24;
pub const A_MONEY: i32 = 25;
pub const A_LISTEN: i32 = 26;
pub const A_LAST: i32 = 30;
pub const A_IDESC: i32 = 32;
pub const A_ENTER: i32 = 33;
pub const A_AENTER: i32 = 35;
pub const A_ADESC: i32 = 36;
pub const A_ODESC: i32 = 37;
pub const A_RQUOTA: i32 = 38;
pub const A_LOCK: i32 = 42;
pub const A_NAME: i32 = 43;
pub const A_COMMENT: i32 = 44;
pub const A_USE: i32 = 45;
pub const A_SEMAPHORE: i32 = 47;
pub const A_QUOTA: i32 = 49;
pub const A_LEAVE: i32 = 50;
pub const A_OENTER: i32 = 53;
pub const A_MOVE: i32 = 55;
pub const A_OMOVE: i32 = 56;
pub const A_AMOVE: i32 = 57;
pub const A_ALIAS: i32 = 58;
pub const A_LENTER: i32 = 59;
pub const A_LLEAVE: i32 = 60;
pub const A_LUSE: i32 = 62;
pub const A_TPORT: i32 = 79;
pub const A_FORWARDLIST: i32 = 95;
pub const A_LCONTROL: i32 = 99;
pub const A_VA: i32 = 100;
pub const A_PROGCMD: i32 = 210;
pub const A_NEWOBJS: i32 = 213;
pub const A_LCON_FMT: i32 = 214;
pub const A_LEXITS_FMT: i32 = 215;
pub const A_LIST: i32 = 253;

/// First number available to user-defined attributes
pub const A_USER_START: i32 = 256;

/// Attribute names are truncated to one less than this many characters
pub const VNAME_SIZE: usize = 32;

// =============================================================================
// Attribute Flags
// =============================================================================

pub const AF_ODARK: u32 = 0x0000_0001;
pub const AF_DELETED: u32 = 0x0000_0080;
pub const AF_VISUAL: u32 = 0x0000_0800;
pub const AF_DIRTY: u32 = 0x0010_0000;

/// Initial and minimum bucket count of the two attribute indexes
const INDEX_MIN_SIZE: usize = 512;

const BUILTIN_ATTRS: &[(i32, &str)] = &[
    (A_OSUCC, "Osucc"),
    (A_OFAIL, "Ofail"),
    (A_FAIL, "Fail"),
    (A_SUCC, "Succ"),
    (A_PASS, "Password"),
    (A_DESC, "Desc"),
    (A_SEX, "Sex"),
    (A_ODROP, "Odrop"),
    (A_DROP, "Drop"),
    (A_ASUCC, "Asucc"),
    (A_AFAIL, "Afail"),
    (A_STARTUP, "Startup"),
    (A_COST, "Cost"),
    (A_MONEY, "Money"),
    (A_LISTEN, "Listen"),
    (A_LAST, "Last"),
    (A_IDESC, "Idesc"),
    (A_ENTER, "Enter"),
    (A_AENTER, "Aenter"),
    (A_ADESC, "Adesc"),
    (A_ODESC, "Odesc"),
    (A_RQUOTA, "Rquota"),
    (A_LOCK, "DefaultLock"),
    (A_NAME, "Name"),
    (A_COMMENT, "Comment"),
    (A_USE, "Use"),
    (A_SEMAPHORE, "Semaphore"),
    (A_QUOTA, "Quota"),
    (A_LEAVE, "Leave"),
    (A_OENTER, "Oenter"),
    (A_MOVE, "Move"),
    (A_OMOVE, "Omove"),
    (A_AMOVE, "Amove"),
    (A_ALIAS, "Alias"),
    (A_LENTER, "EnterLock"),
    (A_LLEAVE, "LeaveLock"),
    (A_LUSE, "UseLock"),
    (A_TPORT, "Tport"),
    (A_FORWARDLIST, "Forwardlist"),
    (A_LCONTROL, "ControlLock"),
    (A_PROGCMD, "Progcmd"),
    (A_NEWOBJS, "Newobjs"),
    (A_LCON_FMT, "Conformat"),
    (A_LEXITS_FMT, "Exitformat"),
    (A_LIST, "VLIST"),
];

/// One attribute definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttrDef {
    pub number: i32,
    pub flags: u32,
    pub name: String,
}

impl AttrDef {
    pub fn is_user(&self) -> bool {
        self.number >= A_USER_START
    }

    pub fn is_deleted(&self) -> bool {
        self.flags & AF_DELETED != 0
    }
}

/// Normalise an attribute name for lookup: upper case, bounded length
fn name_key(name: &str) -> String {
    name.trim()
        .chars()
        .take(VNAME_SIZE - 1)
        .collect::<String>()
        .to_ascii_uppercase()
}

/// Registry of built-in and user-defined attributes
///
/// Two hash indexes: name (upper-cased) → number, and number → definition.
/// Deleted user attributes keep their number entry (flagged
/// [`AF_DELETED`]) but drop out of the name index.
pub struct AttrRegistry {
    by_name: HashTable<i32>,
    by_num: HashTable<AttrDef>,
    next_free: i32,
    default_flags: u32,

    /// Numbers whose definition changed since the last checkpoint
    dirty: BTreeSet<i32>,
}

impl AttrRegistry {
    pub fn new(default_flags: u32) -> Self {
        let mut by_name = HashTable::new("attr names", INDEX_MIN_SIZE, KeyKind::Str);
        let mut by_num = HashTable::new("attr numbers", INDEX_MIN_SIZE, KeyKind::Int);

        let builtins = BUILTIN_ATTRS
            .iter()
            .map(|&(number, name)| (number, name.to_string()))
            // VA..VZ
            .chain(('a'..='z').enumerate().map(|(i, letter)| (A_VA + i as i32, format!("V{}", letter))));

        for (number, name) in builtins {
            let indexed = by_name
                .insert(HashKey::Str(name_key(&name)), number)
                .and_then(|_| {
                    by_num.insert(
                        HashKey::from(number),
                        AttrDef {
                            number,
                            flags: 0,
                            name: name.clone(),
                        },
                    )
                });
            if let Err(e) = indexed {
                warn!(attr = %name, number, error = %e, "built-in attribute not indexed");
            }
        }

        Self {
            by_name,
            by_num,
            next_free: A_USER_START,
            default_flags,
            dirty: BTreeSet::new(),
        }
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Look up a live attribute by name (case-insensitive)
    pub fn lookup_name(&self, name: &str) -> Option<&AttrDef> {
        let number = *self.by_name.find(&HashKey::Str(name_key(name)))?;
        self.by_num.find(&HashKey::from(number))
    }

    /// Look up a definition by number, including deleted ones
    pub fn lookup_num(&self, number: i32) -> Option<&AttrDef> {
        self.by_num.find(&HashKey::from(number))
    }

    /// Display name for an attribute number, if it has a live definition
    pub fn name_of(&self, number: i32) -> Option<&str> {
        self.lookup_num(number)
            .filter(|def| !def.is_deleted())
            .map(|def| def.name.as_str())
    }

    // =========================================================================
    // Definition
    // =========================================================================

    /// Define a user attribute with an explicit number
    ///
    /// Redefining a name under the number it already has is a no-op. A name
    /// or number already bound elsewhere is a [`StoreError::DuplicateKey`].
    pub fn define(&mut self, number: i32, flags: u32, name: &str) -> Result<()> {
        let key = name_key(name);
        if key.is_empty() {
            return Err(StoreError::InvalidAttrName(name.to_string()));
        }

        if let Some(&existing) = self.by_name.find(&HashKey::Str(key.clone())) {
            if existing == number {
                return Ok(());
            }
            return Err(StoreError::DuplicateKey(key));
        }

        // A deleted definition may be reused by its number
        let num_key = HashKey::from(number);
        match self.by_num.find(&num_key).map(AttrDef::is_deleted) {
            Some(true) => {
                self.by_num.delete(&num_key);
            }
            Some(false) => return Err(StoreError::DuplicateKey(number.to_string())),
            None => {}
        }

        self.by_name.insert(HashKey::Str(key.clone()), number)?;
        self.by_num.insert(
            num_key,
            AttrDef {
                number,
                flags,
                name: key,
            },
        )?;

        if number >= self.next_free {
            self.next_free = number + 1;
        }
        self.dirty.insert(number);
        Ok(())
    }

    /// Look up `name`, creating a user attribute with the default flags if
    /// it does not exist yet. Numeric names resolve to that number.
    pub fn make(&mut self, name: &str) -> Result<i32> {
        let trimmed = name.trim();
        if let Ok(number) = trimmed.parse::<i32>() {
            if number > 0 {
                return Ok(number);
            }
        }
        if let Some(def) = self.lookup_name(trimmed) {
            return Ok(def.number);
        }

        let number = self.next_free;
        self.define(number, self.default_flags, trimmed)?;
        Ok(number)
    }

    /// Mark a user attribute deleted. Its number stays reserved.
    pub fn delete(&mut self, name: &str) -> Option<i32> {
        let key = HashKey::Str(name_key(name));
        let number = *self.by_name.find(&key)?;
        if number < A_USER_START {
            return None;
        }
        self.by_name.delete(&key);
        if let Some(def) = self.by_num.find_mut(&HashKey::from(number)) {
            def.flags |= AF_DELETED;
        }
        self.dirty.insert(number);
        Some(number)
    }

    /// Insert a definition verbatim, deleted or not. Used when restoring
    /// checkpointed definition blocks.
    pub(crate) fn restore(&mut self, def: AttrDef) -> Result<()> {
        let number = def.number;
        if !def.is_deleted() {
            self.by_name
                .insert(HashKey::Str(name_key(&def.name)), number)?;
        }
        self.by_num.insert(HashKey::from(number), def)?;
        if number >= self.next_free {
            self.next_free = number + 1;
        }
        Ok(())
    }

    // =========================================================================
    // Allocation and Dirty Tracking
    // =========================================================================

    /// Next number `make` will hand out
    pub fn next_free(&self) -> i32 {
        self.next_free
    }

    pub fn set_next_free(&mut self, next: i32) {
        self.next_free = next.max(A_USER_START);
    }

    pub fn default_flags(&self) -> u32 {
        self.default_flags
    }

    /// User definitions (deleted ones included), ascending by number
    pub fn user_defs(&self) -> Vec<&AttrDef> {
        let mut defs: Vec<&AttrDef> = self
            .by_num
            .iter()
            .map(|(_, def)| def)
            .filter(|def| def.is_user())
            .collect();
        defs.sort_by_key(|def| def.number);
        defs
    }

    pub(crate) fn take_dirty(&mut self) -> BTreeSet<i32> {
        std::mem::take(&mut self.dirty)
    }

    pub(crate) fn mark_all_dirty(&mut self) {
        let numbers: Vec<i32> = self.user_defs().iter().map(|d| d.number).collect();
        self.dirty.extend(numbers);
    }

    /// Resize both indexes for the current population at `hash_factor`
    /// buckets per entry
    pub fn rehash(&mut self, hash_factor: usize) -> Result<()> {
        self.by_name.set_hash_factor(hash_factor);
        self.by_num.set_hash_factor(hash_factor);
        self.by_name.resize(INDEX_MIN_SIZE)?;
        self.by_num.resize(INDEX_MIN_SIZE)
    }

    /// Statistics rows for both indexes
    pub fn stats_rows(&self) -> [String; 2] {
        [self.by_name.stats_row(), self.by_num.stats_row()]
    }
}
