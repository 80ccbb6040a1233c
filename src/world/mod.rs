//! World Model Module
//!
//! The fields of objects this store persists, and the attribute registry.
//!
//! ## Responsibilities
//! - Object table indexed by dbref, growable to the snapshot's `+S` size
//! - Attribute definitions (built-in and user) with name/number lookup
//! - Per-object dirty tracking for incremental checkpoints

mod attrs;
pub mod flags;
mod object;

pub use attrs::*;
pub use object::{Object, ObjectType};

/// Object number
pub type Dbref = i32;

/// The null object reference
pub const NOTHING: Dbref = -1;

/// All objects plus the database-wide parameters saved with them
pub struct World {
    objects: Vec<Object>,

    /// Highest number of simultaneously connected players seen
    pub record_players: i32,

    /// Minimum table size requested by the last snapshot
    pub min_size: usize,

    pub attrs: AttrRegistry,
}

impl World {
    pub fn new(default_attr_flags: u32) -> Self {
        Self {
            objects: Vec::new(),
            record_players: 0,
            min_size: 0,
            attrs: AttrRegistry::new(default_attr_flags),
        }
    }

    /// One past the highest object number
    pub fn db_top(&self) -> Dbref {
        self.objects.len() as Dbref
    }

    fn index(&self, dbref: Dbref) -> Option<usize> {
        usize::try_from(dbref)
            .ok()
            .filter(|&idx| idx < self.objects.len())
    }

    pub fn get(&self, dbref: Dbref) -> Option<&Object> {
        self.index(dbref).map(|idx| &self.objects[idx])
    }

    pub fn get_mut(&mut self, dbref: Dbref) -> Option<&mut Object> {
        let idx = self.index(dbref)?;
        Some(&mut self.objects[idx])
    }

    /// Extend the table with garbage objects so that `top` slots exist
    pub fn grow(&mut self, top: usize) {
        if top > self.objects.len() {
            self.objects.resize_with(top, Object::default);
        }
    }

    /// Store `object` at `dbref`, growing the table if needed
    pub fn set(&mut self, dbref: Dbref, mut object: Object) {
        let Ok(idx) = usize::try_from(dbref) else {
            return;
        };
        self.grow(idx + 1);
        object.dirty = true;
        self.objects[idx] = object;
    }

    /// Append `object` at the top of the table
    pub fn create(&mut self, mut object: Object) -> Dbref {
        object.dirty = true;
        self.objects.push(object);
        self.db_top() - 1
    }

    pub fn iter(&self) -> impl Iterator<Item = (Dbref, &Object)> + '_ {
        self.objects
            .iter()
            .enumerate()
            .map(|(idx, obj)| (idx as Dbref, obj))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Dbref, &mut Object)> + '_ {
        self.objects
            .iter_mut()
            .enumerate()
            .map(|(idx, obj)| (idx as Dbref, obj))
    }

    /// Drop every object, keeping the attribute registry
    pub fn clear_objects(&mut self) {
        self.objects.clear();
    }
}
