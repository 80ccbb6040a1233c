//! Cache entries and their intrusive links
//!
//! Every entry sits in two doubly linked lists at once: its bucket chain and
//! the global recency list. Links are arena indices, so relinking an entry is
//! a handful of index writes.

use bytes::Bytes;

use crate::backend::RecordType;

/// Previous/next indices within one list
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Links {
    pub prev: Option<usize>,
    pub next: Option<usize>,
}

/// Head and tail of one list
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct List {
    pub head: Option<usize>,
    pub tail: Option<usize>,
}

/// Which of an entry's two lists an operation applies to
#[derive(Debug, Clone, Copy)]
pub(crate) enum Ring {
    Chain,
    Lru,
}

pub(crate) struct Entry {
    pub key: Vec<u8>,
    pub kind: RecordType,
    /// `None` marks a pending deletion (or a cached absence once clean)
    pub data: Option<Bytes>,
    pub dirty: bool,
    pub bucket: usize,
    chain: Links,
    lru: Links,
}

impl Entry {
    pub fn new(key: &[u8], kind: RecordType, data: Option<Bytes>, dirty: bool, bucket: usize) -> Self {
        Self {
            key: key.to_vec(),
            kind,
            data,
            dirty,
            bucket,
            chain: Links::default(),
            lru: Links::default(),
        }
    }

    /// Bytes this entry counts against the cache ceiling
    pub fn charge(&self) -> usize {
        self.data.as_ref().map_or(0, Bytes::len)
    }

    pub fn matches(&self, key: &[u8], kind: RecordType) -> bool {
        self.kind == kind && self.key == key
    }

    fn links_mut(&mut self, ring: Ring) -> &mut Links {
        match ring {
            Ring::Chain => &mut self.chain,
            Ring::Lru => &mut self.lru,
        }
    }

    pub fn links(&self, ring: Ring) -> Links {
        match ring {
            Ring::Chain => self.chain,
            Ring::Lru => self.lru,
        }
    }
}

/// Slot storage for entries with stable indices
#[derive(Default)]
pub(crate) struct Arena {
    slots: Vec<Option<Entry>>,
    free: Vec<usize>,
}

impl Arena {
    pub fn alloc(&mut self, entry: Entry) -> usize {
        match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(entry);
                idx
            }
            None => {
                self.slots.push(Some(entry));
                self.slots.len() - 1
            }
        }
    }

    /// Take an entry out. The caller must already have unlinked it.
    pub fn release(&mut self, idx: usize) -> Option<Entry> {
        let entry = self.slots.get_mut(idx)?.take()?;
        self.free.push(idx);
        Some(entry)
    }

    pub fn get(&self, idx: usize) -> Option<&Entry> {
        self.slots.get(idx).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut Entry> {
        self.slots.get_mut(idx).and_then(Option::as_mut)
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
    }

    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    fn set_links(&mut self, idx: usize, ring: Ring, f: impl FnOnce(&mut Links)) {
        if let Some(entry) = self.get_mut(idx) {
            f(entry.links_mut(ring));
        }
    }

    fn links(&self, idx: usize, ring: Ring) -> Links {
        self.get(idx).map(|e| e.links(ring)).unwrap_or_default()
    }

    // =========================================================================
    // List Operations
    // =========================================================================

    pub fn push_back(&mut self, list: &mut List, idx: usize, ring: Ring) {
        let tail = list.tail;
        self.set_links(idx, ring, |l| {
            l.prev = tail;
            l.next = None;
        });
        match tail {
            Some(t) => self.set_links(t, ring, |l| l.next = Some(idx)),
            None => list.head = Some(idx),
        }
        list.tail = Some(idx);
    }

    pub fn push_front(&mut self, list: &mut List, idx: usize, ring: Ring) {
        let head = list.head;
        self.set_links(idx, ring, |l| {
            l.prev = None;
            l.next = head;
        });
        match head {
            Some(h) => self.set_links(h, ring, |l| l.prev = Some(idx)),
            None => list.tail = Some(idx),
        }
        list.head = Some(idx);
    }

    pub fn unlink(&mut self, list: &mut List, idx: usize, ring: Ring) {
        let Links { prev, next } = self.links(idx, ring);
        match prev {
            Some(p) => self.set_links(p, ring, |l| l.next = next),
            None => list.head = next,
        }
        match next {
            Some(n) => self.set_links(n, ring, |l| l.prev = prev),
            None => list.tail = prev,
        }
        self.set_links(idx, ring, |l| *l = Links::default());
    }

    /// Walk a list from head to tail
    pub fn walk(&self, list: &List, ring: Ring) -> Vec<usize> {
        let mut out = Vec::new();
        let mut cur = list.head;
        while let Some(idx) = cur {
            out.push(idx);
            cur = self.links(idx, ring).next;
        }
        out
    }
}
