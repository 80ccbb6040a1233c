//! Hash Index Module
//!
//! General-purpose chained hash table used by every other layer to map
//! string or integer keys to payloads.
//!
//! ## Responsibilities
//! - Lookup, insert (duplicates rejected), delete and replace in O(1) average
//! - Unordered full traversal through a resumable first/next cursor
//! - Load-factor driven resize that re-chains entries without copying them
//! - Lookup statistics (scans, hits, chain checks, longest chain)
//!
//! ## Layout
//! ```text
//!   buckets (power of two)           arena (stable slot indices)
//!   ┌─────┐                          ┌──────────────────────────┐
//!   │  0  │──► 7 ──► 2 ──► ∅         │ 0: free                  │
//!   ├─────┤                          │ 1: {key, payload, flags} │
//!   │  1  │──► ∅                     │ 2: {key, payload, flags} │
//!   ├─────┤                          │ ...                      │
//!   │ ... │                          └──────────────────────────┘
//!   └─────┘
//! ```
//!
//! Chains are singly linked through slot indices, so a resize only rewrites
//! the bucket heads and `next` links; payloads never move.

mod key;
mod stats;
mod table;

pub use key::{HashKey, KeyKind};
pub use stats::HashStats;
pub use table::HashTable;

/// Entry flag: this key is an alias for a payload reachable under another key
pub const HASH_ALIAS: u32 = 0x1;

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1a hash over a byte string
pub fn fnv1a_32(bytes: &[u8]) -> u32 {
    let mut hash = FNV_OFFSET_BASIS;
    for &b in bytes {
        hash ^= u32::from(b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Round a requested capacity up to the next power of two (minimum 1)
pub fn table_size_for(capacity: usize) -> usize {
    capacity.max(1).next_power_of_two()
}
