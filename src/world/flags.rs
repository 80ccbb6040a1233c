//! Object type and flag bits carried by the snapshot format
//!
//! Only the bits the load-time upgrade pass touches are named here; every
//! other bit is stored and written back untouched.

// =============================================================================
// Object Types (low bits of flag word 1)
// =============================================================================

pub const TYPE_ROOM: u32 = 0x0;
pub const TYPE_THING: u32 = 0x1;
pub const TYPE_EXIT: u32 = 0x2;
pub const TYPE_PLAYER: u32 = 0x3;
pub const TYPE_GARBAGE: u32 = 0x5;
pub const TYPE_MASK: u32 = 0x7;

// =============================================================================
// Flag Word 1
// =============================================================================

/// Object is being destroyed; never written to a snapshot
pub const GOING: u32 = 0x0000_4000;
pub const MONITOR: u32 = 0x0000_8000;
pub const ROYALTY: u32 = 0x2000_0000;

// =============================================================================
// Flag Word 2
// =============================================================================

/// Obsolete; cleared on every load
pub const FLOATING: u32 = 0x0000_0004;
pub const AUDITORIUM: u32 = 0x0000_0100;
pub const ANSI: u32 = 0x0000_0200;
pub const HEAD_FLAG: u32 = 0x0000_0400;
pub const FIXED: u32 = 0x0000_0800;
pub const ZONE_PARENT: u32 = 0x0000_2000;
pub const NOBLEED: u32 = 0x0000_8000;
pub const STAFF: u32 = 0x0001_0000;
pub const HAS_DAILY: u32 = 0x0002_0000;
pub const GAGGED: u32 = 0x0004_0000;
pub const HAS_COMMANDS: u32 = 0x0008_0000;
pub const STOP_MATCH: u32 = 0x0010_0000;
pub const BOUNCE: u32 = 0x0020_0000;
pub const CONTROL_OK: u32 = 0x0040_0000;
pub const HTML: u32 = 0x0400_0000;
pub const WATCHER: u32 = 0x2000_0000;

// =============================================================================
// Flag Word 3
// =============================================================================

/// Output redirection; never survives a restart
pub const HAS_REDIRECT: u32 = 0x0000_0002;

// =============================================================================
// Powers (word 1)
// =============================================================================

pub const POW_BUILDER: u32 = 0x0000_0001;
