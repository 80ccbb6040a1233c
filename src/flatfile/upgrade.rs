//! Load-time normalisation of foreign dialects
//!
//! Two passes: a per-object flag upgrade run as each block is read, and a
//! whole-snapshot pass run once the trailer has been seen.

use std::collections::BTreeSet;

use tracing::debug;

use crate::world::flags::*;
use crate::world::{Object, ObjectType, A_LCONTROL, A_LENTER, A_QUOTA, A_RQUOTA};

use super::{Dialect, Snapshot, V_LINK, V_TQUOTAS};

/// 2.x flag-word-2 bits and where they live now, applied in order
const MUSH_FLAG2_REMAP: &[(u32, u32)] = &[
    (HAS_COMMANDS, NOBLEED),
    (AUDITORIUM, ZONE_PARENT),
    (ANSI, STOP_MATCH),
    (HEAD_FLAG, HAS_COMMANDS),
    (FIXED, BOUNCE),
    (STAFF, HTML),
    (HAS_DAILY, 0),
    (GAGGED, ANSI),
];

/// Rewrite one object's flag words into current meanings
pub(crate) fn upgrade_flags(dialect: Dialect, version: u32, obj: &mut Object) {
    match dialect {
        Dialect::Mush if version >= 3 => {
            if obj.flags1 & ROYALTY != 0 {
                obj.flags1 &= !ROYALTY;
                obj.flags2 |= CONTROL_OK;
            }
            for &(from, to) in MUSH_FLAG2_REMAP {
                if obj.flags2 & from != 0 {
                    obj.flags2 = (obj.flags2 & !from) | to;
                }
            }
            if obj.flags2 & WATCHER != 0 {
                obj.flags2 &= !WATCHER;
                obj.powers1 |= POW_BUILDER;
            }
            obj.flags3 = 0;
        }
        Dialect::Mux => {
            // ZONE_PARENT was NO_COMMAND there
            if obj.flags2 & ZONE_PARENT != 0 {
                obj.flags2 &= !ZONE_PARENT;
            } else {
                obj.flags2 |= HAS_COMMANDS;
            }
            obj.flags2 &= !WATCHER;
            if obj.flags1 & MONITOR != 0 && obj.is_player() {
                obj.flags2 |= WATCHER;
            }
        }
        Dialect::TinyMush | Dialect::Legacy => {
            obj.flags3 &= !HAS_REDIRECT;
        }
        Dialect::Mush => {}
    }
    obj.flags2 &= !FLOATING;
}

/// Whole-snapshot fixes that need every object loaded
pub(crate) fn normalize(snapshot: &mut Snapshot) {
    if snapshot.flags & V_TQUOTAS == 0 {
        fix_typed_quotas(snapshot);
    }
    if snapshot.dialect == Dialect::Mux {
        fix_mux_zones(snapshot);
    }
    if snapshot.dialect == Dialect::Mush && snapshot.flags & V_LINK != 0 {
        swap_link_and_exits(snapshot);
    }
}

/// Explode single quota values into the five-field typed form
fn fix_typed_quotas(snapshot: &mut Snapshot) {
    let mut players = 0usize;
    for so in snapshot.objects.values_mut().filter(|so| so.object.is_player()) {
        let quota = so.attr(A_QUOTA).filter(|q| !q.is_empty()).unwrap_or("1").to_string();
        let rquota = so.attr(A_RQUOTA).filter(|q| !q.is_empty()).unwrap_or("0").to_string();
        so.set_attr(A_QUOTA, [quota.as_str(); 5].join(" "));
        so.set_attr(A_RQUOTA, [rquota.as_str(); 5].join(" "));
        players += 1;
    }
    debug!(players, "typed quotas expanded");
}

/// Zoned objects become CONTROL_OK; zone masters get their enter lock as
/// their control lock
fn fix_mux_zones(snapshot: &mut Snapshot) {
    let mut masters = BTreeSet::new();
    for so in snapshot.objects.values_mut() {
        if so.object.zone >= 0 {
            so.object.flags2 |= CONTROL_OK;
            masters.insert(so.object.zone);
        }
    }

    for dbref in &masters {
        if let Some(so) = snapshot.objects.get_mut(dbref) {
            if let Some(lock) = so.attr(A_LENTER).map(str::to_string) {
                so.set_attr(A_LCONTROL, lock);
            }
        }
    }
    debug!(masters = masters.len(), "zones converted");
}

/// 2.x stored the home of players and things in the exits field
fn swap_link_and_exits(snapshot: &mut Snapshot) {
    for so in snapshot.objects.values_mut() {
        if matches!(so.object.object_type(), ObjectType::Player | ObjectType::Thing) {
            std::mem::swap(&mut so.object.link, &mut so.object.exits);
        }
    }
}
