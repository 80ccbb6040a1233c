//! Snapshot writer
//!
//! Writes the current dialect from any [`SnapshotSource`]. With
//! [`V_DBCLEAN`] set, user attribute numbers are first compacted into the
//! gaps left by definitions nothing references any more.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{BufWriter, Write};

use tracing::{debug, info, warn};

use crate::error::{Result, StoreError};
use crate::lock;
use crate::world::{Dbref, Object, A_LIST, A_LOCK, A_MONEY, A_NAME, A_USER_START};

use super::boolexp::write_lock;
use super::dialect::{layout, Field};
use super::stream::{putref, putstring};
use super::{
    SnapshotSource, WriteOptions, WriteReport, TRAILER, V_ATRKEY, V_ATRNAME, V_DBCLEAN, V_MASK,
    V_QUOTED,
};

/// Write a whole snapshot
///
/// Only the current dialect can be written; asking for any other is
/// [`StoreError::UnsupportedDialect`].
pub fn write_snapshot<W, S>(out: W, source: &mut S, options: WriteOptions) -> Result<WriteReport>
where
    W: Write,
    S: SnapshotSource + ?Sized,
{
    if !options.dialect.is_writable() {
        return Err(StoreError::UnsupportedDialect(options.dialect.name().to_string()));
    }

    let header = options.version & !V_DBCLEAN;
    let flags = header & !V_MASK;
    let quoted = flags & V_QUOTED != 0;
    let db_top = source.db_top();

    let renumbering = (options.version & V_DBCLEAN != 0).then(|| Renumbering::plan(source));
    let attr_next = renumbering
        .as_ref()
        .map_or(source.registry().next_free(), |r| r.attr_next);

    let mut report = WriteReport {
        attrs_before: source.registry().next_free(),
        attr_next,
        ..WriteReport::default()
    };
    if let Some(plan) = &renumbering {
        report.attrs_deleted = plan.deleted;
        report.attrs_renumbered = plan.renumbered;
    }

    let mut out = BufWriter::new(out);
    write!(out, "+T{}\n+S{}\n+N{}\n-R{}\n", header, db_top, attr_next, source.record_players())?;
    write_attr_defs(&mut out, source, renumbering.as_ref(), quoted)?;
    debug!(db_top, attr_next, "snapshot header written");

    let mut writer = ObjectWriter {
        flags,
        quoted,
        renumbering: renumbering.as_ref(),
        report: &mut report,
    };
    for dbref in 0..db_top {
        let Some(obj) = source.object(dbref).cloned() else {
            continue;
        };
        if obj.is_going() {
            continue;
        }
        writer.write_object(&mut out, source, dbref, &obj)?;
    }

    out.write_all(TRAILER.as_bytes())?;
    out.write_all(b"\n")?;
    out.flush()?;

    if renumbering.is_some() {
        info!(
            before = report.attrs_before,
            now = report.attr_next,
            deleted = report.attrs_deleted,
            renumbered = report.attrs_renumbered,
            objects_touched = report.objects_touched,
            attrs_touched = report.attrs_touched,
            "attributes cleaned"
        );
    }
    info!(objects = report.objects, db_top, "snapshot written");
    Ok(report)
}

fn write_attr_defs<W: Write, S: SnapshotSource + ?Sized>(
    out: &mut W,
    source: &S,
    renumbering: Option<&Renumbering>,
    quoted: bool,
) -> Result<()> {
    let registry = source.registry();
    let put_def = |out: &mut W, number: i32, flags: u32, name: &str| -> Result<()> {
        putref(out, format_args!("+A{}", number))?;
        putstring(out, &format!("{}:{}", flags, name), quoted)
    };

    match renumbering {
        Some(plan) => {
            for number in A_USER_START..plan.attr_next {
                if let Some(def) = registry.lookup_num(plan.old_number(number)) {
                    if !def.is_deleted() {
                        put_def(out, number, def.flags, &def.name)?;
                    }
                }
            }
        }
        None => {
            for def in registry.user_defs().into_iter().filter(|d| !d.is_deleted()) {
                put_def(out, def.number, def.flags, &def.name)?;
            }
        }
    }
    Ok(())
}

// =============================================================================
// Object Blocks
// =============================================================================

struct ObjectWriter<'a> {
    /// Feature flags, version number masked off
    flags: u32,
    quoted: bool,
    renumbering: Option<&'a Renumbering>,
    report: &'a mut WriteReport,
}

impl ObjectWriter<'_> {
    fn write_object<W: Write, S: SnapshotSource + ?Sized>(
        &mut self,
        out: &mut W,
        source: &mut S,
        dbref: Dbref,
        obj: &Object,
    ) -> Result<()> {
        putref(out, format_args!("!{}", dbref))?;

        for field in layout(self.flags) {
            match field {
                Field::Name => putstring(out, &obj.name, self.quoted)?,
                Field::Location => putref(out, obj.location)?,
                Field::Zone => putref(out, obj.zone)?,
                Field::Contents => putref(out, obj.contents)?,
                Field::Exits => putref(out, obj.exits)?,
                Field::Link => putref(out, obj.link)?,
                Field::Next => putref(out, obj.next)?,
                Field::Lock => self.write_inline_lock(out, source, dbref)?,
                Field::Owner => putref(out, obj.owner)?,
                Field::Parent => putref(out, obj.parent)?,
                Field::Pennies => putref(out, obj.pennies)?,
                Field::Flags1 => putref(out, obj.flags1)?,
                Field::Flags2 => putref(out, obj.flags2)?,
                Field::Flags3 => putref(out, obj.flags3)?,
                Field::Powers1 => putref(out, obj.powers1)?,
                Field::Powers2 => putref(out, obj.powers2)?,
                Field::AccessTime => putref(out, obj.access_time)?,
                Field::ModTime => putref(out, obj.mod_time)?,
                Field::CreateTime => putref(out, obj.create_time)?,
                Field::AttrList => self.write_attr_list(out, source, dbref, obj)?,
            }
        }

        self.report.objects += 1;
        Ok(())
    }

    fn write_inline_lock<W: Write, S: SnapshotSource + ?Sized>(
        &self,
        out: &mut W,
        source: &mut S,
        dbref: Dbref,
    ) -> Result<()> {
        let text = source.attr_text(dbref, A_LOCK)?.unwrap_or_default();
        let registry = source.registry();
        let expr = lock::parse(&text, registry).unwrap_or_else(|e| {
            warn!(dbref, error = %e, "unparsable lock written empty");
            None
        });
        write_lock(out, expr.as_ref(), registry)
    }

    fn write_attr_list<W: Write, S: SnapshotSource + ?Sized>(
        &mut self,
        out: &mut W,
        source: &mut S,
        dbref: Dbref,
        obj: &Object,
    ) -> Result<()> {
        let mut touched = false;

        for &attrnum in &obj.attrs {
            let keep = match attrnum {
                n if n <= 0 => false,
                A_NAME => self.flags & V_ATRNAME != 0,
                A_LOCK => self.flags & V_ATRKEY != 0,
                A_LIST | A_MONEY => false,
                _ => true,
            };
            if !keep {
                continue;
            }
            let Some(value) = source.attr_text(dbref, attrnum)?.filter(|v| !v.is_empty()) else {
                continue;
            };

            let number = self.renumbering.map_or(attrnum, |plan| plan.new_number(attrnum));
            if number != attrnum {
                touched = true;
                self.report.attrs_touched += 1;
            }
            putref(out, format_args!(">{}", number))?;
            putstring(out, &value, self.quoted)?;
        }

        out.write_all(b"<\n")?;
        if touched {
            self.report.objects_touched += 1;
        }
        Ok(())
    }
}

// =============================================================================
// Attribute Compaction
// =============================================================================

/// Mapping from old to new user attribute numbers
///
/// Only numbers that move are stored; everything else maps to itself.
/// The used user numbers end up exactly filling `A_USER_START..attr_next`.
struct Renumbering {
    /// Old number to new number
    forward: BTreeMap<i32, i32>,
    /// New number to the old number now living there
    backward: BTreeMap<i32, i32>,
    attr_next: i32,
    deleted: usize,
    renumbered: usize,
}

impl Renumbering {
    fn plan<S: SnapshotSource + ?Sized>(source: &S) -> Self {
        let registry = source.registry();
        let used: BTreeSet<i32> = (0..source.db_top())
            .filter_map(|dbref| source.object(dbref))
            .flat_map(|obj| obj.attrs.iter().copied())
            .filter(|&n| n >= A_USER_START)
            .collect();

        let count = i32::try_from(used.len())
            .unwrap_or(i32::MAX)
            .min(i32::MAX - A_USER_START);
        let attr_next = A_USER_START + count;

        // The highest used numbers move down into the lowest gaps
        let gaps = (A_USER_START..attr_next).filter(|n| !used.contains(n));
        let movers = used.range(attr_next..).rev().copied();
        let mut forward = BTreeMap::new();
        let mut backward = BTreeMap::new();
        for (gap, old) in gaps.zip(movers) {
            forward.insert(old, gap);
            backward.insert(gap, old);
        }

        let deleted = registry
            .user_defs()
            .iter()
            .filter(|def| !used.contains(&def.number))
            .count();
        let renumbered = forward
            .keys()
            .filter(|&&old| registry.lookup_num(old).is_some())
            .count();

        Self {
            forward,
            backward,
            attr_next,
            deleted,
            renumbered,
        }
    }

    fn new_number(&self, attrnum: i32) -> i32 {
        self.forward.get(&attrnum).copied().unwrap_or(attrnum)
    }

    fn old_number(&self, attrnum: i32) -> i32 {
        self.backward.get(&attrnum).copied().unwrap_or(attrnum)
    }
}
