//! Hash index statistics

use std::fmt;

/// Snapshot of a table's shape and lookup counters
///
/// `scans`, `hits`, `checks` and `max_scan` are lookup counters. When any
/// of them would overflow, all four restart from zero together so the
/// ratios between them stay meaningful.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HashStats {
    /// Number of buckets
    pub size: usize,
    /// Live entries
    pub entries: usize,
    /// Successful deletions since the last reset
    pub deletes: u32,
    /// Empty buckets
    pub nulls: usize,
    /// Lookups performed
    pub scans: u32,
    /// Lookups that found their key
    pub hits: u32,
    /// Chain entries compared across all lookups
    pub checks: u32,
    /// Longest chain walked by a single lookup
    pub max_scan: u32,
}

impl HashStats {
    pub(crate) fn for_size(size: usize) -> Self {
        Self {
            size,
            nulls: size,
            ..Default::default()
        }
    }

    /// Record one lookup that compared `checked` entries
    pub(crate) fn record_lookup(&mut self, checked: u32, hit: bool) {
        let scans = self.scans.checked_add(1);
        let checks = self.checks.checked_add(checked);
        let hits = if hit { self.hits.checked_add(1) } else { Some(self.hits) };

        match (scans, checks, hits) {
            (Some(scans), Some(checks), Some(hits)) => {
                self.scans = scans;
                self.checks = checks;
                self.hits = hits;
                self.max_scan = self.max_scan.max(checked);
            }
            _ => {
                self.reset_counters();
                self.scans = 1;
                self.checks = checked;
                self.hits = u32::from(hit);
                self.max_scan = checked;
            }
        }
    }

    pub(crate) fn reset_counters(&mut self) {
        self.deletes = 0;
        self.scans = 0;
        self.hits = 0;
        self.checks = 0;
        self.max_scan = 0;
    }

    /// Format as one row of a statistics report, labelled with `name`
    pub fn row(&self, name: &str) -> String {
        format!(
            "{:<15} {:5}{:8}{:8}{:8}{:8}{:8}{:8}{:8}",
            name,
            self.size,
            self.entries,
            self.deletes,
            self.nulls,
            self.scans,
            self.hits,
            self.checks,
            self.max_scan
        )
    }
}

impl fmt::Display for HashStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "size={} entries={} deletes={} nulls={} scans={} hits={} checks={} max_scan={}",
            self.size,
            self.entries,
            self.deletes,
            self.nulls,
            self.scans,
            self.hits,
            self.checks,
            self.max_scan
        )
    }
}
