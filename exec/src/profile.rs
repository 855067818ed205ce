//! Per-block execution profile.

use std::io::{self, Write};

use serde::Serialize;

use crate::block_cache::BlockCache;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfileEntry {
    pub index: usize,
    pub start: u32,
    pub guest_insns: u32,
    pub host_size: usize,
    pub run_count: u64,
    /// `guest_len * (run_count / 4)`, a rough measure of guest time.
    pub cost: u64,
}

/// Live blocks with at least one dispatcher entry, costliest first.
pub fn collect(cache: &BlockCache) -> Vec<ProfileEntry> {
    let mut entries: Vec<ProfileEntry> = cache
        .blocks()
        .iter()
        .filter(|b| b.is_live() && b.run_count > 0)
        .map(|b| ProfileEntry {
            index: b.index,
            start: b.start,
            guest_insns: b.guest_insns,
            host_size: b.host_size,
            run_count: b.run_count,
            cost: b.guest_len() as u64 * (b.run_count / 4),
        })
        .collect();
    entries.sort_by(|a, b| b.cost.cmp(&a.cost).then(b.run_count.cmp(&a.run_count)));
    entries
}

/// Render `entries` as a text table.
pub fn write_profile(w: &mut impl Write, entries: &[ProfileEntry]) -> io::Result<()> {
    let total: u64 = entries.iter().map(|e| e.cost).sum();
    writeln!(
        w,
        "{:>6} {:>10} {:>6} {:>8} {:>12} {:>12} {:>7}",
        "block", "start", "insns", "host", "runs", "cost", "share"
    )?;
    for e in entries {
        let share = if total == 0 {
            0.0
        } else {
            e.cost as f64 * 100.0 / total as f64
        };
        writeln!(
            w,
            "{:>6} {:#010x} {:>6} {:>8} {:>12} {:>12} {:>6.2}%",
            e.index, e.start, e.guest_insns, e.host_size, e.run_count, e.cost, share
        )?;
    }
    Ok(())
}
