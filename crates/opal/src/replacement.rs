//! Victim selection within a set, honouring the lock set.

use std::fmt;

use rand::Rng;
use rand::rngs::SmallRng;
use rustc_hash::FxHashSet;

use crate::error::CacheError;
use crate::geometry::Geometry;
use crate::line::CacheLine;

/// Upper bound on victim-selection attempts before the cache declares
/// starvation: a single submission cannot legitimately lock more lines than
/// the table holds.
pub const MAX_VICTIM_ATTEMPTS: u32 = 1000;

/// Eviction policy applied within a set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplacementPolicy {
    Lru,
    Fifo,
    Random,
    Smallest,
}

impl fmt::Display for ReplacementPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lru => f.write_str("LRU"),
            Self::Fifo => f.write_str("FIFO"),
            Self::Random => f.write_str("RANDOM"),
            Self::Smallest => f.write_str("SMALLEST"),
        }
    }
}

/// Mutable cache state a policy needs while choosing a victim. Per-policy
/// state (the FIFO cursors, the RNG) lives in the cache instance and is lent
/// here per call.
pub(crate) struct VictimContext<'a> {
    pub lines: &'a [CacheLine],
    pub geometry: &'a Geometry,
    pub locked: &'a FxHashSet<usize>,
    pub fifo_cursors: &'a mut [usize],
    pub rng: &'a mut SmallRng,
}

impl ReplacementPolicy {
    /// Choose the line to overwrite within `set_index`.
    pub(crate) fn pick_victim(self, set_index: usize, ctx: &mut VictimContext<'_>) -> Result<usize, CacheError> {
        match self {
            Self::Lru => match oldest_unlocked(set_index, ctx) {
                Some(idx) => Ok(idx),
                None => random_in_set(set_index, ctx),
            },
            Self::Fifo => fifo_next(set_index, ctx),
            Self::Random => random_in_set(set_index, ctx),
            Self::Smallest => match smallest_unlocked(set_index, ctx) {
                Some(idx) => Ok(idx),
                None => random_in_set(set_index, ctx),
            },
        }
    }
}

/// Unlocked line with the largest age, ties broken toward the lower index.
fn oldest_unlocked(set_index: usize, ctx: &VictimContext<'_>) -> Option<usize> {
    let mut best: Option<(usize, u64)> = None;
    for idx in ctx.geometry.set_range(set_index) {
        if ctx.locked.contains(&idx) {
            continue;
        }
        let age = ctx.lines[idx].age;
        if best.is_none_or(|(_, best_age)| age > best_age) {
            best = Some((idx, age));
        }
    }
    best.map(|(idx, _)| idx)
}

/// Unlocked populated line with the smallest region, ties toward the lower index.
fn smallest_unlocked(set_index: usize, ctx: &VictimContext<'_>) -> Option<usize> {
    let mut best: Option<(usize, usize)> = None;
    for idx in ctx.geometry.set_range(set_index) {
        if ctx.locked.contains(&idx) || !ctx.lines[idx].is_populated() {
            continue;
        }
        let size = ctx.lines[idx].size;
        if best.is_none_or(|(_, best_size)| size < best_size) {
            best = Some((idx, size));
        }
    }
    best.map(|(idx, _)| idx)
}

/// Advance the per-set rotating cursor past locked lines.
fn fifo_next(set_index: usize, ctx: &mut VictimContext<'_>) -> Result<usize, CacheError> {
    let lines_per_set = ctx.geometry.lines_per_set;
    for _ in 0..MAX_VICTIM_ATTEMPTS {
        ctx.fifo_cursors[set_index] = (ctx.fifo_cursors[set_index] + 1) % lines_per_set;
        let idx = set_index * lines_per_set + ctx.fifo_cursors[set_index];
        if !ctx.locked.contains(&idx) {
            return Ok(idx);
        }
    }
    Err(starvation(ctx.locked))
}

/// Uniform draw within the set, rejecting locked indices.
fn random_in_set(set_index: usize, ctx: &mut VictimContext<'_>) -> Result<usize, CacheError> {
    let start = set_index * ctx.geometry.lines_per_set;
    for _ in 0..MAX_VICTIM_ATTEMPTS {
        let idx = start + ctx.rng.random_range(0..ctx.geometry.lines_per_set);
        if !ctx.locked.contains(&idx) {
            return Ok(idx);
        }
    }
    Err(starvation(ctx.locked))
}

/// Uniform draw over the whole table. Used when a direct-mapped cache finds
/// its sole candidate locked.
pub(crate) fn random_any(ctx: &mut VictimContext<'_>) -> Result<usize, CacheError> {
    for _ in 0..MAX_VICTIM_ATTEMPTS {
        let idx = ctx.rng.random_range(0..ctx.geometry.line_count);
        if !ctx.locked.contains(&idx) {
            return Ok(idx);
        }
    }
    Err(starvation(ctx.locked))
}

fn starvation(locked: &FxHashSet<usize>) -> CacheError {
    let mut locked: Vec<usize> = locked.iter().copied().collect();
    locked.sort_unstable();
    CacheError::EvictionStarvation {
        attempts: MAX_VICTIM_ATTEMPTS,
        locked,
    }
}
