/// Memory-hierarchy service addressed by the execute stage.
/// Models two tiers:
///   - L2Cache: shared across all compute units, short latency on hit
///   - HBM: main device memory, long latency
///
/// Only timing is modeled; no data is stored. Lines that miss during a cycle
/// become resident at the start of the next one, so compute units stepped in
/// the same cycle observe the same L2 contents whatever their order.
use std::collections::{BTreeSet, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::config::MemoryConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessKind {
    Load,
    Store,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryRequest {
    pub addr: u64,
    pub bytes: u32,
    pub kind: AccessKind,
}

/// Timing service for execute-stage memory requests.
pub trait MemoryService {
    /// Accept a request at cycle `now`; returns the first cycle at which the
    /// result is available. Must be bounded.
    fn access(&mut self, request: &MemoryRequest, now: u64) -> u64;
}

/// Every request completes after the same number of cycles.
#[derive(Debug, Clone, Default)]
pub struct FixedLatencyMemory {
    pub latency: u64,
    pub accesses: u64,
}

impl FixedLatencyMemory {
    pub fn new(latency: u64) -> Self {
        FixedLatencyMemory { latency, accesses: 0 }
    }
}

impl MemoryService for FixedLatencyMemory {
    fn access(&mut self, _request: &MemoryRequest, now: u64) -> u64 {
        self.accesses += 1;
        now + self.latency
    }
}

/// Shared L2 cache. Tracks which lines are resident; evicts the oldest
/// inserted line once full.
#[derive(Debug, Clone)]
pub struct L2Cache {
    pub num_lines: usize,
    pub line_size: u64,
    pub hit_latency: u64,
    resident: HashSet<u64>,
    order: VecDeque<u64>,
    /// Lines missed during `fill_cycle`, inserted in address order once a
    /// later cycle looks up the cache
    filling: BTreeSet<u64>,
    fill_cycle: u64,
    pub hits: u64,
    pub misses: u64,
}

impl L2Cache {
    pub fn new(num_lines: usize, line_size: u64, hit_latency: u64) -> Self {
        L2Cache {
            num_lines,
            line_size: line_size.max(1),
            hit_latency,
            resident: HashSet::new(),
            order: VecDeque::new(),
            filling: BTreeSet::new(),
            fill_cycle: 0,
            hits: 0,
            misses: 0,
        }
    }

    /// Look up one line at cycle `now`. Returns true on hit; a miss fills
    /// the line from cycle `now + 1` on.
    pub fn lookup(&mut self, line: u64, now: u64) -> bool {
        self.settle(now);
        if self.resident.contains(&line) {
            self.hits += 1;
            return true;
        }
        self.misses += 1;
        if self.num_lines > 0 {
            self.filling.insert(line);
        }
        false
    }

    pub fn is_resident(&self, line: u64) -> bool {
        self.resident.contains(&line)
    }

    /// Publish fills from an earlier cycle.
    fn settle(&mut self, now: u64) {
        if now == self.fill_cycle {
            return;
        }
        for line in std::mem::take(&mut self.filling) {
            self.insert(line);
        }
        self.fill_cycle = now;
    }

    fn insert(&mut self, line: u64) {
        if self.resident.contains(&line) {
            return;
        }
        if self.resident.len() >= self.num_lines {
            if let Some(victim) = self.order.pop_front() {
                self.resident.remove(&victim);
            }
        }
        self.resident.insert(line);
        self.order.push_back(line);
    }
}

/// High Bandwidth Memory behind the L2.
#[derive(Debug, Clone)]
pub struct Hbm {
    pub latency: u64,
    pub accesses: u64,
}

impl Hbm {
    pub fn new(latency: u64) -> Self {
        Hbm { latency, accesses: 0 }
    }
}

/// L2 in front of HBM. A request spanning several lines completes when the
/// slowest line does.
#[derive(Debug, Clone)]
pub struct MemoryHierarchy {
    pub l2: L2Cache,
    pub hbm: Hbm,
}

impl MemoryHierarchy {
    pub fn new(config: &MemoryConfig) -> Self {
        MemoryHierarchy {
            l2: L2Cache::new(config.l2_lines, config.line_size, config.l2_hit_latency),
            hbm: Hbm::new(config.hbm_latency),
        }
    }
}

impl MemoryService for MemoryHierarchy {
    fn access(&mut self, request: &MemoryRequest, now: u64) -> u64 {
        let line_size = self.l2.line_size;
        let first = request.addr / line_size;
        let last = (request.addr + request.bytes.max(1) as u64 - 1) / line_size;

        let mut latency = 0;
        for line in first..=last {
            let line_latency = if self.l2.lookup(line, now) {
                self.l2.hit_latency
            } else {
                self.hbm.accesses += 1;
                self.l2.hit_latency + self.hbm.latency
            };
            latency = latency.max(line_latency);
        }
        now + latency
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(addr: u64, bytes: u32) -> MemoryRequest {
        MemoryRequest { addr, bytes, kind: AccessKind::Load }
    }

    fn hierarchy(lines: usize) -> MemoryHierarchy {
        MemoryHierarchy::new(&MemoryConfig {
            l2_hit_latency: 10,
            hbm_latency: 100,
            l2_lines: lines,
            line_size: 64,
        })
    }

    #[test]
    fn miss_then_hit() {
        let mut mem = hierarchy(16);
        assert_eq!(mem.access(&load(0, 64), 5), 5 + 110);
        assert_eq!(mem.access(&load(32, 4), 200), 210);
        assert_eq!(mem.l2.hits, 1);
        assert_eq!(mem.l2.misses, 1);
        assert_eq!(mem.hbm.accesses, 1);
    }

    #[test]
    fn request_spanning_lines_waits_for_slowest() {
        let mut mem = hierarchy(16);
        mem.access(&load(0, 4), 0);
        // line 0 hits, line 1 misses
        assert_eq!(mem.access(&load(60, 8), 1), 111);
        assert_eq!(mem.l2.hits, 1);
    }

    #[test]
    fn evicts_oldest_line_when_full() {
        let mut mem = hierarchy(2);
        mem.access(&load(0, 4), 0);
        mem.access(&load(64, 4), 1);
        mem.access(&load(128, 4), 2);
        // line 0 was evicted when line 2 landed
        assert_eq!(mem.access(&load(0, 4), 3), 113);
        assert_eq!(mem.access(&load(128, 4), 4), 14);
        assert!(!mem.l2.is_resident(1));
    }

    #[test]
    fn fills_land_at_the_next_cycle() {
        let mut mem = hierarchy(16);
        // two units miss the same line in one cycle: both go to HBM
        assert_eq!(mem.access(&load(0, 32), 5), 115);
        assert_eq!(mem.access(&load(32, 32), 5), 115);
        assert_eq!(mem.hbm.accesses, 2);
        assert!(!mem.l2.is_resident(0));

        assert_eq!(mem.access(&load(16, 4), 6), 16);
        assert!(mem.l2.is_resident(0));
    }

    #[test]
    fn same_cycle_access_order_does_not_matter() {
        let lines = [3u64, 0, 7, 1, 5];
        let run = |order: &[u64]| {
            let mut mem = hierarchy(3);
            for &line in order {
                mem.access(&load(line * 64, 4), 1);
            }
            // a second cycle evicts some of the first cycle's fills
            mem.access(&load(9 * 64, 4), 2);
            let resident: Vec<u64> = (0..10).filter(|l| mem.l2.is_resident(*l)).collect();
            let later: Vec<u64> = (0..10).map(|l| mem.access(&load(l * 64, 4), 3)).collect();
            (resident, later, mem.l2.hits, mem.l2.misses)
        };
        let mut reversed = lines;
        reversed.reverse();
        assert_eq!(run(&lines), run(&reversed));
    }

    #[test]
    fn fixed_latency_counts_accesses() {
        let mut mem = FixedLatencyMemory::new(3);
        assert_eq!(mem.access(&load(0, 4), 7), 10);
        assert_eq!(mem.accesses, 1);
    }
}
