/// Work-group placement policies.
///
/// Each scheduling pass, the device pops the oldest pending work-group and asks
/// the placement policy which idle compute unit receives it. Dispatch order is
/// always first-come-first-served; the policy only decides *where*.
///   - FirstIdle:  head of the idle pool (longest idle first), the default
///   - RoundRobin: rotating cursor over compute-unit ids, spreads work evenly
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::pool::ComputeUnitSet;

/// Trait for placement policies.
pub trait Placement: Send {
    /// Choose a member of `idle`. Returns None only when `idle` is empty.
    fn pick(&mut self, idle: &ComputeUnitSet) -> Option<usize>;

    fn name(&self) -> &'static str;
}

// ---------------------------------------------------------------------------
// First idle
// ---------------------------------------------------------------------------

/// Takes whichever compute unit has been idle the longest.
pub struct FirstIdle;

impl Placement for FirstIdle {
    fn pick(&mut self, idle: &ComputeUnitSet) -> Option<usize> {
        idle.front()
    }

    fn name(&self) -> &'static str {
        "first-idle"
    }
}

// ---------------------------------------------------------------------------
// Round-robin
// ---------------------------------------------------------------------------

/// Picks the idle compute unit with the smallest id at or after the cursor,
/// wrapping around, then moves the cursor past it.
pub struct RoundRobin {
    cursor: usize,
}

impl RoundRobin {
    pub fn new() -> Self {
        RoundRobin { cursor: 0 }
    }
}

impl Default for RoundRobin {
    fn default() -> Self {
        Self::new()
    }
}

impl Placement for RoundRobin {
    fn pick(&mut self, idle: &ComputeUnitSet) -> Option<usize> {
        let after = idle.iter().filter(|&id| id >= self.cursor).min();
        let picked = after.or_else(|| idle.iter().min())?;
        self.cursor = picked + 1;
        Some(picked)
    }

    fn name(&self) -> &'static str {
        "round-robin"
    }
}

// ---------------------------------------------------------------------------
// Policy selector
// ---------------------------------------------------------------------------

/// Selectable placement policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum PlacementPolicy {
    #[default]
    FirstIdle,
    RoundRobin,
}

impl PlacementPolicy {
    pub fn build(self) -> Box<dyn Placement> {
        match self {
            PlacementPolicy::FirstIdle => Box::new(FirstIdle),
            PlacementPolicy::RoundRobin => Box::new(RoundRobin::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PlacementPolicy::FirstIdle => "first-idle",
            PlacementPolicy::RoundRobin => "round-robin",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_idle_takes_pool_head() {
        let mut idle = ComputeUnitSet::full(3);
        idle.remove(0);
        idle.push_back(0);
        assert_eq!(FirstIdle.pick(&idle), Some(1));
        assert_eq!(FirstIdle.pick(&ComputeUnitSet::with_capacity(3)), None);
    }

    #[test]
    fn round_robin_rotates_and_wraps() {
        let mut rr = RoundRobin::new();
        let mut idle = ComputeUnitSet::full(3);
        assert_eq!(rr.pick(&idle), Some(0));
        idle.remove(0);
        assert_eq!(rr.pick(&idle), Some(1));
        idle.remove(1);
        idle.push_back(0);
        // cursor is at 2, so 2 comes before the re-idled 0
        assert_eq!(rr.pick(&idle), Some(2));
        idle.remove(2);
        assert_eq!(rr.pick(&idle), Some(0));
    }

    #[test]
    fn policy_builds_named_placement() {
        assert_eq!(PlacementPolicy::default().build().name(), "first-idle");
        assert_eq!(PlacementPolicy::RoundRobin.build().name(), PlacementPolicy::RoundRobin.name());
    }
}
