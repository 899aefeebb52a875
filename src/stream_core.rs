/// Stream core simulation.
/// A stream core is one execution lane of a compute unit. During the execute
/// stage each lane processes one work-item of the current sub-wavefront; the
/// lane keeps that assignment as its latch state until the next cycle.
use crate::isa::InstKind;

/// What a lane processed in its last active cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaneWork {
    pub wavefront: usize,
    /// Flat global work-item id
    pub work_item: u32,
    pub kind: InstKind,
    pub cycle: u64,
}

#[derive(Debug, Clone)]
pub struct StreamCore {
    pub id: usize,
    pub compute_unit_id: usize,
    /// Lane latch: set while the lane executes, cleared when it idles
    pub current: Option<LaneWork>,
    /// Work-item operations executed over the lane's lifetime
    pub ops: u64,
}

impl StreamCore {
    pub fn new(id: usize, compute_unit_id: usize) -> Self {
        StreamCore {
            id,
            compute_unit_id,
            current: None,
            ops: 0,
        }
    }

    pub fn issue(&mut self, work: LaneWork) {
        self.current = Some(work);
        self.ops += 1;
    }

    pub fn idle(&mut self) {
        self.current = None;
    }

    pub fn is_active(&self) -> bool {
        self.current.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_latches_work_and_counts() {
        let mut lane = StreamCore::new(3, 1);
        assert!(!lane.is_active());
        let work = LaneWork { wavefront: 0, work_item: 42, kind: InstKind::Alu, cycle: 9 };
        lane.issue(work);
        assert_eq!(lane.current, Some(work));
        lane.idle();
        assert!(!lane.is_active());
        assert_eq!(lane.ops, 1);
    }
}
