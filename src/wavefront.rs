/// Wavefronts and their per-compute-unit runtime state.
/// A wavefront is a group of work-items executing in SIMD lockstep. The
/// descriptor lives in the NDRange; the runtime state (program counter,
/// in-flight flag) lives in the compute unit running the owning work-group.
use std::ops::Range;

pub const DEFAULT_WAVEFRONT_SIZE: u32 = 64;

/// A wavefront descriptor: which work-items of which work-group it covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wavefront {
    /// Index into the NDRange's wavefront table
    pub id: usize,
    pub work_group_id: usize,
    /// Local work-item ids covered by this wavefront (last one may be partial)
    pub work_items: Range<u32>,
    /// Flat global id of local work-item 0 of the owning work-group
    pub work_item_base: u32,
}

impl Wavefront {
    pub fn num_work_items(&self) -> u32 {
        self.work_items.end - self.work_items.start
    }

    /// Flat global id of a local work-item.
    pub fn global_id(&self, local_id: u32) -> u32 {
        self.work_item_base + local_id
    }

    /// Number of cycles the execute stage needs to cover every work-item
    /// with `num_stream_cores` lanes.
    pub fn num_subwavefronts(&self, num_stream_cores: usize) -> u32 {
        self.num_work_items().div_ceil(num_stream_cores.max(1) as u32).max(1)
    }

    /// Local work-items processed by sub-wavefront `sub`.
    pub fn subwavefront(&self, sub: u32, num_stream_cores: usize) -> Range<u32> {
        let lanes = num_stream_cores as u32;
        let start = (self.work_items.start + sub * lanes).min(self.work_items.end);
        let end = (start + lanes).min(self.work_items.end);
        start..end
    }
}

/// Runtime state of one wavefront while its work-group runs on a compute unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WavefrontState {
    pub id: usize,
    /// Program counter of the next instruction to issue
    pub pc: u32,
    /// An instruction of this wavefront is somewhere in the pipeline
    pub in_flight: bool,
    /// The wavefront executed its end instruction
    pub retired: bool,
}

impl WavefrontState {
    pub fn new(id: usize) -> Self {
        WavefrontState {
            id,
            ..Default::default()
        }
    }

    /// Eligible for the schedule stage.
    pub fn is_issuable(&self) -> bool {
        !self.in_flight && !self.retired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wavefront(items: Range<u32>) -> Wavefront {
        Wavefront {
            id: 0,
            work_group_id: 0,
            work_items: items,
            work_item_base: 128,
        }
    }

    #[test]
    fn full_wavefront_splits_into_equal_subwavefronts() {
        let wf = wavefront(0..64);
        assert_eq!(wf.num_subwavefronts(16), 4);
        assert_eq!(wf.subwavefront(0, 16), 0..16);
        assert_eq!(wf.subwavefront(3, 16), 48..64);
    }

    #[test]
    fn partial_wavefront_has_short_last_subwavefront() {
        let wf = wavefront(64..100);
        assert_eq!(wf.num_work_items(), 36);
        assert_eq!(wf.num_subwavefronts(16), 3);
        assert_eq!(wf.subwavefront(2, 16), 96..100);
        assert_eq!(wf.global_id(64), 192);
    }

    #[test]
    fn retired_or_in_flight_wavefronts_are_not_issuable() {
        let mut state = WavefrontState::new(3);
        assert!(state.is_issuable());
        state.in_flight = true;
        assert!(!state.is_issuable());
        state.in_flight = false;
        state.retired = true;
        assert!(!state.is_issuable());
    }
}
