/// NDRange and work-group bookkeeping.
/// An NDRange is one kernel launch: a 3D index space of work-items split into
/// equally sized work-groups, each of which is split into wavefronts. The
/// NDRange owns the FIFO of work-groups awaiting dispatch.
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};
use crate::wavefront::Wavefront;

static NEXT_LAUNCH: AtomicU64 = AtomicU64::new(0);

/// 3D dimension used for global and local sizes (mirrors OpenCL's size_t[3]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dim3 {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl Dim3 {
    pub fn new(x: u32, y: u32, z: u32) -> Self {
        Dim3 { x, y, z }
    }

    /// Convenience constructor for 1D ranges
    pub fn x(x: u32) -> Self {
        Dim3 { x, y: 1, z: 1 }
    }

    /// Number of points, or `None` if it does not fit in a `u32`.
    pub fn size(&self) -> Option<u32> {
        self.x.checked_mul(self.y)?.checked_mul(self.z)
    }

    pub fn as_array(&self) -> [u32; 3] {
        [self.x, self.y, self.z]
    }
}

impl From<[u32; 3]> for Dim3 {
    fn from(v: [u32; 3]) -> Self {
        Dim3::new(v[0], v[1], v[2])
    }
}

impl std::fmt::Display for Dim3 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{},{})", self.x, self.y, self.z)
    }
}

/// Convert a flat index into a Dim3 given the extent of each dimension.
pub fn flat_to_dim3(flat: u32, dims: Dim3) -> Dim3 {
    let x = flat % dims.x;
    let y = (flat / dims.x) % dims.y;
    let z = flat / (dims.x * dims.y);
    Dim3::new(x, y, z)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkGroupStatus {
    Pending,
    Running,
    Done,
}

impl std::fmt::Display for WorkGroupStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkGroupStatus::Pending => write!(f, "pending"),
            WorkGroupStatus::Running => write!(f, "running"),
            WorkGroupStatus::Done    => write!(f, "done"),
        }
    }
}

/// The unit of dispatch: a batch of wavefronts that runs on one compute unit.
#[derive(Debug, Clone)]
pub struct WorkGroup {
    pub id: usize,
    /// 3D index within the group grid
    pub group_idx: Dim3,
    pub status: WorkGroupStatus,
    /// Range into the NDRange's wavefront table
    pub wavefronts: std::ops::Range<usize>,
    /// Compute unit the group was dispatched to; set once, never changed
    pub compute_unit: Option<usize>,
}

/// One kernel launch and its pending work-group sequence.
#[derive(Debug)]
pub struct NDRange {
    pub id: u32,
    /// Unique per constructed NDRange, whatever `id` the caller picked
    launch: u64,
    pub kernel_name: String,
    pub global_size: Dim3,
    pub local_size: Dim3,
    pub wavefront_size: u32,
    pub wavefronts_per_work_group: usize,
    pub work_groups: Vec<WorkGroup>,
    pub wavefronts: Vec<Wavefront>,
    num_work_items: u32,
    work_group_size: u32,
    pending: VecDeque<usize>,
    done: usize,
}

impl NDRange {
    pub fn new(
        id: u32,
        kernel_name: &str,
        global_size: Dim3,
        local_size: Dim3,
        wavefront_size: u32,
    ) -> Result<Self> {
        if wavefront_size == 0 {
            return Err(SimError::InvalidNdRange("wavefront size is zero".into()));
        }
        for (axis, (g, l)) in ["x", "y", "z"]
            .iter()
            .zip(global_size.as_array().into_iter().zip(local_size.as_array()))
        {
            if g == 0 || l == 0 {
                return Err(SimError::InvalidNdRange(format!("zero size in {axis}")));
            }
            if g % l != 0 {
                return Err(SimError::InvalidNdRange(format!(
                    "global size {g} not a multiple of local size {l} in {axis}"
                )));
            }
        }

        let num_work_items = global_size.size().ok_or_else(|| {
            SimError::InvalidNdRange(format!("global size {global_size} exceeds {} work-items", u32::MAX))
        })?;
        // each axis of local divides global, so this cannot overflow either
        let local_total = local_size.size().ok_or_else(|| {
            SimError::InvalidNdRange(format!("local size {local_size} exceeds {} work-items", u32::MAX))
        })?;

        let group_grid = Dim3::new(
            global_size.x / local_size.x,
            global_size.y / local_size.y,
            global_size.z / local_size.z,
        );
        let num_groups = (num_work_items / local_total) as usize;
        let wavefronts_per_work_group = local_total.div_ceil(wavefront_size) as usize;

        let mut work_groups = Vec::with_capacity(num_groups);
        let mut wavefronts = Vec::with_capacity(num_groups.saturating_mul(wavefronts_per_work_group));

        for wg_id in 0..num_groups {
            let first = wavefronts.len();
            for w in 0..wavefronts_per_work_group as u32 {
                let start = w * wavefront_size;
                let end = start.saturating_add(wavefront_size).min(local_total);
                wavefronts.push(Wavefront {
                    id: wavefronts.len(),
                    work_group_id: wg_id,
                    work_items: start..end,
                    work_item_base: wg_id as u32 * local_total,
                });
            }
            work_groups.push(WorkGroup {
                id: wg_id,
                group_idx: flat_to_dim3(wg_id as u32, group_grid),
                status: WorkGroupStatus::Pending,
                wavefronts: first..wavefronts.len(),
                compute_unit: None,
            });
        }

        let pending = (0..work_groups.len()).collect();

        Ok(NDRange {
            id,
            launch: NEXT_LAUNCH.fetch_add(1, Ordering::Relaxed),
            kernel_name: kernel_name.to_string(),
            global_size,
            local_size,
            wavefront_size,
            wavefronts_per_work_group,
            work_groups,
            wavefronts,
            num_work_items,
            work_group_size: local_total,
            pending,
            done: 0,
        })
    }

    pub fn num_work_groups(&self) -> usize {
        self.work_groups.len()
    }

    pub fn num_work_items(&self) -> u32 {
        self.num_work_items
    }

    /// Work-items per work-group.
    pub fn work_group_size(&self) -> u32 {
        self.work_group_size
    }

    pub fn launch(&self) -> u64 {
        self.launch
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn done_count(&self) -> usize {
        self.done
    }

    pub fn all_done(&self) -> bool {
        self.done == self.work_groups.len()
    }

    /// Pop the oldest pending work-group. Callers must check `has_pending` first.
    pub fn take_next_pending(&mut self) -> Result<usize> {
        self.pending
            .pop_front()
            .ok_or(SimError::NoPendingWorkGroup(self.id))
    }

    pub fn work_group(&self, id: usize) -> Result<&WorkGroup> {
        self.work_groups.get(id).ok_or(SimError::UnknownWorkGroup(id))
    }

    pub fn status(&self, id: usize) -> Result<WorkGroupStatus> {
        Ok(self.work_group(id)?.status)
    }

    /// Wavefront descriptors of one work-group.
    pub fn wavefronts_of(&self, id: usize) -> Result<&[Wavefront]> {
        let range = self.work_group(id)?.wavefronts.clone();
        Ok(&self.wavefronts[range])
    }

    /// Pending -> Running. Records the compute unit the group now lives on.
    pub fn mark_running(&mut self, id: usize, compute_unit: usize) -> Result<()> {
        let wg = self.work_groups.get_mut(id).ok_or(SimError::UnknownWorkGroup(id))?;
        if wg.status != WorkGroupStatus::Pending {
            return Err(SimError::InvalidTransition {
                work_group: id,
                from: wg.status,
                to: WorkGroupStatus::Running,
            });
        }
        wg.status = WorkGroupStatus::Running;
        wg.compute_unit = Some(compute_unit);
        Ok(())
    }

    /// Running -> Done, once the group's last wavefront has retired.
    pub fn mark_done(&mut self, id: usize) -> Result<()> {
        let wg = self.work_groups.get_mut(id).ok_or(SimError::UnknownWorkGroup(id))?;
        if wg.status != WorkGroupStatus::Running {
            return Err(SimError::InvalidTransition {
                work_group: id,
                from: wg.status,
                to: WorkGroupStatus::Done,
            });
        }
        wg.status = WorkGroupStatus::Done;
        self.done += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partitions_global_range_into_work_groups_and_wavefronts() {
        let nd = NDRange::new(0, "k", Dim3::new(256, 4, 1), Dim3::new(100, 1, 1), 64);
        assert!(nd.is_err(), "256 is not a multiple of 100");

        let nd = NDRange::new(0, "k", Dim3::new(200, 4, 1), Dim3::new(100, 2, 1), 64).unwrap();
        assert_eq!(nd.num_work_groups(), 4);
        // 200 work-items per group -> 4 wavefronts, the last one partial
        assert_eq!(nd.wavefronts_per_work_group, 4);
        let wfs = nd.wavefronts_of(3).unwrap();
        assert_eq!(wfs[0].work_items, 0..64);
        assert_eq!(wfs[3].work_items, 192..200);
        assert_eq!(wfs[3].work_item_base, 600);
        assert_eq!(nd.work_groups[3].group_idx, Dim3::new(1, 1, 0));
    }

    #[test]
    fn pending_sequence_is_fifo() {
        let mut nd = NDRange::new(7, "k", Dim3::x(64), Dim3::x(16), 64).unwrap();
        let order: Vec<usize> = (0..4).map(|_| nd.take_next_pending().unwrap()).collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
        assert!(!nd.has_pending());
        assert!(matches!(
            nd.take_next_pending(),
            Err(SimError::NoPendingWorkGroup(7))
        ));
    }

    #[test]
    fn status_transitions_are_monotone() {
        let mut nd = NDRange::new(0, "k", Dim3::x(32), Dim3::x(32), 64).unwrap();
        assert!(matches!(
            nd.mark_done(0),
            Err(SimError::InvalidTransition { from: WorkGroupStatus::Pending, .. })
        ));
        nd.mark_running(0, 5).unwrap();
        assert_eq!(nd.work_groups[0].compute_unit, Some(5));
        assert!(nd.mark_running(0, 6).is_err());
        nd.mark_done(0).unwrap();
        assert!(nd.all_done());
        assert!(nd.mark_done(0).is_err());
    }

    #[test]
    fn oversized_ranges_are_rejected_not_overflowed() {
        let huge = Dim3::new(65536, 65536, 1);
        assert_eq!(huge.size(), None);
        assert!(matches!(
            NDRange::new(0, "k", huge, huge, 64),
            Err(SimError::InvalidNdRange(_))
        ));
        assert!(matches!(
            NDRange::new(0, "k", Dim3::new(65536, 65536, 2), Dim3::new(1, 1, 2), 64),
            Err(SimError::InvalidNdRange(_))
        ));
        // largest products still fit
        assert_eq!(Dim3::new(65536, 65535, 1).size(), Some(4_294_901_760));
        assert_eq!(Dim3::new(4096, 4096, 256).size(), None);
    }

    #[test]
    fn every_ndrange_is_a_distinct_launch() {
        let a = NDRange::new(0, "k", Dim3::x(64), Dim3::x(64), 64).unwrap();
        let b = NDRange::new(0, "k", Dim3::x(64), Dim3::x(64), 64).unwrap();
        assert_eq!(a.id, b.id);
        assert_ne!(a.launch(), b.launch());
        assert_eq!(a.work_group_size(), 64);
        assert_eq!(a.num_work_items(), 64);
    }

    #[test]
    fn rejects_zero_sizes() {
        assert!(NDRange::new(0, "k", Dim3::x(0), Dim3::x(1), 64).is_err());
        assert!(NDRange::new(0, "k", Dim3::x(8), Dim3::x(8), 0).is_err());
    }
}
