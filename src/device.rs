/// Top-level device simulator.
/// Models an accelerator as a fixed arena of compute units, partitioned at
/// every instant into an idle and a busy pool. Each global cycle the device
/// first dispatches pending work-groups to idle compute units, then advances
/// every busy compute unit's pipeline by one cycle.
use std::sync::atomic::{AtomicU32, Ordering};

use tracing::{debug, info};

use crate::compute_unit::{ComputeUnit, StepEnv, StepOutcome};
use crate::config::{DeviceConfig, MemoryConfig, SimConfig};
use crate::error::{Result, SimError};
use crate::isa::{InstructionModel, SyntheticProgram};
use crate::memory::{MemoryHierarchy, MemoryService};
use crate::metrics::{now_ms, write_metrics, LiveMetrics};
use crate::ndrange::{NDRange, WorkGroupStatus};
use crate::pipeline::StageOrder;
use crate::pool::ComputeUnitSet;
use crate::scheduler::Placement;
use crate::trace::{Action, NullSink, TraceEvent, TraceSink};
use crate::wavefront::DEFAULT_WAVEFRONT_SIZE;

static NEXT_DEVICE_ID: AtomicU32 = AtomicU32::new(0);

/// Counters collected over the device's lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    /// Cycles stepped so far
    pub cycles: u64,
    pub work_groups_completed: u64,
    pub instructions_retired: u64,
    pub memory_requests: u64,
    /// Busy cycles per compute unit, indexed by CU id
    pub busy_cycles: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every work-group of the NDRange is Done
    Completed(RunStats),
    /// The cycle budget ran out; in-flight work-groups stay Running
    Suspended(RunStats),
}

impl RunOutcome {
    pub fn stats(&self) -> &RunStats {
        match self {
            RunOutcome::Completed(s) | RunOutcome::Suspended(s) => s,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed(_))
    }
}

pub struct Device<S: TraceSink = NullSink> {
    pub id: u32,
    pub config: DeviceConfig,
    compute_units: Vec<ComputeUnit>,
    idle: ComputeUnitSet,
    busy: ComputeUnitSet,
    placement: Box<dyn Placement>,
    isa: Box<dyn InstructionModel>,
    memory: Box<dyn MemoryService>,
    trace: S,
    /// NDRange with work still in flight
    active: Option<ActiveRun>,
    cycle: u64,
    /// Cycles between live metrics snapshots (0 = off)
    metrics_interval: u64,
}

/// Identity of the NDRange a suspended run belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ActiveRun {
    launch: u64,
    id: u32,
}

impl Device<NullSink> {
    /// Build a device; fails before any cycle runs if the configuration
    /// cannot host work.
    pub fn new(config: DeviceConfig) -> Result<Self> {
        config.validate()?;
        let id = NEXT_DEVICE_ID.fetch_add(1, Ordering::Relaxed);
        let compute_units = (0..config.num_compute_units)
            .map(|cu| ComputeUnit::new(cu, id, config.num_stream_cores))
            .collect();

        info!(
            device = id,
            compute_units = config.num_compute_units,
            stream_cores = config.num_stream_cores,
            wavefront_size = config.wavefront_size,
            placement = config.placement.name(),
            "device created"
        );

        Ok(Device {
            id,
            idle: ComputeUnitSet::full(config.num_compute_units),
            busy: ComputeUnitSet::with_capacity(config.num_compute_units),
            placement: config.placement.build(),
            isa: Box::new(SyntheticProgram::new(Vec::new())),
            memory: Box::new(MemoryHierarchy::new(&MemoryConfig::default())),
            trace: NullSink,
            active: None,
            cycle: 0,
            metrics_interval: 0,
            compute_units,
            config,
        })
    }

    /// `num_compute_units` units of `num_stream_cores` lanes each. The
    /// wavefront size is the default rounded up to a multiple of the lanes.
    pub fn with_units(num_compute_units: usize, num_stream_cores: usize) -> Result<Self> {
        let lanes = num_stream_cores.max(1) as u32;
        let wavefront_size = DEFAULT_WAVEFRONT_SIZE.div_ceil(lanes) * lanes;
        Self::new(DeviceConfig::new(num_compute_units, num_stream_cores).with_wavefront_size(wavefront_size))
    }

    /// Device, instruction model and memory hierarchy from a full config.
    pub fn from_config(config: &SimConfig) -> Result<Self> {
        Ok(Self::new(config.device.clone())?
            .with_isa(Box::new(SyntheticProgram::new(config.kernel.program.clone())))
            .with_memory(Box::new(MemoryHierarchy::new(&config.memory)))
            .with_metrics_interval(config.run.metrics_interval))
    }
}

impl<S: TraceSink> Device<S> {
    pub fn with_isa(mut self, isa: Box<dyn InstructionModel>) -> Self {
        self.isa = isa;
        self
    }

    pub fn with_memory(mut self, memory: Box<dyn MemoryService>) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_placement(mut self, placement: Box<dyn Placement>) -> Self {
        self.placement = placement;
        self
    }

    pub fn with_metrics_interval(mut self, interval: u64) -> Self {
        self.metrics_interval = interval;
        self
    }

    pub fn with_stage_order(mut self, order: StageOrder) -> Self {
        self.compute_units.iter_mut().for_each(|cu| cu.set_stage_order(order));
        self
    }

    /// Replace the trace sink.
    pub fn with_trace<T: TraceSink>(self, trace: T) -> Device<T> {
        Device {
            id: self.id,
            config: self.config,
            compute_units: self.compute_units,
            idle: self.idle,
            busy: self.busy,
            placement: self.placement,
            isa: self.isa,
            memory: self.memory,
            trace,
            active: self.active,
            cycle: self.cycle,
            metrics_interval: self.metrics_interval,
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn idle_count(&self) -> usize {
        self.idle.len()
    }

    pub fn busy_count(&self) -> usize {
        self.busy.len()
    }

    pub fn idle_units(&self) -> Vec<usize> {
        self.idle.snapshot()
    }

    pub fn busy_units(&self) -> Vec<usize> {
        self.busy.snapshot()
    }

    pub fn compute_units(&self) -> &[ComputeUnit] {
        &self.compute_units
    }

    pub fn compute_unit(&self, id: usize) -> Result<&ComputeUnit> {
        self.compute_units.get(id).ok_or(SimError::UnknownComputeUnit(id))
    }

    pub fn placement_name(&self) -> &'static str {
        self.placement.name()
    }

    pub fn trace(&self) -> &S {
        &self.trace
    }

    pub fn trace_mut(&mut self) -> &mut S {
        &mut self.trace
    }

    pub fn stats(&self) -> RunStats {
        let mut stats = RunStats {
            cycles: self.cycle,
            ..Default::default()
        };
        for cu in &self.compute_units {
            stats.work_groups_completed += cu.stats.work_groups_completed;
            stats.instructions_retired += cu.stats.instructions_retired;
            stats.memory_requests += cu.stats.memory_requests;
            stats.busy_cycles.push(cu.stats.busy_cycles);
        }
        stats
    }

    // -----------------------------------------------------------------------
    // Run loop
    // -----------------------------------------------------------------------

    /// Run the NDRange until every work-group is Done.
    pub fn run(&mut self, ndrange: &mut NDRange) -> Result<RunStats> {
        match self.drive(ndrange, None)? {
            RunOutcome::Completed(stats) | RunOutcome::Suspended(stats) => Ok(stats),
        }
    }

    /// Run at most `max_cycles` further cycles. A suspended run resumes on
    /// the next call with the same NDRange.
    pub fn run_for(&mut self, ndrange: &mut NDRange, max_cycles: u64) -> Result<RunOutcome> {
        self.drive(ndrange, Some(max_cycles))
    }

    fn drive(&mut self, ndrange: &mut NDRange, budget: Option<u64>) -> Result<RunOutcome> {
        self.begin(ndrange)?;
        let start = self.cycle;

        loop {
            if !self.idle.is_empty() && ndrange.has_pending() {
                self.schedule_work_groups(ndrange)?;
            }
            if self.busy.is_empty() {
                break;
            }
            if budget.is_some_and(|b| self.cycle - start >= b) {
                info!(
                    ndrange = ndrange.id,
                    cycle = self.cycle,
                    done = ndrange.done_count(),
                    total = ndrange.num_work_groups(),
                    "cycle budget exhausted, run suspended"
                );
                self.publish(ndrange, "suspended");
                self.trace.flush();
                return Ok(RunOutcome::Suspended(self.stats()));
            }

            self.cycle += 1;
            // Units that finish during this step move to idle without
            // disturbing the iteration.
            for cu in self.busy.snapshot() {
                self.step_compute_unit(cu, ndrange)?;
            }

            if self.metrics_interval > 0 && self.cycle % self.metrics_interval == 0 {
                self.publish(ndrange, "running");
            }
        }

        self.active = None;
        self.publish(ndrange, "complete");
        self.trace.flush();
        let stats = self.stats();
        info!(
            ndrange = ndrange.id,
            kernel = %ndrange.kernel_name,
            cycles = stats.cycles,
            work_groups = ndrange.num_work_groups(),
            instructions = stats.instructions_retired,
            "ndrange complete"
        );
        Ok(RunOutcome::Completed(stats))
    }

    /// Checks done before the first cycle of a run.
    fn begin(&mut self, ndrange: &NDRange) -> Result<()> {
        if let Some(active) = self.active {
            // ids are chosen by the caller; only the launch identity is unique
            if active.launch != ndrange.launch() {
                return Err(SimError::NdRangeInFlight {
                    active: active.id,
                    requested: ndrange.id,
                });
            }
            return Ok(());
        }

        let requested = ndrange.work_group_size();
        if requested > self.config.max_work_group_size {
            return Err(SimError::WorkGroupTooLarge {
                requested,
                max: self.config.max_work_group_size,
            });
        }
        if ndrange.wavefront_size != self.config.wavefront_size {
            return Err(SimError::InvalidNdRange(format!(
                "wavefront size {} does not match device wavefront size {}",
                ndrange.wavefront_size, self.config.wavefront_size
            )));
        }

        info!(
            ndrange = ndrange.id,
            kernel = %ndrange.kernel_name,
            global_size = %ndrange.global_size,
            local_size = %ndrange.local_size,
            work_groups = ndrange.num_work_groups(),
            wavefronts_per_work_group = ndrange.wavefronts_per_work_group,
            "ndrange start"
        );
        self.active = Some(ActiveRun {
            launch: ndrange.launch(),
            id: ndrange.id,
        });
        self.publish(ndrange, "running");
        Ok(())
    }

    /// Dispatch pending work-groups to idle compute units, one per unit, in
    /// FIFO order, until either runs out. Returns the number dispatched.
    pub fn schedule_work_groups(&mut self, ndrange: &mut NDRange) -> Result<usize> {
        let mut dispatched = 0;
        while !self.idle.is_empty() && ndrange.has_pending() {
            let Some(cu) = self.placement.pick(&self.idle) else {
                break;
            };
            if !self.idle.remove(cu) {
                return Err(SimError::UnknownComputeUnit(cu));
            }
            let wg = ndrange.take_next_pending()?;
            ndrange.mark_running(wg, cu)?;
            self.compute_units[cu].assign(wg, ndrange.wavefronts_of(wg)?)?;
            self.busy.push_back(cu);

            self.trace.record(&TraceEvent::new(self.cycle + 1, cu, wg, Action::Run));
            debug!(cycle = self.cycle + 1, compute_unit = cu, work_group = wg, "cu action=run");
            dispatched += 1;
        }
        Ok(dispatched)
    }

    /// Advance one busy compute unit by one cycle; on completion the
    /// work-group becomes Done and the unit returns to the idle pool. If the
    /// work-group cannot be marked Done the unit keeps it and stays busy.
    pub fn step_compute_unit(&mut self, cu: usize, ndrange: &mut NDRange) -> Result<()> {
        if cu >= self.compute_units.len() {
            return Err(SimError::UnknownComputeUnit(cu));
        }
        if !self.busy.contains(cu) {
            return Err(SimError::StepIdleComputeUnit(cu));
        }

        let mut env = StepEnv {
            isa: self.isa.as_mut(),
            memory: self.memory.as_mut(),
            trace: &mut self.trace,
        };
        let outcome = self.compute_units[cu].step(self.cycle, &mut env)?;

        if let StepOutcome::Finished(wg) = outcome {
            ndrange.mark_done(wg)?;
            self.compute_units[cu].release();
            self.busy.remove(cu);
            self.idle.push_back(cu);
            self.trace.record(&TraceEvent::new(self.cycle, cu, wg, Action::Complete));
            debug!(cycle = self.cycle, compute_unit = cu, work_group = wg, "cu action=complete");
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Diagnostics
    // -----------------------------------------------------------------------

    /// Pool and ownership invariants, as human-readable violations.
    pub fn invariant_violations(&self, ndrange: &NDRange) -> Vec<String> {
        let mut violations = Vec::new();

        for cu in &self.compute_units {
            let (idle, busy) = (self.idle.contains(cu.id), self.busy.contains(cu.id));
            if idle == busy {
                violations.push(format!("cu {}: idle={} busy={}", cu.id, idle, busy));
            }
            if busy != cu.is_busy() {
                violations.push(format!("cu {}: in busy pool={} but holds work={}", cu.id, busy, cu.is_busy()));
            }
            if let Some(wg) = cu.work_group() {
                if ndrange.status(wg).ok() != Some(WorkGroupStatus::Running) {
                    violations.push(format!("cu {}: holds work-group {} which is not running", cu.id, wg));
                }
            }
        }

        for wg in &ndrange.work_groups {
            if wg.status != WorkGroupStatus::Running {
                continue;
            }
            let holders: Vec<usize> = self
                .compute_units
                .iter()
                .filter(|cu| cu.work_group() == Some(wg.id))
                .map(|cu| cu.id)
                .collect();
            if holders.len() != 1 || wg.compute_unit != holders.first().copied() {
                violations.push(format!(
                    "work-group {}: recorded on cu {:?}, held by {:?}",
                    wg.id, wg.compute_unit, holders
                ));
            }
        }

        violations
    }

    fn publish(&self, ndrange: &NDRange, status: &str) {
        if self.metrics_interval == 0 {
            return;
        }
        write_metrics(&self.snapshot(ndrange, status));
    }

    /// Live metrics view of the current state.
    pub fn snapshot(&self, ndrange: &NDRange, status: &str) -> LiveMetrics {
        LiveMetrics {
            status: status.to_string(),
            kernel_name: ndrange.kernel_name.clone(),
            placement: self.placement.name().to_string(),
            global: ndrange.global_size.as_array(),
            local: ndrange.local_size.as_array(),
            cycle: self.cycle,
            work_groups_total: ndrange.num_work_groups(),
            work_groups_pending: ndrange.pending_len(),
            work_groups_done: ndrange.done_count(),
            idle_compute_units: self.idle.len(),
            busy_compute_units: self.busy.len(),
            cu_work_group: self.compute_units.iter().map(ComputeUnit::work_group).collect(),
            cu_slots_in_flight: self.compute_units.iter().map(ComputeUnit::slots_in_flight).collect(),
            instructions_retired: self.compute_units.iter().map(|cu| cu.stats.instructions_retired).sum(),
            timestamp_ms: now_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::InstKind;
    use crate::ndrange::Dim3;
    use crate::trace::VecSink;

    fn ndrange(id: u32, groups: u32, local: u32, wavefront_size: u32) -> NDRange {
        NDRange::new(id, "k", Dim3::x(groups * local), Dim3::x(local), wavefront_size).unwrap()
    }

    #[test]
    fn creates_units_all_idle() {
        let device = Device::with_units(4, 16).unwrap();
        assert_eq!(device.idle_count(), 4);
        assert_eq!(device.busy_count(), 0);
        assert_eq!(device.idle_units(), vec![0, 1, 2, 3]);
        assert!(device.compute_units().iter().all(|cu| cu.stream_cores.len() == 16));
        assert!(device.compute_units().iter().all(|cu| cu.device_id == device.id));
    }

    #[test]
    fn with_units_rounds_wavefront_to_lane_multiple() {
        let device = Device::with_units(1, 24).unwrap();
        assert_eq!(device.config.wavefront_size, 72);
        assert!(Device::with_units(0, 16).is_err());
        assert!(Device::with_units(2, 0).is_err());
    }

    #[test]
    fn scheduler_fills_idle_units_and_leaves_rest_pending() {
        let mut device = Device::with_units(2, 16).unwrap().with_trace(VecSink::new());
        let mut nd = ndrange(0, 3, 64, 64);
        assert_eq!(device.schedule_work_groups(&mut nd).unwrap(), 2);
        assert_eq!(device.busy_units(), vec![0, 1]);
        assert_eq!(nd.pending_len(), 1);
        assert_eq!(nd.status(0).unwrap(), WorkGroupStatus::Running);
        assert_eq!(nd.status(2).unwrap(), WorkGroupStatus::Pending);
        assert_eq!(device.compute_unit(1).unwrap().work_group(), Some(1));
        assert!(device.invariant_violations(&nd).is_empty());
        // nothing idle: a second pass dispatches nothing
        assert_eq!(device.schedule_work_groups(&mut nd).unwrap(), 0);
    }

    #[test]
    fn run_completes_every_work_group() {
        let mut device = Device::with_units(3, 16)
            .unwrap()
            .with_isa(Box::new(SyntheticProgram::new(vec![InstKind::Alu, InstKind::Load])));
        let mut nd = ndrange(0, 10, 128, 64);
        let stats = device.run(&mut nd).unwrap();
        assert!(nd.all_done());
        assert_eq!(device.busy_count(), 0);
        assert_eq!(device.idle_count(), 3);
        assert_eq!(stats.work_groups_completed, 10);
        // 10 groups x 2 wavefronts x 3 instructions
        assert_eq!(stats.instructions_retired, 60);
        assert_eq!(stats.memory_requests, 10 * 2 * 4);
        assert!(device.invariant_violations(&nd).is_empty());
    }

    #[test]
    fn stepping_an_idle_unit_is_rejected() {
        let mut device = Device::with_units(2, 16).unwrap();
        let mut nd = ndrange(0, 1, 64, 64);
        assert!(matches!(
            device.step_compute_unit(1, &mut nd),
            Err(SimError::StepIdleComputeUnit(1))
        ));
        assert!(matches!(
            device.step_compute_unit(9, &mut nd),
            Err(SimError::UnknownComputeUnit(9))
        ));
    }

    #[test]
    fn oversized_work_group_fails_before_any_cycle() {
        let mut device = Device::with_units(2, 16).unwrap();
        let mut nd = ndrange(0, 2, 512, 64);
        let err = device.run(&mut nd).unwrap_err();
        assert!(matches!(err, SimError::WorkGroupTooLarge { requested: 512, max: 256 }));
        assert_eq!(device.cycle(), 0);
        assert_eq!(nd.pending_len(), 2);
    }

    #[test]
    fn rerunning_a_finished_ndrange_is_a_no_op() {
        let mut device = Device::with_units(2, 16).unwrap();
        let mut nd = ndrange(0, 1, 64, 64);
        device.run(&mut nd).unwrap();
        let finished_at = device.cycle();
        // running an already finished ndrange dispatches nothing
        device.run(&mut nd).unwrap();
        assert_eq!(device.cycle(), finished_at);
    }

    #[test]
    fn wavefront_size_mismatch_is_rejected() {
        let mut device = Device::with_units(2, 16).unwrap();
        let mut nd = ndrange(0, 1, 64, 32);
        assert!(matches!(device.run(&mut nd), Err(SimError::InvalidNdRange(_))));
    }
}
