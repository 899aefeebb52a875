/// Compute unit: the scheduling target of the device.
/// Each compute unit owns a fixed set of stream cores and a six-stage
/// pipeline, and runs at most one work-group at a time.
///
/// One call to `step` advances the pipeline by exactly one cycle in three
/// phases:
///   1. plan:     decide from committed state which stages fire
///   2. evaluate: run the firing stages (reads `current`, writes `next`)
///   3. commit:   publish latches and wavefront write-backs
use tracing::trace;

use crate::error::{Result, SimError};
use crate::isa::{InstKind, InstructionModel};
use crate::memory::MemoryService;
use crate::pipeline::{Latch, Slot, Stage, StageOrder, NUM_LATCHES, NUM_STAGES};
use crate::stream_core::{LaneWork, StreamCore};
use crate::trace::{Action, TraceEvent, TraceSink};
use crate::wavefront::{Wavefront, WavefrontState};

/// External collaborators a compute unit calls into while stepping.
pub struct StepEnv<'a> {
    pub isa: &'a mut dyn InstructionModel,
    pub memory: &'a mut dyn MemoryService,
    pub trace: &'a mut dyn TraceSink,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Running,
    /// The assigned work-group retired its last wavefront
    Finished(usize),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComputeUnitStats {
    pub busy_cycles: u64,
    pub instructions_retired: u64,
    pub memory_requests: u64,
    pub work_groups_completed: u64,
}

/// Slot occupying the execute stage across several cycles.
#[derive(Debug, Clone)]
struct InExecute {
    slot: Slot,
    next_sub: u32,
    num_subs: u32,
    /// First cycle at which all memory requests have completed
    ready_at: u64,
}

/// Wavefront state changes, applied at commit.
#[derive(Debug, Clone, Copy)]
enum WaveUpdate {
    Issued(usize),
    Written { local: usize, next_pc: u32, retired: bool },
}

#[derive(Debug, Clone, Copy)]
struct CyclePlan {
    /// Stage consumes its input latch this cycle (Schedule: issues)
    fires: [bool; NUM_STAGES],
    /// Execute may push into the write latch this cycle
    execute_can_emit: bool,
    /// Wavefront the schedule stage issues
    issue: Option<usize>,
}

pub struct ComputeUnit {
    pub id: usize,
    /// Owning device
    pub device_id: u32,
    pub stream_cores: Vec<StreamCore>,
    work_group: Option<usize>,
    descriptors: Vec<Wavefront>,
    wavefronts: Vec<WavefrontState>,
    schedule_cursor: usize,
    latches: [Latch<Slot>; NUM_LATCHES],
    execute: Option<InExecute>,
    updates: Vec<WaveUpdate>,
    order: StageOrder,
    pub stats: ComputeUnitStats,
}

impl ComputeUnit {
    pub fn new(id: usize, device_id: u32, num_stream_cores: usize) -> Self {
        ComputeUnit {
            id,
            device_id,
            stream_cores: (0..num_stream_cores).map(|sc| StreamCore::new(sc, id)).collect(),
            work_group: None,
            descriptors: Vec::new(),
            wavefronts: Vec::new(),
            schedule_cursor: 0,
            latches: std::array::from_fn(|_| Latch::default()),
            execute: None,
            updates: Vec::new(),
            order: StageOrder::default(),
            stats: ComputeUnitStats::default(),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.work_group.is_some()
    }

    pub fn work_group(&self) -> Option<usize> {
        self.work_group
    }

    pub fn set_stage_order(&mut self, order: StageOrder) {
        self.order = order;
    }

    /// Occupied latches plus the execute slot.
    pub fn slots_in_flight(&self) -> usize {
        self.latches.iter().filter(|l| !l.is_empty()).count() + self.execute.is_some() as usize
    }

    /// Take ownership of a work-group. The schedule stage starts at the
    /// group's first wavefront on the next step.
    pub fn assign(&mut self, work_group: usize, wavefronts: &[Wavefront]) -> Result<()> {
        if let Some(running) = self.work_group {
            return Err(SimError::ComputeUnitBusy {
                compute_unit: self.id,
                running,
            });
        }
        self.work_group = Some(work_group);
        self.descriptors = wavefronts.to_vec();
        self.wavefronts = wavefronts.iter().map(|wf| WavefrontState::new(wf.id)).collect();
        self.schedule_cursor = 0;
        Ok(())
    }

    /// Advance the pipeline by one cycle. A finished unit keeps its
    /// work-group until `release`; stepping it again reports the same finish
    /// without advancing.
    pub fn step(&mut self, cycle: u64, env: &mut StepEnv<'_>) -> Result<StepOutcome> {
        let Some(work_group) = self.work_group else {
            return Err(SimError::StepIdleComputeUnit(self.id));
        };
        if self.is_drained() {
            return Ok(StepOutcome::Finished(work_group));
        }

        let plan = self.plan();
        for stage in self.order.stages() {
            match stage {
                Stage::Write => self.write_stage(&plan, cycle, work_group, env),
                Stage::Execute => self.execute_stage(&plan, cycle, work_group, env)?,
                Stage::Read | Stage::Decode | Stage::Fetch => {
                    self.transfer_stage(stage, &plan, cycle, work_group, env)?
                }
                Stage::Schedule => self.schedule_stage(&plan, cycle, work_group, env)?,
            }
        }
        self.commit()?;
        self.stats.busy_cycles += 1;

        if self.is_drained() {
            Ok(StepOutcome::Finished(work_group))
        } else {
            Ok(StepOutcome::Running)
        }
    }

    /// Drop a finished work-group. Returns `None` if the unit holds no
    /// work-group or its pipeline has not drained yet.
    pub fn release(&mut self) -> Option<usize> {
        if !self.is_drained() {
            return None;
        }
        let work_group = self.work_group.take()?;
        self.descriptors.clear();
        self.wavefronts.clear();
        self.stream_cores.iter_mut().for_each(StreamCore::idle);
        self.stats.work_groups_completed += 1;
        Some(work_group)
    }

    // -----------------------------------------------------------------------
    // Phase 1: plan
    // -----------------------------------------------------------------------

    /// Back-pressure is resolved from the last stage to the first: a stage
    /// fires if its input is latched and its output latch is free or being
    /// drained this cycle.
    fn plan(&self) -> CyclePlan {
        let w = Stage::Write.index();
        let e = Stage::Execute.index();
        let mut fires = [false; NUM_STAGES];

        fires[w] = self.latches[w - 1].is_occupied();
        let execute_can_emit = !self.latches[e].is_occupied() || fires[w];
        fires[e] = self.latches[e - 1].is_occupied() && self.execute.is_none();

        for stage in [Stage::Read, Stage::Decode, Stage::Fetch] {
            let k = stage.index();
            let out_free = !self.latches[k].is_occupied() || fires[k + 1];
            fires[k] = self.latches[k - 1].is_occupied() && out_free;
        }

        let out_free = !self.latches[0].is_occupied() || fires[Stage::Fetch.index()];
        let issue = if out_free { self.next_issuable() } else { None };
        fires[Stage::Schedule.index()] = issue.is_some();

        CyclePlan {
            fires,
            execute_can_emit,
            issue,
        }
    }

    /// Round-robin from the cursor over wavefronts with nothing in flight.
    fn next_issuable(&self) -> Option<usize> {
        let n = self.wavefronts.len();
        (0..n)
            .map(|i| (self.schedule_cursor + i) % n)
            .find(|&i| self.wavefronts[i].is_issuable())
    }

    // -----------------------------------------------------------------------
    // Phase 2: stages
    // -----------------------------------------------------------------------

    fn write_stage(&mut self, plan: &CyclePlan, cycle: u64, wg: usize, env: &mut StepEnv<'_>) {
        let k = Stage::Write.index();
        if !plan.fires[k] {
            return;
        }
        let Some(slot) = self.latches[k - 1].take() else {
            return;
        };
        let event = TraceEvent::new(cycle, self.id, wg, Action::Consume)
            .at_stage(Stage::Write, slot.wavefront);
        emit(env, event.clone().produced_at(slot.produced_at));

        let retired = match &slot.inst {
            Some(inst) => env.isa.write(&self.descriptors[slot.local], inst),
            None => false,
        };
        self.updates.push(WaveUpdate::Written {
            local: slot.local,
            next_pc: slot.pc + 1,
            retired,
        });
        self.stats.instructions_retired += 1;
        if retired {
            emit(env, TraceEvent { action: Action::Retire, ..event });
        }
    }

    fn execute_stage(
        &mut self,
        plan: &CyclePlan,
        cycle: u64,
        wg: usize,
        env: &mut StepEnv<'_>,
    ) -> Result<()> {
        let k = Stage::Execute.index();
        let lanes = self.stream_cores.len();

        if plan.fires[k] {
            if let Some(slot) = self.latches[k - 1].take() {
                emit(
                    env,
                    TraceEvent::new(cycle, self.id, wg, Action::Consume)
                        .at_stage(Stage::Execute, slot.wavefront)
                        .produced_at(slot.produced_at),
                );
                let num_subs = self.descriptors[slot.local].num_subwavefronts(lanes);
                self.execute = Some(InExecute {
                    slot,
                    next_sub: 0,
                    num_subs,
                    ready_at: cycle,
                });
            }
        }

        let Some(mut ex) = self.execute.take() else {
            self.stream_cores.iter_mut().for_each(StreamCore::idle);
            return Ok(());
        };

        if ex.next_sub < ex.num_subs {
            let desc = &self.descriptors[ex.slot.local];
            let items = desc.subwavefront(ex.next_sub, lanes);
            let kind = ex.slot.inst.as_ref().map_or(InstKind::Alu, |i| i.kind);
            let active = (items.end - items.start) as usize;

            for (lane, local_id) in self.stream_cores.iter_mut().zip(items.clone()) {
                lane.issue(LaneWork {
                    wavefront: desc.id,
                    work_item: desc.global_id(local_id),
                    kind,
                    cycle,
                });
            }
            self.stream_cores[active..].iter_mut().for_each(StreamCore::idle);

            if let Some(inst) = &ex.slot.inst {
                if let Some(request) = env.isa.execute(desc, inst, items) {
                    ex.ready_at = ex.ready_at.max(env.memory.access(&request, cycle));
                    self.stats.memory_requests += 1;
                    emit(
                        env,
                        TraceEvent::new(cycle, self.id, wg, Action::MemoryIssue)
                            .at_stage(Stage::Execute, ex.slot.wavefront),
                    );
                }
            }
            ex.next_sub += 1;
        } else {
            self.stream_cores.iter_mut().for_each(StreamCore::idle);
        }

        if ex.next_sub < ex.num_subs || cycle < ex.ready_at || !plan.execute_can_emit {
            self.execute = Some(ex);
            return Ok(());
        }

        let mut slot = ex.slot;
        slot.produced_at = cycle;
        emit(
            env,
            TraceEvent::new(cycle, self.id, wg, Action::Produce).at_stage(Stage::Execute, slot.wavefront),
        );
        self.latches[k].push(slot).map_err(|_| SimError::LatchOverrun {
            compute_unit: self.id,
            stage: Stage::Execute.name(),
        })
    }

    /// Fetch, decode and read: single-cycle stages moving a slot one latch on.
    fn transfer_stage(
        &mut self,
        stage: Stage,
        plan: &CyclePlan,
        cycle: u64,
        wg: usize,
        env: &mut StepEnv<'_>,
    ) -> Result<()> {
        let k = stage.index();
        if !plan.fires[k] {
            return Ok(());
        }
        let Some(mut slot) = self.latches[k - 1].take() else {
            return Ok(());
        };
        emit(
            env,
            TraceEvent::new(cycle, self.id, wg, Action::Consume)
                .at_stage(stage, slot.wavefront)
                .produced_at(slot.produced_at),
        );

        match stage {
            Stage::Fetch => {
                slot.inst = Some(env.isa.fetch(&self.descriptors[slot.local], slot.pc));
            }
            Stage::Decode => {
                if let Some(inst) = slot.inst.as_mut() {
                    env.isa.decode(inst);
                }
            }
            _ => {}
        }

        slot.produced_at = cycle;
        emit(
            env,
            TraceEvent::new(cycle, self.id, wg, Action::Produce).at_stage(stage, slot.wavefront),
        );
        self.latches[k].push(slot).map_err(|_| SimError::LatchOverrun {
            compute_unit: self.id,
            stage: stage.name(),
        })
    }

    fn schedule_stage(
        &mut self,
        plan: &CyclePlan,
        cycle: u64,
        wg: usize,
        env: &mut StepEnv<'_>,
    ) -> Result<()> {
        let Some(local) = plan.issue else {
            return Ok(());
        };
        let state = &self.wavefronts[local];
        let slot = Slot {
            wavefront: state.id,
            local,
            pc: state.pc,
            inst: None,
            produced_at: cycle,
        };
        self.schedule_cursor = (local + 1) % self.wavefronts.len();
        self.updates.push(WaveUpdate::Issued(local));
        emit(
            env,
            TraceEvent::new(cycle, self.id, wg, Action::Produce).at_stage(Stage::Schedule, slot.wavefront),
        );
        self.latches[0].push(slot).map_err(|_| SimError::LatchOverrun {
            compute_unit: self.id,
            stage: Stage::Schedule.name(),
        })
    }

    // -----------------------------------------------------------------------
    // Phase 3: commit
    // -----------------------------------------------------------------------

    fn commit(&mut self) -> Result<()> {
        for (i, latch) in self.latches.iter_mut().enumerate() {
            if !latch.commit() {
                return Err(SimError::LatchOverrun {
                    compute_unit: self.id,
                    stage: Stage::ALL[i].name(),
                });
            }
        }
        for update in self.updates.drain(..) {
            match update {
                WaveUpdate::Issued(local) => self.wavefronts[local].in_flight = true,
                WaveUpdate::Written { local, next_pc, retired } => {
                    let wf = &mut self.wavefronts[local];
                    wf.in_flight = false;
                    wf.pc = next_pc;
                    wf.retired |= retired;
                }
            }
        }
        Ok(())
    }

    fn is_drained(&self) -> bool {
        self.execute.is_none()
            && self.latches.iter().all(Latch::is_empty)
            && self.wavefronts.iter().all(|wf| wf.retired)
    }
}

fn emit(env: &mut StepEnv<'_>, event: TraceEvent) {
    trace!(
        cycle = event.cycle,
        compute_unit = event.compute_unit,
        work_group = event.work_group,
        stage = ?event.stage,
        action = ?event.action,
        "pipeline"
    );
    if env.trace.wants_stage_events() {
        env.trace.record(&event);
    }
}
