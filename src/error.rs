/// Error types for the simulator.
///
/// Contract violations indicate a scheduler or driver bug. They halt the run
/// at the point of detection and are never retried.
use thiserror::Error;

use crate::ndrange::WorkGroupStatus;

pub type Result<T> = std::result::Result<T, SimError>;

#[derive(Debug, Error)]
pub enum SimError {
    // ------------------------------------------------------------------
    // Contract violations
    // ------------------------------------------------------------------
    /// A compute unit with no assigned work-group was asked to advance.
    #[error("compute unit {0} stepped while idle")]
    StepIdleComputeUnit(usize),

    /// `take_next_pending` called on an empty pending sequence.
    #[error("no pending work-group in ndrange {0}")]
    NoPendingWorkGroup(u32),

    /// A second work-group was assigned to a compute unit that already holds one.
    #[error("compute unit {compute_unit} already runs work-group {running}")]
    ComputeUnitBusy { compute_unit: usize, running: usize },

    #[error("work-group {work_group}: invalid status transition {from} -> {to}")]
    InvalidTransition {
        work_group: usize,
        from: WorkGroupStatus,
        to: WorkGroupStatus,
    },

    #[error("unknown compute unit {0}")]
    UnknownComputeUnit(usize),

    #[error("unknown work-group {0}")]
    UnknownWorkGroup(usize),

    /// The device still has work from another ndrange in flight.
    #[error("ndrange {active} still in flight, cannot run ndrange {requested}")]
    NdRangeInFlight { active: u32, requested: u32 },

    /// A stage wrote a latch whose committed value nobody drained.
    #[error("compute unit {compute_unit}: latch after {stage} overrun")]
    LatchOverrun { compute_unit: usize, stage: &'static str },

    // ------------------------------------------------------------------
    // Configuration and resource exhaustion
    // ------------------------------------------------------------------
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid ndrange: {0}")]
    InvalidNdRange(String),

    #[error("work-group size {requested} exceeds device maximum {max}")]
    WorkGroupTooLarge { requested: u32, max: u32 },

    // ------------------------------------------------------------------
    // Ambient
    // ------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SimError {
    /// True for errors that indicate a bug in the scheduler or its driver.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            SimError::StepIdleComputeUnit(_)
                | SimError::NoPendingWorkGroup(_)
                | SimError::ComputeUnitBusy { .. }
                | SimError::InvalidTransition { .. }
                | SimError::UnknownComputeUnit(_)
                | SimError::UnknownWorkGroup(_)
                | SimError::NdRangeInFlight { .. }
                | SimError::LatchOverrun { .. }
        )
    }
}
