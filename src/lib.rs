pub mod compute_unit;
pub mod config;
pub mod device;
pub mod error;
pub mod isa;
pub mod memory;
pub mod metrics;
pub mod ndrange;
pub mod pipeline;
pub mod pool;
pub mod scheduler;
pub mod stream_core;
pub mod trace;
pub mod wavefront;

pub use device::{Device, RunOutcome, RunStats};
pub use error::{Result, SimError};
pub use ndrange::{Dim3, NDRange, WorkGroupStatus};
