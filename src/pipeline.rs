/// Pipeline stages and the latches between them.
///
/// A compute unit's pipeline has six stages. Each latch is double-buffered:
/// stages read `current` (committed at the end of the previous cycle) and
/// write `next`; `commit` publishes `next` once every stage has run. A value
/// produced in cycle t can therefore only be consumed in cycle t+1,
/// whatever order the stages are evaluated in.
use serde::{Deserialize, Serialize};

use crate::isa::Instruction;

pub const NUM_STAGES: usize = 6;
/// Latches sit between consecutive stages; Write has no output latch.
pub const NUM_LATCHES: usize = NUM_STAGES - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Schedule,
    Fetch,
    Decode,
    Read,
    Execute,
    Write,
}

impl Stage {
    pub const ALL: [Stage; NUM_STAGES] = [
        Stage::Schedule,
        Stage::Fetch,
        Stage::Decode,
        Stage::Read,
        Stage::Execute,
        Stage::Write,
    ];

    pub const REVERSE: [Stage; NUM_STAGES] = [
        Stage::Write,
        Stage::Execute,
        Stage::Read,
        Stage::Decode,
        Stage::Fetch,
        Stage::Schedule,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Stage::Schedule => "schedule",
            Stage::Fetch    => "fetch",
            Stage::Decode   => "decode",
            Stage::Read     => "read",
            Stage::Execute  => "execute",
            Stage::Write    => "write",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Order in which stages are invoked within one cycle. With double-buffered
/// latches both orders give identical results; `Reverse` mirrors a hardware
/// pipeline drained from the back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StageOrder {
    #[default]
    Reverse,
    Forward,
}

impl StageOrder {
    pub fn stages(self) -> [Stage; NUM_STAGES] {
        match self {
            StageOrder::Reverse => Stage::REVERSE,
            StageOrder::Forward => Stage::ALL,
        }
    }
}

/// One in-flight instruction of one wavefront.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    /// Index into the NDRange's wavefront table
    pub wavefront: usize,
    /// Index into the compute unit's wavefront state
    pub local: usize,
    pub pc: u32,
    /// Filled in by the fetch stage
    pub inst: Option<Instruction>,
    /// Cycle in which the slot was last written into a latch
    pub produced_at: u64,
}

/// Double-buffered single-entry latch.
#[derive(Debug, Clone)]
pub struct Latch<T> {
    current: Option<T>,
    next: Option<T>,
}

impl<T> Default for Latch<T> {
    fn default() -> Self {
        Latch { current: None, next: None }
    }
}

impl<T> Latch<T> {
    /// Holds a committed value.
    pub fn is_occupied(&self) -> bool {
        self.current.is_some()
    }

    /// Neither a committed nor a pending value.
    pub fn is_empty(&self) -> bool {
        self.current.is_none() && self.next.is_none()
    }

    pub fn peek(&self) -> Option<&T> {
        self.current.as_ref()
    }

    /// Consume the committed value.
    pub fn take(&mut self) -> Option<T> {
        self.current.take()
    }

    /// Stage a value for the next cycle. Fails if one is already staged.
    pub fn push(&mut self, value: T) -> Result<(), T> {
        if self.next.is_some() {
            return Err(value);
        }
        self.next = Some(value);
        Ok(())
    }

    /// Publish the staged value. Returns false if the committed value was
    /// never consumed and a new one was staged on top of it.
    pub fn commit(&mut self) -> bool {
        match (self.current.is_some(), self.next.take()) {
            (true, Some(v)) => {
                self.next = Some(v);
                false
            }
            (_, Some(v)) => {
                self.current = Some(v);
                true
            }
            (_, None) => true,
        }
    }
}
