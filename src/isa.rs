/// Instruction-execution interface used by the pipeline stages.
///
/// The pipeline only decides *when* each stage runs; *what* an instruction
/// does is delegated to an `InstructionModel`. `SyntheticProgram` is the
/// reference model: every wavefront runs the same straight-line program.
use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::memory::{AccessKind, MemoryRequest};
use crate::wavefront::Wavefront;

/// Bytes per work-item touched by a load or store.
pub const WORD_SIZE: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstKind {
    Alu,
    Load,
    Store,
    /// Retires the wavefront when it reaches the write stage
    End,
}

impl std::fmt::Display for InstKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstKind::Alu   => write!(f, "alu"),
            InstKind::Load  => write!(f, "load"),
            InstKind::Store => write!(f, "store"),
            InstKind::End   => write!(f, "end"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub pc: u32,
    pub kind: InstKind,
    pub decoded: bool,
}

impl Instruction {
    pub fn new(pc: u32, kind: InstKind) -> Self {
        Instruction { pc, kind, decoded: false }
    }
}

/// Instruction-level semantics, called once per relevant stage per cycle.
/// Implementations must not block.
pub trait InstructionModel {
    /// Instruction at `pc` of `wavefront`'s program.
    fn fetch(&mut self, wavefront: &Wavefront, pc: u32) -> Instruction;

    fn decode(&mut self, inst: &mut Instruction) {
        inst.decoded = true;
    }

    /// Execute one sub-wavefront. Memory instructions return the request
    /// covering the given work-items.
    fn execute(
        &mut self,
        wavefront: &Wavefront,
        inst: &Instruction,
        work_items: Range<u32>,
    ) -> Option<MemoryRequest>;

    /// Commit results. Returns true once the wavefront has retired.
    fn write(&mut self, wavefront: &Wavefront, inst: &Instruction) -> bool {
        let _ = wavefront;
        inst.kind == InstKind::End
    }

    fn name(&self) -> &str;
}

/// Straight-line program shared by every wavefront, followed by an implicit `End`.
#[derive(Debug, Clone)]
pub struct SyntheticProgram {
    pub program: Vec<InstKind>,
    /// Base address of the buffer loads and stores index into
    pub base_addr: u64,
}

impl SyntheticProgram {
    pub fn new(program: Vec<InstKind>) -> Self {
        // An explicit End inside the program would truncate it
        let program = program.into_iter().take_while(|k| *k != InstKind::End).collect();
        SyntheticProgram { program, base_addr: 0 }
    }

    pub fn with_base_addr(mut self, base_addr: u64) -> Self {
        self.base_addr = base_addr;
        self
    }

    /// Instructions each wavefront executes, including the final `End`.
    pub fn len_with_end(&self) -> usize {
        self.program.len() + 1
    }
}

impl InstructionModel for SyntheticProgram {
    fn fetch(&mut self, _wavefront: &Wavefront, pc: u32) -> Instruction {
        let kind = self.program.get(pc as usize).copied().unwrap_or(InstKind::End);
        Instruction::new(pc, kind)
    }

    fn execute(
        &mut self,
        wavefront: &Wavefront,
        inst: &Instruction,
        work_items: Range<u32>,
    ) -> Option<MemoryRequest> {
        let kind = match inst.kind {
            InstKind::Load => AccessKind::Load,
            InstKind::Store => AccessKind::Store,
            _ => return None,
        };
        if work_items.is_empty() {
            return None;
        }
        let first = wavefront.global_id(work_items.start) as u64;
        Some(MemoryRequest {
            addr: self.base_addr + first * WORD_SIZE as u64,
            bytes: (work_items.end - work_items.start) * WORD_SIZE,
            kind,
        })
    }

    fn name(&self) -> &str {
        "synthetic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wavefront() -> Wavefront {
        Wavefront {
            id: 1,
            work_group_id: 0,
            work_items: 64..128,
            work_item_base: 256,
        }
    }

    #[test]
    fn fetch_past_program_end_yields_end() {
        let mut prog = SyntheticProgram::new(vec![InstKind::Alu, InstKind::Load]);
        let wf = wavefront();
        assert_eq!(prog.fetch(&wf, 0).kind, InstKind::Alu);
        assert_eq!(prog.fetch(&wf, 1).kind, InstKind::Load);
        assert_eq!(prog.fetch(&wf, 2).kind, InstKind::End);
        assert_eq!(prog.len_with_end(), 3);
    }

    #[test]
    fn explicit_end_truncates_program() {
        let prog = SyntheticProgram::new(vec![InstKind::Alu, InstKind::End, InstKind::Store]);
        assert_eq!(prog.program, vec![InstKind::Alu]);
    }

    #[test]
    fn memory_instructions_address_by_global_work_item() {
        let mut prog = SyntheticProgram::new(vec![InstKind::Store]).with_base_addr(0x1000);
        let wf = wavefront();
        let inst = prog.fetch(&wf, 0);
        let req = prog.execute(&wf, &inst, 80..96).unwrap();
        assert_eq!(req.addr, 0x1000 + (256 + 80) * 4);
        assert_eq!(req.bytes, 64);
        assert_eq!(req.kind, AccessKind::Store);

        let alu = Instruction::new(0, InstKind::Alu);
        assert!(prog.execute(&wf, &alu, 64..80).is_none());
    }

    #[test]
    fn write_retires_on_end_only() {
        let mut prog = SyntheticProgram::new(vec![InstKind::Alu]);
        let wf = wavefront();
        assert!(!prog.write(&wf, &Instruction::new(0, InstKind::Alu)));
        assert!(prog.write(&wf, &Instruction::new(1, InstKind::End)));
    }
}
