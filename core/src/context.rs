use std::collections::HashMap;

use crate::op::{Arg, Inst, InstIdx};
use crate::opcode::Opcode;

/// Maximum number of guest instructions per block.
pub const MAX_INSNS: usize = 512;

/// Translation context for one block.
///
/// Holds the IR instruction list built by the frontend and the
/// per-block guest state forwarding cache used by the builder.
/// Reused across translations via [`Context::reset`].
pub struct Context {
    insts: Vec<Inst>,

    /// Guest state offset -> value most recently loaded from or
    /// stored to that offset in this block.
    pub(crate) state_cache: HashMap<u32, Arg>,

    /// Guest pc of the most recent `insn_start`.
    pub(crate) cur_pc: u32,

    /// Number of guest instructions lowered so far.
    pub num_guest_insns: u32,
}

impl Context {
    pub fn new() -> Self {
        Self {
            insts: Vec::with_capacity(1024),
            state_cache: HashMap::new(),
            cur_pc: 0,
            num_guest_insns: 0,
        }
    }

    /// Reset for translating a new block.
    pub fn reset(&mut self) {
        self.insts.clear();
        self.state_cache.clear();
        self.cur_pc = 0;
        self.num_guest_insns = 0;
    }

    // -- Instruction emission --

    /// Append an instruction and return the index naming its result.
    pub fn emit(&mut self, opc: Opcode, args: &[Arg], aux: u32) -> InstIdx {
        let idx = InstIdx(self.insts.len() as u32);
        debug_assert!(
            args.iter()
                .all(|a| a.value().map_or(true, |v| v < idx)),
            "IR operands must refer to earlier instructions"
        );
        self.insts.push(Inst::new(idx, opc, args, aux));
        idx
    }

    pub fn next_inst_idx(&self) -> InstIdx {
        InstIdx(self.insts.len() as u32)
    }

    pub fn inst(&self, idx: InstIdx) -> &Inst {
        &self.insts[idx.index()]
    }

    pub fn inst_mut(&mut self, idx: InstIdx) -> &mut Inst {
        &mut self.insts[idx.index()]
    }

    pub fn insts(&self) -> &[Inst] {
        &self.insts
    }

    pub fn insts_mut(&mut self) -> &mut [Inst] {
        &mut self.insts
    }

    pub fn num_insts(&self) -> usize {
        self.insts.len()
    }

    /// Guest pc of the instruction currently being lowered.
    pub fn current_pc(&self) -> u32 {
        self.cur_pc
    }

    /// Whether the block already ends in an unconditional exit.
    pub fn is_terminated(&self) -> bool {
        self.insts
            .last()
            .is_some_and(|i| i.opc.def().flags.contains(crate::OpFlags::BB_END))
    }

    /// Clear liveness and allocation results so the passes can run again.
    pub fn reset_life(&mut self) {
        for inst in &mut self.insts {
            inst.reset_life();
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
