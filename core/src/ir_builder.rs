use crate::context::Context;
use crate::op::{Arg, InstIdx};
use crate::opcode::Opcode;
use crate::state::{gpr_offset, PC_OFFSET};
use crate::types::{Cond, MemSize};

impl Context {
    // -- Internal helpers --

    fn emit_value(&mut self, opc: Opcode, args: &[Arg], aux: u32) -> Arg {
        Arg::Value(self.emit(opc, args, aux))
    }

    /// Emit a binary op, folding constants and trivial identities.
    fn emit_binary(&mut self, opc: Opcode, a: Arg, b: Arg) -> Arg {
        if let (Arg::Imm(x), Arg::Imm(y)) = (a, b) {
            if let Some(v) = opc.fold(x, y) {
                return Arg::Imm(v);
            }
        }
        // Commutative: keep the immediate in the second slot.
        let (a, b) = match (a, b) {
            (Arg::Imm(_), Arg::Value(_)) if opc.def().flags.contains(crate::OpFlags::COMMUTATIVE) => {
                (b, a)
            }
            _ => (a, b),
        };
        if let Arg::Imm(y) = b {
            match (opc, y) {
                (Opcode::Add | Opcode::Sub | Opcode::Or | Opcode::Xor, 0) => return a,
                (Opcode::Shl | Opcode::Shr | Opcode::Sar | Opcode::RotL, n) if n & 31 == 0 => {
                    return a
                }
                (Opcode::Mul, 1) | (Opcode::And, u32::MAX) => return a,
                (Opcode::Mul | Opcode::And, 0) => return Arg::Imm(0),
                _ => {}
            }
        }
        self.emit_value(opc, &[a, b], 0)
    }

    // -- Markers --

    /// Mark the start of the guest instruction at `pc`.
    pub fn gen_insn_start(&mut self, pc: u32) -> InstIdx {
        self.cur_pc = pc;
        self.num_guest_insns += 1;
        self.emit(Opcode::InsnStart, &[], pc)
    }

    // -- Guest state --

    /// Load a 32-bit guest state field. Reuses the value last loaded
    /// from or stored to the same field in this block.
    pub fn gen_load_state(&mut self, off: u32) -> Arg {
        if let Some(&v) = self.state_cache.get(&off) {
            return v;
        }
        let v = self.emit_value(Opcode::LoadState, &[], off);
        self.state_cache.insert(off, v);
        v
    }

    /// Store to a guest state field. Stores are written through
    /// immediately; the value is remembered for later loads.
    pub fn gen_store_state(&mut self, off: u32, v: Arg) {
        self.emit(Opcode::StoreState, &[v], off);
        self.state_cache.insert(off, v);
    }

    pub fn gen_load_gpr(&mut self, n: usize) -> Arg {
        self.gen_load_state(gpr_offset(n))
    }

    pub fn gen_store_gpr(&mut self, n: usize, v: Arg) {
        self.gen_store_state(gpr_offset(n), v)
    }

    /// Copy a value into a fresh IR value.
    pub fn gen_mov(&mut self, v: Arg) -> Arg {
        self.emit_value(Opcode::Mov, &[v], 0)
    }

    // -- Binary ALU --

    pub fn gen_add(&mut self, a: Arg, b: Arg) -> Arg {
        self.emit_binary(Opcode::Add, a, b)
    }

    pub fn gen_sub(&mut self, a: Arg, b: Arg) -> Arg {
        self.emit_binary(Opcode::Sub, a, b)
    }

    pub fn gen_mul(&mut self, a: Arg, b: Arg) -> Arg {
        self.emit_binary(Opcode::Mul, a, b)
    }

    pub fn gen_and(&mut self, a: Arg, b: Arg) -> Arg {
        self.emit_binary(Opcode::And, a, b)
    }

    pub fn gen_or(&mut self, a: Arg, b: Arg) -> Arg {
        self.emit_binary(Opcode::Or, a, b)
    }

    pub fn gen_xor(&mut self, a: Arg, b: Arg) -> Arg {
        self.emit_binary(Opcode::Xor, a, b)
    }

    pub fn gen_shl(&mut self, a: Arg, b: Arg) -> Arg {
        self.emit_binary(Opcode::Shl, a, b)
    }

    pub fn gen_shr(&mut self, a: Arg, b: Arg) -> Arg {
        self.emit_binary(Opcode::Shr, a, b)
    }

    pub fn gen_sar(&mut self, a: Arg, b: Arg) -> Arg {
        self.emit_binary(Opcode::Sar, a, b)
    }

    pub fn gen_rotl(&mut self, a: Arg, b: Arg) -> Arg {
        self.emit_binary(Opcode::RotL, a, b)
    }

    // -- Unary ALU --

    pub fn gen_not(&mut self, a: Arg) -> Arg {
        match a {
            Arg::Imm(x) => Arg::Imm(!x),
            _ => self.emit_value(Opcode::Not, &[a], 0),
        }
    }

    pub fn gen_neg(&mut self, a: Arg) -> Arg {
        match a {
            Arg::Imm(x) => Arg::Imm(x.wrapping_neg()),
            _ => self.emit_value(Opcode::Neg, &[a], 0),
        }
    }

    /// `cond(a, b) ? 1 : 0`.
    pub fn gen_setcond(&mut self, cond: Cond, a: Arg, b: Arg) -> Arg {
        match (a, b) {
            (Arg::Imm(x), Arg::Imm(y)) => Arg::Imm(cond.eval(x, y) as u32),
            (Arg::Imm(_), Arg::Value(_)) => {
                self.emit_value(Opcode::SetCond, &[b, a], cond.swap() as u32)
            }
            _ => self.emit_value(Opcode::SetCond, &[a, b], cond as u32),
        }
    }

    // -- Guest memory --

    pub fn gen_load(&mut self, size: MemSize, addr: Arg) -> Arg {
        let opc = match size {
            MemSize::U8 => Opcode::Load8,
            MemSize::U16 => Opcode::Load16,
            MemSize::U32 => Opcode::Load32,
        };
        self.emit_value(opc, &[addr], 0)
    }

    pub fn gen_store(&mut self, size: MemSize, addr: Arg, v: Arg) {
        let opc = match size {
            MemSize::U8 => Opcode::Store8,
            MemSize::U16 => Opcode::Store16,
            MemSize::U32 => Opcode::Store32,
        };
        self.emit(opc, &[addr, v], 0);
    }

    // -- Interpreter fallback --

    /// Run the raw instruction `word` through the interpreter.
    ///
    /// Stores the current pc first; the interpreter may rewrite any
    /// guest state, so the forwarding cache is dropped.
    pub fn gen_call_interp(&mut self, word: u32) {
        let pc = self.cur_pc;
        self.emit(Opcode::StoreState, &[Arg::Imm(pc)], PC_OFFSET);
        self.emit(Opcode::CallInterp, &[], word);
        self.state_cache.clear();
    }

    // -- Exits --

    /// Leave the block for the static guest address `target`.
    pub fn gen_exit(&mut self, target: u32) {
        self.emit(Opcode::Exit, &[], target);
    }

    /// Leave the block for `target` when `cond` is nonzero.
    pub fn gen_exit_if(&mut self, cond: Arg, target: u32) {
        match cond {
            Arg::Imm(0) => {}
            Arg::Imm(_) => self.gen_exit(target),
            _ => {
                self.emit(Opcode::ExitIf, &[cond], target);
            }
        }
    }

    /// Leave the block for the guest address held in `target`.
    pub fn gen_exit_dyn(&mut self, target: Arg) {
        match target {
            Arg::Imm(t) => self.gen_exit(t),
            _ => {
                self.emit(Opcode::ExitDyn, &[target], 0);
            }
        }
    }
}
