use dbt_core::state::{DOWNCOUNT_OFFSET, EXCEPTIONS_OFFSET, FALLBACKS_OFFSET, PC_OFFSET};
use dbt_core::{Cond, Inst, Location, MemSize, Opcode, RegSet};

use crate::code_region::CodeRegion;
use crate::operand::{HostReg, Operand, Width};
use crate::x86_64::emitter::*;
use crate::x86_64::regs::{
    env_field, spill_slot, Reg, ALLOC_ORDER, CALLEE_SAVED, CALLER_SAVED, CALL_ARG_REGS, ENV_REG,
    SCRATCH0, SCRATCH1, SPILL_SLOTS, STACK_ADDEND,
};
use crate::{ExitSite, HostCodeGen, OpEnv};

const ALLOC_ORDER_U8: [HostReg; ALLOC_ORDER.len()] = {
    let mut out = [0u8; ALLOC_ORDER.len()];
    let mut i = 0;
    while i < ALLOC_ORDER.len() {
        out[i] = ALLOC_ORDER[i] as u8;
        i += 1;
    }
    out
};

const W: Width = Width::W32;

/// x86-64 backend code generator.
///
/// The trampoline entered by the dispatcher has the signature
/// `extern "C" fn(state: *mut GuestState, entry: *const u8) -> u32`.
pub struct X86_64CodeGen {
    pub prologue_offset: usize,
    /// Dispatcher return path: returns 0 to the dispatcher.
    pub ret_offset: usize,
}

impl X86_64CodeGen {
    pub fn new() -> Self {
        Self {
            prologue_offset: 0,
            ret_offset: 0,
        }
    }

    /// `jle ret; cmp [exceptions], 0; jne ret`, shared by the checked
    /// entry and every exit stub. Flags must reflect the downcount.
    fn emit_budget_and_exception_test(&self, e: &mut X64Emitter<'_>) {
        e.jcc(X86Cond::Jle, self.ret_offset);
        e.alu(ArithOp::Cmp, W, env_field(EXCEPTIONS_OFFSET), Operand::imm32(0));
        e.jcc(X86Cond::Jne, self.ret_offset);
    }

    /// Store a guest pc held in any operand kind.
    fn store_pc(e: &mut X64Emitter<'_>, target: Operand) {
        match target {
            Operand::Reg(_) | Operand::Imm { .. } => e.mov(W, env_field(PC_OFFSET), target),
            _ => {
                e.mov(W, SCRATCH0.op(), target);
                e.mov(W, env_field(PC_OFFSET), SCRATCH0.op());
            }
        }
    }

    fn charge(e: &mut X64Emitter<'_>, cycles: u32) {
        e.alu(ArithOp::Sub, W, env_field(DOWNCOUNT_OFFSET), Operand::imm32(cycles));
    }

    /// Two-address binary ALU: `out = a op b`.
    fn binary(e: &mut X64Emitter<'_>, op: ArithOp, out: HostReg, a: Operand, b: Operand) {
        if a != Operand::Reg(out) {
            e.mov(W, Operand::Reg(out), a);
        }
        e.alu(op, W, Operand::Reg(out), b);
    }

    fn shift(e: &mut X64Emitter<'_>, op: ShiftOp, out: HostReg, a: Operand, b: Operand) {
        match b {
            Operand::Imm { value, .. } => {
                if a != Operand::Reg(out) {
                    e.mov(W, Operand::Reg(out), a);
                }
                let n = (value & 31) as u8;
                if n != 0 {
                    e.shift(op, W, Operand::Reg(out), Some(n));
                }
            }
            _ => {
                // Amount goes to CL before `out` is written.
                e.mov(W, SCRATCH1.op(), b);
                if a != Operand::Reg(out) {
                    e.mov(W, Operand::Reg(out), a);
                }
                e.shift(op, W, Operand::Reg(out), None);
            }
        }
    }

    fn setcond(e: &mut X64Emitter<'_>, cond: Cond, out: HostReg, a: Operand, b: Operand) {
        let lhs = match a {
            Operand::Reg(_) => a,
            _ if b.is_mem() || matches!(a, Operand::Imm { .. }) => {
                e.mov(W, SCRATCH0.op(), a);
                SCRATCH0.op()
            }
            _ => a,
        };
        e.alu(ArithOp::Cmp, W, lhs, b);
        e.setcc(X86Cond::from_cond(cond), Operand::Reg(out));
        e.movzx(Width::W8, out, Operand::Reg(out));
    }

    fn mem_size(opc: Opcode) -> MemSize {
        match opc {
            Opcode::Load8 | Opcode::Store8 => MemSize::U8,
            Opcode::Load16 | Opcode::Store16 => MemSize::U16,
            _ => MemSize::U32,
        }
    }
}

impl Default for X86_64CodeGen {
    fn default() -> Self {
        Self::new()
    }
}

impl HostCodeGen for X86_64CodeGen {
    fn emit_prologue(&mut self, buf: &mut CodeRegion) {
        let mut e = X64Emitter::new(buf);
        self.prologue_offset = e.offset();
        for &reg in CALLEE_SAVED {
            e.push(reg);
        }
        // mov rbp, rdi (guest state)
        e.mov(Width::W64, ENV_REG.op(), CALL_ARG_REGS[0].op());
        e.alu(
            ArithOp::Sub,
            Width::W64,
            Reg::Rsp.op(),
            Operand::imm32(STACK_ADDEND as u32),
        );
        // jmp *rsi (block entry)
        e.jmp_reg(CALL_ARG_REGS[1]);
    }

    fn emit_epilogue(&mut self, buf: &mut CodeRegion) {
        let mut e = X64Emitter::new(buf);
        self.ret_offset = e.offset();
        e.mov(W, SCRATCH0.op(), Operand::imm32(0));
        e.alu(
            ArithOp::Add,
            Width::W64,
            Reg::Rsp.op(),
            Operand::imm32(STACK_ADDEND as u32),
        );
        for &reg in CALLEE_SAVED.iter().rev() {
            e.pop(reg);
        }
        e.ret();
    }

    fn prologue_offset(&self) -> usize {
        self.prologue_offset
    }

    fn epilogue_offset(&self) -> usize {
        self.ret_offset
    }

    fn patch_jump(&self, buf: &mut CodeRegion, jump_offset: usize, target_offset: usize) {
        patch_jmp_rel32(buf, jump_offset, target_offset);
    }

    fn emit_block_entry(&self, buf: &mut CodeRegion) -> (usize, usize) {
        let mut e = X64Emitter::new(buf);
        let checked = e.offset();
        e.alu(ArithOp::Cmp, W, env_field(DOWNCOUNT_OFFSET), Operand::imm32(0));
        self.emit_budget_and_exception_test(&mut e);
        (checked, e.offset())
    }

    fn emit_exit(&self, buf: &mut CodeRegion, target: u32, cycles: u32) -> usize {
        let mut e = X64Emitter::new(buf);
        e.mov(W, env_field(PC_OFFSET), Operand::imm32(target));
        Self::charge(&mut e, cycles);
        self.emit_budget_and_exception_test(&mut e);
        // Keep the rel32 field 4-byte aligned so a patch is one store.
        e.align(4, 1);
        e.jmp_rel32(self.ret_offset)
    }

    fn emit_exit_dynamic(&self, buf: &mut CodeRegion, target: Operand, cycles: u32) {
        let mut e = X64Emitter::new(buf);
        Self::store_pc(&mut e, target);
        Self::charge(&mut e, cycles);
        e.jmp(self.ret_offset);
    }

    fn alloc_order(&self) -> &'static [HostReg] {
        &ALLOC_ORDER_U8
    }

    fn caller_saved(&self) -> RegSet {
        CALLER_SAVED
    }

    fn spill_slots(&self) -> u32 {
        SPILL_SLOTS as u32
    }

    fn loc_operand(&self, loc: Location) -> Operand {
        match loc {
            Location::Reg(r) => Operand::Reg(r),
            Location::Spill(s) => spill_slot(s),
        }
    }

    fn out_mov(&self, buf: &mut CodeRegion, dst: Operand, src: Operand) {
        if dst == src {
            return;
        }
        let mut e = X64Emitter::new(buf);
        if dst.is_mem() && src.is_mem() {
            e.mov(W, SCRATCH0.op(), src);
            e.mov(W, dst, SCRATCH0.op());
        } else {
            e.mov(W, dst, src);
        }
    }

    fn out_op(
        &self,
        buf: &mut CodeRegion,
        inst: &Inst,
        out: Option<HostReg>,
        args: &[Operand],
        env: &OpEnv<'_>,
    ) -> Option<ExitSite> {
        let mut e = X64Emitter::new(buf);
        let env_ptr = ENV_REG.op();

        match inst.opc {
            Opcode::InsnStart => {}

            Opcode::LoadState => {
                let d = out?;
                e.mov(W, Operand::Reg(d), env_field(inst.aux));
            }
            Opcode::StoreState => {
                let dst = env_field(inst.aux);
                match args[0] {
                    Operand::Reg(_) | Operand::Imm { .. } => e.mov(W, dst, args[0]),
                    src => {
                        e.mov(W, SCRATCH0.op(), src);
                        e.mov(W, dst, SCRATCH0.op());
                    }
                }
            }
            Opcode::Mov => {
                let d = out?;
                if args[0] != Operand::Reg(d) {
                    e.mov(W, Operand::Reg(d), args[0]);
                }
            }

            Opcode::Add => {
                let d = out?;
                match (args[0], args[1]) {
                    // Three-address add through lea.
                    (Operand::Reg(a), Operand::Reg(b)) if a != d => e.lea(
                        W,
                        d,
                        Operand::Sib {
                            base: a,
                            index: b,
                            scale: 1,
                            disp: 0,
                        },
                    ),
                    (Operand::Reg(a), Operand::Imm { value, .. }) if a != d => {
                        e.lea(W, d, Operand::mem(a, value as i32))
                    }
                    (a, b) => Self::binary(&mut e, ArithOp::Add, d, a, b),
                }
            }
            Opcode::Sub => Self::binary(&mut e, ArithOp::Sub, out?, args[0], args[1]),
            Opcode::And => Self::binary(&mut e, ArithOp::And, out?, args[0], args[1]),
            Opcode::Or => Self::binary(&mut e, ArithOp::Or, out?, args[0], args[1]),
            Opcode::Xor => Self::binary(&mut e, ArithOp::Xor, out?, args[0], args[1]),
            Opcode::Mul => {
                let d = out?;
                match args[1] {
                    Operand::Imm { value, .. } => {
                        let src = match args[0] {
                            Operand::Imm { .. } => {
                                e.mov(W, Operand::Reg(d), args[0]);
                                Operand::Reg(d)
                            }
                            a => a,
                        };
                        e.imul_imm(W, d, src, value as i32);
                    }
                    b => {
                        if args[0] != Operand::Reg(d) {
                            e.mov(W, Operand::Reg(d), args[0]);
                        }
                        e.imul(W, d, b);
                    }
                }
            }
            Opcode::Shl => Self::shift(&mut e, ShiftOp::Shl, out?, args[0], args[1]),
            Opcode::Shr => Self::shift(&mut e, ShiftOp::Shr, out?, args[0], args[1]),
            Opcode::Sar => Self::shift(&mut e, ShiftOp::Sar, out?, args[0], args[1]),
            Opcode::RotL => Self::shift(&mut e, ShiftOp::Rol, out?, args[0], args[1]),
            Opcode::Not | Opcode::Neg => {
                let d = out?;
                if args[0] != Operand::Reg(d) {
                    e.mov(W, Operand::Reg(d), args[0]);
                }
                let op = if inst.opc == Opcode::Not {
                    UnaryOp::Not
                } else {
                    UnaryOp::Neg
                };
                e.unary(op, W, Operand::Reg(d));
            }
            Opcode::SetCond => {
                let cond = Cond::from_raw(inst.aux)
                    .unwrap_or_else(|| panic!("bad setcond condition {}", inst.aux));
                Self::setcond(&mut e, cond, out?, args[0], args[1]);
            }

            Opcode::Load8 | Opcode::Load16 | Opcode::Load32 => {
                let helper = env.helpers.read[Self::mem_size(inst.opc) as usize];
                e.call_abs(helper, &[env_ptr, args[0]]);
                if let Some(d) = out {
                    e.mov(W, Operand::Reg(d), SCRATCH0.op());
                }
            }
            Opcode::Store8 | Opcode::Store16 | Opcode::Store32 => {
                let helper = env.helpers.write[Self::mem_size(inst.opc) as usize];
                e.call_abs(helper, &[env_ptr, args[0], args[1]]);
            }
            Opcode::CallInterp => {
                e.alu(ArithOp::Add, W, env_field(FALLBACKS_OFFSET), Operand::imm32(1));
                e.call_abs(env.helpers.interp, &[env_ptr, Operand::imm32(inst.aux)]);
            }

            Opcode::ExitIf => {
                match args[0] {
                    Operand::Reg(r) => e.test(W, Operand::Reg(r), Operand::Reg(r)),
                    c => e.alu(ArithOp::Cmp, W, c, Operand::imm32(0)),
                }
                let skip = e.jcc_fixup(X86Cond::Je, true);
                let jump = self.emit_exit(e.region(), inst.aux, env.cycles);
                e.bind(skip);
                return Some(ExitSite {
                    target: Some(inst.aux),
                    jump_offset: Some(jump),
                });
            }
            Opcode::Exit => {
                let jump = self.emit_exit(e.region(), inst.aux, env.cycles);
                return Some(ExitSite {
                    target: Some(inst.aux),
                    jump_offset: Some(jump),
                });
            }
            Opcode::ExitDyn => {
                self.emit_exit_dynamic(e.region(), args[0], env.cycles);
                return Some(ExitSite {
                    target: None,
                    jump_offset: None,
                });
            }

            Opcode::Count => unreachable!("sentinel opcode in IR"),
        }
        None
    }
}
