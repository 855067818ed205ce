//! Direct lowering: host code straight from decoded instructions.
//!
//! Guest registers stay in the state block; each instruction loads
//! what it needs into RAX/RCX/RDX and stores its result back. Only
//! the instructions worth the trouble are covered here, the rest go
//! through the interpreter helper.

use dbt_backend::x86_64::{ArithOp, Reg, ShiftOp, X86Cond};
use dbt_backend::{DirectEmitter, Operand, Width, X86_64CodeGen};
use dbt_core::state::{CR_OFFSET, CTR_OFFSET, EXCEPTIONS_OFFSET, EXC_SYSCALL, LR_OFFSET, XER_OFFSET};
use dbt_core::{GuestInsn, Lowered};

use super::decode::{cr_bit, cr_field_shift, decode, rotate_mask, ArithOp as PpcArith, Insn, LogicOp, Spr};

type Emitter<'a, 'b> = &'a mut DirectEmitter<'b, X86_64CodeGen>;

const W: Width = Width::W32;

fn spr_offset(spr: Spr) -> u32 {
    match spr {
        Spr::Xer => XER_OFFSET,
        Spr::Lr => LR_OFFSET,
        Spr::Ctr => CTR_OFFSET,
    }
}

/// `[rd] = src`, going through EAX for memory sources.
fn store_gpr(e: Emitter<'_, '_>, rd: usize, src: Operand) {
    let dst = e.gpr(rd);
    let mut a = e.asm();
    if src.is_mem() {
        a.mov(W, Reg::Rax.op(), src);
        a.mov(W, dst, Reg::Rax.op());
    } else {
        a.mov(W, dst, src);
    }
}

/// EAX = `[ra] op src`, stored to `rd`.
fn binary(e: Emitter<'_, '_>, op: ArithOp, rd: usize, ra: usize, src: Operand) {
    let a_op = e.gpr(ra);
    let mut a = e.asm();
    a.mov(W, Reg::Rax.op(), a_op);
    a.alu(op, W, Reg::Rax.op(), src);
    store_gpr(e, rd, Reg::Rax.op());
}

/// Compare `[ra]` with `b` and write the result into CR field `crf`.
fn compare(e: Emitter<'_, '_>, crf: usize, ra: usize, b: Operand, signed: bool) {
    let (lt, gt) = if signed {
        (X86Cond::Jl, X86Cond::Jg)
    } else {
        (X86Cond::Jb, X86Cond::Ja)
    };
    let a_op = e.gpr(ra);
    let xer = e.state(XER_OFFSET);
    let cr = e.state(CR_OFFSET);
    let shift = cr_field_shift(crf);
    let (rax, rcx, rdx) = (Reg::Rax.op(), Reg::Rcx.op(), Reg::Rdx.op());

    let mut a = e.asm();
    a.mov(W, rax, a_op);
    a.alu(ArithOp::Cmp, W, rax, b);
    a.setcc(lt, rcx);
    a.setcc(gt, rdx);
    a.setcc(X86Cond::Je, rax);
    a.movzx(Width::W8, Reg::Rcx as u8, rcx);
    a.movzx(Width::W8, Reg::Rdx as u8, rdx);
    a.movzx(Width::W8, Reg::Rax as u8, rax);
    a.shift(ShiftOp::Shl, W, rcx, Some(3));
    a.shift(ShiftOp::Shl, W, rdx, Some(2));
    a.shift(ShiftOp::Shl, W, rax, Some(1));
    a.alu(ArithOp::Or, W, rax, rcx);
    a.alu(ArithOp::Or, W, rax, rdx);
    a.mov(W, rcx, xer);
    a.shift(ShiftOp::Shr, W, rcx, Some(31));
    a.alu(ArithOp::Or, W, rax, rcx);
    if shift != 0 {
        a.shift(ShiftOp::Shl, W, rax, Some(shift as u8));
    }
    a.alu(ArithOp::And, W, cr, Operand::imm32(!(0xf << shift)));
    a.alu(ArithOp::Or, W, cr, rax);
}

/// Effective address `rA|0 + disp` as an operand. Non-constant
/// addresses are left in ECX.
fn effective_address(e: Emitter<'_, '_>, ra: usize, disp: i16) -> Operand {
    if ra == 0 {
        return Operand::imm32(disp as i32 as u32);
    }
    let base = e.gpr(ra);
    let mut a = e.asm();
    a.mov(W, Reg::Rcx.op(), base);
    if disp != 0 {
        a.alu(ArithOp::Add, W, Reg::Rcx.op(), Operand::imm32(disp as i32 as u32));
    }
    Reg::Rcx.op()
}

/// Lower one instruction to host code.
pub fn lower_direct(e: Emitter<'_, '_>, insn: GuestInsn) -> Lowered {
    let Some(decoded) = decode(insn.word) else {
        return Lowered::Unhandled;
    };
    let pc = insn.addr;
    let next = pc.wrapping_add(4);

    match decoded {
        Insn::Addi { rd, ra: 0, imm } => store_gpr(e, rd, Operand::imm32(imm as i32 as u32)),
        Insn::Addis { rd, ra: 0, imm } => {
            store_gpr(e, rd, Operand::imm32((imm as i32 as u32) << 16))
        }
        Insn::Addi { rd, ra, imm } => {
            binary(e, ArithOp::Add, rd, ra, Operand::imm32(imm as i32 as u32))
        }
        Insn::Addis { rd, ra, imm } => {
            binary(e, ArithOp::Add, rd, ra, Operand::imm32((imm as i32 as u32) << 16))
        }
        Insn::LogicImm { op, rs, ra, imm, rc: false } => {
            let op = match op {
                LogicOp::Or => ArithOp::Or,
                LogicOp::Xor => ArithOp::Xor,
                _ => return Lowered::Unhandled,
            };
            binary(e, op, ra, rs, Operand::imm32(imm));
        }
        Insn::Arith { op, rd, ra, rb, oe: false, rc: false } => match op {
            PpcArith::Add => {
                let b = e.gpr(rb);
                binary(e, ArithOp::Add, rd, ra, b);
            }
            PpcArith::Subf => {
                let a_op = e.gpr(ra);
                binary(e, ArithOp::Sub, rd, rb, a_op);
            }
            _ => return Lowered::Unhandled,
        },
        Insn::Logic { op, rs, ra, rb, rc: false } => {
            let op = match op {
                LogicOp::And => ArithOp::And,
                LogicOp::Or => ArithOp::Or,
                LogicOp::Xor => ArithOp::Xor,
                _ => return Lowered::Unhandled,
            };
            let b = e.gpr(rb);
            binary(e, op, ra, rs, b);
        }
        Insn::Rlwinm { rs, ra, sh, mb, me, rc: false } => {
            let s = e.gpr(rs);
            let mut a = e.asm();
            a.mov(W, Reg::Rax.op(), s);
            if sh != 0 {
                a.shift(ShiftOp::Rol, W, Reg::Rax.op(), Some(sh as u8));
            }
            a.alu(ArithOp::And, W, Reg::Rax.op(), Operand::imm32(rotate_mask(mb, me)));
            store_gpr(e, ra, Reg::Rax.op());
        }
        Insn::Cmpi { crf, ra, imm } => compare(e, crf, ra, Operand::imm32(imm as i32 as u32), true),
        Insn::Cmpli { crf, ra, imm } => compare(e, crf, ra, Operand::imm32(imm as u32), false),
        Insn::Cmp { crf, ra, rb, signed } => {
            let b = e.gpr(rb);
            compare(e, crf, ra, b, signed);
        }
        Insn::Load { size, sign: false, rd, ra, disp, update: false } => {
            let addr = effective_address(e, ra, disp);
            let v = e.load(size, addr);
            store_gpr(e, rd, v);
        }
        Insn::Store { size, rs, ra, disp, update: false } => {
            let addr = effective_address(e, ra, disp);
            let v = e.gpr(rs);
            e.store(size, addr, v);
        }
        Insn::Mfspr { rd, spr } => {
            let v = e.state(spr_offset(spr));
            store_gpr(e, rd, v);
        }
        Insn::Mtspr { rs, spr } => {
            let (v, dst) = (e.gpr(rs), e.state(spr_offset(spr)));
            let mut a = e.asm();
            a.mov(W, Reg::Rax.op(), v);
            a.mov(W, dst, Reg::Rax.op());
        }
        Insn::B { li, aa, lk } => {
            if lk {
                let lr = e.state(LR_OFFSET);
                e.asm().mov(W, lr, Operand::imm32(next));
            }
            let target = if aa { li as u32 } else { pc.wrapping_add(li as u32) };
            e.exit(target);
        }
        // No CTR decrement.
        Insn::Bc { bo, bi, bd, aa, lk } if bo & 4 != 0 => {
            if lk {
                let lr = e.state(LR_OFFSET);
                e.asm().mov(W, lr, Operand::imm32(next));
            }
            let target = if aa {
                bd as i32 as u32
            } else {
                pc.wrapping_add(bd as i32 as u32)
            };
            if bo & 0x10 != 0 {
                e.exit(target);
            } else {
                let cr = e.state(CR_OFFSET);
                e.asm().test(W, cr, Operand::imm32(cr_bit(bi)));
                let cond = if bo & 8 != 0 { X86Cond::Jne } else { X86Cond::Je };
                e.exit_if(cond, target);
                e.exit(next);
            }
        }
        Insn::Bclr { bo, lk: false, .. } if bo & 0x14 == 0x14 => {
            let lr = e.state(LR_OFFSET);
            let mut a = e.asm();
            a.mov(W, Reg::Rax.op(), lr);
            a.alu(ArithOp::And, W, Reg::Rax.op(), Operand::imm32(!3));
            e.exit_dynamic(Reg::Rax.op());
        }
        Insn::Sc => {
            let exc = e.state(EXCEPTIONS_OFFSET);
            e.asm().alu(ArithOp::Or, W, exc, Operand::imm32(EXC_SYSCALL));
            e.exit(next);
        }
        Insn::Nop => {}
        _ => return Lowered::Unhandled,
    }
    Lowered::Handled
}
