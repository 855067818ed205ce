//! IR lowering.
//!
//! Covers the common integer instructions. Carry-producing
//! arithmetic, overflow-enabled (`o`) forms, divides, high multiplies,
//! `cntlzw` and the condition register logicals are left to the
//! interpreter.

use dbt_core::state::{CR_OFFSET, CTR_OFFSET, EXCEPTIONS_OFFSET, EXC_SYSCALL, LR_OFFSET, XER_OFFSET};
use dbt_core::{Arg, Cond, Context, GuestInsn, Lowered, MemSize};

use super::decode::{cr_bit, cr_field_shift, decode, rotate_mask, ArithOp, Insn, LogicOp, Spr};

/// Binary IR operation: `fn(ir, lhs, rhs) -> result`.
type BinOp = fn(&mut Context, Arg, Arg) -> Arg;

fn spr_offset(spr: Spr) -> u32 {
    match spr {
        Spr::Xer => XER_OFFSET,
        Spr::Lr => LR_OFFSET,
        Spr::Ctr => CTR_OFFSET,
    }
}

/// `rA|0` operand of D-form and X-form instructions.
fn gpr_or_zero(ir: &mut Context, r: usize) -> Arg {
    if r == 0 {
        Arg::Imm(0)
    } else {
        ir.gen_load_gpr(r)
    }
}

/// Write `lt:gt:eq:so` for `a` compared with `b` into CR field `crf`.
fn gen_compare(ir: &mut Context, crf: usize, a: Arg, b: Arg, signed: bool) {
    let (lt_cond, gt_cond) = if signed {
        (Cond::Lt, Cond::Gt)
    } else {
        (Cond::Ltu, Cond::Gtu)
    };
    let lt = ir.gen_setcond(lt_cond, a, b);
    let gt = ir.gen_setcond(gt_cond, a, b);
    let eq = ir.gen_setcond(Cond::Eq, a, b);
    let lt = ir.gen_shl(lt, Arg::Imm(3));
    let gt = ir.gen_shl(gt, Arg::Imm(2));
    let eq = ir.gen_shl(eq, Arg::Imm(1));
    let field = ir.gen_or(lt, gt);
    let field = ir.gen_or(field, eq);
    let xer = ir.gen_load_state(XER_OFFSET);
    let so = ir.gen_shr(xer, Arg::Imm(31));
    let field = ir.gen_or(field, so);

    let shift = cr_field_shift(crf);
    let cr = ir.gen_load_state(CR_OFFSET);
    let kept = ir.gen_and(cr, Arg::Imm(!(0xf << shift)));
    let placed = ir.gen_shl(field, Arg::Imm(shift));
    let cr = ir.gen_or(kept, placed);
    ir.gen_store_state(CR_OFFSET, cr);
}

/// CR0 from a result with the record bit set.
fn gen_record(ir: &mut Context, r: Arg) {
    gen_compare(ir, 0, r, Arg::Imm(0), true);
}

fn gen_result(ir: &mut Context, rd: usize, r: Arg, rc: bool) {
    ir.gen_store_gpr(rd, r);
    if rc {
        gen_record(ir, r);
    }
}

/// `subf`: `rb - ra`.
fn gen_subf(ir: &mut Context, a: Arg, b: Arg) -> Arg {
    ir.gen_sub(b, a)
}

fn gen_andc(ir: &mut Context, a: Arg, b: Arg) -> Arg {
    let nb = ir.gen_not(b);
    ir.gen_and(a, nb)
}

fn gen_orc(ir: &mut Context, a: Arg, b: Arg) -> Arg {
    let nb = ir.gen_not(b);
    ir.gen_or(a, nb)
}

fn gen_nor(ir: &mut Context, a: Arg, b: Arg) -> Arg {
    let r = ir.gen_or(a, b);
    ir.gen_not(r)
}

fn gen_nand(ir: &mut Context, a: Arg, b: Arg) -> Arg {
    let r = ir.gen_and(a, b);
    ir.gen_not(r)
}

fn gen_eqv(ir: &mut Context, a: Arg, b: Arg) -> Arg {
    let r = ir.gen_xor(a, b);
    ir.gen_not(r)
}

/// `slw`/`srw`: counts with bit 5 set produce zero.
fn gen_shift_word(ir: &mut Context, s: Arg, b: Arg, shift: BinOp) -> Arg {
    let count = ir.gen_and(b, Arg::Imm(0x3f));
    let r = shift(ir, s, count);
    let small = ir.gen_setcond(Cond::Ltu, count, Arg::Imm(32));
    let keep = ir.gen_neg(small);
    ir.gen_and(r, keep)
}

fn gen_slw(ir: &mut Context, s: Arg, b: Arg) -> Arg {
    gen_shift_word(ir, s, b, Context::gen_shl)
}

fn gen_srw(ir: &mut Context, s: Arg, b: Arg) -> Arg {
    gen_shift_word(ir, s, b, Context::gen_shr)
}

fn logic_op(op: LogicOp) -> Option<BinOp> {
    let f: BinOp = match op {
        LogicOp::And => Context::gen_and,
        LogicOp::Andc => gen_andc,
        LogicOp::Or => Context::gen_or,
        LogicOp::Orc => gen_orc,
        LogicOp::Xor => Context::gen_xor,
        LogicOp::Nor => gen_nor,
        LogicOp::Nand => gen_nand,
        LogicOp::Eqv => gen_eqv,
        LogicOp::Slw => gen_slw,
        LogicOp::Srw => gen_srw,
        LogicOp::Sraw => return None,
    };
    Some(f)
}

/// Effective address `rA|0 + offset`.
fn gen_ea(ir: &mut Context, ra: usize, offset: Arg) -> Arg {
    let base = gpr_or_zero(ir, ra);
    ir.gen_add(base, offset)
}

fn gen_load_value(ir: &mut Context, size: MemSize, sign: bool, ea: Arg) -> Arg {
    let v = ir.gen_load(size, ea);
    if sign {
        let shift = Arg::Imm(32 - 8 * size.bytes());
        let v = ir.gen_shl(v, shift);
        ir.gen_sar(v, shift)
    } else {
        v
    }
}

/// Branch condition from BO/BI as a 0/1 value, decrementing CTR when
/// BO asks for it.
fn gen_branch_cond(ir: &mut Context, bo: u32, bi: u32) -> Arg {
    let mut taken = Arg::Imm(1);
    if bo & 4 == 0 {
        let ctr = ir.gen_load_state(CTR_OFFSET);
        let ctr = ir.gen_sub(ctr, Arg::Imm(1));
        ir.gen_store_state(CTR_OFFSET, ctr);
        let cond = if bo & 2 != 0 { Cond::Eq } else { Cond::Ne };
        taken = ir.gen_setcond(cond, ctr, Arg::Imm(0));
    }
    if bo & 0x10 == 0 {
        let cr = ir.gen_load_state(CR_OFFSET);
        let bit = ir.gen_and(cr, Arg::Imm(cr_bit(bi)));
        let cond = if bo & 8 != 0 { Cond::Ne } else { Cond::Eq };
        let ok = ir.gen_setcond(cond, bit, Arg::Imm(0));
        taken = ir.gen_and(taken, ok);
    }
    taken
}

/// Conditional branch to a register target held in `target`.
fn gen_branch_dyn(ir: &mut Context, bo: u32, bi: u32, target: Arg, lk: bool, next: u32) {
    let target = ir.gen_and(target, Arg::Imm(!3));
    if lk {
        ir.gen_store_state(LR_OFFSET, Arg::Imm(next));
    }
    let taken = gen_branch_cond(ir, bo, bi);
    match taken {
        Arg::Imm(0) => ir.gen_exit(next),
        Arg::Imm(_) => ir.gen_exit_dyn(target),
        _ => {
            let not_taken = ir.gen_xor(taken, Arg::Imm(1));
            ir.gen_exit_if(not_taken, next);
            ir.gen_exit_dyn(target);
        }
    }
}

/// Lower one instruction into `ir`.
pub fn lower(ir: &mut Context, insn: GuestInsn) -> Lowered {
    let Some(decoded) = decode(insn.word) else {
        return Lowered::Unhandled;
    };
    let pc = insn.addr;
    let next = pc.wrapping_add(4);

    match decoded {
        Insn::Addi { rd, ra, imm } => {
            let a = gpr_or_zero(ir, ra);
            let r = ir.gen_add(a, Arg::Imm(imm as i32 as u32));
            ir.gen_store_gpr(rd, r);
        }
        Insn::Addis { rd, ra, imm } => {
            let a = gpr_or_zero(ir, ra);
            let r = ir.gen_add(a, Arg::Imm((imm as i32 as u32) << 16));
            ir.gen_store_gpr(rd, r);
        }
        Insn::Mulli { rd, ra, imm } => {
            let a = ir.gen_load_gpr(ra);
            let r = ir.gen_mul(a, Arg::Imm(imm as i32 as u32));
            ir.gen_store_gpr(rd, r);
        }
        Insn::LogicImm { op, rs, ra, imm, rc } => {
            let s = ir.gen_load_gpr(rs);
            let r = match op {
                LogicOp::Or => ir.gen_or(s, Arg::Imm(imm)),
                LogicOp::Xor => ir.gen_xor(s, Arg::Imm(imm)),
                _ => ir.gen_and(s, Arg::Imm(imm)),
            };
            gen_result(ir, ra, r, rc);
        }
        Insn::Cmpi { crf, ra, imm } => {
            let a = ir.gen_load_gpr(ra);
            gen_compare(ir, crf, a, Arg::Imm(imm as i32 as u32), true);
        }
        Insn::Cmpli { crf, ra, imm } => {
            let a = ir.gen_load_gpr(ra);
            gen_compare(ir, crf, a, Arg::Imm(imm as u32), false);
        }
        Insn::Cmp { crf, ra, rb, signed } => {
            let a = ir.gen_load_gpr(ra);
            let b = ir.gen_load_gpr(rb);
            gen_compare(ir, crf, a, b, signed);
        }
        Insn::Rlwinm { rs, ra, sh, mb, me, rc } => {
            let s = ir.gen_load_gpr(rs);
            let r = ir.gen_rotl(s, Arg::Imm(sh));
            let r = ir.gen_and(r, Arg::Imm(rotate_mask(mb, me)));
            gen_result(ir, ra, r, rc);
        }
        Insn::Rlwimi { rs, ra, sh, mb, me, rc } => {
            let m = rotate_mask(mb, me);
            let s = ir.gen_load_gpr(rs);
            let rot = ir.gen_rotl(s, Arg::Imm(sh));
            let ins = ir.gen_and(rot, Arg::Imm(m));
            let old = ir.gen_load_gpr(ra);
            let kept = ir.gen_and(old, Arg::Imm(!m));
            let r = ir.gen_or(ins, kept);
            gen_result(ir, ra, r, rc);
        }
        Insn::Rlwnm { rs, ra, rb, mb, me, rc } => {
            let s = ir.gen_load_gpr(rs);
            let n = ir.gen_load_gpr(rb);
            let r = ir.gen_rotl(s, n);
            let r = ir.gen_and(r, Arg::Imm(rotate_mask(mb, me)));
            gen_result(ir, ra, r, rc);
        }
        Insn::Load { size, sign, rd, ra, disp, update } => {
            let ea = gen_ea(ir, ra, Arg::Imm(disp as i32 as u32));
            let v = gen_load_value(ir, size, sign, ea);
            ir.gen_store_gpr(rd, v);
            if update && ra != 0 && ra != rd {
                ir.gen_store_gpr(ra, ea);
            }
        }
        Insn::LoadX { size, sign, rd, ra, rb, update } => {
            let off = ir.gen_load_gpr(rb);
            let ea = gen_ea(ir, ra, off);
            let v = gen_load_value(ir, size, sign, ea);
            ir.gen_store_gpr(rd, v);
            if update && ra != 0 && ra != rd {
                ir.gen_store_gpr(ra, ea);
            }
        }
        Insn::Store { size, rs, ra, disp, update } => {
            let ea = gen_ea(ir, ra, Arg::Imm(disp as i32 as u32));
            let v = ir.gen_load_gpr(rs);
            ir.gen_store(size, ea, v);
            if update && ra != 0 {
                ir.gen_store_gpr(ra, ea);
            }
        }
        Insn::StoreX { size, rs, ra, rb, update } => {
            let off = ir.gen_load_gpr(rb);
            let ea = gen_ea(ir, ra, off);
            let v = ir.gen_load_gpr(rs);
            ir.gen_store(size, ea, v);
            if update && ra != 0 {
                ir.gen_store_gpr(ra, ea);
            }
        }
        Insn::Arith { op, rd, ra, rb, oe: false, rc } => {
            let f: BinOp = match op {
                ArithOp::Add => Context::gen_add,
                ArithOp::Subf => gen_subf,
                ArithOp::Mullw => Context::gen_mul,
                _ => return Lowered::Unhandled,
            };
            let a = ir.gen_load_gpr(ra);
            let b = ir.gen_load_gpr(rb);
            let r = f(ir, a, b);
            gen_result(ir, rd, r, rc);
        }
        Insn::Neg { rd, ra, oe: false, rc } => {
            let a = ir.gen_load_gpr(ra);
            let r = ir.gen_neg(a);
            gen_result(ir, rd, r, rc);
        }
        Insn::Logic { op, rs, ra, rb, rc } => {
            let Some(f) = logic_op(op) else {
                return Lowered::Unhandled;
            };
            let s = ir.gen_load_gpr(rs);
            let b = ir.gen_load_gpr(rb);
            let r = f(ir, s, b);
            gen_result(ir, ra, r, rc);
        }
        Insn::Exts { rs, ra, bits, rc } => {
            let s = ir.gen_load_gpr(rs);
            let shift = Arg::Imm(32 - bits);
            let r = ir.gen_shl(s, shift);
            let r = ir.gen_sar(r, shift);
            gen_result(ir, ra, r, rc);
        }
        Insn::Mfspr { rd, spr } => {
            let v = ir.gen_load_state(spr_offset(spr));
            ir.gen_store_gpr(rd, v);
        }
        Insn::Mtspr { rs, spr } => {
            let v = ir.gen_load_gpr(rs);
            ir.gen_store_state(spr_offset(spr), v);
        }
        Insn::Mfcr { rd } => {
            let v = ir.gen_load_state(CR_OFFSET);
            ir.gen_store_gpr(rd, v);
        }
        Insn::B { li, aa, lk } => {
            if lk {
                ir.gen_store_state(LR_OFFSET, Arg::Imm(next));
            }
            let target = if aa { li as u32 } else { pc.wrapping_add(li as u32) };
            ir.gen_exit(target);
        }
        Insn::Bc { bo, bi, bd, aa, lk } => {
            if lk {
                ir.gen_store_state(LR_OFFSET, Arg::Imm(next));
            }
            let target = if aa {
                bd as i32 as u32
            } else {
                pc.wrapping_add(bd as i32 as u32)
            };
            let taken = gen_branch_cond(ir, bo, bi);
            ir.gen_exit_if(taken, target);
            if !ir.is_terminated() {
                ir.gen_exit(next);
            }
        }
        Insn::Bclr { bo, bi, lk } => {
            let lr = ir.gen_load_state(LR_OFFSET);
            gen_branch_dyn(ir, bo, bi, lr, lk, next);
        }
        Insn::Bcctr { bo, bi, lk } => {
            let ctr = ir.gen_load_state(CTR_OFFSET);
            gen_branch_dyn(ir, bo, bi, ctr, lk, next);
        }
        Insn::Sc => {
            let exc = ir.gen_load_state(EXCEPTIONS_OFFSET);
            let exc = ir.gen_or(exc, Arg::Imm(EXC_SYSCALL));
            ir.gen_store_state(EXCEPTIONS_OFFSET, exc);
            ir.gen_exit(next);
        }
        Insn::Nop => {}
        Insn::Addic { .. }
        | Insn::Subfic { .. }
        | Insn::Arith { .. }
        | Insn::Neg { .. }
        | Insn::Srawi { .. }
        | Insn::Cntlzw { .. }
        | Insn::Mtcrf { .. }
        | Insn::Cr { .. } => return Lowered::Unhandled,
    }
    Lowered::Handled
}
