//! Reference interpreter for the supported subset.
//!
//! Executes one instruction at a time on the shared guest state. It
//! is the fallback for instructions the lowerings leave to it and the
//! whole execution core in interpreter mode.

use dbt_core::state::{EXC_CODE_WRITE, EXC_PROGRAM, EXC_SYSCALL};
use dbt_core::{GuestMemory, GuestState, MemSize};

use super::decode::{
    cr_bit, cr_field_shift, decode, rotate_mask, ArithOp, CrOp, Insn, LogicOp, Spr,
};

pub const XER_SO: u32 = 1 << 31;
pub const XER_OV: u32 = 1 << 30;
pub const XER_CA: u32 = 1 << 29;

/// Entry point called from generated code.
///
/// # Safety
///
/// `state` must point to a live `GuestState` whose `mem` points to
/// a live `GuestMemory`.
pub unsafe extern "C" fn ppc_interp(state: *mut GuestState, word: u32) {
    let st = &mut *state;
    let mem = &mut *st.mem;
    execute(st, mem, word);
}

fn reg_or_zero(st: &GuestState, r: usize) -> u32 {
    if r == 0 {
        0
    } else {
        st.gpr[r]
    }
}

/// Write `value` into CR field `crf`.
pub fn set_cr_field(st: &mut GuestState, crf: usize, value: u32) {
    let shift = cr_field_shift(crf);
    st.cr = (st.cr & !(0xf << shift)) | ((value & 0xf) << shift);
}

fn compare(st: &mut GuestState, crf: usize, lt: bool, gt: bool) {
    let c = if lt {
        8
    } else if gt {
        4
    } else {
        2
    };
    let so = st.xer >> 31;
    set_cr_field(st, crf, c | so);
}

/// CR0 from a recorded result.
fn record(st: &mut GuestState, r: u32) {
    let v = r as i32;
    compare(st, 0, v < 0, v > 0);
}

fn set_ca(st: &mut GuestState, ca: bool) {
    st.xer = if ca { st.xer | XER_CA } else { st.xer & !XER_CA };
}

fn set_ov(st: &mut GuestState, ov: bool) {
    if ov {
        st.xer |= XER_OV | XER_SO;
    } else {
        st.xer &= !XER_OV;
    }
}

fn ca(st: &GuestState) -> u32 {
    (st.xer >> 29) & 1
}

/// `a + b + c` with carry out and signed overflow.
fn add_with_carry(a: u32, b: u32, c: u32) -> (u32, bool, bool) {
    let wide = a as u64 + b as u64 + c as u64;
    let r = wide as u32;
    let ov = ((a ^ r) & (b ^ r)) >> 31 != 0;
    (r, wide >> 32 != 0, ov)
}

fn load(mem: &GuestMemory, size: MemSize, sign: bool, ea: u32) -> u32 {
    match (size, sign) {
        (MemSize::U8, _) => mem.read_u8(ea) as u32,
        (MemSize::U16, false) => mem.read_u16(ea) as u32,
        (MemSize::U16, true) => mem.read_u16(ea) as i16 as i32 as u32,
        (MemSize::U32, _) => mem.read_u32(ea),
    }
}

fn store(st: &mut GuestState, mem: &mut GuestMemory, size: MemSize, ea: u32, v: u32) {
    let hit = match size {
        MemSize::U8 => mem.write_u8(ea, v as u8),
        MemSize::U16 => mem.write_u16(ea, v as u16),
        MemSize::U32 => mem.write_u32(ea, v),
    };
    if hit {
        st.raise(EXC_CODE_WRITE);
    }
}

/// Branch condition from BO/BI; decrements CTR when BO asks for it.
fn branch_taken(st: &mut GuestState, bo: u32, bi: u32) -> bool {
    let ctr_ok = if bo & 4 == 0 {
        st.ctr = st.ctr.wrapping_sub(1);
        (st.ctr == 0) == (bo & 2 != 0)
    } else {
        true
    };
    let cond_ok = bo & 0x10 != 0 || ((st.cr & cr_bit(bi)) != 0) == (bo & 8 != 0);
    ctr_ok && cond_ok
}

fn spr(st: &mut GuestState, spr: Spr) -> &mut u32 {
    match spr {
        Spr::Xer => &mut st.xer,
        Spr::Lr => &mut st.lr,
        Spr::Ctr => &mut st.ctr,
    }
}

/// Execute `word` at `st.pc`. Raises `EXC_PROGRAM` and leaves the
/// pc alone for words outside the subset.
pub fn execute(st: &mut GuestState, mem: &mut GuestMemory, word: u32) {
    let pc = st.pc;
    let Some(insn) = decode(word) else {
        st.raise(EXC_PROGRAM);
        return;
    };
    let mut next = pc.wrapping_add(4);

    match insn {
        Insn::Addi { rd, ra, imm } => {
            st.gpr[rd] = reg_or_zero(st, ra).wrapping_add(imm as i32 as u32);
        }
        Insn::Addis { rd, ra, imm } => {
            st.gpr[rd] = reg_or_zero(st, ra).wrapping_add((imm as i32 as u32) << 16);
        }
        Insn::Addic { rd, ra, imm, rc } => {
            let (r, c, _) = add_with_carry(st.gpr[ra], imm as i32 as u32, 0);
            st.gpr[rd] = r;
            set_ca(st, c);
            if rc {
                record(st, r);
            }
        }
        Insn::Subfic { rd, ra, imm } => {
            let (r, c, _) = add_with_carry(!st.gpr[ra], imm as i32 as u32, 1);
            st.gpr[rd] = r;
            set_ca(st, c);
        }
        Insn::Mulli { rd, ra, imm } => {
            st.gpr[rd] = st.gpr[ra].wrapping_mul(imm as i32 as u32);
        }
        Insn::LogicImm { op, rs, ra, imm, rc } => {
            let s = st.gpr[rs];
            let r = match op {
                LogicOp::Or => s | imm,
                LogicOp::Xor => s ^ imm,
                _ => s & imm,
            };
            st.gpr[ra] = r;
            if rc {
                record(st, r);
            }
        }
        Insn::Cmpi { crf, ra, imm } => {
            let (a, b) = (st.gpr[ra] as i32, imm as i32);
            compare(st, crf, a < b, a > b);
        }
        Insn::Cmpli { crf, ra, imm } => {
            let (a, b) = (st.gpr[ra], imm as u32);
            compare(st, crf, a < b, a > b);
        }
        Insn::Cmp { crf, ra, rb, signed } => {
            let (a, b) = (st.gpr[ra], st.gpr[rb]);
            if signed {
                compare(st, crf, (a as i32) < (b as i32), (a as i32) > (b as i32));
            } else {
                compare(st, crf, a < b, a > b);
            }
        }
        Insn::Rlwinm { rs, ra, sh, mb, me, rc } => {
            let r = st.gpr[rs].rotate_left(sh) & rotate_mask(mb, me);
            st.gpr[ra] = r;
            if rc {
                record(st, r);
            }
        }
        Insn::Rlwimi { rs, ra, sh, mb, me, rc } => {
            let m = rotate_mask(mb, me);
            let r = (st.gpr[rs].rotate_left(sh) & m) | (st.gpr[ra] & !m);
            st.gpr[ra] = r;
            if rc {
                record(st, r);
            }
        }
        Insn::Rlwnm { rs, ra, rb, mb, me, rc } => {
            let r = st.gpr[rs].rotate_left(st.gpr[rb] & 31) & rotate_mask(mb, me);
            st.gpr[ra] = r;
            if rc {
                record(st, r);
            }
        }
        Insn::Load { size, sign, rd, ra, disp, update } => {
            let ea = reg_or_zero(st, ra).wrapping_add(disp as i32 as u32);
            st.gpr[rd] = load(mem, size, sign, ea);
            if update && ra != 0 && ra != rd {
                st.gpr[ra] = ea;
            }
        }
        Insn::LoadX { size, sign, rd, ra, rb, update } => {
            let ea = reg_or_zero(st, ra).wrapping_add(st.gpr[rb]);
            st.gpr[rd] = load(mem, size, sign, ea);
            if update && ra != 0 && ra != rd {
                st.gpr[ra] = ea;
            }
        }
        Insn::Store { size, rs, ra, disp, update } => {
            let ea = reg_or_zero(st, ra).wrapping_add(disp as i32 as u32);
            let v = st.gpr[rs];
            store(st, mem, size, ea, v);
            if update && ra != 0 {
                st.gpr[ra] = ea;
            }
        }
        Insn::StoreX { size, rs, ra, rb, update } => {
            let ea = reg_or_zero(st, ra).wrapping_add(st.gpr[rb]);
            let v = st.gpr[rs];
            store(st, mem, size, ea, v);
            if update && ra != 0 {
                st.gpr[ra] = ea;
            }
        }
        Insn::Arith { op, rd, ra, rb, oe, rc } => {
            let (a, b) = (st.gpr[ra], st.gpr[rb]);
            let (r, ov) = match op {
                ArithOp::Add => {
                    let (r, _, ov) = add_with_carry(a, b, 0);
                    (r, ov)
                }
                ArithOp::Addc | ArithOp::Adde => {
                    let cin = if op == ArithOp::Adde { ca(st) } else { 0 };
                    let (r, c, ov) = add_with_carry(a, b, cin);
                    set_ca(st, c);
                    (r, ov)
                }
                ArithOp::Subf => {
                    let (r, _, ov) = add_with_carry(!a, b, 1);
                    (r, ov)
                }
                ArithOp::Subfc | ArithOp::Subfe => {
                    let cin = if op == ArithOp::Subfe { ca(st) } else { 1 };
                    let (r, c, ov) = add_with_carry(!a, b, cin);
                    set_ca(st, c);
                    (r, ov)
                }
                ArithOp::Mullw => {
                    let wide = a as i32 as i64 * b as i32 as i64;
                    (wide as u32, wide != wide as i32 as i64)
                }
                ArithOp::Mulhw => ((((a as i32 as i64) * (b as i32 as i64)) >> 32) as u32, false),
                ArithOp::Mulhwu => ((((a as u64) * (b as u64)) >> 32) as u32, false),
                ArithOp::Divw => {
                    let (sa, sb) = (a as i32, b as i32);
                    if sb == 0 || (sa == i32::MIN && sb == -1) {
                        (0, true)
                    } else {
                        ((sa / sb) as u32, false)
                    }
                }
                ArithOp::Divwu => match a.checked_div(b) {
                    Some(q) => (q, false),
                    None => (0, true),
                },
            };
            st.gpr[rd] = r;
            if oe {
                set_ov(st, ov);
            }
            if rc {
                record(st, r);
            }
        }
        Insn::Neg { rd, ra, oe, rc } => {
            let a = st.gpr[ra];
            let r = a.wrapping_neg();
            st.gpr[rd] = r;
            if oe {
                set_ov(st, a == 0x8000_0000);
            }
            if rc {
                record(st, r);
            }
        }
        Insn::Logic { op, rs, ra, rb, rc } => {
            let (s, b) = (st.gpr[rs], st.gpr[rb]);
            let r = match op {
                LogicOp::And => s & b,
                LogicOp::Andc => s & !b,
                LogicOp::Or => s | b,
                LogicOp::Orc => s | !b,
                LogicOp::Xor => s ^ b,
                LogicOp::Nor => !(s | b),
                LogicOp::Nand => !(s & b),
                LogicOp::Eqv => !(s ^ b),
                LogicOp::Slw => {
                    if b & 0x20 != 0 {
                        0
                    } else {
                        s << (b & 31)
                    }
                }
                LogicOp::Srw => {
                    if b & 0x20 != 0 {
                        0
                    } else {
                        s >> (b & 31)
                    }
                }
                LogicOp::Sraw => {
                    let n = b & 0x3f;
                    let r = if n > 31 {
                        ((s as i32) >> 31) as u32
                    } else {
                        ((s as i32) >> n) as u32
                    };
                    let lost = if n > 31 { s } else { s & !(u32::MAX << n) };
                    set_ca(st, (s as i32) < 0 && lost != 0);
                    r
                }
            };
            st.gpr[ra] = r;
            if rc {
                record(st, r);
            }
        }
        Insn::Srawi { rs, ra, sh, rc } => {
            let s = st.gpr[rs];
            let r = ((s as i32) >> sh) as u32;
            let lost = s & !(u32::MAX << sh);
            set_ca(st, (s as i32) < 0 && lost != 0);
            st.gpr[ra] = r;
            if rc {
                record(st, r);
            }
        }
        Insn::Exts { rs, ra, bits, rc } => {
            let s = st.gpr[rs];
            let r = if bits == 8 {
                s as u8 as i8 as i32 as u32
            } else {
                s as u16 as i16 as i32 as u32
            };
            st.gpr[ra] = r;
            if rc {
                record(st, r);
            }
        }
        Insn::Cntlzw { rs, ra, rc } => {
            let r = st.gpr[rs].leading_zeros();
            st.gpr[ra] = r;
            if rc {
                record(st, r);
            }
        }
        Insn::Mfspr { rd, spr: s } => {
            let v = *spr(st, s);
            st.gpr[rd] = v;
        }
        Insn::Mtspr { rs, spr: s } => {
            let v = st.gpr[rs];
            *spr(st, s) = v;
        }
        Insn::Mfcr { rd } => st.gpr[rd] = st.cr,
        Insn::Mtcrf { rs, fxm } => {
            let mask = (0..8)
                .filter(|f| fxm & (0x80 >> f) != 0)
                .fold(0u32, |m, f| m | (0xf << cr_field_shift(f)));
            st.cr = (st.cr & !mask) | (st.gpr[rs] & mask);
        }
        Insn::Cr { op, bt, ba, bb } => {
            let a = st.cr & cr_bit(ba) != 0;
            let b = st.cr & cr_bit(bb) != 0;
            let r = match op {
                CrOp::And => a & b,
                CrOp::Andc => a & !b,
                CrOp::Or => a | b,
                CrOp::Orc => a | !b,
                CrOp::Xor => a ^ b,
                CrOp::Nor => !(a | b),
                CrOp::Nand => !(a & b),
                CrOp::Eqv => a == b,
            };
            st.cr = if r { st.cr | cr_bit(bt) } else { st.cr & !cr_bit(bt) };
        }
        Insn::B { li, aa, lk } => {
            if lk {
                st.lr = next;
            }
            next = if aa { li as u32 } else { pc.wrapping_add(li as u32) };
        }
        Insn::Bc { bo, bi, bd, aa, lk } => {
            if lk {
                st.lr = next;
            }
            if branch_taken(st, bo, bi) {
                next = if aa {
                    bd as i32 as u32
                } else {
                    pc.wrapping_add(bd as i32 as u32)
                };
            }
        }
        Insn::Bclr { bo, bi, lk } => {
            let target = st.lr & !3;
            if lk {
                st.lr = next;
            }
            if branch_taken(st, bo, bi) {
                next = target;
            }
        }
        Insn::Bcctr { bo, bi, lk } => {
            if lk {
                st.lr = next;
            }
            if branch_taken(st, bo, bi) {
                next = st.ctr & !3;
            }
        }
        Insn::Sc => st.raise(EXC_SYSCALL),
        Insn::Nop => {}
    }
    st.pc = next;
}
