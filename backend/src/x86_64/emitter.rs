#![allow(non_upper_case_globals)]

use dbt_core::Cond;

use crate::code_region::CodeRegion;
use crate::fixup::{Fixup, FixupWidth};
use crate::operand::{fits_i32, fits_i8, HostReg, Operand, Width};
use crate::x86_64::regs::{Reg, CALL_ARG_REGS, SCRATCH0};

// -- Prefix flags --

pub const P_EXT: u32 = 0x100; // 0x0F prefix
pub const P_DATA16: u32 = 0x400; // 0x66 prefix
pub const P_REXW: u32 = 0x1000; // REX.W = 1
pub const P_REXB_R: u32 = 0x2000; // REG field as byte register
pub const P_REXB_RM: u32 = 0x4000; // R/M field as byte register

// -- Opcode constants --

pub const OPC_ARITH_EvIb: u32 = 0x83;
pub const OPC_ARITH_EvIz: u32 = 0x81;
pub const OPC_ARITH_EbIb: u32 = 0x80;
pub const OPC_ARITH_GvEv: u32 = 0x03;
pub const OPC_ARITH_EvGv: u32 = 0x01;

pub const OPC_SHIFT_1: u32 = 0xD1;
pub const OPC_SHIFT_Ib: u32 = 0xC1;
pub const OPC_SHIFT_cl: u32 = 0xD3;

pub const OPC_MOVL_EvGv: u32 = 0x89;
pub const OPC_MOVL_GvEv: u32 = 0x8B;
pub const OPC_MOVL_EvIz: u32 = 0xC7;
pub const OPC_MOVL_Iv: u32 = 0xB8;
pub const OPC_MOVB_Ib: u32 = 0xB0;

pub const OPC_MOVZBL: u32 = 0xB6 | P_EXT;
pub const OPC_MOVZWL: u32 = 0xB7 | P_EXT;

pub const OPC_JCC_short: u32 = 0x70;
pub const OPC_JCC_long: u32 = 0x80 | P_EXT;
pub const OPC_JMP_short: u32 = 0xEB;
pub const OPC_JMP_long: u32 = 0xE9;

pub const OPC_SETCC: u32 = 0x90 | P_EXT | P_REXB_RM;
pub const OPC_TESTL: u32 = 0x85;
pub const OPC_GRP3_Ev: u32 = 0xF7;
pub const OPC_GRP5: u32 = 0xFF;

pub const OPC_IMUL_GvEv: u32 = 0xAF | P_EXT;
pub const OPC_IMUL_GvEvIb: u32 = 0x6B;
pub const OPC_IMUL_GvEvIz: u32 = 0x69;

pub const OPC_LEA: u32 = 0x8D;
pub const OPC_PUSH_r32: u32 = 0x50;
pub const OPC_POP_r32: u32 = 0x58;
pub const OPC_RET: u32 = 0xC3;

/// Length of `jmp rel32`.
pub const JMP_REL32_LEN: usize = 5;

// -- Sub-operation enums --

/// Arithmetic sub-opcodes (/r field of 0x81/0x83, shifted into GvEv).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ArithOp {
    Add = 0,
    Or = 1,
    Adc = 2,
    Sbb = 3,
    And = 4,
    Sub = 5,
    Xor = 6,
    Cmp = 7,
}

/// Shift sub-opcodes (/r field of 0xC1/0xD1/0xD3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ShiftOp {
    Rol = 0,
    Ror = 1,
    Shl = 4,
    Shr = 5,
    Sar = 7,
}

/// Group 3 unary operations (/r field of 0xF7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum UnaryOp {
    Not = 2,
    Neg = 3,
}

/// Group 5 extension codes (/r field of 0xFF).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Ext5Op {
    CallN = 2,
    JmpN = 4,
}

/// x86 condition codes for Jcc/SETcc.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum X86Cond {
    Jo = 0x0,
    Jno = 0x1,
    Jb = 0x2,
    Jae = 0x3,
    Je = 0x4,
    Jne = 0x5,
    Jbe = 0x6,
    Ja = 0x7,
    Js = 0x8,
    Jns = 0x9,
    Jp = 0xA,
    Jnp = 0xB,
    Jl = 0xC,
    Jge = 0xD,
    Jle = 0xE,
    Jg = 0xF,
}

impl X86Cond {
    /// Condition code testing `cond` after `cmp a, b`.
    pub fn from_cond(cond: Cond) -> Self {
        match cond {
            Cond::Eq => X86Cond::Je,
            Cond::Ne => X86Cond::Jne,
            Cond::Lt => X86Cond::Jl,
            Cond::Ge => X86Cond::Jge,
            Cond::Le => X86Cond::Jle,
            Cond::Gt => X86Cond::Jg,
            Cond::Ltu => X86Cond::Jb,
            Cond::Geu => X86Cond::Jae,
            Cond::Leu => X86Cond::Jbe,
            Cond::Gtu => X86Cond::Ja,
        }
    }

    pub fn invert(self) -> Self {
        match self {
            X86Cond::Jo => X86Cond::Jno,
            X86Cond::Jno => X86Cond::Jo,
            X86Cond::Jb => X86Cond::Jae,
            X86Cond::Jae => X86Cond::Jb,
            X86Cond::Je => X86Cond::Jne,
            X86Cond::Jne => X86Cond::Je,
            X86Cond::Jbe => X86Cond::Ja,
            X86Cond::Ja => X86Cond::Jbe,
            X86Cond::Js => X86Cond::Jns,
            X86Cond::Jns => X86Cond::Js,
            X86Cond::Jp => X86Cond::Jnp,
            X86Cond::Jnp => X86Cond::Jp,
            X86Cond::Jl => X86Cond::Jge,
            X86Cond::Jge => X86Cond::Jl,
            X86Cond::Jle => X86Cond::Jg,
            X86Cond::Jg => X86Cond::Jle,
        }
    }
}

// -- Core encoding functions --

/// Prefix flags selecting operand width.
#[inline]
fn size_flags(w: Width) -> u32 {
    match w {
        Width::W8 => P_REXB_R | P_REXB_RM,
        Width::W16 => P_DATA16,
        Width::W32 => 0,
        Width::W64 => P_REXW,
    }
}

/// Opcode for width `w` in the families where the byte form is
/// the word form minus one (0x89/0x88, 0x03/0x02, 0xF7/0xF6, ...).
#[inline]
fn opw(opc: u32, w: Width) -> u32 {
    let base = if w == Width::W8 { opc - 1 } else { opc };
    base | size_flags(w)
}

/// Emit prefixes, REX and opcode. `r` is the reg field, `rm` the r/m
/// field and `index` the SIB index; pass 0 for unused fields.
fn emit_opc_3(buf: &mut CodeRegion, opc: u32, r: u8, rm: u8, index: u8) {
    let mut rex: u8 = 0;
    if opc & P_REXW != 0 {
        rex |= 0x08;
    }
    if r >= 8 {
        rex |= 0x04;
    }
    if index >= 8 {
        rex |= 0x02;
    }
    if rm >= 8 {
        rex |= 0x01;
    }
    // SPL/BPL/SIL/DIL need a REX prefix to be addressable as bytes.
    if rex == 0
        && ((opc & P_REXB_R != 0 && r >= 4) || (opc & P_REXB_RM != 0 && rm >= 4))
    {
        rex = 0x40;
    }

    if opc & P_DATA16 != 0 {
        buf.emit_u8(0x66);
    }
    if rex != 0 {
        buf.emit_u8(0x40 | rex);
    }
    if opc & P_EXT != 0 {
        buf.emit_u8(0x0F);
    }
    buf.emit_u8(opc as u8);
}

pub fn emit_opc(buf: &mut CodeRegion, opc: u32, r: u8, rm: u8) {
    emit_opc_3(buf, opc, r, rm, 0);
}

/// Opcode + ModR/M, register direct.
pub fn emit_modrm(buf: &mut CodeRegion, opc: u32, r: u8, rm: u8) {
    emit_opc(buf, opc, r, rm);
    buf.emit_u8(0xC0 | ((r & 7) << 3) | (rm & 7));
}

/// Opcode + ModR/M + displacement for `[base + offset]`.
/// RBP/R13 need an explicit disp8 of 0, RSP/R12 need a SIB byte.
pub fn emit_modrm_offset(buf: &mut CodeRegion, opc: u32, r: u8, base: u8, offset: i32) {
    emit_opc(buf, opc, r, base);

    let r3 = r & 7;
    let b3 = base & 7;

    if offset == 0 && b3 != 5 {
        if b3 == 4 {
            buf.emit_u8((r3 << 3) | 0x04);
            buf.emit_u8(0x24);
        } else {
            buf.emit_u8((r3 << 3) | b3);
        }
    } else if fits_i8(offset as i64) {
        if b3 == 4 {
            buf.emit_u8(0x44 | (r3 << 3));
            buf.emit_u8(0x24);
        } else {
            buf.emit_u8(0x40 | (r3 << 3) | b3);
        }
        buf.emit_u8(offset as u8);
    } else {
        if b3 == 4 {
            buf.emit_u8(0x84 | (r3 << 3));
            buf.emit_u8(0x24);
        } else {
            buf.emit_u8(0x80 | (r3 << 3) | b3);
        }
        buf.emit_u32(offset as u32);
    }
}

/// Opcode + ModR/M + SIB for `[base + index * scale + offset]`.
pub fn emit_modrm_sib(
    buf: &mut CodeRegion,
    opc: u32,
    r: u8,
    base: u8,
    index: u8,
    scale: u8,
    offset: i32,
) {
    assert!(index != Reg::Rsp as u8, "rsp cannot be a SIB index");
    let shift = match scale {
        1 => 0,
        2 => 1,
        4 => 2,
        8 => 3,
        _ => panic!("invalid SIB scale {scale}"),
    };
    emit_opc_3(buf, opc, r, base, index);

    let r3 = r & 7;
    let b3 = base & 7;
    let sib = (shift << 6) | ((index & 7) << 3) | b3;

    if offset == 0 && b3 != 5 {
        buf.emit_u8((r3 << 3) | 0x04);
        buf.emit_u8(sib);
    } else if fits_i8(offset as i64) {
        buf.emit_u8(0x44 | (r3 << 3));
        buf.emit_u8(sib);
        buf.emit_u8(offset as u8);
    } else {
        buf.emit_u8(0x84 | (r3 << 3));
        buf.emit_u8(sib);
        buf.emit_u32(offset as u32);
    }
}

/// Emit `n` bytes of padding using the recommended multi-byte NOPs.
pub fn emit_nops(buf: &mut CodeRegion, mut n: usize) {
    const NOPS: [&[u8]; 8] = [
        &[0x90],
        &[0x66, 0x90],
        &[0x0F, 0x1F, 0x00],
        &[0x0F, 0x1F, 0x40, 0x00],
        &[0x0F, 0x1F, 0x44, 0x00, 0x00],
        &[0x66, 0x0F, 0x1F, 0x44, 0x00, 0x00],
        &[0x0F, 0x1F, 0x80, 0x00, 0x00, 0x00, 0x00],
        &[0x0F, 0x1F, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00],
    ];
    while n > 0 {
        let k = n.min(8);
        buf.emit_bytes(NOPS[k - 1]);
        n -= k;
    }
}

/// Rewrite the displacement of the `jmp rel32` at `jump_offset` so it
/// lands on `target_offset`.
pub fn patch_jmp_rel32(buf: &mut CodeRegion, jump_offset: usize, target_offset: usize) {
    assert_eq!(
        buf.read_u8(jump_offset),
        OPC_JMP_long as u8,
        "no jmp rel32 at code offset {jump_offset:#x}"
    );
    let disp = target_offset as i64 - (jump_offset + JMP_REL32_LEN) as i64;
    assert!(
        fits_i32(disp),
        "jump at {:p} cannot reach {:p}",
        buf.ptr_at(jump_offset),
        buf.ptr_at(target_offset)
    );
    buf.patch_u32(jump_offset + 1, disp as u32);
}

/// Current target of the `jmp rel32` at `jump_offset`.
pub fn jmp_rel32_target(buf: &CodeRegion, jump_offset: usize) -> usize {
    let disp = buf.read_u32(jump_offset + 1) as i32 as i64;
    ((jump_offset + JMP_REL32_LEN) as i64 + disp) as usize
}

// ==========================================================
// X64Emitter: operand-level instruction emission
// ==========================================================

/// Writes x86-64 instructions at the code region cursor.
pub struct X64Emitter<'a> {
    buf: &'a mut CodeRegion,
}

impl<'a> X64Emitter<'a> {
    pub fn new(buf: &'a mut CodeRegion) -> Self {
        Self { buf }
    }

    #[inline]
    pub fn offset(&self) -> usize {
        self.buf.offset()
    }

    pub fn region(&mut self) -> &mut CodeRegion {
        self.buf
    }

    /// Opcode + ModR/M for `r` and an r/m operand.
    fn rm_op(&mut self, opc: u32, r: u8, rm: Operand) {
        match rm {
            Operand::Reg(x) => emit_modrm(self.buf, opc, r, x),
            Operand::Mem { base, disp } => emit_modrm_offset(self.buf, opc, r, base, disp),
            Operand::Sib {
                base,
                index,
                scale,
                disp,
            } => emit_modrm_sib(self.buf, opc, r, base, index, scale, disp),
            Operand::Imm { .. } => panic!("immediate used as r/m operand"),
        }
    }

    fn emit_imm(&mut self, w: Width, value: i64) {
        match w {
            Width::W8 => self.buf.emit_u8(value as u8),
            Width::W16 => self.buf.emit_u16(value as u16),
            Width::W32 => self.buf.emit_u32(value as u32),
            Width::W64 => {
                assert!(fits_i32(value), "imm {value:#x} does not sign-extend from 32 bits");
                self.buf.emit_u32(value as u32)
            }
        }
    }

    // -- Data movement --

    pub fn mov(&mut self, w: Width, dst: Operand, src: Operand) {
        match (dst, src) {
            (Operand::Reg(d), Operand::Reg(s)) => {
                self.rm_op(opw(OPC_MOVL_EvGv, w), s, Operand::Reg(d))
            }
            (Operand::Reg(d), Operand::Imm { value, .. }) => self.mov_ri(w, d, value),
            (Operand::Reg(d), m) => self.rm_op(opw(OPC_MOVL_GvEv, w), d, m),
            (m, Operand::Reg(s)) if m.is_mem() => self.rm_op(opw(OPC_MOVL_EvGv, w), s, m),
            (m, Operand::Imm { value, .. }) if m.is_mem() => {
                self.rm_op(opw(OPC_MOVL_EvIz, w), 0, m);
                self.emit_imm(w, value);
            }
            _ => panic!("unsupported mov operands {dst:?} <- {src:?}"),
        }
    }

    /// `mov reg, imm`. Leaves flags intact.
    fn mov_ri(&mut self, w: Width, d: HostReg, value: i64) {
        let low3 = (d & 7) as u32;
        match w {
            Width::W8 => {
                emit_opc(self.buf, (OPC_MOVB_Ib + low3) | P_REXB_RM, 0, d);
                self.buf.emit_u8(value as u8);
            }
            Width::W16 => {
                emit_opc(self.buf, (OPC_MOVL_Iv + low3) | P_DATA16, 0, d);
                self.buf.emit_u16(value as u16);
            }
            Width::W32 => {
                emit_opc(self.buf, OPC_MOVL_Iv + low3, 0, d);
                self.buf.emit_u32(value as u32);
            }
            Width::W64 => {
                if (0..=u32::MAX as i64).contains(&value) {
                    // 32-bit moves zero-extend.
                    self.mov_ri(Width::W32, d, value);
                } else if fits_i32(value) {
                    emit_modrm(self.buf, OPC_MOVL_EvIz | P_REXW, 0, d);
                    self.buf.emit_u32(value as u32);
                } else {
                    emit_opc(self.buf, (OPC_MOVL_Iv + low3) | P_REXW, 0, d);
                    self.buf.emit_u64(value as u64);
                }
            }
        }
    }

    /// `mov reg, imm64` with the full 64-bit form.
    pub fn mov_abs(&mut self, d: Reg, value: u64) {
        emit_opc(self.buf, (OPC_MOVL_Iv + d.low3() as u32) | P_REXW, 0, d as u8);
        self.buf.emit_u64(value);
    }

    /// Zero-extending load of a byte or word.
    pub fn movzx(&mut self, from: Width, dst: HostReg, src: Operand) {
        let opc = match from {
            Width::W8 => OPC_MOVZBL | P_REXB_RM,
            Width::W16 => OPC_MOVZWL,
            _ => panic!("movzx from {from:?}"),
        };
        self.rm_op(opc, dst, src);
    }

    pub fn lea(&mut self, w: Width, dst: HostReg, src: Operand) {
        assert!(src.is_mem(), "lea needs a memory operand");
        self.rm_op(OPC_LEA | size_flags(w), dst, src);
    }

    // -- Arithmetic --

    /// Two-operand ALU op: `dst = dst op src`.
    pub fn alu(&mut self, op: ArithOp, w: Width, dst: Operand, src: Operand) {
        match (dst, src) {
            (_, Operand::Imm { value, .. }) => {
                if w == Width::W8 {
                    self.rm_op(OPC_ARITH_EbIb | P_REXB_RM, op as u8, dst);
                    self.buf.emit_u8(value as u8);
                } else if fits_i8(value) {
                    self.rm_op(OPC_ARITH_EvIb | size_flags(w), op as u8, dst);
                    self.buf.emit_u8(value as u8);
                } else {
                    self.rm_op(OPC_ARITH_EvIz | size_flags(w), op as u8, dst);
                    self.emit_imm(w, value);
                }
            }
            (Operand::Reg(d), s) => {
                self.rm_op(opw(OPC_ARITH_GvEv + ((op as u32) << 3), w), d, s)
            }
            (m, Operand::Reg(s)) if m.is_mem() => {
                self.rm_op(opw(OPC_ARITH_EvGv + ((op as u32) << 3), w), s, m)
            }
            _ => panic!("unsupported {op:?} operands {dst:?}, {src:?}"),
        }
    }

    /// `test a, b`.
    pub fn test(&mut self, w: Width, a: Operand, b: Operand) {
        match b {
            Operand::Reg(r) => self.rm_op(opw(OPC_TESTL, w), r, a),
            Operand::Imm { value, .. } => {
                self.rm_op(opw(OPC_GRP3_Ev, w), 0, a);
                self.emit_imm(w, value);
            }
            _ => panic!("unsupported test operands {a:?}, {b:?}"),
        }
    }

    /// `dst = dst * src`.
    pub fn imul(&mut self, w: Width, dst: HostReg, src: Operand) {
        assert!(w != Width::W8, "no byte imul");
        self.rm_op(OPC_IMUL_GvEv | size_flags(w), dst, src);
    }

    /// `dst = src * imm`.
    pub fn imul_imm(&mut self, w: Width, dst: HostReg, src: Operand, imm: i32) {
        assert!(w != Width::W8, "no byte imul");
        if fits_i8(imm as i64) {
            self.rm_op(OPC_IMUL_GvEvIb | size_flags(w), dst, src);
            self.buf.emit_u8(imm as u8);
        } else {
            self.rm_op(OPC_IMUL_GvEvIz | size_flags(w), dst, src);
            self.buf.emit_u32(imm as u32);
        }
    }

    pub fn unary(&mut self, op: UnaryOp, w: Width, dst: Operand) {
        self.rm_op(opw(OPC_GRP3_Ev, w), op as u8, dst);
    }

    /// Shift or rotate by an immediate, or by CL when `amount` is `None`.
    pub fn shift(&mut self, op: ShiftOp, w: Width, dst: Operand, amount: Option<u8>) {
        match amount {
            None => self.rm_op(opw(OPC_SHIFT_cl, w), op as u8, dst),
            Some(1) => self.rm_op(opw(OPC_SHIFT_1, w), op as u8, dst),
            Some(n) => {
                self.rm_op(opw(OPC_SHIFT_Ib, w), op as u8, dst);
                self.buf.emit_u8(n);
            }
        }
    }

    /// `setcc` on the low byte of `dst`.
    pub fn setcc(&mut self, cond: X86Cond, dst: Operand) {
        self.rm_op(OPC_SETCC + cond as u32, 0, dst);
    }

    // -- Stack and padding --

    pub fn push(&mut self, reg: Reg) {
        emit_opc(self.buf, OPC_PUSH_r32 + reg.low3() as u32, 0, reg as u8);
    }

    pub fn pop(&mut self, reg: Reg) {
        emit_opc(self.buf, OPC_POP_r32 + reg.low3() as u32, 0, reg as u8);
    }

    pub fn ret(&mut self) {
        self.buf.emit_u8(OPC_RET as u8);
    }

    pub fn nops(&mut self, n: usize) {
        emit_nops(self.buf, n);
    }

    /// Pad with nops so that `self.offset() + skew` is a multiple of `align`.
    pub fn align(&mut self, align: usize, skew: usize) {
        let at = self.offset() + skew;
        let pad = (align - at % align) % align;
        self.nops(pad);
    }

    // -- Indirect control flow --

    pub fn jmp_reg(&mut self, reg: Reg) {
        emit_modrm(self.buf, OPC_GRP5, Ext5Op::JmpN as u8, reg as u8);
    }

    pub fn call_reg(&mut self, reg: Reg) {
        emit_modrm(self.buf, OPC_GRP5, Ext5Op::CallN as u8, reg as u8);
    }

    // -- Direct branches --

    fn branch_range_panic(&self, at: usize, target: usize) -> ! {
        panic!(
            "branch at {:p} cannot reach {:p}",
            self.buf.ptr_at(at),
            self.buf.ptr_at(target)
        )
    }

    /// Conditional jump to a known offset; rel8 when it reaches.
    pub fn jcc(&mut self, cond: X86Cond, target: usize) {
        let at = self.offset();
        let short = target as i64 - (at + 2) as i64;
        if fits_i8(short) {
            self.buf.emit_u8(OPC_JCC_short as u8 + cond as u8);
            self.buf.emit_u8(short as u8);
            return;
        }
        let disp = target as i64 - (at + 6) as i64;
        if !fits_i32(disp) {
            self.branch_range_panic(at, target);
        }
        emit_opc(self.buf, OPC_JCC_long + cond as u32, 0, 0);
        self.buf.emit_u32(disp as u32);
    }

    /// Unconditional jump to a known offset; rel8 when it reaches.
    pub fn jmp(&mut self, target: usize) {
        let at = self.offset();
        let short = target as i64 - (at + 2) as i64;
        if fits_i8(short) {
            self.buf.emit_u8(OPC_JMP_short as u8);
            self.buf.emit_u8(short as u8);
            return;
        }
        let disp = target as i64 - (at + JMP_REL32_LEN) as i64;
        if !fits_i32(disp) {
            self.branch_range_panic(at, target);
        }
        self.buf.emit_u8(OPC_JMP_long as u8);
        self.buf.emit_u32(disp as u32);
    }

    /// `jmp rel32` to a known offset, never shortened. Used for
    /// patchable exits.
    pub fn jmp_rel32(&mut self, target: usize) -> usize {
        let at = self.offset();
        let disp = target as i64 - (at + JMP_REL32_LEN) as i64;
        if !fits_i32(disp) {
            self.branch_range_panic(at, target);
        }
        self.buf.emit_u8(OPC_JMP_long as u8);
        self.buf.emit_u32(disp as u32);
        at
    }

    /// Conditional jump to a target bound later with [`X64Emitter::patch`].
    pub fn jcc_fixup(&mut self, cond: X86Cond, short: bool) -> Fixup {
        if short {
            self.buf.emit_u8(OPC_JCC_short as u8 + cond as u8);
            let offset = self.offset();
            self.buf.emit_u8(0);
            Fixup {
                offset,
                width: FixupWidth::Rel8,
            }
        } else {
            emit_opc(self.buf, OPC_JCC_long + cond as u32, 0, 0);
            let offset = self.offset();
            self.buf.emit_u32(0);
            Fixup {
                offset,
                width: FixupWidth::Rel32,
            }
        }
    }

    /// Unconditional jump to a target bound later.
    pub fn jmp_fixup(&mut self, short: bool) -> Fixup {
        let opc = if short { OPC_JMP_short } else { OPC_JMP_long };
        self.buf.emit_u8(opc as u8);
        let offset = self.offset();
        let width = if short {
            self.buf.emit_u8(0);
            FixupWidth::Rel8
        } else {
            self.buf.emit_u32(0);
            FixupWidth::Rel32
        };
        Fixup { offset, width }
    }

    /// Resolve `fixup` to jump to `target`.
    pub fn patch(&mut self, fixup: Fixup, target: usize) {
        let disp = target as i64 - fixup.end() as i64;
        match fixup.width {
            FixupWidth::Rel8 => {
                if !fits_i8(disp) {
                    self.branch_range_panic(fixup.offset, target);
                }
                self.buf.patch_u8(fixup.offset, disp as u8);
            }
            FixupWidth::Rel32 => {
                if !fits_i32(disp) {
                    self.branch_range_panic(fixup.offset, target);
                }
                self.buf.patch_u32(fixup.offset, disp as u32);
            }
        }
    }

    /// Resolve `fixup` to the current offset.
    pub fn bind(&mut self, fixup: Fixup) {
        let here = self.offset();
        self.patch(fixup, here);
    }

    // -- Host calls --

    /// Call the host function at `addr` with up to six arguments.
    ///
    /// Register arguments are moved as 64-bit values, memory
    /// arguments are loaded as 32-bit values. Clobbers RAX.
    pub fn call_abs(&mut self, addr: u64, args: &[Operand]) {
        assert!(args.len() <= CALL_ARG_REGS.len(), "too many call arguments");

        // Parallel move of register sources into argument registers.
        let mut pending: Vec<(u8, Operand)> = args
            .iter()
            .enumerate()
            .map(|(i, &a)| (CALL_ARG_REGS[i] as u8, a))
            .filter(|&(d, a)| a != Operand::Reg(d))
            .collect();
        while !pending.is_empty() {
            let ready = (0..pending.len()).find(|&i| {
                let d = pending[i].0;
                pending
                    .iter()
                    .enumerate()
                    .all(|(j, &(_, s))| j == i || s != Operand::Reg(d))
            });
            match ready {
                Some(i) => {
                    let (d, src) = pending.remove(i);
                    let w = if src.is_mem() { Width::W32 } else { Width::W64 };
                    self.mov(w, Operand::Reg(d), src);
                }
                None => {
                    // Cycle: park one destination's value in the scratch register.
                    let d = pending[0].0;
                    self.mov(Width::W64, SCRATCH0.op(), Operand::Reg(d));
                    for p in pending.iter_mut() {
                        if p.1 == Operand::Reg(d) {
                            p.1 = SCRATCH0.op();
                        }
                    }
                }
            }
        }

        self.mov_abs(SCRATCH0, addr);
        self.call_reg(SCRATCH0);
    }
}
