//! Instruction decoder for the supported integer subset.

use dbt_core::MemSize;
use dbt_exec::InsnFamily;

/// Special purpose registers reachable through `mfspr`/`mtspr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Spr {
    Xer,
    Lr,
    Ctr,
}

impl Spr {
    fn from_field(w: u32) -> Option<Spr> {
        // The SPR number is encoded with its two 5-bit halves swapped.
        let spr = ((w >> 16) & 0x1f) | (((w >> 11) & 0x1f) << 5);
        match spr {
            1 => Some(Spr::Xer),
            8 => Some(Spr::Lr),
            9 => Some(Spr::Ctr),
            _ => None,
        }
    }

    pub const fn number(self) -> u32 {
        match self {
            Spr::Xer => 1,
            Spr::Lr => 8,
            Spr::Ctr => 9,
        }
    }
}

/// XO-form arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Addc,
    Adde,
    Subf,
    Subfc,
    Subfe,
    Mullw,
    Mulhw,
    Mulhwu,
    Divw,
    Divwu,
}

/// X-form logical and shift operations: `ra = rs op rb`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicOp {
    And,
    Andc,
    Or,
    Orc,
    Xor,
    Nor,
    Nand,
    Eqv,
    Slw,
    Srw,
    Sraw,
}

/// Condition register logical operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrOp {
    And,
    Andc,
    Or,
    Orc,
    Xor,
    Nor,
    Nand,
    Eqv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insn {
    Addi { rd: usize, ra: usize, imm: i16 },
    Addis { rd: usize, ra: usize, imm: i16 },
    Addic { rd: usize, ra: usize, imm: i16, rc: bool },
    Subfic { rd: usize, ra: usize, imm: i16 },
    Mulli { rd: usize, ra: usize, imm: i16 },
    /// `ori`, `oris`, `xori`, `xoris`, `andi.`, `andis.`; `imm` is
    /// already shifted for the `s` forms.
    LogicImm { op: LogicOp, rs: usize, ra: usize, imm: u32, rc: bool },
    Cmpi { crf: usize, ra: usize, imm: i16 },
    Cmpli { crf: usize, ra: usize, imm: u16 },
    Cmp { crf: usize, ra: usize, rb: usize, signed: bool },
    Rlwinm { rs: usize, ra: usize, sh: u32, mb: u32, me: u32, rc: bool },
    Rlwimi { rs: usize, ra: usize, sh: u32, mb: u32, me: u32, rc: bool },
    Rlwnm { rs: usize, ra: usize, rb: usize, mb: u32, me: u32, rc: bool },
    Load { size: MemSize, sign: bool, rd: usize, ra: usize, disp: i16, update: bool },
    Store { size: MemSize, rs: usize, ra: usize, disp: i16, update: bool },
    LoadX { size: MemSize, sign: bool, rd: usize, ra: usize, rb: usize, update: bool },
    StoreX { size: MemSize, rs: usize, ra: usize, rb: usize, update: bool },
    Arith { op: ArithOp, rd: usize, ra: usize, rb: usize, oe: bool, rc: bool },
    Neg { rd: usize, ra: usize, oe: bool, rc: bool },
    Logic { op: LogicOp, rs: usize, ra: usize, rb: usize, rc: bool },
    Srawi { rs: usize, ra: usize, sh: u32, rc: bool },
    /// `extsb` (8) / `extsh` (16).
    Exts { rs: usize, ra: usize, bits: u32, rc: bool },
    Cntlzw { rs: usize, ra: usize, rc: bool },
    Mfspr { rd: usize, spr: Spr },
    Mtspr { rs: usize, spr: Spr },
    Mfcr { rd: usize },
    Mtcrf { rs: usize, fxm: u32 },
    Cr { op: CrOp, bt: u32, ba: u32, bb: u32 },
    B { li: i32, aa: bool, lk: bool },
    Bc { bo: u32, bi: u32, bd: i16, aa: bool, lk: bool },
    Bclr { bo: u32, bi: u32, lk: bool },
    Bcctr { bo: u32, bi: u32, lk: bool },
    Sc,
    /// Synchronisation barriers; no effect here.
    Nop,
}

impl Insn {
    /// Whether the instruction transfers control.
    pub fn ends_block(&self) -> bool {
        matches!(
            self,
            Insn::B { .. } | Insn::Bc { .. } | Insn::Bclr { .. } | Insn::Bcctr { .. } | Insn::Sc
        )
    }

    pub fn family(&self) -> InsnFamily {
        match self {
            Insn::Load { .. } | Insn::Store { .. } | Insn::LoadX { .. } | Insn::StoreX { .. } => {
                InsnFamily::LoadStore
            }
            Insn::Mfspr { .. } | Insn::Mtspr { .. } | Insn::Mfcr { .. } | Insn::Mtcrf { .. } | Insn::Cr { .. } => {
                InsnFamily::SystemRegisters
            }
            Insn::B { .. } | Insn::Bc { .. } | Insn::Bclr { .. } | Insn::Bcctr { .. } | Insn::Sc => {
                InsnFamily::Branch
            }
            _ => InsnFamily::Integer,
        }
    }
}

#[inline]
fn rd(w: u32) -> usize {
    ((w >> 21) & 0x1f) as usize
}

#[inline]
fn ra(w: u32) -> usize {
    ((w >> 16) & 0x1f) as usize
}

#[inline]
fn rb(w: u32) -> usize {
    ((w >> 11) & 0x1f) as usize
}

#[inline]
fn rc(w: u32) -> bool {
    w & 1 != 0
}

/// Decode `w`; `None` for anything outside the subset.
pub fn decode(w: u32) -> Option<Insn> {
    let simm = w as u16 as i16;
    let uimm = w & 0xffff;
    let insn = match w >> 26 {
        7 => Insn::Mulli { rd: rd(w), ra: ra(w), imm: simm },
        8 => Insn::Subfic { rd: rd(w), ra: ra(w), imm: simm },
        10 => Insn::Cmpli { crf: rd(w) >> 2, ra: ra(w), imm: uimm as u16 },
        11 => Insn::Cmpi { crf: rd(w) >> 2, ra: ra(w), imm: simm },
        12 => Insn::Addic { rd: rd(w), ra: ra(w), imm: simm, rc: false },
        13 => Insn::Addic { rd: rd(w), ra: ra(w), imm: simm, rc: true },
        14 => Insn::Addi { rd: rd(w), ra: ra(w), imm: simm },
        15 => Insn::Addis { rd: rd(w), ra: ra(w), imm: simm },
        16 => Insn::Bc {
            bo: (w >> 21) & 0x1f,
            bi: (w >> 16) & 0x1f,
            bd: (w & 0xfffc) as u16 as i16,
            aa: w & 2 != 0,
            lk: w & 1 != 0,
        },
        17 if w & 2 != 0 => Insn::Sc,
        18 => Insn::B {
            // Sign-extend the 26-bit LI field.
            li: ((w & 0x03ff_fffc) << 6) as i32 >> 6,
            aa: w & 2 != 0,
            lk: w & 1 != 0,
        },
        19 => decode_19(w)?,
        20 | 21 => {
            let (sh, mb, me) = ((w >> 11) & 0x1f, (w >> 6) & 0x1f, (w >> 1) & 0x1f);
            if w >> 26 == 20 {
                Insn::Rlwimi { rs: rd(w), ra: ra(w), sh, mb, me, rc: rc(w) }
            } else {
                Insn::Rlwinm { rs: rd(w), ra: ra(w), sh, mb, me, rc: rc(w) }
            }
        }
        23 => Insn::Rlwnm {
            rs: rd(w),
            ra: ra(w),
            rb: rb(w),
            mb: (w >> 6) & 0x1f,
            me: (w >> 1) & 0x1f,
            rc: rc(w),
        },
        // ori 0,0,0
        24 if w == 0x6000_0000 => Insn::Nop,
        op @ 24..=29 => {
            let (op, shifted, rc) = match op {
                24 => (LogicOp::Or, false, false),
                25 => (LogicOp::Or, true, false),
                26 => (LogicOp::Xor, false, false),
                27 => (LogicOp::Xor, true, false),
                28 => (LogicOp::And, false, true),
                _ => (LogicOp::And, true, true),
            };
            let imm = if shifted { uimm << 16 } else { uimm };
            Insn::LogicImm { op, rs: rd(w), ra: ra(w), imm, rc }
        }
        31 => decode_31(w)?,
        op @ 32..=45 => {
            let update = op & 1 != 0;
            let (rt, ra, disp) = (rd(w), ra(w), simm);
            match op & !1 {
                32 => Insn::Load { size: MemSize::U32, sign: false, rd: rt, ra, disp, update },
                34 => Insn::Load { size: MemSize::U8, sign: false, rd: rt, ra, disp, update },
                36 => Insn::Store { size: MemSize::U32, rs: rt, ra, disp, update },
                38 => Insn::Store { size: MemSize::U8, rs: rt, ra, disp, update },
                40 => Insn::Load { size: MemSize::U16, sign: false, rd: rt, ra, disp, update },
                42 => Insn::Load { size: MemSize::U16, sign: true, rd: rt, ra, disp, update },
                _ => Insn::Store { size: MemSize::U16, rs: rt, ra, disp, update },
            }
        }
        _ => return None,
    };
    Some(insn)
}

fn decode_19(w: u32) -> Option<Insn> {
    let (bo, bi, lk) = ((w >> 21) & 0x1f, (w >> 16) & 0x1f, w & 1 != 0);
    let (bt, ba, bb) = ((w >> 21) & 0x1f, (w >> 16) & 0x1f, (w >> 11) & 0x1f);
    let cr = |op| Some(Insn::Cr { op, bt, ba, bb });
    match (w >> 1) & 0x3ff {
        16 => Some(Insn::Bclr { bo, bi, lk }),
        // bcctr with a decrementing BO is an invalid form.
        528 if bo & 4 != 0 => Some(Insn::Bcctr { bo, bi, lk }),
        33 => cr(CrOp::Nor),
        129 => cr(CrOp::Andc),
        150 => Some(Insn::Nop),
        193 => cr(CrOp::Xor),
        225 => cr(CrOp::Nand),
        257 => cr(CrOp::And),
        289 => cr(CrOp::Eqv),
        417 => cr(CrOp::Orc),
        449 => cr(CrOp::Or),
        _ => None,
    }
}

fn decode_31(w: u32) -> Option<Insn> {
    let (rt, a, b, rc) = (rd(w), ra(w), rb(w), rc(w));
    let logic = |op| Some(Insn::Logic { op, rs: rt, ra: a, rb: b, rc });
    let load = |size, sign, update| Some(Insn::LoadX { size, sign, rd: rt, ra: a, rb: b, update });
    let store = |size, update| Some(Insn::StoreX { size, rs: rt, ra: a, rb: b, update });
    match (w >> 1) & 0x3ff {
        0 | 32 => {
            return Some(Insn::Cmp {
                crf: rt >> 2,
                ra: a,
                rb: b,
                signed: (w >> 1) & 0x3ff == 0,
            })
        }
        19 => return Some(Insn::Mfcr { rd: rt }),
        23 => return load(MemSize::U32, false, false),
        24 => return logic(LogicOp::Slw),
        26 => return Some(Insn::Cntlzw { rs: rt, ra: a, rc }),
        28 => return logic(LogicOp::And),
        55 => return load(MemSize::U32, false, true),
        60 => return logic(LogicOp::Andc),
        87 => return load(MemSize::U8, false, false),
        119 => return load(MemSize::U8, false, true),
        124 => return logic(LogicOp::Nor),
        144 => return Some(Insn::Mtcrf { rs: rt, fxm: (w >> 12) & 0xff }),
        151 => return store(MemSize::U32, false),
        183 => return store(MemSize::U32, true),
        215 => return store(MemSize::U8, false),
        247 => return store(MemSize::U8, true),
        279 => return load(MemSize::U16, false, false),
        284 => return logic(LogicOp::Eqv),
        311 => return load(MemSize::U16, false, true),
        316 => return logic(LogicOp::Xor),
        339 => return Spr::from_field(w).map(|spr| Insn::Mfspr { rd: rt, spr }),
        343 => return load(MemSize::U16, true, false),
        407 => return store(MemSize::U16, false),
        412 => return logic(LogicOp::Orc),
        439 => return store(MemSize::U16, true),
        444 => return logic(LogicOp::Or),
        467 => return Spr::from_field(w).map(|spr| Insn::Mtspr { rs: rt, spr }),
        476 => return logic(LogicOp::Nand),
        536 => return logic(LogicOp::Srw),
        598 | 854 => return Some(Insn::Nop),
        792 => return logic(LogicOp::Sraw),
        824 => return Some(Insn::Srawi { rs: rt, ra: a, sh: b as u32, rc }),
        922 => return Some(Insn::Exts { rs: rt, ra: a, bits: 16, rc }),
        954 => return Some(Insn::Exts { rs: rt, ra: a, bits: 8, rc }),
        _ => {}
    }

    // XO-form: 9-bit extended opcode plus the OE bit.
    let oe = w & (1 << 10) != 0;
    let op = match (w >> 1) & 0x1ff {
        8 => ArithOp::Subfc,
        10 => ArithOp::Addc,
        11 => ArithOp::Mulhwu,
        40 => ArithOp::Subf,
        75 => ArithOp::Mulhw,
        104 => return Some(Insn::Neg { rd: rt, ra: a, oe, rc }),
        136 => ArithOp::Subfe,
        138 => ArithOp::Adde,
        235 => ArithOp::Mullw,
        266 => ArithOp::Add,
        459 => ArithOp::Divwu,
        491 => ArithOp::Divw,
        _ => return None,
    };
    Some(Insn::Arith { op, rd: rt, ra: a, rb: b, oe, rc })
}

/// `MASK(mb, me)` with big-endian bit numbering; wraps when
/// `mb > me`.
pub const fn rotate_mask(mb: u32, me: u32) -> u32 {
    let hi = u32::MAX >> mb;
    let lo = u32::MAX << (31 - me);
    if mb <= me {
        hi & lo
    } else {
        hi | lo
    }
}

/// Mask selecting condition register bit `bit` (0 is the MSB).
pub const fn cr_bit(bit: u32) -> u32 {
    1 << (31 - bit)
}

/// Left shift placing a 4-bit value into CR field `crf`.
pub const fn cr_field_shift(crf: usize) -> u32 {
    28 - 4 * crf as u32
}
