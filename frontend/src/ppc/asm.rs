//! Instruction encoders for hand-assembled guest programs.
//!
//! Register arguments are GPR numbers, branch displacements are byte
//! offsets from the branch itself.

fn d_form(op: u32, rt: u32, ra: u32, imm: u16) -> u32 {
    (op << 26) | (rt << 21) | (ra << 16) | imm as u32
}

fn x_form(rt: u32, ra: u32, rb: u32, xo: u32, rc: bool) -> u32 {
    (31 << 26) | (rt << 21) | (ra << 16) | (rb << 11) | (xo << 1) | rc as u32
}

/// BO: branch if the CR bit is set.
pub const BO_TRUE: u32 = 12;
/// BO: branch if the CR bit is clear.
pub const BO_FALSE: u32 = 4;
/// BO: decrement CTR, branch if it is non-zero.
pub const BO_DNZ: u32 = 16;
/// BO: branch always.
pub const BO_ALWAYS: u32 = 20;

/// CR0 bits as BI values.
pub const CR0_LT: u32 = 0;
pub const CR0_GT: u32 = 1;
pub const CR0_EQ: u32 = 2;

pub fn addi(rd: u32, ra: u32, imm: i16) -> u32 {
    d_form(14, rd, ra, imm as u16)
}

pub fn addis(rd: u32, ra: u32, imm: i16) -> u32 {
    d_form(15, rd, ra, imm as u16)
}

pub fn li(rd: u32, imm: i16) -> u32 {
    addi(rd, 0, imm)
}

pub fn lis(rd: u32, imm: i16) -> u32 {
    addis(rd, 0, imm)
}

pub fn addic(rd: u32, ra: u32, imm: i16) -> u32 {
    d_form(12, rd, ra, imm as u16)
}

pub fn mulli(rd: u32, ra: u32, imm: i16) -> u32 {
    d_form(7, rd, ra, imm as u16)
}

pub fn ori(ra: u32, rs: u32, imm: u16) -> u32 {
    d_form(24, rs, ra, imm)
}

pub fn oris(ra: u32, rs: u32, imm: u16) -> u32 {
    d_form(25, rs, ra, imm)
}

pub fn xori(ra: u32, rs: u32, imm: u16) -> u32 {
    d_form(26, rs, ra, imm)
}

pub fn andi_rc(ra: u32, rs: u32, imm: u16) -> u32 {
    d_form(28, rs, ra, imm)
}

pub fn nop() -> u32 {
    ori(0, 0, 0)
}

pub fn cmpwi(crf: u32, ra: u32, imm: i16) -> u32 {
    d_form(11, crf << 2, ra, imm as u16)
}

pub fn cmplwi(crf: u32, ra: u32, imm: u16) -> u32 {
    d_form(10, crf << 2, ra, imm)
}

pub fn cmpw(crf: u32, ra: u32, rb: u32) -> u32 {
    x_form(crf << 2, ra, rb, 0, false)
}

pub fn cmplw(crf: u32, ra: u32, rb: u32) -> u32 {
    x_form(crf << 2, ra, rb, 32, false)
}

pub fn add(rd: u32, ra: u32, rb: u32) -> u32 {
    x_form(rd, ra, rb, 266, false)
}

pub fn add_rc(rd: u32, ra: u32, rb: u32) -> u32 {
    x_form(rd, ra, rb, 266, true)
}

pub fn addo(rd: u32, ra: u32, rb: u32) -> u32 {
    x_form(rd, ra, rb, 266 | 0x200, false)
}

pub fn addc(rd: u32, ra: u32, rb: u32) -> u32 {
    x_form(rd, ra, rb, 10, false)
}

pub fn adde(rd: u32, ra: u32, rb: u32) -> u32 {
    x_form(rd, ra, rb, 138, false)
}

pub fn subf(rd: u32, ra: u32, rb: u32) -> u32 {
    x_form(rd, ra, rb, 40, false)
}

pub fn subfc(rd: u32, ra: u32, rb: u32) -> u32 {
    x_form(rd, ra, rb, 8, false)
}

pub fn mullw(rd: u32, ra: u32, rb: u32) -> u32 {
    x_form(rd, ra, rb, 235, false)
}

pub fn mulhwu(rd: u32, ra: u32, rb: u32) -> u32 {
    x_form(rd, ra, rb, 11, false)
}

pub fn divw(rd: u32, ra: u32, rb: u32) -> u32 {
    x_form(rd, ra, rb, 491, false)
}

pub fn divwu(rd: u32, ra: u32, rb: u32) -> u32 {
    x_form(rd, ra, rb, 459, false)
}

pub fn neg(rd: u32, ra: u32) -> u32 {
    x_form(rd, ra, 0, 104, false)
}

pub fn and(ra: u32, rs: u32, rb: u32) -> u32 {
    x_form(rs, ra, rb, 28, false)
}

pub fn andc(ra: u32, rs: u32, rb: u32) -> u32 {
    x_form(rs, ra, rb, 60, false)
}

pub fn or(ra: u32, rs: u32, rb: u32) -> u32 {
    x_form(rs, ra, rb, 444, false)
}

pub fn mr(ra: u32, rs: u32) -> u32 {
    or(ra, rs, rs)
}

pub fn xor(ra: u32, rs: u32, rb: u32) -> u32 {
    x_form(rs, ra, rb, 316, false)
}

pub fn nor(ra: u32, rs: u32, rb: u32) -> u32 {
    x_form(rs, ra, rb, 124, false)
}

pub fn slw(ra: u32, rs: u32, rb: u32) -> u32 {
    x_form(rs, ra, rb, 24, false)
}

pub fn srw(ra: u32, rs: u32, rb: u32) -> u32 {
    x_form(rs, ra, rb, 536, false)
}

pub fn sraw(ra: u32, rs: u32, rb: u32) -> u32 {
    x_form(rs, ra, rb, 792, false)
}

pub fn srawi(ra: u32, rs: u32, sh: u32) -> u32 {
    x_form(rs, ra, sh, 824, false)
}

pub fn extsb(ra: u32, rs: u32) -> u32 {
    x_form(rs, ra, 0, 954, false)
}

pub fn extsh(ra: u32, rs: u32) -> u32 {
    x_form(rs, ra, 0, 922, false)
}

pub fn cntlzw(ra: u32, rs: u32) -> u32 {
    x_form(rs, ra, 0, 26, false)
}

pub fn rlwinm(ra: u32, rs: u32, sh: u32, mb: u32, me: u32) -> u32 {
    (21 << 26) | (rs << 21) | (ra << 16) | (sh << 11) | (mb << 6) | (me << 1)
}

pub fn rlwimi(ra: u32, rs: u32, sh: u32, mb: u32, me: u32) -> u32 {
    (20 << 26) | (rs << 21) | (ra << 16) | (sh << 11) | (mb << 6) | (me << 1)
}

pub fn slwi(ra: u32, rs: u32, n: u32) -> u32 {
    rlwinm(ra, rs, n, 0, 31 - n)
}

pub fn srwi(ra: u32, rs: u32, n: u32) -> u32 {
    rlwinm(ra, rs, (32 - n) & 31, n, 31)
}

pub fn lwz(rd: u32, ra: u32, disp: i16) -> u32 {
    d_form(32, rd, ra, disp as u16)
}

pub fn lwzu(rd: u32, ra: u32, disp: i16) -> u32 {
    d_form(33, rd, ra, disp as u16)
}

pub fn lbz(rd: u32, ra: u32, disp: i16) -> u32 {
    d_form(34, rd, ra, disp as u16)
}

pub fn lhz(rd: u32, ra: u32, disp: i16) -> u32 {
    d_form(40, rd, ra, disp as u16)
}

pub fn lha(rd: u32, ra: u32, disp: i16) -> u32 {
    d_form(42, rd, ra, disp as u16)
}

pub fn stw(rs: u32, ra: u32, disp: i16) -> u32 {
    d_form(36, rs, ra, disp as u16)
}

pub fn stwu(rs: u32, ra: u32, disp: i16) -> u32 {
    d_form(37, rs, ra, disp as u16)
}

pub fn stb(rs: u32, ra: u32, disp: i16) -> u32 {
    d_form(38, rs, ra, disp as u16)
}

pub fn sth(rs: u32, ra: u32, disp: i16) -> u32 {
    d_form(44, rs, ra, disp as u16)
}

pub fn lwzx(rd: u32, ra: u32, rb: u32) -> u32 {
    x_form(rd, ra, rb, 23, false)
}

pub fn stwx(rs: u32, ra: u32, rb: u32) -> u32 {
    x_form(rs, ra, rb, 151, false)
}

fn spr_field(spr: u32) -> u32 {
    ((spr & 0x1f) << 5) | (spr >> 5)
}

pub fn mfspr(rd: u32, spr: u32) -> u32 {
    x_form(rd, 0, 0, 339, false) | (spr_field(spr) << 11)
}

pub fn mtspr(spr: u32, rs: u32) -> u32 {
    x_form(rs, 0, 0, 467, false) | (spr_field(spr) << 11)
}

pub fn mflr(rd: u32) -> u32 {
    mfspr(rd, 8)
}

pub fn mtlr(rs: u32) -> u32 {
    mtspr(8, rs)
}

pub fn mtctr(rs: u32) -> u32 {
    mtspr(9, rs)
}

pub fn mfcr(rd: u32) -> u32 {
    x_form(rd, 0, 0, 19, false)
}

pub fn mtcrf(fxm: u32, rs: u32) -> u32 {
    x_form(rs, 0, 0, 144, false) | (fxm << 12)
}

pub fn crxor(bt: u32, ba: u32, bb: u32) -> u32 {
    (19 << 26) | (bt << 21) | (ba << 16) | (bb << 11) | (193 << 1)
}

pub fn b(disp: i32) -> u32 {
    (18 << 26) | (disp as u32 & 0x03ff_fffc)
}

pub fn bl(disp: i32) -> u32 {
    b(disp) | 1
}

pub fn ba(target: u32) -> u32 {
    (18 << 26) | (target & 0x03ff_fffc) | 2
}

pub fn bc(bo: u32, bi: u32, disp: i16) -> u32 {
    (16 << 26) | (bo << 21) | (bi << 16) | (disp as u16 as u32 & 0xfffc)
}

pub fn beq(disp: i16) -> u32 {
    bc(BO_TRUE, CR0_EQ, disp)
}

pub fn bne(disp: i16) -> u32 {
    bc(BO_FALSE, CR0_EQ, disp)
}

pub fn blt(disp: i16) -> u32 {
    bc(BO_TRUE, CR0_LT, disp)
}

pub fn bdnz(disp: i16) -> u32 {
    bc(BO_DNZ, 0, disp)
}

pub fn bclr(bo: u32, bi: u32) -> u32 {
    (19 << 26) | (bo << 21) | (bi << 16) | (16 << 1)
}

pub fn blr() -> u32 {
    bclr(BO_ALWAYS, 0)
}

pub fn bctr() -> u32 {
    (19 << 26) | (BO_ALWAYS << 21) | (528 << 1)
}

pub fn bctrl() -> u32 {
    bctr() | 1
}

pub fn sc() -> u32 {
    (17 << 26) | 2
}
