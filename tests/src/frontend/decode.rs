use dbt_core::MemSize;
use dbt_exec::InsnFamily;
use dbt_frontend::ppc::asm;
use dbt_frontend::ppc::decode::{cr_bit, cr_field_shift, decode, rotate_mask, ArithOp, Insn, LogicOp, Spr};

#[test]
fn immediate_forms() {
    assert_eq!(decode(asm::li(3, -1)), Some(Insn::Addi { rd: 3, ra: 0, imm: -1 }));
    assert_eq!(
        decode(asm::oris(4, 5, 0x1234)),
        Some(Insn::LogicImm { op: LogicOp::Or, rs: 5, ra: 4, imm: 0x1234_0000, rc: false })
    );
    assert_eq!(
        decode(asm::andi_rc(4, 5, 0xff)),
        Some(Insn::LogicImm { op: LogicOp::And, rs: 5, ra: 4, imm: 0xff, rc: true })
    );
    assert_eq!(decode(asm::cmpwi(7, 3, -2)), Some(Insn::Cmpi { crf: 7, ra: 3, imm: -2 }));
}

#[test]
fn register_forms() {
    assert_eq!(
        decode(asm::subf(3, 4, 5)),
        Some(Insn::Arith { op: ArithOp::Subf, rd: 3, ra: 4, rb: 5, oe: false, rc: false })
    );
    assert_eq!(
        decode(asm::addo(3, 4, 5)),
        Some(Insn::Arith { op: ArithOp::Add, rd: 3, ra: 4, rb: 5, oe: true, rc: false })
    );
    assert_eq!(
        decode(asm::add_rc(3, 4, 5)),
        Some(Insn::Arith { op: ArithOp::Add, rd: 3, ra: 4, rb: 5, oe: false, rc: true })
    );
    assert_eq!(decode(asm::cmplw(1, 3, 4)), Some(Insn::Cmp { crf: 1, ra: 3, rb: 4, signed: false }));
    assert_eq!(
        decode(asm::lwzx(3, 4, 5)),
        Some(Insn::LoadX { size: MemSize::U32, sign: false, rd: 3, ra: 4, rb: 5, update: false })
    );
}

#[test]
fn memory_forms() {
    assert_eq!(
        decode(asm::lha(3, 1, -8)),
        Some(Insn::Load { size: MemSize::U16, sign: true, rd: 3, ra: 1, disp: -8, update: false })
    );
    assert_eq!(
        decode(asm::stwu(1, 1, -16)),
        Some(Insn::Store { size: MemSize::U32, rs: 1, ra: 1, disp: -16, update: true })
    );
}

#[test]
fn special_registers() {
    assert_eq!(decode(asm::mflr(0)), Some(Insn::Mfspr { rd: 0, spr: Spr::Lr }));
    assert_eq!(decode(asm::mtctr(9)), Some(Insn::Mtspr { rs: 9, spr: Spr::Ctr }));
    assert_eq!(decode(asm::mfspr(3, 1)), Some(Insn::Mfspr { rd: 3, spr: Spr::Xer }));
    // Unsupported SPR numbers do not decode.
    assert_eq!(decode(asm::mfspr(3, 268)), None);
}

#[test]
fn branches() {
    assert_eq!(decode(asm::b(-4)), Some(Insn::B { li: -4, aa: false, lk: false }));
    assert_eq!(decode(asm::bl(0x1000)), Some(Insn::B { li: 0x1000, aa: false, lk: true }));
    assert_eq!(
        decode(asm::bdnz(-8)),
        Some(Insn::Bc { bo: asm::BO_DNZ, bi: 0, bd: -8, aa: false, lk: false })
    );
    assert_eq!(decode(asm::blr()), Some(Insn::Bclr { bo: asm::BO_ALWAYS, bi: 0, lk: false }));
    assert_eq!(decode(asm::bctrl()), Some(Insn::Bcctr { bo: asm::BO_ALWAYS, bi: 0, lk: true }));
    assert_eq!(decode(asm::sc()), Some(Insn::Sc));
}

#[test]
fn invalid_words() {
    assert_eq!(decode(0), None);
    assert_eq!(decode(0x0000_1234), None);
    assert_eq!(decode(0xffff_ffff), None);
    // bcctr that decrements CTR.
    assert_eq!(decode((19 << 26) | (asm::BO_DNZ << 21) | (528 << 1)), None);
}

#[test]
fn block_enders() {
    let ends = |w| decode(w).unwrap().ends_block();
    assert!(ends(asm::b(8)));
    assert!(ends(asm::beq(8)));
    assert!(ends(asm::blr()));
    assert!(ends(asm::bctr()));
    assert!(ends(asm::sc()));
    assert!(!ends(asm::add(3, 4, 5)));
    assert!(!ends(asm::mtlr(0)));
}

#[test]
fn masks_and_fields() {
    assert_eq!(rotate_mask(0, 31), u32::MAX);
    assert_eq!(rotate_mask(24, 31), 0xff);
    assert_eq!(rotate_mask(0, 0), 0x8000_0000);
    assert_eq!(rotate_mask(28, 3), 0xf000_000f);
    assert_eq!(cr_bit(0), 0x8000_0000);
    assert_eq!(cr_bit(31), 1);
    assert_eq!(cr_field_shift(0), 28);
    assert_eq!(cr_field_shift(7), 0);
}

#[test]
fn families() {
    let family = |w| decode(w).map(|i| i.family());
    assert_eq!(family(asm::add(3, 4, 5)), Some(InsnFamily::Integer));
    assert_eq!(family(asm::rlwinm(3, 4, 2, 0, 29)), Some(InsnFamily::Integer));
    assert_eq!(family(asm::lwzx(3, 4, 5)), Some(InsnFamily::LoadStore));
    assert_eq!(family(asm::stwu(1, 1, -16)), Some(InsnFamily::LoadStore));
    assert_eq!(family(asm::mtctr(3)), Some(InsnFamily::SystemRegisters));
    assert_eq!(family(asm::blr()), Some(InsnFamily::Branch));
    assert_eq!(family(asm::sc()), Some(InsnFamily::Branch));
    assert_eq!(family(0), None);
}
