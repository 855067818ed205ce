use dbt_core::state::{EXC_CODE_WRITE, EXC_PROGRAM, EXC_SYSCALL};
use dbt_core::{GuestMemory, GuestState};
use dbt_frontend::ppc::asm;
use dbt_frontend::ppc::interp::{execute, XER_CA, XER_OV, XER_SO};

fn setup() -> (GuestState, GuestMemory) {
    (GuestState::new(0x100), GuestMemory::new(4096))
}

/// Execute `words` one after another from the current pc.
fn run(st: &mut GuestState, mem: &mut GuestMemory, words: &[u32]) {
    for &w in words {
        execute(st, mem, w);
    }
}

#[test]
fn addi_treats_r0_as_zero() {
    let (mut st, mut mem) = setup();
    st.gpr[0] = 100;
    run(&mut st, &mut mem, &[asm::addi(3, 0, 5), asm::addi(4, 3, -1), asm::lis(5, 0x1234)]);
    assert_eq!(st.gpr[3], 5);
    assert_eq!(st.gpr[4], 4);
    assert_eq!(st.gpr[5], 0x1234_0000);
    assert_eq!(st.pc, 0x10c);
}

#[test]
fn compares_fill_cr_fields() {
    let (mut st, mut mem) = setup();
    st.gpr[3] = u32::MAX;
    run(&mut st, &mut mem, &[asm::cmpwi(0, 3, 0), asm::cmplwi(1, 3, 0)]);
    assert_eq!(st.cr, 0x8400_0000);

    // Summary overflow is copied into every compare.
    st.xer = XER_SO;
    execute(&mut st, &mut mem, asm::cmpw(7, 3, 3));
    assert_eq!(st.cr & 0xf, 0x3);
}

#[test]
fn carry_chain_adds_64_bit_values() {
    let (mut st, mut mem) = setup();
    (st.gpr[3], st.gpr[4]) = (1, u32::MAX);
    (st.gpr[5], st.gpr[6]) = (0, 1);
    run(&mut st, &mut mem, &[asm::addc(8, 4, 6), asm::adde(7, 3, 5)]);
    assert_eq!((st.gpr[7], st.gpr[8]), (2, 0));
}

#[test]
fn subtract_carry_means_no_borrow() {
    let (mut st, mut mem) = setup();
    (st.gpr[4], st.gpr[5]) = (5, 3);
    execute(&mut st, &mut mem, asm::subfc(3, 4, 5));
    assert_eq!(st.gpr[3], (-2i32) as u32);
    assert_eq!(st.xer & XER_CA, 0);

    (st.gpr[4], st.gpr[5]) = (3, 5);
    execute(&mut st, &mut mem, asm::subfc(3, 4, 5));
    assert_eq!(st.gpr[3], 2);
    assert_ne!(st.xer & XER_CA, 0);
}

#[test]
fn overflow_and_record_forms() {
    let (mut st, mut mem) = setup();
    (st.gpr[4], st.gpr[5]) = (0x7fff_ffff, 1);
    execute(&mut st, &mut mem, asm::addo(3, 4, 5));
    assert_eq!(st.gpr[3], 0x8000_0000);
    assert_eq!(st.xer & (XER_OV | XER_SO), XER_OV | XER_SO);

    execute(&mut st, &mut mem, asm::add_rc(3, 4, 5));
    // LT plus the sticky SO bit.
    assert_eq!(st.cr >> 28, 0x9);
}

#[test]
fn algebraic_shifts_set_carry_on_lost_ones() {
    let (mut st, mut mem) = setup();
    st.gpr[4] = (-5i32) as u32;
    execute(&mut st, &mut mem, asm::srawi(3, 4, 1));
    assert_eq!(st.gpr[3], (-3i32) as u32);
    assert_ne!(st.xer & XER_CA, 0);

    st.gpr[4] = (-4i32) as u32;
    execute(&mut st, &mut mem, asm::srawi(3, 4, 1));
    assert_eq!(st.gpr[3], (-2i32) as u32);
    assert_eq!(st.xer & XER_CA, 0);

    (st.gpr[4], st.gpr[5]) = ((-4i32) as u32, 40);
    execute(&mut st, &mut mem, asm::sraw(3, 4, 5));
    assert_eq!(st.gpr[3], u32::MAX);
    assert_ne!(st.xer & XER_CA, 0);
}

#[test]
fn logical_shifts_saturate() {
    let (mut st, mut mem) = setup();
    (st.gpr[4], st.gpr[5]) = (0xffff_ffff, 32);
    run(&mut st, &mut mem, &[asm::slw(3, 4, 5), asm::srw(6, 4, 5)]);
    assert_eq!((st.gpr[3], st.gpr[6]), (0, 0));
    st.gpr[5] = 4;
    execute(&mut st, &mut mem, asm::srw(3, 4, 5));
    assert_eq!(st.gpr[3], 0x0fff_ffff);
}

#[test]
fn rotates() {
    let (mut st, mut mem) = setup();
    st.gpr[4] = 0x1234_5678;
    run(
        &mut st,
        &mut mem,
        &[asm::slwi(3, 4, 8), asm::srwi(5, 4, 4), asm::rlwinm(6, 4, 0, 24, 31)],
    );
    assert_eq!(st.gpr[3], 0x3456_7800);
    assert_eq!(st.gpr[5], 0x0123_4567);
    assert_eq!(st.gpr[6], 0x78);

    (st.gpr[3], st.gpr[4]) = (u32::MAX, 0xab);
    execute(&mut st, &mut mem, asm::rlwimi(3, 4, 8, 16, 23));
    assert_eq!(st.gpr[3], 0xffff_abff);
}

#[test]
fn misc_integer_ops() {
    let (mut st, mut mem) = setup();
    (st.gpr[4], st.gpr[5]) = (u32::MAX, u32::MAX);
    run(&mut st, &mut mem, &[asm::mulhwu(3, 4, 5), asm::mullw(6, 4, 5)]);
    assert_eq!((st.gpr[3], st.gpr[6]), (0xffff_fffe, 1));

    st.gpr[4] = 0x0001_0000;
    execute(&mut st, &mut mem, asm::cntlzw(3, 4));
    assert_eq!(st.gpr[3], 15);

    st.gpr[4] = 0x80;
    execute(&mut st, &mut mem, asm::extsb(3, 4));
    assert_eq!(st.gpr[3], 0xffff_ff80);

    (st.gpr[4], st.gpr[5]) = (7, 0);
    run(&mut st, &mut mem, &[asm::divw(3, 4, 5), asm::divwu(6, 4, 4), asm::neg(7, 4)]);
    assert_eq!(st.gpr[3], 0);
    assert_eq!(st.gpr[6], 1);
    assert_eq!(st.gpr[7], (-7i32) as u32);
}

#[test]
fn loads_and_stores() {
    let (mut st, mut mem) = setup();
    (st.gpr[1], st.gpr[4]) = (0x200, 0xdead_beef);
    run(
        &mut st,
        &mut mem,
        &[asm::stw(4, 1, 8), asm::lbz(5, 1, 8), asm::lhz(6, 1, 10), asm::lha(7, 1, 8)],
    );
    assert_eq!(mem.read_u32(0x208), 0xdead_beef);
    assert_eq!(st.gpr[5], 0xde);
    assert_eq!(st.gpr[6], 0xbeef);
    assert_eq!(st.gpr[7], 0xffff_dead);

    execute(&mut st, &mut mem, asm::stwu(4, 1, -16));
    assert_eq!(st.gpr[1], 0x1f0);
    assert_eq!(mem.read_u32(0x1f0), 0xdead_beef);

    st.gpr[2] = 0x18;
    execute(&mut st, &mut mem, asm::lwzx(8, 1, 2));
    assert_eq!(st.gpr[8], 0xdead_beef);
}

#[test]
fn store_into_code_raises_code_write() {
    let (mut st, mut mem) = setup();
    mem.mark_code(0x200, 4);
    st.gpr[1] = 0x200;
    execute(&mut st, &mut mem, asm::stb(0, 1, 3));
    assert_eq!(st.exceptions, EXC_CODE_WRITE);
    assert_eq!(mem.take_pending_writes(), [(0x203, 1)]);
}

#[test]
fn condition_register_moves() {
    let (mut st, mut mem) = setup();
    st.gpr[3] = 0x1234_5678;
    run(&mut st, &mut mem, &[asm::mtcrf(0x81, 3), asm::mfcr(4)]);
    assert_eq!(st.cr, 0x1000_0008);
    assert_eq!(st.gpr[4], 0x1000_0008);

    st.cr = 1 << (31 - 6);
    execute(&mut st, &mut mem, asm::crxor(6, 6, 6));
    assert_eq!(st.cr, 0);
}

#[test]
fn direct_branches() {
    let (mut st, mut mem) = setup();
    execute(&mut st, &mut mem, asm::b(0x10));
    assert_eq!(st.pc, 0x110);
    execute(&mut st, &mut mem, asm::bl(-0x10));
    assert_eq!((st.pc, st.lr), (0x100, 0x114));
    execute(&mut st, &mut mem, asm::blr());
    assert_eq!(st.pc, 0x114);
}

#[test]
fn conditional_branches() {
    let (mut st, mut mem) = setup();
    st.cr = 0x2000_0000;
    execute(&mut st, &mut mem, asm::beq(0x20));
    assert_eq!(st.pc, 0x120);
    execute(&mut st, &mut mem, asm::bne(0x20));
    assert_eq!(st.pc, 0x124);

    st.ctr = 2;
    execute(&mut st, &mut mem, asm::bdnz(-4));
    assert_eq!((st.pc, st.ctr), (0x120, 1));
    execute(&mut st, &mut mem, asm::bdnz(-4));
    assert_eq!((st.pc, st.ctr), (0x124, 0));
}

#[test]
fn branch_through_ctr_links() {
    let (mut st, mut mem) = setup();
    st.ctr = 0x403;
    execute(&mut st, &mut mem, asm::bctrl());
    assert_eq!((st.pc, st.lr), (0x400, 0x104));
}

#[test]
fn system_call_advances_pc() {
    let (mut st, mut mem) = setup();
    execute(&mut st, &mut mem, asm::sc());
    assert_eq!(st.exceptions, EXC_SYSCALL);
    assert_eq!(st.pc, 0x104);
}

#[test]
fn illegal_word_stays_put() {
    let (mut st, mut mem) = setup();
    execute(&mut st, &mut mem, 0);
    assert_eq!(st.exceptions, EXC_PROGRAM);
    assert_eq!(st.pc, 0x100);
}
