use dbt_core::state::{EXC_PROGRAM, EXC_SYSCALL};
use dbt_core::{GuestMemory, GuestState};
use dbt_exec::Guest;
use dbt_frontend::ppc::{asm, SYS_EXIT, SYS_WRITE};
use dbt_frontend::PpcGuest;

fn setup() -> (PpcGuest, GuestState, GuestMemory) {
    (PpcGuest::new(), GuestState::new(0x1000), GuestMemory::new(4096))
}

#[test]
fn write_collects_output() {
    let (mut guest, mut st, mut mem) = setup();
    mem.load(0x200, b"hi\n");
    st.gpr[0] = SYS_WRITE;
    (st.gpr[3], st.gpr[4], st.gpr[5]) = (1, 0x200, 3);
    assert!(guest.handle_exceptions(&mut st, &mut mem, EXC_SYSCALL));
    assert_eq!(guest.output, b"hi\n");
    assert_eq!(st.gpr[3], 3);
    assert!(!guest.finished());
}

#[test]
fn exit_stops_with_status() {
    let (mut guest, mut st, mut mem) = setup();
    st.gpr[0] = SYS_EXIT;
    st.gpr[3] = 7;
    assert!(!guest.handle_exceptions(&mut st, &mut mem, EXC_SYSCALL));
    assert_eq!(guest.exit_code, Some(7));
    assert!(guest.finished());
}

#[test]
fn unknown_call_fails_softly() {
    let (mut guest, mut st, mut mem) = setup();
    st.gpr[0] = 99;
    assert!(guest.handle_exceptions(&mut st, &mut mem, EXC_SYSCALL));
    assert_eq!(st.gpr[3], u32::MAX);
}

#[test]
fn illegal_instruction_faults() {
    let (mut guest, mut st, mut mem) = setup();
    assert!(!guest.handle_exceptions(&mut st, &mut mem, EXC_PROGRAM | EXC_SYSCALL));
    assert_eq!(guest.fault, Some(0x1000));
    assert_eq!(guest.exit_code, None);
}

#[test]
fn block_boundaries() {
    let guest = PpcGuest::new();
    assert!(guest.ends_block(asm::b(4)));
    assert!(guest.ends_block(asm::sc()));
    assert!(guest.ends_block(0));
    assert!(!guest.ends_block(asm::nop()));
    assert!(!guest.ends_block(asm::stw(0, 1, 4)));
}
