//! Host functions called from generated code for guest memory
//! accesses.
//!
//! Every helper receives the guest state pointer held in the env
//! register; guest memory is reached through `GuestState::mem`,
//! which the dispatcher refreshes before entering a block.

use dbt_backend::Helpers;
use dbt_core::state::EXC_CODE_WRITE;
use dbt_core::{GuestMemory, GuestState, InterpFn};

/// # Safety
///
/// `state` must point to a live `GuestState` whose `mem` points to
/// a live `GuestMemory` not otherwise borrowed.
unsafe fn memory<'a>(state: *mut GuestState) -> (&'a mut GuestState, &'a mut GuestMemory) {
    let st = &mut *state;
    let mem = &mut *st.mem;
    (st, mem)
}

/// # Safety
///
/// See [`memory`].
pub unsafe extern "C" fn helper_read_u8(state: *mut GuestState, addr: u32) -> u32 {
    let (_, mem) = memory(state);
    mem.read_u8(addr) as u32
}

/// # Safety
///
/// See [`memory`].
pub unsafe extern "C" fn helper_read_u16(state: *mut GuestState, addr: u32) -> u32 {
    let (_, mem) = memory(state);
    mem.read_u16(addr) as u32
}

/// # Safety
///
/// See [`memory`].
pub unsafe extern "C" fn helper_read_u32(state: *mut GuestState, addr: u32) -> u32 {
    let (_, mem) = memory(state);
    mem.read_u32(addr)
}

/// Stores raise `EXC_CODE_WRITE` when they hit translated code, so
/// the next exit stub returns to the dispatcher.
///
/// # Safety
///
/// See [`memory`].
pub unsafe extern "C" fn helper_write_u8(state: *mut GuestState, addr: u32, val: u32) {
    let (st, mem) = memory(state);
    if mem.write_u8(addr, val as u8) {
        st.raise(EXC_CODE_WRITE);
    }
}

/// # Safety
///
/// See [`memory`].
pub unsafe extern "C" fn helper_write_u16(state: *mut GuestState, addr: u32, val: u32) {
    let (st, mem) = memory(state);
    if mem.write_u16(addr, val as u16) {
        st.raise(EXC_CODE_WRITE);
    }
}

/// # Safety
///
/// See [`memory`].
pub unsafe extern "C" fn helper_write_u32(state: *mut GuestState, addr: u32, val: u32) {
    let (st, mem) = memory(state);
    if mem.write_u32(addr, val) {
        st.raise(EXC_CODE_WRITE);
    }
}

/// Helper table for code generation.
pub fn host_helpers(interp: InterpFn) -> Helpers {
    Helpers {
        read: [
            helper_read_u8 as usize as u64,
            helper_read_u16 as usize as u64,
            helper_read_u32 as usize as u64,
        ],
        write: [
            helper_write_u8 as usize as u64,
            helper_write_u16 as usize as u64,
            helper_write_u32 as usize as u64,
        ],
        interp: interp as usize as u64,
    }
}
