//! Guest CPU state shared between the dispatcher, host helpers and
//! generated code.
//!
//! Generated code addresses fields relative to the env register,
//! so the layout is fixed with `#[repr(C)]` and every offset used
//! by code generation is exported below.

use crate::memory::GuestMemory;

/// Number of guest general purpose registers.
pub const NUM_GPRS: usize = 32;

// -- Pending exception bits --

/// The guest executed a system call.
pub const EXC_SYSCALL: u32 = 1 << 0;
/// A store hit a line holding translated code.
pub const EXC_CODE_WRITE: u32 = 1 << 1;
/// Illegal or unimplemented instruction.
pub const EXC_PROGRAM: u32 = 1 << 2;

#[repr(C)]
pub struct GuestState {
    pub gpr: [u32; NUM_GPRS],
    pub pc: u32,
    pub lr: u32,
    pub ctr: u32,
    pub cr: u32,
    pub xer: u32,
    /// Remaining time budget in guest instructions.
    pub downcount: i32,
    /// Pending `EXC_*` bits.
    pub exceptions: u32,
    /// Instructions executed through the interpreter helper.
    pub fallbacks: u32,
    /// Guest memory used by host helpers. Refreshed by the
    /// dispatcher before every block entry.
    pub mem: *mut GuestMemory,
}

pub const fn gpr_offset(n: usize) -> u32 {
    (n * 4) as u32
}

pub const PC_OFFSET: u32 = 128;
pub const LR_OFFSET: u32 = 132;
pub const CTR_OFFSET: u32 = 136;
pub const CR_OFFSET: u32 = 140;
pub const XER_OFFSET: u32 = 144;
pub const DOWNCOUNT_OFFSET: u32 = 148;
pub const EXCEPTIONS_OFFSET: u32 = 152;
pub const FALLBACKS_OFFSET: u32 = 156;
pub const MEM_OFFSET: u32 = 160;

const _: () = {
    assert!(std::mem::offset_of!(GuestState, pc) == PC_OFFSET as usize);
    assert!(std::mem::offset_of!(GuestState, lr) == LR_OFFSET as usize);
    assert!(std::mem::offset_of!(GuestState, ctr) == CTR_OFFSET as usize);
    assert!(std::mem::offset_of!(GuestState, cr) == CR_OFFSET as usize);
    assert!(std::mem::offset_of!(GuestState, xer) == XER_OFFSET as usize);
    assert!(std::mem::offset_of!(GuestState, downcount) == DOWNCOUNT_OFFSET as usize);
    assert!(std::mem::offset_of!(GuestState, exceptions) == EXCEPTIONS_OFFSET as usize);
    assert!(std::mem::offset_of!(GuestState, fallbacks) == FALLBACKS_OFFSET as usize);
    assert!(std::mem::offset_of!(GuestState, mem) == MEM_OFFSET as usize);
};

impl GuestState {
    pub fn new(pc: u32) -> Self {
        Self {
            gpr: [0; NUM_GPRS],
            pc,
            lr: 0,
            ctr: 0,
            cr: 0,
            xer: 0,
            downcount: 0,
            exceptions: 0,
            fallbacks: 0,
            mem: std::ptr::null_mut(),
        }
    }

    /// Read a 32-bit field by its state offset.
    pub fn read_offset(&self, off: u32) -> u32 {
        match off {
            o if o < PC_OFFSET => self.gpr[(o / 4) as usize],
            PC_OFFSET => self.pc,
            LR_OFFSET => self.lr,
            CTR_OFFSET => self.ctr,
            CR_OFFSET => self.cr,
            XER_OFFSET => self.xer,
            DOWNCOUNT_OFFSET => self.downcount as u32,
            EXCEPTIONS_OFFSET => self.exceptions,
            FALLBACKS_OFFSET => self.fallbacks,
            _ => panic!("no 32-bit guest state field at offset {off}"),
        }
    }

    /// Raise pending exception bits.
    pub fn raise(&mut self, bits: u32) {
        self.exceptions |= bits;
    }
}

impl Default for GuestState {
    fn default() -> Self {
        Self::new(0)
    }
}

impl std::fmt::Debug for GuestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuestState")
            .field("pc", &format_args!("{:#010x}", self.pc))
            .field("lr", &format_args!("{:#010x}", self.lr))
            .field("ctr", &self.ctr)
            .field("cr", &format_args!("{:#010x}", self.cr))
            .field("downcount", &self.downcount)
            .field("exceptions", &self.exceptions)
            .field("gpr", &self.gpr)
            .finish()
    }
}
