use dbt_core::RegSet;

use crate::operand::Operand;

/// x86-64 general-purpose register indices.
///
/// Encoding matches the x86-64 ModR/M and REX register numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Reg {
    Rax = 0,
    Rcx = 1,
    Rdx = 2,
    Rbx = 3,
    Rsp = 4,
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
}

impl Reg {
    /// ModR/M register field; REX supplies the fourth bit.
    #[inline]
    pub const fn low3(self) -> u8 {
        (self as u8) & 0x7
    }

    #[inline]
    pub const fn op(self) -> Operand {
        Operand::Reg(self as u8)
    }
}

/// RBP holds the guest state pointer in all generated code.
pub const ENV_REG: Reg = Reg::Rbp;

/// Scratch registers for code generation; never allocated.
pub const SCRATCH0: Reg = Reg::Rax;
pub const SCRATCH1: Reg = Reg::Rcx;

/// Callee-saved registers the prologue saves and restores
/// (System V ABI).
pub const CALLEE_SAVED: &[Reg] = &[Reg::Rbp, Reg::Rbx, Reg::R12, Reg::R13, Reg::R14, Reg::R15];

/// Function argument registers (System V AMD64 ABI).
pub const CALL_ARG_REGS: &[Reg] = &[Reg::Rdi, Reg::Rsi, Reg::Rdx, Reg::Rcx, Reg::R8, Reg::R9];

/// Allocation order. Callee-saved first so values survive helper
/// calls without spilling.
pub const ALLOC_ORDER: &[Reg] = &[
    Reg::Rbx,
    Reg::R12,
    Reg::R13,
    Reg::R14,
    Reg::R15,
    Reg::Rsi,
    Reg::Rdi,
    Reg::R8,
    Reg::R9,
    Reg::R10,
    Reg::R11,
    Reg::Rdx,
];

/// Allocatable registers a host call may clobber. RAX and RCX are
/// clobbered too but never hold values.
pub const CALLER_SAVED: RegSet = RegSet::of(&[
    Reg::Rdx as u8,
    Reg::Rsi as u8,
    Reg::Rdi as u8,
    Reg::R8 as u8,
    Reg::R9 as u8,
    Reg::R10 as u8,
    Reg::R11 as u8,
]);

// Frame below the callee-saved pushes:
//
//   rsp + 0                     outgoing call area
//   rsp + CALL_AREA             spill slot 0
//   rsp + CALL_AREA + 8 * n     spill slot n

/// Bytes kept free at the bottom of the frame for host calls.
pub const CALL_AREA: usize = 128;
/// Number of 8-byte spill slots in the frame.
pub const SPILL_SLOTS: usize = 128;

/// Return address plus callee-saved pushes.
const PUSHED: usize = (1 + CALLEE_SAVED.len()) * 8;

/// `sub rsp` amount after the pushes; keeps RSP 16-byte aligned at
/// calls.
pub const STACK_ADDEND: usize = {
    let frame = PUSHED + CALL_AREA + SPILL_SLOTS * 8;
    ((frame + 15) & !15) - PUSHED
};

/// Frame operand of spill slot `slot`.
pub fn spill_slot(slot: u32) -> Operand {
    assert!(
        (slot as usize) < SPILL_SLOTS,
        "spill area overflow: slot {slot}"
    );
    Operand::Mem {
        base: Reg::Rsp as u8,
        disp: (CALL_AREA + slot as usize * 8) as i32,
    }
}

/// Guest state field operand at `off`.
pub fn env_field(off: u32) -> Operand {
    Operand::Mem {
        base: ENV_REG as u8,
        disp: off as i32,
    }
}
