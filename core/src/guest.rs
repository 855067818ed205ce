use crate::state::GuestState;

/// A fetched guest instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuestInsn {
    pub addr: u32,
    pub word: u32,
}

/// Outcome of lowering one guest instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lowered {
    /// Code for the instruction was emitted.
    Handled,
    /// Nothing was emitted; the translator falls back to the
    /// interpreter for this instruction.
    Unhandled,
}

/// Host entry point that executes one raw instruction word on the
/// given state. Called from generated code.
///
/// The state's `pc` holds the instruction's address on entry and the
/// next pc on return.
pub type InterpFn = unsafe extern "C" fn(state: *mut GuestState, word: u32);
