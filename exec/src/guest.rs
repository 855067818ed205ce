use dbt_backend::{DirectEmitter, X86_64CodeGen};
use dbt_core::{Context, GuestInsn, GuestMemory, GuestState, InterpFn, Lowered};

use crate::config::InsnFamily;

/// Guest architecture hooks used by the engine.
///
/// The translator asks the guest to lower one instruction at a time;
/// anything the guest leaves `Unhandled` runs through the
/// interpreter entry point instead.
pub trait Guest {
    /// Whether `word` ends a block (branches, traps, and words the
    /// guest cannot decode).
    fn ends_block(&self, word: u32) -> bool;

    /// Family of `word`, or `None` when it does not decode.
    fn family(&self, word: u32) -> Option<InsnFamily>;

    /// Append IR for `insn`. Block-ending instructions must finish
    /// with an unconditional or dynamic exit.
    fn lower(&self, ctx: &mut Context, insn: GuestInsn) -> Lowered;

    /// Emit host code for `insn` directly.
    fn lower_direct(&self, _e: &mut DirectEmitter<'_, X86_64CodeGen>, _insn: GuestInsn) -> Lowered {
        Lowered::Unhandled
    }

    /// Single-instruction interpreter, callable from generated code.
    fn interpreter(&self) -> InterpFn;

    /// Deliver the pending exception bits in `pending`. Returns false
    /// to stop the dispatcher.
    fn handle_exceptions(&mut self, state: &mut GuestState, mem: &mut GuestMemory, pending: u32) -> bool;

    /// Called when the time budget ran out.
    fn refill_budget(&mut self, state: &mut GuestState, slice: i32) {
        state.downcount = state.downcount.saturating_add(slice);
    }
}
