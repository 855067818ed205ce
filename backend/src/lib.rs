pub mod code_region;
pub mod direct;
pub mod fixup;
pub mod liveness;
pub mod operand;
pub mod regalloc;
pub mod translate;
pub mod x86_64;

pub use code_region::{CodeRegion, CodeRegionError, Phase};
pub use direct::DirectEmitter;
pub use fixup::{Fixup, FixupWidth};
pub use operand::{HostReg, Operand, Width};
pub use regalloc::{AllocEvent, AllocStats};
pub use translate::{translate, HostBlock};
pub use x86_64::X86_64CodeGen;

use dbt_core::{Inst, Location, RegSet};

/// Host entry points called from generated code.
///
/// Addresses are absolute host addresses of `extern "C"` functions:
/// `read[n](state, addr) -> u32`, `write[n](state, addr, value)` for
/// 8/16/32-bit accesses, and `interp(state, word)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Helpers {
    pub read: [u64; 3],
    pub write: [u64; 3],
    pub interp: u64,
}

/// An exit emitted into a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitSite {
    /// Static guest target, `None` for a dynamic exit.
    pub target: Option<u32>,
    /// Code-region offset of the patchable `jmp rel32`.
    pub jump_offset: Option<usize>,
}

/// Per-instruction context handed to the code generator.
#[derive(Debug, Clone, Copy)]
pub struct OpEnv<'a> {
    pub helpers: &'a Helpers,
    /// Guest instructions started so far in the block, charged to
    /// the time budget at exits.
    pub cycles: u32,
}

/// Trait for host architecture code generators.
///
/// Each host architecture implements this trait to produce machine
/// code for blocks, the dispatcher trampoline and exit stubs.
pub trait HostCodeGen {
    /// Emit the trampoline prologue: save callee-saved registers, set
    /// up the env pointer, allocate the frame and jump to the block.
    fn emit_prologue(&mut self, buf: &mut CodeRegion);

    /// Emit the dispatcher return path: restore callee-saved registers,
    /// free the frame and return to the caller.
    fn emit_epilogue(&mut self, buf: &mut CodeRegion);

    fn prologue_offset(&self) -> usize;

    /// Offset of the dispatcher return path.
    fn epilogue_offset(&self) -> usize;

    /// Rewrite the patchable jump at `jump_offset` to `target_offset`.
    fn patch_jump(&self, buf: &mut CodeRegion, jump_offset: usize, target_offset: usize);

    /// Emit the block header. Returns `(checked_entry, unchecked_entry)`.
    fn emit_block_entry(&self, buf: &mut CodeRegion) -> (usize, usize);

    /// Emit an exit stub to a static target. Returns the offset of the
    /// patchable jump.
    fn emit_exit(&self, buf: &mut CodeRegion, target: u32, cycles: u32) -> usize;

    /// Emit an exit to the guest address held in `target`.
    fn emit_exit_dynamic(&self, buf: &mut CodeRegion, target: Operand, cycles: u32);

    // -- Register allocator primitives --

    /// Allocatable registers in allocation order.
    fn alloc_order(&self) -> &'static [HostReg];

    /// Registers clobbered by host calls.
    fn caller_saved(&self) -> RegSet;

    /// Number of spill slots in the frame.
    fn spill_slots(&self) -> u32;

    /// Operand addressing an allocated location.
    fn loc_operand(&self, loc: Location) -> Operand;

    /// Emit a 32-bit move between locations.
    fn out_mov(&self, buf: &mut CodeRegion, dst: Operand, src: Operand);

    /// Emit host code for one IR instruction. `out` is the result
    /// register (if the result is used); `args` are the operand
    /// locations. `out` is either the first operand's register or
    /// distinct from every operand register.
    fn out_op(
        &self,
        buf: &mut CodeRegion,
        inst: &Inst,
        out: Option<HostReg>,
        args: &[Operand],
        env: &OpEnv<'_>,
    ) -> Option<ExitSite>;
}
