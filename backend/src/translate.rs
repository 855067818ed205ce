use dbt_core::{Context, OpFlags};

use crate::code_region::CodeRegion;
use crate::liveness::liveness_analysis;
use crate::regalloc::{regalloc_and_codegen, AllocEvent, AllocStats};
use crate::{ExitSite, Helpers, HostCodeGen};

/// Host code produced for one block.
#[derive(Debug, Clone, Default)]
pub struct HostBlock {
    pub checked_entry: usize,
    pub unchecked_entry: usize,
    /// Exits in emission order.
    pub exits: Vec<ExitSite>,
    pub host_size: usize,
    pub stats: AllocStats,
}

/// Full IR pipeline: block header, liveness, then register
/// allocation fused with code generation.
///
/// The IR must end in an unconditional exit.
pub fn translate(
    ctx: &mut Context,
    backend: &impl HostCodeGen,
    buf: &mut CodeRegion,
    helpers: &Helpers,
    trace: Option<&mut Vec<AllocEvent>>,
) -> HostBlock {
    debug_assert!(
        ctx.insts()
            .last()
            .is_some_and(|i| i.opc.def().flags.contains(OpFlags::BB_END)),
        "block IR does not end in an exit"
    );
    liveness_analysis(ctx);
    let (checked_entry, unchecked_entry) = backend.emit_block_entry(buf);
    let (exits, stats) = regalloc_and_codegen(ctx, backend, buf, helpers, trace);
    HostBlock {
        checked_entry,
        unchecked_entry,
        exits,
        host_size: buf.offset() - checked_entry,
        stats,
    }
}
