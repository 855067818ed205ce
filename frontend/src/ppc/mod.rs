//! 32-bit PowerPC user-mode subset.
//!
//! Big-endian integer instructions, branches through LR and CTR, and
//! `sc` for a two-call system interface:
//!
//! | r0 | call  | arguments                     | result     |
//! |----|-------|-------------------------------|------------|
//! | 1  | exit  | r3 = status                   | stops      |
//! | 4  | write | r3 = fd, r4 = buf, r5 = len   | r3 = len   |
//!
//! Unknown calls return `-1` in r3.

pub mod asm;
pub mod decode;
pub mod direct;
pub mod interp;
pub mod lower;

use dbt_backend::{DirectEmitter, X86_64CodeGen};
use dbt_core::state::{EXC_PROGRAM, EXC_SYSCALL};
use dbt_core::{Context, GuestInsn, GuestMemory, GuestState, InterpFn, Lowered};
use dbt_exec::{Guest, InsnFamily};
use tracing::{debug, warn};

pub const SYS_EXIT: u32 = 1;
pub const SYS_WRITE: u32 = 4;

/// Guest-side state of the sample system interface.
#[derive(Debug, Default)]
pub struct PpcGuest {
    /// Bytes written through `write`.
    pub output: Vec<u8>,
    pub exit_code: Option<u32>,
    /// Address of the illegal instruction that stopped the guest.
    pub fault: Option<u32>,
    /// Copy `write` output to the host stdout as well.
    pub echo: bool,
}

impl PpcGuest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_echo(echo: bool) -> Self {
        Self {
            echo,
            ..Self::default()
        }
    }

    /// Whether the guest has exited or faulted.
    pub fn finished(&self) -> bool {
        self.exit_code.is_some() || self.fault.is_some()
    }

    /// Returns false when the guest asked to stop.
    fn syscall(&mut self, state: &mut GuestState, mem: &GuestMemory) -> bool {
        match state.gpr[0] {
            SYS_EXIT => {
                debug!(status = state.gpr[3], "guest exit");
                self.exit_code = Some(state.gpr[3]);
                false
            }
            SYS_WRITE => {
                let (buf, len) = (state.gpr[4], state.gpr[5]);
                let start = self.output.len();
                self.output
                    .extend((0..len).map(|i| mem.read_u8(buf.wrapping_add(i))));
                if self.echo {
                    use std::io::Write;
                    let mut out = std::io::stdout().lock();
                    if let Err(err) = out.write_all(&self.output[start..]).and_then(|()| out.flush()) {
                        warn!(%err, "echoing guest output failed");
                    }
                }
                state.gpr[3] = len;
                true
            }
            n => {
                debug!(n, "unknown system call");
                state.gpr[3] = u32::MAX;
                true
            }
        }
    }
}

impl Guest for PpcGuest {
    fn ends_block(&self, word: u32) -> bool {
        decode::decode(word).map_or(true, |insn| insn.ends_block())
    }

    fn family(&self, word: u32) -> Option<InsnFamily> {
        decode::decode(word).map(|insn| insn.family())
    }

    fn lower(&self, ctx: &mut Context, insn: GuestInsn) -> Lowered {
        lower::lower(ctx, insn)
    }

    fn lower_direct(&self, e: &mut DirectEmitter<'_, X86_64CodeGen>, insn: GuestInsn) -> Lowered {
        direct::lower_direct(e, insn)
    }

    fn interpreter(&self) -> InterpFn {
        interp::ppc_interp
    }

    fn handle_exceptions(&mut self, state: &mut GuestState, mem: &mut GuestMemory, pending: u32) -> bool {
        if pending & EXC_PROGRAM != 0 {
            warn!(pc = format_args!("{:#x}", state.pc), "illegal instruction");
            self.fault = Some(state.pc);
            return false;
        }
        if pending & EXC_SYSCALL != 0 {
            return self.syscall(state, mem);
        }
        true
    }
}
