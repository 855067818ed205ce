//! Dispatcher loop.
//!
//! Each iteration services pending guest code writes and
//! exceptions, refills the time budget, looks up (or compiles) the
//! block at the guest pc and enters it through the trampoline.
//! Control comes back whenever an exit stub finds the budget spent,
//! an exception pending, or its branch unlinked.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dbt_backend::{CodeRegion, HostCodeGen, X86_64CodeGen};
use dbt_core::state::EXC_CODE_WRITE;
use dbt_core::GuestState;
use tracing::{debug, info};

use crate::config::CoreMode;
use crate::error::EngineError;
use crate::guest::Guest;
use crate::translator::Translator;
use crate::Engine;

/// Stops a running dispatcher from another thread.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn request_stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Host trampoline signature: `(guest state, block entry) -> 0`.
type Trampoline = unsafe extern "C" fn(*mut GuestState, *const u8) -> u32;

/// Enter generated code at `entry` and run until an exit stub
/// returns to the dispatcher.
///
/// # Safety
///
/// The region must be executable and hold the trampoline and a
/// finalized block at `entry`. `state.mem` must point to the guest
/// memory the block was translated against.
unsafe fn cpu_block_exec(
    region: &CodeRegion,
    backend: &X86_64CodeGen,
    state: *mut GuestState,
    entry: usize,
) -> u32 {
    let tramp: Trampoline = std::mem::transmute(region.ptr_at(backend.prologue_offset()));
    tramp(state, region.ptr_at(entry))
}

impl<G: Guest> Engine<G> {
    /// Run until a stop is requested through the [`StopHandle`] or
    /// the guest's exception hook.
    pub fn run(&mut self) -> Result<(), EngineError> {
        info!(pc = format_args!("{:#x}", self.state.pc), "dispatcher started");
        while !self.stop.is_stop_requested() {
            self.step()?;
        }
        self.stop.reset();
        info!(
            pc = format_args!("{:#x}", self.state.pc),
            dispatches = self.stats.dispatches,
            "dispatcher stopped"
        );
        Ok(())
    }

    /// One dispatcher iteration.
    pub fn step(&mut self) -> Result<(), EngineError> {
        self.drain_code_writes()?;
        self.deliver_exceptions();
        // The exception hook may have stored into code.
        self.drain_code_writes()?;
        if self.stop.is_stop_requested() {
            return Ok(());
        }

        if self.state.downcount <= 0 {
            self.guest.refill_budget(&mut self.state, self.config.time_slice);
            if self.state.downcount <= 0 {
                return Ok(());
            }
        }

        match self.config.core {
            CoreMode::Interpreter => self.step_interpreter(),
            CoreMode::Jit => {
                let pc = self.state.pc;
                let index = match self.cache.lookup(pc) {
                    Some(index) => index,
                    None => self.compile(pc)?,
                };
                self.enter_block(index)?;
            }
        }
        Ok(())
    }

    /// Invalidate blocks hit by queued guest stores.
    fn drain_code_writes(&mut self) -> Result<(), EngineError> {
        if self.memory.has_pending_writes() {
            self.region.set_writable()?;
            for (addr, len) in self.memory.take_pending_writes() {
                let n = self.cache.invalidate(addr, len, &mut self.region, &self.backend);
                self.cache.forget_words(addr, len);
                debug!(n, "guest store of {len} bytes at {addr:#x} hit code");
            }
        }
        self.state.exceptions &= !EXC_CODE_WRITE;
        Ok(())
    }

    fn deliver_exceptions(&mut self) {
        let pending = std::mem::take(&mut self.state.exceptions);
        if pending != 0 && !self.guest.handle_exceptions(&mut self.state, &mut self.memory, pending) {
            self.stop.request_stop();
        }
    }

    /// Compile the block at `pc` without running it. Flushes first
    /// when the cache is full, or always with `no_block_cache`.
    pub fn translate(&mut self, pc: u32) -> Result<usize, EngineError> {
        self.compile(pc)
    }

    fn compile(&mut self, pc: u32) -> Result<usize, EngineError> {
        if self.is_full() || (self.config.no_block_cache && !self.cache.is_empty()) {
            self.flush()?;
        }
        self.region.set_writable()?;
        let index = self.cache.allocate(pc);
        let translated = Translator {
            guest: &self.guest,
            ctx: &mut self.ctx,
            cache: &mut self.cache,
            mem: &self.memory,
            region: &mut self.region,
            backend: &self.backend,
            helpers: &self.helpers,
        }
        .translate(pc, &self.config);
        self.cache.finalize(
            index,
            &translated,
            &mut self.memory,
            &mut self.region,
            &self.backend,
            self.config.block_linking,
        );

        self.stats.blocks_compiled += 1;
        self.stats.fallback_sites += translated.fallbacks as u64;
        debug!(
            index,
            insns = translated.guest_insns,
            host = translated.host.host_size,
            spills = translated.host.stats.spills,
            "compiled block at {pc:#x}"
        );
        Ok(index)
    }

    fn enter_block(&mut self, index: usize) -> Result<(), EngineError> {
        self.region.set_executable()?;
        let entry = self.cache.block(index).checked_entry;
        if self.config.profiling {
            self.cache.block_mut(index).run_count += 1;
        }
        self.state.mem = &mut *self.memory;

        self.cache.set_executing(Some(index));
        // SAFETY: the region is executable, the block at `entry` was
        // finalized against this engine's state and memory.
        unsafe {
            cpu_block_exec(&self.region, &self.backend, &mut *self.state, entry);
        }
        self.cache.set_executing(None);
        self.stats.dispatches += 1;
        Ok(())
    }

    /// Execute the instruction at the guest pc with the interpreter.
    pub fn step_interpreter(&mut self) {
        let pc = self.state.pc;
        let word = self.memory.read_u32(pc);
        self.state.mem = &mut *self.memory;
        let interp = self.guest.interpreter();
        // SAFETY: `state.mem` was just refreshed and both boxes live
        // as long as the engine.
        unsafe { interp(&mut *self.state, word) };
        self.state.downcount -= 1;
        self.stats.interp_steps += 1;
    }
}
