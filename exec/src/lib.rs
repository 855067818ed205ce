//! Execution engine: block cache and dispatcher.
//!
//! Drives the lookup → translate → execute cycle for one guest CPU.
//! Translated blocks live in a single code region; lookup goes
//! through the shadow table, and blocks are linked directly to each
//! other once both ends exist. Guest stores into translated code are
//! picked up by the dispatcher before it looks up the next block.

pub mod block_cache;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod guest;
pub mod helpers;
pub mod profile;
pub mod shadow;
pub mod translator;

pub use block_cache::{BlockCache, CacheStats, Translated};
pub use config::{CoreMode, EngineConfig, InsnFamily, Strategy};
pub use dispatcher::StopHandle;
pub use error::EngineError;
pub use guest::Guest;
pub use profile::{write_profile, ProfileEntry};

use dbt_backend::{CodeRegion, Helpers, HostCodeGen, X86_64CodeGen};
use dbt_core::{Context, GuestMemory, GuestState};
use serde::Serialize;
use tracing::info;

/// Engine counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub blocks_compiled: u64,
    pub flushes: u64,
    pub invalidations: u64,
    pub links: u64,
    pub unlinks: u64,
    /// Interpreter calls emitted into blocks.
    pub fallback_sites: u64,
    /// Interpreter calls executed by generated code.
    pub fallbacks_executed: u64,
    pub dispatches: u64,
    /// Instructions run by the interpreter core.
    pub interp_steps: u64,
}

/// Translation engine for one guest CPU.
///
/// Not `Send`: the guest state holds a raw pointer to guest memory
/// and generated code runs on the owning thread only. Other threads
/// stop the dispatcher through a [`StopHandle`].
pub struct Engine<G: Guest> {
    pub(crate) config: EngineConfig,
    pub(crate) region: CodeRegion,
    pub(crate) backend: X86_64CodeGen,
    pub(crate) cache: BlockCache,
    pub(crate) ctx: Context,
    pub(crate) helpers: Helpers,
    pub(crate) state: Box<GuestState>,
    pub(crate) memory: Box<GuestMemory>,
    pub(crate) guest: G,
    pub(crate) stop: StopHandle,
    pub(crate) stats: EngineStats,
}

impl<G: Guest> Engine<G> {
    /// Map the code region and emit the dispatcher trampoline.
    pub fn new(config: EngineConfig, guest: G) -> Result<Self, EngineError> {
        config.validate()?;
        let mut region = CodeRegion::new(config.code_region_size)?;
        let mut backend = X86_64CodeGen::new();
        backend.emit_prologue(&mut region);
        backend.emit_epilogue(&mut region);
        region.reserve_prefix();

        let helpers = helpers::host_helpers(guest.interpreter());
        let mut memory = Box::new(GuestMemory::new(config.guest_ram_size));
        let mut state = Box::new(GuestState::new(0));
        state.mem = &mut *memory;

        info!(
            region = config.code_region_size,
            ram = config.guest_ram_size,
            strategy = ?config.strategy,
            core = ?config.core,
            "engine ready"
        );
        Ok(Self {
            cache: BlockCache::new(config.max_blocks, config.guest_ram_size),
            config,
            region,
            backend,
            ctx: Context::new(),
            helpers,
            state,
            memory,
            guest,
            stop: StopHandle::default(),
            stats: EngineStats::default(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> &GuestState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut GuestState {
        &mut self.state
    }

    pub fn memory(&self) -> &GuestMemory {
        &self.memory
    }

    /// Guest memory. Stores made here are tracked like guest stores:
    /// blocks they overwrite are dropped before the next lookup.
    pub fn memory_mut(&mut self) -> &mut GuestMemory {
        &mut self.memory
    }

    pub fn guest(&self) -> &G {
        &self.guest
    }

    pub fn guest_mut(&mut self) -> &mut G {
        &mut self.guest
    }

    pub fn cache(&self) -> &BlockCache {
        &self.cache
    }

    pub fn region(&self) -> &CodeRegion {
        &self.region
    }

    /// IR of the most recent block built by the IR strategy.
    pub fn last_ir(&self) -> &Context {
        &self.ctx
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn stats(&self) -> EngineStats {
        let cache = self.cache.stats();
        EngineStats {
            flushes: cache.flushes,
            invalidations: cache.invalidations,
            links: cache.links,
            unlinks: cache.unlinks,
            fallbacks_executed: self.stats.fallbacks_executed + self.state.fallbacks as u64,
            ..self.stats
        }
    }

    /// Live block starting at `addr`.
    pub fn lookup(&self, addr: u32) -> Option<usize> {
        self.cache.lookup(addr)
    }

    /// Whether the next compilation would flush the cache first.
    pub fn is_full(&self) -> bool {
        self.cache.table_full() || self.region.remaining() < self.config.flush_threshold
    }

    /// Bytes left in the code region.
    pub fn space_remaining(&self) -> usize {
        self.region.remaining()
    }

    /// Drop every block overlapping `[addr, addr + len)` and forget
    /// the cached guest words there. Returns the number of blocks
    /// invalidated.
    pub fn invalidate_range(&mut self, addr: u32, len: u32) -> Result<usize, EngineError> {
        self.region.set_writable()?;
        let n = self.cache.invalidate(addr, len, &mut self.region, &self.backend);
        self.cache.forget_words(addr, len);
        Ok(n)
    }

    /// Bus write hook for stores made outside the guest CPU (DMA,
    /// loaders). Invalidates at once when the range holds code.
    pub fn notify_guest_write(&mut self, addr: u32, len: u32) -> Result<usize, EngineError> {
        let touches_code = (0..len.div_ceil(dbt_core::memory::CODE_LINE_SIZE) + 1)
            .map(|n| addr.wrapping_add(n * dbt_core::memory::CODE_LINE_SIZE))
            .any(|a| self.memory.is_code(a));
        if !touches_code {
            return Ok(0);
        }
        self.invalidate_range(addr, len)
    }

    /// Drop every block and clear the code region.
    pub fn flush(&mut self) -> Result<(), EngineError> {
        self.region.set_writable()?;
        let live = self.cache.live_count();
        let used = self.region.offset() - self.region.prefix_end();
        self.cache.flush(&mut self.memory, &mut self.region);
        info!(live, used, "flushed block cache");
        Ok(())
    }

    /// Guest state was replaced wholesale (save-state load or reset).
    pub fn on_state_restored(&mut self) -> Result<(), EngineError> {
        self.memory.take_pending_writes();
        self.state.exceptions = 0;
        self.flush()
    }

    /// Profile of live blocks, costliest first. Run counts are only
    /// gathered with `profiling` enabled.
    pub fn profile(&self) -> Vec<ProfileEntry> {
        profile::collect(&self.cache)
    }
}

impl<G: Guest> std::fmt::Debug for Engine<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .field("region", &self.region)
            .field("state", &self.state)
            .finish()
    }
}
