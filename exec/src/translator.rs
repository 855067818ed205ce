//! Guest block translation.
//!
//! Walks guest instructions from a start address, fetching words
//! through the shadow table, and produces host code with either the
//! IR pipeline or direct emission. Translation never fails: anything
//! the guest cannot lower, and every instruction of a family the
//! configuration routes to the interpreter, runs through the
//! interpreter helper.

use dbt_backend::x86_64::regs::env_field;
use dbt_backend::{CodeRegion, DirectEmitter, Helpers, X86_64CodeGen};
use dbt_core::state::PC_OFFSET;
use dbt_core::{Context, GuestInsn, GuestMemory, Lowered};
use tracing::{debug, warn};

use crate::block_cache::{BlockCache, Translated};
use crate::config::{EngineConfig, Strategy};
use crate::guest::Guest;

/// Host bytes reserved for the block header and the fallthrough exit.
pub const BLOCK_OVERHEAD: usize = 256;

/// Borrowed engine parts the translator works on.
pub struct Translator<'a, G: Guest> {
    pub guest: &'a G,
    pub ctx: &'a mut Context,
    pub cache: &'a mut BlockCache,
    pub mem: &'a GuestMemory,
    pub region: &'a mut CodeRegion,
    pub backend: &'a X86_64CodeGen,
    pub helpers: &'a Helpers,
}

/// Whether `word` may be lowered instead of interpreted.
fn compiles<G: Guest>(guest: &G, word: u32, config: &EngineConfig) -> bool {
    guest
        .family(word)
        .map_or(true, |family| !config.interprets(family))
}

/// Walk state shared by both strategies.
struct Walk {
    start: u32,
    /// Guest RAM address mask.
    mask: u32,
    max_insns: u32,
    budget: usize,
    headroom: usize,
    count: u32,
    first_word: u32,
    fallbacks: u32,
}

impl Walk {
    fn new(start: u32, mask: u32, max_insns: u32, remaining: usize, headroom: usize) -> Self {
        let budget = remaining.saturating_sub(BLOCK_OVERHEAD);
        assert!(
            budget >= headroom,
            "code region has {remaining} bytes left, below one instruction of headroom"
        );
        Self {
            start,
            mask,
            max_insns,
            budget,
            headroom,
            count: 0,
            first_word: 0,
            fallbacks: 0,
        }
    }

    fn next_addr(&self) -> u32 {
        self.start.wrapping_add(self.count * 4)
    }

    /// Whether one more instruction may be translated.
    fn has_room(&self) -> bool {
        self.count < self.max_insns
            && (self.count as usize + 1) * self.headroom <= self.budget
            // Blocks never run past the end of RAM, which also keeps
            // them from wrapping around the address space.
            && !(self.count > 0 && (self.next_addr() & self.mask) == 0)
    }

    fn fetched(&mut self, word: u32) {
        if self.count == 0 {
            self.first_word = word;
        }
        self.count += 1;
    }

    fn fallthrough(&self) -> u32 {
        self.next_addr()
    }
}

impl<G: Guest> Translator<'_, G> {
    /// Translate the block at `start`.
    pub fn translate(&mut self, start: u32, config: &EngineConfig) -> Translated {
        if start == 0 {
            warn!("compiling block at guest address 0");
        }
        let walk = Walk::new(
            start,
            self.mem.mask(),
            config.max_block_insns,
            self.region.remaining(),
            config.insn_headroom,
        );
        match config.strategy {
            Strategy::Ir => self.translate_ir(walk, config),
            Strategy::Direct => self.translate_direct(walk, config),
        }
    }

    fn translate_ir(&mut self, mut walk: Walk, config: &EngineConfig) -> Translated {
        let ctx = &mut *self.ctx;
        ctx.reset();
        while walk.has_room() {
            let addr = walk.next_addr();
            let word = self.cache.fetch(addr, self.mem);
            walk.fetched(word);
            let insn = GuestInsn { addr, word };

            ctx.gen_insn_start(addr);
            let ends = self.guest.ends_block(word);
            let lowered = if compiles(self.guest, word, config) {
                self.guest.lower(ctx, insn)
            } else {
                Lowered::Unhandled
            };
            if lowered == Lowered::Unhandled {
                debug!("interpreter fallback at {addr:#x}: {word:#010x}");
                walk.fallbacks += 1;
                ctx.gen_call_interp(word);
                if ends {
                    let pc = ctx.gen_load_state(PC_OFFSET);
                    ctx.gen_exit_dyn(pc);
                }
            }
            if ends || ctx.is_terminated() {
                break;
            }
        }
        if !ctx.is_terminated() {
            ctx.gen_exit(walk.fallthrough());
        }

        let host = dbt_backend::translate(ctx, self.backend, self.region, self.helpers, None);
        Translated {
            host,
            guest_insns: walk.count,
            first_word: walk.first_word,
            fallbacks: walk.fallbacks,
        }
    }

    fn translate_direct(&mut self, mut walk: Walk, config: &EngineConfig) -> Translated {
        let mut e = DirectEmitter::new(self.region, self.backend, self.helpers);
        while walk.has_room() {
            let addr = walk.next_addr();
            let word = self.cache.fetch(addr, self.mem);
            walk.fetched(word);
            let insn = GuestInsn { addr, word };

            e.begin_insn(addr);
            let ends = self.guest.ends_block(word);
            let lowered = if compiles(self.guest, word, config) {
                self.guest.lower_direct(&mut e, insn)
            } else {
                Lowered::Unhandled
            };
            if lowered == Lowered::Unhandled {
                debug!("interpreter fallback at {addr:#x}: {word:#010x}");
                walk.fallbacks += 1;
                e.call_interp(word);
                if ends {
                    e.exit_dynamic(env_field(PC_OFFSET));
                }
            }
            if ends || e.terminated() {
                break;
            }
        }
        if !e.terminated() {
            e.exit(walk.fallthrough());
        }

        Translated {
            host: e.finish(),
            guest_insns: walk.count,
            first_word: walk.first_word,
            fallbacks: walk.fallbacks,
        }
    }
}
