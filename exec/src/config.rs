use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// How guest instructions are lowered to host code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Through the IR builder, liveness and register allocation.
    #[default]
    Ir,
    /// Straight to host code; guest registers stay in memory.
    Direct,
}

/// Execution core driven by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoreMode {
    #[default]
    Jit,
    /// Every instruction goes through the interpreter.
    Interpreter,
}

/// Guest instruction families that can be routed through the
/// interpreter as a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsnFamily {
    Integer,
    LoadStore,
    SystemRegisters,
    Branch,
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub code_region_size: usize,
    /// Slots in the block table between flushes.
    pub max_blocks: usize,
    pub max_block_insns: u32,
    /// Region headroom below which the cache is flushed before the
    /// next compilation.
    pub flush_threshold: usize,
    /// Host bytes reserved per guest instruction still to translate.
    pub insn_headroom: usize,
    pub strategy: Strategy,
    pub core: CoreMode,
    pub block_linking: bool,
    /// Translate every instruction as an interpreter call.
    pub jit_off: bool,
    /// Families translated as interpreter calls.
    pub disabled_families: Vec<InsnFamily>,
    /// Flush the cache before every compilation.
    pub no_block_cache: bool,
    pub profiling: bool,
    pub guest_ram_size: usize,
    /// Guest instructions granted per budget refill.
    pub time_slice: i32,
}

pub const MIB: usize = 1024 * 1024;

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            code_region_size: 32 * MIB,
            max_blocks: 128 * 1024,
            max_block_insns: 512,
            flush_threshold: 64 * 1024,
            insn_headroom: 2048,
            strategy: Strategy::Ir,
            core: CoreMode::Jit,
            block_linking: true,
            jit_off: false,
            disabled_families: Vec::new(),
            no_block_cache: false,
            profiling: false,
            guest_ram_size: 16 * MIB,
            time_slice: 20_000,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        let bad = |reason: String| Err(EngineError::InvalidConfig(reason));
        if !self.guest_ram_size.is_power_of_two()
            || self.guest_ram_size < dbt_core::memory::MIN_RAM_SIZE
            || self.guest_ram_size > 1 << 31
        {
            return bad(format!(
                "guest RAM size {:#x} must be a power of two between 4 KiB and 2 GiB",
                self.guest_ram_size
            ));
        }
        if self.max_blocks < 2 || self.max_blocks > crate::shadow::MAX_BLOCKS {
            return bad(format!(
                "max_blocks {} outside 2..={}",
                self.max_blocks,
                crate::shadow::MAX_BLOCKS
            ));
        }
        if self.max_block_insns == 0 || self.max_block_insns as usize > dbt_core::context::MAX_INSNS {
            return bad(format!(
                "max_block_insns {} outside 1..={}",
                self.max_block_insns,
                dbt_core::context::MAX_INSNS
            ));
        }
        if self.insn_headroom < 256 {
            return bad(format!("insn_headroom {} is below 256 bytes", self.insn_headroom));
        }
        // A flush must leave room for at least one single-instruction
        // block.
        if self.flush_threshold < 2 * self.insn_headroom {
            return bad(format!(
                "flush_threshold {} is below twice the instruction headroom",
                self.flush_threshold
            ));
        }
        if self.code_region_size < 2 * self.flush_threshold {
            return bad(format!(
                "code region of {} bytes cannot hold the flush threshold twice",
                self.code_region_size
            ));
        }
        if self.time_slice <= 0 {
            return bad(format!("time slice {} must be positive", self.time_slice));
        }
        Ok(())
    }

    /// Whether instructions of `family` must go through the
    /// interpreter.
    pub fn interprets(&self, family: InsnFamily) -> bool {
        self.jit_off || self.disabled_families.contains(&family)
    }
}
