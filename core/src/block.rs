/// Maximum number of exit records per block.
pub const MAX_BLOCK_EXITS: usize = 2;

/// Lifecycle of a block-table slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    /// Allocated; host code is being generated.
    Compiling,
    /// Reachable through lookup and direct links.
    Live,
    /// Removed from lookup; the slot stays until the next flush.
    Invalidated,
}

/// One exit of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitRecord {
    /// Static guest target, or `None` for a dynamic exit.
    pub target: Option<u32>,
    /// Code-region offset of the patchable `jmp rel32`.
    /// `None` when the exit has no patchable branch.
    pub jump_offset: Option<usize>,
    pub linked: bool,
    /// Block the branch currently jumps into when linked.
    pub dest: Option<usize>,
}

impl ExitRecord {
    pub fn new(target: Option<u32>, jump_offset: Option<usize>) -> Self {
        Self {
            target,
            jump_offset,
            linked: false,
            dest: None,
        }
    }

    /// Whether the exit can be linked to another block.
    pub fn is_linkable(&self) -> bool {
        self.target.is_some() && self.jump_offset.is_some()
    }
}

/// A translated guest code block.
///
/// Covers the guest range `[start, start + 4 * guest_insns)` and
/// owns a contiguous span of the code region.
#[derive(Debug, Clone)]
pub struct JitBlock {
    /// Slot index in the block table; restarts at 0 after a flush.
    pub index: usize,
    pub start: u32,
    pub guest_insns: u32,

    /// Code-region offset of the entry that tests the time budget
    /// and pending exceptions.
    pub checked_entry: usize,
    /// Code-region offset of the entry used by direct links.
    pub unchecked_entry: usize,
    pub host_size: usize,

    pub exits: [Option<ExitRecord>; MAX_BLOCK_EXITS],

    /// Instruction word the shadow sentinel replaced.
    pub original_word: u32,

    pub state: BlockState,
    /// Number of dispatcher entries into this block.
    pub run_count: u64,

    /// `(source block, exit slot)` pairs currently linked into this
    /// block.
    pub incoming: Vec<(usize, usize)>,
}

impl JitBlock {
    pub fn new(index: usize, start: u32) -> Self {
        Self {
            index,
            start,
            guest_insns: 0,
            checked_entry: 0,
            unchecked_entry: 0,
            host_size: 0,
            exits: [None; MAX_BLOCK_EXITS],
            original_word: 0,
            state: BlockState::Compiling,
            run_count: 0,
            incoming: Vec::new(),
        }
    }

    /// Size of the covered guest range in bytes.
    pub fn guest_len(&self) -> u32 {
        self.guest_insns * 4
    }

    /// Last guest byte covered by the block (inclusive).
    pub fn last_byte(&self) -> u32 {
        self.start
            .wrapping_add(self.guest_len().max(1))
            .wrapping_sub(1)
    }

    pub fn contains(&self, addr: u32) -> bool {
        addr >= self.start && addr <= self.last_byte()
    }

    /// Whether the block intersects `[addr, addr + len)`.
    pub fn overlaps(&self, addr: u32, len: u32) -> bool {
        if len == 0 {
            return false;
        }
        let last = addr.saturating_add(len - 1);
        self.start <= last && addr <= self.last_byte()
    }

    pub fn is_live(&self) -> bool {
        self.state == BlockState::Live
    }
}
