//! Shadow copy of guest instruction words.
//!
//! One entry per 32-bit word of guest RAM. An entry is either
//! [`EMPTY_WORD`] (not fetched yet), the fetched instruction word, or
//! a sentinel naming the block that starts at that address. A
//! sentinel has a zero primary opcode field, which no valid guest
//! instruction uses, and carries the block index in the low bits.
//!
//! A sentinel-shaped word is only trusted after the block cache
//! checks that the named block is live and starts at that address,
//! so a fetched word that happens to look like a sentinel is still
//! read back as a plain word.

/// Entry value for words not fetched since the last reset.
pub const EMPTY_WORD: u32 = 0x1414_1414;

/// Primary opcode field; zero in every sentinel.
const OPCODE_MASK: u32 = 0xFC00_0000;

/// Tag ORed into the block index to form a sentinel.
pub const JIT_MARKER: u32 = 0;

/// Block indices representable in a sentinel.
pub const MAX_BLOCKS: usize = 1 << 26;

/// Decoded shadow entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadowEntry {
    Empty,
    /// May still be a fetched word; see the module docs.
    Sentinel(usize),
    Word(u32),
}

impl ShadowEntry {
    pub fn from_raw(raw: u32) -> Self {
        if raw == EMPTY_WORD {
            ShadowEntry::Empty
        } else if raw & OPCODE_MASK == 0 {
            ShadowEntry::Sentinel((raw & !OPCODE_MASK & !JIT_MARKER) as usize)
        } else {
            ShadowEntry::Word(raw)
        }
    }
}

pub const fn sentinel(block_index: usize) -> u32 {
    JIT_MARKER | block_index as u32
}

pub struct ShadowTable {
    words: Vec<u32>,
    mask: u32,
}

impl ShadowTable {
    /// Shadow for a guest RAM of `ram_size` bytes.
    pub fn new(ram_size: usize) -> Self {
        assert!(ram_size.is_power_of_two() && ram_size >= 4);
        Self {
            words: vec![EMPTY_WORD; ram_size / 4],
            mask: (ram_size - 1) as u32,
        }
    }

    #[inline]
    fn slot(&self, addr: u32) -> usize {
        ((addr & self.mask) >> 2) as usize
    }

    #[inline]
    pub fn raw(&self, addr: u32) -> u32 {
        self.words[self.slot(addr)]
    }

    #[inline]
    pub fn entry(&self, addr: u32) -> ShadowEntry {
        ShadowEntry::from_raw(self.raw(addr))
    }

    /// Cache a fetched instruction word.
    pub fn set_word(&mut self, addr: u32, word: u32) {
        let i = self.slot(addr);
        self.words[i] = word;
    }

    /// Write the sentinel for `block_index` at `addr`. Returns the
    /// raw entry it replaced.
    pub fn install(&mut self, addr: u32, block_index: usize) -> u32 {
        assert!(block_index < MAX_BLOCKS, "block index {block_index} exceeds sentinel range");
        let i = self.slot(addr);
        std::mem::replace(&mut self.words[i], sentinel(block_index))
    }

    /// Put `word` back at `addr` if the entry still holds the
    /// sentinel for `block_index`.
    pub fn restore(&mut self, addr: u32, block_index: usize, word: u32) -> bool {
        let i = self.slot(addr);
        if self.words[i] != sentinel(block_index) {
            return false;
        }
        self.words[i] = word;
        true
    }

    /// Forget cached words in `[addr, addr + len)` so they are fetched
    /// again. Entries for which `keep` returns true are left alone.
    pub fn forget(&mut self, addr: u32, len: u32, mut keep: impl FnMut(u32, u32) -> bool) {
        if len == 0 {
            return;
        }
        let first = addr & !3;
        let words = ((addr - first) as u64 + len as u64).div_ceil(4);
        let words = words.min(self.words.len() as u64) as u32;
        for n in 0..words {
            let a = first.wrapping_add(n * 4);
            let i = self.slot(a);
            if !keep(a, self.words[i]) {
                self.words[i] = EMPTY_WORD;
            }
        }
    }

    pub fn reset(&mut self) {
        self.words.fill(EMPTY_WORD);
    }

    /// Number of words covered.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

impl std::fmt::Debug for ShadowTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShadowTable")
            .field("words", &self.words.len())
            .finish()
    }
}
