//! Block table, lookup, overlap tracking and direct linking.
//!
//! Lookup goes through the shadow table: the first word of every
//! live block is replaced by a sentinel naming the block. Guest
//! ranges of live blocks are kept in an interval index keyed by
//! physical `(last_byte, start)`, so a store through any mirror of
//! guest RAM finds the blocks it hits. Static exit targets live in a
//! reverse index so a new block can be linked into every exit
//! waiting for it.
//!
//! Blocks never cross the end of RAM, so every physical range is
//! contiguous.

use std::collections::{BTreeMap, HashMap};

use dbt_backend::{CodeRegion, HostBlock, HostCodeGen};
use dbt_core::{BlockState, ExitRecord, GuestMemory, JitBlock, MAX_BLOCK_EXITS};
use tracing::{debug, trace};

use crate::shadow::{ShadowEntry, ShadowTable};

/// Output of the block translator, ready to be finalized.
#[derive(Debug, Clone, Default)]
pub struct Translated {
    pub host: HostBlock,
    pub guest_insns: u32,
    /// Guest word at the block start, as fetched.
    pub first_word: u32,
    /// Instructions routed through the interpreter helper.
    pub fallbacks: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub invalidations: u64,
    pub links: u64,
    pub unlinks: u64,
    pub flushes: u64,
}

pub struct BlockCache {
    blocks: Vec<JitBlock>,
    max_blocks: usize,
    shadow: ShadowTable,
    /// Guest RAM address mask.
    mask: u32,
    /// Live blocks by physical `(last_byte, start)`.
    overlap: BTreeMap<(u32, u32), usize>,
    /// Static exit target -> `(block, exit slot)` of every live exit
    /// branching there, linked or not.
    links_to: HashMap<u32, Vec<(usize, usize)>>,
    /// Longest guest range finalized since the last flush.
    longest: u32,
    executing: Option<usize>,
    stats: CacheStats,
}

impl BlockCache {
    pub fn new(max_blocks: usize, ram_size: usize) -> Self {
        Self {
            blocks: Vec::new(),
            max_blocks,
            shadow: ShadowTable::new(ram_size),
            mask: (ram_size - 1) as u32,
            overlap: BTreeMap::new(),
            links_to: HashMap::new(),
            longest: 0,
            executing: None,
            stats: CacheStats::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn live_count(&self) -> usize {
        self.overlap.len()
    }

    pub fn max_blocks(&self) -> usize {
        self.max_blocks
    }

    /// Whether the block table has no room for another block.
    pub fn table_full(&self) -> bool {
        self.blocks.len() >= self.max_blocks - 1
    }

    pub fn block(&self, index: usize) -> &JitBlock {
        &self.blocks[index]
    }

    pub(crate) fn block_mut(&mut self, index: usize) -> &mut JitBlock {
        &mut self.blocks[index]
    }

    pub fn blocks(&self) -> &[JitBlock] {
        &self.blocks
    }

    pub fn shadow(&self) -> &ShadowTable {
        &self.shadow
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Exits registered under the static target `addr`.
    pub fn exits_targeting(&self, addr: u32) -> &[(usize, usize)] {
        self.links_to.get(&addr).map_or(&[], |v| v.as_slice())
    }

    pub(crate) fn set_executing(&mut self, index: Option<usize>) {
        self.executing = index;
    }

    fn is_live_at(blocks: &[JitBlock], index: usize, addr: u32) -> bool {
        blocks
            .get(index)
            .is_some_and(|b| b.is_live() && b.start == addr)
    }

    /// Whether block `index` is live and starts at the RAM word `addr`
    /// names, through any mirror.
    fn is_live_alias(blocks: &[JitBlock], index: usize, addr: u32, mask: u32) -> bool {
        blocks
            .get(index)
            .is_some_and(|b| b.is_live() && (b.start ^ addr) & mask == 0)
    }

    /// Overlap-index key of `b`.
    fn key(&self, b: &JitBlock) -> (u32, u32) {
        let start = b.start & self.mask;
        (start + (b.guest_len().max(1) - 1), start)
    }

    /// Live block starting at `addr`.
    pub fn lookup(&self, addr: u32) -> Option<usize> {
        match self.shadow.entry(addr) {
            ShadowEntry::Sentinel(i) if Self::is_live_at(&self.blocks, i, addr) => Some(i),
            _ => None,
        }
    }

    /// Instruction word at `addr`, through the shadow table.
    pub fn fetch(&mut self, addr: u32, mem: &GuestMemory) -> u32 {
        let raw = self.shadow.raw(addr);
        match ShadowEntry::from_raw(raw) {
            ShadowEntry::Sentinel(i) if Self::is_live_alias(&self.blocks, i, addr, self.mask) => {
                self.blocks[i].original_word
            }
            ShadowEntry::Empty => {
                let word = mem.read_u32(addr);
                self.shadow.set_word(addr, word);
                word
            }
            _ => raw,
        }
    }

    /// Physical ranges `(first, last)` covered by `[addr, addr + len)`:
    /// one, or two when the range runs past the end of RAM.
    fn physical_ranges(&self, addr: u32, len: u32) -> Vec<(u32, u32)> {
        let size = self.mask as u64 + 1;
        if len as u64 >= size {
            return vec![(0, self.mask)];
        }
        let first = addr & self.mask;
        let end = first as u64 + len as u64;
        if end <= size {
            vec![(first, (end - 1) as u32)]
        } else {
            vec![(first, self.mask), (0, (end - size - 1) as u32)]
        }
    }

    /// Live blocks whose RAM intersects `[addr, addr + len)`.
    fn overlapping(&self, addr: u32, len: u32) -> Vec<usize> {
        if len == 0 {
            return Vec::new();
        }
        let mut found = Vec::new();
        for (first, last) in self.physical_ranges(addr, len) {
            // A block ending past `last + longest` starts after `last`.
            let hi = last.saturating_add(self.longest);
            found.extend(
                self.overlap
                    .range((first, 0)..=(hi, u32::MAX))
                    .filter(|(&(_, start), _)| start <= last)
                    .map(|(_, &i)| i),
            );
        }
        found
    }

    /// Live blocks whose guest range contains `addr`.
    pub fn blocks_containing(&self, addr: u32) -> Vec<usize> {
        self.overlapping(addr, 1)
    }

    /// Reserve a slot for a block starting at `addr`.
    pub fn allocate(&mut self, addr: u32) -> usize {
        let index = self.blocks.len();
        assert!(
            index < self.max_blocks,
            "block table full ({} slots)",
            self.max_blocks
        );
        self.blocks.push(JitBlock::new(index, addr));
        index
    }

    /// Make block `index` live.
    pub fn finalize(
        &mut self,
        index: usize,
        translated: &Translated,
        mem: &mut GuestMemory,
        region: &mut CodeRegion,
        backend: &impl HostCodeGen,
        allow_linking: bool,
    ) {
        let start = self.blocks[index].start;
        assert_eq!(
            self.blocks[index].state,
            BlockState::Compiling,
            "finalizing block {index} at {start:#x} twice"
        );
        let len = translated.guest_insns * 4;
        assert!(
            translated.host.exits.len() <= MAX_BLOCK_EXITS,
            "block at {start:#x} has {} exits, at most {MAX_BLOCK_EXITS} are supported",
            translated.host.exits.len()
        );

        for victim in self.overlapping(start, len) {
            self.invalidate_block(victim, region, backend);
        }

        self.shadow.install(start, index);
        let host = &translated.host;
        let b = &mut self.blocks[index];
        b.guest_insns = translated.guest_insns;
        b.checked_entry = host.checked_entry;
        b.unchecked_entry = host.unchecked_entry;
        b.host_size = host.host_size;
        b.original_word = translated.first_word;
        for (slot, site) in host.exits.iter().enumerate() {
            b.exits[slot] = Some(ExitRecord::new(site.target, site.jump_offset));
        }
        b.state = BlockState::Live;
        let exits = b.exits;
        let key = self.key(&self.blocks[index]);

        self.longest = self.longest.max(len);
        self.overlap.insert(key, index);
        mem.mark_code(start, len);
        for (slot, rec) in exits.iter().enumerate() {
            if let Some(target) = rec.filter(ExitRecord::is_linkable).and_then(|r| r.target) {
                self.links_to.entry(target).or_default().push((index, slot));
            }
        }

        if allow_linking {
            self.link_block(index, region, backend);
        }
    }

    /// Link the exits of `index` to live targets, then link every exit
    /// waiting for `index`'s start address.
    fn link_block(&mut self, index: usize, region: &mut CodeRegion, backend: &impl HostCodeGen) {
        for slot in 0..MAX_BLOCK_EXITS {
            let Some(target) = self.blocks[index].exits[slot]
                .filter(ExitRecord::is_linkable)
                .and_then(|r| r.target)
            else {
                continue;
            };
            if let Some(dst) = self.lookup(target) {
                self.link(index, slot, dst, region, backend);
            }
        }

        let start = self.blocks[index].start;
        let waiting = self.links_to.get(&start).cloned().unwrap_or_default();
        for (src, slot) in waiting {
            if self.blocks[src].is_live() {
                self.link(src, slot, index, region, backend);
            }
        }
    }

    fn link(
        &mut self,
        src: usize,
        slot: usize,
        dst: usize,
        region: &mut CodeRegion,
        backend: &impl HostCodeGen,
    ) {
        let Some(rec) = self.blocks[src].exits[slot] else {
            return;
        };
        let Some(jump) = rec.jump_offset else {
            return;
        };
        if rec.linked {
            if rec.dest == Some(dst) {
                return;
            }
            self.unlink(src, slot, region, backend);
        }
        let entry = self.blocks[dst].unchecked_entry;
        backend.patch_jump(region, jump, entry);
        if let Some(r) = self.blocks[src].exits[slot].as_mut() {
            r.linked = true;
            r.dest = Some(dst);
        }
        self.blocks[dst].incoming.push((src, slot));
        self.stats.links += 1;
        trace!(
            src,
            slot,
            dst,
            "linked {:#x} -> {:#x}",
            self.blocks[src].start,
            self.blocks[dst].start
        );
    }

    /// Point the branch of `(src, slot)` back at the dispatcher.
    fn unlink(&mut self, src: usize, slot: usize, region: &mut CodeRegion, backend: &impl HostCodeGen) {
        let Some(rec) = self.blocks[src].exits[slot] else {
            return;
        };
        if !rec.linked {
            return;
        }
        if let Some(jump) = rec.jump_offset {
            backend.patch_jump(region, jump, backend.epilogue_offset());
        }
        if let Some(dst) = rec.dest {
            self.blocks[dst].incoming.retain(|&e| e != (src, slot));
        }
        if let Some(r) = self.blocks[src].exits[slot].as_mut() {
            r.linked = false;
            r.dest = None;
        }
        self.stats.unlinks += 1;
        trace!(src, slot, "unlinked exit of {:#x}", self.blocks[src].start);
    }

    /// Remove one live block from lookup and unlink it.
    ///
    /// Panics if the block is the one the dispatcher entered.
    pub fn invalidate_block(
        &mut self,
        index: usize,
        region: &mut CodeRegion,
        backend: &impl HostCodeGen,
    ) -> bool {
        if !self.blocks[index].is_live() {
            return false;
        }
        let (start, last) = (self.blocks[index].start, self.blocks[index].last_byte());
        if self.executing == Some(index) {
            panic!("invalidating block {index} at {start:#x} while it is executing");
        }

        self.blocks[index].state = BlockState::Invalidated;
        let key = self.key(&self.blocks[index]);
        self.overlap.remove(&key);
        let word = self.blocks[index].original_word;
        self.shadow.restore(start, index, word);

        let incoming = std::mem::take(&mut self.blocks[index].incoming);
        for (src, slot) in incoming {
            self.unlink(src, slot, region, backend);
        }

        // Outgoing edges: the code is unreachable now, only the
        // bookkeeping has to go.
        for slot in 0..MAX_BLOCK_EXITS {
            let Some(rec) = self.blocks[index].exits[slot] else {
                continue;
            };
            if let Some(dst) = rec.dest {
                self.blocks[dst].incoming.retain(|&e| e != (index, slot));
            }
            if let Some(target) = rec.target {
                if let Some(list) = self.links_to.get_mut(&target) {
                    list.retain(|&e| e != (index, slot));
                    if list.is_empty() {
                        self.links_to.remove(&target);
                    }
                }
            }
            if let Some(r) = self.blocks[index].exits[slot].as_mut() {
                r.linked = false;
                r.dest = None;
            }
        }

        self.stats.invalidations += 1;
        debug!(index, "invalidated block {start:#x}..={last:#x}");
        true
    }

    /// Invalidate every live block intersecting `[addr, addr + len)`.
    /// Returns the number of blocks invalidated.
    pub fn invalidate(
        &mut self,
        addr: u32,
        len: u32,
        region: &mut CodeRegion,
        backend: &impl HostCodeGen,
    ) -> usize {
        let mut count = 0;
        for index in self.overlapping(addr, len) {
            if self.invalidate_block(index, region, backend) {
                count += 1;
            }
        }
        count
    }

    /// Drop cached words in `[addr, addr + len)` so they are fetched
    /// from guest memory again. Sentinels of live blocks stay.
    pub fn forget_words(&mut self, addr: u32, len: u32) {
        let (blocks, mask) = (&self.blocks, self.mask);
        self.shadow.forget(addr, len, |a, raw| {
            matches!(ShadowEntry::from_raw(raw), ShadowEntry::Sentinel(i) if Self::is_live_alias(blocks, i, a, mask))
        });
    }

    /// Drop every block and clear the code region back to the
    /// trampoline prefix.
    pub fn flush(&mut self, mem: &mut GuestMemory, region: &mut CodeRegion) {
        assert!(self.executing.is_none(), "flushing while a block is executing");
        self.blocks.clear();
        self.shadow.reset();
        self.overlap.clear();
        self.links_to.clear();
        self.longest = 0;
        mem.clear_code_marks();
        region.clear();
        self.stats.flushes += 1;
    }
}

impl std::fmt::Debug for BlockCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockCache")
            .field("blocks", &self.blocks.len())
            .field("live", &self.overlap.len())
            .field("max_blocks", &self.max_blocks)
            .finish()
    }
}
