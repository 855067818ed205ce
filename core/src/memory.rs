//! Flat big-endian guest RAM.
//!
//! The RAM is mirrored across the 32-bit guest address space by
//! masking, so `0x8000_1000` and `0x0000_1000` name the same word
//! when the RAM is smaller than 2 GiB. Stores that land on a
//! 32-byte line holding translated code are queued so the engine
//! can invalidate the affected blocks before it looks up the next
//! block.

/// log2 of the granule used to track guest code for write detection.
pub const CODE_LINE_SHIFT: u32 = 5;
/// Size of a code-tracking line in bytes.
pub const CODE_LINE_SIZE: u32 = 1 << CODE_LINE_SHIFT;

/// Smallest supported RAM size.
pub const MIN_RAM_SIZE: usize = 4096;

pub struct GuestMemory {
    ram: Vec<u8>,
    mask: u32,
    /// One bit per code line that holds (or held) translated code.
    code_lines: Vec<u64>,
    /// `(addr, len)` of stores that hit code lines, oldest first.
    pending_writes: Vec<(u32, u32)>,
}

impl GuestMemory {
    /// Create a zero-filled RAM of `size` bytes.
    ///
    /// `size` must be a power of two of at least [`MIN_RAM_SIZE`].
    pub fn new(size: usize) -> Self {
        assert!(
            size.is_power_of_two() && size >= MIN_RAM_SIZE && size <= 1 << 31,
            "guest RAM size {size:#x} must be a power of two between 4 KiB and 2 GiB"
        );
        let lines = size >> CODE_LINE_SHIFT;
        Self {
            ram: vec![0; size],
            mask: (size - 1) as u32,
            code_lines: vec![0; lines.div_ceil(64)],
            pending_writes: Vec::new(),
        }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.ram.len()
    }

    /// Address mask applied to every access.
    #[inline]
    pub fn mask(&self) -> u32 {
        self.mask
    }

    #[inline]
    fn index(&self, addr: u32) -> usize {
        (addr & self.mask) as usize
    }

    // -- Reads --

    pub fn read_u8(&self, addr: u32) -> u8 {
        self.ram[self.index(addr)]
    }

    pub fn read_u16(&self, addr: u32) -> u16 {
        (self.read_u8(addr) as u16) << 8 | self.read_u8(addr.wrapping_add(1)) as u16
    }

    pub fn read_u32(&self, addr: u32) -> u32 {
        let i = self.index(addr);
        if i + 4 <= self.ram.len() {
            u32::from_be_bytes([self.ram[i], self.ram[i + 1], self.ram[i + 2], self.ram[i + 3]])
        } else {
            (self.read_u16(addr) as u32) << 16 | self.read_u16(addr.wrapping_add(2)) as u32
        }
    }

    // -- Writes --
    //
    // Each returns true when the store touched a code line; the
    // store is then also queued in `pending_writes`.

    pub fn write_u8(&mut self, addr: u32, val: u8) -> bool {
        let i = self.index(addr);
        self.ram[i] = val;
        self.note_write(addr, 1)
    }

    pub fn write_u16(&mut self, addr: u32, val: u16) -> bool {
        for (k, b) in val.to_be_bytes().into_iter().enumerate() {
            let i = self.index(addr.wrapping_add(k as u32));
            self.ram[i] = b;
        }
        self.note_write(addr, 2)
    }

    pub fn write_u32(&mut self, addr: u32, val: u32) -> bool {
        for (k, b) in val.to_be_bytes().into_iter().enumerate() {
            let i = self.index(addr.wrapping_add(k as u32));
            self.ram[i] = b;
        }
        self.note_write(addr, 4)
    }

    /// Copy a big-endian image into RAM without write notification.
    ///
    /// Callers loading over code that may already be translated must
    /// invalidate the range themselves.
    pub fn load(&mut self, addr: u32, bytes: &[u8]) {
        for (k, &b) in bytes.iter().enumerate() {
            let i = self.index(addr.wrapping_add(k as u32));
            self.ram[i] = b;
        }
    }

    /// Store a sequence of instruction words starting at `addr`.
    pub fn load_words(&mut self, addr: u32, words: &[u32]) {
        for (k, &w) in words.iter().enumerate() {
            let a = addr.wrapping_add(4 * k as u32);
            for (j, b) in w.to_be_bytes().into_iter().enumerate() {
                let i = self.index(a.wrapping_add(j as u32));
                self.ram[i] = b;
            }
        }
    }

    // -- Code tracking --

    #[inline]
    fn line_of(&self, addr: u32) -> usize {
        self.index(addr) >> CODE_LINE_SHIFT
    }

    fn note_write(&mut self, addr: u32, len: u32) -> bool {
        let first = self.line_of(addr);
        let last = self.line_of(addr.wrapping_add(len - 1));
        let hit = self.line_is_code(first) || self.line_is_code(last);
        if hit {
            self.pending_writes.push((addr, len));
        }
        hit
    }

    #[inline]
    fn line_is_code(&self, line: usize) -> bool {
        self.code_lines[line / 64] & (1u64 << (line % 64)) != 0
    }

    /// Whether `addr` lies on a line marked as holding translated code.
    pub fn is_code(&self, addr: u32) -> bool {
        self.line_is_code(self.line_of(addr))
    }

    /// Mark `[addr, addr+len)` as holding translated code.
    pub fn mark_code(&mut self, addr: u32, len: u32) {
        if len == 0 {
            return;
        }
        let lines = (len as usize).div_ceil(CODE_LINE_SIZE as usize) + 1;
        let mut a = addr & !(CODE_LINE_SIZE - 1);
        let end = addr as u64 + len as u64;
        for _ in 0..lines {
            if a as u64 >= end {
                break;
            }
            let line = self.line_of(a);
            self.code_lines[line / 64] |= 1u64 << (line % 64);
            a = a.wrapping_add(CODE_LINE_SIZE);
        }
    }

    /// Forget all code marks (after a cache flush).
    pub fn clear_code_marks(&mut self) {
        self.code_lines.fill(0);
    }

    pub fn has_pending_writes(&self) -> bool {
        !self.pending_writes.is_empty()
    }

    /// Drain the queued code writes.
    pub fn take_pending_writes(&mut self) -> Vec<(u32, u32)> {
        std::mem::take(&mut self.pending_writes)
    }
}

impl std::fmt::Debug for GuestMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuestMemory")
            .field("size", &self.ram.len())
            .field("pending_writes", &self.pending_writes.len())
            .finish()
    }
}
