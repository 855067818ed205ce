use std::io;
use std::ptr;

use thiserror::Error;

/// Byte used to fill cleared code (`int3`).
pub const TRAP_FILL: u8 = 0xCC;

#[derive(Debug, Error)]
pub enum CodeRegionError {
    #[error("failed to map {size} bytes of code memory")]
    Map {
        size: usize,
        #[source]
        source: io::Error,
    },
    #[error("failed to change code memory protection")]
    Protect(#[source] io::Error),
}

/// Access phase of the region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Writable,
    Executable,
}

/// Host code memory backed by an anonymous private mapping.
///
/// The region is either writable or executable, never both; code
/// is entered only after [`CodeRegion::set_executable`]. The bytes
/// below the prefix mark hold the permanent trampoline and survive
/// [`CodeRegion::clear`].
pub struct CodeRegion {
    ptr: *mut u8,
    size: usize,
    offset: usize,
    prefix_end: usize,
    phase: Phase,
}

impl CodeRegion {
    /// Map a region of `size` bytes, rounded up to the page size.
    pub fn new(size: usize) -> Result<Self, CodeRegionError> {
        let page_size = page_size();
        let size = (size.max(1) + page_size - 1) & !(page_size - 1);

        // SAFETY: anonymous private mapping, no file backing.
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(CodeRegionError::Map {
                size,
                source: io::Error::last_os_error(),
            });
        }

        // SAFETY: freshly mapped, writable, `size` bytes long.
        unsafe { ptr::write_bytes(ptr as *mut u8, TRAP_FILL, size) };

        Ok(Self {
            ptr: ptr as *mut u8,
            size,
            offset: 0,
            prefix_end: 0,
            phase: Phase::Writable,
        })
    }

    /// Current write offset.
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.size
    }

    /// Bytes left before the end of the region.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.size - self.offset
    }

    #[inline]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Pointer at a given offset.
    #[inline]
    pub fn ptr_at(&self, offset: usize) -> *const u8 {
        assert!(offset <= self.size);
        // SAFETY: offset is within the mapping.
        unsafe { self.ptr.add(offset) as *const u8 }
    }

    /// Move the cursor back to a saved position.
    #[inline]
    pub fn set_offset(&mut self, offset: usize) {
        assert!(offset <= self.size);
        self.offset = offset;
    }

    /// Everything emitted so far becomes permanent: [`CodeRegion::clear`]
    /// rewinds to here instead of to the start.
    pub fn reserve_prefix(&mut self) {
        self.prefix_end = self.offset;
    }

    /// End of the permanent prefix.
    #[inline]
    pub fn prefix_end(&self) -> usize {
        self.prefix_end
    }

    /// Drop all code after the prefix: trap-fill and rewind the cursor.
    ///
    /// The region must be writable.
    pub fn clear(&mut self) {
        assert_eq!(self.phase, Phase::Writable, "clearing a non-writable code region");
        // SAFETY: prefix_end..offset lies inside the mapping.
        unsafe {
            ptr::write_bytes(
                self.ptr.add(self.prefix_end),
                TRAP_FILL,
                self.offset - self.prefix_end,
            )
        };
        self.offset = self.prefix_end;
    }

    // -- Emit methods --

    #[inline]
    fn check_room(&self, n: usize) {
        debug_assert_eq!(self.phase, Phase::Writable, "emitting into executable code");
        assert!(
            self.offset + n <= self.size,
            "code region overflow: {} + {n} > {}",
            self.offset,
            self.size
        );
    }

    #[inline]
    pub fn emit_u8(&mut self, val: u8) {
        self.check_room(1);
        unsafe { self.ptr.add(self.offset).write(val) };
        self.offset += 1;
    }

    #[inline]
    pub fn emit_u16(&mut self, val: u16) {
        self.check_room(2);
        unsafe { (self.ptr.add(self.offset) as *mut u16).write_unaligned(val) };
        self.offset += 2;
    }

    #[inline]
    pub fn emit_u32(&mut self, val: u32) {
        self.check_room(4);
        unsafe { (self.ptr.add(self.offset) as *mut u32).write_unaligned(val) };
        self.offset += 4;
    }

    #[inline]
    pub fn emit_u64(&mut self, val: u64) {
        self.check_room(8);
        unsafe { (self.ptr.add(self.offset) as *mut u64).write_unaligned(val) };
        self.offset += 8;
    }

    #[inline]
    pub fn emit_bytes(&mut self, data: &[u8]) {
        self.check_room(data.len());
        unsafe {
            ptr::copy_nonoverlapping(data.as_ptr(), self.ptr.add(self.offset), data.len());
        }
        self.offset += data.len();
    }

    /// Patch a byte at `offset`.
    #[inline]
    pub fn patch_u8(&mut self, offset: usize, val: u8) {
        assert!(offset < self.size);
        assert_eq!(self.phase, Phase::Writable, "patching a non-writable code region");
        unsafe { self.ptr.add(offset).write(val) };
    }

    /// Patch a u32 at `offset`.
    #[inline]
    pub fn patch_u32(&mut self, offset: usize, val: u32) {
        assert!(offset + 4 <= self.size);
        assert_eq!(self.phase, Phase::Writable, "patching a non-writable code region");
        unsafe { (self.ptr.add(offset) as *mut u32).write_unaligned(val) };
    }

    #[inline]
    pub fn read_u8(&self, offset: usize) -> u8 {
        assert!(offset < self.size);
        unsafe { self.ptr.add(offset).read() }
    }

    #[inline]
    pub fn read_u32(&self, offset: usize) -> u32 {
        assert!(offset + 4 <= self.size);
        unsafe { (self.ptr.add(offset) as *const u32).read_unaligned() }
    }

    // -- Phase switching --

    /// Make the region executable and read-only. No-op when already
    /// executable.
    pub fn set_executable(&mut self) -> Result<(), CodeRegionError> {
        if self.phase == Phase::Executable {
            return Ok(());
        }
        self.protect(libc::PROT_READ | libc::PROT_EXEC)?;
        self.phase = Phase::Executable;
        Ok(())
    }

    /// Make the region writable and non-executable. No-op when already
    /// writable.
    pub fn set_writable(&mut self) -> Result<(), CodeRegionError> {
        if self.phase == Phase::Writable {
            return Ok(());
        }
        self.protect(libc::PROT_READ | libc::PROT_WRITE)?;
        self.phase = Phase::Writable;
        Ok(())
    }

    fn protect(&self, prot: libc::c_int) -> Result<(), CodeRegionError> {
        // SAFETY: the whole mapping, page aligned by construction.
        let ret = unsafe { libc::mprotect(self.ptr as *mut libc::c_void, self.size, prot) };
        if ret != 0 {
            Err(CodeRegionError::Protect(io::Error::last_os_error()))
        } else {
            Ok(())
        }
    }

    /// Bytes emitted so far.
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr..ptr+offset is mapped and readable in both phases.
        unsafe { std::slice::from_raw_parts(self.ptr, self.offset) }
    }
}

impl Drop for CodeRegion {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe {
                libc::munmap(self.ptr as *mut libc::c_void, self.size);
            }
        }
    }
}

impl std::fmt::Debug for CodeRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeRegion")
            .field("base", &self.ptr)
            .field("size", &self.size)
            .field("offset", &self.offset)
            .field("prefix_end", &self.prefix_end)
            .field("phase", &self.phase)
            .finish()
    }
}

fn page_size() -> usize {
    // SAFETY: sysconf is always safe to call.
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}
