//! Executable code regions.
//!
//! A `CodeRegion` is an ownership-free view over one contiguous area
//! of module code. The logical length (`text_len`) may be shorter than
//! the borrowed buffer: decoders may read an instruction that straddles
//! the logical end, as long as its bytes are still inside the buffer.

use crate::error::{Error, Result};
use crate::types::VirtAddr;

pub struct CodeRegion<'a> {
    bytes: &'a mut [u8],
    base: VirtAddr,
    text_len: usize,
}

impl<'a> CodeRegion<'a> {
    /// View over `bytes` starting at `base`; logical end = physical end.
    pub fn new(bytes: &'a mut [u8], base: VirtAddr) -> Self {
        let text_len = bytes.len();
        Self { bytes, base, text_len }
    }

    /// View whose logical code ends before the buffer does.
    pub fn with_text_len(bytes: &'a mut [u8], base: VirtAddr, text_len: usize) -> Result<Self> {
        if text_len > bytes.len() {
            return Err(Error::Region(format!(
                "text length {} exceeds buffer length {}",
                text_len,
                bytes.len()
            )));
        }
        Ok(Self { bytes, base, text_len })
    }

    /// View over live module memory.
    ///
    /// # Safety
    ///
    /// `ptr` must point to `len` readable and writable bytes that stay
    /// resident for `'a`, with no other access to them while the region
    /// exists. In particular no thread may execute from the range while
    /// it is being patched: an instruction fetch concurrent with a
    /// displacement rewrite can observe a torn 4-byte value.
    pub unsafe fn from_raw_parts(ptr: *mut u8, len: usize, base: VirtAddr) -> Self {
        Self::new(unsafe { std::slice::from_raw_parts_mut(ptr, len) }, base)
    }

    /// First code address.
    pub fn begin(&self) -> VirtAddr {
        self.base
    }

    /// One past the last logical code byte.
    pub fn end(&self) -> VirtAddr {
        self.base + self.text_len as u64
    }

    pub fn text_len(&self) -> usize {
        self.text_len
    }

    /// Length of the whole borrowed buffer.
    pub fn physical_len(&self) -> usize {
        self.bytes.len()
    }

    pub fn bytes(&self) -> &[u8] {
        self.bytes
    }

    pub(crate) fn bytes_mut(&mut self) -> &mut [u8] {
        self.bytes
    }
}
