use std::fmt;

/// Virtual address inside a module's code.
///
/// For images patched on disk this is the link-time address from the
/// section headers; for live regions it is the address the code is
/// mapped at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtAddr(pub u64);

impl VirtAddr {
    pub fn addr(self) -> u64 {
        self.0
    }
}

impl fmt::Display for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

impl fmt::LowerHex for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl std::ops::Add<u64> for VirtAddr {
    type Output = VirtAddr;
    fn add(self, rhs: u64) -> Self::Output {
        VirtAddr(self.0 + rhs)
    }
}

impl std::ops::Sub<u64> for VirtAddr {
    type Output = VirtAddr;
    fn sub(self, rhs: u64) -> Self::Output {
        VirtAddr(self.0 - rhs)
    }
}

/// Width of code pointers in the scanned module.
///
/// Selects the decoder bitness and the numeric mode of the call-target
/// arithmetic: 64-bit mode sign-extends 32-bit displacements, 32-bit
/// mode adds them with unsigned wraparound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerWidth {
    U32,
    U64,
}

impl PointerWidth {
    /// Pointer width of the host.
    pub const fn native() -> Self {
        if cfg!(target_pointer_width = "64") {
            PointerWidth::U64
        } else {
            PointerWidth::U32
        }
    }

    /// Decoder bitness for this width.
    pub fn bitness(self) -> u32 {
        match self {
            PointerWidth::U32 => 32,
            PointerWidth::U64 => 64,
        }
    }
}

impl fmt::Display for PointerWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PointerWidth::U32 => write!(f, "32-bit"),
            PointerWidth::U64 => write!(f, "64-bit"),
        }
    }
}
