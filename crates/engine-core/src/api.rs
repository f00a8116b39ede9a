//! Public host-facing API contracts: architecture and mode selection,
//! introspection queries, session configuration, and version reporting.

use bitflags::bitflags;

use crate::error::Error;

/// Engine API major version.
pub const VERSION_MAJOR: u32 = 0;
/// Engine API minor version.
pub const VERSION_MINOR: u32 = 1;

/// Default mapping granularity in bytes.
pub const DEFAULT_PAGE_SIZE: u64 = 4096;

/// Default capacity of the mapping table.
pub const DEFAULT_MAX_REGIONS: usize = 4096;

/// Returns the engine `(major, minor)` version.
#[must_use]
pub const fn version() -> (u32, u32) {
    (VERSION_MAJOR, VERSION_MINOR)
}

/// CPU families known to the engine.
///
/// Only families with a compiled-in backend can be opened; see
/// [`Arch::is_supported`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u32)]
pub enum Arch {
    /// 32-bit ARM.
    Arm = 1,
    /// 64-bit ARM.
    Arm64 = 2,
    /// MIPS.
    Mips = 3,
    /// x86 and x86-64.
    X86 = 4,
    /// PowerPC.
    Ppc = 5,
    /// SPARC.
    Sparc = 6,
    /// Motorola 68k.
    M68k = 7,
    /// Nullbyte 16-bit core.
    Nullbyte = 8,
}

impl Arch {
    /// Every known family in ascending numeric order.
    pub const ALL: [Self; 8] = [
        Self::Arm,
        Self::Arm64,
        Self::Mips,
        Self::X86,
        Self::Ppc,
        Self::Sparc,
        Self::M68k,
        Self::Nullbyte,
    ];

    /// Converts the family to its stable numeric value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self as u32
    }

    /// Converts a stable numeric value back into a family.
    #[must_use]
    pub const fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::Arm),
            2 => Some(Self::Arm64),
            3 => Some(Self::Mips),
            4 => Some(Self::X86),
            5 => Some(Self::Ppc),
            6 => Some(Self::Sparc),
            7 => Some(Self::M68k),
            8 => Some(Self::Nullbyte),
            _ => None,
        }
    }

    /// Returns `true` when an execution backend is available for this family.
    #[must_use]
    pub fn is_supported(self) -> bool {
        crate::cpu::backend_exists(self)
    }
}

bitflags! {
    /// Mode bits selecting a variant of an architecture.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
    pub struct Mode: u32 {
        /// Little-endian byte order (the absence of [`Mode::BIG_ENDIAN`]).
        const LITTLE_ENDIAN = 0;
        /// 16-bit operation.
        const MODE_16 = 1 << 1;
        /// 32-bit operation.
        const MODE_32 = 1 << 2;
        /// 64-bit operation.
        const MODE_64 = 1 << 3;
        /// ARM Thumb instruction set.
        const THUMB = 1 << 4;
        /// Big-endian byte order.
        const BIG_ENDIAN = 1 << 30;
    }
}

impl Mode {
    /// Returns `true` when memory words are stored most significant byte first.
    #[must_use]
    pub const fn is_big_endian(self) -> bool {
        self.contains(Self::BIG_ENDIAN)
    }
}

/// Read-only introspection selectors accepted by [`crate::Session::query`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u32)]
pub enum QueryType {
    /// Current mode bits.
    Mode = 1,
    /// Mapping granularity in bytes.
    PageSize = 2,
    /// Architecture numeric value.
    Arch = 3,
    /// `1` when the last `start` ended because its timeout elapsed.
    Timeout = 4,
}

/// Top-level immutable configuration for a session.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct SessionConfig {
    /// Mapping granularity; must be a power of two.
    pub page_size: u64,
    /// Maximum number of simultaneously mapped regions.
    pub max_regions: usize,
    /// Runaway guard: instructions one `start` may retire before failing.
    /// Iterations a hook redirects or absorbs count as well.
    pub instruction_limit: Option<u64>,
    /// Emits a `trace` log record for every retired instruction.
    pub trace_instructions: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            max_regions: DEFAULT_MAX_REGIONS,
            instruction_limit: None,
            trace_instructions: false,
        }
    }
}

impl SessionConfig {
    /// Checks values that cannot be represented by the engine.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPageSize`] when `page_size` is not a power of
    /// two of at least 2 bytes.
    pub const fn validate(&self) -> Result<(), Error> {
        if self.page_size < 2 || !self.page_size.is_power_of_two() {
            return Err(Error::InvalidPageSize(self.page_size));
        }
        Ok(())
    }

    /// Returns the low-bit mask used for alignment checks.
    #[must_use]
    pub const fn page_mask(&self) -> u64 {
        self.page_size - 1
    }
}
