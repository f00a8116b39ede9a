//! Permission bits, access kinds, and caller-side range validation.

use bitflags::bitflags;

use crate::error::{Error, ErrorCode};
use crate::hooks::HookType;

bitflags! {
    /// Access permissions of a mapped region.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
    pub struct Permission: u32 {
        /// No access.
        const NONE = 0;
        /// Readable.
        const READ = 1 << 0;
        /// Writable.
        const WRITE = 1 << 1;
        /// Executable.
        const EXEC = 1 << 2;
        /// Readable, writable, and executable.
        const ALL = Self::READ.bits() | Self::WRITE.bits() | Self::EXEC.bits();
    }
}

impl Permission {
    /// Parses raw permission bits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPermissions`] when a bit outside [`Permission::ALL`]
    /// is set.
    pub const fn from_raw(bits: u32) -> Result<Self, Error> {
        match Self::from_bits(bits) {
            Some(perms) => Ok(perms),
            None => Err(Error::InvalidPermissions(bits)),
        }
    }

    /// Rejects values built with unknown bits, e.g. via `from_bits_retain`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPermissions`] when a bit outside [`Permission::ALL`]
    /// is set.
    pub const fn validate(self) -> Result<Self, Error> {
        Self::from_raw(self.bits())
    }
}

/// Kind of an emulated memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum AccessKind {
    /// Data read.
    Read,
    /// Data write.
    Write,
    /// Instruction fetch.
    Fetch,
}

impl AccessKind {
    /// Permission bit the target region must carry.
    #[must_use]
    pub const fn required_permission(self) -> Permission {
        match self {
            Self::Read => Permission::READ,
            Self::Write => Permission::WRITE,
            Self::Fetch => Permission::EXEC,
        }
    }

    /// Engine code raised when the address has no mapping.
    #[must_use]
    pub const fn unmapped_code(self) -> ErrorCode {
        match self {
            Self::Read => ErrorCode::ReadUnmapped,
            Self::Write => ErrorCode::WriteUnmapped,
            Self::Fetch => ErrorCode::FetchUnmapped,
        }
    }

    /// Engine code raised when the mapping lacks the required permission.
    #[must_use]
    pub const fn protected_code(self) -> ErrorCode {
        match self {
            Self::Read => ErrorCode::ReadProtected,
            Self::Write => ErrorCode::WriteProtected,
            Self::Fetch => ErrorCode::FetchProtected,
        }
    }

    /// Event hook type fired for an access to unmapped memory.
    #[must_use]
    pub const fn unmapped_hook(self) -> HookType {
        match self {
            Self::Read => HookType::MEM_READ_UNMAPPED,
            Self::Write => HookType::MEM_WRITE_UNMAPPED,
            Self::Fetch => HookType::MEM_FETCH_UNMAPPED,
        }
    }

    /// Event hook type fired for a permission violation.
    #[must_use]
    pub const fn protected_hook(self) -> HookType {
        match self {
            Self::Read => HookType::MEM_READ_PROT,
            Self::Write => HookType::MEM_WRITE_PROT,
            Self::Fetch => HookType::MEM_FETCH_PROT,
        }
    }

    /// Observer hook type fired before a permitted access.
    #[must_use]
    pub const fn valid_hook(self) -> HookType {
        match self {
            Self::Read => HookType::MEM_READ,
            Self::Write => HookType::MEM_WRITE,
            Self::Fetch => HookType::MEM_FETCH,
        }
    }
}

/// Reason an emulated access cannot proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessFault {
    /// First byte of the range with no mapping.
    Unmapped {
        /// Faulting address.
        address: u64,
    },
    /// First byte of the range whose region lacks the required permission.
    Protected {
        /// Faulting address.
        address: u64,
    },
}

impl AccessFault {
    /// Address of the first offending byte.
    #[must_use]
    pub const fn address(self) -> u64 {
        match self {
            Self::Unmapped { address } | Self::Protected { address } => address,
        }
    }
}

/// Validates a page-granular `(address, size)` pair.
///
/// # Errors
///
/// Returns [`Error::MisalignedAddress`] when `address` is not page aligned and
/// [`Error::MisalignedSize`] when `size` is zero or not a page multiple.
pub const fn validate_page_range(address: u64, size: u64, page_size: u64) -> Result<(), Error> {
    let mask = page_size - 1;
    if address & mask != 0 {
        return Err(Error::MisalignedAddress { address, page_size });
    }
    if size == 0 || size & mask != 0 {
        return Err(Error::MisalignedSize { size, page_size });
    }
    Ok(())
}

/// Returns the exclusive end of `[address, address + size)`, if it fits.
#[must_use]
pub const fn range_end(address: u64, size: u64) -> Option<u64> {
    address.checked_add(size)
}
