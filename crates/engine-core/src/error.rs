//! Engine status codes and the caller-facing error type.
//!
//! [`ErrorCode`] is the closed status enumeration every engine operation
//! reports through. [`Error`] wraps it and adds the caller-side validation
//! failures that are detected before any engine state is touched.

use std::fmt;

use thiserror::Error;

use crate::api::{Arch, Mode};
use crate::state::RegisterKind;

/// Status classes used to group engine codes for diagnostics and policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum ErrorClass {
    /// No failure.
    None,
    /// Allocation or table-capacity exhaustion.
    Resource,
    /// Session configuration or argument rejected by the engine.
    Session,
    /// Mapping table or emulated memory access failure.
    Memory,
    /// Hook registry failure.
    Hook,
    /// Register file failure.
    Register,
    /// Failure raised while instructions were executing.
    Execution,
}

/// Closed engine status enumeration.
///
/// Values are stable and may be stored or exchanged as raw `u32` codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Error)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u32)]
pub enum ErrorCode {
    /// The last operation succeeded.
    #[default]
    #[error("no error")]
    Ok = 0,
    /// Backing storage could not be allocated.
    #[error("out of memory")]
    NoMemory = 1,
    /// No execution backend exists for the requested architecture.
    #[error("unsupported architecture")]
    ArchUnsupported = 2,
    /// A handle does not refer to a live session.
    #[error("invalid handle")]
    InvalidHandle = 3,
    /// The backend rejected the requested mode bits.
    #[error("unsupported mode for this architecture")]
    ModeUnsupported = 4,
    /// Read from an address with no mapping.
    #[error("read from unmapped memory")]
    ReadUnmapped = 5,
    /// Write to an address with no mapping.
    #[error("write to unmapped memory")]
    WriteUnmapped = 6,
    /// Instruction fetch from an address with no mapping.
    #[error("fetch from unmapped memory")]
    FetchUnmapped = 7,
    /// Unknown hook handle or hook type incompatible with its callback.
    #[error("invalid hook type or handle")]
    InvalidHook = 8,
    /// Instruction bytes do not decode.
    #[error("invalid instruction")]
    InvalidInstruction = 9,
    /// New mapping overlaps an existing one.
    #[error("mapping overlaps an existing region")]
    MapOverlap = 10,
    /// Emulated write to a region without write permission.
    #[error("write to write-protected memory")]
    WriteProtected = 11,
    /// Emulated read from a region without read permission.
    #[error("read from read-protected memory")]
    ReadProtected = 12,
    /// Instruction fetch from a region without execute permission.
    #[error("fetch from non-executable memory")]
    FetchProtected = 13,
    /// Argument rejected by the engine.
    #[error("invalid argument")]
    InvalidArgument = 14,
    /// The mapping table has no free slot.
    #[error("mapping table is full")]
    MapTableFull = 15,
    /// Caller-supplied region buffer cannot hold every mapping.
    #[error("insufficient room for memory map entries")]
    InsufficientMapEntries = 16,
    /// Feature not provided by this architecture backend.
    #[error("feature unsupported by architecture")]
    FeatureUnsupported = 17,
    /// Register ID unknown to this architecture.
    #[error("invalid register")]
    InvalidRegister = 18,
    /// Unmap or protect over bytes with no mapping.
    #[error("no mapping covers the requested range")]
    MapNotFound = 19,
    /// Configured instruction limit reached before any other stop condition.
    #[error("maximum instruction count exceeded")]
    InstructionLimit = 20,
    /// Timeout cannot be represented by the engine clock.
    #[error("invalid timeout value")]
    InvalidTimeout = 21,
    /// CPU exception with no interrupt hook to service it.
    #[error("unhandled cpu exception")]
    Exception = 22,
}

impl ErrorCode {
    /// Every defined code in ascending numeric order.
    pub const ALL: [Self; 23] = [
        Self::Ok,
        Self::NoMemory,
        Self::ArchUnsupported,
        Self::InvalidHandle,
        Self::ModeUnsupported,
        Self::ReadUnmapped,
        Self::WriteUnmapped,
        Self::FetchUnmapped,
        Self::InvalidHook,
        Self::InvalidInstruction,
        Self::MapOverlap,
        Self::WriteProtected,
        Self::ReadProtected,
        Self::FetchProtected,
        Self::InvalidArgument,
        Self::MapTableFull,
        Self::InsufficientMapEntries,
        Self::FeatureUnsupported,
        Self::InvalidRegister,
        Self::MapNotFound,
        Self::InstructionLimit,
        Self::InvalidTimeout,
        Self::Exception,
    ];

    /// Converts a code to its stable numeric value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self as u32
    }

    /// Converts a stable numeric value back into a code.
    #[must_use]
    pub const fn from_u32(code: u32) -> Option<Self> {
        if (code as usize) < Self::ALL.len() {
            Some(Self::ALL[code as usize])
        } else {
            None
        }
    }

    /// Human-readable text for this code.
    #[must_use]
    pub fn description(self) -> String {
        self.to_string()
    }

    /// Returns `true` for [`ErrorCode::Ok`].
    #[must_use]
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Returns the status class for this code.
    #[must_use]
    pub const fn class(self) -> ErrorClass {
        match self {
            Self::Ok => ErrorClass::None,
            Self::NoMemory | Self::MapTableFull | Self::InsufficientMapEntries => {
                ErrorClass::Resource
            }
            Self::ArchUnsupported
            | Self::InvalidHandle
            | Self::ModeUnsupported
            | Self::InvalidArgument
            | Self::FeatureUnsupported
            | Self::InvalidTimeout => ErrorClass::Session,
            Self::ReadUnmapped
            | Self::WriteUnmapped
            | Self::FetchUnmapped
            | Self::MapOverlap
            | Self::WriteProtected
            | Self::ReadProtected
            | Self::FetchProtected
            | Self::MapNotFound => ErrorClass::Memory,
            Self::InvalidHook => ErrorClass::Hook,
            Self::InvalidRegister => ErrorClass::Register,
            Self::InvalidInstruction | Self::InstructionLimit | Self::Exception => {
                ErrorClass::Execution
            }
        }
    }

    /// Returns `true` for codes raised by an emulated memory access.
    #[must_use]
    pub const fn is_access_fault(self) -> bool {
        matches!(
            self,
            Self::ReadUnmapped
                | Self::WriteUnmapped
                | Self::FetchUnmapped
                | Self::ReadProtected
                | Self::WriteProtected
                | Self::FetchProtected
        )
    }
}

/// Architecture and mode pair a session or context is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Target {
    /// CPU family.
    pub arch: Arch,
    /// Mode bits.
    pub mode: Mode,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({:#x})", self.arch, self.mode.bits())
    }
}

/// Errors returned by [`crate::Session`] operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The session was closed.
    #[error("session is closed")]
    Disposed,
    /// Address is not a multiple of the page size.
    #[error("address {address:#x} is not aligned to the {page_size:#x}-byte page size")]
    MisalignedAddress {
        /// Offending address.
        address: u64,
        /// Session page size.
        page_size: u64,
    },
    /// Size is zero or not a multiple of the page size.
    #[error("size {size:#x} is not a non-zero multiple of the {page_size:#x}-byte page size")]
    MisalignedSize {
        /// Offending size.
        size: u64,
        /// Session page size.
        page_size: u64,
    },
    /// Permission bits outside `Permission::ALL`.
    #[error("permission bits {0:#x} exceed the valid set")]
    InvalidPermissions(u32),
    /// Requested transfer count is larger than the supplied buffer.
    #[error("count {count} exceeds buffer length {len}")]
    CountOutOfRange {
        /// Requested byte count.
        count: usize,
        /// Buffer length.
        len: usize,
    },
    /// External buffer cannot back the requested mapping.
    #[error("external buffer holds {len} bytes but the mapping needs {size}")]
    ExternalBufferTooSmall {
        /// Buffer length.
        len: usize,
        /// Mapping size.
        size: u64,
    },
    /// Context belongs to another architecture or mode.
    #[error("context captured for {found} cannot be restored into a {expected} session")]
    ArchitectureMismatch {
        /// Session target.
        expected: Target,
        /// Context target.
        found: Target,
    },
    /// Accessor type does not match the register's native representation.
    #[error("register {id} holds {actual:?} values, not {requested:?}")]
    RegisterKindMismatch {
        /// Register ID.
        id: i32,
        /// Native kind of the register.
        actual: RegisterKind,
        /// Kind implied by the accessor.
        requested: RegisterKind,
    },
    /// Configured page size is not a power of two of at least 2 bytes.
    #[error("page size {0:#x} is not a power of two")]
    InvalidPageSize(u64),
    /// Encoded context image could not be decoded.
    #[error("malformed context image: {0}")]
    MalformedContext(&'static str),
    /// Failure reported by the engine.
    #[error(transparent)]
    Engine(#[from] ErrorCode),
}

impl Error {
    /// Returns the engine status code, when the engine reported this error.
    #[must_use]
    pub const fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Engine(code) => Some(*code),
            _ => None,
        }
    }

    /// Returns `true` when the error was detected before reaching the engine.
    #[must_use]
    pub const fn is_caller_error(&self) -> bool {
        !matches!(self, Self::Engine(_))
    }
}

/// Result alias for session operations.
pub type Result<T> = std::result::Result<T, Error>;
