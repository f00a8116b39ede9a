//! CPU emulation engine: sessions with page-granular memory, typed register
//! files, address-scoped hooks and detachable register contexts.

/// Architecture, mode, query selectors, configuration and version.
pub mod api;
pub use api::{
    version, Arch, Mode, QueryType, SessionConfig, DEFAULT_MAX_REGIONS, DEFAULT_PAGE_SIZE,
    VERSION_MAJOR, VERSION_MINOR,
};

/// Engine status codes and caller-facing errors.
pub mod error;
pub use error::{Error, ErrorClass, ErrorCode, Result, Target};

/// Mapping table, permissions and external buffers.
pub mod memory;
pub use memory::{AccessKind, ExternalBuffer, MemoryManager, Permission, Region};

/// Register layouts, typed register storage and lifecycle state.
pub mod state;
pub use state::{
    RegisterDescriptor, RegisterFile, RegisterId, RegisterKind, RegisterValue, RunState,
    Vector128,
};

/// Hook types, ranges and callbacks.
pub mod hooks;
pub use hooks::{
    CodeCallback, HookCallback, HookHandle, HookRange, HookType, InstructionHook,
    InterruptCallback, InvalidInstructionCallback, MemoryAccess, MemoryCallback,
    MemoryEventCallback, PortInCallback, PortOutCallback, SyscallCallback,
};

/// Architecture backends.
pub mod cpu;
pub use cpu::nullbyte::NullbyteRegister;

/// Register snapshots.
pub mod context;
pub use context::{Context, SnapshotVersion, CONTEXT_HEADER_LEN};

/// Sessions and the execution loop.
pub mod session;
pub use session::{Session, StopHandle};

#[cfg(test)]
use env_logger as _;
#[cfg(test)]
use proptest as _;
#[cfg(test)]
use rstest as _;
#[cfg(test)]
use serde_json as _;
