//! Session state model primitives.

/// Register file types and storage model.
pub mod registers;
/// Session lifecycle state machine.
pub mod run_state;

pub use registers::{
    RegisterDescriptor, RegisterFile, RegisterId, RegisterKind, RegisterValue, Vector128,
};
pub use run_state::RunState;
