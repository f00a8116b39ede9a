//! Architecture backends.
//!
//! A backend is a stateless [`Cpu`] description: its register layout, how to
//! size and classify instruction bytes, and how to execute one instruction
//! against a [`Machine`]. The session owns every piece of mutable state and
//! lends it to the backend through the [`Machine`] trait, which is where
//! memory hooks and instruction hooks are dispatched.

use std::fmt;

use crate::api::{Arch, Mode};
use crate::error::ErrorCode;
use crate::hooks::InstructionHook;
use crate::state::{RegisterDescriptor, RegisterId};

/// Nullbyte 16-bit core.
pub mod nullbyte;

/// How an executed instruction ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Retired normally.
    Retired,
    /// Retired and requested the run to end.
    Halt,
    /// Retired and raised the given interrupt number.
    Interrupt(u32),
}

/// Result of one executed instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    /// Fixed cycle cost charged for the instruction.
    pub cycles: u16,
    /// How the instruction ended.
    pub outcome: Outcome,
}

/// Session state lent to a backend while one instruction executes.
///
/// Memory accesses go through permission checks and hooks; a failed access
/// returns the fault code and the backend must not commit register changes.
pub trait Machine {
    /// Reads an integer register, zero-extended. Unknown IDs read as zero.
    fn register(&self, id: RegisterId) -> u64;

    /// Writes an integer register, truncated to its width.
    fn set_register(&mut self, id: RegisterId, value: u64);

    /// Emulated data read.
    ///
    /// # Errors
    ///
    /// Unmapped or protected memory not resolved by an event hook.
    fn read(&mut self, address: u64, out: &mut [u8]) -> Result<(), ErrorCode>;

    /// Emulated data write.
    ///
    /// # Errors
    ///
    /// Unmapped or protected memory not resolved by an event hook.
    fn write(&mut self, address: u64, data: &[u8]) -> Result<(), ErrorCode>;

    /// Port input; unhooked ports read as zero.
    fn port_in(&mut self, port: u32, size: usize) -> u32;

    /// Port output; unhooked ports discard the value.
    fn port_out(&mut self, port: u32, size: usize, value: u32);
}

/// Stateless description of one architecture and mode.
pub trait Cpu: Send + Sync + fmt::Debug {
    /// CPU family.
    fn arch(&self) -> Arch;

    /// Mode bits this backend was selected for.
    fn mode(&self) -> Mode;

    /// Register layout in context-image order.
    fn registers(&self) -> &'static [RegisterDescriptor];

    /// Register holding the address of the next instruction.
    fn program_counter(&self) -> RegisterId;

    /// Mask applied to program counter values.
    fn address_mask(&self) -> u64;

    /// Bytes needed to size an instruction with [`Cpu::instruction_length`].
    fn min_instruction_size(&self) -> usize;

    /// Total length of the instruction starting with `head`, or `None` when
    /// the bytes cannot start a valid instruction.
    fn instruction_length(&self, head: &[u8]) -> Option<usize>;

    /// Returns `true` when `insn` ends a basic block.
    fn ends_block(&self, insn: &[u8]) -> bool;

    /// Returns `true` when [`crate::HookType::INSN`] hooks for `instruction`
    /// can fire on this backend.
    fn supports_instruction_hook(&self, instruction: InstructionHook) -> bool;

    /// Executes `insn`, fetched at `pc`.
    ///
    /// # Errors
    ///
    /// [`ErrorCode::InvalidInstruction`] for undecodable bytes or any fault
    /// raised by a [`Machine`] access; no register is changed in that case.
    fn execute(&self, insn: &[u8], pc: u64, machine: &mut dyn Machine) -> Result<Step, ErrorCode>;
}

/// Returns `true` when some mode of `arch` has a compiled-in backend.
#[must_use]
pub const fn backend_exists(arch: Arch) -> bool {
    matches!(arch, Arch::Nullbyte)
}

/// Selects the backend for an architecture and mode pair.
///
/// # Errors
///
/// [`ErrorCode::ArchUnsupported`] when no backend exists for `arch` and
/// [`ErrorCode::ModeUnsupported`] when the backend rejects `mode`.
pub fn lookup(arch: Arch, mode: Mode) -> Result<&'static dyn Cpu, ErrorCode> {
    if !backend_exists(arch) {
        return Err(ErrorCode::ArchUnsupported);
    }
    nullbyte::select(mode).ok_or(ErrorCode::ModeUnsupported)
}
