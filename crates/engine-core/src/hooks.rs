//! Hook registry: bit-composed hook types, address ranges, and the tagged
//! callback variants dispatched while a session executes.

use std::collections::BTreeMap;
use std::fmt;

use bitflags::bitflags;

use crate::error::ErrorCode;
use crate::session::Session;

bitflags! {
    /// Event classes a hook can subscribe to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
    pub struct HookType: u32 {
        /// CPU interrupt or exception.
        const INTR = 1 << 0;
        /// Specific instruction (port input/output).
        const INSN = 1 << 1;
        /// Every instruction in range, before it executes.
        const CODE = 1 << 2;
        /// First instruction of every basic block in range.
        const BLOCK = 1 << 3;
        /// Read from unmapped memory.
        const MEM_READ_UNMAPPED = 1 << 4;
        /// Write to unmapped memory.
        const MEM_WRITE_UNMAPPED = 1 << 5;
        /// Fetch from unmapped memory.
        const MEM_FETCH_UNMAPPED = 1 << 6;
        /// Read from memory without read permission.
        const MEM_READ_PROT = 1 << 7;
        /// Write to memory without write permission.
        const MEM_WRITE_PROT = 1 << 8;
        /// Fetch from memory without execute permission.
        const MEM_FETCH_PROT = 1 << 9;
        /// Permitted read, before it happens.
        const MEM_READ = 1 << 10;
        /// Permitted write, before it happens.
        const MEM_WRITE = 1 << 11;
        /// Permitted fetch, before it happens.
        const MEM_FETCH = 1 << 12;
        /// Permitted read, after the value is known.
        const MEM_READ_AFTER = 1 << 13;
        /// Undecodable instruction.
        const INSN_INVALID = 1 << 14;

        /// Any access to unmapped memory.
        const MEM_UNMAPPED = Self::MEM_READ_UNMAPPED.bits()
            | Self::MEM_WRITE_UNMAPPED.bits()
            | Self::MEM_FETCH_UNMAPPED.bits();
        /// Any permission violation.
        const MEM_PROT = Self::MEM_READ_PROT.bits()
            | Self::MEM_WRITE_PROT.bits()
            | Self::MEM_FETCH_PROT.bits();
        /// Any invalid read.
        const MEM_READ_INVALID = Self::MEM_READ_PROT.bits() | Self::MEM_READ_UNMAPPED.bits();
        /// Any invalid write.
        const MEM_WRITE_INVALID = Self::MEM_WRITE_PROT.bits() | Self::MEM_WRITE_UNMAPPED.bits();
        /// Any invalid fetch.
        const MEM_FETCH_INVALID = Self::MEM_FETCH_PROT.bits() | Self::MEM_FETCH_UNMAPPED.bits();
        /// Any invalid access.
        const MEM_INVALID = Self::MEM_UNMAPPED.bits() | Self::MEM_PROT.bits();
        /// Any permitted access.
        const MEM_VALID = Self::MEM_READ.bits() | Self::MEM_WRITE.bits() | Self::MEM_FETCH.bits();
    }
}

/// Inclusive address range a hook is scoped to.
///
/// `begin > end` means the hook is active for every address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct HookRange {
    /// First address.
    pub begin: u64,
    /// Last address (inclusive).
    pub end: u64,
}

impl HookRange {
    /// Range that matches every address.
    pub const ALL: Self = Self { begin: 1, end: 0 };

    /// Creates a range; `begin > end` yields an unbounded range.
    #[must_use]
    pub const fn new(begin: u64, end: u64) -> Self {
        Self { begin, end }
    }

    /// Returns `true` when the range matches every address.
    #[must_use]
    pub const fn is_unbounded(self) -> bool {
        self.begin > self.end
    }

    /// Returns `true` when `address` falls in the range.
    #[must_use]
    pub const fn contains(self, address: u64) -> bool {
        self.is_unbounded() || (address >= self.begin && address <= self.end)
    }
}

impl Default for HookRange {
    fn default() -> Self {
        Self::ALL
    }
}

/// Opaque handle returned by hook registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HookHandle(u64);

impl HookHandle {
    /// Raw handle value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

/// Instructions that can be hooked individually with [`HookType::INSN`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum InstructionHook {
    /// Port input; the callback supplies the value read.
    PortIn,
    /// Port output; the callback receives the value written.
    PortOut,
    /// System call instruction.
    Syscall,
}

/// One memory access as seen by a memory hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryAccess {
    /// Single hook-type bit describing the access.
    pub kind: HookType,
    /// First byte accessed.
    pub address: u64,
    /// Access width in bytes.
    pub size: usize,
    /// Value written, value read (for `MEM_READ_AFTER`), or zero.
    pub value: i64,
}

/// `(session, address, size, token)` for code and block hooks.
pub type CodeCallback = Box<dyn FnMut(&mut Session, u64, u32, u64) + Send>;
/// `(session, interrupt number, token)`.
pub type InterruptCallback = Box<dyn FnMut(&mut Session, u32, u64) + Send>;
/// `(session, port, size, token) -> value`.
pub type PortInCallback = Box<dyn FnMut(&mut Session, u32, usize, u64) -> u32 + Send>;
/// `(session, port, size, value, token)`.
pub type PortOutCallback = Box<dyn FnMut(&mut Session, u32, usize, u32, u64) + Send>;
/// `(session, token)`.
pub type SyscallCallback = Box<dyn FnMut(&mut Session, u64) + Send>;
/// `(session, token) -> handled`.
pub type InvalidInstructionCallback = Box<dyn FnMut(&mut Session, u64) -> bool + Send>;
/// `(session, access, token)` for permitted accesses.
pub type MemoryCallback = Box<dyn FnMut(&mut Session, MemoryAccess, u64) + Send>;
/// `(session, access, token) -> handled` for invalid accesses.
pub type MemoryEventCallback = Box<dyn FnMut(&mut Session, MemoryAccess, u64) -> bool + Send>;

/// Tagged callback variants; the variant decides which hook types it accepts.
pub enum HookCallback {
    /// [`HookType::CODE`] and/or [`HookType::BLOCK`].
    Code(CodeCallback),
    /// [`HookType::INTR`].
    Interrupt(InterruptCallback),
    /// [`HookType::INSN`] for [`InstructionHook::PortIn`].
    PortIn(PortInCallback),
    /// [`HookType::INSN`] for [`InstructionHook::PortOut`].
    PortOut(PortOutCallback),
    /// [`HookType::INSN`] for [`InstructionHook::Syscall`].
    Syscall(SyscallCallback),
    /// [`HookType::INSN_INVALID`].
    InvalidInstruction(InvalidInstructionCallback),
    /// Any subset of [`HookType::MEM_VALID`] and [`HookType::MEM_READ_AFTER`].
    Memory(MemoryCallback),
    /// Any subset of [`HookType::MEM_INVALID`]; returning `true` retries the
    /// access once, `false` lets it fault.
    MemoryEvent(MemoryEventCallback),
}

impl HookCallback {
    /// Boxes a code/block callback.
    pub fn code<F>(callback: F) -> Self
    where
        F: FnMut(&mut Session, u64, u32, u64) + Send + 'static,
    {
        Self::Code(Box::new(callback))
    }

    /// Boxes an interrupt callback.
    pub fn interrupt<F>(callback: F) -> Self
    where
        F: FnMut(&mut Session, u32, u64) + Send + 'static,
    {
        Self::Interrupt(Box::new(callback))
    }

    /// Boxes a port-input callback.
    pub fn port_in<F>(callback: F) -> Self
    where
        F: FnMut(&mut Session, u32, usize, u64) -> u32 + Send + 'static,
    {
        Self::PortIn(Box::new(callback))
    }

    /// Boxes a port-output callback.
    pub fn port_out<F>(callback: F) -> Self
    where
        F: FnMut(&mut Session, u32, usize, u32, u64) + Send + 'static,
    {
        Self::PortOut(Box::new(callback))
    }

    /// Boxes a system call callback.
    pub fn syscall<F>(callback: F) -> Self
    where
        F: FnMut(&mut Session, u64) + Send + 'static,
    {
        Self::Syscall(Box::new(callback))
    }

    /// Boxes an invalid-instruction callback.
    pub fn invalid_instruction<F>(callback: F) -> Self
    where
        F: FnMut(&mut Session, u64) -> bool + Send + 'static,
    {
        Self::InvalidInstruction(Box::new(callback))
    }

    /// Boxes a memory observer callback.
    pub fn memory<F>(callback: F) -> Self
    where
        F: FnMut(&mut Session, MemoryAccess, u64) + Send + 'static,
    {
        Self::Memory(Box::new(callback))
    }

    /// Boxes a memory event callback.
    pub fn memory_event<F>(callback: F) -> Self
    where
        F: FnMut(&mut Session, MemoryAccess, u64) -> bool + Send + 'static,
    {
        Self::MemoryEvent(Box::new(callback))
    }

    /// Instruction discriminator carried by instruction callbacks.
    #[must_use]
    pub const fn instruction(&self) -> Option<InstructionHook> {
        match self {
            Self::PortIn(_) => Some(InstructionHook::PortIn),
            Self::PortOut(_) => Some(InstructionHook::PortOut),
            Self::Syscall(_) => Some(InstructionHook::Syscall),
            _ => None,
        }
    }

    /// Returns `true` when this variant can be registered for `kind`.
    #[must_use]
    pub fn accepts(&self, kind: HookType) -> bool {
        if kind.is_empty() {
            return false;
        }
        match self {
            Self::Code(_) => (HookType::CODE | HookType::BLOCK).contains(kind),
            Self::Interrupt(_) => kind == HookType::INTR,
            Self::PortIn(_) | Self::PortOut(_) | Self::Syscall(_) => kind == HookType::INSN,
            Self::InvalidInstruction(_) => kind == HookType::INSN_INVALID,
            Self::Memory(_) => (HookType::MEM_VALID | HookType::MEM_READ_AFTER).contains(kind),
            Self::MemoryEvent(_) => HookType::MEM_INVALID.contains(kind),
        }
    }

    const fn variant_name(&self) -> &'static str {
        match self {
            Self::Code(_) => "Code",
            Self::Interrupt(_) => "Interrupt",
            Self::PortIn(_) => "PortIn",
            Self::PortOut(_) => "PortOut",
            Self::Syscall(_) => "Syscall",
            Self::InvalidInstruction(_) => "InvalidInstruction",
            Self::Memory(_) => "Memory",
            Self::MemoryEvent(_) => "MemoryEvent",
        }
    }
}

impl fmt::Debug for HookCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple(self.variant_name()).finish_non_exhaustive()
    }
}

#[derive(Debug)]
struct HookEntry {
    kind: HookType,
    range: HookRange,
    token: u64,
    instruction: Option<InstructionHook>,
    // `None` while the callback is executing.
    callback: Option<HookCallback>,
}

/// Registered hooks in registration order.
#[derive(Debug, Default)]
pub(crate) struct HookTable {
    entries: BTreeMap<u64, HookEntry>,
    next_id: u64,
}

impl HookTable {
    pub(crate) fn add(
        &mut self,
        kind: HookType,
        callback: HookCallback,
        token: u64,
        range: HookRange,
    ) -> Result<HookHandle, ErrorCode> {
        if !callback.accepts(kind) {
            return Err(ErrorCode::InvalidHook);
        }
        self.next_id += 1;
        let id = self.next_id;
        self.entries.insert(
            id,
            HookEntry {
                kind,
                range,
                token,
                instruction: callback.instruction(),
                callback: Some(callback),
            },
        );
        Ok(HookHandle(id))
    }

    pub(crate) fn remove(&mut self, handle: HookHandle) -> Result<(), ErrorCode> {
        self.entries
            .remove(&handle.0)
            .map(|_| ())
            .ok_or(ErrorCode::InvalidHook)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    /// IDs of hooks subscribed to any bit of `event` whose range holds `address`.
    pub(crate) fn matching(&self, event: HookType, address: u64) -> Vec<u64> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.kind.intersects(event) && entry.range.contains(address))
            .map(|(id, _)| *id)
            .collect()
    }

    /// IDs of instruction hooks for `instruction` whose range holds `address`.
    pub(crate) fn matching_instruction(&self, instruction: InstructionHook, address: u64) -> Vec<u64> {
        self.entries
            .iter()
            .filter(|(_, entry)| {
                entry.instruction == Some(instruction) && entry.range.contains(address)
            })
            .map(|(id, _)| *id)
            .collect()
    }

    pub(crate) fn any_matching(&self, event: HookType, address: u64) -> bool {
        self.entries
            .values()
            .any(|entry| entry.kind.intersects(event) && entry.range.contains(address))
    }

    /// Removes the callback from its slot for the duration of a call.
    pub(crate) fn take(&mut self, id: u64) -> Option<(HookCallback, u64)> {
        let entry = self.entries.get_mut(&id)?;
        entry.callback.take().map(|callback| (callback, entry.token))
    }

    /// Returns a callback to its slot unless the hook was removed meanwhile.
    pub(crate) fn restore(&mut self, id: u64, callback: HookCallback) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.callback = Some(callback);
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::{HookCallback, HookRange, HookTable, HookType, InstructionHook};
    use crate::error::ErrorCode;

    fn noop_code() -> HookCallback {
        HookCallback::code(|_, _, _, _| {})
    }

    #[test]
    fn hook_type_bits_match_canonical_values() {
        assert_eq!(HookType::INTR.bits(), 1);
        assert_eq!(HookType::CODE.bits(), 4);
        assert_eq!(HookType::INSN_INVALID.bits(), 1 << 14);
        assert_eq!(HookType::MEM_UNMAPPED.bits(), 0x70);
        assert_eq!(HookType::MEM_PROT.bits(), 0x380);
        assert_eq!(HookType::MEM_INVALID.bits(), 0x3F0);
        assert_eq!(HookType::MEM_VALID.bits(), 0x1C00);
        assert_eq!(
            HookType::MEM_READ_INVALID | HookType::MEM_WRITE_INVALID | HookType::MEM_FETCH_INVALID,
            HookType::MEM_INVALID
        );
    }

    #[rstest]
    #[case(HookRange::ALL, 0, true)]
    #[case(HookRange::ALL, u64::MAX, true)]
    #[case(HookRange::new(0x2000, 0x1000), 0x9999, true)]
    #[case(HookRange::new(0x1000, 0x1FFF), 0x1000, true)]
    #[case(HookRange::new(0x1000, 0x1FFF), 0x1FFF, true)]
    #[case(HookRange::new(0x1000, 0x1FFF), 0x2000, false)]
    #[case(HookRange::new(0x1000, 0x1000), 0x0FFF, false)]
    fn range_matching_follows_unbounded_convention(
        #[case] range: HookRange,
        #[case] address: u64,
        #[case] expected: bool,
    ) {
        assert_eq!(range.contains(address), expected);
    }

    #[test]
    fn callback_variant_must_match_hook_type() {
        assert!(noop_code().accepts(HookType::CODE | HookType::BLOCK));
        assert!(!noop_code().accepts(HookType::MEM_READ));
        assert!(!noop_code().accepts(HookType::empty()));
        let event = HookCallback::memory_event(|_, _, _| true);
        assert!(event.accepts(HookType::MEM_INVALID));
        assert!(!event.accepts(HookType::MEM_READ));
        let observer = HookCallback::memory(|_, _, _| {});
        assert!(observer.accepts(HookType::MEM_VALID | HookType::MEM_READ_AFTER));
        assert!(!observer.accepts(HookType::MEM_READ_UNMAPPED));
    }

    #[test]
    fn table_rejects_mismatched_registration() {
        let mut table = HookTable::default();
        assert_eq!(
            table.add(HookType::INTR, noop_code(), 0, HookRange::ALL),
            Err(ErrorCode::InvalidHook)
        );
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn removal_is_single_shot() {
        let mut table = HookTable::default();
        let handle = table
            .add(HookType::CODE, noop_code(), 7, HookRange::ALL)
            .expect("add");
        assert_eq!(table.remove(handle), Ok(()));
        assert_eq!(table.remove(handle), Err(ErrorCode::InvalidHook));
    }

    #[test]
    fn matching_preserves_registration_order_and_ranges() {
        let mut table = HookTable::default();
        let first = table
            .add(HookType::CODE, noop_code(), 0, HookRange::new(0x1000, 0x1FFF))
            .expect("add");
        let second = table
            .add(HookType::CODE | HookType::BLOCK, noop_code(), 0, HookRange::ALL)
            .expect("add");
        table
            .add(HookType::BLOCK, noop_code(), 0, HookRange::ALL)
            .expect("add");

        assert_eq!(
            table.matching(HookType::CODE, 0x1000),
            vec![first.as_u64(), second.as_u64()]
        );
        assert_eq!(table.matching(HookType::CODE, 0x3000), vec![second.as_u64()]);
        assert!(table.any_matching(HookType::BLOCK, 0));
        assert!(!table.any_matching(HookType::INTR, 0));
    }

    #[test]
    fn taken_callback_is_not_restored_after_removal() {
        let mut table = HookTable::default();
        let handle = table
            .add(HookType::INSN, HookCallback::port_in(|_, _, _, _| 1), 3, HookRange::ALL)
            .expect("add");
        assert_eq!(
            table.matching_instruction(InstructionHook::PortIn, 0),
            vec![handle.as_u64()]
        );
        assert!(table.matching_instruction(InstructionHook::PortOut, 0).is_empty());

        let (callback, token) = table.take(handle.as_u64()).expect("take");
        assert_eq!(token, 3);
        assert!(table.take(handle.as_u64()).is_none());
        table.remove(handle).expect("remove");
        table.restore(handle.as_u64(), callback);
        assert_eq!(table.len(), 0);
    }
}
