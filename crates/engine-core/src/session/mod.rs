//! Emulation sessions.
//!
//! A [`Session`] exclusively owns the mapping table, register file and hook
//! registry for one architecture and mode. Every operation validates its
//! arguments before touching engine state; engine failures are recorded and
//! can be retrieved later through [`Session::errno`].

mod run;

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::api::{Arch, Mode, QueryType, SessionConfig};
use crate::context::{Context, CONTEXT_HEADER_LEN};
use crate::cpu::{self, Cpu};
use crate::error::{Error, ErrorCode, Result, Target};
use crate::hooks::{
    HookCallback, HookHandle, HookRange, HookTable, HookType, MemoryAccess,
};
use crate::memory::{ExternalBuffer, MemoryManager, Permission, Region};
use crate::state::{RegisterDescriptor, RegisterFile, RegisterId, RegisterValue, RunState};

/// Emulator instance bound to one architecture and mode.
#[derive(Debug)]
pub struct Session {
    cpu: &'static dyn Cpu,
    config: SessionConfig,
    state: RunState,
    memory: MemoryManager,
    registers: RegisterFile,
    hooks: HookTable,
    stop: Arc<AtomicBool>,
    timed_out: bool,
    block_pending: bool,
    retired: u64,
    errno: Cell<ErrorCode>,
}

/// Cross-thread handle that requests a running [`Session::start`] to end.
#[derive(Debug, Clone)]
pub struct StopHandle {
    flag: Weak<AtomicBool>,
}

impl StopHandle {
    /// Requests the session to stop at the next instruction boundary.
    ///
    /// # Errors
    ///
    /// [`ErrorCode::InvalidHandle`] once the session has been dropped.
    pub fn stop(&self) -> std::result::Result<(), ErrorCode> {
        let flag = self.flag.upgrade().ok_or(ErrorCode::InvalidHandle)?;
        flag.store(true, Ordering::SeqCst);
        Ok(())
    }
}

impl Session {
    /// Opens a session with the default [`SessionConfig`].
    ///
    /// # Errors
    ///
    /// [`ErrorCode::ArchUnsupported`] or [`ErrorCode::ModeUnsupported`] when
    /// no backend accepts the pair.
    pub fn open(arch: Arch, mode: Mode) -> Result<Self> {
        Self::open_with_config(arch, mode, SessionConfig::default())
    }

    /// Opens a session with an explicit configuration.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidPageSize`] for an unusable page size, otherwise the
    /// same as [`Session::open`].
    pub fn open_with_config(arch: Arch, mode: Mode, config: SessionConfig) -> Result<Self> {
        config.validate()?;
        let cpu = cpu::lookup(arch, mode)?;
        log::debug!(
            "opened {arch:?} session (mode {:#x}, page size {:#x})",
            mode.bits(),
            config.page_size
        );
        Ok(Self {
            cpu,
            memory: MemoryManager::new(config.page_size, config.max_regions),
            registers: RegisterFile::new(cpu.registers()),
            config,
            state: RunState::Idle,
            hooks: HookTable::default(),
            stop: Arc::new(AtomicBool::new(false)),
            timed_out: false,
            block_pending: true,
            retired: 0,
            errno: Cell::new(ErrorCode::Ok),
        })
    }

    /// Releases every mapping, hook and register value.
    ///
    /// External buffers are detached and stay valid for their owners.
    /// Closing twice is a no-op; every other operation on a closed session
    /// fails with [`Error::Disposed`].
    pub fn close(&mut self) {
        if self.state == RunState::Closed {
            return;
        }
        let hooks = self.hooks.len();
        self.hooks.clear();
        let external = self.memory.clear();
        self.registers.reset();
        self.stop.store(true, Ordering::SeqCst);
        self.state = RunState::Closed;
        log::debug!("closed session: dropped {hooks} hooks, detached {external} external regions");
    }

    /// Architecture and mode this session executes.
    #[must_use]
    pub fn target(&self) -> Target {
        Target {
            arch: self.cpu.arch(),
            mode: self.cpu.mode(),
        }
    }

    /// Configuration the session was opened with.
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> RunState {
        self.state
    }

    /// Instructions retired over the session's lifetime.
    #[must_use]
    pub const fn retired(&self) -> u64 {
        self.retired
    }

    /// Last failure reported by the engine, [`ErrorCode::Ok`] if none yet.
    ///
    /// Caller-side validation errors never update this value.
    #[must_use]
    pub fn errno(&self) -> ErrorCode {
        self.errno.get()
    }

    /// Read-only introspection.
    ///
    /// # Errors
    ///
    /// [`Error::Disposed`] after [`Session::close`].
    pub fn query(&self, query: QueryType) -> Result<u64> {
        self.state.ensure_open()?;
        Ok(match query {
            QueryType::Mode => u64::from(self.cpu.mode().bits()),
            QueryType::PageSize => self.memory.page_size(),
            QueryType::Arch => u64::from(self.cpu.arch().as_u32()),
            QueryType::Timeout => u64::from(self.timed_out),
        })
    }

    /// Requests a running [`Session::start`] to end at the next instruction
    /// boundary. Usually called from a hook.
    ///
    /// # Errors
    ///
    /// [`Error::Disposed`] after [`Session::close`].
    pub fn stop(&self) -> Result<()> {
        self.state.ensure_open()?;
        self.stop.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Returns a `Send + Sync` handle that can stop this session from
    /// another thread.
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            flag: Arc::downgrade(&self.stop),
        }
    }

    // Memory

    /// Maps zero-filled memory owned by the session.
    ///
    /// # Errors
    ///
    /// Misaligned `address` or `size`, [`ErrorCode::MapOverlap`],
    /// [`ErrorCode::MapTableFull`] or [`ErrorCode::NoMemory`].
    pub fn mem_map(&mut self, address: u64, size: u64, perms: Permission) -> Result<()> {
        self.state.ensure_open()?;
        record(&self.errno, self.memory.map(address, size, perms))?;
        log::debug!("mapped {address:#x}+{size:#x} {perms:?}");
        Ok(())
    }

    /// Maps caller-owned memory; the session never frees `buffer`.
    ///
    /// # Errors
    ///
    /// Same as [`Session::mem_map`], plus [`Error::ExternalBufferTooSmall`].
    pub fn mem_map_external(
        &mut self,
        address: u64,
        size: u64,
        perms: Permission,
        buffer: ExternalBuffer,
    ) -> Result<()> {
        self.state.ensure_open()?;
        record(&self.errno, self.memory.map_external(address, size, perms, buffer))?;
        log::debug!("mapped external {address:#x}+{size:#x} {perms:?}");
        Ok(())
    }

    /// Unmaps whole regions covering `[address, address + size)`.
    ///
    /// # Errors
    ///
    /// Misaligned arguments, [`ErrorCode::MapNotFound`] for unmapped bytes,
    /// or [`ErrorCode::InvalidArgument`] when a region would be split.
    pub fn mem_unmap(&mut self, address: u64, size: u64) -> Result<()> {
        self.state.ensure_open()?;
        record(&self.errno, self.memory.unmap(address, size))?;
        log::debug!("unmapped {address:#x}+{size:#x}");
        Ok(())
    }

    /// Changes permissions over a fully mapped range.
    ///
    /// # Errors
    ///
    /// Misaligned arguments, [`ErrorCode::MapNotFound`] for unmapped bytes,
    /// or [`ErrorCode::MapTableFull`] when splitting needs more slots.
    pub fn mem_protect(&mut self, address: u64, size: u64, perms: Permission) -> Result<()> {
        self.state.ensure_open()?;
        record(&self.errno, self.memory.protect(address, size, perms))?;
        log::debug!("protected {address:#x}+{size:#x} {perms:?}");
        Ok(())
    }

    /// Copies memory into `out`, ignoring permissions.
    ///
    /// # Errors
    ///
    /// [`ErrorCode::ReadUnmapped`] when any byte is unmapped; `out` is left
    /// untouched.
    pub fn mem_read(&self, address: u64, out: &mut [u8]) -> Result<()> {
        self.state.ensure_open()?;
        record(&self.errno, self.memory.read(address, out))
    }

    /// Copies the first `count` bytes of memory at `address` into `buffer`.
    ///
    /// # Errors
    ///
    /// [`Error::CountOutOfRange`] when `count` exceeds `buffer`, otherwise as
    /// [`Session::mem_read`].
    pub fn mem_read_into(&self, address: u64, buffer: &mut [u8], count: usize) -> Result<()> {
        self.state.ensure_open()?;
        let len = buffer.len();
        let out = buffer
            .get_mut(..count)
            .ok_or(Error::CountOutOfRange { count, len })?;
        self.mem_read(address, out)
    }

    /// Copies `data` into memory, ignoring permissions.
    ///
    /// # Errors
    ///
    /// [`ErrorCode::WriteUnmapped`] when any byte is unmapped; memory is left
    /// untouched.
    pub fn mem_write(&mut self, address: u64, data: &[u8]) -> Result<()> {
        self.state.ensure_open()?;
        record(&self.errno, self.memory.write(address, data))
    }

    /// Copies the first `count` bytes of `buffer` into memory.
    ///
    /// # Errors
    ///
    /// [`Error::CountOutOfRange`] when `count` exceeds `buffer`, otherwise as
    /// [`Session::mem_write`].
    pub fn mem_write_from(&mut self, address: u64, buffer: &[u8], count: usize) -> Result<()> {
        self.state.ensure_open()?;
        let data = buffer.get(..count).ok_or(Error::CountOutOfRange {
            count,
            len: buffer.len(),
        })?;
        self.mem_write(address, data)
    }

    /// Snapshot of the mapping table in ascending address order.
    ///
    /// # Errors
    ///
    /// [`Error::Disposed`] after [`Session::close`].
    pub fn mem_regions(&self) -> Result<Vec<Region>> {
        self.state.ensure_open()?;
        Ok(self.memory.regions())
    }

    /// Writes the mapping table into `out` and returns the entry count.
    ///
    /// # Errors
    ///
    /// [`ErrorCode::InsufficientMapEntries`] when `out` is too short.
    pub fn mem_regions_into(&self, out: &mut [Region]) -> Result<usize> {
        self.state.ensure_open()?;
        record(&self.errno, self.memory.regions_into(out))
    }

    // Registers

    /// Register layout of this session's backend.
    #[must_use]
    pub fn registers(&self) -> &'static [RegisterDescriptor] {
        self.registers.layout()
    }

    /// Reads one register through its native type.
    ///
    /// # Errors
    ///
    /// [`ErrorCode::InvalidRegister`] for an unknown ID or
    /// [`Error::RegisterKindMismatch`] when `T` is not the native type.
    pub fn reg_read<T: RegisterValue>(&self, id: RegisterId) -> Result<T> {
        self.state.ensure_open()?;
        record(&self.errno, self.registers.read(id))
    }

    /// Writes one register through its native type.
    ///
    /// # Errors
    ///
    /// Same as [`Session::reg_read`].
    pub fn reg_write<T: RegisterValue>(&mut self, id: RegisterId, value: T) -> Result<()> {
        self.state.ensure_open()?;
        record(&self.errno, self.registers.write(id, value))
    }

    /// Reads several registers of one type.
    ///
    /// # Errors
    ///
    /// Same as [`Session::reg_read`] for the first bad entry.
    pub fn reg_read_batch<T: RegisterValue>(&self, ids: &[RegisterId]) -> Result<Vec<T>> {
        self.state.ensure_open()?;
        record(&self.errno, self.registers.read_batch(ids))
    }

    /// Writes several registers of one type; a bad entry writes nothing.
    ///
    /// # Errors
    ///
    /// Same as [`Session::reg_read`] for the first bad entry.
    pub fn reg_write_batch<T: RegisterValue>(&mut self, entries: &[(RegisterId, T)]) -> Result<()> {
        self.state.ensure_open()?;
        record(&self.errno, self.registers.write_batch(entries))
    }

    // Hooks

    /// Registers a hook for `kind` events within `range`.
    ///
    /// `token` is passed back unchanged on every invocation.
    ///
    /// # Errors
    ///
    /// [`ErrorCode::InvalidHook`] when `callback` cannot serve `kind`, and
    /// [`ErrorCode::FeatureUnsupported`] for an instruction this backend
    /// cannot hook.
    pub fn hook_add(
        &mut self,
        kind: HookType,
        callback: HookCallback,
        token: u64,
        range: HookRange,
    ) -> Result<HookHandle> {
        self.state.ensure_open()?;
        if let Some(instruction) = callback.instruction() {
            if callback.accepts(kind) && !self.cpu.supports_instruction_hook(instruction) {
                return Err(self.fail(ErrorCode::FeatureUnsupported));
            }
        }
        let handle = record(&self.errno, self.hooks.add(kind, callback, token, range))?;
        log::debug!("added hook {} for {kind:?} over {range:?}", handle.as_u64());
        Ok(handle)
    }

    /// Removes a hook. A hook removed from inside a callback does not fire
    /// again, even for the event being dispatched.
    ///
    /// # Errors
    ///
    /// [`ErrorCode::InvalidHook`] for an unknown or already removed handle.
    pub fn hook_del(&mut self, handle: HookHandle) -> Result<()> {
        self.state.ensure_open()?;
        record(&self.errno, self.hooks.remove(handle))?;
        log::debug!("removed hook {}", handle.as_u64());
        Ok(())
    }

    /// Hooks every instruction in `range` before it executes.
    ///
    /// # Errors
    ///
    /// Same as [`Session::hook_add`].
    pub fn add_code_hook<F>(&mut self, callback: F, token: u64, range: HookRange) -> Result<HookHandle>
    where
        F: FnMut(&mut Self, u64, u32, u64) + Send + 'static,
    {
        self.hook_add(HookType::CODE, HookCallback::code(callback), token, range)
    }

    /// Hooks the first instruction of every basic block in `range`.
    ///
    /// # Errors
    ///
    /// Same as [`Session::hook_add`].
    pub fn add_block_hook<F>(&mut self, callback: F, token: u64, range: HookRange) -> Result<HookHandle>
    where
        F: FnMut(&mut Self, u64, u32, u64) + Send + 'static,
    {
        self.hook_add(HookType::BLOCK, HookCallback::code(callback), token, range)
    }

    /// Observes permitted accesses; `kind` is a subset of
    /// [`HookType::MEM_VALID`] and [`HookType::MEM_READ_AFTER`].
    ///
    /// # Errors
    ///
    /// Same as [`Session::hook_add`].
    pub fn add_memory_hook<F>(
        &mut self,
        kind: HookType,
        callback: F,
        token: u64,
        range: HookRange,
    ) -> Result<HookHandle>
    where
        F: FnMut(&mut Self, MemoryAccess, u64) + Send + 'static,
    {
        self.hook_add(kind, HookCallback::memory(callback), token, range)
    }

    /// Gates invalid accesses; `kind` is a subset of [`HookType::MEM_INVALID`].
    /// Returning `true` retries the access once.
    ///
    /// # Errors
    ///
    /// Same as [`Session::hook_add`].
    pub fn add_memory_event_hook<F>(
        &mut self,
        kind: HookType,
        callback: F,
        token: u64,
        range: HookRange,
    ) -> Result<HookHandle>
    where
        F: FnMut(&mut Self, MemoryAccess, u64) -> bool + Send + 'static,
    {
        self.hook_add(kind, HookCallback::memory_event(callback), token, range)
    }

    /// Services interrupts raised by instructions in `range`.
    ///
    /// # Errors
    ///
    /// Same as [`Session::hook_add`].
    pub fn add_interrupt_hook<F>(&mut self, callback: F, token: u64, range: HookRange) -> Result<HookHandle>
    where
        F: FnMut(&mut Self, u32, u64) + Send + 'static,
    {
        self.hook_add(HookType::INTR, HookCallback::interrupt(callback), token, range)
    }

    /// Supplies values for port input instructions.
    ///
    /// # Errors
    ///
    /// Same as [`Session::hook_add`].
    pub fn add_port_in_hook<F>(&mut self, callback: F, token: u64, range: HookRange) -> Result<HookHandle>
    where
        F: FnMut(&mut Self, u32, usize, u64) -> u32 + Send + 'static,
    {
        self.hook_add(HookType::INSN, HookCallback::port_in(callback), token, range)
    }

    /// Receives values written by port output instructions.
    ///
    /// # Errors
    ///
    /// Same as [`Session::hook_add`].
    pub fn add_port_out_hook<F>(&mut self, callback: F, token: u64, range: HookRange) -> Result<HookHandle>
    where
        F: FnMut(&mut Self, u32, usize, u32, u64) + Send + 'static,
    {
        self.hook_add(HookType::INSN, HookCallback::port_out(callback), token, range)
    }

    /// Handles undecodable instructions. Returning `true` resumes execution
    /// at the current program counter instead of failing.
    ///
    /// A hook that reports success without moving the program counter or
    /// replacing the instruction runs again on every iteration. Such a run
    /// only ends through `timeout_us`, a stop request, or
    /// [`SessionConfig::instruction_limit`], which counts these iterations.
    ///
    /// # Errors
    ///
    /// Same as [`Session::hook_add`].
    pub fn add_invalid_instruction_hook<F>(
        &mut self,
        callback: F,
        token: u64,
        range: HookRange,
    ) -> Result<HookHandle>
    where
        F: FnMut(&mut Self, u64) -> bool + Send + 'static,
    {
        self.hook_add(
            HookType::INSN_INVALID,
            HookCallback::invalid_instruction(callback),
            token,
            range,
        )
    }

    // Contexts

    /// Byte length of an encoded context for this session.
    ///
    /// # Errors
    ///
    /// [`Error::Disposed`] after [`Session::close`].
    pub fn context_size(&self) -> Result<usize> {
        self.state.ensure_open()?;
        Ok(CONTEXT_HEADER_LEN + self.registers.byte_len())
    }

    /// Allocates a zeroed context sized for this session.
    ///
    /// # Errors
    ///
    /// [`Error::Disposed`] after [`Session::close`].
    pub fn context_alloc(&self) -> Result<Context> {
        self.state.ensure_open()?;
        Ok(Context::new(
            self.target(),
            &vec![0; self.registers.byte_len()],
            0,
        ))
    }

    /// Copies the current register state into `context`.
    ///
    /// # Errors
    ///
    /// [`Error::Disposed`] after [`Session::close`].
    pub fn context_save(&self, context: &mut Context) -> Result<()> {
        self.state.ensure_open()?;
        context.overwrite(self.target(), self.registers.as_bytes(), self.retired);
        Ok(())
    }

    /// Allocates and fills a context in one call.
    ///
    /// # Errors
    ///
    /// [`Error::Disposed`] after [`Session::close`].
    pub fn capture(&self) -> Result<Context> {
        self.state.ensure_open()?;
        Ok(Context::new(
            self.target(),
            self.registers.as_bytes(),
            self.retired,
        ))
    }

    /// Overwrites the register state with `context`.
    ///
    /// # Errors
    ///
    /// [`Error::ArchitectureMismatch`] when the context was captured from a
    /// different architecture or mode; the session is left unchanged.
    pub fn context_restore(&mut self, context: &Context) -> Result<()> {
        self.state.ensure_open()?;
        let expected = self.target();
        let found = context.target();
        if expected != found {
            return Err(Error::ArchitectureMismatch { expected, found });
        }
        record(&self.errno, self.registers.load_bytes(context.registers()))?;
        self.retired = context.retired();
        Ok(())
    }

    fn fail(&self, code: ErrorCode) -> Error {
        self.errno.set(code);
        Error::Engine(code)
    }
}

/// Passes `result` through, latching engine codes into `errno`.
fn record<T, E: Into<Error>>(
    errno: &Cell<ErrorCode>,
    result: std::result::Result<T, E>,
) -> Result<T> {
    result.map_err(|error| {
        let error = error.into();
        if let Some(code) = error.code() {
            errno.set(code);
        }
        error
    })
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.state == RunState::Closed {
            return;
        }
        if self.memory.region_count() > 0 || self.hooks.len() > 0 {
            log::warn!(
                "session dropped without close: releasing {} regions and {} hooks",
                self.memory.region_count(),
                self.hooks.len()
            );
        }
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::{Session, StopHandle};
    use crate::api::{Arch, Mode, QueryType, SessionConfig};
    use crate::cpu::nullbyte::NullbyteRegister as Reg;
    use crate::error::{Error, ErrorCode};
    use crate::hooks::{HookCallback, HookRange, HookType};
    use crate::memory::{ExternalBuffer, Permission, Region};

    fn session() -> Session {
        Session::open(Arch::Nullbyte, Mode::MODE_16).expect("nullbyte session")
    }

    const fn assert_send<T: Send>() {}
    const fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn sessions_move_between_threads() {
        assert_send::<Session>();
        assert_send_sync::<StopHandle>();
    }

    #[test]
    fn open_rejects_unknown_pairs() {
        assert_eq!(
            Session::open(Arch::X86, Mode::MODE_32).err(),
            Some(Error::Engine(ErrorCode::ArchUnsupported))
        );
        assert_eq!(
            Session::open(Arch::Nullbyte, Mode::MODE_32).err(),
            Some(Error::Engine(ErrorCode::ModeUnsupported))
        );
        let config = SessionConfig {
            page_size: 1000,
            ..SessionConfig::default()
        };
        assert_eq!(
            Session::open_with_config(Arch::Nullbyte, Mode::MODE_16, config).err(),
            Some(Error::InvalidPageSize(1000))
        );
    }

    #[test]
    fn query_reports_session_parameters() {
        let session = session();
        assert_eq!(session.query(QueryType::Mode), Ok(u64::from(Mode::MODE_16.bits())));
        assert_eq!(session.query(QueryType::PageSize), Ok(4096));
        assert_eq!(session.query(QueryType::Arch), Ok(8));
        assert_eq!(session.query(QueryType::Timeout), Ok(0));
    }

    #[test]
    fn errno_tracks_engine_failures_only() {
        let mut session = session();
        assert_eq!(session.errno(), ErrorCode::Ok);

        session
            .mem_map(0x1000, 0x1000, Permission::ALL)
            .expect("map");
        assert_eq!(
            session.mem_map(0x1000, 0x1000, Permission::ALL),
            Err(Error::Engine(ErrorCode::MapOverlap))
        );
        assert_eq!(session.errno(), ErrorCode::MapOverlap);

        assert!(matches!(
            session.mem_map(0x1001, 0x1000, Permission::ALL),
            Err(Error::MisalignedAddress { .. })
        ));
        assert_eq!(session.errno(), ErrorCode::MapOverlap);
    }

    #[test]
    fn count_must_fit_in_buffer() {
        let mut session = session();
        session.mem_map(0, 0x1000, Permission::ALL).expect("map");
        let mut buffer = [0u8; 4];
        assert_eq!(
            session.mem_read_into(0, &mut buffer, 5),
            Err(Error::CountOutOfRange { count: 5, len: 4 })
        );
        assert_eq!(
            session.mem_write_from(0, &[1, 2, 3], 4),
            Err(Error::CountOutOfRange { count: 4, len: 3 })
        );
        session.mem_write_from(0, &[1, 2, 3], 2).expect("partial write");
        session.mem_read_into(0, &mut buffer, 3).expect("partial read");
        assert_eq!(buffer, [1, 2, 0, 0]);
    }

    #[test]
    fn closed_session_rejects_every_operation() {
        let mut session = session();
        let external = ExternalBuffer::zeroed(0x1000);
        session
            .mem_map_external(0, 0x1000, Permission::READ, external.clone())
            .expect("map external");
        session.close();
        session.close();

        assert_eq!(session.mem_map(0, 0x1000, Permission::ALL), Err(Error::Disposed));
        assert_eq!(session.mem_regions(), Err(Error::Disposed));
        assert_eq!(session.reg_read::<u16>(Reg::R0.id()), Err(Error::Disposed));
        assert_eq!(session.query(QueryType::Arch), Err(Error::Disposed));
        assert_eq!(session.stop(), Err(Error::Disposed));
        assert_eq!(session.start(0, 2, 0, 0), Err(Error::Disposed));
        assert_eq!(session.capture().err(), Some(Error::Disposed));
        assert_eq!(external.handle_count(), 1);
    }

    #[test]
    fn stop_handle_outliving_session_is_invalid() {
        let session = session();
        let handle = session.stop_handle();
        assert_eq!(handle.stop(), Ok(()));
        drop(session);
        assert_eq!(handle.stop(), Err(ErrorCode::InvalidHandle));
    }

    #[test]
    fn unsupported_instruction_hook_is_reported() {
        let mut session = session();
        let result = session.hook_add(
            HookType::INSN,
            HookCallback::syscall(|_, _| {}),
            0,
            HookRange::ALL,
        );
        assert_eq!(result, Err(Error::Engine(ErrorCode::FeatureUnsupported)));
        assert_eq!(session.errno(), ErrorCode::FeatureUnsupported);

        let mismatched = session.hook_add(
            HookType::CODE,
            HookCallback::syscall(|_, _| {}),
            0,
            HookRange::ALL,
        );
        assert_eq!(mismatched, Err(Error::Engine(ErrorCode::InvalidHook)));
    }

    #[test]
    fn regions_into_reports_short_buffers() {
        let mut session = session();
        session.mem_map(0, 0x1000, Permission::READ).expect("map");
        session.mem_map(0x2000, 0x1000, Permission::WRITE).expect("map");
        let mut short = [Region::default(); 1];
        assert_eq!(
            session.mem_regions_into(&mut short),
            Err(Error::Engine(ErrorCode::InsufficientMapEntries))
        );
        let mut table = [Region::default(); 3];
        assert_eq!(session.mem_regions_into(&mut table), Ok(2));
        assert_eq!(table[1].begin, 0x2000);
        assert_eq!(table[1].perms, Permission::WRITE);
    }
}
