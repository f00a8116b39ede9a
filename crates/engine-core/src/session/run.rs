//! Fetch, hook dispatch and execute loop behind [`Session::start`].

use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use super::Session;
use crate::cpu::{Machine, Outcome};
use crate::error::{ErrorCode, Result};
use crate::hooks::{HookCallback, HookType, InstructionHook, MemoryAccess};
use crate::memory::{bytes_to_value, AccessFault, AccessKind};
use crate::state::{RegisterId, RunState};

type EngineResult<T> = std::result::Result<T, ErrorCode>;

/// Upper bound on instructions scanned to size a basic block.
const MAX_BLOCK_INSTRUCTIONS: usize = 256;

/// What the loop does after one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    /// An instruction retired; keep going.
    Retired,
    /// A halting instruction retired.
    Halted,
    /// Nothing retired: a hook redirected or absorbed the instruction.
    Skipped,
}

impl Session {
    /// Executes from `begin` until the program counter equals `until`.
    ///
    /// The run also ends after `count` instructions (0 means no limit), once
    /// `timeout_us` microseconds have elapsed (0 means no limit), on a stop
    /// request, or when a halting instruction retires. All of these return
    /// `Ok(())`; [`QueryType::Timeout`](crate::QueryType::Timeout) tells a
    /// timeout apart.
    ///
    /// # Errors
    ///
    /// The fault that ended the run: an access fault not resolved by an
    /// event hook, [`ErrorCode::InvalidInstruction`],
    /// [`ErrorCode::Exception`] for an unhooked interrupt,
    /// [`ErrorCode::InstructionLimit`], or [`ErrorCode::InvalidTimeout`].
    /// Calling `start` from a hook of a running session fails with
    /// [`ErrorCode::InvalidArgument`].
    pub fn start(&mut self, begin: u64, until: u64, timeout_us: u64, count: u64) -> Result<()> {
        self.state.ensure_open()?;
        if self.state.is_running() {
            return Err(self.fail(ErrorCode::InvalidArgument));
        }
        let deadline = deadline_after(timeout_us).map_err(|code| self.fail(code))?;

        self.stop.store(false, Ordering::SeqCst);
        self.timed_out = false;
        self.block_pending = true;
        self.set_pc(begin);
        self.state = RunState::Running;
        log::debug!("start {begin:#x} until {until:#x} (timeout {timeout_us}us, count {count})");

        let result = self.run(until & self.cpu.address_mask(), count, deadline);

        if self.state.is_running() {
            self.state = RunState::Idle;
        }
        match result {
            Ok(executed) => {
                log::debug!("run ended at {:#x} after {executed} instructions", self.pc());
                Ok(())
            }
            Err(code) => {
                log::debug!("run faulted at {:#x}: {code}", self.pc());
                Err(self.fail(code))
            }
        }
    }

    fn run(&mut self, until: u64, count: u64, deadline: Option<Instant>) -> EngineResult<u64> {
        let mut executed = 0u64;
        // Iterations a hook absorbed; they count toward the runaway guard.
        let mut skipped = 0u64;
        loop {
            if self.state == RunState::Closed || self.stop.load(Ordering::SeqCst) {
                return Ok(executed);
            }
            let pc = self.pc();
            if pc == until || (count != 0 && executed >= count) {
                return Ok(executed);
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                self.timed_out = true;
                log::info!("run timed out at {pc:#x} after {executed} instructions");
                return Ok(executed);
            }
            if self
                .config
                .instruction_limit
                .is_some_and(|limit| executed.saturating_add(skipped) >= limit)
            {
                log::info!("instruction limit reached at {pc:#x}");
                return Err(ErrorCode::InstructionLimit);
            }

            match self.step(pc) {
                Ok(Flow::Retired) => executed += 1,
                Ok(Flow::Halted) => return Ok(executed + 1),
                Ok(Flow::Skipped) => skipped += 1,
                // A hook closed the session mid-instruction.
                Err(_) if self.state == RunState::Closed => return Ok(executed),
                Err(code) => return Err(code),
            }
        }
    }

    fn step(&mut self, pc: u64) -> EngineResult<Flow> {
        let cpu = self.cpu;
        let head_len = cpu.min_instruction_size();
        self.check_access(AccessKind::Fetch, pc, head_len, 0)?;
        let mut head = vec![0; head_len];
        self.memory.copy_out(pc, &mut head);
        let Some(len) = cpu.instruction_length(&head) else {
            return self.invalid_instruction(pc);
        };
        self.check_access(AccessKind::Fetch, pc, len, 0)?;
        self.dispatch_memory(HookType::MEM_FETCH, pc, len, 0);

        if self.block_pending {
            self.block_pending = false;
            if self.hooks.any_matching(HookType::BLOCK, pc) {
                let size = self.block_size(pc);
                self.dispatch_code(HookType::BLOCK, pc, size);
            }
        }
        self.dispatch_code(HookType::CODE, pc, u32::try_from(len).unwrap_or(u32::MAX));
        if self.state == RunState::Closed {
            return Ok(Flow::Skipped);
        }
        if self.pc() != pc {
            self.block_pending = true;
            return Ok(Flow::Skipped);
        }

        // Hooks may have rewritten or unmapped the instruction.
        let mut insn = vec![0; len];
        self.memory
            .read(pc, &mut insn)
            .map_err(|_| ErrorCode::FetchUnmapped)?;

        let step = match cpu.execute(&insn, pc, &mut Executor { session: self }) {
            Ok(step) => step,
            Err(ErrorCode::InvalidInstruction) => return self.invalid_instruction(pc),
            Err(code) => return Err(code),
        };
        if self.state == RunState::Closed {
            return Ok(Flow::Skipped);
        }
        self.retired += 1;

        let fallthrough = pc.wrapping_add(len as u64) & cpu.address_mask();
        if cpu.ends_block(&insn) || self.pc() != fallthrough {
            self.block_pending = true;
        }
        if self.config.trace_instructions {
            log::trace!(
                "{pc:#06x} {insn:02x?} -> {:#06x} ({} cycles, {:?})",
                self.pc(),
                step.cycles,
                step.outcome
            );
        }

        match step.outcome {
            Outcome::Retired => Ok(Flow::Retired),
            Outcome::Halt => Ok(Flow::Halted),
            Outcome::Interrupt(number) => {
                self.interrupt(pc, number)?;
                Ok(Flow::Retired)
            }
        }
    }

    fn invalid_instruction(&mut self, pc: u64) -> EngineResult<Flow> {
        let ids = self.hooks.matching(HookType::INSN_INVALID, pc);
        let mut handled = false;
        self.for_each_hook(ids, |session, callback, token| {
            if let HookCallback::InvalidInstruction(hook) = callback {
                handled |= hook(session, token);
            }
        });
        if handled {
            self.block_pending = true;
            Ok(Flow::Skipped)
        } else {
            Err(ErrorCode::InvalidInstruction)
        }
    }

    fn interrupt(&mut self, pc: u64, number: u32) -> EngineResult<()> {
        let ids = self.hooks.matching(HookType::INTR, pc);
        if ids.is_empty() {
            log::debug!("unhandled interrupt {number:#x} at {pc:#x}");
            return Err(ErrorCode::Exception);
        }
        self.for_each_hook(ids, |session, callback, token| {
            if let HookCallback::Interrupt(hook) = callback {
                hook(session, number, token);
            }
        });
        Ok(())
    }

    /// Sums instruction lengths from `pc` up to and including the first
    /// block-ending instruction.
    fn block_size(&self, pc: u64) -> u32 {
        let cpu = self.cpu;
        let head_len = cpu.min_instruction_size();
        let mut cursor = pc;
        let mut size = 0usize;
        for _ in 0..MAX_BLOCK_INSTRUCTIONS {
            let mut head = vec![0; head_len];
            if self.fetchable(cursor, &mut head).is_none() {
                break;
            }
            let Some(len) = cpu.instruction_length(&head) else {
                break;
            };
            let mut insn = vec![0; len];
            if self.fetchable(cursor, &mut insn).is_none() {
                break;
            }
            size += len;
            if cpu.ends_block(&insn) {
                break;
            }
            cursor = cursor.wrapping_add(len as u64) & cpu.address_mask();
        }
        u32::try_from(size).unwrap_or(u32::MAX)
    }

    fn fetchable(&self, address: u64, out: &mut [u8]) -> Option<()> {
        self.memory
            .check(address, out.len(), AccessKind::Fetch.required_permission())
            .ok()?;
        self.memory.copy_out(address, out);
        Some(())
    }

    /// Resolves permissions for an emulated access, letting event hooks
    /// repair a fault once.
    fn check_access(
        &mut self,
        kind: AccessKind,
        address: u64,
        size: usize,
        value: i64,
    ) -> EngineResult<()> {
        let mut retried = false;
        loop {
            let (event, code) = match self.memory.check(address, size, kind.required_permission()) {
                Ok(()) => return Ok(()),
                Err(AccessFault::Unmapped { .. }) => (kind.unmapped_hook(), kind.unmapped_code()),
                Err(AccessFault::Protected { .. }) => (kind.protected_hook(), kind.protected_code()),
            };
            if retried || !self.dispatch_event(event, address, size, value) {
                return Err(code);
            }
            retried = true;
        }
    }

    fn data_read(&mut self, address: u64, out: &mut [u8]) -> EngineResult<()> {
        self.check_access(AccessKind::Read, address, out.len(), 0)?;
        self.dispatch_memory(HookType::MEM_READ, address, out.len(), 0);
        self.ensure_live()?;
        self.memory
            .read(address, out)
            .map_err(|_| ErrorCode::ReadUnmapped)?;
        if self.hooks.any_matching(HookType::MEM_READ_AFTER, address) {
            let value = self.access_value(out);
            self.dispatch_memory(HookType::MEM_READ_AFTER, address, out.len(), value);
        }
        Ok(())
    }

    fn data_write(&mut self, address: u64, data: &[u8]) -> EngineResult<()> {
        let value = self.access_value(data);
        self.check_access(AccessKind::Write, address, data.len(), value)?;
        self.dispatch_memory(HookType::MEM_WRITE, address, data.len(), value);
        self.ensure_live()?;
        self.memory
            .write(address, data)
            .map_err(|_| ErrorCode::WriteUnmapped)
    }

    /// Aborts the current access once a hook has closed the session.
    fn ensure_live(&self) -> EngineResult<()> {
        if self.state == RunState::Closed {
            Err(ErrorCode::InvalidHandle)
        } else {
            Ok(())
        }
    }

    #[allow(clippy::cast_possible_wrap)]
    fn access_value(&self, bytes: &[u8]) -> i64 {
        bytes_to_value(bytes, self.cpu.mode().is_big_endian()) as i64
    }

    fn dispatch_code(&mut self, event: HookType, address: u64, size: u32) {
        let ids = self.hooks.matching(event, address);
        self.for_each_hook(ids, |session, callback, token| {
            if let HookCallback::Code(hook) = callback {
                hook(session, address, size, token);
            }
        });
    }

    fn dispatch_memory(&mut self, kind: HookType, address: u64, size: usize, value: i64) {
        let ids = self.hooks.matching(kind, address);
        let access = MemoryAccess {
            kind,
            address,
            size,
            value,
        };
        self.for_each_hook(ids, |session, callback, token| {
            if let HookCallback::Memory(hook) = callback {
                hook(session, access, token);
            }
        });
    }

    /// Returns `true` when any event hook reported the access as handled.
    fn dispatch_event(&mut self, kind: HookType, address: u64, size: usize, value: i64) -> bool {
        let ids = self.hooks.matching(kind, address);
        let access = MemoryAccess {
            kind,
            address,
            size,
            value,
        };
        let mut handled = false;
        self.for_each_hook(ids, |session, callback, token| {
            if let HookCallback::MemoryEvent(hook) = callback {
                handled |= hook(session, access, token);
            }
        });
        handled
    }

    /// Calls each still-registered hook in `ids` with its callback lent out
    /// of the table, so the callback may freely mutate the session.
    fn for_each_hook<F>(&mut self, ids: Vec<u64>, mut call: F)
    where
        F: FnMut(&mut Self, &mut HookCallback, u64),
    {
        for id in ids {
            let Some((mut callback, token)) = self.hooks.take(id) else {
                continue;
            };
            call(self, &mut callback, token);
            self.hooks.restore(id, callback);
        }
    }

    fn pc(&self) -> u64 {
        self.registers
            .read_bits(self.cpu.program_counter())
            .unwrap_or(0)
    }

    fn set_pc(&mut self, pc: u64) {
        self.registers
            .write_bits(self.cpu.program_counter(), pc & self.cpu.address_mask());
    }
}

fn deadline_after(timeout_us: u64) -> EngineResult<Option<Instant>> {
    if timeout_us == 0 {
        return Ok(None);
    }
    if timeout_us > i64::MAX.unsigned_abs() {
        return Err(ErrorCode::InvalidTimeout);
    }
    Instant::now()
        .checked_add(Duration::from_micros(timeout_us))
        .map(Some)
        .ok_or(ErrorCode::InvalidTimeout)
}

/// Session state lent to the backend for one instruction.
struct Executor<'a> {
    session: &'a mut Session,
}

impl Machine for Executor<'_> {
    fn register(&self, id: RegisterId) -> u64 {
        self.session.registers.read_bits(id).unwrap_or(0)
    }

    fn set_register(&mut self, id: RegisterId, value: u64) {
        self.session.registers.write_bits(id, value);
    }

    fn read(&mut self, address: u64, out: &mut [u8]) -> EngineResult<()> {
        self.session.data_read(address, out)
    }

    fn write(&mut self, address: u64, data: &[u8]) -> EngineResult<()> {
        self.session.data_write(address, data)
    }

    fn port_in(&mut self, port: u32, size: usize) -> u32 {
        let pc = self.session.pc();
        let ids = self
            .session
            .hooks
            .matching_instruction(InstructionHook::PortIn, pc);
        let mut value = 0;
        self.session.for_each_hook(ids, |session, callback, token| {
            if let HookCallback::PortIn(hook) = callback {
                value = hook(session, port, size, token);
            }
        });
        value
    }

    fn port_out(&mut self, port: u32, size: usize, value: u32) {
        let pc = self.session.pc();
        let ids = self
            .session
            .hooks
            .matching_instruction(InstructionHook::PortOut, pc);
        self.session.for_each_hook(ids, |session, callback, token| {
            if let HookCallback::PortOut(hook) = callback {
                hook(session, port, size, value, token);
            }
        });
    }
}
