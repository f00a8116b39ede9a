//! Nullbyte 16-bit core: eight general-purpose registers, a downward-growing
//! stack, NZCV condition flags, and port I/O.

/// Instruction decode with field extraction and validation.
pub mod decoder;
/// Opcode and encoding classification tables.
pub mod encoding;
/// Two-phase execute and commit.
pub mod execute;
/// Fixed cycle-cost table.
pub mod timing;

use self::decoder::{Decoder, RegisterField};
use self::execute::execute_instruction;
use crate::api::{Arch, Mode};
use crate::cpu::{Cpu, Machine, Step};
use crate::error::ErrorCode;
use crate::hooks::InstructionHook;
use crate::state::{RegisterDescriptor, RegisterId, RegisterKind};

/// `FLAGS` bit for zero result.
pub const FLAGS_Z: u16 = 1 << 0;
/// `FLAGS` bit for negative result.
pub const FLAGS_N: u16 = 1 << 1;
/// `FLAGS` bit for carry/borrow.
pub const FLAGS_C: u16 = 1 << 2;
/// `FLAGS` bit for signed overflow.
pub const FLAGS_V: u16 = 1 << 3;

/// Interrupt number raised by `TRAP`. `SWI n` raises `n`, which always fits
/// in 16 bits, so the two never collide.
pub const TRAP_INTERRUPT: u32 = 0x1_0000;

/// Register identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
#[allow(missing_docs)]
pub enum NullbyteRegister {
    R0 = 1,
    R1 = 2,
    R2 = 3,
    R3 = 4,
    R4 = 5,
    R5 = 6,
    R6 = 7,
    R7 = 8,
    Pc = 9,
    Sp = 10,
    Flags = 11,
    Cause = 12,
    Cycles = 13,
}

impl NullbyteRegister {
    /// Register ID used by the session register API.
    #[must_use]
    pub const fn id(self) -> RegisterId {
        self as RegisterId
    }

    /// General-purpose register named by an instruction field.
    #[must_use]
    pub const fn gpr(field: RegisterField) -> Self {
        match field {
            RegisterField::R0 => Self::R0,
            RegisterField::R1 => Self::R1,
            RegisterField::R2 => Self::R2,
            RegisterField::R3 => Self::R3,
            RegisterField::R4 => Self::R4,
            RegisterField::R5 => Self::R5,
            RegisterField::R6 => Self::R6,
            RegisterField::R7 => Self::R7,
        }
    }
}

const fn descriptor(
    register: NullbyteRegister,
    name: &'static str,
    kind: RegisterKind,
) -> RegisterDescriptor {
    RegisterDescriptor {
        id: register.id(),
        name,
        kind,
    }
}

/// Register layout in context-image order.
pub const REGISTERS: [RegisterDescriptor; 13] = [
    descriptor(NullbyteRegister::R0, "R0", RegisterKind::U16),
    descriptor(NullbyteRegister::R1, "R1", RegisterKind::U16),
    descriptor(NullbyteRegister::R2, "R2", RegisterKind::U16),
    descriptor(NullbyteRegister::R3, "R3", RegisterKind::U16),
    descriptor(NullbyteRegister::R4, "R4", RegisterKind::U16),
    descriptor(NullbyteRegister::R5, "R5", RegisterKind::U16),
    descriptor(NullbyteRegister::R6, "R6", RegisterKind::U16),
    descriptor(NullbyteRegister::R7, "R7", RegisterKind::U16),
    descriptor(NullbyteRegister::Pc, "PC", RegisterKind::U16),
    descriptor(NullbyteRegister::Sp, "SP", RegisterKind::U16),
    descriptor(NullbyteRegister::Flags, "FLAGS", RegisterKind::U16),
    descriptor(NullbyteRegister::Cause, "CAUSE", RegisterKind::U16),
    descriptor(NullbyteRegister::Cycles, "CYCLES", RegisterKind::U64),
];

/// Nullbyte backend for one byte order.
#[derive(Debug)]
pub struct NullbyteCpu {
    big_endian: bool,
}

static LITTLE_ENDIAN: NullbyteCpu = NullbyteCpu { big_endian: false };
static BIG_ENDIAN: NullbyteCpu = NullbyteCpu { big_endian: true };

/// Returns the backend for `mode`: `MODE_16`, optionally with `BIG_ENDIAN`.
#[must_use]
pub fn select(mode: Mode) -> Option<&'static dyn Cpu> {
    if mode == Mode::MODE_16 {
        Some(&LITTLE_ENDIAN)
    } else if mode == Mode::MODE_16 | Mode::BIG_ENDIAN {
        Some(&BIG_ENDIAN)
    } else {
        None
    }
}

impl NullbyteCpu {
    fn word(&self, bytes: &[u8]) -> Option<u16> {
        let raw = [*bytes.first()?, *bytes.get(1)?];
        Some(if self.big_endian {
            u16::from_be_bytes(raw)
        } else {
            u16::from_le_bytes(raw)
        })
    }
}

impl Cpu for NullbyteCpu {
    fn arch(&self) -> Arch {
        Arch::Nullbyte
    }

    fn mode(&self) -> Mode {
        if self.big_endian {
            Mode::MODE_16 | Mode::BIG_ENDIAN
        } else {
            Mode::MODE_16
        }
    }

    fn registers(&self) -> &'static [RegisterDescriptor] {
        &REGISTERS
    }

    fn program_counter(&self) -> RegisterId {
        NullbyteRegister::Pc.id()
    }

    fn address_mask(&self) -> u64 {
        0xFFFF
    }

    fn min_instruction_size(&self) -> usize {
        2
    }

    fn instruction_length(&self, head: &[u8]) -> Option<usize> {
        Decoder::primary_length(self.word(head)?).ok()
    }

    fn ends_block(&self, insn: &[u8]) -> bool {
        let extension = insn.get(2..).and_then(|rest| self.word(rest));
        self.word(insn)
            .and_then(|word| Decoder::decode(word, extension).ok())
            .is_some_and(|instr| instr.encoding.ends_block())
    }

    fn supports_instruction_hook(&self, instruction: InstructionHook) -> bool {
        matches!(instruction, InstructionHook::PortIn | InstructionHook::PortOut)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn execute(&self, insn: &[u8], pc: u64, machine: &mut dyn Machine) -> Result<Step, ErrorCode> {
        let word = self.word(insn).ok_or(ErrorCode::InvalidInstruction)?;
        let extension = insn.get(2..).and_then(|rest| self.word(rest));
        let instr = Decoder::decode(word, extension).map_err(|_| ErrorCode::InvalidInstruction)?;
        execute_instruction(&instr, (pc & 0xFFFF) as u16, self.big_endian, machine)
    }
}
