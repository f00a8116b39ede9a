//! Instruction decoder.
//!
//! Validates a primary word (and its extension word, when the addressing
//! mode carries one) and produces a [`DecodedInstruction`] ready for the
//! execute stage.

use thiserror::Error;

use super::encoding::{OpcodeEncoding, PrimaryWord};

/// Addressing modes (`AM` field, bits 2..0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressingMode {
    /// Operand is `RA`.
    DirectRegister,
    /// Operand is memory at `RA`.
    IndirectRegister,
    /// Operand is memory at `RA` plus a sign-extended 8-bit displacement.
    SignExtendedDisplacement,
    /// Operand is memory at `RA` plus a zero-extended 8-bit displacement.
    ZeroExtendedDisplacement,
    /// Operand is the extension word itself.
    Immediate,
    /// Operand is the address of the next instruction plus the extension word.
    PcRelative,
    /// Reserved.
    Reserved110,
    /// Reserved.
    Reserved111,
}

impl AddressingMode {
    /// Converts a 3-bit addressing mode value.
    #[must_use]
    pub const fn from_u3(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::DirectRegister),
            1 => Some(Self::IndirectRegister),
            2 => Some(Self::SignExtendedDisplacement),
            3 => Some(Self::ZeroExtendedDisplacement),
            4 => Some(Self::Immediate),
            5 => Some(Self::PcRelative),
            6 => Some(Self::Reserved110),
            7 => Some(Self::Reserved111),
            _ => None,
        }
    }

    /// Returns `true` if this mode is not reserved.
    #[must_use]
    pub const fn is_valid(self) -> bool {
        !matches!(self, Self::Reserved110 | Self::Reserved111)
    }

    /// Returns `true` if an extension word follows the primary word.
    #[must_use]
    pub const fn has_extension_word(self) -> bool {
        matches!(
            self,
            Self::SignExtendedDisplacement
                | Self::ZeroExtendedDisplacement
                | Self::Immediate
                | Self::PcRelative
        )
    }

    /// Returns `true` if the operand lives in data memory.
    #[must_use]
    pub const fn is_memory(self) -> bool {
        matches!(
            self,
            Self::IndirectRegister | Self::SignExtendedDisplacement | Self::ZeroExtendedDisplacement
        )
    }

    const fn bit(self) -> u8 {
        match self {
            Self::DirectRegister => 1 << 0,
            Self::IndirectRegister => 1 << 1,
            Self::SignExtendedDisplacement => 1 << 2,
            Self::ZeroExtendedDisplacement => 1 << 3,
            Self::Immediate => 1 << 4,
            Self::PcRelative => 1 << 5,
            Self::Reserved110 | Self::Reserved111 => 0,
        }
    }
}

/// Register field values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum RegisterField {
    R0,
    R1,
    R2,
    R3,
    R4,
    R5,
    R6,
    R7,
}

impl RegisterField {
    /// Converts a 3-bit register field value.
    #[must_use]
    pub const fn from_u3(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::R0),
            1 => Some(Self::R1),
            2 => Some(Self::R2),
            3 => Some(Self::R3),
            4 => Some(Self::R4),
            5 => Some(Self::R5),
            6 => Some(Self::R6),
            7 => Some(Self::R7),
            _ => None,
        }
    }

    /// Position of the register in `R0..R7`.
    #[must_use]
    pub const fn index(self) -> u8 {
        self as u8
    }
}

/// Reason a word sequence does not decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum DecodeError {
    /// Primary opcode nibble is unassigned.
    #[error("reserved primary opcode")]
    ReservedOpcode,
    /// Sub-opcode is unassigned within its class.
    #[error("unassigned sub-opcode")]
    UnassignedSubOpcode,
    /// `AM` field is 110 or 111.
    #[error("reserved addressing mode")]
    ReservedAddressingMode,
    /// Addressing mode not accepted by this instruction.
    #[error("addressing mode not allowed for this instruction")]
    AddressingModeNotAllowed,
    /// A field the instruction does not use is non-zero.
    #[error("unused field is non-zero")]
    UnusedFieldSet,
    /// Displacement extension word is not a canonical 8-bit value.
    #[error("non-canonical displacement")]
    NonCanonicalDisplacement,
    /// Extension word is missing.
    #[error("instruction is truncated")]
    Truncated,
}

/// Decoded instruction with every field extracted and validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedInstruction {
    /// Assigned encoding.
    pub encoding: OpcodeEncoding,
    /// Destination (or first source) register.
    pub rd: RegisterField,
    /// Operand base register.
    pub ra: RegisterField,
    /// Operand addressing mode.
    pub addressing_mode: AddressingMode,
    /// Extension word, present for modes that carry one.
    pub extension: Option<u16>,
}

impl DecodedInstruction {
    /// Encoded length in bytes.
    #[must_use]
    pub const fn length(&self) -> usize {
        if self.extension.is_some() {
            4
        } else {
            2
        }
    }

    /// Sign- or zero-extended displacement for the displacement modes.
    #[must_use]
    pub const fn displacement(&self) -> u16 {
        match (self.addressing_mode, self.extension) {
            (AddressingMode::SignExtendedDisplacement, Some(ext)) => sign_extend_8bit(ext),
            (AddressingMode::ZeroExtendedDisplacement, Some(ext)) => ext & 0x00FF,
            _ => 0,
        }
    }
}

const fn sign_extend_8bit(value: u16) -> u16 {
    if (value & 0x0080) != 0 {
        value | 0xFF00
    } else {
        value & 0x00FF
    }
}

const ANY_MODE: u8 = 0b11_1111;
const VALUE_MODES: u8 = (1 << 0) | (1 << 4);
const MOV_MODES: u8 = VALUE_MODES | (1 << 5);
const MEMORY_MODES: u8 = ANY_MODE & !(1 << 0);
const NO_OPERAND: u8 = 1 << 0;

/// Addressing modes each encoding accepts, as a bitmask over `AM`.
const fn allowed_modes(encoding: OpcodeEncoding) -> u8 {
    match encoding {
        OpcodeEncoding::Nop
        | OpcodeEncoding::Sync
        | OpcodeEncoding::Halt
        | OpcodeEncoding::Trap
        | OpcodeEncoding::Push
        | OpcodeEncoding::Pop => NO_OPERAND,
        OpcodeEncoding::Swi | OpcodeEncoding::In | OpcodeEncoding::Out => VALUE_MODES,
        OpcodeEncoding::Mov => MOV_MODES,
        OpcodeEncoding::Load
        | OpcodeEncoding::Store
        | OpcodeEncoding::Bset
        | OpcodeEncoding::Bclr
        | OpcodeEncoding::Btest => MEMORY_MODES,
        _ => ANY_MODE,
    }
}

const fn rd_unused(encoding: OpcodeEncoding) -> bool {
    matches!(
        encoding,
        OpcodeEncoding::Nop
            | OpcodeEncoding::Sync
            | OpcodeEncoding::Halt
            | OpcodeEncoding::Trap
            | OpcodeEncoding::Swi
            | OpcodeEncoding::Beq
            | OpcodeEncoding::Bne
            | OpcodeEncoding::Blt
            | OpcodeEncoding::Ble
            | OpcodeEncoding::Bgt
            | OpcodeEncoding::Bge
            | OpcodeEncoding::Jmp
    )
}

const fn ra_unused(encoding: OpcodeEncoding) -> bool {
    matches!(
        encoding,
        OpcodeEncoding::Nop
            | OpcodeEncoding::Sync
            | OpcodeEncoding::Halt
            | OpcodeEncoding::Trap
            | OpcodeEncoding::Push
            | OpcodeEncoding::Pop
    )
}

/// Instruction decoder.
pub struct Decoder;

impl Decoder {
    /// Validates the primary word and returns the full instruction length.
    ///
    /// # Errors
    ///
    /// Any [`DecodeError`] detectable from the primary word alone.
    pub fn primary_length(word: u16) -> Result<usize, DecodeError> {
        let (_, mode) = Self::validate_primary(word)?;
        Ok(if mode.has_extension_word() { 4 } else { 2 })
    }

    /// Decodes a primary word and its optional extension word.
    ///
    /// # Errors
    ///
    /// [`DecodeError`] describing the first violated rule.
    pub fn decode(word: u16, extension: Option<u16>) -> Result<DecodedInstruction, DecodeError> {
        let (encoding, addressing_mode) = Self::validate_primary(word)?;
        let primary = PrimaryWord(word);
        let (rd_bits, ra_bits) = (primary.rd(), primary.ra());

        let extension = if addressing_mode.has_extension_word() {
            Some(extension.ok_or(DecodeError::Truncated)?)
        } else {
            None
        };

        match (addressing_mode, extension) {
            (AddressingMode::SignExtendedDisplacement, Some(ext))
                if sign_extend_8bit(ext) != ext =>
            {
                return Err(DecodeError::NonCanonicalDisplacement);
            }
            (AddressingMode::ZeroExtendedDisplacement, Some(ext)) if ext > 0x00FF => {
                return Err(DecodeError::NonCanonicalDisplacement);
            }
            _ => {}
        }

        let (Some(rd), Some(ra)) = (RegisterField::from_u3(rd_bits), RegisterField::from_u3(ra_bits))
        else {
            return Err(DecodeError::UnusedFieldSet);
        };

        Ok(DecodedInstruction {
            encoding,
            rd,
            ra,
            addressing_mode,
            extension,
        })
    }

    fn validate_primary(word: u16) -> Result<(OpcodeEncoding, AddressingMode), DecodeError> {
        let primary = PrimaryWord(word);
        if primary.has_reserved_op() {
            return Err(DecodeError::ReservedOpcode);
        }
        let encoding = OpcodeEncoding::lookup(primary.op(), primary.sub())
            .ok_or(DecodeError::UnassignedSubOpcode)?;

        let (rd_bits, ra_bits, am_bits) = (primary.rd(), primary.ra(), primary.am());
        let mode = AddressingMode::from_u3(am_bits)
            .filter(|mode| mode.is_valid())
            .ok_or(DecodeError::ReservedAddressingMode)?;
        if allowed_modes(encoding) & mode.bit() == 0 {
            return Err(DecodeError::AddressingModeNotAllowed);
        }
        if rd_unused(encoding) && rd_bits != 0 {
            return Err(DecodeError::UnusedFieldSet);
        }
        if ra_unused(encoding) && ra_bits != 0 {
            return Err(DecodeError::UnusedFieldSet);
        }
        if encoding == OpcodeEncoding::CallOrRet {
            match rd_bits {
                0 => {}
                1 if ra_bits == 0 && mode == AddressingMode::DirectRegister => {}
                _ => return Err(DecodeError::UnusedFieldSet),
            }
        }
        Ok((encoding, mode))
    }
}
