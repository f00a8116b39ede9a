//! Nullbyte instruction words.
//!
//! ```text
//!  15      12 11    9 8     6 5     3 2     0
//! +----------+-------+-------+-------+-------+
//! |    OP    |  RD   |  RA   |  SUB  |  AM   |
//! +----------+-------+-------+-------+-------+
//! ```
//!
//! Addressing modes 2 through 5 take one extension word after the primary
//! word. Primary opcodes `0xA` to `0xF` are reserved.

/// One primary instruction word with field accessors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PrimaryWord(pub u16);

#[allow(clippy::cast_possible_truncation)]
impl PrimaryWord {
    /// Packs the five fields, masking each to its width.
    #[must_use]
    pub const fn assemble(op: u8, rd: u8, ra: u8, sub: u8, am: u8) -> Self {
        Self(
            ((op as u16 & 0xF) << 12)
                | ((rd as u16 & 0x7) << 9)
                | ((ra as u16 & 0x7) << 6)
                | ((sub as u16 & 0x7) << 3)
                | (am as u16 & 0x7),
        )
    }

    /// `OP`, bits 15..12.
    #[must_use]
    pub const fn op(self) -> u8 {
        (self.0 >> 12) as u8
    }

    /// `RD`, bits 11..9.
    #[must_use]
    pub const fn rd(self) -> u8 {
        ((self.0 >> 9) & 0x7) as u8
    }

    /// `RA`, bits 8..6.
    #[must_use]
    pub const fn ra(self) -> u8 {
        ((self.0 >> 6) & 0x7) as u8
    }

    /// `SUB`, bits 5..3.
    #[must_use]
    pub const fn sub(self) -> u8 {
        ((self.0 >> 3) & 0x7) as u8
    }

    /// `AM`, bits 2..0.
    #[must_use]
    pub const fn am(self) -> u8 {
        (self.0 & 0x7) as u8
    }

    /// Whether `OP` falls in the reserved range.
    #[must_use]
    pub const fn has_reserved_op(self) -> bool {
        self.op() >= 0xA
    }
}

/// Builds a primary word; shorthand for [`PrimaryWord::assemble`].
#[must_use]
pub const fn encode_primary_word(op: u8, rd: u8, ra: u8, sub: u8, am: u8) -> u16 {
    PrimaryWord::assemble(op, rd, ra, sub, am).0
}

/// Instructions the backend executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum OpcodeEncoding {
    Nop,
    Sync,
    Halt,
    Trap,
    Swi,
    Mov,
    Load,
    Store,
    Add,
    Sub,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Cmp,
    Mul,
    Mulh,
    Div,
    Mod,
    Qadd,
    Qsub,
    Beq,
    Bne,
    Blt,
    Ble,
    Bgt,
    Bge,
    Jmp,
    /// `CALL` when `RD` is 0, `RET` when it is 1.
    CallOrRet,
    Push,
    Pop,
    In,
    Out,
    Bset,
    Bclr,
    Btest,
}

use OpcodeEncoding as E;

/// Assigned instructions per primary opcode, indexed by `SUB`.
const ASSIGNED: [&[OpcodeEncoding]; 10] = [
    &[E::Nop, E::Sync, E::Halt, E::Trap, E::Swi],
    &[E::Mov],
    &[E::Load],
    &[E::Store],
    &[E::Add, E::Sub, E::And, E::Or, E::Xor, E::Shl, E::Shr, E::Cmp],
    &[E::Mul, E::Mulh, E::Div, E::Mod, E::Qadd, E::Qsub],
    &[E::Beq, E::Bne, E::Blt, E::Ble, E::Bgt, E::Bge, E::Jmp, E::CallOrRet],
    &[E::Push, E::Pop],
    &[E::In, E::Out],
    &[E::Bset, E::Bclr, E::Btest],
];

impl OpcodeEncoding {
    /// The instruction assigned to `(op, sub)`, if any.
    #[must_use]
    pub fn lookup(op: u8, sub: u8) -> Option<Self> {
        ASSIGNED
            .get(usize::from(op))?
            .get(usize::from(sub))
            .copied()
    }

    /// Control transfers and run-ending instructions close a basic block.
    #[must_use]
    pub const fn ends_block(self) -> bool {
        matches!(
            self,
            Self::Halt
                | Self::Trap
                | Self::Swi
                | Self::Beq
                | Self::Bne
                | Self::Blt
                | Self::Ble
                | Self::Bgt
                | Self::Bge
                | Self::Jmp
                | Self::CallOrRet
        )
    }
}
