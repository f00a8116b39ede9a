//! Execute stage.
//!
//! Every instruction runs in two phases. The compute phase reads operands,
//! performs memory and port accesses, and records the register side effects
//! in an [`ExecuteState`]. The commit phase applies them. A memory fault in
//! the compute phase returns early, so a faulting instruction never changes
//! a register.

#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    clippy::similar_names
)]

use super::decoder::{AddressingMode, DecodedInstruction, RegisterField};
use super::encoding::OpcodeEncoding;
use super::timing::CostClass;
use super::{NullbyteRegister, FLAGS_C, FLAGS_N, FLAGS_V, FLAGS_Z, TRAP_INTERRUPT};
use crate::cpu::{Machine, Outcome, Step};
use crate::error::ErrorCode;

/// How FLAGS change when an instruction commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlagsUpdate {
    /// No change to FLAGS.
    #[default]
    None,
    /// Replace all four condition flags.
    UpdateNZCV {
        /// Zero flag.
        zero: bool,
        /// Negative flag.
        negative: bool,
        /// Carry flag.
        carry: bool,
        /// Overflow flag.
        overflow: bool,
    },
    /// Replace only the zero flag.
    Zero(bool),
}

impl FlagsUpdate {
    /// Applies the update to a FLAGS value.
    #[must_use]
    pub const fn apply(self, flags: u16) -> u16 {
        const fn assign(flags: u16, bit: u16, set: bool) -> u16 {
            if set {
                flags | bit
            } else {
                flags & !bit
            }
        }
        match self {
            Self::None => flags,
            Self::UpdateNZCV {
                zero,
                negative,
                carry,
                overflow,
            } => {
                let flags = assign(flags, FLAGS_Z, zero);
                let flags = assign(flags, FLAGS_N, negative);
                let flags = assign(flags, FLAGS_C, carry);
                assign(flags, FLAGS_V, overflow)
            }
            Self::Zero(zero) => assign(flags, FLAGS_Z, zero),
        }
    }
}

/// Side effects recorded by the compute phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecuteState {
    /// Destination register write.
    pub dest: Option<(RegisterField, u16)>,
    /// New stack pointer.
    pub sp: Option<u16>,
    /// FLAGS update.
    pub flags_update: FlagsUpdate,
    /// Address of the next instruction.
    pub next_pc: u16,
    /// Fixed cycle cost.
    pub cycles: u16,
    /// How the instruction ended.
    pub outcome: Outcome,
}

impl ExecuteState {
    fn new(class: CostClass, next_pc: u16) -> Self {
        Self {
            dest: None,
            sp: None,
            flags_update: FlagsUpdate::None,
            next_pc,
            cycles: class.cycles(),
            outcome: Outcome::Retired,
        }
    }
}

/// Operand view of the machine for one instruction.
struct Operands<'a> {
    machine: &'a mut dyn Machine,
    big_endian: bool,
    next_pc: u16,
}

impl Operands<'_> {
    fn register(&self, register: NullbyteRegister) -> u16 {
        self.machine.register(register.id()) as u16
    }

    fn gpr(&self, field: RegisterField) -> u16 {
        self.register(NullbyteRegister::gpr(field))
    }

    fn flag(&self, bit: u16) -> bool {
        self.register(NullbyteRegister::Flags) & bit != 0
    }

    fn read16(&mut self, address: u16) -> Result<u16, ErrorCode> {
        let mut raw = [0u8; 2];
        self.machine.read(u64::from(address), &mut raw)?;
        Ok(if self.big_endian {
            u16::from_be_bytes(raw)
        } else {
            u16::from_le_bytes(raw)
        })
    }

    fn write16(&mut self, address: u16, value: u16) -> Result<(), ErrorCode> {
        let raw = if self.big_endian {
            value.to_be_bytes()
        } else {
            value.to_le_bytes()
        };
        self.machine.write(u64::from(address), &raw)
    }

    fn effective_address(&self, instr: &DecodedInstruction) -> u16 {
        let extension = instr.extension.unwrap_or(0);
        match instr.addressing_mode {
            AddressingMode::DirectRegister | AddressingMode::IndirectRegister => self.gpr(instr.ra),
            AddressingMode::SignExtendedDisplacement | AddressingMode::ZeroExtendedDisplacement => {
                self.gpr(instr.ra).wrapping_add(instr.displacement())
            }
            AddressingMode::Immediate => extension,
            AddressingMode::PcRelative => self.next_pc.wrapping_add(extension),
            AddressingMode::Reserved110 | AddressingMode::Reserved111 => 0,
        }
    }

    fn value(&mut self, instr: &DecodedInstruction) -> Result<u16, ErrorCode> {
        let address = self.effective_address(instr);
        if instr.addressing_mode.is_memory() {
            self.read16(address)
        } else {
            Ok(address)
        }
    }
}

/// Executes one decoded instruction fetched at `pc` and commits it.
///
/// # Errors
///
/// Memory faults raised by the [`Machine`]; no register changes in that case.
pub fn execute_instruction(
    instr: &DecodedInstruction,
    pc: u16,
    big_endian: bool,
    machine: &mut dyn Machine,
) -> Result<Step, ErrorCode> {
    let next_pc = pc.wrapping_add(instr.length() as u16);
    let mut operands = Operands {
        machine,
        big_endian,
        next_pc,
    };
    let exec = compute(instr, &mut operands)?;
    commit_execution(operands.machine, &exec);
    Ok(Step {
        cycles: exec.cycles,
        outcome: exec.outcome,
    })
}

/// Applies recorded side effects.
pub fn commit_execution(machine: &mut dyn Machine, exec: &ExecuteState) {
    if let Some((field, value)) = exec.dest {
        machine.set_register(NullbyteRegister::gpr(field).id(), u64::from(value));
    }
    if let Some(sp) = exec.sp {
        machine.set_register(NullbyteRegister::Sp.id(), u64::from(sp));
    }
    if exec.flags_update != FlagsUpdate::None {
        let flags = machine.register(NullbyteRegister::Flags.id()) as u16;
        machine.set_register(
            NullbyteRegister::Flags.id(),
            u64::from(exec.flags_update.apply(flags)),
        );
    }
    if let Outcome::Interrupt(number) = exec.outcome {
        // TRAP latches zero; SWI latches its operand.
        machine.set_register(NullbyteRegister::Cause.id(), u64::from(number & 0xFFFF));
    }
    machine.set_register(NullbyteRegister::Pc.id(), u64::from(exec.next_pc));
    let cycles = machine.register(NullbyteRegister::Cycles.id());
    machine.set_register(
        NullbyteRegister::Cycles.id(),
        cycles.wrapping_add(u64::from(exec.cycles)),
    );
}

fn compute(instr: &DecodedInstruction, ops: &mut Operands<'_>) -> Result<ExecuteState, ErrorCode> {
    let next_pc = ops.next_pc;
    let exec = match instr.encoding {
        OpcodeEncoding::Nop => ExecuteState::new(CostClass::Nop, next_pc),
        OpcodeEncoding::Sync => ExecuteState::new(CostClass::Sync, next_pc),
        OpcodeEncoding::Halt => ExecuteState {
            outcome: Outcome::Halt,
            ..ExecuteState::new(CostClass::Halt, next_pc)
        },
        OpcodeEncoding::Trap => ExecuteState {
            outcome: Outcome::Interrupt(TRAP_INTERRUPT),
            ..ExecuteState::new(CostClass::Trap, next_pc)
        },
        OpcodeEncoding::Swi => {
            let number = ops.value(instr)?;
            ExecuteState {
                outcome: Outcome::Interrupt(u32::from(number)),
                ..ExecuteState::new(CostClass::Swi, next_pc)
            }
        }
        OpcodeEncoding::Mov => {
            let value = ops.value(instr)?;
            load_into(instr.rd, value, CostClass::Mov, next_pc)
        }
        OpcodeEncoding::Load => {
            let address = ops.effective_address(instr);
            let value = ops.read16(address)?;
            load_into(instr.rd, value, CostClass::Load, next_pc)
        }
        OpcodeEncoding::Store => {
            let address = ops.effective_address(instr);
            ops.write16(address, ops.gpr(instr.rd))?;
            ExecuteState::new(CostClass::Store, next_pc)
        }
        OpcodeEncoding::Add => execute_alu(instr, ops, AluOp::Add)?,
        OpcodeEncoding::Sub => execute_alu(instr, ops, AluOp::Sub)?,
        OpcodeEncoding::And => execute_alu(instr, ops, AluOp::And)?,
        OpcodeEncoding::Or => execute_alu(instr, ops, AluOp::Or)?,
        OpcodeEncoding::Xor => execute_alu(instr, ops, AluOp::Xor)?,
        OpcodeEncoding::Shl => execute_alu(instr, ops, AluOp::Shl)?,
        OpcodeEncoding::Shr => execute_alu(instr, ops, AluOp::Shr)?,
        OpcodeEncoding::Cmp => {
            let mut exec = execute_alu(instr, ops, AluOp::Sub)?;
            exec.dest = None;
            exec
        }
        OpcodeEncoding::Mul => execute_math(instr, ops, MathOp::Mul)?,
        OpcodeEncoding::Mulh => execute_math(instr, ops, MathOp::Mulh)?,
        OpcodeEncoding::Div => execute_math(instr, ops, MathOp::Div)?,
        OpcodeEncoding::Mod => execute_math(instr, ops, MathOp::Mod)?,
        OpcodeEncoding::Qadd => execute_math(instr, ops, MathOp::Qadd)?,
        OpcodeEncoding::Qsub => execute_math(instr, ops, MathOp::Qsub)?,
        OpcodeEncoding::Beq => execute_branch(instr, ops, BranchOp::Eq),
        OpcodeEncoding::Bne => execute_branch(instr, ops, BranchOp::Ne),
        OpcodeEncoding::Blt => execute_branch(instr, ops, BranchOp::Lt),
        OpcodeEncoding::Ble => execute_branch(instr, ops, BranchOp::Le),
        OpcodeEncoding::Bgt => execute_branch(instr, ops, BranchOp::Gt),
        OpcodeEncoding::Bge => execute_branch(instr, ops, BranchOp::Ge),
        OpcodeEncoding::Jmp => ExecuteState::new(CostClass::Jump, ops.effective_address(instr)),
        OpcodeEncoding::CallOrRet => execute_call_or_ret(instr, ops)?,
        OpcodeEncoding::Push => {
            let sp = ops.register(NullbyteRegister::Sp).wrapping_sub(2);
            ops.write16(sp, ops.gpr(instr.rd))?;
            ExecuteState {
                sp: Some(sp),
                ..ExecuteState::new(CostClass::Push, next_pc)
            }
        }
        OpcodeEncoding::Pop => {
            let sp = ops.register(NullbyteRegister::Sp);
            let value = ops.read16(sp)?;
            ExecuteState {
                sp: Some(sp.wrapping_add(2)),
                ..load_into(instr.rd, value, CostClass::Pop, next_pc)
            }
        }
        OpcodeEncoding::In => {
            let port = ops.value(instr)?;
            let value = ops.machine.port_in(u32::from(port), 2) as u16;
            ExecuteState {
                dest: Some((instr.rd, value)),
                ..ExecuteState::new(CostClass::PortIn, next_pc)
            }
        }
        OpcodeEncoding::Out => {
            let port = ops.value(instr)?;
            let value = ops.gpr(instr.rd);
            ops.machine.port_out(u32::from(port), 2, u32::from(value));
            ExecuteState::new(CostClass::PortOut, next_pc)
        }
        OpcodeEncoding::Bset | OpcodeEncoding::Bclr | OpcodeEncoding::Btest => {
            execute_bitop(instr, ops)?
        }
    };
    Ok(exec)
}

fn load_into(rd: RegisterField, value: u16, class: CostClass, next_pc: u16) -> ExecuteState {
    ExecuteState {
        dest: Some((rd, value)),
        flags_update: nzcv(value, false, false),
        ..ExecuteState::new(class, next_pc)
    }
}

const fn nzcv(result: u16, carry: bool, overflow: bool) -> FlagsUpdate {
    FlagsUpdate::UpdateNZCV {
        zero: result == 0,
        negative: (result & 0x8000) != 0,
        carry,
        overflow,
    }
}

#[derive(Clone, Copy)]
enum AluOp {
    Add,
    Sub,
    And,
    Or,
    Xor,
    Shl,
    Shr,
}

fn execute_alu(
    instr: &DecodedInstruction,
    ops: &mut Operands<'_>,
    op: AluOp,
) -> Result<ExecuteState, ErrorCode> {
    let reg_a = ops.gpr(instr.rd);
    let reg_b = ops.value(instr)?;

    let (result, flags) = match op {
        AluOp::Add => {
            let (res, carry) = reg_a.overflowing_add(reg_b);
            let overflow = (!(reg_a ^ reg_b) & (reg_a ^ res) & 0x8000) != 0;
            (res, nzcv(res, carry, overflow))
        }
        AluOp::Sub => {
            let (res, carry) = reg_a.overflowing_sub(reg_b);
            let overflow = ((reg_a ^ reg_b) & (reg_a ^ res) & 0x8000) != 0;
            (res, nzcv(res, carry, overflow))
        }
        AluOp::And => (reg_a & reg_b, nzcv(reg_a & reg_b, false, false)),
        AluOp::Or => (reg_a | reg_b, nzcv(reg_a | reg_b, false, false)),
        AluOp::Xor => (reg_a ^ reg_b, nzcv(reg_a ^ reg_b, false, false)),
        AluOp::Shl => {
            let shift = reg_b & 0x0F;
            let res = reg_a << shift;
            let carry = shift > 0 && (reg_a >> (16 - shift)) & 1 != 0;
            (res, nzcv(res, carry, false))
        }
        AluOp::Shr => {
            let shift = reg_b & 0x0F;
            let res = reg_a >> shift;
            let carry = shift > 0 && (reg_a >> (shift - 1)) & 1 != 0;
            (res, nzcv(res, carry, false))
        }
    };

    Ok(ExecuteState {
        dest: Some((instr.rd, result)),
        flags_update: flags,
        ..ExecuteState::new(CostClass::Alu, ops.next_pc)
    })
}

#[derive(Clone, Copy)]
enum MathOp {
    Mul,
    Mulh,
    Div,
    Mod,
    Qadd,
    Qsub,
}

fn execute_math(
    instr: &DecodedInstruction,
    ops: &mut Operands<'_>,
    op: MathOp,
) -> Result<ExecuteState, ErrorCode> {
    let class = match op {
        MathOp::Mul | MathOp::Mulh => CostClass::Mul,
        MathOp::Div | MathOp::Mod => CostClass::Div,
        MathOp::Qadd | MathOp::Qsub => CostClass::Saturating,
    };
    let reg_a = ops.gpr(instr.rd);
    let reg_b = ops.value(instr)?;

    let (result, overflow) = match op {
        MathOp::Mul => ((u32::from(reg_a) * u32::from(reg_b)) as u16, false),
        MathOp::Mulh => (((u32::from(reg_a) * u32::from(reg_b)) >> 16) as u16, false),
        MathOp::Div => (reg_a.checked_div(reg_b).unwrap_or(0), false),
        MathOp::Mod => (reg_a.checked_rem(reg_b).unwrap_or(0), false),
        MathOp::Qadd => {
            let (a, b) = (reg_a as i16, reg_b as i16);
            (a.saturating_add(b) as u16, a.checked_add(b).is_none())
        }
        MathOp::Qsub => {
            let (a, b) = (reg_a as i16, reg_b as i16);
            (a.saturating_sub(b) as u16, a.checked_sub(b).is_none())
        }
    };

    Ok(ExecuteState {
        dest: Some((instr.rd, result)),
        flags_update: nzcv(result, false, overflow),
        ..ExecuteState::new(class, ops.next_pc)
    })
}

#[derive(Clone, Copy)]
enum BranchOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

fn execute_branch(instr: &DecodedInstruction, ops: &Operands<'_>, op: BranchOp) -> ExecuteState {
    let zero = ops.flag(FLAGS_Z);
    let less = ops.flag(FLAGS_N) != ops.flag(FLAGS_V);
    let taken = match op {
        BranchOp::Eq => zero,
        BranchOp::Ne => !zero,
        BranchOp::Lt => less,
        BranchOp::Le => zero || less,
        BranchOp::Gt => !zero && !less,
        BranchOp::Ge => !less,
    };

    if taken {
        ExecuteState::new(CostClass::BranchTaken, ops.effective_address(instr))
    } else {
        ExecuteState::new(CostClass::BranchFallThrough, ops.next_pc)
    }
}

fn execute_call_or_ret(
    instr: &DecodedInstruction,
    ops: &mut Operands<'_>,
) -> Result<ExecuteState, ErrorCode> {
    let sp = ops.register(NullbyteRegister::Sp);
    if instr.rd == RegisterField::R1 {
        let target = ops.read16(sp)?;
        return Ok(ExecuteState {
            sp: Some(sp.wrapping_add(2)),
            ..ExecuteState::new(CostClass::Ret, target)
        });
    }

    let target = ops.effective_address(instr);
    let sp = sp.wrapping_sub(2);
    ops.write16(sp, ops.next_pc)?;
    Ok(ExecuteState {
        sp: Some(sp),
        ..ExecuteState::new(CostClass::Call, target)
    })
}

fn execute_bitop(
    instr: &DecodedInstruction,
    ops: &mut Operands<'_>,
) -> Result<ExecuteState, ErrorCode> {
    let address = ops.effective_address(instr);
    let mask = 1u16 << (ops.gpr(instr.rd) & 0x0F);
    let value = ops.read16(address)?;
    let class = match instr.encoding {
        OpcodeEncoding::Bset => {
            ops.write16(address, value | mask)?;
            CostClass::BitSet
        }
        OpcodeEncoding::Bclr => {
            ops.write16(address, value & !mask)?;
            CostClass::BitClear
        }
        _ => CostClass::BitTest,
    };
    Ok(ExecuteState {
        flags_update: FlagsUpdate::Zero(value & mask == 0),
        ..ExecuteState::new(class, ops.next_pc)
    })
}

#[cfg(test)]
mod tests {
    use super::{ExecuteState, FlagsUpdate};
    use crate::cpu::nullbyte::timing::CostClass;
    use crate::cpu::nullbyte::{FLAGS_C, FLAGS_N, FLAGS_V, FLAGS_Z};
    use crate::cpu::Outcome;

    #[test]
    fn fresh_state_charges_the_class_cost_and_retires() {
        let exec = ExecuteState::new(CostClass::Div, 0x0102);
        assert_eq!(exec.cycles, 3);
        assert_eq!(exec.next_pc, 0x0102);
        assert_eq!(exec.outcome, Outcome::Retired);
        assert_eq!(exec.flags_update, FlagsUpdate::None);
    }

    #[test]
    fn nzcv_update_replaces_condition_bits_only() {
        let update = FlagsUpdate::UpdateNZCV {
            zero: true,
            negative: false,
            carry: true,
            overflow: false,
        };
        assert_eq!(update.apply(FLAGS_N | FLAGS_V | 0x100), FLAGS_Z | FLAGS_C | 0x100);
        assert_eq!(FlagsUpdate::None.apply(0x0F), 0x0F);
        assert_eq!(FlagsUpdate::Zero(false).apply(FLAGS_Z | FLAGS_C), FLAGS_C);
    }
}
