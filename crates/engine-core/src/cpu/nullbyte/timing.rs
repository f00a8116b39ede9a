/// Cost class an executed instruction is billed under.
///
/// Every class charges a fixed number of cycles to `CYCLES`. Memory and port
/// traffic costs more than register work; bit operations on memory cost as
/// much as a port access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CostClass {
    /// `NOP`
    Nop,
    /// `SYNC`
    Sync,
    /// `HALT`
    Halt,
    /// `TRAP`
    Trap,
    /// `SWI n`
    Swi,
    /// `MOV` from a register or an immediate.
    Mov,
    /// `LOAD`
    Load,
    /// `STORE`
    Store,
    /// Add, subtract, logic, shifts and compares.
    Alu,
    /// `MUL` and `MULH`.
    Mul,
    /// `DIV` and `MOD`.
    Div,
    /// `QADD` and `QSUB`.
    Saturating,
    /// Conditional branch that falls through.
    BranchFallThrough,
    /// Conditional branch that jumps.
    BranchTaken,
    /// `JMP`
    Jump,
    /// `CALL`
    Call,
    /// `RET`
    Ret,
    /// `PUSH`
    Push,
    /// `POP`
    Pop,
    /// `IN`
    PortIn,
    /// `OUT`
    PortOut,
    /// `BSET`
    BitSet,
    /// `BCLR`
    BitClear,
    /// `BTST`
    BitTest,
}

impl CostClass {
    /// Cycles charged for one instruction of this class.
    #[must_use]
    pub const fn cycles(self) -> u16 {
        match self {
            Self::Nop
            | Self::Sync
            | Self::Halt
            | Self::Trap
            | Self::Swi
            | Self::Mov
            | Self::Alu
            | Self::Saturating
            | Self::BranchFallThrough
            | Self::Push
            | Self::Pop => 1,
            Self::Load
            | Self::Store
            | Self::Mul
            | Self::BranchTaken
            | Self::Jump
            | Self::Call
            | Self::Ret => 2,
            Self::Div => 3,
            Self::PortIn | Self::PortOut | Self::BitSet | Self::BitClear | Self::BitTest => 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::CostClass;

    #[test]
    fn memory_traffic_costs_more_than_register_work() {
        assert!(CostClass::Load.cycles() > CostClass::Mov.cycles());
        assert!(CostClass::PortOut.cycles() > CostClass::Store.cycles());
        assert_eq!(CostClass::BitTest.cycles(), CostClass::PortIn.cycles());
    }

    #[test]
    fn taken_branches_pay_for_the_redirect() {
        assert_eq!(CostClass::BranchFallThrough.cycles(), 1);
        assert_eq!(CostClass::BranchTaken.cycles(), CostClass::Jump.cycles());
        assert_eq!(CostClass::Div.cycles(), 3);
    }
}
