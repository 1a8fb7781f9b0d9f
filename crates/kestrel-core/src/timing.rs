//! Base cycle costs per instruction form.

use crate::encoding::Opcode;

/// Instruction forms with fixed base cycle costs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CycleCostKind {
    /// No-operation.
    Nop,
    /// Register/operand move.
    Mov,
    /// Register/operand exchange.
    Exchange,
    /// Add/subtract/logic/shift/rotate.
    Alu,
    /// Multiply.
    Mul,
    /// Multiply-accumulate.
    Mac,
    /// Divide and modulo.
    Div,
    /// Conditional skip, not taken.
    Skip,
    /// Extra cost when a skip or counted jump is taken.
    Taken,
    /// Unconditional jump.
    Jump,
    /// Conditional relative jump, not taken.
    Branch,
    /// Function call entry.
    Call,
    /// Per in-line call parameter.
    CallParameter,
    /// Function return.
    Return,
    /// Kernel call issue; the dispatcher adds the call's own cost.
    KernelCall,
}

/// Single source-of-truth base cycle table.
pub const CYCLE_COST_TABLE: &[(CycleCostKind, u32)] = &[
    (CycleCostKind::Nop, 1),
    (CycleCostKind::Mov, 1),
    (CycleCostKind::Exchange, 2),
    (CycleCostKind::Alu, 1),
    (CycleCostKind::Mul, 2),
    (CycleCostKind::Mac, 3),
    (CycleCostKind::Div, 8),
    (CycleCostKind::Skip, 1),
    (CycleCostKind::Taken, 1),
    (CycleCostKind::Jump, 2),
    (CycleCostKind::Branch, 1),
    (CycleCostKind::Call, 4),
    (CycleCostKind::CallParameter, 1),
    (CycleCostKind::Return, 3),
    (CycleCostKind::KernelCall, 0),
];

/// Looks up the base cost of `kind`.
#[must_use]
pub fn cycle_cost(kind: CycleCostKind) -> u32 {
    CYCLE_COST_TABLE
        .iter()
        .find_map(|(entry_kind, cycles)| (*entry_kind == kind).then_some(*cycles))
        .unwrap_or(0)
}

impl Opcode {
    /// Cost class of this opcode.
    #[must_use]
    pub const fn cost_kind(self) -> CycleCostKind {
        match self {
            Self::Nop => CycleCostKind::Nop,
            Self::MovR | Self::MovO => CycleCostKind::Mov,
            Self::Xch => CycleCostKind::Exchange,
            Self::MulR | Self::MulO | Self::Muls => CycleCostKind::Mul,
            Self::Mac => CycleCostKind::Mac,
            Self::DivR | Self::DivO | Self::Divs | Self::ModR | Self::ModO => CycleCostKind::Div,
            Self::Xeq
            | Self::Xne
            | Self::Xug
            | Self::Xsg
            | Self::Xbs
            | Self::Xbc
            | Self::Xul
            | Self::Xsl => CycleCostKind::Skip,
            Self::Jmr | Self::Jma => CycleCostKind::Jump,
            Self::Jnz | Self::Djnz => CycleCostKind::Branch,
            Self::Jfr | Self::Jfa => CycleCostKind::Call,
            Self::Rfn => CycleCostKind::Return,
            Self::Jsv => CycleCostKind::KernelCall,
            _ => CycleCostKind::Alu,
        }
    }

    /// Base cycles before operand and taken-branch surcharges.
    #[must_use]
    pub fn base_cycles(self) -> u32 {
        cycle_cost(self.cost_kind())
    }
}
