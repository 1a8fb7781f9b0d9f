//! Instruction disassembly for debugging hosts.
//!
//! Operands are written as `#n` for immediates, `[..]` for memory, `@Xn` for
//! the sub-word pointer modes (`@Xn~` when swapped) and register names
//! otherwise. Operand-form instructions list the operand before the register.

use crate::decoder::{decode, AddressingMode};
use crate::encoding::{Opcode, OperandForm};

/// One disassembled instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct DisassemblyRow {
    /// Code address of the instruction word.
    pub addr: u16,
    /// Instruction word followed by its extension words.
    pub words: Vec<u16>,
    /// Mnemonic, or `.word` for an undefined opcode.
    pub mnemonic: String,
    /// Formatted operands.
    pub operands: String,
    /// The opcode is not defined.
    pub is_illegal: bool,
}

impl DisassemblyRow {
    /// Words occupied by the instruction.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::missing_const_for_fn)]
    pub fn len(&self) -> u16 {
        self.words.len() as u16
    }

    /// Always `false`; every row holds at least the instruction word.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

impl std::fmt::Display for DisassemblyRow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04X}  {}", self.addr, self.mnemonic)?;
        if !self.operands.is_empty() {
            write!(f, " {}", self.operands)?;
        }
        Ok(())
    }
}

/// Opcodes whose register field is ignored.
const fn uses_register(opcode: Opcode) -> bool {
    !matches!(
        opcode,
        Opcode::Nop | Opcode::Jmr | Opcode::Jma | Opcode::Jfr | Opcode::Jfa | Opcode::Jsv
    )
}

fn word_at(code: &[u16], addr: u16) -> u16 {
    code.get(usize::from(addr)).copied().unwrap_or(0)
}

fn format_operand(mode: AddressingMode, extension: &[u16]) -> String {
    let ext = |index: usize| extension.get(index).copied().unwrap_or(0);
    match mode {
        AddressingMode::Immediate4(value) => format!("#{value}"),
        AddressingMode::Stack4(offset) => format!("[BP+{offset}]"),
        AddressingMode::Immediate16 => format!("#0x{:04X}", ext(0)),
        AddressingMode::Stack16 => format!("[BP+0x{:04X}]", ext(0)),
        AddressingMode::Absolute => format!("[0x{:04X}]", ext(0)),
        AddressingMode::FrameIndexed => format!("[[BP+0x{:04X}]+0x{:04X}]", ext(0), ext(1)),
        AddressingMode::Indexed(n) => format!("[X{n}+0x{:04X}]", ext(0)),
        AddressingMode::Register(reg) => reg.name().to_owned(),
        AddressingMode::Pointer(n) => format!("@X{n}"),
        AddressingMode::PointerSwapped(n) => format!("@X{n}~"),
        AddressingMode::Indirect(n) => format!("[X{n}]"),
        AddressingMode::Special(reg) => reg.name().to_owned(),
    }
}

/// Disassembles the instruction at `pc`; words past the end of `code` read as 0.
#[must_use]
pub fn disassemble(code: &[u16], pc: u16) -> DisassemblyRow {
    let word = word_at(code, pc);
    let Some(instr) = decode(word) else {
        return DisassemblyRow {
            addr: pc,
            words: vec![word],
            mnemonic: ".word".to_owned(),
            operands: format!("0x{word:04X}"),
            is_illegal: true,
        };
    };

    let words: Vec<u16> = (0..instr.length())
        .map(|index| word_at(code, pc.wrapping_add(index)))
        .collect();
    let operand = format_operand(instr.addressing(), &words[1..]);
    let operands = if !uses_register(instr.opcode) {
        operand
    } else if instr.opcode.operand_form() == OperandForm::Read {
        format!("{}, {operand}", instr.reg.name())
    } else {
        format!("{operand}, {}", instr.reg.name())
    };

    DisassemblyRow {
        addr: pc,
        words,
        mnemonic: instr.opcode.mnemonic().to_owned(),
        operands,
        is_illegal: false,
    }
}

/// Disassembles `count` consecutive instructions starting at `start`.
#[must_use]
pub fn disassemble_range(code: &[u16], start: u16, count: usize) -> Vec<DisassemblyRow> {
    let mut pc = start;
    let mut rows = Vec::with_capacity(count);
    for _ in 0..count {
        let row = disassemble(code, pc);
        pc = pc.wrapping_add(row.len());
        rows.push(row);
    }
    rows
}
