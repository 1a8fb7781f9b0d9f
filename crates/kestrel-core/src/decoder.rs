//! Instruction decode: opcode lookup and addressing-mode classification.

use crate::encoding::{split_instruction_word, Opcode};
use crate::state::{Register, SpecialRegister};

/// One of the 64 operand encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressingMode {
    /// 4-bit immediate value.
    Immediate4(u8),
    /// Stack word `[BP + imm4]`.
    Stack4(u8),
    /// 16-bit immediate from the next word.
    Immediate16,
    /// Stack word `[BP + imm16]`.
    Stack16,
    /// Data word `[imm16]`.
    Absolute,
    /// Data word `[[BP + imm16] + imm16]`.
    FrameIndexed,
    /// Data word `[Xn + imm16]`.
    Indexed(u8),
    /// General register.
    Register(Register),
    /// Sub-word element at pointer `Xn`, most significant element first.
    Pointer(u8),
    /// Sub-word element at pointer `Xn`, least significant element first.
    PointerSwapped(u8),
    /// Data word `[Xn]`.
    Indirect(u8),
    /// `XM`, `XH`, `SP` or `BP`.
    Special(SpecialRegister),
}

/// Extra `(cycles, words)` for each of the 64 encodings, indexed by mode bits.
pub const ADDRESSING_COST_TABLE: [(u8, u8); 64] = build_cost_table();

#[allow(clippy::cast_possible_truncation)]
const fn build_cost_table() -> [(u8, u8); 64] {
    let mut table = [(0, 0); 64];
    let mut mode = 0;
    while mode < 64 {
        let decoded = AddressingMode::from_u6(mode as u8);
        table[mode] = (decoded.extra_cycles(), decoded.extra_words());
        mode += 1;
    }
    table
}

impl AddressingMode {
    /// Decodes the low six bits of `mode`.
    #[must_use]
    pub const fn from_u6(mode: u8) -> Self {
        let mode = mode & 0x3F;
        let low2 = mode & 0x3;
        match mode {
            0x00..=0x0F => Self::Immediate4(mode),
            0x10..=0x1F => Self::Stack4(mode & 0xF),
            0x20 => Self::Immediate16,
            0x21 => Self::Stack16,
            0x22 => Self::Absolute,
            0x23 => Self::FrameIndexed,
            0x24..=0x27 => Self::Indexed(low2),
            0x28..=0x2F => Self::Register(Register::from_u3(mode)),
            0x30..=0x33 => Self::Pointer(low2),
            0x34..=0x37 => Self::PointerSwapped(low2),
            0x38..=0x3B => Self::Indirect(low2),
            _ => Self::Special(SpecialRegister::from_u2(low2)),
        }
    }

    /// Cycles added to the instruction's base cost.
    #[must_use]
    pub const fn extra_cycles(self) -> u8 {
        match self {
            Self::Immediate4(_) | Self::Register(_) | Self::Special(_) => 0,
            Self::Stack4(_)
            | Self::Immediate16
            | Self::Pointer(_)
            | Self::PointerSwapped(_)
            | Self::Indirect(_) => 1,
            Self::Stack16 | Self::Absolute | Self::Indexed(_) => 2,
            Self::FrameIndexed => 4,
        }
    }

    /// Extension words following the instruction word.
    #[must_use]
    pub const fn extra_words(self) -> u8 {
        match self {
            Self::Immediate16 | Self::Stack16 | Self::Absolute | Self::Indexed(_) => 1,
            Self::FrameIndexed => 2,
            _ => 0,
        }
    }
}

/// Fields of one decoded instruction word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DecodedInstruction {
    /// Operation.
    pub opcode: Opcode,
    /// Register field.
    pub reg: Register,
    /// Raw 6-bit addressing mode.
    pub mode: u8,
}

impl DecodedInstruction {
    /// Classified addressing mode.
    #[must_use]
    pub const fn addressing(self) -> AddressingMode {
        AddressingMode::from_u6(self.mode)
    }

    /// Instruction length in words, extension words included.
    #[must_use]
    pub const fn length(self) -> u16 {
        1 + self.addressing().extra_words() as u16
    }
}

/// Decodes `word`, returning `None` for undefined opcodes.
#[must_use]
pub const fn decode(word: u16) -> Option<DecodedInstruction> {
    let (op, reg, mode) = split_instruction_word(word);
    match Opcode::from_u7(op) {
        Some(opcode) => Some(DecodedInstruction {
            opcode,
            reg: Register::from_u3(reg),
            mode,
        }),
        None => None,
    }
}
