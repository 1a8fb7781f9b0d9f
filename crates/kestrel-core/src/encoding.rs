//! Opcode assignments and the 128-entry dispatch table.
//!
//! Instruction word layout: `ooooooo rrr aaaaaa` with a 7-bit opcode, a 3-bit
//! register field and a 6-bit addressing mode.

/// Defined opcodes. `R` forms write the register, `O` forms write the operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum Opcode {
    Nop = 0x00,
    MovR = 0x01,
    MovO = 0x02,
    Xch = 0x03,
    AddR = 0x04,
    AddO = 0x05,
    AdcR = 0x06,
    AdcO = 0x07,
    SubR = 0x08,
    SubO = 0x09,
    SbcR = 0x0A,
    SbcO = 0x0B,
    AndR = 0x0C,
    AndO = 0x0D,
    OrR = 0x0E,
    OrO = 0x0F,
    XorR = 0x10,
    XorO = 0x11,
    Not = 0x12,
    Neg = 0x13,
    ShlR = 0x14,
    ShlO = 0x15,
    ShrR = 0x16,
    ShrO = 0x17,
    AsrR = 0x18,
    AsrO = 0x19,
    Rol = 0x1A,
    Ror = 0x1B,
    MulR = 0x1C,
    MulO = 0x1D,
    Mac = 0x1E,
    Muls = 0x1F,
    DivR = 0x20,
    DivO = 0x21,
    Divs = 0x22,
    ModR = 0x23,
    ModO = 0x24,
    Xeq = 0x28,
    Xne = 0x29,
    Xug = 0x2A,
    Xsg = 0x2B,
    Xbs = 0x2C,
    Xbc = 0x2D,
    Xul = 0x2E,
    Xsl = 0x2F,
    Jmr = 0x30,
    Jma = 0x31,
    Jfr = 0x32,
    Jfa = 0x33,
    Rfn = 0x34,
    Jsv = 0x35,
    Jnz = 0x36,
    Djnz = 0x37,
}

/// Operand flow of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandForm {
    /// Operand is only read.
    Read,
    /// Operand is read and written back.
    ReadModifyWrite,
    /// Operand is only written.
    Write,
}

/// Every defined opcode with its mnemonic and operand flow.
pub const OPCODE_ENCODING_TABLE: &[(Opcode, &str, OperandForm)] = &[
    (Opcode::Nop, "NOP", OperandForm::Read),
    (Opcode::MovR, "MOV", OperandForm::Read),
    (Opcode::MovO, "MOV", OperandForm::Write),
    (Opcode::Xch, "XCH", OperandForm::ReadModifyWrite),
    (Opcode::AddR, "ADD", OperandForm::Read),
    (Opcode::AddO, "ADD", OperandForm::ReadModifyWrite),
    (Opcode::AdcR, "ADC", OperandForm::Read),
    (Opcode::AdcO, "ADC", OperandForm::ReadModifyWrite),
    (Opcode::SubR, "SUB", OperandForm::Read),
    (Opcode::SubO, "SUB", OperandForm::ReadModifyWrite),
    (Opcode::SbcR, "SBC", OperandForm::Read),
    (Opcode::SbcO, "SBC", OperandForm::ReadModifyWrite),
    (Opcode::AndR, "AND", OperandForm::Read),
    (Opcode::AndO, "AND", OperandForm::ReadModifyWrite),
    (Opcode::OrR, "OR", OperandForm::Read),
    (Opcode::OrO, "OR", OperandForm::ReadModifyWrite),
    (Opcode::XorR, "XOR", OperandForm::Read),
    (Opcode::XorO, "XOR", OperandForm::ReadModifyWrite),
    (Opcode::Not, "NOT", OperandForm::Read),
    (Opcode::Neg, "NEG", OperandForm::Read),
    (Opcode::ShlR, "SHL", OperandForm::Read),
    (Opcode::ShlO, "SHL", OperandForm::ReadModifyWrite),
    (Opcode::ShrR, "SHR", OperandForm::Read),
    (Opcode::ShrO, "SHR", OperandForm::ReadModifyWrite),
    (Opcode::AsrR, "ASR", OperandForm::Read),
    (Opcode::AsrO, "ASR", OperandForm::ReadModifyWrite),
    (Opcode::Rol, "ROL", OperandForm::Read),
    (Opcode::Ror, "ROR", OperandForm::Read),
    (Opcode::MulR, "MUL", OperandForm::Read),
    (Opcode::MulO, "MUL", OperandForm::ReadModifyWrite),
    (Opcode::Mac, "MAC", OperandForm::Read),
    (Opcode::Muls, "MULS", OperandForm::Read),
    (Opcode::DivR, "DIV", OperandForm::Read),
    (Opcode::DivO, "DIV", OperandForm::ReadModifyWrite),
    (Opcode::Divs, "DIVS", OperandForm::Read),
    (Opcode::ModR, "MOD", OperandForm::Read),
    (Opcode::ModO, "MOD", OperandForm::ReadModifyWrite),
    (Opcode::Xeq, "XEQ", OperandForm::Read),
    (Opcode::Xne, "XNE", OperandForm::Read),
    (Opcode::Xug, "XUG", OperandForm::Read),
    (Opcode::Xsg, "XSG", OperandForm::Read),
    (Opcode::Xbs, "XBS", OperandForm::Read),
    (Opcode::Xbc, "XBC", OperandForm::Read),
    (Opcode::Xul, "XUL", OperandForm::Read),
    (Opcode::Xsl, "XSL", OperandForm::Read),
    (Opcode::Jmr, "JMR", OperandForm::Read),
    (Opcode::Jma, "JMA", OperandForm::Read),
    (Opcode::Jfr, "JFR", OperandForm::Read),
    (Opcode::Jfa, "JFA", OperandForm::Read),
    (Opcode::Rfn, "RFN", OperandForm::Read),
    (Opcode::Jsv, "JSV", OperandForm::Read),
    (Opcode::Jnz, "JNZ", OperandForm::Read),
    (Opcode::Djnz, "DJNZ", OperandForm::Read),
];

/// Dense 128-entry lookup indexed by the 7-bit opcode field.
pub const OPCODE_TABLE: [Option<Opcode>; 128] = build_opcode_table();

const fn build_opcode_table() -> [Option<Opcode>; 128] {
    let mut table = [None; 128];
    let mut index = 0;
    while index < OPCODE_ENCODING_TABLE.len() {
        let opcode = OPCODE_ENCODING_TABLE[index].0;
        assert!(table[opcode as usize].is_none(), "duplicate opcode");
        table[opcode as usize] = Some(opcode);
        index += 1;
    }
    table
}

impl Opcode {
    /// The 7-bit opcode value.
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Looks up a 7-bit opcode value.
    #[must_use]
    pub const fn from_u7(code: u8) -> Option<Self> {
        OPCODE_TABLE[(code & 0x7F) as usize]
    }

    const fn entry(self) -> (Self, &'static str, OperandForm) {
        let mut index = 0;
        while index < OPCODE_ENCODING_TABLE.len() {
            if OPCODE_ENCODING_TABLE[index].0 as u8 == self as u8 {
                return OPCODE_ENCODING_TABLE[index];
            }
            index += 1;
        }
        (self, "???", OperandForm::Read)
    }

    /// Assembly mnemonic.
    #[must_use]
    pub const fn mnemonic(self) -> &'static str {
        self.entry().1
    }

    /// How the instruction uses its operand.
    #[must_use]
    pub const fn operand_form(self) -> OperandForm {
        self.entry().2
    }

    /// Returns `true` for the conditional skip family.
    #[must_use]
    pub const fn is_skip(self) -> bool {
        matches!(self.code(), 0x28..=0x2F)
    }

    /// Returns `true` when the instruction stores into its operand.
    #[must_use]
    pub const fn writes_operand(self) -> bool {
        !matches!(self.operand_form(), OperandForm::Read)
    }
}

/// Splits an instruction word into `(opcode, register, mode)` fields.
#[must_use]
pub const fn split_instruction_word(word: u16) -> (u8, u8, u8) {
    ((word >> 9) as u8, ((word >> 6) & 0x7) as u8, (word & 0x3F) as u8)
}

/// Builds an instruction word from its fields.
#[must_use]
pub const fn encode_instruction(opcode: Opcode, reg: u8, mode: u8) -> u16 {
    ((opcode as u16) << 9) | (((reg & 0x7) as u16) << 6) | (mode & 0x3F) as u16
}
