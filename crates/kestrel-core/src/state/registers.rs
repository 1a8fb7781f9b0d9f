/// Number of general registers addressable by the 3-bit register field.
pub const GENERAL_REGISTER_COUNT: usize = 8;
/// Number of pointer registers (`X0..X3`).
pub const POINTER_REGISTER_COUNT: usize = 4;

/// General register selected by a 3-bit field, in encoding order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u8)]
#[allow(missing_docs)]
pub enum Register {
    A = 0,
    B = 1,
    /// Receives carry and extended results.
    C = 2,
    D = 3,
    X0 = 4,
    X1 = 5,
    X2 = 6,
    X3 = 7,
}

impl Register {
    /// All general registers in encoding order.
    pub const ALL: [Self; GENERAL_REGISTER_COUNT] = [
        Self::A,
        Self::B,
        Self::C,
        Self::D,
        Self::X0,
        Self::X1,
        Self::X2,
        Self::X3,
    ];

    /// Returns the register-file index (`0..=7`).
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Decodes the low three bits of `bits`.
    #[must_use]
    pub const fn from_u3(bits: u8) -> Self {
        Self::ALL[(bits & 0x7) as usize]
    }

    /// Returns the pointer register `Xn` for `n` in `0..4`.
    #[must_use]
    pub const fn pointer(n: u8) -> Self {
        Self::ALL[4 + (n & 0x3) as usize]
    }

    /// Assembly name of the register.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
            Self::X0 => "X0",
            Self::X1 => "X1",
            Self::X2 => "X2",
            Self::X3 => "X3",
        }
    }
}

/// Registers reachable only through the special-register addressing modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum SpecialRegister {
    /// Pointer sub-mode nibbles.
    Xm,
    /// Pointer fraction nibbles.
    Xh,
    /// Stack pointer.
    Sp,
    /// Frame base pointer.
    Bp,
}

impl SpecialRegister {
    /// Decodes the low two bits of `bits`.
    #[must_use]
    pub const fn from_u2(bits: u8) -> Self {
        match bits & 0x3 {
            0 => Self::Xm,
            1 => Self::Xh,
            2 => Self::Sp,
            _ => Self::Bp,
        }
    }

    /// Assembly name of the register.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Xm => "XM",
            Self::Xh => "XH",
            Self::Sp => "SP",
            Self::Bp => "BP",
        }
    }
}

/// CPU register file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Registers {
    gpr: [u16; GENERAL_REGISTER_COUNT],
    xm: u16,
    xh: u16,
    pc: u16,
    sp: u16,
    bp: u16,
}

impl Registers {
    /// Reads a general register.
    #[must_use]
    pub const fn get(&self, reg: Register) -> u16 {
        self.gpr[reg.index()]
    }

    /// Writes a general register.
    pub const fn set(&mut self, reg: Register, value: u16) {
        self.gpr[reg.index()] = value;
    }

    /// Reads a special register.
    #[must_use]
    pub const fn special(&self, reg: SpecialRegister) -> u16 {
        match reg {
            SpecialRegister::Xm => self.xm,
            SpecialRegister::Xh => self.xh,
            SpecialRegister::Sp => self.sp,
            SpecialRegister::Bp => self.bp,
        }
    }

    /// Writes a special register.
    pub const fn set_special(&mut self, reg: SpecialRegister, value: u16) {
        match reg {
            SpecialRegister::Xm => self.xm = value,
            SpecialRegister::Xh => self.xh = value,
            SpecialRegister::Sp => self.sp = value,
            SpecialRegister::Bp => self.bp = value,
        }
    }

    /// Reads `PC`.
    #[must_use]
    pub const fn pc(&self) -> u16 {
        self.pc
    }

    /// Writes `PC`.
    pub const fn set_pc(&mut self, value: u16) {
        self.pc = value;
    }

    /// Reads `SP`.
    #[must_use]
    pub const fn sp(&self) -> u16 {
        self.sp
    }

    /// Writes `SP`.
    pub const fn set_sp(&mut self, value: u16) {
        self.sp = value;
    }

    /// Reads `BP`.
    #[must_use]
    pub const fn bp(&self) -> u16 {
        self.bp
    }

    /// Writes `BP`.
    pub const fn set_bp(&mut self, value: u16) {
        self.bp = value;
    }

    /// Sub-mode nibble of pointer `n`, taken from `XM`.
    #[must_use]
    pub const fn pointer_mode(&self, n: u8) -> u8 {
        nibble(self.xm, n)
    }

    /// Fraction nibble of pointer `n`, taken from `XH`.
    #[must_use]
    pub const fn pointer_fraction(&self, n: u8) -> u8 {
        nibble(self.xh, n)
    }

    /// Replaces the fraction nibble of pointer `n`.
    pub const fn set_pointer_fraction(&mut self, n: u8, fraction: u8) {
        let shift = (n & 0x3) * 4;
        self.xh = (self.xh & !(0xF << shift)) | (((fraction & 0xF) as u16) << shift);
    }

    /// Encodes the file as 13 words: `A..X3`, `XM`, `XH`, `PC`, `SP`, `BP`.
    #[must_use]
    pub const fn to_words(&self) -> [u16; 13] {
        let g = &self.gpr;
        [
            g[0], g[1], g[2], g[3], g[4], g[5], g[6], g[7], self.xm, self.xh, self.pc, self.sp,
            self.bp,
        ]
    }

    /// Decodes the layout produced by [`Registers::to_words`].
    #[must_use]
    pub const fn from_words(words: &[u16; 13]) -> Self {
        Self {
            gpr: [
                words[0], words[1], words[2], words[3], words[4], words[5], words[6], words[7],
            ],
            xm: words[8],
            xh: words[9],
            pc: words[10],
            sp: words[11],
            bp: words[12],
        }
    }
}

const fn nibble(word: u16, n: u8) -> u8 {
    ((word >> ((n & 0x3) * 4)) & 0xF) as u8
}
