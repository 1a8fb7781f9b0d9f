//! Block-transfer accelerator operating on peripheral memory.

use crate::fifo::{Coprocessor, CoprocessorContext};
use crate::peripherals::join_address;

/// Operation selector register.
pub const ACCEL_OP: usize = 0;
/// Source address, high half.
pub const ACCEL_SRC_HI: usize = 1;
/// Source address, low half.
pub const ACCEL_SRC_LO: usize = 2;
/// Destination address, high half.
pub const ACCEL_DST_HI: usize = 3;
/// Destination address, low half.
pub const ACCEL_DST_LO: usize = 4;
/// Words per row.
pub const ACCEL_WIDTH: usize = 5;
/// Number of rows; zero counts as one.
pub const ACCEL_ROWS: usize = 6;
/// Source row stride in words.
pub const ACCEL_SRC_STRIDE: usize = 7;
/// Destination row stride in words.
pub const ACCEL_DST_STRIDE: usize = 8;
/// Fill pattern, high half.
pub const ACCEL_PATTERN_HI: usize = 9;
/// Fill pattern, low half.
pub const ACCEL_PATTERN_LO: usize = 10;

/// Fixed setup cost of every operation.
pub const ACCEL_SETUP_CYCLES: u32 = 8;

/// Operation selected by [`ACCEL_OP`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlitOp {
    /// Copy source to destination.
    Copy,
    /// Store the fill pattern.
    Fill,
    /// OR source into destination.
    Or,
}

impl BlitOp {
    /// Decodes the operation register; unknown values are treated as no-ops.
    #[must_use]
    pub const fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(Self::Copy),
            1 => Some(Self::Fill),
            2 => Some(Self::Or),
            _ => None,
        }
    }
}

/// Rectangle copy/fill engine.
#[derive(Debug, Clone, Default)]
pub struct BlitAccelerator {
    pattern: u32,
}

impl Coprocessor for BlitAccelerator {
    fn execute(&mut self, ctx: CoprocessorContext<'_>) -> u32 {
        let regs = &*ctx.registers;
        if ctx.cache_dirty {
            self.pattern =
                (u32::from(regs[ACCEL_PATTERN_HI]) << 16) | u32::from(regs[ACCEL_PATTERN_LO]);
        }

        let Some(op) = BlitOp::from_u16(regs[ACCEL_OP]) else {
            return ACCEL_SETUP_CYCLES;
        };
        let width = usize::from(regs[ACCEL_WIDTH]);
        let rows = usize::from(regs[ACCEL_ROWS].max(1));
        let src = join_address(regs[ACCEL_SRC_HI], regs[ACCEL_SRC_LO]);
        let dst = join_address(regs[ACCEL_DST_HI], regs[ACCEL_DST_LO]);
        let src_stride = usize::from(regs[ACCEL_SRC_STRIDE]);
        let dst_stride = usize::from(regs[ACCEL_DST_STRIDE]);
        let mask = ctx.pram.len() - 1;

        for row in 0..rows {
            for col in 0..width {
                let from = (src + row * src_stride + col) & mask;
                let to = (dst + row * dst_stride + col) & mask;
                ctx.pram[to] = match op {
                    BlitOp::Copy => ctx.pram[from],
                    BlitOp::Fill => self.pattern,
                    BlitOp::Or => ctx.pram[to] | ctx.pram[from],
                };
            }
        }

        ACCEL_SETUP_CYCLES + u32::try_from(width * rows).unwrap_or(u32::MAX)
    }
}
