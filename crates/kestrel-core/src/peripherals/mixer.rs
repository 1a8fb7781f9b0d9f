//! Stereo sample mixer.
//!
//! Samples are peripheral memory words holding the left channel in the high
//! half and the right channel in the low half, both signed.

#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss
)]

use crate::fifo::{Coprocessor, CoprocessorContext};
use crate::peripherals::join_address;

/// Source address, high half.
pub const MIX_SRC_HI: usize = 0;
/// Source address, low half.
pub const MIX_SRC_LO: usize = 1;
/// Destination address, high half.
pub const MIX_DST_HI: usize = 2;
/// Destination address, low half.
pub const MIX_DST_LO: usize = 3;
/// Number of samples.
pub const MIX_COUNT: usize = 4;
/// Left volume in 8.8 fixed point.
pub const MIX_VOLUME_LEFT: usize = 5;
/// Right volume in 8.8 fixed point.
pub const MIX_VOLUME_RIGHT: usize = 6;
/// Mode bits; bit 0 selects additive mixing.
pub const MIX_MODE: usize = 7;

/// Additive mode bit in [`MIX_MODE`].
pub const MIX_MODE_ADD: u16 = 1;
/// Fixed setup cost of every operation.
pub const MIX_SETUP_CYCLES: u32 = 4;
/// Cost per mixed sample.
pub const MIX_CYCLES_PER_SAMPLE: u32 = 2;

/// Volume-scaling sample mixer.
#[derive(Debug, Clone, Copy, Default)]
pub struct SampleMixer;

fn scale(sample: u16, volume: u16) -> i32 {
    (i32::from(sample as i16) * i32::from(volume)) >> 8
}

fn clamp(value: i32) -> u16 {
    value.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16 as u16
}

impl Coprocessor for SampleMixer {
    fn execute(&mut self, ctx: CoprocessorContext<'_>) -> u32 {
        let regs = &*ctx.registers;
        let src = join_address(regs[MIX_SRC_HI], regs[MIX_SRC_LO]);
        let dst = join_address(regs[MIX_DST_HI], regs[MIX_DST_LO]);
        let count = usize::from(regs[MIX_COUNT]);
        let additive = regs[MIX_MODE] & MIX_MODE_ADD != 0;
        let mask = ctx.pram.len() - 1;

        for index in 0..count {
            let word = ctx.pram[(src + index) & mask];
            let mut left = scale((word >> 16) as u16, regs[MIX_VOLUME_LEFT]);
            let mut right = scale(word as u16, regs[MIX_VOLUME_RIGHT]);
            let to = (dst + index) & mask;
            if additive {
                let current = ctx.pram[to];
                left += i32::from((current >> 16) as u16 as i16);
                right += i32::from(current as u16 as i16);
            }
            ctx.pram[to] = (u32::from(clamp(left)) << 16) | u32::from(clamp(right));
        }

        MIX_SETUP_CYCLES + MIX_CYCLES_PER_SAMPLE * u32::from(regs[MIX_COUNT])
    }
}

#[cfg(test)]
mod tests {
    use super::{
        SampleMixer, MIX_COUNT, MIX_DST_LO, MIX_MODE, MIX_MODE_ADD, MIX_VOLUME_LEFT,
        MIX_VOLUME_RIGHT,
    };
    use crate::fifo::{Coprocessor, CoprocessorContext};

    fn stereo(left: i16, right: i16) -> u32 {
        (u32::from(left as u16) << 16) | u32::from(right as u16)
    }

    #[test]
    fn overwrite_scales_each_channel() {
        let mut regs = [0u16; 16];
        let mut pram = vec![0u32; 64];
        pram[0] = stereo(1000, -1000);
        regs[MIX_DST_LO] = 32;
        regs[MIX_COUNT] = 1;
        regs[MIX_VOLUME_LEFT] = 0x0080;
        regs[MIX_VOLUME_RIGHT] = 0x0100;

        let cycles = SampleMixer.execute(CoprocessorContext {
            registers: &mut regs,
            pram: &mut pram,
            cache_dirty: false,
        });
        assert_eq!(cycles, 6);
        assert_eq!(pram[32], stereo(500, -1000));
    }

    #[test]
    fn additive_mode_saturates() {
        let mut regs = [0u16; 16];
        let mut pram = vec![0u32; 64];
        pram[0] = stereo(30_000, -30_000);
        pram[32] = stereo(10_000, -10_000);
        regs[MIX_DST_LO] = 32;
        regs[MIX_COUNT] = 1;
        regs[MIX_VOLUME_LEFT] = 0x0100;
        regs[MIX_VOLUME_RIGHT] = 0x0100;
        regs[MIX_MODE] = MIX_MODE_ADD;

        SampleMixer.execute(CoprocessorContext {
            registers: &mut regs,
            pram: &mut pram,
            cache_dirty: true,
        });
        assert_eq!(pram[32], stereo(i16::MAX, i16::MIN));
    }
}
