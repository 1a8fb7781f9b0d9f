//! Display registers and the line renderer contract.

use crate::peripherals::join_address;

/// Pixels produced per rendered line.
pub const LINE_PIXELS: usize = 640;
/// Display register: control; bit 0 enables output.
pub const DISPLAY_CONTROL: usize = 0;
/// Display register: frame base address, high half.
pub const DISPLAY_BASE_HI: usize = 1;
/// Display register: frame base address, low half.
pub const DISPLAY_BASE_LO: usize = 2;
/// Display register: words between consecutive lines.
pub const DISPLAY_STRIDE: usize = 3;
/// Control bit enabling output.
pub const DISPLAY_ENABLE: u16 = 1;

/// Produces one line of 8-bit pixels from display registers and peripheral memory.
pub trait LineRenderer: Send {
    /// Renders `line` into `pixels`.
    fn render(
        &mut self,
        line: u16,
        registers: &[u16],
        pram: &[u32],
        pixels: &mut [u8; LINE_PIXELS],
    );
}

/// Renderer for frames stored as four 8-bit pixels per word, leftmost in the high byte.
#[derive(Debug, Clone, Copy, Default)]
pub struct PackedLineRenderer;

impl LineRenderer for PackedLineRenderer {
    fn render(
        &mut self,
        line: u16,
        registers: &[u16],
        pram: &[u32],
        pixels: &mut [u8; LINE_PIXELS],
    ) {
        if registers[DISPLAY_CONTROL] & DISPLAY_ENABLE == 0 {
            pixels.fill(0);
            return;
        }
        let base = join_address(registers[DISPLAY_BASE_HI], registers[DISPLAY_BASE_LO]);
        let start = base + usize::from(line) * usize::from(registers[DISPLAY_STRIDE]);
        let mask = pram.len() - 1;
        for (index, chunk) in pixels.chunks_exact_mut(4).enumerate() {
            chunk.copy_from_slice(&pram[(start + index) & mask].to_be_bytes());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        LineRenderer, PackedLineRenderer, DISPLAY_BASE_LO, DISPLAY_CONTROL, DISPLAY_STRIDE,
        LINE_PIXELS,
    };

    #[test]
    fn disabled_display_renders_black() {
        let regs = [0u16; 16];
        let pram = vec![0xFFFF_FFFFu32; 1024];
        let mut pixels = [7u8; LINE_PIXELS];
        PackedLineRenderer.render(0, &regs, &pram, &mut pixels);
        assert!(pixels.iter().all(|pixel| *pixel == 0));
    }

    #[test]
    fn lines_are_offset_by_stride() {
        let mut regs = [0u16; 16];
        regs[DISPLAY_CONTROL] = 1;
        regs[DISPLAY_BASE_LO] = 0x100;
        regs[DISPLAY_STRIDE] = 160;
        let mut pram = vec![0u32; 4096];
        pram[0x100 + 160 * 2] = 0x0102_0304;

        let mut pixels = [0u8; LINE_PIXELS];
        PackedLineRenderer.render(2, &regs, &pram, &mut pixels);
        assert_eq!(&pixels[..4], &[1, 2, 3, 4]);
        assert_eq!(pixels[4], 0);
    }
}
