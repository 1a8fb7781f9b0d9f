//! Audio and video timers driven by the run loop's cycle count.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::bus::{RegisterHandler, AUDIO_BASE, STATUS_BASE};
use crate::memory::PRAM_MASK;
use crate::Machine;

/// CPU cycles per display line.
pub const CYCLES_PER_LINE: u32 = 400;
/// Lines per frame, blanking included.
pub const LINES_PER_FRAME: u16 = 500;
/// Lines handed to the renderer each frame.
pub const VISIBLE_LINES: u16 = 400;
/// CPU cycles per audio sample.
pub const CYCLES_PER_SAMPLE: u32 = 250;
/// Samples per audio block; completing one raises `AUDIO`.
pub const SAMPLES_PER_AUDIO_TICK: u16 = 512;

/// Fixed part of the housekeeping surcharge.
pub const HOUSEKEEPING_BASE: u32 = 192;
/// Range of the random part of the housekeeping surcharge.
pub const HOUSEKEEPING_SPREAD: u32 = 256;

/// Status cell: current line.
pub const STATUS_LINE: u16 = 0;
/// Status cell: frame counter, high half.
pub const STATUS_FRAME_HI: u16 = 1;
/// Status cell: frame counter, low half.
pub const STATUS_FRAME_LO: u16 = 2;
/// Status cell: samples produced in the current audio block.
pub const STATUS_AUDIO_FILL: u16 = 3;
/// Status cell: completed audio blocks.
pub const STATUS_AUDIO_BLOCKS: u16 = 4;

/// Audio config cell: ring base in peripheral memory (`value << 8`).
pub const AUDIO_RING_BASE: u16 = 0;
/// Audio config cell: ring length selector (`512 << (value & 3)` samples).
pub const AUDIO_RING_SIZE: u16 = 1;

static HOUSEKEEPING_LFSR: AtomicU32 = AtomicU32::new(0xACE1);

const fn lfsr_step(state: u32) -> u32 {
    let state = if state == 0 { 0xACE1 } else { state };
    let bit = (state ^ (state >> 2) ^ (state >> 3) ^ (state >> 5)) & 1;
    ((state >> 1) | (bit << 15)) & 0xFFFF
}

/// Next surcharge from the process-wide housekeeping generator.
///
/// The generator is shared by every instance and is not part of exported state.
#[must_use]
pub fn housekeeping_surcharge() -> u32 {
    let previous = HOUSEKEEPING_LFSR
        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |state| {
            Some(lfsr_step(state))
        })
        .unwrap_or(0xACE1);
    HOUSEKEEPING_BASE + lfsr_step(previous) % HOUSEKEEPING_SPREAD
}

/// A display line finished during [`VideoTimer::next_line`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineEvent {
    /// Index of the line that ended.
    pub line: u16,
    /// The line was the last of its frame.
    pub frame_end: bool,
}

/// Line and frame position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct VideoTimer {
    /// Cycles into the current line.
    pub line_cycles: u32,
    /// Current line.
    pub line: u16,
    /// Completed frames.
    pub frame: u32,
    /// Lines are rendered and reported to the host.
    pub rendering: bool,
}

impl VideoTimer {
    /// Cycles left before the current line ends; never zero.
    #[must_use]
    pub const fn remaining_in_line(&self) -> u32 {
        let remaining = CYCLES_PER_LINE.saturating_sub(self.line_cycles);
        if remaining == 0 {
            1
        } else {
            remaining
        }
    }

    /// Adds elapsed cycles.
    pub const fn advance(&mut self, cycles: u32) {
        self.line_cycles += cycles;
    }

    /// Pops one completed line, if enough cycles have elapsed.
    pub const fn next_line(&mut self) -> Option<LineEvent> {
        if self.line_cycles < CYCLES_PER_LINE {
            return None;
        }
        self.line_cycles -= CYCLES_PER_LINE;
        let line = self.line;
        self.line += 1;
        let frame_end = self.line >= LINES_PER_FRAME;
        if frame_end {
            self.line = 0;
            self.frame = self.frame.wrapping_add(1);
        }
        Some(LineEvent { line, frame_end })
    }
}

/// One block of stereo samples taken from the audio ring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioBlock {
    /// `[left, right]` pairs in playback order.
    pub samples: Vec<[i16; 2]>,
}

/// Audio DMA position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct AudioTimer {
    /// Cycles into the current sample.
    pub sample_cycles: u32,
    /// Samples consumed since reset; indexes the ring modulo its length.
    pub cursor: u32,
    /// Samples produced in the current block.
    pub fill: u16,
    /// Completed blocks.
    pub blocks: u16,
}

impl AudioTimer {
    /// Adds elapsed cycles; returns `true` when a block completed.
    pub const fn advance(&mut self, cycles: u32) -> bool {
        self.sample_cycles += cycles;
        let mut completed = false;
        while self.sample_cycles >= CYCLES_PER_SAMPLE {
            self.sample_cycles -= CYCLES_PER_SAMPLE;
            self.cursor = self.cursor.wrapping_add(1);
            self.fill += 1;
            if self.fill == SAMPLES_PER_AUDIO_TICK {
                self.fill = 0;
                self.blocks = self.blocks.wrapping_add(1);
                completed = true;
            }
        }
        completed
    }

    /// Reads the most recent block from the ring configured on the bus.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub fn latest_block(&self, m: &Machine) -> AudioBlock {
        let config = usize::from(AUDIO_BASE);
        let base = usize::from(m.cells[config + usize::from(AUDIO_RING_BASE)]) << 8;
        let ring = 512u32 << (m.cells[config + usize::from(AUDIO_RING_SIZE)] & 0x3);
        let block = u32::from(SAMPLES_PER_AUDIO_TICK);
        let start = self.cursor.wrapping_sub(u32::from(self.fill) + block);
        let samples = (0..block)
            .map(|index| {
                let slot = start.wrapping_add(index) % ring;
                let word = m.pram[(base + slot as usize) & PRAM_MASK];
                [(word >> 16) as u16 as i16, word as u16 as i16]
            })
            .collect();
        AudioBlock { samples }
    }
}

/// Read-only bus view of the timers.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusRegisters;

impl RegisterHandler for StatusRegisters {
    fn get(&self, m: &Machine, addr: u16) -> u16 {
        match addr - STATUS_BASE {
            STATUS_LINE => m.video.line,
            STATUS_FRAME_HI => (m.video.frame >> 16) as u16,
            STATUS_FRAME_LO => (m.video.frame & 0xFFFF) as u16,
            STATUS_AUDIO_FILL => m.audio.fill,
            STATUS_AUDIO_BLOCKS => m.audio.blocks,
            _ => 0,
        }
    }

    fn set(&self, _m: &mut Machine, _addr: u16, _value: u16) {}
}
