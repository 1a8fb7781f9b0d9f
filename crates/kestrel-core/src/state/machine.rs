use std::fmt;

use log::trace;

use crate::fifo::{Fifo, LaneId, LaneState};
use crate::kernel::TaskTable;
use crate::memory::{new_pram, new_word_store, BUS_CELLS, CODE_WORDS, DATA_WORDS};
use crate::state::Registers;
use crate::timers::{AudioTimer, VideoTimer};
use crate::HaltCause;

/// Cycles of free running between kernel housekeeping surcharges.
pub const HOUSEKEEPING_INTERVAL: u32 = 0x1_0000;

/// Valid stack addresses, `bottom..top`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct StackWindow {
    /// Lowest valid stack address; also the outermost frame's `BP`.
    pub bottom: u16,
    /// First address past the stack.
    pub top: u16,
}

impl StackWindow {
    /// Returns `true` when `addr` is inside the window.
    #[must_use]
    pub const fn contains(self, addr: u16) -> bool {
        addr >= self.bottom && addr < self.top
    }
}

/// State an operand read can change, saved so a rejected instruction can undo it.
#[derive(Debug, Clone)]
pub(crate) struct ReadCheckpoint {
    regs: Registers,
    lanes: [LaneState; 2],
    halt: HaltCause,
}

/// Everything the CPU, bus handlers and kernel mutate while a program runs.
pub struct Machine {
    pub(crate) code: Box<[u16]>,
    pub(crate) data: Box<[u16]>,
    pub(crate) pram: Box<[u32]>,
    pub(crate) cells: Box<[u16]>,
    pub(crate) regs: Registers,
    pub(crate) stack: StackWindow,
    pub(crate) halt: HaltCause,
    pub(crate) stall: u32,
    pub(crate) housekeeping: u32,
    pub(crate) fifo: Fifo,
    pub(crate) tasks: TaskTable,
    pub(crate) video: VideoTimer,
    pub(crate) audio: AudioTimer,
}

impl fmt::Debug for Machine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Machine")
            .field("regs", &self.regs)
            .field("stack", &self.stack)
            .field("halt", &self.halt)
            .field("stall", &self.stall)
            .field("fifo", &self.fifo)
            .field("video", &self.video)
            .field("audio", &self.audio)
            .finish_non_exhaustive()
    }
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}

impl Machine {
    /// Zeroed machine with the reference coprocessors.
    #[must_use]
    pub fn new() -> Self {
        Self::with_fifo(Fifo::default())
    }

    /// Zeroed machine around the given coprocessor lanes.
    #[must_use]
    pub fn with_fifo(mut fifo: Fifo) -> Self {
        fifo.reset();
        Self {
            code: new_word_store(CODE_WORDS),
            data: new_word_store(DATA_WORDS),
            pram: new_pram(),
            cells: new_word_store(BUS_CELLS),
            regs: Registers::default(),
            stack: StackWindow::default(),
            halt: HaltCause::empty(),
            stall: 0,
            housekeeping: HOUSEKEEPING_INTERVAL,
            fifo,
            tasks: TaskTable::default(),
            video: VideoTimer::default(),
            audio: AudioTimer::default(),
        }
    }

    /// Zeroes every memory, counter and register, keeping the code store.
    pub(crate) fn clear_volatile(&mut self) {
        self.data.fill(0);
        self.pram.fill(0);
        self.cells.fill(0);
        self.regs = Registers::default();
        self.halt = HaltCause::empty();
        self.stall = 0;
        self.housekeeping = HOUSEKEEPING_INTERVAL;
        self.fifo.reset();
        self.tasks = TaskTable::default();
        self.video = VideoTimer::default();
        self.audio = AudioTimer::default();
    }

    /// CPU registers.
    #[must_use]
    pub const fn registers(&self) -> &Registers {
        &self.regs
    }

    /// Mutable CPU registers.
    pub const fn registers_mut(&mut self) -> &mut Registers {
        &mut self.regs
    }

    /// Code store.
    #[must_use]
    pub fn code(&self) -> &[u16] {
        &self.code
    }

    /// Mutable code store.
    pub fn code_mut(&mut self) -> &mut [u16] {
        &mut self.code
    }

    /// Data memory, bus window included as plain (unused) words.
    #[must_use]
    pub fn data(&self) -> &[u16] {
        &self.data
    }

    /// Mutable data memory.
    pub fn data_mut(&mut self) -> &mut [u16] {
        &mut self.data
    }

    /// Peripheral memory.
    #[must_use]
    pub fn pram(&self) -> &[u32] {
        &self.pram
    }

    /// Mutable peripheral memory.
    pub fn pram_mut(&mut self) -> &mut [u32] {
        &mut self.pram
    }

    /// Coprocessor lanes.
    #[must_use]
    pub const fn fifo(&self) -> &Fifo {
        &self.fifo
    }

    /// Kernel task slots.
    #[must_use]
    pub const fn tasks(&self) -> &TaskTable {
        &self.tasks
    }

    /// Current halt causes.
    #[must_use]
    pub const fn halt_cause(&self) -> HaltCause {
        self.halt
    }

    /// Adds `cause` to the halt mask.
    pub fn raise(&mut self, cause: HaltCause) {
        if !self.halt.contains(cause) {
            trace!("halt raised: {cause:?} at pc {:#06x}", self.regs.pc());
        }
        self.halt.raise(cause);
    }

    /// Configured stack window.
    #[must_use]
    pub const fn stack_window(&self) -> StackWindow {
        self.stack
    }

    /// Replaces the stack window.
    pub const fn set_stack_window(&mut self, window: StackWindow) {
        self.stack = window;
    }

    /// Pending bus stall cycles.
    #[must_use]
    pub const fn stall(&self) -> u32 {
        self.stall
    }

    /// Returns and clears the pending bus stall.
    pub const fn take_stall(&mut self) -> u32 {
        let stall = self.stall;
        self.stall = 0;
        stall
    }

    /// Saves pointer registers, lane flags and halt causes ahead of operand reads.
    pub(crate) fn checkpoint(&self) -> ReadCheckpoint {
        ReadCheckpoint {
            regs: self.regs.clone(),
            lanes: LaneId::ALL.map(|lane| *self.fifo.state(lane)),
            halt: self.halt,
        }
    }

    /// Undoes every operand read made since `checkpoint` was taken.
    pub(crate) fn rollback(&mut self, checkpoint: ReadCheckpoint) {
        self.regs = checkpoint.regs;
        for (lane, state) in LaneId::ALL.into_iter().zip(checkpoint.lanes) {
            *self.fifo.state_mut(lane) = state;
        }
        self.halt = checkpoint.halt;
    }

    /// Video timer.
    #[must_use]
    pub const fn video(&self) -> &VideoTimer {
        &self.video
    }

    /// Audio timer.
    #[must_use]
    pub const fn audio(&self) -> &AudioTimer {
        &self.audio
    }

    /// Reads a stack word, raising `STACK` and yielding 0 outside the window.
    pub fn stack_read(&mut self, addr: u16) -> u16 {
        if self.stack.contains(addr) {
            self.data[usize::from(addr)]
        } else {
            self.raise(HaltCause::STACK);
            0
        }
    }

    /// Writes a stack word, raising `STACK` and dropping the write outside the window.
    pub fn stack_write(&mut self, addr: u16, value: u16) {
        if self.stack.contains(addr) {
            self.data[usize::from(addr)] = value;
        } else {
            self.raise(HaltCause::STACK);
        }
    }
}
