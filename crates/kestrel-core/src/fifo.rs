//! FIFO lanes that serialize bus writes into coprocessor register files.
//!
//! Each lane owns a ring of 32-bit words in peripheral memory. A word is an
//! address latch in the high half and a data value in the low half. While the
//! lane is idle, writes go straight to the register file; otherwise they are
//! queued and the CPU pays [`FIFO_STALL_CYCLES`] per write.

use std::fmt;

use log::{trace, warn};

use crate::bus::RegisterHandler;
use crate::memory::PRAM_MASK;
use crate::peripherals::{BlitAccelerator, SampleMixer};
use crate::Machine;

/// Bus stall charged for every write queued into a busy lane.
pub const FIFO_STALL_CYCLES: u32 = 2;

/// Control cell: ring base in peripheral memory (`value << 2`).
pub const LANE_RING_BASE: u16 = 0x0;
/// Control cell: ring size selector (`16 << (value & 7)` words).
pub const LANE_RING_SIZE: u16 = 0x1;
/// Control cell: status bits.
pub const LANE_STATUS: u16 = 0x2;
/// Control cell: number of queued words.
pub const LANE_QUEUED: u16 = 0x3;
/// Control cell: register address latch.
pub const LANE_LATCH: u16 = 0xE;
/// Control cell: data port; a write pushes one word.
pub const LANE_DATA: u16 = 0xF;

/// Status bit: the ring holds at least one word.
pub const STATUS_QUEUED: u16 = 1 << 0;
/// Status bit: the coprocessor is busy.
pub const STATUS_BUSY: u16 = 1 << 1;
/// Status bit: a word was dropped because the ring was full.
pub const STATUS_OVERFLOW: u16 = 1 << 2;

/// Opaque long-running peripheral triggered through a lane.
pub trait Coprocessor: Send {
    /// Runs one operation described by the register file and returns its cycle cost.
    ///
    /// Implementations may only touch `ctx.registers` and `ctx.pram`. Any cache
    /// derived from the register file must be rebuilt when `ctx.cache_dirty` is set.
    fn execute(&mut self, ctx: CoprocessorContext<'_>) -> u32;
}

/// Borrowed state handed to [`Coprocessor::execute`].
pub struct CoprocessorContext<'a> {
    /// The lane's register file.
    pub registers: &'a mut [u16],
    /// Shared peripheral memory.
    pub pram: &'a mut [u32],
    /// Register values changed since the previous execute.
    pub cache_dirty: bool,
}

/// Identifies one of the two lanes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum LaneId {
    /// Lane A, wrapping the audio mixer.
    Mixer,
    /// Lane B, wrapping the graphics accelerator.
    Accelerator,
}

impl LaneId {
    /// Both lanes in index order.
    pub const ALL: [Self; 2] = [Self::Mixer, Self::Accelerator];

    /// Lane index (`0` for A, `1` for B).
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Mixer => 0,
            Self::Accelerator => 1,
        }
    }

    /// First bus cell of the lane's control block.
    #[must_use]
    pub const fn control_base(self) -> u16 {
        match self {
            Self::Mixer => crate::bus::MIXER_FIFO_BASE,
            Self::Accelerator => crate::bus::ACCELERATOR_FIFO_BASE,
        }
    }

    /// First bus cell of the coprocessor register file.
    #[must_use]
    pub const fn registers_base(self) -> u16 {
        match self {
            Self::Mixer => crate::bus::MIXER_REGISTERS_BASE,
            Self::Accelerator => crate::bus::ACCELERATOR_REGISTERS_BASE,
        }
    }

    /// Number of coprocessor registers; always a power of two.
    #[must_use]
    pub const fn register_count(self) -> u16 {
        match self {
            Self::Mixer => 16,
            Self::Accelerator => 32,
        }
    }

    /// Register whose write starts the coprocessor.
    #[must_use]
    pub const fn trigger(self) -> u16 {
        self.register_count() - 1
    }
}

/// Serializable lane counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct LaneState {
    /// Ring index of the oldest queued word.
    pub head: u16,
    /// Number of queued words.
    pub count: u16,
    /// Cycles until the coprocessor finishes its current operation.
    pub busy: u32,
    /// A word was dropped since the status was last read.
    pub overflow: bool,
    /// Register file changed since the last execute.
    pub dirty: bool,
}

impl LaneState {
    /// Returns `true` when a write may bypass the ring.
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        self.count == 0 && self.busy == 0
    }
}

pub(crate) struct Lane {
    pub(crate) state: LaneState,
    coprocessor: Box<dyn Coprocessor>,
}

/// Both lanes together with their coprocessors.
pub struct Fifo {
    lanes: [Lane; 2],
}

impl fmt::Debug for Fifo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fifo")
            .field("mixer", &self.lanes[0].state)
            .field("accelerator", &self.lanes[1].state)
            .finish()
    }
}

impl Default for Fifo {
    fn default() -> Self {
        Self::new(Box::new(SampleMixer::default()), Box::new(BlitAccelerator::default()))
    }
}

impl Fifo {
    /// Builds the lanes around the given mixer and accelerator.
    #[must_use]
    pub fn new(mixer: Box<dyn Coprocessor>, accelerator: Box<dyn Coprocessor>) -> Self {
        Self {
            lanes: [
                Lane {
                    state: LaneState::default(),
                    coprocessor: mixer,
                },
                Lane {
                    state: LaneState::default(),
                    coprocessor: accelerator,
                },
            ],
        }
    }

    /// Counters of one lane.
    #[must_use]
    pub const fn state(&self, lane: LaneId) -> &LaneState {
        &self.lanes[lane.index()].state
    }

    pub(crate) const fn state_mut(&mut self, lane: LaneId) -> &mut LaneState {
        &mut self.lanes[lane.index()].state
    }

    /// Clears every counter and marks both caches dirty.
    pub(crate) fn reset(&mut self) {
        for lane in &mut self.lanes {
            lane.state = LaneState {
                dirty: true,
                ..LaneState::default()
            };
        }
    }
}

/// Ring capacity in words for a size cell value.
#[must_use]
pub const fn capacity_for_size(size: u16) -> u16 {
    16 << (size & 0x7)
}

/// Ring capacity in words selected by the lane's size cell.
#[must_use]
pub fn ring_capacity(m: &Machine, lane: LaneId) -> u16 {
    capacity_for_size(m.cells[usize::from(lane.control_base() + LANE_RING_SIZE)])
}

fn ring_slot(m: &Machine, lane: LaneId, index: u16) -> usize {
    let base = usize::from(m.cells[usize::from(lane.control_base() + LANE_RING_BASE)]) << 2;
    let capacity = ring_capacity(m, lane);
    (base + usize::from(index % capacity)) & PRAM_MASK
}

/// Status cell value of `lane`.
#[must_use]
pub const fn lane_status(m: &Machine, lane: LaneId) -> u16 {
    let state = m.fifo.state(lane);
    let mut status = 0;
    if state.count > 0 {
        status |= STATUS_QUEUED;
    }
    if state.busy > 0 {
        status |= STATUS_BUSY;
    }
    if state.overflow {
        status |= STATUS_OVERFLOW;
    }
    status
}

/// Pushes one latched word into `lane`, bypassing the ring when idle.
pub fn push(m: &mut Machine, lane: LaneId, word: u32) {
    if m.fifo.state(lane).is_idle() {
        apply(m, lane, word);
        return;
    }

    m.stall += FIFO_STALL_CYCLES;
    let capacity = ring_capacity(m, lane);
    let state = *m.fifo.state(lane);
    if state.count >= capacity {
        warn!("{lane:?} fifo overflow, dropping {word:#010x}");
        m.fifo.state_mut(lane).overflow = true;
        return;
    }

    let slot = ring_slot(m, lane, state.head.wrapping_add(state.count));
    m.pram[slot] = word;
    m.fifo.state_mut(lane).count += 1;
    trace!("{lane:?} fifo queued {word:#010x}, depth {}", state.count + 1);
}

/// Writes one word into the register file, executing on the trigger register.
pub fn apply(m: &mut Machine, lane: LaneId, word: u32) {
    let index = (word >> 16) as u16 & (lane.register_count() - 1);
    let value = (word & 0xFFFF) as u16;
    let cell = usize::from(lane.registers_base() + index);

    if index == lane.trigger() {
        m.cells[cell] = value;
        execute(m, lane);
    } else if m.cells[cell] != value {
        m.cells[cell] = value;
        m.fifo.state_mut(lane).dirty = true;
    }
}

fn execute(m: &mut Machine, lane: LaneId) {
    let Machine {
        cells, pram, fifo, ..
    } = m;
    let base = usize::from(lane.registers_base());
    let slot = &mut fifo.lanes[lane.index()];
    let ctx = CoprocessorContext {
        registers: &mut cells[base..base + usize::from(lane.register_count())],
        pram,
        cache_dirty: slot.state.dirty,
    };
    let cycles = slot.coprocessor.execute(ctx);
    slot.state.dirty = false;
    slot.state.busy = cycles;
    trace!("{lane:?} executed, busy for {cycles} cycles");
}

/// Advances `lane` by `cycles`, popping queued words as the coprocessor frees up.
///
/// Cycles left over once the lane is idle are discarded.
pub fn drain(m: &mut Machine, lane: LaneId, cycles: u32) {
    let mut available = cycles;
    loop {
        let state = m.fifo.state_mut(lane);
        if state.busy > available {
            state.busy -= available;
            return;
        }
        available -= state.busy;
        state.busy = 0;
        if state.count == 0 {
            return;
        }

        let head = state.head;
        let slot = ring_slot(m, lane, head);
        let word = m.pram[slot];
        let capacity = ring_capacity(m, lane);
        let state = m.fifo.state_mut(lane);
        state.head = (head + 1) % capacity;
        state.count -= 1;
        apply(m, lane, word);
    }
}

/// Bus handler for a lane's control block.
#[derive(Debug, Clone, Copy)]
pub struct LaneControl {
    lane: LaneId,
}

impl LaneControl {
    /// Handler for `lane`.
    #[must_use]
    pub const fn new(lane: LaneId) -> Self {
        Self { lane }
    }

    const fn offset(self, addr: u16) -> u16 {
        addr - self.lane.control_base()
    }
}

impl RegisterHandler for LaneControl {
    fn read(&self, m: &mut Machine, addr: u16, rmw: bool) -> u16 {
        let value = self.get(m, addr);
        if self.offset(addr) == LANE_STATUS && !rmw {
            m.fifo.state_mut(self.lane).overflow = false;
        }
        value
    }

    fn write(&self, m: &mut Machine, addr: u16, value: u16) {
        if self.offset(addr) == LANE_DATA {
            let latch = m.cells[usize::from(self.lane.control_base() + LANE_LATCH)];
            push(m, self.lane, (u32::from(latch) << 16) | u32::from(value));
        } else {
            self.set(m, addr, value);
        }
    }

    fn get(&self, m: &Machine, addr: u16) -> u16 {
        match self.offset(addr) {
            LANE_RING_BASE | LANE_RING_SIZE | LANE_LATCH => m.cells[usize::from(addr)],
            LANE_STATUS => lane_status(m, self.lane),
            LANE_QUEUED => m.fifo.state(self.lane).count,
            _ => 0,
        }
    }

    fn set(&self, m: &mut Machine, addr: u16, value: u16) {
        if matches!(
            self.offset(addr),
            LANE_RING_BASE | LANE_RING_SIZE | LANE_LATCH
        ) {
            m.cells[usize::from(addr)] = value;
        }
    }
}

/// Read-only bus view of a coprocessor register file.
///
/// Debug `set` access writes through and marks the cache dirty.
#[derive(Debug, Clone, Copy)]
pub struct LaneRegisterView {
    lane: LaneId,
}

impl LaneRegisterView {
    /// View for `lane`.
    #[must_use]
    pub const fn new(lane: LaneId) -> Self {
        Self { lane }
    }
}

impl RegisterHandler for LaneRegisterView {
    fn write(&self, _m: &mut Machine, _addr: u16, _value: u16) {}

    fn get(&self, m: &Machine, addr: u16) -> u16 {
        m.cells[usize::from(addr)]
    }

    fn set(&self, m: &mut Machine, addr: u16, value: u16) {
        m.cells[usize::from(addr)] = value;
        m.fifo.state_mut(self.lane).dirty = true;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::{
        drain, lane_status, push, ring_capacity, Coprocessor, CoprocessorContext, Fifo, LaneId,
        LANE_RING_SIZE, STATUS_BUSY, STATUS_OVERFLOW, STATUS_QUEUED,
    };
    use crate::Machine;

    struct Recorder {
        cycles: u32,
        seen: Arc<Mutex<Vec<(Vec<u16>, bool)>>>,
    }

    impl Coprocessor for Recorder {
        fn execute(&mut self, ctx: CoprocessorContext<'_>) -> u32 {
            if let Ok(mut seen) = self.seen.lock() {
                seen.push((ctx.registers.to_vec(), ctx.cache_dirty));
            }
            self.cycles
        }
    }

    fn machine(cycles: u32) -> (Machine, Arc<Mutex<Vec<(Vec<u16>, bool)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let accelerator = Recorder {
            cycles,
            seen: Arc::clone(&seen),
        };
        let mixer = Recorder {
            cycles,
            seen: Arc::new(Mutex::new(Vec::new())),
        };
        let machine = Machine::with_fifo(Fifo::new(Box::new(mixer), Box::new(accelerator)));
        (machine, seen)
    }

    const TRIGGER: u32 = 31 << 16;

    #[test]
    fn idle_writes_bypass_and_install_busy() {
        let (mut m, seen) = machine(40);
        push(&mut m, LaneId::Accelerator, (3 << 16) | 0x1234);
        push(&mut m, LaneId::Accelerator, TRIGGER | 1);

        assert_eq!(m.fifo.state(LaneId::Accelerator).busy, 40);
        assert_eq!(m.stall, 0);
        let seen = seen.lock().map(|seen| seen.clone()).unwrap_or_default();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0[3], 0x1234);
        assert!(seen[0].1);
    }

    #[test]
    fn busy_lane_queues_with_stall_and_drains_in_order() {
        let (mut m, seen) = machine(10);
        push(&mut m, LaneId::Accelerator, TRIGGER | 1);
        push(&mut m, LaneId::Accelerator, (2 << 16) | 7);
        push(&mut m, LaneId::Accelerator, TRIGGER | 2);

        assert_eq!(m.stall, 4);
        assert_eq!(m.fifo.state(LaneId::Accelerator).count, 2);
        assert_eq!(
            lane_status(&m, LaneId::Accelerator),
            STATUS_QUEUED | STATUS_BUSY
        );

        drain(&mut m, LaneId::Accelerator, 6);
        assert_eq!(m.fifo.state(LaneId::Accelerator).busy, 4);
        assert_eq!(m.fifo.state(LaneId::Accelerator).count, 2);

        drain(&mut m, LaneId::Accelerator, 4);
        assert_eq!(m.fifo.state(LaneId::Accelerator).count, 0);
        assert_eq!(m.fifo.state(LaneId::Accelerator).busy, 10);
        let seen = seen.lock().map(|seen| seen.clone()).unwrap_or_default();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].0[2], 7);
        assert_eq!(seen[1].0[31], 2);
    }

    #[test]
    fn leftover_cycles_are_not_carried() {
        let (mut m, _) = machine(5);
        push(&mut m, LaneId::Mixer, (15 << 16) | 1);
        drain(&mut m, LaneId::Mixer, 100);
        assert!(m.fifo.state(LaneId::Mixer).is_idle());

        push(&mut m, LaneId::Mixer, (15 << 16) | 1);
        drain(&mut m, LaneId::Mixer, 3);
        assert_eq!(m.fifo.state(LaneId::Mixer).busy, 2);
    }

    #[test]
    fn full_ring_sets_overflow_and_drops() {
        let (mut m, _) = machine(1000);
        assert_eq!(ring_capacity(&m, LaneId::Mixer), 16);
        push(&mut m, LaneId::Mixer, (15 << 16) | 1);
        for value in 0..17 {
            push(&mut m, LaneId::Mixer, value);
        }
        assert_eq!(m.fifo.state(LaneId::Mixer).count, 16);
        assert_ne!(lane_status(&m, LaneId::Mixer) & STATUS_OVERFLOW, 0);
    }

    #[test]
    fn size_selector_scales_capacity() {
        let (mut m, _) = machine(1);
        m.cells[usize::from(LaneId::Mixer.control_base() + LANE_RING_SIZE)] = 3;
        assert_eq!(ring_capacity(&m, LaneId::Mixer), 128);
    }
}
