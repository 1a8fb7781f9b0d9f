//! Register bus: 1024 memory-mapped cells dispatched to range handlers.
//!
//! Handlers are installed once through [`BusBuilder`] and never change. Cells
//! without a handler read as zero and ignore writes.

use std::fmt;
use std::sync::Arc;

use crate::fifo::{LaneControl, LaneId, LaneRegisterView};
use crate::memory::BUS_CELLS;
use crate::timers::StatusRegisters;
use crate::Machine;

/// Display register block.
pub const DISPLAY_BASE: u16 = 0x000;
/// Read-only timer status block.
pub const STATUS_BASE: u16 = 0x010;
/// Audio DMA configuration block.
pub const AUDIO_BASE: u16 = 0x020;
/// Mixer lane control block.
pub const MIXER_FIFO_BASE: u16 = 0x030;
/// Mixer register file.
pub const MIXER_REGISTERS_BASE: u16 = 0x040;
/// Accelerator lane control block.
pub const ACCELERATOR_FIFO_BASE: u16 = 0x050;
/// Accelerator register file.
pub const ACCELERATOR_REGISTERS_BASE: u16 = 0x060;

/// Cells in the display register block.
pub const DISPLAY_CELLS: u16 = 16;
/// Cells in the status block.
pub const STATUS_CELLS: u16 = 8;
/// Cells in the audio configuration block.
pub const AUDIO_CELLS: u16 = 2;
/// Cells in a lane control block.
pub const LANE_CONTROL_CELLS: u16 = 16;

/// Behaviour of a range of bus cells.
///
/// `read` and `write` are the timed accesses made by the CPU; `get` and `set`
/// are side-effect free debug and state accesses. `addr` is the absolute cell.
pub trait RegisterHandler: Send + Sync {
    /// Timed read; `rmw` is set when the CPU will write the cell back.
    fn read(&self, m: &mut Machine, addr: u16, rmw: bool) -> u16 {
        let _ = rmw;
        self.get(m, addr)
    }

    /// Timed write.
    fn write(&self, m: &mut Machine, addr: u16, value: u16) {
        self.set(m, addr, value);
    }

    /// Debug read.
    fn get(&self, m: &Machine, addr: u16) -> u16;

    /// Debug write.
    fn set(&self, m: &mut Machine, addr: u16, value: u16);
}

/// Cells backed directly by the bus backing store.
#[derive(Debug, Clone, Copy, Default)]
pub struct StorageRegisters;

impl RegisterHandler for StorageRegisters {
    fn get(&self, m: &Machine, addr: u16) -> u16 {
        m.cells[usize::from(addr)]
    }

    fn set(&self, m: &mut Machine, addr: u16, value: u16) {
        m.cells[usize::from(addr)] = value;
    }
}

#[derive(Clone)]
struct Mapping {
    base: u16,
    len: u16,
    handler: Arc<dyn RegisterHandler>,
}

impl Mapping {
    const fn end(&self) -> u16 {
        self.base + self.len
    }
}

/// Builder registering handler ranges before the bus is used.
#[derive(Default)]
pub struct BusBuilder {
    mappings: Vec<Mapping>,
}

impl BusBuilder {
    /// Starts an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `handler` over `base..base + len`.
    ///
    /// The range is clipped to the bus. Cells already owned by an earlier
    /// registration keep their handler.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn register(
        mut self,
        base: u16,
        len: u16,
        handler: impl RegisterHandler + 'static,
    ) -> Self {
        let limit = BUS_CELLS as u32;
        let start = u32::from(base);
        let end = (start + u32::from(len)).min(limit);
        if start >= end {
            return self;
        }

        let handler: Arc<dyn RegisterHandler> = Arc::new(handler);
        let mut cursor = start;
        let mut pieces = Vec::new();
        for taken in &self.mappings {
            let (taken_start, taken_end) = (u32::from(taken.base), u32::from(taken.end()));
            if taken_end <= cursor || taken_start >= end {
                continue;
            }
            if taken_start > cursor {
                pieces.push((cursor, taken_start));
            }
            cursor = cursor.max(taken_end);
        }
        if cursor < end {
            pieces.push((cursor, end));
        }

        for (piece_start, piece_end) in pieces {
            self.mappings.push(Mapping {
                base: piece_start as u16,
                len: (piece_end - piece_start) as u16,
                handler: Arc::clone(&handler),
            });
        }
        self.mappings.sort_by_key(|mapping| mapping.base);
        self
    }

    /// Freezes the handler table.
    #[must_use]
    pub fn build(self) -> Bus {
        Bus {
            mappings: self.mappings,
        }
    }
}

/// Immutable handler table resolved by binary search.
#[derive(Clone)]
pub struct Bus {
    mappings: Vec<Mapping>,
}

impl fmt::Debug for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(
                self.mappings
                    .iter()
                    .map(|mapping| (mapping.base, mapping.end())),
            )
            .finish()
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::standard()
    }
}

impl Bus {
    /// Bus with the standard Kestrel-16 peripheral map.
    #[must_use]
    pub fn standard() -> Self {
        BusBuilder::new()
            .register(DISPLAY_BASE, DISPLAY_CELLS, StorageRegisters)
            .register(STATUS_BASE, STATUS_CELLS, StatusRegisters)
            .register(AUDIO_BASE, AUDIO_CELLS, StorageRegisters)
            .register(
                MIXER_FIFO_BASE,
                LANE_CONTROL_CELLS,
                LaneControl::new(LaneId::Mixer),
            )
            .register(
                MIXER_REGISTERS_BASE,
                LaneId::Mixer.register_count(),
                LaneRegisterView::new(LaneId::Mixer),
            )
            .register(
                ACCELERATOR_FIFO_BASE,
                LANE_CONTROL_CELLS,
                LaneControl::new(LaneId::Accelerator),
            )
            .register(
                ACCELERATOR_REGISTERS_BASE,
                LaneId::Accelerator.register_count(),
                LaneRegisterView::new(LaneId::Accelerator),
            )
            .build()
    }

    fn handler(&self, addr: u16) -> Option<&dyn RegisterHandler> {
        let index = self.mappings.partition_point(|mapping| mapping.base <= addr);
        let mapping = self.mappings.get(index.checked_sub(1)?)?;
        (addr < mapping.end()).then_some(mapping.handler.as_ref())
    }

    /// Returns `true` when a handler owns `addr`.
    #[must_use]
    pub fn is_mapped(&self, addr: u16) -> bool {
        self.handler(addr).is_some()
    }

    /// Timed read of cell `addr`.
    pub fn read(&self, m: &mut Machine, addr: u16, rmw: bool) -> u16 {
        self.handler(addr)
            .map_or(0, |handler| handler.read(m, addr, rmw))
    }

    /// Timed write of cell `addr`.
    pub fn write(&self, m: &mut Machine, addr: u16, value: u16) {
        if let Some(handler) = self.handler(addr) {
            handler.write(m, addr, value);
        }
    }

    /// Debug read of cell `addr`.
    #[must_use]
    pub fn get(&self, m: &Machine, addr: u16) -> u16 {
        self.handler(addr).map_or(0, |handler| handler.get(m, addr))
    }

    /// Debug write of cell `addr`.
    pub fn set(&self, m: &mut Machine, addr: u16, value: u16) {
        if let Some(handler) = self.handler(addr) {
            handler.set(m, addr, value);
        }
    }
}
