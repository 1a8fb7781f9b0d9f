//! Fixed memory sizes and the data address decoder.

/// Number of 16-bit words in the code store; `PC` indexes it directly.
pub const CODE_WORDS: usize = 0x1_0000;
/// Number of 16-bit words in data memory.
pub const DATA_WORDS: usize = 0x1_0000;
/// Exclusive end of the data window visible to kernel task pointers.
pub const DATA_WINDOW_END: u16 = 0xFC00;
/// First data address routed to the register bus.
pub const BUS_WINDOW_START: u16 = DATA_WINDOW_END;
/// Number of addressable register bus cells.
pub const BUS_CELLS: usize = 1024;
/// Number of 32-bit words of peripheral memory.
pub const PRAM_WORDS: usize = 1 << 18;
/// Mask applied to every peripheral memory word index.
pub const PRAM_MASK: usize = PRAM_WORDS - 1;

/// Where a CPU data access lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataTarget {
    /// Plain data memory word.
    Memory(u16),
    /// Register bus cell (`0..1024`).
    Bus(u16),
}

/// Decodes a 16-bit data address into memory or bus space.
#[must_use]
pub const fn decode_data_address(addr: u16) -> DataTarget {
    if addr >= BUS_WINDOW_START {
        DataTarget::Bus(addr - BUS_WINDOW_START)
    } else {
        DataTarget::Memory(addr)
    }
}

const _: () = assert_memory_layout();

const fn assert_memory_layout() {
    assert!(
        (0x1_0000 - BUS_WINDOW_START as usize) == BUS_CELLS,
        "bus window must cover exactly the bus cells"
    );
    assert!(PRAM_WORDS.is_power_of_two(), "pram size must be a power of two");
    assert!(CODE_WORDS == u16::MAX as usize + 1, "code store must cover pc");
}
