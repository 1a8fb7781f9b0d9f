//! Memory model primitives: the fixed address map and data-window checks.

/// Data-window range and name validation used by kernel calls.
pub mod access;
/// Fixed memory sizes and data address decoding.
pub mod map;

pub use access::{
    read_name, read_name_prefix, validate_name, validate_range, AccessError, NAME_MAX_WORDS,
};
pub use map::{
    decode_data_address, DataTarget, BUS_CELLS, BUS_WINDOW_START, CODE_WORDS, DATA_WINDOW_END,
    DATA_WORDS, PRAM_MASK, PRAM_WORDS,
};

/// Allocates a zeroed word store of `len` cells.
#[must_use]
pub fn new_word_store(len: usize) -> Box<[u16]> {
    vec![0; len].into_boxed_slice()
}

/// Allocates zeroed peripheral memory.
#[must_use]
pub fn new_pram() -> Box<[u32]> {
    vec![0; PRAM_WORDS].into_boxed_slice()
}
