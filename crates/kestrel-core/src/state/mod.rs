//! CPU-visible state: register file, machine aggregate and run modes.

/// Machine aggregate and stack window.
pub mod machine;
/// CPU register file.
pub mod registers;
/// Run modes and breakpoints.
pub mod run_mode;

pub use machine::{Machine, StackWindow, HOUSEKEEPING_INTERVAL};
pub use registers::{
    Register, Registers, SpecialRegister, GENERAL_REGISTER_COUNT, POINTER_REGISTER_COUNT,
};
pub use run_mode::{Breakpoints, RunMode};
