//! Cycle-accurate emulation core for the Kestrel-16 virtual computer.

/// Memory sizes, the data/bus address split and data-window validation.
pub mod memory;
pub use memory::{
    decode_data_address, validate_range, AccessError, DataTarget, BUS_CELLS, CODE_WORDS,
    DATA_WINDOW_END, DATA_WORDS, PRAM_WORDS,
};

/// Halt-cause bitmask.
pub mod halt;
pub use halt::HaltCause;

/// Register file, machine aggregate and run modes.
pub mod state;
pub use state::{Breakpoints, Machine, Register, Registers, RunMode, SpecialRegister, StackWindow};

/// Register bus with range-mapped handlers.
pub mod bus;
pub use bus::{Bus, BusBuilder, RegisterHandler, StorageRegisters};

/// FIFO lanes feeding the coprocessors.
pub mod fifo;
pub use fifo::{Coprocessor, CoprocessorContext, LaneId, LaneState, FIFO_STALL_CYCLES};

/// Reference coprocessors and the line renderer.
pub mod peripherals;
pub use peripherals::{BlitAccelerator, LineRenderer, PackedLineRenderer, SampleMixer, LINE_PIXELS};

/// Video and audio timers plus the housekeeping generator.
pub mod timers;
pub use timers::{AudioBlock, AudioTimer, VideoTimer};

/// Opcode table and instruction word layout.
pub mod encoding;
pub use encoding::{encode_instruction, Opcode, OperandForm, OPCODE_ENCODING_TABLE};

/// Instruction word decoding and addressing-mode classes.
pub mod decoder;
pub use decoder::{decode, AddressingMode, DecodedInstruction, ADDRESSING_COST_TABLE};

/// Base cycle-cost table.
pub mod timing;
pub use timing::{cycle_cost, CycleCostKind, CYCLE_COST_TABLE};

/// Operand resolution and write-back.
pub mod addressing;
pub use addressing::{read_operand, write_operand, Operand, WriteBack};

/// Instruction execution engine.
pub mod execute;
pub use execute::step;

/// Kernel calls and tasks.
pub mod kernel;
pub use kernel::{KernelCall, KernelCallError, KernelReturn, TaskSlot, TaskTable};

/// Validation error taxonomy.
pub mod fault;
pub use fault::{ValidationArea, ValidationError, ValidationKind};

/// Host callbacks and core configuration.
pub mod api;
pub use api::{CoreConfig, Host, ImageHost, LoadStatus, NullHost, TaskProgress};

/// Application header and load sequencing.
pub mod init;
pub use init::{AppHeader, InitProgress, LoadPhase};

/// State export and import.
pub mod snapshot;
pub use snapshot::StateImage;

/// Emulator instance and run loop.
pub mod emulator;
pub use emulator::{Emulator, EmulatorBuilder};

/// Debug disassembly.
pub mod disasm;
pub use disasm::{disassemble, disassemble_range, DisassemblyRow};

#[cfg(test)]
use proptest as _;
#[cfg(test)]
use rstest as _;
