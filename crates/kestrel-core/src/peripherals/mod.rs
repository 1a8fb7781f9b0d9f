//! Reference collaborators plugged into the core: coprocessors and the line renderer.

/// Block-transfer graphics accelerator.
pub mod accelerator;
/// Display registers and line renderer contract.
pub mod display;
/// Stereo sample mixer.
pub mod mixer;

pub use accelerator::BlitAccelerator;
pub use display::{LineRenderer, PackedLineRenderer, LINE_PIXELS};
pub use mixer::SampleMixer;

/// Joins a high/low register pair into a peripheral memory address.
pub(crate) fn join_address(high: u16, low: u16) -> usize {
    ((usize::from(high) << 16) | usize::from(low)) & crate::memory::PRAM_MASK
}
