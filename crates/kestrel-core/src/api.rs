//! Host-facing contracts: the callback trait, progress reports and core configuration.

use crate::kernel::TASK_RESULT_UNSUPPORTED;
use crate::peripherals::LINE_PIXELS;

/// Outcome of one [`Host::load_binary`] request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum LoadStatus {
    /// The destination was filled before returning.
    Done,
    /// The host fills [`crate::Emulator::pending_load_mut`] later and then
    /// calls [`crate::Emulator::load_complete`].
    Deferred,
}

/// Outcome of a dispatched kernel task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum TaskProgress {
    /// Still running; the host reports through [`crate::Emulator::task_end`].
    Pending,
    /// Finished with the given result code.
    Complete(u16),
}

/// Callbacks the core makes into its embedding.
///
/// Only [`Host::load_binary`] is required. Every slice handed out points into
/// data memory and has already been checked against the data window. Task
/// methods receive the slot `handle` so deferred work can be completed later.
#[allow(unused_variables)]
pub trait Host {
    /// Fills `dest` with image words starting at word `offset`.
    fn load_binary(&mut self, dest: &mut [u16], offset: u32) -> LoadStatus;

    /// Digital input state of `device`, input `group`.
    fn digital_input(&mut self, device: u16, group: u16) -> u16 {
        0
    }

    /// Analog input value of `device`, `axis`.
    fn analog_input(&mut self, device: u16, axis: u16) -> u16 {
        0
    }

    /// Writes the local user id (8 words).
    fn local_user(&mut self, dest: &mut [u16]) {
        dest.fill(0);
    }

    /// Receives one rendered display line.
    fn line(&mut self, index: u16, pixels: &[u8; LINE_PIXELS]) {}

    /// Loads image words starting at word `offset` into `dest`.
    fn binary_load(&mut self, handle: u16, dest: &mut [u16], offset: u32) -> TaskProgress {
        TaskProgress::Complete(TASK_RESULT_UNSUPPORTED)
    }

    /// Loads file `name` starting at word `offset` into `dest`.
    fn file_load(
        &mut self,
        handle: u16,
        name: &str,
        dest: &mut [u16],
        offset: u32,
    ) -> TaskProgress {
        TaskProgress::Complete(TASK_RESULT_UNSUPPORTED)
    }

    /// Stores `src` as file `name`.
    fn file_save(&mut self, handle: u16, name: &str, src: &[u16]) -> TaskProgress {
        TaskProgress::Complete(TASK_RESULT_UNSUPPORTED)
    }

    /// Writes the packed name following `name` into `dest` (32 words).
    fn file_next(&mut self, handle: u16, name: &str, dest: &mut [u16]) -> TaskProgress {
        TaskProgress::Complete(TASK_RESULT_UNSUPPORTED)
    }

    /// Renames file `from` to `to`.
    fn file_move(&mut self, handle: u16, from: &str, to: &str) -> TaskProgress {
        TaskProgress::Complete(TASK_RESULT_UNSUPPORTED)
    }

    /// Writes the display name of `user` (8-word id) into `dest`.
    fn user_name(&mut self, handle: u16, user: &[u16], dest: &mut [u16]) -> TaskProgress {
        TaskProgress::Complete(TASK_RESULT_UNSUPPORTED)
    }

    /// Sends `src` to `user` (8-word id).
    fn packet_send(&mut self, handle: u16, user: &[u16], src: &[u16]) -> TaskProgress {
        TaskProgress::Complete(TASK_RESULT_UNSUPPORTED)
    }

    /// Writes the ids of connected users into `dest`.
    fn user_list(&mut self, handle: u16, dest: &mut [u16]) -> TaskProgress {
        TaskProgress::Complete(TASK_RESULT_UNSUPPORTED)
    }
}

/// Host with nothing to load and no devices attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullHost;

impl Host for NullHost {
    fn load_binary(&mut self, dest: &mut [u16], _offset: u32) -> LoadStatus {
        dest.fill(0);
        LoadStatus::Done
    }
}

/// Host serving a complete load image from memory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageHost {
    image: Vec<u16>,
}

impl ImageHost {
    /// Host for `image` (header, code, data).
    #[must_use]
    pub const fn new(image: Vec<u16>) -> Self {
        Self { image }
    }

    /// The served image.
    #[must_use]
    pub fn image(&self) -> &[u16] {
        &self.image
    }
}

impl Host for ImageHost {
    fn load_binary(&mut self, dest: &mut [u16], offset: u32) -> LoadStatus {
        let start = (offset as usize).min(self.image.len());
        let source = &self.image[start..];
        let copied = source.len().min(dest.len());
        dest[..copied].copy_from_slice(&source[..copied]);
        dest[copied..].fill(0);
        LoadStatus::Done
    }
}

/// Top-level configuration for a core instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct CoreConfig {
    /// Charges the periodic kernel housekeeping surcharge.
    pub housekeeping: bool,
    /// Forces rendering on at init regardless of the header flag.
    pub render_on_start: Option<bool>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            housekeeping: true,
            render_on_start: None,
        }
    }
}
