use std::fmt;

use thiserror::Error;

/// Structure a validation failure was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum ValidationArea {
    /// Application header words.
    Header,
    /// Load sequencing driven by the host.
    Loader,
    /// Imported control block.
    Snapshot,
    /// Kernel task slot contents.
    Task,
}

impl fmt::Display for ValidationArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Header => "header",
            Self::Loader => "loader",
            Self::Snapshot => "snapshot",
            Self::Task => "task slot",
        })
    }
}

/// Stable validation taxonomy shared by init and state import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u8)]
pub enum ValidationKind {
    /// Header magic words do not match.
    #[error("bad magic")]
    BadMagic = 0x01,
    /// Header version is not supported.
    #[error("unsupported version")]
    UnsupportedVersion = 0x02,
    /// Code length is zero.
    #[error("empty code section")]
    EmptyCode = 0x03,
    /// Data section reaches into the bus window.
    #[error("data section too large")]
    DataTooLarge = 0x04,
    /// Stack bounds are inverted or reach into the bus window.
    #[error("invalid stack window")]
    StackWindow = 0x05,
    /// Entry point lies past the code section.
    #[error("entry point outside code")]
    EntryOutOfRange = 0x06,
    /// A reserved flag bit is set.
    #[error("reserved flag set")]
    ReservedFlags = 0x07,
    /// A reserved word is non-zero.
    #[error("reserved word set")]
    ReservedWord = 0x08,
    /// Serialized image has the wrong size.
    #[error("image size mismatch")]
    ImageSize = 0x09,
    /// A register or pointer value is out of range.
    #[error("register out of range")]
    Register = 0x0A,
    /// A task slot holds an impossible status or parameters.
    #[error("corrupted task slot")]
    TaskSlot = 0x0B,
    /// A FIFO lane counter exceeds its ring.
    #[error("lane counters out of range")]
    LaneState = 0x0C,
    /// A timer counter is out of range.
    #[error("timer out of range")]
    TimerState = 0x0D,
    /// A load step arrived out of order.
    #[error("load out of sequence")]
    LoadSequence = 0x0E,
    /// Imported state belongs to a different program.
    #[error("program mismatch")]
    ProgramMismatch = 0x0F,
}

impl ValidationKind {
    /// Converts a kind to its stable code.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Converts a stable code back into a kind.
    #[must_use]
    pub const fn from_u8(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Self::BadMagic),
            0x02 => Some(Self::UnsupportedVersion),
            0x03 => Some(Self::EmptyCode),
            0x04 => Some(Self::DataTooLarge),
            0x05 => Some(Self::StackWindow),
            0x06 => Some(Self::EntryOutOfRange),
            0x07 => Some(Self::ReservedFlags),
            0x08 => Some(Self::ReservedWord),
            0x09 => Some(Self::ImageSize),
            0x0A => Some(Self::Register),
            0x0B => Some(Self::TaskSlot),
            0x0C => Some(Self::LaneState),
            0x0D => Some(Self::TimerState),
            0x0E => Some(Self::LoadSequence),
            0x0F => Some(Self::ProgramMismatch),
            _ => None,
        }
    }

    /// Area this kind is reported against.
    #[must_use]
    pub const fn area(self) -> ValidationArea {
        match self {
            Self::BadMagic
            | Self::UnsupportedVersion
            | Self::EmptyCode
            | Self::DataTooLarge
            | Self::StackWindow
            | Self::EntryOutOfRange
            | Self::ReservedFlags
            | Self::ReservedWord => ValidationArea::Header,
            Self::LoadSequence => ValidationArea::Loader,
            Self::TaskSlot => ValidationArea::Task,
            Self::ImageSize
            | Self::Register
            | Self::LaneState
            | Self::TimerState
            | Self::ProgramMismatch => ValidationArea::Snapshot,
        }
    }
}

/// Location-tagged structural error; the rejected input was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[error("{kind} in {area} at word {location:#06x}")]
pub struct ValidationError {
    /// Structure the error was found in.
    pub area: ValidationArea,
    /// Word index within that structure.
    pub location: u32,
    /// What was wrong.
    pub kind: ValidationKind,
}

impl ValidationError {
    /// Error of `kind` at `location`, in the kind's default area.
    #[must_use]
    pub const fn new(kind: ValidationKind, location: u32) -> Self {
        Self {
            area: kind.area(),
            location,
            kind,
        }
    }

    /// Same error reported against `area`.
    #[must_use]
    pub const fn in_area(self, area: ValidationArea) -> Self {
        Self { area, ..self }
    }
}
