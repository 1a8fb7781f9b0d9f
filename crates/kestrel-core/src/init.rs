//! Application header validation and the resumable load sequence.
//!
//! An image is a 16-word header followed by the code words and the data
//! words. Each section is fetched with one [`Host::load_binary`] request; a
//! deferred request parks the loader until the host reports completion.

use log::debug;

use crate::api::{CoreConfig, Host, LoadStatus};
use crate::fault::{ValidationError, ValidationKind};
use crate::memory::DATA_WINDOW_END;
use crate::state::StackWindow;
use crate::{HaltCause, Machine};

/// Words in the application header.
pub const HEADER_WORDS: usize = 16;
/// Magic words opening every image.
pub const HEADER_MAGIC: [u16; 2] = [0x4B53, 0x3136];
/// Supported header version.
pub const HEADER_VERSION: u16 = 1;
/// Header flag: start with display rendering enabled.
pub const FLAG_RENDER_ON_START: u16 = 1 << 0;

const WORD_VERSION: usize = 2;
const WORD_CODE: usize = 3;
const WORD_DATA: usize = 4;
const WORD_STACK_BOTTOM: usize = 5;
const WORD_STACK_TOP: usize = 6;
const WORD_ENTRY: usize = 7;
const WORD_FLAGS: usize = 8;
const FIRST_RESERVED_WORD: usize = 9;

/// Validated application header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct AppHeader {
    /// Words in the code section.
    pub code_words: u16,
    /// Words in the data section.
    pub data_words: u16,
    /// Stack bounds.
    pub stack: StackWindow,
    /// Initial `PC`.
    pub entry: u16,
    /// Flag bits.
    pub flags: u16,
}

#[allow(clippy::cast_possible_truncation)]
fn fail(kind: ValidationKind, word: usize) -> ValidationError {
    ValidationError::new(kind, word as u32)
}

impl AppHeader {
    /// Validates the raw header words.
    ///
    /// # Errors
    ///
    /// Returns the first failing check, tagged with the offending word index.
    pub fn parse(words: &[u16; HEADER_WORDS]) -> Result<Self, ValidationError> {
        for (index, magic) in HEADER_MAGIC.iter().enumerate() {
            if words[index] != *magic {
                return Err(fail(ValidationKind::BadMagic, index));
            }
        }
        if words[WORD_VERSION] != HEADER_VERSION {
            return Err(fail(ValidationKind::UnsupportedVersion, WORD_VERSION));
        }

        let code_words = words[WORD_CODE];
        if code_words == 0 {
            return Err(fail(ValidationKind::EmptyCode, WORD_CODE));
        }
        let data_words = words[WORD_DATA];
        if data_words > DATA_WINDOW_END {
            return Err(fail(ValidationKind::DataTooLarge, WORD_DATA));
        }

        let stack = StackWindow {
            bottom: words[WORD_STACK_BOTTOM],
            top: words[WORD_STACK_TOP],
        };
        if stack.bottom >= stack.top {
            return Err(fail(ValidationKind::StackWindow, WORD_STACK_BOTTOM));
        }
        if stack.top > DATA_WINDOW_END {
            return Err(fail(ValidationKind::StackWindow, WORD_STACK_TOP));
        }

        let entry = words[WORD_ENTRY];
        if entry >= code_words {
            return Err(fail(ValidationKind::EntryOutOfRange, WORD_ENTRY));
        }
        let flags = words[WORD_FLAGS];
        if flags & !FLAG_RENDER_ON_START != 0 {
            return Err(fail(ValidationKind::ReservedFlags, WORD_FLAGS));
        }
        if let Some(index) = (FIRST_RESERVED_WORD..HEADER_WORDS).find(|index| words[*index] != 0) {
            return Err(fail(ValidationKind::ReservedWord, index));
        }

        Ok(Self {
            code_words,
            data_words,
            stack,
            entry,
            flags,
        })
    }

    /// Raw header words.
    #[must_use]
    pub const fn to_words(&self) -> [u16; HEADER_WORDS] {
        let mut words = [0; HEADER_WORDS];
        words[0] = HEADER_MAGIC[0];
        words[1] = HEADER_MAGIC[1];
        words[WORD_VERSION] = HEADER_VERSION;
        words[WORD_CODE] = self.code_words;
        words[WORD_DATA] = self.data_words;
        words[WORD_STACK_BOTTOM] = self.stack.bottom;
        words[WORD_STACK_TOP] = self.stack.top;
        words[WORD_ENTRY] = self.entry;
        words[WORD_FLAGS] = self.flags;
        words
    }

    /// Full load image: header, then code and data padded or cut to the header lengths.
    #[must_use]
    pub fn image(&self, code: &[u16], data: &[u16]) -> Vec<u16> {
        let mut image = self.to_words().to_vec();
        for (section, len) in [(code, self.code_words), (data, self.data_words)] {
            let len = usize::from(len);
            let start = image.len();
            image.resize(start + len, 0);
            let copied = section.len().min(len);
            image[start..start + copied].copy_from_slice(&section[..copied]);
        }
        image
    }

    /// Returns `true` when rendering starts enabled.
    #[must_use]
    pub const fn render_on_start(&self) -> bool {
        self.flags & FLAG_RENDER_ON_START != 0
    }

    /// Image word offset of the data section.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn data_offset(&self) -> u32 {
        HEADER_WORDS as u32 + self.code_words as u32
    }
}

/// Result of one [`crate::Emulator::init`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum InitProgress {
    /// A deferred load is outstanding.
    Waiting,
    /// The program is loaded and ready to run.
    Ready,
}

/// Load sequence position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LoadPhase {
    /// Fetching the header.
    #[default]
    Header,
    /// Fetching the code section.
    Code,
    /// Fetching the data section.
    Data,
    /// Finished.
    Ready,
}

/// Resumable Header → Code → Data state machine.
#[derive(Debug, Clone, Default)]
pub(crate) struct Loader {
    phase: LoadPhase,
    pending: bool,
    header_words: [u16; HEADER_WORDS],
    header: Option<AppHeader>,
}

impl Loader {
    pub(crate) const fn phase(&self) -> LoadPhase {
        self.phase
    }

    pub(crate) const fn header(&self) -> Option<AppHeader> {
        self.header
    }

    fn destination<'a>(&'a mut self, m: &'a mut Machine) -> &'a mut [u16] {
        match (self.phase, self.header) {
            (LoadPhase::Code, Some(header)) => &mut m.code[..usize::from(header.code_words)],
            (LoadPhase::Data, Some(header)) => &mut m.data[..usize::from(header.data_words)],
            (LoadPhase::Header, _) => &mut self.header_words,
            _ => &mut [],
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn offset(&self) -> u32 {
        match (self.phase, self.header) {
            (LoadPhase::Code, _) => HEADER_WORDS as u32,
            (LoadPhase::Data, Some(header)) => header.data_offset(),
            _ => 0,
        }
    }

    /// Buffer the host must fill for the outstanding deferred load.
    pub(crate) fn pending_mut<'a>(&'a mut self, m: &'a mut Machine) -> Option<&'a mut [u16]> {
        if self.pending {
            Some(self.destination(m))
        } else {
            None
        }
    }

    /// Runs load phases until one is deferred or the image is ready.
    pub(crate) fn drive(
        &mut self,
        m: &mut Machine,
        host: &mut dyn Host,
        config: &CoreConfig,
    ) -> Result<InitProgress, ValidationError> {
        loop {
            if self.pending {
                return Ok(InitProgress::Waiting);
            }
            if self.phase == LoadPhase::Ready {
                return Ok(InitProgress::Ready);
            }
            let offset = self.offset();
            debug!("loading {:?} at offset {offset}", self.phase);
            let status = host.load_binary(self.destination(m), offset);
            if status == LoadStatus::Deferred {
                debug!("{:?} load deferred by host", self.phase);
                self.pending = true;
                return Ok(InitProgress::Waiting);
            }
            self.advance(m, config)?;
        }
    }

    /// Acknowledges a deferred load.
    pub(crate) fn complete(
        &mut self,
        m: &mut Machine,
        config: &CoreConfig,
    ) -> Result<(), ValidationError> {
        if !self.pending {
            return Err(ValidationError::new(
                ValidationKind::LoadSequence,
                self.phase as u32,
            ));
        }
        self.pending = false;
        self.advance(m, config)
    }

    fn advance(&mut self, m: &mut Machine, config: &CoreConfig) -> Result<(), ValidationError> {
        match self.phase {
            LoadPhase::Header => {
                let header = AppHeader::parse(&self.header_words)?;
                debug!("header accepted: {header:?}");
                m.code.fill(0);
                m.clear_volatile();
                m.raise(HaltCause::INIT);
                self.header = Some(header);
                self.phase = LoadPhase::Code;
            }
            LoadPhase::Code => self.phase = LoadPhase::Data,
            LoadPhase::Data => {
                if let Some(header) = self.header {
                    start(m, &header, config);
                }
                self.phase = LoadPhase::Ready;
            }
            LoadPhase::Ready => {}
        }
        Ok(())
    }
}

/// Puts a freshly loaded machine at its entry point.
fn start(m: &mut Machine, header: &AppHeader, config: &CoreConfig) {
    m.set_stack_window(header.stack);
    m.regs.set_pc(header.entry);
    m.regs.set_sp(header.stack.bottom);
    m.regs.set_bp(header.stack.bottom);
    m.video.rendering = config
        .render_on_start
        .unwrap_or_else(|| header.render_on_start());
    m.halt.remove(HaltCause::INIT);
    debug!("program ready at entry {:#06x}", header.entry);
}
