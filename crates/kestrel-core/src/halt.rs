//! Halt-cause register shared by every component of a run pass.

bitflags::bitflags! {
    /// Reasons the last run pass stopped.
    ///
    /// Causes accumulate during one [`crate::Emulator::run`] call and are only
    /// cleared when the next call starts, unless a [`HaltCause::BLOCKING`]
    /// cause is pending.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
    pub struct HaltCause: u16 {
        /// A block of audio samples is ready and must be drained.
        const AUDIO = 1 << 0;
        /// The program returned from its outermost frame.
        const EXIT = 1 << 1;
        /// A stack access fell outside the stack window.
        const STACK = 1 << 2;
        /// A kernel call had an unknown id or invalid parameters.
        const INVKCALL = 1 << 3;
        /// The fetched opcode is not defined.
        const INVOP = 1 << 4;
        /// Kernel task state failed re-validation.
        const FAULT = 1 << 5;
        /// A host callback happened.
        const CALLBACK = 1 << 6;
        /// A breakpoint was reached.
        const BREAK = 1 << 7;
        /// A display line was rendered.
        const LINE = 1 << 8;
        /// The video timer wrapped to a new frame.
        const FRAME = 1 << 9;
        /// Initialization has not completed.
        const INIT = 1 << 10;

        /// Causes that make `run` return immediately until cleared.
        const BLOCKING = Self::AUDIO.bits()
            | Self::EXIT.bits()
            | Self::STACK.bits()
            | Self::INVKCALL.bits()
            | Self::INVOP.bits()
            | Self::FAULT.bits()
            | Self::INIT.bits();
    }
}

impl HaltCause {
    /// Causes the host may acknowledge through [`crate::Emulator::clear_halt`].
    ///
    /// `AUDIO` clears by draining audio and `INIT` by finishing initialization.
    pub const HOST_CLEARABLE: Self = Self::all().difference(Self::AUDIO.union(Self::INIT));

    /// Returns `true` when any cause that blocks re-entry is set.
    #[must_use]
    pub const fn is_blocking(self) -> bool {
        self.intersects(Self::BLOCKING)
    }

    /// Sets `cause` in the mask.
    pub const fn raise(&mut self, cause: Self) {
        *self = self.union(cause);
    }
}

#[cfg(test)]
mod tests {
    use super::HaltCause;

    #[test]
    fn blocking_set_matches_documented_causes() {
        for cause in [
            HaltCause::AUDIO,
            HaltCause::EXIT,
            HaltCause::STACK,
            HaltCause::INVKCALL,
            HaltCause::INVOP,
            HaltCause::FAULT,
            HaltCause::INIT,
        ] {
            assert!(cause.is_blocking(), "{cause:?}");
        }
        for cause in [
            HaltCause::CALLBACK,
            HaltCause::BREAK,
            HaltCause::LINE,
            HaltCause::FRAME,
        ] {
            assert!(!cause.is_blocking(), "{cause:?}");
        }
    }

    #[test]
    fn host_clearable_excludes_audio_and_init() {
        assert!(!HaltCause::HOST_CLEARABLE.contains(HaltCause::AUDIO));
        assert!(!HaltCause::HOST_CLEARABLE.contains(HaltCause::INIT));
        assert!(HaltCause::HOST_CLEARABLE.contains(HaltCause::EXIT | HaltCause::FAULT));
    }

    #[test]
    fn bit_positions_are_stable() {
        assert_eq!(HaltCause::AUDIO.bits(), 0x0001);
        assert_eq!(HaltCause::CALLBACK.bits(), 0x0040);
        assert_eq!(HaltCause::INIT.bits(), 0x0400);
        assert_eq!(HaltCause::all().bits(), 0x07FF);
    }
}
