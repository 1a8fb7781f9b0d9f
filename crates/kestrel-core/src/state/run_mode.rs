/// How far one [`crate::Emulator::run`] call may go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum RunMode {
    /// Execute one instruction, then finish the pass.
    SingleStep,
    /// Run freely but stop before any breakpointed instruction other than the first.
    Breakpoint,
    /// Run until a halt cause is raised.
    #[default]
    FreeRun,
}

impl RunMode {
    /// Returns `true` when breakpoints are consulted.
    #[must_use]
    pub const fn checks_breakpoints(self) -> bool {
        matches!(self, Self::Breakpoint)
    }
}

/// Breakpoint bitmap keyed by code-word address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breakpoints {
    bits: Box<[u64]>,
}

impl Default for Breakpoints {
    fn default() -> Self {
        Self {
            bits: vec![0; 0x1_0000 / 64].into_boxed_slice(),
        }
    }
}

impl Breakpoints {
    const fn slot(addr: u16) -> (usize, u64) {
        ((addr >> 6) as usize, 1 << (addr & 63))
    }

    /// Marks `addr` as a breakpoint.
    pub fn set(&mut self, addr: u16) {
        let (word, bit) = Self::slot(addr);
        self.bits[word] |= bit;
    }

    /// Removes the breakpoint at `addr`.
    pub fn clear(&mut self, addr: u16) {
        let (word, bit) = Self::slot(addr);
        self.bits[word] &= !bit;
    }

    /// Returns `true` when `addr` has a breakpoint.
    #[must_use]
    pub fn contains(&self, addr: u16) -> bool {
        let (word, bit) = Self::slot(addr);
        self.bits[word] & bit != 0
    }

    /// Removes every breakpoint.
    pub fn clear_all(&mut self) {
        self.bits.fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::{Breakpoints, RunMode};

    #[test]
    fn run_mode_default_is_free_run() {
        assert_eq!(RunMode::default(), RunMode::FreeRun);
        assert!(RunMode::Breakpoint.checks_breakpoints());
        assert!(!RunMode::SingleStep.checks_breakpoints());
    }

    #[test]
    fn breakpoints_cover_whole_code_space() {
        let mut breakpoints = Breakpoints::default();
        for addr in [0x0000, 0x003F, 0x0040, 0xFFFF] {
            assert!(!breakpoints.contains(addr));
            breakpoints.set(addr);
            assert!(breakpoints.contains(addr));
        }
        breakpoints.clear(0x0040);
        assert!(!breakpoints.contains(0x0040));
        assert!(breakpoints.contains(0x003F));
        breakpoints.clear_all();
        assert!(!breakpoints.contains(0xFFFF));
    }
}
