//! The emulator instance and its run loop.
//!
//! One [`Emulator::run`] call repeats passes until a halt cause appears. A
//! pass runs the CPU up to the end of the current display line, charges
//! kernel housekeeping, drains both FIFO lanes by the same cycle count,
//! advances the video and audio timers, and finally dispatches new kernel
//! tasks to the host.

use std::fmt;

use log::debug;

use crate::api::{CoreConfig, Host};
use crate::bus::{Bus, DISPLAY_BASE, DISPLAY_CELLS};
use crate::execute::step;
use crate::fault::{ValidationError, ValidationKind};
use crate::fifo::{drain, Coprocessor, Fifo, LaneId};
use crate::init::{AppHeader, InitProgress, LoadPhase, Loader};
use crate::kernel::{schedule, task_end};
use crate::peripherals::{
    BlitAccelerator, LineRenderer, PackedLineRenderer, SampleMixer, LINE_PIXELS,
};
use crate::snapshot::{self, StateImage};
use crate::state::{Breakpoints, RunMode, HOUSEKEEPING_INTERVAL};
use crate::timers::{housekeeping_surcharge, AudioBlock, VISIBLE_LINES};
use crate::{HaltCause, Machine};

/// Collects the collaborators of an [`Emulator`].
pub struct EmulatorBuilder<H> {
    host: H,
    mixer: Box<dyn Coprocessor>,
    accelerator: Box<dyn Coprocessor>,
    renderer: Box<dyn LineRenderer>,
    config: CoreConfig,
}

impl<H: Host> EmulatorBuilder<H> {
    /// Builder with the reference coprocessors and renderer.
    #[must_use]
    pub fn new(host: H) -> Self {
        Self {
            host,
            mixer: Box::new(SampleMixer::default()),
            accelerator: Box::new(BlitAccelerator::default()),
            renderer: Box::new(PackedLineRenderer),
            config: CoreConfig::default(),
        }
    }

    /// Replaces the lane A coprocessor.
    #[must_use]
    pub fn mixer(mut self, mixer: impl Coprocessor + 'static) -> Self {
        self.mixer = Box::new(mixer);
        self
    }

    /// Replaces the lane B coprocessor.
    #[must_use]
    pub fn accelerator(mut self, accelerator: impl Coprocessor + 'static) -> Self {
        self.accelerator = Box::new(accelerator);
        self
    }

    /// Replaces the line renderer.
    #[must_use]
    pub fn renderer(mut self, renderer: impl LineRenderer + 'static) -> Self {
        self.renderer = Box::new(renderer);
        self
    }

    /// Sets the core configuration.
    #[must_use]
    pub const fn config(mut self, config: CoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds an instance waiting for [`Emulator::init`].
    #[must_use]
    pub fn build(self) -> Emulator<H> {
        let mut machine = Machine::with_fifo(Fifo::new(self.mixer, self.accelerator));
        machine.raise(HaltCause::INIT);
        Emulator {
            bus: Bus::standard(),
            machine,
            host: self.host,
            renderer: self.renderer,
            loader: Loader::default(),
            breakpoints: Breakpoints::default(),
            config: self.config,
            pixels: [0; LINE_PIXELS],
        }
    }
}

/// A complete Kestrel-16 machine bound to its host.
pub struct Emulator<H> {
    bus: Bus,
    machine: Machine,
    host: H,
    renderer: Box<dyn LineRenderer>,
    loader: Loader,
    breakpoints: Breakpoints,
    config: CoreConfig,
    pixels: [u8; LINE_PIXELS],
}

impl<H> fmt::Debug for Emulator<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emulator")
            .field("machine", &self.machine)
            .field("loader", &self.loader)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<H: Host> Emulator<H> {
    /// Instance with the reference collaborators and default configuration.
    #[must_use]
    pub fn new(host: H) -> Self {
        EmulatorBuilder::new(host).build()
    }

    /// Drives the load sequence as far as the host allows.
    ///
    /// # Errors
    ///
    /// Returns the header validation error; nothing is applied and the next
    /// call restarts at the header.
    pub fn init(&mut self) -> Result<InitProgress, ValidationError> {
        self.loader
            .drive(&mut self.machine, &mut self.host, &self.config)
    }

    /// Buffer for the deferred load the host still has to fill.
    pub fn pending_load_mut(&mut self) -> Option<&mut [u16]> {
        self.loader.pending_mut(&mut self.machine)
    }

    /// Reports that the deferred load buffer has been filled.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationKind::LoadSequence`] when no load is pending, or the
    /// header validation error when the header was the deferred section.
    pub fn load_complete(&mut self) -> Result<(), ValidationError> {
        self.loader.complete(&mut self.machine, &self.config)
    }

    /// Discards all program state and restarts the load sequence.
    ///
    /// Pending tasks are dropped without notifying the host.
    pub fn reset(&mut self) {
        self.machine.clear_volatile();
        self.machine.raise(HaltCause::INIT);
        self.loader = Loader::default();
        debug!("instance reset, waiting for init");
    }

    /// Header of the loaded program.
    #[must_use]
    pub fn header(&self) -> Option<AppHeader> {
        self.loader
            .header()
            .filter(|_| self.loader.phase() == LoadPhase::Ready)
    }

    /// Runs passes until a halt cause is raised and returns the cycles consumed.
    ///
    /// Returns 0 without touching any state while a blocking cause is set.
    pub fn run(&mut self, mode: RunMode) -> u32 {
        if self.machine.halt.is_blocking() {
            return 0;
        }
        self.machine.halt = HaltCause::empty();

        let mut total = 0u32;
        let mut first = true;
        loop {
            let mut pass = self.burst(mode, &mut first);
            pass += self.housekeeping(pass);

            for lane in LaneId::ALL {
                drain(&mut self.machine, lane, pass);
            }
            self.advance_video(pass);
            if self.machine.audio.advance(pass) {
                self.machine.raise(HaltCause::AUDIO);
            }
            total = total.wrapping_add(pass);

            if !self.machine.halt.is_empty() {
                break;
            }
            schedule(&mut self.machine, &mut self.host);
            if mode == RunMode::SingleStep || !self.machine.halt.is_empty() {
                break;
            }
        }
        total
    }

    /// Executes instructions until the current line ends or a cause is raised.
    fn burst(&mut self, mode: RunMode, first: &mut bool) -> u32 {
        let budget = self.machine.video.remaining_in_line();
        let mut cycles = 0;
        while cycles < budget {
            let pc = self.machine.regs.pc();
            if mode.checks_breakpoints() && !*first && self.breakpoints.contains(pc) {
                self.machine.raise(HaltCause::BREAK);
                break;
            }
            *first = false;
            cycles += step(&self.bus, &mut self.machine, &mut self.host);
            if mode == RunMode::SingleStep || !self.machine.halt.is_empty() {
                break;
            }
        }
        cycles
    }

    /// Extra cycles charged for kernel bookkeeping after `cycles` of work.
    fn housekeeping(&mut self, cycles: u32) -> u32 {
        if !self.config.housekeeping {
            return 0;
        }
        match self.machine.housekeeping.checked_sub(cycles) {
            Some(left) if left > 0 => {
                self.machine.housekeeping = left;
                0
            }
            _ => {
                self.machine.housekeeping = HOUSEKEEPING_INTERVAL;
                housekeeping_surcharge()
            }
        }
    }

    fn advance_video(&mut self, cycles: u32) {
        self.machine.video.advance(cycles);
        while let Some(event) = self.machine.video.next_line() {
            if self.machine.video.rendering && event.line < VISIBLE_LINES {
                let display = usize::from(DISPLAY_BASE);
                let registers = &self.machine.cells[display..display + usize::from(DISPLAY_CELLS)];
                self.renderer
                    .render(event.line, registers, &self.machine.pram, &mut self.pixels);
                self.host.line(event.line, &self.pixels);
                self.machine.raise(HaltCause::LINE);
            }
            if event.frame_end {
                self.machine.raise(HaltCause::FRAME);
            }
        }
    }

    /// Causes raised since the last `run` started.
    #[must_use]
    pub const fn halt_cause(&self) -> HaltCause {
        self.machine.halt
    }

    /// Acknowledges `causes`; `AUDIO` and `INIT` are ignored.
    pub fn clear_halt(&mut self, causes: HaltCause) {
        self.machine.halt.remove(causes & HaltCause::HOST_CLEARABLE);
    }

    /// Completes a pending kernel task; returns `false` when `handle` was not running.
    pub fn task_end(&mut self, handle: u16, result: u16) -> bool {
        task_end(&mut self.machine, handle, result)
    }

    /// Takes the finished audio block and clears `AUDIO`.
    pub fn take_audio(&mut self) -> Option<AudioBlock> {
        if !self.machine.halt.contains(HaltCause::AUDIO) {
            return None;
        }
        self.machine.halt.remove(HaltCause::AUDIO);
        Some(self.machine.audio.latest_block(&self.machine))
    }

    /// Turns line rendering and the line callback on or off.
    pub const fn set_rendering(&mut self, rendering: bool) {
        self.machine.video.rendering = rendering;
    }

    /// Sets a breakpoint on code address `addr`.
    pub fn set_breakpoint(&mut self, addr: u16) {
        self.breakpoints.set(addr);
    }

    /// Clears the breakpoint on `addr`.
    pub fn clear_breakpoint(&mut self, addr: u16) {
        self.breakpoints.clear(addr);
    }

    /// Returns `true` when `addr` carries a breakpoint.
    #[must_use]
    pub fn is_breakpoint(&self, addr: u16) -> bool {
        self.breakpoints.contains(addr)
    }

    /// Side-effect free read of bus cell `addr`.
    #[must_use]
    pub fn bus_get(&self, addr: u16) -> u16 {
        self.bus.get(&self.machine, addr)
    }

    /// Debug write of bus cell `addr`.
    pub fn bus_set(&mut self, addr: u16, value: u16) {
        self.bus.set(&mut self.machine, addr, value);
    }

    /// Captures the complete program state.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationKind::LoadSequence`] before a program is loaded.
    pub fn export_state(&self) -> Result<StateImage, ValidationError> {
        let header = self.header().ok_or_else(|| {
            ValidationError::new(ValidationKind::LoadSequence, self.loader.phase() as u32)
        })?;
        Ok(snapshot::export(&self.machine, &header))
    }

    /// Replaces the program state with `image` after validating all of it.
    ///
    /// # Errors
    ///
    /// Returns the first structural problem found; the instance is unchanged.
    pub fn import_state(&mut self, image: &StateImage) -> Result<(), ValidationError> {
        let loaded = self.header();
        snapshot::import(&mut self.machine, loaded.as_ref(), image)?;
        Ok(())
    }

    /// Machine state.
    #[must_use]
    pub const fn machine(&self) -> &Machine {
        &self.machine
    }

    /// Mutable machine state for debuggers.
    pub const fn machine_mut(&mut self) -> &mut Machine {
        &mut self.machine
    }

    /// The host.
    #[must_use]
    pub const fn host(&self) -> &H {
        &self.host
    }

    /// Mutable host.
    pub const fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &CoreConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::{Emulator, EmulatorBuilder};
    use crate::api::{CoreConfig, Host, ImageHost, LoadStatus};
    use crate::encoding::{encode_instruction, Opcode};
    use crate::fault::ValidationKind;
    use crate::init::{AppHeader, InitProgress};
    use crate::peripherals::LINE_PIXELS;
    use crate::state::{RunMode, StackWindow, HOUSEKEEPING_INTERVAL};
    use crate::timers::{
        CYCLES_PER_LINE, CYCLES_PER_SAMPLE, LINES_PER_FRAME, SAMPLES_PER_AUDIO_TICK,
    };
    use crate::HaltCause;

    const AUDIO_BLOCK_CYCLES: u32 = CYCLES_PER_SAMPLE * SAMPLES_PER_AUDIO_TICK as u32;

    const QUIET: CoreConfig = CoreConfig {
        housekeeping: false,
        render_on_start: Some(false),
    };

    #[allow(clippy::cast_possible_truncation)]
    fn header(code: &[u16]) -> AppHeader {
        AppHeader {
            code_words: code.len() as u16,
            data_words: 0,
            stack: StackWindow {
                bottom: 0x100,
                top: 0x200,
            },
            entry: 0,
            flags: 0,
        }
    }

    fn ready(code: &[u16], config: CoreConfig) -> Emulator<ImageHost> {
        let host = ImageHost::new(header(code).image(code, &[]));
        let mut emu = EmulatorBuilder::new(host).config(config).build();
        assert_eq!(emu.init(), Ok(InitProgress::Ready));
        emu
    }

    fn jump_to_self() -> Vec<u16> {
        vec![encode_instruction(Opcode::Jma, 0, 0x00)]
    }

    #[test]
    fn run_is_blocked_until_init_completes() {
        let mut emu = Emulator::new(ImageHost::new(header(&[0x6800]).image(&[0x6800], &[])));
        assert_eq!(emu.halt_cause(), HaltCause::INIT);
        assert_eq!(emu.run(RunMode::FreeRun), 0);
        emu.clear_halt(HaltCause::all());
        assert_eq!(emu.halt_cause(), HaltCause::INIT);

        assert_eq!(emu.init(), Ok(InitProgress::Ready));
        assert!(emu.halt_cause().is_empty());
        assert_eq!(emu.run(RunMode::FreeRun), 3);
        assert_eq!(emu.halt_cause(), HaltCause::EXIT);
    }

    #[test]
    fn deferred_code_load_resumes_after_completion() {
        struct Deferring {
            image: ImageHost,
        }
        impl Host for Deferring {
            fn load_binary(&mut self, dest: &mut [u16], offset: u32) -> LoadStatus {
                if offset == 16 {
                    return LoadStatus::Deferred;
                }
                self.image.load_binary(dest, offset)
            }
        }

        let code = [0x6800];
        let host = Deferring {
            image: ImageHost::new(header(&code).image(&code, &[])),
        };
        let mut emu = EmulatorBuilder::new(host).config(QUIET).build();
        assert_eq!(emu.init(), Ok(InitProgress::Waiting));
        assert_eq!(emu.init(), Ok(InitProgress::Waiting));
        assert!(emu.header().is_none());
        assert_eq!(emu.run(RunMode::FreeRun), 0);

        let pending = emu.pending_load_mut().expect("code load outstanding");
        assert_eq!(pending.len(), 1);
        pending.copy_from_slice(&code);
        assert_eq!(emu.load_complete(), Ok(()));
        assert!(emu.pending_load_mut().is_none());
        let error = emu.load_complete().expect_err("nothing outstanding");
        assert_eq!(error.kind, ValidationKind::LoadSequence);

        assert_eq!(emu.init(), Ok(InitProgress::Ready));
        assert_eq!(emu.header(), Some(header(&code)));
        assert_eq!(emu.run(RunMode::FreeRun), 3);
        assert_eq!(emu.halt_cause(), HaltCause::EXIT);
    }

    #[test]
    fn invalid_header_is_reported_and_retried() {
        let mut image = header(&[0x6800]).image(&[0x6800], &[]);
        image[2] = 9;
        let mut emu = EmulatorBuilder::new(ImageHost::new(image)).config(QUIET).build();
        let error = emu.init().expect_err("bad version");
        assert_eq!(error.kind, ValidationKind::UnsupportedVersion);
        assert_eq!(emu.halt_cause(), HaltCause::INIT);
        assert_eq!(emu.init().map_err(|e| e.location), Err(2));
    }

    #[test]
    fn blocking_cause_returns_zero_until_cleared() {
        let mut emu = ready(&[0x6800], QUIET);
        assert_eq!(emu.run(RunMode::FreeRun), 3);
        let before = emu.export_state().expect("loaded");
        assert_eq!(emu.run(RunMode::FreeRun), 0);
        assert_eq!(emu.run(RunMode::SingleStep), 0);
        assert_eq!(emu.export_state().expect("loaded"), before);

        emu.clear_halt(HaltCause::EXIT);
        assert_eq!(emu.run(RunMode::FreeRun), 3);
    }

    #[test]
    fn free_run_without_rendering_stops_at_audio_and_frame_end() {
        let frame = CYCLES_PER_LINE * u32::from(LINES_PER_FRAME);
        let mut emu = ready(&jump_to_self(), QUIET);
        assert_eq!(emu.run(RunMode::FreeRun), AUDIO_BLOCK_CYCLES);
        assert_eq!(emu.halt_cause(), HaltCause::AUDIO);
        assert!(emu.take_audio().is_some());

        assert_eq!(emu.run(RunMode::FreeRun), frame - AUDIO_BLOCK_CYCLES);
        assert_eq!(emu.halt_cause(), HaltCause::FRAME);
        assert_eq!(emu.machine().video().frame, 1);
    }

    #[test]
    fn rendering_stops_every_line() {
        #[derive(Default)]
        struct Lines {
            image: ImageHost,
            seen: Vec<u16>,
        }
        impl Host for Lines {
            fn load_binary(&mut self, dest: &mut [u16], offset: u32) -> LoadStatus {
                self.image.load_binary(dest, offset)
            }
            fn line(&mut self, index: u16, _pixels: &[u8; LINE_PIXELS]) {
                self.seen.push(index);
            }
        }

        let code = jump_to_self();
        let host = Lines {
            image: ImageHost::new(header(&code).image(&code, &[])),
            seen: Vec::new(),
        };
        let mut emu = EmulatorBuilder::new(host)
            .config(CoreConfig {
                render_on_start: Some(true),
                ..QUIET
            })
            .build();
        assert_eq!(emu.init(), Ok(InitProgress::Ready));

        assert_eq!(emu.run(RunMode::FreeRun), CYCLES_PER_LINE);
        assert_eq!(emu.halt_cause(), HaltCause::LINE);
        assert_eq!(emu.run(RunMode::FreeRun), CYCLES_PER_LINE);
        assert_eq!(emu.host().seen, vec![0, 1]);

        emu.set_rendering(false);
        emu.run(RunMode::FreeRun);
        assert_eq!(emu.halt_cause(), HaltCause::AUDIO);
        assert_eq!(emu.host().seen.len(), 2);
    }

    #[test]
    fn breakpoint_skips_first_instruction_of_the_call() {
        let nop = encode_instruction(Opcode::Nop, 0, 0);
        let mut emu = ready(&[nop, nop, nop, encode_instruction(Opcode::Jma, 0, 0)], QUIET);
        emu.set_breakpoint(2);
        assert!(emu.is_breakpoint(2));

        assert_eq!(emu.run(RunMode::Breakpoint), 2);
        assert_eq!(emu.halt_cause(), HaltCause::BREAK);
        assert_eq!(emu.machine().registers().pc(), 2);

        assert_eq!(emu.run(RunMode::Breakpoint), 1 + 2 + 1 + 1);
        assert_eq!(emu.machine().registers().pc(), 2);

        emu.clear_breakpoint(2);
        assert_eq!(emu.run(RunMode::SingleStep), 1);
        assert_eq!(emu.machine().registers().pc(), 3);
        assert!(emu.halt_cause().is_empty());
    }

    #[test]
    fn audio_block_blocks_until_taken() {
        let mut emu = ready(&jump_to_self(), QUIET);
        assert_eq!(emu.run(RunMode::FreeRun), AUDIO_BLOCK_CYCLES);
        assert_eq!(emu.halt_cause(), HaltCause::AUDIO);
        assert_eq!(emu.run(RunMode::FreeRun), 0);

        emu.clear_halt(HaltCause::AUDIO);
        assert_eq!(emu.halt_cause(), HaltCause::AUDIO);
        let block = emu.take_audio().expect("block ready");
        assert_eq!(block.samples.len(), 512);
        assert!(emu.take_audio().is_none());
        assert!(emu.run(RunMode::FreeRun) > 0);
    }

    #[test]
    fn housekeeping_surcharge_is_added_when_budget_runs_out() {
        let nop = encode_instruction(Opcode::Nop, 0, 0);
        let mut emu = ready(&[nop, nop], CoreConfig::default());
        emu.machine_mut().housekeeping = 1;

        let cycles = emu.run(RunMode::SingleStep);
        assert!((1 + 192..1 + 192 + 256).contains(&cycles), "{cycles}");
        assert_eq!(emu.machine().housekeeping, HOUSEKEEPING_INTERVAL);

        assert_eq!(emu.run(RunMode::SingleStep), 1);
        assert_eq!(emu.machine().housekeeping, HOUSEKEEPING_INTERVAL - 1);
    }

    #[test]
    fn reset_requires_a_new_init() {
        let mut emu = ready(&[0x6800], QUIET);
        assert_eq!(emu.run(RunMode::FreeRun), 3);
        emu.reset();
        assert_eq!(emu.halt_cause(), HaltCause::INIT);
        assert!(emu.header().is_none());
        let error = emu.export_state().expect_err("nothing loaded");
        assert_eq!(error.kind, ValidationKind::LoadSequence);

        assert_eq!(emu.init(), Ok(InitProgress::Ready));
        assert_eq!(emu.run(RunMode::FreeRun), 3);
    }

    #[test]
    fn clear_halt_ignores_non_host_causes() {
        let mut emu = ready(&[0x6800], QUIET);
        emu.machine_mut().raise(HaltCause::AUDIO | HaltCause::FAULT);
        emu.clear_halt(HaltCause::all());
        assert_eq!(emu.halt_cause(), HaltCause::AUDIO);
    }

    #[test]
    fn bus_access_from_the_host() {
        let mut emu = ready(&[0x6800], QUIET);
        emu.bus_set(0x003, 160);
        assert_eq!(emu.bus_get(0x003), 160);
        emu.bus_set(0x3FF, 1);
        assert_eq!(emu.bus_get(0x3FF), 0);
    }
}
