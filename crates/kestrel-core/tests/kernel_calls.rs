//! Kernel call dispatch and task lifecycle integration coverage.

#![allow(
    clippy::pedantic,
    clippy::nursery,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::too_many_lines
)]

use bitflags as _;
use kestrel_core::kernel::{NO_FREE_SLOT, TASK_COMPLETE, TASK_QUEUED, TASK_RESULT_UNSUPPORTED};
use kestrel_core::{
    encode_instruction, AppHeader, CoreConfig, Emulator, EmulatorBuilder, HaltCause, Host,
    ImageHost, InitProgress, LoadStatus, Opcode, Register, RunMode, StackWindow, TaskProgress,
};
use log as _;
use proptest as _;
use rstest as _;
#[cfg(feature = "serde")]
use serde as _;
use thiserror as _;

const QUIET: CoreConfig = CoreConfig {
    housekeeping: false,
    render_on_start: Some(false),
};

/// Word holding the packed file name "a".
const NAME_AT: u16 = 0x10;

#[derive(Default)]
struct Recorder {
    image: ImageHost,
    loads: Vec<(u16, String, usize, u32)>,
}

impl Host for Recorder {
    fn load_binary(&mut self, dest: &mut [u16], offset: u32) -> LoadStatus {
        self.image.load_binary(dest, offset)
    }

    fn digital_input(&mut self, device: u16, group: u16) -> u16 {
        device * 16 + group
    }

    fn file_load(
        &mut self,
        handle: u16,
        name: &str,
        dest: &mut [u16],
        offset: u32,
    ) -> TaskProgress {
        self.loads.push((handle, name.to_owned(), dest.len(), offset));
        TaskProgress::Pending
    }
}

fn jsv16(id: u16) -> [u16; 2] {
    [encode_instruction(Opcode::Jsv, 0, 0x20), id]
}

fn param16(value: u16) -> [u16; 2] {
    [encode_instruction(Opcode::Nop, 0, 0x20), value]
}

fn param4(value: u8) -> u16 {
    encode_instruction(Opcode::Nop, 0, value)
}

fn jump_to(addr: u8) -> u16 {
    encode_instruction(Opcode::Jma, 0, addr)
}

fn boot(code: &[u16]) -> Emulator<Recorder> {
    let mut data = vec![0; usize::from(NAME_AT) + 1];
    data[usize::from(NAME_AT)] = 0x6100;
    boot_with(code, &data)
}

fn boot_with(code: &[u16], data: &[u16]) -> Emulator<Recorder> {
    let header = AppHeader {
        code_words: code.len() as u16,
        data_words: data.len() as u16,
        stack: StackWindow {
            bottom: 0x100,
            top: 0x200,
        },
        entry: 0,
        flags: 0,
    };
    let host = Recorder {
        image: ImageHost::new(header.image(code, data)),
        loads: Vec::new(),
    };
    let mut emu = EmulatorBuilder::new(host).config(QUIET).build();
    assert_eq!(emu.init(), Ok(InitProgress::Ready));
    emu
}

fn file_load(dest: u16, len: u16) -> Vec<u16> {
    let mut code = Vec::new();
    code.extend(jsv16(0x21));
    code.extend(param16(NAME_AT));
    code.extend(param16(dest));
    code.extend(param16(len));
    code.extend([param4(0), param4(1)]);
    let end = code.len() as u8;
    code.push(jump_to(end));
    code
}

#[test]
fn file_load_past_the_window_is_rejected_without_a_slot() {
    let mut emu = boot(&file_load(0xFC00 - 10, 20));
    assert_eq!(emu.run(RunMode::FreeRun), 0);
    assert_eq!(emu.halt_cause(), HaltCause::INVKCALL);
    assert_eq!(emu.machine().registers().pc(), 0);
    assert!(emu.machine().tasks().all_empty());
    assert!(emu.host().loads.is_empty());
}

#[test]
fn task_is_queued_dispatched_once_and_completed_by_the_host() {
    let mut emu = boot(&file_load(0x40, 4));

    assert_eq!(emu.run(RunMode::FreeRun), 800 + 1 + 1 + 1 + 1);
    assert_eq!(emu.halt_cause(), HaltCause::CALLBACK);
    assert_eq!(emu.machine().registers().get(Register::A), 0);
    assert_eq!(emu.machine().registers().get(Register::C), 0);
    let slot = emu.machine().tasks().slots()[0];
    assert_eq!(slot.status, TASK_QUEUED);
    assert!(!slot.dispatched);
    assert!(emu.host().loads.is_empty());

    emu.run(RunMode::FreeRun);
    assert_eq!(emu.halt_cause(), HaltCause::AUDIO);
    assert_eq!(emu.host().loads, vec![(0, "a".to_owned(), 4, 1)]);
    assert!(emu.machine().tasks().slots()[0].dispatched);

    assert!(emu.take_audio().is_some());
    emu.run(RunMode::FreeRun);
    assert_eq!(emu.host().loads.len(), 1);

    assert!(emu.task_end(0, 5));
    assert_eq!(emu.machine().tasks().slots()[0].status, TASK_COMPLETE | 5);
    assert!(!emu.task_end(0, 6));
    assert!(!emu.task_end(1, 0));
    assert_eq!(emu.machine().tasks().slots()[0].status, TASK_COMPLETE | 5);
}

#[test]
fn name_overwritten_after_the_call_is_dispatched_as_found() {
    let mut code = file_load(0x40, 4);
    code.pop();
    code.extend([encode_instruction(Opcode::MovR, 0, 0x20), 0x4141]);
    code.extend([encode_instruction(Opcode::MovO, 0, 0x22), NAME_AT]);
    let end = code.len() as u8;
    code.push(jump_to(end));

    let mut data = vec![0x4242; usize::from(NAME_AT) + 33];
    data[usize::from(NAME_AT)] = 0x6100;
    let mut emu = boot_with(&code, &data);

    emu.run(RunMode::FreeRun);
    assert_eq!(emu.halt_cause(), HaltCause::CALLBACK);
    emu.run(RunMode::FreeRun);
    assert_eq!(emu.halt_cause(), HaltCause::AUDIO);
    let name = format!("AA{}", "BB".repeat(31));
    assert_eq!(emu.host().loads, vec![(0, name, 4, 1)]);
    assert_eq!(emu.machine().tasks().slots()[0].status, TASK_QUEUED);
}

#[test]
fn callback_call_returns_the_host_value() {
    let mut code = Vec::new();
    code.extend(jsv16(0x10));
    code.extend([param4(2), param4(3), jump_to(4)]);
    let mut emu = boot(&code);

    assert_eq!(emu.run(RunMode::FreeRun), 200 + 1);
    assert_eq!(emu.halt_cause(), HaltCause::CALLBACK);
    assert_eq!(emu.machine().registers().get(Register::A), 2 * 16 + 3);
    assert_eq!(emu.machine().registers().pc(), 4);
}

#[test]
fn immediate_call_charges_its_table_cost() {
    let mut emu = boot(&[encode_instruction(Opcode::Jsv, 0, 0x03), jump_to(1)]);
    assert_eq!(emu.run(RunMode::SingleStep), 50);
    assert!(emu.halt_cause().is_empty());
    assert_eq!(emu.machine().registers().pc(), 1);
}

#[test]
fn unknown_id_and_wrong_count_are_rejected() {
    let mut emu = boot(&[encode_instruction(Opcode::Jsv, 0, 0x05), jump_to(1)]);
    assert_eq!(emu.run(RunMode::FreeRun), 0);
    assert_eq!(emu.halt_cause(), HaltCause::INVKCALL);

    let mut emu = boot(&[encode_instruction(Opcode::Jsv, 0, 0x03), param4(0), jump_to(2)]);
    assert_eq!(emu.run(RunMode::FreeRun), 0);
    assert_eq!(emu.halt_cause(), HaltCause::INVKCALL);
    assert_eq!(emu.machine().registers().pc(), 0);
}

fn user_list() -> Vec<u16> {
    let mut code = Vec::new();
    code.extend(jsv16(0x27));
    code.extend(param16(0x40));
    code.push(param4(8));
    code
}

#[test]
fn task_calls_report_a_full_slot_table() {
    let mut code = user_list();
    code.push(jump_to(0));
    let mut emu = boot(&code);

    for handle in 0..16 {
        assert!(emu.run(RunMode::FreeRun) > 0);
        assert_eq!(emu.halt_cause(), HaltCause::CALLBACK);
        assert_eq!(emu.machine().registers().get(Register::A), handle);
    }

    emu.run(RunMode::FreeRun);
    assert_eq!(emu.halt_cause(), HaltCause::AUDIO);
    assert_eq!(emu.machine().registers().get(Register::A), NO_FREE_SLOT);
    for slot in emu.machine().tasks().slots() {
        assert_eq!(slot.status, TASK_COMPLETE | TASK_RESULT_UNSUPPORTED);
    }
}

#[test]
fn program_queries_and_discards_a_finished_task() {
    let mut code = user_list();
    code.extend([
        encode_instruction(Opcode::Jsv, 0, 0x02),
        param4(0),
        encode_instruction(Opcode::Jsv, 0, 0x01),
        param4(0),
    ]);
    code.push(jump_to(9));
    let mut emu = boot(&code);

    assert_eq!(emu.run(RunMode::FreeRun), 800 + 1 + 1);
    assert_eq!(emu.machine().registers().pc(), 5);

    assert_eq!(emu.run(RunMode::SingleStep), 100);
    assert_eq!(emu.machine().registers().get(Register::A), TASK_QUEUED);
    assert!(emu.machine().tasks().slots()[0].is_complete());

    assert_eq!(emu.run(RunMode::SingleStep), 100);
    assert_eq!(
        emu.machine().registers().get(Register::A),
        TASK_COMPLETE | TASK_RESULT_UNSUPPORTED
    );
    assert!(emu.machine().tasks().all_empty());
}
