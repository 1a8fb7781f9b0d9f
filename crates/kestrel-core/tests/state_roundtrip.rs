//! State export/import integration coverage.

#![allow(
    clippy::pedantic,
    clippy::nursery,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::too_many_lines
)]

use bitflags as _;
use kestrel_core::kernel::{TASK_COMPLETE, TASK_RESULT_UNSUPPORTED};
use kestrel_core::{
    encode_instruction, AppHeader, CoreConfig, Emulator, EmulatorBuilder, HaltCause, ImageHost,
    InitProgress, LaneId, Opcode, RunMode, StackWindow, StateImage, ValidationKind,
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

fn store(addr: u16) -> [u16; 2] {
    [encode_instruction(Opcode::MovO, 0, 0x22), addr]
}

fn imm16(value: u16) -> [u16; 2] {
    [encode_instruction(Opcode::MovR, 0, 0x20), value]
}

/// Triggers the accelerator and the mixer, queues a user list task, then spins.
fn busy_program() -> Vec<u16> {
    let mut code = Vec::new();
    code.extend(imm16(31));
    code.extend(store(0xFC5E));
    code.extend(store(0xFC5F));
    code.push(encode_instruction(Opcode::MovR, 0, 0x0F));
    code.extend(store(0xFC3E));
    code.extend(store(0xFC3F));
    code.extend([encode_instruction(Opcode::Jsv, 0, 0x20), 0x27]);
    code.extend([encode_instruction(Opcode::Nop, 0, 0x20), 0x40]);
    code.push(encode_instruction(Opcode::Nop, 0, 0x08));
    let end = code.len() as u8;
    code.push(encode_instruction(Opcode::Jma, 0, end));
    code
}

fn boot(code: &[u16]) -> Emulator<ImageHost> {
    let header = AppHeader {
        code_words: code.len() as u16,
        data_words: 4,
        stack: StackWindow {
            bottom: 0x100,
            top: 0x200,
        },
        entry: 0,
        flags: 0,
    };
    let image = header.image(code, &[0x1111, 0x2222, 0x3333, 0x4444]);
    let mut emu = EmulatorBuilder::new(ImageHost::new(image))
        .config(QUIET)
        .build();
    assert_eq!(emu.init(), Ok(InitProgress::Ready));
    emu
}

fn advanced() -> Emulator<ImageHost> {
    let mut emu = boot(&busy_program());
    emu.run(RunMode::FreeRun);
    assert_eq!(emu.halt_cause(), HaltCause::CALLBACK);
    emu.run(RunMode::FreeRun);
    assert_eq!(emu.halt_cause(), HaltCause::AUDIO);
    assert_eq!(
        emu.machine().tasks().slots()[0].status,
        TASK_COMPLETE | TASK_RESULT_UNSUPPORTED
    );
    emu
}

#[test]
fn exported_state_survives_bytes_and_import() {
    let source = advanced();
    let image = source.export_state().expect("program loaded");
    let bytes = image.to_bytes();
    assert_eq!(bytes.len(), StateImage::BYTE_LEN);

    let mut target = boot(&busy_program());
    let parsed = StateImage::from_bytes(&bytes).expect("well-formed bytes");
    target.import_state(&parsed).expect("valid image");

    assert_eq!(target.export_state().expect("program loaded"), image);
    assert_eq!(target.halt_cause(), HaltCause::AUDIO);
    assert_eq!(target.machine().registers(), source.machine().registers());
    assert_eq!(target.machine().data(), source.machine().data());
    assert_eq!(target.machine().pram(), source.machine().pram());
}

#[test]
fn imported_instance_continues_in_lockstep() {
    let mut source = advanced();
    let mut target = boot(&busy_program());
    target
        .import_state(&source.export_state().expect("program loaded"))
        .expect("valid image");

    for emu in [&mut source, &mut target] {
        assert!(emu.take_audio().is_some());
    }
    for _ in 0..3 {
        let expected = source.run(RunMode::FreeRun);
        assert_eq!(target.run(RunMode::FreeRun), expected);
        assert_eq!(target.halt_cause(), source.halt_cause());
        source.take_audio();
        target.take_audio();
    }
    assert_eq!(
        target.export_state().expect("program loaded"),
        source.export_state().expect("program loaded")
    );
}

#[test]
fn lane_counters_are_carried_across() {
    let mut emu = boot(&busy_program());
    for _ in 0..5 {
        emu.run(RunMode::SingleStep);
    }
    let lanes = LaneId::ALL.map(|lane| *emu.machine().fifo().state(lane));
    assert!(lanes[LaneId::Accelerator.index()].busy > 0);

    let image = emu.export_state().expect("program loaded");
    let mut target = boot(&busy_program());
    target.import_state(&image).expect("valid image");
    for lane in LaneId::ALL {
        let state = target.machine().fifo().state(lane);
        assert_eq!(state.busy, lanes[lane.index()].busy);
        assert_eq!(state.count, lanes[lane.index()].count);
    }
}

#[test]
fn image_for_another_program_is_rejected() {
    let image = advanced().export_state().expect("program loaded");

    let mut other = boot(&[0x6800]);
    let error = other.import_state(&image).expect_err("different header");
    assert_eq!(error.kind, ValidationKind::ProgramMismatch);
    assert_eq!(other.run(RunMode::FreeRun), 3);

    let mut unloaded = EmulatorBuilder::new(ImageHost::default()).build();
    let error = unloaded.import_state(&image).expect_err("nothing loaded");
    assert_eq!(error.kind, ValidationKind::ProgramMismatch);
}

#[test]
fn truncated_bytes_are_rejected() {
    let bytes = advanced().export_state().expect("program loaded").to_bytes();
    let error = StateImage::from_bytes(&bytes[..bytes.len() - 1]).expect_err("short input");
    assert_eq!(error.kind, ValidationKind::ImageSize);
    assert_eq!(error.location as usize, StateImage::BYTE_LEN - 1);
}
