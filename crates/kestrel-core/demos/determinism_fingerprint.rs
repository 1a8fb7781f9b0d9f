//! Deterministic run fingerprint used for cross-host comparison.
//!
//! Boots a small program that drives the accelerator and polls the frame
//! counter, runs two frames with rendering on, and hashes every audio block
//! followed by the exported state.

#![allow(
    clippy::pedantic,
    clippy::nursery,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::too_many_lines
)]

use bitflags as _;
use kestrel_core::{
    encode_instruction, AppHeader, CoreConfig, EmulatorBuilder, HaltCause, ImageHost, Opcode,
    RunMode, StackWindow,
};
use log as _;
use proptest as _;
use rstest as _;
#[cfg(feature = "serde")]
use serde as _;
use thiserror as _;

const LANE_LATCH: u16 = 0xFC5E;
const LANE_DATA: u16 = 0xFC5F;

fn lane_write(code: &mut Vec<u16>, register: u16, value: u16) {
    code.extend([
        encode_instruction(Opcode::MovR, 0, 0x20),
        register,
        encode_instruction(Opcode::MovO, 0, 0x22),
        LANE_LATCH,
        encode_instruction(Opcode::MovR, 0, 0x20),
        value,
        encode_instruction(Opcode::MovO, 0, 0x22),
        LANE_DATA,
    ]);
}

fn program() -> Vec<u16> {
    let mut code = Vec::new();
    lane_write(&mut code, 10, 0x1234);
    lane_write(&mut code, 5, 64);
    lane_write(&mut code, 6, 4);
    lane_write(&mut code, 8, 64);
    lane_write(&mut code, 0, 1);
    lane_write(&mut code, 31, 0);

    let top = code.len() as u8;
    code.extend([
        encode_instruction(Opcode::AddR, 1, 0x01),
        encode_instruction(Opcode::AddR, 2, 0x29),
        encode_instruction(Opcode::Jsv, 0, 0x03),
        encode_instruction(Opcode::Jma, 0, 0x20),
        u16::from(top),
    ]);
    code
}

fn hash_bytes(hash: &mut u64, bytes: &[u8]) {
    for byte in bytes {
        *hash ^= u64::from(*byte);
        *hash = hash.wrapping_mul(0x1000_0000_01B3);
    }
}

fn fingerprint() -> String {
    let code = program();
    let header = AppHeader {
        code_words: code.len() as u16,
        data_words: 0,
        stack: StackWindow {
            bottom: 0x8000,
            top: 0x8100,
        },
        entry: 0,
        flags: 1,
    };
    let mut emu = EmulatorBuilder::new(ImageHost::new(header.image(&code, &[])))
        .config(CoreConfig {
            housekeeping: false,
            render_on_start: None,
        })
        .build();
    emu.init().expect("image should load");

    let mut hash = 0xcbf2_9ce4_8422_2325_u64;
    let mut frames = 0;
    let mut cycles = 0u64;
    while frames < 2 {
        cycles += u64::from(emu.run(RunMode::FreeRun));
        let cause = emu.halt_cause();
        if let Some(block) = emu.take_audio() {
            for [left, right] in block.samples {
                hash_bytes(&mut hash, &left.to_le_bytes());
                hash_bytes(&mut hash, &right.to_le_bytes());
            }
        }
        if cause.contains(HaltCause::FRAME) {
            frames += 1;
        }
        assert!(!cause.is_blocking() || cause == HaltCause::AUDIO, "{cause:?}");
    }

    hash_bytes(&mut hash, &cycles.to_le_bytes());
    let state = emu.export_state().expect("program is loaded");
    hash_bytes(&mut hash, &state.to_bytes());
    format!("{hash:016x}")
}

fn main() {
    println!("{}", fingerprint());
}
