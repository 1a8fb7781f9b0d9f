#![no_main]

use kestrel_core::{
    disassemble, AppHeader, CoreConfig, EmulatorBuilder, ImageHost, RunMode, StackWindow,
    StateImage,
};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let code: Vec<u16> = data
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .take(0x400)
        .collect();
    if code.is_empty() {
        return;
    }

    let header = AppHeader {
        code_words: code.len() as u16,
        data_words: 0x100,
        stack: StackWindow {
            bottom: 0x8000,
            top: 0x8400,
        },
        entry: 0,
        flags: 0,
    };
    let mut emu = EmulatorBuilder::new(ImageHost::new(header.image(&code, &code)))
        .config(CoreConfig {
            housekeeping: true,
            render_on_start: Some(false),
        })
        .build();
    if emu.init().is_err() {
        return;
    }

    for _ in 0..64 {
        let _ = disassemble(&code, emu.machine().registers().pc());
        let _ = emu.run(RunMode::FreeRun);
        let cause = emu.halt_cause();
        let _ = emu.take_audio();
        emu.clear_halt(cause);
        for handle in 0..16 {
            let _ = emu.task_end(handle, 0);
        }
    }

    if let Ok(image) = emu.export_state() {
        let bytes = image.to_bytes();
        if let Ok(parsed) = StateImage::from_bytes(&bytes) {
            let _ = emu.import_state(&parsed);
        }
    }
});
