//! State export and import.
//!
//! A [`StateImage`] is a 2048-word control block followed by data memory and
//! peripheral memory. The code store is not part of the image: it belongs to
//! the loaded program, identified by the header copy in the control block.
//!
//! Control block layout (word offsets):
//!
//! | Offset | Contents |
//! |---|---|
//! | `0x000..0x400` | register bus backing cells |
//! | `0x400..0x410` | application header |
//! | `0x410..0x41D` | CPU registers `A..X3 XM XH PC SP BP` |
//! | `0x420` | halt causes |
//! | `0x421..0x423` | bus stall, high / low |
//! | `0x424..0x426` | housekeeping budget, high / low |
//! | `0x428..0x42D` | lane A: head, count, busy high / low, flags |
//! | `0x430..0x435` | lane B, same layout |
//! | `0x438..0x43D` | audio: sample cycles, cursor high / low, fill, blocks |
//! | `0x440..0x445` | video: line cycles, line, frame high / low, rendering |
//! | `0x480..0x580` | 16 task slots of 16 words: status, dispatched, call, count, params |
//!
//! Every other word is reserved and must be zero.

use log::{debug, warn};

use crate::fault::{ValidationArea, ValidationError, ValidationKind};
use crate::fifo::{capacity_for_size, ring_capacity, LaneId, LaneState, LANE_RING_SIZE};
use crate::init::{AppHeader, HEADER_WORDS};
use crate::kernel::{CallShape, KernelCall, TaskSlot, TaskTable, TASK_PARAM_WORDS, TASK_SLOTS};
use crate::memory::{BUS_CELLS, DATA_WORDS, PRAM_WORDS};
use crate::state::{Registers, HOUSEKEEPING_INTERVAL};
use crate::timers::{
    AudioTimer, VideoTimer, CYCLES_PER_LINE, CYCLES_PER_SAMPLE, LINES_PER_FRAME,
    SAMPLES_PER_AUDIO_TICK,
};
use crate::{HaltCause, Machine};

/// Words in the control block.
pub const CONTROL_WORDS: usize = 2048;

const HEADER_AT: usize = 0x400;
const REGISTERS_AT: usize = 0x410;
const REGISTER_WORDS: usize = 13;
const HALT_AT: usize = 0x420;
const STALL_AT: usize = 0x421;
const HOUSEKEEPING_AT: usize = 0x424;
const LANE_AT: [usize; 2] = [0x428, 0x430];
const LANE_WORDS: usize = 5;
const AUDIO_AT: usize = 0x438;
const AUDIO_WORDS: usize = 5;
const VIDEO_AT: usize = 0x440;
const VIDEO_WORDS: usize = 5;
const TASKS_AT: usize = 0x480;
const TASK_WORDS: usize = 16;

const LANE_FLAG_OVERFLOW: u16 = 1 << 0;

/// Every used control-block range, for the reserved-word check.
const USED_RANGES: [(usize, usize); 11] = [
    (0, BUS_CELLS),
    (HEADER_AT, HEADER_WORDS),
    (REGISTERS_AT, REGISTER_WORDS),
    (HALT_AT, 1),
    (STALL_AT, 2),
    (HOUSEKEEPING_AT, 2),
    (LANE_AT[0], LANE_WORDS),
    (LANE_AT[1], LANE_WORDS),
    (AUDIO_AT, AUDIO_WORDS),
    (VIDEO_AT, VIDEO_WORDS),
    (TASKS_AT, TASK_SLOTS * TASK_WORDS),
];

const _: () = assert_layout();

const fn assert_layout() {
    let mut index = 1;
    while index < USED_RANGES.len() {
        let (previous, previous_len) = USED_RANGES[index - 1];
        assert!(
            previous + previous_len <= USED_RANGES[index].0,
            "control block ranges must not overlap"
        );
        index += 1;
    }
    assert!(TASKS_AT + TASK_SLOTS * TASK_WORDS <= CONTROL_WORDS);
    assert!(4 + TASK_PARAM_WORDS == TASK_WORDS);
}

/// Flat copy of everything a running program can change.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct StateImage {
    /// Control block.
    pub control: Box<[u16]>,
    /// Data memory.
    pub data: Box<[u16]>,
    /// Peripheral memory.
    pub pram: Box<[u32]>,
}

impl StateImage {
    /// Size of [`StateImage::to_bytes`] output.
    pub const BYTE_LEN: usize = CONTROL_WORDS * 2 + DATA_WORDS * 2 + PRAM_WORDS * 4;

    /// Big-endian flat form.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(Self::BYTE_LEN);
        for word in self.control.iter().chain(self.data.iter()) {
            bytes.extend_from_slice(&word.to_be_bytes());
        }
        for word in self.pram.iter() {
            bytes.extend_from_slice(&word.to_be_bytes());
        }
        bytes
    }

    /// Parses the flat form; contents are checked on import.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationKind::ImageSize`] when `bytes` has the wrong length.
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ValidationError> {
        if bytes.len() != Self::BYTE_LEN {
            return Err(ValidationError::new(
                ValidationKind::ImageSize,
                bytes.len() as u32,
            ));
        }
        let (words, pram) = bytes.split_at((CONTROL_WORDS + DATA_WORDS) * 2);
        let words: Vec<u16> = words
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        let (control, data) = words.split_at(CONTROL_WORDS);
        let pram: Vec<u32> = pram
            .chunks_exact(4)
            .map(|quad| u32::from_be_bytes([quad[0], quad[1], quad[2], quad[3]]))
            .collect();
        Ok(Self {
            control: control.into(),
            data: data.into(),
            pram: pram.into_boxed_slice(),
        })
    }
}

const fn split(value: u32) -> [u16; 2] {
    [(value >> 16) as u16, (value & 0xFFFF) as u16]
}

const fn join(high: u16, low: u16) -> u32 {
    ((high as u32) << 16) | low as u32
}

/// Captures `m`, running `header`.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn export(m: &Machine, header: &AppHeader) -> StateImage {
    let mut control = vec![0u16; CONTROL_WORDS];
    control[..BUS_CELLS].copy_from_slice(&m.cells);
    control[HEADER_AT..HEADER_AT + HEADER_WORDS].copy_from_slice(&header.to_words());
    control[REGISTERS_AT..REGISTERS_AT + REGISTER_WORDS].copy_from_slice(&m.regs.to_words());
    control[HALT_AT] = m.halt.bits();
    control[STALL_AT..STALL_AT + 2].copy_from_slice(&split(m.stall));
    control[HOUSEKEEPING_AT..HOUSEKEEPING_AT + 2].copy_from_slice(&split(m.housekeeping));

    for lane in LaneId::ALL {
        let state = m.fifo.state(lane);
        let [busy_hi, busy_lo] = split(state.busy);
        let flags = if state.overflow { LANE_FLAG_OVERFLOW } else { 0 };
        let at = LANE_AT[lane.index()];
        control[at..at + LANE_WORDS]
            .copy_from_slice(&[state.head, state.count, busy_hi, busy_lo, flags]);
    }

    let [cursor_hi, cursor_lo] = split(m.audio.cursor);
    control[AUDIO_AT..AUDIO_AT + AUDIO_WORDS].copy_from_slice(&[
        m.audio.sample_cycles as u16,
        cursor_hi,
        cursor_lo,
        m.audio.fill,
        m.audio.blocks,
    ]);
    let [frame_hi, frame_lo] = split(m.video.frame);
    control[VIDEO_AT..VIDEO_AT + VIDEO_WORDS].copy_from_slice(&[
        m.video.line_cycles as u16,
        m.video.line,
        frame_hi,
        frame_lo,
        u16::from(m.video.rendering),
    ]);

    for (index, slot) in m.tasks.slots().iter().enumerate() {
        let at = TASKS_AT + index * TASK_WORDS;
        control[at..at + 4].copy_from_slice(&[
            slot.status,
            u16::from(slot.dispatched),
            slot.call,
            slot.param_count,
        ]);
        control[at + 4..at + TASK_WORDS].copy_from_slice(&slot.params);
    }

    StateImage {
        control: control.into_boxed_slice(),
        data: m.data.clone(),
        pram: m.pram.clone(),
    }
}

/// Everything decoded from a control block, applied only once fully valid.
struct Decoded {
    registers: Registers,
    halt: HaltCause,
    stall: u32,
    housekeeping: u32,
    lanes: [LaneState; 2],
    audio: AudioTimer,
    video: VideoTimer,
    tasks: TaskTable,
}

#[allow(clippy::cast_possible_truncation)]
fn reject(kind: ValidationKind, location: usize) -> ValidationError {
    ValidationError::new(kind, location as u32).in_area(ValidationArea::Snapshot)
}

fn check(ok: bool, kind: ValidationKind, location: usize) -> Result<(), ValidationError> {
    if ok {
        Ok(())
    } else {
        Err(reject(kind, location))
    }
}

fn decode_slot(words: &[u16], at: usize) -> Result<TaskSlot, ValidationError> {
    let mut params = [0; TASK_PARAM_WORDS];
    params.copy_from_slice(&words[4..TASK_WORDS]);
    let slot = TaskSlot {
        status: words[0],
        dispatched: words[1] == 1,
        call: words[2],
        param_count: words[3],
        params,
    };
    check(slot.has_valid_status(), ValidationKind::TaskSlot, at)?;
    check(words[1] <= 1, ValidationKind::TaskSlot, at + 1)?;
    check(!slot.dispatched || slot.is_queued(), ValidationKind::TaskSlot, at + 1)?;

    let count = usize::from(slot.param_count);
    if slot.is_empty() {
        check(
            words[1..].iter().all(|word| *word == 0),
            ValidationKind::TaskSlot,
            at,
        )?;
    } else {
        let call = KernelCall::from_u16(slot.call)
            .filter(|call| call.shape() == CallShape::Task)
            .ok_or_else(|| reject(ValidationKind::TaskSlot, at + 2))?;
        check(
            count + 1 == call.parameter_count(),
            ValidationKind::TaskSlot,
            at + 3,
        )?;
        check(
            params[count..].iter().all(|word| *word == 0),
            ValidationKind::TaskSlot,
            at + 4 + count,
        )?;
    }
    Ok(slot)
}

fn decode_control(control: &[u16]) -> Result<Decoded, ValidationError> {
    let mut reserved = 0;
    for (start, len) in USED_RANGES {
        if let Some(offset) = control[reserved..start].iter().position(|word| *word != 0) {
            return Err(reject(ValidationKind::ReservedWord, reserved + offset));
        }
        reserved = start + len;
    }
    if let Some(offset) = control[reserved..].iter().position(|word| *word != 0) {
        return Err(reject(ValidationKind::ReservedWord, reserved + offset));
    }

    let mut register_words = [0; REGISTER_WORDS];
    register_words.copy_from_slice(&control[REGISTERS_AT..REGISTERS_AT + REGISTER_WORDS]);

    let halt = HaltCause::from_bits(control[HALT_AT])
        .filter(|halt| !halt.contains(HaltCause::INIT))
        .ok_or_else(|| reject(ValidationKind::Register, HALT_AT))?;

    let housekeeping = join(control[HOUSEKEEPING_AT], control[HOUSEKEEPING_AT + 1]);
    check(
        housekeeping <= HOUSEKEEPING_INTERVAL,
        ValidationKind::TimerState,
        HOUSEKEEPING_AT,
    )?;

    let mut lanes = [LaneState::default(); 2];
    for lane in LaneId::ALL {
        let at = LANE_AT[lane.index()];
        let words = &control[at..at + LANE_WORDS];
        let capacity =
            capacity_for_size(control[usize::from(lane.control_base() + LANE_RING_SIZE)]);
        check(words[0] < capacity, ValidationKind::LaneState, at)?;
        check(words[1] <= capacity, ValidationKind::LaneState, at + 1)?;
        check(words[4] & !LANE_FLAG_OVERFLOW == 0, ValidationKind::LaneState, at + 4)?;
        lanes[lane.index()] = LaneState {
            head: words[0],
            count: words[1],
            busy: join(words[2], words[3]),
            overflow: words[4] & LANE_FLAG_OVERFLOW != 0,
            dirty: true,
        };
    }

    let audio = &control[AUDIO_AT..AUDIO_AT + AUDIO_WORDS];
    check(
        u32::from(audio[0]) < CYCLES_PER_SAMPLE,
        ValidationKind::TimerState,
        AUDIO_AT,
    )?;
    check(
        audio[3] < SAMPLES_PER_AUDIO_TICK,
        ValidationKind::TimerState,
        AUDIO_AT + 3,
    )?;
    let video = &control[VIDEO_AT..VIDEO_AT + VIDEO_WORDS];
    check(
        u32::from(video[0]) < CYCLES_PER_LINE,
        ValidationKind::TimerState,
        VIDEO_AT,
    )?;
    check(video[1] < LINES_PER_FRAME, ValidationKind::TimerState, VIDEO_AT + 1)?;
    check(video[4] <= 1, ValidationKind::TimerState, VIDEO_AT + 4)?;

    let mut tasks = TaskTable::default();
    for index in 0..TASK_SLOTS {
        let at = TASKS_AT + index * TASK_WORDS;
        tasks.slots_mut()[index] = decode_slot(&control[at..at + TASK_WORDS], at)?;
    }

    Ok(Decoded {
        registers: Registers::from_words(&register_words),
        halt,
        stall: join(control[STALL_AT], control[STALL_AT + 1]),
        housekeeping,
        lanes,
        audio: AudioTimer {
            sample_cycles: u32::from(audio[0]),
            cursor: join(audio[1], audio[2]),
            fill: audio[3],
            blocks: audio[4],
        },
        video: VideoTimer {
            line_cycles: u32::from(video[0]),
            line: video[1],
            frame: join(video[2], video[3]),
            rendering: video[4] == 1,
        },
        tasks,
    })
}

/// Validates `image` completely, then replaces the state of `m` with it.
///
/// `loaded` is the header of the program in the code store; the image must
/// carry the same header.
///
/// # Errors
///
/// Returns the first [`ValidationError`] found; `m` is left untouched.
pub fn import(
    m: &mut Machine,
    loaded: Option<&AppHeader>,
    image: &StateImage,
) -> Result<AppHeader, ValidationError> {
    let result = validate(loaded, image);
    let (header, decoded) = match result {
        Ok(valid) => valid,
        Err(error) => {
            warn!("state import rejected: {error}");
            return Err(error);
        }
    };

    m.cells.copy_from_slice(&image.control[..BUS_CELLS]);
    m.data.copy_from_slice(&image.data);
    m.pram.copy_from_slice(&image.pram);
    m.regs = decoded.registers;
    m.stack = header.stack;
    m.halt = decoded.halt;
    m.stall = decoded.stall;
    m.housekeeping = decoded.housekeeping;
    for lane in LaneId::ALL {
        *m.fifo.state_mut(lane) = decoded.lanes[lane.index()];
    }
    m.audio = decoded.audio;
    m.video = decoded.video;
    m.tasks = decoded.tasks;
    debug!(
        "state imported at pc {:#06x}, ring capacities {} / {}",
        m.regs.pc(),
        ring_capacity(m, LaneId::Mixer),
        ring_capacity(m, LaneId::Accelerator)
    );
    Ok(header)
}

fn validate(
    loaded: Option<&AppHeader>,
    image: &StateImage,
) -> Result<(AppHeader, Decoded), ValidationError> {
    check(image.control.len() == CONTROL_WORDS, ValidationKind::ImageSize, 0)?;
    check(image.data.len() == DATA_WORDS, ValidationKind::ImageSize, CONTROL_WORDS)?;
    check(
        image.pram.len() == PRAM_WORDS,
        ValidationKind::ImageSize,
        CONTROL_WORDS + DATA_WORDS,
    )?;

    let mut header_words = [0; HEADER_WORDS];
    header_words.copy_from_slice(&image.control[HEADER_AT..HEADER_AT + HEADER_WORDS]);
    let header = AppHeader::parse(&header_words).map_err(|error| {
        reject(error.kind, HEADER_AT + error.location as usize)
    })?;
    check(
        loaded == Some(&header),
        ValidationKind::ProgramMismatch,
        HEADER_AT,
    )?;

    let decoded = decode_control(&image.control)?;
    Ok((header, decoded))
}
