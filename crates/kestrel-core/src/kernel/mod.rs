//! Kernel call dispatcher.
//!
//! `JSV` hands its parameters here. The first parameter selects the call and
//! the count must match exactly. Calls either finish in-line, call into the
//! host and raise `CALLBACK`, or validate their pointers and queue a task slot
//! that [`schedule`] later hands to the host.

/// Task slots, task validation and the scheduler.
pub mod tasks;

use log::debug;
use thiserror::Error;

use crate::api::Host;
use crate::bus::{Bus, DISPLAY_BASE};
use crate::memory::{validate_range, AccessError};
use crate::{HaltCause, Machine};

pub use tasks::{
    schedule, task_end, TaskRequest, TaskSlot, TaskTable, TASK_COMPLETE, TASK_EMPTY,
    TASK_PARAM_WORDS, TASK_QUEUED, TASK_RESULT_FAILED, TASK_RESULT_OK, TASK_RESULT_UNSUPPORTED,
    TASK_SLOTS,
};

/// Words in a user id.
pub const USER_ID_WORDS: u16 = 8;
/// Words in a file name buffer filled by the host.
pub const NAME_BUFFER_WORDS: u16 = 32;
/// Low result returned by a task call when every slot is taken.
pub const NO_FREE_SLOT: u16 = 0xFFFF;

/// How a kernel call completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallShape {
    /// Result computed in-line from core state.
    Immediate,
    /// Result produced synchronously by the host; raises `CALLBACK`.
    Callback,
    /// Queued into a task slot; raises `CALLBACK` once queued.
    Task,
}

/// Defined kernel calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u16)]
#[allow(missing_docs)]
pub enum KernelCall {
    TaskDiscard = 0x01,
    TaskQuery = 0x02,
    FrameCounter = 0x03,
    SetDisplay = 0x04,
    DigitalInput = 0x10,
    AnalogInput = 0x11,
    LocalUser = 0x12,
    BinaryLoad = 0x20,
    FileLoad = 0x21,
    FileSave = 0x22,
    FileNext = 0x23,
    FileMove = 0x24,
    UserName = 0x25,
    PacketSend = 0x26,
    UserList = 0x27,
}

/// Every kernel call with its parameter count (id included), shape and cycle cost.
pub const KERNEL_CALL_TABLE: &[(KernelCall, usize, CallShape, u32)] = &[
    (KernelCall::TaskDiscard, 2, CallShape::Immediate, 100),
    (KernelCall::TaskQuery, 2, CallShape::Immediate, 100),
    (KernelCall::FrameCounter, 1, CallShape::Immediate, 50),
    (KernelCall::SetDisplay, 2, CallShape::Immediate, 100),
    (KernelCall::DigitalInput, 3, CallShape::Callback, 200),
    (KernelCall::AnalogInput, 3, CallShape::Callback, 200),
    (KernelCall::LocalUser, 2, CallShape::Callback, 400),
    (KernelCall::BinaryLoad, 5, CallShape::Task, 800),
    (KernelCall::FileLoad, 6, CallShape::Task, 800),
    (KernelCall::FileSave, 4, CallShape::Task, 800),
    (KernelCall::FileNext, 3, CallShape::Task, 800),
    (KernelCall::FileMove, 3, CallShape::Task, 800),
    (KernelCall::UserName, 4, CallShape::Task, 800),
    (KernelCall::PacketSend, 4, CallShape::Task, 800),
    (KernelCall::UserList, 3, CallShape::Task, 800),
];

impl KernelCall {
    /// Looks up a call id.
    #[must_use]
    pub fn from_u16(id: u16) -> Option<Self> {
        KERNEL_CALL_TABLE
            .iter()
            .find_map(|(call, _, _, _)| (call.id() == id).then_some(*call))
    }

    /// Call id as passed in the first parameter.
    #[must_use]
    pub const fn id(self) -> u16 {
        self as u16
    }

    fn entry(self) -> (usize, CallShape, u32) {
        KERNEL_CALL_TABLE
            .iter()
            .find_map(|(call, count, shape, cycles)| {
                (*call == self).then_some((*count, *shape, *cycles))
            })
            .unwrap_or((0, CallShape::Immediate, 0))
    }

    /// Required parameter count, call id included.
    #[must_use]
    pub fn parameter_count(self) -> usize {
        self.entry().0
    }

    /// Completion shape.
    #[must_use]
    pub fn shape(self) -> CallShape {
        self.entry().1
    }

    /// Cycles charged on success.
    #[must_use]
    pub fn cycles(self) -> u32 {
        self.entry().2
    }
}

/// Result of a successful kernel call; `low` lands in `A`, `high` in `C`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct KernelReturn {
    /// Cycles charged for the call itself.
    pub cycles: u32,
    /// High result word.
    pub high: u16,
    /// Low result word.
    pub low: u16,
}

/// Reasons a kernel call is rejected with `INVKCALL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum KernelCallError {
    /// The call id is not defined.
    #[error("unknown kernel call {id:#06x}")]
    UnknownCall {
        /// Requested id.
        id: u16,
    },
    /// The call received the wrong number of parameters.
    #[error("{call:?} expects {expected} parameters, got {found}")]
    ParameterCount {
        /// Requested call.
        call: KernelCall,
        /// Required count, id included.
        expected: usize,
        /// Supplied count, id included.
        found: usize,
    },
    /// A task handle is not in `0..16`.
    #[error("task handle {handle} out of range")]
    InvalidHandle {
        /// Supplied handle.
        handle: u16,
    },
    /// A pointer parameter failed data-window validation.
    #[error(transparent)]
    Access(#[from] AccessError),
}

fn task_handle(handle: u16) -> Result<usize, KernelCallError> {
    let index = usize::from(handle);
    if index < TASK_SLOTS {
        Ok(index)
    } else {
        Err(KernelCallError::InvalidHandle { handle })
    }
}

/// Executes the kernel call described by `params`.
///
/// # Errors
///
/// Returns [`KernelCallError`] for an unknown id, a wrong parameter count, an
/// out-of-range handle or a pointer outside the data window. Nothing is
/// mutated in that case.
pub fn dispatch(
    bus: &Bus,
    m: &mut Machine,
    host: &mut dyn Host,
    params: &[u16],
) -> Result<KernelReturn, KernelCallError> {
    let Some((&id, args)) = params.split_first() else {
        return Err(KernelCallError::UnknownCall { id: 0 });
    };
    let call = KernelCall::from_u16(id).ok_or(KernelCallError::UnknownCall { id })?;
    if params.len() != call.parameter_count() {
        return Err(KernelCallError::ParameterCount {
            call,
            expected: call.parameter_count(),
            found: params.len(),
        });
    }

    let (high, low) = match call {
        KernelCall::TaskDiscard => (0, m.tasks.discard(task_handle(args[0])?)),
        KernelCall::TaskQuery => (0, m.tasks.query(task_handle(args[0])?)),
        KernelCall::FrameCounter => {
            let frame = m.video.frame;
            ((frame >> 16) as u16, (frame & 0xFFFF) as u16)
        }
        KernelCall::SetDisplay => {
            bus.set(m, DISPLAY_BASE, args[0]);
            (0, 0)
        }
        KernelCall::DigitalInput => {
            let value = host.digital_input(args[0], args[1]);
            m.raise(HaltCause::CALLBACK);
            (0, value)
        }
        KernelCall::AnalogInput => {
            let value = host.analog_input(args[0], args[1]);
            m.raise(HaltCause::CALLBACK);
            (0, value)
        }
        KernelCall::LocalUser => {
            validate_range(args[0], USER_ID_WORDS)?;
            let start = usize::from(args[0]);
            host.local_user(&mut m.data[start..start + usize::from(USER_ID_WORDS)]);
            m.raise(HaltCause::CALLBACK);
            (0, 0)
        }
        _ => {
            TaskRequest::parse(call, args, &m.data)?;
            match m.tasks.allocate(call, args) {
                Some(handle) => {
                    debug!("{call:?} queued as task {handle}");
                    m.raise(HaltCause::CALLBACK);
                    (0, handle)
                }
                None => {
                    debug!("{call:?} rejected: no free task slot");
                    (0, NO_FREE_SLOT)
                }
            }
        }
    };

    debug!("kernel call {call:?} returned {high:#06x}:{low:#06x}");
    Ok(KernelReturn {
        cycles: call.cycles(),
        high,
        low,
    })
}
