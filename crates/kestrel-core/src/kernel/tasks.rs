use log::{debug, warn};

use crate::api::{Host, TaskProgress};
use crate::kernel::{CallShape, KernelCall, KernelCallError, NAME_BUFFER_WORDS, USER_ID_WORDS};
use crate::memory::{read_name_prefix, validate_name, validate_range};
use crate::{HaltCause, Machine};

/// Number of kernel task slots.
pub const TASK_SLOTS: usize = 16;
/// Parameter words stored per slot, call id excluded.
pub const TASK_PARAM_WORDS: usize = 12;

/// Slot status: free.
pub const TASK_EMPTY: u16 = 0x0000;
/// Slot status: queued, running once dispatched.
pub const TASK_QUEUED: u16 = 0x0001;
/// Slot status flag: completed; the low bits hold the result.
pub const TASK_COMPLETE: u16 = 0x8000;

/// Task result: success.
pub const TASK_RESULT_OK: u16 = 0;
/// Task result: the host tried and failed.
pub const TASK_RESULT_FAILED: u16 = 1;
/// Task result: the host does not implement the operation.
pub const TASK_RESULT_UNSUPPORTED: u16 = 2;

/// One kernel task record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct TaskSlot {
    /// `TASK_EMPTY`, `TASK_QUEUED` or `TASK_COMPLETE | result`.
    pub status: u16,
    /// Handed to the host; never dispatched twice.
    pub dispatched: bool,
    /// Kernel call id that queued the task.
    pub call: u16,
    /// Number of valid words in `params`.
    pub param_count: u16,
    /// Call parameters after the id.
    pub params: [u16; TASK_PARAM_WORDS],
}

impl TaskSlot {
    /// Valid parameters.
    #[must_use]
    pub fn params(&self) -> &[u16] {
        let count = usize::from(self.param_count).min(TASK_PARAM_WORDS);
        &self.params[..count]
    }

    /// Returns `true` for a free slot.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.status == TASK_EMPTY
    }

    /// Returns `true` while queued or running.
    #[must_use]
    pub const fn is_queued(&self) -> bool {
        self.status == TASK_QUEUED
    }

    /// Returns `true` once the host reported a result.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.status & TASK_COMPLETE != 0
    }

    /// Returns `true` for status values the core can produce.
    #[must_use]
    pub const fn has_valid_status(&self) -> bool {
        self.is_empty() || self.is_queued() || self.is_complete()
    }
}

/// The 16 task slots.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct TaskTable {
    slots: [TaskSlot; TASK_SLOTS],
}

impl TaskTable {
    /// All slots in handle order.
    #[must_use]
    pub const fn slots(&self) -> &[TaskSlot; TASK_SLOTS] {
        &self.slots
    }

    pub(crate) const fn slots_mut(&mut self) -> &mut [TaskSlot; TASK_SLOTS] {
        &mut self.slots
    }

    /// Slot for `handle`, if in range.
    #[must_use]
    pub fn slot(&self, handle: u16) -> Option<&TaskSlot> {
        self.slots.get(usize::from(handle))
    }

    /// Returns `true` when every slot is free.
    #[must_use]
    pub fn all_empty(&self) -> bool {
        self.slots.iter().all(TaskSlot::is_empty)
    }

    /// Queues `call` in the first free slot and returns its handle.
    #[allow(clippy::cast_possible_truncation)]
    pub fn allocate(&mut self, call: KernelCall, args: &[u16]) -> Option<u16> {
        let index = self.slots.iter().position(TaskSlot::is_empty)?;
        let count = args.len().min(TASK_PARAM_WORDS);
        let mut params = [0; TASK_PARAM_WORDS];
        params[..count].copy_from_slice(&args[..count]);
        self.slots[index] = TaskSlot {
            status: TASK_QUEUED,
            dispatched: false,
            call: call.id(),
            param_count: count as u16,
            params,
        };
        Some(index as u16)
    }

    /// Status of slot `index`.
    #[must_use]
    pub fn query(&self, index: usize) -> u16 {
        self.slots.get(index).map_or(TASK_EMPTY, |slot| slot.status)
    }

    /// Frees slot `index` when it is complete and returns its previous status.
    ///
    /// Queued and running slots are left untouched.
    pub fn discard(&mut self, index: usize) -> u16 {
        let Some(slot) = self.slots.get_mut(index) else {
            return TASK_EMPTY;
        };
        let status = slot.status;
        if slot.is_complete() || slot.is_empty() {
            *slot = TaskSlot::default();
        }
        status
    }

    /// Marks a dispatched, queued slot complete.
    pub fn complete(&mut self, handle: u16, result: u16) -> bool {
        match self.slots.get_mut(usize::from(handle)) {
            Some(slot) if slot.is_queued() && slot.dispatched => {
                slot.status = result | TASK_COMPLETE;
                slot.dispatched = false;
                true
            }
            _ => false,
        }
    }
}

/// A validated task request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum TaskRequest {
    BinaryLoad { dest: u16, len: u16, offset: u32 },
    FileLoad { name: u16, dest: u16, len: u16, offset: u32 },
    FileSave { name: u16, src: u16, len: u16 },
    FileNext { name: u16, dest: u16 },
    FileMove { from: u16, to: u16 },
    UserName { user: u16, dest: u16, len: u16 },
    PacketSend { user: u16, src: u16, len: u16 },
    UserList { dest: u16, len: u16 },
}

const fn join(high: u16, low: u16) -> u32 {
    ((high as u32) << 16) | low as u32
}

impl TaskRequest {
    /// Validates the arguments of a task-class call against `data`.
    ///
    /// # Errors
    ///
    /// Returns [`KernelCallError`] when the call is not a task, the argument
    /// count is wrong, or any pointer fails data-window validation.
    pub fn parse(call: KernelCall, args: &[u16], data: &[u16]) -> Result<Self, KernelCallError> {
        let request = Self::from_params(call, args)?;
        request.validate_names(data)?;
        Ok(request)
    }

    /// Rebuilds a request from stored slot parameters.
    ///
    /// Only checks that depend on the parameters alone are repeated; name
    /// contents belong to the program once the call was accepted.
    ///
    /// # Errors
    ///
    /// Returns [`KernelCallError`] when the call is not a task, the argument
    /// count is wrong, or a span or name pointer leaves the data window.
    pub fn from_params(call: KernelCall, args: &[u16]) -> Result<Self, KernelCallError> {
        let found = args.len() + 1;
        if call.shape() != CallShape::Task || found != call.parameter_count() {
            return Err(KernelCallError::ParameterCount {
                call,
                expected: call.parameter_count(),
                found,
            });
        }

        let request = match call {
            KernelCall::BinaryLoad => Self::BinaryLoad {
                dest: args[0],
                len: args[1],
                offset: join(args[2], args[3]),
            },
            KernelCall::FileLoad => Self::FileLoad {
                name: args[0],
                dest: args[1],
                len: args[2],
                offset: join(args[3], args[4]),
            },
            KernelCall::FileSave => Self::FileSave {
                name: args[0],
                src: args[1],
                len: args[2],
            },
            KernelCall::FileNext => Self::FileNext {
                name: args[0],
                dest: args[1],
            },
            KernelCall::FileMove => Self::FileMove {
                from: args[0],
                to: args[1],
            },
            KernelCall::UserName => Self::UserName {
                user: args[0],
                dest: args[1],
                len: args[2],
            },
            KernelCall::PacketSend => Self::PacketSend {
                user: args[0],
                src: args[1],
                len: args[2],
            },
            _ => Self::UserList {
                dest: args[0],
                len: args[1],
            },
        };
        request.validate_spans()?;
        Ok(request)
    }

    fn validate_spans(self) -> Result<(), KernelCallError> {
        match self {
            Self::BinaryLoad { dest, len, .. } | Self::UserList { dest, len } => {
                validate_range(dest, len)?;
            }
            Self::FileLoad { name, dest, len, .. } | Self::FileSave { name, src: dest, len } => {
                validate_range(name, 1)?;
                validate_range(dest, len)?;
            }
            Self::FileNext { name, dest } => {
                validate_range(name, 1)?;
                validate_range(dest, NAME_BUFFER_WORDS)?;
            }
            Self::FileMove { from, to } => {
                validate_range(from, 1)?;
                validate_range(to, 1)?;
            }
            Self::UserName { user, dest, len } | Self::PacketSend { user, src: dest, len } => {
                validate_range(user, USER_ID_WORDS)?;
                validate_range(dest, len)?;
            }
        }
        Ok(())
    }

    fn validate_names(self, data: &[u16]) -> Result<(), KernelCallError> {
        match self {
            Self::FileLoad { name, .. }
            | Self::FileSave { name, .. }
            | Self::FileNext { name, .. } => {
                validate_name(data, name)?;
            }
            Self::FileMove { from, to } => {
                validate_name(data, from)?;
                validate_name(data, to)?;
            }
            _ => {}
        }
        Ok(())
    }
}

fn span(start: u16, len: u16) -> std::ops::Range<usize> {
    usize::from(start)..usize::from(start) + usize::from(len)
}

fn user_id(data: &[u16], user: u16) -> [u16; USER_ID_WORDS as usize] {
    let mut id = [0; USER_ID_WORDS as usize];
    id.copy_from_slice(&data[span(user, USER_ID_WORDS)]);
    id
}

fn run_task(
    m: &mut Machine,
    host: &mut dyn Host,
    handle: u16,
    request: TaskRequest,
) -> TaskProgress {
    let data = &mut m.data;
    match request {
        TaskRequest::BinaryLoad { dest, len, offset } => {
            host.binary_load(handle, &mut data[span(dest, len)], offset)
        }
        TaskRequest::FileLoad {
            name,
            dest,
            len,
            offset,
        } => {
            let name = read_name_prefix(data, name);
            host.file_load(handle, &name, &mut data[span(dest, len)], offset)
        }
        TaskRequest::FileSave { name, src, len } => {
            let name = read_name_prefix(data, name);
            host.file_save(handle, &name, &data[span(src, len)])
        }
        TaskRequest::FileNext { name, dest } => {
            let name = read_name_prefix(data, name);
            host.file_next(handle, &name, &mut data[span(dest, NAME_BUFFER_WORDS)])
        }
        TaskRequest::FileMove { from, to } => {
            let from = read_name_prefix(data, from);
            let to = read_name_prefix(data, to);
            host.file_move(handle, &from, &to)
        }
        TaskRequest::UserName { user, dest, len } => {
            let user = user_id(data, user);
            host.user_name(handle, &user, &mut data[span(dest, len)])
        }
        TaskRequest::PacketSend { user, src, len } => {
            host.packet_send(handle, &data[span(user, USER_ID_WORDS)], &data[span(src, len)])
        }
        TaskRequest::UserList { dest, len } => host.user_list(handle, &mut data[span(dest, len)]),
    }
}

/// Hands every newly queued slot to the host, once.
///
/// A slot whose stored call or spans are invalid can only come from a
/// corrupted state; it raises `FAULT` and stays dispatched.
pub fn schedule(m: &mut Machine, host: &mut dyn Host) {
    for (index, handle) in (0..TASK_SLOTS).zip(0u16..) {
        let slot = m.tasks.slots[index];
        if !slot.is_queued() || slot.dispatched {
            continue;
        }
        m.tasks.slots[index].dispatched = true;

        let request = KernelCall::from_u16(slot.call)
            .ok_or(KernelCallError::UnknownCall { id: slot.call })
            .and_then(|call| TaskRequest::from_params(call, slot.params()));
        let progress = request.map(|request| {
            debug!("dispatching task {handle}: {request:?}");
            run_task(m, host, handle, request)
        });

        match progress {
            Ok(TaskProgress::Complete(result)) => {
                m.tasks.complete(handle, result);
                debug!("task {handle} completed with {result:#06x}");
            }
            Ok(TaskProgress::Pending) => debug!("task {handle} pending"),
            Err(error) => {
                warn!("task {handle} failed re-validation: {error}");
                m.raise(HaltCause::FAULT);
            }
        }
    }
}

/// Completes task `handle` with `result`; bit 15 is forced.
///
/// Returns `false`, changing nothing, unless the slot is queued and dispatched.
pub fn task_end(m: &mut Machine, handle: u16, result: u16) -> bool {
    let accepted = m.tasks.complete(handle, result);
    if accepted {
        debug!("task {handle} ended with {result:#06x}");
    } else {
        warn!("ignoring task_end for task {handle}");
    }
    accepted
}
