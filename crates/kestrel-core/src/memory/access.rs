//! Data-window validation for pointers handed to kernel calls.

use thiserror::Error;

use crate::memory::DATA_WINDOW_END;

/// Maximum number of words a packed name may span, terminator included.
pub const NAME_MAX_WORDS: u16 = 32;

/// Rejected kernel pointer parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum AccessError {
    /// The range leaves the data window or wraps past its end.
    #[error("range {ptr:#06x}+{len} leaves the data window")]
    OutOfWindow {
        /// First word of the range.
        ptr: u16,
        /// Length in words.
        len: u16,
    },
    /// A name has no terminator within its word limit.
    #[error("name at {ptr:#06x} is not terminated")]
    UnterminatedName {
        /// First word of the name.
        ptr: u16,
    },
}

/// Checks that `ptr..ptr + len` lies within the data window.
///
/// # Errors
///
/// Returns [`AccessError::OutOfWindow`] when the range starts outside the
/// window or its end exceeds [`DATA_WINDOW_END`].
pub const fn validate_range(ptr: u16, len: u16) -> Result<(), AccessError> {
    let end = ptr as u32 + len as u32;
    if ptr < DATA_WINDOW_END && end <= DATA_WINDOW_END as u32 {
        Ok(())
    } else {
        Err(AccessError::OutOfWindow { ptr, len })
    }
}

/// Checks that a packed name at `ptr` terminates inside the data window.
///
/// Names hold two bytes per word, high byte first, ending with a zero byte.
///
/// # Errors
///
/// Returns [`AccessError::UnterminatedName`] when no terminator is found
/// within [`NAME_MAX_WORDS`] words or before the window ends.
pub fn validate_name(data: &[u16], ptr: u16) -> Result<u16, AccessError> {
    for offset in 0..NAME_MAX_WORDS {
        let addr = u32::from(ptr) + u32::from(offset);
        if addr >= u32::from(DATA_WINDOW_END) {
            break;
        }
        let word = data.get(addr as usize).copied().unwrap_or(0);
        let [high, low] = word.to_be_bytes();
        if high == 0 {
            return Ok(offset * 2);
        }
        if low == 0 {
            return Ok(offset * 2 + 1);
        }
    }
    Err(AccessError::UnterminatedName { ptr })
}

/// Decodes a validated name into a string; invalid UTF-8 is replaced.
///
/// # Errors
///
/// Propagates [`validate_name`] failures.
pub fn read_name(data: &[u16], ptr: u16) -> Result<String, AccessError> {
    validate_name(data, ptr)?;
    Ok(read_name_prefix(data, ptr))
}

/// Decodes the bytes at `ptr` up to the first zero byte.
///
/// Stops early after [`NAME_MAX_WORDS`] words or at the window end, so an
/// unterminated name yields its first bytes instead of an error.
#[must_use]
pub fn read_name_prefix(data: &[u16], ptr: u16) -> String {
    let start = usize::from(ptr.min(DATA_WINDOW_END));
    let end = (start + usize::from(NAME_MAX_WORDS))
        .min(usize::from(DATA_WINDOW_END))
        .min(data.len());
    let bytes: Vec<u8> = data[start.min(end)..end]
        .iter()
        .flat_map(|word| word.to_be_bytes())
        .take_while(|&byte| byte != 0)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}
