//! Arithmetic with carry results.
//!
//! Every carry or extended result lands in register `C`; the helpers return it
//! next to the value so the engine can write `C` first and the result second.

#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss
)]

/// Value plus an optional new `C`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AluResult {
    /// Primary result.
    pub value: u16,
    /// New contents of `C`, when the operation defines one.
    pub carry: Option<u16>,
}

impl AluResult {
    /// Result without a carry update.
    #[must_use]
    pub const fn plain(value: u16) -> Self {
        Self { value, carry: None }
    }

    const fn with_carry(value: u16, carry: u16) -> Self {
        Self {
            value,
            carry: Some(carry),
        }
    }
}

const fn borrow_mask(borrow: bool) -> u16 {
    if borrow {
        0xFFFF
    } else {
        0
    }
}

/// `a + b + carry_in`; `C` is 0 or 1.
#[must_use]
pub const fn add(a: u16, b: u16, carry_in: u16) -> AluResult {
    let sum = a as u32 + b as u32 + carry_in as u32;
    AluResult::with_carry(sum as u16, (sum >> 16) as u16)
}

/// `a - b - borrow_in`; `C` is `0xFFFF` on borrow.
#[must_use]
pub const fn sub(a: u16, b: u16, borrow_in: u16) -> AluResult {
    let difference = a as i32 - b as i32 - borrow_in as i32;
    AluResult::with_carry(difference as u16, borrow_mask(difference < 0))
}

/// Shift left; `C` receives the bits shifted out.
#[must_use]
pub const fn shl(value: u16, count: u16) -> AluResult {
    let wide = (value as u64) << (count & 31);
    AluResult::with_carry(wide as u16, (wide >> 16) as u16)
}

/// Logical shift right; `C` receives the bits shifted out, top aligned.
#[must_use]
pub const fn shr(value: u16, count: u16) -> AluResult {
    let wide = ((value as u64) << 16) >> (count & 31);
    AluResult::with_carry((wide >> 16) as u16, wide as u16)
}

/// Arithmetic shift right; `C` as for [`shr`].
#[must_use]
pub const fn asr(value: u16, count: u16) -> AluResult {
    let wide = ((value as i16 as i64) << 16) >> (count & 31);
    AluResult::with_carry((wide >> 16) as u16, wide as u16)
}

/// Unsigned multiply-accumulate; `C` receives the high word.
#[must_use]
pub const fn mul(a: u16, b: u16, addend: u16) -> AluResult {
    let product = a as u32 * b as u32 + addend as u32;
    AluResult::with_carry(product as u16, (product >> 16) as u16)
}

/// Signed multiply; `C` receives the high word.
#[must_use]
pub const fn muls(a: u16, b: u16) -> AluResult {
    let product = (a as i16 as i32) * (b as i16 as i32);
    AluResult::with_carry(product as u16, (product >> 16) as u16)
}

/// Unsigned divide; `C` receives the remainder. Division by zero yields 0 and `C = 0`.
#[must_use]
pub const fn div(a: u16, b: u16) -> AluResult {
    match b {
        0 => AluResult::with_carry(0, 0),
        _ => AluResult::with_carry(a / b, a % b),
    }
}

/// Signed divide with wrapping overflow; `C` receives the remainder.
#[must_use]
pub const fn divs(a: u16, b: u16) -> AluResult {
    let (a, b) = (a as i16, b as i16);
    match b {
        0 => AluResult::with_carry(0, 0),
        _ => AluResult::with_carry(a.wrapping_div(b) as u16, a.wrapping_rem(b) as u16),
    }
}

/// Unsigned remainder; zero divisor yields 0.
#[must_use]
pub const fn modulo(a: u16, b: u16) -> AluResult {
    match b {
        0 => AluResult::plain(0),
        _ => AluResult::plain(a % b),
    }
}
