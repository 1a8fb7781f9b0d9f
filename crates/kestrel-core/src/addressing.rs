//! Addressing unit: resolves the 64 operand encodings.
//!
//! A resolved [`Operand`] carries its value, the extra cycles and extension
//! words it cost, and a [`WriteBack`] describing where a later
//! [`write_operand`] lands. Pointer modes address sub-word elements through a
//! 20-bit bit address formed from `Xn` and the matching `XH` nibble.

use crate::bus::Bus;
use crate::decoder::AddressingMode;
use crate::memory::{decode_data_address, DataTarget};
use crate::state::{Register, SpecialRegister};
use crate::Machine;

/// Element width in bits for each pointer sub-mode.
pub const POINTER_WIDTH: [u8; 16] = [16, 16, 8, 8, 4, 4, 2, 2, 1, 1, 16, 16, 16, 16, 8, 4];
/// Element value mask for each pointer sub-mode.
pub const POINTER_DATA_MASK: [u16; 16] = [
    0xFFFF, 0xFFFF, 0x00FF, 0x00FF, 0x000F, 0x000F, 0x0003, 0x0003, 0x0001, 0x0001, 0xFFFF,
    0xFFFF, 0xFFFF, 0xFFFF, 0x00FF, 0x000F,
];
/// Usable fraction bits for each pointer sub-mode.
pub const POINTER_FRACTION_MASK: [u8; 16] = [
    0x0, 0x0, 0x8, 0x8, 0xC, 0xC, 0xE, 0xE, 0xF, 0xF, 0x0, 0x0, 0x0, 0x0, 0x8, 0xC,
];
/// Log2 of the bit-address increment for each pointer sub-mode.
pub const POINTER_INCREMENT_SHIFT: [u8; 16] = [4, 4, 3, 3, 2, 2, 1, 1, 0, 0, 5, 6, 7, 8, 4, 4];
/// Bit `s` is set when sub-mode `s` post-increments.
pub const POINTER_ADVANCE: u16 = 0xFEAA;

const BIT_ADDRESS_MASK: u32 = 0xF_FFFF;

/// Element access through a pointer register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PointerAccess {
    /// Pointer number `n` of `Xn`.
    pub index: u8,
    /// Aligned bit address of the element.
    pub bit_address: u32,
    /// Bit position of the element within its word.
    pub shift: u8,
    /// Element mask before shifting.
    pub mask: u16,
    /// Pending increment, as log2 of the bit-address step.
    pub advance: Option<u8>,
}

impl PointerAccess {
    /// Data address of the word holding the element.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn word_address(&self) -> u16 {
        (self.bit_address >> 4) as u16
    }
}

/// Destination of a deferred operand write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteBack {
    /// Writes are dropped (immediates).
    Discard,
    /// General register.
    Register(Register),
    /// Special register.
    Special(SpecialRegister),
    /// Stack word, checked against the stack window.
    Stack(u16),
    /// Data word; the bus window routes to the register bus.
    Data(u16),
    /// Pointer element.
    Pointer(PointerAccess),
}

/// A resolved operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Operand {
    /// Value read, or 0 for write-only resolution.
    pub value: u16,
    /// Cycles beyond the instruction's base cost.
    pub cycles: u32,
    /// Extension words consumed after the instruction word.
    pub words: u16,
    /// Where [`write_operand`] stores.
    pub write_back: WriteBack,
}

/// Reads data address `addr`.
pub fn load(bus: &Bus, m: &mut Machine, addr: u16, rmw: bool) -> u16 {
    match decode_data_address(addr) {
        DataTarget::Memory(addr) => m.data[usize::from(addr)],
        DataTarget::Bus(cell) => bus.read(m, cell, rmw),
    }
}

/// Writes data address `addr`.
pub fn store(bus: &Bus, m: &mut Machine, addr: u16, value: u16) {
    match decode_data_address(addr) {
        DataTarget::Memory(addr) => m.data[usize::from(addr)] = value,
        DataTarget::Bus(cell) => bus.write(m, cell, value),
    }
}

fn extension(m: &Machine, at: u16, offset: u16) -> u16 {
    m.code[usize::from(at.wrapping_add(offset))]
}

fn pointer_access(m: &Machine, index: u8, swapped: bool) -> PointerAccess {
    let sub_mode = usize::from(m.regs.pointer_mode(index));
    let width = POINTER_WIDTH[sub_mode];
    let fraction = m.regs.pointer_fraction(index) & POINTER_FRACTION_MASK[sub_mode];
    let base = m.regs.get(Register::pointer(index));
    PointerAccess {
        index,
        bit_address: (u32::from(base) << 4) | u32::from(fraction),
        shift: if swapped {
            fraction
        } else {
            16 - width - fraction
        },
        mask: POINTER_DATA_MASK[sub_mode],
        advance: ((POINTER_ADVANCE >> sub_mode) & 1 != 0)
            .then_some(POINTER_INCREMENT_SHIFT[sub_mode]),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn advance_pointer(m: &mut Machine, access: &PointerAccess, step_shift: u8) {
    let next = (access.bit_address + (1 << step_shift)) & BIT_ADDRESS_MASK;
    m.regs
        .set(Register::pointer(access.index), (next >> 4) as u16);
    m.regs.set_pointer_fraction(access.index, (next & 0xF) as u8);
}

/// Where an operand lives, before any value is read.
fn locate(m: &mut Machine, at: u16, mode: AddressingMode) -> WriteBack {
    let bp = m.regs.bp();
    match mode {
        AddressingMode::Immediate4(_) | AddressingMode::Immediate16 => WriteBack::Discard,
        AddressingMode::Stack4(offset) => WriteBack::Stack(bp.wrapping_add(u16::from(offset))),
        AddressingMode::Stack16 => WriteBack::Stack(bp.wrapping_add(extension(m, at, 1))),
        AddressingMode::Absolute => WriteBack::Data(extension(m, at, 1)),
        AddressingMode::FrameIndexed => {
            let slot = bp.wrapping_add(extension(m, at, 1));
            let base = m.stack_read(slot);
            WriteBack::Data(base.wrapping_add(extension(m, at, 2)))
        }
        AddressingMode::Indexed(n) => WriteBack::Data(
            m.regs
                .get(Register::pointer(n))
                .wrapping_add(extension(m, at, 1)),
        ),
        AddressingMode::Indirect(n) => WriteBack::Data(m.regs.get(Register::pointer(n))),
        AddressingMode::Register(reg) => WriteBack::Register(reg),
        AddressingMode::Special(reg) => WriteBack::Special(reg),
        AddressingMode::Pointer(n) => WriteBack::Pointer(pointer_access(m, n, false)),
        AddressingMode::PointerSwapped(n) => WriteBack::Pointer(pointer_access(m, n, true)),
    }
}

fn resolved(mode: AddressingMode, value: u16, write_back: WriteBack) -> Operand {
    Operand {
        value,
        cycles: u32::from(mode.extra_cycles()),
        words: u16::from(mode.extra_words()),
        write_back,
    }
}

/// Reads the operand of the instruction at code address `at`.
///
/// With `rmw` set, a pointer increment is deferred to [`write_operand`];
/// otherwise it happens now.
pub fn read_operand(bus: &Bus, m: &mut Machine, at: u16, mode: u8, rmw: bool) -> Operand {
    let mode = AddressingMode::from_u6(mode);
    let location = locate(m, at, mode);
    let (value, write_back) = match location {
        WriteBack::Discard => {
            let value = match mode {
                AddressingMode::Immediate4(value) => u16::from(value),
                _ => extension(m, at, 1),
            };
            (value, location)
        }
        WriteBack::Register(reg) => (m.regs.get(reg), location),
        WriteBack::Special(reg) => (m.regs.special(reg), location),
        WriteBack::Stack(addr) => (m.stack_read(addr), location),
        WriteBack::Data(addr) => (load(bus, m, addr, rmw), location),
        WriteBack::Pointer(mut access) => {
            let word = load(bus, m, access.word_address(), rmw);
            let value = (word >> access.shift) & access.mask;
            if !rmw {
                if let Some(step) = access.advance.take() {
                    advance_pointer(m, &access, step);
                }
            }
            (value, WriteBack::Pointer(access))
        }
    };
    resolved(mode, value, write_back)
}

/// Resolves a write-only destination without reading it.
pub fn address_operand(m: &mut Machine, at: u16, mode: u8) -> Operand {
    let mode = AddressingMode::from_u6(mode);
    let location = locate(m, at, mode);
    resolved(mode, 0, location)
}

/// Completes an access started by [`read_operand`] or [`address_operand`].
pub fn write_operand(bus: &Bus, m: &mut Machine, operand: &Operand, value: u16) {
    match operand.write_back {
        WriteBack::Discard => {}
        WriteBack::Register(reg) => m.regs.set(reg, value),
        WriteBack::Special(reg) => m.regs.set_special(reg, value),
        WriteBack::Stack(addr) => m.stack_write(addr, value),
        WriteBack::Data(addr) => store(bus, m, addr, value),
        WriteBack::Pointer(access) => {
            let addr = access.word_address();
            if access.mask == 0xFFFF {
                store(bus, m, addr, value);
            } else {
                let mask = access.mask << access.shift;
                let word = load(bus, m, addr, true);
                store(bus, m, addr, (word & !mask) | ((value << access.shift) & mask));
            }
            if let Some(step) = access.advance {
                advance_pointer(m, &access, step);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        address_operand, read_operand, write_operand, WriteBack, POINTER_ADVANCE,
        POINTER_DATA_MASK, POINTER_FRACTION_MASK, POINTER_WIDTH,
    };
    use crate::bus::Bus;
    use crate::state::{Register, SpecialRegister, StackWindow};
    use crate::{HaltCause, Machine};

    fn machine() -> Machine {
        let mut m = Machine::new();
        m.set_stack_window(StackWindow {
            bottom: 0x8000,
            top: 0x9000,
        });
        m.regs.set_bp(0x8000);
        m
    }

    #[test]
    fn tables_are_consistent() {
        for sub_mode in 0..16 {
            let width = u32::from(POINTER_WIDTH[sub_mode]);
            assert_eq!(u32::from(POINTER_DATA_MASK[sub_mode]), (1u32 << width) - 1);
            assert_eq!(
                u32::from(POINTER_FRACTION_MASK[sub_mode]),
                (16 - width) & 0xF & !(width - 1) & 0xF
            );
        }
        assert_eq!(POINTER_ADVANCE.count_ones(), 11);
    }

    #[test]
    fn byte_pointer_reads_high_then_low() {
        let bus = Bus::standard();
        let mut m = machine();
        m.data[0x100] = 0xAB12;
        m.regs.set(Register::X1, 0x100);
        m.regs.set_special(SpecialRegister::Xm, 0x0030);

        let first = read_operand(&bus, &mut m, 0, 0x31, false);
        let second = read_operand(&bus, &mut m, 0, 0x31, false);
        assert_eq!((first.value, second.value), (0xAB, 0x12));
        assert_eq!(m.regs.get(Register::X1), 0x101);
        assert_eq!(m.regs.pointer_fraction(1), 0);
    }

    #[test]
    fn swapped_nibble_pointer_reads_low_first() {
        let bus = Bus::standard();
        let mut m = machine();
        m.data[0x40] = 0x4321;
        m.regs.set(Register::X0, 0x40);
        m.regs.set_special(SpecialRegister::Xm, 0x0005);

        let values: Vec<u16> = (0..4)
            .map(|_| read_operand(&bus, &mut m, 0, 0x34, false).value)
            .collect();
        assert_eq!(values, vec![1, 2, 3, 4]);
        assert_eq!(m.regs.get(Register::X0), 0x41);
    }

    #[test]
    fn rmw_pointer_defers_increment_and_merges() {
        let bus = Bus::standard();
        let mut m = machine();
        m.data[0x200] = 0xFFFF;
        m.regs.set(Register::X2, 0x200);
        m.regs.set_special(SpecialRegister::Xm, 0x0700);
        m.regs.set_special(SpecialRegister::Xh, 0x0200);

        let operand = read_operand(&bus, &mut m, 0, 0x32, true);
        assert_eq!(operand.value, 0x3);
        assert_eq!(m.regs.pointer_fraction(2), 2);

        write_operand(&bus, &mut m, &operand, 0);
        assert_eq!(m.data[0x200], 0xCFFF);
        assert_eq!(m.regs.pointer_fraction(2), 4);
    }

    #[test]
    fn wide_stride_sub_mode_steps_several_words() {
        let bus = Bus::standard();
        let mut m = machine();
        m.regs.set(Register::X3, 0x10);
        m.regs.set_special(SpecialRegister::Xm, 0xD000);
        let operand = address_operand(&mut m, 0, 0x33);
        write_operand(&bus, &mut m, &operand, 0x5555);
        assert_eq!(m.data[0x10], 0x5555);
        assert_eq!(m.regs.get(Register::X3), 0x20);
    }

    #[test]
    fn stack_reads_outside_window_yield_zero() {
        let bus = Bus::standard();
        let mut m = machine();
        m.regs.set_bp(0x8FFE);
        let operand = read_operand(&bus, &mut m, 0, 0x13, false);
        assert_eq!(operand.value, 0);
        assert_eq!(operand.write_back, WriteBack::Stack(0x9001));
        assert_eq!(m.halt_cause(), HaltCause::STACK);
    }

    #[test]
    fn frame_indexed_follows_stack_pointer() {
        let bus = Bus::standard();
        let mut m = machine();
        m.code[0] = 0;
        m.code[1] = 2;
        m.code[2] = 5;
        m.data[0x8002] = 0x300;
        m.data[0x305] = 77;
        let operand = read_operand(&bus, &mut m, 0, 0x23, false);
        assert_eq!(operand.value, 77);
        assert_eq!((operand.cycles, operand.words), (4, 2));
    }

    #[test]
    fn bus_window_reaches_register_bus() {
        let bus = Bus::standard();
        let mut m = machine();
        m.code[1] = 0xFC01;
        let operand = address_operand(&mut m, 0, 0x22);
        write_operand(&bus, &mut m, &operand, 0x1234);
        assert_eq!(bus.get(&m, 1), 0x1234);
        assert_eq!(m.data[0xFC01], 0);
    }
}
