//! Call frames, in-line parameters and skip lengths.

use crate::addressing::read_operand;
use crate::bus::Bus;
use crate::decoder::decode;
use crate::encoding::{split_instruction_word, Opcode};
use crate::timing::{cycle_cost, CycleCostKind};
use crate::Machine;

/// Most in-line parameters a call or kernel call may carry.
pub const MAX_CALL_PARAMETERS: usize = 16;

/// In-line parameters evaluated after a call instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Parameters {
    values: [u16; MAX_CALL_PARAMETERS],
    len: usize,
    /// Operand cycles of every parameter.
    pub operand_cycles: u32,
    /// Address of the first word after the parameters.
    pub next_pc: u16,
}

impl Parameters {
    /// Evaluated values, left to right.
    #[must_use]
    pub fn values(&self) -> &[u16] {
        &self.values[..self.len]
    }

    /// Number of parameters.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` when no parameter follows the call.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Cycles charged by a function call for its parameters.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn call_cycles(&self) -> u32 {
        self.len as u32 * cycle_cost(CycleCostKind::CallParameter) + self.operand_cycles
    }
}

/// Evaluates up to `limit` `NOP` parameter words starting at `start`.
///
/// Each parameter's operand goes through the addressing unit, so pointer
/// parameters advance their registers.
pub fn gather_parameters(bus: &Bus, m: &mut Machine, start: u16, limit: usize) -> Parameters {
    let mut parameters = Parameters {
        values: [0; MAX_CALL_PARAMETERS],
        len: 0,
        operand_cycles: 0,
        next_pc: start,
    };
    let limit = limit.min(MAX_CALL_PARAMETERS);
    while parameters.len < limit {
        let at = parameters.next_pc;
        let (op, _, mode) = split_instruction_word(m.code[usize::from(at)]);
        if op != Opcode::Nop.code() {
            break;
        }
        let operand = read_operand(bus, m, at, mode, false);
        parameters.values[parameters.len] = operand.value;
        parameters.len += 1;
        parameters.operand_cycles += operand.cycles;
        parameters.next_pc = at.wrapping_add(1 + operand.words);
    }
    parameters
}

/// Pushes a frame: old `BP` at `[SP+1]`, parameters from `[SP+2]`, return address at `[SP]`.
#[allow(clippy::cast_possible_truncation)]
pub fn enter_frame(m: &mut Machine, parameters: &[u16], return_address: u16) {
    let sp = m.regs.sp();
    let frame = sp.wrapping_add(2);
    let old_bp = m.regs.bp();
    m.stack_write(sp.wrapping_add(1), old_bp);
    for (offset, value) in (0u16..).zip(parameters) {
        m.stack_write(frame.wrapping_add(offset), *value);
    }
    m.stack_write(sp, return_address);
    m.regs.set_bp(frame);
    m.regs
        .set_sp(frame.wrapping_add(parameters.len() as u16));
}

/// Pops the current frame and jumps to its return address.
///
/// Returns `false`, touching nothing, when the frame is the outermost one.
pub fn leave_frame(m: &mut Machine) -> bool {
    let bp = m.regs.bp();
    if bp <= m.stack.bottom {
        return false;
    }
    let return_address = m.stack_read(bp.wrapping_sub(2));
    let old_bp = m.stack_read(bp.wrapping_sub(1));
    m.regs.set_sp(bp.wrapping_sub(2));
    m.regs.set_pc(return_address);
    m.regs.set_bp(old_bp);
    true
}

/// Length in words of the instruction at `at`; undefined opcodes count as one word.
#[must_use]
pub fn instruction_length(m: &Machine, at: u16) -> u16 {
    decode(m.code[usize::from(at)]).map_or(1, |instr| instr.length())
}

#[cfg(test)]
mod tests {
    use super::{enter_frame, gather_parameters, instruction_length, leave_frame};
    use crate::bus::Bus;
    use crate::encoding::{encode_instruction, Opcode};
    use crate::state::StackWindow;
    use crate::{HaltCause, Machine};

    fn machine() -> Machine {
        let mut m = Machine::new();
        m.set_stack_window(StackWindow {
            bottom: 0x1000,
            top: 0x1100,
        });
        m.regs.set_sp(0x1000);
        m.regs.set_bp(0x1000);
        m
    }

    #[test]
    fn parameters_stop_at_first_non_nop() {
        let bus = Bus::standard();
        let mut m = machine();
        m.code[10] = encode_instruction(Opcode::Nop, 0, 0x05);
        m.code[11] = encode_instruction(Opcode::Nop, 0, 0x20);
        m.code[12] = 0xBEEF;
        m.code[13] = encode_instruction(Opcode::Rfn, 0, 0);

        let parameters = gather_parameters(&bus, &mut m, 10, 16);
        assert_eq!(parameters.values(), &[5, 0xBEEF]);
        assert_eq!(parameters.next_pc, 13);
        assert_eq!(parameters.call_cycles(), 3);
    }

    #[test]
    fn parameter_limit_is_respected() {
        let bus = Bus::standard();
        let mut m = machine();
        let parameters = gather_parameters(&bus, &mut m, 0, 40);
        assert_eq!(parameters.len(), 16);
        assert_eq!(parameters.next_pc, 16);
    }

    #[test]
    fn frame_layout_and_return() {
        let mut m = machine();
        enter_frame(&mut m, &[7, 8], 0x0042);
        assert_eq!(m.data[0x1000], 0x0042);
        assert_eq!(m.data[0x1001], 0x1000);
        assert_eq!(&m.data[0x1002..0x1004], &[7, 8]);
        assert_eq!(m.regs.bp(), 0x1002);
        assert_eq!(m.regs.sp(), 0x1004);

        assert!(leave_frame(&mut m));
        assert_eq!(m.regs.pc(), 0x0042);
        assert_eq!(m.regs.bp(), 0x1000);
        assert_eq!(m.regs.sp(), 0x1000);
        assert!(!leave_frame(&mut m));
        assert!(m.halt_cause().is_empty());
    }

    #[test]
    fn frame_push_outside_window_still_moves_pointers() {
        let mut m = machine();
        m.regs.set_sp(0x10FF);
        enter_frame(&mut m, &[1], 0x0009);
        assert_eq!(m.halt_cause(), HaltCause::STACK);
        assert_eq!(m.regs.bp(), 0x1101);
        assert_eq!(m.regs.sp(), 0x1102);
        assert_eq!(m.data[0x10FF], 0x0009);
    }

    #[test]
    fn skip_length_counts_extension_words() {
        let mut m = machine();
        m.code[0] = encode_instruction(Opcode::AddR, 0, 0x23);
        m.code[1] = encode_instruction(Opcode::AddR, 0, 0x01);
        assert_eq!(instruction_length(&m, 0), 3);
        assert_eq!(instruction_length(&m, 1), 1);
    }
}
