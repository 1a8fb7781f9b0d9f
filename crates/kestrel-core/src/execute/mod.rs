//! Instruction execution engine.
//!
//! [`step`] fetches, decodes and executes one instruction and returns its total
//! cycle cost: base cost, operand cycles and any bus stall accumulated by FIFO
//! writes during the instruction.

/// Arithmetic helpers producing carry results.
pub mod carry;
/// Call frames, in-line parameters and skip lengths.
pub mod helpers;

use log::debug;

use crate::addressing::{address_operand, read_operand, write_operand};
use crate::api::Host;
use crate::bus::Bus;
use crate::decoder::{decode, DecodedInstruction};
use crate::encoding::Opcode;
use crate::kernel;
use crate::state::Register;
use crate::timing::{cycle_cost, CycleCostKind};
use crate::{HaltCause, Machine};

pub use carry::AluResult;
pub use helpers::{
    enter_frame, gather_parameters, instruction_length, leave_frame, Parameters,
    MAX_CALL_PARAMETERS,
};

/// Where `PC` goes after an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Next,
    Skip,
    Jump(u16),
    Stay,
}

/// Executes the instruction at `PC`.
///
/// Undefined opcodes raise `INVOP` and rejected kernel calls raise `INVKCALL`;
/// both leave `PC` in place and cost only a bus stall still pending.
pub fn step(bus: &Bus, m: &mut Machine, host: &mut dyn Host) -> u32 {
    let pc = m.regs.pc();
    let Some(instr) = decode(m.code[usize::from(pc)]) else {
        m.raise(HaltCause::INVOP);
        return m.take_stall();
    };

    let next = pc.wrapping_add(instr.length());
    let Some((cycles, flow)) = execute_instruction(bus, m, host, pc, next, instr) else {
        return m.take_stall();
    };

    let target = match flow {
        Flow::Next => next,
        Flow::Skip => next.wrapping_add(instruction_length(m, next)),
        Flow::Jump(target) => target,
        Flow::Stay => m.regs.pc(),
    };
    m.regs.set_pc(target);
    instr.opcode.base_cycles() + cycles + m.take_stall()
}

type BinaryOp = fn(u16, u16, u16) -> AluResult;

/// `reg = f(reg, operand, C)`; `C` is written before the result.
fn register_form(
    bus: &Bus,
    m: &mut Machine,
    pc: u16,
    instr: DecodedInstruction,
    f: BinaryOp,
) -> u32 {
    let current = m.regs.get(instr.reg);
    let operand = read_operand(bus, m, pc, instr.mode, false);
    let result = f(current, operand.value, m.regs.get(Register::C));
    if let Some(carry) = result.carry {
        m.regs.set(Register::C, carry);
    }
    m.regs.set(instr.reg, result.value);
    operand.cycles
}

/// `operand = f(operand, reg, C)`; `C` is written before the result.
fn operand_form(
    bus: &Bus,
    m: &mut Machine,
    pc: u16,
    instr: DecodedInstruction,
    f: BinaryOp,
) -> u32 {
    let operand = read_operand(bus, m, pc, instr.mode, true);
    let result = f(operand.value, m.regs.get(instr.reg), m.regs.get(Register::C));
    if let Some(carry) = result.carry {
        m.regs.set(Register::C, carry);
    }
    write_operand(bus, m, &operand, result.value);
    operand.cycles
}

#[allow(clippy::cast_possible_wrap, clippy::similar_names)]
fn skip_condition(opcode: Opcode, a: u16, b: u16) -> bool {
    let (sa, sb) = (a as i16, b as i16);
    match opcode {
        Opcode::Xeq => a == b,
        Opcode::Xne => a != b,
        Opcode::Xug => a > b,
        Opcode::Xsg => sa > sb,
        Opcode::Xbs => a & b != 0,
        Opcode::Xbc => a & b == 0,
        Opcode::Xul => a < b,
        _ => sa < sb,
    }
}

#[allow(clippy::too_many_lines)]
fn execute_instruction(
    bus: &Bus,
    m: &mut Machine,
    host: &mut dyn Host,
    pc: u16,
    next: u16,
    instr: DecodedInstruction,
) -> Option<(u32, Flow)> {
    use carry::{add, asr, div, divs, modulo, mul, muls, shl, shr, sub};

    let taken = cycle_cost(CycleCostKind::Taken);
    let reg = instr.reg;
    let outcome = match instr.opcode {
        Opcode::Nop => (read_operand(bus, m, pc, instr.mode, false).cycles, Flow::Next),
        Opcode::MovR => {
            let operand = read_operand(bus, m, pc, instr.mode, false);
            m.regs.set(reg, operand.value);
            (operand.cycles, Flow::Next)
        }
        Opcode::MovO => {
            let operand = address_operand(m, pc, instr.mode);
            write_operand(bus, m, &operand, m.regs.get(reg));
            (operand.cycles, Flow::Next)
        }
        Opcode::Xch => {
            let operand = read_operand(bus, m, pc, instr.mode, true);
            let current = m.regs.get(reg);
            m.regs.set(reg, operand.value);
            write_operand(bus, m, &operand, current);
            (operand.cycles, Flow::Next)
        }
        Opcode::AddR => (register_form(bus, m, pc, instr, |a, b, _| add(a, b, 0)), Flow::Next),
        Opcode::AddO => (operand_form(bus, m, pc, instr, |a, b, _| add(a, b, 0)), Flow::Next),
        Opcode::AdcR => (register_form(bus, m, pc, instr, |a, b, c| add(a, b, c & 1)), Flow::Next),
        Opcode::AdcO => (operand_form(bus, m, pc, instr, |a, b, c| add(a, b, c & 1)), Flow::Next),
        Opcode::SubR => (register_form(bus, m, pc, instr, |a, b, _| sub(a, b, 0)), Flow::Next),
        Opcode::SubO => (operand_form(bus, m, pc, instr, |a, b, _| sub(a, b, 0)), Flow::Next),
        Opcode::SbcR => (register_form(bus, m, pc, instr, |a, b, c| sub(a, b, c & 1)), Flow::Next),
        Opcode::SbcO => (operand_form(bus, m, pc, instr, |a, b, c| sub(a, b, c & 1)), Flow::Next),
        Opcode::AndR => (register_form(bus, m, pc, instr, |a, b, _| AluResult::plain(a & b)), Flow::Next),
        Opcode::AndO => (operand_form(bus, m, pc, instr, |a, b, _| AluResult::plain(a & b)), Flow::Next),
        Opcode::OrR => (register_form(bus, m, pc, instr, |a, b, _| AluResult::plain(a | b)), Flow::Next),
        Opcode::OrO => (operand_form(bus, m, pc, instr, |a, b, _| AluResult::plain(a | b)), Flow::Next),
        Opcode::XorR => (register_form(bus, m, pc, instr, |a, b, _| AluResult::plain(a ^ b)), Flow::Next),
        Opcode::XorO => (operand_form(bus, m, pc, instr, |a, b, _| AluResult::plain(a ^ b)), Flow::Next),
        Opcode::Not => (register_form(bus, m, pc, instr, |_, b, _| AluResult::plain(!b)), Flow::Next),
        Opcode::Neg => (register_form(bus, m, pc, instr, |_, b, _| sub(0, b, 0)), Flow::Next),
        Opcode::ShlR => (register_form(bus, m, pc, instr, |a, b, _| shl(a, b)), Flow::Next),
        Opcode::ShlO => (operand_form(bus, m, pc, instr, |a, b, _| shl(a, b)), Flow::Next),
        Opcode::ShrR => (register_form(bus, m, pc, instr, |a, b, _| shr(a, b)), Flow::Next),
        Opcode::ShrO => (operand_form(bus, m, pc, instr, |a, b, _| shr(a, b)), Flow::Next),
        Opcode::AsrR => (register_form(bus, m, pc, instr, |a, b, _| asr(a, b)), Flow::Next),
        Opcode::AsrO => (operand_form(bus, m, pc, instr, |a, b, _| asr(a, b)), Flow::Next),
        Opcode::Rol => (
            register_form(bus, m, pc, instr, |a, b, _| {
                AluResult::plain(a.rotate_left(u32::from(b & 15)))
            }),
            Flow::Next,
        ),
        Opcode::Ror => (
            register_form(bus, m, pc, instr, |a, b, _| {
                AluResult::plain(a.rotate_right(u32::from(b & 15)))
            }),
            Flow::Next,
        ),
        Opcode::MulR => (register_form(bus, m, pc, instr, |a, b, _| mul(a, b, 0)), Flow::Next),
        Opcode::MulO => (operand_form(bus, m, pc, instr, |a, b, _| mul(a, b, 0)), Flow::Next),
        Opcode::Mac => (register_form(bus, m, pc, instr, mul), Flow::Next),
        Opcode::Muls => (register_form(bus, m, pc, instr, |a, b, _| muls(a, b)), Flow::Next),
        Opcode::DivR => (register_form(bus, m, pc, instr, |a, b, _| div(a, b)), Flow::Next),
        Opcode::DivO => (operand_form(bus, m, pc, instr, |a, b, _| div(a, b)), Flow::Next),
        Opcode::Divs => (register_form(bus, m, pc, instr, |a, b, _| divs(a, b)), Flow::Next),
        Opcode::ModR => (register_form(bus, m, pc, instr, |a, b, _| modulo(a, b)), Flow::Next),
        Opcode::ModO => (operand_form(bus, m, pc, instr, |a, b, _| modulo(a, b)), Flow::Next),
        Opcode::Xeq
        | Opcode::Xne
        | Opcode::Xug
        | Opcode::Xsg
        | Opcode::Xbs
        | Opcode::Xbc
        | Opcode::Xul
        | Opcode::Xsl => {
            let current = m.regs.get(reg);
            let operand = read_operand(bus, m, pc, instr.mode, false);
            if skip_condition(instr.opcode, current, operand.value) {
                (operand.cycles + taken, Flow::Skip)
            } else {
                (operand.cycles, Flow::Next)
            }
        }
        Opcode::Jmr => {
            let operand = read_operand(bus, m, pc, instr.mode, false);
            (operand.cycles, Flow::Jump(pc.wrapping_add(operand.value)))
        }
        Opcode::Jma => {
            let operand = read_operand(bus, m, pc, instr.mode, false);
            (operand.cycles, Flow::Jump(operand.value))
        }
        Opcode::Jnz | Opcode::Djnz => {
            let mut counter = m.regs.get(reg);
            if instr.opcode == Opcode::Djnz {
                counter = counter.wrapping_sub(1);
                m.regs.set(reg, counter);
            }
            let operand = read_operand(bus, m, pc, instr.mode, false);
            if counter == 0 {
                (operand.cycles, Flow::Next)
            } else {
                (operand.cycles + taken, Flow::Jump(pc.wrapping_add(operand.value)))
            }
        }
        Opcode::Jfr | Opcode::Jfa => {
            let operand = read_operand(bus, m, pc, instr.mode, false);
            let target = if instr.opcode == Opcode::Jfr {
                pc.wrapping_add(operand.value)
            } else {
                operand.value
            };
            let parameters = gather_parameters(bus, m, next, MAX_CALL_PARAMETERS);
            enter_frame(m, parameters.values(), parameters.next_pc);
            (
                operand.cycles + parameters.call_cycles(),
                Flow::Jump(target),
            )
        }
        Opcode::Rfn => {
            let operand = read_operand(bus, m, pc, instr.mode, false);
            m.regs.set(reg, operand.value);
            if leave_frame(m) {
                (operand.cycles, Flow::Stay)
            } else {
                m.raise(HaltCause::EXIT);
                (operand.cycles, Flow::Jump(pc))
            }
        }
        Opcode::Jsv => {
            let checkpoint = m.checkpoint();
            let operand = read_operand(bus, m, pc, instr.mode, false);
            let parameters = gather_parameters(bus, m, next, MAX_CALL_PARAMETERS - 1);
            let mut values = Vec::with_capacity(parameters.len() + 1);
            values.push(operand.value);
            values.extend_from_slice(parameters.values());
            match kernel::dispatch(bus, m, host, &values) {
                Ok(result) => {
                    m.regs.set(Register::A, result.low);
                    m.regs.set(Register::C, result.high);
                    (
                        result.cycles + operand.cycles + parameters.operand_cycles,
                        Flow::Jump(parameters.next_pc),
                    )
                }
                Err(error) => {
                    debug!("kernel call at {pc:#06x} rejected: {error}");
                    m.rollback(checkpoint);
                    m.raise(HaltCause::INVKCALL);
                    return None;
                }
            }
        }
    };
    Some(outcome)
}

#[cfg(test)]
mod tests {
    use super::step;
    use crate::api::NullHost;
    use crate::bus::Bus;
    use crate::encoding::{encode_instruction, Opcode};
    use crate::fifo::LaneId;
    use crate::state::{Register, SpecialRegister, StackWindow};
    use crate::{HaltCause, Machine};

    fn machine(program: &[u16]) -> Machine {
        let mut m = Machine::new();
        m.code[..program.len()].copy_from_slice(program);
        m.set_stack_window(StackWindow {
            bottom: 0x4000,
            top: 0x4100,
        });
        m.regs.set_sp(0x4000);
        m.regs.set_bp(0x4000);
        m
    }

    fn run(m: &mut Machine, steps: usize) -> u32 {
        let bus = Bus::standard();
        let mut host = NullHost;
        (0..steps).map(|_| step(&bus, m, &mut host)).sum()
    }

    const fn reg_mode(reg: Register) -> u8 {
        0x28 | reg as u8
    }

    #[test]
    fn exit_from_outermost_frame() {
        let mut m = machine(&[0x6800]);
        assert_eq!(run(&mut m, 1), 3);
        assert_eq!(m.halt_cause(), HaltCause::EXIT);
        assert_eq!(m.regs.pc(), 0);
    }

    #[test]
    fn invalid_opcode_costs_nothing() {
        let mut m = machine(&[0x25 << 9]);
        assert_eq!(run(&mut m, 1), 0);
        assert_eq!(m.halt_cause(), HaltCause::INVOP);
        assert_eq!(m.regs.pc(), 0);
    }

    #[test]
    fn rejected_kernel_call_undoes_operand_reads() {
        let mut m = machine(&[
            encode_instruction(Opcode::Jsv, 0, 0x30),
            encode_instruction(Opcode::Nop, 0, 0x30),
            encode_instruction(Opcode::Nop, 0, 0x22),
            0xFC52,
            0x6800,
        ]);
        m.data[0x100] = 0x7F;
        m.regs.set(Register::pointer(0), 0x100);
        m.regs.set_special(SpecialRegister::Xm, 1);
        m.fifo.state_mut(LaneId::Accelerator).overflow = true;
        m.stall = 5;
        let before = m.regs.clone();

        assert_eq!(run(&mut m, 1), 5);
        assert_eq!(m.halt_cause(), HaltCause::INVKCALL);
        assert_eq!(m.regs, before);
        assert!(m.fifo.state(LaneId::Accelerator).overflow);
        assert_eq!(m.stall(), 0);
    }

    #[test]
    fn add_writes_carry_before_result() {
        let mut m = machine(&[
            encode_instruction(Opcode::MovR, 0, 0x20),
            0xFFFF,
            encode_instruction(Opcode::AddR, 0, 0x02),
            encode_instruction(Opcode::AddR, 2, 0x01),
        ]);
        m.regs.set(Register::C, 0xFFFF);
        assert_eq!(run(&mut m, 2), 2 + 1);
        assert_eq!(m.regs.get(Register::A), 1);
        assert_eq!(m.regs.get(Register::C), 1);

        run(&mut m, 1);
        assert_eq!(m.regs.get(Register::C), 2);
    }

    #[test]
    fn division_by_zero_is_silent() {
        let mut m = machine(&[
            encode_instruction(Opcode::DivR, 1, 0x00),
            encode_instruction(Opcode::ModR, 3, reg_mode(Register::D)),
        ]);
        m.regs.set(Register::B, 1234);
        m.regs.set(Register::C, 55);
        assert_eq!(run(&mut m, 2), 16);
        assert_eq!(m.regs.get(Register::B), 0);
        assert_eq!(m.regs.get(Register::C), 0);
        assert_eq!(m.regs.get(Register::D), 0);
        assert!(m.halt_cause().is_empty());
    }

    #[test]
    fn taken_skip_steps_over_long_instruction() {
        let mut m = machine(&[
            encode_instruction(Opcode::Xeq, 0, 0x00),
            encode_instruction(Opcode::MovR, 1, 0x20),
            0x1111,
            encode_instruction(Opcode::MovR, 2, 0x07),
        ]);
        assert_eq!(run(&mut m, 1), 2);
        assert_eq!(m.regs.pc(), 3);
        run(&mut m, 1);
        assert_eq!(m.regs.get(Register::B), 0);
        assert_eq!(m.regs.get(Register::C), 7);
    }

    #[test]
    fn call_and_return_through_frame() {
        let mut m = machine(&[
            encode_instruction(Opcode::Jfa, 0, 0x0A),
            encode_instruction(Opcode::Nop, 0, 0x03),
            encode_instruction(Opcode::Nop, 0, 0x04),
            encode_instruction(Opcode::MovR, 1, reg_mode(Register::A)),
            0,
            0,
            0,
            0,
            0,
            0,
            encode_instruction(Opcode::MovR, 0, 0x10),
            encode_instruction(Opcode::AddR, 0, 0x11),
            encode_instruction(Opcode::Rfn, 0, reg_mode(Register::A)),
        ]);
        assert_eq!(run(&mut m, 1), 4 + 2);
        assert_eq!(m.regs.pc(), 10);
        assert_eq!(m.regs.bp(), 0x4002);
        assert_eq!(m.regs.sp(), 0x4004);

        assert_eq!(run(&mut m, 3), 2 + 2 + 3);
        assert_eq!(m.regs.pc(), 3);
        assert_eq!(m.regs.get(Register::A), 7);
        assert_eq!(m.regs.sp(), 0x4000);
        assert_eq!(m.regs.bp(), 0x4000);
        assert!(m.halt_cause().is_empty());
    }

    #[test]
    fn djnz_counts_down_and_falls_through() {
        let mut m = machine(&[
            encode_instruction(Opcode::AddR, 1, 0x01),
            encode_instruction(Opcode::Djnz, 0, 0x20),
            0xFFFF,
        ]);
        m.regs.set(Register::A, 3);
        let cycles = run(&mut m, 6);
        assert_eq!(m.regs.get(Register::B), 3);
        assert_eq!(m.regs.get(Register::A), 0);
        assert_eq!(m.regs.pc(), 3);
        assert_eq!(cycles, 3 + 3 * 2 + 2);
    }

    #[test]
    fn operand_form_updates_memory() {
        let mut m = machine(&[
            encode_instruction(Opcode::SubO, 1, 0x22),
            0x0200,
        ]);
        m.data[0x200] = 10;
        m.regs.set(Register::B, 4);
        assert_eq!(run(&mut m, 1), 3);
        assert_eq!(m.data[0x200], 6);
        assert_eq!(m.regs.get(Register::C), 0);
    }
}
