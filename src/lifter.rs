//! Lifting of decoded instructions into IL.
//!
//! [`lift`] is a pure function of one [`Instruction`] plus the emission
//! context. [`lift_at`] decodes from bytes first and is the only entry point
//! that looks past the instruction being lifted: a `dint` directly followed
//! by a `jmp` back to itself (or to the `dint`) is a busy halt and lifts as a
//! single `hlt`.

use crate::decoder::decode;
use crate::error::Result;
use crate::il::{BinaryOp, Expr, Flag, FlagCondition, FlagSet, IlEmitter, IlOp, IlReg, UnaryOp};
use crate::types::{AddressingMode, Instruction, Mnemonic, Operand, Register, Width};
use tracing::{debug, warn};

/// Lift one decoded instruction.
///
/// Call [`IlEmitter::begin_instruction`] for the instruction's address first;
/// the lifter reads it back through [`IlEmitter::current_address`].
pub fn lift<E: IlEmitter + ?Sized>(instruction: &Instruction, il: &mut E) {
    let size = instruction.width().map_or(2, Width::bytes);

    match instruction.mnemonic {
        Mnemonic::Mov => {
            let Some((src, dst)) = operands(instruction) else {
                return unimplemented(instruction, il);
            };
            if src.mode == AddressingMode::Immediate
                && dst.mode == AddressingMode::Register
                && dst.register == Some(Register::Sp)
            {
                il.append(IlOp::Nop);
                return;
            }
            let op = write_operand(&*il, instruction.mnemonic, &dst, size, read_operand(&src, size));
            il.append(op);
            autoincrement(il, &src);
        }

        Mnemonic::Add => lift_arith(il, instruction, size, |dst, src| {
            Expr::add(size, dst, src).with_flags(FlagSet::ALL)
        }),

        Mnemonic::Addc => lift_arith(il, instruction, size, |dst, src| {
            Expr::add(size, Expr::add(size, dst, src), Expr::flag(Flag::C))
                .with_flags(FlagSet::ALL)
        }),

        Mnemonic::Sub => lift_arith(il, instruction, size, |dst, src| {
            Expr::sub(size, dst, src).with_flags(FlagSet::ALL)
        }),

        Mnemonic::Subc => lift_arith(il, instruction, size, |dst, src| {
            let borrow = Expr::unary(UnaryOp::Not, 0, Expr::flag(Flag::C));
            Expr::sub(size, Expr::sub(size, dst, src), borrow).with_flags(FlagSet::ALL)
        }),

        Mnemonic::And => lift_arith(il, instruction, size, |dst, src| {
            Expr::binary(BinaryOp::And, size, dst, src).with_flags(FlagSet::ALL)
        }),

        Mnemonic::Xor => lift_arith(il, instruction, size, |dst, src| {
            Expr::binary(BinaryOp::Xor, size, dst, src).with_flags(FlagSet::ALL)
        }),

        Mnemonic::Bic => lift_arith(il, instruction, size, |dst, src| {
            Expr::binary(BinaryOp::And, size, dst, Expr::unary(UnaryOp::Not, size, src))
        }),

        Mnemonic::Bis => lift_arith(il, instruction, size, |dst, src| {
            Expr::binary(BinaryOp::Or, size, dst, src)
        }),

        Mnemonic::Cmp => lift_flags_only(il, instruction, size, |dst, src| {
            Expr::sub(size, dst, src).with_flags(FlagSet::ALL)
        }),

        Mnemonic::Bit => lift_flags_only(il, instruction, size, |dst, src| {
            Expr::binary(BinaryOp::And, size, dst, src).with_flags(FlagSet::ALL)
        }),

        Mnemonic::Dadd => unimplemented(instruction, il),

        Mnemonic::Rrc => lift_in_place(il, instruction, size, |value| {
            Expr::rotate_right_carry(size, value, Expr::constant(1, 1), Expr::flag(Flag::C))
                .with_flags(FlagSet::ALL)
        }),

        Mnemonic::Rra => {
            let Some(src) = instruction.source else {
                return unimplemented(instruction, il);
            };
            let shifted = Expr::binary(
                BinaryOp::ArithShiftRight,
                size,
                read_operand(&src, size),
                Expr::constant(1, 1),
            )
            .with_flags(FlagSet::CNZ);
            let op = write_operand(&*il, instruction.mnemonic, &src, size, shifted);
            il.append(op);
            il.append(IlOp::SetFlag {
                flag: Flag::V,
                value: Expr::constant(0, 0),
            });
            autoincrement(il, &src);
        }

        // Always a word operation regardless of the B/W bit.
        Mnemonic::Swpb => lift_in_place(il, instruction, 2, |value| {
            Expr::binary(BinaryOp::RotateLeft, 2, value, Expr::constant(1, 8))
        }),

        Mnemonic::Sxt => {
            let Some(src) = instruction.source else {
                return unimplemented(instruction, il);
            };
            let extended = Expr::unary(UnaryOp::SignExtend, 2, read_operand(&src, 1))
                .with_flags(FlagSet::ALL);
            let op = write_operand(&*il, instruction.mnemonic, &src, 2, extended);
            il.append(op);
            autoincrement(il, &src);
        }

        Mnemonic::Push => {
            let Some(src) = instruction.source else {
                return unimplemented(instruction, il);
            };
            let mut value = read_operand(&src, size);
            if instruction.is_byte_op() {
                value = Expr::unary(UnaryOp::ZeroExtend, 2, value);
            }
            il.append(IlOp::Push { size: 2, value });
            autoincrement(il, &src);
        }

        Mnemonic::Call => {
            let Some(src) = instruction.source else {
                return unimplemented(instruction, il);
            };
            lift_call(il, &src);
        }

        Mnemonic::Reti => {
            il.append(IlOp::SetReg {
                size: 2,
                reg: IlReg::Arch(Register::Sr),
                value: Expr::pop(2),
            });
            il.append(IlOp::Ret {
                target: Expr::pop(2),
            });
        }

        Mnemonic::Ret => il.append(IlOp::Ret {
            target: Expr::pop(2),
        }),

        Mnemonic::Br => {
            let Some(src) = instruction.source else {
                return unimplemented(instruction, il);
            };
            let target = match src.mode {
                AddressingMode::Immediate => Expr::const_ptr(src.value.unwrap_or(0)),
                _ => read_operand(&src, 2),
            };
            let op = jump(&*il, target);
            il.append(op);
            autoincrement(il, &src);
        }

        Mnemonic::Hlt => il.append(IlOp::NoRet),

        Mnemonic::Jmp => {
            let Some(target) = instruction.branch_target() else {
                return unimplemented(instruction, il);
            };
            let op = jump(&*il, Expr::const_ptr(target));
            il.append(op);
        }

        Mnemonic::Jnz => cond_branch(il, instruction, Expr::flag_condition(FlagCondition::Ne)),
        Mnemonic::Jz => cond_branch(il, instruction, Expr::flag_condition(FlagCondition::E)),
        Mnemonic::Jlo => cond_branch(il, instruction, Expr::flag_condition(FlagCondition::Ult)),
        Mnemonic::Jhs => cond_branch(il, instruction, Expr::flag_condition(FlagCondition::Uge)),
        Mnemonic::Jge => cond_branch(il, instruction, Expr::flag_condition(FlagCondition::Sge)),
        Mnemonic::Jl => cond_branch(il, instruction, Expr::flag_condition(FlagCondition::Slt)),
        Mnemonic::Jn => cond_branch(
            il,
            instruction,
            Expr::compare_equal(0, Expr::flag(Flag::N), Expr::constant(0, 1)),
        ),
    }
}

/// Decode the instruction at `address` and lift it, fusing the halt idiom.
///
/// Returns the number of bytes consumed. A fused `dint` still consumes only
/// its own two bytes; the trailing `jmp` is lifted on its own when reached.
pub fn lift_at<E: IlEmitter + ?Sized>(data: &[u8], address: u16, il: &mut E) -> Result<u16> {
    lift_at_with(data, address, il, true)
}

/// [`lift_at`] with the halt-idiom lookahead switchable.
pub fn lift_at_with<E: IlEmitter + ?Sized>(
    data: &[u8],
    address: u16,
    il: &mut E,
    fuse_halt_idiom: bool,
) -> Result<u16> {
    let mut instruction = decode(data, address)?;

    if fuse_halt_idiom && instruction.is_dint() && is_halt_loop(data, address, &instruction) {
        debug!(address, "dint + self-jump fused into hlt");
        instruction.mnemonic = Mnemonic::Hlt;
    }

    il.begin_instruction(address);
    lift(&instruction, il);
    Ok(instruction.encoded_length)
}

/// One-instruction lookahead: is the `dint` followed by a jump to itself?
fn is_halt_loop(data: &[u8], address: u16, dint: &Instruction) -> bool {
    let length = usize::from(dint.encoded_length);
    let next_address = address.wrapping_add(dint.encoded_length);
    let Some(rest) = data.get(length..) else {
        return false;
    };

    match decode(rest, next_address) {
        Ok(next) if next.mnemonic == Mnemonic::Jmp => matches!(
            next.branch_target(),
            Some(target) if target == next_address || target == address
        ),
        _ => false,
    }
}

fn operands(instruction: &Instruction) -> Option<(Operand, Operand)> {
    Some((instruction.source?, instruction.destination?))
}

fn unimplemented<E: IlEmitter + ?Sized>(instruction: &Instruction, il: &mut E) {
    warn!(
        mnemonic = %instruction.mnemonic,
        address = il.current_address(),
        "no IL semantics, emitting barrier"
    );
    il.append(IlOp::Unimplemented {
        mnemonic: instruction.mnemonic,
    });
}

/// `dst = f(dst, src)`, then the source autoincrement.
fn lift_arith<E, F>(il: &mut E, instruction: &Instruction, size: u8, f: F)
where
    E: IlEmitter + ?Sized,
    F: FnOnce(Expr, Expr) -> Expr,
{
    let Some((src, dst)) = operands(instruction) else {
        return unimplemented(instruction, il);
    };
    let value = f(read_operand(&dst, size), read_operand(&src, size));
    let op = write_operand(&*il, instruction.mnemonic, &dst, size, value);
    il.append(op);
    autoincrement(il, &src);
}

/// `f(dst, src)` evaluated for flags only.
fn lift_flags_only<E, F>(il: &mut E, instruction: &Instruction, size: u8, f: F)
where
    E: IlEmitter + ?Sized,
    F: FnOnce(Expr, Expr) -> Expr,
{
    let Some((src, dst)) = operands(instruction) else {
        return unimplemented(instruction, il);
    };
    il.append(IlOp::Eval {
        expr: f(read_operand(&dst, size), read_operand(&src, size)),
    });
    autoincrement(il, &src);
}

/// Single-operand read-modify-write of the source operand.
fn lift_in_place<E, F>(il: &mut E, instruction: &Instruction, size: u8, f: F)
where
    E: IlEmitter + ?Sized,
    F: FnOnce(Expr) -> Expr,
{
    let Some(src) = instruction.source else {
        return unimplemented(instruction, il);
    };
    let value = f(read_operand(&src, size));
    let op = write_operand(&*il, instruction.mnemonic, &src, size, value);
    il.append(op);
    autoincrement(il, &src);
}

fn lift_call<E: IlEmitter + ?Sized>(il: &mut E, src: &Operand) {
    let register = src.register.unwrap_or(Register::Pc);
    match src.mode {
        AddressingMode::Immediate => il.append(IlOp::Call {
            target: Expr::const_ptr(src.value.unwrap_or(0)),
        }),
        // The target is loaded from the pre-increment address, but the
        // increment must be committed before the call.
        AddressingMode::IndirectAutoincrement => {
            let temp = il.new_temp();
            il.append(IlOp::SetReg {
                size: 2,
                reg: temp,
                value: Expr::reg(2, register),
            });
            il.append(increment(register, 2));
            il.append(IlOp::Call {
                target: Expr::load(2, Expr::reg(2, temp)),
            });
        }
        _ => il.append(IlOp::Call {
            target: read_operand(src, 2),
        }),
    }
}

/// Direct `goto` when the target is a known label, else an indirect jump.
fn jump<E: IlEmitter + ?Sized>(il: &E, target: Expr) -> IlOp {
    let label = target
        .constant_value()
        .and_then(|value| u16::try_from(value).ok())
        .and_then(|address| il.label_for_address(address));

    match label {
        Some(label) => IlOp::Goto { label },
        None => IlOp::Jump { target },
    }
}

fn cond_branch<E: IlEmitter + ?Sized>(il: &mut E, instruction: &Instruction, cond: Expr) {
    let Some(target) = instruction.branch_target() else {
        return unimplemented(instruction, il);
    };
    let fallthrough = il
        .current_address()
        .wrapping_add(instruction.encoded_length);

    let (on_true, true_known) = match il.label_for_address(target) {
        Some(label) => (label, true),
        None => (il.new_label(), false),
    };
    let (on_false, false_known) = match il.label_for_address(fallthrough) {
        Some(label) => (label, true),
        None => (il.new_label(), false),
    };

    il.append(IlOp::If {
        cond,
        on_true,
        on_false,
    });

    if !true_known {
        il.mark_label(on_true);
        il.append(IlOp::Jump {
            target: Expr::const_ptr(target),
        });
    }
    if !false_known {
        il.mark_label(on_false);
    }
}

/// Value of an operand as an IL expression.
fn read_operand(operand: &Operand, size: u8) -> Expr {
    let register = operand.register.unwrap_or(Register::Pc);
    let value = operand.value.unwrap_or(0);

    match operand.mode {
        AddressingMode::Register => Expr::reg(size, register),
        AddressingMode::Indexed => Expr::load(size, indexed_address(register, value)),
        AddressingMode::IndirectRegister | AddressingMode::IndirectAutoincrement => {
            Expr::load(size, Expr::reg(2, register))
        }
        AddressingMode::Symbolic => Expr::load(size, indexed_address(Register::Pc, value)),
        AddressingMode::Absolute => Expr::load(size, Expr::const_ptr(value)),
        AddressingMode::Immediate => {
            let value = if size == 1 { value & 0x00FF } else { value };
            Expr::constant(size, i64::from(value))
        }
        AddressingMode::Offset => Expr::const_ptr(value),
        mode => Expr::constant(size, i64::from(mode.constant_value().unwrap_or(0))),
    }
}

/// Operation storing `value` into an operand.
fn write_operand<E: IlEmitter + ?Sized>(
    il: &E,
    mnemonic: Mnemonic,
    operand: &Operand,
    size: u8,
    value: Expr,
) -> IlOp {
    let register = operand.register.unwrap_or(Register::Pc);
    let offset = operand.value.unwrap_or(0);

    match operand.mode {
        AddressingMode::Register => {
            let value = if size == 1 {
                Expr::unary(UnaryOp::ZeroExtend, 2, value)
            } else {
                value
            };
            IlOp::SetReg {
                size: 2,
                reg: IlReg::Arch(register),
                value,
            }
        }
        AddressingMode::Indexed => IlOp::Store {
            size,
            addr: indexed_address(register, offset),
            value,
        },
        AddressingMode::IndirectRegister | AddressingMode::IndirectAutoincrement => IlOp::Store {
            size,
            addr: Expr::reg(2, register),
            value,
        },
        AddressingMode::Symbolic => IlOp::Store {
            size,
            addr: indexed_address(Register::Pc, offset),
            value,
        },
        AddressingMode::Absolute => IlOp::Store {
            size,
            addr: Expr::const_ptr(offset),
            value,
        },
        // Constant-generator destinations keep only the flag effects.
        mode if mode.is_constant() => IlOp::Eval { expr: value },
        // Only single-operand read-modify-write reaches this (`rrc #n`); the
        // result lands in the extension word after the opcode.
        AddressingMode::Immediate => IlOp::Store {
            size,
            addr: Expr::const_ptr(il.current_address().wrapping_add(2)),
            value,
        },
        _ => {
            warn!(
                %mnemonic,
                address = il.current_address(),
                mode = ?operand.mode,
                "operand is not writable, emitting barrier"
            );
            IlOp::Unimplemented { mnemonic }
        }
    }
}

fn indexed_address(register: Register, offset: u16) -> Expr {
    Expr::add(2, Expr::reg(2, register), Expr::constant(2, i64::from(offset)))
}

fn increment(register: Register, by: u8) -> IlOp {
    IlOp::SetReg {
        size: 2,
        reg: IlReg::Arch(register),
        value: Expr::add(2, Expr::reg(2, register), Expr::constant(2, i64::from(by))),
    }
}

fn autoincrement<E: IlEmitter + ?Sized>(il: &mut E, src: &Operand) {
    if src.mode != AddressingMode::IndirectAutoincrement {
        return;
    }
    if let Some(register) = src.register {
        il.append(increment(register, src.width_bytes()));
    }
}
