//! Instruction decoder.
//!
//! Turns a byte slice and an address into an [`Instruction`]. This is the
//! single source of truth for everything downstream: the renderer and the
//! lifter never look at raw bytes.

use crate::encoding::{self, patterns};
use crate::error::{Msp430Error, Result};
use crate::types::{AddressingMode, Format, Instruction, Mnemonic, Operand, Register, Width};
use byteorder::{ByteOrder, LittleEndian};
use tracing::debug;

/// Shortest possible encoding.
pub const MIN_INSTRUCTION_LENGTH: usize = 2;

/// Decode one instruction from `data`, located at `address`.
///
/// `data` should cover the worst-case six bytes when available; the returned
/// [`Instruction::encoded_length`] tells the caller how many were consumed.
///
/// # Errors
///
/// * [`Msp430Error::InsufficientBytes`] when `data` is shorter than the
///   instruction's encoded length.
/// * [`Msp430Error::InvalidOpcode`] when the opcode has no mnemonic.
///
/// # Example
///
/// ```rust
/// use msp430_lift::{decode, Mnemonic};
///
/// // mov r5, r6
/// let instr = decode(&[0x06, 0x45], 0x4400)?;
/// assert_eq!(instr.mnemonic, Mnemonic::Mov);
/// assert_eq!(instr.encoded_length, 2);
/// # Ok::<(), msp430_lift::Msp430Error>(())
/// ```
pub fn decode(data: &[u8], address: u16) -> Result<Instruction> {
    if data.len() < MIN_INSTRUCTION_LENGTH {
        debug!(address, available = data.len(), "short buffer");
        return Err(Msp430Error::InsufficientBytes {
            expected: MIN_INSTRUCTION_LENGTH,
            actual: data.len(),
        });
    }

    let word = LittleEndian::read_u16(data);

    let Some(mut mnemonic) = encoding::mnemonic_for(word) else {
        debug!(address, word, "bad opcode");
        return Err(Msp430Error::InvalidOpcode { word });
    };

    let (format, mut source, mut destination) = match encoding::get_opcode(word) {
        0x1 => (Format::SingleOperand, Some(decode_single_source(word)), None),
        0x2 | 0x3 => (
            Format::Jump,
            Some(Operand::offset(encoding::jump_target(word, address))),
            None,
        ),
        _ => (
            Format::DoubleOperand,
            Some(decode_double_source(word)),
            Some(decode_destination(word)),
        ),
    };

    let extra = source.map_or(0, |op| op.extra_length) + destination.map_or(0, |op| op.extra_length);
    let length = MIN_INSTRUCTION_LENGTH + usize::from(extra);

    if data.len() < length {
        debug!(address, word, length, available = data.len(), "truncated operands");
        return Err(Msp430Error::InsufficientBytes {
            expected: length,
            actual: data.len(),
        });
    }

    // Extension words follow in operand order: source first.
    let mut offset = MIN_INSTRUCTION_LENGTH;
    for operand in [source.as_mut(), destination.as_mut()].into_iter().flatten() {
        if operand.needs_extra_word() {
            operand.value = Some(LittleEndian::read_u16(&data[offset..]));
            offset += 2;
        }
    }

    let mut is_emulated = false;

    if word == patterns::RET {
        mnemonic = Mnemonic::Ret;
        is_emulated = true;
    } else if mnemonic == Mnemonic::Mov
        && destination.and_then(|dst| dst.register) == Some(Register::Pc)
    {
        mnemonic = Mnemonic::Br;
        is_emulated = true;
    }

    Ok(Instruction {
        mnemonic,
        format,
        source,
        destination,
        encoded_length: length as u16,
        is_emulated,
    })
}

/// Apply the register-dependent reinterpretations of a raw source mode.
///
/// `pc`, `cg` and `sr` turn otherwise meaningless mode/register pairs into
/// immediates, PC-relative and absolute addressing, and the constants
/// 0, 1, 2, 4, 8 and -1.
pub fn resolve_source_mode(register: Register, raw: AddressingMode) -> AddressingMode {
    match (register, raw) {
        (Register::Pc, AddressingMode::Indexed) => AddressingMode::Symbolic,
        (Register::Pc, AddressingMode::IndirectAutoincrement) => AddressingMode::Immediate,

        (Register::Cg, AddressingMode::Register) => AddressingMode::Constant0,
        (Register::Cg, AddressingMode::Indexed) => AddressingMode::Constant1,
        (Register::Cg, AddressingMode::IndirectRegister) => AddressingMode::Constant2,
        (Register::Cg, _) => AddressingMode::ConstantNeg1,

        (Register::Sr, AddressingMode::Indexed) => AddressingMode::Absolute,
        (Register::Sr, AddressingMode::IndirectRegister) => AddressingMode::Constant4,
        (Register::Sr, AddressingMode::IndirectAutoincrement) => AddressingMode::Constant8,

        (_, mode) => mode,
    }
}

/// Destination mode from the single `Ad` bit. Only `sr` is aliased here.
pub fn resolve_destination_mode(register: Register, ad: u8) -> AddressingMode {
    if ad == 0 {
        AddressingMode::Register
    } else if register == Register::Sr {
        AddressingMode::Absolute
    } else {
        AddressingMode::Indexed
    }
}

fn decode_source(word: u16, register: Register) -> Operand {
    let raw = AddressingMode::from_as_bits(encoding::get_as(word));
    let width = Width::from_bw_bit(encoding::get_bw(word));
    Operand::new(resolve_source_mode(register, raw), register, width)
}

fn decode_single_source(word: u16) -> Operand {
    decode_source(word, Register::from_index(encoding::get_dst_reg(word)))
}

fn decode_double_source(word: u16) -> Operand {
    decode_source(word, Register::from_index(encoding::get_src_reg(word)))
}

fn decode_destination(word: u16) -> Operand {
    let register = Register::from_index(encoding::get_dst_reg(word));
    let width = Width::from_bw_bit(encoding::get_bw(word));
    Operand::new(
        resolve_destination_mode(register, encoding::get_ad(word)),
        register,
        width,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(w: u16) -> [u8; 2] {
        w.to_le_bytes()
    }

    #[test]
    fn test_mov_register_to_register() {
        let instr = decode(&word(0x4506), 0x4400).unwrap();
        assert_eq!(instr.mnemonic, Mnemonic::Mov);
        assert_eq!(instr.format, Format::DoubleOperand);
        assert_eq!(instr.encoded_length, 2);
        assert!(!instr.is_emulated);

        let src = instr.source.unwrap();
        assert_eq!(src.mode, AddressingMode::Register);
        assert_eq!(src.register, Some(Register::R5));
        assert_eq!(src.width, Some(Width::Word));

        let dst = instr.destination.unwrap();
        assert_eq!(dst.mode, AddressingMode::Register);
        assert_eq!(dst.register, Some(Register::R6));
    }

    #[test]
    fn test_constant_two_into_sp() {
        // mov #2, sp
        let instr = decode(&[0x21, 0x43], 0).unwrap();
        assert_eq!(instr.mnemonic, Mnemonic::Mov);
        let src = instr.source.unwrap();
        assert_eq!(src.mode, AddressingMode::Constant2);
        assert_eq!(src.value, None);
        assert_eq!(src.extra_length, 0);
        let dst = instr.destination.unwrap();
        assert_eq!(dst.mode, AddressingMode::Register);
        assert_eq!(dst.register, Some(Register::Sp));
        assert_eq!(instr.encoded_length, 2);
    }

    #[test]
    fn test_ret_literal() {
        for address in [0x0000, 0x4400, 0xFFFE] {
            let instr = decode(&[0x30, 0x41, 0xFF, 0xFF], address).unwrap();
            assert_eq!(instr.mnemonic, Mnemonic::Ret);
            assert_eq!(instr.encoded_length, 2);
            assert!(instr.is_emulated);
        }
    }

    #[test]
    fn test_mov_to_pc_is_br() {
        // mov r5, pc
        let instr = decode(&word(0x4500), 0).unwrap();
        assert_eq!(instr.mnemonic, Mnemonic::Br);
        assert!(instr.is_emulated);

        // mov #0x4450, pc
        let instr = decode(&[0x30, 0x40, 0x50, 0x44], 0).unwrap();
        assert_eq!(instr.mnemonic, Mnemonic::Br);
        let src = instr.source.unwrap();
        assert_eq!(src.mode, AddressingMode::Immediate);
        assert_eq!(src.value, Some(0x4450));
        assert_eq!(instr.encoded_length, 4);
    }

    #[test]
    fn test_constant_generator_aliasing() {
        let expected = [
            (0b00, AddressingMode::Constant0),
            (0b01, AddressingMode::Constant1),
            (0b10, AddressingMode::Constant2),
            (0b11, AddressingMode::ConstantNeg1),
        ];
        for (as_bits, mode) in expected {
            // double operand: add cg, r4
            let w = 0x5304 | (as_bits << 4);
            let instr = decode(&word(w), 0).unwrap();
            assert_eq!(instr.source.unwrap().mode, mode);
            assert_eq!(instr.source.unwrap().extra_length, 0);
            assert_eq!(instr.encoded_length, 2);

            // single operand: push cg
            let w = 0x1203 | (as_bits << 4);
            let instr = decode(&word(w), 0).unwrap();
            assert_eq!(instr.mnemonic, Mnemonic::Push);
            assert_eq!(instr.source.unwrap().mode, mode);
            assert_eq!(instr.encoded_length, 2);
        }
    }

    #[test]
    fn test_status_register_aliasing() {
        assert_eq!(
            resolve_source_mode(Register::Sr, AddressingMode::Register),
            AddressingMode::Register
        );
        assert_eq!(
            resolve_source_mode(Register::Sr, AddressingMode::Indexed),
            AddressingMode::Absolute
        );
        assert_eq!(
            resolve_source_mode(Register::Sr, AddressingMode::IndirectRegister),
            AddressingMode::Constant4
        );
        assert_eq!(
            resolve_source_mode(Register::Sr, AddressingMode::IndirectAutoincrement),
            AddressingMode::Constant8
        );
        assert_eq!(
            resolve_source_mode(Register::Pc, AddressingMode::IndirectRegister),
            AddressingMode::IndirectRegister
        );
        assert_eq!(
            resolve_source_mode(Register::R9, AddressingMode::Indexed),
            AddressingMode::Indexed
        );
    }

    #[test]
    fn test_destination_modes() {
        assert_eq!(resolve_destination_mode(Register::Sr, 1), AddressingMode::Absolute);
        assert_eq!(resolve_destination_mode(Register::Sr, 0), AddressingMode::Register);
        assert_eq!(resolve_destination_mode(Register::Cg, 1), AddressingMode::Indexed);
        assert_eq!(resolve_destination_mode(Register::R12, 1), AddressingMode::Indexed);
    }

    #[test]
    fn test_extension_word_order() {
        // mov 0x1234(r5), 0x5678(r6)
        let data = [0x96, 0x45, 0x34, 0x12, 0x78, 0x56];
        let instr = decode(&data, 0).unwrap();
        assert_eq!(instr.encoded_length, 6);
        assert_eq!(instr.source.unwrap().value, Some(0x1234));
        assert_eq!(instr.destination.unwrap().value, Some(0x5678));

        // mov r5, 0x5678(r6): destination word directly after the opcode
        let data = [0x86, 0x45, 0x78, 0x56];
        let instr = decode(&data, 0).unwrap();
        assert_eq!(instr.encoded_length, 4);
        assert_eq!(instr.source.unwrap().value, None);
        assert_eq!(instr.destination.unwrap().value, Some(0x5678));
    }

    #[test]
    fn test_absolute_destination() {
        // mov #0x00ff, &0x0200
        let data = [0xB2, 0x40, 0xFF, 0x00, 0x00, 0x02];
        let instr = decode(&data, 0).unwrap();
        let src = instr.source.unwrap();
        let dst = instr.destination.unwrap();
        assert_eq!(src.mode, AddressingMode::Immediate);
        assert_eq!(src.value, Some(0x00FF));
        assert_eq!(dst.mode, AddressingMode::Absolute);
        assert_eq!(dst.value, Some(0x0200));
    }

    #[test]
    fn test_length_law() {
        let samples: [&[u8]; 5] = [
            &[0x06, 0x45],
            &[0x86, 0x45, 0x78, 0x56],
            &[0x96, 0x45, 0x34, 0x12, 0x78, 0x56],
            &[0xB0, 0x12, 0x00, 0x44],
            &[0xFF, 0x3F],
        ];
        for data in samples {
            let instr = decode(data, 0x4400).unwrap();
            let len = usize::from(instr.encoded_length);
            assert_eq!(len, data.len());
            assert_eq!(len % 2, 0);
            assert!(decode(&data[..len], 0x4400).is_ok());
            assert!(matches!(
                decode(&data[..len - 1], 0x4400),
                Err(Msp430Error::InsufficientBytes { .. })
            ));
        }
    }

    #[test]
    fn test_short_buffer() {
        assert!(matches!(
            decode(&[], 0),
            Err(Msp430Error::InsufficientBytes {
                expected: 2,
                actual: 0
            })
        ));
        assert!(matches!(
            decode(&[0x30, 0x40, 0x50], 0),
            Err(Msp430Error::InsufficientBytes {
                expected: 4,
                actual: 3
            })
        ));
    }

    #[test]
    fn test_invalid_opcodes() {
        for w in [0x0000u16, 0x0FFF, 0x1380, 0x1400, 0x1C00] {
            assert!(matches!(
                decode(&word(w), 0),
                Err(Msp430Error::InvalidOpcode { word }) if word == w
            ));
        }
    }

    #[test]
    fn test_branch_offsets() {
        let instr = decode(&word(0x3FFF), 0x4400).unwrap();
        assert_eq!(instr.mnemonic, Mnemonic::Jmp);
        assert_eq!(instr.format, Format::Jump);
        assert_eq!(instr.branch_target(), Some(0x4400));
        assert_eq!(instr.source.unwrap().width, None);

        let instr = decode(&word(0x2001), 0x4400).unwrap();
        assert_eq!(instr.mnemonic, Mnemonic::Jnz);
        assert_eq!(instr.branch_target(), Some(0x4404));

        let instr = decode(&word(0x2E00), 0x4400).unwrap();
        assert_eq!(instr.mnemonic, Mnemonic::Jhs);
        assert_eq!(instr.branch_target(), Some(0x4400u16.wrapping_add(2).wrapping_sub(1024)));
    }

    #[test]
    fn test_byte_width() {
        // mov.b @r15+, r14
        let instr = decode(&word(0x4F7E), 0).unwrap();
        let src = instr.source.unwrap();
        assert_eq!(src.mode, AddressingMode::IndirectAutoincrement);
        assert_eq!(src.width, Some(Width::Byte));
        assert!(instr.is_byte_op());
    }

    #[test]
    fn test_single_operand_register_field() {
        // call #0x4558
        let instr = decode(&[0xB0, 0x12, 0x58, 0x45], 0).unwrap();
        assert_eq!(instr.mnemonic, Mnemonic::Call);
        assert_eq!(instr.format, Format::SingleOperand);
        assert_eq!(instr.destination, None);
        let src = instr.source.unwrap();
        assert_eq!(src.mode, AddressingMode::Immediate);
        assert_eq!(src.value, Some(0x4558));

        // rra r12
        let instr = decode(&word(0x110C), 0).unwrap();
        assert_eq!(instr.mnemonic, Mnemonic::Rra);
        assert_eq!(instr.source.unwrap().register, Some(Register::R12));
    }

    #[test]
    fn test_dint_shape() {
        let instr = decode(&word(0xC232), 0).unwrap();
        assert_eq!(instr.mnemonic, Mnemonic::Bic);
        assert!(instr.is_dint());
        assert!(!decode(&word(0xC222), 0).unwrap().is_dint());
    }
}
