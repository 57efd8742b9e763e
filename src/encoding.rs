//! MSP430 opcode-word layout.
//!
//! MSP430 uses 16-bit little-endian instruction words followed by up to two
//! extension words. The three formats share one word layout:
//!
//! ```text
//! double operand: [15:12]=opcode [11:8]=src [7]=Ad [6]=B/W [5:4]=As [3:0]=dst
//! single operand: [15:10]=000100 [9:7]=opcode [6]=B/W [5:4]=As [3:0]=reg
//! jump:           [15:13]=001 [12:10]=condition [9:0]=signed word offset
//! ```

use crate::types::Mnemonic;

/// Literal words decoded ahead of the opcode tables.
pub mod patterns {
    /// RET (MOV @SP+, PC).
    pub const RET: u16 = 0x4130;
}

/// Double-operand mnemonics indexed by `opcode - 4`.
pub const DOUBLE_OPERAND: [Mnemonic; 12] = [
    Mnemonic::Mov,
    Mnemonic::Add,
    Mnemonic::Addc,
    Mnemonic::Subc,
    Mnemonic::Sub,
    Mnemonic::Cmp,
    Mnemonic::Dadd,
    Mnemonic::Bit,
    Mnemonic::Bic,
    Mnemonic::Bis,
    Mnemonic::Xor,
    Mnemonic::And,
];

/// Single-operand mnemonics indexed by bits 9:7. Index 7 is unassigned.
pub const SINGLE_OPERAND: [Option<Mnemonic>; 8] = [
    Some(Mnemonic::Rrc),
    Some(Mnemonic::Swpb),
    Some(Mnemonic::Rra),
    Some(Mnemonic::Sxt),
    Some(Mnemonic::Push),
    Some(Mnemonic::Call),
    Some(Mnemonic::Reti),
    None,
];

/// Jump mnemonics indexed by `opcode - 2`, then bits 11:10.
pub const JUMPS: [[Mnemonic; 4]; 2] = [
    [Mnemonic::Jnz, Mnemonic::Jz, Mnemonic::Jlo, Mnemonic::Jhs],
    [Mnemonic::Jn, Mnemonic::Jge, Mnemonic::Jl, Mnemonic::Jmp],
];

/// Extract opcode (bits 15:12).
pub fn get_opcode(instr: u16) -> u8 {
    ((instr >> 12) & 0x0F) as u8
}

/// Extract single-operand sub-opcode (bits 9:7).
pub fn get_single_op(instr: u16) -> u8 {
    ((instr >> 7) & 0x07) as u8
}

/// Bits 11:10 of a single-operand word; must be zero on MSP430.
pub fn get_single_op_prefix(instr: u16) -> u8 {
    ((instr >> 10) & 0x03) as u8
}

/// Extract jump condition within its opcode (bits 11:10).
pub fn get_jump_cond(instr: u16) -> u8 {
    ((instr >> 10) & 0x03) as u8
}

/// Extract B/W bit (bit 6). true=byte, false=word.
pub fn get_bw(instr: u16) -> bool {
    (instr & 0x0040) != 0
}

/// Extract As field (source addressing mode, bits 5:4).
pub fn get_as(instr: u16) -> u8 {
    ((instr >> 4) & 0x03) as u8
}

/// Extract Ad field (destination addressing mode, bit 7).
pub fn get_ad(instr: u16) -> u8 {
    ((instr >> 7) & 0x01) as u8
}

/// Extract source register (bits 11:8 for two-op).
pub fn get_src_reg(instr: u16) -> u8 {
    ((instr >> 8) & 0x0F) as u8
}

/// Extract destination register (bits 3:0), also the single-operand register.
pub fn get_dst_reg(instr: u16) -> u8 {
    (instr & 0x0F) as u8
}

/// Jump displacement in bytes: bits 9:0 as a signed word count, doubled.
pub fn get_jump_offset(instr: u16) -> i16 {
    let words = (instr & 0x03FF) as i16;
    // Sign extend from 10 bits
    let words = if words & 0x0200 != 0 {
        words | !0x03FF
    } else {
        words
    };
    words << 1
}

/// Absolute target of a jump located at `address`.
pub fn jump_target(instr: u16, address: u16) -> u16 {
    address.wrapping_add(2).wrapping_add(get_jump_offset(instr) as u16)
}

/// Look up the mnemonic for an opcode word, without emulated fixups.
pub fn mnemonic_for(instr: u16) -> Option<Mnemonic> {
    match get_opcode(instr) {
        0x1 => {
            if get_single_op_prefix(instr) != 0 {
                return None;
            }
            SINGLE_OPERAND[usize::from(get_single_op(instr))]
        }
        op @ (0x2 | 0x3) => Some(JUMPS[usize::from(op - 2)][usize::from(get_jump_cond(instr))]),
        op @ 0x4..=0xF => Some(DOUBLE_OPERAND[usize::from(op - 4)]),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_extraction() {
        // MOV R5, R4 = 0x4504
        assert_eq!(get_opcode(0x4504), 0x4);
        assert_eq!(get_src_reg(0x4504), 5);
        assert_eq!(get_dst_reg(0x4504), 4);
    }

    #[test]
    fn test_bw_bit() {
        assert!(get_bw(0x4540));
        assert!(!get_bw(0x4500));
    }

    #[test]
    fn test_jump_offset() {
        assert_eq!(get_jump_offset(0x3C00), 0);
        assert_eq!(get_jump_offset(0x3FFF), -2);
        assert_eq!(get_jump_offset(0x3C05), 10);
        assert_eq!(get_jump_offset(0x3E00), -1024);
    }

    #[test]
    fn test_jump_target_wraps() {
        assert_eq!(jump_target(0x3FFF, 0x4400), 0x4400);
        assert_eq!(jump_target(0x3C01, 0x4400), 0x4404);
        assert_eq!(jump_target(0x3FFE, 0x0000), 0xFFFE);
    }

    #[test]
    fn test_mnemonic_tables() {
        assert_eq!(mnemonic_for(0x0000), None);
        assert_eq!(mnemonic_for(0x0FFF), None);
        assert_eq!(mnemonic_for(0x1285), Some(Mnemonic::Call));
        assert_eq!(mnemonic_for(0x1205), Some(Mnemonic::Push));
        assert_eq!(mnemonic_for(0x1300), Some(Mnemonic::Reti));
        assert_eq!(mnemonic_for(0x1380), None);
        assert_eq!(mnemonic_for(0x1405), None);
        assert_eq!(mnemonic_for(0x2000), Some(Mnemonic::Jnz));
        assert_eq!(mnemonic_for(0x2C00), Some(Mnemonic::Jhs));
        assert_eq!(mnemonic_for(0x3000), Some(Mnemonic::Jn));
        assert_eq!(mnemonic_for(0x3C00), Some(Mnemonic::Jmp));
        assert_eq!(mnemonic_for(0x4504), Some(Mnemonic::Mov));
        assert_eq!(mnemonic_for(0xA504), Some(Mnemonic::Dadd));
        assert_eq!(mnemonic_for(0xF504), Some(Mnemonic::And));
    }

    #[test]
    fn test_patterns() {
        assert_eq!(mnemonic_for(patterns::RET), Some(Mnemonic::Mov));
        assert_eq!(mnemonic_for(0xC232), Some(Mnemonic::Bic));
        assert_eq!(mnemonic_for(0x4303), Some(Mnemonic::Mov));
    }
}
