//! Text rendering of decoded instructions.
//!
//! The renderer turns an [`Instruction`] into typed display tokens. Token
//! shapes per addressing mode are fixed so downstream tooling can parse the
//! text back.

use crate::types::{AddressingMode, Format, Instruction, Mnemonic, Operand, Register};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Column the first operand starts at.
pub const MNEMONIC_COLUMN: usize = 8;

/// Separator between source and destination operands.
pub const OPERAND_SEPARATOR: &str = ", ";

/// Kind of a display token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    /// Mnemonic, punctuation and separators.
    Text,
    /// A register name.
    Register,
    /// An integer literal.
    Integer,
    /// A value that probably is a code or data address.
    PossibleAddress,
    /// An offset relative to the program counter.
    CodeRelativeAddress,
}

/// One typed piece of rendered disassembly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayToken {
    /// Token kind.
    pub kind: TokenKind,
    /// Rendered text.
    pub text: String,
    /// Numeric value for integer and address tokens.
    pub value: Option<i64>,
}

impl DisplayToken {
    /// Plain text token.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: TokenKind::Text,
            text: text.into(),
            value: None,
        }
    }

    /// Register name token.
    pub fn register(register: Register) -> Self {
        Self {
            kind: TokenKind::Register,
            text: register.name().to_string(),
            value: None,
        }
    }

    /// Integer literal rendered in hex.
    pub fn hex_integer(value: u16) -> Self {
        Self::valued(TokenKind::Integer, format!("{:#x}", value), i64::from(value))
    }

    /// Integer literal rendered in decimal.
    pub fn integer(value: i16) -> Self {
        Self::valued(TokenKind::Integer, value.to_string(), i64::from(value))
    }

    /// Address token rendered in hex.
    pub fn address(kind: TokenKind, value: u16) -> Self {
        Self::valued(kind, format!("{:#x}", value), i64::from(value))
    }

    fn valued(kind: TokenKind, text: String, value: i64) -> Self {
        Self {
            kind,
            text,
            value: Some(value),
        }
    }
}

impl fmt::Display for DisplayToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}

/// Rendered instruction: tokens plus the number of bytes consumed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedInstruction {
    /// Display tokens in order.
    pub tokens: Vec<DisplayToken>,
    /// Encoded length of the instruction.
    pub length: u16,
}

impl fmt::Display for RenderedInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for token in &self.tokens {
            token.fmt(f)?;
        }
        Ok(())
    }
}

/// Render an instruction as display tokens.
///
/// ```rust
/// use msp430_lift::{decode, render};
///
/// let instr = decode(&[0x06, 0x45], 0)?;
/// assert_eq!(render(&instr).to_string(), "mov     r5, r6");
/// # Ok::<(), msp430_lift::Msp430Error>(())
/// ```
pub fn render(instruction: &Instruction) -> RenderedInstruction {
    let mut tokens = Vec::new();

    let mut mnemonic = instruction.mnemonic.name().to_string();
    if instruction.is_byte_op() {
        mnemonic.push_str(".b");
    }

    if has_no_operands(instruction.mnemonic) {
        tokens.push(DisplayToken::text(mnemonic));
    } else {
        tokens.push(DisplayToken::text(format!(
            "{:<width$}",
            mnemonic,
            width = MNEMONIC_COLUMN
        )));

        if let Some(src) = &instruction.source {
            tokens.extend(operand_tokens(src));
        }

        if instruction.format == Format::DoubleOperand {
            if let Some(dst) = &instruction.destination {
                tokens.push(DisplayToken::text(OPERAND_SEPARATOR));
                tokens.extend(operand_tokens(dst));
            }
        }
    }

    RenderedInstruction {
        tokens,
        length: instruction.encoded_length,
    }
}

/// `ret` and the fused `hlt` print without their implied operands.
fn has_no_operands(mnemonic: Mnemonic) -> bool {
    matches!(mnemonic, Mnemonic::Ret | Mnemonic::Hlt)
}

/// Token shape of a single operand.
pub fn operand_tokens(operand: &Operand) -> Vec<DisplayToken> {
    let value = operand.value.unwrap_or(0);
    let register = operand.register.unwrap_or(Register::Pc);

    match operand.mode {
        AddressingMode::Register => vec![DisplayToken::register(register)],
        AddressingMode::Indexed => vec![
            DisplayToken::hex_integer(value),
            DisplayToken::text("("),
            DisplayToken::register(register),
            DisplayToken::text(")"),
        ],
        AddressingMode::IndirectRegister => {
            vec![DisplayToken::text("@"), DisplayToken::register(register)]
        }
        AddressingMode::IndirectAutoincrement => vec![
            DisplayToken::text("@"),
            DisplayToken::register(register),
            DisplayToken::text("+"),
        ],
        AddressingMode::Symbolic => {
            vec![DisplayToken::address(TokenKind::CodeRelativeAddress, value)]
        }
        AddressingMode::Absolute => vec![
            DisplayToken::text("&"),
            DisplayToken::address(TokenKind::PossibleAddress, value),
        ],
        AddressingMode::Immediate | AddressingMode::Offset => {
            vec![DisplayToken::address(TokenKind::PossibleAddress, value)]
        }
        AddressingMode::Constant0
        | AddressingMode::Constant1
        | AddressingMode::Constant2
        | AddressingMode::Constant4
        | AddressingMode::Constant8
        | AddressingMode::ConstantNeg1 => {
            vec![DisplayToken::integer(operand.mode.constant_value().unwrap_or(0))]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::decode;

    fn text(data: &[u8], address: u16) -> String {
        render(&decode(data, address).unwrap()).to_string()
    }

    #[test]
    fn test_double_operand_mnemonics() {
        let expected = [
            (0x4506u16, "mov     r5, r6"),
            (0x5506, "add     r5, r6"),
            (0x6506, "addc    r5, r6"),
            (0x7506, "subc    r5, r6"),
            (0x8506, "sub     r5, r6"),
            (0x9506, "cmp     r5, r6"),
            (0xA506, "dadd    r5, r6"),
            (0xB506, "bit     r5, r6"),
            (0xC506, "bic     r5, r6"),
            (0xD506, "bis     r5, r6"),
            (0xE506, "xor     r5, r6"),
            (0xF506, "and     r5, r6"),
        ];
        for (word, rendered) in expected {
            assert_eq!(text(&word.to_le_bytes(), 0), rendered);
        }
    }

    #[test]
    fn test_source_mode_shapes() {
        // mov 0x10(r5), r6
        assert_eq!(text(&[0x16, 0x45, 0x10, 0x00], 0), "mov     0x10(r5), r6");
        // mov @r5, r6
        assert_eq!(text(&[0x26, 0x45], 0), "mov     @r5, r6");
        // mov @r5+, r6
        assert_eq!(text(&[0x36, 0x45], 0), "mov     @r5+, r6");
        // mov 0x20(pc), r6
        assert_eq!(text(&[0x16, 0x40, 0x20, 0x00], 0), "mov     0x20, r6");
        // mov &0x0200, r6
        assert_eq!(text(&[0x16, 0x42, 0x00, 0x02], 0), "mov     &0x200, r6");
        // mov #0x1234, r6
        assert_eq!(text(&[0x36, 0x40, 0x34, 0x12], 0), "mov     0x1234, r6");
        // constants
        assert_eq!(text(&[0x06, 0x43], 0), "mov     0, r6");
        assert_eq!(text(&[0x16, 0x43], 0), "mov     1, r6");
        assert_eq!(text(&[0x26, 0x43], 0), "mov     2, r6");
        assert_eq!(text(&[0x26, 0x42], 0), "mov     4, r6");
        assert_eq!(text(&[0x36, 0x42], 0), "mov     8, r6");
        assert_eq!(text(&[0x36, 0x43], 0), "mov     -1, r6");
    }

    #[test]
    fn test_destination_shapes() {
        // mov r5, 0x4(r6)
        assert_eq!(text(&[0x86, 0x45, 0x04, 0x00], 0), "mov     r5, 0x4(r6)");
        // mov r5, &0x0200
        assert_eq!(text(&[0x82, 0x45, 0x00, 0x02], 0), "mov     r5, &0x200");
    }

    #[test]
    fn test_byte_suffix() {
        assert_eq!(text(&[0x7E, 0x4F], 0), "mov.b   @r15+, r14");
        assert_eq!(text(&[0x4C, 0x11], 0), "rra.b   r12");
    }

    #[test]
    fn test_single_operand_and_jump() {
        assert_eq!(text(&[0xB0, 0x12, 0x58, 0x45], 0), "call    0x4558");
        assert_eq!(text(&[0x0B, 0x12], 0), "push    r11");
        assert_eq!(text(&[0xFF, 0x3F], 0x4400), "jmp     0x4400");
        assert_eq!(text(&[0x01, 0x24], 0x4400), "jz      0x4404");
        assert_eq!(text(&[0x00, 0x45], 0), "br      r5, pc");
        assert_eq!(text(&[0x30, 0x40, 0x50, 0x44], 0), "br      0x4450, pc");
    }

    #[test]
    fn test_operandless() {
        assert_eq!(text(&[0x30, 0x41], 0), "ret");
        assert_eq!(text(&[0x00, 0x13], 0), "reti    pc");
    }

    #[test]
    fn test_token_kinds() {
        let rendered = render(&decode(&[0x16, 0x42, 0x00, 0x02], 0).unwrap());
        let kinds: Vec<_> = rendered.tokens.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Text,
                TokenKind::Text,
                TokenKind::PossibleAddress,
                TokenKind::Text,
                TokenKind::Register,
            ]
        );
        assert_eq!(rendered.tokens[2].value, Some(0x200));
        assert_eq!(rendered.length, 4);

        let rendered = render(&decode(&[0x36, 0x43], 0).unwrap());
        assert_eq!(rendered.tokens[1].kind, TokenKind::Integer);
        assert_eq!(rendered.tokens[1].value, Some(-1));

        let rendered = render(&decode(&[0x16, 0x40, 0x20, 0x00], 0).unwrap());
        assert_eq!(rendered.tokens[1].kind, TokenKind::CodeRelativeAddress);
    }
}
