//! Core types for the MSP430 core.
//!
//! This module defines the decoded-instruction data model shared by the
//! decoder, the text renderer and the IL lifter, plus the options used by
//! the linear-sweep helpers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The sixteen MSP430 CPU registers.
///
/// `pc`, `sp`, `sr` and `cg` carry special decoding semantics; `r4`..`r15`
/// are general purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Register {
    /// Program counter (r0).
    Pc = 0,
    /// Stack pointer (r1).
    Sp = 1,
    /// Status register (r2), doubles as constant generator for 4 and 8.
    Sr = 2,
    /// Constant generator (r3).
    Cg = 3,
    /// General purpose register r4.
    R4 = 4,
    /// General purpose register r5.
    R5 = 5,
    /// General purpose register r6.
    R6 = 6,
    /// General purpose register r7.
    R7 = 7,
    /// General purpose register r8.
    R8 = 8,
    /// General purpose register r9.
    R9 = 9,
    /// General purpose register r10.
    R10 = 10,
    /// General purpose register r11.
    R11 = 11,
    /// General purpose register r12.
    R12 = 12,
    /// General purpose register r13.
    R13 = 13,
    /// General purpose register r14.
    R14 = 14,
    /// General purpose register r15.
    R15 = 15,
}

impl Register {
    /// All registers in encoding order.
    pub const ALL: [Register; 16] = [
        Register::Pc,
        Register::Sp,
        Register::Sr,
        Register::Cg,
        Register::R4,
        Register::R5,
        Register::R6,
        Register::R7,
        Register::R8,
        Register::R9,
        Register::R10,
        Register::R11,
        Register::R12,
        Register::R13,
        Register::R14,
        Register::R15,
    ];

    /// Register for a 4-bit encoding field. Bits above the low nibble are ignored.
    pub fn from_index(index: u8) -> Self {
        Self::ALL[usize::from(index & 0x0F)]
    }

    /// The 4-bit encoding of this register.
    pub fn index(self) -> u8 {
        self as u8
    }

    /// Assembly name of the register.
    pub fn name(self) -> &'static str {
        match self {
            Register::Pc => "pc",
            Register::Sp => "sp",
            Register::Sr => "sr",
            Register::Cg => "cg",
            Register::R4 => "r4",
            Register::R5 => "r5",
            Register::R6 => "r6",
            Register::R7 => "r7",
            Register::R8 => "r8",
            Register::R9 => "r9",
            Register::R10 => "r10",
            Register::R11 => "r11",
            Register::R12 => "r12",
            Register::R13 => "r13",
            Register::R14 => "r14",
            Register::R15 => "r15",
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Operand width selected by the B/W bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Width {
    /// 8-bit operation (`.b` suffix).
    Byte,
    /// 16-bit operation.
    Word,
}

impl Width {
    /// Width from the B/W bit: set means byte.
    pub fn from_bw_bit(byte: bool) -> Self {
        if byte {
            Width::Byte
        } else {
            Width::Word
        }
    }

    /// Size in bytes (1 or 2).
    pub fn bytes(self) -> u8 {
        match self {
            Width::Byte => 1,
            Width::Word => 2,
        }
    }
}

impl fmt::Display for Width {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Width::Byte => write!(f, "byte"),
            Width::Word => write!(f, "word"),
        }
    }
}

/// Resolved addressing mode of an operand.
///
/// The hardware only encodes four modes; the rest are reinterpretations that
/// depend on which register the operand names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressingMode {
    /// `Rn`
    Register,
    /// `X(Rn)`
    Indexed,
    /// `@Rn`
    IndirectRegister,
    /// `@Rn+`
    IndirectAutoincrement,
    /// `X(pc)`, rendered as the raw PC-relative offset.
    Symbolic,
    /// `&ADDR`, encoded as `X(sr)`.
    Absolute,
    /// `#N`, encoded as `@pc+`.
    Immediate,
    /// Constant generator 0 (`cg` register mode).
    Constant0,
    /// Constant generator 1 (`cg` indexed mode).
    Constant1,
    /// Constant generator 2 (`cg` indirect mode).
    Constant2,
    /// Constant generator 4 (`sr` indirect mode).
    Constant4,
    /// Constant generator 8 (`sr` autoincrement mode).
    Constant8,
    /// Constant generator -1 (`cg` autoincrement mode).
    ConstantNeg1,
    /// Jump target; the operand value is already an absolute address.
    Offset,
}

impl AddressingMode {
    /// Raw source mode for the 2-bit `As` field.
    pub fn from_as_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b00 => AddressingMode::Register,
            0b01 => AddressingMode::Indexed,
            0b10 => AddressingMode::IndirectRegister,
            _ => AddressingMode::IndirectAutoincrement,
        }
    }

    /// Number of extension bytes this mode consumes (0 or 2).
    pub const fn extra_length(self) -> u8 {
        match self {
            AddressingMode::Indexed
            | AddressingMode::Symbolic
            | AddressingMode::Absolute
            | AddressingMode::Immediate => 2,
            _ => 0,
        }
    }

    /// Literal synthesized by a constant-generator mode.
    pub const fn constant_value(self) -> Option<i16> {
        match self {
            AddressingMode::Constant0 => Some(0),
            AddressingMode::Constant1 => Some(1),
            AddressingMode::Constant2 => Some(2),
            AddressingMode::Constant4 => Some(4),
            AddressingMode::Constant8 => Some(8),
            AddressingMode::ConstantNeg1 => Some(-1),
            _ => None,
        }
    }

    /// Whether this is one of the six constant-generator modes.
    pub const fn is_constant(self) -> bool {
        self.constant_value().is_some()
    }

    /// Short descriptive name.
    pub fn name(self) -> &'static str {
        match self {
            AddressingMode::Register => "register",
            AddressingMode::Indexed => "indexed",
            AddressingMode::IndirectRegister => "indirect register",
            AddressingMode::IndirectAutoincrement => "indirect autoincrement",
            AddressingMode::Symbolic => "symbolic",
            AddressingMode::Absolute => "absolute",
            AddressingMode::Immediate => "immediate",
            AddressingMode::Constant0 => "constant 0",
            AddressingMode::Constant1 => "constant 1",
            AddressingMode::Constant2 => "constant 2",
            AddressingMode::Constant4 => "constant 4",
            AddressingMode::Constant8 => "constant 8",
            AddressingMode::ConstantNeg1 => "constant -1",
            AddressingMode::Offset => "offset",
        }
    }
}

impl fmt::Display for AddressingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A decoded operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operand {
    /// Resolved addressing mode.
    pub mode: AddressingMode,
    /// Register named by the encoding (absent for jump offsets).
    pub register: Option<Register>,
    /// Operand width (absent for jump offsets).
    pub width: Option<Width>,
    /// Extension word, or the absolute branch target for `Offset` mode.
    pub value: Option<u16>,
    /// Extension bytes consumed by this operand.
    pub extra_length: u8,
}

impl Operand {
    /// Operand with no value resolved yet.
    pub fn new(mode: AddressingMode, register: Register, width: Width) -> Self {
        Self {
            mode,
            register: Some(register),
            width: Some(width),
            value: None,
            extra_length: mode.extra_length(),
        }
    }

    /// Jump operand carrying an absolute target address.
    pub fn offset(target: u16) -> Self {
        Self {
            mode: AddressingMode::Offset,
            register: None,
            width: None,
            value: Some(target),
            extra_length: 0,
        }
    }

    /// Whether an extension word follows the opcode for this operand.
    pub fn needs_extra_word(&self) -> bool {
        self.extra_length != 0
    }

    /// Width in bytes; word when the operand has no width.
    pub fn width_bytes(&self) -> u8 {
        self.width.map_or(2, Width::bytes)
    }
}

/// Instruction encoding format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Format {
    /// Type 2: one source operand.
    SingleOperand,
    /// Type 1: source and destination operands.
    DoubleOperand,
    /// Type 3: relative jump carrying an offset.
    Jump,
}

/// Instruction mnemonics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mnemonic {
    // Double operand
    /// Move.
    Mov,
    /// Add.
    Add,
    /// Add with carry.
    Addc,
    /// Subtract with borrow.
    Subc,
    /// Subtract.
    Sub,
    /// Compare.
    Cmp,
    /// Decimal add.
    Dadd,
    /// Bit test.
    Bit,
    /// Bit clear.
    Bic,
    /// Bit set.
    Bis,
    /// Exclusive or.
    Xor,
    /// And.
    And,

    // Single operand
    /// Rotate right through carry.
    Rrc,
    /// Swap bytes.
    Swpb,
    /// Arithmetic shift right.
    Rra,
    /// Sign-extend byte to word.
    Sxt,
    /// Push onto the stack.
    Push,
    /// Call subroutine.
    Call,
    /// Return from interrupt.
    Reti,

    // Jumps
    /// Jump if not zero.
    Jnz,
    /// Jump if zero.
    Jz,
    /// Jump if lower (carry clear).
    Jlo,
    /// Jump if higher or same (carry set).
    Jhs,
    /// Jump if negative.
    Jn,
    /// Jump if greater or equal (signed).
    Jge,
    /// Jump if less (signed).
    Jl,
    /// Unconditional jump.
    Jmp,

    // Emulated
    /// `mov src, pc`
    Br,
    /// `mov @sp+, pc`
    Ret,
    /// `dint` followed by a jump to itself; only produced by the lifter.
    Hlt,
}

impl Mnemonic {
    /// Assembly name.
    pub fn name(self) -> &'static str {
        match self {
            Mnemonic::Mov => "mov",
            Mnemonic::Add => "add",
            Mnemonic::Addc => "addc",
            Mnemonic::Subc => "subc",
            Mnemonic::Sub => "sub",
            Mnemonic::Cmp => "cmp",
            Mnemonic::Dadd => "dadd",
            Mnemonic::Bit => "bit",
            Mnemonic::Bic => "bic",
            Mnemonic::Bis => "bis",
            Mnemonic::Xor => "xor",
            Mnemonic::And => "and",
            Mnemonic::Rrc => "rrc",
            Mnemonic::Swpb => "swpb",
            Mnemonic::Rra => "rra",
            Mnemonic::Sxt => "sxt",
            Mnemonic::Push => "push",
            Mnemonic::Call => "call",
            Mnemonic::Reti => "reti",
            Mnemonic::Jnz => "jnz",
            Mnemonic::Jz => "jz",
            Mnemonic::Jlo => "jlo",
            Mnemonic::Jhs => "jhs",
            Mnemonic::Jn => "jn",
            Mnemonic::Jge => "jge",
            Mnemonic::Jl => "jl",
            Mnemonic::Jmp => "jmp",
            Mnemonic::Br => "br",
            Mnemonic::Ret => "ret",
            Mnemonic::Hlt => "hlt",
        }
    }

    /// Conditional jumps (every jump except `jmp`).
    pub fn is_conditional_jump(self) -> bool {
        matches!(
            self,
            Mnemonic::Jnz
                | Mnemonic::Jz
                | Mnemonic::Jlo
                | Mnemonic::Jhs
                | Mnemonic::Jn
                | Mnemonic::Jge
                | Mnemonic::Jl
        )
    }
}

impl fmt::Display for Mnemonic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A decoded MSP430 instruction.
///
/// Built fresh by every decode call. Only the lifter's halt-idiom check
/// rewrites it afterwards (`dint` + self-jump becomes [`Mnemonic::Hlt`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    /// Mnemonic, after emulated-instruction fixups.
    pub mnemonic: Mnemonic,
    /// Encoding format.
    pub format: Format,
    /// Source operand; the jump target for jumps.
    pub source: Option<Operand>,
    /// Destination operand (double-operand format only).
    pub destination: Option<Operand>,
    /// Encoded length in bytes: even, between 2 and 6.
    pub encoded_length: u16,
    /// Whether the mnemonic is an alias of another encoding.
    pub is_emulated: bool,
}

impl Instruction {
    /// Operand width, taken from the source operand.
    pub fn width(&self) -> Option<Width> {
        self.source.and_then(|src| src.width)
    }

    /// Whether the B/W bit selected a byte operation.
    pub fn is_byte_op(&self) -> bool {
        self.width() == Some(Width::Byte)
    }

    /// Absolute target of a jump instruction.
    pub fn branch_target(&self) -> Option<u16> {
        match self.source {
            Some(src) if src.mode == AddressingMode::Offset => src.value,
            _ => None,
        }
    }

    /// `dint` is encoded as `bic #8, sr`.
    pub fn is_dint(&self) -> bool {
        match (self.mnemonic, self.source, self.destination) {
            (Mnemonic::Bic, Some(src), Some(dst)) => {
                src.mode == AddressingMode::Constant8
                    && dst.mode == AddressingMode::Register
                    && dst.register == Some(Register::Sr)
                    && src.width == Some(Width::Word)
            }
            _ => false,
        }
    }
}

/// Options for linear-sweep disassembly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisassemblyOptions {
    /// Address of the first byte of the image.
    pub base_address: u16,
    /// Stop after this many entries.
    pub max_instructions: Option<usize>,
    /// Stop at the first undecodable word instead of skipping it.
    pub stop_on_invalid: bool,
    /// Fuse `dint` + self-jump into `hlt` when lifting.
    pub fuse_halt_idiom: bool,
}

impl Default for DisassemblyOptions {
    fn default() -> Self {
        Self {
            base_address: 0,
            max_instructions: None,
            stop_on_invalid: false,
            fuse_halt_idiom: true,
        }
    }
}

impl DisassemblyOptions {
    /// Create options with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the load address of the image.
    #[must_use]
    pub fn with_base_address(mut self, base_address: u16) -> Self {
        self.base_address = base_address;
        self
    }

    /// Limit the number of listed entries.
    #[must_use]
    pub fn with_max_instructions(mut self, max: usize) -> Self {
        self.max_instructions = Some(max);
        self
    }
}
