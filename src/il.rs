//! Register-transfer intermediate language.
//!
//! The lifter appends [`IlOp`] statements built from [`Expr`] trees to a
//! caller-owned emission context implementing [`IlEmitter`]. [`IlFunction`]
//! is the in-crate context: it records operations in order, hands out
//! transient registers scoped to one lift call, and resolves addresses to
//! labels.

use crate::error::{Msp430Error, Result};
use crate::types::{Mnemonic, Register};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The four status flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Flag {
    /// Overflow.
    V,
    /// Negative.
    N,
    /// Carry.
    C,
    /// Zero.
    Z,
}

impl Flag {
    /// Flag name.
    pub fn name(self) -> &'static str {
        match self {
            Flag::V => "v",
            Flag::N => "n",
            Flag::C => "c",
            Flag::Z => "z",
        }
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

bitflags! {
    /// Set of flags an operation writes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct FlagSet: u8 {
        /// Overflow.
        const V = 0b0001;
        /// Negative.
        const N = 0b0010;
        /// Carry.
        const C = 0b0100;
        /// Zero.
        const Z = 0b1000;

        /// General arithmetic and logic (`*`).
        const ALL = Self::V.bits() | Self::N.bits() | Self::C.bits() | Self::Z.bits();
        /// Shift-style operations.
        const CNZ = Self::C.bits() | Self::N.bits() | Self::Z.bits();
        /// Carry, negative and overflow.
        const CNV = Self::C.bits() | Self::N.bits() | Self::V.bits();
    }
}

impl fmt::Display for FlagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Named write groups print under their group name.
        match *self {
            FlagSet::ALL => return write!(f, "*"),
            FlagSet::CNZ => return write!(f, "cnz"),
            FlagSet::CNV => return write!(f, "cnv"),
            _ => {}
        }
        for (flag, bit) in [
            (Flag::C, FlagSet::C),
            (Flag::N, FlagSet::N),
            (Flag::V, FlagSet::V),
            (Flag::Z, FlagSet::Z),
        ] {
            if self.contains(bit) {
                write!(f, "{}", flag)?;
            }
        }
        Ok(())
    }
}

/// Flag conditions a branch predicate can test.
///
/// There is deliberately no "negative" condition: `jn` composes its
/// predicate as `n == 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagCondition {
    /// Equal (`z` set).
    E,
    /// Not equal (`z` clear).
    Ne,
    /// Signed less than (`n != v`).
    Slt,
    /// Signed greater or equal (`n == v`).
    Sge,
    /// Unsigned less than (`c` clear).
    Ult,
    /// Unsigned greater or equal (`c` set).
    Uge,
}

impl FlagCondition {
    /// Flags the condition reads.
    pub fn required_flags(self) -> FlagSet {
        match self {
            FlagCondition::E | FlagCondition::Ne => FlagSet::Z,
            FlagCondition::Slt | FlagCondition::Sge => FlagSet::N | FlagSet::V,
            FlagCondition::Ult | FlagCondition::Uge => FlagSet::C,
        }
    }

    /// Short name.
    pub fn name(self) -> &'static str {
        match self {
            FlagCondition::E => "e",
            FlagCondition::Ne => "ne",
            FlagCondition::Slt => "slt",
            FlagCondition::Sge => "sge",
            FlagCondition::Ult => "ult",
            FlagCondition::Uge => "uge",
        }
    }
}

/// A storage location: an architectural register or a transient temp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IlReg {
    /// CPU register.
    Arch(Register),
    /// Temp allocated for the duration of one lift call.
    Temp(u32),
}

impl From<Register> for IlReg {
    fn from(register: Register) -> Self {
        IlReg::Arch(register)
    }
}

impl fmt::Display for IlReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IlReg::Arch(register) => write!(f, "{}", register),
            IlReg::Temp(index) => write!(f, "temp{}", index),
        }
    }
}

/// Handle of a control-flow label inside one emission context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Label(pub u32);

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "label_{}", self.0)
    }
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    /// Two's-complement addition.
    Add,
    /// Two's-complement subtraction (`lhs - rhs`).
    Sub,
    /// Bitwise and.
    And,
    /// Bitwise or.
    Or,
    /// Bitwise exclusive or.
    Xor,
    /// Arithmetic right shift of `lhs` by `rhs`.
    ArithShiftRight,
    /// Rotate `lhs` left by `rhs`.
    RotateLeft,
}

impl BinaryOp {
    fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::And => "&",
            BinaryOp::Or => "|",
            BinaryOp::Xor => "^",
            BinaryOp::ArithShiftRight => "s>>",
            BinaryOp::RotateLeft => "rol",
        }
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    /// Bitwise complement.
    Not,
    /// Sign extension to the node size.
    SignExtend,
    /// Zero extension to the node size.
    ZeroExtend,
}

/// IL expression tree. Sizes are in bytes; size 0 is a single flag bit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Expr {
    /// Integer literal.
    Const {
        /// Size in bytes.
        size: u8,
        /// Value, sign preserved.
        value: i64,
    },
    /// Literal address.
    ConstPtr {
        /// Size in bytes.
        size: u8,
        /// Address.
        value: u16,
    },
    /// Register read.
    Reg {
        /// Size in bytes.
        size: u8,
        /// Register or temp.
        reg: IlReg,
    },
    /// Flag read.
    Flag {
        /// The flag.
        flag: Flag,
    },
    /// Memory read.
    Load {
        /// Size in bytes.
        size: u8,
        /// Address expression.
        addr: Box<Expr>,
    },
    /// Stack pop.
    Pop {
        /// Size in bytes.
        size: u8,
    },
    /// Binary operation.
    Binary {
        /// Operator.
        op: BinaryOp,
        /// Size in bytes.
        size: u8,
        /// Left operand.
        lhs: Box<Expr>,
        /// Right operand.
        rhs: Box<Expr>,
        /// Flags written.
        flags: FlagSet,
    },
    /// Rotate right through carry.
    RotateRightCarry {
        /// Size in bytes.
        size: u8,
        /// Value rotated.
        value: Box<Expr>,
        /// Rotate count.
        count: Box<Expr>,
        /// Incoming carry.
        carry: Box<Expr>,
        /// Flags written.
        flags: FlagSet,
    },
    /// Unary operation.
    Unary {
        /// Operator.
        op: UnaryOp,
        /// Size in bytes of the result.
        size: u8,
        /// Operand.
        value: Box<Expr>,
        /// Flags written.
        flags: FlagSet,
    },
    /// Branch predicate over the flags.
    FlagCondition {
        /// Condition tested.
        cond: FlagCondition,
    },
    /// Equality test yielding one bit.
    CompareEqual {
        /// Operand size in bytes.
        size: u8,
        /// Left operand.
        lhs: Box<Expr>,
        /// Right operand.
        rhs: Box<Expr>,
    },
}

impl Expr {
    /// Integer literal.
    pub fn constant(size: u8, value: i64) -> Self {
        Expr::Const { size, value }
    }

    /// Word-sized address literal.
    pub fn const_ptr(value: u16) -> Self {
        Expr::ConstPtr { size: 2, value }
    }

    /// Register or temp read.
    pub fn reg(size: u8, reg: impl Into<IlReg>) -> Self {
        Expr::Reg {
            size,
            reg: reg.into(),
        }
    }

    /// Flag read.
    pub fn flag(flag: Flag) -> Self {
        Expr::Flag { flag }
    }

    /// Memory read.
    pub fn load(size: u8, addr: Expr) -> Self {
        Expr::Load {
            size,
            addr: Box::new(addr),
        }
    }

    /// Stack pop.
    pub fn pop(size: u8) -> Self {
        Expr::Pop { size }
    }

    /// Binary operation writing no flags.
    pub fn binary(op: BinaryOp, size: u8, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary {
            op,
            size,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
            flags: FlagSet::empty(),
        }
    }

    /// `lhs + rhs`.
    pub fn add(size: u8, lhs: Expr, rhs: Expr) -> Self {
        Self::binary(BinaryOp::Add, size, lhs, rhs)
    }

    /// `lhs - rhs`.
    pub fn sub(size: u8, lhs: Expr, rhs: Expr) -> Self {
        Self::binary(BinaryOp::Sub, size, lhs, rhs)
    }

    /// Unary operation writing no flags.
    pub fn unary(op: UnaryOp, size: u8, value: Expr) -> Self {
        Expr::Unary {
            op,
            size,
            value: Box::new(value),
            flags: FlagSet::empty(),
        }
    }

    /// Rotate right through carry.
    pub fn rotate_right_carry(size: u8, value: Expr, count: Expr, carry: Expr) -> Self {
        Expr::RotateRightCarry {
            size,
            value: Box::new(value),
            count: Box::new(count),
            carry: Box::new(carry),
            flags: FlagSet::empty(),
        }
    }

    /// Flag-condition predicate.
    pub fn flag_condition(cond: FlagCondition) -> Self {
        Expr::FlagCondition { cond }
    }

    /// Equality predicate.
    pub fn compare_equal(size: u8, lhs: Expr, rhs: Expr) -> Self {
        Expr::CompareEqual {
            size,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    /// Mark the flags this operation writes. No effect on leaves.
    #[must_use]
    pub fn with_flags(mut self, written: FlagSet) -> Self {
        match &mut self {
            Expr::Binary { flags, .. }
            | Expr::Unary { flags, .. }
            | Expr::RotateRightCarry { flags, .. } => *flags = written,
            _ => {}
        }
        self
    }

    /// Constant value of a `Const`/`ConstPtr` leaf.
    pub fn constant_value(&self) -> Option<i64> {
        match self {
            Expr::Const { value, .. } => Some(*value),
            Expr::ConstPtr { value, .. } => Some(i64::from(*value)),
            _ => None,
        }
    }
}

fn size_suffix(size: u8) -> &'static str {
    match size {
        1 => ".b",
        2 => ".w",
        _ => "",
    }
}

fn write_flags(f: &mut fmt::Formatter<'_>, flags: FlagSet) -> fmt::Result {
    if flags.is_empty() {
        Ok(())
    } else {
        write!(f, " {{{}}}", flags)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Const { value, .. } => write!(f, "{}", value),
            Expr::ConstPtr { value, .. } => write!(f, "{:#x}", value),
            Expr::Reg { reg, .. } => write!(f, "{}", reg),
            Expr::Flag { flag } => write!(f, "flag:{}", flag),
            Expr::Load { size, addr } => write!(f, "[{}]{}", addr, size_suffix(*size)),
            Expr::Pop { .. } => write!(f, "pop"),
            Expr::Binary {
                op,
                lhs,
                rhs,
                flags,
                ..
            } => {
                write!(f, "({} {} {})", lhs, op.symbol(), rhs)?;
                write_flags(f, *flags)
            }
            Expr::RotateRightCarry {
                value,
                count,
                carry,
                flags,
                ..
            } => {
                write!(f, "rrc({}, {}, {})", value, count, carry)?;
                write_flags(f, *flags)
            }
            Expr::Unary {
                op,
                size,
                value,
                flags,
            } => {
                match op {
                    UnaryOp::Not => write!(f, "~{}", value)?,
                    UnaryOp::SignExtend => write!(f, "sx{}({})", size_suffix(*size), value)?,
                    UnaryOp::ZeroExtend => write!(f, "zx{}({})", size_suffix(*size), value)?,
                }
                write_flags(f, *flags)
            }
            Expr::FlagCondition { cond } => write!(f, "cond:{}", cond.name()),
            Expr::CompareEqual { lhs, rhs, .. } => write!(f, "({} == {})", lhs, rhs),
        }
    }
}

/// IL statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum IlOp {
    /// Register or temp write.
    SetReg {
        /// Size in bytes.
        size: u8,
        /// Destination.
        reg: IlReg,
        /// Value written.
        value: Expr,
    },
    /// Memory write.
    Store {
        /// Size in bytes.
        size: u8,
        /// Address expression.
        addr: Expr,
        /// Value written.
        value: Expr,
    },
    /// Flag write.
    SetFlag {
        /// Destination flag.
        flag: Flag,
        /// Value written.
        value: Expr,
    },
    /// Stack push.
    Push {
        /// Size in bytes.
        size: u8,
        /// Value pushed.
        value: Expr,
    },
    /// Expression evaluated for its flag effects only.
    Eval {
        /// The expression.
        expr: Expr,
    },
    /// Transfer to a computed or out-of-function target.
    Jump {
        /// Target address expression.
        target: Expr,
    },
    /// Transfer to a label in the current function.
    Goto {
        /// Destination label.
        label: Label,
    },
    /// Two-way branch.
    If {
        /// Predicate.
        cond: Expr,
        /// Label taken when the predicate holds.
        on_true: Label,
        /// Label taken otherwise.
        on_false: Label,
    },
    /// Subroutine call.
    Call {
        /// Target address expression.
        target: Expr,
    },
    /// Return.
    Ret {
        /// Return address expression.
        target: Expr,
    },
    /// Control never continues.
    NoRet,
    /// No effect.
    Nop,
    /// Opaque barrier: no semantics are known for this instruction.
    Unimplemented {
        /// Mnemonic that has no lifting rule.
        mnemonic: Mnemonic,
    },
}

impl fmt::Display for IlOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IlOp::SetReg { reg, value, .. } => write!(f, "{} = {}", reg, value),
            IlOp::Store { size, addr, value } => {
                write!(f, "[{}]{} = {}", addr, size_suffix(*size), value)
            }
            IlOp::SetFlag { flag, value } => write!(f, "flag:{} = {}", flag, value),
            IlOp::Push { value, .. } => write!(f, "push({})", value),
            IlOp::Eval { expr } => write!(f, "{}", expr),
            IlOp::Jump { target } => write!(f, "jump({})", target),
            IlOp::Goto { label } => write!(f, "goto {}", label),
            IlOp::If {
                cond,
                on_true,
                on_false,
            } => write!(f, "if ({}) then {} else {}", cond, on_true, on_false),
            IlOp::Call { target } => write!(f, "call({})", target),
            IlOp::Ret { target } => write!(f, "<return> jump({})", target),
            IlOp::NoRet => write!(f, "noreturn"),
            IlOp::Nop => write!(f, "nop"),
            IlOp::Unimplemented { mnemonic } => write!(f, "unimplemented({})", mnemonic),
        }
    }
}

/// Caller-owned emission context the lifter writes into.
pub trait IlEmitter {
    /// Start lifting the instruction at `address`. Temps from the previous
    /// instruction are released.
    fn begin_instruction(&mut self, address: u16);

    /// Address of the instruction being lifted.
    fn current_address(&self) -> u16;

    /// Append an operation in emission order.
    fn append(&mut self, op: IlOp);

    /// Fresh transient register, valid until the next `begin_instruction`.
    fn new_temp(&mut self) -> IlReg;

    /// Existing label for an address inside the current function.
    fn label_for_address(&self, address: u16) -> Option<Label>;

    /// Create a label whose position is fixed later by [`IlEmitter::mark_label`].
    fn new_label(&mut self) -> Label;

    /// Fix a label at the next operation to be appended.
    fn mark_label(&mut self, label: Label);
}

/// One emitted operation tagged with the instruction address it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IlInstruction {
    /// Address of the lifted instruction.
    pub address: u16,
    /// The operation.
    pub op: IlOp,
}

/// In-memory emission context for one function.
#[derive(Debug, Clone, Default)]
pub struct IlFunction {
    ops: Vec<IlInstruction>,
    label_positions: Vec<Option<usize>>,
    address_labels: BTreeMap<u16, Label>,
    current_address: u16,
    next_temp: u32,
}

impl IlFunction {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `address` as a location inside the function being lifted.
    ///
    /// The returned label stays pending until an instruction at that
    /// address is begun.
    pub fn add_label_for_address(&mut self, address: u16) -> Label {
        if let Some(label) = self.address_labels.get(&address) {
            return *label;
        }
        let label = self.new_label();
        self.address_labels.insert(address, label);
        label
    }

    /// Emitted operations in order.
    pub fn ops(&self) -> &[IlInstruction] {
        &self.ops
    }

    /// Operations emitted for one instruction address.
    pub fn ops_at(&self, address: u16) -> impl Iterator<Item = &IlOp> + '_ {
        self.ops
            .iter()
            .filter(move |i| i.address == address)
            .map(|i| &i.op)
    }

    /// Index of the operation a label points at, once marked.
    pub fn label_position(&self, label: Label) -> Option<usize> {
        self.label_positions
            .get(label.0 as usize)
            .copied()
            .flatten()
    }

    /// Fail if any instruction was lifted as an opaque barrier.
    pub fn check_implemented(&self) -> Result<()> {
        for inst in &self.ops {
            if let IlOp::Unimplemented { mnemonic } = inst.op {
                return Err(Msp430Error::UnimplementedSemantics {
                    mnemonic,
                    address: inst.address,
                });
            }
        }
        Ok(())
    }
}

impl IlEmitter for IlFunction {
    fn begin_instruction(&mut self, address: u16) {
        self.current_address = address;
        self.next_temp = 0;
        if let Some(label) = self.address_labels.get(&address).copied() {
            if self.label_position(label).is_none() {
                self.mark_label(label);
            }
        }
    }

    fn current_address(&self) -> u16 {
        self.current_address
    }

    fn append(&mut self, op: IlOp) {
        self.ops.push(IlInstruction {
            address: self.current_address,
            op,
        });
    }

    fn new_temp(&mut self) -> IlReg {
        let temp = IlReg::Temp(self.next_temp);
        self.next_temp += 1;
        temp
    }

    fn label_for_address(&self, address: u16) -> Option<Label> {
        self.address_labels.get(&address).copied()
    }

    fn new_label(&mut self) -> Label {
        let label = Label(self.label_positions.len() as u32);
        self.label_positions.push(None);
        label
    }

    fn mark_label(&mut self, label: Label) {
        if let Some(slot) = self.label_positions.get_mut(label.0 as usize) {
            *slot = Some(self.ops.len());
        }
    }
}

impl fmt::Display for IlFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, inst) in self.ops.iter().enumerate() {
            for (label, _) in self
                .label_positions
                .iter()
                .enumerate()
                .filter(|(_, pos)| **pos == Some(index))
            {
                writeln!(f, "{}:", Label(label as u32))?;
            }
            writeln!(f, "  {:04x}  {}", inst.address, inst.op)?;
        }
        Ok(())
    }
}
