//! Control-flow classification of decoded instructions.

use crate::types::{AddressingMode, Instruction, Mnemonic};
use serde::{Deserialize, Serialize};

/// How an instruction transfers control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ControlFlow {
    /// Falls through to the next instruction.
    None,
    /// Always branches; target unknown when computed at run time.
    Unconditional {
        /// Branch target.
        target: Option<u16>,
    },
    /// Two-way branch.
    Conditional {
        /// Target when the condition holds.
        taken: u16,
        /// Next sequential instruction.
        fallthrough: u16,
    },
    /// Subroutine call.
    Call {
        /// Callee address when it is an immediate.
        target: Option<u16>,
    },
    /// Return from subroutine or interrupt.
    Return,
    /// Never continues (`hlt`).
    Halt,
}

/// Length and control flow of one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstructionInfo {
    /// Encoded length in bytes.
    pub length: u16,
    /// Control-flow classification.
    pub flow: ControlFlow,
}

/// Classify an instruction decoded at `address`.
pub fn instruction_info(instruction: &Instruction, address: u16) -> InstructionInfo {
    let flow = match instruction.mnemonic {
        Mnemonic::Ret | Mnemonic::Reti => ControlFlow::Return,
        Mnemonic::Hlt => ControlFlow::Halt,
        Mnemonic::Jmp => ControlFlow::Unconditional {
            target: instruction.branch_target(),
        },
        Mnemonic::Br => ControlFlow::Unconditional {
            target: immediate_target(instruction),
        },
        Mnemonic::Call => ControlFlow::Call {
            target: immediate_target(instruction),
        },
        m if m.is_conditional_jump() => match instruction.branch_target() {
            Some(taken) => ControlFlow::Conditional {
                taken,
                fallthrough: address.wrapping_add(instruction.encoded_length),
            },
            None => ControlFlow::None,
        },
        _ => ControlFlow::None,
    };

    InstructionInfo {
        length: instruction.encoded_length,
        flow,
    }
}

fn immediate_target(instruction: &Instruction) -> Option<u16> {
    instruction
        .source
        .filter(|src| src.mode == AddressingMode::Immediate)
        .and_then(|src| src.value)
}
