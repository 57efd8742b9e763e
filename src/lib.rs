//! MSP430 Lift - Instruction Decoding, Rendering and IL Lifting
//!
//! This library implements the architecture core for the 16-bit TI MSP430:
//! a decoder from raw little-endian bytes to a structured instruction, a
//! renderer producing typed display tokens, and a lifter translating each
//! instruction into a register-transfer intermediate language.
//!
//! # Features
//!
//! - **Decoding**: All 27 hardware mnemonics plus the `br`, `ret` and `hlt` aliases
//! - **Addressing Modes**: Constant-generator, symbolic, absolute and immediate
//!   reinterpretations resolved at decode time
//! - **Rendering**: Token streams with register, integer and address kinds
//! - **Lifting**: Flag-accurate IL emitted into a caller-owned context
//! - **Linear Sweep**: Listing helpers over flat images
//!
//! # Quick Start
//!
//! ```rust
//! use msp430_lift::{decode, lift_at, render, IlFunction};
//!
//! // add r5, r6
//! let instr = decode(&[0x06, 0x55], 0x4400)?;
//! assert_eq!(render(&instr).to_string(), "add     r5, r6");
//!
//! let mut il = IlFunction::new();
//! lift_at(&[0x06, 0x55], 0x4400, &mut il)?;
//! assert_eq!(il.ops().len(), 1);
//! # Ok::<(), msp430_lift::Msp430Error>(())
//! ```
//!
//! # Scope
//!
//! The crate stops at the single-instruction boundary. Function discovery,
//! calling conventions and binary-format loading belong to the host.

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::similar_names)]
#![allow(clippy::too_many_lines)]

pub mod decoder;
pub mod encoding;
pub mod error;
pub mod formatter;
pub mod il;
pub mod info;
pub mod lifter;
pub mod types;

pub use decoder::decode;
pub use error::{Msp430Error, Result};
pub use formatter::{render, DisplayToken, RenderedInstruction, TokenKind};
pub use il::{Expr, FlagCondition, FlagSet, IlEmitter, IlFunction, IlOp, IlReg, Label};
pub use info::{instruction_info, ControlFlow, InstructionInfo};
pub use lifter::{lift, lift_at, lift_at_with};
pub use types::{
    AddressingMode, DisassemblyOptions, Format, Instruction, Mnemonic, Operand, Register, Width,
};

use serde::Serialize;
use std::path::Path;
use tracing::warn;

/// One line of a linear-sweep listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ListingEntry {
    /// A decoded instruction.
    Instruction {
        /// Address of the first byte.
        address: u16,
        /// Encoded bytes.
        bytes: Vec<u8>,
        /// Decoded instruction.
        instruction: Instruction,
        /// Rendered tokens.
        rendered: RenderedInstruction,
        /// Control-flow classification.
        info: InstructionInfo,
    },
    /// A word that does not decode.
    Invalid {
        /// Address of the first byte.
        address: u16,
        /// The skipped bytes (one or two).
        bytes: Vec<u8>,
        /// Decoder error message.
        reason: String,
    },
}

impl ListingEntry {
    /// Address of the entry.
    pub fn address(&self) -> u16 {
        match self {
            ListingEntry::Instruction { address, .. } | ListingEntry::Invalid { address, .. } => {
                *address
            }
        }
    }

    /// Bytes covered by the entry.
    pub fn bytes(&self) -> &[u8] {
        match self {
            ListingEntry::Instruction { bytes, .. } | ListingEntry::Invalid { bytes, .. } => bytes,
        }
    }

    /// Rendered text, or `.word`/`.byte` data for invalid entries.
    pub fn text(&self) -> String {
        match self {
            ListingEntry::Instruction { rendered, .. } => rendered.to_string(),
            ListingEntry::Invalid { bytes, .. } => match bytes.as_slice() {
                [lo, hi] => format!(".word   {:#06x}", u16::from_le_bytes([*lo, *hi])),
                other => {
                    let hex: Vec<_> = other.iter().map(|b| format!("{:#04x}", b)).collect();
                    format!(".byte   {}", hex.join(", "))
                }
            },
        }
    }

    /// Whether the entry decoded.
    pub fn is_valid(&self) -> bool {
        matches!(self, ListingEntry::Instruction { .. })
    }
}

/// Decode and render the instruction at the start of `data`.
///
/// # Example
///
/// ```rust
/// use msp430_lift::disassemble;
///
/// let (instr, tokens) = disassemble(&[0x30, 0x41], 0x4400)?;
/// assert_eq!(instr.encoded_length, 2);
/// assert_eq!(tokens[0].text, "ret");
/// # Ok::<(), msp430_lift::Msp430Error>(())
/// ```
pub fn disassemble(data: &[u8], address: u16) -> Result<(Instruction, Vec<DisplayToken>)> {
    let instruction = decode(data, address)?;
    let rendered = render(&instruction);
    Ok((instruction, rendered.tokens))
}

/// Bytes of `data` that fit between `base` and the top of the 64 KiB space.
fn addressable(data: &[u8], base: u16) -> &[u8] {
    let room = 0x1_0000 - usize::from(base);
    &data[..data.len().min(room)]
}

/// Linear sweep over a flat image.
///
/// Undecodable words become [`ListingEntry::Invalid`] and the sweep moves on
/// by two bytes, unless `stop_on_invalid` is set. Bytes that would land past
/// address `0xffff` are not swept.
pub fn disassemble_with_options(data: &[u8], options: &DisassemblyOptions) -> Vec<ListingEntry> {
    let image = data;
    let data = addressable(image, options.base_address);
    if data.len() < image.len() {
        warn!(
            base = options.base_address,
            size = image.len(),
            kept = data.len(),
            "image runs past 0xffff, ignoring the excess"
        );
    }
    let mut entries = Vec::new();
    let mut offset = 0usize;

    while offset < data.len() {
        if options
            .max_instructions
            .is_some_and(|max| entries.len() >= max)
        {
            break;
        }

        let address = options.base_address.wrapping_add(offset as u16);
        match decode(&data[offset..], address) {
            Ok(instruction) => {
                let length = usize::from(instruction.encoded_length);
                entries.push(ListingEntry::Instruction {
                    address,
                    bytes: data[offset..offset + length].to_vec(),
                    instruction,
                    rendered: render(&instruction),
                    info: instruction_info(&instruction, address),
                });
                offset += length;
            }
            Err(e) => {
                if options.stop_on_invalid {
                    break;
                }
                let end = (offset + 2).min(data.len());
                entries.push(ListingEntry::Invalid {
                    address,
                    bytes: data[offset..end].to_vec(),
                    reason: e.to_string(),
                });
                offset += 2;
            }
        }
    }

    entries
}

/// Read a file and sweep it.
///
/// # Example
///
/// ```rust,no_run
/// use msp430_lift::{disassemble_file, DisassemblyOptions};
///
/// let options = DisassemblyOptions::new().with_base_address(0x4400);
/// for entry in disassemble_file("firmware.bin", &options)? {
///     println!("{:04x}: {}", entry.address(), entry.text());
/// }
/// # Ok::<(), msp430_lift::Msp430Error>(())
/// ```
pub fn disassemble_file<P: AsRef<Path>>(
    path: P,
    options: &DisassemblyOptions,
) -> Result<Vec<ListingEntry>> {
    let data = std::fs::read(path)?;
    Ok(disassemble_with_options(&data, options))
}

/// Lift every decoded entry of a listing into one [`IlFunction`].
///
/// Each instruction address is registered as a label first, so branches
/// that stay inside the image lift as `goto`. `entries` must come from a
/// sweep of the same `data` with the same base address.
pub fn lift_listing(
    data: &[u8],
    entries: &[ListingEntry],
    options: &DisassemblyOptions,
) -> Result<IlFunction> {
    let data = addressable(data, options.base_address);
    let mut il = IlFunction::new();
    for entry in entries.iter().filter(|e| e.is_valid()) {
        il.add_label_for_address(entry.address());
    }

    for entry in entries.iter().filter(|e| e.is_valid()) {
        let offset = usize::from(entry.address().wrapping_sub(options.base_address));
        let bytes = data.get(offset..).unwrap_or_default();
        lift_at_with(bytes, entry.address(), &mut il, options.fuse_halt_idiom)?;
    }

    Ok(il)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    // Small routine at 0x4400:
    //   mov  #0x0280, sp
    //   call #0x4410
    //   dint
    //   jmp  $
    const IMAGE: [u8; 12] = [
        0x31, 0x40, 0x80, 0x02, 0xB0, 0x12, 0x10, 0x44, 0x32, 0xC2, 0xFF, 0x3F,
    ];

    #[test]
    fn test_disassemble() {
        let (instr, tokens) = disassemble(&[0x06, 0x45], 0).unwrap();
        assert_eq!(instr.mnemonic, Mnemonic::Mov);
        let text: String = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(text, "mov     r5, r6");
    }

    #[test]
    fn test_linear_sweep() {
        let options = DisassemblyOptions::new().with_base_address(0x4400);
        let entries = disassemble_with_options(&IMAGE, &options);
        let lines: Vec<_> = entries
            .iter()
            .map(|e| format!("{:04x} {}", e.address(), e.text()))
            .collect();
        assert_eq!(
            lines,
            vec![
                "4400 mov     0x280, sp",
                "4404 call    0x4410",
                "4408 bic     8, sr",
                "440a jmp     0x440a",
            ]
        );
    }

    #[test]
    fn test_sweep_skips_invalid_words() {
        let data = [0x00, 0x00, 0x30, 0x41, 0x55];
        let entries = disassemble_with_options(&data, &DisassemblyOptions::new());
        assert_eq!(entries.len(), 3);
        assert!(!entries[0].is_valid());
        assert_eq!(entries[0].text(), ".word   0x0000");
        assert_eq!(entries[1].text(), "ret");
        assert_eq!(entries[2].bytes(), &[0x55]);
        assert_eq!(entries[2].text(), ".byte   0x55");
    }

    #[test]
    fn test_sweep_stops_on_invalid() {
        let options = DisassemblyOptions {
            stop_on_invalid: true,
            ..DisassemblyOptions::default()
        };
        let entries = disassemble_with_options(&[0x30, 0x41, 0x00, 0x00, 0x30, 0x41], &options);
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_sweep_max_instructions() {
        let options = DisassemblyOptions::new().with_max_instructions(2);
        assert_eq!(disassemble_with_options(&IMAGE, &options).len(), 2);
    }

    #[test]
    fn test_lift_listing() {
        let options = DisassemblyOptions::new().with_base_address(0x4400);
        let entries = disassemble_with_options(&IMAGE, &options);
        let il = lift_listing(&IMAGE, &entries, &options).unwrap();

        let ops: Vec<_> = il.ops().iter().map(|i| i.op.clone()).collect();
        assert_eq!(
            ops,
            vec![
                IlOp::Nop,
                IlOp::Call {
                    target: Expr::const_ptr(0x4410)
                },
                IlOp::NoRet,
                IlOp::Goto {
                    label: il.label_for_address(0x440a).unwrap()
                },
            ]
        );
        assert!(il.check_implemented().is_ok());
    }

    #[test]
    fn test_sweep_stops_at_top_of_address_space() {
        // 0x8000 x `mov r5, r6` fill 0x0000..=0xffff; the trailing `dadd`
        // has no address and must not wrap around to 0x0000.
        let mut image = [0x06, 0x45].repeat(0x8000);
        image.extend_from_slice(&[0x06, 0xA5]);
        let options = DisassemblyOptions::new();
        let entries = disassemble_with_options(&image, &options);

        assert_eq!(entries.len(), 0x8000);
        assert!(entries.iter().all(ListingEntry::is_valid));
        assert!(entries
            .iter()
            .enumerate()
            .all(|(i, e)| usize::from(e.address()) == i * 2));
        assert_eq!(entries.last().map(ListingEntry::address), Some(0xFFFE));

        let il = lift_listing(&image, &entries, &options).unwrap();
        assert_eq!(il.ops().len(), 0x8000);
        assert!(il
            .ops()
            .iter()
            .all(|i| matches!(i.op, IlOp::SetReg { reg: IlReg::Arch(Register::R6), .. })));
        assert!(il.check_implemented().is_ok());
    }

    #[test]
    fn test_sweep_near_top_of_address_space() {
        // mov r5, r6; ret; dadd r5, r6 loaded at 0xfffc
        let image = [0x06, 0x45, 0x30, 0x41, 0x06, 0xA5];
        let options = DisassemblyOptions::new().with_base_address(0xFFFC);
        let entries = disassemble_with_options(&image, &options);
        let lines: Vec<_> = entries
            .iter()
            .map(|e| format!("{:04x} {}", e.address(), e.text()))
            .collect();
        assert_eq!(lines, vec!["fffc mov     r5, r6", "fffe ret"]);

        let il = lift_listing(&image, &entries, &options).unwrap();
        assert_eq!(il.ops_at(0xFFFC).count(), 1);
        assert!(matches!(il.ops_at(0xFFFE).next(), Some(IlOp::Ret { .. })));
        assert!(il.check_implemented().is_ok());
    }

    #[test]
    fn test_disassemble_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&IMAGE).unwrap();

        let options = DisassemblyOptions::new().with_base_address(0x4400);
        let entries = disassemble_file(file.path(), &options).unwrap();
        assert_eq!(entries.len(), 4);
        assert!(matches!(
            entries[3].clone(),
            ListingEntry::Instruction {
                info: InstructionInfo {
                    flow: ControlFlow::Unconditional { target: Some(0x440a) },
                    ..
                },
                ..
            }
        ));
    }

    #[test]
    fn test_disassemble_missing_file() {
        let err = disassemble_file("/nonexistent/firmware.bin", &DisassemblyOptions::new());
        assert!(matches!(err, Err(Msp430Error::Io(_))));
    }
}
