//! Error types for the MSP430 core.
//!
//! Every failure here is an ordinary, expected outcome: the caller branches
//! on it and moves on. Nothing in the decoder, renderer or lifter leaves
//! partial state behind when one of these is returned.

use crate::types::Mnemonic;
use thiserror::Error;

/// Primary error type for decoding and lifting.
#[derive(Debug, Error)]
pub enum Msp430Error {
    /// IO error while reading an image from disk.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Fewer bytes were supplied than the instruction needs.
    #[error("Insufficient bytes: instruction needs {expected} bytes, got {actual}")]
    InsufficientBytes {
        /// Encoded length the instruction requires.
        expected: usize,
        /// Bytes actually available.
        actual: usize,
    },

    /// The opcode word does not map to any mnemonic.
    #[error("Invalid opcode word 0x{word:04X}")]
    InvalidOpcode {
        /// The first little-endian word of the instruction.
        word: u16,
    },

    /// Decoding succeeded but no lifting rule exists for the mnemonic.
    #[error("No IL semantics for `{mnemonic}` at 0x{address:04X}")]
    UnimplementedSemantics {
        /// The mnemonic that was lifted as an opaque marker.
        mnemonic: Mnemonic,
        /// Address of the offending instruction.
        address: u16,
    },
}

/// Result type alias for MSP430 operations.
pub type Result<T> = std::result::Result<T, Msp430Error>;
