// This module defines error types for the acbe back end using the thiserror crate for
// idiomatic Rust error handling. BackendError is the main error enum covering the fatal
// pipeline conditions: branch or call operands that reference labels the label table
// does not know, IR opcode/operand combinations with no emission rule, register
// allocation running out of the physical pool (there is no spill path), word patterns
// the disassembler cannot decode, malformed Intel-HEX records, and phi placeholders
// that survive to emission. Each variant carries the context needed to report the
// failure (label names, opcodes, word values, record line numbers). The module also
// provides BackendResult<T> as a convenience alias for Result<T, BackendError>.

//! Error types for the AVR back end.
//!
//! Using thiserror for more idiomatic error handling.

use thiserror::Error;

use crate::ir::{LabelRef, Opcode};

/// Main error type for back-end compilation.
#[derive(Error, Debug)]
pub enum BackendError {
    /// A branch or call names a label the label table never defined.
    #[error("unresolved symbol: {label}")]
    UnresolvedSymbol { label: LabelRef },

    /// An IR opcode/operand combination the emitter has no rule for.
    #[error("no emission rule for {op:?}: {detail}")]
    NoEmissionRule { op: Opcode, detail: String },

    /// The interference graph needs more colors than the pool has.
    /// There is no spill path; this is a hard resource limit.
    #[error("too many registers required: t{temp} has no free register in a pool of {pool_size}")]
    RegisterPressure { temp: u32, pool_size: usize },

    /// A temporary reached the emitter without a register assignment.
    #[error("t{temp} has no register assignment")]
    MissingAssignment { temp: u32 },

    /// The disassembler hit a bit pattern with no known encoding.
    #[error("invented instruction {word:#06x} at word {index:#06x}")]
    InventedInstruction { word: u16, index: usize },

    /// A phi placeholder survived to a stage that cannot interpret it.
    #[error("unresolved phi placeholder for t{temp}")]
    PhiUnresolved { temp: u32 },

    /// An Intel-HEX record failed to parse or checksum.
    #[error("malformed hex record on line {line}: {reason}")]
    MalformedRecord { line: usize, reason: String },

    /// Textual IR that does not parse.
    #[error("IR parse error on line {line}: {reason}")]
    IrParse { line: usize, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type alias for back-end operations.
pub type BackendResult<T> = Result<T, BackendError>;
