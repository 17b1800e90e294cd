//! ACBE - AVR back end for a small C compiler.
//!
//! The crate takes a finished three-address IR (plus its label table) from a
//! front end and carries it to a flashable object image: control-flow graph
//! construction, backward liveness analysis, interference-graph register
//! allocation, AVR word emission with a second relocation pass for branch
//! and call targets, disassembly for diagnostics, and Intel-HEX
//! serialization.
//!
//! # Primary Usage
//!
//! ```no_run
//! use acbe::core::CompilationSession;
//! use acbe::ir::parse_unit;
//!
//! let mut session = CompilationSession::new();
//! let mut unit = parse_unit("main:\n    t0 = 5\n    ret t0\n", &mut session)?;
//! let compiled = acbe::compile(&mut unit, &mut session)?;
//! let hex_text = acbe::hex::encode(&compiled.words);
//! # Ok::<(), acbe::core::BackendError>(())
//! ```
//!
//! # Architecture
//!
//! - [`ir`] - IR model, label table and the textual listing parser
//! - [`cfg`] - basic-block partitioning and the block graph
//! - [`liveness`] - backward live-variable dataflow
//! - [`regalloc`] - interference graph and greedy coloring
//! - [`avr`] - target encodings, emitter, fixup and disassembler
//! - [`hex`] - Intel-HEX object serialization
//! - [`core`] - session and error infrastructure shared by every stage

pub mod artifacts;
pub mod avr;
pub mod cfg;
pub mod core;
pub mod hex;
pub mod ir;
pub mod liveness;
pub mod regalloc;

// Re-export the types most callers touch.
pub use crate::core::{BackendError, BackendResult, CompilationSession, SessionStats};
pub use cfg::{BasicBlock, BlockId, Cfg};
pub use ir::{IrInst, IrUnit, LabelRef, Opcode, Operand};
pub use regalloc::{InterferenceGraph, RegisterAssignment};

/// Everything the pipeline produces for one unit.
#[derive(Debug)]
pub struct CompiledUnit {
    pub cfg: Cfg,
    pub regs: RegisterAssignment,
    /// The final word stream, relocations already applied.
    pub words: Vec<u16>,
}

/// Run the whole back end over `unit`.
///
/// Stages run strictly in dependency order; the first fatal condition
/// aborts the run and nothing downstream of it is produced.
pub fn compile(unit: &mut IrUnit, session: &mut CompilationSession) -> BackendResult<CompiledUnit> {
    let cfg = Cfg::build(unit, session)?;
    liveness::analyze(unit, &cfg, session);
    let graph = InterferenceGraph::build(unit);
    let regs = regalloc::color(&graph, session)?;
    let mut image = avr::emit(unit, &regs, session)?;
    avr::apply_relocs(&mut image.words, &image.relocs, &unit.labels, session)?;
    session.stats().log_summary();
    Ok(CompiledUnit {
        cfg,
        regs,
        words: image.words,
    })
}
