//! AVR target definitions and machine-level stages.
//!
//! This module contains everything that knows the target is an ATmega-class
//! AVR: register conventions, instruction-word encoders, the emitter, the
//! relocation fixup pass and the disassembler.
//!
//! Register conventions used by the emitter:
//! - r16..r23: allocatable pool (reachable by `ldi` and the immediate ALU forms)
//! - r24/r25: scratch for materializing immediates; r24 carries return values
//! - r28:r29 (Y): frame pointer, captured from SPL/SPH in the prologue
//! - r30:r31 (Z): pointer pair for dereference loads

use std::fmt;

pub mod disasm;
pub mod emit;
pub mod encode;
pub mod fixup;

pub use disasm::{disassemble, AvrInstr};
pub use emit::{emit, CodeImage, Reloc};
pub use fixup::apply_relocs;

/// A physical AVR general-purpose register, r0..r31.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Reg(pub u8);

impl Reg {
    pub fn index(self) -> u8 {
        self.0
    }

    /// Whether the immediate forms (`ldi`, `subi`, `andi`, `ori`, `cpi`)
    /// can address this register.
    pub fn immediate_capable(self) -> bool {
        self.0 >= 16
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// Registers handed out by the allocator, in canonical scan order.
pub const ALLOC_POOL: [Reg; 8] = [
    Reg(16),
    Reg(17),
    Reg(18),
    Reg(19),
    Reg(20),
    Reg(21),
    Reg(22),
    Reg(23),
];

/// Scratch register for immediate materialization; also the return-value
/// register of the calling convention.
pub const SCRATCH0: Reg = Reg(24);
/// Second scratch, used when the first may alias a live operand.
pub const SCRATCH1: Reg = Reg(25);
/// Return-value register.
pub const RET_REG: Reg = Reg(24);
/// Frame pointer low/high halves (the Y pair).
pub const FRAME_LO: Reg = Reg(28);
pub const FRAME_HI: Reg = Reg(29);
/// Pointer pair for dereference loads (the Z pair).
pub const ZPTR_LO: Reg = Reg(30);
pub const ZPTR_HI: Reg = Reg(31);

/// Stack pointer I/O addresses.
pub const IO_SPL: u8 = 0x3d;
pub const IO_SPH: u8 = 0x3e;

/// Top of SRAM, loaded into the stack pointer by the bootstrap sequence.
pub const RAMEND: u16 = 0x08ff;

/// First byte address handed to named variables in SRAM.
pub const DATA_BASE: u16 = 0x0100;

/// Frame-pointer displacement of argument 0.
///
/// Two pushed callee-saved bytes plus the two-byte return address, plus one
/// because the hardware stack pointer post-decrements (Y points at the next
/// free byte, not the last pushed one).
pub const ARG_BASE: u8 = 5;
