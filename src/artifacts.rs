//! Output artifact writing.
//!
//! Given a caller-supplied base name, writes the four artifacts of a
//! compiled unit: the IR listing, the Graphviz CFG, the disassembly and the
//! Intel-HEX object file. Any fatal error upstream means files written here
//! must not be trusted; the driver deletes nothing and simply reports.

use std::fs;
use std::path::PathBuf;

use crate::avr;
use crate::cfg::Cfg;
use crate::core::BackendResult;
use crate::hex;
use crate::ir::IrUnit;

/// Write `<base>.ir`, `<base>_CFG.dot`, `<base>.asm` and `<base>.hex`.
pub fn write_all(base: &str, unit: &IrUnit, cfg: &Cfg, words: &[u16]) -> BackendResult<()> {
    let path = |suffix: &str| PathBuf::from(format!("{base}{suffix}"));

    fs::write(path(".ir"), unit.to_string())?;
    log::info!("wrote {base}.ir");

    fs::write(path("_CFG.dot"), cfg.to_dot(base))?;
    log::info!("wrote {base}_CFG.dot");

    fs::write(path(".asm"), avr::disassemble(words)?)?;
    log::info!("wrote {base}.asm");

    fs::write(path(".hex"), hex::encode(words))?;
    log::info!("wrote {base}.hex");

    Ok(())
}
