//! Second-pass address resolution.
//!
//! Emission leaves every jump/call address word zeroed and records a
//! [`Reloc`](super::Reloc) pointing at it. Once the label table holds real
//! word offsets, this pass patches each recorded word in place. A label that
//! never received an address means the front end branched to something that
//! was never defined.

use crate::avr::Reloc;
use crate::core::{BackendError, BackendResult, CompilationSession};
use crate::ir::LabelTable;

/// Patch every relocation in `words` with its label's absolute word address.
pub fn apply_relocs(
    words: &mut [u16],
    relocs: &[Reloc],
    labels: &LabelTable,
    session: &mut CompilationSession,
) -> BackendResult<()> {
    for reloc in relocs {
        let addr = labels
            .word_addr(&reloc.target)
            .ok_or_else(|| BackendError::UnresolvedSymbol {
                label: reloc.target.clone(),
            })?;
        log::trace!("fixup: word {:#06x} <- {} = {addr:#06x}", reloc.word_index, reloc.target);
        words[reloc.word_index] = addr;
    }
    session.stats_mut().relocs_applied = relocs.len();
    log::debug!("fixup: {} relocations applied", relocs.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::LabelRef;

    #[test]
    fn patches_recorded_word() {
        let mut session = CompilationSession::new();
        let mut labels = LabelTable::new();
        labels.define(LabelRef::Id(0), 0);
        labels.set_word_addr(&LabelRef::Id(0), 0x0042);

        let mut words = vec![0x940c, 0x0000, 0x9508];
        let relocs = vec![Reloc {
            word_index: 1,
            target: LabelRef::Id(0),
        }];
        apply_relocs(&mut words, &relocs, &labels, &mut session).unwrap();
        assert_eq!(words, vec![0x940c, 0x0042, 0x9508]);
    }

    #[test]
    fn unplaced_label_is_fatal() {
        let mut session = CompilationSession::new();
        let labels = LabelTable::new();
        let mut words = vec![0x940c, 0x0000];
        let relocs = vec![Reloc {
            word_index: 1,
            target: LabelRef::Named("nowhere".into()),
        }];
        let result = apply_relocs(&mut words, &relocs, &labels, &mut session);
        assert!(matches!(result, Err(BackendError::UnresolvedSymbol { .. })));
    }
}
