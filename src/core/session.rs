// This module provides compilation session management for the acbe back end.
// CompilationSession is the single state hub threaded by reference through every
// pipeline stage: it owns the monotonic id counters for temporaries and labels
// (replacing what would otherwise be process-wide globals, so repeated compilations
// in one process stay deterministic and independent) and accumulates SessionStats,
// a small set of run metrics (blocks built, liveness passes, colored temporaries,
// emitted words, applied relocations) that the driver logs at debug level.

//! Compilation session management.
//!
//! A session owns the id counters shared by the front end and the back end
//! and collects per-run statistics. Every stage takes the session by
//! reference; nothing in the pipeline touches global state.

/// Statistics collected across one compilation run.
#[derive(Debug, Default, Clone)]
pub struct SessionStats {
    /// Basic blocks materialized by the CFG builder.
    pub blocks_built: usize,
    /// Block visits performed by the liveness worklist until fixpoint.
    pub liveness_passes: usize,
    /// Temporaries that received a physical register.
    pub temps_colored: usize,
    /// 16-bit words appended by the emitter.
    pub words_emitted: usize,
    /// Relocation records patched by the fixup pass.
    pub relocs_applied: usize,
}

impl SessionStats {
    /// Log a one-line summary of the run at debug level.
    pub fn log_summary(&self) {
        log::debug!(
            "session: {} blocks, {} liveness passes, {} temps colored, {} words, {} relocs",
            self.blocks_built,
            self.liveness_passes,
            self.temps_colored,
            self.words_emitted,
            self.relocs_applied
        );
    }
}

/// Per-compilation state threaded through every stage.
///
/// The temp and label counters are monotonic; `observe_*` keeps them above
/// ids minted by an external front end so that later `fresh_*` calls never
/// collide with existing ids.
#[derive(Debug, Default)]
pub struct CompilationSession {
    next_temp: u32,
    next_label: u32,
    stats: SessionStats,
}

impl CompilationSession {
    /// Create a fresh session with zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a new temporary id.
    pub fn fresh_temp(&mut self) -> u32 {
        let id = self.next_temp;
        self.next_temp += 1;
        id
    }

    /// Mint a new numeric label id.
    pub fn fresh_label(&mut self) -> u32 {
        let id = self.next_label;
        self.next_label += 1;
        id
    }

    /// Record a temporary id minted elsewhere.
    pub fn observe_temp(&mut self, id: u32) {
        self.next_temp = self.next_temp.max(id + 1);
    }

    /// Record a numeric label id minted elsewhere.
    pub fn observe_label(&mut self, id: u32) {
        self.next_label = self.next_label.max(id + 1);
    }

    /// Read-only view of the run statistics.
    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Mutable access for the pipeline stages.
    pub fn stats_mut(&mut self) -> &mut SessionStats {
        &mut self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_monotonic() {
        let mut session = CompilationSession::new();
        assert_eq!(session.fresh_temp(), 0);
        assert_eq!(session.fresh_temp(), 1);
        assert_eq!(session.fresh_label(), 0);
    }

    #[test]
    fn observe_advances_past_foreign_ids() {
        let mut session = CompilationSession::new();
        session.observe_temp(7);
        assert_eq!(session.fresh_temp(), 8);
        session.observe_temp(3); // stale observation must not move the counter back
        assert_eq!(session.fresh_temp(), 9);
    }
}
