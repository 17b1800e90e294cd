// This module computes per-instruction liveness for a translation unit: for every
// instruction, the set of temporaries whose value may still be read after it. It is
// the classic backward dataflow problem over the CFG. Each block visit walks the
// block's instructions last to first, seeding from the union of the successors'
// entry sets, storing the live-after set on each instruction in place and applying
// the use/def transfer to carry the set across the instruction. The fixpoint runs
// as an iterative worklist: whenever a block's entry set grows, its predecessors
// are re-queued; the sets grow monotonically and are bounded by the temporary
// count, so the loop terminates.

//! Backward live-variable analysis.

use hashbrown::HashSet;

use crate::cfg::Cfg;
use crate::core::CompilationSession;
use crate::ir::{IrInst, IrUnit, LiveSet, Opcode, Operand, TempId};

/// Temporaries an instruction reads.
fn uses(inst: &IrInst) -> impl Iterator<Item = TempId> + '_ {
    let from = |op: &Operand| op.as_temp();
    [&inst.src1, &inst.src2].into_iter().filter_map(from)
}

/// The temporary an instruction overwrites, if any.
fn def(inst: &IrInst) -> Option<TempId> {
    match inst.op {
        // Control transfers, labels and markers define nothing; a push only
        // propagates a use.
        Opcode::Nop
        | Opcode::Label
        | Opcode::Enter
        | Opcode::Jmp
        | Opcode::Jz
        | Opcode::Push
        | Opcode::Ret => None,
        _ => inst.dest.as_temp(),
    }
}

/// Apply the backward transfer of one instruction to `live`.
///
/// The destination is killed unless it also appears as a source (a compound
/// assignment keeps its temporary live going backward through the
/// instruction); every source is a use.
fn transfer(inst: &IrInst, live: &mut LiveSet) {
    if let Some(d) = def(inst) {
        if !uses(inst).any(|u| u == d) {
            live.remove(&d);
        }
    }
    for u in uses(inst) {
        live.insert(u);
    }
}

/// Compute `live_after` for every instruction in `unit`, in place.
pub fn analyze(unit: &mut IrUnit, cfg: &Cfg, session: &mut CompilationSession) {
    let n = cfg.len();
    let mut block_in: Vec<LiveSet> = vec![LiveSet::new(); n];

    // Seed in reverse program order so the first sweep already sees most
    // successors; the stack pops from the back, so sort ascending by
    // position. Order only affects how fast the fixpoint settles.
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_unstable_by_key(|&b| cfg.blocks()[b].begin);

    let mut worklist: Vec<usize> = order;
    let mut queued: Vec<bool> = vec![true; n];
    let mut passes = 0usize;

    while let Some(b) = worklist.pop() {
        queued[b] = false;
        passes += 1;

        let block = &cfg.blocks()[b];
        let mut live: LiveSet = HashSet::new();
        for succ in block.succs() {
            live.extend(block_in[succ.index()].iter().copied());
        }

        for i in (block.begin..=block.end).rev() {
            unit.insts[i].live_after = live.clone();
            transfer(&unit.insts[i], &mut live);
        }

        if live != block_in[b] {
            block_in[b] = live;
            for pred in &block.preds {
                if !queued[pred.index()] {
                    queued[pred.index()] = true;
                    worklist.push(pred.index());
                }
            }
        }
    }

    session.stats_mut().liveness_passes = passes;
    log::debug!("liveness: fixpoint after {passes} block passes");
}
