// This module partitions the linear IR of a translation unit into basic blocks and
// links them into the control-flow graph. Blocks live in one flat vector owned by Cfg
// and reference each other exclusively through BlockId indices (successors and
// predecessor lists alike), so the cyclic graph needs no pointer juggling. The builder
// scans the IR linearly; any instruction not yet claimed by a block starts one, and a
// block extends until an unconditional jump, a conditional jump, a label encountered
// mid-scan, or a return. Branch targets are materialized on demand by recursing into
// block creation for the target index; the instruction's block back-reference doubles
// as the memo that stops repeated work and unbounded recursion. A branch operand whose
// label the table does not know is a fatal unresolved-symbol error.

//! Control-flow graph construction.

use std::fmt;
use std::fmt::Write as _;

use crate::core::{BackendError, BackendResult, CompilationSession};
use crate::ir::{IrInst, IrUnit, LabelTable, Opcode, Operand};

/// Index of a basic block inside its [`Cfg`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(pub u32);

impl BlockId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}", self.0)
    }
}

/// A maximal straight-line run of instructions.
#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub id: BlockId,
    /// First instruction index, inclusive.
    pub begin: usize,
    /// Last instruction index, inclusive.
    pub end: usize,
    /// Fall-through successor.
    pub next: Option<BlockId>,
    /// Taken-branch successor.
    pub jump: Option<BlockId>,
    pub preds: Vec<BlockId>,
}

impl BasicBlock {
    /// Both successors, fall-through first.
    pub fn succs(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.next.into_iter().chain(self.jump)
    }
}

/// The control-flow graph of one translation unit.
///
/// All blocks live here; everything else refers to them by [`BlockId`].
#[derive(Debug, Default)]
pub struct Cfg {
    blocks: Vec<BasicBlock>,
}

impl Cfg {
    /// Partition `unit` into basic blocks and link the graph.
    ///
    /// Assigns every instruction's `block` back-reference in place.
    pub fn build(unit: &mut IrUnit, session: &mut CompilationSession) -> BackendResult<Cfg> {
        let IrUnit { insts, labels } = unit;
        let mut builder = Builder {
            insts,
            labels,
            blocks: Vec::new(),
        };

        // Linear scan: the first unclaimed instruction starts a block.
        // Recursion from branch targets may claim instructions ahead of us.
        let mut idx = 0;
        while idx < builder.insts.len() {
            if builder.insts[idx].block.is_none() {
                builder.block_at(idx)?;
            }
            idx += 1;
        }

        session.stats_mut().blocks_built = builder.blocks.len();
        log::debug!("cfg: {} blocks over {} instructions", builder.blocks.len(), builder.insts.len());
        Ok(Cfg {
            blocks: builder.blocks,
        })
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.index()]
    }

    pub fn blocks(&self) -> &[BasicBlock] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Render the graph as a Graphviz digraph for the `_CFG.dot` artifact.
    pub fn to_dot(&self, name: &str) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "digraph \"{name}\" {{");
        let _ = writeln!(out, "    node [shape=box fontname=\"monospace\"];");
        for block in &self.blocks {
            let _ = writeln!(
                out,
                "    {} [label=\"{}\\n[{}..{}]\"];",
                block.id, block.id, block.begin, block.end
            );
        }
        for block in &self.blocks {
            if let Some(next) = block.next {
                let _ = writeln!(out, "    {} -> {};", block.id, next);
            }
            if let Some(jump) = block.jump {
                let _ = writeln!(out, "    {} -> {} [style=dashed];", block.id, jump);
            }
        }
        out.push_str("}\n");
        out
    }
}

struct Builder<'a> {
    insts: &'a mut Vec<IrInst>,
    labels: &'a LabelTable,
    blocks: Vec<BasicBlock>,
}

impl Builder<'_> {
    /// Materialize (or fetch) the block starting at `start`.
    ///
    /// The block reference stored in the first instruction is the memo: a
    /// target that was already visited returns immediately, which also
    /// bounds the recursion on forward-label chains.
    fn block_at(&mut self, start: usize) -> BackendResult<BlockId> {
        if let Some(id) = self.insts[start].block {
            return Ok(id);
        }

        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(BasicBlock {
            id,
            begin: start,
            end: start,
            next: None,
            jump: None,
            preds: Vec::new(),
        });
        self.insts[start].block = Some(id);

        let mut i = start;
        loop {
            self.insts[i].block = Some(id);
            self.blocks[id.index()].end = i;

            match self.insts[i].op {
                Opcode::Jmp => {
                    let target = self.target_index(&self.insts[i].src1.clone())?;
                    let jump = self.block_at(target)?;
                    self.blocks[id.index()].jump = Some(jump);
                    self.blocks[jump.index()].preds.push(id);
                    break;
                }
                Opcode::Jz => {
                    let target = self.target_index(&self.insts[i].src2.clone())?;
                    let next = if i + 1 < self.insts.len() {
                        Some(self.block_at(i + 1)?)
                    } else {
                        None
                    };
                    let jump = self.block_at(target)?;
                    // Both edges to the same block collapse into one.
                    let next = if next == Some(jump) { None } else { next };
                    self.blocks[id.index()].next = next;
                    self.blocks[id.index()].jump = Some(jump);
                    if let Some(next) = next {
                        self.blocks[next.index()].preds.push(id);
                    }
                    self.blocks[jump.index()].preds.push(id);
                    break;
                }
                Opcode::Ret => break,
                _ => {}
            }

            if i + 1 >= self.insts.len() {
                break;
            }
            if self.insts[i + 1].op == Opcode::Label {
                // A label ends the current block; the labelled instruction
                // starts the fall-through successor.
                let next = self.block_at(i + 1)?;
                self.blocks[id.index()].next = Some(next);
                self.blocks[next.index()].preds.push(id);
                break;
            }
            i += 1;
        }

        Ok(id)
    }

    fn target_index(&self, operand: &Operand) -> BackendResult<usize> {
        let label = operand.as_label().ok_or_else(|| BackendError::NoEmissionRule {
            op: Opcode::Jmp,
            detail: format!("branch operand {operand} is not a label"),
        })?;
        self.labels
            .ir_index(label)
            .ok_or_else(|| BackendError::UnresolvedSymbol {
                label: label.clone(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::parse_unit;

    fn build(text: &str) -> (IrUnit, Cfg) {
        let mut session = CompilationSession::new();
        let mut unit = parse_unit(text, &mut session).expect("parse failed");
        let cfg = Cfg::build(&mut unit, &mut session).expect("cfg failed");
        (unit, cfg)
    }

    #[test]
    fn straight_line_ir_is_one_block() {
        let (unit, cfg) = build("main:\n    enter\n    t0 = 5\n    t1 = 10\n    t2 = t0 + t1\n    ret t2\n");
        assert_eq!(cfg.len(), 1);
        let block = &cfg.blocks()[0];
        assert_eq!((block.begin, block.end), (0, unit.insts.len() - 1));
        assert!(block.next.is_none() && block.jump.is_none());
        assert!(unit.insts.iter().all(|inst| inst.block == Some(block.id)));
    }

    #[test]
    fn conditional_splits_into_diamond() {
        // if (t0) { t1 = 1 } else { t1 = 2 }
        let (_, cfg) = build(
            "main:\n    t0 = arg 0\n    jz t0, L0\n    t1 = 1\n    jmp L1\nL0:\n    t1 = 2\nL1:\n    ret t1\n",
        );
        assert_eq!(cfg.len(), 4);
        let cond = &cfg.blocks()[0];
        let (next, jump) = (cond.next.unwrap(), cond.jump.unwrap());
        assert_ne!(next, jump);
        // Both arms flow into the merge block, which records both predecessors.
        let merge_preds: Vec<_> = cfg
            .blocks()
            .iter()
            .filter(|b| b.preds.len() == 2)
            .collect();
        assert_eq!(merge_preds.len(), 1);
        assert!(cfg.block(next).preds.contains(&cond.id));
        assert!(cfg.block(jump).preds.contains(&cond.id));
    }

    #[test]
    fn duplicate_edge_is_suppressed() {
        let (_, cfg) = build("main:\n    t0 = 1\n    jz t0, L0\nL0:\n    ret\n");
        let cond = &cfg.blocks()[0];
        assert!(cond.next.is_none());
        assert!(cond.jump.is_some());
        assert_eq!(cfg.block(cond.jump.unwrap()).preds.len(), 1);
    }

    #[test]
    fn backward_branch_forms_loop_edge() {
        let (_, cfg) = build("main:\n    t0 = 10\nL0:\n    t0 = t0 - 1\n    jz t0, L1\n    jmp L0\nL1:\n    ret\n");
        let body = cfg
            .blocks()
            .iter()
            .find(|b| b.jump.is_some() && b.jump.unwrap().index() != b.id.index() && cfg.block(b.jump.unwrap()).begin < b.begin)
            .expect("no back edge found");
        let header = cfg.block(body.jump.unwrap());
        assert!(header.preds.contains(&body.id));
        assert!(header.preds.len() >= 2);
    }

    #[test]
    fn unknown_label_is_fatal() {
        let mut session = CompilationSession::new();
        let mut unit = parse_unit("main:\n    jmp L9\n", &mut session).unwrap();
        let result = Cfg::build(&mut unit, &mut session);
        assert!(matches!(result, Err(BackendError::UnresolvedSymbol { .. })));
    }

    #[test]
    fn dot_output_names_every_block() {
        let (_, cfg) = build("main:\n    t0 = 1\n    jz t0, L0\n    ret\nL0:\n    ret\n");
        let dot = cfg.to_dot("demo");
        for block in cfg.blocks() {
            assert!(dot.contains(&format!("{}", block.id)));
        }
        assert!(dot.contains("style=dashed"));
    }
}
