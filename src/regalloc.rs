// This module assigns every temporary a physical register such that no two
// simultaneously-live temporaries share one, or fails fatally when the pool runs out.
// The interference graph is implicit adjacency sets keyed by temp id: for every
// instruction, every pair of temporaries co-resident in its live-after set gets a
// symmetric edge. Coloring is greedy first-fit: scan the fixed pool in canonical
// order, take the first register no already-colored neighbor holds, then walk into
// the uncolored neighbors. The walk runs on an explicit work stack, so stack depth
// never tracks program size. There is no spill path: allocation across the whole
// translation unit is a hard resource limit of this design.

//! Interference-graph register allocation.

use hashbrown::{HashMap, HashSet};

use crate::avr::{Reg, ALLOC_POOL};
use crate::core::{BackendError, BackendResult, CompilationSession};
use crate::ir::{IrUnit, TempId};

/// Adjacency-set interference graph over temporaries.
#[derive(Debug, Default)]
pub struct InterferenceGraph {
    edges: HashMap<TempId, HashSet<TempId>>,
}

impl InterferenceGraph {
    /// Build the graph from the per-instruction live sets of `unit`.
    ///
    /// Every temporary mentioned anywhere becomes a node, even if it is
    /// never live (a dead definition still needs a destination register).
    pub fn build(unit: &IrUnit) -> Self {
        let mut graph = Self::default();
        for t in unit.temps() {
            graph.edges.entry(t).or_default();
        }
        for inst in &unit.insts {
            let live: Vec<TempId> = inst.live_after.iter().copied().collect();
            for (i, &a) in live.iter().enumerate() {
                for &b in &live[i + 1..] {
                    graph.add_edge(a, b);
                }
            }
        }
        graph
    }

    fn add_edge(&mut self, a: TempId, b: TempId) {
        if a == b {
            return;
        }
        self.edges.entry(a).or_default().insert(b);
        self.edges.entry(b).or_default().insert(a);
    }

    /// Temporaries interfering with `t`.
    pub fn neighbors(&self, t: TempId) -> impl Iterator<Item = TempId> + '_ {
        self.edges.get(&t).into_iter().flatten().copied()
    }

    pub fn interferes(&self, a: TempId, b: TempId) -> bool {
        self.edges.get(&a).is_some_and(|set| set.contains(&b))
    }

    /// All nodes, ascending.
    pub fn nodes(&self) -> Vec<TempId> {
        let mut ids: Vec<TempId> = self.edges.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

/// Mapping from temporary id to physical register.
#[derive(Debug, Default)]
pub struct RegisterAssignment {
    map: HashMap<TempId, Reg>,
}

impl RegisterAssignment {
    pub fn reg(&self, t: TempId) -> Option<Reg> {
        self.map.get(&t).copied()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TempId, Reg)> + '_ {
        self.map.iter().map(|(&t, &r)| (t, r))
    }
}

/// Color `graph` with the fixed register pool.
///
/// Nodes are taken in ascending temp id; each colored node pushes its
/// uncolored neighbors, so connected components are colored depth-first.
/// Exhausting the pool is fatal: the design has no spill-to-memory path.
pub fn color(graph: &InterferenceGraph, session: &mut CompilationSession) -> BackendResult<RegisterAssignment> {
    let mut assignment = RegisterAssignment::default();
    let mut stack: Vec<TempId> = Vec::new();

    for seed in graph.nodes() {
        if assignment.map.contains_key(&seed) {
            continue;
        }
        stack.push(seed);
        while let Some(t) = stack.pop() {
            if assignment.map.contains_key(&t) {
                continue;
            }
            let taken: HashSet<Reg> = graph
                .neighbors(t)
                .filter_map(|n| assignment.map.get(&n).copied())
                .collect();
            let reg = ALLOC_POOL
                .iter()
                .copied()
                .find(|r| !taken.contains(r))
                .ok_or(BackendError::RegisterPressure {
                    temp: t,
                    pool_size: ALLOC_POOL.len(),
                })?;
            assignment.map.insert(t, reg);
            log::trace!("regalloc: t{t} -> {reg}");

            // Descend into the uncolored part of the component; push in
            // descending id order so the smallest id is colored next.
            let mut pending: Vec<TempId> = graph
                .neighbors(t)
                .filter(|n| !assignment.map.contains_key(n))
                .collect();
            pending.sort_unstable_by(|a, b| b.cmp(a));
            stack.extend(pending);
        }
    }

    session.stats_mut().temps_colored = assignment.len();
    log::debug!("regalloc: {} temporaries colored", assignment.len());
    Ok(assignment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::Cfg;
    use crate::ir::parse_unit;
    use crate::liveness;

    fn allocate(text: &str) -> (IrUnit, InterferenceGraph, RegisterAssignment) {
        let mut session = CompilationSession::new();
        let mut unit = parse_unit(text, &mut session).expect("parse failed");
        let cfg = Cfg::build(&mut unit, &mut session).expect("cfg failed");
        liveness::analyze(&mut unit, &cfg, &mut session);
        let graph = InterferenceGraph::build(&unit);
        let assignment = color(&graph, &mut session).expect("coloring failed");
        (unit, graph, assignment)
    }

    #[test]
    fn overlapping_temps_get_distinct_registers() {
        let (_, graph, assignment) =
            allocate("main:\n    t0 = 5\n    t1 = 10\n    t2 = t0 + t1\n    ret t2\n");
        assert!(graph.interferes(0, 1));
        assert_ne!(assignment.reg(0), assignment.reg(1));
    }

    #[test]
    fn assignment_is_sound_for_every_edge() {
        let (unit, graph, assignment) = allocate(
            "main:\n    t0 = 1\n    t1 = 2\n    t2 = 3\n    t3 = t0 + t1\n    t4 = t3 + t2\n    ret t4\n",
        );
        for a in unit.temps() {
            for b in unit.temps() {
                if graph.interferes(a, b) {
                    assert_ne!(
                        assignment.reg(a),
                        assignment.reg(b),
                        "t{a} and t{b} interfere but share a register"
                    );
                }
            }
        }
    }

    #[test]
    fn disjoint_lifetimes_may_share() {
        let (_, _, assignment) = allocate("main:\n    t0 = 1\n    push t0\n    t1 = 2\n    ret t1\n");
        // Nothing forces distinct registers here; first-fit reuses the pool head.
        assert_eq!(assignment.reg(0), assignment.reg(1));
    }

    #[test]
    fn dead_temp_still_gets_a_register() {
        let (_, _, assignment) = allocate("main:\n    t0 = 1\n    t1 = 2\n    ret t1\n");
        assert!(assignment.reg(0).is_some());
    }

    #[test]
    fn pool_exhaustion_is_fatal() {
        // Nine mutually-live temporaries cannot fit an eight-register pool.
        let mut text = String::from("main:\n");
        for i in 0..9 {
            text.push_str(&format!("    t{i} = {i}\n"));
        }
        text.push_str("    t9 = t0 + t1\n    t9 = t9 + t2\n    t9 = t9 + t3\n    t9 = t9 + t4\n");
        text.push_str("    t9 = t9 + t5\n    t9 = t9 + t6\n    t9 = t9 + t7\n    t9 = t9 + t8\n");
        text.push_str("    ret t9\n");

        let mut session = CompilationSession::new();
        let mut unit = parse_unit(&text, &mut session).unwrap();
        let cfg = Cfg::build(&mut unit, &mut session).unwrap();
        liveness::analyze(&mut unit, &cfg, &mut session);
        let graph = InterferenceGraph::build(&unit);
        let result = color(&graph, &mut session);
        assert!(matches!(result, Err(BackendError::RegisterPressure { .. })));
    }
}
