//! Per-thread call graph accumulation
//!
//! Records arrive interleaved across threads; each thread owns a stack of
//! graphs whose last entry is the one still open. A closed graph is never
//! touched again until [`CallGraphBuilder::finish`] validates the lot.

use log::{debug, warn};
use std::collections::BTreeMap;

use super::graph::{AddOutcome, CallGraph, GraphLimits, GraphLine};
use crate::domain::Tid;

#[derive(Debug, Default)]
pub struct CallGraphBuilder {
    limits: GraphLimits,
    graphs: BTreeMap<Tid, Vec<CallGraph>>,
    /// Call-graph records consumed
    pub records: u64,
}

impl CallGraphBuilder {
    #[must_use]
    pub fn new(limits: GraphLimits) -> Self {
        Self {
            limits,
            graphs: BTreeMap::new(),
            records: 0,
        }
    }

    #[must_use]
    pub fn limits(&self) -> &GraphLimits {
        &self.limits
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.graphs.is_empty()
    }

    /// Feed one call/return/leaf record of `tid`
    pub fn push(&mut self, tid: Tid, line: GraphLine) {
        self.records += 1;
        let list = self.graphs.entry(tid).or_default();
        if list.is_empty() {
            list.push(CallGraph::new(tid));
        }
        let Some(open) = list.last_mut() else {
            return;
        };

        let replay = line.clone();
        match open.add_line(line, &self.limits) {
            AddOutcome::Open => {}
            AddOutcome::Closed => list.push(CallGraph::new(tid)),
            AddOutcome::ClosedReplay => {
                let mut next = CallGraph::new(tid);
                next.add_line(replay, &self.limits);
                list.push(next);
            }
        }
    }

    /// Validate every graph and return the survivors ordered by
    /// `(start, end, tid)`. Open graphs are repaired by
    /// [`CallGraph::post_process`].
    #[must_use]
    pub fn finish(self) -> Vec<CallGraph> {
        let limits = self.limits;
        let mut out = Vec::new();
        for (tid, graphs) in self.graphs {
            for mut graph in graphs {
                if graph.lines.is_empty() || graph.invalid {
                    continue;
                }
                if graph.span().is_some_and(|(s, e)| e <= s) {
                    debug!("skipping zero-length graph for {tid}");
                    continue;
                }
                if !graph.post_process(&limits) {
                    warn!("Sanity check failed for {tid}, ignoring this callback");
                    continue;
                }
                if graph.invalid {
                    debug!("discarding {tid} graph rooted at a repaired call");
                    continue;
                }
                out.push(graph);
            }
        }
        out.sort_by(|a, b| {
            let (sa, ea) = a.span().unwrap_or_default();
            let (sb, eb) = b.span().unwrap_or_default();
            sa.total_cmp(&sb)
                .then(ea.total_cmp(&eb))
                .then(a.tid.cmp(&b.tid))
        });
        out
    }
}
