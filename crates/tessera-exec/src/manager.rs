//! Dependency analysis and lowering of expressions
//!
//! Node-level edges are inferred from object usage in submission order: a
//! node depends on the last earlier writer of every object it touches, and a
//! writer also depends on every reader since that last write. Explicit
//! dependencies are added on top. The resulting graph must be acyclic; its
//! deterministic topological order (smallest ready index first) is the order
//! nodes are lowered in.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;

use tessera_core::{ObjectId, TesseraError, TesseraResult};

use crate::library::Library;
use crate::node::{ExpressionNode, NodeState};
use crate::task::TaskGraph;

/// Node-level schedule of an expression
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyPlan {
    /// Lowering order
    pub order: Vec<usize>,
    /// Sorted predecessors of every node
    pub preds: Vec<Vec<usize>>,
    /// Explicit edges not implied by object usage; lowered as full barriers
    pub barriers: Vec<(usize, usize)>,
}

/// Turns expression nodes into a linked task graph
pub struct ExpressionManager<'l> {
    library: &'l Library,
}

impl<'l> ExpressionManager<'l> {
    pub fn new(library: &'l Library) -> Self {
        Self { library }
    }

    /// Infer node dependencies and order
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an explicit edge naming an unknown node or a
    /// self edge, and for a dependency cycle.
    pub fn analyze(nodes: &[Arc<ExpressionNode>], explicit: &[(usize, usize)]) -> TesseraResult<DependencyPlan> {
        let n = nodes.len();
        let mut edges: HashSet<(usize, usize)> = HashSet::new();
        let mut last_writer: HashMap<ObjectId, usize> = HashMap::new();
        let mut readers: HashMap<ObjectId, Vec<usize>> = HashMap::new();

        for (i, node) in nodes.iter().enumerate() {
            let reads = node.reads();
            let writes = node.writes();
            for id in reads.iter().chain(&writes) {
                if let Some(&w) = last_writer.get(id) {
                    if w != i {
                        edges.insert((w, i));
                    }
                }
            }
            for id in &writes {
                if let Some(rs) = readers.remove(id) {
                    edges.extend(rs.into_iter().filter(|&r| r != i).map(|r| (r, i)));
                }
            }
            for id in reads {
                readers.entry(id).or_default().push(i);
            }
            for id in writes {
                last_writer.insert(id, i);
            }
        }

        let mut barriers = Vec::new();
        for &(pred, succ) in explicit {
            if pred >= n || succ >= n {
                return Err(TesseraError::invalid_argument(format!(
                    "dependency {pred} -> {succ} names a node outside 0..{n}"
                )));
            }
            if pred == succ {
                return Err(TesseraError::invalid_argument(format!("node {pred} cannot depend on itself")));
            }
            if edges.insert((pred, succ)) {
                barriers.push((pred, succ));
            }
        }

        let mut preds = vec![Vec::new(); n];
        let mut succs = vec![Vec::new(); n];
        for &(p, s) in &edges {
            preds[s].push(p);
            succs[p].push(s);
        }
        for list in &mut preds {
            list.sort_unstable();
        }

        let order = topological_order(&preds, &succs).ok_or_else(|| {
            TesseraError::invalid_argument("expression dependencies contain a cycle")
        })?;
        barriers.sort_unstable();
        Ok(DependencyPlan { order, preds, barriers })
    }

    /// Select an algorithm for every node and emit its tasks
    ///
    /// On failure returns the index of the offending node with the error.
    pub(crate) fn lower(
        &self,
        nodes: &[Arc<ExpressionNode>],
        plan: &DependencyPlan,
    ) -> Result<TaskGraph, (usize, TesseraError)> {
        let registry = self.library.registry().read();
        let accelerated = self.library.has_accelerator();
        let mut graph = TaskGraph::new(nodes.len());

        for &index in &plan.order {
            let node = &nodes[index];
            let selection = registry.select(node, accelerated).map_err(|e| (index, e))?;
            let mut builder = graph.builder(
                index,
                node.to_string(),
                selection.backend,
                node.descriptor(),
                self.library.devices(),
            );
            selection
                .processor
                .process(node, &mut builder)
                .map_err(|e| (index, e))?;
            tracing::debug!(
                node = %node,
                processor = selection.processor.name(),
                backend = %selection.backend,
                tasks = builder.tasks().len(),
                "node lowered"
            );
            node.set_state(NodeState::Dispatched);
        }

        graph.link(&plan.order, &plan.barriers);
        Ok(graph)
    }
}

/// Kahn's algorithm, smallest ready node first; `None` on a cycle
fn topological_order(preds: &[Vec<usize>], succs: &[Vec<usize>]) -> Option<Vec<usize>> {
    let mut in_degree: Vec<usize> = preds.iter().map(Vec::len).collect();
    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|&(_, &d)| d == 0)
        .map(|(i, _)| Reverse(i))
        .collect();

    let mut order = Vec::with_capacity(preds.len());
    while let Some(Reverse(i)) = ready.pop() {
        order.push(i);
        for &s in &succs[i] {
            in_degree[s] -= 1;
            if in_degree[s] == 0 {
                ready.push(Reverse(s));
            }
        }
    }
    (order.len() == preds.len()).then_some(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topological_order_prefers_small_indices() {
        // 2 -> 0, 1 independent
        let preds = vec![vec![2], vec![], vec![]];
        let succs = vec![vec![], vec![], vec![0]];
        assert_eq!(topological_order(&preds, &succs), Some(vec![1, 2, 0]));
    }

    #[test]
    fn test_topological_order_detects_cycle() {
        let preds = vec![vec![1], vec![0]];
        let succs = vec![vec![1], vec![0]];
        assert_eq!(topological_order(&preds, &succs), None);
    }
}
