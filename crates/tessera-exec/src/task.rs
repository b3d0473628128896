//! Tile-level task graph
//!
//! Processors lower each expression node into tasks through a
//! [`TaskBuilder`]. Every task declares the tiles it reads and writes as a
//! [`TaskAccess`]; after all nodes are lowered, [`TaskGraph::link`] walks the
//! tasks in node topological order and wires an edge for every
//! read-after-write, write-after-write and write-after-read conflict on the
//! same tile. Node-level dependencies are thereby refined to tile
//! granularity: a consumer tile only waits for the producer tiles it touches.
//!
//! Ordering between tasks of the same node is the processor's business and
//! is expressed with [`TaskBuilder::emplace_after`] /
//! [`TaskBuilder::emplace_after_all`]. Explicit node dependencies that share
//! no object become full barriers.

use std::collections::HashMap;
use std::fmt;
use std::ops::Range;
use std::time::Instant;

use smallvec::SmallVec;
use tessera_core::{BlockIndex, Descriptor, ObjectId, TesseraError, TesseraResult};

use crate::accelerator::DeviceManager;
use crate::dispatch::Backend;
use crate::tracing_support::record_task_time;

/// Index of a task inside its graph
pub type TaskId = usize;

/// Body of a task
pub type TaskFn = Box<dyn FnOnce() -> TesseraResult<()> + Send>;

/// Region of an object a task touches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    /// A single tile
    Tile(ObjectId, BlockIndex),
    /// The whole object (scalars, host buffers, cross-tile bands)
    Whole(ObjectId),
}

impl Access {
    pub fn object(&self) -> ObjectId {
        match *self {
            Access::Tile(id, _) | Access::Whole(id) => id,
        }
    }
}

/// Declared reads and writes of a task
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskAccess {
    pub reads: SmallVec<[Access; 4]>,
    pub writes: SmallVec<[Access; 2]>,
}

impl TaskAccess {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read_tile(mut self, id: ObjectId, idx: BlockIndex) -> Self {
        self.reads.push(Access::Tile(id, idx));
        self
    }

    /// Read a tile of an optional operand such as a mask
    pub fn read_tile_opt(self, id: Option<ObjectId>, idx: BlockIndex) -> Self {
        match id {
            Some(id) => self.read_tile(id, idx),
            None => self,
        }
    }

    pub fn read_whole(mut self, id: ObjectId) -> Self {
        self.reads.push(Access::Whole(id));
        self
    }

    pub fn write_tile(mut self, id: ObjectId, idx: BlockIndex) -> Self {
        self.writes.push(Access::Tile(id, idx));
        self
    }

    pub fn write_whole(mut self, id: ObjectId) -> Self {
        self.writes.push(Access::Whole(id));
        self
    }

    /// Read the result tile too when the node accumulates into it
    pub fn accumulating(self, accumulate: bool, id: ObjectId, idx: BlockIndex) -> Self {
        if accumulate {
            self.read_tile(id, idx)
        } else {
            self
        }
    }
}

/// Where a task runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TaskKind {
    /// Worker thread of the host executor
    Host,
    /// Queue of the given accelerator device
    Device(usize),
}

pub(crate) struct Task {
    pub(crate) name: String,
    pub(crate) node: usize,
    pub(crate) kind: TaskKind,
    pub(crate) access: TaskAccess,
    pub(crate) preds: Vec<TaskId>,
    pub(crate) work: Option<TaskFn>,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("node", &self.node)
            .field("kind", &self.kind)
            .field("preds", &self.preds)
            .finish()
    }
}

/// Arena of tasks for one expression submission
#[derive(Debug, Default)]
pub struct TaskGraph {
    pub(crate) tasks: Vec<Task>,
    node_ranges: Vec<Range<TaskId>>,
}

impl TaskGraph {
    pub fn new(node_count: usize) -> Self {
        Self {
            tasks: Vec::new(),
            node_ranges: vec![0..0; node_count],
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Tasks emitted for `node`
    pub fn node_tasks(&self, node: usize) -> Range<TaskId> {
        self.node_ranges.get(node).cloned().unwrap_or(0..0)
    }

    /// Builder emitting the tasks of `node`
    ///
    /// Nodes must be lowered one at a time in topological order.
    pub fn builder<'g>(
        &'g mut self,
        node: usize,
        label: String,
        backend: Backend,
        descriptor: &'g Descriptor,
        devices: &'g DeviceManager,
    ) -> TaskBuilder<'g> {
        let first = self.tasks.len();
        if let Some(range) = self.node_ranges.get_mut(node) {
            *range = first..first;
        }
        TaskBuilder {
            graph: self,
            node,
            label,
            backend,
            descriptor,
            devices,
            first,
        }
    }

    /// Wire inter-node edges
    ///
    /// `order` is the node order tasks were emitted in and `barriers` the
    /// explicit node dependencies that share no object.
    pub(crate) fn link(&mut self, order: &[usize], barriers: &[(usize, usize)]) {
        let mut hazards: HashMap<ObjectId, Hazards> = HashMap::new();
        for t in 0..self.tasks.len() {
            let mut deps = Vec::new();
            let access = self.tasks[t].access.clone();
            for read in &access.reads {
                let h = hazards.entry(read.object()).or_default();
                match *read {
                    Access::Tile(_, idx) => h.read_tile(idx, t, &mut deps),
                    Access::Whole(_) => h.read_whole(t, &mut deps),
                }
            }
            for write in &access.writes {
                let h = hazards.entry(write.object()).or_default();
                match *write {
                    Access::Tile(_, idx) => h.write_tile(idx, t, &mut deps),
                    Access::Whole(_) => h.write_whole(t, &mut deps),
                }
            }
            let node = self.tasks[t].node;
            deps.retain(|&d| self.tasks[d].node != node);
            self.tasks[t].preds.extend(deps);
        }

        if !barriers.is_empty() {
            self.link_barriers(order, barriers);
        }

        for task in &mut self.tasks {
            task.preds.sort_unstable();
            task.preds.dedup();
        }
    }

    fn link_barriers(&mut self, order: &[usize], barriers: &[(usize, usize)]) {
        // a node without tasks forwards the sinks of its own barrier predecessors
        let mut effective_sinks: Vec<Vec<TaskId>> = vec![Vec::new(); self.node_ranges.len()];
        for &node in order {
            let range = self.node_tasks(node);
            let incoming: Vec<TaskId> = barriers
                .iter()
                .filter(|&&(_, succ)| succ == node)
                .flat_map(|&(pred, _)| effective_sinks[pred].iter().copied())
                .collect();

            if range.is_empty() {
                effective_sinks[node] = incoming;
                continue;
            }
            for t in self.sources(range.clone()) {
                self.tasks[t].preds.extend(incoming.iter().copied());
            }
            effective_sinks[node] = self.sinks(range);
        }
    }

    /// Tasks of `range` without predecessors inside the range
    fn sources(&self, range: Range<TaskId>) -> Vec<TaskId> {
        range
            .clone()
            .filter(|&t| !self.tasks[t].preds.iter().any(|p| range.contains(p)))
            .collect()
    }

    /// Tasks of `range` no other task of the range depends on
    fn sinks(&self, range: Range<TaskId>) -> Vec<TaskId> {
        let mut has_succ = vec![false; range.len()];
        for t in range.clone() {
            for &p in &self.tasks[t].preds {
                if range.contains(&p) {
                    has_succ[p - range.start] = true;
                }
            }
        }
        let start = range.start;
        range.filter(|&t| !has_succ[t - start]).collect()
    }

    /// Serialisable summary of the graph
    pub fn describe(&self) -> TaskGraphDescription {
        TaskGraphDescription {
            tasks: self
                .tasks
                .iter()
                .enumerate()
                .map(|(id, t)| TaskDescription {
                    id,
                    name: t.name.clone(),
                    node: t.node,
                    kind: t.kind,
                    preds: t.preds.clone(),
                })
                .collect(),
        }
    }
}

/// Per-object conflict tracking used while linking
#[derive(Debug, Default)]
struct Hazards {
    whole_write: Option<TaskId>,
    tile_writes: HashMap<BlockIndex, TaskId>,
    whole_reads: Vec<TaskId>,
    tile_reads: HashMap<BlockIndex, Vec<TaskId>>,
}

impl Hazards {
    fn last_writer(&self, idx: BlockIndex) -> Option<TaskId> {
        self.tile_writes.get(&idx).copied().or(self.whole_write)
    }

    fn read_tile(&mut self, idx: BlockIndex, t: TaskId, deps: &mut Vec<TaskId>) {
        deps.extend(self.last_writer(idx));
        self.tile_reads.entry(idx).or_default().push(t);
    }

    fn read_whole(&mut self, t: TaskId, deps: &mut Vec<TaskId>) {
        deps.extend(self.whole_write);
        deps.extend(self.tile_writes.values().copied());
        self.whole_reads.push(t);
    }

    fn write_tile(&mut self, idx: BlockIndex, t: TaskId, deps: &mut Vec<TaskId>) {
        deps.extend(self.last_writer(idx));
        deps.extend(self.whole_reads.iter().copied());
        if let Some(readers) = self.tile_reads.remove(&idx) {
            deps.extend(readers);
        }
        self.tile_writes.insert(idx, t);
    }

    fn write_whole(&mut self, t: TaskId, deps: &mut Vec<TaskId>) {
        deps.extend(self.whole_write);
        deps.extend(self.tile_writes.drain().map(|(_, w)| w));
        deps.append(&mut self.whole_reads);
        deps.extend(self.tile_reads.drain().flat_map(|(_, r)| r));
        self.whole_write = Some(t);
    }
}

/// Emits the tasks of one node
///
/// Tasks run on the host unless the node was dispatched to the accelerator
/// backend, in which case each task is pinned to a device handed out by the
/// [`DeviceManager`].
pub struct TaskBuilder<'g> {
    graph: &'g mut TaskGraph,
    node: usize,
    label: String,
    backend: Backend,
    descriptor: &'g Descriptor,
    devices: &'g DeviceManager,
    first: TaskId,
}

impl<'g> TaskBuilder<'g> {
    pub fn node(&self) -> usize {
        self.node
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn descriptor(&self) -> &Descriptor {
        self.descriptor
    }

    /// Tasks emitted so far for this node
    pub fn tasks(&self) -> Range<TaskId> {
        self.first..self.graph.tasks.len()
    }

    /// Task with no intra-node predecessors
    pub fn emplace<F>(&mut self, name: impl Into<String>, access: TaskAccess, work: F) -> TaskId
    where
        F: FnOnce() -> TesseraResult<()> + Send + 'static,
    {
        self.push(name.into(), access, Vec::new(), Box::new(work))
    }

    /// Task ordered after `preds`, which must belong to this node
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if a predecessor was emitted by another node.
    pub fn emplace_after<F>(
        &mut self,
        name: impl Into<String>,
        preds: &[TaskId],
        access: TaskAccess,
        work: F,
    ) -> TesseraResult<TaskId>
    where
        F: FnOnce() -> TesseraResult<()> + Send + 'static,
    {
        let own = self.tasks();
        if let Some(p) = preds.iter().find(|p| !own.contains(p)) {
            return Err(TesseraError::invalid_argument(format!(
                "task {p} does not belong to node {}",
                self.label
            )));
        }
        Ok(self.push(name.into(), access, preds.to_vec(), Box::new(work)))
    }

    /// Task ordered after every task this node emitted so far
    pub fn emplace_after_all<F>(&mut self, name: impl Into<String>, access: TaskAccess, work: F) -> TaskId
    where
        F: FnOnce() -> TesseraResult<()> + Send + 'static,
    {
        let preds = self.tasks().collect();
        self.push(name.into(), access, preds, Box::new(work))
    }

    fn push(&mut self, name: String, access: TaskAccess, preds: Vec<TaskId>, work: TaskFn) -> TaskId {
        let kind = match self.backend {
            Backend::Accelerator => self
                .devices
                .fetch_devices(1, self.descriptor)
                .first()
                .map_or(TaskKind::Host, |&d| TaskKind::Device(d)),
            Backend::Cpu => TaskKind::Host,
        };
        let name = format!("{}/{}", self.label, name);
        let work = if self.descriptor.profile_time {
            profiled(name.clone(), work)
        } else {
            work
        };

        let id = self.graph.tasks.len();
        self.graph.tasks.push(Task {
            name,
            node: self.node,
            kind,
            access,
            preds,
            work: Some(work),
        });
        if let Some(range) = self.graph.node_ranges.get_mut(self.node) {
            range.end = id + 1;
        }
        id
    }
}

fn profiled(name: String, work: TaskFn) -> TaskFn {
    Box::new(move || {
        let start = Instant::now();
        let result = work();
        record_task_time(&name, start.elapsed().as_micros() as u64, result.is_ok());
        result
    })
}

/// Summary of one task
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TaskDescription {
    pub id: TaskId,
    pub name: String,
    pub node: usize,
    pub kind: TaskKind,
    pub preds: Vec<TaskId>,
}

/// Summary of a linked task graph
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TaskGraphDescription {
    pub tasks: Vec<TaskDescription>,
}

impl TaskGraphDescription {
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Number of edges
    pub fn edge_count(&self) -> usize {
        self.tasks.iter().map(|t| t.preds.len()).sum()
    }

    pub fn tasks_of_node(&self, node: usize) -> impl Iterator<Item = &TaskDescription> + '_ {
        self.tasks.iter().filter(move |t| t.node == node)
    }

    pub fn find(&self, name: &str) -> Option<&TaskDescription> {
        self.tasks.iter().find(|t| t.name == name)
    }

    /// Whether `from` reaches `to` through predecessor edges
    pub fn depends_on(&self, to: TaskId, from: TaskId) -> bool {
        let mut stack = vec![to];
        let mut seen = vec![false; self.tasks.len()];
        while let Some(t) = stack.pop() {
            for &p in &self.tasks[t].preds {
                if p == from {
                    return true;
                }
                if !seen[p] {
                    seen[p] = true;
                    stack.push(p);
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: ObjectId = ObjectId(1);
    const B: ObjectId = ObjectId(2);
    const S: ObjectId = ObjectId(3);

    fn tile(r: u32, c: u32) -> BlockIndex {
        BlockIndex::new(r, c)
    }

    fn noop() -> TesseraResult<()> {
        Ok(())
    }

    fn build(nodes: &[Vec<TaskAccess>]) -> TaskGraph {
        let desc = Descriptor::default();
        let devices = DeviceManager::new(0);
        let mut graph = TaskGraph::new(nodes.len());
        for (n, accesses) in nodes.iter().enumerate() {
            let mut b = graph.builder(n, format!("n{n}"), Backend::Cpu, &desc, &devices);
            for (k, access) in accesses.iter().enumerate() {
                b.emplace(format!("t{k}"), access.clone(), noop);
            }
        }
        graph
    }

    #[test]
    fn test_tile_edges_follow_conflicts() {
        // node 0 writes A(0,0) and A(0,1); node 1 reads A(0,1) only
        let mut graph = build(&[
            vec![
                TaskAccess::new().write_tile(A, tile(0, 0)),
                TaskAccess::new().write_tile(A, tile(0, 1)),
            ],
            vec![TaskAccess::new().read_tile(A, tile(0, 1)).write_tile(B, tile(0, 1))],
        ]);
        graph.link(&[0, 1], &[]);
        let d = graph.describe();
        assert_eq!(d.tasks[2].preds, vec![1]);
        assert_eq!(d.edge_count(), 1);
    }

    #[test]
    fn test_write_after_read_and_whole_access() {
        let mut graph = build(&[
            vec![TaskAccess::new().read_tile(A, tile(0, 0)).write_whole(S)],
            vec![TaskAccess::new().write_tile(A, tile(0, 0))],
            vec![TaskAccess::new().read_whole(A).write_whole(B)],
        ]);
        graph.link(&[0, 1, 2], &[]);
        let d = graph.describe();
        assert_eq!(d.tasks[1].preds, vec![0]);
        assert_eq!(d.tasks[2].preds, vec![1]);
    }

    #[test]
    fn test_same_node_conflicts_are_not_linked() {
        let mut graph = build(&[vec![
            TaskAccess::new().write_tile(A, tile(0, 0)),
            TaskAccess::new().read_tile(A, tile(0, 0)),
        ]]);
        graph.link(&[0], &[]);
        assert_eq!(graph.describe().edge_count(), 0);
    }

    #[test]
    fn test_barrier_links_sinks_to_sources() {
        let desc = Descriptor::default();
        let devices = DeviceManager::new(0);
        let mut graph = TaskGraph::new(2);
        {
            let mut b = graph.builder(0, "n0".into(), Backend::Cpu, &desc, &devices);
            b.emplace("p0", TaskAccess::new().write_tile(A, tile(0, 0)), noop);
            b.emplace("p1", TaskAccess::new().write_tile(A, tile(1, 0)), noop);
            b.emplace_after_all("join", TaskAccess::new(), noop);
        }
        {
            let mut b = graph.builder(1, "n1".into(), Backend::Cpu, &desc, &devices);
            b.emplace("q", TaskAccess::new().write_tile(B, tile(0, 0)), noop);
        }
        graph.link(&[0, 1], &[(0, 1)]);
        let d = graph.describe();
        assert_eq!(d.find("n1/q").unwrap().preds, vec![2]);
        assert!(d.depends_on(3, 0));
    }

    #[test]
    fn test_emplace_after_rejects_foreign_task() {
        let desc = Descriptor::default();
        let devices = DeviceManager::new(0);
        let mut graph = TaskGraph::new(2);
        graph
            .builder(0, "n0".into(), Backend::Cpu, &desc, &devices)
            .emplace("a", TaskAccess::new(), noop);
        let mut b = graph.builder(1, "n1".into(), Backend::Cpu, &desc, &devices);
        assert!(b.emplace_after("b", &[0], TaskAccess::new(), noop).is_err());
    }

    #[test]
    fn test_accelerator_tasks_get_devices() {
        let desc = Descriptor::default();
        let devices = DeviceManager::new(2);
        let mut graph = TaskGraph::new(1);
        let mut b = graph.builder(0, "n0".into(), Backend::Accelerator, &desc, &devices);
        b.emplace("a", TaskAccess::new(), noop);
        b.emplace("b", TaskAccess::new(), noop);
        let d = graph.describe();
        assert_eq!(d.tasks[0].kind, TaskKind::Device(0));
        assert_eq!(d.tasks[1].kind, TaskKind::Device(1));
    }
}
