//! Host task executor
//!
//! A fixed pool of worker threads pulls ready tasks from a shared queue.
//! Each submitted [`TaskGraph`] becomes a run that tracks, per task, the
//! number of unfinished predecessors; a task is queued the moment that
//! count reaches zero. Device tasks are handed to the accelerator, whose
//! completion callback re-enters the run from the notification thread.
//!
//! After the first failure the run stops starting new work: every task that
//! has not begun yet is recorded as skipped, tasks already running finish
//! normally, and the run completes once every task has an outcome.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Sender};
use parking_lot::Mutex;
use tessera_core::{critical, TesseraError, TesseraResult};

use crate::accelerator::{Accelerator, Completion};
use crate::node::NodeState;
use crate::task::{TaskFn, TaskGraph, TaskId, TaskKind};

/// Final state of a task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Failed(TesseraError),
    /// Not started because an earlier task of the run failed
    Skipped,
}

impl TaskOutcome {
    fn from_result(result: TesseraResult<()>) -> Self {
        match result {
            Ok(()) => TaskOutcome::Completed,
            Err(e) => TaskOutcome::Failed(e),
        }
    }
}

/// Receives progress of a run
pub(crate) trait RunObserver: Send + Sync {
    /// Every task of `node` has an outcome
    fn node_finished(&self, node: usize, state: NodeState);

    /// Every task has an outcome; `error` is the first failure
    fn run_finished(&self, outcomes: Vec<TaskOutcome>, error: Option<TesseraError>);
}

type Job = (Arc<Run>, TaskId);

struct Run {
    work: Vec<Mutex<Option<TaskFn>>>,
    names: Vec<String>,
    kinds: Vec<TaskKind>,
    nodes: Vec<usize>,
    succs: Vec<Vec<TaskId>>,
    pending: Vec<AtomicUsize>,
    outcomes: Mutex<Vec<Option<TaskOutcome>>>,
    remaining: AtomicUsize,
    node_remaining: Vec<AtomicUsize>,
    node_failed: Vec<AtomicBool>,
    node_skipped: Vec<AtomicBool>,
    failed: AtomicBool,
    first_error: Mutex<Option<TesseraError>>,
    sender: Sender<Job>,
    accelerator: Option<Arc<dyn Accelerator>>,
    observer: Arc<dyn RunObserver>,
}

impl Run {
    fn schedule(self: &Arc<Self>, task: TaskId) {
        if let Err(err) = self.sender.send((Arc::clone(self), task)) {
            // workers are gone, run on the caller's thread
            let (run, task) = err.into_inner();
            run.execute(task);
        }
    }

    fn execute(self: &Arc<Self>, task: TaskId) {
        let Some(work) = self.work[task].lock().take() else {
            critical!("task {} scheduled twice", self.names[task]);
        };
        if self.failed.load(Ordering::Acquire) {
            drop(work);
            self.finish(task, TaskOutcome::Skipped);
            return;
        }

        tracing::trace!(task = %self.names[task], "start task");
        match (self.kinds[task], &self.accelerator) {
            (TaskKind::Device(device), Some(accelerator)) => {
                let run = Arc::clone(self);
                let on_complete: Completion = Box::new(move |result| run.finish(task, TaskOutcome::from_result(result)));
                if let Err(e) = accelerator.enqueue(device, work, on_complete) {
                    self.finish(task, TaskOutcome::Failed(e));
                }
            }
            (kind, _) => {
                if let TaskKind::Device(device) = kind {
                    tracing::warn!(task = %self.names[task], device, "no accelerator attached, running on host");
                }
                let result = panic::catch_unwind(AssertUnwindSafe(work))
                    .unwrap_or_else(|_| Err(TesseraError::generic(format!("task {} panicked", self.names[task]))));
                self.finish(task, TaskOutcome::from_result(result));
            }
        }
    }

    fn finish(self: &Arc<Self>, task: TaskId, outcome: TaskOutcome) {
        let node = self.nodes[task];
        match &outcome {
            TaskOutcome::Failed(e) => {
                tracing::error!(task = %self.names[task], error = %e, "task failed");
                self.failed.store(true, Ordering::Release);
                self.node_failed[node].store(true, Ordering::Release);
                self.first_error.lock().get_or_insert_with(|| e.clone());
            }
            TaskOutcome::Skipped => {
                tracing::debug!(task = %self.names[task], "task skipped");
                self.node_skipped[node].store(true, Ordering::Release);
            }
            TaskOutcome::Completed => {}
        }
        self.outcomes.lock()[task] = Some(outcome);

        if self.node_remaining[node].fetch_sub(1, Ordering::AcqRel) == 1 {
            let state = if self.node_failed[node].load(Ordering::Acquire) {
                NodeState::Error
            } else if self.node_skipped[node].load(Ordering::Acquire) {
                NodeState::Skipped
            } else {
                NodeState::Done
            };
            self.observer.node_finished(node, state);
        }

        for &succ in &self.succs[task] {
            if self.pending[succ].fetch_sub(1, Ordering::AcqRel) == 1 {
                self.schedule(succ);
            }
        }

        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            let outcomes = std::mem::take(&mut *self.outcomes.lock())
                .into_iter()
                .map(|o| o.unwrap_or(TaskOutcome::Skipped))
                .collect();
            let error = self.first_error.lock().take();
            tracing::debug!(tasks = self.names.len(), failed = error.is_some(), "run finished");
            self.observer.run_finished(outcomes, error);
        }
    }
}

/// Worker pool running task graphs
pub struct Executor {
    sender: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
}

impl Executor {
    /// Spawn `threads` workers named `tessera-worker-N`
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for zero threads, `Generic` if spawning fails.
    pub fn new(threads: usize) -> TesseraResult<Self> {
        if threads == 0 {
            return Err(TesseraError::invalid_argument("executor needs at least one worker"));
        }
        let (sender, receiver) = channel::unbounded::<Job>();
        let mut workers = Vec::with_capacity(threads);
        for n in 0..threads {
            let rx = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("tessera-worker-{n}"))
                .spawn(move || {
                    for (run, task) in rx {
                        run.execute(task);
                    }
                })
                .map_err(|e| TesseraError::generic(format!("cannot spawn worker {n}: {e}")))?;
            workers.push(handle);
        }
        tracing::debug!(threads, "executor started");

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            worker_count: threads,
        })
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Close the queue and join the workers
    ///
    /// Runs already started keep their own handle on the queue, so their
    /// remaining tasks still execute before the workers exit. Later calls to
    /// [`run`](Self::run) fail with `InvalidState`. Calling this again is a
    /// no-op.
    pub fn shutdown(&self) {
        if self.sender.lock().take().is_none() {
            return;
        }
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        let current = thread::current().id();
        for handle in workers {
            // the owning library may be released from inside a task callback
            if handle.thread().id() != current && handle.join().is_err() {
                tracing::warn!("worker exited with a panic");
            }
        }
        tracing::debug!(threads = self.worker_count, "executor stopped");
    }

    /// Start running `graph`; progress is reported to `observer`
    ///
    /// An empty graph finishes before this returns.
    pub(crate) fn run(
        &self,
        graph: TaskGraph,
        accelerator: Option<Arc<dyn Accelerator>>,
        observer: Arc<dyn RunObserver>,
    ) -> TesseraResult<()> {
        let sender = self
            .sender
            .lock()
            .clone()
            .ok_or_else(|| TesseraError::invalid_state("executor is shut down"))?;

        let count = graph.tasks.len();
        if count == 0 {
            observer.run_finished(Vec::new(), None);
            return Ok(());
        }

        let node_count = graph.tasks.iter().map(|t| t.node + 1).max().unwrap_or(0);
        let mut node_tasks = vec![0usize; node_count];
        let mut succs = vec![Vec::new(); count];
        let mut pending = Vec::with_capacity(count);
        let mut work = Vec::with_capacity(count);
        let mut names = Vec::with_capacity(count);
        let mut kinds = Vec::with_capacity(count);
        let mut nodes = Vec::with_capacity(count);
        let mut roots = Vec::new();

        for (id, task) in graph.tasks.into_iter().enumerate() {
            for &p in &task.preds {
                succs[p].push(id);
            }
            if task.preds.is_empty() {
                roots.push(id);
            }
            node_tasks[task.node] += 1;
            pending.push(AtomicUsize::new(task.preds.len()));
            work.push(Mutex::new(task.work));
            names.push(task.name);
            kinds.push(task.kind);
            nodes.push(task.node);
        }

        tracing::debug!(tasks = count, roots = roots.len(), "run started");
        let run = Arc::new(Run {
            work,
            names,
            kinds,
            nodes,
            succs,
            pending,
            outcomes: Mutex::new(vec![None; count]),
            remaining: AtomicUsize::new(count),
            node_remaining: node_tasks.into_iter().map(AtomicUsize::new).collect(),
            node_failed: (0..node_count).map(|_| AtomicBool::new(false)).collect(),
            node_skipped: (0..node_count).map(|_| AtomicBool::new(false)).collect(),
            failed: AtomicBool::new(false),
            first_error: Mutex::new(None),
            sender,
            accelerator,
            observer,
        });
        for root in roots {
            run.schedule(root);
        }
        Ok(())
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("worker_count", &self.worker_count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accelerator::{DeviceManager, SimulatedAccelerator};
    use crate::dispatch::Backend;
    use crate::task::TaskAccess;
    use std::sync::mpsc;
    use std::time::Duration;
    use tessera_core::{BlockIndex, Descriptor, ObjectId};

    struct Collect {
        nodes: Mutex<Vec<(usize, NodeState)>>,
        done: Mutex<Option<mpsc::Sender<(Vec<TaskOutcome>, Option<TesseraError>)>>>,
    }

    impl RunObserver for Collect {
        fn node_finished(&self, node: usize, state: NodeState) {
            self.nodes.lock().push((node, state));
        }

        fn run_finished(&self, outcomes: Vec<TaskOutcome>, error: Option<TesseraError>) {
            if let Some(tx) = self.done.lock().take() {
                tx.send((outcomes, error)).unwrap();
            }
        }
    }

    fn observer() -> (Arc<Collect>, mpsc::Receiver<(Vec<TaskOutcome>, Option<TesseraError>)>) {
        let (tx, rx) = mpsc::channel();
        (
            Arc::new(Collect {
                nodes: Mutex::new(Vec::new()),
                done: Mutex::new(Some(tx)),
            }),
            rx,
        )
    }

    #[test]
    fn test_chain_runs_in_order() {
        let executor = Executor::new(4).unwrap();
        let desc = Descriptor::default();
        let devices = DeviceManager::new(0);
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut graph = TaskGraph::new(1);
        {
            let mut b = graph.builder(0, "n".into(), Backend::Cpu, &desc, &devices);
            let mut prev = None;
            for k in 0..8 {
                let log = Arc::clone(&log);
                let work = move || {
                    log.lock().push(k);
                    Ok(())
                };
                prev = Some(match prev {
                    None => b.emplace("step", TaskAccess::new(), work),
                    Some(p) => b.emplace_after("step", &[p], TaskAccess::new(), work).unwrap(),
                });
            }
        }
        let (obs, rx) = observer();
        executor.run(graph, None, obs.clone()).unwrap();
        let (outcomes, error) = rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert!(error.is_none());
        assert!(outcomes.iter().all(|o| *o == TaskOutcome::Completed));
        assert_eq!(*log.lock(), (0..8).collect::<Vec<_>>());
        assert_eq!(*obs.nodes.lock(), vec![(0, NodeState::Done)]);
    }

    #[test]
    fn test_failure_skips_successors() {
        let executor = Executor::new(2).unwrap();
        let desc = Descriptor::default();
        let devices = DeviceManager::new(0);
        let a = ObjectId(1);
        let idx = BlockIndex::new(0, 0);
        let mut graph = TaskGraph::new(2);
        graph
            .builder(0, "producer".into(), Backend::Cpu, &desc, &devices)
            .emplace("fail", TaskAccess::new().write_tile(a, idx), || {
                Err(TesseraError::invalid_argument("bad input"))
            });
        graph
            .builder(1, "consumer".into(), Backend::Cpu, &desc, &devices)
            .emplace("read", TaskAccess::new().read_tile(a, idx), || Ok(()));
        graph.link(&[0, 1], &[]);

        let (obs, rx) = observer();
        executor.run(graph, None, obs.clone()).unwrap();
        let (outcomes, error) = rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert!(matches!(error, Some(TesseraError::InvalidArgument(_))));
        assert!(matches!(outcomes[0], TaskOutcome::Failed(_)));
        assert_eq!(outcomes[1], TaskOutcome::Skipped);
        let mut nodes = obs.nodes.lock().clone();
        nodes.sort_by_key(|&(n, _)| n);
        assert_eq!(nodes, vec![(0, NodeState::Error), (1, NodeState::Skipped)]);
    }

    #[test]
    fn test_panicking_task_fails_run() {
        let executor = Executor::new(1).unwrap();
        let desc = Descriptor::default();
        let devices = DeviceManager::new(0);
        let mut graph = TaskGraph::new(1);
        graph
            .builder(0, "n".into(), Backend::Cpu, &desc, &devices)
            .emplace("boom", TaskAccess::new(), || panic!("kernel bug"));
        let (obs, rx) = observer();
        executor.run(graph, None, obs).unwrap();
        let (_, error) = rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert!(matches!(error, Some(TesseraError::Generic(_))));
    }

    #[test]
    fn test_device_tasks_complete_through_accelerator() {
        let executor = Executor::new(1).unwrap();
        let accelerator: Arc<dyn Accelerator> = Arc::new(SimulatedAccelerator::new(2, 1).unwrap());
        let desc = Descriptor::default();
        let devices = DeviceManager::new(2);
        let hits = Arc::new(AtomicUsize::new(0));
        let mut graph = TaskGraph::new(1);
        {
            let mut b = graph.builder(0, "n".into(), Backend::Accelerator, &desc, &devices);
            for _ in 0..6 {
                let hits = Arc::clone(&hits);
                b.emplace("tile", TaskAccess::new(), move || {
                    hits.fetch_add(1, Ordering::Relaxed);
                    Ok(())
                });
            }
        }
        let (obs, rx) = observer();
        executor.run(graph, Some(Arc::clone(&accelerator)), obs).unwrap();
        let (outcomes, error) = rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert!(error.is_none());
        assert_eq!(outcomes.len(), 6);
        assert_eq!(hits.load(Ordering::Relaxed), 6);
        assert_eq!(accelerator.stats().completed, 6);
    }

    #[test]
    fn test_shutdown_drains_queued_tasks() {
        let executor = Executor::new(1).unwrap();
        let desc = Descriptor::default();
        let devices = DeviceManager::new(0);
        let hits = Arc::new(AtomicUsize::new(0));
        let mut graph = TaskGraph::new(1);
        {
            let mut b = graph.builder(0, "n".into(), Backend::Cpu, &desc, &devices);
            for k in 0..6 {
                let hits = Arc::clone(&hits);
                b.emplace("tile", TaskAccess::new(), move || {
                    if k == 0 {
                        thread::sleep(Duration::from_millis(50));
                    }
                    hits.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                });
            }
        }
        let (obs, rx) = observer();
        executor.run(graph, None, obs).unwrap();
        executor.shutdown();

        assert_eq!(hits.load(Ordering::SeqCst), 6);
        let (outcomes, error) = rx.try_recv().unwrap();
        assert!(error.is_none());
        assert!(outcomes.iter().all(|o| *o == TaskOutcome::Completed));

        executor.shutdown();
        let (obs, _rx) = observer();
        let err = executor.run(TaskGraph::new(0), None, obs).unwrap_err();
        assert!(matches!(err, TesseraError::InvalidState(_)));
    }

    #[test]
    fn test_empty_graph_finishes_immediately() {
        let executor = Executor::new(1).unwrap();
        let (obs, rx) = observer();
        executor.run(TaskGraph::new(0), None, obs).unwrap();
        let (outcomes, error) = rx.try_recv().unwrap();
        assert!(outcomes.is_empty() && error.is_none());
        assert!(Executor::new(0).is_err());
    }
}
