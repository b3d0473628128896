//! Expressions
//!
//! An [`Expression`] records operation nodes against a [`Library`]. Nodes
//! are validated when they are added (context ownership, element types,
//! dimensions, aliasing) and stay pending until [`Expression::submit`]
//! lowers the whole expression into a task graph and starts it. Submission
//! is asynchronous; [`Expression::wait`] blocks until the run ends.
//!
//! ```text
//! Empty --submit--> Submitted --run ok--> Evaluated
//!   |                   |
//!   | no nodes          +--failure--> Error
//!   +------------------------------> Evaluated
//! ```

use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex, RwLock};
use tessera_core::{
    Context, DataMatrix, DataScalar, DataVector, Descriptor, FunctionBinary, FunctionSelect, FunctionUnary, Matrix,
    Object, ObjectMeta, Ref, Scalar, TesseraError, TesseraResult, Type, Vector,
};
use tessera_kernels::Triangle;

use crate::executor::{RunObserver, TaskOutcome};
use crate::library::Library;
use crate::manager::{DependencyPlan, ExpressionManager};
use crate::node::{ExpressionNode, NodeHandle, NodeOp, NodeState};
use crate::task::TaskGraphDescription;
use crate::tracing_support::record_run;

/// Lifecycle of an expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ExpressionState {
    /// Accepting nodes
    Empty,
    /// Running
    Submitted,
    /// Every node finished successfully
    Evaluated,
    /// Lowering or a task failed
    Error,
}

impl ExpressionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ExpressionState::Evaluated | ExpressionState::Error)
    }
}

#[derive(Debug)]
struct Progress {
    state: ExpressionState,
    error: Option<TesseraError>,
    plan: Option<DependencyPlan>,
    graph: Option<TaskGraphDescription>,
    outcomes: Option<Vec<TaskOutcome>>,
    started: Option<Instant>,
}

struct ExpressionInner {
    meta: ObjectMeta,
    library: Library,
    nodes: RwLock<Vec<Arc<ExpressionNode>>>,
    explicit: Mutex<Vec<(usize, usize)>>,
    progress: Mutex<Progress>,
    finished: Condvar,
}

impl ExpressionInner {
    fn finish(&self, progress: &mut Progress, error: Option<TesseraError>) {
        progress.state = if error.is_some() {
            ExpressionState::Error
        } else {
            ExpressionState::Evaluated
        };
        progress.error = error;
        self.finished.notify_all();
    }
}

impl RunObserver for ExpressionInner {
    fn node_finished(&self, node: usize, state: NodeState) {
        if let Some(n) = self.nodes.read().get(node) {
            n.set_state(state);
        }
    }

    fn run_finished(&self, outcomes: Vec<TaskOutcome>, error: Option<TesseraError>) {
        let mut progress = self.progress.lock();
        if let Some(e) = &error {
            tracing::warn!(expression = %self.meta.id(), error = %e, "expression failed");
        }
        let elapsed_us = progress.started.map_or(0, |t| t.elapsed().as_micros() as u64);
        record_run(&self.meta.id().to_string(), outcomes.len(), elapsed_us, error.is_some());
        progress.outcomes = Some(outcomes);
        self.finish(&mut progress, error);
    }
}

/// Batch of operations evaluated together
#[derive(Clone)]
pub struct Expression {
    inner: Arc<ExpressionInner>,
}

impl Object for Expression {
    fn meta(&self) -> &ObjectMeta {
        &self.inner.meta
    }
}

fn check_type(what: &str, expected: &Type, got: &Type) -> TesseraResult<()> {
    if expected != got {
        return Err(TesseraError::invalid_argument(format!(
            "{what}: expected type {expected}, got {got}"
        )));
    }
    Ok(())
}

fn check_shape(what: &str, expected: (usize, usize), got: (usize, usize)) -> TesseraResult<()> {
    if expected != got {
        return Err(TesseraError::dim_mismatch(what, expected, got));
    }
    Ok(())
}

fn check_distinct(what: &str, w: &dyn Object, a: &dyn Object) -> TesseraResult<()> {
    if w.id() == a.id() {
        return Err(TesseraError::invalid_argument(format!(
            "{what}: result {} aliases an input",
            w.debug_name()
        )));
    }
    Ok(())
}

/// Binary operator over a single element type, as accumulators and monoids are
fn check_monoid(what: &str, op: &FunctionBinary, ty: &Type) -> TesseraResult<()> {
    check_type(&format!("{what} ({} lhs)", op.name()), ty, op.type_a())?;
    check_type(&format!("{what} ({} rhs)", op.name()), ty, op.type_b())?;
    check_type(&format!("{what} ({} result)", op.name()), ty, op.type_r())
}

fn vshape(v: &Vector) -> (usize, usize) {
    (v.nrows(), 1)
}

impl Expression {
    pub(crate) fn new(library: Library) -> Self {
        let meta = ObjectMeta::new(library.context());
        Self {
            inner: Arc::new(ExpressionInner {
                meta,
                library,
                nodes: RwLock::new(Vec::new()),
                explicit: Mutex::new(Vec::new()),
                progress: Mutex::new(Progress {
                    state: ExpressionState::Empty,
                    error: None,
                    plan: None,
                    graph: None,
                    outcomes: None,
                    started: None,
                }),
                finished: Condvar::new(),
            }),
        }
    }

    pub fn library(&self) -> &Library {
        &self.inner.library
    }

    fn context(&self) -> &Context {
        self.inner.library.context()
    }

    fn check_owned(&self, objects: &[&dyn Object]) -> TesseraResult<()> {
        let ctx = self.context();
        objects.iter().try_for_each(|o| ctx.check_owned(*o))
    }

    fn check_mask<T: Object>(
        &self,
        mask: &Option<Ref<T>>,
        shape: impl Fn(&T) -> (usize, usize),
        expected: (usize, usize),
    ) -> TesseraResult<()> {
        if let Some(m) = mask {
            self.check_owned(&[&**m])?;
            check_shape("mask", expected, shape(&**m))?;
        }
        Ok(())
    }

    fn descriptor(&self, desc: Option<Descriptor>) -> Arc<Descriptor> {
        Arc::new(desc.unwrap_or_else(|| self.inner.library.config().default_descriptor.clone()))
    }

    fn push(&self, op: NodeOp, descriptor: Arc<Descriptor>) -> TesseraResult<NodeHandle> {
        let progress = self.inner.progress.lock();
        if progress.state != ExpressionState::Empty {
            return Err(TesseraError::invalid_state(format!(
                "cannot add {} to an expression in state {:?}",
                op.kind(),
                progress.state
            )));
        }
        let mut nodes = self.inner.nodes.write();
        let index = nodes.len();
        let node = Arc::new(ExpressionNode::new(index, op, descriptor));
        tracing::trace!(expression = %self.id(), node = %node, "node added");
        nodes.push(node);
        Ok(NodeHandle(index))
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.inner.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.nodes.read().is_empty()
    }

    pub fn node(&self, handle: NodeHandle) -> Option<Arc<ExpressionNode>> {
        self.inner.nodes.read().get(handle.index()).cloned()
    }

    pub fn node_state(&self, handle: NodeHandle) -> Option<NodeState> {
        self.node(handle).map(|n| n.state())
    }

    pub fn state(&self) -> ExpressionState {
        self.inner.progress.lock().state
    }

    /// First failure of the expression, if any
    pub fn error(&self) -> Option<TesseraError> {
        self.inner.progress.lock().error.clone()
    }

    /// Node-level schedule, available after a successful analysis
    pub fn plan(&self) -> Option<DependencyPlan> {
        self.inner.progress.lock().plan.clone()
    }

    /// Structure of the lowered task graph, available after lowering
    pub fn task_graph(&self) -> Option<TaskGraphDescription> {
        self.inner.progress.lock().graph.clone()
    }

    /// Per-task outcomes of a finished run, indexed by task id
    pub fn task_outcomes(&self) -> Option<Vec<TaskOutcome>> {
        self.inner.progress.lock().outcomes.clone()
    }

    /// Require `succ` to run after `pred` in addition to inferred dependencies
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for unknown handles or a self dependency,
    /// `InvalidState` once submitted.
    pub fn dependency(&self, pred: NodeHandle, succ: NodeHandle) -> TesseraResult<()> {
        let progress = self.inner.progress.lock();
        if progress.state != ExpressionState::Empty {
            return Err(TesseraError::invalid_state("dependencies are fixed after submission"));
        }
        let len = self.inner.nodes.read().len();
        if pred.index() >= len || succ.index() >= len {
            return Err(TesseraError::invalid_argument(format!(
                "dependency {pred} -> {succ} names a node outside 0..{len}"
            )));
        }
        if pred == succ {
            return Err(TesseraError::invalid_argument(format!("{pred} cannot depend on itself")));
        }
        self.inner.explicit.lock().push((pred.index(), succ.index()));
        Ok(())
    }

    /// Lower every node and start evaluation
    ///
    /// Returns once the task graph is running. Algorithm selection or
    /// lowering failures do not fail the call: they move the expression to
    /// [`ExpressionState::Error`], observable through [`wait`](Self::wait)
    /// and [`error`](Self::error).
    ///
    /// # Errors
    ///
    /// `InvalidState` when submitted twice, `InvalidArgument` when the
    /// dependencies form a cycle.
    pub fn submit(&self) -> TesseraResult<()> {
        let mut progress = self.inner.progress.lock();
        if progress.state != ExpressionState::Empty {
            return Err(TesseraError::invalid_state("expression already submitted"));
        }
        let nodes = self.inner.nodes.read().clone();
        if nodes.is_empty() {
            self.inner.finish(&mut progress, None);
            return Ok(());
        }

        let explicit = self.inner.explicit.lock().clone();
        let plan = match ExpressionManager::analyze(&nodes, &explicit) {
            Ok(plan) => plan,
            Err(e) => {
                self.inner.finish(&mut progress, Some(e.clone()));
                return Err(e);
            }
        };
        progress.state = ExpressionState::Submitted;

        let library = &self.inner.library;
        let graph = match ExpressionManager::new(library).lower(&nodes, &plan) {
            Ok(graph) => graph,
            Err((index, e)) => {
                tracing::warn!(expression = %self.id(), node = %nodes[index], error = %e, "lowering failed");
                nodes[index].set_state(NodeState::Error);
                progress.plan = Some(plan);
                self.inner.finish(&mut progress, Some(e));
                return Ok(());
            }
        };
        for node in &nodes {
            if graph.node_tasks(node.index()).is_empty() {
                node.set_state(NodeState::Done);
            }
        }
        tracing::debug!(
            expression = %self.id(),
            nodes = nodes.len(),
            tasks = graph.len(),
            barriers = plan.barriers.len(),
            "expression submitted"
        );
        progress.graph = Some(graph.describe());
        progress.plan = Some(plan);
        progress.started = Some(Instant::now());
        // the run may finish on this thread
        drop(progress);

        let observer: Arc<dyn RunObserver> = self.inner.clone();
        if let Err(e) = library.executor().run(graph, library.accelerator().cloned(), observer) {
            let mut progress = self.inner.progress.lock();
            self.inner.finish(&mut progress, Some(e));
        }
        Ok(())
    }

    /// Block until the expression reaches a terminal state
    ///
    /// An expression without nodes is trivially evaluated.
    ///
    /// # Errors
    ///
    /// `InvalidState` for a non-empty expression that was never submitted.
    pub fn wait(&self) -> TesseraResult<ExpressionState> {
        let mut progress = self.inner.progress.lock();
        loop {
            match progress.state {
                ExpressionState::Empty => {
                    if self.inner.nodes.read().is_empty() {
                        progress.state = ExpressionState::Evaluated;
                        return Ok(ExpressionState::Evaluated);
                    }
                    return Err(TesseraError::invalid_state("expression was not submitted"));
                }
                ExpressionState::Submitted => self.inner.finished.wait(&mut progress),
                state => return Ok(state),
            }
        }
    }

    /// Submit, wait, and turn a failed run into its error
    pub fn submit_wait(&self) -> TesseraResult<()> {
        self.submit()?;
        match self.wait()? {
            ExpressionState::Error => Err(self
                .error()
                .unwrap_or_else(|| TesseraError::generic("expression failed"))),
            _ => Ok(()),
        }
    }

    // ---- data transfer ------------------------------------------------

    /// Build `matrix` from the entries of `data`
    pub fn matrix_data_write(
        &self,
        matrix: &Ref<Matrix>,
        data: &Ref<DataMatrix>,
        desc: Option<Descriptor>,
    ) -> TesseraResult<NodeHandle> {
        self.check_owned(&[&**matrix, &**data])?;
        let op = NodeOp::MatrixDataWrite {
            matrix: Arc::clone(matrix),
            data: Arc::clone(data),
        };
        self.push(op, self.descriptor(desc))
    }

    /// Copy the entries of `matrix` into `data`, sorted by `(row, col)`
    pub fn matrix_data_read(
        &self,
        matrix: &Ref<Matrix>,
        data: &Ref<DataMatrix>,
        desc: Option<Descriptor>,
    ) -> TesseraResult<NodeHandle> {
        self.check_owned(&[&**matrix, &**data])?;
        let op = NodeOp::MatrixDataRead {
            matrix: Arc::clone(matrix),
            data: Arc::clone(data),
        };
        self.push(op, self.descriptor(desc))
    }

    pub fn vector_data_write(
        &self,
        vector: &Ref<Vector>,
        data: &Ref<DataVector>,
        desc: Option<Descriptor>,
    ) -> TesseraResult<NodeHandle> {
        self.check_owned(&[&**vector, &**data])?;
        let op = NodeOp::VectorDataWrite {
            vector: Arc::clone(vector),
            data: Arc::clone(data),
        };
        self.push(op, self.descriptor(desc))
    }

    pub fn vector_data_read(
        &self,
        vector: &Ref<Vector>,
        data: &Ref<DataVector>,
        desc: Option<Descriptor>,
    ) -> TesseraResult<NodeHandle> {
        self.check_owned(&[&**vector, &**data])?;
        let op = NodeOp::VectorDataRead {
            vector: Arc::clone(vector),
            data: Arc::clone(data),
        };
        self.push(op, self.descriptor(desc))
    }

    pub fn scalar_data_write(
        &self,
        scalar: &Ref<Scalar>,
        data: &Ref<DataScalar>,
        desc: Option<Descriptor>,
    ) -> TesseraResult<NodeHandle> {
        self.check_owned(&[&**scalar, &**data])?;
        let op = NodeOp::ScalarDataWrite {
            scalar: Arc::clone(scalar),
            data: Arc::clone(data),
        };
        self.push(op, self.descriptor(desc))
    }

    pub fn scalar_data_read(
        &self,
        scalar: &Ref<Scalar>,
        data: &Ref<DataScalar>,
        desc: Option<Descriptor>,
    ) -> TesseraResult<NodeHandle> {
        self.check_owned(&[&**scalar, &**data])?;
        let op = NodeOp::ScalarDataRead {
            scalar: Arc::clone(scalar),
            data: Arc::clone(data),
        };
        self.push(op, self.descriptor(desc))
    }

    // ---- element-wise -------------------------------------------------

    fn check_ewise_matrix(
        &self,
        w: &Ref<Matrix>,
        mask: &Option<Ref<Matrix>>,
        a: &Ref<Matrix>,
        b: &Ref<Matrix>,
    ) -> TesseraResult<()> {
        self.check_owned(&[&**w, &**a, &**b])?;
        check_shape("ewise lhs", w.shape(), a.shape())?;
        check_shape("ewise rhs", w.shape(), b.shape())?;
        self.check_mask(mask, Matrix::shape, w.shape())
    }

    fn check_ewise_vector(
        &self,
        w: &Ref<Vector>,
        mask: &Option<Ref<Vector>>,
        a: &Ref<Vector>,
        b: &Ref<Vector>,
    ) -> TesseraResult<()> {
        self.check_owned(&[&**w, &**a, &**b])?;
        check_shape("ewise lhs", vshape(w), vshape(a))?;
        check_shape("ewise rhs", vshape(w), vshape(b))?;
        self.check_mask(mask, vshape, vshape(w))
    }

    /// `w<mask> = a ∪ b`; entries present in one operand are copied, so both
    /// operands must carry the result type
    pub fn matrix_ewise_add(
        &self,
        w: &Ref<Matrix>,
        mask: Option<&Ref<Matrix>>,
        op: &FunctionBinary,
        a: &Ref<Matrix>,
        b: &Ref<Matrix>,
        desc: Option<Descriptor>,
    ) -> TesseraResult<NodeHandle> {
        let mask = mask.cloned();
        self.check_ewise_matrix(w, &mask, a, b)?;
        check_monoid("ewise add", op, w.ty())?;
        check_type("ewise add lhs", w.ty(), a.ty())?;
        check_type("ewise add rhs", w.ty(), b.ty())?;
        let op = NodeOp::MatrixEWiseAdd {
            w: Arc::clone(w),
            mask,
            op: op.clone(),
            a: Arc::clone(a),
            b: Arc::clone(b),
        };
        self.push(op, self.descriptor(desc))
    }

    /// `w<mask> = a ∩ b`
    pub fn matrix_ewise_mult(
        &self,
        w: &Ref<Matrix>,
        mask: Option<&Ref<Matrix>>,
        op: &FunctionBinary,
        a: &Ref<Matrix>,
        b: &Ref<Matrix>,
        desc: Option<Descriptor>,
    ) -> TesseraResult<NodeHandle> {
        let mask = mask.cloned();
        self.check_ewise_matrix(w, &mask, a, b)?;
        check_type("ewise mult lhs", op.type_a(), a.ty())?;
        check_type("ewise mult rhs", op.type_b(), b.ty())?;
        check_type("ewise mult result", op.type_r(), w.ty())?;
        let op = NodeOp::MatrixEWiseMult {
            w: Arc::clone(w),
            mask,
            op: op.clone(),
            a: Arc::clone(a),
            b: Arc::clone(b),
        };
        self.push(op, self.descriptor(desc))
    }

    pub fn vector_ewise_add(
        &self,
        w: &Ref<Vector>,
        mask: Option<&Ref<Vector>>,
        op: &FunctionBinary,
        a: &Ref<Vector>,
        b: &Ref<Vector>,
        desc: Option<Descriptor>,
    ) -> TesseraResult<NodeHandle> {
        let mask = mask.cloned();
        self.check_ewise_vector(w, &mask, a, b)?;
        check_monoid("ewise add", op, w.ty())?;
        check_type("ewise add lhs", w.ty(), a.ty())?;
        check_type("ewise add rhs", w.ty(), b.ty())?;
        let op = NodeOp::VectorEWiseAdd {
            w: Arc::clone(w),
            mask,
            op: op.clone(),
            a: Arc::clone(a),
            b: Arc::clone(b),
        };
        self.push(op, self.descriptor(desc))
    }

    pub fn vector_ewise_mult(
        &self,
        w: &Ref<Vector>,
        mask: Option<&Ref<Vector>>,
        op: &FunctionBinary,
        a: &Ref<Vector>,
        b: &Ref<Vector>,
        desc: Option<Descriptor>,
    ) -> TesseraResult<NodeHandle> {
        let mask = mask.cloned();
        self.check_ewise_vector(w, &mask, a, b)?;
        check_type("ewise mult lhs", op.type_a(), a.ty())?;
        check_type("ewise mult rhs", op.type_b(), b.ty())?;
        check_type("ewise mult result", op.type_r(), w.ty())?;
        let op = NodeOp::VectorEWiseMult {
            w: Arc::clone(w),
            mask,
            op: op.clone(),
            a: Arc::clone(a),
            b: Arc::clone(b),
        };
        self.push(op, self.descriptor(desc))
    }

    /// `w = a op b` over scalars
    pub fn scalar_ewise_add(
        &self,
        w: &Ref<Scalar>,
        op: &FunctionBinary,
        a: &Ref<Scalar>,
        b: &Ref<Scalar>,
        desc: Option<Descriptor>,
    ) -> TesseraResult<NodeHandle> {
        self.check_owned(&[&**w, &**a, &**b])?;
        check_monoid("scalar add", op, w.ty())?;
        check_type("scalar add lhs", w.ty(), a.ty())?;
        check_type("scalar add rhs", w.ty(), b.ty())?;
        let op = NodeOp::ScalarEWiseAdd {
            w: Arc::clone(w),
            op: op.clone(),
            a: Arc::clone(a),
            b: Arc::clone(b),
        };
        self.push(op, self.descriptor(desc))
    }

    // ---- products -----------------------------------------------------

    fn check_semiring(mult: &FunctionBinary, add: &FunctionBinary, a: &Type, b: &Type, w: &Type) -> TesseraResult<()> {
        check_type("product mult lhs", mult.type_a(), a)?;
        check_type("product mult rhs", mult.type_b(), b)?;
        check_type("product mult result", mult.type_r(), w)?;
        check_monoid("product add", add, w)
    }

    /// `w<mask> = a ⊕.⊗ b`
    #[allow(clippy::too_many_arguments)]
    pub fn mxm(
        &self,
        w: &Ref<Matrix>,
        mask: Option<&Ref<Matrix>>,
        mult: &FunctionBinary,
        add: &FunctionBinary,
        a: &Ref<Matrix>,
        b: &Ref<Matrix>,
        desc: Option<Descriptor>,
    ) -> TesseraResult<NodeHandle> {
        let mask = mask.cloned();
        self.check_owned(&[&**w, &**a, &**b])?;
        check_distinct("mxm", &**w, &**a)?;
        check_distinct("mxm", &**w, &**b)?;
        if a.ncols() != b.nrows() {
            return Err(TesseraError::dim_mismatch("mxm inner", (a.ncols(), 0), (b.nrows(), 0)));
        }
        check_shape("mxm result", (a.nrows(), b.ncols()), w.shape())?;
        self.check_mask(&mask, Matrix::shape, w.shape())?;
        Self::check_semiring(mult, add, a.ty(), b.ty(), w.ty())?;
        let op = NodeOp::MxM {
            w: Arc::clone(w),
            mask,
            mult: mult.clone(),
            add: add.clone(),
            a: Arc::clone(a),
            b: Arc::clone(b),
        };
        self.push(op, self.descriptor(desc))
    }

    /// `w<mask> = a ⊕.⊗ b` with a row vector `a`
    #[allow(clippy::too_many_arguments)]
    pub fn vxm(
        &self,
        w: &Ref<Vector>,
        mask: Option<&Ref<Vector>>,
        mult: &FunctionBinary,
        add: &FunctionBinary,
        a: &Ref<Vector>,
        b: &Ref<Matrix>,
        desc: Option<Descriptor>,
    ) -> TesseraResult<NodeHandle> {
        let mask = mask.cloned();
        self.check_owned(&[&**w, &**a, &**b])?;
        check_distinct("vxm", &**w, &**a)?;
        if a.nrows() != b.nrows() {
            return Err(TesseraError::dim_mismatch("vxm inner", (b.nrows(), 0), (a.nrows(), 0)));
        }
        check_shape("vxm result", (b.ncols(), 1), vshape(w))?;
        self.check_mask(&mask, vshape, vshape(w))?;
        Self::check_semiring(mult, add, a.ty(), b.ty(), w.ty())?;
        let op = NodeOp::VxM {
            w: Arc::clone(w),
            mask,
            mult: mult.clone(),
            add: add.clone(),
            a: Arc::clone(a),
            b: Arc::clone(b),
        };
        self.push(op, self.descriptor(desc))
    }

    /// `w<mask> = a ⊕.⊗ b` with a column vector `b`
    #[allow(clippy::too_many_arguments)]
    pub fn mxv(
        &self,
        w: &Ref<Vector>,
        mask: Option<&Ref<Vector>>,
        mult: &FunctionBinary,
        add: &FunctionBinary,
        a: &Ref<Matrix>,
        b: &Ref<Vector>,
        desc: Option<Descriptor>,
    ) -> TesseraResult<NodeHandle> {
        let mask = mask.cloned();
        self.check_owned(&[&**w, &**a, &**b])?;
        check_distinct("mxv", &**w, &**b)?;
        if a.ncols() != b.nrows() {
            return Err(TesseraError::dim_mismatch("mxv inner", (a.ncols(), 0), (b.nrows(), 0)));
        }
        check_shape("mxv result", (a.nrows(), 1), vshape(w))?;
        self.check_mask(&mask, vshape, vshape(w))?;
        Self::check_semiring(mult, add, a.ty(), b.ty(), w.ty())?;
        let op = NodeOp::MxV {
            w: Arc::clone(w),
            mask,
            mult: mult.clone(),
            add: add.clone(),
            a: Arc::clone(a),
            b: Arc::clone(b),
        };
        self.push(op, self.descriptor(desc))
    }

    // ---- reductions ---------------------------------------------------

    /// `s = accum(s, reduce(a<mask>))`
    pub fn matrix_reduce(
        &self,
        s: &Ref<Scalar>,
        mask: Option<&Ref<Matrix>>,
        accum: Option<&FunctionBinary>,
        reduce: &FunctionBinary,
        a: &Ref<Matrix>,
        desc: Option<Descriptor>,
    ) -> TesseraResult<NodeHandle> {
        let mask = mask.cloned();
        self.check_owned(&[&**s, &**a])?;
        self.check_mask(&mask, Matrix::shape, a.shape())?;
        check_monoid("reduce", reduce, a.ty())?;
        check_type("reduce result", s.ty(), a.ty())?;
        if let Some(accum) = accum {
            check_monoid("reduce accum", accum, s.ty())?;
        }
        let op = NodeOp::MatrixReduce {
            s: Arc::clone(s),
            mask,
            accum: accum.cloned(),
            reduce: reduce.clone(),
            a: Arc::clone(a),
        };
        self.push(op, self.descriptor(desc))
    }

    /// `s = accum(s, reduce(v))`
    pub fn vector_reduce(
        &self,
        s: &Ref<Scalar>,
        accum: Option<&FunctionBinary>,
        reduce: &FunctionBinary,
        v: &Ref<Vector>,
        desc: Option<Descriptor>,
    ) -> TesseraResult<NodeHandle> {
        self.check_owned(&[&**s, &**v])?;
        check_monoid("reduce", reduce, v.ty())?;
        check_type("reduce result", s.ty(), v.ty())?;
        if let Some(accum) = accum {
            check_monoid("reduce accum", accum, s.ty())?;
        }
        let op = NodeOp::VectorReduce {
            s: Arc::clone(s),
            accum: accum.cloned(),
            reduce: reduce.clone(),
            a: Arc::clone(v),
        };
        self.push(op, self.descriptor(desc))
    }

    // ---- transforms ---------------------------------------------------

    /// Accumulating nodes without a natural operator need an explicit one
    fn check_accum(what: &str, desc: &Descriptor, accum: Option<&FunctionBinary>, ty: &Type) -> TesseraResult<()> {
        match accum {
            Some(op) => check_monoid(&format!("{what} accum"), op, ty),
            None if desc.accum_result => Err(TesseraError::invalid_argument(format!(
                "{what}: accumulation requested without an accumulation operator"
            ))),
            None => Ok(()),
        }
    }

    /// `w<mask> = aᵀ`
    pub fn transpose(
        &self,
        w: &Ref<Matrix>,
        mask: Option<&Ref<Matrix>>,
        accum: Option<&FunctionBinary>,
        a: &Ref<Matrix>,
        desc: Option<Descriptor>,
    ) -> TesseraResult<NodeHandle> {
        let mask = mask.cloned();
        let descriptor = self.descriptor(desc);
        self.check_owned(&[&**w, &**a])?;
        check_distinct("transpose", &**w, &**a)?;
        check_shape("transpose result", (a.ncols(), a.nrows()), w.shape())?;
        self.check_mask(&mask, Matrix::shape, w.shape())?;
        check_type("transpose", w.ty(), a.ty())?;
        Self::check_accum("transpose", &descriptor, accum, w.ty())?;
        let op = NodeOp::Transpose {
            w: Arc::clone(w),
            mask,
            accum: accum.cloned(),
            a: Arc::clone(a),
        };
        self.push(op, descriptor)
    }

    /// Strict lower or upper triangle of `a`
    pub fn matrix_tria(
        &self,
        w: &Ref<Matrix>,
        a: &Ref<Matrix>,
        triangle: Triangle,
        desc: Option<Descriptor>,
    ) -> TesseraResult<NodeHandle> {
        self.check_owned(&[&**w, &**a])?;
        check_shape("tria result", a.shape(), w.shape())?;
        check_type("tria", w.ty(), a.ty())?;
        let op = NodeOp::MatrixTria {
            w: Arc::clone(w),
            a: Arc::clone(a),
            triangle,
        };
        self.push(op, self.descriptor(desc))
    }

    /// Keep the entries of `a` accepted by `select`
    pub fn matrix_select(
        &self,
        w: &Ref<Matrix>,
        mask: Option<&Ref<Matrix>>,
        select: &FunctionSelect,
        a: &Ref<Matrix>,
        desc: Option<Descriptor>,
    ) -> TesseraResult<NodeHandle> {
        let mask = mask.cloned();
        self.check_owned(&[&**w, &**a])?;
        check_shape("select result", a.shape(), w.shape())?;
        self.check_mask(&mask, Matrix::shape, w.shape())?;
        check_type("select result", w.ty(), a.ty())?;
        check_type(&format!("select ({})", select.name()), select.type_a(), a.ty())?;
        let op = NodeOp::MatrixSelect {
            w: Arc::clone(w),
            mask,
            select: select.clone(),
            a: Arc::clone(a),
        };
        self.push(op, self.descriptor(desc))
    }

    /// `w<mask> = op(a)`
    pub fn matrix_apply(
        &self,
        w: &Ref<Matrix>,
        mask: Option<&Ref<Matrix>>,
        op: &FunctionUnary,
        a: &Ref<Matrix>,
        desc: Option<Descriptor>,
    ) -> TesseraResult<NodeHandle> {
        let mask = mask.cloned();
        self.check_owned(&[&**w, &**a])?;
        check_shape("apply result", a.shape(), w.shape())?;
        self.check_mask(&mask, Matrix::shape, w.shape())?;
        check_type(&format!("apply ({}) input", op.name()), op.type_a(), a.ty())?;
        check_type(&format!("apply ({}) result", op.name()), op.type_r(), w.ty())?;
        let op = NodeOp::MatrixApply {
            w: Arc::clone(w),
            mask,
            op: op.clone(),
            a: Arc::clone(a),
        };
        self.push(op, self.descriptor(desc))
    }

    /// `w<mask> = s` at every selected position
    pub fn vector_assign(
        &self,
        w: &Ref<Vector>,
        mask: Option<&Ref<Vector>>,
        accum: Option<&FunctionBinary>,
        s: &Ref<Scalar>,
        desc: Option<Descriptor>,
    ) -> TesseraResult<NodeHandle> {
        let mask = mask.cloned();
        let descriptor = self.descriptor(desc);
        self.check_owned(&[&**w, &**s])?;
        self.check_mask(&mask, vshape, vshape(w))?;
        check_type("assign", w.ty(), s.ty())?;
        Self::check_accum("assign", &descriptor, accum, w.ty())?;
        let op = NodeOp::VectorAssign {
            w: Arc::clone(w),
            mask,
            accum: accum.cloned(),
            s: Arc::clone(s),
        };
        self.push(op, descriptor)
    }
}

impl std::fmt::Debug for Expression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Expression")
            .field("id", &self.id())
            .field("nodes", &self.len())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::{LibraryConfig, Status};

    fn library() -> Library {
        Library::new(LibraryConfig::default().with_block_size(2).with_worker_threads(2)).unwrap()
    }

    #[test]
    fn test_empty_expression_evaluates() {
        let lib = library();
        let expr = lib.make_expression();
        assert_eq!(expr.wait().unwrap(), ExpressionState::Evaluated);

        let expr = lib.make_expression();
        expr.submit().unwrap();
        assert_eq!(expr.state(), ExpressionState::Evaluated);
        assert_eq!(expr.wait().unwrap(), ExpressionState::Evaluated);
    }

    #[test]
    fn test_wait_before_submit_fails() {
        let lib = library();
        let expr = lib.make_expression();
        let m = lib.make_matrix(4, 4, Type::f32()).unwrap();
        let data = DataMatrix::make(lib.context());
        expr.matrix_data_read(&m, &data, None).unwrap();
        assert!(expr.wait().is_err());
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let lib = library();
        let expr = lib.make_expression();
        let a = lib.make_matrix(4, 4, Type::f32()).unwrap();
        let b = lib.make_matrix(4, 4, Type::i32()).unwrap();
        let w = lib.make_matrix(4, 4, Type::f32()).unwrap();
        let plus = FunctionBinary::plus::<f32>(Type::f32());
        let err = expr.matrix_ewise_add(&w, None, &plus, &a, &b, None).unwrap_err();
        assert_eq!(err.status(), tessera_core::Status::InvalidArgument);
        assert!(expr.is_empty());
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let lib = library();
        let expr = lib.make_expression();
        let a = lib.make_matrix(4, 3, Type::f32()).unwrap();
        let b = lib.make_matrix(4, 3, Type::f32()).unwrap();
        let w = lib.make_matrix(4, 4, Type::f32()).unwrap();
        let mult = FunctionBinary::mult::<f32>(Type::f32());
        let plus = FunctionBinary::plus::<f32>(Type::f32());
        assert!(expr.mxm(&w, None, &mult, &plus, &a, &b, None).is_err());
    }

    #[test]
    fn test_aliasing_rejected() {
        let lib = library();
        let expr = lib.make_expression();
        let a = lib.make_matrix(4, 4, Type::f32()).unwrap();
        let b = lib.make_matrix(4, 4, Type::f32()).unwrap();
        let mult = FunctionBinary::mult::<f32>(Type::f32());
        let plus = FunctionBinary::plus::<f32>(Type::f32());
        assert!(expr.mxm(&a, None, &mult, &plus, &a, &b, None).is_err());
        assert!(expr.transpose(&a, None, None, &a, None).is_err());
    }

    #[test]
    fn test_transpose_accum_needs_operator() {
        let lib = library();
        let expr = lib.make_expression();
        let a = lib.make_matrix(4, 2, Type::f32()).unwrap();
        let w = lib.make_matrix(2, 4, Type::f32()).unwrap();
        let desc = Descriptor::new().with_accum_result(true);
        assert!(expr.transpose(&w, None, None, &a, Some(desc.clone())).is_err());
        let plus = FunctionBinary::plus::<f32>(Type::f32());
        assert!(expr.transpose(&w, None, Some(&plus), &a, Some(desc)).is_ok());
    }

    #[test]
    fn test_foreign_object_rejected() {
        let lib = library();
        let other = library();
        let expr = lib.make_expression();
        let m = other.make_matrix(4, 4, Type::f32()).unwrap();
        let data = DataMatrix::make(lib.context());
        assert!(expr.matrix_data_write(&m, &data, None).is_err());
    }

    #[test]
    fn test_dependency_validation() {
        let lib = library();
        let expr = lib.make_expression();
        let m = lib.make_matrix(4, 4, Type::f32()).unwrap();
        let data = DataMatrix::make(lib.context());
        let n0 = expr.matrix_data_read(&m, &data, None).unwrap();
        assert!(expr.dependency(n0, n0).is_err());
        assert!(expr.dependency(n0, NodeHandle(5)).is_err());
    }

    #[test]
    fn test_cycle_rejected_on_submit() {
        let lib = library();
        let expr = lib.make_expression();
        let a = lib.make_matrix(4, 4, Type::f32()).unwrap();
        let b = lib.make_matrix(4, 4, Type::f32()).unwrap();
        let da = DataMatrix::make(lib.context());
        let db = DataMatrix::make(lib.context());
        let n0 = expr.matrix_data_read(&a, &da, None).unwrap();
        let n1 = expr.matrix_data_read(&b, &db, None).unwrap();
        expr.dependency(n0, n1).unwrap();
        expr.dependency(n1, n0).unwrap();
        let err = expr.submit().unwrap_err();
        assert_eq!(err.status(), tessera_core::Status::InvalidArgument);
        assert_eq!(expr.state(), ExpressionState::Error);
    }

    #[test]
    fn test_no_nodes_after_submit() {
        let lib = library();
        let expr = lib.make_expression();
        let m = lib.make_matrix(4, 4, Type::f32()).unwrap();
        let data = DataMatrix::make(lib.context());
        expr.matrix_data_read(&m, &data, None).unwrap();
        expr.submit().unwrap();
        assert_eq!(expr.submit().unwrap_err().status(), Status::InvalidState);
        assert_eq!(
            expr.matrix_data_read(&m, &data, None).unwrap_err().status(),
            Status::InvalidState
        );
        assert_eq!(expr.wait().unwrap(), ExpressionState::Evaluated);
        assert_eq!(expr.submit().unwrap_err().status(), Status::InvalidState);
    }
}
