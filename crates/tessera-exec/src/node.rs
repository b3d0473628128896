//! Expression nodes
//!
//! An [`ExpressionNode`] is one operation instance: a typed [`NodeOp`] with
//! its operands, the [`Descriptor`] it runs under and a state flag
//! (`Pending → Dispatched → Done | Error`). Nodes are frozen once their
//! expression is submitted; only the state flag changes afterwards.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tessera_core::{
    DataMatrix, DataScalar, DataVector, Descriptor, Format, FunctionBinary, FunctionSelect, FunctionUnary, Matrix,
    Object, ObjectId, Ref, Scalar, Vector,
};
use tessera_kernels::Triangle;

/// Index of a node inside its expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeHandle(pub usize);

impl NodeHandle {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node {}", self.0)
    }
}

/// Operation kind tag used for algorithm dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OpKind {
    MatrixDataWrite,
    MatrixDataRead,
    VectorDataWrite,
    VectorDataRead,
    ScalarDataWrite,
    ScalarDataRead,
    MatrixEWiseAdd,
    MatrixEWiseMult,
    VectorEWiseAdd,
    VectorEWiseMult,
    ScalarEWiseAdd,
    MxM,
    VxM,
    MxV,
    MatrixReduce,
    VectorReduce,
    Transpose,
    MatrixTria,
    MatrixSelect,
    MatrixApply,
    VectorAssign,
}

impl OpKind {
    /// Every kind the built-in processors cover
    pub const ALL: [OpKind; 21] = [
        OpKind::MatrixDataWrite,
        OpKind::MatrixDataRead,
        OpKind::VectorDataWrite,
        OpKind::VectorDataRead,
        OpKind::ScalarDataWrite,
        OpKind::ScalarDataRead,
        OpKind::MatrixEWiseAdd,
        OpKind::MatrixEWiseMult,
        OpKind::VectorEWiseAdd,
        OpKind::VectorEWiseMult,
        OpKind::ScalarEWiseAdd,
        OpKind::MxM,
        OpKind::VxM,
        OpKind::MxV,
        OpKind::MatrixReduce,
        OpKind::VectorReduce,
        OpKind::Transpose,
        OpKind::MatrixTria,
        OpKind::MatrixSelect,
        OpKind::MatrixApply,
        OpKind::VectorAssign,
    ];
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Operation with its operands
#[derive(Debug, Clone)]
pub enum NodeOp {
    MatrixDataWrite {
        matrix: Ref<Matrix>,
        data: Ref<DataMatrix>,
    },
    MatrixDataRead {
        matrix: Ref<Matrix>,
        data: Ref<DataMatrix>,
    },
    VectorDataWrite {
        vector: Ref<Vector>,
        data: Ref<DataVector>,
    },
    VectorDataRead {
        vector: Ref<Vector>,
        data: Ref<DataVector>,
    },
    ScalarDataWrite {
        scalar: Ref<Scalar>,
        data: Ref<DataScalar>,
    },
    ScalarDataRead {
        scalar: Ref<Scalar>,
        data: Ref<DataScalar>,
    },
    MatrixEWiseAdd {
        w: Ref<Matrix>,
        mask: Option<Ref<Matrix>>,
        op: FunctionBinary,
        a: Ref<Matrix>,
        b: Ref<Matrix>,
    },
    MatrixEWiseMult {
        w: Ref<Matrix>,
        mask: Option<Ref<Matrix>>,
        op: FunctionBinary,
        a: Ref<Matrix>,
        b: Ref<Matrix>,
    },
    VectorEWiseAdd {
        w: Ref<Vector>,
        mask: Option<Ref<Vector>>,
        op: FunctionBinary,
        a: Ref<Vector>,
        b: Ref<Vector>,
    },
    VectorEWiseMult {
        w: Ref<Vector>,
        mask: Option<Ref<Vector>>,
        op: FunctionBinary,
        a: Ref<Vector>,
        b: Ref<Vector>,
    },
    ScalarEWiseAdd {
        w: Ref<Scalar>,
        op: FunctionBinary,
        a: Ref<Scalar>,
        b: Ref<Scalar>,
    },
    MxM {
        w: Ref<Matrix>,
        mask: Option<Ref<Matrix>>,
        mult: FunctionBinary,
        add: FunctionBinary,
        a: Ref<Matrix>,
        b: Ref<Matrix>,
    },
    VxM {
        w: Ref<Vector>,
        mask: Option<Ref<Vector>>,
        mult: FunctionBinary,
        add: FunctionBinary,
        a: Ref<Vector>,
        b: Ref<Matrix>,
    },
    MxV {
        w: Ref<Vector>,
        mask: Option<Ref<Vector>>,
        mult: FunctionBinary,
        add: FunctionBinary,
        a: Ref<Matrix>,
        b: Ref<Vector>,
    },
    MatrixReduce {
        s: Ref<Scalar>,
        mask: Option<Ref<Matrix>>,
        accum: Option<FunctionBinary>,
        reduce: FunctionBinary,
        a: Ref<Matrix>,
    },
    VectorReduce {
        s: Ref<Scalar>,
        accum: Option<FunctionBinary>,
        reduce: FunctionBinary,
        a: Ref<Vector>,
    },
    Transpose {
        w: Ref<Matrix>,
        mask: Option<Ref<Matrix>>,
        accum: Option<FunctionBinary>,
        a: Ref<Matrix>,
    },
    MatrixTria {
        w: Ref<Matrix>,
        a: Ref<Matrix>,
        triangle: Triangle,
    },
    MatrixSelect {
        w: Ref<Matrix>,
        mask: Option<Ref<Matrix>>,
        select: FunctionSelect,
        a: Ref<Matrix>,
    },
    MatrixApply {
        w: Ref<Matrix>,
        mask: Option<Ref<Matrix>>,
        op: FunctionUnary,
        a: Ref<Matrix>,
    },
    VectorAssign {
        w: Ref<Vector>,
        mask: Option<Ref<Vector>>,
        accum: Option<FunctionBinary>,
        s: Ref<Scalar>,
    },
}

fn ids<const N: usize>(required: [ObjectId; N], optional: &[Option<ObjectId>]) -> Vec<ObjectId> {
    let mut out: Vec<ObjectId> = required.to_vec();
    out.extend(optional.iter().flatten().copied());
    out
}

impl NodeOp {
    pub fn kind(&self) -> OpKind {
        match self {
            NodeOp::MatrixDataWrite { .. } => OpKind::MatrixDataWrite,
            NodeOp::MatrixDataRead { .. } => OpKind::MatrixDataRead,
            NodeOp::VectorDataWrite { .. } => OpKind::VectorDataWrite,
            NodeOp::VectorDataRead { .. } => OpKind::VectorDataRead,
            NodeOp::ScalarDataWrite { .. } => OpKind::ScalarDataWrite,
            NodeOp::ScalarDataRead { .. } => OpKind::ScalarDataRead,
            NodeOp::MatrixEWiseAdd { .. } => OpKind::MatrixEWiseAdd,
            NodeOp::MatrixEWiseMult { .. } => OpKind::MatrixEWiseMult,
            NodeOp::VectorEWiseAdd { .. } => OpKind::VectorEWiseAdd,
            NodeOp::VectorEWiseMult { .. } => OpKind::VectorEWiseMult,
            NodeOp::ScalarEWiseAdd { .. } => OpKind::ScalarEWiseAdd,
            NodeOp::MxM { .. } => OpKind::MxM,
            NodeOp::VxM { .. } => OpKind::VxM,
            NodeOp::MxV { .. } => OpKind::MxV,
            NodeOp::MatrixReduce { .. } => OpKind::MatrixReduce,
            NodeOp::VectorReduce { .. } => OpKind::VectorReduce,
            NodeOp::Transpose { .. } => OpKind::Transpose,
            NodeOp::MatrixTria { .. } => OpKind::MatrixTria,
            NodeOp::MatrixSelect { .. } => OpKind::MatrixSelect,
            NodeOp::MatrixApply { .. } => OpKind::MatrixApply,
            NodeOp::VectorAssign { .. } => OpKind::VectorAssign,
        }
    }

    /// Objects whose content the operation observes
    ///
    /// `accumulates` adds the result object for operations that fold into
    /// their previous result.
    pub fn reads(&self, accumulates: bool) -> Vec<ObjectId> {
        let mask_id = |m: &Option<Ref<Matrix>>| m.as_ref().map(|m| m.id());
        let vmask_id = |m: &Option<Ref<Vector>>| m.as_ref().map(|m| m.id());
        let acc = |id: ObjectId| accumulates.then_some(id);

        match self {
            NodeOp::MatrixDataWrite { data, .. } => vec![data.id()],
            NodeOp::MatrixDataRead { matrix, .. } => vec![matrix.id()],
            NodeOp::VectorDataWrite { data, .. } => vec![data.id()],
            NodeOp::VectorDataRead { vector, .. } => vec![vector.id()],
            NodeOp::ScalarDataWrite { data, .. } => vec![data.id()],
            NodeOp::ScalarDataRead { scalar, .. } => vec![scalar.id()],
            NodeOp::MatrixEWiseAdd { w, mask, a, b, .. } => ids([a.id(), b.id()], &[mask_id(mask), acc(w.id())]),
            NodeOp::MatrixEWiseMult { mask, a, b, .. } => ids([a.id(), b.id()], &[mask_id(mask)]),
            NodeOp::VectorEWiseAdd { w, mask, a, b, .. } => ids([a.id(), b.id()], &[vmask_id(mask), acc(w.id())]),
            NodeOp::VectorEWiseMult { mask, a, b, .. } => ids([a.id(), b.id()], &[vmask_id(mask)]),
            NodeOp::ScalarEWiseAdd { a, b, .. } => vec![a.id(), b.id()],
            NodeOp::MxM { w, mask, a, b, .. } => ids([a.id(), b.id()], &[mask_id(mask), acc(w.id())]),
            NodeOp::VxM { w, mask, a, b, .. } => ids([a.id(), b.id()], &[vmask_id(mask), acc(w.id())]),
            NodeOp::MxV { w, mask, a, b, .. } => ids([a.id(), b.id()], &[vmask_id(mask), acc(w.id())]),
            NodeOp::MatrixReduce { s, mask, a, .. } => ids([a.id()], &[mask_id(mask), acc(s.id())]),
            NodeOp::VectorReduce { s, a, .. } => ids([a.id()], &[acc(s.id())]),
            NodeOp::Transpose { w, mask, a, .. } => ids([a.id()], &[mask_id(mask), acc(w.id())]),
            NodeOp::MatrixTria { a, .. } => vec![a.id()],
            NodeOp::MatrixSelect { mask, a, .. } => ids([a.id()], &[mask_id(mask)]),
            NodeOp::MatrixApply { mask, a, .. } => ids([a.id()], &[mask_id(mask)]),
            NodeOp::VectorAssign { w, mask, s, .. } => ids([s.id()], &[vmask_id(mask), acc(w.id())]),
        }
    }

    /// Objects the operation replaces
    pub fn writes(&self) -> Vec<ObjectId> {
        let id = match self {
            NodeOp::MatrixDataWrite { matrix, .. } => matrix.id(),
            NodeOp::MatrixDataRead { data, .. } => data.id(),
            NodeOp::VectorDataWrite { vector, .. } => vector.id(),
            NodeOp::VectorDataRead { data, .. } => data.id(),
            NodeOp::ScalarDataWrite { scalar, .. } => scalar.id(),
            NodeOp::ScalarDataRead { data, .. } => data.id(),
            NodeOp::MatrixEWiseAdd { w, .. }
            | NodeOp::MatrixEWiseMult { w, .. }
            | NodeOp::MxM { w, .. }
            | NodeOp::Transpose { w, .. }
            | NodeOp::MatrixTria { w, .. }
            | NodeOp::MatrixSelect { w, .. }
            | NodeOp::MatrixApply { w, .. } => w.id(),
            NodeOp::VectorEWiseAdd { w, .. }
            | NodeOp::VectorEWiseMult { w, .. }
            | NodeOp::VxM { w, .. }
            | NodeOp::MxV { w, .. }
            | NodeOp::VectorAssign { w, .. } => w.id(),
            NodeOp::ScalarEWiseAdd { w, .. } => w.id(),
            NodeOp::MatrixReduce { s, .. } | NodeOp::VectorReduce { s, .. } => s.id(),
        };
        vec![id]
    }
}

/// Lifecycle of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NodeState {
    /// Created, expression not yet submitted
    Pending = 0,
    /// An algorithm was selected and its tasks emitted
    Dispatched = 1,
    /// Every task completed
    Done = 2,
    /// Dispatch or a task failed
    Error = 3,
    /// Tasks were not started because an earlier task failed
    Skipped = 4,
}

impl NodeState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => NodeState::Pending,
            1 => NodeState::Dispatched,
            2 => NodeState::Done,
            3 => NodeState::Error,
            _ => NodeState::Skipped,
        }
    }
}

/// One operation instance of an expression
#[derive(Debug)]
pub struct ExpressionNode {
    index: usize,
    op: NodeOp,
    descriptor: Arc<Descriptor>,
    state: AtomicU8,
}

impl ExpressionNode {
    pub(crate) fn new(index: usize, op: NodeOp, descriptor: Arc<Descriptor>) -> Self {
        Self {
            index,
            op,
            descriptor,
            state: AtomicU8::new(NodeState::Pending as u8),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn handle(&self) -> NodeHandle {
        NodeHandle(self.index)
    }

    pub fn op(&self) -> &NodeOp {
        &self.op
    }

    pub fn kind(&self) -> OpKind {
        self.op.kind()
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    /// Storage format the node operates on
    pub fn format(&self) -> Format {
        Format::Coo
    }

    /// Whether the node folds into its previous result
    pub fn accumulates(&self) -> bool {
        self.descriptor.accum_result
    }

    pub fn reads(&self) -> Vec<ObjectId> {
        self.op.reads(self.accumulates())
    }

    pub fn writes(&self) -> Vec<ObjectId> {
        self.op.writes()
    }

    pub fn state(&self) -> NodeState {
        NodeState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: NodeState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

impl fmt::Display for ExpressionNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind(), self.index)
    }
}
