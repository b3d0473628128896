//! Built-in COO algorithms
//!
//! One processor per operation kind. Every processor emits one task per
//! output tile (plus staging or reduction tasks where the operation needs
//! them); the same processors serve the host and the accelerator backend,
//! the [`TaskBuilder`](crate::task::TaskBuilder) decides where their tasks
//! run.
//!
//! Conventions shared by all processors:
//! - a masked-out or empty result clears the output tile
//! - without accumulation the output tile is replaced; with accumulation the
//!   new tile is folded into the previous one with the accumulation operator
//! - operators are applied in encounter order, so results are deterministic

use std::sync::Arc;

use tessera_core::{
    BlockIndex, CooBlock, Format, FunctionBinary, Matrix, Object, ObjectId, Ref, Storage, TesseraError, Vector,
};
use tessera_kernels::ewise_add;

use crate::dispatch::{AlgorithmKey, AlgorithmRegistry, Backend};
use crate::node::{ExpressionNode, OpKind};

mod data;
mod ewise;
mod product;
mod reduce;
mod transform;

pub use data::{
    MatrixDataReadCoo, MatrixDataWriteCoo, ScalarDataReadCoo, ScalarDataWriteCoo, VectorDataReadCoo,
    VectorDataWriteCoo,
};
pub use ewise::{MatrixEWiseAddCoo, MatrixEWiseMultCoo, ScalarEWiseAddCoo, VectorEWiseAddCoo, VectorEWiseMultCoo};
pub use product::{MxMCoo, MxVCoo, VxMCoo};
pub use reduce::{MatrixReduceCoo, VectorReduceCoo};
pub use transform::{MatrixApplyCoo, MatrixSelectCoo, MatrixTriaCoo, TransposeCoo, VectorAssignCoo};

/// Register every built-in processor for `backend`
pub fn register_builtin(registry: &mut AlgorithmRegistry, backend: Backend) {
    let key = |kind| AlgorithmKey::new(kind, Format::Coo, backend);
    registry.register(key(OpKind::MatrixDataWrite), Arc::new(MatrixDataWriteCoo));
    registry.register(key(OpKind::MatrixDataRead), Arc::new(MatrixDataReadCoo));
    registry.register(key(OpKind::VectorDataWrite), Arc::new(VectorDataWriteCoo));
    registry.register(key(OpKind::VectorDataRead), Arc::new(VectorDataReadCoo));
    registry.register(key(OpKind::ScalarDataWrite), Arc::new(ScalarDataWriteCoo));
    registry.register(key(OpKind::ScalarDataRead), Arc::new(ScalarDataReadCoo));
    registry.register(key(OpKind::MatrixEWiseAdd), Arc::new(MatrixEWiseAddCoo));
    registry.register(key(OpKind::MatrixEWiseMult), Arc::new(MatrixEWiseMultCoo));
    registry.register(key(OpKind::VectorEWiseAdd), Arc::new(VectorEWiseAddCoo));
    registry.register(key(OpKind::VectorEWiseMult), Arc::new(VectorEWiseMultCoo));
    registry.register(key(OpKind::ScalarEWiseAdd), Arc::new(ScalarEWiseAddCoo));
    registry.register(key(OpKind::MxM), Arc::new(MxMCoo));
    registry.register(key(OpKind::VxM), Arc::new(VxMCoo));
    registry.register(key(OpKind::MxV), Arc::new(MxVCoo));
    registry.register(key(OpKind::MatrixReduce), Arc::new(MatrixReduceCoo));
    registry.register(key(OpKind::VectorReduce), Arc::new(VectorReduceCoo));
    registry.register(key(OpKind::Transpose), Arc::new(TransposeCoo));
    registry.register(key(OpKind::MatrixTria), Arc::new(MatrixTriaCoo));
    registry.register(key(OpKind::MatrixSelect), Arc::new(MatrixSelectCoo));
    registry.register(key(OpKind::MatrixApply), Arc::new(MatrixApplyCoo));
    registry.register(key(OpKind::VectorAssign), Arc::new(VectorAssignCoo));
}

/// Matrix or vector operand with tiled storage
pub(crate) trait Tiled: Object + Send + Sync + 'static {
    fn storage(&self) -> &Storage;
}

impl Tiled for Matrix {
    fn storage(&self) -> &Storage {
        Matrix::storage(self)
    }
}

impl Tiled for Vector {
    fn storage(&self) -> &Storage {
        Vector::storage(self)
    }
}

pub(crate) fn mask_id<T: Tiled>(mask: &Option<Ref<T>>) -> Option<ObjectId> {
    mask.as_ref().map(|m| m.id())
}

/// Mask tile at `idx`, `None` when the node has no mask or the tile is empty
pub(crate) fn mask_tile<T: Tiled>(mask: &Option<Ref<T>>, idx: BlockIndex) -> Option<Arc<CooBlock>> {
    mask.as_ref().and_then(|m| m.storage().get_block(idx))
}

/// Accumulation operator of `node`: the explicit one, else `natural`
pub(crate) fn accum_op(
    node: &ExpressionNode,
    explicit: &Option<FunctionBinary>,
    natural: Option<&FunctionBinary>,
) -> Option<FunctionBinary> {
    if !node.accumulates() {
        return None;
    }
    explicit.clone().or_else(|| natural.cloned())
}

/// Write `result` to tile `idx`, folding it into the previous tile with `accum`
pub(crate) fn store_tile(
    storage: &Storage,
    idx: BlockIndex,
    result: Option<Arc<CooBlock>>,
    accum: Option<&FunctionBinary>,
) {
    let result = match accum {
        Some(op) => {
            let previous = storage.get_block(idx);
            ewise_add(previous.as_ref(), result.as_ref(), op)
        }
        None => result,
    };
    match result {
        Some(block) => {
            storage.set_block(idx, block);
        }
        None => {
            storage.remove_block(idx);
        }
    }
}

/// Error for a processor invoked on a node of another kind
pub(crate) fn wrong_node(processor: &str, node: &ExpressionNode) -> TesseraError {
    TesseraError::invalid_argument(format!("{processor} cannot process {node}"))
}

