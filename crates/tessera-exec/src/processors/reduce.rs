//! Reductions to a scalar
//!
//! Every tile is folded into a partial by its own task; a final task folds
//! the partials in row-major tile order and stores the scalar. An empty
//! input clears the scalar unless the node accumulates.

use std::sync::Arc;

use parking_lot::Mutex;
use tessera_core::{FunctionBinary, Object, Ref, Scalar, TesseraResult};
use tessera_kernels::{reduce_block, reduce_partials, TileMask};

use super::{accum_op, mask_id, mask_tile, wrong_node, Tiled};
use crate::dispatch::NodeProcessor;
use crate::node::{ExpressionNode, NodeOp};
use crate::task::{TaskAccess, TaskBuilder};

fn emit_reduce<T: Tiled>(
    builder: &mut TaskBuilder<'_>,
    s: &Ref<Scalar>,
    mask: &Option<Ref<T>>,
    reduce: &FunctionBinary,
    accum: Option<FunctionBinary>,
    a: &Ref<T>,
) {
    let grid = *a.storage().grid();
    let complement = builder.descriptor().mask_complement;
    let partials: Arc<Mutex<Vec<Option<Vec<u8>>>>> = Arc::new(Mutex::new(vec![None; grid.num_blocks()]));

    for (slot, idx) in grid.iter().enumerate().collect::<Vec<_>>() {
        let access = TaskAccess::new()
            .read_tile(a.id(), idx)
            .read_tile_opt(mask_id(mask), idx);
        let (a, mask, reduce, partials) = (Arc::clone(a), mask.clone(), reduce.clone(), Arc::clone(&partials));
        builder.emplace(format!("partial{idx}"), access, move || {
            let Some(block) = a.storage().get_block(idx) else {
                return Ok(());
            };
            let mask_block = mask_tile(&mask, idx);
            let tile_mask = TileMask::from_operand(mask.is_some(), mask_block.as_deref(), complement);
            let partial = tile_mask.apply(block).and_then(|b| reduce_block(&b, &reduce));
            partials.lock()[slot] = partial;
            Ok(())
        });
    }

    let mut access = TaskAccess::new();
    if accum.is_some() {
        access = access.read_whole(s.id());
    }
    let access = access.write_whole(s.id());
    let (s, reduce) = (Arc::clone(s), reduce.clone());
    builder.emplace_after_all("fold", access, move || {
        let parts = std::mem::take(&mut *partials.lock());
        let total = reduce_partials(parts, &reduce);
        let value = match (accum, s.value(), total) {
            (Some(op), Some(old), Some(new)) => Some(op.apply_owned(&old, &new)),
            (Some(_), old, None) => old,
            (_, _, total) => total,
        };
        match value {
            Some(v) => s.set_value(v),
            None => {
                s.clear_value();
                Ok(())
            }
        }
    });
}

/// `s = accum(s, reduce(a<mask>))`
#[derive(Debug, Default)]
pub struct MatrixReduceCoo;

impl NodeProcessor for MatrixReduceCoo {
    fn name(&self) -> &str {
        "matrix_reduce_coo"
    }

    fn process(&self, node: &ExpressionNode, builder: &mut TaskBuilder<'_>) -> TesseraResult<()> {
        let NodeOp::MatrixReduce { s, mask, accum, reduce, a } = node.op() else {
            return Err(wrong_node(self.name(), node));
        };
        let accum = accum_op(node, accum, Some(reduce));
        emit_reduce(builder, s, mask, reduce, accum, a);
        Ok(())
    }
}

/// `s = accum(s, reduce(v))`
#[derive(Debug, Default)]
pub struct VectorReduceCoo;

impl NodeProcessor for VectorReduceCoo {
    fn name(&self) -> &str {
        "vector_reduce_coo"
    }

    fn process(&self, node: &ExpressionNode, builder: &mut TaskBuilder<'_>) -> TesseraResult<()> {
        let NodeOp::VectorReduce { s, accum, reduce, a } = node.op() else {
            return Err(wrong_node(self.name(), node));
        };
        let accum = accum_op(node, accum, Some(reduce));
        emit_reduce(builder, s, &None, reduce, accum, a);
        Ok(())
    }
}
