//! Element-wise add/mult over aligned tiles and scalar add

use std::sync::Arc;

use tessera_core::{CooBlock, FunctionBinary, Object, Ref, TesseraResult};
use tessera_kernels::{ewise_add, ewise_mult, TileMask};

use super::{accum_op, mask_id, mask_tile, store_tile, wrong_node, Tiled};
use crate::dispatch::NodeProcessor;
use crate::node::{ExpressionNode, NodeOp};
use crate::task::{TaskAccess, TaskBuilder};

type TileKernel = fn(Option<&Arc<CooBlock>>, Option<&Arc<CooBlock>>, &FunctionBinary) -> Option<Arc<CooBlock>>;

struct EWise<'n, T: Tiled> {
    w: &'n Ref<T>,
    mask: &'n Option<Ref<T>>,
    op: &'n FunctionBinary,
    a: &'n Ref<T>,
    b: &'n Ref<T>,
    accum: Option<FunctionBinary>,
}

/// One task per tile: `w(c) = mask(c) ∘ kernel(a(c), b(c))`
fn emit_ewise<T: Tiled>(builder: &mut TaskBuilder<'_>, args: EWise<'_, T>, kernel: TileKernel) {
    let grid = *args.w.storage().grid();
    let complement = builder.descriptor().mask_complement;
    let accumulate = args.accum.is_some();

    for idx in grid.iter().collect::<Vec<_>>() {
        let access = TaskAccess::new()
            .read_tile(args.a.id(), idx)
            .read_tile(args.b.id(), idx)
            .read_tile_opt(mask_id(args.mask), idx)
            .accumulating(accumulate, args.w.id(), idx)
            .write_tile(args.w.id(), idx);

        let (w, mask, a, b) = (
            Arc::clone(args.w),
            args.mask.clone(),
            Arc::clone(args.a),
            Arc::clone(args.b),
        );
        let (op, accum) = (args.op.clone(), args.accum.clone());
        builder.emplace(format!("tile{idx}"), access, move || {
            let mask_block = mask_tile(&mask, idx);
            let tile_mask = TileMask::from_operand(mask.is_some(), mask_block.as_deref(), complement);
            let result = if tile_mask.selects_none() {
                None
            } else {
                let ta = a.storage().get_block(idx);
                let tb = b.storage().get_block(idx);
                kernel(ta.as_ref(), tb.as_ref(), &op).and_then(|r| tile_mask.apply(r))
            };
            store_tile(w.storage(), idx, result, accum.as_ref());
            Ok(())
        });
    }
}

/// `w<mask> = a ∪ b`
#[derive(Debug, Default)]
pub struct MatrixEWiseAddCoo;

impl NodeProcessor for MatrixEWiseAddCoo {
    fn name(&self) -> &str {
        "matrix_ewise_add_coo"
    }

    fn process(&self, node: &ExpressionNode, builder: &mut TaskBuilder<'_>) -> TesseraResult<()> {
        let NodeOp::MatrixEWiseAdd { w, mask, op, a, b } = node.op() else {
            return Err(wrong_node(self.name(), node));
        };
        let accum = accum_op(node, &None, Some(op));
        emit_ewise(builder, EWise { w, mask, op, a, b, accum }, ewise_add);
        Ok(())
    }
}

/// `w<mask> = a ∩ b`
#[derive(Debug, Default)]
pub struct MatrixEWiseMultCoo;

impl NodeProcessor for MatrixEWiseMultCoo {
    fn name(&self) -> &str {
        "matrix_ewise_mult_coo"
    }

    fn process(&self, node: &ExpressionNode, builder: &mut TaskBuilder<'_>) -> TesseraResult<()> {
        let NodeOp::MatrixEWiseMult { w, mask, op, a, b } = node.op() else {
            return Err(wrong_node(self.name(), node));
        };
        emit_ewise(builder, EWise { w, mask, op, a, b, accum: None }, ewise_mult);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct VectorEWiseAddCoo;

impl NodeProcessor for VectorEWiseAddCoo {
    fn name(&self) -> &str {
        "vector_ewise_add_coo"
    }

    fn process(&self, node: &ExpressionNode, builder: &mut TaskBuilder<'_>) -> TesseraResult<()> {
        let NodeOp::VectorEWiseAdd { w, mask, op, a, b } = node.op() else {
            return Err(wrong_node(self.name(), node));
        };
        let accum = accum_op(node, &None, Some(op));
        emit_ewise(builder, EWise { w, mask, op, a, b, accum }, ewise_add);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct VectorEWiseMultCoo;

impl NodeProcessor for VectorEWiseMultCoo {
    fn name(&self) -> &str {
        "vector_ewise_mult_coo"
    }

    fn process(&self, node: &ExpressionNode, builder: &mut TaskBuilder<'_>) -> TesseraResult<()> {
        let NodeOp::VectorEWiseMult { w, mask, op, a, b } = node.op() else {
            return Err(wrong_node(self.name(), node));
        };
        emit_ewise(builder, EWise { w, mask, op, a, b, accum: None }, ewise_mult);
        Ok(())
    }
}

/// `w = a op b`; a missing side is copied, both missing clears `w`
#[derive(Debug, Default)]
pub struct ScalarEWiseAddCoo;

impl NodeProcessor for ScalarEWiseAddCoo {
    fn name(&self) -> &str {
        "scalar_ewise_add"
    }

    fn process(&self, node: &ExpressionNode, builder: &mut TaskBuilder<'_>) -> TesseraResult<()> {
        let NodeOp::ScalarEWiseAdd { w, op, a, b } = node.op() else {
            return Err(wrong_node(self.name(), node));
        };
        let access = TaskAccess::new()
            .read_whole(a.id())
            .read_whole(b.id())
            .write_whole(w.id());
        let (w, a, b, op) = (Arc::clone(w), Arc::clone(a), Arc::clone(b), op.clone());
        builder.emplace("value", access, move || {
            let value = match (a.value(), b.value()) {
                (Some(x), Some(y)) => Some(op.apply_owned(&x, &y)),
                (Some(x), None) | (None, Some(x)) => Some(x),
                (None, None) => None,
            };
            match value {
                Some(v) => w.set_value(v),
                None => {
                    w.clear_value();
                    Ok(())
                }
            }
        });
        Ok(())
    }
}
