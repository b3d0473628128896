//! Single-operand tile transforms and scalar assignment

use std::sync::Arc;

use tessera_core::{BlockIndex, CooBlock, FunctionBinary, Object, Ref, TesseraError, TesseraResult};
use tessera_kernels::{apply_block, fill_rows, select_block, transpose_block, tria_block, TileMask};

use super::{accum_op, mask_id, mask_tile, store_tile, wrong_node, Tiled};
use crate::dispatch::NodeProcessor;
use crate::node::{ExpressionNode, NodeOp};
use crate::task::{TaskAccess, TaskBuilder};

/// One task per output tile computing `w(c) = mask(c) ∘ f(a(source(c)))`
fn emit_map<T, S, F>(
    builder: &mut TaskBuilder<'_>,
    w: &Ref<T>,
    mask: &Option<Ref<T>>,
    a: &Ref<T>,
    accum: Option<FunctionBinary>,
    source: S,
    f: F,
) where
    T: Tiled,
    S: Fn(BlockIndex) -> BlockIndex,
    F: Fn(BlockIndex, &CooBlock) -> Option<Arc<CooBlock>> + Clone + Send + 'static,
{
    let grid = *w.storage().grid();
    let complement = builder.descriptor().mask_complement;

    for idx in grid.iter().collect::<Vec<_>>() {
        let from = source(idx);
        let access = TaskAccess::new()
            .read_tile(a.id(), from)
            .read_tile_opt(mask_id(mask), idx)
            .accumulating(accum.is_some(), w.id(), idx)
            .write_tile(w.id(), idx);
        let (w, mask, a, accum, f) = (Arc::clone(w), mask.clone(), Arc::clone(a), accum.clone(), f.clone());
        builder.emplace(format!("tile{idx}"), access, move || {
            let mask_block = mask_tile(&mask, idx);
            let tile_mask = TileMask::from_operand(mask.is_some(), mask_block.as_deref(), complement);
            let result = if tile_mask.selects_none() {
                None
            } else {
                a.storage()
                    .get_block(from)
                    .and_then(|block| f(idx, &block))
                    .and_then(|r| tile_mask.apply(r))
            };
            store_tile(w.storage(), idx, result, accum.as_ref());
            Ok(())
        });
    }
}

/// `w<mask> = aᵀ`
#[derive(Debug, Default)]
pub struct TransposeCoo;

impl NodeProcessor for TransposeCoo {
    fn name(&self) -> &str {
        "transpose_coo"
    }

    fn process(&self, node: &ExpressionNode, builder: &mut TaskBuilder<'_>) -> TesseraResult<()> {
        let NodeOp::Transpose { w, mask, accum, a } = node.op() else {
            return Err(wrong_node(self.name(), node));
        };
        let accum = accum_op(node, accum, None);
        emit_map(builder, w, mask, a, accum, BlockIndex::transposed, |_, block| transpose_block(block));
        Ok(())
    }
}

/// Strict lower or upper triangle of `a`
#[derive(Debug, Default)]
pub struct MatrixTriaCoo;

impl NodeProcessor for MatrixTriaCoo {
    fn name(&self) -> &str {
        "matrix_tria_coo"
    }

    fn process(&self, node: &ExpressionNode, builder: &mut TaskBuilder<'_>) -> TesseraResult<()> {
        let NodeOp::MatrixTria { w, a, triangle } = node.op() else {
            return Err(wrong_node(self.name(), node));
        };
        let grid = *a.storage().grid();
        let triangle = *triangle;
        emit_map(builder, w, &None, a, None, |idx| idx, move |idx, block| {
            tria_block(block, grid.block_offset(idx), triangle)
        });
        Ok(())
    }
}

/// `w<mask> = { a(i, j) | select(a(i, j)) }`
#[derive(Debug, Default)]
pub struct MatrixSelectCoo;

impl NodeProcessor for MatrixSelectCoo {
    fn name(&self) -> &str {
        "matrix_select_coo"
    }

    fn process(&self, node: &ExpressionNode, builder: &mut TaskBuilder<'_>) -> TesseraResult<()> {
        let NodeOp::MatrixSelect { w, mask, select, a } = node.op() else {
            return Err(wrong_node(self.name(), node));
        };
        let select = select.clone();
        emit_map(builder, w, mask, a, None, |idx| idx, move |_, block| select_block(block, &select));
        Ok(())
    }
}

/// `w<mask> = op(a)`
#[derive(Debug, Default)]
pub struct MatrixApplyCoo;

impl NodeProcessor for MatrixApplyCoo {
    fn name(&self) -> &str {
        "matrix_apply_coo"
    }

    fn process(&self, node: &ExpressionNode, builder: &mut TaskBuilder<'_>) -> TesseraResult<()> {
        let NodeOp::MatrixApply { w, mask, op, a } = node.op() else {
            return Err(wrong_node(self.name(), node));
        };
        let op = op.clone();
        emit_map(builder, w, mask, a, None, |idx| idx, move |_, block| apply_block(block, &op));
        Ok(())
    }
}

/// `w<mask> = s` at every selected position
#[derive(Debug, Default)]
pub struct VectorAssignCoo;

impl NodeProcessor for VectorAssignCoo {
    fn name(&self) -> &str {
        "vector_assign_coo"
    }

    fn process(&self, node: &ExpressionNode, builder: &mut TaskBuilder<'_>) -> TesseraResult<()> {
        let NodeOp::VectorAssign { w, mask, accum, s } = node.op() else {
            return Err(wrong_node(self.name(), node));
        };
        let accum = accum_op(node, accum, None);
        let grid = *w.storage().grid();
        let complement = builder.descriptor().mask_complement;

        for idx in grid.iter().collect::<Vec<_>>() {
            let access = TaskAccess::new()
                .read_whole(s.id())
                .read_tile_opt(mask_id(mask), idx)
                .accumulating(accum.is_some(), w.id(), idx)
                .write_tile(w.id(), idx);
            let (w, mask, s, accum) = (Arc::clone(w), mask.clone(), Arc::clone(s), accum.clone());
            builder.emplace(format!("tile{idx}"), access, move || {
                let value = match s.value() {
                    Some(v) => v,
                    None if !w.ty().has_values() => Vec::new(),
                    None => {
                        return Err(TesseraError::no_value(format!(
                            "scalar {} assigned without a value",
                            s.debug_name()
                        )))
                    }
                };
                let (nrows, _) = grid.block_shape(idx);
                let mask_block = mask_tile(&mask, idx);
                let rows = TileMask::from_operand(mask.is_some(), mask_block.as_deref(), complement).selected_rows(nrows);
                store_tile(w.storage(), idx, fill_rows(nrows, rows, &value), accum.as_ref());
                Ok(())
            });
        }
        Ok(())
    }
}
