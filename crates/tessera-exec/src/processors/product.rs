//! Semiring products
//!
//! Output tile `(i, j)` of `a ⊕.⊗ b` depends on block-row `i` of `a` and
//! block-column `j` of `b`. Each output tile is one task that multiplies the
//! matching tile pairs along the inner dimension and folds the partial
//! products with `add` in inner-index order.

use std::sync::Arc;

use tessera_core::{BlockIndex, CooBlock, FunctionBinary, Object, TesseraResult};
use tessera_kernels::{accumulate, mxm_block, mxv_block, vxm_block, TileMask};

use super::{accum_op, mask_id, mask_tile, store_tile, wrong_node, Tiled};
use crate::dispatch::NodeProcessor;
use crate::node::{ExpressionNode, NodeOp};
use crate::task::{TaskAccess, TaskBuilder};

/// Tile pairs `(a, b)` contributing to one output tile
type Pairs = Vec<(BlockIndex, BlockIndex)>;

type PairKernel = fn(&CooBlock, &CooBlock, &FunctionBinary, &FunctionBinary) -> Option<Arc<CooBlock>>;

struct Product<A: Tiled, B: Tiled, W: Tiled> {
    w: Arc<W>,
    mask: Option<Arc<W>>,
    a: Arc<A>,
    b: Arc<B>,
    mult: FunctionBinary,
    add: FunctionBinary,
    accum: Option<FunctionBinary>,
}

fn emit_product<A, B, W>(
    builder: &mut TaskBuilder<'_>,
    p: Product<A, B, W>,
    kernel: PairKernel,
    pairs_of: impl Fn(BlockIndex) -> Pairs,
) where
    A: Tiled,
    B: Tiled,
    W: Tiled,
{
    let grid = *p.w.storage().grid();
    let complement = builder.descriptor().mask_complement;

    for idx in grid.iter().collect::<Vec<_>>() {
        let pairs = pairs_of(idx);
        let access = pairs
            .iter()
            .fold(TaskAccess::new(), |acc, &(ia, ib)| {
                acc.read_tile(p.a.id(), ia).read_tile(p.b.id(), ib)
            })
            .read_tile_opt(mask_id(&p.mask), idx)
            .accumulating(p.accum.is_some(), p.w.id(), idx)
            .write_tile(p.w.id(), idx);

        let (w, mask, a, b) = (
            Arc::clone(&p.w),
            p.mask.clone(),
            Arc::clone(&p.a),
            Arc::clone(&p.b),
        );
        let (mult, add, accum) = (p.mult.clone(), p.add.clone(), p.accum.clone());
        builder.emplace(format!("tile{idx}"), access, move || {
            let mask_block = mask_tile(&mask, idx);
            let tile_mask = TileMask::from_operand(mask.is_some(), mask_block.as_deref(), complement);
            let result = if tile_mask.selects_none() {
                None
            } else {
                let partials: Vec<Arc<CooBlock>> = pairs
                    .iter()
                    .filter_map(|&(ia, ib)| {
                        let ta = a.storage().get_block(ia)?;
                        let tb = b.storage().get_block(ib)?;
                        kernel(&ta, &tb, &mult, &add)
                    })
                    .collect();
                accumulate(partials, &add).and_then(|r| tile_mask.apply(r))
            };
            store_tile(w.storage(), idx, result, accum.as_ref());
            Ok(())
        });
    }
}

/// `w<mask> = a ⊕.⊗ b`
#[derive(Debug, Default)]
pub struct MxMCoo;

impl NodeProcessor for MxMCoo {
    fn name(&self) -> &str {
        "mxm_coo"
    }

    fn process(&self, node: &ExpressionNode, builder: &mut TaskBuilder<'_>) -> TesseraResult<()> {
        let NodeOp::MxM { w, mask, mult, add, a, b } = node.op() else {
            return Err(wrong_node(self.name(), node));
        };
        let inner = a.storage().grid().block_cols() as u32;
        let product = Product {
            w: Arc::clone(w),
            mask: mask.clone(),
            a: Arc::clone(a),
            b: Arc::clone(b),
            mult: mult.clone(),
            add: add.clone(),
            accum: accum_op(node, &None, Some(add)),
        };
        emit_product(builder, product, mxm_block, |idx| {
            (0..inner)
                .map(|k| (BlockIndex::new(idx.row, k), BlockIndex::new(k, idx.col)))
                .collect()
        });
        Ok(())
    }
}

/// `w<mask> = a ⊕.⊗ b` for a row vector `a`
#[derive(Debug, Default)]
pub struct VxMCoo;

impl NodeProcessor for VxMCoo {
    fn name(&self) -> &str {
        "vxm_coo"
    }

    fn process(&self, node: &ExpressionNode, builder: &mut TaskBuilder<'_>) -> TesseraResult<()> {
        let NodeOp::VxM { w, mask, mult, add, a, b } = node.op() else {
            return Err(wrong_node(self.name(), node));
        };
        let inner = b.storage().grid().block_rows() as u32;
        let product = Product {
            w: Arc::clone(w),
            mask: mask.clone(),
            a: Arc::clone(a),
            b: Arc::clone(b),
            mult: mult.clone(),
            add: add.clone(),
            accum: accum_op(node, &None, Some(add)),
        };
        // output tile j of w lives at vector row j
        emit_product(builder, product, vxm_block, |idx| {
            (0..inner)
                .map(|k| (BlockIndex::vector(k), BlockIndex::new(k, idx.row)))
                .collect()
        });
        Ok(())
    }
}

/// `w<mask> = a ⊕.⊗ b` for a column vector `b`
#[derive(Debug, Default)]
pub struct MxVCoo;

impl NodeProcessor for MxVCoo {
    fn name(&self) -> &str {
        "mxv_coo"
    }

    fn process(&self, node: &ExpressionNode, builder: &mut TaskBuilder<'_>) -> TesseraResult<()> {
        let NodeOp::MxV { w, mask, mult, add, a, b } = node.op() else {
            return Err(wrong_node(self.name(), node));
        };
        let inner = a.storage().grid().block_cols() as u32;
        let product = Product {
            w: Arc::clone(w),
            mask: mask.clone(),
            a: Arc::clone(a),
            b: Arc::clone(b),
            mult: mult.clone(),
            add: add.clone(),
            accum: accum_op(node, &None, Some(add)),
        };
        emit_product(builder, product, mxv_block, |idx| {
            (0..inner)
                .map(|k| (BlockIndex::new(idx.row, k), BlockIndex::vector(k)))
                .collect()
        });
        Ok(())
    }
}
