//! Single-tile transforms: transpose, triangle and value selection, unary
//! apply, scalar fill and whole-tile reduction.

use std::sync::Arc;

use tessera_core::block::pack_key;
use tessera_core::{CooBlock, FunctionBinary, FunctionSelect, FunctionUnary};

use crate::ewise::from_packed;
use crate::mask::gather;
use crate::reduce::reduce_values;

/// Which triangle of a matrix to keep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Triangle {
    /// Entries strictly below the diagonal (`row > col`)
    Lower,
    /// Entries strictly above the diagonal (`row < col`)
    Upper,
}

/// Transposed copy of a tile
pub fn transpose_block(block: &CooBlock) -> Option<Arc<CooBlock>> {
    if block.is_empty() {
        return None;
    }
    let bs = block.byte_size();
    let mut order: Vec<usize> = (0..block.nvals()).collect();
    order.sort_by_key(|&k| pack_key(block.cols()[k], block.rows()[k]));

    let mut rows = Vec::with_capacity(order.len());
    let mut cols = Vec::with_capacity(order.len());
    let mut vals = Vec::with_capacity(block.vals().len());
    for k in order {
        rows.push(block.cols()[k]);
        cols.push(block.rows()[k]);
        vals.extend_from_slice(block.value(k));
    }
    Some(Arc::new(CooBlock::from_sorted(
        block.ncols(),
        block.nrows(),
        rows,
        cols,
        vals,
        bs,
    )))
}

/// Keep one strict triangle; `offset` is the global `(row, col)` of the tile origin
pub fn tria_block(block: &CooBlock, offset: (usize, usize), triangle: Triangle) -> Option<Arc<CooBlock>> {
    let keep: Vec<usize> = (0..block.nvals())
        .filter(|&k| {
            let (r, c) = block.key(k);
            let (gr, gc) = (offset.0 + r as usize, offset.1 + c as usize);
            match triangle {
                Triangle::Lower => gr > gc,
                Triangle::Upper => gr < gc,
            }
        })
        .collect();
    keep_entries(block, &keep)
}

/// Keep the entries whose value satisfies `select`
pub fn select_block(block: &CooBlock, select: &FunctionSelect) -> Option<Arc<CooBlock>> {
    let keep: Vec<usize> = (0..block.nvals())
        .filter(|&k| select.test(block.value(k)))
        .collect();
    keep_entries(block, &keep)
}

fn keep_entries(block: &CooBlock, keep: &[usize]) -> Option<Arc<CooBlock>> {
    if keep.is_empty() {
        None
    } else {
        Some(Arc::new(gather(block, keep)))
    }
}

/// Map every value through `op`; the structure is unchanged
pub fn apply_block(block: &CooBlock, op: &FunctionUnary) -> Option<Arc<CooBlock>> {
    if block.is_empty() {
        return None;
    }
    let out_size = op.type_r().byte_size();
    let mut vals = vec![0u8; block.nvals() * out_size];
    if out_size > 0 {
        for (k, out) in vals.chunks_exact_mut(out_size).enumerate() {
            op.apply(block.value(k), out);
        }
    }
    Some(Arc::new(CooBlock::from_sorted(
        block.nrows(),
        block.ncols(),
        block.rows().to_vec(),
        block.cols().to_vec(),
        vals,
        out_size,
    )))
}

/// Vector tile of length `nrows` holding `value` at every row in `rows`
pub fn fill_rows(nrows: usize, rows: Vec<u32>, value: &[u8]) -> Option<Arc<CooBlock>> {
    if rows.is_empty() {
        return None;
    }
    let keys: Vec<u64> = rows.iter().map(|&r| pack_key(r, 0)).collect();
    let vals = value.repeat(rows.len());
    Some(Arc::new(from_packed(nrows, 1, &keys, vals, value.len())))
}

/// Fold all values of a tile with `op`
pub fn reduce_block(block: &CooBlock, op: &FunctionBinary) -> Option<Vec<u8>> {
    reduce_values(block.vals(), block.byte_size(), op)
}
