//! Tile products over a `(mult, add)` semiring
//!
//! A block product expands every pair of matching entries into a partial
//! product, sorts the partials by output coordinate (stable, so ties keep
//! expansion order) and combines them with reduce-by-key using `add`.
//! Products of different inner tiles `k` are then folded together with
//! [`accumulate`], which merges two sorted tiles at a time with Merge Path.

use std::sync::Arc;

use tessera_core::block::pack_key;
use tessera_core::{CooBlock, FunctionBinary};

use crate::ewise::{ewise_add, from_packed};
use crate::reduce::reduce_by_key;

/// Sort `(key, value)` partials by key and combine equal keys with `add`
fn combine_partials(keys: Vec<u64>, vals: Vec<u8>, byte_size: usize, add: &FunctionBinary) -> (Vec<u64>, Vec<u8>) {
    let mut order: Vec<usize> = (0..keys.len()).collect();
    order.sort_by_key(|&k| keys[k]);

    let mut sorted_keys = Vec::with_capacity(keys.len());
    let mut sorted_vals = Vec::with_capacity(vals.len());
    for k in order {
        sorted_keys.push(keys[k]);
        sorted_vals.extend_from_slice(&vals[k * byte_size..(k + 1) * byte_size]);
    }
    reduce_by_key(&sorted_keys, &sorted_vals, byte_size, add)
}

/// `a (m x k) ⊕.⊗ b (k x n)` for a single pair of tiles
pub fn mxm_block(a: &CooBlock, b: &CooBlock, mult: &FunctionBinary, add: &FunctionBinary) -> Option<Arc<CooBlock>> {
    if a.is_empty() || b.is_empty() {
        return None;
    }
    let out_size = mult.type_r().byte_size();
    let b_offsets = b.row_offsets();

    let mut keys = Vec::new();
    let mut vals = Vec::new();
    let mut scratch = vec![0u8; out_size];
    for i in 0..a.nvals() {
        let (row, inner) = a.key(i);
        for j in b_offsets[inner as usize]..b_offsets[inner as usize + 1] {
            keys.push(pack_key(row, b.cols()[j]));
            if out_size > 0 {
                mult.apply(a.value(i), b.value(j), &mut scratch);
                vals.extend_from_slice(&scratch);
            }
        }
    }
    if keys.is_empty() {
        return None;
    }

    let (keys, vals) = combine_partials(keys, vals, out_size, add);
    Some(Arc::new(from_packed(a.nrows(), b.ncols(), &keys, vals, out_size)))
}

/// `v (k) ⊕.⊗ m (k x n)` for a vector tile and a matrix tile
pub fn vxm_block(v: &CooBlock, m: &CooBlock, mult: &FunctionBinary, add: &FunctionBinary) -> Option<Arc<CooBlock>> {
    if v.is_empty() || m.is_empty() {
        return None;
    }
    let out_size = mult.type_r().byte_size();
    let m_offsets = m.row_offsets();

    let mut keys = Vec::new();
    let mut vals = Vec::new();
    let mut scratch = vec![0u8; out_size];
    for i in 0..v.nvals() {
        let inner = v.rows()[i] as usize;
        for j in m_offsets[inner]..m_offsets[inner + 1] {
            keys.push(pack_key(m.cols()[j], 0));
            if out_size > 0 {
                mult.apply(v.value(i), m.value(j), &mut scratch);
                vals.extend_from_slice(&scratch);
            }
        }
    }
    if keys.is_empty() {
        return None;
    }

    let (keys, vals) = combine_partials(keys, vals, out_size, add);
    Some(Arc::new(from_packed(m.ncols(), 1, &keys, vals, out_size)))
}

/// `m (n x k) ⊕.⊗ v (k)` for a matrix tile and a vector tile
pub fn mxv_block(m: &CooBlock, v: &CooBlock, mult: &FunctionBinary, add: &FunctionBinary) -> Option<Arc<CooBlock>> {
    if m.is_empty() || v.is_empty() {
        return None;
    }
    let out_size = mult.type_r().byte_size();

    // position of every present vector row
    let mut lookup = vec![usize::MAX; v.nrows()];
    for (k, &r) in v.rows().iter().enumerate() {
        lookup[r as usize] = k;
    }

    let mut keys = Vec::new();
    let mut vals = Vec::new();
    let mut scratch = vec![0u8; out_size];
    for i in 0..m.nvals() {
        let (row, col) = m.key(i);
        let k = lookup[col as usize];
        if k == usize::MAX {
            continue;
        }
        keys.push(pack_key(row, 0));
        if out_size > 0 {
            mult.apply(m.value(i), v.value(k), &mut scratch);
            vals.extend_from_slice(&scratch);
        }
    }
    if keys.is_empty() {
        return None;
    }

    // rows are generated in ascending order already
    let (keys, vals) = reduce_by_key(&keys, &vals, out_size, add);
    Some(Arc::new(from_packed(m.nrows(), 1, &keys, vals, out_size)))
}

/// Fold partial product tiles of one output coordinate with `add`
///
/// Tiles are merged pairwise in a balanced tree so the work per level stays
/// linear; the order of `partials` decides tie order.
pub fn accumulate(mut partials: Vec<Arc<CooBlock>>, add: &FunctionBinary) -> Option<Arc<CooBlock>> {
    partials.retain(|p| !p.is_empty());
    while partials.len() > 1 {
        let mut next = Vec::with_capacity(partials.len().div_ceil(2));
        for pair in partials.chunks(2) {
            match pair {
                [x, y] => {
                    if let Some(sum) = ewise_add(Some(x), Some(y), add) {
                        next.push(sum);
                    }
                }
                [x] => next.push(Arc::clone(x)),
                _ => {}
            }
        }
        partials = next;
    }
    partials.pop()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::types::{values_as, values_to_bytes};
    use tessera_core::Type;

    fn semiring() -> (FunctionBinary, FunctionBinary) {
        (
            FunctionBinary::mult::<i32>(Type::i32()),
            FunctionBinary::plus::<i32>(Type::i32()),
        )
    }

    #[test]
    fn test_mxm_block() {
        // a = [[1, 2], [0, 3]], b = [[4, 0], [5, 6]]
        let a = CooBlock::new(2, 2, vec![0, 0, 1], vec![0, 1, 1], values_to_bytes(&[1i32, 2, 3]), 4).unwrap();
        let b = CooBlock::new(2, 2, vec![0, 1, 1], vec![0, 0, 1], values_to_bytes(&[4i32, 5, 6]), 4).unwrap();
        let (mult, add) = semiring();
        let c = mxm_block(&a, &b, &mult, &add).unwrap();
        // [[14, 12], [15, 18]]
        assert_eq!(c.rows(), &[0, 0, 1, 1]);
        assert_eq!(c.cols(), &[0, 1, 0, 1]);
        assert_eq!(values_as::<i32>(c.vals()), Some(vec![14, 12, 15, 18]));
    }

    #[test]
    fn test_mxm_block_no_overlap() {
        let a = CooBlock::new(2, 2, vec![0], vec![0], values_to_bytes(&[1i32]), 4).unwrap();
        let b = CooBlock::new(2, 2, vec![1], vec![1], values_to_bytes(&[1i32]), 4).unwrap();
        let (mult, add) = semiring();
        assert!(mxm_block(&a, &b, &mult, &add).is_none());
    }

    #[test]
    fn test_vxm_block() {
        // v = [2, 3], m = [[1, 0, 4], [5, 0, 0]]
        let v = CooBlock::vector(2, vec![0, 1], values_to_bytes(&[2i32, 3]), 4);
        let m = CooBlock::new(2, 3, vec![0, 0, 1], vec![0, 2, 0], values_to_bytes(&[1i32, 4, 5]), 4).unwrap();
        let (mult, add) = semiring();
        let w = vxm_block(&v, &m, &mult, &add).unwrap();
        assert_eq!(w.nrows(), 3);
        assert_eq!(w.rows(), &[0, 2]);
        assert_eq!(values_as::<i32>(w.vals()), Some(vec![17, 8]));
    }

    #[test]
    fn test_mxv_block() {
        let m = CooBlock::new(2, 3, vec![0, 0, 1], vec![0, 2, 1], values_to_bytes(&[1i32, 4, 5]), 4).unwrap();
        let v = CooBlock::vector(3, vec![0, 2], values_to_bytes(&[2i32, 3]), 4);
        let (mult, add) = semiring();
        let w = mxv_block(&m, &v, &mult, &add).unwrap();
        assert_eq!(w.rows(), &[0]);
        assert_eq!(values_as::<i32>(w.vals()), Some(vec![14]));
    }

    #[test]
    fn test_accumulate_tree() {
        let add = FunctionBinary::plus::<i32>(Type::i32());
        let parts: Vec<Arc<CooBlock>> = (0..5)
            .map(|k| Arc::new(CooBlock::vector(4, vec![k % 2, 3], values_to_bytes(&[1i32, 10]), 4)))
            .collect();
        let sum = accumulate(parts, &add).unwrap();
        assert_eq!(sum.rows(), &[0, 1, 3]);
        assert_eq!(values_as::<i32>(sum.vals()), Some(vec![3, 2, 50]));
        assert!(accumulate(Vec::new(), &add).is_none());
    }
}
