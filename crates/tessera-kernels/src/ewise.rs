//! Element-wise tile operations
//!
//! `ewise_add` is a set union of the two tiles: a stable Merge Path merge of
//! the packed keys followed by reduce-by-key with the operator, so a shared
//! coordinate becomes `op(a, b)`. `ewise_mult` is the set intersection.
//! Both return `None` for an empty result so callers never store empty tiles.

use std::sync::Arc;

use tessera_core::{CooBlock, FunctionBinary};

use crate::merge_path::{default_parts, intersect, merge, Source};
use crate::reduce::reduce_by_key;
use tessera_core::block::unpack_key;

/// Union of two tiles combining shared coordinates with `op`
///
/// If one side is absent the other is returned as is.
pub fn ewise_add(
    a: Option<&Arc<CooBlock>>,
    b: Option<&Arc<CooBlock>>,
    op: &FunctionBinary,
) -> Option<Arc<CooBlock>> {
    let (a, b) = match (a, b) {
        (None, None) => return None,
        (Some(x), None) | (None, Some(x)) => {
            return (!x.is_empty()).then(|| Arc::clone(x));
        }
        (Some(a), Some(b)) => (a, b),
    };
    if a.is_empty() {
        return (!b.is_empty()).then(|| Arc::clone(b));
    }
    if b.is_empty() {
        return Some(Arc::clone(a));
    }

    let byte_size = a.byte_size();
    let a_keys = a.packed_keys();
    let b_keys = b.packed_keys();
    let merged = merge(&a_keys, &b_keys, default_parts(a_keys.len() + b_keys.len()));

    let mut keys = Vec::with_capacity(merged.len());
    let mut vals = Vec::with_capacity(merged.len() * byte_size);
    for (key, source) in merged {
        keys.push(key);
        match source {
            Source::A(i) => vals.extend_from_slice(a.value(i)),
            Source::B(j) => vals.extend_from_slice(b.value(j)),
        }
    }

    let (keys, vals) = reduce_by_key(&keys, &vals, byte_size, op);
    Some(Arc::new(from_packed(a.nrows(), a.ncols(), &keys, vals, byte_size)))
}

/// Intersection of two tiles, values `op(a, b)`
pub fn ewise_mult(
    a: Option<&Arc<CooBlock>>,
    b: Option<&Arc<CooBlock>>,
    op: &FunctionBinary,
) -> Option<Arc<CooBlock>> {
    let (a, b) = match (a, b) {
        (Some(a), Some(b)) if !a.is_empty() && !b.is_empty() => (a, b),
        _ => return None,
    };

    let out_size = op.type_r().byte_size();
    let a_keys = a.packed_keys();
    let b_keys = b.packed_keys();
    let pairs = intersect(&a_keys, &b_keys, default_parts(a_keys.len() + b_keys.len()));
    if pairs.is_empty() {
        return None;
    }

    let mut keys = Vec::with_capacity(pairs.len());
    let mut vals = vec![0u8; pairs.len() * out_size];
    for (n, &(i, j)) in pairs.iter().enumerate() {
        keys.push(a_keys[i]);
        if out_size > 0 {
            op.apply(a.value(i), b.value(j), &mut vals[n * out_size..(n + 1) * out_size]);
        }
    }
    Some(Arc::new(from_packed(a.nrows(), a.ncols(), &keys, vals, out_size)))
}

/// Block from sorted unique packed keys
pub fn from_packed(nrows: usize, ncols: usize, keys: &[u64], vals: Vec<u8>, byte_size: usize) -> CooBlock {
    let (rows, cols): (Vec<u32>, Vec<u32>) = keys.iter().map(|&k| unpack_key(k)).unzip();
    CooBlock::from_sorted(nrows, ncols, rows, cols, vals, byte_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::types::{values_as, values_to_bytes};
    use tessera_core::Type;

    fn block(rows: Vec<u32>, cols: Vec<u32>, vals: &[f32]) -> Arc<CooBlock> {
        Arc::new(CooBlock::new(4, 4, rows, cols, values_to_bytes(vals), 4).unwrap())
    }

    #[test]
    fn test_add_union_sums_shared() {
        let a = block(vec![0, 1, 3], vec![0, 2, 3], &[1.0, 2.0, 3.0]);
        let b = block(vec![0, 2, 3], vec![0, 2, 3], &[10.0, 20.0, 30.0]);
        let plus = FunctionBinary::plus::<f32>(Type::f32());
        let c = ewise_add(Some(&a), Some(&b), &plus).unwrap();
        assert_eq!(c.rows(), &[0, 1, 2, 3]);
        assert_eq!(c.cols(), &[0, 2, 2, 3]);
        assert_eq!(values_as::<f32>(c.vals()), Some(vec![11.0, 2.0, 20.0, 33.0]));
    }

    #[test]
    fn test_add_one_side_shares_block() {
        let a = block(vec![1], vec![1], &[5.0]);
        let plus = FunctionBinary::plus::<f32>(Type::f32());
        let c = ewise_add(Some(&a), None, &plus).unwrap();
        assert!(Arc::ptr_eq(&a, &c));
        assert!(ewise_add(None, None, &plus).is_none());
    }

    #[test]
    fn test_add_is_ordered_by_encounter() {
        let a = block(vec![2], vec![2], &[1.0]);
        let b = block(vec![2], vec![2], &[9.0]);
        let c = ewise_add(Some(&a), Some(&b), &FunctionBinary::first(Type::f32())).unwrap();
        assert_eq!(values_as::<f32>(c.vals()), Some(vec![1.0]));
    }

    #[test]
    fn test_mult_intersection() {
        let a = block(vec![0, 1, 3], vec![0, 2, 3], &[2.0, 3.0, 4.0]);
        let b = block(vec![1, 3], vec![2, 3], &[10.0, 0.5]);
        let mult = FunctionBinary::mult::<f32>(Type::f32());
        let c = ewise_mult(Some(&a), Some(&b), &mult).unwrap();
        assert_eq!(c.rows(), &[1, 3]);
        assert_eq!(values_as::<f32>(c.vals()), Some(vec![30.0, 2.0]));
    }

    #[test]
    fn test_mult_disjoint_is_empty() {
        let a = block(vec![0], vec![0], &[1.0]);
        let b = block(vec![1], vec![1], &[1.0]);
        let mult = FunctionBinary::mult::<f32>(Type::f32());
        assert!(ewise_mult(Some(&a), Some(&b), &mult).is_none());
        assert!(ewise_mult(Some(&a), None, &mult).is_none());
    }
}
