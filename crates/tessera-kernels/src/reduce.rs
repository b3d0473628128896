//! Reduce-by-key and whole-sequence reductions over packed values
//!
//! Values are packed element bytes of width `byte_size`. Combination always
//! runs left to right in encounter order (`acc = op(acc, next)`), so results
//! are deterministic for sorted inputs even when `op` is not commutative.

use tessera_core::FunctionBinary;

/// Combine adjacent entries with equal keys
///
/// # Arguments
///
/// * `keys` - Keys sorted so that equal keys are adjacent
/// * `values` - Packed values, `keys.len() * byte_size` bytes
/// * `byte_size` - Element width, `0` deduplicates keys only
/// * `op` - Associative combining function
///
/// # Returns
///
/// Unique keys with their combined values
pub fn reduce_by_key<K: PartialEq + Copy>(
    keys: &[K],
    values: &[u8],
    byte_size: usize,
    op: &FunctionBinary,
) -> (Vec<K>, Vec<u8>) {
    debug_assert_eq!(values.len(), keys.len() * byte_size);

    let mut out_keys: Vec<K> = Vec::with_capacity(keys.len());
    let mut out_vals: Vec<u8> = Vec::with_capacity(values.len());
    let mut scratch = vec![0u8; byte_size];

    for (k, &key) in keys.iter().enumerate() {
        let value = &values[k * byte_size..(k + 1) * byte_size];
        if out_keys.last() == Some(&key) {
            if byte_size > 0 {
                let start = out_vals.len() - byte_size;
                op.apply(&out_vals[start..], value, &mut scratch);
                out_vals[start..].copy_from_slice(&scratch);
            }
        } else {
            out_keys.push(key);
            out_vals.extend_from_slice(value);
        }
    }

    (out_keys, out_vals)
}

/// Fold every value of a packed buffer
///
/// Returns `None` for an empty buffer or a zero width.
pub fn reduce_values(values: &[u8], byte_size: usize, op: &FunctionBinary) -> Option<Vec<u8>> {
    if byte_size == 0 || values.is_empty() {
        return None;
    }
    let mut chunks = values.chunks_exact(byte_size);
    let mut acc = chunks.next()?.to_vec();
    let mut scratch = vec![0u8; byte_size];
    for value in chunks {
        op.apply(&acc, value, &mut scratch);
        acc.copy_from_slice(&scratch);
    }
    Some(acc)
}

/// Fold a sequence of optional partial results, skipping `None`
pub fn reduce_partials<I>(partials: I, op: &FunctionBinary) -> Option<Vec<u8>>
where
    I: IntoIterator<Item = Option<Vec<u8>>>,
{
    partials.into_iter().flatten().reduce(|acc, v| op.apply_owned(&acc, &v))
}
