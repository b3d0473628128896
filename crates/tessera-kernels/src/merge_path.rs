//! Balanced-path (Merge Path) partitioning of two sorted sequences
//!
//! Merging sorted `a` (length `m`) and `b` (length `n`) is a monotone path
//! through an `m x n` grid. Cutting that path at the cross diagonals
//! `i + j = k * (m + n) / P` yields `P` slices of equal work; each split
//! point is found by a binary search of `O(log(m + n))`. Every worker then
//! merges its own slice with no shared mutable state and the slices are
//! concatenated in order.
//!
//! Ties are resolved in favour of `a`: for equal keys the element of `a`
//! comes first, so the merged sequence is stable and deterministic.
//!
//! # Features
//!
//! - [`split_point`] / [`partition`]: the split points themselves
//! - [`merge`]: stable merge keeping every element with its origin
//! - [`intersect`]: matching index pairs
//! - [`difference`]: elements of `a` that do not occur in `b`
//!
//! With the `parallel` feature the slices run on the scirs2-core thread pool;
//! inputs shorter than [`PARALLEL_THRESHOLD`] always run in one slice.
//!
//! # Example
//!
//! ```
//! use tessera_kernels::merge_path::{merge, Source};
//!
//! let merged = merge(&[1, 3, 5], &[2, 3], 2);
//! let keys: Vec<_> = merged.iter().map(|(k, _)| *k).collect();
//! assert_eq!(keys, vec![1, 2, 3, 3, 5]);
//! assert_eq!(merged[2].1, Source::A(1));
//! assert_eq!(merged[3].1, Source::B(1));
//! ```

#[cfg(feature = "parallel")]
use scirs2_core::parallel_ops::*;

/// Combined input length below which merging stays in one slice
pub const PARALLEL_THRESHOLD: usize = 16_384;

/// Origin of an element in a merged sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Index into the first input
    A(usize),
    /// Index into the second input
    B(usize),
}

/// Split point `(i, j)` with `i + j == diag` on the merge path of `a` and `b`
///
/// `a[..i]` and `b[..j]` are exactly the first `diag` elements of the stable
/// merge.
pub fn split_point<K: Ord>(a: &[K], b: &[K], diag: usize) -> (usize, usize) {
    let (m, n) = (a.len(), b.len());
    debug_assert!(diag <= m + n);

    let mut lo = diag.saturating_sub(n);
    let mut hi = diag.min(m);
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        // a[mid] precedes b[diag - mid - 1]: the split takes more of `a`
        if a[mid] <= b[diag - mid - 1] {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    (lo, diag - lo)
}

/// `parts + 1` monotone split points from `(0, 0)` to `(m, n)`
///
/// A split never separates an element of `a` from an equal element of `b`,
/// so set operations can run slice-locally. Inputs must be free of
/// duplicates within each sequence for that guarantee to hold.
pub fn partition<K: Ord>(a: &[K], b: &[K], parts: usize) -> Vec<(usize, usize)> {
    let parts = parts.max(1);
    let total = a.len() + b.len();
    let mut points = Vec::with_capacity(parts + 1);
    points.push((0, 0));
    for k in 1..parts {
        let diag = k * total / parts;
        let (i, j) = split_point(a, b, diag);
        // keep an equal pair a[i - 1] == b[j] in the same slice
        let straddles = i > 0 && j < b.len() && a[i - 1] == b[j];
        let point = if straddles && (i == a.len() || a[i] > b[j]) {
            (i, j + 1)
        } else {
            (i, j)
        };
        points.push(point);
    }
    points.push((a.len(), b.len()));
    points
}

/// Number of slices used for inputs of combined length `total`
pub fn default_parts(total: usize) -> usize {
    if total < PARALLEL_THRESHOLD {
        return 1;
    }
    let threads = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    threads.min(total / (PARALLEL_THRESHOLD / 4)).max(1)
}

fn run_slices<T, F>(points: &[(usize, usize)], work: F) -> Vec<T>
where
    T: Send,
    F: Fn((usize, usize), (usize, usize)) -> Vec<T> + Sync + Send,
{
    let slices = points.len().saturating_sub(1);

    #[cfg(feature = "parallel")]
    {
        if slices > 1 {
            tracing::trace!(slices, "parallel merge path");
            let pieces: Vec<Vec<T>> = (0..slices)
                .into_par_iter()
                .map(|k| work(points[k], points[k + 1]))
                .collect();
            return pieces.into_iter().flatten().collect();
        }
    }

    (0..slices)
        .flat_map(|k| work(points[k], points[k + 1]))
        .collect()
}

/// Stable merge of `a` and `b` over `parts` slices
pub fn merge<K>(a: &[K], b: &[K], parts: usize) -> Vec<(K, Source)>
where
    K: Ord + Copy + Send + Sync,
{
    let points = partition(a, b, parts);
    run_slices(&points, |(i0, j0), (i1, j1)| {
        let mut out = Vec::with_capacity((i1 - i0) + (j1 - j0));
        let (mut i, mut j) = (i0, j0);
        while i < i1 && j < j1 {
            if a[i] <= b[j] {
                out.push((a[i], Source::A(i)));
                i += 1;
            } else {
                out.push((b[j], Source::B(j)));
                j += 1;
            }
        }
        out.extend((i..i1).map(|i| (a[i], Source::A(i))));
        out.extend((j..j1).map(|j| (b[j], Source::B(j))));
        out
    })
}

/// Index pairs `(i, j)` with `a[i] == b[j]`, in key order
pub fn intersect<K>(a: &[K], b: &[K], parts: usize) -> Vec<(usize, usize)>
where
    K: Ord + Copy + Send + Sync,
{
    let points = partition(a, b, parts);
    run_slices(&points, |(i0, j0), (i1, j1)| {
        let mut out = Vec::new();
        let (mut i, mut j) = (i0, j0);
        while i < i1 && j < j1 {
            match a[i].cmp(&b[j]) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    out.push((i, j));
                    i += 1;
                    j += 1;
                }
            }
        }
        out
    })
}

/// Indices `i` of `a` whose key does not occur in `b`, in key order
pub fn difference<K>(a: &[K], b: &[K], parts: usize) -> Vec<usize>
where
    K: Ord + Copy + Send + Sync,
{
    let points = partition(a, b, parts);
    run_slices(&points, |(i0, j0), (i1, j1)| {
        let mut out = Vec::new();
        let (mut i, mut j) = (i0, j0);
        while i < i1 {
            if j < j1 && b[j] < a[i] {
                j += 1;
            } else if j < j1 && b[j] == a[i] {
                i += 1;
                j += 1;
            } else {
                out.push(i);
                i += 1;
            }
        }
        out
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn naive_merge(a: &[u32], b: &[u32]) -> Vec<u32> {
        let mut out: Vec<u32> = a.iter().chain(b).copied().collect();
        out.sort();
        out
    }

    #[test]
    fn test_split_point_extremes() {
        let a = [1, 2, 3];
        let b = [4, 5];
        assert_eq!(split_point(&a, &b, 0), (0, 0));
        assert_eq!(split_point(&a, &b, 3), (3, 0));
        assert_eq!(split_point(&a, &b, 5), (3, 2));
        assert_eq!(split_point(&b, &a, 3), (0, 3));
    }

    #[test]
    fn test_partition_is_monotone() {
        let a: Vec<u32> = (0..100).map(|x| x * 2).collect();
        let b: Vec<u32> = (0..80).map(|x| x * 3).collect();
        let points = partition(&a, &b, 7);
        assert_eq!(points.len(), 8);
        assert_eq!(points[0], (0, 0));
        assert_eq!(points[7], (100, 80));
        for w in points.windows(2) {
            assert!(w[0].0 <= w[1].0 && w[0].1 <= w[1].1);
        }
    }

    #[test]
    fn test_partition_keeps_equal_pairs_together() {
        let a = [0u32, 2, 4, 6];
        let b = [1u32, 2, 3, 6];
        for parts in 1..8 {
            for w in partition(&a, &b, parts).windows(2) {
                let ((i0, j0), (i1, j1)) = (w[0], w[1]);
                for i in i0..i1 {
                    if let Some(j) = b.iter().position(|&x| x == a[i]) {
                        assert!(j0 <= j && j < j1, "pair split with {parts} parts");
                    }
                }
            }
        }
    }

    #[test]
    fn test_merge_matches_sort() {
        let a = [1u32, 4, 4, 9, 12];
        let b = [0u32, 4, 5, 12, 13, 20];
        for parts in 1..6 {
            let keys: Vec<u32> = merge(&a, &b, parts).into_iter().map(|(k, _)| k).collect();
            assert_eq!(keys, naive_merge(&a, &b));
        }
    }

    #[test]
    fn test_merge_empty_sides() {
        let a = [1u32, 2];
        assert_eq!(merge(&a, &[], 3).len(), 2);
        assert_eq!(merge(&[], &a, 3)[1], (2, Source::B(1)));
        assert!(merge::<u32>(&[], &[], 4).is_empty());
    }

    #[test]
    fn test_intersect_and_difference() {
        let a = [1u32, 3, 5, 7, 9];
        let b = [0u32, 3, 4, 9, 10];
        for parts in 1..5 {
            assert_eq!(intersect(&a, &b, parts), vec![(1, 1), (4, 3)]);
            assert_eq!(difference(&a, &b, parts), vec![0, 2, 3]);
        }
    }

    #[test]
    fn test_default_parts_small_inputs() {
        assert_eq!(default_parts(0), 1);
        assert_eq!(default_parts(PARALLEL_THRESHOLD - 1), 1);
        assert!(default_parts(PARALLEL_THRESHOLD * 16) >= 1);
    }
}
