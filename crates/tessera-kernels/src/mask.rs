//! Structural masks over output tiles
//!
//! A mask selects which coordinates of a result may be written. Only the
//! mask's structure matters, never its values. With `complement` the mask
//! selects every coordinate it does *not* contain.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use tessera_core::CooBlock;
//! use tessera_kernels::mask::TileMask;
//!
//! let result = Arc::new(CooBlock::new(2, 2, vec![0, 1], vec![0, 1], vec![], 0).unwrap());
//! let mask = CooBlock::new(2, 2, vec![1], vec![1], vec![], 0).unwrap();
//!
//! let kept = TileMask::structural(Some(&mask), false).apply(result.clone()).unwrap();
//! assert_eq!(kept.rows(), &[1]);
//!
//! let kept = TileMask::structural(Some(&mask), true).apply(result).unwrap();
//! assert_eq!(kept.rows(), &[0]);
//! ```

use std::sync::Arc;

use tessera_core::CooBlock;

use crate::merge_path::{default_parts, difference, intersect};

/// Mask state for one output tile
#[derive(Debug, Clone, Copy)]
pub enum TileMask<'a> {
    /// The operation has no mask
    Unmasked,
    /// Mask tile at the output coordinate, `None` when that tile is empty
    Structural {
        block: Option<&'a CooBlock>,
        complement: bool,
    },
}

impl<'a> TileMask<'a> {
    pub fn structural(block: Option<&'a CooBlock>, complement: bool) -> Self {
        TileMask::Structural { block, complement }
    }

    /// Build from an optional mask operand
    pub fn from_operand(has_mask: bool, block: Option<&'a CooBlock>, complement: bool) -> Self {
        if has_mask {
            Self::structural(block, complement)
        } else {
            TileMask::Unmasked
        }
    }

    /// Every coordinate of the tile is selected
    pub fn selects_all(&self) -> bool {
        matches!(
            self,
            TileMask::Unmasked
                | TileMask::Structural {
                    block: None,
                    complement: true
                }
        )
    }

    /// No coordinate of the tile is selected, so the result tile is empty
    pub fn selects_none(&self) -> bool {
        matches!(
            self,
            TileMask::Structural {
                block: None,
                complement: false
            }
        )
    }

    /// Restrict `block` to the selected coordinates
    ///
    /// Returns `None` if nothing survives.
    pub fn apply(&self, block: Arc<CooBlock>) -> Option<Arc<CooBlock>> {
        if block.is_empty() || self.selects_none() {
            return None;
        }
        let (mask, complement) = match *self {
            TileMask::Structural {
                block: Some(mask),
                complement,
            } => (mask, complement),
            _ => return Some(block),
        };

        let keys = block.packed_keys();
        let mask_keys = mask.packed_keys();
        let parts = default_parts(keys.len() + mask_keys.len());
        let keep: Vec<usize> = if complement {
            difference(&keys, &mask_keys, parts)
        } else {
            intersect(&keys, &mask_keys, parts)
                .into_iter()
                .map(|(i, _)| i)
                .collect()
        };

        if keep.len() == block.nvals() {
            return Some(block);
        }
        let kept = gather(&block, &keep);
        (!kept.is_empty()).then(|| Arc::new(kept))
    }

    /// Local rows of a vector tile of length `nrows` that are selected
    pub fn selected_rows(&self, nrows: usize) -> Vec<u32> {
        match *self {
            TileMask::Structural {
                block: Some(mask),
                complement: false,
            } => mask.rows().to_vec(),
            TileMask::Structural {
                block: Some(mask),
                complement: true,
            } => {
                let mut present = vec![false; nrows];
                for &r in mask.rows() {
                    present[r as usize] = true;
                }
                (0..nrows as u32).filter(|&r| !present[r as usize]).collect()
            }
            TileMask::Structural {
                block: None,
                complement: false,
            } => Vec::new(),
            _ => (0..nrows as u32).collect(),
        }
    }
}

/// New block holding the entries at `indices` (ascending) of `block`
pub fn gather(block: &CooBlock, indices: &[usize]) -> CooBlock {
    let bs = block.byte_size();
    let mut rows = Vec::with_capacity(indices.len());
    let mut cols = Vec::with_capacity(indices.len());
    let mut vals = Vec::with_capacity(indices.len() * bs);
    for &k in indices {
        rows.push(block.rows()[k]);
        cols.push(block.cols()[k]);
        vals.extend_from_slice(block.value(k));
    }
    CooBlock::from_sorted(block.nrows(), block.ncols(), rows, cols, vals, bs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::types::{values_as, values_to_bytes};

    fn tile() -> Arc<CooBlock> {
        Arc::new(
            CooBlock::new(
                3,
                3,
                vec![0, 1, 1, 2],
                vec![2, 0, 1, 2],
                values_to_bytes(&[1i32, 2, 3, 4]),
                4,
            )
            .unwrap(),
        )
    }

    fn mask() -> CooBlock {
        CooBlock::new(3, 3, vec![1, 2, 2], vec![1, 0, 2], vec![], 0).unwrap()
    }

    #[test]
    fn test_unmasked_keeps_block() {
        let block = tile();
        let out = TileMask::Unmasked.apply(block.clone()).unwrap();
        assert!(Arc::ptr_eq(&block, &out));
    }

    #[test]
    fn test_intersection_mask() {
        let m = mask();
        let out = TileMask::structural(Some(&m), false).apply(tile()).unwrap();
        assert_eq!(out.rows(), &[1, 2]);
        assert_eq!(out.cols(), &[1, 2]);
        assert_eq!(values_as::<i32>(out.vals()), Some(vec![3, 4]));
    }

    #[test]
    fn test_complement_mask() {
        let m = mask();
        let out = TileMask::structural(Some(&m), true).apply(tile()).unwrap();
        assert_eq!(values_as::<i32>(out.vals()), Some(vec![1, 2]));
    }

    #[test]
    fn test_absent_mask_tile() {
        assert!(TileMask::structural(None, false).apply(tile()).is_none());
        assert_eq!(TileMask::structural(None, true).apply(tile()).unwrap().nvals(), 4);
    }

    #[test]
    fn test_selected_rows() {
        let m = CooBlock::vector(4, vec![1, 3], vec![], 0);
        assert_eq!(TileMask::structural(Some(&m), false).selected_rows(4), vec![1, 3]);
        assert_eq!(TileMask::structural(Some(&m), true).selected_rows(4), vec![0, 2]);
        assert_eq!(TileMask::Unmasked.selected_rows(2), vec![0, 1]);
        assert!(TileMask::structural(None, false).selected_rows(3).is_empty());
    }
}
