//! COO (coordinate list) tiles
//!
//! A [`CooBlock`] is one immutable tile of a matrix or vector: local row and
//! column indices sorted by `(row, col)` and unique, plus a packed value
//! buffer of `nvals * byte_size` bytes. Vector tiles are single-column
//! tiles whose column indices are all zero.
//!
//! Blocks are never mutated after construction. Producing tasks build a new
//! block and replace the old one in the owning storage.
//!
//! # Examples
//!
//! ```
//! use tessera_core::block::CooBlock;
//! use tessera_core::types::values_to_bytes;
//!
//! let block = CooBlock::new(2, 2, vec![0, 1], vec![1, 0], values_to_bytes(&[1.0f32, 2.0]), 4).unwrap();
//! assert_eq!(block.nvals(), 2);
//! assert_eq!(block.key(1), (1, 0));
//! ```

use crate::error::{TesseraError, TesseraResult};

/// Storage format of a block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
pub enum Format {
    /// Sorted coordinate list
    Coo,
}

/// Policy for repeated coordinates in unsorted input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Duplicates {
    /// Keep the earliest occurrence in input order
    KeepFirst,
    /// Input is known to be duplicate free
    Trusted,
}

/// Pack a `(row, col)` key into one comparable integer
#[inline]
pub fn pack_key(row: u32, col: u32) -> u64 {
    ((row as u64) << 32) | col as u64
}

/// Inverse of [`pack_key`]
#[inline]
pub fn unpack_key(key: u64) -> (u32, u32) {
    ((key >> 32) as u32, key as u32)
}

/// Immutable sorted COO tile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CooBlock {
    nrows: usize,
    ncols: usize,
    rows: Vec<u32>,
    cols: Vec<u32>,
    vals: Vec<u8>,
    byte_size: usize,
}

impl CooBlock {
    /// Create a validated block
    ///
    /// # Arguments
    ///
    /// * `nrows`, `ncols` - Tile shape
    /// * `rows`, `cols` - Local indices, sorted by `(row, col)` and unique
    /// * `vals` - Packed values, `rows.len() * byte_size` bytes
    /// * `byte_size` - Element width, `0` for structure-only tiles
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if lengths disagree, an index is out of the tile or
    /// the indices are unsorted or repeated.
    pub fn new(
        nrows: usize,
        ncols: usize,
        rows: Vec<u32>,
        cols: Vec<u32>,
        vals: Vec<u8>,
        byte_size: usize,
    ) -> TesseraResult<Self> {
        let block = Self {
            nrows,
            ncols,
            rows,
            cols,
            vals,
            byte_size,
        };
        block.validate()?;
        Ok(block)
    }

    /// Create a block from parts already known to satisfy the invariants.
    ///
    /// Kernels produce sorted unique output by construction; the check only
    /// runs in debug builds.
    pub fn from_sorted(
        nrows: usize,
        ncols: usize,
        rows: Vec<u32>,
        cols: Vec<u32>,
        vals: Vec<u8>,
        byte_size: usize,
    ) -> Self {
        let block = Self {
            nrows,
            ncols,
            rows,
            cols,
            vals,
            byte_size,
        };
        debug_assert!(block.validate().is_ok(), "{:?}", block.validate());
        block
    }

    /// Vector tile from sorted unique rows
    pub fn vector(nrows: usize, rows: Vec<u32>, vals: Vec<u8>, byte_size: usize) -> Self {
        let cols = vec![0; rows.len()];
        Self::from_sorted(nrows, 1, rows, cols, vals, byte_size)
    }

    /// Build a block from unsorted local entries
    ///
    /// Sorting is stable, so with [`Duplicates::KeepFirst`] the entry that
    /// appears first in `entries` wins.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if lengths disagree or an index is out of the tile.
    pub fn from_unsorted(
        nrows: usize,
        ncols: usize,
        entries: &[(u32, u32)],
        vals: &[u8],
        byte_size: usize,
        sorted: bool,
        duplicates: Duplicates,
    ) -> TesseraResult<Self> {
        if vals.len() != entries.len() * byte_size {
            return Err(TesseraError::invalid_argument(format!(
                "{} entries but {} value bytes for element width {}",
                entries.len(),
                vals.len(),
                byte_size
            )));
        }

        let mut order: Vec<usize> = (0..entries.len()).collect();
        if !sorted {
            order.sort_by_key(|&k| entries[k]);
        }

        let mut rows = Vec::with_capacity(entries.len());
        let mut cols = Vec::with_capacity(entries.len());
        let mut out = Vec::with_capacity(vals.len());
        let mut last: Option<(u32, u32)> = None;
        for k in order {
            let (r, c) = entries[k];
            if (r as usize) >= nrows || (c as usize) >= ncols {
                return Err(TesseraError::invalid_argument(format!(
                    "entry ({r}, {c}) outside {nrows}x{ncols} tile"
                )));
            }
            if duplicates == Duplicates::KeepFirst && last == Some((r, c)) {
                continue;
            }
            last = Some((r, c));
            rows.push(r);
            cols.push(c);
            out.extend_from_slice(&vals[k * byte_size..(k + 1) * byte_size]);
        }

        Self::new(nrows, ncols, rows, cols, out, byte_size)
    }

    fn validate(&self) -> TesseraResult<()> {
        if self.rows.len() != self.cols.len() {
            return Err(TesseraError::invalid_argument(format!(
                "{} row indices but {} column indices",
                self.rows.len(),
                self.cols.len()
            )));
        }
        if self.vals.len() != self.rows.len() * self.byte_size {
            return Err(TesseraError::invalid_argument(format!(
                "{} entries need {} value bytes, got {}",
                self.rows.len(),
                self.rows.len() * self.byte_size,
                self.vals.len()
            )));
        }
        for k in 0..self.rows.len() {
            let (r, c) = self.key(k);
            if r as usize >= self.nrows || c as usize >= self.ncols {
                return Err(TesseraError::invalid_argument(format!(
                    "entry ({r}, {c}) outside {}x{} tile",
                    self.nrows, self.ncols
                )));
            }
            if k > 0 && self.key(k - 1) >= (r, c) {
                return Err(TesseraError::invalid_argument(format!(
                    "indices unsorted or repeated at position {k}"
                )));
            }
        }
        Ok(())
    }

    pub fn format(&self) -> Format {
        Format::Coo
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.nrows, self.ncols)
    }

    /// Number of stored entries
    pub fn nvals(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn byte_size(&self) -> usize {
        self.byte_size
    }

    pub fn rows(&self) -> &[u32] {
        &self.rows
    }

    pub fn cols(&self) -> &[u32] {
        &self.cols
    }

    pub fn vals(&self) -> &[u8] {
        &self.vals
    }

    /// Local `(row, col)` of entry `k`
    #[inline]
    pub fn key(&self, k: usize) -> (u32, u32) {
        (self.rows[k], self.cols[k])
    }

    /// Value bytes of entry `k` (empty for structure-only tiles)
    #[inline]
    pub fn value(&self, k: usize) -> &[u8] {
        &self.vals[k * self.byte_size..(k + 1) * self.byte_size]
    }

    /// Packed keys, see [`pack_key`]
    pub fn packed_keys(&self) -> Vec<u64> {
        self.rows
            .iter()
            .zip(&self.cols)
            .map(|(&r, &c)| pack_key(r, c))
            .collect()
    }

    /// Offsets of every row in the entry arrays, `nrows + 1` long
    pub fn row_offsets(&self) -> Vec<usize> {
        let mut offsets = vec![0usize; self.nrows + 1];
        for &r in &self.rows {
            offsets[r as usize + 1] += 1;
        }
        for i in 0..self.nrows {
            offsets[i + 1] += offsets[i];
        }
        offsets
    }

    /// Consume into `(rows, cols, vals)`
    pub fn into_parts(self) -> (Vec<u32>, Vec<u32>, Vec<u8>) {
        (self.rows, self.cols, self.vals)
    }
}
