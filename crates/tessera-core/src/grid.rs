//! Block grid geometry
//!
//! A logical `rows x cols` matrix is split into square tiles of
//! `block_size`. The grid has `ceil(rows / block_size) x ceil(cols / block_size)`
//! coordinates; tiles on the last block row/column may be smaller.
//! Vectors use the same geometry with a single block column.
//!
//! # Example
//!
//! ```
//! use tessera_core::grid::{BlockGrid, BlockIndex};
//!
//! let grid = BlockGrid::new(5, 6, 2).unwrap();
//! assert_eq!(grid.block_rows(), 3);
//! assert_eq!(grid.block_cols(), 3);
//! assert_eq!(grid.block_shape(BlockIndex::new(2, 0)), (1, 2));
//! ```

use std::fmt;

use crate::error::{TesseraError, TesseraResult};

/// Coordinate of a tile in the block grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BlockIndex {
    pub row: u32,
    pub col: u32,
}

impl BlockIndex {
    pub const fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }

    /// Tile coordinate of a vector block
    pub const fn vector(row: u32) -> Self {
        Self { row, col: 0 }
    }

    /// Mirror coordinate `(col, row)`
    pub const fn transposed(self) -> Self {
        Self {
            row: self.col,
            col: self.row,
        }
    }
}

impl fmt::Display for BlockIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

/// Tiling of a `rows x cols` index space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockGrid {
    rows: usize,
    cols: usize,
    block_size: usize,
    block_rows: usize,
    block_cols: usize,
}

impl BlockGrid {
    /// Create a grid for a `rows x cols` space
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if any dimension or the block size is zero, or if a
    /// dimension does not fit into 32-bit indices.
    pub fn new(rows: usize, cols: usize, block_size: usize) -> TesseraResult<Self> {
        if rows == 0 || cols == 0 {
            return Err(TesseraError::invalid_argument(format!(
                "dimensions must be positive, got {rows}x{cols}"
            )));
        }
        if block_size == 0 {
            return Err(TesseraError::invalid_argument("block size cannot be zero"));
        }
        if rows > u32::MAX as usize || cols > u32::MAX as usize {
            return Err(TesseraError::invalid_argument(format!(
                "dimensions {rows}x{cols} exceed 32-bit index space"
            )));
        }

        Ok(Self {
            rows,
            cols,
            block_size,
            block_rows: rows.div_ceil(block_size),
            block_cols: cols.div_ceil(block_size),
        })
    }

    /// Grid of a vector of length `n`
    pub fn vector(n: usize, block_size: usize) -> TesseraResult<Self> {
        Self::new(n, 1, block_size)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Number of tile rows
    pub fn block_rows(&self) -> usize {
        self.block_rows
    }

    /// Number of tile columns
    pub fn block_cols(&self) -> usize {
        self.block_cols
    }

    /// Total number of tile coordinates
    pub fn num_blocks(&self) -> usize {
        self.block_rows * self.block_cols
    }

    pub fn contains(&self, idx: BlockIndex) -> bool {
        (idx.row as usize) < self.block_rows && (idx.col as usize) < self.block_cols
    }

    /// Global `[start, end)` ranges of rows and columns covered by a tile
    pub fn block_bounds(&self, idx: BlockIndex) -> ((usize, usize), (usize, usize)) {
        let r0 = idx.row as usize * self.block_size;
        let c0 = idx.col as usize * self.block_size;
        (
            (r0, (r0 + self.block_size).min(self.rows)),
            (c0, (c0 + self.block_size).min(self.cols)),
        )
    }

    /// First global row and column of a tile
    pub fn block_offset(&self, idx: BlockIndex) -> (usize, usize) {
        (
            idx.row as usize * self.block_size,
            idx.col as usize * self.block_size,
        )
    }

    /// Actual `(rows, cols)` of a tile, smaller on the trailing edge
    pub fn block_shape(&self, idx: BlockIndex) -> (usize, usize) {
        let ((r0, r1), (c0, c1)) = self.block_bounds(idx);
        (r1 - r0, c1 - c0)
    }

    /// Tile coordinate and local offsets of a global `(row, col)`
    pub fn locate(&self, row: usize, col: usize) -> (BlockIndex, u32, u32) {
        let bs = self.block_size;
        (
            BlockIndex::new((row / bs) as u32, (col / bs) as u32),
            (row % bs) as u32,
            (col % bs) as u32,
        )
    }

    /// All tile coordinates in row-major order
    pub fn iter(&self) -> impl Iterator<Item = BlockIndex> + '_ {
        let cols = self.block_cols;
        (0..self.num_blocks()).map(move |k| BlockIndex::new((k / cols) as u32, (k % cols) as u32))
    }

    /// Same tiling seen from the transposed matrix
    pub fn transposed(&self) -> Self {
        Self {
            rows: self.cols,
            cols: self.rows,
            block_size: self.block_size,
            block_rows: self.block_cols,
            block_cols: self.block_rows,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_counts() {
        let grid = BlockGrid::new(6, 6, 2).unwrap();
        assert_eq!(grid.block_rows(), 3);
        assert_eq!(grid.block_cols(), 3);
        assert_eq!(grid.num_blocks(), 9);

        let grid = BlockGrid::new(7, 3, 4).unwrap();
        assert_eq!((grid.block_rows(), grid.block_cols()), (2, 1));
    }

    #[test]
    fn test_zero_dimensions_rejected() {
        assert!(BlockGrid::new(0, 4, 2).is_err());
        assert!(BlockGrid::new(4, 4, 0).is_err());
    }

    #[test]
    fn test_edge_tiles_are_trimmed() {
        let grid = BlockGrid::new(5, 3, 2).unwrap();
        assert_eq!(grid.block_shape(BlockIndex::new(0, 0)), (2, 2));
        assert_eq!(grid.block_shape(BlockIndex::new(2, 1)), (1, 1));
        assert_eq!(grid.block_bounds(BlockIndex::new(2, 1)), ((4, 5), (2, 3)));
    }

    #[test]
    fn test_locate() {
        let grid = BlockGrid::new(10, 10, 4).unwrap();
        assert_eq!(grid.locate(5, 9), (BlockIndex::new(1, 2), 1, 1));
        assert_eq!(grid.locate(0, 0), (BlockIndex::new(0, 0), 0, 0));
    }

    #[test]
    fn test_iter_row_major() {
        let grid = BlockGrid::new(4, 6, 2).unwrap();
        let coords: Vec<_> = grid.iter().collect();
        assert_eq!(coords.len(), 6);
        assert_eq!(coords[0], BlockIndex::new(0, 0));
        assert_eq!(coords[2], BlockIndex::new(0, 2));
        assert_eq!(coords[3], BlockIndex::new(1, 0));
        assert!(coords.iter().all(|&c| grid.contains(c)));
    }

    #[test]
    fn test_transposed() {
        let grid = BlockGrid::new(4, 6, 2).unwrap().transposed();
        assert_eq!((grid.rows(), grid.cols()), (6, 4));
        assert_eq!((grid.block_rows(), grid.block_cols()), (3, 2));
    }
}
