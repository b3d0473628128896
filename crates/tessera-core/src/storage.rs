//! Tiled sparse storage
//!
//! A [`Storage`] maps block-grid coordinates to [`CooBlock`]s. Absence of a
//! block means the tile is structurally empty, and an empty result tile is
//! never stored: [`Storage::set_block`] with an empty block removes the
//! coordinate instead. This keeps huge, very sparse operands sparse at the
//! tile level.
//!
//! Writers are serialised by the task graph (one writer per coordinate at a
//! time). The map itself sits behind a short-lived `RwLock` so concurrent
//! tasks touching *different* coordinates can safely share it.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::block::CooBlock;
use crate::critical;
use crate::error::TesseraResult;
use crate::grid::{BlockGrid, BlockIndex};

/// Sparse grid of tiles backing one matrix or vector
#[derive(Debug)]
pub struct Storage {
    grid: BlockGrid,
    byte_size: usize,
    blocks: RwLock<BTreeMap<BlockIndex, Arc<CooBlock>>>,
    nvals: AtomicUsize,
}

impl Storage {
    /// Empty storage for a `rows x cols` space
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for zero dimensions or block size.
    pub fn new(rows: usize, cols: usize, block_size: usize, byte_size: usize) -> TesseraResult<Self> {
        Ok(Self {
            grid: BlockGrid::new(rows, cols, block_size)?,
            byte_size,
            blocks: RwLock::new(BTreeMap::new()),
            nvals: AtomicUsize::new(0),
        })
    }

    pub fn grid(&self) -> &BlockGrid {
        &self.grid
    }

    pub fn nrows(&self) -> usize {
        self.grid.rows()
    }

    pub fn ncols(&self) -> usize {
        self.grid.cols()
    }

    pub fn byte_size(&self) -> usize {
        self.byte_size
    }

    /// Total entries over all tiles
    pub fn nvals(&self) -> usize {
        self.nvals.load(Ordering::Acquire)
    }

    /// Number of materialised tiles
    pub fn num_blocks(&self) -> usize {
        self.blocks.read().len()
    }

    /// Block at `idx`, `None` if the tile is empty
    pub fn get_block(&self, idx: BlockIndex) -> Option<Arc<CooBlock>> {
        self.blocks.read().get(&idx).cloned()
    }

    /// Replace the block at `idx`
    ///
    /// An empty block clears the coordinate. Returns the previous block.
    ///
    /// # Panics
    ///
    /// Critical failure if `idx` lies outside the grid or the block shape or
    /// element width disagree with the grid.
    pub fn set_block(&self, idx: BlockIndex, block: impl Into<Arc<CooBlock>>) -> Option<Arc<CooBlock>> {
        let block = block.into();
        if block.is_empty() {
            return self.remove_block(idx);
        }
        if !self.grid.contains(idx) {
            critical!(
                "block {idx} outside {}x{} grid",
                self.grid.block_rows(),
                self.grid.block_cols()
            );
        }
        if block.shape() != self.grid.block_shape(idx) {
            critical!(
                "block {idx} has shape {:?}, grid expects {:?}",
                block.shape(),
                self.grid.block_shape(idx)
            );
        }
        if block.byte_size() != self.byte_size {
            critical!(
                "block {idx} has element width {}, storage expects {}",
                block.byte_size(),
                self.byte_size
            );
        }

        tracing::trace!(block = %idx, nvals = block.nvals(), "set block");
        let added = block.nvals();
        let previous = self.blocks.write().insert(idx, block);
        let removed = previous.as_ref().map_or(0, |b| b.nvals());
        self.adjust_nvals(added, removed);
        previous
    }

    /// Clear the tile at `idx`, returning the previous block
    pub fn remove_block(&self, idx: BlockIndex) -> Option<Arc<CooBlock>> {
        let previous = self.blocks.write().remove(&idx);
        if let Some(ref b) = previous {
            tracing::trace!(block = %idx, "remove block");
            self.adjust_nvals(0, b.nvals());
        }
        previous
    }

    /// Snapshot of every materialised tile in row-major coordinate order
    pub fn blocks(&self) -> Vec<(BlockIndex, Arc<CooBlock>)> {
        self.blocks
            .read()
            .iter()
            .map(|(&idx, b)| (idx, Arc::clone(b)))
            .collect()
    }

    /// Coordinates of every materialised tile
    pub fn block_indices(&self) -> Vec<BlockIndex> {
        self.blocks.read().keys().copied().collect()
    }

    /// Drop every tile
    pub fn clear(&self) {
        self.blocks.write().clear();
        self.nvals.store(0, Ordering::Release);
    }

    fn adjust_nvals(&self, added: usize, removed: usize) {
        if added >= removed {
            self.nvals.fetch_add(added - removed, Ordering::AcqRel);
        } else {
            self.nvals.fetch_sub(removed - added, Ordering::AcqRel);
        }
    }
}
