//! Host staging transfers
//!
//! DataWrite runs a bucketing task that validates the caller's entries and
//! splits them by tile, then one task per tile that sorts, de-duplicates and
//! stores its bucket. Every tile of the target is rewritten, so a write
//! fully replaces the previous content. DataRead gathers one block-row per
//! task and concatenates the bands into the caller's buffer, producing
//! entries in `(row, col)` order.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tessera_core::{
    BlockGrid, BlockIndex, CooBlock, Duplicates, Object, ObjectId, Ref, TesseraError, TesseraResult,
};

use super::{wrong_node, Tiled};
use crate::dispatch::NodeProcessor;
use crate::node::{ExpressionNode, NodeOp};
use crate::task::{TaskAccess, TaskBuilder};

#[derive(Debug, Default)]
struct Bucket {
    entries: Vec<(u32, u32)>,
    vals: Vec<u8>,
}

type Buckets = Arc<Mutex<HashMap<BlockIndex, Bucket>>>;

/// Split global entries into per-tile buckets, keeping input order
fn bucket_entries(
    grid: &BlockGrid,
    byte_size: usize,
    rows: &[u32],
    cols: &[u32],
    vals: &[u8],
) -> TesseraResult<HashMap<BlockIndex, Bucket>> {
    if rows.len() != cols.len() {
        return Err(TesseraError::invalid_argument(format!(
            "{} row indices but {} column indices",
            rows.len(),
            cols.len()
        )));
    }
    if byte_size > 0 && vals.len() != rows.len() * byte_size {
        return Err(TesseraError::invalid_argument(format!(
            "{} entries need {} value bytes, got {}",
            rows.len(),
            rows.len() * byte_size,
            vals.len()
        )));
    }

    let mut buckets: HashMap<BlockIndex, Bucket> = HashMap::new();
    for (k, (&r, &c)) in rows.iter().zip(cols).enumerate() {
        if r as usize >= grid.rows() || c as usize >= grid.cols() {
            return Err(TesseraError::invalid_argument(format!(
                "entry ({r}, {c}) outside {}x{} object",
                grid.rows(),
                grid.cols()
            )));
        }
        let (idx, lr, lc) = grid.locate(r as usize, c as usize);
        let bucket = buckets.entry(idx).or_default();
        bucket.entries.push((lr, lc));
        bucket.vals.extend_from_slice(&vals[k * byte_size..(k + 1) * byte_size]);
    }
    Ok(buckets)
}

fn emit_write<T, F>(builder: &mut TaskBuilder<'_>, target: &Ref<T>, data: ObjectId, load: F) -> TesseraResult<()>
where
    T: Tiled,
    F: FnOnce() -> (Vec<u32>, Vec<u32>, Vec<u8>) + Send + 'static,
{
    let grid = *target.storage().grid();
    let byte_size = target.storage().byte_size();
    let buckets: Buckets = Arc::default();

    let bucket_task = {
        let buckets = Arc::clone(&buckets);
        builder.emplace("bucket", TaskAccess::new().read_whole(data), move || {
            let (rows, cols, vals) = load();
            *buckets.lock() = bucket_entries(&grid, byte_size, &rows, &cols, &vals)?;
            Ok(())
        })
    };

    let sorted = builder.descriptor().values_sorted;
    let duplicates = if builder.descriptor().no_duplicates {
        Duplicates::Trusted
    } else {
        Duplicates::KeepFirst
    };
    for idx in grid.iter().collect::<Vec<_>>() {
        let buckets = Arc::clone(&buckets);
        let target = Arc::clone(target);
        builder.emplace_after(
            format!("tile{idx}"),
            &[bucket_task],
            TaskAccess::new().write_tile(target.id(), idx),
            move || {
                let bucket = buckets.lock().remove(&idx).unwrap_or_default();
                let (nrows, ncols) = grid.block_shape(idx);
                let block = CooBlock::from_unsorted(
                    nrows,
                    ncols,
                    &bucket.entries,
                    &bucket.vals,
                    byte_size,
                    sorted,
                    duplicates,
                )?;
                target.storage().set_block(idx, block);
                Ok(())
            },
        )?;
    }
    Ok(())
}

#[derive(Debug, Default)]
struct Band {
    rows: Vec<u32>,
    cols: Vec<u32>,
    vals: Vec<u8>,
}

fn emit_read<T, F>(builder: &mut TaskBuilder<'_>, source: &Ref<T>, data: ObjectId, store: F)
where
    T: Tiled,
    F: FnOnce(Vec<u32>, Vec<u32>, Vec<u8>) + Send + 'static,
{
    let grid = *source.storage().grid();
    let bands: Arc<Mutex<Vec<Band>>> = Arc::new(Mutex::new(
        (0..grid.block_rows()).map(|_| Band::default()).collect(),
    ));

    for br in 0..grid.block_rows() as u32 {
        let tiles: Vec<BlockIndex> = (0..grid.block_cols() as u32).map(|bc| BlockIndex::new(br, bc)).collect();
        let access = tiles
            .iter()
            .fold(TaskAccess::new(), |acc, &idx| acc.read_tile(source.id(), idx));
        let source = Arc::clone(source);
        let bands = Arc::clone(&bands);
        builder.emplace(format!("band{br}"), access, move || {
            let blocks: Vec<(BlockIndex, Arc<CooBlock>)> = tiles
                .iter()
                .filter_map(|&idx| source.storage().get_block(idx).map(|b| (idx, b)))
                .collect();
            let mut entries: Vec<((u32, u32), &[u8])> = Vec::new();
            for (idx, block) in &blocks {
                let (r0, c0) = grid.block_offset(*idx);
                for k in 0..block.nvals() {
                    let (r, c) = block.key(k);
                    entries.push(((r0 as u32 + r, c0 as u32 + c), block.value(k)));
                }
            }
            entries.sort_by_key(|&(key, _)| key);

            let mut band = Band::default();
            for ((r, c), value) in entries {
                band.rows.push(r);
                band.cols.push(c);
                band.vals.extend_from_slice(value);
            }
            bands.lock()[br as usize] = band;
            Ok(())
        });
    }

    builder.emplace_after_all("collect", TaskAccess::new().write_whole(data), move || {
        let bands = std::mem::take(&mut *bands.lock());
        let mut rows = Vec::new();
        let mut cols = Vec::new();
        let mut vals = Vec::new();
        for band in bands {
            rows.extend(band.rows);
            cols.extend(band.cols);
            vals.extend(band.vals);
        }
        store(rows, cols, vals);
        Ok(())
    });
}

/// `matrix = data`
#[derive(Debug, Default)]
pub struct MatrixDataWriteCoo;

impl NodeProcessor for MatrixDataWriteCoo {
    fn name(&self) -> &str {
        "matrix_data_write_coo"
    }

    fn process(&self, node: &ExpressionNode, builder: &mut TaskBuilder<'_>) -> TesseraResult<()> {
        let NodeOp::MatrixDataWrite { matrix, data } = node.op() else {
            return Err(wrong_node(self.name(), node));
        };
        let data = Arc::clone(data);
        emit_write(builder, matrix, data.id(), move || data.parts())
    }
}

/// `data = matrix`
#[derive(Debug, Default)]
pub struct MatrixDataReadCoo;

impl NodeProcessor for MatrixDataReadCoo {
    fn name(&self) -> &str {
        "matrix_data_read_coo"
    }

    fn process(&self, node: &ExpressionNode, builder: &mut TaskBuilder<'_>) -> TesseraResult<()> {
        let NodeOp::MatrixDataRead { matrix, data } = node.op() else {
            return Err(wrong_node(self.name(), node));
        };
        let data = Arc::clone(data);
        emit_read(builder, matrix, data.id(), move |rows, cols, vals| data.set_parts(rows, cols, vals));
        Ok(())
    }
}

/// `vector = data`
#[derive(Debug, Default)]
pub struct VectorDataWriteCoo;

impl NodeProcessor for VectorDataWriteCoo {
    fn name(&self) -> &str {
        "vector_data_write_coo"
    }

    fn process(&self, node: &ExpressionNode, builder: &mut TaskBuilder<'_>) -> TesseraResult<()> {
        let NodeOp::VectorDataWrite { vector, data } = node.op() else {
            return Err(wrong_node(self.name(), node));
        };
        let data = Arc::clone(data);
        emit_write(builder, vector, data.id(), move || {
            let (rows, vals) = data.parts();
            let cols = vec![0; rows.len()];
            (rows, cols, vals)
        })
    }
}

/// `data = vector`
#[derive(Debug, Default)]
pub struct VectorDataReadCoo;

impl NodeProcessor for VectorDataReadCoo {
    fn name(&self) -> &str {
        "vector_data_read_coo"
    }

    fn process(&self, node: &ExpressionNode, builder: &mut TaskBuilder<'_>) -> TesseraResult<()> {
        let NodeOp::VectorDataRead { vector, data } = node.op() else {
            return Err(wrong_node(self.name(), node));
        };
        let data = Arc::clone(data);
        emit_read(builder, vector, data.id(), move |rows, _cols, vals| data.set_parts(rows, vals));
        Ok(())
    }
}

/// `scalar = data`, an empty buffer clears the scalar
#[derive(Debug, Default)]
pub struct ScalarDataWriteCoo;

impl NodeProcessor for ScalarDataWriteCoo {
    fn name(&self) -> &str {
        "scalar_data_write"
    }

    fn process(&self, node: &ExpressionNode, builder: &mut TaskBuilder<'_>) -> TesseraResult<()> {
        let NodeOp::ScalarDataWrite { scalar, data } = node.op() else {
            return Err(wrong_node(self.name(), node));
        };
        let (scalar, data) = (Arc::clone(scalar), Arc::clone(data));
        let access = TaskAccess::new().read_whole(data.id()).write_whole(scalar.id());
        builder.emplace("value", access, move || match data.get() {
            Some(bytes) => scalar.set_value(bytes),
            None => {
                scalar.clear_value();
                Ok(())
            }
        });
        Ok(())
    }
}

/// `data = scalar`
#[derive(Debug, Default)]
pub struct ScalarDataReadCoo;

impl NodeProcessor for ScalarDataReadCoo {
    fn name(&self) -> &str {
        "scalar_data_read"
    }

    fn process(&self, node: &ExpressionNode, builder: &mut TaskBuilder<'_>) -> TesseraResult<()> {
        let NodeOp::ScalarDataRead { scalar, data } = node.op() else {
            return Err(wrong_node(self.name(), node));
        };
        let (scalar, data) = (Arc::clone(scalar), Arc::clone(data));
        let access = TaskAccess::new().read_whole(scalar.id()).write_whole(data.id());
        builder.emplace("value", access, move || {
            data.set(scalar.value());
            Ok(())
        });
        Ok(())
    }
}
