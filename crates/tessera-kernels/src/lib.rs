//! # tessera-kernels
//!
//! Block-level sparse kernels used by the tessera executor.
//!
//! This crate provides:
//! - Merge Path (balanced-path) partitioning with slice-local merge,
//!   intersection and difference
//! - Reduce-by-key over packed element values
//! - Structural tile masks with complement
//! - COO tile algorithms: element-wise add/mult, semiring products
//!   (MxM, VxM, MxV), transpose, triangle/value selection, apply, fill and
//!   reduction
//!
//! Every kernel works on a single tile (or a pair of aligned tiles) and
//! returns `None` instead of an empty tile.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use tessera_core::types::{values_as, values_to_bytes};
//! use tessera_core::{CooBlock, FunctionBinary, Type};
//! use tessera_kernels::ewise::ewise_add;
//!
//! let a = Arc::new(CooBlock::new(2, 2, vec![0, 1], vec![0, 1], values_to_bytes(&[1i32, 2]), 4).unwrap());
//! let b = Arc::new(CooBlock::new(2, 2, vec![1], vec![1], values_to_bytes(&[5i32]), 4).unwrap());
//! let c = ewise_add(Some(&a), Some(&b), &FunctionBinary::plus::<i32>(Type::i32())).unwrap();
//! assert_eq!(values_as::<i32>(c.vals()), Some(vec![1, 7]));
//! ```

pub mod ewise;
pub mod mask;
pub mod merge_path;
pub mod product;
pub mod reduce;
pub mod transform;

pub use ewise::{ewise_add, ewise_mult};
pub use mask::TileMask;
pub use merge_path::{difference, intersect, merge, partition, split_point, Source, PARALLEL_THRESHOLD};
pub use product::{accumulate, mxm_block, mxv_block, vxm_block};
pub use reduce::{reduce_by_key, reduce_partials, reduce_values};
pub use transform::{
    apply_block, fill_rows, reduce_block, select_block, transpose_block, tria_block, Triangle,
};
