//! # tessera-core
//!
//! Object model and block-tiled storage of the tessera sparse engine.
//!
//! This crate provides:
//! - Status codes and the [`TesseraError`] type
//! - Shared objects with identity and an explicit library [`Context`]
//! - Opaque element [`Type`]s and byte-level operator functions
//! - Immutable execution [`Descriptor`]s and [`LibraryConfig`]
//! - Block grid geometry, sorted COO tiles and tiled [`Storage`]
//! - [`Matrix`], [`Vector`], [`Scalar`] operands and host staging buffers
//!
//! # Example
//!
//! ```
//! use tessera_core::{Context, LibraryConfig, Matrix, Type};
//!
//! let ctx = Context::new(LibraryConfig::default().with_block_size(2)).unwrap();
//! let a = Matrix::make(6, 6, Type::f32(), &ctx).unwrap();
//! assert_eq!(a.storage().grid().num_blocks(), 9);
//! assert_eq!(a.storage().num_blocks(), 0);
//! ```

pub mod block;
pub mod config;
pub mod data;
pub mod descriptor;
pub mod error;
pub mod functions;
pub mod grid;
pub mod matrix;
pub mod object;
pub mod storage;
pub mod types;


pub use block::{CooBlock, Duplicates, Format};
pub use config::{AcceleratorConfig, LibraryConfig, DEFAULT_BLOCK_SIZE};
pub use data::{DataMatrix, DataScalar, DataVector};
pub use descriptor::{Descriptor, TraversalDirection};
pub use error::{Status, TesseraError, TesseraResult};
pub use functions::{FunctionBinary, FunctionSelect, FunctionUnary};
pub use grid::{BlockGrid, BlockIndex};
pub use matrix::{Matrix, Scalar, Vector};
pub use object::{Context, ContextId, Object, ObjectId, ObjectMeta, Ref};
pub use storage::Storage;
pub use types::Type;
