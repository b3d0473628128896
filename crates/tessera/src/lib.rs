//! # tessera
//!
//! Block-tiled sparse linear algebra with deferred, batched evaluation.
//!
//! This is the meta crate re-exporting the tessera components.
//!
//! ## Quick Start
//!
//! ```
//! use tessera::prelude::*;
//!
//! let lib = Library::new(LibraryConfig::default().with_block_size(2).with_worker_threads(2))?;
//! let a = lib.make_matrix(3, 3, Type::f32())?;
//! let s = lib.make_scalar(Type::f32());
//! let input = DataMatrix::from_typed(lib.context(), vec![0, 1, 2], vec![2, 0, 1], &[1.0f32, 2.0, 3.0])?;
//! let plus = FunctionBinary::plus::<f32>(Type::f32());
//!
//! let expr = lib.make_expression();
//! expr.matrix_data_write(&a, &input, None)?;
//! expr.matrix_reduce(&s, None, None, &plus, &a, None)?;
//! expr.submit_wait()?;
//! assert_eq!(s.get::<f32>()?, 6.0);
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! ## Components
//!
//! ### Object Model ([`core`])
//!
//! Matrices, vectors and scalars stored as grids of COO tiles, user
//! functions, descriptors and library configuration.
//!
//! ### Block Kernels ([`kernels`])
//!
//! Merge Path union/intersection, reduce-by-key, tile products, masks and
//! single-tile transforms.
//!
//! ### Expression Engine ([`exec`])
//!
//! Expressions, dependency analysis, algorithm dispatch with accelerator
//! fallback, tile-level task graphs and the worker pool.
//!
//! ## Features
//!
//! - `parallel` (default): split large merges across threads
//! - `tracing`: install a `tracing-subscriber` formatter via
//!   [`exec::init_tracing`]
//! - `serde`: serialize configuration and descriptors

pub use tessera_core as core;
pub use tessera_exec as exec;
pub use tessera_kernels as kernels;

pub mod prelude {
    //! Prelude module for convenient imports

    pub use crate::core::{
        DataMatrix, DataScalar, DataVector, Descriptor, FunctionBinary, FunctionSelect, FunctionUnary,
        LibraryConfig, Matrix, Object, Ref, Scalar, Status, TesseraError, TesseraResult, Type, Vector,
    };
    pub use crate::exec::{Expression, ExpressionState, Library, NodeHandle, NodeState};
    pub use crate::kernels::Triangle;
}
