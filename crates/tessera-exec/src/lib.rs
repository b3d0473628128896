//! # tessera-exec
//!
//! Expression compiler and block-level task executor of the tessera sparse
//! engine.
//!
//! This crate provides:
//! - [`Library`]: executor, accelerator, and algorithm registry behind one handle
//! - [`Expression`]: validated operation nodes, submitted as a batch
//! - Dependency inference between nodes and deterministic lowering order
//! - Algorithm selection per node with accelerator fallback
//! - Tile-level task graphs with hazard-based edges
//! - A worker-pool executor with failure propagation
//!
//! # Example
//!
//! ```
//! use tessera_core::{DataMatrix, FunctionBinary, LibraryConfig, Type};
//! use tessera_exec::{ExpressionState, Library};
//!
//! let lib = Library::new(LibraryConfig::default().with_block_size(2).with_worker_threads(2)).unwrap();
//! let ctx = lib.context();
//! let a = lib.make_matrix(4, 4, Type::f32()).unwrap();
//! let w = lib.make_matrix(4, 4, Type::f32()).unwrap();
//! let input = DataMatrix::from_typed(ctx, vec![0, 3], vec![1, 2], &[1.0f32, 2.0]).unwrap();
//! let output = DataMatrix::make(ctx);
//! let plus = FunctionBinary::plus::<f32>(Type::f32());
//!
//! let expr = lib.make_expression();
//! expr.matrix_data_write(&a, &input, None).unwrap();
//! expr.matrix_ewise_add(&w, None, &plus, &a, &a, None).unwrap();
//! expr.matrix_data_read(&w, &output, None).unwrap();
//! expr.submit().unwrap();
//! assert_eq!(expr.wait().unwrap(), ExpressionState::Evaluated);
//!
//! let (rows, cols, vals) = output.to_typed::<f32>().unwrap();
//! assert_eq!((rows, cols, vals), (vec![0, 3], vec![1, 2], vec![2.0, 4.0]));
//! ```

pub mod accelerator;
pub mod dispatch;
pub mod executor;
pub mod expression;
pub mod library;
pub mod manager;
pub mod node;
pub mod processors;
pub mod task;
pub mod tracing_support;

pub use accelerator::{Accelerator, AcceleratorStats, Completion, DeviceManager, DeviceWork, SimulatedAccelerator};
pub use dispatch::{AlgorithmKey, AlgorithmRegistry, Backend, NodeProcessor, Selection};
pub use executor::{Executor, TaskOutcome};
pub use expression::{Expression, ExpressionState};
pub use library::Library;
pub use manager::{DependencyPlan, ExpressionManager};
pub use node::{ExpressionNode, NodeHandle, NodeOp, NodeState, OpKind};
pub use task::{
    Access, TaskAccess, TaskBuilder, TaskDescription, TaskGraph, TaskGraphDescription, TaskId, TaskKind,
};
pub use tracing_support::{init_tracing, TracingConfig};
