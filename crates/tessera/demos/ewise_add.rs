//! Element-wise addition and reduction of two block-tiled matrices
//!
//! Builds two 8x8 banded matrices, adds them, filters the sum and reduces
//! it to a scalar in a single expression, then prints the resulting task
//! graph and per-node states.
//!
//! # Usage
//!
//! ```bash
//! TESSERA_LOG=debug TESSERA_PROFILE=1 \
//!     cargo run -p tessera --example ewise_add --features tracing
//! ```

use anyhow::Result;
use tessera::exec::{init_tracing, TracingConfig};
use tessera::prelude::*;

const N: u32 = 8;

/// Diagonal at `offset` with values `scale * (i + 1)`
fn band(lib: &Library, offset: u32, scale: f32) -> Result<Ref<DataMatrix>> {
    let rows: Vec<u32> = (0..N - offset).collect();
    let cols: Vec<u32> = rows.iter().map(|r| r + offset).collect();
    let vals: Vec<f32> = rows.iter().map(|&r| scale * (r + 1) as f32).collect();
    Ok(DataMatrix::from_typed(lib.context(), rows, cols, &vals)?)
}

fn main() -> Result<()> {
    let config = LibraryConfig::from_env().with_block_size(3);
    init_tracing(TracingConfig::for_library(&config))?;

    let lib = Library::new(config)?;
    println!("{lib:?}");

    let ty = Type::f32();
    let a = lib.make_matrix(N as usize, N as usize, ty.clone())?;
    let b = lib.make_matrix(N as usize, N as usize, ty.clone())?;
    let sum = lib.make_matrix(N as usize, N as usize, ty.clone())?;
    let big = lib.make_matrix(N as usize, N as usize, ty.clone())?;
    let total = lib.make_scalar(ty.clone());
    let out = DataMatrix::make(lib.context());

    let plus = FunctionBinary::plus::<f32>(ty.clone());
    let over_five = FunctionSelect::new::<f32>("gt_5", ty, |x| x > 5.0)?;
    let profiled = Descriptor::new().with_profile_time(true);

    let expr = lib.make_expression();
    expr.matrix_data_write(&a, &band(&lib, 0, 1.0)?, None)?;
    expr.matrix_data_write(&b, &band(&lib, 1, 0.5)?, None)?;
    let add = expr.matrix_ewise_add(&sum, None, &plus, &a, &b, Some(profiled))?;
    expr.matrix_select(&big, None, &over_five, &sum, None)?;
    expr.matrix_reduce(&total, None, None, &plus, &sum, None)?;
    expr.matrix_data_read(&big, &out, None)?;
    expr.submit_wait()?;

    if let Some(graph) = expr.task_graph() {
        println!("{} tasks, {} edges", graph.len(), graph.edge_count());
        for task in graph.tasks_of_node(add.index()) {
            println!("  {}", task.name);
        }
    }
    for i in 0..expr.len() {
        if let Some(node) = expr.node(NodeHandle(i)) {
            println!("{node}: {:?}", node.state());
        }
    }

    let (rows, cols, vals) = out.to_typed::<f32>()?;
    println!("entries above 5:");
    for ((r, c), v) in rows.iter().zip(&cols).zip(&vals) {
        println!("  ({r}, {c}) = {v}");
    }
    println!("sum of all entries: {}", total.get::<f32>()?);
    Ok(())
}
