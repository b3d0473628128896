//! Shared helpers for integration tests

#![allow(dead_code)]

use anyhow::Result;
use tessera_core::{DataMatrix, DataVector, LibraryConfig, Matrix, Ref, Type, Vector};
use tessera_exec::Library;

pub type Entries = Vec<(u32, u32, f32)>;

pub fn library(block_size: usize) -> Result<Library> {
    Ok(Library::new(
        LibraryConfig::default()
            .with_block_size(block_size)
            .with_worker_threads(4),
    )?)
}

/// Matrix filled with `entries` by its own expression
pub fn matrix(lib: &Library, nrows: usize, ncols: usize, entries: &[(u32, u32, f32)]) -> Result<Ref<Matrix>> {
    let m = lib.make_matrix(nrows, ncols, Type::f32())?;
    let rows = entries.iter().map(|e| e.0).collect();
    let cols = entries.iter().map(|e| e.1).collect();
    let vals: Vec<f32> = entries.iter().map(|e| e.2).collect();
    let data = DataMatrix::from_typed(lib.context(), rows, cols, &vals)?;

    let expr = lib.make_expression();
    expr.matrix_data_write(&m, &data, None)?;
    expr.submit_wait()?;
    Ok(m)
}

pub fn vector(lib: &Library, nrows: usize, entries: &[(u32, f32)]) -> Result<Ref<Vector>> {
    let v = lib.make_vector(nrows, Type::f32())?;
    let rows = entries.iter().map(|e| e.0).collect();
    let vals: Vec<f32> = entries.iter().map(|e| e.1).collect();
    let data = DataVector::from_typed(lib.context(), rows, &vals)?;

    let expr = lib.make_expression();
    expr.vector_data_write(&v, &data, None)?;
    expr.submit_wait()?;
    Ok(v)
}

/// Entries of `m` sorted by `(row, col)`
pub fn entries(lib: &Library, m: &Ref<Matrix>) -> Result<Entries> {
    let data = DataMatrix::make(lib.context());
    let expr = lib.make_expression();
    expr.matrix_data_read(m, &data, None)?;
    expr.submit_wait()?;
    let (rows, cols, vals) = data.to_typed::<f32>()?;
    Ok(rows
        .into_iter()
        .zip(cols)
        .zip(vals)
        .map(|((r, c), v)| (r, c, v))
        .collect())
}

pub fn vector_entries(lib: &Library, v: &Ref<Vector>) -> Result<Vec<(u32, f32)>> {
    let data = DataVector::make(lib.context());
    let expr = lib.make_expression();
    expr.vector_data_read(v, &data, None)?;
    expr.submit_wait()?;
    let (rows, vals) = data.to_typed::<f32>()?;
    Ok(rows.into_iter().zip(vals).collect())
}
