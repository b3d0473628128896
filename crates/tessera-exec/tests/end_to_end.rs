//! End-to-end evaluation of multi-node expressions

mod common;

use anyhow::Result;
use common::{entries, library, matrix};
use tessera_core::{BlockIndex, DataMatrix, DataScalar, FunctionBinary, Type};
use tessera_exec::{ExpressionState, NodeState};

#[test]
fn test_ewise_add_write_add_read() -> Result<()> {
    let lib = library(2)?;
    let ctx = lib.context();
    let a = lib.make_matrix(6, 6, Type::f32())?;
    let b = lib.make_matrix(6, 6, Type::f32())?;
    let w = lib.make_matrix(6, 6, Type::f32())?;

    let da = DataMatrix::from_typed(ctx, vec![0, 1, 2, 4, 5], vec![0, 2, 3, 4, 1], &[1.0f32, 2.0, 3.0, 4.0, 5.0])?;
    let db = DataMatrix::from_typed(ctx, vec![0, 2, 3, 5], vec![0, 3, 5, 5], &[10.0f32, 30.0, 40.0, 50.0])?;
    let out = DataMatrix::make(ctx);
    let plus = FunctionBinary::plus::<f32>(Type::f32());

    let expr = lib.make_expression();
    let n0 = expr.matrix_data_write(&a, &da, None)?;
    let n1 = expr.matrix_data_write(&b, &db, None)?;
    let n2 = expr.matrix_ewise_add(&w, None, &plus, &a, &b, None)?;
    let n3 = expr.matrix_data_read(&w, &out, None)?;
    expr.submit()?;
    assert_eq!(expr.wait()?, ExpressionState::Evaluated);

    let (rows, cols, vals) = out.to_typed::<f32>()?;
    assert_eq!(rows, vec![0, 1, 2, 3, 4, 5, 5]);
    assert_eq!(cols, vec![0, 2, 3, 5, 4, 1, 5]);
    assert_eq!(vals, vec![11.0, 2.0, 33.0, 40.0, 4.0, 5.0, 50.0]);

    // empty tiles are not materialised
    assert_eq!(w.storage().num_blocks(), 6);
    assert!(w.storage().get_block(BlockIndex::new(0, 2)).is_none());
    assert!(w.storage().get_block(BlockIndex::new(1, 0)).is_none());
    assert!(w.storage().get_block(BlockIndex::new(2, 1)).is_none());
    assert_eq!(w.nvals(), 7);

    for n in [n0, n1, n2, n3] {
        assert_eq!(expr.node_state(n), Some(NodeState::Done));
    }
    Ok(())
}

#[test]
fn test_ewise_add_fills_only_two_tiles_of_nine() -> Result<()> {
    let lib = library(2)?;
    // a and b share (0, 0) and (4, 4); everything lies in tiles (0, 0) and (2, 2)
    let a = matrix(&lib, 6, 6, &[(0, 0, 1.0), (0, 1, 2.0), (1, 1, 3.0), (4, 4, 4.0), (5, 5, 5.0)])?;
    let b = matrix(&lib, 6, 6, &[(0, 0, 10.0), (1, 0, 20.0), (4, 4, 30.0), (5, 4, 40.0)])?;
    let w = lib.make_matrix(6, 6, Type::f32())?;
    let plus = FunctionBinary::plus::<f32>(Type::f32());
    assert_eq!(w.storage().grid().num_blocks(), 9);

    let expr = lib.make_expression();
    expr.matrix_ewise_add(&w, None, &plus, &a, &b, None)?;
    expr.submit_wait()?;

    assert_eq!(w.nvals(), 5 + 4 - 2);
    let populated = [BlockIndex::new(0, 0), BlockIndex::new(2, 2)];
    assert_eq!(w.storage().block_indices().len(), populated.len());
    for idx in w.storage().grid().iter() {
        assert_eq!(w.storage().get_block(idx).is_some(), populated.contains(&idx), "tile {idx}");
    }
    assert_eq!(
        entries(&lib, &w)?,
        vec![
            (0, 0, 11.0),
            (0, 1, 2.0),
            (1, 0, 20.0),
            (1, 1, 3.0),
            (4, 4, 34.0),
            (5, 4, 40.0),
            (5, 5, 5.0),
        ]
    );
    Ok(())
}

#[test]
fn test_write_then_reduce_in_one_expression() -> Result<()> {
    let lib = library(2)?;
    let ctx = lib.context();
    let a = lib.make_matrix(5, 5, Type::f32())?;
    let s = lib.make_scalar(Type::f32());
    let data = DataMatrix::from_typed(ctx, vec![4, 0, 2, 1], vec![4, 0, 3, 1], &[1.0f32, 2.0, 3.0, 4.0])?;
    let result = DataScalar::make(ctx);
    let plus = FunctionBinary::plus::<f32>(Type::f32());

    let expr = lib.make_expression();
    expr.matrix_data_write(&a, &data, None)?;
    expr.matrix_reduce(&s, None, None, &plus, &a, None)?;
    expr.scalar_data_read(&s, &result, None)?;
    expr.submit_wait()?;

    assert_eq!(s.get::<f32>()?, 10.0);
    assert_eq!(result.to_typed::<f32>()?, 10.0);
    Ok(())
}

#[test]
fn test_chained_products_and_reduction() -> Result<()> {
    // path graph 0 - 1 - 2 - 3
    let lib = library(2)?;
    let adj = matrix(
        &lib,
        4,
        4,
        &[(0, 1, 1.0), (1, 0, 1.0), (1, 2, 1.0), (2, 1, 1.0), (2, 3, 1.0), (3, 2, 1.0)],
    )?;
    let square = lib.make_matrix(4, 4, Type::f32())?;
    let total = lib.make_scalar(Type::f32());
    let mult = FunctionBinary::mult::<f32>(Type::f32());
    let plus = FunctionBinary::plus::<f32>(Type::f32());

    let expr = lib.make_expression();
    expr.mxm(&square, None, &mult, &plus, &adj, &adj, None)?;
    expr.matrix_reduce(&total, None, None, &plus, &square, None)?;
    expr.submit_wait()?;

    assert_eq!(
        entries(&lib, &square)?,
        vec![
            (0, 0, 1.0),
            (0, 2, 1.0),
            (1, 1, 2.0),
            (1, 3, 1.0),
            (2, 0, 1.0),
            (2, 2, 2.0),
            (3, 1, 1.0),
            (3, 3, 1.0),
        ]
    );
    // sum of squared degrees
    assert_eq!(total.get::<f32>()?, 10.0);
    Ok(())
}

#[test]
fn test_read_after_overwrite_sees_latest_content() -> Result<()> {
    let lib = library(3)?;
    let ctx = lib.context();
    let a = lib.make_matrix(7, 7, Type::f32())?;
    let first = DataMatrix::from_typed(ctx, vec![0, 6], vec![0, 6], &[1.0f32, 2.0])?;
    let second = DataMatrix::from_typed(ctx, vec![3], vec![3], &[9.0f32])?;
    let before = DataMatrix::make(ctx);
    let after = DataMatrix::make(ctx);

    let expr = lib.make_expression();
    expr.matrix_data_write(&a, &first, None)?;
    expr.matrix_data_read(&a, &before, None)?;
    expr.matrix_data_write(&a, &second, None)?;
    expr.matrix_data_read(&a, &after, None)?;
    expr.submit_wait()?;

    assert_eq!(before.to_typed::<f32>()?, (vec![0, 6], vec![0, 6], vec![1.0, 2.0]));
    assert_eq!(after.to_typed::<f32>()?, (vec![3], vec![3], vec![9.0]));
    Ok(())
}

#[test]
fn test_unsorted_input_with_duplicates_keeps_first() -> Result<()> {
    let lib = library(2)?;
    let ctx = lib.context();
    let a = lib.make_matrix(4, 4, Type::f32())?;
    let data = DataMatrix::from_typed(ctx, vec![3, 0, 3, 1], vec![3, 1, 3, 0], &[1.0f32, 2.0, 3.0, 4.0])?;

    let expr = lib.make_expression();
    expr.matrix_data_write(&a, &data, None)?;
    expr.submit_wait()?;

    assert_eq!(entries(&lib, &a)?, vec![(0, 1, 2.0), (1, 0, 4.0), (3, 3, 1.0)]);
    Ok(())
}
