//! Semantics of the built-in operations: masks, accumulation, transforms,
//! products and scalar results

mod common;

use anyhow::Result;
use common::{entries, library, matrix, vector, vector_entries};
use tessera_core::{DataScalar, Descriptor, FunctionBinary, FunctionSelect, FunctionUnary, Type};
use tessera_exec::Library;
use tessera_kernels::Triangle;

fn plus() -> FunctionBinary {
    FunctionBinary::plus::<f32>(Type::f32())
}

fn times() -> FunctionBinary {
    FunctionBinary::mult::<f32>(Type::f32())
}

fn masked_sum(lib: &Library, complement: bool) -> Result<Vec<(u32, u32, f32)>> {
    let a = matrix(lib, 4, 4, &[(0, 0, 1.0), (1, 1, 2.0), (2, 3, 3.0)])?;
    let b = matrix(lib, 4, 4, &[(0, 0, 10.0), (3, 3, 4.0)])?;
    let mask = matrix(lib, 4, 4, &[(0, 0, 0.0), (2, 3, 0.0)])?;
    let w = matrix(lib, 4, 4, &[(1, 0, 7.0), (3, 0, 8.0)])?;

    let expr = lib.make_expression();
    let desc = Descriptor::new().with_mask_complement(complement);
    expr.matrix_ewise_add(&w, Some(&mask), &plus(), &a, &b, Some(desc))?;
    expr.submit_wait()?;
    entries(lib, &w)
}

#[test]
fn test_structural_mask_replaces_result() -> Result<()> {
    let lib = library(2)?;
    assert_eq!(masked_sum(&lib, false)?, vec![(0, 0, 11.0), (2, 3, 3.0)]);
    Ok(())
}

#[test]
fn test_complemented_mask() -> Result<()> {
    let lib = library(2)?;
    assert_eq!(masked_sum(&lib, true)?, vec![(1, 1, 2.0), (3, 3, 4.0)]);
    Ok(())
}

#[test]
fn test_accumulating_ewise_add() -> Result<()> {
    let lib = library(2)?;
    let a = matrix(&lib, 4, 4, &[(0, 0, 1.0), (1, 1, 2.0)])?;
    let b = matrix(&lib, 4, 4, &[(0, 0, 10.0)])?;
    let w = matrix(&lib, 4, 4, &[(0, 0, 100.0), (3, 0, 8.0)])?;

    let expr = lib.make_expression();
    let desc = Descriptor::new().with_accum_result(true);
    expr.matrix_ewise_add(&w, None, &plus(), &a, &b, Some(desc))?;
    expr.submit_wait()?;

    assert_eq!(entries(&lib, &w)?, vec![(0, 0, 111.0), (1, 1, 2.0), (3, 0, 8.0)]);
    Ok(())
}

#[test]
fn test_ewise_mult_intersects() -> Result<()> {
    let lib = library(3)?;
    let a = matrix(&lib, 5, 5, &[(0, 0, 2.0), (4, 4, 3.0), (2, 1, 1.0)])?;
    let b = matrix(&lib, 5, 5, &[(4, 4, 5.0), (2, 2, 1.0)])?;
    let w = lib.make_matrix(5, 5, Type::f32())?;

    let expr = lib.make_expression();
    expr.matrix_ewise_mult(&w, None, &times(), &a, &b, None)?;
    expr.submit_wait()?;

    assert_eq!(entries(&lib, &w)?, vec![(4, 4, 15.0)]);
    Ok(())
}

#[test]
fn test_transpose_rectangular() -> Result<()> {
    let lib = library(2)?;
    let a = matrix(&lib, 3, 5, &[(0, 4, 1.0), (2, 1, 2.0), (1, 1, 3.0)])?;
    let w = lib.make_matrix(5, 3, Type::f32())?;

    let expr = lib.make_expression();
    expr.transpose(&w, None, None, &a, None)?;
    expr.submit_wait()?;

    assert_eq!(entries(&lib, &w)?, vec![(1, 1, 3.0), (1, 2, 2.0), (4, 0, 1.0)]);
    Ok(())
}

#[test]
fn test_transpose_with_accumulator() -> Result<()> {
    let lib = library(2)?;
    let a = matrix(&lib, 4, 4, &[(0, 1, 1.0), (3, 2, 2.0)])?;
    let w = matrix(&lib, 4, 4, &[(1, 0, 5.0), (0, 0, 1.0)])?;

    let expr = lib.make_expression();
    let desc = Descriptor::new().with_accum_result(true);
    expr.transpose(&w, None, Some(&plus()), &a, Some(desc))?;
    expr.submit_wait()?;

    assert_eq!(entries(&lib, &w)?, vec![(0, 0, 1.0), (1, 0, 6.0), (2, 3, 2.0)]);
    Ok(())
}

#[test]
fn test_tria_lower_and_upper() -> Result<()> {
    let lib = library(2)?;
    let a = matrix(&lib, 4, 4, &[(0, 0, 1.0), (1, 0, 2.0), (0, 3, 3.0), (3, 2, 4.0), (2, 2, 5.0)])?;
    let lower = lib.make_matrix(4, 4, Type::f32())?;
    let upper = lib.make_matrix(4, 4, Type::f32())?;

    let expr = lib.make_expression();
    expr.matrix_tria(&lower, &a, Triangle::Lower, None)?;
    expr.matrix_tria(&upper, &a, Triangle::Upper, None)?;
    expr.submit_wait()?;

    assert_eq!(entries(&lib, &lower)?, vec![(1, 0, 2.0), (3, 2, 4.0)]);
    assert_eq!(entries(&lib, &upper)?, vec![(0, 3, 3.0)]);
    Ok(())
}

#[test]
fn test_select_and_apply() -> Result<()> {
    let lib = library(2)?;
    let a = matrix(&lib, 4, 4, &[(0, 0, 1.0), (1, 3, 2.0), (3, 3, 3.0)])?;
    let big = lib.make_matrix(4, 4, Type::f32())?;
    let negated = lib.make_matrix(4, 4, Type::f32())?;
    let gt = FunctionSelect::new::<f32>("gt_1.5", Type::f32(), |x| x > 1.5)?;
    let neg = FunctionUnary::new::<f32, f32>("neg", Type::f32(), Type::f32(), |x| -x)?;

    let expr = lib.make_expression();
    expr.matrix_select(&big, None, &gt, &a, None)?;
    expr.matrix_apply(&negated, None, &neg, &big, None)?;
    expr.submit_wait()?;

    assert_eq!(entries(&lib, &big)?, vec![(1, 3, 2.0), (3, 3, 3.0)]);
    assert_eq!(entries(&lib, &negated)?, vec![(1, 3, -2.0), (3, 3, -3.0)]);
    Ok(())
}

#[test]
fn test_masked_mxm() -> Result<()> {
    let lib = library(2)?;
    let a = matrix(&lib, 4, 4, &[(0, 1, 1.0), (1, 2, 2.0), (2, 3, 3.0), (3, 0, 4.0)])?;
    let mask = matrix(&lib, 4, 4, &[(0, 2, 1.0), (1, 1, 1.0)])?;
    let w = lib.make_matrix(4, 4, Type::f32())?;

    let expr = lib.make_expression();
    expr.mxm(&w, Some(&mask), &times(), &plus(), &a, &a, None)?;
    expr.submit_wait()?;

    // a² = {(0,2)=2, (1,3)=6, (2,0)=12, (3,1)=4}; only (0,2) is selected
    assert_eq!(entries(&lib, &w)?, vec![(0, 2, 2.0)]);
    Ok(())
}

#[test]
fn test_matrix_vector_products() -> Result<()> {
    let lib = library(2)?;
    let a = matrix(&lib, 4, 4, &[(0, 1, 2.0), (1, 0, 1.0), (3, 3, 4.0)])?;
    let v = vector(&lib, 4, &[(0, 1.0), (1, 3.0), (3, 2.0)])?;
    let av = lib.make_vector(4, Type::f32())?;
    let va = lib.make_vector(4, Type::f32())?;

    let expr = lib.make_expression();
    expr.mxv(&av, None, &times(), &plus(), &a, &v, None)?;
    expr.vxm(&va, None, &times(), &plus(), &v, &a, None)?;
    expr.submit_wait()?;

    assert_eq!(vector_entries(&lib, &av)?, vec![(0, 6.0), (1, 1.0), (3, 8.0)]);
    assert_eq!(vector_entries(&lib, &va)?, vec![(0, 3.0), (1, 2.0), (3, 8.0)]);
    Ok(())
}

#[test]
fn test_vector_ewise_ops() -> Result<()> {
    let lib = library(2)?;
    let a = vector(&lib, 5, &[(0, 1.0), (2, 3.0)])?;
    let b = vector(&lib, 5, &[(2, 4.0), (4, 5.0)])?;
    let sum = lib.make_vector(5, Type::f32())?;
    let product = lib.make_vector(5, Type::f32())?;

    let expr = lib.make_expression();
    expr.vector_ewise_add(&sum, None, &plus(), &a, &b, None)?;
    expr.vector_ewise_mult(&product, None, &times(), &a, &b, None)?;
    expr.submit_wait()?;

    assert_eq!(vector_entries(&lib, &sum)?, vec![(0, 1.0), (2, 7.0), (4, 5.0)]);
    assert_eq!(vector_entries(&lib, &product)?, vec![(2, 12.0)]);
    Ok(())
}

#[test]
fn test_vector_reduce_accumulates_into_scalar() -> Result<()> {
    let lib = library(2)?;
    let v = vector(&lib, 4, &[(0, 1.0), (1, 3.0), (3, 2.0)])?;
    let s = lib.make_scalar(Type::f32());
    let initial = DataScalar::from_typed(lib.context(), 10.0f32);

    let expr = lib.make_expression();
    expr.scalar_data_write(&s, &initial, None)?;
    let desc = Descriptor::new().with_accum_result(true);
    expr.vector_reduce(&s, Some(&plus()), &plus(), &v, Some(desc))?;
    expr.submit_wait()?;

    assert_eq!(s.get::<f32>()?, 16.0);
    Ok(())
}

#[test]
fn test_reduce_of_empty_matrix_clears_scalar() -> Result<()> {
    let lib = library(2)?;
    let a = lib.make_matrix(4, 4, Type::f32())?;
    let s = lib.make_scalar(Type::f32());
    s.set_value(5.0f32.to_ne_bytes().to_vec())?;

    let expr = lib.make_expression();
    expr.matrix_reduce(&s, None, None, &plus(), &a, None)?;
    expr.submit_wait()?;

    assert!(!s.has_value());
    Ok(())
}

#[test]
fn test_scalar_ewise_add() -> Result<()> {
    let lib = library(2)?;
    let ctx = lib.context();
    let a = lib.make_scalar(Type::f32());
    let b = lib.make_scalar(Type::f32());
    let only_a = lib.make_scalar(Type::f32());
    let both = lib.make_scalar(Type::f32());

    let expr = lib.make_expression();
    expr.scalar_data_write(&a, &DataScalar::from_typed(ctx, 2.0f32), None)?;
    expr.scalar_ewise_add(&only_a, &plus(), &a, &b, None)?;
    expr.scalar_data_write(&b, &DataScalar::from_typed(ctx, 5.0f32), None)?;
    expr.scalar_ewise_add(&both, &plus(), &a, &b, None)?;
    expr.submit_wait()?;

    assert_eq!(only_a.get::<f32>()?, 2.0);
    assert_eq!(both.get::<f32>()?, 7.0);
    Ok(())
}

#[test]
fn test_vector_assign_with_complemented_mask() -> Result<()> {
    let lib = library(2)?;
    let mask = vector(&lib, 5, &[(1, 1.0), (3, 1.0)])?;
    let w = lib.make_vector(5, Type::f32())?;
    let s = lib.make_scalar(Type::f32());

    let expr = lib.make_expression();
    expr.scalar_data_write(&s, &DataScalar::from_typed(lib.context(), 7.0f32), None)?;
    let desc = Descriptor::new().with_mask_complement(true);
    expr.vector_assign(&w, Some(&mask), None, &s, Some(desc))?;
    expr.submit_wait()?;

    assert_eq!(vector_entries(&lib, &w)?, vec![(0, 7.0), (2, 7.0), (4, 7.0)]);
    Ok(())
}
