//! Matrix, vector and scalar objects
//!
//! These are the operands of expression nodes. Matrices and vectors own a
//! tiled [`Storage`]; a vector is a single-column storage. A [`Scalar`]
//! holds at most one value: reductions over empty inputs leave it without
//! one, and reading it then reports `NoValue`.

use bytemuck::Pod;
use parking_lot::RwLock;

use crate::error::{TesseraError, TesseraResult};
use crate::object::{Context, Object, ObjectMeta, Ref};
use crate::storage::Storage;
use crate::types::Type;

/// Sparse `nrows x ncols` matrix
#[derive(Debug)]
pub struct Matrix {
    meta: ObjectMeta,
    ty: Type,
    storage: Storage,
}

impl Matrix {
    /// Create an empty matrix under `ctx`
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for zero dimensions.
    pub fn make(nrows: usize, ncols: usize, ty: Type, ctx: &Context) -> TesseraResult<Ref<Self>> {
        let storage = Storage::new(nrows, ncols, ctx.block_size(), ty.byte_size())?;
        Ok(Ref::new(Self {
            meta: ObjectMeta::new(ctx),
            ty,
            storage,
        }))
    }

    pub fn nrows(&self) -> usize {
        self.storage.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.storage.ncols()
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.nrows(), self.ncols())
    }

    pub fn ty(&self) -> &Type {
        &self.ty
    }

    pub fn nvals(&self) -> usize {
        self.storage.nvals()
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }
}

impl Object for Matrix {
    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }
}

/// Sparse vector of length `nrows`
#[derive(Debug)]
pub struct Vector {
    meta: ObjectMeta,
    ty: Type,
    storage: Storage,
}

impl Vector {
    /// Create an empty vector under `ctx`
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a zero length.
    pub fn make(nrows: usize, ty: Type, ctx: &Context) -> TesseraResult<Ref<Self>> {
        let storage = Storage::new(nrows, 1, ctx.block_size(), ty.byte_size())?;
        Ok(Ref::new(Self {
            meta: ObjectMeta::new(ctx),
            ty,
            storage,
        }))
    }

    pub fn nrows(&self) -> usize {
        self.storage.nrows()
    }

    pub fn ty(&self) -> &Type {
        &self.ty
    }

    pub fn nvals(&self) -> usize {
        self.storage.nvals()
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }
}

impl Object for Vector {
    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }
}

/// Single optional value
#[derive(Debug)]
pub struct Scalar {
    meta: ObjectMeta,
    ty: Type,
    value: RwLock<Option<Vec<u8>>>,
}

impl Scalar {
    /// Create a scalar without a value
    pub fn make(ty: Type, ctx: &Context) -> Ref<Self> {
        Ref::new(Self {
            meta: ObjectMeta::new(ctx),
            ty,
            value: RwLock::new(None),
        })
    }

    pub fn ty(&self) -> &Type {
        &self.ty
    }

    pub fn has_value(&self) -> bool {
        self.value.read().is_some()
    }

    /// Raw value bytes, `None` when unset
    pub fn value(&self) -> Option<Vec<u8>> {
        self.value.read().clone()
    }

    /// Store raw value bytes
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the width disagrees with the scalar type.
    pub fn set_value(&self, bytes: Vec<u8>) -> TesseraResult<()> {
        if bytes.len() != self.ty.byte_size() {
            return Err(TesseraError::invalid_argument(format!(
                "scalar of type {:?} cannot hold {} bytes",
                self.ty,
                bytes.len()
            )));
        }
        *self.value.write() = Some(bytes);
        Ok(())
    }

    pub fn clear_value(&self) {
        *self.value.write() = None;
    }

    /// Typed read of the current value
    ///
    /// # Errors
    ///
    /// `NoValue` when unset, `InvalidArgument` if `T` has the wrong width.
    pub fn get<T: Pod>(&self) -> TesseraResult<T> {
        let guard = self.value.read();
        let bytes = guard
            .as_ref()
            .ok_or_else(|| TesseraError::no_value(format!("scalar {} has no value", self.debug_name())))?;
        if bytes.len() != std::mem::size_of::<T>() {
            return Err(TesseraError::invalid_argument(format!(
                "scalar of type {:?} read as a {} byte value",
                self.ty,
                std::mem::size_of::<T>()
            )));
        }
        Ok(bytemuck::pod_read_unaligned(bytes))
    }
}

impl Object for Scalar {
    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LibraryConfig;

    #[test]
    fn test_matrix_uses_context_block_size() {
        let ctx = Context::new(LibraryConfig::default().with_block_size(2)).unwrap();
        let m = Matrix::make(5, 4, Type::f32(), &ctx).unwrap();
        assert_eq!(m.shape(), (5, 4));
        assert_eq!(m.storage().grid().block_rows(), 3);
        assert_eq!(m.storage().grid().block_cols(), 2);
        assert_eq!(m.nvals(), 0);
    }

    #[test]
    fn test_vector_is_single_column() {
        let ctx = Context::new(LibraryConfig::default().with_block_size(4)).unwrap();
        let v = Vector::make(10, Type::i32(), &ctx).unwrap();
        assert_eq!(v.storage().grid().block_rows(), 3);
        assert_eq!(v.storage().grid().block_cols(), 1);
    }

    #[test]
    fn test_scalar_value_lifecycle() {
        let ctx = Context::new(LibraryConfig::default()).unwrap();
        let s = Scalar::make(Type::f32(), &ctx);
        assert_eq!(
            s.get::<f32>().unwrap_err().status(),
            crate::error::Status::NoValue
        );
        s.set_value(2.5f32.to_ne_bytes().to_vec()).unwrap();
        assert_eq!(s.get::<f32>().unwrap(), 2.5);
        assert!(s.set_value(vec![0; 8]).is_err());
        s.clear_value();
        assert!(!s.has_value());
    }
}
