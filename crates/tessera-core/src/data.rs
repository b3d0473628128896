//! Host staging buffers
//!
//! `DataMatrix`, `DataVector` and `DataScalar` are caller-owned row/col/value
//! arrays that DataWrite nodes read from and DataRead nodes fill. Input order
//! is arbitrary; DataRead always produces entries sorted by `(row, col)`.

use bytemuck::Pod;
use parking_lot::Mutex;

use crate::error::{TesseraError, TesseraResult};
use crate::object::{Context, Object, ObjectMeta, Ref};
use crate::types::{values_as, values_to_bytes};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct Entries {
    rows: Vec<u32>,
    cols: Vec<u32>,
    vals: Vec<u8>,
}

/// Staging buffer of matrix entries
#[derive(Debug)]
pub struct DataMatrix {
    meta: ObjectMeta,
    entries: Mutex<Entries>,
}

impl DataMatrix {
    /// Empty buffer, typically the target of a DataRead
    pub fn make(ctx: &Context) -> Ref<Self> {
        Ref::new(Self {
            meta: ObjectMeta::new(ctx),
            entries: Mutex::new(Entries::default()),
        })
    }

    /// Buffer over raw entries
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `rows` and `cols` differ in length.
    pub fn from_parts(ctx: &Context, rows: Vec<u32>, cols: Vec<u32>, vals: Vec<u8>) -> TesseraResult<Ref<Self>> {
        if rows.len() != cols.len() {
            return Err(TesseraError::invalid_argument(format!(
                "{} row indices but {} column indices",
                rows.len(),
                cols.len()
            )));
        }
        let data = Self::make(ctx);
        *data.entries.lock() = Entries { rows, cols, vals };
        Ok(data)
    }

    /// Buffer over typed values
    pub fn from_typed<T: Pod>(ctx: &Context, rows: Vec<u32>, cols: Vec<u32>, vals: &[T]) -> TesseraResult<Ref<Self>> {
        if vals.len() != rows.len() {
            return Err(TesseraError::invalid_argument(format!(
                "{} coordinates but {} values",
                rows.len(),
                vals.len()
            )));
        }
        Self::from_parts(ctx, rows, cols, values_to_bytes(vals))
    }

    /// Structure-only buffer
    pub fn from_structure(ctx: &Context, rows: Vec<u32>, cols: Vec<u32>) -> TesseraResult<Ref<Self>> {
        Self::from_parts(ctx, rows, cols, Vec::new())
    }

    pub fn nvals(&self) -> usize {
        self.entries.lock().rows.len()
    }

    /// Copy of `(rows, cols, vals)`
    pub fn parts(&self) -> (Vec<u32>, Vec<u32>, Vec<u8>) {
        let e = self.entries.lock();
        (e.rows.clone(), e.cols.clone(), e.vals.clone())
    }

    /// Replace the content
    pub fn set_parts(&self, rows: Vec<u32>, cols: Vec<u32>, vals: Vec<u8>) {
        *self.entries.lock() = Entries { rows, cols, vals };
    }

    /// Typed copy of the content
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the value buffer does not decode as `T`.
    pub fn to_typed<T: Pod>(&self) -> TesseraResult<(Vec<u32>, Vec<u32>, Vec<T>)> {
        let (rows, cols, vals) = self.parts();
        let vals = decode::<T>(&vals, rows.len())?;
        Ok((rows, cols, vals))
    }
}

impl Object for DataMatrix {
    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }
}

/// Staging buffer of vector entries
#[derive(Debug)]
pub struct DataVector {
    meta: ObjectMeta,
    entries: Mutex<Entries>,
}

impl DataVector {
    pub fn make(ctx: &Context) -> Ref<Self> {
        Ref::new(Self {
            meta: ObjectMeta::new(ctx),
            entries: Mutex::new(Entries::default()),
        })
    }

    pub fn from_parts(ctx: &Context, rows: Vec<u32>, vals: Vec<u8>) -> Ref<Self> {
        let data = Self::make(ctx);
        data.set_parts(rows, vals);
        data
    }

    /// Buffer over typed values
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the lengths differ.
    pub fn from_typed<T: Pod>(ctx: &Context, rows: Vec<u32>, vals: &[T]) -> TesseraResult<Ref<Self>> {
        if vals.len() != rows.len() {
            return Err(TesseraError::invalid_argument(format!(
                "{} coordinates but {} values",
                rows.len(),
                vals.len()
            )));
        }
        Ok(Self::from_parts(ctx, rows, values_to_bytes(vals)))
    }

    pub fn nvals(&self) -> usize {
        self.entries.lock().rows.len()
    }

    /// Copy of `(rows, vals)`
    pub fn parts(&self) -> (Vec<u32>, Vec<u8>) {
        let e = self.entries.lock();
        (e.rows.clone(), e.vals.clone())
    }

    pub fn set_parts(&self, rows: Vec<u32>, vals: Vec<u8>) {
        let cols = vec![0; rows.len()];
        *self.entries.lock() = Entries { rows, cols, vals };
    }

    pub fn to_typed<T: Pod>(&self) -> TesseraResult<(Vec<u32>, Vec<T>)> {
        let (rows, vals) = self.parts();
        let vals = decode::<T>(&vals, rows.len())?;
        Ok((rows, vals))
    }
}

impl Object for DataVector {
    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }
}

/// Staging buffer of a single optional value
#[derive(Debug)]
pub struct DataScalar {
    meta: ObjectMeta,
    value: Mutex<Option<Vec<u8>>>,
}

impl DataScalar {
    pub fn make(ctx: &Context) -> Ref<Self> {
        Ref::new(Self {
            meta: ObjectMeta::new(ctx),
            value: Mutex::new(None),
        })
    }

    pub fn from_typed<T: Pod>(ctx: &Context, value: T) -> Ref<Self> {
        let data = Self::make(ctx);
        data.set(Some(bytemuck::bytes_of(&value).to_vec()));
        data
    }

    pub fn get(&self) -> Option<Vec<u8>> {
        self.value.lock().clone()
    }

    pub fn set(&self, value: Option<Vec<u8>>) {
        *self.value.lock() = value;
    }

    /// Typed copy of the value
    ///
    /// # Errors
    ///
    /// `NoValue` when empty, `InvalidArgument` on a width mismatch.
    pub fn to_typed<T: Pod>(&self) -> TesseraResult<T> {
        let value = self
            .get()
            .ok_or_else(|| TesseraError::no_value("staging scalar is empty"))?;
        decode::<T>(&value, 1)?
            .pop()
            .ok_or_else(|| TesseraError::no_value("staging scalar is empty"))
    }
}

impl Object for DataScalar {
    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }
}

fn decode<T: Pod>(bytes: &[u8], count: usize) -> TesseraResult<Vec<T>> {
    if count == 0 && bytes.is_empty() {
        return Ok(Vec::new());
    }
    match values_as::<T>(bytes) {
        Some(vals) if vals.len() == count => Ok(vals),
        _ => Err(TesseraError::invalid_argument(format!(
            "{} value bytes do not hold {count} values of {} bytes",
            bytes.len(),
            std::mem::size_of::<T>()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LibraryConfig;

    #[test]
    fn test_matrix_typed_roundtrip() {
        let ctx = Context::new(LibraryConfig::default()).unwrap();
        let data = DataMatrix::from_typed(&ctx, vec![2, 0], vec![1, 0], &[1.0f64, 2.0]).unwrap();
        assert_eq!(data.nvals(), 2);
        let (rows, cols, vals) = data.to_typed::<f64>().unwrap();
        assert_eq!(rows, vec![2, 0]);
        assert_eq!(cols, vec![1, 0]);
        assert_eq!(vals, vec![1.0, 2.0]);
    }

    #[test]
    fn test_length_mismatch() {
        let ctx = Context::new(LibraryConfig::default()).unwrap();
        assert!(DataMatrix::from_parts(&ctx, vec![0], vec![], vec![]).is_err());
        assert!(DataVector::from_typed(&ctx, vec![0, 1], &[1i32]).is_err());
    }

    #[test]
    fn test_scalar_staging() {
        let ctx = Context::new(LibraryConfig::default()).unwrap();
        let s = DataScalar::make(&ctx);
        assert!(s.to_typed::<i32>().is_err());
        s.set(Some(7i32.to_ne_bytes().to_vec()));
        assert_eq!(s.to_typed::<i32>().unwrap(), 7);
        assert_eq!(DataScalar::from_typed(&ctx, 3u32).to_typed::<u32>().unwrap(), 3);
    }
}
