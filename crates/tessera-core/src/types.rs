//! Element types
//!
//! The engine treats element values as opaque fixed-size byte payloads. A
//! [`Type`] only records a name and a byte width; typed access goes through
//! `bytemuck` at the edges (staging buffers and operator constructors).
//!
//! A byte width of zero describes a structure-only type: blocks of such a
//! type store coordinates and no values.

use std::fmt;
use std::sync::Arc;

use bytemuck::Pod;

/// Opaque element type of a matrix, vector or scalar
#[derive(Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Type {
    name: Arc<str>,
    byte_size: usize,
}

impl Type {
    /// Register a type by name and byte width
    pub fn new(name: &str, byte_size: usize) -> Self {
        Self {
            name: Arc::from(name),
            byte_size,
        }
    }

    /// Type backed by the plain-old-data Rust type `T`
    pub fn of<T: Pod>(name: &str) -> Self {
        Self::new(name, std::mem::size_of::<T>())
    }

    /// Structure-only type without values
    pub fn void() -> Self {
        Self::new("void", 0)
    }

    /// One byte boolean (`0` = false)
    pub fn bool() -> Self {
        Self::new("bool", 1)
    }

    pub fn i32() -> Self {
        Self::of::<i32>("i32")
    }

    pub fn u32() -> Self {
        Self::of::<u32>("u32")
    }

    pub fn f32() -> Self {
        Self::of::<f32>("f32")
    }

    pub fn f64() -> Self {
        Self::of::<f64>("f64")
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn byte_size(&self) -> usize {
        self.byte_size
    }

    /// `false` for structure-only types
    pub fn has_values(&self) -> bool {
        self.byte_size > 0
    }
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.name, self.byte_size)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Reinterpret a packed value buffer as `T` values
///
/// Returns `None` if the buffer length is not a multiple of `size_of::<T>()`.
pub fn values_as<T: Pod>(bytes: &[u8]) -> Option<Vec<T>> {
    let width = std::mem::size_of::<T>();
    if width == 0 || bytes.len() % width != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(width)
            .map(bytemuck::pod_read_unaligned::<T>)
            .collect(),
    )
}

/// Pack `T` values into a byte buffer
pub fn values_to_bytes<T: Pod>(values: &[T]) -> Vec<u8> {
    bytemuck::cast_slice::<T, u8>(values).to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_widths() {
        assert_eq!(Type::f32().byte_size(), 4);
        assert_eq!(Type::f64().byte_size(), 8);
        assert_eq!(Type::bool().byte_size(), 1);
        assert!(!Type::void().has_values());
    }

    #[test]
    fn test_identity_by_name_and_width() {
        assert_eq!(Type::f32(), Type::of::<f32>("f32"));
        assert_ne!(Type::f32(), Type::u32());
    }

    #[test]
    fn test_value_packing() {
        let bytes = values_to_bytes(&[1.5f32, -2.0, 3.25]);
        assert_eq!(bytes.len(), 12);
        assert_eq!(values_as::<f32>(&bytes), Some(vec![1.5, -2.0, 3.25]));
        assert_eq!(values_as::<f64>(&bytes[..5]), None);
    }
}
