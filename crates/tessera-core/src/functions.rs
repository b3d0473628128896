//! Operator functions
//!
//! Operators work on raw element bytes so kernels stay type-agnostic. The
//! typed constructors wrap a Rust closure with `bytemuck` decoding and
//! encoding of the arguments.
//!
//! # Example
//!
//! ```
//! use tessera_core::functions::FunctionBinary;
//! use tessera_core::types::{values_to_bytes, Type};
//!
//! let plus = FunctionBinary::plus::<f32>(Type::f32());
//! let mut out = [0u8; 4];
//! plus.apply(&values_to_bytes(&[1.0f32]), &values_to_bytes(&[2.0f32]), &mut out);
//! assert_eq!(f32::from_ne_bytes(out), 3.0);
//! ```

use std::fmt;
use std::sync::Arc;

use bytemuck::Pod;
use scirs2_core::numeric::Num;

use crate::error::{TesseraError, TesseraResult};
use crate::types::Type;

type UnaryFn = dyn Fn(&[u8], &mut [u8]) + Send + Sync;
type BinaryFn = dyn Fn(&[u8], &[u8], &mut [u8]) + Send + Sync;
type SelectFn = dyn Fn(&[u8]) -> bool + Send + Sync;

fn check_width<T>(ty: &Type, role: &str) -> TesseraResult<()> {
    if ty.byte_size() != std::mem::size_of::<T>() {
        return Err(TesseraError::invalid_argument(format!(
            "{role} type {ty:?} does not match a {} byte Rust type",
            std::mem::size_of::<T>()
        )));
    }
    Ok(())
}

fn write_pod<T: Pod>(out: &mut [u8], value: T) {
    out.copy_from_slice(bytemuck::bytes_of(&value));
}

/// `r = f(a)`
#[derive(Clone)]
pub struct FunctionUnary {
    name: String,
    a: Type,
    r: Type,
    f: Arc<UnaryFn>,
}

impl FunctionUnary {
    /// Operator over raw element bytes
    pub fn from_bytes(
        name: &str,
        a: Type,
        r: Type,
        f: impl Fn(&[u8], &mut [u8]) + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.to_string(),
            a,
            r,
            f: Arc::new(f),
        }
    }

    /// Typed operator
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if a type width disagrees with the Rust type.
    pub fn new<A: Pod, R: Pod>(
        name: &str,
        a: Type,
        r: Type,
        f: impl Fn(A) -> R + Send + Sync + 'static,
    ) -> TesseraResult<Self> {
        check_width::<A>(&a, "argument")?;
        check_width::<R>(&r, "result")?;
        Ok(Self::from_bytes(name, a, r, move |x, out| {
            write_pod(out, f(bytemuck::pod_read_unaligned::<A>(x)))
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_a(&self) -> &Type {
        &self.a
    }

    pub fn type_r(&self) -> &Type {
        &self.r
    }

    #[inline]
    pub fn apply(&self, a: &[u8], out: &mut [u8]) {
        (self.f)(a, out)
    }
}

impl fmt::Debug for FunctionUnary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FunctionUnary({}: {} -> {})", self.name, self.a, self.r)
    }
}

/// `r = f(a, b)`
#[derive(Clone)]
pub struct FunctionBinary {
    name: String,
    a: Type,
    b: Type,
    r: Type,
    f: Arc<BinaryFn>,
}

impl FunctionBinary {
    /// Operator over raw element bytes
    pub fn from_bytes(
        name: &str,
        a: Type,
        b: Type,
        r: Type,
        f: impl Fn(&[u8], &[u8], &mut [u8]) + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.to_string(),
            a,
            b,
            r,
            f: Arc::new(f),
        }
    }

    /// Typed operator
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if a type width disagrees with the Rust type.
    pub fn new<A: Pod, B: Pod, R: Pod>(
        name: &str,
        a: Type,
        b: Type,
        r: Type,
        f: impl Fn(A, B) -> R + Send + Sync + 'static,
    ) -> TesseraResult<Self> {
        check_width::<A>(&a, "first argument")?;
        check_width::<B>(&b, "second argument")?;
        check_width::<R>(&r, "result")?;
        Ok(Self::from_bytes(name, a, b, r, move |x, y, out| {
            let value = f(
                bytemuck::pod_read_unaligned::<A>(x),
                bytemuck::pod_read_unaligned::<B>(y),
            );
            write_pod(out, value)
        }))
    }

    fn homogeneous<T: Pod>(name: &str, ty: Type, f: impl Fn(T, T) -> T + Send + Sync + 'static) -> Self {
        Self::from_bytes(name, ty.clone(), ty.clone(), ty, move |x, y, out| {
            let value = f(
                bytemuck::pod_read_unaligned::<T>(x),
                bytemuck::pod_read_unaligned::<T>(y),
            );
            write_pod(out, value)
        })
    }

    /// `a + b`; `ty` must describe `T`
    pub fn plus<T: Pod + Num>(ty: Type) -> Self {
        debug_assert_eq!(ty.byte_size(), std::mem::size_of::<T>());
        Self::homogeneous::<T>("plus", ty, |a, b| a + b)
    }

    /// `a - b`
    pub fn minus<T: Pod + Num>(ty: Type) -> Self {
        debug_assert_eq!(ty.byte_size(), std::mem::size_of::<T>());
        Self::homogeneous::<T>("minus", ty, |a, b| a - b)
    }

    /// `a * b`
    pub fn mult<T: Pod + Num>(ty: Type) -> Self {
        debug_assert_eq!(ty.byte_size(), std::mem::size_of::<T>());
        Self::homogeneous::<T>("mult", ty, |a, b| a * b)
    }

    pub fn min<T: Pod + PartialOrd>(ty: Type) -> Self {
        debug_assert_eq!(ty.byte_size(), std::mem::size_of::<T>());
        Self::homogeneous::<T>("min", ty, |a, b| if b < a { b } else { a })
    }

    pub fn max<T: Pod + PartialOrd>(ty: Type) -> Self {
        debug_assert_eq!(ty.byte_size(), std::mem::size_of::<T>());
        Self::homogeneous::<T>("max", ty, |a, b| if b > a { b } else { a })
    }

    /// Keep the first argument
    pub fn first(ty: Type) -> Self {
        Self::from_bytes("first", ty.clone(), ty.clone(), ty, |a, _, out| {
            out.copy_from_slice(a)
        })
    }

    /// Keep the second argument
    pub fn second(ty: Type) -> Self {
        Self::from_bytes("second", ty.clone(), ty.clone(), ty, |_, b, out| {
            out.copy_from_slice(b)
        })
    }

    /// Logical or over [`Type::bool`]
    pub fn lor() -> Self {
        Self::from_bytes("lor", Type::bool(), Type::bool(), Type::bool(), |a, b, out| {
            out[0] = u8::from(a[0] != 0 || b[0] != 0)
        })
    }

    /// Logical and over [`Type::bool`]
    pub fn land() -> Self {
        Self::from_bytes("land", Type::bool(), Type::bool(), Type::bool(), |a, b, out| {
            out[0] = u8::from(a[0] != 0 && b[0] != 0)
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_a(&self) -> &Type {
        &self.a
    }

    pub fn type_b(&self) -> &Type {
        &self.b
    }

    pub fn type_r(&self) -> &Type {
        &self.r
    }

    #[inline]
    pub fn apply(&self, a: &[u8], b: &[u8], out: &mut [u8]) {
        (self.f)(a, b, out)
    }

    /// Apply into a freshly allocated buffer
    pub fn apply_owned(&self, a: &[u8], b: &[u8]) -> Vec<u8> {
        let mut out = vec![0u8; self.r.byte_size()];
        self.apply(a, b, &mut out);
        out
    }
}

impl fmt::Debug for FunctionBinary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FunctionBinary({}: {} x {} -> {})",
            self.name, self.a, self.b, self.r
        )
    }
}

/// Predicate over an element value
#[derive(Clone)]
pub struct FunctionSelect {
    name: String,
    a: Type,
    f: Arc<SelectFn>,
}

impl FunctionSelect {
    pub fn from_bytes(name: &str, a: Type, f: impl Fn(&[u8]) -> bool + Send + Sync + 'static) -> Self {
        Self {
            name: name.to_string(),
            a,
            f: Arc::new(f),
        }
    }

    /// Typed predicate
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the type width disagrees with `A`.
    pub fn new<A: Pod>(
        name: &str,
        a: Type,
        f: impl Fn(A) -> bool + Send + Sync + 'static,
    ) -> TesseraResult<Self> {
        check_width::<A>(&a, "argument")?;
        Ok(Self::from_bytes(name, a, move |x| {
            f(bytemuck::pod_read_unaligned::<A>(x))
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_a(&self) -> &Type {
        &self.a
    }

    #[inline]
    pub fn test(&self, a: &[u8]) -> bool {
        (self.f)(a)
    }
}

impl fmt::Debug for FunctionSelect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FunctionSelect({}: {})", self.name, self.a)
    }
}
