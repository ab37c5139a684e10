use std::fmt;

use half::f16;

/// Element types a tensor can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    /// One byte per element, zero is false. Storage only, no arithmetic.
    Boolean,
    /// 16-bit floating point (IEEE 754 half-precision, via the `half` crate).
    F16,
    /// 32-bit floating point.
    F32,
    /// 64-bit floating point.
    F64,
    /// 8-bit signed integer.
    I8,
    /// 32-bit signed integer.
    I32,
    /// 64-bit signed integer.
    I64,
    /// 8-bit unsigned integer.
    U8,
}

impl DType {
    /// Returns the size in bytes of a single element.
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DType::Boolean | DType::I8 | DType::U8 => 1,
            DType::F16 => 2,
            DType::F32 | DType::I32 => 4,
            DType::F64 | DType::I64 => 8,
        }
    }

    /// Returns true for the floating point types.
    pub fn is_real(&self) -> bool {
        matches!(self, DType::F16 | DType::F32 | DType::F64)
    }

    /// Returns true for the integer types. `Boolean` is neither real nor integral.
    pub fn is_integral(&self) -> bool {
        matches!(self, DType::I8 | DType::I32 | DType::I64 | DType::U8)
    }

    /// Returns true if arithmetic kernels accept this type.
    pub fn is_numeric(&self) -> bool {
        self.is_real() || self.is_integral()
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DType::Boolean => "boolean",
            DType::F16 => "f16",
            DType::F32 => "f32",
            DType::F64 => "f64",
            DType::I8 => "i8",
            DType::I32 => "i32",
            DType::I64 => "i64",
            DType::U8 => "u8",
        };
        write!(f, "{name}")
    }
}

/// Rust scalar types that map onto a numeric [`DType`].
///
/// `Pod` lets aligned byte buffers be viewed as typed slices without copies.
pub trait Element:
    bytemuck::Pod + num_traits::Num + Copy + Send + Sync + fmt::Debug + 'static
{
    const DTYPE: DType;
}

macro_rules! element {
    ($ty:ty, $dtype:expr) => {
        impl Element for $ty {
            const DTYPE: DType = $dtype;
        }
    };
}

element!(f16, DType::F16);
element!(f32, DType::F32);
element!(f64, DType::F64);
element!(i8, DType::I8);
element!(i32, DType::I32);
element!(i64, DType::I64);
element!(u8, DType::U8);
