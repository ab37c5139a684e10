use std::ptr::NonNull;

use crate::dtype::{DType, Element};
use crate::error::{Result, TensorError};
use crate::shape::Shape;
use crate::storage::{AlignedBuffer, Storage};

/// A typed, shaped host buffer.
///
/// Holds contiguous, row-major data. Memory is either owned (allocated with a
/// backend-chosen alignment) or borrowed from the caller. Reads and writes go
/// through `&self`; the engine does not synchronise them, so callers must not
/// mutate a tensor while a call that reads it is in flight.
#[derive(Debug)]
pub struct Tensor {
    storage: Storage,
    shape: Shape,
    dtype: DType,
}

fn byte_size(dtype: DType, shape: &Shape, alignment: usize) -> Result<usize> {
    shape
        .checked_numel()
        .and_then(|n| n.checked_mul(dtype.size_in_bytes()))
        .ok_or(TensorError::Allocation {
            bytes: usize::MAX,
            alignment,
        })
}

impl Tensor {
    /// Allocate a zero-filled tensor.
    ///
    /// # Errors
    /// Returns `TensorError::Allocation` if the byte size overflows or the
    /// allocation fails.
    pub fn zeros(dtype: DType, shape: Shape, alignment: usize) -> Result<Self> {
        let bytes = byte_size(dtype, &shape, alignment)?;
        let buf = AlignedBuffer::zeroed(bytes, alignment)?;
        Ok(Tensor {
            storage: Storage::Owned(buf),
            shape,
            dtype,
        })
    }

    /// Allocate a tensor and fill it from `data`.
    pub fn from_slice<T: Element>(data: &[T], shape: Shape, alignment: usize) -> Result<Self> {
        let tensor = Tensor::zeros(T::DTYPE, shape, alignment)?;
        tensor.copy_from_slice(data)?;
        Ok(tensor)
    }

    /// Wrap caller-owned memory.
    ///
    /// # Safety
    /// `ptr` must be valid for reads and writes of
    /// `shape.numel() * dtype.size_in_bytes()` bytes for as long as the
    /// returned tensor, or anything it is bound to, is used.
    pub unsafe fn from_raw(dtype: DType, shape: Shape, ptr: *mut u8) -> Result<Self> {
        let ptr = NonNull::new(ptr).ok_or(TensorError::NullPointer)?;
        let len = byte_size(dtype, &shape, 1)?;
        Ok(Tensor {
            storage: Storage::External { ptr, len },
            shape,
            dtype,
        })
    }

    /// Returns a reference to the tensor's shape.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Returns the tensor's data type.
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn numel(&self) -> usize {
        self.shape.numel()
    }

    /// Size of the data in bytes, always `numel * dtype width`.
    pub fn size_in_bytes(&self) -> usize {
        self.storage.len()
    }

    /// True if the memory was allocated for this tensor.
    pub fn is_owned(&self) -> bool {
        self.storage.is_owned()
    }

    /// Raw pointer to the first byte, used when binding kernel arguments.
    pub fn as_ptr(&self) -> *mut u8 {
        self.storage.as_ptr()
    }

    fn check_range(&self, offset: usize, size: usize) -> Result<()> {
        let buffer_size = self.size_in_bytes();
        match offset.checked_add(size) {
            Some(end) if end <= buffer_size => Ok(()),
            _ => Err(TensorError::BufferBounds {
                offset,
                size,
                buffer_size,
            }),
        }
    }

    /// Copy `bytes` into the tensor starting at byte `offset`.
    ///
    /// # Errors
    /// Returns `TensorError::BufferBounds` if the range exceeds the tensor.
    pub fn write(&self, bytes: &[u8], offset: usize) -> Result<()> {
        self.check_range(offset, bytes.len())?;
        // SAFETY: range checked above; `bytes` cannot alias tensor memory
        // through a live `&mut`, and `copy` tolerates overlap anyway.
        unsafe {
            std::ptr::copy(bytes.as_ptr(), self.as_ptr().add(offset), bytes.len());
        }
        Ok(())
    }

    /// Copy bytes starting at `offset` out of the tensor into `bytes`.
    ///
    /// # Errors
    /// Returns `TensorError::BufferBounds` if the range exceeds the tensor.
    pub fn read(&self, bytes: &mut [u8], offset: usize) -> Result<()> {
        self.check_range(offset, bytes.len())?;
        // SAFETY: range checked above.
        unsafe {
            std::ptr::copy(self.as_ptr().add(offset), bytes.as_mut_ptr(), bytes.len());
        }
        Ok(())
    }

    /// Overwrite the whole tensor with `data`.
    ///
    /// # Errors
    /// Fails on a dtype mismatch or if `data` does not cover exactly the
    /// tensor's extent.
    pub fn copy_from_slice<T: Element>(&self, data: &[T]) -> Result<()> {
        self.expect_dtype(T::DTYPE)?;
        let bytes: &[u8] = bytemuck::cast_slice(data);
        if bytes.len() != self.size_in_bytes() {
            return Err(TensorError::BufferBounds {
                offset: 0,
                size: bytes.len(),
                buffer_size: self.size_in_bytes(),
            });
        }
        self.write(bytes, 0)
    }

    /// Read the whole tensor into a new vector.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        self.expect_dtype(T::DTYPE)?;
        let mut out = vec![T::zero(); self.numel()];
        self.read(bytemuck::cast_slice_mut(&mut out), 0)?;
        Ok(out)
    }

    fn expect_dtype(&self, dtype: DType) -> Result<()> {
        if self.dtype != dtype {
            return Err(TensorError::DTypeMismatch {
                expected: self.dtype,
                got: dtype,
            });
        }
        Ok(())
    }
}
