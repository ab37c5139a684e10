use std::alloc::{self, Layout};
use std::ptr::NonNull;

use crate::dtype::Element;
use crate::error::{Result, TensorError};

/// A zero-initialised heap block with a caller-chosen alignment.
///
/// The alignment comes from the backend configuration rather than a global so
/// different backends can pick what their kernels need.
#[derive(Debug)]
pub struct AlignedBuffer {
    ptr: NonNull<u8>,
    len: usize,
    alignment: usize,
}

// SAFETY: the buffer uniquely owns its allocation; access goes through
// `&self`/`&mut self` or through raw pointers whose synchronisation is the
// caller's responsibility.
unsafe impl Send for AlignedBuffer {}
unsafe impl Sync for AlignedBuffer {}

impl AlignedBuffer {
    /// Allocate `len` zeroed bytes aligned to `alignment`.
    ///
    /// # Errors
    /// Returns `TensorError::Allocation` if `alignment` is not a power of two,
    /// the size overflows, or the allocator refuses the request.
    pub fn zeroed(len: usize, alignment: usize) -> Result<Self> {
        let layout = Layout::from_size_align(len, alignment)
            .map_err(|_| TensorError::Allocation { bytes: len, alignment })?;
        if len == 0 {
            // Zero-sized allocations are not allowed; an aligned dangling
            // pointer keeps typed empty views valid.
            let ptr = NonNull::new(alignment as *mut u8)
                .ok_or(TensorError::Allocation { bytes: len, alignment })?;
            return Ok(AlignedBuffer { ptr, len, alignment });
        }
        // SAFETY: layout has a non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or(TensorError::Allocation { bytes: len, alignment })?;
        Ok(AlignedBuffer { ptr, len, alignment })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn alignment(&self) -> usize {
        self.alignment
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr is valid for len bytes for the lifetime of self.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: ptr is valid for len bytes and we hold a unique borrow.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    /// View the bytes as elements of `T`.
    ///
    /// # Errors
    /// Returns an error if the length is not a multiple of `T`'s size or the
    /// alignment is too small for `T`.
    pub fn typed<T: Element>(&self) -> Result<&[T]> {
        bytemuck::try_cast_slice(self.as_slice())
            .map_err(|e| TensorError::Other(format!("cannot view buffer as {}: {e}", T::DTYPE)))
    }

    /// Mutable counterpart of [`AlignedBuffer::typed`].
    pub fn typed_mut<T: Element>(&mut self) -> Result<&mut [T]> {
        bytemuck::try_cast_slice_mut(self.as_mut_slice())
            .map_err(|e| TensorError::Other(format!("cannot view buffer as {}: {e}", T::DTYPE)))
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        if self.len == 0 {
            return;
        }
        // SAFETY: the same layout was used for the allocation in `zeroed`.
        unsafe {
            let layout = Layout::from_size_align_unchecked(self.len, self.alignment);
            alloc::dealloc(self.ptr.as_ptr(), layout);
        }
    }
}

/// Host memory behind a tensor.
#[derive(Debug)]
pub enum Storage {
    /// Allocated by a backend and freed when the tensor is dropped.
    Owned(AlignedBuffer),
    /// Caller memory; never freed here.
    External { ptr: NonNull<u8>, len: usize },
}

// SAFETY: see `AlignedBuffer`. External memory is promised by the caller to
// outlive the tensor and to be synchronised externally.
unsafe impl Send for Storage {}
unsafe impl Sync for Storage {}

impl Storage {
    /// Number of bytes in this storage.
    pub fn len(&self) -> usize {
        match self {
            Storage::Owned(buf) => buf.len(),
            Storage::External { len, .. } => *len,
        }
    }

    /// Returns true if the storage contains no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_owned(&self) -> bool {
        matches!(self, Storage::Owned(_))
    }

    pub fn as_ptr(&self) -> *mut u8 {
        match self {
            Storage::Owned(buf) => buf.as_ptr(),
            Storage::External { ptr, .. } => ptr.as_ptr(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeroed_is_aligned_and_zero() {
        let buf = AlignedBuffer::zeroed(100, 64).unwrap();
        assert_eq!(buf.len(), 100);
        assert_eq!(buf.as_ptr() as usize % 64, 0);
        assert!(buf.as_slice().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_zero_length() {
        let buf = AlignedBuffer::zeroed(0, 32).unwrap();
        assert!(buf.is_empty());
        assert!(buf.typed::<f64>().unwrap().is_empty());
    }

    #[test]
    fn test_bad_alignment() {
        let err = AlignedBuffer::zeroed(16, 3).unwrap_err();
        assert!(matches!(err, TensorError::Allocation { alignment: 3, .. }));
    }

    #[test]
    fn test_typed_views() {
        let mut buf = AlignedBuffer::zeroed(16, 16).unwrap();
        buf.typed_mut::<f32>().unwrap()[2] = 42.0;
        assert_eq!(buf.typed::<f32>().unwrap(), &[0.0, 0.0, 42.0, 0.0]);
        assert!(buf.typed::<f64>().is_ok());
    }

    #[test]
    fn test_external_storage_reports_len() {
        let mut backing = [0u8; 8];
        let ptr = NonNull::new(backing.as_mut_ptr()).unwrap();
        let s = Storage::External { ptr, len: backing.len() };
        assert_eq!(s.len(), 8);
        assert!(!s.is_owned());
    }
}
