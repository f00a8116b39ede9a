//! Caller-owned backing storage for externally mapped regions.

use std::sync::Arc;

use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};

/// Shared byte buffer a caller lends to the engine with `mem_map_external`.
///
/// The engine keeps a clone of the handle for as long as the mapping exists
/// and never frees the storage; the caller's clone stays valid after unmap
/// or session close and observes every write made by emulated code.
#[derive(Debug, Clone)]
pub struct ExternalBuffer {
    bytes: Arc<Mutex<Box<[u8]>>>,
}

impl ExternalBuffer {
    /// Creates a zero-filled buffer of `len` bytes.
    #[must_use]
    pub fn zeroed(len: usize) -> Self {
        Self::from_vec(vec![0; len])
    }

    /// Wraps existing bytes.
    #[must_use]
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Arc::new(Mutex::new(bytes.into_boxed_slice())),
        }
    }

    /// Buffer length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.lock().len()
    }

    /// Returns `true` for a zero-length buffer.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Locks the buffer for direct access.
    ///
    /// The guard exposes the bytes but not the allocation, so the length a
    /// mapping was validated against never changes.
    pub fn lock(&self) -> MappedMutexGuard<'_, [u8]> {
        MutexGuard::map(self.bytes.lock(), |bytes| &mut **bytes)
    }

    /// Copies the current contents out.
    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        self.bytes.lock().to_vec()
    }

    /// Returns `true` when both handles share the same storage.
    #[must_use]
    pub fn same_storage(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.bytes, &other.bytes)
    }

    /// Number of live handles, the caller's included.
    #[must_use]
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.bytes)
    }

    pub(crate) fn read(&self, offset: usize, out: &mut [u8]) {
        let bytes = self.bytes.lock();
        out.copy_from_slice(&bytes[offset..offset + out.len()]);
    }

    pub(crate) fn write(&self, offset: usize, data: &[u8]) {
        let mut bytes = self.bytes.lock();
        bytes[offset..offset + data.len()].copy_from_slice(data);
    }
}
