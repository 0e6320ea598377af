//! This module contains a patcher which adjusts memory permissions to patch read-only data

use std::mem::ManuallyDrop;

use region::Protection;
use thiserror::Error;
use tracing::error;

use super::{PatchGuard, Patcher};

/// Errors when using permission patching
#[derive(Debug, Error)]
pub enum PermissionError<E> {
    /// Error when setting memory protections
    #[error("Error setting memory protections: {0}")]
    ProtectionError(#[from] region::Error),
    /// Custom error type from the underlying patcher
    #[error("{0}")]
    CustomError(E),
}

/// This struct wraps patchers to allow them to write to memory that's normally unwritable, such as code.
/// It achieves this result by changing the memory permissions of the target memory, triggering the patch, and then reverting the permissions.
///
/// # Safety
///
/// `PermissionWrapper` relies on the size of the patch value to determine how many pages to change write permissions,
/// pairing `PermissionWrapper` with a patcher that writes more memory than the size of the patch is undefined behavior.
///
/// The `*mut u8` **MUST** be memory not tracked by Rust, or ensured that reading from and writing to data tracked by Rust will not trigger undefined behavior.
#[derive(Debug, Default, Clone, Copy)]
pub struct PermissionWrapper<P: Patcher> {
    /// Underlying patcher.
    patcher: P,
}
impl<P: Patcher> PermissionWrapper<P> {
    /// Creates a new PermissionWrapper
    pub fn new(patcher: P) -> Self {
        Self { patcher }
    }
}

unsafe impl<P: Patcher> Patcher for PermissionWrapper<P> {
    type Error = PermissionError<P::Error>;
    type Guard = PermissionWrapperGuard<P::Guard>;

    unsafe fn patch(&self, location: *mut u8, patch: &[u8]) -> Result<Self::Guard, Self::Error> {
        // previous protection comes back when `_guard` drops
        let _guard = region::protect_with_handle(location, patch.len(), Protection::all())?;
        self.patcher
            .patch(location, patch)
            .map(|g| PermissionWrapperGuard::guard(g, location, patch.len()))
            .map_err(PermissionError::CustomError)
    }
}

/// Permission guard for the underlying patch guard
pub struct PermissionWrapperGuard<G: PatchGuard> {
    /// Underlying patch guard for the wrapped patcher, dropped manually once the location is writable
    guard: ManuallyDrop<G>,
    /// Location of the patch
    location: *const u8,
    /// Length of the patch
    len: usize,
}
impl<G: PatchGuard> PermissionWrapperGuard<G> {
    /// Wrap a patcher's guard. When this guard is dropped, the underlying guard will also be dropped with its target location made writable
    fn guard(guard: G, location: *const u8, len: usize) -> Self {
        Self {
            guard: ManuallyDrop::new(guard),
            location,
            len,
        }
    }
    /// Get the underlying patch guard in case info is needed
    pub fn inner(&self) -> &G {
        &self.guard
    }
}
unsafe impl<G: PatchGuard> PatchGuard for PermissionWrapperGuard<G> {}

impl<G: PatchGuard> Drop for PermissionWrapperGuard<G> {
    fn drop(&mut self) {
        match unsafe { region::protect_with_handle(self.location, self.len, Protection::all()) } {
            Ok(_handle) => {
                // SAFETY: the guard is never touched again after this
                unsafe { ManuallyDrop::drop(&mut self.guard) };
            }
            Err(e) => {
                // restoring into unwritable memory would fault, leak the original bytes instead
                error!(
                    location = self.location as usize,
                    "unable to make patch writable for restore: {e}"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::slice;

    use region::Protection;

    use crate::patch::byte::BytePatcher;
    use crate::patch::mem::PermissionWrapper;
    use crate::patch::{PatchGuard, Patcher};

    /// Read-only data patched by [`test_perms`]
    static DATA: [u8; 4] = *b"1234";

    #[test]
    /// Test patch and revert functionality
    fn test_patch() {
        let mut data = vec![1u8, 2, 3, 4];
        let ptr = data.as_mut_ptr();

        let patcher = PermissionWrapper::new(BytePatcher);
        let patch = unsafe { patcher.patch(ptr, &[4, 3, 2, 1]).unwrap() };

        // make sure the data was actually changed
        assert_eq!(unsafe { slice::from_raw_parts(ptr, 4) }, [4, 3, 2, 1]);
        assert_eq!(patch.inner().original(), [1, 2, 3, 4]);

        // restore the patch
        patch.restore();

        // make sure the patch was restored
        assert_eq!(data, [1, 2, 3, 4]);
    }

    #[test]
    /// Tests to ensure permissions are actually set and reverted
    fn test_perms() {
        let ptr = DATA.as_ptr();
        let size = DATA.len();

        let read_only = || {
            for region in region::query_range(ptr, size).unwrap() {
                let region = region.unwrap();
                assert!(!region.is_guarded());
                assert_eq!(region.protection(), Protection::READ);
            }
        };
        read_only();

        // patch the static's data
        let patcher = PermissionWrapper::new(BytePatcher);
        let patch = unsafe { patcher.patch(ptr as *mut u8, &[4, 3, 2, 1]).unwrap() };

        // volatile so the compiler cannot assume the static is unchanged
        let first = unsafe { ptr.read_volatile() };
        assert_eq!(first, 4);

        // make sure permissions reverted correctly after the patch
        read_only();

        // restore the patch
        patch.restore();
        assert_eq!(unsafe { ptr.read_volatile() }, b'1');

        // make sure permissions were restored
        read_only();
    }
}
