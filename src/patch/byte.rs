//! This module contains a byte patcher

use std::convert::Infallible;
use std::ptr;

use super::{PatchGuard, Patcher};

/// Patcher for patching memory locations with byte arrays.
/// This patcher never fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct BytePatcher;

unsafe impl Patcher for BytePatcher {
    type Error = Infallible;
    type Guard = BytePatchGuard;

    unsafe fn patch(&self, location: *mut u8, patch: &[u8]) -> Result<Self::Guard, Self::Error> {
        let mut original = vec![0u8; patch.len()];
        // Safety: caller must pass in a `location` pointer that is valid for the full length of the patch
        ptr::copy_nonoverlapping(location, original.as_mut_ptr(), patch.len());

        // Safety: caller must ensure that `location` is writable
        ptr::copy_nonoverlapping(patch.as_ptr(), location, patch.len());

        Ok(BytePatchGuard { original, location })
    }
}

/// Guard holding the bytes overwritten by a [`BytePatcher`]
pub struct BytePatchGuard {
    /// Original data from `location`
    original: Vec<u8>,
    /// Location of the patch
    location: *mut u8,
}
impl BytePatchGuard {
    /// Bytes that were at the location before patching
    pub fn original(&self) -> &[u8] {
        &self.original
    }
}
unsafe impl PatchGuard for BytePatchGuard {}

impl Drop for BytePatchGuard {
    fn drop(&mut self) {
        // Safety: creator must pass in a `location` pointer that is valid and writable for the full length of the patch
        unsafe {
            ptr::copy_nonoverlapping(self.original.as_ptr(), self.location, self.original.len());
        }
    }
}
