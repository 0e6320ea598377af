//! # Scan
//!
//! Locates functions in executable memory by matching wildcard byte signatures

pub mod signature;

use std::slice;

use thiserror::Error;
use tracing::{debug, warn};

pub use signature::Signature;

/// Errors while parsing or locating signatures
#[derive(Debug, Error)]
pub enum ScanError {
    /// No match inside the scanned region
    #[error("no match for signature {0}")]
    NotFound(String),
    /// Signature text could not be parsed
    #[error("invalid signature: {0}")]
    InvalidPattern(String),
}

/// Finds the first offset in `region` where `signature` matches.
///
/// Wildcard positions always match. Never reads past the end of `region`.
pub fn locate(signature: &Signature, region: &[u8]) -> Result<usize, ScanError> {
    let len = signature.len();
    if len == 0 || len > region.len() {
        return Err(ScanError::NotFound(signature.to_string()));
    }
    let last_start = region.len() - len;

    let Some((anchor_at, anchor)) = signature.anchor() else {
        // all wildcards
        return Ok(0);
    };

    // candidate starts are the anchor hits shifted back by the anchor position
    let haystack = &region[anchor_at..=anchor_at + last_start];
    memchr::memchr_iter(anchor, haystack)
        .find(|&start| signature.matches(&region[start..start + len]))
        .ok_or_else(|| ScanError::NotFound(signature.to_string()))
}

/// Scanner over the executable text of a loaded module
pub struct Scanner<'a> {
    /// Executable bytes being scanned
    text: &'a [u8],
}

impl<'a> Scanner<'a> {
    /// Creates a scanner over a slice of executable memory
    pub fn new(text: &'a [u8]) -> Self {
        Self { text }
    }

    /// Creates a scanner over `len` bytes of executable memory starting at `base`
    ///
    /// # Safety
    ///
    /// `base` must be readable for `len` bytes for as long as the scanner is used
    pub unsafe fn from_raw(base: *const u8, len: usize) -> Scanner<'static> {
        Scanner {
            text: slice::from_raw_parts(base, len),
        }
    }

    /// Base address of the scanned region
    pub fn base(&self) -> usize {
        self.text.as_ptr() as usize
    }

    /// Locates `signature` and returns its absolute address.
    ///
    /// Signatures starting with a relative `call`/`jmp` resolve to the branch target.
    pub fn scan_text(&self, signature: &Signature) -> Result<usize, ScanError> {
        let offset = locate(signature, self.text)?;
        let address = self.base() + offset;
        if !signature.is_relative_branch() {
            return Ok(address);
        }

        let rel = self
            .text
            .get(offset + 1..offset + 5)
            .and_then(|b| b.try_into().ok())
            .map(i32::from_le_bytes)
            .ok_or_else(|| ScanError::NotFound(signature.to_string()))?;
        Ok((address + 5).wrapping_add_signed(rel as isize))
    }

    /// Like [`Scanner::scan_text`], but logs a labeled warning instead of failing
    pub fn try_scan(&self, label: &str, signature: &Signature) -> Option<usize> {
        match self.scan_text(signature) {
            Ok(address) => {
                debug!(label, "signature located at {address:#x}");
                Some(address)
            }
            Err(e) => {
                warn!(label, "{e}, disabling dependent feature");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Small function-prologue-like region used by the tests
    const REGION: [u8; 16] = [
        0x90, 0x48, 0x89, 0x5C, 0x24, 0x08, 0x57, 0x48, 0x83, 0xEC, 0x50, 0x48, 0x8B, 0x01, 0xC3,
        0x90,
    ];

    #[test]
    /// Present signatures are found at the right offset
    fn test_locate_present() {
        let sig: Signature = "48 89 5C 24 ?? 57".parse().unwrap();
        assert_eq!(locate(&sig, &REGION).unwrap(), 1);

        let sig: Signature = "48 8B 01 C3".parse().unwrap();
        assert_eq!(locate(&sig, &REGION).unwrap(), 11);
    }

    #[test]
    /// The first of several matches wins
    fn test_locate_first_match() {
        let sig: Signature = "48 ?? ??".parse().unwrap();
        assert_eq!(locate(&sig, &REGION).unwrap(), 1);
    }

    #[test]
    /// Absent signatures are never falsely matched
    fn test_locate_absent() {
        let sig: Signature = "48 89 5C 24 ?? 58".parse().unwrap();
        assert!(matches!(locate(&sig, &REGION), Err(ScanError::NotFound(_))));
    }

    #[test]
    /// Matches that would run past the region end are rejected
    fn test_locate_region_bound() {
        let sig: Signature = "C3 90 ??".parse().unwrap();
        assert!(locate(&sig, &REGION).is_err());
        let sig: Signature = "C3 90".parse().unwrap();
        assert_eq!(locate(&sig, &REGION).unwrap(), 14);
        // signature longer than the region
        let sig: Signature = "?? ".repeat(17).parse().unwrap();
        assert!(locate(&sig, &REGION).is_err());
    }

    #[test]
    /// Leading wildcards do not shift the reported offset
    fn test_locate_leading_wildcard() {
        let sig: Signature = "?? 57 48".parse().unwrap();
        assert_eq!(locate(&sig, &REGION).unwrap(), 5);
        // region[0] is also 0x90 but cannot start a match
        let sig: Signature = "?? 90".parse().unwrap();
        assert_eq!(locate(&sig, &REGION).unwrap(), 14);
    }

    #[test]
    /// Scanner returns absolute addresses
    fn test_scan_text_address() {
        let scanner = Scanner::new(&REGION);
        let sig: Signature = "57 48 83 EC".parse().unwrap();
        assert_eq!(scanner.scan_text(&sig).unwrap(), scanner.base() + 6);
    }

    #[test]
    /// Relative call signatures resolve to the call target
    fn test_scan_text_resolves_call() {
        // call +0x10 followed by a marker
        let code = [0x90, 0xE8, 0x10, 0x00, 0x00, 0x00, 0x45, 0x84, 0xF6];
        let scanner = Scanner::new(&code);
        let sig: Signature = "E8 ?? ?? ?? ?? 45 84 F6".parse().unwrap();
        assert_eq!(scanner.scan_text(&sig).unwrap(), scanner.base() + 1 + 5 + 0x10);

        // negative displacement
        let code = [0xE8, 0xF0, 0xFF, 0xFF, 0xFF, 0x41, 0x03, 0xED];
        let scanner = Scanner::new(&code);
        let sig: Signature = "E8 ?? ?? ?? ?? 41 03 ED".parse().unwrap();
        assert_eq!(scanner.scan_text(&sig).unwrap(), scanner.base() + 5 - 0x10);
    }

    #[test]
    /// Labeled scans turn misses into `None`
    fn test_try_scan() {
        let scanner = Scanner::new(&REGION);
        let sig: Signature = "FF FF FF".parse().unwrap();
        assert_eq!(scanner.try_scan("missing", &sig), None);
        let sig: Signature = "C3".parse().unwrap();
        assert_eq!(scanner.try_scan("ret", &sig), Some(scanner.base() + 14));
    }
}
