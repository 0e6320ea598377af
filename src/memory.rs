//! # Memory
//!
//! Raw reads and writes of foreign memory. Every address + offset access in the crate goes through here.
//!
//! Offsets are version specific configuration and are not validated; a wrong offset is a contract
//! violation of the caller, not a recoverable error.

use std::ptr;

use tracing::warn;

/// Reads bytes starting at `address` up to (excluding) the first zero byte.
///
/// A null `address` yields an empty vector.
///
/// # Safety
///
/// `address` must be null or point to readable memory containing a zero byte
pub unsafe fn read_terminated(address: *const u8) -> Vec<u8> {
    if address.is_null() {
        return Vec::new();
    }

    let mut len = 0;
    while *address.add(len) != 0 {
        len += 1;
    }
    std::slice::from_raw_parts(address, len).to_vec()
}

/// Reads a `T` at `base + offset`. The read does not need to be aligned.
///
/// # Safety
///
/// `base + offset` must be readable for `size_of::<T>()` bytes and hold a valid `T`
pub unsafe fn read_field<T: Copy>(base: usize, offset: usize) -> T {
    ptr::read_unaligned((base + offset) as *const T)
}

/// Writes `value` at `base + offset`. The write does not need to be aligned.
///
/// # Safety
///
/// `base + offset` must be writable for `size_of::<T>()` bytes
pub unsafe fn write_field<T: Copy>(base: usize, offset: usize, value: T) {
    ptr::write_unaligned((base + offset) as *mut T, value)
}

/// Reads a pointer-sized address stored at `base + offset`
///
/// # Safety
///
/// See [`read_field`]
pub unsafe fn read_pointer(base: usize, offset: usize) -> usize {
    read_field::<usize>(base, offset)
}

/// Copies `bytes` and appends the terminating zero native code expects.
///
/// Interior zero bytes would cut the string short on the native side, so they are dropped.
pub fn terminate(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len() + 1);
    out.extend(bytes.iter().copied().filter(|&b| b != 0));
    if out.len() != bytes.len() {
        warn!(
            dropped = bytes.len() - out.len(),
            "removed interior zero bytes from native string"
        );
    }
    out.push(0);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    /// Reads stop at the first zero byte
    fn test_read_terminated() {
        let data = b"Hello\0World\0";
        let read = unsafe { read_terminated(data.as_ptr()) };
        assert_eq!(read, b"Hello");

        let read = unsafe { read_terminated(data.as_ptr().add(6)) };
        assert_eq!(read, b"World");
    }

    #[test]
    /// Null and immediately terminated inputs are empty, not errors
    fn test_read_terminated_empty() {
        assert!(unsafe { read_terminated(ptr::null()) }.is_empty());
        assert!(unsafe { read_terminated(b"\0".as_ptr()) }.is_empty());
    }

    #[test]
    /// Typed fields are read and written at unaligned offsets
    fn test_fields() {
        let mut buf = [0u8; 16];
        let base = buf.as_mut_ptr() as usize;

        unsafe {
            write_field::<u32>(base, 1, 0xDEAD_BEEF);
            write_field::<u16>(base, 7, 0x1234);
            assert_eq!(read_field::<u32>(base, 1), 0xDEAD_BEEF);
            assert_eq!(read_field::<u16>(base, 7), 0x1234);
        }
        assert_eq!(&buf[1..5], &0xDEAD_BEEFu32.to_le_bytes());
        assert_eq!(buf[0], 0);
        assert_eq!(buf[9], 0);
    }

    #[test]
    /// Pointers stored in a struct are followed
    fn test_read_pointer() {
        let target = b"name\0";
        let mut holder = [0u8; 24];
        let base = holder.as_mut_ptr() as usize;
        unsafe {
            write_field(base, 8, target.as_ptr() as usize);
            let pointer = read_pointer(base, 8);
            assert_eq!(read_terminated(pointer as *const u8), b"name");
        }
    }

    #[test]
    /// Terminated copies end in exactly one zero byte
    fn test_terminate() {
        assert_eq!(terminate(b"abc"), b"abc\0");
        assert_eq!(terminate(b""), b"\0");
    }

    #[test]
    /// Interior zero bytes are removed so the whole text reaches native code
    fn test_terminate_interior_zero() {
        assert_eq!(terminate(b"a\0b"), b"ab\0");
        assert_eq!(terminate(b"\0\0"), b"\0");
    }
}
