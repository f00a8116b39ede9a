//! Memory manager primitives: permissions, the region table, and external
//! backing buffers.

/// Permission bits, access kinds, and alignment validation.
pub mod access;
/// Caller-owned backing storage.
pub mod external;
/// Region table and byte transfers.
pub mod map;

pub use access::{validate_page_range, AccessFault, AccessKind, Permission};
pub use external::ExternalBuffer;
pub use map::{MemoryManager, Region};

/// Decodes up to eight bytes into an integer using the given byte order.
#[must_use]
pub fn bytes_to_value(bytes: &[u8], big_endian: bool) -> u64 {
    let fold = |acc: u64, byte: &u8| (acc << 8) | u64::from(*byte);
    let bytes = &bytes[..bytes.len().min(8)];
    if big_endian {
        bytes.iter().fold(0, fold)
    } else {
        bytes.iter().rev().fold(0, fold)
    }
}

/// Encodes the low `out.len()` bytes of `value` using the given byte order.
pub fn value_to_bytes(value: u64, big_endian: bool, out: &mut [u8]) {
    let le = value.to_le_bytes();
    let len = out.len().min(8);
    for (index, slot) in out.iter_mut().take(len).enumerate() {
        *slot = le[if big_endian { len - 1 - index } else { index }];
    }
}

#[cfg(test)]
mod tests {
    use super::{bytes_to_value, value_to_bytes};

    #[test]
    fn byte_order_is_respected() {
        assert_eq!(bytes_to_value(&[0x12, 0x34], true), 0x1234);
        assert_eq!(bytes_to_value(&[0x12, 0x34], false), 0x3412);

        let mut out = [0u8; 2];
        value_to_bytes(0xBEEF, true, &mut out);
        assert_eq!(out, [0xBE, 0xEF]);
        value_to_bytes(0xBEEF, false, &mut out);
        assert_eq!(out, [0xEF, 0xBE]);
    }
}
