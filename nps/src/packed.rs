//! Integers the snapshot format stores in a non-native width.
//!
//! ```ignore
//!    long     hi: i32, lo: u32   hi * 2^32 + lo    Used by the sequential parts of a snapshot
//!    time     hi: u8,  lo: u32   hi * 2^32 + lo    Used by call tree nodes
//! ```
//!
//! Both are big-endian on disk. Call tree times are 40-bit: too large for a `u32`,
//! but storing them as 8 bytes would make every node 12 bytes bigger.

/// `2^32`, the weight of the high part of both packed forms.
pub const HIGH_WORD_FACTOR: i64 = 1 << 32;

/// The largest value a packed 40-bit time can hold.
pub const MAX_U40: u64 = (1 << 40) - 1;

/// Combine the two words of a `long`: `high * 2^32 + low`.
///
/// This can not overflow: `i32::MAX * 2^32 + u32::MAX` is `i64::MAX`.
#[inline]
pub fn i64_from_words(high: i32, low: u32) -> i64 {
    i64::from(high) * HIGH_WORD_FACTOR + i64::from(low)
}

/// Combine the two parts of a 40-bit time: `high * 2^32 + low`.
#[inline]
pub fn u40(high: u8, low: u32) -> u64 {
    (u64::from(high) << 32) | u64::from(low)
}

#[test]
fn u40_high_byte() {
    assert_eq!(u40(1, 0), 1 << 32);
    assert_eq!(u40(0, u32::MAX), u64::from(u32::MAX));
    assert_eq!(u40(u8::MAX, u32::MAX), MAX_U40);
}

#[test]
fn i64_words() {
    assert_eq!(i64_from_words(0, 7), 7);
    assert_eq!(i64_from_words(1, 0), 1 << 32);
    assert_eq!(i64_from_words(-1, u32::MAX), -1);
    assert_eq!(i64_from_words(i32::MAX, u32::MAX), i64::MAX);
    assert_eq!(i64_from_words(i32::MIN, 0), i64::MIN);
}
