//! Sequential reading of the big-endian fields used throughout a snapshot file.
//!
//! ```ignore
//!    byte     i8         Single signed byte
//!    int      i32        Big endian
//!    long     i32 + u32  High word (signed) followed by low word (unsigned)
//!    double   f64        IEEE-754, big endian
//!    boolean  u8         Any nonzero value is `true`
//!    UTF      u16 + [u8] Length prefixed UTF8 text
//! ```
//!
//! Note that a `long` is *not* a native 8 byte integer, see [`crate::packed`].

use crate::SnapshotType;
use crate::packed;
use byteorder::{BigEndian as BE, ByteOrder as _};

/// Errors that can happen when decoding a snapshot.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The input does not start with [`crate::MAGIC`].
    #[error("Missing file signature (not a NetBeans profiler snapshot?)")]
    BadSignature,

    /// The compressed payload could not be inflated.
    #[error("Failed to inflate snapshot payload: {0}")]
    CorruptPayload(#[source] std::io::Error),

    /// The inflated payload does not have the size declared in the header.
    #[error("Invalid uncompressed data length: expected {expected} bytes, got {actual}")]
    LengthMismatch {
        /// Size declared in the header.
        expected: usize,
        /// Bytes produced by inflating.
        /// Capped at `expected + 1`, since inflating stops as soon as the payload is too long.
        actual: usize,
    },

    /// No decoder is registered for this snapshot type.
    #[error("Snapshot type {0} is not yet supported")]
    UnsupportedSnapshotType(SnapshotType),

    /// A read went past the end of the buffer.
    #[error("Tried to read {len} bytes at offset {offset}, but the buffer is only {available} bytes")]
    OutOfBounds {
        /// Where the read started.
        offset: usize,
        /// How many bytes the read needed.
        len: usize,
        /// Size of the buffer being read.
        available: usize,
    },

    /// A length or count field was negative.
    #[error("Invalid length field: {0}")]
    InvalidLength(i32),

    /// A call tree node is reachable through more than one child pointer.
    #[error("Call tree node at offset {offset} is referenced more than once")]
    OffsetCycle {
        /// Offset of the node within the call tree buffer.
        offset: usize,
    },
}

/// Custom nps result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Reads big-endian fields from a byte buffer, front to back.
#[derive(Clone, Debug)]
pub struct Reader<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> Reader<'a> {
    /// Returns a reader that starts reading from the start of `bytes`.
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, position: 0 }
    }

    /// Current offset from the start of the buffer.
    #[inline]
    pub fn position(&self) -> usize {
        self.position
    }

    /// Move the cursor to an absolute offset.
    ///
    /// # Errors
    /// [`Error::OutOfBounds`] if `position` is past the end of the buffer.
    pub fn set_position(&mut self, position: usize) -> Result<()> {
        if position <= self.bytes.len() {
            self.position = position;
            Ok(())
        } else {
            Err(Error::OutOfBounds {
                offset: position,
                len: 0,
                available: self.bytes.len(),
            })
        }
    }

    /// Number of bytes left after the cursor.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.position
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let slice = self
            .position
            .checked_add(len)
            .and_then(|end| self.bytes.get(self.position..end));
        if let Some(slice) = slice {
            self.position += len;
            Ok(slice)
        } else {
            Err(Error::OutOfBounds {
                offset: self.position,
                len,
                available: self.bytes.len(),
            })
        }
    }

    /// # Errors
    /// [`Error::OutOfBounds`] at the end of the buffer.
    pub fn read_byte(&mut self) -> Result<i8> {
        let bytes = self.take(1)?;
        Ok(i8::from_be_bytes([bytes[0]]))
    }

    /// # Errors
    /// [`Error::OutOfBounds`] if fewer than 4 bytes remain.
    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(BE::read_i32(self.take(4)?))
    }

    /// Reads a `long`: a signed high word followed by an unsigned low word.
    ///
    /// # Errors
    /// [`Error::OutOfBounds`] if fewer than 8 bytes remain.
    pub fn read_i64_words(&mut self) -> Result<i64> {
        let bytes = self.take(8)?;
        Ok(packed::i64_from_words(
            BE::read_i32(&bytes[..4]),
            BE::read_u32(&bytes[4..]),
        ))
    }

    /// # Errors
    /// [`Error::OutOfBounds`] if fewer than 8 bytes remain.
    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(BE::read_f64(self.take(8)?))
    }

    /// # Errors
    /// [`Error::OutOfBounds`] at the end of the buffer.
    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_byte()? != 0)
    }

    /// Reads an `int` that describes the size of something that follows.
    ///
    /// # Errors
    /// [`Error::OutOfBounds`] if fewer than 4 bytes remain,
    /// [`Error::InvalidLength`] if the value is negative.
    pub fn read_len(&mut self) -> Result<usize> {
        let len = self.read_i32()?;
        usize::try_from(len).map_err(|_err| Error::InvalidLength(len))
    }

    /// Reads a `u16` length followed by that many bytes of text.
    ///
    /// # Errors
    /// [`Error::OutOfBounds`] if the text does not fit in what remains.
    pub fn read_utf(&mut self) -> Result<String> {
        let len = BE::read_u16(self.take(2)?);
        self.read_str(usize::from(len))
    }

    /// Borrow the next `len` bytes.
    ///
    /// # Errors
    /// [`Error::OutOfBounds`] if fewer than `len` bytes remain.
    pub fn read_slice(&mut self, len: usize) -> Result<&'a [u8]> {
        self.take(len)
    }

    /// Reads `len` bytes as text. Invalid UTF8 is replaced with `U+FFFD`.
    ///
    /// # Errors
    /// [`Error::OutOfBounds`] if fewer than `len` bytes remain.
    pub fn read_str(&mut self, len: usize) -> Result<String> {
        Ok(String::from_utf8_lossy(self.take(len)?).into_owned())
    }
}

#[test]
fn read_fixed_width() {
    let bytes = [
        0xff, // byte
        0x00, 0x00, 0x01, 0x00, // int
        0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x02, // long
        0x3f, 0xf8, 0, 0, 0, 0, 0, 0, // double
        0x02, // boolean
    ];
    let mut reader = Reader::new(&bytes);
    assert_eq!(reader.read_byte().unwrap(), -1);
    assert_eq!(reader.read_i32().unwrap(), 256);
    assert_eq!(reader.read_i64_words().unwrap(), (1 << 32) + 2);
    assert_eq!(reader.read_f64().unwrap(), 1.5);
    assert!(reader.read_bool().unwrap());
    assert_eq!(reader.remaining(), 0);
}

#[test]
fn read_long_with_negative_high_word() {
    let bytes = [0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xfe];
    assert_eq!(Reader::new(&bytes).read_i64_words().unwrap(), -2);
}

#[test]
fn read_strings() {
    let bytes = [0x00, 0x03, b'f', b'o', b'o', b'b', b'a', b'r', 0xc3];
    let mut reader = Reader::new(&bytes);
    assert_eq!(reader.read_utf().unwrap(), "foo");
    assert_eq!(reader.read_str(3).unwrap(), "bar");
    // A lone continuation byte is not valid UTF8:
    assert_eq!(reader.read_str(1).unwrap(), "\u{fffd}");
}

#[test]
fn reads_past_the_end_fail() {
    let bytes = [0x00, 0x00, 0x00];
    let mut reader = Reader::new(&bytes);
    assert!(matches!(
        reader.read_i32(),
        Err(Error::OutOfBounds {
            offset: 0,
            len: 4,
            available: 3
        })
    ));
    // The failed read did not move the cursor:
    assert_eq!(reader.position(), 0);
    assert!(matches!(
        reader.read_slice(usize::MAX),
        Err(Error::OutOfBounds { .. })
    ));
    assert!(reader.set_position(4).is_err());
}

#[test]
fn utf_length_beyond_buffer_fails() {
    let bytes = [0x00, 0x10, b'a'];
    assert!(matches!(
        Reader::new(&bytes).read_utf(),
        Err(Error::OutOfBounds { offset: 2, len: 16, .. })
    ));
}

#[test]
fn negative_length_is_rejected() {
    let bytes = (-5_i32).to_be_bytes();
    assert!(matches!(
        Reader::new(&bytes).read_len(),
        Err(Error::InvalidLength(-5))
    ));
}
