//! The envelope around every snapshot file.
//!
//! ```ignore
//!    signature          [u8; 10]   "nBpRoFiLeR"
//!    version            i8, i8     Major, minor
//!    type               int        See `SnapshotType`
//!    compressed len     int
//!    uncompressed len   int
//!    payload            [u8] * compressed len, zlib compressed
//!    settings len       int
//!    settings           [u8] * settings len
//! ```
//!
//! Integers are big endian. How the payload is decoded depends on the type,
//! see [`crate::DecoderRegistry`].

use crate::{CpuSnapshot, DecoderRegistry, Error, Reader, Result, SnapshotType};
use std::io::Read as _;

/// Every snapshot file starts with this.
pub const MAGIC: &[u8; 10] = b"nBpRoFiLeR";

/// Don't trust the header further than this when preallocating the inflated payload.
const MAX_PREALLOCATED_PAYLOAD: usize = 64 * 1024 * 1024;

/// The decoded payload of a [`Container`].
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[non_exhaustive]
pub enum Snapshot {
    Cpu(CpuSnapshot),

    /// The inflated payload, as is.
    ///
    /// Produced by [`crate::keep_unparsed`] for snapshot types without a real decoder.
    Unparsed(Vec<u8>),
}

/// A decoded snapshot file.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Container {
    /// Major and minor version of the file format.
    pub version: [i8; 2],
    pub snapshot_type: SnapshotType,
    pub compressed_len: usize,
    pub uncompressed_len: usize,

    /// Profiler settings used for the snapshot, verbatim.
    pub settings: String,

    pub snapshot: Snapshot,
}

impl Container {
    /// Decode a snapshot file, supporting the snapshot types of [`DecoderRegistry::default`].
    ///
    /// # Errors
    /// See [`Self::decode_with`].
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Self::decode_with(bytes, &DecoderRegistry::default())
    }

    /// Decode a snapshot file, using `registry` to decode the payload.
    ///
    /// # Errors
    /// * [`Error::BadSignature`] if `bytes` is not a snapshot file.
    /// * [`Error::CorruptPayload`] if the payload can not be inflated.
    /// * [`Error::LengthMismatch`] if the inflated payload has an unexpected size.
    /// * [`Error::UnsupportedSnapshotType`] if `registry` has no decoder for the type.
    /// * [`Error::OutOfBounds`] and [`Error::InvalidLength`] if the file is truncated,
    ///   plus whatever the payload decoder returns.
    pub fn decode_with(bytes: &[u8], registry: &DecoderRegistry) -> Result<Self> {
        let mut reader = Reader::new(bytes);
        if reader.read_slice(MAGIC.len()).ok() != Some(MAGIC.as_slice()) {
            return Err(Error::BadSignature);
        }
        reader.set_position(MAGIC.len())?;

        let version = [reader.read_byte()?, reader.read_byte()?];
        let snapshot_type = SnapshotType(reader.read_i32()?);
        let compressed_len = reader.read_len()?;
        let uncompressed_len = reader.read_len()?;
        log::debug!(
            "Snapshot v{}.{} of type {snapshot_type}: {compressed_len} bytes compressed, {uncompressed_len} uncompressed",
            version[0],
            version[1]
        );

        let payload = inflate(reader.read_slice(compressed_len)?, uncompressed_len)?;

        let settings_len = reader.read_len()?;
        let settings = reader.read_str(settings_len)?;

        let decode = registry
            .get(snapshot_type)
            .ok_or(Error::UnsupportedSnapshotType(snapshot_type))?;
        let snapshot = decode(&payload)?;

        Ok(Self {
            version,
            snapshot_type,
            compressed_len,
            uncompressed_len,
            settings,
            snapshot,
        })
    }

    pub fn is_cpu(&self) -> bool {
        matches!(self.snapshot, Snapshot::Cpu(_))
    }

    /// The CPU snapshot, if this is one.
    pub fn cpu(&self) -> Option<&CpuSnapshot> {
        match &self.snapshot {
            Snapshot::Cpu(cpu) => Some(cpu),
            Snapshot::Unparsed(_) => None,
        }
    }
}

/// zlib-inflate `compressed`, which should yield exactly `expected_len` bytes.
///
/// Stops inflating once the output exceeds `expected_len`.
fn inflate(compressed: &[u8], expected_len: usize) -> Result<Vec<u8>> {
    let mut payload = Vec::with_capacity(expected_len.min(MAX_PREALLOCATED_PAYLOAD));
    let limit = u64::try_from(expected_len).map_or(u64::MAX, |len| len.saturating_add(1));
    flate2::read::ZlibDecoder::new(compressed)
        .take(limit)
        .read_to_end(&mut payload)
        .map_err(Error::CorruptPayload)?;

    if payload.len() == expected_len {
        Ok(payload)
    } else {
        Err(Error::LengthMismatch {
            expected: expected_len,
            actual: payload.len(),
        })
    }
}

#[cfg(test)]
fn zlib(bytes: &[u8]) -> Vec<u8> {
    use std::io::Write as _;
    let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(bytes).unwrap();
    encoder.finish().unwrap()
}

#[test]
fn inflate_exact_length() {
    let payload = b"hello hello hello hello";
    assert_eq!(inflate(&zlib(payload), payload.len()).unwrap(), payload);
}

#[test]
fn inflate_stops_past_expected_length() {
    let payload = vec![7_u8; 10_000];
    assert!(matches!(
        inflate(&zlib(&payload), 100),
        Err(Error::LengthMismatch {
            expected: 100,
            actual: 101
        })
    ));
    assert!(matches!(
        inflate(&zlib(&payload), 20_000),
        Err(Error::LengthMismatch {
            expected: 20_000,
            actual: 10_000
        })
    ));
}

#[test]
fn inflate_garbage() {
    assert!(matches!(
        inflate(b"definitely not zlib", 10),
        Err(Error::CorruptPayload(_))
    ));
}

#[test]
fn short_input_is_bad_signature() {
    assert!(matches!(
        Container::decode(b"nBpRo"),
        Err(Error::BadSignature)
    ));
    assert!(matches!(Container::decode(b""), Err(Error::BadSignature)));
}
