use crate::{Result, Snapshot, SnapshotType, cpu};
use std::collections::BTreeMap;

/// Decodes the inflated payload of one snapshot type.
pub type DecodeFn = fn(&[u8]) -> Result<Snapshot>;

/// Which [`DecodeFn`] to use for which [`SnapshotType`].
///
/// The default registry only knows [`SnapshotType::CPU`].
/// Register more decoders to support other snapshot types:
///
/// ```
/// let mut registry = nps::DecoderRegistry::default();
/// registry.register(nps::SnapshotType::MEMORY_ALLOCATIONS, nps::keep_unparsed);
/// assert!(registry.contains(nps::SnapshotType::MEMORY_ALLOCATIONS));
/// ```
#[derive(Clone, Debug)]
pub struct DecoderRegistry {
    decoders: BTreeMap<SnapshotType, DecodeFn>,
}

impl Default for DecoderRegistry {
    fn default() -> Self {
        let mut registry = Self::new();
        registry.register(SnapshotType::CPU, cpu::decode_snapshot);
        registry
    }
}

impl DecoderRegistry {
    /// A registry without any decoders.
    pub fn new() -> Self {
        Self {
            decoders: BTreeMap::new(),
        }
    }

    /// Use `decode` for `snapshot_type`, replacing any previous decoder.
    pub fn register(&mut self, snapshot_type: SnapshotType, decode: DecodeFn) -> &mut Self {
        self.decoders.insert(snapshot_type, decode);
        self
    }

    pub fn get(&self, snapshot_type: SnapshotType) -> Option<DecodeFn> {
        self.decoders.get(&snapshot_type).copied()
    }

    pub fn contains(&self, snapshot_type: SnapshotType) -> bool {
        self.decoders.contains_key(&snapshot_type)
    }

    /// The types that have a decoder, in ascending order.
    pub fn snapshot_types(&self) -> impl Iterator<Item = SnapshotType> + '_ {
        self.decoders.keys().copied()
    }
}

/// A [`DecodeFn`] that keeps the payload as [`Snapshot::Unparsed`].
///
/// # Errors
/// Never fails.
pub fn keep_unparsed(payload: &[u8]) -> Result<Snapshot> {
    Ok(Snapshot::Unparsed(payload.to_vec()))
}

#[test]
fn default_registry() {
    let registry = DecoderRegistry::default();
    assert!(registry.contains(SnapshotType::CPU));
    assert!(!registry.contains(SnapshotType::MEMORY_SAMPLED));
    assert_eq!(
        registry.snapshot_types().collect::<Vec<_>>(),
        vec![SnapshotType::CPU]
    );
    assert!(DecoderRegistry::new().snapshot_types().next().is_none());
}

#[test]
fn register_replaces() {
    let mut registry = DecoderRegistry::default();
    registry.register(SnapshotType::CPU, keep_unparsed);
    let decode = registry.get(SnapshotType::CPU).unwrap();
    assert_eq!(decode(b"abc").unwrap(), Snapshot::Unparsed(b"abc".to_vec()));
}
