use std::fmt::Display;

/// The type tag stored in a snapshot header.
///
/// Memory snapshots use the tag as a bitmask, see [`SnapshotType::MEMORY`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct SnapshotType(pub i32);

impl SnapshotType {
    pub const UNKNOWN: Self = Self(0);
    pub const CPU: Self = Self(1);
    pub const CODE_FRAGMENT: Self = Self(2);
    pub const MEMORY_ALLOCATIONS: Self = Self(4);
    pub const MEMORY_LIVENESS: Self = Self(8);
    pub const MEMORY_SAMPLED: Self = Self(16);
    pub const CPU_JDBC: Self = Self(32);

    /// Any of the memory snapshot kinds.
    pub const MEMORY: Self =
        Self(Self::MEMORY_ALLOCATIONS.0 | Self::MEMORY_LIVENESS.0 | Self::MEMORY_SAMPLED.0);

    /// The raw tag.
    #[inline]
    pub fn tag(self) -> i32 {
        self.0
    }

    /// Is this one of the memory snapshot kinds?
    pub fn is_memory(self) -> bool {
        self.0 != 0 && self.0 & !Self::MEMORY.0 == 0
    }

    /// A human readable name, if this is a known tag.
    pub fn name(self) -> Option<&'static str> {
        match self {
            Self::UNKNOWN => Some("unknown"),
            Self::CPU => Some("CPU"),
            Self::CODE_FRAGMENT => Some("code fragment"),
            Self::MEMORY_ALLOCATIONS => Some("memory allocations"),
            Self::MEMORY_LIVENESS => Some("memory liveness"),
            Self::MEMORY_SAMPLED => Some("memory sampled"),
            Self::CPU_JDBC => Some("JDBC"),
            _ => None,
        }
    }
}

impl Display for SnapshotType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} ({name})", self.0),
            None => write!(f, "{}", self.0),
        }
    }
}

impl From<i32> for SnapshotType {
    fn from(tag: i32) -> Self {
        Self(tag)
    }
}

#[test]
fn memory_bitmask() {
    assert_eq!(SnapshotType::MEMORY.tag(), 28);
    assert!(SnapshotType::MEMORY_LIVENESS.is_memory());
    assert!(SnapshotType::MEMORY.is_memory());
    assert!(!SnapshotType::CPU.is_memory());
    assert!(!SnapshotType::UNKNOWN.is_memory());
    assert!(!SnapshotType(4 | 32).is_memory());
}

#[test]
fn display() {
    assert_eq!(SnapshotType::CPU.to_string(), "1 (CPU)");
    assert_eq!(SnapshotType(64).to_string(), "64");
}
