//! Identifier types for cluster entities.
//!
//! These wrap raw integers with type safety so a worker id can never be
//! confused with a thread id or a processor-type tag. Display forms are
//! compact because they appear in every scheduling log line.

use core::fmt;

/// Identifies one OS process (worker) participating in the cluster.
///
/// Worker ids are assigned at cluster join and are unique for the lifetime
/// of the cluster. Two workers on the same physical host have distinct
/// worker ids but the same [`NodeUuid`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkerId(u64);

impl WorkerId {
    /// Creates a worker id from its raw value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WorkerId({})", self.0)
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "W{}", self.0)
    }
}

/// Identifies one OS thread local to a worker.
///
/// Thread ids are only meaningful relative to a [`WorkerId`]; the pair
/// `(pid, tid)` names a thread processor cluster-wide.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(u64);

impl ThreadId {
    /// Creates a thread id from its raw value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ThreadId({})", self.0)
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// Stable identifier of a physical (or virtual) host.
///
/// Equal across all workers running on the same host, which is what makes
/// node-level scopes possible without a registry lookup.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeUuid(u128);

impl NodeUuid {
    /// Creates a node uuid from its raw 128-bit value.
    #[must_use]
    pub const fn new(raw: u128) -> Self {
        Self(raw)
    }

    /// Returns the raw 128-bit value.
    #[must_use]
    pub const fn get(self) -> u128 {
        self.0
    }
}

impl fmt::Debug for NodeUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeUuid({:032x})", self.0)
    }
}

impl fmt::Display for NodeUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Truncated hex, enough to tell nodes apart in logs.
        write!(f, "Node-{:08x}", (self.0 >> 96) as u32)
    }
}

/// Opaque tag identifying a processor variant.
///
/// Tags below [`ProcessorTag::FIRST_USER`] are reserved for the built-in
/// variants; user tags are allocated by
/// [`Extensions::register_processor`](crate::extension::Extensions::register_processor)
/// at registration time. Tags are process-local; the wire form carries the
/// registered name instead, so peers need not agree on tag numbering.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessorTag(u32);

impl ProcessorTag {
    /// The built-in OS-process variant.
    pub const OS_PROC: Self = Self(0);
    /// The built-in thread variant.
    pub const THREAD_PROC: Self = Self(1);
    /// First tag available to user registrations.
    pub const FIRST_USER: Self = Self(16);

    /// Creates a tag from its raw value.
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Returns true for the reserved built-in range.
    #[must_use]
    pub const fn is_builtin(self) -> bool {
        self.0 < Self::FIRST_USER.0
    }
}

impl fmt::Debug for ProcessorTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProcessorTag({})", self.0)
    }
}

impl fmt::Display for ProcessorTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ptype:{}", self.0)
    }
}

/// Opaque tag identifying a taint variant, same scheme as [`ProcessorTag`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaintTag(u32);

impl TaintTag {
    /// The built-in default-enabled taint.
    pub const DEFAULT_ENABLED: Self = Self(0);
    /// The built-in processor-type taint.
    pub const PROCESSOR_TYPE: Self = Self(1);
    /// First tag available to user registrations.
    pub const FIRST_USER: Self = Self(16);

    /// Creates a tag from its raw value.
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Returns true for the reserved built-in range.
    #[must_use]
    pub const fn is_builtin(self) -> bool {
        self.0 < Self::FIRST_USER.0
    }
}

impl fmt::Debug for TaintTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaintTag({})", self.0)
    }
}

impl fmt::Display for TaintTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "taint:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_id_roundtrip() {
        let id = WorkerId::new(42);
        assert_eq!(id.get(), 42);
        assert_eq!(format!("{id}"), "W42");
        assert_eq!(format!("{id:?}"), "WorkerId(42)");
    }

    #[test]
    fn thread_id_display() {
        let id = ThreadId::new(3);
        assert_eq!(format!("{id}"), "T3");
    }

    #[test]
    fn node_uuid_display_truncates() {
        let uuid = NodeUuid::new(0xDEAD_BEEF_0000_0000_0000_0000_0000_0001);
        assert_eq!(format!("{uuid}"), "Node-deadbeef");
        assert_eq!(uuid.get(), 0xDEAD_BEEF_0000_0000_0000_0000_0000_0001);
    }

    #[test]
    fn tag_builtin_ranges() {
        assert!(ProcessorTag::OS_PROC.is_builtin());
        assert!(ProcessorTag::THREAD_PROC.is_builtin());
        assert!(!ProcessorTag::new(16).is_builtin());
        assert!(TaintTag::DEFAULT_ENABLED.is_builtin());
        assert!(!TaintTag::new(99).is_builtin());
    }

    #[test]
    fn ids_order_by_raw_value() {
        assert!(WorkerId::new(1) < WorkerId::new(2));
        assert!(ThreadId::new(0) < ThreadId::new(7));
    }
}
