//! The scope lattice: declarative processor sets and their meet.
//!
//! A [`Scope`] is an immutable value describing the set of processors on
//! which a computation or a materialized value may be placed. Scopes form a
//! lattice with [`Scope::Any`] at the top and the invalid scope at the
//! bottom; [`constrain`](crate::scope::constrain::constrain) is the meet.
//!
//! ```text
//! Any ⊐ Taint ⊐ Union ⊐ Node ⊐ Process ⊐ Exact
//!                                          ⊥ Invalid
//! ```
//!
//! # Modules
//!
//! - [`constrain`]: The meet operation and its fold
//! - [`taint`]: Deferred predicates resolved against concrete processors
//! - [`builder`]: Positional and keyword specification forms
//!
//! # Invariants
//!
//! Every constructor and every meet result maintains:
//!
//! - union children are non-empty, deduplicated, and never invalid;
//! - a taint set compares and hashes independent of insertion order;
//! - the node embedded in a process scope matches the worker's node;
//! - an exact scope's processor lives on the worker of its process scope.

pub mod builder;
pub mod constrain;
pub mod taint;

use crate::processor::Processor;
use crate::types::{NodeUuid, ProcessorTag, WorkerId};
use core::fmt;
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};

pub use taint::Taint;

/// Any processor on a named host.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeScope {
    uuid: NodeUuid,
}

impl NodeScope {
    /// Creates a node scope.
    #[must_use]
    pub const fn new(uuid: NodeUuid) -> Self {
        Self { uuid }
    }

    /// The host this scope names.
    #[must_use]
    pub const fn uuid(self) -> NodeUuid {
        self.uuid
    }
}

impl fmt::Display for NodeScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node({})", self.uuid)
    }
}

/// Any processor on a named worker.
///
/// The embedded node is redundant with the registry (`node.uuid ==
/// node_of(wid)`) but makes locality queries possible without a registry
/// dereference. Equality deliberately includes it; the builder guarantees
/// the invariant at construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ProcessScope {
    node: NodeScope,
    wid: WorkerId,
}

impl ProcessScope {
    /// Creates a process scope. The caller is responsible for `node`
    /// matching the worker's actual host (the builder resolves it from the
    /// registry).
    #[must_use]
    pub const fn new(node: NodeScope, wid: WorkerId) -> Self {
        Self { node, wid }
    }

    /// The host of the worker.
    #[must_use]
    pub const fn node(self) -> NodeScope {
        self.node
    }

    /// The worker this scope names.
    #[must_use]
    pub const fn wid(self) -> WorkerId {
        self.wid
    }
}

impl fmt::Display for ProcessScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker({})", self.wid)
    }
}

/// Exactly one processor.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ExactScope {
    process: ProcessScope,
    proc: Processor,
}

impl ExactScope {
    /// Creates an exact scope.
    ///
    /// The processor must live on the worker of `process`; this is a
    /// programmer-error invariant, checked in debug builds.
    #[must_use]
    pub fn new(process: ProcessScope, proc: Processor) -> Self {
        debug_assert_eq!(proc.pid(), process.wid(), "processor on wrong worker");
        Self { process, proc }
    }

    /// The worker-level scope this processor belongs to.
    #[must_use]
    pub const fn process(&self) -> ProcessScope {
        self.process
    }

    /// The processor this scope names.
    #[must_use]
    pub const fn proc(&self) -> &Processor {
        &self.proc
    }
}

impl fmt::Display for ExactScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "exact({})", self.proc)
    }
}

/// A scope restricted by deferred predicates.
///
/// The taints stay pending until the meet narrows the inner scope to an
/// [`ExactScope`]; only then is a concrete processor available to evaluate
/// them against.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TaintScope {
    inner: Box<Scope>,
    taints: BTreeSet<Taint>,
}

impl TaintScope {
    /// The scope being restricted.
    #[must_use]
    pub fn inner(&self) -> &Scope {
        &self.inner
    }

    /// The pending predicates, in canonical order.
    #[must_use]
    pub const fn taints(&self) -> &BTreeSet<Taint> {
        &self.taints
    }
}

impl fmt::Display for TaintScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "taint({}", self.inner)?;
        for taint in &self.taints {
            write!(f, "; {taint}")?;
        }
        write!(f, ")")
    }
}

/// A scope matching any processor matched by at least one child.
///
/// Children keep the deterministic order the meet produced; semantically the
/// union is order-free, which is why the hash is commutative over children
/// and [`Scope::equivalent`] ignores the order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnionScope {
    children: Vec<Scope>,
}

impl UnionScope {
    /// The member scopes. Never empty, never invalid, no duplicates.
    #[must_use]
    pub fn children(&self) -> &[Scope] {
        &self.children
    }
}

impl Hash for UnionScope {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_usize(self.children.len());
        // Commutative combine: the union is order-free even though the
        // stored order is stabilized for readability.
        let mut acc: u64 = 0;
        for child in &self.children {
            let mut hasher = DefaultHasher::new();
            child.hash(&mut hasher);
            acc = acc.wrapping_add(hasher.finish());
        }
        state.write_u64(acc);
    }
}

impl fmt::Display for UnionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "union(")?;
        for (i, child) in self.children.iter().enumerate() {
            if i > 0 {
                write!(f, " | ")?;
            }
            write!(f, "{child}")?;
        }
        write!(f, ")")
    }
}

/// Terminal result of a failed meet.
///
/// Carries the two conflicting inputs for diagnostics. Equality and hashing
/// are symmetric in the two fields; the stored order is the call order.
#[derive(Clone, Debug)]
pub struct InvalidScope {
    left: Box<Scope>,
    right: Box<Scope>,
}

impl InvalidScope {
    /// One conflicting input.
    #[must_use]
    pub fn left(&self) -> &Scope {
        &self.left
    }

    /// The other conflicting input.
    #[must_use]
    pub fn right(&self) -> &Scope {
        &self.right
    }
}

impl PartialEq for InvalidScope {
    fn eq(&self, other: &Self) -> bool {
        (self.left == other.left && self.right == other.right)
            || (self.left == other.right && self.right == other.left)
    }
}

impl Eq for InvalidScope {}

impl Hash for InvalidScope {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Symmetric equality needs a commutative hash over the pair.
        let mut acc: u64 = 0;
        for side in [&self.left, &self.right] {
            let mut hasher = DefaultHasher::new();
            side.hash(&mut hasher);
            acc = acc.wrapping_add(hasher.finish());
        }
        state.write_u64(acc);
    }
}

impl fmt::Display for InvalidScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid({}, {})", self.left, self.right)
    }
}

/// A declarative set of processors, as a sealed lattice value.
///
/// Produced by the [`builder`](crate::scope::builder::ScopeBuilder) or by
/// the meet; immutable and cheap to clone.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Every processor matches.
    Any,
    /// Inner scope restricted by deferred predicates.
    Taint(TaintScope),
    /// At least one child matches.
    Union(UnionScope),
    /// Any processor on a host.
    Node(NodeScope),
    /// Any processor on a worker.
    Process(ProcessScope),
    /// Exactly one processor.
    Exact(ExactScope),
    /// A failed meet. Never a legal input to further meets.
    Invalid(InvalidScope),
}

impl Scope {
    /// The scope of all default-enabled processors.
    #[must_use]
    pub fn default_scope() -> Self {
        Self::tainted(Self::Any, [Taint::DefaultEnabled])
    }

    /// The scope of all processors of one registered variant.
    #[must_use]
    pub fn processor_type(tag: ProcessorTag) -> Self {
        Self::tainted(Self::Any, [Taint::ProcessorType(tag)])
    }

    /// Restricts `inner` by the given taints.
    ///
    /// Tainting an already-tainted scope merges the taint sets, keeping the
    /// nesting depth at one.
    #[must_use]
    pub fn tainted(inner: Self, taints: impl IntoIterator<Item = Taint>) -> Self {
        let mut set: BTreeSet<Taint> = taints.into_iter().collect();
        let inner = match inner {
            Self::Taint(existing) => {
                set.extend(existing.taints.iter().cloned());
                *existing.inner
            }
            other => other,
        };
        Self::Taint(TaintScope {
            inner: Box::new(inner),
            taints: set,
        })
    }

    /// A node-level scope.
    #[must_use]
    pub const fn node(uuid: NodeUuid) -> Self {
        Self::Node(NodeScope::new(uuid))
    }

    /// The terminal invalid scope recording two conflicting inputs.
    #[must_use]
    pub fn invalid(left: Self, right: Self) -> Self {
        Self::Invalid(InvalidScope {
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    /// Builds a union, enforcing the union invariants.
    ///
    /// Invalid children are dropped, duplicates are removed keeping first
    /// occurrence, and a singleton collapses to its sole child. Returns
    /// `None` when nothing is left.
    #[must_use]
    pub fn union_of(children: impl IntoIterator<Item = Self>) -> Option<Self> {
        let mut kept: Vec<Self> = Vec::new();
        for child in children {
            if child.is_invalid() || kept.contains(&child) {
                continue;
            }
            kept.push(child);
        }
        match kept.len() {
            0 => None,
            1 => kept.pop(),
            _ => Some(Self::Union(UnionScope { children: kept })),
        }
    }

    /// Whether this is the invalid scope.
    #[must_use]
    pub const fn is_invalid(&self) -> bool {
        matches!(self, Self::Invalid(_))
    }

    /// Whether this scope may participate in further meets.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        !self.is_invalid()
    }

    /// Structural equality ignoring union child order, recursively.
    ///
    /// This is the `~` relation of the algebraic laws: the meet stabilizes
    /// union order for determinism, but the union itself is order-free.
    #[must_use]
    pub fn equivalent(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Union(a), Self::Union(b)) => {
                if a.children.len() != b.children.len() {
                    return false;
                }
                let mut used = vec![false; b.children.len()];
                'next: for child in &a.children {
                    for (i, candidate) in b.children.iter().enumerate() {
                        if !used[i] && child.equivalent(candidate) {
                            used[i] = true;
                            continue 'next;
                        }
                    }
                    return false;
                }
                true
            }
            (Self::Taint(a), Self::Taint(b)) => {
                a.taints == b.taints && a.inner.equivalent(&b.inner)
            }
            (Self::Invalid(a), Self::Invalid(b)) => {
                (a.left.equivalent(&b.left) && a.right.equivalent(&b.right))
                    || (a.left.equivalent(&b.right) && a.right.equivalent(&b.left))
            }
            _ => self == other,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "any"),
            Self::Taint(s) => write!(f, "{s}"),
            Self::Union(s) => write!(f, "{s}"),
            Self::Node(s) => write!(f, "{s}"),
            Self::Process(s) => write!(f, "{s}"),
            Self::Exact(s) => write!(f, "{s}"),
            Self::Invalid(s) => write!(f, "{s}"),
        }
    }
}
