//! Deferred predicates and their evaluation.
//!
//! A taint is a predicate over processors that cannot be resolved when the
//! scope is built: `default_enabled` and type membership need the concrete
//! processor in hand. The meet carries taints unresolved until it reaches an
//! exact scope, then calls [`taint_match`] once per taint.
//!
//! Evaluation is pure: it reads nothing beyond the processor value and the
//! extension table. Eagerly resolving taints against the current processor
//! population would freeze cluster membership into the scope and break
//! composition, so there is deliberately no "expand this taint" operation.

use crate::extension::Extensions;
use crate::processor::Processor;
use crate::types::{ProcessorTag, TaintTag};
use core::fmt;
use std::sync::Arc;

/// A deferred predicate attached to a scope.
///
/// Ordered so taint sets have a canonical form; the order itself carries no
/// meaning.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Taint {
    /// Matches processors whose `default_enabled` verdict is true.
    DefaultEnabled,
    /// Matches processors of one concrete variant, payload ignored.
    ProcessorType(ProcessorTag),
    /// A user-registered predicate, dispatched through the extension table.
    Custom {
        /// The registered taint variant.
        tag: TaintTag,
        /// Opaque bytes handed to the matcher.
        payload: Arc<[u8]>,
    },
}

impl Taint {
    /// Creates a custom taint.
    #[must_use]
    pub fn custom(tag: TaintTag, payload: impl Into<Arc<[u8]>>) -> Self {
        Self::Custom {
            tag,
            payload: payload.into(),
        }
    }
}

impl fmt::Display for Taint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DefaultEnabled => write!(f, "default-enabled"),
            Self::ProcessorType(tag) => write!(f, "type({tag})"),
            Self::Custom { tag, .. } => write!(f, "custom({tag})"),
        }
    }
}

/// Evaluates one taint against one concrete processor.
///
/// Custom taints with an unregistered tag reject: a taint arriving from a
/// peer with a richer table must narrow the meet to invalid, never widen it.
#[must_use]
pub fn taint_match(taint: &Taint, proc: &Processor, extensions: &Extensions) -> bool {
    match taint {
        Taint::DefaultEnabled => proc.default_enabled(extensions),
        Taint::ProcessorType(tag) => proc.type_tag() == *tag,
        Taint::Custom { tag, payload } => extensions.taint_matches(*tag, payload, proc),
    }
}
