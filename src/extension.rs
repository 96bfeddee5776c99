//! Registration tables for user processor variants, taints, and scope keys.
//!
//! The scope and taint sum types are sealed so the core keeps exhaustive
//! matching; user extension happens through opaque tags dispatched against
//! these tables. Tables are append-only during normal operation: a
//! registration is publish-once (duplicate names are rejected) and removal
//! is only legal at teardown. Appends publish through the table's lock, so
//! every reader observes a registration made before its lookup.
//!
//! Like the registry, [`Extensions`] is an explicit value. The builder and
//! the meet both take it as a parameter; tests build isolated tables.

use crate::processor::{CustomProc, Processor};
use crate::registry::ProcessorRegistry;
use crate::scope::builder::{BuildError, NamedFields};
use crate::scope::Scope;
use crate::tracing_compat::debug;
use crate::types::{ProcessorTag, TaintTag, WorkerId};
use core::fmt;
use core::marker::PhantomData;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Well-known wire name of the built-in OS-process variant.
pub const OS_PROC_NAME: &str = "os";
/// Well-known wire name of the built-in thread variant.
pub const THREAD_PROC_NAME: &str = "thread";
/// Well-known wire name of the built-in default-enabled taint.
pub const DEFAULT_ENABLED_TAINT_NAME: &str = "default-enabled";
/// Well-known wire name of the built-in processor-type taint.
pub const PROCESSOR_TYPE_TAINT_NAME: &str = "processor-type";

/// Parent function for a custom processor variant.
pub type ParentFn = Arc<dyn Fn(&CustomProc) -> Processor + Send + Sync>;
/// Children function for a custom processor variant.
pub type ChildrenFn = Arc<dyn Fn(WorkerId) -> Vec<Processor> + Send + Sync>;
/// Matcher for a custom taint: payload bytes against a concrete processor.
pub type TaintMatchFn = Arc<dyn Fn(&[u8], &Processor) -> bool + Send + Sync>;
/// Handler for an extension scope key: full field set plus the registry.
pub type ScopeKeyFn =
    Arc<dyn Fn(&NamedFields, &ProcessorRegistry) -> Result<Scope, BuildError> + Send + Sync>;

/// Errors from registration calls.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtensionError {
    /// The name is already registered (registrations are publish-once).
    #[error("`{name}` is already registered")]
    Duplicate {
        /// The rejected name.
        name: String,
    },
    /// The name collides with a built-in.
    #[error("`{name}` is reserved")]
    Reserved {
        /// The rejected name.
        name: String,
    },
}

/// Error from a processor payload codec.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("payload codec: {reason}")]
pub struct CodecError {
    /// What went wrong.
    pub reason: String,
}

impl CodecError {
    /// Creates a codec error from any displayable cause.
    #[must_use]
    pub fn new(reason: impl fmt::Display) -> Self {
        Self {
            reason: reason.to_string(),
        }
    }
}

/// Wire codec for a custom processor variant's payload.
///
/// `encode` prepares the payload for transfer; `decode` validates incoming
/// bytes. The identity codec [`RawBytesCodec`] suits variants whose payload
/// is already a stable byte encoding.
pub trait ProcessorCodec: Send + Sync {
    /// Encodes an in-memory payload for the wire.
    fn encode(&self, payload: &[u8]) -> Result<Vec<u8>, CodecError>;

    /// Decodes and validates a wire payload.
    fn decode(&self, bytes: &[u8]) -> Result<Arc<[u8]>, CodecError>;
}

/// Identity payload codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawBytesCodec;

impl ProcessorCodec for RawBytesCodec {
    fn encode(&self, payload: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(payload.to_vec())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Arc<[u8]>, CodecError> {
        Ok(bytes.into())
    }
}

/// Payload codec that validates the payload as a JSON encoding of `T`.
///
/// Convenient for user processors whose payload is a plain serde type: the
/// payload bytes are the JSON body, and decode rejects anything that does
/// not parse as `T`.
pub struct SerdeProcessorCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> SerdeProcessorCodec<T> {
    /// Creates the codec.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for SerdeProcessorCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for SerdeProcessorCodec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerdeProcessorCodec").finish()
    }
}

impl<T: Serialize + DeserializeOwned> ProcessorCodec for SerdeProcessorCodec<T> {
    fn encode(&self, payload: &[u8]) -> Result<Vec<u8>, CodecError> {
        let value: T = serde_json::from_slice(payload).map_err(CodecError::new)?;
        serde_json::to_vec(&value).map_err(CodecError::new)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Arc<[u8]>, CodecError> {
        let _: T = serde_json::from_slice(bytes).map_err(CodecError::new)?;
        Ok(bytes.into())
    }
}

/// Registration request for a processor variant.
///
/// Move-based builder: `ProcessorSpec::new("cuda", false).with_codec(…)`.
pub struct ProcessorSpec {
    name: String,
    default_enabled: bool,
    parent: Option<ParentFn>,
    children: Option<ChildrenFn>,
    codec: Arc<dyn ProcessorCodec>,
}

impl ProcessorSpec {
    /// Creates a spec with the identity payload codec and no navigation
    /// functions.
    #[must_use]
    pub fn new(name: impl Into<String>, default_enabled: bool) -> Self {
        Self {
            name: name.into(),
            default_enabled,
            parent: None,
            children: None,
            codec: Arc::new(RawBytesCodec),
        }
    }

    /// Supplies a parent function (defaults to the hosting OS process).
    #[must_use]
    pub fn with_parent(
        mut self,
        parent: impl Fn(&CustomProc) -> Processor + Send + Sync + 'static,
    ) -> Self {
        self.parent = Some(Arc::new(parent));
        self
    }

    /// Supplies a children function (defaults to none).
    #[must_use]
    pub fn with_children(
        mut self,
        children: impl Fn(WorkerId) -> Vec<Processor> + Send + Sync + 'static,
    ) -> Self {
        self.children = Some(Arc::new(children));
        self
    }

    /// Supplies a payload codec.
    #[must_use]
    pub fn with_codec(mut self, codec: impl ProcessorCodec + 'static) -> Self {
        self.codec = Arc::new(codec);
        self
    }
}

impl fmt::Debug for ProcessorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorSpec")
            .field("name", &self.name)
            .field("default_enabled", &self.default_enabled)
            .finish()
    }
}

/// Registration request for a taint variant.
pub struct TaintSpec {
    name: String,
    matcher: TaintMatchFn,
}

impl TaintSpec {
    /// Creates a spec from a name and a matcher.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        matcher: impl Fn(&[u8], &Processor) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            matcher: Arc::new(matcher),
        }
    }
}

impl fmt::Debug for TaintSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaintSpec").field("name", &self.name).finish()
    }
}

struct RegisteredProcessor {
    name: String,
    default_enabled: bool,
    parent: Option<ParentFn>,
    children: Option<ChildrenFn>,
    codec: Arc<dyn ProcessorCodec>,
}

struct RegisteredTaint {
    name: String,
    matcher: TaintMatchFn,
}

struct ScopeKeyEntry {
    precedence: i32,
    handler: ScopeKeyFn,
}

#[derive(Default)]
struct ExtInner {
    processors: BTreeMap<ProcessorTag, RegisteredProcessor>,
    processor_names: BTreeMap<String, ProcessorTag>,
    next_processor: u32,
    taints: BTreeMap<TaintTag, RegisteredTaint>,
    taint_names: BTreeMap<String, TaintTag>,
    next_taint: u32,
    scope_keys: BTreeMap<String, ScopeKeyEntry>,
}

/// The extension tables: processor variants, taints, scope keys.
///
/// Cheap to clone; clones share the same underlying tables.
#[derive(Clone, Default)]
pub struct Extensions {
    inner: Arc<RwLock<ExtInner>>,
}

impl Extensions {
    /// Creates empty tables (built-ins need no registration).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a processor variant, allocating its tag.
    pub fn register_processor(&self, spec: ProcessorSpec) -> Result<ProcessorTag, ExtensionError> {
        if spec.name == OS_PROC_NAME || spec.name == THREAD_PROC_NAME {
            return Err(ExtensionError::Reserved { name: spec.name });
        }
        let mut inner = self.inner.write();
        if inner.processor_names.contains_key(&spec.name) {
            return Err(ExtensionError::Duplicate { name: spec.name });
        }
        let tag = ProcessorTag::new(ProcessorTag::FIRST_USER.get() + inner.next_processor);
        inner.next_processor += 1;
        debug!(name = %spec.name, tag = %tag, "processor variant registered");
        inner.processor_names.insert(spec.name.clone(), tag);
        inner.processors.insert(
            tag,
            RegisteredProcessor {
                name: spec.name,
                default_enabled: spec.default_enabled,
                parent: spec.parent,
                children: spec.children,
                codec: spec.codec,
            },
        );
        Ok(tag)
    }

    /// Registers a taint variant, allocating its tag.
    pub fn register_taint(&self, spec: TaintSpec) -> Result<TaintTag, ExtensionError> {
        if spec.name == DEFAULT_ENABLED_TAINT_NAME || spec.name == PROCESSOR_TYPE_TAINT_NAME {
            return Err(ExtensionError::Reserved { name: spec.name });
        }
        let mut inner = self.inner.write();
        if inner.taint_names.contains_key(&spec.name) {
            return Err(ExtensionError::Duplicate { name: spec.name });
        }
        let tag = TaintTag::new(TaintTag::FIRST_USER.get() + inner.next_taint);
        inner.next_taint += 1;
        debug!(name = %spec.name, tag = %tag, "taint variant registered");
        inner.taint_names.insert(spec.name.clone(), tag);
        inner.taints.insert(
            tag,
            RegisteredTaint {
                name: spec.name,
                matcher: spec.matcher,
            },
        );
        Ok(tag)
    }

    /// Registers a handler for an unrecognized scope key.
    ///
    /// Handlers with higher precedence win when a specification mixes keys;
    /// a tie at the maximum is a construction error for that specification.
    pub fn register_scope_key(
        &self,
        name: impl Into<String>,
        precedence: i32,
        handler: impl Fn(&NamedFields, &ProcessorRegistry) -> Result<Scope, BuildError>
            + Send
            + Sync
            + 'static,
    ) -> Result<(), ExtensionError> {
        let name = name.into();
        let mut inner = self.inner.write();
        if inner.scope_keys.contains_key(&name) {
            return Err(ExtensionError::Duplicate { name });
        }
        debug!(key = %name, precedence, "scope key registered");
        inner.scope_keys.insert(
            name,
            ScopeKeyEntry {
                precedence,
                handler: Arc::new(handler),
            },
        );
        Ok(())
    }

    /// The default-enabled verdict of a registered variant.
    #[must_use]
    pub fn processor_default_enabled(&self, tag: ProcessorTag) -> Option<bool> {
        self.inner
            .read()
            .processors
            .get(&tag)
            .map(|r| r.default_enabled)
    }

    /// The registered wire name of a processor tag (built-ins included).
    #[must_use]
    pub fn processor_name(&self, tag: ProcessorTag) -> Option<String> {
        match tag {
            ProcessorTag::OS_PROC => Some(OS_PROC_NAME.to_owned()),
            ProcessorTag::THREAD_PROC => Some(THREAD_PROC_NAME.to_owned()),
            _ => self
                .inner
                .read()
                .processors
                .get(&tag)
                .map(|r| r.name.clone()),
        }
    }

    /// Resolves a processor wire name to its local tag (built-ins included).
    #[must_use]
    pub fn processor_tag(&self, name: &str) -> Option<ProcessorTag> {
        match name {
            OS_PROC_NAME => Some(ProcessorTag::OS_PROC),
            THREAD_PROC_NAME => Some(ProcessorTag::THREAD_PROC),
            _ => self.inner.read().processor_names.get(name).copied(),
        }
    }

    /// The registered wire name of a taint tag (built-ins included).
    #[must_use]
    pub fn taint_name(&self, tag: TaintTag) -> Option<String> {
        match tag {
            TaintTag::DEFAULT_ENABLED => Some(DEFAULT_ENABLED_TAINT_NAME.to_owned()),
            TaintTag::PROCESSOR_TYPE => Some(PROCESSOR_TYPE_TAINT_NAME.to_owned()),
            _ => self.inner.read().taints.get(&tag).map(|r| r.name.clone()),
        }
    }

    /// Resolves a taint wire name to its local tag (built-ins included).
    #[must_use]
    pub fn taint_tag(&self, name: &str) -> Option<TaintTag> {
        match name {
            DEFAULT_ENABLED_TAINT_NAME => Some(TaintTag::DEFAULT_ENABLED),
            PROCESSOR_TYPE_TAINT_NAME => Some(TaintTag::PROCESSOR_TYPE),
            _ => self.inner.read().taint_names.get(name).copied(),
        }
    }

    /// Applies the registered parent function, if any.
    ///
    /// `None` both for an unregistered tag and for a registration without a
    /// parent function; the caller falls back to the hosting OS process.
    #[must_use]
    pub(crate) fn processor_parent(&self, proc: &CustomProc) -> Option<Processor> {
        let parent = self
            .inner
            .read()
            .processors
            .get(&proc.tag())
            .and_then(|r| r.parent.clone());
        // Run the user function outside the table lock.
        parent.map(|f| f(proc))
    }

    /// Applies the registered children function, if any.
    #[must_use]
    pub(crate) fn processor_children(&self, tag: ProcessorTag, wid: WorkerId) -> Vec<Processor> {
        let children = self
            .inner
            .read()
            .processors
            .get(&tag)
            .and_then(|r| r.children.clone());
        children.map_or_else(Vec::new, |f| f(wid))
    }

    /// The payload codec of a registered variant.
    #[must_use]
    pub(crate) fn processor_codec(&self, tag: ProcessorTag) -> Option<Arc<dyn ProcessorCodec>> {
        self.inner.read().processors.get(&tag).map(|r| r.codec.clone())
    }

    /// Evaluates a custom taint. An unknown tag rejects, so a taint from a
    /// stale or foreign table degrades the meet instead of widening it.
    #[must_use]
    pub(crate) fn taint_matches(&self, tag: TaintTag, payload: &[u8], proc: &Processor) -> bool {
        let matcher = self.inner.read().taints.get(&tag).map(|r| r.matcher.clone());
        matcher.is_some_and(|f| f(payload, proc))
    }

    /// Looks up a scope-key handler and its precedence.
    #[must_use]
    pub(crate) fn scope_key_handler(&self, key: &str) -> Option<(i32, ScopeKeyFn)> {
        self.inner
            .read()
            .scope_keys
            .get(key)
            .map(|e| (e.precedence, e.handler.clone()))
    }
}

impl fmt::Debug for Extensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("Extensions")
            .field("processors", &inner.processors.len())
            .field("taints", &inner.taints.len())
            .field("scope_keys", &inner.scope_keys.len())
            .finish()
    }
}
