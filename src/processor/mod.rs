//! The processor hierarchy: the execution resources scopes refer to.
//!
//! Processors form a two-level tree rooted at the worker's OS process:
//!
//! ```text
//! OsProc(pid)
//!   ├── ThreadProc(pid, tid)     built-in: one OS thread
//!   ├── ThreadProc(pid, tid)
//!   └── CustomProc(tag, pid, …)  user-registered (accelerator, …)
//! ```
//!
//! A [`Processor`] is an immutable value. Structural queries (`pid`,
//! `type_tag`) need nothing else; capability queries (`default_enabled`,
//! `parent`, `children`) take the [`Extensions`] table and/or the
//! [`ProcessorRegistry`](crate::registry::ProcessorRegistry) explicitly so
//! that independent contexts stay independent.

use crate::extension::Extensions;
use crate::registry::ProcessorRegistry;
use crate::types::{ProcessorTag, ThreadId, WorkerId};
use core::fmt;
use std::sync::Arc;

/// Root of a worker: the OS process itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OsProc {
    pid: WorkerId,
}

impl OsProc {
    /// Creates the OS-process processor for a worker.
    #[must_use]
    pub const fn new(pid: WorkerId) -> Self {
        Self { pid }
    }

    /// The worker this process is.
    #[must_use]
    pub const fn pid(self) -> WorkerId {
        self.pid
    }
}

impl fmt::Display for OsProc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.pid)
    }
}

/// One OS thread on a worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ThreadProc {
    pid: WorkerId,
    tid: ThreadId,
}

impl ThreadProc {
    /// Creates a thread processor on the given worker.
    #[must_use]
    pub const fn new(pid: WorkerId, tid: ThreadId) -> Self {
        Self { pid, tid }
    }

    /// The worker hosting this thread.
    #[must_use]
    pub const fn pid(self) -> WorkerId {
        self.pid
    }

    /// The thread index local to the worker.
    #[must_use]
    pub const fn tid(self) -> ThreadId {
        self.tid
    }
}

impl fmt::Display for ThreadProc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.pid, self.tid)
    }
}

/// A user-registered processor variant (accelerator, device slot, …).
///
/// The payload is opaque bytes owned by the codec registered with the
/// variant; `ident` distinguishes instances of the same variant on one
/// worker. Equality and hashing are structural over all four fields.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct CustomProc {
    tag: ProcessorTag,
    pid: WorkerId,
    ident: u64,
    payload: Arc<[u8]>,
}

impl CustomProc {
    /// Creates a custom processor instance.
    #[must_use]
    pub fn new(
        tag: ProcessorTag,
        pid: WorkerId,
        ident: u64,
        payload: impl Into<Arc<[u8]>>,
    ) -> Self {
        Self {
            tag,
            pid,
            ident,
            payload: payload.into(),
        }
    }

    /// The registered variant tag.
    #[must_use]
    pub const fn tag(&self) -> ProcessorTag {
        self.tag
    }

    /// The worker hosting this processor.
    #[must_use]
    pub const fn pid(&self) -> WorkerId {
        self.pid
    }

    /// Instance identifier, unique per (tag, worker).
    #[must_use]
    pub const fn ident(&self) -> u64 {
        self.ident
    }

    /// The opaque payload bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

impl fmt::Debug for CustomProc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomProc")
            .field("tag", &self.tag)
            .field("pid", &self.pid)
            .field("ident", &self.ident)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

impl fmt::Display for CustomProc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.pid, self.tag, self.ident)
    }
}

/// An execution resource: the leaf (or root) of the processor hierarchy.
///
/// The enum is sealed; user variants go through [`Processor::Custom`] with a
/// tag obtained from
/// [`Extensions::register_processor`](crate::extension::Extensions::register_processor).
/// This keeps match exhaustiveness on the closed core while leaving user
/// extension open (dispatch on the tag, not on the host language's type
/// system).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Processor {
    /// The worker's OS process.
    Os(OsProc),
    /// One OS thread on a worker.
    Thread(ThreadProc),
    /// A user-registered variant.
    Custom(CustomProc),
}

impl Processor {
    /// Convenience constructor for [`Processor::Os`].
    #[must_use]
    pub const fn os(pid: WorkerId) -> Self {
        Self::Os(OsProc::new(pid))
    }

    /// Convenience constructor for [`Processor::Thread`].
    #[must_use]
    pub const fn thread(pid: WorkerId, tid: ThreadId) -> Self {
        Self::Thread(ThreadProc::new(pid, tid))
    }

    /// The worker hosting this processor.
    #[must_use]
    pub const fn pid(&self) -> WorkerId {
        match self {
            Self::Os(p) => p.pid(),
            Self::Thread(p) => p.pid(),
            Self::Custom(p) => p.pid(),
        }
    }

    /// The processor-type tag of the concrete variant.
    #[must_use]
    pub const fn type_tag(&self) -> ProcessorTag {
        match self {
            Self::Os(_) => ProcessorTag::OS_PROC,
            Self::Thread(_) => ProcessorTag::THREAD_PROC,
            Self::Custom(p) => p.tag(),
        }
    }

    /// Upward navigation. `None` for the hierarchy root.
    ///
    /// Custom variants default to the hosting [`OsProc`] unless their
    /// registration supplied a parent function.
    #[must_use]
    pub fn parent(&self, extensions: &Extensions) -> Option<Self> {
        match self {
            Self::Os(_) => None,
            Self::Thread(p) => Some(Self::os(p.pid())),
            Self::Custom(p) => Some(
                extensions
                    .processor_parent(p)
                    .unwrap_or_else(|| Self::os(p.pid())),
            ),
        }
    }

    /// Whether this processor participates in the default scope.
    ///
    /// Built-in variants are always default-enabled. Custom variants carry
    /// the verdict given at registration; an unregistered tag is treated as
    /// opted out, so a stray value degrades rather than widens a scope.
    #[must_use]
    pub fn default_enabled(&self, extensions: &Extensions) -> bool {
        match self {
            Self::Os(_) | Self::Thread(_) => true,
            Self::Custom(p) => extensions.processor_default_enabled(p.tag()).unwrap_or(false),
        }
    }

    /// Downward navigation.
    ///
    /// For an [`OsProc`] this is the registry's snapshot of the worker's
    /// on-worker processors; threads have no children; custom variants
    /// consult their registered children function.
    #[must_use]
    pub fn children(
        &self,
        registry: &ProcessorRegistry,
        extensions: &Extensions,
    ) -> Vec<Self> {
        match self {
            Self::Os(p) => registry.children(p.pid()).unwrap_or_default(),
            Self::Thread(_) => Vec::new(),
            Self::Custom(p) => extensions.processor_children(p.tag(), p.pid()),
        }
    }

    /// Returns true for the built-in thread variant.
    #[must_use]
    pub const fn is_thread(&self) -> bool {
        matches!(self, Self::Thread(_))
    }
}

impl From<OsProc> for Processor {
    fn from(p: OsProc) -> Self {
        Self::Os(p)
    }
}

impl From<ThreadProc> for Processor {
    fn from(p: ThreadProc) -> Self {
        Self::Thread(p)
    }
}

impl From<CustomProc> for Processor {
    fn from(p: CustomProc) -> Self {
        Self::Custom(p)
    }
}

impl fmt::Display for Processor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Os(p) => write!(f, "{p}"),
            Self::Thread(p) => write!(f, "{p}"),
            Self::Custom(p) => write!(f, "{p}"),
        }
    }
}
