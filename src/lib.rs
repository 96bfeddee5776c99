//! Procscope: scope constraint algebra for a distributed, heterogeneous
//! task scheduler.
//!
//! # Overview
//!
//! A scheduler dispatching thunks across a cluster must decide, for every
//! (thunk, chunk, processor) triple, whether the processor is a legal
//! placement. Procscope models that decision as a lattice meet over
//! immutable scope values: thunks, chunks, and processors each carry a
//! [`Scope`], and [`constrain`] intersects them. Conflicts never raise;
//! they surface as an [`InvalidScope`] value the scheduler skips.
//!
//! # Core Guarantees
//!
//! - **Total meet**: [`constrain`] is defined for every scope pair and never
//!   panics; conflicts are values, not exceptions
//! - **Deferred taints**: predicates that need a concrete processor
//!   (default-enabled, processor-type) are carried unresolved until the meet
//!   reaches an [`ExactScope`]
//! - **No ambient authority**: the processor registry and all extension
//!   tables are explicit values threaded through the builder and the
//!   algebra; tests instantiate independent instances
//! - **Deterministic results**: union children keep a stable, documented
//!   order; registry enumeration is sorted
//! - **Degrade, don't abort**: unknown variants arriving on the wire decode
//!   to an invalid scope instead of killing the scheduler
//!
//! # Module Structure
//!
//! - [`types`]: Identifier types (`WorkerId`, `ThreadId`, `NodeUuid`, tags)
//! - [`processor`]: The processor hierarchy (OS process / thread / custom)
//! - [`registry`]: Cluster membership and per-worker processor snapshots
//! - [`scope`]: The scope lattice, the meet, taints, and the builder
//! - [`extension`]: Registration tables for user processors, taints, and
//!   scope keys
//! - [`wire`]: Binary scope codec for cross-worker transfer
//! - [`tracing_compat`]: Structured logging shim (feature
//!   `tracing-integration`)

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cast_possible_truncation)]

pub mod extension;
pub mod processor;
pub mod registry;
pub mod scope;
pub mod tracing_compat;
pub mod types;
pub mod wire;

pub use extension::{
    CodecError, ExtensionError, Extensions, ProcessorCodec, ProcessorSpec, RawBytesCodec,
    SerdeProcessorCodec, TaintSpec,
};
pub use processor::{CustomProc, OsProc, Processor, ThreadProc};
pub use registry::{ChildrenSource, ProcessorRegistry, RegistryError};
pub use scope::builder::{BuildError, NamedFields, ScopeArg, ScopeBuilder, SpecValue};
pub use scope::constrain::{constrain, constrain_all};
pub use scope::taint::{taint_match, Taint};
pub use scope::{
    ExactScope, InvalidScope, NodeScope, ProcessScope, Scope, TaintScope, UnionScope,
};
pub use types::{NodeUuid, ProcessorTag, TaintTag, ThreadId, WorkerId};
pub use wire::{decode_scope, encode_scope, WireConfig, WireError, WIRE_MAGIC, WIRE_VERSION};
