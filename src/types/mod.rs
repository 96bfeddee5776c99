//! Core identifier types for the scope algebra.
//!
//! - [`id`]: Typed identifiers (`WorkerId`, `ThreadId`, `NodeUuid`,
//!   `ProcessorTag`, `TaintTag`)

pub mod id;

pub use id::{NodeUuid, ProcessorTag, TaintTag, ThreadId, WorkerId};
