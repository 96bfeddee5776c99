//! User-facing scope specifications.
//!
//! Two construction forms mirror how users describe placement:
//!
//! - **positional**: a list of things that already are (or convert to)
//!   scopes: `scope()`, `scope(default)`, `scope(w1, w2)`;
//! - **keyword**: named fields such as `scope(workers = [1, 2], threads = [1])`.
//!
//! Construction fails fast with a typed error: a scope referencing an
//! unknown worker is never built, and no partial scope escapes. This is the
//! counterpart to the meet's never-fail contract: all validation happens
//! here, so the hot loop has nothing left to check.

use crate::extension::{Extensions, ScopeKeyFn};
use crate::processor::Processor;
use crate::registry::ProcessorRegistry;
use crate::scope::{ExactScope, NodeScope, ProcessScope, Scope};
use crate::tracing_compat::debug;
use crate::types::{ThreadId, WorkerId};
use std::collections::BTreeMap;

/// Construction-time failures. No partial scope is returned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    /// The specification references a worker the registry does not know.
    #[error("unknown worker {wid}")]
    UnknownWorker {
        /// The unknown worker.
        wid: WorkerId,
    },
    /// A (worker, thread) pair named a thread the worker does not have.
    #[error("worker {wid} has no thread {tid}")]
    UnknownThread {
        /// The worker that was asked.
        wid: WorkerId,
        /// The missing thread.
        tid: ThreadId,
    },
    /// A thread-only specification matched nothing on any known worker.
    #[error("no known worker has a thread in {tids:?}")]
    NoMatchingThreads {
        /// The requested thread ids.
        tids: Vec<ThreadId>,
    },
    /// A key with no registered handler.
    #[error("unrecognized scope key `{key}`")]
    UnknownKey {
        /// The offending key.
        key: String,
    },
    /// Two extension handlers tied at the maximum precedence.
    #[error("conflicting specifiers: {keys:?}")]
    ConflictingSpecifiers {
        /// The keys whose handlers tied.
        keys: Vec<String>,
    },
    /// The specification reduced to an empty union.
    #[error("scope specification produced an empty union")]
    EmptyUnion,
    /// An extension handler failed.
    #[error("scope key `{key}` failed: {reason}")]
    Handler {
        /// The key whose handler failed.
        key: String,
        /// Handler-provided description.
        reason: String,
    },
}

/// One positional argument to [`ScopeBuilder::positional`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeArg {
    /// The `default` symbol: the default-enabled scope.
    Default,
    /// An already-built scope, passed through.
    Scope(Scope),
    /// A worker, converted to its process scope.
    Worker(WorkerId),
    /// A concrete processor, converted to its exact scope.
    Processor(Processor),
}

impl From<Scope> for ScopeArg {
    fn from(scope: Scope) -> Self {
        Self::Scope(scope)
    }
}

impl From<WorkerId> for ScopeArg {
    fn from(wid: WorkerId) -> Self {
        Self::Worker(wid)
    }
}

impl From<Processor> for ScopeArg {
    fn from(proc: Processor) -> Self {
        Self::Processor(proc)
    }
}

/// Value of one keyword field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecValue {
    /// A single id.
    Id(u64),
    /// A sequence of ids, order preserved.
    IdList(Vec<u64>),
}

impl SpecValue {
    /// The ids in this value, singletons included.
    #[must_use]
    pub fn ids(&self) -> Vec<u64> {
        match self {
            Self::Id(id) => vec![*id],
            Self::IdList(ids) => ids.clone(),
        }
    }
}

/// The keyword form's field set. Keys are iterated in name order; each
/// value keeps its own sequence order.
pub type NamedFields = BTreeMap<String, SpecValue>;

const WORKER_KEYS: [&str; 2] = ["worker", "workers"];
const THREAD_KEYS: [&str; 2] = ["thread", "threads"];

/// Builds canonical scope trees from user specifications.
///
/// Borrows the registry (to resolve workers and enumerate threads) and the
/// extension tables (to dispatch unrecognized keys). Both are explicit so a
/// test can build against a synthetic cluster.
#[derive(Debug, Clone, Copy)]
pub struct ScopeBuilder<'a> {
    registry: &'a ProcessorRegistry,
    extensions: &'a Extensions,
}

impl<'a> ScopeBuilder<'a> {
    /// Creates a builder over the given cluster context.
    #[must_use]
    pub const fn new(registry: &'a ProcessorRegistry, extensions: &'a Extensions) -> Self {
        Self {
            registry,
            extensions,
        }
    }

    /// The positional form.
    ///
    /// - no arguments: [`Scope::Any`];
    /// - the sole `default` symbol: the default-enabled scope;
    /// - one argument: its scope conversion;
    /// - several: their deduplicated union.
    pub fn positional(
        &self,
        args: impl IntoIterator<Item = ScopeArg>,
    ) -> Result<Scope, BuildError> {
        let mut args = args.into_iter().peekable();
        let Some(first) = args.next() else {
            return Ok(Scope::Any);
        };
        if args.peek().is_none() {
            return self.to_scope(first);
        }
        let mut children = Vec::new();
        children.push(self.to_scope(first)?);
        for arg in args {
            children.push(self.to_scope(arg)?);
        }
        Scope::union_of(children).ok_or(BuildError::EmptyUnion)
    }

    /// The keyword form. See the module docs for the recognized keys.
    pub fn named(&self, fields: &NamedFields) -> Result<Scope, BuildError> {
        if fields.is_empty() {
            return Ok(Scope::Any);
        }

        let unknown: Vec<&str> = fields
            .keys()
            .map(String::as_str)
            .filter(|k| !WORKER_KEYS.contains(k) && !THREAD_KEYS.contains(k))
            .collect();
        if !unknown.is_empty() {
            return self.dispatch_extension(&unknown, fields);
        }

        let workers = collect_ids(fields, &WORKER_KEYS).map(|ids| {
            let mut wids: Vec<WorkerId> = Vec::new();
            for id in ids {
                let wid = WorkerId::new(id);
                if !wids.contains(&wid) {
                    wids.push(wid);
                }
            }
            wids
        });
        let threads = collect_ids(fields, &THREAD_KEYS).map(|ids| {
            let mut tids: Vec<ThreadId> = Vec::new();
            for id in ids {
                let tid = ThreadId::new(id);
                if !tids.contains(&tid) {
                    tids.push(tid);
                }
            }
            tids
        });

        match (workers, threads) {
            (Some(wids), Some(tids)) => self.worker_threads(&wids, &tids),
            (Some(wids), None) => self.workers_only(&wids),
            (None, Some(tids)) => self.threads_only(&tids),
            (None, None) => Ok(Scope::Any),
        }
    }

    /// Converts one positional argument.
    fn to_scope(&self, arg: ScopeArg) -> Result<Scope, BuildError> {
        match arg {
            ScopeArg::Default => Ok(Scope::default_scope()),
            ScopeArg::Scope(scope) => Ok(scope),
            ScopeArg::Worker(wid) => Ok(Scope::Process(self.process_scope(wid)?)),
            ScopeArg::Processor(proc) => {
                let process = self.process_scope(proc.pid())?;
                Ok(Scope::Exact(ExactScope::new(process, proc)))
            }
        }
    }

    /// Resolves a worker to its process scope, embedding the node.
    fn process_scope(&self, wid: WorkerId) -> Result<ProcessScope, BuildError> {
        let uuid = self
            .registry
            .node_uuid(wid)
            .ok_or(BuildError::UnknownWorker { wid })?;
        Ok(ProcessScope::new(NodeScope::new(uuid), wid))
    }

    /// Cartesian product of workers and threads, validated strictly: a
    /// missing (worker, thread) pair is a construction error.
    fn worker_threads(
        &self,
        wids: &[WorkerId],
        tids: &[ThreadId],
    ) -> Result<Scope, BuildError> {
        let mut members = Vec::with_capacity(wids.len() * tids.len());
        for &wid in wids {
            let process = self.process_scope(wid)?;
            let children = self
                .registry
                .children(wid)
                .ok_or(BuildError::UnknownWorker { wid })?;
            for &tid in tids {
                let thread = children
                    .iter()
                    .find(|p| match p {
                        Processor::Thread(t) => t.tid() == tid,
                        Processor::Os(_) | Processor::Custom(_) => false,
                    })
                    .ok_or(BuildError::UnknownThread { wid, tid })?;
                members.push(Scope::Exact(ExactScope::new(process, thread.clone())));
            }
        }
        Scope::union_of(members).ok_or(BuildError::EmptyUnion)
    }

    /// Union of the named workers' process scopes.
    fn workers_only(&self, wids: &[WorkerId]) -> Result<Scope, BuildError> {
        let mut members = Vec::with_capacity(wids.len());
        for &wid in wids {
            members.push(Scope::Process(self.process_scope(wid)?));
        }
        Scope::union_of(members).ok_or(BuildError::EmptyUnion)
    }

    /// Thread-only form: each known worker's snapshot is enumerated
    /// independently, keeping the threads whose id is in the set. A worker
    /// without a matching thread simply contributes nothing.
    fn threads_only(&self, tids: &[ThreadId]) -> Result<Scope, BuildError> {
        let mut members = Vec::new();
        for wid in self.registry.workers() {
            let Some(children) = self.registry.children(wid) else {
                continue;
            };
            let process = self.process_scope(wid)?;
            for child in children {
                if let Processor::Thread(t) = &child {
                    if tids.contains(&t.tid()) {
                        members.push(Scope::Exact(ExactScope::new(process, child.clone())));
                    }
                }
            }
        }
        if members.is_empty() {
            return Err(BuildError::NoMatchingThreads {
                tids: tids.to_vec(),
            });
        }
        Scope::union_of(members).ok_or(BuildError::EmptyUnion)
    }

    /// Dispatches a field set with unrecognized keys to the extension
    /// table: the handler with the unique maximum precedence receives the
    /// full set.
    fn dispatch_extension(
        &self,
        unknown: &[&str],
        fields: &NamedFields,
    ) -> Result<Scope, BuildError> {
        let mut best: Option<(i32, ScopeKeyFn, String)> = None;
        let mut tied: Vec<String> = Vec::new();
        for &key in unknown {
            let Some((precedence, handler)) = self.extensions.scope_key_handler(key) else {
                return Err(BuildError::UnknownKey {
                    key: key.to_owned(),
                });
            };
            match &best {
                Some((max, _, max_key)) if precedence == *max => {
                    if tied.is_empty() {
                        tied.push(max_key.clone());
                    }
                    tied.push(key.to_owned());
                }
                Some((max, _, _)) if precedence < *max => {}
                _ => {
                    best = Some((precedence, handler, key.to_owned()));
                    tied.clear();
                }
            }
        }
        let (_, handler, key) = best.ok_or(BuildError::EmptyUnion)?;
        if !tied.is_empty() {
            return Err(BuildError::ConflictingSpecifiers { keys: tied });
        }
        debug!(key = %key, "dispatching scope keys to extension handler");
        handler(fields, self.registry)
    }
}

/// Concatenated ids of the given keys, `None` when no key is present.
fn collect_ids(fields: &NamedFields, keys: &[&str]) -> Option<Vec<u64>> {
    let mut out: Option<Vec<u64>> = None;
    for &key in keys {
        if let Some(value) = fields.get(key) {
            out.get_or_insert_with(Vec::new).extend(value.ids());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::taint::Taint;
    use crate::types::NodeUuid;

    const NODE_A: NodeUuid = NodeUuid::new(0xAAAA);
    const NODE_B: NodeUuid = NodeUuid::new(0xBBBB);

    fn cluster() -> (ProcessorRegistry, Extensions) {
        let registry = ProcessorRegistry::new();
        registry.worker_joined(
            WorkerId::new(1),
            NODE_A,
            vec![
                Processor::thread(WorkerId::new(1), ThreadId::new(1)),
                Processor::thread(WorkerId::new(1), ThreadId::new(2)),
            ],
        );
        registry.worker_joined(
            WorkerId::new(2),
            NODE_B,
            vec![
                Processor::thread(WorkerId::new(2), ThreadId::new(1)),
                Processor::thread(WorkerId::new(2), ThreadId::new(2)),
                Processor::thread(WorkerId::new(2), ThreadId::new(3)),
            ],
        );
        (registry, Extensions::new())
    }

    fn fields(entries: &[(&str, SpecValue)]) -> NamedFields {
        entries
            .iter()
            .map(|(k, v)| ((*k).to_owned(), v.clone()))
            .collect()
    }

    fn expect_process(scope: &Scope, wid: u64) {
        match scope {
            Scope::Process(p) => assert_eq!(p.wid(), WorkerId::new(wid)),
            other => panic!("expected process scope, got {other}"),
        }
    }

    #[test]
    fn empty_forms_are_any() {
        let (registry, ext) = cluster();
        let builder = ScopeBuilder::new(&registry, &ext);
        assert_eq!(builder.positional([]).unwrap(), Scope::Any);
        assert_eq!(builder.named(&NamedFields::new()).unwrap(), Scope::Any);
    }

    #[test]
    fn sole_default_symbol() {
        let (registry, ext) = cluster();
        let builder = ScopeBuilder::new(&registry, &ext);
        assert_eq!(
            builder.positional([ScopeArg::Default]).unwrap(),
            Scope::default_scope()
        );
    }

    #[test]
    fn single_worker_positional() {
        let (registry, ext) = cluster();
        let builder = ScopeBuilder::new(&registry, &ext);
        let scope = builder.positional([ScopeArg::from(WorkerId::new(1))]).unwrap();
        expect_process(&scope, 1);
    }

    #[test]
    fn positional_union_dedups() {
        let (registry, ext) = cluster();
        let builder = ScopeBuilder::new(&registry, &ext);
        let scope = builder
            .positional([
                ScopeArg::from(WorkerId::new(1)),
                ScopeArg::from(WorkerId::new(2)),
                ScopeArg::from(WorkerId::new(1)),
            ])
            .unwrap();
        match scope {
            Scope::Union(u) => assert_eq!(u.children().len(), 2),
            other => panic!("expected union, got {other}"),
        }
    }

    #[test]
    fn positional_processor_becomes_exact() {
        let (registry, ext) = cluster();
        let builder = ScopeBuilder::new(&registry, &ext);
        let proc = Processor::thread(WorkerId::new(2), ThreadId::new(3));
        let scope = builder.positional([ScopeArg::from(proc.clone())]).unwrap();
        match scope {
            Scope::Exact(e) => {
                assert_eq!(e.proc(), &proc);
                assert_eq!(e.process().node().uuid(), NODE_B);
            }
            other => panic!("expected exact scope, got {other}"),
        }
    }

    #[test]
    fn unknown_worker_fails_fast() {
        let (registry, ext) = cluster();
        let builder = ScopeBuilder::new(&registry, &ext);
        assert_eq!(
            builder.positional([ScopeArg::from(WorkerId::new(9))]),
            Err(BuildError::UnknownWorker {
                wid: WorkerId::new(9)
            })
        );
    }

    #[test]
    fn named_single_worker() {
        let (registry, ext) = cluster();
        let builder = ScopeBuilder::new(&registry, &ext);
        let scope = builder
            .named(&fields(&[("worker", SpecValue::Id(1))]))
            .unwrap();
        expect_process(&scope, 1);
    }

    #[test]
    fn named_workers_union() {
        let (registry, ext) = cluster();
        let builder = ScopeBuilder::new(&registry, &ext);
        let scope = builder
            .named(&fields(&[("workers", SpecValue::IdList(vec![1, 2]))]))
            .unwrap();
        match scope {
            Scope::Union(u) => {
                expect_process(&u.children()[0], 1);
                expect_process(&u.children()[1], 2);
            }
            other => panic!("expected union, got {other}"),
        }
    }

    #[test]
    fn named_cartesian_product() {
        let (registry, ext) = cluster();
        let builder = ScopeBuilder::new(&registry, &ext);
        let scope = builder
            .named(&fields(&[
                ("workers", SpecValue::IdList(vec![1, 2])),
                ("threads", SpecValue::Id(1)),
            ]))
            .unwrap();
        match scope {
            Scope::Union(u) => {
                assert_eq!(u.children().len(), 2);
                for (child, wid) in u.children().iter().zip([1u64, 2]) {
                    match child {
                        Scope::Exact(e) => {
                            assert_eq!(
                                e.proc(),
                                &Processor::thread(WorkerId::new(wid), ThreadId::new(1))
                            );
                        }
                        other => panic!("expected exact scope, got {other}"),
                    }
                }
            }
            other => panic!("expected union, got {other}"),
        }
    }

    #[test]
    fn named_cartesian_missing_thread_fails() {
        let (registry, ext) = cluster();
        let builder = ScopeBuilder::new(&registry, &ext);
        // Worker 1 has threads {1, 2}; thread 3 exists only on worker 2.
        assert_eq!(
            builder.named(&fields(&[
                ("workers", SpecValue::IdList(vec![1, 2])),
                ("threads", SpecValue::Id(3)),
            ])),
            Err(BuildError::UnknownThread {
                wid: WorkerId::new(1),
                tid: ThreadId::new(3)
            })
        );
    }

    #[test]
    fn named_threads_only_enumerates_per_worker() {
        let (registry, ext) = cluster();
        let builder = ScopeBuilder::new(&registry, &ext);
        let scope = builder
            .named(&fields(&[("threads", SpecValue::Id(3))]))
            .unwrap();
        // Only worker 2 has a thread 3; the union collapses to one exact.
        match scope {
            Scope::Exact(e) => assert_eq!(
                e.proc(),
                &Processor::thread(WorkerId::new(2), ThreadId::new(3))
            ),
            other => panic!("expected exact scope, got {other}"),
        }
    }

    #[test]
    fn named_threads_matching_nothing_fails() {
        let (registry, ext) = cluster();
        let builder = ScopeBuilder::new(&registry, &ext);
        assert_eq!(
            builder.named(&fields(&[("threads", SpecValue::Id(9))])),
            Err(BuildError::NoMatchingThreads {
                tids: vec![ThreadId::new(9)]
            })
        );
    }

    #[test]
    fn unknown_key_without_handler_fails() {
        let (registry, ext) = cluster();
        let builder = ScopeBuilder::new(&registry, &ext);
        assert_eq!(
            builder.named(&fields(&[("gpu", SpecValue::Id(0))])),
            Err(BuildError::UnknownKey { key: "gpu".into() })
        );
    }

    #[test]
    fn extension_key_dispatches_to_handler() {
        let (registry, ext) = cluster();
        ext.register_scope_key("tainted", 0, |_fields, _registry| {
            Ok(Scope::tainted(Scope::Any, [Taint::DefaultEnabled]))
        })
        .unwrap();
        let builder = ScopeBuilder::new(&registry, &ext);
        let scope = builder
            .named(&fields(&[("tainted", SpecValue::Id(1))]))
            .unwrap();
        assert_eq!(scope, Scope::default_scope());
    }

    #[test]
    fn highest_precedence_handler_wins() {
        let (registry, ext) = cluster();
        ext.register_scope_key("low", 0, |_, _| Ok(Scope::Any)).unwrap();
        ext.register_scope_key("high", 10, |fields, _| {
            assert!(fields.contains_key("low"), "handler sees the full key set");
            Ok(Scope::default_scope())
        })
        .unwrap();
        let builder = ScopeBuilder::new(&registry, &ext);
        let scope = builder
            .named(&fields(&[
                ("low", SpecValue::Id(0)),
                ("high", SpecValue::Id(0)),
            ]))
            .unwrap();
        assert_eq!(scope, Scope::default_scope());
    }

    #[test]
    fn precedence_tie_is_a_conflict() {
        let (registry, ext) = cluster();
        ext.register_scope_key("left", 5, |_, _| Ok(Scope::Any)).unwrap();
        ext.register_scope_key("right", 5, |_, _| Ok(Scope::Any)).unwrap();
        let builder = ScopeBuilder::new(&registry, &ext);
        let err = builder
            .named(&fields(&[
                ("left", SpecValue::Id(0)),
                ("right", SpecValue::Id(0)),
            ]))
            .unwrap_err();
        assert!(matches!(err, BuildError::ConflictingSpecifiers { .. }));
    }
}
