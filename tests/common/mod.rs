#![allow(dead_code)]
//! Shared integration test utilities.
//!
//! Import with:
//! ```
//! mod common;
//! use common::*;
//! ```

use procscope::{
    Extensions, NodeUuid, Processor, ProcessorRegistry, ProcessorSpec, ProcessorTag, Scope,
    ThreadId, WorkerId,
};
use procscope::{CustomProc, ExactScope, NodeScope, ProcessScope};
use proptest::prelude::ProptestConfig;
use proptest::test_runner::RngSeed;
use std::sync::Once;

static INIT_LOGGING: Once = Once::new();

/// Default seed for property tests when running under CI.
pub const DEFAULT_PROPTEST_SEED: u64 = 0x5C0_9E5;

const PROPTEST_SEED_ENV: &str = "PROCSCOPE_PROPTEST_SEED";

/// Node hosting worker 1.
pub const NODE_A: NodeUuid = NodeUuid::new(0xAAAA_0000_0000_0000_0000_0000_0000_0001);
/// Node hosting worker 2.
pub const NODE_B: NodeUuid = NodeUuid::new(0xBBBB_0000_0000_0000_0000_0000_0000_0002);

/// Build a ProptestConfig with deterministic seed support for CI.
#[must_use]
pub fn test_proptest_config(cases: u32) -> ProptestConfig {
    let mut config = ProptestConfig::with_cases(cases);
    // Honor an existing PROPTEST_RNG_SEED, otherwise apply our own.
    if matches!(config.rng_seed, RngSeed::Random) {
        if let Some(seed) = read_proptest_seed() {
            config.rng_seed = RngSeed::Fixed(seed);
        }
    }
    config
}

fn read_proptest_seed() -> Option<u64> {
    if let Ok(value) = std::env::var(PROPTEST_SEED_ENV) {
        return value.parse::<u64>().ok();
    }
    if std::env::var("CI").is_ok() {
        return Some(DEFAULT_PROPTEST_SEED);
    }
    None
}

/// Initialize test logging (once per test binary).
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .with_target(true)
            .try_init();
    });
}

/// The reference two-node, two-worker topology of the end-to-end tests:
/// worker 1 on node A with threads {1, 2}, worker 2 on node B with threads
/// {1, 2, 3} plus one `opt-out` processor (`default_enabled = false`).
///
/// Construction is deterministic, so two independently built clusters agree
/// on every tag and uuid.
pub struct TestCluster {
    pub registry: ProcessorRegistry,
    pub extensions: Extensions,
    pub opt_out: ProcessorTag,
}

impl TestCluster {
    #[must_use]
    pub fn new() -> Self {
        let extensions = Extensions::new();
        let opt_out = extensions
            .register_processor(ProcessorSpec::new("opt-out", false))
            .expect("fresh table");

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
                Processor::Custom(CustomProc::new(opt_out, WorkerId::new(2), 0, Vec::new())),
            ],
        );

        Self {
            registry,
            extensions,
            opt_out,
        }
    }

    /// The node of a worker in this topology.
    #[must_use]
    pub fn node_of(&self, wid: u64) -> NodeUuid {
        if wid == 1 {
            NODE_A
        } else {
            NODE_B
        }
    }

    /// Process scope of a worker.
    #[must_use]
    pub fn process_scope(&self, wid: u64) -> ProcessScope {
        ProcessScope::new(NodeScope::new(self.node_of(wid)), WorkerId::new(wid))
    }

    /// Exact scope of one thread.
    #[must_use]
    pub fn exact_thread(&self, wid: u64, tid: u64) -> Scope {
        Scope::Exact(ExactScope::new(
            self.process_scope(wid),
            Processor::thread(WorkerId::new(wid), ThreadId::new(tid)),
        ))
    }

    /// Exact scope of the opt-out processor on worker 2.
    #[must_use]
    pub fn exact_opt_out(&self) -> Scope {
        Scope::Exact(ExactScope::new(
            self.process_scope(2),
            Processor::Custom(CustomProc::new(self.opt_out, WorkerId::new(2), 0, Vec::new())),
        ))
    }
}

impl Default for TestCluster {
    fn default() -> Self {
        Self::new()
    }
}
