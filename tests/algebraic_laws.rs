//! Algebraic law property tests for the scope meet.
//!
//! The meet is a lattice greatest-lower-bound, so over every pair of
//! well-formed scopes (no invalid inputs) it must satisfy, writing `~` for
//! structural equality ignoring union child order:
//!
//! - **Identity**: `constrain(Any, x) ~ x`
//! - **Idempotence**: `constrain(x, x) ~ x`
//! - **Commutativity**: `constrain(x, y) ~ constrain(y, x)` (both invalid
//!   counts as agreeing)
//! - **Associativity**: `constrain(constrain(x, y), z) ~
//!   constrain(x, constrain(y, z))`
//! - **Narrowing**: a non-invalid result absorbs against both inputs
//! - **Taint deferral**: taints survive every meet that does not reach an
//!   exact scope
//!
//! Scopes are generated over the reference two-node, two-worker topology
//! from `common`.

mod common;

use common::*;
use procscope::{constrain, NodeUuid, ProcessorTag, Scope, Taint};
use proptest::prelude::*;

/// Leaf scopes over the reference topology, exact scopes included.
fn base_scopes() -> Vec<Scope> {
    let cluster = TestCluster::new();
    vec![
        Scope::Any,
        Scope::node(NODE_A),
        Scope::node(NODE_B),
        Scope::Process(cluster.process_scope(1)),
        Scope::Process(cluster.process_scope(2)),
        cluster.exact_thread(1, 1),
        cluster.exact_thread(1, 2),
        cluster.exact_thread(2, 1),
        cluster.exact_thread(2, 3),
        cluster.exact_opt_out(),
    ]
}

/// Leaf scopes containing no exact scope, for the deferral law.
fn base_scopes_no_exact() -> Vec<Scope> {
    let cluster = TestCluster::new();
    vec![
        Scope::Any,
        Scope::node(NODE_A),
        Scope::node(NODE_B),
        Scope::Process(cluster.process_scope(1)),
        Scope::Process(cluster.process_scope(2)),
    ]
}

fn taint_pool() -> Vec<Taint> {
    let cluster = TestCluster::new();
    vec![
        Taint::DefaultEnabled,
        Taint::ProcessorType(ProcessorTag::THREAD_PROC),
        Taint::ProcessorType(cluster.opt_out),
    ]
}

fn arb_taints() -> impl Strategy<Value = Vec<Taint>> {
    proptest::sample::subsequence(taint_pool(), 1..=3)
}

fn arb_scope_from(leaves: Vec<Scope>) -> impl Strategy<Value = Scope> {
    proptest::sample::select(leaves).prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            proptest::collection::vec(inner.clone(), 2..4)
                .prop_map(|children| Scope::union_of(children).unwrap_or(Scope::Any)),
            (inner, arb_taints()).prop_map(|(scope, taints)| Scope::tainted(scope, taints)),
        ]
    })
}

fn arb_scope() -> impl Strategy<Value = Scope> {
    arb_scope_from(base_scopes())
}

fn arb_scope_no_exact() -> impl Strategy<Value = Scope> {
    arb_scope_from(base_scopes_no_exact())
}

/// Agreement modulo invalid payloads: both invalid, or equivalent.
fn agree(a: &Scope, b: &Scope) -> bool {
    (a.is_invalid() && b.is_invalid()) || a.equivalent(b)
}

proptest! {
    #![proptest_config(test_proptest_config(512))]

    /// LAW: Any is the identity of the meet.
    #[test]
    fn meet_identity(x in arb_scope()) {
        init_test_logging();
        let cluster = TestCluster::new();
        let met = constrain(&Scope::Any, &x, &cluster.extensions);
        prop_assert!(met.equivalent(&x), "Any ⊓ {x} gave {met}");
    }

    /// LAW: the meet is idempotent.
    #[test]
    fn meet_idempotent(x in arb_scope()) {
        init_test_logging();
        let cluster = TestCluster::new();
        let met = constrain(&x, &x, &cluster.extensions);
        prop_assert!(met.equivalent(&x), "{x} ⊓ {x} gave {met}");
    }

    /// LAW: the meet is commutative modulo invalid payloads.
    #[test]
    fn meet_commutative(x in arb_scope(), y in arb_scope()) {
        init_test_logging();
        let cluster = TestCluster::new();
        let xy = constrain(&x, &y, &cluster.extensions);
        let yx = constrain(&y, &x, &cluster.extensions);
        prop_assert!(agree(&xy, &yx), "{x} ⊓ {y}: {xy} vs {yx}");
    }

    /// LAW: the meet is associative modulo invalid payloads.
    #[test]
    fn meet_associative(x in arb_scope(), y in arb_scope(), z in arb_scope()) {
        init_test_logging();
        let cluster = TestCluster::new();
        let left = constrain(&constrain(&x, &y, &cluster.extensions), &z, &cluster.extensions);
        let right = constrain(&x, &constrain(&y, &z, &cluster.extensions), &cluster.extensions);
        prop_assert!(agree(&left, &right), "assoc broke: {left} vs {right}");
    }

    /// LAW: a non-invalid meet result absorbs against both inputs.
    #[test]
    fn meet_narrowing(x in arb_scope(), y in arb_scope()) {
        init_test_logging();
        let cluster = TestCluster::new();
        let z = constrain(&x, &y, &cluster.extensions);
        prop_assume!(z.is_valid());
        let xz = constrain(&x, &z, &cluster.extensions);
        let yz = constrain(&y, &z, &cluster.extensions);
        prop_assert!(xz.equivalent(&z), "{x} ⊓ ({x} ⊓ {y}) gave {xz}, wanted {z}");
        prop_assert!(yz.equivalent(&z), "{y} ⊓ ({x} ⊓ {y}) gave {yz}, wanted {z}");
    }

    /// LAW: taints defer: a meet that never reaches an exact scope carries
    /// every taint through unresolved.
    #[test]
    fn taint_deferral(taints in arb_taints(), s in arb_scope_no_exact()) {
        init_test_logging();
        let cluster = TestCluster::new();
        let tainted = Scope::tainted(Scope::Any, taints.clone());
        let met = constrain(&tainted, &s, &cluster.extensions);
        match met {
            Scope::Taint(t) => {
                for taint in &taints {
                    prop_assert!(
                        t.taints().contains(taint),
                        "taint {taint} was dropped before any exact scope"
                    );
                }
            }
            other => prop_assert!(false, "expected a pending taint scope, got {other}"),
        }
    }
}

#[test]
fn singleton_union_is_its_child() {
    let cluster = TestCluster::new();
    let child = cluster.exact_thread(1, 1);
    assert_eq!(Scope::union_of([child.clone()]), Some(child));
}

#[test]
fn union_branches_conflicting_with_the_meet_drop_out() {
    let cluster = TestCluster::new();
    let union = Scope::union_of([
        Scope::Process(cluster.process_scope(1)),
        Scope::Process(cluster.process_scope(2)),
    ])
    .unwrap();
    let met = constrain(&union, &Scope::node(NODE_A), &cluster.extensions);
    assert_eq!(met, Scope::Process(cluster.process_scope(1)));

    let nowhere = constrain(
        &union,
        &Scope::node(NodeUuid::new(0xCCCC)),
        &cluster.extensions,
    );
    assert!(nowhere.is_invalid());
}

#[test]
fn default_scope_admits_exactly_the_default_enabled() {
    let cluster = TestCluster::new();
    let thread = cluster.exact_thread(2, 1);
    assert_eq!(
        constrain(&Scope::default_scope(), &thread, &cluster.extensions),
        thread
    );
    assert!(
        constrain(&Scope::default_scope(), &cluster.exact_opt_out(), &cluster.extensions)
            .is_invalid()
    );
}
