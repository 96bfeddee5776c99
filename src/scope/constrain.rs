//! The meet: greatest lower bound of two scopes.
//!
//! [`constrain`] is called in the scheduler's hot loop over every
//! (thunk, chunk, processor) triple, so conflicts are values (an invalid
//! scope), never panics or errors. The operation is commutative and
//! associative modulo the diagnostics payload carried inside an invalid
//! result, and deterministic: union children keep the lexicographic order
//! of the left operand then the right, deduplicated on insertion.
//!
//! Dispatch normalizes each pair so the wider variant is on the left:
//!
//! ```text
//! Any ⊐ Taint ⊐ Union ⊐ Node ⊐ Process ⊐ Exact
//! ```
//!
//! A taint scope is a pending state: its predicates ride along through
//! every meet until the inner scope narrows to an exact scope, at which
//! point they are evaluated against the concrete processor and discarded.

use crate::extension::Extensions;
use crate::scope::taint::taint_match;
use crate::scope::Scope;
use crate::tracing_compat::trace;

/// Lattice precedence, widest first. Invalid sorts last so it is never
/// chosen as the wider side.
const fn rank(scope: &Scope) -> u8 {
    match scope {
        Scope::Any => 0,
        Scope::Taint(_) => 1,
        Scope::Union(_) => 2,
        Scope::Node(_) => 3,
        Scope::Process(_) => 4,
        Scope::Exact(_) => 5,
        Scope::Invalid(_) => 6,
    }
}

/// Computes the meet of two scopes.
///
/// Total: every conflict returns an invalid scope carrying both inputs for
/// diagnostics. Feeding an invalid scope back in is a caller bug; it
/// propagates unchanged rather than asserting, which keeps degraded wire
/// scopes (see [`crate::wire`]) safe to drop into the scheduling loop.
#[must_use]
pub fn constrain(x: &Scope, y: &Scope, extensions: &Extensions) -> Scope {
    if x.is_invalid() {
        return x.clone();
    }
    if y.is_invalid() {
        return y.clone();
    }

    let (wider, narrower) = if rank(x) <= rank(y) { (x, y) } else { (y, x) };

    match (wider, narrower) {
        (Scope::Any, _) => narrower.clone(),

        (Scope::Taint(t), Scope::Taint(u)) => {
            let inner = constrain(t.inner(), u.inner(), extensions);
            if inner.is_invalid() {
                return inner;
            }
            Scope::tainted(
                inner,
                t.taints().iter().cloned().chain(u.taints().iter().cloned()),
            )
        }

        // The pending predicates meet a concrete processor: evaluate and
        // discard them, or fail the whole meet.
        (Scope::Taint(t), Scope::Exact(e)) => {
            for taint in t.taints() {
                if !taint_match(taint, e.proc(), extensions) {
                    trace!(taint = %taint, proc = %e.proc(), "taint rejected processor");
                    return Scope::invalid(x.clone(), y.clone());
                }
            }
            constrain(t.inner(), narrower, extensions)
        }

        (Scope::Taint(t), other) => {
            let inner = constrain(t.inner(), other, extensions);
            if inner.is_invalid() {
                return inner;
            }
            Scope::tainted(inner, t.taints().iter().cloned())
        }

        // Unions distribute over the meet; conflicting branches drop out.
        (Scope::Union(u), other) => {
            let right: &[Scope] = match other {
                Scope::Union(v) => v.children(),
                single => core::slice::from_ref(single),
            };
            let mut kept: Vec<Scope> = Vec::new();
            for c in u.children() {
                for d in right {
                    let met = constrain(c, d, extensions);
                    if met.is_valid() && !kept.contains(&met) {
                        kept.push(met);
                    }
                }
            }
            Scope::union_of(kept).unwrap_or_else(|| Scope::invalid(x.clone(), y.clone()))
        }

        (Scope::Node(n), Scope::Node(m)) => {
            if n == m {
                wider.clone()
            } else {
                Scope::invalid(x.clone(), y.clone())
            }
        }

        (Scope::Node(n), Scope::Process(p)) => {
            if n.uuid() == p.node().uuid() {
                narrower.clone()
            } else {
                Scope::invalid(x.clone(), y.clone())
            }
        }

        (Scope::Node(n), Scope::Exact(e)) => {
            if n.uuid() == e.process().node().uuid() {
                narrower.clone()
            } else {
                Scope::invalid(x.clone(), y.clone())
            }
        }

        (Scope::Process(p), Scope::Process(q)) => {
            if p == q {
                wider.clone()
            } else {
                Scope::invalid(x.clone(), y.clone())
            }
        }

        (Scope::Process(p), Scope::Exact(e)) => {
            if *p == e.process() {
                narrower.clone()
            } else {
                Scope::invalid(x.clone(), y.clone())
            }
        }

        (Scope::Exact(a), Scope::Exact(b)) => {
            if a == b {
                wider.clone()
            } else {
                Scope::invalid(x.clone(), y.clone())
            }
        }

        // Rank normalization excludes every other pairing.
        _ => Scope::invalid(x.clone(), y.clone()),
    }
}

/// Folds the meet over a sequence of scopes.
///
/// The empty sequence yields [`Scope::Any`]; the fold short-circuits on the
/// first invalid result.
#[must_use]
pub fn constrain_all<I>(scopes: I, extensions: &Extensions) -> Scope
where
    I: IntoIterator<Item = Scope>,
{
    let mut acc = Scope::Any;
    for scope in scopes {
        acc = constrain(&acc, &scope, extensions);
        if acc.is_invalid() {
            break;
        }
    }
    acc
}
