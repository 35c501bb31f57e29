// pass.rs — Pass descriptor module: metadata, dependency resolution, certs.
//
// Declares the five stages of the async splitting pipeline, their dependency
// edges, and the invariants each stage establishes. Used by the pipeline
// runner to order execution and by verification certs for reporting.

use std::collections::HashSet;

// ── Pass identifiers ───────────────────────────────────────────────────────

/// Identifies each stage of the splitting pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassId {
    TightenConsume,
    ForkProducers,
    ExpandAcquire,
    TightenFork,
    LowerSemaphores,
}

// ── Pass descriptor ────────────────────────────────────────────────────────

/// Static metadata about a pipeline stage.
pub struct PassDescriptor {
    /// Human-readable name for diagnostics/verbose output.
    pub name: &'static str,
    /// Stages whose output this stage consumes.
    pub inputs: &'static [PassId],
    /// Invariant the stage establishes on its output tree.
    pub invariants: &'static str,
}

/// Return the static descriptor for a given stage.
pub fn descriptor(id: PassId) -> PassDescriptor {
    match id {
        PassId::TightenConsume => PassDescriptor {
            name: "tighten_consume",
            inputs: &[],
            invariants: "every consume marker wraps a region that references its buffer",
        },
        PassId::ForkProducers => PassDescriptor {
            name: "fork_producers",
            inputs: &[PassId::TightenConsume],
            invariants: "every async allocation body is a fork with one semaphore per consume region",
        },
        PassId::ExpandAcquire => PassDescriptor {
            name: "expand_acquire",
            inputs: &[PassId::ForkProducers],
            invariants: "no acquire has an adjacent trailing sibling it could absorb",
        },
        PassId::TightenFork => PassDescriptor {
            name: "tighten_fork",
            inputs: &[PassId::ExpandAcquire],
            invariants: "no dead bindings or allocations inside fork children",
        },
        PassId::LowerSemaphores => PassDescriptor {
            name: "lower_semaphores",
            inputs: &[PassId::TightenFork],
            invariants: "no semaphore constructor call remains",
        },
    }
}

// ── Dependency resolution ──────────────────────────────────────────────────

/// All five stage IDs in declaration order (used for iteration).
pub const ALL_PASSES: [PassId; 5] = [
    PassId::TightenConsume,
    PassId::ForkProducers,
    PassId::ExpandAcquire,
    PassId::TightenFork,
    PassId::LowerSemaphores,
];

/// Compute the minimal ordered set of stages needed to produce `terminal`.
/// Returns stages in topological (execution) order.
pub fn required_passes(terminal: PassId) -> Vec<PassId> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    visit(terminal, &mut visited, &mut order);
    order
}

fn visit(id: PassId, visited: &mut HashSet<PassId>, order: &mut Vec<PassId>) {
    if !visited.insert(id) {
        return;
    }
    for &dep in descriptor(id).inputs {
        visit(dep, visited, order);
    }
    order.push(id);
}

// ── Stage certs ────────────────────────────────────────────────────────────

/// Machine-checkable evidence that a stage's postconditions hold.
pub trait StageCert {
    /// True if all obligations pass.
    fn all_pass(&self) -> bool;
    /// Each obligation by name with its outcome.
    fn obligations(&self) -> Vec<(&'static str, bool)>;
}

// ── Tests ──────────────────────────────────────────────────────────────────
