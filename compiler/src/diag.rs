// diag.rs — Internal-invariant errors for the splitting passes.
//
// The splitting passes have no user-surfaced failure modes: any misuse by the
// caller shows up as a violated internal invariant, and the pipeline aborts
// with one of the errors below. Every variant names the offending node so the
// upstream bug can be located from the message alone.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InternalError {
    /// More than one produce marker for one async stage on a control path.
    #[error("duplicate produce marker for async stage '{0}'")]
    DuplicateProducer(String),

    /// An `Acquire`'s semaphore operand must be a variable reference.
    #[error("acquire semaphore is not a variable reference: {0}")]
    AcquireSemaphoreNotVariable(String),

    /// A `Realize` names a stage the environment does not know.
    #[error("stage '{0}' missing from the stage environment")]
    UnknownStage(String),

    /// The consumer half ran out of semaphores before its consume markers.
    #[error("consume marker for stage '{0}' has no matching semaphore")]
    SemaphoreUnderflow(String),

    /// A semaphore initialized inside a producer half must stay private to it.
    #[error("semaphore '{0}' initialized inside a producer half was also cloned across the fork")]
    ClonedInnerSemaphore(String),

    /// A semaphore constructor call had the wrong arity.
    #[error("semaphore constructor expects 1 argument, found {0}")]
    MalformedSemaphoreCall(usize),

    /// A semaphore constructor call survived past semaphore lowering.
    #[error("semaphore constructor call in unexpected place: {0}")]
    StrayMakeSemaphore(String),
}
