// semaphore.rs — Counting-semaphore intrinsics and their lowering.
//
// The splitting passes coordinate forked halves through counting semaphores.
// During forking a semaphore is just a binding of the placeholder constructor
// call; `lower_semaphores` replaces each such binding with a stack allocation
// plus a runtime initialization call, after which no constructor call may
// remain anywhere in the tree.
//
// Preconditions: every semaphore binding's scope covers all uses.
// Postconditions: no constructor call survives; each lowered binding holds an
//   `alloca` whose record is initialized exactly once before any use.
// Failure modes: stray or malformed constructor calls (internal errors).
// Side effects: none.

use crate::diag::InternalError;
use crate::ir::{self, CallKind, Expr, Stmt, Type};

// ── Runtime symbols ─────────────────────────────────────────────────────────

/// Runtime call that sets a semaphore's count. Resolved at link time.
pub const SEMAPHORE_INIT: &str = "halide_semaphore_init";

/// Runtime call that adds permits to a semaphore. Resolved at link time.
pub const SEMAPHORE_RELEASE: &str = "halide_semaphore_release";

/// Placeholder constructor used while forking; eliminated by
/// [`lower_semaphores`].
pub const MAKE_SEMAPHORE: &str = "halide_make_semaphore";

/// Stack-allocation intrinsic open-coded by the backend.
pub const ALLOCA: &str = "alloca";

/// Size of the runtime semaphore record in bytes.
pub const SEMAPHORE_BYTES: i32 = 16;

// ── Naming ──────────────────────────────────────────────────────────────────

/// Name of the `i`-th semaphore minted for a stage's consume regions.
pub fn semaphore_name(stage: &str, i: usize) -> String {
    format!("{}.semaphore_{}", stage, i)
}

/// Prefix of storage-folding semaphores for `stage`. These pre-date the
/// splitting passes and must flow to the producer side of a fork.
pub fn folding_prefix(stage: &str) -> String {
    format!("{}.folding_semaphore.", stage)
}

// ── Call builders ───────────────────────────────────────────────────────────

/// The placeholder `make_semaphore(initial)` expression.
pub fn make_semaphore(initial: i32) -> Expr {
    Expr::call(
        MAKE_SEMAPHORE,
        vec![Expr::int(initial)],
        CallKind::Extern,
        Type::SemaphoreHandle,
    )
}

/// `semaphore_release(sem, count)` as an expression.
pub fn release(sem: Expr, count: Expr) -> Expr {
    Expr::call(
        SEMAPHORE_RELEASE,
        vec![sem, count],
        CallKind::Extern,
        Type::Int32,
    )
}

/// `semaphore_init(sem, count)` as an expression.
pub fn init(sem: Expr, count: Expr) -> Expr {
    Expr::call(
        SEMAPHORE_INIT,
        vec![sem, count],
        CallKind::Extern,
        Type::Int32,
    )
}

fn alloca_semaphore() -> Expr {
    Expr::call(
        ALLOCA,
        vec![Expr::int(SEMAPHORE_BYTES)],
        CallKind::Intrinsic,
        Type::SemaphoreHandle,
    )
}

// ── Lowering ────────────────────────────────────────────────────────────────

/// Replace every semaphore-typed binding of the placeholder constructor with
/// a stack allocation followed by a runtime initialization call, and reject
/// any constructor call found anywhere else.
pub fn lower_semaphores(stmt: &Stmt) -> Result<Stmt, InternalError> {
    mutate(stmt)
}

fn mutate(stmt: &Stmt) -> Result<Stmt, InternalError> {
    if let Stmt::LetStmt { name, value, body } = stmt {
        let body = mutate(body)?;
        if value.ty() == Type::SemaphoreHandle {
            // Peel expression-level lets off the bound value.
            let mut lets: Vec<(&String, &Expr)> = Vec::new();
            let mut inner = value;
            while let Expr::Let {
                name: ln,
                value: lv,
                body: lb,
            } = inner
            {
                lets.push((ln, lv));
                inner = lb;
            }
            if let Expr::Call {
                name: callee, args, ..
            } = inner
            {
                if callee == MAKE_SEMAPHORE {
                    if args.len() != 1 {
                        return Err(InternalError::MalformedSemaphoreCall(args.len()));
                    }
                    check_no_constructor(&args[0])?;
                    for (_, lv) in &lets {
                        check_no_constructor(lv)?;
                    }

                    let sema_var = Expr::var(name.clone(), Type::SemaphoreHandle);
                    let mut out = Stmt::let_stmt(
                        name.clone(),
                        alloca_semaphore(),
                        Stmt::block(
                            Stmt::evaluate(init(sema_var, args[0].clone())),
                            body,
                        ),
                    );
                    // Re-wrap the peeled lets, innermost last.
                    for (ln, lv) in lets.into_iter().rev() {
                        out = Stmt::let_stmt(ln.clone(), (*lv).clone(), out);
                    }
                    return Ok(out);
                }
            }
        }
        check_no_constructor(value)?;
        return Ok(Stmt::let_stmt(name.clone(), value.clone(), body));
    }

    for e in ir::exprs_of(stmt) {
        check_no_constructor(e)?;
    }
    ir::try_map_children(stmt, &mut mutate)
}

fn check_no_constructor(e: &Expr) -> Result<(), InternalError> {
    if ir::expr_contains_call(e, MAKE_SEMAPHORE) {
        return Err(InternalError::StrayMakeSemaphore(e.to_string()));
    }
    Ok(())
}

// ── Tests ───────────────────────────────────────────────────────────────────
