// verify.rs — Postcondition checks over the fully split tree.
//
// Recomputes the pipeline's output obligations from scratch, independent of
// how the passes got there. Returns a pure `SplitCert` — the runner decides
// what to do with failures.
//
// Preconditions: `stmt` is the output of the full splitting pipeline.
// Postconditions: none (read-only analysis).
// Failure modes: none.
// Side effects: none.

use std::collections::HashMap;

use crate::ir::{self, Expr, Stmt};
use crate::pass::StageCert;
use crate::semaphore;

// ── Cert ───────────────────────────────────────────────────────────────────

/// Machine-checkable evidence for the splitting pipeline's postconditions.
#[derive(Debug, Clone)]
pub struct SplitCert {
    /// A1: No semaphore constructor call survives anywhere in the tree.
    pub a1_no_constructor_survives: bool,
    /// A2: Every minted semaphore is released exactly once and acquired
    /// exactly once.
    pub a2_release_acquire_balance: bool,
    /// A3: No consumer-side acquire names a storage-folding semaphore of the
    /// stage whose fork it sits in.
    pub a3_folding_on_producer_side: bool,
    /// A4: No binding or allocation inside a fork child is dead.
    pub a4_no_orphan_fork_bindings: bool,
    /// A5: No acquire has a trailing block sibling it could absorb.
    pub a5_acquire_hoisting_monotone: bool,
}

impl StageCert for SplitCert {
    fn all_pass(&self) -> bool {
        self.a1_no_constructor_survives
            && self.a2_release_acquire_balance
            && self.a3_folding_on_producer_side
            && self.a4_no_orphan_fork_bindings
            && self.a5_acquire_hoisting_monotone
    }

    fn obligations(&self) -> Vec<(&'static str, bool)> {
        vec![
            ("A1_no_constructor_survives", self.a1_no_constructor_survives),
            ("A2_release_acquire_balance", self.a2_release_acquire_balance),
            ("A3_folding_on_producer_side", self.a3_folding_on_producer_side),
            ("A4_no_orphan_fork_bindings", self.a4_no_orphan_fork_bindings),
            ("A5_acquire_hoisting_monotone", self.a5_acquire_hoisting_monotone),
        ]
    }
}

/// Verify the splitting pipeline's postconditions over its output tree.
pub fn verify_split(stmt: &Stmt) -> SplitCert {
    SplitCert {
        a1_no_constructor_survives: verify_a1(stmt),
        a2_release_acquire_balance: verify_a2(stmt),
        a3_folding_on_producer_side: verify_a3(stmt),
        a4_no_orphan_fork_bindings: verify_a4(stmt),
        a5_acquire_hoisting_monotone: verify_a5(stmt),
    }
}

// ── Individual obligations ─────────────────────────────────────────────────

fn verify_a1(stmt: &Stmt) -> bool {
    let mut ok = true;
    ir::walk_stmts(stmt, &mut |s| {
        for e in ir::exprs_of(s) {
            if ir::expr_contains_call(e, semaphore::MAKE_SEMAPHORE) {
                ok = false;
            }
        }
    });
    ok
}

/// A variable of the `{stage}.semaphore_{i}` family minted by the fork pass,
/// including its clones.
fn minted_semaphore(name: &str) -> bool {
    match name.find(".semaphore_") {
        Some(pos) => name[pos + ".semaphore_".len()..]
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_digit()),
        None => false,
    }
}

fn verify_a2(stmt: &Stmt) -> bool {
    let mut releases: HashMap<String, usize> = HashMap::new();
    let mut acquires: HashMap<String, usize> = HashMap::new();
    ir::walk_stmts(stmt, &mut |s| match s {
        Stmt::Evaluate {
            value: Expr::Call { name, args, .. },
        } if name == semaphore::SEMAPHORE_RELEASE => {
            if let Some(v) = args.first().and_then(|a| a.as_variable()) {
                if minted_semaphore(v) {
                    *releases.entry(v.to_string()).or_insert(0) += 1;
                }
            }
        }
        Stmt::Acquire { semaphore: sem, .. } => {
            if let Some(v) = sem.as_variable() {
                if minted_semaphore(v) {
                    *acquires.entry(v.to_string()).or_insert(0) += 1;
                }
            }
        }
        _ => {}
    });

    releases.len() == acquires.len()
        && releases.iter().all(|(name, count)| {
            *count == 1 && acquires.get(name).copied() == Some(1)
        })
}

fn verify_a3(stmt: &Stmt) -> bool {
    let mut ok = true;
    ir::walk_stmts(stmt, &mut |s| {
        let Stmt::Fork { first, rest } = s else {
            return;
        };
        // Stages whose fork this is, recovered from the producer half.
        let mut stages: Vec<String> = Vec::new();
        ir::walk_stmts(first, &mut |p| {
            if let Stmt::Evaluate {
                value: Expr::Call { name, args, .. },
            } = p
            {
                if name == semaphore::SEMAPHORE_RELEASE {
                    if let Some(v) = args.first().and_then(|a| a.as_variable()) {
                        if let Some(pos) = v.find(".semaphore_") {
                            stages.push(v[..pos].to_string());
                        }
                    }
                }
            }
        });
        ir::walk_stmts(rest, &mut |c| {
            if let Stmt::Acquire { semaphore: sem, .. } = c {
                if let Some(v) = sem.as_variable() {
                    for stage in &stages {
                        if v.starts_with(&semaphore::folding_prefix(stage)) {
                            ok = false;
                        }
                    }
                }
            }
        });
    });
    ok
}

fn verify_a4(stmt: &Stmt) -> bool {
    let mut ok = true;
    a4_walk(stmt, false, &mut ok);
    ok
}

fn a4_walk(stmt: &Stmt, in_fork: bool, ok: &mut bool) {
    match stmt {
        Stmt::Fork { first, rest } => {
            a4_walk(first, true, ok);
            a4_walk(rest, true, ok);
        }
        Stmt::LetStmt { name, body, .. } | Stmt::Realize { name, body, .. } => {
            if in_fork && !ir::stmt_uses_name(body, name) {
                *ok = false;
            }
            a4_walk(body, in_fork, ok);
        }
        Stmt::Block { first, rest } => {
            a4_walk(first, in_fork, ok);
            a4_walk(rest, in_fork, ok);
        }
        Stmt::For { body, .. }
        | Stmt::ProducerConsumer { body, .. }
        | Stmt::Acquire { body, .. } => a4_walk(body, in_fork, ok),
        Stmt::IfThenElse {
            then_case,
            else_case,
            ..
        } => {
            a4_walk(then_case, in_fork, ok);
            if let Some(e) = else_case {
                a4_walk(e, in_fork, ok);
            }
        }
        Stmt::AssertStmt { .. }
        | Stmt::Provide { .. }
        | Stmt::Evaluate { .. }
        | Stmt::Prefetch { .. } => {}
    }
}

fn verify_a5(stmt: &Stmt) -> bool {
    let mut ok = true;
    ir::walk_stmts(stmt, &mut |s| {
        if let Stmt::Block { first, .. } = s {
            if matches!(first.as_ref(), Stmt::Acquire { .. }) {
                ok = false;
            }
        }
    });
    ok
}

// ── Tests ──────────────────────────────────────────────────────────────────
