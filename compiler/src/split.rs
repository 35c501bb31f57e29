// split.rs — Fork async stage bodies into producer/consumer task pairs.
//
// For each allocation of a stage scheduled async, duplicates the allocation
// body into a producer-only and a consumer-only variant, injects one counting
// semaphore per consume region to preserve dependencies, and runs the pair as
// sibling tasks under a `Fork`. The producer releases every semaphore when its
// produce region completes; each consume region on the consumer side acquires
// one permit before running.
//
// Preconditions: at most one produce marker per async stage on a control
//   path; every `Realize` name resolves in the stage environment.
// Postconditions: every async stage body is a `Fork` under one `LetStmt` per
//   consume region binding a placeholder semaphore constructor.
// Failure modes: violated preconditions surface as `InternalError`.
// Side effects: none (pure tree rewrite).

use std::collections::{HashMap, HashSet};

use crate::diag::InternalError;
use crate::ir::{self, Expr, Stmt, Type};
use crate::names::NameGen;
use crate::semaphore;
use crate::stage::StageEnv;

// ── Entry point ─────────────────────────────────────────────────────────────

/// Split every async stage allocation in `stmt` into a task-parallel
/// producer/consumer pair.
pub fn fork_async_producers(stmt: &Stmt, env: &StageEnv) -> Result<Stmt, InternalError> {
    let mut pass = ForkAsyncProducers {
        env,
        names: NameGen::new(),
        cloned_acquires: HashMap::new(),
    };
    pass.mutate(stmt)
}

struct ForkAsyncProducers<'a> {
    env: &'a StageEnv,
    names: NameGen,
    /// Original semaphore name → clone name, accumulated by producer-half
    /// generation across nested stages and consumed when binding semaphores.
    cloned_acquires: HashMap<String, String>,
}

impl ForkAsyncProducers<'_> {
    fn mutate(&mut self, stmt: &Stmt) -> Result<Stmt, InternalError> {
        let Stmt::Realize {
            name,
            types,
            bounds,
            condition,
            body,
        } = stmt
        else {
            return ir::try_map_children(stmt, &mut |s| self.mutate(s));
        };

        let is_async = self
            .env
            .lookup(name)
            .ok_or_else(|| InternalError::UnknownStage(name.clone()))?
            .is_async;
        if !is_async {
            return ir::try_map_children(stmt, &mut |s| self.mutate(s));
        }

        // One semaphore per consume region of this stage.
        let consumes = count_consume_nodes(body, name);
        let sema_names: Vec<String> = (0..consumes)
            .map(|i| semaphore::semaphore_name(name, i))
            .collect();
        let sema_vars: Vec<Expr> = sema_names
            .iter()
            .map(|n| Expr::var(n.clone(), Type::SemaphoreHandle))
            .collect();

        let producer = generate_producer_body(
            name,
            sema_vars.clone(),
            body,
            &mut self.cloned_acquires,
            &mut self.names,
        )?;
        let consumer = generate_consumer_body(name, sema_vars, body)?;

        // Recurse on both halves to handle nested async stages.
        let producer = self.mutate(&producer)?;
        let consumer = self.mutate(&consumer)?;

        let mut new_body = Stmt::fork(producer, consumer);

        for sema_name in &sema_names {
            // A nested async stage may have cloned this semaphore while the
            // halves were generated; give the clone its own binding and
            // duplicate every matching init/release onto it.
            if let Some(cloned) = self.cloned_acquires.get(sema_name).cloned() {
                let cloned_var = Expr::var(cloned.clone(), Type::SemaphoreHandle);
                new_body = clone_acquire(&new_body, sema_name, &cloned_var);
                new_body = Stmt::let_stmt(cloned, semaphore::make_semaphore(0), new_body);
            }
            new_body = Stmt::let_stmt(sema_name.clone(), semaphore::make_semaphore(0), new_body);
        }

        Ok(Stmt::realize(
            name.clone(),
            types.clone(),
            bounds.clone(),
            condition.clone(),
            new_body,
        ))
    }
}

/// Number of consume markers for `stage` reachable in the tree.
fn count_consume_nodes(stmt: &Stmt, stage: &str) -> usize {
    let mut count = 0;
    ir::walk_stmts(stmt, &mut |s| {
        if let Stmt::ProducerConsumer {
            name,
            is_producer: false,
            ..
        } = s
        {
            if name == stage {
                count += 1;
            }
        }
    });
    count
}

// ── Producer half ───────────────────────────────────────────────────────────

fn generate_producer_body(
    stage: &str,
    sema: Vec<Expr>,
    body: &Stmt,
    cloned_acquires: &mut HashMap<String, String>,
    names: &mut NameGen,
) -> Result<Stmt, InternalError> {
    let mut half = ProducerHalf {
        stage,
        sema,
        cloned_acquires,
        inner_semaphores: HashSet::new(),
        names,
    };
    let out = half.mutate(body)?;
    for inner in &half.inner_semaphores {
        if half.cloned_acquires.contains_key(inner) {
            return Err(InternalError::ClonedInnerSemaphore(inner.clone()));
        }
    }
    Ok(out)
}

struct ProducerHalf<'a> {
    stage: &'a str,
    /// Remaining semaphores, drained entirely at the produce marker.
    sema: Vec<Expr>,
    cloned_acquires: &'a mut HashMap<String, String>,
    /// Semaphores initialized by expressions surviving into this half; these
    /// are private to the half and must never appear in `cloned_acquires`.
    inner_semaphores: HashSet<String>,
    names: &'a mut NameGen,
}

impl ProducerHalf<'_> {
    fn mutate(&mut self, stmt: &Stmt) -> Result<Stmt, InternalError> {
        match stmt {
            Stmt::ProducerConsumer {
                name,
                is_producer: true,
                body,
            } if name == self.stage => {
                // Keep the production work and release every semaphore once
                // it has finished.
                if self.sema.is_empty() {
                    return Err(InternalError::DuplicateProducer(self.stage.to_string()));
                }
                let mut body = (**body).clone();
                while let Some(s) = self.sema.pop() {
                    body = Stmt::block(
                        body,
                        Stmt::evaluate(semaphore::release(s, Expr::int(1))),
                    );
                }
                Ok(Stmt::produce(name.clone(), body))
            }
            Stmt::ProducerConsumer {
                name,
                is_producer,
                body,
            } => {
                let body = self.mutate(body)?;
                if body.is_no_op() || *is_producer {
                    Ok(body)
                } else {
                    Ok(Stmt::producer_consumer(name.clone(), *is_producer, body))
                }
            }
            // Consumer-side effects have no place in this half.
            Stmt::Evaluate { .. }
            | Stmt::Provide { .. }
            | Stmt::AssertStmt { .. }
            | Stmt::Prefetch { .. } => Ok(Stmt::no_op()),
            Stmt::Acquire {
                semaphore: sem,
                count,
                body,
            } => {
                let body = self.mutate(body)?;
                let var = sem.as_variable().ok_or_else(|| {
                    InternalError::AcquireSemaphoreNotVariable(sem.to_string())
                })?;
                if body.is_no_op() {
                    Ok(body)
                } else if var.starts_with(&semaphore::folding_prefix(self.stage)) {
                    // Storage-folding semaphore for the stage being produced.
                    Ok(Stmt::acquire(sem.clone(), count.clone(), body))
                } else {
                    // This semaphore ends up on both sides of the fork, so
                    // this side acquires a private clone of it.
                    let cloned = self.names.clone_name(var);
                    self.cloned_acquires.insert(var.to_string(), cloned.clone());
                    Ok(Stmt::acquire(
                        Expr::var(cloned, Type::SemaphoreHandle),
                        count.clone(),
                        body,
                    ))
                }
            }
            _ => {
                self.record_inner_inits(stmt);
                ir::try_collapse_children(stmt, &mut |s| self.mutate(s))
            }
        }
    }

    fn record_inner_inits(&mut self, stmt: &Stmt) {
        for e in ir::exprs_of(stmt) {
            record_init_targets(e, &mut self.inner_semaphores);
        }
    }
}

fn record_init_targets(e: &Expr, out: &mut HashSet<String>) {
    match e {
        Expr::Call { name, args, .. } => {
            if name == semaphore::SEMAPHORE_INIT {
                if let Some(v) = args.first().and_then(|a| a.as_variable()) {
                    out.insert(v.to_string());
                }
            }
            for a in args {
                record_init_targets(a, out);
            }
        }
        Expr::Let { value, body, .. } => {
            record_init_targets(value, out);
            record_init_targets(body, out);
        }
        Expr::IntImm(_) | Expr::BoolImm(_) | Expr::Variable { .. } => {}
    }
}

// ── Consumer half ───────────────────────────────────────────────────────────

fn generate_consumer_body(
    stage: &str,
    sema: Vec<Expr>,
    body: &Stmt,
) -> Result<Stmt, InternalError> {
    ConsumerHalf { stage, sema }.mutate(body)
}

struct ConsumerHalf<'a> {
    stage: &'a str,
    sema: Vec<Expr>,
}

impl ConsumerHalf<'_> {
    fn mutate(&mut self, stmt: &Stmt) -> Result<Stmt, InternalError> {
        match stmt {
            Stmt::ProducerConsumer {
                name, is_producer, ..
            } if name == self.stage => {
                if *is_producer {
                    // The work happens on the producer side.
                    Ok(Stmt::no_op())
                } else {
                    // Wait for the producer before beginning consumption.
                    let s = self.sema.pop().ok_or_else(|| {
                        InternalError::SemaphoreUnderflow(self.stage.to_string())
                    })?;
                    Ok(Stmt::acquire(s, Expr::int(1), stmt.clone()))
                }
            }
            Stmt::Acquire {
                semaphore: sem,
                count,
                body,
            } => {
                let var = sem.as_variable().ok_or_else(|| {
                    InternalError::AcquireSemaphoreNotVariable(sem.to_string())
                })?;
                if var.starts_with(&semaphore::folding_prefix(self.stage)) {
                    // Folding semaphores belong to the producer side.
                    self.mutate(body)
                } else {
                    Ok(Stmt::acquire(sem.clone(), count.clone(), self.mutate(body)?))
                }
            }
            _ => ir::try_collapse_children(stmt, &mut |s| self.mutate(s)),
        }
    }
}

// ── Semaphore cloning ───────────────────────────────────────────────────────

/// Duplicate every init/release of `old_name` onto `new_var`, so each fork
/// sibling gets its own independent counter.
fn clone_acquire(stmt: &Stmt, old_name: &str, new_var: &Expr) -> Stmt {
    match stmt {
        Stmt::Evaluate {
            value: Expr::Call {
                name, args, kind, ty,
            },
        } if (name == semaphore::SEMAPHORE_RELEASE || name == semaphore::SEMAPHORE_INIT)
            && args.first().and_then(|a| a.as_variable()) == Some(old_name) =>
        {
            let mut cloned_args = args.clone();
            cloned_args[0] = new_var.clone();
            Stmt::block(
                stmt.clone(),
                Stmt::evaluate(Expr::call(name.clone(), cloned_args, *kind, *ty)),
            )
        }
        _ => ir::map_children(stmt, &mut |s| clone_acquire(s, old_name, new_var)),
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
