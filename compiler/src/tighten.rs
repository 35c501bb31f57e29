// tighten.rs — Structural scope adjustments around the fork pass.
//
// Three rewrites that keep the forked tasks lean:
//   * consume-region narrowing shrinks consume markers to the statements that
//     actually touch the buffer, so the consumer blocks on as little as
//     possible;
//   * acquire expansion hoists `Acquire` nodes outward so one task covers as
//     much trailing work as possible, and defers allocations until the permit
//     is held;
//   * fork tightening hoists bindings and allocations shared by both fork
//     children above the fork and drops dead ones inside it.
//
// All three are pure tree rewrites with no failure modes.

use crate::ir::{self, Stmt};

// ── Consume-region narrowing ────────────────────────────────────────────────

/// Narrow every consume marker to the smallest region that references the
/// consumed buffer. Produce markers keep their original extent.
pub fn tighten_consume_regions(stmt: &Stmt) -> Stmt {
    narrow_mutate(stmt)
}

fn narrow_mutate(stmt: &Stmt) -> Stmt {
    match stmt {
        Stmt::ProducerConsumer {
            name,
            is_producer,
            body,
        } => {
            let body = narrow_mutate(body);
            if *is_producer {
                Stmt::produce(name.clone(), body)
            } else {
                narrow(name, false, body)
            }
        }
        _ => ir::map_children(stmt, &mut narrow_mutate),
    }
}

/// Re-wrap `body` in a marker for `name`, pushed as deep as references allow.
fn narrow(name: &str, is_producer: bool, body: Stmt) -> Stmt {
    match body {
        Stmt::LetStmt {
            name: bound,
            value,
            body,
        } => Stmt::let_stmt(bound, value, narrow(name, is_producer, *body)),
        Stmt::Block { first, rest } => {
            let first_uses = region_uses(&first, name);
            let rest_uses = region_uses(&rest, name);
            match (first_uses, rest_uses) {
                // A producer region must stay contiguous.
                (true, true) if is_producer => {
                    Stmt::producer_consumer(name, is_producer, Stmt::Block { first, rest })
                }
                (true, true) => Stmt::block(
                    narrow(name, is_producer, *first),
                    narrow(name, is_producer, *rest),
                ),
                (true, false) => Stmt::block(narrow(name, is_producer, *first), *rest),
                (false, true) => Stmt::block(*first, narrow(name, is_producer, *rest)),
                (false, false) => Stmt::Block { first, rest },
            }
        }
        Stmt::ProducerConsumer {
            name: other,
            is_producer: other_is_producer,
            body,
        } => Stmt::producer_consumer(other, other_is_producer, narrow(name, is_producer, *body)),
        Stmt::Realize {
            name: other,
            types,
            bounds,
            condition,
            body,
        } => Stmt::realize(other, types, bounds, condition, narrow(name, is_producer, *body)),
        body => Stmt::producer_consumer(name, is_producer, body),
    }
}

/// Does the region touch the buffer, either by value or through its handle?
fn region_uses(stmt: &Stmt, name: &str) -> bool {
    ir::stmt_uses_name(stmt, name) || ir::stmt_uses_name(stmt, &format!("{}.buffer", name))
}

// ── Acquire expansion ───────────────────────────────────────────────────────

/// Hoist `Acquire` nodes outward past blocks, allocations, bindings, and
/// markers, so the acquiring task covers the trailing work that is blocked on
/// the same permit anyway.
pub fn expand_acquire_nodes(stmt: &Stmt) -> Stmt {
    expand_mutate(stmt)
}

fn expand_mutate(stmt: &Stmt) -> Stmt {
    match stmt {
        Stmt::Block { first, rest } => match expand_mutate(first) {
            Stmt::Acquire {
                semaphore,
                count,
                body,
            } => {
                // The rest of the block is blocked on the acquire too; fold
                // it into the same task.
                Stmt::acquire(
                    semaphore,
                    count,
                    expand_mutate(&Stmt::block(*body, (**rest).clone())),
                )
            }
            first => Stmt::block(first, expand_mutate(rest)),
        },
        Stmt::Realize {
            name,
            types,
            bounds,
            condition,
            body,
        } => match expand_mutate(body) {
            Stmt::Acquire {
                semaphore,
                count,
                body: inner,
            } => {
                // Don't allocate until the permit is held. Reduces peak
                // memory use.
                Stmt::acquire(
                    semaphore,
                    count,
                    expand_mutate(&Stmt::realize(
                        name.clone(),
                        types.clone(),
                        bounds.clone(),
                        condition.clone(),
                        *inner,
                    )),
                )
            }
            body => Stmt::realize(
                name.clone(),
                types.clone(),
                bounds.clone(),
                condition.clone(),
                body,
            ),
        },
        Stmt::LetStmt { name, value, body } => {
            let body = expand_mutate(body);
            match body {
                Stmt::Acquire {
                    semaphore,
                    count,
                    body: inner,
                } if !ir::expr_uses_name(&semaphore, name)
                    && !ir::expr_uses_name(&count, name) =>
                {
                    Stmt::acquire(
                        semaphore,
                        count,
                        Stmt::let_stmt(name.clone(), value.clone(), *inner),
                    )
                }
                body => Stmt::let_stmt(name.clone(), value.clone(), body),
            }
        }
        Stmt::ProducerConsumer {
            name,
            is_producer,
            body,
        } => match expand_mutate(body) {
            Stmt::Acquire {
                semaphore,
                count,
                body: inner,
            } => Stmt::acquire(
                semaphore,
                count,
                expand_mutate(&Stmt::producer_consumer(name.clone(), *is_producer, *inner)),
            ),
            body => Stmt::producer_consumer(name.clone(), *is_producer, body),
        },
        _ => ir::map_children(stmt, &mut expand_mutate),
    }
}

// ── Fork tightening ─────────────────────────────────────────────────────────

/// Hoist bindings and allocations shared between fork children above the
/// fork, drop dead ones inside fork children, and collapse forks with a
/// no-op child.
pub fn tighten_fork_nodes(stmt: &Stmt) -> Stmt {
    TightenForkNodes { in_fork: false }.mutate(stmt)
}

struct TightenForkNodes {
    in_fork: bool,
}

impl TightenForkNodes {
    fn mutate(&mut self, stmt: &Stmt) -> Stmt {
        match stmt {
            Stmt::Fork { first, rest } => {
                let saved = self.in_fork;
                self.in_fork = true;
                let first = self.mutate(first);
                let rest = self.mutate(rest);
                self.in_fork = saved;
                if first.is_no_op() {
                    rest
                } else if rest.is_no_op() {
                    first
                } else {
                    make_fork(first, rest)
                }
            }
            // Inside a fork, drop bindings and allocations nothing uses.
            Stmt::Realize {
                name,
                types,
                bounds,
                condition,
                body,
            } => {
                let body = self.mutate(body);
                if self.in_fork && !ir::stmt_uses_name(&body, name) {
                    body
                } else {
                    Stmt::realize(
                        name.clone(),
                        types.clone(),
                        bounds.clone(),
                        condition.clone(),
                        body,
                    )
                }
            }
            Stmt::LetStmt { name, value, body } => {
                let body = self.mutate(body);
                if self.in_fork && !ir::stmt_uses_name(&body, name) {
                    body
                } else {
                    Stmt::let_stmt(name.clone(), value.clone(), body)
                }
            }
            _ => ir::map_children(stmt, &mut |s| self.mutate(s)),
        }
    }
}

/// Compose a fork, hoisting shared or one-sided bindings and allocations
/// above it.
fn make_fork(first: Stmt, rest: Stmt) -> Stmt {
    match (first, rest) {
        (
            Stmt::LetStmt {
                name: first_name,
                value: first_value,
                body: first_body,
            },
            Stmt::LetStmt {
                name: rest_name,
                value: rest_value,
                body: rest_body,
            },
        ) if first_name == rest_name && first_value == rest_value => {
            Stmt::let_stmt(first_name, first_value, make_fork(*first_body, *rest_body))
        }
        (first, rest) => match first {
            Stmt::LetStmt { name, value, body } if !ir::stmt_uses_name(&rest, &name) => {
                Stmt::let_stmt(name, value, make_fork(*body, rest))
            }
            first => match rest {
                Stmt::LetStmt { name, value, body } if !ir::stmt_uses_name(&first, &name) => {
                    Stmt::let_stmt(name, value, make_fork(first, *body))
                }
                rest => match first {
                    Stmt::Realize {
                        name,
                        types,
                        bounds,
                        condition,
                        body,
                    } if !ir::stmt_uses_name(&rest, &name) => {
                        Stmt::realize(name, types, bounds, condition, make_fork(*body, rest))
                    }
                    first => match rest {
                        Stmt::Realize {
                            name,
                            types,
                            bounds,
                            condition,
                            body,
                        } if !ir::stmt_uses_name(&first, &name) => {
                            Stmt::realize(name, types, bounds, condition, make_fork(first, *body))
                        }
                        rest => Stmt::fork(first, rest),
                    },
                },
            },
        },
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Bound, CallKind, Expr, Type};

    fn read_stage(name: &str) -> Expr {
        Expr::call(name, vec![Expr::int(0)], CallKind::Stage, Type::UInt8)
    }

    fn use_stage(name: &str) -> Stmt {
        Stmt::evaluate(read_stage(name))
    }

    fn sema_var(name: &str) -> Expr {
        Expr::var(name, Type::SemaphoreHandle)
    }

    fn byte_realize(name: &str, body: Stmt) -> Stmt {
        Stmt::realize(
            name,
            vec![Type::UInt8],
            vec![Bound::new(Expr::int(0), Expr::int(16))],
            Expr::BoolImm(true),
            body,
        )
    }

    // ── Consume narrowing ───────────────────────────────────────────────

    #[test]
    fn consume_narrows_to_the_half_that_reads() {
        let input = Stmt::consume("f", Stmt::block(use_stage("f"), use_stage("g")));
        let out = tighten_consume_regions(&input);
        let expected = Stmt::block(Stmt::consume("f", use_stage("f")), use_stage("g"));
        assert_eq!(out, expected);
    }

    #[test]
    fn consume_splits_when_both_halves_read() {
        let input = Stmt::consume("f", Stmt::block(use_stage("f"), use_stage("f")));
        let out = tighten_consume_regions(&input);
        let expected = Stmt::block(
            Stmt::consume("f", use_stage("f")),
            Stmt::consume("f", use_stage("f")),
        );
        assert_eq!(out, expected);
    }

    #[test]
    fn consume_pushes_inside_bindings_and_markers() {
        let input = Stmt::consume(
            "f",
            Stmt::let_stmt(
                "t",
                Expr::int(3),
                Stmt::produce("g", use_stage("f")),
            ),
        );
        let out = tighten_consume_regions(&input);
        let expected = Stmt::let_stmt(
            "t",
            Expr::int(3),
            Stmt::produce("g", Stmt::consume("f", use_stage("f"))),
        );
        assert_eq!(out, expected);
    }

    #[test]
    fn consume_counts_buffer_handle_references() {
        let handle_use = Stmt::evaluate(Expr::var("f.buffer", Type::Handle));
        let input = Stmt::consume("f", Stmt::block(handle_use.clone(), use_stage("g")));
        let out = tighten_consume_regions(&input);
        let expected = Stmt::block(Stmt::consume("f", handle_use), use_stage("g"));
        assert_eq!(out, expected);
    }

    #[test]
    fn consume_region_using_neither_half_is_unwrapped() {
        let input = Stmt::consume("f", Stmt::block(use_stage("g"), use_stage("h")));
        let out = tighten_consume_regions(&input);
        assert_eq!(out, Stmt::block(use_stage("g"), use_stage("h")));
    }

    #[test]
    fn produce_markers_are_left_alone() {
        let input = Stmt::produce("f", Stmt::block(use_stage("f"), use_stage("g")));
        assert_eq!(tighten_consume_regions(&input), input);
    }

    #[test]
    fn narrow_keeps_producer_regions_contiguous() {
        let body = Stmt::block(use_stage("f"), use_stage("f"));
        let out = narrow("f", true, body.clone());
        assert_eq!(out, Stmt::produce("f", body));
    }

    // ── Acquire expansion ───────────────────────────────────────────────

    #[test]
    fn acquire_absorbs_trailing_block_and_realize() {
        let input = Stmt::block(
            byte_realize(
                "g",
                Stmt::acquire(sema_var("s"), Expr::int(1), use_stage("g")),
            ),
            use_stage("h"),
        );
        let out = expand_acquire_nodes(&input);
        let expected = Stmt::acquire(
            sema_var("s"),
            Expr::int(1),
            Stmt::block(byte_realize("g", use_stage("g")), use_stage("h")),
        );
        assert_eq!(out, expected);
    }

    #[test]
    fn acquire_hoists_past_independent_bindings() {
        let input = Stmt::let_stmt(
            "t",
            Expr::int(3),
            Stmt::acquire(sema_var("s"), Expr::int(1), use_stage("g")),
        );
        let out = expand_acquire_nodes(&input);
        let expected = Stmt::acquire(
            sema_var("s"),
            Expr::int(1),
            Stmt::let_stmt("t", Expr::int(3), use_stage("g")),
        );
        assert_eq!(out, expected);
    }

    #[test]
    fn acquire_stays_below_bindings_it_depends_on() {
        let input = Stmt::let_stmt(
            "s",
            Expr::var("pool", Type::SemaphoreHandle),
            Stmt::acquire(sema_var("s"), Expr::int(1), use_stage("g")),
        );
        assert_eq!(expand_acquire_nodes(&input), input);
    }

    #[test]
    fn acquire_hoists_out_of_markers() {
        let input = Stmt::consume(
            "f",
            Stmt::acquire(sema_var("s"), Expr::int(1), use_stage("f")),
        );
        let out = expand_acquire_nodes(&input);
        let expected = Stmt::acquire(
            sema_var("s"),
            Expr::int(1),
            Stmt::consume("f", use_stage("f")),
        );
        assert_eq!(out, expected);
    }

    #[test]
    fn chained_acquires_hoist_together() {
        let input = Stmt::block(
            Stmt::acquire(
                sema_var("s"),
                Expr::int(1),
                Stmt::acquire(sema_var("t"), Expr::int(1), use_stage("g")),
            ),
            use_stage("h"),
        );
        let out = expand_acquire_nodes(&input);
        let expected = Stmt::acquire(
            sema_var("s"),
            Expr::int(1),
            Stmt::acquire(
                sema_var("t"),
                Expr::int(1),
                Stmt::block(use_stage("g"), use_stage("h")),
            ),
        );
        assert_eq!(out, expected);
    }

    // ── Fork tightening ─────────────────────────────────────────────────

    #[test]
    fn identical_bindings_hoist_above_fork() {
        let input = Stmt::fork(
            Stmt::let_stmt("a", Expr::int(7), use_stage("a")),
            Stmt::let_stmt("a", Expr::int(7), use_stage("a")),
        );
        let out = tighten_fork_nodes(&input);
        let expected = Stmt::let_stmt(
            "a",
            Expr::int(7),
            Stmt::fork(use_stage("a"), use_stage("a")),
        );
        assert_eq!(out, expected);
    }

    #[test]
    fn mismatched_bindings_do_not_hoist() {
        let input = Stmt::fork(
            Stmt::let_stmt("a", Expr::int(7), use_stage("a")),
            Stmt::let_stmt("a", Expr::int(8), use_stage("a")),
        );
        assert_eq!(tighten_fork_nodes(&input), input);
    }

    #[test]
    fn one_sided_binding_hoists_when_other_side_is_independent() {
        let input = Stmt::fork(
            Stmt::let_stmt("a", Expr::int(7), use_stage("a")),
            use_stage("b"),
        );
        let out = tighten_fork_nodes(&input);
        let expected = Stmt::let_stmt(
            "a",
            Expr::int(7),
            Stmt::fork(use_stage("a"), use_stage("b")),
        );
        assert_eq!(out, expected);
    }

    #[test]
    fn allocation_hoists_above_fork_when_one_sided() {
        let input = Stmt::fork(byte_realize("g", use_stage("g")), use_stage("h"));
        let out = tighten_fork_nodes(&input);
        let expected = byte_realize("g", Stmt::fork(use_stage("g"), use_stage("h")));
        assert_eq!(out, expected);
    }

    #[test]
    fn dead_bindings_inside_fork_children_are_dropped() {
        let input = Stmt::fork(
            Stmt::let_stmt("dead", Expr::int(1), use_stage("a")),
            byte_realize("unused", use_stage("b")),
        );
        let out = tighten_fork_nodes(&input);
        assert_eq!(out, Stmt::fork(use_stage("a"), use_stage("b")));
    }

    #[test]
    fn bindings_outside_forks_are_kept_even_if_dead() {
        let input = Stmt::let_stmt("quiet", Expr::int(1), use_stage("a"));
        assert_eq!(tighten_fork_nodes(&input), input);
    }

    #[test]
    fn fork_with_no_op_child_collapses() {
        let input = Stmt::fork(Stmt::no_op(), use_stage("a"));
        assert_eq!(tighten_fork_nodes(&input), use_stage("a"));
    }
}
