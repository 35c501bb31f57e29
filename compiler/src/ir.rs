// ir.rs — Mid-end statement IR for stage splitting.
//
// Tagged-variant representation of the fully-lowered statement tree that the
// splitting passes rewrite. Two mutually-recursive categories: `Stmt` (no
// value) and `Expr` (typed values). Construction goes through the `make`-style
// helpers so pass code stays free of `Box::new` noise.
//
// Preconditions: trees come from earlier lowering with globally unique names.
// Postconditions: none (types and pure helpers only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

// ── Types ───────────────────────────────────────────────────────────────────

/// Scalar and handle types carried by expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    Bool,
    UInt8,
    Int32,
    Float32,
    /// Opaque pointer with no further meaning to the mid-end.
    Handle,
    /// Pointer to a runtime semaphore record. Bindings of this type are the
    /// trigger for semaphore lowering.
    SemaphoreHandle,
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Type::Bool => "bool",
            Type::UInt8 => "uint8",
            Type::Int32 => "int32",
            Type::Float32 => "float32",
            Type::Handle => "handle",
            Type::SemaphoreHandle => "semaphore*",
        };
        write!(f, "{}", s)
    }
}

// ── Expressions ─────────────────────────────────────────────────────────────

/// How a call resolves at code generation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    /// Resolved by the linker against the runtime library.
    Extern,
    /// Open-coded by the backend (e.g. `alloca`).
    Intrinsic,
    /// Read of a realized stage buffer, by stage name.
    Stage,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    IntImm(i32),
    BoolImm(bool),
    Variable {
        name: String,
        ty: Type,
    },
    Let {
        name: String,
        value: Box<Expr>,
        body: Box<Expr>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
        kind: CallKind,
        ty: Type,
    },
}

impl Expr {
    pub fn int(v: i32) -> Expr {
        Expr::IntImm(v)
    }

    pub fn var(name: impl Into<String>, ty: Type) -> Expr {
        Expr::Variable {
            name: name.into(),
            ty,
        }
    }

    pub fn let_in(name: impl Into<String>, value: Expr, body: Expr) -> Expr {
        Expr::Let {
            name: name.into(),
            value: Box::new(value),
            body: Box::new(body),
        }
    }

    pub fn call(name: impl Into<String>, args: Vec<Expr>, kind: CallKind, ty: Type) -> Expr {
        Expr::Call {
            name: name.into(),
            args,
            kind,
            ty,
        }
    }

    /// The type this expression evaluates to.
    pub fn ty(&self) -> Type {
        match self {
            Expr::IntImm(_) => Type::Int32,
            Expr::BoolImm(_) => Type::Bool,
            Expr::Variable { ty, .. } | Expr::Call { ty, .. } => *ty,
            Expr::Let { body, .. } => body.ty(),
        }
    }

    /// Variable name if this is a `Variable` node.
    pub fn as_variable(&self) -> Option<&str> {
        match self {
            Expr::Variable { name, .. } => Some(name),
            _ => None,
        }
    }
}

// ── Statements ──────────────────────────────────────────────────────────────

/// One dimension of a realize allocation: `min .. min+extent`.
#[derive(Debug, Clone, PartialEq)]
pub struct Bound {
    pub min: Expr,
    pub extent: Expr,
}

impl Bound {
    pub fn new(min: Expr, extent: Expr) -> Bound {
        Bound { min, extent }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopKind {
    Serial,
    Parallel,
    Vectorized,
    Unrolled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceApi {
    None,
    Host,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// Scoped binding over `body`.
    LetStmt {
        name: String,
        value: Expr,
        body: Box<Stmt>,
    },
    AssertStmt {
        condition: Expr,
        message: Expr,
    },
    /// Sequential composition.
    Block {
        first: Box<Stmt>,
        rest: Box<Stmt>,
    },
    For {
        name: String,
        min: Expr,
        extent: Expr,
        kind: LoopKind,
        device: DeviceApi,
        body: Box<Stmt>,
    },
    /// Store of `values` into stage buffer `name` at `args`.
    Provide {
        name: String,
        values: Vec<Expr>,
        args: Vec<Expr>,
    },
    /// Allocate buffer `name` over `body`; freed when `body` exits.
    Realize {
        name: String,
        types: Vec<Type>,
        bounds: Vec<Bound>,
        condition: Expr,
        body: Box<Stmt>,
    },
    /// Marks `body` as the region producing (or consuming) buffer `name`.
    ProducerConsumer {
        name: String,
        is_producer: bool,
        body: Box<Stmt>,
    },
    /// Run `first` and `rest` as concurrent sibling tasks.
    Fork {
        first: Box<Stmt>,
        rest: Box<Stmt>,
    },
    /// Block until `count` permits are available on `semaphore`, then run `body`.
    Acquire {
        semaphore: Expr,
        count: Expr,
        body: Box<Stmt>,
    },
    Evaluate {
        value: Expr,
    },
    /// Leaf at this lowering phase: hint to prefetch a region of `name`.
    Prefetch {
        name: String,
        bounds: Vec<Bound>,
    },
    IfThenElse {
        condition: Expr,
        then_case: Box<Stmt>,
        else_case: Option<Box<Stmt>>,
    },
}

impl Stmt {
    /// The canonical null statement.
    pub fn no_op() -> Stmt {
        Stmt::Evaluate {
            value: Expr::IntImm(0),
        }
    }

    pub fn is_no_op(&self) -> bool {
        matches!(
            self,
            Stmt::Evaluate {
                value: Expr::IntImm(0)
            }
        )
    }

    pub fn let_stmt(name: impl Into<String>, value: Expr, body: Stmt) -> Stmt {
        Stmt::LetStmt {
            name: name.into(),
            value,
            body: Box::new(body),
        }
    }

    pub fn assert_stmt(condition: Expr, message: Expr) -> Stmt {
        Stmt::AssertStmt { condition, message }
    }

    pub fn block(first: Stmt, rest: Stmt) -> Stmt {
        Stmt::Block {
            first: Box::new(first),
            rest: Box::new(rest),
        }
    }

    pub fn for_loop(
        name: impl Into<String>,
        min: Expr,
        extent: Expr,
        kind: LoopKind,
        body: Stmt,
    ) -> Stmt {
        Stmt::For {
            name: name.into(),
            min,
            extent,
            kind,
            device: DeviceApi::None,
            body: Box::new(body),
        }
    }

    pub fn provide(name: impl Into<String>, values: Vec<Expr>, args: Vec<Expr>) -> Stmt {
        Stmt::Provide {
            name: name.into(),
            values,
            args,
        }
    }

    pub fn realize(
        name: impl Into<String>,
        types: Vec<Type>,
        bounds: Vec<Bound>,
        condition: Expr,
        body: Stmt,
    ) -> Stmt {
        Stmt::Realize {
            name: name.into(),
            types,
            bounds,
            condition,
            body: Box::new(body),
        }
    }

    pub fn producer_consumer(name: impl Into<String>, is_producer: bool, body: Stmt) -> Stmt {
        Stmt::ProducerConsumer {
            name: name.into(),
            is_producer,
            body: Box::new(body),
        }
    }

    pub fn produce(name: impl Into<String>, body: Stmt) -> Stmt {
        Stmt::producer_consumer(name, true, body)
    }

    pub fn consume(name: impl Into<String>, body: Stmt) -> Stmt {
        Stmt::producer_consumer(name, false, body)
    }

    pub fn fork(first: Stmt, rest: Stmt) -> Stmt {
        Stmt::Fork {
            first: Box::new(first),
            rest: Box::new(rest),
        }
    }

    pub fn acquire(semaphore: Expr, count: Expr, body: Stmt) -> Stmt {
        Stmt::Acquire {
            semaphore,
            count,
            body: Box::new(body),
        }
    }

    pub fn evaluate(value: Expr) -> Stmt {
        Stmt::Evaluate { value }
    }

    pub fn if_then_else(condition: Expr, then_case: Stmt, else_case: Option<Stmt>) -> Stmt {
        Stmt::IfThenElse {
            condition,
            then_case: Box::new(then_case),
            else_case: else_case.map(Box::new),
        }
    }
}

// ── Name references ─────────────────────────────────────────────────────────

/// True when `name` occurs in the expression as a variable reference or as a
/// call target. Names are globally unique after earlier uniquification, so no
/// shadow tracking is needed.
pub fn expr_uses_name(expr: &Expr, name: &str) -> bool {
    match expr {
        Expr::IntImm(_) | Expr::BoolImm(_) => false,
        Expr::Variable { name: n, .. } => n == name,
        Expr::Let { value, body, .. } => expr_uses_name(value, name) || expr_uses_name(body, name),
        Expr::Call { name: n, args, .. } => {
            n == name || args.iter().any(|a| expr_uses_name(a, name))
        }
    }
}

/// True when `name` occurs anywhere in the statement tree: as a variable, a
/// call target, or a `Provide`/`Prefetch` destination.
pub fn stmt_uses_name(stmt: &Stmt, name: &str) -> bool {
    let mut found = false;
    walk_stmts(stmt, &mut |s| {
        if found {
            return;
        }
        let names_target = match s {
            Stmt::Provide { name: n, .. } | Stmt::Prefetch { name: n, .. } => n == name,
            _ => false,
        };
        found = names_target || exprs_of(s).iter().any(|e| expr_uses_name(e, name));
    });
    found
}

/// True when a call to `callee` occurs anywhere in the expression.
pub fn expr_contains_call(expr: &Expr, callee: &str) -> bool {
    match expr {
        Expr::IntImm(_) | Expr::BoolImm(_) | Expr::Variable { .. } => false,
        Expr::Let { value, body, .. } => {
            expr_contains_call(value, callee) || expr_contains_call(body, callee)
        }
        Expr::Call { name, args, .. } => {
            name == callee || args.iter().any(|a| expr_contains_call(a, callee))
        }
    }
}

// ── Traversal ───────────────────────────────────────────────────────────────

/// Pre-order walk over every statement in the tree, including `stmt` itself.
pub fn walk_stmts(stmt: &Stmt, f: &mut impl FnMut(&Stmt)) {
    f(stmt);
    match stmt {
        Stmt::LetStmt { body, .. }
        | Stmt::For { body, .. }
        | Stmt::Realize { body, .. }
        | Stmt::ProducerConsumer { body, .. }
        | Stmt::Acquire { body, .. } => walk_stmts(body, f),
        Stmt::Block { first, rest } | Stmt::Fork { first, rest } => {
            walk_stmts(first, f);
            walk_stmts(rest, f);
        }
        Stmt::IfThenElse {
            then_case,
            else_case,
            ..
        } => {
            walk_stmts(then_case, f);
            if let Some(e) = else_case {
                walk_stmts(e, f);
            }
        }
        Stmt::AssertStmt { .. }
        | Stmt::Provide { .. }
        | Stmt::Evaluate { .. }
        | Stmt::Prefetch { .. } => {}
    }
}

/// The expressions held directly by one statement node (child statements are
/// not entered).
pub fn exprs_of(stmt: &Stmt) -> Vec<&Expr> {
    match stmt {
        Stmt::LetStmt { value, .. } => vec![value],
        Stmt::AssertStmt { condition, message } => vec![condition, message],
        Stmt::Block { .. } | Stmt::Fork { .. } => Vec::new(),
        Stmt::For { min, extent, .. } => vec![min, extent],
        Stmt::Provide { values, args, .. } => values.iter().chain(args.iter()).collect(),
        Stmt::Realize {
            bounds, condition, ..
        } => bounds
            .iter()
            .flat_map(|b| [&b.min, &b.extent])
            .chain(std::iter::once(condition))
            .collect(),
        Stmt::ProducerConsumer { .. } => Vec::new(),
        Stmt::Acquire {
            semaphore, count, ..
        } => vec![semaphore, count],
        Stmt::Evaluate { value } => vec![value],
        Stmt::Prefetch { bounds, .. } => bounds.iter().flat_map(|b| [&b.min, &b.extent]).collect(),
        Stmt::IfThenElse { condition, .. } => vec![condition],
    }
}

/// Default recursive rewrite: apply `f` to each child statement and rebuild
/// the node with original metadata. Leaves are cloned.
pub fn map_children(stmt: &Stmt, f: &mut impl FnMut(&Stmt) -> Stmt) -> Stmt {
    match stmt {
        Stmt::LetStmt { name, value, body } => Stmt::let_stmt(name.clone(), value.clone(), f(body)),
        Stmt::Block { first, rest } => Stmt::block(f(first), f(rest)),
        Stmt::For {
            name,
            min,
            extent,
            kind,
            device,
            body,
        } => Stmt::For {
            name: name.clone(),
            min: min.clone(),
            extent: extent.clone(),
            kind: *kind,
            device: *device,
            body: Box::new(f(body)),
        },
        Stmt::Realize {
            name,
            types,
            bounds,
            condition,
            body,
        } => Stmt::realize(
            name.clone(),
            types.clone(),
            bounds.clone(),
            condition.clone(),
            f(body),
        ),
        Stmt::ProducerConsumer {
            name,
            is_producer,
            body,
        } => Stmt::producer_consumer(name.clone(), *is_producer, f(body)),
        Stmt::Fork { first, rest } => Stmt::fork(f(first), f(rest)),
        Stmt::Acquire {
            semaphore,
            count,
            body,
        } => Stmt::acquire(semaphore.clone(), count.clone(), f(body)),
        Stmt::IfThenElse {
            condition,
            then_case,
            else_case,
        } => Stmt::if_then_else(
            condition.clone(),
            f(then_case),
            else_case.as_deref().map(&mut *f),
        ),
        Stmt::AssertStmt { .. }
        | Stmt::Provide { .. }
        | Stmt::Evaluate { .. }
        | Stmt::Prefetch { .. } => stmt.clone(),
    }
}

/// Fallible variant of [`map_children`].
pub fn try_map_children<E>(
    stmt: &Stmt,
    f: &mut impl FnMut(&Stmt) -> Result<Stmt, E>,
) -> Result<Stmt, E> {
    let mut err = None;
    let out = map_children(stmt, &mut |s| match f(s) {
        Ok(s) => s,
        Err(e) => {
            if err.is_none() {
                err = Some(e);
            }
            Stmt::no_op()
        }
    });
    match err {
        Some(e) => Err(e),
        None => Ok(out),
    }
}

/// The no-op-collapsing default rewrite: apply `f` to each child statement
/// and, when the result reduces to the canonical no-op, collapse the node.
/// Applies to `LetStmt`, `For`, `Block`, `Fork`, `Realize`, and `IfThenElse`
/// (the latter only when both branches collapse); `ProducerConsumer` and
/// `Acquire` are rebuilt without collapsing, leaves are cloned.
pub fn try_collapse_children<E>(
    stmt: &Stmt,
    f: &mut impl FnMut(&Stmt) -> Result<Stmt, E>,
) -> Result<Stmt, E> {
    match stmt {
        Stmt::LetStmt { name, value, body } => {
            let body = f(body)?;
            Ok(if body.is_no_op() {
                body
            } else {
                Stmt::let_stmt(name.clone(), value.clone(), body)
            })
        }
        Stmt::For {
            name,
            min,
            extent,
            kind,
            device,
            body,
        } => {
            let body = f(body)?;
            Ok(if body.is_no_op() {
                body
            } else {
                Stmt::For {
                    name: name.clone(),
                    min: min.clone(),
                    extent: extent.clone(),
                    kind: *kind,
                    device: *device,
                    body: Box::new(body),
                }
            })
        }
        Stmt::Block { first, rest } => {
            let first = f(first)?;
            let rest = f(rest)?;
            Ok(if first.is_no_op() {
                rest
            } else if rest.is_no_op() {
                first
            } else {
                Stmt::block(first, rest)
            })
        }
        Stmt::Fork { first, rest } => {
            let first = f(first)?;
            let rest = f(rest)?;
            Ok(if first.is_no_op() {
                rest
            } else if rest.is_no_op() {
                first
            } else {
                Stmt::fork(first, rest)
            })
        }
        Stmt::Realize {
            name,
            types,
            bounds,
            condition,
            body,
        } => {
            let body = f(body)?;
            Ok(if body.is_no_op() {
                body
            } else {
                Stmt::realize(name.clone(), types.clone(), bounds.clone(), condition.clone(), body)
            })
        }
        Stmt::IfThenElse {
            condition,
            then_case,
            else_case,
        } => {
            let then_case = f(then_case)?;
            let else_case = match else_case {
                Some(e) => Some(f(e)?),
                None => None,
            };
            let else_is_no_op = else_case.as_ref().map_or(true, |e| e.is_no_op());
            Ok(if then_case.is_no_op() && else_is_no_op {
                then_case
            } else {
                Stmt::if_then_else(condition.clone(), then_case, else_case)
            })
        }
        _ => try_map_children(stmt, f),
    }
}

// ── Printer ─────────────────────────────────────────────────────────────────

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::IntImm(v) => write!(f, "{}", v),
            Expr::BoolImm(v) => write!(f, "{}", v),
            Expr::Variable { name, .. } => write!(f, "{}", name),
            Expr::Let { name, value, body } => {
                write!(f, "(let {} = {} in {})", name, value, body)
            }
            Expr::Call { name, args, .. } => {
                write!(f, "{}(", name)?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", a)?;
                }
                write!(f, ")")
            }
        }
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_stmt(f, self, 0)
    }
}

fn fmt_exprs(f: &mut fmt::Formatter<'_>, exprs: &[Expr]) -> fmt::Result {
    for (i, e) in exprs.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", e)?;
    }
    Ok(())
}

fn fmt_bounds(f: &mut fmt::Formatter<'_>, bounds: &[Bound]) -> fmt::Result {
    for (i, b) in bounds.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}..{}", b.min, b.extent)?;
    }
    Ok(())
}

fn fmt_stmt(f: &mut fmt::Formatter<'_>, stmt: &Stmt, indent: usize) -> fmt::Result {
    let pad = "  ".repeat(indent);
    match stmt {
        Stmt::LetStmt { name, value, body } => {
            writeln!(f, "{}let {} = {}", pad, name, value)?;
            fmt_stmt(f, body, indent)
        }
        Stmt::AssertStmt { condition, message } => {
            writeln!(f, "{}assert({}, {})", pad, condition, message)
        }
        Stmt::Block { first, rest } => {
            fmt_stmt(f, first, indent)?;
            fmt_stmt(f, rest, indent)
        }
        Stmt::For {
            name,
            min,
            extent,
            kind,
            body,
            ..
        } => {
            let kw = match kind {
                LoopKind::Serial => "for",
                LoopKind::Parallel => "parallel for",
                LoopKind::Vectorized => "vectorized for",
                LoopKind::Unrolled => "unrolled for",
            };
            writeln!(f, "{}{} ({}, {}, {}) {{", pad, kw, name, min, extent)?;
            fmt_stmt(f, body, indent + 1)?;
            writeln!(f, "{}}}", pad)
        }
        Stmt::Provide { name, values, args } => {
            write!(f, "{}{}(", pad, name)?;
            fmt_exprs(f, args)?;
            write!(f, ") = ")?;
            if values.len() == 1 {
                writeln!(f, "{}", values[0])
            } else {
                write!(f, "{{")?;
                fmt_exprs(f, values)?;
                writeln!(f, "}}")
            }
        }
        Stmt::Realize {
            name,
            types,
            bounds,
            condition,
            body,
        } => {
            write!(f, "{}realize {}(", pad, name)?;
            for (i, t) in types.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", t)?;
            }
            write!(f, ", [")?;
            fmt_bounds(f, bounds)?;
            write!(f, "])")?;
            if !matches!(condition, Expr::BoolImm(true)) {
                write!(f, " if {}", condition)?;
            }
            writeln!(f, " {{")?;
            fmt_stmt(f, body, indent + 1)?;
            writeln!(f, "{}}}", pad)
        }
        Stmt::ProducerConsumer {
            name,
            is_producer,
            body,
        } => {
            let kw = if *is_producer { "produce" } else { "consume" };
            writeln!(f, "{}{} {} {{", pad, kw, name)?;
            fmt_stmt(f, body, indent + 1)?;
            writeln!(f, "{}}}", pad)
        }
        Stmt::Fork { first, rest } => {
            writeln!(f, "{}fork {{", pad)?;
            fmt_stmt(f, first, indent + 1)?;
            writeln!(f, "{}}} {{", pad)?;
            fmt_stmt(f, rest, indent + 1)?;
            writeln!(f, "{}}}", pad)
        }
        Stmt::Acquire {
            semaphore,
            count,
            body,
        } => {
            writeln!(f, "{}acquire ({}, {}) {{", pad, semaphore, count)?;
            fmt_stmt(f, body, indent + 1)?;
            writeln!(f, "{}}}", pad)
        }
        Stmt::Evaluate { value } => writeln!(f, "{}{}", pad, value),
        Stmt::Prefetch { name, bounds } => {
            write!(f, "{}prefetch {}([", pad, name)?;
            fmt_bounds(f, bounds)?;
            writeln!(f, "])")
        }
        Stmt::IfThenElse {
            condition,
            then_case,
            else_case,
        } => {
            writeln!(f, "{}if ({}) {{", pad, condition)?;
            fmt_stmt(f, then_case, indent + 1)?;
            if let Some(e) = else_case {
                writeln!(f, "{}}} else {{", pad)?;
                fmt_stmt(f, e, indent + 1)?;
            }
            writeln!(f, "{}}}", pad)
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use std::convert::Infallible;

    fn collapse(stmt: &Stmt) -> Stmt {
        let r: Result<Stmt, Infallible> = try_collapse_children(stmt, &mut |s| Ok(collapse(s)));
        r.unwrap()
    }

    #[test]
    fn no_op_identity() {
        assert!(Stmt::no_op().is_no_op());
        assert!(!Stmt::evaluate(Expr::int(1)).is_no_op());
        assert!(!Stmt::evaluate(Expr::var("x", Type::Int32)).is_no_op());
    }

    #[test]
    fn block_collapses_around_no_ops() {
        let b = Stmt::block(Stmt::no_op(), Stmt::evaluate(Expr::int(1)));
        assert_eq!(collapse(&b), Stmt::evaluate(Expr::int(1)));

        let b = Stmt::block(Stmt::evaluate(Expr::int(1)), Stmt::no_op());
        assert_eq!(collapse(&b), Stmt::evaluate(Expr::int(1)));
    }

    #[test]
    fn nested_structure_collapses_to_no_op() {
        let s = Stmt::realize(
            "f",
            vec![Type::UInt8],
            vec![Bound::new(Expr::int(0), Expr::int(8))],
            Expr::BoolImm(true),
            Stmt::for_loop(
                "x",
                Expr::int(0),
                Expr::int(8),
                LoopKind::Serial,
                Stmt::let_stmt("t", Expr::int(3), Stmt::no_op()),
            ),
        );
        assert!(collapse(&s).is_no_op());
    }

    #[test]
    fn if_collapses_only_when_both_branches_do() {
        let half = Stmt::if_then_else(
            Expr::var("c", Type::Bool),
            Stmt::no_op(),
            Some(Stmt::evaluate(Expr::int(1))),
        );
        assert!(!collapse(&half).is_no_op());

        let both = Stmt::if_then_else(Expr::var("c", Type::Bool), Stmt::no_op(), Some(Stmt::no_op()));
        assert!(collapse(&both).is_no_op());

        let no_else = Stmt::if_then_else(Expr::var("c", Type::Bool), Stmt::no_op(), None);
        assert!(collapse(&no_else).is_no_op());
    }

    #[test]
    fn collapse_is_idempotent() {
        let s = Stmt::block(
            Stmt::fork(Stmt::no_op(), Stmt::evaluate(Expr::int(2))),
            Stmt::let_stmt("t", Expr::int(1), Stmt::no_op()),
        );
        let once = collapse(&s);
        assert_eq!(collapse(&once), once);
    }

    #[test]
    fn marker_and_acquire_do_not_collapse() {
        let m = Stmt::consume("f", Stmt::no_op());
        assert_eq!(collapse(&m), m);

        let a = Stmt::acquire(
            Expr::var("s", Type::SemaphoreHandle),
            Expr::int(1),
            Stmt::no_op(),
        );
        assert_eq!(collapse(&a), a);
    }

    #[test]
    fn uses_name_sees_variables_calls_and_provides() {
        let s = Stmt::block(
            Stmt::provide("f", vec![Expr::int(1)], vec![Expr::var("x", Type::Int32)]),
            Stmt::evaluate(Expr::call(
                "g",
                vec![Expr::var("y", Type::Int32)],
                CallKind::Stage,
                Type::UInt8,
            )),
        );
        assert!(stmt_uses_name(&s, "f"));
        assert!(stmt_uses_name(&s, "g"));
        assert!(stmt_uses_name(&s, "x"));
        assert!(stmt_uses_name(&s, "y"));
        assert!(!stmt_uses_name(&s, "z"));
    }

    #[test]
    fn uses_name_sees_realize_bounds() {
        let s = Stmt::realize(
            "f",
            vec![Type::UInt8],
            vec![Bound::new(Expr::int(0), Expr::var("n", Type::Int32))],
            Expr::BoolImm(true),
            Stmt::no_op(),
        );
        assert!(stmt_uses_name(&s, "n"));
    }

    #[test]
    fn contains_call_walks_let_values() {
        let e = Expr::let_in(
            "t",
            Expr::call("make_thing", vec![], CallKind::Extern, Type::Handle),
            Expr::var("t", Type::Handle),
        );
        assert!(expr_contains_call(&e, "make_thing"));
        assert!(!expr_contains_call(&e, "other"));
    }

    #[test]
    fn display_realize_fork() {
        let s = Stmt::realize(
            "f",
            vec![Type::UInt8],
            vec![Bound::new(Expr::int(0), Expr::int(16))],
            Expr::BoolImm(true),
            Stmt::fork(
                Stmt::produce("f", Stmt::provide("f", vec![Expr::int(7)], vec![Expr::int(0)])),
                Stmt::consume(
                    "f",
                    Stmt::evaluate(Expr::call(
                        "f",
                        vec![Expr::int(0)],
                        CallKind::Stage,
                        Type::UInt8,
                    )),
                ),
            ),
        );
        let expected = indoc! {"
            realize f(uint8, [0..16]) {
              fork {
                produce f {
                  f(0) = 7
                }
              } {
                consume f {
                  f(0)
                }
              }
            }
        "};
        assert_eq!(s.to_string(), expected);
    }

    #[test]
    fn display_let_and_acquire() {
        let s = Stmt::let_stmt(
            "f.semaphore_0",
            Expr::call("make_sem", vec![Expr::int(0)], CallKind::Extern, Type::SemaphoreHandle),
            Stmt::acquire(
                Expr::var("f.semaphore_0", Type::SemaphoreHandle),
                Expr::int(1),
                Stmt::no_op(),
            ),
        );
        let expected = indoc! {"
            let f.semaphore_0 = make_sem(0)
            acquire (f.semaphore_0, 1) {
              0
            }
        "};
        assert_eq!(s.to_string(), expected);
    }
}
