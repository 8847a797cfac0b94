// expr.rs — Expression AST for stencil equations
//
// A tagged expression graph: constants, grid-point reads, parameter reads,
// negation, n-ary commutative operators, and non-commutative binary
// operators. Nodes are `Rc`-shared; after common-subexpression elimination
// the graph is a DAG and node identity is pointer identity. Stencil
// clients build expressions through the `Ast` wrapper, which overloads the
// arithmetic operators.
//
// Preconditions: none.
// Postconditions: construction never creates reference cycles — children
//                 are immutable once wrapped in `Rc`.
// Failure modes: none (data-only module).
// Side effects: none.

use std::cmp::Ordering;
use std::ops;
use std::rc::Rc;

use crate::tuple::IntTuple;

pub type ExprRef = Rc<Expr>;

// ── Leaf references ──────────────────────────────────────────────────────

/// A read of one grid point: grid name plus absolute offset tuple.
/// The offset tuple carries exactly the grid's declared dimensions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GridPoint {
    pub grid: String,
    pub offsets: IntTuple,
}

impl GridPoint {
    pub fn new(grid: &str, offsets: IntTuple) -> Self {
        Self {
            grid: grid.to_string(),
            offsets,
        }
    }
}

/// A read of one parameter element: param name plus index tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParamIndex {
    pub param: String,
    pub indices: IntTuple,
}

// ── Operators ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommOp {
    Add,
    Mul,
}

impl CommOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CommOp::Add => "+",
            CommOp::Mul => "*",
        }
    }

    /// Identity element: dropped when folding constants.
    pub fn identity(self) -> f64 {
        match self {
            CommOp::Add => 0.0,
            CommOp::Mul => 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Sub,
    Div,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Sub => "-",
            BinOp::Div => "/",
        }
    }
}

// ── Expression nodes ─────────────────────────────────────────────────────

/// One expression node. Structural equality (`PartialEq`) compares whole
/// subtrees; pointer identity (`ptr_id`) distinguishes shared nodes.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Const(f64),
    GridRead(GridPoint),
    ParamRead(ParamIndex),
    Neg(ExprRef),
    Commutative { op: CommOp, args: Vec<ExprRef> },
    Binary { op: BinOp, lhs: ExprRef, rhs: ExprRef },
}

impl Expr {
    /// Rank of the variant in the canonical operand order.
    pub fn tag_rank(&self) -> u8 {
        match self {
            Expr::Const(_) => 0,
            Expr::GridRead(_) => 1,
            Expr::ParamRead(_) => 2,
            Expr::Neg(_) => 3,
            Expr::Commutative { .. } => 4,
            Expr::Binary { .. } => 5,
        }
    }

    /// Total node count of the subtree, counting shared nodes once per
    /// occurrence (tree size, not DAG size).
    pub fn tree_size(&self) -> usize {
        match self {
            Expr::Const(_) | Expr::GridRead(_) | Expr::ParamRead(_) => 1,
            Expr::Neg(e) => 1 + e.tree_size(),
            Expr::Commutative { args, .. } => {
                1 + args.iter().map(|a| a.tree_size()).sum::<usize>()
            }
            Expr::Binary { lhs, rhs, .. } => 1 + lhs.tree_size() + rhs.tree_size(),
        }
    }
}

/// Pointer identity of a node, used as a map key by the rewrite passes.
pub fn ptr_id(e: &ExprRef) -> usize {
    Rc::as_ptr(e) as usize
}

// ── Canonical total order ────────────────────────────────────────────────

/// The documented total order underpinning commutative canonicalization:
/// variant-tag rank first; then literal value (`total_cmp`); then grid or
/// param name with offset tuples compared lexicographically; then
/// recursively over children. Stable and total, which CSE relies on.
pub fn canonical_cmp(a: &Expr, b: &Expr) -> Ordering {
    match a.tag_rank().cmp(&b.tag_rank()) {
        Ordering::Equal => {}
        ord => return ord,
    }
    match (a, b) {
        (Expr::Const(x), Expr::Const(y)) => x.total_cmp(y),
        (Expr::GridRead(x), Expr::GridRead(y)) => x
            .grid
            .cmp(&y.grid)
            .then_with(|| x.offsets.cmp(&y.offsets)),
        (Expr::ParamRead(x), Expr::ParamRead(y)) => x
            .param
            .cmp(&y.param)
            .then_with(|| x.indices.cmp(&y.indices)),
        (Expr::Neg(x), Expr::Neg(y)) => canonical_cmp(x, y),
        (
            Expr::Commutative { op: oa, args: xa },
            Expr::Commutative { op: ob, args: xb },
        ) => comm_rank(*oa).cmp(&comm_rank(*ob)).then_with(|| {
            for (x, y) in xa.iter().zip(xb.iter()) {
                match canonical_cmp(x, y) {
                    Ordering::Equal => continue,
                    ord => return ord,
                }
            }
            xa.len().cmp(&xb.len())
        }),
        (
            Expr::Binary {
                op: oa,
                lhs: la,
                rhs: ra,
            },
            Expr::Binary {
                op: ob,
                lhs: lb,
                rhs: rb,
            },
        ) => bin_rank(*oa)
            .cmp(&bin_rank(*ob))
            .then_with(|| canonical_cmp(la, lb))
            .then_with(|| canonical_cmp(ra, rb)),
        _ => unreachable!("tag ranks matched but variants differ"),
    }
}

fn comm_rank(op: CommOp) -> u8 {
    match op {
        CommOp::Add => 0,
        CommOp::Mul => 1,
    }
}

fn bin_rank(op: BinOp) -> u8 {
    match op {
        BinOp::Sub => 0,
        BinOp::Div => 1,
    }
}

// ── Builder wrapper ──────────────────────────────────────────────────────

/// Thin handle stencil clients use to compose expressions with `+ - * /`.
/// Operators build two-operand nodes; flattening to canonical n-ary form
/// is the combine pass's job.
#[derive(Debug, Clone)]
pub struct Ast(pub ExprRef);

impl Ast {
    pub fn constant(v: f64) -> Self {
        Ast(Rc::new(Expr::Const(v)))
    }

    pub fn grid_read(point: GridPoint) -> Self {
        Ast(Rc::new(Expr::GridRead(point)))
    }

    pub fn param_read(index: ParamIndex) -> Self {
        Ast(Rc::new(Expr::ParamRead(index)))
    }

    pub fn into_expr(self) -> ExprRef {
        self.0
    }

    pub fn expr(&self) -> &ExprRef {
        &self.0
    }

    fn comm(op: CommOp, lhs: Ast, rhs: Ast) -> Ast {
        Ast(Rc::new(Expr::Commutative {
            op,
            args: vec![lhs.0, rhs.0],
        }))
    }

    fn bin(op: BinOp, lhs: Ast, rhs: Ast) -> Ast {
        Ast(Rc::new(Expr::Binary {
            op,
            lhs: lhs.0,
            rhs: rhs.0,
        }))
    }
}

impl From<f64> for Ast {
    fn from(v: f64) -> Self {
        Ast::constant(v)
    }
}

impl ops::Add for Ast {
    type Output = Ast;
    fn add(self, rhs: Ast) -> Ast {
        Ast::comm(CommOp::Add, self, rhs)
    }
}

impl ops::Mul for Ast {
    type Output = Ast;
    fn mul(self, rhs: Ast) -> Ast {
        Ast::comm(CommOp::Mul, self, rhs)
    }
}

impl ops::Sub for Ast {
    type Output = Ast;
    fn sub(self, rhs: Ast) -> Ast {
        Ast::bin(BinOp::Sub, self, rhs)
    }
}

impl ops::Div for Ast {
    type Output = Ast;
    fn div(self, rhs: Ast) -> Ast {
        Ast::bin(BinOp::Div, self, rhs)
    }
}

impl ops::Neg for Ast {
    type Output = Ast;
    fn neg(self) -> Ast {
        Ast(Rc::new(Expr::Neg(self.0)))
    }
}

// Literal operands on either side, so clients can write `2.0 * u - 1.0`.
macro_rules! scalar_ops {
    ($($trait:ident $method:ident),*) => {$(
        impl ops::$trait<f64> for Ast {
            type Output = Ast;
            fn $method(self, rhs: f64) -> Ast {
                ops::$trait::$method(self, Ast::constant(rhs))
            }
        }
        impl ops::$trait<Ast> for f64 {
            type Output = Ast;
            fn $method(self, rhs: Ast) -> Ast {
                ops::$trait::$method(Ast::constant(self), rhs)
            }
        }
    )*};
}

scalar_ops!(Add add, Sub sub, Mul mul, Div div);

#[cfg(test)]
mod tests {
    use super::*;

    fn read(grid: &str, x: i64) -> Ast {
        Ast::grid_read(GridPoint::new(grid, IntTuple::from_pairs(&[("x", x)])))
    }

    #[test]
    fn add_builds_two_operand_node() {
        let e = read("A", -1) + read("A", 1);
        match e.expr().as_ref() {
            Expr::Commutative { op, args } => {
                assert_eq!(*op, CommOp::Add);
                assert_eq!(args.len(), 2);
            }
            other => panic!("expected commutative add, got {:?}", other),
        }
    }

    #[test]
    fn scalar_lhs_and_rhs() {
        let e = 2.0 * read("A", 0) - 1.0;
        match e.expr().as_ref() {
            Expr::Binary { op, .. } => assert_eq!(*op, BinOp::Sub),
            other => panic!("expected binary sub, got {:?}", other),
        }
    }

    #[test]
    fn structural_equality_is_deep() {
        let a = (read("A", -1) + read("A", 1)).into_expr();
        let b = (read("A", -1) + read("A", 1)).into_expr();
        assert!(!Rc::ptr_eq(&a, &b));
        assert_eq!(a, b);
    }

    #[test]
    fn canonical_order_ranks_variants() {
        let c = Ast::constant(3.0).into_expr();
        let g = read("A", 0).into_expr();
        let n = (-read("A", 0)).into_expr();
        assert_eq!(canonical_cmp(&c, &g), Ordering::Less);
        assert_eq!(canonical_cmp(&g, &n), Ordering::Less);
        assert_eq!(canonical_cmp(&n, &c), Ordering::Greater);
    }

    #[test]
    fn canonical_order_compares_offsets_lexicographically() {
        let a = read("A", -1).into_expr();
        let b = read("A", 1).into_expr();
        assert_eq!(canonical_cmp(&a, &b), Ordering::Less);
        let c = read("B", -5).into_expr();
        assert_eq!(canonical_cmp(&b, &c), Ordering::Less);
    }

    #[test]
    fn tree_size_counts_occurrences() {
        let shared = read("A", 0);
        let e = shared.clone() + shared;
        assert_eq!(e.expr().tree_size(), 3);
    }
}
