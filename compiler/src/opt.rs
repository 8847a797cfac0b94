// opt.rs — Analytic and rewrite passes over the expression DAG
//
// Three passes in the generator's optimization stage: an operation counter
// (statistics only), common-subexpression elimination by structural value
// numbering, and commutative combining (flatten + constant-fold + sort to
// canonical order). Rewrite passes walk post-order, children before
// parents, and report how many structural changes they made so the driver
// can log idempotence.
//
// Preconditions: equations extracted from expanded grids.
// Postconditions: CSE leaves structurally-equal subtrees pointer-identical;
//                 combine leaves every commutative node flat, constant-
//                 folded, and canonically ordered with ≥ 2 operands.
// Failure modes: a node address recurring on the active walk path (E0501 —
//                impossible for graphs built through `Ast`, checked anyway).
// Side effects: none.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use indexmap::IndexMap;
use ordered_float::OrderedFloat;

use crate::diag::{codes, Diagnostic};
use crate::equation::Equation;
use crate::expr::{canonical_cmp, ptr_id, BinOp, CommOp, Expr, ExprRef, GridPoint, ParamIndex};

// ── Pass protocol ────────────────────────────────────────────────────────

/// A rewrite pass the driver can run over all extracted equations.
pub trait OptPass {
    /// Human-readable name for the driver's change report.
    fn name(&self) -> &'static str;

    /// Structural changes made by the last `run`.
    fn num_changes(&self) -> usize;

    /// Rewrite every equation RHS in place.
    fn run(&mut self, eqs: &mut [Equation]) -> Result<(), Diagnostic>;
}

// ── Operation counter ────────────────────────────────────────────────────

/// Operation statistics for a set of equations. Shared nodes are counted
/// once: after CSE the counts reflect the DAG, not the original tree.
#[derive(Debug, Clone, Default)]
pub struct OpCounts {
    grid_reads: IndexMap<String, usize>,
    pub param_reads: usize,
    pub adds: usize,
    pub muls: usize,
    pub subs: usize,
    pub divs: usize,
    pub negs: usize,
}

impl OpCounts {
    pub fn reads_for(&self, grid: &str) -> usize {
        self.grid_reads.get(grid).copied().unwrap_or(0)
    }

    pub fn total_grid_reads(&self) -> usize {
        self.grid_reads.values().sum()
    }

    pub fn total_fp_ops(&self) -> usize {
        self.adds + self.muls + self.subs + self.divs + self.negs
    }

    /// One-line report in the driver's stderr format.
    pub fn summary(&self) -> String {
        format!(
            "{} grid read(s), {} param read(s), {} add(s), {} mul(s), {} sub(s), {} div(s), {} neg(s); {} FP op(s)",
            self.total_grid_reads(),
            self.param_reads,
            self.adds,
            self.muls,
            self.subs,
            self.divs,
            self.negs,
            self.total_fp_ops()
        )
    }
}

/// Count over one representative equation per grid ("for one vector").
pub fn count_to_first(eqs: &[Equation]) -> OpCounts {
    let mut seen_grids = HashSet::new();
    let reps: Vec<&Equation> = eqs
        .iter()
        .filter(|eq| seen_grids.insert(eq.grid.clone()))
        .collect();
    count(reps.into_iter())
}

/// Count over every installed equation ("for one cluster").
pub fn count_to_all(eqs: &[Equation]) -> OpCounts {
    count(eqs.iter())
}

fn count<'a>(eqs: impl Iterator<Item = &'a Equation>) -> OpCounts {
    let mut counts = OpCounts::default();
    let mut visited = HashSet::new();
    for eq in eqs {
        count_node(&eq.rhs, &mut counts, &mut visited);
    }
    counts
}

fn count_node(e: &ExprRef, counts: &mut OpCounts, visited: &mut HashSet<usize>) {
    if !visited.insert(ptr_id(e)) {
        return;
    }
    match e.as_ref() {
        Expr::Const(_) => {}
        Expr::GridRead(p) => {
            *counts.grid_reads.entry(p.grid.clone()).or_insert(0) += 1;
        }
        Expr::ParamRead(_) => counts.param_reads += 1,
        Expr::Neg(c) => {
            counts.negs += 1;
            count_node(c, counts, visited);
        }
        Expr::Commutative { op, args } => {
            // An n-ary node applies its operator n-1 times.
            let ops = args.len().saturating_sub(1);
            match op {
                CommOp::Add => counts.adds += ops,
                CommOp::Mul => counts.muls += ops,
            }
            for a in args {
                count_node(a, counts, visited);
            }
        }
        Expr::Binary { op, lhs, rhs } => {
            match op {
                BinOp::Sub => counts.subs += 1,
                BinOp::Div => counts.divs += 1,
            }
            count_node(lhs, counts, visited);
            count_node(rhs, counts, visited);
        }
    }
}

/// Distinct nodes reachable from the given equations.
pub fn distinct_nodes(eqs: &[Equation]) -> usize {
    let mut visited = HashSet::new();
    for eq in eqs {
        collect_nodes(&eq.rhs, &mut visited);
    }
    visited.len()
}

fn collect_nodes(e: &ExprRef, visited: &mut HashSet<usize>) {
    if !visited.insert(ptr_id(e)) {
        return;
    }
    match e.as_ref() {
        Expr::Const(_) | Expr::GridRead(_) | Expr::ParamRead(_) => {}
        Expr::Neg(c) => collect_nodes(c, visited),
        Expr::Commutative { args, .. } => {
            for a in args {
                collect_nodes(a, visited);
            }
        }
        Expr::Binary { lhs, rhs, .. } => {
            collect_nodes(lhs, visited);
            collect_nodes(rhs, visited);
        }
    }
}

// ── Common-subexpression elimination ─────────────────────────────────────

/// Structural value-numbering key. Children are identified by the pointer
/// of their already-interned node, so equality is one level deep — the
/// post-order walk guarantees children were canonicalized first.
#[derive(Debug, PartialEq, Eq, Hash)]
enum ValueKey {
    Const(OrderedFloat<f64>),
    Grid(GridPoint),
    Param(ParamIndex),
    Neg(usize),
    Comm(CommOp, Vec<usize>),
    Bin(BinOp, usize, usize),
}

#[derive(Debug, Default)]
pub struct CsePass {
    num_changes: usize,
}

impl CsePass {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OptPass for CsePass {
    fn name(&self) -> &'static str {
        "CSE"
    }

    fn num_changes(&self) -> usize {
        self.num_changes
    }

    fn run(&mut self, eqs: &mut [Equation]) -> Result<(), Diagnostic> {
        self.num_changes = 0;
        let mut ctx = CseCtx::default();
        for eq in eqs.iter_mut() {
            eq.rhs = ctx.intern(&eq.rhs)?;
        }
        self.num_changes = ctx.num_changes;
        Ok(())
    }
}

/// One value-numbering table shared across every equation, so subtrees
/// repeated between cluster points or grids collapse to one node.
#[derive(Default)]
struct CseCtx {
    table: HashMap<ValueKey, ExprRef>,
    memo: HashMap<usize, ExprRef>,
    on_path: HashSet<usize>,
    num_changes: usize,
}

impl CseCtx {
    fn intern(&mut self, e: &ExprRef) -> Result<ExprRef, Diagnostic> {
        if let Some(done) = self.memo.get(&ptr_id(e)) {
            return Ok(done.clone());
        }
        if !self.on_path.insert(ptr_id(e)) {
            return Err(Diagnostic::error(
                "expression graph contains a cycle; stencil definition is malformed",
            )
            .with_code(codes::EXPR_CYCLE));
        }

        let rebuilt = match e.as_ref() {
            Expr::Const(_) | Expr::GridRead(_) | Expr::ParamRead(_) => e.clone(),
            Expr::Neg(c) => {
                let ci = self.intern(c)?;
                if Rc::ptr_eq(&ci, c) {
                    e.clone()
                } else {
                    Rc::new(Expr::Neg(ci))
                }
            }
            Expr::Commutative { op, args } => {
                let mut interned = Vec::with_capacity(args.len());
                let mut changed = false;
                for a in args {
                    let ai = self.intern(a)?;
                    changed |= !Rc::ptr_eq(&ai, a);
                    interned.push(ai);
                }
                if changed {
                    Rc::new(Expr::Commutative {
                        op: *op,
                        args: interned,
                    })
                } else {
                    e.clone()
                }
            }
            Expr::Binary { op, lhs, rhs } => {
                let li = self.intern(lhs)?;
                let ri = self.intern(rhs)?;
                if Rc::ptr_eq(&li, lhs) && Rc::ptr_eq(&ri, rhs) {
                    e.clone()
                } else {
                    Rc::new(Expr::Binary {
                        op: *op,
                        lhs: li,
                        rhs: ri,
                    })
                }
            }
        };
        self.on_path.remove(&ptr_id(e));

        let key = Self::key_of(&rebuilt);
        let result = match self.table.get(&key) {
            Some(canonical) => {
                if !Rc::ptr_eq(canonical, &rebuilt) {
                    self.num_changes += 1;
                }
                canonical.clone()
            }
            None => {
                self.table.insert(key, rebuilt.clone());
                rebuilt
            }
        };
        self.memo.insert(ptr_id(e), result.clone());
        Ok(result)
    }

    fn key_of(e: &ExprRef) -> ValueKey {
        match e.as_ref() {
            Expr::Const(v) => ValueKey::Const(OrderedFloat(*v)),
            Expr::GridRead(p) => ValueKey::Grid(p.clone()),
            Expr::ParamRead(p) => ValueKey::Param(p.clone()),
            Expr::Neg(c) => ValueKey::Neg(ptr_id(c)),
            Expr::Commutative { op, args } => {
                ValueKey::Comm(*op, args.iter().map(ptr_id).collect())
            }
            Expr::Binary { op, lhs, rhs } => ValueKey::Bin(*op, ptr_id(lhs), ptr_id(rhs)),
        }
    }
}

// ── Commutative combining ────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct CombinePass {
    num_changes: usize,
}

impl CombinePass {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OptPass for CombinePass {
    fn name(&self) -> &'static str {
        "Combine"
    }

    fn num_changes(&self) -> usize {
        self.num_changes
    }

    fn run(&mut self, eqs: &mut [Equation]) -> Result<(), Diagnostic> {
        self.num_changes = 0;
        let mut ctx = CombineCtx::default();
        for eq in eqs.iter_mut() {
            eq.rhs = ctx.rewrite(&eq.rhs)?;
        }
        self.num_changes = ctx.num_changes;
        Ok(())
    }
}

#[derive(Default)]
struct CombineCtx {
    memo: HashMap<usize, ExprRef>,
    on_path: HashSet<usize>,
    num_changes: usize,
}

impl CombineCtx {
    fn rewrite(&mut self, e: &ExprRef) -> Result<ExprRef, Diagnostic> {
        if let Some(done) = self.memo.get(&ptr_id(e)) {
            return Ok(done.clone());
        }
        if !self.on_path.insert(ptr_id(e)) {
            return Err(Diagnostic::error(
                "expression graph contains a cycle; stencil definition is malformed",
            )
            .with_code(codes::EXPR_CYCLE));
        }

        let result = match e.as_ref() {
            Expr::Const(_) | Expr::GridRead(_) | Expr::ParamRead(_) => e.clone(),
            Expr::Neg(c) => {
                let cr = self.rewrite(c)?;
                if Rc::ptr_eq(&cr, c) {
                    e.clone()
                } else {
                    Rc::new(Expr::Neg(cr))
                }
            }
            // Subtraction is deliberately not rewritten into `a + (-b)`,
            // and division operands are never reordered.
            Expr::Binary { op, lhs, rhs } => {
                let lr = self.rewrite(lhs)?;
                let rr = self.rewrite(rhs)?;
                if Rc::ptr_eq(&lr, lhs) && Rc::ptr_eq(&rr, rhs) {
                    e.clone()
                } else {
                    Rc::new(Expr::Binary {
                        op: *op,
                        lhs: lr,
                        rhs: rr,
                    })
                }
            }
            Expr::Commutative { op, args } => self.combine(e, *op, args)?,
        };
        self.on_path.remove(&ptr_id(e));
        self.memo.insert(ptr_id(e), result.clone());
        Ok(result)
    }

    fn combine(&mut self, e: &ExprRef, op: CommOp, args: &[ExprRef]) -> Result<ExprRef, Diagnostic> {
        // Rewrite children, then flatten: splice in the operands of any
        // child carrying the same operator tag.
        let mut base: Vec<ExprRef> = Vec::with_capacity(args.len());
        let mut child_changed = false;
        for a in args {
            let ar = self.rewrite(a)?;
            child_changed |= !Rc::ptr_eq(&ar, a);
            base.push(ar);
        }
        let mut flat: Vec<ExprRef> = Vec::with_capacity(base.len());
        for b in &base {
            match b.as_ref() {
                Expr::Commutative { op: child_op, args: child_args } if *child_op == op => {
                    flat.extend(child_args.iter().cloned());
                    self.num_changes += 1;
                }
                _ => flat.push(b.clone()),
            }
        }

        // Fold constants into a single literal; 0 annihilates a product.
        let mut acc = op.identity();
        let mut num_consts = 0usize;
        let mut first_const: Option<ExprRef> = None;
        let mut operands: Vec<ExprRef> = Vec::with_capacity(flat.len());
        for f in flat {
            match f.as_ref() {
                Expr::Const(v) => {
                    num_consts += 1;
                    if first_const.is_none() {
                        first_const = Some(f.clone());
                    }
                    match op {
                        CommOp::Add => acc += v,
                        CommOp::Mul => acc *= v,
                    }
                }
                _ => operands.push(f),
            }
        }
        if op == CommOp::Mul && acc == 0.0 && num_consts > 0 {
            self.num_changes += 1;
            return Ok(Rc::new(Expr::Const(0.0)));
        }
        if num_consts > 0 {
            if operands.is_empty() {
                // All operands were literals.
                self.num_changes += num_consts - 1;
                return Ok(Rc::new(Expr::Const(acc)));
            }
            if acc == op.identity() {
                // Identity element is dropped.
                self.num_changes += num_consts;
            } else {
                self.num_changes += num_consts - 1;
                // A lone literal is kept by pointer so a canonical node
                // passes through unchanged on the next run.
                let cnode = match (num_consts, first_const) {
                    (1, Some(c)) => c,
                    _ => Rc::new(Expr::Const(acc)),
                };
                operands.push(cnode);
            }
        }

        if operands.len() == 1 {
            self.num_changes += 1;
            return Ok(operands.remove(0));
        }

        // Canonical operand order.
        operands.sort_by(|a, b| canonical_cmp(a, b));

        // Idempotence: compare the final list against the node's original
        // (rewritten) operand sequence; an equal sequence means the node
        // was already flat, folded, and sorted.
        let same_sequence = operands.len() == base.len()
            && operands
                .iter()
                .zip(base.iter())
                .all(|(a, b)| Rc::ptr_eq(a, b));
        if same_sequence {
            if child_changed {
                return Ok(Rc::new(Expr::Commutative { op, args: operands }));
            }
            return Ok(e.clone());
        }
        if operands.len() == base.len() {
            // Same operands, new order.
            self.num_changes += 1;
        }
        Ok(Rc::new(Expr::Commutative { op, args: operands }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{Ast, GridPoint};
    use crate::tuple::IntTuple;

    fn read(grid: &str, x: i64) -> Ast {
        Ast::grid_read(GridPoint::new(grid, IntTuple::from_pairs(&[("x", x)])))
    }

    fn eq_of(ast: Ast) -> Equation {
        Equation {
            grid: "out".to_string(),
            offsets: IntTuple::from_pairs(&[("x", 0)]),
            rhs: ast.into_expr(),
        }
    }

    fn run_pass(pass: &mut dyn OptPass, eqs: &mut Vec<Equation>) -> usize {
        pass.run(eqs).unwrap();
        pass.num_changes()
    }

    #[test]
    fn cse_merges_structurally_equal_subtrees() {
        // (A(x-1) + A(x+1)) * (A(x-1) + A(x+1)) built as separate trees.
        let lhs = read("A", -1) + read("A", 1);
        let rhs = read("A", -1) + read("A", 1);
        let mut eqs = vec![eq_of(lhs * rhs)];
        let before = distinct_nodes(&eqs);

        let mut cse = CsePass::new();
        let changes = run_pass(&mut cse, &mut eqs);
        assert!(changes > 0);
        assert!(distinct_nodes(&eqs) < before);

        match eqs[0].rhs.as_ref() {
            Expr::Commutative { op: CommOp::Mul, args } => {
                assert!(Rc::ptr_eq(&args[0], &args[1]));
            }
            other => panic!("expected mul, got {:?}", other),
        }
    }

    #[test]
    fn cse_is_idempotent() {
        let e = (read("A", -1) + read("A", 1)) * (read("A", -1) + read("A", 1));
        let mut eqs = vec![eq_of(e)];
        run_pass(&mut CsePass::new(), &mut eqs);
        let second = run_pass(&mut CsePass::new(), &mut eqs);
        assert_eq!(second, 0);
    }

    #[test]
    fn cse_shares_across_equations() {
        let mut eqs = vec![
            eq_of(read("A", 1) + read("A", 2)),
            eq_of(read("A", 1) + read("A", 2)),
        ];
        run_pass(&mut CsePass::new(), &mut eqs);
        assert!(Rc::ptr_eq(&eqs[0].rhs, &eqs[1].rhs));
    }

    #[test]
    fn cse_never_increases_node_count() {
        let e = read("A", 0) * 3.0 + read("B", 1) * 3.0;
        let mut eqs = vec![eq_of(e)];
        let before = distinct_nodes(&eqs);
        run_pass(&mut CsePass::new(), &mut eqs);
        assert!(distinct_nodes(&eqs) <= before);
    }

    #[test]
    fn combine_flattens_nested_adds() {
        // ((a + b) + c) + d
        let e = read("A", 0) + read("A", 1) + read("A", 2) + read("A", 3);
        let mut eqs = vec![eq_of(e)];
        run_pass(&mut CombinePass::new(), &mut eqs);
        match eqs[0].rhs.as_ref() {
            Expr::Commutative { op: CommOp::Add, args } => assert_eq!(args.len(), 4),
            other => panic!("expected flat add, got {:?}", other),
        }
    }

    #[test]
    fn combine_sorts_operands_canonically() {
        let e = read("B", 0) + Ast::constant(2.0) + read("A", 0);
        let mut eqs = vec![eq_of(e)];
        run_pass(&mut CombinePass::new(), &mut eqs);
        match eqs[0].rhs.as_ref() {
            Expr::Commutative { args, .. } => {
                assert!(matches!(args[0].as_ref(), Expr::Const(v) if *v == 2.0));
                assert!(matches!(args[1].as_ref(), Expr::GridRead(p) if p.grid == "A"));
                assert!(matches!(args[2].as_ref(), Expr::GridRead(p) if p.grid == "B"));
            }
            other => panic!("expected flat add, got {:?}", other),
        }
    }

    #[test]
    fn combine_folds_constants_and_drops_identity() {
        // 2.0 * a * 3.0 → a * 6.0 (one const), then a + 0.0 → a.
        let e = 2.0 * read("A", 0) * 3.0;
        let mut eqs = vec![eq_of(e)];
        run_pass(&mut CombinePass::new(), &mut eqs);
        match eqs[0].rhs.as_ref() {
            Expr::Commutative { op: CommOp::Mul, args } => {
                assert_eq!(args.len(), 2);
                assert!(args.iter().any(|a| matches!(a.as_ref(), Expr::Const(v) if *v == 6.0)));
            }
            other => panic!("expected mul, got {:?}", other),
        }

        let mut eqs = vec![eq_of(read("A", 0) + 0.0)];
        run_pass(&mut CombinePass::new(), &mut eqs);
        assert!(matches!(eqs[0].rhs.as_ref(), Expr::GridRead(_)));
    }

    #[test]
    fn combine_zero_annihilates_product() {
        let e = read("A", 0) * 0.0 * read("B", 0);
        let mut eqs = vec![eq_of(e)];
        run_pass(&mut CombinePass::new(), &mut eqs);
        assert!(matches!(eqs[0].rhs.as_ref(), Expr::Const(v) if *v == 0.0));
    }

    #[test]
    fn combine_preserves_subtraction() {
        let e = read("A", 1) - read("A", -1);
        let mut eqs = vec![eq_of(e)];
        run_pass(&mut CombinePass::new(), &mut eqs);
        assert!(matches!(
            eqs[0].rhs.as_ref(),
            Expr::Binary { op: BinOp::Sub, .. }
        ));
    }

    #[test]
    fn combine_is_idempotent() {
        let e = (read("B", 0) + read("A", 0) + 1.0) * 2.0 * read("C", 1)
            - read("A", 2) / read("A", 3);
        let mut eqs = vec![eq_of(e)];
        run_pass(&mut CombinePass::new(), &mut eqs);
        let second = run_pass(&mut CombinePass::new(), &mut eqs);
        assert_eq!(second, 0);
    }

    #[test]
    fn counter_counts_shared_nodes_once() {
        let shared = (read("A", -1) + read("A", 1)).into_expr();
        let e = Ast(shared.clone()) * Ast(shared);
        let mut eqs = vec![eq_of(e)];
        let counts = count_to_all(&eqs);
        assert_eq!(counts.reads_for("A"), 2);
        assert_eq!(counts.adds, 1);
        assert_eq!(counts.muls, 1);

        // CSE on an already-shared DAG changes nothing.
        assert_eq!(run_pass(&mut CsePass::new(), &mut eqs), 0);
    }

    #[test]
    fn counter_to_first_uses_one_equation_per_grid() {
        let mut eqs = vec![eq_of(read("A", 0)), eq_of(read("A", 1) + read("A", 2))];
        eqs[1].grid = "out".to_string();
        eqs[1].offsets = IntTuple::from_pairs(&[("x", 4)]);
        let first = count_to_first(&eqs);
        let all = count_to_all(&eqs);
        assert_eq!(first.total_grid_reads(), 1);
        assert_eq!(all.total_grid_reads(), 3);
    }

    #[test]
    fn nary_node_counts_n_minus_one_ops() {
        let e = read("A", 0) + read("A", 1) + read("A", 2);
        let mut eqs = vec![eq_of(e)];
        run_pass(&mut CombinePass::new(), &mut eqs);
        let counts = count_to_all(&eqs);
        assert_eq!(counts.adds, 2);
    }
}
