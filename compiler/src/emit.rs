// emit.rs — Emitter interface and reference printers
//
// Printers consume an immutable view of the finished generation state:
// grids, grouped equations, the vector-plan table, fold/cluster shapes,
// and the expression-size threshold. Two reference emitters are provided:
// scalar pseudo-code for one point, and ISA-neutral vector pseudo-code
// that materializes the permutation plans verbatim (aligned loads, align
// steps, folded equations). The naming helpers are shared so every
// printer agrees on vector variable and block names.
//
// Preconditions: analysis completed; `plans` covers every grid read
//                reachable from `groups`.
// Postconditions: output written to the given writer; no other state.
// Failure modes: writer errors are surfaced to the caller.
// Side effects: writes to `out`.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::io::{self, Write};

use crate::equation::EquationGroup;
use crate::expr::{ptr_id, BinOp, CommOp, Expr, ExprRef, GridPoint};
use crate::grid::{Grids, Params};
use crate::tuple::{IntTuple, TraversalOrder};
use crate::vecinfo::{AlignedBlock, Operand, TempId, VecPlanKind, VecPlanTable};

// ── Emitter contract ─────────────────────────────────────────────────────

/// Immutable snapshot of one finished generation run.
pub struct EmitView<'a> {
    pub stencil_name: &'a str,
    pub grids: &'a Grids,
    pub params: &'a Params,
    pub groups: &'a [EquationGroup],
    pub plans: &'a VecPlanTable,
    pub fold: &'a IntTuple,
    pub cluster: &'a IntTuple,
    pub dim_counts: &'a IntTuple,
    pub allow_unaligned: bool,
    pub expr_size: usize,
    pub order: TraversalOrder,
}

/// One output backend.
pub trait Emitter {
    fn name(&self) -> &'static str;
    fn emit(&self, view: &EmitView, out: &mut dyn Write) -> io::Result<()>;
}

// ── Naming helpers ───────────────────────────────────────────────────────

/// `-1` → `m1`, `2` → `2`: offset component usable in an identifier.
fn name_component(v: i64) -> String {
    if v < 0 {
        format!("m{}", -v)
    } else {
        format!("{}", v)
    }
}

/// Identifier for the vector holding one grid read, e.g. `vec_A_xm1_y0`.
pub fn point_var_name(p: &GridPoint) -> String {
    let mut s = format!("vec_{}", p.grid);
    for (dim, v) in p.offsets.entries() {
        let _ = write!(s, "_{}{}", dim, name_component(v));
    }
    s
}

/// Identifier for one deduplicated aligned block, e.g. `blk_A_xm1_y0`.
pub fn block_var_name(b: &AlignedBlock) -> String {
    let mut s = format!("blk_{}", b.grid);
    for (dim, v) in b.block.entries() {
        let _ = write!(s, "_{}{}", dim, name_component(v));
    }
    s
}

/// Identifier for an align-step intermediate.
pub fn temp_var_name(t: TempId) -> String {
    format!("tmp{}", t.0)
}

/// `x`, `x+1`, `x-1` — scalar index expression for one dimension.
fn offset_expr(dim: &str, v: i64) -> String {
    match v {
        0 => dim.to_string(),
        v if v > 0 => format!("{}+{}", dim, v),
        v => format!("{}{}", dim, v),
    }
}

/// Argument list of scalar index expressions, e.g. `x-1, y, z+2`.
fn offsets_arg_list(offsets: &IntTuple) -> String {
    offsets
        .entries()
        .map(|(dim, v)| offset_expr(dim, v))
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_const(v: f64) -> String {
    if v == v.trunc() && v.abs() < 1e15 {
        format!("{:.1}", v)
    } else {
        format!("{}", v)
    }
}

// ── Expression rendering with temp hoisting ──────────────────────────────

/// Operator precedence for parenthesization.
fn precedence(e: &Expr) -> u8 {
    match e {
        Expr::Const(_) | Expr::GridRead(_) | Expr::ParamRead(_) => 4,
        Expr::Neg(_) => 3,
        Expr::Commutative { op: CommOp::Mul, .. } => 2,
        Expr::Binary { op: BinOp::Div, .. } => 2,
        Expr::Commutative { op: CommOp::Add, .. } => 1,
        Expr::Binary { op: BinOp::Sub, .. } => 1,
    }
}

/// Renders one equation RHS, hoisting into named temporaries any subtree
/// referenced more than once (the DAG after CSE) or larger than the
/// expression-size threshold. Leaf rendering is a callback so the scalar
/// and vector printers share the walk.
struct ExprRenderer<'a> {
    expr_size: usize,
    leaf: &'a dyn Fn(&Expr) -> Option<String>,
    refs: HashMap<usize, usize>,
    temps: HashMap<usize, String>,
    next_temp: usize,
    lines: Vec<String>,
}

impl<'a> ExprRenderer<'a> {
    fn new(expr_size: usize, leaf: &'a dyn Fn(&Expr) -> Option<String>) -> Self {
        Self {
            expr_size,
            leaf,
            refs: HashMap::new(),
            temps: HashMap::new(),
            next_temp: 0,
            lines: Vec::new(),
        }
    }

    /// Render `root`; hoisted definition lines accumulate in `lines`.
    fn render(&mut self, root: &ExprRef) -> String {
        self.count_refs(root);
        let (s, _) = self.render_node(root, 0);
        s
    }

    fn count_refs(&mut self, e: &ExprRef) {
        let n = self.refs.entry(ptr_id(e)).or_insert(0);
        *n += 1;
        if *n > 1 {
            return;
        }
        match e.as_ref() {
            Expr::Const(_) | Expr::GridRead(_) | Expr::ParamRead(_) => {}
            Expr::Neg(c) => self.count_refs(c),
            Expr::Commutative { args, .. } => {
                for a in args {
                    self.count_refs(a);
                }
            }
            Expr::Binary { lhs, rhs, .. } => {
                self.count_refs(lhs);
                self.count_refs(rhs);
            }
        }
    }

    /// Returns the rendered string plus its node-count estimate (temps
    /// count as one node). `min_prec` drives parenthesization.
    fn render_node(&mut self, e: &ExprRef, min_prec: u8) -> (String, usize) {
        if let Some(name) = self.temps.get(&ptr_id(e)) {
            return (name.clone(), 1);
        }

        let (body, size) = self.render_fresh(e);
        let is_leaf = matches!(
            e.as_ref(),
            Expr::Const(_) | Expr::GridRead(_) | Expr::ParamRead(_)
        );
        let shared = self.refs.get(&ptr_id(e)).copied().unwrap_or(0) > 1;
        if !is_leaf && (shared || size > self.expr_size) {
            let name = format!("t{}", self.next_temp);
            self.next_temp += 1;
            self.lines.push(format!("{} = {};", name, body));
            self.temps.insert(ptr_id(e), name.clone());
            return (name, 1);
        }

        if precedence(e) < min_prec {
            (format!("({})", body), size)
        } else {
            (body, size)
        }
    }

    fn render_fresh(&mut self, e: &ExprRef) -> (String, usize) {
        if let Some(s) = (self.leaf)(e.as_ref()) {
            return (s, 1);
        }
        match e.as_ref() {
            Expr::Const(v) => (format_const(*v), 1),
            Expr::GridRead(p) => (format!("{}({})", p.grid, offsets_arg_list(&p.offsets)), 1),
            Expr::ParamRead(p) => (
                format!("{}({})", p.param, p.indices.make_val_str(", ")),
                1,
            ),
            Expr::Neg(c) => {
                let (s, n) = self.render_node(c, 4);
                (format!("-{}", s), n + 1)
            }
            Expr::Commutative { op, args } => {
                let prec = match op {
                    CommOp::Add => 1,
                    CommOp::Mul => 2,
                };
                let mut total = 1;
                let parts: Vec<String> = args
                    .iter()
                    .map(|a| {
                        let (s, n) = self.render_node(a, prec);
                        total += n;
                        s
                    })
                    .collect();
                (parts.join(&format!(" {} ", op.symbol())), total)
            }
            Expr::Binary { op, lhs, rhs } => {
                let prec = match op {
                    BinOp::Sub => 1,
                    BinOp::Div => 2,
                };
                let (ls, ln) = self.render_node(lhs, prec);
                // Right operand needs parens at equal precedence:
                // a - (b + c), a / (b * c).
                let (rs, rn) = self.render_node(rhs, prec + 1);
                (format!("{} {} {}", ls, op.symbol(), rs), 1 + ln + rn)
            }
        }
    }
}

// ── Scalar pseudo-code printer ───────────────────────────────────────────

/// Human-readable scalar pseudo-code for one point per equation.
pub struct PseudoPrinter;

impl Emitter for PseudoPrinter {
    fn name(&self) -> &'static str {
        "pseudo"
    }

    fn emit(&self, view: &EmitView, out: &mut dyn Write) -> io::Result<()> {
        writeln!(
            out,
            "// Scalar pseudo-code for stencil '{}' (fold {}; cluster {}).",
            view.stencil_name,
            view.fold.make_dim_val_str(", "),
            view.cluster.make_dim_val_str(", ")
        )?;
        let no_leaf = |_: &Expr| -> Option<String> { None };
        for group in view.groups {
            writeln!(out)?;
            writeln!(
                out,
                "// Equation group '{}' ({} equation(s)).",
                group.name,
                group.equations.len()
            )?;
            for eq in &group.equations {
                let mut renderer = ExprRenderer::new(view.expr_size, &no_leaf);
                let body = renderer.render(&eq.rhs);
                for line in &renderer.lines {
                    writeln!(out, "{}", line)?;
                }
                writeln!(
                    out,
                    "{}({}) = {};",
                    eq.grid,
                    offsets_arg_list(&eq.offsets),
                    body
                )?;
            }
        }
        Ok(())
    }
}

// ── Vector pseudo-code printer ───────────────────────────────────────────

/// ISA-neutral vector pseudo-code: deduplicated aligned loads, align and
/// permute steps from the plan table, then the folded equations over
/// vector operands.
pub struct VectorPrinter;

impl Emitter for VectorPrinter {
    fn name(&self) -> &'static str {
        "vector"
    }

    fn emit(&self, view: &EmitView, out: &mut dyn Write) -> io::Result<()> {
        let fold = view.fold;
        writeln!(
            out,
            "// Vector pseudo-code for stencil '{}' ({} lane(s): fold {}).",
            view.stencil_name,
            view.plans.vlen,
            fold.make_dim_val_str(", ")
        )?;

        // Aligned loads, one per deduplicated block.
        writeln!(out)?;
        writeln!(out, "// Aligned vector blocks.")?;
        for (_, block) in view.plans.blocks() {
            writeln!(
                out,
                "{} = aligned_load({}, {});  // low corner {}",
                block_var_name(block),
                block.grid,
                block.block.make_dim_val_str(", "),
                block.low_corner(fold).make_dim_val_str(", ")
            )?;
        }

        // Synthesized reads.
        let mut read_names: HashMap<GridPoint, String> = HashMap::new();
        writeln!(out)?;
        writeln!(out, "// Synthesized vector reads.")?;
        for plan in view.plans.plans() {
            let var = point_var_name(&plan.point);
            match &plan.kind {
                VecPlanKind::SingleAligned { block } => {
                    // An aligned read is the block register itself.
                    read_names.insert(plan.point.clone(), block_var_name(view.plans.block(*block)));
                }
                VecPlanKind::Unaligned => {
                    writeln!(
                        out,
                        "{} = unaligned_load({}, {});",
                        var,
                        plan.point.grid,
                        offsets_arg_list(&plan.point.offsets)
                    )?;
                    read_names.insert(plan.point.clone(), var);
                }
                VecPlanKind::Align { dim, shift, lo, hi } => {
                    writeln!(
                        out,
                        "{} = align_{}({}, {}, {});",
                        var,
                        dim,
                        block_var_name(view.plans.block(*lo)),
                        block_var_name(view.plans.block(*hi)),
                        shift
                    )?;
                    read_names.insert(plan.point.clone(), var);
                }
                VecPlanKind::Compose { steps } => {
                    let mut last = String::new();
                    for step in steps {
                        let dst = temp_var_name(step.dst);
                        writeln!(
                            out,
                            "{} = align_{}({}, {}, {});",
                            dst,
                            step.dim,
                            self.operand_name(view, step.lo),
                            self.operand_name(view, step.hi),
                            step.shift
                        )?;
                        last = dst;
                    }
                    writeln!(out, "{} = {};", var, last)?;
                    read_names.insert(plan.point.clone(), var);
                }
            }
        }

        // Folded equations over vector operands.
        let leaf = |e: &Expr| match e {
            Expr::GridRead(p) => read_names.get(p).cloned(),
            Expr::ParamRead(p) => Some(format!(
                "broadcast({}({}))",
                p.param,
                p.indices.make_val_str(", ")
            )),
            _ => None,
        };
        for group in view.groups {
            writeln!(out)?;
            writeln!(
                out,
                "// Equation group '{}' ({} equation(s)).",
                group.name,
                group.equations.len()
            )?;
            for eq in &group.equations {
                let mut renderer = ExprRenderer::new(view.expr_size, &leaf);
                let body = renderer.render(&eq.rhs);
                for line in &renderer.lines {
                    writeln!(out, "{}", line)?;
                }
                writeln!(
                    out,
                    "aligned_store({}, {}) = {};",
                    eq.grid,
                    eq.offsets.make_dim_val_str(", "),
                    body
                )?;
            }
        }
        Ok(())
    }
}

impl VectorPrinter {
    fn operand_name(&self, view: &EmitView, op: Operand) -> String {
        match op {
            Operand::Block(b) => block_var_name(view.plans.block(b)),
            Operand::Temp(t) => temp_var_name(t),
        }
    }
}
