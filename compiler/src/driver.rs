// driver.rs — Generation pipeline
//
// Runs one full generation: stencil lookup, fold/cluster validation
// against the union of grid dimensions, cluster expansion, equation
// grouping, optimization passes with change reporting, vector-fold
// analysis, and emission. Informational output (shapes, stats, per-pass
// reports, phase timing under `verbose`) goes to stderr; generated code
// goes to the supplied writer.
//
// Preconditions: options assembled by the CLI (or a test).
// Postconditions: on success all selected emitters have written to `out`.
// Failure modes: every error kind in `diag::codes`; the run stops at the
//                first error and produces no partial output for the
//                failing emitter phase.
// Side effects: writes to `out` and stderr.

use std::io::Write;
use std::time::Instant;

use crate::cluster;
use crate::diag::{codes, Diagnostic};
use crate::emit::{EmitView, Emitter, PseudoPrinter, VectorPrinter};
use crate::equation::{find_equations, Equation, EquationGroup};
use crate::opt::{count_to_all, count_to_first, CombinePass, CsePass, OptPass};
use crate::stencil::{self, Stencil};
use crate::tuple::{IntTuple, TraversalOrder};
use crate::vecinfo;

// ── Options ──────────────────────────────────────────────────────────────

/// Which emitters run, in request order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitTarget {
    Pseudo,
    Vector,
}

/// One generation run's configuration.
#[derive(Debug, Clone)]
pub struct GenOptions {
    pub stencil: String,
    pub order: i64,
    pub fold: Vec<(String, i64)>,
    pub cluster: Vec<(String, i64)>,
    pub eq_targets: String,
    pub expr_size: usize,
    /// First-added fold dimension is unit stride (the default layout).
    pub first_inner: bool,
    pub allow_unaligned: bool,
    pub do_cse: bool,
    pub do_comb: bool,
    pub emit: Vec<EmitTarget>,
    pub verbose: bool,
}

impl Default for GenOptions {
    fn default() -> Self {
        Self {
            stencil: String::new(),
            order: 2,
            fold: Vec::new(),
            cluster: Vec::new(),
            eq_targets: String::new(),
            expr_size: 50,
            first_inner: true,
            allow_unaligned: false,
            do_cse: true,
            do_comb: false,
            emit: Vec::new(),
            verbose: false,
        }
    }
}

/// Parse a `dim=len,dim=len` option value.
pub fn parse_dim_list(spec: &str) -> Result<Vec<(String, i64)>, Diagnostic> {
    let mut dims: Vec<(String, i64)> = Vec::new();
    for part in spec.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (name, len) = match part.split_once('=') {
            Some((name, len)) if !name.is_empty() => (name.trim(), len.trim()),
            _ => {
                return Err(Diagnostic::error(format!(
                    "bad dimension spec '{}'; expected dim=len",
                    part
                ))
                .with_code(codes::BAD_DIM_SPEC));
            }
        };
        let len: i64 = len.parse().map_err(|_| {
            Diagnostic::error(format!("bad length in dimension spec '{}'", part))
                .with_code(codes::BAD_DIM_SPEC)
        })?;
        if len < 1 {
            return Err(Diagnostic::error(format!(
                "dimension '{}' must have length >= 1, got {}",
                name, len
            ))
            .with_code(codes::BAD_DIM_SPEC));
        }
        if dims.iter().any(|(n, _)| n == name) {
            return Err(Diagnostic::error(format!(
                "dimension '{}' given twice",
                name
            ))
            .with_code(codes::DUPLICATE_DIM));
        }
        dims.push((name.to_string(), len));
    }
    Ok(dims)
}

// ── Pipeline ─────────────────────────────────────────────────────────────

/// Look the stencil up in the registry and run one full generation,
/// writing generated code to `out`.
pub fn run(opts: &GenOptions, out: &mut dyn Write) -> Result<(), Diagnostic> {
    let mut stencil = stencil::create(&opts.stencil).ok_or_else(|| {
        Diagnostic::error(format!("unknown stencil '{}'", opts.stencil))
            .with_code(codes::UNKNOWN_STENCIL)
            .with_hint(format!("known stencils: {}", stencil::names().join(", ")))
    })?;
    run_stencil(stencil.as_mut(), opts, out)
}

/// Run the generation pipeline for an already-constructed stencil client.
pub fn run_stencil(
    stencil: &mut dyn Stencil,
    opts: &GenOptions,
    out: &mut dyn Write,
) -> Result<(), Diagnostic> {
    let order = if opts.first_inner {
        TraversalOrder::FirstInner
    } else {
        TraversalOrder::LastInner
    };

    eprintln!("sfc: stencil '{}'", stencil.name());
    if stencil.uses_order() {
        if !stencil.set_order(opts.order) {
            return Err(Diagnostic::error(format!(
                "invalid order {} for stencil '{}'",
                opts.order,
                stencil.name()
            ))
            .with_code(codes::INVALID_ORDER));
        }
        eprintln!("sfc: stencil order {}", opts.order);
    }

    // ── Fold and cluster shapes over the common dimensions ──
    let dim_counts = stencil.grids().dim_counts();
    let num_grids = stencil.grids().len() as i64;
    let mut fold_lengths = IntTuple::new();
    let mut cluster_lengths = IntTuple::new();
    for (dim, count) in dim_counts.entries() {
        if count == num_grids {
            fold_lengths.add_dim(dim, 1);
            cluster_lengths.add_dim(dim, 1);
        }
    }
    for (dim, len) in &opts.fold {
        if !fold_lengths.has_dim(dim) {
            return Err(Diagnostic::error(format!(
                "fold length {} in dimension '{}' not allowed because '{}' does not exist in all grids",
                len, dim, dim
            ))
            .with_code(codes::FOLD_DIM_MISMATCH));
        }
        fold_lengths.set_val(dim, *len);
    }
    for (dim, len) in &opts.cluster {
        if !cluster_lengths.has_dim(dim) {
            return Err(Diagnostic::error(format!(
                "cluster length {} in dimension '{}' not allowed because '{}' does not exist in all grids",
                len, dim, dim
            ))
            .with_code(codes::CLUSTER_DIM_MISMATCH));
        }
        cluster_lengths.set_val(dim, *len);
    }
    eprintln!(
        "sfc: vector-fold dimensions {}",
        fold_lengths.make_dim_val_str(" * ")
    );
    eprintln!(
        "sfc: cluster dimensions {}",
        cluster_lengths.make_dim_val_str(" * ")
    );

    // ── Unaligned-load policy checks ──
    let fold_gt1: Vec<&str> = fold_lengths
        .entries()
        .filter(|(_, len)| *len > 1)
        .map(|(d, _)| d)
        .collect();
    if opts.allow_unaligned {
        if fold_gt1.len() > 1 {
            return Err(Diagnostic::error(format!(
                "cannot allow unaligned loads with {} fold dimensions of length > 1",
                fold_gt1.len()
            ))
            .with_code(codes::UNALIGNED_CONFLICT));
        }
        if let Some(dim) = fold_gt1.first() {
            eprintln!(
                "sfc: notice: memory map MUST be unit-stride in '{}' dimension",
                dim
            );
        }
    }

    // ── Cluster expansion ──
    let t = Instant::now();
    cluster::expand(stencil, &fold_lengths, &cluster_lengths, &dim_counts, order)?;
    finish_phase("expand", t, opts.verbose);

    // ── Equation extraction and grouping ──
    let mut groups = find_equations(stencil.grids(), &opts.eq_targets)?;
    for group in &groups {
        eprintln!(
            "sfc: equation group '{}' with {} equation(s)",
            group.name,
            group.equations.len()
        );
    }

    // ── Stats before optimization ──
    let mut all = flatten(&groups);
    eprintln!("sfc: for one vector: {}", count_to_first(&all).summary());
    if cluster_lengths.product() > 1 {
        eprintln!("sfc: for one cluster: {}", count_to_all(&all).summary());
    }

    // ── Optimization passes ──
    let mut passes: Vec<Box<dyn OptPass>> = Vec::new();
    if opts.do_cse {
        passes.push(Box::new(CsePass::new()));
    }
    if opts.do_comb {
        passes.push(Box::new(CombinePass::new()));
        if opts.do_cse {
            passes.push(Box::new(CsePass::new()));
        }
    }
    for pass in &mut passes {
        let t = Instant::now();
        pass.run(&mut all)?;
        finish_phase(pass.name(), t, opts.verbose);
        if pass.num_changes() > 0 {
            eprintln!(
                "sfc: after applying {} ({} change(s)): {}",
                pass.name(),
                pass.num_changes(),
                count_to_all(&all).summary()
            );
        } else {
            eprintln!("sfc: no changes after applying {}.", pass.name());
        }
    }
    unflatten(&mut groups, all);

    // ── Vector-fold analysis ──
    let t = Instant::now();
    let all = flatten(&groups);
    let plans = vecinfo::analyze(&all, &fold_lengths, order, opts.allow_unaligned)?;
    finish_phase("vecinfo", t, opts.verbose);
    eprintln!("sfc: {}", plans.summary());

    // ── Emission ──
    let view = EmitView {
        stencil_name: stencil.name(),
        grids: stencil.grids(),
        params: stencil.params(),
        groups: &groups,
        plans: &plans,
        fold: &fold_lengths,
        cluster: &cluster_lengths,
        dim_counts: &dim_counts,
        allow_unaligned: opts.allow_unaligned,
        expr_size: opts.expr_size,
        order,
    };
    for target in &opts.emit {
        let emitter: Box<dyn Emitter> = match target {
            EmitTarget::Pseudo => Box::new(PseudoPrinter),
            EmitTarget::Vector => Box::new(VectorPrinter),
        };
        let t = Instant::now();
        emitter.emit(&view, out).map_err(|e| {
            Diagnostic::error(format!("emitter '{}' failed: {}", emitter.name(), e))
                .with_code(codes::EMIT_IO)
        })?;
        finish_phase(emitter.name(), t, opts.verbose);
    }

    Ok(())
}

fn finish_phase(name: &str, started: Instant, verbose: bool) {
    if verbose {
        eprintln!(
            "sfc: {} complete, {:.1}ms",
            name,
            started.elapsed().as_secs_f64() * 1000.0
        );
    }
}

/// Concatenate group equations for the passes; order is group order.
fn flatten(groups: &[EquationGroup]) -> Vec<Equation> {
    groups
        .iter()
        .flat_map(|g| g.equations.iter().cloned())
        .collect()
}

/// Write rewritten equations back to their groups.
fn unflatten(groups: &mut [EquationGroup], all: Vec<Equation>) {
    let mut it = all.into_iter();
    for group in groups.iter_mut() {
        let n = group.equations.len();
        group.equations = it.by_ref().take(n).collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_to_string(opts: &GenOptions) -> Result<String, Diagnostic> {
        let mut out = Vec::new();
        run(opts, &mut out)?;
        Ok(String::from_utf8(out).unwrap_or_default())
    }

    #[test]
    fn parse_dim_list_accepts_pairs() {
        let dims = parse_dim_list("x=4,y=2").unwrap();
        assert_eq!(dims, vec![("x".to_string(), 4), ("y".to_string(), 2)]);
        assert!(parse_dim_list("").unwrap().is_empty());
    }

    #[test]
    fn parse_dim_list_rejects_garbage() {
        assert_eq!(
            parse_dim_list("x").unwrap_err().code,
            Some(codes::BAD_DIM_SPEC)
        );
        assert_eq!(
            parse_dim_list("x=abc").unwrap_err().code,
            Some(codes::BAD_DIM_SPEC)
        );
        assert_eq!(
            parse_dim_list("x=0").unwrap_err().code,
            Some(codes::BAD_DIM_SPEC)
        );
        assert_eq!(
            parse_dim_list("x=2,x=4").unwrap_err().code,
            Some(codes::DUPLICATE_DIM)
        );
    }

    #[test]
    fn unknown_stencil_is_rejected() {
        let opts = GenOptions {
            stencil: "nosuch".to_string(),
            ..Default::default()
        };
        let err = run_to_string(&opts).unwrap_err();
        assert_eq!(err.code, Some(codes::UNKNOWN_STENCIL));
    }

    #[test]
    fn invalid_order_is_rejected() {
        let opts = GenOptions {
            stencil: "iso3dfd".to_string(),
            order: 7,
            ..Default::default()
        };
        let err = run_to_string(&opts).unwrap_err();
        assert_eq!(err.code, Some(codes::INVALID_ORDER));
    }

    #[test]
    fn end_to_end_pseudo_output() {
        let opts = GenOptions {
            stencil: "iso3dfd".to_string(),
            order: 8,
            fold: vec![("x".to_string(), 4)],
            do_comb: true,
            emit: vec![EmitTarget::Pseudo, EmitTarget::Vector],
            ..Default::default()
        };
        let text = run_to_string(&opts).unwrap();
        assert!(text.contains("pressure_next(x, y, z)"), "got:\n{}", text);
        assert!(text.contains("aligned_load(pressure"), "got:\n{}", text);
    }
}
