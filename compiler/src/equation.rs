// equation.rs — Equation extraction and grouping
//
// After cluster expansion every grid holds one installed entry per cluster
// point. This module extracts those entries as rooted assignments and
// partitions them into named equation groups by substring match on the
// target grid name (`"name=substr,..."`), remaining equations in the
// default group. Each equation belongs to exactly one group; installation
// order is preserved within a group.
//
// Preconditions: expansion has completed without an equation conflict.
// Postconditions: every installed entry appears in exactly one group.
// Failure modes: malformed `name=substr` pair (E0402).
// Side effects: none.

use crate::diag::{codes, Diagnostic};
use crate::expr::{ExprRef, GridPoint};
use crate::grid::Grids;
use crate::tuple::IntTuple;

pub const DEFAULT_GROUP: &str = "default";

// ── Types ────────────────────────────────────────────────────────────────

/// One rooted assignment: `grid(offsets) = rhs`.
#[derive(Debug, Clone)]
pub struct Equation {
    pub grid: String,
    pub offsets: IntTuple,
    pub rhs: ExprRef,
}

impl Equation {
    /// The assignment target as a grid point.
    pub fn lhs(&self) -> GridPoint {
        GridPoint::new(&self.grid, self.offsets.clone())
    }
}

/// A named partition of equations selected by target-grid name substring.
#[derive(Debug, Clone)]
pub struct EquationGroup {
    pub name: String,
    pub equations: Vec<Equation>,
}

// ── Grouping ─────────────────────────────────────────────────────────────

/// Parse `targets` (`"groupA=subA,groupB=subB"`; empty for no named
/// groups) and partition every installed assignment. An equation goes to
/// the first named group whose substring appears in its target grid name,
/// otherwise to the default group. Empty groups are dropped.
pub fn find_equations(grids: &Grids, targets: &str) -> Result<Vec<EquationGroup>, Diagnostic> {
    let specs = parse_targets(targets)?;

    let mut groups: Vec<EquationGroup> = specs
        .iter()
        .map(|(name, _)| EquationGroup {
            name: name.clone(),
            equations: Vec::new(),
        })
        .collect();
    let mut default = EquationGroup {
        name: DEFAULT_GROUP.to_string(),
        equations: Vec::new(),
    };

    for grid in grids.iter() {
        let slot = specs
            .iter()
            .position(|(_, substr)| grid.name().contains(substr.as_str()));
        for (offsets, rhs) in grid.entries() {
            let eq = Equation {
                grid: grid.name().to_string(),
                offsets: offsets.clone(),
                rhs: rhs.clone(),
            };
            match slot {
                Some(i) => groups[i].equations.push(eq),
                None => default.equations.push(eq),
            }
        }
    }

    groups.push(default);
    groups.retain(|g| !g.equations.is_empty());
    Ok(groups)
}

fn parse_targets(targets: &str) -> Result<Vec<(String, String)>, Diagnostic> {
    let mut specs = Vec::new();
    for pair in targets.split(',') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        match pair.split_once('=') {
            Some((name, substr)) if !name.is_empty() && !substr.is_empty() => {
                specs.push((name.trim().to_string(), substr.trim().to_string()));
            }
            _ => {
                return Err(Diagnostic::error(format!(
                    "bad equation-target pair '{}'; expected name=substring",
                    pair
                ))
                .with_code(codes::BAD_EQUATION_TARGET));
            }
        }
    }
    Ok(specs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Ast;
    use crate::tuple::IntTuple;

    fn sample_grids() -> Grids {
        let mut grids = Grids::new();
        let vx = grids.add("vel_x", &["x"]);
        let vy = grids.add("vel_y", &["x"]);
        let sxx = grids.add("stress_xx", &["x"]);
        let o = IntTuple::from_pairs(&[("x", 0)]);
        grids.set(vx, &o, Ast::constant(1.0)).unwrap();
        grids.set(vy, &o, Ast::constant(2.0)).unwrap();
        grids.set(sxx, &o, Ast::constant(3.0)).unwrap();
        grids
    }

    #[test]
    fn substring_groups_in_registration_order() {
        let grids = sample_grids();
        let groups = find_equations(&grids, "v=vel,s=stress").unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].name, "v");
        let names: Vec<_> = groups[0].equations.iter().map(|e| e.grid.as_str()).collect();
        assert_eq!(names, vec!["vel_x", "vel_y"]);
        assert_eq!(groups[1].name, "s");
        assert_eq!(groups[1].equations[0].grid, "stress_xx");
    }

    #[test]
    fn unmatched_grids_fall_into_default_group() {
        let grids = sample_grids();
        let groups = find_equations(&grids, "s=stress").unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[1].name, DEFAULT_GROUP);
        assert_eq!(groups[1].equations.len(), 2);
    }

    #[test]
    fn empty_targets_yield_single_default_group() {
        let grids = sample_grids();
        let groups = find_equations(&grids, "").unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].name, DEFAULT_GROUP);
        assert_eq!(groups[0].equations.len(), 3);
    }

    #[test]
    fn first_matching_group_wins() {
        let grids = sample_grids();
        // Both substrings match vel_x; the first listed group takes it.
        let groups = find_equations(&grids, "a=vel_x,b=vel").unwrap();
        assert_eq!(groups[0].equations.len(), 1);
        assert_eq!(groups[1].equations.len(), 1);
    }

    #[test]
    fn malformed_pair_is_rejected() {
        let grids = sample_grids();
        let err = find_equations(&grids, "novalue").unwrap_err();
        assert_eq!(err.code, Some(codes::BAD_EQUATION_TARGET));
    }
}
