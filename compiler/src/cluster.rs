// cluster.rs — Cluster expansion
//
// Drives the stencil's `define` across every point of the cluster shape.
// The starting offset of each cluster point is the point elementwise-
// multiplied by the fold lengths, zero-extended to the union of all grid
// dimensions, so each invocation installs entries one whole vector apart.
//
// Preconditions: fold and cluster shapes validated against the grids.
// Postconditions: each grid holds one entry per cluster point (plus any
//                 extra entries the stencil installs deliberately).
// Failure modes: a duplicate installation inside `define` (E0401) aborts
//                the expansion at the offending cluster point.
// Side effects: mutates the stencil's grids.

use crate::diag::Diagnostic;
use crate::stencil::Stencil;
use crate::tuple::{IntTuple, TraversalOrder};

/// Expand the stencil across all cluster points.
pub fn expand(
    stencil: &mut dyn Stencil,
    fold_lengths: &IntTuple,
    cluster_lengths: &IntTuple,
    dim_counts: &IntTuple,
    order: TraversalOrder,
) -> Result<(), Diagnostic> {
    let mut result = Ok(());
    cluster_lengths.visit_all_points(order, |cluster_point| {
        if result.is_err() {
            return;
        }
        let mut offsets = cluster_point.mult_elements(fold_lengths);
        for (dim, _) in dim_counts.entries() {
            if !offsets.has_dim(dim) {
                offsets.add_dim(dim, 0);
            }
        }
        if let Err(e) = stencil.define(&offsets) {
            result = Err(e);
        }
    });
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::codes;
    use crate::expr::Ast;
    use crate::grid::{GridHandle, Grids, Params};

    /// Minimal 1-D client: A(x) = A(x-1) + A(x+1).
    struct AddStencil {
        grids: Grids,
        params: Params,
        a: GridHandle,
        calls: Vec<IntTuple>,
    }

    impl AddStencil {
        fn new() -> Self {
            let mut grids = Grids::new();
            let a = grids.add("A", &["x"]);
            Self {
                grids,
                params: Params::new(),
                a,
                calls: Vec::new(),
            }
        }
    }

    impl Stencil for AddStencil {
        fn name(&self) -> &'static str {
            "add"
        }
        fn grids(&self) -> &Grids {
            &self.grids
        }
        fn params(&self) -> &Params {
            &self.params
        }
        fn define(&mut self, offsets: &IntTuple) -> Result<(), Diagnostic> {
            self.calls.push(offsets.clone());
            let v = self.grids.at(self.a, &offsets.plus("x", -1))
                + self.grids.at(self.a, &offsets.plus("x", 1));
            self.grids.set(self.a, offsets, v)
        }
    }

    fn fold_x(n: i64) -> IntTuple {
        IntTuple::from_pairs(&[("x", n)])
    }

    #[test]
    fn cluster_of_two_defines_one_vector_apart() {
        let mut s = AddStencil::new();
        let dim_counts = s.grids.dim_counts();
        expand(
            &mut s,
            &fold_x(4),
            &fold_x(2),
            &dim_counts,
            TraversalOrder::FirstInner,
        )
        .unwrap();
        let xs: Vec<i64> = s.calls.iter().map(|o| o.get("x")).collect();
        assert_eq!(xs, vec![0, 4]);
        assert_eq!(s.grids.grid(s.a).num_entries(), 2);
    }

    #[test]
    fn offsets_zero_extend_to_all_grid_dims() {
        struct TwoDim {
            grids: Grids,
            params: Params,
            seen: Option<IntTuple>,
        }
        impl Stencil for TwoDim {
            fn name(&self) -> &'static str {
                "twodim"
            }
            fn grids(&self) -> &Grids {
                &self.grids
            }
            fn params(&self) -> &Params {
                &self.params
            }
            fn define(&mut self, offsets: &IntTuple) -> Result<(), Diagnostic> {
                self.seen = Some(offsets.clone());
                Ok(())
            }
        }
        let mut grids = Grids::new();
        grids.add("A", &["x", "y"]);
        let mut s = TwoDim {
            grids,
            params: Params::new(),
            seen: None,
        };
        let dim_counts = s.grids.dim_counts();
        // Cluster over x only; y must still appear with offset 0.
        expand(
            &mut s,
            &fold_x(4),
            &fold_x(1),
            &dim_counts,
            TraversalOrder::FirstInner,
        )
        .unwrap();
        let seen = s.seen.unwrap();
        assert_eq!(seen.get("x"), 0);
        assert_eq!(seen.get("y"), 0);
    }

    #[test]
    fn conflicting_define_aborts_expansion() {
        struct Conflicting {
            grids: Grids,
            params: Params,
            a: GridHandle,
        }
        impl Stencil for Conflicting {
            fn name(&self) -> &'static str {
                "conflict"
            }
            fn grids(&self) -> &Grids {
                &self.grids
            }
            fn params(&self) -> &Params {
                &self.params
            }
            fn define(&mut self, _offsets: &IntTuple) -> Result<(), Diagnostic> {
                // Ignores its offsets and always writes the same point.
                let o = IntTuple::from_pairs(&[("x", 0)]);
                self.grids.set(self.a, &o, Ast::constant(1.0))
            }
        }
        let mut grids = Grids::new();
        let a = grids.add("A", &["x"]);
        let mut s = Conflicting {
            grids,
            params: Params::new(),
            a,
        };
        let dim_counts = s.grids.dim_counts();
        let err = expand(
            &mut s,
            &fold_x(4),
            &fold_x(2),
            &dim_counts,
            TraversalOrder::FirstInner,
        )
        .unwrap_err();
        assert_eq!(err.code, Some(codes::EQUATION_CONFLICT));
    }
}
