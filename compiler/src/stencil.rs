// stencil.rs — Stencil trait and registry
//
// A stencil is a client of the AST-construction API: it declares grids and
// params up front and, when the cluster expander calls `define`, installs
// one update equation per grid at the given offsets. The registry is a
// deterministic constructor table (built-ins in fixed order), looked up by
// name from the command line.
//
// Preconditions: none.
// Postconditions: `create` returns a freshly constructed stencil whose
//                 grids hold no installed entries.
// Failure modes: unknown stencil names return `None`; the driver maps
//                that to E0101.
// Side effects: none.

use crate::diag::Diagnostic;
use crate::grid::{Grids, Params};
use crate::stencils::{AveStencil, AwpStencil, ExampleStencil, Iso3dfdStencil};
use crate::tuple::IntTuple;

// ── Stencil trait ────────────────────────────────────────────────────────

/// One stencil definition: grid/param declarations plus the equation
/// builder invoked per cluster point.
pub trait Stencil {
    fn name(&self) -> &'static str;

    fn grids(&self) -> &Grids;

    fn params(&self) -> &Params;

    /// Whether the stencil's shape is driven by an order option.
    fn uses_order(&self) -> bool {
        false
    }

    /// Apply an order; `false` rejects it (only called when `uses_order`).
    fn set_order(&mut self, _order: i64) -> bool {
        false
    }

    /// Install update equations for the cluster point whose starting
    /// offsets are `offsets` (one entry per target grid).
    fn define(&mut self, offsets: &IntTuple) -> Result<(), Diagnostic>;
}

// ── Registry ─────────────────────────────────────────────────────────────

/// One registry row: stencil name plus constructor.
pub struct StencilEntry {
    pub name: &'static str,
    pub make: fn() -> Box<dyn Stencil>,
}

/// The built-in stencils, in registration order.
pub fn all_stencils() -> Vec<StencilEntry> {
    vec![
        StencilEntry {
            name: "example",
            make: || Box::new(ExampleStencil::new()),
        },
        StencilEntry {
            name: "iso3dfd",
            make: || Box::new(Iso3dfdStencil::new()),
        },
        StencilEntry {
            name: "ave",
            make: || Box::new(AveStencil::new()),
        },
        StencilEntry {
            name: "awp",
            make: || Box::new(AwpStencil::new()),
        },
    ]
}

/// Construct the named stencil, if registered.
pub fn create(name: &str) -> Option<Box<dyn Stencil>> {
    all_stencils()
        .into_iter()
        .find(|e| e.name == name)
        .map(|e| (e.make)())
}

/// Registered names, for usage output.
pub fn names() -> Vec<&'static str> {
    all_stencils().into_iter().map(|e| e.name).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_is_deterministic_and_complete() {
        assert_eq!(names(), vec!["example", "iso3dfd", "ave", "awp"]);
    }

    #[test]
    fn create_by_name() {
        let s = create("iso3dfd").unwrap();
        assert_eq!(s.name(), "iso3dfd");
        assert!(s.uses_order());
        assert!(create("nosuch").is_none());
    }

    #[test]
    fn fresh_stencils_have_no_installed_entries() {
        for entry in all_stencils() {
            let s = (entry.make)();
            assert!(s.grids().iter().all(|g| g.num_entries() == 0));
        }
    }
}
