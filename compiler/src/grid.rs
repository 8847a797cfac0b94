// grid.rs — Grid and parameter containers
//
// A `Grid` is a named n-dimensional array description: an ordered list of
// dimension names plus a sparse, insertion-ordered map from offset tuples
// to the expression that should be stored there. Stencil clients install
// entries through `Grids::set` while the cluster expander scans cluster
// points. A `Param` is the read-only analogue (compile-time-shape
// coefficient array) and carries no entry map.
//
// Grids and params are addressed through copyable integer handles so a
// stencil can hold handles in its own fields while the collection owns the
// storage.

use indexmap::IndexMap;

use crate::diag::{codes, Diagnostic};
use crate::expr::{Ast, ExprRef, GridPoint, ParamIndex};
use crate::tuple::IntTuple;

// ── Handles ──────────────────────────────────────────────────────────────

/// Stable index of a grid within its `Grids` collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridHandle(pub usize);

/// Stable index of a param within its `Params` collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParamHandle(pub usize);

// ── Grid ─────────────────────────────────────────────────────────────────

/// Named n-dimensional array with installed update equations.
#[derive(Debug, Clone)]
pub struct Grid {
    name: String,
    dims: Vec<String>,
    entries: IndexMap<IntTuple, ExprRef>,
}

impl Grid {
    pub fn new(name: &str, dims: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            dims: dims.iter().map(|d| d.to_string()).collect(),
            entries: IndexMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared dimension names in declaration order.
    pub fn dims(&self) -> impl Iterator<Item = &str> {
        self.dims.iter().map(|s| s.as_str())
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Normalize an offset tuple onto this grid's declared dimensions, in
    /// declaration order. Extra dimensions in `offsets` are ignored (the
    /// expander passes the union of all grid dims); a missing declared
    /// dimension is a client-stencil contract violation and panics.
    fn normalize(&self, offsets: &IntTuple) -> IntTuple {
        let mut t = IntTuple::new();
        for dim in &self.dims {
            match offsets.lookup(dim) {
                Some(v) => t.add_dim(dim, v),
                None => panic!(
                    "offset tuple ({}) missing dimension '{}' of grid '{}'",
                    offsets, dim, self.name
                ),
            }
        }
        t
    }

    /// Build a read of this grid at the given offsets.
    pub fn at(&self, offsets: &IntTuple) -> Ast {
        Ast::grid_read(GridPoint::new(&self.name, self.normalize(offsets)))
    }

    /// Install the update equation for one offset. A second installation
    /// at the same offset within one expansion is an equation conflict.
    pub fn set(&mut self, offsets: &IntTuple, value: Ast) -> Result<(), Diagnostic> {
        let key = self.normalize(offsets);
        if self.entries.contains_key(&key) {
            return Err(Diagnostic::error(format!(
                "duplicate assignment into grid '{}' at ({})",
                self.name, key
            ))
            .with_code(codes::EQUATION_CONFLICT));
        }
        self.entries.insert(key, value.into_expr());
        Ok(())
    }

    /// Installed `(offsets, rhs)` entries in installation order.
    pub fn entries(&self) -> impl Iterator<Item = (&IntTuple, &ExprRef)> {
        self.entries.iter()
    }

    pub fn num_entries(&self) -> usize {
        self.entries.len()
    }
}

// ── Grids collection ─────────────────────────────────────────────────────

/// Ordered collection of the grids declared by one stencil.
#[derive(Debug, Clone, Default)]
pub struct Grids {
    list: Vec<Grid>,
}

impl Grids {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a grid; registration order is preserved everywhere
    /// downstream (dimension counting, equation grouping, emission).
    pub fn add(&mut self, name: &str, dims: &[&str]) -> GridHandle {
        self.list.push(Grid::new(name, dims));
        GridHandle(self.list.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Grid> {
        self.list.iter()
    }

    pub fn grid(&self, h: GridHandle) -> &Grid {
        &self.list[h.0]
    }

    pub fn by_name(&self, name: &str) -> Option<&Grid> {
        self.list.iter().find(|g| g.name() == name)
    }

    /// Read of grid `h` at `offsets` (see `Grid::at`).
    pub fn at(&self, h: GridHandle, offsets: &IntTuple) -> Ast {
        self.list[h.0].at(offsets)
    }

    /// Install an update equation on grid `h` (see `Grid::set`).
    pub fn set(&mut self, h: GridHandle, offsets: &IntTuple, value: Ast) -> Result<(), Diagnostic> {
        self.list[h.0].set(offsets, value)
    }

    /// Union of all declared dimensions with, per dimension, the number
    /// of grids declaring it. Dimension order is first-declared order.
    pub fn dim_counts(&self) -> IntTuple {
        let mut counts = IntTuple::new();
        for grid in &self.list {
            for dim in grid.dims() {
                match counts.lookup(dim) {
                    Some(n) => counts.set_val(dim, n + 1),
                    None => counts.add_dim(dim, 1),
                }
            }
        }
        counts
    }
}

// ── Param ────────────────────────────────────────────────────────────────

/// Named read-only coefficient array with a compile-time shape.
#[derive(Debug, Clone)]
pub struct Param {
    name: String,
    shape: IntTuple,
}

impl Param {
    pub fn new(name: &str, shape: IntTuple) -> Self {
        Self {
            name: name.to_string(),
            shape,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> &IntTuple {
        &self.shape
    }

    /// Build a read of this param at the given index tuple.
    pub fn at(&self, indices: &IntTuple) -> Ast {
        let mut t = IntTuple::new();
        for dim in self.shape.dim_names() {
            match indices.lookup(dim) {
                Some(v) => {
                    debug_assert!(
                        v >= 0 && v < self.shape.get(dim),
                        "param '{}' index {}={} out of shape ({})",
                        self.name,
                        dim,
                        v,
                        self.shape
                    );
                    t.add_dim(dim, v);
                }
                None => panic!(
                    "index tuple ({}) missing dimension '{}' of param '{}'",
                    indices, dim, self.name
                ),
            }
        }
        Ast::param_read(ParamIndex {
            param: self.name.clone(),
            indices: t,
        })
    }

    /// Positional read: indices in shape-declaration order.
    pub fn idx(&self, vals: &[i64]) -> Ast {
        assert_eq!(
            vals.len(),
            self.shape.len(),
            "param '{}' expects {} indices",
            self.name,
            self.shape.len()
        );
        let mut t = IntTuple::new();
        for (dim, v) in self.shape.dim_names().zip(vals.iter()) {
            t.add_dim(dim, *v);
        }
        self.at(&t)
    }
}

// ── Params collection ────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct Params {
    list: Vec<Param>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: &str, shape: &[(&str, i64)]) -> ParamHandle {
        self.list.push(Param::new(name, IntTuple::from_pairs(shape)));
        ParamHandle(self.list.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Param> {
        self.list.iter()
    }

    pub fn param(&self, h: ParamHandle) -> &Param {
        &self.list[h.0]
    }

    /// Positional read of param `h` (see `Param::idx`).
    pub fn idx(&self, h: ParamHandle, vals: &[i64]) -> Ast {
        self.list[h.0].idx(vals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Expr;

    #[test]
    fn at_normalizes_to_declared_order_and_drops_extras() {
        let mut grids = Grids::new();
        let a = grids.add("A", &["x", "y"]);
        // Offsets carry an extra dim and a different order.
        let ofs = IntTuple::from_pairs(&[("t", 0), ("y", 2), ("x", 1)]);
        let ast = grids.at(a, &ofs);
        match ast.expr().as_ref() {
            Expr::GridRead(p) => {
                assert_eq!(p.offsets.make_dim_val_str(","), "x=1,y=2");
            }
            other => panic!("expected grid read, got {:?}", other),
        }
    }

    #[test]
    #[should_panic(expected = "missing dimension 'y'")]
    fn at_requires_all_declared_dims() {
        let mut grids = Grids::new();
        let a = grids.add("A", &["x", "y"]);
        grids.at(a, &IntTuple::from_pairs(&[("x", 0)]));
    }

    #[test]
    fn duplicate_set_is_equation_conflict() {
        let mut grids = Grids::new();
        let a = grids.add("A", &["x"]);
        let ofs = IntTuple::from_pairs(&[("x", 0)]);
        grids.set(a, &ofs, Ast::constant(1.0)).unwrap();
        let err = grids.set(a, &ofs, Ast::constant(2.0)).unwrap_err();
        assert_eq!(err.code, Some(codes::EQUATION_CONFLICT));
    }

    #[test]
    fn dim_counts_unions_in_declaration_order() {
        let mut grids = Grids::new();
        grids.add("A", &["x", "y"]);
        grids.add("B", &["x"]);
        let counts = grids.dim_counts();
        assert_eq!(counts.get("x"), 2);
        assert_eq!(counts.get("y"), 1);
        assert_eq!(counts.make_dim_str(","), "x,y");
    }

    #[test]
    fn param_positional_read() {
        let mut params = Params::new();
        let c = params.add("coef", &[("r", 5)]);
        let ast = params.idx(c, &[3]);
        match ast.expr().as_ref() {
            Expr::ParamRead(p) => {
                assert_eq!(p.param, "coef");
                assert_eq!(p.indices.get("r"), 3);
            }
            other => panic!("expected param read, got {:?}", other),
        }
    }
}
