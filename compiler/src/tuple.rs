// tuple.rs — Ordered dimension/value tuples
//
// `IntTuple` is the generator's universal index type: it represents grid
// offsets, fold shapes, cluster shapes, and dimension counts as an
// insertion-ordered mapping from dimension name to signed integer.
// Values may be negative (offsets); dimension names are unique.
//
// Preconditions: none.
// Postconditions: entry order is insertion order and is preserved by all
//                 elementwise operations.
// Failure modes: `add_dim` on an existing name and `plus`/`project` on a
//                missing name are contract violations and panic.
// Side effects: none.

use std::cmp::Ordering;
use std::fmt;
use std::fmt::Write as _;
use std::hash::{Hash, Hasher};

use indexmap::IndexMap;

// ── Traversal order ──────────────────────────────────────────────────────

/// Which dimension varies fastest when enumerating the points of a shape.
///
/// `FirstInner` means the first-added dimension is the inner (fastest)
/// loop; `LastInner` is the reverse. The order is chosen once per
/// generation run and threaded explicitly through every enumeration so a
/// flat index always maps to the same point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraversalOrder {
    FirstInner,
    LastInner,
}

// ── IntTuple ─────────────────────────────────────────────────────────────

/// Insertion-ordered mapping from dimension name to signed integer.
#[derive(Debug, Clone, Default)]
pub struct IntTuple {
    dims: IndexMap<String, i64>,
}

impl IntTuple {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tuple from `(name, value)` pairs.
    pub fn from_pairs(pairs: &[(&str, i64)]) -> Self {
        let mut t = Self::new();
        for (name, val) in pairs {
            t.add_dim(name, *val);
        }
        t
    }

    /// Append a new dimension. Panics if the name is already present —
    /// callers that accept external input must check `lookup` first.
    pub fn add_dim(&mut self, name: &str, val: i64) {
        let prev = self.dims.insert(name.to_string(), val);
        if prev.is_some() {
            panic!("dimension '{}' added twice to tuple", name);
        }
    }

    /// Set the value of a dimension, adding it if absent.
    pub fn set_val(&mut self, name: &str, val: i64) {
        self.dims.insert(name.to_string(), val);
    }

    /// Value of a dimension, if present.
    pub fn lookup(&self, name: &str) -> Option<i64> {
        self.dims.get(name).copied()
    }

    /// Value of a dimension that must be present.
    pub fn get(&self, name: &str) -> i64 {
        match self.dims.get(name) {
            Some(v) => *v,
            None => panic!("dimension '{}' not in tuple {}", name, self),
        }
    }

    pub fn has_dim(&self, name: &str) -> bool {
        self.dims.contains_key(name)
    }

    /// Number of dimensions.
    pub fn len(&self) -> usize {
        self.dims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dims.is_empty()
    }

    /// Dimension names in insertion order.
    pub fn dim_names(&self) -> impl Iterator<Item = &str> {
        self.dims.keys().map(|s| s.as_str())
    }

    /// `(name, value)` entries in insertion order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, i64)> {
        self.dims.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Product of all values; 1 for the empty tuple.
    pub fn product(&self) -> i64 {
        self.dims.values().product()
    }

    /// New tuple with `delta` added to one dimension. Panics if absent.
    pub fn plus(&self, name: &str, delta: i64) -> Self {
        let mut t = self.clone();
        let v = t.get(name);
        t.set_val(name, v + delta);
        t
    }

    /// Elementwise product over shared dimensions; dimensions unique to
    /// either side are copied through unchanged.
    pub fn mult_elements(&self, other: &IntTuple) -> Self {
        self.zip_with(other, |a, b| a * b)
    }

    /// Elementwise sum over shared dimensions; dimensions unique to
    /// either side are copied through unchanged.
    pub fn add_elements(&self, other: &IntTuple) -> Self {
        self.zip_with(other, |a, b| a + b)
    }

    fn zip_with(&self, other: &IntTuple, f: impl Fn(i64, i64) -> i64) -> Self {
        let mut out = self.clone();
        for (name, bv) in other.entries() {
            match self.lookup(name) {
                Some(av) => out.set_val(name, f(av, bv)),
                None => out.set_val(name, bv),
            }
        }
        out
    }

    /// Subset of this tuple restricted to `names`, in the listed order.
    /// Panics if any name is absent.
    pub fn project(&self, names: &[&str]) -> Self {
        let mut t = Self::new();
        for name in names {
            t.add_dim(name, self.get(name));
        }
        t
    }

    // ── Point enumeration ────────────────────────────────────────────────

    /// The point at flat index `flat` when enumerating `[0, v_d)` in each
    /// dimension under `order`. `flat` must be in `[0, product())`.
    pub fn point_at(&self, flat: i64, order: TraversalOrder) -> IntTuple {
        debug_assert!(flat >= 0 && flat < self.product());
        let mut vals: IndexMap<&str, i64> = IndexMap::new();
        let mut rest = flat;
        for (name, len) in self.ordered_entries(order) {
            vals.insert(name, rest % len);
            rest /= len;
        }
        // Entry order of the point is this tuple's insertion order, not
        // the traversal order.
        let mut point = IntTuple::new();
        for (name, _) in self.entries() {
            point.add_dim(name, vals[name]);
        }
        point
    }

    /// Inverse of `point_at`: the flat index of `point`, whose value in
    /// each dimension must lie in `[0, v_d)`.
    pub fn flat_index_of(&self, point: &IntTuple, order: TraversalOrder) -> i64 {
        let mut flat = 0;
        let mut stride = 1;
        for (name, len) in self.ordered_entries(order) {
            let v = point.get(name);
            debug_assert!(v >= 0 && v < len);
            flat += v * stride;
            stride *= len;
        }
        flat
    }

    /// Enumerate every point of the rectangular region `[0, v_d)` per
    /// dimension, in flat-index order under `order`. The empty tuple
    /// yields a single empty point.
    pub fn visit_all_points(&self, order: TraversalOrder, mut f: impl FnMut(&IntTuple)) {
        let n = self.product();
        for flat in 0..n {
            let point = self.point_at(flat, order);
            f(&point);
        }
    }

    /// Entries with the inner (fastest-varying) dimension first.
    fn ordered_entries(&self, order: TraversalOrder) -> Vec<(&str, i64)> {
        let mut v: Vec<_> = self.entries().collect();
        if order == TraversalOrder::LastInner {
            v.reverse();
        }
        v
    }

    // ── Formatting ───────────────────────────────────────────────────────

    /// `"x=4, y=2"` with the given separator between entries.
    pub fn make_dim_val_str(&self, sep: &str) -> String {
        let mut s = String::new();
        for (i, (name, val)) in self.entries().enumerate() {
            if i > 0 {
                s.push_str(sep);
            }
            let _ = write!(s, "{}={}", name, val);
        }
        s
    }

    /// `"4 * 2"` — values only.
    pub fn make_val_str(&self, sep: &str) -> String {
        let mut s = String::new();
        for (i, (_, val)) in self.entries().enumerate() {
            if i > 0 {
                s.push_str(sep);
            }
            let _ = write!(s, "{}", val);
        }
        s
    }

    /// `"x, y"` — names only.
    pub fn make_dim_str(&self, sep: &str) -> String {
        self.dim_names().collect::<Vec<_>>().join(sep)
    }
}

impl fmt::Display for IntTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.make_dim_val_str(", "))
    }
}

// Identity is the full entry sequence, order included: tuples built with
// the same dimensions in a different order are distinct keys.
impl PartialEq for IntTuple {
    fn eq(&self, other: &Self) -> bool {
        self.dims.len() == other.dims.len()
            && self.entries().zip(other.entries()).all(|(a, b)| a == b)
    }
}

impl Eq for IntTuple {}

impl Hash for IntTuple {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for (name, val) in self.entries() {
            name.hash(state);
            val.hash(state);
        }
    }
}

impl PartialOrd for IntTuple {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IntTuple {
    fn cmp(&self, other: &Self) -> Ordering {
        let a: Vec<_> = self.entries().collect();
        let b: Vec<_> = other.entries().collect();
        a.cmp(&b)
    }
}
