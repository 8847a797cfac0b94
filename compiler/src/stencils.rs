// stencils.rs — Built-in stencil definitions
//
// Clients of the AST-construction API. Each stencil declares its grids and
// params in the constructor and installs one update equation per target
// grid each time the cluster expander calls `define`. Reads are expressed
// relative to the passed-in offsets, so the same definition serves every
// cluster point.

use crate::diag::Diagnostic;
use crate::expr::Ast;
use crate::grid::{GridHandle, Grids, ParamHandle, Params};
use crate::stencil::Stencil;
use crate::tuple::IntTuple;

// ── example ──────────────────────────────────────────────────────────────

/// Order-driven axis sums on a single 4-D grid: the value at `t+1` is the
/// current value plus weighted neighbor pairs at distances `1..=order/2`
/// along each spatial axis.
pub struct ExampleStencil {
    grids: Grids,
    params: Params,
    data: GridHandle,
    order: i64,
}

impl ExampleStencil {
    pub fn new() -> Self {
        let mut grids = Grids::new();
        let data = grids.add("data", &["t", "x", "y", "z"]);
        Self {
            grids,
            params: Params::new(),
            data,
            order: 2,
        }
    }
}

impl Default for ExampleStencil {
    fn default() -> Self {
        Self::new()
    }
}

impl Stencil for ExampleStencil {
    fn name(&self) -> &'static str {
        "example"
    }

    fn grids(&self) -> &Grids {
        &self.grids
    }

    fn params(&self) -> &Params {
        &self.params
    }

    fn uses_order(&self) -> bool {
        true
    }

    fn set_order(&mut self, order: i64) -> bool {
        if order < 2 || order % 2 != 0 {
            return false;
        }
        self.order = order;
        true
    }

    fn define(&mut self, offsets: &IntTuple) -> Result<(), Diagnostic> {
        let h = self.order / 2;
        let mut v = self.grids.at(self.data, offsets);
        for r in 1..=h {
            let c = 1.0 / (6.0 * r as f64);
            for dim in ["x", "y", "z"] {
                v = v + c
                    * (self.grids.at(self.data, &offsets.plus(dim, -r))
                        + self.grids.at(self.data, &offsets.plus(dim, r)));
            }
        }
        self.grids.set(self.data, &offsets.plus("t", 1), v)
    }
}

// ── iso3dfd ──────────────────────────────────────────────────────────────

/// Isotropic acoustic wave propagation, 3-D finite differences, in-place
/// two-array formulation: the next-pressure array holds the `t-1` value
/// when read and receives the `t+1` value.
pub struct Iso3dfdStencil {
    grids: Grids,
    params: Params,
    pressure: GridHandle,
    pressure_next: GridHandle,
    vel: GridHandle,
    coef: ParamHandle,
    order: i64,
}

impl Iso3dfdStencil {
    pub fn new() -> Self {
        let mut grids = Grids::new();
        let pressure = grids.add("pressure", &["x", "y", "z"]);
        let pressure_next = grids.add("pressure_next", &["x", "y", "z"]);
        let vel = grids.add("vel", &["x", "y", "z"]);
        let mut s = Self {
            grids,
            params: Params::new(),
            pressure,
            pressure_next,
            vel,
            coef: ParamHandle(0),
            order: 0,
        };
        let ok = s.apply_order(2);
        debug_assert!(ok);
        s
    }

    /// One coefficient per distance, `coef[0]` for the center.
    fn apply_order(&mut self, order: i64) -> bool {
        if order < 2 || order > 16 || order % 2 != 0 {
            return false;
        }
        self.order = order;
        self.params = Params::new();
        self.coef = self.params.add("coef", &[("r", order / 2 + 1)]);
        true
    }
}

impl Default for Iso3dfdStencil {
    fn default() -> Self {
        Self::new()
    }
}

impl Stencil for Iso3dfdStencil {
    fn name(&self) -> &'static str {
        "iso3dfd"
    }

    fn grids(&self) -> &Grids {
        &self.grids
    }

    fn params(&self) -> &Params {
        &self.params
    }

    fn uses_order(&self) -> bool {
        true
    }

    fn set_order(&mut self, order: i64) -> bool {
        self.apply_order(order)
    }

    fn define(&mut self, offsets: &IntTuple) -> Result<(), Diagnostic> {
        let h = self.order / 2;
        let center = self.grids.at(self.pressure, offsets);

        // Laplacian grouped by distance so each coefficient multiplies
        // the sum of its six ring points once.
        let mut lap = self.params.idx(self.coef, &[0]) * center.clone();
        for r in 1..=h {
            let mut ring: Option<Ast> = None;
            for dim in ["x", "y", "z"] {
                for d in [-r, r] {
                    let read = self.grids.at(self.pressure, &offsets.plus(dim, d));
                    ring = Some(match ring {
                        Some(acc) => acc + read,
                        None => read,
                    });
                }
            }
            if let Some(ring) = ring {
                lap = lap + self.params.idx(self.coef, &[r]) * ring;
            }
        }

        let next = 2.0 * center - self.grids.at(self.pressure_next, offsets)
            + self.grids.at(self.vel, offsets) * lap;
        self.grids.set(self.pressure_next, offsets, next)
    }
}

// ── ave ──────────────────────────────────────────────────────────────────

/// Unweighted average over the `(order+1)^3` cube centered on the point.
pub struct AveStencil {
    grids: Grids,
    params: Params,
    data: GridHandle,
    avg: GridHandle,
    order: i64,
}

impl AveStencil {
    pub fn new() -> Self {
        let mut grids = Grids::new();
        let data = grids.add("data", &["x", "y", "z"]);
        let avg = grids.add("avg", &["x", "y", "z"]);
        Self {
            grids,
            params: Params::new(),
            data,
            avg,
            order: 2,
        }
    }
}

impl Default for AveStencil {
    fn default() -> Self {
        Self::new()
    }
}

impl Stencil for AveStencil {
    fn name(&self) -> &'static str {
        "ave"
    }

    fn grids(&self) -> &Grids {
        &self.grids
    }

    fn params(&self) -> &Params {
        &self.params
    }

    fn uses_order(&self) -> bool {
        true
    }

    fn set_order(&mut self, order: i64) -> bool {
        if order < 2 || order % 2 != 0 {
            return false;
        }
        self.order = order;
        true
    }

    fn define(&mut self, offsets: &IntTuple) -> Result<(), Diagnostic> {
        let h = self.order / 2;
        let side = 2 * h + 1;
        let mut sum = self.grids.at(self.data, offsets);
        for dz in -h..=h {
            for dy in -h..=h {
                for dx in -h..=h {
                    if (dx, dy, dz) == (0, 0, 0) {
                        continue;
                    }
                    let p = offsets.plus("x", dx).plus("y", dy).plus("z", dz);
                    sum = sum + self.grids.at(self.data, &p);
                }
            }
        }
        let weight = 1.0 / (side * side * side) as f64;
        self.grids.set(self.avg, offsets, sum * weight)
    }
}

// ── awp ──────────────────────────────────────────────────────────────────

/// Staggered-grid elastic wave propagation: three velocity and six stress
/// components updated in place from fourth-order staggered first
/// derivatives, with spatially varying material properties.
pub struct AwpStencil {
    grids: Grids,
    params: Params,
    vel_x: GridHandle,
    vel_y: GridHandle,
    vel_z: GridHandle,
    stress_xx: GridHandle,
    stress_yy: GridHandle,
    stress_zz: GridHandle,
    stress_xy: GridHandle,
    stress_xz: GridHandle,
    stress_yz: GridHandle,
    rho: GridHandle,
    lambda: GridHandle,
    mu: GridHandle,
    delta_t: ParamHandle,
    h: ParamHandle,
}

impl AwpStencil {
    pub fn new() -> Self {
        let dims = &["x", "y", "z"];
        let mut grids = Grids::new();
        let vel_x = grids.add("vel_x", dims);
        let vel_y = grids.add("vel_y", dims);
        let vel_z = grids.add("vel_z", dims);
        let stress_xx = grids.add("stress_xx", dims);
        let stress_yy = grids.add("stress_yy", dims);
        let stress_zz = grids.add("stress_zz", dims);
        let stress_xy = grids.add("stress_xy", dims);
        let stress_xz = grids.add("stress_xz", dims);
        let stress_yz = grids.add("stress_yz", dims);
        let rho = grids.add("rho", dims);
        let lambda = grids.add("lambda", dims);
        let mu = grids.add("mu", dims);
        let mut params = Params::new();
        let delta_t = params.add("delta_t", &[("i", 1)]);
        let h = params.add("h", &[("i", 1)]);
        Self {
            grids,
            params,
            vel_x,
            vel_y,
            vel_z,
            stress_xx,
            stress_yy,
            stress_zz,
            stress_xy,
            stress_xz,
            stress_yz,
            rho,
            lambda,
            mu,
            delta_t,
            h,
        }
    }

    /// Fourth-order staggered first derivative of `g` along `dim`.
    fn d(&self, g: GridHandle, dim: &str, o: &IntTuple) -> Ast {
        const C1: f64 = 9.0 / 8.0;
        const C2: f64 = -1.0 / 24.0;
        C1 * (self.grids.at(g, &o.plus(dim, 1)) - self.grids.at(g, o))
            + C2 * (self.grids.at(g, &o.plus(dim, 2)) - self.grids.at(g, &o.plus(dim, -1)))
    }

    fn dt(&self) -> Ast {
        self.params.idx(self.delta_t, &[0])
    }

    fn hh(&self) -> Ast {
        self.params.idx(self.h, &[0])
    }
}

impl Default for AwpStencil {
    fn default() -> Self {
        Self::new()
    }
}

impl Stencil for AwpStencil {
    fn name(&self) -> &'static str {
        "awp"
    }

    fn grids(&self) -> &Grids {
        &self.grids
    }

    fn params(&self) -> &Params {
        &self.params
    }

    fn define(&mut self, offsets: &IntTuple) -> Result<(), Diagnostic> {
        let o = offsets;

        // Velocity from stress divergence.
        let vx = self.grids.at(self.vel_x, o)
            + (self.dt()
                * (self.d(self.stress_xx, "x", o)
                    + self.d(self.stress_xy, "y", o)
                    + self.d(self.stress_xz, "z", o)))
                / (self.hh() * self.grids.at(self.rho, o));
        self.grids.set(self.vel_x, o, vx)?;

        let vy = self.grids.at(self.vel_y, o)
            + (self.dt()
                * (self.d(self.stress_xy, "x", o)
                    + self.d(self.stress_yy, "y", o)
                    + self.d(self.stress_yz, "z", o)))
                / (self.hh() * self.grids.at(self.rho, o));
        self.grids.set(self.vel_y, o, vy)?;

        let vz = self.grids.at(self.vel_z, o)
            + (self.dt()
                * (self.d(self.stress_xz, "x", o)
                    + self.d(self.stress_yz, "y", o)
                    + self.d(self.stress_zz, "z", o)))
                / (self.hh() * self.grids.at(self.rho, o));
        self.grids.set(self.vel_z, o, vz)?;

        // Normal stresses from the velocity divergence plus the axial term.
        for (target, dim, vel) in [
            (self.stress_xx, "x", self.vel_x),
            (self.stress_yy, "y", self.vel_y),
            (self.stress_zz, "z", self.vel_z),
        ] {
            let div_v = self.d(self.vel_x, "x", o)
                + self.d(self.vel_y, "y", o)
                + self.d(self.vel_z, "z", o);
            let s = self.grids.at(target, o)
                + (self.dt()
                    * (self.grids.at(self.lambda, o) * div_v
                        + 2.0 * self.grids.at(self.mu, o) * self.d(vel, dim, o)))
                    / self.hh();
            self.grids.set(target, o, s)?;
        }

        // Shear stresses from the symmetric velocity gradients.
        for (target, dim_a, vel_a, dim_b, vel_b) in [
            (self.stress_xy, "y", self.vel_x, "x", self.vel_y),
            (self.stress_xz, "z", self.vel_x, "x", self.vel_z),
            (self.stress_yz, "z", self.vel_y, "y", self.vel_z),
        ] {
            let s = self.grids.at(target, o)
                + (self.dt()
                    * self.grids.at(self.mu, o)
                    * (self.d(vel_a, dim_a, o) + self.d(vel_b, dim_b, o)))
                    / self.hh();
            self.grids.set(target, o, s)?;
        }

        Ok(())
    }
}
