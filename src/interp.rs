// src/interp.rs
//
// Resample slice samples onto a uniform mesh.
//
// Strategies (selected per plane, see `InterpolationMethod`):
//  - bilinear (default): samples must form a complete rectilinear lattice
//    (spacing may vary). Inside the lattice's bounding box the enclosing cell is
//    interpolated bilinearly; outside it the result is NaN.
//  - nearest: nearest sample, first one wins on ties. NaN outside the convex hull.
//  - inverse_distance: Shepard weighting 1/d^p over all samples. NaN outside the
//    convex hull; a query exactly on a sample returns that sample.
//
// No strategy extrapolates. Each vector component is interpolated independently.
// Mesh coordinates come from `Mesh2D` alone, so the data never moves the grid.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::InterpolationError;
use crate::grid::Mesh2D;
use crate::slice::{Sample, Slice};
use crate::vector_field::VectorGrid2D;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InterpolationMethod {
    #[default]
    Bilinear,
    Nearest,
    InverseDistance {
        power: f64,
    },
}

/// A surface prepared from samples, evaluable anywhere.
pub trait Interpolant: Sync {
    /// Both components at (u, v), or None where the strategy does not extrapolate.
    fn eval(&self, u: f64, v: f64) -> Option<[f64; 2]>;
}

impl InterpolationMethod {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Bilinear => "bilinear",
            Self::Nearest => "nearest",
            Self::InverseDistance { .. } => "inverse_distance",
        }
    }

    /// Build the interpolant. `samples` must already have passed the geometry check.
    pub fn prepare<'a>(
        &self,
        samples: &'a [Sample],
    ) -> Result<Box<dyn Interpolant + 'a>, InterpolationError> {
        Ok(match *self {
            Self::Bilinear => Box::new(Lattice::build(samples)?),
            Self::Nearest => Box::new(Nearest {
                hull: Hull::of(samples),
                samples,
            }),
            Self::InverseDistance { power } => Box::new(InverseDistance {
                hull: Hull::of(samples),
                samples,
                power,
            }),
        })
    }
}

/// Resample `slice` onto `mesh` with `method`.
pub fn resample(
    slice: &Slice,
    mesh: &Mesh2D,
    method: InterpolationMethod,
) -> Result<VectorGrid2D, InterpolationError> {
    let usable: Vec<Sample> = slice
        .samples
        .iter()
        .copied()
        .filter(|s| {
            s.u.is_finite() && s.v.is_finite() && s.value[0].is_finite() && s.value[1].is_finite()
        })
        .collect();
    check_geometry(&usable, slice.samples.len())?;

    let surface = method.prepare(&usable)?;
    let us = mesh.u_coords();
    let vs = mesh.v_coords();
    let nu = mesh.nu;

    let mut grid = VectorGrid2D::new(*mesh);
    grid.a
        .par_chunks_mut(nu)
        .zip(grid.b.par_chunks_mut(nu))
        .enumerate()
        .for_each(|(j, (row_a, row_b))| {
            let v = vs[j];
            for i in 0..nu {
                if let Some([a, b]) = surface.eval(us[i], v) {
                    row_a[i] = a;
                    row_b[i] = b;
                }
            }
        });
    Ok(grid)
}

#[inline]
fn cross(o: (f64, f64), a: (f64, f64), b: (f64, f64)) -> f64 {
    (a.0 - o.0) * (b.1 - o.1) - (a.1 - o.1) * (b.0 - o.0)
}

/// Require three finite samples that are not all on one line.
fn check_geometry(points: &[Sample], total: usize) -> Result<(), InterpolationError> {
    let degenerate = || InterpolationError::Degenerate {
        usable: points.len(),
        total,
    };
    if points.len() < 3 {
        return Err(degenerate());
    }

    let p0 = (points[0].u, points[0].v);
    let d2 = |s: &Sample| (s.u - p0.0).powi(2) + (s.v - p0.1).powi(2);
    let far = points
        .iter()
        .max_by(|a, b| d2(*a).total_cmp(&d2(*b)))
        .ok_or_else(degenerate)?;
    let span2 = d2(far);
    if span2 == 0.0 {
        return Err(degenerate());
    }

    let p1 = (far.u, far.v);
    let tol = 1e-9 * span2;
    if points.iter().any(|s| cross(p0, p1, (s.u, s.v)).abs() > tol) {
        Ok(())
    } else {
        Err(degenerate())
    }
}

/// Sorted distinct values, exact comparison.
fn distinct_sorted(values: impl Iterator<Item = f64>) -> Vec<f64> {
    let mut v: Vec<f64> = values.collect();
    v.sort_by(f64::total_cmp);
    v.dedup();
    v
}

/// Index `i` of the lattice cell `[xs[i], xs[i + 1]]` containing `x`, clamped to the last cell.
#[inline]
fn cell_of(xs: &[f64], x: f64) -> usize {
    xs.partition_point(|&c| c <= x).saturating_sub(1).min(xs.len() - 2)
}

struct Lattice {
    us: Vec<f64>,
    vs: Vec<f64>,
    /// `values[jv * us.len() + iu]`
    values: Vec<[f64; 2]>,
}

impl Lattice {
    fn build(samples: &[Sample]) -> Result<Self, InterpolationError> {
        let us = distinct_sorted(samples.iter().map(|s| s.u));
        let vs = distinct_sorted(samples.iter().map(|s| s.v));
        let (nu, nv) = (us.len(), vs.len());
        if nu * nv != samples.len() {
            return Err(InterpolationError::NotRectilinear(format!(
                "{} samples for a {}x{} lattice",
                samples.len(),
                nu,
                nv
            )));
        }

        let mut slots: Vec<Option<[f64; 2]>> = vec![None; nu * nv];
        for s in samples {
            let iu = us.partition_point(|&x| x < s.u);
            let jv = vs.partition_point(|&x| x < s.v);
            let slot = &mut slots[jv * nu + iu];
            if slot.is_some() {
                return Err(InterpolationError::NotRectilinear(format!(
                    "duplicate sample at ({}, {})",
                    s.u, s.v
                )));
            }
            *slot = Some(s.value);
        }
        // Counts match and there are no duplicates, so every slot is filled.
        let values = slots.into_iter().flatten().collect();
        Ok(Self { us, vs, values })
    }
}

impl Interpolant for Lattice {
    fn eval(&self, u: f64, v: f64) -> Option<[f64; 2]> {
        let (us, vs) = (&self.us, &self.vs);
        let nu = us.len();
        if u < us[0] || u > us[nu - 1] || v < vs[0] || v > vs[vs.len() - 1] {
            return None;
        }

        let i0 = cell_of(us, u);
        let j0 = cell_of(vs, v);
        let tx = (u - us[i0]) / (us[i0 + 1] - us[i0]);
        let ty = (v - vs[j0]) / (vs[j0 + 1] - vs[j0]);

        let v00 = self.values[j0 * nu + i0];
        let v10 = self.values[j0 * nu + i0 + 1];
        let v01 = self.values[(j0 + 1) * nu + i0];
        let v11 = self.values[(j0 + 1) * nu + i0 + 1];

        let lerp = |a: [f64; 2], b: [f64; 2], t: f64| -> [f64; 2] {
            [a[0] * (1.0 - t) + b[0] * t, a[1] * (1.0 - t) + b[1] * t]
        };

        let v0 = lerp(v00, v10, tx);
        let v1 = lerp(v01, v11, tx);
        Some(lerp(v0, v1, ty))
    }
}

/// Counter-clockwise convex hull (Andrew's monotone chain).
struct Hull {
    vertices: Vec<(f64, f64)>,
    tol: f64,
}

impl Hull {
    fn of(samples: &[Sample]) -> Self {
        let mut pts: Vec<(f64, f64)> = samples.iter().map(|s| (s.u, s.v)).collect();
        pts.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)));
        pts.dedup();

        let mut lower: Vec<(f64, f64)> = Vec::new();
        for &p in &pts {
            while lower.len() >= 2 && cross(lower[lower.len() - 2], lower[lower.len() - 1], p) <= 0.0 {
                lower.pop();
            }
            lower.push(p);
        }
        let mut upper: Vec<(f64, f64)> = Vec::new();
        for &p in pts.iter().rev() {
            while upper.len() >= 2 && cross(upper[upper.len() - 2], upper[upper.len() - 1], p) <= 0.0 {
                upper.pop();
            }
            upper.push(p);
        }
        lower.pop();
        upper.pop();
        lower.extend(upper);

        let (lo, hi) = pts.iter().fold(
            ((f64::INFINITY, f64::INFINITY), (f64::NEG_INFINITY, f64::NEG_INFINITY)),
            |(lo, hi), p| ((lo.0.min(p.0), lo.1.min(p.1)), (hi.0.max(p.0), hi.1.max(p.1))),
        );
        let span2 = (hi.0 - lo.0).powi(2) + (hi.1 - lo.1).powi(2);
        Self {
            vertices: lower,
            tol: 1e-9 * span2,
        }
    }

    fn contains(&self, u: f64, v: f64) -> bool {
        let n = self.vertices.len();
        (0..n).all(|k| {
            let a = self.vertices[k];
            let b = self.vertices[(k + 1) % n];
            cross(a, b, (u, v)) >= -self.tol
        })
    }
}

struct Nearest<'a> {
    hull: Hull,
    samples: &'a [Sample],
}

impl Interpolant for Nearest<'_> {
    fn eval(&self, u: f64, v: f64) -> Option<[f64; 2]> {
        if !self.hull.contains(u, v) {
            return None;
        }
        let mut best: Option<(f64, [f64; 2])> = None;
        for s in self.samples {
            let d2 = (s.u - u).powi(2) + (s.v - v).powi(2);
            if best.is_none_or(|(b, _)| d2 < b) {
                best = Some((d2, s.value));
            }
        }
        best.map(|(_, value)| value)
    }
}

struct InverseDistance<'a> {
    hull: Hull,
    samples: &'a [Sample],
    power: f64,
}

impl Interpolant for InverseDistance<'_> {
    fn eval(&self, u: f64, v: f64) -> Option<[f64; 2]> {
        if !self.hull.contains(u, v) {
            return None;
        }
        let half_power = 0.5 * self.power;
        let (mut wa, mut wb, mut wsum) = (0.0, 0.0, 0.0);
        for s in self.samples {
            let d2 = (s.u - u).powi(2) + (s.v - v).powi(2);
            if d2 == 0.0 {
                return Some(s.value);
            }
            let w = 1.0 / d2.powf(half_power);
            wa += w * s.value[0];
            wb += w * s.value[1];
            wsum += w;
        }
        Some([wa / wsum, wb / wsum])
    }
}
