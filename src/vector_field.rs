// src/vector_field.rs

use crate::grid::{Grid3D, Mesh2D};

/// Polarisation field on a dense 3D grid.
/// Each cell stores (px, py, pz).
#[derive(Debug, Clone)]
pub struct VectorField3D {
    pub grid: Grid3D,
    pub data: Vec<[f64; 3]>,
}

impl VectorField3D {
    /// Create a zero field on the given grid.
    pub fn new(grid: Grid3D) -> Self {
        let n = grid.n_cells();
        Self {
            grid,
            data: vec![[0.0; 3]; n],
        }
    }

    /// Get the flat index in `data` for grid indices (i, j, k).
    #[inline]
    pub fn idx(&self, i: usize, j: usize, k: usize) -> usize {
        self.grid.idx(i, j, k)
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize, k: usize) -> [f64; 3] {
        self.data[self.idx(i, j, k)]
    }

    #[inline]
    pub fn set(&mut self, i: usize, j: usize, k: usize, v: [f64; 3]) {
        let idx = self.idx(i, j, k);
        self.data[idx] = v;
    }
}

/// Two-component vector field sampled on a uniform `Mesh2D`.
///
/// Points outside the source samples' hull hold NaN in both components.
#[derive(Debug, Clone)]
pub struct VectorGrid2D {
    pub mesh: Mesh2D,
    pub a: Vec<f64>,
    pub b: Vec<f64>,
}

impl VectorGrid2D {
    pub fn new(mesh: Mesh2D) -> Self {
        let n = mesh.n_points();
        Self {
            mesh,
            a: vec![f64::NAN; n],
            b: vec![f64::NAN; n],
        }
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> Option<[f64; 2]> {
        let idx = self.mesh.idx(i, j);
        let (a, b) = (self.a[idx], self.b[idx]);
        (a.is_finite() && b.is_finite()).then_some([a, b])
    }

    /// Largest finite vector magnitude, or None if every point is empty.
    pub fn max_magnitude(&self) -> Option<f64> {
        self.a
            .iter()
            .zip(&self.b)
            .filter(|(a, b)| a.is_finite() && b.is_finite())
            .map(|(a, b)| a.hypot(*b))
            .fold(None, |acc: Option<f64>, m| Some(acc.map_or(m, |x| x.max(m))))
    }

    /// Number of points carrying a value.
    pub fn n_defined(&self) -> usize {
        self.a
            .iter()
            .zip(&self.b)
            .filter(|(a, b)| a.is_finite() && b.is_finite())
            .count()
    }
}
