// src/grid.rs

/// Dimensions of a dense 3D cell lattice, as declared by chunk headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grid3D {
    pub nx: usize,
    pub ny: usize,
    pub nz: usize,
}

impl Grid3D {
    /// Create a new 3D grid with nx × ny × nz cells.
    pub fn new(nx: usize, ny: usize, nz: usize) -> Self {
        Self { nx, ny, nz }
    }

    pub fn dims(&self) -> [usize; 3] {
        [self.nx, self.ny, self.nz]
    }

    /// Total number of cells.
    pub fn n_cells(&self) -> usize {
        self.nx * self.ny * self.nz
    }

    /// Convert (i, j, k) indices to a flat index: x fastest, then y, then z.
    #[inline]
    pub fn idx(&self, i: usize, j: usize, k: usize) -> usize {
        debug_assert!(i < self.nx && j < self.ny && k < self.nz);
        (k * self.ny + j) * self.nx + i
    }
}

/// Uniform 2D mesh of query points over `[u_min, u_max] × [v_min, v_max]`.
///
/// Coordinates depend only on these six numbers, never on field data.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mesh2D {
    pub nu: usize,
    pub nv: usize,
    pub u_min: f64,
    pub u_max: f64,
    pub v_min: f64,
    pub v_max: f64,
}

/// `n` evenly spaced points from `lo` to `hi` inclusive; `n == 1` gives `[lo]`.
pub fn linspace(lo: f64, hi: f64, n: usize) -> Vec<f64> {
    if n == 1 {
        return vec![lo];
    }
    let step = (hi - lo) / (n - 1) as f64;
    (0..n)
        .map(|i| if i == n - 1 { hi } else { lo + i as f64 * step })
        .collect()
}

impl Mesh2D {
    pub fn new(nu: usize, nv: usize, u_range: [f64; 2], v_range: [f64; 2]) -> Self {
        Self {
            nu,
            nv,
            u_min: u_range[0],
            u_max: u_range[1],
            v_min: v_range[0],
            v_max: v_range[1],
        }
    }

    pub fn n_points(&self) -> usize {
        self.nu * self.nv
    }

    /// Row-major flat index, u fastest.
    #[inline]
    pub fn idx(&self, i: usize, j: usize) -> usize {
        debug_assert!(i < self.nu && j < self.nv);
        j * self.nu + i
    }

    pub fn u_coords(&self) -> Vec<f64> {
        linspace(self.u_min, self.u_max, self.nu)
    }

    pub fn v_coords(&self) -> Vec<f64> {
        linspace(self.v_min, self.v_max, self.nv)
    }

    /// Distance between neighbouring points along u and v.
    /// A single-point axis reports its full span.
    pub fn spacing(&self) -> (f64, f64) {
        let du = (self.u_max - self.u_min) / (self.nu.max(2) - 1) as f64;
        let dv = (self.v_max - self.v_min) / (self.nv.max(2) - 1) as f64;
        (du, dv)
    }
}
