// src/slice.rs
//
// Orthogonal cross-sections of a 3D polarisation field.
//
// Conventions:
//  - Fixed indices are 0-based; `None` selects the mid-plane `extent / 2`
//    (floor division: 100 -> 50, 101 -> 50, 1 -> 0).
//  - Sample positions are 1-based lattice coordinates (cell i sits at u = i + 1),
//    the same numbering chunk files use, so bounds like 1..100 span a 100-cell axis.

use std::fmt;

use serde::Serialize;

use crate::error::PlaneError;
use crate::vector_field::VectorField3D;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Plane {
    XY,
    XZ,
    YZ,
}

impl Plane {
    pub const ALL: [Plane; 3] = [Plane::XY, Plane::XZ, Plane::YZ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::XY => "XY",
            Self::XZ => "XZ",
            Self::YZ => "YZ",
        }
    }

    /// Position of this plane in `Plane::ALL`.
    pub fn ordinal(&self) -> usize {
        match self {
            Self::XY => 0,
            Self::XZ => 1,
            Self::YZ => 2,
        }
    }

    /// Axis held fixed by the plane: 0 = x, 1 = y, 2 = z.
    pub fn normal_axis(&self) -> usize {
        match self {
            Self::XY => 2,
            Self::XZ => 1,
            Self::YZ => 0,
        }
    }

    /// The two in-plane axes, in (u, v) order.
    pub fn in_plane_axes(&self) -> (usize, usize) {
        match self {
            Self::XY => (0, 1),
            Self::XZ => (0, 2),
            Self::YZ => (1, 2),
        }
    }
}

impl fmt::Display for Plane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mid-plane index for an axis with `extent` cells.
#[inline]
pub fn midpoint(extent: usize) -> usize {
    extent / 2
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub u: f64,
    pub v: f64,
    pub value: [f64; 2],
}

#[derive(Debug, Clone)]
pub struct Slice {
    pub plane: Plane,
    pub index: usize,
    pub samples: Vec<Sample>,
}

/// Cut `field` along `plane` at `index` (or the mid-plane when `None`).
///
/// Samples are emitted with u outermost, v innermost.
pub fn extract(
    field: &VectorField3D,
    plane: Plane,
    index: Option<usize>,
) -> Result<Slice, PlaneError> {
    let dims = field.grid.dims();
    let extent = dims[plane.normal_axis()];
    let index = index.unwrap_or_else(|| midpoint(extent));
    if index >= extent {
        return Err(PlaneError::IndexOutOfRange {
            plane,
            index,
            extent,
        });
    }

    let (ua, va) = plane.in_plane_axes();
    let (nu, nv) = (dims[ua], dims[va]);
    let mut samples = Vec::with_capacity(nu * nv);

    for a in 0..nu {
        for b in 0..nv {
            let (i, j, k, value) = match plane {
                Plane::XY => {
                    let p = field.get(a, b, index);
                    (a, b, index, [p[0], p[1]])
                }
                Plane::XZ => {
                    let p = field.get(a, index, b);
                    (a, index, b, [p[0], p[2]])
                }
                Plane::YZ => {
                    let p = field.get(index, a, b);
                    (index, a, b, [p[1], p[2]])
                }
            };
            let pos = [i, j, k];
            samples.push(Sample {
                u: (pos[ua] + 1) as f64,
                v: (pos[va] + 1) as f64,
                value,
            });
        }
    }

    Ok(Slice {
        plane,
        index,
        samples,
    })
}
