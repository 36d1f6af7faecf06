// src/render.rs
//
// Quiver plots of a resampled slice.
//
// The image is the data window only: no axes, labels or padding, equal aspect,
// white background. Arrows pivot on their mesh point and are scaled so the longest
// vector spans one mesh spacing times the plane's scale factor.
// Nothing here depends on time, fonts or the environment, so identical input
// gives identical bytes.

use std::path::Path;

use plotters::coord::Shift;
use plotters::drawing::DrawingAreaErrorKind;
use plotters::prelude::*;
use serde::Serialize;

use crate::config::PlaneConfig;
use crate::error::PlaneError;
use crate::vector_field::VectorGrid2D;

/// Arrow head length as a fraction of the arrow.
const HEAD_LENGTH: f64 = 0.3;
/// Arrow head base width as a fraction of the arrow.
const HEAD_WIDTH: f64 = 0.22;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OutputFormat {
    Png,
    Jpeg,
    Bmp,
    Svg,
}

impl OutputFormat {
    pub fn from_ext(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "bmp" => Some(Self::Bmp),
            "svg" => Some(Self::Svg),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ArrowColor(pub [u8; 3]);

impl ArrowColor {
    pub const BLUE: Self = Self([0, 0, 255]);

    /// A basic colour name or `#rrggbb`.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if let Some(hex) = s.strip_prefix('#') {
            if hex.len() != 6 || !hex.is_ascii() {
                return None;
            }
            let byte = |k: usize| u8::from_str_radix(&hex[k..k + 2], 16).ok();
            return Some(Self([byte(0)?, byte(2)?, byte(4)?]));
        }
        let rgb = match s.to_ascii_lowercase().as_str() {
            "blue" => [0, 0, 255],
            "red" => [255, 0, 0],
            "green" => [0, 128, 0],
            "black" => [0, 0, 0],
            "white" => [255, 255, 255],
            "cyan" => [0, 255, 255],
            "magenta" => [255, 0, 255],
            "yellow" => [255, 255, 0],
            "orange" => [255, 165, 0],
            "gray" | "grey" => [128, 128, 128],
            _ => return None,
        };
        Some(Self(rgb))
    }

    fn rgb(&self) -> RGBColor {
        RGBColor(self.0[0], self.0[1], self.0[2])
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuiverStyle {
    /// Image size in pixels.
    pub size: (u32, u32),
    pub scale: f64,
    pub color: ArrowColor,
    pub line_width: u32,
}

impl QuiverStyle {
    pub fn from_plane(cfg: &PlaneConfig) -> Self {
        let size = cfg.image_size();
        Self {
            size,
            scale: cfg.scale,
            color: cfg.color,
            line_width: (size.0 / 1000).max(1),
        }
    }
}

/// One arrow in data coordinates: shaft from `tail` to `tip`, head triangle `head`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Arrow {
    pub tail: (f64, f64),
    pub tip: (f64, f64),
    pub head: [(f64, f64); 3],
}

/// Arrow geometry for every defined, non-zero mesh point.
pub fn arrows(grid: &VectorGrid2D, scale: f64) -> Vec<Arrow> {
    let Some(max) = grid.max_magnitude().filter(|m| *m > 0.0) else {
        return Vec::new();
    };
    let mesh = &grid.mesh;
    let (du, dv) = mesh.spacing();
    let unit = du.min(dv) * scale / max;
    let us = mesh.u_coords();
    let vs = mesh.v_coords();

    let mut out = Vec::with_capacity(grid.n_defined());
    for (j, &v) in vs.iter().enumerate() {
        for (i, &u) in us.iter().enumerate() {
            let Some([a, b]) = grid.get(i, j) else {
                continue;
            };
            let (dx, dy) = (a * unit, b * unit);
            let len = dx.hypot(dy);
            if len == 0.0 {
                continue;
            }
            let tail = (u - 0.5 * dx, v - 0.5 * dy);
            let tip = (u + 0.5 * dx, v + 0.5 * dy);

            // Unit direction and its left normal.
            let (ex, ey) = (dx / len, dy / len);
            let (nx, ny) = (-ey, ex);
            let base = (tip.0 - ex * HEAD_LENGTH * len, tip.1 - ey * HEAD_LENGTH * len);
            let half = 0.5 * HEAD_WIDTH * len;
            let head = [
                tip,
                (base.0 + nx * half, base.1 + ny * half),
                (base.0 - nx * half, base.1 - ny * half),
            ];
            out.push(Arrow { tail, tip, head });
        }
    }
    out
}

fn draw<DB: DrawingBackend>(
    root: DrawingArea<DB, Shift>,
    grid: &VectorGrid2D,
    style: &QuiverStyle,
) -> Result<(), DrawingAreaErrorKind<DB::ErrorType>> {
    root.fill(&WHITE)?;

    let mesh = &grid.mesh;
    let mut chart = ChartBuilder::on(&root)
        .margin(0)
        .build_cartesian_2d(mesh.u_min..mesh.u_max, mesh.v_min..mesh.v_max)?;

    let color = style.color.rgb();
    let shaft = ShapeStyle::from(&color).stroke_width(style.line_width);
    let arrows = arrows(grid, style.scale);

    chart.draw_series(
        arrows
            .iter()
            .map(|a| PathElement::new(vec![a.tail, a.tip], shaft)),
    )?;
    chart.draw_series(
        arrows
            .iter()
            .map(|a| Polygon::new(a.head.to_vec(), color.filled())),
    )?;

    root.present()?;
    Ok(())
}

/// Render `grid` as a quiver plot at `path` in `format`.
pub fn render_quiver(
    grid: &VectorGrid2D,
    style: &QuiverStyle,
    format: OutputFormat,
    path: &Path,
) -> Result<(), PlaneError> {
    let fail = |reason: String| PlaneError::Render {
        path: path.to_path_buf(),
        reason,
    };
    match format {
        OutputFormat::Svg => {
            let root = SVGBackend::new(path, style.size).into_drawing_area();
            draw(root, grid, style).map_err(|e| fail(e.to_string()))
        }
        OutputFormat::Png | OutputFormat::Jpeg | OutputFormat::Bmp => {
            let root = BitMapBackend::new(path, style.size).into_drawing_area();
            draw(root, grid, style).map_err(|e| fail(e.to_string()))
        }
    }
}
