// src/config.rs
//
// Batch configuration.
//
// Two layers:
//  - `ConfigFile` is what the TOML file says (every field optional).
//  - `BatchConfig` is the validated, immutable result passed through the pipeline.
//    It is serialised to `<summary_dir>/config.json` for provenance.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::chunk::ChunkPattern;
use crate::error::ConfigError;
use crate::grid::Mesh2D;
use crate::interp::InterpolationMethod;
use crate::render::{ArrowColor, OutputFormat};
use crate::slice::Plane;

/// Images beyond this many pixels on either side are refused at startup.
pub const MAX_IMAGE_SIDE_PX: u32 = 20_000;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub base_dir: PathBuf,
    pub summary_dir: PathBuf,
    pub metadata_index: Option<PathBuf>,
    pub time_step: u64,
    pub num_chunks: u64,
    pub chunk_pattern: String,
    pub output_ext: String,
    pub workers: usize,
    pub write_full_field: bool,
    pub write_slice_data: bool,
    pub planes: PlanesFile,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("tasks"),
            summary_dir: PathBuf::from("summary"),
            metadata_index: None,
            time_step: 500,
            num_chunks: 20,
            chunk_pattern: "PELOOP.%08d.dat".to_string(),
            output_ext: "jpg".to_string(),
            workers: 1,
            write_full_field: false,
            write_slice_data: false,
            planes: PlanesFile::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlanesFile {
    pub xy: PlaneOverrides,
    pub xz: PlaneOverrides,
    pub yz: PlaneOverrides,
}

/// Per-plane settings as written in the file; unset fields keep the plane default.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlaneOverrides {
    pub index: Option<usize>,
    pub grid: Option<[usize; 2]>,
    pub dpi: Option<f64>,
    pub width_in: Option<f64>,
    pub u_range: Option<[f64; 2]>,
    pub v_range: Option<[f64; 2]>,
    pub scale: Option<f64>,
    pub color: Option<String>,
    pub method: Option<InterpolationMethod>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchConfig {
    pub base_dir: PathBuf,
    pub summary_dir: PathBuf,
    pub metadata_index: Option<PathBuf>,
    pub time_step: u64,
    pub num_chunks: u64,
    pub chunk_pattern: ChunkPattern,
    pub output_ext: String,
    pub output_format: OutputFormat,
    pub workers: usize,
    pub write_full_field: bool,
    pub write_slice_data: bool,
    /// Indexed by `Plane::ordinal()`.
    pub planes: [PlaneConfig; 3],
}

#[derive(Debug, Clone, Serialize)]
pub struct PlaneConfig {
    pub plane: Plane,
    /// 0-based fixed index along the normal axis; None = mid-plane.
    pub index: Option<usize>,
    pub grid: [usize; 2],
    pub dpi: f64,
    /// Figure width in inches; pixel width is `width_in * dpi`.
    pub width_in: f64,
    pub u_range: [f64; 2],
    pub v_range: [f64; 2],
    /// Multiplies every arrow length.
    pub scale: f64,
    pub color: ArrowColor,
    pub method: InterpolationMethod,
}

impl PlaneConfig {
    /// 50×50 over 1..100 for XY,
    /// 50×70 over 1..100 × 25..165 with a 0.757 arrow scale for XZ and YZ.
    pub fn default_for(plane: Plane) -> Self {
        let (grid, v_range, scale) = match plane {
            Plane::XY => ([50, 50], [1.0, 100.0], 1.0),
            Plane::XZ | Plane::YZ => ([50, 70], [25.0, 165.0], 0.757),
        };
        Self {
            plane,
            index: None,
            grid,
            dpi: 500.0,
            width_in: 6.4,
            u_range: [1.0, 100.0],
            v_range,
            scale,
            color: ArrowColor::BLUE,
            method: InterpolationMethod::default(),
        }
    }

    pub fn mesh(&self) -> Mesh2D {
        Mesh2D::new(self.grid[0], self.grid[1], self.u_range, self.v_range)
    }

    /// Output image size in pixels (equal aspect, no padding).
    pub fn image_size(&self) -> (u32, u32) {
        let w = (self.width_in * self.dpi).round().max(1.0);
        let span_u = self.u_range[1] - self.u_range[0];
        let span_v = self.v_range[1] - self.v_range[0];
        let h = (w * span_v / span_u).round().max(1.0);
        (w as u32, h as u32)
    }

    fn apply(mut self, o: PlaneOverrides) -> Result<Self, ConfigError> {
        let plane = self.plane;
        let field = move |name: &str| format!("planes.{}.{}", plane.as_str().to_lowercase(), name);

        if let Some(index) = o.index {
            self.index = Some(index);
        }
        if let Some(grid) = o.grid {
            self.grid = grid;
        }
        if let Some(dpi) = o.dpi {
            self.dpi = dpi;
        }
        if let Some(width_in) = o.width_in {
            self.width_in = width_in;
        }
        if let Some(r) = o.u_range {
            self.u_range = r;
        }
        if let Some(r) = o.v_range {
            self.v_range = r;
        }
        if let Some(scale) = o.scale {
            self.scale = scale;
        }
        if let Some(name) = o.color {
            self.color = ArrowColor::parse(&name).ok_or_else(|| {
                ConfigError::invalid(field("color"), format!("unknown colour {name:?}"))
            })?;
        }
        if let Some(method) = o.method {
            self.method = method;
        }

        if self.grid[0] == 0 || self.grid[1] == 0 {
            return Err(ConfigError::invalid(field("grid"), "dimensions must be >= 1"));
        }
        for (name, r) in [("u_range", self.u_range), ("v_range", self.v_range)] {
            if !(r[0].is_finite() && r[1].is_finite() && r[0] < r[1]) {
                return Err(ConfigError::invalid(
                    field(name),
                    format!("need finite min < max, got {r:?}"),
                ));
            }
        }
        if !(self.dpi.is_finite() && self.dpi > 0.0) {
            return Err(ConfigError::invalid(field("dpi"), "must be > 0"));
        }
        if !(self.width_in.is_finite() && self.width_in > 0.0) {
            return Err(ConfigError::invalid(field("width_in"), "must be > 0"));
        }
        if !self.scale.is_finite() || self.scale == 0.0 {
            return Err(ConfigError::invalid(field("scale"), "must be finite and non-zero"));
        }
        if let InterpolationMethod::InverseDistance { power } = self.method {
            if !(power.is_finite() && power > 0.0) {
                return Err(ConfigError::invalid(field("method.power"), "must be > 0"));
            }
        }
        let (w, h) = self.image_size();
        if w > MAX_IMAGE_SIDE_PX || h > MAX_IMAGE_SIDE_PX {
            return Err(ConfigError::invalid(
                field("dpi"),
                format!("image would be {w}x{h} px (limit {MAX_IMAGE_SIDE_PX})"),
            ));
        }
        Ok(self)
    }
}

impl ConfigFile {
    pub fn validate(self) -> Result<BatchConfig, ConfigError> {
        if self.num_chunks == 0 {
            return Err(ConfigError::invalid("num_chunks", "must be >= 1"));
        }
        if self.workers == 0 {
            return Err(ConfigError::invalid("workers", "must be >= 1"));
        }
        let chunk_pattern = ChunkPattern::parse(&self.chunk_pattern)?;
        let output_format = OutputFormat::from_ext(&self.output_ext).ok_or_else(|| {
            ConfigError::invalid(
                "output_ext",
                format!("unsupported image extension {:?}", self.output_ext),
            )
        })?;

        let PlanesFile { xy, xz, yz } = self.planes;
        let planes = [
            PlaneConfig::default_for(Plane::XY).apply(xy)?,
            PlaneConfig::default_for(Plane::XZ).apply(xz)?,
            PlaneConfig::default_for(Plane::YZ).apply(yz)?,
        ];

        Ok(BatchConfig {
            base_dir: self.base_dir,
            summary_dir: self.summary_dir,
            metadata_index: self.metadata_index,
            time_step: self.time_step,
            num_chunks: self.num_chunks,
            chunk_pattern,
            output_ext: self.output_ext,
            output_format,
            workers: self.workers,
            write_full_field: self.write_full_field,
            write_slice_data: self.write_slice_data,
            planes,
        })
    }
}

impl BatchConfig {
    pub fn from_toml_str(s: &str, origin: &Path) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(s).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        file.validate()
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text, path)
    }

    pub fn plane(&self, plane: Plane) -> &PlaneConfig {
        &self.planes[plane.ordinal()]
    }

    /// Write the effective configuration as `config.json` into `out_dir`.
    pub fn write_to_dir(&self, out_dir: &Path) -> std::io::Result<()> {
        fs::create_dir_all(out_dir)?;
        let path = out_dir.join("config.json");
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }
}
