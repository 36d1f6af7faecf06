// src/sweep.rs
//
// Declarative parameter sweeps.
//
// A sweep spec (TOML) names a template run directory, the input file inside it,
// and a list of parameter ranges. Every combination (Cartesian product in declared
// order, minus those rejected by ordering filters) becomes one task directory:
//
//   {tasks_dir}/task_{n}_{name1}_{value1}_{name2}_{value2}...    (n from 1)
//
// holding a copy of the template with the input file patched, plus one row in the
// metadata index `id,folder,<names...>`. The output is what `task::DirectoryScan`
// and `task::MetadataIndex` read back.
//
// Adjustable parameters are declared in the template input by a trailing comment:
//   0.5 0.5 1.0   ! asub1, asub2, tfilm (lattice mismatch)
// The k-th name maps to the k-th value before the `!`.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::SweepError;

/// Float ranges include `end` up to this slack.
const END_TOLERANCE: f64 = 1e-12;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SweepSpec {
    #[serde(default = "default_template_dir")]
    pub template_dir: PathBuf,
    #[serde(default = "default_input_file")]
    pub input_file: String,
    #[serde(default = "default_tasks_dir")]
    pub tasks_dir: PathBuf,
    #[serde(default = "default_metadata_index")]
    pub metadata_index: PathBuf,
    pub params: Vec<ParamRange>,
    #[serde(default)]
    pub filters: Vec<OrderFilter>,
}

fn default_template_dir() -> PathBuf {
    PathBuf::from("origin")
}
fn default_input_file() -> String {
    "inputN.in".to_string()
}
fn default_tasks_dir() -> PathBuf {
    PathBuf::from("tasks")
}
fn default_metadata_index() -> PathBuf {
    PathBuf::from("tasks.csv")
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParamRange {
    pub name: String,
    pub start: Number,
    pub end: Number,
    pub step: Number,
}

/// Keep only combinations with `lesser <= greater`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrderFilter {
    pub lesser: String,
    pub greater: String,
}

/// A TOML number as written: integer ranges stay integral.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Number::Int(i) => write!(f, "{i}"),
            // Debug keeps the decimal point: 1.0, 0.25, -0.5
            Number::Float(x) => write!(f, "{x:?}"),
        }
    }
}

impl SweepSpec {
    pub fn from_toml_str(s: &str, origin: &Path) -> Result<Self, SweepError> {
        toml::from_str(s).map_err(|source| SweepError::Parse {
            path: origin.to_path_buf(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self, SweepError> {
        let text = fs::read_to_string(path).map_err(|source| SweepError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text, path)
    }

    /// Resolve relative paths against `root` (normally the spec file's directory).
    pub fn rooted_at(mut self, root: &Path) -> Self {
        self.template_dir = root.join(&self.template_dir);
        self.tasks_dir = root.join(&self.tasks_dir);
        self.metadata_index = root.join(&self.metadata_index);
        self
    }
}

/// Template input file with the positions of its adjustable parameters.
#[derive(Debug, Clone)]
pub struct Template {
    lines: Vec<String>,
    /// name -> (line, field) of the value.
    params: BTreeMap<String, (usize, usize)>,
}

impl Template {
    pub fn parse(text: &str) -> Self {
        let lines: Vec<String> = text.lines().map(str::to_string).collect();
        let mut params = BTreeMap::new();
        for (ln, line) in lines.iter().enumerate() {
            let Some((values, comment)) = line.split_once('!') else {
                continue;
            };
            // A name list always has a comma; free-text comments do not count.
            let names = comment.split('(').next().unwrap_or("");
            if !names.contains(',') {
                continue;
            }
            let n_values = values.split_whitespace().count();
            let names = names.split(',').map(str::trim).filter(|n| !n.is_empty());
            for (pos, name) in names.enumerate() {
                if pos < n_values {
                    params.insert(name.to_string(), (ln, pos));
                }
            }
        }
        Self { lines, params }
    }

    pub fn load(path: &Path) -> Result<Self, SweepError> {
        let text = fs::read_to_string(path).map_err(|source| SweepError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::parse(&text))
    }

    /// Adjustable parameter names, sorted.
    pub fn adjustable(&self) -> impl Iterator<Item = &str> {
        self.params.keys().map(String::as_str)
    }

    pub fn has(&self, name: &str) -> bool {
        self.params.contains_key(name)
    }

    /// The template text with each named field replaced. Unknown names are ignored.
    pub fn render(&self, names: &[String], values: &[Number]) -> String {
        let mut lines = self.lines.clone();
        for (name, value) in names.iter().zip(values) {
            let Some(&(ln, pos)) = self.params.get(name) else {
                continue;
            };
            let Some((before, comment)) = lines[ln].split_once('!') else {
                continue;
            };
            let mut fields: Vec<String> = before.split_whitespace().map(str::to_string).collect();
            fields[pos] = value.to_string();
            lines[ln] = format!("{} !{}", fields.join(" "), comment);
        }
        let mut out = lines.join("\n");
        out.push('\n');
        out
    }
}

/// Upper bound on the values one range may expand to.
pub const MAX_RANGE_VALUES: usize = 100_000;

fn round12(x: f64) -> f64 {
    // + 0.0 folds -0.0 into 0.0
    (x * 1e12).round() / 1e12 + 0.0
}

/// All values of one range, in order.
pub fn expand(range: &ParamRange) -> Result<Vec<Number>, SweepError> {
    let invalid = |reason: &str| SweepError::InvalidRange {
        name: range.name.clone(),
        reason: reason.to_string(),
    };

    let values: Vec<Number> = match (range.start, range.end, range.step) {
        (Number::Int(start), Number::Int(end), Number::Int(step)) => {
            if step == 0 {
                return Err(invalid("step must be non-zero"));
            }
            let span = i128::from(end) - i128::from(start);
            let count = if span.signum() * i128::from(step.signum()) < 0 {
                0
            } else {
                span / i128::from(step) + 1
            };
            if count > MAX_RANGE_VALUES as i128 {
                return Err(invalid(&format!("more than {MAX_RANGE_VALUES} values")));
            }
            (0..count as i64).map(|i| Number::Int(start + i * step)).collect()
        }
        (start, end, step) => {
            let (start, end, step) = (start.as_f64(), end.as_f64(), step.as_f64());
            if !(start.is_finite() && end.is_finite() && step.is_finite()) {
                return Err(invalid("values must be finite"));
            }
            if step <= 0.0 {
                return Err(invalid("float step must be > 0"));
            }
            // Counted up front: a step below the float spacing at `start` never advances.
            let steps = ((end - start + END_TOLERANCE) / step).floor();
            if steps >= MAX_RANGE_VALUES as f64 {
                return Err(invalid(&format!("more than {MAX_RANGE_VALUES} values")));
            }
            let count = if steps < 0.0 { 0 } else { steps as usize + 1 };
            (0..count)
                .map(|i| Number::Float(round12(start + i as f64 * step)))
                .collect()
        }
    };
    if values.is_empty() {
        return Err(invalid("range is empty"));
    }
    Ok(values)
}

/// Scanned names and every surviving combination, in product order.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepPlan {
    pub names: Vec<String>,
    pub combos: Vec<Vec<Number>>,
}

impl SweepPlan {
    pub fn build(spec: &SweepSpec, template: &Template) -> Result<Self, SweepError> {
        let mut names: Vec<String> = Vec::with_capacity(spec.params.len());
        let mut lists = Vec::with_capacity(spec.params.len());
        for range in &spec.params {
            if range.name.is_empty() || range.name.contains(['_', ',']) {
                return Err(SweepError::BadParameterName(range.name.clone()));
            }
            if !template.has(&range.name) {
                return Err(SweepError::UnknownParameter(range.name.clone()));
            }
            if names.contains(&range.name) {
                return Err(SweepError::InvalidRange {
                    name: range.name.clone(),
                    reason: "scanned twice".to_string(),
                });
            }
            names.push(range.name.clone());
            lists.push(expand(range)?);
        }

        let position = |name: &str| {
            names
                .iter()
                .position(|n| n == name)
                .ok_or_else(|| SweepError::UnknownFilterParameter(name.to_string()))
        };
        let filters = spec
            .filters
            .iter()
            .map(|f| Ok((position(&f.lesser)?, position(&f.greater)?)))
            .collect::<Result<Vec<_>, SweepError>>()?;

        let mut combos: Vec<Vec<Number>> = vec![Vec::new()];
        for list in &lists {
            combos = combos
                .iter()
                .flat_map(|prefix| {
                    list.iter().map(move |v| {
                        let mut c = prefix.clone();
                        c.push(*v);
                        c
                    })
                })
                .collect();
        }
        let before = combos.len();
        combos.retain(|c| filters.iter().all(|&(lo, hi)| c[lo].as_f64() <= c[hi].as_f64()));
        if !filters.is_empty() {
            info!(before, after = combos.len(), "applied ordering filters");
        }

        Ok(Self { names, combos })
    }

    pub fn folder_name(&self, n: usize) -> String {
        let mut name = format!("task_{n}");
        for (p, v) in self.names.iter().zip(&self.combos[n - 1]) {
            name.push_str(&format!("_{p}_{v}"));
        }
        name
    }
}

fn write_err(path: &Path) -> impl FnOnce(std::io::Error) -> SweepError {
    let path = path.to_path_buf();
    move |source| SweepError::Write { path, source }
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<(), SweepError> {
    fs::create_dir_all(dst).map_err(write_err(dst))?;
    let read_err = |source| SweepError::Read {
        path: src.to_path_buf(),
        source,
    };
    for entry in fs::read_dir(src).map_err(read_err)? {
        let entry = entry.map_err(read_err)?;
        let path = entry.path();
        let dst_path = dst.join(entry.file_name());
        if path.is_dir() {
            copy_dir_recursive(&path, &dst_path)?;
        } else {
            fs::copy(&path, &dst_path).map_err(write_err(&dst_path))?;
        }
    }
    Ok(())
}

/// Create every task directory and the metadata index. Returns the folder names.
///
/// Existing task directories with the same name are replaced.
pub fn generate(spec: &SweepSpec) -> Result<Vec<String>, SweepError> {
    let template = Template::load(&spec.template_dir.join(&spec.input_file))?;
    let plan = SweepPlan::build(spec, &template)?;
    info!(
        tasks = plan.combos.len(),
        params = ?plan.names,
        "generating sweep"
    );

    fs::create_dir_all(&spec.tasks_dir).map_err(write_err(&spec.tasks_dir))?;
    if let Some(parent) = spec.metadata_index.parent() {
        fs::create_dir_all(parent).map_err(write_err(parent))?;
    }
    let index = &spec.metadata_index;
    let csv_err = |e: csv::Error| write_err(index)(e.into());
    let mut w = csv::Writer::from_path(index).map_err(csv_err)?;

    let mut header = vec!["id".to_string(), "folder".to_string()];
    header.extend(plan.names.iter().cloned());
    w.write_record(&header).map_err(csv_err)?;

    let mut folders = Vec::with_capacity(plan.combos.len());
    for (n, combo) in plan.combos.iter().enumerate().map(|(i, c)| (i + 1, c)) {
        let name = plan.folder_name(n);
        let folder = spec.tasks_dir.join(&name);
        if folder.exists() {
            fs::remove_dir_all(&folder).map_err(write_err(&folder))?;
        }
        copy_dir_recursive(&spec.template_dir, &folder)?;

        let input = folder.join(&spec.input_file);
        fs::write(&input, template.render(&plan.names, combo)).map_err(write_err(&input))?;

        let mut row = vec![n.to_string(), name.clone()];
        row.extend(combo.iter().map(Number::to_string));
        w.write_record(&row).map_err(csv_err)?;
        debug!(task = n, folder = %name, "task prepared");
        folders.push(name);
    }
    w.flush().map_err(write_err(index))?;
    Ok(folders)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const INPUT: &str = "\
&control
100 100 100      ! nx, ny, nz (cells)
0.5 0.5 2.0   ! asub1, asub2, tfilm (misfit)
1.0e-3           ! timestep
";

    fn range(name: &str, start: Number, end: Number, step: Number) -> ParamRange {
        ParamRange {
            name: name.to_string(),
            start,
            end,
            step,
        }
    }

    fn floats(v: &[Number]) -> Vec<f64> {
        v.iter().map(|n| n.as_f64()).collect()
    }

    #[test]
    fn template_finds_named_fields() {
        let t = Template::parse(INPUT);
        let names: Vec<&str> = t.adjustable().collect();
        assert_eq!(names, vec!["asub1", "asub2", "nx", "ny", "nz", "tfilm"]);
        assert!(!t.has("timestep"));
    }

    #[test]
    fn render_patches_only_scanned_fields() {
        let t = Template::parse(INPUT);
        let out = t.render(
            &["asub2".to_string(), "nz".to_string()],
            &[Number::Float(-0.25), Number::Int(64)],
        );
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "&control");
        assert_eq!(lines[1], "100 100 64 ! nx, ny, nz (cells)");
        assert_eq!(lines[2], "0.5 -0.25 2.0 ! asub1, asub2, tfilm (misfit)");
        assert_eq!(lines[3], "1.0e-3           ! timestep");
    }

    #[test]
    fn integer_ranges_are_inclusive_with_signed_step() {
        let up = expand(&range("n", Number::Int(1), Number::Int(7), Number::Int(3))).unwrap();
        assert_eq!(up, vec![Number::Int(1), Number::Int(4), Number::Int(7)]);
        let down = expand(&range("n", Number::Int(3), Number::Int(1), Number::Int(-1))).unwrap();
        assert_eq!(down, vec![Number::Int(3), Number::Int(2), Number::Int(1)]);
        assert!(expand(&range("n", Number::Int(1), Number::Int(3), Number::Int(0))).is_err());
        assert!(expand(&range("n", Number::Int(3), Number::Int(1), Number::Int(1))).is_err());
    }

    #[test]
    fn float_ranges_step_from_start_and_round() {
        let v = expand(&range(
            "a",
            Number::Float(-0.5),
            Number::Float(0.5),
            Number::Float(0.1),
        ))
        .unwrap();
        assert_eq!(v.len(), 11);
        assert_eq!(v[3], Number::Float(-0.2));
        assert_eq!(v[5], Number::Float(0.0));
        assert_eq!(v[10], Number::Float(0.5));

        // One float makes the whole range float.
        let mixed = expand(&range("a", Number::Int(0), Number::Int(1), Number::Float(0.5))).unwrap();
        assert_eq!(floats(&mixed), vec![0.0, 0.5, 1.0]);

        assert!(expand(&range("a", Number::Float(0.0), Number::Float(1.0), Number::Float(0.0))).is_err());
        assert!(expand(&range("a", Number::Float(0.0), Number::Float(1.0), Number::Float(-0.1))).is_err());
    }

    #[test]
    fn oversized_ranges_are_rejected() {
        // 1e17 + 1.0 == 1e17, so stepping value by value would never finish.
        let tiny_step = range("a", Number::Float(1e17), Number::Float(2e17), Number::Float(1.0));
        assert!(matches!(expand(&tiny_step), Err(SweepError::InvalidRange { .. })));

        let wide = range("n", Number::Int(0), Number::Int(i64::MAX), Number::Int(1));
        assert!(matches!(expand(&wide), Err(SweepError::InvalidRange { .. })));

        let at_cap = MAX_RANGE_VALUES as i64 - 1;
        let ok = expand(&range("n", Number::Int(0), Number::Int(at_cap), Number::Int(1))).unwrap();
        assert_eq!(ok.len(), MAX_RANGE_VALUES);
    }

    #[test]
    fn plan_applies_ordering_filter() {
        let spec = SweepSpec::from_toml_str(
            r#"
            [[params]]
            name = "asub1"
            start = -0.5
            end = 0.5
            step = 0.5

            [[params]]
            name = "asub2"
            start = -0.5
            end = 0.5
            step = 0.5

            [[filters]]
            lesser = "asub1"
            greater = "asub2"
            "#,
            Path::new("sweep.toml"),
        )
        .unwrap();
        let plan = SweepPlan::build(&spec, &Template::parse(INPUT)).unwrap();
        assert_eq!(plan.combos.len(), 6);
        assert!(plan.combos.iter().all(|c| c[0].as_f64() <= c[1].as_f64()));
        assert_eq!(plan.folder_name(1), "task_1_asub1_-0.5_asub2_-0.5");
        assert_eq!(plan.folder_name(6), "task_6_asub1_0.5_asub2_0.5");
    }

    #[test]
    fn plan_rejects_unknown_names() {
        let template = Template::parse(INPUT);
        let spec = |params: &str, filters: &str| {
            SweepSpec::from_toml_str(&format!("{params}\n{filters}"), Path::new("s.toml")).unwrap()
        };
        let one = "[[params]]\nname = \"asub1\"\nstart = 0\nend = 1\nstep = 1\n";

        let bogus = spec("[[params]]\nname = \"bogus\"\nstart = 0\nend = 1\nstep = 1\n", "");
        assert!(matches!(
            SweepPlan::build(&bogus, &template),
            Err(SweepError::UnknownParameter(_))
        ));

        let bad_filter = spec(one, "[[filters]]\nlesser = \"asub1\"\ngreater = \"asub2\"\n");
        assert!(matches!(
            SweepPlan::build(&bad_filter, &template),
            Err(SweepError::UnknownFilterParameter(n)) if n == "asub2"
        ));
    }

    #[test]
    fn generate_writes_tasks_and_index() {
        let dir = tempfile::tempdir().unwrap();
        let origin = dir.path().join("origin");
        fs::create_dir_all(origin.join("scripts")).unwrap();
        fs::write(origin.join("inputN.in"), INPUT).unwrap();
        fs::write(origin.join("scripts/run.sh"), "#!/bin/sh\n").unwrap();

        let spec = SweepSpec::from_toml_str(
            r#"
            [[params]]
            name = "tfilm"
            start = 1
            end = 2
            step = 1
            "#,
            Path::new("sweep.toml"),
        )
        .unwrap()
        .rooted_at(dir.path());

        let folders = generate(&spec).unwrap();
        assert_eq!(folders, vec!["task_1_tfilm_1", "task_2_tfilm_2"]);

        let index = fs::read_to_string(dir.path().join("tasks.csv")).unwrap();
        assert_eq!(index, "id,folder,tfilm\n1,task_1_tfilm_1,1\n2,task_2_tfilm_2,2\n");

        let task2 = dir.path().join("tasks/task_2_tfilm_2");
        assert!(task2.join("scripts/run.sh").is_file());
        let input = fs::read_to_string(task2.join("inputN.in")).unwrap();
        assert!(input.contains("0.5 0.5 2 ! asub1, asub2, tfilm (misfit)"));
    }
}
