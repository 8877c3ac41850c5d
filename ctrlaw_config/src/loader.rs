//! Loading a config file together with the tables it references.

use crate::tables::{
    self, DespikeRow, FilterTable, LimitRow, MatrixTable, TestRow, WaveformTestRow, WindowRow,
};
use crate::{Config, load_toml};
use eyre::WrapErr;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Every table named by a `Config`, parsed.
#[derive(Debug, Clone)]
pub struct Tables {
    pub matrix: MatrixTable,
    pub filter: Option<FilterTable>,
    pub tests: Vec<TestRow>,
    pub waveform_tests: Vec<WaveformTestRow>,
    pub delta_limits: Vec<LimitRow>,
    pub readback_limits: Vec<WindowRow>,
    pub control_limits: Vec<WindowRow>,
    pub despike: Vec<DespikeRow>,
    pub compensation_matrix: Option<MatrixTable>,
    pub compensation_filter: Option<FilterTable>,
    pub plant_response: Option<MatrixTable>,
}

#[derive(Debug, Clone)]
pub struct Loaded {
    pub config: Config,
    pub tables: Tables,
    /// Directory table paths were resolved against.
    pub base_dir: PathBuf,
}

/// Resolve `p` against `base` unless it is already absolute.
pub fn resolve(base: &Path, p: &str) -> PathBuf {
    let p = Path::new(p);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base.join(p)
    }
}

/// Read, parse and validate a config file and every table it references.
pub fn load_config(path: &Path) -> eyre::Result<Loaded> {
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("reading config file {}", path.display()))?;
    let config = load_toml(&text).wrap_err("parsing TOML config")?;
    config.validate().wrap_err("invalid configuration")?;
    let base_dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let tables = load_tables(&config, &base_dir)?;
    Ok(Loaded {
        config,
        tables,
        base_dir,
    })
}

fn optional<T>(
    base: &Path,
    p: Option<&String>,
    load: impl Fn(&Path) -> eyre::Result<T>,
) -> eyre::Result<Option<T>> {
    match p {
        Some(p) => {
            let full = resolve(base, p);
            load(&full)
                .wrap_err_with(|| format!("loading {}", full.display()))
                .map(Some)
        }
        None => Ok(None),
    }
}

/// Load the tables named by `config` and check their channel names against each other.
pub fn load_tables(config: &Config, base: &Path) -> eyre::Result<Tables> {
    let t = &config.tables;
    let matrix_path = resolve(base, &t.matrix);
    let matrix = tables::load_matrix_csv(&matrix_path)
        .wrap_err_with(|| format!("loading {}", matrix_path.display()))?;
    let comp = config.compensation.as_ref();

    let loaded = Tables {
        matrix,
        filter: optional(base, t.filter.as_ref(), tables::load_filter_csv)?,
        tests: optional(base, t.tests.as_ref(), tables::load_tests_csv)?.unwrap_or_default(),
        waveform_tests: optional(
            base,
            t.waveform_tests.as_ref(),
            tables::load_waveform_tests_csv,
        )?
        .unwrap_or_default(),
        delta_limits: optional(base, t.delta_limits.as_ref(), tables::load_limits_csv)?
            .unwrap_or_default(),
        readback_limits: optional(base, t.readback_limits.as_ref(), tables::load_windows_csv)?
            .unwrap_or_default(),
        control_limits: optional(base, t.control_limits.as_ref(), tables::load_windows_csv)?
            .unwrap_or_default(),
        despike: optional(base, t.despike.as_ref(), tables::load_despike_csv)?
            .unwrap_or_default(),
        compensation_matrix: optional(base, comp.map(|c| &c.matrix), tables::load_matrix_csv)?,
        compensation_filter: optional(
            base,
            comp.and_then(|c| c.filter.as_ref()),
            tables::load_filter_csv,
        )?,
        plant_response: optional(
            base,
            config.plant.response.as_ref(),
            tables::load_matrix_csv,
        )?,
    };
    loaded.cross_validate()?;
    Ok(loaded)
}

fn names(v: &[String]) -> HashSet<&str> {
    v.iter().map(String::as_str).collect()
}

fn subset<'a>(
    what: &str,
    items: impl IntoIterator<Item = &'a String>,
    known: &HashSet<&str>,
    kind: &str,
) -> eyre::Result<()> {
    for n in items {
        if !known.contains(n.as_str()) {
            eyre::bail!("{what} names unknown {kind} {n}");
        }
    }
    Ok(())
}

fn same_set(what: &str, got: &[String], want: &[String], kind: &str) -> eyre::Result<()> {
    let g = names(got);
    let w = names(want);
    if let Some(missing) = want.iter().find(|n| !g.contains(n.as_str())) {
        eyre::bail!("{what} is missing {kind} {missing}");
    }
    subset(what, got, &w, kind)
}

impl Tables {
    pub fn actuators(&self) -> &[String] {
        &self.matrix.rows
    }

    pub fn readbacks(&self) -> &[String] {
        &self.matrix.cols
    }

    fn cross_validate(&self) -> eyre::Result<()> {
        let actuators = names(self.actuators());
        let readbacks = names(self.readbacks());

        if let Some(f) = &self.filter {
            same_set("filter table", &f.channels, self.actuators(), "actuator")?;
        }
        subset(
            "delta limit table",
            self.delta_limits.iter().map(|r| &r.channel),
            &actuators,
            "actuator",
        )?;
        subset(
            "control limit table",
            self.control_limits.iter().map(|r| &r.channel),
            &actuators,
            "actuator",
        )?;
        subset(
            "readback limit table",
            self.readback_limits.iter().map(|r| &r.channel),
            &readbacks,
            "readback",
        )?;
        subset(
            "despike table",
            self.despike.iter().map(|r| &r.channel),
            &readbacks,
            "readback",
        )?;

        if let Some(cm) = &self.compensation_matrix {
            same_set("compensation matrix", &cm.cols, self.actuators(), "primary actuator")?;
            let overlap: Vec<&str> = cm
                .rows
                .iter()
                .map(String::as_str)
                .filter(|n| actuators.contains(n))
                .collect();
            if !overlap.is_empty() {
                eyre::bail!(
                    "compensation actuators overlap primary actuators: {}",
                    overlap.join(", ")
                );
            }
            if let Some(f) = &self.compensation_filter {
                same_set("compensation filter table", &f.channels, &cm.rows, "actuator")?;
            }
        }

        if let Some(pr) = &self.plant_response {
            same_set("plant response", &pr.rows, self.readbacks(), "readback")?;
            let mut all = actuators.clone();
            if let Some(cm) = &self.compensation_matrix {
                all.extend(cm.rows.iter().map(String::as_str));
            }
            subset("plant response", &pr.cols, &all, "actuator")?;
        }
        Ok(())
    }
}
