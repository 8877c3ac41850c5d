//! CSV tables.
//!
//! Header names are matched exactly (after trimming). Row numbers in error messages
//! are 1-based file lines, so the header is line 1.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::path::Path;

/// Dense named matrix: first column holds the row name, the header holds column names.
#[derive(Debug, Clone, PartialEq)]
pub struct MatrixTable {
    pub rows: Vec<String>,
    pub cols: Vec<String>,
    /// Row-major.
    pub values: Vec<f64>,
}

impl MatrixTable {
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.values[row * self.cols.len() + col]
    }
}

/// Per-channel IIR coefficients. `a[i][0]` is never zero.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterTable {
    pub channels: Vec<String>,
    pub a: Vec<Vec<f64>>,
    pub b: Vec<Vec<f64>>,
}

/// Range test for one scalar channel.
///
/// Expected headers: Channel,Min,Max and optionally
/// SleepTime,ResetTime,HoldOffTime,Despike,GlitchLog
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct TestRow {
    #[serde(rename = "Channel")]
    pub channel: String,
    #[serde(rename = "Min")]
    pub min: f64,
    #[serde(rename = "Max")]
    pub max: f64,
    #[serde(rename = "SleepTime", default)]
    pub sleep_time: Option<f64>,
    #[serde(rename = "ResetTime", default)]
    pub reset_time: Option<f64>,
    #[serde(rename = "HoldOffTime", default)]
    pub hold_off_time: Option<f64>,
    #[serde(rename = "Despike", default)]
    pub despike: Option<u8>,
    #[serde(rename = "GlitchLog", default)]
    pub glitch_log: Option<u8>,
}

impl TestRow {
    pub fn despike(&self) -> bool {
        self.despike.unwrap_or(0) != 0
    }

    pub fn glitch_log(&self) -> bool {
        self.glitch_log.unwrap_or(0) != 0
    }
}

/// Range test for one element of an array channel.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct WaveformTestRow {
    #[serde(rename = "Waveform")]
    pub waveform: String,
    #[serde(rename = "Index")]
    pub index: usize,
    #[serde(rename = "Min")]
    pub min: f64,
    #[serde(rename = "Max")]
    pub max: f64,
    #[serde(rename = "SleepTime", default)]
    pub sleep_time: Option<f64>,
    #[serde(rename = "HoldOffTime", default)]
    pub hold_off_time: Option<f64>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LimitRow {
    #[serde(rename = "Channel")]
    pub channel: String,
    #[serde(rename = "Limit")]
    pub limit: f64,
}

/// A `[min, max]` clamp window for one channel.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct WindowRow {
    #[serde(rename = "Channel")]
    pub channel: String,
    #[serde(rename = "Min")]
    pub min: f64,
    #[serde(rename = "Max")]
    pub max: f64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct DespikeRow {
    #[serde(rename = "Channel")]
    pub channel: String,
    #[serde(rename = "Despike")]
    pub despike: u8,
}

fn open(path: &Path, what: &str) -> eyre::Result<csv::Reader<std::fs::File>> {
    csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| eyre::eyre!("open {what} CSV {:?}: {}", path, e))
}

fn headers(rdr: &mut csv::Reader<std::fs::File>, path: &Path) -> eyre::Result<Vec<String>> {
    Ok(rdr
        .headers()
        .map_err(|e| eyre::eyre!("read CSV headers {:?}: {}", path, e))?
        .iter()
        .map(str::to_string)
        .collect())
}

fn read_rows<T: DeserializeOwned>(
    path: &Path,
    what: &str,
    required: &[&str],
) -> eyre::Result<Vec<T>> {
    let mut rdr = open(path, what)?;
    let actual = headers(&mut rdr, path)?;
    for h in required {
        if !actual.iter().any(|a| a == h) {
            eyre::bail!(
                "{what} CSV must have headers '{}', got: {}",
                required.join(","),
                actual.join(",")
            );
        }
    }
    let mut rows = Vec::new();
    for (idx, rec) in rdr.deserialize::<T>().enumerate() {
        match rec {
            Ok(row) => rows.push(row),
            Err(e) => eyre::bail!("invalid {what} CSV row {}: {}", idx + 2, e),
        }
    }
    Ok(rows)
}

fn parse_value(field: &str, what: &str, line: usize) -> eyre::Result<f64> {
    let v: f64 = field
        .parse()
        .map_err(|_| eyre::eyre!("{what} CSV row {line}: '{field}' is not a number"))?;
    if !v.is_finite() {
        eyre::bail!("{what} CSV row {line}: value is not finite");
    }
    Ok(v)
}

fn check_unique<'a>(names: impl IntoIterator<Item = &'a String>, what: &str) -> eyre::Result<()> {
    let mut seen = HashSet::new();
    for n in names {
        if n.is_empty() {
            eyre::bail!("{what} CSV has an empty channel name");
        }
        if !seen.insert(n.as_str()) {
            eyre::bail!("{what} CSV names channel {n} twice");
        }
    }
    Ok(())
}

/// Load a named matrix. Used for the correction matrix (actuators x readbacks),
/// the compensation matrix, and the simulated plant response.
pub fn load_matrix_csv(path: &Path) -> eyre::Result<MatrixTable> {
    let what = "matrix";
    let mut rdr = open(path, what)?;
    let head = headers(&mut rdr, path)?;
    if head.len() < 2 {
        eyre::bail!("matrix CSV needs a name column and at least one value column");
    }
    let cols: Vec<String> = head[1..].to_vec();
    check_unique(&cols, what)?;

    let mut rows = Vec::new();
    let mut values = Vec::new();
    for (idx, rec) in rdr.records().enumerate() {
        let line = idx + 2;
        let rec = rec.map_err(|e| eyre::eyre!("invalid matrix CSV row {line}: {e}"))?;
        if rec.len() != head.len() {
            eyre::bail!(
                "matrix CSV row {line} has {} fields, expected {}",
                rec.len(),
                head.len()
            );
        }
        rows.push(rec[0].to_string());
        for field in rec.iter().skip(1) {
            values.push(parse_value(field, what, line)?);
        }
    }
    if rows.is_empty() {
        eyre::bail!("matrix CSV {:?} has no rows", path);
    }
    check_unique(&rows, what)?;
    Ok(MatrixTable { rows, cols, values })
}

/// Parse an `a<k>` / `b<k>` coefficient header.
fn coeff_slot(h: &str) -> Option<(char, usize)> {
    let mut chars = h.chars();
    let c = chars.next()?.to_ascii_lowercase();
    if c != 'a' && c != 'b' {
        return None;
    }
    chars.as_str().parse().ok().map(|k| (c, k))
}

/// Load an IIR filter table with headers `Channel,a0..aN,b0..bM` in any order.
pub fn load_filter_csv(path: &Path) -> eyre::Result<FilterTable> {
    let what = "filter";
    let mut rdr = open(path, what)?;
    let head = headers(&mut rdr, path)?;
    if head.first().map(String::as_str) != Some("Channel") {
        eyre::bail!("filter CSV must start with a Channel column");
    }
    let mut slots = Vec::with_capacity(head.len() - 1);
    for h in &head[1..] {
        match coeff_slot(h) {
            Some(s) => slots.push(s),
            None => eyre::bail!("filter CSV header '{h}' is not a coefficient (a<k> or b<k>)"),
        }
    }
    let order = |c: char| -> eyre::Result<usize> {
        let mut ks: Vec<usize> = slots.iter().filter(|s| s.0 == c).map(|s| s.1).collect();
        ks.sort_unstable();
        if ks.is_empty() || ks.iter().enumerate().any(|(i, k)| i != *k) {
            eyre::bail!("filter CSV needs contiguous {c}0..{c}N coefficients");
        }
        Ok(ks.len())
    };
    let na = order('a')?;
    let nb = order('b')?;

    let mut out = FilterTable {
        channels: Vec::new(),
        a: Vec::new(),
        b: Vec::new(),
    };
    for (idx, rec) in rdr.records().enumerate() {
        let line = idx + 2;
        let rec = rec.map_err(|e| eyre::eyre!("invalid filter CSV row {line}: {e}"))?;
        if rec.len() != head.len() {
            eyre::bail!("filter CSV row {line} has {} fields, expected {}", rec.len(), head.len());
        }
        let mut a = vec![0.0; na];
        let mut b = vec![0.0; nb];
        for ((c, k), field) in slots.iter().zip(rec.iter().skip(1)) {
            let v = parse_value(field, what, line)?;
            if *c == 'a' {
                a[*k] = v;
            } else {
                b[*k] = v;
            }
        }
        if a[0] == 0.0 {
            eyre::bail!("filter CSV row {line}: a0 must be non-zero for {}", &rec[0]);
        }
        out.channels.push(rec[0].to_string());
        out.a.push(a);
        out.b.push(b);
    }
    check_unique(&out.channels, what)?;
    Ok(out)
}

pub fn load_tests_csv(path: &Path) -> eyre::Result<Vec<TestRow>> {
    let rows: Vec<TestRow> = read_rows(path, "tests", &["Channel", "Min", "Max"])?;
    for (i, r) in rows.iter().enumerate() {
        if !(r.min.is_finite() && r.max.is_finite()) || r.min > r.max {
            eyre::bail!("tests CSV row {}: need finite Min <= Max for {}", i + 2, r.channel);
        }
        for t in [r.sleep_time, r.reset_time, r.hold_off_time].into_iter().flatten() {
            if !(t.is_finite() && t >= 0.0) {
                eyre::bail!("tests CSV row {}: times must be >= 0 for {}", i + 2, r.channel);
            }
        }
    }
    Ok(rows)
}

pub fn load_waveform_tests_csv(path: &Path) -> eyre::Result<Vec<WaveformTestRow>> {
    let rows: Vec<WaveformTestRow> =
        read_rows(path, "waveform tests", &["Waveform", "Index", "Min", "Max"])?;
    for (i, r) in rows.iter().enumerate() {
        if !(r.min.is_finite() && r.max.is_finite()) || r.min > r.max {
            eyre::bail!(
                "waveform tests CSV row {}: need finite Min <= Max for {}[{}]",
                i + 2,
                r.waveform,
                r.index
            );
        }
        for t in [r.sleep_time, r.hold_off_time].into_iter().flatten() {
            if !(t.is_finite() && t >= 0.0) {
                eyre::bail!("waveform tests CSV row {}: times must be >= 0", i + 2);
            }
        }
    }
    Ok(rows)
}

pub fn load_limits_csv(path: &Path) -> eyre::Result<Vec<LimitRow>> {
    let rows: Vec<LimitRow> = read_rows(path, "delta limits", &["Channel", "Limit"])?;
    if let Some(r) = rows.iter().find(|r| !r.limit.is_finite()) {
        eyre::bail!("delta limit for {} is not finite", r.channel);
    }
    check_unique(rows.iter().map(|r| &r.channel), "delta limits")?;
    Ok(rows)
}

pub fn load_windows_csv(path: &Path) -> eyre::Result<Vec<WindowRow>> {
    let rows: Vec<WindowRow> = read_rows(path, "limits", &["Channel", "Min", "Max"])?;
    for r in &rows {
        if !(r.min.is_finite() && r.max.is_finite()) || r.min > r.max {
            eyre::bail!("limits for {} need finite Min <= Max", r.channel);
        }
    }
    check_unique(rows.iter().map(|r| &r.channel), "limits")?;
    Ok(rows)
}

pub fn load_despike_csv(path: &Path) -> eyre::Result<Vec<DespikeRow>> {
    let rows: Vec<DespikeRow> = read_rows(path, "despike", &["Channel", "Despike"])?;
    check_unique(rows.iter().map(|r| &r.channel), "despike")?;
    Ok(rows)
}
