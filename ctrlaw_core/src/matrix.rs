use crate::error::BuildError;

/// Dense gain matrix: rows are actuators, columns are the error inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrectionMatrix {
    rows: Vec<String>,
    cols: Vec<String>,
    data: Vec<f64>,
}

impl CorrectionMatrix {
    /// `data` is row-major and must hold `rows.len() * cols.len()` finite values.
    pub fn new(rows: Vec<String>, cols: Vec<String>, data: Vec<f64>) -> Result<Self, BuildError> {
        if rows.is_empty() || cols.is_empty() {
            return Err(BuildError::Shape("matrix needs at least one row and column".into()));
        }
        if data.len() != rows.len() * cols.len() {
            return Err(BuildError::Shape(format!(
                "matrix has {} entries, expected {}x{}",
                data.len(),
                rows.len(),
                cols.len()
            )));
        }
        if data.iter().any(|v| !v.is_finite()) {
            return Err(BuildError::InvalidConfig("matrix entries must be finite"));
        }
        Ok(Self { rows, cols, data })
    }

    pub fn rows(&self) -> &[String] {
        &self.rows
    }

    pub fn cols(&self) -> &[String] {
        &self.cols
    }

    #[inline]
    pub fn get(&self, r: usize, c: usize) -> f64 {
        self.data[r * self.cols.len() + c]
    }

    /// `out[i] = Σ_j K[i][j] · x[j]`
    pub fn apply(&self, x: &[f64], out: &mut [f64]) {
        let n = self.cols.len();
        for (i, o) in out.iter_mut().enumerate().take(self.rows.len()) {
            let row = &self.data[i * n..(i + 1) * n];
            *o = row.iter().zip(x).map(|(k, e)| k * e).sum();
        }
    }

    /// Same matrix with rows and columns permuted into the given name order.
    ///
    /// Fails unless the name sets match exactly.
    pub fn aligned_to(&self, rows: &[String], cols: &[String]) -> Result<Self, BuildError> {
        let row_idx = permutation(&self.rows, rows, "row")?;
        let col_idx = permutation(&self.cols, cols, "column")?;
        let mut data = Vec::with_capacity(rows.len() * cols.len());
        for &r in &row_idx {
            for &c in &col_idx {
                data.push(self.get(r, c));
            }
        }
        Ok(Self {
            rows: rows.to_vec(),
            cols: cols.to_vec(),
            data,
        })
    }
}

fn permutation(have: &[String], want: &[String], what: &str) -> Result<Vec<usize>, BuildError> {
    if have.len() != want.len() {
        return Err(BuildError::Shape(format!(
            "matrix has {} {what}s, expected {}",
            have.len(),
            want.len()
        )));
    }
    want.iter()
        .map(|w| {
            have.iter()
                .position(|h| h == w)
                .ok_or_else(|| BuildError::Shape(format!("matrix has no {what} named {w}")))
        })
        .collect()
}
