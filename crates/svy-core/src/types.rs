//! Common data types for svyts

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal, StudentsT};

use crate::{Error, Result};

/// Column-oriented table of named numeric columns.
///
/// All columns share the same length; column iteration order is the
/// lexicographic order of names so that anything derived from a frame is
/// reproducible run to run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    n_rows: usize,
    columns: BTreeMap<String, Vec<f64>>,
}

impl Frame {
    /// Create an empty frame. The first inserted column fixes the row count.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a frame from `(name, values)` pairs.
    pub fn from_columns<I, S>(columns: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, Vec<f64>)>,
        S: Into<String>,
    {
        let mut frame = Self::new();
        for (name, values) in columns {
            frame.insert(name, values)?;
        }
        Ok(frame)
    }

    /// Insert (or replace) a column.
    pub fn insert(&mut self, name: impl Into<String>, values: Vec<f64>) -> Result<()> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::Validation("column name must be non-empty".into()));
        }
        let replacing_only_column = self.columns.len() == 1 && self.columns.contains_key(&name);
        if !self.columns.is_empty() && !replacing_only_column && values.len() != self.n_rows {
            return Err(Error::Validation(format!(
                "column '{}' has {} rows, frame has {}",
                name,
                values.len(),
                self.n_rows
            )));
        }
        self.n_rows = values.len();
        self.columns.insert(name, values);
        Ok(())
    }

    /// Derive a new column from existing ones, row by row.
    ///
    /// `f` receives the values of `inputs` for one row, in the given order.
    pub fn derive<F>(&mut self, name: &str, inputs: &[&str], mut f: F) -> Result<()>
    where
        F: FnMut(&[f64]) -> f64,
    {
        let cols: Vec<&[f64]> = inputs.iter().map(|c| self.column(c)).collect::<Result<_>>()?;
        let mut buf = vec![0.0; inputs.len()];
        let mut out = Vec::with_capacity(self.n_rows);
        for i in 0..self.n_rows {
            for (slot, col) in buf.iter_mut().zip(&cols) {
                *slot = col[i];
            }
            out.push(f(&buf));
        }
        self.insert(name, out)
    }

    /// Borrow a column, failing if it does not exist.
    pub fn column(&self, name: &str) -> Result<&[f64]> {
        self.get(name).ok_or_else(|| Error::MissingField {
            table: "frame".into(),
            field: name.to_string(),
        })
    }

    /// Borrow a column if present.
    pub fn get(&self, name: &str) -> Option<&[f64]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    /// Whether a column exists.
    pub fn contains(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// Single cell lookup.
    pub fn value(&self, name: &str, row: usize) -> Option<f64> {
        self.columns.get(name).and_then(|c| c.get(row)).copied()
    }

    /// Number of rows.
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    /// Number of columns.
    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    /// Column names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// New frame holding the given rows (in the given order).
    pub fn take_rows(&self, rows: &[usize]) -> Result<Frame> {
        if let Some(&bad) = rows.iter().find(|&&r| r >= self.n_rows) {
            return Err(Error::Validation(format!(
                "row index {} out of range (n_rows={})",
                bad, self.n_rows
            )));
        }
        let columns = self
            .columns
            .iter()
            .map(|(name, col)| (name.clone(), rows.iter().map(|&r| col[r]).collect()))
            .collect();
        Ok(Frame { n_rows: rows.len(), columns })
    }

    /// New frame keeping rows where `keep(row)` is true.
    pub fn filter_rows<F>(&self, mut keep: F) -> Frame
    where
        F: FnMut(usize) -> bool,
    {
        let rows: Vec<usize> = (0..self.n_rows).filter(|&i| keep(i)).collect();
        let columns = self
            .columns
            .iter()
            .map(|(name, col)| (name.clone(), rows.iter().map(|&r| col[r]).collect()))
            .collect();
        Frame { n_rows: rows.len(), columns }
    }
}

/// Point estimate with design-based standard error and confidence interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Estimate {
    /// Term or statistic name.
    pub term: String,
    /// Point estimate.
    pub estimate: f64,
    /// Standard error.
    pub std_error: f64,
    /// `estimate / std_error`.
    pub t_stat: f64,
    /// Two-sided p-value.
    pub p_value: f64,
    /// Lower confidence bound.
    pub ci_lower: f64,
    /// Upper confidence bound.
    pub ci_upper: f64,
    /// Confidence level used for the bounds (e.g. 0.95).
    pub level: f64,
    /// Degrees of freedom of the reference distribution (`None` = normal).
    pub df: Option<f64>,
}

impl Estimate {
    /// Build an estimate from a point value and standard error.
    ///
    /// Uses Student-t with `df` degrees of freedom when `df` is finite and
    /// positive, the standard normal otherwise.
    pub fn from_se(
        term: impl Into<String>,
        estimate: f64,
        std_error: f64,
        df: Option<f64>,
        level: f64,
    ) -> Result<Self> {
        if !(level > 0.0 && level < 1.0) {
            return Err(Error::Validation(format!("confidence level must be in (0,1), got {level}")));
        }
        let df = df.filter(|d| d.is_finite() && *d > 0.0);
        let ref_dist = RefDist::new(df)?;
        let q = ref_dist.inverse_cdf(0.5 + level / 2.0);
        let t_stat = if std_error > 0.0 { estimate / std_error } else { f64::NAN };
        let p_value =
            if t_stat.is_finite() { 2.0 * (1.0 - ref_dist.cdf(t_stat.abs())) } else { f64::NAN };
        Ok(Self {
            term: term.into(),
            estimate,
            std_error,
            t_stat,
            p_value,
            ci_lower: estimate - q * std_error,
            ci_upper: estimate + q * std_error,
            level,
            df,
        })
    }
}

enum RefDist {
    T(StudentsT),
    Z(Normal),
}

impl RefDist {
    fn new(df: Option<f64>) -> Result<Self> {
        match df {
            Some(d) => StudentsT::new(0.0, 1.0, d)
                .map(RefDist::T)
                .map_err(|e| Error::Computation(format!("Student-t({d}): {e}"))),
            None => Normal::new(0.0, 1.0)
                .map(RefDist::Z)
                .map_err(|e| Error::Computation(format!("Normal(0,1): {e}"))),
        }
    }

    fn cdf(&self, x: f64) -> f64 {
        match self {
            RefDist::T(d) => d.cdf(x),
            RefDist::Z(d) => d.cdf(x),
        }
    }

    fn inverse_cdf(&self, p: f64) -> f64 {
        match self {
            RefDist::T(d) => d.inverse_cdf(p),
            RefDist::Z(d) => d.inverse_cdf(p),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_frame_length_mismatch_rejected() {
        let mut f = Frame::new();
        f.insert("a", vec![1.0, 2.0, 3.0]).unwrap();
        assert!(f.insert("b", vec![1.0]).is_err());
        assert_eq!(f.n_rows(), 3);
    }

    #[test]
    fn test_frame_derive_and_take_rows() {
        let mut f = Frame::from_columns([("x", vec![1.0, 2.0, 3.0]), ("y", vec![10.0, 20.0, 30.0])])
            .unwrap();
        f.derive("xy", &["x", "y"], |v| v[0] * v[1]).unwrap();
        assert_eq!(f.column("xy").unwrap(), &[10.0, 40.0, 90.0]);

        let g = f.take_rows(&[2, 0]).unwrap();
        assert_eq!(g.n_rows(), 2);
        assert_eq!(g.column("x").unwrap(), &[3.0, 1.0]);
        assert!(f.take_rows(&[5]).is_err());

        let h = f.filter_rows(|i| f.value("x", i).unwrap() >= 2.0);
        assert_eq!(h.column("y").unwrap(), &[20.0, 30.0]);
    }

    #[test]
    fn test_frame_missing_column() {
        let f = Frame::from_columns([("x", vec![1.0])]).unwrap();
        assert!(matches!(f.column("nope"), Err(Error::MissingField { .. })));
    }

    #[test]
    fn test_estimate_normal_interval() {
        let e = Estimate::from_se("b", 10.0, 2.0, None, 0.95).unwrap();
        assert_relative_eq!(e.ci_lower, 10.0 - 1.959964 * 2.0, epsilon = 1e-4);
        assert_relative_eq!(e.ci_upper, 10.0 + 1.959964 * 2.0, epsilon = 1e-4);
        assert_relative_eq!(e.t_stat, 5.0);
        assert!(e.p_value < 1e-5);
    }

    #[test]
    fn test_estimate_t_interval_wider_than_normal() {
        let z = Estimate::from_se("b", 0.0, 1.0, None, 0.95).unwrap();
        let t = Estimate::from_se("b", 0.0, 1.0, Some(5.0), 0.95).unwrap();
        // t_{0.975, 5} = 2.5706
        assert_relative_eq!(t.ci_upper, 2.570582, epsilon = 1e-4);
        assert!(t.ci_upper > z.ci_upper);
    }

    #[test]
    fn test_estimate_rejects_bad_level() {
        assert!(Estimate::from_se("b", 0.0, 1.0, None, 1.0).is_err());
        assert!(Estimate::from_se("b", 0.0, 1.0, None, 0.0).is_err());
    }
}
