//! Stratified cluster design and Taylor-linearised variance.
//!
//! PSUs are nested within strata: the same PSU code in two strata denotes two
//! different PSUs, as in the MEPS variance structure. For a matrix of
//! per-observation scores `z_i` (already multiplied by the weight), the
//! with-replacement variance estimator is
//!
//! ```text
//! V = Σ_h n_h/(n_h-1) Σ_j (z_hj - z̄_h)(z_hj - z̄_h)'
//! ```
//!
//! where `z_hj` is the PSU total of the scores and `z̄_h` their stratum mean.

use std::collections::BTreeMap;

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use svy_core::{Error, Frame, Result};

/// Names of the design columns in the frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesignSpec {
    /// Sampling weight column.
    pub weights: String,
    /// Stratum column; `None` means a single stratum.
    pub strata: Option<String>,
    /// PSU column; `None` makes every row its own PSU.
    pub clusters: Option<String>,
}

impl DesignSpec {
    /// Pooled MEPS design: `poolwt`, `varstr`, `varpsu`.
    pub fn meps_pooled() -> Self {
        Self {
            weights: "poolwt".into(),
            strata: Some("varstr".into()),
            clusters: Some("varpsu".into()),
        }
    }
}

/// Treatment of strata that contain a single PSU.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SingletonMethod {
    /// Refuse to compute a variance.
    Fail,
    /// Drop the stratum's contribution.
    Remove,
    /// Treat the lone PSU as sampled with certainty (zero contribution).
    Certainty,
    /// Centre the lone PSU on the grand mean of all PSU totals.
    #[default]
    Adjust,
    /// Scale the variance by `strata / strata with ≥ 2 PSUs`.
    Average,
}

#[derive(Debug, Clone)]
struct Stratum {
    code: i64,
    /// Global PSU indices.
    psus: Vec<usize>,
}

/// Summary of the design structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesignSummary {
    /// Rows in the frame.
    pub n_obs: usize,
    /// Number of strata.
    pub n_strata: usize,
    /// Number of PSUs.
    pub n_psu: usize,
    /// Strata containing one PSU.
    pub singleton_strata: Vec<i64>,
    /// Design degrees of freedom.
    pub df: f64,
    /// Sum of weights.
    pub sum_weights: f64,
    /// Singleton treatment in force.
    pub singleton: SingletonMethod,
}

/// A frame bound to its weights, strata and PSUs.
#[derive(Debug, Clone)]
pub struct SurveyDesign {
    frame: Frame,
    spec: DesignSpec,
    singleton: SingletonMethod,
    level: f64,
    weights: Vec<f64>,
    /// PSU index of every row.
    row_psu: Vec<usize>,
    n_psu: usize,
    strata: Vec<Stratum>,
}

impl SurveyDesign {
    /// Bind design columns to a frame.
    ///
    /// Weights must be finite and non-negative; strata and PSU codes must be
    /// finite integers.
    pub fn new(frame: Frame, spec: DesignSpec, singleton: SingletonMethod) -> Result<Self> {
        let n = frame.n_rows();
        if n == 0 {
            return Err(Error::Validation("survey design needs at least one row".into()));
        }
        let weights = frame.column(&spec.weights)?.to_vec();
        if let Some((i, w)) = weights.iter().enumerate().find(|(_, w)| !w.is_finite() || **w < 0.0) {
            return Err(Error::Validation(format!(
                "weight '{}' at row {i} is {w}; weights must be finite and non-negative",
                spec.weights
            )));
        }
        if weights.iter().all(|&w| w == 0.0) {
            return Err(Error::Validation(format!("weight '{}' is zero for every row", spec.weights)));
        }

        let strata_codes = match &spec.strata {
            Some(col) => integer_codes(&frame, col)?,
            None => vec![0; n],
        };
        let psu_codes = match &spec.clusters {
            Some(col) => integer_codes(&frame, col)?,
            None => (0..n as i64).collect(),
        };

        // stratum -> psu code -> global psu index, in code order.
        let mut index: BTreeMap<i64, BTreeMap<i64, usize>> = BTreeMap::new();
        for i in 0..n {
            index.entry(strata_codes[i]).or_default().entry(psu_codes[i]).or_insert(usize::MAX);
        }
        let mut n_psu = 0usize;
        let mut strata = Vec::with_capacity(index.len());
        for (code, psus) in index.iter_mut() {
            let mut members = Vec::with_capacity(psus.len());
            for slot in psus.values_mut() {
                *slot = n_psu;
                members.push(n_psu);
                n_psu += 1;
            }
            strata.push(Stratum { code: *code, psus: members });
        }
        let row_psu = (0..n).map(|i| index[&strata_codes[i]][&psu_codes[i]]).collect();

        let design = Self {
            frame,
            spec,
            singleton,
            level: 0.95,
            weights,
            row_psu,
            n_psu,
            strata,
        };
        let singles = design.singleton_strata();
        if !singles.is_empty() {
            if singleton == SingletonMethod::Fail {
                return Err(Error::Validation(format!(
                    "{} stratum/strata with a single PSU (first: {}); choose a singleton method",
                    singles.len(),
                    singles[0]
                )));
            }
            tracing::warn!(count = singles.len(), method = ?singleton, "strata with a single PSU");
        }
        tracing::debug!(
            n_obs = n,
            n_strata = design.strata.len(),
            n_psu = design.n_psu,
            "survey design built"
        );
        Ok(design)
    }

    /// Set the confidence level used by estimates (default 0.95).
    pub fn with_confidence_level(mut self, level: f64) -> Result<Self> {
        if !(level > 0.0 && level < 1.0) {
            return Err(Error::Validation(format!("confidence level must be in (0,1), got {level}")));
        }
        self.level = level;
        Ok(self)
    }

    /// The bound frame.
    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    /// Design column names.
    pub fn spec(&self) -> &DesignSpec {
        &self.spec
    }

    /// Weight of every row.
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Number of rows.
    pub fn n_obs(&self) -> usize {
        self.weights.len()
    }

    /// Confidence level for intervals.
    pub fn confidence_level(&self) -> f64 {
        self.level
    }

    /// Singleton treatment.
    pub fn singleton_method(&self) -> SingletonMethod {
        self.singleton
    }

    /// Codes of strata holding a single PSU.
    pub fn singleton_strata(&self) -> Vec<i64> {
        self.strata.iter().filter(|s| s.psus.len() == 1).map(|s| s.code).collect()
    }

    /// `#PSU - #strata`.
    pub fn degrees_of_freedom(&self) -> f64 {
        self.n_psu as f64 - self.strata.len() as f64
    }

    /// Structure summary.
    pub fn summary(&self) -> DesignSummary {
        DesignSummary {
            n_obs: self.n_obs(),
            n_strata: self.strata.len(),
            n_psu: self.n_psu,
            singleton_strata: self.singleton_strata(),
            df: self.degrees_of_freedom(),
            sum_weights: self.weights.iter().sum(),
            singleton: self.singleton,
        }
    }

    /// Between-PSU covariance of weighted scores.
    ///
    /// `scores` is `n_obs × k`; row `i` holds the linearised contribution of
    /// observation `i` with its weight already applied.
    pub fn score_covariance(&self, scores: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        let n = self.n_obs();
        if scores.nrows() != n {
            return Err(Error::Validation(format!(
                "score matrix has {} rows, design has {n}",
                scores.nrows()
            )));
        }
        let k = scores.ncols();

        let mut totals = DMatrix::<f64>::zeros(self.n_psu, k);
        for i in 0..n {
            let g = self.row_psu[i];
            for j in 0..k {
                totals[(g, j)] += scores[(i, j)];
            }
        }

        let grand_mean = if self.singleton == SingletonMethod::Adjust {
            let mut m = vec![0.0; k];
            for g in 0..self.n_psu {
                for (j, mj) in m.iter_mut().enumerate() {
                    *mj += totals[(g, j)];
                }
            }
            m.iter_mut().for_each(|v| *v /= self.n_psu as f64);
            m
        } else {
            vec![0.0; k]
        };

        let mut cov = DMatrix::<f64>::zeros(k, k);
        let mut n_singletons = 0usize;
        let mut dev = vec![0.0; k];
        for stratum in &self.strata {
            let n_h = stratum.psus.len();
            if n_h == 1 {
                n_singletons += 1;
                match self.singleton {
                    SingletonMethod::Fail => {
                        return Err(Error::Computation(format!(
                            "stratum {} has a single PSU",
                            stratum.code
                        )));
                    }
                    SingletonMethod::Adjust => {
                        let g = stratum.psus[0];
                        for j in 0..k {
                            dev[j] = totals[(g, j)] - grand_mean[j];
                        }
                        add_outer(&mut cov, &dev, 1.0);
                    }
                    SingletonMethod::Remove
                    | SingletonMethod::Certainty
                    | SingletonMethod::Average => {}
                }
                continue;
            }

            let mut mean = vec![0.0; k];
            for &g in &stratum.psus {
                for (j, mj) in mean.iter_mut().enumerate() {
                    *mj += totals[(g, j)];
                }
            }
            mean.iter_mut().for_each(|v| *v /= n_h as f64);
            let scale = n_h as f64 / (n_h as f64 - 1.0);
            for &g in &stratum.psus {
                for j in 0..k {
                    dev[j] = totals[(g, j)] - mean[j];
                }
                add_outer(&mut cov, &dev, scale);
            }
        }

        if self.singleton == SingletonMethod::Average && n_singletons > 0 {
            let h = self.strata.len();
            if n_singletons == h {
                return Err(Error::Computation(
                    "every stratum has a single PSU; cannot average".into(),
                ));
            }
            cov *= h as f64 / (h - n_singletons) as f64;
        }
        Ok(cov)
    }

    /// Variance of a single score vector.
    pub fn score_variance(&self, scores: &[f64]) -> Result<f64> {
        let m = DMatrix::from_column_slice(scores.len(), 1, scores);
        Ok(self.score_covariance(&m)?[(0, 0)])
    }
}

fn add_outer(cov: &mut DMatrix<f64>, v: &[f64], scale: f64) {
    let k = v.len();
    for a in 0..k {
        for b in 0..k {
            cov[(a, b)] += scale * v[a] * v[b];
        }
    }
}

fn integer_codes(frame: &Frame, col: &str) -> Result<Vec<i64>> {
    frame
        .column(col)?
        .iter()
        .enumerate()
        .map(|(i, &v)| {
            if v.is_finite() && v.fract() == 0.0 {
                Ok(v as i64)
            } else {
                Err(Error::Validation(format!(
                    "design column '{col}' row {i}: {v} is not an integer code"
                )))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Two strata with two PSUs each, two rows per PSU.
    fn toy() -> Frame {
        Frame::from_columns([
            ("w", vec![1.0, 2.0, 1.0, 1.0, 3.0, 1.0, 2.0, 2.0]),
            ("h", vec![1.0, 1.0, 1.0, 1.0, 2.0, 2.0, 2.0, 2.0]),
            ("psu", vec![1.0, 1.0, 2.0, 2.0, 1.0, 1.0, 2.0, 2.0]),
            ("y", vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]),
        ])
        .unwrap()
    }

    fn spec() -> DesignSpec {
        DesignSpec { weights: "w".into(), strata: Some("h".into()), clusters: Some("psu".into()) }
    }

    #[test]
    fn test_structure_and_df() {
        let d = SurveyDesign::new(toy(), spec(), SingletonMethod::Fail).unwrap();
        let s = d.summary();
        assert_eq!(s.n_strata, 2);
        assert_eq!(s.n_psu, 4);
        assert_eq!(s.df, 2.0);
        assert!(s.singleton_strata.is_empty());
        assert_relative_eq!(s.sum_weights, 13.0);
    }

    #[test]
    fn test_score_variance_hand_computed() {
        let d = SurveyDesign::new(toy(), spec(), SingletonMethod::Fail).unwrap();
        // Totals w*y per PSU: h1: 5, 7; h2: 21, 30.
        let z: Vec<f64> = (0..8).map(|i| d.weights()[i] * d.frame().value("y", i).unwrap()).collect();
        // h1: 2/1 * (1 + 1) = 4 ; h2: 2 * (4.5^2 * 2) = 81
        assert_relative_eq!(d.score_variance(&z).unwrap(), 85.0, epsilon = 1e-12);
    }

    #[test]
    fn test_psu_codes_nested_in_strata() {
        // Same PSU codes in both strata must still give four PSUs.
        let d = SurveyDesign::new(toy(), spec(), SingletonMethod::Fail).unwrap();
        assert_eq!(d.summary().n_psu, 4);
    }

    #[test]
    fn test_no_clusters_means_row_psus() {
        let spec = DesignSpec { weights: "w".into(), strata: None, clusters: None };
        let d = SurveyDesign::new(toy(), spec, SingletonMethod::Fail).unwrap();
        assert_eq!(d.summary().n_psu, 8);
        assert_eq!(d.degrees_of_freedom(), 7.0);
    }

    fn with_singleton() -> Frame {
        let f = toy();
        // Third stratum with a single PSU.
        let mut cols: Vec<(String, Vec<f64>)> =
            f.names().map(|n| (n.to_string(), f.column(n).unwrap().to_vec())).collect();
        for (name, col) in &mut cols {
            col.push(match name.as_str() {
                "w" => 1.0,
                "h" => 3.0,
                "psu" => 1.0,
                _ => 10.0,
            });
        }
        Frame::from_columns(cols).unwrap()
    }

    #[test]
    fn test_singleton_fail_rejected() {
        assert!(SurveyDesign::new(with_singleton(), spec(), SingletonMethod::Fail).is_err());
    }

    #[test]
    fn test_singleton_methods() {
        let z = |d: &SurveyDesign| -> Vec<f64> {
            (0..d.n_obs()).map(|i| d.weights()[i] * d.frame().value("y", i).unwrap()).collect()
        };
        let certainty = SurveyDesign::new(with_singleton(), spec(), SingletonMethod::Certainty).unwrap();
        let remove = SurveyDesign::new(with_singleton(), spec(), SingletonMethod::Remove).unwrap();
        let adjust = SurveyDesign::new(with_singleton(), spec(), SingletonMethod::Adjust).unwrap();
        let average = SurveyDesign::new(with_singleton(), spec(), SingletonMethod::Average).unwrap();

        assert_eq!(certainty.singleton_strata(), vec![3]);
        assert_relative_eq!(certainty.score_variance(&z(&certainty)).unwrap(), 85.0, epsilon = 1e-12);
        assert_relative_eq!(remove.score_variance(&z(&remove)).unwrap(), 85.0, epsilon = 1e-12);
        // Grand mean of PSU totals: (5 + 7 + 21 + 30 + 10) / 5 = 14.6; (10 - 14.6)^2 = 21.16
        assert_relative_eq!(adjust.score_variance(&z(&adjust)).unwrap(), 85.0 + 21.16, epsilon = 1e-9);
        // 3 strata, 2 with variance: 85 * 3/2
        assert_relative_eq!(average.score_variance(&z(&average)).unwrap(), 127.5, epsilon = 1e-12);
    }

    #[test]
    fn test_invalid_weights_and_codes() {
        let mut f = toy();
        f.insert("w", vec![1.0, -1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0]).unwrap();
        assert!(SurveyDesign::new(f, spec(), SingletonMethod::Fail).is_err());

        let mut f = toy();
        f.insert("psu", vec![1.5, 1.0, 2.0, 2.0, 1.0, 1.0, 2.0, 2.0]).unwrap();
        assert!(SurveyDesign::new(f, spec(), SingletonMethod::Fail).is_err());

        let spec_missing = DesignSpec { weights: "nope".into(), strata: None, clusters: None };
        assert!(SurveyDesign::new(toy(), spec_missing, SingletonMethod::Fail).is_err());
    }
}
