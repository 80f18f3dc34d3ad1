//! Survey-weighted linear regression with design-based (sandwich) covariance.
//!
//! Point estimates are weighted least squares, `β = (X'WX)⁻¹ X'Wy`. The
//! covariance linearises the estimating equations `Σ w_i e_i x_i = 0`:
//!
//! ```text
//! V(β) = (X'WX)⁻¹ · Cov_design(w_i e_i x_i) · (X'WX)⁻¹
//! ```
//!
//! with the between-PSU covariance taken from the survey design. Inference
//! uses Student-t with `design df + 1 − p` degrees of freedom.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use svy_core::{Error, Estimate, Result};

use crate::formula::Formula;
use crate::survey::SurveyDesign;

/// Relative pivot below which `X'WX` is treated as singular.
const RANK_TOL: f64 = 1e-10;

/// A fitted survey-weighted linear model, borrowing its design.
#[derive(Debug, Clone)]
pub struct SurveyFit<'d> {
    design: &'d SurveyDesign,
    formula: Formula,
    coef_names: Vec<String>,
    coefficients: DVector<f64>,
    covariance: DMatrix<f64>,
    df_residual: Option<f64>,
    n_obs: usize,
}

/// Serializable snapshot of a fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitSummary {
    /// Formula as written back.
    pub formula: String,
    /// Coefficient table.
    pub coefficients: Vec<Estimate>,
    /// Coefficient covariance, row-major.
    pub covariance: Vec<Vec<f64>>,
    /// Residual degrees of freedom (`None` = normal reference).
    pub df_residual: Option<f64>,
    /// Observations used.
    pub n_obs: usize,
    /// Estimated population size.
    pub population: f64,
}

/// Fit `formula` by design-weighted least squares.
pub fn svyglm<'d>(design: &'d SurveyDesign, formula: &Formula) -> Result<SurveyFit<'d>> {
    let frame = design.frame();
    let (x, names) = formula.model_matrix(frame)?;
    let y = formula.response_vector(frame)?;
    let w = design.weights();
    let (n, p) = (x.nrows(), x.ncols());

    let n_positive = w.iter().filter(|&&wi| wi > 0.0).count();
    if n_positive < p {
        return Err(Error::Validation(format!(
            "{n_positive} observations with positive weight for {p} coefficients"
        )));
    }

    // X'WX and X'Wy
    let mut xtwx = DMatrix::<f64>::zeros(p, p);
    let mut xtwy = DVector::<f64>::zeros(p);
    for i in 0..n {
        let wi = w[i];
        if wi == 0.0 {
            continue;
        }
        for a in 0..p {
            let xa = x[(i, a)] * wi;
            xtwy[a] += xa * y[i];
            for b in a..p {
                xtwx[(a, b)] += xa * x[(i, b)];
            }
        }
    }
    for a in 0..p {
        for b in 0..a {
            xtwx[(a, b)] = xtwx[(b, a)];
        }
    }

    let bread = invert_spd(&xtwx).ok_or_else(|| {
        Error::Computation(format!(
            "X'WX is singular for '{formula}'; check for collinear or constant terms"
        ))
    })?;
    let beta = &bread * &xtwy;

    // Weighted score contributions U_i = w_i e_i x_i.
    let mut scores = DMatrix::<f64>::zeros(n, p);
    for i in 0..n {
        let fitted: f64 = (0..p).map(|a| x[(i, a)] * beta[a]).sum();
        let we = w[i] * (y[i] - fitted);
        for a in 0..p {
            scores[(i, a)] = we * x[(i, a)];
        }
    }
    let meat = design.score_covariance(&scores)?;
    let mut covariance = &bread * meat * &bread;
    // Symmetrise rounding noise.
    for a in 0..p {
        for b in 0..a {
            let m = 0.5 * (covariance[(a, b)] + covariance[(b, a)]);
            covariance[(a, b)] = m;
            covariance[(b, a)] = m;
        }
    }

    let df = design.degrees_of_freedom() + 1.0 - p as f64;
    let df_residual = (df > 0.0).then_some(df);
    if df_residual.is_none() {
        tracing::warn!(df, "non-positive residual df; using normal reference distribution");
    }
    tracing::debug!(formula = %formula, n_obs = n, p, ?df_residual, "svyglm fitted");

    Ok(SurveyFit {
        design,
        formula: formula.clone(),
        coef_names: names,
        coefficients: beta,
        covariance,
        df_residual,
        n_obs: n,
    })
}

fn invert_spd(a: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    let p = a.nrows();
    let scale = (0..p).map(|i| a[(i, i)].abs()).fold(0.0_f64, f64::max);
    if scale == 0.0 {
        return None;
    }
    let chol = a.clone().cholesky()?;
    let l = chol.l();
    if (0..p).any(|i| l[(i, i)] * l[(i, i)] < RANK_TOL * scale) {
        return None;
    }
    Some(chol.inverse())
}

impl<'d> SurveyFit<'d> {
    /// The design the model was fitted on.
    pub fn design(&self) -> &'d SurveyDesign {
        self.design
    }

    /// The fitted formula.
    pub fn formula(&self) -> &Formula {
        &self.formula
    }

    /// Coefficient names, in model-matrix order.
    pub fn coef_names(&self) -> &[String] {
        &self.coef_names
    }

    /// Coefficient vector.
    pub fn coefficients(&self) -> &DVector<f64> {
        &self.coefficients
    }

    /// Design-based coefficient covariance.
    pub fn covariance(&self) -> &DMatrix<f64> {
        &self.covariance
    }

    /// Residual degrees of freedom (`None` when non-positive).
    pub fn df_residual(&self) -> Option<f64> {
        self.df_residual
    }

    /// Observations in the design.
    pub fn n_obs(&self) -> usize {
        self.n_obs
    }

    fn index(&self, name: &str) -> Result<usize> {
        self.coef_names.iter().position(|n| n == name).ok_or_else(|| {
            Error::Validation(format!(
                "no coefficient '{name}' (have: {})",
                self.coef_names.join(", ")
            ))
        })
    }

    /// Point estimate of one coefficient.
    pub fn coef(&self, name: &str) -> Result<f64> {
        Ok(self.coefficients[self.index(name)?])
    }

    /// Standard error of one coefficient.
    pub fn std_error(&self, name: &str) -> Result<f64> {
        let j = self.index(name)?;
        Ok(self.covariance[(j, j)].max(0.0).sqrt())
    }

    /// One coefficient with its interval at the design's confidence level.
    pub fn estimate(&self, name: &str) -> Result<Estimate> {
        let j = self.index(name)?;
        self.coef_estimate(j, self.design.confidence_level())
    }

    /// Coefficient table at the design's confidence level.
    pub fn estimates(&self) -> Result<Vec<Estimate>> {
        self.confint(self.design.confidence_level())
    }

    /// Coefficient table with intervals at `level`.
    pub fn confint(&self, level: f64) -> Result<Vec<Estimate>> {
        (0..self.coef_names.len()).map(|j| self.coef_estimate(j, level)).collect()
    }

    fn coef_estimate(&self, j: usize, level: f64) -> Result<Estimate> {
        Estimate::from_se(
            self.coef_names[j].clone(),
            self.coefficients[j],
            self.covariance[(j, j)].max(0.0).sqrt(),
            self.df_residual,
            level,
        )
    }

    /// `L'β` with standard error `sqrt(L'VL)`.
    pub fn linear_contrast(&self, term: &str, l: &[f64]) -> Result<Estimate> {
        let p = self.coef_names.len();
        if l.len() != p {
            return Err(Error::Validation(format!(
                "contrast '{term}' has {} weights for {p} coefficients",
                l.len()
            )));
        }
        let lv = DVector::from_column_slice(l);
        let value = lv.dot(&self.coefficients);
        let var = (self.covariance.transpose() * &lv).dot(&lv);
        Estimate::from_se(term, value, var.max(0.0).sqrt(), self.df_residual, self.design.confidence_level())
    }

    /// Contrast from `(coefficient, weight)` pairs.
    pub fn named_contrast(&self, term: &str, weights: &[(&str, f64)]) -> Result<Estimate> {
        let mut l = vec![0.0; self.coef_names.len()];
        for (name, w) in weights {
            l[self.index(name)?] += w;
        }
        self.linear_contrast(term, &l)
    }

    /// Linear prediction `x'β` for covariate values supplied by `lookup`.
    pub fn predict<F>(&self, term: &str, lookup: F) -> Result<Estimate>
    where
        F: Fn(&str) -> Option<f64>,
    {
        let row = self.formula.row_with(lookup)?;
        self.linear_contrast(term, &row)
    }

    /// Fitted values for every observation.
    pub fn fitted_values(&self) -> Result<Vec<f64>> {
        let (x, _) = self.formula.model_matrix(self.design.frame())?;
        Ok((x * &self.coefficients).iter().copied().collect())
    }

    /// Serializable summary.
    pub fn summary(&self) -> Result<FitSummary> {
        let p = self.coef_names.len();
        Ok(FitSummary {
            formula: self.formula.to_string(),
            coefficients: self.estimates()?,
            covariance: (0..p).map(|a| (0..p).map(|b| self.covariance[(a, b)]).collect()).collect(),
            df_residual: self.df_residual,
            n_obs: self.n_obs,
            population: self.design.weights().iter().sum(),
        })
    }
}
