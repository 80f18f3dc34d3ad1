//! Average predictive margins and marginal effects from a survey fit.
//!
//! Every margin is a linear function of the coefficients. Covariates named in
//! `at` are overridden for *all* observations, the design rows are averaged
//! with the survey weights into a contrast vector `L`, and
//!
//! ```text
//! margin = L'β      SE = sqrt(L' V L)
//! ```
//!
//! with `V` the design-based coefficient covariance (covariates held fixed).
//! Intervals use Student-t with the design degrees of freedom.
//!
//! There is no built-in test that slopes are equal across groups: comparing
//! two `dydx` results requires their joint covariance, which callers can get
//! from [`Margins::contrast_vector`] and [`SurveyFit::linear_contrast`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use svy_core::{Error, Estimate, Result};

use crate::glm::SurveyFit;

/// How a marginal effect is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectKind {
    /// Analytic derivative of the prediction.
    Continuous,
    /// First difference between the variable set to 1 and to 0.
    Discrete,
}

/// One margin with its evaluation point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarginEstimate {
    /// Human-readable label, e.g. `dydx(time) | female=1, post=0`.
    pub label: String,
    /// Variable of the marginal effect (`None` for predictions).
    pub variable: Option<String>,
    /// Covariate overrides.
    pub at: Vec<(String, f64)>,
    /// Point estimate, standard error and interval.
    pub estimate: Estimate,
}

impl MarginEstimate {
    /// Override value of `var`, if any.
    pub fn at_value(&self, var: &str) -> Option<f64> {
        self.at.iter().find(|(n, _)| n == var).map(|(_, v)| *v)
    }
}

/// Margins calculator bound to one fit.
pub struct Margins<'f, 'd> {
    fit: &'f SurveyFit<'d>,
    columns: BTreeMap<String, Vec<f64>>,
    df: Option<f64>,
}

impl<'f, 'd> Margins<'f, 'd> {
    /// Prepare margins for `fit`; the fit's input variables are read once.
    pub fn new(fit: &'f SurveyFit<'d>) -> Result<Self> {
        let frame = fit.design().frame();
        let columns = fit
            .formula()
            .input_variables()
            .into_iter()
            .map(|v| frame.column(&v).map(|c| (v.clone(), c.to_vec())))
            .collect::<Result<_>>()?;
        let df = Some(fit.design().degrees_of_freedom()).filter(|d| *d > 0.0);
        Ok(Self { fit, columns, df })
    }

    /// Average prediction with `at` overrides.
    pub fn predict(&self, at: &[(&str, f64)]) -> Result<MarginEstimate> {
        let l = self.contrast_vector(None, EffectKind::Continuous, at)?;
        self.finish(format!("margin{}", at_suffix(at)), None, at, &l)
    }

    /// Average marginal effect of `var` with `at` overrides.
    ///
    /// A continuous effect may fix `var` itself in `at` (the derivative is then
    /// taken at that value); a discrete one may not.
    pub fn dydx(&self, var: &str, kind: EffectKind, at: &[(&str, f64)]) -> Result<MarginEstimate> {
        if kind == EffectKind::Discrete && at.iter().any(|(n, _)| *n == var) {
            return Err(Error::Validation(format!("dydx({var}): '{var}' cannot also be fixed in 'at'")));
        }
        if !self.fit.formula().depends_on(var) {
            return Err(Error::Validation(format!("dydx({var}): model has no term in '{var}'")));
        }
        let l = self.contrast_vector(Some(var), kind, at)?;
        self.finish(format!("dydx({var}){}", at_suffix(at)), Some(var), at, &l)
    }

    /// Difference of two average predictions, `predict(a) − predict(b)`.
    pub fn difference(
        &self,
        label: &str,
        a: &[(&str, f64)],
        b: &[(&str, f64)],
    ) -> Result<MarginEstimate> {
        let la = self.contrast_vector(None, EffectKind::Continuous, a)?;
        let lb = self.contrast_vector(None, EffectKind::Continuous, b)?;
        let l: Vec<f64> = la.iter().zip(&lb).map(|(x, y)| x - y).collect();
        self.finish(label.to_string(), None, a, &l)
    }

    /// Weighted-average design row (or its derivative / first difference).
    ///
    /// `var = None` gives the prediction contrast.
    pub fn contrast_vector(
        &self,
        var: Option<&str>,
        kind: EffectKind,
        at: &[(&str, f64)],
    ) -> Result<Vec<f64>> {
        let formula = self.fit.formula();
        for (name, v) in at {
            if !v.is_finite() {
                return Err(Error::Validation(format!("'at' value for '{name}' is not finite")));
            }
        }
        let w = self.fit.design().weights();
        let p = self.fit.coef_names().len();
        let mut acc = vec![0.0; p];
        let mut sw = 0.0;
        for (i, &wi) in w.iter().enumerate() {
            if wi == 0.0 {
                continue;
            }
            let base = |name: &str| -> Option<f64> {
                at.iter()
                    .find(|(n, _)| *n == name)
                    .map(|(_, v)| *v)
                    .or_else(|| self.columns.get(name).map(|c| c[i]))
            };
            let row = match (var, kind) {
                (None, _) => formula.row_with(base)?,
                (Some(v), EffectKind::Continuous) => formula.row_derivative(v, base)?,
                (Some(v), EffectKind::Discrete) => {
                    let set = |value: f64| {
                        move |name: &str| if name == v { Some(value) } else { base(name) }
                    };
                    let one = formula.row_with(set(1.0))?;
                    let zero = formula.row_with(set(0.0))?;
                    one.iter().zip(&zero).map(|(a, b)| a - b).collect()
                }
            };
            for (a, r) in acc.iter_mut().zip(&row) {
                *a += wi * r;
            }
            sw += wi;
        }
        if sw <= 0.0 {
            return Err(Error::Computation("margins need positive total weight".into()));
        }
        acc.iter_mut().for_each(|a| *a /= sw);
        Ok(acc)
    }

    fn finish(
        &self,
        label: String,
        variable: Option<&str>,
        at: &[(&str, f64)],
        l: &[f64],
    ) -> Result<MarginEstimate> {
        let point = self.fit.linear_contrast(&label, l)?;
        let estimate = Estimate::from_se(
            label.clone(),
            point.estimate,
            point.std_error,
            self.df,
            self.fit.design().confidence_level(),
        )?;
        Ok(MarginEstimate {
            label,
            variable: variable.map(str::to_string),
            at: at.iter().map(|(n, v)| (n.to_string(), *v)).collect(),
            estimate,
        })
    }
}

fn at_suffix(at: &[(&str, f64)]) -> String {
    if at.is_empty() {
        String::new()
    } else {
        let parts: Vec<String> = at.iter().map(|(n, v)| format!("{n}={v}")).collect();
        format!(" | {}", parts.join(", "))
    }
}
