//! Design-based totals and means, overall and by domain.
//!
//! Domain estimates keep the full design: rows outside the domain contribute
//! a zero score, so PSUs with no domain members still enter the variance.

use serde::{Deserialize, Serialize};
use svy_core::{Error, Estimate, Result};

use super::design::SurveyDesign;

/// Statistic for [`SurveyDesign::by`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Statistic {
    /// Weighted total `Σ w y`.
    Total,
    /// Weighted mean `Σ w y / Σ w`.
    Mean,
}

/// Estimate for one combination of domain values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEstimate {
    /// `(variable, value)` pairs identifying the domain.
    pub domain: Vec<(String, f64)>,
    /// Weighted row count falling in the domain (sum of weights).
    pub weight: f64,
    /// Unweighted row count.
    pub n: usize,
    /// Estimate with design-based standard error.
    pub estimate: Estimate,
}

impl DomainEstimate {
    /// Domain value of `var`, if it is one of the domain variables.
    pub fn value(&self, var: &str) -> Option<f64> {
        self.domain.iter().find(|(n, _)| n == var).map(|(_, v)| *v)
    }
}

impl SurveyDesign {
    /// Weighted total of `var`.
    pub fn total(&self, var: &str) -> Result<Estimate> {
        let y = self.checked_column(var)?;
        let mask = vec![true; self.n_obs()];
        self.domain_statistic(&format!("total({var})"), y, &mask, Statistic::Total)
    }

    /// Weighted mean of `var`.
    pub fn mean(&self, var: &str) -> Result<Estimate> {
        let y = self.checked_column(var)?;
        let mask = vec![true; self.n_obs()];
        self.domain_statistic(&format!("mean({var})"), y, &mask, Statistic::Mean)
    }

    /// Estimated population size `Σ w`.
    pub fn population_total(&self) -> Result<Estimate> {
        let ones = vec![1.0; self.n_obs()];
        let mask = vec![true; self.n_obs()];
        self.domain_statistic("population", &ones, &mask, Statistic::Total)
    }

    /// `stat` of `var` within every combination of the `by` variables.
    ///
    /// Domains are returned in ascending order of their values.
    pub fn by(&self, var: &str, by: &[&str], stat: Statistic) -> Result<Vec<DomainEstimate>> {
        let y = self.checked_column(var)?.to_vec();
        let label = match stat {
            Statistic::Total => format!("total({var})"),
            Statistic::Mean => format!("mean({var})"),
        };
        self.over_domains(&label, &y, by, stat)
    }

    /// Estimated population size within every combination of the `by` variables.
    pub fn population_by(&self, by: &[&str]) -> Result<Vec<DomainEstimate>> {
        let ones = vec![1.0; self.n_obs()];
        self.over_domains("population", &ones, by, Statistic::Total)
    }

    fn over_domains(
        &self,
        label: &str,
        y: &[f64],
        by: &[&str],
        stat: Statistic,
    ) -> Result<Vec<DomainEstimate>> {
        if by.is_empty() {
            return Err(Error::Validation("domain estimation needs at least one 'by' variable".into()));
        }
        let keys: Vec<&[f64]> = by.iter().map(|b| self.checked_column(b)).collect::<Result<_>>()?;
        let n = self.n_obs();

        let mut combos: Vec<Vec<f64>> = (0..n).map(|i| keys.iter().map(|k| k[i]).collect()).collect();
        combos.sort_by(|a, b| {
            a.iter().zip(b).map(|(x, y)| x.total_cmp(y)).find(|o| o.is_ne()).unwrap_or(std::cmp::Ordering::Equal)
        });
        combos.dedup();

        let mut out = Vec::with_capacity(combos.len());
        for combo in combos {
            let mask: Vec<bool> =
                (0..n).map(|i| keys.iter().zip(&combo).all(|(k, v)| k[i] == *v)).collect();
            let name = by
                .iter()
                .zip(&combo)
                .map(|(b, v)| format!("{b}={v}"))
                .collect::<Vec<_>>()
                .join(",");
            let estimate = self.domain_statistic(&format!("{label}[{name}]"), y, &mask, stat)?;
            let weight = (0..n).filter(|&i| mask[i]).map(|i| self.weights()[i]).sum();
            out.push(DomainEstimate {
                domain: by.iter().map(|b| b.to_string()).zip(combo).collect(),
                weight,
                n: mask.iter().filter(|&&m| m).count(),
                estimate,
            });
        }
        Ok(out)
    }

    fn domain_statistic(&self, term: &str, y: &[f64], mask: &[bool], stat: Statistic) -> Result<Estimate> {
        let w = self.weights();
        let n = self.n_obs();
        let (point, scores) = match stat {
            Statistic::Total => {
                let scores: Vec<f64> =
                    (0..n).map(|i| if mask[i] { w[i] * y[i] } else { 0.0 }).collect();
                (scores.iter().sum::<f64>(), scores)
            }
            Statistic::Mean => {
                let sw: f64 = (0..n).filter(|&i| mask[i]).map(|i| w[i]).sum();
                if sw <= 0.0 {
                    return Err(Error::Computation(format!("{term}: domain has zero total weight")));
                }
                let swy: f64 = (0..n).filter(|&i| mask[i]).map(|i| w[i] * y[i]).sum();
                let ybar = swy / sw;
                let scores =
                    (0..n).map(|i| if mask[i] { w[i] * (y[i] - ybar) / sw } else { 0.0 }).collect();
                (ybar, scores)
            }
        };
        let var = self.score_variance(&scores)?;
        Estimate::from_se(
            term,
            point,
            var.max(0.0).sqrt(),
            Some(self.degrees_of_freedom()),
            self.confidence_level(),
        )
    }

    fn checked_column(&self, var: &str) -> Result<&[f64]> {
        let col = self.frame().column(var)?;
        if let Some(i) = col.iter().position(|v| !v.is_finite()) {
            return Err(Error::Validation(format!("column '{var}' has a non-finite value at row {i}")));
        }
        Ok(col)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::survey::{DesignSpec, SingletonMethod};
    use approx::assert_relative_eq;
    use svy_core::Frame;

    fn design() -> SurveyDesign {
        let f = Frame::from_columns([
            ("w", vec![1.0, 2.0, 1.0, 1.0, 3.0, 1.0, 2.0, 2.0]),
            ("h", vec![1.0, 1.0, 1.0, 1.0, 2.0, 2.0, 2.0, 2.0]),
            ("psu", vec![1.0, 1.0, 2.0, 2.0, 1.0, 1.0, 2.0, 2.0]),
            ("y", vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]),
            ("g", vec![0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0]),
        ])
        .unwrap();
        let spec =
            DesignSpec { weights: "w".into(), strata: Some("h".into()), clusters: Some("psu".into()) };
        SurveyDesign::new(f, spec, SingletonMethod::Fail).unwrap()
    }

    #[test]
    fn test_total_and_population() {
        let d = design();
        let t = d.total("y").unwrap();
        assert_relative_eq!(t.estimate, 63.0);
        assert_relative_eq!(t.std_error, 85.0_f64.sqrt(), epsilon = 1e-12);
        assert_eq!(t.df, Some(2.0));
        assert_relative_eq!(d.population_total().unwrap().estimate, 13.0);
    }

    #[test]
    fn test_mean_linearisation() {
        let d = design();
        let m = d.mean("y").unwrap();
        assert_relative_eq!(m.estimate, 63.0 / 13.0, epsilon = 1e-12);
        assert!(m.std_error > 0.0);
        // Mean of a constant has no variance.
        let mut f = d.frame().clone();
        f.insert("c", vec![4.0; 8]).unwrap();
        let d2 = SurveyDesign::new(f, d.spec().clone(), SingletonMethod::Fail).unwrap();
        let c = d2.mean("c").unwrap();
        assert_relative_eq!(c.estimate, 4.0);
        assert_relative_eq!(c.std_error, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_domain_totals_add_up() {
        let d = design();
        let parts = d.by("y", &["g"], Statistic::Total).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].value("g"), Some(0.0));
        let sum: f64 = parts.iter().map(|p| p.estimate.estimate).sum();
        assert_relative_eq!(sum, 63.0);
        let pop = d.population_by(&["g"]).unwrap();
        assert_relative_eq!(pop[0].estimate.estimate, 7.0);
        assert_relative_eq!(pop[1].estimate.estimate, 6.0);
        assert_eq!(pop[1].n, 4);
    }

    #[test]
    fn test_domain_mean_matches_weighted_mean() {
        let d = design();
        let means = d.by("y", &["g"], Statistic::Mean).unwrap();
        // g=1: w = 2,1,1,2 ; y = 2,4,6,8 -> (4+4+6+16)/6 = 5
        assert_relative_eq!(means[1].estimate.estimate, 5.0, epsilon = 1e-12);
        assert!(means[1].estimate.term.contains("g=1"));
    }

    #[test]
    fn test_non_finite_rejected() {
        let d = design();
        let mut f = d.frame().clone();
        f.insert("bad", vec![1.0, f64::NAN, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0]).unwrap();
        let d2 = SurveyDesign::new(f, d.spec().clone(), SingletonMethod::Fail).unwrap();
        assert!(d2.mean("bad").is_err());
        assert!(d2.by("y", &[], Statistic::Mean).is_err());
    }
}
