//! Two-group interrupted time-series analysis on a survey design.
//!
//! Two equivalent parameterisations of the same piecewise-linear model are
//! fitted:
//!
//! - **triple interaction**:
//!   `y ~ g + p + t + p:g + g:t + p:g:t`, where the `p:g:t` coefficient is the
//!   difference-in-differences of slopes;
//! - **linear spline**:
//!   `y ~ g + p + g:p + t + g:t + tp + g:tp` with `tp = max(0, t − knot)`,
//!   where `p` is the immediate level change at the knot, `tp` the slope
//!   change and `g:tp` the difference-in-differences.
//!
//! The spline additionally lets the reference group's slope change at the
//! knot; when it does not, the two DiD estimates are close.

use serde::{Deserialize, Serialize};
use svy_core::{Error, Estimate, Frame, Result};

use crate::formula::{Derived, Formula};
use crate::glm::{FitSummary, SurveyFit, svyglm};
use crate::margins::{EffectKind, MarginEstimate, Margins};
use crate::survey::{DesignSummary, DomainEstimate, Statistic, SurveyDesign};

/// Tolerance for 0/1 indicator checks.
const INDICATOR_TOL: f64 = 1e-9;

/// Caveat attached to every result set.
pub const SLOPE_EQUALITY_CAVEAT: &str = "slopes are reported per group and period; \
no test of equality of slopes across groups is performed";

/// Column names and knot of an ITSA model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ItsaSpec {
    /// Outcome column.
    pub outcome: String,
    /// 0/1 group indicator.
    pub group: String,
    /// 0/1 period indicator (1 from the knot on).
    pub period: String,
    /// Time since the base year.
    pub time: String,
    /// Name of the derived post-knot time column.
    pub time_post: String,
    /// Knot on the time scale (cutoff year − base year).
    pub knot_time: f64,
    /// Calendar year at `time = 0`, used for labels.
    pub base_year: i32,
}

impl Default for ItsaSpec {
    fn default() -> Self {
        Self::meps("totexp", 2016, 2019)
    }
}

impl ItsaSpec {
    /// Column names produced by the MEPS frame builder.
    pub fn meps(outcome: &str, base_year: i32, cutoff: i32) -> Self {
        Self {
            outcome: outcome.to_string(),
            group: "female".into(),
            period: "post".into(),
            time: "time".into(),
            time_post: "time_post".into(),
            knot_time: f64::from(cutoff - base_year),
            base_year,
        }
    }

    /// Calendar year of the knot.
    pub fn cutoff_year(&self) -> f64 {
        f64::from(self.base_year) + self.knot_time
    }

    /// Name of the triple-interaction DiD coefficient.
    pub fn triple_did_term(&self) -> String {
        format!("{}:{}:{}", self.period, self.group, self.time)
    }

    /// Name of the spline DiD coefficient.
    pub fn spline_did_term(&self) -> String {
        format!("{}:{}", self.group, self.time_post)
    }

    /// `y ~ g + p + t + p:g + g:t + p:g:t`.
    pub fn triple_formula(&self) -> Result<Formula> {
        let (y, g, p, t) = (&self.outcome, &self.group, &self.period, &self.time);
        Formula::parse(&format!("{y} ~ {g} + {p} + {t} + {p}:{g} + {g}:{t} + {p}:{g}:{t}"))
    }

    /// `y ~ g + p + g:p + t + g:t + tp + g:tp` with `tp` derived from `t`.
    pub fn spline_formula(&self) -> Result<Formula> {
        let (y, g, p, t, tp) = (&self.outcome, &self.group, &self.period, &self.time, &self.time_post);
        Formula::parse(&format!("{y} ~ {g} + {p} + {g}:{p} + {t} + {g}:{t} + {tp} + {g}:{tp}"))?
            .with_derived(tp, Derived::Hinge { source: t.clone(), knot: self.knot_time })
    }

    /// Add `time_post = max(0, time − knot)` to the frame.
    pub fn add_spline_columns(&self, frame: &mut Frame) -> Result<()> {
        let knot = self.knot_time;
        frame.derive(&self.time_post, &[self.time.as_str()], |v| (v[0] - knot).max(0.0))
    }

    /// Check indicator columns and that the period flag matches `time ≥ knot`.
    pub fn validate(&self, frame: &Frame) -> Result<()> {
        frame.column(&self.outcome)?;
        let group = frame.column(&self.group)?;
        let period = frame.column(&self.period)?;
        let time = frame.column(&self.time)?;
        for (name, col) in [(&self.group, group), (&self.period, period)] {
            if let Some(i) = col.iter().position(|&v| !is_indicator(v)) {
                return Err(Error::Validation(format!(
                    "'{name}' must be 0/1, found {} at row {i}",
                    col[i]
                )));
            }
        }
        for i in 0..frame.n_rows() {
            let expected = if time[i] >= self.knot_time { 1.0 } else { 0.0 };
            if (period[i] - expected).abs() > INDICATOR_TOL {
                return Err(Error::Validation(format!(
                    "row {i}: '{}' = {} but '{}' = {} with knot at {}",
                    self.period, period[i], self.time, time[i], self.knot_time
                )));
            }
        }
        Ok(())
    }
}

fn is_indicator(v: f64) -> bool {
    v.abs() < INDICATOR_TOL || (v - 1.0).abs() < INDICATOR_TOL
}

/// Weighted descriptive tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptives {
    /// Population size by group.
    pub population_by_group: Vec<DomainEstimate>,
    /// Population size by group and period.
    pub population_by_group_period: Vec<DomainEstimate>,
    /// Outcome mean by group and period.
    pub mean_by_group_period: Vec<DomainEstimate>,
    /// Outcome mean by group and time point.
    pub mean_by_group_time: Vec<DomainEstimate>,
}

/// Headline effects from both parameterisations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItsaEffects {
    /// Triple-interaction DiD (`p:g:t`).
    pub did_triple: Estimate,
    /// Spline DiD (`g:tp`).
    pub did_spline: Estimate,
    /// Immediate level change at the knot, reference group (spline `p`).
    pub level_change: Estimate,
    /// Difference in level change between groups (spline `g:p`).
    pub level_change_difference: Estimate,
    /// Slope change at the knot, reference group (spline `tp`).
    pub slope_change: Estimate,
    /// `|did_triple − did_spline|`.
    pub did_gap: f64,
}

/// Standard margins of one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItsaMargins {
    /// Weighted mean time within each period, where margins are evaluated.
    pub period_mean_time: [f64; 2],
    /// Group difference (discrete `dydx(group)`) at period 0 and 1.
    pub group_difference: Vec<MarginEstimate>,
    /// Slope in time for each group × period.
    pub slopes: Vec<MarginEstimate>,
}

/// A fitted model and its margins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItsaModel {
    /// `triple` or `spline`.
    pub name: String,
    /// Coefficients, covariance and df.
    pub fit: FitSummary,
    /// Standard margins.
    pub margins: ItsaMargins,
}

/// Which part of the trajectory a segment draws.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentKind {
    /// Fitted pre-period line, up to the knot.
    Pre,
    /// Fitted post-period line, from the knot.
    Post,
    /// Pre-period trend projected over the post period.
    Counterfactual,
}

/// One point on a fitted line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentPoint {
    /// Time value.
    pub time: f64,
    /// Calendar year.
    pub year: f64,
    /// Prediction with interval.
    pub estimate: Estimate,
}

/// Fitted line for one group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// Group indicator value.
    pub group: f64,
    /// Segment kind.
    pub kind: SegmentKind,
    /// Points in increasing time.
    pub points: Vec<SegmentPoint>,
}

/// Everything produced by [`ItsaAnalysis::fit`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItsaResults {
    /// Model specification.
    pub spec: ItsaSpec,
    /// Design structure.
    pub design: DesignSummary,
    /// Weighted descriptives.
    pub descriptives: Descriptives,
    /// Triple-interaction model.
    pub triple: ItsaModel,
    /// Linear-spline model.
    pub spline: ItsaModel,
    /// Headline effects.
    pub effects: ItsaEffects,
    /// Fitted and counterfactual lines from the spline model.
    pub segments: Vec<Segment>,
    /// Documented limitations.
    pub caveats: Vec<String>,
}

/// Runs the descriptive tables, both models, margins and segments.
#[derive(Debug, Clone, Default)]
pub struct ItsaAnalysis {
    spec: ItsaSpec,
}

impl ItsaAnalysis {
    /// Analysis with the given specification.
    pub fn new(spec: ItsaSpec) -> Self {
        Self { spec }
    }

    /// The specification.
    pub fn spec(&self) -> &ItsaSpec {
        &self.spec
    }

    /// Weighted population sizes and outcome means.
    pub fn describe(&self, design: &SurveyDesign) -> Result<Descriptives> {
        let s = &self.spec;
        s.validate(design.frame())?;
        let (g, p, t) = (s.group.as_str(), s.period.as_str(), s.time.as_str());
        Ok(Descriptives {
            population_by_group: design.population_by(&[g])?,
            population_by_group_period: design.population_by(&[g, p])?,
            mean_by_group_period: design.by(&s.outcome, &[g, p], Statistic::Mean)?,
            mean_by_group_time: design.by(&s.outcome, &[g, t], Statistic::Mean)?,
        })
    }

    /// Fit one parameterisation.
    pub fn fit_triple<'d>(&self, design: &'d SurveyDesign) -> Result<SurveyFit<'d>> {
        svyglm(design, &self.spec.triple_formula()?)
    }

    /// Fit the other parameterisation.
    pub fn fit_spline<'d>(&self, design: &'d SurveyDesign) -> Result<SurveyFit<'d>> {
        svyglm(design, &self.spec.spline_formula()?)
    }

    /// Full analysis.
    pub fn fit(&self, design: &SurveyDesign) -> Result<ItsaResults> {
        let s = &self.spec;
        let descriptives = self.describe(design)?;
        tracing::info!(
            outcome = %s.outcome,
            knot = s.knot_time,
            n_obs = design.n_obs(),
            "fitting ITSA models"
        );

        let triple = self.fit_triple(design)?;
        let spline = self.fit_spline(design)?;
        let period_mean_time = self.period_mean_time(design)?;

        let effects = ItsaEffects {
            did_triple: triple.estimate(&s.triple_did_term())?,
            did_spline: spline.estimate(&s.spline_did_term())?,
            level_change: spline.estimate(&s.period)?,
            level_change_difference: spline.estimate(&format!("{}:{}", s.group, s.period))?,
            slope_change: spline.estimate(&s.time_post)?,
            did_gap: (triple.coef(&s.triple_did_term())? - spline.coef(&s.spline_did_term())?).abs(),
        };
        tracing::info!(
            did_triple = effects.did_triple.estimate,
            did_spline = effects.did_spline.estimate,
            "difference-in-differences"
        );
        tracing::debug!(gap = effects.did_gap, "triple vs spline DiD");

        let segments = self.segments(&spline)?;
        Ok(ItsaResults {
            spec: s.clone(),
            design: design.summary(),
            descriptives,
            triple: self.model("triple", &triple, period_mean_time)?,
            spline: self.model("spline", &spline, period_mean_time)?,
            effects,
            segments,
            caveats: vec![SLOPE_EQUALITY_CAVEAT.to_string()],
        })
    }

    fn model(&self, name: &str, fit: &SurveyFit<'_>, period_mean_time: [f64; 2]) -> Result<ItsaModel> {
        Ok(ItsaModel {
            name: name.to_string(),
            fit: fit.summary()?,
            margins: self.margins(fit, period_mean_time)?,
        })
    }

    /// Group differences at each period and slopes by group × period.
    ///
    /// Margins are evaluated at the weighted mean time of the period, so the
    /// overridden period flag stays consistent with time in both models.
    pub fn margins(&self, fit: &SurveyFit<'_>, period_mean_time: [f64; 2]) -> Result<ItsaMargins> {
        let s = &self.spec;
        let m = Margins::new(fit)?;
        let mut group_difference = Vec::with_capacity(2);
        let mut slopes = Vec::with_capacity(4);
        for (p, &t) in period_mean_time.iter().enumerate() {
            let p = p as f64;
            group_difference.push(m.dydx(
                &s.group,
                EffectKind::Discrete,
                &[(s.period.as_str(), p), (s.time.as_str(), t)],
            )?);
        }
        for g in [0.0, 1.0] {
            for (p, &t) in period_mean_time.iter().enumerate() {
                slopes.push(m.dydx(
                    &s.time,
                    EffectKind::Continuous,
                    &[(s.group.as_str(), g), (s.period.as_str(), p as f64), (s.time.as_str(), t)],
                )?);
            }
        }
        Ok(ItsaMargins { period_mean_time, group_difference, slopes })
    }

    /// Weighted mean of time in each period.
    pub fn period_mean_time(&self, design: &SurveyDesign) -> Result<[f64; 2]> {
        let s = &self.spec;
        let t = design.frame().column(&s.time)?;
        let p = design.frame().column(&s.period)?;
        let w = design.weights();
        let mut out = [0.0; 2];
        for (k, slot) in out.iter_mut().enumerate() {
            let (mut sw, mut swt) = (0.0, 0.0);
            for i in 0..w.len() {
                if (p[i] - k as f64).abs() < INDICATOR_TOL {
                    sw += w[i];
                    swt += w[i] * t[i];
                }
            }
            if sw <= 0.0 {
                return Err(Error::Validation(format!(
                    "period {k} has no observations with positive weight"
                )));
            }
            *slot = swt / sw;
        }
        Ok(out)
    }

    /// Pre, post and counterfactual lines per group at integer time points.
    pub fn segments(&self, fit: &SurveyFit<'_>) -> Result<Vec<Segment>> {
        let s = &self.spec;
        let time = fit.design().frame().column(&s.time)?;
        let t_min = time.iter().copied().fold(f64::INFINITY, f64::min);
        let t_max = time.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if !(t_min < s.knot_time && s.knot_time <= t_max) {
            return Err(Error::Validation(format!(
                "knot {} outside the observed time range [{t_min}, {t_max}]",
                s.knot_time
            )));
        }
        let pre_times = grid(t_min, s.knot_time);
        let post_times = grid(s.knot_time, t_max);

        let mut out = Vec::with_capacity(6);
        for g in [0.0, 1.0] {
            for (kind, period, times) in [
                (SegmentKind::Pre, 0.0, &pre_times),
                (SegmentKind::Post, 1.0, &post_times),
                (SegmentKind::Counterfactual, 0.0, &post_times),
            ] {
                let points = times
                    .iter()
                    .map(|&t| {
                        let label = format!("{kind:?}[{}={g}, {}={t}]", s.group, s.time);
                        let estimate = fit.predict(&label, |name| {
                            if name == s.group {
                                Some(g)
                            } else if name == s.period {
                                Some(period)
                            } else if name == s.time {
                                Some(t)
                            } else if name == s.time_post && kind == SegmentKind::Counterfactual {
                                // Pre-period trend carried past the knot.
                                Some(0.0)
                            } else {
                                None
                            }
                        })?;
                        Ok(SegmentPoint { time: t, year: f64::from(s.base_year) + t, estimate })
                    })
                    .collect::<Result<Vec<_>>>()?;
                out.push(Segment { group: g, kind, points });
            }
        }
        Ok(out)
    }
}

/// Integer points in `[from, to]`, with both ends included.
fn grid(from: f64, to: f64) -> Vec<f64> {
    let mut out = vec![from];
    let mut t = from.floor() + 1.0;
    while t < to {
        out.push(t);
        t += 1.0;
    }
    if to > from {
        out.push(to);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::survey::{DesignSpec, SingletonMethod};
    use approx::assert_relative_eq;

    /// Noise-free two-group series with known effects, plus a small
    /// deterministic perturbation so the covariance is non-degenerate.
    fn frame() -> Frame {
        let mut cols: [Vec<f64>; 7] = Default::default();
        let mut i = 0usize;
        for t in 0..6 {
            for g in 0..2 {
                for rep in 0..8 {
                    let (t, g) = (f64::from(t), f64::from(g));
                    let p = if t >= 3.0 { 1.0 } else { 0.0 };
                    let y = 100.0 + 20.0 * g + 5.0 * t + 8.0 * p + 3.0 * p * g + 2.0 * g * t
                        + 4.0 * p * g * t
                        + ((i * 37 % 11) as f64 - 5.0) * 0.3;
                    cols[0].push(y);
                    cols[1].push(g);
                    cols[2].push(p);
                    cols[3].push(t);
                    cols[4].push(1.0 + (rep % 3) as f64);
                    cols[5].push((rep % 4) as f64);
                    cols[6].push((i % 3) as f64);
                    i += 1;
                }
            }
        }
        let names = ["y", "female", "post", "time", "w", "h", "psu"];
        Frame::from_columns(names.into_iter().zip(cols)).unwrap()
    }

    fn spec() -> ItsaSpec {
        ItsaSpec::meps("y", 2016, 2019)
    }

    fn design() -> SurveyDesign {
        let ds = DesignSpec { weights: "w".into(), strata: Some("h".into()), clusters: Some("psu".into()) };
        SurveyDesign::new(frame(), ds, SingletonMethod::Adjust).unwrap()
    }

    #[test]
    fn test_formulas() {
        let s = spec();
        assert_eq!(
            s.triple_formula().unwrap().to_string(),
            "y ~ female + post + time + post:female + female:time + post:female:time"
        );
        assert_eq!(
            s.spline_formula().unwrap().to_string(),
            "y ~ female + post + female:post + time + female:time + time_post + female:time_post"
        );
        assert_eq!(s.knot_time, 3.0);
        assert_eq!(s.cutoff_year(), 2019.0);
    }

    #[test]
    fn test_add_spline_columns() {
        let mut f = frame();
        spec().add_spline_columns(&mut f).unwrap();
        let tp = f.column("time_post").unwrap();
        let t = f.column("time").unwrap();
        assert!(t.iter().zip(tp).all(|(t, tp)| *tp == (t - 3.0).max(0.0)));
    }

    #[test]
    fn test_triple_and_spline_did_close() {
        let d = design();
        let res = ItsaAnalysis::new(spec()).fit(&d).unwrap();
        assert_relative_eq!(res.effects.did_triple.estimate, 4.0, epsilon = 0.5);
        assert_relative_eq!(res.effects.did_spline.estimate, 4.0, epsilon = 0.5);
        // The fixture noise moves the two specifications apart by about half a unit.
        assert!(res.effects.did_gap < 1.0);
        // No reference-group slope change in the data.
        assert!(res.effects.slope_change.estimate.abs() < 1.0);
        assert_eq!(res.triple.fit.coefficients.len(), 7);
        assert_eq!(res.spline.fit.coefficients.len(), 8);
        assert_eq!(res.caveats.len(), 1);
    }

    #[test]
    fn test_slopes_by_group_and_period() {
        let d = design();
        let res = ItsaAnalysis::new(spec()).fit(&d).unwrap();
        assert_eq!(res.spline.margins.slopes.len(), 4);
        assert_eq!(res.spline.margins.group_difference.len(), 2);
        let [pre_t, post_t] = res.spline.margins.period_mean_time;
        assert_relative_eq!(pre_t, 1.0, epsilon = 1e-12);
        assert_relative_eq!(post_t, 4.0, epsilon = 1e-12);
        // Slopes in order (group, period): 5, 5, 7, 11.
        let want = [5.0, 5.0, 7.0, 11.0];
        for (m, w) in res.spline.margins.slopes.iter().zip(want) {
            assert_relative_eq!(m.estimate.estimate, w, epsilon = 0.5);
        }
        for (a, b) in res.triple.margins.slopes.iter().zip(&res.spline.margins.slopes) {
            assert_relative_eq!(a.estimate.estimate, b.estimate.estimate, epsilon = 0.5);
        }
        let s = &res.spline.margins.slopes[3];
        assert_eq!(s.at_value("female"), Some(1.0));
        assert_eq!(s.at_value("post"), Some(1.0));
    }

    #[test]
    fn test_segments_cover_pre_post_and_counterfactual() {
        let d = design();
        let a = ItsaAnalysis::new(spec());
        let fit = a.fit_spline(&d).unwrap();
        let segs = a.segments(&fit).unwrap();
        assert_eq!(segs.len(), 6);
        let pre = &segs[0];
        assert_eq!(pre.kind, SegmentKind::Pre);
        assert_eq!(pre.points.iter().map(|p| p.time).collect::<Vec<_>>(), vec![0.0, 1.0, 2.0, 3.0]);
        let cf = segs.iter().find(|s| s.kind == SegmentKind::Counterfactual && s.group == 1.0).unwrap();
        let post = segs.iter().find(|s| s.kind == SegmentKind::Post && s.group == 1.0).unwrap();
        assert_eq!(cf.points.len(), 3);
        assert_eq!(cf.points[0].year, 2019.0);
        // Counterfactual starts where the pre line ends.
        let pre1 = segs.iter().find(|s| s.kind == SegmentKind::Pre && s.group == 1.0).unwrap();
        assert_relative_eq!(
            cf.points[0].estimate.estimate,
            pre1.points.last().unwrap().estimate.estimate,
            epsilon = 1e-9
        );
        assert!(post.points[2].estimate.estimate > cf.points[2].estimate.estimate);
    }

    #[test]
    fn test_counterfactual_extends_pre_trend() {
        let d = design();
        let a = ItsaAnalysis::new(spec());
        let fit = a.fit_spline(&d).unwrap();
        let segs = a.segments(&fit).unwrap();
        let slope = |s: &Segment| {
            let (p0, p1) = (&s.points[0], &s.points[1]);
            (p1.estimate.estimate - p0.estimate.estimate) / (p1.time - p0.time)
        };
        for g in [0.0, 1.0] {
            let find = |kind| segs.iter().find(|s| s.kind == kind && s.group == g).unwrap();
            let (pre, cf, post) =
                (find(SegmentKind::Pre), find(SegmentKind::Counterfactual), find(SegmentKind::Post));
            assert_relative_eq!(slope(cf), slope(pre), epsilon = 1e-9);
            assert_relative_eq!(
                slope(cf),
                fit.estimate("time").unwrap().estimate + g * fit.estimate("female:time").unwrap().estimate,
                epsilon = 1e-9
            );
            assert_relative_eq!(
                slope(post) - slope(cf),
                fit.estimate("time_post").unwrap().estimate
                    + g * fit.estimate("female:time_post").unwrap().estimate,
                epsilon = 1e-9
            );
        }
    }

    #[test]
    fn test_descriptives_by_group_and_time() {
        let d = design();
        let desc = ItsaAnalysis::new(spec()).describe(&d).unwrap();
        assert_eq!(desc.population_by_group.len(), 2);
        assert_eq!(desc.population_by_group_period.len(), 4);
        assert_eq!(desc.mean_by_group_time.len(), 12);
        let total: f64 = desc.population_by_group.iter().map(|e| e.estimate.estimate).sum();
        assert_relative_eq!(total, d.weights().iter().sum::<f64>(), epsilon = 1e-9);
    }

    #[test]
    fn test_inconsistent_period_rejected() {
        let mut f = frame();
        let mut post = f.column("post").unwrap().to_vec();
        post[0] = 1.0;
        f.insert("post", post).unwrap();
        assert!(spec().validate(&f).is_err());
    }
}
