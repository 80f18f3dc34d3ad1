use serde::{Deserialize, Serialize};

use svy_core::Estimate;
use svy_inference::{ItsaResults, SegmentKind, SegmentPoint};

/// Schema tag written into every ITSA artifact.
pub const SCHEMA_VERSION: &str = "svyts_itsa_plot_v1";

/// Provenance of an artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItsaPlotMeta {
    /// Producing tool.
    pub tool: String,
    /// Tool version.
    pub tool_version: String,
    /// Artifact schema tag.
    pub schema_version: String,
    /// Outcome variable.
    pub outcome: String,
    /// Confidence level of every band in the artifact.
    pub level: f64,
}

/// Display strings for the plot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlotLabels {
    /// Plot title.
    pub title: String,
    /// Labels for group `0` and group `1`.
    pub groups: [String; 2],
    /// X axis label.
    pub x_label: String,
    /// Y axis label; defaults to the outcome name when empty.
    pub y_label: String,
    /// Text next to the intervention line.
    pub intervention: String,
}

impl Default for PlotLabels {
    fn default() -> Self {
        Self {
            title: String::new(),
            groups: ["Male".into(), "Female".into()],
            x_label: "Year".into(),
            y_label: String::new(),
            intervention: "Intervention".into(),
        }
    }
}

/// Weighted mean of the outcome in one year.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeanPoint {
    /// Calendar year.
    pub year: f64,
    /// Weighted mean.
    pub mean: f64,
    /// Lower confidence bound.
    pub ci_lower: f64,
    /// Upper confidence bound.
    pub ci_upper: f64,
    /// Unweighted record count.
    pub n: usize,
}

/// One point on a fitted line.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinePoint {
    /// Calendar year.
    pub year: f64,
    /// Fitted value.
    pub fit: f64,
    /// Lower confidence bound.
    pub ci_lower: f64,
    /// Upper confidence bound.
    pub ci_upper: f64,
}

impl From<&SegmentPoint> for LinePoint {
    fn from(p: &SegmentPoint) -> Self {
        Self {
            year: p.year,
            fit: p.estimate.estimate,
            ci_lower: p.estimate.ci_lower,
            ci_upper: p.estimate.ci_upper,
        }
    }
}

/// Observed means and fitted lines for one group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSeries {
    /// Group indicator value.
    pub group: f64,
    /// Legend label.
    pub label: String,
    /// Observed weighted means, by year.
    pub means: Vec<MeanPoint>,
    /// Fitted pre-intervention line.
    pub pre: Vec<LinePoint>,
    /// Fitted post-intervention line.
    pub post: Vec<LinePoint>,
    /// Pre-intervention trend carried over the post period.
    pub counterfactual: Vec<LinePoint>,
}

impl GroupSeries {
    fn points(&self) -> impl Iterator<Item = (f64, f64, f64)> + '_ {
        let means = self.means.iter().map(|m| (m.year, m.ci_lower, m.ci_upper));
        let lines = self
            .pre
            .iter()
            .chain(&self.post)
            .chain(&self.counterfactual)
            .map(|p| (p.year, p.ci_lower, p.ci_upper));
        means.chain(lines)
    }
}

/// Plot-friendly ITSA trajectory artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItsaPlotArtifact {
    /// Provenance.
    pub meta: ItsaPlotMeta,
    /// Plot title.
    pub title: String,
    /// X axis label.
    pub x_label: String,
    /// Y axis label.
    pub y_label: String,
    /// First post-intervention year.
    pub cutoff_year: f64,
    /// Text next to the intervention line.
    pub intervention_label: String,
    /// One entry per group, group `0` first.
    pub groups: Vec<GroupSeries>,
    /// Difference-in-differences summary line.
    pub annotation: Option<String>,
}

impl ItsaPlotArtifact {
    /// Build from a finished analysis.
    ///
    /// Observed means come from the by-year descriptives; lines come from the
    /// spline model's segments. The annotation reports the triple-interaction DiD.
    pub fn from_results(results: &ItsaResults, labels: &PlotLabels) -> Self {
        let spec = &results.spec;
        let groups = [0.0, 1.0]
            .into_iter()
            .zip(&labels.groups)
            .map(|(g, label)| {
                let mut means: Vec<MeanPoint> = results
                    .descriptives
                    .mean_by_group_time
                    .iter()
                    .filter(|d| d.value(&spec.group) == Some(g))
                    .filter_map(|d| {
                        let t = d.value(&spec.time)?;
                        Some(MeanPoint {
                            year: f64::from(spec.base_year) + t,
                            mean: d.estimate.estimate,
                            ci_lower: d.estimate.ci_lower,
                            ci_upper: d.estimate.ci_upper,
                            n: d.n,
                        })
                    })
                    .collect();
                means.sort_by(|a, b| a.year.total_cmp(&b.year));

                let line = |kind: SegmentKind| -> Vec<LinePoint> {
                    results
                        .segments
                        .iter()
                        .find(|s| s.group == g && s.kind == kind)
                        .map(|s| s.points.iter().map(LinePoint::from).collect())
                        .unwrap_or_default()
                };
                GroupSeries {
                    group: g,
                    label: label.clone(),
                    means,
                    pre: line(SegmentKind::Pre),
                    post: line(SegmentKind::Post),
                    counterfactual: line(SegmentKind::Counterfactual),
                }
            })
            .collect();

        let did = &results.effects.did_triple;
        let y_label =
            if labels.y_label.is_empty() { spec.outcome.clone() } else { labels.y_label.clone() };
        Self {
            meta: ItsaPlotMeta {
                tool: "svyts".into(),
                tool_version: env!("CARGO_PKG_VERSION").into(),
                schema_version: SCHEMA_VERSION.into(),
                outcome: spec.outcome.clone(),
                level: did.level,
            },
            title: labels.title.clone(),
            x_label: labels.x_label.clone(),
            y_label,
            cutoff_year: spec.cutoff_year(),
            intervention_label: labels.intervention.clone(),
            groups,
            annotation: Some(did_annotation(did)),
        }
    }

    /// `(x_min, x_max, y_min, y_max)` over every point and band, plus the cutoff.
    ///
    /// Returns `None` when the artifact holds no finite points.
    pub fn data_bounds(&self) -> Option<(f64, f64, f64, f64)> {
        let mut b = (f64::INFINITY, f64::NEG_INFINITY, f64::INFINITY, f64::NEG_INFINITY);
        let mut any = false;
        for (x, lo, hi) in self.groups.iter().flat_map(GroupSeries::points) {
            if !(x.is_finite() && lo.is_finite() && hi.is_finite()) {
                continue;
            }
            any = true;
            b.0 = b.0.min(x);
            b.1 = b.1.max(x);
            b.2 = b.2.min(lo);
            b.3 = b.3.max(hi);
        }
        if !any {
            return None;
        }
        if self.cutoff_year.is_finite() {
            b.0 = b.0.min(self.cutoff_year);
            b.1 = b.1.max(self.cutoff_year);
        }
        Some(b)
    }
}

fn did_annotation(did: &Estimate) -> String {
    format!(
        "DiD {:.1} ({:.0}% CI {:.1} to {:.1}), p = {:.3}",
        did.estimate,
        did.level * 100.0,
        did.ci_lower,
        did.ci_upper,
        did.p_value
    )
}
