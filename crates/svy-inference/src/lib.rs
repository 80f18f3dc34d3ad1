//! # svy-inference
//!
//! Design-based inference for complex surveys.
//!
//! This crate provides:
//! - Survey designs (weights, strata, PSUs) and Taylor-linearised variance
//! - Weighted totals and means, overall and by domain
//! - Model formulas and survey-weighted linear regression
//! - Average predictive margins and marginal effects
//! - Two-group interrupted time-series models (triple interaction and
//!   linear spline)

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Wilkinson-style formulas and model matrices.
pub mod formula;
/// Survey-weighted linear regression.
pub mod glm;
/// Interrupted time-series analysis.
pub mod itsa;
/// Margins and marginal effects.
pub mod margins;
/// Survey designs and descriptive estimators.
pub mod survey;

pub use formula::{Derived, Formula, INTERCEPT, Term};
pub use glm::{FitSummary, SurveyFit, svyglm};
pub use itsa::{
    Descriptives, ItsaAnalysis, ItsaEffects, ItsaMargins, ItsaModel, ItsaResults, ItsaSpec,
    SLOPE_EQUALITY_CAVEAT, Segment, SegmentKind, SegmentPoint,
};
pub use margins::{EffectKind, MarginEstimate, Margins};
pub use survey::{DesignSpec, DesignSummary, DomainEstimate, SingletonMethod, Statistic, SurveyDesign};
