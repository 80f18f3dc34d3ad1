//! # svy-viz
//!
//! Visualization data artifacts for svyts.
//!
//! This crate is intentionally dependency-light and focuses on emitting
//! plot-friendly JSON structures (arrays instead of nested objects).

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Interrupted time-series plot artifact (weighted means, fitted segments, counterfactuals).
pub mod itsa;

pub use itsa::{GroupSeries, ItsaPlotArtifact, ItsaPlotMeta, LinePoint, MeanPoint, PlotLabels};
