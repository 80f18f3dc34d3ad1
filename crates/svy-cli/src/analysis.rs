//! Pooled table → analysis frame → survey design, shared by the analysis
//! subcommands and `run`.

use std::path::Path;

use anyhow::Result;
use svy_data::export::read_pooled_csv;
use svy_data::{FrameOptions, FrameReport, PooledTable, to_frame};
use svy_inference::{DesignSpec, ItsaSpec, SingletonMethod, SurveyDesign};

#[derive(Debug, Clone)]
pub struct AnalysisOptions {
    pub outcome: String,
    /// Cutoff year; inferred from the period column when absent.
    pub cutoff: Option<i32>,
    /// Year at `time = 0`; the first pooled year when absent.
    pub base_year: Option<i32>,
    pub singleton: SingletonMethod,
    pub level: f64,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            outcome: "totexp".into(),
            cutoff: None,
            base_year: None,
            singleton: SingletonMethod::default(),
            level: 0.95,
        }
    }
}

pub struct Prepared {
    pub design: SurveyDesign,
    pub spec: ItsaSpec,
    pub frame: FrameReport,
}

pub fn from_pooled(pooled: &PooledTable, opts: &AnalysisOptions) -> Result<Prepared> {
    let frame_opts = FrameOptions { base_year: opts.base_year, ..FrameOptions::default() };
    let (frame, report) = to_frame(pooled, &frame_opts)?;
    tracing::info!(
        rows = report.rows,
        dropped_unlinked = report.dropped_unlinked,
        base_year = report.base_year,
        "analysis frame"
    );
    if !frame.contains(&opts.outcome) {
        let names: Vec<&str> = frame.names().collect();
        anyhow::bail!("outcome '{}' is not a frame column (have: {})", opts.outcome, names.join(", "));
    }
    let spec = ItsaSpec::meps(&opts.outcome, report.base_year, pooled.cutoff);
    let design = SurveyDesign::new(frame, DesignSpec::meps_pooled(), opts.singleton)?
        .with_confidence_level(opts.level)?;
    Ok(Prepared { design, spec, frame: report })
}

pub fn load(path: &Path, opts: &AnalysisOptions) -> Result<Prepared> {
    let pooled = read_pooled_csv(path, opts.cutoff)?;
    tracing::info!(path = %path.display(), rows = pooled.len(), cutoff = pooled.cutoff, "pooled table");
    from_pooled(&pooled, opts)
}
