//! `svyts run`: extracts → pooled table → fit → plot, in one output directory.

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use svy_core::Estimate;
use svy_data::export::write_pooled_csv;
use svy_data::fetch::sha256_file;
use svy_data::{
    Catalog, FetchOptions, FetchedExtracts, FrameReport, LinkReport, LinkageSchema,
    SimulationConfig, build_pooled, fetch_all, simulate_extracts,
};
use svy_inference::{DesignSummary, ItsaAnalysis, SingletonMethod};
use svy_viz::{ItsaPlotArtifact, PlotLabels};
use svy_viz_render::{Format, PlotKind};

use crate::analysis::{self, AnalysisOptions};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    /// Output directory for this run.
    pub out_dir: PathBuf,

    /// Allow writing into a non-empty `out_dir` (overwrites known filenames).
    #[serde(default)]
    pub overwrite: bool,

    /// Extract cache; extracts missing from it are downloaded.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    #[serde(default)]
    pub force_download: bool,

    /// Generate synthetic extracts under `out_dir/inputs` instead.
    #[serde(default)]
    pub simulate: Option<SimulationConfig>,

    #[serde(default = "default_years")]
    pub years: Vec<i32>,
    #[serde(default = "default_cutoff")]
    pub cutoff: i32,
    #[serde(default = "default_outcome")]
    pub outcome: String,
    #[serde(default)]
    pub singleton: SingletonMethod,
    #[serde(default = "default_level")]
    pub level: f64,

    #[serde(default)]
    pub labels: PlotLabels,
    /// Plot config overrides (same keys as `--viz-config`).
    #[serde(default)]
    pub viz: Option<serde_yaml_ng::Value>,
    #[serde(default = "default_plot_formats")]
    pub plot_formats: Vec<Format>,
}

fn default_years() -> Vec<i32> {
    (2016..=2021).collect()
}

fn default_cutoff() -> i32 {
    2019
}

fn default_outcome() -> String {
    "totexp".to_string()
}

fn default_level() -> f64 {
    0.95
}

fn default_plot_formats() -> Vec<Format> {
    vec![Format::Svg]
}

pub fn read_run_config(path: &Path) -> Result<RunConfig> {
    let bytes = std::fs::read(path)?;
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("").to_ascii_lowercase();
    let cfg: RunConfig = if ext == "json" {
        serde_json::from_slice(&bytes)?
    } else {
        serde_yaml_ng::from_slice(&bytes)?
    };
    Ok(cfg)
}

#[derive(Debug, Clone, Serialize)]
pub struct FileRecord {
    pub role: String,
    pub path: String,
    pub bytes: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub tool_version: String,
    /// `simulate` or `cache`.
    pub source: String,
    pub years: Vec<i32>,
    pub cutoff: i32,
    pub link: LinkReport,
    pub frame: FrameReport,
    pub design: DesignSummary,
    pub did_triple: Estimate,
    pub did_spline: Estimate,
    pub inputs: Vec<FileRecord>,
    pub outputs: Vec<FileRecord>,
}

fn ensure_empty_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        if !dir.is_dir() {
            anyhow::bail!("out_dir exists but is not a directory: {}", dir.display());
        }
        if dir.read_dir()?.next().is_some() {
            anyhow::bail!("out_dir must be empty (set overwrite: true to reuse it): {}", dir.display());
        }
    } else {
        std::fs::create_dir_all(dir)?;
    }
    Ok(())
}

fn rel_display(root: &Path, p: &Path) -> String {
    p.strip_prefix(root).unwrap_or(p).display().to_string()
}

fn record(root: &Path, role: &str, path: &Path) -> Result<FileRecord> {
    Ok(FileRecord {
        role: role.to_string(),
        path: rel_display(root, path),
        bytes: std::fs::metadata(path)?.len(),
        sha256: sha256_file(path)?,
    })
}

fn validate(cfg: &RunConfig) -> Result<()> {
    match (&cfg.cache_dir, &cfg.simulate) {
        (Some(_), Some(_)) => anyhow::bail!("set either cache_dir or simulate, not both"),
        (None, None) => anyhow::bail!("one of cache_dir or simulate is required"),
        _ => {}
    }
    if cfg.years.is_empty() {
        anyhow::bail!("years must not be empty");
    }
    if !cfg.years.contains(&cfg.cutoff) {
        anyhow::bail!("cutoff {} is not one of the run years {:?}", cfg.cutoff, cfg.years);
    }
    if cfg.plot_formats.is_empty() {
        anyhow::bail!("plot_formats must name at least one format");
    }
    Ok(())
}

fn acquire(cfg: &RunConfig, out_dir: &Path) -> Result<(String, FetchedExtracts)> {
    if let Some(sim) = &cfg.simulate {
        let sim = SimulationConfig { years: cfg.years.clone(), cutoff: cfg.cutoff, ..sim.clone() };
        let dir = out_dir.join("inputs");
        std::fs::create_dir_all(&dir)?;
        let summary = simulate_extracts(&sim, &dir)?;
        tracing::info!(persons = summary.persons, records = summary.records, "simulated extracts");
        let extracts = FetchedExtracts { full_year: summary.full_year, linkage: summary.linkage };
        return Ok(("simulate".to_string(), extracts));
    }
    let cache_dir = cfg.cache_dir.clone().unwrap_or_default();
    let catalog = Catalog::meps().with_years(&cfg.years)?;
    let opts = FetchOptions { force: cfg.force_download, ..FetchOptions::new(cache_dir) };
    Ok(("cache".to_string(), fetch_all(&catalog, &opts)?))
}

pub fn run(cfg: &RunConfig) -> Result<RunReport> {
    validate(cfg)?;
    let out_dir = cfg.out_dir.as_path();
    if cfg.overwrite {
        std::fs::create_dir_all(out_dir)?;
    } else {
        ensure_empty_dir(out_dir)?;
    }

    let (source, extracts) = acquire(cfg, out_dir)?;
    let mut inputs = Vec::new();
    for (year, path) in &extracts.full_year {
        inputs.push(record(out_dir, &format!("full_year_{year}"), path)?);
    }
    inputs.push(record(out_dir, "linkage", &extracts.linkage)?);

    let (pooled, link) = build_pooled(&extracts, cfg.cutoff, &LinkageSchema::default())?;
    if link.unmatched > 0 {
        tracing::warn!(unmatched = link.unmatched, "records without design codes are dropped");
    }
    let mut outputs = Vec::new();
    let pooled_csv = out_dir.join("pooled.csv");
    write_pooled_csv(&pooled, &pooled_csv)?;
    outputs.push(record(out_dir, "pooled", &pooled_csv)?);

    let opts = AnalysisOptions {
        outcome: cfg.outcome.clone(),
        cutoff: Some(cfg.cutoff),
        base_year: None,
        singleton: cfg.singleton,
        level: cfg.level,
    };
    let prepared = analysis::from_pooled(&pooled, &opts)?;
    let results = ItsaAnalysis::new(prepared.spec.clone()).fit(&prepared.design)?;
    let results_json = out_dir.join("results.json");
    std::fs::write(&results_json, serde_json::to_string_pretty(&results)?)?;
    outputs.push(record(out_dir, "results", &results_json)?);

    let artifact = ItsaPlotArtifact::from_results(&results, &cfg.labels);
    let artifact_json = serde_json::to_string_pretty(&artifact)?;
    let artifact_path = out_dir.join("itsa_plot.json");
    std::fs::write(&artifact_path, &artifact_json)?;
    outputs.push(record(out_dir, "plot_artifact", &artifact_path)?);

    let viz_yaml = cfg.viz.as_ref().map(serde_yaml_ng::to_string).transpose()?;
    let viz = svy_viz_render::config::resolve_config(viz_yaml.as_deref())?;
    for format in &cfg.plot_formats {
        let path = out_dir.join(format!("itsa.{}", format.extension()));
        svy_viz_render::render_to_file(&artifact_json, PlotKind::Itsa, &path, &viz)?;
        outputs.push(record(out_dir, "plot", &path)?);
    }

    let report = RunReport {
        tool_version: svy_core::VERSION.to_string(),
        source,
        years: cfg.years.clone(),
        cutoff: cfg.cutoff,
        link,
        frame: prepared.frame,
        design: results.design.clone(),
        did_triple: results.effects.did_triple.clone(),
        did_spline: results.effects.did_spline.clone(),
        inputs,
        outputs,
    };
    std::fs::write(out_dir.join("run.json"), serde_json::to_string_pretty(&report)?)?;
    tracing::info!(out_dir = %out_dir.display(), "run complete");
    Ok(report)
}
