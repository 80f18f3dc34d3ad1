//! svyts CLI

mod analysis;
mod run;
mod table;

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::json;
use svy_core::Estimate;
use svy_data::export::write_pooled_csv;
use svy_data::fetch::sha256_file;
use svy_data::{
    Catalog, FetchOptions, LinkageSchema, SimulationConfig, build_pooled, fetch_all,
    simulate_extracts,
};
use svy_inference::{ItsaAnalysis, ItsaModel, ItsaResults, SingletonMethod};
use svy_viz::{ItsaPlotArtifact, PlotLabels};
use svy_viz_render::PlotKind;
use svy_viz_render::config::VizConfig;

use crate::analysis::{AnalysisOptions, Prepared};

#[derive(Parser)]
#[command(name = "svyts")]
#[command(about = "svyts - interrupted time-series analysis of pooled MEPS survey data")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download (or locate cached) MEPS full-year and linkage extracts
    Fetch {
        /// Extract cache directory
        #[arg(long)]
        cache_dir: PathBuf,

        /// Survey years, comma separated (default: every catalogued year)
        #[arg(long, value_delimiter = ',')]
        years: Vec<i32>,

        /// Re-download even when a cached copy exists
        #[arg(long)]
        force: bool,

        /// HTTP timeout in seconds
        #[arg(long, default_value = "300")]
        timeout: u64,

        /// Output file for the extract list (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Write synthetic MEPS-shaped extracts with known effects
    Simulate {
        /// Directory for the extracts (usable as a fetch cache)
        #[arg(long)]
        out_dir: PathBuf,

        /// Simulation settings (YAML or JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// RNG seed (overrides the config)
        #[arg(long)]
        seed: Option<u64>,

        /// Persons per panel (overrides the config)
        #[arg(long)]
        persons_per_panel: Option<usize>,

        /// Output file for the summary (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Pool cached extracts and attach design codes
    Pool {
        /// Extract cache directory
        #[arg(long)]
        cache_dir: PathBuf,

        /// Survey years, comma separated (default: every catalogued year)
        #[arg(long, value_delimiter = ',')]
        years: Vec<i32>,

        /// First post-intervention year
        #[arg(long, default_value = "2019")]
        cutoff: i32,

        /// Pooled table to write (`.csv`, or `.parquet` with the `parquet` feature)
        #[arg(long)]
        pooled: PathBuf,

        /// Re-download extracts even when cached
        #[arg(long)]
        force: bool,

        /// Output file for the summary (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Weighted population sizes and outcome means by group, period and year
    Describe {
        #[command(flatten)]
        analysis: AnalysisArgs,

        #[command(flatten)]
        out: OutputArgs,
    },

    /// Fit the survey-weighted ITSA models
    Fit {
        #[command(flatten)]
        analysis: AnalysisArgs,

        /// Which parameterisation to fit
        #[arg(long, value_enum, default_value = "both")]
        model: ModelArg,

        #[command(flatten)]
        out: OutputArgs,
    },

    /// Group differences and slopes by period
    Margins {
        #[command(flatten)]
        analysis: AnalysisArgs,

        /// Which parameterisation to use
        #[arg(long, value_enum, default_value = "both")]
        model: ModelArg,

        #[command(flatten)]
        out: OutputArgs,
    },

    /// Render the ITSA trajectory plot
    #[command(group = clap::ArgGroup::new("source").required(true).args(["results", "artifact"]))]
    Plot {
        /// Results JSON written by `fit`
        #[arg(long)]
        results: Option<PathBuf>,

        /// Plot artifact JSON (e.g. from `--save-artifact`)
        #[arg(long)]
        artifact: Option<PathBuf>,

        /// Output image; the format follows the extension (`.svg`, `.png`)
        #[arg(short, long)]
        output: PathBuf,

        /// Plot config (YAML)
        #[arg(long)]
        viz_config: Option<PathBuf>,

        /// Built-in theme (svyts, minimal, print)
        #[arg(long)]
        theme: Option<String>,

        /// Plot title
        #[arg(long)]
        title: Option<String>,

        /// Also write the plot artifact JSON here
        #[arg(long)]
        save_artifact: Option<PathBuf>,
    },

    /// Run the whole pipeline from a config file (YAML or JSON)
    Run {
        #[arg(long)]
        config: PathBuf,
    },

    /// Print version and enabled features
    Version,
}

#[derive(Args)]
struct AnalysisArgs {
    /// Pooled table (CSV written by `pool`)
    #[arg(short, long)]
    input: PathBuf,

    /// Outcome column
    #[arg(long, default_value = "totexp")]
    outcome: String,

    /// First post-intervention year (default: inferred from the period column)
    #[arg(long)]
    cutoff: Option<i32>,

    /// Year at time 0 (default: first pooled year)
    #[arg(long)]
    base_year: Option<i32>,

    /// Treatment of single-PSU strata
    #[arg(long, value_enum, default_value = "adjust")]
    singleton: SingletonArg,

    /// Confidence level
    #[arg(long, default_value = "0.95")]
    level: f64,
}

impl AnalysisArgs {
    fn options(&self) -> AnalysisOptions {
        AnalysisOptions {
            outcome: self.outcome.clone(),
            cutoff: self.cutoff,
            base_year: self.base_year,
            singleton: self.singleton.into(),
            level: self.level,
        }
    }

    fn prepare(&self) -> Result<Prepared> {
        analysis::load(&self.input, &self.options())
    }
}

#[derive(Args)]
struct OutputArgs {
    /// Output file. Defaults to stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Plain-text tables instead of JSON
    #[arg(long)]
    table: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum SingletonArg {
    Fail,
    Remove,
    Certainty,
    Adjust,
    Average,
}

impl From<SingletonArg> for SingletonMethod {
    fn from(a: SingletonArg) -> Self {
        match a {
            SingletonArg::Fail => SingletonMethod::Fail,
            SingletonArg::Remove => SingletonMethod::Remove,
            SingletonArg::Certainty => SingletonMethod::Certainty,
            SingletonArg::Adjust => SingletonMethod::Adjust,
            SingletonArg::Average => SingletonMethod::Average,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ModelArg {
    Triple,
    Spline,
    Both,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Fetch { cache_dir, years, force, timeout, output } => {
            cmd_fetch(cache_dir, &years, force, timeout, output.as_ref())
        }
        Commands::Simulate { out_dir, config, seed, persons_per_panel, output } => {
            cmd_simulate(&out_dir, config.as_deref(), seed, persons_per_panel, output.as_ref())
        }
        Commands::Pool { cache_dir, years, cutoff, pooled, force, output } => {
            cmd_pool(cache_dir, &years, cutoff, &pooled, force, output.as_ref())
        }
        Commands::Describe { analysis, out } => cmd_describe(&analysis, &out),
        Commands::Fit { analysis, model, out } => cmd_fit(&analysis, model, &out),
        Commands::Margins { analysis, model, out } => cmd_margins(&analysis, model, &out),
        Commands::Plot { results, artifact, output, viz_config, theme, title, save_artifact } => {
            cmd_plot(
                results.as_deref(),
                artifact.as_deref(),
                &output,
                viz_config.as_deref(),
                theme.as_deref(),
                title,
                save_artifact.as_deref(),
            )
        }
        Commands::Run { config } => cmd_run(&config),
        Commands::Version => cmd_version(),
    }
}

fn write_json(output: Option<&PathBuf>, value: serde_json::Value) -> Result<()> {
    if let Some(path) = output {
        std::fs::write(path, serde_json::to_string_pretty(&value)?)?;
    } else {
        println!("{}", serde_json::to_string_pretty(&value)?);
    }
    Ok(())
}

/// JSON by default, or the text produced by `text` under `--table`.
fn emit<T: Serialize>(out: &OutputArgs, value: &T, text: impl FnOnce() -> String) -> Result<()> {
    if !out.table {
        return write_json(out.output.as_ref(), serde_json::to_value(value)?);
    }
    let text = text();
    if let Some(path) = &out.output {
        std::fs::write(path, text)?;
    } else {
        print!("{text}");
    }
    Ok(())
}

fn catalog(years: &[i32]) -> Result<Catalog> {
    let catalog = Catalog::meps();
    if years.is_empty() { Ok(catalog) } else { Ok(catalog.with_years(years)?) }
}

fn cmd_fetch(
    cache_dir: PathBuf,
    years: &[i32],
    force: bool,
    timeout: u64,
    output: Option<&PathBuf>,
) -> Result<()> {
    let catalog = catalog(years)?;
    let opts = FetchOptions { force, timeout_secs: timeout, ..FetchOptions::new(cache_dir) };
    let fetched = fetch_all(&catalog, &opts)?;
    let mut files = Vec::new();
    for (year, path) in &fetched.full_year {
        let sha256 = sha256_file(path)?;
        files.push(json!({ "role": "full_year", "year": year, "path": path, "sha256": sha256 }));
    }
    let sha256 = sha256_file(&fetched.linkage)?;
    files.push(json!({ "role": "linkage", "path": fetched.linkage, "sha256": sha256 }));
    write_json(output, json!({ "cache_dir": opts.cache_dir, "files": files }))
}

fn read_simulation_config(path: &Path) -> Result<SimulationConfig> {
    let bytes = std::fs::read(path)?;
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("").to_ascii_lowercase();
    if ext == "json" {
        Ok(serde_json::from_slice(&bytes)?)
    } else {
        Ok(serde_yaml_ng::from_slice(&bytes)?)
    }
}

fn cmd_simulate(
    out_dir: &Path,
    config: Option<&Path>,
    seed: Option<u64>,
    persons_per_panel: Option<usize>,
    output: Option<&PathBuf>,
) -> Result<()> {
    let mut cfg = config.map(read_simulation_config).transpose()?.unwrap_or_default();
    if let Some(seed) = seed {
        cfg.seed = seed;
    }
    if let Some(n) = persons_per_panel {
        cfg.persons_per_panel = n;
    }
    std::fs::create_dir_all(out_dir)?;
    let summary = simulate_extracts(&cfg, out_dir)?;
    write_json(output, serde_json::to_value(&summary)?)
}

fn cmd_pool(
    cache_dir: PathBuf,
    years: &[i32],
    cutoff: i32,
    pooled_path: &Path,
    force: bool,
    output: Option<&PathBuf>,
) -> Result<()> {
    let catalog = catalog(years)?;
    let opts = FetchOptions { force, ..FetchOptions::new(cache_dir) };
    let extracts = fetch_all(&catalog, &opts)?;
    let (pooled, link) = build_pooled(&extracts, cutoff, &LinkageSchema::default())?;
    if link.unmatched > 0 {
        tracing::warn!(unmatched = link.unmatched, "records without design codes");
    }

    let ext =
        pooled_path.extension().and_then(|s| s.to_str()).unwrap_or("").to_ascii_lowercase();
    if let Some(parent) = pooled_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    match ext.as_str() {
        "csv" => write_pooled_csv(&pooled, pooled_path)?,
        #[cfg(feature = "parquet")]
        "parquet" => svy_data::export::write_pooled_parquet(&pooled, pooled_path)?,
        other => anyhow::bail!(
            "unsupported pooled table format '{other}' (use .csv{})",
            if cfg!(feature = "parquet") { " or .parquet" } else { "" }
        ),
    }

    write_json(
        output,
        json!({
            "pooled": pooled_path,
            "records": pooled.len(),
            "years": pooled.years,
            "cutoff": pooled.cutoff,
            "link": link,
        }),
    )
}

fn cmd_describe(args: &AnalysisArgs, out: &OutputArgs) -> Result<()> {
    let p = args.prepare()?;
    let descriptives = ItsaAnalysis::new(p.spec.clone()).describe(&p.design)?;
    let design = p.design.summary();
    let value = json!({ "spec": p.spec, "frame": p.frame, "design": design, "descriptives": descriptives });
    emit(out, &value, || {
        let outcome = &p.spec.outcome;
        [
            table::design(&design),
            table::domains("Population by group", &descriptives.population_by_group),
            table::domains(
                "Population by group and period",
                &descriptives.population_by_group_period,
            ),
            table::domains(
                &format!("Mean {outcome} by group and period"),
                &descriptives.mean_by_group_period,
            ),
            table::domains(
                &format!("Mean {outcome} by group and time"),
                &descriptives.mean_by_group_time,
            ),
        ]
        .join("\n")
    })
}

fn fit_model(p: &Prepared, which: ModelArg) -> Result<ItsaModel> {
    let analysis = ItsaAnalysis::new(p.spec.clone());
    let (name, fit) = match which {
        ModelArg::Spline => ("spline", analysis.fit_spline(&p.design)?),
        _ => ("triple", analysis.fit_triple(&p.design)?),
    };
    let period_mean_time = analysis.period_mean_time(&p.design)?;
    Ok(ItsaModel {
        name: name.to_string(),
        fit: fit.summary()?,
        margins: analysis.margins(&fit, period_mean_time)?,
    })
}

fn effects_table(results: &ItsaResults) -> String {
    let e = &results.effects;
    let relabel = |label: &str, est: &Estimate| Estimate { term: label.to_string(), ..est.clone() };
    let rows = [
        relabel("DiD (triple interaction)", &e.did_triple),
        relabel("DiD (spline)", &e.did_spline),
        relabel("Level change at cutoff", &e.level_change),
        relabel("Level change difference", &e.level_change_difference),
        relabel("Slope change", &e.slope_change),
    ];
    let mut out = table::estimates("Headline effects", &rows);
    for caveat in &results.caveats {
        out.push_str(&format!("Note: {caveat}\n"));
    }
    out
}

fn cmd_fit(args: &AnalysisArgs, model: ModelArg, out: &OutputArgs) -> Result<()> {
    let p = args.prepare()?;
    if model == ModelArg::Both {
        let results = ItsaAnalysis::new(p.spec.clone()).fit(&p.design)?;
        return emit(out, &results, || {
            [
                table::design(&results.design),
                table::fit("triple", &results.triple.fit),
                table::fit("spline", &results.spline.fit),
                effects_table(&results),
            ]
            .join("\n")
        });
    }
    let m = fit_model(&p, model)?;
    let design = p.design.summary();
    let value = json!({ "spec": p.spec, "design": design, "model": m });
    emit(out, &value, || [table::design(&design), table::fit(&m.name, &m.fit)].join("\n"))
}

fn cmd_margins(args: &AnalysisArgs, model: ModelArg, out: &OutputArgs) -> Result<()> {
    let p = args.prepare()?;
    let models = match model {
        ModelArg::Both => vec![fit_model(&p, ModelArg::Triple)?, fit_model(&p, ModelArg::Spline)?],
        one => vec![fit_model(&p, one)?],
    };
    let mut value = serde_json::Map::new();
    for m in &models {
        value.insert(m.name.clone(), serde_json::to_value(&m.margins)?);
    }
    emit(out, &value, || {
        models.iter().map(|m| table::margins(&m.name, &m.margins)).collect::<Vec<_>>().join("\n")
    })
}

/// Plot config from an optional YAML file, with `--theme` taking precedence.
fn viz_config(path: Option<&Path>, theme: Option<&str>) -> Result<VizConfig> {
    use serde_yaml_ng::{Mapping, Value};

    let mut value = match path {
        Some(p) => serde_yaml_ng::from_str(&std::fs::read_to_string(p)?)?,
        None => Value::Null,
    };
    if let Some(theme) = theme {
        if value.is_null() {
            value = Value::Mapping(Mapping::new());
        }
        if let Value::Mapping(m) = &mut value {
            m.insert(Value::String("theme".into()), Value::String(theme.to_string()));
        }
    }
    if value.is_null() {
        return Ok(svy_viz_render::config::resolve_config(None)?);
    }
    let yaml = serde_yaml_ng::to_string(&value)?;
    Ok(svy_viz_render::config::resolve_config(Some(&yaml))?)
}

fn cmd_plot(
    results: Option<&Path>,
    artifact: Option<&Path>,
    output: &Path,
    viz_config_path: Option<&Path>,
    theme: Option<&str>,
    title: Option<String>,
    save_artifact: Option<&Path>,
) -> Result<()> {
    let mut art: ItsaPlotArtifact = match (results, artifact) {
        (Some(path), _) => {
            let results: ItsaResults = serde_json::from_slice(&std::fs::read(path)?)?;
            ItsaPlotArtifact::from_results(&results, &PlotLabels::default())
        }
        (None, Some(path)) => serde_json::from_slice(&std::fs::read(path)?)?,
        (None, None) => anyhow::bail!("one of --results or --artifact is required"),
    };
    if let Some(title) = title {
        art.title = title;
    }
    let json = serde_json::to_string_pretty(&art)?;
    if let Some(path) = save_artifact {
        std::fs::write(path, &json)?;
    }

    let config = viz_config(viz_config_path, theme)?;
    svy_viz_render::render_to_file(&json, PlotKind::Itsa, output, &config)?;
    let bytes = std::fs::metadata(output)?.len();
    tracing::info!(path = %output.display(), bytes, "plot written");
    write_json(None, json!({ "output": output, "bytes": bytes, "theme": config.theme }))
}

fn cmd_run(config: &Path) -> Result<()> {
    let cfg = run::read_run_config(config)?;
    let report = run::run(&cfg)?;
    write_json(None, serde_json::to_value(&report)?)
}

fn cmd_version() -> Result<()> {
    let features: Vec<&str> = [
        ("fetch", cfg!(feature = "fetch")),
        ("parquet", cfg!(feature = "parquet")),
        ("png", cfg!(feature = "png")),
    ]
    .into_iter()
    .filter_map(|(name, on)| on.then_some(name))
    .collect();
    write_json(None, json!({ "tool": "svyts", "version": svy_core::VERSION, "features": features }))
}
