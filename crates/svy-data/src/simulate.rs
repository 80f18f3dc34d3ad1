//! Synthetic MEPS-like extracts for offline runs and tests.
//!
//! Persons belong to two-year overlapping panels (panel `p` enters in
//! `1995 + p`), sit in one variance stratum and PSU for life, and draw a
//! fresh expenditure every year. Mean total expenditure follows the
//! triple-interaction ITSA model in `time = year - first year`, with a
//! PSU-level multiplicative effect and log-normal noise of mean one, so a
//! weighted fit recovers [`SimulatedEffects`] on average.
//!
//! Files are written with MEPS names (`h192.ssp`, ..., `h36u21.ssp`) so the
//! ordinary pipeline reads them unchanged.

use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, LogNormal, Normal};
use serde::{Deserialize, Serialize};
use svy_core::{Error, Result};

use crate::catalog::Catalog;
use crate::fetch::Manifest;
use crate::link::LinkageSchema;
use crate::schema::YearSchema;
use crate::xpt::{XptDataset, XptValue, XptVariable, write_xpt};

/// True coefficients of the mean total-expenditure model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatedEffects {
    /// Male mean at `time = 0`, pre period.
    pub intercept: f64,
    /// `female`
    pub female: f64,
    /// `post`
    pub post: f64,
    /// `time`
    pub time: f64,
    /// `post:female`
    pub post_female: f64,
    /// `female:time`
    pub female_time: f64,
    /// `post:female:time`: the difference-in-differences in slopes.
    pub post_female_time: f64,
}

impl Default for SimulatedEffects {
    fn default() -> Self {
        Self {
            intercept: 5200.0,
            female: 1100.0,
            post: 300.0,
            time: 180.0,
            post_female: 150.0,
            female_time: 60.0,
            post_female_time: 256.0,
        }
    }
}

impl SimulatedEffects {
    fn mean(&self, female: f64, post: f64, time: f64) -> f64 {
        self.intercept
            + self.female * female
            + self.post * post
            + self.time * time
            + self.post_female * post * female
            + self.female_time * female * time
            + self.post_female_time * post * female * time
    }
}

/// Simulation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// RNG seed.
    pub seed: u64,
    /// Survey years (each must be in the catalog).
    pub years: Vec<i32>,
    /// First post-intervention year (drives the mean model).
    pub cutoff: i32,
    /// Persons entering with each panel.
    pub persons_per_panel: usize,
    /// Variance strata.
    pub n_strata: usize,
    /// PSUs per stratum.
    pub psus_per_stratum: usize,
    /// Extra strata holding a single PSU.
    pub singleton_strata: usize,
    /// Share of females.
    pub female_share: f64,
    /// Log-scale sd of the expenditure noise.
    pub noise_sigma: f64,
    /// Log-scale sd of the PSU effect.
    pub psu_sigma: f64,
    /// Mean model.
    pub effects: SimulatedEffects,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 20_190_101,
            years: (2016..=2021).collect(),
            cutoff: 2019,
            persons_per_panel: 1500,
            n_strata: 60,
            psus_per_stratum: 2,
            singleton_strata: 0,
            female_share: 0.51,
            noise_sigma: 0.6,
            psu_sigma: 0.15,
            effects: SimulatedEffects::default(),
        }
    }
}

/// What [`simulate_extracts`] wrote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationSummary {
    /// `(year, path)` of each full-year file.
    pub full_year: Vec<(i32, PathBuf)>,
    /// Linkage file path.
    pub linkage: PathBuf,
    /// Distinct persons.
    pub persons: usize,
    /// Person-year records over all years.
    pub records: usize,
    /// Coefficients used.
    pub effects: SimulatedEffects,
}

struct Person {
    dupersid: String,
    panel: i64,
    female: bool,
    stratum: i64,
    psu: i64,
    weight: f64,
}

/// Write synthetic full-year and linkage extracts into `dir`.
pub fn simulate_extracts(config: &SimulationConfig, dir: &Path) -> Result<SimulationSummary> {
    validate(config)?;
    let catalog = Catalog::meps().with_years(&config.years)?;
    std::fs::create_dir_all(dir)?;

    let mut rng = StdRng::seed_from_u64(config.seed);
    let first_year = catalog.years()[0];
    let last_year = catalog.years()[catalog.years().len() - 1];

    let n_cells = config.n_strata * config.psus_per_stratum + config.singleton_strata;
    let psu_effect = LogNormal::new(-0.5 * config.psu_sigma.powi(2), config.psu_sigma)
        .map_err(|e| Error::Validation(format!("psu_sigma: {e}")))?;
    let cell_effects: Vec<f64> = (0..n_cells).map(|_| psu_effect.sample(&mut rng)).collect();
    let noise = LogNormal::new(-0.5 * config.noise_sigma.powi(2), config.noise_sigma)
        .map_err(|e| Error::Validation(format!("noise_sigma: {e}")))?;
    let log_weight =
        Normal::new(0.0_f64, 0.35).map_err(|e| Error::Computation(format!("weight distribution: {e}")))?;

    // Panels alive in [first_year, last_year]: entry year 1995 + p, two years each.
    let first_panel = (first_year - 1996) as i64;
    let last_panel = (last_year - 1995) as i64;
    let mut persons = Vec::new();
    for panel in first_panel..=last_panel {
        for i in 0..config.persons_per_panel {
            let cell = rng.random_range(0..n_cells);
            let (stratum, psu) = cell_to_design(cell, config);
            persons.push(Person {
                dupersid: format!("{panel:02}{:08}", 100 + i),
                panel,
                female: rng.random_bool(config.female_share),
                stratum,
                psu,
                weight: 12_000.0 * log_weight.sample(&mut rng).exp(),
            });
        }
    }

    let mut summary = SimulationSummary {
        full_year: Vec::new(),
        linkage: dir.join(catalog.linkage.member_name()),
        persons: persons.len(),
        records: 0,
        effects: config.effects,
    };
    let mut manifest = Manifest::load(dir)?;

    for id in &catalog.full_year {
        let year = id.year.unwrap_or(first_year);
        let schema = YearSchema::meps(year);
        let yy = format!("{:02}", year.rem_euclid(100));
        let time = f64::from(year - first_year);
        let post = f64::from(u8::from(year >= config.cutoff));

        let variables = vec![
            XptVariable::character(schema.source("dupersid")?, "PERSON ID (DUID + PID)", 10),
            XptVariable::numeric(schema.source("panel")?, "PANEL NUMBER"),
            XptVariable::numeric(schema.source("sex")?, "SEX"),
            XptVariable::numeric(schema.source("totexp")?, &format!("TOTAL HEALTH CARE EXP {yy}")),
            XptVariable::numeric(schema.source("ertexp")?, &format!("TOTAL ER FACILITY + DR EXP {yy}")),
            XptVariable::numeric(schema.source("perwt")?, &format!("FINAL PERSON WEIGHT, 20{yy}")),
            XptVariable::numeric("VARSTR", "VARIANCE ESTIMATION STRATUM"),
            XptVariable::numeric("VARPSU", "VARIANCE ESTIMATION PSU"),
        ];

        let mut data = Vec::new();
        for p in persons.iter().filter(|p| p.panel + 1995 == year as i64 || p.panel + 1996 == year as i64) {
            let female = f64::from(u8::from(p.female));
            let cell = design_to_cell(p.stratum, p.psu, config);
            let mu = config.effects.mean(female, post, time).max(0.0);
            let totexp = (mu * cell_effects[cell] * noise.sample(&mut rng)).round();
            let ertexp = if rng.random_bool(0.12) {
                (0.1 * totexp * rng.random_range(0.2..1.0)).round()
            } else {
                0.0
            };
            // Annual weights drift a little around the person's base weight.
            let perwt = (p.weight * rng.random_range(0.9..1.1) * 100.0).round() / 100.0;
            data.push(vec![
                XptValue::Character(p.dupersid.clone()),
                XptValue::Numeric(p.panel as f64),
                XptValue::Numeric(if p.female { 2.0 } else { 1.0 }),
                XptValue::Numeric(totexp),
                XptValue::Numeric(ertexp),
                XptValue::Numeric(perwt),
                XptValue::Numeric(p.stratum as f64),
                XptValue::Numeric(p.psu as f64),
            ]);
        }
        summary.records += data.len();

        let path = dir.join(id.member_name());
        let ds = XptDataset {
            name: id.file.to_ascii_uppercase(),
            label: format!("MEPS {} SYNTHETIC FULL YEAR {year}", id.file.to_ascii_uppercase()),
            variables,
            data,
        };
        write_xpt(&path, &[ds])?;
        manifest.record(id, "", &path)?;
        tracing::debug!(year, path = %path.display(), "wrote synthetic full-year file");
        summary.full_year.push((year, path));
    }

    let link_schema = LinkageSchema::default();
    let linkage = XptDataset {
        name: catalog.linkage.file.to_ascii_uppercase(),
        label: "SYNTHETIC POOLED LINKAGE VARIANCE FILE".into(),
        variables: vec![
            XptVariable::character(&link_schema.dupersid, "PERSON ID (DUID + PID)", 10),
            XptVariable::numeric(&link_schema.panel, "PANEL NUMBER"),
            XptVariable::numeric(&link_schema.stratum, "POOLED VARIANCE STRATUM"),
            XptVariable::numeric(&link_schema.psu, "POOLED VARIANCE PSU"),
        ],
        data: persons
            .iter()
            .map(|p| {
                vec![
                    XptValue::Character(p.dupersid.clone()),
                    XptValue::Numeric(p.panel as f64),
                    XptValue::Numeric(p.stratum as f64),
                    XptValue::Numeric(p.psu as f64),
                ]
            })
            .collect(),
    };
    write_xpt(&summary.linkage, &[linkage])?;
    manifest.record(&catalog.linkage, "", &summary.linkage)?;
    manifest.save(dir)?;

    tracing::info!(
        persons = summary.persons,
        records = summary.records,
        dir = %dir.display(),
        "simulated extracts"
    );
    Ok(summary)
}

fn validate(config: &SimulationConfig) -> Result<()> {
    if config.years.is_empty() {
        return Err(Error::Validation("simulation needs at least one year".into()));
    }
    if config.persons_per_panel == 0 {
        return Err(Error::Validation("persons_per_panel must be positive".into()));
    }
    if config.n_strata * config.psus_per_stratum + config.singleton_strata == 0 {
        return Err(Error::Validation("simulation needs at least one PSU".into()));
    }
    if !(0.0..=1.0).contains(&config.female_share) {
        return Err(Error::Validation(format!(
            "female_share must be in [0,1], got {}",
            config.female_share
        )));
    }
    Ok(())
}

/// Cell index -> (stratum, psu); singleton strata follow the regular ones.
fn cell_to_design(cell: usize, config: &SimulationConfig) -> (i64, i64) {
    let regular = config.n_strata * config.psus_per_stratum;
    if cell < regular {
        ((cell / config.psus_per_stratum + 1) as i64, (cell % config.psus_per_stratum + 1) as i64)
    } else {
        ((config.n_strata + cell - regular + 1) as i64, 1)
    }
}

fn design_to_cell(stratum: i64, psu: i64, config: &SimulationConfig) -> usize {
    let s = (stratum - 1) as usize;
    if s < config.n_strata {
        s * config.psus_per_stratum + (psu - 1) as usize
    } else {
        config.n_strata * config.psus_per_stratum + (s - config.n_strata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::read_table;

    fn small() -> SimulationConfig {
        SimulationConfig { persons_per_panel: 50, n_strata: 5, ..SimulationConfig::default() }
    }

    #[test]
    fn test_design_cells_roundtrip() {
        let cfg = SimulationConfig { n_strata: 3, psus_per_stratum: 2, singleton_strata: 2, ..small() };
        for cell in 0..8 {
            let (s, p) = cell_to_design(cell, &cfg);
            assert_eq!(design_to_cell(s, p, &cfg), cell);
        }
        assert_eq!(cell_to_design(7, &cfg), (5, 1));
    }

    #[test]
    fn test_simulated_files_follow_meps_layout() {
        let dir = tempfile::tempdir().unwrap();
        let summary = simulate_extracts(&small(), dir.path()).unwrap();
        assert_eq!(summary.full_year.len(), 6);
        // Panels 20..=26, two years each, clipped to 2016-2021.
        assert_eq!(summary.persons, 7 * 50);
        assert_eq!(summary.records, 6 * 2 * 50);

        let (year, path) = &summary.full_year[3];
        assert_eq!(*year, 2019);
        assert!(path.ends_with("h216.ssp"));
        let t = read_table(path, None).unwrap();
        assert!(t.has_column("TOTEXP19"));
        assert!(t.has_column("PERWT19F"));
        assert_eq!(t.n_rows(), 100);

        let link = read_table(&summary.linkage, None).unwrap();
        assert_eq!(link.n_rows(), summary.persons);
        assert!(dir.path().join("manifest.json").is_file());
    }

    #[test]
    fn test_simulation_is_deterministic() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let sa = simulate_extracts(&small(), a.path()).unwrap();
        let sb = simulate_extracts(&small(), b.path()).unwrap();
        for ((_, pa), (_, pb)) in sa.full_year.iter().zip(&sb.full_year) {
            assert_eq!(std::fs::read(pa).unwrap(), std::fs::read(pb).unwrap());
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = SimulationConfig { years: vec![2030], ..small() };
        assert!(simulate_extracts(&cfg, dir.path()).is_err());
        let cfg = SimulationConfig { female_share: 1.5, ..small() };
        assert!(simulate_extracts(&cfg, dir.path()).is_err());
    }
}
