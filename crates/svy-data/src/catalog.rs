//! MEPS public-use file catalog.
//!
//! Full-year consolidated (FYC) files are published one per survey year under
//! an `hNNN` identifier; the pooled-estimation linkage file (HC-036) carries
//! the common variance strata and PSUs for every year since 1996.

use serde::{Deserialize, Serialize};
use svy_core::{Error, Result};

/// Default download location; `{file}` is replaced by the file identifier.
pub const DEFAULT_URL_TEMPLATE: &str =
    "https://meps.ahrq.gov/mepsweb/data_files/pufs/{file}/{file}ssp.zip";

/// Kind of public-use file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractKind {
    /// Full-year consolidated person file for one survey year.
    FullYear,
    /// Pooled linkage file with common variance structure.
    Linkage,
}

/// One downloadable public-use file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractId {
    /// File identifier, e.g. `h216`.
    pub file: String,
    /// Survey year for full-year files.
    pub year: Option<i32>,
    /// File kind.
    pub kind: ExtractKind,
}

impl ExtractId {
    /// Full-year file for `year`.
    pub fn full_year(file: &str, year: i32) -> Self {
        Self { file: file.to_string(), year: Some(year), kind: ExtractKind::FullYear }
    }

    /// Linkage file.
    pub fn linkage(file: &str) -> Self {
        Self { file: file.to_string(), year: None, kind: ExtractKind::Linkage }
    }

    /// Name of the transport member inside the zip archive (`h216.ssp`).
    pub fn member_name(&self) -> String {
        format!("{}.ssp", self.file)
    }
}

/// Set of extracts one analysis draws from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    /// URL template with a `{file}` placeholder.
    pub url_template: String,
    /// Full-year files, ascending by year.
    pub full_year: Vec<ExtractId>,
    /// Linkage file.
    pub linkage: ExtractId,
}

impl Catalog {
    /// MEPS 2016-2021 full-year files and the 1996-2021 linkage file.
    pub fn meps() -> Self {
        Self {
            url_template: DEFAULT_URL_TEMPLATE.to_string(),
            full_year: MEPS_FULL_YEAR
                .iter()
                .map(|(year, file)| ExtractId::full_year(file, *year))
                .collect(),
            linkage: ExtractId::linkage("h36u21"),
        }
    }

    /// Restrict to the given years (each must be known).
    pub fn with_years(mut self, years: &[i32]) -> Result<Self> {
        let mut selected = Vec::with_capacity(years.len());
        for &y in years {
            selected.push(self.full_year_for(y)?.clone());
        }
        selected.sort_by_key(|e| e.year);
        selected.dedup();
        self.full_year = selected;
        Ok(self)
    }

    /// Full-year file for `year`.
    pub fn full_year_for(&self, year: i32) -> Result<&ExtractId> {
        self.full_year.iter().find(|e| e.year == Some(year)).ok_or_else(|| {
            Error::Validation(format!(
                "no full-year file catalogued for {year} (known: {})",
                self.years().iter().map(i32::to_string).collect::<Vec<_>>().join(", ")
            ))
        })
    }

    /// Years covered by the full-year files.
    pub fn years(&self) -> Vec<i32> {
        self.full_year.iter().filter_map(|e| e.year).collect()
    }

    /// Download URL for an extract.
    pub fn url(&self, id: &ExtractId) -> String {
        self.url_template.replace("{file}", &id.file)
    }

    /// All extracts, full-year files first.
    pub fn all(&self) -> impl Iterator<Item = &ExtractId> {
        self.full_year.iter().chain(std::iter::once(&self.linkage))
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::meps()
    }
}

const MEPS_FULL_YEAR: &[(i32, &str)] = &[
    (2016, "h192"),
    (2017, "h201"),
    (2018, "h209"),
    (2019, "h216"),
    (2020, "h224"),
    (2021, "h233"),
];
