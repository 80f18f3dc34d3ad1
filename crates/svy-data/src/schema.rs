//! Year-specific field names and normalization to the common schema.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use svy_core::{Error, Result};

use crate::table::RawTable;

/// Common field names every normalized year carries.
pub const COMMON_FIELDS: [&str; 6] = ["dupersid", "panel", "sex", "totexp", "ertexp", "perwt"];

/// Mapping from common field names to one year's source column names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearSchema {
    /// Survey year.
    pub year: i32,
    /// `common name -> source column`.
    pub fields: BTreeMap<String, String>,
}

impl YearSchema {
    /// MEPS full-year naming: two-digit year suffixes on expenditure and
    /// weight variables (`TOTEXP19`, `ERTEXP19`, `PERWT19F`).
    pub fn meps(year: i32) -> Self {
        let yy = format!("{:02}", year.rem_euclid(100));
        let fields = [
            ("dupersid", "DUPERSID".to_string()),
            ("panel", "PANEL".to_string()),
            ("sex", "SEX".to_string()),
            ("totexp", format!("TOTEXP{yy}")),
            ("ertexp", format!("ERTEXP{yy}")),
            ("perwt", format!("PERWT{yy}F")),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        Self { year, fields }
    }

    /// Source column for a common field.
    pub fn source(&self, common: &str) -> Result<&str> {
        self.fields.get(common).map(String::as_str).ok_or_else(|| {
            Error::Validation(format!("schema for {} does not map '{common}'", self.year))
        })
    }

    /// Source columns in common-field order (used to project extract reads).
    pub fn source_columns(&self) -> Vec<String> {
        COMMON_FIELDS.iter().filter_map(|f| self.fields.get(*f).cloned()).collect()
    }
}

/// One survey year normalized to the common schema.
#[derive(Debug, Clone, PartialEq)]
pub struct YearExtract {
    /// Survey year stamped on every record.
    pub year: i32,
    /// Person identifier.
    pub dupersid: Vec<String>,
    /// MEPS panel number.
    pub panel: Vec<i64>,
    /// Sex code (1 = male, 2 = female).
    pub sex: Vec<i64>,
    /// Total health care expenditure.
    pub totexp: Vec<f64>,
    /// Emergency-room expenditure.
    pub ertexp: Vec<f64>,
    /// Annual person weight.
    pub perwt: Vec<f64>,
}

impl YearExtract {
    /// Number of persons.
    pub fn len(&self) -> usize {
        self.dupersid.len()
    }

    /// Whether the extract is empty.
    pub fn is_empty(&self) -> bool {
        self.dupersid.is_empty()
    }
}

/// Rename and subset one year's raw table to the common schema.
///
/// Every absent source column is reported in a single
/// [`Error::MissingField`]; missing cells in a required field are a
/// validation error.
pub fn normalize(table: &RawTable, schema: &YearSchema) -> Result<YearExtract> {
    let mut absent = Vec::new();
    for common in COMMON_FIELDS {
        let src = schema.source(common)?;
        if !table.has_column(src) {
            absent.push(src.to_string());
        }
    }
    if !absent.is_empty() {
        return Err(Error::MissingField {
            table: format!("{} ({})", table.name, schema.year),
            field: absent.join(", "),
        });
    }

    let context = format!("{} ({})", table.name, schema.year);
    let dupersid = require_text(table, schema.source("dupersid")?, &context)?;
    let panel = require_int(table, schema.source("panel")?, &context)?;
    let sex = require_int(table, schema.source("sex")?, &context)?;
    let totexp = require_num(table, schema.source("totexp")?, &context)?;
    let ertexp = require_num(table, schema.source("ertexp")?, &context)?;
    let perwt = require_num(table, schema.source("perwt")?, &context)?;

    tracing::debug!(year = schema.year, rows = dupersid.len(), "normalized extract");
    Ok(YearExtract { year: schema.year, dupersid, panel, sex, totexp, ertexp, perwt })
}

fn require_num(table: &RawTable, col: &str, context: &str) -> Result<Vec<f64>> {
    table
        .numeric(col)?
        .into_iter()
        .enumerate()
        .map(|(row, v)| {
            v.ok_or_else(|| Error::Validation(format!("{context}: missing value in {col} at row {row}")))
        })
        .collect()
}

fn require_int(table: &RawTable, col: &str, context: &str) -> Result<Vec<i64>> {
    require_num(table, col, context)?
        .into_iter()
        .enumerate()
        .map(|(row, v)| {
            if v.fract() == 0.0 {
                Ok(v as i64)
            } else {
                Err(Error::Validation(format!("{context}: {col} at row {row} is not an integer ({v})")))
            }
        })
        .collect()
}

fn require_text(table: &RawTable, col: &str, context: &str) -> Result<Vec<String>> {
    table
        .text(col)?
        .into_iter()
        .enumerate()
        .map(|(row, v)| {
            v.ok_or_else(|| Error::Validation(format!("{context}: missing value in {col} at row {row}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Column;

    fn raw_2019(with_ertexp: bool, with_perwt: bool) -> RawTable {
        let mut cols = vec![
            ("DUPERSID".to_string(), Column::Text(vec![Some("2460002101".into()), Some("2460002102".into())])),
            ("PANEL".to_string(), Column::Numeric(vec![Some(24.0), Some(24.0)])),
            ("SEX".to_string(), Column::Numeric(vec![Some(1.0), Some(2.0)])),
            ("totexp19".to_string(), Column::Numeric(vec![Some(120.0), Some(0.0)])),
        ];
        if with_ertexp {
            cols.push(("ERTEXP19".into(), Column::Numeric(vec![Some(0.0), Some(0.0)])));
        }
        if with_perwt {
            cols.push(("PERWT19F".into(), Column::Numeric(vec![Some(5000.0), Some(7000.0)])));
        }
        RawTable::new("h216.ssp", cols).unwrap()
    }

    #[test]
    fn test_meps_schema_suffixes() {
        let s = YearSchema::meps(2016);
        assert_eq!(s.source("totexp").unwrap(), "TOTEXP16");
        assert_eq!(s.source("ertexp").unwrap(), "ERTEXP16");
        assert_eq!(s.source("perwt").unwrap(), "PERWT16F");
        assert_eq!(s.source_columns().len(), 6);
    }

    #[test]
    fn test_normalize_renames_and_stamps_year() {
        let ex = normalize(&raw_2019(true, true), &YearSchema::meps(2019)).unwrap();
        assert_eq!(ex.year, 2019);
        assert_eq!(ex.len(), 2);
        assert_eq!(ex.sex, vec![1, 2]);
        assert_eq!(ex.totexp, vec![120.0, 0.0]);
        assert_eq!(ex.perwt, vec![5000.0, 7000.0]);
    }

    #[test]
    fn test_normalize_reports_all_missing_fields() {
        let err = normalize(&raw_2019(false, false), &YearSchema::meps(2019)).unwrap_err();
        match err {
            Error::MissingField { table, field } => {
                assert_eq!(table, "h216.ssp (2019)");
                assert_eq!(field, "ERTEXP19, PERWT19F");
            }
            other => panic!("expected MissingField, got {other:?}"),
        }
    }

    #[test]
    fn test_wrong_year_schema_fails() {
        // A 2019 file read with the 2018 schema has none of the suffixed fields.
        let err = normalize(&raw_2019(true, true), &YearSchema::meps(2018)).unwrap_err();
        assert!(err.to_string().contains("TOTEXP18"));
    }

    #[test]
    fn test_missing_cell_in_required_field() {
        let t = RawTable::new(
            "t",
            vec![
                ("DUPERSID".into(), Column::Text(vec![Some("1".into())])),
                ("PANEL".into(), Column::Numeric(vec![Some(21.0)])),
                ("SEX".into(), Column::Numeric(vec![Some(1.0)])),
                ("TOTEXP16".into(), Column::Numeric(vec![None])),
                ("ERTEXP16".into(), Column::Numeric(vec![Some(0.0)])),
                ("PERWT16F".into(), Column::Numeric(vec![Some(1.0)])),
            ],
        )
        .unwrap();
        let err = normalize(&t, &YearSchema::meps(2016)).unwrap_err();
        assert!(err.to_string().contains("TOTEXP16 at row 0"));
    }
}
