//! Pooling normalized years into one person-year table.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use svy_core::{Error, Result};

use crate::schema::YearExtract;

/// One person in one survey year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonYear {
    /// Person identifier.
    pub dupersid: String,
    /// MEPS panel.
    pub panel: i64,
    /// Survey year.
    pub year: i32,
    /// Sex code (1 = male, 2 = female).
    pub sex: i64,
    /// Total expenditure.
    pub totexp: f64,
    /// Emergency-room expenditure.
    pub ertexp: f64,
    /// Annual person weight.
    pub perwt: f64,
    /// `perwt / number of pooled years`.
    pub poolwt: f64,
    /// 0 before the cutoff year, 1 from the cutoff year on.
    pub period: u8,
    /// Variance stratum from the linkage file.
    pub varstr: Option<i64>,
    /// Variance PSU from the linkage file.
    pub varpsu: Option<i64>,
}

/// Pooled person-year records.
#[derive(Debug, Clone, PartialEq)]
pub struct PooledTable {
    /// Pooled years, ascending.
    pub years: Vec<i32>,
    /// First post-intervention year.
    pub cutoff: i32,
    /// Records, year by year in input order.
    pub records: Vec<PersonYear>,
}

impl PooledTable {
    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the table holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of pooled years.
    pub fn n_years(&self) -> usize {
        self.years.len()
    }

    /// Rebuild a table from records (e.g. read back from CSV).
    ///
    /// The period of every record must agree with `cutoff`.
    pub fn from_records(records: Vec<PersonYear>, cutoff: i32) -> Result<Self> {
        if records.is_empty() {
            return Err(Error::Validation("pooled table has no records".into()));
        }
        if let Some(r) = records.iter().find(|r| r.period != assign_period(r.year, cutoff)) {
            return Err(Error::Validation(format!(
                "record {} ({}) has period {} but cutoff {cutoff} implies {}",
                r.dupersid,
                r.year,
                r.period,
                assign_period(r.year, cutoff)
            )));
        }
        let years: BTreeSet<i32> = records.iter().map(|r| r.year).collect();
        Ok(Self { years: years.into_iter().collect(), cutoff, records })
    }
}

/// `0` when `year < cutoff`, `1` otherwise.
pub fn assign_period(year: i32, cutoff: i32) -> u8 {
    u8::from(year >= cutoff)
}

/// Concatenate normalized years, scale weights by the number of years and
/// stamp the pre/post period.
pub fn pool(extracts: Vec<YearExtract>, cutoff: i32) -> Result<PooledTable> {
    if extracts.is_empty() {
        return Err(Error::Validation("no years to pool".into()));
    }
    let mut years = BTreeSet::new();
    for ex in &extracts {
        if !years.insert(ex.year) {
            return Err(Error::Validation(format!("year {} supplied more than once", ex.year)));
        }
    }
    let n_years = extracts.len() as f64;
    if !years.iter().any(|&y| y < cutoff) || !years.iter().any(|&y| y >= cutoff) {
        tracing::warn!(cutoff, ?years, "pooled years do not span both periods");
    }

    let total: usize = extracts.iter().map(YearExtract::len).sum();
    let mut records = Vec::with_capacity(total);
    for ex in extracts {
        let period = assign_period(ex.year, cutoff);
        for i in 0..ex.len() {
            let perwt = ex.perwt[i];
            if !perwt.is_finite() || perwt < 0.0 {
                return Err(Error::Validation(format!(
                    "year {}: invalid person weight {perwt} for {}",
                    ex.year, ex.dupersid[i]
                )));
            }
            records.push(PersonYear {
                dupersid: ex.dupersid[i].clone(),
                panel: ex.panel[i],
                year: ex.year,
                sex: ex.sex[i],
                totexp: ex.totexp[i],
                ertexp: ex.ertexp[i],
                perwt,
                poolwt: perwt / n_years,
                period,
                varstr: None,
                varpsu: None,
            });
        }
        tracing::debug!(year = ex.year, period, rows = ex.len(), "pooled year");
    }

    tracing::info!(years = years.len(), records = records.len(), cutoff, "pooled extracts");
    Ok(PooledTable { years: years.into_iter().collect(), cutoff, records })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(year: i32, n: usize) -> YearExtract {
        YearExtract {
            year,
            dupersid: (0..n).map(|i| format!("{year}{i:04}")).collect(),
            panel: vec![21; n],
            sex: (0..n).map(|i| 1 + (i % 2) as i64).collect(),
            totexp: (0..n).map(|i| 100.0 * i as f64).collect(),
            ertexp: vec![0.0; n],
            perwt: (0..n).map(|i| 600.0 + i as f64).collect(),
        }
    }

    #[test]
    fn test_assign_period_cutoff_2019() {
        assert_eq!(assign_period(2018, 2019), 0);
        assert_eq!(assign_period(2019, 2019), 1);
        assert_eq!(assign_period(2020, 2019), 1);
    }

    #[test]
    fn test_pool_scales_weights_and_periods() {
        let extracts = (2016..=2021).map(|y| extract(y, 4)).collect();
        let pooled = pool(extracts, 2019).unwrap();
        assert_eq!(pooled.n_years(), 6);
        assert_eq!(pooled.len(), 24);
        for r in &pooled.records {
            assert_eq!(r.poolwt, r.perwt / 6.0);
            assert_eq!(r.period, u8::from(r.year >= 2019));
            assert!(r.varstr.is_none());
        }
    }

    #[test]
    fn test_pool_rejects_duplicates_and_empty() {
        assert!(pool(vec![], 2019).is_err());
        let err = pool(vec![extract(2017, 2), extract(2017, 2)], 2019).unwrap_err();
        assert!(err.to_string().contains("2017"));
    }

    #[test]
    fn test_pool_rejects_negative_weight() {
        let mut ex = extract(2016, 2);
        ex.perwt[1] = -1.0;
        assert!(pool(vec![ex], 2019).is_err());
    }

    #[test]
    fn test_from_records_checks_periods() {
        let pooled = pool(vec![extract(2018, 2), extract(2020, 2)], 2019).unwrap();
        let back = PooledTable::from_records(pooled.records.clone(), 2019).unwrap();
        assert_eq!(back, pooled);
        assert!(PooledTable::from_records(pooled.records, 2021).is_err());
    }
}
