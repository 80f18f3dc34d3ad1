//! Left join of variance strata and PSUs from the pooled linkage file.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use svy_core::{Error, Result};

use crate::pool::PooledTable;
use crate::table::RawTable;

/// Column names in the linkage file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkageSchema {
    /// Person identifier.
    pub dupersid: String,
    /// Panel.
    pub panel: String,
    /// Common variance stratum.
    pub stratum: String,
    /// Common variance PSU.
    pub psu: String,
}

impl Default for LinkageSchema {
    fn default() -> Self {
        Self {
            dupersid: "DUPERSID".into(),
            panel: "PANEL".into(),
            stratum: "STRA9621".into(),
            psu: "PSU9621".into(),
        }
    }
}

impl LinkageSchema {
    /// Columns to project when reading the linkage file.
    pub fn columns(&self) -> Vec<String> {
        vec![self.dupersid.clone(), self.panel.clone(), self.stratum.clone(), self.psu.clone()]
    }
}

/// `(dupersid, panel) -> (stratum, psu)` lookup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkageTable {
    keys: BTreeMap<(String, i64), (i64, i64)>,
}

impl LinkageTable {
    /// Build the lookup from a raw linkage table.
    ///
    /// Rows with missing design codes are skipped; a key seen twice with
    /// different codes is an error.
    pub fn from_raw(table: &RawTable, schema: &LinkageSchema) -> Result<Self> {
        let absent: Vec<&str> = [&schema.dupersid, &schema.panel, &schema.stratum, &schema.psu]
            .into_iter()
            .filter(|c| !table.has_column(c))
            .map(String::as_str)
            .collect();
        if !absent.is_empty() {
            return Err(Error::MissingField { table: table.name.clone(), field: absent.join(", ") });
        }

        let ids = table.text(&schema.dupersid)?;
        let panels = table.numeric(&schema.panel)?;
        let strata = table.numeric(&schema.stratum)?;
        let psus = table.numeric(&schema.psu)?;

        let mut keys = BTreeMap::new();
        let mut skipped = 0usize;
        for i in 0..table.n_rows() {
            let (Some(id), Some(panel), Some(stratum), Some(psu)) =
                (&ids[i], panels[i], strata[i], psus[i])
            else {
                skipped += 1;
                continue;
            };
            let key = (id.clone(), panel as i64);
            let codes = (stratum as i64, psu as i64);
            if let Some(prev) = keys.insert(key, codes)
                && prev != codes
            {
                return Err(Error::Validation(format!(
                    "{}: person {id} panel {panel} linked to two design cells {prev:?} and {codes:?}",
                    table.name
                )));
            }
        }
        if skipped > 0 {
            tracing::warn!(skipped, table = %table.name, "linkage rows without design codes");
        }
        Ok(Self { keys })
    }

    /// Build directly from `(dupersid, panel, stratum, psu)` tuples.
    pub fn from_rows<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = (String, i64, i64, i64)>,
    {
        let keys = rows.into_iter().map(|(id, panel, s, p)| ((id, panel), (s, p))).collect();
        Self { keys }
    }

    /// Number of linkage keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the lookup is empty.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Design codes for one person.
    pub fn get(&self, dupersid: &str, panel: i64) -> Option<(i64, i64)> {
        self.keys.get(&(dupersid.to_string(), panel)).copied()
    }
}

/// Outcome of a linkage join.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkReport {
    /// Records that received design codes.
    pub matched: usize,
    /// Records left without design codes.
    pub unmatched: usize,
}

/// Left-join design codes onto every pooled record.
pub fn link(mut pooled: PooledTable, linkage: &LinkageTable) -> (PooledTable, LinkReport) {
    let mut report = LinkReport::default();
    for r in &mut pooled.records {
        match linkage.get(&r.dupersid, r.panel) {
            Some((stratum, psu)) => {
                r.varstr = Some(stratum);
                r.varpsu = Some(psu);
                report.matched += 1;
            }
            None => {
                r.varstr = None;
                r.varpsu = None;
                report.unmatched += 1;
            }
        }
    }
    if report.unmatched > 0 {
        tracing::warn!(unmatched = report.unmatched, "records without a linkage match");
    }
    tracing::info!(matched = report.matched, unmatched = report.unmatched, "linked design codes");
    (pooled, report)
}
