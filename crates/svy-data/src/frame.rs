//! Pooled records to the numeric analysis [`Frame`].

use serde::{Deserialize, Serialize};
use svy_core::{Error, Frame, Result};

use crate::pool::{PersonYear, PooledTable};

/// Options for [`to_frame`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameOptions {
    /// Year mapped to `time = 0`; defaults to the first pooled year.
    pub base_year: Option<i32>,
    /// Name of the 0/1 group indicator column.
    pub group: String,
    /// Sex code flagged as 1 in the group indicator.
    pub group_code: i64,
    /// Drop records without design codes instead of failing.
    pub drop_unlinked: bool,
}

impl Default for FrameOptions {
    fn default() -> Self {
        Self { base_year: None, group: "female".into(), group_code: 2, drop_unlinked: true }
    }
}

/// What [`to_frame`] did.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameReport {
    /// Rows in the frame.
    pub rows: usize,
    /// Records dropped for lack of design codes.
    pub dropped_unlinked: usize,
    /// Year at `time = 0`.
    pub base_year: i32,
    /// `cutoff - base_year`: the knot on the time axis.
    pub knot_time: f64,
}

/// Build the analysis frame.
///
/// Columns: `year`, `time`, `panel`, `sex`, the group indicator, `post`,
/// `totexp`, `ertexp`, `perwt`, `poolwt`, `varstr`, `varpsu`.
pub fn to_frame(pooled: &PooledTable, opts: &FrameOptions) -> Result<(Frame, FrameReport)> {
    let base_year = opts
        .base_year
        .or_else(|| pooled.years.first().copied())
        .ok_or_else(|| Error::Validation("pooled table has no years".into()))?;

    let unlinked = pooled.records.iter().filter(|r| r.varstr.is_none() || r.varpsu.is_none()).count();
    if unlinked > 0 && !opts.drop_unlinked {
        return Err(Error::Validation(format!(
            "{unlinked} records have no variance stratum/PSU; link the design file first"
        )));
    }
    if unlinked > 0 {
        tracing::warn!(dropped = unlinked, "dropping records without design codes");
    }

    let rows: Vec<_> = pooled
        .records
        .iter()
        .filter_map(|r| Some((r, r.varstr?, r.varpsu?)))
        .collect();
    if rows.is_empty() {
        return Err(Error::Validation("no linked records to analyse".into()));
    }

    let mut frame = Frame::new();
    frame.insert("year", project(&rows, |r, _, _| r.year as f64))?;
    frame.insert("time", project(&rows, |r, _, _| (r.year - base_year) as f64))?;
    frame.insert("panel", project(&rows, |r, _, _| r.panel as f64))?;
    frame.insert("sex", project(&rows, |r, _, _| r.sex as f64))?;
    frame.insert(
        opts.group.as_str(),
        project(&rows, |r, _, _| f64::from(u8::from(r.sex == opts.group_code))),
    )?;
    frame.insert("post", project(&rows, |r, _, _| f64::from(r.period)))?;
    frame.insert("totexp", project(&rows, |r, _, _| r.totexp))?;
    frame.insert("ertexp", project(&rows, |r, _, _| r.ertexp))?;
    frame.insert("perwt", project(&rows, |r, _, _| r.perwt))?;
    frame.insert("poolwt", project(&rows, |r, _, _| r.poolwt))?;
    frame.insert("varstr", project(&rows, |_, s, _| s as f64))?;
    frame.insert("varpsu", project(&rows, |_, _, p| p as f64))?;

    let report = FrameReport {
        rows: frame.n_rows(),
        dropped_unlinked: unlinked,
        base_year,
        knot_time: (pooled.cutoff - base_year) as f64,
    };
    Ok((frame, report))
}

fn project<F>(rows: &[(&PersonYear, i64, i64)], f: F) -> Vec<f64>
where
    F: Fn(&PersonYear, i64, i64) -> f64,
{
    rows.iter().map(|(r, s, p)| f(r, *s, *p)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::{LinkageTable, link};
    use crate::pool::pool;
    use crate::schema::YearExtract;

    fn linked() -> PooledTable {
        let ex = |year: i32| YearExtract {
            year,
            dupersid: vec!["A".into(), "B".into()],
            panel: vec![21, 21],
            sex: vec![1, 2],
            totexp: vec![10.0, 20.0],
            ertexp: vec![0.0, 5.0],
            perwt: vec![300.0, 600.0],
        };
        let pooled = pool(vec![ex(2016), ex(2019), ex(2021)], 2019).unwrap();
        let linkage = LinkageTable::from_rows([("A".into(), 21, 7, 1)]);
        link(pooled, &linkage).0
    }

    #[test]
    fn test_frame_columns_and_time_axis() {
        let (frame, report) = to_frame(&linked(), &FrameOptions::default()).unwrap();
        assert_eq!(report.rows, 3);
        assert_eq!(report.dropped_unlinked, 3);
        assert_eq!(report.base_year, 2016);
        assert_eq!(report.knot_time, 3.0);
        assert_eq!(frame.column("time").unwrap(), &[0.0, 3.0, 5.0]);
        assert_eq!(frame.column("post").unwrap(), &[0.0, 1.0, 1.0]);
        assert_eq!(frame.column("female").unwrap(), &[0.0, 0.0, 0.0]);
        assert_eq!(frame.column("poolwt").unwrap(), &[100.0, 100.0, 100.0]);
        assert_eq!(frame.column("varstr").unwrap(), &[7.0, 7.0, 7.0]);
    }

    #[test]
    fn test_unlinked_rejected_when_not_dropping() {
        let opts = FrameOptions { drop_unlinked: false, ..FrameOptions::default() };
        assert!(to_frame(&linked(), &opts).is_err());
    }
}
