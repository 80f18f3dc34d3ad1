//! Plain-text tables for `--table` output.

use std::fmt::Write as _;

use svy_core::Estimate;
use svy_inference::{DesignSummary, DomainEstimate, FitSummary, ItsaMargins};

/// Right-aligned numeric columns after a left-aligned label column.
struct Table {
    header: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    fn new(header: &[&str]) -> Self {
        Self { header: header.iter().map(|s| s.to_string()).collect(), rows: Vec::new() }
    }

    fn push(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    fn render(&self, title: &str) -> String {
        let n = self.header.len();
        let mut widths: Vec<usize> = self.header.iter().map(|h| h.chars().count()).collect();
        for row in &self.rows {
            for (w, cell) in widths.iter_mut().zip(row) {
                *w = (*w).max(cell.chars().count());
            }
        }
        let total = widths.iter().sum::<usize>() + 2 * n.saturating_sub(1);

        let mut out = String::new();
        let _ = writeln!(out, "{title}");
        let rule = "-".repeat(total);
        let _ = writeln!(out, "{rule}");
        write_row(&mut out, &self.header, &widths);
        let _ = writeln!(out, "{rule}");
        for row in &self.rows {
            write_row(&mut out, row, &widths);
        }
        let _ = writeln!(out, "{rule}");
        out
    }
}

fn write_row(out: &mut String, cells: &[String], widths: &[usize]) {
    for (i, (cell, w)) in cells.iter().zip(widths).enumerate() {
        if i == 0 {
            let _ = write!(out, "{cell:<w$}");
        } else {
            let _ = write!(out, "  {cell:>w$}");
        }
    }
    out.push('\n');
}

fn num(v: f64) -> String {
    if !v.is_finite() {
        return ".".into();
    }
    let a = v.abs();
    if a != 0.0 && (a >= 1e7 || a < 1e-3) { format!("{v:.3e}") } else { format!("{v:.3}") }
}

fn p_value(p: f64) -> String {
    if p.is_finite() && p < 0.001 { "<0.001".into() } else { num(p) }
}

fn estimate_cells(e: &Estimate) -> Vec<String> {
    vec![
        num(e.estimate),
        num(e.std_error),
        num(e.t_stat),
        p_value(e.p_value),
        num(e.ci_lower),
        num(e.ci_upper),
    ]
}

fn level_header(level: f64) -> (String, String) {
    let pct = format!("{:.0}%", level * 100.0);
    (format!("[{pct} lower"), "upper]".to_string())
}

/// Coefficient-style table of estimates.
pub fn estimates(title: &str, rows: &[Estimate]) -> String {
    let level = rows.first().map(|e| e.level).unwrap_or(0.95);
    let (lo, hi) = level_header(level);
    let mut t = Table::new(&["term", "estimate", "std.err", "t", "P>|t|", lo.as_str(), hi.as_str()]);
    for e in rows {
        let mut row = vec![e.term.clone()];
        row.extend(estimate_cells(e));
        t.push(row);
    }
    t.render(title)
}

/// Regression table with residual df and population size.
pub fn fit(name: &str, fit: &FitSummary) -> String {
    let df = fit.df_residual.map(num).unwrap_or_else(|| "normal".into());
    let title = format!(
        "{name}: {}\n  n = {}, population = {}, residual df = {df}",
        fit.formula,
        fit.n_obs,
        num(fit.population)
    );
    estimates(&title, &fit.coefficients)
}

/// Domain estimates with their domain labels.
pub fn domains(title: &str, rows: &[DomainEstimate]) -> String {
    let level = rows.first().map(|d| d.estimate.level).unwrap_or(0.95);
    let (lo, hi) = level_header(level);
    let mut t = Table::new(&["domain", "n", "estimate", "std.err", "t", "P>|t|", lo.as_str(), hi.as_str()]);
    for d in rows {
        let label =
            d.domain.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join(", ");
        let mut row = vec![label, d.n.to_string()];
        row.extend(estimate_cells(&d.estimate));
        t.push(row);
    }
    t.render(title)
}

/// Group differences and slopes.
pub fn margins(name: &str, m: &ItsaMargins) -> String {
    let mut out = String::new();
    let rows = |v: &[svy_inference::MarginEstimate]| -> Vec<Estimate> {
        v.iter().map(|m| Estimate { term: m.label.clone(), ..m.estimate.clone() }).collect()
    };
    out.push_str(&estimates(
        &format!(
            "{name}: group difference by period (time at period means {} / {})",
            num(m.period_mean_time[0]),
            num(m.period_mean_time[1])
        ),
        &rows(&m.group_difference),
    ));
    out.push('\n');
    out.push_str(&estimates(&format!("{name}: slopes by group and period"), &rows(&m.slopes)));
    out
}

/// Design structure on a few lines.
pub fn design(d: &DesignSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Survey design");
    let _ = writeln!(out, "  observations : {}", d.n_obs);
    let _ = writeln!(out, "  strata       : {}", d.n_strata);
    let _ = writeln!(out, "  PSUs         : {}", d.n_psu);
    let _ = writeln!(out, "  design df    : {}", num(d.df));
    let _ = writeln!(out, "  population   : {}", num(d.sum_weights));
    if !d.singleton_strata.is_empty() {
        let _ = writeln!(
            out,
            "  singletons   : {} ({:?})",
            d.singleton_strata.len(),
            d.singleton
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn columns_line_up() {
        let e = Estimate::from_se("post:female:time", 256.0, 40.0, Some(100.0), 0.95).unwrap();
        let text = estimates("DiD", &[e]);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "DiD");
        assert!(lines[2].starts_with("term"));
        assert!(lines[2].contains("[95% lower"));
        assert!(lines[4].starts_with("post:female:time"));
        assert!(lines[4].contains("256.000"));
        assert_eq!(lines[2].len(), lines[4].len());
    }

    #[test]
    fn number_formats() {
        assert_eq!(num(1.5), "1.500");
        assert_eq!(num(0.0), "0.000");
        assert_eq!(num(f64::NAN), ".");
        assert_eq!(num(12_345_678.0), "1.235e7");
        assert_eq!(p_value(1e-6), "<0.001");
    }
}
