//! Wilkinson-style model formulas for linear models.
//!
//! Supported syntax:
//!
//! - `y ~ a + b` main effects
//! - `a:b` interaction (product of the variables)
//! - `a*b` expands to `a + b + a:b` (all interactions, in degree order)
//! - `-1` or `+0` drops the intercept, `+1` keeps it, `- a` removes a term
//!
//! A term is identified by its set of variables, so `a:b` and `b:a` are the
//! same term; the name and position of the first appearance win.
//!
//! Variables may be *derived*: a derived variable is recomputed from its
//! source whenever a row is built, so predictions with overridden sources
//! (and analytic derivatives) stay consistent.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use svy_core::{Error, Frame, Result};

/// Coefficient name of the intercept.
pub const INTERCEPT: &str = "(Intercept)";

/// A variable computed from another one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Derived {
    /// `max(0, source − knot)`: the post-knot part of a linear spline.
    Hinge {
        /// Source variable.
        source: String,
        /// Knot location.
        knot: f64,
    },
}

impl Derived {
    fn source(&self) -> &str {
        match self {
            Derived::Hinge { source, .. } => source,
        }
    }

    fn eval(&self, x: f64) -> f64 {
        match self {
            Derived::Hinge { knot, .. } => (x - knot).max(0.0),
        }
    }

    /// Right derivative with respect to the source.
    fn slope(&self, x: f64) -> f64 {
        match self {
            Derived::Hinge { knot, .. } => {
                if x >= *knot {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}

/// One model term: a product of variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Term {
    /// Variables in written order.
    pub factors: Vec<String>,
}

impl Term {
    /// Coefficient name, e.g. `post:female:time`.
    pub fn name(&self) -> String {
        self.factors.join(":")
    }

    fn key(&self) -> BTreeSet<&str> {
        self.factors.iter().map(String::as_str).collect()
    }
}

/// A parsed model formula.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Formula {
    response: String,
    intercept: bool,
    terms: Vec<Term>,
    derived: BTreeMap<String, Derived>,
}

impl Formula {
    /// Parse `response ~ rhs`.
    pub fn parse(text: &str) -> Result<Self> {
        let (lhs, rhs) = text
            .split_once('~')
            .ok_or_else(|| Error::Validation(format!("formula '{text}' has no '~'")))?;
        let response = lhs.trim();
        check_name(response, text)?;
        if rhs.contains('~') {
            return Err(Error::Validation(format!("formula '{text}' has more than one '~'")));
        }

        let mut intercept = true;
        let mut terms: Vec<Term> = Vec::new();
        for (sign, chunk) in split_signed(rhs) {
            let chunk = chunk.trim();
            if chunk.is_empty() {
                return Err(Error::Validation(format!("empty term in formula '{text}'")));
            }
            match chunk {
                "1" => intercept = sign,
                "0" => intercept = !sign,
                _ => {
                    for term in expand(chunk, text)? {
                        if sign {
                            if !terms.iter().any(|t| t.key() == term.key()) {
                                terms.push(term);
                            }
                        } else {
                            terms.retain(|t| t.key() != term.key());
                        }
                    }
                }
            }
        }
        if terms.is_empty() && !intercept {
            return Err(Error::Validation(format!("formula '{text}' has no terms")));
        }
        Ok(Self { response: response.to_string(), intercept, terms, derived: BTreeMap::new() })
    }

    /// Declare `name` as derived from another variable.
    pub fn with_derived(mut self, name: &str, derived: Derived) -> Result<Self> {
        check_name(name, name)?;
        if derived.source() == name {
            return Err(Error::Validation(format!("derived variable '{name}' refers to itself")));
        }
        if self.derived.contains_key(derived.source()) {
            return Err(Error::Validation(format!(
                "derived variable '{name}' has derived source '{}'",
                derived.source()
            )));
        }
        self.derived.insert(name.to_string(), derived);
        Ok(self)
    }

    /// Response variable.
    pub fn response(&self) -> &str {
        &self.response
    }

    /// Whether the model has an intercept.
    pub fn has_intercept(&self) -> bool {
        self.intercept
    }

    /// Non-intercept terms in order.
    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    /// Derived variables.
    pub fn derived(&self) -> &BTreeMap<String, Derived> {
        &self.derived
    }

    /// Number of coefficients.
    pub fn n_coef(&self) -> usize {
        self.terms.len() + usize::from(self.intercept)
    }

    /// Coefficient names, intercept first.
    pub fn coef_names(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(self.n_coef());
        if self.intercept {
            names.push(INTERCEPT.to_string());
        }
        names.extend(self.terms.iter().map(Term::name));
        names
    }

    /// Variables that must be supplied by the data (derived ones resolved to
    /// their sources), sorted.
    pub fn input_variables(&self) -> Vec<String> {
        let mut vars = BTreeSet::new();
        for t in &self.terms {
            for f in &t.factors {
                match self.derived.get(f) {
                    Some(d) => vars.insert(d.source().to_string()),
                    None => vars.insert(f.clone()),
                };
            }
        }
        vars.into_iter().collect()
    }

    /// Design row for one observation. `lookup` supplies variable values; a
    /// value it returns for a derived variable takes precedence over the
    /// derivation.
    pub fn row_with<F>(&self, lookup: F) -> Result<Vec<f64>>
    where
        F: Fn(&str) -> Option<f64>,
    {
        let mut row = Vec::with_capacity(self.n_coef());
        if self.intercept {
            row.push(1.0);
        }
        for t in &self.terms {
            let mut v = 1.0;
            for f in &t.factors {
                v *= self.value(f, &lookup)?;
            }
            row.push(v);
        }
        Ok(row)
    }

    /// Partial derivative of the design row with respect to `var`.
    ///
    /// Derived variables contribute through the chain rule (right derivative
    /// at a hinge knot).
    pub fn row_derivative<F>(&self, var: &str, lookup: F) -> Result<Vec<f64>>
    where
        F: Fn(&str) -> Option<f64>,
    {
        let mut row = Vec::with_capacity(self.n_coef());
        if self.intercept {
            row.push(0.0);
        }
        for t in &self.terms {
            let mut d = 0.0;
            for (k, f) in t.factors.iter().enumerate() {
                let df = self.factor_slope(f, var, &lookup)?;
                if df == 0.0 {
                    continue;
                }
                let mut rest = df;
                for (m, g) in t.factors.iter().enumerate() {
                    if m != k {
                        rest *= self.value(g, &lookup)?;
                    }
                }
                d += rest;
            }
            row.push(d);
        }
        Ok(row)
    }

    /// Whether any term depends on `var`, directly or through a derived variable.
    pub fn depends_on(&self, var: &str) -> bool {
        self.terms.iter().flat_map(|t| &t.factors).any(|f| {
            f == var || self.derived.get(f).is_some_and(|d| d.source() == var)
        })
    }

    /// Model matrix (`n × p`) and coefficient names.
    pub fn model_matrix(&self, frame: &Frame) -> Result<(DMatrix<f64>, Vec<String>)> {
        let n = frame.n_rows();
        let p = self.n_coef();
        let cols: BTreeMap<String, &[f64]> = self
            .input_variables()
            .into_iter()
            .map(|v| frame.column(&v).map(|c| (v.clone(), c)))
            .collect::<Result<_>>()?;
        let mut x = DMatrix::<f64>::zeros(n, p);
        for i in 0..n {
            let row = self.row_with(|name| cols.get(name).map(|c| c[i]))?;
            for (j, v) in row.into_iter().enumerate() {
                if !v.is_finite() {
                    return Err(Error::Validation(format!(
                        "non-finite model matrix entry at row {i}, column '{}'",
                        self.coef_names()[j]
                    )));
                }
                x[(i, j)] = v;
            }
        }
        Ok((x, self.coef_names()))
    }

    /// Response column, checked finite.
    pub fn response_vector(&self, frame: &Frame) -> Result<Vec<f64>> {
        let y = frame.column(&self.response)?;
        if let Some(i) = y.iter().position(|v| !v.is_finite()) {
            return Err(Error::Validation(format!(
                "response '{}' is non-finite at row {i}",
                self.response
            )));
        }
        Ok(y.to_vec())
    }

    fn value<F>(&self, name: &str, lookup: &F) -> Result<f64>
    where
        F: Fn(&str) -> Option<f64>,
    {
        let missing = |n: &str| Error::MissingField { table: "model row".into(), field: n.to_string() };
        if let Some(v) = lookup(name) {
            return Ok(v);
        }
        match self.derived.get(name) {
            Some(d) => lookup(d.source()).map(|x| d.eval(x)).ok_or_else(|| missing(d.source())),
            None => Err(missing(name)),
        }
    }

    fn factor_slope<F>(&self, factor: &str, var: &str, lookup: &F) -> Result<f64>
    where
        F: Fn(&str) -> Option<f64>,
    {
        if factor == var {
            return Ok(1.0);
        }
        // A derived factor pinned by the lookup no longer moves with its source.
        if lookup(factor).is_some() {
            return Ok(0.0);
        }
        match self.derived.get(factor) {
            Some(d) if d.source() == var => lookup(var).map(|x| d.slope(x)).ok_or_else(|| {
                Error::MissingField { table: "model row".into(), field: var.to_string() }
            }),
            _ => Ok(0.0),
        }
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ~ ", self.response)?;
        let mut parts: Vec<String> = Vec::new();
        if !self.intercept {
            parts.push("0".into());
        }
        parts.extend(self.terms.iter().map(Term::name));
        if parts.is_empty() {
            parts.push("1".into());
        }
        write!(f, "{}", parts.join(" + "))
    }
}

/// Split the right-hand side on `+`/`-`, keeping the sign. A leading sign
/// does not produce an empty first chunk.
fn split_signed(rhs: &str) -> Vec<(bool, &str)> {
    let mut out = Vec::new();
    let mut sign = true;
    let mut start = 0;
    for (i, c) in rhs.char_indices() {
        if c == '+' || c == '-' {
            let chunk = &rhs[start..i];
            if !(start == 0 && chunk.trim().is_empty()) {
                out.push((sign, chunk));
            }
            sign = c == '+';
            start = i + 1;
        }
    }
    out.push((sign, &rhs[start..]));
    out
}

/// Expand one summand (`a`, `a:b`, `a*b:c`) into terms.
fn expand(chunk: &str, text: &str) -> Result<Vec<Term>> {
    let groups: Vec<Vec<String>> = chunk
        .split('*')
        .map(|g| {
            g.split(':')
                .map(|v| {
                    let v = v.trim();
                    check_name(v, text).map(|_| v.to_string())
                })
                .collect::<Result<Vec<_>>>()
        })
        .collect::<Result<_>>()?;

    let k = groups.len();
    let mut out: Vec<Term> = Vec::new();
    for size in 1..=k {
        for subset in combinations(k, size) {
            let mut factors: Vec<String> = Vec::new();
            for g in subset {
                for v in &groups[g] {
                    if !factors.contains(v) {
                        factors.push(v.clone());
                    }
                }
            }
            let term = Term { factors };
            if !out.iter().any(|t| t.key() == term.key()) {
                out.push(term);
            }
        }
    }
    Ok(out)
}

/// All `size`-subsets of `0..k` in lexicographic order.
fn combinations(k: usize, size: usize) -> Vec<Vec<usize>> {
    let mut out = Vec::new();
    let mut idx: Vec<usize> = (0..size).collect();
    loop {
        out.push(idx.clone());
        let mut i = size;
        while i > 0 && idx[i - 1] == k - size + i - 1 {
            i -= 1;
        }
        if i == 0 {
            return out;
        }
        idx[i - 1] += 1;
        for j in i..size {
            idx[j] = idx[j - 1] + 1;
        }
    }
}

fn check_name(name: &str, text: &str) -> Result<()> {
    let mut chars = name.chars();
    let ok = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '.' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
        }
        _ => false,
    };
    if ok {
        Ok(())
    } else {
        Err(Error::Validation(format!("invalid variable name '{name}' in formula '{text}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_parse_main_effects_and_interactions() {
        let f = Formula::parse("y ~ g + p + t + p:g + g:t + p:g:t").unwrap();
        assert_eq!(f.response(), "y");
        assert!(f.has_intercept());
        assert_eq!(
            f.coef_names(),
            vec!["(Intercept)", "g", "p", "t", "p:g", "g:t", "p:g:t"]
        );
    }

    #[test]
    fn test_star_expansion_degree_order() {
        let f = Formula::parse("y ~ a*b*c").unwrap();
        assert_eq!(
            f.coef_names(),
            vec!["(Intercept)", "a", "b", "c", "a:b", "a:c", "b:c", "a:b:c"]
        );
    }

    #[test]
    fn test_duplicates_and_removal() {
        let f = Formula::parse("y ~ a + b + b:a + a:b + a").unwrap();
        assert_eq!(f.coef_names(), vec!["(Intercept)", "a", "b", "b:a"]);

        let f = Formula::parse("y ~ a*b - a:b").unwrap();
        assert_eq!(f.coef_names(), vec!["(Intercept)", "a", "b"]);

        let f = Formula::parse("y ~ a - 1").unwrap();
        assert!(!f.has_intercept());
        let f = Formula::parse("y ~ 0 + a").unwrap();
        assert_eq!(f.coef_names(), vec!["a"]);
        let f = Formula::parse("y ~ -1 + a").unwrap();
        assert_eq!(f.coef_names(), vec!["a"]);
    }

    #[test]
    fn test_parse_errors() {
        assert!(Formula::parse("y a + b").is_err());
        assert!(Formula::parse("y ~ a + + b").is_err());
        assert!(Formula::parse("y ~ 2x").is_err());
        assert!(Formula::parse("y ~ 0").is_err());
        assert!(Formula::parse("~ a").is_err());
    }

    #[test]
    fn test_display_roundtrip() {
        let f = Formula::parse("y ~ a*b").unwrap();
        assert_eq!(f.to_string(), "y ~ a + b + a:b");
        assert_eq!(Formula::parse(&f.to_string()).unwrap(), f);
    }

    #[test]
    fn test_model_matrix_with_derived_hinge() {
        let frame = Frame::from_columns([
            ("y", vec![0.0; 4]),
            ("g", vec![0.0, 1.0, 0.0, 1.0]),
            ("t", vec![0.0, 2.0, 3.0, 5.0]),
        ])
        .unwrap();
        let f = Formula::parse("y ~ g + t + tp + g:tp")
            .unwrap()
            .with_derived("tp", Derived::Hinge { source: "t".into(), knot: 3.0 })
            .unwrap();
        assert_eq!(f.input_variables(), vec!["g", "t"]);
        let (x, names) = f.model_matrix(&frame).unwrap();
        assert_eq!(names.len(), 5);
        assert_relative_eq!(x[(3, 3)], 2.0);
        assert_relative_eq!(x[(3, 4)], 2.0);
        assert_relative_eq!(x[(2, 3)], 0.0);
        assert_relative_eq!(x[(1, 4)], 0.0);
    }

    #[test]
    fn test_row_derivative_chain_rule() {
        let f = Formula::parse("y ~ g + t + g:t + tp + g:tp")
            .unwrap()
            .with_derived("tp", Derived::Hinge { source: "t".into(), knot: 3.0 })
            .unwrap();
        let at = |g: f64, t: f64| move |n: &str| match n {
            "g" => Some(g),
            "t" => Some(t),
            _ => None,
        };
        assert_eq!(f.row_derivative("t", at(1.0, 1.0)).unwrap(), vec![0.0, 0.0, 1.0, 1.0, 0.0, 0.0]);
        assert_eq!(f.row_derivative("t", at(1.0, 4.0)).unwrap(), vec![0.0, 0.0, 1.0, 1.0, 1.0, 1.0]);
        assert_eq!(f.row_derivative("g", at(1.0, 4.0)).unwrap(), vec![0.0, 1.0, 0.0, 4.0, 0.0, 1.0]);
        assert!(f.depends_on("t"));
        assert!(!f.depends_on("z"));
        assert!(f.row_with(|_| None).is_err());
    }

    #[test]
    fn test_lookup_pins_derived_variable() {
        let f = Formula::parse("y ~ t + tp + g:tp")
            .unwrap()
            .with_derived("tp", Derived::Hinge { source: "t".into(), knot: 3.0 })
            .unwrap();
        let pinned = |n: &str| match n {
            "g" => Some(1.0),
            "t" => Some(5.0),
            "tp" => Some(0.0),
            _ => None,
        };
        assert_eq!(f.row_with(pinned).unwrap(), vec![1.0, 5.0, 0.0, 0.0]);
        assert_eq!(f.row_derivative("t", pinned).unwrap(), vec![0.0, 1.0, 0.0, 0.0]);
    }
}
