//! Column-oriented raw tables as read from extract files.
//!
//! A [`RawTable`] keeps source column names and types untouched; the
//! [`schema`](crate::schema) step maps them onto the common person-year
//! layout.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use svy_core::{Error, Result};

use crate::xpt::{self, XptReadOptions, XptValue, XptVarType};

/// One column of a raw table.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    /// Numeric values; `None` is missing.
    Numeric(Vec<Option<f64>>),
    /// Text values; `None` is missing (blank).
    Text(Vec<Option<String>>),
}

impl Column {
    /// Number of values.
    pub fn len(&self) -> usize {
        match self {
            Column::Numeric(v) => v.len(),
            Column::Text(v) => v.len(),
        }
    }

    /// Whether the column is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Named columns read from one extract file.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTable {
    /// Source label used in error messages (file or member name).
    pub name: String,
    columns: Vec<(String, Column)>,
    n_rows: usize,
}

impl RawTable {
    /// Build a table from named columns of equal length.
    pub fn new(name: impl Into<String>, columns: Vec<(String, Column)>) -> Result<Self> {
        let name = name.into();
        let n_rows = columns.first().map_or(0, |(_, c)| c.len());
        if let Some((bad, col)) = columns.iter().find(|(_, c)| c.len() != n_rows) {
            return Err(Error::Validation(format!(
                "{name}: column '{bad}' has {} rows, expected {n_rows}",
                col.len()
            )));
        }
        Ok(Self { name, columns, n_rows })
    }

    /// Number of rows.
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    /// Column names in source order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(n, _)| n.as_str())
    }

    /// Case-insensitive column lookup.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|(n, _)| n.eq_ignore_ascii_case(name)).map(|(_, c)| c)
    }

    /// Whether a column exists (case-insensitive).
    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Numeric view of a column; text cells are parsed, blanks are missing.
    pub fn numeric(&self, name: &str) -> Result<Vec<Option<f64>>> {
        match self.require(name)? {
            Column::Numeric(v) => Ok(v.clone()),
            Column::Text(v) => v
                .iter()
                .enumerate()
                .map(|(row, cell)| match cell.as_deref().map(str::trim) {
                    None | Some("") | Some(".") => Ok(None),
                    Some(s) => s.parse::<f64>().map(Some).map_err(|_| {
                        Error::Validation(format!(
                            "{}: column '{name}' row {row}: '{s}' is not numeric",
                            self.name
                        ))
                    }),
                })
                .collect(),
        }
    }

    /// Text view of a column; integral numerics print without a decimal point.
    pub fn text(&self, name: &str) -> Result<Vec<Option<String>>> {
        match self.require(name)? {
            Column::Text(v) => Ok(v.clone()),
            Column::Numeric(v) => Ok(v
                .iter()
                .map(|cell| {
                    cell.map(|x| if x.fract() == 0.0 { format!("{x:.0}") } else { x.to_string() })
                })
                .collect()),
        }
    }

    fn require(&self, name: &str) -> Result<&Column> {
        self.column(name).ok_or_else(|| Error::MissingField {
            table: self.name.clone(),
            field: name.to_string(),
        })
    }

    /// Convert the first member of a transport dataset.
    pub fn from_xpt(ds: xpt::XptDataset) -> Result<Self> {
        let n_rows = ds.data.len();
        let mut columns = Vec::with_capacity(ds.variables.len());
        for (j, var) in ds.variables.iter().enumerate() {
            let col = match var.var_type {
                XptVarType::Numeric => Column::Numeric(
                    ds.data
                        .iter()
                        .map(|row| match &row[j] {
                            XptValue::Numeric(v) => Some(*v),
                            _ => None,
                        })
                        .collect(),
                ),
                XptVarType::Character => Column::Text(
                    ds.data
                        .iter()
                        .map(|row| match &row[j] {
                            XptValue::Character(s) if !s.is_empty() => Some(s.clone()),
                            _ => None,
                        })
                        .collect(),
                ),
            };
            debug_assert_eq!(col.len(), n_rows);
            columns.push((var.name.clone(), col));
        }
        Self::new(ds.name, columns)
    }
}

/// Read a SAS transport file (`.xpt`, `.ssp`) or CSV file into a [`RawTable`].
///
/// `columns` restricts what is kept (case-insensitive); missing names are not
/// an error here, the schema step reports them.
pub fn read_table(path: &Path, columns: Option<&[String]>) -> Result<RawTable> {
    let ext = path.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("xpt") | Some("ssp") => {
            let opts = XptReadOptions { columns: columns.map(<[String]>::to_vec) };
            let mut members = xpt::read_xpt_with(path, &opts)?;
            if members.is_empty() {
                return Err(Error::Validation(format!(
                    "{}: transport file has no members",
                    path.display()
                )));
            }
            let mut table = RawTable::from_xpt(members.swap_remove(0))?;
            table.name = file_label(path);
            Ok(table)
        }
        Some("csv") => read_csv(path, columns),
        _ => Err(Error::Validation(format!(
            "{}: unsupported extract format (expected .xpt, .ssp or .csv)",
            path.display()
        ))),
    }
}

/// Read a CSV extract. Columns whose every non-blank cell parses as a number
/// become numeric; everything else stays text.
pub fn read_csv(path: &Path, columns: Option<&[String]>) -> Result<RawTable> {
    let csv_err = |e: csv::Error| Error::Validation(format!("{}: {e}", path.display()));
    let file = File::open(path).map_err(|e| {
        Error::Io(std::io::Error::new(e.kind(), format!("{}: {e}", path.display())))
    })?;
    let mut reader = csv::Reader::from_reader(BufReader::new(file));
    let headers = reader.headers().map_err(csv_err)?.clone();

    let keep: Vec<usize> = headers
        .iter()
        .enumerate()
        .filter(|(_, h)| columns.is_none_or(|cols| cols.iter().any(|c| c.eq_ignore_ascii_case(h))))
        .map(|(i, _)| i)
        .collect();

    let mut cells: Vec<Vec<Option<String>>> = vec![Vec::new(); keep.len()];
    for record in reader.records() {
        let record = record.map_err(csv_err)?;
        for (slot, &i) in cells.iter_mut().zip(&keep) {
            let v = record.get(i).map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);
            slot.push(v);
        }
    }

    let columns = keep
        .iter()
        .zip(cells)
        .map(|(&i, values)| {
            let parsed: Option<Vec<Option<f64>>> = values
                .iter()
                .map(|v| match v.as_deref() {
                    None => Some(None),
                    Some(s) => s.parse::<f64>().ok().map(Some),
                })
                .collect();
            let col = match parsed {
                Some(nums) if values.iter().any(Option::is_some) => Column::Numeric(nums),
                _ => Column::Text(values),
            };
            (headers[i].to_string(), col)
        })
        .collect();
    RawTable::new(file_label(path), columns)
}

fn file_label(path: &Path) -> String {
    path.file_name().map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xpt::{XptDataset, XptVariable, write_xpt};

    #[test]
    fn test_numeric_view_parses_text() {
        let t = RawTable::new(
            "t",
            vec![("PANEL".into(), Column::Text(vec![Some("23".into()), None, Some(" 24 ".into())]))],
        )
        .unwrap();
        assert_eq!(t.numeric("panel").unwrap(), vec![Some(23.0), None, Some(24.0)]);
    }

    #[test]
    fn test_text_view_of_integral_numeric() {
        let t = RawTable::new("t", vec![("ID".into(), Column::Numeric(vec![Some(10001.0), None]))])
            .unwrap();
        assert_eq!(t.text("id").unwrap(), vec![Some("10001".into()), None]);
    }

    #[test]
    fn test_missing_column_names_table() {
        let t = RawTable::new("h216.ssp", vec![]).unwrap();
        match t.numeric("TOTEXP19") {
            Err(Error::MissingField { table, field }) => {
                assert_eq!(table, "h216.ssp");
                assert_eq!(field, "TOTEXP19");
            }
            other => panic!("expected MissingField, got {other:?}"),
        }
    }

    #[test]
    fn test_ragged_columns_rejected() {
        let r = RawTable::new(
            "t",
            vec![
                ("A".into(), Column::Numeric(vec![Some(1.0)])),
                ("B".into(), Column::Numeric(vec![Some(1.0), Some(2.0)])),
            ],
        );
        assert!(r.is_err());
    }

    #[test]
    fn test_read_csv_types_and_projection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("h36u21.csv");
        std::fs::write(&path, "DUPERSID,PANEL,STRA9621,NOTE\nA1,23,101,x\nA2,24,,y\n").unwrap();

        let t = read_csv(&path, Some(&["dupersid".to_string(), "STRA9621".to_string()])).unwrap();
        assert_eq!(t.names().collect::<Vec<_>>(), vec!["DUPERSID", "STRA9621"]);
        assert_eq!(t.numeric("STRA9621").unwrap(), vec![Some(101.0), None]);
        assert!(matches!(t.column("DUPERSID"), Some(Column::Text(_))));
        assert!(!t.has_column("NOTE"));
    }

    #[test]
    fn test_read_table_dispatches_on_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("h224.ssp");
        let ds = XptDataset {
            name: "H224".into(),
            label: String::new(),
            variables: vec![
                XptVariable::character("DUPERSID", "", 10),
                XptVariable::numeric("SEX", ""),
            ],
            data: vec![vec![XptValue::Character("2560001101".into()), XptValue::Numeric(2.0)]],
        };
        write_xpt(&path, &[ds]).unwrap();

        let t = read_table(&path, None).unwrap();
        assert_eq!(t.name, "h224.ssp");
        assert_eq!(t.n_rows(), 1);
        assert_eq!(t.numeric("sex").unwrap(), vec![Some(2.0)]);

        assert!(read_table(&dir.path().join("h224.sas7bdat"), None).is_err());
    }
}
