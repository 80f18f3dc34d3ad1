//! The error type shared by the svyts library crates.

use thiserror::Error;

/// Errors raised by the svyts library crates.
#[derive(Error, Debug)]
pub enum Error {
    /// Filesystem or network read/write failure.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// Cache manifests and result files.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// Bad input data, options or model specification.
    #[error("invalid input: {0}")]
    Validation(String),

    /// A column an extract or pooled table must carry is absent.
    #[error("missing field(s) in {table}: {field}")]
    MissingField {
        /// File or extract the field was looked up in.
        table: String,
        /// Absent fields, comma separated.
        field: String,
    },

    /// Numerical failure: singular design matrix, non-finite variance.
    #[error("numerical failure: {0}")]
    Computation(String),

    /// The operation needs a cargo feature this build lacks.
    #[error("{0}")]
    FeatureDisabled(String),
}

/// Result alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_field_message_names_source() {
        let e = Error::MissingField { table: "h216 (2019)".into(), field: "ERTEXP19".into() };
        let msg = e.to_string();
        assert!(msg.contains("h216 (2019)"));
        assert!(msg.contains("ERTEXP19"));
    }

    #[test]
    fn io_errors_convert() {
        fn open() -> Result<std::fs::File> {
            Ok(std::fs::File::open("/definitely/not/here.dat")?)
        }
        assert!(matches!(open(), Err(Error::Io(_))));
    }
}
