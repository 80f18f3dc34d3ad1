//! # svy-core
//!
//! Core types for svyts: the error enum, the numeric [`Frame`] every
//! estimator reads from, and the [`Estimate`] row every estimator returns.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{Estimate, Frame};

/// svyts version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
