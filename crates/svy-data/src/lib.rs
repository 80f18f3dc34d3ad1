//! # svy-data
//!
//! Data preparation for the MEPS interrupted time-series analysis:
//!
//! - [`catalog`]: full-year and linkage file identifiers and URLs
//! - [`fetch`]: local cache, optional download (feature `fetch`), SHA-256 manifest
//! - [`xpt`] / [`table`]: SAS transport and CSV readers into raw tables
//! - [`schema`]: year-suffixed fields to the common schema
//! - [`pool`] / [`link`]: pooling with weight scaling and period stamping,
//!   then the design-code join
//! - [`frame`]: numeric analysis frame
//! - [`export`]: CSV (and Parquet with `arrow-io`)
//! - [`simulate`]: synthetic extracts with known effects

#![warn(missing_docs)]

pub mod catalog;
pub mod export;
pub mod fetch;
pub mod frame;
pub mod link;
pub mod pipeline;
pub mod pool;
pub mod schema;
pub mod simulate;
pub mod table;
pub mod xpt;

pub use catalog::{Catalog, ExtractId, ExtractKind};
pub use fetch::{FetchOptions, FetchedExtracts, fetch_all};
pub use frame::{FrameOptions, FrameReport, to_frame};
pub use link::{LinkReport, LinkageSchema, LinkageTable, link};
pub use pipeline::build_pooled;
pub use pool::{PersonYear, PooledTable, assign_period, pool};
pub use schema::{YearExtract, YearSchema, normalize};
pub use simulate::{SimulationConfig, SimulationSummary, simulate_extracts};
