//! Complex survey designs: stratified, clustered, weighted samples.

mod design;
mod estimate;

pub use design::{DesignSpec, DesignSummary, SingletonMethod, SurveyDesign};
pub use estimate::{DomainEstimate, Statistic};
