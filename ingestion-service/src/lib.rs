pub mod config;
pub mod jobs;
pub mod metrics_export;
pub mod observability;
pub mod pipeline;
pub mod sinks;
pub mod sources;
pub mod transform;

pub use pipeline::{Envelope, JobOutcome, Pipeline, PipelineError, SeriesWarning};
