//! Derive calendar and lag features from a job's persisted series.
//!
//! Usage: `derive_features <job>`; the job is looked up in the config named
//! by `INGESTION_CONFIG`.

use std::io;

use anyhow::{anyhow, Result};
use ingestion_service::{config::AppConfig, jobs, observability, sinks::write_atomic};
use series_client::{derive_features, table};

fn main() -> Result<()> {
    observability::init_tracing();

    let job_name = std::env::args()
        .nth(1)
        .ok_or_else(|| anyhow!("usage: derive_features <job>"))?;

    let cfg = AppConfig::load()?;
    let job = cfg
        .job(&job_name)
        .ok_or_else(|| anyhow!("no job named '{job_name}' in config"))?;

    let layout = jobs::table_layout(job);
    let series = table::load_merged_path(&job.output, &layout)?;
    let features = derive_features(series, &jobs::feature_spec(job))?;

    match job.features.as_ref().and_then(|f| f.output.as_ref()) {
        Some(path) => {
            write_atomic(path, |out| table::write_features(out, &features, &layout))?;
            tracing::info!(job = %job.name, path = %path.display(), rows = features.len(), "features written");
        }
        None => table::write_features(io::stdout().lock(), &features, &layout)?,
    }

    Ok(())
}
