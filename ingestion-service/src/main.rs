use anyhow::{Context, Result};
use ingestion_service::{config::AppConfig, jobs, metrics_export, observability};

fn run_all(cfg: &AppConfig) -> Result<()> {
    for job in &cfg.jobs {
        match jobs::run_job(job) {
            Ok(outcome) => {
                for warning in &outcome.warnings {
                    tracing::warn!(job = %job.name, %warning, "job finished with warning");
                }
            }
            Err(e) => {
                tracing::error!(job = %job.name, error = %e, "job failed");
                metrics::counter!("job_failures_total", "job" => job.name.clone()).increment(1);
                return Err(e).with_context(|| format!("job '{}' failed", job.name));
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    observability::init_tracing();

    // Load configuration
    let cfg = AppConfig::load()?;

    if cfg.metrics.is_some() {
        metrics_export::init()?;
    }

    // Jobs run in order; the first failure stops the run.
    let result = run_all(&cfg);

    if let Some(metrics_cfg) = &cfg.metrics {
        if let Err(e) = metrics_export::write_textfile(&metrics_cfg.textfile) {
            tracing::error!(error = %e, "failed to write metrics textfile");
        }
    }

    result
}
