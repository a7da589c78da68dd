//! Builds pipelines from job configuration.

use chrono::Duration;
use series_client::{FeatureSpec, MergedSeries, TableLayout};

use crate::config::{JobConfig, SourceConfig};
use crate::pipeline::{Auxiliary, Inputs, JobOutcome, Pipeline, PipelineError, Transform};
use crate::sinks::CsvFileSink;
use crate::sources::DelimitedFileSource;
use crate::transform::{Aggregation, Canonicalizer, CompletenessCheck, GapFill, TimestampRule};

pub type FilePipeline = Pipeline<DelimitedFileSource, CsvFileSink>;

fn inputs(job: &JobConfig, source: &SourceConfig) -> Inputs<DelimitedFileSource> {
    Inputs {
        fields: source.field_names(),
        sources: DelimitedFileSource::from_config(&job.name, source),
        min_rows: source.min_rows,
        canonicalizer: Canonicalizer {
            job: job.name.clone(),
            tz: job.timezone,
            rule: TimestampRule::from(&source.timestamp),
            row_order: source.row_order,
            on_ambiguous: job.on_ambiguous,
        },
    }
}

/// Layout of the job's persisted table.
pub fn table_layout(job: &JobConfig) -> TableLayout {
    TableLayout {
        timezone: job.timezone,
        local_column: job.local_column.clone(),
        auxiliary: job
            .auxiliary
            .as_ref()
            .map(|aux| aux.source.field_names())
            .unwrap_or_default(),
    }
}

/// Lag settings for `derive_features`; defaults when the job has none.
pub fn feature_spec(job: &JobConfig) -> FeatureSpec {
    job.features
        .as_ref()
        .map(|f| FeatureSpec {
            lags: f.lags.clone(),
            fields: f.fields.clone(),
        })
        .unwrap_or_default()
}

pub fn build_pipeline(job: &JobConfig) -> Result<FilePipeline, PipelineError> {
    let primary = inputs(job, &job.source);

    let aggregation = job
        .aggregate
        .as_ref()
        .map(|agg| Aggregation::new(&primary.fields, agg.default, &agg.fields))
        .transpose()?;

    let auxiliary = job.auxiliary.as_ref().map(|aux| Auxiliary {
        inputs: inputs(job, &aux.source),
        fill: GapFill::from_policies(job.name.clone(), &aux.fill),
    });

    let mut transforms: Vec<Box<dyn Transform<MergedSeries, MergedSeries>>> = Vec::new();
    let fill = GapFill::from_policies(job.name.clone(), &job.fill);
    if !fill.is_empty() {
        transforms.push(Box::new(fill));
    }
    if let Some(window) = &job.window {
        transforms.push(Box::new(window.clone()));
    }

    Ok(Pipeline {
        name: job.name.clone(),
        primary,
        aggregation,
        auxiliary,
        transforms,
        completeness: CompletenessCheck {
            tz: job.timezone,
            interval: Duration::minutes(i64::from(job.sampling_interval_minutes)),
            window: job.window.clone(),
        },
        sink: CsvFileSink::new(job.name.clone(), &job.output, table_layout(job)),
    })
}

/// Build and run one job.
pub fn run_job(job: &JobConfig) -> Result<JobOutcome, PipelineError> {
    let span = tracing::info_span!("job", name = %job.name);
    let _enter = span.enter();

    tracing::info!(output = %job.output.display(), timezone = %job.timezone, "job starting");
    let outcome = build_pipeline(job)?.run()?;
    tracing::info!(rows = outcome.rows, warnings = outcome.warnings.len(), "job finished");
    Ok(outcome)
}
