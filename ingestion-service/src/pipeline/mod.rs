use std::{fmt, sync::Arc};

use chrono::{DateTime, NaiveDateTime, Utc};
use series_client::{CanonicalRecord, CanonicalSeries, MergedSeries, RawObservation};

use crate::transform::{
    aggregate::Aggregation,
    canonicalize::Canonicalizer,
    fill::GapFill,
    merge::merge_asof,
    validate::{sort_timeline, validate_timeline, CompletenessCheck},
};

/// Where a row came from: input file and 1-based line number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub input: Arc<str>,
    pub line: u64,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.input, self.line)
    }
}

#[derive(Debug, Clone)]
pub struct Envelope<T> {
    pub payload: T,
    pub origin: Origin,
}

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("source error: {0}")]
    Source(String),
    #[error("schema mismatch: column '{column}' not found in {input}")]
    SchemaMismatch { input: String, column: String },
    #[error("invalid value '{value}' in column '{column}' at {input}:{line}")]
    InvalidValue {
        input: String,
        line: u64,
        column: String,
        value: String,
    },
    #[error("ambiguous local time {local} at {input} lines {lines:?}: cannot infer offset from row order")]
    AmbiguousLocalTime {
        input: String,
        local: NaiveDateTime,
        lines: Vec<u64>,
    },
    #[error("nonexistent local time {local} at {input}:{line}")]
    NonexistentLocalTime {
        input: String,
        local: NaiveDateTime,
        line: u64,
    },
    #[error("non-monotonic UTC timeline: {}", describe_violations(.offending))]
    NonMonotonicTimeline { offending: Vec<(Origin, DateTime<Utc>)> },
    #[error("sink error: {0}")]
    Sink(String),
    #[error("config error: {0}")]
    Config(String),
}

fn describe_violations(offending: &[(Origin, DateTime<Utc>)]) -> String {
    const SHOWN: usize = 10;
    let mut parts: Vec<String> = offending
        .iter()
        .take(SHOWN)
        .map(|(origin, utc)| format!("{origin} ({utc})"))
        .collect();
    if offending.len() > SHOWN {
        parts.push(format!("and {} more", offending.len() - SHOWN));
    }
    parts.join(", ")
}

/// Non-fatal findings reported alongside a successful job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeriesWarning {
    IncompleteSeries {
        period: String,
        expected: usize,
        actual: usize,
    },
    SkippedInput {
        input: String,
        rows: usize,
        min_rows: usize,
    },
}

impl fmt::Display for SeriesWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IncompleteSeries {
                period,
                expected,
                actual,
            } => write!(f, "incomplete series for {period}: {actual} of {expected} rows"),
            Self::SkippedInput {
                input,
                rows,
                min_rows,
            } => write!(f, "skipped {input}: {rows} rows, fewer than {min_rows}"),
        }
    }
}

pub trait Source<T> {
    /// Human-readable name used in logs and error messages.
    fn name(&self) -> &str;

    fn read(&self) -> Result<Vec<Envelope<T>>, PipelineError>;
}

pub trait Transform<I, O> {
    fn apply(&self, input: I) -> Result<O, PipelineError>;
}

pub trait Sink<T> {
    fn write(&self, input: &T) -> Result<(), PipelineError>;
}

/// A set of inputs sharing one schema and one timestamp convention.
pub struct Inputs<S> {
    pub fields: Vec<String>,
    pub sources: Vec<S>,
    pub min_rows: Option<usize>,
    pub canonicalizer: Canonicalizer,
}

impl<S> Inputs<S>
where
    S: Source<RawObservation>,
{
    /// Read and canonicalize every source. Order inference runs per source.
    fn load(
        &self,
        job: &str,
        warnings: &mut Vec<SeriesWarning>,
    ) -> Result<Vec<Envelope<CanonicalRecord>>, PipelineError> {
        let mut out = Vec::new();
        for source in &self.sources {
            let rows = source.read()?;
            metrics::counter!("source_rows_read_total", "job" => job.to_string())
                .increment(rows.len() as u64);

            if let Some(min_rows) = self.min_rows {
                if rows.len() < min_rows {
                    tracing::warn!(job, input = source.name(), rows = rows.len(), min_rows, "skipping short input");
                    metrics::counter!("source_inputs_skipped_total", "job" => job.to_string()).increment(1);
                    warnings.push(SeriesWarning::SkippedInput {
                        input: source.name().to_string(),
                        rows: rows.len(),
                        min_rows,
                    });
                    continue;
                }
            }

            let records = self.canonicalizer.apply(rows)?;
            tracing::debug!(job, input = source.name(), records = records.len(), "input canonicalized");
            out.extend(records);
        }
        Ok(out)
    }
}

/// Auxiliary (e.g. weather) inputs merged onto the primary series as-of UTC.
pub struct Auxiliary<S> {
    pub inputs: Inputs<S>,
    pub fill: GapFill,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub rows: usize,
    pub warnings: Vec<SeriesWarning>,
}

/// One ingestion job: inputs in, one persisted series out.
pub struct Pipeline<S, K> {
    pub name: String,
    pub primary: Inputs<S>,
    pub aggregation: Option<Aggregation>,
    pub auxiliary: Option<Auxiliary<S>>,
    /// Same-type stages applied after the merge, in order.
    pub transforms: Vec<Box<dyn Transform<MergedSeries, MergedSeries>>>,
    pub completeness: CompletenessCheck,
    pub sink: K,
}

impl<S, K> Pipeline<S, K>
where
    S: Source<RawObservation>,
    K: Sink<MergedSeries>,
{
    /// Run the job to completion. Nothing is written unless every stage
    /// before the sink succeeded.
    pub fn run(self) -> Result<JobOutcome, PipelineError> {
        let job = self.name.as_str();
        let mut warnings = Vec::new();

        let records = self.primary.load(job, &mut warnings)?;
        let records = match &self.aggregation {
            Some(aggregation) => aggregation.apply(records)?,
            None => sort_timeline(records),
        };
        validate_timeline(&records)?;

        let primary = CanonicalSeries::new(
            self.primary.fields.clone(),
            records.into_iter().map(|e| e.payload).collect(),
        );

        let mut merged = match &self.auxiliary {
            Some(aux) => {
                let aux_records = sort_timeline(aux.inputs.load(job, &mut warnings)?);
                let aux_series = CanonicalSeries::new(
                    aux.inputs.fields.clone(),
                    aux_records.into_iter().map(|e| e.payload).collect(),
                );
                let aux_series: CanonicalSeries = aux.fill.apply(aux_series)?;
                let (merged, unmatched) = merge_asof(primary, &aux_series);
                if unmatched > 0 {
                    tracing::info!(job, unmatched, "rows precede all auxiliary data");
                    metrics::counter!("merge_unmatched_rows_total", "job" => job.to_string())
                        .increment(unmatched as u64);
                }
                merged
            }
            None => MergedSeries::from(primary),
        };

        for t in &self.transforms {
            merged = t.apply(merged)?;
        }

        for warning in self.completeness.check(&merged) {
            tracing::warn!(job, %warning, "series check");
            metrics::counter!("series_incomplete_total", "job" => job.to_string()).increment(1);
            warnings.push(warning);
        }

        self.sink.write(&merged)?;
        metrics::counter!("series_rows_written_total", "job" => job.to_string())
            .increment(merged.len() as u64);

        Ok(JobOutcome {
            rows: merged.len(),
            warnings,
        })
    }
}
