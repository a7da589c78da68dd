use std::collections::BTreeMap;

use serde::Deserialize;
use series_client::{CanonicalSeries, MergedSeries};

use crate::pipeline::{PipelineError, Transform};

/// Fills missing values of one column in place, returning how many were filled.
pub trait FillStrategy: Send + Sync {
    fn fill(&self, column: &mut [Option<f64>]) -> usize;
}

/// Each gap takes the most recent preceding value; leading gaps stay missing.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForwardFill;

impl FillStrategy for ForwardFill {
    fn fill(&self, column: &mut [Option<f64>]) -> usize {
        let mut last = None;
        let mut filled = 0;
        for slot in column.iter_mut() {
            match *slot {
                Some(v) => last = Some(v),
                None if last.is_some() => {
                    *slot = last;
                    filled += 1;
                }
                None => {}
            }
        }
        filled
    }
}

/// Each gap takes the next following value; trailing gaps stay missing.
#[derive(Debug, Clone, Copy, Default)]
pub struct BackwardFill;

impl FillStrategy for BackwardFill {
    fn fill(&self, column: &mut [Option<f64>]) -> usize {
        column.reverse();
        let filled = ForwardFill.fill(column);
        column.reverse();
        filled
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillPolicy {
    Forward,
    Backward,
}

impl FillPolicy {
    pub fn strategy(self) -> Box<dyn FillStrategy> {
        match self {
            FillPolicy::Forward => Box::new(ForwardFill),
            FillPolicy::Backward => Box::new(BackwardFill),
        }
    }
}

/// Per-field gap filling, in UTC order.
pub struct GapFill {
    job: String,
    columns: Vec<(String, Box<dyn FillStrategy>)>,
}

impl GapFill {
    pub fn new(job: impl Into<String>) -> Self {
        Self {
            job: job.into(),
            columns: Vec::new(),
        }
    }

    pub fn from_policies(job: impl Into<String>, policies: &BTreeMap<String, FillPolicy>) -> Self {
        policies
            .iter()
            .fold(Self::new(job), |fill, (field, policy)| fill.with(field.clone(), policy.strategy()))
    }

    /// Register a strategy for a field; later registrations run after earlier ones.
    pub fn with(mut self, field: impl Into<String>, strategy: Box<dyn FillStrategy>) -> Self {
        self.columns.push((field.into(), strategy));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    fn record(&self, field: &str, filled: usize) {
        if filled > 0 {
            tracing::debug!(job = %self.job, field, filled, "gaps filled");
            metrics::counter!("gap_fill_values_filled_total", "job" => self.job.clone(), "field" => field.to_string())
                .increment(filled as u64);
        }
    }

    fn unknown(&self, field: &str) -> PipelineError {
        PipelineError::Config(format!("job '{}': cannot fill unknown field '{field}'", self.job))
    }
}

impl Transform<CanonicalSeries, CanonicalSeries> for GapFill {
    fn apply(&self, mut input: CanonicalSeries) -> Result<CanonicalSeries, PipelineError> {
        for (field, strategy) in &self.columns {
            let idx = input.field_index(field).ok_or_else(|| self.unknown(field))?;
            let mut values = input.column(idx);
            let filled = strategy.fill(&mut values);
            input.set_column(idx, values);
            self.record(field, filled);
        }
        Ok(input)
    }
}

impl Transform<MergedSeries, MergedSeries> for GapFill {
    fn apply(&self, mut input: MergedSeries) -> Result<MergedSeries, PipelineError> {
        for (field, strategy) in &self.columns {
            let col = input.column_ref(field).ok_or_else(|| self.unknown(field))?;
            let mut values = input.column(col);
            let filled = strategy.fill(&mut values);
            input.set_column(col, values);
            self.record(field, filled);
        }
        Ok(input)
    }
}
