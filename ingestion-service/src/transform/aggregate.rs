use std::collections::BTreeMap;

use serde::Deserialize;
use series_client::CanonicalRecord;

use crate::pipeline::{Envelope, PipelineError, Transform};

/// Reduces the values of one field within a `(utc, local)` group.
///
/// Missing values are skipped; a group with no values yields missing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reducer {
    #[default]
    Sum,
    Mean,
    Min,
    Max,
    First,
    Last,
}

impl Reducer {
    pub fn reduce<I>(self, values: I) -> Option<f64>
    where
        I: IntoIterator<Item = Option<f64>>,
    {
        let mut present = values.into_iter().flatten();
        let first = present.next()?;
        Some(match self {
            Reducer::Sum => present.fold(first, |acc, v| acc + v),
            Reducer::Mean => {
                let (sum, n) = present.fold((first, 1usize), |(s, n), v| (s + v, n + 1));
                sum / n as f64
            }
            Reducer::Min => present.fold(first, f64::min),
            Reducer::Max => present.fold(first, f64::max),
            Reducer::First => first,
            Reducer::Last => present.last().unwrap_or(first),
        })
    }
}

/// Groups records sharing `(utc, local)` and reduces each field.
#[derive(Debug, Clone)]
pub struct Aggregation {
    reducers: Vec<Reducer>,
}

impl Aggregation {
    pub fn new(
        fields: &[String],
        default: Reducer,
        overrides: &BTreeMap<String, Reducer>,
    ) -> Result<Self, PipelineError> {
        if let Some(unknown) = overrides.keys().find(|k| !fields.contains(k)) {
            return Err(PipelineError::Config(format!(
                "aggregate field '{unknown}' is not a measurement"
            )));
        }
        let reducers = fields
            .iter()
            .map(|f| overrides.get(f).copied().unwrap_or(default))
            .collect();
        Ok(Self { reducers })
    }

    fn reduce_group(&self, group: Vec<Envelope<CanonicalRecord>>) -> Option<Envelope<CanonicalRecord>> {
        let repeated = group.iter().any(|e| e.payload.is_duplicate_wallclock_hour);
        let measurements = self
            .reducers
            .iter()
            .enumerate()
            .map(|(idx, reducer)| {
                reducer.reduce(
                    group
                        .iter()
                        .map(|e| e.payload.measurements.get(idx).copied().flatten()),
                )
            })
            .collect();

        let mut head = group.into_iter().next()?;
        head.payload.measurements = measurements;
        head.payload.is_duplicate_wallclock_hour = repeated;
        Some(head)
    }
}

impl Transform<Vec<Envelope<CanonicalRecord>>, Vec<Envelope<CanonicalRecord>>> for Aggregation {
    fn apply(
        &self,
        mut input: Vec<Envelope<CanonicalRecord>>,
    ) -> Result<Vec<Envelope<CanonicalRecord>>, PipelineError> {
        input.sort_by_key(|e| (e.payload.utc, e.payload.local));

        let mut out = Vec::with_capacity(input.len());
        let mut group: Vec<Envelope<CanonicalRecord>> = Vec::new();
        for env in input {
            if let Some(last) = group.last() {
                if (last.payload.utc, last.payload.local) != (env.payload.utc, env.payload.local) {
                    out.extend(self.reduce_group(std::mem::take(&mut group)));
                }
            }
            group.push(env);
        }
        out.extend(self.reduce_group(group));

        Ok(out)
    }
}
