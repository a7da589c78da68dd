use anyhow::{bail, Result};
use chrono::{Datelike, Timelike};

use crate::domain::{ColumnRef, FeatureRecord, FeatureTable, MergedSeries};

/// Shift a field by a fixed number of rows; the result is named `<field>_<suffix>`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
pub struct LagSpec {
    pub rows: usize,
    pub suffix: String,
}

impl LagSpec {
    pub fn new(rows: usize, suffix: impl Into<String>) -> Self {
        Self {
            rows,
            suffix: suffix.into(),
        }
    }
}

/// 2-day and 7-day lags at hourly cadence.
pub fn default_lags() -> Vec<LagSpec> {
    vec![LagSpec::new(48, "2"), LagSpec::new(168, "7")]
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureSpec {
    pub lags: Vec<LagSpec>,
    /// Fields to lag. Empty means every measurement field.
    pub fields: Vec<String>,
}

impl Default for FeatureSpec {
    fn default() -> Self {
        Self {
            lags: default_lags(),
            fields: Vec::new(),
        }
    }
}

/// Derive calendar and lag features from a series sorted by UTC.
///
/// Lags shift by row count, not by elapsed time: a gap in the series is not
/// corrected for.
pub fn derive_features(series: MergedSeries, spec: &FeatureSpec) -> Result<FeatureTable> {
    let lag_sources: Vec<(String, ColumnRef)> = if spec.fields.is_empty() {
        series
            .fields
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.clone(), ColumnRef::Measurement(idx)))
            .collect()
    } else {
        let mut out = Vec::with_capacity(spec.fields.len());
        for name in &spec.fields {
            match series.column_ref(name) {
                Some(col) => out.push((name.clone(), col)),
                None => bail!("lag field '{name}' is not a column of the series"),
            }
        }
        out
    };

    if let Some(lag) = spec.lags.iter().find(|l| l.rows == 0) {
        bail!("lag '{}' must shift by at least one row", lag.suffix);
    }

    let mut lag_fields = Vec::with_capacity(lag_sources.len() * spec.lags.len());
    let mut lag_columns = Vec::with_capacity(lag_fields.capacity());
    for (name, col) in &lag_sources {
        let values = series.column(*col);
        for lag in &spec.lags {
            lag_fields.push(format!("{name}_{}", lag.suffix));
            lag_columns.push(shift(&values, lag.rows));
        }
    }

    let records = series
        .records
        .into_iter()
        .enumerate()
        .map(|(row, merged)| {
            let local = merged.canonical.local;
            FeatureRecord {
                month: local.month(),
                hour: local.hour(),
                dayofweek: local.weekday().num_days_from_monday(),
                lags: lag_columns.iter().map(|c| c[row]).collect(),
                merged,
            }
        })
        .collect();

    Ok(FeatureTable {
        fields: series.fields,
        auxiliary_fields: series.auxiliary_fields,
        lag_fields,
        records,
    })
}

fn shift(values: &[Option<f64>], rows: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| if i >= rows { values[i - rows] } else { None })
        .collect()
}
