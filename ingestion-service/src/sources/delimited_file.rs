use std::{fs::File, path::PathBuf, sync::Arc};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use csv::StringRecord;
use series_client::{RawObservation, RawTime};

use crate::config::{FieldMapping, RowFilter, SourceConfig, TimestampConvention};
use crate::pipeline::{Envelope, Origin, PipelineError, Source};

/// Formats tried in order when a timestamp column declares none.
pub const DEFAULT_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%m/%d/%Y %I:%M:%S %p",
];

pub const DEFAULT_DATE_FORMAT: &str = "%Y%m%d";

/// One delimited text file with a header row.
///
/// Measurement columns are looked up by header name and emitted in the
/// declared field order. Cells matching one of `na_values` become missing;
/// any other non-numeric cell is an `InvalidValue` error.
pub struct DelimitedFileSource {
    job: String,
    path: PathBuf,
    name: String,
    delimiter: u8,
    na_values: Vec<String>,
    filter: Option<RowFilter>,
    timestamp: TimestampConvention,
    measurements: Vec<FieldMapping>,
}

/// Header positions resolved once per file.
struct Columns {
    time: TimeColumns,
    measurements: Vec<(usize, String)>,
    filter: Option<(usize, String)>,
}

enum TimeColumns {
    Local(usize, String),
    Utc(usize, String),
    Split { date: (usize, String), hour: (usize, String) },
}

impl DelimitedFileSource {
    pub fn new<P: Into<PathBuf>>(job: impl Into<String>, path: P, config: &SourceConfig) -> Self {
        let path = path.into();
        Self {
            job: job.into(),
            name: path.display().to_string(),
            path,
            delimiter: config.delimiter as u8,
            na_values: config.na_values.clone(),
            filter: config.filter.clone(),
            timestamp: config.timestamp.clone(),
            measurements: config.measurements.clone(),
        }
    }

    /// One source per configured path, in declared order.
    pub fn from_config(job: &str, config: &SourceConfig) -> Vec<Self> {
        config.paths.iter().map(|p| Self::new(job, p, config)).collect()
    }

    fn resolve(&self, headers: &StringRecord) -> Result<Columns, PipelineError> {
        let position = |name: &str| -> Result<(usize, String), PipelineError> {
            headers
                .iter()
                .position(|h| h.trim() == name)
                .map(|idx| (idx, name.to_string()))
                .ok_or_else(|| PipelineError::SchemaMismatch {
                    input: self.name.clone(),
                    column: name.to_string(),
                })
        };

        let time = match &self.timestamp {
            TimestampConvention::Local { column, .. } => {
                let (idx, name) = position(column)?;
                TimeColumns::Local(idx, name)
            }
            TimestampConvention::Utc { column, .. } => {
                let (idx, name) = position(column)?;
                TimeColumns::Utc(idx, name)
            }
            TimestampConvention::SplitDateHour {
                date_column,
                hour_column,
                ..
            } => TimeColumns::Split {
                date: position(date_column)?,
                hour: position(hour_column)?,
            },
        };

        let measurements = self
            .measurements
            .iter()
            .map(|m| position(&m.column))
            .collect::<Result<Vec<_>, _>>()?;

        let filter = match &self.filter {
            Some(f) => Some((position(&f.column)?.0, f.equals.clone())),
            None => None,
        };

        Ok(Columns {
            time,
            measurements,
            filter,
        })
    }

    fn invalid(&self, line: u64, column: &str, value: &str) -> PipelineError {
        metrics::counter!("source_parse_errors_total", "job" => self.job.clone()).increment(1);
        PipelineError::InvalidValue {
            input: self.name.clone(),
            line,
            column: column.to_string(),
            value: value.to_string(),
        }
    }

    fn parse_optional_f64(&self, s: &str, line: u64, column: &str) -> Result<Option<f64>, PipelineError> {
        let trimmed = s.trim();
        if self.na_values.iter().any(|na| na == trimmed) {
            return Ok(None);
        }
        match trimmed.parse::<f64>() {
            Ok(v) if v.is_nan() => Ok(None),
            Ok(v) => Ok(Some(v)),
            Err(_) => Err(self.invalid(line, column, s)),
        }
    }

    fn parse_time(&self, record: &StringRecord, columns: &TimeColumns, line: u64) -> Result<RawTime, PipelineError> {
        let cell = |idx: usize| record.get(idx).unwrap_or("").trim();

        match (columns, &self.timestamp) {
            (TimeColumns::Local(idx, name), TimestampConvention::Local { format, .. }) => {
                parse_naive(cell(*idx), format.as_deref())
                    .map(RawTime::Local)
                    .ok_or_else(|| self.invalid(line, name, cell(*idx)))
            }
            (TimeColumns::Utc(idx, name), TimestampConvention::Utc { format, .. }) => {
                parse_utc(cell(*idx), format.as_deref())
                    .map(RawTime::Utc)
                    .ok_or_else(|| self.invalid(line, name, cell(*idx)))
            }
            (
                TimeColumns::Split { date, hour },
                TimestampConvention::SplitDateHour { date_format, .. },
            ) => {
                let fmt = date_format.as_deref().unwrap_or(DEFAULT_DATE_FORMAT);
                let d = NaiveDate::parse_from_str(cell(date.0), fmt)
                    .map_err(|_| self.invalid(line, &date.1, cell(date.0)))?;
                let h: u8 = cell(hour.0)
                    .parse()
                    .map_err(|_| self.invalid(line, &hour.1, cell(hour.0)))?;
                Ok(RawTime::SplitDateHour { date: d, hour: h })
            }
            _ => Err(PipelineError::Source(format!(
                "{}: timestamp columns do not match the declared convention",
                self.name
            ))),
        }
    }
}

fn parse_naive(s: &str, format: Option<&str>) -> Option<NaiveDateTime> {
    match format {
        Some(fmt) => NaiveDateTime::parse_from_str(s, fmt).ok(),
        None => DEFAULT_DATETIME_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok()),
    }
}

fn parse_utc(s: &str, format: Option<&str>) -> Option<DateTime<Utc>> {
    if let Some(fmt) = format {
        return DateTime::parse_from_str(s, fmt)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| parse_naive(s, Some(fmt)).map(|n| n.and_utc()));
    }
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| parse_naive(s, None).map(|n| n.and_utc()))
}

impl Source<RawObservation> for DelimitedFileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&self) -> Result<Vec<Envelope<RawObservation>>, PipelineError> {
        let file = File::open(&self.path)
            .map_err(|e| PipelineError::Source(format!("failed to open {}: {e}", self.name)))?;
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            .flexible(true)
            .from_reader(file);
        let headers = rdr
            .headers()
            .map_err(|e| PipelineError::Source(format!("failed to read headers of {}: {e}", self.name)))?
            .clone();
        let columns = self.resolve(&headers)?;
        let input: Arc<str> = Arc::from(self.name.as_str());

        let mut out = Vec::new();
        for result in rdr.records() {
            let record = result
                .map_err(|e| PipelineError::Source(format!("failed to read record from {}: {e}", self.name)))?;
            let line = record.position().map(|p| p.line()).unwrap_or(0);

            if let Some((idx, wanted)) = &columns.filter {
                if record.get(*idx).map(str::trim) != Some(wanted.as_str()) {
                    continue;
                }
            }

            let time = self.parse_time(&record, &columns.time, line)?;
            let values = columns
                .measurements
                .iter()
                .map(|(idx, name)| self.parse_optional_f64(record.get(*idx).unwrap_or(""), line, name))
                .collect::<Result<Vec<_>, _>>()?;

            out.push(Envelope {
                payload: RawObservation { time, values },
                origin: Origin {
                    input: Arc::clone(&input),
                    line,
                },
            });
        }

        tracing::debug!(job = %self.job, input = %self.name, rows = out.len(), "source read");
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NonexistentPolicy, RowOrder};
    use chrono::TimeZone;
    use std::io::Write;

    fn config(timestamp: TimestampConvention, measurements: &[(&str, &str)]) -> SourceConfig {
        SourceConfig {
            paths: vec![],
            delimiter: ',',
            na_values: vec!["".into(), "NA".into(), "M".into()],
            row_order: RowOrder::Chronological,
            min_rows: None,
            filter: None,
            timestamp,
            measurements: measurements
                .iter()
                .map(|(name, column)| FieldMapping {
                    name: name.to_string(),
                    column: column.to_string(),
                })
                .collect(),
        }
    }

    fn local(column: &str) -> TimestampConvention {
        TimestampConvention::Local {
            column: column.into(),
            format: None,
            nonexistent: NonexistentPolicy::Reject,
        }
    }

    fn write_file(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn reads_measurements_in_declared_order() {
        let f = write_file("Date,Load,Temp\n2019-01-01 00:00:00,5,-3.5\n01/01/2019 01:00,NA,-4\n");
        let cfg = config(local("Date"), &[("temp", "Temp"), ("load", "Load")]);
        let rows = DelimitedFileSource::new("t", f.path(), &cfg).read().unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].payload.values, vec![Some(-3.5), Some(5.0)]);
        assert_eq!(rows[1].payload.values, vec![Some(-4.0), None]);
        assert_eq!(
            rows[1].payload.time,
            RawTime::Local(
                NaiveDate::from_ymd_opt(2019, 1, 1)
                    .unwrap()
                    .and_hms_opt(1, 0, 0)
                    .unwrap()
            )
        );
        assert_eq!(rows[0].origin.line, 2);
        assert_eq!(rows[1].origin.line, 3);
    }

    #[test]
    fn missing_column_is_a_schema_mismatch() {
        let f = write_file("Date,Load\n2019-01-01 00:00:00,5\n");
        let cfg = config(local("Date"), &[("load", "MW")]);
        let err = DelimitedFileSource::new("t", f.path(), &cfg).read().unwrap_err();
        assert!(matches!(err, PipelineError::SchemaMismatch { column, .. } if column == "MW"));
    }

    #[test]
    fn unknown_token_is_an_invalid_value() {
        let f = write_file("Date,Load\n2019-01-01 00:00:00,5\n2019-01-01 01:00:00,oops\n");
        let cfg = config(local("Date"), &[("load", "Load")]);
        match DelimitedFileSource::new("t", f.path(), &cfg).read() {
            Err(PipelineError::InvalidValue { line, column, value, .. }) => {
                assert_eq!(line, 3);
                assert_eq!(column, "Load");
                assert_eq!(value, "oops");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn filter_keeps_matching_rows_only() {
        let f = write_file(
            "ts;region;mw\n2019-01-01T00:00:00Z;COAST;1\n2019-01-01T00:00:00Z;WEST;2\n2019-01-01T01:00:00+00:00;COAST;3\n",
        );
        let mut cfg = config(
            TimestampConvention::Utc {
                column: "ts".into(),
                format: None,
            },
            &[("mw", "mw")],
        );
        cfg.delimiter = ';';
        cfg.filter = Some(RowFilter {
            column: "region".into(),
            equals: "COAST".into(),
        });
        let rows = DelimitedFileSource::new("t", f.path(), &cfg).read().unwrap();

        let values: Vec<_> = rows.iter().map(|r| r.payload.values[0]).collect();
        assert_eq!(values, vec![Some(1.0), Some(3.0)]);
        assert_eq!(
            rows[1].payload.time,
            RawTime::Utc(Utc.with_ymd_and_hms(2019, 1, 1, 1, 0, 0).unwrap())
        );
    }

    #[test]
    fn split_columns_parse_date_and_hour() {
        let f = write_file("day,he,kw\n20181104,25,7\n");
        let cfg = config(
            TimestampConvention::SplitDateHour {
                date_column: "day".into(),
                hour_column: "he".into(),
                date_format: None,
                fall_back_hour: 25,
                spring_forward_hour: 2,
                remap_spring_forward: true,
            },
            &[("kw", "kw")],
        );
        let rows = DelimitedFileSource::new("t", f.path(), &cfg).read().unwrap();
        assert_eq!(
            rows[0].payload.time,
            RawTime::SplitDateHour {
                date: NaiveDate::from_ymd_opt(2018, 11, 4).unwrap(),
                hour: 25,
            }
        );
    }

    #[test]
    fn naive_utc_strings_are_taken_as_utc() {
        assert_eq!(
            parse_utc("2019-07-01 05:00:00", None),
            Some(Utc.with_ymd_and_hms(2019, 7, 1, 5, 0, 0).unwrap())
        );
        assert_eq!(
            parse_utc("2019-07-01T00:00:00-05:00", None),
            Some(Utc.with_ymd_and_hms(2019, 7, 1, 5, 0, 0).unwrap())
        );
        assert_eq!(parse_utc("yesterday", None), None);
    }
}
