use std::path::PathBuf;

use series_client::{table, MergedSeries, TableLayout};

use super::atomic::write_atomic;
use crate::pipeline::{PipelineError, Sink};

/// Writes the job's series as one delimited file.
///
/// Rows go to a temporary file next to the destination, which is renamed
/// over it only once the whole table has been written.
pub struct CsvFileSink {
    job: String,
    path: PathBuf,
    layout: TableLayout,
}

impl CsvFileSink {
    pub fn new<P: Into<PathBuf>>(job: impl Into<String>, path: P, layout: TableLayout) -> Self {
        Self {
            job: job.into(),
            path: path.into(),
            layout,
        }
    }
}

impl Sink<MergedSeries> for CsvFileSink {
    fn write(&self, input: &MergedSeries) -> Result<(), PipelineError> {
        let written = write_atomic(&self.path, |out| table::write_merged(out, input, &self.layout))
            .map_err(|e| PipelineError::Sink(format!("{e:#}")));
        match written {
            Ok(()) => {
                tracing::info!(job = %self.job, path = %self.path.display(), rows = input.len(), "series written");
                Ok(())
            }
            Err(e) => {
                tracing::error!(job = %self.job, error = %e, "series write failed");
                metrics::counter!("sink_errors_total", "job" => self.job.clone()).increment(1);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use chrono::{Duration, TimeZone, Utc};
    use series_client::{CanonicalRecord, CanonicalSeries};

    fn series() -> MergedSeries {
        let tz = chrono_tz::America::Denver;
        let t0 = Utc.with_ymd_and_hms(2019, 1, 1, 7, 0, 0).unwrap();
        let records = vec![
            CanonicalRecord::from_utc(t0, tz, vec![Some(12.5)]),
            CanonicalRecord::from_utc(t0 + Duration::hours(1), tz, vec![None]),
        ];
        CanonicalSeries::new(vec!["kw".into()], records).into()
    }

    #[test]
    fn writes_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("out.csv");
        let mut layout = TableLayout::new(chrono_tz::America::Denver);
        layout.local_column = Some("mpt".into());

        CsvFileSink::new("t", &path, layout).write(&series()).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            "utc,mpt,kw\n2019-01-01 07:00:00,2019-01-01 00:00:00,12.5\n2019-01-01 08:00:00,2019-01-01 01:00:00,\n"
        );
        // Only the destination remains in the directory.
        assert_eq!(fs::read_dir(path.parent().unwrap()).unwrap().count(), 1);
    }

    #[test]
    fn replaces_existing_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        fs::write(&path, "stale").unwrap();

        CsvFileSink::new("t", &path, TableLayout::new(chrono_tz::UTC))
            .write(&series())
            .unwrap();
        assert!(fs::read_to_string(&path).unwrap().starts_with("utc,kw\n"));
    }
}
