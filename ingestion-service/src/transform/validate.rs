use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use series_client::{CanonicalRecord, MergedSeries};

use crate::pipeline::{Envelope, PipelineError, SeriesWarning};
use crate::transform::window::{DateBasis, DateWindow};

/// Stable sort by UTC; rows with equal UTC keep their input order.
pub fn sort_timeline(mut records: Vec<Envelope<CanonicalRecord>>) -> Vec<Envelope<CanonicalRecord>> {
    records.sort_by_key(|e| e.payload.utc);
    records
}

/// Every UTC timestamp must be strictly greater than its predecessor.
/// Both rows of each violating pair are reported.
pub fn validate_timeline(records: &[Envelope<CanonicalRecord>]) -> Result<(), PipelineError> {
    let mut offending = Vec::new();
    for pair in records.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);
        if next.payload.utc <= prev.payload.utc {
            if offending.last().map(|(o, _)| o) != Some(&prev.origin) {
                offending.push((prev.origin.clone(), prev.payload.utc));
            }
            offending.push((next.origin.clone(), next.payload.utc));
        }
    }

    if offending.is_empty() {
        Ok(())
    } else {
        Err(PipelineError::NonMonotonicTimeline { offending })
    }
}

/// Compares the row count against the count a gap-free series would have.
#[derive(Debug, Clone)]
pub struct CompletenessCheck {
    pub tz: Tz,
    pub interval: Duration,
    pub window: Option<DateWindow>,
}

impl CompletenessCheck {
    fn expected(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> usize {
        let step = self.interval.num_seconds().max(1);
        usize::try_from((end - start).num_seconds() / step).unwrap_or(0)
    }

    /// Warnings for the window, or for each calendar year present.
    pub fn check(&self, series: &MergedSeries) -> Vec<SeriesWarning> {
        let mut warnings = Vec::new();

        if let Some(window) = &self.window {
            if let Some((start, end)) = window.bounds(self.tz) {
                let expected = self.expected(start, end);
                if series.len() < expected {
                    warnings.push(SeriesWarning::IncompleteSeries {
                        period: format!("{}..={}", window.start, window.end),
                        expected,
                        actual: series.len(),
                    });
                }
            }
            return warnings;
        }

        let basis = DateBasis::Local;
        let mut per_year: BTreeMap<i32, usize> = BTreeMap::new();
        for record in &series.records {
            *per_year.entry(basis.date(&record.canonical).year()).or_default() += 1;
        }

        for (year, actual) in per_year {
            let bounds = NaiveDate::from_ymd_opt(year, 1, 1)
                .zip(NaiveDate::from_ymd_opt(year + 1, 1, 1))
                .and_then(|(a, b)| Some((basis.day_start(self.tz, a)?, basis.day_start(self.tz, b)?)));
            let Some((start, end)) = bounds else {
                continue;
            };
            let expected = self.expected(start, end);
            if actual < expected {
                warnings.push(SeriesWarning::IncompleteSeries {
                    period: year.to_string(),
                    expected,
                    actual,
                });
            }
        }
        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Origin;
    use chrono::TimeZone;
    use series_client::CanonicalSeries;
    use std::sync::Arc;

    fn hourly(tz: Tz, start: DateTime<Utc>, hours: i64) -> MergedSeries {
        let records = (0..hours)
            .map(|i| CanonicalRecord::from_utc(start + Duration::hours(i), tz, vec![Some(1.0)]))
            .collect();
        CanonicalSeries::new(vec!["kw".into()], records).into()
    }

    fn check(tz: Tz, window: Option<DateWindow>) -> CompletenessCheck {
        CompletenessCheck {
            tz,
            interval: Duration::hours(1),
            window,
        }
    }

    #[test]
    fn full_common_year_has_8760_rows() {
        let tz = chrono_tz::America::Denver;
        // Local midnight 2015-01-01 in Denver.
        let start = Utc.with_ymd_and_hms(2015, 1, 1, 7, 0, 0).unwrap();
        let series = hourly(tz, start, 8760);

        let last = &series.records.last().unwrap().canonical;
        assert_eq!(last.local.to_string(), "2015-12-31 23:00:00");
        assert!(check(tz, None).check(&series).is_empty());
    }

    #[test]
    fn full_leap_year_has_8784_rows() {
        let tz = chrono_tz::US::Eastern;
        let start = Utc.with_ymd_and_hms(2020, 1, 1, 5, 0, 0).unwrap();
        let series = hourly(tz, start, 8784);

        assert!(check(tz, None).check(&series).is_empty());

        let short = hourly(tz, start, 8783);
        assert_eq!(
            check(tz, None).check(&short),
            vec![SeriesWarning::IncompleteSeries {
                period: "2020".into(),
                expected: 8784,
                actual: 8783,
            }]
        );
    }

    #[test]
    fn window_expectation_spans_the_whole_range() {
        let tz = chrono_tz::UTC;
        let window = DateWindow {
            start: NaiveDate::from_ymd_opt(2019, 1, 1).unwrap(),
            end: NaiveDate::from_ymd_opt(2020, 12, 31).unwrap(),
            basis: DateBasis::Utc,
        };
        let start = Utc.with_ymd_and_hms(2019, 1, 1, 0, 0, 0).unwrap();

        assert!(check(tz, Some(window.clone())).check(&hourly(tz, start, 8760 + 8784)).is_empty());
        let warnings = check(tz, Some(window)).check(&hourly(tz, start, 8760));
        assert!(matches!(
            &warnings[..],
            [SeriesWarning::IncompleteSeries { expected: 17544, actual: 8760, .. }]
        ));
    }

    fn env(line: u64, hour: u32) -> Envelope<CanonicalRecord> {
        Envelope {
            payload: CanonicalRecord::from_utc(
                Utc.with_ymd_and_hms(2019, 1, 1, hour, 0, 0).unwrap(),
                chrono_tz::UTC,
                vec![],
            ),
            origin: Origin {
                input: Arc::from("in.csv"),
                line,
            },
        }
    }

    #[test]
    fn strictly_increasing_timeline_passes() {
        let records = sort_timeline(vec![env(3, 2), env(2, 1), env(4, 3)]);
        assert!(validate_timeline(&records).is_ok());
        let lines: Vec<_> = records.iter().map(|e| e.origin.line).collect();
        assert_eq!(lines, vec![2, 3, 4]);
    }

    #[test]
    fn duplicates_name_both_rows() {
        let records = sort_timeline(vec![env(2, 1), env(3, 2), env(4, 2), env(5, 2)]);
        match validate_timeline(&records) {
            Err(PipelineError::NonMonotonicTimeline { offending }) => {
                let lines: Vec<_> = offending.iter().map(|(o, _)| o.line).collect();
                assert_eq!(lines, vec![3, 4, 5]);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
