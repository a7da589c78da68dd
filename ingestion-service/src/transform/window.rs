use chrono::{offset::LocalResult, DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use series_client::{CanonicalRecord, MergedSeries};

use crate::pipeline::{PipelineError, Transform};

/// Which clock a calendar date is read from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateBasis {
    #[default]
    Local,
    Utc,
}

impl DateBasis {
    pub fn date(self, record: &CanonicalRecord) -> NaiveDate {
        match self {
            DateBasis::Local => record.local.date(),
            DateBasis::Utc => record.utc.date_naive(),
        }
    }

    /// The instant a calendar date starts on this clock.
    pub fn day_start(self, tz: Tz, date: NaiveDate) -> Option<DateTime<Utc>> {
        let midnight = date.and_time(NaiveTime::MIN);
        match self {
            DateBasis::Utc => Some(Utc.from_utc_datetime(&midnight)),
            DateBasis::Local => match tz.from_local_datetime(&midnight) {
                LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => Some(dt.with_timezone(&Utc)),
                // Zones that skip midnight start the day at the first valid hour.
                LocalResult::None => tz
                    .from_local_datetime(&(midnight + Duration::hours(1)))
                    .earliest()
                    .map(|dt| dt.with_timezone(&Utc)),
            },
        }
    }
}

/// Inclusive calendar-date filter.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
    #[serde(default)]
    pub basis: DateBasis,
}

impl DateWindow {
    pub fn contains(&self, record: &CanonicalRecord) -> bool {
        let date = self.basis.date(record);
        self.start <= date && date <= self.end
    }

    /// Half-open UTC range covered by the window.
    pub fn bounds(&self, tz: Tz) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let start = self.basis.day_start(tz, self.start)?;
        let end = self.basis.day_start(tz, self.end.succ_opt()?)?;
        Some((start, end))
    }
}

impl Transform<MergedSeries, MergedSeries> for DateWindow {
    fn apply(&self, mut input: MergedSeries) -> Result<MergedSeries, PipelineError> {
        let before = input.len();
        input.records.retain(|r| self.contains(&r.canonical));
        tracing::debug!(
            start = %self.start,
            end = %self.end,
            kept = input.len(),
            dropped = before - input.len(),
            "date window applied"
        );
        Ok(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use series_client::CanonicalSeries;

    fn series(tz: Tz) -> MergedSeries {
        // 2018-12-31 22:00Z .. 2019-01-01 03:00Z
        let t0 = Utc.with_ymd_and_hms(2018, 12, 31, 22, 0, 0).unwrap();
        let records = (0..6)
            .map(|i| CanonicalRecord::from_utc(t0 + Duration::hours(i), tz, vec![Some(i as f64)]))
            .collect();
        CanonicalSeries::new(vec!["mw".into()], records).into()
    }

    fn window(basis: DateBasis) -> DateWindow {
        DateWindow {
            start: NaiveDate::from_ymd_opt(2019, 1, 1).unwrap(),
            end: NaiveDate::from_ymd_opt(2019, 12, 31).unwrap(),
            basis,
        }
    }

    #[test]
    fn filters_on_utc_date() {
        let out = window(DateBasis::Utc).apply(series(chrono_tz::US::Eastern)).unwrap();
        assert_eq!(out.len(), 4);
        assert_eq!(out.records[0].canonical.utc, Utc.with_ymd_and_hms(2019, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn filters_on_local_date() {
        // In New York every row is still 2018-12-31 local time.
        let out = window(DateBasis::Local).apply(series(chrono_tz::US::Eastern)).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn local_bounds_follow_the_zone() {
        let (start, end) = window(DateBasis::Local).bounds(chrono_tz::US::Eastern).unwrap();
        assert_eq!(start, Utc.with_ymd_and_hms(2019, 1, 1, 5, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2020, 1, 1, 5, 0, 0).unwrap());
        assert_eq!((end - start).num_hours(), 8760);
    }
}
