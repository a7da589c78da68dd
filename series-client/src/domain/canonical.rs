use chrono::{offset::LocalResult, DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

/// A single normalized observation.
///
/// `utc` is the identity of the record; `local` is the wall clock in `tz`
/// and may repeat during a fall-back transition.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalRecord {
    pub utc: DateTime<Utc>,
    pub local: NaiveDateTime,
    pub tz: Tz,
    pub measurements: Vec<Option<f64>>,
    pub is_duplicate_wallclock_hour: bool,
}

impl CanonicalRecord {
    /// Build a record from a UTC instant, deriving the local wall clock.
    pub fn from_utc(utc: DateTime<Utc>, tz: Tz, measurements: Vec<Option<f64>>) -> Self {
        let local = utc.with_timezone(&tz).naive_local();
        Self {
            utc,
            local,
            tz,
            measurements,
            is_duplicate_wallclock_hour: is_repeated_wallclock(tz, local),
        }
    }
}

/// True when `local` occurs twice in `tz` (the repeated hour at fall-back).
pub fn is_repeated_wallclock(tz: Tz, local: NaiveDateTime) -> bool {
    matches!(tz.from_local_datetime(&local), LocalResult::Ambiguous(_, _))
}

/// A canonical series: ordered field names plus records sorted by `utc`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CanonicalSeries {
    pub fields: Vec<String>,
    pub records: Vec<CanonicalRecord>,
}

impl CanonicalSeries {
    pub fn new(fields: Vec<String>, records: Vec<CanonicalRecord>) -> Self {
        Self { fields, records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f == name)
    }

    pub fn column(&self, idx: usize) -> Vec<Option<f64>> {
        self.records
            .iter()
            .map(|r| r.measurements.get(idx).copied().flatten())
            .collect()
    }

    pub fn set_column(&mut self, idx: usize, values: Vec<Option<f64>>) {
        for (record, value) in self.records.iter_mut().zip(values) {
            if let Some(slot) = record.measurements.get_mut(idx) {
                *slot = value;
            }
        }
    }

    pub fn is_strictly_increasing(&self) -> bool {
        self.records.windows(2).all(|w| w[0].utc < w[1].utc)
    }
}
