use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

/// Timestamp exactly as a source row encodes it, before any zone is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawTime {
    /// Wall-clock time in the source's prevailing local time.
    Local(NaiveDateTime),
    Utc(DateTime<Utc>),
    /// Calendar date plus a 1-based hour index; `hour` N starts at wall clock N-1.
    SplitDateHour { date: NaiveDate, hour: u8 },
}

/// One row of a source table. `values` follow the job's declared field order.
#[derive(Debug, Clone, PartialEq)]
pub struct RawObservation {
    pub time: RawTime,
    pub values: Vec<Option<f64>>,
}
