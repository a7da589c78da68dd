//! Timestamp canonicalization: raw source timestamps to `(utc, local)` pairs.
//!
//! Repeated wall-clock hours are resolved from row order: inside each run of
//! ambiguous rows the local clock must step backward exactly once; rows before
//! the step take the earlier offset, rows after it the later one. Sources in
//! zones with daylight saving must therefore keep their original chronological
//! row order, or declare it reversed. A backward step anywhere else is
//! reported as a non-monotonic timeline.

use chrono::{
    offset::LocalResult, DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc,
};
use chrono_tz::Tz;
use series_client::{domain::is_repeated_wallclock, CanonicalRecord, RawObservation, RawTime};

use crate::config::{AmbiguityPolicy, NonexistentPolicy, RowOrder, TimestampConvention};
use crate::pipeline::{Envelope, Origin, PipelineError, Transform};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimestampRule {
    Local {
        nonexistent: NonexistentPolicy,
    },
    /// Hour index 1..=24 plus a fall-back code for the repeated hour.
    /// Nonexistent wall-clock times are always shifted forward one hour.
    SplitDateHour {
        hour_column: String,
        fall_back_hour: u8,
        spring_forward_hour: Option<u8>,
    },
    Utc,
}

impl From<&TimestampConvention> for TimestampRule {
    fn from(convention: &TimestampConvention) -> Self {
        match convention {
            TimestampConvention::Local { nonexistent, .. } => TimestampRule::Local {
                nonexistent: *nonexistent,
            },
            TimestampConvention::SplitDateHour {
                hour_column,
                fall_back_hour,
                spring_forward_hour,
                remap_spring_forward,
                ..
            } => TimestampRule::SplitDateHour {
                hour_column: hour_column.clone(),
                fall_back_hour: *fall_back_hour,
                spring_forward_hour: remap_spring_forward.then_some(*spring_forward_hour),
            },
            TimestampConvention::Utc { .. } => TimestampRule::Utc,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Canonicalizer {
    pub job: String,
    pub tz: Tz,
    pub rule: TimestampRule,
    pub row_order: RowOrder,
    pub on_ambiguous: AmbiguityPolicy,
}

struct WallClock {
    local: NaiveDateTime,
    /// Secondary sort key; the raw hour index for split sources.
    rank: u8,
    values: Vec<Option<f64>>,
    origin: Origin,
}

fn midnight(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN)
}

/// First wall-clock hour of `date` that occurs twice in `tz`.
fn repeated_hour(tz: Tz, date: NaiveDate) -> Option<NaiveDateTime> {
    (0..24)
        .map(|h| midnight(date) + Duration::hours(h))
        .find(|t| is_repeated_wallclock(tz, *t))
}

/// True when some wall-clock hour of `date` does not exist in `tz`.
fn has_gap(tz: Tz, date: NaiveDate) -> bool {
    (0..24)
        .map(|h| midnight(date) + Duration::hours(h))
        .any(|t| matches!(tz.from_local_datetime(&t), LocalResult::None))
}

impl Canonicalizer {
    fn mismatch(&self, origin: &Origin, found: &RawTime) -> PipelineError {
        PipelineError::Source(format!(
            "{origin}: timestamp {found:?} does not match the declared {:?} convention",
            self.rule
        ))
    }

    fn record(&self, dt: DateTime<Tz>, wall: WallClock, repeated: bool) -> Envelope<CanonicalRecord> {
        Envelope {
            payload: CanonicalRecord {
                utc: dt.with_timezone(&Utc),
                local: wall.local,
                tz: self.tz,
                measurements: wall.values,
                is_duplicate_wallclock_hour: repeated,
            },
            origin: wall.origin,
        }
    }

    /// Apply the nonexistent-time policy to a wall-clock time.
    fn resolve_gap(
        &self,
        local: NaiveDateTime,
        policy: NonexistentPolicy,
        origin: &Origin,
    ) -> Result<NaiveDateTime, PipelineError> {
        let missing = |t: &NaiveDateTime| matches!(self.tz.from_local_datetime(t), LocalResult::None);
        if !missing(&local) {
            return Ok(local);
        }

        let err = || PipelineError::NonexistentLocalTime {
            input: origin.input.to_string(),
            local,
            line: origin.line,
        };
        match policy {
            NonexistentPolicy::Reject => Err(err()),
            NonexistentPolicy::ShiftForward => {
                let shifted = local + Duration::hours(1);
                if missing(&shifted) {
                    return Err(err());
                }
                tracing::debug!(job = %self.job, %origin, %local, %shifted, "nonexistent local time shifted forward");
                metrics::counter!("canonicalize_nonexistent_shifted_total", "job" => self.job.clone())
                    .increment(1);
                Ok(shifted)
            }
        }
    }

    fn from_utc(&self, env: Envelope<RawObservation>) -> Result<Envelope<CanonicalRecord>, PipelineError> {
        match env.payload.time {
            RawTime::Utc(utc) => Ok(Envelope {
                payload: CanonicalRecord::from_utc(utc, self.tz, env.payload.values),
                origin: env.origin,
            }),
            other => Err(self.mismatch(&env.origin, &other)),
        }
    }

    fn local_wall(
        &self,
        env: Envelope<RawObservation>,
        nonexistent: NonexistentPolicy,
    ) -> Result<WallClock, PipelineError> {
        let local = match env.payload.time {
            RawTime::Local(t) => t,
            other => return Err(self.mismatch(&env.origin, &other)),
        };
        Ok(WallClock {
            local: self.resolve_gap(local, nonexistent, &env.origin)?,
            rank: 0,
            values: env.payload.values,
            origin: env.origin,
        })
    }

    fn split_wall(
        &self,
        env: Envelope<RawObservation>,
        hour_column: &str,
        fall_back_hour: u8,
        spring_forward_hour: Option<u8>,
    ) -> Result<WallClock, PipelineError> {
        let (date, hour) = match env.payload.time {
            RawTime::SplitDateHour { date, hour } => (date, hour),
            other => return Err(self.mismatch(&env.origin, &other)),
        };
        let invalid = || PipelineError::InvalidValue {
            input: env.origin.input.to_string(),
            line: env.origin.line,
            column: hour_column.to_string(),
            value: hour.to_string(),
        };

        let local = if hour == fall_back_hour {
            // The extra hour of a fall-back day is the date's repeated wall-clock hour.
            repeated_hour(self.tz, date).ok_or_else(invalid)?
        } else if (1..=24).contains(&hour) {
            let effective = match spring_forward_hour {
                Some(code) if hour == code && has_gap(self.tz, date) => hour + 1,
                _ => hour,
            };
            midnight(date) + Duration::hours(i64::from(effective) - 1)
        } else {
            return Err(invalid());
        };

        Ok(WallClock {
            local: self.resolve_gap(local, NonexistentPolicy::ShiftForward, &env.origin)?,
            rank: hour,
            values: env.payload.values,
            origin: env.origin,
        })
    }

    /// Wall clocks may only step backward inside a run of repeated-hour rows
    /// on one date. Any other step means the declared row order is wrong.
    fn check_order(&self, walls: &[WallClock]) -> Result<(), PipelineError> {
        let repeated = |w: &WallClock| is_repeated_wallclock(self.tz, w.local);
        let mut offending: Vec<(Origin, DateTime<Utc>)> = Vec::new();

        for pair in walls.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            let in_run = repeated(prev) && repeated(next) && prev.local.date() == next.local.date();
            if next.local > prev.local || in_run {
                continue;
            }
            for wall in [prev, next] {
                if offending.last().map(|(o, _)| o) == Some(&wall.origin) {
                    continue;
                }
                if let Some(dt) = self.tz.from_local_datetime(&wall.local).earliest() {
                    offending.push((wall.origin.clone(), dt.with_timezone(&Utc)));
                }
            }
        }

        if offending.is_empty() {
            return Ok(());
        }
        tracing::error!(job = %self.job, rows = offending.len(), "wall clock steps backward outside a repeated hour");
        metrics::counter!("canonicalize_order_violations_total", "job" => self.job.clone())
            .increment(offending.len() as u64);
        Err(PipelineError::NonMonotonicTimeline { offending })
    }

    /// Localize wall-clock rows that are already in chronological order.
    fn localize(&self, walls: Vec<WallClock>) -> Result<Vec<Envelope<CanonicalRecord>>, PipelineError> {
        self.check_order(&walls)?;
        let mut out = Vec::with_capacity(walls.len());
        let mut run: Vec<WallClock> = Vec::new();

        for wall in walls {
            match self.tz.from_local_datetime(&wall.local) {
                LocalResult::Single(dt) => {
                    self.flush_run(&mut run, &mut out)?;
                    out.push(self.record(dt, wall, false));
                }
                LocalResult::Ambiguous(_, _) => {
                    if run.last().is_some_and(|prev| prev.local.date() != wall.local.date()) {
                        self.flush_run(&mut run, &mut out)?;
                    }
                    run.push(wall);
                }
                LocalResult::None => {
                    return Err(PipelineError::NonexistentLocalTime {
                        input: wall.origin.input.to_string(),
                        local: wall.local,
                        line: wall.origin.line,
                    })
                }
            }
        }
        self.flush_run(&mut run, &mut out)?;

        Ok(out)
    }

    /// Resolve one run of consecutive ambiguous rows.
    fn flush_run(
        &self,
        run: &mut Vec<WallClock>,
        out: &mut Vec<Envelope<CanonicalRecord>>,
    ) -> Result<(), PipelineError> {
        if run.is_empty() {
            return Ok(());
        }
        let walls = std::mem::take(run);

        let steps: Vec<usize> = (1..walls.len())
            .filter(|&k| walls[k].local <= walls[k - 1].local)
            .collect();

        if let &[split] = steps.as_slice() {
            let mut resolved = Vec::with_capacity(walls.len());
            for (k, wall) in walls.into_iter().enumerate() {
                let candidates = self.tz.from_local_datetime(&wall.local);
                let dt = if k < split {
                    candidates.earliest()
                } else {
                    candidates.latest()
                };
                match dt {
                    Some(dt) => resolved.push(self.record(dt, wall, true)),
                    None => {
                        return Err(PipelineError::NonexistentLocalTime {
                            input: wall.origin.input.to_string(),
                            local: wall.local,
                            line: wall.origin.line,
                        })
                    }
                }
            }
            out.extend(resolved);
            return Ok(());
        }

        let input = walls[0].origin.input.to_string();
        let local = walls[0].local;
        let lines: Vec<u64> = walls.iter().map(|w| w.origin.line).collect();
        match self.on_ambiguous {
            AmbiguityPolicy::Abort => Err(PipelineError::AmbiguousLocalTime { input, local, lines }),
            AmbiguityPolicy::Skip => {
                tracing::warn!(job = %self.job, %input, %local, ?lines, "skipping ambiguous local times");
                metrics::counter!("canonicalize_ambiguous_skipped_total", "job" => self.job.clone())
                    .increment(lines.len() as u64);
                Ok(())
            }
        }
    }
}

impl Transform<Vec<Envelope<RawObservation>>, Vec<Envelope<CanonicalRecord>>> for Canonicalizer {
    fn apply(
        &self,
        mut input: Vec<Envelope<RawObservation>>,
    ) -> Result<Vec<Envelope<CanonicalRecord>>, PipelineError> {
        if self.row_order == RowOrder::ReverseChronological {
            input.reverse();
        }

        match &self.rule {
            TimestampRule::Utc => input.into_iter().map(|env| self.from_utc(env)).collect(),
            TimestampRule::Local { nonexistent } => {
                let walls = input
                    .into_iter()
                    .map(|env| self.local_wall(env, *nonexistent))
                    .collect::<Result<Vec<_>, _>>()?;
                self.localize(walls)
            }
            TimestampRule::SplitDateHour {
                hour_column,
                fall_back_hour,
                spring_forward_hour,
            } => {
                let mut walls = input
                    .into_iter()
                    .map(|env| self.split_wall(env, hour_column, *fall_back_hour, *spring_forward_hour))
                    .collect::<Result<Vec<_>, _>>()?;
                // Hour codes are not chronological; order by wall clock, then raw code.
                walls.sort_by_key(|w| (w.local, w.rank));
                self.localize(walls)
            }
        }
    }
}
