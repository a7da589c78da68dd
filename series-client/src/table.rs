//! Persisted table format shared by the ingestion sink and feature loaders.
//!
//! Layout: `utc`, an optional local-time column, measurement columns, then
//! auxiliary columns. Timestamps use [`TIMESTAMP_FORMAT`]; missing values are
//! empty cells. Units are not recorded.

use std::{fs::File, io, path::Path};

use anyhow::{anyhow, bail, Context, Result};
use chrono::{NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::domain::{
    is_repeated_wallclock, CanonicalRecord, FeatureTable, MergedRecord, MergedSeries,
};

pub const UTC_COLUMN: &str = "utc";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Everything a reader needs to know about a table that the file does not say.
#[derive(Debug, Clone, PartialEq)]
pub struct TableLayout {
    pub timezone: Tz,
    /// Name of the local wall-clock column (`mpt`, `ept`, ...), if written.
    pub local_column: Option<String>,
    /// Columns that came from the auxiliary series.
    pub auxiliary: Vec<String>,
}

impl TableLayout {
    pub fn new(timezone: Tz) -> Self {
        Self {
            timezone,
            local_column: None,
            auxiliary: Vec::new(),
        }
    }

    fn header<'a>(&'a self, columns: impl Iterator<Item = &'a str>) -> Vec<&'a str> {
        let mut header = vec![UTC_COLUMN];
        if let Some(local) = &self.local_column {
            header.push(local);
        }
        header.extend(columns);
        header
    }

    fn timestamps(&self, record: &CanonicalRecord) -> Vec<String> {
        let mut out = vec![record.utc.format(TIMESTAMP_FORMAT).to_string()];
        if self.local_column.is_some() {
            out.push(record.local.format(TIMESTAMP_FORMAT).to_string());
        }
        out
    }
}

fn format_value(v: Option<f64>) -> String {
    v.map(|x| x.to_string()).unwrap_or_default()
}

fn parse_optional_f64(s: &str) -> Result<Option<f64>> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let v: f64 = trimmed
        .parse()
        .map_err(|e| anyhow!("invalid number '{trimmed}': {e}"))?;
    Ok(Some(v))
}

/// Write a merged series.
pub fn write_merged<W: io::Write>(writer: W, series: &MergedSeries, layout: &TableLayout) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(layout.header(series.column_names()))?;

    for record in &series.records {
        let mut row = layout.timestamps(&record.canonical);
        row.extend(MergedSeries::row_values(record).map(format_value));
        wtr.write_record(&row)?;
    }

    wtr.flush()?;
    Ok(())
}

/// Write a feature table: the merged columns, then `month`, `hour`,
/// `dayofweek`, then the lag columns.
pub fn write_features<W: io::Write>(writer: W, table: &FeatureTable, layout: &TableLayout) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    let value_columns = table
        .fields
        .iter()
        .chain(table.auxiliary_fields.iter())
        .map(String::as_str)
        .chain(["month", "hour", "dayofweek"])
        .chain(table.lag_fields.iter().map(String::as_str));
    wtr.write_record(layout.header(value_columns))?;

    for record in &table.records {
        let mut row = layout.timestamps(&record.merged.canonical);
        row.extend(MergedSeries::row_values(&record.merged).map(format_value));
        row.push(record.month.to_string());
        row.push(record.hour.to_string());
        row.push(record.dayofweek.to_string());
        row.extend(record.lags.iter().copied().map(format_value));
        wtr.write_record(&row)?;
    }

    wtr.flush()?;
    Ok(())
}

/// Load a persisted merged table.
///
/// Columns other than `utc` and the declared local column are numeric; those
/// listed in `layout.auxiliary` become auxiliary fields. When the table has
/// no local column, local time is derived from `utc` in `layout.timezone`.
/// The table must be strictly increasing in `utc`.
pub fn load_merged<R: io::Read>(reader: R, layout: &TableLayout) -> Result<MergedSeries> {
    let mut rdr = csv::Reader::from_reader(reader);
    let headers = rdr.headers().context("failed to read table header")?.clone();

    let utc_idx = headers
        .iter()
        .position(|h| h == UTC_COLUMN)
        .ok_or_else(|| anyhow!("missing column '{UTC_COLUMN}'"))?;
    let local_idx = match &layout.local_column {
        Some(name) => Some(
            headers
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| anyhow!("missing column '{name}'"))?,
        ),
        None => None,
    };

    let mut measurement_idx = Vec::new();
    let mut auxiliary_idx = Vec::new();
    let mut series = MergedSeries::default();
    for (idx, name) in headers.iter().enumerate() {
        if idx == utc_idx || Some(idx) == local_idx {
            continue;
        }
        if layout.auxiliary.iter().any(|a| a == name) {
            auxiliary_idx.push(idx);
            series.auxiliary_fields.push(name.to_string());
        } else {
            measurement_idx.push(idx);
            series.fields.push(name.to_string());
        }
    }

    let tz = layout.timezone;
    for (row, result) in rdr.records().enumerate() {
        let record = result.with_context(|| format!("failed to read table row {}", row + 1))?;
        let field = |idx: usize| record.get(idx).unwrap_or("");

        let utc = NaiveDateTime::parse_from_str(field(utc_idx).trim(), TIMESTAMP_FORMAT)
            .with_context(|| format!("invalid utc '{}' in row {}", field(utc_idx), row + 1))?;
        let utc = Utc.from_utc_datetime(&utc);

        let local = match local_idx {
            Some(idx) => NaiveDateTime::parse_from_str(field(idx).trim(), TIMESTAMP_FORMAT)
                .with_context(|| format!("invalid local time '{}' in row {}", field(idx), row + 1))?,
            None => utc.with_timezone(&tz).naive_local(),
        };

        let measurements = measurement_idx
            .iter()
            .map(|&idx| parse_optional_f64(field(idx)))
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("row {}", row + 1))?;
        let auxiliary = auxiliary_idx
            .iter()
            .map(|&idx| parse_optional_f64(field(idx)))
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("row {}", row + 1))?;

        series.records.push(MergedRecord {
            canonical: CanonicalRecord {
                utc,
                local,
                tz,
                measurements,
                is_duplicate_wallclock_hour: is_repeated_wallclock(tz, local),
            },
            auxiliary,
        });
    }

    if let Some(pos) = series
        .records
        .windows(2)
        .position(|w| w[0].canonical.utc >= w[1].canonical.utc)
    {
        bail!(
            "table is not strictly increasing in utc at row {} ({})",
            pos + 2,
            series.records[pos + 1].canonical.utc
        );
    }

    Ok(series)
}

pub fn load_merged_path(path: &Path, layout: &TableLayout) -> Result<MergedSeries> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    load_merged(file, layout).with_context(|| format!("failed to load {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CanonicalSeries;
    use chrono::Duration;

    fn layout() -> TableLayout {
        TableLayout {
            timezone: chrono_tz::US::Mountain,
            local_column: Some("mpt".into()),
            auxiliary: vec!["tmpf".into()],
        }
    }

    fn sample() -> MergedSeries {
        let tz = chrono_tz::US::Mountain;
        let t0 = Utc.with_ymd_and_hms(2015, 11, 1, 6, 0, 0).unwrap();
        let records = (0..4)
            .map(|i| CanonicalRecord::from_utc(t0 + Duration::hours(i), tz, vec![Some(1.5 * i as f64)]))
            .collect();
        let mut merged: MergedSeries = CanonicalSeries::new(vec!["kw".into()], records).into();
        merged.auxiliary_fields = vec!["tmpf".into()];
        for (i, r) in merged.records.iter_mut().enumerate() {
            r.auxiliary = vec![if i == 0 { None } else { Some(40.0) }];
        }
        merged
    }

    #[test]
    fn writes_header_and_missing_cells() {
        let mut out = Vec::new();
        write_merged(&mut out, &sample(), &layout()).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "utc,mpt,kw,tmpf");
        assert_eq!(lines[1], "2015-11-01 06:00:00,2015-11-01 00:00:00,0,");
        // 07:00Z and 08:00Z are both 01:00 local.
        assert_eq!(lines[2], "2015-11-01 07:00:00,2015-11-01 01:00:00,1.5,40");
        assert_eq!(lines[3], "2015-11-01 08:00:00,2015-11-01 01:00:00,3,40");
    }

    #[test]
    fn load_restores_written_table() {
        let original = sample();
        let mut out = Vec::new();
        write_merged(&mut out, &original, &layout()).unwrap();

        let loaded = load_merged(out.as_slice(), &layout()).unwrap();
        assert_eq!(loaded, original);
        assert!(loaded.records[1].canonical.is_duplicate_wallclock_hour);
    }

    #[test]
    fn load_without_local_column_derives_local_time() {
        let csv = "utc,mw\n2019-07-01 04:00:00,10\n2019-07-01 05:00:00,\n";
        let layout = TableLayout::new(chrono_tz::US::Eastern);
        let loaded = load_merged(csv.as_bytes(), &layout).unwrap();

        assert_eq!(loaded.fields, vec!["mw"]);
        assert_eq!(loaded.records[0].canonical.local.to_string(), "2019-07-01 00:00:00");
        assert_eq!(loaded.records[1].canonical.measurements, vec![None]);
    }

    #[test]
    fn load_rejects_unsorted_table() {
        let csv = "utc,mw\n2019-07-01 05:00:00,1\n2019-07-01 04:00:00,2\n";
        let err = load_merged(csv.as_bytes(), &TableLayout::new(chrono_tz::UTC)).unwrap_err();
        assert!(err.to_string().contains("row 2"));
    }

    #[test]
    fn load_rejects_missing_local_column() {
        let csv = "utc,mw\n2019-07-01 05:00:00,1\n";
        let mut layout = TableLayout::new(chrono_tz::UTC);
        layout.local_column = Some("ept".into());
        assert!(load_merged(csv.as_bytes(), &layout).is_err());
    }
}
