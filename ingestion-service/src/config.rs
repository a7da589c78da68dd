use std::{collections::BTreeMap, collections::HashSet, fs, path::PathBuf};

use chrono_tz::Tz;
use serde::Deserialize;
use series_client::{features::default_lags, LagSpec};

use crate::pipeline::PipelineError;
use crate::transform::{aggregate::Reducer, fill::FillPolicy, window::DateWindow};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowOrder {
    #[default]
    Chronological,
    ReverseChronological,
}

/// What to do with a local time that falls in a skipped wall-clock hour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NonexistentPolicy {
    #[default]
    Reject,
    ShiftForward,
}

/// What to do with repeated wall-clock times that row order cannot resolve.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmbiguityPolicy {
    #[default]
    Abort,
    Skip,
}

fn default_fall_back_hour() -> u8 {
    25
}

fn default_spring_forward_hour() -> u8 {
    2
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "convention", rename_all = "snake_case")]
pub enum TimestampConvention {
    /// One column of local prevailing time.
    Local {
        column: String,
        format: Option<String>,
        #[serde(default)]
        nonexistent: NonexistentPolicy,
    },
    /// A date column plus an hour-index column (1..=24, plus the fall-back code).
    SplitDateHour {
        date_column: String,
        hour_column: String,
        date_format: Option<String>,
        #[serde(default = "default_fall_back_hour")]
        fall_back_hour: u8,
        /// Hour code the source uses for the skipped hour of a spring-forward day.
        #[serde(default = "default_spring_forward_hour")]
        spring_forward_hour: u8,
        #[serde(default = "default_true")]
        remap_spring_forward: bool,
    },
    /// One column of UTC timestamps.
    Utc {
        column: String,
        format: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FieldMapping {
    /// Output field name.
    pub name: String,
    /// Input column name.
    pub column: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RowFilter {
    pub column: String,
    pub equals: String,
}

fn default_delimiter() -> char {
    ','
}

fn default_na_values() -> Vec<String> {
    ["", "NA", "NaN", "nan", "M", "null"]
        .into_iter()
        .map(String::from)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SourceConfig {
    pub paths: Vec<PathBuf>,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    #[serde(default = "default_na_values")]
    pub na_values: Vec<String>,
    #[serde(default)]
    pub row_order: RowOrder,
    /// Inputs with fewer data rows are skipped with a warning.
    pub min_rows: Option<usize>,
    pub filter: Option<RowFilter>,
    pub timestamp: TimestampConvention,
    pub measurements: Vec<FieldMapping>,
}

impl SourceConfig {
    pub fn field_names(&self) -> Vec<String> {
        self.measurements.iter().map(|m| m.name.clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AggregateConfig {
    #[serde(default)]
    pub default: Reducer,
    #[serde(default)]
    pub fields: BTreeMap<String, Reducer>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AuxiliaryConfig {
    #[serde(flatten)]
    pub source: SourceConfig,
    #[serde(default)]
    pub fill: BTreeMap<String, FillPolicy>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_lags")]
    pub lags: Vec<LagSpec>,
    /// Fields to lag; empty means every measurement field.
    #[serde(default)]
    pub fields: Vec<String>,
    /// Where `derive_features` writes; stdout when absent.
    pub output: Option<PathBuf>,
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            lags: default_lags(),
            fields: Vec::new(),
            output: None,
        }
    }
}

fn default_sampling_interval_minutes() -> u32 {
    60
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct JobConfig {
    pub name: String,
    pub output: PathBuf,
    pub timezone: Tz,
    /// Name of the local-time output column; omitted from the output when absent.
    pub local_column: Option<String>,
    #[serde(default = "default_sampling_interval_minutes")]
    pub sampling_interval_minutes: u32,
    #[serde(default)]
    pub on_ambiguous: AmbiguityPolicy,
    pub source: SourceConfig,
    pub aggregate: Option<AggregateConfig>,
    #[serde(default)]
    pub fill: BTreeMap<String, FillPolicy>,
    pub auxiliary: Option<AuxiliaryConfig>,
    pub window: Option<DateWindow>,
    pub features: Option<FeaturesConfig>,
}

impl JobConfig {
    /// Primary fields followed by auxiliary fields.
    pub fn all_fields(&self) -> Vec<String> {
        let mut fields = self.source.field_names();
        if let Some(aux) = &self.auxiliary {
            fields.extend(aux.source.field_names());
        }
        fields
    }

    fn validate(&self) -> Result<(), PipelineError> {
        let err = |msg: String| PipelineError::Config(format!("job '{}': {msg}", self.name));

        validate_source(&self.source).map_err(err)?;
        if self.sampling_interval_minutes == 0 {
            return Err(err("sampling_interval_minutes must be positive".into()));
        }

        let all = self.all_fields();
        let mut seen = HashSet::new();
        if let Some(dup) = all.iter().find(|f| !seen.insert(f.as_str())) {
            return Err(err(format!("field '{dup}' is declared twice")));
        }
        if let Some(local) = &self.local_column {
            if local == series_client::table::UTC_COLUMN || all.contains(local) {
                return Err(err(format!("local column '{local}' collides with another column")));
            }
        }

        if let Some(agg) = &self.aggregate {
            let primary = self.source.field_names();
            if let Some(f) = agg.fields.keys().find(|f| !primary.contains(f)) {
                return Err(err(format!("aggregate field '{f}' is not a measurement")));
            }
        }
        if let Some(f) = self.fill.keys().find(|f| !all.contains(f)) {
            return Err(err(format!("fill field '{f}' is not declared")));
        }
        if let Some(aux) = &self.auxiliary {
            validate_source(&aux.source).map_err(|m| err(format!("auxiliary: {m}")))?;
            let aux_fields = aux.source.field_names();
            if let Some(f) = aux.fill.keys().find(|f| !aux_fields.contains(f)) {
                return Err(err(format!("auxiliary fill field '{f}' is not declared")));
            }
        }
        if let Some(window) = &self.window {
            if window.start > window.end {
                return Err(err(format!("window start {} is after end {}", window.start, window.end)));
            }
        }
        if let Some(features) = &self.features {
            if let Some(f) = features.fields.iter().find(|f| !all.contains(f)) {
                return Err(err(format!("feature field '{f}' is not declared")));
            }
            if let Some(lag) = features.lags.iter().find(|l| l.rows == 0) {
                return Err(err(format!("lag '{}' must shift by at least one row", lag.suffix)));
            }
        }
        Ok(())
    }
}

fn validate_source(source: &SourceConfig) -> Result<(), String> {
    if source.paths.is_empty() {
        return Err("source has no paths".into());
    }
    if source.measurements.is_empty() {
        return Err("source declares no measurements".into());
    }
    if !source.delimiter.is_ascii() {
        return Err(format!("delimiter '{}' is not a single ASCII byte", source.delimiter));
    }
    if let TimestampConvention::SplitDateHour { fall_back_hour, .. } = &source.timestamp {
        if *fall_back_hour <= 24 {
            return Err(format!("fall_back_hour {fall_back_hour} collides with regular hour codes"));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MetricsConfig {
    /// Prometheus text-format snapshot written after the run.
    pub textfile: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AppConfig {
    pub metrics: Option<MetricsConfig>,
    pub jobs: Vec<JobConfig>,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        use std::env;

        let path = env::var("INGESTION_CONFIG").unwrap_or_else(|_| "ingestion-config.toml".to_string());
        let contents = fs::read_to_string(&path)?;
        let cfg = Self::from_toml_str(&contents)?;
        Ok(cfg)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, PipelineError> {
        let cfg: AppConfig = toml::from_str(contents).map_err(|e| PipelineError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn job(&self, name: &str) -> Option<&JobConfig> {
        self.jobs.iter().find(|j| j.name == name)
    }

    fn validate(&self) -> Result<(), PipelineError> {
        let mut names = HashSet::new();
        for job in &self.jobs {
            if !names.insert(job.name.as_str()) {
                return Err(PipelineError::Config(format!("duplicate job name '{}'", job.name)));
            }
            job.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[metrics]
textfile = "out/ingestion.prom"

[[jobs]]
name = "ncemc-dp"
output = "data/S5-dp.csv"
timezone = "US/Eastern"
local_column = "ept"

[jobs.source]
paths = ["raw/load_solar_out.csv"]
filter = { column = "meter_name", equals = "Delivery Point" }
measurements = [{ name = "kw", column = "kw_meas" }]

[jobs.source.timestamp]
convention = "split_date_hour"
date_column = "meas_dt"
hour_column = "meas_hr"

[jobs.fill]
kw = "forward"

[jobs.auxiliary]
paths = ["raw/GWW.csv"]
measurements = [{ name = "tmpf", column = "tmpf" }]
timestamp = { convention = "utc", column = "valid" }
fill = { tmpf = "forward" }

[jobs.window]
start = "2019-01-01"
end = "2021-12-31"
"#;

    #[test]
    fn parses_sample_config() {
        let cfg = AppConfig::from_toml_str(SAMPLE).unwrap();
        let job = cfg.job("ncemc-dp").unwrap();

        assert_eq!(job.timezone, chrono_tz::US::Eastern);
        assert_eq!(job.sampling_interval_minutes, 60);
        assert_eq!(job.on_ambiguous, AmbiguityPolicy::Abort);
        assert_eq!(job.source.delimiter, ',');
        assert!(job.source.na_values.contains(&"M".to_string()));
        assert_eq!(
            job.source.timestamp,
            TimestampConvention::SplitDateHour {
                date_column: "meas_dt".into(),
                hour_column: "meas_hr".into(),
                date_format: None,
                fall_back_hour: 25,
                spring_forward_hour: 2,
                remap_spring_forward: true,
            }
        );
        assert_eq!(job.fill.get("kw"), Some(&FillPolicy::Forward));
        let aux = job.auxiliary.as_ref().unwrap();
        assert_eq!(aux.fill.get("tmpf"), Some(&FillPolicy::Forward));
        assert_eq!(job.all_fields(), vec!["kw", "tmpf"]);
        assert!(job.features.is_none());
    }

    #[test]
    fn rejects_fill_for_unknown_field() {
        let bad = SAMPLE.replace("kw = \"forward\"", "kwh = \"forward\"");
        let err = AppConfig::from_toml_str(&bad).unwrap_err();
        assert!(err.to_string().contains("fill field 'kwh'"), "{err}");
    }

    #[test]
    fn rejects_inverted_window() {
        let bad = SAMPLE.replace("end = \"2021-12-31\"", "end = \"2018-12-31\"");
        assert!(matches!(AppConfig::from_toml_str(&bad), Err(PipelineError::Config(_))));
    }

    #[test]
    fn rejects_duplicate_job_names() {
        let jobs_only = SAMPLE.split("[[jobs]]").nth(1).unwrap();
        let twice = format!("[[jobs]]{jobs_only}\n[[jobs]]{jobs_only}");
        let err = AppConfig::from_toml_str(&twice).unwrap_err();
        assert!(err.to_string().contains("duplicate job name"), "{err}");
    }

    #[test]
    fn rejects_unknown_timezone() {
        let bad = SAMPLE.replace("US/Eastern", "Mars/Olympus");
        assert!(AppConfig::from_toml_str(&bad).is_err());
    }

    #[test]
    fn bundled_config_is_valid() {
        let cfg = AppConfig::from_toml_str(include_str!("../ingestion-config.toml")).unwrap();
        let names: Vec<_> = cfg.jobs.iter().map(|j| j.name.as_str()).collect();
        assert_eq!(names, vec!["S1", "S3-AT", "S4-MIDATL", "S5-dp"]);

        let s1 = cfg.job("S1").unwrap();
        assert_eq!(s1.source.row_order, RowOrder::ReverseChronological);
        assert_eq!(s1.source.min_rows, Some(8760));
        assert_eq!(s1.features.as_ref().unwrap().lags, default_lags());
    }
}
