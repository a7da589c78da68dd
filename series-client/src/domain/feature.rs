use super::merged::MergedRecord;

/// A merged record with calendar and lag features.
///
/// Calendar fields come from the local wall clock: `month` 1..=12,
/// `hour` 0..=23, `dayofweek` 0 = Monday .. 6 = Sunday.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRecord {
    pub merged: MergedRecord,
    pub month: u32,
    pub hour: u32,
    pub dayofweek: u32,
    pub lags: Vec<Option<f64>>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeatureTable {
    pub fields: Vec<String>,
    pub auxiliary_fields: Vec<String>,
    pub lag_fields: Vec<String>,
    pub records: Vec<FeatureRecord>,
}

impl FeatureTable {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn lag_index(&self, name: &str) -> Option<usize> {
        self.lag_fields.iter().position(|f| f == name)
    }
}
