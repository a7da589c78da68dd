use super::canonical::{CanonicalRecord, CanonicalSeries};

/// A canonical record with auxiliary fields attached by an as-of match.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedRecord {
    pub canonical: CanonicalRecord,
    pub auxiliary: Vec<Option<f64>>,
}

/// Addresses a value column of a [`MergedSeries`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnRef {
    Measurement(usize),
    Auxiliary(usize),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MergedSeries {
    pub fields: Vec<String>,
    pub auxiliary_fields: Vec<String>,
    pub records: Vec<MergedRecord>,
}

impl From<CanonicalSeries> for MergedSeries {
    fn from(series: CanonicalSeries) -> Self {
        MergedSeries {
            fields: series.fields,
            auxiliary_fields: Vec::new(),
            records: series
                .records
                .into_iter()
                .map(|canonical| MergedRecord {
                    canonical,
                    auxiliary: Vec::new(),
                })
                .collect(),
        }
    }
}

impl MergedSeries {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Measurement columns first, then auxiliary columns.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .chain(self.auxiliary_fields.iter())
            .map(String::as_str)
    }

    pub fn column_ref(&self, name: &str) -> Option<ColumnRef> {
        if let Some(idx) = self.fields.iter().position(|f| f == name) {
            return Some(ColumnRef::Measurement(idx));
        }
        self.auxiliary_fields
            .iter()
            .position(|f| f == name)
            .map(ColumnRef::Auxiliary)
    }

    pub fn value(&self, row: usize, column: ColumnRef) -> Option<f64> {
        let record = self.records.get(row)?;
        match column {
            ColumnRef::Measurement(idx) => record.canonical.measurements.get(idx).copied().flatten(),
            ColumnRef::Auxiliary(idx) => record.auxiliary.get(idx).copied().flatten(),
        }
    }

    pub fn column(&self, column: ColumnRef) -> Vec<Option<f64>> {
        (0..self.records.len()).map(|row| self.value(row, column)).collect()
    }

    pub fn set_column(&mut self, column: ColumnRef, values: Vec<Option<f64>>) {
        for (record, value) in self.records.iter_mut().zip(values) {
            let slot = match column {
                ColumnRef::Measurement(idx) => record.canonical.measurements.get_mut(idx),
                ColumnRef::Auxiliary(idx) => record.auxiliary.get_mut(idx),
            };
            if let Some(slot) = slot {
                *slot = value;
            }
        }
    }

    /// Flatten a record into values in [`MergedSeries::column_names`] order.
    pub fn row_values(record: &MergedRecord) -> impl Iterator<Item = Option<f64>> + '_ {
        record
            .canonical
            .measurements
            .iter()
            .chain(record.auxiliary.iter())
            .copied()
    }
}
