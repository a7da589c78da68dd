pub mod domain;
pub mod features;
pub mod table;

pub use domain::{
    CanonicalRecord, CanonicalSeries, ColumnRef, FeatureRecord, FeatureTable, MergedRecord,
    MergedSeries, RawObservation, RawTime,
};
pub use features::{derive_features, FeatureSpec, LagSpec};
pub use table::TableLayout;
