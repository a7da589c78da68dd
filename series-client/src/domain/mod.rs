pub mod canonical;
pub mod feature;
pub mod merged;
pub mod raw;

pub use canonical::{is_repeated_wallclock, CanonicalRecord, CanonicalSeries};
pub use feature::{FeatureRecord, FeatureTable};
pub use merged::{ColumnRef, MergedRecord, MergedSeries};
pub use raw::{RawObservation, RawTime};
