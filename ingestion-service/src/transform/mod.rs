//! Series transforms. Each stage takes an explicit input and returns an
//! explicit output; none of them touches shared state.

pub mod aggregate;
pub mod canonicalize;
pub mod fill;
pub mod merge;
pub mod validate;
pub mod window;

pub use aggregate::{Aggregation, Reducer};
pub use canonicalize::{Canonicalizer, TimestampRule};
pub use fill::{BackwardFill, FillPolicy, FillStrategy, ForwardFill, GapFill};
pub use merge::merge_asof;
pub use validate::{sort_timeline, validate_timeline, CompletenessCheck};
pub use window::{DateBasis, DateWindow};
