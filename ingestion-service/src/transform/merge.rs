use series_client::{CanonicalSeries, MergedRecord, MergedSeries};

/// Attach to each primary record the auxiliary record with the greatest UTC
/// timestamp not after it (a backward as-of match).
///
/// Both inputs must be sorted by UTC; the sweep is linear in their combined
/// length. Among auxiliary records sharing a timestamp the last one wins.
/// Returns the merged series and the number of primary rows with no match.
pub fn merge_asof(primary: CanonicalSeries, auxiliary: &CanonicalSeries) -> (MergedSeries, usize) {
    debug_assert!(primary.is_strictly_increasing());
    debug_assert!(auxiliary.records.windows(2).all(|w| w[0].utc <= w[1].utc));

    let width = auxiliary.fields.len();
    let mut next = 0;
    let mut current: Option<&[Option<f64>]> = None;
    let mut unmatched = 0;

    let records = primary
        .records
        .into_iter()
        .map(|canonical| {
            while let Some(aux) = auxiliary.records.get(next) {
                if aux.utc > canonical.utc {
                    break;
                }
                current = Some(&aux.measurements);
                next += 1;
            }
            let attached = match current {
                Some(values) => values.to_vec(),
                None => {
                    unmatched += 1;
                    vec![None; width]
                }
            };
            MergedRecord {
                canonical,
                auxiliary: attached,
            }
        })
        .collect();

    let merged = MergedSeries {
        fields: primary.fields,
        auxiliary_fields: auxiliary.fields.clone(),
        records,
    };
    (merged, unmatched)
}
