use tracing::debug;

use crate::error::CdsError;
use crate::filter::Filter;

/// Greedy split planning.
///
/// Walks the splittable keys front to back and moves each onto the split list
/// while the cartesian size of the keys still left exceeds `selection_limit`.
/// The filter's key order is the split priority; no reordering by cardinality.
pub fn plan_split_keys(
    filter: &Filter,
    excluded: &[&str],
    selection_limit: u64,
) -> Result<Vec<String>, CdsError> {
    let mut remaining = filter.splittable_keys(excluded);
    let mut split_keys = Vec::new();

    loop {
        let size = filter.cartesian_size(&remaining)?;
        if size <= selection_limit {
            debug!(
                split_keys = ?split_keys,
                remaining_size = size,
                selection_limit,
                "split planned"
            );
            return Ok(split_keys);
        }
        if remaining.is_empty() {
            return Err(CdsError::SelectionLimitExceeded {
                size,
                limit: selection_limit,
            });
        }
        split_keys.push(remaining.remove(0));
    }
}

/// Splittable keys that stay as lists inside every sub-request.
pub fn unsplit_keys(filter: &Filter, excluded: &[&str], split_keys: &[String]) -> Vec<String> {
    filter
        .splittable_keys(excluded)
        .into_iter()
        .filter(|key| !split_keys.contains(key))
        .collect()
}

/// Checks a caller-supplied split against the selection limit and returns the
/// size of each resulting sub-request.
pub fn check_split(
    filter: &Filter,
    excluded: &[&str],
    split_keys: &[String],
    selection_limit: u64,
) -> Result<u64, CdsError> {
    filter.cartesian_size(split_keys)?;
    let size = filter.cartesian_size(&unsplit_keys(filter, excluded, split_keys))?;
    if size > selection_limit {
        return Err(CdsError::SelectionLimitExceeded {
            size,
            limit: selection_limit,
        });
    }
    Ok(size)
}
