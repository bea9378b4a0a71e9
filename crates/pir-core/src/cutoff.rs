//! Cutoff selection
//!
//! A hint's subset is the set of partitions whose selection value falls
//! strictly below its cutoff. The cutoff is the median of the hint's values,
//! so exactly half of the partitions are selected.

/// Sentinel cutoff marking a permanently invalid hint
pub const INVALID_CUTOFF: u32 = 0;

/// Find the median cutoff of `values`.
///
/// Returns `t` such that exactly `values.len() / 2` inputs are `< t`, or
/// [`INVALID_CUTOFF`] when no such threshold exists (the two middle values
/// collide) or fewer than two values are given. The input is not modified.
pub fn find_cutoff(values: &[u32]) -> u32 {
    if values.len() < 2 {
        return INVALID_CUTOFF;
    }
    let mut scratch = values.to_vec();
    let mid = scratch.len() / 2;
    let (lower, median, _) = scratch.select_nth_unstable(mid);
    let median = *median;
    match lower.iter().max() {
        Some(&below) if below == median => INVALID_CUTOFF,
        _ => median,
    }
}
