// dbdump/src/backup/retention.rs
use crate::storage::Artifact;

/// Returns the keys to delete so that only the newest `keep` artifacts
/// survive. `ordered` must be oldest-first; the result is a prefix of it,
/// in the same order.
pub fn select_for_deletion(ordered: &[Artifact], keep: usize) -> Vec<String> {
    let excess = ordered.len().saturating_sub(keep);
    ordered[..excess].iter().map(|a| a.key.clone()).collect()
}
