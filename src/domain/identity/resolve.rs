//! Set-based resolution helpers.
//!
//! Stores issue one query per batch using the distinct keys of the request, then
//! expand the rows back to the request's shape: one slot per requested position,
//! duplicates resolved to the same value, missing keys left empty.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

/// Distinct keys in first-seen order
pub fn distinct_keys<K>(keys: &[K]) -> Vec<K>
where
    K: Eq + Hash + Clone,
{
    let mut seen = HashSet::with_capacity(keys.len());
    keys.iter()
        .filter(|key| seen.insert(*key))
        .cloned()
        .collect()
}

/// Align single-valued rows to the request; a key matched by several rows resolves to
/// the first of them
pub fn align_to_request<K, V, F>(request: &[K], rows: Vec<V>, key_of: F) -> Vec<Option<V>>
where
    K: Eq + Hash,
    V: Clone,
    F: Fn(&V) -> Option<K>,
{
    let mut index: HashMap<K, V> = HashMap::with_capacity(rows.len());
    for row in rows {
        if let Some(key) = key_of(&row) {
            index.entry(key).or_insert(row);
        }
    }

    request.iter().map(|key| index.get(key).cloned()).collect()
}

/// Group `(key, value)` rows under each requested key; absent keys get an empty group
pub fn group_to_request<K, V>(request: &[K], rows: Vec<(K, V)>) -> Vec<Vec<V>>
where
    K: Eq + Hash,
    V: Clone,
{
    let mut groups: HashMap<K, Vec<V>> = HashMap::new();
    for (key, value) in rows {
        groups.entry(key).or_default().push(value);
    }

    request
        .iter()
        .map(|key| groups.get(key).cloned().unwrap_or_default())
        .collect()
}

/// Fill empty slots of `found` from a later lookup of the same request
pub fn fill_missing<V>(found: &mut [Option<V>], retry: Vec<Option<V>>) {
    for (slot, candidate) in found.iter_mut().zip(retry) {
        if slot.is_none() {
            *slot = candidate;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distinct_keys_preserves_order() {
        let keys = vec!["b", "a", "b", "c", "a"];
        assert_eq!(distinct_keys(&keys), vec!["b", "a", "c"]);
    }

    #[test]
    fn test_align_handles_duplicates_missing_and_order() {
        let request = vec!["B", "A", "B", "MISSING"];
        let rows = vec![("A", 1), ("B", 2)];

        let aligned = align_to_request(&request, rows, |(key, _)| Some(*key));

        assert_eq!(
            aligned,
            vec![Some(("B", 2)), Some(("A", 1)), Some(("B", 2)), None]
        );
    }

    #[test]
    fn test_align_picks_first_row_for_ambiguous_key() {
        let request = vec!["A"];
        let rows = vec![("A", 1), ("A", 2)];

        let aligned = align_to_request(&request, rows, |(key, _)| Some(*key));
        assert_eq!(aligned, vec![Some(("A", 1))]);
    }

    #[test]
    fn test_align_skips_rows_without_key() {
        let request = vec!["A"];
        let rows: Vec<(Option<&str>, i32)> = vec![(None, 1), (Some("A"), 2)];

        let aligned = align_to_request(&request, rows, |(key, _)| *key);
        assert_eq!(aligned, vec![Some((Some("A"), 2))]);
    }

    #[test]
    fn test_group_to_request() {
        let request = vec![1, 2, 1, 3];
        let rows = vec![(1, "x"), (2, "y"), (1, "z")];

        let grouped = group_to_request(&request, rows);

        assert_eq!(
            grouped,
            vec![vec!["x", "z"], vec!["y"], vec!["x", "z"], vec![]]
        );
    }

    #[test]
    fn test_fill_missing() {
        let mut found = vec![Some(1), None, None];
        fill_missing(&mut found, vec![Some(9), Some(2), None]);

        assert_eq!(found, vec![Some(1), Some(2), None]);
    }
}
