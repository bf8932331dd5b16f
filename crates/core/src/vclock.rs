//! Vector clocks for per-pair causal ordering
//!
//! Each node keeps a monotonic counter per node id. Two clock snapshots
//! compare as `Before`, `After`, or `Concurrent`; equal clocks collapse into
//! `Before`. The receive server's hash-equal fast path answers idempotent
//! retransmits before the clock is ever consulted, so the stale branch is
//! safe for them.

use std::collections::HashMap;
use std::sync::RwLock;

/// Causal relation between two clock snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Before,
    Concurrent,
    After,
}

/// Thread-safe per-node counter map.
///
/// `tick` and `merge` are the only mutators; once a value has been observed
/// for a node it never decreases.
#[derive(Debug, Default)]
pub struct VectorClock {
    inner: RwLock<HashMap<String, u64>>,
}

impl VectorClock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_map(map: HashMap<String, u64>) -> Self {
        Self {
            inner: RwLock::new(map),
        }
    }

    /// Increment this node's counter by one
    pub fn tick(&self, node_id: &str) {
        let mut clock = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *clock.entry(node_id.to_string()).or_insert(0) += 1;
    }

    /// Componentwise maximum with `other`
    pub fn merge(&self, other: &HashMap<String, u64>) {
        let mut clock = self.inner.write().unwrap_or_else(|e| e.into_inner());
        for (node, &value) in other {
            let entry = clock.entry(node.clone()).or_insert(0);
            if *entry < value {
                *entry = value;
            }
        }
    }

    /// Deep copy of the current state, safe to embed into wire messages
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, u64> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// Compare two clock snapshots.
///
/// `Before` iff every component of `a` is <= the matching component of `b`
/// (missing components count as zero); `After` symmetrically; `Concurrent`
/// when each side is ahead somewhere. Equal clocks return `Before`.
#[must_use]
pub fn compare(a: &HashMap<String, u64>, b: &HashMap<String, u64>) -> Relation {
    let mut a_before_b = true;
    let mut b_before_a = true;

    for node in a.keys().chain(b.keys()) {
        let av = a.get(node).copied().unwrap_or(0);
        let bv = b.get(node).copied().unwrap_or(0);
        if av > bv {
            b_before_a = false;
        }
        if av < bv {
            a_before_b = false;
        }
    }

    match (a_before_b, b_before_a) {
        (true, false) | (true, true) => Relation::Before,
        (false, true) => Relation::After,
        (false, false) => Relation::Concurrent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_increments() {
        let vc = VectorClock::new();
        vc.tick("n1");
        vc.tick("n1");
        vc.tick("n2");

        let snap = vc.snapshot();
        assert_eq!(snap["n1"], 2);
        assert_eq!(snap["n2"], 1);
    }

    #[test]
    fn test_merge_takes_componentwise_max() {
        let vc = VectorClock::from_map(HashMap::from([("n1".into(), 3), ("n2".into(), 1)]));
        vc.merge(&HashMap::from([("n1".into(), 2), ("n2".into(), 5), ("n3".into(), 1)]));

        let snap = vc.snapshot();
        assert_eq!(snap["n1"], 3);
        assert_eq!(snap["n2"], 5);
        assert_eq!(snap["n3"], 1);
    }

    #[test]
    fn test_monotonic_under_tick_and_merge() {
        let vc = VectorClock::new();
        vc.tick("a");
        vc.merge(&HashMap::from([("a".into(), 5), ("b".into(), 2)]));
        let mid = vc.snapshot();

        vc.merge(&HashMap::from([("a".into(), 1), ("b".into(), 1)]));
        vc.tick("a");
        let end = vc.snapshot();

        for (node, value) in &mid {
            assert!(end[node] >= *value, "component {node} decreased");
        }
    }

    #[test]
    fn test_causal_ordering_across_tick() {
        let vc = VectorClock::new();
        vc.tick("n1");
        let a = vc.snapshot();
        vc.tick("n1");
        let b = vc.snapshot();

        assert_eq!(compare(&a, &b), Relation::Before);
        assert_eq!(compare(&b, &a), Relation::After);
    }

    #[test]
    fn test_concurrent_ticks_on_disjoint_nodes() {
        let a = HashMap::from([("n1".into(), 1)]);
        let b = HashMap::from([("n2".into(), 1)]);

        assert_eq!(compare(&a, &b), Relation::Concurrent);
        assert_eq!(compare(&b, &a), Relation::Concurrent);
    }

    #[test]
    fn test_equal_clocks_compare_before() {
        let a = HashMap::from([("n1".into(), 2), ("n2".into(), 1)]);
        assert_eq!(compare(&a, &a.clone()), Relation::Before);
    }

    #[test]
    fn test_missing_component_counts_as_zero() {
        let a = HashMap::from([("n1".into(), 1)]);
        let b = HashMap::from([("n1".into(), 1), ("n2".into(), 1)]);
        assert_eq!(compare(&a, &b), Relation::Before);
        assert_eq!(compare(&b, &a), Relation::After);
    }
}
