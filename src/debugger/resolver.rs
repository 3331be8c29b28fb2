use std::collections::{BTreeMap, HashSet};

use serde_json::Value;
use tracing::{debug, warn};

use super::frames::{Handle, PendingHandles};
use crate::error::Result;

/// Raw mirrors returned by `lookup`, keyed by handle. Lives for one break.
#[derive(Debug, Clone, Default)]
pub struct ResolvedStore {
    values: BTreeMap<Handle, Value>,
    rounds: usize,
}

impl ResolvedStore {
    pub fn get(&self, handle: Handle) -> Option<&Value> {
        self.values.get(&handle)
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.values.contains_key(&handle)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handle, &Value)> {
        self.values.iter().map(|(h, v)| (*h, v))
    }

    /// Number of lookup round trips it took to build this store.
    pub fn rounds(&self) -> usize {
        self.rounds
    }
}

impl FromIterator<(Handle, Value)> for ResolvedStore {
    fn from_iter<I: IntoIterator<Item = (Handle, Value)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
            rounds: 0,
        }
    }
}

/// Computes the reference closure of a handle set.
///
/// `lookup` performs one round trip for a batch of handles; `nested_refs` lists the
/// handles embedded in a returned mirror. Every handle is requested at most once,
/// so cyclic object graphs terminate.
pub fn resolve<L, N>(initial: PendingHandles, mut lookup: L, nested_refs: N) -> Result<ResolvedStore>
where
    L: FnMut(&PendingHandles) -> Result<BTreeMap<Handle, Value>>,
    N: Fn(&Value) -> Vec<Handle>,
{
    let mut store = ResolvedStore::default();
    // Resolved or in flight.
    let mut seen: HashSet<Handle> = HashSet::new();
    let mut pending = initial;

    while !pending.is_empty() {
        seen.extend(pending.iter().copied());
        store.rounds += 1;
        debug!(round = store.rounds, handles = pending.len(), "lookup round");

        let response = lookup(&pending)?;

        let mut next = PendingHandles::new();
        for (handle, object) in response {
            for nested in nested_refs(&object) {
                if !seen.contains(&nested) {
                    next.insert(nested);
                }
            }
            store.values.insert(handle, object);
        }

        let missing: Vec<Handle> = pending
            .iter()
            .filter(|h| !store.values.contains_key(h))
            .copied()
            .collect();
        if !missing.is_empty() {
            warn!(?missing, "lookup returned no mirror for some handles");
        }

        pending = next;
    }

    debug!(
        rounds = store.rounds,
        objects = store.values.len(),
        "reference closure complete"
    );
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use serde_json::json;

    /// Mirror graph where each object lists the handles it points at.
    fn graph(edges: &[(i64, &[i64])]) -> BTreeMap<Handle, Value> {
        edges
            .iter()
            .map(|(h, refs)| {
                let properties: Vec<Value> = refs
                    .iter()
                    .enumerate()
                    .map(|(i, r)| json!({"name": format!("p{i}"), "ref": r}))
                    .collect();
                (Handle(*h), json!({"handle": h, "type": "object", "properties": properties}))
            })
            .collect()
    }

    fn refs_of(object: &Value) -> Vec<Handle> {
        object["properties"]
            .as_array()
            .map(|props| {
                props
                    .iter()
                    .filter_map(|p| p["ref"].as_i64())
                    .map(Handle)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn run(
        objects: &BTreeMap<Handle, Value>,
        initial: &[i64],
        batches: &mut Vec<Vec<Handle>>,
    ) -> ResolvedStore {
        resolve(
            initial.iter().copied().map(Handle).collect(),
            |handles| {
                batches.push(handles.iter().copied().collect());
                Ok(handles
                    .iter()
                    .filter_map(|h| objects.get(h).map(|o| (*h, o.clone())))
                    .collect())
            },
            refs_of,
        )
        .unwrap()
    }

    #[test]
    fn empty_set_needs_no_round_trip() {
        let mut batches = Vec::new();
        let store = run(&BTreeMap::new(), &[], &mut batches);
        assert!(store.is_empty());
        assert_eq!(store.rounds(), 0);
        assert!(batches.is_empty());
    }

    #[test]
    fn chain_takes_one_round_per_level() {
        let objects = graph(&[(1, &[2]), (2, &[3]), (3, &[4]), (4, &[])]);
        let mut batches = Vec::new();
        let store = run(&objects, &[1], &mut batches);
        assert_eq!(store.rounds(), 4);
        assert_eq!(store.len(), 4);
        assert_eq!(
            batches,
            vec![vec![Handle(1)], vec![Handle(2)], vec![Handle(3)], vec![Handle(4)]]
        );
    }

    #[test]
    fn cycle_terminates_with_each_object_once() {
        let objects = graph(&[(1, &[2]), (2, &[1])]);
        let mut batches = Vec::new();
        let store = run(&objects, &[1], &mut batches);
        assert_eq!(store.len(), 2);
        assert!(store.contains(Handle(1)));
        assert!(store.contains(Handle(2)));
        assert_eq!(batches, vec![vec![Handle(1)], vec![Handle(2)]]);
    }

    #[test]
    fn shared_children_are_requested_once() {
        let objects = graph(&[(1, &[3]), (2, &[3]), (3, &[1, 2])]);
        let mut batches = Vec::new();
        let store = run(&objects, &[1, 2], &mut batches);
        assert_eq!(store.len(), 3);
        assert_eq!(batches, vec![vec![Handle(1), Handle(2)], vec![Handle(3)]]);
    }

    #[test]
    fn missing_mirrors_are_not_retried() {
        let objects = graph(&[(1, &[9])]);
        let mut batches = Vec::new();
        let store = run(&objects, &[1], &mut batches);
        assert_eq!(store.len(), 1);
        assert_eq!(batches.len(), 2);
    }

    #[test]
    fn lookup_failure_propagates() {
        let result = resolve(
            [Handle(1)].into_iter().collect(),
            |_| Err(Error::protocol("lookup", "target not paused")),
            refs_of,
        );
        assert!(matches!(result, Err(Error::Protocol { .. })));
    }
}
