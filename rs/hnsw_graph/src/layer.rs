use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::{
    cmp::Ordering,
    collections::{BTreeMap, BTreeSet},
};

use crate::{Distance, error::HnswError};

/// Neighbor list of one node on one level: (neighbor key, distance), kept
/// sorted ascending by distance, then key.
pub(crate) type Neighbors<K> = SmallVec<[(K, f32); 32]>;

/// Neighbor selection strategies.
#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SelectNeighborsStrategy {
    /// Simple greedy strategy that selects the closest nodes.
    Simple,

    /// Keeps a candidate only if it is closer to the target than to every
    /// neighbor accepted before it. Preserves the long-range edges that keep
    /// the graph navigable.
    #[default]
    Heuristic,
}

/// Orders (key, distance) pairs by distance, then key.
pub(crate) fn by_distance<K: Ord>(a: &(K, f32), b: &(K, f32)) -> Ordering {
    a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0))
}

/// Selects at most `m` neighbors for a target out of `candidates`.
///
/// Each candidate carries its distance to the target. `vector_of` resolves a
/// candidate key to its vector, which the heuristic needs to compare
/// candidates with each other; candidates it cannot resolve are skipped.
/// With `keep_pruned`, slots the heuristic leaves empty are filled with the
/// closest discarded candidates.
///
/// The result is sorted ascending by distance, then key.
pub fn select_neighbors<'v, K, V, D, F>(
    candidates: Vec<(K, f32)>,
    m: usize,
    strategy: SelectNeighborsStrategy,
    keep_pruned: bool,
    vector_of: F,
    distance: &D,
) -> Result<Vec<(K, f32)>, HnswError>
where
    K: Ord + Clone,
    V: 'v,
    D: Distance<V>,
    F: Fn(&K) -> Option<&'v V>,
{
    if m == 0 {
        return Ok(Vec::new());
    }

    let mut sorted = candidates;
    sorted.sort_by(by_distance);
    let mut seen = BTreeSet::new();
    sorted.retain(|(key, _)| seen.insert(key.clone()));

    match strategy {
        SelectNeighborsStrategy::Simple => {
            sorted.truncate(m);
            Ok(sorted)
        }
        SelectNeighborsStrategy::Heuristic => {
            let mut selected: Vec<(K, f32, &'v V)> = Vec::with_capacity(m);
            let mut discarded: Vec<(K, f32)> = Vec::new();

            for (key, dist) in sorted {
                if selected.len() >= m {
                    break;
                }
                let Some(vector) = vector_of(&key) else {
                    continue;
                };

                let mut dominated = false;
                for (_, _, accepted) in &selected {
                    if distance.distance(vector, accepted)? <= dist {
                        dominated = true;
                        break;
                    }
                }

                if dominated {
                    discarded.push((key, dist));
                } else {
                    selected.push((key, dist, vector));
                }
            }

            let mut result: Vec<(K, f32)> = selected
                .into_iter()
                .map(|(key, dist, _)| (key, dist))
                .collect();
            if keep_pruned && result.len() < m {
                let missing = m - result.len();
                result.extend(discarded.into_iter().take(missing));
                result.sort_by(by_distance);
            }
            Ok(result)
        }
    }
}

/// One level of the graph: node key -> neighbor list.
///
/// Edges are stored on both endpoints; `connect` and `disconnect` always
/// touch both sides so the relation stays symmetric.
#[derive(Debug, Clone)]
pub(crate) struct Layer<K> {
    nodes: BTreeMap<K, Neighbors<K>>,

    /// Neighbor lists as they were at the last `checkpoint`, for every node
    /// changed since. `None` marks a node that did not exist.
    undo: Option<BTreeMap<K, Option<Neighbors<K>>>>,
}

impl<K: Ord + Clone> Layer<K> {
    pub fn new() -> Self {
        Layer {
            nodes: BTreeMap::new(),
            undo: None,
        }
    }

    /// Starts recording changes so they can be undone with `rollback`.
    pub fn checkpoint(&mut self) {
        self.undo = Some(BTreeMap::new());
    }

    /// Keeps every change made since `checkpoint`.
    pub fn commit(&mut self) {
        self.undo = None;
    }

    /// Restores the neighbor lists recorded at `checkpoint`.
    pub fn rollback(&mut self) {
        let Some(undo) = self.undo.take() else {
            return;
        };
        for (key, previous) in undo {
            match previous {
                Some(ns) => {
                    self.nodes.insert(key, ns);
                }
                None => {
                    self.nodes.remove(&key);
                }
            }
        }
    }

    fn record(&mut self, key: &K) {
        if let Some(undo) = &mut self.undo {
            if !undo.contains_key(key) {
                undo.insert(key.clone(), self.nodes.get(key).cloned());
            }
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.nodes.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.nodes.keys()
    }

    pub fn neighbors(&self, key: &K) -> Option<&[(K, f32)]> {
        self.nodes.get(key).map(|ns| ns.as_slice())
    }

    pub fn degree(&self, key: &K) -> usize {
        self.nodes.get(key).map_or(0, |ns| ns.len())
    }

    pub fn is_linked(&self, a: &K, b: &K) -> bool {
        self.nodes
            .get(a)
            .is_some_and(|ns| ns.iter().any(|(k, _)| k == b))
    }

    /// Adds a node without edges. No-op if it is already present.
    pub fn insert_node(&mut self, key: K) {
        self.record(&key);
        self.nodes.entry(key).or_default();
    }

    /// Removes a node and every edge pointing at it, returning its former
    /// neighbor list.
    pub fn remove_node(&mut self, key: &K) -> Vec<(K, f32)> {
        self.record(key);
        let Some(former) = self.nodes.remove(key) else {
            return Vec::new();
        };
        for (neighbor, _) in &former {
            self.record(neighbor);
            if let Some(ns) = self.nodes.get_mut(neighbor) {
                ns.retain(|(k, _)| k != key);
            }
        }
        former.into_vec()
    }

    /// Links `a` and `b` in both directions. Both must be present.
    pub fn connect(&mut self, a: &K, b: &K, distance: f32) {
        if a == b || !self.contains(a) || !self.contains(b) {
            return;
        }
        self.record(a);
        self.record(b);
        if let Some(ns) = self.nodes.get_mut(a) {
            push_sorted(ns, b.clone(), distance);
        }
        if let Some(ns) = self.nodes.get_mut(b) {
            push_sorted(ns, a.clone(), distance);
        }
    }

    pub fn disconnect(&mut self, a: &K, b: &K) {
        self.record(a);
        self.record(b);
        if let Some(ns) = self.nodes.get_mut(a) {
            ns.retain(|(k, _)| k != b);
        }
        if let Some(ns) = self.nodes.get_mut(b) {
            ns.retain(|(k, _)| k != a);
        }
    }
}

fn push_sorted<K: Ord>(ns: &mut Neighbors<K>, key: K, distance: f32) {
    if ns.iter().any(|(k, _)| *k == key) {
        return;
    }
    let item = (key, distance);
    let pos = ns
        .binary_search_by(|e| by_distance(e, &item))
        .unwrap_or_else(|pos| pos);
    ns.insert(pos, item);
}
