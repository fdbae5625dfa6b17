//! # HNSW graph
//!
//! The layered proximity graph: insertion, layered greedy search and
//! deletion with neighbor repair.

use ordered_float::OrderedFloat;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::{
    cmp::Reverse,
    collections::{BTreeMap, BTreeSet, BinaryHeap, VecDeque},
    fmt::Debug,
};

use crate::{
    Analyzer, Distance, DistanceMetric, LevelGen, Vector,
    error::HnswError,
    layer::{Layer, SelectNeighborsStrategy, by_distance, select_neighbors},
};

/// HNSW configuration parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HnswConfig {
    /// Maximum number of neighbors per node on levels above 0. Level 0 allows
    /// twice as many. Default is 16.
    pub m: usize,

    /// Level multiplier: the fraction of nodes on a level that are also
    /// present on the level above. Must lie in (0, 1). Default is 0.25.
    pub ml: f64,

    /// Number of candidates to consider during search. Default is 20.
    pub ef_search: usize,

    /// Number of candidates to consider during insertion. Defaults to `ef_search`.
    pub ef_construction: Option<usize>,

    /// Strategy for selecting neighbors. Default is Heuristic.
    pub select_neighbors_strategy: SelectNeighborsStrategy,

    /// Fill the slots the heuristic leaves empty with the closest discarded
    /// candidates. Default is true.
    pub keep_pruned: bool,

    /// Seed for level assignment. A random seed is drawn when unset.
    pub seed: Option<u64>,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            m: 16,
            ml: 0.25,
            ef_search: 20,
            ef_construction: None,
            select_neighbors_strategy: SelectNeighborsStrategy::Heuristic,
            keep_pruned: true,
            seed: None,
        }
    }
}

impl HnswConfig {
    /// Checks that every parameter is in range.
    pub fn validate(&self, name: &str) -> Result<(), HnswError> {
        let invalid = |reason: &str| {
            Err(HnswError::InvalidConfig {
                name: name.to_string(),
                reason: reason.to_string(),
            })
        };

        if self.m == 0 {
            return invalid("m must be greater than 0");
        }
        if !(self.ml > 0.0 && self.ml < 1.0) {
            return invalid("ml must be in (0, 1)");
        }
        if self.ef_search == 0 {
            return invalid("ef_search must be greater than 0");
        }
        if self.ef_construction == Some(0) {
            return invalid("ef_construction must be greater than 0");
        }
        Ok(())
    }
}

/// A key and the vector stored under it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node<K, V> {
    pub key: K,
    pub value: V,
}

impl<K, V> Node<K, V> {
    pub fn new(key: K, value: V) -> Self {
        Node { key, value }
    }
}

/// A search hit.
#[derive(Clone, Debug, PartialEq)]
pub struct Neighbor<K, V> {
    pub key: K,
    pub value: V,
    /// Distance to the query.
    pub distance: f32,
}

#[derive(Debug, Clone)]
struct Slot<V> {
    value: V,
    /// The highest level this node appears in.
    level: usize,
}

/// HNSW graph for approximate nearest neighbor search.
///
/// The graph is single-writer: `add` and `delete` take `&mut self`, `search`
/// takes `&self`. Wrap it in a [`SharedGraph`](crate::SharedGraph) or any
/// other lock to share it between threads.
pub struct Graph<K, V, D = DistanceMetric> {
    /// Graph name, reported in errors and logs.
    name: String,

    config: HnswConfig,

    distance: D,

    level_gen: LevelGen,

    nodes: BTreeMap<K, Slot<V>>,

    /// Level 0 first. A level is created the first time a node is assigned to
    /// it and is never dropped.
    layers: Vec<Layer<K>>,

    /// Entry point for search and insertion (key, level). Always sits on the
    /// highest populated level.
    entry_point: Option<(K, usize)>,

    /// Dimensionality shared by every vector, set by the first insertion.
    dims: Option<usize>,
}

impl<K, V> Graph<K, V, DistanceMetric>
where
    K: Ord + Clone + Debug,
    V: Vector,
{
    /// Creates an empty graph with the default configuration and cosine distance.
    pub fn with_default(name: String) -> Self {
        Self::build(name, HnswConfig::default(), DistanceMetric::Cosine)
    }
}

impl<K, V, D> Graph<K, V, D>
where
    K: Ord + Clone + Debug,
    V: Vector,
    D: Distance<V>,
{
    /// Creates an empty graph.
    ///
    /// # Arguments
    ///
    /// * `name` - Name of the graph
    /// * `config` - HNSW configuration parameters
    /// * `distance` - Distance capability over the vector type
    ///
    /// # Returns
    ///
    /// * `Result<Self, HnswError>` - New graph, or `InvalidConfig` for out of range parameters.
    pub fn new(name: String, config: HnswConfig, distance: D) -> Result<Self, HnswError> {
        config.validate(&name)?;
        Ok(Self::build(name, config, distance))
    }

    fn build(name: String, config: HnswConfig, distance: D) -> Self {
        let seed = config.seed.unwrap_or_else(|| rand::rng().random());
        let level_gen = LevelGen::new(config.ml, seed);
        Self {
            name,
            config,
            distance,
            level_gen,
            nodes: BTreeMap::new(),
            layers: Vec::new(),
            entry_point: None,
            dims: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &HnswConfig {
        &self.config
    }

    /// Returns the number of nodes in the graph.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns the dimensionality of the stored vectors, if any are stored.
    pub fn dims(&self) -> Option<usize> {
        self.dims
    }

    /// Returns the number of levels ever created, including levels emptied by deletion.
    pub fn levels(&self) -> usize {
        self.layers.len()
    }

    pub fn entry_point(&self) -> Option<&K> {
        self.entry_point.as_ref().map(|(key, _)| key)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.nodes.contains_key(key)
    }

    /// Returns the vector stored under `key`.
    pub fn lookup(&self, key: &K) -> Option<&V> {
        self.nodes.get(key).map(|slot| &slot.value)
    }

    /// Iterates over all keys in ascending order.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.nodes.keys()
    }

    /// Returns a read-only diagnostic view of the graph.
    pub fn analyzer(&self) -> Analyzer<'_, K, V, D> {
        Analyzer::new(self)
    }

    pub(crate) fn layers(&self) -> &[Layer<K>] {
        &self.layers
    }

    /// Inserts a node, or replaces the vector of an existing key.
    ///
    /// A replaced node is deleted with repair and reinserted on the same
    /// levels, so its edges are rebuilt for the new vector. On error the graph
    /// is left as it was before the call.
    pub fn add(&mut self, node: Node<K, V>) -> Result<(), HnswError> {
        let Node { key, value } = node;
        self.check_dims(&value)?;

        if let Some(slot) = self.nodes.get(&key) {
            let level = slot.level;
            log::debug!(name = self.name.as_str(); "replacing vector of {:?}", key);
            return self.atomically(&key, |g| {
                g.remove(&key)?;
                g.insert(key.clone(), value, level)
            });
        }

        let level = if self.nodes.is_empty() {
            0
        } else {
            self.level_gen.generate(self.nodes.len())
        };
        self.atomically(&key, |g| g.insert(key.clone(), value, level))
    }

    /// Inserts or replaces several nodes in order, stopping at the first error.
    pub fn add_all<I>(&mut self, nodes: I) -> Result<(), HnswError>
    where
        I: IntoIterator<Item = Node<K, V>>,
    {
        for node in nodes {
            self.add(node)?;
        }
        Ok(())
    }

    /// Searches for the k nearest neighbors to the query vector
    ///
    /// Results are sorted by ascending distance, ties broken by key. Returns
    /// fewer than `k` hits when the graph holds fewer nodes.
    ///
    /// # Arguments
    ///
    /// * `query` - Query vector
    /// * `k` - Number of nearest neighbors to return
    pub fn search(&self, query: &V, k: usize) -> Result<Vec<Neighbor<K, V>>, HnswError> {
        if k == 0 {
            return Err(HnswError::InvalidConfig {
                name: self.name.clone(),
                reason: "k must be greater than 0".to_string(),
            });
        }

        let Some((entry, entry_level)) = &self.entry_point else {
            return Ok(vec![]);
        };
        self.check_dims(query)?;

        let mut entry_points = vec![(entry.clone(), self.distance_to(query, entry)?)];
        for level in (1..=*entry_level).rev() {
            entry_points = self.search_layer(query, &entry_points, level, 1)?;
        }

        let ef = self.config.ef_search.max(k);
        let mut results = self.search_layer(query, &entry_points, 0, ef)?;
        results.truncate(k);

        Ok(results
            .into_iter()
            .filter_map(|(key, distance)| {
                self.nodes.get(&key).map(|slot| Neighbor {
                    value: slot.value.clone(),
                    key,
                    distance,
                })
            })
            .collect())
    }

    /// Removes a node from the graph.
    ///
    /// Former neighbors of the node are reconnected among themselves. The
    /// repair is best effort: it never leaves a node without neighbors when a
    /// replacement exists, but it does not guarantee level 0 stays connected.
    ///
    /// # Returns
    ///
    /// * `Result<bool, HnswError>` - True if the node was present. On error the
    ///   node is still in the graph and no edge has changed.
    pub fn delete(&mut self, key: &K) -> Result<bool, HnswError> {
        if !self.nodes.contains_key(key) {
            return Ok(false);
        }
        self.atomically(key, |g| g.remove(key))
    }

    /// Runs `op`, which may only add or remove `key` itself from the node
    /// table, and undoes all of its changes if it fails.
    fn atomically<R, F>(&mut self, key: &K, op: F) -> Result<R, HnswError>
    where
        F: FnOnce(&mut Self) -> Result<R, HnswError>,
    {
        let slot = self.nodes.get(key).cloned();
        let entry_point = self.entry_point.clone();
        let dims = self.dims;
        let levels = self.layers.len();
        for layer in &mut self.layers {
            layer.checkpoint();
        }

        let result = op(self);

        match result {
            Ok(_) => {
                for layer in &mut self.layers {
                    layer.commit();
                }
            }
            Err(ref err) => {
                log::debug!(name = self.name.as_str(); "rolling back {:?}: {}", key, err);
                self.layers.truncate(levels);
                for layer in &mut self.layers {
                    layer.rollback();
                }
                match slot {
                    Some(slot) => {
                        self.nodes.insert(key.clone(), slot);
                    }
                    None => {
                        self.nodes.remove(key);
                    }
                }
                self.entry_point = entry_point;
                self.dims = dims;
            }
        }
        result
    }

    fn remove(&mut self, key: &K) -> Result<bool, HnswError> {
        let Some(slot) = self.nodes.remove(key) else {
            return Ok(false);
        };

        let mut former_by_level = Vec::with_capacity(slot.level + 1);
        for level in 0..=slot.level {
            let former = match self.layers.get_mut(level) {
                Some(layer) => layer.remove_node(key),
                None => Vec::new(),
            };
            former_by_level.push(former);
        }

        if self.entry_point.as_ref().is_some_and(|(ep, _)| ep == key) {
            self.promote_entry_point(&former_by_level);
        }
        if self.nodes.is_empty() {
            self.dims = None;
        }

        for (level, former) in former_by_level.into_iter().enumerate() {
            self.repair(level, former)?;
        }
        Ok(true)
    }

    fn insert(&mut self, key: K, value: V, level: usize) -> Result<(), HnswError> {
        let Some((entry, entry_level)) = self.entry_point.clone() else {
            self.dims = Some(value.dims());
            self.nodes.insert(key.clone(), Slot { value, level: 0 });
            if self.layers.is_empty() {
                self.layers.push(Layer::new());
            }
            self.layers[0].insert_node(key.clone());
            self.entry_point = Some((key, 0));
            return Ok(());
        };

        // Descend through the levels above the new node one hop at a time.
        let mut entry_points = vec![(entry.clone(), self.distance_to(&value, &entry)?)];
        for l in (level + 1..=entry_level).rev() {
            entry_points = self.search_layer(&value, &entry_points, l, 1)?;
        }

        // Pick neighbors on every shared level before touching the graph.
        let ef = self.config.ef_construction.unwrap_or(self.config.ef_search);
        let mut plan: Vec<(usize, Vec<(K, f32)>)> = Vec::with_capacity(level + 1);
        for l in (0..=level.min(entry_level)).rev() {
            let found = self.search_layer(&value, &entry_points, l, ef)?;
            let selected = self.select(found.clone(), self.cap(l))?;
            plan.push((l, selected));
            entry_points = found;
        }

        self.nodes.insert(key.clone(), Slot { value, level });
        while self.layers.len() <= level {
            self.layers.push(Layer::new());
        }
        for layer in &mut self.layers[..=level] {
            layer.insert_node(key.clone());
        }

        for (l, selected) in plan {
            for (neighbor, dist) in &selected {
                self.layers[l].connect(&key, neighbor, *dist);
            }
            self.enforce_cap(l, selected.into_iter().map(|(neighbor, _)| neighbor))?;
        }

        if level > entry_level {
            log::debug!(
                name = self.name.as_str();
                "new entry point {:?} at level {}, previous top level {}",
                key,
                level,
                entry_level
            );
            self.entry_point = Some((key, level));
        }
        Ok(())
    }

    /// Beam search within one level.
    ///
    /// Starts from `entry_points` (key, distance to query) and keeps the `ef`
    /// closest nodes seen. Returns them ascending by distance, then key.
    fn search_layer(
        &self,
        query: &V,
        entry_points: &[(K, f32)],
        level: usize,
        ef: usize,
    ) -> Result<Vec<(K, f32)>, HnswError> {
        let Some(layer) = self.layers.get(level) else {
            return Ok(vec![]);
        };

        let mut visited: BTreeSet<K> = BTreeSet::new();
        let mut candidates: BinaryHeap<Reverse<(OrderedFloat<f32>, K)>> =
            BinaryHeap::with_capacity(ef * 2);
        let mut results: BinaryHeap<(OrderedFloat<f32>, K)> = BinaryHeap::with_capacity(ef * 2);

        for (key, dist) in entry_points {
            if visited.insert(key.clone()) {
                candidates.push(Reverse((OrderedFloat(*dist), key.clone())));
                results.push((OrderedFloat(*dist), key.clone()));
            }
        }
        while results.len() > ef {
            results.pop();
        }

        while let Some(Reverse((OrderedFloat(dist), point))) = candidates.pop() {
            if let Some((OrderedFloat(worst), _)) = results.peek() {
                if dist > *worst && results.len() >= ef {
                    break;
                }
            }

            let Some(neighbors) = layer.neighbors(&point) else {
                continue;
            };
            for (neighbor, _) in neighbors {
                if !visited.insert(neighbor.clone()) {
                    continue;
                }
                let dist = self.distance_to(query, neighbor)?;
                let admit = results.len() < ef
                    || results
                        .peek()
                        .is_some_and(|(OrderedFloat(worst), _)| dist < *worst);
                if admit {
                    candidates.push(Reverse((OrderedFloat(dist), neighbor.clone())));
                    results.push((OrderedFloat(dist), neighbor.clone()));
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        Ok(results
            .into_sorted_vec()
            .into_iter()
            .map(|(dist, key)| (key, dist.0))
            .collect())
    }

    /// Reconnects the former neighbors of a deleted node on one level.
    fn repair(&mut self, level: usize, former: Vec<(K, f32)>) -> Result<(), HnswError> {
        let mut pending = Vec::new();
        for (x, _) in &former {
            let mut candidates: Vec<(K, f32)> = self.layers[level]
                .neighbors(x)
                .map(|ns| ns.to_vec())
                .unwrap_or_default();
            let Some(x_vec) = self.lookup(x) else {
                continue;
            };
            for (y, _) in &former {
                if y == x || candidates.iter().any(|(c, _)| c == y) {
                    continue;
                }
                let Some(y_vec) = self.lookup(y) else {
                    continue;
                };
                candidates.push((y.clone(), self.distance(x_vec, y_vec)?));
            }

            let touched = self.rewire(level, x, candidates)?;
            if log::log_enabled!(log::Level::Trace) {
                log::trace!(
                    name = self.name.as_str();
                    "repaired {:?} at level {}, degree {}",
                    x,
                    level,
                    self.layers[level].degree(x)
                );
            }
            pending.extend(touched);
        }
        self.enforce_cap(level, pending)
    }

    /// Brings every pending node back under the degree cap of `level`.
    fn enforce_cap<I>(&mut self, level: usize, pending: I) -> Result<(), HnswError>
    where
        I: IntoIterator<Item = K>,
    {
        let queue: VecDeque<K> = pending.into_iter().collect();
        let budget = 4 * (self.nodes.len() + queue.len());
        self.enforce_cap_within(level, queue, budget)
    }

    /// Re-selects neighbors of queued nodes over the cap, at most `budget`
    /// times. Nodes still over the cap afterwards lose their farthest edges.
    fn enforce_cap_within(
        &mut self,
        level: usize,
        mut queue: VecDeque<K>,
        mut budget: usize,
    ) -> Result<(), HnswError> {
        let cap = self.cap(level);
        while let Some(key) = queue.pop_front() {
            let candidates = match self.layers[level].neighbors(&key) {
                Some(ns) if ns.len() > cap => ns.to_vec(),
                _ => continue,
            };
            if budget == 0 {
                queue.push_front(key);
                break;
            }
            budget -= 1;
            queue.extend(self.rewire(level, &key, candidates)?);
        }

        if !queue.is_empty() {
            log::warn!(
                name = self.name.as_str();
                "pruning budget exhausted on level {}, truncating {} nodes",
                level,
                queue.len()
            );
            for key in queue {
                self.truncate(level, &key);
            }
        }
        Ok(())
    }

    /// Drops the farthest edges of `key` until it is within the cap,
    /// sparing neighbors that would be left without any edge while others
    /// remain.
    fn truncate(&mut self, level: usize, key: &K) {
        let cap = self.cap(level);
        let layer = &mut self.layers[level];
        let Some(ns) = layer.neighbors(key) else {
            return;
        };
        if ns.len() <= cap {
            return;
        }

        let excess = ns.len() - cap;
        let (leaves, others): (Vec<_>, Vec<_>) = ns
            .iter()
            .rev()
            .map(|(k, _)| k.clone())
            .partition(|k| layer.degree(k) == 1);
        for neighbor in others.iter().chain(leaves.iter()).take(excess) {
            layer.disconnect(key, neighbor);
        }
    }

    /// Re-selects the neighbor list of `key` on `level` from `candidates`
    /// (key, distance to `key`) and applies the difference to both endpoints.
    ///
    /// A current neighbor whose only edge is the one to `key` is pinned rather
    /// than dropped. Returns the nodes that gained an edge and may now be over
    /// their own cap.
    fn rewire(
        &mut self,
        level: usize,
        key: &K,
        candidates: Vec<(K, f32)>,
    ) -> Result<Vec<K>, HnswError> {
        let cap = self.cap(level);
        let layer = &self.layers[level];
        let (mut pinned, free): (Vec<_>, Vec<_>) = candidates
            .into_iter()
            .filter(|(c, _)| c != key)
            .partition(|(c, _)| layer.is_linked(key, c) && layer.degree(c) == 1);
        pinned.sort_by(by_distance);
        let stranded = if pinned.len() > cap {
            pinned.split_off(cap)
        } else {
            Vec::new()
        };

        let mut kept = self.select(free, cap - pinned.len())?;
        kept.extend(pinned);

        let layer = &mut self.layers[level];
        let current: Vec<K> = layer
            .neighbors(key)
            .map(|ns| ns.iter().map(|(k, _)| k.clone()).collect())
            .unwrap_or_default();
        for c in &current {
            if !kept.iter().any(|(k, _)| k == c) {
                layer.disconnect(key, c);
            }
        }

        let mut touched = Vec::new();
        for (c, dist) in kept {
            if !layer.is_linked(key, &c) {
                layer.connect(key, &c, dist);
                touched.push(c);
            }
        }

        // Only a star of single-edge leaves gets here: hang each leftover
        // leaf off the closest neighbor `key` kept.
        for (leaf, _) in stranded {
            if let Some(host) = self.attach(level, key, &leaf)? {
                touched.push(host);
            }
        }
        Ok(touched)
    }

    /// Links `leaf` to the closest neighbor of `key` on `level`.
    fn attach(&mut self, level: usize, key: &K, leaf: &K) -> Result<Option<K>, HnswError> {
        let Some(leaf_vec) = self.lookup(leaf) else {
            return Ok(None);
        };
        let mut best: Option<(K, f32)> = None;
        for (host, _) in self.layers[level].neighbors(key).unwrap_or_default() {
            if host == leaf {
                continue;
            }
            let Some(host_vec) = self.lookup(host) else {
                continue;
            };
            let dist = self.distance(leaf_vec, host_vec)?;
            let candidate = (host.clone(), dist);
            if best
                .as_ref()
                .is_none_or(|b| by_distance(&candidate, b).is_lt())
            {
                best = Some(candidate);
            }
        }

        Ok(best.map(|(host, dist)| {
            self.layers[level].connect(leaf, &host, dist);
            host
        }))
    }

    /// Moves the entry point off a deleted node: to its closest former
    /// neighbor on the highest populated level, else any node on that level.
    fn promote_entry_point(&mut self, former_by_level: &[Vec<(K, f32)>]) {
        self.entry_point = None;
        for level in (0..self.layers.len()).rev() {
            let layer = &self.layers[level];
            if layer.is_empty() {
                continue;
            }
            let next = former_by_level
                .get(level)
                .and_then(|former| former.iter().map(|(k, _)| k).find(|k| layer.contains(k)))
                .or_else(|| layer.keys().next())
                .cloned();
            if let Some(key) = next {
                log::debug!(
                    name = self.name.as_str();
                    "entry point moved to {:?} at level {}",
                    key,
                    level
                );
                self.entry_point = Some((key, level));
                return;
            }
        }
    }

    fn select(&self, candidates: Vec<(K, f32)>, m: usize) -> Result<Vec<(K, f32)>, HnswError> {
        select_neighbors(
            candidates,
            m,
            self.config.select_neighbors_strategy,
            self.config.keep_pruned,
            |k| self.lookup(k),
            &self.distance,
        )
        .map_err(|err| err.with_name(&self.name))
    }

    /// Maximum neighbors per node on `level`.
    fn cap(&self, level: usize) -> usize {
        if level == 0 {
            self.config.m * 2
        } else {
            self.config.m
        }
    }

    fn distance(&self, a: &V, b: &V) -> Result<f32, HnswError> {
        self.distance
            .distance(a, b)
            .map_err(|err| err.with_name(&self.name))
    }

    fn distance_to(&self, query: &V, key: &K) -> Result<f32, HnswError> {
        match self.lookup(key) {
            Some(vector) => self.distance(query, vector),
            None => Err(HnswError::Generic {
                name: self.name.clone(),
                source: format!("node {:?} missing from graph", key).into(),
            }),
        }
    }

    fn check_dims(&self, vector: &V) -> Result<(), HnswError> {
        match self.dims {
            Some(expected) if expected != vector.dims() => Err(HnswError::DimensionMismatch {
                name: self.name.clone(),
                expected,
                got: vector.dims(),
            }),
            _ => Ok(()),
        }
    }
}
