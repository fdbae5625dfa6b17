use std::{
    collections::{BTreeSet, VecDeque},
    fmt::Debug,
};

use crate::{Distance, Graph, Vector};

/// Read-only structural diagnostics over a [`Graph`].
///
/// Not part of the query path: every method walks whole levels.
pub struct Analyzer<'a, K, V, D> {
    graph: &'a Graph<K, V, D>,
}

impl<'a, K, V, D> Analyzer<'a, K, V, D>
where
    K: Ord + Clone + Debug,
    V: Vector,
    D: Distance<V>,
{
    pub fn new(graph: &'a Graph<K, V, D>) -> Self {
        Analyzer { graph }
    }

    /// Number of populated levels.
    pub fn height(&self) -> usize {
        self.graph
            .layers()
            .iter()
            .take_while(|layer| !layer.is_empty())
            .count()
    }

    /// Node count per level, level 0 first.
    pub fn topography(&self) -> Vec<usize> {
        self.graph.layers().iter().map(|layer| layer.len()).collect()
    }

    /// Sizes of the connected components of every level, level 0 first.
    ///
    /// Within a level sizes are sorted descending; an empty level yields an
    /// empty list.
    pub fn connectivity(&self) -> Vec<Vec<usize>> {
        self.graph
            .layers()
            .iter()
            .map(|layer| {
                let mut visited: BTreeSet<&K> = BTreeSet::new();
                let mut sizes = Vec::new();
                for start in layer.keys() {
                    if !visited.insert(start) {
                        continue;
                    }
                    let mut size = 0;
                    let mut queue = VecDeque::from([start]);
                    while let Some(key) = queue.pop_front() {
                        size += 1;
                        for (neighbor, _) in layer.neighbors(key).unwrap_or_default() {
                            if visited.insert(neighbor) {
                                queue.push_back(neighbor);
                            }
                        }
                    }
                    sizes.push(size);
                }
                sizes.sort_unstable_by(|a, b| b.cmp(a));
                sizes
            })
            .collect()
    }

    /// Average neighbor count per level, level 0 first. Empty levels report 0.
    pub fn mean_degree(&self) -> Vec<f64> {
        self.graph
            .layers()
            .iter()
            .map(|layer| {
                if layer.is_empty() {
                    return 0.0;
                }
                let edges: usize = layer.keys().map(|key| layer.degree(key)).sum();
                edges as f64 / layer.len() as f64
            })
            .collect()
    }
}
