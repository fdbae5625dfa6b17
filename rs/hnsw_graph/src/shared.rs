use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::{fmt::Debug, sync::Arc};

use crate::{Distance, DistanceMetric, Graph, Neighbor, Node, Vector, error::HnswError};

/// A [`Graph`] behind a reader-writer lock: one writer, or any number of
/// concurrent searches.
///
/// Cloning is cheap and every clone refers to the same graph.
pub struct SharedGraph<K, V, D = DistanceMetric> {
    inner: Arc<RwLock<Graph<K, V, D>>>,
}

impl<K, V, D> Clone for SharedGraph<K, V, D> {
    fn clone(&self) -> Self {
        SharedGraph {
            inner: self.inner.clone(),
        }
    }
}

impl<K, V, D> SharedGraph<K, V, D>
where
    K: Ord + Clone + Debug,
    V: Vector,
    D: Distance<V>,
{
    pub fn new(graph: Graph<K, V, D>) -> Self {
        SharedGraph {
            inner: Arc::new(RwLock::new(graph)),
        }
    }

    /// Locks the graph for reading, e.g. to run an [`Analyzer`](crate::Analyzer).
    pub fn read(&self) -> RwLockReadGuard<'_, Graph<K, V, D>> {
        self.inner.read()
    }

    /// Locks the graph for a batch of writes.
    pub fn write(&self) -> RwLockWriteGuard<'_, Graph<K, V, D>> {
        self.inner.write()
    }

    pub fn add(&self, node: Node<K, V>) -> Result<(), HnswError> {
        self.inner.write().add(node)
    }

    pub fn search(&self, query: &V, k: usize) -> Result<Vec<Neighbor<K, V>>, HnswError> {
        self.inner.read().search(query, k)
    }

    pub fn delete(&self, key: &K) -> Result<bool, HnswError> {
        self.inner.write().delete(key)
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}
