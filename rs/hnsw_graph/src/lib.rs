//! # HNSW Graph
//!
//! An in-memory implementation of the Hierarchical Navigable Small World
//! (HNSW) algorithm for approximate nearest neighbor search.
//!
//! HNSW builds a stack of proximity graphs: level 0 holds every node, and each
//! level above holds a random, exponentially shrinking subset. Searches enter
//! at the sparse top and refine downwards.
//!
//! ## Features
//!
//! - Generic over the key (any `Ord` type) and the vector type;
//! - Pluggable distance: built-in metrics (Cosine, Euclidean, Inner Product, Manhattan) or any closure;
//! - Heuristic neighbor selection that keeps long-range edges;
//! - Deletion with neighbor repair;
//! - Seeded level assignment for reproducible graphs;
//! - Structural diagnostics (level population, connected components).
//!
//! ## Example
//!
//! ```rust
//! use hnsw_graph::{Graph, Node};
//!
//! let mut graph = Graph::with_default("readme".to_string());
//! graph.add(Node::new(1, vec![1.0f32, 1.0, 1.0])).unwrap();
//! graph.add(Node::new(2, vec![1.0f32, -1.0, 0.999])).unwrap();
//! graph.add(Node::new(3, vec![1.0f32, 0.0, -0.5])).unwrap();
//!
//! let hits = graph.search(&vec![0.5, 0.5, 0.5], 1).unwrap();
//! assert_eq!(hits[0].key, 1);
//! ```

mod analyzer;
mod distance;
mod error;
mod graph;
mod layer;
mod shared;

pub use analyzer::*;
pub use distance::*;
pub use error::*;
pub use graph::*;
pub use layer::{SelectNeighborsStrategy, select_neighbors};
pub use shared::*;

pub use half;
