use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur when working with an HNSW graph.
#[derive(Error, Debug)]
pub enum HnswError {
    /// Graph-related errors.
    #[error("HNSW graph {name:?}, error: {source:?}")]
    Generic { name: String, source: BoxError },

    /// Error when a configuration value or call argument is out of range.
    #[error("HNSW graph {name:?}, invalid config: {reason}")]
    InvalidConfig { name: String, reason: String },

    /// Error when vector dimensions don't match the graph dimension.
    #[error("HNSW graph {name:?}, vector dimension mismatch, expected {expected}, got {got}")]
    DimensionMismatch {
        name: String,
        expected: usize,
        got: usize,
    },

    /// Error raised by a user supplied distance function.
    #[error("HNSW graph {name:?}, distance computation failed: {source:?}")]
    Distance { name: String, source: BoxError },
}

impl HnswError {
    /// Returns true for errors caused by configuration or call arguments.
    pub fn is_config(&self) -> bool {
        matches!(self, HnswError::InvalidConfig { .. })
    }

    /// Returns true for errors raised while computing a distance.
    pub fn is_computation(&self) -> bool {
        matches!(
            self,
            HnswError::DimensionMismatch { .. } | HnswError::Distance { .. }
        )
    }

    /// Replaces the graph name carried by the error.
    ///
    /// Distance functions don't know which graph they run in, so they report
    /// an empty name and the graph fills it in on the way out.
    pub(crate) fn with_name(mut self, graph: &str) -> Self {
        match &mut self {
            HnswError::Generic { name, .. }
            | HnswError::InvalidConfig { name, .. }
            | HnswError::DimensionMismatch { name, .. }
            | HnswError::Distance { name, .. } => {
                if name.is_empty() {
                    *name = graph.to_string();
                }
            }
        }
        self
    }
}
