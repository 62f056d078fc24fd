//! Error types for building the recipe.

use converge_engine::AttributeError;
use thiserror::Error;

/// Result type alias for recipe operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures while turning attributes into a resource graph.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The attributes the recipe reads up front are missing or malformed.
    #[error("recipe attributes: {0}")]
    Attribute(#[from] AttributeError),

    /// The engine rejected the graph being built.
    #[error(transparent)]
    Graph(#[from] converge_engine::Error),
}

impl Error {
    /// Whether the failure is a missing attribute.
    pub fn is_missing_attribute(&self) -> bool {
        matches!(
            self,
            Self::Attribute(AttributeError::Missing { .. })
                | Self::Graph(converge_engine::Error::MissingAttribute { .. })
        )
    }
}
