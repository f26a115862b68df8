//! Error types for the HelixFit geometry layer.

use thiserror::Error;

use crate::types::{ElementId, LayerId};

/// Errors that can occur while building or querying the detector description.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    /// No surface is registered under the layer ID
    #[error("Unknown layer: {0}")]
    UnknownLayer(LayerId),

    /// No surface is registered under the element ID
    #[error("Unknown element: {0}")]
    UnknownElement(ElementId),

    /// A split element has more than one surface containing the point
    #[error("Point lies on {count} surfaces of {element}")]
    AmbiguousSurface { element: ElementId, count: usize },

    /// A split element has no surface containing the point
    #[error("Point is not on any surface of {0}")]
    NotOnSurface(ElementId),

    /// Surface parameters are degenerate or non-finite
    #[error("Invalid surface: {0}")]
    InvalidSurface(String),
}

impl GeometryError {
    /// Creates an invalid-surface error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidSurface(msg.into())
    }
}
