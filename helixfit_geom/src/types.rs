//! Identifier types for the HelixFit geometry layer.

use serde::{Deserialize, Serialize};

/// Number of module slots reserved per layer in an [`ElementId`].
const MODULES_PER_LAYER: i32 = 1000;

/// Identifier of a numbered sensitive layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LayerId(pub i32);

impl std::fmt::Display for LayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "layer#{}", self.0)
    }
}

/// Identifier of a sensitive readout element.
///
/// Several surfaces may share one element ID when a layer is split into
/// pieces that are read out together; the registry disambiguates them by
/// position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ElementId(pub i32);

impl ElementId {
    /// Encodes a layer and module number into a single element ID.
    pub fn encode(layer: LayerId, module: i32) -> Self {
        Self(layer.0 * MODULES_PER_LAYER + module)
    }

    /// Returns the layer encoded in this element ID.
    pub fn layer(&self) -> LayerId {
        LayerId(self.0.div_euclid(MODULES_PER_LAYER))
    }

    /// Returns the module number encoded in this element ID.
    pub fn module(&self) -> i32 {
        self.0.rem_euclid(MODULES_PER_LAYER)
    }
}

impl std::fmt::Display for ElementId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "element#{} [{}/{}]", self.0, self.layer().0, self.module())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_encoding_roundtrip() {
        let id = ElementId::encode(LayerId(7), 42);
        assert_eq!(id.0, 7042);
        assert_eq!(id.layer(), LayerId(7));
        assert_eq!(id.module(), 42);
    }

    #[test]
    fn test_negative_layer_encoding() {
        // Endcap layers on the -z side use negative layer numbers
        let id = ElementId::encode(LayerId(-3), 5);
        assert_eq!(id.layer(), LayerId(-3));
        assert_eq!(id.module(), 5);
    }
}
