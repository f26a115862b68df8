//! The surface registry: numbered layers and readout elements.

use nalgebra::Vector3;
use std::collections::{BTreeMap, HashMap};

use crate::error::GeometryError;
use crate::surface::Surface;
use crate::types::{ElementId, LayerId};

/// Read-only lookup of sensitive surfaces by layer and by element ID.
///
/// Built once before fitting and shared by every session through the
/// detector context.
#[derive(Debug, Clone, Default)]
pub struct SurfaceRegistry {
    /// All surfaces in insertion order
    surfaces: Vec<Surface>,

    /// Layer ID → indices into `surfaces`
    by_layer: BTreeMap<LayerId, Vec<usize>>,

    /// Element ID → indices into `surfaces` (several for a split element)
    by_element: HashMap<ElementId, Vec<usize>>,
}

impl SurfaceRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from a list of surfaces.
    pub fn from_surfaces(surfaces: impl IntoIterator<Item = Surface>) -> Self {
        let mut registry = Self::new();
        for surface in surfaces {
            registry.insert(surface);
        }
        registry
    }

    /// Registers a surface under its layer and element IDs.
    pub fn insert(&mut self, surface: Surface) {
        let index = self.surfaces.len();
        self.by_layer.entry(surface.layer_id).or_default().push(index);
        self.by_element
            .entry(surface.element_id)
            .or_default()
            .push(index);
        self.surfaces.push(surface);
    }

    /// Number of registered surfaces.
    pub fn len(&self) -> usize {
        self.surfaces.len()
    }

    /// Whether the registry has no surfaces.
    pub fn is_empty(&self) -> bool {
        self.surfaces.is_empty()
    }

    /// All surfaces in insertion order.
    pub fn surfaces(&self) -> impl Iterator<Item = &Surface> {
        self.surfaces.iter()
    }

    /// All layer IDs in ascending order.
    pub fn layer_ids(&self) -> impl Iterator<Item = LayerId> + '_ {
        self.by_layer.keys().copied()
    }

    /// Whether a layer with this ID exists.
    pub fn contains_layer(&self, layer: LayerId) -> bool {
        self.by_layer.contains_key(&layer)
    }

    /// The surfaces making up a numbered layer.
    pub fn layer(&self, layer: LayerId) -> Result<Vec<&Surface>, GeometryError> {
        self.by_layer
            .get(&layer)
            .map(|indices| indices.iter().map(|&i| &self.surfaces[i]).collect())
            .ok_or(GeometryError::UnknownLayer(layer))
    }

    /// Finds the surface a measurement at `point` was produced on.
    ///
    /// An element with a single surface resolves directly. When a layer has
    /// been split into several surfaces sharing one element ID, the surface
    /// containing `point` is selected; a point on more than one of them is
    /// ambiguous.
    pub fn find_surface(
        &self,
        element: ElementId,
        point: &Vector3<f64>,
    ) -> Result<&Surface, GeometryError> {
        let indices = self
            .by_element
            .get(&element)
            .ok_or(GeometryError::UnknownElement(element))?;

        if let [single] = indices.as_slice() {
            return Ok(&self.surfaces[*single]);
        }

        let mut on_surface = indices
            .iter()
            .map(|&i| &self.surfaces[i])
            .filter(|s| s.is_on_surface(point));

        match (on_surface.next(), on_surface.count()) {
            (Some(surface), 0) => Ok(surface),
            (Some(_), others) => Err(GeometryError::AmbiguousSurface {
                element,
                count: others + 1,
            }),
            (None, _) => Err(GeometryError::NotOnSurface(element)),
        }
    }

    /// Layers ordered from the inside out by their innermost surface radius.
    pub fn layers_by_radius(&self) -> Vec<(LayerId, f64)> {
        let mut layers: Vec<(LayerId, f64)> = self
            .by_layer
            .iter()
            .map(|(&id, indices)| {
                let r = indices
                    .iter()
                    .map(|&i| self.surfaces[i].sorting_radius())
                    .fold(f64::INFINITY, f64::min);
                (id, r)
            })
            .collect();

        layers.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        layers
    }
}
