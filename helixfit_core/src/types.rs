//! Small enums shared across the fitting engine.

use serde::{Deserialize, Serialize};

/// Order in which a session processes its hits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FitDirection {
    /// Hits in insertion order (usually outward from the interaction point)
    #[default]
    Forward,
    /// Hits in reverse insertion order
    Backward,
}

impl FitDirection {
    /// +1 for forward, -1 for backward.
    pub fn sign(self) -> f64 {
        match self {
            FitDirection::Forward => 1.0,
            FitDirection::Backward => -1.0,
        }
    }

    /// The opposite direction.
    pub fn reversed(self) -> Self {
        match self {
            FitDirection::Forward => FitDirection::Backward,
            FitDirection::Backward => FitDirection::Forward,
        }
    }
}

impl std::fmt::Display for FitDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FitDirection::Forward => write!(f, "forward"),
            FitDirection::Backward => write!(f, "backward"),
        }
    }
}

/// Which crossing of a layer to select.
///
/// `Forward` and `Backward` are measured along the fit direction: for a
/// backward fit, the "forward" crossing lies at negative arc length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CrossingMode {
    /// The nearest crossing behind the current location
    Backward,
    /// The nearest crossing in either direction, including the current location
    #[default]
    Closest,
    /// The nearest crossing ahead of the current location
    Forward,
}

impl CrossingMode {
    /// Integer encoding: -1 backward, 0 closest, +1 forward.
    pub fn as_int(self) -> i32 {
        match self {
            CrossingMode::Backward => -1,
            CrossingMode::Closest => 0,
            CrossingMode::Forward => 1,
        }
    }

    /// Decodes the integer encoding.
    pub fn from_int(value: i32) -> Option<Self> {
        match value {
            -1 => Some(CrossingMode::Backward),
            0 => Some(CrossingMode::Closest),
            1 => Some(CrossingMode::Forward),
            _ => None,
        }
    }
}

impl std::fmt::Display for CrossingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CrossingMode::Backward => write!(f, "backward"),
            CrossingMode::Closest => write!(f, "closest"),
            CrossingMode::Forward => write!(f, "forward"),
        }
    }
}

/// Lifecycle of a fit session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FitStatus {
    /// No seed yet
    #[default]
    Uninitialised,
    /// Seeded, no measurement incorporated yet
    Initialised,
    /// A fitted track is available
    Fitted,
    /// The last fit failed
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crossing_mode_encoding() {
        for mode in [CrossingMode::Backward, CrossingMode::Closest, CrossingMode::Forward] {
            assert_eq!(CrossingMode::from_int(mode.as_int()), Some(mode));
        }
        assert_eq!(CrossingMode::from_int(2), None);
    }

    #[test]
    fn test_direction_sign() {
        assert_eq!(FitDirection::Forward.sign(), 1.0);
        assert_eq!(FitDirection::Forward.reversed(), FitDirection::Backward);
        assert_eq!(FitDirection::Backward.sign(), -1.0);
    }
}
