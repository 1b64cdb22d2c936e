use bevy::prelude::*;
use std::fmt;
use thiserror::Error;

/// Which end of a path request an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    From,
    To,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::From => write!(f, "origin"),
            Endpoint::To => write!(f, "destination"),
        }
    }
}

/// Invalid or mismatched build parameters. Always fatal to the build that hit it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("invalid configuration for grid '{grid}': {reason}")]
    Invalid { grid: String, reason: String },

    #[error("grid '{grid}': sub-section overlap of {overlap} cells must be smaller than the smallest sub-section ({smallest} cells)")]
    SubSectionOverlap { grid: String, overlap: u32, smallest: u32 },

    #[error("baked data does not match grid '{grid}': {reason}")]
    BakedDataMismatch { grid: String, reason: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NavError {
    #[error(transparent)]
    Configuration(#[from] ConfigError),

    /// An endpoint could not be mapped to any registered grid.
    #[error("{endpoint} position {position:?} is not on any registered grid")]
    ResolutionFailure { endpoint: Endpoint, position: Vec3 },

    /// The endpoint cell is blocked and no walkable cell lies within the escape distance.
    #[error("no walkable cell within {max_distance} cells of {endpoint} position {position:?}")]
    UnreachableDestination { endpoint: Endpoint, position: Vec3, max_distance: u32 },

    /// A build was requested while another build for the same grid is still in flight.
    #[error("grid '{grid}' already has a build in flight")]
    ConcurrentBuildConflict { grid: String },
}

impl NavError {
    pub fn is_configuration(&self) -> bool {
        matches!(self, NavError::Configuration(_))
    }
}

/// Result type alias for navigation operations
pub type NavResult<T> = Result<T, NavError>;
