use bevy::prelude::*;
use serde::{Deserialize, Serialize};

/// Where a grid's origin comes from.
///
/// A `Tracked` origin follows an external transform (plus an offset). Its position is
/// pushed in by `follow`, so it can be exercised without a live transform.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum GridOrigin {
    Fixed(Vec3),
    Tracked { position: Vec3, offset: Vec3 },
}

impl Default for GridOrigin {
    fn default() -> Self {
        GridOrigin::Fixed(Vec3::ZERO)
    }
}

impl GridOrigin {
    pub fn tracked(offset: Vec3) -> Self {
        GridOrigin::Tracked { position: Vec3::ZERO, offset }
    }

    pub fn position(&self) -> Vec3 {
        match *self {
            GridOrigin::Fixed(position) => position,
            GridOrigin::Tracked { position, offset } => position + offset,
        }
    }

    pub fn is_tracked(&self) -> bool {
        matches!(self, GridOrigin::Tracked { .. })
    }

    /// Set an explicit origin. Ignored for tracked origins; returns whether it applied.
    pub fn set(&mut self, value: Vec3) -> bool {
        match self {
            GridOrigin::Fixed(position) => {
                *position = value;
                true
            }
            GridOrigin::Tracked { .. } => {
                debug!("Ignoring explicit origin {:?}, origin is linked to a transform", value);
                false
            }
        }
    }

    /// Feed the tracked transform position. Returns true if the origin moved.
    pub fn follow(&mut self, transform_position: Vec3) -> bool {
        match self {
            GridOrigin::Fixed(_) => false,
            GridOrigin::Tracked { position, .. } => {
                if *position == transform_position {
                    return false;
                }
                *position = transform_position;
                true
            }
        }
    }
}
