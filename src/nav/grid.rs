use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use super::baked::BakedGridData;
use super::cell_matrix::{Cell, CellMatrix};
use super::math::Bounds;

static NEXT_GRID_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one baked grid. A rebuild produces a new id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridId(pub u64);

impl GridId {
    pub(crate) fn next() -> Self {
        GridId(NEXT_GRID_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// A built, queryable grid.
///
/// Immutable once built: changing anything means building a new `Grid` and swapping it
/// into the registry. Shared as `Arc<Grid>` between the registry, its component and the
/// path requests that resolved onto it.
#[derive(Debug)]
pub struct Grid {
    id: GridId,
    name: String,
    bounds: Bounds,
    matrix: CellMatrix,
}

impl Grid {
    pub(crate) fn new(name: String, bounds: Bounds, matrix: CellMatrix) -> Self {
        Self {
            id: GridId::next(),
            name,
            bounds,
            matrix,
        }
    }

    pub fn id(&self) -> GridId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    pub fn cell_matrix(&self) -> &CellMatrix {
        &self.matrix
    }

    pub fn contains(&self, point: Vec3) -> bool {
        self.bounds.contains(point)
    }

    /// The cell under a point, or None when the point is outside the grid.
    pub fn cell_at(&self, point: Vec3) -> Option<&Cell> {
        if !self.contains(point) {
            return None;
        }
        self.matrix.cell_at(point)
    }

    pub fn has_height_map(&self) -> bool {
        self.matrix.has_height_map()
    }

    pub fn sample_height(&self, point: Vec3) -> Option<f32> {
        self.matrix.height_map()?.sample_height(point)
    }

    pub fn to_baked_data(&self) -> BakedGridData {
        BakedGridData::from_matrix(&self.matrix)
    }
}
