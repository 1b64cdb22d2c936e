use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use super::grid::{Grid, GridId};
use super::math::{Bounds, FixedNum};

/// Dense terrain height samples for a grid.
///
/// Samples are laid out row-major over the whole grid, `samples_per_cell` per cell on each
/// axis, so every cell owns an aligned square block of samples. Sample (i, j) sits at the
/// centre of its `spacing`-sized patch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeightMap {
    origin: Vec2,
    spacing: f32,
    samples_per_cell: usize,
    columns: usize,
    rows: usize,
    samples: Vec<FixedNum>,
}

impl HeightMap {
    pub fn new(origin: Vec2, cell_size: f32, samples_per_cell: usize, size_x: usize, size_z: usize, fill: f32) -> Self {
        let samples_per_cell = samples_per_cell.max(1);
        let columns = size_x * samples_per_cell;
        let rows = size_z * samples_per_cell;
        Self {
            origin,
            spacing: cell_size / samples_per_cell as f32,
            samples_per_cell,
            columns,
            rows,
            samples: vec![FixedNum::from_num(fill); columns * rows],
        }
    }

    pub fn samples_per_cell(&self) -> usize {
        self.samples_per_cell
    }

    pub fn spacing(&self) -> f32 {
        self.spacing
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    /// World (x, z) of a sample.
    pub fn sample_position(&self, i: usize, j: usize) -> Vec2 {
        self.origin + Vec2::new((i as f32 + 0.5) * self.spacing, (j as f32 + 0.5) * self.spacing)
    }

    pub fn get(&self, i: usize, j: usize) -> Option<FixedNum> {
        if i < self.columns && j < self.rows {
            Some(self.samples[j * self.columns + i])
        } else {
            None
        }
    }

    pub(crate) fn set(&mut self, i: usize, j: usize, height: FixedNum) {
        if i < self.columns && j < self.rows {
            self.samples[j * self.columns + i] = height;
        }
    }

    /// Sample index range (inclusive start, exclusive end) covered by a cell.
    pub fn cell_sample_range(&self, x: usize, z: usize) -> ((usize, usize), (usize, usize)) {
        let n = self.samples_per_cell;
        ((x * n, z * n), ((x + 1) * n, (z + 1) * n))
    }

    /// Height of the sample under a world point, or None outside the map.
    pub fn sample_height(&self, point: Vec3) -> Option<f32> {
        let local = Vec2::new(point.x, point.z) - self.origin;
        if local.x < 0.0 || local.y < 0.0 {
            return None;
        }
        let i = (local.x / self.spacing) as usize;
        let j = (local.y / self.spacing) as usize;
        // Points on the far edge belong to the last sample
        let i = if i == self.columns { i - 1 } else { i };
        let j = if j == self.rows { j - 1 } else { j };
        self.get(i, j).map(|h| h.to_num::<f32>())
    }
}

struct HeightMapEntry {
    bounds: Bounds,
    grid: Weak<Grid>,
}

/// Non-owning index of the live height maps, for height queries that don't know which grid
/// they are on.
///
/// Mutation goes through `GridRegistry` only, so a height map is never live for a grid the
/// registry has dropped.
#[derive(Default)]
pub struct HeightMapRegistry {
    maps: BTreeMap<GridId, HeightMapEntry>,
}

impl HeightMapRegistry {
    pub(crate) fn register_map(&mut self, grid: &Arc<Grid>) -> bool {
        if !grid.cell_matrix().has_height_map() || self.maps.contains_key(&grid.id()) {
            return false;
        }
        self.maps.insert(grid.id(), HeightMapEntry {
            bounds: grid.bounds(),
            grid: Arc::downgrade(grid),
        });
        true
    }

    pub(crate) fn unregister_map(&mut self, id: GridId) -> bool {
        self.maps.remove(&id).is_some()
    }

    pub fn is_registered(&self, id: GridId) -> bool {
        self.maps.contains_key(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = GridId> + '_ {
        self.maps.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    /// Terrain height under a point, from the first live height map whose grid contains it.
    pub fn sample_height(&self, point: Vec3) -> Option<f32> {
        self.maps.values()
            .filter(|entry| entry.bounds.contains_xz(point))
            .filter_map(|entry| entry.grid.upgrade())
            .find_map(|grid| grid.cell_matrix().height_map().and_then(|map| map.sample_height(point)))
    }
}
