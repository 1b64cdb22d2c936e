use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use super::height_map::HeightMap;
use super::math::Bounds;

/// Cost stored for blocked cells (walkable cells cost 1 and up).
pub const BLOCKED_COST: u8 = 255;

/// Sub-sections a single matrix can be split into; every one needs a distinct id.
pub const MAX_SUB_SECTIONS: usize = u16::MAX as usize + 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubSectionId(pub u16);

/// Side of a cell, shared with the orthogonal neighbour in that direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CellEdge {
    /// +z
    North,
    /// +x
    East,
    /// -z
    South,
    /// -x
    West,
}

impl CellEdge {
    pub const ALL: [CellEdge; 4] = [CellEdge::North, CellEdge::East, CellEdge::South, CellEdge::West];

    pub fn bit(self) -> u8 {
        1 << self as u8
    }

    /// Grid offset of the neighbour across this edge.
    pub fn offset(self) -> (i64, i64) {
        match self {
            CellEdge::North => (0, 1),
            CellEdge::East => (1, 0),
            CellEdge::South => (0, -1),
            CellEdge::West => (-1, 0),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub x: u32,
    pub z: u32,
    pub walkable: bool,
    pub cost: u8,
    /// Quantised surface height at the cell centre; only set on height-mapped grids.
    pub height: Option<f32>,
    /// The sub-section this cell belongs to.
    pub sub_section: SubSectionId,
    /// `CellEdge` bits whose crossing is a vertical step taller than the scale height.
    pub blocked_edges: u8,
}

impl Cell {
    pub fn blocked(x: u32, z: u32, sub_section: SubSectionId) -> Self {
        Self {
            x,
            z,
            walkable: false,
            cost: BLOCKED_COST,
            height: None,
            sub_section,
            blocked_edges: 0,
        }
    }

    /// Whether a unit standing here can step over `edge` onto the neighbouring surface.
    pub fn can_cross(&self, edge: CellEdge) -> bool {
        self.blocked_edges & edge.bit() == 0
    }

    pub fn coords(&self) -> (usize, usize) {
        (self.x as usize, self.z as usize)
    }
}

/// Rectangular partition of the matrix.
///
/// `home` ranges tile the matrix without gaps or overlap. `touch` ranges are the home range
/// grown by the configured overlap (clamped to the matrix); a partial rebuild of this
/// sub-section rescans every touched cell.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubSection {
    pub id: SubSectionId,
    pub home_min: (usize, usize),
    pub home_max: (usize, usize),
    pub touch_min: (usize, usize),
    pub touch_max: (usize, usize),
}

impl SubSection {
    /// Home cells in row-major order. Max bounds are exclusive.
    pub fn home_cells(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        let (x0, x1) = (self.home_min.0, self.home_max.0);
        (self.home_min.1..self.home_max.1).flat_map(move |z| (x0..x1).map(move |x| (x, z)))
    }

    pub fn touched_cells(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        let (x0, x1) = (self.touch_min.0, self.touch_max.0);
        (self.touch_min.1..self.touch_max.1).flat_map(move |z| (x0..x1).map(move |x| (x, z)))
    }

    pub fn home_contains(&self, x: usize, z: usize) -> bool {
        x >= self.home_min.0 && x < self.home_max.0 && z >= self.home_min.1 && z < self.home_max.1
    }
}

/// Split `len` cells into `parts` contiguous ranges; the first `len % parts` ranges get
/// one extra cell.
pub(crate) fn split_axis(len: usize, parts: usize) -> Vec<(usize, usize)> {
    let parts = parts.max(1);
    let base = len / parts;
    let remainder = len % parts;
    let mut ranges = Vec::with_capacity(parts);
    let mut start = 0;
    for i in 0..parts {
        let extent = base + usize::from(i < remainder);
        ranges.push((start, start + extent));
        start += extent;
    }
    ranges
}

/// Partition a matrix into sub-sections, numbered row-major (z outer, x inner).
/// `parts_x * parts_z` must not exceed `MAX_SUB_SECTIONS`; `GridConfig::check` enforces it.
pub fn partition_sub_sections(size_x: usize, size_z: usize, parts_x: usize, parts_z: usize, overlap: usize) -> Vec<SubSection> {
    let xs = split_axis(size_x, parts_x);
    let zs = split_axis(size_z, parts_z);
    debug_assert!(xs.len() * zs.len() <= MAX_SUB_SECTIONS, "too many sub-sections for u16 ids");
    let mut sections = Vec::with_capacity(xs.len() * zs.len());
    for &(z0, z1) in &zs {
        for &(x0, x1) in &xs {
            sections.push(SubSection {
                id: SubSectionId(sections.len() as u16),
                home_min: (x0, z0),
                home_max: (x1, z1),
                touch_min: (x0.saturating_sub(overlap), z0.saturating_sub(overlap)),
                touch_max: ((x1 + overlap).min(size_x), (z1 + overlap).min(size_z)),
            });
        }
    }
    sections
}

/// The baked spatial structure of a grid: a row-major array of cells plus the
/// sub-section layout and optional height map.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CellMatrix {
    size_x: usize,
    size_z: usize,
    cell_size: f32,
    bounds: Bounds,
    /// World y of the grid origin; used for cells without a sampled height.
    base_height: f32,
    cells: Vec<Cell>,
    sub_sections: Vec<SubSection>,
    height_map: Option<HeightMap>,
}

impl CellMatrix {
    /// A matrix with every cell blocked, awaiting a scan.
    pub(crate) fn unscanned(
        size_x: usize,
        size_z: usize,
        cell_size: f32,
        bounds: Bounds,
        base_height: f32,
        sub_sections: Vec<SubSection>,
        height_map: Option<HeightMap>,
    ) -> Self {
        let mut cells = Vec::with_capacity(size_x * size_z);
        for z in 0..size_z {
            for x in 0..size_x {
                cells.push(Cell::blocked(x as u32, z as u32, SubSectionId(0)));
            }
        }
        let mut matrix = Self {
            size_x,
            size_z,
            cell_size,
            bounds,
            base_height,
            cells,
            sub_sections,
            height_map,
        };
        matrix.assign_home_sub_sections();
        matrix
    }

    /// Stamp every cell with its home sub-section.
    pub(crate) fn assign_home_sub_sections(&mut self) {
        for section in &self.sub_sections {
            for (x, z) in section.home_cells() {
                let idx = z * self.size_x + x;
                self.cells[idx].sub_section = section.id;
            }
        }
    }

    pub(crate) fn replace_cells(&mut self, cells: Vec<Cell>, height_map: Option<HeightMap>) {
        self.cells = cells;
        self.height_map = height_map;
        self.assign_home_sub_sections();
    }

    pub fn size_x(&self) -> usize {
        self.size_x
    }

    pub fn size_z(&self) -> usize {
        self.size_z
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn sub_sections(&self) -> &[SubSection] {
        &self.sub_sections
    }

    pub fn height_map(&self) -> Option<&HeightMap> {
        self.height_map.as_ref()
    }

    pub(crate) fn height_map_mut(&mut self) -> Option<&mut HeightMap> {
        self.height_map.as_mut()
    }

    pub fn has_height_map(&self) -> bool {
        self.height_map.is_some()
    }

    pub fn get_index(&self, x: usize, z: usize) -> usize {
        z * self.size_x + x
    }

    pub fn get(&self, x: usize, z: usize) -> Option<&Cell> {
        if x < self.size_x && z < self.size_z {
            Some(&self.cells[self.get_index(x, z)])
        } else {
            None
        }
    }

    /// The orthogonal neighbour across `edge`, if it is inside the matrix.
    pub fn neighbour(&self, x: usize, z: usize, edge: CellEdge) -> Option<&Cell> {
        let (dx, dz) = edge.offset();
        let (nx, nz) = (x as i64 + dx, z as i64 + dz);
        if nx < 0 || nz < 0 {
            return None;
        }
        self.get(nx as usize, nz as usize)
    }

    /// Whether a unit can move from (x, z) to its neighbour across `edge`: both cells
    /// walkable and no step taller than the scale height between them.
    pub fn can_step(&self, x: usize, z: usize, edge: CellEdge) -> bool {
        match (self.get(x, z), self.neighbour(x, z, edge)) {
            (Some(from), Some(to)) => from.walkable && to.walkable && from.can_cross(edge),
            _ => false,
        }
    }

    pub(crate) fn set(&mut self, cell: Cell) {
        let idx = self.get_index(cell.x as usize, cell.z as usize);
        self.cells[idx] = cell;
    }

    /// Grid coordinates of the cell under a world point (horizontal test only).
    pub fn cell_coords(&self, point: Vec3) -> Option<(usize, usize)> {
        let min = self.bounds.min();
        let local_x = point.x - min.x;
        let local_z = point.z - min.z;
        if local_x < 0.0 || local_z < 0.0 {
            return None;
        }

        let x = (local_x / self.cell_size) as usize;
        let z = (local_z / self.cell_size) as usize;
        // The far edge is inside the bounds; fold it into the last cell
        let x = if x == self.size_x && local_x <= self.size_x as f32 * self.cell_size { x - 1 } else { x };
        let z = if z == self.size_z && local_z <= self.size_z as f32 * self.cell_size { z - 1 } else { z };

        if x < self.size_x && z < self.size_z {
            Some((x, z))
        } else {
            None
        }
    }

    pub fn cell_at(&self, point: Vec3) -> Option<&Cell> {
        let (x, z) = self.cell_coords(point)?;
        self.get(x, z)
    }

    /// World position of a cell centre, at its sampled height when there is one.
    pub fn cell_center(&self, x: usize, z: usize) -> Vec3 {
        let min = self.bounds.min();
        let y = self.get(x, z).and_then(|c| c.height).unwrap_or(self.base_height);
        Vec3::new(
            min.x + (x as f32 + 0.5) * self.cell_size,
            y,
            min.z + (z as f32 + 0.5) * self.cell_size,
        )
    }

    pub fn walkable_count(&self) -> usize {
        self.cells.iter().filter(|c| c.walkable).count()
    }

    /// World-space footprint of a sub-section's touch range, spanning the grid's height.
    pub fn sub_section_bounds(&self, section: &SubSection) -> Bounds {
        let min = self.bounds.min();
        let max = self.bounds.max();
        Bounds::from_min_max(
            Vec3::new(min.x + section.touch_min.0 as f32 * self.cell_size, min.y, min.z + section.touch_min.1 as f32 * self.cell_size),
            Vec3::new(min.x + section.touch_max.0 as f32 * self.cell_size, max.y, min.z + section.touch_max.1 as f32 * self.cell_size),
        )
    }

    /// Sub-sections whose touch range intersects an area, in id order.
    pub fn sub_sections_intersecting(&self, area: &Bounds) -> SmallVec<[SubSectionId; 8]> {
        self.sub_sections
            .iter()
            .filter(|section| self.sub_section_bounds(section).intersects_xz(area))
            .map(|section| section.id)
            .collect()
    }

    pub fn sub_section(&self, id: SubSectionId) -> Option<&SubSection> {
        self.sub_sections.get(id.0 as usize)
    }

    /// Nearest walkable cell within `max_distance` rings of (x, z).
    ///
    /// Distance is measured in Chebyshev rings; within the first ring that has a walkable
    /// cell, the one closest in Euclidean cell distance wins, ties going to scan order.
    /// Returns the cell and its ring distance. Rings stop at the far edge of the matrix.
    pub fn nearest_walkable(&self, x: usize, z: usize, max_distance: u32) -> Option<(&Cell, u32)> {
        if x >= self.size_x || z >= self.size_z {
            return None;
        }
        let reach = x.max(self.size_x - 1 - x).max(z).max(self.size_z - 1 - z);
        let limit = reach.min(max_distance as usize);

        for d in 0..=limit {
            let mut best: Option<(usize, &Cell)> = None;
            let mut consider = |nx: usize, nz: usize| {
                let cell = &self.cells[nz * self.size_x + nx];
                if !cell.walkable {
                    return;
                }
                let dist_sq = nx.abs_diff(x).pow(2) + nz.abs_diff(z).pow(2);
                if best.map_or(true, |(b, _)| dist_sq < b) {
                    best = Some((dist_sq, cell));
                }
            };

            let (z0, z1) = (z.saturating_sub(d), (z + d).min(self.size_z - 1));
            let (x0, x1) = (x.saturating_sub(d), (x + d).min(self.size_x - 1));
            for nz in z0..=z1 {
                if nz.abs_diff(z) == d {
                    // Top or bottom row of the ring
                    for nx in x0..=x1 {
                        consider(nx, nz);
                    }
                } else {
                    if x >= d {
                        consider(x - d, nz);
                    }
                    if d > 0 && x + d < self.size_x {
                        consider(x + d, nz);
                    }
                }
            }
            if let Some((_, cell)) = best {
                return Some((cell, d as u32));
            }
        }
        None
    }
}
