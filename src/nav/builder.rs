use bevy::prelude::*;
use fixedbitset::FixedBitSet;
use kestrel_macros::profile;
use std::sync::Arc;
use std::time::{Duration, Instant};
use super::baked::BakedGridData;
use super::cell_matrix::{partition_sub_sections, Cell, CellEdge, CellMatrix, SubSection, BLOCKED_COST};
use super::config::GridConfig;
use super::errors::NavResult;
use super::geometry::WorldGeometry;
use super::grid::Grid;
use super::height_map::HeightMap;
use super::math::{compute_bounds, quantize, Bounds, FixedNum};
use super::scheduler::{BuildHandle, BuildJob, StepScheduler};

/// Cells scanned between two checks of the step budget.
pub const DEFAULT_CELL_BATCH_SIZE: usize = 64;

/// Walkable cells cost between 1 (flat) and 1 + this (at the slope limit).
const SLOPE_COST_RANGE: f32 = 4.0;

/// Distance either side of a cell edge, as a fraction of the cell size, at which the
/// surfaces of two neighbours are compared.
const EDGE_PROBE_INSET: f32 = 0.05;

/// What a build scans.
#[derive(Debug, Clone, PartialEq)]
pub enum BuildMode {
    /// Every cell, sub-section by sub-section.
    Full,
    /// Only the cells touched by sub-sections intersecting `area`, on top of an existing bake.
    Preview { area: Bounds },
}

/// Scans world geometry into a cell matrix for one grid configuration.
#[derive(Debug, Clone)]
pub struct GridBuilder {
    config: GridConfig,
    origin: Vec3,
    bounds: Bounds,
    cell_batch_size: usize,
}

impl GridBuilder {
    pub fn new(config: &GridConfig, origin: Vec3) -> NavResult<Self> {
        config.check()?;
        let bounds = compute_bounds(
            origin,
            config.size_x,
            config.size_z,
            config.cell_size,
            config.lower_boundary,
            config.upper_boundary,
        );
        Ok(Self {
            config: config.clone(),
            origin,
            bounds,
            cell_batch_size: DEFAULT_CELL_BATCH_SIZE,
        })
    }

    pub fn with_cell_batch_size(mut self, cell_batch_size: usize) -> Self {
        self.cell_batch_size = cell_batch_size.max(1);
        self
    }

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    pub fn origin(&self) -> Vec3 {
        self.origin
    }

    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    fn sub_sections(&self) -> Vec<SubSection> {
        partition_sub_sections(
            self.config.size_x as usize,
            self.config.size_z as usize,
            self.config.sub_sections_x as usize,
            self.config.sub_sections_z as usize,
            self.config.sub_sections_cell_overlap as usize,
        )
    }

    fn empty_matrix(&self) -> CellMatrix {
        let config = &self.config;
        let (size_x, size_z) = (config.size_x as usize, config.size_z as usize);
        let min = self.bounds.min();
        let height_map = config.generate_heightmap.then(|| {
            HeightMap::new(Vec2::new(min.x, min.z), config.cell_size, config.samples_per_cell(), size_x, size_z, min.y)
        });
        CellMatrix::unscanned(size_x, size_z, config.cell_size, self.bounds, self.origin.y, self.sub_sections(), height_map)
    }

    /// Bake synchronously, in one go.
    #[profile(5)]
    pub fn create(&self, geometry: &dyn WorldGeometry) -> Grid {
        info!(
            "Baking grid '{}' ({} x {} cells, {} sub-sections)",
            self.config.friendly_name,
            self.config.size_x,
            self.config.size_z,
            self.config.sub_sections_x * self.config.sub_sections_z
        );
        let grid = BuildTask::full(self).run_to_completion(geometry);
        info!(
            "Grid '{}' baked: {}/{} cells walkable",
            grid.name(),
            grid.cell_matrix().walkable_count(),
            grid.cell_matrix().cells().len()
        );
        grid
    }

    /// Rehydrate from previously baked data without scanning.
    pub fn create_from_baked(&self, baked: &BakedGridData) -> NavResult<Grid> {
        baked.check_compatible(&self.config, self.bounds)?;
        Ok(self.rehydrate(baked))
    }

    /// Rehydrate data that has already passed `check_compatible`.
    pub(crate) fn rehydrate(&self, baked: &BakedGridData) -> Grid {
        let mut matrix = self.empty_matrix();
        matrix.replace_cells(baked.cells.clone(), baked.height_map.clone());
        info!("Grid '{}' rehydrated from baked data", self.config.friendly_name);
        Grid::new(self.config.friendly_name.clone(), self.bounds, matrix)
    }

    /// Bake across several scheduler steps, spending at most about `budget` per step.
    ///
    /// `on_complete` runs exactly once, from the scheduler step that finishes the bake,
    /// unless the returned handle is cancelled first.
    pub fn create_sliced<S: StepScheduler + ?Sized>(
        &self,
        geometry: Arc<dyn WorldGeometry>,
        budget: Duration,
        scheduler: &mut S,
        on_complete: impl FnOnce(Arc<Grid>) + Send + Sync + 'static,
    ) -> BuildHandle {
        let handle = BuildHandle::new(&self.config.friendly_name);
        debug!("Scheduling time-sliced bake of grid '{}' ({:?} per step)", self.config.friendly_name, budget);
        scheduler.schedule(BuildJob::scan(
            handle.clone(),
            BuildTask::full(self),
            geometry,
            budget,
            Box::new(on_complete),
        ));
        handle
    }

    /// Rehydrate on the scheduler. Compatibility is checked before anything is scheduled.
    pub fn create_from_baked_sliced<S: StepScheduler + ?Sized>(
        &self,
        baked: BakedGridData,
        scheduler: &mut S,
        on_complete: impl FnOnce(Arc<Grid>) + Send + Sync + 'static,
    ) -> NavResult<BuildHandle> {
        baked.check_compatible(&self.config, self.bounds)?;
        let handle = BuildHandle::new(&self.config.friendly_name);
        scheduler.schedule(BuildJob::rehydrate(handle.clone(), self.clone(), baked, Box::new(on_complete)));
        Ok(handle)
    }

    /// Editor bake: synchronous, from baked data when there is some.
    pub fn create_for_editor(&self, geometry: &dyn WorldGeometry, baked: Option<&BakedGridData>) -> NavResult<Grid> {
        match baked {
            Some(baked) => self.create_from_baked(baked),
            None => Ok(self.create(geometry)),
        }
    }

    /// Rescan the part of `grid` around `area` into a new grid. Never time-sliced.
    #[profile(5)]
    pub fn rebuild_area(&self, grid: &Grid, area: Bounds, geometry: &dyn WorldGeometry) -> Grid {
        BuildTask::preview(self, grid, area).run_to_completion(geometry)
    }
}

#[derive(Debug, Clone)]
struct ScanParams {
    min_x: f32,
    min_z: f32,
    cell_size: f32,
    top: f32,
    bottom: f32,
    max_slope: f32,
    sensitivity: f32,
    max_scale_height: f32,
    heightmap: bool,
}

impl ScanParams {
    fn new(builder: &GridBuilder) -> Self {
        let config = &builder.config;
        let min = builder.bounds.min();
        let max = builder.bounds.max();
        Self {
            min_x: min.x,
            min_z: min.z,
            cell_size: config.cell_size,
            top: max.y,
            bottom: min.y,
            max_slope: config.max_walkable_slope_angle,
            sensitivity: config.obstacle_sensitivity_range,
            max_scale_height: config.max_scale_height,
            heightmap: config.generate_heightmap,
        }
    }
}

/// A resumable bake.
///
/// The task owns its scan position, so it can be stepped from any scheduler; every cell is
/// scanned independently of the others, which makes the result the same however the work
/// is sliced.
pub struct BuildTask {
    name: String,
    mode: BuildMode,
    bounds: Bounds,
    params: ScanParams,
    matrix: CellMatrix,
    queue: Vec<u32>,
    cursor: usize,
    batch_size: usize,
    steps: usize,
}

impl BuildTask {
    /// Scan every cell: sub-sections in row-major order, each one's home cells row-major.
    pub fn full(builder: &GridBuilder) -> Self {
        let matrix = builder.empty_matrix();
        let mut queue = Vec::with_capacity(matrix.cells().len());
        for section in matrix.sub_sections() {
            for (x, z) in section.home_cells() {
                queue.push(matrix.get_index(x, z) as u32);
            }
        }
        Self::with_queue(builder, BuildMode::Full, matrix, queue)
    }

    /// Rescan the cells of every sub-section whose touch range meets `area`.
    ///
    /// Falls back to a full bake when `base` was baked with a different layout.
    pub fn preview(builder: &GridBuilder, base: &Grid, area: Bounds) -> Self {
        let base_matrix = base.cell_matrix();
        let config = &builder.config;
        let compatible = base_matrix.size_x() == config.size_x as usize
            && base_matrix.size_z() == config.size_z as usize
            && base_matrix.cell_size() == config.cell_size
            && base_matrix.has_height_map() == config.generate_heightmap
            && base.bounds() == builder.bounds
            && base_matrix.sub_sections() == builder.sub_sections().as_slice();
        if !compatible {
            debug!("Grid '{}' layout changed since its last bake, previewing with a full bake", config.friendly_name);
            return Self::full(builder);
        }

        let matrix = base_matrix.clone();
        let mut dirty = FixedBitSet::with_capacity(matrix.cells().len());
        let touched = matrix.sub_sections_intersecting(&area);
        for id in &touched {
            if let Some(section) = matrix.sub_section(*id) {
                for (x, z) in section.touched_cells() {
                    dirty.insert(matrix.get_index(x, z));
                }
            }
        }
        let queue: Vec<u32> = dirty.ones().map(|idx| idx as u32).collect();
        debug!(
            "Preview of grid '{}': {} sub-sections, {} cells to rescan",
            config.friendly_name,
            touched.len(),
            queue.len()
        );
        Self::with_queue(builder, BuildMode::Preview { area }, matrix, queue)
    }

    fn with_queue(builder: &GridBuilder, mode: BuildMode, matrix: CellMatrix, queue: Vec<u32>) -> Self {
        Self {
            name: builder.config.friendly_name.clone(),
            mode,
            bounds: builder.bounds,
            params: ScanParams::new(builder),
            matrix,
            queue,
            cursor: 0,
            batch_size: builder.cell_batch_size,
            steps: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> &BuildMode {
        &self.mode
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn is_finished(&self) -> bool {
        self.cursor >= self.queue.len()
    }

    pub fn progress(&self) -> f32 {
        if self.queue.is_empty() {
            1.0
        } else {
            self.cursor as f32 / self.queue.len() as f32
        }
    }

    /// Scan cell batches until the queue is empty or `budget` is spent.
    /// At least one batch is scanned per call. Returns true once the bake is complete.
    #[profile(1)]
    pub fn step(&mut self, geometry: &dyn WorldGeometry, budget: Duration) -> bool {
        let start = Instant::now();
        self.steps += 1;
        while self.cursor < self.queue.len() {
            let end = (self.cursor + self.batch_size).min(self.queue.len());
            for &idx in &self.queue[self.cursor..end] {
                scan_cell(geometry, &self.params, &mut self.matrix, idx as usize);
            }
            self.cursor = end;
            if start.elapsed() >= budget {
                break;
            }
        }
        self.is_finished()
    }

    pub fn run_to_completion(mut self, geometry: &dyn WorldGeometry) -> Grid {
        while !self.step(geometry, Duration::MAX) {}
        self.finish()
    }

    pub(crate) fn finish(self) -> Grid {
        Grid::new(self.name, self.bounds, self.matrix)
    }
}

fn scan_cell(geometry: &dyn WorldGeometry, params: &ScanParams, matrix: &mut CellMatrix, idx: usize) {
    let x = idx % matrix.size_x();
    let z = idx / matrix.size_x();
    let sub_section = matrix.cells()[idx].sub_section;
    let center_x = params.min_x + (x as f32 + 0.5) * params.cell_size;
    let center_z = params.min_z + (z as f32 + 0.5) * params.cell_size;

    let steps_ok = match matrix.height_map_mut() {
        Some(map) => sample_cell_heights(geometry, params, map, x, z),
        None => true,
    };

    let cell = match geometry.raycast_down(center_x, center_z, params.top, params.bottom) {
        None => Cell::blocked(x as u32, z as u32, sub_section),
        Some(hit) => {
            let slope = hit.slope_angle();
            // Obstacles no taller than the scale height can be stepped onto
            let obstructed = geometry.overlaps_obstacle(
                center_x,
                center_z,
                params.sensitivity,
                hit.height + params.max_scale_height,
                params.top,
            );
            let walkable = steps_ok && slope <= params.max_slope && !obstructed;
            let blocked_edges = if walkable {
                scan_edges(geometry, params, matrix.size_x(), matrix.size_z(), x, z)
            } else {
                0
            };
            let cost = if walkable {
                1 + ((slope / params.max_slope) * SLOPE_COST_RANGE).floor() as u8
            } else {
                BLOCKED_COST
            };
            Cell {
                x: x as u32,
                z: z as u32,
                walkable,
                cost,
                height: params.heightmap.then(|| quantize(hit.height).to_num::<f32>()),
                sub_section,
                blocked_edges,
            }
        }
    };
    matrix.set(cell);
}

/// Edges of cell (x, z) where the surface just inside differs from the surface just across
/// by more than the scale height, or where there is no surface across. Edges on the matrix
/// border are left open.
fn scan_edges(geometry: &dyn WorldGeometry, params: &ScanParams, size_x: usize, size_z: usize, x: usize, z: usize) -> u8 {
    let half = params.cell_size * 0.5;
    let inset = params.cell_size * EDGE_PROBE_INSET;
    let center_x = params.min_x + (x as f32 + 0.5) * params.cell_size;
    let center_z = params.min_z + (z as f32 + 0.5) * params.cell_size;
    let max_step = FixedNum::from_num(params.max_scale_height);

    let mut bits = 0;
    for edge in CellEdge::ALL {
        let (dx, dz) = edge.offset();
        let (nx, nz) = (x as i64 + dx, z as i64 + dz);
        if nx < 0 || nz < 0 || nx >= size_x as i64 || nz >= size_z as i64 {
            continue;
        }
        let (dx, dz) = (dx as f32, dz as f32);
        let (edge_x, edge_z) = (center_x + dx * half, center_z + dz * half);
        let inside = geometry.raycast_down(edge_x - dx * inset, edge_z - dz * inset, params.top, params.bottom);
        let across = geometry.raycast_down(edge_x + dx * inset, edge_z + dz * inset, params.top, params.bottom);
        let crossable = match (inside, across) {
            (Some(a), Some(b)) => (quantize(a.height) - quantize(b.height)).abs() <= max_step,
            _ => false,
        };
        if !crossable {
            bits |= edge.bit();
        }
    }
    bits
}

/// Fill a cell's block of height samples. Returns false if the block has a hole or a step
/// taller than the scale height.
fn sample_cell_heights(geometry: &dyn WorldGeometry, params: &ScanParams, map: &mut HeightMap, x: usize, z: usize) -> bool {
    let ((i0, j0), (i1, j1)) = map.cell_sample_range(x, z);
    let mut complete = true;
    for j in j0..j1 {
        for i in i0..i1 {
            let p = map.sample_position(i, j);
            match geometry.raycast_down(p.x, p.y, params.top, params.bottom) {
                Some(hit) => map.set(i, j, quantize(hit.height)),
                None => {
                    map.set(i, j, quantize(params.bottom));
                    complete = false;
                }
            }
        }
    }
    if !complete {
        return false;
    }

    let max_step = FixedNum::from_num(params.max_scale_height);
    for j in j0..j1 {
        for i in i0..i1 {
            let Some(h) = map.get(i, j) else { continue };
            let right = if i + 1 < i1 { map.get(i + 1, j) } else { None };
            let up = if j + 1 < j1 { map.get(i, j + 1) } else { None };
            if right.into_iter().chain(up).any(|n| (n - h).abs() > max_step) {
                return false;
            }
        }
    }
    true
}
