use bevy::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use super::baked::BakedGridData;
use super::builder::{GridBuilder, DEFAULT_CELL_BATCH_SIZE};
use super::config::GridConfig;
use super::errors::{NavError, NavResult};
use super::geometry::WorldGeometry;
use super::grid::Grid;
use super::math::{compute_bounds, Bounds};
use super::origin::GridOrigin;
use super::registry::GridRegistry;
use super::scheduler::{BuildHandle, StepScheduler};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridStatus {
    InitializationComplete,
    DisableComplete,
}

/// Posted when a grid component finishes initialising or is disabled.
#[derive(Message, Debug, Clone, PartialEq)]
pub struct GridStatusMessage {
    pub entity: Entity,
    pub grid_bounds: Bounds,
    pub status: GridStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridAction {
    /// Start a time-sliced build, even with automatic initialisation off.
    Initialize,
    /// Cancel any build, drop the grid and stop automatic rebuilds.
    Disable,
    /// Allow automatic initialisation again.
    Enable,
}

#[derive(Message, Debug, Clone, Copy, PartialEq)]
pub struct GridControl {
    pub entity: Entity,
    pub action: GridAction,
}

/// Configuration object for one grid, attached to an entity.
///
/// Holds the build parameters and, once built, the grid itself. Until a grid exists the
/// bounds follow the configuration and origin; after that they are the grid's own.
#[derive(Component)]
pub struct GridComponent {
    config: GridConfig,
    origin: GridOrigin,
    /// Snapshot handed to the builder instead of scanning geometry.
    pub baked_data: Option<BakedGridData>,
    /// Keep `baked_data` after a synchronous bake has used it.
    pub store_baked_data_as_asset: bool,
    /// Build as soon as the component is enabled.
    pub automatic_initialization: bool,
    pub enabled: bool,
    pub build_budget: Duration,
    pub cell_batch_size: usize,
    grid: Option<Arc<Grid>>,
    build: Option<BuildHandle>,
    origin_moved: bool,
}

impl GridComponent {
    /// Component with a fixed origin taken from the configuration.
    pub fn new(config: GridConfig) -> NavResult<Self> {
        let origin = GridOrigin::Fixed(config.origin);
        Self::with_origin(config, origin)
    }

    /// Component whose origin follows the entity's transform, plus `offset`.
    pub fn tracked(config: GridConfig, offset: Vec3) -> NavResult<Self> {
        Self::with_origin(config, GridOrigin::tracked(offset))
    }

    fn with_origin(config: GridConfig, origin: GridOrigin) -> NavResult<Self> {
        config.check()?;
        Ok(Self {
            config,
            origin,
            baked_data: None,
            store_baked_data_as_asset: true,
            automatic_initialization: true,
            enabled: true,
            build_budget: Duration::from_millis(5),
            cell_batch_size: DEFAULT_CELL_BATCH_SIZE,
            grid: None,
            build: None,
            origin_moved: false,
        })
    }

    pub fn with_baked_data(mut self, baked: BakedGridData) -> Self {
        self.baked_data = Some(baked);
        self
    }

    pub fn with_automatic_initialization(mut self, automatic: bool) -> Self {
        self.automatic_initialization = automatic;
        self
    }

    pub fn with_build_budget(mut self, budget: Duration) -> Self {
        self.build_budget = budget;
        self
    }

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    /// Replace the configuration. Takes effect on the next build.
    pub fn set_config(&mut self, config: GridConfig) -> NavResult<()> {
        config.check()?;
        self.config = config;
        Ok(())
    }

    pub fn origin(&self) -> &GridOrigin {
        &self.origin
    }

    /// Set an explicit origin. Silently ignored when the origin tracks a transform.
    pub fn set_origin(&mut self, origin: Vec3) -> bool {
        let previous = self.origin.position();
        if !self.origin.set(origin) {
            return false;
        }
        self.config.origin = origin;
        self.origin_moved |= previous != origin;
        true
    }

    /// Feed the transform a tracked origin follows.
    pub fn follow_transform(&mut self, position: Vec3) -> bool {
        let moved = self.origin.follow(position);
        self.origin_moved |= moved;
        moved
    }

    pub fn origin_moved(&self) -> bool {
        self.origin_moved
    }

    pub fn bounds(&self) -> Bounds {
        match &self.grid {
            Some(grid) => grid.bounds(),
            None => compute_bounds(
                self.origin.position(),
                self.config.size_x,
                self.config.size_z,
                self.config.cell_size,
                self.config.lower_boundary,
                self.config.upper_boundary,
            ),
        }
    }

    pub fn grid(&self) -> Option<&Arc<Grid>> {
        self.grid.as_ref()
    }

    pub fn has_grid(&self) -> bool {
        self.grid.is_some()
    }

    /// A build has been started and its grid not yet adopted.
    pub fn is_building(&self) -> bool {
        self.build.is_some()
    }

    pub fn build_handle(&self) -> Option<&BuildHandle> {
        self.build.as_ref()
    }

    pub fn contains(&self, point: Vec3) -> bool {
        self.bounds().contains(point)
    }

    pub fn builder(&self) -> NavResult<GridBuilder> {
        Ok(GridBuilder::new(&self.config, self.origin.position())?.with_cell_batch_size(self.cell_batch_size))
    }

    fn conflict(&self) -> NavError {
        NavError::ConcurrentBuildConflict {
            grid: self.config.friendly_name.clone(),
        }
    }

    /// Build synchronously if there is no grid yet, and register the result.
    pub fn ensure_grid(&mut self, owner: Entity, geometry: &dyn WorldGeometry, registry: &mut GridRegistry) -> NavResult<Arc<Grid>> {
        if let Some(grid) = &self.grid {
            return Ok(grid.clone());
        }
        if self.is_building() {
            return Err(self.conflict());
        }

        let builder = self.builder()?;
        let grid = match &self.baked_data {
            Some(baked) => {
                let grid = builder.create_from_baked(baked)?;
                if !self.store_baked_data_as_asset {
                    self.baked_data = None;
                }
                grid
            }
            None => builder.create(geometry),
        };

        let grid = Arc::new(grid);
        self.adopt(owner, grid.clone(), registry);
        Ok(grid)
    }

    /// Start a time-sliced build. Does nothing if the grid already exists.
    ///
    /// `on_complete` runs from the scheduler step that finishes the build and should hand the
    /// grid back to `finish_build`.
    pub fn initialize<S: StepScheduler + ?Sized>(
        &mut self,
        geometry: Arc<dyn WorldGeometry>,
        scheduler: &mut S,
        on_complete: impl FnOnce(Arc<Grid>) + Send + Sync + 'static,
    ) -> NavResult<Option<BuildHandle>> {
        if self.grid.is_some() {
            return Ok(None);
        }
        if self.is_building() {
            warn!("Rejected build of grid '{}': a build is already in flight", self.config.friendly_name);
            return Err(self.conflict());
        }

        let builder = self.builder()?;
        let handle = match &self.baked_data {
            Some(baked) => builder.create_from_baked_sliced(baked.clone(), scheduler, on_complete)?,
            None => builder.create_sliced(geometry, self.build_budget, scheduler, on_complete),
        };
        self.enabled = true;
        self.build = Some(handle.clone());
        Ok(Some(handle))
    }

    /// Adopt the grid produced by the build in flight and register it.
    /// Returns false (and drops the grid) when no finished build is waiting for it.
    pub fn finish_build(&mut self, owner: Entity, grid: Arc<Grid>, registry: &mut GridRegistry) -> bool {
        match &self.build {
            Some(handle) if handle.is_finished() && !handle.is_cancelled() => {}
            _ => {
                debug!("Discarding grid '{}': no finished build to adopt it", grid.name());
                return false;
            }
        }
        self.build = None;
        self.adopt(owner, grid, registry);
        true
    }

    fn adopt(&mut self, owner: Entity, grid: Arc<Grid>, registry: &mut GridRegistry) {
        registry.bind_component(owner, grid.clone());
        self.grid = Some(grid);
        self.origin_moved = false;
    }

    /// Cancel any build in flight, then drop and unregister the grid.
    /// Returns the bounds of the dropped grid, if there was one.
    pub fn disable(&mut self, registry: &mut GridRegistry) -> Option<Bounds> {
        self.enabled = false;
        self.reset_grid(registry).map(|grid| grid.bounds())
    }

    /// Drop the grid (and any build in flight) without changing `enabled`.
    pub fn reset_grid(&mut self, registry: &mut GridRegistry) -> Option<Arc<Grid>> {
        if let Some(handle) = self.build.take() {
            handle.cancel();
            info!("Cancelled build of grid '{}'", self.config.friendly_name);
        }
        let grid = self.grid.take()?;
        registry.unregister_grid(grid.id());
        Some(grid)
    }

    /// Editor entry point: make sure a grid exists and, when `refresh` is set, rebuild the part
    /// of it under `area`. A moved origin drops the old grid first.
    ///
    /// Returns `area` clamped to the grid bounds shrunk by one cell, flattened to y = 0.
    pub fn ensure_for_editor(
        &mut self,
        owner: Entity,
        refresh: bool,
        area: Bounds,
        geometry: &dyn WorldGeometry,
        registry: &mut GridRegistry,
    ) -> NavResult<Bounds> {
        if self.is_building() {
            return Err(self.conflict());
        }
        if refresh && self.origin_moved {
            self.origin_moved = false;
            self.reset_grid(registry);
        }

        let builder = self.builder()?;
        let grid = match &self.grid {
            Some(grid) => grid.clone(),
            None => {
                let grid = Arc::new(builder.create_for_editor(geometry, self.baked_data.as_ref())?);
                self.adopt(owner, grid.clone(), registry);
                grid
            }
        };

        let inner = self.bounds().expand(-self.config.cell_size);
        let (gmin, gmax) = (inner.min(), inner.max());
        let (amin, amax) = (area.min(), area.max());
        let bottom_left = Vec3::new(amin.x.max(gmin.x), 0.0, amin.z.max(gmin.z));
        let top_right = Vec3::new(amax.x.min(gmax.x), 0.0, amax.z.min(gmax.z)).max(bottom_left);
        let clamped = Bounds::from_min_max(bottom_left, top_right);

        if refresh {
            let rebuilt = Arc::new(builder.rebuild_area(&grid, clamped, geometry));
            self.adopt(owner, rebuilt, registry);
        }

        Ok(clamped)
    }
}
