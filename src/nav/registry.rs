use bevy::prelude::*;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use super::grid::{Grid, GridId};
use super::height_map::HeightMapRegistry;
use super::scheduler::BuildHandle;

/// Every live grid and the components that configure them.
///
/// One registry per app (a bevy resource), passed explicitly to whatever needs it. Height map
/// registration is driven from here, so the two never disagree about which grids are live.
#[derive(Resource, Default)]
pub struct GridRegistry {
    components: FxHashMap<Entity, Option<GridId>>,
    grids: BTreeMap<GridId, Arc<Grid>>,
    height_maps: HeightMapRegistry,
    /// Bakes in flight, by the component that started them.
    builds: FxHashMap<Entity, BuildHandle>,
}

impl GridRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a configuration component, with or without a built grid.
    pub fn register_grid_component(&mut self, entity: Entity) -> bool {
        if self.components.contains_key(&entity) {
            return false;
        }
        self.components.insert(entity, None);
        debug!("Registered grid component {:?}", entity);
        true
    }

    /// Stop tracking a component. A bake it still has in flight is cancelled; its grid, if
    /// any, is unregistered and returned.
    pub fn unregister_grid_component(&mut self, entity: Entity) -> Option<Arc<Grid>> {
        if let Some(handle) = self.builds.remove(&entity) {
            if !handle.is_finished() {
                handle.cancel();
                debug!("Cancelled bake of grid '{}' for removed component {:?}", handle.grid_name(), entity);
            }
        }
        let bound = self.components.remove(&entity)??;
        self.unregister_grid(bound)
    }

    /// Register a grid and its height map. Registering the same grid twice is a no-op
    /// and returns false.
    pub fn register_grid(&mut self, grid: Arc<Grid>) -> bool {
        if self.grids.contains_key(&grid.id()) {
            debug!("Grid '{}' ({:?}) is already registered", grid.name(), grid.id());
            return false;
        }
        self.height_maps.register_map(&grid);
        info!("Registered grid '{}' ({:?})", grid.name(), grid.id());
        self.grids.insert(grid.id(), grid);
        true
    }

    /// Unregister a grid and its height map in one step.
    pub fn unregister_grid(&mut self, id: GridId) -> Option<Arc<Grid>> {
        let grid = self.grids.remove(&id)?;
        self.height_maps.unregister_map(id);
        for bound in self.components.values_mut() {
            if *bound == Some(id) {
                *bound = None;
            }
        }
        info!("Unregistered grid '{}' ({:?})", grid.name(), id);
        Some(grid)
    }

    /// Register `grid` as the one built for `entity`, swapping out whatever the component had
    /// before. Returns the replaced grid.
    pub fn bind_component(&mut self, entity: Entity, grid: Arc<Grid>) -> Option<Arc<Grid>> {
        let previous = self.components.get(&entity).copied().flatten();
        let replaced = match previous {
            Some(id) if id != grid.id() => self.unregister_grid(id),
            _ => None,
        };
        let id = grid.id();
        self.builds.remove(&entity);
        self.register_grid(grid);
        self.components.insert(entity, Some(id));
        replaced
    }

    /// Remember the bake a component has in flight, so removing the component cancels it.
    pub fn track_build(&mut self, entity: Entity, handle: BuildHandle) {
        self.builds.insert(entity, handle);
    }

    pub fn build_for_component(&self, entity: Entity) -> Option<&BuildHandle> {
        self.builds.get(&entity).filter(|handle| !handle.is_finished() && !handle.is_cancelled())
    }

    pub fn grid(&self, id: GridId) -> Option<&Arc<Grid>> {
        self.grids.get(&id)
    }

    pub fn is_registered(&self, id: GridId) -> bool {
        self.grids.contains_key(&id)
    }

    /// Registered grids in id order.
    pub fn grids(&self) -> impl Iterator<Item = &Arc<Grid>> + '_ {
        self.grids.values()
    }

    pub fn grid_count(&self) -> usize {
        self.grids.len()
    }

    pub fn is_component_registered(&self, entity: Entity) -> bool {
        self.components.contains_key(&entity)
    }

    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    pub fn grid_for_component(&self, entity: Entity) -> Option<&Arc<Grid>> {
        let id = (*self.components.get(&entity)?)?;
        self.grids.get(&id)
    }

    /// First grid (in id order) whose bounds contain the point.
    pub fn grid_at(&self, point: Vec3) -> Option<&Arc<Grid>> {
        self.grids.values().find(|grid| grid.contains(point))
    }

    /// The grid horizontally closest to a point; earlier ids win ties.
    pub fn nearest_grid(&self, point: Vec3) -> Option<&Arc<Grid>> {
        let mut best: Option<(f32, &Arc<Grid>)> = None;
        for grid in self.grids.values() {
            let distance = grid.bounds().distance_squared_xz(point);
            if best.map_or(true, |(d, _)| distance < d) {
                best = Some((distance, grid));
            }
        }
        best.map(|(_, grid)| grid)
    }

    pub fn height_maps(&self) -> &HeightMapRegistry {
        &self.height_maps
    }

    pub fn sample_height(&self, point: Vec3) -> Option<f32> {
        self.height_maps.sample_height(point)
    }
}
