use bevy::prelude::*;
use std::sync::{Arc, Mutex};
use super::component::{GridAction, GridComponent, GridControl, GridStatus, GridStatusMessage};
use super::config::NavigationSettings;
use super::errors::NavResult;
use super::geometry::SceneGeometry;
use super::grid::Grid;
use super::path_request::{PathRequestMessage, PathResolvedMessage};
use super::registry::GridRegistry;
use super::scheduler::{BuildHandle, FrameScheduler};

/// Grids finished by scheduler jobs, waiting to be adopted by their components.
#[derive(Resource, Clone, Default)]
pub struct BuildInbox(Arc<Mutex<Vec<(Entity, Arc<Grid>)>>>);

impl BuildInbox {
    pub fn push(&self, entity: Entity, grid: Arc<Grid>) {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).push((entity, grid));
    }

    pub fn drain(&self) -> Vec<(Entity, Arc<Grid>)> {
        std::mem::take(&mut *self.0.lock().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn start_build(
    entity: Entity,
    component: &mut GridComponent,
    geometry: &SceneGeometry,
    scheduler: &mut FrameScheduler,
    inbox: &BuildInbox,
    registry: &mut GridRegistry,
) -> NavResult<Option<BuildHandle>> {
    let inbox = inbox.clone();
    let handle = component.initialize(geometry.0.clone(), scheduler, move |grid| inbox.push(entity, grid))?;
    if let Some(handle) = &handle {
        registry.track_build(entity, handle.clone());
    }
    Ok(handle)
}

pub(super) fn spawn_configured_grids(mut commands: Commands, settings: Option<Res<NavigationSettings>>) {
    let Some(settings) = settings else { return };
    for config in &settings.grids {
        match GridComponent::new(config.clone()) {
            Ok(mut component) => {
                component.build_budget = settings.build_budget();
                component.cell_batch_size = settings.cell_batch_size.max(1);
                info!("Spawning configured grid '{}'", config.friendly_name);
                commands.spawn((component, Transform::from_translation(config.origin)));
            }
            Err(e) => error!("Skipping configured grid: {}", e),
        }
    }
}

pub(super) fn register_grid_components(
    added: Query<Entity, Added<GridComponent>>,
    mut registry: ResMut<GridRegistry>,
) {
    for entity in added.iter() {
        registry.register_grid_component(entity);
    }
}

pub(super) fn track_grid_origins(
    mut grids: Query<(&mut GridComponent, &Transform), Changed<Transform>>,
) {
    for (mut component, transform) in grids.iter_mut() {
        if component.origin().is_tracked() && component.follow_transform(transform.translation) {
            debug!("Grid '{}' origin moved to {:?}", component.config().friendly_name, component.origin().position());
        }
    }
}

pub(super) fn process_grid_controls(
    mut controls: MessageReader<GridControl>,
    mut grids: Query<&mut GridComponent>,
    mut registry: ResMut<GridRegistry>,
    mut scheduler: ResMut<FrameScheduler>,
    geometry: Res<SceneGeometry>,
    inbox: Res<BuildInbox>,
    mut status: MessageWriter<GridStatusMessage>,
) {
    for control in controls.read() {
        let Ok(mut component) = grids.get_mut(control.entity) else {
            warn!("Grid control {:?} for {:?}, which has no grid component", control.action, control.entity);
            continue;
        };
        match control.action {
            GridAction::Initialize => {
                if let Err(e) = start_build(control.entity, &mut component, &geometry, &mut scheduler, &inbox, &mut registry) {
                    warn!("{}", e);
                }
            }
            GridAction::Disable => {
                if let Some(grid_bounds) = component.disable(&mut registry) {
                    status.write(GridStatusMessage {
                        entity: control.entity,
                        grid_bounds,
                        status: GridStatus::DisableComplete,
                    });
                }
            }
            GridAction::Enable => component.enabled = true,
        }
    }
}

pub(super) fn start_automatic_builds(
    mut grids: Query<(Entity, &mut GridComponent)>,
    mut scheduler: ResMut<FrameScheduler>,
    mut registry: ResMut<GridRegistry>,
    geometry: Res<SceneGeometry>,
    inbox: Res<BuildInbox>,
) {
    for (entity, mut component) in grids.iter_mut() {
        if !component.enabled || !component.automatic_initialization || component.has_grid() || component.is_building() {
            continue;
        }
        if let Err(e) = start_build(entity, &mut component, &geometry, &mut scheduler, &inbox, &mut registry) {
            error!("Automatic build failed, disabling grid: {}", e);
            component.enabled = false;
        }
    }
}

pub(super) fn run_build_steps(mut scheduler: ResMut<FrameScheduler>) {
    if scheduler.is_idle() {
        return;
    }
    let completed = scheduler.run_frame();
    if completed > 0 {
        debug!("{} grid builds completed this frame, {} pending", completed, scheduler.pending());
    }
}

pub(super) fn apply_completed_builds(
    inbox: Res<BuildInbox>,
    mut grids: Query<&mut GridComponent>,
    mut registry: ResMut<GridRegistry>,
    mut status: MessageWriter<GridStatusMessage>,
) {
    for (entity, grid) in inbox.drain() {
        let Ok(mut component) = grids.get_mut(entity) else {
            debug!("Grid '{}' finished for a despawned component, discarding", grid.name());
            continue;
        };
        let grid_bounds = grid.bounds();
        if component.finish_build(entity, grid, &mut registry) {
            status.write(GridStatusMessage {
                entity,
                grid_bounds,
                status: GridStatus::InitializationComplete,
            });
        }
    }
}

pub(super) fn resolve_path_requests(
    mut requests: MessageReader<PathRequestMessage>,
    registry: Res<GridRegistry>,
    mut resolved: MessageWriter<PathResolvedMessage>,
) {
    for PathRequestMessage(request) in requests.read() {
        let mut request = request.clone();
        let result = request.resolve(&registry);
        if let Err(e) = &result {
            warn!("Path request from {:?} rejected: {}", request.requester, e);
        }
        resolved.write(PathResolvedMessage { request, result });
    }
}

pub(super) fn cleanup_removed_grids(
    mut removed: RemovedComponents<GridComponent>,
    mut registry: ResMut<GridRegistry>,
) {
    for entity in removed.read() {
        if let Some(grid) = registry.unregister_grid_component(entity) {
            info!("Grid '{}' dropped with its component", grid.name());
        }
    }
}
