mod baked;
mod builder;
mod cell_matrix;
mod component;
mod config;
mod errors;
mod geometry;
mod grid;
mod height_map;
mod math;
mod origin;
mod path_request;
mod registry;
mod scheduler;
mod systems;

#[cfg(test)]
mod tests;

// ============================================================================
// PUBLIC API
// ============================================================================

pub use baked::{load_baked_data, save_baked_data, BakedGridData, BAKED_DATA_VERSION};
pub use builder::{BuildMode, BuildTask, GridBuilder, DEFAULT_CELL_BATCH_SIZE};
pub use cell_matrix::{partition_sub_sections, Cell, CellEdge, CellMatrix, SubSection, SubSectionId, BLOCKED_COST, MAX_SUB_SECTIONS};
pub use component::{GridAction, GridComponent, GridControl, GridStatus, GridStatusMessage};
pub use config::{GridConfig, NavigationSettings, NAVIGATION_SETTINGS_PATH};
pub use errors::{ConfigError, Endpoint, NavError, NavResult};
pub use geometry::{Obstacle, SceneGeometry, StaticScene, Surface, SurfaceHit, WorldGeometry};
pub use grid::{Grid, GridId};
pub use height_map::{HeightMap, HeightMapRegistry};
pub use math::{compute_bounds, quantize, Bounds, FixedNum};
pub use origin::GridOrigin;
pub use path_request::{PathRequest, PathRequestMessage, PathRequestState, PathResolvedMessage, RequestType};
pub use registry::GridRegistry;
pub use scheduler::{BuildHandle, BuildJob, CompletionCallback, FrameScheduler, JobStatus, StepScheduler};
pub use systems::BuildInbox;

use bevy::prelude::*;

/// Grid baking, registration and path request resolution for a bevy app.
///
/// Settings come from `assets/navigation.ron` unless handed over with `with_settings` or
/// inserted as a resource before startup.
#[derive(Default)]
pub struct NavigationPlugin {
    settings: Option<NavigationSettings>,
}

impl NavigationPlugin {
    pub fn with_settings(settings: NavigationSettings) -> Self {
        Self { settings: Some(settings) }
    }
}

impl Plugin for NavigationPlugin {
    fn build(&self, app: &mut App) {
        if let Some(settings) = &self.settings {
            app.insert_resource(settings.clone());
        }
        app.add_message::<GridControl>();
        app.add_message::<GridStatusMessage>();
        app.add_message::<PathRequestMessage>();
        app.add_message::<PathResolvedMessage>();
        app.init_resource::<GridRegistry>();
        app.init_resource::<FrameScheduler>();
        app.init_resource::<BuildInbox>();
        app.init_resource::<SceneGeometry>();

        app.add_systems(Startup, (config::load_navigation_settings, systems::spawn_configured_grids).chain());
        app.add_systems(
            Update,
            (
                systems::cleanup_removed_grids,
                systems::register_grid_components,
                systems::track_grid_origins,
                systems::process_grid_controls,
                systems::start_automatic_builds,
                systems::run_build_steps,
                systems::apply_completed_builds,
                systems::resolve_path_requests,
            ).chain(),
        );
    }
}
