use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use validator::Validate;
use super::errors::{ConfigError, NavResult};
use super::cell_matrix::{split_axis, MAX_SUB_SECTIONS};

/// Build parameters for a single grid.
///
/// Range checks follow the inspector minimums of the authoring tools; values outside them
/// are rejected when a `GridBuilder` or `GridComponent` is created, never mid-build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct GridConfig {
    /// Identifier used in log messages and errors.
    pub friendly_name: String,
    /// Centre of the grid. Ignored when the owning component tracks a transform.
    pub origin: Vec3,
    #[validate(range(min = 1))]
    pub size_x: u32,
    #[validate(range(min = 1))]
    pub size_z: u32,
    #[validate(range(min = 0.1))]
    pub cell_size: f32,
    #[validate(range(min = 1))]
    pub sub_sections_x: u32,
    #[validate(range(min = 1))]
    pub sub_sections_z: u32,
    /// Cells shared between neighbouring sub-sections during partial rebuilds.
    pub sub_sections_cell_overlap: u32,
    pub generate_heightmap: bool,
    #[validate(range(min = 0.0))]
    pub lower_boundary: f32,
    #[validate(range(min = 0.0))]
    pub upper_boundary: f32,
    /// Horizontal spacing between height samples.
    #[validate(range(min = 0.05))]
    pub granularity: f32,
    /// Any obstacle within this range of a cell centre blocks the cell.
    #[validate(range(min = 0.0))]
    pub obstacle_sensitivity_range: f32,
    #[validate(range(min = 1.0, max = 90.0))]
    pub max_walkable_slope_angle: f32,
    /// Tallest vertical step a unit can walk onto (stairs, kerbs).
    #[validate(range(min = 0.0))]
    pub max_scale_height: f32,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            friendly_name: "Grid".to_string(),
            origin: Vec3::ZERO,
            size_x: 10,
            size_z: 10,
            cell_size: 2.0,
            sub_sections_x: 2,
            sub_sections_z: 2,
            sub_sections_cell_overlap: 2,
            generate_heightmap: true,
            lower_boundary: 1.0,
            upper_boundary: 10.0,
            granularity: 0.1,
            obstacle_sensitivity_range: 0.5,
            max_walkable_slope_angle: 30.0,
            max_scale_height: 0.5,
        }
    }
}

impl GridConfig {
    /// Check field ranges and the sub-section layout.
    pub fn check(&self) -> NavResult<()> {
        self.validate().map_err(|e| ConfigError::Invalid {
            grid: self.friendly_name.clone(),
            reason: e.to_string(),
        })?;

        if self.sub_sections_x > self.size_x || self.sub_sections_z > self.size_z {
            return Err(ConfigError::Invalid {
                grid: self.friendly_name.clone(),
                reason: format!(
                    "{}x{} sub-sections do not fit a {}x{} grid",
                    self.sub_sections_x, self.sub_sections_z, self.size_x, self.size_z
                ),
            }.into());
        }

        let sections = u64::from(self.sub_sections_x) * u64::from(self.sub_sections_z);
        if sections > MAX_SUB_SECTIONS as u64 {
            return Err(ConfigError::Invalid {
                grid: self.friendly_name.clone(),
                reason: format!("{} sub-sections (at most {})", sections, MAX_SUB_SECTIONS),
            }.into());
        }

        // The overlap must leave every sub-section with cells of its own, otherwise
        // neighbouring rebuild ranges swallow each other.
        let smallest = smallest_extent(self.size_x, self.sub_sections_x)
            .min(smallest_extent(self.size_z, self.sub_sections_z));
        if self.sub_sections_cell_overlap >= smallest {
            return Err(ConfigError::SubSectionOverlap {
                grid: self.friendly_name.clone(),
                overlap: self.sub_sections_cell_overlap,
                smallest,
            }.into());
        }

        Ok(())
    }

    pub fn validated(self) -> NavResult<Self> {
        self.check()?;
        Ok(self)
    }

    /// Height samples per cell along each axis.
    pub fn samples_per_cell(&self) -> usize {
        ((self.cell_size / self.granularity).ceil() as usize).max(1)
    }
}

fn smallest_extent(size: u32, parts: u32) -> u32 {
    split_axis(size as usize, parts as usize)
        .iter()
        .map(|(start, end)| (end - start) as u32)
        .min()
        .unwrap_or(0)
}

/// Startup settings for the navigation plugin. Loaded once from RON.
#[derive(Resource, Deserialize, Serialize, Clone, Debug)]
#[serde(default)]
pub struct NavigationSettings {
    /// Per-frame time budget for time-sliced builds, in milliseconds.
    pub build_budget_ms: u64,
    /// Cells scanned between two checks of the time budget.
    pub cell_batch_size: usize,
    /// Escape distance given to path requests created by the demo and tools.
    pub default_escape_cell_distance: u32,
    /// Grids spawned as components at startup.
    pub grids: Vec<GridConfig>,
}

impl Default for NavigationSettings {
    fn default() -> Self {
        Self {
            build_budget_ms: 5,
            cell_batch_size: 64,
            default_escape_cell_distance: 3,
            grids: Vec::new(),
        }
    }
}

impl NavigationSettings {
    pub fn build_budget(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.build_budget_ms)
    }
}

pub const NAVIGATION_SETTINGS_PATH: &str = "assets/navigation.ron";

/// Load navigation settings synchronously at startup, unless the app already has some.
pub(super) fn load_navigation_settings(mut commands: Commands, existing: Option<Res<NavigationSettings>>) {
    if existing.is_some() {
        return;
    }

    match std::fs::read_to_string(NAVIGATION_SETTINGS_PATH) {
        Ok(contents) => {
            match ron::from_str::<NavigationSettings>(&contents) {
                Ok(settings) => {
                    info!("Loaded navigation settings from {} ({} grids)", NAVIGATION_SETTINGS_PATH, settings.grids.len());
                    commands.insert_resource(settings);
                }
                Err(e) => {
                    error!("Failed to parse navigation settings: {}", e);
                    error!("Using default NavigationSettings");
                    commands.insert_resource(NavigationSettings::default());
                }
            }
        }
        Err(e) => {
            error!("Failed to read {}: {}", NAVIGATION_SETTINGS_PATH, e);
            error!("Using default NavigationSettings");
            commands.insert_resource(NavigationSettings::default());
        }
    }
}
