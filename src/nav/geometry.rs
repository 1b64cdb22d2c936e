use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Result of a downward raycast against walkable surfaces.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceHit {
    pub height: f32,
    pub normal: Vec3,
}

impl SurfaceHit {
    /// Angle between the surface normal and world up, in degrees.
    pub fn slope_angle(&self) -> f32 {
        self.normal.normalize_or_zero().y.clamp(-1.0, 1.0).acos().to_degrees()
    }
}

/// The world colliders a grid bake samples.
///
/// Implementations must be pure for a given scene: the same query always returns the same
/// answer. Bake determinism depends on it.
pub trait WorldGeometry: Send + Sync {
    /// Cast straight down at (x, z) from `top` to `bottom`; return the first surface hit.
    fn raycast_down(&self, x: f32, z: f32, top: f32, bottom: f32) -> Option<SurfaceHit>;

    /// Whether an obstacle overlaps the vertical cylinder of `radius` around (x, z)
    /// between `min_y` and `max_y`.
    fn overlaps_obstacle(&self, x: f32, z: f32, radius: f32, min_y: f32, max_y: f32) -> bool;
}

/// Rectangular walkable surface, optionally inclined.
///
/// Height at (x, z) is `height + gradient.x * (x - min.x) + gradient.y * (z - min.y)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Surface {
    pub min: Vec2,
    pub max: Vec2,
    pub height: f32,
    pub gradient: Vec2,
}

impl Surface {
    pub fn flat(min: Vec2, max: Vec2, height: f32) -> Self {
        Self { min, max, height, gradient: Vec2::ZERO }
    }

    /// A ramp rising along +x at `angle_degrees`.
    pub fn ramp_x(min: Vec2, max: Vec2, height: f32, angle_degrees: f32) -> Self {
        let rise = angle_degrees.to_radians().tan();
        Self { min, max, height, gradient: Vec2::new(rise, 0.0) }
    }

    fn covers(&self, x: f32, z: f32) -> bool {
        x >= self.min.x && x <= self.max.x && z >= self.min.y && z <= self.max.y
    }

    fn height_at(&self, x: f32, z: f32) -> f32 {
        self.height + self.gradient.x * (x - self.min.x) + self.gradient.y * (z - self.min.y)
    }

    fn normal(&self) -> Vec3 {
        Vec3::new(-self.gradient.x, 1.0, -self.gradient.y).normalize()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Obstacle {
    Cylinder { center: Vec2, radius: f32, base: f32, top: f32 },
    Box { min: Vec3, max: Vec3 },
}

impl Obstacle {
    fn overlaps(&self, x: f32, z: f32, radius: f32, min_y: f32, max_y: f32) -> bool {
        match *self {
            Obstacle::Cylinder { center, radius: r, base, top } => {
                if top <= min_y || base >= max_y {
                    return false;
                }
                let reach = r + radius;
                center.distance_squared(Vec2::new(x, z)) <= reach * reach
            }
            Obstacle::Box { min, max } => {
                if max.y <= min_y || min.y >= max_y {
                    return false;
                }
                let dx = (min.x - x).max(0.0).max(x - max.x);
                let dz = (min.z - z).max(0.0).max(z - max.z);
                dx * dx + dz * dz <= radius * radius
            }
        }
    }
}

/// In-memory scene of surfaces and obstacles.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StaticScene {
    pub surfaces: Vec<Surface>,
    pub obstacles: Vec<Obstacle>,
}

impl StaticScene {
    /// A single flat floor spanning `[-half_extent, half_extent]` on both axes.
    pub fn flat(half_extent: f32, height: f32) -> Self {
        Self {
            surfaces: vec![Surface::flat(Vec2::splat(-half_extent), Vec2::splat(half_extent), height)],
            obstacles: Vec::new(),
        }
    }

    pub fn with_surface(mut self, surface: Surface) -> Self {
        self.surfaces.push(surface);
        self
    }

    pub fn with_obstacle(mut self, obstacle: Obstacle) -> Self {
        self.obstacles.push(obstacle);
        self
    }
}

impl WorldGeometry for StaticScene {
    fn raycast_down(&self, x: f32, z: f32, top: f32, bottom: f32) -> Option<SurfaceHit> {
        let mut best: Option<SurfaceHit> = None;
        for surface in self.surfaces.iter().filter(|s| s.covers(x, z)) {
            let height = surface.height_at(x, z);
            if height > top || height < bottom {
                continue;
            }
            if best.map_or(true, |hit| height > hit.height) {
                best = Some(SurfaceHit { height, normal: surface.normal() });
            }
        }
        best
    }

    fn overlaps_obstacle(&self, x: f32, z: f32, radius: f32, min_y: f32, max_y: f32) -> bool {
        if max_y <= min_y {
            return false;
        }
        self.obstacles.iter().any(|o| o.overlaps(x, z, radius, min_y, max_y))
    }
}

/// The geometry builds started by the navigation plugin scan against.
#[derive(Resource, Clone)]
pub struct SceneGeometry(pub Arc<dyn WorldGeometry>);

impl Default for SceneGeometry {
    fn default() -> Self {
        SceneGeometry(Arc::new(StaticScene::default()))
    }
}

impl SceneGeometry {
    pub fn new(geometry: impl WorldGeometry + 'static) -> Self {
        SceneGeometry(Arc::new(geometry))
    }
}
