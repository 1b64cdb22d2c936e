use bevy::prelude::*;
use fixed::types::I48F16;
use serde::{Deserialize, Serialize};

/// Fixed-point number used for baked height samples.
///
/// Heights are quantised to I48F16 when baked so that a baked blob reads back
/// identically on every platform, whatever float rounding the scan produced.
pub type FixedNum = I48F16;

/// Axis-aligned box in world space, stored as centre + full size.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub center: Vec3,
    pub size: Vec3,
}

impl Bounds {
    pub fn new(center: Vec3, size: Vec3) -> Self {
        Self { center, size }
    }

    pub fn from_min_max(min: Vec3, max: Vec3) -> Self {
        Self {
            center: (min + max) * 0.5,
            size: max - min,
        }
    }

    pub fn extents(&self) -> Vec3 {
        self.size * 0.5
    }

    pub fn min(&self) -> Vec3 {
        self.center - self.extents()
    }

    pub fn max(&self) -> Vec3 {
        self.center + self.extents()
    }

    /// Inclusive containment test on all three axes.
    pub fn contains(&self, point: Vec3) -> bool {
        let min = self.min();
        let max = self.max();
        point.x >= min.x && point.x <= max.x &&
        point.y >= min.y && point.y <= max.y &&
        point.z >= min.z && point.z <= max.z
    }

    pub fn contains_xz(&self, point: Vec3) -> bool {
        let min = self.min();
        let max = self.max();
        point.x >= min.x && point.x <= max.x &&
        point.z >= min.z && point.z <= max.z
    }

    /// Grow (or shrink, for negative amounts) the size by `amount` on every axis.
    /// Each face moves by half of `amount`. The size never goes negative.
    pub fn expand(&self, amount: f32) -> Self {
        Self {
            center: self.center,
            size: (self.size + Vec3::splat(amount)).max(Vec3::ZERO),
        }
    }

    pub fn intersects_xz(&self, other: &Bounds) -> bool {
        let (a_min, a_max) = (self.min(), self.max());
        let (b_min, b_max) = (other.min(), other.max());
        a_min.x <= b_max.x && a_max.x >= b_min.x &&
        a_min.z <= b_max.z && a_max.z >= b_min.z
    }

    /// Clamp a point into the box on all axes.
    pub fn clamp(&self, point: Vec3) -> Vec3 {
        point.clamp(self.min(), self.max())
    }

    /// Squared horizontal distance from a point to the box (zero inside).
    pub fn distance_squared_xz(&self, point: Vec3) -> f32 {
        let min = self.min();
        let max = self.max();
        let dx = (min.x - point.x).max(0.0).max(point.x - max.x);
        let dz = (min.z - point.z).max(0.0).max(point.z - max.z);
        dx * dx + dz * dz
    }
}

/// Compute the volume a grid occupies.
///
/// The box spans `size_x * cell_size` by `size_z * cell_size` horizontally, centred on the
/// origin, and reaches `lower_boundary` below and `upper_boundary` above the origin.
pub fn compute_bounds(
    origin: Vec3,
    size_x: u32,
    size_z: u32,
    cell_size: f32,
    lower_boundary: f32,
    upper_boundary: f32,
) -> Bounds {
    let y_offset = (upper_boundary - lower_boundary) * 0.5;
    let center = Vec3::new(origin.x, origin.y + y_offset, origin.z);
    let size = Vec3::new(
        size_x as f32 * cell_size,
        upper_boundary + lower_boundary,
        size_z as f32 * cell_size,
    );
    Bounds::new(center, size)
}

pub fn quantize(value: f32) -> FixedNum {
    FixedNum::from_num(value)
}
