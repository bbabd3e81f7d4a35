//! Shared spatial and timing types for the AoI subsystem.

pub use farsight_wire::types::{EntityId, IdAlias, NO_ID_ALIAS};

/// Game tick counter. The low byte travels on the wire as the tick-sync.
pub type GameTime = u32;

/// Monotonic per-entity change counter.
pub type EventNumber = u32;

/// 3D position in world space.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn sub(&self, other: Vec3) -> Vec3 {
        Vec3::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }

    /// Squared distance in the horizontal plane. AoI membership ignores
    /// height.
    pub fn flat_dist_sq(&self, other: Vec3) -> f32 {
        let dx = self.x - other.x;
        let dz = self.z - other.z;
        dx * dx + dz * dz
    }

    pub fn flat_dist(&self, other: Vec3) -> f32 {
        self.flat_dist_sq(other).sqrt()
    }

    pub fn to_array(self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }

    pub fn from_array(a: [f32; 3]) -> Self {
        Self::new(a[0], a[1], a[2])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_distance_ignores_height() {
        let a = Vec3::new(0.0, 100.0, 0.0);
        let b = Vec3::new(3.0, -50.0, 4.0);
        assert_eq!(a.flat_dist(b), 5.0);
    }
}
