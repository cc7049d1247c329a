//! Rigid transforms in world coordinates.
//!
//! A [`Pose`] is stored column-major, the way tracking frameworks hand out
//! their 4x4 transforms: `columns[c][r]`, with column 3 holding the
//! translation.

use serde::{Deserialize, Serialize};

/// A 4x4 transform in world coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub columns: [[f64; 4]; 4],
}

impl Pose {
    /// The identity transform.
    pub fn identity() -> Self {
        Self {
            columns: [
                [1.0, 0.0, 0.0, 0.0],
                [0.0, 1.0, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
                [0.0, 0.0, 0.0, 1.0],
            ],
        }
    }

    /// Pure translation.
    pub fn from_translation(x: f64, y: f64, z: f64) -> Self {
        let mut pose = Self::identity();
        pose.columns[3] = [x, y, z, 1.0];
        pose
    }

    pub fn from_columns(columns: [[f64; 4]; 4]) -> Self {
        Self { columns }
    }

    /// World-space position (column 3).
    pub fn translation(&self) -> [f64; 3] {
        let [x, y, z, _] = self.columns[3];
        [x, y, z]
    }

    /// Returns this pose moved to a new position, keeping its rotation.
    pub fn with_translation(mut self, x: f64, y: f64, z: f64) -> Self {
        self.columns[3] = [x, y, z, 1.0];
        self
    }

    /// True when no element is NaN or infinite.
    pub fn is_finite(&self) -> bool {
        self.values().all(f64::is_finite)
    }

    /// Iterates the 16 elements in column order.
    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.columns.iter().flat_map(|column| column.iter().copied())
    }

    /// Bit-level equality, distinguishing `0.0` from `-0.0`.
    pub fn bitwise_eq(&self, other: &Pose) -> bool {
        self.values()
            .zip(other.values())
            .all(|(a, b)| a.to_bits() == b.to_bits())
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::identity()
    }
}
