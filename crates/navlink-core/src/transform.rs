//! Rigid transforms and timestamps.
//!
//! Tool poses are 4x4 homogeneous matrices. Timestamps are milliseconds
//! since the Unix epoch, which keeps position-history records directly
//! comparable across save/load cycles.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Milliseconds since the Unix epoch.
pub type TimestampMs = i64;

/// Current time as milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> TimestampMs {
    Utc::now().timestamp_millis()
}

/// A 4x4 homogeneous transform (row-major).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform3D {
    m: [[f64; 4]; 4],
}

impl Transform3D {
    /// The identity transform.
    #[must_use]
    pub const fn identity() -> Self {
        Self {
            m: [
                [1.0, 0.0, 0.0, 0.0],
                [0.0, 1.0, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
                [0.0, 0.0, 0.0, 1.0],
            ],
        }
    }

    /// A pure translation.
    #[must_use]
    pub const fn translation(x: f64, y: f64, z: f64) -> Self {
        let mut t = Self::identity();
        t.m[0][3] = x;
        t.m[1][3] = y;
        t.m[2][3] = z;
        t
    }

    /// Construct from a row-major matrix.
    #[must_use]
    pub const fn from_matrix(m: [[f64; 4]; 4]) -> Self {
        Self { m }
    }

    /// The row-major matrix.
    #[must_use]
    pub const fn matrix(&self) -> &[[f64; 4]; 4] {
        &self.m
    }

    /// The translation component (x, y, z).
    #[must_use]
    pub const fn position(&self) -> (f64, f64, f64) {
        (self.m[0][3], self.m[1][3], self.m[2][3])
    }

    /// Element-wise comparison within `epsilon`.
    #[must_use]
    pub fn approx_eq(&self, other: &Self, epsilon: f64) -> bool {
        self.m
            .iter()
            .flatten()
            .zip(other.m.iter().flatten())
            .all(|(a, b)| (a - b).abs() <= epsilon)
    }
}

impl Default for Transform3D {
    fn default() -> Self {
        Self::identity()
    }
}
