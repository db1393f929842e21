//! Pose smoothing for tracked tools.
//!
//! Live tracker poses jitter. When enabled through settings, each tool runs
//! its samples through an exponential smoothing filter on the translation
//! component; orientation passes through untouched. Toggling the settings
//! key rebuilds the filter on every tool, discarding accumulated state.

use crate::transform::Transform3D;

/// Exponential smoothing of tool positions.
#[derive(Debug, Clone)]
pub struct PositionFilter {
    alpha: f64,
    last: Option<(f64, f64, f64)>,
}

impl PositionFilter {
    /// Create a filter with the given smoothing factor in `(0, 1]`.
    ///
    /// `alpha` close to 1 follows the raw signal, close to 0 smooths hard.
    #[must_use]
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(f64::EPSILON, 1.0),
            last: None,
        }
    }

    /// Run one sample through the filter.
    #[must_use]
    pub fn apply(&mut self, transform: Transform3D) -> Transform3D {
        let (x, y, z) = transform.position();
        let (sx, sy, sz) = match self.last {
            Some((lx, ly, lz)) => (
                lx + self.alpha * (x - lx),
                ly + self.alpha * (y - ly),
                lz + self.alpha * (z - lz),
            ),
            None => (x, y, z),
        };
        self.last = Some((sx, sy, sz));

        let mut m = *transform.matrix();
        m[0][3] = sx;
        m[1][3] = sy;
        m[2][3] = sz;
        Transform3D::from_matrix(m)
    }
}

impl Default for PositionFilter {
    fn default() -> Self {
        Self::new(0.4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_passes_through() {
        let mut filter = PositionFilter::default();
        let out = filter.apply(Transform3D::translation(5.0, 6.0, 7.0));
        assert_eq!(out.position(), (5.0, 6.0, 7.0));
    }

    #[test]
    fn converges_toward_steady_input() {
        let mut filter = PositionFilter::new(0.5);
        filter.apply(Transform3D::translation(0.0, 0.0, 0.0));
        let mut x = 0.0;
        for _ in 0..20 {
            x = filter.apply(Transform3D::translation(10.0, 0.0, 0.0)).position().0;
        }
        assert!((x - 10.0).abs() < 1e-3);
    }
}
