//! Helical track extrapolation in a solenoidal field along z.

use nalgebra::{Vector2, Vector3};
use std::f64::consts::PI;

/// Curvature constant in GeV / (T · mm).
pub const CURVATURE_CONSTANT: f64 = 0.299792458e-3;

/// Trajectory of a charged particle through a uniform field `B ẑ`.
///
/// Degenerates to a straight line for zero field or zero transverse momentum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Helix {
    reference: Vector3<f64>,
    momentum: Vector3<f64>,
    shape: Shape,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Shape {
    Line {
        direction: Vector3<f64>,
    },
    Circle {
        centre: Vector2<f64>,
        radius: f64,
        /// Azimuth of the reference point seen from the centre
        phi0: f64,
        /// +1 clockwise, -1 counter-clockwise seen from +z
        sense: f64,
        /// dz per radian of turning
        dz_dphi: f64,
    },
}

impl Helix {
    pub fn new(reference: Vector3<f64>, momentum: Vector3<f64>, charge: f64, b_field: f64) -> Self {
        let pt = momentum.xy().norm();
        let qb = charge * b_field;
        let shape = if pt < 1e-12 || qb == 0.0 {
            Shape::Line {
                direction: momentum.try_normalize(1e-12).unwrap_or_else(Vector3::z),
            }
        } else {
            let radius = pt / (CURVATURE_CONSTANT * qb.abs());
            let sense = qb.signum();
            // Lorentz force on q>0 in +z field points along (py, -px).
            let to_centre = Vector2::new(momentum.y, -momentum.x) / pt * sense;
            let centre = reference.xy() + to_centre * radius;
            let rel = reference.xy() - centre;
            Shape::Circle {
                centre,
                radius,
                phi0: rel.y.atan2(rel.x),
                sense,
                dz_dphi: momentum.z / pt * radius,
            }
        };
        Self {
            reference,
            momentum,
            shape,
        }
    }

    pub fn reference_point(&self) -> &Vector3<f64> {
        &self.reference
    }

    pub fn momentum(&self) -> &Vector3<f64> {
        &self.momentum
    }

    /// Radius of curvature in mm; infinite for a straight line.
    pub fn radius(&self) -> f64 {
        match self.shape {
            Shape::Line { .. } => f64::INFINITY,
            Shape::Circle { radius, .. } => radius,
        }
    }

    /// Point reached after turning by `t` radians (or moving `t` mm on a line).
    pub fn point_at(&self, t: f64) -> Vector3<f64> {
        match self.shape {
            Shape::Line { direction } => self.reference + direction * t,
            Shape::Circle {
                centre,
                radius,
                phi0,
                sense,
                dz_dphi,
            } => {
                let phi = phi0 - sense * t;
                Vector3::new(
                    centre.x + radius * phi.cos(),
                    centre.y + radius * phi.sin(),
                    self.reference.z + dz_dphi * t,
                )
            }
        }
    }

    /// Approximate distance of closest approach of `point` to the trajectory.
    ///
    /// The azimuth is matched exactly; among the turns of the helix the one
    /// closest in z is taken.
    pub fn distance_to(&self, point: &Vector3<f64>) -> f64 {
        match self.shape {
            Shape::Line { direction } => (point - self.reference).cross(&direction).norm(),
            Shape::Circle {
                centre,
                phi0,
                sense,
                dz_dphi,
                ..
            } => {
                let rel = point.xy() - centre;
                let alpha = rel.y.atan2(rel.x);
                let base = wrap_angle(sense * (phi0 - alpha));

                let turn = if dz_dphi.abs() > 1e-12 {
                    (((point.z - self.reference.z) / dz_dphi - base) / (2.0 * PI)).round()
                } else {
                    0.0
                };

                [-1.0, 0.0, 1.0]
                    .iter()
                    .map(|k| self.point_at(base + (turn + k) * 2.0 * PI))
                    .map(|p| (point - p).norm())
                    .fold(f64::INFINITY, f64::min)
            }
        }
    }
}

/// Wraps an angle into (-π, π].
fn wrap_angle(mut angle: f64) -> f64 {
    while angle > PI {
        angle -= 2.0 * PI;
    }
    while angle <= -PI {
        angle += 2.0 * PI;
    }
    angle
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_straight_line_without_field() {
        let helix = Helix::new(Vector3::zeros(), Vector3::new(1.0, 0.0, 0.0), 1.0, 0.0);
        assert!(helix.radius().is_infinite());
        assert_relative_eq!(helix.distance_to(&Vector3::new(50.0, 3.0, 4.0)), 5.0, epsilon = 1e-9);
    }

    #[test]
    fn test_radius_from_transverse_momentum() {
        // 1 GeV in 4 T: R = 1 / (0.2998e-3 * 4) ≈ 833.9 mm
        let helix = Helix::new(Vector3::zeros(), Vector3::new(1.0, 0.0, 0.5), 1.0, 4.0);
        assert_relative_eq!(helix.radius(), 1.0 / (CURVATURE_CONSTANT * 4.0), epsilon = 1e-6);
    }

    #[test]
    fn test_reference_point_on_helix() {
        let helix = Helix::new(
            Vector3::new(1800.0, 10.0, -20.0),
            Vector3::new(2.0, 1.0, 0.3),
            -1.0,
            3.5,
        );
        assert_relative_eq!(helix.point_at(0.0), Vector3::new(1800.0, 10.0, -20.0), epsilon = 1e-6);
        assert_relative_eq!(helix.distance_to(&Vector3::new(1800.0, 10.0, -20.0)), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_points_along_helix_have_zero_distance() {
        let helix = Helix::new(Vector3::new(0.0, 0.0, 0.0), Vector3::new(0.5, 0.0, 0.2), 1.0, 4.0);
        for t in [0.1, 0.7, 2.0] {
            let p = helix.point_at(t);
            assert_relative_eq!(helix.distance_to(&p), 0.0, epsilon = 1e-6);
        }
        // Initial motion follows the momentum direction.
        let step = helix.point_at(1e-6) - helix.point_at(0.0);
        assert!(step.x > 0.0);
    }

    #[test]
    fn test_radial_offset_measured() {
        let helix = Helix::new(Vector3::zeros(), Vector3::new(1.0, 0.0, 0.0), 1.0, 4.0);
        // Centre sits at (0, -R); a point 10 mm outside the circle at the reference azimuth.
        let p = Vector3::new(0.0, 10.0, 0.0);
        assert_relative_eq!(helix.distance_to(&p), 10.0, epsilon = 1e-6);
    }
}
