//! Two-anchor position fix
//!
//! Intersects the two range circles. When noise pushes the circles apart the
//! fix keeps the previous estimate's perpendicular offset from the baseline,
//! so the track does not jump just because the ranges became inconsistent.

use nalgebra::Vector2;

use crate::core::{Point2, RangeConstraint};

/// Outcome of a two-anchor fix
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BilaterationOutcome {
    pub position: Point2,
    /// Whether the range circles had a real intersection
    pub intersecting: bool,
}

/// Baseline geometry shared by both branches
#[derive(Debug, Clone, Copy)]
struct Baseline {
    /// Point on the baseline closest to both intersections
    foot: Vector2<f64>,
    /// Unit normal, left of the first-to-second anchor direction
    normal: Vector2<f64>,
    /// Squared distance from `foot` to either intersection
    h_squared: f64,
}

fn baseline(first: &RangeConstraint, second: &RangeConstraint, epsilon: f64) -> Baseline {
    let p1 = first.position.to_vector();
    let delta = second.position.to_vector() - p1;
    let length = delta.norm();

    // Coincident anchors have no direction; use +x so the math stays finite
    let unit = if length > epsilon { delta / length } else { Vector2::x() };
    let length = length.max(epsilon);

    let r1 = first.range;
    let r2 = second.range;
    let along = (r1 * r1 - r2 * r2 + length * length) / (2.0 * length);

    Baseline {
        foot: p1 + unit * along,
        normal: Vector2::new(-unit.y, unit.x),
        h_squared: r1 * r1 - along * along,
    }
}

/// Both circle intersections, or `None` when the circles do not meet.
///
/// The first candidate is on the `+normal` side.
pub fn circle_candidates(
    first: &RangeConstraint,
    second: &RangeConstraint,
    epsilon: f64,
) -> Option<[Point2; 2]> {
    let geometry = baseline(first, second, epsilon);
    if geometry.h_squared <= 0.0 {
        return None;
    }
    let h = geometry.h_squared.sqrt();
    Some([
        Point2::from_vector(geometry.foot + geometry.normal * h),
        Point2::from_vector(geometry.foot - geometry.normal * h),
    ])
}

/// Two-anchor fix with warm-start disambiguation and continuity fallback.
///
/// * Intersecting circles: the candidate nearer `warm_start`, or the
///   `+normal` candidate when there is no warm start.
/// * Disjoint circles: the foot point shifted by the warm start's signed
///   perpendicular offset (optionally clamped to `max_carried_offset`), or
///   the foot point itself when there is no warm start.
pub fn bilaterate(
    first: &RangeConstraint,
    second: &RangeConstraint,
    warm_start: Option<Point2>,
    epsilon: f64,
    max_carried_offset: Option<f64>,
) -> BilaterationOutcome {
    let geometry = baseline(first, second, epsilon);

    if geometry.h_squared > 0.0 {
        let h = geometry.h_squared.sqrt();
        let plus = geometry.foot + geometry.normal * h;
        let minus = geometry.foot - geometry.normal * h;

        let chosen = match warm_start {
            Some(w) => {
                let w = w.to_vector();
                if (plus - w).norm_squared() <= (minus - w).norm_squared() {
                    plus
                } else {
                    minus
                }
            }
            None => plus,
        };

        return BilaterationOutcome {
            position: Point2::from_vector(chosen),
            intersecting: true,
        };
    }

    let position = match warm_start {
        Some(w) => {
            let mut offset = (w.to_vector() - geometry.foot).dot(&geometry.normal);
            if let Some(limit) = max_carried_offset {
                offset = offset.clamp(-limit, limit);
            }
            geometry.foot + geometry.normal * offset
        }
        None => geometry.foot,
    };

    BilaterationOutcome {
        position: Point2::from_vector(position),
        intersecting: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-6;

    fn exact(anchor: (f64, f64), target: Point2) -> RangeConstraint {
        let position = Point2::new(anchor.0, anchor.1);
        RangeConstraint {
            position,
            range: position.distance_to(&target),
        }
    }

    #[test]
    fn test_candidates_contain_true_point() {
        let target = Point2::new(1.2, -0.7);
        let a = exact((0.0, 0.0), target);
        let b = exact((3.0, 0.5), target);

        let candidates = circle_candidates(&a, &b, EPS).unwrap();
        let hit = candidates.iter().any(|c| c.distance_to(&target) < 1e-9);
        assert!(hit, "candidates {:?} miss {:?}", candidates, target);

        // Every candidate lies on both circles
        for c in candidates {
            assert!((c.distance_to(&a.position) - a.range).abs() < 1e-9);
            assert!((c.distance_to(&b.position) - b.range).abs() < 1e-9);
        }
    }

    #[test]
    fn test_warm_start_picks_true_point() {
        for target in [Point2::new(1.0, 1.5), Point2::new(1.0, -1.5), Point2::new(2.5, 0.3)] {
            let a = exact((0.0, 0.0), target);
            let b = exact((3.0, 0.0), target);
            let outcome = bilaterate(&a, &b, Some(target), EPS, None);
            assert!(outcome.intersecting);
            assert!(outcome.position.distance_to(&target) < 1e-9);
        }
    }

    #[test]
    fn test_no_warm_start_is_deterministic_left_side() {
        let target = Point2::new(1.0, -1.5);
        let a = exact((0.0, 0.0), target);
        let b = exact((3.0, 0.0), target);

        let first = bilaterate(&a, &b, None, EPS, None);
        let second = bilaterate(&a, &b, None, EPS, None);
        assert_eq!(first, second);
        // Baseline runs along +x, so the left side is +y
        assert!((first.position.x - 1.0).abs() < 1e-9);
        assert!((first.position.y - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_disjoint_circles_keep_offset() {
        // Ranges sum to less than the 4 m baseline
        let a = RangeConstraint::new(0.0, 0.0, 1.4);
        let b = RangeConstraint::new(4.0, 0.0, 2.5);
        assert!(circle_candidates(&a, &b, EPS).is_none());

        let outcome = bilaterate(&a, &b, Some(Point2::new(7.0, 0.4)), EPS, None);
        assert!(!outcome.intersecting);
        let along = (1.4f64.powi(2) - 2.5f64.powi(2) + 16.0) / 8.0;
        assert!((outcome.position.x - along).abs() < 1e-12);
        assert!((outcome.position.y - 0.4).abs() < 1e-12);

        let fallback = bilaterate(&a, &b, None, EPS, None);
        assert!((fallback.position.x - along).abs() < 1e-12);
        assert_eq!(fallback.position.y, 0.0);
    }

    #[test]
    fn test_carried_offset_clamp() {
        let a = RangeConstraint::new(0.0, 0.0, 1.0);
        let b = RangeConstraint::new(4.0, 0.0, 1.0);
        let outcome = bilaterate(&a, &b, Some(Point2::new(2.0, -9.0)), EPS, Some(0.5));
        assert!((outcome.position.y + 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_continuous_across_intersection_boundary() {
        let b = RangeConstraint::new(4.0, 0.0, 2.5);
        let mut warm: Option<Point2> = None;
        let mut previous: Option<BilaterationOutcome> = None;
        let mut crossed = false;

        // Shrink the first range from 2.0 m to 1.2 m; circles separate near 1.5 m
        for step in 0..=80 {
            let a = RangeConstraint::new(0.0, 0.0, 2.0 - 0.01 * step as f64);
            let outcome = bilaterate(&a, &b, warm, EPS, None);

            if let Some(prev) = previous {
                let jump = outcome.position.distance_to(&prev.position);
                assert!(jump < 0.1, "jump of {} at step {}", jump, step);
                if prev.intersecting && !outcome.intersecting {
                    crossed = true;
                    assert!(jump < 0.01, "jump of {} at the boundary", jump);
                }
                if !prev.intersecting {
                    // Offset carried unchanged once the circles are disjoint
                    assert!((outcome.position.y - prev.position.y).abs() < 1e-12);
                }
            }

            warm = Some(outcome.position);
            previous = Some(outcome);
        }
        assert!(crossed);
    }

    #[test]
    fn test_coincident_anchors_stay_finite() {
        let a = RangeConstraint::new(1.0, 1.0, 2.0);
        let b = RangeConstraint::new(1.0, 1.0, 2.0);
        let outcome = bilaterate(&a, &b, Some(Point2::new(0.0, 0.0)), EPS, None);
        assert!(outcome.position.is_finite());
    }
}
