//! Edge geometry: curved relationships, force-directed bundling, and the
//! Catmull–Rom splines the renderer draws.

use std::collections::HashMap;

use serde::Serialize;

use crate::graph::GraphEdge;
use crate::vector::Vec3;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BundleOptions {
    /// Interior points per edge.
    pub samples: usize,
    pub iterations: usize,
    pub radius: f64,
    pub strength: f64,
}

impl Default for BundleOptions {
    fn default() -> Self {
        Self {
            samples: 10,
            iterations: 40,
            radius: 40.0,
            strength: 0.3,
        }
    }
}

/// Quadratic Bézier from `source` to `target` bent through `control`.
#[derive(Clone, Debug, PartialEq)]
pub struct EdgeCurve {
    pub id: String,
    pub source: Vec3,
    pub target: Vec3,
    pub control: Vec3,
}

impl EdgeCurve {
    pub fn point_at(&self, t: f64) -> Vec3 {
        let u = 1.0 - t;
        self.source * (u * u) + self.control * (2.0 * u * t) + self.target * (t * t)
    }

    /// `samples` interior points plus both endpoints.
    pub fn sample(&self, samples: usize) -> Vec<Vec3> {
        let steps = samples + 1;
        (0..=steps)
            .map(|k| self.point_at(k as f64 / steps as f64))
            .collect()
    }
}

/// Render-ready polyline for one edge.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EdgeGeometry {
    pub id: String,
    pub points: Vec<Vec3>,
}

/// Any unit vector perpendicular to `dir`.
fn perpendicular(dir: Vec3) -> Vec3 {
    let up = if dir.y.abs() > 0.9 {
        Vec3::new(1.0, 0.0, 0.0)
    } else {
        Vec3::new(0.0, 1.0, 0.0)
    };
    dir.cross(up).normalize()
}

/// Control point for an edge: offset from the midpoint by
/// `length × (0.08 + 0.22 × strength)`, flipped by endpoint order and pushed
/// further out for each parallel edge before it.
pub fn control_point(source: Vec3, target: Vec3, strength: f64, flipped: bool, lane: usize) -> Vec3 {
    let chord = target - source;
    let length = chord.length();
    let mid = source.lerp(target, 0.5);
    if length == 0.0 {
        return mid;
    }
    let sign = if flipped { -1.0 } else { 1.0 };
    let offset = length * (0.08 + 0.22 * strength.clamp(0.0, 1.0)) * (1.0 + lane as f64 * 0.75);
    mid + perpendicular(chord / length) * (offset * sign)
}

/// Curves for every edge whose endpoints have positions, in edge order.
pub fn quadratic_curves(edges: &[GraphEdge], positions: &HashMap<String, Vec3>) -> Vec<EdgeCurve> {
    let mut lanes: HashMap<(&str, &str), usize> = HashMap::new();
    let mut curves = Vec::with_capacity(edges.len());
    for edge in edges {
        let (Some(&source), Some(&target)) = (positions.get(&edge.source), positions.get(&edge.target)) else {
            continue;
        };
        let flipped = edge.source > edge.target;
        let key = if flipped {
            (edge.target.as_str(), edge.source.as_str())
        } else {
            (edge.source.as_str(), edge.target.as_str())
        };
        let lane = lanes.entry(key).or_insert(0);
        curves.push(EdgeCurve {
            id: edge.id.clone(),
            source,
            target,
            control: control_point(source, target, edge.strength, flipped, *lane),
        });
        *lane += 1;
    }
    curves
}

/// One Jacobi step: every interior point moves toward the same-index points
/// of other edges within `radius`, read from the previous iteration.
fn bundle_step(paths: &[Vec<Vec3>], options: &BundleOptions) -> Vec<Vec<Vec3>> {
    let steps = options.samples + 1;
    let mut next = paths.to_vec();
    for (e, path) in paths.iter().enumerate() {
        for k in 1..steps {
            let here = path[k];
            let mut pull = Vec3::ZERO;
            let mut neighbours = 0usize;
            for (f, other) in paths.iter().enumerate() {
                if f == e {
                    continue;
                }
                let delta = other[k] - here;
                let distance = delta.length();
                if distance == 0.0 || distance > options.radius {
                    continue;
                }
                let falloff = (options.radius / distance).min(1.0);
                pull += delta * (options.strength * falloff);
                neighbours += 1;
            }
            if neighbours == 0 {
                continue;
            }
            let t = k as f64 / steps as f64;
            let stiffness = (2.0 * t - 1.0).powi(2);
            next[e][k] = here + pull / neighbours as f64 * (1.0 - stiffness);
        }
    }
    next
}

/// Bundled polylines (`samples + 2` points each, endpoints fixed) for the curves.
pub fn bundle_edges(curves: &[EdgeCurve], options: &BundleOptions) -> Vec<EdgeGeometry> {
    let mut paths: Vec<Vec<Vec3>> = curves.iter().map(|c| c.sample(options.samples)).collect();
    for _ in 0..options.iterations {
        paths = bundle_step(&paths, options);
    }
    curves
        .iter()
        .zip(paths)
        .map(|(curve, points)| EdgeGeometry {
            id: curve.id.clone(),
            points,
        })
        .collect()
}

/// Uniform Catmull–Rom spline through `points`, `segments` samples per span.
/// The first and last points are reused as phantom neighbours.
pub fn catmull_rom(points: &[Vec3], segments: usize) -> Vec<Vec3> {
    if points.len() < 3 || segments == 0 {
        return points.to_vec();
    }
    let n = points.len();
    let mut out = Vec::with_capacity((n - 1) * segments + 1);
    for i in 0..n - 1 {
        let p0 = points[i.saturating_sub(1)];
        let p1 = points[i];
        let p2 = points[i + 1];
        let p3 = points[(i + 2).min(n - 1)];
        for s in 0..segments {
            let t = s as f64 / segments as f64;
            let t2 = t * t;
            let t3 = t2 * t;
            let point = (p1 * 2.0
                + (p2 - p0) * t
                + (p0 * 2.0 - p1 * 5.0 + p2 * 4.0 - p3) * t2
                + (p1 * 3.0 - p0 - p2 * 3.0 + p3) * t3)
                * 0.5;
            out.push(point);
        }
    }
    out.push(points[n - 1]);
    out
}

/// Sampled quadratic curves, used while the layout is still moving.
pub fn curve_geometry(curves: &[EdgeCurve], samples: usize) -> Vec<EdgeGeometry> {
    curves
        .iter()
        .map(|c| EdgeGeometry {
            id: c.id.clone(),
            points: c.sample(samples).into_iter().map(|p| p.rounded(3)).collect(),
        })
        .collect()
}

/// Bundled curves smoothed through Catmull–Rom, for a settled layout.
pub fn bundled_geometry(curves: &[EdgeCurve], options: &BundleOptions, segments: usize) -> Vec<EdgeGeometry> {
    bundle_edges(curves, options)
        .into_iter()
        .map(|g| EdgeGeometry {
            id: g.id,
            points: catmull_rom(&g.points, segments)
                .into_iter()
                .map(|p| p.rounded(3))
                .collect(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn curve(id: &str, source: Vec3, target: Vec3) -> EdgeCurve {
        EdgeCurve {
            id: id.into(),
            source,
            target,
            control: source.lerp(target, 0.5),
        }
    }

    /// Two nearly parallel edges 10 units apart.
    fn pair() -> Vec<EdgeCurve> {
        vec![
            curve("a", Vec3::new(0.0, 0.0, 0.0), Vec3::new(100.0, 0.0, 0.0)),
            curve("b", Vec3::new(0.0, 10.0, 0.0), Vec3::new(100.0, 10.0, 0.0)),
        ]
    }

    #[test]
    fn test_control_offset_magnitude() {
        let s = Vec3::new(0.0, 0.0, 0.0);
        let t = Vec3::new(100.0, 0.0, 0.0);
        let c = control_point(s, t, 0.5, false, 0);
        assert_relative_eq!(c.distance(Vec3::new(50.0, 0.0, 0.0)), 100.0 * (0.08 + 0.11), epsilon = 1e-9);
        let flipped = control_point(s, t, 0.5, true, 0);
        assert!(((c + flipped) / 2.0).distance(Vec3::new(50.0, 0.0, 0.0)) < 1e-9);
        let lane1 = control_point(s, t, 0.5, false, 1);
        assert!(lane1.distance(s.lerp(t, 0.5)) > c.distance(s.lerp(t, 0.5)));
    }

    #[test]
    fn test_endpoints_fixed() {
        let curves = pair();
        let bundled = bundle_edges(&curves, &BundleOptions::default());
        for (curve, geometry) in curves.iter().zip(&bundled) {
            assert_eq!(geometry.points.len(), 12);
            assert_eq!(geometry.points[0], curve.source);
            assert_eq!(*geometry.points.last().unwrap(), curve.target);
        }
    }

    #[test]
    fn test_bundling_pulls_midpoints_together() {
        let curves = pair();
        let before = curves[0].point_at(0.5).distance(curves[1].point_at(0.5));
        let options = BundleOptions {
            samples: 9,
            ..BundleOptions::default()
        };
        let bundled = bundle_edges(&curves, &options);
        let after = bundled[0].points[5].distance(bundled[1].points[5]);
        assert!(after < before * 0.1, "before {before}, after {after}");
    }

    #[test]
    fn test_bundling_converges() {
        let curves = pair();
        let options = BundleOptions::default();
        let mut paths: Vec<Vec<Vec3>> = curves.iter().map(|c| c.sample(options.samples)).collect();
        let mut last_shift = f64::INFINITY;
        for _ in 0..options.iterations {
            let next = bundle_step(&paths, &options);
            let shift: f64 = paths
                .iter()
                .zip(&next)
                .flat_map(|(a, b)| a.iter().zip(b).map(|(p, q)| p.distance(*q)))
                .sum();
            assert!(shift <= last_shift + 1e-9);
            last_shift = shift;
            paths = next;
        }
        assert!(last_shift < 1e-2);
    }

    #[test]
    fn test_distant_edges_untouched() {
        let curves = vec![
            curve("a", Vec3::new(0.0, 0.0, 0.0), Vec3::new(100.0, 0.0, 0.0)),
            curve("b", Vec3::new(0.0, 500.0, 0.0), Vec3::new(100.0, 500.0, 0.0)),
        ];
        let bundled = bundle_edges(&curves, &BundleOptions::default());
        assert_eq!(bundled[0].points, curves[0].sample(10));
    }

    #[test]
    fn test_catmull_rom_passes_through_points() {
        let points = vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(10.0, 5.0, 0.0),
            Vec3::new(20.0, 0.0, 0.0),
        ];
        let spline = catmull_rom(&points, 4);
        assert_eq!(spline.len(), 9);
        assert!(spline[0].distance(points[0]) < 1e-12);
        assert!(spline[4].distance(points[1]) < 1e-12);
        assert!(spline[8].distance(points[2]) < 1e-12);
    }
}
