//! Funnel (string pulling) path smoothing
//!
//! The node path from A* is turned into a list of portals, the shared edges
//! the path crosses. The funnel algorithm then finds the shortest polyline
//! through them. Portals can optionally be unwrapped into a plane first,
//! which keeps the result correct on sloped or twisted strips of nodes.

use glam::{Vec2, Vec3};

use crate::graph_node::NodeIndex;
use crate::nav_data::NavData;
use crate::path_handler::ScratchPools;

/// Squared distance below which two funnel points are considered equal
const EQUAL_EPSILON_SQ: f32 = 0.001 * 0.001;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct FunnelOptions {
    /// Flatten the portals by rotating around each portal edge instead of
    /// projecting them onto the XZ plane
    pub unwrap: bool,
    /// Add a point where the path crosses every portal
    pub split_at_every_portal: bool,
}

impl Default for FunnelOptions {
    fn default() -> Self {
        Self {
            unwrap: true,
            split_at_every_portal: false,
        }
    }
}

/// Run of the node path that is either smoothed or followed directly
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathPart {
    pub start_index: usize,
    pub end_index: usize,
    pub start_point: Vec3,
    pub end_point: Vec3,
    /// The part crosses a connection without a shared edge
    pub is_link: bool,
}

/// Portals of one part, left and right as seen when walking the path
#[derive(Debug, Clone, Default)]
pub struct FunnelPortals {
    pub left: Vec<Vec3>,
    pub right: Vec<Vec3>,
    left2: Vec<Vec2>,
    right2: Vec<Vec2>,
}

impl FunnelPortals {
    pub fn clear(&mut self) {
        self.left.clear();
        self.right.clear();
        self.left2.clear();
        self.right2.clear();
    }

    pub fn len(&self) -> usize {
        self.left.len()
    }

    pub fn is_empty(&self) -> bool {
        self.left.is_empty()
    }
}

/// Splits the node path wherever two consecutive nodes do not share an edge
pub fn split_into_parts(data: &NavData, path: &[NodeIndex], start: Vec3, end: Vec3) -> Vec<PathPart> {
    let mut parts = Vec::new();
    if path.is_empty() {
        return parts;
    }

    let position = |n: NodeIndex| data.nodes()[n].position.to_vec3();
    let mut part_start = 0;
    let mut part_start_point = start;
    for i in 0..path.len() - 1 {
        if data.portal(path[i], path[i + 1]).is_some() {
            continue;
        }
        let a = position(path[i]);
        let b = position(path[i + 1]);
        parts.push(PathPart {
            start_index: part_start,
            end_index: i,
            start_point: part_start_point,
            end_point: a,
            is_link: false,
        });
        parts.push(PathPart {
            start_index: i,
            end_index: i + 1,
            start_point: a,
            end_point: b,
            is_link: true,
        });
        part_start = i + 1;
        part_start_point = b;
    }
    parts.push(PathPart {
        start_index: part_start,
        end_index: path.len() - 1,
        start_point: part_start_point,
        end_point: end,
        is_link: false,
    });
    parts
}

/// Fills `portals` with the start point, the shared edges of the part and
/// the end point. Exact repeats of the previous portal are skipped.
pub fn construct_portals(data: &NavData, path: &[NodeIndex], part: &PathPart, portals: &mut FunnelPortals) {
    portals.clear();
    portals.left.push(part.start_point);
    portals.right.push(part.start_point);
    for i in part.start_index..part.end_index {
        let Some((left, right)) = data.portal(path[i], path[i + 1]) else {
            continue;
        };
        if portals.left.last() == Some(&left) && portals.right.last() == Some(&right) {
            continue;
        }
        portals.left.push(left);
        portals.right.push(right);
    }
    portals.left.push(part.end_point);
    portals.right.push(part.end_point);
}

/// Side of `p` relative to the ray `a -> b`; positive is left
#[inline]
fn side(a: Vec2, b: Vec2, p: Vec2) -> f32 {
    (b.x - a.x) * (p.y - a.y) - (p.x - a.x) * (b.y - a.y)
}

#[inline]
fn xz(v: Vec3) -> Vec2 {
    Vec2::new(v.x, v.z)
}

/// Places `p` in the plane relative to the already unwrapped portal edge
/// `l3 -> r3`, either in front of it or behind it
fn unwrap_point(l3: Vec3, r3: Vec3, l2: Vec2, r2: Vec2, p: Vec3, forward: bool) -> Vec2 {
    let edge2 = r2 - l2;
    let normal = Vec2::new(-edge2.y, edge2.x).normalize_or_zero();
    let normal = if normal == Vec2::ZERO { Vec2::Y } else { normal };
    let sign = if forward { 1.0 } else { -1.0 };

    let edge = r3 - l3;
    let len_sq = edge.length_squared();
    if len_sq < 1e-12 {
        return l2 + normal * (p - l3).length() * sign;
    }
    let t = (p - l3).dot(edge) / len_sq;
    let distance = (p - (l3 + edge * t)).length();
    l2 + edge2 * t + normal * distance * sign
}

fn unwrapped_or_placed(prev_l3: Vec3, prev_r3: Vec3, prev_l2: Vec2, prev_r2: Vec2, p: Vec3) -> Vec2 {
    if p.distance_squared(prev_l3) < 1e-8 {
        prev_l2
    } else if p.distance_squared(prev_r3) < 1e-8 {
        prev_r2
    } else {
        unwrap_point(prev_l3, prev_r3, prev_l2, prev_r2, p, true)
    }
}

fn flatten(portals: &mut FunnelPortals, unwrap: bool) {
    let n = portals.left.len();
    portals.left2.clear();
    portals.right2.clear();
    if !unwrap || n <= 2 {
        portals.left2.extend(portals.left.iter().map(|&v| xz(v)));
        portals.right2.extend(portals.right.iter().map(|&v| xz(v)));
        return;
    }

    portals.left2.resize(n, Vec2::ZERO);
    portals.right2.resize(n, Vec2::ZERO);

    // The first shared edge keeps its XZ position and true length
    let (l1, r1) = (portals.left[1], portals.right[1]);
    let dir = xz(r1 - l1).normalize_or_zero();
    let dir = if dir == Vec2::ZERO { Vec2::X } else { dir };
    portals.left2[1] = xz(l1);
    portals.right2[1] = xz(l1) + dir * (r1 - l1).length();

    let start = unwrap_point(l1, r1, portals.left2[1], portals.right2[1], portals.left[0], false);
    portals.left2[0] = start;
    portals.right2[0] = start;

    for i in 2..n {
        let (pl3, pr3) = (portals.left[i - 1], portals.right[i - 1]);
        let (pl2, pr2) = (portals.left2[i - 1], portals.right2[i - 1]);
        portals.left2[i] = unwrapped_or_placed(pl3, pr3, pl2, pr2, portals.left[i]);
        portals.right2[i] = unwrapped_or_placed(pl3, pr3, pl2, pr2, portals.right[i]);
    }
}

/// Factor along `l -> r` where the segment `a -> b` crosses it
fn portal_crossing(a: Vec2, b: Vec2, l: Vec2, r: Vec2) -> Option<f32> {
    let d1 = b - a;
    let d2 = r - l;
    let denom = d1.perp_dot(d2);
    if denom.abs() < 1e-12 {
        return None;
    }
    Some(((l - a).perp_dot(d1) / denom).clamp(0.0, 1.0))
}

fn push_point(out: &mut Vec<Vec3>, p: Vec3) {
    if out.last().map_or(true, |&last| last.distance_squared(p) > EQUAL_EPSILON_SQ) {
        out.push(p);
    }
}

/// Runs the funnel over `portals` and appends the corners to `out`.
///
/// Returns false if the funnel could not be evaluated and a straight line
/// between the first and last portal was used instead.
pub fn calculate(portals: &mut FunnelPortals, options: FunnelOptions, out: &mut Vec<Vec3>) -> bool {
    let n = portals.len();
    if n == 0 {
        return true;
    }
    let start = portals.left[0];
    let end = portals.left[n - 1];
    if n <= 2 {
        push_point(out, start);
        push_point(out, end);
        return true;
    }

    flatten(portals, options.unwrap);
    let (l2, r2) = (&portals.left2, &portals.right2);
    if l2.iter().chain(r2.iter()).any(|p| !p.is_finite()) {
        log::warn!("Funnel portals contain invalid coordinates, using a straight line");
        push_point(out, start);
        push_point(out, end);
        return false;
    }

    let equal = |a: Vec2, b: Vec2| a.distance_squared(b) < EQUAL_EPSILON_SQ;

    // Corners as (portal index, on left side)
    let mut corners: Vec<(usize, bool)> = vec![(0, true)];
    let mut apex = l2[0];
    let mut portal_left = l2[0];
    let mut portal_right = r2[0];
    let mut left_index = 0;
    let mut right_index = 0;

    let max_iterations = n * n + 16;
    let mut iterations = 0;
    let mut i = 1;
    while i < n {
        iterations += 1;
        if iterations > max_iterations {
            log::error!("Funnel did not converge after {max_iterations} iterations, using a straight line");
            push_point(out, start);
            push_point(out, end);
            return false;
        }

        let left = l2[i];
        let right = r2[i];

        if side(apex, portal_right, right) >= 0.0 {
            if equal(apex, portal_right) || side(apex, portal_left, right) < 0.0 {
                portal_right = right;
                right_index = i;
            } else {
                corners.push((left_index, true));
                apex = portal_left;
                let apex_index = left_index;
                portal_left = apex;
                portal_right = apex;
                left_index = apex_index;
                right_index = apex_index;
                i = apex_index + 1;
                continue;
            }
        }

        if side(apex, portal_left, left) <= 0.0 {
            if equal(apex, portal_left) || side(apex, portal_right, left) > 0.0 {
                portal_left = left;
                left_index = i;
            } else {
                corners.push((right_index, false));
                apex = portal_right;
                let apex_index = right_index;
                portal_left = apex;
                portal_right = apex;
                left_index = apex_index;
                right_index = apex_index;
                i = apex_index + 1;
                continue;
            }
        }

        i += 1;
    }
    corners.push((n - 1, true));

    let point2 = |(index, is_left): (usize, bool)| if is_left { l2[index] } else { r2[index] };
    let point3 = |(index, is_left): (usize, bool)| {
        if is_left {
            portals.left[index]
        } else {
            portals.right[index]
        }
    };

    push_point(out, point3(corners[0]));
    for pair in corners.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if options.split_at_every_portal {
            let (a2, b2) = (point2(a), point2(b));
            for k in a.0 + 1..b.0 {
                if let Some(t) = portal_crossing(a2, b2, l2[k], r2[k]) {
                    push_point(out, portals.left[k].lerp(portals.right[k], t));
                }
            }
        }
        push_point(out, point3(b));
    }
    true
}

/// Smooths a node path from `start` to `end` into `out`
pub fn smooth_path(
    data: &NavData,
    path: &[NodeIndex],
    start: Vec3,
    end: Vec3,
    options: FunnelOptions,
    scratch: &ScratchPools,
    out: &mut Vec<Vec3>,
) {
    out.clear();
    if path.is_empty() {
        return;
    }

    let mut portals = scratch.portals.claim();
    for part in split_into_parts(data, path, start, end) {
        if part.is_link {
            push_point(out, part.start_point);
            push_point(out, part.end_point);
            continue;
        }
        construct_portals(data, path, &part, &mut portals);
        calculate(&mut portals, options, out);
    }
    scratch.portals.release(portals);

    // A path that starts and ends at the same point keeps both ends
    if out.len() == 1 {
        out.push(end);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn portals(points: &[(Vec3, Vec3)]) -> FunnelPortals {
        let mut p = FunnelPortals::default();
        for &(l, r) in points {
            p.left.push(l);
            p.right.push(r);
        }
        p
    }

    fn v(x: f32, z: f32) -> Vec3 {
        Vec3::new(x, 0.0, z)
    }

    #[test]
    fn test_straight_corridor_has_no_corners() {
        let start = v(0.0, 0.0);
        let end = v(10.0, 0.0);
        // Walking along +x, left is +z
        let mut p = portals(&[(start, start), (v(3.0, 1.0), v(3.0, -1.0)), (v(6.0, 1.0), v(6.0, -1.0)), (end, end)]);
        let mut out = Vec::new();
        assert!(calculate(&mut p, FunnelOptions::default(), &mut out));
        assert_eq!(out, vec![start, end]);
    }

    #[test]
    fn test_corner_around_obstacle() {
        let start = v(0.0, 0.0);
        let end = v(10.0, 10.0);
        // The second portal only allows passing right of (5, 2), forcing a corner there
        let mut p = portals(&[
            (start, start),
            (v(5.0, 2.0), v(5.0, -4.0)),
            (v(8.0, 10.0), v(12.0, 10.0)),
            (end, end),
        ]);
        let mut out = Vec::new();
        assert!(calculate(&mut p, FunnelOptions::default(), &mut out));
        assert_eq!(out.len(), 3);
        assert_eq!(out[1], v(5.0, 2.0));
    }

    #[test]
    fn test_split_at_every_portal() {
        let start = v(0.0, 0.0);
        let end = v(10.0, 0.0);
        let mut p = portals(&[(start, start), (v(3.0, 1.0), v(3.0, -1.0)), (v(6.0, 1.0), v(6.0, -1.0)), (end, end)]);
        let mut out = Vec::new();
        let options = FunnelOptions {
            unwrap: false,
            split_at_every_portal: true,
        };
        calculate(&mut p, options, &mut out);
        assert_eq!(out.len(), 4);
        assert!(out[1].distance(v(3.0, 0.0)) < 1e-4);
        assert!(out[2].distance(v(6.0, 0.0)) < 1e-4);
    }

    #[test]
    fn test_unwrap_matches_projection_on_flat_portals() {
        let start = v(0.0, 0.0);
        let end = v(10.0, 10.0);
        let points = [
            (start, start),
            (v(5.0, 2.0), v(5.0, -4.0)),
            (v(8.0, 10.0), v(12.0, 10.0)),
            (end, end),
        ];
        let mut unwrapped = Vec::new();
        let mut projected = Vec::new();
        calculate(&mut portals(&points), FunnelOptions::default(), &mut unwrapped);
        calculate(
            &mut portals(&points),
            FunnelOptions {
                unwrap: false,
                split_at_every_portal: false,
            },
            &mut projected,
        );
        assert_eq!(unwrapped, projected);
    }

    #[test]
    fn test_unwrap_handles_slopes() {
        // A ramp rising along +x; the straight line stays straight after unwrapping
        let start = Vec3::new(0.0, 0.0, 0.0);
        let end = Vec3::new(10.0, 5.0, 0.0);
        let mut p = portals(&[
            (start, start),
            (Vec3::new(4.0, 2.0, 1.0), Vec3::new(4.0, 2.0, -1.0)),
            (Vec3::new(7.0, 3.5, 1.0), Vec3::new(7.0, 3.5, -1.0)),
            (end, end),
        ]);
        let mut out = Vec::new();
        assert!(calculate(&mut p, FunnelOptions::default(), &mut out));
        assert_eq!(out, vec![start, end]);
    }

    #[test]
    fn test_invalid_portals_fall_back() {
        let start = v(0.0, 0.0);
        let end = v(10.0, 0.0);
        let mut p = portals(&[(start, start), (v(f32::NAN, 1.0), v(3.0, -1.0)), (end, end)]);
        let mut out = Vec::new();
        assert!(!calculate(&mut p, FunnelOptions::default(), &mut out));
        assert_eq!(out, vec![start, end]);
    }

    #[test]
    fn test_deterministic() {
        let start = v(0.0, 0.0);
        let end = v(10.0, 10.0);
        let points = [
            (start, start),
            (v(5.0, 2.0), v(5.0, -4.0)),
            (v(6.0, 3.0), v(7.0, 1.0)),
            (v(8.0, 10.0), v(12.0, 10.0)),
            (end, end),
        ];
        let mut first = Vec::new();
        let mut second = Vec::new();
        calculate(&mut portals(&points), FunnelOptions::default(), &mut first);
        calculate(&mut portals(&points), FunnelOptions::default(), &mut second);
        assert_eq!(first, second);
    }
}
