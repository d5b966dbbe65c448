//! Polygon and segment geometry utilities shared across the pipeline.

use crate::model::Vec2;

/// (b - a) x (c - a).
fn cross3(a: Vec2, b: Vec2, c: Vec2) -> f64 {
    (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
}

/// Shoelace area magnitude. Rings may be open or closed.
pub fn polygon_area(poly: &[Vec2]) -> f64 {
    signed_area(poly).abs()
}

/// Shoelace area with sign (positive for counter-clockwise rings).
pub fn signed_area(poly: &[Vec2]) -> f64 {
    if poly.len() < 3 {
        return 0.0;
    }
    let mut total = 0.0;
    for i in 0..poly.len() {
        let j = (i + 1) % poly.len();
        total += poly[i].x * poly[j].y - poly[j].x * poly[i].y;
    }
    0.5 * total
}

/// Vertex average. Not the area centroid, but stable for degenerate rings.
pub fn average_point(poly: &[Vec2]) -> Vec2 {
    if poly.is_empty() {
        return Vec2::ZERO;
    }
    let mut sum = Vec2::ZERO;
    for p in poly {
        sum += *p;
    }
    sum / poly.len() as f64
}

/// Even-odd ray-cast point-in-polygon test.
pub fn inside_polygon(point: Vec2, polygon: &[Vec2]) -> bool {
    if polygon.is_empty() {
        return false;
    }
    let mut inside = false;
    let mut j = polygon.len() - 1;
    for i in 0..polygon.len() {
        let (xi, yi) = (polygon[i].x, polygon[i].y);
        let (xj, yj) = (polygon[j].x, polygon[j].y);
        let hit = ((yi > point.y) != (yj > point.y))
            && (point.x < (xj - xi) * (point.y - yi) / (yj - yi + 1e-12) + xi);
        if hit {
            inside = !inside;
        }
        j = i;
    }
    inside
}

pub fn point_in_rectangle(point: Vec2, origin: Vec2, dimensions: Vec2) -> bool {
    point.x >= origin.x
        && point.y >= origin.y
        && point.x <= origin.x + dimensions.x
        && point.y <= origin.y + dimensions.y
}

/// Segment intersection. Returns the crossing point when the segments
/// properly intersect (endpoints included).
pub fn segment_intersection(a: Vec2, b: Vec2, c: Vec2, d: Vec2) -> Option<Vec2> {
    let s1 = b - a;
    let s2 = d - c;
    let denom = -s2.x * s1.y + s1.x * s2.y;
    if denom.abs() < 1e-9 {
        return None;
    }
    let s = (-s1.y * (a.x - c.x) + s1.x * (a.y - c.y)) / denom;
    let t = (s2.x * (a.y - c.y) - s2.y * (a.x - c.x)) / denom;
    if (0.0..=1.0).contains(&s) && (0.0..=1.0).contains(&t) {
        Some(a + s1 * t)
    } else {
        None
    }
}

/// Distance from a point to a segment.
pub fn distance_to_segment(p: Vec2, a: Vec2, b: Vec2) -> f64 {
    let v = b - a;
    let w = p - a;
    let c1 = w.dot(v);
    if c1 <= 0.0 {
        return p.distance(a);
    }
    let c2 = v.length_squared();
    if c2 <= c1 {
        return p.distance(b);
    }
    p.distance(a + v * (c1 / c2))
}

/// Project a point onto a segment, clamped to its endpoints.
pub fn project_point_to_segment(p: Vec2, a: Vec2, b: Vec2) -> Vec2 {
    let v = b - a;
    let len_sq = v.length_squared();
    if len_sq <= 0.0 {
        return a;
    }
    let t = ((p - a).dot(v) / len_sq).clamp(0.0, 1.0);
    a + v * t
}

/// Does `p` lie on segment `ab` within `eps`?
pub fn point_on_segment(p: Vec2, a: Vec2, b: Vec2, eps: f64) -> bool {
    let cross = (p.x - a.x) * (b.y - a.y) - (p.y - a.y) * (b.x - a.x);
    if cross.abs() > eps {
        return false;
    }
    let dot = (p - a).dot(b - a);
    if dot < -eps {
        return false;
    }
    dot <= a.distance_squared(b) + eps
}

/// Sutherland–Hodgman clip of `subject` against the directed line
/// `l1 -> l2`, keeping the left or right side.
pub fn sutherland_hodgman(subject: &[Vec2], l1: Vec2, l2: Vec2, keep_left: bool) -> Vec<Vec2> {
    if subject.is_empty() {
        return Vec::new();
    }
    let is_in = |p: Vec2| {
        let cp = cross3(l1, l2, p);
        if keep_left {
            cp <= 0.0
        } else {
            cp >= 0.0
        }
    };

    let mut output = Vec::with_capacity(subject.len() + 2);
    let mut s = subject[subject.len() - 1];
    for &e in subject {
        let e_in = is_in(e);
        let s_in = is_in(s);
        if e_in {
            if !s_in {
                if let Some(inter) = line_clip_point(s, e, l1, l2) {
                    output.push(inter);
                }
            }
            output.push(e);
        } else if s_in {
            if let Some(inter) = line_clip_point(s, e, l1, l2) {
                output.push(inter);
            }
        }
        s = e;
    }
    output
}

// Intersection of segment se with the infinite line through l1/l2.
fn line_clip_point(s: Vec2, e: Vec2, l1: Vec2, l2: Vec2) -> Option<Vec2> {
    let d1 = e - s;
    let d2 = l2 - l1;
    let denom = -d2.x * d1.y + d1.x * d2.y;
    if denom.abs() < 1e-12 {
        return None;
    }
    let t = (d2.x * (s.y - l1.y) - d2.y * (s.x - l1.x)) / denom;
    Some(s + d1 * t)
}

/// Clip the bounds rectangle with the line through `p1`/`p2` and keep the
/// smaller-area side.
pub fn slice_rectangle(origin: Vec2, dimensions: Vec2, p1: Vec2, p2: Vec2) -> Vec<Vec2> {
    let rect = vec![
        origin,
        Vec2::new(origin.x + dimensions.x, origin.y),
        Vec2::new(origin.x + dimensions.x, origin.y + dimensions.y),
        Vec2::new(origin.x, origin.y + dimensions.y),
    ];
    let left = sutherland_hodgman(&rect, p1, p2, true);
    let right = sutherland_hodgman(&rect, p1, p2, false);
    let a_left = polygon_area(&left);
    let a_right = polygon_area(&right);
    if a_left == 0.0 && a_right == 0.0 {
        return rect;
    }
    if a_left < a_right {
        left
    } else {
        right
    }
}

/// Polygon for the smaller side of the bounds rectangle cut by the line's
/// endpoints. Empty when the line has fewer than 2 points.
pub fn line_rectangle_polygon_intersection(
    origin: Vec2,
    dimensions: Vec2,
    line: &[Vec2],
) -> Vec<Vec2> {
    if line.len() < 2 {
        return Vec::new();
    }
    slice_rectangle(origin, dimensions, line[0], line[line.len() - 1])
}

/// Shift each vertex radially away from the vertex average by `spacing`
/// (negative shrinks).
pub fn resize_geometry(geometry: &[Vec2], spacing: f64) -> Vec<Vec2> {
    if geometry.is_empty() {
        return Vec::new();
    }
    let center = average_point(geometry);
    geometry
        .iter()
        .map(|&p| {
            let dir = p - center;
            let len = dir.length();
            if len == 0.0 {
                p
            } else {
                p + dir / len * spacing
            }
        })
        .collect()
}

/// Recursive longest-edge subdivision. Pieces below `0.5 * min_area` are
/// dropped; pieces below `2 * min_area` are emitted as-is.
pub fn subdivide_polygon(poly: &[Vec2], min_area: f64) -> Vec<Vec<Vec2>> {
    let area = polygon_area(poly);
    if area < 0.5 * min_area {
        return Vec::new();
    }
    if area < 2.0 * min_area || poly.len() < 4 {
        return vec![poly.to_vec()];
    }

    let mut longest = -1.0;
    let mut idx = 0;
    for i in 0..poly.len() {
        let j = (i + 1) % poly.len();
        let d = poly[i].distance(poly[j]);
        if d > longest {
            longest = d;
            idx = i;
        }
    }
    let a = poly[idx];
    let b = poly[(idx + 1) % poly.len()];
    let mid = (a + b) * 0.5;
    let normal = Vec2::new(a.y - b.y, -(a.x - b.x));
    let far = mid + normal;

    let mut out = Vec::new();
    let left = sutherland_hodgman(poly, mid, far, true);
    if !left.is_empty() {
        out.extend(subdivide_polygon(&left, min_area));
    }
    let right = sutherland_hodgman(poly, mid, far, false);
    if !right.is_empty() {
        out.extend(subdivide_polygon(&right, min_area));
    }
    out
}

/// Douglas–Peucker simplification at `tolerance`. Lines with fewer than
/// 3 points pass through untouched.
pub fn simplify_douglas_peucker(line: &[Vec2], tolerance: f64) -> Vec<Vec2> {
    if line.len() < 3 {
        return line.to_vec();
    }

    let point_line_distance = |p: Vec2, a: Vec2, b: Vec2| -> f64 {
        let area = ((b.x - a.x) * (a.y - p.y) - (a.x - p.x) * (b.y - a.y)).abs();
        let len = a.distance(b);
        if len == 0.0 {
            0.0
        } else {
            area / len
        }
    };

    let mut keep = vec![false; line.len()];
    keep[0] = true;
    keep[line.len() - 1] = true;

    let mut stack = vec![(0usize, line.len() - 1)];
    while let Some((start, end)) = stack.pop() {
        let mut max_dist = 0.0;
        let mut index = start;
        for i in start + 1..end {
            let d = point_line_distance(line[i], line[start], line[end]);
            if d > max_dist {
                max_dist = d;
                index = i;
            }
        }
        if max_dist > tolerance {
            keep[index] = true;
            stack.push((start, index));
            stack.push((index, end));
        }
    }

    line.iter()
        .zip(keep.iter())
        .filter_map(|(p, k)| k.then_some(*p))
        .collect()
}

/// Ensure the ring closes exactly once (first point repeated at the end).
pub fn make_closed_ring(mut ring: Vec<Vec2>) -> Vec<Vec2> {
    if ring.len() >= 2 && ring[0] == ring[ring.len() - 1] {
        ring.pop();
    }
    if ring.len() >= 3 {
        ring.push(ring[0]);
    }
    ring
}
