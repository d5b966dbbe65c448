//! Block polygonizer.
//!
//! Extracts enclosed faces from the road arrangement. Two selectable
//! implementations share the same linework preprocessing: the legacy
//! planar face walk over a merged node graph, and a polygon-engine path
//! that snap-rounds, nodes, prunes dangles, polygonizes, then validates
//! and clips each polygon with `geo`. The engine path falls back to the
//! legacy walk when it produces nothing; when both come up empty, each
//! district border becomes a block so downstream stages have something
//! to work with.

use std::collections::{HashMap, HashSet};

use geo::{Area, BooleanOps, Coord, LineString, MultiPolygon, Polygon as GeoPolygon, Validation};
use log::{debug, warn};

use crate::config::{BlockGenMode, BlockSettings, CityParams, RoadDefinitionMode};
use crate::district::DistrictField;
use crate::graph::{next_edge_ccw, sort_neighbors_by_angle, GraphNode};
use crate::model::{
    BlockDebugStats, BlockPolygon, Bounds, City, District, Polygon, RoadType, UserPlacedInputs,
    Vec2,
};
use crate::polygon;

#[derive(Clone, Copy, Debug)]
struct Segment {
    a: Vec2,
    b: Vec2,
    closure: bool,
}

#[derive(Clone, Copy)]
struct EdgeData {
    closure: bool,
}

pub struct BlockOutput {
    pub polygons: Vec<BlockPolygon>,
    pub faces: Vec<Polygon>,
    pub stats: BlockDebugStats,
}

/// Drop sub-eps runs and near-colinear middle points from a polyline.
fn sanitize_polyline(points: &[Vec2], eps: f64) -> Vec<Vec2> {
    let eps_sq = eps * eps;
    let mut out: Vec<Vec2> = Vec::with_capacity(points.len());
    for &p in points {
        if out.is_empty() {
            out.push(p);
            continue;
        }
        if out[out.len() - 1].distance_squared(p) <= eps_sq {
            continue;
        }
        if out.len() >= 2 {
            let a = out[out.len() - 2];
            let b = out[out.len() - 1];
            if a.distance_squared(p) <= eps_sq {
                out.pop();
                continue;
            }
            let ab = b - a;
            let bc = p - b;
            let cross = ab.x * bc.y - ab.y * bc.x;
            let denom = (ab.length() * bc.length()).max(1e-6);
            if cross.abs() / denom <= 0.01 {
                let last = out.len() - 1;
                out[last] = p;
                continue;
            }
        }
        out.push(p);
    }
    out
}

/// Merge nearby endpoints so coincident corners share identity. Returns
/// the number of unique snap points.
fn snap_segment_endpoints(segments: &mut [Segment], eps: f64) -> usize {
    let eps_sq = eps * eps;
    let mut snap_points: Vec<Vec2> = Vec::with_capacity(segments.len() * 2);
    let snap = |p: Vec2, snap_points: &mut Vec<Vec2>| {
        for &existing in snap_points.iter() {
            if existing.distance_squared(p) <= eps_sq {
                return existing;
            }
        }
        snap_points.push(p);
        p
    };
    for seg in segments.iter_mut() {
        seg.a = snap(seg.a, &mut snap_points);
        seg.b = snap(seg.b, &mut snap_points);
    }
    snap_points.len()
}

/// Project endpoints onto nearby segments to close T-junctions that
/// missed by less than `tolerance`.
fn snap_endpoints_to_segments(segments: &mut Vec<Segment>, tolerance: f64, merge_radius: f64) -> usize {
    if segments.is_empty() {
        return 0;
    }
    let tol_sq = tolerance * tolerance;
    let merge_sq = merge_radius * merge_radius;
    let mut adjusted = 0;

    for i in 0..segments.len() {
        for which in 0..2 {
            let endpoint = if which == 0 { segments[i].a } else { segments[i].b };
            let mut best = endpoint;
            let mut best_dist_sq = tol_sq + 1.0;
            let mut found = false;

            for (j, other) in segments.iter().enumerate() {
                if i == j {
                    continue;
                }
                let dist = polygon::distance_to_segment(endpoint, other.a, other.b);
                let dist_sq = dist * dist;
                if dist_sq > tol_sq || dist_sq >= best_dist_sq {
                    continue;
                }
                let mut proj = polygon::project_point_to_segment(endpoint, other.a, other.b);
                if proj.distance_squared(other.a) <= merge_sq {
                    proj = other.a;
                } else if proj.distance_squared(other.b) <= merge_sq {
                    proj = other.b;
                }
                best = proj;
                best_dist_sq = dist_sq;
                found = true;
            }

            if found && endpoint.distance_squared(best) > 1e-6 {
                if which == 0 {
                    segments[i].a = best;
                } else {
                    segments[i].b = best;
                }
                adjusted += 1;
            }
        }
    }
    adjusted
}

fn add_unique_point(points: &mut Vec<Vec2>, p: Vec2, eps: f64) {
    let eps_sq = eps * eps;
    if points.iter().any(|q| q.distance_squared(p) <= eps_sq) {
        return;
    }
    points.push(p);
}

/// Endpoints sitting near another segment but not near its endpoints are
/// unresolved T-junctions; collect their projections as split points.
fn find_near_miss_points(
    segments: &[Segment],
    out_points: &mut Vec<Vec2>,
    tolerance: f64,
    merge_radius: f64,
) {
    let eps = merge_radius * 0.1;
    for (i, seg) in segments.iter().enumerate() {
        for (j, other) in segments.iter().enumerate() {
            if i == j {
                continue;
            }
            for pt in [other.a, other.b] {
                let dist = polygon::distance_to_segment(pt, seg.a, seg.b);
                if dist >= tolerance || dist <= eps {
                    continue;
                }
                if pt.distance(seg.a) <= merge_radius || pt.distance(seg.b) <= merge_radius {
                    continue;
                }
                let v = seg.b - seg.a;
                let c1 = (pt - seg.a).dot(v);
                let c2 = v.length_squared();
                if c1 > 0.0 && c1 < c2 {
                    add_unique_point(out_points, seg.a + v * (c1 / c2), eps);
                }
            }
        }
    }
}

fn split_segments_at_points(
    segments: &[Segment],
    split_points: &[Vec2],
    merge_radius: f64,
) -> Vec<Segment> {
    let eps = merge_radius * 0.5;
    let mut result = Vec::with_capacity(segments.len() * 2);

    for seg in segments {
        let mut on_seg = vec![(0.0, seg.a), (1.0, seg.b)];
        let v = seg.b - seg.a;
        let len_sq = v.length_squared();
        if len_sq > 0.0 {
            for &pt in split_points {
                if polygon::point_on_segment(pt, seg.a, seg.b, eps) {
                    let t = (pt - seg.a).dot(v) / len_sq;
                    if t > 0.01 && t < 0.99 {
                        on_seg.push((t, pt));
                    }
                }
            }
        }
        on_seg.sort_by(|a, b| a.0.total_cmp(&b.0));
        for w in on_seg.windows(2) {
            if w[0].1.distance_squared(w[1].1) > eps * eps {
                result.push(Segment {
                    a: w[0].1,
                    b: w[1].1,
                    closure: seg.closure,
                });
            }
        }
    }
    result
}

/// Canonical undirected key over exact endpoint bit patterns.
fn segment_key(seg: &Segment) -> (u64, u64, u64, u64) {
    let k1 = (
        seg.a.x.to_bits(),
        seg.a.y.to_bits(),
        seg.b.x.to_bits(),
        seg.b.y.to_bits(),
    );
    let k2 = (k1.2, k1.3, k1.0, k1.1);
    k1.min(k2)
}

fn dedup_segments(segments: Vec<Segment>) -> Vec<Segment> {
    let mut seen = HashSet::with_capacity(segments.len() * 2);
    segments
        .into_iter()
        .filter(|seg| seen.insert(segment_key(seg)))
        .collect()
}

/// Collect barrier/closure road inputs and run the shared linework
/// preprocessing, returning noding-ready segments.
fn prepare_segments(
    params: &CityParams,
    city: &City,
    user_inputs: &UserPlacedInputs,
    settings: &BlockSettings,
    stats: &mut BlockDebugStats,
) -> (Vec<Segment>, Vec<Vec2>) {
    let hidden_generated: HashSet<i32> = user_inputs
        .roads
        .iter()
        .filter(|r| r.source_generated_id >= 0)
        .map(|r| r.source_generated_id)
        .collect();

    struct RoadInput {
        points: Vec<Vec2>,
        closure: bool,
    }

    let use_segments = params.debug_use_segment_roads_for_blocks
        || params.road_definition_mode == RoadDefinitionMode::BySegment;
    let mut inputs: Vec<RoadInput> = Vec::new();
    let mut road_id: i32 = 0;

    for ty in RoadType::GENERATED_ORDER {
        let idx = ty.index();
        let barrier = params.block_barrier[idx];
        let closure = params.block_closure[idx];
        if use_segments {
            for road in &city.segment_roads_by_type[idx] {
                if road.points.len() < 2 {
                    continue;
                }
                let id = road_id;
                road_id += 1;
                if hidden_generated.contains(&id) || (!barrier && !closure) {
                    continue;
                }
                inputs.push(RoadInput {
                    points: road.points.to_vec(),
                    closure,
                });
            }
        } else {
            for road in &city.roads_by_type[idx] {
                let id = road_id;
                road_id += 1;
                if hidden_generated.contains(&id) || (!barrier && !closure) {
                    continue;
                }
                inputs.push(RoadInput {
                    points: road.points.clone(),
                    closure,
                });
            }
        }
    }
    for road in &user_inputs.roads {
        if road.points.len() < 2 {
            continue;
        }
        let idx = road.road_type.index();
        let barrier = params.block_barrier[idx];
        let closure = params.block_closure[idx];
        if !barrier && !closure {
            continue;
        }
        inputs.push(RoadInput {
            points: road.points.clone(),
            closure,
        });
    }
    stats.road_inputs = inputs.len() as u32;
    if inputs.is_empty() {
        return (Vec::new(), Vec::new());
    }

    let cleanup_eps = (settings.merge_radius * 0.02).max(1e-3);
    let mut segments: Vec<Segment> = Vec::with_capacity(inputs.len() * 4);
    for road in &inputs {
        let cleaned = sanitize_polyline(&road.points, cleanup_eps);
        for w in cleaned.windows(2) {
            segments.push(Segment {
                a: w[0],
                b: w[1],
                closure: road.closure,
            });
        }
    }
    stats.segments = segments.len() as u32;

    let snap_eps = (settings.merge_radius * 0.25).max(1.0);
    let unique = snap_segment_endpoints(&mut segments, snap_eps);
    debug!(
        "blocks: endpoint snap {} -> {} unique (eps {:.2})",
        segments.len() * 2,
        unique,
        snap_eps
    );
    let adjusted =
        snap_endpoints_to_segments(&mut segments, settings.near_miss_tolerance, settings.merge_radius);
    if adjusted > 0 {
        debug!("blocks: projected {adjusted} endpoints onto nearby segments");
    }

    let mut intersections: Vec<Vec2> = Vec::new();
    for i in 0..segments.len() {
        for j in i + 1..segments.len() {
            if let Some(inter) = polygon::segment_intersection(
                segments[i].a,
                segments[i].b,
                segments[j].a,
                segments[j].b,
            ) {
                add_unique_point(&mut intersections, inter, settings.merge_radius * 0.1);
            }
        }
    }

    if settings.enable_near_miss_splitting {
        find_near_miss_points(
            &segments,
            &mut intersections,
            settings.near_miss_tolerance,
            settings.merge_radius,
        );
        segments = split_segments_at_points(&segments, &intersections, settings.merge_radius);
    }

    let before = segments.len();
    segments = dedup_segments(segments);
    if segments.len() != before {
        debug!("blocks: deduped segments {} -> {}", before, segments.len());
    }
    stats.intersections = intersections.len() as u32;
    (segments, intersections)
}

struct FaceRecord {
    node_ids: Vec<usize>,
    poly: Vec<Vec2>,
    area: f64,
    /// Positive for bounded (counter-clockwise) faces; the one outer
    /// face comes back clockwise.
    signed_area: f64,
}

/// Face walk shared by both modes: minimal CCW faces inside the area
/// bounds, with node ids retained for closure checks.
fn walk_faces(nodes: &[GraphNode], min_area: f64, max_area: f64) -> Vec<FaceRecord> {
    let n = nodes.len();
    if n < 3 {
        return Vec::new();
    }
    let sorted_adj: Vec<Vec<usize>> = nodes
        .iter()
        .map(|node| sort_neighbors_by_angle(node, nodes))
        .collect();
    let edge_key = |from: usize, to: usize| ((from as u64) << 32) | to as u64;
    let mut used_edges: HashSet<u64> = HashSet::new();
    let mut faces = Vec::new();

    for start in 0..n {
        for &first in &sorted_adj[start] {
            if used_edges.contains(&edge_key(start, first)) {
                continue;
            }
            let mut face = vec![start];
            let mut prev = start;
            let mut curr = first;
            let mut steps = 0;
            let max_steps = n * 4;
            while curr != start && steps < max_steps {
                face.push(curr);
                used_edges.insert(edge_key(prev, curr));
                let Some(next) = next_edge_ccw(prev, curr, &sorted_adj) else {
                    break;
                };
                prev = curr;
                curr = next;
                steps += 1;
            }
            if curr == start && face.len() >= 3 {
                used_edges.insert(edge_key(prev, curr));
                let poly: Vec<Vec2> = face.iter().map(|&i| nodes[i].value).collect();
                let signed_area = polygon::signed_area(&poly);
                let area = signed_area.abs();
                if area >= min_area && area <= max_area {
                    faces.push(FaceRecord {
                        node_ids: face,
                        poly,
                        area,
                        signed_area,
                    });
                }
            }
        }
    }
    faces
}

fn polygon_touches_bounds(poly: &[Vec2], bounds: &Bounds, tolerance: f64) -> bool {
    poly.iter().any(|pt| {
        (pt.x - bounds.min.x).abs() < tolerance
            || (pt.x - bounds.max.x).abs() < tolerance
            || (pt.y - bounds.min.y).abs() < tolerance
            || (pt.y - bounds.max.y).abs() < tolerance
    })
}

/// The largest face is usually the outer frame; remove it when it
/// touches the bounds or dwarfs the next-largest face.
fn remove_outer_frame(faces: &mut Vec<FaceRecord>, bounds: &Bounds, settings: &BlockSettings) {
    if faces.is_empty() {
        return;
    }
    let mut max_idx = 0;
    for i in 1..faces.len() {
        if faces[i].area > faces[max_idx].area {
            max_idx = i;
        }
    }
    if !settings.guard_largest_face_removal {
        faces.remove(max_idx);
        return;
    }

    let mut should_remove =
        polygon_touches_bounds(&faces[max_idx].poly, bounds, settings.merge_radius * 2.0);
    if !should_remove && faces.len() > 1 {
        let second_max = faces
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != max_idx)
            .map(|(_, f)| f.area)
            .fold(0.0, f64::max);
        if second_max > 0.0 && faces[max_idx].area / second_max > settings.largest_face_threshold {
            should_remove = true;
        }
    }
    if should_remove {
        faces.remove(max_idx);
    }
}

fn add_or_get_node(nodes: &mut Vec<GraphNode>, p: Vec2, merge_radius_sq: f64) -> usize {
    for (i, node) in nodes.iter().enumerate() {
        if node.value.distance_squared(p) <= merge_radius_sq {
            return i;
        }
    }
    nodes.push(GraphNode {
        value: p,
        adj: Vec::new(),
    });
    nodes.len() - 1
}

fn edge_key_undirected(a: usize, b: usize) -> u64 {
    let lo = a.min(b) as u64;
    let hi = a.max(b) as u64;
    (hi << 32) | lo
}

/// Legacy mode: merged node graph, face walk, closure-marked faces
/// become blocks.
fn legacy_blocks(
    segments: &[Segment],
    intersections: &[Vec2],
    bounds: &Bounds,
    field: &DistrictField,
    settings: &BlockSettings,
    stats: &mut BlockDebugStats,
) -> (Vec<BlockPolygon>, Vec<Polygon>) {
    let mut nodes: Vec<GraphNode> = Vec::new();
    let mut edge_data: HashMap<u64, EdgeData> = HashMap::new();
    let merge_radius_sq = settings.merge_radius * settings.merge_radius;

    for seg in segments {
        let mut pts = vec![seg.a, seg.b];
        for &inter in intersections {
            if polygon::point_on_segment(inter, seg.a, seg.b, 1e-6) {
                add_unique_point(&mut pts, inter, settings.merge_radius * 0.1);
            }
        }
        let dir = seg.b - seg.a;
        let len_sq = dir.length_squared();
        pts.sort_by(|p1, p2| {
            let t1 = if len_sq > 0.0 { (*p1 - seg.a).dot(dir) } else { 0.0 };
            let t2 = if len_sq > 0.0 { (*p2 - seg.a).dot(dir) } else { 0.0 };
            t1.total_cmp(&t2)
        });
        for w in pts.windows(2) {
            let a = add_or_get_node(&mut nodes, w[0], merge_radius_sq);
            let b = add_or_get_node(&mut nodes, w[1], merge_radius_sq);
            if a == b {
                continue;
            }
            if !nodes[a].adj.contains(&b) {
                nodes[a].adj.push(b);
            }
            if !nodes[b].adj.contains(&a) {
                nodes[b].adj.push(a);
            }
            edge_data
                .entry(edge_key_undirected(a, b))
                .and_modify(|e| e.closure = e.closure && seg.closure)
                .or_insert(EdgeData {
                    closure: seg.closure,
                });
        }
    }

    if nodes.len() < 3 {
        return (Vec::new(), Vec::new());
    }

    let mut faces = walk_faces(&nodes, settings.min_area, settings.max_area);
    remove_outer_frame(&mut faces, bounds, settings);
    stats.faces_found = faces.len() as u32;

    let mut polygons = Vec::new();
    let mut debug_faces = Vec::new();
    for face in faces {
        let closable = face.node_ids.iter().enumerate().all(|(i, &a)| {
            let b = face.node_ids[(i + 1) % face.node_ids.len()];
            edge_data
                .get(&edge_key_undirected(a, b))
                .map(|e| e.closure)
                .unwrap_or(false)
        });

        let ring = polygon::make_closed_ring(face.poly);
        let district_id = field.sample_id(polygon::average_point(&ring));
        debug_faces.push(Polygon {
            points: ring.clone(),
            district_id,
        });
        if closable {
            polygons.push(BlockPolygon {
                outer: ring,
                holes: Vec::new(),
                district_id,
            });
            stats.valid_blocks += 1;
        }
    }
    (polygons, debug_faces)
}

fn ring_to_geo(ring: &[Vec2]) -> GeoPolygon<f64> {
    let coords: Vec<Coord<f64>> = ring.iter().map(|p| Coord { x: p.x, y: p.y }).collect();
    GeoPolygon::new(LineString::new(coords), vec![])
}

fn geo_ring_points(ls: &LineString<f64>) -> Vec<Vec2> {
    let mut pts: Vec<Vec2> = ls.coords().map(|c| Vec2::new(c.x, c.y)).collect();
    if pts.len() >= 2 && pts[0] == pts[pts.len() - 1] {
        pts.pop();
    }
    pts
}

fn largest_part(multi: MultiPolygon<f64>) -> Option<GeoPolygon<f64>> {
    multi
        .into_iter()
        .max_by(|a, b| a.unsigned_area().total_cmp(&b.unsigned_area()))
}

/// Polygon-engine mode. Returns `None` when no face survives so the
/// caller can fall back to the legacy walk.
fn engine_blocks(
    segments: &[Segment],
    districts: &[District],
    field: &DistrictField,
    settings: &BlockSettings,
    stats: &mut BlockDebugStats,
) -> Option<(Vec<BlockPolygon>, Vec<Polygon>)> {
    if segments.is_empty() {
        return None;
    }

    let snap_tolerance = (settings.merge_radius * settings.snap_tolerance_factor).max(1e-6);
    let snap = |v: f64| (v / snap_tolerance).round() * snap_tolerance;
    stats.input_lines = segments.len() as u32;

    // Stage 1: snap-round and drop degenerate pieces.
    let mut snapped: Vec<Segment> = Vec::with_capacity(segments.len());
    for seg in segments {
        let a = Vec2::new(snap(seg.a.x), snap(seg.a.y));
        let b = Vec2::new(snap(seg.b.x), snap(seg.b.y));
        if a.distance_squared(b) < snap_tolerance * snap_tolerance {
            continue;
        }
        snapped.push(Segment {
            a,
            b,
            closure: seg.closure,
        });
    }
    stats.snapped_lines = snapped.len() as u32;
    if snapped.is_empty() {
        return None;
    }

    // Stage 2: heal by dedup, then node the collection at crossings.
    let healed = dedup_segments(snapped);
    stats.healed_lines = healed.len() as u32;

    let mut crossings: Vec<Vec2> = Vec::new();
    for i in 0..healed.len() {
        for j in i + 1..healed.len() {
            if let Some(inter) =
                polygon::segment_intersection(healed[i].a, healed[i].b, healed[j].a, healed[j].b)
            {
                add_unique_point(&mut crossings, inter, snap_tolerance * 0.1);
            }
        }
    }
    let noded = split_segments_at_points(&healed, &crossings, snap_tolerance);

    // Stage 3: prune dangling endpoints (geometric degree 1).
    let point_key = |p: Vec2| {
        (
            (p.x / snap_tolerance).round() as i64,
            (p.y / snap_tolerance).round() as i64,
        )
    };
    let mut degree: HashMap<(i64, i64), u32> = HashMap::new();
    for seg in &noded {
        *degree.entry(point_key(seg.a)).or_insert(0) += 1;
        *degree.entry(point_key(seg.b)).or_insert(0) += 1;
    }
    let pruned: Vec<Segment> = noded
        .into_iter()
        .filter(|seg| {
            degree.get(&point_key(seg.a)).copied().unwrap_or(0) >= 2
                && degree.get(&point_key(seg.b)).copied().unwrap_or(0) >= 2
        })
        .collect();
    stats.pruned_lines = pruned.len() as u32;
    if pruned.is_empty() {
        return None;
    }

    // Stage 4: polygonize what remains.
    let merge_sq = (snap_tolerance * snap_tolerance).max(1e-12);
    let mut nodes: Vec<GraphNode> = Vec::new();
    for seg in &pruned {
        let a = add_or_get_node(&mut nodes, seg.a, merge_sq);
        let b = add_or_get_node(&mut nodes, seg.b, merge_sq);
        if a == b {
            continue;
        }
        if !nodes[a].adj.contains(&b) {
            nodes[a].adj.push(b);
        }
        if !nodes[b].adj.contains(&a) {
            nodes[b].adj.push(a);
        }
    }
    // A polygonizer only emits bounded faces; the outer frame comes back
    // clockwise from the walk and is dropped by orientation.
    let mut faces = walk_faces(&nodes, settings.min_area, settings.max_area);
    faces.retain(|f| f.signed_area > 0.0);
    if faces.is_empty() {
        return None;
    }

    let district_polys: HashMap<u32, GeoPolygon<f64>> = districts
        .iter()
        .filter(|d| d.border.len() >= 3)
        .map(|d| (d.id, ring_to_geo(&d.border)))
        .collect();

    let closure_eps = (settings.merge_radius * 0.75).max(1.0);
    let mut polygons = Vec::new();
    let mut debug_faces = Vec::new();
    let mut face_count = 0u32;

    for face in faces {
        // Validate, with one repair attempt by self-union.
        let mut geo_poly = ring_to_geo(&face.poly);
        if !geo_poly.is_valid() {
            stats.invalid_polygons += 1;
            let repaired = largest_part(geo_poly.union(&geo_poly));
            match repaired.filter(|p| p.is_valid()) {
                Some(p) => {
                    stats.repaired_polygons += 1;
                    geo_poly = p;
                }
                None => {
                    stats.skipped_polygons += 1;
                    continue;
                }
            }
        }

        let mut ring_pts = geo_ring_points(geo_poly.exterior());
        let mut area = polygon::polygon_area(&ring_pts);
        if area < settings.min_area || area > settings.max_area {
            stats.skipped_polygons += 1;
            continue;
        }
        let district_id = field.sample_id(polygon::average_point(&ring_pts));
        if district_id == 0 {
            stats.skipped_polygons += 1;
            continue;
        }

        // Clip to the district polygon, keeping the largest piece.
        let Some(district_poly) = district_polys.get(&district_id) else {
            stats.skipped_polygons += 1;
            continue;
        };
        let Some(clipped) = largest_part(geo_poly.intersection(district_poly)) else {
            stats.skipped_polygons += 1;
            continue;
        };
        ring_pts = geo_ring_points(clipped.exterior());
        if ring_pts.len() < 3 {
            stats.skipped_polygons += 1;
            continue;
        }
        area = polygon::polygon_area(&ring_pts);
        if area < settings.min_area || area > settings.max_area {
            stats.skipped_polygons += 1;
            continue;
        }

        let ring = polygon::make_closed_ring(ring_pts.clone());
        debug_faces.push(Polygon {
            points: ring.clone(),
            district_id,
        });
        face_count += 1;

        // Every outer edge must be closable by some closure-marked
        // segment: intersecting it, or within eps of both endpoints.
        let closable = (0..ring_pts.len()).all(|e| {
            let a = ring_pts[e];
            let b = ring_pts[(e + 1) % ring_pts.len()];
            segments.iter().filter(|s| s.closure).any(|s| {
                polygon::segment_intersection(a, b, s.a, s.b).is_some()
                    || (polygon::distance_to_segment(a, s.a, s.b) < closure_eps
                        && polygon::distance_to_segment(b, s.a, s.b) < closure_eps)
            })
        });
        if !closable {
            continue;
        }

        let holes: Vec<Vec<Vec2>> = clipped
            .interiors()
            .iter()
            .map(|h| polygon::make_closed_ring(geo_ring_points(h)))
            .filter(|h| h.len() >= 4)
            .collect();

        polygons.push(BlockPolygon {
            outer: ring,
            holes,
            district_id,
        });
        stats.valid_blocks += 1;
    }

    stats.faces_found = face_count;
    if face_count == 0 {
        return None;
    }
    Some((polygons, debug_faces))
}

/// Build block polygons from the city's roads and user inputs.
pub fn generate(
    params: &CityParams,
    city: &City,
    user_inputs: &UserPlacedInputs,
    field: &DistrictField,
    settings: &BlockSettings,
) -> BlockOutput {
    let mut stats = BlockDebugStats::default();
    let (segments, intersections) = prepare_segments(params, city, user_inputs, settings, &mut stats);

    let (mut polygons, faces) = if segments.is_empty() {
        (Vec::new(), Vec::new())
    } else {
        match params.block_gen_mode {
            BlockGenMode::PolygonEngine => {
                match engine_blocks(&segments, &city.districts, field, settings, &mut stats) {
                    Some(out) => out,
                    None => {
                        warn!("blocks: polygon engine found no faces, falling back to face walk");
                        stats.valid_blocks = 0;
                        legacy_blocks(
                            &segments,
                            &intersections,
                            &city.bounds,
                            field,
                            settings,
                            &mut stats,
                        )
                    }
                }
            }
            BlockGenMode::Legacy => legacy_blocks(
                &segments,
                &intersections,
                &city.bounds,
                field,
                settings,
                &mut stats,
            ),
        }
    };

    // Last resort: one block per district border.
    if polygons.is_empty() && !city.districts.is_empty() {
        debug!("blocks: no blocks found, using district borders");
        for district in &city.districts {
            if district.border.len() < 3 {
                continue;
            }
            polygons.push(BlockPolygon {
                outer: polygon::make_closed_ring(district.border.clone()),
                holes: Vec::new(),
                district_id: district.id,
            });
        }
        stats.valid_blocks = polygons.len() as u32;
    }

    BlockOutput {
        polygons,
        faces,
        stats,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BlockGenMode, CityParams};
    use crate::model::{District, DistrictType, Polyline};

    fn square_streets(city: &mut City) {
        let corners = [
            Vec2::new(100.0, 100.0),
            Vec2::new(900.0, 100.0),
            Vec2::new(900.0, 900.0),
            Vec2::new(100.0, 900.0),
        ];
        for i in 0..4 {
            city.roads_by_type[RoadType::Street.index()].push(Polyline::new(vec![
                corners[i],
                corners[(i + 1) % 4],
            ]));
        }
    }

    fn one_district_city() -> (City, DistrictField) {
        let mut city = City::new(Bounds::new(Vec2::ZERO, Vec2::new(1000.0, 1000.0)));
        city.districts.push(District {
            id: 1,
            primary_axiom_id: -1,
            secondary_axiom_id: -1,
            district_type: DistrictType::Mixed,
            border: vec![
                Vec2::new(0.0, 0.0),
                Vec2::new(1000.0, 0.0),
                Vec2::new(1000.0, 1000.0),
                Vec2::new(0.0, 1000.0),
                Vec2::new(0.0, 0.0),
            ],
            orientation: Vec2::X,
        });
        let field = DistrictField {
            width: 1,
            height: 1,
            origin: Vec2::ZERO,
            cell_size: Vec2::new(1000.0, 1000.0),
            district_ids: vec![1],
        };
        (city, field)
    }

    fn block_settings(params: &CityParams) -> BlockSettings {
        let mr = params.merge_radius.max(0.0);
        BlockSettings {
            min_area: (0.02 * mr * mr).max(0.05),
            max_area: 1e8,
            merge_radius: params.merge_radius,
            snap_tolerance_factor: params.block_snap_tolerance_factor,
            verbose: params.verbose_block_diagnostics,
            ..BlockSettings::default()
        }
    }

    #[test]
    fn legacy_mode_finds_the_square_face() {
        let params = CityParams::default();
        let (mut city, field) = one_district_city();
        square_streets(&mut city);
        let out = generate(&params, &city, &UserPlacedInputs::default(), &field, &block_settings(&params));

        // An isolated loop yields the bounded face plus the outer frame;
        // the frame neither touches bounds nor dwarfs the other face, so
        // the guard keeps both.
        assert_eq!(out.stats.valid_blocks, 2, "stats: {:?}", out.stats);
        for block in &out.polygons {
            assert!(block.outer.len() >= 4);
            assert_eq!(block.outer.first(), block.outer.last());
            let area = polygon::polygon_area(&block.outer);
            assert!((area - 640_000.0).abs() < 1000.0, "area was {area}");
            assert_eq!(block.district_id, 1);
        }
    }

    #[test]
    fn unguarded_largest_face_removal_leaves_one_block() {
        let params = CityParams::default();
        let (mut city, field) = one_district_city();
        square_streets(&mut city);
        let settings = BlockSettings {
            guard_largest_face_removal: false,
            ..block_settings(&params)
        };
        let out = generate(&params, &city, &UserPlacedInputs::default(), &field, &settings);
        assert_eq!(out.stats.valid_blocks, 1, "stats: {:?}", out.stats);
    }

    #[test]
    fn engine_mode_finds_the_square_block() {
        let mut params = CityParams::default();
        params.block_gen_mode = BlockGenMode::PolygonEngine;
        let (mut city, field) = one_district_city();
        square_streets(&mut city);
        let out = generate(&params, &city, &UserPlacedInputs::default(), &field, &block_settings(&params));

        assert_eq!(out.stats.valid_blocks, 1, "stats: {:?}", out.stats);
        let block = &out.polygons[0];
        let area = polygon::polygon_area(&block.outer);
        assert!((area - 640_000.0).abs() < 5000.0, "area was {area}");
    }

    #[test]
    fn non_closure_roads_keep_faces_but_not_blocks() {
        let mut params = CityParams::default();
        // Streets no longer close blocks; the face is still recorded.
        params.block_closure[RoadType::Street.index()] = false;
        let (mut city, field) = one_district_city();
        square_streets(&mut city);
        let out = generate(&params, &city, &UserPlacedInputs::default(), &field, &block_settings(&params));

        // Fallback kicks in: the district border becomes the block.
        assert_eq!(out.polygons.len(), 1);
        let area = polygon::polygon_area(&out.polygons[0].outer);
        assert!((area - 1_000_000.0).abs() < 1e-6);
    }

    #[test]
    fn no_roads_falls_back_to_district_borders() {
        let params = CityParams::default();
        let (city, field) = one_district_city();
        let out = generate(&params, &city, &UserPlacedInputs::default(), &field, &block_settings(&params));
        assert_eq!(out.polygons.len(), 1);
        assert_eq!(out.polygons[0].district_id, 1);
        assert_eq!(out.stats.valid_blocks, 1);
    }

    #[test]
    fn user_roads_participate_in_blocks() {
        let params = CityParams::default();
        let (mut city, field) = one_district_city();
        // Three sides generated, the fourth drawn by the user.
        let corners = [
            Vec2::new(100.0, 100.0),
            Vec2::new(900.0, 100.0),
            Vec2::new(900.0, 900.0),
            Vec2::new(100.0, 900.0),
        ];
        for i in 0..3 {
            city.roads_by_type[RoadType::Street.index()].push(Polyline::new(vec![
                corners[i],
                corners[(i + 1) % 4],
            ]));
        }
        let user = UserPlacedInputs {
            roads: vec![crate::model::UserRoadInput {
                points: vec![corners[3], corners[0]],
                road_type: RoadType::Street,
                source_generated_id: -1,
            }],
            ..UserPlacedInputs::default()
        };
        let out = generate(&params, &city, &user, &field, &block_settings(&params));
        assert!(out.stats.valid_blocks >= 1, "stats: {:?}", out.stats);
        let area = polygon::polygon_area(&out.polygons[0].outer);
        assert!((area - 640_000.0).abs() < 1000.0);
    }

    #[test]
    fn sanitize_collapses_duplicates_and_colinear_runs() {
        let line = vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(0.0, 0.0),
            Vec2::new(5.0, 0.0),
            Vec2::new(10.0, 0.0),
            Vec2::new(10.0, 10.0),
        ];
        let cleaned = sanitize_polyline(&line, 0.4);
        assert_eq!(
            cleaned,
            vec![Vec2::new(0.0, 0.0), Vec2::new(10.0, 0.0), Vec2::new(10.0, 10.0)]
        );
    }

    #[test]
    fn near_miss_endpoints_get_projected() {
        // A T-junction that misses the bar by 3 units.
        let mut segments = vec![
            Segment {
                a: Vec2::new(0.0, 0.0),
                b: Vec2::new(100.0, 0.0),
                closure: true,
            },
            Segment {
                a: Vec2::new(50.0, 3.0),
                b: Vec2::new(50.0, 100.0),
                closure: true,
            },
        ];
        let adjusted = snap_endpoints_to_segments(&mut segments, 5.0, 1.0);
        assert_eq!(adjusted, 1);
        assert!((segments[1].a - Vec2::new(50.0, 0.0)).length() < 1e-9);
    }
}
