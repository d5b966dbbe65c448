//! Road network generation.
//!
//! Draws road classes in rank order, seeding every class's separation
//! grids with all higher-rank roads and the water polylines so lower
//! classes fill the gaps. Accepted lines are kept twice: simplified
//! polylines for rendering and graph-derived 2-point segments with
//! stable ids. A final rules pass rebuilds a merged node structure over
//! all segments and enforces per-class edge rules.

use log::{debug, info};
use petgraph::graph::{NodeIndex, UnGraph};
use smallvec::SmallVec;

use crate::config::{CityParams, RoadClassParams};
use crate::graph::Graph;
use crate::grid::GridStorage;
use crate::integrator::{FieldIntegrator, Rk4Integrator};
use crate::model::{City, IdGen, Polyline, Road, RoadType, Vec2};
use crate::polygon;
use crate::rng::DetRng;
use crate::streamline::{StreamlineGenerator, StreamlineParams};
use crate::tensor::TensorField;

fn class_params(p: &RoadClassParams) -> StreamlineParams {
    StreamlineParams {
        dsep: p.dsep,
        dtest: p.dtest,
        dstep: p.dstep,
        dcirclejoin: p.dcirclejoin,
        dlookahead: p.dlookahead,
        joinangle: p.joinangle,
        path_iterations: p.path_iterations,
        seed_tries: p.seed_tries,
        simplify_tolerance: p.simplify_tolerance,
        collide_early: p.collide_early,
    }
}

fn seed_water_into_grids(gen: &mut StreamlineGenerator, water: &[Polyline]) {
    for line in water {
        gen.grid_mut(true).add_polyline(&line.points);
    }
    for line in water {
        gen.grid_mut(false).add_polyline(&line.points);
    }
}

/// Seed and trace streamlines until `max_lines` or the first failed
/// seed; returns the simplified lines.
fn generate_tier(
    gen: &mut StreamlineGenerator,
    integ: &dyn FieldIntegrator,
    major_direction: bool,
    max_lines: u32,
) -> Vec<Vec<Vec2>> {
    let mut lines = Vec::new();
    for _ in 0..max_lines {
        let Some(seed) = gen.get_seed(integ, major_direction) else {
            break;
        };
        let line = gen.integrate_streamline(integ, seed, major_direction);
        if line.len() < 2 {
            break;
        }
        lines.push(gen.record_streamline(line, major_direction));
    }
    lines
}

fn min_distance_sq_to_line(p: Vec2, line: &[Vec2]) -> f64 {
    match line.len() {
        0 => f64::MAX,
        1 => p.distance_squared(line[0]),
        _ => {
            let mut min_sq = f64::MAX;
            for w in line.windows(2) {
                let d = polygon::distance_to_segment(p, w[0], w[1]);
                min_sq = min_sq.min(d * d);
            }
            min_sq
        }
    }
}

/// A line is too close when at least 60% of up to 16 evenly spaced
/// samples sit within `min_distance` of a previously accepted line.
fn is_line_too_close(candidate: &[Vec2], existing: &[Vec<Vec2>], min_distance: f64) -> bool {
    if existing.is_empty() || candidate.len() < 2 {
        return false;
    }
    let min_dist_sq = min_distance * min_distance;
    let step = (candidate.len() / 16).max(1);
    let mut sample_count = 0usize;
    let mut close_count = 0usize;
    for pt in candidate.iter().step_by(step) {
        let mut best_sq = f64::MAX;
        for line in existing {
            best_sq = best_sq.min(min_distance_sq_to_line(*pt, line));
            if best_sq <= min_dist_sq {
                break;
            }
        }
        sample_count += 1;
        if best_sq <= min_dist_sq {
            close_count += 1;
        }
    }
    if sample_count == 0 {
        return false;
    }
    close_count as f64 / sample_count as f64 >= 0.6
}

fn filter_lines_by_proximity(
    candidates: Vec<Vec<Vec2>>,
    existing: &[Vec<Vec2>],
    min_distance: f64,
) -> Vec<Vec<Vec2>> {
    let mut accepted: Vec<Vec<Vec2>> = existing.to_vec();
    let mut filtered = Vec::new();
    for line in candidates {
        if is_line_too_close(&line, &accepted, min_distance) {
            continue;
        }
        accepted.push(line.clone());
        filtered.push(line);
    }
    filtered
}

/// Emit each unique undirected graph edge over `lines` as a segment
/// road, stopping at `limit` edges. Returns the number emitted.
fn append_segment_roads(
    lines: &[Vec<Vec2>],
    dstep: f64,
    road_type: RoadType,
    delete_dangling: bool,
    limit: u32,
    ids: &mut IdGen,
    out: &mut Vec<Road>,
) -> u32 {
    let graph = Graph::new(lines, dstep, delete_dangling);
    let mut seen = std::collections::HashSet::new();
    let mut added = 0u32;
    for (i, node) in graph.nodes.iter().enumerate() {
        for &adj in &node.adj {
            let (a, b) = (i.min(adj), i.max(adj));
            if !seen.insert((a, b)) {
                continue;
            }
            if added >= limit {
                return added;
            }
            out.push(Road {
                points: SmallVec::from_slice(&[graph.nodes[a].value, graph.nodes[b].value]),
                road_type,
                id: ids.next(),
                is_user_created: road_type.is_user_type(),
            });
            added += 1;
        }
    }
    added
}

#[derive(Clone, Copy)]
struct RuleEdge {
    a: Vec2,
    b: Vec2,
    road_type: RoadType,
}

/// Merged node structure over rule edges: graph, per-edge endpoints, and
/// the road-class bitmask touching each node.
fn build_rule_graph(
    edges: &[RuleEdge],
    merge_radius: f64,
) -> (UnGraph<Vec2, usize>, Vec<(NodeIndex, NodeIndex)>, Vec<u32>) {
    let mut graph: UnGraph<Vec2, usize> = UnGraph::new_undirected();
    let mut positions: Vec<(NodeIndex, Vec2)> = Vec::new();
    let merge_sq = merge_radius * merge_radius;

    let find_or_add = |graph: &mut UnGraph<Vec2, usize>,
                       positions: &mut Vec<(NodeIndex, Vec2)>,
                       p: Vec2| {
        for &(idx, pos) in positions.iter() {
            if p.distance_squared(pos) <= merge_sq {
                return idx;
            }
        }
        let idx = graph.add_node(p);
        positions.push((idx, p));
        idx
    };

    let mut endpoints = Vec::with_capacity(edges.len());
    for (i, edge) in edges.iter().enumerate() {
        let a = find_or_add(&mut graph, &mut positions, edge.a);
        let b = find_or_add(&mut graph, &mut positions, edge.b);
        graph.add_edge(a, b, i);
        endpoints.push((a, b));
    }

    let mut masks = vec![0u32; graph.node_count()];
    for (i, edge) in edges.iter().enumerate() {
        let (a, b) = endpoints[i];
        masks[a.index()] |= edge.road_type.bit();
        masks[b.index()] |= edge.road_type.bit();
    }
    (graph, endpoints, masks)
}

/// Post-pass over all segment roads: drop disabled classes, enforce edge
/// length bounds and intersection masks, then iteratively apply the
/// dead-end rules until stable. Surviving edges are renumbered from 1.
fn apply_graph_rules(city: &mut City, params: &CityParams) {
    let mut edges: Vec<RuleEdge> = Vec::new();
    for ty in RoadType::GENERATED_ORDER {
        for seg in &city.segment_roads_by_type[ty.index()] {
            if seg.points.len() >= 2 {
                edges.push(RuleEdge {
                    a: seg.points[0],
                    b: seg.points[seg.points.len() - 1],
                    road_type: ty,
                });
            }
        }
    }
    if edges.is_empty() {
        return;
    }

    let merge_radius = 1.0;
    let (_, endpoints, masks) = build_rule_graph(&edges, merge_radius);

    let mut filtered = Vec::with_capacity(edges.len());
    for (i, edge) in edges.iter().enumerate() {
        let tp = &params.road_type_params[edge.road_type.index()];
        if !tp.enabled {
            continue;
        }
        let len = edge.a.distance(edge.b);
        if tp.min_edge_length > 0.0 && len < tp.min_edge_length {
            continue;
        }
        if tp.max_edge_length > 0.0 && len > tp.max_edge_length {
            continue;
        }
        let (a, b) = endpoints[i];
        let allow = tp.allow_intersections_mask | edge.road_type.bit();
        if masks[a.index()] & !allow != 0 || masks[b.index()] & !allow != 0 {
            continue;
        }
        filtered.push(*edge);
    }
    let mut edges = filtered;

    while !edges.is_empty() {
        let (graph, endpoints, _) = build_rule_graph(&edges, merge_radius);
        let mut changed = false;
        let mut kept = Vec::with_capacity(edges.len());
        for (i, edge) in edges.iter().enumerate() {
            let tp = &params.road_type_params[edge.road_type.index()];
            let (a, b) = endpoints[i];
            let deg_a = graph.edges(a).count();
            let deg_b = graph.edges(b).count();
            let is_dead_end = deg_a <= 1 || deg_b <= 1;

            if !tp.allow_dead_ends && is_dead_end {
                changed = true;
                continue;
            }
            if tp.require_dead_end && !is_dead_end {
                changed = true;
                continue;
            }
            kept.push(*edge);
        }
        edges = kept;
        if !changed {
            break;
        }
    }

    for ty in RoadType::GENERATED_ORDER {
        city.segment_roads_by_type[ty.index()].clear();
    }
    let mut next_id = 1u32;
    for edge in &edges {
        city.segment_roads_by_type[edge.road_type.index()].push(Road {
            points: SmallVec::from_slice(&[edge.a, edge.b]),
            road_type: edge.road_type,
            id: next_id,
            is_user_created: edge.road_type.is_user_type(),
        });
        next_id = next_id.saturating_add(1);
    }
}

/// Generate every enabled road class against `field` and `water`,
/// filling both road forms on `city`. The total and major-group budgets
/// cap the emitted segment roads. Returns the segment id generator so
/// the caller can check for overflow.
pub fn generate_roads(
    params: &CityParams,
    field: &TensorField,
    water: &[Polyline],
    city: &mut City,
) -> IdGen {
    info!(
        "roads: start {}x{} max_major={} max_total={}",
        params.width, params.height, params.max_major_roads, params.max_total_roads
    );
    let origin = Vec2::ZERO;
    let dims = Vec2::new(params.width, params.height);

    let max_major = params.max_major_roads;
    let max_total = params.max_total_roads.max(params.max_major_roads);
    let mut major_count = 0u32;
    let mut total_count = 0u32;
    let mut ids = IdGen::new();

    let mut major_grids: Vec<GridStorage> = Vec::new();
    let mut minor_grids: Vec<GridStorage> = Vec::new();
    let mut accepted_lines: Vec<Vec<Vec2>> = Vec::new();

    for (pass_index, ty) in RoadType::GENERATED_ORDER.iter().enumerate() {
        let type_params = &params.road_type_params[ty.index()];
        if !type_params.enabled {
            continue;
        }

        let sp = class_params(type_params);
        let integrator = Rk4Integrator::new(field, sp.dstep);
        let rng = DetRng::new(params.seed.wrapping_add(10 + pass_index as u32 * 17));
        let mut gen = StreamlineGenerator::new(origin, dims, sp, rng);

        for g in &major_grids {
            gen.grid_mut(true).add_all(g);
        }
        for g in &minor_grids {
            gen.grid_mut(false).add_all(g);
        }
        seed_water_into_grids(&mut gen, water);

        let estimate = (dims.x * dims.y / (sp.dsep * sp.dsep).max(1.0)) as u32;
        let raw_lines = generate_tier(&mut gen, &integrator, type_params.major_direction, estimate);
        let proximity = (sp.dsep * 0.35).max(5.0);
        let lines = filter_lines_by_proximity(raw_lines, &accepted_lines, proximity);

        debug!(
            "roads: {} filtered to {} lines (proximity {:.2})",
            ty.label(),
            lines.len(),
            proximity
        );

        if !lines.is_empty() {
            // Budgets bind the emitted segment counts; the polyline form
            // is the rendering mirror of whatever was accepted.
            let remaining_total = max_total.saturating_sub(total_count);
            let remaining_major = max_major.saturating_sub(major_count);
            let limit = if ty.is_major_group() {
                remaining_total.min(remaining_major)
            } else {
                remaining_total
            };

            if limit == 0 {
                major_grids.push(gen.grid(true).clone());
                minor_grids.push(gen.grid(false).clone());
                continue;
            }

            for line in &lines {
                if line.len() < 2 {
                    continue;
                }
                city.roads_by_type[ty.index()].push(Polyline::new(line.clone()));
            }

            let added = append_segment_roads(
                &lines,
                sp.dstep,
                *ty,
                type_params.prune_dangling,
                limit,
                &mut ids,
                &mut city.segment_roads_by_type[ty.index()],
            );
            if ty.is_major_group() {
                major_count += added;
            }
            total_count += added;

            accepted_lines.extend(lines);
        }

        major_grids.push(gen.grid(true).clone());
        minor_grids.push(gen.grid(false).clone());
    }

    apply_graph_rules(city, params);
    info!("roads: done");
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Bounds;

    fn road(ty: RoadType, a: Vec2, b: Vec2, id: u32) -> Road {
        Road {
            points: SmallVec::from_slice(&[a, b]),
            road_type: ty,
            id,
            is_user_created: false,
        }
    }

    fn city_1000() -> City {
        City::new(Bounds::new(Vec2::ZERO, Vec2::new(1000.0, 1000.0)))
    }

    #[test]
    fn proximity_filter_rejects_parallel_twin() {
        let existing: Vec<Vec<Vec2>> = vec![(0..=10)
            .map(|i| Vec2::new(i as f64 * 10.0, 0.0))
            .collect()];
        let close: Vec<Vec2> = (0..=10).map(|i| Vec2::new(i as f64 * 10.0, 2.0)).collect();
        let far: Vec<Vec2> = (0..=10).map(|i| Vec2::new(i as f64 * 10.0, 50.0)).collect();
        assert!(is_line_too_close(&close, &existing, 5.0));
        assert!(!is_line_too_close(&far, &existing, 5.0));
    }

    #[test]
    fn graph_rules_drop_disabled_classes() {
        let mut params = CityParams::default();
        params.road_type_params[RoadType::Street.index()].enabled = false;
        let mut city = city_1000();
        city.segment_roads_by_type[RoadType::Street.index()].push(road(
            RoadType::Street,
            Vec2::new(0.0, 0.0),
            Vec2::new(100.0, 0.0),
            1,
        ));
        apply_graph_rules(&mut city, &params);
        assert!(city.segment_roads_by_type[RoadType::Street.index()].is_empty());
    }

    #[test]
    fn graph_rules_enforce_edge_length_bounds() {
        let mut params = CityParams::default();
        params.road_type_params[RoadType::Street.index()].min_edge_length = 50.0;
        params.road_type_params[RoadType::Street.index()].max_edge_length = 150.0;
        let mut city = city_1000();
        // A triangle of streets keeps every node at degree 2.
        let pts = [
            Vec2::new(0.0, 0.0),
            Vec2::new(100.0, 0.0),
            Vec2::new(50.0, 80.0),
        ];
        for (i, (a, b)) in [(0, 1), (1, 2), (2, 0)].iter().enumerate() {
            city.segment_roads_by_type[RoadType::Street.index()].push(road(
                RoadType::Street,
                pts[*a],
                pts[*b],
                i as u32 + 1,
            ));
        }
        // Too short and too long edges elsewhere.
        city.segment_roads_by_type[RoadType::Street.index()].push(road(
            RoadType::Street,
            Vec2::new(500.0, 500.0),
            Vec2::new(510.0, 500.0),
            4,
        ));
        apply_graph_rules(&mut city, &params);
        let kept = &city.segment_roads_by_type[RoadType::Street.index()];
        assert_eq!(kept.len(), 3);
        let ids: Vec<u32> = kept.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn require_dead_end_drops_loop_edges() {
        let mut params = CityParams::default();
        params.road_type_params[RoadType::CulDeSac.index()].require_dead_end = true;
        let mut city = city_1000();
        let pts = [
            Vec2::new(0.0, 0.0),
            Vec2::new(100.0, 0.0),
            Vec2::new(50.0, 80.0),
        ];
        for (i, (a, b)) in [(0, 1), (1, 2), (2, 0)].iter().enumerate() {
            city.segment_roads_by_type[RoadType::CulDeSac.index()].push(road(
                RoadType::CulDeSac,
                pts[*a],
                pts[*b],
                i as u32 + 1,
            ));
        }
        apply_graph_rules(&mut city, &params);
        assert!(city.segment_roads_by_type[RoadType::CulDeSac.index()].is_empty());
    }

    #[test]
    fn full_road_generation_respects_segment_budgets() {
        let mut params = CityParams::default();
        params.max_total_roads = 50;
        params.max_major_roads = 20;
        let field = TensorField::from_axioms(&params, &[]);
        let mut city = city_1000();
        generate_roads(&params, &field, &[], &mut city);

        let total: usize = RoadType::GENERATED_ORDER
            .iter()
            .map(|t| city.segment_roads_by_type[t.index()].len())
            .sum();
        let major: usize = RoadType::GENERATED_ORDER
            .iter()
            .filter(|t| t.is_major_group())
            .map(|t| city.segment_roads_by_type[t.index()].len())
            .sum();
        assert!(total > 0, "expected some segment roads");
        assert!(total <= 50, "total segment roads {total}");
        assert!(major <= 20, "major segment roads {major}");
    }

    #[test]
    fn road_generation_is_deterministic() {
        let params = CityParams::default();
        let field = TensorField::from_axioms(&params, &[]);
        let mut a = city_1000();
        let mut b = city_1000();
        generate_roads(&params, &field, &[], &mut a);
        generate_roads(&params, &field, &[], &mut b);
        for ty in RoadType::GENERATED_ORDER {
            assert_eq!(
                a.roads_by_type[ty.index()], b.roads_by_type[ty.index()],
                "{:?}",
                ty
            );
            assert_eq!(
                a.segment_roads_by_type[ty.index()],
                b.segment_roads_by_type[ty.index()]
            );
        }
    }
}
