//! Planar graph over streamline polylines.
//!
//! Splits input lines into segments, finds pairwise intersections,
//! merges nearby endpoints into nodes, and exposes the angle-ordered
//! face walk that recovers every bounded face of the arrangement.
//! Adjacency is index-based on purpose: neighbour lists get re-sorted by
//! angle per node.

use crate::model::Vec2;
use crate::polygon;

#[derive(Clone, Debug)]
pub struct GraphNode {
    pub value: Vec2,
    pub adj: Vec<usize>,
}

#[derive(Clone, Debug)]
pub struct Graph {
    pub nodes: Vec<GraphNode>,
    pub intersections: Vec<Vec2>,
    merge_radius: f64,
}

impl Graph {
    /// Build the planar graph of `streamlines` with node merge radius
    /// `max(0.001, 0.25 * dstep)`. With `delete_dangling`, degree <= 1
    /// nodes are removed iteratively.
    pub fn new(streamlines: &[Vec<Vec2>], dstep: f64, delete_dangling: bool) -> Self {
        let mut graph = Self {
            nodes: Vec::new(),
            intersections: Vec::new(),
            merge_radius: (dstep * 0.25).max(0.001),
        };

        let mut segments: Vec<(Vec2, Vec2)> = Vec::new();
        for line in streamlines {
            for w in line.windows(2) {
                segments.push((w[0], w[1]));
            }
        }

        for i in 0..segments.len() {
            for j in i + 1..segments.len() {
                if let Some(inter) = polygon::segment_intersection(
                    segments[i].0,
                    segments[i].1,
                    segments[j].0,
                    segments[j].1,
                ) {
                    graph.intersections.push(inter);
                }
            }
        }

        for line in streamlines {
            if line.is_empty() {
                continue;
            }
            let mut points = line.clone();
            // Insert every intersection that lies on one of this line's
            // segments (colinear cross, projection within the segment).
            for &inter in &graph.intersections {
                for w in line.windows(2) {
                    let c = (w[1].x - w[0].x) * (inter.y - w[0].y)
                        - (w[1].y - w[0].y) * (inter.x - w[0].x);
                    if c.abs() < 1e-6 {
                        let dot1 = (inter - w[0]).dot(w[1] - w[0]);
                        let dot2 = (inter - w[1]).dot(w[0] - w[1]);
                        if dot1 >= 0.0 && dot2 >= 0.0 {
                            points.push(inter);
                        }
                    }
                }
            }

            let front = line[0];
            points.sort_by(|a, b| {
                a.distance_squared(front).total_cmp(&b.distance_squared(front))
            });

            let mut prev: Option<usize> = None;
            for &p in &points {
                let idx = graph.add_or_get_node(p);
                if let Some(prev_idx) = prev {
                    if prev_idx != idx && !graph.nodes[prev_idx].adj.contains(&idx) {
                        graph.nodes[prev_idx].adj.push(idx);
                        graph.nodes[idx].adj.push(prev_idx);
                    }
                }
                prev = Some(idx);
            }
        }

        if delete_dangling {
            graph.remove_dangling();
        }
        graph
    }

    fn add_or_get_node(&mut self, p: Vec2) -> usize {
        let merge_sq = self.merge_radius * self.merge_radius;
        for (i, node) in self.nodes.iter().enumerate() {
            if p.distance_squared(node.value) <= merge_sq {
                return i;
            }
        }
        self.nodes.push(GraphNode {
            value: p,
            adj: Vec::new(),
        });
        self.nodes.len() - 1
    }

    fn remove_dangling(&mut self) {
        let mut changed = true;
        while changed {
            changed = false;
            let mut i = 0;
            while i < self.nodes.len() {
                if self.nodes[i].adj.len() <= 1 {
                    let adj = self.nodes[i].adj.clone();
                    for a in adj {
                        self.nodes[a].adj.retain(|&v| v != i);
                    }
                    self.nodes.remove(i);
                    for node in &mut self.nodes {
                        for v in &mut node.adj {
                            if *v > i {
                                *v -= 1;
                            }
                        }
                    }
                    changed = true;
                } else {
                    i += 1;
                }
            }
        }
    }

    /// Degree of every node.
    pub fn degrees(&self) -> Vec<usize> {
        self.nodes.iter().map(|n| n.adj.len()).collect()
    }

    /// BFS connected-component labels and the component count.
    pub fn components(&self) -> (Vec<usize>, usize) {
        let n = self.nodes.len();
        let mut labels = vec![usize::MAX; n];
        let mut current = 0;
        for start in 0..n {
            if labels[start] != usize::MAX {
                continue;
            }
            labels[start] = current;
            let mut queue = vec![start];
            while let Some(v) = queue.pop() {
                for &nb in &self.nodes[v].adj {
                    if nb < n && labels[nb] == usize::MAX {
                        labels[nb] = current;
                        queue.push(nb);
                    }
                }
            }
            current += 1;
        }
        (labels, current)
    }
}

/// Neighbours of `node` ordered by angle around it.
pub(crate) fn sort_neighbors_by_angle(node: &GraphNode, nodes: &[GraphNode]) -> Vec<usize> {
    let mut angles: Vec<(f64, usize)> = node
        .adj
        .iter()
        .map(|&nb| {
            let d = nodes[nb].value - node.value;
            (d.y.atan2(d.x), nb)
        })
        .collect();
    angles.sort_by(|a, b| a.0.total_cmp(&b.0));
    angles.into_iter().map(|(_, nb)| nb).collect()
}

/// Next neighbour one step counter-clockwise of the incoming edge.
pub(crate) fn next_edge_ccw(from: usize, current: usize, sorted_adj: &[Vec<usize>]) -> Option<usize> {
    let neighbors = &sorted_adj[current];
    if neighbors.is_empty() {
        return None;
    }
    if neighbors.len() == 1 {
        return Some(neighbors[0]);
    }
    let from_idx = neighbors.iter().position(|&n| n == from)?;
    let next_idx = (from_idx + neighbors.len() - 1) % neighbors.len();
    Some(neighbors[next_idx])
}

/// Minimal faces of the planar graph whose area magnitude falls inside
/// `[min_area, max_area]`. Rings come back closed.
pub fn find_faces(nodes: &[GraphNode], min_area: f64, max_area: f64) -> Vec<Vec<Vec2>> {
    let n = nodes.len();
    if n < 3 {
        return Vec::new();
    }

    let sorted_adj: Vec<Vec<usize>> = nodes
        .iter()
        .map(|node| sort_neighbors_by_angle(node, nodes))
        .collect();

    let edge_key = |from: usize, to: usize| -> u64 { ((from as u64) << 32) | to as u64 };
    let mut used_edges = std::collections::HashSet::new();
    let mut polygons = Vec::new();

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
                let mut poly: Vec<Vec2> = face.iter().map(|&i| nodes[i].value).collect();
                let area = polygon::polygon_area(&poly);
                if area >= min_area && area <= max_area {
                    poly.push(poly[0]);
                    polygons.push(poly);
                }
            }
        }
    }
    polygons
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cross_lines() -> Vec<Vec<Vec2>> {
        vec![
            vec![Vec2::new(-10.0, 0.0), Vec2::new(10.0, 0.0)],
            vec![Vec2::new(0.0, -10.0), Vec2::new(0.0, 10.0)],
        ]
    }

    #[test]
    fn crossing_creates_intersection_node() {
        let graph = Graph::new(&cross_lines(), 1.0, false);
        assert_eq!(graph.intersections.len(), 1);
        // 4 endpoints + 1 crossing.
        assert_eq!(graph.nodes.len(), 5);
        let degrees = graph.degrees();
        assert_eq!(degrees.iter().filter(|&&d| d == 4).count(), 1);
        assert_eq!(degrees.iter().filter(|&&d| d == 1).count(), 4);
    }

    #[test]
    fn dangling_removal_eats_open_lines() {
        // A plus sign has no cycles; everything dangles away.
        let graph = Graph::new(&cross_lines(), 1.0, true);
        assert!(graph.nodes.is_empty());
    }

    #[test]
    fn face_walk_finds_the_square() {
        let square = vec![
            vec![Vec2::new(0.0, 0.0), Vec2::new(10.0, 0.0)],
            vec![Vec2::new(10.0, 0.0), Vec2::new(10.0, 10.0)],
            vec![Vec2::new(10.0, 10.0), Vec2::new(0.0, 10.0)],
            vec![Vec2::new(0.0, 10.0), Vec2::new(0.0, 0.0)],
        ];
        let graph = Graph::new(&square, 1.0, true);
        assert_eq!(graph.nodes.len(), 4);
        let faces = find_faces(&graph.nodes, 1.0, 1e8);
        assert!(!faces.is_empty());
        let areas: Vec<f64> = faces.iter().map(|f| polygon::polygon_area(f)).collect();
        assert!(areas.iter().any(|a| (a - 100.0).abs() < 1e-6), "{areas:?}");
    }

    #[test]
    fn components_count_disconnected_pieces() {
        let lines = vec![
            vec![Vec2::new(0.0, 0.0), Vec2::new(10.0, 0.0)],
            vec![Vec2::new(100.0, 100.0), Vec2::new(110.0, 100.0)],
        ];
        let graph = Graph::new(&lines, 1.0, false);
        let (_, count) = graph.components();
        assert_eq!(count, 2);
    }
}
