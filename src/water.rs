//! Coastline and river generation.
//!
//! Both features are streamlines traced through the tensor field with a
//! noise overlay, accepted only when they span the bounds edge to edge.
//! The coast clips the bounds rectangle into a sea polygon; the river is
//! inflated into a footprint and split into two bank polylines. The sea
//! and river polygons are installed on the field as land masks.

use log::{debug, info};

use crate::config::CityParams;
use crate::integrator::Rk4Integrator;
use crate::model::{set_length, Polyline, Vec2};
use crate::polygon;
use crate::rng::DetRng;
use crate::streamline::{StreamlineGenerator, StreamlineParams};
use crate::tensor::TensorField;

const TRIES: u32 = 100;

pub struct WaterGenerator {
    gen: StreamlineGenerator,
    origin: Vec2,
    world_dimensions: Vec2,
    dstep: f64,
    coast_noise: (bool, f64, f64),
    river_noise: (bool, f64, f64),
    river_size: f64,
    river_bank_size: f64,

    coastline: Vec<Vec2>,
    coastline_major: bool,
    sea_poly: Vec<Vec2>,
    river_poly: Vec<Vec2>,
    river_secondary: Vec<Vec2>,
}

impl WaterGenerator {
    pub fn new(params: &CityParams) -> Self {
        let w = &params.water;
        let sp = StreamlineParams {
            dsep: w.dsep,
            dtest: w.dtest,
            dstep: w.dstep,
            dcirclejoin: w.dcirclejoin,
            dlookahead: w.dlookahead,
            joinangle: w.joinangle,
            path_iterations: w.path_iterations,
            seed_tries: w.seed_tries,
            simplify_tolerance: w.simplify_tolerance,
            collide_early: w.collide_early,
        };
        let origin = Vec2::ZERO;
        let dims = Vec2::new(params.width, params.height);
        Self {
            gen: StreamlineGenerator::new(origin, dims, sp, DetRng::new(params.seed)),
            origin,
            world_dimensions: dims,
            dstep: w.dstep,
            coast_noise: (w.coast_noise.enabled, w.coast_noise.angle, w.coast_noise.size),
            river_noise: (w.river_noise.enabled, w.river_noise.angle, w.river_noise.size),
            river_size: w.river_size,
            river_bank_size: w.river_bank_size,
            coastline: Vec::new(),
            coastline_major: true,
            sea_poly: Vec::new(),
            river_poly: Vec::new(),
            river_secondary: Vec::new(),
        }
    }

    pub fn sea_polygon(&self) -> &[Vec2] {
        &self.sea_poly
    }

    pub fn river_polygon(&self) -> &[Vec2] {
        &self.river_poly
    }

    pub fn river_secondary_bank(&self) -> &[Vec2] {
        &self.river_secondary
    }

    /// Trace the coastline and install the sea polygon on the field.
    pub fn create_coast(&mut self, field: &mut TensorField) {
        debug!("water: coast start");
        let (noise_on, noise_angle, noise_size) = self.coast_noise;

        let (coast, major) = field.with_overrides(|f| {
            if noise_on {
                f.enable_global_noise(noise_angle, noise_size);
            }
            let mut coast = Vec::new();
            let mut major = true;
            for _ in 0..TRIES {
                major = self.gen.rng_mut().uniform() < 0.5;
                let integ = Rk4Integrator::new(f, self.dstep);
                let line = match self.gen.get_seed(&integ, major) {
                    Some(seed) => self.gen.integrate_streamline(&integ, seed, major),
                    None => Vec::new(),
                };
                coast = self.extend_streamline(line);
                if self.reaches_edges(&coast) {
                    break;
                }
            }
            (coast, major)
        });

        self.coastline = coast.clone();
        self.coastline_major = major;

        let road = self.gen.simplify_streamline(&coast);
        self.sea_poly = polygon::line_rectangle_polygon_intersection(
            self.origin,
            self.world_dimensions,
            &road,
        );
        self.gen.all_streamlines_simple.push(road.clone());
        field.sea = self.sea_poly.clone();

        let complex = self.gen.complexify_streamline(&road);
        self.gen.grid_mut(major).add_polyline(&complex);
        self.gen.streamlines_mut(major).push(complex.clone());
        self.gen.all_streamlines.push(complex);
        debug!("water: coast done, {} points", self.coastline.len());
    }

    /// Trace the river in the opposite directionality, split it into two
    /// banks, and install the river mask.
    pub fn create_river(&mut self, field: &mut TensorField) {
        debug!("water: river start");
        let major = !self.coastline_major;
        let (noise_on, noise_angle, noise_size) = self.river_noise;

        // The sea must not mask seeds while the river is traced; the
        // override scope restores it afterwards.
        let river = field.with_overrides(|f| {
            f.sea.clear();
            if noise_on {
                f.enable_global_noise(noise_angle, noise_size);
            }
            let mut river = Vec::new();
            for _ in 0..TRIES {
                let integ = Rk4Integrator::new(f, self.dstep);
                let line = match self.gen.get_seed(&integ, major) {
                    Some(seed) => self.gen.integrate_streamline(&integ, seed, major),
                    None => Vec::new(),
                };
                river = self.extend_streamline(line);
                if self.reaches_edges(&river) {
                    break;
                }
            }
            river
        });

        // Footprint grows outward by the river size; the water polygon is
        // narrower by the bank width so roads can run along the shore.
        let mut expanded_noisy =
            self.gen.complexify_streamline(&polygon::resize_geometry(&river, self.river_size));
        self.river_poly = polygon::resize_geometry(&river, self.river_size - self.river_bank_size);

        // Rotate so the footprint starts off-screen.
        if let Some(off) = expanded_noisy.iter().position(|&v| self.off_screen(v)) {
            expanded_noisy.rotate_left(off);
        }

        let river_split_poly = polygon::line_rectangle_polygon_intersection(
            self.origin,
            self.world_dimensions,
            &river,
        );
        let mut road1 = Vec::new();
        let mut road2 = Vec::new();
        for &v in &expanded_noisy {
            if polygon::inside_polygon(v, &self.sea_poly) || self.off_screen(v) {
                continue;
            }
            if polygon::inside_polygon(v, &river_split_poly) {
                road1.push(v);
            } else {
                road2.push(v);
            }
        }
        if road1.is_empty() || road2.is_empty() {
            return;
        }

        let road1_simple = self.gen.simplify_streamline(&road1);
        let mut road2_simple = self.gen.simplify_streamline(&road2);
        // Keep the two banks running in the same direction.
        if road1[0].distance_squared(road2[0]) < road1[0].distance_squared(road2[road2.len() - 1]) {
            road2_simple.reverse();
        }

        field.river = road1_simple.clone();
        self.river_secondary = road2_simple;

        self.gen.all_streamlines_simple.push(road1_simple);
        self.gen.grid_mut(major).add_polyline(&road1);
        self.gen.grid_mut(major).add_polyline(&road2);
        self.gen.streamlines_mut(major).push(road1.clone());
        self.gen.streamlines_mut(major).push(road2.clone());
        self.gen.all_streamlines.push(road1);
        self.gen.all_streamlines.push(road2);
        debug!(
            "water: river done, primary={} secondary={}",
            field.river.len(),
            self.river_secondary.len()
        );
    }

    /// Push both ends outward along their tangents so edge-reaching lines
    /// actually cross the bounds.
    fn extend_streamline(&self, mut line: Vec<Vec2>) -> Vec<Vec2> {
        if line.len() < 2 {
            return line;
        }
        let head = line[0] + set_length(line[0] - line[1], self.dstep * 5.0);
        let tail = line[line.len() - 1]
            + set_length(line[line.len() - 1] - line[line.len() - 2], self.dstep * 5.0);
        line.insert(0, head);
        line.push(tail);
        line
    }

    fn reaches_edges(&self, line: &[Vec2]) -> bool {
        match (line.first(), line.last()) {
            (Some(&a), Some(&b)) => self.off_screen(a) && self.off_screen(b),
            _ => false,
        }
    }

    fn off_screen(&self, v: Vec2) -> bool {
        let to_origin = v - self.origin;
        to_origin.x <= 0.0
            || to_origin.y <= 0.0
            || to_origin.x >= self.world_dimensions.x
            || to_origin.y >= self.world_dimensions.y
    }
}

/// Run coast and river generation, install masks on `field`, and return
/// the water polylines (sea polygon, river polygon, secondary bank).
pub fn generate_water(params: &CityParams, field: &mut TensorField) -> Vec<Polyline> {
    info!("water: start, seed={}", params.seed);
    let mut gen = WaterGenerator::new(params);
    gen.create_coast(field);
    gen.create_river(field);

    let mut out = Vec::new();
    if !gen.sea_polygon().is_empty() {
        out.push(Polyline::new(gen.sea_polygon().to_vec()));
    }
    if !gen.river_polygon().is_empty() {
        out.push(Polyline::new(gen.river_polygon().to_vec()));
    }
    if !gen.river_secondary_bank().is_empty() {
        out.push(Polyline::new(gen.river_secondary_bank().to_vec()));
    }
    info!("water: done, {} polylines", out.len());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::TensorField;

    #[test]
    fn water_installs_masks_and_emits_polylines() {
        let params = CityParams::default();
        let mut field = TensorField::from_axioms(&params, &[]);
        let water = generate_water(&params, &mut field);

        assert!(!water.is_empty());
        assert!(!field.sea.is_empty());
        // The sea polygon keeps the smaller side of the bounds.
        let sea_area = polygon::polygon_area(&field.sea);
        assert!(sea_area > 0.0);
        assert!(sea_area <= 0.5 * params.width * params.height + 1e-6);
    }

    #[test]
    fn water_generation_is_deterministic() {
        let params = CityParams::default();
        let mut field_a = TensorField::from_axioms(&params, &[]);
        let mut field_b = TensorField::from_axioms(&params, &[]);
        let a = generate_water(&params, &mut field_a);
        let b = generate_water(&params, &mut field_b);
        assert_eq!(a.len(), b.len());
        for (pa, pb) in a.iter().zip(b.iter()) {
            assert_eq!(pa.points, pb.points);
        }
    }

    #[test]
    fn extended_line_reaches_past_edges() {
        let params = CityParams::default();
        let gen = WaterGenerator::new(&params);
        let line: Vec<Vec2> = (0..=200)
            .map(|i| Vec2::new(i as f64 * 5.0, 500.0))
            .collect();
        let extended = gen.extend_streamline(line);
        assert!(gen.reaches_edges(&extended));
    }
}
