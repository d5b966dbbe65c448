//! Tensor field over the plane.
//!
//! Reference: Chen et al. 2008 - "Interactive Procedural Street Modeling".
//! A symmetric traceless 2x2 tensor is stored as `(r, m0, m1)` with
//! `m0 = r cos 2theta`, `m1 = r sin 2theta`; its eigenvectors give the
//! major and minor streamline directions. The field sums weighted basis
//! fields, gates on water masks, and perturbs the principal angle with a
//! deterministic sine-hash noise.

use std::f64::consts::PI;

use crate::config::CityParams;
use crate::model::{AxiomInput, AxiomType, Vec2};
use crate::polygon;

/// Deterministic pseudo-noise in roughly [-1, 1].
pub fn hash_noise(a: f64, b: f64, seed: u32) -> f64 {
    let n = (a * 12.9898 + b * 78.233 + seed as f64 * 1.234567).sin();
    (n * 43758.5453).sin()
}

/// A 2x2 symmetric traceless tensor in double-angle form.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Tensor {
    pub r: f64,
    pub m0: f64,
    pub m1: f64,
}

impl Tensor {
    pub fn new(r: f64, m0: f64, m1: f64) -> Self {
        Self { r, m0, m1 }
    }

    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    /// Unit tensor whose major direction is `theta`.
    pub fn from_angle(theta: f64) -> Self {
        Self::new(1.0, (2.0 * theta).cos(), (2.0 * theta).sin())
    }

    /// Double-angle encoding of `v`; streamlines align with `v`.
    pub fn from_vector(v: Vec2) -> Self {
        Self::new(1.0, v.x * v.x - v.y * v.y, 2.0 * v.x * v.y)
    }

    /// Component sum. With `smooth` the magnitude renormalizes to the
    /// summed component length; otherwise `r` collapses to 2 (unweighted
    /// averaging).
    pub fn add(&mut self, other: Tensor, smooth: bool) -> &mut Self {
        self.m0 = self.m0 * self.r + other.m0 * other.r;
        self.m1 = self.m1 * self.r + other.m1 * other.r;
        if smooth {
            self.r = self.m0.hypot(self.m1);
            if self.r != 0.0 {
                self.m0 /= self.r;
                self.m1 /= self.r;
            }
        } else {
            self.r = 2.0;
        }
        self
    }

    pub fn scale(mut self, s: f64) -> Self {
        self.r *= s;
        self
    }

    /// Rotate the principal angle by `theta` radians, wrapping into [0, pi).
    pub fn rotate(&mut self, theta: f64) -> &mut Self {
        if theta == 0.0 {
            return self;
        }
        let mut new_theta = self.theta() + theta;
        if new_theta < PI {
            new_theta += PI;
        }
        if new_theta >= PI {
            new_theta -= PI;
        }
        self.m0 = (2.0 * new_theta).cos() * self.r;
        self.m1 = (2.0 * new_theta).sin() * self.r;
        self
    }

    pub fn major(&self) -> Vec2 {
        if self.r == 0.0 {
            return Vec2::ZERO;
        }
        let ang = self.theta();
        Vec2::new(ang.cos(), ang.sin())
    }

    pub fn minor(&self) -> Vec2 {
        if self.r == 0.0 {
            return Vec2::ZERO;
        }
        let ang = self.theta() + PI / 2.0;
        Vec2::new(ang.cos(), ang.sin())
    }

    fn theta(&self) -> f64 {
        if self.r == 0.0 {
            0.0
        } else {
            (self.m1 / self.r).atan2(self.m0 / self.r) / 2.0
        }
    }
}

/// Terminal corner of a delta basis field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeltaTerminal {
    Top,
    BottomLeft,
    BottomRight,
}

/// Basis field shape. Grid and square share the fixed-angle tensor;
/// square weights by Chebyshev distance instead of Euclidean.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BasisKind {
    Grid { theta: f64 },
    Radial,
    Square,
    Delta { terminal: DeltaTerminal },
}

/// One summand of the tensor field.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BasisField {
    pub centre: Vec2,
    pub size: f64,
    pub decay: f64,
    pub kind: BasisKind,
}

impl BasisField {
    fn falloff(norm_dist: f64, decay: f64, smooth: bool) -> f64 {
        if smooth {
            return norm_dist.powf(-decay);
        }
        if decay == 0.0 && norm_dist >= 1.0 {
            return 0.0;
        }
        (1.0 - norm_dist).max(0.0).powf(decay)
    }

    /// Euclidean falloff weight.
    fn weight(&self, p: Vec2, smooth: bool) -> f64 {
        let norm_dist = p.distance(self.centre) / self.size;
        Self::falloff(norm_dist, self.decay, smooth)
    }

    /// Chebyshev (L-infinity) falloff weight.
    fn weight_square(&self, p: Vec2, smooth: bool) -> f64 {
        let dx = (p.x - self.centre.x).abs() / self.size;
        let dy = (p.y - self.centre.y).abs() / self.size;
        Self::falloff(dx.max(dy), self.decay, smooth)
    }

    pub fn weight_at(&self, p: Vec2, smooth: bool) -> f64 {
        match self.kind {
            BasisKind::Square => self.weight_square(p, smooth),
            _ => self.weight(p, smooth),
        }
    }

    pub fn tensor_at(&self, p: Vec2) -> Tensor {
        match self.kind {
            BasisKind::Grid { theta } => Tensor::new(1.0, (2.0 * theta).cos(), (2.0 * theta).sin()),
            // Principal axis tangent to circles around the centre.
            BasisKind::Radial => {
                let t = p - self.centre;
                Tensor::new(1.0, t.y * t.y - t.x * t.x, -2.0 * t.x * t.y)
            }
            BasisKind::Square => Tensor::new(1.0, 1.0, 0.0),
            BasisKind::Delta { terminal } => {
                let to_terminal = self.terminal_point(terminal) - p;
                if to_terminal.length() < 1e-6 {
                    Tensor::zero()
                } else {
                    Tensor::from_vector(to_terminal)
                }
            }
        }
    }

    pub fn weighted_tensor(&self, p: Vec2, smooth: bool) -> Tensor {
        self.tensor_at(p).scale(self.weight_at(p, smooth))
    }

    fn terminal_point(&self, terminal: DeltaTerminal) -> Vec2 {
        match terminal {
            DeltaTerminal::Top => Vec2::new(self.centre.x, self.centre.y - self.size),
            DeltaTerminal::BottomLeft => {
                Vec2::new(self.centre.x - self.size, self.centre.y + self.size)
            }
            DeltaTerminal::BottomRight => {
                Vec2::new(self.centre.x + self.size, self.centre.y + self.size)
            }
        }
    }
}

/// Rotational noise knobs for parks and the whole field.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct NoiseParams {
    pub global_noise: bool,
    pub noise_size_park: f64,
    pub noise_angle_park: f64,
    pub noise_size_global: f64,
    pub noise_angle_global: f64,
}

/// Composite tensor field: basis fields, water/park masks, noise overlay.
#[derive(Clone, Debug, Default)]
pub struct TensorField {
    basis_fields: Vec<BasisField>,
    pub noise: NoiseParams,
    pub smooth: bool,
    pub seed: u32,
    /// Park polygons; points inside get the park noise rotation.
    pub parks: Vec<Vec<Vec2>>,
    /// Sea polygon; points inside are not on land.
    pub sea: Vec<Vec2>,
    /// River polygon; ignored when `ignore_river` is set.
    pub river: Vec<Vec2>,
    pub ignore_river: bool,
}

impl TensorField {
    pub fn new(noise: NoiseParams, seed: u32) -> Self {
        Self {
            noise,
            seed,
            ..Self::default()
        }
    }

    /// Field composed from designer axioms. An empty set falls back to a
    /// grid plus a radial basis centred on the city so direction is
    /// nonzero everywhere on land.
    pub fn from_axioms(params: &CityParams, axioms: &[AxiomInput]) -> Self {
        let noise = NoiseParams {
            global_noise: params.tf_global_noise,
            noise_size_park: params.tf_noise_size_park,
            noise_angle_park: params.tf_noise_angle_park,
            noise_size_global: params.tf_noise_size_global,
            noise_angle_global: params.tf_noise_angle_global,
        };
        let mut field = Self::new(noise, params.seed);

        if axioms.is_empty() {
            let centre = Vec2::new(params.width * 0.5, params.height * 0.5);
            let size = params.width.min(params.height) * 0.5;
            field.add_grid(centre, size, 1.0, 0.0);
            field.add_radial(centre, size, 1.0);
            return field;
        }

        for axiom in axioms {
            match axiom.axiom_type {
                AxiomType::Radial => field.add_radial(axiom.pos, axiom.radius, 1.0),
                AxiomType::Block => field.add_square(axiom.pos, axiom.radius, 1.0),
                AxiomType::GridCorrective => field.add_grid(axiom.pos, axiom.radius, 1.0, 0.0),
                AxiomType::Delta => {
                    field.add_delta(axiom.pos, axiom.radius, 1.0, DeltaTerminal::Top)
                }
            }
        }
        field
    }

    pub fn add_grid(&mut self, centre: Vec2, size: f64, decay: f64, theta: f64) {
        self.basis_fields.push(BasisField {
            centre,
            size,
            decay,
            kind: BasisKind::Grid { theta },
        });
    }

    pub fn add_radial(&mut self, centre: Vec2, size: f64, decay: f64) {
        self.basis_fields.push(BasisField {
            centre,
            size,
            decay,
            kind: BasisKind::Radial,
        });
    }

    pub fn add_square(&mut self, centre: Vec2, size: f64, decay: f64) {
        self.basis_fields.push(BasisField {
            centre,
            size,
            decay,
            kind: BasisKind::Square,
        });
    }

    pub fn add_delta(&mut self, centre: Vec2, size: f64, decay: f64, terminal: DeltaTerminal) {
        self.basis_fields.push(BasisField {
            centre,
            size,
            decay,
            kind: BasisKind::Delta { terminal },
        });
    }

    pub fn clear(&mut self) {
        self.basis_fields.clear();
        self.parks.clear();
        self.sea.clear();
        self.river.clear();
    }

    pub fn enable_global_noise(&mut self, angle_deg: f64, size: f64) {
        self.noise.global_noise = true;
        self.noise.noise_angle_global = angle_deg;
        self.noise.noise_size_global = size;
    }

    pub fn disable_global_noise(&mut self) {
        self.noise.global_noise = false;
    }

    /// Run `f` with temporary noise/mask overrides, restoring the old
    /// values on exit. Sampling itself never mutates the field.
    pub fn with_overrides<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> T {
        let saved_noise = self.noise;
        let saved_sea = self.sea.clone();
        let saved_ignore = self.ignore_river;
        let out = f(self);
        self.noise = saved_noise;
        self.sea = saved_sea;
        self.ignore_river = saved_ignore;
        out
    }

    pub fn sample_point(&self, p: Vec2) -> Tensor {
        if !self.on_land(p) {
            return Tensor::zero();
        }

        let mut acc = Tensor::zero();
        if self.basis_fields.is_empty() {
            acc = Tensor::from_angle(0.0);
        } else {
            for f in &self.basis_fields {
                acc.add(f.weighted_tensor(p, self.smooth), self.smooth);
            }
        }

        if self.in_parks(p) {
            let rot = self.rotational_noise(p, self.noise.noise_size_park, self.noise.noise_angle_park);
            acc.rotate(rot);
        }
        if self.noise.global_noise {
            let rot =
                self.rotational_noise(p, self.noise.noise_size_global, self.noise.noise_angle_global);
            acc.rotate(rot);
        }
        acc
    }

    /// Major or minor unit direction at `p`; zero off land or where the
    /// field vanishes.
    pub fn evaluate(&self, p: Vec2, major: bool) -> Vec2 {
        let t = self.sample_point(p);
        if major {
            t.major()
        } else {
            t.minor()
        }
    }

    /// Scalar influence: sum of basis weights, land-gated.
    pub fn influence_at(&self, p: Vec2) -> f64 {
        if !self.on_land(p) {
            return 0.0;
        }
        self.basis_fields
            .iter()
            .map(|f| f.weight_at(p, self.smooth))
            .sum()
    }

    pub fn on_land(&self, p: Vec2) -> bool {
        let in_sea = polygon::inside_polygon(p, &self.sea);
        if self.ignore_river {
            return !in_sea;
        }
        !in_sea && !polygon::inside_polygon(p, &self.river)
    }

    pub fn in_parks(&self, p: Vec2) -> bool {
        self.parks.iter().any(|poly| polygon::inside_polygon(p, poly))
    }

    fn rotational_noise(&self, p: Vec2, noise_size: f64, noise_angle_deg: f64) -> f64 {
        if noise_size == 0.0 {
            return 0.0;
        }
        hash_noise(p.x / noise_size, p.y / noise_size, self.seed) * noise_angle_deg * PI / 180.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_angle_roundtrips_major_direction() {
        for theta in [0.0, 0.4, 1.2, 2.9] {
            let t = Tensor::from_angle(theta);
            let major = t.major();
            let expect = Vec2::new(theta.cos(), theta.sin());
            // Tensor directions are headless; compare up to sign.
            assert!(major.dot(expect).abs() > 0.999, "theta={theta}");
        }
    }

    #[test]
    fn from_vector_aligns_streamline_with_vector() {
        let v = Vec2::new(3.0, -2.0).normalize();
        let major = Tensor::from_vector(v).major();
        assert!(major.dot(v).abs() > 0.999);
    }

    #[test]
    fn minor_is_perpendicular_to_major() {
        let t = Tensor::from_angle(0.7);
        assert!(t.major().dot(t.minor()).abs() < 1e-12);
    }

    #[test]
    fn radial_basis_is_tangent_to_circles() {
        let field = BasisField {
            centre: Vec2::new(0.0, 0.0),
            size: 100.0,
            decay: 1.0,
            kind: BasisKind::Radial,
        };
        let p = Vec2::new(10.0, 0.0);
        let major = field.tensor_at(p).major();
        // Tangent direction at (10, 0) is vertical.
        assert!(major.dot(Vec2::new(0.0, 1.0)).abs() > 0.999);
    }

    #[test]
    fn grid_weight_is_zero_past_radius_with_zero_decay() {
        let field = BasisField {
            centre: Vec2::ZERO,
            size: 10.0,
            decay: 0.0,
            kind: BasisKind::Grid { theta: 0.0 },
        };
        assert_eq!(field.weight_at(Vec2::new(20.0, 0.0), false), 0.0);
        assert_eq!(field.weight_at(Vec2::new(5.0, 0.0), false), 1.0);
    }

    #[test]
    fn square_weight_uses_chebyshev_distance() {
        let field = BasisField {
            centre: Vec2::ZERO,
            size: 10.0,
            decay: 1.0,
            kind: BasisKind::Square,
        };
        // Same Chebyshev distance, same weight.
        let a = field.weight_at(Vec2::new(5.0, 3.0), false);
        let b = field.weight_at(Vec2::new(5.0, -5.0), false);
        assert!((a - 0.5).abs() < 1e-12);
        assert!((b - 0.5).abs() < 1e-12);
    }

    #[test]
    fn sea_mask_zeroes_the_field() {
        let params = CityParams::default();
        let mut field = TensorField::from_axioms(&params, &[]);
        let p = Vec2::new(500.0, 500.0);
        assert!(field.evaluate(p, true).length() > 0.0);

        field.sea = vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(1000.0, 0.0),
            Vec2::new(1000.0, 1000.0),
            Vec2::new(0.0, 1000.0),
        ];
        assert_eq!(field.evaluate(p, true), Vec2::ZERO);
        assert_eq!(field.influence_at(p), 0.0);
    }

    #[test]
    fn overrides_restore_previous_state() {
        let params = CityParams::default();
        let mut field = TensorField::from_axioms(&params, &[]);
        field.sea = vec![Vec2::ZERO, Vec2::new(1.0, 0.0), Vec2::new(1.0, 1.0)];
        let before = field.sea.clone();
        field.with_overrides(|f| {
            f.sea.clear();
            f.enable_global_noise(20.0, 30.0);
        });
        assert_eq!(field.sea, before);
        assert!(!field.noise.global_noise);
    }

    #[test]
    fn hash_noise_is_deterministic_and_bounded() {
        for i in 0..50 {
            let a = hash_noise(i as f64 * 0.31, i as f64 * 0.7, 42);
            let b = hash_noise(i as f64 * 0.31, i as f64 * 0.7, 42);
            assert_eq!(a.to_bits(), b.to_bits());
            assert!(a.abs() <= 1.0);
        }
    }
}
