//! Field-line integrators.
//!
//! Both integrators return a short displacement (not a unit vector);
//! streamline tracing applies it directly.

use crate::model::Vec2;
use crate::tensor::TensorField;

pub trait FieldIntegrator {
    /// Displacement for one step of `dp/dt = major/minor(T(p))`.
    fn integrate(&self, point: Vec2, major: bool) -> Vec2;

    fn on_land(&self, point: Vec2) -> bool;

    fn influence_at(&self, point: Vec2) -> f64;
}

pub struct EulerIntegrator<'a> {
    field: &'a TensorField,
    dstep: f64,
}

impl<'a> EulerIntegrator<'a> {
    pub fn new(field: &'a TensorField, dstep: f64) -> Self {
        Self { field, dstep }
    }
}

impl FieldIntegrator for EulerIntegrator<'_> {
    fn integrate(&self, point: Vec2, major: bool) -> Vec2 {
        self.field.evaluate(point, major) * self.dstep
    }

    fn on_land(&self, point: Vec2) -> bool {
        self.field.on_land(point)
    }

    fn influence_at(&self, point: Vec2) -> f64 {
        self.field.influence_at(point)
    }
}

pub struct Rk4Integrator<'a> {
    field: &'a TensorField,
    dstep: f64,
}

impl<'a> Rk4Integrator<'a> {
    pub fn new(field: &'a TensorField, dstep: f64) -> Self {
        Self { field, dstep }
    }
}

impl FieldIntegrator for Rk4Integrator<'_> {
    fn integrate(&self, point: Vec2, major: bool) -> Vec2 {
        let h = self.dstep;
        let k1 = self.field.evaluate(point, major);
        let k2 = self.field.evaluate(point + k1 * (h * 0.5), major);
        let k3 = self.field.evaluate(point + k2 * (h * 0.5), major);
        let k4 = self.field.evaluate(point + k3 * h, major);
        (k1 + k2 * 2.0 + k3 * 2.0 + k4) * (h / 6.0)
    }

    fn on_land(&self, point: Vec2) -> bool {
        self.field.on_land(point)
    }

    fn influence_at(&self, point: Vec2) -> f64 {
        self.field.influence_at(point)
    }
}
