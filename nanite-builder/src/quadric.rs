//! Quadric error metrics in f64.
//!
//! A triangle contributes its area weighted squared plane distance plus, for every attribute, the squared deviation
//! from the attribute's linear gradient across the triangle. Attributes are free variables, so for a given position
//! they can be solved for in closed form and eliminated, leaving a quadric over the position alone for the optimizer.

use glam::{DMat3, DVec3, Vec3};
use std::ops::{Add, AddAssign};

const DEGENERATE_AREA: f64 = 1e-12;

#[inline]
fn outer(a: DVec3, b: DVec3) -> DMat3 {
	DMat3::from_cols(a * b.x, a * b.y, a * b.z)
}

/// `E(p) = p·Ap + 2b·p + c`
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Quadric {
	pub a: DMat3,
	pub b: DVec3,
	pub c: f64,
}

impl Default for Quadric {
	fn default() -> Self {
		Self::ZERO
	}
}

impl Quadric {
	pub const ZERO: Self = Self {
		a: DMat3::ZERO,
		b: DVec3::ZERO,
		c: 0.,
	};

	/// Squared distance to the plane through `point` with unit normal `normal`, times `weight`.
	pub fn from_plane(normal: DVec3, point: DVec3, weight: f64) -> Self {
		let d = -normal.dot(point);
		Self {
			a: outer(normal, normal) * weight,
			b: normal * (d * weight),
			c: d * d * weight,
		}
	}

	/// Constraint plane through the edge `p0 -> p1`, perpendicular to its face. Keeps open and attribute seam
	/// edges from sliding sideways. Weighted by edge length.
	pub fn from_edge(p0: Vec3, p1: Vec3, face_normal: Vec3, weight: f32) -> Self {
		let p0 = p0.as_dvec3();
		let edge = p1.as_dvec3() - p0;
		let length = edge.length();
		let normal = face_normal.as_dvec3().cross(edge);
		let normal_length = normal.length();
		if !(length > DEGENERATE_AREA && normal_length > DEGENERATE_AREA * length) {
			return Self::ZERO;
		}
		Self::from_plane(normal / normal_length, p0, weight as f64 * length)
	}

	#[inline]
	pub fn evaluate(&self, p: DVec3) -> f64 {
		p.dot(self.a * p) + 2. * self.b.dot(p) + self.c
	}
}

impl Add for Quadric {
	type Output = Quadric;

	fn add(self, rhs: Self) -> Self::Output {
		Self {
			a: self.a + rhs.a,
			b: self.b + rhs.b,
			c: self.c + rhs.c,
		}
	}
}

impl AddAssign for Quadric {
	fn add_assign(&mut self, rhs: Self) {
		*self = *self + rhs;
	}
}

/// Triangle quadric over the position and `N` weighted attributes.
#[derive(Clone, Debug)]
pub struct AttributeQuadric {
	/// position part with the gradient terms of all attributes folded in
	pub geometry: Quadric,
	/// `area * gradient` per attribute
	pub gradients: Vec<DVec3>,
	/// `area * offset` per attribute, where `attribute(p) = gradient·p + offset`
	pub offsets: Vec<f64>,
	pub area: f64,
}

impl AttributeQuadric {
	pub fn zero(num_attributes: usize) -> Self {
		Self {
			geometry: Quadric::ZERO,
			gradients: vec![DVec3::ZERO; num_attributes],
			offsets: vec![0.; num_attributes],
			area: 0.,
		}
	}

	pub fn new(positions: [Vec3; 3], attributes: [&[f32]; 3], weights: &[f32]) -> Self {
		let num_attributes = weights.len();
		let [p0, p1, p2] = positions.map(|p| p.as_dvec3());
		let e1 = p1 - p0;
		let e2 = p2 - p0;
		let cross = e1.cross(e2);
		let length = cross.length();
		if !(length > DEGENERATE_AREA) {
			return Self::zero(num_attributes);
		}

		let normal = cross / length;
		let area = 0.5 * length;
		let mut geometry = Quadric::from_plane(normal, p0, area);
		let mut gradients = Vec::with_capacity(num_attributes);
		let mut offsets = Vec::with_capacity(num_attributes);

		let edge2_perp = e2.cross(normal);
		let edge1_perp = normal.cross(e1);
		for (i, &weight) in weights.iter().enumerate() {
			let weight = weight as f64;
			let [s0, s1, s2] = attributes.map(|a| a[i] as f64 * weight);
			let gradient = ((s1 - s0) * edge2_perp + (s2 - s0) * edge1_perp) / length;
			let offset = s0 - gradient.dot(p0);

			geometry.a += outer(gradient, gradient) * area;
			geometry.b += gradient * (offset * area);
			geometry.c += offset * offset * area;
			gradients.push(gradient * area);
			offsets.push(offset * area);
		}

		Self {
			geometry,
			gradients,
			offsets,
			area,
		}
	}

	pub fn num_attributes(&self) -> usize {
		self.gradients.len()
	}

	pub fn add(&mut self, other: &AttributeQuadric) {
		debug_assert_eq!(self.num_attributes(), other.num_attributes());
		self.geometry += other.geometry;
		for (g, o) in self.gradients.iter_mut().zip(&other.gradients) {
			*g += *o;
		}
		for (d, o) in self.offsets.iter_mut().zip(&other.offsets) {
			*d += *o;
		}
		self.area += other.area;
	}

	/// Position only quadric with the optimal attributes substituted.
	pub fn reduced(&self) -> Quadric {
		if !(self.area > 0.) {
			return self.geometry;
		}
		let inv_area = 1. / self.area;
		let mut q = self.geometry;
		for (&g, &d) in self.gradients.iter().zip(&self.offsets) {
			q.a -= outer(g, g) * inv_area;
			q.b -= g * (d * inv_area);
			q.c -= d * d * inv_area;
		}
		q
	}

	/// Writes the optimal unweighted attributes at `position` into `out` and returns the error.
	pub fn calc_attributes_and_evaluate(&self, position: Vec3, out: &mut [f32], weights: &[f32]) -> f32 {
		let p = position.as_dvec3();
		let mut error = self.geometry.evaluate(p);
		for (i, (&g, &d)) in self.gradients.iter().zip(&self.offsets).enumerate() {
			let s = (g.dot(p) + d) / self.area;
			error -= s * s * self.area;
			out[i] = if weights[i] != 0. { (s / weights[i] as f64) as f32 } else { 0. };
		}
		error.max(0.) as f32
	}
}

/// Accumulates position quadrics and solves for the minimizing position.
#[derive(Copy, Clone, Debug, Default)]
pub struct QuadricOptimizer {
	quadric: Quadric,
}

impl QuadricOptimizer {
	pub fn add_attribute_quadric(&mut self, quadric: &AttributeQuadric) {
		self.quadric += quadric.reduced();
	}

	pub fn add_quadric(&mut self, quadric: &Quadric) {
		self.quadric += *quadric;
	}

	/// Unique minimum, if the quadric is well conditioned in all three dimensions.
	pub fn optimize_full(&self) -> Option<Vec3> {
		let a = self.quadric.a;
		let scale = a.to_cols_array().iter().fold(0f64, |m, v| m.max(v.abs()));
		if !(scale > 0.) {
			return None;
		}
		let det = a.determinant();
		if !(det.abs() > 1e-9 * scale * scale * scale) {
			return None;
		}
		finite(-(a.inverse() * self.quadric.b))
	}

	/// Pseudo-inverse solve around `center`, restricted to the eigen directions the quadric constrains. Handles
	/// flat and ridge neighbourhoods where the full solve is singular.
	pub fn optimize_planar(&self, center: Vec3) -> Option<Vec3> {
		let center = center.as_dvec3();
		let (values, vectors) = symmetric_eigen(self.quadric.a);
		let max = values.iter().fold(0f64, |m, v| m.max(v.abs()));
		if !(max > 0.) {
			return None;
		}
		let gradient = self.quadric.a * center + self.quadric.b;
		let mut p = center;
		for (&value, &vector) in values.iter().zip(&vectors) {
			if value.abs() > 1e-6 * max {
				p -= vector * (vector.dot(gradient) / value);
			}
		}
		finite(p)
	}

	/// Best point on the segment `p0 -> p1`.
	pub fn optimize_linear(&self, p0: Vec3, p1: Vec3) -> Option<Vec3> {
		let p0 = p0.as_dvec3();
		let dir = p1.as_dvec3() - p0;
		let denom = dir.dot(self.quadric.a * dir);
		if !(denom > 1e-12 * dir.length_squared().max(f64::MIN_POSITIVE)) {
			return None;
		}
		let t = -dir.dot(self.quadric.a * p0 + self.quadric.b) / denom;
		finite(p0 + dir * t.clamp(0., 1.))
	}

	pub fn evaluate(&self, p: Vec3) -> f64 {
		self.quadric.evaluate(p.as_dvec3())
	}
}

fn finite(p: DVec3) -> Option<Vec3> {
	let p = p.as_vec3();
	p.is_finite().then_some(p)
}

/// Cyclic Jacobi rotations, eigenvectors returned as columns in matching order.
fn symmetric_eigen(m: DMat3) -> ([f64; 3], [DVec3; 3]) {
	let mut a = m.to_cols_array_2d();
	let mut v = DMat3::IDENTITY.to_cols_array_2d();
	for _ in 0..16 {
		let off = a[0][1] * a[0][1] + a[0][2] * a[0][2] + a[1][2] * a[1][2];
		let diag = a[0][0] * a[0][0] + a[1][1] * a[1][1] + a[2][2] * a[2][2];
		if !(off > 1e-24 * diag) {
			break;
		}
		for (p, q) in [(0, 1), (0, 2), (1, 2)] {
			if a[p][q] == 0. {
				continue;
			}
			let theta = (a[q][q] - a[p][p]) / (2. * a[p][q]);
			let t = theta.signum() / (theta.abs() + (theta * theta + 1.).sqrt());
			let c = 1. / (t * t + 1.).sqrt();
			let s = t * c;
			for k in 0..3 {
				let akp = a[k][p];
				let akq = a[k][q];
				a[k][p] = c * akp - s * akq;
				a[k][q] = s * akp + c * akq;
			}
			for k in 0..3 {
				let apk = a[p][k];
				let aqk = a[q][k];
				a[p][k] = c * apk - s * aqk;
				a[q][k] = s * apk + c * aqk;
			}
			for row in v.iter_mut() {
				let vp = row[p];
				let vq = row[q];
				row[p] = c * vp - s * vq;
				row[q] = s * vp + c * vq;
			}
		}
	}
	// eigenvector i is column i of v
	let vectors = [0, 1, 2].map(|i| DVec3::new(v[0][i], v[1][i], v[2][i]));
	([a[0][0], a[1][1], a[2][2]], vectors)
}

#[cfg(test)]
mod tests {
	use super::*;
	use approx::assert_abs_diff_eq;

	fn assert_near(a: Vec3, b: Vec3, epsilon: f32) {
		assert!(a.distance(b) <= epsilon, "{a} != {b}");
	}

	#[test]
	fn plane_distance() {
		let q = AttributeQuadric::new([Vec3::ZERO, Vec3::X * 2., Vec3::Y * 2.], [&[], &[], &[]], &[]);
		assert_abs_diff_eq!(q.area, 2.);
		assert_abs_diff_eq!(q.geometry.evaluate(DVec3::new(5., -3., 0.)), 0.);
		assert_abs_diff_eq!(q.geometry.evaluate(DVec3::new(0., 0., 3.)), 2. * 9., epsilon = 1e-9);
	}

	#[test]
	fn attributes_interpolate() {
		let weights = [1., 0.5];
		let a = [[0f32, 4.], [1., 4.], [0., 8.]];
		let q = AttributeQuadric::new([Vec3::ZERO, Vec3::X, Vec3::Y], [&a[0], &a[1], &a[2]], &weights);
		let mut out = [0.; 2];
		let error = q.calc_attributes_and_evaluate(Vec3::new(0.5, 0.5, 0.), &mut out, &weights);
		assert_abs_diff_eq!(error, 0., epsilon = 1e-6);
		assert_abs_diff_eq!(out[0], 0.5, epsilon = 1e-6);
		assert_abs_diff_eq!(out[1], 6., epsilon = 1e-5);
	}

	#[test]
	fn degenerate_triangle_is_zero() {
		let q = AttributeQuadric::new([Vec3::ZERO, Vec3::X, Vec3::X * 2.], [&[1.], &[2.], &[3.]], &[1.]);
		assert_eq!(q.area, 0.);
		assert_eq!(q.reduced(), Quadric::ZERO);
	}

	#[test]
	fn full_solve_finds_corner() {
		let mut optimizer = QuadricOptimizer::default();
		let corner = DVec3::new(1., 2., 3.);
		for normal in [DVec3::X, DVec3::Y, DVec3::Z] {
			optimizer.add_quadric(&Quadric::from_plane(normal, corner, 1.));
		}
		let p = optimizer.optimize_full().unwrap();
		assert_near(p, corner.as_vec3(), 1e-5);
	}

	#[test]
	fn planar_solve_projects_center() {
		let mut optimizer = QuadricOptimizer::default();
		optimizer.add_quadric(&Quadric::from_plane(DVec3::Z, DVec3::new(0., 0., 2.), 1.));
		assert_eq!(optimizer.optimize_full(), None);
		let p = optimizer.optimize_planar(Vec3::new(3., 4., 0.)).unwrap();
		assert_near(p, Vec3::new(3., 4., 2.), 1e-5);
	}

	#[test]
	fn ridge_projects_onto_line() {
		let mut optimizer = QuadricOptimizer::default();
		let n = DVec3::new(1., 1., 0.).normalize();
		optimizer.add_quadric(&Quadric::from_plane(DVec3::Z, DVec3::ZERO, 1.));
		optimizer.add_quadric(&Quadric::from_plane(n, DVec3::ZERO, 1.));
		let p = optimizer.optimize_planar(Vec3::new(1., 1., 1.)).unwrap();
		assert_near(p, Vec3::ZERO, 1e-5);
		let p = optimizer.optimize_planar(Vec3::new(1., -1., 0.)).unwrap();
		assert_near(p, Vec3::new(1., -1., 0.), 1e-5);
	}

	#[test]
	fn linear_solve_is_clamped() {
		let mut optimizer = QuadricOptimizer::default();
		optimizer.add_quadric(&Quadric::from_plane(DVec3::X, DVec3::new(0.25, 0., 0.), 1.));
		let p = optimizer.optimize_linear(Vec3::ZERO, Vec3::X).unwrap();
		assert_near(p, Vec3::new(0.25, 0., 0.), 1e-6);
		let p = optimizer.optimize_linear(Vec3::X, Vec3::X * 2.).unwrap();
		assert_near(p, Vec3::X, 1e-6);
	}

	#[test]
	fn edge_quadric() {
		let q = Quadric::from_edge(Vec3::ZERO, Vec3::X * 2., Vec3::Z, 3.);
		assert_abs_diff_eq!(q.evaluate(DVec3::new(1., 0., 5.)), 0.);
		assert_abs_diff_eq!(q.evaluate(DVec3::new(1., 1., 0.)), 6., epsilon = 1e-9);
		assert_eq!(Quadric::from_edge(Vec3::ZERO, Vec3::ZERO, Vec3::Z, 1.), Quadric::ZERO);
	}
}
