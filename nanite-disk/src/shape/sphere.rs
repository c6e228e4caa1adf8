use glam::{Vec3, Vec4, Vec4Swizzles};
use std::ops::{Add, AddAssign};

const KINDA_EPSILON: f32 = 1e-4;
const SMALL_NUMBER: f32 = 1e-8;

#[derive(Copy, Clone, Debug, Default, PartialEq, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct Sphere(Vec4);

impl Sphere {
	pub fn new(center: Vec3, radius: f32) -> Sphere {
		Self(Vec4::from((center, radius)))
	}

	/// Ritter style bounding sphere: start with the most distant pair of AABB extremes, then grow to fit every point.
	#[profiling::function]
	pub fn from_points(points: &[Vec3]) -> Self {
		assert!(!points.is_empty(), "bounding sphere of zero points");

		let mut min_index = [0; 3];
		let mut max_index = [0; 3];
		for (i, p) in points.iter().enumerate() {
			for k in 0..3 {
				if p[k] < points[min_index[k]][k] {
					min_index[k] = i;
				}
				if p[k] > points[max_index[k]][k] {
					max_index[k] = i;
				}
			}
		}

		let mut largest_dist_sq = 0.;
		let mut largest_axis = 0;
		for k in 0..3 {
			let dist_sq = points[max_index[k]].distance_squared(points[min_index[k]]);
			if dist_sq > largest_dist_sq {
				largest_dist_sq = dist_sq;
				largest_axis = k;
			}
		}

		let p_min = points[min_index[largest_axis]];
		let p_max = points[max_index[largest_axis]];
		let mut center = (p_min + p_max) * 0.5;
		let mut radius = largest_dist_sq.sqrt() * 0.5;

		for p in points {
			let dist_sq = p.distance_squared(center);
			if dist_sq > radius * radius {
				let dist = dist_sq.sqrt();
				let t = 0.5 + 0.5 * (radius / dist);
				center = p.lerp(center, t);
				radius = 0.5 * (radius + dist);
			}
		}
		Self::new(center, radius)
	}

	/// Same as [`Self::from_points`] but for enclosing other spheres.
	#[profiling::function]
	pub fn from_spheres(spheres: &[Sphere]) -> Self {
		assert!(!spheres.is_empty(), "bounding sphere of zero spheres");

		let mut min_index = [0; 3];
		let mut max_index = [0; 3];
		for (i, s) in spheres.iter().enumerate() {
			for k in 0..3 {
				let min = |s: &Sphere| s.center()[k] - s.radius();
				let max = |s: &Sphere| s.center()[k] + s.radius();
				if min(s) < min(&spheres[min_index[k]]) {
					min_index[k] = i;
				}
				if max(s) > max(&spheres[max_index[k]]) {
					max_index[k] = i;
				}
			}
		}

		let mut largest_dist = 0.;
		let mut largest_axis = 0;
		for k in 0..3 {
			let s_min = spheres[min_index[k]];
			let s_max = spheres[max_index[k]];
			let dist = s_max.center().distance(s_min.center()) + s_min.radius() + s_max.radius();
			if dist > largest_dist {
				largest_dist = dist;
				largest_axis = k;
			}
		}

		let mut out = spheres[min_index[largest_axis]] + spheres[max_index[largest_axis]];
		for s in spheres {
			out += *s;
		}
		out
	}

	pub fn center(&self) -> Vec3 {
		self.0.xyz()
	}

	pub fn radius(&self) -> f32 {
		self.0.w
	}

	pub fn to_array(&self) -> [f32; 4] {
		self.0.to_array()
	}

	pub fn is_inside(&self, other: &Sphere, tolerance: f32) -> bool {
		if self.radius() > other.radius() + tolerance {
			return false;
		}
		let r = other.radius() + tolerance - self.radius();
		self.center().distance_squared(other.center()) <= r * r
	}
}

impl Add for Sphere {
	type Output = Sphere;

	/// smallest sphere enclosing both
	fn add(self, rhs: Self) -> Self::Output {
		if self.radius() == 0. {
			return rhs;
		}

		let to_other = rhs.center() - self.center();
		let dist_sq = to_other.length_squared();
		let radius_diff = self.radius() - rhs.radius();
		if radius_diff * radius_diff + KINDA_EPSILON >= dist_sq {
			// one contains the other
			if self.radius() < rhs.radius() { rhs } else { self }
		} else {
			let dist = dist_sq.sqrt();
			let radius = (dist + rhs.radius() + self.radius()) * 0.5;
			let mut center = self.center();
			if dist > SMALL_NUMBER {
				center += to_other * ((radius - self.radius()) / dist);
			}
			Sphere::new(center, radius)
		}
	}
}

impl AddAssign for Sphere {
	fn add_assign(&mut self, rhs: Self) {
		*self = *self + rhs;
	}
}
