use glam::Vec3;
use std::iter::Sum;
use std::ops::{Add, AddAssign};

/// Axis aligned bounding box. The default is empty and absorbs anything added to it.
#[derive(Copy, Clone, Debug, PartialEq, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct Bounds {
	pub min: Vec3,
	pub max: Vec3,
}

impl Default for Bounds {
	fn default() -> Self {
		Self {
			min: Vec3::INFINITY,
			max: Vec3::NEG_INFINITY,
		}
	}
}

impl Bounds {
	pub fn new(min: Vec3, max: Vec3) -> Self {
		Self { min, max }
	}

	pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Self {
		points.into_iter().fold(Self::default(), |b, p| b + p)
	}

	pub fn is_empty(&self) -> bool {
		self.min.cmpgt(self.max).any()
	}

	pub fn center(&self) -> Vec3 {
		(self.min + self.max) * 0.5
	}

	pub fn extent(&self) -> Vec3 {
		(self.max - self.min) * 0.5
	}

	pub fn size(&self) -> Vec3 {
		self.max - self.min
	}

	pub fn surface_area(&self) -> f32 {
		let size = self.size();
		2. * (size.x * size.y + size.x * size.z + size.y * size.z)
	}

	/// squared distance from the box surface to `p`, 0 when inside
	pub fn distance_squared(&self, p: Vec3) -> f32 {
		let d = (self.min - p).max(Vec3::ZERO) + (p - self.max).max(Vec3::ZERO);
		d.length_squared()
	}
}

impl Add<Vec3> for Bounds {
	type Output = Bounds;

	fn add(self, rhs: Vec3) -> Self::Output {
		Self {
			min: self.min.min(rhs),
			max: self.max.max(rhs),
		}
	}
}

impl AddAssign<Vec3> for Bounds {
	fn add_assign(&mut self, rhs: Vec3) {
		*self = *self + rhs;
	}
}

impl Add for Bounds {
	type Output = Bounds;

	fn add(self, rhs: Self) -> Self::Output {
		Self {
			min: self.min.min(rhs.min),
			max: self.max.max(rhs.max),
		}
	}
}

impl AddAssign for Bounds {
	fn add_assign(&mut self, rhs: Self) {
		*self = *self + rhs;
	}
}

impl Sum for Bounds {
	fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
		iter.fold(Self::default(), |acc, x| acc + x)
	}
}
