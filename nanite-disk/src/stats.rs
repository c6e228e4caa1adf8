use crate::shape::bounds::Bounds;
use rkyv::{Archive, Deserialize, Serialize};
use std::iter::Sum;
use std::ops::{Add, AddAssign};

#[derive(Copy, Clone, Debug, Default, Archive, Serialize, Deserialize)]
pub struct BuildStats {
	pub source: SourceMeshStats,
	pub dag: DagStats,
	pub encoding: EncodingStats,
}

#[derive(Copy, Clone, Debug, Archive, Serialize, Deserialize)]
pub struct SourceMeshStats {
	pub meshes: u32,
	pub vertices: u32,
	pub triangles: u32,
	pub bounds: Bounds,
}

impl Default for SourceMeshStats {
	fn default() -> Self {
		Self {
			meshes: 0,
			vertices: 0,
			triangles: 0,
			bounds: Bounds::default(),
		}
	}
}

#[derive(Copy, Clone, Debug, Default, Archive, Serialize, Deserialize)]
pub struct DagStats {
	pub leaf_clusters: u32,
	/// includes leaves
	pub clusters: u32,
	pub groups: u32,
	/// highest mip level, the synthetic root group excluded
	pub levels: u32,
}

/// Byte totals of the encoded pages, before compression unless stated otherwise.
#[derive(Copy, Clone, Debug, Default, Archive, Serialize, Deserialize)]
pub struct EncodingStats {
	pub pages: u32,
	pub root_pages: u32,
	pub hierarchy_nodes: u32,
	pub index_bytes: u32,
	pub position_bytes: u32,
	pub attribute_bytes: u32,
	pub gpu_bytes: u32,
	pub root_bytes_compressed: u32,
	pub streamable_bytes_compressed: u32,
	pub position_precision: i32,
}

impl Add for SourceMeshStats {
	type Output = SourceMeshStats;

	fn add(self, rhs: Self) -> Self::Output {
		Self {
			meshes: self.meshes + rhs.meshes,
			vertices: self.vertices + rhs.vertices,
			triangles: self.triangles + rhs.triangles,
			bounds: self.bounds + rhs.bounds,
		}
	}
}

impl AddAssign for SourceMeshStats {
	fn add_assign(&mut self, rhs: Self) {
		*self = *self + rhs;
	}
}

impl Sum for SourceMeshStats {
	fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
		iter.fold(Self::default(), |acc, x| acc + x)
	}
}

impl Add for DagStats {
	type Output = DagStats;

	fn add(self, rhs: Self) -> Self::Output {
		Self {
			leaf_clusters: self.leaf_clusters + rhs.leaf_clusters,
			clusters: self.clusters + rhs.clusters,
			groups: self.groups + rhs.groups,
			levels: self.levels.max(rhs.levels),
		}
	}
}

impl AddAssign for DagStats {
	fn add_assign(&mut self, rhs: Self) {
		*self = *self + rhs;
	}
}

impl Sum for DagStats {
	fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
		iter.fold(Self::default(), |acc, x| acc + x)
	}
}
