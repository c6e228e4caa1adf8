use crate::containers::hash_table::INVALID_INDEX;
use crate::containers::{BitArray, DisjointSet, HashTable};
use crate::encode::material::MaterialRange;
use crate::error::Result;
use crate::math::{cycle3, exp2_scale, float_exponent, hash_position, murmur32};
use crate::partition::GraphPartitioner;
use crate::simplify::MeshSimplifier;
use glam::{IVec3, UVec3, Vec2, Vec3, Vec4};
use nanite_disk::constants::{MAX_CLUSTER_TRIANGLES, MAX_NANITE_UVS};
use nanite_disk::shape::{Bounds, Sphere};
use nanite_disk::strip::StripDesc;
use rustc_hash::FxHashMap;
use static_assertions::const_assert;
use std::ops::Range;

/// Max triangles per cluster.
pub const CLUSTER_SIZE: u32 = 128;
const_assert!(CLUSTER_SIZE <= MAX_CLUSTER_TRIANGLES);
/// Smallest average triangle size the simplifier rescales from.
pub const THRESH_POINTS_ARE_SAME: f32 = 0.00002;
pub const INVALID_GROUP_INDEX: u32 = u32::MAX;

/// A vertex of the source mesh.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BuildVertex {
	pub position: Vec3,
	pub normal: Vec3,
	/// linear rgba
	pub color: [u8; 4],
	pub uvs: [Vec2; MAX_NANITE_UVS as usize],
}

impl Default for BuildVertex {
	fn default() -> Self {
		Self {
			position: Vec3::ZERO,
			normal: Vec3::Z,
			color: [255; 4],
			uvs: [Vec2::ZERO; MAX_NANITE_UVS as usize],
		}
	}
}

/// Which attributes follow the position and normal of every cluster vertex.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct VertexFormat {
	pub num_tex_coords: u32,
	pub has_colors: bool,
}

impl VertexFormat {
	/// Floats per vertex: position, normal, optional color, then uvs.
	pub fn vert_size(&self) -> usize {
		6 + if self.has_colors { 4 } else { 0 } + 2 * self.num_tex_coords as usize
	}

	pub fn num_attributes(&self) -> u32 {
		self.vert_size() as u32 - 3
	}

	fn uv_offset(&self) -> usize {
		6 + if self.has_colors { 4 } else { 0 }
	}
}

/// The triangles of a single mesh, as seen by leaf clustering.
#[derive(Copy, Clone, Debug)]
pub struct SourceMesh<'a> {
	pub verts: &'a [BuildVertex],
	pub indexes: &'a [u32],
	pub material_indexes: &'a [i32],
	/// one bit per index, set for half edges without an opposite
	pub boundary_edges: &'a BitArray,
	pub format: VertexFormat,
}

fn correct_attributes(attributes: &mut [f32]) {
	let normal = Vec3::from_slice(attributes).normalize_or(Vec3::Z);
	attributes[..3].copy_from_slice(&normal.to_array());
}

fn correct_attributes_color(attributes: &mut [f32]) {
	correct_attributes(attributes);
	for c in &mut attributes[3..7] {
		*c = c.clamp(0., 1.);
	}
}

fn triangle_area(p0: Vec3, p1: Vec3, p2: Vec3) -> f32 {
	0.5 * (p1 - p0).cross(p0 - p2).length()
}

#[derive(Clone, Debug)]
pub struct Cluster {
	pub num_verts: u32,
	pub num_tris: u32,
	pub format: VertexFormat,

	pub verts: Vec<f32>,
	pub indexes: Vec<u32>,
	pub material_indexes: Vec<i32>,
	/// half edges on the boundary of the source mesh
	pub boundary_edges: BitArray,
	/// half edges without an opposite within this cluster, boundary edges excluded
	pub external_edges: BitArray,
	pub num_external_edges: u32,

	pub bounds: Bounds,
	pub surface_area: f32,
	pub guid: u32,
	pub mip_level: i32,

	/// longest edge, negated for leaves until they are part of a DAG
	pub edge_length: f32,
	pub lod_error: f32,
	pub sphere_bounds: Sphere,
	pub lod_bounds: Sphere,

	pub group_index: u32,
	pub group_part_index: u32,
	pub generating_group_index: u32,

	// filled in by encoding
	pub material_ranges: Vec<MaterialRange>,
	pub quantized_positions: Vec<UVec3>,
	pub quantized_pos_start: IVec3,
	pub quantized_pos_bits: UVec3,
	pub quantized_pos_shift: u32,
	pub mesh_bounds_min: Vec3,
	pub mesh_bounds_delta: Vec3,
	pub strip_desc: StripDesc,
	pub strip_index_data: Vec<u8>,
}

impl Default for Cluster {
	fn default() -> Self {
		Self {
			num_verts: 0,
			num_tris: 0,
			format: VertexFormat::default(),
			verts: Vec::new(),
			indexes: Vec::new(),
			material_indexes: Vec::new(),
			boundary_edges: BitArray::default(),
			external_edges: BitArray::default(),
			num_external_edges: 0,
			bounds: Bounds::default(),
			surface_area: 0.,
			guid: 0,
			mip_level: 0,
			edge_length: 0.,
			lod_error: 0.,
			sphere_bounds: Sphere::default(),
			lod_bounds: Sphere::default(),
			group_index: INVALID_GROUP_INDEX,
			group_part_index: INVALID_GROUP_INDEX,
			generating_group_index: INVALID_GROUP_INDEX,
			material_ranges: Vec::new(),
			quantized_positions: Vec::new(),
			quantized_pos_start: IVec3::ZERO,
			quantized_pos_bits: UVec3::ZERO,
			quantized_pos_shift: 0,
			mesh_bounds_min: Vec3::ZERO,
			mesh_bounds_delta: Vec3::ZERO,
			strip_desc: StripDesc::default(),
			strip_index_data: Vec::new(),
		}
	}
}

/// Sibling clusters that got simplified together, selected or rejected as a unit.
#[derive(Clone, Debug, Default)]
pub struct ClusterGroup {
	pub bounds: Sphere,
	pub lod_bounds: Sphere,
	pub min_lod_error: f32,
	pub max_parent_lod_error: f32,
	pub mip_level: i32,
	pub mesh_index: u32,

	pub page_index_start: u32,
	pub page_index_num: u32,
	pub children: Vec<u32>,
}

impl Cluster {
	/// Leaf cluster from the triangles `tri_indexes[range]` of `mesh`.
	pub fn from_mesh(mesh: &SourceMesh, tri_indexes: &[u32], range: Range<u32>) -> Self {
		let format = mesh.format;
		let mut cluster = Self::gather_triangles(
			format,
			&tri_indexes[range.start as usize..range.end as usize],
			mesh.indexes,
			mesh.material_indexes,
			mesh.boundary_edges,
			|index| mesh.verts[index as usize].position,
			|index, verts| {
				let vert = &mesh.verts[index as usize];
				let start = verts.len();
				verts.extend_from_slice(&vert.position.to_array());
				let normal = if vert.normal.is_nan() { Vec3::Z } else { vert.normal };
				verts.extend_from_slice(&normal.to_array());
				if format.has_colors {
					verts.extend(vert.color.map(|c| c as f32 / 255.));
				}
				for uv in &vert.uvs[..format.num_tex_coords as usize] {
					verts.extend(uv.to_array().map(|f| if f.is_nan() { 0. } else { f }));
				}

				let attributes = &mut verts[start + 3..];
				if format.has_colors {
					correct_attributes_color(attributes);
				} else {
					correct_attributes(attributes);
				}
			},
		);
		cluster.guid = murmur32(&[range.start, range.end]);
		cluster.find_external_edges();
		cluster.bound();
		cluster
	}

	/// Cluster from the triangles `tri_indexes[range]` of `src`.
	pub fn from_split(src: &Cluster, tri_indexes: &[u32], range: Range<u32>) -> Self {
		let mut cluster = Self::gather_triangles(
			src.format,
			&tri_indexes[range.start as usize..range.end as usize],
			&src.indexes,
			&src.material_indexes,
			&src.boundary_edges,
			|index| src.position(index),
			|index, verts| verts.extend_from_slice(src.vert(index)),
		);
		cluster.guid = murmur32(&[src.guid, range.start, range.end]);
		cluster.mip_level = src.mip_level;
		cluster.find_external_edges();
		cluster.bound();
		cluster
	}

	fn gather_triangles(
		format: VertexFormat,
		tris: &[u32],
		src_indexes: &[u32],
		src_material_indexes: &[i32],
		src_boundary_edges: &BitArray,
		src_position: impl Fn(u32) -> Vec3,
		mut push_vert: impl FnMut(u32, &mut Vec<f32>),
	) -> Self {
		let num_tris = tris.len();
		let mut cluster = Self {
			format,
			verts: Vec::with_capacity(num_tris * format.vert_size()),
			indexes: Vec::with_capacity(num_tris * 3),
			material_indexes: Vec::with_capacity(num_tris),
			boundary_edges: BitArray::new(false, num_tris * 3),
			..Self::default()
		};

		let mut old_to_new = FxHashMap::<u32, u32>::default();
		old_to_new.reserve(num_tris);
		for (i, &tri) in tris.iter().enumerate() {
			for k in 0..3 {
				let old_index = src_indexes[(tri * 3 + k) as usize];
				let new_index = *old_to_new.entry(old_index).or_insert_with(|| {
					push_vert(old_index, &mut cluster.verts);
					cluster.num_verts += 1;
					cluster.num_verts - 1
				});
				cluster.indexes.push(new_index);
				if src_boundary_edges.get((tri * 3 + k) as usize) {
					cluster.boundary_edges.set(i * 3 + k as usize, true);
				}
			}

			let [p0, p1, p2] = [0, 1, 2].map(|k| src_position(src_indexes[(tri * 3 + k) as usize]));
			cluster.surface_area += triangle_area(p0, p1, p2);
			cluster.material_indexes.push(src_material_indexes[tri as usize]);
		}
		cluster
	}

	/// Merges `children` into a single cluster, welding vertices that are bit identical.
	#[profiling::function]
	pub fn merge(children: &[&Cluster]) -> Self {
		let format = children[0].format;
		let num_indexes: usize = children.iter().map(|c| c.indexes.len()).sum();
		let num_verts_guess: u32 = children.iter().map(|c| c.num_verts).sum();

		let mut cluster = Self {
			format,
			verts: Vec::with_capacity(num_verts_guess as usize * format.vert_size()),
			indexes: Vec::with_capacity(num_indexes),
			material_indexes: Vec::with_capacity(num_indexes / 3),
			boundary_edges: BitArray::new(false, num_indexes),
			guid: murmur32(&children.iter().map(|c| c.guid).collect::<Vec<_>>()),
			..Self::default()
		};

		let stride = format.vert_size();
		let mut vert_hash = HashTable::with_expected(num_verts_guess);
		for child in children {
			cluster.bounds += child.bounds;
			cluster.surface_area += child.surface_area;
			// may jump several levels, but always at least one
			cluster.mip_level = cluster.mip_level.max(child.mip_level + 1);

			for (i, &child_index) in child.indexes.iter().enumerate() {
				let vert = child.vert(child_index);
				let hash = hash_position(child.position(child_index));
				let existing = vert_hash.iter(hash).find(|&index| {
					let start = index as usize * stride;
					bits_equal(&cluster.verts[start..start + stride], vert)
				});
				let new_index = match existing {
					Some(index) => index,
					None => {
						let index = cluster.num_verts;
						cluster.num_verts += 1;
						cluster.verts.extend_from_slice(vert);
						vert_hash.add(hash, index);
						index
					}
				};

				if child.boundary_edges.get(i) {
					cluster.boundary_edges.set(cluster.indexes.len(), true);
				}
				cluster.indexes.push(new_index);
			}
			cluster.material_indexes.extend_from_slice(&child.material_indexes);
		}
		cluster.num_tris = cluster.material_indexes.len() as u32;
		cluster
	}

	/// Simplifies down to at most `target_num_tris` and returns the error introduced. Edges that are not on the
	/// boundary of the source mesh are locked, since siblings outside this cluster share them.
	#[profiling::function]
	pub fn simplify(&mut self, target_num_tris: u32) -> f32 {
		if target_num_tris * 3 >= self.indexes.len() as u32 {
			return 0.;
		}

		// lossless rescale, only the exponent changes, so the average triangle is around 0.25
		let triangle_size = (self.surface_area * 3. / self.indexes.len() as f32).sqrt();
		let current_size = triangle_size.max(THRESH_POINTS_ARE_SAME);
		let exponent = (float_exponent(0.25) - float_exponent(current_size)).clamp(-126, 127);
		let position_scale = exp2_scale(1., exponent);

		let num_tex_coords = self.format.num_tex_coords as usize;
		let mut min_uv = [f32::MAX; MAX_NANITE_UVS as usize];
		let mut max_uv = [-f32::MAX; MAX_NANITE_UVS as usize];
		for vert in 0..self.num_verts {
			self.set_position(vert, self.position(vert) * position_scale);
			for uv_index in 0..num_tex_coords {
				let uv = self.uv(vert, uv_index as u32);
				for f in uv.to_array() {
					let f = if f.is_finite() { f } else { 0. };
					min_uv[uv_index] = min_uv[uv_index].min(f);
					max_uv[uv_index] = max_uv[uv_index].max(f);
				}
			}
		}

		let mut attribute_weights = vec![0f32; self.format.num_attributes() as usize];
		attribute_weights[..3].fill(1.);
		if self.format.has_colors {
			attribute_weights[3..7].fill(0.0625);
		}
		let uv_weights_start = self.format.uv_offset() - 3;
		for uv_index in 0..num_tex_coords {
			let range = (max_uv[uv_index] - min_uv[uv_index]).max(1.);
			let weight = 1. / (1024. * num_tex_coords as f32 * range);
			let start = uv_weights_start + uv_index * 2;
			attribute_weights[start..start + 2].fill(weight);
		}

		let num_attributes = self.format.num_attributes();
		let correct = if self.format.has_colors {
			correct_attributes_color
		} else {
			correct_attributes
		};
		let (max_error_sqr, num_verts, num_tris, boundary_edges) = {
			let mut simplifier = MeshSimplifier::new(
				&mut self.verts,
				&mut self.indexes,
				&mut self.material_indexes,
				num_attributes,
			);
			simplifier.set_boundary_locked(&self.boundary_edges);
			simplifier.set_attribute_weights(&attribute_weights);
			simplifier.set_correct_attributes(correct);
			simplifier.set_edge_weight(2.);

			let max_error_sqr = simplifier.simplify(self.num_verts, target_num_tris);
			assert!(simplifier.remaining_num_verts() > 0);
			assert!(simplifier.remaining_num_tris() > 0);

			let boundary_edges = simplifier.get_boundary_unlocked();
			simplifier.compact();
			(
				max_error_sqr,
				simplifier.remaining_num_verts(),
				simplifier.remaining_num_tris(),
				boundary_edges,
			)
		};

		self.boundary_edges = boundary_edges;
		self.verts.truncate(num_verts as usize * self.format.vert_size());
		self.indexes.truncate(num_tris as usize * 3);
		self.material_indexes.truncate(num_tris as usize);
		self.num_verts = num_verts;
		self.num_tris = num_tris;

		let inv_scale = 1. / position_scale;
		for vert in 0..self.num_verts {
			let position = self.position(vert) * inv_scale;
			self.set_position(vert, position);
			self.bounds += position;
		}

		max_error_sqr.sqrt() * inv_scale
	}

	/// Partitions the triangles into ranges of `[CLUSTER_SIZE - 4, CLUSTER_SIZE]`, preferring to keep triangles
	/// sharing an edge together.
	#[profiling::function]
	pub fn split(&self) -> Result<GraphPartitioner> {
		let num_tris = self.indexes.len() as u32 / 3;
		let mut disjoint_set = DisjointSet::new(num_tris);

		// triangle on the other side of each edge
		let mut shared_edge = vec![INVALID_INDEX; self.indexes.len()];
		let mut edge_hash = HashTable::with_expected(self.indexes.len() as u32);
		for edge in 0..self.indexes.len() as u32 {
			let tri = edge / 3;
			let position0 = self.corner_position(edge);
			let position1 = self.corner_position(cycle3(edge));
			let hash0 = hash_position(position0);
			let hash1 = hash_position(position1);
			let hash = murmur32(&[hash0.min(hash1), hash0.max(hash1)]);

			let found = edge_hash.iter(hash).find(|&other| {
				shared_edge[other as usize] == INVALID_INDEX
					&& position0 == self.corner_position(cycle3(other))
					&& position1 == self.corner_position(other)
			});
			match found {
				Some(other) => {
					shared_edge[edge as usize] = other / 3;
					shared_edge[other as usize] = tri;
					disjoint_set.union_sequential(tri, other / 3);
				}
				None => edge_hash.add(hash, edge),
			}
		}

		let mut partitioner = GraphPartitioner::new(num_tris);
		partitioner.build_locality_links(&mut disjoint_set, &self.bounds, |tri| self.triangle_center(tri));

		let mut graph = partitioner.new_graph(self.indexes.len());
		for i in 0..num_tris {
			graph.start_element();
			let tri = partitioner.indexes[i as usize];
			for k in 0..3 {
				let adj = shared_edge[(tri * 3 + k) as usize];
				if adj != INVALID_INDEX {
					partitioner.add_adjacency(&mut graph, adj, 4 * 65);
				}
			}
			partitioner.add_locality_links(&mut graph, tri, 1);
		}
		partitioner.partition_strict(graph, CLUSTER_SIZE - 4, CLUSTER_SIZE, false)?;
		Ok(partitioner)
	}

	/// Marks every half edge without an opposite inside this cluster. Mesh boundary edges are never external.
	pub fn find_external_edges(&mut self) {
		let num_edges = self.indexes.len();
		self.external_edges = BitArray::new(true, num_edges);
		self.num_external_edges = num_edges as u32;

		let mut edge_hash = HashTable::with_expected(num_edges as u32);
		for edge in 0..num_edges as u32 {
			if self.boundary_edges.get(edge as usize) {
				self.external_edges.set(edge as usize, false);
				self.num_external_edges -= 1;
				continue;
			}

			let position0 = self.corner_position(edge);
			let position1 = self.corner_position(cycle3(edge));
			let hash0 = hash_position(position0);
			let hash1 = hash_position(position1);

			// opposite edges were added with their own direction
			let found = edge_hash.iter(murmur32(&[hash1, hash0])).find(|&other| {
				self.external_edges.get(other as usize)
					&& position0 == self.corner_position(cycle3(other))
					&& position1 == self.corner_position(other)
			});
			match found {
				Some(other) => {
					self.external_edges.set(edge as usize, false);
					self.external_edges.set(other as usize, false);
					self.num_external_edges -= 2;
				}
				None => edge_hash.add(murmur32(&[hash0, hash1]), edge),
			}
		}
	}

	/// Recomputes triangle count, bounds, spheres and the longest edge.
	pub fn bound(&mut self) {
		self.num_tris = self.indexes.len() as u32 / 3;
		let positions: Vec<Vec3> = (0..self.num_verts).map(|vert| self.position(vert)).collect();
		self.bounds = Bounds::from_points(positions.iter().copied());
		self.sphere_bounds = Sphere::from_points(&positions);
		self.lod_bounds = self.sphere_bounds;

		let mut max_edge_length2 = 0f32;
		for tri in self.indexes.chunks_exact(3) {
			let [p0, p1, p2] = [0, 1, 2].map(|k| positions[tri[k] as usize]);
			max_edge_length2 = max_edge_length2
				.max(p0.distance_squared(p1))
				.max(p1.distance_squared(p2))
				.max(p2.distance_squared(p0));
		}
		self.edge_length = max_edge_length2.sqrt();
	}

	#[inline]
	pub fn vert(&self, index: u32) -> &[f32] {
		let stride = self.format.vert_size();
		let start = index as usize * stride;
		&self.verts[start..start + stride]
	}

	#[inline]
	pub fn position(&self, index: u32) -> Vec3 {
		Vec3::from_slice(self.vert(index))
	}

	#[inline]
	pub fn set_position(&mut self, index: u32, position: Vec3) {
		let start = index as usize * self.format.vert_size();
		self.verts[start..start + 3].copy_from_slice(&position.to_array());
	}

	#[inline]
	fn corner_position(&self, corner: u32) -> Vec3 {
		self.position(self.indexes[corner as usize])
	}

	pub fn normal(&self, index: u32) -> Vec3 {
		Vec3::from_slice(&self.vert(index)[3..])
	}

	/// White without vertex colors.
	pub fn color(&self, index: u32) -> Vec4 {
		if self.format.has_colors {
			Vec4::from_slice(&self.vert(index)[6..])
		} else {
			Vec4::ONE
		}
	}

	pub fn uv(&self, index: u32, uv_index: u32) -> Vec2 {
		let offset = self.format.uv_offset() + uv_index as usize * 2;
		Vec2::from_slice(&self.vert(index)[offset..])
	}

	pub fn triangle_center(&self, tri: u32) -> Vec3 {
		let [p0, p1, p2] = [0, 1, 2].map(|k| self.corner_position(tri * 3 + k));
		(p0 + p1 + p2) * (1. / 3.)
	}

	pub fn is_leaf(&self) -> bool {
		self.generating_group_index == INVALID_GROUP_INDEX
	}
}

/// Bitwise comparison, so that `-0.0` and `0.0` or different NaNs stay separate vertices.
fn bits_equal(a: &[f32], b: &[f32]) -> bool {
	a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
}

#[cfg(test)]
pub(crate) mod tests {
	use super::*;

	/// `n * n` vertices on a unit grid in the xy plane, `2 * (n - 1)^2` triangles
	pub fn grid_mesh(n: u32) -> (Vec<BuildVertex>, Vec<u32>) {
		let verts = (0..n * n)
			.map(|i| BuildVertex {
				position: Vec3::new((i % n) as f32, (i / n) as f32, 0.),
				uvs: [Vec2::new((i % n) as f32, (i / n) as f32) / n as f32; MAX_NANITE_UVS as usize],
				..BuildVertex::default()
			})
			.collect();
		let mut indexes = Vec::new();
		for y in 0..n - 1 {
			for x in 0..n - 1 {
				let i = y * n + x;
				indexes.extend_from_slice(&[i, i + 1, i + n + 1, i, i + n + 1, i + n]);
			}
		}
		(verts, indexes)
	}

	pub fn grid_cluster(n: u32, mesh_boundary: bool, format: VertexFormat) -> Cluster {
		let (verts, indexes) = grid_mesh(n);
		let num_tris = indexes.len() as u32 / 3;
		let material_indexes = vec![0; num_tris as usize];
		let mut boundary_edges = BitArray::new(false, indexes.len());
		if mesh_boundary {
			let on_border = |i: u32| {
				let (x, y) = (i % n, i / n);
				(x == 0 || x == n - 1, y == 0 || y == n - 1)
			};
			for edge in 0..indexes.len() as u32 {
				let (a, b) = (indexes[edge as usize], indexes[cycle3(edge) as usize]);
				let (ax, ay) = on_border(a);
				let (bx, by) = on_border(b);
				let same_column = a % n == b % n;
				let same_row = a / n == b / n;
				if (ax && bx && same_column) || (ay && by && same_row) {
					boundary_edges.set(edge as usize, true);
				}
			}
		}
		let mesh = SourceMesh {
			verts: &verts,
			indexes: &indexes,
			material_indexes: &material_indexes,
			boundary_edges: &boundary_edges,
			format,
		};
		let tri_indexes: Vec<u32> = (0..num_tris).collect();
		Cluster::from_mesh(&mesh, &tri_indexes, 0..num_tris)
	}

	#[test]
	fn leaf_cluster() {
		let cluster = grid_cluster(5, false, VertexFormat::default());
		assert_eq!(cluster.num_verts, 25);
		assert_eq!(cluster.num_tris, 32);
		assert_eq!(cluster.verts.len(), 25 * 6);
		// every border edge lacks an opposite
		assert_eq!(cluster.num_external_edges, 4 * 4);
		assert_eq!(cluster.external_edges.count_ones(), 16);
		assert!((cluster.surface_area - 16.).abs() < 1e-4);
		assert!((cluster.edge_length - 2f32.sqrt()).abs() < 1e-5);
		assert_eq!(cluster.bounds, Bounds::new(Vec3::ZERO, Vec3::new(4., 4., 0.)));
		for vert in 0..cluster.num_verts {
			assert!(cluster.sphere_bounds.radius() + 1e-4 >= cluster.sphere_bounds.center().distance(cluster.position(vert)));
		}
	}

	#[test]
	fn mesh_boundary_is_not_external() {
		let cluster = grid_cluster(5, true, VertexFormat::default());
		assert_eq!(cluster.boundary_edges.count_ones(), 16);
		assert_eq!(cluster.num_external_edges, 0);
	}

	#[test]
	fn leaf_sanitizes_attributes() {
		let verts = [
			BuildVertex {
				normal: Vec3::NAN,
				color: [255, 0, 0, 255],
				uvs: [Vec2::new(f32::NAN, 0.5); MAX_NANITE_UVS as usize],
				..BuildVertex::default()
			},
			BuildVertex {
				position: Vec3::X,
				normal: Vec3::new(0., 3., 0.),
				..BuildVertex::default()
			},
			BuildVertex {
				position: Vec3::Y,
				..BuildVertex::default()
			},
		];
		let indexes = [0, 1, 2];
		let boundary_edges = BitArray::new(true, 3);
		let format = VertexFormat {
			num_tex_coords: 1,
			has_colors: true,
		};
		let mesh = SourceMesh {
			verts: &verts,
			indexes: &indexes,
			material_indexes: &[3],
			boundary_edges: &boundary_edges,
			format,
		};
		let cluster = Cluster::from_mesh(&mesh, &[0], 0..1);
		assert_eq!(cluster.verts.len(), 3 * 12);
		assert_eq!(cluster.normal(0), Vec3::Z);
		assert_eq!(cluster.normal(1), Vec3::Y);
		assert_eq!(cluster.color(0), Vec4::new(1., 0., 0., 1.));
		assert_eq!(cluster.uv(0, 0), Vec2::new(0., 0.5));
		assert_eq!(cluster.material_indexes, [3]);
		assert_eq!(cluster.num_external_edges, 0);
	}

	#[test]
	fn split_then_merge() -> anyhow::Result<()> {
		let cluster = grid_cluster(17, true, VertexFormat::default());
		assert_eq!(cluster.num_tris, 512);

		let partitioner = cluster.split()?;
		assert!(partitioner.ranges.len() >= 4);
		let children: Vec<Cluster> = partitioner
			.ranges
			.iter()
			.map(|range| Cluster::from_split(&cluster, &partitioner.indexes, range.clone()))
			.collect();
		for child in &children {
			assert!(child.num_tris <= CLUSTER_SIZE);
			assert!(child.num_external_edges > 0);
		}
		assert_eq!(children.iter().map(|c| c.num_tris).sum::<u32>(), 512);

		let guids: rustc_hash::FxHashSet<u32> = children.iter().map(|c| c.guid).collect();
		assert_eq!(guids.len(), children.len());

		let merged = Cluster::merge(&children.iter().collect::<Vec<_>>());
		assert_eq!(merged.num_tris, 512);
		assert_eq!(merged.num_verts, 17 * 17);
		assert_eq!(merged.mip_level, 1);
		assert_eq!(merged.boundary_edges.count_ones(), cluster.boundary_edges.count_ones());
		assert_eq!(merged.bounds, cluster.bounds);
		Ok(())
	}

	#[test]
	fn simplify_planar_grid() {
		let format = VertexFormat {
			num_tex_coords: 1,
			has_colors: false,
		};
		let mut cluster = grid_cluster(16, true, format);
		assert_eq!(cluster.simplify(1000), 0.);
		assert_eq!(cluster.num_tris, 450);

		let error = cluster.simplify(100);
		assert!(error.is_finite() && error >= 0.);
		assert!(cluster.num_tris <= 100);
		assert_eq!(cluster.indexes.len(), cluster.num_tris as usize * 3);
		assert_eq!(cluster.boundary_edges.len(), cluster.indexes.len());
		for vert in 0..cluster.num_verts {
			let p = cluster.position(vert);
			assert!(p.z.abs() < 1e-4);
			assert!(p.x >= -1e-4 && p.x <= 15. + 1e-4);
		}
		for &index in &cluster.indexes {
			assert!(index < cluster.num_verts);
		}
	}
}
