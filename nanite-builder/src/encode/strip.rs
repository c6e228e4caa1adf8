//! Reorders cluster vertices and encodes triangles as generalized strips referencing a sliding window of the last
//! [`CONSTRAINED_CLUSTER_CACHE_SIZE`] vertices. See [`nanite_disk::strip`] for the decoder.

use crate::cluster::{Cluster, ClusterGroup};
use crate::encode::bit_writer::BitWriter;
use crate::encode::material::build_material_ranges;
use nanite_disk::constants::{CONSTRAINED_CLUSTER_CACHE_SIZE, MAX_CLUSTER_TRIANGLES, MAX_CLUSTER_VERTICES};
use nanite_disk::strip::{StripDesc, unpack_triangle_indices};
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use std::ops::Range;

const INVALID_INDEX: u32 = u32::MAX;
const INVALID_CORNER: u32 = u32::MAX;
const NUM_DWORDS: usize = (MAX_CLUSTER_TRIANGLES / 32) as usize;

/// Weights by `[is_start][has_opposite][has_left][has_right][cache_position]`
#[rustfmt::skip]
static STRIPIFY_WEIGHTS: [[[[[i32; 32]; 2]; 2]; 2]; 2] = [
	[
		[
			[
				[142, 124, 131, 184, 138, 149, 148, 127, 154, 148, 152, 133, 133, 132, 170, 141, 109, 148, 138, 117, 126, 112, 144, 126, 116, 139, 122, 141, 122, 133, 134, 137],
				[128, 144, 134, 122, 130, 133, 129, 122, 128, 107, 127, 126, 89, 135, 88, 130, 94, 134, 103, 118, 128, 96, 90, 139, 89, 139, 113, 100, 119, 131, 113, 121],
			],
			[
				[128, 144, 134, 129, 110, 142, 111, 140, 116, 139, 98, 110, 125, 143, 122, 109, 127, 154, 113, 119, 126, 131, 123, 127, 93, 118, 101, 93, 131, 139, 130, 139],
				[120, 128, 137, 105, 113, 121, 120, 120, 112, 117, 124, 129, 129, 98, 137, 133, 122, 159, 141, 104, 129, 119, 98, 111, 110, 115, 114, 125, 115, 140, 109, 137],
			],
		],
		[
			[
				[128, 137, 154, 169, 140, 162, 156, 157, 164, 144, 171, 145, 148, 146, 124, 138, 144, 158, 140, 137, 141, 145, 140, 148, 110, 160, 128, 129, 144, 155, 125, 123],
				[124, 115, 136, 131, 145, 143, 159, 144, 158, 165, 128, 191, 135, 173, 147, 137, 128, 163, 164, 151, 162, 178, 161, 143, 168, 166, 122, 160, 170, 175, 132, 109],
			],
			[
				[134, 112, 132, 123, 126, 138, 148, 138, 145, 136, 146, 133, 141, 165, 139, 145, 119, 167, 135, 120, 146, 120, 117, 136, 102, 156, 128, 120, 132, 143, 91, 136],
				[140, 95, 118, 117, 127, 102, 119, 119, 134, 107, 135, 128, 109, 133, 120, 122, 132, 150, 152, 119, 128, 137, 119, 128, 131, 165, 156, 143, 135, 134, 135, 154],
			],
		],
	],
	[
		[
			[
				[139, 132, 139, 133, 130, 134, 135, 131, 133, 139, 141, 139, 132, 136, 139, 150, 140, 137, 143, 157, 149, 157, 168, 155, 159, 181, 176, 185, 219, 167, 133, 143],
				[125, 127, 126, 131, 128, 114, 130, 126, 129, 131, 125, 127, 131, 126, 137, 129, 140, 99, 142, 99, 149, 121, 155, 118, 131, 156, 168, 144, 175, 155, 112, 129],
			],
			[
				[129, 129, 128, 128, 128, 129, 128, 129, 130, 127, 131, 130, 131, 130, 134, 133, 136, 134, 134, 138, 144, 139, 137, 154, 147, 141, 175, 214, 140, 140, 130, 122],
				[128, 128, 124, 123, 125, 107, 127, 128, 125, 128, 128, 128, 128, 128, 128, 130, 107, 124, 136, 119, 139, 127, 132, 140, 125, 150, 133, 150, 138, 130, 127, 127],
			],
		],
		[
			[
				[104, 125, 126, 129, 126, 122, 128, 126, 126, 127, 125, 122, 130, 126, 130, 131, 130, 132, 118, 101, 119, 121, 143, 114, 122, 145, 132, 144, 116, 142, 114, 127],
				[128, 124, 93, 126, 108, 128, 127, 122, 128, 126, 128, 123, 92, 125, 98, 99, 127, 131, 126, 128, 121, 133, 113, 121, 122, 137, 145, 138, 137, 109, 129, 100],
			],
			[
				[119, 128, 122, 128, 127, 123, 126, 128, 126, 122, 120, 127, 128, 122, 130, 121, 138, 122, 136, 130, 133, 124, 139, 134, 138, 118, 139, 145, 132, 122, 124, 86],
				[116, 124, 119, 126, 118, 113, 114, 125, 128, 111, 129, 122, 129, 129, 135, 130, 138, 132, 115, 138, 114, 119, 122, 136, 138, 128, 141, 119, 139, 119, 130, 128],
			],
		],
	],
];

// A corner is `triangle << 2 | vertex`, vertex in 0..3.

#[inline]
fn set_corner(tri: u32, vertex: u32) -> u32 {
	tri << 2 | vertex
}

#[inline]
fn corner_to_triangle(corner: u32) -> u32 {
	corner >> 2
}

#[inline]
fn next_corner(corner: u32) -> u32 {
	if corner & 3 == 2 { corner - 2 } else { corner + 1 }
}

#[inline]
fn prev_corner(corner: u32) -> u32 {
	if corner & 3 == 0 { corner + 2 } else { corner - 1 }
}

#[inline]
fn corner_to_index(corner: u32) -> usize {
	((corner >> 2) * 3 + (corner & 3)) as usize
}

/// Evicts every vertex that would fall out of the cache window once the new vertices of a triangle are added.
/// Returns the number of vertices the triangle adds.
fn evict(new_indexes: &mut [u32; 3], num_vertices: u32) -> u32 {
	let mut num_new = new_indexes.iter().filter(|&&index| index == INVALID_INDEX).count() as u32;
	let mut next_vertex = num_vertices + num_new;
	loop {
		let mut evicted = false;
		for index in new_indexes.iter_mut() {
			if *index != INVALID_INDEX && next_vertex - *index >= CONSTRAINED_CLUSTER_CACHE_SIZE {
				*index = INVALID_INDEX;
				num_new += 1;
				next_vertex += 1;
				evicted = true;
			}
		}
		if !evicted {
			return num_new;
		}
	}
}

struct Stripifier<'a> {
	indexes: &'a [u32],
	/// by [`corner_to_index`]
	opposite_corners: Vec<u32>,
	triangle_priorities: Vec<f32>,

	old_to_new: Vec<u32>,
	new_to_old: Vec<u32>,
	triangles_enabled: [u32; NUM_DWORDS],
	/// `[dword][S, L, W]`
	strip_bitmasks: [[u32; 3]; NUM_DWORDS],
	num_triangles: u32,
}

impl<'a> Stripifier<'a> {
	fn new(cluster: &'a Cluster) -> Self {
		let indexes = &cluster.indexes[..];
		let num_tris = cluster.num_tris;

		let triangle_priorities = (0..num_tris)
			.map(|tri| {
				let [p0, p1, p2] = [0, 1, 2].map(|k| cluster.position(indexes[(tri * 3 + k) as usize]));
				(p0 + p1 + p2).x
			})
			.collect();

		// every directed edge keeps a stack of the corners opposite to it
		let mut edge_heads: FxHashMap<(u32, u32), u32> = FxHashMap::default();
		let mut next_node = vec![INVALID_CORNER; indexes.len()];
		for tri in 0..num_tris {
			for k in 0..3 {
				let edge = (indexes[tri_vertex(tri, k + 1)], indexes[tri_vertex(tri, k + 2)]);
				let node = set_corner(tri, k);
				next_node[corner_to_index(node)] = edge_heads.insert(edge, node).unwrap_or(INVALID_CORNER);
			}
		}

		let mut opposite_corners = vec![INVALID_CORNER; indexes.len()];
		for tri in 0..num_tris {
			for k in 0..3 {
				let edge = (indexes[tri_vertex(tri, k + 2)], indexes[tri_vertex(tri, k + 1)]);
				if let Some(head) = edge_heads.get_mut(&edge) {
					if *head != INVALID_CORNER {
						opposite_corners[corner_to_index(set_corner(tri, k))] = *head;
						*head = next_node[corner_to_index(*head)];
					}
				}
			}
		}

		Self {
			indexes,
			opposite_corners,
			triangle_priorities,
			old_to_new: vec![INVALID_INDEX; cluster.num_verts as usize],
			new_to_old: Vec::with_capacity(indexes.len()),
			triangles_enabled: [0; NUM_DWORDS],
			strip_bitmasks: [[0; 3]; NUM_DWORDS],
			num_triangles: 0,
		}
	}

	#[inline]
	fn num_vertices(&self) -> u32 {
		self.new_to_old.len() as u32
	}

	#[inline]
	fn old_index(&self, corner: u32) -> u32 {
		self.indexes[corner_to_index(corner)]
	}

	#[inline]
	fn new_index(&self, corner: u32) -> u32 {
		self.old_to_new[self.old_index(corner) as usize]
	}

	#[inline]
	fn opposite(&self, corner: u32) -> u32 {
		self.opposite_corners[corner_to_index(corner)]
	}

	#[inline]
	fn is_triangle_enabled(&self, tri: u32) -> bool {
		self.triangles_enabled[(tri >> 5) as usize] & (1 << (tri & 31)) != 0
	}

	#[inline]
	fn is_corner_enabled(&self, corner: u32) -> bool {
		corner != INVALID_CORNER && self.is_triangle_enabled(corner_to_triangle(corner))
	}

	fn set_triangle_enabled(&mut self, tri: u32, enabled: bool) {
		let mask = 1 << (tri & 31);
		let dword = &mut self.triangles_enabled[(tri >> 5) as usize];
		if enabled {
			*dword |= mask;
		} else {
			*dword &= !mask;
		}
	}

	fn score_triangle(&self, tri: u32, is_start: bool, has_opposite: bool, has_left: bool, has_right: bool) -> i32 {
		let weights = &STRIPIFY_WEIGHTS[is_start as usize][has_opposite as usize][has_left as usize][has_right as usize];
		(0..3)
			.map(|k| {
				let new_index = self.old_to_new[self.indexes[tri_vertex(tri, k)] as usize];
				if new_index != INVALID_INDEX {
					let cache_position = self.num_vertices() - 1 - new_index;
					if cache_position < CONSTRAINED_CLUSTER_CACHE_SIZE {
						return weights[cache_position as usize];
					}
				}
				0
			})
			.sum()
	}

	/// Vertices of the triangle at `corner` in strip order: the edge opposite to `corner`, then `corner` itself.
	fn strip_corners(corner: u32) -> [u32; 3] {
		[next_corner(corner), prev_corner(corner), corner]
	}

	/// Appends the triangle at `corner` to the strip and returns the number of vertices it added.
	fn visit_triangle(&mut self, corner: u32, is_start: bool, is_right: bool) -> u32 {
		let corners = Self::strip_corners(corner);
		let old_indexes = corners.map(|c| self.old_index(c));
		let mut new_indexes = corners.map(|c| self.new_index(c));
		let num_new = evict(&mut new_indexes, self.num_vertices());

		let dword = (self.num_triangles >> 5) as usize;
		let bit = 1 << (self.num_triangles & 31);
		let [s_mask, l_mask, w_mask] = &mut self.strip_bitmasks[dword];
		if is_start {
			*s_mask |= bit;
			let num_refs = 3 - num_new;
			if num_refs & 2 != 0 {
				*l_mask |= bit;
			}
			if num_refs & 1 != 0 {
				*w_mask |= bit;
			}
		} else {
			assert!(new_indexes[0] != INVALID_INDEX && new_indexes[1] != INVALID_INDEX);
			if !is_right {
				*l_mask |= bit;
			}
			if new_indexes[2] != INVALID_INDEX {
				*w_mask |= bit;
			}
		}

		for (new_index, old_index) in new_indexes.into_iter().zip(old_indexes) {
			if new_index == INVALID_INDEX {
				self.old_to_new[old_index as usize] = self.num_vertices();
				self.new_to_old.push(old_index);
			}
		}

		self.num_triangles += 1;
		self.set_triangle_enabled(corner_to_triangle(corner), false);
		num_new
	}

	/// The best corner of an enabled triangle to start a strip at, if any triangle is left.
	fn find_start(&self, tris: Range<u32>) -> Option<u32> {
		let mut start_corner = None;
		let mut best_score = -1;
		let mut best_priority = i32::MIN as f32;
		for tri in tris {
			if !self.is_triangle_enabled(tri) {
				continue;
			}
			for k in 0..3 {
				let corner = set_corner(tri, k);
				let mut new_indexes = Self::strip_corners(corner).map(|c| self.new_index(c));
				evict(&mut new_indexes, self.num_vertices());

				// references must come first
				let new_mask = (new_indexes[0] == INVALID_INDEX) as u32
					| ((new_indexes[1] == INVALID_INDEX) as u32) << 1
					| ((new_indexes[2] == INVALID_INDEX) as u32) << 2;
				if !matches!(new_mask, 0 | 4 | 6 | 7) {
					continue;
				}

				let has_opposite = self.is_corner_enabled(self.opposite(corner));
				let has_left = self.is_corner_enabled(self.opposite(next_corner(corner)));
				let has_right = self.is_corner_enabled(self.opposite(prev_corner(corner)));
				let score = self.score_triangle(tri, true, has_opposite, has_left, has_right);
				if score > best_score {
					start_corner = Some(corner);
					best_score = score;
				} else if score == best_score {
					let priority = self.triangle_priorities[tri as usize];
					if priority > best_priority {
						start_corner = Some(corner);
						best_priority = priority;
					}
				}
			}
		}
		start_corner
	}

	fn score_neighbour(&self, corner: u32, is_left: bool) -> Option<i32> {
		if !self.is_corner_enabled(corner) {
			return None;
		}
		let has_left = self.is_corner_enabled(self.opposite(next_corner(corner)));
		let has_right = self.is_corner_enabled(self.opposite(prev_corner(corner)));
		Some(self.score_triangle(corner_to_triangle(corner), false, is_left, has_left, has_right))
	}

	/// Whether appending the triangle at `corner` keeps both shared vertices inside the cache window.
	fn fits_window(&self, corner: u32) -> bool {
		let [new0, new1, new2] = Self::strip_corners(corner).map(|c| self.new_index(c));
		assert!(new0 != INVALID_INDEX && new1 != INVALID_INDEX);
		let num_vertices = self.num_vertices();
		let third_is_new = new2 == INVALID_INDEX || num_vertices - new2 >= CONSTRAINED_CLUSTER_CACHE_SIZE;
		let next_num_vertices = num_vertices + third_is_new as u32;
		next_num_vertices - new0 < CONSTRAINED_CLUSTER_CACHE_SIZE && next_num_vertices - new1 < CONSTRAINED_CLUSTER_CACHE_SIZE
	}

	fn stripify(mut self, cluster: &Cluster) -> (Vec<u32>, StripDesc, Vec<u8>) {
		let mut index_data = Vec::new();
		let mut writer = BitWriter::new(&mut index_data);
		let mut new_vertices_in_dword = [0u32; NUM_DWORDS];
		let mut ref_vertices_in_dword = [0u32; NUM_DWORDS];

		for range in &cluster.material_ranges {
			let tris = range.start..range.start + range.length;
			for tri in tris.clone() {
				self.set_triangle_enabled(tri, true);
			}

			while let Some(start_corner) = self.find_start(tris.clone()) {
				let dword = (self.num_triangles >> 5) as usize;
				let base_vertex = self.num_vertices().wrapping_sub(1);
				let num_new = self.visit_triangle(start_corner, true, false);
				for &corner in &Self::strip_corners(start_corner)[..(3 - num_new) as usize] {
					let distance = base_vertex - self.new_index(corner);
					writer.put_bits(distance, 5);
				}
				new_vertices_in_dword[dword] += num_new;
				ref_vertices_in_dword[dword] += 3 - num_new;

				let mut current_corner = start_corner;
				while self.num_triangles % 32 != 0 {
					let left_corner = self.opposite(next_corner(current_corner));
					let right_corner = self.opposite(prev_corner(current_corner));

					let left_score = self.score_neighbour(left_corner, true);
					let right_score = self.score_neighbour(right_corner, false);
					let (next, is_right) = match (left_score, right_score) {
						(Some(left), Some(right)) if right > left => (right_corner, true),
						(Some(_), _) => (left_corner, false),
						(None, Some(_)) => (right_corner, true),
						(None, None) => break,
					};
					if !self.fits_window(next) {
						break;
					}

					let dword = (self.num_triangles >> 5) as usize;
					let base_vertex = self.num_vertices().wrapping_sub(1);
					let num_new = self.visit_triangle(next, false, is_right);
					assert!(num_new <= 1);
					if num_new == 0 {
						writer.put_bits(base_vertex - self.new_index(next), 5);
					}
					new_vertices_in_dword[dword] += num_new;
					ref_vertices_in_dword[dword] += 1 - num_new;
					current_corner = next;
				}
			}
		}
		writer.flush(4);
		assert_eq!(self.num_triangles, cluster.num_tris);

		let desc = StripDesc {
			bitmasks: self.strip_bitmasks,
			num_prev_ref_vertices_before_dwords: pack_prefix_sums(ref_vertices_in_dword),
			num_prev_new_vertices_before_dwords: pack_prefix_sums(new_vertices_in_dword),
		};
		(self.new_to_old, desc, index_data)
	}
}

#[inline]
fn tri_vertex(tri: u32, k: u32) -> usize {
	(tri * 3 + k % 3) as usize
}

/// Counts of the vertices before dword 1, 2 and 3 as 10 bit fields.
fn pack_prefix_sums(counts: [u32; NUM_DWORDS]) -> u32 {
	let p1 = counts[0];
	let p2 = p1 + counts[1];
	let p3 = p2 + counts[2];
	assert!(p3 < 1024);
	p3 << 20 | p2 << 10 | p1
}

/// Reorders the vertices and triangles of `cluster` into strip order and encodes the strips. Triangles keep their
/// material range, vertices not referenced by any triangle are dropped and vertices falling out of the cache window
/// are duplicated, so the vertex count may grow past [`MAX_CLUSTER_VERTICES`].
#[profiling::function]
pub fn stripify(cluster: &mut Cluster) {
	assert!(cluster.num_tris <= MAX_CLUSTER_TRIANGLES);
	let (new_to_old, desc, index_data) = Stripifier::new(cluster).stripify(cluster);

	let stride = cluster.format.vert_size();
	let mut verts = Vec::with_capacity(new_to_old.len() * stride);
	for &old in &new_to_old {
		verts.extend_from_slice(cluster.vert(old));
	}
	cluster.verts = verts;
	cluster.num_verts = new_to_old.len() as u32;

	for tri in 0..cluster.num_tris {
		let start = tri as usize * 3;
		cluster.indexes[start..start + 3].copy_from_slice(&unpack_triangle_indices(&desc, &index_data, tri));
	}
	cluster.strip_desc = desc;
	cluster.strip_index_data = index_data;
}

/// A copy of an already stripified `cluster` holding only the triangles in `range`, stripified on its own.
fn split_stripified(cluster: &Cluster, range: Range<u32>) -> Cluster {
	let mut half = cluster.clone();
	half.num_tris = range.len() as u32;
	half.indexes = cluster.indexes[range.start as usize * 3..range.end as usize * 3].to_vec();
	half.material_indexes = cluster.material_indexes[range.start as usize..range.end as usize].to_vec();
	build_material_ranges(&mut half);
	stripify(&mut half);
	half
}

/// Stripifies all clusters and bisects those that ended up with more than [`MAX_CLUSTER_VERTICES`]. The second half
/// is appended to `clusters` and joins the group of the cluster it was split from.
#[profiling::function]
pub fn constrain_clusters(groups: &mut [ClusterGroup], clusters: &mut Vec<Cluster>) {
	clusters.par_iter_mut().for_each(stripify);

	let num_clusters = clusters.len();
	let mut num_split = 0;
	for i in 0..num_clusters {
		let cluster = &clusters[i];
		if cluster.num_verts <= MAX_CLUSTER_VERTICES {
			continue;
		}
		let mid = cluster.num_tris / 2;
		let first = split_stripified(cluster, 0..mid);
		let second = split_stripified(cluster, mid..cluster.num_tris);
		assert!(first.num_verts <= MAX_CLUSTER_VERTICES && second.num_verts <= MAX_CLUSTER_VERTICES);

		groups[second.group_index as usize].children.push(clusters.len() as u32);
		clusters[i] = first;
		clusters.push(second);
		num_split += 1;
	}
	if num_split > 0 {
		log::debug!("split {num_split} of {num_clusters} clusters exceeding {MAX_CLUSTER_VERTICES} vertices");
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::cluster::VertexFormat;
	use crate::cluster::tests::grid_cluster;

	type Triangle = [[u32; 3]; 3];

	/// Triangles by position, rotated so that the smallest vertex comes first, keeping the winding.
	fn triangles(cluster: &Cluster) -> Vec<(Triangle, i32)> {
		let mut tris: Vec<_> = (0..cluster.num_tris)
			.map(|tri| {
				let mut t: Triangle = [0, 1, 2].map(|k| {
					let index = cluster.indexes[(tri * 3 + k) as usize];
					cluster.position(index).to_array().map(f32::to_bits)
				});
				let min = (0..3).min_by_key(|&k| t[k]).unwrap();
				t.rotate_left(min);
				(t, cluster.material_indexes[tri as usize])
			})
			.collect();
		tris.sort();
		tris
	}

	fn check_stripified(cluster: &Cluster) {
		assert_eq!(cluster.indexes.len() as u32, cluster.num_tris * 3);
		assert!(cluster.indexes.iter().all(|&i| i < cluster.num_verts));
		assert_eq!(cluster.verts.len(), cluster.num_verts as usize * cluster.format.vert_size());
		assert_eq!(cluster.strip_index_data.len() % 4, 0);
		// every vertex is referenced
		let mut used = vec![false; cluster.num_verts as usize];
		for &i in &cluster.indexes {
			used[i as usize] = true;
		}
		assert!(used.into_iter().all(|u| u));
	}

	#[test]
	fn corners() {
		assert_eq!(next_corner(set_corner(5, 2)), set_corner(5, 0));
		assert_eq!(prev_corner(set_corner(5, 0)), set_corner(5, 2));
		assert_eq!(corner_to_index(set_corner(5, 1)), 16);
		assert_eq!(corner_to_triangle(set_corner(5, 1)), 5);
	}

	#[test]
	fn grid_topology_survives() {
		let mut cluster = grid_cluster(9, false, VertexFormat::default());
		assert_eq!(cluster.num_tris, 128);
		build_material_ranges(&mut cluster);
		let before = triangles(&cluster);

		stripify(&mut cluster);
		check_stripified(&cluster);
		assert_eq!(triangles(&cluster), before);
		assert!(cluster.num_verts >= 81 && cluster.num_verts <= MAX_CLUSTER_VERTICES);
		// a connected grid mostly continues strips instead of starting new ones
		let num_starts: u32 = cluster.strip_desc.bitmasks.iter().map(|dword| dword[0].count_ones()).sum();
		assert!(num_starts < 64, "{num_starts} strips");
	}

	#[test]
	fn material_ranges_survive() {
		let mut cluster = grid_cluster(6, false, VertexFormat::default());
		cluster.material_indexes = (0..cluster.num_tris as i32).map(|tri| tri % 5).collect();
		build_material_ranges(&mut cluster);
		let ranges = cluster.material_ranges.clone();
		let before = triangles(&cluster);

		stripify(&mut cluster);
		check_stripified(&cluster);
		assert_eq!(cluster.material_ranges, ranges);
		assert_eq!(triangles(&cluster), before);
		for range in &ranges {
			for tri in range.start..range.start + range.length {
				assert_eq!(cluster.material_indexes[tri as usize], range.material as i32);
			}
		}
	}

	#[test]
	fn disjoint_triangles_are_split() {
		let mut cluster = grid_cluster(2, false, VertexFormat::default());
		let template = cluster.clone();
		let num_tris = MAX_CLUSTER_TRIANGLES;
		cluster.verts.clear();
		cluster.indexes.clear();
		for tri in 0..num_tris {
			for k in 0..3 {
				let mut vert = template.vert(template.indexes[k as usize]).to_vec();
				vert[0] += tri as f32 * 2.;
				cluster.verts.extend_from_slice(&vert);
				cluster.indexes.push(tri * 3 + k);
			}
		}
		cluster.num_tris = num_tris;
		cluster.num_verts = num_tris * 3;
		cluster.material_indexes = vec![0; num_tris as usize];
		cluster.group_index = 0;
		build_material_ranges(&mut cluster);
		let before = triangles(&cluster);

		let mut groups = vec![ClusterGroup {
			children: vec![0],
			..ClusterGroup::default()
		}];
		let mut clusters = vec![cluster];
		constrain_clusters(&mut groups, &mut clusters);

		assert_eq!(clusters.len(), 2);
		assert_eq!(groups[0].children, [0, 1]);
		assert_eq!(clusters[0].num_tris + clusters[1].num_tris, num_tris);
		let mut after = Vec::new();
		for cluster in &clusters {
			check_stripified(cluster);
			assert_eq!(cluster.num_verts, cluster.num_tris * 3);
			after.extend(triangles(cluster));
		}
		after.sort();
		assert_eq!(after, before);
	}
}
