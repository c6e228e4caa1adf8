//! Edge collapse simplification with attribute aware quadrics.
//!
//! Collapses operate on positions, not vertices: every vertex sharing a position moves together, which keeps
//! attribute seams closed. Vertices sharing a position and connected through triangles sharing a vertex form a wedge,
//! each wedge gets its own attribute solve.

use crate::containers::hash_table::INVALID_INDEX;
use crate::containers::{BinaryHeap, BitArray, DisjointSet, HashTable};
use crate::math::{cycle3, cycle3_offset, hash_position, position_bits};
use crate::quadric::{AttributeQuadric, Quadric, QuadricOptimizer};
use glam::Vec3;
use nanite_disk::shape::Bounds;
use rustc_hash::FxHashSet;
use smallvec::SmallVec;

const DEGREE_LIMIT: i32 = 24;
const DEGREE_PENALTY: f32 = 0.5;
const LOCK_PENALTY: f32 = 1e8;
const INVERSION_PENALTY: f32 = 100.;
const DEFAULT_EDGE_WEIGHT: f32 = 8.;
/// wedges with less area did not get their attributes solved
const MIN_WEDGE_AREA: f64 = 1e-8;

/// corner is at position 0 or 1 of the pair being evaluated
const MERGE_MASK: u8 = 3;
/// triangle was added to the adjacent triangles, only set on its first corner
const TRI_MASK: u8 = 1 << 2;
const LOCKED_VERT_MASK: u8 = 1 << 3;
const LOCKED_EDGE_MASK: u8 = 1 << 4;

pub type CorrectAttributesFn = fn(&mut [f32]);

#[derive(Copy, Clone, Debug)]
struct Pair {
	position0: Vec3,
	position1: Vec3,
}

type EdgeKey = [u32; 6];

fn edge_key(p0: Vec3, p1: Vec3) -> EdgeKey {
	let [a, b, c] = position_bits(p0);
	let [d, e, f] = position_bits(p1);
	[a, b, c, d, e, f]
}

/// Simplifies a mesh in place. Vertices are `3 + num_attributes` floats each, position first.
///
/// After [`Self::simplify`] the buffers still contain removed vertices and triangles, [`Self::compact`] moves the
/// remaining ones to the front so the caller can truncate to [`Self::remaining_num_verts`] and
/// [`Self::remaining_num_tris`].
pub struct MeshSimplifier<'a> {
	verts: &'a mut [f32],
	indexes: &'a mut [u32],
	material_indexes: &'a mut [i32],
	num_verts: u32,
	num_indexes: u32,
	num_attributes: u32,
	num_tris: u32,

	remaining_num_verts: u32,
	remaining_num_tris: u32,

	attribute_weights: Vec<f32>,
	edge_weight: f32,
	correct_attributes: Option<CorrectAttributesFn>,

	vert_hash: HashTable,
	corner_hash: HashTable,
	vert_ref_count: Vec<u32>,
	corner_flags: Vec<u8>,
	tri_removed: BitArray,

	pairs: Vec<Pair>,
	pair_hash0: HashTable,
	pair_hash1: HashTable,
	pair_heap: BinaryHeap<f32>,

	moved_verts: Vec<u32>,
	moved_corners: Vec<u32>,
	moved_pairs: Vec<u32>,
	reevaluate_pairs: Vec<u32>,

	tri_quadrics: Vec<AttributeQuadric>,
	edge_quadrics: Vec<Quadric>,
	edge_quadrics_valid: BitArray,

	wedge_attributes: Vec<f32>,
	wedge_disjoint_set: DisjointSet,

	locked_edges: FxHashSet<EdgeKey>,
}

impl<'a> MeshSimplifier<'a> {
	pub fn new(
		verts: &'a mut [f32],
		indexes: &'a mut [u32],
		material_indexes: &'a mut [i32],
		num_attributes: u32,
	) -> Self {
		let stride = 3 + num_attributes as usize;
		assert_eq!(verts.len() % stride, 0);
		assert_eq!(indexes.len() % 3, 0);
		let num_verts = (verts.len() / stride) as u32;
		let num_indexes = indexes.len() as u32;
		let num_tris = num_indexes / 3;
		assert_eq!(material_indexes.len(), num_tris as usize);

		// Euler's formula
		let num_edges = num_indexes
			.min((3 * num_verts).saturating_sub(6))
			.min(num_tris + num_verts);

		let mut simplifier = Self {
			verts,
			indexes,
			material_indexes,
			num_verts,
			num_indexes,
			num_attributes,
			num_tris,
			remaining_num_verts: num_verts,
			remaining_num_tris: num_tris,
			attribute_weights: vec![1.; num_attributes as usize],
			edge_weight: DEFAULT_EDGE_WEIGHT,
			correct_attributes: None,
			vert_hash: HashTable::with_expected(num_verts),
			corner_hash: HashTable::with_expected(num_indexes),
			vert_ref_count: vec![0; num_verts as usize],
			corner_flags: vec![0; num_indexes as usize],
			tri_removed: BitArray::new(false, num_tris as usize),
			pairs: Vec::with_capacity(num_edges as usize),
			pair_hash0: HashTable::with_expected(num_edges),
			pair_hash1: HashTable::with_expected(num_edges),
			pair_heap: BinaryHeap::new(),
			moved_verts: Vec::new(),
			moved_corners: Vec::new(),
			moved_pairs: Vec::new(),
			reevaluate_pairs: Vec::new(),
			tri_quadrics: Vec::new(),
			edge_quadrics: vec![Quadric::ZERO; num_indexes as usize],
			edge_quadrics_valid: BitArray::new(false, num_indexes as usize),
			wedge_attributes: Vec::new(),
			wedge_disjoint_set: DisjointSet::default(),
			locked_edges: FxHashSet::default(),
		};

		for vert in 0..num_verts {
			let hash = hash_position(simplifier.position(vert));
			simplifier.vert_hash.add(hash, vert);
		}

		for corner in 0..num_indexes {
			let vert = simplifier.indexes[corner as usize];
			simplifier.vert_ref_count[vert as usize] += 1;

			let position = simplifier.position(vert);
			simplifier.corner_hash.add(hash_position(position), corner);

			let mut pair = Pair {
				position0: position,
				position1: simplifier.position(simplifier.indexes[cycle3(corner) as usize]),
			};
			if pair.position0 != pair.position1 {
				let pair_index = simplifier.pairs.len() as u32;
				if simplifier.add_unique_pair(&mut pair, pair_index) {
					simplifier.pairs.push(pair);
				}
			}
		}

		simplifier
	}

	pub fn set_attribute_weights(&mut self, weights: &[f32]) {
		assert_eq!(weights.len(), self.num_attributes as usize);
		self.attribute_weights.copy_from_slice(weights);
	}

	pub fn set_edge_weight(&mut self, weight: f32) {
		self.edge_weight = weight;
	}

	/// Applied to freshly solved attributes, e.g. to renormalize normals.
	pub fn set_correct_attributes(&mut self, correct: CorrectAttributesFn) {
		self.correct_attributes = Some(correct);
	}

	pub fn remaining_num_verts(&self) -> u32 {
		self.remaining_num_verts
	}

	pub fn remaining_num_tris(&self) -> u32 {
		self.remaining_num_tris
	}

	#[inline]
	fn stride(&self) -> usize {
		3 + self.num_attributes as usize
	}

	#[inline]
	fn position(&self, vert: u32) -> Vec3 {
		let start = vert as usize * self.stride();
		Vec3::from_slice(&self.verts[start..start + 3])
	}

	#[inline]
	fn set_position(&mut self, vert: u32, position: Vec3) {
		let start = vert as usize * self.stride();
		position.write_to_slice(&mut self.verts[start..start + 3]);
	}

	#[inline]
	fn vert_data(&self, vert: u32) -> &[f32] {
		let start = vert as usize * self.stride();
		&self.verts[start..start + self.stride()]
	}

	#[inline]
	fn attributes(&self, vert: u32) -> &[f32] {
		&self.vert_data(vert)[3..]
	}

	#[inline]
	fn corner_position(&self, corner: u32) -> Vec3 {
		self.position(self.indexes[corner as usize])
	}

	fn normal(&self, tri: u32) -> Vec3 {
		let [p0, p1, p2] = [0, 1, 2].map(|k| self.corner_position(tri * 3 + k));
		(p2 - p0).cross(p1 - p0).normalize()
	}

	fn verts_at(&self, position: Vec3) -> SmallVec<[u32; 16]> {
		self.vert_hash
			.iter(hash_position(position))
			.filter(|&vert| self.position(vert) == position)
			.collect()
	}

	fn corners_at(&self, position: Vec3) -> SmallVec<[u32; 16]> {
		self.corner_hash
			.iter(hash_position(position))
			.filter(|&corner| self.corner_position(corner) == position)
			.collect()
	}

	fn pairs_at(&self, position: Vec3) -> SmallVec<[u32; 16]> {
		let hash = hash_position(position);
		let first = self
			.pair_hash0
			.iter(hash)
			.filter(|&pair| self.pairs[pair as usize].position0 == position);
		let second = self
			.pair_hash1
			.iter(hash)
			.filter(|&pair| self.pairs[pair as usize].position1 == position);
		first.chain(second).collect()
	}

	/// Orders the pair by position hash and adds it to the pair hashes unless an equal pair exists.
	fn add_unique_pair(&mut self, pair: &mut Pair, pair_index: u32) -> bool {
		let mut hash0 = hash_position(pair.position0);
		let mut hash1 = hash_position(pair.position1);
		if hash0 > hash1 {
			std::mem::swap(&mut hash0, &mut hash1);
			std::mem::swap(&mut pair.position0, &mut pair.position1);
		}

		let duplicate = self.pair_hash0.iter(hash0).any(|other| {
			debug_assert_ne!(other, pair_index);
			let other = &self.pairs[other as usize];
			pair.position0 == other.position0 && pair.position1 == other.position1
		});
		if duplicate {
			return false;
		}

		self.pair_hash0.add(hash0, pair_index);
		self.pair_hash1.add(hash1, pair_index);
		true
	}

	fn tri_quadric(&self, tri: u32) -> AttributeQuadric {
		let verts = [0, 1, 2].map(|k| self.indexes[(tri * 3 + k) as usize]);
		AttributeQuadric::new(
			verts.map(|v| self.position(v)),
			verts.map(|v| self.attributes(v)),
			&self.attribute_weights,
		)
	}

	fn calc_edge_quadric(&mut self, edge: u32) {
		let tri = edge / 3;
		if self.tri_removed.get(tri as usize) {
			self.edge_quadrics_valid.set(edge as usize, false);
			return;
		}

		let material = self.material_indexes[tri as usize];
		let vert0 = self.indexes[edge as usize];
		let vert1 = self.indexes[cycle3(edge) as usize];
		let position0 = self.position(vert0);
		let position1 = self.position(vert1);

		// an opposite edge sharing both vertices and the material needs no constraint
		let hash = hash_position(position1);
		let interior = self.corner_hash.iter(hash).any(|corner| {
			vert0 == self.indexes[cycle3(corner) as usize]
				&& vert1 == self.indexes[corner as usize]
				&& material == self.material_indexes[(corner / 3) as usize]
		});
		if interior {
			self.edge_quadrics_valid.set(edge as usize, false);
			return;
		}

		// attribute seams have a constrained edge on both sides, don't count them twice
		let mut weight = self.edge_weight;
		let seam = self.corner_hash.iter(hash).any(|corner| {
			position0 == self.corner_position(cycle3(corner)) && position1 == self.corner_position(corner)
		});
		if seam {
			weight *= 0.5;
		}

		self.edge_quadrics[edge as usize] = Quadric::from_edge(position0, position1, self.normal(tri), weight);
		self.edge_quadrics_valid.set(edge as usize, true);
	}

	fn is_boundary_edge(&self, edge: u32) -> bool {
		let position0 = self.corner_position(edge);
		let position1 = self.corner_position(cycle3(edge));
		!self.corner_hash.iter(hash_position(position1)).any(|corner| {
			position0 == self.corner_position(cycle3(corner)) && position1 == self.corner_position(corner)
		})
	}

	/// Locks every boundary edge not flagged in `unlocked_boundary_edges`, one bit per index.
	pub fn set_boundary_locked(&mut self, unlocked_boundary_edges: &BitArray) {
		assert_eq!(unlocked_boundary_edges.len(), self.num_indexes as usize);
		for edge in 0..self.num_indexes {
			if unlocked_boundary_edges.get(edge as usize) || !self.is_boundary_edge(edge) {
				continue;
			}

			let position0 = self.corner_position(edge);
			let position1 = self.corner_position(cycle3(edge));
			self.corner_flags[edge as usize] |= LOCKED_EDGE_MASK;
			for corner in self.corners_at(position0).into_iter().chain(self.corners_at(position1)) {
				self.corner_flags[corner as usize] |= LOCKED_VERT_MASK;
			}
			// the triangle may get removed
			self.locked_edges.insert(edge_key(position0, position1));
		}
	}

	/// Boundary edges of the remaining triangles that were not locked, in the order [`Self::compact`] emits them.
	pub fn get_boundary_unlocked(&self) -> BitArray {
		let mut unlocked = BitArray::new(false, self.remaining_num_tris as usize * 3);
		let mut output_edge = 0;
		for edge in 0..self.num_indexes {
			if self.tri_removed.get((edge / 3) as usize) {
				continue;
			}

			if self.edge_quadrics_valid.get(edge as usize) {
				let flags = self.corner_flags[edge as usize];
				let mut edge_locked = flags & LOCKED_EDGE_MASK != 0;
				// a locked edge whose triangle got replaced, only possible if both verts are locked
				let possibly_lost = flags & (LOCKED_VERT_MASK | LOCKED_EDGE_MASK) == LOCKED_VERT_MASK
					&& self.corner_flags[cycle3(edge) as usize] & LOCKED_VERT_MASK != 0;
				if possibly_lost {
					let key = edge_key(self.corner_position(edge), self.corner_position(cycle3(edge)));
					edge_locked |= self.locked_edges.contains(&key);
				}

				if !edge_locked && self.is_boundary_edge(edge) {
					unlocked.set(output_edge, true);
				}
			}
			output_edge += 1;
		}
		assert_eq!(output_edge, self.remaining_num_tris as usize * 3);
		unlocked
	}

	/// Collects the triangles around `position`, flags their corners and joins triangles sharing a vertex into wedges.
	/// Returns the union of the corner flags before flagging.
	fn gather_adj_tris(
		&mut self,
		position: Vec3,
		flag: u8,
		adj_tris: &mut SmallVec<[u32; 32]>,
		vert_degree: &mut i32,
	) -> u8 {
		let mut wedge_verts: SmallVec<[(u32, u32); 16]> = SmallVec::new();
		let mut flags_union = 0;
		for corner in self.corners_at(position) {
			*vert_degree += 1;
			flags_union |= self.corner_flags[corner as usize];
			self.corner_flags[corner as usize] |= flag;

			let tri = corner / 3;
			let first_corner = (tri * 3) as usize;
			let existing = if self.corner_flags[first_corner] & TRI_MASK != 0 {
				adj_tris.iter().position(|&t| t == tri)
			} else {
				None
			};
			let (adj_tri_index, new_tri) = match existing {
				Some(index) => (index as u32, false),
				None => {
					self.corner_flags[first_corner] |= TRI_MASK;
					adj_tris.push(tri);
					self.wedge_disjoint_set.add_defaulted(1);
					(adj_tris.len() as u32 - 1, true)
				}
			};

			let vert = self.indexes[corner as usize];
			match wedge_verts.iter().find(|(v, _)| *v == vert) {
				None => wedge_verts.push((vert, adj_tri_index)),
				Some(&(_, other)) => {
					if new_tri {
						self.wedge_disjoint_set.union_sequential(adj_tri_index, other);
					} else {
						self.wedge_disjoint_set.union(adj_tri_index, other);
					}
				}
			}
		}
		flags_union
	}

	fn is_valid_position(&self, adj_tris: &[u32], bounds: &Bounds, position: Vec3) -> bool {
		// stay near the neighbourhood
		if bounds.distance_squared(position) > bounds.size().length_squared() * 4. {
			return false;
		}
		!adj_tris.iter().any(|&tri| self.tri_will_invert(tri, position))
	}

	/// Error of collapsing `position0` and `position1`. With `move_verts` the collapse is carried out.
	fn evaluate_merge(&mut self, position0: Vec3, position1: Vec3, move_verts: bool) -> f32 {
		assert_ne!(position0, position1);

		let mut adj_tris: SmallVec<[u32; 32]> = SmallVec::new();
		self.wedge_disjoint_set.reset();
		let mut vert_degree = 0;
		let flags_union0 = self.gather_adj_tris(position0, 1, &mut adj_tris, &mut vert_degree);
		let flags_union1 = self.gather_adj_tris(position1, 2, &mut adj_tris, &mut vert_degree);
		if vert_degree == 0 {
			return 0.;
		}

		let locked0 = flags_union0 & LOCKED_VERT_MASK != 0;
		let locked1 = flags_union1 & LOCKED_VERT_MASK != 0;

		let mut penalty = 0f32;
		if vert_degree > DEGREE_LIMIT {
			penalty += DEGREE_PENALTY * (vert_degree - DEGREE_LIMIT) as f32;
		}

		let mut wedge_ids: SmallVec<[u32; 16]> = SmallVec::new();
		let mut wedge_quadrics: Vec<AttributeQuadric> = Vec::new();
		let mut adj_wedges: SmallVec<[usize; 32]> = SmallVec::new();
		for (adj_tri_index, &tri) in adj_tris.iter().enumerate() {
			let wedge_id = self.wedge_disjoint_set.find(adj_tri_index as u32);
			let tri_quadric = &self.tri_quadrics[tri as usize];
			let wedge_index = match wedge_ids.iter().position(|&id| id == wedge_id) {
				Some(wedge_index) => {
					wedge_quadrics[wedge_index].add(tri_quadric);
					wedge_index
				}
				None => {
					wedge_ids.push(wedge_id);
					wedge_quadrics.push(tri_quadric.clone());
					wedge_quadrics.len() - 1
				}
			};
			adj_wedges.push(wedge_index);
		}

		let mut optimizer = QuadricOptimizer::default();
		for wedge_quadric in &wedge_quadrics {
			optimizer.add_attribute_quadric(wedge_quadric);
		}

		let mut bounds = Bounds::default();
		let mut edge_quadric = Quadric::ZERO;
		for &tri in &adj_tris {
			for k in 0..3 {
				let corner = tri * 3 + k;
				bounds += self.corner_position(corner);
				if self.edge_quadrics_valid.get(corner as usize) {
					// only edges of this pair
					let edge_flags =
						self.corner_flags[corner as usize] | self.corner_flags[(tri * 3 + ((1 << k) & 3)) as usize];
					if edge_flags & MERGE_MASK != 0 {
						edge_quadric += self.edge_quadrics[corner as usize];
					}
				}
			}
		}
		optimizer.add_quadric(&edge_quadric);

		let new_position = {
			let is_valid = |position: Vec3| self.is_valid_position(&adj_tris, &bounds, position);
			if locked0 && locked1 {
				penalty += LOCK_PENALTY;
			}

			if locked0 && !locked1 {
				if !is_valid(position0) {
					penalty += INVERSION_PENALTY;
				}
				position0
			} else if locked1 && !locked0 {
				if !is_valid(position1) {
					penalty += INVERSION_PENALTY;
				}
				position1
			} else {
				let midpoint = (position0 + position1) * 0.5;
				let optimal = optimizer
					.optimize_full()
					.filter(|&p| is_valid(p))
					.or_else(|| optimizer.optimize_planar(midpoint).filter(|&p| is_valid(p)))
					.or_else(|| optimizer.optimize_linear(position0, position1).filter(|&p| is_valid(p)));
				match optimal {
					Some(position) => position,
					None => {
						if !is_valid(midpoint) {
							penalty += INVERSION_PENALTY;
						}
						midpoint
					}
				}
			}
		};

		let num_attributes = self.num_attributes as usize;
		self.wedge_attributes.clear();
		self.wedge_attributes.resize(wedge_quadrics.len() * num_attributes, 0.);

		let mut error = 0f32;
		let mut surface_area = 0f32;
		for (wedge_index, wedge_quadric) in wedge_quadrics.iter().enumerate() {
			let new_attributes =
				&mut self.wedge_attributes[wedge_index * num_attributes..(wedge_index + 1) * num_attributes];
			if wedge_quadric.area > MIN_WEDGE_AREA {
				let wedge_error =
					wedge_quadric.calc_attributes_and_evaluate(new_position, new_attributes, &self.attribute_weights);
				// normal length does not matter for the error but would bias the next solve
				if let Some(correct) = self.correct_attributes {
					correct(new_attributes);
				}
				error += wedge_error;
			}
			surface_area += wedge_quadric.area as f32;
		}
		error += edge_quadric.evaluate(new_position.as_dvec3()) as f32;
		// no worse than the area it could affect
		error = error.min(surface_area);

		if move_verts {
			self.begin_move_position(position0);
			self.begin_move_position(position1);

			let stride = self.stride();
			for (adj_tri_index, &tri) in adj_tris.iter().enumerate() {
				let wedge_index = adj_wedges[adj_tri_index];
				for k in 0..3 {
					let corner = (tri * 3 + k) as usize;
					let vert = self.indexes[corner];
					let old_position = self.position(vert);
					if old_position != position0 && old_position != position1 {
						continue;
					}

					self.set_position(vert, new_position);
					if wedge_quadrics[wedge_index].area > MIN_WEDGE_AREA {
						let start = vert as usize * stride + 3;
						self.verts[start..start + num_attributes].copy_from_slice(
							&self.wedge_attributes[wedge_index * num_attributes..(wedge_index + 1) * num_attributes],
						);
					}
					if locked0 || locked1 {
						self.corner_flags[corner] |= LOCKED_VERT_MASK;
					}
				}
			}

			for &pair_index in &self.moved_pairs {
				let pair = &mut self.pairs[pair_index as usize];
				debug_assert!(pair.position0 != position0 || pair.position1 != position1);
				if pair.position0 == position0 || pair.position0 == position1 {
					pair.position0 = new_position;
				}
				if pair.position1 == position0 || pair.position1 == position1 {
					pair.position1 = new_position;
				}
			}

			self.end_move_positions();

			let mut adj_verts: SmallVec<[u32; 64]> = SmallVec::new();
			for &tri in &adj_tris {
				for k in 0..3 {
					let vert = self.indexes[(tri * 3 + k) as usize];
					if !adj_verts.contains(&vert) {
						adj_verts.push(vert);
					}
				}
			}

			// reevaluate all pairs touching an adjacent triangle, presence in the heap marks them unvisited
			for vert in adj_verts {
				for pair_index in self.pairs_at(self.position(vert)) {
					if self.pair_heap.is_present(pair_index) {
						self.pair_heap.remove(pair_index);
						self.reevaluate_pairs.push(pair_index);
					}
				}
			}

			for &tri in &adj_tris {
				self.fix_up_tri(tri);
			}
		} else {
			error += penalty;
		}

		for &tri in &adj_tris {
			for k in 0..3 {
				let corner = tri * 3 + k;
				if move_verts {
					self.calc_edge_quadric(corner);
				}
				self.corner_flags[corner as usize] &= !(MERGE_MASK | TRI_MASK);
			}
		}

		error
	}

	fn begin_move_position(&mut self, position: Vec3) {
		let hash = hash_position(position);
		for vert in self.verts_at(position) {
			self.vert_hash.remove(hash, vert);
			self.moved_verts.push(vert);
		}
		for corner in self.corners_at(position) {
			self.corner_hash.remove(hash, corner);
			self.moved_corners.push(corner);
		}
		for pair_index in self.pairs_at(position) {
			let pair = self.pairs[pair_index as usize];
			self.pair_hash0.remove(hash_position(pair.position0), pair_index);
			self.pair_hash1.remove(hash_position(pair.position1), pair_index);
			self.moved_pairs.push(pair_index);
		}
	}

	fn end_move_positions(&mut self) {
		let mut moved_verts = std::mem::take(&mut self.moved_verts);
		for &vert in &moved_verts {
			self.vert_hash.add(hash_position(self.position(vert)), vert);
		}
		moved_verts.clear();
		self.moved_verts = moved_verts;

		let mut moved_corners = std::mem::take(&mut self.moved_corners);
		for &corner in &moved_corners {
			self.corner_hash.add(hash_position(self.corner_position(corner)), corner);
		}
		moved_corners.clear();
		self.moved_corners = moved_corners;

		let mut moved_pairs = std::mem::take(&mut self.moved_pairs);
		for &pair_index in &moved_pairs {
			let mut pair = self.pairs[pair_index as usize];
			if pair.position0 == pair.position1 || !self.add_unique_pair(&mut pair, pair_index) {
				// collapsed or duplicate
				self.pair_heap.remove(pair_index);
			}
			self.pairs[pair_index as usize] = pair;
		}
		moved_pairs.clear();
		self.moved_pairs = moved_pairs;
	}

	fn tri_will_invert(&self, tri: u32, new_position: Vec3) -> bool {
		let mut index_moved = 3;
		for k in 0..3 {
			if self.corner_flags[(tri * 3 + k) as usize] & MERGE_MASK != 0 {
				index_moved = if index_moved == 3 { k } else { 4 };
			}
		}
		if index_moved >= 3 {
			return false;
		}

		let corner = tri * 3 + index_moved;
		let p0 = self.corner_position(corner);
		let p1 = self.corner_position(cycle3(corner));
		let p2 = self.corner_position(cycle3_offset(corner, 2));

		let d21 = p2 - p1;
		let n0 = (p0 - p1).cross(d21);
		let n1 = (new_position - p1).cross(d21);
		n0.dot(n1) < 0.
	}

	fn fix_up_tri(&mut self, tri: u32) {
		assert!(!self.tri_removed.get(tri as usize));

		let [p0, p1, p2] = [0, 1, 2].map(|k| self.corner_position(tri * 3 + k));
		let mut remove = p0 == p1 || p1 == p2 || p2 == p0;
		if !remove {
			for k in 0..3 {
				self.remove_duplicate_verts(tri * 3 + k);
			}
			remove = self.is_duplicate_tri(tri);
		}

		if remove {
			self.tri_removed.set(tri as usize, true);
			self.remaining_num_tris -= 1;
			for k in 0..3 {
				let corner = tri * 3 + k;
				let hash = hash_position(self.corner_position(corner));
				self.corner_hash.remove(hash, corner);
				self.edge_quadrics_valid.set(corner as usize, false);
				self.set_vert_index(corner, INVALID_INDEX);
			}
		} else {
			self.tri_quadrics[tri as usize] = self.tri_quadric(tri);
		}
	}

	fn is_duplicate_tri(&self, tri: u32) -> bool {
		let [i0, i1, i2] = [0, 1, 2].map(|k| self.indexes[(tri * 3 + k) as usize]);
		self.corner_hash.iter(hash_position(self.position(i0))).any(|corner| {
			corner != tri * 3
				&& i0 == self.indexes[corner as usize]
				&& i1 == self.indexes[cycle3(corner) as usize]
				&& i2 == self.indexes[cycle3_offset(corner, 2) as usize]
		})
	}

	fn set_vert_index(&mut self, corner: u32, new_vert: u32) {
		let vert = self.indexes[corner as usize];
		assert_ne!(vert, INVALID_INDEX);
		assert!(self.vert_ref_count[vert as usize] > 0);
		if vert == new_vert {
			return;
		}

		self.vert_ref_count[vert as usize] -= 1;
		if self.vert_ref_count[vert as usize] == 0 {
			self.vert_hash.remove(hash_position(self.position(vert)), vert);
			self.remaining_num_verts -= 1;
		}

		self.indexes[corner as usize] = new_vert;
		if new_vert != INVALID_INDEX {
			self.vert_ref_count[new_vert as usize] += 1;
		}
	}

	/// Points the corner to the first bit identical vertex in the hash chain.
	fn remove_duplicate_verts(&mut self, corner: u32) {
		let vert = self.indexes[corner as usize];
		let data = self.vert_data(vert);
		let duplicate = self
			.vert_hash
			.iter(hash_position(self.position(vert)))
			.take_while(|&other| other != vert)
			.find(|&other| {
				let other_data = self.vert_data(other);
				data.iter().zip(other_data).all(|(a, b)| a.to_bits() == b.to_bits())
			});
		if let Some(other) = duplicate {
			self.set_vert_index(corner, other);
		}
	}

	/// Collapses pairs until at most `target_num_verts` and `target_num_tris` remain. Returns the largest collapse
	/// error, a squared distance.
	#[profiling::function]
	pub fn simplify(&mut self, target_num_verts: u32, target_num_tris: u32) -> f32 {
		if self.remaining_num_verts <= target_num_verts && self.remaining_num_tris <= target_num_tris {
			return 0.;
		}

		{
			profiling::scope!("quadrics");
			self.tri_quadrics = (0..self.num_tris).map(|tri| self.tri_quadric(tri)).collect();
			for edge in 0..self.num_indexes {
				self.calc_edge_quadric(edge);
			}
		}

		{
			profiling::scope!("initial heap");
			self.pair_heap = BinaryHeap::with_capacity(self.pairs.len());
			for pair_index in 0..self.pairs.len() as u32 {
				let pair = self.pairs[pair_index as usize];
				let error = self.evaluate_merge(pair.position0, pair.position1, false);
				self.pair_heap.add(error, pair_index);
			}
		}

		let mut max_error = 0f32;
		while let Some(pair_index) = self.pair_heap.pop() {
			let pair = self.pairs[pair_index as usize];
			self.pair_hash0.remove(hash_position(pair.position0), pair_index);
			self.pair_hash1.remove(hash_position(pair.position1), pair_index);

			let error = self.evaluate_merge(pair.position0, pair.position1, true);
			max_error = max_error.max(error);

			if self.remaining_num_verts <= target_num_verts && self.remaining_num_tris <= target_num_tris {
				break;
			}

			let mut reevaluate = std::mem::take(&mut self.reevaluate_pairs);
			for &pair_index in &reevaluate {
				let pair = self.pairs[pair_index as usize];
				let error = self.evaluate_merge(pair.position0, pair.position1, false);
				self.pair_heap.add(error, pair_index);
			}
			reevaluate.clear();
			self.reevaluate_pairs = reevaluate;
		}

		// locks only add a penalty, every pair stays collapsible
		assert!(
			self.remaining_num_verts <= target_num_verts && self.remaining_num_tris <= target_num_tris,
			"simplification stuck at {} verts {} tris, target {} verts {} tris",
			self.remaining_num_verts,
			self.remaining_num_tris,
			target_num_verts,
			target_num_tris
		);
		max_error
	}

	/// Moves the remaining vertices, triangles and materials to the front of their buffers.
	pub fn compact(&mut self) {
		let stride = self.stride();
		let mut output_vert = 0;
		for vert in 0..self.num_verts {
			if self.vert_ref_count[vert as usize] > 0 {
				if vert != output_vert {
					let src = vert as usize * stride;
					self.verts
						.copy_within(src..src + stride, output_vert as usize * stride);
				}
				// ref count turns into the remap
				self.vert_ref_count[vert as usize] = output_vert;
				output_vert += 1;
			}
		}
		assert_eq!(output_vert, self.remaining_num_verts);

		let mut output_tri = 0;
		for tri in 0..self.num_tris {
			if self.tri_removed.get(tri as usize) {
				continue;
			}
			for k in 0..3 {
				let vert = self.indexes[(tri * 3 + k) as usize];
				self.indexes[(output_tri * 3 + k) as usize] = self.vert_ref_count[vert as usize];
			}
			self.material_indexes[output_tri as usize] = self.material_indexes[tri as usize];
			output_tri += 1;
		}
		assert_eq!(output_tri, self.remaining_num_tris);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	/// `n * n` vertices on the XY plane
	pub fn grid(n: u32) -> (Vec<f32>, Vec<u32>) {
		let mut verts = Vec::new();
		for y in 0..n {
			for x in 0..n {
				verts.extend_from_slice(&[x as f32, y as f32, 0.]);
			}
		}
		let mut indices = Vec::new();
		for y in 0..n - 1 {
			for x in 0..n - 1 {
				let i = y * n + x;
				indices.extend_from_slice(&[i, i + 1, i + n, i + 1, i + n + 1, i + n]);
			}
		}
		(verts, indices)
	}

	#[test]
	fn single_triangle_at_budget() {
		let mut verts = vec![0., 0., 0., 1., 0., 0., 0., 1., 0.];
		let mut indices = vec![0, 1, 2];
		let mut materials = vec![0];
		let mut simplifier = MeshSimplifier::new(&mut verts, &mut indices, &mut materials, 0);
		assert_eq!(simplifier.simplify(3, 1), 0.);
		assert_eq!(simplifier.remaining_num_verts(), 3);
		assert_eq!(simplifier.remaining_num_tris(), 1);
		simplifier.compact();
		assert_eq!(indices, [0, 1, 2]);
	}

	#[test]
	fn grid_256_to_quarter() {
		let (mut verts, mut indices) = grid(256);
		let num_tris = indices.len() as u32 / 3;
		let mut materials = vec![0; num_tris as usize];
		let num_verts = verts.len() as u32 / 3;

		let mut simplifier = MeshSimplifier::new(&mut verts, &mut indices, &mut materials, 0);
		let target_tris = num_tris / 4;
		let max_error = simplifier.simplify(num_verts, target_tris);
		let remaining_verts = simplifier.remaining_num_verts();
		let remaining_tris = simplifier.remaining_num_tris();
		assert!(remaining_tris <= target_tris);
		assert!(remaining_verts > 0);
		// flat, so nothing but the boundary constraints contribute
		assert!(max_error.is_finite());
		simplifier.compact();

		indices.truncate(remaining_tris as usize * 3);
		assert!(indices.iter().all(|&i| i < remaining_verts));
		for tri in indices.chunks_exact(3) {
			assert!(tri[0] != tri[1] && tri[1] != tri[2] && tri[2] != tri[0]);
		}
	}

	#[test]
	fn locked_boundary_keeps_corners() {
		let n = 16;
		let (mut verts, mut indices) = grid(n);
		let num_tris = indices.len() as u32 / 3;
		let mut materials = vec![0; num_tris as usize];

		let mut simplifier = MeshSimplifier::new(&mut verts, &mut indices, &mut materials, 0);
		simplifier.set_boundary_locked(&BitArray::new(false, num_tris as usize * 3));
		simplifier.simplify(n * n, num_tris / 2);
		let unlocked = simplifier.get_boundary_unlocked();
		assert_eq!(unlocked.len(), simplifier.remaining_num_tris() as usize * 3);
		let remaining_verts = simplifier.remaining_num_verts() as usize;
		simplifier.compact();

		let positions: Vec<_> = verts[..remaining_verts * 3].chunks_exact(3).map(Vec3::from_slice).collect();
		let max = (n - 1) as f32;
		for corner in [Vec3::ZERO, Vec3::new(max, 0., 0.), Vec3::new(0., max, 0.), Vec3::new(max, max, 0.)] {
			assert!(positions.contains(&corner), "lost grid corner {corner}");
		}
	}

	#[test]
	fn fully_locked_grid_reaches_target() {
		let (mut verts, mut indices) = grid(4);
		let num_tris = indices.len() as u32 / 3;
		let mut materials = vec![0; num_tris as usize];

		let mut simplifier = MeshSimplifier::new(&mut verts, &mut indices, &mut materials, 0);
		simplifier.set_boundary_locked(&BitArray::new(false, num_tris as usize * 3));
		let error = simplifier.simplify(3, 1);
		assert!(error.is_finite());
		assert!(simplifier.remaining_num_verts() <= 3);
		assert!(simplifier.remaining_num_tris() <= 1);
		let remaining_verts = simplifier.remaining_num_verts();
		let remaining_tris = simplifier.remaining_num_tris() as usize;
		simplifier.compact();
		assert!(indices[..remaining_tris * 3].iter().all(|&i| i < remaining_verts));
	}

	#[test]
	fn constant_attribute_survives() {
		// fan around the origin, every vertex carries the same attribute
		let mut verts = vec![
			0., 0., 0., 0.5, //
			1., 0., 0., 0.5, //
			0., 1., 0., 0.5, //
			-1., 0., 0., 0.5, //
			0., -1., 0., 0.5,
		];
		let mut indices = vec![0, 1, 2, 0, 2, 3, 0, 3, 4, 0, 4, 1];
		let mut materials = vec![0; 4];
		let mut simplifier = MeshSimplifier::new(&mut verts, &mut indices, &mut materials, 1);
		simplifier.simplify(4, 2);
		assert!(simplifier.remaining_num_tris() <= 2);
		let remaining_verts = simplifier.remaining_num_verts() as usize;
		simplifier.compact();
		for vert in verts[..remaining_verts * 4].chunks_exact(4) {
			approx::assert_abs_diff_eq!(vert[3], 0.5, epsilon = 1e-5);
		}
	}
}
