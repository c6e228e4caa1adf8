//! Entry point of the pipeline: checks the input, clusters the triangles of every mesh, builds the DAG above the
//! leaf clusters and encodes it into streamable pages.

use crate::cluster::{BuildVertex, CLUSTER_SIZE, Cluster, ClusterGroup, SourceMesh, VertexFormat};
use crate::containers::{BitArray, DisjointSet, HashTable};
use crate::dag::{build_dag, find_dag_cut};
use crate::encode::encode;
use crate::encode::quantize::{MAX_POSITION_PRECISION, MIN_POSITION_PRECISION};
use crate::error::{BuildError, Result};
use crate::math::{cycle3, floor_log2, hash_position, murmur32};
use crate::partition::GraphPartitioner;
use glam::Vec3;
use nanite_disk::constants::{MAX_CLUSTER_MATERIALS, MAX_NANITE_UVS};
use nanite_disk::resources::Resources;
use nanite_disk::shape::Bounds;
use nanite_disk::stats::{BuildStats, DagStats, SourceMeshStats};
use rayon::prelude::*;
use std::ops::Range;

const INVALID_EDGE: u32 = u32::MAX;
const SHARED_EDGE_COST: i32 = 4 * 65;
const LOCALITY_COST: i32 = 1;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Settings {
	/// Positions are snapped to a grid of `2^-position_precision` units, or [`Self::AUTO_PRECISION`]. Explicit
	/// precisions lie in [`MIN_POSITION_PRECISION`]`..=`[`MAX_POSITION_PRECISION`].
	pub position_precision: i32,
}

impl Settings {
	pub const AUTO_PRECISION: i32 = i32::MIN;

	fn validate(&self) -> Result<()> {
		let precision = self.position_precision;
		if precision != Self::AUTO_PRECISION && !(MIN_POSITION_PRECISION..=MAX_POSITION_PRECISION).contains(&precision) {
			return Err(BuildError::PositionPrecisionOutOfRange { precision });
		}
		Ok(())
	}
}

impl Default for Settings {
	fn default() -> Self {
		Self {
			position_precision: Self::AUTO_PRECISION,
		}
	}
}

/// Triangles of one or more meshes sharing a vertex buffer. Mesh `i` owns the next `mesh_triangle_counts[i]`
/// triangles of `indexes`, every triangle has one entry in `material_indexes`.
#[derive(Copy, Clone, Debug)]
pub struct BuildInput<'a> {
	pub verts: &'a [BuildVertex],
	pub indexes: &'a [u32],
	pub material_indexes: &'a [i32],
	pub mesh_triangle_counts: &'a [u32],
	/// clamped to [`MAX_NANITE_UVS`]
	pub num_tex_coords: u32,
}

impl BuildInput<'_> {
	pub fn num_triangles(&self) -> u32 {
		self.indexes.len() as u32 / 3
	}

	fn validate(&self) -> Result<()> {
		if self.indexes.is_empty() {
			return Err(BuildError::EmptyMesh);
		}
		let num_mesh_triangles: u32 = self.mesh_triangle_counts.iter().sum();
		if self.indexes.len() != num_mesh_triangles as usize * 3 {
			return Err(BuildError::TriangleCountMismatch {
				num_indices: self.indexes.len() as u32,
				num_mesh_triangles,
			});
		}
		if self.mesh_triangle_counts.contains(&0) {
			return Err(BuildError::EmptyMesh);
		}
		if self.material_indexes.len() != num_mesh_triangles as usize {
			return Err(BuildError::MaterialCountMismatch {
				num_triangles: num_mesh_triangles,
				num_materials: self.material_indexes.len() as u32,
			});
		}
		let num_vertices = self.verts.len() as u32;
		if let Some(&index) = self.indexes.iter().find(|&&index| index >= num_vertices) {
			return Err(BuildError::IndexOutOfRange { index, num_vertices });
		}
		if let Some(vertex) = self.verts.iter().position(|vert| !vert.position.is_finite()) {
			return Err(BuildError::NonFinitePosition { vertex: vertex as u32 });
		}
		if let Some(&material_index) = self
			.material_indexes
			.iter()
			.find(|&&material| !(0..MAX_CLUSTER_MATERIALS as i32).contains(&material))
		{
			return Err(BuildError::MaterialIndexOutOfRange { material_index });
		}
		Ok(())
	}
}

/// For every half edge the lowest half edge running the opposite way between the same positions, or
/// [`INVALID_EDGE`]. Half edges without an opposite are the mesh boundary.
#[profiling::function]
fn find_shared_edges(verts: &[BuildVertex], indexes: &[u32]) -> (Vec<u32>, BitArray) {
	let num_edges = indexes.len() as u32;
	let position = |edge: u32| verts[indexes[edge as usize] as usize].position;

	let edge_hash = HashTable::new(1 << floor_log2(num_edges), num_edges);
	(0..num_edges).into_par_iter().for_each(|edge| {
		let hash = murmur32(&[hash_position(position(edge)), hash_position(position(cycle3(edge)))]);
		edge_hash.add_concurrent(hash, edge);
	});

	let shared_edges: Vec<u32> = (0..num_edges)
		.into_par_iter()
		.map(|edge| {
			let position0 = position(edge);
			let position1 = position(cycle3(edge));
			let hash = murmur32(&[hash_position(position1), hash_position(position0)]);
			// buckets fill in no particular order, the lowest match keeps the result deterministic
			edge_hash
				.iter(hash)
				.filter(|&other| position0 == position(cycle3(other)) && position1 == position(other))
				.min()
				.unwrap_or(INVALID_EDGE)
		})
		.collect();

	let mut boundary_edges = BitArray::new(false, indexes.len());
	for (edge, &other) in shared_edges.iter().enumerate() {
		if other == INVALID_EDGE {
			boundary_edges.set(edge, true);
		}
	}
	(shared_edges, boundary_edges)
}

/// Pairs every shared edge once and joins the triangles on both sides. Further half edges on a non-manifold edge
/// lose their pairing.
fn join_shared_edges(shared_edges: &mut [u32]) -> DisjointSet {
	let mut disjoint_set = DisjointSet::new(shared_edges.len() as u32 / 3);
	for edge in 0..shared_edges.len() as u32 {
		let other = shared_edges[edge as usize];
		if other == INVALID_EDGE {
			continue;
		}
		let this = shared_edges[other as usize];
		assert!(this != INVALID_EDGE && this <= edge);

		if edge > this {
			shared_edges[edge as usize] = INVALID_EDGE;
		} else if edge > other {
			disjoint_set.union_sequential(edge / 3, other / 3);
		}
	}
	disjoint_set
}

/// Partitions the triangles of `mesh` into leaf clusters of `[CLUSTER_SIZE - 4, CLUSTER_SIZE]` triangles.
#[profiling::function]
fn cluster_triangles(
	mesh: &SourceMesh,
	shared_edges: &[u32],
	disjoint_set: &mut DisjointSet,
	bounds: &Bounds,
) -> Result<Vec<Cluster>> {
	let num_tris = mesh.indexes.len() as u32 / 3;
	let triangle_center = |tri: u32| {
		(0..3)
			.map(|k| mesh.verts[mesh.indexes[(tri * 3 + k) as usize] as usize].position)
			.sum::<Vec3>()
			/ 3.
	};

	let mut partitioner = GraphPartitioner::new(num_tris);
	partitioner.build_locality_links(disjoint_set, bounds, triangle_center);
	let mut graph = partitioner.new_graph(mesh.indexes.len());
	for i in 0..num_tris {
		graph.start_element();
		let tri = partitioner.indexes[i as usize];
		for k in 0..3 {
			let edge = shared_edges[(tri * 3 + k) as usize];
			if edge != INVALID_EDGE {
				partitioner.add_adjacency(&mut graph, edge / 3, SHARED_EDGE_COST);
			}
		}
		partitioner.add_locality_links(&mut graph, tri, LOCALITY_COST);
	}
	partitioner.partition_strict(graph, CLUSTER_SIZE - 4, CLUSTER_SIZE, true)?;
	assert!(!partitioner.ranges.is_empty());

	let optimal_num_clusters = num_tris.div_ceil(CLUSTER_SIZE);
	log::info!(
		"clustered {} triangles into {} clusters, ratio {:.3}",
		num_tris,
		partitioner.ranges.len(),
		partitioner.ranges.len() as f32 / optimal_num_clusters as f32
	);

	let clusters = {
		profiling::scope!("build leaves");
		partitioner
			.ranges
			.par_iter()
			.map(|range| {
				let mut cluster = Cluster::from_mesh(mesh, &partitioner.indexes, range.clone());
				// negative edge length marks a leaf
				cluster.edge_length *= -1.;
				cluster
			})
			.collect()
	};
	Ok(clusters)
}

/// The clusters and groups of all meshes, before encoding.
#[derive(Clone, Debug)]
pub struct Dag {
	pub clusters: Vec<Cluster>,
	pub groups: Vec<ClusterGroup>,
	/// the group holding only the root cluster, per mesh
	pub root_groups: Vec<u32>,
	pub format: VertexFormat,
	pub stats: BuildStats,
}

impl Dag {
	/// Clusters every mesh of `input` and reduces each one down to a single root cluster.
	#[profiling::function]
	pub fn build(input: &BuildInput) -> Result<Self> {
		input.validate()?;

		let num_tex_coords = input.num_tex_coords.min(MAX_NANITE_UVS);
		if num_tex_coords != input.num_tex_coords {
			log::warn!("{} UV channels requested, keeping {}", input.num_tex_coords, num_tex_coords);
		}
		// only trust colors that are not all white
		let has_colors = input.verts.iter().any(|vert| vert.color != [255; 4]);
		let format = VertexFormat {
			num_tex_coords,
			has_colors,
		};
		let vertex_bounds = Bounds::from_points(input.verts.iter().map(|vert| vert.position));

		let mut clusters = Vec::new();
		let mut leaf_ranges: Vec<Range<u32>> = Vec::with_capacity(input.mesh_triangle_counts.len());
		let mut triangle_start = 0;
		for &num_tris in input.mesh_triangle_counts {
			let triangles = triangle_start as usize..(triangle_start + num_tris) as usize;
			let indexes = &input.indexes[triangles.start * 3..triangles.end * 3];

			let (mut shared_edges, boundary_edges) = find_shared_edges(input.verts, indexes);
			let mut disjoint_set = join_shared_edges(&mut shared_edges);
			log::info!(
				"mesh {}: {} triangles, {} boundary edges, {} UVs{}",
				leaf_ranges.len(),
				num_tris,
				boundary_edges.count_ones(),
				num_tex_coords,
				if has_colors { ", colors" } else { "" }
			);

			let mesh = SourceMesh {
				verts: input.verts,
				indexes,
				material_indexes: &input.material_indexes[triangles],
				boundary_edges: &boundary_edges,
				format,
			};
			let leaves = cluster_triangles(&mesh, &shared_edges, &mut disjoint_set, &vertex_bounds)?;
			let start = clusters.len() as u32;
			clusters.extend(leaves);
			leaf_ranges.push(start..clusters.len() as u32);
			triangle_start += num_tris;
		}

		let mut groups = Vec::new();
		let mut root_groups = Vec::with_capacity(leaf_ranges.len());
		let mut mesh_bounds = Bounds::default();
		let mut dag_stats = DagStats::default();
		for (mesh_index, leaf_range) in leaf_ranges.into_iter().enumerate() {
			dag_stats += build_dag(&mut clusters, &mut groups, leaf_range, mesh_index as u32, &mut mesh_bounds)?;
			root_groups.push(groups.len() as u32 - 1);
		}
		log::info!(
			"DAG: {} clusters ({} leaves) in {} groups, {} levels",
			dag_stats.clusters,
			dag_stats.leaf_clusters,
			dag_stats.groups,
			dag_stats.levels
		);

		Ok(Self {
			clusters,
			groups,
			root_groups,
			format,
			stats: BuildStats {
				source: SourceMeshStats {
					meshes: input.mesh_triangle_counts.len() as u32,
					vertices: input.verts.len() as u32,
					triangles: input.num_triangles(),
					bounds: vertex_bounds,
				},
				dag: dag_stats,
				..BuildStats::default()
			},
		})
	}

	pub fn num_meshes(&self) -> u32 {
		self.root_groups.len() as u32
	}

	/// The coarsest selection of clusters of mesh `mesh_index` with more than `target_num_tris` triangles, merged into
	/// a single cluster.
	pub fn cut(&self, mesh_index: u32, target_num_tris: u32) -> Cluster {
		find_dag_cut(
			&self.groups,
			&self.clusters,
			self.root_groups[mesh_index as usize],
			target_num_tris,
		)
	}

	#[profiling::function]
	pub fn encode(mut self, settings: &Settings) -> Result<Resources> {
		settings.validate()?;
		let mut resources = Resources {
			num_input_triangles: self.stats.source.triangles,
			num_input_vertices: self.stats.source.vertices,
			stats: self.stats,
			..Resources::default()
		};
		let num_meshes = self.num_meshes();
		encode(
			&mut resources,
			settings,
			&mut self.clusters,
			&mut self.groups,
			num_meshes,
			self.format.num_tex_coords,
		)?;

		let encoding = &resources.stats.encoding;
		log::info!(
			"encoded {} pages ({} root), {} hierarchy nodes, root {} bytes, streamable {} bytes, precision {}",
			encoding.pages,
			encoding.root_pages,
			encoding.hierarchy_nodes,
			encoding.root_bytes_compressed,
			encoding.streamable_bytes_compressed,
			encoding.position_precision
		);
		Ok(resources)
	}
}

/// Builds the streamable representation of all meshes in `input`.
pub fn build(input: &BuildInput, settings: &Settings) -> Result<Resources> {
	settings.validate()?;
	Dag::build(input)?.encode(settings)
}
