//! Builds the LOD hierarchy of a mesh by repeatedly grouping clusters, simplifying each group and splitting it into
//! parent clusters, until a single root cluster remains.

use crate::cluster::{CLUSTER_SIZE, Cluster, ClusterGroup, INVALID_GROUP_INDEX};
use crate::containers::{BinaryHeap, DisjointSet, HashTable};
use crate::error::Result;
use crate::math::{cycle3, floor_log2, hash_position, murmur32};
use crate::partition::GraphPartitioner;
use nanite_disk::constants::{MAX_CLUSTERS_PER_GROUP, MAX_CLUSTERS_PER_GROUP_TARGET};
use nanite_disk::shape::{Bounds, Sphere};
use nanite_disk::stats::DagStats;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use static_assertions::const_assert;
use std::ops::Range;

pub const MIN_GROUP_SIZE: u32 = 8;
pub const MAX_GROUP_SIZE: u32 = 32;
const_assert!(MAX_GROUP_SIZE <= MAX_CLUSTERS_PER_GROUP);

/// Error of the synthetic root group, any cut may stop there.
pub const ROOT_MAX_PARENT_LOD_ERROR: f32 = 1e10;

#[derive(Copy, Clone, Debug)]
struct ExternalEdge {
	cluster: u32,
	edge: u32,
}

/// Parents of one group before they got their final cluster indices.
struct ReducedGroup {
	group: ClusterGroup,
	parents: Vec<Cluster>,
}

/// Builds the DAG above the leaf clusters `cluster_range` of mesh `mesh_index`, appending parent clusters to
/// `clusters` and groups to `groups`. The last group appended is the root group, holding only the root cluster.
#[profiling::function]
pub fn build_dag(
	clusters: &mut Vec<Cluster>,
	groups: &mut Vec<ClusterGroup>,
	cluster_range: Range<u32>,
	mesh_index: u32,
	mesh_bounds: &mut Bounds,
) -> Result<DagStats> {
	let mut stats = DagStats {
		leaf_clusters: cluster_range.len() as u32,
		..DagStats::default()
	};
	if cluster_range.is_empty() {
		return Ok(stats);
	}
	let clusters_before = clusters.len();
	let groups_before = groups.len();

	let mut level = cluster_range;
	loop {
		for cluster in &clusters[level.start as usize..level.end as usize] {
			*mesh_bounds += cluster.bounds;
		}
		if level.len() < 2 {
			break;
		}

		let level_groups: Vec<Vec<u32>> = if level.len() as u32 <= MAX_GROUP_SIZE {
			vec![level.clone().collect()]
		} else {
			partition_level(&clusters[level.start as usize..level.end as usize], mesh_bounds)?
				.into_iter()
				.map(|children| children.into_iter().map(|child| child + level.start).collect())
				.collect()
		};

		let reduced = {
			profiling::scope!("reduce groups");
			let clusters = &*clusters;
			level_groups
				.par_iter()
				.map(|children| dag_reduce(clusters, children, mesh_index))
				.collect::<Result<Vec<_>>>()?
		};

		let parents_start = clusters.len() as u32;
		for ReducedGroup { group, parents } in reduced {
			let group_index = groups.len() as u32;
			for &child in &group.children {
				clusters[child as usize].group_index = group_index;
			}
			clusters.extend(parents.into_iter().map(|mut parent| {
				parent.generating_group_index = group_index;
				parent
			}));
			groups.push(group);
		}
		level = parents_start..clusters.len() as u32;
		log::debug!(
			"mesh {mesh_index} level {}: {} groups, {} parents",
			clusters[level.start as usize].mip_level,
			level_groups.len(),
			level.len()
		);
	}

	// the root is always an acceptable cut
	let root_index = level.start;
	let root = &mut clusters[root_index as usize];
	root.group_index = groups.len() as u32;
	stats.levels = root.mip_level as u32;
	groups.push(ClusterGroup {
		bounds: root.sphere_bounds,
		lod_bounds: Sphere::default(),
		min_lod_error: -1.,
		max_parent_lod_error: ROOT_MAX_PARENT_LOD_ERROR,
		mip_level: root.mip_level + 1,
		mesh_index,
		children: vec![root_index],
		..ClusterGroup::default()
	});

	stats.clusters = stats.leaf_clusters + (clusters.len() - clusters_before) as u32;
	stats.groups = (groups.len() - groups_before) as u32;
	Ok(stats)
}

/// Partitions a level into groups of clusters that share many edges. Returns cluster indices relative to `level`.
#[profiling::function]
fn partition_level(level: &[Cluster], mesh_bounds: &Bounds) -> Result<Vec<Vec<u32>>> {
	let external_edges: Vec<ExternalEdge> = level
		.iter()
		.enumerate()
		.flat_map(|(cluster, c)| {
			c.external_edges
				.iter()
				.enumerate()
				.filter(|&(_, external)| external)
				.map(move |(edge, _)| ExternalEdge {
					cluster: cluster as u32,
					edge: edge as u32,
				})
		})
		.collect();

	let num_external_edges = external_edges.len() as u32;
	let edge_hash = HashTable::new(1 << floor_log2(num_external_edges.max(1)), num_external_edges);
	let edge_positions = |cluster: &Cluster, edge: u32| {
		(
			cluster.position(cluster.indexes[edge as usize]),
			cluster.position(cluster.indexes[cycle3(edge) as usize]),
		)
	};
	external_edges.par_iter().enumerate().for_each(|(i, external)| {
		let (position0, position1) = edge_positions(&level[external.cluster as usize], external.edge);
		let hash = murmur32(&[hash_position(position0), hash_position(position1)]);
		edge_hash.add_concurrent(hash, i as u32);
	});

	// (other cluster, shared edge count), sorted by guid for a deterministic graph
	let adjacency: Vec<Vec<(u32, u32)>> = level
		.par_iter()
		.enumerate()
		.map(|(cluster_index, cluster)| {
			let mut counts = FxHashMap::<u32, u32>::default();
			for edge in cluster.external_edges.iter().enumerate().filter(|&(_, e)| e).map(|(e, _)| e as u32) {
				let (position0, position1) = edge_positions(cluster, edge);
				let hash = murmur32(&[hash_position(position1), hash_position(position0)]);
				// all matches count, a non-manifold edge may connect more than two clusters
				for other in edge_hash.iter(hash) {
					let other = external_edges[other as usize];
					if other.cluster == cluster_index as u32 {
						continue;
					}
					let (other0, other1) = edge_positions(&level[other.cluster as usize], other.edge);
					if position0 == other1 && position1 == other0 {
						*counts.entry(other.cluster).or_insert(0) += 1;
					}
				}
			}
			let mut adjacent: Vec<(u32, u32)> = counts.into_iter().collect();
			adjacent.sort_by_key(|&(other, _)| level[other as usize].guid);
			adjacent
		})
		.collect();

	let mut disjoint_set = DisjointSet::new(level.len() as u32);
	for (cluster_index, adjacent) in adjacency.iter().enumerate() {
		for &(other, _) in adjacent {
			if cluster_index as u32 > other {
				disjoint_set.union_sequential(cluster_index as u32, other);
			}
		}
	}

	let mut partitioner = GraphPartitioner::new(level.len() as u32);
	partitioner.indexes.sort_by_key(|&index| level[index as usize].guid);
	partitioner.build_locality_links(&mut disjoint_set, mesh_bounds, |index| level[index as usize].bounds.center());

	let num_adjacency = adjacency.iter().map(|a| a.len()).sum();
	let mut graph = partitioner.new_graph(num_adjacency);
	for i in 0..level.len() {
		graph.start_element();
		let cluster_index = partitioner.indexes[i];
		let cluster = &level[cluster_index as usize];
		for &(other, num_shared_edges) in &adjacency[cluster_index as usize] {
			let other_cluster = &level[other as usize];
			// parents of the same group
			let siblings = !cluster.is_leaf() && cluster.generating_group_index == other_cluster.generating_group_index;
			let cost = num_shared_edges * if siblings { 1 } else { 16 } + 4;
			partitioner.add_adjacency(&mut graph, other, cost as i32);
		}
		partitioner.add_locality_links(&mut graph, cluster_index, 1);
	}
	partitioner.partition_strict(graph, MIN_GROUP_SIZE, MAX_GROUP_SIZE, true)?;

	Ok(partitioner
		.ranges
		.iter()
		.map(|range| partitioner.indexes[range.start as usize..range.end as usize].to_vec())
		.collect())
}

/// Merges `children` into one cluster, simplifies it and splits it into as few parents as it was sized for.
fn dag_reduce(clusters: &[Cluster], children: &[u32], mesh_index: u32) -> Result<ReducedGroup> {
	profiling::scope!("dag_reduce");
	assert!(children.len() as u32 <= MAX_CLUSTERS_PER_GROUP_TARGET);

	let mut merge_list: Vec<&Cluster> = children.iter().map(|&child| &clusters[child as usize]).collect();
	merge_list.sort_by_key(|cluster| cluster.guid);
	let mut merged = Cluster::merge(&merge_list);

	let mut num_parents = merged.indexes.len().div_ceil(CLUSTER_SIZE as usize * 6) as u32;
	let mut parent_max_lod_error = 0f32;
	let mut parents = Vec::new();

	let target_sizes: Vec<u32> = ((CLUSTER_SIZE / 2 + 1)..=(CLUSTER_SIZE - 2)).rev().step_by(2).collect();
	for (attempt, &target_cluster_size) in target_sizes.iter().enumerate() {
		let error = merged.simplify(num_parents * target_cluster_size);
		parent_max_lod_error = parent_max_lod_error.max(error);

		if num_parents == 1 {
			merged.find_external_edges();
			merged.bound();
			parents.push(merged);
			break;
		}

		let partitioner = merged.split()?;
		// the last attempt takes whatever the split gave
		if partitioner.ranges.len() as u32 <= num_parents || attempt == target_sizes.len() - 1 {
			num_parents = partitioner.ranges.len() as u32;
			parents.extend(
				partitioner
					.ranges
					.iter()
					.map(|range| Cluster::from_split(&merged, &partitioner.indexes, range.clone())),
			);
			break;
		}
	}
	debug_assert_eq!(parents.len() as u32, num_parents);

	// parents must never have less error than any of their children
	let mut child_min_lod_error = f32::MAX;
	let mut child_lod_bounds = Vec::with_capacity(children.len());
	let mut child_sphere_bounds = Vec::with_capacity(children.len());
	for &child in children {
		let child = &clusters[child as usize];
		let leaf = child.edge_length < 0.;
		child_min_lod_error = child_min_lod_error.min(if leaf { -1. } else { child.lod_error });
		parent_max_lod_error = parent_max_lod_error.max(child.lod_error);
		child_lod_bounds.push(child.lod_bounds);
		child_sphere_bounds.push(child.sphere_bounds);
	}
	let parent_lod_bounds = Sphere::from_spheres(&child_lod_bounds);

	// parents are selected as a unit, so they share their lod data
	for parent in &mut parents {
		parent.lod_bounds = parent_lod_bounds;
		parent.lod_error = parent_max_lod_error;
	}

	let mip_level = parents.iter().map(|parent| parent.mip_level).max().unwrap_or(0) - 1;
	Ok(ReducedGroup {
		group: ClusterGroup {
			bounds: Sphere::from_spheres(&child_sphere_bounds),
			lod_bounds: parent_lod_bounds,
			min_lod_error: child_min_lod_error,
			max_parent_lod_error: parent_max_lod_error,
			mip_level,
			mesh_index,
			children: children.to_vec(),
			..ClusterGroup::default()
		},
		parents,
	})
}

/// Selects the coarsest set of clusters with more than `target_num_tris` triangles, by repeatedly replacing the
/// cluster with the highest error with the children it was built from. Returns the selection merged into one cluster.
#[profiling::function]
pub fn find_dag_cut(groups: &[ClusterGroup], clusters: &[Cluster], root_group: u32, target_num_tris: u32) -> Cluster {
	let root = groups[root_group as usize].children[0];
	let mut min_error = clusters[root as usize].lod_error;

	let mut heap = BinaryHeap::with_capacity(clusters.len());
	heap.add(-min_error, root);

	while let Some(top) = heap.top() {
		let cluster = &clusters[top as usize];
		if cluster.mip_level == 0 || cluster.generating_group_index == INVALID_GROUP_INDEX {
			break;
		}

		let hit_target = heap.len() as u32 * CLUSTER_SIZE > target_num_tris;
		if hit_target && cluster.lod_error < min_error {
			break;
		}

		heap.pop();
		debug_assert!(cluster.lod_error <= min_error);
		min_error = cluster.lod_error;

		for &child in &groups[cluster.generating_group_index as usize].children {
			if !heap.is_present(child) {
				heap.add(-clusters[child as usize].lod_error, child);
			}
		}
	}

	let mut cut: Vec<&Cluster> = (0..clusters.len() as u32)
		.filter(|&index| heap.is_present(index))
		.map(|index| &clusters[index as usize])
		.collect();
	cut.sort_by_key(|cluster| cluster.guid);
	Cluster::merge(&cut)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::cluster::VertexFormat;
	use crate::cluster::tests::grid_cluster;

	/// Leaf clusters of an `n * n` grid, with the grid border as mesh boundary.
	fn grid_leaves(n: u32) -> anyhow::Result<Vec<Cluster>> {
		let mut grid = grid_cluster(n, true, VertexFormat::default());
		// curved, so that simplification has some error
		for vert in 0..grid.num_verts {
			let p = grid.position(vert);
			grid.set_position(vert, p.with_z(0.01 * (p.x * p.x + p.y * p.y)));
		}
		grid.bound();
		let partitioner = grid.split()?;
		Ok(partitioner
			.ranges
			.iter()
			.map(|range| {
				let mut leaf = Cluster::from_split(&grid, &partitioner.indexes, range.clone());
				leaf.mip_level = 0;
				leaf.edge_length *= -1.;
				leaf
			})
			.collect())
	}

	fn check_dag(clusters: &[Cluster], groups: &[ClusterGroup]) {
		let root_group = groups.last().unwrap();
		assert_eq!(root_group.children.len(), 1);
		assert_eq!(root_group.max_parent_lod_error, ROOT_MAX_PARENT_LOD_ERROR);

		for (group_index, group) in groups.iter().enumerate() {
			assert!(group.min_lod_error <= group.max_parent_lod_error);
			for &child in &group.children {
				assert_eq!(clusters[child as usize].group_index, group_index as u32);
			}
		}
		for cluster in clusters {
			assert_ne!(cluster.group_index, INVALID_GROUP_INDEX);
			assert!(cluster.num_tris <= CLUSTER_SIZE);
			if !cluster.is_leaf() {
				let generating = &groups[cluster.generating_group_index as usize];
				assert_eq!(cluster.lod_error, generating.max_parent_lod_error);
				for &child in &generating.children {
					assert!(clusters[child as usize].lod_error <= cluster.lod_error);
				}
			}
		}
	}

	#[test]
	fn single_leaf_is_root() -> anyhow::Result<()> {
		let mut clusters = vec![grid_cluster(4, true, VertexFormat::default())];
		let mut groups = Vec::new();
		let mut bounds = Bounds::default();
		let stats = build_dag(&mut clusters, &mut groups, 0..1, 0, &mut bounds)?;
		assert_eq!(clusters.len(), 1);
		assert_eq!(groups.len(), 1);
		assert_eq!(groups[0].mip_level, 1);
		assert_eq!(groups[0].min_lod_error, -1.);
		assert_eq!(stats.levels, 0);
		assert_eq!(stats.groups, 1);
		assert_eq!(bounds, clusters[0].bounds);
		Ok(())
	}

	#[test]
	fn grid_reduces_to_single_root() -> anyhow::Result<()> {
		let mut clusters = grid_leaves(33)?;
		let num_leaves = clusters.len() as u32;
		assert!(num_leaves > 1 && num_leaves <= MAX_GROUP_SIZE);

		let mut groups = Vec::new();
		let mut bounds = Bounds::default();
		let stats = build_dag(&mut clusters, &mut groups, 0..num_leaves, 0, &mut bounds)?;
		check_dag(&clusters, &groups);

		assert_eq!(stats.leaf_clusters, num_leaves);
		assert_eq!(stats.clusters, clusters.len() as u32);
		assert_eq!(stats.groups, groups.len() as u32);
		assert!(stats.levels >= 1);

		let root = &clusters[groups.last().unwrap().children[0] as usize];
		assert!(root.num_tris <= CLUSTER_SIZE);
		assert_eq!(root.mip_level as u32, stats.levels);
		assert!(root.lod_error >= 0.);
		Ok(())
	}

	#[test]
	fn grid_with_multiple_groups_per_level() -> anyhow::Result<()> {
		let mut clusters = grid_leaves(97)?;
		let num_leaves = clusters.len() as u32;
		assert!(num_leaves > MAX_GROUP_SIZE);

		let mut groups = Vec::new();
		let mut bounds = Bounds::default();
		build_dag(&mut clusters, &mut groups, 0..num_leaves, 0, &mut bounds)?;
		check_dag(&clusters, &groups);
		assert!(groups.len() > 2);
		Ok(())
	}

	#[test]
	fn cut_reaches_budget() -> anyhow::Result<()> {
		let mut clusters = grid_leaves(33)?;
		let num_leaves = clusters.len() as u32;
		let num_leaf_tris: u32 = clusters.iter().map(|c| c.num_tris).sum();
		let mut groups = Vec::new();
		build_dag(&mut clusters, &mut groups, 0..num_leaves, 0, &mut Bounds::default())?;
		let root_group = groups.len() as u32 - 1;

		// leaves have no error, so an unreachable budget expands everything
		let full = find_dag_cut(&groups, &clusters, root_group, u32::MAX);
		assert_eq!(full.num_tris, num_leaf_tris);

		let coarse = find_dag_cut(&groups, &clusters, root_group, 0);
		assert!(coarse.num_tris > 0 && coarse.num_tris <= full.num_tris);
		for &index in &coarse.indexes {
			assert!(index < coarse.num_verts);
		}
		Ok(())
	}
}
