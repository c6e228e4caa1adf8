//! Bounded fanout BVH over the group parts of every mesh, used by the runtime to find the parts to draw.

use crate::cluster::ClusterGroup;
use crate::encode::page::{ClusterGroupPart, remove_root_pages_from_range};
use glam::Vec3;
use nanite_disk::constants::*;
use nanite_disk::packed::{PackedHierarchyNode, pack_f16x2};
use nanite_disk::shape::{Bounds, Sphere};
use smallvec::SmallVec;

const FANOUT: u32 = MAX_BVH_NODE_FANOUT as u32;

#[derive(Clone, Debug)]
struct IntermediateNode {
	part_index: u32,
	is_leaf: bool,
	bounds: Bounds,
	children: SmallVec<[u32; MAX_BVH_NODE_FANOUT]>,
}

impl Default for IntermediateNode {
	fn default() -> Self {
		Self {
			part_index: INVALID_PART_INDEX,
			is_leaf: false,
			bounds: Bounds::default(),
			children: SmallVec::new(),
		}
	}
}

fn bvh_cost(nodes: &[IntermediateNode], indices: &[u32]) -> f32 {
	let bounds: Bounds = indices.iter().map(|&i| nodes[i as usize].bounds).sum();
	bounds.surface_area()
}

/// Reorders `indices` by [`MAX_BVH_NODE_FANOUT_BITS`] levels of binary splits, each along the axis giving the
/// smallest surface area of both halves. The halves are sized by `child_sizes`.
fn bvh_sort_nodes(nodes: &[IntermediateNode], indices: &mut [u32], child_sizes: &[u32; MAX_BVH_NODE_FANOUT]) {
	for level in 0..MAX_BVH_NODE_FANOUT_BITS {
		let num_buckets = 1 << level;
		let children_per_bucket = MAX_BVH_NODE_FANOUT >> level;
		let half = children_per_bucket / 2;

		let mut bucket_start = 0;
		for bucket in 0..num_buckets {
			let first = children_per_bucket * bucket;
			let size0: u32 = child_sizes[first..first + half].iter().sum();
			let size1: u32 = child_sizes[first + half..first + children_per_bucket].iter().sum();
			let bucket_indices = &mut indices[bucket_start..bucket_start + (size0 + size1) as usize];
			bucket_start += (size0 + size1) as usize;

			let sort_by_axis = |indices: &mut [u32], axis: usize| {
				indices.sort_by(|&a, &b| {
					let a = nodes[a as usize].bounds.center()[axis];
					let b = nodes[b as usize].bounds.center()[axis];
					a.total_cmp(&b)
				});
			};

			let mut best_cost = f32::MAX;
			let mut best_axis = 0;
			for axis in 0..3 {
				sort_by_axis(bucket_indices, axis);
				let (indices0, indices1) = bucket_indices.split_at(size0 as usize);
				let cost = bvh_cost(nodes, indices0) + bvh_cost(nodes, indices1);
				if cost < best_cost {
					best_cost = cost;
					best_axis = axis;
				}
			}
			if best_axis != 2 {
				sort_by_axis(bucket_indices, best_axis);
			}
		}
	}
}

/// How many of `n` nodes go below each child, such that the tree is complete with at most one partially filled level.
fn child_sizes(n: u32) -> [u32; MAX_BVH_NODE_FANOUT] {
	let mut top_size = FANOUT;
	while top_size * FANOUT <= n {
		top_size *= FANOUT;
	}

	let large_child_size = top_size;
	let small_child_size = top_size / FANOUT;
	let max_excess_per_child = large_child_size - small_child_size;

	let mut sizes = [0; MAX_BVH_NODE_FANOUT];
	let mut excess = n - top_size;
	for size in sizes.iter_mut().rev() {
		let child_excess = excess.min(max_excess_per_child);
		*size = small_child_size + child_excess;
		excess -= child_excess;
	}
	assert_eq!(excess, 0);
	sizes
}

/// Builds a tree over `indices` top down and returns its root. A single index is returned as is.
fn build_hierarchy_top_down(nodes: &mut Vec<IntermediateNode>, indices: &mut [u32], sort: bool) -> u32 {
	if indices.len() == 1 {
		return indices[0];
	}

	let root = nodes.len() as u32;
	nodes.push(IntermediateNode::default());
	let mut stack = vec![(root, 0..indices.len())];
	while let Some((node, range)) = stack.pop() {
		let n = range.len() as u32;
		if n <= FANOUT {
			nodes[node as usize].children = indices[range].iter().copied().collect();
			continue;
		}

		let sizes = child_sizes(n);
		if sort {
			bvh_sort_nodes(nodes, &mut indices[range.clone()], &sizes);
		}

		let mut offset = range.start;
		for size in sizes {
			let size = size as usize;
			let child = if size == 1 {
				indices[offset]
			} else {
				let child = nodes.len() as u32;
				nodes.push(IntermediateNode::default());
				stack.push((child, offset..offset + size));
				child
			};
			nodes[node as usize].children.push(child);
			offset += size;
		}
	}
	root
}

#[derive(Copy, Clone, Debug)]
struct HierarchyNode {
	lod_bounds: [Sphere; MAX_BVH_NODE_FANOUT],
	bounds: [Bounds; MAX_BVH_NODE_FANOUT],
	min_lod_errors: [f32; MAX_BVH_NODE_FANOUT],
	max_parent_lod_errors: [f32; MAX_BVH_NODE_FANOUT],
	children_start_index: [u32; MAX_BVH_NODE_FANOUT],
	num_children: [u32; MAX_BVH_NODE_FANOUT],
	part_index: [u32; MAX_BVH_NODE_FANOUT],
}

impl Default for HierarchyNode {
	fn default() -> Self {
		Self {
			lod_bounds: [Sphere::default(); MAX_BVH_NODE_FANOUT],
			bounds: [Bounds::new(Vec3::ZERO, Vec3::ZERO); MAX_BVH_NODE_FANOUT],
			min_lod_errors: [0.; MAX_BVH_NODE_FANOUT],
			max_parent_lod_errors: [0.; MAX_BVH_NODE_FANOUT],
			children_start_index: [0; MAX_BVH_NODE_FANOUT],
			num_children: [0; MAX_BVH_NODE_FANOUT],
			part_index: [INVALID_PART_INDEX; MAX_BVH_NODE_FANOUT],
		}
	}
}

/// Flattens the intermediate tree below `root` into hierarchy nodes, numbered depth first with the root at 0.
/// Leaf children reference their group part, which learns where it is referenced from.
fn build_hierarchy_nodes(
	nodes: &[IntermediateNode],
	root: u32,
	groups: &[ClusterGroup],
	parts: &mut [ClusterGroupPart],
) -> Vec<HierarchyNode> {
	// preorder numbering, so every child node comes after its parent
	let mut hierarchy_index = vec![u32::MAX; nodes.len()];
	let mut order = Vec::new();
	let mut stack = vec![root];
	while let Some(node_index) = stack.pop() {
		let node = &nodes[node_index as usize];
		assert!(!node.is_leaf);
		assert!(!node.children.is_empty() && node.children.len() <= MAX_BVH_NODE_FANOUT);
		hierarchy_index[node_index as usize] = order.len() as u32;
		order.push(node_index);
		stack.extend(node.children.iter().rev().filter(|&&child| !nodes[child as usize].is_leaf));
	}

	let mut hierarchy_nodes = vec![HierarchyNode::default(); order.len()];
	for (h_index, &node_index) in order.iter().enumerate().rev() {
		let mut h_node = HierarchyNode::default();
		for (child_index, &child) in nodes[node_index as usize].children.iter().enumerate() {
			let child_node = &nodes[child as usize];
			if child_node.is_leaf {
				let part = &mut parts[child_node.part_index as usize];
				let group = &groups[part.group_index as usize];
				h_node.bounds[child_index] = part.bounds;
				h_node.lod_bounds[child_index] = group.lod_bounds;
				h_node.min_lod_errors[child_index] = group.min_lod_error;
				h_node.max_parent_lod_errors[child_index] = group.max_parent_lod_error;
				h_node.children_start_index[child_index] = u32::MAX;
				h_node.num_children[child_index] = part.clusters.len() as u32;
				h_node.part_index[child_index] = child_node.part_index;
				assert!(part.clusters.len() as u32 <= MAX_CLUSTERS_PER_GROUP);
				part.hierarchy_node_index = h_index as u32;
				part.hierarchy_child_index = child_index as u32;
			} else {
				let child_h_index = hierarchy_index[child as usize];
				let child_h_node = &hierarchy_nodes[child_h_index as usize];
				let num_grand_children = child_h_node.num_children.iter().take_while(|&&num| num != 0).count();

				let mut bounds = Bounds::default();
				let mut min_lod_error = f32::MAX;
				let mut max_parent_lod_error = 0f32;
				for grand_child in 0..num_grand_children {
					bounds += child_h_node.bounds[grand_child];
					min_lod_error = min_lod_error.min(child_h_node.min_lod_errors[grand_child]);
					max_parent_lod_error = max_parent_lod_error.max(child_h_node.max_parent_lod_errors[grand_child]);
				}

				h_node.bounds[child_index] = bounds;
				h_node.lod_bounds[child_index] = Sphere::from_spheres(&child_h_node.lod_bounds[..num_grand_children]);
				h_node.min_lod_errors[child_index] = min_lod_error;
				h_node.max_parent_lod_errors[child_index] = max_parent_lod_error;
				h_node.children_start_index[child_index] = child_h_index;
				h_node.num_children[child_index] = MAX_CLUSTERS_PER_GROUP;
				h_node.part_index[child_index] = INVALID_PART_INDEX;
			}
		}
		hierarchy_nodes[h_index] = h_node;
	}
	hierarchy_nodes
}

fn pack_hierarchy_node(node: &HierarchyNode, groups: &[ClusterGroup], parts: &[ClusterGroupPart]) -> PackedHierarchyNode {
	const _: () = assert!(MAX_RESOURCE_PAGES_BITS + MAX_CLUSTERS_PER_GROUP_BITS + MAX_GROUP_PARTS_BITS <= 32);
	let mut packed = PackedHierarchyNode::default();
	for i in 0..MAX_BVH_NODE_FANOUT {
		packed.set_child_bounds(i, &node.bounds[i], &node.lod_bounds[i]);
		packed.misc0[i].min_lod_error_max_parent_lod_error =
			pack_f16x2(node.min_lod_errors[i], node.max_parent_lod_errors[i]);
		packed.misc1[i].child_start_reference = node.children_start_index[i];

		let num_children = node.num_children[i];
		assert!(num_children <= MAX_CLUSTERS_PER_GROUP);
		packed.misc2[i] = if num_children == 0 {
			0
		} else if node.part_index[i] != INVALID_PART_INDEX {
			// a group spanning several pages needs all of them, except the root pages
			let group = &groups[parts[node.part_index[i] as usize].group_index as usize];
			let (page_start, page_num) = remove_root_pages_from_range(group.page_index_start, group.page_index_num);
			(page_start << (MAX_CLUSTERS_PER_GROUP_BITS + MAX_GROUP_PARTS_BITS))
				| (page_num << MAX_CLUSTERS_PER_GROUP_BITS)
				| num_children
		} else {
			u32::MAX
		};
	}
	packed
}

/// Builds one hierarchy per mesh and returns all packed nodes together with the index of every mesh's root node.
/// Inner nodes reference their children relative to the root of their mesh.
///
/// Every mip level gets its own tree sorted by surface area, then a top tree joins the roots of all levels.
#[profiling::function]
pub fn build_hierarchies(
	groups: &[ClusterGroup],
	parts: &mut [ClusterGroupPart],
	num_meshes: u32,
) -> (Vec<PackedHierarchyNode>, Vec<u32>) {
	let mut parts_by_mesh = vec![Vec::new(); num_meshes as usize];
	for (part_index, part) in parts.iter().enumerate() {
		parts_by_mesh[groups[part.group_index as usize].mesh_index as usize].push(part_index as u32);
	}

	let mut packed_nodes = Vec::new();
	let mut root_offsets = Vec::with_capacity(num_meshes as usize);
	for part_indices in parts_by_mesh {
		assert!(!part_indices.is_empty(), "mesh without any group parts");
		let max_mip_level = part_indices
			.iter()
			.map(|&part| groups[parts[part as usize].group_index as usize].mip_level)
			.max()
			.unwrap_or(0);

		let mut nodes = Vec::with_capacity(part_indices.len() * 2);
		let mut nodes_by_mip = vec![Vec::new(); max_mip_level as usize + 1];
		for &part_index in &part_indices {
			let part = &parts[part_index as usize];
			nodes_by_mip[groups[part.group_index as usize].mip_level as usize].push(nodes.len() as u32);
			nodes.push(IntermediateNode {
				part_index,
				is_leaf: true,
				bounds: part.bounds,
				children: SmallVec::new(),
			});
		}

		let root = if nodes.len() == 1 {
			// the root always has to be an inner node
			let bounds = nodes[0].bounds;
			nodes.push(IntermediateNode {
				bounds,
				children: SmallVec::from_slice(&[0]),
				..IntermediateNode::default()
			});
			1
		} else {
			let mut level_roots = Vec::new();
			for mut mip_nodes in nodes_by_mip.into_iter().filter(|mip_nodes| !mip_nodes.is_empty()) {
				let level_root = build_hierarchy_top_down(&mut nodes, &mut mip_nodes, true);
				let level_root_node = &nodes[level_root as usize];
				if level_root_node.is_leaf || level_root_node.children.len() == MAX_BVH_NODE_FANOUT {
					level_roots.push(level_root);
				} else {
					// an incomplete node is dropped, its children join the top tree directly
					level_roots.extend_from_slice(&level_root_node.children);
				}
			}
			build_hierarchy_top_down(&mut nodes, &mut level_roots, false)
		};

		let hierarchy_nodes = build_hierarchy_nodes(&nodes, root, groups, parts);
		root_offsets.push(packed_nodes.len() as u32);
		packed_nodes.extend(hierarchy_nodes.iter().map(|node| pack_hierarchy_node(node, groups, parts)));
	}
	log::debug!("built {} hierarchy nodes for {} meshes", packed_nodes.len(), num_meshes);
	(packed_nodes, root_offsets)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn leaves(n: u32) -> Vec<IntermediateNode> {
		(0..n)
			.map(|i| IntermediateNode {
				part_index: i,
				is_leaf: true,
				bounds: Bounds::new(Vec3::new(i as f32, 0., 0.), Vec3::new(i as f32 + 1., 1., 1.)),
				children: SmallVec::new(),
			})
			.collect()
	}

	/// One group and one part per entry of `mip_levels`, all on page `page`.
	fn groups_and_parts(mip_levels: &[i32], mesh_index: u32, page: u32) -> (Vec<ClusterGroup>, Vec<ClusterGroupPart>) {
		let mut groups = Vec::new();
		let mut parts = Vec::new();
		for (i, &mip_level) in mip_levels.iter().enumerate() {
			let center = Vec3::new(i as f32 * 2., mip_level as f32, 0.);
			groups.push(ClusterGroup {
				lod_bounds: Sphere::new(center, 1.),
				min_lod_error: mip_level as f32,
				max_parent_lod_error: mip_level as f32 + 1.,
				mip_level,
				mesh_index,
				page_index_start: page,
				page_index_num: 1,
				..ClusterGroup::default()
			});
			parts.push(ClusterGroupPart {
				clusters: vec![0; 3],
				bounds: Bounds::new(center - 0.5, center + 0.5),
				page_index: page,
				group_index: i as u32,
				hierarchy_node_index: INVALID_NODE_INDEX,
				hierarchy_child_index: 0,
				page_cluster_offset: 0,
			});
		}
		(groups, parts)
	}

	#[test]
	fn complete_tree_sizes() {
		assert_eq!(child_sizes(20), [1, 1, 1, 1, 1, 1, 6, 8]);
		assert_eq!(child_sizes(64), [8; 8]);
		assert_eq!(child_sizes(9), [1, 1, 1, 1, 1, 1, 1, 2]);
	}

	#[test]
	fn top_down_keeps_every_leaf_once() {
		let mut nodes = leaves(20);
		let mut indices: Vec<u32> = (0..20).collect();
		let root = build_hierarchy_top_down(&mut nodes, &mut indices, true);
		assert_eq!(nodes[root as usize].children.len(), MAX_BVH_NODE_FANOUT);

		let mut seen = Vec::new();
		let mut stack = vec![root];
		while let Some(node) = stack.pop() {
			for &child in &nodes[node as usize].children {
				if nodes[child as usize].is_leaf {
					seen.push(child);
				} else {
					stack.push(child);
				}
			}
		}
		seen.sort();
		assert_eq!(seen, (0..20).collect::<Vec<u32>>());
	}

	#[test]
	fn sorting_groups_neighbours() {
		// leaves along x in shuffled order end up in contiguous children
		let mut nodes = leaves(16);
		let mut indices = vec![9, 3, 14, 0, 7, 12, 5, 1, 10, 15, 2, 8, 13, 4, 11, 6];
		let root = build_hierarchy_top_down(&mut nodes, &mut indices, true);
		let children = nodes[root as usize].children.clone();
		assert_eq!(&children[..6], &[0, 1, 2, 3, 4, 5]);
		assert_eq!(nodes[children[6] as usize].children.as_slice(), &[6, 7]);
		assert_eq!(nodes[children[7] as usize].children.as_slice(), &[8, 9, 10, 11, 12, 13, 14, 15]);
	}

	#[test]
	fn single_part_gets_inner_root() {
		let (groups, mut parts) = groups_and_parts(&[0], 0, 0);
		let (nodes, root_offsets) = build_hierarchies(&groups, &mut parts, 1);
		assert_eq!(nodes.len(), 1);
		assert_eq!(root_offsets, [0]);
		assert_eq!((parts[0].hierarchy_node_index, parts[0].hierarchy_child_index), (0, 0));

		let root = &nodes[0];
		assert_eq!(root.misc1[0].child_start_reference, u32::MAX);
		// page 0 is a root page, so nothing is left to request
		assert_eq!(root.page_index_num(0), 0);
		assert_eq!(root.group_part_size(0), 3);
		assert_eq!(root.misc2[1], 0);
	}

	#[test]
	fn levels_join_under_top_tree() {
		let mut mip_levels = vec![0; 20];
		mip_levels.extend_from_slice(&[1, 1, 1, 2]);
		let (groups, mut parts) = groups_and_parts(&mip_levels, 0, 3);
		let (nodes, root_offsets) = build_hierarchies(&groups, &mut parts, 1);
		assert_eq!(root_offsets, [0]);
		// top root, the full mip 0 root and its two inner children
		assert_eq!(nodes.len(), 4);

		let root = &nodes[0];
		let num_root_children = root.misc2.iter().take_while(|&&misc2| misc2 != 0).count();
		assert_eq!(num_root_children, 5);

		for part in &parts {
			let node = &nodes[part.hierarchy_node_index as usize];
			let child = part.hierarchy_child_index as usize;
			assert_eq!(node.misc1[child].child_start_reference, u32::MAX);
			assert_eq!(node.page_index_start(child), 3);
			assert_eq!(node.page_index_num(child), 1);
			assert_eq!(node.group_part_size(child), 3);
		}

		for node in &nodes {
			for child in 0..MAX_BVH_NODE_FANOUT {
				if node.misc2[child] == u32::MAX {
					let reference = node.misc1[child].child_start_reference;
					assert!(reference > 0 && (reference as usize) < nodes.len());
				}
			}
		}
	}

	#[test]
	fn inner_children_aggregate_errors() {
		let mut mip_levels = vec![0; 9];
		mip_levels.push(3);
		let (groups, mut parts) = groups_and_parts(&mip_levels, 0, 1);
		let (nodes, _) = build_hierarchies(&groups, &mut parts, 1);

		// the full mip 0 tree becomes a single inner child of the root
		let root = &nodes[0];
		for child in 0..MAX_BVH_NODE_FANOUT {
			if root.misc2[child] == u32::MAX {
				let errors = root.misc0[child].min_lod_error_max_parent_lod_error;
				// min 0.0 and max parent 1.0 as f16
				assert_eq!(errors, 0x3c00 << 16);
			}
		}
	}

	#[test]
	fn meshes_get_separate_roots() {
		let (mut groups, mut parts) = groups_and_parts(&[0, 0, 1], 0, 2);
		groups[2].mesh_index = 1;
		let (nodes, root_offsets) = build_hierarchies(&groups, &mut parts, 2);
		assert_eq!(root_offsets, [0, 1]);
		assert_eq!(nodes.len(), 2);
		assert_eq!(parts[2].hierarchy_node_index, 0);
		assert_eq!(parts[0].hierarchy_node_index, 0);
	}
}
