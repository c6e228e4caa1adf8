use crate::cluster::{Cluster, ClusterGroup};
use crate::encode::info::{EncodingInfo, PageSections};
use crate::math::morton_code3;
use glam::Vec3;
use nanite_disk::constants::*;
use nanite_disk::shape::Bounds;

/// The clusters of a group that ended up on the same page.
#[derive(Clone, Debug)]
pub struct ClusterGroupPart {
	pub clusters: Vec<u32>,
	pub bounds: Bounds,
	pub page_index: u32,
	pub group_index: u32,
	pub hierarchy_node_index: u32,
	pub hierarchy_child_index: u32,
	/// index of the first cluster within its page
	pub page_cluster_offset: u32,
}

impl ClusterGroupPart {
	fn new(group_index: u32) -> Self {
		Self {
			clusters: Vec::new(),
			bounds: Bounds::default(),
			page_index: 0,
			group_index,
			hierarchy_node_index: INVALID_NODE_INDEX,
			hierarchy_child_index: 0,
			page_cluster_offset: 0,
		}
	}
}

#[derive(Clone, Debug, Default)]
pub struct Page {
	pub parts_start: u32,
	pub parts_num: u32,
	pub num_clusters: u32,
	pub gpu_sizes: PageSections,
}

impl Page {
	pub fn parts(&self) -> std::ops::Range<usize> {
		self.parts_start as usize..(self.parts_start + self.parts_num) as usize
	}
}

pub fn is_root_page(page_index: u32) -> bool {
	page_index < NUM_ROOT_PAGES
}

/// Drops the root pages from the front of a page range, they are always resident. An emptied range starts at 0.
pub fn remove_root_pages_from_range(start: u32, num: u32) -> (u32, u32) {
	let num_root = NUM_ROOT_PAGES.saturating_sub(start).min(num);
	let (start, num) = (start + num_root, num - num_root);
	if num == 0 { (0, 0) } else { (start, num) }
}

/// Sweeps the children of every group along the diagonal, so neighbouring clusters tend to share a page.
fn sort_group_clusters(groups: &mut [ClusterGroup], clusters: &[Cluster]) {
	let sort_direction = Vec3::ONE;
	for group in groups {
		group.children.sort_by(|&a, &b| {
			let dot_a = clusters[a as usize].sphere_bounds.center().dot(sort_direction);
			let dot_b = clusters[b as usize].sphere_bounds.center().dot(sort_direction);
			dot_a.total_cmp(&dot_b)
		});
	}
}

/// Coarse groups first, so the root page holds the top of the DAG. Within a mip level groups follow a Morton curve
/// through their LOD bound centers.
fn group_permutation(groups: &[ClusterGroup]) -> Vec<u32> {
	let (min_center, max_center) = groups.iter().fold((Vec3::MAX, Vec3::MIN), |(min, max), group| {
		let center = group.lod_bounds.center();
		(min.min(center), max.max(center))
	});

	let mut entries: Vec<(i32, u32, u32)> = groups
		.iter()
		.enumerate()
		.map(|(i, group)| {
			let scaled = (group.lod_bounds.center() - min_center) / (max_center - min_center) * 1023. + 0.5;
			// NaN from a degenerate axis saturates to 0
			let [x, y, z] = scaled.to_array().map(|c| (c as i32).clamp(0, 1023) as u32);
			let morton = (morton_code3(z) << 2) | (morton_code3(y) << 1) | morton_code3(x);
			(group.mip_level, morton, i as u32)
		})
		.collect();
	entries.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
	entries.into_iter().map(|(_, _, index)| index).collect()
}

/// Greedily fills pages with the clusters of all groups, starting a new page once the next cluster would break the
/// GPU size or cluster count budget. Sets the page range of every group and the part of every cluster.
#[profiling::function]
pub fn assign_clusters_to_pages(
	groups: &mut [ClusterGroup],
	clusters: &mut [Cluster],
	encoding_infos: &[EncodingInfo],
) -> (Vec<Page>, Vec<ClusterGroupPart>) {
	let mut pages = vec![Page::default()];
	let mut parts: Vec<ClusterGroupPart> = Vec::new();

	sort_group_clusters(groups, clusters);
	for group_index in group_permutation(groups) {
		let group = &mut groups[group_index as usize];
		let mut group_start_page = u32::MAX;

		for &cluster_index in &group.children {
			let gpu_sizes = encoding_infos[cluster_index as usize].gpu_sizes;

			let mut page_index = pages.len() as u32 - 1;
			let page = &pages[page_index as usize];
			if page.gpu_sizes.total() + gpu_sizes.total() > CLUSTER_PAGE_GPU_SIZE
				|| page.num_clusters + 1 > MAX_CLUSTERS_PER_PAGE
			{
				pages.push(Page::default());
				page_index += 1;
			}
			let page = &mut pages[page_index as usize];

			let continues_part = page.parts_num > 0 && parts[parts.len() - 1].group_index == group_index;
			if !continues_part {
				if page.parts_num == 0 {
					page.parts_start = parts.len() as u32;
				}
				page.parts_num += 1;
				parts.push(ClusterGroupPart::new(group_index));
			}

			let part_index = parts.len() as u32 - 1;
			let part = &mut parts[part_index as usize];
			if part.clusters.is_empty() {
				part.page_cluster_offset = page.num_clusters;
				part.page_index = page_index;
			}
			part.clusters.push(cluster_index);
			assert!(part.clusters.len() as u32 <= MAX_CLUSTERS_PER_GROUP);

			clusters[cluster_index as usize].group_part_index = part_index;
			group_start_page = group_start_page.min(page_index);

			page.gpu_sizes += gpu_sizes;
			page.num_clusters += 1;
		}

		assert_ne!(group_start_page, u32::MAX, "empty group");
		group.page_index_start = group_start_page;
		group.page_index_num = pages.len() as u32 - group_start_page;
		assert!(group.page_index_num >= 1);
		assert!(group.page_index_num <= MAX_GROUP_PARTS_MASK);
	}

	for part in &mut parts {
		part.bounds = part.clusters.iter().map(|&c| clusters[c as usize].bounds).sum();
	}
	log::debug!("assigned {} clusters to {} pages in {} group parts", clusters.len(), pages.len(), parts.len());
	(pages, parts)
}

#[cfg(test)]
mod tests {
	use super::*;
	use nanite_disk::shape::Sphere;

	fn cluster_at(center: Vec3) -> Cluster {
		Cluster {
			bounds: Bounds::new(center - 0.5, center + 0.5),
			sphere_bounds: Sphere::new(center, 1.),
			..Cluster::default()
		}
	}

	fn info_of_size(total: u32) -> EncodingInfo {
		EncodingInfo {
			gpu_sizes: PageSections {
				cluster: total,
				..PageSections::default()
			},
			..EncodingInfo::default()
		}
	}

	fn group(mip_level: i32, center: Vec3, children: Vec<u32>) -> ClusterGroup {
		ClusterGroup {
			lod_bounds: Sphere::new(center, 1.),
			mip_level,
			children,
			..ClusterGroup::default()
		}
	}

	#[test]
	fn root_pages_removed_from_range() {
		assert_eq!(remove_root_pages_from_range(0, 1), (0, 0));
		assert_eq!(remove_root_pages_from_range(0, 3), (1, 2));
		assert_eq!(remove_root_pages_from_range(4, 2), (4, 2));
		assert!(is_root_page(0));
		assert!(!is_root_page(1));
	}

	#[test]
	fn coarse_groups_come_first() {
		let groups = vec![
			group(0, Vec3::ZERO, vec![0]),
			group(1, Vec3::ONE, vec![1]),
			group(0, Vec3::ONE, vec![2]),
			group(2, Vec3::ZERO, vec![3]),
		];
		assert_eq!(group_permutation(&groups), [3, 1, 0, 2]);
	}

	#[test]
	fn children_swept_along_diagonal() {
		let clusters: Vec<Cluster> = [3., -1., 2.].into_iter().map(|x| cluster_at(Vec3::splat(x))).collect();
		let mut groups = vec![group(0, Vec3::ZERO, vec![0, 1, 2])];
		sort_group_clusters(&mut groups, &clusters);
		assert_eq!(groups[0].children, [1, 2, 0]);
	}

	#[test]
	fn pages_respect_gpu_budget() {
		// three clusters fit a page, the group of five spans three pages
		let size = CLUSTER_PAGE_GPU_SIZE / 3;
		let mut clusters: Vec<Cluster> = (0..7).map(|i| cluster_at(Vec3::splat(i as f32))).collect();
		let infos: Vec<EncodingInfo> = (0..7).map(|_| info_of_size(size)).collect();
		let mut groups = vec![group(1, Vec3::ZERO, vec![5, 6]), group(0, Vec3::ZERO, vec![0, 1, 2, 3, 4])];

		let (pages, parts) = assign_clusters_to_pages(&mut groups, &mut clusters, &infos);
		assert_eq!(pages.len(), 3);
		for page in &pages {
			assert!(page.gpu_sizes.total() <= CLUSTER_PAGE_GPU_SIZE);
			assert!(page.num_clusters <= MAX_CLUSTERS_PER_PAGE);
		}
		assert_eq!((groups[0].page_index_start, groups[0].page_index_num), (0, 1));
		assert_eq!((groups[1].page_index_start, groups[1].page_index_num), (0, 3));

		// page 0: [5, 6] [0], page 1: [1, 2, 3], page 2: [4]
		assert_eq!(parts.len(), 4);
		assert_eq!(pages[0].parts_num, 2);
		assert_eq!(parts[1].clusters, [0]);
		assert_eq!(parts[1].page_cluster_offset, 2);
		assert_eq!(parts[2].clusters, [1, 2, 3]);
		assert_eq!(parts[2].page_index, 1);
		assert_eq!(parts[3].page_cluster_offset, 0);
		assert_eq!(clusters[4].group_part_index, 3);
		assert_eq!(parts[2].bounds, Bounds::new(Vec3::splat(0.5), Vec3::splat(3.5)));
	}

	#[test]
	fn pages_respect_cluster_count() {
		let n = MAX_CLUSTERS_PER_PAGE + 1;
		let mut clusters: Vec<Cluster> = (0..n).map(|_| cluster_at(Vec3::ZERO)).collect();
		let infos: Vec<EncodingInfo> = (0..n).map(|_| info_of_size(16)).collect();
		let mut groups: Vec<ClusterGroup> = (0..n)
			.step_by(MAX_CLUSTERS_PER_GROUP_TARGET as usize)
			.map(|start| group(0, Vec3::ZERO, (start..(start + MAX_CLUSTERS_PER_GROUP_TARGET).min(n)).collect()))
			.collect();

		let (pages, _) = assign_clusters_to_pages(&mut groups, &mut clusters, &infos);
		assert_eq!(pages.len(), 2);
		assert_eq!(pages[0].num_clusters, MAX_CLUSTERS_PER_PAGE);
		assert_eq!(pages[1].num_clusters, 1);
	}
}
