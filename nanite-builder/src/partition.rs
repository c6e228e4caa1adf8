use crate::containers::DisjointSet;
use crate::error::{BuildError, Result};
use crate::math::morton_code_normalized;
use glam::Vec3;
use metis::Idx;
use nanite_disk::shape::bounds::Bounds;
use rayon::prelude::*;
use smallvec::SmallVec;
use std::ops::Range;

/// Elements are only linked by locality if their connected run is shorter than this.
const MAX_LOCALITY_RUN_LENGTH: u32 = 128;
const LOCALITY_SEARCH_ITERATIONS: u32 = 16;
const NUM_LOCALITY_NEIGHBOURS: usize = 3;
/// below this many elements, building the sort keys in parallel is not worth it
const PARALLEL_SORT_KEY_THRESHOLD: usize = 5000;
/// bisections of graphs smaller than this are not worth a rayon task
const PARALLEL_BISECT_THRESHOLD: u32 = 256;

/// Adjacency graph in CSR form. Elements are addressed by their position in [`GraphPartitioner::indexes`], not by
/// their original index.
#[derive(Clone, Debug, Default)]
pub struct GraphData {
	num: u32,
	adjacency: Vec<Idx>,
	adjacency_cost: Vec<Idx>,
	adjacency_offset: Vec<Idx>,
}

impl GraphData {
	pub fn num(&self) -> u32 {
		self.num
	}

	/// Starts the adjacency list of the next element, call once per element in order of
	/// [`GraphPartitioner::indexes`].
	pub fn start_element(&mut self) {
		self.adjacency_offset.push(self.adjacency.len() as Idx);
	}

	fn edges(&self, element: usize) -> Range<usize> {
		self.adjacency_offset[element] as usize..self.adjacency_offset[element + 1] as usize
	}

	/// Closes the last adjacency list, then drops self loops and merges parallel edges by summing their cost. METIS
	/// rejects both.
	fn finish(&mut self) {
		assert_eq!(
			self.adjacency_offset.len(),
			self.num as usize,
			"graph has adjacency for {} elements, expected {}",
			self.adjacency_offset.len(),
			self.num
		);
		self.adjacency_offset.push(self.adjacency.len() as Idx);

		let mut adjacency = Vec::with_capacity(self.adjacency.len());
		let mut adjacency_cost = Vec::with_capacity(self.adjacency.len());
		let mut adjacency_offset = Vec::with_capacity(self.adjacency_offset.len());
		let mut edges: Vec<(Idx, Idx)> = Vec::new();
		for element in 0..self.num as usize {
			let start = adjacency.len();
			adjacency_offset.push(start as Idx);
			edges.clear();
			edges.extend(
				self.edges(element)
					.map(|e| (self.adjacency[e], self.adjacency_cost[e]))
					.filter(|&(adj, _)| adj != element as Idx),
			);
			edges.sort_unstable_by_key(|&(adj, _)| adj);
			for &(adj, cost) in &edges {
				if adjacency.len() > start && adjacency[adjacency.len() - 1] == adj {
					let last = adjacency_cost.len() - 1;
					adjacency_cost[last] += cost;
				} else {
					adjacency.push(adj);
					adjacency_cost.push(cost);
				}
			}
		}
		adjacency_offset.push(adjacency.len() as Idx);

		self.adjacency = adjacency;
		self.adjacency_cost = adjacency_cost;
		self.adjacency_offset = adjacency_offset;
	}
}

/// Splits elements into ranges of [`Self::indexes`], honoring adjacency and spatial locality. Elements ending up in
/// the same range are meant to become one cluster or one group.
#[derive(Clone, Debug)]
pub struct GraphPartitioner {
	num_elements: u32,
	/// element indices, after partitioning every range covers one partition
	pub indexes: Vec<u32>,
	pub ranges: Vec<Range<u32>>,
	sorted_to: Vec<u32>,
	locality_links: Vec<SmallVec<[u32; 4]>>,
}

#[derive(Copy, Clone, Debug)]
struct PartitionSizes {
	min: u32,
	max: u32,
}

impl GraphPartitioner {
	pub fn new(num_elements: u32) -> Self {
		Self {
			num_elements,
			indexes: (0..num_elements).collect(),
			ranges: Vec::new(),
			sorted_to: (0..num_elements).collect(),
			locality_links: Vec::new(),
		}
	}

	pub fn num_elements(&self) -> u32 {
		self.num_elements
	}

	/// Sorts the elements along a morton curve and links each one to its nearest neighbours that are not part of the
	/// same connected island, so that close but disconnected geometry still prefers the same partition.
	#[profiling::function]
	pub fn build_locality_links(
		&mut self,
		disjoint_set: &mut DisjointSet,
		bounds: &Bounds,
		get_center: impl Fn(u32) -> Vec3 + Sync,
	) {
		let n = self.num_elements as usize;
		let sort_key = |index: u32| {
			let local = (get_center(index) - bounds.min) / bounds.size();
			morton_code_normalized(local)
		};
		let sort_keys: Vec<u32> = if n < PARALLEL_SORT_KEY_THRESHOLD {
			(0..self.num_elements).map(sort_key).collect()
		} else {
			(0..self.num_elements).into_par_iter().map(sort_key).collect()
		};

		{
			profiling::scope!("sort");
			self.indexes.sort_by_key(|&index| sort_keys[index as usize]);
			for (i, &index) in self.indexes.iter().enumerate() {
				self.sorted_to[index as usize] = i as u32;
			}
		}

		// runs of sorted elements on the same island, to jump straight to the next disjoint element
		let islands: Vec<u32> = self.indexes.iter().map(|&index| disjoint_set.find(index)).collect();
		let mut island_runs = vec![0..0; n];
		{
			let mut run_start = 0;
			for i in 1..=n {
				if i == n || islands[i] != islands[run_start] {
					for run in &mut island_runs[run_start..i] {
						*run = run_start..i - 1;
					}
					run_start = i;
				}
			}
		}

		self.locality_links = vec![SmallVec::new(); n];
		for i in 0..n {
			let run = &island_runs[i];
			if (run.end - run.start + 1) as u32 >= MAX_LOCALITY_RUN_LENGTH {
				continue;
			}

			let index = self.indexes[i];
			let island = islands[i];
			let center = get_center(index);
			let mut closest_index = [u32::MAX; NUM_LOCALITY_NEIGHBOURS];
			let mut closest_dist_sq = [f32::MAX; NUM_LOCALITY_NEIGHBOURS];

			for forward in [false, true] {
				let mut adj = i;
				for _ in 0..LOCALITY_SEARCH_ITERATIONS {
					if (forward && adj == n - 1) || (!forward && adj == 0) {
						break;
					}
					adj = if forward { adj + 1 } else { adj - 1 };

					if islands[adj] == island {
						adj = if forward { island_runs[adj].end } else { island_runs[adj].start };
					} else {
						let mut adj_index = self.indexes[adj];
						let mut adj_dist_sq = center.distance_squared(get_center(adj_index));
						for k in 0..NUM_LOCALITY_NEIGHBOURS {
							if adj_dist_sq < closest_dist_sq[k] {
								std::mem::swap(&mut adj_index, &mut closest_index[k]);
								std::mem::swap(&mut adj_dist_sq, &mut closest_dist_sq[k]);
							}
						}
					}
				}
			}

			for closest in closest_index.into_iter().filter(|&c| c != u32::MAX) {
				add_unique(&mut self.locality_links[index as usize], closest);
				add_unique(&mut self.locality_links[closest as usize], index);
			}
		}
	}

	pub fn locality_links(&self, index: u32) -> &[u32] {
		self.locality_links
			.get(index as usize)
			.map(|links| links.as_slice())
			.unwrap_or(&[])
	}

	pub fn new_graph(&self, num_adjacency: usize) -> GraphData {
		let num_adjacency = num_adjacency + self.locality_links.iter().map(|l| l.len()).sum::<usize>();
		GraphData {
			num: self.num_elements,
			adjacency: Vec::with_capacity(num_adjacency),
			adjacency_cost: Vec::with_capacity(num_adjacency),
			adjacency_offset: Vec::with_capacity(self.num_elements as usize + 1),
		}
	}

	#[inline]
	pub fn add_adjacency(&self, graph: &mut GraphData, adj_index: u32, cost: i32) {
		graph.adjacency.push(self.sorted_to[adj_index as usize] as Idx);
		graph.adjacency_cost.push(cost);
	}

	pub fn add_locality_links(&self, graph: &mut GraphData, index: u32, cost: i32) {
		for &adj_index in self.locality_links(index) {
			self.add_adjacency(graph, adj_index, cost);
		}
	}

	/// Single k-way partition into roughly even parts of `(min + max) / 2` elements. Part sizes are not enforced.
	#[profiling::function]
	pub fn partition(&mut self, mut graph: GraphData, min_partition_size: u32, max_partition_size: u32) -> Result<()> {
		graph.finish();
		let target_partition_size = (min_partition_size + max_partition_size) / 2;
		let target_num_partitions = graph.num.div_ceil(target_partition_size);
		if target_num_partitions <= 1 {
			self.ranges.push(0..self.num_elements);
			return Ok(());
		}

		let mut partition_ids = vec![0 as Idx; self.num_elements as usize];
		metis::Graph::new(1, target_num_partitions as Idx, &graph.adjacency_offset, &graph.adjacency)
			.map_err(|err| BuildError::Metis(err.to_string()))?
			.set_adjwgt(&graph.adjacency_cost)
			.set_option(metis::option::UFactor(200))
			.part_kway(&mut partition_ids)?;

		let mut element_count = vec![0u32; target_num_partitions as usize];
		for &id in &partition_ids {
			element_count[id as usize] += 1;
		}

		let mut begin = 0;
		let first_range = self.ranges.len();
		for count in &mut element_count {
			self.ranges.push(begin..begin + *count);
			begin += *count;
			*count = 0;
		}

		let old_indexes = std::mem::take(&mut self.indexes);
		self.indexes = vec![0; self.num_elements as usize];
		for (i, &id) in partition_ids.iter().enumerate() {
			let range = &self.ranges[first_range + id as usize];
			let count = &mut element_count[id as usize];
			self.indexes[(range.start + *count) as usize] = old_indexes[i];
			*count += 1;
		}
		self.ranges.retain(|range| !range.is_empty());
		Ok(())
	}

	/// Recursively bisects the graph until every part holds at most `max_partition_size` elements. Bisection targets
	/// part counts of `(min + max) / 2`, parts below `min_partition_size` are possible when the graph does not divide
	/// evenly. Resulting ranges are sorted, so the output does not depend on `threaded`.
	#[profiling::function]
	pub fn partition_strict(
		&mut self,
		mut graph: GraphData,
		min_partition_size: u32,
		max_partition_size: u32,
		threaded: bool,
	) -> Result<()> {
		assert!(min_partition_size > 0 && min_partition_size <= max_partition_size);
		graph.finish();
		let sizes = PartitionSizes {
			min: min_partition_size,
			max: max_partition_size,
		};

		let mut indexes = std::mem::take(&mut self.indexes);
		let ranges = sizes.recursive_bisect(graph, 0, &mut indexes, threaded);
		self.indexes = indexes;
		self.ranges.extend(ranges?);
		Ok(())
	}
}

fn add_unique(links: &mut SmallVec<[u32; 4]>, value: u32) {
	if !links.contains(&value) {
		links.push(value);
	}
}

impl PartitionSizes {
	fn recursive_bisect(self, graph: GraphData, offset: u32, indexes: &mut [u32], threaded: bool) -> Result<Vec<Range<u32>>> {
		let num = graph.num;
		if num <= self.max {
			return Ok(vec![offset..offset + num]);
		}

		let (split, children) = self.bisect(&graph, indexes)?;
		drop(graph);

		let (front, back) = indexes.split_at_mut(split as usize);
		match children {
			None => Ok(vec![offset..offset + split, offset + split..offset + num]),
			Some([front_graph, back_graph]) => {
				let (front_ranges, back_ranges) = if threaded && front_graph.num > PARALLEL_BISECT_THRESHOLD {
					rayon::join(
						|| self.recursive_bisect(front_graph, offset, front, threaded),
						|| self.recursive_bisect(back_graph, offset + split, back, threaded),
					)
				} else {
					(
						self.recursive_bisect(front_graph, offset, front, threaded),
						self.recursive_bisect(back_graph, offset + split, back, threaded),
					)
				};
				let mut front_ranges = front_ranges?;
				front_ranges.extend(back_ranges?);
				Ok(front_ranges)
			}
		}
	}

	/// Splits `indexes` in place into a front and back part. Returns the split position and, if either part is still
	/// too large, the graphs of both parts.
	fn bisect(self, graph: &GraphData, indexes: &mut [u32]) -> Result<(u32, Option<[GraphData; 2]>)> {
		let num = graph.num;
		let target_partition_size = (self.min + self.max) / 2;
		let target_num_partitions = ((num + target_partition_size / 2) / target_partition_size).max(2);
		let front_weight = (target_num_partitions / 2) as f32 / target_num_partitions as f32;
		let partition_weights = [front_weight, 1. - front_weight];

		// strict balance only matters once parts get close to the target size
		let loose = target_num_partitions >= 128 || self.max / self.min > 1;

		let mut partition_ids = vec![0 as Idx; num as usize];
		metis::Graph::new(1, 2, &graph.adjacency_offset, &graph.adjacency)
			.map_err(|err| BuildError::Metis(err.to_string()))?
			.set_adjwgt(&graph.adjacency_cost)
			.set_tpwgts(&partition_weights)
			.set_option(metis::option::UFactor(if loose { 200 } else { 1 }))
			.set_option(metis::option::Seed(17))
			.part_recursive(&mut partition_ids)?;

		let num_front = partition_ids.iter().filter(|&&id| id == 0).count() as u32;
		if num_front == 0 || num_front == num {
			log::warn!("Bisection of {num} elements left one side empty, splitting in curve order instead");
			let half = num / 2;
			for (i, id) in partition_ids.iter_mut().enumerate() {
				*id = (i as u32 >= half) as Idx;
			}
		}

		// Divide in place, both sides keep their order except for swapped pairs.
		let mut swapped_with: Vec<u32> = (0..num).collect();
		let (mut front, mut back) = (0i64, num as i64 - 1);
		while front <= back {
			while front <= back && partition_ids[front as usize] == 0 {
				front += 1;
			}
			while front <= back && partition_ids[back as usize] == 1 {
				back -= 1;
			}
			if front < back {
				indexes.swap(front as usize, back as usize);
				swapped_with[front as usize] = back as u32;
				swapped_with[back as usize] = front as u32;
				front += 1;
				back -= 1;
			}
		}

		let split = front as u32;
		let nums = [split, num - split];
		if nums[0] <= self.max && nums[1] <= self.max {
			return Ok((split, None));
		}

		let offsets = [0, split];
		let children = [0, 1].map(|child| {
			let mut child_graph = GraphData {
				num: nums[child],
				adjacency: Vec::with_capacity(graph.adjacency.len() / 2),
				adjacency_cost: Vec::with_capacity(graph.adjacency.len() / 2),
				adjacency_offset: Vec::with_capacity(nums[child] as usize + 1),
			};
			for i in offsets[child]..offsets[child] + nums[child] {
				child_graph.start_element();
				let original = swapped_with[i as usize] as usize;
				for e in graph.edges(original) {
					let adj = swapped_with[graph.adjacency[e] as usize] as i64 - offsets[child] as i64;
					if (0..nums[child] as i64).contains(&adj) {
						child_graph.adjacency.push(adj as Idx);
						child_graph.adjacency_cost.push(graph.adjacency_cost[e]);
					}
				}
			}
			child_graph.adjacency_offset.push(child_graph.adjacency.len() as Idx);
			child_graph
		});
		Ok((split, Some(children)))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	/// `n * n` elements on a grid in the xy plane, connected to their 4 neighbours
	fn grid_partitioner(n: u32) -> (GraphPartitioner, GraphData) {
		let center = |index: u32| Vec3::new((index % n) as f32, (index / n) as f32, 0.);
		let bounds = Bounds::from_points((0..n * n).map(center));

		let mut partitioner = GraphPartitioner::new(n * n);
		let mut disjoint_set = DisjointSet::new(n * n);
		for index in 1..n * n {
			disjoint_set.union(index - 1, index);
		}
		partitioner.build_locality_links(&mut disjoint_set, &bounds, center);

		let mut graph = partitioner.new_graph((n * n * 4) as usize);
		for i in 0..n * n {
			let index = partitioner.indexes[i as usize];
			let (x, y) = (index % n, index / n);
			graph.start_element();
			if x > 0 {
				partitioner.add_adjacency(&mut graph, index - 1, 1);
			}
			if x + 1 < n {
				partitioner.add_adjacency(&mut graph, index + 1, 1);
			}
			if y > 0 {
				partitioner.add_adjacency(&mut graph, index - n, 1);
			}
			if y + 1 < n {
				partitioner.add_adjacency(&mut graph, index + n, 1);
			}
			partitioner.add_locality_links(&mut graph, index, 1);
		}
		(partitioner, graph)
	}

	fn assert_covers_all(partitioner: &GraphPartitioner) {
		let mut sorted = partitioner.indexes.clone();
		sorted.sort_unstable();
		assert_eq!(sorted, (0..partitioner.num_elements()).collect::<Vec<_>>());

		let mut next = 0;
		for range in &partitioner.ranges {
			assert_eq!(range.start, next);
			assert!(!range.is_empty());
			next = range.end;
		}
		assert_eq!(next, partitioner.num_elements());
	}

	#[test]
	fn small_graph_is_single_partition() -> anyhow::Result<()> {
		let (mut partitioner, graph) = grid_partitioner(8);
		partitioner.partition_strict(graph, 124, 128, false)?;
		assert_eq!(partitioner.ranges, [0..64]);
		assert_covers_all(&partitioner);
		Ok(())
	}

	#[test]
	fn strict_partition_respects_max() -> anyhow::Result<()> {
		let (mut partitioner, graph) = grid_partitioner(40);
		partitioner.partition_strict(graph, 124, 128, true)?;
		assert_covers_all(&partitioner);
		assert!(partitioner.ranges.len() >= 1600 / 128);
		for range in &partitioner.ranges {
			assert!(range.len() <= 128, "partition {range:?} too large");
		}
		Ok(())
	}

	#[test]
	fn strict_partition_is_deterministic() -> anyhow::Result<()> {
		let (mut a, graph) = grid_partitioner(32);
		a.partition_strict(graph, 8, 32, true)?;
		let (mut b, graph) = grid_partitioner(32);
		b.partition_strict(graph, 8, 32, false)?;
		assert_eq!(a.ranges, b.ranges);
		assert_eq!(a.indexes, b.indexes);
		Ok(())
	}

	#[test]
	fn kway_partition_covers_all() -> anyhow::Result<()> {
		let (mut partitioner, graph) = grid_partitioner(24);
		partitioner.partition(graph, 60, 68)?;
		assert_covers_all(&partitioner);
		assert!(partitioner.ranges.len() > 1);
		Ok(())
	}

	#[test]
	fn locality_links_cross_islands() {
		// two rows of disconnected elements, interleaved along x
		let center = |index: u32| Vec3::new((index / 2) as f32, (index % 2) as f32 * 0.1, 0.);
		let n = 32;
		let bounds = Bounds::from_points((0..n).map(center));
		let mut disjoint_set = DisjointSet::new(n);
		for index in 2..n {
			disjoint_set.union(index - 2, index);
		}

		let mut partitioner = GraphPartitioner::new(n);
		partitioner.build_locality_links(&mut disjoint_set, &bounds, center);

		let mut num_links = 0;
		for index in 0..n {
			for &link in partitioner.locality_links(index) {
				assert_ne!(index % 2, link % 2, "{index} linked within its own island");
				assert!(partitioner.locality_links(link).contains(&index));
				num_links += 1;
			}
		}
		assert!(num_links > 0);
	}

	#[test]
	fn graph_finish_merges_parallel_edges() {
		let mut graph = GraphData {
			num: 2,
			..GraphData::default()
		};
		graph.start_element();
		graph.adjacency.extend([1, 0, 1]);
		graph.adjacency_cost.extend([3, 9, 4]);
		graph.start_element();
		graph.adjacency.push(0);
		graph.adjacency_cost.push(7);
		graph.finish();
		assert_eq!(graph.adjacency, [1, 0]);
		assert_eq!(graph.adjacency_cost, [7, 7]);
		assert_eq!(graph.adjacency_offset, [0, 1, 2]);
	}
}
