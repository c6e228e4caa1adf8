use crate::cluster::Cluster;
use nanite_disk::constants::{MAX_CLUSTER_MATERIALS, MAX_CLUSTER_TRIANGLES};

/// A run of triangles sharing a material.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct MaterialRange {
	pub start: u32,
	pub length: u32,
	pub material: u32,
}

/// Sorts the triangles of `cluster` into material ranges, largest range first and ties by material index. The
/// first range having the most triangles is what lets the fast path encode its length minus one.
pub fn build_material_ranges(cluster: &mut Cluster) {
	assert!(cluster.num_tris <= MAX_CLUSTER_TRIANGLES);
	assert_eq!(cluster.num_tris as usize * 3, cluster.indexes.len());

	let mut counts = [0u32; MAX_CLUSTER_MATERIALS as usize];
	for &material in &cluster.material_indexes {
		counts[material as usize] += 1;
	}

	let mut tris: Vec<u32> = (0..cluster.num_tris).collect();
	tris.sort_by(|&a, &b| {
		let material_a = cluster.material_indexes[a as usize];
		let material_b = cluster.material_indexes[b as usize];
		counts[material_b as usize]
			.cmp(&counts[material_a as usize])
			.then(material_a.cmp(&material_b))
	});

	let indexes = tris
		.iter()
		.flat_map(|&tri| {
			let start = tri as usize * 3;
			cluster.indexes[start..start + 3].to_vec()
		})
		.collect();
	let material_indexes: Vec<i32> = tris.iter().map(|&tri| cluster.material_indexes[tri as usize]).collect();

	cluster.material_ranges.clear();
	for (tri, &material) in material_indexes.iter().enumerate() {
		match cluster.material_ranges.last_mut() {
			Some(range) if range.material == material as u32 => range.length += 1,
			_ => cluster.material_ranges.push(MaterialRange {
				start: tri as u32,
				length: 1,
				material: material as u32,
			}),
		}
	}
	cluster.indexes = indexes;
	cluster.material_indexes = material_indexes;
}

/// Size in dwords of the material table entries of `cluster`, zero if the ranges fit inline.
pub fn material_table_size(cluster: &Cluster) -> u32 {
	let num_ranges = cluster.material_ranges.len() as u32;
	if num_ranges > 3 { num_ranges } else { 0 }
}

fn pack_material_table_range(start: u32, length: u32, material: u32) -> u32 {
	assert!(start <= MAX_CLUSTER_TRIANGLES);
	assert!(length <= MAX_CLUSTER_TRIANGLES);
	assert!(material < MAX_CLUSTER_MATERIALS);
	start | length << 8 | material << 16
}

/// Material0Index:6, Material1Index:6, Material2Index:6, Material0Length - 1:7, Material1Length:7
fn pack_material_fast_path(ranges: &[MaterialRange], num_tris: u32) -> u32 {
	let mut lengths = [0; 2];
	let mut materials = [0; 3];
	let mut start = 0;
	for (i, range) in ranges.iter().enumerate() {
		assert_eq!(range.start, start);
		assert!(range.material < MAX_CLUSTER_MATERIALS);
		if i < 2 {
			lengths[i] = range.length;
		} else {
			assert_eq!(range.length, num_tris - start);
		}
		materials[i] = range.material;
		start += range.length;
	}
	assert!(lengths[0] >= 1 && lengths[0] <= MAX_CLUSTER_TRIANGLES);
	assert!(lengths[1] <= MAX_CLUSTER_TRIANGLES / 2 && lengths[1] <= lengths[0]);

	materials[0] | materials[1] << 6 | materials[2] << 12 | (lengths[0] - 1) << 18 | lengths[1] << 25
}

/// BufferIndex:19, BufferLength - 1:6, and all upper 7 bits set, which the fast path can never produce.
fn pack_material_slow_path(table_offset: u32, table_length: u32) -> u32 {
	assert!(table_offset < 1 << 19);
	assert!(table_length > 0 && table_length <= MAX_CLUSTER_MATERIALS);
	table_offset | (table_length - 1) << 19 | 0xFE00_0000
}

/// Packs the material ranges of `cluster` inline, or appends them to `material_table` when there are more than 3.
/// `table_start_offset` is the dword offset of `material_table` within the page.
pub fn pack_material_info(cluster: &Cluster, material_table: &mut Vec<u32>, table_start_offset: u32) -> u32 {
	let num_material_tris: u32 = cluster.material_ranges.iter().map(|range| range.length).sum();
	assert_eq!(num_material_tris, cluster.num_tris);

	if cluster.material_ranges.len() <= 3 {
		pack_material_fast_path(&cluster.material_ranges, cluster.num_tris)
	} else {
		let table_offset = table_start_offset + material_table.len() as u32;
		material_table.extend(
			cluster
				.material_ranges
				.iter()
				.map(|range| pack_material_table_range(range.start, range.length, range.material)),
		);
		pack_material_slow_path(table_offset, cluster.material_ranges.len() as u32)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn cluster_with_materials(materials: &[i32]) -> Cluster {
		let num_tris = materials.len() as u32;
		Cluster {
			num_tris,
			num_verts: num_tris * 3,
			indexes: (0..num_tris * 3).collect(),
			material_indexes: materials.to_vec(),
			..Cluster::default()
		}
	}

	#[test]
	fn ranges_sorted_by_size() {
		let mut cluster = cluster_with_materials(&[2, 0, 2, 1, 2, 0]);
		build_material_ranges(&mut cluster);
		assert_eq!(
			cluster.material_ranges,
			[
				MaterialRange {
					start: 0,
					length: 3,
					material: 2
				},
				MaterialRange {
					start: 3,
					length: 2,
					material: 0
				},
				MaterialRange {
					start: 5,
					length: 1,
					material: 1
				},
			]
		);
		assert_eq!(cluster.material_indexes, [2, 2, 2, 0, 0, 1]);
		// triangles keep their corners together
		assert_eq!(&cluster.indexes[..6], &[0, 1, 2, 6, 7, 8]);
		assert_eq!(&cluster.indexes[9..12], &[3, 4, 5]);
	}

	#[test]
	fn fast_path() {
		let mut cluster = cluster_with_materials(&[2, 0, 2, 1, 2, 0]);
		build_material_ranges(&mut cluster);
		let mut table = Vec::new();
		let packed = pack_material_info(&cluster, &mut table, 100);
		assert!(table.is_empty());
		assert_eq!(packed, 2 | 1 << 12 | 2 << 18 | 2 << 25);
		assert_ne!(packed >> 25, 0x7F);
	}

	#[test]
	fn slow_path() {
		let mut cluster = cluster_with_materials(&[0, 1, 2, 3, 3]);
		build_material_ranges(&mut cluster);
		assert_eq!(material_table_size(&cluster), 4);

		let mut table = vec![0xDEAD];
		let packed = pack_material_info(&cluster, &mut table, 100);
		assert_eq!(packed & ((1 << 19) - 1), 101);
		assert_eq!((packed >> 19) & 0x3F, 3);
		assert_eq!(packed >> 25, 0x7F);
		assert_eq!(table.len(), 5);
		assert_eq!(table[1], 2 << 8 | 3 << 16);
		assert_eq!(table[4], 4 | 1 << 8 | 2 << 16);
	}
}
