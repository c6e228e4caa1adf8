//! Serializes pages: fixups between pages, then the geometry of every cluster in the page layout, compressed per page.

use crate::cluster::{Cluster, ClusterGroup, INVALID_GROUP_INDEX};
use crate::encode::bit_writer::BitWriter;
use crate::encode::info::{EncodingInfo, color_to_bytes};
use crate::encode::material::pack_material_info;
use crate::encode::page::{ClusterGroupPart, Page, is_root_page, remove_root_pages_from_range};
use crate::error::Result;
use glam::{Vec2, Vec3};
use nanite_disk::constants::*;
use nanite_disk::packed::*;
use nanite_disk::resources::{PAGE_COMPRESSION_LEVEL, Resources};
use nanite_disk::stats::EncodingStats;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use std::mem::size_of;

/// Host side records of a page, written uncompressed in front of the page data.
#[derive(Clone, Debug, Default)]
struct FixupChunk {
	num_clusters: u32,
	hierarchy_fixups: Vec<HierarchyFixup>,
	cluster_fixups: Vec<ClusterFixup>,
}

impl FixupChunk {
	fn write_to(&self, out: &mut Vec<u8>) {
		assert!(self.hierarchy_fixups.len() <= u16::MAX as usize);
		assert!(self.cluster_fixups.len() <= u16::MAX as usize);
		let header = FixupChunkHeader {
			num_clusters: self.num_clusters as u16,
			num_hierarchy_fixups: self.hierarchy_fixups.len() as u16,
			num_cluster_fixups: self.cluster_fixups.len() as u16,
			_pad: 0,
		};
		out.extend_from_slice(bytemuck::bytes_of(&header));
		out.extend_from_slice(bytemuck::cast_slice(&self.hierarchy_fixups));
		out.extend_from_slice(bytemuck::cast_slice(&self.cluster_fixups));
	}
}

/// Every cluster built from a group that is not entirely on the cluster's own page gets a fixup in every page of that
/// group, so that whichever of them loads last can patch it.
fn add_cluster_fixups(
	chunks: &mut [FixupChunk],
	groups: &[ClusterGroup],
	parts: &[ClusterGroupPart],
	clusters: &[Cluster],
) {
	for part in parts {
		for (position_in_part, &cluster_index) in part.clusters.iter().enumerate() {
			let generating_group_index = clusters[cluster_index as usize].generating_group_index;
			if generating_group_index == INVALID_GROUP_INDEX {
				continue;
			}
			let generating_group = &groups[generating_group_index as usize];
			assert!(generating_group.page_index_num >= 1);
			if generating_group.page_index_start == part.page_index && generating_group.page_index_num == 1 {
				continue;
			}

			let (dependency_start, dependency_num) =
				remove_root_pages_from_range(generating_group.page_index_start, generating_group.page_index_num);
			let fixup = ClusterFixup::new(
				part.page_index,
				part.page_cluster_offset + position_in_part as u32,
				dependency_start,
				dependency_num,
			);
			let start = generating_group.page_index_start as usize;
			for chunk in &mut chunks[start..start + generating_group.page_index_num as usize] {
				chunk.cluster_fixups.push(fixup);
			}
		}
	}
}

/// Fills the dependency range of every page with the distinct pages its cluster fixups point at, root pages and the
/// page itself excluded.
fn page_dependencies(chunks: &[FixupChunk], streaming_states: &mut [PageStreamingState], dependencies: &mut Vec<u32>) {
	for (page_index, (chunk, state)) in chunks.iter().zip(streaming_states).enumerate() {
		let start = dependencies.len();
		for fixup in &chunk.cluster_fixups {
			let fixup_page = fixup.page_index();
			if is_root_page(fixup_page) || fixup_page as usize == page_index || dependencies[start..].contains(&fixup_page) {
				continue;
			}
			dependencies.push(fixup_page);
		}
		state.dependencies_start = start as u32;
		state.dependencies_num = (dependencies.len() - start) as u32;
	}
}

/// Every part of a page gets a fixup for each page its group spans, pointing at the part of the group on that page.
fn hierarchy_fixups(
	page: &Page,
	pages: &[Page],
	groups: &[ClusterGroup],
	parts: &[ClusterGroupPart],
	hierarchy_root_offsets: &[u32],
) -> Vec<HierarchyFixup> {
	let mut fixups = Vec::new();
	for part in &parts[page.parts()] {
		let group = &groups[part.group_index as usize];
		let root_offset = hierarchy_root_offsets[group.mesh_index as usize];
		let (dependency_start, dependency_num) =
			remove_root_pages_from_range(group.page_index_start, group.page_index_num);

		let group_pages = group.page_index_start as usize..(group.page_index_start + group.page_index_num) as usize;
		for other_page in &pages[group_pages] {
			if let Some(other_part) = parts[other_page.parts()]
				.iter()
				.find(|other| other.group_index == part.group_index)
			{
				fixups.push(HierarchyFixup::new(
					other_part.page_index,
					root_offset + other_part.hierarchy_node_index,
					other_part.hierarchy_child_index,
					other_part.page_cluster_offset,
					dependency_start,
					dependency_num,
				));
			}
		}
	}
	fixups
}

fn octahedron_encode(n: Vec3) -> Vec2 {
	let n = n / n.abs().element_sum();
	if n.z < 0. {
		let abs = n.abs();
		Vec2::new(
			if n.x >= 0. { 1. - abs.y } else { abs.y - 1. },
			if n.y >= 0. { 1. - abs.x } else { abs.x - 1. },
		)
	} else {
		Vec2::new(n.x, n.y)
	}
}

fn octahedron_decode(x: i32, y: i32, quantization_bits: u32) -> Vec3 {
	let max_value = ((1 << quantization_bits) - 1) as f32;
	let mut fx = x as f32 * (2. / max_value) - 1.;
	let mut fy = y as f32 * (2. / max_value) - 1.;
	let fz = 1. - fx.abs() - fy.abs();
	let t = (-fz).clamp(0., 1.);
	fx += if fx >= 0. { -t } else { t };
	fy += if fy >= 0. { -t } else { t };
	Vec3::new(fx, fy, fz).normalize()
}

/// Octahedral encoding, picking the best of the 4 quantized neighbours. `y << quantization_bits | x`
fn pack_normal(normal: Vec3, quantization_bits: u32) -> u32 {
	let max_value = (1 << quantization_bits) - 1;
	let coord = octahedron_encode(normal);
	let scale = 0.5 * max_value as f32;
	let nx = ((coord.x * scale + scale) as i32).clamp(0, max_value);
	let ny = ((coord.y * scale + scale) as i32).clamp(0, max_value);

	let mut min_error = 1.;
	let mut best = (0, 0);
	for (offset_x, offset_y) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
		let (tx, ty) = (nx + offset_x, ny + offset_y);
		if tx <= max_value && ty <= max_value {
			let error = (1. - octahedron_decode(tx, ty, quantization_bits).dot(normal)).abs();
			if error < min_error {
				min_error = error;
				best = (tx, ty);
			}
		}
	}
	((best.1 << quantization_bits) | best.0) as u32
}

fn pack_cluster(cluster: &Cluster, info: &EncodingInfo, num_tex_coords: u32) -> PackedCluster {
	assert!(num_tex_coords <= MAX_NANITE_UVS);
	let mut packed = PackedCluster {
		quantized_pos_start: cluster.quantized_pos_start.to_array(),
		mesh_bounds_min: cluster.mesh_bounds_min.to_array(),
		mesh_bounds_delta: cluster.mesh_bounds_delta.to_array(),
		lod_bounds: cluster.lod_bounds.to_array(),
		box_bounds_center: cluster.bounds.center().to_array(),
		lod_error_and_edge_length: pack_f16x2(cluster.lod_error, cluster.edge_length),
		box_bounds_extent: cluster.bounds.extent().to_array(),
		flags: CLUSTER_FLAG_LEAF,
		uv_prec: info.uv_prec,
		color_min: u32::from_le_bytes(info.color_min),
		color_bits: info.color_bits[0] | info.color_bits[1] << 4 | info.color_bits[2] << 8 | info.color_bits[3] << 12,
		group_index: cluster.group_index,
		..PackedCluster::default()
	};
	packed.set_num_verts(cluster.num_verts);
	packed.set_num_tris(cluster.num_tris);
	packed.set_bits_per_index(info.bits_per_index);
	packed.set_quantized_pos_shift(cluster.quantized_pos_shift);
	packed.set_pos_bits(cluster.quantized_pos_bits.to_array());
	packed.set_bits_per_attribute(info.bits_per_attribute);
	packed.set_num_uvs(num_tex_coords);
	packed.set_color_mode(info.color_mode);
	packed
}

/// Data of all clusters of a page, concatenated per section.
#[derive(Default)]
struct PageGeometry {
	strip_bitmasks: Vec<u32>,
	index_data: Vec<u8>,
	vertex_ref_bitmask: Vec<u32>,
	vertex_refs: Vec<u32>,
	position_data: Vec<u8>,
	attribute_data: Vec<u8>,
}

/// Vertices are identified by their exact bits. The value is `cluster << 8 | coded vertex`.
type UniqueVertices<'a> = FxHashMap<&'a [u32], u32>;

/// Appends the geometry of a cluster to the page. Vertices already stored by an earlier cluster of the page are
/// referenced instead of coded again. Returns the number of coded vertices.
fn encode_geometry<'a>(
	local_cluster_index: u32,
	cluster: &'a Cluster,
	info: &EncodingInfo,
	geometry: &mut PageGeometry,
	unique_vertices: &mut UniqueVertices<'a>,
) -> u32 {
	assert!(cluster.num_verts > 0);
	let bitmask_start = geometry.vertex_ref_bitmask.len();
	geometry
		.vertex_ref_bitmask
		.resize(bitmask_start + (MAX_CLUSTER_VERTICES / 32) as usize, 0);

	let mut unique_to_vertex_index = Vec::new();
	for vert in 0..cluster.num_verts {
		let key: &[u32] = bytemuck::cast_slice(cluster.vert(vert));
		if let Some(&value) = unique_vertices.get(key) {
			let cluster_delta = local_cluster_index - (value >> 8);
			geometry.vertex_refs.push((cluster_delta << 8) | (value & 0xFF));
			geometry.vertex_ref_bitmask[bitmask_start + (vert >> 5) as usize] |= 1 << (vert & 31);
		} else {
			unique_vertices.insert(key, (local_cluster_index << 8) | unique_to_vertex_index.len() as u32);
			unique_to_vertex_index.push(vert);
		}
	}

	for bitmasks in &cluster.strip_desc.bitmasks {
		geometry.strip_bitmasks.extend_from_slice(bitmasks);
	}
	geometry.index_data.extend_from_slice(&cluster.strip_index_data);

	let bits = cluster.quantized_pos_bits;
	let mut positions = BitWriter::new(&mut geometry.position_data);
	for &vert in &unique_to_vertex_index {
		let position = cluster.quantized_positions[vert as usize];
		positions.put_bits(position.x, bits.x);
		positions.put_bits(position.y, bits.y);
		positions.put_bits(position.z, bits.z);
		positions.flush(1);
	}
	positions.flush(4);

	let mut attributes = BitWriter::new(&mut geometry.attribute_data);
	for &vert in &unique_to_vertex_index {
		attributes.put_bits(pack_normal(cluster.normal(vert), NORMAL_QUANTIZATION_BITS), 2 * NORMAL_QUANTIZATION_BITS);

		if info.color_mode == VERTEX_COLOR_MODE_VARIABLE {
			let color = color_to_bytes(cluster.color(vert));
			for c in 0..4 {
				attributes.put_bits((color[c] - info.color_min[c]) as u32, info.color_bits[c]);
			}
		}

		for (uv_index, uv_info) in info.uv_infos.iter().enumerate() {
			let packed_uv = uv_info.quantize(cluster.uv(vert, uv_index as u32));
			attributes.put_bits(packed_uv, uv_info.bits_u + uv_info.bits_v);
		}
		attributes.flush(1);
	}
	attributes.flush(4);

	unique_to_vertex_index.len() as u32
}

fn align(data: &mut Vec<u8>, alignment: usize) {
	data.resize(data.len().next_multiple_of(alignment), 0);
}

/// A page ready to be appended to its blob.
struct PageResult {
	compressed: Vec<u8>,
	uncompressed_size: u32,
	index_bytes: u32,
	position_bytes: u32,
	attribute_bytes: u32,
}

struct PageWriter<'a> {
	pages: &'a [Page],
	groups: &'a [ClusterGroup],
	parts: &'a [ClusterGroupPart],
	clusters: &'a [Cluster],
	encoding_infos: &'a [EncodingInfo],
	hierarchy_root_offsets: &'a [u32],
	num_tex_coords: u32,
}

impl PageWriter<'_> {
	fn page_clusters(&self, page: &Page) -> impl Iterator<Item = (u32, u32)> + '_ {
		self.parts[page.parts()].iter().flat_map(|part| {
			part.clusters
				.iter()
				.enumerate()
				.map(move |(i, &cluster)| (part.page_cluster_offset + i as u32, cluster))
		})
	}

	#[profiling::function]
	fn write_page(&self, page_index: usize, mut chunk: FixupChunk) -> Result<PageResult> {
		let page = &self.pages[page_index];
		let num_clusters = page.num_clusters as usize;
		chunk.hierarchy_fixups = hierarchy_fixups(page, self.pages, self.groups, self.parts, self.hierarchy_root_offsets);

		let mut packed_clusters = vec![PackedCluster::default(); num_clusters];
		let mut coded_verts_per_cluster = vec![0; num_clusters];
		let mut vertex_bytes_per_cluster = vec![0; num_clusters];
		let mut material_range_data = Vec::new();
		let mut geometry = PageGeometry::default();
		let mut unique_vertices = UniqueVertices::default();
		let mut section_offsets = page.gpu_sizes.offsets();

		for (local_index, cluster_index) in self.page_clusters(page) {
			let cluster = &self.clusters[cluster_index as usize];
			let info = &self.encoding_infos[cluster_index as usize];
			assert_eq!(cluster.format.num_tex_coords, self.num_tex_coords);

			let packed = &mut packed_clusters[local_index as usize];
			*packed = pack_cluster(cluster, info, self.num_tex_coords);
			packed.packed_material_info = pack_material_info(
				cluster,
				&mut material_range_data,
				page.num_clusters * NUM_PACKED_CLUSTER_DWORDS,
			);
			packed.set_index_offset(section_offsets.index);
			packed.set_position_offset(section_offsets.position);
			packed.set_attribute_offset(section_offsets.attribute);
			packed.set_decode_info_offset(section_offsets.decode_info);
			section_offsets += info.gpu_sizes;

			// a generating group entirely on this page is always resident together with its parents
			if cluster.generating_group_index != INVALID_GROUP_INDEX {
				let generating_group = &self.groups[cluster.generating_group_index as usize];
				if generating_group.page_index_start == page_index as u32 && generating_group.page_index_num == 1 {
					packed.flags &= !CLUSTER_FLAG_LEAF;
				}
			}

			let position_bytes_before = geometry.position_data.len();
			coded_verts_per_cluster[local_index as usize] =
				encode_geometry(local_index, cluster, info, &mut geometry, &mut unique_vertices);
			vertex_bytes_per_cluster[local_index as usize] = geometry.position_data.len() - position_bytes_before;
		}
		assert_eq!(section_offsets.cluster, page.gpu_sizes.material_table_offset());
		assert_eq!(section_offsets.material_table.next_multiple_of(16), page.gpu_sizes.decode_info_offset());
		assert_eq!(section_offsets.attribute, page.gpu_sizes.total());
		align(&mut geometry.index_data, 4);
		material_range_data.resize(material_range_data.len().next_multiple_of(4), 0);

		let headers_size = size_of::<PageDiskHeader>() + num_clusters * size_of::<ClusterDiskHeader>();
		let mut data = vec![0; headers_size];
		let mut disk_header = PageDiskHeader {
			gpu_size: page.gpu_sizes.total(),
			num_clusters: page.num_clusters,
			num_raw_float4s: (page.num_clusters * (size_of::<PackedCluster>() as u32 + self.num_tex_coords * size_of::<UvRange>() as u32))
				/ 16 + material_range_data.len() as u32 / 4,
			num_tex_coords: self.num_tex_coords,
			..PageDiskHeader::default()
		};
		let mut cluster_headers = vec![ClusterDiskHeader::default(); num_clusters];

		// clusters as structure of arrays, one 16 byte row of every cluster after the other
		const _: () = assert!(size_of::<PackedCluster>() % 16 == 0);
		for row in 0..size_of::<PackedCluster>() / 16 {
			for packed in &packed_clusters {
				data.extend_from_slice(&bytemuck::bytes_of(packed)[row * 16..(row + 1) * 16]);
			}
		}
		data.extend_from_slice(bytemuck::cast_slice(&material_range_data));

		disk_header.decode_info_offset = data.len() as u32;
		for (_, cluster_index) in self.page_clusters(page) {
			for uv_info in &self.encoding_infos[cluster_index as usize].uv_infos {
				data.extend_from_slice(bytemuck::bytes_of(&uv_info.range));
			}
		}

		let mut offset = data.len();
		for (local_index, cluster_index) in self.page_clusters(page) {
			let cluster = &self.clusters[cluster_index as usize];
			let header = &mut cluster_headers[local_index as usize];
			header.index_data_offset = offset as u32;
			header.num_prev_ref_vertices_before_dwords = cluster.strip_desc.num_prev_ref_vertices_before_dwords;
			header.num_prev_new_vertices_before_dwords = cluster.strip_desc.num_prev_new_vertices_before_dwords;
			offset += cluster.strip_index_data.len();
		}
		data.extend_from_slice(&geometry.index_data);
		align(&mut data, 4);

		disk_header.strip_bitmask_offset = data.len() as u32;
		data.extend_from_slice(bytemuck::cast_slice(&geometry.strip_bitmasks));

		disk_header.vertex_ref_bitmask_offset = data.len() as u32;
		assert_eq!(geometry.vertex_ref_bitmask.len(), num_clusters * (MAX_CLUSTER_VERTICES / 32) as usize);
		data.extend_from_slice(bytemuck::cast_slice(&geometry.vertex_ref_bitmask));

		let mut offset = data.len();
		for (i, header) in cluster_headers.iter_mut().enumerate() {
			header.vertex_ref_data_offset = offset as u32;
			offset += (packed_clusters[i].num_verts() - coded_verts_per_cluster[i]) as usize * size_of::<u32>();
		}
		data.extend_from_slice(bytemuck::cast_slice(&geometry.vertex_refs));

		let mut offset = data.len();
		for (i, header) in cluster_headers.iter_mut().enumerate() {
			header.position_data_offset = offset as u32;
			offset += vertex_bytes_per_cluster[i];
		}
		data.extend_from_slice(&geometry.position_data);
		assert_eq!(offset, data.len());

		let mut offset = data.len();
		for (i, header) in cluster_headers.iter_mut().enumerate() {
			let bytes_per_attribute = packed_clusters[i].bits_per_attribute().div_ceil(8);
			header.attribute_data_offset = offset as u32;
			offset += (coded_verts_per_cluster[i] * bytes_per_attribute).next_multiple_of(4) as usize;
		}
		data.extend_from_slice(&geometry.attribute_data);
		assert_eq!(offset, data.len());

		data[..size_of::<PageDiskHeader>()].copy_from_slice(bytemuck::bytes_of(&disk_header));
		data[size_of::<PageDiskHeader>()..headers_size].copy_from_slice(bytemuck::cast_slice(&cluster_headers));

		let mut page_bytes = Vec::with_capacity(data.len() + 1024);
		chunk.write_to(&mut page_bytes);
		page_bytes.extend_from_slice(&data);
		let compressed = {
			profiling::scope!("zstd::bulk::compress");
			zstd::bulk::compress(&page_bytes, PAGE_COMPRESSION_LEVEL)?
		};
		Ok(PageResult {
			compressed,
			uncompressed_size: page_bytes.len() as u32,
			index_bytes: geometry.index_data.len() as u32,
			position_bytes: geometry.position_data.len() as u32,
			attribute_bytes: geometry.attribute_data.len() as u32,
		})
	}
}

/// Writes all pages into the root and streamable blobs of `resources`, along with their streaming states and
/// dependencies. Expects the hierarchy to be built, as hierarchy fixups point into it.
#[profiling::function]
pub fn write_pages(
	resources: &mut Resources,
	pages: &[Page],
	groups: &[ClusterGroup],
	parts: &[ClusterGroupPart],
	clusters: &[Cluster],
	encoding_infos: &[EncodingInfo],
	num_tex_coords: u32,
) -> Result<EncodingStats> {
	assert!(resources.page_streaming_states.is_empty());
	let num_pages = pages.len();

	let mut chunks: Vec<FixupChunk> = pages
		.iter()
		.map(|page| FixupChunk {
			num_clusters: page.num_clusters,
			..FixupChunk::default()
		})
		.collect();
	add_cluster_fixups(&mut chunks, groups, parts, clusters);

	resources.page_streaming_states = vec![PageStreamingState::default(); num_pages];
	page_dependencies(&chunks, &mut resources.page_streaming_states, &mut resources.page_dependencies);

	let writer = PageWriter {
		pages,
		groups,
		parts,
		clusters,
		encoding_infos,
		hierarchy_root_offsets: &resources.hierarchy_root_offsets,
		num_tex_coords,
	};
	let results = chunks
		.into_par_iter()
		.enumerate()
		.map(|(page_index, chunk)| writer.write_page(page_index, chunk))
		.collect::<Result<Vec<_>>>()?;

	let mut stats = EncodingStats {
		pages: num_pages as u32,
		root_pages: num_pages.min(NUM_ROOT_PAGES as usize) as u32,
		gpu_bytes: pages.iter().map(|page| page.gpu_sizes.total()).sum(),
		..EncodingStats::default()
	};
	let mut uncompressed_bytes = 0;
	for (page_index, result) in results.into_iter().enumerate() {
		let blob = if is_root_page(page_index as u32) {
			&mut resources.root_pages
		} else {
			&mut resources.streamable_pages
		};
		let state = &mut resources.page_streaming_states[page_index];
		state.bulk_offset = blob.len() as u32;
		state.bulk_size = result.compressed.len() as u32;
		state.page_uncompressed_size = result.uncompressed_size;
		blob.extend_from_slice(&result.compressed);

		uncompressed_bytes += result.uncompressed_size;
		stats.index_bytes += result.index_bytes;
		stats.position_bytes += result.position_bytes;
		stats.attribute_bytes += result.attribute_bytes;
	}
	stats.root_bytes_compressed = resources.root_pages.len() as u32;
	stats.streamable_bytes_compressed = resources.streamable_pages.len() as u32;

	log::info!(
		"wrote {} pages, GPU size {} bytes, {:.1}% utilization",
		num_pages,
		stats.gpu_bytes,
		stats.gpu_bytes as f32 / (num_pages as f32 * CLUSTER_PAGE_GPU_SIZE as f32) * 100.
	);
	log::info!(
		"page data {} bytes uncompressed, {} bytes compressed, {} dependencies",
		uncompressed_bytes,
		stats.root_bytes_compressed + stats.streamable_bytes_compressed,
		resources.page_dependencies.len()
	);
	Ok(stats)
}
