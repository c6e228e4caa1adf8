//! Structs with a bit exact layout, as they appear in pages or are consumed by the runtime.

use crate::constants::*;
use crate::half::f32_to_f16;
use crate::shape::bounds::Bounds;
use crate::shape::sphere::Sphere;
use bytemuck_derive::{Pod, Zeroable};
use static_assertions::const_assert_eq;
use std::mem::size_of;

#[inline]
pub fn get_bits(value: u32, num_bits: u32, offset: u32) -> u32 {
	let mask = ((1u64 << num_bits) - 1) as u32;
	(value >> offset) & mask
}

#[inline]
pub fn set_bits(value: &mut u32, bits: u32, num_bits: u32, offset: u32) {
	let mask = ((1u64 << num_bits) - 1) as u32;
	assert!(bits <= mask, "value {bits} does not fit into {num_bits} bits");
	let mask = mask << offset;
	*value = (*value & !mask) | (bits << offset);
}

/// Pack two floats as halfs into a single u32, `low` in the lower 16 bits.
#[inline]
pub fn pack_f16x2(low: f32, high: f32) -> u32 {
	f32_to_f16(low) as u32 | ((f32_to_f16(high) as u32) << 16)
}

/// A cluster as the GPU sees it, 8 rows of 16 bytes.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable)]
pub struct PackedCluster {
	// members needed for rasterization
	pub quantized_pos_start: [i32; 3],
	/// NumVerts:9, PositionOffset:23
	pub num_verts_position_offset: u32,

	pub mesh_bounds_min: [f32; 3],
	/// NumTris:8, IndexOffset:24
	pub num_tris_index_offset: u32,

	pub mesh_bounds_delta: [f32; 3],
	/// BitsPerIndex:4, QuantizedPosShift:6, QuantizedPosBits:5.5.5
	pub bits_per_index_quantized_pos_shift_pos_bits: u32,

	// members needed for culling
	pub lod_bounds: [f32; 4],

	pub box_bounds_center: [f32; 3],
	pub lod_error_and_edge_length: u32,

	pub box_bounds_extent: [f32; 3],
	pub flags: u32,

	// members needed by materials
	/// AttributeOffset:22, BitsPerAttribute:10
	pub attribute_offset_bits_per_attribute: u32,
	/// DecodeInfoOffset:22, NumUVs:3, ColorMode:2
	pub decode_info_offset_num_uvs_color_mode: u32,
	/// U0:4, V0:4, U1:4, V1:4, U2:4, V2:4, U3:4, V3:4
	pub uv_prec: u32,
	pub packed_material_info: u32,

	pub color_min: u32,
	/// R:4, G:4, B:4, A:4
	pub color_bits: u32,
	/// debug only
	pub group_index: u32,
	pub _pad: u32,
}
const_assert_eq!(size_of::<PackedCluster>(), 8 * 16);

pub const NUM_PACKED_CLUSTER_DWORDS: u32 = (size_of::<PackedCluster>() / 4) as u32;

impl PackedCluster {
	pub fn num_verts(&self) -> u32 {
		get_bits(self.num_verts_position_offset, 9, 0)
	}
	pub fn position_offset(&self) -> u32 {
		get_bits(self.num_verts_position_offset, 23, 9)
	}
	pub fn num_tris(&self) -> u32 {
		get_bits(self.num_tris_index_offset, 8, 0)
	}
	pub fn index_offset(&self) -> u32 {
		get_bits(self.num_tris_index_offset, 24, 8)
	}
	pub fn bits_per_index(&self) -> u32 {
		get_bits(self.bits_per_index_quantized_pos_shift_pos_bits, 4, 0)
	}
	pub fn quantized_pos_shift(&self) -> u32 {
		get_bits(self.bits_per_index_quantized_pos_shift_pos_bits, 6, 4)
	}
	pub fn pos_bits(&self) -> [u32; 3] {
		let v = self.bits_per_index_quantized_pos_shift_pos_bits;
		[get_bits(v, 5, 10), get_bits(v, 5, 15), get_bits(v, 5, 20)]
	}
	pub fn attribute_offset(&self) -> u32 {
		get_bits(self.attribute_offset_bits_per_attribute, 22, 0)
	}
	pub fn bits_per_attribute(&self) -> u32 {
		get_bits(self.attribute_offset_bits_per_attribute, 10, 22)
	}
	pub fn decode_info_offset(&self) -> u32 {
		get_bits(self.decode_info_offset_num_uvs_color_mode, 22, 0)
	}
	pub fn num_uvs(&self) -> u32 {
		get_bits(self.decode_info_offset_num_uvs_color_mode, 3, 22)
	}
	pub fn color_mode(&self) -> u32 {
		get_bits(self.decode_info_offset_num_uvs_color_mode, 2, 25)
	}

	pub fn set_num_verts(&mut self, num_verts: u32) {
		set_bits(&mut self.num_verts_position_offset, num_verts, 9, 0);
	}
	pub fn set_position_offset(&mut self, offset: u32) {
		set_bits(&mut self.num_verts_position_offset, offset, 23, 9);
	}
	pub fn set_num_tris(&mut self, num_tris: u32) {
		set_bits(&mut self.num_tris_index_offset, num_tris, 8, 0);
	}
	pub fn set_index_offset(&mut self, offset: u32) {
		set_bits(&mut self.num_tris_index_offset, offset, 24, 8);
	}
	pub fn set_bits_per_index(&mut self, bits: u32) {
		set_bits(&mut self.bits_per_index_quantized_pos_shift_pos_bits, bits, 4, 0);
	}
	pub fn set_quantized_pos_shift(&mut self, shift: u32) {
		set_bits(&mut self.bits_per_index_quantized_pos_shift_pos_bits, shift, 6, 4);
	}
	pub fn set_pos_bits(&mut self, bits: [u32; 3]) {
		let v = &mut self.bits_per_index_quantized_pos_shift_pos_bits;
		set_bits(v, bits[0], 5, 10);
		set_bits(v, bits[1], 5, 15);
		set_bits(v, bits[2], 5, 20);
	}
	pub fn set_attribute_offset(&mut self, offset: u32) {
		set_bits(&mut self.attribute_offset_bits_per_attribute, offset, 22, 0);
	}
	pub fn set_bits_per_attribute(&mut self, bits: u32) {
		set_bits(&mut self.attribute_offset_bits_per_attribute, bits, 10, 22);
	}
	pub fn set_decode_info_offset(&mut self, offset: u32) {
		set_bits(&mut self.decode_info_offset_num_uvs_color_mode, offset, 22, 0);
	}
	pub fn set_num_uvs(&mut self, num: u32) {
		set_bits(&mut self.decode_info_offset_num_uvs_color_mode, num, 3, 22);
	}
	pub fn set_color_mode(&mut self, mode: u32) {
		set_bits(&mut self.decode_info_offset_num_uvs_color_mode, mode, 2, 25);
	}
}

/// Per cluster and UV channel decode info. The largest unused gap of each axis is cut out before quantizing.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct UvRange {
	pub min: [f32; 2],
	pub scale: [f32; 2],
	pub gap_start: [i32; 2],
	pub gap_length: [i32; 2],
}
const_assert_eq!(size_of::<UvRange>(), 32);

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct HierarchyNodeMisc0 {
	pub box_bounds_center: [f32; 3],
	pub min_lod_error_max_parent_lod_error: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct HierarchyNodeMisc1 {
	pub box_bounds_extent: [f32; 3],
	pub child_start_reference: u32,
}

/// BVH node with [`MAX_BVH_NODE_FANOUT`] children, laid out as arrays per member for the GPU.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct PackedHierarchyNode {
	pub lod_bounds: [[f32; 4]; MAX_BVH_NODE_FANOUT],
	pub misc0: [HierarchyNodeMisc0; MAX_BVH_NODE_FANOUT],
	pub misc1: [HierarchyNodeMisc1; MAX_BVH_NODE_FANOUT],
	/// ResourcePageIndex:20, NumPages:3, GroupPartSize:9
	pub misc2: [u32; MAX_BVH_NODE_FANOUT],
}
const_assert_eq!(size_of::<PackedHierarchyNode>(), MAX_BVH_NODE_FANOUT * (16 * 3 + 4));

impl PackedHierarchyNode {
	pub fn set_child_bounds(&mut self, child: usize, bounds: &Bounds, lod_bounds: &Sphere) {
		self.lod_bounds[child] = lod_bounds.to_array();
		self.misc0[child].box_bounds_center = bounds.center().to_array();
		self.misc1[child].box_bounds_extent = bounds.extent().to_array();
	}

	pub fn page_index_start(&self, child: usize) -> u32 {
		self.misc2[child] >> (MAX_CLUSTERS_PER_GROUP_BITS + MAX_GROUP_PARTS_BITS)
	}

	pub fn page_index_num(&self, child: usize) -> u32 {
		get_bits(self.misc2[child], MAX_GROUP_PARTS_BITS, MAX_CLUSTERS_PER_GROUP_BITS)
	}

	pub fn group_part_size(&self, child: usize) -> u32 {
		self.misc2[child] & MAX_CLUSTERS_PER_GROUP_MASK
	}
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct PageStreamingState {
	pub bulk_offset: u32,
	pub bulk_size: u32,
	pub page_uncompressed_size: u32,
	pub dependencies_start: u32,
	pub dependencies_num: u32,
}

/// Patches the hierarchy child referencing a group part once the page holding the part is resident.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct HierarchyFixup {
	pub page_index: u32,
	pub hierarchy_node_and_child_index: u32,
	pub cluster_group_part_start_index: u32,
	pub page_dependency_start_and_num: u32,
}

impl HierarchyFixup {
	pub fn new(
		page_index: u32,
		node_index: u32,
		child_index: u32,
		cluster_group_part_start_index: u32,
		page_dependency_start: u32,
		page_dependency_num: u32,
	) -> Self {
		assert!(page_index < MAX_RESOURCE_PAGES);
		assert!(node_index < (1 << (32 - MAX_HIERACHY_CHILDREN_BITS)));
		assert!(child_index < MAX_HIERACHY_CHILDREN);
		assert!(cluster_group_part_start_index < (1 << (32 - MAX_CLUSTERS_PER_GROUP_BITS)));
		assert!(page_dependency_start < MAX_RESOURCE_PAGES);
		assert!(page_dependency_num <= MAX_GROUP_PARTS_MASK);
		Self {
			page_index,
			hierarchy_node_and_child_index: (node_index << MAX_HIERACHY_CHILDREN_BITS) | child_index,
			cluster_group_part_start_index,
			page_dependency_start_and_num: (page_dependency_start << MAX_GROUP_PARTS_BITS) | page_dependency_num,
		}
	}

	pub fn node_index(&self) -> u32 {
		self.hierarchy_node_and_child_index >> MAX_HIERACHY_CHILDREN_BITS
	}

	pub fn child_index(&self) -> u32 {
		self.hierarchy_node_and_child_index & (MAX_HIERACHY_CHILDREN - 1)
	}

	pub fn page_dependency_start(&self) -> u32 {
		self.page_dependency_start_and_num >> MAX_GROUP_PARTS_BITS
	}

	pub fn page_dependency_num(&self) -> u32 {
		self.page_dependency_start_and_num & MAX_GROUP_PARTS_MASK
	}
}

/// Patches a cluster whose generating group spans several pages, once all of them are resident.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct ClusterFixup {
	pub page_and_cluster_index: u32,
	pub page_dependency_start_and_num: u32,
}

impl ClusterFixup {
	pub fn new(page_index: u32, cluster_index: u32, page_dependency_start: u32, page_dependency_num: u32) -> Self {
		assert!(page_index < (1 << (32 - MAX_CLUSTERS_PER_GROUP_BITS)));
		assert!(cluster_index < MAX_CLUSTERS_PER_PAGE);
		assert!(page_dependency_start < MAX_RESOURCE_PAGES);
		assert!(page_dependency_num <= MAX_GROUP_PARTS_MASK);
		Self {
			page_and_cluster_index: (page_index << MAX_CLUSTERS_PER_PAGE_BITS) | cluster_index,
			page_dependency_start_and_num: (page_dependency_start << MAX_GROUP_PARTS_BITS) | page_dependency_num,
		}
	}

	pub fn page_index(&self) -> u32 {
		self.page_and_cluster_index >> MAX_CLUSTERS_PER_PAGE_BITS
	}

	pub fn cluster_index(&self) -> u32 {
		self.page_and_cluster_index & MAX_CLUSTERS_PER_PAGE_MASK
	}

	pub fn page_dependency_start(&self) -> u32 {
		self.page_dependency_start_and_num >> MAX_GROUP_PARTS_BITS
	}

	pub fn page_dependency_num(&self) -> u32 {
		self.page_dependency_start_and_num & MAX_GROUP_PARTS_MASK
	}
}

/// Header of the fixup chunk preceding every page. The chunk stays in host memory.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct FixupChunkHeader {
	pub num_clusters: u16,
	pub num_hierarchy_fixups: u16,
	pub num_cluster_fixups: u16,
	pub _pad: u16,
}

impl FixupChunkHeader {
	pub fn chunk_size(&self) -> usize {
		size_of::<Self>()
			+ self.num_hierarchy_fixups as usize * size_of::<HierarchyFixup>()
			+ self.num_cluster_fixups as usize * size_of::<ClusterFixup>()
	}
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct PageDiskHeader {
	pub gpu_size: u32,
	pub num_clusters: u32,
	pub num_raw_float4s: u32,
	pub num_tex_coords: u32,
	pub decode_info_offset: u32,
	pub strip_bitmask_offset: u32,
	pub vertex_ref_bitmask_offset: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct ClusterDiskHeader {
	pub index_data_offset: u32,
	pub vertex_ref_data_offset: u32,
	pub position_data_offset: u32,
	pub attribute_data_offset: u32,
	pub num_prev_ref_vertices_before_dwords: u32,
	pub num_prev_new_vertices_before_dwords: u32,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn bit_fields_do_not_overlap() {
		let mut c = PackedCluster::default();
		c.set_num_verts(256);
		c.set_position_offset(0x12345);
		c.set_num_uvs(3);
		c.set_color_mode(VERTEX_COLOR_MODE_VARIABLE);
		c.set_decode_info_offset(0x3fffff);
		c.set_pos_bits([21, 1, 7]);
		c.set_bits_per_index(8);
		assert_eq!(c.num_verts(), 256);
		assert_eq!(c.position_offset(), 0x12345);
		assert_eq!(c.num_uvs(), 3);
		assert_eq!(c.color_mode(), VERTEX_COLOR_MODE_VARIABLE);
		assert_eq!(c.decode_info_offset(), 0x3fffff);
		assert_eq!(c.pos_bits(), [21, 1, 7]);
		assert_eq!(c.bits_per_index(), 8);
	}

	#[test]
	#[should_panic(expected = "does not fit")]
	fn overflowing_field() {
		let mut c = PackedCluster::default();
		c.set_num_tris(256);
	}

	#[test]
	fn fixups_round_trip() {
		let h = HierarchyFixup::new(5, 1000, 7, 42, 17, 3);
		assert_eq!(h.node_index(), 1000);
		assert_eq!(h.child_index(), 7);
		assert_eq!(h.page_dependency_start(), 17);
		assert_eq!(h.page_dependency_num(), 3);

		let c = ClusterFixup::new(12, 1023, 4, 7);
		assert_eq!(c.page_index(), 12);
		assert_eq!(c.cluster_index(), 1023);
		assert_eq!(c.page_dependency_start(), 4);
		assert_eq!(c.page_dependency_num(), 7);
	}
}
