use crate::cluster::Cluster;
use crate::encode::material::material_table_size;
use crate::math::{ceil_log2, floor_log2};
use glam::{Vec2, Vec4};
use nanite_disk::constants::*;
use nanite_disk::packed::{PackedCluster, UvRange};
use rayon::prelude::*;
use std::mem::size_of;
use std::ops::AddAssign;

/// Every UV channel gets at least this many steps per unit.
const TEX_COORD_UNIT_PRECISION: f32 = (1 << 14) as f32;
const MAX_TEX_COORD_BITS: u32 = 12;
const SMALL_NUMBER: f32 = 1e-8;

/// GPU byte sizes of the sections of a page, or of what a single cluster contributes to them.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PageSections {
	pub cluster: u32,
	pub material_table: u32,
	pub decode_info: u32,
	pub index: u32,
	pub position: u32,
	pub attribute: u32,
}

impl PageSections {
	pub fn material_table_size(&self) -> u32 {
		self.material_table.next_multiple_of(16)
	}

	pub fn material_table_offset(&self) -> u32 {
		self.cluster
	}

	pub fn decode_info_offset(&self) -> u32 {
		self.cluster + self.material_table_size()
	}

	pub fn index_offset(&self) -> u32 {
		self.decode_info_offset() + self.decode_info
	}

	pub fn position_offset(&self) -> u32 {
		self.index_offset() + self.index
	}

	pub fn attribute_offset(&self) -> u32 {
		self.position_offset() + self.position
	}

	pub fn total(&self) -> u32 {
		self.attribute_offset() + self.attribute
	}

	/// The start of each section, with the material table aligned.
	pub fn offsets(&self) -> PageSections {
		PageSections {
			cluster: 0,
			material_table: self.material_table_offset(),
			decode_info: self.decode_info_offset(),
			index: self.index_offset(),
			position: self.position_offset(),
			attribute: self.attribute_offset(),
		}
	}
}

impl AddAssign for PageSections {
	fn add_assign(&mut self, rhs: Self) {
		self.cluster += rhs.cluster;
		self.material_table += rhs.material_table;
		self.decode_info += rhs.decode_info;
		self.index += rhs.index;
		self.position += rhs.position;
		self.attribute += rhs.attribute;
	}
}

/// Quantization of a single UV channel of a cluster.
#[derive(Copy, Clone, Debug, Default)]
pub struct UvInfo {
	pub range: UvRange,
	pub min: Vec2,
	pub rcp_delta: Vec2,
	pub nu: u32,
	pub nv: u32,
	pub bits_u: u32,
	pub bits_v: u32,
}

impl UvInfo {
	/// Finds the largest gap between used coordinates on each axis and leaves it out of the quantized range, so that
	/// UV seams jumping across the atlas don't blow up the bit count.
	fn new(mut us: Vec<f32>, mut vs: Vec<f32>) -> Self {
		assert!(!us.is_empty());
		us.sort_by(f32::total_cmp);
		vs.sort_by(f32::total_cmp);

		let largest_gap = |values: &[f32]| {
			let mut gap = (values[0], values[0]);
			for pair in values.windows(2) {
				if pair[1] - pair[0] > gap.1 - gap.0 {
					gap = (pair[0], pair[1]);
				}
			}
			gap
		};
		let (gap_start_u, gap_end_u) = largest_gap(&us);
		let (gap_start_v, gap_end_v) = largest_gap(&vs);
		let gap_start = Vec2::new(gap_start_u, gap_start_v);
		let gap_end = Vec2::new(gap_end_u, gap_end_v);

		let min = Vec2::new(us[0], vs[0]);
		let max = Vec2::new(us[us.len() - 1], vs[vs.len() - 1]);
		let delta = max - min;
		let rcp_delta = Vec2::select(delta.cmpgt(Vec2::splat(SMALL_NUMBER)), delta.recip(), Vec2::ZERO);

		let non_gap_length = (delta - (gap_end - gap_start)).max(Vec2::ZERO);
		let normalized_gap_start = (gap_start - min) * rcp_delta;
		let normalized_gap_end = (gap_end - min) * rcp_delta;
		let normalized_non_gap_length = non_gap_length * rcp_delta;

		let axis = |delta: f32, non_gap_length: f32, normalized_non_gap_length: f32, gap_start: f32, gap_end: f32| {
			let bits = if delta > 0. {
				// even without anything but the gap there are two distinct values
				let num_values = ((non_gap_length * TEX_COORD_UNIT_PRECISION).ceil() as i32).max(2);
				ceil_log2(num_values as u32).min(MAX_TEX_COORD_BITS)
			} else {
				0
			};
			let max_value = (1 << bits) - 1;
			let n = if normalized_non_gap_length > SMALL_NUMBER {
				(max_value as f32 - 2.) / normalized_non_gap_length
			} else {
				0.
			};
			let n = n.clamp(max_value as f32, 0xFFFF as f32) as i32;

			let (gap_start, gap_length) = if n > max_value {
				let start = (gap_start * n as f32 + 0.5) as i32 + 1;
				let end = (gap_end * n as f32 + 0.5) as i32;
				(start, (end - start).max(0))
			} else {
				(max_value + 1, 0)
			};
			(bits, n as u32, gap_start, gap_length)
		};
		let (bits_u, nu, gap_start_u, gap_length_u) = axis(
			delta.x,
			non_gap_length.x,
			normalized_non_gap_length.x,
			normalized_gap_start.x,
			normalized_gap_end.x,
		);
		let (bits_v, nv, gap_start_v, gap_length_v) = axis(
			delta.y,
			non_gap_length.y,
			normalized_non_gap_length.y,
			normalized_gap_start.y,
			normalized_gap_end.y,
		);

		let scale = |delta: f32, n: u32| if n > 0 { delta / n as f32 } else { 0. };
		Self {
			range: UvRange {
				min: min.to_array(),
				scale: [scale(delta.x, nu), scale(delta.y, nv)],
				gap_start: [gap_start_u, gap_start_v],
				gap_length: [gap_length_u, gap_length_v],
			},
			min,
			rcp_delta,
			nu,
			nv,
			bits_u,
			bits_v,
		}
	}

	/// `V << bits_u | U`
	pub fn quantize(&self, uv: Vec2) -> u32 {
		let normalized = ((uv - self.min) * self.rcp_delta).clamp(Vec2::ZERO, Vec2::ONE);
		let axis = |normalized: f32, n: u32, gap_start: i32, gap_length: i32, bits: u32| {
			let mut value = (normalized * n as f32 + 0.5) as i32;
			if value >= gap_start {
				assert!(value >= gap_start + gap_length);
				value -= gap_length;
			}
			assert!(value >= 0 && value < 1 << bits);
			value as u32
		};
		let u = axis(
			normalized.x,
			self.nu,
			self.range.gap_start[0],
			self.range.gap_length[0],
			self.bits_u,
		);
		let v = axis(
			normalized.y,
			self.nv,
			self.range.gap_start[1],
			self.range.gap_length[1],
			self.bits_v,
		);
		v << self.bits_u | u
	}

	/// Inverse of [`Self::quantize`] as a decoder would do it.
	pub fn dequantize(&self, packed: u32) -> Vec2 {
		let u = packed & ((1 << self.bits_u) - 1);
		let v = packed >> self.bits_u;
		let axis = |value: u32, axis: usize| {
			let mut value = value as i32;
			if value >= self.range.gap_start[axis] {
				value += self.range.gap_length[axis];
			}
			self.range.min[axis] + value as f32 * self.range.scale[axis]
		};
		Vec2::new(axis(u, 0), axis(v, 1))
	}
}

/// Colors in the 8 bit per channel form they are stored in.
pub fn color_to_bytes(color: Vec4) -> [u8; 4] {
	(color.clamp(Vec4::ZERO, Vec4::ONE) * 255. + 0.5).to_array().map(|c| c as u8)
}

/// Bit widths and byte sizes a cluster is going to be encoded with.
#[derive(Clone, Debug, Default)]
pub struct EncodingInfo {
	pub bits_per_index: u32,
	pub bits_per_attribute: u32,
	/// 4 bits each for U and V of every channel
	pub uv_prec: u32,
	pub color_mode: u32,
	pub color_min: [u8; 4],
	pub color_bits: [u32; 4],
	pub gpu_sizes: PageSections,
	pub uv_infos: Vec<UvInfo>,
}

impl EncodingInfo {
	pub fn new(cluster: &Cluster) -> Self {
		let num_verts = cluster.num_verts;
		let num_tris = cluster.num_tris;
		let format = cluster.format;
		assert!(num_verts > 0);

		// base index plus two 5 bit offsets
		let bits_per_index = if num_verts > 1 { floor_log2(num_verts - 1) + 1 } else { 0 };
		let bits_per_triangle = bits_per_index + 2 * 5;
		let mut gpu_sizes = PageSections {
			cluster: size_of::<PackedCluster>() as u32,
			material_table: material_table_size(cluster) * 4,
			decode_info: format.num_tex_coords * size_of::<UvRange>() as u32,
			index: (num_tris * bits_per_triangle).div_ceil(32) * 4,
			..PageSections::default()
		};
		let mut bits_per_attribute = 2 * NORMAL_QUANTIZATION_BITS;

		let mut color_mode = VERTEX_COLOR_MODE_WHITE;
		let mut color_min = [255; 4];
		let mut color_bits = [0; 4];
		if format.has_colors {
			let mut color_max = [0; 4];
			for vert in 0..num_verts {
				let color = color_to_bytes(cluster.color(vert));
				for c in 0..4 {
					color_min[c] = color_min[c].min(color[c]);
					color_max[c] = color_max[c].max(color[c]);
				}
			}
			for c in 0..4 {
				color_bits[c] = ceil_log2((color_max[c] - color_min[c]) as u32 + 1);
			}
			let num_color_bits: u32 = color_bits.iter().sum();
			bits_per_attribute += num_color_bits;
			color_mode = if num_color_bits > 0 {
				VERTEX_COLOR_MODE_VARIABLE
			} else if color_min == [255; 4] {
				VERTEX_COLOR_MODE_WHITE
			} else {
				VERTEX_COLOR_MODE_CONSTANT
			};
		}

		let mut uv_prec = 0;
		let uv_infos: Vec<UvInfo> = (0..format.num_tex_coords)
			.map(|uv_index| {
				let (us, vs) = (0..num_verts)
					.map(|vert| {
						let uv = cluster.uv(vert, uv_index);
						(uv.x, uv.y)
					})
					.unzip();
				let info = UvInfo::new(us, vs);
				uv_prec |= (info.bits_v << 4 | info.bits_u) << (uv_index * 8);
				bits_per_attribute += info.bits_u + info.bits_v;
				info
			})
			.collect();

		let position_bits_per_vertex = cluster.quantized_pos_bits.element_sum();
		gpu_sizes.position = (num_verts * position_bits_per_vertex).div_ceil(32) * 4;
		gpu_sizes.attribute = (num_verts * bits_per_attribute).div_ceil(32) * 4;

		Self {
			bits_per_index,
			bits_per_attribute,
			uv_prec,
			color_mode,
			color_min,
			color_bits,
			gpu_sizes,
			uv_infos,
		}
	}
}

#[profiling::function]
pub fn calculate_encoding_infos(clusters: &[Cluster]) -> Vec<EncodingInfo> {
	clusters.par_iter().map(EncodingInfo::new).collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::cluster::VertexFormat;
	use crate::cluster::tests::grid_cluster;
	use crate::encode::material::build_material_ranges;

	fn set_color(cluster: &mut Cluster, vert: u32, color: Vec4) {
		let start = vert as usize * cluster.format.vert_size() + 6;
		cluster.verts[start..start + 4].copy_from_slice(&color.to_array());
	}

	fn set_uv(cluster: &mut Cluster, vert: u32, uv: Vec2) {
		let start = vert as usize * cluster.format.vert_size() + cluster.format.vert_size() - 2;
		cluster.verts[start..start + 2].copy_from_slice(&uv.to_array());
	}

	#[test]
	fn page_sections_align_material_table() {
		let sections = PageSections {
			cluster: 256,
			material_table: 20,
			decode_info: 32,
			index: 8,
			position: 12,
			attribute: 4,
		};
		let offsets = sections.offsets();
		assert_eq!(offsets.material_table, 256);
		assert_eq!(offsets.decode_info, 256 + 32);
		assert_eq!(offsets.index, 256 + 32 + 32);
		assert_eq!(offsets.position, 256 + 32 + 32 + 8);
		assert_eq!(offsets.attribute, 256 + 32 + 32 + 8 + 12);
		assert_eq!(sections.total(), 256 + 32 + 32 + 8 + 12 + 4);
	}

	#[test]
	fn sizes_without_attributes() {
		let mut cluster = grid_cluster(5, false, VertexFormat::default());
		build_material_ranges(&mut cluster);
		cluster.quantized_pos_bits = glam::UVec3::new(3, 3, 0);
		let info = EncodingInfo::new(&cluster);
		// 25 vertices need 5 bits
		assert_eq!(info.bits_per_index, 5);
		assert_eq!(info.bits_per_attribute, 18);
		assert_eq!(info.color_mode, VERTEX_COLOR_MODE_WHITE);
		assert_eq!(info.gpu_sizes.cluster, 128);
		assert_eq!(info.gpu_sizes.material_table, 0);
		assert_eq!(info.gpu_sizes.decode_info, 0);
		assert_eq!(info.gpu_sizes.index, (32 * 15u32).div_ceil(32) * 4);
		assert_eq!(info.gpu_sizes.position, (25 * 6u32).div_ceil(32) * 4);
		assert_eq!(info.gpu_sizes.attribute, (25 * 18u32).div_ceil(32) * 4);
	}

	#[test]
	fn color_modes() {
		let format = VertexFormat {
			num_tex_coords: 0,
			has_colors: true,
		};
		let mut cluster = grid_cluster(3, false, format);
		assert_eq!(EncodingInfo::new(&cluster).color_mode, VERTEX_COLOR_MODE_WHITE);

		for vert in 0..cluster.num_verts {
			set_color(&mut cluster, vert, Vec4::new(1., 0., 0., 1.));
		}
		let info = EncodingInfo::new(&cluster);
		assert_eq!(info.color_mode, VERTEX_COLOR_MODE_CONSTANT);
		assert_eq!(info.color_min, [255, 0, 0, 255]);
		assert_eq!(info.bits_per_attribute, 18);

		set_color(&mut cluster, 4, Vec4::new(1., 3. / 255., 0., 1.));
		let info = EncodingInfo::new(&cluster);
		assert_eq!(info.color_mode, VERTEX_COLOR_MODE_VARIABLE);
		assert_eq!(info.color_bits, [0, 2, 0, 0]);
		assert_eq!(info.bits_per_attribute, 20);
	}

	#[test]
	fn uv_seam_gap_is_skipped() {
		let format = VertexFormat {
			num_tex_coords: 1,
			has_colors: false,
		};
		let mut cluster = grid_cluster(5, false, format);
		let mut uvs = Vec::new();
		for vert in 0..cluster.num_verts {
			let (x, y) = ((vert % 5) as f32, (vert / 5) as f32);
			// two islands at both ends of the atlas
			let u = if x < 2. { x * 1e-3 } else { 0.9 + x * 1e-3 };
			let uv = Vec2::new(u, y * 0.25);
			set_uv(&mut cluster, vert, uv);
			uvs.push(uv);
		}

		let info = EncodingInfo::new(&cluster);
		let uv_info = &info.uv_infos[0];
		// 0.003 of used range at 2^14 steps per unit
		assert_eq!(uv_info.bits_u, 6);
		assert!(uv_info.range.gap_length[0] > 0);
		assert_eq!(uv_info.bits_v, MAX_TEX_COORD_BITS);
		assert_eq!(info.uv_prec, uv_info.bits_v << 4 | uv_info.bits_u);
		assert_eq!(info.bits_per_attribute, 18 + uv_info.bits_u + uv_info.bits_v);

		for uv in uvs {
			let decoded = uv_info.dequantize(uv_info.quantize(uv));
			assert!((decoded - uv).abs().max_element() < 2e-4, "{uv} decoded as {decoded}");
		}
	}
}
