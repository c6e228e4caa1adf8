//! Decoding of the generalized triangle strips clusters are stored as.
//!
//! Every triangle has a bit in each of three masks per 32 triangle dword:
//! * `S`: triangle starts a new strip
//! * `L`: for starts the high bit of the number of referenced vertices, otherwise the triangle extends to the left
//! * `W`: for starts the low bit of the number of referenced vertices, otherwise the third vertex is a reference
//!
//! References are 5 bit backwards distances from the newest vertex and are read from a tightly packed bit stream.
//! The decoder is branch light and mirrors what a GPU would do, which is why it may read a little past the end of the
//! index data. Missing bytes read as zero.

use bytemuck_derive::{Pod, Zeroable};

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct StripDesc {
	/// `[dword][S, L, W]`
	pub bitmasks: [[u32; 3]; 4],
	/// 10 bit prefix sums of referenced vertices before dword 1, 2 and 3
	pub num_prev_ref_vertices_before_dwords: u32,
	/// 10 bit prefix sums of new vertices before dword 1, 2 and 3
	pub num_prev_new_vertices_before_dwords: u32,
}

#[inline]
fn bfe(data: u32, num_bits: u32, start: u32) -> u32 {
	(data >> start) & ((1u64 << num_bits) - 1) as u32
}

#[inline]
fn bit(data: u32, index: u32) -> bool {
	(data >> index) & 1 != 0
}

fn load_dword(data: &[u8], byte_offset: usize) -> u32 {
	let mut bytes = [0; 4];
	for (i, b) in bytes.iter_mut().enumerate() {
		*b = data.get(byte_offset + i).copied().unwrap_or(0);
	}
	u32::from_le_bytes(bytes)
}

/// Only the lowest 25 bits are guaranteed to be valid.
fn read_unaligned_dword(data: &[u8], bit_offset: i32) -> u32 {
	if bit_offset < 0 {
		assert!(bit_offset > -8);
		load_dword(data, 0) << (8 - (bit_offset & 7))
	} else {
		load_dword(data, (bit_offset >> 3) as usize) >> (bit_offset & 7)
	}
}

pub fn unpack_triangle_indices(desc: &StripDesc, index_data: &[u8], tri_index: u32) -> [u32; 3] {
	let dword_index = tri_index >> 5;
	let bit_index = tri_index & 31;

	let [s_mask, l_mask, w_mask] = desc.bitmasks[dword_index as usize];
	let sl_mask = s_mask & l_mask;
	// 1 if the head of the triangle is a reference: starts with 3 refs, or left/right with 1 ref
	let head_ref_vertex_mask = (sl_mask | !s_mask) & w_mask;

	let prev_bits_mask = (1u32 << bit_index) - 1;
	let (num_prev_ref_before_dword, num_prev_new_before_dword) = if dword_index > 0 {
		let start = dword_index * 10 - 10;
		(
			bfe(desc.num_prev_ref_vertices_before_dwords, 10, start),
			bfe(desc.num_prev_new_vertices_before_dwords, 10, start),
		)
	} else {
		(0, 0)
	};

	let count_refs = |mask: u32| ((sl_mask & mask).count_ones() << 1) + (w_mask & mask).count_ones();
	let count_new = |mask: u32, bit_index: u32, refs: u32| ((s_mask & mask).count_ones() << 1) + bit_index - refs;

	let current_refs = count_refs(prev_bits_mask);
	let current_new = count_new(prev_bits_mask, bit_index, current_refs);
	let num_prev_ref_vertices = (num_prev_ref_before_dword + current_refs) as i32;
	let num_prev_new_vertices = (num_prev_new_before_dword + current_new) as i32;

	let is_start = bit(s_mask, bit_index);
	let is_left = bit(l_mask, bit_index);
	let is_ref = bit(w_mask, bit_index);

	let base_vertex = (num_prev_new_vertices as u32).wrapping_sub(1);
	let read_ref = if is_start {
		num_prev_ref_vertices
	} else {
		num_prev_ref_vertices - 1
	};
	let mut index_data_bits = read_unaligned_dword(index_data, read_ref * 5);

	let mut out = [0; 3];
	if is_start {
		let num_ref_vertices = ((is_left as u32) << 1) + is_ref as u32;
		let mut next_vertex = num_prev_new_vertices as u32;
		for (k, out) in out.iter_mut().enumerate() {
			if (k as u32) < num_ref_vertices {
				*out = base_vertex.wrapping_sub(index_data_bits & 31);
				index_data_bits >>= 5;
			} else {
				*out = next_vertex;
				next_vertex += 1;
			}
		}
	} else {
		// the first two vertices are shared with the previous triangle
		let prev_bit_index = bit_index - 1;
		let is_prev_start = bit(s_mask, prev_bit_index);
		let is_prev_head_ref = bit(head_ref_vertex_mask, prev_bit_index);
		let num_prev_new_vertices_in_triangle = if is_prev_start {
			3 - ((bfe(l_mask, 1, prev_bit_index) << 1) | bfe(w_mask, 1, prev_bit_index))
		} else {
			0
		};

		out[1] = if is_prev_head_ref {
			base_vertex
				.wrapping_add(num_prev_new_vertices_in_triangle)
				.wrapping_sub(index_data_bits & 31)
		} else {
			base_vertex
		};
		out[2] = if is_ref {
			base_vertex.wrapping_sub(bfe(index_data_bits, 5, 5))
		} else {
			num_prev_new_vertices as u32
		};

		// Search for the third vertex: left triangles look for the previous right or start, right triangles for
		// the previous left or start.
		let search_mask = s_mask | if is_left { !l_mask } else { l_mask };
		let candidates = search_mask & prev_bits_mask;
		assert_ne!(candidates, 0, "strip triangle {tri_index} has no predecessor");
		let found_bit_index = 31 - candidates.leading_zeros();
		let is_found_case_s = bit(s_mask, found_bit_index);

		let found_prev_bits_mask = (1u32 << found_bit_index) - 1;
		let found_current_refs = count_refs(found_prev_bits_mask);
		let found_current_new = count_new(found_prev_bits_mask, found_bit_index, found_current_refs);
		let found_num_prev_new_vertices = (num_prev_new_before_dword + found_current_new) as i32;
		let found_num_prev_ref_vertices = (num_prev_ref_before_dword + found_current_refs) as i32;
		let found_num_ref_vertices = (bfe(l_mask, 1, found_bit_index) << 1) + bfe(w_mask, 1, found_bit_index);

		// where is the vertex relative to the triangle we found
		let read_offset = match (is_found_case_s, is_left) {
			(true, true) => -1,
			(true, false) => 0,
			(false, _) => 1,
		};
		let found_index_data = read_unaligned_dword(index_data, (found_num_prev_ref_vertices - read_offset) * 5);
		let found_index = (found_num_prev_new_vertices as u32)
			.wrapping_sub(1)
			.wrapping_sub(found_index_data & 31);

		let (condition, found_new_vertex) = if is_found_case_s {
			let min_refs = if is_left { 2 } else { 1 };
			let new_offset = (is_left && found_num_ref_vertices == 0) as i32;
			(
				found_num_ref_vertices >= min_refs,
				found_num_prev_new_vertices + new_offset,
			)
		} else {
			let is_before_found_ref_vertex = bit(head_ref_vertex_mask, found_bit_index - 1);
			(is_before_found_ref_vertex, found_num_prev_new_vertices - 1)
		};
		out[0] = if condition {
			found_index
		} else {
			found_new_vertex as u32
		};

		if is_left {
			out.swap(1, 2);
		}
		assert!(
			out[0] != out[1] && out[0] != out[2] && out[1] != out[2],
			"strip triangle {tri_index} decoded degenerate {out:?}"
		);
	}
	out
}
