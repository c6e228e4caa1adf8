use crate::cluster::Cluster;
use crate::math::ceil_log2;
use glam::{IVec3, UVec3, Vec3};
use nanite_disk::constants::MAX_POSITION_QUANTIZATION_BITS;
use nanite_disk::shape::Bounds;
use rayon::prelude::*;

/// Automatic precision never goes below 1/16 units.
pub const AUTO_MIN_PRECISION: i32 = 4;
/// Precisions a build may request, `2^precision` stays a finite non zero scale.
pub const MIN_POSITION_PRECISION: i32 = -100;
pub const MAX_POSITION_PRECISION: i32 = 100;
/// Covers lowering from [`MAX_POSITION_PRECISION`] to the coarsest grid any finite position needs.
const MAX_PRECISION_STEPS: u32 = 256;

/// Guesses the precision from the geometric mean of the leaf cluster sizes, denser meshes get finer steps.
pub fn auto_position_precision(clusters: &[Cluster]) -> i32 {
	let (total_log_size, num) = clusters
		.iter()
		.filter(|cluster| cluster.mip_level == 0)
		.map(|cluster| cluster.bounds.extent().length())
		.filter(|&size| size > 0.)
		.fold((0f64, 0u32), |(total, num), size| (total + (size as f64).log2(), num + 1));
	let avg_log_size = if num > 0 { total_log_size / num as f64 } else { 0. };
	(7 - avg_log_size.round() as i32).clamp(AUTO_MIN_PRECISION, MAX_POSITION_PRECISION)
}

fn fits_quantization(bounds: &Bounds, scale: f32) -> bool {
	if !bounds.min.is_finite() || !bounds.max.is_finite() {
		return false;
	}
	let min = (bounds.min * scale).round();
	let max = (bounds.max * scale).round();
	let limit = i32::MAX as f32;
	if min.min_element() < -limit || max.max_element() > limit {
		return false;
	}
	let range = max.as_i64vec3() - min.as_i64vec3();
	range.max_element() <= (1 << MAX_POSITION_QUANTIZATION_BITS) - 1
}

/// Snaps all positions to a global grid of `2^-precision` and stores them relative to each cluster's minimum. The
/// precision is lowered until every cluster fits [`MAX_POSITION_QUANTIZATION_BITS`] per axis, the precision used is
/// returned.
#[profiling::function]
pub fn quantize_positions(clusters: &mut [Cluster], position_precision: i32) -> i32 {
	assert!(
		(MIN_POSITION_PRECISION..=MAX_POSITION_PRECISION).contains(&position_precision),
		"position precision {position_precision} out of range"
	);
	let mut position_precision = position_precision;
	let mut scale = (position_precision as f32).exp2();
	let mut steps = 0;
	for cluster in clusters.iter() {
		while !fits_quantization(&cluster.bounds, scale) {
			steps += 1;
			assert!(steps <= MAX_PRECISION_STEPS, "cluster bounds {:?} never fit", cluster.bounds);
			scale *= 0.5;
			position_precision -= 1;
		}
	}
	let rcp_scale = 1. / scale;

	clusters.par_iter_mut().for_each(|cluster| {
		let quantized: Vec<IVec3> = (0..cluster.num_verts)
			.map(|vert| (cluster.position(vert) * scale).round().as_ivec3())
			.collect();
		let int_min = quantized.iter().fold(IVec3::MAX, |acc, &p| acc.min(p));
		let int_max = quantized.iter().fold(IVec3::MIN, |acc, &p| acc.max(p));
		let bits = (int_max - int_min + 1).as_uvec3().to_array().map(ceil_log2);
		assert!(bits.iter().all(|&b| b <= MAX_POSITION_QUANTIZATION_BITS));

		for (vert, &p) in quantized.iter().enumerate() {
			cluster.set_position(vert as u32, p.as_vec3() * rcp_scale);
		}
		cluster.quantized_positions = quantized.iter().map(|&p| (p - int_min).as_uvec3()).collect();
		if !quantized.is_empty() {
			cluster.bounds = Bounds::new(int_min.as_vec3() * rcp_scale, int_max.as_vec3() * rcp_scale);
		}
		cluster.mesh_bounds_min = Vec3::ZERO;
		cluster.mesh_bounds_delta = Vec3::splat(rcp_scale);
		cluster.quantized_pos_bits = UVec3::from_array(bits);
		cluster.quantized_pos_start = int_min;
		cluster.quantized_pos_shift = 0;
	});
	position_precision
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::cluster::VertexFormat;
	use crate::cluster::tests::grid_cluster;

	fn scaled_grid(scale: f32, offset: Vec3) -> Cluster {
		let mut cluster = grid_cluster(5, false, VertexFormat::default());
		for vert in 0..cluster.num_verts {
			let p = cluster.position(vert) * scale + offset;
			cluster.set_position(vert, p);
		}
		cluster.bounds = Bounds::from_points((0..cluster.num_verts).map(|vert| cluster.position(vert)));
		cluster
	}

	#[test]
	fn auto_precision_follows_cluster_size() {
		// extent length is 1.5 * sqrt(8), log2 rounds to 2
		assert_eq!(auto_position_precision(&[scaled_grid(1.5, Vec3::ZERO)]), 5);
		assert_eq!(auto_position_precision(&[scaled_grid(1.5 / 64., Vec3::ZERO)]), 11);
		assert_eq!(auto_position_precision(&[scaled_grid(1000., Vec3::ZERO)]), AUTO_MIN_PRECISION);
		assert_eq!(auto_position_precision(&[]), 7);
	}

	#[test]
	fn error_within_half_a_step() {
		let original = scaled_grid(0.37, Vec3::new(-3.3, 1.01, 7.77));
		let mut clusters = vec![original.clone()];
		let precision = quantize_positions(&mut clusters, 6);
		assert_eq!(precision, 6);

		let cluster = &clusters[0];
		let step = 1. / 64.;
		for vert in 0..cluster.num_verts {
			let q = cluster.quantized_positions[vert as usize];
			for axis in 0..3 {
				assert!(q[axis] < 1 << cluster.quantized_pos_bits[axis]);
			}
			let dequantized = (q.as_ivec3() + cluster.quantized_pos_start).as_vec3() * cluster.mesh_bounds_delta;
			let error = (dequantized - original.position(vert)).abs().max_element();
			assert!(error <= 0.5 * step + 1e-5, "error {error}");
			assert_eq!(dequantized, cluster.position(vert));
		}
	}

	#[test]
	fn precision_lowered_for_huge_clusters() {
		let mut clusters = vec![scaled_grid(1., Vec3::ZERO), scaled_grid(1e5, Vec3::ZERO)];
		let precision = quantize_positions(&mut clusters, 10);
		// 4e5 needs 19 bits, leaving room for 2 fractional bits
		assert_eq!(precision, 2);
		for cluster in &clusters {
			assert_eq!(cluster.mesh_bounds_delta, Vec3::splat(0.25));
			assert!(cluster.quantized_pos_bits.max_element() <= MAX_POSITION_QUANTIZATION_BITS);
		}
		assert_eq!(clusters[1].quantized_pos_bits.x, 21);
		assert_eq!(clusters[1].quantized_pos_bits.z, 0);
	}

	#[test]
	fn finest_precision_is_lowered_to_fit() {
		let mut clusters = vec![scaled_grid(1., Vec3::ZERO)];
		let precision = quantize_positions(&mut clusters, MAX_POSITION_PRECISION);
		// the grid spans 4 units, 2^20 steps is the largest range fitting 21 bits
		assert_eq!(precision, 18);
		assert!(clusters[0].quantized_pos_bits.max_element() <= MAX_POSITION_QUANTIZATION_BITS);
	}

	#[test]
	#[should_panic(expected = "out of range")]
	fn infinite_scale_is_refused() {
		let mut clusters = vec![scaled_grid(1., Vec3::ZERO)];
		quantize_positions(&mut clusters, 128);
	}

	#[test]
	#[should_panic(expected = "never fit")]
	fn infinite_bounds_do_not_loop() {
		let mut cluster = scaled_grid(1., Vec3::ZERO);
		cluster.bounds.max.x = f32::INFINITY;
		quantize_positions(&mut [cluster], 0);
	}
}
