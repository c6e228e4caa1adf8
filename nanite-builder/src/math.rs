use glam::Vec3;

#[inline]
pub fn murmur_finalize32(mut hash: u32) -> u32 {
	hash ^= hash >> 16;
	hash = hash.wrapping_mul(0x85eb_ca6b);
	hash ^= hash >> 13;
	hash = hash.wrapping_mul(0xc2b2_ae35);
	hash ^= hash >> 16;
	hash
}

pub fn murmur32(values: &[u32]) -> u32 {
	let mut hash = 0u32;
	for &value in values {
		let element = value.wrapping_mul(0xcc9e_2d51).rotate_left(15).wrapping_mul(0x1b87_3593);
		hash ^= element;
		hash = hash.rotate_left(13).wrapping_mul(5).wrapping_add(0xe654_6b64);
	}
	murmur_finalize32(hash)
}

/// Positions comparing equal hash equal, so `-0.0` is folded into `0.0`.
#[inline]
pub fn position_bits(position: Vec3) -> [u32; 3] {
	position.to_array().map(|f| if f == 0. { 0 } else { f.to_bits() })
}

#[inline]
pub fn hash_position(position: Vec3) -> u32 {
	murmur32(&position_bits(position))
}

/// Hash of the directed edge `p0 -> p1`.
#[inline]
pub fn hash_edge(p0: Vec3, p1: Vec3) -> u32 {
	murmur32(&[hash_position(p0), hash_position(p1)])
}

/// Next corner of the same triangle: 0 -> 1 -> 2 -> 0
#[inline]
pub fn cycle3(value: u32) -> u32 {
	let value_mod3 = value % 3;
	let value1_mod3 = (1 << value_mod3) & 3;
	value - value_mod3 + value1_mod3
}

#[inline]
pub fn cycle3_offset(value: u32, offset: u32) -> u32 {
	value - value % 3 + (value + offset) % 3
}

/// Spreads the lowest 10 bits so that two zero bits follow each.
#[inline]
pub fn morton_code3(x: u32) -> u32 {
	let mut x = x & 0x3ff;
	x = (x | (x << 16)) & 0x0300_00ff;
	x = (x | (x << 8)) & 0x0300_f00f;
	x = (x | (x << 4)) & 0x030c_30c3;
	x = (x | (x << 2)) & 0x0924_9249;
	x
}

/// Morton code of a point normalized into `[0, 1]^3`, 10 bits per axis.
pub fn morton_code_normalized(p: Vec3) -> u32 {
	let q = (p.clamp(Vec3::ZERO, Vec3::ONE) * 1023.).as_uvec3();
	morton_code3(q.x) | (morton_code3(q.y) << 1) | (morton_code3(q.z) << 2)
}

/// 0 for 0
#[inline]
pub fn floor_log2(x: u32) -> u32 {
	if x == 0 { 0 } else { x.ilog2() }
}

#[inline]
pub fn ceil_log2(x: u32) -> u32 {
	if x <= 1 { 0 } else { (x - 1).ilog2() + 1 }
}

/// Scales `x` by `2^exp` without touching the mantissa, exact as long as the result stays a normal float.
#[inline]
pub fn exp2_scale(x: f32, exp: i32) -> f32 {
	x * f32::powi(2., exp)
}

/// Binary exponent of a finite, non zero float.
#[inline]
pub fn float_exponent(x: f32) -> i32 {
	((x.to_bits() >> 23) & 0xff) as i32 - 127
}

pub fn min3_index<T: PartialOrd>(a: T, b: T, c: T) -> usize {
	if a < b {
		if a < c { 0 } else { 2 }
	} else if b < c {
		1
	} else {
		2
	}
}

pub fn max3_index<T: PartialOrd>(a: T, b: T, c: T) -> usize {
	if a > b {
		if a > c { 0 } else { 2 }
	} else if b > c {
		1
	} else {
		2
	}
}
