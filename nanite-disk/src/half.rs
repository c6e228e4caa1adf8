//! IEEE 754 binary16 conversion, round to nearest even. Only what the packed structs need.

pub fn f32_to_f16(value: f32) -> u16 {
	let x = value.to_bits();
	let sign = ((x >> 16) & 0x8000) as u16;
	let exp = ((x >> 23) & 0xff) as i32;
	let man = x & 0x7f_ffff;

	// inf or nan, keep nan quiet
	if exp == 0xff {
		let nan_bit = if man != 0 { 0x200 } else { 0 };
		return sign | 0x7c00 | nan_bit;
	}

	let half_exp = exp - 127 + 15;
	if half_exp >= 0x1f {
		return sign | 0x7c00;
	}

	if half_exp <= 0 {
		// subnormal or zero
		if 14 - half_exp > 24 {
			return sign;
		}
		let man = man | 0x80_0000;
		let shift = (14 - half_exp) as u32;
		let mut half_man = man >> shift;
		let round_bit = 1 << (shift - 1);
		if (man & round_bit) != 0 && (man & (3 * round_bit - 1)) != 0 {
			half_man += 1;
		}
		return sign | half_man as u16;
	}

	let mut half = ((half_exp as u32) << 10) | (man >> 13);
	let round_bit = 0x1000;
	if (man & round_bit) != 0 && (man & (3 * round_bit - 1)) != 0 {
		// may carry into the exponent, which rounds up to the next binade or inf as it should
		half += 1;
	}
	sign | half as u16
}

pub fn f16_to_f32(half: u16) -> f32 {
	let sign = ((half & 0x8000) as u32) << 16;
	let exp = ((half >> 10) & 0x1f) as u32;
	let man = (half & 0x3ff) as u32;
	match exp {
		0 => {
			let value = man as f32 * (1. / (1 << 24) as f32);
			if sign != 0 { -value } else { value }
		}
		0x1f => f32::from_bits(sign | 0x7f80_0000 | (man << 13)),
		_ => f32::from_bits(sign | ((exp + 127 - 15) << 23) | (man << 13)),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn exact_values() {
		assert_eq!(f32_to_f16(0.), 0);
		assert_eq!(f32_to_f16(-0.), 0x8000);
		assert_eq!(f32_to_f16(1.), 0x3c00);
		assert_eq!(f32_to_f16(-2.), 0xc000);
		assert_eq!(f32_to_f16(65504.), 0x7bff);
		assert_eq!(f32_to_f16(1e10), 0x7c00);
		assert_eq!(f32_to_f16(f32::INFINITY), 0x7c00);
		assert!(f16_to_f32(f32_to_f16(f32::NAN)).is_nan());
	}

	#[test]
	fn round_trip_is_close() {
		for v in [0.1f32, 0.5, 3.14159, 100.25, -7.75, 1e-5, 6e-8] {
			let back = f16_to_f32(f32_to_f16(v));
			assert!((back - v).abs() <= v.abs() * 1e-3 + 6e-8, "{v} became {back}");
		}
	}
}
