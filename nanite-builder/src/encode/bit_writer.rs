/// Appends little endian bit fields of up to 32 bits to a byte buffer.
pub struct BitWriter<'a> {
	buffer: &'a mut Vec<u8>,
	pending_bits: u64,
	num_pending_bits: u32,
}

impl<'a> BitWriter<'a> {
	pub fn new(buffer: &'a mut Vec<u8>) -> Self {
		Self {
			buffer,
			pending_bits: 0,
			num_pending_bits: 0,
		}
	}

	pub fn put_bits(&mut self, bits: u32, num_bits: u32) {
		assert!(num_bits <= 32);
		assert!((bits as u64) < (1u64 << num_bits), "{bits} does not fit into {num_bits} bits");
		self.pending_bits |= (bits as u64) << self.num_pending_bits;
		self.num_pending_bits += num_bits;

		while self.num_pending_bits >= 8 {
			self.buffer.push(self.pending_bits as u8);
			self.pending_bits >>= 8;
			self.num_pending_bits -= 8;
		}
	}

	/// Writes out any partial byte, then pads with zeros until the buffer length is a multiple of `alignment`.
	pub fn flush(&mut self, alignment: usize) {
		if self.num_pending_bits > 0 {
			self.buffer.push(self.pending_bits as u8);
		}
		while self.buffer.len() % alignment != 0 {
			self.buffer.push(0);
		}
		self.pending_bits = 0;
		self.num_pending_bits = 0;
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn packs_across_bytes() {
		let mut buffer = Vec::new();
		let mut writer = BitWriter::new(&mut buffer);
		writer.put_bits(0b101, 3);
		writer.put_bits(0b11111, 5);
		writer.put_bits(0x1FF, 9);
		writer.flush(4);
		assert_eq!(buffer, [0b1111_1101, 0xFF, 0b1, 0]);
	}

	#[test]
	fn flush_without_pending_bits_only_aligns() {
		let mut buffer = vec![1, 2];
		let mut writer = BitWriter::new(&mut buffer);
		writer.flush(1);
		writer.flush(4);
		assert_eq!(buffer, [1, 2, 0, 0]);
	}
}
