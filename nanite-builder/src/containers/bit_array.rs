const BITS: usize = u32::BITS as usize;

/// Growable array of bits with word level access.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BitArray {
	words: Vec<u32>,
	len: usize,
}

impl BitArray {
	pub fn new(value: bool, len: usize) -> Self {
		let mut out = Self::default();
		out.resize(len, value);
		out
	}

	pub fn len(&self) -> usize {
		self.len
	}

	pub fn is_empty(&self) -> bool {
		self.len == 0
	}

	pub fn resize(&mut self, len: usize, value: bool) {
		if len > self.len {
			// bits past `len` in the last word are kept zero
			let fill = if value { u32::MAX } else { 0 };
			if value {
				for i in self.len..len.min(self.words.len() * BITS) {
					self.words[i / BITS] |= 1 << (i % BITS);
				}
			}
			self.words.resize(len.div_ceil(BITS), fill);
		} else {
			self.words.truncate(len.div_ceil(BITS));
		}
		self.len = len;
		self.clear_tail();
	}

	fn clear_tail(&mut self) {
		if self.len % BITS != 0 {
			if let Some(last) = self.words.last_mut() {
				*last &= (1 << (self.len % BITS)) - 1;
			}
		}
	}

	pub fn push(&mut self, value: bool) {
		let index = self.len;
		self.resize(index + 1, false);
		self.set(index, value);
	}

	#[inline]
	pub fn get(&self, index: usize) -> bool {
		assert!(index < self.len, "bit {index} out of bounds of {}", self.len);
		self.words[index / BITS] & (1 << (index % BITS)) != 0
	}

	#[inline]
	pub fn set(&mut self, index: usize, value: bool) {
		assert!(index < self.len, "bit {index} out of bounds of {}", self.len);
		let word = &mut self.words[index / BITS];
		if value {
			*word |= 1 << (index % BITS);
		} else {
			*word &= !(1 << (index % BITS));
		}
	}

	pub fn words(&self) -> &[u32] {
		&self.words
	}

	pub fn count_ones(&self) -> usize {
		self.words.iter().map(|w| w.count_ones() as usize).sum()
	}

	pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
		(0..self.len).map(|i| self.get(i))
	}
}

impl FromIterator<bool> for BitArray {
	fn from_iter<T: IntoIterator<Item = bool>>(iter: T) -> Self {
		let mut out = Self::default();
		for b in iter {
			out.push(b);
		}
		out
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn get_set_resize() {
		let mut bits = BitArray::new(false, 40);
		bits.set(3, true);
		bits.set(39, true);
		assert!(bits.get(3) && bits.get(39) && !bits.get(4));
		assert_eq!(bits.words().len(), 2);

		bits.resize(70, true);
		assert!(bits.get(40) && bits.get(69));
		assert!(!bits.get(38));
		assert_eq!(bits.count_ones(), 2 + 30);

		bits.resize(4, false);
		assert_eq!(bits.count_ones(), 1);
		bits.resize(64, false);
		assert!(!bits.get(39));
	}

	#[test]
	fn collect() {
		let bits: BitArray = [true, false, true].into_iter().collect();
		assert_eq!(bits.len(), 3);
		assert_eq!(bits.words(), &[0b101]);
	}
}
