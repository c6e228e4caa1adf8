use std::sync::atomic::{AtomicU32, Ordering};

pub const INVALID_INDEX: u32 = u32::MAX;

/// Multi-map from a 32 bit hash to indices of some external array. Each bucket is an intrusive linked list through
/// `next_index`, so an index can only be present once.
///
/// Lookups return every index sharing a bucket, callers have to compare the actual element.
/// ```ignore
/// let mut i = table.first(key);
/// while table.is_valid(i) {
/// 	if array[i as usize].id == id { ... }
/// 	i = table.next(i);
/// }
/// ```
/// Removing `i` does not touch `next(i)`, so it is safe while walking a bucket.
#[derive(Debug)]
pub struct HashTable {
	hash_mask: u32,
	hash: Box<[AtomicU32]>,
	next_index: Vec<AtomicU32>,
}

fn invalid_vec(len: usize) -> impl Iterator<Item = AtomicU32> {
	(0..len).map(|_| AtomicU32::new(INVALID_INDEX))
}

impl HashTable {
	/// `hash_size` must be a power of two
	pub fn new(hash_size: u32, index_size: u32) -> Self {
		assert!(hash_size.is_power_of_two(), "hash size {hash_size} is not a power of two");
		Self {
			hash_mask: hash_size - 1,
			hash: invalid_vec(hash_size as usize).collect(),
			next_index: invalid_vec(index_size as usize).collect(),
		}
	}

	/// Hash size of `1 << min(16, floor_log2(num))`, the usual sizing for `num` expected elements.
	pub fn with_expected(num: u32) -> Self {
		let bits = num.max(1).ilog2().min(16);
		Self::new(1 << bits, num)
	}

	pub fn clear(&mut self) {
		for h in self.hash.iter_mut() {
			*h.get_mut() = INVALID_INDEX;
		}
	}

	pub fn resize(&mut self, index_size: u32) {
		let index_size = index_size as usize;
		if index_size > self.next_index.len() {
			self.next_index.extend(invalid_vec(index_size - self.next_index.len()));
		} else {
			self.next_index.truncate(index_size);
		}
	}

	#[inline]
	pub fn first(&self, key: u32) -> u32 {
		self.hash[(key & self.hash_mask) as usize].load(Ordering::Relaxed)
	}

	#[inline]
	pub fn next(&self, index: u32) -> u32 {
		let next = self.next_index[index as usize].load(Ordering::Relaxed);
		debug_assert_ne!(next, index, "hash table cycle");
		next
	}

	#[inline]
	pub fn is_valid(&self, index: u32) -> bool {
		index != INVALID_INDEX
	}

	pub fn iter(&self, key: u32) -> Iter<'_> {
		Iter {
			table: self,
			index: self.first(key),
		}
	}

	pub fn add(&mut self, key: u32, index: u32) {
		if index as usize >= self.next_index.len() {
			let new_len = (index as usize + 1).next_power_of_two().max(32);
			self.resize(new_len as u32);
		}
		let head = self.hash[(key & self.hash_mask) as usize].get_mut();
		*self.next_index[index as usize].get_mut() = *head;
		*head = index;
	}

	/// Insert from multiple threads. The table must already be sized to hold `index`, and nobody may read it
	/// until all inserts finished.
	pub fn add_concurrent(&self, key: u32, index: u32) {
		let prev = self.hash[(key & self.hash_mask) as usize].swap(index, Ordering::Relaxed);
		self.next_index[index as usize].store(prev, Ordering::Relaxed);
	}

	pub fn remove(&mut self, key: u32, index: u32) {
		if index as usize >= self.next_index.len() {
			return;
		}

		let bucket = (key & self.hash_mask) as usize;
		let next = *self.next_index[index as usize].get_mut();
		if *self.hash[bucket].get_mut() == index {
			*self.hash[bucket].get_mut() = next;
			return;
		}

		let mut i = *self.hash[bucket].get_mut();
		while self.is_valid(i) {
			let link = self.next_index[i as usize].get_mut();
			if *link == index {
				*link = next;
				return;
			}
			i = *link;
		}
	}
}

impl Default for HashTable {
	fn default() -> Self {
		Self::new(1024, 0)
	}
}

pub struct Iter<'a> {
	table: &'a HashTable,
	index: u32,
}

impl Iterator for Iter<'_> {
	type Item = u32;

	fn next(&mut self) -> Option<Self::Item> {
		if self.table.is_valid(self.index) {
			let index = self.index;
			self.index = self.table.next(index);
			Some(index)
		} else {
			None
		}
	}
}
