const NOT_PRESENT: u32 = u32::MAX;

/// Indexed binary min-heap. Elements are external indices with a key, each index may be present at most once and
/// can be updated or removed in O(log n). Equal keys are ordered by index so the pop order is deterministic.
#[derive(Clone, Debug, Default)]
pub struct BinaryHeap<K> {
	heap: Vec<u32>,
	keys: Vec<K>,
	heap_indices: Vec<u32>,
}

impl<K: Copy + PartialOrd + Default> BinaryHeap<K> {
	pub fn new() -> Self {
		Self {
			heap: Vec::new(),
			keys: Vec::new(),
			heap_indices: Vec::new(),
		}
	}

	pub fn with_capacity(index_size: usize) -> Self {
		let mut heap = Self::new();
		heap.resize(index_size);
		heap.heap.reserve(index_size);
		heap
	}

	pub fn resize(&mut self, index_size: usize) {
		self.keys.resize(index_size, K::default());
		self.heap_indices.resize(index_size, NOT_PRESENT);
	}

	pub fn clear(&mut self) {
		for &index in &self.heap {
			self.heap_indices[index as usize] = NOT_PRESENT;
		}
		self.heap.clear();
	}

	pub fn len(&self) -> usize {
		self.heap.len()
	}

	pub fn is_empty(&self) -> bool {
		self.heap.is_empty()
	}

	pub fn is_present(&self, index: u32) -> bool {
		(index as usize) < self.heap_indices.len() && self.heap_indices[index as usize] != NOT_PRESENT
	}

	pub fn key(&self, index: u32) -> K {
		self.keys[index as usize]
	}

	/// index with the smallest key
	pub fn top(&self) -> Option<u32> {
		self.heap.first().copied()
	}

	pub fn pop(&mut self) -> Option<u32> {
		let top = self.top()?;
		self.remove(top);
		Some(top)
	}

	pub fn add(&mut self, key: K, index: u32) {
		if index as usize >= self.keys.len() {
			self.resize((index as usize + 1).next_power_of_two());
		}
		assert!(!self.is_present(index), "index {index} already in heap");

		let heap_index = self.heap.len();
		self.heap.push(index);
		self.keys[index as usize] = key;
		self.heap_indices[index as usize] = heap_index as u32;
		self.up_heap(heap_index);
	}

	pub fn update(&mut self, key: K, index: u32) {
		assert!(self.is_present(index));
		self.keys[index as usize] = key;
		let heap_index = self.heap_indices[index as usize] as usize;
		if heap_index > 0 && self.less(heap_index, (heap_index - 1) >> 1) {
			self.up_heap(heap_index);
		} else {
			self.down_heap(heap_index);
		}
	}

	pub fn remove(&mut self, index: u32) {
		if !self.is_present(index) {
			return;
		}

		let heap_index = self.heap_indices[index as usize] as usize;
		let last = self.heap.len() - 1;
		self.heap.swap(heap_index, last);
		self.heap_indices[self.heap[heap_index] as usize] = heap_index as u32;
		self.heap.pop();
		self.heap_indices[index as usize] = NOT_PRESENT;

		if heap_index < self.heap.len() {
			if heap_index > 0 && self.less(heap_index, (heap_index - 1) >> 1) {
				self.up_heap(heap_index);
			} else {
				self.down_heap(heap_index);
			}
		}
	}

	#[inline]
	fn less(&self, a: usize, b: usize) -> bool {
		let ia = self.heap[a];
		let ib = self.heap[b];
		let ka = self.keys[ia as usize];
		let kb = self.keys[ib as usize];
		ka < kb || (!(kb < ka) && ia < ib)
	}

	fn swap(&mut self, a: usize, b: usize) {
		self.heap.swap(a, b);
		self.heap_indices[self.heap[a] as usize] = a as u32;
		self.heap_indices[self.heap[b] as usize] = b as u32;
	}

	fn up_heap(&mut self, mut heap_index: usize) {
		while heap_index > 0 {
			let parent = (heap_index - 1) >> 1;
			if !self.less(heap_index, parent) {
				break;
			}
			self.swap(heap_index, parent);
			heap_index = parent;
		}
	}

	fn down_heap(&mut self, mut heap_index: usize) {
		loop {
			let left = heap_index * 2 + 1;
			if left >= self.heap.len() {
				break;
			}
			let right = left + 1;
			let min_child = if right < self.heap.len() && self.less(right, left) {
				right
			} else {
				left
			};
			if !self.less(min_child, heap_index) {
				break;
			}
			self.swap(heap_index, min_child);
			heap_index = min_child;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn pops_in_key_order() {
		let mut heap = BinaryHeap::new();
		for (i, key) in [5., 1., 4., 2., 3.].into_iter().enumerate() {
			heap.add(key, i as u32);
		}
		let order: Vec<_> = std::iter::from_fn(|| heap.pop()).collect();
		assert_eq!(order, [1, 3, 4, 2, 0]);
	}

	#[test]
	fn ties_pop_by_index() {
		let mut heap = BinaryHeap::new();
		for i in [3, 0, 2, 1] {
			heap.add(1.0f32, i);
		}
		let order: Vec<_> = std::iter::from_fn(|| heap.pop()).collect();
		assert_eq!(order, [0, 1, 2, 3]);
	}

	#[test]
	fn update_and_remove() {
		let mut heap = BinaryHeap::with_capacity(8);
		for i in 0..8u32 {
			heap.add(i as f32, i);
		}
		heap.update(-1., 6);
		heap.remove(0);
		heap.update(100., 1);
		assert!(!heap.is_present(0));
		assert_eq!(heap.len(), 7);
		assert_eq!(heap.pop(), Some(6));
		assert_eq!(heap.pop(), Some(2));
		let rest: Vec<_> = std::iter::from_fn(|| heap.pop()).collect();
		assert_eq!(rest, [3, 4, 5, 7, 1]);
	}
}
