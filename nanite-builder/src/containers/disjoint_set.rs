/// Union-find over `0..len`. The root of a set is always its largest member.
#[derive(Clone, Debug, Default)]
pub struct DisjointSet {
	parents: Vec<u32>,
}

impl DisjointSet {
	pub fn new(len: u32) -> Self {
		Self {
			parents: (0..len).collect(),
		}
	}

	pub fn len(&self) -> usize {
		self.parents.len()
	}

	pub fn is_empty(&self) -> bool {
		self.parents.is_empty()
	}

	pub fn reset(&mut self) {
		self.parents.clear();
	}

	pub fn add_defaulted(&mut self, num: u32) {
		let start = self.parents.len() as u32;
		self.parents.extend(start..start + num);
	}

	/// direct parent, only a root once [`Self::find`] compressed the path
	pub fn parent(&self, i: u32) -> u32 {
		self.parents[i as usize]
	}

	/// Union with splicing.
	pub fn union(&mut self, mut x: u32, mut y: u32) {
		let mut px = self.parents[x as usize];
		let mut py = self.parents[y as usize];
		while px != py {
			if px < py {
				self.parents[x as usize] = py;
				if x == px {
					return;
				}
				x = px;
				px = self.parents[x as usize];
			} else {
				self.parents[y as usize] = px;
				if y == py {
					return;
				}
				y = py;
				py = self.parents[y as usize];
			}
		}
	}

	/// Faster [`Self::union`] for iterating `x` upwards and joining it with lower indices. Neither `x` nor `y` may
	/// have been joined with anything above `x` yet.
	pub fn union_sequential(&mut self, x: u32, mut y: u32) {
		assert!(x >= y);
		assert_eq!(x, self.parents[x as usize]);

		let px = x;
		let mut py = self.parents[y as usize];
		while px != py {
			self.parents[y as usize] = px;
			if y == py {
				return;
			}
			y = py;
			py = self.parents[y as usize];
		}
	}

	/// Find with path compression.
	pub fn find(&mut self, mut i: u32) -> u32 {
		let start = i;
		let mut root = self.parents[i as usize];
		while root != i {
			i = root;
			root = self.parents[i as usize];
		}

		i = start;
		let mut parent = self.parents[i as usize];
		while parent != root {
			self.parents[i as usize] = root;
			i = parent;
			parent = self.parents[i as usize];
		}
		root
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn union_and_find() {
		let mut set = DisjointSet::new(6);
		set.union(0, 1);
		set.union(2, 3);
		set.union(1, 3);
		assert_eq!(set.find(0), set.find(2));
		assert_eq!(set.find(0), 3);
		assert_ne!(set.find(4), set.find(5));
		assert_eq!(set.find(5), 5);
	}

	#[test]
	fn sequential() {
		let mut set = DisjointSet::new(5);
		set.union_sequential(1, 0);
		set.union_sequential(3, 2);
		set.union_sequential(4, 1);
		assert_eq!(set.find(0), 4);
		assert_eq!(set.find(1), 4);
		assert_eq!(set.find(2), 3);

		set.add_defaulted(2);
		assert_eq!(set.len(), 7);
		assert_eq!(set.find(6), 6);
	}
}
