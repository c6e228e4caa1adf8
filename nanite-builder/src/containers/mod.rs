//! Index based containers the pipeline is built on. They never own the elements they index.

pub mod binary_heap;
pub mod bit_array;
pub mod disjoint_set;
pub mod hash_table;

pub use binary_heap::BinaryHeap;
pub use bit_array::BitArray;
pub use disjoint_set::DisjointSet;
pub use hash_table::HashTable;
