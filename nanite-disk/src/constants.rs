//! Limits shared between the builder and anything decoding its pages. Changing any of these changes the page format.

pub const MAX_CLUSTER_TRIANGLES: u32 = 128;
pub const MAX_CLUSTER_VERTICES: u32 = 256;
pub const MAX_CLUSTER_INDICES: u32 = MAX_CLUSTER_TRIANGLES * 3;
pub const MAX_CLUSTER_MATERIALS: u32 = 64;
pub const MAX_NANITE_UVS: u32 = 4;

/// Pages below this index are always resident and never listed as a dependency.
pub const NUM_ROOT_PAGES: u32 = 1;

pub const CLUSTER_PAGE_GPU_SIZE_BITS: u32 = 17;
pub const CLUSTER_PAGE_GPU_SIZE: u32 = 1 << CLUSTER_PAGE_GPU_SIZE_BITS;
pub const MAX_CLUSTERS_PER_PAGE_BITS: u32 = 10;
pub const MAX_CLUSTERS_PER_PAGE: u32 = 1 << MAX_CLUSTERS_PER_PAGE_BITS;
pub const MAX_CLUSTERS_PER_PAGE_MASK: u32 = MAX_CLUSTERS_PER_PAGE - 1;

pub const MAX_CLUSTERS_PER_GROUP_BITS: u32 = 9;
pub const MAX_CLUSTERS_PER_GROUP_MASK: u32 = (1 << MAX_CLUSTERS_PER_GROUP_BITS) - 1;
pub const MAX_CLUSTERS_PER_GROUP: u32 = (1 << MAX_CLUSTERS_PER_GROUP_BITS) - 1;
/// What the DAG aims for. [`MAX_CLUSTERS_PER_GROUP`] leaves headroom for clusters split by constraining.
pub const MAX_CLUSTERS_PER_GROUP_TARGET: u32 = 128;

pub const MAX_HIERACHY_CHILDREN_BITS: u32 = 6;
pub const MAX_HIERACHY_CHILDREN: u32 = 1 << MAX_HIERACHY_CHILDREN_BITS;
pub const MAX_GROUP_PARTS_BITS: u32 = 3;
pub const MAX_GROUP_PARTS_MASK: u32 = (1 << MAX_GROUP_PARTS_BITS) - 1;
pub const MAX_GROUP_PARTS: u32 = 1 << MAX_GROUP_PARTS_BITS;

pub const MAX_RESOURCE_PAGES_BITS: u32 = 20;
pub const MAX_RESOURCE_PAGES: u32 = 1 << MAX_RESOURCE_PAGES_BITS;
pub const MAX_BVH_NODE_FANOUT_BITS: u32 = 3;
pub const MAX_BVH_NODE_FANOUT: usize = 1 << MAX_BVH_NODE_FANOUT_BITS;

/// 21 * 3 = 63 bits, so a whole position fits into a single u64 bit write
pub const MAX_POSITION_QUANTIZATION_BITS: u32 = 21;
pub const NORMAL_QUANTIZATION_BITS: u32 = 9;

pub const VERTEX_COLOR_MODE_WHITE: u32 = 0;
pub const VERTEX_COLOR_MODE_CONSTANT: u32 = 1;
pub const VERTEX_COLOR_MODE_VARIABLE: u32 = 2;

pub const CLUSTER_FLAG_LEAF: u32 = 0x1;

/// Size of the vertex window a strip may reference backwards into.
pub const CONSTRAINED_CLUSTER_CACHE_SIZE: u32 = 32;

pub const INVALID_PART_INDEX: u32 = u32::MAX;
pub const INVALID_NODE_INDEX: u32 = u32::MAX;
