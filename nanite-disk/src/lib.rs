pub mod constants;
pub mod half;
pub mod packed;
pub mod resources;
pub mod shape;
pub mod stats;
pub mod strip;
