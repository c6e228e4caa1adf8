pub mod builder;
pub mod cluster;
pub mod containers;
pub mod dag;
pub mod encode;
pub mod error;
pub mod math;
pub mod partition;
pub mod procedural;
pub mod quadric;
pub mod simplify;

#[cfg(test)]
mod tests;
