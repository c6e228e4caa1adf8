pub mod bounds;
pub mod sphere;

pub use bounds::Bounds;
pub use sphere::Sphere;
