//! Mathematical utilities and data structures

pub mod aabb;
pub mod ray;
pub mod morton;
pub mod region;

pub use aabb::Aabb;
pub use ray::Ray;
pub use morton::MortonCodec;
pub use region::Region;
