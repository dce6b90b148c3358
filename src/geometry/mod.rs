//! Geometry utilities: SE3 rigid-body transforms.

pub mod se3;

pub use se3::SE3;
