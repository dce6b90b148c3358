//! File IO: optimized trajectory export/import.

pub mod trajectory;

pub use trajectory::{read_trajectory_csv, write_trajectory_csv};
