pub mod geometry;
pub mod io;
pub mod lcd;
pub mod msgs;
pub mod system;
pub mod transport;
pub mod visualizer;
pub mod viz;
