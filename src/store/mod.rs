pub mod bitmap;
pub mod disk;
pub mod index;
