pub mod decode_unit;
pub mod geometry;
pub mod indicator;
pub mod nal;
pub mod sps;
