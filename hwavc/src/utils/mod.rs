//! Utility functions and supporting infrastructure.
//!
//! Provides bitstream I/O with Exp-Golomb codes and the error types shared by
//! the decode pipeline.

pub mod bitstream_io;
pub mod errors;
