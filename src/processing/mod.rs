//! Frame processing
//!
//! Pixel format conversion for preview and camera normalisation.

pub mod colorspace;

pub use colorspace::{i420_frame_size, i420_to_rgba, rgba_frame_size, ConvertError};
