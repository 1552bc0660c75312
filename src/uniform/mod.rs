//! Uniform and storage buffer marshaling
//!
//! Converts host vectors and matrices (single or double precision) into the
//! std140-style layout shaders expect and writes them element by element.

pub mod buffer;
pub mod layout;
pub mod marshaler;

// Re-export main types
pub use buffer::UniformBuffer;
pub use layout::{ElementKind, UniformElement, UniformLayout};
pub use marshaler::{marshal, size_buffer_for, UniformMarshaler};
