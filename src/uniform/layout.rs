//! Uniform element kinds and their std140-style layouts
//!
//! Three-component vectors occupy a four-component slot (the fourth float is
//! zero padding); 4x4 matrices occupy 16 contiguous floats in column-major
//! order with no padding.

use cgmath::{Matrix4, Vector3};

use crate::error::MarshalError;

/// Host element kinds the marshaler knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    Scalar,
    Vector3,
    Matrix4,
}

/// Byte layout of one element inside a uniform/storage buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformLayout {
    /// Distance between consecutive elements
    pub element_stride: u64,
    /// Bytes of actual data per element
    pub element_size: u64,
    /// Zero bytes following the data up to the stride
    pub padding_per_element: u64,
}

impl UniformLayout {
    pub const VECTOR3: UniformLayout = UniformLayout {
        element_stride: 16,
        element_size: 12,
        padding_per_element: 4,
    };

    pub const MATRIX4: UniformLayout = UniformLayout {
        element_stride: 64,
        element_size: 64,
        padding_per_element: 0,
    };

    /// Number of data floats per element
    pub fn components(&self) -> usize {
        (self.element_size / 4) as usize
    }

    /// Number of floats per element including padding
    pub fn stride_floats(&self) -> usize {
        (self.element_stride / 4) as usize
    }
}

impl ElementKind {
    /// Layout used when writing this kind into a buffer
    pub fn layout(self) -> Result<UniformLayout, MarshalError> {
        match self {
            ElementKind::Vector3 => Ok(UniformLayout::VECTOR3),
            ElementKind::Matrix4 => Ok(UniformLayout::MATRIX4),
            ElementKind::Scalar => Err(MarshalError::UnsupportedElementKind(self)),
        }
    }

    pub fn stride_bytes(self) -> Result<u64, MarshalError> {
        Ok(self.layout()?.element_stride)
    }

    /// Bytes needed to hold `element_count` elements of this kind
    pub fn buffer_size(self, element_count: usize) -> Result<u64, MarshalError> {
        Ok((element_count as u64).saturating_mul(self.stride_bytes()?))
    }
}

/// Host value that can be marshaled into a uniform buffer
///
/// Implementations narrow to single precision with a plain `as` cast.
pub trait UniformElement {
    const KIND: ElementKind;

    /// Write the element's components into `out`, which holds exactly
    /// `KIND.layout().components()` floats (one float for scalars)
    fn write_components(&self, out: &mut [f32]);
}

macro_rules! impl_uniform_element {
    ($($scalar:ty),*) => {$(
        impl UniformElement for $scalar {
            const KIND: ElementKind = ElementKind::Scalar;

            fn write_components(&self, out: &mut [f32]) {
                out[0] = *self as f32;
            }
        }

        impl UniformElement for [$scalar; 3] {
            const KIND: ElementKind = ElementKind::Vector3;

            fn write_components(&self, out: &mut [f32]) {
                for (dst, src) in out.iter_mut().zip(self) {
                    *dst = *src as f32;
                }
            }
        }

        impl UniformElement for Vector3<$scalar> {
            const KIND: ElementKind = ElementKind::Vector3;

            fn write_components(&self, out: &mut [f32]) {
                out[0] = self.x as f32;
                out[1] = self.y as f32;
                out[2] = self.z as f32;
            }
        }

        /// Arrays of columns, as produced by `Matrix4::into()`
        impl UniformElement for [[$scalar; 4]; 4] {
            const KIND: ElementKind = ElementKind::Matrix4;

            fn write_components(&self, out: &mut [f32]) {
                for (i, column) in self.iter().enumerate() {
                    for (j, value) in column.iter().enumerate() {
                        out[i * 4 + j] = *value as f32;
                    }
                }
            }
        }

        impl UniformElement for Matrix4<$scalar> {
            const KIND: ElementKind = ElementKind::Matrix4;

            fn write_components(&self, out: &mut [f32]) {
                let columns = [self.x, self.y, self.z, self.w];
                for (i, column) in columns.iter().enumerate() {
                    out[i * 4] = column.x as f32;
                    out[i * 4 + 1] = column.y as f32;
                    out[i * 4 + 2] = column.z as f32;
                    out[i * 4 + 3] = column.w as f32;
                }
            }
        }
    )*};
}

impl_uniform_element!(f32, f64);
