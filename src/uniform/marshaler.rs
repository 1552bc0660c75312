//! Host data to uniform buffer marshaling
//!
//! Every element is converted to single precision, padded to its stride and
//! written with its own bind / write-range / unbind sequence at
//! `index * stride`, so each element lands on its own aligned boundary.

use std::rc::Rc;

use crate::{
    backend::{BufferTarget, GraphicsBackend},
    error::MarshalError,
};

use super::{
    buffer::UniformBuffer,
    layout::{ElementKind, UniformElement},
};

/// Convert `elements` into padded single-precision floats
///
/// The result holds `elements.len() * stride / 4` floats; padding is zero.
pub fn marshal<T: UniformElement>(elements: &[T]) -> Result<Vec<f32>, MarshalError> {
    let layout = T::KIND.layout()?;
    let stride = layout.stride_floats();
    let components = layout.components();

    let mut floats = vec![0.0f32; elements.len() * stride];
    for (element, slot) in elements.iter().zip(floats.chunks_exact_mut(stride)) {
        element.write_components(&mut slot[..components]);
    }
    Ok(floats)
}

/// Bytes needed to hold `element_count` elements of `kind`
///
/// Used to allocate a buffer before the first write.
pub fn size_buffer_for(element_count: usize, kind: ElementKind) -> Result<u64, MarshalError> {
    kind.buffer_size(element_count)
}

/// Writes host vectors and matrices into uniform/storage buffers
pub struct UniformMarshaler<B: GraphicsBackend> {
    backend: Rc<B>,
}

impl<B: GraphicsBackend> UniformMarshaler<B> {
    pub fn new(backend: Rc<B>) -> Self {
        Self { backend }
    }

    /// Same as the free [`size_buffer_for`]
    pub fn size_buffer_for(element_count: usize, kind: ElementKind) -> Result<u64, MarshalError> {
        size_buffer_for(element_count, kind)
    }

    /// Create a buffer sized for `elements`, attach it to `binding_index`
    /// and fill it
    pub fn create_buffer_for<T: UniformElement>(
        &self,
        target: BufferTarget,
        binding_index: u32,
        elements: &[T],
    ) -> Result<UniformBuffer<B>, MarshalError> {
        let size = size_buffer_for(elements.len(), T::KIND)?;
        let mut buffer = UniformBuffer::new(&self.backend, target, binding_index, size);
        self.write_elements(&mut buffer, elements)?;
        Ok(buffer)
    }

    /// Write three-component vectors at offsets `0, 16, 32, ...`
    pub fn write_vectors<T: UniformElement>(
        &self,
        buffer: &mut UniformBuffer<B>,
        elements: &[T],
    ) -> Result<(), MarshalError> {
        expect_kind::<T>(ElementKind::Vector3)?;
        self.write_elements(buffer, elements)
    }

    /// Write 4x4 matrices at offsets `0, 64, 128, ...`
    pub fn write_matrices<T: UniformElement>(
        &self,
        buffer: &mut UniformBuffer<B>,
        elements: &[T],
    ) -> Result<(), MarshalError> {
        expect_kind::<T>(ElementKind::Matrix4)?;
        self.write_elements(buffer, elements)
    }

    /// Write every element, dispatching on the element kind
    pub fn write_elements<T: UniformElement>(
        &self,
        buffer: &mut UniformBuffer<B>,
        elements: &[T],
    ) -> Result<(), MarshalError> {
        self.write(buffer, elements, false).map(|_| ())
    }

    /// Write only the elements whose bytes differ from what this buffer
    /// was last given; returns the number of elements written
    pub fn update_elements<T: UniformElement>(
        &self,
        buffer: &mut UniformBuffer<B>,
        elements: &[T],
    ) -> Result<usize, MarshalError> {
        self.write(buffer, elements, true)
    }

    fn write<T: UniformElement>(
        &self,
        buffer: &mut UniformBuffer<B>,
        elements: &[T],
        skip_unchanged: bool,
    ) -> Result<usize, MarshalError> {
        let stride = T::KIND.stride_bytes()?;
        let required = size_buffer_for(elements.len(), T::KIND)?;
        if required > buffer.capacity_bytes() {
            return Err(MarshalError::BufferTooSmall {
                required,
                capacity: buffer.capacity_bytes(),
            });
        }

        let floats = marshal(elements)?;
        let bytes: &[u8] = bytemuck::cast_slice(floats.as_slice());
        let target = buffer.target();
        let mut written = 0;

        for (i, chunk) in bytes.chunks_exact(stride as usize).enumerate() {
            let offset = i as u64 * stride;
            if skip_unchanged && buffer.holds(offset, chunk) {
                continue;
            }
            log::trace!("{} <- {} bytes at offset {}", buffer.handle(), chunk.len(), offset);
            self.backend.bind_buffer(target, Some(buffer.handle()));
            self.backend.write_buffer_range(target, offset, chunk);
            self.backend.bind_buffer(target, None);
            buffer.record(offset, chunk);
            written += 1;
        }

        log::debug!(
            "Marshaled {} of {} {:?} elements into {}",
            written,
            elements.len(),
            T::KIND,
            buffer.handle()
        );
        Ok(written)
    }
}

fn expect_kind<T: UniformElement>(expected: ElementKind) -> Result<(), MarshalError> {
    if T::KIND == expected {
        Ok(())
    } else {
        Err(MarshalError::UnsupportedElementKind(T::KIND))
    }
}
