// src/uniform/buffer.rs - Uniform and storage buffer handles
use std::{fmt, ops::Range, rc::Rc};

use crate::backend::{BufferHandle, BufferTarget, GraphicsBackend};

/// Owning wrapper for a uniform or storage buffer
///
/// The backend buffer is deleted when this is dropped. A host-side shadow of
/// the bytes written so far lets the marshaler skip elements that did not
/// change (see [`UniformMarshaler::update_elements`]).
///
/// [`UniformMarshaler::update_elements`]: super::UniformMarshaler::update_elements
pub struct UniformBuffer<B: GraphicsBackend> {
    backend: Rc<B>,
    handle: BufferHandle,
    target: BufferTarget,
    binding_index: u32,
    capacity_bytes: u64,
    // Covers bytes up to the furthest write; None = never written here
    shadow: Vec<Option<u8>>,
}

impl<B: GraphicsBackend> UniformBuffer<B> {
    /// Create a buffer and attach it to `binding_index`
    pub fn new(
        backend: &Rc<B>,
        target: BufferTarget,
        binding_index: u32,
        capacity_bytes: u64,
    ) -> Self {
        let handle = backend.create_buffer(target, capacity_bytes);
        backend.bind_buffer_base(target, binding_index, handle);
        log::debug!(
            "Created {:?} {} ({} bytes) at binding {}",
            target,
            handle,
            capacity_bytes,
            binding_index
        );
        Self::from_raw(backend, target, binding_index, handle, capacity_bytes)
    }

    /// Create a uniform buffer (UBO)
    pub fn new_uniform(backend: &Rc<B>, binding_index: u32, capacity_bytes: u64) -> Self {
        Self::new(backend, BufferTarget::Uniform, binding_index, capacity_bytes)
    }

    /// Create a storage buffer (for compute shaders)
    pub fn new_storage(backend: &Rc<B>, binding_index: u32, capacity_bytes: u64) -> Self {
        Self::new(
            backend,
            BufferTarget::ShaderStorage,
            binding_index,
            capacity_bytes,
        )
    }

    /// Take ownership of a buffer created elsewhere
    pub fn from_raw(
        backend: &Rc<B>,
        target: BufferTarget,
        binding_index: u32,
        handle: BufferHandle,
        capacity_bytes: u64,
    ) -> Self {
        Self {
            backend: Rc::clone(backend),
            handle,
            target,
            binding_index,
            capacity_bytes,
            shadow: Vec::new(),
        }
    }

    pub fn handle(&self) -> BufferHandle {
        self.handle
    }

    pub fn target(&self) -> BufferTarget {
        self.target
    }

    pub fn binding_index(&self) -> u32 {
        self.binding_index
    }

    /// Get buffer size
    pub fn capacity_bytes(&self) -> u64 {
        self.capacity_bytes
    }

    /// True when the shadow says `bytes` are already at `offset`
    pub(crate) fn holds(&self, offset: u64, bytes: &[u8]) -> bool {
        self.shadow_range(offset, bytes.len())
            .and_then(|range| self.shadow.get(range))
            .is_some_and(|known| {
                known
                    .iter()
                    .zip(bytes)
                    .all(|(known, byte)| *known == Some(*byte))
            })
    }

    pub(crate) fn record(&mut self, offset: u64, bytes: &[u8]) {
        let Some(range) = self.shadow_range(offset, bytes.len()) else {
            return;
        };
        if range.end > self.shadow.len() {
            self.shadow.resize(range.end, None);
        }
        for (known, byte) in self.shadow[range].iter_mut().zip(bytes) {
            *known = Some(*byte);
        }
    }

    /// Shadow indices for a write, or `None` if it falls outside the buffer
    fn shadow_range(&self, offset: u64, len: usize) -> Option<Range<usize>> {
        let end = offset.checked_add(len as u64)?;
        if end > self.capacity_bytes {
            return None;
        }
        Some(usize::try_from(offset).ok()?..usize::try_from(end).ok()?)
    }
}

impl<B: GraphicsBackend> Drop for UniformBuffer<B> {
    fn drop(&mut self) {
        self.backend.delete_buffer(self.handle);
    }
}

impl<B: GraphicsBackend> fmt::Debug for UniformBuffer<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UniformBuffer")
            .field("handle", &self.handle)
            .field("target", &self.target)
            .field("binding_index", &self.binding_index)
            .field("capacity_bytes", &self.capacity_bytes)
            .finish()
    }
}
