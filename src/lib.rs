// src/lib.rs
//! Shaderwatch
//!
//! Keeps compiled shader programs in sync with their source files and
//! marshals host vectors and matrices into uniform/storage buffer layouts.
//!
//! - [`shader`] - source tracking, compile/link, and the hot-reloading [`ShaderRegistry`]
//! - [`uniform`] - std140-style layouts and the [`UniformMarshaler`]
//! - [`backend`] - the [`GraphicsBackend`] seam, with a wgpu and a recording implementation
//!
//! All of it runs on the thread that owns the graphics context. Backends are
//! shared through `Rc`, so none of the owning wrappers can leave that thread.

pub mod backend;
pub mod error;
pub mod shader;
pub mod uniform;

// Re-export main types for convenience
pub use backend::{
    BufferHandle, BufferTarget, GraphicsBackend, ProgramHandle, RecordingBackend, StageHandle,
    StageKind, WgpuBackend,
};
pub use error::{BackendInitError, BuildFailure, MarshalError, ShaderError};
pub use shader::{ReloadPolicy, ReloadReport, ShaderRegistry};
pub use uniform::{ElementKind, UniformBuffer, UniformElement, UniformLayout, UniformMarshaler};
