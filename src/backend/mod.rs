// src/backend/mod.rs
//! Graphics backend seam
//!
//! Everything the shader lifecycle and the uniform marshaler need from the GPU
//! goes through [`GraphicsBackend`]. The trait mirrors a classic
//! create/attach/link object model so that both immediate-mode style APIs and
//! wgpu (see [`WgpuBackend`]) can sit behind it.
//!
//! All methods take `&self`. A backend stands for the one "current context",
//! which is single-threaded by nature; implementations keep their bookkeeping
//! in a `RefCell` and are therefore not `Sync`.

use std::fmt;

pub mod recording;
pub mod wgpu_backend;

pub use recording::{Command, RecordingBackend};
pub use wgpu_backend::{LinkedPipeline, PipelineConfig, VertexBufferSpec, WgpuBackend};

/// Raw id of a compiled (or failed) shader stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StageHandle(pub u32);

/// Raw id of a linked (or failed) shader program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramHandle(pub u32);

/// Raw id of a GPU buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub u32);

impl fmt::Display for StageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage#{}", self.0)
    }
}

impl fmt::Display for ProgramHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "program#{}", self.0)
    }
}

impl fmt::Display for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buffer#{}", self.0)
    }
}

/// Pipeline stage a piece of shader source is compiled for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Vertex,
    Fragment,
    Compute,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StageKind::Vertex => "vertex",
            StageKind::Fragment => "fragment",
            StageKind::Compute => "compute",
        };
        f.write_str(name)
    }
}

/// Buffer binding point used for uniform data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferTarget {
    /// Uniform buffer (UBO)
    Uniform,
    /// Shader storage buffer (SSBO), usable from compute shaders
    ShaderStorage,
}

/// Capability set the core consumes from a real-time graphics backend
///
/// Status and log queries refer to the most recent `compile`/`link_program`
/// call on the given object. Calls on handles the backend does not know about
/// must not panic.
pub trait GraphicsBackend {
    fn create_shader_stage(&self, kind: StageKind) -> StageHandle;
    fn set_source(&self, stage: StageHandle, source: &str);
    fn compile(&self, stage: StageHandle);
    fn compile_status(&self, stage: StageHandle) -> bool;
    fn compile_log(&self, stage: StageHandle) -> String;
    fn delete_stage(&self, stage: StageHandle);

    fn create_program(&self) -> ProgramHandle;
    fn attach_stage(&self, program: ProgramHandle, stage: StageHandle);
    fn link_program(&self, program: ProgramHandle);
    fn link_status(&self, program: ProgramHandle) -> bool;
    fn link_log(&self, program: ProgramHandle) -> String;
    fn delete_program(&self, program: ProgramHandle);
    fn use_program(&self, program: ProgramHandle);

    fn create_buffer(&self, target: BufferTarget, size_bytes: u64) -> BufferHandle;
    /// Attach `buffer` to the indexed binding point shaders read from
    fn bind_buffer_base(&self, target: BufferTarget, index: u32, buffer: BufferHandle);
    /// Bind `buffer` as the write target for `target`; `None` unbinds
    fn bind_buffer(&self, target: BufferTarget, buffer: Option<BufferHandle>);
    /// Write `data` into the buffer currently bound to `target`
    fn write_buffer_range(&self, target: BufferTarget, offset_bytes: u64, data: &[u8]);
    fn delete_buffer(&self, buffer: BufferHandle);
}
