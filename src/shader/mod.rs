//! Shader program lifecycle
//!
//! Source tracking, single-stage compilation, linking, and the hot-reloading
//! [`ShaderRegistry`] that ties them together.

pub mod compiler;
pub mod linker;
pub mod registry;
pub mod source;

pub use compiler::{compile, compile_file, Stage};
pub use linker::{link, link_compute, Program};
pub use registry::{RegistryStats, ReloadPolicy, ReloadReport, ShaderProgram, ShaderRegistry};
pub use source::{FileSystem, LoadedSource, ShaderSource, SourceTracker, StdFileSystem};
