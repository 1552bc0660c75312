//! Error types for the shader lifecycle, uniform marshaling and backend setup

use std::{fmt, io, path::PathBuf};

use thiserror::Error;

use crate::backend::{ProgramHandle, StageKind};
use crate::uniform::ElementKind;

/// Errors raised while loading, compiling, linking or using shader programs
#[derive(Debug, Error)]
pub enum ShaderError {
    /// The source file could not be read or stat'ed
    #[error("failed to access shader source '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The backend rejected a stage; `log` is the backend's diagnostic text
    #[error("{stage} shader failed to compile: {log}")]
    Compile { stage: StageKind, log: String },

    /// The backend could not link the attached stages
    #[error("shader program failed to link: {log}")]
    Link { log: String },

    /// The handle does not name a program owned by the registry
    #[error("unknown shader program {0}")]
    UnknownHandle(ProgramHandle),
}

impl ShaderError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        ShaderError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors raised while converting host data into a uniform buffer layout
///
/// These point at a programming or configuration mistake and are always
/// returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarshalError {
    #[error("uniform buffer too small: {required} bytes required, capacity is {capacity}")]
    BufferTooSmall { required: u64, capacity: u64 },

    #[error("unsupported uniform element kind: {0:?}")]
    UnsupportedElementKind(ElementKind),
}

/// A failed compile or link, still carrying the backend object
///
/// The object is non-functional but can be inspected (for example to query
/// its handle) before it is dropped, which releases it on the backend.
/// Converting into [`ShaderError`] drops the object.
pub struct BuildFailure<T> {
    error: ShaderError,
    object: T,
}

impl<T> BuildFailure<T> {
    pub(crate) fn new(error: ShaderError, object: T) -> Self {
        Self { error, object }
    }

    pub fn error(&self) -> &ShaderError {
        &self.error
    }

    pub fn object(&self) -> &T {
        &self.object
    }

    pub fn into_parts(self) -> (ShaderError, T) {
        (self.error, self.object)
    }
}

impl<T: fmt::Debug> fmt::Debug for BuildFailure<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildFailure")
            .field("error", &self.error)
            .field("object", &self.object)
            .finish()
    }
}

impl<T> fmt::Display for BuildFailure<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.error, f)
    }
}

impl<T: fmt::Debug> std::error::Error for BuildFailure<T> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

impl<T> From<BuildFailure<T>> for ShaderError {
    fn from(failure: BuildFailure<T>) -> Self {
        failure.error
    }
}

/// Failure to bring up a headless wgpu device
#[derive(Debug, Error)]
pub enum BackendInitError {
    #[error("no suitable GPU adapter: {0}")]
    NoAdapter(#[from] wgpu::RequestAdapterError),

    #[error("failed to request GPU device: {0}")]
    RequestDevice(#[from] wgpu::RequestDeviceError),
}
