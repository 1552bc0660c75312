//! Single-stage shader compilation

use std::{fmt, path::Path, rc::Rc};

use crate::{
    backend::{GraphicsBackend, StageHandle, StageKind},
    error::{BuildFailure, ShaderError},
};

use super::source::{FileSystem, ShaderSource, SourceTracker};

/// A backend shader stage, deleted when dropped
pub struct Stage<B: GraphicsBackend> {
    backend: Rc<B>,
    handle: StageHandle,
    kind: StageKind,
}

impl<B: GraphicsBackend> Stage<B> {
    pub fn handle(&self) -> StageHandle {
        self.handle
    }

    pub fn kind(&self) -> StageKind {
        self.kind
    }
}

impl<B: GraphicsBackend> Drop for Stage<B> {
    fn drop(&mut self) {
        self.backend.delete_stage(self.handle);
    }
}

impl<B: GraphicsBackend> fmt::Debug for Stage<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("handle", &self.handle)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Compile `source` as a `kind` stage
///
/// On failure the backend's compile log is returned together with the stage,
/// which can still be inspected before it is dropped.
pub fn compile<B: GraphicsBackend>(
    backend: &Rc<B>,
    source: &str,
    kind: StageKind,
) -> Result<Stage<B>, BuildFailure<Stage<B>>> {
    let stage = Stage {
        backend: Rc::clone(backend),
        handle: backend.create_shader_stage(kind),
        kind,
    };

    backend.set_source(stage.handle, source);
    backend.compile(stage.handle);

    if !backend.compile_status(stage.handle) {
        let log = clean_log(backend.compile_log(stage.handle));
        log::debug!("{} shader {} failed to compile: {}", kind, stage.handle, log);
        return Err(BuildFailure::new(
            ShaderError::Compile { stage: kind, log },
            stage,
        ));
    }

    log::debug!("{} shader compiled successfully ({})", kind, stage.handle);
    Ok(stage)
}

/// Load `path` through `tracker` and compile it
pub fn compile_file<B, F>(
    backend: &Rc<B>,
    tracker: &SourceTracker<F>,
    kind: StageKind,
    path: impl AsRef<Path>,
) -> Result<(ShaderSource, Stage<B>), ShaderError>
where
    B: GraphicsBackend,
    F: FileSystem,
{
    let loaded = tracker.load(kind, path)?;
    let stage = compile(backend, &loaded.text, kind)?;
    Ok((loaded.source, stage))
}

/// Backend logs may carry NUL padding and trailing newlines
pub(crate) fn clean_log(log: String) -> String {
    let trimmed = log.trim_end_matches(|c: char| c == '\0' || c.is_whitespace());
    if trimmed.len() == log.len() {
        log
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::{Command, RecordingBackend},
        shader::source::StdFileSystem,
    };

    #[test]
    fn test_compile_submits_source_and_checks_status() {
        let backend = Rc::new(RecordingBackend::new());
        let stage = compile(&backend, "void main() {}", StageKind::Vertex).unwrap();

        assert_eq!(stage.kind(), StageKind::Vertex);
        assert_eq!(
            backend.stage_source(stage.handle()).as_deref(),
            Some("void main() {}")
        );
        assert!(backend.compile_status(stage.handle()));
    }

    #[test]
    fn test_failed_compile_keeps_stage_for_inspection() {
        let backend = Rc::new(RecordingBackend::with_compile_rule(|_, _| {
            Err("0:1: syntax error\n\0".to_string())
        }));

        let failure = compile(&backend, "void main( {}", StageKind::Fragment).unwrap_err();
        let handle = failure.object().handle();
        assert!(backend.is_stage_live(handle));

        match failure.error() {
            ShaderError::Compile { stage, log } => {
                assert_eq!(*stage, StageKind::Fragment);
                assert_eq!(log, "0:1: syntax error");
            }
            other => panic!("expected compile error, got {:?}", other),
        }

        // Converting to the plain error releases the stage
        let _error: ShaderError = failure.into();
        assert!(!backend.is_stage_live(handle));
        assert_eq!(backend.commands().last(), Some(&Command::DeleteStage(handle)));
    }

    #[test]
    fn test_compile_file_reports_missing_file() {
        let backend = Rc::new(RecordingBackend::new());
        let tracker = SourceTracker::new(StdFileSystem);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lit.frag");

        let err = compile_file(&backend, &tracker, StageKind::Fragment, &path).unwrap_err();
        assert!(matches!(err, ShaderError::Io { path: ref p, .. } if *p == path));
        assert!(backend.commands().is_empty());

        std::fs::write(&path, "void main() {}").unwrap();
        let (source, stage) = compile_file(&backend, &tracker, StageKind::Fragment, &path).unwrap();
        assert_eq!(source.path, path);
        assert_eq!(source.kind, StageKind::Fragment);
        assert!(backend.compile_status(stage.handle()));
    }

    #[test]
    fn test_stage_deleted_exactly_once() {
        let backend = Rc::new(RecordingBackend::new());
        let stage = compile(&backend, "void main() {}", StageKind::Compute).unwrap();
        drop(stage);

        assert_eq!(backend.live_stages(), 0);
        assert!(backend.faults().is_empty());
    }
}
