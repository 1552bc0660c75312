//! Shader program registry with hot-reloading
//!
//! The registry owns every program it builds, keyed by the program's current
//! backend handle. Each tick the host calls
//! [`ShaderRegistry::check_for_changes`]; programs whose source files changed
//! are rebuilt and, only if the rebuild links, swapped in under their new
//! handle. A broken edit never replaces the running program.
//!
//! Per program the lifecycle is `Unbuilt -> Linked -> (unchanged | relinking) -> Linked`.

use std::{collections::HashMap, path::Path, rc::Rc, time::SystemTime};

use crate::{
    backend::{GraphicsBackend, ProgramHandle, StageKind},
    error::ShaderError,
};

use super::{
    compiler::compile,
    linker::{link, link_compute, Program},
    source::{FileSystem, LoadedSource, ShaderSource, SourceTracker, StdFileSystem},
};

/// How the registry treats a reload that fails to compile or link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReloadPolicy {
    /// Store the new timestamps even when the rebuild fails, so a broken
    /// file is retried only after it changes again
    pub refresh_timestamps_on_failure: bool,
}

impl Default for ReloadPolicy {
    fn default() -> Self {
        Self {
            refresh_timestamps_on_failure: true,
        }
    }
}

/// A program owned by the registry
pub struct ShaderProgram<B: GraphicsBackend> {
    program: Program<B>,
    sources: Vec<ShaderSource>,
    compiled_okay: bool,
}

impl<B: GraphicsBackend> ShaderProgram<B> {
    /// Live backend handle
    pub fn handle(&self) -> ProgramHandle {
        self.program.handle()
    }

    /// Backing files, in stage order
    pub fn sources(&self) -> &[ShaderSource] {
        &self.sources
    }

    /// Whether the latest build attempt succeeded
    ///
    /// After a failed reload this is `false` while [`handle`](Self::handle)
    /// still names the last good build.
    pub fn compiled_okay(&self) -> bool {
        self.compiled_okay
    }

    fn has_paths(&self, paths: &[&Path]) -> bool {
        self.sources.len() == paths.len()
            && self
                .sources
                .iter()
                .zip(paths)
                .all(|(source, path)| source.path == *path)
    }

    fn describe(&self) -> String {
        self.sources
            .iter()
            .map(|source| source.path.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Outcome of one [`ShaderRegistry::check_for_changes`] pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReloadReport {
    /// `(old, new)` handles of programs that were rebuilt and swapped
    pub reloaded: Vec<(ProgramHandle, ProgramHandle)>,
    /// Programs whose sources changed but failed to rebuild; still live
    pub failed: Vec<ProgramHandle>,
    /// Programs with a source file that could not be stat'ed this pass
    pub unreadable: Vec<ProgramHandle>,
}

impl ReloadReport {
    pub fn is_empty(&self) -> bool {
        self.reloaded.is_empty() && self.failed.is_empty() && self.unreadable.is_empty()
    }

    /// Handle that replaced `old` in this pass, if any
    pub fn replacement_for(&self, old: ProgramHandle) -> Option<ProgramHandle> {
        self.reloaded
            .iter()
            .find(|(from, _)| *from == old)
            .map(|(_, to)| *to)
    }
}

/// Registry statistics
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    pub programs: usize,
    pub render_programs: usize,
    pub compute_programs: usize,
    /// Programs whose latest rebuild failed and which run their last good build
    pub stale_programs: usize,
}

/// Owns shader programs and keeps them in sync with their source files
pub struct ShaderRegistry<B: GraphicsBackend, F: FileSystem = StdFileSystem> {
    backend: Rc<B>,
    tracker: SourceTracker<F>,
    programs: HashMap<ProgramHandle, ShaderProgram<B>>,
    policy: ReloadPolicy,
    current: Option<ProgramHandle>,
}

impl<B: GraphicsBackend> ShaderRegistry<B> {
    pub fn new(backend: Rc<B>) -> Self {
        Self::with_file_system(backend, StdFileSystem)
    }
}

impl<B: GraphicsBackend, F: FileSystem> ShaderRegistry<B, F> {
    pub fn with_file_system(backend: Rc<B>, fs: F) -> Self {
        Self {
            backend,
            tracker: SourceTracker::new(fs),
            programs: HashMap::new(),
            policy: ReloadPolicy::default(),
            current: None,
        }
    }

    pub fn with_policy(mut self, policy: ReloadPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> ReloadPolicy {
        self.policy
    }

    pub fn backend(&self) -> &Rc<B> {
        &self.backend
    }

    /// Build a render program from a vertex and a fragment source file
    ///
    /// Nothing is registered unless both stages compile and the program links.
    pub fn register(
        &mut self,
        vertex_path: impl AsRef<Path>,
        fragment_path: impl AsRef<Path>,
    ) -> Result<ProgramHandle, ShaderError> {
        let vertex = self.tracker.load(StageKind::Vertex, vertex_path)?;
        let fragment = self.tracker.load(StageKind::Fragment, fragment_path)?;
        let program = self.build(&[&vertex, &fragment])?;
        Ok(self.insert(program, vec![vertex.source, fragment.source]))
    }

    /// Build a compute program from a single source file
    pub fn register_compute(
        &mut self,
        compute_path: impl AsRef<Path>,
    ) -> Result<ProgramHandle, ShaderError> {
        let compute = self.tracker.load(StageKind::Compute, compute_path)?;
        let program = self.build(&[&compute])?;
        Ok(self.insert(program, vec![compute.source]))
    }

    /// Make `handle` the program the backend renders with
    pub fn use_program(&mut self, handle: ProgramHandle) -> Result<(), ShaderError> {
        if !self.programs.contains_key(&handle) {
            return Err(ShaderError::UnknownHandle(handle));
        }
        self.backend.use_program(handle);
        self.current = Some(handle);
        Ok(())
    }

    /// Remove a program and release its backend object
    pub fn unregister(&mut self, handle: ProgramHandle) -> Result<(), ShaderError> {
        let entry = self
            .programs
            .remove(&handle)
            .ok_or(ShaderError::UnknownHandle(handle))?;
        if self.current == Some(handle) {
            self.current = None;
        }
        log::info!("Unregistered shader program {} ({})", handle, entry.describe());
        Ok(())
    }

    /// Live handle of the program built from exactly these source paths
    ///
    /// If the same paths were registered more than once, the lowest handle
    /// wins.
    pub fn lookup<P: AsRef<Path>>(&self, paths: &[P]) -> Option<ProgramHandle> {
        let paths: Vec<&Path> = paths.iter().map(|path| path.as_ref()).collect();
        self.handles().into_iter().find(|handle| {
            self.programs
                .get(handle)
                .is_some_and(|entry| entry.has_paths(&paths))
        })
    }

    pub fn get(&self, handle: ProgramHandle) -> Option<&ShaderProgram<B>> {
        self.programs.get(&handle)
    }

    pub fn contains(&self, handle: ProgramHandle) -> bool {
        self.programs.contains_key(&handle)
    }

    pub fn handles(&self) -> Vec<ProgramHandle> {
        let mut handles: Vec<_> = self.programs.keys().copied().collect();
        handles.sort();
        handles
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    pub fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats {
            programs: self.programs.len(),
            ..Default::default()
        };
        for entry in self.programs.values() {
            let compute = entry
                .sources
                .iter()
                .any(|source| source.kind == StageKind::Compute);
            if compute {
                stats.compute_programs += 1;
            } else {
                stats.render_programs += 1;
            }
            if !entry.compiled_okay {
                stats.stale_programs += 1;
            }
        }
        stats
    }

    /// Rebuild every program whose source files changed since the last check
    ///
    /// Never fails: rebuild errors are logged and the previous build stays
    /// live. A successful rebuild deletes the old program and re-keys the
    /// entry under the new handle in one step; if the old program was the one
    /// in use, the new one is bound in its place.
    pub fn check_for_changes(&mut self) -> ReloadReport {
        let mut report = ReloadReport::default();

        for handle in self.handles() {
            let Some(entry) = self.programs.get(&handle) else {
                continue;
            };

            let observed = match self.observe_all(&entry.sources) {
                Ok(observed) => observed,
                Err(err) => {
                    log::warn!("Skipping reload check for {}: {}", handle, err);
                    report.unreadable.push(handle);
                    continue;
                }
            };
            let changed = entry
                .sources
                .iter()
                .zip(&observed)
                .any(|(source, modified)| source.last_modified != *modified);
            if !changed {
                continue;
            }

            log::info!("Reloading shader program {} ({})", handle, entry.describe());
            let rebuilt = self.rebuild(&entry.sources);

            let Some(mut entry) = self.programs.remove(&handle) else {
                continue;
            };
            match rebuilt {
                Ok((program, observed)) => {
                    let new_handle = program.handle();
                    // Dropping the replaced program deletes the old handle
                    entry.program = program;
                    entry.compiled_okay = true;
                    refresh(&mut entry.sources, &observed);
                    self.programs.insert(new_handle, entry);

                    if self.current == Some(handle) {
                        self.backend.use_program(new_handle);
                        self.current = Some(new_handle);
                    }
                    log::info!("Relinked shader program {} -> {}", handle, new_handle);
                    report.reloaded.push((handle, new_handle));
                }
                Err(err) => {
                    log::warn!(
                        "Could not relink shader program {}, keeping previous build: {}",
                        handle,
                        err
                    );
                    entry.compiled_okay = false;
                    if self.policy.refresh_timestamps_on_failure {
                        refresh(&mut entry.sources, &observed);
                    }
                    self.programs.insert(handle, entry);
                    report.failed.push(handle);
                }
            }
        }

        report
    }

    fn observe_all(&self, sources: &[ShaderSource]) -> Result<Vec<SystemTime>, ShaderError> {
        sources
            .iter()
            .map(|source| self.tracker.observe(&source.path))
            .collect()
    }

    /// Reload and rebuild from `sources`, returning the fresh timestamps
    fn rebuild(
        &self,
        sources: &[ShaderSource],
    ) -> Result<(Program<B>, Vec<SystemTime>), ShaderError> {
        let loaded = sources
            .iter()
            .map(|source| self.tracker.load(source.kind, &source.path))
            .collect::<Result<Vec<_>, _>>()?;
        let refs: Vec<&LoadedSource> = loaded.iter().collect();
        let program = self.build(&refs)?;
        let observed = loaded
            .iter()
            .map(|loaded| loaded.source.last_modified)
            .collect();
        Ok((program, observed))
    }

    fn build(&self, loaded: &[&LoadedSource]) -> Result<Program<B>, ShaderError> {
        match loaded {
            [compute] if compute.source.kind == StageKind::Compute => {
                let stage = compile(&self.backend, &compute.text, StageKind::Compute)?;
                Ok(link_compute(&self.backend, stage)?)
            }
            [vertex, fragment] => {
                let vertex = compile(&self.backend, &vertex.text, vertex.source.kind)?;
                let fragment = compile(&self.backend, &fragment.text, fragment.source.kind)?;
                Ok(link(&self.backend, vertex, fragment)?)
            }
            _ => Err(ShaderError::Link {
                log: format!("unsupported stage combination ({} stages)", loaded.len()),
            }),
        }
    }

    fn insert(&mut self, program: Program<B>, sources: Vec<ShaderSource>) -> ProgramHandle {
        let handle = program.handle();
        let entry = ShaderProgram {
            program,
            sources,
            compiled_okay: true,
        };
        log::info!("Registered shader program {} ({})", handle, entry.describe());
        self.programs.insert(handle, entry);
        handle
    }
}

fn refresh(sources: &mut [ShaderSource], observed: &[SystemTime]) {
    for (source, modified) in sources.iter_mut().zip(observed) {
        source.last_modified = *modified;
    }
}
