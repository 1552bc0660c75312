//! Program linking
//!
//! Linking consumes the stages: once a program is linked it keeps the
//! compiled code and the stage objects are released. A failed link still
//! returns the program object so its log can be inspected; nothing here
//! installs a program anywhere, that is the registry's job.

use std::{fmt, rc::Rc};

use crate::{
    backend::{GraphicsBackend, ProgramHandle},
    error::{BuildFailure, ShaderError},
};

use super::compiler::{clean_log, Stage};

/// A backend program, deleted when dropped
pub struct Program<B: GraphicsBackend> {
    backend: Rc<B>,
    handle: ProgramHandle,
}

impl<B: GraphicsBackend> Program<B> {
    pub fn handle(&self) -> ProgramHandle {
        self.handle
    }
}

impl<B: GraphicsBackend> Drop for Program<B> {
    fn drop(&mut self) {
        self.backend.delete_program(self.handle);
    }
}

impl<B: GraphicsBackend> fmt::Debug for Program<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("handle", &self.handle)
            .finish()
    }
}

/// Link a vertex and a fragment stage into a render program
pub fn link<B: GraphicsBackend>(
    backend: &Rc<B>,
    vertex: Stage<B>,
    fragment: Stage<B>,
) -> Result<Program<B>, BuildFailure<Program<B>>> {
    link_stages(backend, vec![vertex, fragment])
}

/// Link a single compute stage into a compute program
pub fn link_compute<B: GraphicsBackend>(
    backend: &Rc<B>,
    compute: Stage<B>,
) -> Result<Program<B>, BuildFailure<Program<B>>> {
    link_stages(backend, vec![compute])
}

fn link_stages<B: GraphicsBackend>(
    backend: &Rc<B>,
    stages: Vec<Stage<B>>,
) -> Result<Program<B>, BuildFailure<Program<B>>> {
    let program = Program {
        backend: Rc::clone(backend),
        handle: backend.create_program(),
    };

    for stage in &stages {
        backend.attach_stage(program.handle, stage.handle());
    }
    backend.link_program(program.handle);

    if !backend.link_status(program.handle) {
        let log = clean_log(backend.link_log(program.handle));
        log::debug!("{} failed to link: {}", program.handle, log);
        return Err(BuildFailure::new(ShaderError::Link { log }, program));
    }

    // The program retains the compiled code; release the stages now
    drop(stages);

    log::debug!("Linked {}", program.handle);
    Ok(program)
}
