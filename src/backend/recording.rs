// src/backend/recording.rs
//! Headless backend that records every call
//!
//! [`RecordingBackend`] keeps buffer contents in host memory and decides
//! compilation with a pluggable rule, which makes it suitable for tests and
//! for tooling that wants to validate shader bookkeeping without a GPU.
//! Misuse (deleted handles, out-of-range writes, double deletes) is recorded
//! as a fault instead of panicking.

use std::{
    cell::RefCell,
    collections::{HashMap, HashSet},
};

use super::{BufferHandle, BufferTarget, GraphicsBackend, ProgramHandle, StageHandle, StageKind};

/// One recorded backend call
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    CreateShaderStage {
        stage: StageHandle,
        kind: StageKind,
    },
    SetSource {
        stage: StageHandle,
        source: String,
    },
    Compile(StageHandle),
    DeleteStage(StageHandle),
    CreateProgram(ProgramHandle),
    AttachStage {
        program: ProgramHandle,
        stage: StageHandle,
    },
    LinkProgram(ProgramHandle),
    DeleteProgram(ProgramHandle),
    UseProgram(ProgramHandle),
    CreateBuffer {
        buffer: BufferHandle,
        target: BufferTarget,
        size_bytes: u64,
    },
    BindBufferBase {
        target: BufferTarget,
        index: u32,
        buffer: BufferHandle,
    },
    BindBuffer {
        target: BufferTarget,
        buffer: Option<BufferHandle>,
    },
    WriteBufferRange {
        target: BufferTarget,
        offset_bytes: u64,
        data: Vec<u8>,
    },
    DeleteBuffer(BufferHandle),
}

/// Decides whether a stage compiles; `Err` carries the compile log
pub type CompileRule = Box<dyn Fn(StageKind, &str) -> Result<(), String>>;

struct StageRecord {
    kind: StageKind,
    source: String,
    compiled: bool,
    log: String,
}

struct ProgramRecord {
    attached: Vec<(StageHandle, StageKind, bool)>,
    linked: bool,
    log: String,
}

struct BufferRecord {
    target: BufferTarget,
    data: Vec<u8>,
}

#[derive(Default)]
struct State {
    next_id: u32,
    commands: Vec<Command>,
    stages: HashMap<StageHandle, StageRecord>,
    programs: HashMap<ProgramHandle, ProgramRecord>,
    buffers: HashMap<BufferHandle, BufferRecord>,
    bound: HashMap<BufferTarget, BufferHandle>,
    bases: HashMap<(BufferTarget, u32), BufferHandle>,
    current_program: Option<ProgramHandle>,
    faults: Vec<String>,
}

impl State {
    fn next_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn fault(&mut self, message: String) {
        log::error!("recording backend fault: {}", message);
        self.faults.push(message);
    }
}

/// Command-recording [`GraphicsBackend`] with host-side buffers
pub struct RecordingBackend {
    state: RefCell<State>,
    compile_rule: CompileRule,
}

impl Default for RecordingBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingBackend {
    /// Backend whose stages compile whenever their source is not blank
    pub fn new() -> Self {
        Self::with_compile_rule(|_, source| {
            if source.trim().is_empty() {
                Err("empty shader source".to_string())
            } else {
                Ok(())
            }
        })
    }

    /// Backend that compiles stages according to `rule`
    pub fn with_compile_rule<R>(rule: R) -> Self
    where
        R: Fn(StageKind, &str) -> Result<(), String> + 'static,
    {
        Self {
            state: RefCell::new(State::default()),
            compile_rule: Box::new(rule),
        }
    }

    /// All calls recorded so far, oldest first
    pub fn commands(&self) -> Vec<Command> {
        self.state.borrow().commands.clone()
    }

    /// Drain the recorded calls
    pub fn take_commands(&self) -> Vec<Command> {
        std::mem::take(&mut self.state.borrow_mut().commands)
    }

    /// Misuse detected so far; empty for a well-behaved caller
    pub fn faults(&self) -> Vec<String> {
        self.state.borrow().faults.clone()
    }

    pub fn live_stages(&self) -> usize {
        self.state.borrow().stages.len()
    }

    pub fn live_programs(&self) -> usize {
        self.state.borrow().programs.len()
    }

    pub fn live_buffers(&self) -> usize {
        self.state.borrow().buffers.len()
    }

    pub fn is_program_live(&self, program: ProgramHandle) -> bool {
        self.state.borrow().programs.contains_key(&program)
    }

    pub fn is_stage_live(&self, stage: StageHandle) -> bool {
        self.state.borrow().stages.contains_key(&stage)
    }

    /// Program selected by the last successful `use_program`
    pub fn current_program(&self) -> Option<ProgramHandle> {
        self.state.borrow().current_program
    }

    /// Source text last submitted for `stage`
    pub fn stage_source(&self, stage: StageHandle) -> Option<String> {
        self.state
            .borrow()
            .stages
            .get(&stage)
            .map(|record| record.source.clone())
    }

    /// Host copy of a buffer's bytes
    pub fn buffer_contents(&self, buffer: BufferHandle) -> Option<Vec<u8>> {
        self.state
            .borrow()
            .buffers
            .get(&buffer)
            .map(|record| record.data.clone())
    }

    /// Buffer attached to an indexed binding point
    pub fn buffer_at_binding(&self, target: BufferTarget, index: u32) -> Option<BufferHandle> {
        self.state.borrow().bases.get(&(target, index)).copied()
    }
}

impl GraphicsBackend for RecordingBackend {
    fn create_shader_stage(&self, kind: StageKind) -> StageHandle {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        let stage = StageHandle(state.next_id());
        state.stages.insert(
            stage,
            StageRecord {
                kind,
                source: String::new(),
                compiled: false,
                log: String::new(),
            },
        );
        state.commands.push(Command::CreateShaderStage { stage, kind });
        stage
    }

    fn set_source(&self, stage: StageHandle, source: &str) {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        state.commands.push(Command::SetSource {
            stage,
            source: source.to_string(),
        });
        match state.stages.get_mut(&stage) {
            Some(record) => record.source = source.to_string(),
            None => state.fault(format!("set_source on unknown {}", stage)),
        }
    }

    fn compile(&self, stage: StageHandle) {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        state.commands.push(Command::Compile(stage));
        let Some(record) = state.stages.get_mut(&stage) else {
            state.fault(format!("compile on unknown {}", stage));
            return;
        };
        match (self.compile_rule)(record.kind, &record.source) {
            Ok(()) => {
                record.compiled = true;
                record.log.clear();
            }
            Err(log) => {
                record.compiled = false;
                record.log = log;
            }
        }
    }

    fn compile_status(&self, stage: StageHandle) -> bool {
        self.state
            .borrow()
            .stages
            .get(&stage)
            .is_some_and(|record| record.compiled)
    }

    fn compile_log(&self, stage: StageHandle) -> String {
        self.state
            .borrow()
            .stages
            .get(&stage)
            .map(|record| record.log.clone())
            .unwrap_or_default()
    }

    fn delete_stage(&self, stage: StageHandle) {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        state.commands.push(Command::DeleteStage(stage));
        if state.stages.remove(&stage).is_none() {
            state.fault(format!("delete of unknown {}", stage));
        }
    }

    fn create_program(&self) -> ProgramHandle {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        let program = ProgramHandle(state.next_id());
        state.programs.insert(
            program,
            ProgramRecord {
                attached: Vec::new(),
                linked: false,
                log: String::new(),
            },
        );
        state.commands.push(Command::CreateProgram(program));
        program
    }

    fn attach_stage(&self, program: ProgramHandle, stage: StageHandle) {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        state.commands.push(Command::AttachStage { program, stage });
        let Some((kind, compiled)) = state
            .stages
            .get(&stage)
            .map(|record| (record.kind, record.compiled))
        else {
            state.fault(format!("attach of unknown {} to {}", stage, program));
            return;
        };
        match state.programs.get_mut(&program) {
            Some(record) => record.attached.push((stage, kind, compiled)),
            None => state.fault(format!("attach of {} to unknown {}", stage, program)),
        }
    }

    fn link_program(&self, program: ProgramHandle) {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        state.commands.push(Command::LinkProgram(program));
        let Some(record) = state.programs.get_mut(&program) else {
            state.fault(format!("link of unknown {}", program));
            return;
        };

        let result = if let Some((stage, _, _)) =
            record.attached.iter().find(|(_, _, compiled)| !compiled)
        {
            Err(format!("attached {} is not compiled", stage))
        } else {
            let kinds: HashSet<StageKind> =
                record.attached.iter().map(|(_, kind, _)| *kind).collect();
            let render: HashSet<StageKind> =
                [StageKind::Vertex, StageKind::Fragment].into_iter().collect();
            let compute: HashSet<StageKind> = [StageKind::Compute].into_iter().collect();
            if record.attached.len() == kinds.len() && (kinds == render || kinds == compute) {
                Ok(())
            } else {
                Err(format!(
                    "expected one vertex and one fragment stage, or one compute stage; got {:?}",
                    record
                        .attached
                        .iter()
                        .map(|(_, kind, _)| *kind)
                        .collect::<Vec<_>>()
                ))
            }
        };

        match result {
            Ok(()) => {
                record.linked = true;
                record.log.clear();
            }
            Err(log) => {
                record.linked = false;
                record.log = log;
            }
        }
    }

    fn link_status(&self, program: ProgramHandle) -> bool {
        self.state
            .borrow()
            .programs
            .get(&program)
            .is_some_and(|record| record.linked)
    }

    fn link_log(&self, program: ProgramHandle) -> String {
        self.state
            .borrow()
            .programs
            .get(&program)
            .map(|record| record.log.clone())
            .unwrap_or_default()
    }

    fn delete_program(&self, program: ProgramHandle) {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        state.commands.push(Command::DeleteProgram(program));
        if state.programs.remove(&program).is_none() {
            state.fault(format!("delete of unknown {}", program));
        }
    }

    fn use_program(&self, program: ProgramHandle) {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        state.commands.push(Command::UseProgram(program));
        match state.programs.get(&program).map(|record| record.linked) {
            Some(true) => state.current_program = Some(program),
            Some(false) => state.fault(format!("use of unlinked {}", program)),
            None => state.fault(format!("use of unknown {}", program)),
        }
    }

    fn create_buffer(&self, target: BufferTarget, size_bytes: u64) -> BufferHandle {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        let buffer = BufferHandle(state.next_id());
        state.buffers.insert(
            buffer,
            BufferRecord {
                target,
                data: vec![0; size_bytes as usize],
            },
        );
        state.commands.push(Command::CreateBuffer {
            buffer,
            target,
            size_bytes,
        });
        buffer
    }

    fn bind_buffer_base(&self, target: BufferTarget, index: u32, buffer: BufferHandle) {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        state.commands.push(Command::BindBufferBase {
            target,
            index,
            buffer,
        });
        if state.buffers.contains_key(&buffer) {
            state.bases.insert((target, index), buffer);
        } else {
            state.fault(format!("bind_buffer_base of unknown {}", buffer));
        }
    }

    fn bind_buffer(&self, target: BufferTarget, buffer: Option<BufferHandle>) {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        state.commands.push(Command::BindBuffer { target, buffer });
        match buffer {
            Some(buffer) if state.buffers.contains_key(&buffer) => {
                state.bound.insert(target, buffer);
            }
            Some(buffer) => state.fault(format!("bind of unknown {}", buffer)),
            None => {
                state.bound.remove(&target);
            }
        }
    }

    fn write_buffer_range(&self, target: BufferTarget, offset_bytes: u64, data: &[u8]) {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        state.commands.push(Command::WriteBufferRange {
            target,
            offset_bytes,
            data: data.to_vec(),
        });
        let Some(buffer) = state.bound.get(&target).copied() else {
            state.fault(format!("write to {:?} with no buffer bound", target));
            return;
        };
        let Some(record) = state.buffers.get_mut(&buffer) else {
            state.fault(format!("write to deleted {}", buffer));
            return;
        };
        if record.target != target {
            log::debug!(
                "{} created for {:?} written through {:?}",
                buffer,
                record.target,
                target
            );
        }
        let start = offset_bytes as usize;
        let end = start + data.len();
        if end > record.data.len() {
            let len = record.data.len();
            state.fault(format!(
                "write of {}..{} past the end of {} ({} bytes)",
                start, end, buffer, len
            ));
            return;
        }
        record.data[start..end].copy_from_slice(data);
    }

    fn delete_buffer(&self, buffer: BufferHandle) {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        state.commands.push(Command::DeleteBuffer(buffer));
        if state.buffers.remove(&buffer).is_none() {
            state.fault(format!("delete of unknown {}", buffer));
            return;
        }
        state.bound.retain(|_, bound| *bound != buffer);
        state.bases.retain(|_, bound| *bound != buffer);
    }
}
