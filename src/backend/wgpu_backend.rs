// src/backend/wgpu_backend.rs
//! wgpu implementation of [`GraphicsBackend`]
//!
//! wgpu has no separate compile and link steps, so they are mapped as follows:
//!
//! - a stage is a [`wgpu::ShaderModule`] created from WGSL; its compile
//!   status and log come from a validation error scope around the creation
//! - a program is a [`wgpu::RenderPipeline`] (vertex + fragment stage) or a
//!   [`wgpu::ComputePipeline`] (single compute stage) created at link time,
//!   again inside an error scope
//! - fixed-function pipeline state comes from [`PipelineConfig`]
//!
//! Buffers are plain [`wgpu::Buffer`]s written through the queue. Binding
//! indices are remembered so the host can build bind groups for the program
//! in use ([`WgpuBackend::bind_group`]).

use std::{cell::RefCell, collections::HashMap, sync::Arc};

use wgpu::*;

use super::{BufferHandle, BufferTarget, GraphicsBackend, ProgramHandle, StageHandle, StageKind};
use crate::error::BackendInitError;

/// One vertex buffer slot of a render pipeline
#[derive(Debug, Clone)]
pub struct VertexBufferSpec {
    pub array_stride: BufferAddress,
    pub step_mode: VertexStepMode,
    pub attributes: Vec<VertexAttribute>,
}

/// Configuration for the pipelines created at link time
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub label: String,
    pub vertex_entry_point: String,
    pub fragment_entry_point: String,
    pub compute_entry_point: String,
    pub vertex_buffers: Vec<VertexBufferSpec>,
    pub primitive_topology: PrimitiveTopology,
    pub cull_mode: Option<Face>,
    pub depth_format: Option<TextureFormat>,
    pub multisample: MultisampleState,
    pub color_targets: Vec<Option<ColorTargetState>>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            label: "Shaderwatch Pipeline".to_string(),
            vertex_entry_point: "vs_main".to_string(),
            fragment_entry_point: "fs_main".to_string(),
            compute_entry_point: "cs_main".to_string(),
            vertex_buffers: Vec::new(),
            primitive_topology: PrimitiveTopology::TriangleList,
            cull_mode: Some(Face::Back),
            depth_format: None,
            multisample: MultisampleState::default(),
            color_targets: vec![Some(ColorTargetState {
                format: TextureFormat::Bgra8Unorm,
                blend: Some(BlendState::REPLACE),
                write_mask: ColorWrites::ALL,
            })],
        }
    }
}

impl PipelineConfig {
    pub fn with_label(mut self, label: &str) -> Self {
        self.label = label.to_string();
        self
    }

    /// Set the vertex, fragment and compute entry point names
    pub fn with_entry_points(mut self, vertex: &str, fragment: &str, compute: &str) -> Self {
        self.vertex_entry_point = vertex.to_string();
        self.fragment_entry_point = fragment.to_string();
        self.compute_entry_point = compute.to_string();
        self
    }

    pub fn with_vertex_buffer(mut self, spec: VertexBufferSpec) -> Self {
        self.vertex_buffers.push(spec);
        self
    }

    /// Replace the color targets with a single target of `format`
    pub fn with_color_format(mut self, format: TextureFormat) -> Self {
        self.color_targets = vec![Some(ColorTargetState {
            format,
            blend: Some(BlendState::REPLACE),
            write_mask: ColorWrites::ALL,
        })];
        self
    }

    pub fn with_depth_format(mut self, format: TextureFormat) -> Self {
        self.depth_format = Some(format);
        self
    }

    pub fn with_cull_mode(mut self, cull_mode: Option<Face>) -> Self {
        self.cull_mode = cull_mode;
        self
    }

    pub fn with_primitive_topology(mut self, topology: PrimitiveTopology) -> Self {
        self.primitive_topology = topology;
        self
    }
}

/// A linked program
#[derive(Debug, Clone)]
pub enum LinkedPipeline {
    Render(RenderPipeline),
    Compute(ComputePipeline),
}

impl LinkedPipeline {
    fn bind_group_layout(&self, index: u32) -> BindGroupLayout {
        match self {
            LinkedPipeline::Render(pipeline) => pipeline.get_bind_group_layout(index),
            LinkedPipeline::Compute(pipeline) => pipeline.get_bind_group_layout(index),
        }
    }
}

struct StageSlot {
    kind: StageKind,
    source: String,
    module: Option<ShaderModule>,
    log: String,
}

struct ProgramSlot {
    stages: Vec<(StageKind, Option<ShaderModule>)>,
    pipeline: Option<LinkedPipeline>,
    log: String,
}

struct BufferSlot {
    buffer: Buffer,
}

#[derive(Default)]
struct State {
    next_id: u32,
    stages: HashMap<StageHandle, StageSlot>,
    programs: HashMap<ProgramHandle, ProgramSlot>,
    buffers: HashMap<BufferHandle, BufferSlot>,
    bound: HashMap<BufferTarget, BufferHandle>,
    bases: HashMap<(BufferTarget, u32), BufferHandle>,
    current: Option<(ProgramHandle, LinkedPipeline)>,
}

impl State {
    fn next_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }
}

/// [`GraphicsBackend`] over a wgpu device and queue
pub struct WgpuBackend {
    device: Arc<Device>,
    queue: Arc<Queue>,
    config: PipelineConfig,
    state: RefCell<State>,
}

impl WgpuBackend {
    pub fn new(device: Arc<Device>, queue: Arc<Queue>, config: PipelineConfig) -> Self {
        Self {
            device,
            queue,
            config,
            state: RefCell::new(State::default()),
        }
    }

    /// Request an adapter and device without a surface
    pub async fn headless(config: PipelineConfig) -> Result<Self, BackendInitError> {
        let instance = Instance::new(&InstanceDescriptor {
            backends: Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&RequestAdapterOptions {
                power_preference: PowerPreference::default(),
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await?;
        log::info!("Using adapter {:?}", adapter.get_info().name);

        let (device, queue) = adapter
            .request_device(&DeviceDescriptor {
                label: Some("Shaderwatch Device"),
                required_features: Features::empty(),
                required_limits: Limits::downlevel_defaults(),
                memory_hints: MemoryHints::default(),
                trace: Trace::Off,
            })
            .await?;

        Ok(Self::new(Arc::new(device), Arc::new(queue), config))
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn queue(&self) -> &Arc<Queue> {
        &self.queue
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Handle passed to the last `use_program`
    pub fn current_program(&self) -> Option<ProgramHandle> {
        self.state
            .borrow()
            .current
            .as_ref()
            .map(|(handle, _)| *handle)
    }

    /// Render pipeline selected by the last `use_program`
    ///
    /// It stays valid after its program is deleted, until another program is
    /// selected.
    pub fn current_render_pipeline(&self) -> Option<RenderPipeline> {
        match &self.state.borrow().current {
            Some((_, LinkedPipeline::Render(pipeline))) => Some(pipeline.clone()),
            _ => None,
        }
    }

    pub fn current_compute_pipeline(&self) -> Option<ComputePipeline> {
        match &self.state.borrow().current {
            Some((_, LinkedPipeline::Compute(pipeline))) => Some(pipeline.clone()),
            _ => None,
        }
    }

    /// Buffer attached to an indexed binding point
    pub fn bound_buffer(&self, target: BufferTarget, index: u32) -> Option<Buffer> {
        let state = self.state.borrow();
        let handle = state.bases.get(&(target, index))?;
        state.buffers.get(handle).map(|slot| slot.buffer.clone())
    }

    /// Bind group `group` of the program in use, with binding `n` set to the
    /// buffer attached to index `n` of `target`
    ///
    /// Every buffer attached to `target` becomes an entry, so the attached
    /// indices must be exactly the bindings the program declares in `group`.
    /// Returns `None` when they differ, e.g. after a reload that dropped a
    /// uniform, or when no program is in use.
    pub fn bind_group(&self, group: u32, target: BufferTarget) -> Option<BindGroup> {
        let state = self.state.borrow();
        let (program, pipeline) = state.current.as_ref()?;

        let mut bound: Vec<(u32, &Buffer)> = state
            .bases
            .iter()
            .filter(|((bound_target, _), _)| *bound_target == target)
            .filter_map(|((_, index), handle)| {
                state.buffers.get(handle).map(|slot| (*index, &slot.buffer))
            })
            .collect();
        bound.sort_by_key(|(index, _)| *index);

        let entries: Vec<BindGroupEntry> = bound
            .iter()
            .map(|(index, buffer)| BindGroupEntry {
                binding: *index,
                resource: buffer.as_entire_binding(),
            })
            .collect();

        let label = format!("{} Bind Group {}", self.config.label, group);
        let (bind_group, error) = self.validated(|| {
            let layout = pipeline.bind_group_layout(group);
            self.device.create_bind_group(&BindGroupDescriptor {
                label: Some(&label),
                layout: &layout,
                entries: &entries,
            })
        });

        match error {
            None => Some(bind_group),
            Some(error) => {
                log::warn!(
                    "{:?} buffers do not match group {} of {}: {}",
                    target,
                    group,
                    program,
                    error
                );
                None
            }
        }
    }

    /// Run `create` inside a validation error scope
    fn validated<T>(&self, create: impl FnOnce() -> T) -> (T, Option<Error>) {
        self.device.push_error_scope(ErrorFilter::Validation);
        let value = create();
        let error = pollster::block_on(self.device.pop_error_scope());
        (value, error)
    }

    fn create_pipeline(
        &self,
        program: ProgramHandle,
        stages: &[(StageKind, Option<ShaderModule>)],
    ) -> Result<LinkedPipeline, String> {
        let module = |kind: StageKind| {
            stages
                .iter()
                .find(|(stage_kind, _)| *stage_kind == kind)
                .and_then(|(_, module)| module.as_ref())
        };
        let label = format!("{} ({})", self.config.label, program);

        match (
            module(StageKind::Vertex),
            module(StageKind::Fragment),
            module(StageKind::Compute),
        ) {
            (Some(vertex), Some(fragment), None) if stages.len() == 2 => {
                let (pipeline, error) =
                    self.validated(|| self.create_render_pipeline(&label, vertex, fragment));
                match error {
                    None => Ok(LinkedPipeline::Render(pipeline)),
                    Some(error) => Err(error.to_string()),
                }
            }
            (None, None, Some(compute)) if stages.len() == 1 => {
                let (pipeline, error) = self.validated(|| {
                    self.device.create_compute_pipeline(&ComputePipelineDescriptor {
                        label: Some(&label),
                        layout: None,
                        module: compute,
                        entry_point: Some(&self.config.compute_entry_point),
                        compilation_options: PipelineCompilationOptions::default(),
                        cache: None,
                    })
                });
                match error {
                    None => Ok(LinkedPipeline::Compute(pipeline)),
                    Some(error) => Err(error.to_string()),
                }
            }
            _ if stages.iter().any(|(_, module)| module.is_none()) => {
                Err("an attached stage did not compile".to_string())
            }
            _ => Err(format!(
                "expected one vertex and one fragment stage, or one compute stage; got {:?}",
                stages.iter().map(|(kind, _)| *kind).collect::<Vec<_>>()
            )),
        }
    }

    fn create_render_pipeline(
        &self,
        label: &str,
        vertex: &ShaderModule,
        fragment: &ShaderModule,
    ) -> RenderPipeline {
        let vertex_buffers: Vec<VertexBufferLayout> = self
            .config
            .vertex_buffers
            .iter()
            .map(|spec| VertexBufferLayout {
                array_stride: spec.array_stride,
                step_mode: spec.step_mode,
                attributes: &spec.attributes,
            })
            .collect();

        self.device.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some(label),
            layout: None,
            vertex: VertexState {
                module: vertex,
                entry_point: Some(&self.config.vertex_entry_point),
                buffers: &vertex_buffers,
                compilation_options: PipelineCompilationOptions::default(),
            },
            fragment: Some(FragmentState {
                module: fragment,
                entry_point: Some(&self.config.fragment_entry_point),
                targets: &self.config.color_targets,
                compilation_options: PipelineCompilationOptions::default(),
            }),
            primitive: PrimitiveState {
                topology: self.config.primitive_topology,
                strip_index_format: None,
                front_face: FrontFace::Ccw,
                cull_mode: self.config.cull_mode,
                polygon_mode: PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: self.config.depth_format.map(|format| DepthStencilState {
                format,
                depth_write_enabled: true,
                depth_compare: CompareFunction::Less,
                stencil: StencilState::default(),
                bias: DepthBiasState::default(),
            }),
            multisample: self.config.multisample,
            multiview: None,
            cache: None,
        })
    }
}

impl GraphicsBackend for WgpuBackend {
    fn create_shader_stage(&self, kind: StageKind) -> StageHandle {
        let mut state = self.state.borrow_mut();
        let stage = StageHandle(state.next_id());
        state.stages.insert(
            stage,
            StageSlot {
                kind,
                source: String::new(),
                module: None,
                log: String::new(),
            },
        );
        stage
    }

    fn set_source(&self, stage: StageHandle, source: &str) {
        match self.state.borrow_mut().stages.get_mut(&stage) {
            Some(slot) => slot.source = source.to_string(),
            None => log::warn!("set_source on unknown {}", stage),
        }
    }

    fn compile(&self, stage: StageHandle) {
        let Some((kind, source)) = self
            .state
            .borrow()
            .stages
            .get(&stage)
            .map(|slot| (slot.kind, slot.source.clone()))
        else {
            log::warn!("compile on unknown {}", stage);
            return;
        };

        // No state borrow held while wgpu runs
        let label = format!("{} shader ({})", kind, stage);
        let (module, error) = self.validated(|| {
            self.device.create_shader_module(ShaderModuleDescriptor {
                label: Some(&label),
                source: ShaderSource::Wgsl(source.into()),
            })
        });

        if let Some(slot) = self.state.borrow_mut().stages.get_mut(&stage) {
            match error {
                None => {
                    slot.module = Some(module);
                    slot.log.clear();
                }
                Some(error) => {
                    slot.module = None;
                    slot.log = error.to_string();
                }
            }
        }
    }

    fn compile_status(&self, stage: StageHandle) -> bool {
        self.state
            .borrow()
            .stages
            .get(&stage)
            .is_some_and(|slot| slot.module.is_some())
    }

    fn compile_log(&self, stage: StageHandle) -> String {
        self.state
            .borrow()
            .stages
            .get(&stage)
            .map(|slot| slot.log.clone())
            .unwrap_or_default()
    }

    fn delete_stage(&self, stage: StageHandle) {
        if self.state.borrow_mut().stages.remove(&stage).is_none() {
            log::warn!("delete of unknown {}", stage);
        }
    }

    fn create_program(&self) -> ProgramHandle {
        let mut state = self.state.borrow_mut();
        let program = ProgramHandle(state.next_id());
        state.programs.insert(
            program,
            ProgramSlot {
                stages: Vec::new(),
                pipeline: None,
                log: String::new(),
            },
        );
        program
    }

    fn attach_stage(&self, program: ProgramHandle, stage: StageHandle) {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        let Some(attached) = state
            .stages
            .get(&stage)
            .map(|slot| (slot.kind, slot.module.clone()))
        else {
            log::warn!("attach of unknown {} to {}", stage, program);
            return;
        };
        match state.programs.get_mut(&program) {
            Some(slot) => slot.stages.push(attached),
            None => log::warn!("attach of {} to unknown {}", stage, program),
        }
    }

    fn link_program(&self, program: ProgramHandle) {
        let Some(stages) = self
            .state
            .borrow()
            .programs
            .get(&program)
            .map(|slot| slot.stages.clone())
        else {
            log::warn!("link of unknown {}", program);
            return;
        };

        let result = self.create_pipeline(program, &stages);

        if let Some(slot) = self.state.borrow_mut().programs.get_mut(&program) {
            match result {
                Ok(pipeline) => {
                    slot.pipeline = Some(pipeline);
                    slot.log.clear();
                }
                Err(log) => {
                    slot.pipeline = None;
                    slot.log = log;
                }
            }
        }
    }

    fn link_status(&self, program: ProgramHandle) -> bool {
        self.state
            .borrow()
            .programs
            .get(&program)
            .is_some_and(|slot| slot.pipeline.is_some())
    }

    fn link_log(&self, program: ProgramHandle) -> String {
        self.state
            .borrow()
            .programs
            .get(&program)
            .map(|slot| slot.log.clone())
            .unwrap_or_default()
    }

    fn delete_program(&self, program: ProgramHandle) {
        if self.state.borrow_mut().programs.remove(&program).is_none() {
            log::warn!("delete of unknown {}", program);
        }
    }

    fn use_program(&self, program: ProgramHandle) {
        let mut state = self.state.borrow_mut();
        let pipeline = state
            .programs
            .get(&program)
            .and_then(|slot| slot.pipeline.clone());
        match pipeline {
            Some(pipeline) => state.current = Some((program, pipeline)),
            None => log::warn!("use of unknown or unlinked {}", program),
        }
    }

    fn create_buffer(&self, target: BufferTarget, size_bytes: u64) -> BufferHandle {
        let usage = match target {
            BufferTarget::Uniform => BufferUsages::UNIFORM | BufferUsages::COPY_DST,
            BufferTarget::ShaderStorage => {
                BufferUsages::STORAGE | BufferUsages::COPY_DST | BufferUsages::COPY_SRC
            }
        };

        let mut state = self.state.borrow_mut();
        let handle = BufferHandle(state.next_id());
        let buffer = self.device.create_buffer(&BufferDescriptor {
            label: Some(&format!("{:?} Buffer ({})", target, handle)),
            size: size_bytes,
            usage,
            mapped_at_creation: false,
        });
        state.buffers.insert(handle, BufferSlot { buffer });
        handle
    }

    fn bind_buffer_base(&self, target: BufferTarget, index: u32, buffer: BufferHandle) {
        let mut state = self.state.borrow_mut();
        if state.buffers.contains_key(&buffer) {
            state.bases.insert((target, index), buffer);
        } else {
            log::warn!("bind_buffer_base of unknown {}", buffer);
        }
    }

    fn bind_buffer(&self, target: BufferTarget, buffer: Option<BufferHandle>) {
        let mut state = self.state.borrow_mut();
        match buffer {
            Some(buffer) => {
                state.bound.insert(target, buffer);
            }
            None => {
                state.bound.remove(&target);
            }
        }
    }

    fn write_buffer_range(&self, target: BufferTarget, offset_bytes: u64, data: &[u8]) {
        let state = self.state.borrow();
        let slot = state
            .bound
            .get(&target)
            .and_then(|handle| state.buffers.get(handle));
        match slot {
            Some(slot) => self.queue.write_buffer(&slot.buffer, offset_bytes, data),
            None => log::warn!("write to {:?} with no buffer bound", target),
        }
    }

    fn delete_buffer(&self, buffer: BufferHandle) {
        let mut state = self.state.borrow_mut();
        match state.buffers.remove(&buffer) {
            Some(slot) => {
                slot.buffer.destroy();
                state.bound.retain(|_, bound| *bound != buffer);
                state.bases.retain(|_, bound| *bound != buffer);
            }
            None => log::warn!("delete of unknown {}", buffer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_config_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.vertex_entry_point, "vs_main");
        assert_eq!(config.fragment_entry_point, "fs_main");
        assert_eq!(config.compute_entry_point, "cs_main");
        assert!(config.depth_format.is_none());
        assert_eq!(config.color_targets.len(), 1);
    }

    #[test]
    fn test_pipeline_config_builders() {
        let config = PipelineConfig::default()
            .with_label("Demo")
            .with_color_format(TextureFormat::Rgba8Unorm)
            .with_depth_format(TextureFormat::Depth32Float)
            .with_cull_mode(None)
            .with_vertex_buffer(VertexBufferSpec {
                array_stride: 12,
                step_mode: VertexStepMode::Vertex,
                attributes: vec![VertexAttribute {
                    format: VertexFormat::Float32x3,
                    offset: 0,
                    shader_location: 0,
                }],
            });

        assert_eq!(config.label, "Demo");
        assert_eq!(
            config.color_targets[0].as_ref().map(|target| target.format),
            Some(TextureFormat::Rgba8Unorm)
        );
        assert_eq!(config.depth_format, Some(TextureFormat::Depth32Float));
        assert!(config.cull_mode.is_none());
        assert_eq!(config.vertex_buffers.len(), 1);
    }
}
