// tests/wgpu_backend.rs
//! WgpuBackend on a real headless device
//!
//! Each test returns early when no adapter is available.

use std::{
    fs::{self, File},
    path::{Path, PathBuf},
    rc::Rc,
    time::{Duration, SystemTime},
};

use shaderwatch::{
    backend::PipelineConfig,
    shader::{compile, link},
    BufferTarget, GraphicsBackend, ShaderError, ShaderRegistry, StageKind, UniformBuffer,
    UniformMarshaler, WgpuBackend,
};
use tempfile::TempDir;

const VERTEX: &str = r#"
struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) color: vec4<f32>,
};

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> VertexOutput {
    var out: VertexOutput;
    out.position = vec4<f32>(f32(i32(index) - 1), 0.0, 0.0, 1.0);
    out.color = vec4<f32>(1.0, 1.0, 1.0, 1.0);
    return out;
}
"#;

const FRAGMENT_PLAIN: &str = r#"
@fragment
fn fs_main(@location(0) color: vec4<f32>) -> @location(0) vec4<f32> {
    return color;
}
"#;

const FRAGMENT_TINTED: &str = r#"
@group(0) @binding(0)
var<uniform> tint: vec4<f32>;

@fragment
fn fs_main(@location(0) color: vec4<f32>) -> @location(0) vec4<f32> {
    return color * tint;
}
"#;

// Reads a location the vertex stage never writes
const FRAGMENT_MISMATCHED: &str = r#"
@fragment
fn fs_main(@location(3) color: vec4<f32>) -> @location(0) vec4<f32> {
    return color;
}
"#;

const FRAGMENT_BROKEN: &str = "@fragment fn fs_main( -> {";

fn backend() -> Option<Rc<WgpuBackend>> {
    let config = PipelineConfig::default()
        .with_label("Test Pipeline")
        .with_color_format(wgpu::TextureFormat::Rgba8Unorm)
        .with_cull_mode(None);
    match pollster::block_on(WgpuBackend::headless(config)) {
        Ok(backend) => Some(Rc::new(backend)),
        Err(err) => {
            eprintln!("no headless device, skipping: {err}");
            None
        }
    }
}

fn write_shader(path: &Path, text: &str, secs: u64) {
    fs::write(path, text).unwrap();
    File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(secs))
        .unwrap();
}

fn shader_pair(dir: &TempDir, fragment: &str) -> (PathBuf, PathBuf) {
    let vertex_path = dir.path().join("shader.vert.wgsl");
    let fragment_path = dir.path().join("shader.frag.wgsl");
    write_shader(&vertex_path, VERTEX, 1_000);
    write_shader(&fragment_path, fragment, 1_000);
    (vertex_path, fragment_path)
}

#[test]
fn test_wgsl_syntax_error_is_a_compile_error() {
    let Some(backend) = backend() else {
        return;
    };

    let failure = compile(&backend, FRAGMENT_BROKEN, StageKind::Fragment).unwrap_err();

    assert!(!backend.compile_status(failure.object().handle()));
    match failure.error() {
        ShaderError::Compile { stage, log } => {
            assert_eq!(*stage, StageKind::Fragment);
            assert!(!log.is_empty());
        }
        other => panic!("expected a compile error, got {other:?}"),
    }
}

#[test]
fn test_mismatched_stages_fail_to_link() {
    let Some(backend) = backend() else {
        return;
    };

    let vertex = compile(&backend, VERTEX, StageKind::Vertex).unwrap();
    let fragment = compile(&backend, FRAGMENT_MISMATCHED, StageKind::Fragment).unwrap();
    let failure = link(&backend, vertex, fragment).unwrap_err();

    assert!(matches!(failure.error(), ShaderError::Link { log } if !log.is_empty()));
    assert!(!backend.link_status(failure.object().handle()));
}

#[test]
fn test_use_program_selects_render_pipeline() {
    let Some(backend) = backend() else {
        return;
    };
    let dir = tempfile::tempdir().unwrap();
    let (vertex, fragment) = shader_pair(&dir, FRAGMENT_PLAIN);
    let mut registry = ShaderRegistry::new(backend.clone());

    assert!(backend.current_render_pipeline().is_none());
    let handle = registry.register(&vertex, &fragment).unwrap();
    registry.use_program(handle).unwrap();

    assert_eq!(backend.current_program(), Some(handle));
    assert!(backend.current_render_pipeline().is_some());
    assert!(backend.current_compute_pipeline().is_none());
}

#[test]
fn test_reload_keeps_program_on_failure_and_swaps_on_success() {
    let Some(backend) = backend() else {
        return;
    };
    let dir = tempfile::tempdir().unwrap();
    let (vertex, fragment) = shader_pair(&dir, FRAGMENT_PLAIN);
    let mut registry = ShaderRegistry::new(backend.clone());
    let old = registry.register(&vertex, &fragment).unwrap();
    registry.use_program(old).unwrap();

    write_shader(&fragment, FRAGMENT_BROKEN, 2_000);
    assert_eq!(registry.check_for_changes().failed, vec![old]);

    write_shader(&fragment, FRAGMENT_MISMATCHED, 3_000);
    assert_eq!(registry.check_for_changes().failed, vec![old]);
    assert_eq!(backend.current_program(), Some(old));
    assert!(backend.current_render_pipeline().is_some());

    write_shader(&fragment, FRAGMENT_TINTED, 4_000);
    let new = registry.check_for_changes().replacement_for(old).unwrap();
    assert_ne!(new, old);
    assert_eq!(backend.current_program(), Some(new));
    assert!(!registry.contains(old));
}

#[test]
fn test_bind_group_follows_program_bindings() {
    let Some(backend) = backend() else {
        return;
    };
    let dir = tempfile::tempdir().unwrap();
    let (vertex, fragment) = shader_pair(&dir, FRAGMENT_TINTED);
    let mut registry = ShaderRegistry::new(backend.clone());
    let marshaler = UniformMarshaler::new(backend.clone());

    let handle = registry.register(&vertex, &fragment).unwrap();
    registry.use_program(handle).unwrap();
    let _tint = marshaler
        .create_buffer_for(BufferTarget::Uniform, 0, &[[0.5f32, 0.5, 0.5]])
        .unwrap();
    assert!(backend.bind_group(0, BufferTarget::Uniform).is_some());

    // A valid edit that drops the uniform leaves group 0 empty
    write_shader(&fragment, FRAGMENT_PLAIN, 2_000);
    let report = registry.check_for_changes();
    assert!(report.replacement_for(handle).is_some());
    assert!(backend.bind_group(0, BufferTarget::Uniform).is_none());
}

#[test]
fn test_bind_group_without_program_in_use() {
    let Some(backend) = backend() else {
        return;
    };
    let _buffer = UniformBuffer::new_uniform(&backend, 0, 16);

    assert!(backend.bind_group(0, BufferTarget::Uniform).is_none());
}

#[test]
fn test_writes_reach_the_bound_buffer() {
    let Some(backend) = backend() else {
        return;
    };
    let marshaler = UniformMarshaler::new(backend.clone());
    let data = [[1.0f64, 2.0, 3.0], [4.0, 5.0, 6.0]];
    let _buffer = marshaler
        .create_buffer_for(BufferTarget::ShaderStorage, 1, &data)
        .unwrap();

    let device = backend.device();
    let source = backend
        .bound_buffer(BufferTarget::ShaderStorage, 1)
        .unwrap();
    let readback = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Readback"),
        size: 32,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Readback Encoder"),
    });
    encoder.copy_buffer_to_buffer(&source, 0, &readback, 0, 32);
    backend.queue().submit(Some(encoder.finish()));

    let slice = readback.slice(..);
    slice.map_async(wgpu::MapMode::Read, |result| result.unwrap());
    device.poll(wgpu::PollType::Wait).unwrap();

    let floats: Vec<f32> = slice
        .get_mapped_range()
        .chunks_exact(4)
        .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    assert_eq!(floats, vec![1.0, 2.0, 3.0, 0.0, 4.0, 5.0, 6.0, 0.0]);
}
