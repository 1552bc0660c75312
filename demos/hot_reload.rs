// demos/hot_reload.rs
//! Headless hot-reload loop
//!
//! Builds the triangle program from `demos/shaders`, then polls the files and
//! renders into an offscreen texture. Edit either shader while this runs; a
//! broken edit is logged and the previous program keeps rendering.
//!
//! ```text
//! RUST_LOG=info cargo run --example hot_reload -- 30
//! ```

use std::{path::PathBuf, rc::Rc, thread, time::Duration};

use anyhow::Context;
use cgmath::Vector3;
use shaderwatch::{
    backend::PipelineConfig, BufferTarget, ShaderRegistry, UniformMarshaler, WgpuBackend,
};

const SIZE: u32 = 256;
const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let seconds: u64 = match std::env::args().nth(1) {
        Some(arg) => arg.parse().context("duration must be whole seconds")?,
        None => 10,
    };

    let config = PipelineConfig::default()
        .with_label("Hot Reload Demo")
        .with_color_format(FORMAT)
        .with_cull_mode(None);
    let backend = Rc::new(pollster::block_on(WgpuBackend::headless(config))?);

    let shaders = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("demos/shaders");
    let vertex_path = shaders.join("triangle.vert.wgsl");
    let fragment_path = shaders.join("triangle.frag.wgsl");

    let mut registry = ShaderRegistry::new(backend.clone());
    let mut program = registry
        .register(&vertex_path, &fragment_path)
        .context("initial shader build failed")?;
    registry.use_program(program)?;

    let marshaler = UniformMarshaler::new(backend.clone());
    let mut palette = [
        Vector3::new(1.0f32, 0.0, 0.0),
        Vector3::new(0.0, 1.0, 0.0),
        Vector3::new(0.0, 0.0, 1.0),
    ];
    let mut colors = marshaler.create_buffer_for(BufferTarget::Uniform, 0, &palette)?;

    let target = backend.device().create_texture(&wgpu::TextureDescriptor {
        label: Some("Offscreen Target"),
        size: wgpu::Extent3d {
            width: SIZE,
            height: SIZE,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    let view = target.create_view(&wgpu::TextureViewDescriptor::default());

    for frame in 0..seconds * 10 {
        let report = registry.check_for_changes();
        if let Some(new) = report.replacement_for(program) {
            log::info!("Now rendering with {}", new);
            program = new;
        }
        if report.failed.contains(&program) {
            log::warn!("Shader edit rejected, still rendering with {}", program);
        }

        palette.rotate_left(usize::from(frame % 10 == 0));
        marshaler.update_elements(&mut colors, &palette)?;

        render(&backend, &view)?;
        thread::sleep(Duration::from_millis(100));
    }

    log::info!("{:?}", registry.stats());
    Ok(())
}

fn render(backend: &WgpuBackend, view: &wgpu::TextureView) -> anyhow::Result<()> {
    let pipeline = backend
        .current_render_pipeline()
        .context("no render program in use")?;
    // The current shaders may no longer declare the palette uniform
    let Some(bind_group) = backend.bind_group(0, BufferTarget::Uniform) else {
        return Ok(());
    };

    let mut encoder = backend.device().create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Hot Reload Encoder"),
    });
    {
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Hot Reload Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(&pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.draw(0..3, 0..1);
    }
    backend.queue().submit(Some(encoder.finish()));
    Ok(())
}
