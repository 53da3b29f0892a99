//! wgpu compute replay.
//!
//! The working image lives in a storage buffer of packed RGBA8 texels. Each
//! action becomes one or two compute passes recorded into a single encoder;
//! the result is copied into a staging buffer and read back once at the end.

use std::sync::{Mutex, mpsc};

use anyhow::{Context, Result, anyhow, bail};
use bytemuck::{Pod, Zeroable};
use image::RgbaImage;
use tracing::{debug, info};
use wgpu::util::DeviceExt;

use crate::action::{EditAction, FlipAxis};
use crate::capability::{CapabilityDetector, WgpuCapabilities};
use crate::engine::ReplayBackend;
use crate::error::BackendError;
use crate::processing::blur::blur_kernel;
use crate::processing::layout::OutputSize;

const WORKGROUP: u32 = 16;

/// GPU replay backend. One device per process; passes are serialized on it.
pub struct GpuReplay {
    context: Mutex<GpuContext>,
    capabilities: WgpuCapabilities,
}

impl GpuReplay {
    /// Acquire an adapter and device and compile the replay kernels.
    pub fn new() -> Result<Self> {
        let context = GpuContext::new()?;
        let capabilities = context.capabilities.clone();
        info!(
            adapter = capabilities.adapter_name(),
            max_texture_dimension = capabilities.max_texture_dimension(),
            "gpu replay backend ready"
        );
        Ok(Self {
            context: Mutex::new(context),
            capabilities,
        })
    }

    pub fn capabilities(&self) -> &WgpuCapabilities {
        &self.capabilities
    }

    /// Reject work whose source or any intermediate would not fit the device.
    fn check_budget(
        &self,
        actions: &[EditAction],
        source: &RgbaImage,
        target: OutputSize,
    ) -> Result<(), BackendError> {
        let (width, height) = source.dimensions();
        if !self.capabilities.can_use_gpu(width, height) {
            return Err(BackendError::OverBudget {
                width,
                height,
                reason: "source exceeds max texture dimension",
            });
        }
        let mut dims = (width, height);
        let mut largest = u64::from(width) * u64::from(height);
        for action in actions {
            dims = action.output_dimensions(dims.0, dims.1)?;
            largest = largest.max(u64::from(dims.0) * u64::from(dims.1));
        }
        largest = largest.max(target.pixel_count());
        if largest * 4 > self.capabilities.max_storage_buffer_binding() {
            return Err(BackendError::OverBudget {
                width,
                height,
                reason: "working buffer exceeds storage binding limit",
            });
        }
        Ok(())
    }
}

impl ReplayBackend for GpuReplay {
    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn apply(
        &self,
        actions: &[EditAction],
        source: &RgbaImage,
        target: OutputSize,
    ) -> Result<RgbaImage, BackendError> {
        if source.width() == 0 || source.height() == 0 {
            return Err(BackendError::invalid_action("cannot replay onto an empty image"));
        }
        self.check_budget(actions, source, target)?;
        let guard = self
            .context
            .lock()
            .map_err(|_| BackendError::Gpu(anyhow!("gpu context mutex poisoned")))?;
        guard.replay(actions, source, target).map_err(|err| {
            match err.downcast::<BackendError>() {
                Ok(backend) => backend,
                Err(other) => BackendError::Gpu(other),
            }
        })
    }
}

#[repr(C)]
#[derive(Clone, Copy, Default, Pod, Zeroable)]
struct PassUniform {
    src_width: u32,
    src_height: u32,
    dst_width: u32,
    dst_height: u32,
    m00: i32,
    m01: i32,
    m10: i32,
    m11: i32,
    tx: i32,
    ty: i32,
    radius: u32,
    direction: u32,
    brightness: f32,
    contrast: f32,
    saturation: f32,
    _pad: f32,
}

/// Integer map from output to source coordinates:
/// `sx = m00*x + m01*y + tx`, `sy = m10*x + m11*y + ty`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Remap {
    m: [i32; 4],
    t: [i32; 2],
    width: u32,
    height: u32,
}

impl Remap {
    /// Geometry of a crop, rotate or flip applied to a `width x height`
    /// image. `None` for identities and non-geometric actions.
    fn for_action(action: &EditAction, width: u32, height: u32) -> Result<Option<Self>, BackendError> {
        let w = width as i32;
        let h = height as i32;
        let remap = match *action {
            EditAction::Crop { .. } => {
                let rect = action.crop_rect(width, height)?;
                if rect.width == width && rect.height == height {
                    return Ok(None);
                }
                Self {
                    m: [1, 0, 0, 1],
                    t: [rect.x as i32, rect.y as i32],
                    width: rect.width,
                    height: rect.height,
                }
            }
            EditAction::Rotate { turns } => match turns % 4 {
                1 => Self {
                    m: [0, 1, -1, 0],
                    t: [0, h - 1],
                    width: height,
                    height: width,
                },
                2 => Self {
                    m: [-1, 0, 0, -1],
                    t: [w - 1, h - 1],
                    width,
                    height,
                },
                3 => Self {
                    m: [0, -1, 1, 0],
                    t: [w - 1, 0],
                    width: height,
                    height: width,
                },
                _ => return Ok(None),
            },
            EditAction::Flip {
                axis: FlipAxis::Horizontal,
            } => Self {
                m: [-1, 0, 0, 1],
                t: [w - 1, 0],
                width,
                height,
            },
            EditAction::Flip {
                axis: FlipAxis::Vertical,
            } => Self {
                m: [1, 0, 0, -1],
                t: [0, h - 1],
                width,
                height,
            },
            EditAction::Adjust { .. } | EditAction::Blur { .. } => return Ok(None),
        };
        Ok(Some(remap))
    }
}

struct Surface {
    buffer: wgpu::Buffer,
    width: u32,
    height: u32,
}

impl Surface {
    fn byte_len(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height) * 4
    }
}

struct Pipelines {
    remap: wgpu::ComputePipeline,
    adjust: wgpu::ComputePipeline,
    blur: wgpu::ComputePipeline,
    resample: wgpu::ComputePipeline,
}

struct GpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    layout: wgpu::BindGroupLayout,
    pipelines: Pipelines,
    unit_weights: wgpu::Buffer,
    capabilities: WgpuCapabilities,
}

impl GpuContext {
    fn new() -> Result<Self> {
        let instance = wgpu::Instance::default();
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .context("request wgpu adapter")?;
        let limits = adapter.limits();
        let capabilities = WgpuCapabilities::from_limits(&limits, adapter.get_info().name);
        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("replay-device"),
            required_features: wgpu::Features::empty(),
            required_limits: limits,
            memory_hints: wgpu::MemoryHints::default(),
            trace: wgpu::Trace::default(),
        }))
        .context("request wgpu device")?;
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("replay-kernels"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/replay.wgsl").into()),
        });
        let storage = |binding, read_only| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("replay-layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                storage(1, true),
                storage(2, false),
                storage(3, true),
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("replay-pipeline-layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let pipeline = |entry_point: &'static str| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(entry_point),
                layout: Some(&pipeline_layout),
                module: &shader,
                entry_point: Some(entry_point),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            })
        };
        let pipelines = Pipelines {
            remap: pipeline("remap"),
            adjust: pipeline("adjust"),
            blur: pipeline("blur"),
            resample: pipeline("resample"),
        };
        let unit_weights = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("replay-unit-weights"),
            contents: bytemuck::cast_slice(&[1.0f32]),
            usage: wgpu::BufferUsages::STORAGE,
        });
        Ok(Self {
            device,
            queue,
            layout,
            pipelines,
            unit_weights,
            capabilities,
        })
    }

    fn replay(
        &self,
        actions: &[EditAction],
        source: &RgbaImage,
        target: OutputSize,
    ) -> Result<RgbaImage> {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let recorded = self
            .record(actions, source, target)
            .map(|(current, staging, commands)| {
                self.queue.submit(Some(commands));
                (current, staging)
            });
        let validation = pollster::block_on(self.device.pop_error_scope());
        let out_of_memory = pollster::block_on(self.device.pop_error_scope());
        let (current, staging) = recorded?;
        if let Some(err) = validation {
            bail!("gpu validation error: {err}");
        }
        if let Some(err) = out_of_memory {
            bail!("gpu out of memory: {err}");
        }

        let slice = staging.slice(..);
        let (sender, receiver) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |res| {
            let _ = sender.send(res);
        });
        self.device
            .poll(wgpu::PollType::Wait)
            .context("wait for replay submission")?;
        receiver
            .recv()
            .context("receive map result")?
            .context("map readback buffer")?;
        let data = slice.get_mapped_range();
        let pixels = data.to_vec();
        drop(data);
        staging.unmap();
        debug!(
            actions = actions.len(),
            width = current.width,
            height = current.height,
            "gpu replay read back"
        );
        RgbaImage::from_raw(current.width, current.height, pixels)
            .ok_or_else(|| anyhow!("readback size does not match {}x{}", current.width, current.height))
    }

    /// Encode every pass plus the copy into a staging buffer.
    fn record(
        &self,
        actions: &[EditAction],
        source: &RgbaImage,
        target: OutputSize,
    ) -> Result<(Surface, wgpu::Buffer, wgpu::CommandBuffer)> {
        let mut current = Surface {
            buffer: self
                .device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("replay-source"),
                    contents: source.as_raw(),
                    usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
                }),
            width: source.width(),
            height: source.height(),
        };
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("replay-command"),
            });
        for action in actions {
            current = self.encode_action(&mut encoder, current, action)?;
        }
        if current.width != target.width || current.height != target.height {
            current = self.pass(
                &mut encoder,
                &self.pipelines.resample,
                &current,
                target.width,
                target.height,
                PassUniform::default(),
                None,
            );
        }
        let size = current.byte_len();
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("replay-readback"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        encoder.copy_buffer_to_buffer(&current.buffer, 0, &staging, 0, size);
        Ok((current, staging, encoder.finish()))
    }

    fn encode_action(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        current: Surface,
        action: &EditAction,
    ) -> Result<Surface> {
        if let Some(remap) = Remap::for_action(action, current.width, current.height)? {
            let params = PassUniform {
                m00: remap.m[0],
                m01: remap.m[1],
                m10: remap.m[2],
                m11: remap.m[3],
                tx: remap.t[0],
                ty: remap.t[1],
                ..PassUniform::default()
            };
            return Ok(self.pass(
                encoder,
                &self.pipelines.remap,
                &current,
                remap.width,
                remap.height,
                params,
                None,
            ));
        }
        match *action {
            EditAction::Adjust {
                brightness,
                contrast,
                saturation,
            } => {
                if brightness.abs() <= f32::EPSILON
                    && (contrast - 1.0).abs() <= f32::EPSILON
                    && (saturation - 1.0).abs() <= f32::EPSILON
                {
                    return Ok(current);
                }
                let params = PassUniform {
                    brightness: brightness.clamp(-1.0, 1.0),
                    contrast: contrast.max(0.0),
                    saturation: saturation.max(0.0),
                    ..PassUniform::default()
                };
                Ok(self.pass(
                    encoder,
                    &self.pipelines.adjust,
                    &current,
                    current.width,
                    current.height,
                    params,
                    None,
                ))
            }
            EditAction::Blur { sigma } => {
                let Some((weights, radius)) = blur_kernel(sigma, current.width, current.height)?
                else {
                    return Ok(current);
                };
                let weights = self
                    .device
                    .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                        label: Some("replay-blur-weights"),
                        contents: bytemuck::cast_slice(&weights),
                        usage: wgpu::BufferUsages::STORAGE,
                    });
                let (width, height) = (current.width, current.height);
                let mut out = current;
                for direction in 0..2u32 {
                    let params = PassUniform {
                        radius,
                        direction,
                        ..PassUniform::default()
                    };
                    out = self.pass(
                        encoder,
                        &self.pipelines.blur,
                        &out,
                        width,
                        height,
                        params,
                        Some(&weights),
                    );
                }
                Ok(out)
            }
            _ => Ok(current),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn pass(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        pipeline: &wgpu::ComputePipeline,
        input: &Surface,
        width: u32,
        height: u32,
        mut params: PassUniform,
        weights: Option<&wgpu::Buffer>,
    ) -> Surface {
        params.src_width = input.width;
        params.src_height = input.height;
        params.dst_width = width;
        params.dst_height = height;
        let output = Surface {
            buffer: self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("replay-working"),
                size: u64::from(width) * u64::from(height) * 4,
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            }),
            width,
            height,
        };
        let uniform = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("replay-params"),
                contents: bytemuck::bytes_of(&params),
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let bind = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("replay-bind"),
            layout: &self.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: uniform.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: input.buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: output.buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: weights.unwrap_or(&self.unit_weights).as_entire_binding(),
                },
            ],
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("replay-pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind, &[]);
            pass.dispatch_workgroups(width.div_ceil(WORKGROUP), height.div_ceil(WORKGROUP), 1);
        }
        output
    }
}
