//! Hardware capability queries behind the GPU/CPU dispatch decision.

use tracing::debug;

use crate::engine::Backend;

/// Reports the rendering hardware's texture limit.
///
/// The limit varies by device and driver generation, so it is always queried
/// and never assumed.
pub trait CapabilityDetector: Send + Sync {
    /// Maximum supported texture edge length, in pixels. Always positive.
    fn max_texture_dimension(&self) -> u32;

    /// True iff both edges fit under [`max_texture_dimension`](Self::max_texture_dimension).
    fn can_use_gpu(&self, width: u32, height: u32) -> bool {
        let max = self.max_texture_dimension();
        width <= max && height <= max
    }
}

/// A fixed texture limit: a configured override, the fallback when no adapter
/// can be queried, or a test double.
#[derive(Debug, Clone, Copy)]
pub struct StaticCapabilities {
    max_texture_dimension: u32,
}

impl StaticCapabilities {
    pub fn new(max_texture_dimension: u32) -> Self {
        Self {
            max_texture_dimension: max_texture_dimension.max(1),
        }
    }
}

impl CapabilityDetector for StaticCapabilities {
    fn max_texture_dimension(&self) -> u32 {
        self.max_texture_dimension
    }
}

/// Limits reported by a wgpu device.
#[derive(Debug, Clone)]
pub struct WgpuCapabilities {
    max_texture_dimension: u32,
    max_storage_buffer_binding: u64,
    adapter_name: String,
}

impl WgpuCapabilities {
    pub fn from_limits(limits: &wgpu::Limits, adapter_name: impl Into<String>) -> Self {
        Self {
            max_texture_dimension: limits.max_texture_dimension_2d.max(1),
            max_storage_buffer_binding: u64::from(limits.max_storage_buffer_binding_size),
            adapter_name: adapter_name.into(),
        }
    }

    /// Largest storage buffer a single replay pass may bind.
    pub fn max_storage_buffer_binding(&self) -> u64 {
        self.max_storage_buffer_binding
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }
}

impl CapabilityDetector for WgpuCapabilities {
    fn max_texture_dimension(&self) -> u32 {
        self.max_texture_dimension
    }
}

/// The dispatch decision, made once per context.
///
/// GPU iff a GPU backend exists and the source fits its textures.
pub fn select_backend(
    detector: &dyn CapabilityDetector,
    gpu_available: bool,
    width: u32,
    height: u32,
) -> Backend {
    let fits = detector.can_use_gpu(width, height);
    let backend = if gpu_available && fits {
        Backend::Gpu
    } else {
        Backend::Cpu
    };
    debug!(
        width,
        height,
        max_texture_dimension = detector.max_texture_dimension(),
        gpu_available,
        %backend,
        "selected replay backend"
    );
    backend
}
