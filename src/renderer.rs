use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::{info, warn};

use crate::capability::{CapabilityDetector, StaticCapabilities, select_backend};
use crate::config::{BackendPreference, RenderConfig};
use crate::control::ControlHandle;
use crate::engine::{Backend, CpuBackend, RenderEngine, ReplayBackend};
use crate::gpu::GpuReplay;
use crate::processing::layout::OutputSize;
use crate::scheduler::Scheduler;

/// Shared rendering services: the engine, the capability detector, the
/// scheduler and the output size policy. Contexts borrow it at creation.
#[derive(Clone)]
pub struct Renderer {
    scheduler: Scheduler,
    detector: Arc<dyn CapabilityDetector>,
    max_output_pixels: Option<u64>,
}

impl Renderer {
    pub fn new(
        engine: RenderEngine,
        detector: Arc<dyn CapabilityDetector>,
        runtime: Handle,
        control: ControlHandle,
    ) -> Self {
        Self {
            scheduler: Scheduler::new(runtime, control, Arc::new(engine)),
            detector,
            max_output_pixels: None,
        }
    }

    /// Build a renderer from configuration, probing for a GPU unless the
    /// configuration pins the CPU. A missing adapter is not an error.
    pub fn from_config(config: &RenderConfig, runtime: Handle, control: ControlHandle) -> Self {
        let cpu = CpuBackend::new(config.resample_filter);
        let gpu = match config.backend {
            BackendPreference::Cpu => {
                info!("gpu disabled by configuration");
                None
            }
            BackendPreference::Auto => match GpuReplay::new() {
                Ok(gpu) => Some(gpu),
                Err(err) => {
                    warn!("gpu unavailable; rendering on cpu: {err:?}");
                    None
                }
            },
        };
        let detector: Arc<dyn CapabilityDetector> = match (config.max_texture_dimension, &gpu) {
            (Some(dim), _) => Arc::new(StaticCapabilities::new(dim)),
            (None, Some(gpu)) => Arc::new(gpu.capabilities().clone()),
            (None, None) => Arc::new(StaticCapabilities::new(config.fallback_texture_dimension)),
        };
        let gpu = gpu.map(|gpu| Arc::new(gpu) as Arc<dyn ReplayBackend>);
        Self::new(RenderEngine::new(cpu, gpu), detector, runtime, control)
            .with_max_output_pixels(config.max_output_pixels)
    }

    /// Cap every context's output at `max` pixels, preserving aspect ratio.
    pub fn with_max_output_pixels(mut self, max: Option<u64>) -> Self {
        self.max_output_pixels = max;
        self
    }

    pub fn engine(&self) -> &RenderEngine {
        self.scheduler.engine()
    }

    pub fn detector(&self) -> &dyn CapabilityDetector {
        self.detector.as_ref()
    }

    pub(crate) fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub(crate) fn backend_for(&self, width: u32, height: u32) -> Backend {
        select_backend(self.detector.as_ref(), self.engine().has_gpu(), width, height)
    }

    /// Apply the pixel cap to a requested output size.
    pub fn output_size(&self, requested: OutputSize) -> OutputSize {
        match self.max_output_pixels {
            Some(max) => requested.cap_pixels(max),
            None => requested,
        }
    }
}
