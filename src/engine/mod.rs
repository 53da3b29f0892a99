//! Replay engine: the two execution strategies and the GPU→CPU fallback.
//!
//! Backends only know how to turn an ordered action list into pixels. They
//! never observe cancellation or session state; the scheduler enforces both
//! around them.

pub mod cpu;

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use image::RgbaImage;
use tracing::{debug, warn};

use crate::action::EditAction;
use crate::error::BackendError;
use crate::processing::layout::OutputSize;

pub use cpu::CpuBackend;

/// Execution strategy chosen for a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Gpu,
    Cpu,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gpu => "gpu",
            Self::Cpu => "cpu",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Replays an ordered action list onto a source image and resamples the result
/// to `target`.
///
/// Implementations must process actions strictly in order and be
/// deterministic for identical inputs.
pub trait ReplayBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn apply(
        &self,
        actions: &[EditAction],
        source: &RgbaImage,
        target: OutputSize,
    ) -> Result<RgbaImage, BackendError>;
}

#[derive(Debug, Default)]
struct EngineCounters {
    renders: AtomicU64,
    actions_replayed: AtomicU64,
    gpu_fallbacks: AtomicU64,
    failures: AtomicU64,
}

/// Point-in-time copy of the engine counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Images produced, on either backend.
    pub renders: u64,
    /// Actions applied by the CPU backend or in successful GPU batches.
    pub actions_replayed: u64,
    /// GPU batches that were retried on the CPU.
    pub gpu_fallbacks: u64,
    /// Replays that produced no image at all.
    pub failures: u64,
}

pub struct RenderEngine {
    cpu: CpuBackend,
    gpu: Option<Arc<dyn ReplayBackend>>,
    counters: EngineCounters,
}

impl RenderEngine {
    pub fn new(cpu: CpuBackend, gpu: Option<Arc<dyn ReplayBackend>>) -> Self {
        Self {
            cpu,
            gpu,
            counters: EngineCounters::default(),
        }
    }

    pub fn cpu_only(cpu: CpuBackend) -> Self {
        Self::new(cpu, None)
    }

    pub fn has_gpu(&self) -> bool {
        self.gpu.is_some()
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            renders: self.counters.renders.load(Ordering::Relaxed),
            actions_replayed: self.counters.actions_replayed.load(Ordering::Relaxed),
            gpu_fallbacks: self.counters.gpu_fallbacks.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
        }
    }

    /// Replay the whole list in one batch on `backend`.
    ///
    /// A GPU failure of any kind, including a panic inside the driver layer,
    /// is retried on the CPU. A GPU result whose size differs from `target` is
    /// treated as a failure.
    pub fn apply(
        &self,
        backend: Backend,
        actions: &[EditAction],
        source: &RgbaImage,
        target: OutputSize,
    ) -> Result<RgbaImage, BackendError> {
        if backend == Backend::Gpu {
            match self.try_gpu(actions, source, target) {
                Ok(image) => {
                    self.counters
                        .actions_replayed
                        .fetch_add(actions.len() as u64, Ordering::Relaxed);
                    self.counters.renders.fetch_add(1, Ordering::Relaxed);
                    return Ok(image);
                }
                Err(err) => {
                    warn!(error = %err, "gpu replay failed; retrying on cpu");
                    self.counters.gpu_fallbacks.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        let image = actions
            .iter()
            .try_fold(source.clone(), |image, action| {
                self.apply_action(image, action)
            })?;
        self.finish(image, target)
    }

    fn try_gpu(
        &self,
        actions: &[EditAction],
        source: &RgbaImage,
        target: OutputSize,
    ) -> Result<RgbaImage, BackendError> {
        let gpu = self
            .gpu
            .as_ref()
            .ok_or_else(|| BackendError::Unavailable("no gpu backend configured".into()))?;
        let image = catch_unwind(AssertUnwindSafe(|| gpu.apply(actions, source, target)))
            .map_err(|_| BackendError::Worker(format!("{} backend panicked", gpu.name())))??;
        if image.width() != target.width || image.height() != target.height {
            return Err(BackendError::Gpu(anyhow::anyhow!(
                "{} backend returned {}x{} for a {} target",
                gpu.name(),
                image.width(),
                image.height(),
                target
            )));
        }
        debug!(backend = gpu.name(), actions = actions.len(), "gpu batch replayed");
        Ok(image)
    }

    /// Apply one action on the CPU. Used by the incremental CPU path.
    pub fn apply_action(
        &self,
        image: RgbaImage,
        action: &EditAction,
    ) -> Result<RgbaImage, BackendError> {
        let result = self.cpu.apply_action(image, action);
        match &result {
            Ok(_) => {
                self.counters
                    .actions_replayed
                    .fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
            }
        }
        result
    }

    /// Final CPU resample of a replayed image to `target`.
    pub fn finish(&self, image: RgbaImage, target: OutputSize) -> Result<RgbaImage, BackendError> {
        let result = self.cpu.finish(image, target);
        let counter = if result.is_ok() {
            &self.counters.renders
        } else {
            &self.counters.failures
        };
        counter.fetch_add(1, Ordering::Relaxed);
        result
    }
}
