pub mod action;
pub mod capability;
pub mod config;
pub mod context;
pub mod control;
pub mod engine;
pub mod error;
pub mod events;
pub mod gpu;
pub mod renderer;
pub mod scheduler;
pub mod session;
pub mod processing {
    pub mod blur;
    pub mod color;
    pub mod geometry;
    pub mod layout;
    pub mod resample;
}
pub mod tasks {
    pub mod loader;
    pub mod replay;
}

pub use action::{EditAction, EditScript, FlipAxis};
pub use capability::{CapabilityDetector, StaticCapabilities, WgpuCapabilities};
pub use config::{BackendPreference, RenderConfig, ResampleFilter};
pub use context::{RenderContext, RenderPhase};
pub use control::{ControlHandle, ControlLoop};
pub use engine::{Backend, CpuBackend, EngineStats, RenderEngine, ReplayBackend};
pub use error::{BackendError, Error, InvalidStateError};
pub use processing::layout::OutputSize;
pub use renderer::Renderer;
pub use session::EditSession;
