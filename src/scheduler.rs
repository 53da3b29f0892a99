use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::warn;

use crate::control::ControlHandle;
use crate::engine::RenderEngine;
use crate::events::RenderOutcome;
use crate::tasks::replay::{self, RenderJob};

/// Delivery hook handed to the scheduler. Runs on the control loop.
pub(crate) type Deliver = Box<dyn FnOnce(RenderOutcome) + Send + 'static>;

/// Runs replays on the runtime's workers and hands outcomes back to the
/// control loop.
///
/// Every job started here delivers exactly one outcome, even if the replay
/// task panics.
#[derive(Clone)]
pub struct Scheduler {
    runtime: Handle,
    control: ControlHandle,
    engine: Arc<RenderEngine>,
}

impl Scheduler {
    pub fn new(runtime: Handle, control: ControlHandle, engine: Arc<RenderEngine>) -> Self {
        Self {
            runtime,
            control,
            engine,
        }
    }

    pub fn engine(&self) -> &Arc<RenderEngine> {
        &self.engine
    }

    pub(crate) fn start(&self, job: RenderJob, deliver: Deliver) {
        let worker = self.runtime.spawn(replay::run(job, Arc::clone(&self.engine)));
        let control = self.control.clone();
        self.runtime.spawn(async move {
            let outcome = worker.await.unwrap_or_else(|err| {
                warn!(error = %err, "replay task aborted");
                RenderOutcome::Failed
            });
            control.post(move || deliver(outcome));
        });
    }

    /// Deliver an outcome decided without running a replay.
    pub(crate) fn deliver_now(&self, outcome: RenderOutcome, deliver: Deliver) {
        self.control.post(move || deliver(outcome));
    }
}
