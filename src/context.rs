use std::sync::{Arc, Mutex};

use image::RgbaImage;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::engine::Backend;
use crate::events::{RenderOutcome, SessionEvent};
use crate::processing::layout::OutputSize;
use crate::renderer::Renderer;
use crate::scheduler::Scheduler;
use crate::session::{EditSession, WeakSession};
use crate::tasks::replay::RenderJob;

/// Lifecycle of a [`RenderContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderPhase {
    /// Created; `render` not called yet.
    Idle,
    /// `render` called; the completion has not run yet.
    Rendering,
    /// The completion ran with the replay's result.
    Completed,
    /// The completion ran with no image because of cancellation.
    Canceled,
}

/// A one-shot request to replay a session's actions onto one image.
///
/// The backend is chosen when the context is created. Call
/// [`render`](Self::render) once; its completion runs exactly once on the
/// control loop, with the edited image, or `None` if there was nothing to
/// apply, the render was canceled, or every backend failed.
pub struct RenderContext {
    session: WeakSession,
    source: Arc<RgbaImage>,
    size: OutputSize,
    backend: Backend,
    cancel: CancellationToken,
    phase: Arc<Mutex<RenderPhase>>,
    events: Option<UnboundedReceiver<SessionEvent>>,
    scheduler: Scheduler,
}

impl RenderContext {
    pub(crate) fn new(
        session: &EditSession,
        renderer: &Renderer,
        image: RgbaImage,
        target: Option<OutputSize>,
    ) -> Self {
        let requested = target.unwrap_or_else(|| OutputSize::of(&image));
        let size = renderer.output_size(requested);
        let backend = renderer.backend_for(image.width(), image.height());
        info!(
            source_width = image.width(),
            source_height = image.height(),
            %size,
            %backend,
            "render context created"
        );
        Self {
            session: session.downgrade(),
            source: Arc::new(image),
            size,
            backend,
            cancel: CancellationToken::new(),
            phase: Arc::new(Mutex::new(RenderPhase::Idle)),
            events: Some(session.subscribe()),
            scheduler: renderer.scheduler().clone(),
        }
    }

    /// Start rendering. Only the first call has any effect.
    ///
    /// GPU contexts wait for the session to close and then replay the final
    /// list; CPU contexts start applying recorded actions immediately and keep
    /// up with new ones until the session closes.
    pub fn render(&mut self, completion: impl FnOnce(Option<RgbaImage>) + Send + 'static) {
        {
            let mut phase = self.phase.lock().expect("render phase poisoned");
            if *phase != RenderPhase::Idle {
                debug!(phase = ?*phase, "render already initiated; ignoring");
                return;
            }
            *phase = RenderPhase::Rendering;
        }
        let Some(events) = self.events.take() else {
            return;
        };
        let phase = Arc::clone(&self.phase);
        let cancel = self.cancel.clone();
        let deliver = Box::new(move |outcome: RenderOutcome| {
            let canceled = cancel.is_cancelled();
            let result = if canceled { None } else { outcome.into_image() };
            *phase.lock().expect("render phase poisoned") = if canceled {
                RenderPhase::Canceled
            } else {
                RenderPhase::Completed
            };
            completion(result);
        });

        if self.cancel.is_cancelled() {
            debug!("render requested after cancellation");
            self.scheduler.deliver_now(RenderOutcome::Canceled, deliver);
            return;
        }
        debug!(backend = %self.backend, size = %self.size, "render started");
        self.scheduler.start(
            RenderJob {
                backend: self.backend,
                source: Arc::clone(&self.source),
                target: self.size,
                events,
                cancel: self.cancel.clone(),
            },
            deliver,
        );
    }

    /// Ask for the render to stop. Idempotent, and a no-op once the
    /// completion has run. Any completion delivered afterwards receives `None`.
    pub fn cancel_rendering(&self) {
        let phase = *self.phase.lock().expect("render phase poisoned");
        if matches!(phase, RenderPhase::Completed | RenderPhase::Canceled) {
            return;
        }
        if !self.cancel.is_cancelled() {
            info!(?phase, "render canceled");
            self.cancel.cancel();
        }
    }

    /// The originating session, if it is still alive.
    pub fn session(&self) -> Option<EditSession> {
        self.session.upgrade()
    }

    pub fn size(&self) -> OutputSize {
        self.size
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn phase(&self) -> RenderPhase {
        *self.phase.lock().expect("render phase poisoned")
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn has_begun_rendering(&self) -> bool {
        self.phase() != RenderPhase::Idle
    }

    /// True iff the session has recorded at least one action. `false` once
    /// the session itself is gone.
    pub fn is_modified(&self) -> bool {
        self.session.upgrade().is_some_and(|s| s.is_modified())
    }

    /// Approximate peak memory for the output buffer.
    pub fn estimated_memory_bytes(&self) -> u64 {
        self.size.estimated_memory_bytes()
    }
}
