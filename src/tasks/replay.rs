use std::sync::Arc;

use image::RgbaImage;
use tokio::select;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::spawn_blocking;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::action::EditAction;
use crate::engine::{Backend, RenderEngine};
use crate::error::BackendError;
use crate::events::{RenderOutcome, SessionEvent};
use crate::processing::layout::OutputSize;

/// Everything a background replay needs, detached from the context.
pub struct RenderJob {
    pub backend: Backend,
    pub source: Arc<RgbaImage>,
    pub target: OutputSize,
    pub events: UnboundedReceiver<SessionEvent>,
    pub cancel: CancellationToken,
}

/// Drive one render to its outcome.
///
/// GPU jobs wait for the session to close and replay the final list in one
/// batch. CPU jobs apply each action as it is appended and only finish the
/// tail and the resample once the session closes. Cancellation is checked
/// before and after every unit of work; a cancel observed at any point wins
/// over a finished image.
#[tracing::instrument(name = "replay", skip_all, fields(backend = %job.backend, target = %job.target))]
pub async fn run(job: RenderJob, engine: Arc<RenderEngine>) -> RenderOutcome {
    let outcome = match job.backend {
        Backend::Gpu => replay_after_close(job, engine).await,
        Backend::Cpu => replay_incrementally(job, engine).await,
    };
    info!(outcome = outcome.label(), "render finished");
    outcome
}

async fn replay_after_close(mut job: RenderJob, engine: Arc<RenderEngine>) -> RenderOutcome {
    let actions = loop {
        select! {
            biased;
            _ = job.cancel.cancelled() => return RenderOutcome::Canceled,
            event = job.events.recv() => match event {
                Some(SessionEvent::Appended(_)) => continue,
                Some(SessionEvent::Closed(actions)) => break actions,
                None => return RenderOutcome::Abandoned,
            },
        }
    };
    if actions.is_empty() {
        debug!("session closed without edits");
        return RenderOutcome::Unmodified;
    }
    debug!(actions = actions.len(), "session closed; replaying batch");
    let RenderJob {
        backend,
        source,
        target,
        cancel,
        ..
    } = job;
    let result = spawn_blocking(move || engine.apply(backend, &actions, &source, target)).await;
    if cancel.is_cancelled() {
        return RenderOutcome::Canceled;
    }
    match result {
        Ok(Ok(image)) => RenderOutcome::Rendered(image),
        Ok(Err(err)) => {
            warn!(error = %err, "replay failed on every backend");
            RenderOutcome::Failed
        }
        Err(err) => {
            warn!(error = %err, "replay worker did not complete");
            RenderOutcome::Failed
        }
    }
}

/// Working state of an incremental CPU replay.
struct Progress {
    source: Arc<RgbaImage>,
    image: Option<RgbaImage>,
    replayed: usize,
    failed: bool,
}

impl Progress {
    fn new(source: Arc<RgbaImage>) -> Self {
        Self {
            source,
            image: None,
            replayed: 0,
            failed: false,
        }
    }

    /// Apply one action on the blocking pool. After the first failure the
    /// remaining actions are only counted.
    async fn step(&mut self, engine: &Arc<RenderEngine>, action: EditAction) {
        self.replayed += 1;
        if self.failed {
            return;
        }
        let engine = Arc::clone(engine);
        let source = Arc::clone(&self.source);
        let image = self.image.take();
        let result = spawn_blocking(move || {
            let image = image.unwrap_or_else(|| (*source).clone());
            engine.apply_action(image, &action)
        })
        .await
        .unwrap_or_else(|err| Err(BackendError::Worker(err.to_string())));
        match result {
            Ok(image) => self.image = Some(image),
            Err(err) => {
                warn!(error = %err, step = self.replayed, "cpu replay step failed");
                self.failed = true;
            }
        }
    }
}

async fn replay_incrementally(mut job: RenderJob, engine: Arc<RenderEngine>) -> RenderOutcome {
    let mut progress = Progress::new(Arc::clone(&job.source));
    let actions = loop {
        let event = select! {
            biased;
            _ = job.cancel.cancelled() => return RenderOutcome::Canceled,
            event = job.events.recv() => event,
        };
        match event {
            Some(SessionEvent::Appended(action)) => progress.step(&engine, action).await,
            Some(SessionEvent::Closed(actions)) => break actions,
            None => return RenderOutcome::Abandoned,
        }
    };

    if actions.is_empty() {
        debug!("session closed without edits");
        return RenderOutcome::Unmodified;
    }
    if progress.replayed > actions.len() {
        warn!(
            replayed = progress.replayed,
            closed = actions.len(),
            "replayed more actions than the session recorded"
        );
        return RenderOutcome::Failed;
    }
    // The closed list is authoritative: replay whatever the live events did
    // not deliver.
    let tail = actions.len() - progress.replayed;
    if tail > 0 {
        debug!(tail, "replaying actions not seen incrementally");
    }
    for action in actions[progress.replayed..].iter().cloned() {
        if job.cancel.is_cancelled() {
            return RenderOutcome::Canceled;
        }
        progress.step(&engine, action).await;
    }
    if job.cancel.is_cancelled() {
        return RenderOutcome::Canceled;
    }
    if progress.failed {
        return RenderOutcome::Failed;
    }

    let image = progress.image.take();
    let source = Arc::clone(&job.source);
    let target = job.target;
    let result = spawn_blocking(move || {
        let image = image.unwrap_or_else(|| (*source).clone());
        engine.finish(image, target)
    })
    .await;
    if job.cancel.is_cancelled() {
        return RenderOutcome::Canceled;
    }
    match result {
        Ok(Ok(image)) => RenderOutcome::Rendered(image),
        Ok(Err(err)) => {
            warn!(error = %err, "final resample failed");
            RenderOutcome::Failed
        }
        Err(err) => {
            warn!(error = %err, "resample worker did not complete");
            RenderOutcome::Failed
        }
    }
}
