//! The control loop: the single thread on which completions are delivered.
//!
//! Whatever thread owns the [`ControlLoop`] is the control thread. Background
//! replay work posts jobs through a [`ControlHandle`]; they run only when the
//! owner pumps or awaits the loop, so callbacks never race editor-side state.

use tokio::select;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct ControlLoop {
    jobs: UnboundedReceiver<Job>,
}

/// Posts jobs onto a [`ControlLoop`]. Cheap to clone.
#[derive(Clone)]
pub struct ControlHandle {
    jobs: UnboundedSender<Job>,
}

impl ControlLoop {
    pub fn new() -> (Self, ControlHandle) {
        let (tx, rx) = unbounded_channel();
        (Self { jobs: rx }, ControlHandle { jobs: tx })
    }

    /// Run every job already queued without waiting. Returns how many ran.
    pub fn pump(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(job) = self.jobs.try_recv() {
            job();
            ran += 1;
        }
        ran
    }

    /// Wait for the next job and run it. Returns `false` once every handle is
    /// gone and the queue is drained.
    pub async fn turn(&mut self) -> bool {
        match self.jobs.recv().await {
            Some(job) => {
                job();
                true
            }
            None => false,
        }
    }

    /// Run jobs until `cancel` fires or every handle is dropped.
    pub async fn run(&mut self, cancel: CancellationToken) {
        loop {
            select! {
                _ = cancel.cancelled() => {
                    debug!("control loop stopping");
                    break;
                }
                job = self.jobs.recv() => match job {
                    Some(job) => job(),
                    None => break,
                },
            }
        }
    }
}

impl ControlHandle {
    /// Queue `job` for the control thread. Returns `false` if the loop has been
    /// dropped, in which case the job is discarded.
    pub fn post(&self, job: impl FnOnce() + Send + 'static) -> bool {
        if self.jobs.send(Box::new(job)).is_err() {
            warn!("control loop is gone; dropping job");
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn jobs_run_only_when_pumped_in_post_order() {
        let (mut control, handle) = ControlLoop::new();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        for i in 0..3 {
            let seen = Arc::clone(&seen);
            assert!(handle.post(move || seen.lock().unwrap().push(i)));
        }
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(control.pump(), 3);
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn posting_to_a_dropped_loop_fails() {
        let (control, handle) = ControlLoop::new();
        drop(control);
        assert!(!handle.post(|| {}));
    }

    #[tokio::test]
    async fn turn_ends_when_handles_are_gone() {
        let (mut control, handle) = ControlLoop::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        handle.post(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        drop(handle);
        assert!(control.turn().await);
        assert!(!control.turn().await);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let (mut control, _handle) = ControlLoop::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        control.run(cancel).await;
    }
}
