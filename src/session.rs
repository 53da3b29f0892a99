use std::sync::{Arc, Mutex, MutexGuard, Weak};

use image::RgbaImage;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info};

use crate::action::EditAction;
use crate::context::RenderContext;
use crate::error::InvalidStateError;
use crate::events::SessionEvent;
use crate::processing::layout::OutputSize;
use crate::renderer::Renderer;

/// Ordered, append-only record of the actions taken in one editing
/// interaction.
///
/// The session is owned by the editing flow: it appends actions while the
/// editor is open and calls [`close`](Self::close) exactly once when the editor
/// is dismissed, whether the user confirmed or canceled. Cloning yields another
/// handle to the same session.
#[derive(Clone)]
pub struct EditSession {
    shared: Arc<SessionShared>,
}

pub(crate) struct SessionShared {
    state: Mutex<SessionState>,
}

struct SessionState {
    actions: Vec<EditAction>,
    closed: Option<Arc<[EditAction]>>,
    subscribers: Vec<UnboundedSender<SessionEvent>>,
}

/// Non-owning handle from a context back to its session.
#[derive(Clone)]
pub(crate) struct WeakSession(Weak<SessionShared>);

impl WeakSession {
    pub(crate) fn upgrade(&self) -> Option<EditSession> {
        self.0.upgrade().map(|shared| EditSession { shared })
    }
}

impl Default for EditSession {
    fn default() -> Self {
        Self::new()
    }
}

impl EditSession {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(SessionShared {
                state: Mutex::new(SessionState {
                    actions: Vec::new(),
                    closed: None,
                    subscribers: Vec::new(),
                }),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.shared
            .state
            .lock()
            .expect("edit session state poisoned")
    }

    /// Record `action` at the end of the sequence.
    pub fn append_action(&self, action: EditAction) -> Result<(), InvalidStateError> {
        let mut state = self.lock();
        if state.closed.is_some() {
            return Err(InvalidStateError::AppendAfterClose);
        }
        state.actions.push(action.clone());
        let index = state.actions.len() - 1;
        state
            .subscribers
            .retain(|tx| tx.send(SessionEvent::Appended(action.clone())).is_ok());
        debug!(index, kind = %action.kind(), "recorded edit action");
        Ok(())
    }

    /// End the editing interaction. Terminal: the action list is frozen and
    /// every context waiting on closure is notified with the final list.
    pub fn close(&self) -> Result<(), InvalidStateError> {
        let mut state = self.lock();
        if state.closed.is_some() {
            return Err(InvalidStateError::AlreadyClosed);
        }
        let snapshot: Arc<[EditAction]> = Arc::from(state.actions.as_slice());
        state.closed = Some(Arc::clone(&snapshot));
        for tx in state.subscribers.drain(..) {
            let _ = tx.send(SessionEvent::Closed(Arc::clone(&snapshot)));
        }
        info!(
            actions = snapshot.len(),
            modified = !snapshot.is_empty(),
            "edit session closed"
        );
        Ok(())
    }

    /// Snapshot of the recorded actions in append order.
    pub fn actions(&self) -> Arc<[EditAction]> {
        let state = self.lock();
        match &state.closed {
            Some(snapshot) => Arc::clone(snapshot),
            None => Arc::from(state.actions.as_slice()),
        }
    }

    pub fn is_open(&self) -> bool {
        self.lock().closed.is_none()
    }

    /// True iff at least one action has been recorded.
    pub fn is_modified(&self) -> bool {
        !self.lock().actions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Create a one-shot render context for `image`.
    ///
    /// `target` defaults to the image size; the renderer's pixel cap applies
    /// either way.
    pub fn create_context(
        &self,
        renderer: &Renderer,
        image: RgbaImage,
        target: Option<OutputSize>,
    ) -> RenderContext {
        RenderContext::new(self, renderer, image, target)
    }

    /// Create a context whose output is the image size scaled down, keeping
    /// the aspect ratio, until it fits within `max`.
    pub fn create_context_with_max_size(
        &self,
        renderer: &Renderer,
        image: RgbaImage,
        max: OutputSize,
    ) -> RenderContext {
        let target = OutputSize::of(&image).fit_within(max);
        RenderContext::new(self, renderer, image, Some(target))
    }

    pub(crate) fn downgrade(&self) -> WeakSession {
        WeakSession(Arc::downgrade(&self.shared))
    }

    /// Register for change events.
    ///
    /// Actions recorded so far are replayed into the new channel first, so the
    /// subscriber observes every action exactly once and in order. A closed
    /// session also queues its final `Closed` event; the channel then never
    /// receives anything else.
    pub(crate) fn subscribe(&self) -> UnboundedReceiver<SessionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock();
        if let Some(snapshot) = &state.closed {
            for action in snapshot.iter() {
                let _ = tx.send(SessionEvent::Appended(action.clone()));
            }
            let _ = tx.send(SessionEvent::Closed(Arc::clone(snapshot)));
        } else {
            for action in &state.actions {
                let _ = tx.send(SessionEvent::Appended(action.clone()));
            }
            state.subscribers.push(tx);
        }
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::FlipAxis;

    fn crop(size: u32) -> EditAction {
        EditAction::Crop {
            x: 0,
            y: 0,
            width: size,
            height: size,
        }
    }

    #[test]
    fn actions_keep_append_order() {
        let session = EditSession::new();
        session.append_action(crop(10)).unwrap();
        session.append_action(EditAction::Rotate { turns: 1 }).unwrap();
        session
            .append_action(EditAction::Flip {
                axis: FlipAxis::Horizontal,
            })
            .unwrap();

        let actions = session.actions();
        assert_eq!(actions.len(), 3);
        assert_eq!(actions[0], crop(10));
        assert_eq!(actions[1], EditAction::Rotate { turns: 1 });
        assert!(session.is_modified());
    }

    #[test]
    fn append_after_close_is_rejected() {
        let session = EditSession::new();
        session.close().unwrap();
        assert_eq!(
            session.append_action(crop(1)),
            Err(InvalidStateError::AppendAfterClose)
        );
        assert!(session.actions().is_empty());
    }

    #[test]
    fn second_close_is_rejected() {
        let session = EditSession::new();
        session.append_action(crop(1)).unwrap();
        assert!(session.close().is_ok());
        assert_eq!(session.close(), Err(InvalidStateError::AlreadyClosed));
        assert!(!session.is_open());
        assert_eq!(session.len(), 1);
    }

    #[test]
    fn fresh_session_is_unmodified() {
        let session = EditSession::new();
        assert!(session.is_open());
        assert!(!session.is_modified());
        assert!(session.is_empty());
    }

    #[test]
    fn subscriber_sees_backlog_then_live_events() {
        let session = EditSession::new();
        session.append_action(crop(4)).unwrap();
        let mut rx = session.subscribe();
        session.append_action(crop(2)).unwrap();
        session.close().unwrap();

        assert!(matches!(rx.try_recv(), Ok(SessionEvent::Appended(a)) if a == crop(4)));
        assert!(matches!(rx.try_recv(), Ok(SessionEvent::Appended(a)) if a == crop(2)));
        match rx.try_recv() {
            Ok(SessionEvent::Closed(all)) => assert_eq!(all.len(), 2),
            other => panic!("expected close event, got {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn subscribing_to_closed_session_yields_final_snapshot() {
        let session = EditSession::new();
        session.append_action(crop(3)).unwrap();
        session.close().unwrap();

        let mut rx = session.subscribe();
        assert!(matches!(rx.try_recv(), Ok(SessionEvent::Appended(_))));
        assert!(matches!(rx.try_recv(), Ok(SessionEvent::Closed(all)) if all.len() == 1));
    }

    #[test]
    fn weak_handle_does_not_keep_session_alive() {
        let session = EditSession::new();
        let weak = session.downgrade();
        assert!(weak.upgrade().is_some());
        drop(session);
        assert!(weak.upgrade().is_none());
    }
}
