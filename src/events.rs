use std::sync::Arc;

use image::RgbaImage;

use crate::action::EditAction;

/// Change notification sent from an [`EditSession`](crate::session::EditSession)
/// to the contexts derived from it.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// An action was recorded. Sent once per action, in append order.
    Appended(EditAction),
    /// The session closed; carries the final, immutable action list.
    Closed(Arc<[EditAction]>),
}

/// How a render ended, before it is reduced to the caller-visible
/// `Option<RgbaImage>`.
#[derive(Debug)]
pub enum RenderOutcome {
    Rendered(RgbaImage),
    /// The session closed without any recorded actions.
    Unmodified,
    /// Cancellation was observed before a result was produced.
    Canceled,
    /// The session went away without ever being closed.
    Abandoned,
    /// Every eligible backend failed.
    Failed,
}

impl RenderOutcome {
    pub fn into_image(self) -> Option<RgbaImage> {
        match self {
            Self::Rendered(image) => Some(image),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Rendered(_) => "rendered",
            Self::Unmodified => "unmodified",
            Self::Canceled => "canceled",
            Self::Abandoned => "abandoned",
            Self::Failed => "failed",
        }
    }
}
