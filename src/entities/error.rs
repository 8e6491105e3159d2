//! Error taxonomy of the component model.
//!
//! - [`ValidationFailure`]: the edit is not allowed; nothing changed, the
//!   reason can be shown to the user as is
//! - [`StructuralError`]: the caller referenced something the timeline does
//!   not track, or used an operation on the wrong kind of timeline
//! - [`BusError`]: a query had no responder (wiring defect)
//!
//! [`ModelError`] wraps all of them for the model's operations.

use thiserror::Error;
use uuid::Uuid;

use super::component::ComponentKind;
use crate::core::BusError;

/// Rejected edit, with a human-readable reason.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct ValidationFailure {
    pub reason: String,
}

impl ValidationFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum StructuralError {
    #[error("component {component} is not part of timeline {timeline}")]
    UnknownComponent { timeline: Uuid, component: Uuid },

    #[error("timeline {0} is not part of the document")]
    UnknownTimeline(Uuid),

    #[error("{operation} needs a {expected:?} timeline, timeline {timeline} holds {actual:?}")]
    WrongKind {
        timeline: Uuid,
        operation: &'static str,
        expected: ComponentKind,
        actual: ComponentKind,
    },
}

/// Any failure of a model operation.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error(transparent)]
    Validation(#[from] ValidationFailure),

    #[error(transparent)]
    Structural(#[from] StructuralError),

    #[error(transparent)]
    Protocol(#[from] BusError),

    /// A listener failed while the model announced a committed change.
    #[error(transparent)]
    Notify(#[from] anyhow::Error),

    /// Document state could not be captured or rebuilt.
    #[error("snapshot failed: {0}")]
    Snapshot(anyhow::Error),
}

impl ModelError {
    pub fn is_validation(&self) -> bool {
        matches!(self, ModelError::Validation(_))
    }

    /// Reason of a validation failure, if this is one.
    pub fn reason(&self) -> Option<&str> {
        match self {
            ModelError::Validation(v) => Some(&v.reason),
            _ => None,
        }
    }
}

pub type ModelResult<T> = Result<T, ModelError>;

/// Shorthand for returning a validation failure.
pub(crate) fn invalid<T>(reason: impl Into<String>) -> ModelResult<T> {
    Err(ValidationFailure::new(reason).into())
}
