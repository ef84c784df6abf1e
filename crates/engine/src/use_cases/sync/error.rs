//! Progress sync errors.

use bladesheet_domain::{ControlId, Crossing, DecodeError, DocumentRef, DomainError};

use crate::infrastructure::ports::StoreError;

/// Errors raised while mounting or settling progress controls.
///
/// None of these reach the rendering substrate: activation returns an
/// outcome and settlement reports failures after reverting.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SyncError {
    #[error("Malformed control markup: {0}")]
    Decode(#[from] DecodeError),

    #[error("Document could not be resolved: {0}")]
    Resolution(DocumentRef),

    #[error("Persistence failed: {0}")]
    Persistence(#[from] StoreError),

    /// The bound resource was already in the requested state. Settles as
    /// success.
    #[error("Resource already in target state for {0:?}")]
    ThresholdConflict(Crossing),

    #[error("No progress control registered for selector: {0}")]
    UnknownSelector(String),

    #[error("No rendered control: {0}")]
    UnknownControl(ControlId),

    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),
}
