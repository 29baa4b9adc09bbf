//! Capture errors

use mirror_dom::{DomError, NodeId};

/// Errors raised by the capture engine
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("capture is already running")]
    AlreadyRunning,
    /// The host refused an observer; the subtree is left out of live capture
    #[error("cannot observe {node:?}: {source}")]
    ObserverUnavailable {
        node: NodeId,
        #[source]
        source: DomError,
    },
}

pub type Result<T> = std::result::Result<T, CaptureError>;
