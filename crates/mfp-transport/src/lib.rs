//! ---
//! mfp_section: "02-messaging-envelope-model"
//! mfp_subsection: "module"
//! mfp_type: "source"
//! mfp_scope: "code"
//! mfp_description: "Cross-context transport primitives."
//! mfp_version: "v0.0.0-prealpha"
//! mfp_owner: "tbd"
//! ---
//! Cross-context message passing.
//!
//! A [`Window`] is a browsing context that accepts posted [`MessageEvent`]s and
//! dispatches them to its listeners. A [`FrameHost`] is the document surface a
//! client runs in; it can mount hidden frames and hand out object URLs for
//! their content. The [`filters`] module holds the checks every receiver runs
//! before trusting an event.
#![warn(missing_docs)]

pub mod filters;
pub mod frame;
pub mod window;

/// Shared result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Errors raised by windows and frame hosts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The target window was closed or unmounted.
    #[error("window {0} is closed")]
    WindowClosed(u64),
    /// A frame was pointed at an object URL that was never created or already revoked.
    #[error("unknown object url: {0}")]
    UnknownObjectUrl(String),
    /// The host could not mount the frame.
    #[error("failed to mount frame: {0}")]
    Mount(String),
}

pub use filters::{filter_by_origin, filter_by_topic, filter_by_transport, pluck_envelope, EnvelopeFilter};
pub use frame::{FrameHost, FrameId, FrameStyle, MountedFrame};
pub use window::{InMemoryWindow, MessageEvent, PostedMessage, Window, WindowRef, ANY_ORIGIN, POST_HISTORY_LIMIT};
