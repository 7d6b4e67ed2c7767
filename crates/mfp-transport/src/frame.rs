//! ---
//! mfp_section: "02-messaging-envelope-model"
//! mfp_subsection: "module"
//! mfp_type: "source"
//! mfp_scope: "code"
//! mfp_description: "Cross-context transport primitives."
//! mfp_version: "v0.0.0-prealpha"
//! mfp_owner: "tbd"
//! ---
use std::fmt;

use tokio::sync::oneshot;

use crate::window::WindowRef;
use crate::Result;

/// Identifier of a mounted frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(pub u64);

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frame-{}", self.0)
    }
}

/// Presentation of a mounted frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameStyle {
    /// `display: none`.
    pub display_none: bool,
    /// Taken out of the document flow (`position: absolute`).
    pub position_absolute: bool,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Whether the frame reacts to pointer events.
    pub pointer_events: bool,
}

impl FrameStyle {
    /// Off-screen, zero-sized, non-interactive frame.
    pub fn hidden() -> Self {
        Self {
            display_none: true,
            position_absolute: true,
            width: 0,
            height: 0,
            pointer_events: false,
        }
    }

    /// Whether the frame is invisible and out of the layout.
    pub fn is_hidden(&self) -> bool {
        self.display_none
            && self.position_absolute
            && self.width == 0
            && self.height == 0
            && !self.pointer_events
    }
}

/// Frame appended to the host document.
pub struct MountedFrame {
    /// Handle used to unmount the frame.
    pub id: FrameId,
    /// Resolves to the frame's content window once it signals load. The sender
    /// is dropped without a value if the frame is unmounted first.
    pub loaded: oneshot::Receiver<WindowRef>,
}

impl fmt::Debug for MountedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MountedFrame").field("id", &self.id).finish_non_exhaustive()
    }
}

/// The document a client runs in.
///
/// Only the broker gateway mounts frames; everything else talks to windows.
pub trait FrameHost: Send + Sync {
    /// Origin of the client document.
    fn origin(&self) -> String;
    /// The client's own window.
    fn window(&self) -> WindowRef;
    /// Register a document and return a URL a frame can load it from.
    fn create_object_url(&self, document: &str) -> Result<String>;
    /// Release a URL returned by [`FrameHost::create_object_url`].
    fn revoke_object_url(&self, url: &str);
    /// Append a frame loading `src` to the document.
    fn mount_frame(&self, src: &str, style: &FrameStyle) -> Result<MountedFrame>;
    /// Remove a frame from the document.
    fn unmount_frame(&self, id: FrameId);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hidden_style_is_out_of_layout() {
        let style = FrameStyle::hidden();
        assert!(style.is_hidden());
        let visible = FrameStyle {
            width: 10,
            ..FrameStyle::hidden()
        };
        assert!(!visible.is_hidden());
        assert_eq!(FrameId(7).to_string(), "frame-7");
    }

    #[test]
    fn mounted_frame_debug_names_only_the_id() {
        let (_tx, loaded) = oneshot::channel();
        let frame = MountedFrame { id: FrameId(3), loaded };
        let rendered = format!("{:?}", frame);
        assert!(rendered.starts_with("MountedFrame { id: FrameId(3)"), "{}", rendered);
    }
}
