//! ---
//! mfp_section: "11-simulation"
//! mfp_subsection: "02-frame-host"
//! mfp_type: "source"
//! mfp_scope: "code"
//! mfp_description: "In-process frame host backed by in-memory windows."
//! mfp_version: "v0.1.0"
//! mfp_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use mfp_transport::{
    FrameHost, FrameId, FrameStyle, InMemoryWindow, MountedFrame, TransportError, Window, WindowRef,
};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Everything the content of a freshly mounted frame gets to work with.
pub struct FrameContext {
    /// Id the host assigned to the frame.
    pub id: FrameId,
    /// Document the frame was pointed at.
    pub document: String,
    /// The frame's content window.
    pub window: Arc<InMemoryWindow>,
    /// Window of the document embedding the frame.
    pub client_window: Arc<InMemoryWindow>,
    /// Signals that the frame finished loading. Dropping it means the frame
    /// never loads.
    pub loaded: oneshot::Sender<WindowRef>,
}

/// What runs inside frames mounted on a [`HarnessFrameHost`].
pub trait FrameRuntime: Send + Sync + 'static {
    /// Start the frame content. The task is aborted when the frame is unmounted.
    fn start(&self, frame: FrameContext) -> JoinHandle<()>;
}

struct FrameRecord {
    src: String,
    style: FrameStyle,
    window: Arc<InMemoryWindow>,
    task: JoinHandle<()>,
}

/// [`FrameHost`] whose frames are in-memory windows nested in the host window.
///
/// Frames load from object URLs and therefore share the host's origin.
pub struct HarnessFrameHost<R> {
    window: Arc<InMemoryWindow>,
    runtime: R,
    next_frame: AtomicU64,
    object_urls: Mutex<HashMap<String, String>>,
    revoked: Mutex<Vec<String>>,
    frames: Mutex<HashMap<FrameId, FrameRecord>>,
    unmounted: Mutex<Vec<FrameId>>,
}

impl<R: FrameRuntime> HarnessFrameHost<R> {
    /// Host document living in `window`.
    pub fn new(window: Arc<InMemoryWindow>, runtime: R) -> Arc<Self> {
        Arc::new(Self {
            window,
            runtime,
            next_frame: AtomicU64::new(1),
            object_urls: Mutex::new(HashMap::new()),
            revoked: Mutex::new(Vec::new()),
            frames: Mutex::new(HashMap::new()),
            unmounted: Mutex::new(Vec::new()),
        })
    }

    /// The host's own window.
    pub fn client_window(&self) -> Arc<InMemoryWindow> {
        self.window.clone()
    }

    /// Runtime frames are started with.
    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    /// Frames currently mounted, in mount order.
    pub fn mounted_frames(&self) -> Vec<FrameId> {
        let mut ids: Vec<FrameId> = self.frames.lock().keys().copied().collect();
        ids.sort_by_key(|id| id.0);
        ids
    }

    /// Content window of a mounted frame.
    pub fn frame_window(&self, id: FrameId) -> Option<Arc<InMemoryWindow>> {
        self.frames.lock().get(&id).map(|frame| frame.window.clone())
    }

    /// Style a mounted frame was given.
    pub fn frame_style(&self, id: FrameId) -> Option<FrameStyle> {
        self.frames.lock().get(&id).map(|frame| frame.style.clone())
    }

    /// Source URL of a mounted frame.
    pub fn frame_src(&self, id: FrameId) -> Option<String> {
        self.frames.lock().get(&id).map(|frame| frame.src.clone())
    }

    /// Frames removed so far, in removal order.
    pub fn unmounted_frames(&self) -> Vec<FrameId> {
        self.unmounted.lock().clone()
    }

    /// Object URLs that were created and not revoked yet.
    pub fn live_object_urls(&self) -> Vec<String> {
        self.object_urls.lock().keys().cloned().collect()
    }

    /// Object URLs revoked so far, in revocation order.
    pub fn revoked_object_urls(&self) -> Vec<String> {
        self.revoked.lock().clone()
    }

    /// Document registered under a live object URL.
    pub fn document(&self, url: &str) -> Option<String> {
        self.object_urls.lock().get(url).cloned()
    }
}

impl<R: FrameRuntime> FrameHost for HarnessFrameHost<R> {
    fn origin(&self) -> String {
        self.window.origin().to_owned()
    }

    fn window(&self) -> WindowRef {
        self.window.clone()
    }

    fn create_object_url(&self, document: &str) -> mfp_transport::Result<String> {
        let url = format!("blob:{}/{}", self.window.origin(), Uuid::new_v4());
        self.object_urls
            .lock()
            .insert(url.clone(), document.to_owned());
        Ok(url)
    }

    fn revoke_object_url(&self, url: &str) {
        if self.object_urls.lock().remove(url).is_some() {
            self.revoked.lock().push(url.to_owned());
        }
    }

    fn mount_frame(&self, src: &str, style: &FrameStyle) -> mfp_transport::Result<MountedFrame> {
        let document = self
            .document(src)
            .ok_or_else(|| TransportError::UnknownObjectUrl(src.to_owned()))?;
        let id = FrameId(self.next_frame.fetch_add(1, Ordering::Relaxed));
        let window = InMemoryWindow::child(self.window.clone(), self.window.origin());
        let (loaded_tx, loaded) = oneshot::channel();
        let task = self.runtime.start(FrameContext {
            id,
            document,
            window: window.clone(),
            client_window: self.window.clone(),
            loaded: loaded_tx,
        });
        tracing::debug!(frame = %id, window = window.id(), src, "frame mounted");
        self.frames.lock().insert(
            id,
            FrameRecord {
                src: src.to_owned(),
                style: style.clone(),
                window,
                task,
            },
        );
        Ok(MountedFrame { id, loaded })
    }

    fn unmount_frame(&self, id: FrameId) {
        let Some(frame) = self.frames.lock().remove(&id) else {
            return;
        };
        frame.task.abort();
        frame.window.close();
        self.unmounted.lock().push(id);
        tracing::debug!(frame = %id, "frame unmounted");
    }
}
