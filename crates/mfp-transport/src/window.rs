//! ---
//! mfp_section: "02-messaging-envelope-model"
//! mfp_subsection: "module"
//! mfp_type: "source"
//! mfp_scope: "code"
//! mfp_description: "Cross-context transport primitives."
//! mfp_version: "v0.0.0-prealpha"
//! mfp_owner: "tbd"
//! ---
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use tokio::sync::broadcast;

use crate::{Result, TransportError};

/// Target origin that matches any window.
pub const ANY_ORIGIN: &str = "*";

/// Number of posts an [`InMemoryWindow`] remembers.
pub const POST_HISTORY_LIMIT: usize = 512;

const EVENT_BUFFER: usize = 256;

static NEXT_WINDOW_ID: AtomicU64 = AtomicU64::new(1);

/// Shared handle to a window.
pub type WindowRef = Arc<dyn Window>;

/// Raw event delivered to a window's listeners.
#[derive(Clone)]
pub struct MessageEvent {
    /// Origin of the context that posted the event.
    pub origin: String,
    /// Posted data, not yet trusted.
    pub data: JsonValue,
    /// Window of the poster, if it exposed one.
    pub source: Option<WindowRef>,
}

impl MessageEvent {
    /// Event posted from `origin` without a source window.
    pub fn new(origin: impl Into<String>, data: JsonValue) -> Self {
        Self {
            origin: origin.into(),
            data,
            source: None,
        }
    }

    /// Attach the poster's window so the receiver can reply.
    pub fn with_source(mut self, source: WindowRef) -> Self {
        self.source = Some(source);
        self
    }
}

impl fmt::Debug for MessageEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageEvent")
            .field("origin", &self.origin)
            .field("data", &self.data)
            .field("source", &self.source.as_ref().map(|source| source.id()))
            .finish()
    }
}

/// A browsing context able to receive posted messages.
pub trait Window: Send + Sync {
    /// Process-unique identifier, for logging.
    fn id(&self) -> u64;
    /// Origin the window's document was loaded from.
    fn origin(&self) -> &str;
    /// Parent window, `None` for the top-level window.
    fn parent(&self) -> Option<WindowRef>;
    /// Post an event to the window. Events whose `target_origin` is neither
    /// [`ANY_ORIGIN`] nor the window's origin are silently discarded.
    fn post_message(&self, event: MessageEvent, target_origin: &str) -> Result<()>;
    /// Register a raw listener for events dispatched to the window.
    fn subscribe(&self) -> broadcast::Receiver<MessageEvent>;
    /// Number of raw listeners currently registered.
    fn listener_count(&self) -> usize;
}

/// Record of a post made to an [`InMemoryWindow`].
#[derive(Debug, Clone)]
pub struct PostedMessage {
    /// The posted event.
    pub event: MessageEvent,
    /// Target origin the poster asked for.
    pub target_origin: String,
    /// Whether the event was dispatched to listeners.
    pub dispatched: bool,
}

/// In-process window backed by a broadcast channel.
pub struct InMemoryWindow {
    id: u64,
    origin: String,
    parent: Option<WindowRef>,
    tx: broadcast::Sender<MessageEvent>,
    closed: AtomicBool,
    history: Mutex<VecDeque<PostedMessage>>,
}

impl InMemoryWindow {
    /// Create a top-level window.
    pub fn top(origin: impl Into<String>) -> Arc<Self> {
        Self::build(origin.into(), None)
    }

    /// Create a window nested in `parent`.
    pub fn child(parent: WindowRef, origin: impl Into<String>) -> Arc<Self> {
        Self::build(origin.into(), Some(parent))
    }

    fn build(origin: String, parent: Option<WindowRef>) -> Arc<Self> {
        let (tx, _) = broadcast::channel(EVENT_BUFFER);
        Arc::new(Self {
            id: NEXT_WINDOW_ID.fetch_add(1, Ordering::Relaxed),
            origin,
            parent,
            tx,
            closed: AtomicBool::new(false),
            history: Mutex::new(VecDeque::new()),
        })
    }

    /// Close the window. Later posts fail with [`TransportError::WindowClosed`].
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Whether the window was closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// The most recent posts made to this window, oldest first. At most
    /// [`POST_HISTORY_LIMIT`] are kept.
    pub fn posted(&self) -> Vec<PostedMessage> {
        self.history.lock().iter().cloned().collect()
    }
}

impl fmt::Debug for InMemoryWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryWindow")
            .field("id", &self.id)
            .field("origin", &self.origin)
            .field("parent", &self.parent.as_ref().map(|parent| parent.id()))
            .finish()
    }
}

impl Window for InMemoryWindow {
    fn id(&self) -> u64 {
        self.id
    }

    fn origin(&self) -> &str {
        &self.origin
    }

    fn parent(&self) -> Option<WindowRef> {
        self.parent.clone()
    }

    fn post_message(&self, event: MessageEvent, target_origin: &str) -> Result<()> {
        if self.is_closed() {
            return Err(TransportError::WindowClosed(self.id));
        }
        let dispatched = target_origin == ANY_ORIGIN || target_origin == self.origin;
        {
            let mut history = self.history.lock();
            if history.len() == POST_HISTORY_LIMIT {
                history.pop_front();
            }
            history.push_back(PostedMessage {
                event: event.clone(),
                target_origin: target_origin.to_owned(),
                dispatched,
            });
        }
        if !dispatched {
            tracing::trace!(window = self.id, target_origin, origin = %self.origin, "target origin mismatch; event discarded");
            return Ok(());
        }
        // no listeners means nobody is interested; the event is lost like in a browser
        let _ = self.tx.send(event);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<MessageEvent> {
        self.tx.subscribe()
    }

    fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
