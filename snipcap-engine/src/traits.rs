use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use snipcap_core::types::{ContextId, NodeId, Notification, SourceKind};
use std::fmt;
use std::sync::{Arc, Weak};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("node exposes no outputs")]
    NoOutputs,

    #[error("node belongs to a different processing context")]
    ContextMismatch,

    #[error("processing context is closed")]
    ContextClosed,

    #[error("node is not connected")]
    NotConnected,

    #[error("{0}")]
    Other(String),
}

impl GraphError {
    /// Errors that mean the destination itself is unusable, not the node.
    pub fn is_context_error(&self) -> bool {
        matches!(self, GraphError::ContextMismatch | GraphError::ContextClosed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncoderError {
    #[error("unsupported mime type: {0}")]
    UnsupportedMimeType(String),

    #[error("recorder already started")]
    AlreadyStarted,

    #[error("{0}")]
    Failed(String),
}

pub trait AudioNode: Send + Sync {
    fn id(&self) -> NodeId;
    fn context_id(&self) -> ContextId;
    fn number_of_outputs(&self) -> u32;
}

pub trait AudioContext: Send + Sync {
    fn id(&self) -> ContextId;
    fn is_closed(&self) -> bool;

    /// Creates a sink whose incoming audio can be recorded.
    fn create_stream_destination(&self) -> Result<Arc<dyn StreamDestination>, GraphError>;

    /// The context's master output node, if the host exposes one.
    fn master_output(&self) -> Option<Arc<dyn AudioNode>>;

    fn create_media_element_source(
        &self,
        element: &dyn MediaElement,
    ) -> Result<Arc<dyn AudioNode>, GraphError>;
}

pub trait StreamDestination: Send + Sync {
    fn id(&self) -> NodeId;
    fn context_id(&self) -> ContextId;
    fn connect(&self, node: &dyn AudioNode) -> Result<(), GraphError>;
    fn disconnect(&self, node: NodeId) -> Result<(), GraphError>;

    /// `None` asks for the recorder's default format.
    fn open_recorder(&self, mime_type: Option<&str>) -> Result<Box<dyn Recorder>, EncoderError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecorderState {
    Inactive,
    Recording,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecorderEvent {
    Data(Vec<u8>),
    Stopped,
    Error(String),
}

/// Encoder consuming a destination's stream.
///
/// `next_event` must be cancel safe: the engine races it against timers and
/// drops the future when another branch wins.
#[async_trait]
pub trait Recorder: Send {
    fn mime_type(&self) -> &str;
    fn state(&self) -> RecorderState;
    fn start(&mut self) -> Result<(), EncoderError>;

    /// Requests a stop; completion is reported through `RecorderEvent::Stopped`.
    fn stop(&mut self);

    /// `None` once the recorder will produce no further events.
    async fn next_event(&mut self) -> Option<RecorderEvent>;
}

/// Receives the engine's outbound notifications. Fire-and-forget.
pub trait ArtifactSink: Send + Sync {
    fn deliver(&self, notification: Notification);
}

/// A weak reference to a node in the page's audio graph.
///
/// The engine never extends the lifetime of page-owned nodes; it only upgrades
/// the references for the duration of a tap.
#[derive(Clone)]
pub struct AudioGraphHandle {
    source: SourceKind,
    node_id: NodeId,
    context_id: ContextId,
    node: Weak<dyn AudioNode>,
    context: Weak<dyn AudioContext>,
}

impl AudioGraphHandle {
    pub fn new(
        source: SourceKind,
        node: &Arc<dyn AudioNode>,
        context: &Arc<dyn AudioContext>,
    ) -> Self {
        Self {
            source,
            node_id: node.id(),
            context_id: context.id(),
            node: Arc::downgrade(node),
            context: Arc::downgrade(context),
        }
    }

    pub fn source(&self) -> SourceKind {
        self.source
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn context_id(&self) -> ContextId {
        self.context_id
    }

    /// Both halves, or `None` if the page already dropped either one.
    pub fn upgrade(&self) -> Option<(Arc<dyn AudioNode>, Arc<dyn AudioContext>)> {
        Some((self.node.upgrade()?, self.context.upgrade()?))
    }
}

impl fmt::Debug for AudioGraphHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioGraphHandle")
            .field("source", &self.source)
            .field("node_id", &self.node_id)
            .field("context_id", &self.context_id)
            .finish()
    }
}

// Playback hosts. Each one lets a watcher observe playback attempts without
// changing what the page's own call does.

pub struct SoundInstance {
    pub paused: bool,
    pub playing: bool,
    pub node: Option<Arc<dyn AudioNode>>,
    pub context: Option<Arc<dyn AudioContext>>,
}

pub trait SpriteGroup: Send + Sync {
    fn sounds(&self) -> Vec<SoundInstance>;
}

pub type SpritePlayHook = Arc<dyn Fn(&dyn SpriteGroup) + Send + Sync>;

pub trait SpriteLibrary: Send + Sync {
    fn add_play_hook(&self, hook: SpritePlayHook) -> anyhow::Result<()>;
}

pub trait SpriteHost: Send + Sync {
    /// `None` until the page has loaded the library.
    fn library(&self) -> Option<Arc<dyn SpriteLibrary>>;
}

pub type BufferStartHook = Arc<dyn Fn(&Arc<dyn AudioNode>, &Arc<dyn AudioContext>) + Send + Sync>;

pub trait GraphHost: Send + Sync {
    /// The hook runs on every buffer-source `start`, before the host starts it.
    fn add_buffer_start_hook(&self, hook: BufferStartHook) -> anyhow::Result<()>;
}

pub trait MediaElement: Send + Sync {
    fn src(&self) -> Option<String>;

    /// The graph this element is routed into, if any.
    fn bound_graph(&self) -> Option<(Arc<dyn AudioContext>, Arc<dyn AudioNode>)>;

    /// Routes the element into `context` through `node`. The element keeps
    /// both alive for as long as it exists.
    fn bind_graph(&self, context: Arc<dyn AudioContext>, node: Arc<dyn AudioNode>);
}

pub type MediaPlayHook = Arc<dyn Fn(&Arc<dyn MediaElement>) + Send + Sync>;

pub trait MediaElementHost: Send + Sync {
    fn add_play_hook(&self, hook: MediaPlayHook) -> anyhow::Result<()>;
}

pub trait ContextFactory: Send + Sync {
    fn new_context(&self) -> Result<Arc<dyn AudioContext>, GraphError>;
}

/// Implemented by whatever wants to hear about playback attempts.
///
/// Hooks may fire on any thread, including host audio threads with no tokio
/// context; implementations must not assume one.
pub trait PlaybackObserver: Send + Sync {
    fn on_playback_attempt(&self, handle: AudioGraphHandle);

    /// Cheap pre-check so watchers can skip expensive setup when a request
    /// would be dropped anyway.
    fn is_accepting(&self) -> bool {
        true
    }
}
