use crate::traits::{AudioContext, AudioGraphHandle, AudioNode, GraphError, StreamDestination};
use serde::{Deserialize, Serialize};
use snipcap_core::config::FallbackPolicy;
use snipcap_core::types::{ContextId, NodeId, SessionId, SourceKind};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("capture already in progress")]
    Busy,

    #[error("no connectable audio source: {0}")]
    NoSource(String),

    #[error("could not tap audio source: {0}")]
    ConnectFailure(String),

    #[error("recorder error: {0}")]
    Encoder(String),

    #[error("snippet too short or silent")]
    EmptyCapture,

    #[error("could not convert recording: {0}")]
    Conversion(String),

    #[error("recorder did not finish within {0:?} after stop")]
    FlushTimeout(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureState {
    #[default]
    Idle,
    Tapped,
    Recording,
    Finalizing,
}

impl CaptureState {
    pub fn label(self) -> &'static str {
        match self {
            CaptureState::Idle => "idle",
            CaptureState::Tapped => "tapped",
            CaptureState::Recording => "recording",
            CaptureState::Finalizing => "finalizing",
        }
    }
}

/// A node currently connected to the tap destination.
pub struct ActiveTap {
    pub node_id: NodeId,
    pub context_id: ContextId,
    pub source: SourceKind,
    destination: Arc<dyn StreamDestination>,
}

impl ActiveTap {
    fn disconnect(&self) -> Result<(), GraphError> {
        self.destination.disconnect(self.node_id)
    }
}

struct TapDestination {
    context_id: ContextId,
    destination: Arc<dyn StreamDestination>,
}

/// Mutable state of the one capture state machine.
///
/// All transitions are synchronous; the engine holds the lock only across
/// them, never across an await.
#[derive(Default)]
pub struct CaptureSession {
    state: CaptureState,
    session_id: Option<SessionId>,
    active: Option<ActiveTap>,
    tap: Option<TapDestination>,

    // A node whose cleanup disconnect failed; retried before the next tap.
    lingering: Option<ActiveTap>,
    chunks: Vec<Vec<u8>>,
    stop: Option<CancellationToken>,
    completed: u64,
}

impl CaptureSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session_id
    }

    pub fn active_node(&self) -> Option<NodeId> {
        self.active.as_ref().map(|t| t.node_id)
    }

    /// Node whose disconnect failed; retried before the next tap.
    pub fn lingering_node(&self) -> Option<NodeId> {
        self.lingering.as_ref().map(|t| t.node_id)
    }

    pub fn tap_context(&self) -> Option<ContextId> {
        self.tap.as_ref().map(|t| t.context_id)
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn completed_sessions(&self) -> u64 {
        self.completed
    }

    pub fn stop_token(&self) -> Option<CancellationToken> {
        self.stop.clone()
    }

    /// `activeHandle` is set exactly while tapped or recording.
    pub fn invariant_holds(&self) -> bool {
        self.active.is_some() == matches!(self.state, CaptureState::Tapped | CaptureState::Recording)
    }

    /// Idle -> Tapped. On error the session stays Idle.
    pub fn tap(
        &mut self,
        handle: &AudioGraphHandle,
        fallback: FallbackPolicy,
    ) -> Result<(SessionId, Arc<dyn StreamDestination>), CaptureError> {
        if self.state != CaptureState::Idle {
            return Err(CaptureError::Busy);
        }

        let (node, context) = handle
            .upgrade()
            .ok_or_else(|| CaptureError::NoSource("audio node was released before capture".into()))?;
        if context.is_closed() {
            return Err(CaptureError::NoSource("processing context is closed".into()));
        }

        if let Some(stale) = self.lingering.take() {
            if let Err(e) = stale.disconnect() {
                log::debug!("lingering node {:?} still not disconnected: {e}", stale.node_id);
            }
        }

        let (destination, reused) = self.destination_for(&context)?;
        let (destination, target) =
            match Self::connect_node(&destination, &node, &context, fallback) {
                Ok(target) => (destination, target),
                Err(e) if reused && e.is_context_error() => {
                    log::warn!("cached tap destination unusable ({e}); creating a fresh one");
                    self.tap = None;
                    let (fresh, _) = self.destination_for(&context)?;
                    let target = Self::connect_node(&fresh, &node, &context, fallback)
                        .map_err(|e| CaptureError::ConnectFailure(e.to_string()))?;
                    (fresh, target)
                }
                Err(e) => return Err(CaptureError::ConnectFailure(e.to_string())),
            };

        let session_id = SessionId::new();
        self.active = Some(ActiveTap {
            node_id: target.id(),
            context_id: context.id(),
            source: handle.source(),
            destination: destination.clone(),
        });
        self.session_id = Some(session_id);
        self.state = CaptureState::Tapped;
        Ok((session_id, destination))
    }

    /// Tapped -> Recording.
    pub fn begin_recording(&mut self, stop: CancellationToken) {
        debug_assert_eq!(self.state, CaptureState::Tapped);
        self.chunks.clear();
        self.stop = Some(stop);
        self.state = CaptureState::Recording;
    }

    /// Appends a non-empty fragment while recording. Returns whether it was kept.
    pub fn push_chunk(&mut self, bytes: Vec<u8>) -> bool {
        if self.state != CaptureState::Recording || bytes.is_empty() {
            return false;
        }
        self.chunks.push(bytes);
        true
    }

    /// Recording -> Finalizing. Hands the fragments and the tap to the caller,
    /// which must pass the tap back to [`CaptureSession::release`].
    pub fn finalize(&mut self) -> (Vec<Vec<u8>>, Option<ActiveTap>) {
        self.state = CaptureState::Finalizing;
        self.stop = None;
        (std::mem::take(&mut self.chunks), self.active.take())
    }

    /// Any state -> Idle, disconnecting the tapped node best-effort.
    pub fn release(&mut self, tap: Option<ActiveTap>) {
        if let Some(tap) = tap {
            match tap.disconnect() {
                Ok(()) | Err(GraphError::NotConnected) => {}
                Err(e) => {
                    log::warn!("disconnect of node {:?} failed: {e}", tap.node_id);
                    self.lingering = Some(tap);
                }
            }
        }

        self.state = CaptureState::Idle;
        self.session_id = None;
        self.stop = None;
        self.chunks.clear();
        self.completed += 1;
    }

    /// Error path from Tapped or Recording.
    pub fn abort(&mut self) {
        let tap = self.active.take();
        self.release(tap);
    }

    fn destination_for(
        &mut self,
        context: &Arc<dyn AudioContext>,
    ) -> Result<(Arc<dyn StreamDestination>, bool), CaptureError> {
        if let Some(tap) = &self.tap {
            if tap.context_id == context.id() {
                return Ok((tap.destination.clone(), true));
            }
        }

        let destination = context
            .create_stream_destination()
            .map_err(|e| CaptureError::NoSource(format!("create tap destination: {e}")))?;
        self.tap = Some(TapDestination {
            context_id: context.id(),
            destination: destination.clone(),
        });
        Ok((destination, false))
    }

    fn connect_node(
        destination: &Arc<dyn StreamDestination>,
        node: &Arc<dyn AudioNode>,
        context: &Arc<dyn AudioContext>,
        fallback: FallbackPolicy,
    ) -> Result<Arc<dyn AudioNode>, GraphError> {
        let direct = if node.number_of_outputs() == 0 {
            Err(GraphError::NoOutputs)
        } else {
            destination.connect(node.as_ref())
        };

        match direct {
            Ok(()) => Ok(node.clone()),
            Err(GraphError::NoOutputs) if fallback == FallbackPolicy::MasterOutput => {
                let master = context.master_output().ok_or(GraphError::NoOutputs)?;
                log::info!(
                    "node {:?} has no outputs; tapping master output {:?}",
                    node.id(),
                    master.id()
                );
                destination.connect(master.as_ref())?;
                Ok(master)
            }
            Err(e) => Err(e),
        }
    }
}
