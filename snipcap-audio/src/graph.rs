use crate::recorder::WavRecorder;
use snipcap_core::data_uri::base_mime_type;
use snipcap_core::types::{ContextId, NodeId};
use snipcap_engine::traits::{
    AudioContext, AudioNode, EncoderError, GraphError, MediaElement, Recorder, StreamDestination,
};
use std::collections::HashMap;
use std::f32::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

pub const DEFAULT_SAMPLE_RATE_HZ: u32 = 16_000;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Signal {
    Tone { frequency_hz: f32, amplitude: f32 },
    Silence,
}

impl Signal {
    pub fn tone(frequency_hz: f32) -> Self {
        Signal::Tone {
            frequency_hz,
            amplitude: 0.5,
        }
    }

    fn sample(self, frame: u64, sample_rate_hz: u32) -> f32 {
        match self {
            Signal::Tone {
                frequency_hz,
                amplitude,
            } => {
                let t = frame as f64 / f64::from(sample_rate_hz);
                amplitude * (TAU * frequency_hz * t as f32).sin()
            }
            Signal::Silence => 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum NodeKind {
    Source(Signal),
    // Carries the mix of every playing source in the context.
    Master,
}

#[derive(Debug)]
pub struct SoftNode {
    id: NodeId,
    context_id: ContextId,
    outputs: u32,
    kind: NodeKind,
    playing: AtomicBool,
}

impl SoftNode {
    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    pub fn set_playing(&self, playing: bool) {
        self.playing.store(playing, Ordering::Release);
    }
}

impl AudioNode for SoftNode {
    fn id(&self) -> NodeId {
        self.id
    }

    fn context_id(&self) -> ContextId {
        self.context_id
    }

    fn number_of_outputs(&self) -> u32 {
        self.outputs
    }
}

/// A software processing context. Nodes render mono `f32` on demand.
pub struct SoftContext {
    id: ContextId,
    sample_rate_hz: u32,
    closed: AtomicBool,
    me: Weak<SoftContext>,
    nodes: Mutex<HashMap<NodeId, Weak<SoftNode>>>,
    master: Arc<SoftNode>,
}

impl SoftContext {
    pub fn new(sample_rate_hz: u32) -> Arc<Self> {
        let id = ContextId::new();
        Arc::new_cyclic(|me| Self {
            id,
            sample_rate_hz,
            closed: AtomicBool::new(false),
            me: me.clone(),
            nodes: Mutex::new(HashMap::new()),
            master: Arc::new(SoftNode {
                id: NodeId::new(),
                context_id: id,
                outputs: 1,
                kind: NodeKind::Master,
                playing: AtomicBool::new(true),
            }),
        })
    }

    pub fn sample_rate_hz(&self) -> u32 {
        self.sample_rate_hz
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Creates a source node. `outputs == 0` models nodes that cannot be tapped.
    pub fn create_source(&self, signal: Signal, outputs: u32) -> Arc<SoftNode> {
        let node = Arc::new(SoftNode {
            id: NodeId::new(),
            context_id: self.id,
            outputs,
            kind: NodeKind::Source(signal),
            playing: AtomicBool::new(false),
        });
        lock(&self.nodes).insert(node.id, Arc::downgrade(&node));
        node
    }

    pub fn create_buffer_source(&self, signal: Signal) -> Arc<SoftNode> {
        self.create_source(signal, 1)
    }

    pub fn master(&self) -> &Arc<SoftNode> {
        &self.master
    }

    fn lookup(&self, id: NodeId) -> Option<Arc<SoftNode>> {
        if id == self.master.id {
            return Some(self.master.clone());
        }
        lock(&self.nodes).get(&id).and_then(Weak::upgrade)
    }

    fn render_source(&self, signal: Signal, node: &SoftNode, start: u64, out: &mut [f32]) {
        if !node.is_playing() {
            return;
        }
        for (i, s) in out.iter_mut().enumerate() {
            *s += signal.sample(start + i as u64, self.sample_rate_hz);
        }
    }

    /// Adds `id`'s output for frames `start..start + out.len()` into `out`.
    fn render_into(&self, id: NodeId, start: u64, out: &mut [f32]) {
        let Some(node) = self.lookup(id) else {
            return;
        };
        match node.kind {
            NodeKind::Source(signal) => self.render_source(signal, &node, start, out),
            NodeKind::Master => {
                let live: Vec<Arc<SoftNode>> = {
                    let mut nodes = lock(&self.nodes);
                    nodes.retain(|_, n| n.strong_count() > 0);
                    nodes.values().filter_map(Weak::upgrade).collect()
                };
                for n in live {
                    if let NodeKind::Source(signal) = n.kind {
                        self.render_source(signal, &n, start, out);
                    }
                }
            }
        }
    }
}

impl AudioContext for SoftContext {
    fn id(&self) -> ContextId {
        self.id
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn create_stream_destination(&self) -> Result<Arc<dyn StreamDestination>, GraphError> {
        if self.is_closed() {
            return Err(GraphError::ContextClosed);
        }
        Ok(SoftDestination::new(self.me.clone(), self.id))
    }

    fn master_output(&self) -> Option<Arc<dyn AudioNode>> {
        Some(self.master.clone())
    }

    fn create_media_element_source(
        &self,
        element: &dyn MediaElement,
    ) -> Result<Arc<dyn AudioNode>, GraphError> {
        if self.is_closed() {
            return Err(GraphError::ContextClosed);
        }
        if element.bound_graph().is_some() {
            return Err(GraphError::Other(
                "element is already routed into a processing context".into(),
            ));
        }

        // Element playback is modeled as a steady tone while routed.
        let node = self.create_source(Signal::tone(440.0), 1);
        node.set_playing(true);
        Ok(node)
    }
}

/// Sink exposing the mix of its connected nodes as a recordable stream.
pub struct SoftDestination {
    id: NodeId,
    context_id: ContextId,
    context: Weak<SoftContext>,
    me: Weak<SoftDestination>,
    connected: Mutex<Vec<NodeId>>,
}

impl SoftDestination {
    fn new(context: Weak<SoftContext>, context_id: ContextId) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            id: NodeId::new(),
            context_id,
            context,
            me: me.clone(),
            connected: Mutex::new(Vec::new()),
        })
    }

    pub fn connected(&self) -> Vec<NodeId> {
        lock(&self.connected).clone()
    }

    fn live_context(&self) -> Result<Arc<SoftContext>, GraphError> {
        let ctx = self.context.upgrade().ok_or(GraphError::ContextClosed)?;
        if ctx.is_closed() {
            return Err(GraphError::ContextClosed);
        }
        Ok(ctx)
    }

    /// Renders `frames` frames of the connected mix starting at frame `start`.
    pub fn render(&self, start: u64, frames: usize) -> Result<Vec<f32>, GraphError> {
        let ctx = self.live_context()?;
        let mut out = vec![0.0f32; frames];
        for id in self.connected() {
            ctx.render_into(id, start, &mut out);
        }
        for s in &mut out {
            *s = s.clamp(-1.0, 1.0);
        }
        Ok(out)
    }

    pub fn sample_rate_hz(&self) -> Result<u32, GraphError> {
        Ok(self.live_context()?.sample_rate_hz())
    }
}

impl StreamDestination for SoftDestination {
    fn id(&self) -> NodeId {
        self.id
    }

    fn context_id(&self) -> ContextId {
        self.context_id
    }

    fn connect(&self, node: &dyn AudioNode) -> Result<(), GraphError> {
        let ctx = self.live_context()?;
        if node.context_id() != self.context_id {
            return Err(GraphError::ContextMismatch);
        }
        if node.number_of_outputs() == 0 {
            return Err(GraphError::NoOutputs);
        }
        if ctx.lookup(node.id()).is_none() {
            return Err(GraphError::Other(format!("unknown node {:?}", node.id())));
        }

        let mut connected = lock(&self.connected);
        if !connected.contains(&node.id()) {
            connected.push(node.id());
        }
        Ok(())
    }

    fn disconnect(&self, node: NodeId) -> Result<(), GraphError> {
        let mut connected = lock(&self.connected);
        let before = connected.len();
        connected.retain(|n| *n != node);
        if connected.len() == before {
            return Err(GraphError::NotConnected);
        }
        Ok(())
    }

    fn open_recorder(&self, mime_type: Option<&str>) -> Result<Box<dyn Recorder>, EncoderError> {
        if let Some(mime) = mime_type {
            if base_mime_type(mime) != WavRecorder::MIME_TYPE {
                return Err(EncoderError::UnsupportedMimeType(mime.to_string()));
            }
        }
        let me = self
            .me
            .upgrade()
            .ok_or_else(|| EncoderError::Failed("destination dropped".into()))?;
        let sample_rate_hz = self
            .sample_rate_hz()
            .map_err(|e| EncoderError::Failed(e.to_string()))?;
        Ok(Box::new(WavRecorder::new(me, sample_rate_hz)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_validates_context_and_outputs() {
        let a = SoftContext::new(DEFAULT_SAMPLE_RATE_HZ);
        let b = SoftContext::new(DEFAULT_SAMPLE_RATE_HZ);
        let dest = a.create_stream_destination().unwrap();

        let foreign = b.create_buffer_source(Signal::tone(440.0));
        assert_eq!(dest.connect(foreign.as_ref()), Err(GraphError::ContextMismatch));

        let mute = a.create_source(Signal::tone(440.0), 0);
        assert_eq!(dest.connect(mute.as_ref()), Err(GraphError::NoOutputs));

        let ok = a.create_buffer_source(Signal::tone(440.0));
        dest.connect(ok.as_ref()).unwrap();
        dest.disconnect(ok.id()).unwrap();
        assert_eq!(dest.disconnect(ok.id()), Err(GraphError::NotConnected));
    }

    #[test]
    fn closed_context_rejects_new_destinations_and_connects() {
        let ctx = SoftContext::new(DEFAULT_SAMPLE_RATE_HZ);
        let dest = ctx.create_stream_destination().unwrap();
        let node = ctx.create_buffer_source(Signal::tone(220.0));
        ctx.close();
        assert_eq!(dest.connect(node.as_ref()), Err(GraphError::ContextClosed));
        assert!(ctx.create_stream_destination().is_err());
    }

    #[test]
    fn master_mixes_playing_sources_only() {
        let ctx = SoftContext::new(8_000);
        let playing = ctx.create_buffer_source(Signal::tone(1_000.0));
        let _idle = ctx.create_buffer_source(Signal::tone(300.0));
        playing.set_playing(true);

        let dest = SoftDestination::new(Arc::downgrade(&ctx), ctx.id());
        dest.connect(ctx.master().as_ref()).unwrap();
        let mixed = dest.render(0, 64).unwrap();

        let direct = SoftDestination::new(Arc::downgrade(&ctx), ctx.id());
        direct.connect(playing.as_ref()).unwrap();
        assert_eq!(mixed, direct.render(0, 64).unwrap());
        assert!(mixed.iter().any(|s| s.abs() > 0.1));
    }

    #[test]
    fn only_wav_recorders_are_available() {
        let ctx = SoftContext::new(DEFAULT_SAMPLE_RATE_HZ);
        let dest = ctx.create_stream_destination().unwrap();
        assert!(matches!(
            dest.open_recorder(Some("audio/webm; codecs=opus")),
            Err(EncoderError::UnsupportedMimeType(_))
        ));
        assert_eq!(dest.open_recorder(None).unwrap().mime_type(), "audio/wav");
    }
}
