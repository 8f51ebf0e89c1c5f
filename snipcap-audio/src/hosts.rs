use crate::graph::{DEFAULT_SAMPLE_RATE_HZ, Signal, SoftContext, SoftNode};
use snipcap_engine::traits::{
    AudioContext, AudioNode, BufferStartHook, ContextFactory, GraphError, GraphHost, MediaElement,
    MediaElementHost, MediaPlayHook, SoundInstance, SpriteGroup, SpriteHost, SpriteLibrary,
    SpritePlayHook,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct SoftSound {
    node: Arc<SoftNode>,
    paused: AtomicBool,
}

impl SoftSound {
    pub fn node(&self) -> &Arc<SoftNode> {
        &self.node
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
        self.node.set_playing(false);
    }
}

/// A sprite: one sound file whose plays each spawn a sound instance.
pub struct SoftSprite {
    context: Arc<SoftContext>,
    signal: Signal,
    sounds: Mutex<Vec<Arc<SoftSound>>>,
}

impl SoftSprite {
    fn spawn_sound(&self) -> Arc<SoftSound> {
        let sound = Arc::new(SoftSound {
            node: self.context.create_buffer_source(self.signal),
            paused: AtomicBool::new(false),
        });
        lock(&self.sounds).push(sound.clone());
        sound
    }
}

impl SpriteGroup for SoftSprite {
    fn sounds(&self) -> Vec<SoundInstance> {
        let context: Arc<dyn AudioContext> = self.context.clone();
        lock(&self.sounds)
            .iter()
            .map(|s| {
                let node: Arc<dyn AudioNode> = s.node.clone();
                SoundInstance {
                    paused: s.paused.load(Ordering::Acquire),
                    playing: s.node.is_playing(),
                    node: Some(node),
                    context: Some(context.clone()),
                }
            })
            .collect()
    }
}

/// Sound-sprite library sharing a single processing context.
pub struct SoftSpriteLibrary {
    context: Arc<SoftContext>,
    hooks: Mutex<Vec<SpritePlayHook>>,
}

impl SoftSpriteLibrary {
    pub fn new(context: Arc<SoftContext>) -> Arc<Self> {
        Arc::new(Self {
            context,
            hooks: Mutex::new(Vec::new()),
        })
    }

    pub fn context(&self) -> &Arc<SoftContext> {
        &self.context
    }

    pub fn sprite(&self, signal: Signal) -> Arc<SoftSprite> {
        Arc::new(SoftSprite {
            context: self.context.clone(),
            signal,
            sounds: Mutex::new(Vec::new()),
        })
    }

    /// Plays `sprite`. Hooks see the new sound before it starts.
    pub fn play(&self, sprite: &SoftSprite) -> Arc<SoftSound> {
        let sound = sprite.spawn_sound();
        let hooks = lock(&self.hooks).clone();
        for hook in hooks {
            hook(sprite);
        }
        sound.node.set_playing(true);
        sound
    }
}

impl SpriteLibrary for SoftSpriteLibrary {
    fn add_play_hook(&self, hook: SpritePlayHook) -> anyhow::Result<()> {
        lock(&self.hooks).push(hook);
        Ok(())
    }
}

/// Hands out the sprite library once the page has "loaded" it.
#[derive(Default)]
pub struct SoftSpriteHost {
    library: Mutex<Option<Arc<SoftSpriteLibrary>>>,
}

impl SoftSpriteHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn load(&self, library: Arc<SoftSpriteLibrary>) {
        *lock(&self.library) = Some(library);
    }
}

impl SpriteHost for SoftSpriteHost {
    fn library(&self) -> Option<Arc<dyn SpriteLibrary>> {
        let library: Arc<dyn SpriteLibrary> = lock(&self.library).clone()?;
        Some(library)
    }
}

#[derive(Default)]
pub struct SoftGraphHost {
    hooks: Mutex<Vec<BufferStartHook>>,
}

impl SoftGraphHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Starts a buffer source, running the start hooks first.
    pub fn start(&self, context: &Arc<SoftContext>, node: &Arc<SoftNode>) {
        let dyn_context: Arc<dyn AudioContext> = context.clone();
        let dyn_node: Arc<dyn AudioNode> = node.clone();
        let hooks = lock(&self.hooks).clone();
        for hook in hooks {
            hook(&dyn_node, &dyn_context);
        }
        node.set_playing(true);
    }
}

impl GraphHost for SoftGraphHost {
    fn add_buffer_start_hook(&self, hook: BufferStartHook) -> anyhow::Result<()> {
        lock(&self.hooks).push(hook);
        Ok(())
    }
}

type BoundGraph = (Arc<dyn AudioContext>, Arc<dyn AudioNode>);

pub struct SoftMediaElement {
    src: Option<String>,
    bound: Mutex<Option<BoundGraph>>,
}

impl SoftMediaElement {
    pub fn new(src: Option<&str>) -> Arc<Self> {
        Arc::new(Self {
            src: src.map(str::to_string),
            bound: Mutex::new(None),
        })
    }
}

impl MediaElement for SoftMediaElement {
    fn src(&self) -> Option<String> {
        self.src.clone()
    }

    fn bound_graph(&self) -> Option<BoundGraph> {
        lock(&self.bound).clone()
    }

    fn bind_graph(&self, context: Arc<dyn AudioContext>, node: Arc<dyn AudioNode>) {
        *lock(&self.bound) = Some((context, node));
    }
}

#[derive(Default)]
pub struct SoftMediaHost {
    hooks: Mutex<Vec<MediaPlayHook>>,
}

impl SoftMediaHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn play(&self, element: &Arc<SoftMediaElement>) {
        let element: Arc<dyn MediaElement> = element.clone();
        let hooks = lock(&self.hooks).clone();
        for hook in hooks {
            hook(&element);
        }
    }
}

impl MediaElementHost for SoftMediaHost {
    fn add_play_hook(&self, hook: MediaPlayHook) -> anyhow::Result<()> {
        lock(&self.hooks).push(hook);
        Ok(())
    }
}

pub struct SoftContextFactory {
    sample_rate_hz: u32,
    created: AtomicUsize,
}

impl SoftContextFactory {
    pub fn new(sample_rate_hz: u32) -> Arc<Self> {
        Arc::new(Self {
            sample_rate_hz,
            created: AtomicUsize::new(0),
        })
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::Acquire)
    }
}

impl Default for SoftContextFactory {
    fn default() -> Self {
        Self {
            sample_rate_hz: DEFAULT_SAMPLE_RATE_HZ,
            created: AtomicUsize::new(0),
        }
    }
}

impl ContextFactory for SoftContextFactory {
    fn new_context(&self) -> Result<Arc<dyn AudioContext>, GraphError> {
        self.created.fetch_add(1, Ordering::AcqRel);
        Ok(SoftContext::new(self.sample_rate_hz))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snipcap_engine::watchers::active_sound_handle;

    #[test]
    fn sprite_hooks_see_the_new_sound_before_it_plays() {
        let library = SoftSpriteLibrary::new(SoftContext::new(DEFAULT_SAMPLE_RATE_HZ));
        let sprite = library.sprite(Signal::tone(330.0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        library
            .add_play_hook(Arc::new(move |group: &dyn SpriteGroup| {
                let sounds = group.sounds();
                lock(&sink).push((sounds.len(), sounds[0].playing));
            }))
            .unwrap();

        let sound = library.play(&sprite);
        assert_eq!(*lock(&seen), vec![(1, false)]);
        assert!(sound.node().is_playing());
    }

    #[test]
    fn paused_sounds_are_not_selected() {
        let library = SoftSpriteLibrary::new(SoftContext::new(DEFAULT_SAMPLE_RATE_HZ));
        let sprite = library.sprite(Signal::tone(330.0));
        let first = library.play(&sprite);
        first.pause();
        let second = library.play(&sprite);

        let handle = active_sound_handle(sprite.as_ref()).unwrap();
        assert_eq!(handle.node_id(), second.node().id());
    }

    #[test]
    fn sprite_host_is_empty_until_loaded() {
        let host = SoftSpriteHost::new();
        assert!(host.library().is_none());
        host.load(SoftSpriteLibrary::new(SoftContext::new(
            DEFAULT_SAMPLE_RATE_HZ,
        )));
        assert!(host.library().is_some());
    }

    #[test]
    fn graph_host_runs_hooks_before_starting() {
        let host = SoftGraphHost::new();
        let ctx = SoftContext::new(DEFAULT_SAMPLE_RATE_HZ);
        let node = ctx.create_buffer_source(Signal::tone(440.0));
        let playing_at_hook = Arc::new(Mutex::new(None));
        let sink = playing_at_hook.clone();
        let target = node.clone();
        host.add_buffer_start_hook(Arc::new(
            move |n: &Arc<dyn AudioNode>, c: &Arc<dyn AudioContext>| {
                assert_eq!(n.id(), target.id());
                assert!(!c.is_closed());
                *lock(&sink) = Some(target.is_playing());
            },
        ))
        .unwrap();

        host.start(&ctx, &node);
        assert_eq!(*lock(&playing_at_hook), Some(false));
        assert!(node.is_playing());
    }

    #[test]
    fn media_element_cannot_be_routed_twice() {
        let factory = SoftContextFactory::new(DEFAULT_SAMPLE_RATE_HZ);
        let element = SoftMediaElement::new(Some("clip.mp3"));
        let ctx = factory.new_context().unwrap();
        let node = ctx.create_media_element_source(element.as_ref()).unwrap();
        element.bind_graph(ctx.clone(), node);

        assert!(ctx.create_media_element_source(element.as_ref()).is_err());
        assert_eq!(factory.created(), 1);
    }
}
