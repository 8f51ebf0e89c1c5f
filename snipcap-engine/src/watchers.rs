use crate::traits::{
    AudioContext, AudioGraphHandle, AudioNode, BufferStartHook, ContextFactory, GraphHost,
    MediaElement, MediaElementHost, MediaPlayHook, PlaybackObserver, SpriteGroup, SpriteHost,
    SpritePlayHook,
};
use snipcap_core::config::RetryPolicy;
use snipcap_core::types::SourceKind;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::time::MissedTickBehavior;

/// Observes one playback mechanism and reports attempts to a [`PlaybackObserver`].
pub trait SourceWatcher: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Installs the watcher's hook. `Ok(false)` means the source is not
    /// available yet and the call should be retried later. Installing twice is
    /// a no-op that returns `Ok(true)`.
    fn try_install(&self, observer: Arc<dyn PlaybackObserver>) -> anyhow::Result<bool>;

    fn is_installed(&self) -> bool;
}

/// Claims the install guard; released again if the install does not go through.
fn guarded_install(
    guard: &AtomicBool,
    install: impl FnOnce() -> anyhow::Result<bool>,
) -> anyhow::Result<bool> {
    if guard
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        return Ok(true);
    }

    match install() {
        Ok(true) => Ok(true),
        other => {
            guard.store(false, Ordering::Release);
            other
        }
    }
}

/// Watches the sound-sprite library, which may load after we start.
pub struct SpriteWatcher {
    host: Arc<dyn SpriteHost>,
    installed: AtomicBool,
}

impl SpriteWatcher {
    pub fn new(host: Arc<dyn SpriteHost>) -> Self {
        Self {
            host,
            installed: AtomicBool::new(false),
        }
    }
}

/// The sound that is actually playing in a sprite group, as a graph handle.
pub fn active_sound_handle(group: &dyn SpriteGroup) -> Option<AudioGraphHandle> {
    group
        .sounds()
        .into_iter()
        .filter(|s| !s.paused || s.playing)
        .find_map(|s| {
            let node = s.node?;
            let context = s.context?;
            Some(AudioGraphHandle::new(SourceKind::SpriteLibrary, &node, &context))
        })
}

impl SourceWatcher for SpriteWatcher {
    fn kind(&self) -> SourceKind {
        SourceKind::SpriteLibrary
    }

    fn try_install(&self, observer: Arc<dyn PlaybackObserver>) -> anyhow::Result<bool> {
        guarded_install(&self.installed, || {
            let Some(library) = self.host.library() else {
                return Ok(false);
            };

            let hook: SpritePlayHook = Arc::new(move |group: &dyn SpriteGroup| {
                if !observer.is_accepting() {
                    return;
                }
                match active_sound_handle(group) {
                    Some(handle) => observer.on_playback_attempt(handle),
                    None => log::debug!("sprite play without a connectable sound"),
                }
            });
            library.add_play_hook(hook)?;
            Ok(true)
        })
    }

    fn is_installed(&self) -> bool {
        self.installed.load(Ordering::Acquire)
    }
}

/// Watches every buffer-source `start` on the raw audio graph.
pub struct GraphWatcher {
    host: Arc<dyn GraphHost>,
    installed: AtomicBool,
}

impl GraphWatcher {
    pub fn new(host: Arc<dyn GraphHost>) -> Self {
        Self {
            host,
            installed: AtomicBool::new(false),
        }
    }
}

impl SourceWatcher for GraphWatcher {
    fn kind(&self) -> SourceKind {
        SourceKind::BufferSource
    }

    fn try_install(&self, observer: Arc<dyn PlaybackObserver>) -> anyhow::Result<bool> {
        guarded_install(&self.installed, || {
            let hook: BufferStartHook =
                Arc::new(move |node: &Arc<dyn AudioNode>, context: &Arc<dyn AudioContext>| {
                    observer.on_playback_attempt(AudioGraphHandle::new(
                        SourceKind::BufferSource,
                        node,
                        context,
                    ));
                });
            self.host.add_buffer_start_hook(hook)?;
            Ok(true)
        })
    }

    fn is_installed(&self) -> bool {
        self.installed.load(Ordering::Acquire)
    }
}

/// Watches media-element `play`, routing each element into a fresh context.
pub struct MediaElementWatcher {
    host: Arc<dyn MediaElementHost>,
    contexts: Arc<dyn ContextFactory>,
    installed: AtomicBool,
}

impl MediaElementWatcher {
    pub fn new(host: Arc<dyn MediaElementHost>, contexts: Arc<dyn ContextFactory>) -> Self {
        Self {
            host,
            contexts,
            installed: AtomicBool::new(false),
        }
    }
}

// An element can be routed into one graph only, so a second play reuses it.
fn route_element(
    element: &Arc<dyn MediaElement>,
    contexts: &dyn ContextFactory,
) -> anyhow::Result<(Arc<dyn AudioContext>, Arc<dyn AudioNode>)> {
    if let Some(bound) = element.bound_graph() {
        return Ok(bound);
    }

    let context = contexts.new_context()?;
    let node = context.create_media_element_source(element.as_ref())?;
    element.bind_graph(context.clone(), node.clone());
    Ok((context, node))
}

impl SourceWatcher for MediaElementWatcher {
    fn kind(&self) -> SourceKind {
        SourceKind::MediaElement
    }

    fn try_install(&self, observer: Arc<dyn PlaybackObserver>) -> anyhow::Result<bool> {
        guarded_install(&self.installed, || {
            let contexts = self.contexts.clone();
            let hook: MediaPlayHook = Arc::new(move |element: &Arc<dyn MediaElement>| {
                if element.src().is_none_or(|s| s.trim().is_empty()) {
                    return;
                }
                if !observer.is_accepting() {
                    return;
                }
                match route_element(element, contexts.as_ref()) {
                    Ok((context, node)) => observer.on_playback_attempt(AudioGraphHandle::new(
                        SourceKind::MediaElement,
                        &node,
                        &context,
                    )),
                    Err(e) => log::warn!("media element capture setup failed: {e}"),
                }
            });
            self.host.add_play_hook(hook)?;
            Ok(true)
        })
    }

    fn is_installed(&self) -> bool {
        self.installed.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstallReport {
    pub kind: SourceKind,
    pub attempts: u32,
    pub installed: bool,
}

/// Retries a watcher install on a fixed cadence until it succeeds or the
/// policy runs out of attempts.
#[derive(Debug, Clone, Copy)]
pub struct PollingInstaller {
    policy: RetryPolicy,
}

impl PollingInstaller {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub async fn run(
        &self,
        watcher: Arc<dyn SourceWatcher>,
        observer: Arc<dyn PlaybackObserver>,
    ) -> InstallReport {
        let kind = watcher.kind();
        let mut ticker = tokio::time::interval(self.policy.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut attempts = 0u32;
        loop {
            // First tick completes immediately.
            ticker.tick().await;
            attempts = attempts.saturating_add(1);

            match watcher.try_install(observer.clone()) {
                Ok(true) => {
                    log::info!("{} watcher installed after {attempts} attempt(s)", kind.label());
                    return InstallReport {
                        kind,
                        attempts,
                        installed: true,
                    };
                }
                Ok(false) => log::debug!("{} source not available yet", kind.label()),
                Err(e) => log::warn!("{} watcher install failed: {e}", kind.label()),
            }

            if !self.policy.allows(attempts.saturating_add(1)) {
                log::warn!("{} watcher gave up after {attempts} attempt(s)", kind.label());
                return InstallReport {
                    kind,
                    attempts,
                    installed: false,
                };
            }
        }
    }
}
