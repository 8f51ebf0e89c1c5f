use crate::duration::DurationChannel;
use crate::session::{CaptureError, CaptureSession, CaptureState};
use crate::traits::{
    ArtifactSink, AudioGraphHandle, PlaybackObserver, Recorder, RecorderEvent, RecorderState,
    StreamDestination,
};
use crate::watchers::{InstallReport, PollingInstaller, SourceWatcher};
use snipcap_core::config::CaptureConfig;
use snipcap_core::data_uri::encode_data_uri;
use snipcap_core::types::{CapturedArtifact, Notification};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Why the recording loop ended without an encoder error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    Natural,
    Countdown,
    External,
}

/// Owns the capture state machine and drives one session at a time.
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct CaptureEngine {
    cfg: Arc<CaptureConfig>,
    duration: DurationChannel,
    sink: Arc<dyn ArtifactSink>,
    session: Arc<Mutex<CaptureSession>>,
    runtime: Option<Handle>,
}

impl CaptureEngine {
    /// Remembers the runtime it is created on, if any, so playback hooks fired
    /// from host threads outside the runtime can still schedule captures.
    pub fn new(cfg: CaptureConfig, duration: DurationChannel, sink: Arc<dyn ArtifactSink>) -> Self {
        Self {
            cfg: Arc::new(cfg),
            duration,
            sink,
            session: Arc::new(Mutex::new(CaptureSession::new())),
            runtime: Handle::try_current().ok(),
        }
    }

    /// Schedules captures on `runtime` when the caller has no runtime context.
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.cfg
    }

    pub fn duration(&self) -> &DurationChannel {
        &self.duration
    }

    pub fn state(&self) -> CaptureState {
        self.lock().state()
    }

    pub fn is_idle(&self) -> bool {
        self.state() == CaptureState::Idle
    }

    pub fn completed_sessions(&self) -> u64 {
        self.lock().completed_sessions()
    }

    /// Runs `f` against the session state. Intended for inspection.
    pub fn with_session<R>(&self, f: impl FnOnce(&CaptureSession) -> R) -> R {
        f(&self.lock())
    }

    fn lock(&self) -> MutexGuard<'_, CaptureSession> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Schedules a capture of `handle` after the connect delay.
    ///
    /// Runs on the caller's runtime, else on the one the engine was built with.
    /// Returns `false` (and does nothing) when no duration is configured, a
    /// session is already active, or neither runtime is available.
    pub fn request_capture(&self, handle: AudioGraphHandle) -> bool {
        let Some(duration) = self.duration.current() else {
            log::debug!("dropping {} playback: no snippet duration", handle.source().label());
            return false;
        };

        let state = self.state();
        if state != CaptureState::Idle {
            log::debug!(
                "dropping {} playback: session is {}",
                handle.source().label(),
                state.label()
            );
            return false;
        }

        let Some(rt) = Handle::try_current().ok().or_else(|| self.runtime.clone()) else {
            log::warn!("dropping playback: no async runtime to schedule capture on");
            return false;
        };

        let engine = self.clone();
        let delay = self.cfg.connect_delay();
        rt.spawn(async move {
            tokio::time::sleep(delay).await;
            engine.capture(handle, duration).await;
        });
        true
    }

    /// Stops the active recording early. The session still finalizes normally.
    pub fn stop(&self) -> bool {
        match self.lock().stop_token() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Installs a watcher, retrying per the configured policy until its source appears.
    pub fn register(&self, watcher: Arc<dyn SourceWatcher>) -> JoinHandle<InstallReport> {
        let observer: Arc<dyn PlaybackObserver> = Arc::new(self.clone());
        let installer = PollingInstaller::new(self.cfg.sprite_retry);
        tokio::spawn(async move { installer.run(watcher, observer).await })
    }

    /// Runs one session to completion and returns its artifact.
    ///
    /// Returns `None` without emitting anything when another session is active.
    pub async fn capture(
        &self,
        handle: AudioGraphHandle,
        duration: Duration,
    ) -> Option<CapturedArtifact> {
        let tapped = self.lock().tap(&handle, self.cfg.fallback);
        let (session_id, destination) = match tapped {
            Ok(t) => t,
            Err(CaptureError::Busy) => {
                log::debug!("capture request for {:?} ignored: busy", handle.node_id());
                return None;
            }
            Err(e) => {
                log::error!("capture failed before recording: {e}");
                return Some(self.emit(CapturedArtifact::error(e.to_string(), duration)));
            }
        };
        log::info!(
            "session {:?}: tapped {} node {:?}",
            session_id.0,
            handle.source().label(),
            handle.node_id()
        );

        let mut recorder = match self.open_recorder(destination.as_ref()) {
            Ok(r) => r,
            Err(e) => return Some(self.fail(e, duration)),
        };

        let stop = CancellationToken::new();
        self.lock().begin_recording(stop.clone());
        self.sink.deliver(Notification::RecordingStarted);
        log::info!("session {:?}: recording for {duration:?}", session_id.0);

        let countdown = self.cfg.countdown_for(duration);
        if let Err(e) = self.drive(recorder.as_mut(), countdown, &stop).await {
            if recorder.state() == RecorderState::Recording {
                recorder.stop();
            }
            return Some(self.fail(e, duration));
        }

        let (chunks, tap) = self.lock().finalize();
        let artifact = match self.encode(recorder.mime_type(), chunks) {
            Ok(uri) => CapturedArtifact::data(uri, duration),
            Err(e) => {
                log::error!("session {:?}: {e}", session_id.0);
                CapturedArtifact::error(e.to_string(), duration)
            }
        };
        let artifact = self.emit(artifact);
        self.lock().release(tap);
        log::info!("session {:?}: done", session_id.0);
        Some(artifact)
    }

    fn open_recorder(
        &self,
        destination: &dyn StreamDestination,
    ) -> Result<Box<dyn Recorder>, CaptureError> {
        let preferred = self.cfg.preferred_mime_type.trim();
        let mut recorder = match destination.open_recorder(Some(preferred)) {
            Ok(r) => r,
            Err(e) => {
                log::info!("recorder rejected {preferred:?} ({e}); using its default format");
                destination
                    .open_recorder(None)
                    .map_err(|e| CaptureError::Encoder(e.to_string()))?
            }
        };
        recorder
            .start()
            .map_err(|e| CaptureError::Encoder(e.to_string()))?;
        Ok(recorder)
    }

    /// Collects fragments until the recorder stops on its own, the countdown
    /// elapses or an external stop arrives; then waits (bounded) for the flush.
    async fn drive(
        &self,
        recorder: &mut dyn Recorder,
        countdown: Duration,
        stop: &CancellationToken,
    ) -> Result<(), CaptureError> {
        let deadline = tokio::time::sleep(countdown);
        tokio::pin!(deadline);

        let reason = loop {
            tokio::select! {
                event = recorder.next_event() => match event {
                    Some(RecorderEvent::Data(bytes)) => {
                        self.lock().push_chunk(bytes);
                    }
                    Some(RecorderEvent::Stopped) | None => break StopReason::Natural,
                    Some(RecorderEvent::Error(e)) => return Err(CaptureError::Encoder(e)),
                },
                _ = &mut deadline => break StopReason::Countdown,
                _ = stop.cancelled() => break StopReason::External,
            }
        };

        if reason == StopReason::Natural {
            return Ok(());
        }
        log::debug!("stopping recorder: {reason:?}");

        // Stopping twice is a no-op, so check first.
        if recorder.state() == RecorderState::Recording {
            recorder.stop();
        }

        let flush = async {
            loop {
                match recorder.next_event().await {
                    Some(RecorderEvent::Data(bytes)) => {
                        self.lock().push_chunk(bytes);
                    }
                    Some(RecorderEvent::Stopped) | None => return Ok(()),
                    Some(RecorderEvent::Error(e)) => return Err(CaptureError::Encoder(e)),
                }
            }
        };

        let limit = self.cfg.flush_timeout();
        tokio::time::timeout(limit, flush)
            .await
            .map_err(|_| CaptureError::FlushTimeout(limit))?
    }

    fn encode(&self, recorder_mime: &str, chunks: Vec<Vec<u8>>) -> Result<String, CaptureError> {
        if chunks.is_empty() {
            return Err(CaptureError::EmptyCapture);
        }

        let blob = chunks.concat();
        let mime = match self.cfg.artifact_mime_type.trim() {
            "" => recorder_mime,
            configured => configured,
        };
        encode_data_uri(mime, &blob, self.cfg.max_artifact_bytes)
            .map_err(|e| CaptureError::Conversion(e.to_string()))
    }

    fn emit(&self, artifact: CapturedArtifact) -> CapturedArtifact {
        self.sink.deliver(Notification::AudioData(artifact.clone()));
        artifact
    }

    /// Error path: emit, then disconnect and return to Idle.
    fn fail(&self, err: CaptureError, duration: Duration) -> CapturedArtifact {
        log::error!("capture failed: {err}");
        let artifact = self.emit(CapturedArtifact::error(err.to_string(), duration));
        self.lock().abort();
        artifact
    }
}

impl PlaybackObserver for CaptureEngine {
    fn on_playback_attempt(&self, handle: AudioGraphHandle) {
        self.request_capture(handle);
    }

    fn is_accepting(&self) -> bool {
        self.duration.current().is_some() && self.is_idle()
    }
}
