use crate::traits::ArtifactSink;
use snipcap_core::types::{ArtifactOutcome, Notification};
use tokio::sync::mpsc;

/// Forwards notifications into an unbounded channel. A closed receiver is ignored.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ArtifactSink for ChannelSink {
    fn deliver(&self, notification: Notification) {
        if self.tx.send(notification).is_err() {
            log::debug!("notification dropped: receiver closed");
        }
    }
}

/// Only logs. Useful when nothing consumes the artifacts.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl ArtifactSink for LogSink {
    fn deliver(&self, notification: Notification) {
        match notification {
            Notification::RecordingStarted => log::info!("recording started"),
            Notification::AudioData(a) => match a.outcome {
                ArtifactOutcome::Data(uri) => log::info!(
                    "audio data: {} bytes of uri, {:.1}s",
                    uri.len(),
                    a.duration_seconds
                ),
                ArtifactOutcome::Error(e) => {
                    log::warn!("audio capture failed ({:.1}s): {e}", a.duration_seconds)
                }
            },
        }
    }
}
