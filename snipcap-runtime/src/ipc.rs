use serde::{Deserialize, Serialize};
use snipcap_core::types::{ArtifactOutcome, Notification};
use snipcap_engine::duration::DurationChannel;

/// Messages the page integration sends to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    /// Seconds to record on the next playback. Zero or negative disables capture.
    SetDuration { duration: f64 },
}

impl InboundMessage {
    pub fn parse(line: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(line)?)
    }

    pub fn apply(&self, duration: &DurationChannel) {
        match self {
            InboundMessage::SetDuration { duration: seconds } => duration.set_seconds(*seconds),
        }
    }
}

/// Messages the engine sends back to the page integration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    RecordingStarted,
    AudioData {
        #[serde(rename = "audioDataUri", default, skip_serializing_if = "Option::is_none")]
        audio_data_uri: Option<String>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,

        duration: f64,
    },
}

impl OutboundMessage {
    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl From<Notification> for OutboundMessage {
    fn from(n: Notification) -> Self {
        match n {
            Notification::RecordingStarted => OutboundMessage::RecordingStarted,
            Notification::AudioData(artifact) => {
                let (audio_data_uri, error) = match artifact.outcome {
                    ArtifactOutcome::Data(uri) => (Some(uri), None),
                    ArtifactOutcome::Error(e) => (None, Some(e)),
                };
                OutboundMessage::AudioData {
                    audio_data_uri,
                    error,
                    duration: artifact.duration_seconds,
                }
            }
        }
    }
}
