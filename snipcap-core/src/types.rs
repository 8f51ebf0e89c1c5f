use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Identity of a processing context (the audio-graph runtime owning nodes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextId(pub Uuid);

impl ContextId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

/// Identity of a node inside a processing context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub Uuid);

impl NodeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

/// Which playback mechanism triggered a capture request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    SpriteLibrary,
    BufferSource,
    MediaElement,
}

impl SourceKind {
    pub fn label(self) -> &'static str {
        match self {
            SourceKind::SpriteLibrary => "sprite-library",
            SourceKind::BufferSource => "buffer-source",
            SourceKind::MediaElement => "media-element",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArtifactOutcome {
    /// Encoded audio as a `data:` URI.
    Data(String),
    Error(String),
}

/// The single result of one capture session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedArtifact {
    pub outcome: ArtifactOutcome,
    pub duration_seconds: f64,
}

impl CapturedArtifact {
    pub fn data(data_uri: impl Into<String>, duration: Duration) -> Self {
        Self {
            outcome: ArtifactOutcome::Data(data_uri.into()),
            duration_seconds: duration.as_secs_f64(),
        }
    }

    pub fn error(reason: impl Into<String>, duration: Duration) -> Self {
        Self {
            outcome: ArtifactOutcome::Error(reason.into()),
            duration_seconds: duration.as_secs_f64(),
        }
    }

    pub fn data_uri(&self) -> Option<&str> {
        match &self.outcome {
            ArtifactOutcome::Data(uri) => Some(uri),
            ArtifactOutcome::Error(_) => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.outcome {
            ArtifactOutcome::Data(_) => None,
            ArtifactOutcome::Error(e) => Some(e),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ArtifactOutcome::Data(_))
    }
}

/// Outbound notifications to the page-integration collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Notification {
    RecordingStarted,
    AudioData(CapturedArtifact),
}

impl Notification {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Notification::AudioData(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_carries_exactly_one_payload() {
        let ok = CapturedArtifact::data("data:audio/webm;base64,AAAA", Duration::from_secs(3));
        assert_eq!(ok.data_uri(), Some("data:audio/webm;base64,AAAA"));
        assert_eq!(ok.error_message(), None);
        assert_eq!(ok.duration_seconds, 3.0);

        let err = CapturedArtifact::error("boom", Duration::from_millis(1500));
        assert_eq!(err.data_uri(), None);
        assert_eq!(err.error_message(), Some("boom"));
        assert!(!err.is_success());
        assert_eq!(err.duration_seconds, 1.5);
    }

    #[test]
    fn only_audio_data_is_terminal() {
        assert!(!Notification::RecordingStarted.is_terminal());
        let n = Notification::AudioData(CapturedArtifact::error("x", Duration::ZERO));
        assert!(n.is_terminal());
    }

    #[test]
    fn source_kind_serializes_snake_case() {
        let s = serde_json::to_string(&SourceKind::MediaElement).unwrap();
        assert_eq!(s, "\"media_element\"");
    }
}
