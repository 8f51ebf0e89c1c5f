use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Last-write-wins snippet length, written by the page-integration layer and
/// read by the engine when a capture request is scheduled.
///
/// `None` (the initial value) suppresses capture.
#[derive(Debug, Clone)]
pub struct DurationChannel {
    tx: Arc<watch::Sender<Option<Duration>>>,
}

impl DurationChannel {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    pub fn with_seconds(seconds: f64) -> Self {
        let ch = Self::new();
        ch.set_seconds(seconds);
        ch
    }

    /// Non-positive or non-finite values suppress capture.
    pub fn set_seconds(&self, seconds: f64) {
        let value = (seconds.is_finite() && seconds > 0.0)
            .then(|| Duration::try_from_secs_f64(seconds).ok())
            .flatten();
        self.set(value);
    }

    pub fn set(&self, value: Option<Duration>) {
        let prev = self.tx.send_replace(value);
        if prev != value {
            log::debug!("snippet duration: {prev:?} -> {value:?}");
        }
    }

    pub fn current(&self) -> Option<Duration> {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Duration>> {
        self.tx.subscribe()
    }
}

impl Default for DurationChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_by_default() {
        assert_eq!(DurationChannel::new().current(), None);
    }

    #[test]
    fn last_write_wins_across_clones() {
        let ch = DurationChannel::new();
        let writer = ch.clone();
        writer.set_seconds(3.0);
        writer.set_seconds(4.5);
        assert_eq!(ch.current(), Some(Duration::from_millis(4_500)));
    }

    #[test]
    fn non_positive_values_suppress() {
        let ch = DurationChannel::with_seconds(2.0);
        ch.set_seconds(0.0);
        assert_eq!(ch.current(), None);
        ch.set_seconds(-1.0);
        assert_eq!(ch.current(), None);
        ch.set_seconds(f64::NAN);
        assert_eq!(ch.current(), None);
    }

    #[tokio::test]
    async fn subscribers_see_updates() {
        let ch = DurationChannel::new();
        let mut rx = ch.subscribe();
        ch.set_seconds(1.0);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), Some(Duration::from_secs(1)));
    }
}
