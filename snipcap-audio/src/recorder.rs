use crate::graph::SoftDestination;
use async_trait::async_trait;
use hound::{SampleFormat, WavSpec, WavWriter};
use snipcap_engine::traits::{EncoderError, Recorder, RecorderEvent, RecorderState};
use std::io::Cursor;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const PUMP_INTERVAL: Duration = Duration::from_millis(20);

/// Records a [`SoftDestination`] into a mono 16-bit WAV file.
///
/// Rendering runs on a pump task while recording. The encoded file is
/// delivered as a single fragment when the recorder stops. A capture with no
/// audible sample yields an empty fragment.
pub struct WavRecorder {
    destination: Arc<SoftDestination>,
    sample_rate_hz: u32,
    state: RecorderState,
    samples: Arc<Mutex<Vec<f32>>>,
    pump: Option<JoinHandle<()>>,
    events_tx: mpsc::UnboundedSender<RecorderEvent>,
    events_rx: mpsc::UnboundedReceiver<RecorderEvent>,
}

impl WavRecorder {
    pub const MIME_TYPE: &'static str = "audio/wav";

    pub fn new(destination: Arc<SoftDestination>, sample_rate_hz: u32) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            destination,
            sample_rate_hz,
            state: RecorderState::Inactive,
            samples: Arc::new(Mutex::new(Vec::new())),
            pump: None,
            events_tx,
            events_rx,
        }
    }

    fn spawn_pump(&self) -> Result<JoinHandle<()>, EncoderError> {
        let rt = tokio::runtime::Handle::try_current()
            .map_err(|_| EncoderError::Failed("no async runtime available".into()))?;

        let destination = self.destination.clone();
        let samples = self.samples.clone();
        let events = self.events_tx.clone();
        let frames_per_tick =
            (u64::from(self.sample_rate_hz) * PUMP_INTERVAL.as_millis() as u64 / 1000) as usize;

        Ok(rt.spawn(async move {
            let mut tick = tokio::time::interval(PUMP_INTERVAL);
            let mut position = 0u64;
            loop {
                tick.tick().await;
                match destination.render(position, frames_per_tick) {
                    Ok(block) => {
                        position += block.len() as u64;
                        samples
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .extend_from_slice(&block);
                    }
                    Err(e) => {
                        log::warn!("wav recorder: render failed: {e}");
                        let _ = events.send(RecorderEvent::Error(e.to_string()));
                        return;
                    }
                }
            }
        }))
    }
}

/// Encodes mono `f32` samples as 16-bit PCM WAV. Silence encodes to nothing.
pub fn encode_wav(samples: &[f32], sample_rate_hz: u32) -> Result<Vec<u8>, hound::Error> {
    if samples.iter().all(|s| *s == 0.0) {
        return Ok(Vec::new());
    }

    let spec = WavSpec {
        channels: 1,
        sample_rate: sample_rate_hz,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    let mut writer = WavWriter::new(&mut cursor, spec)?;
    for &sample in samples {
        writer.write_sample((sample * 32767.0).clamp(-32768.0, 32767.0) as i16)?;
    }
    writer.finalize()?;
    Ok(cursor.into_inner())
}

#[async_trait]
impl Recorder for WavRecorder {
    fn mime_type(&self) -> &str {
        Self::MIME_TYPE
    }

    fn state(&self) -> RecorderState {
        self.state
    }

    fn start(&mut self) -> Result<(), EncoderError> {
        if self.state == RecorderState::Recording || self.pump.is_some() {
            return Err(EncoderError::AlreadyStarted);
        }
        self.pump = Some(self.spawn_pump()?);
        self.state = RecorderState::Recording;
        Ok(())
    }

    fn stop(&mut self) {
        if self.state != RecorderState::Recording {
            return;
        }
        self.state = RecorderState::Inactive;
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }

        let samples = std::mem::take(
            &mut *self.samples.lock().unwrap_or_else(PoisonError::into_inner),
        );
        let event = match encode_wav(&samples, self.sample_rate_hz) {
            Ok(bytes) => {
                log::debug!(
                    "wav recorder: {} samples encoded to {} bytes",
                    samples.len(),
                    bytes.len()
                );
                RecorderEvent::Data(bytes)
            }
            Err(e) => RecorderEvent::Error(format!("wav encoding failed: {e}")),
        };
        let _ = self.events_tx.send(event);
        let _ = self.events_tx.send(RecorderEvent::Stopped);
    }

    async fn next_event(&mut self) -> Option<RecorderEvent> {
        self.events_rx.recv().await
    }
}

impl Drop for WavRecorder {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}
