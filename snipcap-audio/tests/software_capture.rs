use snipcap_audio::{
    Signal, SoftContext, SoftContextFactory, SoftGraphHost, SoftMediaElement, SoftMediaHost,
    SoftSpriteHost, SoftSpriteLibrary,
};
use snipcap_audio::graph::DEFAULT_SAMPLE_RATE_HZ;
use snipcap_core::config::CaptureConfig;
use snipcap_core::data_uri::decode_data_uri;
use snipcap_core::types::{CapturedArtifact, Notification};
use snipcap_engine::delivery::ChannelSink;
use snipcap_engine::duration::DurationChannel;
use snipcap_engine::engine::CaptureEngine;
use snipcap_engine::watchers::{GraphWatcher, MediaElementWatcher, SpriteWatcher};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn engine(seconds: f64) -> (CaptureEngine, mpsc::UnboundedReceiver<Notification>) {
    let (sink, rx) = ChannelSink::new();
    let engine = CaptureEngine::new(
        CaptureConfig::default(),
        DurationChannel::with_seconds(seconds),
        Arc::new(sink),
    );
    (engine, rx)
}

async fn next_artifact(rx: &mut mpsc::UnboundedReceiver<Notification>) -> CapturedArtifact {
    assert_eq!(rx.recv().await, Some(Notification::RecordingStarted));
    match rx.recv().await {
        Some(Notification::AudioData(artifact)) => artifact,
        other => panic!("expected audio data, got {other:?}"),
    }
}

fn wav_samples(artifact: &CapturedArtifact) -> Vec<i16> {
    let uri = artifact.data_uri().expect("data artifact");
    let (mime, bytes) = decode_data_uri(uri).unwrap();
    assert_eq!(mime, "audio/wav");
    let reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
    assert_eq!(reader.spec().sample_rate, DEFAULT_SAMPLE_RATE_HZ);
    reader.into_samples::<i16>().map(Result::unwrap).collect()
}

#[tokio::test(start_paused = true)]
async fn buffer_source_capture_produces_wav_of_countdown_length() {
    let (engine, mut rx) = engine(1.0);
    let host = SoftGraphHost::new();
    let report = engine.register(Arc::new(GraphWatcher::new(host.clone()))).await.unwrap();
    assert!(report.installed);

    let ctx = SoftContext::new(DEFAULT_SAMPLE_RATE_HZ);
    let node = ctx.create_buffer_source(Signal::tone(440.0));
    host.start(&ctx, &node);

    let artifact = next_artifact(&mut rx).await;
    assert_eq!(artifact.duration_seconds, 1.0);
    let samples = wav_samples(&artifact);
    // 1 s plus the 200 ms trailing margin, give or take a pump tick.
    assert!(
        (18_500..=20_000).contains(&samples.len()),
        "got {} samples",
        samples.len()
    );
    assert!(samples.iter().any(|s| s.unsigned_abs() > 1_000));
    assert!(engine.is_idle());
}

#[tokio::test(start_paused = true)]
async fn untappable_node_is_captured_through_the_master_mix() {
    let (engine, mut rx) = engine(1.0);
    let host = SoftGraphHost::new();
    engine.register(Arc::new(GraphWatcher::new(host.clone()))).await.unwrap();

    let ctx = SoftContext::new(DEFAULT_SAMPLE_RATE_HZ);
    let node = ctx.create_source(Signal::tone(220.0), 0);
    host.start(&ctx, &node);

    let artifact = next_artifact(&mut rx).await;
    assert!(wav_samples(&artifact).iter().any(|s| s.unsigned_abs() > 1_000));
}

#[tokio::test(start_paused = true)]
async fn silent_source_reports_an_empty_capture() {
    let (engine, mut rx) = engine(1.0);
    let host = SoftGraphHost::new();
    engine.register(Arc::new(GraphWatcher::new(host.clone()))).await.unwrap();

    let ctx = SoftContext::new(DEFAULT_SAMPLE_RATE_HZ);
    let node = ctx.create_buffer_source(Signal::Silence);
    host.start(&ctx, &node);

    let artifact = next_artifact(&mut rx).await;
    assert!(!artifact.is_success());
    assert!(artifact.error_message().unwrap().contains("silent"));
    assert!(engine.is_idle());
}

#[tokio::test(start_paused = true)]
async fn sprite_library_loaded_late_is_captured() {
    let (engine, mut rx) = engine(1.0);
    let host = SoftSpriteHost::new();
    let install = engine.register(Arc::new(SpriteWatcher::new(host.clone())));

    tokio::time::sleep(Duration::from_secs(4)).await;
    let library = SoftSpriteLibrary::new(SoftContext::new(DEFAULT_SAMPLE_RATE_HZ));
    host.load(library.clone());

    let report = install.await.unwrap();
    assert!(report.installed);
    assert!(report.attempts >= 2);

    let sprite = library.sprite(Signal::tone(660.0));
    library.play(&sprite);
    let artifact = next_artifact(&mut rx).await;
    assert!(!wav_samples(&artifact).is_empty());
}

#[tokio::test(start_paused = true)]
async fn media_element_is_routed_once_across_plays() {
    let (engine, mut rx) = engine(1.0);
    let host = SoftMediaHost::new();
    let factory = SoftContextFactory::new(DEFAULT_SAMPLE_RATE_HZ);
    engine
        .register(Arc::new(MediaElementWatcher::new(host.clone(), factory.clone())))
        .await
        .unwrap();

    let element = SoftMediaElement::new(Some("prompt.mp3"));
    host.play(&element);
    assert!(next_artifact(&mut rx).await.is_success());

    host.play(&element);
    assert!(next_artifact(&mut rx).await.is_success());
    assert_eq!(factory.created(), 1);

    host.play(&SoftMediaElement::new(None));
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(rx.try_recv().is_err());
}
