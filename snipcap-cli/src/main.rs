use anyhow::Context;
use snipcap_audio::graph::DEFAULT_SAMPLE_RATE_HZ;
use snipcap_audio::{
    Signal, SoftContext, SoftContextFactory, SoftGraphHost, SoftMediaElement, SoftMediaHost,
    SoftSpriteHost, SoftSpriteLibrary,
};
use snipcap_core::config::CaptureConfig;
use snipcap_core::stage::{is_recognizable, parse_stage_duration};
use snipcap_core::types::Notification;
use snipcap_engine::delivery::ChannelSink;
use snipcap_engine::duration::DurationChannel;
use snipcap_engine::engine::CaptureEngine;
use snipcap_engine::watchers::{GraphWatcher, MediaElementWatcher, SpriteWatcher};
use snipcap_runtime::config_store::ConfigStore;
use snipcap_runtime::ipc::{InboundMessage, OutboundMessage};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

const DEFAULT_SECONDS: f64 = 2.0;
const SPRITE_LOAD_DELAY: Duration = Duration::from_secs(2);
const URI_PREVIEW_CHARS: usize = 48;

fn load_config() -> anyhow::Result<CaptureConfig> {
    match std::env::var("SNIPCAP_CONFIG") {
        Ok(path) if !path.trim().is_empty() => ConfigStore::at_path(path.trim()).load(),
        _ => Ok(CaptureConfig::default()),
    }
}

// SNIPCAP_STAGE takes page stage text ("Stage 3: 4.5 Seconds") and wins over
// SNIPCAP_DURATION.
fn snippet_seconds() -> anyhow::Result<f64> {
    if let Ok(stage) = std::env::var("SNIPCAP_STAGE") {
        return parse_stage_duration(&stage)
            .with_context(|| format!("no duration in stage text {stage:?}"));
    }
    match std::env::var("SNIPCAP_DURATION") {
        Ok(raw) => raw
            .trim()
            .parse::<f64>()
            .with_context(|| format!("invalid SNIPCAP_DURATION: {raw:?}")),
        Err(_) => Ok(DEFAULT_SECONDS),
    }
}

/// Shortens the data URI so a line stays readable in a terminal.
fn abbreviate(mut msg: OutboundMessage) -> OutboundMessage {
    if let OutboundMessage::AudioData {
        audio_data_uri: Some(uri),
        ..
    } = &mut msg
    {
        if uri.len() > URI_PREVIEW_CHARS {
            let total = uri.len();
            uri.truncate(URI_PREVIEW_CHARS);
            uri.push_str(&format!("...({total} chars)"));
        }
    }
    msg
}

/// Prints notifications until the session's artifact arrives, then waits for
/// the engine to release its tap.
async fn print_session(
    engine: &CaptureEngine,
    rx: &mut mpsc::UnboundedReceiver<Notification>,
    limit: Duration,
) -> anyhow::Result<()> {
    loop {
        let notification = tokio::time::timeout(limit, rx.recv())
            .await
            .context("timed out waiting for the capture")?
            .context("engine went away")?;
        let terminal = notification.is_terminal();
        println!("{}", abbreviate(notification.into()).to_json()?);
        if terminal {
            break;
        }
    }
    while !engine.is_idle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cfg = load_config()?;
    let seconds = snippet_seconds()?;
    if !is_recognizable(seconds) {
        log::warn!("a {seconds}s snippet is likely too short to recognize");
    }

    let duration = DurationChannel::new();
    InboundMessage::SetDuration { duration: seconds }.apply(&duration);
    let Some(snippet) = duration.current() else {
        log::warn!("snippet duration {seconds} disables capture; nothing to do");
        return Ok(());
    };
    let limit = cfg.countdown_for(snippet)
        + cfg.connect_delay()
        + cfg.flush_timeout()
        + Duration::from_secs(1);

    let (sink, mut rx) = ChannelSink::new();
    let engine = CaptureEngine::new(cfg, duration, Arc::new(sink));

    let sprites = SoftSpriteHost::new();
    let graph = SoftGraphHost::new();
    let media = SoftMediaHost::new();
    let factory = SoftContextFactory::new(DEFAULT_SAMPLE_RATE_HZ);

    let sprite_install = engine.register(Arc::new(SpriteWatcher::new(sprites.clone())));
    engine
        .register(Arc::new(GraphWatcher::new(graph.clone())))
        .await?;
    engine
        .register(Arc::new(MediaElementWatcher::new(media.clone(), factory.clone())))
        .await?;

    // Raw graph playback.
    let ctx = SoftContext::new(DEFAULT_SAMPLE_RATE_HZ);
    let tone = ctx.create_buffer_source(Signal::tone(440.0));
    graph.start(&ctx, &tone);
    print_session(&engine, &mut rx, limit).await?;
    tone.set_playing(false);

    // The sprite library shows up late; the installer keeps polling until then.
    tokio::time::sleep(SPRITE_LOAD_DELAY).await;
    let library = SoftSpriteLibrary::new(SoftContext::new(DEFAULT_SAMPLE_RATE_HZ));
    sprites.load(library.clone());
    let report = sprite_install.await?;
    log::info!(
        "sprite watcher installed={} after {} attempt(s)",
        report.installed,
        report.attempts
    );
    let chime = library.sprite(Signal::tone(660.0));
    let sound = library.play(&chime);
    print_session(&engine, &mut rx, limit).await?;
    sound.pause();

    // Media element playback.
    let element = SoftMediaElement::new(Some("prompt.mp3"));
    media.play(&element);
    print_session(&engine, &mut rx, limit).await?;

    log::info!("{} session(s) completed", engine.completed_sessions());
    Ok(())
}
