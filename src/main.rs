//! voice-reader: chunked text narration with a synchronized image slideshow.

mod api;
mod config;
mod error;
mod images;
mod narrator;
mod notifier;
mod player;
mod session;

use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use narrator::kokoro::KokoroSpeech;
use narrator::primitive::event_channel;

#[derive(Parser, Debug)]
#[command(name = "voice-reader", about = "Read text aloud with a synchronized image slideshow")]
struct Args {
    /// Path to config.yaml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Text to narrate (replaces the saved session text)
    #[arg(short, long, conflicts_with = "text_file")]
    text: Option<String>,

    /// Read the text to narrate from a file
    #[arg(long)]
    text_file: Option<PathBuf>,

    /// Image topic (replaces the saved session topic)
    #[arg(long)]
    topic: Option<String>,

    /// Start playback immediately
    #[arg(short, long)]
    play: bool,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging (suppress noisy ort internals)
    let filter = if args.verbose {
        EnvFilter::new("debug,ort=info")
    } else {
        EnvFilter::new("info,ort=warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("voice-reader starting");

    let config = config::Config::load(args.config.as_deref());
    info!(
        "Config loaded: voice={} lang={} max_chunk_len={}",
        config.speech.voice, config.speech.lang, config.speech.max_chunk_len
    );
    let notifier = notifier::Notifier::new(config.feedback.notifications);

    // Speech output (blocking load, takes a few seconds)
    let (events, events_rx) = event_channel();
    let speech = if config.speech.enabled {
        info!("Loading Kokoro TTS model...");
        let loaded = tokio::task::spawn_blocking({
            let speech_config = config.speech.clone();
            let events = events.clone();
            move || KokoroSpeech::load(&speech_config, events)
        })
        .await?;
        match loaded {
            Ok(speech) => speech,
            Err(e) => {
                warn!("Failed to load TTS model: {e}");
                info!("Speech disabled, continuing with images only");
                KokoroSpeech::unavailable(&config.speech, events.clone())
            }
        }
    } else {
        info!("Speech disabled in config");
        KokoroSpeech::unavailable(&config.speech, events.clone())
    };

    let engine = narrator::PlaybackEngine::new(speech, events, &config.speech, notifier.clone());
    let (narrator, narrator_task) = narrator::Narrator::spawn(engine, events_rx);

    let session = session::SessionStore::load(&config.session.resolved_path());
    let player = player::Player::new(
        narrator,
        images::UnsplashClient::new(&config.images),
        &config.images,
        session,
        notifier,
    );

    let text = match (&args.text, &args.text_file) {
        (Some(text), _) => Some(text.clone()),
        (None, Some(path)) => Some(std::fs::read_to_string(path)?),
        (None, None) => None,
    };
    if let Some(text) = text {
        player.set_text(text);
    }
    if let Some(topic) = args.topic {
        player.set_topic(topic);
    }

    if config.api.enabled {
        api::start_api(api::ApiState { player: player.clone() }, config.api.port).await;
    }

    if args.play {
        player.play().await;
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    player.stop();
    drop(player);
    narrator_task.abort();

    Ok(())
}
