//! Voice Chat Application
//!
//! Talks to the remote live speech model through the default microphone and
//! speakers until Ctrl-C.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use live_voice_session::{
    audio::{list_devices, CpalMicrophone, CpalOutput},
    network::LiveTransport,
    AppConfig, ConnectionState, Error, SessionDelegate, ToolInvocation, TranscriptEvent,
    VoiceSession,
};

struct ConsoleDelegate;

impl SessionDelegate for ConsoleDelegate {
    fn on_error(&self, error: &Error) {
        eprintln!("[error] {}", error);
    }

    fn on_interrupted(&self) {
        println!("[interrupted]");
    }

    fn on_text_received(&self, event: &TranscriptEvent) {
        println!(
            "[{}] {}: {}",
            event.received_at.format("%H:%M:%S"),
            event.role.as_str(),
            event.text
        );
    }

    fn on_function_call(&self, call: &ToolInvocation) {
        println!(
            "[tool] {}({})",
            call.name,
            serde_json::Value::Object(call.args.clone())
        );
    }

    fn on_state_changed(&self, state: ConnectionState) {
        println!("[state] {}", state.as_str());
    }

    fn on_turn_complete(&self) {
        tracing::debug!("Model turn complete");
    }
}

fn print_devices() {
    println!("\n=== Available Audio Devices ===");
    for device in list_devices() {
        let device_type = if device.is_input { "Input" } else { "Output" };
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {} ({}){}:", device.name, device_type, default_marker);
        println!("    ID: {}", device.id);
        println!("    Sample rate: {:?}", device.sample_rate);
        println!("    Channels: {:?}", device.channels);
    }
    println!();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config_path: Option<PathBuf> = None;
    let mut input_device: Option<String> = None;
    let mut output_device: Option<String> = None;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--list-devices" => {
                print_devices();
                return Ok(());
            }
            "--input" => input_device = args.next(),
            "--output" => output_device = args.next(),
            path => config_path = Some(PathBuf::from(path)),
        }
    }

    let config = AppConfig::load_or_default(config_path.as_deref())
        .context("Failed to load configuration")?;

    tracing::info!("Starting voice chat with {}", config.session.model);

    let session = VoiceSession::new(
        Arc::new(LiveTransport::new(&config.transport)),
        Arc::new(CpalMicrophone::new(input_device)),
        Arc::new(CpalOutput::new(output_device)),
        Arc::new(ConsoleDelegate),
        config.audio.clone(),
    );

    tokio::select! {
        result = session.start(config.session.clone()) => {
            result.context("Failed to start session")?;
        }
        _ = tokio::signal::ctrl_c() => {
            session.stop().await;
            return Ok(());
        }
    }

    println!("Connected. Speak into the microphone, Ctrl+C to quit.");

    let status = session.status();
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(5));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                if !status.is_active() {
                    tracing::info!("Session ended");
                    break;
                }
                let stats = session.stats().await;
                tracing::debug!(
                    "volume {:.2}, sent {}, dropped {}, decoded {}, live {}",
                    status.volume(),
                    stats.frames_sent,
                    stats.frames_dropped,
                    stats.parts_decoded,
                    stats.live_buffers
                );
            }
        }
    }

    tracing::info!("Shutting down...");
    session.stop().await;

    Ok(())
}
