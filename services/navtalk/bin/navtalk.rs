//! Terminal client for a NavTalk avatar session.
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment and command line.
//! 2. Starting a realtime session with the system microphone and WebRTC stack.
//! 3. Printing transcripts and status changes until the session ends or Ctrl+C.

use anyhow::Context;
use clap::Parser;
use navtalk_cli::{
    config::{Args, Config},
    presenter::Presenter,
};
use navtalk_realtime::{Backends, RealtimeSession, RtpDrainSink};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

/// Resolves once `Ctrl+C` is received.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal. Ending session...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let args = Args::parse();
    let config = Config::from_env()
        .context("Failed to load configuration")?
        .with_args(&args)
        .context("Invalid command-line arguments")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();
    info!(
        character = %config.character_name,
        voice = %config.voice,
        host = %config.host,
        "Configuration loaded"
    );

    // --- 3. Start the Session ---
    let backends = Backends::system().context("Failed to initialize media backends")?;
    let session_config = config
        .session_config()
        .with_media_sink(Arc::new(RtpDrainSink::new()));
    let (session, mut events) = RealtimeSession::spawn(session_config, backends);
    session.start().await.context("Failed to start session")?;
    eprintln!("Press Enter to ask the avatar to speak, Ctrl+C to finish.");

    // --- 4. Relay Events Until Shutdown ---
    let presenter = Presenter::new(args.partials);
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(_)) => {
                    if let Err(e) = session.request_assistant_response() {
                        warn!("Could not request a response: {}", e);
                    }
                }
                Ok(None) => stdin_open = false,
                Err(e) => {
                    warn!("Failed to read stdin: {}", e);
                    stdin_open = false;
                }
            },
            event = events.recv() => {
                let Some(event) = event else { break };
                if let Some(line) = presenter.render(&event) {
                    println!("{line}");
                }
                if Presenter::is_terminal(&event) {
                    break;
                }
            }
        }
    }

    // --- 5. Release Resources ---
    session.stop().await.context("Failed to stop session")?;
    info!("Session stopped");
    Ok(())
}
