//! Viva interview client
//!
//! Creates an interview session for a role, waits for the candidate to press
//! Enter, then runs the spoken interview on the local microphone and speakers.
//! Type `q` + Enter or press CTRL-C to end early.

use anyhow::Context;
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use viva_session::{
    format_clock, InterviewConfig, InterviewRequest, InterviewSession, InterviewSessionController,
    Portfolio, SessionCommand, SessionDevices, SessionLifecycle, SessionLifecycleClient,
    SessionOutcome, WebSocketConnector,
};
use viva_voice::{CpalMicrophone, InputTap, PlaybackController, RodioSink};

#[derive(Parser, Debug)]
#[command(name = "viva", about = "Spoken mock interviews from the terminal")]
struct Cli {
    /// Role being interviewed for
    #[arg(long, env = "VIVA_ROLE", required_unless_present = "list_input_devices")]
    role: Option<String>,

    /// Description of the role
    #[arg(long = "role-description", env = "VIVA_ROLE_DESCRIPTION", default_value = "")]
    role_description: String,

    /// Portfolio or CV as plain text
    #[arg(long = "portfolio-text", conflicts_with = "portfolio_file")]
    portfolio_text: Option<String>,

    /// Portfolio or CV as a PDF file
    #[arg(long = "portfolio-file", value_name = "PDF")]
    portfolio_file: Option<PathBuf>,

    /// Config file (defaults to config/viva)
    #[arg(long, env = "VIVA_CONFIG")]
    config: Option<String>,

    /// Input device name (see --list-input-devices)
    #[arg(long = "input-device")]
    input_device: Option<String>,

    #[arg(long = "list-input-devices", default_value_t = false)]
    list_input_devices: bool,
}

impl Cli {
    fn portfolio(&self) -> anyhow::Result<Portfolio> {
        if let Some(path) = &self.portfolio_file {
            return Portfolio::from_pdf(path)
                .with_context(|| format!("could not read portfolio {}", path.display()));
        }
        Ok(match &self.portfolio_text {
            Some(text) if !text.trim().is_empty() => Portfolio::Text(text.clone()),
            _ => Portfolio::None,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (before any env::var calls)
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[viva] .env not loaded: {} (using system environment)", e);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    if cli.list_input_devices {
        for name in CpalMicrophone::list_input_devices()? {
            println!("{}", name);
        }
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => InterviewConfig::load_from(path)?,
        None => InterviewConfig::load()?,
    };
    let request = InterviewRequest {
        role: cli.role.clone().unwrap_or_default(),
        role_description: cli.role_description.clone(),
        portfolio: cli.portfolio()?,
    };

    // Open the speaker before creating a session so a missing device does not strand one.
    let (playback_tx, playback_rx) = mpsc::unbounded_channel();
    let sink = RodioSink::spawn(playback_tx).context("no audio output device")?;
    let devices = SessionDevices {
        tap: InputTap::new(),
        microphone: Box::new(CpalMicrophone::new(cli.input_device.clone())),
        playback: PlaybackController::new(Box::new(sink), playback_rx),
    };

    let lifecycle: Arc<dyn SessionLifecycle> = Arc::new(SessionLifecycleClient::new(
        config.api_base_url.clone(),
        config.http_timeout(),
    )?);
    let created = lifecycle
        .create(&request)
        .await
        .context("could not create interview session")?;
    let session = InterviewSession::new(created, config.time_budget());
    tracing::info!(
        session_id = %session.id,
        ws_url = %config.ws_url,
        "Interview session ready"
    );

    let mut controller = InterviewSessionController::new(
        session,
        &config,
        devices,
        Box::new(WebSocketConnector::new(config.ws_url.clone())),
        Arc::clone(&lifecycle),
    );

    println!(
        "Interview for \"{}\" is ready ({}). Press Enter to start, CTRL-C to leave.",
        request.role,
        format_clock(config.time_budget_secs)
    );
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let go = tokio::select! {
        line = lines.next_line() => matches!(line, Ok(Some(_))),
        _ = tokio::signal::ctrl_c() => false,
    };
    if !go {
        if let Err(e) = controller.abandon().await {
            tracing::warn!(error = %e, "could not delete unused session");
        }
        println!("Left before starting; the session was discarded.");
        return Ok(());
    }

    if let Err(e) = controller.start() {
        if let Err(del) = controller.abandon().await {
            tracing::warn!(error = %del, "could not delete unused session");
        }
        return Err(anyhow::Error::from(e).context("could not start the interview"));
    }

    let (commands_tx, mut commands_rx) = mpsc::unbounded_channel();
    let stdin_tx = commands_tx.clone();
    tokio::spawn(async move {
        while let Ok(Some(line)) = lines.next_line().await {
            if matches!(line.trim(), "q" | "quit" | "end") {
                let _ = stdin_tx.send(SessionCommand::End);
            }
        }
    });
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("CTRL-C received; ending interview");
            let _ = commands_tx.send(SessionCommand::End);
        }
    });

    let mut status = controller.subscribe();
    let printer = tokio::spawn(async move {
        let mut last = None;
        while status.changed().await.is_ok() {
            let snapshot = status.borrow_and_update().clone();
            let key = (snapshot.state, snapshot.remaining_secs, snapshot.turns);
            if last == Some(key) {
                continue;
            }
            last = Some(key);
            print!("\r{:<72}", snapshot.to_string());
            let _ = std::io::stdout().flush();
        }
    });

    let outcome = controller.run(&mut commands_rx).await?;
    printer.abort();
    println!();
    match outcome {
        SessionOutcome::Completed => {
            println!("Interview complete after {} answer(s). Thank you!", controller.turns())
        }
        SessionOutcome::TimedOut => {
            println!("The interview was ended, but the service never confirmed it.")
        }
        SessionOutcome::ChannelLost(reason) => {
            anyhow::bail!("lost connection to the interview service: {}", reason)
        }
        SessionOutcome::Abandoned => println!("Session discarded."),
    }
    Ok(())
}
