//! virtual-office - proximity-based virtual office
//!
//! Participants walk around a 2D floor; whoever is close enough gets an
//! audio/video call and sees proximity chat.

mod assist;
mod channel;
mod config;
mod models;
mod office;
mod peer;
mod scenario;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::assist::{generate_or_fallback, GenerateRequest, GenerateResponse, HttpGenerator};
use crate::channel::memory::MemoryHub;
use crate::channel::relay::Relay;
use crate::channel::websocket::WsChannel;
use crate::channel::SharedChannel;
use crate::config::Config;
use crate::models::{ChatScope, ParticipantId, Position, Status};
use crate::office::{Identity, OfficeSession, SessionCommand, SessionHandle, SessionSnapshot};
use crate::peer::devices::SimulatedDevices;
use crate::peer::simulated::SimulatedTransport;
use crate::scenario::Scenario;

#[derive(Parser)]
#[command(name = "virtual-office")]
#[command(about = "Proximity-based virtual office in the terminal", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the WebSocket relay that participants connect to
    Relay {
        /// Address to listen on
        #[arg(short, long, default_value = "127.0.0.1:7400")]
        bind: String,
    },

    /// Join the office and walk around (commands on stdin)
    Join {
        /// Relay URL (overrides config)
        #[arg(short, long)]
        relay: Option<String>,

        /// Display name (overrides config)
        #[arg(short, long)]
        name: Option<String>,

        /// Participant id; random when omitted
        #[arg(long)]
        id: Option<String>,

        /// Starting position as x,y
        #[arg(long, value_parser = parse_point)]
        at: Option<Position>,

        /// Walk around alone without a relay
        #[arg(long, conflicts_with = "relay")]
        offline: bool,
    },

    /// Replay a scripted scenario offline and print every event
    Simulate {
        /// Scenario TOML file
        scenario: PathBuf,
    },

    /// List the zone layout
    Zones {
        /// Classify a point given as x,y
        #[arg(long, value_parser = parse_point)]
        at: Option<Position>,
    },

    /// Show config path and effective settings
    Config {
        /// Write a default config file if none exists
        #[arg(long)]
        init: bool,
    },

    /// Ask the assistant (offline fallback when no endpoint is configured)
    Assist {
        /// Prompt text
        prompt: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = Config::load().context("Failed to load config")?;

    match cli.command {
        Commands::Relay { bind } => {
            run_relay(&bind).await?;
        }
        Commands::Join {
            relay,
            name,
            id,
            at,
            offline,
        } => {
            let relay = if offline {
                None
            } else {
                let url = relay
                    .or_else(|| config.relay_url.clone())
                    .context("No relay configured. Pass --relay, set relay_url in the config file, or use --offline.")?;
                Some(url)
            };
            run_join(&config, relay, name, id, at.unwrap_or_default()).await?;
        }
        Commands::Simulate { scenario } => {
            let scenario = Scenario::load(&scenario)?;
            for timed in scenario.run(config.zone_layout()?)? {
                println!("{:>7} ms  {}", timed.at_ms, timed.event);
            }
        }
        Commands::Zones { at } => {
            show_zones(&config, at)?;
        }
        Commands::Config { init } => {
            show_config(&config, init)?;
        }
        Commands::Assist { prompt } => {
            let response = ask(&config, GenerateRequest::new(prompt)).await;
            println!("{}", response.text);
        }
    }

    Ok(())
}

async fn run_relay(bind: &str) -> Result<()> {
    let relay = Relay::bind(bind).await?;
    println!("Relay listening on ws://{}", relay.local_addr()?);
    tokio::select! {
        result = relay.run() => result,
        _ = tokio::signal::ctrl_c() => {
            println!("Shutting down...");
            Ok(())
        }
    }
}

async fn run_join(
    config: &Config,
    relay: Option<String>,
    name: Option<String>,
    id: Option<String>,
    start: Position,
) -> Result<()> {
    let settings = config.session_settings()?;
    let layout = config.zone_layout()?;

    let identity = Identity {
        id: id.map(ParticipantId::new).unwrap_or_else(ParticipantId::generate),
        display_name: name.unwrap_or_else(|| config.display_name()),
        avatar: config.avatar,
    };

    let (channel, ws): (Arc<dyn SharedChannel>, Option<Arc<WsChannel>>) = match relay {
        Some(url) => {
            let ws = Arc::new(
                WsChannel::connect(&url)
                    .await
                    .with_context(|| format!("Failed to connect to {}", url))?,
            );
            (ws.clone(), Some(ws))
        }
        None => {
            tracing::info!("No relay; running offline");
            let hub = MemoryHub::new();
            (Arc::new(hub.endpoint(identity.id.clone())), None)
        }
    };
    println!("Joining as {} ({}) at {}", identity.display_name, identity.id, start);

    let (transport, peer_rx) = SimulatedTransport::new();
    let session = OfficeSession::new(
        identity,
        start,
        settings,
        layout,
        Box::new(transport),
        Box::new(SimulatedDevices::new()),
    )?;
    let mut handle = SessionHandle::start(session, channel, peer_rx);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else { break };
                match parse_input(&line) {
                    Ok(None) => {}
                    Ok(Some(Input::Command(cmd))) => handle.send(cmd),
                    Ok(Some(Input::Who)) => {
                        if let Some(snap) = handle.snapshot().await {
                            print_who(&snap);
                        }
                    }
                    Ok(Some(Input::Chat)) => {
                        if let Some(snap) = handle.snapshot().await {
                            for line in transcript(&snap) {
                                println!("{}", line);
                            }
                        }
                    }
                    Ok(Some(Input::Summarize)) => {
                        if let Some(snap) = handle.snapshot().await {
                            let request = GenerateRequest::new("Summarize this conversation")
                                .with_context(transcript(&snap));
                            println!("{}", ask(config, request).await.text);
                        }
                    }
                    Ok(Some(Input::Leave)) => break,
                    Err(msg) => eprintln!("{}", msg),
                }
            }
            event = handle.recv() => {
                match event {
                    Some(event) => println!("{}", event),
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    for event in handle.leave().await {
        println!("{}", event);
    }
    // The session task has dropped its reference; flush the leave frame.
    if let Some(Ok(mut ws)) = ws.map(Arc::try_unwrap) {
        ws.close().await;
    }
    Ok(())
}

/// One parsed stdin line.
enum Input {
    Command(SessionCommand),
    Who,
    Chat,
    Summarize,
    Leave,
}

const HELP: &str = "commands: move X Y | cam on|off | mic on|off | status online|away|busy|offline \
                    | say TEXT | shout TEXT | who | chat | summarize | leave";

fn parse_input(line: &str) -> Result<Option<Input>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();

    let input = match word {
        "move" => {
            let mut parts = rest.split_whitespace().map(str::parse::<f64>);
            match (parts.next(), parts.next(), parts.next()) {
                (Some(Ok(x)), Some(Ok(y)), None) => Input::Command(SessionCommand::Move { x, y }),
                _ => return Err("usage: move X Y".into()),
            }
        }
        "cam" => Input::Command(SessionCommand::SetWebcam(parse_switch(rest)?)),
        "mic" => Input::Command(SessionCommand::SetMic(parse_switch(rest)?)),
        "status" => Input::Command(SessionCommand::SetStatus(rest.parse::<Status>()?)),
        "say" | "shout" if rest.is_empty() => return Err(format!("usage: {} TEXT", word)),
        "say" => Input::Command(SessionCommand::Say {
            body: rest.to_string(),
            scope: ChatScope::Proximity,
        }),
        "shout" => Input::Command(SessionCommand::Say {
            body: rest.to_string(),
            scope: ChatScope::Room,
        }),
        "who" => Input::Who,
        "chat" => Input::Chat,
        "summarize" => Input::Summarize,
        "leave" | "quit" => Input::Leave,
        _ => return Err(HELP.into()),
    };
    Ok(Some(input))
}

fn parse_switch(s: &str) -> Result<bool, String> {
    match s {
        "on" => Ok(true),
        "off" => Ok(false),
        _ => Err("expected on or off".into()),
    }
}

fn parse_point(s: &str) -> Result<Position, String> {
    let (x, y) = s.split_once(',').ok_or("expected x,y")?;
    let x: f64 = x.trim().parse().map_err(|_| format!("bad x: {}", x))?;
    let y: f64 = y.trim().parse().map_err(|_| format!("bad y: {}", y))?;
    let p = Position::new(x, y);
    if !p.is_finite() {
        return Err("coordinates must be finite".into());
    }
    Ok(p)
}

fn print_who(snap: &SessionSnapshot) {
    println!(
        "You: {} in {} [{}] {}",
        snap.position,
        snap.zone.as_deref().unwrap_or("the hallway"),
        snap.media,
        snap.status
    );
    if snap.peers.is_empty() {
        println!("Nobody else is here.");
        return;
    }
    for peer in &snap.peers {
        let p = &peer.participant;
        println!(
            "  {:<20} {:<12} {:>7.1} {} {:<4} call={:?} [{}]",
            p.display_name,
            p.id.as_str(),
            peer.distance,
            p.position,
            if peer.near { "near" } else { "far" },
            peer.call,
            p.status
        );
    }
}

fn transcript(snap: &SessionSnapshot) -> Vec<String> {
    snap.visible_chat
        .iter()
        .map(|m| format!("{}: {}", m.sender_id, m.body))
        .collect()
}

async fn ask(config: &Config, request: GenerateRequest) -> GenerateResponse {
    let http = config
        .assist_endpoint
        .as_deref()
        .and_then(|endpoint| match HttpGenerator::new(endpoint) {
            Ok(http) => Some(http),
            Err(e) => {
                tracing::warn!("Assistant client unavailable: {}", e);
                None
            }
        });
    generate_or_fallback(http.as_ref(), &request).await
}

fn show_zones(config: &Config, at: Option<Position>) -> Result<()> {
    let layout = config.zone_layout()?;
    for zone in layout.zones() {
        println!(
            "{:<12} {:<18} {:<8} ({}, {}) {}x{}",
            zone.id,
            zone.name,
            format!("{:?}", zone.kind),
            zone.x, zone.y, zone.width, zone.height
        );
    }
    if let Some(p) = at {
        match layout.classify(p) {
            Some(zone) => println!("{} is in {}", p, zone.name),
            None => println!("{} is not in any zone", p),
        }
    }
    Ok(())
}

fn show_config(config: &Config, init: bool) -> Result<()> {
    let path = Config::config_path()?;
    if init {
        if path.exists() {
            println!("Config already exists at {}", path.display());
        } else {
            Config::default().save()?;
            println!("Wrote default config to {}", path.display());
        }
    } else {
        println!("Config file: {}", path.display());
    }

    let settings = config.session_settings()?;
    println!("Display name:        {}", config.display_name());
    println!("Avatar:              {:?}", config.avatar);
    println!(
        "Relay:               {}",
        config.relay_url.as_deref().unwrap_or("(not set)")
    );
    println!("Proximity radius:    {}", settings.proximity_radius);
    println!("Publish interval:    {:?}", settings.publish_interval);
    println!("Heartbeat interval:  {:?}", settings.heartbeat_interval);
    println!("Stale after:         {:?}", settings.stale_after);
    println!("Retry interval:      {:?}", settings.retry_interval);
    println!("Negotiation timeout: {:?}", settings.negotiation_timeout);
    Ok(())
}
