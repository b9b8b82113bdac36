// ghostlink — terminal front-end for peer-to-peer rooms, chat and calls
//
// `ghostlink directory` runs the rendezvous node peers register with;
// `ghostlink start` joins the network and opens an interactive prompt.

mod config;
mod prompt;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use colored::*;
use ghostlink_core::{
    CallState, DirectoryConfig, DirectoryNode, MediaConstraints, MediaDescriptor, MediaDevices,
    MediaError, PrivacyPolicy, Room, Session, SessionEvent, SessionEvents, SwarmBackend,
    SwarmConfig,
};
use prompt::{Command, PrivacyChange};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Parser)]
#[command(name = "ghostlink")]
#[command(about = "ghostlink — peer-to-peer rooms, chat and calls", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a rendezvous directory node
    Directory {
        #[arg(short, long, default_value = "4001")]
        port: u16,
        /// Identity key file (defaults to the data directory)
        #[arg(short, long)]
        key: Option<PathBuf>,
    },
    /// Join the network and open the interactive prompt
    Start {
        /// Directory multiaddr, overriding the config file
        #[arg(short, long)]
        directory: Option<String>,
        #[arg(short, long)]
        port: Option<u16>,
        /// Hide our address behind the directory's relay
        #[arg(long)]
        anonymize: bool,
    },
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Show,
    Set { key: String, value: String },
    Get { key: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::Config::load()?;
    let _guard = init_logging(config.log_file.as_deref())?;

    match cli.command {
        Commands::Directory { port, key } => cmd_directory(port, key).await,
        Commands::Start {
            directory,
            port,
            anonymize,
        } => cmd_start(config, directory, port, anonymize).await,
        Commands::Config { action } => cmd_config(config, action),
    }
}

/// Log to stderr, or through a non-blocking writer when a log file is set
fn init_logging(log_file: Option<&str>) -> Result<Option<WorkerGuard>> {
    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
    };

    let Some(path) = log_file else {
        tracing_subscriber::fmt().with_env_filter(filter()).init();
        return Ok(None);
    };

    let path = PathBuf::from(path);
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let file_name = path
        .file_name()
        .context("log_file must name a file")?
        .to_owned();
    std::fs::create_dir_all(&dir).context("Failed to create log directory")?;

    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
    tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Ok(Some(guard))
}

async fn cmd_directory(port: u16, key: Option<PathBuf>) -> Result<()> {
    let key_path = match key {
        Some(path) => path,
        None => config::Config::data_dir()?.join("directory.key"),
    };

    let node = DirectoryNode::new(DirectoryConfig {
        port,
        key_path: Some(key_path),
    })?;

    println!("{}", "ghostlink directory".bold());
    println!("  Peer ID: {}", node.peer_id().to_string().bright_cyan());
    println!(
        "  Register with: {}",
        format!("/ip4/<host>/tcp/{}/p2p/{}", port, node.peer_id()).bright_green()
    );
    println!();

    tokio::select! {
        result = node.run() => result,
        _ = tokio::signal::ctrl_c() => {
            println!("Shutting down...");
            Ok(())
        }
    }
}

fn cmd_config(mut config: config::Config, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            println!("{}", "Configuration".bold());
            println!();
            for (key, value) in config.list() {
                println!("  {:<20} {}", key.bright_cyan(), value);
            }
            println!();
            println!("  {}", config::Config::config_file()?.display().to_string().dimmed());
        }

        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            config.save()?;
            println!("{} Set {} = {}", "✓".green(), key.bright_cyan(), value);
        }

        ConfigAction::Get { key } => match config.get(&key) {
            Some(value) => println!("{} = {}", key.bright_cyan(), value),
            None if config.list().iter().any(|(k, _)| *k == key) => {
                println!("{} = {}", key.bright_cyan(), "(none)".dimmed())
            }
            None => anyhow::bail!("Unknown config key: {}", key),
        },
    }

    Ok(())
}

/// Stand-in media devices: the terminal has no camera, so streams are
/// described but never captured
struct TerminalMedia {
    nickname: String,
}

#[async_trait]
impl MediaDevices for TerminalMedia {
    async fn acquire_local(
        &self,
        constraints: MediaConstraints,
    ) -> Result<MediaDescriptor, MediaError> {
        Ok(MediaDescriptor {
            stream_id: format!("{}-terminal", self.nickname),
            audio: constraints.audio,
            video: false,
        })
    }

    fn attach_remote(&self, peer_id: &str, media: &MediaDescriptor) {
        tracing::info!("Remote stream {} from {}", media.stream_id, peer_id);
    }

    fn release_local(&self, media: &MediaDescriptor) {
        tracing::info!("Released {}", media.stream_id);
    }
}

async fn cmd_start(
    mut config: config::Config,
    directory: Option<String>,
    port: Option<u16>,
    anonymize: bool,
) -> Result<()> {
    let directory = directory.or_else(|| config.directory.clone()).context(
        "No directory configured; run `ghostlink config set directory <multiaddr>`",
    )?;
    let directory: libp2p::Multiaddr = directory.parse().context("Invalid directory multiaddr")?;
    if anonymize {
        config.anonymize = true;
    }

    let backend = SwarmBackend::new(SwarmConfig {
        directory,
        listen_port: port.unwrap_or(config.listen_port),
    });
    let media = Arc::new(TerminalMedia {
        nickname: config.nickname.clone(),
    });
    let (session, events) = Session::new(Arc::new(backend), media, config.session_settings())?;

    println!("{}", "ghostlink — Starting...".bold());
    let peer_id = session
        .start()
        .await
        .context("Failed to register with the directory")?;
    println!("{} Registered as {}", "✓".green(), peer_id.bright_cyan());
    if session.is_anonymized() {
        println!("{} Anonymized: routed through the directory relay", "✓".green());
    }
    println!();
    print_help();
    println!();

    let event_task = tokio::spawn(print_events(events));

    let stdin_session = session.clone();
    let stdin_task = tokio::spawn(async move {
        use tokio::io::AsyncBufReadExt;

        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        let mut lines = stdin.lines();
        prompt_marker();

        while let Ok(Some(line)) = lines.next_line().await {
            match prompt::parse(&line) {
                Ok(None) => {}
                Ok(Some(Command::Quit)) => break,
                Ok(Some(command)) => {
                    if let Err(e) = run_command(&stdin_session, command).await {
                        println!("{} {:#}", "✗".red(), e);
                    }
                }
                Err(usage) => println!("{}", usage.yellow()),
            }
            prompt_marker();
        }
    });

    tokio::select! {
        _ = event_task => {}
        _ = stdin_task => {}
        _ = tokio::signal::ctrl_c() => {}
    }

    println!("Shutting down...");
    session.shutdown().await;
    Ok(())
}

async fn run_command(session: &Session, command: Command) -> Result<()> {
    match command {
        Command::Connect(peer) => {
            let room = session.open_direct(&peer).await?;
            println!("{} Connected: {}", "✓".green(), room.id.bright_cyan());
        }

        Command::Dm { peer, text } => {
            let room = session.open_direct(&peer).await?;
            session.send(&room.id, &text)?;
            println!("{} {}: {}", "→".bright_green(), room.name.bright_cyan(), text);
        }

        Command::Create { room_type, name } => {
            let room = session.create_room(&name, "", room_type)?;
            println!(
                "{} Created {} {} ({})",
                "✓".green(),
                room_type,
                room.name.bright_cyan(),
                room.id
            );
        }

        Command::Invite { room, peer } => {
            let room = resolve_room(session, &room)?;
            session.invite(&room.id, &peer).await?;
            println!("{} Invited {} to {}", "✓".green(), peer, room.name.bright_cyan());
        }

        Command::Say { room, text } => {
            let room = resolve_room(session, &room)?;
            let report = session.send(&room.id, &text)?;
            if report.failed > 0 {
                println!(
                    "{} Sent to {}, {} unreachable",
                    "!".yellow(),
                    report.handed_off,
                    report.failed
                );
            }
        }

        Command::Rooms => {
            let rooms = session.rooms();
            if rooms.is_empty() {
                println!("{}", "No rooms yet.".dimmed());
            }
            for (i, room) in rooms.iter().enumerate() {
                println!("  {}. {}", i + 1, describe_room(room));
            }
        }

        Command::Reconnect(room) => {
            let room = resolve_room(session, &room)?;
            if session.reconnect(&room.id).await? {
                println!("{} Reconnected {}", "✓".green(), room.name.bright_cyan());
            } else {
                println!("{} Some peers of {} are unreachable", "!".yellow(), room.name);
            }
        }

        Command::Call(peer) => {
            session.start_call(&peer).await?;
            println!("{} Calling {}...", "☎".bright_green(), peer);
        }

        Command::Accept => session.answer_call(true).await?,
        Command::Decline => session.answer_call(false).await?,
        Command::Hangup => session.end_call()?,

        Command::Privacy(change) => {
            let current = session.privacy();
            let updated = match change {
                PrivacyChange::Show => current,
                PrivacyChange::Dm(dm_policy) => PrivacyPolicy { dm_policy, ..current },
                PrivacyChange::Calls(allow_calls) => PrivacyPolicy {
                    allow_calls,
                    ..current
                },
            };
            if updated != current {
                session.update_privacy(updated);
            }
            println!(
                "  Direct messages: {}\n  Calls: {}",
                updated.dm_policy.to_string().bright_cyan(),
                if updated.allow_calls { "allowed".green() } else { "blocked".red() }
            );
        }

        Command::Anon(on) => {
            let peer_id = session.set_anonymize(on).await?;
            println!("{} Now {}", "✓".green(), peer_id.bright_cyan());
        }

        Command::Help => print_help(),
        Command::Quit => {}
    }
    Ok(())
}

/// Accept a room ID or its 1-based position in `/rooms`
fn resolve_room(session: &Session, token: &str) -> Result<Room> {
    if let Some(room) = session.room(token) {
        return Ok(room);
    }
    token
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
        .and_then(|i| session.rooms().into_iter().nth(i))
        .with_context(|| format!("Unknown room: {}", token))
}

fn describe_room(room: &Room) -> String {
    let status = if room.is_admin {
        format!("host, {} participants", room.participants.len()).bright_yellow()
    } else if room.is_connected {
        "connected".green()
    } else {
        "disconnected".red()
    };
    format!(
        "{} [{}] {} ({})",
        room.name.bright_cyan(),
        room.room_type,
        room.id.dimmed(),
        status
    )
}

async fn print_events(mut events: SessionEvents) {
    while let Some(event) = events.recv().await {
        println!();
        match event {
            SessionEvent::Ready(peer_id) => {
                println!("{} Registered as {}", "✓".green(), peer_id.bright_cyan());
            }
            SessionEvent::RoomCreated(room) => {
                println!("{} New room: {}", "+".bright_green(), describe_room(&room));
            }
            SessionEvent::RoomStatusChanged { room_id, connected } => {
                let status = if connected { "connected".green() } else { "disconnected".red() };
                println!("  {} {}", room_id.dimmed(), status);
            }
            SessionEvent::MessageDelivered(message) => {
                let sender = message
                    .sender_name
                    .clone()
                    .unwrap_or_else(|| message.sender_id.clone());
                let text = message.text_content().unwrap_or("<binary>");
                println!(
                    "{} [{}] {}: {}",
                    "←".bright_blue(),
                    message.room_id.dimmed(),
                    sender.bright_cyan(),
                    text
                );
            }
            SessionEvent::IncomingCall { peer_id, .. } => {
                println!(
                    "{} Incoming call from {} (/accept or /decline)",
                    "☎".bright_yellow(),
                    peer_id.bright_cyan()
                );
            }
            SessionEvent::CallStateChanged { peer_id, state } => {
                let state = match state {
                    CallState::Active => state.to_string().green(),
                    CallState::Ended | CallState::Rejected => state.to_string().red(),
                    _ => state.to_string().normal(),
                };
                println!("{} Call with {}: {}", "☎".bright_green(), peer_id, state);
            }
            SessionEvent::PeerConnected { peer_id, metadata } => {
                let name = metadata.map(|m| m.nickname).unwrap_or_default();
                println!("{} Peer {} {}", "✓".green(), peer_id, name.bright_cyan());
            }
            SessionEvent::PeerDisconnected(peer_id) => {
                println!("{} Peer {} left", "✗".red(), peer_id);
            }
        }
        prompt_marker();
    }
}

fn print_help() {
    println!("{}", "Commands:".bold());
    for (usage, about) in prompt::HELP {
        println!("  {:<52} {}", usage.bright_green(), about.dimmed());
    }
}

fn prompt_marker() {
    print!("> ");
    let _ = std::io::stdout().flush();
}
