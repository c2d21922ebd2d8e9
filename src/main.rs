use anyhow::Context;
use callcore::net::{ChannelEvent, ChannelFactory, SignalingChannel};
use callcore::types::Role;
use chrono::Local;
use clap::{Parser, ValueEnum};
use log::{error, info, warn};
use peercall::calls::{
    CallCommand, CallNotification, CallView, ControllerConfig, RelaySettings, RelayedMedia,
    RoomChannel, spawn_controller,
};
use peercall::config::CallConfig;
use peercall_tokio_transport::WebSocketChannelFactory;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

// A terminal call peer that relays media through the signaling server.
//
// Usage:
//   peercall --role agent --url ws://127.0.0.1:8080 --record visitor.webm
//   peercall --role visitor --url ws://127.0.0.1:8080 --send camera.webm
//   peercall --role visitor --url wss://relay.example --room lobby
//
// Then type dial, accept, decline, hangup or quit.

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PeerRole {
    /// Receives calls.
    Agent,
    /// Places calls.
    Visitor,
}

impl From<PeerRole> for Role {
    fn from(role: PeerRole) -> Self {
        match role {
            PeerRole::Agent => Role::Callee,
            PeerRole::Visitor => Role::Caller,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "peercall", version, about = "Two-party call peer")]
struct Cli {
    #[arg(long, value_enum)]
    role: Option<PeerRole>,

    /// Signaling relay WebSocket URL.
    #[arg(long)]
    url: Option<String>,

    /// Pub/sub room to join on the relay.
    #[arg(long)]
    room: Option<String>,

    /// STUN/TURN server, repeatable. Replaces the configured list.
    #[arg(long = "ice-server")]
    ice_servers: Vec<String>,

    /// JSON config file. Flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// File streamed as the local capture.
    #[arg(long)]
    send: Option<PathBuf>,

    /// File the remote media is written to.
    #[arg(long)]
    record: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{:<5}] [{}] - {}",
                Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let mut config = match &cli.config {
        Some(path) => CallConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => CallConfig::default(),
    };
    if let Some(role) = cli.role {
        config.role = role.into();
    }
    if let Some(url) = &cli.url {
        config.signaling_url = url.clone();
    }
    if cli.room.is_some() {
        config.room = cli.room.clone();
    }
    if !cli.ice_servers.is_empty() {
        config.ice_servers = cli.ice_servers.clone();
    }
    config.validate().context("invalid settings")?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    rt.block_on(run(config, cli.send, cli.record))
}

async fn run(
    config: CallConfig,
    send: Option<PathBuf>,
    record: Option<PathBuf>,
) -> anyhow::Result<()> {
    info!(
        "Starting {} peer (dialect {}, ice servers {:?})",
        config.role,
        config.dialect.name(),
        config.ice_servers
    );

    let factory =
        WebSocketChannelFactory::new(&config.signaling_url).with_event_buffer(config.event_buffer);
    let (channel, channel_rx) = factory
        .open()
        .await
        .with_context(|| format!("connecting to {}", factory.url()))?;

    let channel: (Arc<dyn SignalingChannel>, mpsc::Receiver<ChannelEvent>) = match &config.room {
        Some(room) => {
            let client_id = config.client_id_or_random();
            let (room, rx) =
                RoomChannel::join(channel, channel_rx, room, client_id, config.event_buffer)
                    .await
                    .context("joining room")?;
            (room as Arc<dyn SignalingChannel>, rx)
        }
        None => (channel, channel_rx),
    };

    let (media, media_rx) = RelayedMedia::new(
        RelaySettings::from_config(&config, send, record),
        config.event_buffer,
    );
    let (handle, mut notifications) = spawn_controller(
        config.role,
        ControllerConfig::from(&config),
        channel,
        (Arc::new(media), media_rx),
    );

    let mut view = CallView::new(config.role);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    info!("Commands: {}", command_help(config.role));

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        error!("stdin: {e}");
                        break;
                    }
                };
                match parse_command(&line) {
                    Some(CallCommand::Shutdown) => break,
                    Some(command) => handle.send(command).await?,
                    None if line.trim().is_empty() => {}
                    None => warn!("unknown command {:?}; try {}", line.trim(), command_help(config.role)),
                }
            }
            notification = notifications.recv() => match notification {
                Some(notification) => show(&mut view, notification),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    // The controller hangs up and closes the channel before it stops.
    if handle.shutdown().await.is_ok() {
        while let Some(notification) = notifications.recv().await {
            show(&mut view, notification);
        }
    }
    info!("Bye");
    Ok(())
}

fn parse_command(line: &str) -> Option<CallCommand> {
    match line.trim().to_ascii_lowercase().as_str() {
        "dial" | "call" => Some(CallCommand::Dial),
        "accept" | "answer" => Some(CallCommand::Accept),
        "decline" | "reject" => Some(CallCommand::Decline),
        "hangup" | "hang-up" | "end" => Some(CallCommand::HangUp),
        "quit" | "exit" => Some(CallCommand::Shutdown),
        _ => None,
    }
}

fn command_help(role: Role) -> &'static str {
    match role {
        Role::Caller => "dial, hangup, quit",
        Role::Callee => "accept, decline, hangup, quit",
    }
}

fn show(view: &mut CallView, notification: CallNotification) {
    match notification {
        CallNotification::StateChanged(state) => info!("call state: {state}"),
        CallNotification::Ui(event) => {
            view.apply(&event);
            match serde_json::to_string(view) {
                Ok(json) => info!("view: {json}"),
                Err(e) => warn!("cannot render view: {e}"),
            }
        }
    }
}
