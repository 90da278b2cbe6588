//! Sample driver programs for the ZMK IPC bridge.
//!
//! Two subcommands cover the two endpoints of a simulated host:
//!
//! ```text
//! zmk-ipc-cli watch    [--socket /tmp/zmk_ipc.sock]
//! zmk-ipc-cli send-key [--socket /tmp/zmk_kscan_ipc.sock]
//!                      (--row R --col C | --position P)
//!                      [--action press|release|tap]
//! ```
//!
//! `watch` connects to the event-observer socket and prints one line per
//! decoded event until the host closes the connection.  `send-key` connects
//! to the key-scan injection socket and sends press/release frames; `tap`
//! (the default) sends a press followed by a release.
//!
//! Log verbosity is controlled by `RUST_LOG` (default `info`); event output
//! goes to stdout so it can be piped.

use std::io::Write as _;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use prost::Message;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use zmk_ipc_core::protocol::messages::{
    key_event, zmk_event, ClientMessage, KeyEvent, ZmkEvent, ZMK_EVENT_MAX_SIZE,
};
use zmk_ipc_core::{frame_recv, frame_write, RecvError};

/// Pause between the press and release frames of a tap.
const TAP_HOLD: Duration = Duration::from_millis(10);

// ── CLI definitions ───────────────────────────────────────────────────────────

/// External driver for a ZMK host running as a simulated process.
#[derive(Debug, Parser)]
#[command(name = "zmk-ipc-cli", about = "Observe and inject ZMK IPC events", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Watch the host's event stream and print one line per event.
    Watch {
        /// Path of the host's event-observer socket.
        #[arg(long, default_value = "/tmp/zmk_ipc.sock", env = "ZMK_IPC_SOCKET")]
        socket: PathBuf,
    },
    /// Inject a key event into the host's key-scan subsystem.
    SendKey {
        /// Path of the host's key-scan injection socket.
        #[arg(
            long,
            default_value = "/tmp/zmk_kscan_ipc.sock",
            env = "ZMK_KSCAN_SOCKET"
        )]
        socket: PathBuf,

        /// Matrix row (requires --col, conflicts with --position).
        #[arg(long, requires = "col", conflicts_with = "position")]
        row: Option<u32>,

        /// Matrix column (requires --row, conflicts with --position).
        #[arg(long, requires = "row", conflicts_with = "position")]
        col: Option<u32>,

        /// Linear key position, expanded by the host against its configured
        /// column count.
        #[arg(long)]
        position: Option<u32>,

        /// What to send.
        #[arg(long, value_enum, default_value = "tap")]
        action: KeyAction,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum KeyAction {
    Press,
    Release,
    /// Press followed by release.
    Tap,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Watch { socket } => watch(&socket),
        Command::SendKey {
            socket,
            row,
            col,
            position,
            action,
        } => send_key(&socket, row, col, position, action),
    }
}

// ── watch ─────────────────────────────────────────────────────────────────────

fn watch(socket: &PathBuf) -> anyhow::Result<()> {
    let stream = UnixStream::connect(socket)
        .with_context(|| format!("failed to connect to {}; is the host running?", socket.display()))?;
    info!("watching events on {}", socket.display());

    let stdout = std::io::stdout();
    loop {
        match frame_recv::<ZmkEvent>(&stream, ZMK_EVENT_MAX_SIZE) {
            Ok(event) => {
                let mut out = stdout.lock();
                writeln!(out, "{}", format_event(&event))?;
            }
            Err(RecvError::Decode(e)) => {
                // One undecodable event does not invalidate the stream.
                warn!("skipping undecodable event: {e}");
            }
            Err(RecvError::PeerClosed) => {
                info!("host closed the connection");
                return Ok(());
            }
            Err(e) => return Err(e).context("event stream failed"),
        }
    }
}

/// Renders an event as a single stable, greppable line.
fn format_event(event: &ZmkEvent) -> String {
    match &event.payload {
        Some(zmk_event::Payload::KscanEvent(k)) => format!(
            "kscan source={} position={} pressed={} timestamp={}",
            k.source, k.position, k.pressed, k.timestamp
        ),
        Some(zmk_event::Payload::Keyboard(r)) => format!(
            "keyboard endpoint={} modifiers={:#04x} keys={}",
            r.endpoint.unwrap_or_default(),
            r.modifiers,
            hex_bytes(&r.keys)
        ),
        Some(zmk_event::Payload::Consumer(r)) => format!(
            "consumer endpoint={} keys={}",
            r.endpoint.unwrap_or_default(),
            hex_bytes(&r.keys)
        ),
        Some(zmk_event::Payload::Mouse(r)) => format!(
            "mouse endpoint={} buttons={:#04x} dx={} dy={} scroll_x={} scroll_y={}",
            r.endpoint.unwrap_or_default(),
            r.buttons,
            r.dx,
            r.dy,
            r.scroll_x,
            r.scroll_y
        ),
        None => "unknown event (newer host schema?)".to_string(),
    }
}

fn hex_bytes(bytes: &[u8]) -> String {
    let hex: Vec<String> = bytes.iter().map(|b| format!("{b:02x}")).collect();
    format!("[{}]", hex.join(" "))
}

// ── send-key ──────────────────────────────────────────────────────────────────

fn send_key(
    socket: &PathBuf,
    row: Option<u32>,
    col: Option<u32>,
    position: Option<u32>,
    action: KeyAction,
) -> anyhow::Result<()> {
    let address = match (row, col, position) {
        (Some(row), Some(col), None) => key_event::Address::KeyPos(
            zmk_ipc_core::protocol::messages::KeyPosition { row, col },
        ),
        (None, None, Some(position)) => key_event::Address::Position(position),
        _ => anyhow::bail!("specify either --row and --col, or --position"),
    };

    let mut stream = UnixStream::connect(socket)
        .with_context(|| format!("failed to connect to {}; is the host running?", socket.display()))?;

    match action {
        KeyAction::Press => send_action(&mut stream, key_event::Action::Press, &address)?,
        KeyAction::Release => send_action(&mut stream, key_event::Action::Release, &address)?,
        KeyAction::Tap => {
            send_action(&mut stream, key_event::Action::Press, &address)?;
            thread::sleep(TAP_HOLD);
            send_action(&mut stream, key_event::Action::Release, &address)?;
        }
    }

    info!("sent {action:?} to {}", socket.display());
    Ok(())
}

fn send_action(
    stream: &mut UnixStream,
    action: key_event::Action,
    address: &key_event::Address,
) -> anyhow::Result<()> {
    let msg = ClientMessage::key_event(KeyEvent {
        action: action as i32,
        address: Some(address.clone()),
    });
    frame_write(stream, &msg.encode_to_vec()).context("failed to send key event frame")
}

// ── Tests ─────────────────────────────────────────────────────────────────────
