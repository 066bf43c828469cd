//! OpenPip CLI
//!
//! Command-line interface for controlling the OpenPip daemon.
//!
//! Commands are sent to the daemon as one JSON line over a local TCP socket.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use openpip_ipc::{
    decode_line, encode_line, IpcCommand, IpcRect, IpcResponse, DEFAULT_IPC_ADDR,
    MAX_IPC_MESSAGE_SIZE,
};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

/// How long to wait for the daemon's reply.
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "openpip-cli")]
#[command(author, version, about = "Control the OpenPip floating window daemon")]
struct Cli {
    /// Daemon IPC address
    #[arg(long, global = true, default_value = DEFAULT_IPC_ADDR)]
    address: String,

    /// Print the raw JSON response
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Move the floating window to another display
    Move {
        /// Target display id
        target: u32,
    },
    /// Attach a display
    Attach {
        /// Display id
        id: u32,
        /// Left edge in pixels
        x: i32,
        /// Top edge in pixels
        y: i32,
        /// Width in pixels
        width: i32,
        /// Height in pixels
        height: i32,
        /// Display name
        #[arg(short, long, default_value = "")]
        name: String,
    },
    /// Detach a display
    Detach {
        /// Display id
        id: u32,
    },
    /// Show the floating window
    Enter {
        /// Display to show it on (default: configured display)
        #[arg(short, long)]
        display: Option<u32>,
    },
    /// Dismiss the floating window
    Exit,
    /// Query daemon state
    Query {
        #[command(subcommand)]
        what: QueryType,
    },
    /// Stop the daemon
    Stop,
}

#[derive(Subcommand)]
enum QueryType {
    /// Get the floating window state
    State,
    /// List known displays
    Displays,
}

impl From<Commands> for IpcCommand {
    fn from(command: Commands) -> Self {
        match command {
            Commands::Move { target } => IpcCommand::MoveToDisplay { target },
            Commands::Attach {
                id,
                x,
                y,
                width,
                height,
                name,
            } => IpcCommand::AttachDisplay {
                id,
                name,
                rect: IpcRect::new(x, y, width, height),
            },
            Commands::Detach { id } => IpcCommand::DetachDisplay { id },
            Commands::Enter { display } => IpcCommand::EnterPip { display },
            Commands::Exit => IpcCommand::ExitPip,
            Commands::Query { what } => match what {
                QueryType::State => IpcCommand::QueryState,
                QueryType::Displays => IpcCommand::QueryDisplays,
            },
            Commands::Stop => IpcCommand::Stop,
        }
    }
}

/// Send one command and wait for its response.
async fn send_command(address: &str, command: &IpcCommand) -> Result<IpcResponse> {
    let stream = TcpStream::connect(address)
        .await
        .with_context(|| format!("Failed to connect to daemon at {} (is it running?)", address))?;
    let (reader, mut writer) = stream.into_split();

    writer
        .write_all(encode_line(command)?.as_bytes())
        .await
        .context("Failed to send command")?;

    let mut reader = BufReader::new(reader.take(MAX_IPC_MESSAGE_SIZE as u64));
    let mut line = String::new();
    let read = tokio::time::timeout(RESPONSE_TIMEOUT, reader.read_line(&mut line))
        .await
        .context("Timed out waiting for daemon response")?
        .context("Failed to read daemon response")?;
    if read == 0 {
        bail!("Daemon closed the connection without responding");
    }

    Ok(decode_line(&line)?)
}

/// Render a response for humans.
fn format_response(response: &IpcResponse) -> String {
    match response {
        IpcResponse::Ok => "ok".to_string(),
        IpcResponse::Error { message } => format!("error: {}", message),
        IpcResponse::PipState {
            state,
            display_id,
            bounds,
            pending_transfer,
            display_change_scheduled,
            tracked_transitions,
        } => {
            let mut out = format!(
                "state: {}\ndisplay: {}\nbounds: {}x{} at {},{}",
                state, display_id, bounds.width, bounds.height, bounds.x, bounds.y
            );
            if let Some(transfer) = pending_transfer {
                out.push_str(&format!(
                    "\npending transfer #{}: {} -> {}",
                    transfer.id, transfer.origin, transfer.target
                ));
            }
            if *display_change_scheduled {
                out.push_str("\ndisplay change scheduled");
            }
            if *tracked_transitions > 0 {
                out.push_str(&format!("\ntracked display changes: {}", tracked_transitions));
            }
            out
        }
        IpcResponse::DisplayList { displays } => displays
            .iter()
            .map(|d| {
                format!(
                    "{}: {}x{} at {},{}{}{} \"{}\"",
                    d.id,
                    d.rect.width,
                    d.rect.height,
                    d.rect.x,
                    d.rect.y,
                    if d.primary { " [PRIMARY]" } else { "" },
                    if d.hosts_pip { " [PIP]" } else { "" },
                    d.name
                )
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let command = IpcCommand::from(cli.command);

    let response = send_command(&cli.address, &command).await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        println!("{}", format_response(&response));
    }

    if let IpcResponse::Error { .. } = response {
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use openpip_ipc::{DisplayInfo, PendingTransfer};

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("openpip-cli").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_move_command() {
        let cli = parse(&["move", "2"]);
        assert_eq!(IpcCommand::from(cli.command), IpcCommand::MoveToDisplay { target: 2 });
        assert_eq!(cli.address, DEFAULT_IPC_ADDR);
        assert!(!cli.json);
    }

    #[test]
    fn test_attach_command() {
        let cli = parse(&["attach", "3", "--name", "tv", "0", "1080", "1280", "720"]);
        assert_eq!(
            IpcCommand::from(cli.command),
            IpcCommand::AttachDisplay {
                id: 3,
                name: "tv".to_string(),
                rect: IpcRect::new(0, 1080, 1280, 720),
            }
        );
    }

    #[test]
    fn test_attach_negative_origin() {
        let cli = parse(&["attach", "4", "--", "-1280", "0", "1280", "1024"]);
        match IpcCommand::from(cli.command) {
            IpcCommand::AttachDisplay { rect, name, .. } => {
                assert_eq!(rect, IpcRect::new(-1280, 0, 1280, 1024));
                assert_eq!(name, "");
            }
            other => panic!("Expected AttachDisplay, got {:?}", other),
        }
    }

    #[test]
    fn test_enter_and_query_commands() {
        assert_eq!(
            IpcCommand::from(parse(&["enter"]).command),
            IpcCommand::EnterPip { display: None }
        );
        assert_eq!(
            IpcCommand::from(parse(&["enter", "-d", "1"]).command),
            IpcCommand::EnterPip { display: Some(1) }
        );
        assert_eq!(
            IpcCommand::from(parse(&["query", "displays"]).command),
            IpcCommand::QueryDisplays
        );
        assert_eq!(IpcCommand::from(parse(&["stop"]).command), IpcCommand::Stop);
    }

    #[test]
    fn test_global_flags() {
        let cli = parse(&["query", "state", "--json", "--address", "127.0.0.1:9000"]);
        assert!(cli.json);
        assert_eq!(cli.address, "127.0.0.1:9000");
        assert_eq!(IpcCommand::from(cli.command), IpcCommand::QueryState);
    }

    #[test]
    fn test_missing_target_is_an_error() {
        assert!(Cli::try_parse_from(["openpip-cli", "move"]).is_err());
    }

    #[test]
    fn test_format_state() {
        let text = format_response(&IpcResponse::PipState {
            state: "scheduled_bounds_change".to_string(),
            display_id: 0,
            bounds: IpcRect::new(1576, 876, 320, 180),
            pending_transfer: Some(PendingTransfer {
                id: 2,
                origin: 0,
                target: 1,
            }),
            display_change_scheduled: false,
            tracked_transitions: 0,
        });
        assert_eq!(
            text,
            "state: scheduled_bounds_change\ndisplay: 0\nbounds: 320x180 at 1576,876\n\
             pending transfer #2: 0 -> 1"
        );
    }

    #[test]
    fn test_format_displays_and_errors() {
        let text = format_response(&IpcResponse::DisplayList {
            displays: vec![DisplayInfo {
                id: 0,
                name: "builtin".to_string(),
                rect: IpcRect::new(0, 0, 1920, 1080),
                primary: true,
                hosts_pip: true,
            }],
        });
        assert_eq!(text, "0: 1920x1080 at 0,0 [PRIMARY] [PIP] \"builtin\"");

        assert_eq!(format_response(&IpcResponse::error("nope")), "error: nope");
        assert_eq!(format_response(&IpcResponse::Ok), "ok");
    }
}
