//! OpenPip Daemon
//!
//! Main daemon process hosting the floating window transition coordinator.
//!
//! Responsibilities:
//! - Own the floating window's transition state and display layout
//! - Handle IPC commands from the CLI
//! - Play display change transitions and drive explicit display transfers
//! - Bound in-flight transfers with a timeout

mod config;
mod controller;
mod layout;
mod player;
mod surface;

use anyhow::{Context, Result};
use config::Config;
use controller::{PipController, Wakeup};
use openpip_ipc::{decode_line, encode_line, IpcCommand, IpcResponse, MAX_IPC_MESSAGE_SIZE};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Events that the daemon event loop processes.
#[derive(Debug)]
enum DaemonEvent {
    /// An IPC command from a CLI client.
    IpcCommand {
        cmd: IpcCommand,
        responder: oneshot::Sender<IpcResponse>,
    },
    /// Advance the playing transition by one step.
    TransitionStep,
    /// A display transfer ran out of time.
    TransferTimeout { id: u64 },
    /// Shutdown signal.
    Shutdown,
}

/// Delay between transition steps in milliseconds (~60 FPS).
const TRANSITION_STEP_MS: u64 = 16;

/// IPC read timeout - clients must send within this period.
const IPC_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Fallback error line when a response cannot be serialized.
const SERIALIZATION_ERROR_LINE: &str =
    "{\"status\":\"error\",\"message\":\"Internal serialization error\"}\n";

/// Run the IPC server, accepting connections and dispatching commands.
async fn run_ipc_server(listener: TcpListener, event_tx: mpsc::Sender<DaemonEvent>) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                error!("Failed to accept client connection: {}", e);
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }
        };

        debug!("Client connected from {}", peer);

        let event_tx = event_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_client(stream, event_tx).await {
                warn!("Client handler error: {}", e);
            }
        });
    }
}

fn response_line(response: &IpcResponse) -> String {
    encode_line(response).unwrap_or_else(|e| {
        warn!("Failed to serialize IPC response: {}", e);
        SERIALIZATION_ERROR_LINE.to_string()
    })
}

/// Handle a single client connection: one command line in, one response
/// line out.
async fn handle_client<S>(stream: S, event_tx: mpsc::Sender<DaemonEvent>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let limited_reader = reader.take(MAX_IPC_MESSAGE_SIZE as u64);
    let mut reader = BufReader::new(limited_reader);
    let mut line = String::new();

    // Read command (single line of JSON) with timeout and size bound
    let read_result = tokio::time::timeout(IPC_READ_TIMEOUT, reader.read_line(&mut line)).await;
    let bytes_read = match read_result {
        Ok(Ok(n)) => n,
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => {
            // Timeout: client did not send in time, silently close
            return Ok(());
        }
    };
    if bytes_read == 0 {
        return Ok(()); // Client disconnected
    }

    debug!("Received command: {}", line.trim());

    let cmd: IpcCommand = match decode_line(&line) {
        Ok(cmd) => cmd,
        Err(e) => {
            let response = IpcResponse::error(format!("Invalid command: {}", e));
            writer.write_all(response_line(&response).as_bytes()).await?;
            return Ok(());
        }
    };

    // Check for stop command (special handling)
    let is_stop = matches!(cmd, IpcCommand::Stop);

    let (resp_tx, resp_rx) = oneshot::channel();
    if event_tx
        .send(DaemonEvent::IpcCommand {
            cmd,
            responder: resp_tx,
        })
        .await
        .is_err()
    {
        let response = IpcResponse::error("Daemon is shutting down");
        writer.write_all(response_line(&response).as_bytes()).await?;
        return Ok(());
    }

    let response = match resp_rx.await {
        Ok(resp) => resp,
        Err(_) => IpcResponse::error("Failed to get response from daemon"),
    };
    writer.write_all(response_line(&response).as_bytes()).await?;
    writer.flush().await?;

    // If this was a stop command, signal shutdown
    if is_stop {
        let _ = event_tx.send(DaemonEvent::Shutdown).await;
    }

    Ok(())
}

/// Spawn a task that posts `event` after `delay`.
fn spawn_timer(
    event_tx: mpsc::Sender<DaemonEvent>,
    delay: Duration,
    event: DaemonEvent,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if event_tx.send(event).await.is_err() {
            debug!("Event loop gone before timer fired");
        }
    })
}

/// Arm the timers the controller asked for.
fn arm_wakeups(
    wakeups: Vec<Wakeup>,
    event_tx: &mpsc::Sender<DaemonEvent>,
    transfer_timeout: Duration,
    timers: &mut Vec<JoinHandle<()>>,
) {
    timers.retain(|handle| !handle.is_finished());
    for wakeup in wakeups {
        let (delay, event) = match wakeup {
            Wakeup::TransitionStep => (
                Duration::from_millis(TRANSITION_STEP_MS),
                DaemonEvent::TransitionStep,
            ),
            Wakeup::TransferTimeout { id } => {
                (transfer_timeout, DaemonEvent::TransferTimeout { id })
            }
        };
        timers.push(spawn_timer(event_tx.clone(), delay, event));
    }
}

/// Check if another daemon instance is already running by probing the IPC
/// address.
async fn check_already_running(address: &str) -> bool {
    TcpStream::connect(address).await.is_ok()
}

fn parse_log_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO, // default fallback for invalid values
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (needed for log level)
    let mut config = Config::load().unwrap_or_else(|e| {
        // Can't use tracing yet, fall back to eprintln
        eprintln!("Failed to load configuration: {}. Using defaults.", e);
        Config::default()
    });

    // Initialize logging with configured log level
    let subscriber = FmtSubscriber::builder()
        .with_max_level(parse_log_level(&config.behavior.log_level))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Validate and clamp config values
    let config_warnings = config.validate();
    for w in &config_warnings {
        warn!("Config: {} - {}", w.field, w.message);
    }

    info!("OpenPip daemon starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Check if another instance is already running
    if check_already_running(&config.ipc.address).await {
        error!(
            "Another openpip daemon instance is already running ({} is taken)",
            config.ipc.address
        );
        return Ok(());
    }

    info!(
        "Configuration loaded: displays={}, pip={}x{}, transfer_timeout={}ms, log_level={}",
        config.displays.len(),
        config.pip.width,
        config.pip.height,
        config.transfer.timeout_ms,
        config.behavior.log_level
    );
    for d in &config.displays {
        info!(
            "  Display {}: {}x{} at {},{}{} \"{}\"",
            d.id,
            d.width,
            d.height,
            d.x,
            d.y,
            if d.primary { " [PRIMARY]" } else { "" },
            d.name
        );
    }

    let listener = TcpListener::bind(&config.ipc.address)
        .await
        .with_context(|| format!("Failed to bind IPC address {}", config.ipc.address))?;

    let mut controller = PipController::new(&config);
    if config.behavior.enter_on_start {
        if let IpcResponse::Error { message } =
            controller.handle_command(IpcCommand::EnterPip { display: None })
        {
            warn!("Failed to enter PiP on startup: {}", message);
        }
    }

    info!(
        "Floating window {} on display {} at {:?} ({} displays)",
        controller.state().state(),
        controller.bounds().display_id(),
        controller.bounds().bounds(),
        controller.layout().len()
    );

    let transfer_timeout = Duration::from_millis(config.transfer.timeout_ms);

    // Create event channel
    let (event_tx, mut event_rx) = mpsc::channel::<DaemonEvent>(100);

    // Spawn IPC server
    let ipc_tx = event_tx.clone();
    tokio::spawn(async move {
        run_ipc_server(listener, ipc_tx).await;
    });

    info!("IPC server listening on {}", config.ipc.address);

    // Install Ctrl+C handler so terminal kill triggers graceful shutdown
    {
        let shutdown_tx = event_tx.clone();
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                info!("Ctrl+C received, initiating shutdown...");
                let _ = shutdown_tx.send(DaemonEvent::Shutdown).await;
            }
        });
    }

    info!("Ready. Use openpip-cli to send commands.");

    // Pending step and timeout timers
    let mut timers: Vec<JoinHandle<()>> = Vec::new();

    // Main event loop
    while let Some(event) = event_rx.recv().await {
        match event {
            DaemonEvent::IpcCommand { cmd, responder } => {
                let response = controller.handle_command(cmd);

                // Log if client disconnected before receiving response
                if responder.send(response).is_err() {
                    debug!("Client disconnected before receiving IPC response");
                }
            }
            DaemonEvent::TransitionStep => {
                controller.step_transition();
            }
            DaemonEvent::TransferTimeout { id } => {
                controller.on_transfer_timeout(id);
            }
            DaemonEvent::Shutdown => {
                info!("Shutdown signal received");
                controller.shutdown();
                break;
            }
        }

        // Work queued by the coordinator during this event
        controller.run_scheduled();
        arm_wakeups(
            controller.take_wakeups(),
            &event_tx,
            transfer_timeout,
            &mut timers,
        );
    }

    // Clean up timers if running
    for handle in timers {
        handle.abort();
    }

    info!("OpenPip daemon shutting down.");
    Ok(())
}
