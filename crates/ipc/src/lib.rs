//! OpenPip IPC Protocol
//!
//! Shared types for daemon-CLI communication over a local TCP socket.
//! Messages are single-line JSON documents terminated by `\n`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default address the daemon listens on.
pub const DEFAULT_IPC_ADDR: &str = "127.0.0.1:47631";

/// Maximum size of a single IPC message in bytes.
pub const MAX_IPC_MESSAGE_SIZE: usize = 64 * 1024;

/// Errors produced while encoding or decoding IPC messages.
#[derive(Debug, Error)]
pub enum IpcError {
    #[error("IPC message is {0} bytes, limit is {MAX_IPC_MESSAGE_SIZE}")]
    MessageTooLarge(usize),

    #[error("Empty IPC message")]
    Empty,

    #[error("Malformed IPC message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// A rectangle in screen coordinates, as carried over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpcRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl IpcRect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// Commands that can be sent from the CLI to the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcCommand {
    /// Move the floating window to another display.
    MoveToDisplay {
        /// Target display id.
        target: u32,
    },

    /// Attach (hot-plug) a display.
    AttachDisplay {
        id: u32,
        name: String,
        rect: IpcRect,
    },
    /// Detach a display.
    DetachDisplay { id: u32 },

    /// Start managing the floating window, optionally on a given display.
    EnterPip {
        #[serde(default)]
        display: Option<u32>,
    },
    /// Dismiss the floating window.
    ExitPip,

    /// Query the coordinator state.
    QueryState,
    /// Query the known displays.
    QueryDisplays,

    /// Stop the daemon.
    Stop,
}

/// An in-flight display transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTransfer {
    pub id: u64,
    pub origin: u32,
    pub target: u32,
}

/// A display known to the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayInfo {
    pub id: u32,
    pub name: String,
    pub rect: IpcRect,
    pub primary: bool,
    /// Whether the floating window currently lives on this display.
    pub hosts_pip: bool,
}

/// Responses from the daemon to the CLI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IpcResponse {
    /// Command executed successfully.
    Ok,
    /// Command failed with an error.
    Error {
        /// Error message describing what went wrong.
        message: String,
    },
    /// Coordinator state query response.
    PipState {
        /// Lifecycle state name, e.g. `idle`.
        state: String,
        /// Display hosting the floating window.
        display_id: u32,
        /// Current floating window bounds.
        bounds: IpcRect,
        /// Transfer waiting for its transaction, if any.
        pending_transfer: Option<PendingTransfer>,
        /// Whether a display change transition is queued but not started.
        display_change_scheduled: bool,
        /// Display change transitions currently tracked.
        tracked_transitions: usize,
    },
    /// Display list query response.
    DisplayList { displays: Vec<DisplayInfo> },
}

impl IpcResponse {
    /// Create an error response.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

/// Serialize `message` as one protocol line, including the trailing newline.
pub fn encode_line<T: Serialize>(message: &T) -> Result<String, IpcError> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    if line.len() > MAX_IPC_MESSAGE_SIZE {
        return Err(IpcError::MessageTooLarge(line.len()));
    }
    Ok(line)
}

/// Parse one protocol line. Surrounding whitespace is ignored.
pub fn decode_line<T: DeserializeOwned>(line: &str) -> Result<T, IpcError> {
    if line.len() > MAX_IPC_MESSAGE_SIZE {
        return Err(IpcError::MessageTooLarge(line.len()));
    }
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(IpcError::Empty);
    }
    Ok(serde_json::from_str(trimmed)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_serialization() {
        let cmd = IpcCommand::MoveToDisplay { target: 2 };
        let json = serde_json::to_string(&cmd).unwrap();
        assert!(json.contains("move_to_display"));
        assert!(json.contains("\"target\":2"));

        let cmd2: IpcCommand = serde_json::from_str(&json).unwrap();
        assert_eq!(cmd, cmd2);
    }

    #[test]
    fn test_enter_pip_display_is_optional() {
        let cmd: IpcCommand = serde_json::from_str(r#"{"type":"enter_pip"}"#).unwrap();
        assert_eq!(cmd, IpcCommand::EnterPip { display: None });

        let cmd: IpcCommand = serde_json::from_str(r#"{"type":"enter_pip","display":3}"#).unwrap();
        assert_eq!(cmd, IpcCommand::EnterPip { display: Some(3) });
    }

    #[test]
    fn test_response_serialization() {
        let resp = IpcResponse::Ok;
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("ok"));

        let resp2: IpcResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(resp, resp2);
    }

    #[test]
    fn test_pip_state_serialization() {
        let resp = IpcResponse::PipState {
            state: "scheduled_bounds_change".to_string(),
            display_id: 1,
            bounds: IpcRect::new(1500, 800, 320, 180),
            pending_transfer: Some(PendingTransfer {
                id: 4,
                origin: 1,
                target: 2,
            }),
            display_change_scheduled: false,
            tracked_transitions: 0,
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"status\":\"pip_state\""));
        assert!(json.contains("\"pending_transfer\":{"));

        let resp2: IpcResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(resp, resp2);
    }

    #[test]
    fn test_error_response() {
        let resp = IpcResponse::error("Something went wrong");
        if let IpcResponse::Error { message } = resp {
            assert_eq!(message, "Something went wrong");
        } else {
            panic!("Expected Error response");
        }
    }

    #[test]
    fn test_line_codec() {
        let line = encode_line(&IpcCommand::QueryState).unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);

        let parsed: IpcCommand = decode_line(&line).unwrap();
        assert_eq!(parsed, IpcCommand::QueryState);
    }

    #[test]
    fn test_decode_rejects_bad_input() {
        assert!(matches!(decode_line::<IpcCommand>("  \n"), Err(IpcError::Empty)));
        assert!(matches!(
            decode_line::<IpcCommand>("not valid json"),
            Err(IpcError::Malformed(_))
        ));
        assert!(matches!(
            decode_line::<IpcCommand>("{\"type\": \"unknown_command\"}"),
            Err(IpcError::Malformed(_))
        ));

        let huge = "x".repeat(MAX_IPC_MESSAGE_SIZE + 1);
        assert!(matches!(
            decode_line::<IpcCommand>(&huge),
            Err(IpcError::MessageTooLarge(_))
        ));
    }

    #[test]
    fn test_default_address_is_loopback() {
        assert!(DEFAULT_IPC_ADDR.starts_with("127.0.0.1:"));
    }
}
