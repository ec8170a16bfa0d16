//! Control socket protocol shared by the daemon and the CLI
//!
//! One JSON object per line, discriminated by a `type` field:
//! - `{"type": "status"}`
//! - `{"type": "set_layout", "layout": "us", "variant": "colemak"}`

use std::path::PathBuf;

use nix::libc;
use serde::{Deserialize, Serialize};

/// Request messages sent from the CLI to the daemon
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcRequest {
    /// Query daemon state
    Status,
    Enable,
    Disable,
    Toggle,
    /// Re-read the mapping table from the config file
    Reload,
    /// Drop modifier state and any pending diacritic
    Reset,
    /// Switch the XKB layout used for diacritic base characters and hex entry.
    /// An empty layout goes back to the system layout.
    SetLayout {
        layout: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        variant: Option<String>,
    },
}

/// Response messages sent from the daemon back to the CLI
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcResponse {
    Success {
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Status(StatusReport),
    Error { message: String },
}

/// Snapshot of daemon state returned for `status`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusReport {
    pub enabled: bool,
    pub trigger: String,
    pub layout: String,
    pub trigger_held: bool,
    pub shift_held: bool,
    /// Combining mark waiting for a base character
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_diacritic: Option<String>,
    pub injecting: bool,
    pub mappings: usize,
    /// Paths of the grabbed keyboards
    pub devices: Vec<PathBuf>,
}

/// Control socket location.
///
/// Prefers `$XDG_RUNTIME_DIR/glyphtap.sock`, otherwise falls back to
/// `/tmp/glyphtap-$UID.sock`.
pub fn socket_path() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        PathBuf::from(runtime_dir).join("glyphtap.sock")
    } else {
        tracing::warn!("XDG_RUNTIME_DIR not set, using fallback socket path in /tmp");
        let uid = unsafe { libc::getuid() };
        PathBuf::from(format!("/tmp/glyphtap-{}.sock", uid))
    }
}
