//! glyphtap daemon
//!
//! Grabs the keyboards and types Unicode symbols for trigger + key chords
//! according to configuration.

mod clipboard;
mod composer;
mod daemon;
mod device;
mod event;
mod indicator;
mod injector;
mod interceptor;
mod ipc;
mod keymap;
mod mapping;
mod modifiers;
mod resolver;
mod scheduler;
mod tap;
#[cfg(test)]
mod testing;
mod virtual_device;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use nix::unistd::{access, AccessFlags};
use tracing_subscriber::EnvFilter;

use crate::daemon::Daemon;
use crate::mapping::ConfigMappingSource;

/// How often to re-check device permissions while waiting for them.
const PERMISSION_POLL: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(name = "glyphtapd")]
#[command(about = "Keyboard symbol remapping daemon")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = glyphtap_config::DEFAULT_CONFIG_PATH)]
    config: String,

    /// Control socket path (defaults to $XDG_RUNTIME_DIR/glyphtap.sock)
    #[arg(short, long)]
    socket: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config_path = glyphtap_config::expand_path(&args.config);

    // Only the log level is needed before logging is up; the full load below
    // reports problems with the file
    let log_level = glyphtap_config::parse_config(&config_path)
        .map(|config| config.global.log_level)
        .unwrap_or_default();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(log_level.as_filter())),
        )
        .init();

    tracing::info!("Loading configuration from {}", config_path.display());
    let source = ConfigMappingSource::new(&config_path);
    let config = source.load_config();

    wait_for_device_access().await;

    let socket_path = args
        .socket
        .unwrap_or_else(glyphtap_config::ipc::socket_path);

    Daemon::run(source, config, socket_path).await
}

/// Why the daemon cannot intercept yet, if it cannot.
fn missing_access() -> Option<String> {
    let uinput = Path::new("/dev/uinput");
    if access(uinput, AccessFlags::R_OK | AccessFlags::W_OK).is_err() {
        return Some(format!("no read/write access to {}", uinput.display()));
    }

    let readable = std::fs::read_dir("/dev/input")
        .map(|entries| {
            entries.filter_map(|entry| entry.ok()).any(|entry| {
                let path = entry.path();
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("event"))
                    && access(&path, AccessFlags::R_OK).is_ok()
            })
        })
        .unwrap_or(false);
    if !readable {
        return Some("no readable device in /dev/input".to_string());
    }

    None
}

/// Block until uinput and at least one input device are accessible.
async fn wait_for_device_access() {
    let Some(reason) = missing_access() else {
        return;
    };

    tracing::warn!(
        "Cannot intercept keys: {}. Add your user to the 'input' group or \
         install a udev rule; checking again every {}s",
        reason,
        PERMISSION_POLL.as_secs()
    );

    loop {
        tokio::time::sleep(PERMISSION_POLL).await;
        match missing_access() {
            None => {
                tracing::info!("Device access granted");
                return;
            }
            Some(reason) => tracing::debug!("Still waiting for device access: {}", reason),
        }
    }
}
