//! glyphtap CLI
//!
//! Control and configuration tool for glyphtap.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use glyphtap_config::ipc::{IpcRequest, IpcResponse, StatusReport};
use glyphtap_config::{keys, Config};
use miette::IntoDiagnostic;

#[derive(Parser, Debug)]
#[command(name = "glyphtap")]
#[command(about = "Type Unicode symbols with a trigger key")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = glyphtap_config::DEFAULT_CONFIG_PATH)]
    config: String,

    /// Control socket of the running daemon
    #[arg(short, long)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate the configuration file
    Validate,

    /// List available input devices
    Devices,

    /// Write a configuration file with the built-in mapping table
    Generate {
        /// Output path (defaults to the configuration path)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,

        /// Print to stdout instead of writing a file
        #[arg(long, conflicts_with_all = ["output", "force"])]
        print: bool,
    },

    /// Show current daemon status
    Status,

    /// Turn remapping on
    Enable,

    /// Turn remapping off; keys pass through untouched
    Disable,

    /// Flip remapping on or off
    Toggle,

    /// Reload the mapping table from the configuration file
    Reload,

    /// Forget held modifiers and any pending diacritic
    Reset,

    /// Switch the XKB layout used for diacritic base letters and hex entry
    Layout {
        /// XKB layout name, e.g. de; empty for the system layout
        name: String,

        /// XKB variant, e.g. nodeadkeys
        #[arg(long)]
        variant: Option<String>,
    },
}

fn main() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let config_path = glyphtap_config::expand_path(&cli.config);
    let socket_path = cli
        .socket
        .unwrap_or_else(glyphtap_config::ipc::socket_path);

    match cli.command {
        Commands::Validate => cmd_validate(&config_path),
        Commands::Devices => cmd_devices(),
        Commands::Generate {
            output,
            force,
            print,
        } => cmd_generate(&config_path, output, force, print),
        Commands::Status => cmd_status(&socket_path),
        Commands::Enable => cmd_control(&socket_path, IpcRequest::Enable),
        Commands::Disable => cmd_control(&socket_path, IpcRequest::Disable),
        Commands::Toggle => cmd_control(&socket_path, IpcRequest::Toggle),
        Commands::Reload => cmd_control(&socket_path, IpcRequest::Reload),
        Commands::Reset => cmd_control(&socket_path, IpcRequest::Reset),
        Commands::Layout { name, variant } => {
            cmd_control(
                &socket_path,
                IpcRequest::SetLayout {
                    layout: name,
                    variant,
                },
            )
        }
    }
}

fn cmd_validate(config_path: &Path) -> miette::Result<()> {
    println!("Validating configuration: {}", config_path.display());

    let config = glyphtap_config::parse_config(config_path)?;

    println!("Configuration is valid!");
    print!("{}", config_summary(&config));
    Ok(())
}

fn config_summary(config: &Config) -> String {
    let marks = config
        .mappings
        .iter()
        .flat_map(|entry| [&entry.normal, &entry.shift])
        .filter(|symbol| {
            symbol
                .chars()
                .next()
                .is_some_and(|c| ('\u{300}'..='\u{36F}').contains(&c))
        })
        .count();

    format!(
        "  Trigger: {}\n  Layout: {}\n  Paste shortcut: {}+{}\n  Mappings: {} ({} diacritic(s))\n",
        config.global.trigger,
        config.keyboard,
        keys::display_key(config.global.paste_shortcut.modifier),
        keys::display_key(config.global.paste_shortcut.key),
        config.mappings.len(),
        marks
    )
}

fn cmd_devices() -> miette::Result<()> {
    println!("Available input devices:\n");

    let mut paths: Vec<PathBuf> = std::fs::read_dir("/dev/input")
        .into_diagnostic()?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("event"))
        })
        .collect();
    paths.sort();

    for path in paths {
        let Ok(device) = evdev::Device::open(&path) else {
            continue;
        };

        let name = device.name().unwrap_or("Unknown");
        let id = device.input_id();
        let vendor_product = format!("{:04x}:{:04x}", id.vendor(), id.product());

        let is_keyboard = device.supported_events().contains(evdev::EventType::KEY)
            && device
                .supported_keys()
                .is_some_and(|keys| keys.contains(evdev::Key::KEY_A));

        let device_type = if name == "glyphtap virtual keyboard" {
            "glyphtap output"
        } else if is_keyboard {
            "keyboard"
        } else {
            "other"
        };

        println!("  {} [{}]", name, device_type);
        println!("    Path: {}", path.display());
        println!("    ID: {}", vendor_product);
        println!();
    }

    Ok(())
}

fn cmd_generate(
    config_path: &Path,
    output: Option<PathBuf>,
    force: bool,
    print: bool,
) -> miette::Result<()> {
    if print {
        let config = Config {
            mappings: glyphtap_config::default_mappings(),
            ..Default::default()
        };
        print!("{}", glyphtap_config::generate_config(&config));
        return Ok(());
    }

    let path = output.unwrap_or_else(|| config_path.to_path_buf());
    if path.exists() && !force {
        return Err(miette::miette!(
            help = "Pass --force to overwrite it",
            "{} already exists",
            path.display()
        ));
    }

    let config = glyphtap_config::write_default_config(&path)?;
    println!(
        "Wrote {} mapping(s) to {}",
        config.mappings.len(),
        path.display()
    );
    Ok(())
}

fn send_request(socket_path: &Path, request: &IpcRequest) -> miette::Result<IpcResponse> {
    let mut stream = UnixStream::connect(socket_path).map_err(|e| {
        miette::miette!(
            help = "Is glyphtapd running?",
            "Cannot connect to {}: {}",
            socket_path.display(),
            e
        )
    })?;

    let mut line = serde_json::to_string(request).into_diagnostic()?;
    line.push('\n');
    stream.write_all(line.as_bytes()).into_diagnostic()?;
    stream.flush().into_diagnostic()?;

    let mut response = String::new();
    BufReader::new(&stream)
        .read_line(&mut response)
        .into_diagnostic()?;
    if response.trim().is_empty() {
        return Err(miette::miette!("Daemon closed the connection without answering"));
    }

    serde_json::from_str(response.trim()).into_diagnostic()
}

fn cmd_control(socket_path: &Path, request: IpcRequest) -> miette::Result<()> {
    match send_request(socket_path, &request)? {
        IpcResponse::Success { message } => {
            println!("{}", message.as_deref().unwrap_or("OK"));
            Ok(())
        }
        IpcResponse::Error { message } => Err(miette::miette!("{}", message)),
        IpcResponse::Status(_) => Err(miette::miette!("Unexpected status response")),
    }
}

fn cmd_status(socket_path: &Path) -> miette::Result<()> {
    match send_request(socket_path, &IpcRequest::Status)? {
        IpcResponse::Status(report) => {
            print!("{}", format_status(&report));
            Ok(())
        }
        IpcResponse::Error { message } => Err(miette::miette!("{}", message)),
        IpcResponse::Success { .. } => Err(miette::miette!("Unexpected response to status")),
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

fn format_status(report: &StatusReport) -> String {
    let mut out = format!(
        "glyphtapd: {}\n  Trigger: {}\n  Layout: {}\n  Mappings: {}\n",
        if report.enabled { "enabled" } else { "disabled" },
        report.trigger,
        report.layout,
        report.mappings
    );

    out.push_str(&format!(
        "  Trigger held: {}\n  Shift held: {}\n  Injecting: {}\n",
        yes_no(report.trigger_held),
        yes_no(report.shift_held),
        yes_no(report.injecting)
    ));

    if let Some(mark) = &report.pending_diacritic {
        let codepoints: Vec<String> = mark.chars().map(|c| format!("U+{:04X}", c as u32)).collect();
        out.push_str(&format!(
            "  Pending diacritic: \u{25CC}{} ({})\n",
            mark,
            codepoints.join(" ")
        ));
    }

    if report.devices.is_empty() {
        out.push_str("  Keyboards: none\n");
    } else {
        out.push_str("  Keyboards:\n");
        for path in &report.devices {
            out.push_str(&format!("    {}\n", path.display()));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_status() {
        let report = StatusReport {
            enabled: true,
            trigger: "RightAlt".to_string(),
            layout: "de".to_string(),
            pending_diacritic: Some("\u{301}".to_string()),
            mappings: 47,
            devices: vec![PathBuf::from("/dev/input/event3")],
            ..Default::default()
        };

        let text = format_status(&report);
        assert!(text.starts_with("glyphtapd: enabled\n"));
        assert!(text.contains("  Layout: de\n"));
        assert!(text.contains("(U+0301)"));
        assert!(text.contains("    /dev/input/event3\n"));
    }

    #[test]
    fn test_format_status_without_devices() {
        let text = format_status(&StatusReport::default());
        assert!(text.starts_with("glyphtapd: disabled\n"));
        assert!(text.contains("Keyboards: none"));
        assert!(!text.contains("Pending diacritic"));
    }

    #[test]
    fn test_config_summary_counts_diacritics() {
        let config = Config {
            mappings: glyphtap_config::default_mappings(),
            ..Default::default()
        };
        let summary = config_summary(&config);
        assert!(summary.contains("Trigger: RightAlt"));
        assert!(summary.contains("Layout: system\n"));
        assert!(summary.contains("(10 diacritic(s))"));
    }

    #[test]
    fn test_connection_to_missing_socket() {
        let err = send_request(Path::new("/nonexistent/glyphtap.sock"), &IpcRequest::Status)
            .unwrap_err();
        assert!(err.to_string().contains("Cannot connect"));
    }
}
