//! Configuration data model

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::keys::{self, codes};

/// Root configuration structure
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub global: GlobalConfig,
    pub timing: Timing,
    pub keyboard: KeyboardLayout,
    /// Keycode → symbol table, in file order
    pub mappings: Vec<MappingEntry>,
}

/// Global settings
#[derive(Debug, Clone)]
pub struct GlobalConfig {
    pub log_level: LogLevel,
    /// Initial state of the enable switch
    pub enabled: bool,
    pub trigger: TriggerKey,
    pub paste_shortcut: PasteShortcut,
    /// Program and arguments run to show the pending diacritic; the mark is appended
    pub indicator_command: Option<Vec<String>>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            enabled: true,
            trigger: TriggerKey::RightAlt,
            paste_shortcut: PasteShortcut::default(),
            indicator_command: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive string understood by `tracing_subscriber::EnvFilter`.
    pub fn as_filter(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            _ => Err(format!("Unknown log level: {}", s)),
        }
    }
}

/// The side-specific modifier key that activates symbol remapping.
///
/// Each trigger has a counterpart on the other side of the keyboard which
/// never activates remapping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum TriggerKey {
    LeftAlt,
    #[default]
    RightAlt,
    LeftCtrl,
    RightCtrl,
    LeftMeta,
    RightMeta,
}

impl TriggerKey {
    pub fn keycode(self) -> u16 {
        match self {
            Self::LeftAlt => codes::KEY_LEFTALT,
            Self::RightAlt => codes::KEY_RIGHTALT,
            Self::LeftCtrl => codes::KEY_LEFTCTRL,
            Self::RightCtrl => codes::KEY_RIGHTCTRL,
            Self::LeftMeta => codes::KEY_LEFTMETA,
            Self::RightMeta => codes::KEY_RIGHTMETA,
        }
    }

    /// The same modifier on the other side of the keyboard.
    pub fn counterpart(self) -> Self {
        match self {
            Self::LeftAlt => Self::RightAlt,
            Self::RightAlt => Self::LeftAlt,
            Self::LeftCtrl => Self::RightCtrl,
            Self::RightCtrl => Self::LeftCtrl,
            Self::LeftMeta => Self::RightMeta,
            Self::RightMeta => Self::LeftMeta,
        }
    }

    pub fn from_keycode(code: u16) -> Option<Self> {
        [
            Self::LeftAlt,
            Self::RightAlt,
            Self::LeftCtrl,
            Self::RightCtrl,
            Self::LeftMeta,
            Self::RightMeta,
        ]
        .into_iter()
        .find(|t| t.keycode() == code)
    }
}

impl FromStr for TriggerKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        keys::key_code(s)
            .and_then(Self::from_keycode)
            .ok_or_else(|| {
                format!(
                    "Unknown trigger modifier: {} (expected one of LeftAlt, RightAlt, \
                     LeftCtrl, RightCtrl, LeftMeta, RightMeta)",
                    s
                )
            })
    }
}

impl fmt::Display for TriggerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(keys::key_name(self.keycode()).unwrap_or("?"))
    }
}

/// XKB rule names (RMLVO) of the layout used to resolve diacritic base letters
/// and to find the keys that type hex digits.
///
/// Unset fields fall back to the system layout: `XKB_DEFAULT_*`, then
/// `/etc/default/keyboard`, then the xkbcommon defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyboardLayout {
    pub rules: Option<String>,
    pub model: Option<String>,
    pub layout: Option<String>,
    pub variant: Option<String>,
    pub options: Option<String>,
}

impl KeyboardLayout {
    /// A layout by name, e.g. `de` or `us` with variant `colemak`.
    pub fn named(layout: &str, variant: Option<&str>) -> Self {
        Self {
            layout: non_empty(layout),
            variant: variant.and_then(non_empty),
            ..Default::default()
        }
    }

    pub fn is_system_default(&self) -> bool {
        *self == Self::default()
    }
}

impl fmt::Display for KeyboardLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.layout, &self.variant) {
            (Some(layout), Some(variant)) => write!(f, "{}({})", layout, variant),
            (Some(layout), None) => f.write_str(layout),
            (None, Some(variant)) => write!(f, "system({})", variant),
            (None, None) => f.write_str("system"),
        }
    }
}

/// `None` for blank strings, which xkbcommon treats as "use the default".
pub fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Shortcut synthesized to paste from the clipboard: one modifier plus one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasteShortcut {
    pub modifier: u16,
    pub key: u16,
}

impl Default for PasteShortcut {
    fn default() -> Self {
        Self {
            modifier: codes::KEY_LEFTCTRL,
            key: codes::KEY_V,
        }
    }
}

impl FromStr for PasteShortcut {
    type Err = String;

    /// Parses `Modifier+Key`, e.g. `Ctrl+V` or `Shift+Insert`-style names from
    /// the key table. Modifiers map to their left-hand key.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('+').map(|p| p.trim()).collect();
        let [modifier, key] = parts.as_slice() else {
            return Err(format!(
                "Invalid paste shortcut '{}': expected exactly one modifier and one key",
                s
            ));
        };

        let modifier = match modifier.to_uppercase().as_str() {
            "CTRL" | "CONTROL" => codes::KEY_LEFTCTRL,
            "SHIFT" => codes::KEY_LEFTSHIFT,
            "ALT" => codes::KEY_LEFTALT,
            "SUPER" | "META" | "WIN" => codes::KEY_LEFTMETA,
            other => return Err(format!("Unknown modifier in paste shortcut: {}", other)),
        };
        let key = keys::key_code(key)
            .filter(|code| !keys::is_modifier(*code))
            .ok_or_else(|| format!("Unknown key in paste shortcut: {}", key))?;

        Ok(Self { modifier, key })
    }
}

/// Delays used by the injector and the diacritic composer, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub diacritic_timeout_ms: u64,
    pub guard_release_ms: u64,
    pub clipboard_settle_ms: u64,
    pub keystroke_gap_ms: u64,
    pub paste_gap_ms: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            diacritic_timeout_ms: 5000,
            guard_release_ms: 50,
            clipboard_settle_ms: 100,
            keystroke_gap_ms: 1,
            paste_gap_ms: 10,
        }
    }
}

impl Timing {
    pub fn diacritic_timeout(&self) -> Duration {
        Duration::from_millis(self.diacritic_timeout_ms)
    }

    pub fn guard_release(&self) -> Duration {
        Duration::from_millis(self.guard_release_ms)
    }

    pub fn clipboard_settle(&self) -> Duration {
        Duration::from_millis(self.clipboard_settle_ms)
    }

    pub fn keystroke_gap(&self) -> Duration {
        Duration::from_millis(self.keystroke_gap_ms)
    }

    pub fn paste_gap(&self) -> Duration {
        Duration::from_millis(self.paste_gap_ms)
    }
}

/// One row of the mapping table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingEntry {
    /// evdev key code
    pub keycode: u16,
    /// Symbol produced with the trigger held
    pub normal: String,
    /// Symbol produced with trigger and Shift held
    pub shift: String,
}

impl MappingEntry {
    pub fn new(keycode: u16, normal: impl Into<String>, shift: impl Into<String>) -> Self {
        Self {
            keycode,
            normal: normal.into(),
            shift: shift.into(),
        }
    }
}

/// Default location of the configuration file, before tilde expansion.
pub const DEFAULT_CONFIG_PATH: &str = "~/.config/glyphtap/config.kdl";

/// Expand `~` in a configured path.
pub fn expand_path(path: &str) -> PathBuf {
    shellexpand::tilde(path).into_owned().into()
}
