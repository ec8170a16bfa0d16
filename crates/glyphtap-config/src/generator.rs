//! Render configuration back to KDL
//!
//! Used to create the default config file on first start and by
//! `glyphtap generate`.

use std::path::Path;
use std::time::SystemTime;

use crate::error::ConfigError;
use crate::keys;
use crate::model::{Config, KeyboardLayout, MappingEntry};

/// Format a SystemTime as an ISO 8601 timestamp (UTC).
fn format_timestamp(time: SystemTime) -> String {
    let secs = time
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    let days = secs / 86400;
    let remaining = secs % 86400;
    let hours = remaining / 3600;
    let minutes = (remaining % 3600) / 60;
    let seconds = remaining % 60;

    // Walk forward from 1970-01-01
    let mut year = 1970;
    let mut remaining_days = days as i64;
    loop {
        let days_in_year = if is_leap_year(year) { 366 } else { 365 };
        if remaining_days < days_in_year {
            break;
        }
        remaining_days -= days_in_year;
        year += 1;
    }

    let february = if is_leap_year(year) { 29 } else { 28 };
    let days_in_months: [i64; 12] = [31, february, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

    let mut month = 1;
    for days_in_month in days_in_months {
        if remaining_days < days_in_month {
            break;
        }
        remaining_days -= days_in_month;
        month += 1;
    }

    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
        year,
        month,
        remaining_days + 1,
        hours,
        minutes,
        seconds
    )
}

fn is_leap_year(year: i64) -> bool {
    (year % 4 == 0 && year % 100 != 0) || (year % 400 == 0)
}

/// Characters that are invisible or ambiguous in an editor get escaped.
fn needs_escape(c: char) -> bool {
    let cp = c as u32;
    ('\u{300}'..='\u{36F}').contains(&c)
        || c.is_control()
        || (c.is_whitespace() && c != ' ')
        || (0xE000..=0xF8FF).contains(&cp)
        || cp >= 0xF0000
}

/// Quote a string for KDL, escaping marks, control characters, private-use
/// code points and non-space whitespace as `\u{..}`.
fn kdl_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            c if needs_escape(c) => {
                out.push_str(&format!("\\u{{{:x}}}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn describe(symbol: &str) -> String {
    if symbol.is_empty() {
        return "nothing".to_string();
    }
    symbol
        .chars()
        .map(|c| format!("U+{:04X}", c as u32))
        .collect::<Vec<_>>()
        .join(" ")
}

fn render_mapping(out: &mut String, entry: &MappingEntry) {
    let name = match keys::key_name(entry.keycode) {
        Some(name) => name.to_string(),
        None => format!("KEY_{}", entry.keycode),
    };

    out.push_str(&format!(
        "    key {} normal={} shift={}",
        kdl_string(&name),
        kdl_string(&entry.normal),
        kdl_string(&entry.shift)
    ));

    let hidden = |s: &str| s.is_empty() || s.chars().any(needs_escape) || s.trim().is_empty();
    if hidden(&entry.normal) || hidden(&entry.shift) {
        out.push_str(&format!(
            " // {}: {} / {}",
            name,
            describe(&entry.normal),
            describe(&entry.shift)
        ));
    }
    out.push('\n');
}

fn render_keyboard(out: &mut String, keyboard: &KeyboardLayout) {
    out.push_str("// XKB layout for diacritic base letters and hex entry; unset uses the system layout\n");
    out.push_str("keyboard {\n");
    if keyboard.is_system_default() {
        out.push_str("    // layout \"de\"\n");
        out.push_str("    // variant \"nodeadkeys\"\n");
    }
    let fields = [
        ("rules", &keyboard.rules),
        ("model", &keyboard.model),
        ("layout", &keyboard.layout),
        ("variant", &keyboard.variant),
        ("options", &keyboard.options),
    ];
    for (name, value) in fields {
        if let Some(value) = value {
            out.push_str(&format!("    {} {}\n", name, kdl_string(value)));
        }
    }
    out.push_str("}\n\n");
}

/// Render a full config document.
pub fn generate_config(config: &Config) -> String {
    let mut out = String::new();
    let global = &config.global;
    let timing = &config.timing;

    out.push_str("// glyphtap configuration\n");
    out.push_str(&format!("// Generated: {}\n", format_timestamp(SystemTime::now())));
    out.push_str("// Hold the trigger key and press a mapped key to type its symbol.\n");
    out.push_str("// A combining mark (U+0300-U+036F) waits for the next letter instead.\n\n");

    out.push_str("global {\n");
    out.push_str(&format!("    log-level {}\n", kdl_string(global.log_level.as_filter())));
    out.push_str(&format!("    enabled {}\n", global.enabled));
    out.push_str(&format!("    trigger {}\n", kdl_string(&global.trigger.to_string())));
    let paste_modifier = match global.paste_shortcut.modifier {
        keys::codes::KEY_LEFTSHIFT => "Shift",
        keys::codes::KEY_LEFTALT => "Alt",
        keys::codes::KEY_LEFTMETA => "Super",
        _ => "Ctrl",
    };
    let paste_key = keys::key_name(global.paste_shortcut.key)
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("KEY_{}", global.paste_shortcut.key));
    out.push_str(&format!(
        "    paste-shortcut {}\n",
        kdl_string(&format!("{}+{}", paste_modifier, paste_key))
    ));
    match &global.indicator_command {
        Some(argv) => {
            let args: Vec<String> = argv.iter().map(|a| kdl_string(a)).collect();
            out.push_str(&format!("    indicator-command {}\n", args.join(" ")));
        }
        None => out.push_str("    // indicator-command \"notify-send\" \"-t\" \"800\"\n"),
    }
    out.push_str("}\n\n");

    out.push_str("timing {\n");
    out.push_str(&format!("    diacritic-timeout-ms {}\n", timing.diacritic_timeout_ms));
    out.push_str(&format!("    guard-release-ms {}\n", timing.guard_release_ms));
    out.push_str(&format!("    clipboard-settle-ms {}\n", timing.clipboard_settle_ms));
    out.push_str(&format!("    keystroke-gap-ms {}\n", timing.keystroke_gap_ms));
    out.push_str(&format!("    paste-gap-ms {}\n", timing.paste_gap_ms));
    out.push_str("}\n\n");

    render_keyboard(&mut out, &config.keyboard);

    out.push_str("mapping {\n");
    for entry in &config.mappings {
        render_mapping(&mut out, entry);
    }
    out.push_str("}\n");

    out
}

/// Validate that generated KDL parses back.
fn validate_kdl(content: &str) -> Result<(), ConfigError> {
    content
        .parse::<kdl::KdlDocument>()
        .map_err(|e| ConfigError::Invalid {
            message: format!("Generated KDL is invalid (this is a bug in glyphtap): {}", e),
        })?;
    Ok(())
}

/// Write a config to `path` atomically (temp file in the same directory, then rename).
pub fn write_config(config: &Config, path: &Path) -> Result<(), ConfigError> {
    let content = generate_config(config);
    validate_kdl(&content)?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let temp_path = path.with_extension("kdl.tmp");
    if let Err(e) = std::fs::write(&temp_path, &content) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(e.into());
    }
    if let Err(e) = std::fs::rename(&temp_path, path) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(e.into());
    }

    tracing::info!("Wrote config to {}", path.display());
    Ok(())
}

/// Create the default config at `path`.
pub fn write_default_config(path: &Path) -> Result<Config, ConfigError> {
    let config = Config {
        mappings: crate::defaults::default_mappings(),
        ..Default::default()
    };
    write_config(&config, path)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use crate::parser::parse_config_str;

    #[test]
    fn test_kdl_string_escapes() {
        assert_eq!(kdl_string("…"), "\"…\"");
        assert_eq!(kdl_string("\u{301}"), "\"\\u{301}\"");
        assert_eq!(kdl_string("\u{a0}"), "\"\\u{a0}\"");
        assert_eq!(kdl_string("\u{f8ff}"), "\"\\u{f8ff}\"");
        assert_eq!(kdl_string("\"\\"), "\"\\\"\\\\\"");
        assert_eq!(kdl_string(" "), "\" \"");
    }

    #[test]
    fn test_generated_default_config_parses_back() {
        let config = Config {
            mappings: crate::defaults::default_mappings(),
            ..Default::default()
        };
        let output = generate_config(&config);
        assert!(validate_kdl(&output).is_ok());

        let parsed = parse_config_str(&output).unwrap();
        assert_eq!(parsed.mappings, config.mappings);
        assert_eq!(parsed.timing, config.timing);
        assert_eq!(parsed.global.trigger, config.global.trigger);
        assert_eq!(parsed.global.paste_shortcut, config.global.paste_shortcut);
        assert!(parsed.keyboard.is_system_default());
        assert!(output.contains("    // layout \"de\"\n"));
    }

    #[test]
    fn test_generated_config_comments_hidden_symbols() {
        let config = Config {
            mappings: vec![MappingEntry::new(57, "\u{a0}", " ")],
            ..Default::default()
        };
        let output = generate_config(&config);
        assert!(output.contains("key \"Space\" normal=\"\\u{a0}\" shift=\" \" // Space: U+00A0 / U+0020"));
    }

    #[test]
    fn test_generated_config_keeps_settings() {
        let mut config = Config::default();
        config.global.enabled = false;
        config.global.trigger = TriggerKey::RightCtrl;
        config.keyboard = KeyboardLayout::named("fr", Some("oss"));
        config.global.indicator_command = Some(vec!["notify-send".to_string()]);
        config.timing.diacritic_timeout_ms = 1234;

        let parsed = parse_config_str(&generate_config(&config)).unwrap();
        assert!(!parsed.global.enabled);
        assert_eq!(parsed.global.trigger, TriggerKey::RightCtrl);
        assert_eq!(parsed.keyboard, KeyboardLayout::named("fr", Some("oss")));
        assert_eq!(parsed.global.indicator_command, Some(vec!["notify-send".to_string()]));
        assert_eq!(parsed.timing.diacritic_timeout_ms, 1234);
    }

    #[test]
    fn test_write_default_config_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.kdl");

        let config = write_default_config(&path).unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("kdl.tmp").exists());

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(parse_config_str(&content).unwrap().mappings, config.mappings);
    }

    #[test]
    fn test_format_timestamp() {
        use std::time::{Duration, UNIX_EPOCH};

        let time = UNIX_EPOCH + Duration::from_secs(1767191400);
        assert_eq!(format_timestamp(time), "2025-12-31T14:30:00Z");
        assert_eq!(format_timestamp(UNIX_EPOCH), "1970-01-01T00:00:00Z");
    }
}
