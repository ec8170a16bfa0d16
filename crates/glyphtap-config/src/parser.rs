//! KDL configuration parser

use std::collections::HashSet;
use std::path::Path;

use crate::defaults::default_mappings;
use crate::error::ConfigError;
use crate::keys;
use crate::model::*;

/// Build a span in our miette version from kdl's offset/len pair
fn span(offset: usize, len: usize) -> miette::SourceSpan {
    miette::SourceSpan::from((offset, len))
}

/// Parse a configuration file from the given path
pub fn parse_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config_str(&content)
}

/// Parse configuration from a string
///
/// A document without a `mapping` block gets the built-in table.
pub fn parse_config_str(content: &str) -> Result<Config, ConfigError> {
    let doc: kdl::KdlDocument = content.parse().map_err(|e: kdl::KdlError| {
        // kdl carries its own miette version; rebuild the span from offset/len
        let span = span(e.span.offset(), e.span.len());
        ConfigError::ParseError {
            src: content.to_string(),
            span,
            source: e,
        }
    })?;

    let mut config = Config::default();
    let mut mappings = None;

    for node in doc.nodes() {
        match node.name().value() {
            "global" => {
                config.global = parse_global(node)?;
            }
            "timing" => {
                config.timing = parse_timing(node)?;
            }
            "keyboard" => {
                config.keyboard = parse_keyboard(node)?;
            }
            "mapping" => {
                mappings = Some(parse_mapping(node, content)?);
            }
            name => {
                tracing::warn!("Unknown top-level node: {}", name);
            }
        }
    }

    config.mappings = mappings.unwrap_or_else(default_mappings);
    Ok(config)
}

fn first_string<'a>(node: &'a kdl::KdlNode) -> Result<&'a str, ConfigError> {
    node.entries()
        .first()
        .and_then(|e| e.value().as_string())
        .ok_or_else(|| ConfigError::Invalid {
            message: format!("`{}` expects a string value", node.name().value()),
        })
}

fn parse_global(node: &kdl::KdlNode) -> Result<GlobalConfig, ConfigError> {
    let mut global = GlobalConfig::default();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "log-level" => {
                    global.log_level = first_string(child)?
                        .parse()
                        .map_err(|e| ConfigError::Invalid { message: e })?;
                }
                "enabled" => {
                    global.enabled = child
                        .entries()
                        .first()
                        .and_then(|e| e.value().as_bool())
                        .ok_or_else(|| ConfigError::Invalid {
                            message: "`enabled` expects true or false".to_string(),
                        })?;
                }
                "trigger" => {
                    global.trigger = first_string(child)?
                        .parse()
                        .map_err(|e| ConfigError::Invalid { message: e })?;
                }
                "paste-shortcut" => {
                    global.paste_shortcut = first_string(child)?
                        .parse()
                        .map_err(|e| ConfigError::Invalid { message: e })?;
                }
                "indicator-command" => {
                    let argv: Vec<String> = child
                        .entries()
                        .iter()
                        .filter(|e| e.name().is_none())
                        .filter_map(|e| e.value().as_string())
                        .map(|s| s.to_string())
                        .collect();
                    global.indicator_command = if argv.is_empty() { None } else { Some(argv) };
                }
                name => {
                    tracing::warn!("Unknown global config option: {}", name);
                }
            }
        }
    }

    Ok(global)
}

fn parse_keyboard(node: &kdl::KdlNode) -> Result<KeyboardLayout, ConfigError> {
    let mut keyboard = KeyboardLayout::default();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            let slot = match child.name().value() {
                "rules" => &mut keyboard.rules,
                "model" => &mut keyboard.model,
                "layout" => &mut keyboard.layout,
                "variant" => &mut keyboard.variant,
                "options" => &mut keyboard.options,
                name => {
                    tracing::warn!("Unknown keyboard option: {}", name);
                    continue;
                }
            };
            *slot = non_empty(first_string(child)?);
        }
    }

    Ok(keyboard)
}

fn parse_timing(node: &kdl::KdlNode) -> Result<Timing, ConfigError> {
    let mut timing = Timing::default();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            let name = child.name().value();
            let slot = match name {
                "diacritic-timeout-ms" => &mut timing.diacritic_timeout_ms,
                "guard-release-ms" => &mut timing.guard_release_ms,
                "clipboard-settle-ms" => &mut timing.clipboard_settle_ms,
                "keystroke-gap-ms" => &mut timing.keystroke_gap_ms,
                "paste-gap-ms" => &mut timing.paste_gap_ms,
                _ => {
                    tracing::warn!("Unknown timing option: {}", name);
                    continue;
                }
            };

            let value = child
                .entries()
                .first()
                .and_then(|e| e.value().as_i64())
                .ok_or_else(|| ConfigError::Invalid {
                    message: format!("`{}` expects an integer number of milliseconds", name),
                })?;
            *slot = u64::try_from(value).map_err(|_| ConfigError::Invalid {
                message: format!("`{}` must not be negative (got {})", name, value),
            })?;
        }
    }

    Ok(timing)
}

fn parse_mapping(node: &kdl::KdlNode, source: &str) -> Result<Vec<MappingEntry>, ConfigError> {
    let mut mappings = Vec::new();
    let mut seen = HashSet::new();

    let Some(children) = node.children() else {
        return Ok(mappings);
    };

    for child in children.nodes() {
        if child.name().value() != "key" {
            tracing::warn!("Unknown mapping option: {}", child.name().value());
            continue;
        }

        let mut key_entry = None;
        let mut normal = String::new();
        let mut shift = String::new();

        for entry in child.entries() {
            match (entry.name().map(|n| n.value()), entry.value().as_string()) {
                (None, Some(value)) if key_entry.is_none() => key_entry = Some((entry, value)),
                (Some("normal"), Some(value)) => normal = value.to_string(),
                (Some("shift"), Some(value)) => shift = value.to_string(),
                (Some(other), _) => {
                    tracing::warn!("Unknown mapping property: {}", other);
                }
                _ => {
                    return Err(ConfigError::Invalid {
                        message: "mapping entries look like `key \"Slash\" normal=\"…\" shift=\"…\"`"
                            .to_string(),
                    });
                }
            }
        }

        let Some((entry, key)) = key_entry else {
            return Err(ConfigError::MissingField {
                field: "key name (e.g., `key \"Slash\" normal=\"…\"`)".to_string(),
            });
        };

        let entry_span = span(entry.span().offset(), entry.span().len());
        let keycode = keys::key_code(key).ok_or_else(|| ConfigError::UnknownKey {
            key: key.to_string(),
            src: source.to_string(),
            span: entry_span,
        })?;

        if !seen.insert(keycode) {
            return Err(ConfigError::DuplicateMapping {
                key: key.to_string(),
                src: source.to_string(),
                span: entry_span,
            });
        }

        mappings.push(MappingEntry {
            keycode,
            normal,
            shift,
        });
    }

    Ok(mappings)
}
