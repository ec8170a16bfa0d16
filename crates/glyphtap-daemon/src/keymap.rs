//! Keyboard layouts compiled with xkbcommon
//!
//! A [`KeyTable`] records what every key types with and without Shift under one
//! XKB layout. The resolver reads it forwards (key → character) to find
//! diacritic base letters; the output task reads it backwards (character → key)
//! to type hex digits on whatever layout is active.
//!
//! Tables are plain data built once per layout change, so they can be shared
//! with the output task and swapped through a [`LayoutHandle`].

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use anyhow::{anyhow, Result};
use glyphtap_config::{non_empty, KeyboardLayout};
use xkbcommon::xkb;

/// xkb keycodes are evdev codes plus this offset
const EVDEV_OFFSET: u32 = 8;

/// Highest evdev code that fits the xkb keycode range
const MAX_KEY_CODE: u16 = 247;

/// Debian-style system keyboard settings, also written by `localectl`
const SYSTEM_KEYBOARD_FILE: &str = "/etc/default/keyboard";

/// A physical key and whether Shift has to be held for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyStroke {
    pub code: u16,
    pub shift: bool,
}

/// What each key produces under one layout.
#[derive(Debug, Default)]
pub struct KeyTable {
    description: String,
    symbols: HashMap<(u16, bool), String>,
    positions: HashMap<char, KeyStroke>,
}

impl KeyTable {
    /// A table that types and resolves nothing.
    pub fn empty() -> Self {
        Self {
            description: "none".to_string(),
            ..Default::default()
        }
    }

    /// Build a table from `(code, shift, text)` triples. Entries that are empty
    /// or contain control characters are dropped.
    ///
    /// When several keys type the same character, the unshifted one with the
    /// lowest code wins.
    pub fn from_symbols<I, S>(description: impl Into<String>, symbols: I) -> Self
    where
        I: IntoIterator<Item = (u16, bool, S)>,
        S: Into<String>,
    {
        let mut entries: Vec<(u16, bool, String)> = symbols
            .into_iter()
            .map(|(code, shift, text)| (code, shift, text.into()))
            .filter(|(_, _, text)| !text.is_empty() && !text.chars().any(char::is_control))
            .collect();
        entries.sort_by_key(|(code, shift, _)| (*shift, *code));

        let mut table = Self {
            description: description.into(),
            ..Default::default()
        };
        for (code, shift, text) in entries {
            let mut chars = text.chars();
            if let (Some(c), None) = (chars.next(), chars.next()) {
                table.positions.entry(c).or_insert(KeyStroke { code, shift });
            }
            table.symbols.insert((code, shift), text);
        }
        table
    }

    /// Compile `layout` with xkbcommon, filling unset names from the system.
    pub fn compile(layout: &KeyboardLayout) -> Result<Self> {
        let names = with_system_defaults(layout, system_layout());
        let field = |value: &Option<String>| value.clone().unwrap_or_default();

        let context = xkb::Context::new(xkb::CONTEXT_NO_FLAGS);
        let keymap = xkb::Keymap::new_from_names(
            &context,
            &field(&names.rules),
            &field(&names.model),
            &field(&names.layout),
            &field(&names.variant),
            names.options.clone(),
            xkb::KEYMAP_COMPILE_NO_FLAGS,
        )
        .ok_or_else(|| anyhow!("xkbcommon cannot compile keymap {}", names))?;

        let table = Self::from_keymap(&keymap, names.to_string());
        tracing::info!(
            "Keyboard layout {}: {} key position(s)",
            table.description,
            table.symbols.len()
        );
        Ok(table)
    }

    fn from_keymap(keymap: &xkb::Keymap, description: String) -> Self {
        let shift_mask = 1u32.checked_shl(keymap.mod_get_index(xkb::MOD_NAME_SHIFT));
        let mut symbols = Vec::new();

        for shift in [false, true] {
            let mut state = xkb::State::new(keymap);
            if shift {
                let Some(mask) = shift_mask else {
                    tracing::warn!("Keymap {} has no Shift modifier", description);
                    break;
                };
                state.update_mask(mask, 0, 0, 0, 0, 0);
            }

            for code in 1..=MAX_KEY_CODE {
                let keycode = xkb::Keycode::new(u32::from(code) + EVDEV_OFFSET);
                symbols.push((code, shift, state.key_get_utf8(keycode)));
            }
        }

        Self::from_symbols(description, symbols)
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Text the key types, `None` for keys without a printable result.
    pub fn symbol(&self, code: u16, shift: bool) -> Option<&str> {
        self.symbols.get(&(code, shift)).map(String::as_str)
    }

    /// The key that types `c`.
    pub fn find(&self, c: char) -> Option<KeyStroke> {
        self.positions.get(&c).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

/// Fill an unset layout from the system settings. A configured layout is used
/// as is; rules, model, variant and options set in the config override the
/// system's.
fn with_system_defaults(layout: &KeyboardLayout, system: Option<KeyboardLayout>) -> KeyboardLayout {
    if layout.layout.is_some() {
        return layout.clone();
    }
    let Some(system) = system else {
        return layout.clone();
    };

    KeyboardLayout {
        rules: layout.rules.clone().or(system.rules),
        model: layout.model.clone().or(system.model),
        layout: system.layout,
        variant: layout.variant.clone().or(system.variant),
        options: layout.options.clone().or(system.options),
    }
}

/// The system layout, unless `XKB_DEFAULT_LAYOUT` is set, which xkbcommon
/// then picks up by itself.
fn system_layout() -> Option<KeyboardLayout> {
    if std::env::var_os("XKB_DEFAULT_LAYOUT").is_some() {
        return None;
    }
    let content = std::fs::read_to_string(SYSTEM_KEYBOARD_FILE).ok()?;
    let layout = parse_system_keyboard(&content);
    if layout.layout.is_none() {
        return None;
    }
    tracing::debug!("System keyboard layout from {}: {}", SYSTEM_KEYBOARD_FILE, layout);
    Some(layout)
}

/// Parse `XKBLAYOUT="de"` style assignments.
fn parse_system_keyboard(content: &str) -> KeyboardLayout {
    let mut layout = KeyboardLayout::default();

    for line in content.lines() {
        let line = line.trim();
        if line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = non_empty(value.trim().trim_matches(|c| c == '"' || c == '\''));
        match key.trim() {
            "XKBMODEL" => layout.model = value,
            "XKBLAYOUT" => layout.layout = value,
            "XKBVARIANT" => layout.variant = value,
            "XKBOPTIONS" => layout.options = value,
            _ => {}
        }
    }

    layout
}

/// Shared, swappable reference to the active [`KeyTable`].
///
/// Cloned into the resolver, the output task and the daemon loop; readers see
/// the table that is active at the time of the call.
#[derive(Debug, Clone)]
pub struct LayoutHandle(Arc<RwLock<Arc<KeyTable>>>);

impl LayoutHandle {
    pub fn new(table: KeyTable) -> Self {
        Self(Arc::new(RwLock::new(Arc::new(table))))
    }

    pub fn current(&self) -> Arc<KeyTable> {
        match self.0.read() {
            Ok(table) => Arc::clone(&table),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn replace(&self, table: KeyTable) {
        tracing::info!("Layout switched to {}", table.description());
        let table = Arc::new(table);
        match self.0.write() {
            Ok(mut current) => *current = table,
            Err(poisoned) => *poisoned.into_inner() = table,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_1: u16 = 2;
    const KEY_Y: u16 = 21;
    const KEY_E: u16 = 18;
    const KEY_Q: u16 = 16;
    const KEY_A: u16 = 30;
    const KEY_SPACE: u16 = 57;
    const KEY_BACKSPACE: u16 = 14;

    #[test]
    fn test_from_symbols_prefers_unshifted_low_codes() {
        let table = KeyTable::from_symbols(
            "test",
            vec![
                (40, true, "1"),
                (KEY_1, false, "1"),
                (KEY_1, true, "!"),
                (KEY_BACKSPACE, false, "\u{8}"),
                (KEY_Q, false, ""),
            ],
        );

        assert_eq!(table.find('1'), Some(KeyStroke { code: KEY_1, shift: false }));
        assert_eq!(table.find('!'), Some(KeyStroke { code: KEY_1, shift: true }));
        assert_eq!(table.symbol(KEY_BACKSPACE, false), None);
        assert_eq!(table.symbol(KEY_Q, false), None);
        assert_eq!(table.symbol(40, true), Some("1"));
    }

    #[test]
    fn test_parse_system_keyboard() {
        let content = r#"
# KEYBOARD CONFIGURATION FILE
XKBMODEL="pc105"
XKBLAYOUT="de"
XKBVARIANT="nodeadkeys"
XKBOPTIONS=""

BACKSPACE="guess"
"#;
        let layout = parse_system_keyboard(content);
        assert_eq!(layout.model.as_deref(), Some("pc105"));
        assert_eq!(layout.layout.as_deref(), Some("de"));
        assert_eq!(layout.variant.as_deref(), Some("nodeadkeys"));
        assert_eq!(layout.options, None);
    }

    #[test]
    fn test_configured_layout_beats_system() {
        let system = parse_system_keyboard("XKBLAYOUT=fr\nXKBMODEL=pc105\n");

        let configured = KeyboardLayout::named("de", None);
        assert_eq!(with_system_defaults(&configured, Some(system.clone())), configured);

        let unset = KeyboardLayout {
            options: Some("compose:ralt".to_string()),
            ..Default::default()
        };
        let merged = with_system_defaults(&unset, Some(system));
        assert_eq!(merged.layout.as_deref(), Some("fr"));
        assert_eq!(merged.model.as_deref(), Some("pc105"));
        assert_eq!(merged.options.as_deref(), Some("compose:ralt"));

        assert_eq!(with_system_defaults(&unset, None), unset);
    }

    #[test]
    fn test_compile_us_keymap() {
        let table = KeyTable::compile(&KeyboardLayout::named("us", None)).unwrap();
        assert_eq!(table.description(), "us");
        assert_eq!(table.symbol(KEY_Y, false), Some("y"));
        assert_eq!(table.symbol(KEY_E, true), Some("E"));
        assert_eq!(table.symbol(KEY_1, true), Some("!"));
        assert_eq!(table.symbol(KEY_SPACE, false), Some(" "));
        assert_eq!(table.symbol(KEY_BACKSPACE, false), None);
        assert_eq!(table.find('a'), Some(KeyStroke { code: KEY_A, shift: false }));
    }

    #[test]
    fn test_compile_de_keymap() {
        let table = KeyTable::compile(&KeyboardLayout::named("de", None)).unwrap();
        assert_eq!(table.symbol(KEY_Y, false), Some("z"));
        assert_eq!(table.symbol(44, false), Some("y"));
        assert_eq!(table.symbol(39, false), Some("ö"));
        assert_eq!(table.symbol(KEY_1, true), Some("!"));
        assert_eq!(table.find('z'), Some(KeyStroke { code: KEY_Y, shift: false }));
    }

    #[test]
    fn test_compile_unknown_layout_fails() {
        let result = KeyTable::compile(&KeyboardLayout::named("no-such-layout", None));
        assert!(result.is_err());
    }

    #[test]
    fn test_handle_swaps_table() {
        let handle = LayoutHandle::new(KeyTable::from_symbols("us", vec![(KEY_Y, false, "y")]));
        let before = handle.current();

        handle.replace(KeyTable::from_symbols("de", vec![(KEY_Y, false, "z")]));
        assert_eq!(handle.current().symbol(KEY_Y, false), Some("z"));
        assert_eq!(handle.current().description(), "de");
        // Earlier snapshots stay intact
        assert_eq!(before.symbol(KEY_Y, false), Some("y"));
    }
}
