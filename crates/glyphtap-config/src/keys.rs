//! Key names and evdev key codes
//!
//! The mapping table, the trigger modifier and the paste shortcut all refer to
//! physical keys by evdev code. Config files and log lines use the names below.

/// Well-known evdev key codes used outside of the name table.
pub mod codes {
    pub const KEY_LEFTCTRL: u16 = 29;
    pub const KEY_LEFTSHIFT: u16 = 42;
    pub const KEY_RIGHTSHIFT: u16 = 54;
    pub const KEY_LEFTALT: u16 = 56;
    pub const KEY_SPACE: u16 = 57;
    pub const KEY_RIGHTCTRL: u16 = 97;
    pub const KEY_RIGHTALT: u16 = 100;
    pub const KEY_LEFTMETA: u16 = 125;
    pub const KEY_RIGHTMETA: u16 = 126;
    pub const KEY_V: u16 = 47;
}

struct KeyName {
    code: u16,
    name: &'static str,
    aliases: &'static [&'static str],
}

const fn key(code: u16, name: &'static str, aliases: &'static [&'static str]) -> KeyName {
    KeyName {
        code,
        name,
        aliases,
    }
}

static KEY_NAMES: &[KeyName] = &[
    key(1, "Escape", &["ESC"]),
    key(2, "1", &["KEY_1"]),
    key(3, "2", &["KEY_2"]),
    key(4, "3", &["KEY_3"]),
    key(5, "4", &["KEY_4"]),
    key(6, "5", &["KEY_5"]),
    key(7, "6", &["KEY_6"]),
    key(8, "7", &["KEY_7"]),
    key(9, "8", &["KEY_8"]),
    key(10, "9", &["KEY_9"]),
    key(11, "0", &["KEY_0"]),
    key(12, "Minus", &["-"]),
    key(13, "Equal", &["EQUALS", "="]),
    key(14, "Backspace", &[]),
    key(15, "Tab", &[]),
    key(16, "Q", &[]),
    key(17, "W", &[]),
    key(18, "E", &[]),
    key(19, "R", &[]),
    key(20, "T", &[]),
    key(21, "Y", &[]),
    key(22, "U", &[]),
    key(23, "I", &[]),
    key(24, "O", &[]),
    key(25, "P", &[]),
    key(26, "LeftBrace", &["LBRACE", "["]),
    key(27, "RightBrace", &["RBRACE", "]"]),
    key(28, "Enter", &["RETURN"]),
    key(29, "LeftCtrl", &["LCTRL", "CTRL"]),
    key(30, "A", &[]),
    key(31, "S", &[]),
    key(32, "D", &[]),
    key(33, "F", &[]),
    key(34, "G", &[]),
    key(35, "H", &[]),
    key(36, "J", &[]),
    key(37, "K", &[]),
    key(38, "L", &[]),
    key(39, "Semicolon", &[";"]),
    key(40, "Apostrophe", &["'"]),
    key(41, "Grave", &["`"]),
    key(42, "LeftShift", &["LSHIFT", "SHIFT"]),
    key(43, "Backslash", &["\\"]),
    key(44, "Z", &[]),
    key(45, "X", &[]),
    key(46, "C", &[]),
    key(47, "V", &[]),
    key(48, "B", &[]),
    key(49, "N", &[]),
    key(50, "M", &[]),
    key(51, "Comma", &[","]),
    key(52, "Dot", &["PERIOD", "."]),
    key(53, "Slash", &["/"]),
    key(54, "RightShift", &["RSHIFT"]),
    key(56, "LeftAlt", &["LALT", "ALT"]),
    key(57, "Space", &[]),
    key(58, "CapsLock", &["CAPS"]),
    key(86, "102nd", &["LESSGREATER"]),
    key(97, "RightCtrl", &["RCTRL"]),
    key(100, "RightAlt", &["RALT", "ALTGR"]),
    key(125, "LeftMeta", &["LMETA", "SUPER", "META"]),
    key(126, "RightMeta", &["RMETA"]),
];

/// Look up the evdev code for a key name (case-insensitive).
///
/// Accepts the canonical names above, their aliases, and raw `KEY_<n>` numbers
/// such as `KEY_183`. `KEY_0` through `KEY_9` name the digit row, as in evdev.
pub fn key_code(name: &str) -> Option<u16> {
    let upper = name.trim().to_uppercase();

    let found = KEY_NAMES.iter().find(|k| {
        k.name.to_uppercase() == upper || k.aliases.iter().any(|alias| *alias == upper)
    });
    if let Some(k) = found {
        return Some(k.code);
    }

    upper
        .strip_prefix("KEY_")
        .and_then(|rest| rest.parse::<u16>().ok())
}

/// Canonical name for an evdev code, if it has one.
pub fn key_name(code: u16) -> Option<&'static str> {
    KEY_NAMES.iter().find(|k| k.code == code).map(|k| k.name)
}

/// Human-readable key label for logs, falling back to `Key(<code>)`.
pub fn display_key(code: u16) -> String {
    match key_name(code) {
        Some(name) => name.to_string(),
        None => format!("Key({})", code),
    }
}

/// Whether the code belongs to a modifier key (Shift, Ctrl, Alt, Meta on either side).
pub fn is_modifier(code: u16) -> bool {
    matches!(
        code,
        codes::KEY_LEFTCTRL
            | codes::KEY_RIGHTCTRL
            | codes::KEY_LEFTSHIFT
            | codes::KEY_RIGHTSHIFT
            | codes::KEY_LEFTALT
            | codes::KEY_RIGHTALT
            | codes::KEY_LEFTMETA
            | codes::KEY_RIGHTMETA
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_code_letters_and_case() {
        assert_eq!(key_code("Q"), Some(16));
        assert_eq!(key_code("q"), Some(16));
        assert_eq!(key_code("slash"), Some(53));
    }

    #[test]
    fn test_key_code_aliases() {
        assert_eq!(key_code("/"), Some(53));
        assert_eq!(key_code("AltGr"), Some(codes::KEY_RIGHTALT));
        assert_eq!(key_code("ctrl"), Some(codes::KEY_LEFTCTRL));
        assert_eq!(key_code("KEY_1"), Some(2));
    }

    #[test]
    fn test_key_code_raw_numbers() {
        assert_eq!(key_code("KEY_183"), Some(183));
        assert_eq!(key_code("KEY_NOPE"), None);
        assert_eq!(key_code("Hyper"), None);
    }

    #[test]
    fn test_display_key() {
        assert_eq!(display_key(53), "Slash");
        assert_eq!(display_key(240), "Key(240)");
    }

    #[test]
    fn test_modifier_codes() {
        assert!(is_modifier(codes::KEY_RIGHTALT));
        assert!(is_modifier(codes::KEY_LEFTSHIFT));
        assert!(!is_modifier(16));
    }
}
