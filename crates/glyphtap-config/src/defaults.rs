//! Built-in symbol table used when no config file exists yet

use crate::model::MappingEntry;

/// (evdev code, trigger symbol, trigger+shift symbol)
///
/// Empty strings are no-ops. Combining marks in the shift column start a
/// diacritic session instead of being typed.
const DEFAULT_TABLE: &[(u16, &str, &str)] = &[
    // Digit row
    (2, "¹", "¡"),
    (3, "²", "½"),
    (4, "³", "⅓"),
    (5, "$", "¼"),
    (6, "‰", " "),
    (7, "↑", "\u{302}"),
    (8, "↗", "¿"),
    (9, "∞", " "),
    (10, "←", "‹"),
    (11, "→", "›"),
    (12, "—", "–"),
    (13, "≠", "±"),
    // Top row
    (16, " ", "\u{306}"),
    (17, "✓", "⌃"),
    (18, "€", "⌥"),
    (19, "®", "\u{30A}"),
    (20, "™", ""),
    (21, "ѣ", "Ѣ"),
    (22, "ѵ", "Ѵ"),
    (23, "і", "І"),
    (24, "ѳ", "Ѳ"),
    (25, "′", "″"),
    (26, "[", "{"),
    (27, "]", "}"),
    // Home row
    (30, "≈", "⌘"),
    (31, "§", "⇧"),
    (32, "°", "⌀"),
    (33, "£", " "),
    (34, "\u{F8FF}", "⊞"),
    (35, "₽", "\u{30B}"),
    (36, "„", " "),
    (37, "“", "’"),
    (38, "”", "‘"),
    (39, "’", "\u{308}"),
    (40, "‘", " "),
    (43, "|", "\\"),
    // Bottom row
    (44, " ", "\u{327}"),
    (45, "×", "·"),
    (46, "©", "¢"),
    (47, "↓", "\u{30C}"),
    (48, "ß", "ẞ"),
    (49, "№", "\u{303}"),
    (50, "−", "•"),
    (51, "«", "„"),
    (52, "»", "“"),
    (53, "…", "\u{301}"),
    // Grave and space
    (41, "~", "\u{300}"),
    (57, "\u{A0}", " "),
];

/// The built-in mapping table, in keyboard order.
pub fn default_mappings() -> Vec<MappingEntry> {
    DEFAULT_TABLE
        .iter()
        .map(|(code, normal, shift)| MappingEntry::new(*code, *normal, *shift))
        .collect()
}
