//! Keycode → character translation through the active keyboard layout
//!
//! Only used while a diacritic is pending, to learn which letter the user typed.

use crate::keymap::LayoutHandle;

/// Translates a physical key into the character the layout would produce.
pub trait CharacterResolver: Send {
    /// `None` when there is no layout or the key yields no character.
    fn resolve(&self, keycode: u16, shift: bool) -> Option<String>;
}

/// Resolver over the xkb keymap behind a [`LayoutHandle`].
#[derive(Debug, Clone)]
pub struct KeymapResolver {
    layout: LayoutHandle,
}

impl KeymapResolver {
    pub fn new(layout: LayoutHandle) -> Self {
        Self { layout }
    }
}

impl CharacterResolver for KeymapResolver {
    fn resolve(&self, keycode: u16, shift: bool) -> Option<String> {
        self.layout
            .current()
            .symbol(keycode, shift)
            .map(String::from)
    }
}
