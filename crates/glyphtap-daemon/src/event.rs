//! Key events as seen by the interceptor
//!
//! Raw evdev events are translated into [`KeyEvent`]s by the tap. Each event
//! carries the modifier flags that were physically held when it was read, so
//! decisions never depend on state cached from earlier events.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use glyphtap_config::keys::codes;
use glyphtap_config::TriggerKey;

/// evdev key value for a release
pub const KEY_RELEASE: i32 = 0;
/// evdev key value for a press
pub const KEY_PRESS: i32 = 1;
/// evdev key value for a kernel autorepeat
pub const KEY_REPEAT: i32 = 2;

/// Side-specific modifier flags.
///
/// Alt, Ctrl and Meta keep their side so the trigger can be told apart from its
/// counterpart. Shift is side-agnostic.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ModifierFlags(u8);

impl ModifierFlags {
    pub const EMPTY: Self = Self(0);
    pub const LEFT_ALT: Self = Self(1 << 0);
    pub const RIGHT_ALT: Self = Self(1 << 1);
    pub const LEFT_CTRL: Self = Self(1 << 2);
    pub const RIGHT_CTRL: Self = Self(1 << 3);
    pub const LEFT_META: Self = Self(1 << 4);
    pub const RIGHT_META: Self = Self(1 << 5);
    pub const SHIFT: Self = Self(1 << 6);

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    /// Flag for a modifier key code, `None` for everything else.
    pub fn for_key(code: u16) -> Option<Self> {
        match code {
            codes::KEY_LEFTALT => Some(Self::LEFT_ALT),
            codes::KEY_RIGHTALT => Some(Self::RIGHT_ALT),
            codes::KEY_LEFTCTRL => Some(Self::LEFT_CTRL),
            codes::KEY_RIGHTCTRL => Some(Self::RIGHT_CTRL),
            codes::KEY_LEFTMETA => Some(Self::LEFT_META),
            codes::KEY_RIGHTMETA => Some(Self::RIGHT_META),
            codes::KEY_LEFTSHIFT | codes::KEY_RIGHTSHIFT => Some(Self::SHIFT),
            _ => None,
        }
    }

    pub fn for_trigger(trigger: TriggerKey) -> Self {
        Self::for_key(trigger.keycode()).unwrap_or(Self::EMPTY)
    }

    /// Fold a set of held key codes into flags, ignoring non-modifiers.
    pub fn from_held<I>(held: I) -> Self
    where
        I: IntoIterator<Item = u16>,
    {
        held.into_iter()
            .filter_map(Self::for_key)
            .fold(Self::EMPTY, |acc, flag| acc | flag)
    }
}

impl BitOr for ModifierFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for ModifierFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for ModifierFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(ModifierFlags, &str); 7] = [
            (ModifierFlags::LEFT_ALT, "LeftAlt"),
            (ModifierFlags::RIGHT_ALT, "RightAlt"),
            (ModifierFlags::LEFT_CTRL, "LeftCtrl"),
            (ModifierFlags::RIGHT_CTRL, "RightCtrl"),
            (ModifierFlags::LEFT_META, "LeftMeta"),
            (ModifierFlags::RIGHT_META, "RightMeta"),
            (ModifierFlags::SHIFT, "Shift"),
        ];

        let held: Vec<&str> = NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        if held.is_empty() {
            write!(f, "ModifierFlags(empty)")
        } else {
            write!(f, "ModifierFlags({})", held.join("+"))
        }
    }
}

/// Why the interception source stopped delivering events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapDisabledReason {
    /// The kernel dropped events (`SYN_DROPPED`); our key state may be stale
    Overflow,
    /// The device stopped responding or was unplugged
    DeviceLost,
}

/// Identifies the grabbed keyboard an event came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    KeyDown,
    KeyUp,
    /// A modifier key was pressed or released
    FlagsChanged,
    TapDisabled(TapDisabledReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub kind: EventKind,
    pub keycode: u16,
    /// Modifiers held as of this event
    pub flags: ModifierFlags,
    /// Set on kernel autorepeat key-downs
    pub autorepeat: bool,
    pub device: DeviceId,
}

impl KeyEvent {
    pub fn key_down(keycode: u16, flags: ModifierFlags) -> Self {
        Self {
            kind: EventKind::KeyDown,
            keycode,
            flags,
            autorepeat: false,
            device: DeviceId::default(),
        }
    }

    pub fn key_repeat(keycode: u16, flags: ModifierFlags) -> Self {
        Self {
            autorepeat: true,
            ..Self::key_down(keycode, flags)
        }
    }

    pub fn key_up(keycode: u16, flags: ModifierFlags) -> Self {
        Self {
            kind: EventKind::KeyUp,
            ..Self::key_down(keycode, flags)
        }
    }

    pub fn flags_changed(keycode: u16, flags: ModifierFlags) -> Self {
        Self {
            kind: EventKind::FlagsChanged,
            ..Self::key_down(keycode, flags)
        }
    }

    pub fn tap_disabled(reason: TapDisabledReason, device: DeviceId) -> Self {
        Self {
            kind: EventKind::TapDisabled(reason),
            keycode: 0,
            flags: ModifierFlags::EMPTY,
            autorepeat: false,
            device,
        }
    }

    pub fn with_device(mut self, device: DeviceId) -> Self {
        self.device = device;
        self
    }
}

/// What happens to an intercepted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Deliver the event unchanged
    PassThrough,
    /// Drop the event
    Suppress,
}
