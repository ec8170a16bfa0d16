//! Trigger and Shift tracking

use glyphtap_config::TriggerKey;

use crate::event::ModifierFlags;

/// Cached trigger/shift state.
///
/// Re-derived from every key-down's own flags; between key-downs only
/// flags-changed events update it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModifierState {
    pub trigger_held: bool,
    pub shift_held: bool,
}

impl ModifierState {
    /// Read trigger and shift from event flags.
    ///
    /// Only the configured side counts: the counterpart key never sets
    /// `trigger_held`.
    pub fn from_flags(flags: ModifierFlags, trigger: TriggerKey) -> Self {
        Self {
            trigger_held: flags.contains(ModifierFlags::for_trigger(trigger)),
            shift_held: flags.contains(ModifierFlags::SHIFT),
        }
    }

    /// Overwrite from event flags. Returns whether anything changed.
    pub fn update(&mut self, flags: ModifierFlags, trigger: TriggerKey) -> bool {
        let next = Self::from_flags(flags, trigger);
        let changed = next != *self;
        if next.trigger_held != self.trigger_held {
            tracing::debug!(
                "{} {}",
                trigger,
                if next.trigger_held { "held" } else { "released" }
            );
        }
        *self = next;
        changed
    }

    /// Forget everything held. Returns whether anything was set.
    pub fn clear(&mut self) -> bool {
        let changed = self.trigger_held || self.shift_held;
        *self = Self::default();
        changed
    }
}
