//! Event interception and dispatch
//!
//! [`Interceptor::handle`] is the single entry point for key events. It decides
//! pass-through vs. suppression synchronously and hands symbols to the
//! composer or the injector. Rules, first match wins:
//!
//! 1. injection guard held: pass through
//! 2. tap disabled: ask for re-enable, pass through
//! 3. flags changed: update modifier state, pass through
//! 4. key-up: suppress iff the trigger is held *per this event's flags* and
//!    the key is mapped; the live read is not cached
//! 5. key-down while disabled: pass through. Otherwise re-derive modifier
//!    state; without the trigger, a pending diacritic consumes the key if the
//!    layout resolves it, or is cancelled
//! 6. mapped autorepeat with the trigger held: suppress
//! 7. mapped symbol: start a diacritic, complete the pending one, or inject
//! 8. anything else: pass through

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use glyphtap_config::ipc::StatusReport;
use glyphtap_config::{keys, Config, TriggerKey};

use crate::clipboard::Clipboard;
use crate::composer::{is_combining_mark, DiacriticComposer};
use crate::event::{DeviceId, Disposition, EventKind, KeyEvent, TapDisabledReason};
use crate::indicator::Indicator;
use crate::injector::{KeystrokePoster, SymbolInjector};
use crate::mapping::MappingTable;
use crate::modifiers::ModifierState;
use crate::resolver::CharacterResolver;
use crate::scheduler::{Deferred, Scheduler, TimerToken};

/// Restarts event delivery after the interception source stopped.
pub trait TapControl: Send {
    fn reenable(&mut self, device: DeviceId, reason: TapDisabledReason);
}

/// User-facing on/off switch, read once per key-down.
#[derive(Debug, Clone)]
pub struct EnableSwitch(Arc<AtomicBool>);

impl EnableSwitch {
    pub fn new(enabled: bool) -> Self {
        Self(Arc::new(AtomicBool::new(enabled)))
    }

    pub fn is_enabled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Returns the previous value.
    pub fn set(&self, enabled: bool) -> bool {
        self.0.swap(enabled, Ordering::Relaxed)
    }

    /// Returns the new value.
    pub fn toggle(&self) -> bool {
        !self.0.fetch_xor(true, Ordering::Relaxed)
    }
}

/// Platform collaborators the interceptor drives.
pub struct Backends {
    pub scheduler: Box<dyn Scheduler>,
    pub resolver: Box<dyn CharacterResolver>,
    pub indicator: Box<dyn Indicator>,
    pub tap: Box<dyn TapControl>,
    pub poster: Box<dyn KeystrokePoster>,
    pub clipboard: Box<dyn Clipboard>,
}

pub struct Interceptor {
    trigger: TriggerKey,
    enabled: EnableSwitch,
    modifiers: ModifierState,
    mappings: Arc<MappingTable>,
    composer: DiacriticComposer,
    injector: SymbolInjector,
    resolver: Box<dyn CharacterResolver>,
    scheduler: Box<dyn Scheduler>,
    indicator: Box<dyn Indicator>,
    tap: Box<dyn TapControl>,
}

impl Interceptor {
    pub fn new(
        config: &Config,
        mappings: Arc<MappingTable>,
        enabled: EnableSwitch,
        backends: Backends,
    ) -> Self {
        let Backends {
            scheduler,
            resolver,
            indicator,
            tap,
            poster,
            clipboard,
        } = backends;

        Self {
            trigger: config.global.trigger,
            enabled,
            modifiers: ModifierState::default(),
            mappings,
            composer: DiacriticComposer::new(config.timing.diacritic_timeout()),
            injector: SymbolInjector::new(
                poster,
                clipboard,
                config.timing,
                config.global.paste_shortcut,
            ),
            resolver,
            scheduler,
            indicator,
            tap,
        }
    }

    /// Decide what happens to one intercepted event.
    pub fn handle(&mut self, event: &KeyEvent) -> Disposition {
        if self.injector.is_injecting() {
            return Disposition::PassThrough;
        }

        match event.kind {
            EventKind::TapDisabled(reason) => {
                tracing::warn!("Interception stopped ({:?}), re-enabling", reason);
                self.tap.reenable(event.device, reason);
                Disposition::PassThrough
            }
            EventKind::FlagsChanged => {
                self.modifiers.update(event.flags, self.trigger);
                Disposition::PassThrough
            }
            EventKind::KeyUp => {
                // Cached state can lag behind fast typing; trust this event only
                let live = ModifierState::from_flags(event.flags, self.trigger);
                if live.trigger_held && self.mappings.contains(event.keycode) {
                    Disposition::Suppress
                } else {
                    Disposition::PassThrough
                }
            }
            EventKind::KeyDown => self.handle_key_down(event),
        }
    }

    fn handle_key_down(&mut self, event: &KeyEvent) -> Disposition {
        if !self.enabled.is_enabled() {
            return Disposition::PassThrough;
        }

        self.modifiers.update(event.flags, self.trigger);
        if !self.modifiers.trigger_held {
            return self.complete_with_plain_key(event.keycode);
        }

        let mappings = Arc::clone(&self.mappings);
        let Some(symbol) = mappings.lookup(event.keycode, self.modifiers.shift_held) else {
            return Disposition::PassThrough;
        };

        if event.autorepeat {
            tracing::trace!("Autorepeat of {} suppressed", keys::display_key(event.keycode));
            return Disposition::Suppress;
        }

        if is_combining_mark(symbol) {
            self.composer
                .begin(symbol, self.scheduler.as_mut(), self.indicator.as_mut());
        } else if self.composer.is_active() {
            if let Some(text) =
                self.composer
                    .apply(symbol, self.scheduler.as_mut(), self.indicator.as_mut())
            {
                self.injector.inject(&text, self.scheduler.as_mut());
            }
        } else {
            tracing::debug!(
                "{} + {} -> {:?}",
                self.trigger,
                keys::display_key(event.keycode),
                symbol
            );
            self.injector.inject(symbol, self.scheduler.as_mut());
        }

        Disposition::Suppress
    }

    /// A key-down without the trigger. Only matters while a diacritic is pending.
    fn complete_with_plain_key(&mut self, keycode: u16) -> Disposition {
        if !self.composer.is_active() {
            return Disposition::PassThrough;
        }

        match self
            .resolver
            .resolve(keycode, self.modifiers.shift_held)
            .filter(|base| !base.is_empty())
        {
            Some(base) => {
                if let Some(text) =
                    self.composer
                        .apply(&base, self.scheduler.as_mut(), self.indicator.as_mut())
                {
                    self.injector.inject(&text, self.scheduler.as_mut());
                }
                Disposition::Suppress
            }
            None => {
                tracing::debug!(
                    "{} has no character in the current layout",
                    keys::display_key(keycode)
                );
                self.composer
                    .cancel(self.scheduler.as_mut(), self.indicator.as_mut());
                Disposition::PassThrough
            }
        }
    }

    /// Forget held modifiers and any pending diacritic. Returns whether anything
    /// was set.
    pub fn reset(&mut self) -> bool {
        let had_modifiers = self.modifiers.clear();
        let had_session = self
            .composer
            .cancel(self.scheduler.as_mut(), self.indicator.as_mut());

        let changed = had_modifiers || had_session;
        if changed {
            tracing::info!("State reset");
        }
        changed
    }

    pub fn replace_mappings(&mut self, mappings: Arc<MappingTable>) {
        tracing::info!("Mapping table replaced ({} entries)", mappings.len());
        self.mappings = mappings;
    }

    /// Run work a timer handed back to the loop, unless it was superseded.
    pub fn run_deferred(&mut self, token: TimerToken, work: Deferred) -> bool {
        if !self.scheduler.claim(token) {
            tracing::trace!("Dropping stale timer {:?}", token);
            return false;
        }

        match work {
            Deferred::DiacriticTimeout => {
                self.composer.expire(token, self.indicator.as_mut());
            }
            Deferred::ReleaseGuard => {
                self.injector.release_guard(token);
            }
            Deferred::VerifyClipboard(check) => {
                self.injector.verify_clipboard(check);
            }
        }
        true
    }

    pub fn mapping_count(&self) -> usize {
        self.mappings.len()
    }

    /// State for the control socket. Layout and devices are filled in by the caller.
    pub fn status(&self) -> StatusReport {
        StatusReport {
            enabled: self.enabled.is_enabled(),
            trigger: self.trigger.to_string(),
            trigger_held: self.modifiers.trigger_held,
            shift_held: self.modifiers.shift_held,
            pending_diacritic: self.composer.pending_mark().map(str::to_string),
            injecting: self.injector.is_injecting(),
            mappings: self.mappings.len(),
            ..Default::default()
        }
    }
}
