//! Symbol injection
//!
//! Text reaches the focused application one of two ways:
//!
//! - **direct**: a Unicode key-down/key-up pair handed to the keystroke poster
//! - **clipboard**: the text is put on the clipboard, the paste shortcut is
//!   synthesized, and the previous clipboard content is restored afterwards if
//!   nobody else changed it in the meantime
//!
//! Whitespace-only strings go through the clipboard because several toolkits
//! swallow synthesized whitespace. Every injection is bracketed by the
//! [`InjectionGuard`] so our own synthetic events are never intercepted again.

use std::time::Duration;

use glyphtap_config::{PasteShortcut, Timing};

use crate::clipboard::Clipboard;
use crate::event::ModifierFlags;
use crate::scheduler::{Deferred, Scheduler, TimerToken};

/// One step of a synthetic keystroke script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyStep {
    /// Key event carrying a Unicode payload instead of a physical key
    Unicode { text: String, down: bool },
    /// Physical key event; `flags` is the modifier state the event is sent with
    Key {
        code: u16,
        down: bool,
        flags: ModifierFlags,
    },
    Pause(Duration),
}

/// Delivers synthetic keystrokes. Must not block the caller.
pub trait KeystrokePoster: Send {
    fn post(&mut self, script: Vec<KeyStep>);
}

/// Clipboard state captured before a paste.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipboardSnapshot {
    pub prior_content: Option<String>,
    pub prior_change_count: u64,
}

/// What the deferred clipboard verification needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipboardCheck {
    pub snapshot: ClipboardSnapshot,
    pub written: String,
}

/// Reentrancy guard: set while our own events are in flight.
#[derive(Debug, Default)]
pub struct InjectionGuard {
    active: bool,
    release: Option<TimerToken>,
}

impl InjectionGuard {
    pub fn is_active(&self) -> bool {
        self.active
    }

    fn engage(&mut self, scheduler: &mut dyn Scheduler) {
        if let Some(stale) = self.release.take() {
            scheduler.cancel(stale);
        }
        self.active = true;
        tracing::trace!("Injection guard engaged");
    }

    fn schedule_release(&mut self, scheduler: &mut dyn Scheduler, after: Duration) {
        self.release = Some(scheduler.schedule(after, Deferred::ReleaseGuard));
    }

    fn release(&mut self, token: TimerToken) -> bool {
        if self.release != Some(token) {
            return false;
        }
        self.release = None;
        self.active = false;
        tracing::trace!("Injection guard released");
        true
    }
}

/// Which path an injection took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectionPath {
    /// Empty string, nothing posted
    Skipped,
    Direct,
    Clipboard,
}

/// How a string should be delivered.
pub fn choose_path(text: &str) -> InjectionPath {
    if text.is_empty() {
        InjectionPath::Skipped
    } else if text.trim().is_empty() {
        InjectionPath::Clipboard
    } else {
        InjectionPath::Direct
    }
}

pub struct SymbolInjector {
    poster: Box<dyn KeystrokePoster>,
    clipboard: Box<dyn Clipboard>,
    guard: InjectionGuard,
    timing: Timing,
    paste: PasteShortcut,
}

impl SymbolInjector {
    pub fn new(
        poster: Box<dyn KeystrokePoster>,
        clipboard: Box<dyn Clipboard>,
        timing: Timing,
        paste: PasteShortcut,
    ) -> Self {
        Self {
            poster,
            clipboard,
            guard: InjectionGuard::default(),
            timing,
            paste,
        }
    }

    pub fn is_injecting(&self) -> bool {
        self.guard.is_active()
    }

    /// Deliver `text` to the focused application.
    pub fn inject(&mut self, text: &str, scheduler: &mut dyn Scheduler) -> InjectionPath {
        let path = choose_path(text);
        if path == InjectionPath::Skipped {
            return path;
        }

        self.guard.engage(scheduler);
        match path {
            InjectionPath::Direct => self.inject_direct(text),
            InjectionPath::Clipboard => self.inject_via_clipboard(text, scheduler),
            InjectionPath::Skipped => {}
        }
        self.guard
            .schedule_release(scheduler, self.timing.guard_release());

        path
    }

    fn inject_direct(&mut self, text: &str) {
        tracing::debug!("Typing {:?}", text);
        self.poster.post(vec![
            KeyStep::Unicode {
                text: text.to_string(),
                down: true,
            },
            KeyStep::Pause(self.timing.keystroke_gap()),
            KeyStep::Unicode {
                text: text.to_string(),
                down: false,
            },
        ]);
    }

    fn inject_via_clipboard(&mut self, text: &str, scheduler: &mut dyn Scheduler) {
        let (prior_content, prior_change_count) = self.clipboard.read();
        let snapshot = ClipboardSnapshot {
            prior_content,
            prior_change_count,
        };

        if let Err(e) = self.clipboard.write(text) {
            tracing::warn!("Failed to put {:?} on the clipboard: {}", text, e);
            return;
        }

        tracing::debug!("Pasting {:?}", text);
        self.poster.post(self.paste_script());

        scheduler.schedule(
            self.timing.clipboard_settle(),
            Deferred::VerifyClipboard(ClipboardCheck {
                snapshot,
                written: text.to_string(),
            }),
        );
    }

    /// modifier down, key down, gap, key up, 1 ms, modifier up
    fn paste_script(&self) -> Vec<KeyStep> {
        let held = ModifierFlags::for_key(self.paste.modifier).unwrap_or(ModifierFlags::EMPTY);
        vec![
            KeyStep::Key {
                code: self.paste.modifier,
                down: true,
                flags: held,
            },
            KeyStep::Key {
                code: self.paste.key,
                down: true,
                flags: held,
            },
            KeyStep::Pause(self.timing.paste_gap()),
            KeyStep::Key {
                code: self.paste.key,
                down: false,
                flags: held,
            },
            KeyStep::Pause(self.timing.keystroke_gap()),
            KeyStep::Key {
                code: self.paste.modifier,
                down: false,
                flags: ModifierFlags::EMPTY,
            },
        ]
    }

    /// Deferred guard release. Stale tokens are ignored.
    pub fn release_guard(&mut self, token: TimerToken) -> bool {
        self.guard.release(token)
    }

    /// Put the pre-paste clipboard back if nothing else touched it.
    ///
    /// Restores only when the counter advanced by exactly our one write and the
    /// content is still what we wrote. Returns whether a restore happened.
    pub fn verify_clipboard(&mut self, check: ClipboardCheck) -> bool {
        let (current, count) = self.clipboard.read();
        let expected = check.snapshot.prior_change_count + 1;

        if count != expected || current.as_deref() != Some(check.written.as_str()) {
            tracing::debug!(
                "Clipboard changed since paste (count {} vs {}), not restoring",
                count,
                expected
            );
            return false;
        }

        let restored = match &check.snapshot.prior_content {
            Some(prior) => self.clipboard.write(prior),
            None => self.clipboard.clear(),
        };
        match restored {
            Ok(()) => {
                tracing::debug!("Clipboard restored");
                true
            }
            Err(e) => {
                tracing::warn!("Failed to restore clipboard: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeClipboard, ManualScheduler, RecordingPoster};
    use glyphtap_config::keys::codes;

    fn injector() -> (SymbolInjector, RecordingPoster, FakeClipboard) {
        let poster = RecordingPoster::default();
        let clipboard = FakeClipboard::with_content("prior");
        let injector = SymbolInjector::new(
            Box::new(poster.clone()),
            Box::new(clipboard.clone()),
            Timing::default(),
            PasteShortcut::default(),
        );
        (injector, poster, clipboard)
    }

    #[test]
    fn test_choose_path() {
        assert_eq!(choose_path(""), InjectionPath::Skipped);
        assert_eq!(choose_path(" "), InjectionPath::Clipboard);
        assert_eq!(choose_path("\u{a0}"), InjectionPath::Clipboard);
        assert_eq!(choose_path("\t\n"), InjectionPath::Clipboard);
        assert_eq!(choose_path("…"), InjectionPath::Direct);
        assert_eq!(choose_path(" x "), InjectionPath::Direct);
    }

    #[test]
    fn test_empty_string_is_noop() {
        let (mut injector, poster, clipboard) = injector();
        let mut scheduler = ManualScheduler::default();

        assert_eq!(injector.inject("", &mut scheduler), InjectionPath::Skipped);
        assert!(!injector.is_injecting());
        assert!(poster.scripts().is_empty());
        assert_eq!(scheduler.live_count(), 0);
        assert_eq!(clipboard.writes(), 0);
    }

    #[test]
    fn test_direct_script() {
        let (mut injector, poster, clipboard) = injector();
        let mut scheduler = ManualScheduler::default();

        assert_eq!(injector.inject("…", &mut scheduler), InjectionPath::Direct);
        assert_eq!(
            poster.scripts(),
            vec![vec![
                KeyStep::Unicode {
                    text: "…".to_string(),
                    down: true
                },
                KeyStep::Pause(Duration::from_millis(1)),
                KeyStep::Unicode {
                    text: "…".to_string(),
                    down: false
                },
            ]]
        );
        assert_eq!(clipboard.writes(), 0);
    }

    #[test]
    fn test_guard_window() {
        let (mut injector, _poster, _clipboard) = injector();
        let mut scheduler = ManualScheduler::default();

        injector.inject("→", &mut scheduler);
        assert!(injector.is_injecting());

        let (token, work) = scheduler.take_due(Duration::from_millis(50)).remove(0);
        assert_eq!(work, Deferred::ReleaseGuard);
        assert!(injector.release_guard(token));
        assert!(!injector.is_injecting());
    }

    #[test]
    fn test_back_to_back_injections_extend_guard() {
        let (mut injector, _poster, _clipboard) = injector();
        let mut scheduler = ManualScheduler::default();

        injector.inject("a\u{301}", &mut scheduler);
        let first = scheduler.last_token().unwrap();
        injector.inject("→", &mut scheduler);

        assert!(scheduler.is_cancelled(first));
        assert!(!injector.release_guard(first));
        assert!(injector.is_injecting());
    }

    #[test]
    fn test_paste_script_and_snapshot() {
        let (mut injector, poster, clipboard) = injector();
        let mut scheduler = ManualScheduler::default();

        assert_eq!(injector.inject("\u{a0}", &mut scheduler), InjectionPath::Clipboard);
        assert_eq!(clipboard.content().as_deref(), Some("\u{a0}"));

        let ctrl = ModifierFlags::LEFT_CTRL;
        assert_eq!(
            poster.scripts(),
            vec![vec![
                KeyStep::Key {
                    code: codes::KEY_LEFTCTRL,
                    down: true,
                    flags: ctrl
                },
                KeyStep::Key {
                    code: codes::KEY_V,
                    down: true,
                    flags: ctrl
                },
                KeyStep::Pause(Duration::from_millis(10)),
                KeyStep::Key {
                    code: codes::KEY_V,
                    down: false,
                    flags: ctrl
                },
                KeyStep::Pause(Duration::from_millis(1)),
                KeyStep::Key {
                    code: codes::KEY_LEFTCTRL,
                    down: false,
                    flags: ModifierFlags::EMPTY
                },
            ]]
        );

        let due = scheduler.take_due(Duration::from_millis(100));
        let check = due
            .into_iter()
            .find_map(|(_, work)| match work {
                Deferred::VerifyClipboard(check) => Some(check),
                _ => None,
            })
            .unwrap();
        assert_eq!(check.snapshot.prior_content.as_deref(), Some("prior"));
        assert_eq!(check.written, "\u{a0}");
    }

    #[test]
    fn test_restore_when_untouched() {
        let (mut injector, _poster, clipboard) = injector();
        let mut scheduler = ManualScheduler::default();

        injector.inject(" ", &mut scheduler);
        let check = scheduler.take_clipboard_check().unwrap();

        assert!(injector.verify_clipboard(check));
        assert_eq!(clipboard.content().as_deref(), Some("prior"));
    }

    #[test]
    fn test_no_restore_after_foreign_change() {
        let (mut injector, _poster, clipboard) = injector();
        let mut scheduler = ManualScheduler::default();

        injector.inject(" ", &mut scheduler);
        clipboard.simulate_external_write("copied by user");
        let check = scheduler.take_clipboard_check().unwrap();

        assert!(!injector.verify_clipboard(check));
        assert_eq!(clipboard.content().as_deref(), Some("copied by user"));
    }

    #[test]
    fn test_no_restore_when_someone_copied_the_same_text() {
        let (mut injector, _poster, clipboard) = injector();
        let mut scheduler = ManualScheduler::default();

        injector.inject(" ", &mut scheduler);
        // Content still matches, but the counter moved twice
        clipboard.simulate_external_write(" ");
        let check = scheduler.take_clipboard_check().unwrap();

        assert!(!injector.verify_clipboard(check));
        assert_eq!(clipboard.content().as_deref(), Some(" "));
        assert_eq!(clipboard.writes(), 1);
        assert_eq!(clipboard.clears(), 0);
    }

    #[test]
    fn test_no_restore_when_content_differs() {
        let (mut injector, _poster, clipboard) = injector();
        let mut scheduler = ManualScheduler::default();

        injector.inject(" ", &mut scheduler);
        let mut check = scheduler.take_clipboard_check().unwrap();
        // Same count, different content than what the check expects
        check.written = "something else".to_string();

        assert!(!injector.verify_clipboard(check));
        assert_eq!(clipboard.content().as_deref(), Some(" "));
    }

    #[test]
    fn test_restore_absent_prior_clears() {
        let poster = RecordingPoster::default();
        let clipboard = FakeClipboard::default();
        let mut injector = SymbolInjector::new(
            Box::new(poster),
            Box::new(clipboard.clone()),
            Timing::default(),
            PasteShortcut::default(),
        );
        let mut scheduler = ManualScheduler::default();

        injector.inject(" ", &mut scheduler);
        let check = scheduler.take_clipboard_check().unwrap();
        assert_eq!(check.snapshot.prior_content, None);

        assert!(injector.verify_clipboard(check));
        assert_eq!(clipboard.content(), None);
        assert_eq!(clipboard.clears(), 1);
    }

    #[test]
    fn test_clipboard_write_failure_posts_nothing() {
        let poster = RecordingPoster::default();
        let clipboard = FakeClipboard::default();
        clipboard.fail_writes();
        let mut injector = SymbolInjector::new(
            Box::new(poster.clone()),
            Box::new(clipboard),
            Timing::default(),
            PasteShortcut::default(),
        );
        let mut scheduler = ManualScheduler::default();

        assert_eq!(injector.inject(" ", &mut scheduler), InjectionPath::Clipboard);
        assert!(poster.scripts().is_empty());
        assert!(scheduler.take_clipboard_check().is_none());
        // The guard still opens and closes normally
        assert!(injector.is_injecting());
    }
}
