//! In-memory collaborators for driving the interceptor in tests

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::clipboard::{Clipboard, ClipboardError};
use crate::event::{DeviceId, TapDisabledReason};
use crate::indicator::Indicator;
use crate::injector::{ClipboardCheck, KeyStep, KeystrokePoster};
use crate::interceptor::TapControl;
use crate::keymap::KeyTable;
use crate::scheduler::{Deferred, Scheduler, TimerToken};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// Keyboard layouts
// ============================================================================

/// A key table for the rows of a layout, each row given as its first evdev
/// code and the unshifted and shifted characters of consecutive keys.
pub fn layout_table(description: &str, rows: &[(u16, &str, &str)]) -> KeyTable {
    let mut symbols = Vec::new();
    for (first, base, shifted) in rows {
        for (shift, chars) in [(false, base), (true, shifted)] {
            for (offset, c) in (0u16..).zip(chars.chars()) {
                symbols.push((first + offset, shift, c.to_string()));
            }
        }
    }
    KeyTable::from_symbols(description, symbols)
}

/// US QWERTY without the punctuation beyond the letter rows.
pub fn qwerty_table() -> KeyTable {
    layout_table(
        "us",
        &[
            (2, "1234567890-=", "!@#$%^&*()_+"),
            (16, "qwertyuiop[]", "QWERTYUIOP{}"),
            (30, "asdfghjkl;'`", "ASDFGHJKL:\"~"),
            (43, "\\zxcvbnm,./", "|ZXCVBNM<>?"),
            (57, " ", " "),
        ],
    )
}

// ============================================================================
// Scheduler with a manual clock
// ============================================================================

#[derive(Debug)]
struct Timer {
    due: Duration,
    delay: Duration,
    work: Deferred,
    fired: bool,
}

#[derive(Debug, Default)]
struct ClockState {
    now: Duration,
    next_token: u64,
    timers: BTreeMap<u64, Timer>,
    cancelled: HashSet<TimerToken>,
}

/// Scheduler whose time only moves when a test advances it.
#[derive(Debug, Clone, Default)]
pub struct ManualScheduler(Arc<Mutex<ClockState>>);

impl ManualScheduler {
    /// Advance the clock and return the work that came due, in due order.
    ///
    /// Returned tokens stay live until claimed, like a fired tokio timer whose
    /// message is still in the loop's channel.
    pub fn take_due(&self, advance: Duration) -> Vec<(TimerToken, Deferred)> {
        let mut state = lock(&self.0);
        state.now += advance;
        let now = state.now;

        let mut due: Vec<(Duration, TimerToken, Deferred)> = state
            .timers
            .iter_mut()
            .filter(|(_, timer)| !timer.fired && timer.due <= now)
            .map(|(token, timer)| {
                timer.fired = true;
                (timer.due, TimerToken(*token), timer.work.clone())
            })
            .collect();
        due.sort_by_key(|(at, token, _)| (*at, token.0));
        due.into_iter().map(|(_, token, work)| (token, work)).collect()
    }

    /// Remove and return the pending clipboard verification, ignoring time.
    pub fn take_clipboard_check(&self) -> Option<ClipboardCheck> {
        let mut state = lock(&self.0);
        let token = state.timers.iter().find_map(|(token, timer)| {
            matches!(timer.work, Deferred::VerifyClipboard(_)).then_some(*token)
        })?;
        match state.timers.remove(&token)?.work {
            Deferred::VerifyClipboard(check) => Some(check),
            _ => None,
        }
    }

    pub fn live_count(&self) -> usize {
        lock(&self.0).timers.len()
    }

    pub fn last_token(&self) -> Option<TimerToken> {
        let state = lock(&self.0);
        (state.next_token > 0).then_some(TimerToken(state.next_token))
    }

    pub fn is_cancelled(&self, token: TimerToken) -> bool {
        lock(&self.0).cancelled.contains(&token)
    }

    pub fn delay_of(&self, token: TimerToken) -> Option<Duration> {
        lock(&self.0).timers.get(&token.0).map(|timer| timer.delay)
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&mut self, delay: Duration, work: Deferred) -> TimerToken {
        let mut state = lock(&self.0);
        state.next_token += 1;
        let token = state.next_token;
        let due = state.now + delay;
        state.timers.insert(
            token,
            Timer {
                due,
                delay,
                work,
                fired: false,
            },
        );
        TimerToken(token)
    }

    fn cancel(&mut self, token: TimerToken) {
        let mut state = lock(&self.0);
        if state.timers.remove(&token.0).is_some() {
            state.cancelled.insert(token);
        }
    }

    fn claim(&mut self, token: TimerToken) -> bool {
        lock(&self.0).timers.remove(&token.0).is_some()
    }
}

// ============================================================================
// Keystroke poster
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct RecordingPoster(Arc<Mutex<Vec<Vec<KeyStep>>>>);

impl RecordingPoster {
    pub fn scripts(&self) -> Vec<Vec<KeyStep>> {
        lock(&self.0).clone()
    }

    /// Text of every direct injection, in order.
    pub fn typed(&self) -> Vec<String> {
        lock(&self.0)
            .iter()
            .flatten()
            .filter_map(|step| match step {
                KeyStep::Unicode { text, down: true } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn paste_count(&self) -> usize {
        lock(&self.0)
            .iter()
            .filter(|script| matches!(script.first(), Some(KeyStep::Key { down: true, .. })))
            .count()
    }
}

impl KeystrokePoster for RecordingPoster {
    fn post(&mut self, script: Vec<KeyStep>) {
        lock(&self.0).push(script);
    }
}

// ============================================================================
// Clipboard
// ============================================================================

#[derive(Debug, Default)]
struct ClipboardState {
    content: Option<String>,
    change_count: u64,
    writes: usize,
    clears: usize,
    fail_writes: bool,
}

#[derive(Debug, Clone, Default)]
pub struct FakeClipboard(Arc<Mutex<ClipboardState>>);

impl FakeClipboard {
    pub fn with_content(content: &str) -> Self {
        let clipboard = Self::default();
        lock(&clipboard.0).content = Some(content.to_string());
        clipboard
    }

    pub fn content(&self) -> Option<String> {
        lock(&self.0).content.clone()
    }

    /// Another application copies something.
    pub fn simulate_external_write(&self, content: &str) {
        let mut state = lock(&self.0);
        state.content = Some(content.to_string());
        state.change_count += 1;
    }

    pub fn fail_writes(&self) {
        lock(&self.0).fail_writes = true;
    }

    pub fn writes(&self) -> usize {
        lock(&self.0).writes
    }

    pub fn clears(&self) -> usize {
        lock(&self.0).clears
    }
}

impl Clipboard for FakeClipboard {
    fn read(&mut self) -> (Option<String>, u64) {
        let state = lock(&self.0);
        (state.content.clone(), state.change_count)
    }

    fn change_count(&mut self) -> u64 {
        lock(&self.0).change_count
    }

    fn write(&mut self, text: &str) -> Result<(), ClipboardError> {
        let mut state = lock(&self.0);
        if state.fail_writes {
            return Err(ClipboardError::Unavailable("test clipboard".to_string()));
        }
        state.content = Some(text.to_string());
        state.change_count += 1;
        state.writes += 1;
        Ok(())
    }

    fn clear(&mut self) -> Result<(), ClipboardError> {
        let mut state = lock(&self.0);
        state.content = None;
        state.change_count += 1;
        state.clears += 1;
        Ok(())
    }
}

// ============================================================================
// Indicator
// ============================================================================

#[derive(Debug, Default)]
struct IndicatorLog {
    shows: Vec<String>,
    hides: usize,
    visible: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RecordingIndicator(Arc<Mutex<IndicatorLog>>);

impl RecordingIndicator {
    pub fn shows(&self) -> Vec<String> {
        lock(&self.0).shows.clone()
    }

    pub fn hides(&self) -> usize {
        lock(&self.0).hides
    }

    pub fn visible(&self) -> bool {
        lock(&self.0).visible
    }
}

impl Indicator for RecordingIndicator {
    fn show(&mut self, label: &str) {
        let mut log = lock(&self.0);
        log.shows.push(label.to_string());
        log.visible = true;
    }

    fn hide(&mut self) {
        let mut log = lock(&self.0);
        log.hides += 1;
        log.visible = false;
    }
}

// ============================================================================
// Tap control
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct RecordingTap(Arc<Mutex<Vec<(DeviceId, TapDisabledReason)>>>);

impl RecordingTap {
    pub fn reenables(&self) -> Vec<(DeviceId, TapDisabledReason)> {
        lock(&self.0).clone()
    }
}

impl TapControl for RecordingTap {
    fn reenable(&mut self, device: DeviceId, reason: TapDisabledReason) {
        lock(&self.0).push((device, reason));
    }
}
