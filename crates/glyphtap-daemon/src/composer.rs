//! Diacritic composition
//!
//! A mapping whose symbol starts with a combining mark does not type anything.
//! It opens a session that waits for the next letter, then injects letter +
//! mark composed to NFC.
//!
//! ```text
//!            begin(mark)                 apply(base) / cancel / timeout
//!   Idle ──────────────────► Awaiting ───────────────────────────────► Idle
//!                              │  ▲
//!                              └──┘ begin(other mark): old session dropped
//! ```

use std::time::Duration;

use unicode_normalization::UnicodeNormalization;

use crate::indicator::Indicator;
use crate::scheduler::{Deferred, Scheduler, TimerToken};

/// Whether a mapped symbol is a combining diacritic (first scalar in U+0300..=U+036F).
pub fn is_combining_mark(symbol: &str) -> bool {
    symbol
        .chars()
        .next()
        .is_some_and(|c| ('\u{300}'..='\u{36F}').contains(&c))
}

/// The pending mark and its timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiacriticSession {
    pub mark: String,
    pub timer: TimerToken,
}

#[derive(Debug)]
pub struct DiacriticComposer {
    session: Option<DiacriticSession>,
    timeout: Duration,
}

impl DiacriticComposer {
    pub fn new(timeout: Duration) -> Self {
        Self {
            session: None,
            timeout,
        }
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    pub fn pending_mark(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.mark.as_str())
    }

    /// Start waiting for a letter. Any live session is torn down first, without
    /// injecting.
    pub fn begin(
        &mut self,
        mark: &str,
        scheduler: &mut dyn Scheduler,
        indicator: &mut dyn Indicator,
    ) {
        if let Some(old) = self.session.take() {
            tracing::debug!("Replacing pending diacritic {:?}", old.mark);
            scheduler.cancel(old.timer);
            indicator.hide();
        }

        indicator.show(mark);
        let timer = scheduler.schedule(self.timeout, Deferred::DiacriticTimeout);
        self.session = Some(DiacriticSession {
            mark: mark.to_string(),
            timer,
        });
        tracing::debug!("Diacritic {:?} pending", mark);
    }

    /// Combine `base` with the pending mark and end the session.
    ///
    /// Returns the NFC-composed text to inject, or `None` without a session.
    pub fn apply(
        &mut self,
        base: &str,
        scheduler: &mut dyn Scheduler,
        indicator: &mut dyn Indicator,
    ) -> Option<String> {
        let session = self.session.take()?;
        scheduler.cancel(session.timer);
        indicator.hide();

        let composed: String = format!("{}{}", base, session.mark).nfc().collect();
        tracing::debug!("{:?} + {:?} composed to {:?}", base, session.mark, composed);
        Some(composed)
    }

    /// Drop the session without injecting. Returns whether one was active.
    pub fn cancel(&mut self, scheduler: &mut dyn Scheduler, indicator: &mut dyn Indicator) -> bool {
        match self.session.take() {
            Some(session) => {
                scheduler.cancel(session.timer);
                indicator.hide();
                tracing::debug!("Diacritic {:?} cancelled", session.mark);
                true
            }
            None => false,
        }
    }

    /// The timeout fired. Ignored unless `token` belongs to the live session.
    pub fn expire(&mut self, token: TimerToken, indicator: &mut dyn Indicator) -> bool {
        match &self.session {
            Some(session) if session.timer == token => {
                tracing::debug!("Diacritic {:?} timed out", session.mark);
                self.session = None;
                indicator.hide();
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ManualScheduler, RecordingIndicator};

    fn composer() -> DiacriticComposer {
        DiacriticComposer::new(Duration::from_millis(5000))
    }

    #[test]
    fn test_is_combining_mark() {
        assert!(is_combining_mark("\u{301}"));
        assert!(is_combining_mark("\u{300}"));
        assert!(is_combining_mark("\u{36F}x"));
        assert!(!is_combining_mark("\u{370}"));
        assert!(!is_combining_mark("e\u{301}"));
        assert!(!is_combining_mark(""));
    }

    #[test]
    fn test_apply_composes_nfc() {
        let mut scheduler = ManualScheduler::default();
        let mut indicator = RecordingIndicator::default();
        let mut composer = composer();

        composer.begin("\u{301}", &mut scheduler, &mut indicator);
        assert_eq!(composer.pending_mark(), Some("\u{301}"));

        let composed = composer.apply("e", &mut scheduler, &mut indicator);
        assert_eq!(composed.as_deref(), Some("\u{e9}"));
        assert!(!composer.is_active());
        assert!(!indicator.visible());
        assert_eq!(scheduler.live_count(), 0);
    }

    #[test]
    fn test_apply_without_precomposed_form_keeps_sequence() {
        let mut scheduler = ManualScheduler::default();
        let mut indicator = RecordingIndicator::default();
        let mut composer = composer();

        composer.begin("\u{301}", &mut scheduler, &mut indicator);
        let composed = composer.apply("q", &mut scheduler, &mut indicator);
        assert_eq!(composed.as_deref(), Some("q\u{301}"));
    }

    #[test]
    fn test_apply_without_session() {
        let mut scheduler = ManualScheduler::default();
        let mut indicator = RecordingIndicator::default();
        assert_eq!(composer().apply("e", &mut scheduler, &mut indicator), None);
    }

    #[test]
    fn test_begin_replaces_session() {
        let mut scheduler = ManualScheduler::default();
        let mut indicator = RecordingIndicator::default();
        let mut composer = composer();

        composer.begin("\u{301}", &mut scheduler, &mut indicator);
        let first = scheduler.last_token().unwrap();
        composer.begin("\u{308}", &mut scheduler, &mut indicator);

        assert!(scheduler.is_cancelled(first));
        assert_eq!(scheduler.live_count(), 1);
        assert_eq!(composer.pending_mark(), Some("\u{308}"));
        assert_eq!(indicator.shows(), vec!["\u{301}", "\u{308}"]);
        assert_eq!(indicator.hides(), 1);
        assert!(indicator.visible());

        // The stale timer no longer ends the new session
        assert!(!composer.expire(first, &mut indicator));
        assert!(composer.is_active());
    }

    #[test]
    fn test_expire_with_live_token() {
        let mut scheduler = ManualScheduler::default();
        let mut indicator = RecordingIndicator::default();
        let mut composer = composer();

        composer.begin("\u{30C}", &mut scheduler, &mut indicator);
        let token = scheduler.last_token().unwrap();
        assert_eq!(scheduler.delay_of(token), Some(Duration::from_millis(5000)));

        assert!(composer.expire(token, &mut indicator));
        assert!(!composer.is_active());
        assert!(!indicator.visible());
    }

    #[test]
    fn test_cancel() {
        let mut scheduler = ManualScheduler::default();
        let mut indicator = RecordingIndicator::default();
        let mut composer = composer();

        assert!(!composer.cancel(&mut scheduler, &mut indicator));
        composer.begin("\u{303}", &mut scheduler, &mut indicator);
        assert!(composer.cancel(&mut scheduler, &mut indicator));
        assert!(!composer.is_active());
        assert_eq!(scheduler.live_count(), 0);
        assert!(!indicator.visible());
    }
}
