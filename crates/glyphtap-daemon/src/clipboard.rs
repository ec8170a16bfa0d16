//! System clipboard access for the paste injection path

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClipboardError {
    #[error("Clipboard unavailable: {0}")]
    Unavailable(String),

    #[error("Clipboard access failed: {0}")]
    Access(#[from] arboard::Error),
}

/// Clipboard with a change counter.
///
/// The counter increases by one for every change, ours or anybody else's, so a
/// caller can tell whether something else touched the clipboard in between.
pub trait Clipboard: Send {
    /// Current text (None if empty or not text) and change counter.
    fn read(&mut self) -> (Option<String>, u64);
    fn change_count(&mut self) -> u64;
    fn write(&mut self, text: &str) -> Result<(), ClipboardError>;
    fn clear(&mut self) -> Result<(), ClipboardError>;
}

/// [`Clipboard`] over `arboard`.
///
/// X11 and Wayland have no change counter, so one is kept here: it advances on
/// each of our own writes and whenever an observation differs from the last
/// one. Two foreign changes between observations count once.
pub struct ArboardClipboard {
    inner: Option<arboard::Clipboard>,
    change_count: u64,
    last_seen: Option<String>,
}

impl ArboardClipboard {
    pub fn new() -> Self {
        let mut clipboard = Self {
            inner: None,
            change_count: 0,
            last_seen: None,
        };
        clipboard.last_seen = clipboard.current_text();
        clipboard
    }

    /// Connect lazily; the display server may not be up yet when the daemon starts.
    fn handle(&mut self) -> Result<&mut arboard::Clipboard, ClipboardError> {
        if self.inner.is_none() {
            let clipboard = arboard::Clipboard::new()
                .map_err(|e| ClipboardError::Unavailable(e.to_string()))?;
            self.inner = Some(clipboard);
        }
        self.inner
            .as_mut()
            .ok_or_else(|| ClipboardError::Unavailable("not connected".to_string()))
    }

    fn current_text(&mut self) -> Option<String> {
        match self.handle() {
            Ok(clipboard) => match clipboard.get_text() {
                Ok(text) => Some(text),
                Err(arboard::Error::ContentNotAvailable) => None,
                Err(e) => {
                    tracing::debug!("Clipboard read failed: {}", e);
                    None
                }
            },
            Err(e) => {
                tracing::debug!("{}", e);
                None
            }
        }
    }

    fn observe(&mut self) -> Option<String> {
        let current = self.current_text();
        if current != self.last_seen {
            self.change_count += 1;
            self.last_seen = current.clone();
        }
        current
    }
}

impl Default for ArboardClipboard {
    fn default() -> Self {
        Self::new()
    }
}

impl Clipboard for ArboardClipboard {
    fn read(&mut self) -> (Option<String>, u64) {
        let text = self.observe();
        (text, self.change_count)
    }

    fn change_count(&mut self) -> u64 {
        self.observe();
        self.change_count
    }

    fn write(&mut self, text: &str) -> Result<(), ClipboardError> {
        self.handle()?.set_text(text)?;
        self.change_count += 1;
        self.last_seen = Some(text.to_string());
        Ok(())
    }

    fn clear(&mut self) -> Result<(), ClipboardError> {
        self.handle()?.clear()?;
        self.change_count += 1;
        self.last_seen = None;
        Ok(())
    }
}
