//! Pending-diacritic indicator

/// Shows which combining mark is waiting for a letter.
///
/// Calls must return immediately and must never take keyboard focus.
pub trait Indicator: Send {
    fn show(&mut self, label: &str);
    fn hide(&mut self);
}

/// Logs the pending mark and optionally runs a user command to display it.
///
/// The command gets the label appended as its last argument, e.g.
/// `notify-send -t 800 ◌́`. The child is reaped in the background.
#[derive(Debug, Default)]
pub struct CommandIndicator {
    command: Option<Vec<String>>,
    shown: Option<String>,
}

impl CommandIndicator {
    pub fn new(command: Option<Vec<String>>) -> Self {
        Self {
            command,
            shown: None,
        }
    }

    pub fn shown(&self) -> Option<&str> {
        self.shown.as_deref()
    }

    fn spawn_command(&self, label: &str) {
        let Some((program, args)) = self.command.as_ref().and_then(|argv| argv.split_first()) else {
            return;
        };

        let child = tokio::process::Command::new(program)
            .args(args)
            .arg(label)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .spawn();

        match child {
            Ok(mut child) => {
                tokio::spawn(async move {
                    if let Err(e) = child.wait().await {
                        tracing::debug!("Indicator command failed: {}", e);
                    }
                });
            }
            Err(e) => tracing::warn!("Failed to run indicator command '{}': {}", program, e),
        }
    }
}

/// Dotted circle so a lone combining mark has something to sit on.
fn display_label(mark: &str) -> String {
    format!("\u{25CC}{}", mark)
}

impl Indicator for CommandIndicator {
    fn show(&mut self, label: &str) {
        let label = display_label(label);
        tracing::info!("Waiting for a letter to combine with {}", label);
        self.spawn_command(&label);
        self.shown = Some(label);
    }

    fn hide(&mut self) {
        if let Some(label) = self.shown.take() {
            tracing::debug!("Indicator {} hidden", label);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_show_and_hide_without_command() {
        let mut indicator = CommandIndicator::new(None);
        indicator.show("\u{301}");
        assert_eq!(indicator.shown(), Some("\u{25CC}\u{301}"));
        indicator.hide();
        assert_eq!(indicator.shown(), None);
        indicator.hide();
    }

    #[tokio::test]
    async fn test_missing_command_does_not_fail() {
        let mut indicator =
            CommandIndicator::new(Some(vec!["/nonexistent/glyphtap-indicator".to_string()]));
        indicator.show("\u{308}");
        assert!(indicator.shown().is_some());
    }
}
