//! Spoken confirmation of new attendance records.

use std::process::Command;

/// Announces a message to the person in front of the camera.
///
/// Announcements are best-effort: implementations log failures and never
/// report them to the caller.
pub trait Notifier {
    fn announce(&mut self, text: &str);
}

/// Speaks through an external synthesis program (`espeak-ng` by default),
/// blocking until playback finishes.
pub struct SpeechNotifier {
    program: String,
    rate: u32,
}

impl SpeechNotifier {
    pub fn new(program: impl Into<String>, rate: u32) -> Self {
        Self {
            program: program.into(),
            rate,
        }
    }

    fn command(&self, text: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-s").arg(self.rate.to_string()).arg(text);
        cmd
    }
}

impl Notifier for SpeechNotifier {
    fn announce(&mut self, text: &str) {
        tracing::info!(text, "announcing");
        match self.command(text).status() {
            Ok(status) if status.success() => {}
            Ok(status) => {
                tracing::warn!(program = %self.program, %status, "speech program failed")
            }
            Err(e) => {
                tracing::warn!(program = %self.program, error = %e, "cannot run speech program")
            }
        }
    }
}

/// Log-only notifier, used when speech is disabled.
pub struct SilentNotifier;

impl Notifier for SilentNotifier {
    fn announce(&mut self, text: &str) {
        tracing::info!(text, "announcement (speech disabled)");
    }
}
