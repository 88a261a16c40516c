use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::watch;

/// Operator-facing output. Logs never go through here.
pub trait Terminal: Send + Sync {
    /// Print one complete line.
    fn line(&self, text: &str);

    /// Print a prompt and leave the cursor after it.
    fn prompt(&self, text: &str);

    /// The operator answered the last prompt.
    fn prompt_answered(&self) {}
}

/// Stdout terminal. A line printed while a prompt is waiting starts on a
/// fresh row so it doesn't run into the prompt text.
#[derive(Default)]
pub struct StdoutTerminal {
    prompt_pending: AtomicBool,
}

impl StdoutTerminal {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Terminal for StdoutTerminal {
    fn line(&self, text: &str) {
        let mut out = io::stdout().lock();
        if self.prompt_pending.swap(false, Ordering::AcqRel) {
            let _ = writeln!(out);
        }
        let _ = writeln!(out, "{text}");
        let _ = out.flush();
    }

    fn prompt(&self, text: &str) {
        let mut out = io::stdout().lock();
        let _ = write!(out, "{text}");
        let _ = out.flush();
        self.prompt_pending.store(true, Ordering::Release);
    }

    fn prompt_answered(&self) {
        self.prompt_pending.store(false, Ordering::Release);
    }
}

/// In-memory terminal that records everything printed.
pub struct CaptureTerminal {
    lines: Mutex<Vec<String>>,
    prompts: Mutex<Vec<String>>,
    version: watch::Sender<usize>,
}

impl Default for CaptureTerminal {
    fn default() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            lines: Mutex::new(Vec::new()),
            prompts: Mutex::new(Vec::new()),
            version,
        }
    }
}

impl CaptureTerminal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines.lock().iter().any(|line| line.contains(needle))
    }

    pub fn count(&self, needle: &str) -> usize {
        self.lines
            .lock()
            .iter()
            .filter(|line| line.contains(needle))
            .count()
    }

    /// Wait until a printed line satisfies `matches` and return it.
    pub async fn wait_for_line(&self, matches: impl Fn(&str) -> bool) -> String {
        let mut changes = self.version.subscribe();
        loop {
            let found = self.lines.lock().iter().find(|line| matches(line)).cloned();
            if let Some(line) = found {
                return line;
            }
            if changes.changed().await.is_err() {
                return String::new();
            }
        }
    }

    /// Wait for the line printed right after the first line equal to
    /// `marker`.
    pub async fn wait_for_line_after(&self, marker: &str) -> String {
        let mut changes = self.version.subscribe();
        loop {
            let found = {
                let lines = self.lines.lock();
                lines
                    .iter()
                    .position(|line| line == marker)
                    .and_then(|index| lines.get(index + 1).cloned())
            };
            if let Some(next) = found {
                return next;
            }
            if changes.changed().await.is_err() {
                return String::new();
            }
        }
    }

    fn bump(&self) {
        self.version.send_modify(|version| *version += 1);
    }
}

impl Terminal for CaptureTerminal {
    fn line(&self, text: &str) {
        self.lines.lock().push(text.to_string());
        self.bump();
    }

    fn prompt(&self, text: &str) {
        self.prompts.lock().push(text.to_string());
        self.bump();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn wait_for_line_sees_later_output() {
        let terminal = Arc::new(CaptureTerminal::new());
        let writer = Arc::clone(&terminal);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            writer.line("=== header ===");
            writer.line("payload");
        });
        let next = tokio::time::timeout(
            Duration::from_secs(1),
            terminal.wait_for_line_after("=== header ==="),
        )
        .await
        .unwrap();
        assert_eq!(next, "payload");
    }

    #[test]
    fn prompts_are_kept_apart_from_lines() {
        let terminal = CaptureTerminal::new();
        terminal.prompt("You: ");
        terminal.line("Peer: hi");
        assert_eq!(terminal.prompts(), vec!["You: ".to_string()]);
        assert_eq!(terminal.lines(), vec!["Peer: hi".to_string()]);
        assert_eq!(terminal.count("Peer"), 1);
    }
}
