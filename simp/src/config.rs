//! Timing and retry parameters shared by both roles.

use std::time::Duration;

/// Words that end a chat instead of being sent.
pub const DEFAULT_EXIT_KEYWORDS: &[&str] = &["exit", "quit", "close", "bye"];

/// Adjustable session parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Upper bound on every blocking receive.
    pub timeout: Duration,
    /// Retransmissions allowed after the first send of a CHAT message.
    pub max_retries: u32,
    /// Total sends of SYN, SYN_ACK or FIN before the step is abandoned.
    pub handshake_attempts: u32,
    /// Input lines that trigger teardown.
    pub exit_keywords: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_retries: 1,
            handshake_attempts: 3,
            exit_keywords: DEFAULT_EXIT_KEYWORDS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl SessionConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Clamped to at least one attempt.
    pub fn with_handshake_attempts(mut self, attempts: u32) -> Self {
        self.handshake_attempts = attempts.max(1);
        self
    }

    /// `true` when `line` (ignoring surrounding whitespace) is an exit keyword.
    pub fn is_exit(&self, line: &str) -> bool {
        let line = line.trim();
        self.exit_keywords.iter().any(|k| k == line)
    }
}
