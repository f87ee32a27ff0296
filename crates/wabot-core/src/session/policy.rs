//! Recovery policy: which faults wipe the session and how long to wait.
//!
//! The delays are settling windows for asynchronous OS-level teardown
//! (browser processes releasing file locks). They are a heuristic, not a
//! guarantee that the storage is free when the timer fires.

use std::collections::BTreeSet;
use std::time::Duration;

use regex::Regex;
use thiserror::Error;

/// Disconnect reasons that require a full session wipe by default.
pub const DEFAULT_RESET_REASONS: [&str; 2] = ["NAVIGATION", "LOGOUT"];

/// Error messages treated as a stale execution context by default.
pub const DEFAULT_TRANSIENT_SIGNATURES: [&str; 2] =
    ["Execution context was destroyed", "bridge process exited"];

#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("Invalid transient error pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

#[derive(Debug, Clone)]
pub struct RecoveryPolicy {
    /// Upper-cased disconnect reasons that trigger a reset.
    reset_reasons: BTreeSet<String>,
    transient_signatures: Vec<Regex>,
    /// Wait before reinitialising after a fault.
    pub reinit_delay: Duration,
    /// Wait before purging a quarantined session directory.
    pub purge_delay: Duration,
    /// Wait before reinitialising after an explicit logout.
    pub logout_reinit_delay: Duration,
}

impl RecoveryPolicy {
    pub fn new<R, S>(reset_reasons: R, transient_patterns: S) -> Result<Self, PolicyError>
    where
        R: IntoIterator,
        R::Item: AsRef<str>,
        S: IntoIterator,
        S::Item: AsRef<str>,
    {
        let transient_signatures = transient_patterns
            .into_iter()
            .map(|p| {
                Regex::new(p.as_ref()).map_err(|source| PolicyError::InvalidPattern {
                    pattern: p.as_ref().to_string(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let policy = Self {
            reset_reasons: BTreeSet::new(),
            transient_signatures,
            reinit_delay: Duration::from_secs(6),
            purge_delay: Duration::from_secs(5),
            logout_reinit_delay: Duration::from_secs(5),
        };
        Ok(policy.with_reset_reasons(reset_reasons))
    }

    pub fn with_delays(mut self, reinit: Duration, purge: Duration, logout_reinit: Duration) -> Self {
        self.reinit_delay = reinit;
        self.purge_delay = purge;
        self.logout_reinit_delay = logout_reinit;
        self
    }

    /// Replace the disconnect reasons that trigger a reset.
    pub fn with_reset_reasons<R>(mut self, reasons: R) -> Self
    where
        R: IntoIterator,
        R::Item: AsRef<str>,
    {
        self.reset_reasons = reasons
            .into_iter()
            .map(|r| r.as_ref().trim().to_ascii_uppercase())
            .filter(|r| !r.is_empty())
            .collect();
        self
    }

    /// Whether a disconnect with this reason needs a full reset.
    pub fn requires_reset(&self, reason: &str) -> bool {
        self.reset_reasons
            .contains(&reason.trim().to_ascii_uppercase())
    }

    /// Whether an error message matches a known transient fault.
    pub fn is_transient(&self, message: &str) -> bool {
        self.transient_signatures.iter().any(|re| re.is_match(message))
    }

    pub fn reset_reasons(&self) -> impl Iterator<Item = &str> {
        self.reset_reasons.iter().map(String::as_str)
    }
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_RESET_REASONS,
            DEFAULT_TRANSIENT_SIGNATURES.map(regex::escape),
        )
        .expect("default transient signatures are valid patterns")
    }
}
