//! Command line and environment configuration.

use clap::{ArgAction, Parser};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use wabot_core::client::bridge::BridgeConfig;
use wabot_core::{RecoveryPolicy, SessionStorage};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("No auth token configured. Set WABOT_TOKEN or pass --insecure-no-auth")]
    MissingToken,

    #[error("Auth token must not be blank")]
    BlankToken,

    #[error("Bridge program must not be empty")]
    EmptyBridge,

    #[error("At least one reset reason is required")]
    NoResetReasons,
}

#[derive(Parser, Debug)]
#[command(name = "wabot")]
#[command(about = "HTTP gateway around a single WhatsApp Web session")]
#[command(version)]
pub struct Args {
    /// Increase verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Address to bind
    #[arg(long, env = "WABOT_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "WABOT_PORT", default_value_t = 3000)]
    pub port: u16,

    /// Bearer token required by every route except /status
    #[arg(long, env = "WABOT_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Serve without a token (local testing only)
    #[arg(long)]
    pub insecure_no_auth: bool,

    /// Directory holding the persisted login
    #[arg(long, env = "WABOT_SESSION_DIR", default_value = ".wwebjs_auth")]
    pub session_dir: PathBuf,

    /// Program that runs the messaging bridge
    #[arg(long, env = "WABOT_BRIDGE", default_value = "node")]
    pub bridge: String,

    /// Arguments for the bridge program, comma separated
    #[arg(
        long,
        env = "WABOT_BRIDGE_ARGS",
        value_delimiter = ',',
        allow_hyphen_values = true,
        default_value = "bridge/index.js"
    )]
    pub bridge_args: Vec<String>,

    /// Run the browser headless
    #[arg(long, env = "WABOT_HEADLESS", action = ArgAction::Set, default_value_t = true)]
    pub headless: bool,

    /// Write a bridge transcript (bridge.log) into this directory
    #[arg(long, env = "WABOT_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// Delay before restarting the client after a fault (ms)
    #[arg(long, env = "WABOT_REINIT_DELAY_MS", default_value_t = 6000)]
    pub reinit_delay_ms: u64,

    /// Delay before deleting a moved-aside session directory (ms)
    #[arg(long, env = "WABOT_PURGE_DELAY_MS", default_value_t = 5000)]
    pub purge_delay_ms: u64,

    /// Delay before restarting the client after /logout (ms)
    #[arg(long, env = "WABOT_LOGOUT_DELAY_MS", default_value_t = 5000)]
    pub logout_delay_ms: u64,

    /// Disconnect reasons that wipe the session, comma separated
    #[arg(
        long,
        env = "WABOT_RESET_REASONS",
        value_delimiter = ',',
        default_value = "NAVIGATION,LOGOUT"
    )]
    pub reset_reasons: Vec<String>,
}

/// Validated runtime settings.
#[derive(Debug)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub auth_token: Option<String>,
    pub storage: SessionStorage,
    pub policy: RecoveryPolicy,
    pub bridge: BridgeConfig,
}

impl Args {
    /// Log filter used when `RUST_LOG` is not set.
    pub fn default_log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }

    pub fn into_settings(self) -> Result<Settings, ConfigError> {
        let auth_token = match self.token {
            Some(token) if token.trim().is_empty() => return Err(ConfigError::BlankToken),
            Some(token) => Some(token),
            None if self.insecure_no_auth => None,
            None => return Err(ConfigError::MissingToken),
        };

        if self.bridge.trim().is_empty() {
            return Err(ConfigError::EmptyBridge);
        }

        let policy = RecoveryPolicy::default()
            .with_reset_reasons(&self.reset_reasons)
            .with_delays(
                Duration::from_millis(self.reinit_delay_ms),
                Duration::from_millis(self.purge_delay_ms),
                Duration::from_millis(self.logout_delay_ms),
            );
        if policy.reset_reasons().next().is_none() {
            return Err(ConfigError::NoResetReasons);
        }

        let bridge_args = self
            .bridge_args
            .into_iter()
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .collect();
        let mut bridge = BridgeConfig::new(self.bridge, bridge_args).headless(self.headless);
        if let Some(dir) = self.log_dir {
            bridge = bridge.log_dir(dir);
        }

        Ok(Settings {
            host: self.host,
            port: self.port,
            auth_token,
            storage: SessionStorage::new(self.session_dir),
            policy,
            bridge,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("wabot").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn defaults() {
        let settings = parse(&["--token", "abc"]).into_settings().unwrap();
        assert_eq!(settings.port, 3000);
        assert_eq!(settings.auth_token.as_deref(), Some("abc"));
        assert_eq!(settings.storage.path(), std::path::Path::new(".wwebjs_auth"));
        assert_eq!(settings.policy.reinit_delay, Duration::from_secs(6));
        assert_eq!(settings.policy.purge_delay, Duration::from_secs(5));
        assert_eq!(settings.policy.logout_reinit_delay, Duration::from_secs(5));
        assert!(settings.policy.requires_reset("NAVIGATION"));
        assert!(settings.policy.requires_reset("LOGOUT"));
        assert_eq!(settings.bridge.program, "node");
        assert_eq!(settings.bridge.args, vec!["bridge/index.js".to_string()]);
        assert!(settings.bridge.headless);
    }

    #[test]
    fn refuses_to_start_without_token() {
        assert_eq!(
            parse(&[]).into_settings().unwrap_err(),
            ConfigError::MissingToken
        );
        assert_eq!(
            parse(&["--token", "  "]).into_settings().unwrap_err(),
            ConfigError::BlankToken
        );
    }

    #[test]
    fn insecure_mode_disables_auth() {
        let settings = parse(&["--insecure-no-auth"]).into_settings().unwrap();
        assert!(settings.auth_token.is_none());
    }

    #[test]
    fn lists_are_comma_separated() {
        let settings = parse(&[
            "--token",
            "abc",
            "--reset-reasons",
            "logout,conflict",
            "--bridge-args",
            "bridge.js, extra",
            "--headless",
            "false",
        ])
        .into_settings()
        .unwrap();
        assert!(settings.policy.requires_reset("CONFLICT"));
        assert!(!settings.policy.requires_reset("NAVIGATION"));
        assert_eq!(settings.bridge.args, vec!["bridge.js", "extra"]);
        assert!(!settings.bridge.headless);
    }

    #[test]
    fn empty_reset_reasons_are_rejected() {
        assert_eq!(
            parse(&["--token", "abc", "--reset-reasons", " "])
                .into_settings()
                .unwrap_err(),
            ConfigError::NoResetReasons
        );
    }

    #[test]
    fn verbosity_sets_log_filter() {
        assert_eq!(parse(&[]).default_log_filter(), "info");
        assert_eq!(parse(&["-v"]).default_log_filter(), "debug");
        assert_eq!(parse(&["-vv"]).default_log_filter(), "trace");
    }
}
