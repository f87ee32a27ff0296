//! Messaging client backed by an external bridge process.
//!
//! The WhatsApp Web protocol engine (a headless browser driven by a script)
//! runs as a child process. This module handles:
//! - Spawning it with the session directory and runtime options
//! - Turning its stdout lines into lifecycle events and command acks
//! - Writing commands to its stdin and awaiting their acks
//! - Reporting unexpected exits and reaping the process on destroy

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::oneshot;

use super::protocol::{encode, parse_line, BridgeCommand, Inbound};
use super::{ChatId, ClientError, ClientEvent, ClientFactory, EventSink, MessagingClient};
use crate::logging::{log_line, open_log_file, LogHandle};
use crate::storage::SessionStorage;

/// Browser flags passed when none are configured.
pub const DEFAULT_BROWSER_ARGS: [&str; 2] = ["--no-sandbox", "--disable-setuid-sandbox"];

/// Environment variable carrying the session directory to the bridge.
pub const SESSION_DIR_ENV: &str = "WABOT_SESSION_DIR";

const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
const EXIT_GRACE: Duration = Duration::from_secs(2);

type PendingAcks = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<(), String>>>>>;

/// Configuration for spawning the bridge process.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Program to run (e.g. `node`)
    pub program: String,
    /// Arguments (e.g. the bridge script path)
    pub args: Vec<String>,
    /// Working directory for the process
    pub working_dir: Option<PathBuf>,
    /// Run the browser without a window
    pub headless: bool,
    /// Extra browser flags
    pub browser_args: Vec<String>,
    /// Directory for the `bridge.log` transcript
    pub log_dir: Option<PathBuf>,
    /// How long to wait for a command ack
    pub command_timeout: Duration,
}

impl BridgeConfig {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            working_dir: None,
            headless: true,
            browser_args: DEFAULT_BROWSER_ARGS.iter().map(|s| s.to_string()).collect(),
            log_dir: None,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    pub fn browser_args(mut self, args: Vec<String>) -> Self {
        self.browser_args = args;
        self
    }

    pub fn log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }
}

/// Factory that spawns one bridge process per client.
pub struct BridgeFactory {
    config: BridgeConfig,
}

impl BridgeFactory {
    pub fn new(config: BridgeConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ClientFactory for BridgeFactory {
    async fn construct(
        &self,
        storage: &SessionStorage,
        events: EventSink,
    ) -> Result<Arc<dyn MessagingClient>, ClientError> {
        let client = BridgeClient::spawn(&self.config, storage, events).await?;
        Ok(Arc::new(client))
    }
}

/// A running bridge process.
pub struct BridgeClient {
    child: Arc<tokio::sync::Mutex<Option<Child>>>,
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    pending: PendingAcks,
    next_id: AtomicU64,
    /// Set once teardown starts so the exit is not reported as a fault.
    closing: Arc<AtomicBool>,
    command_timeout: Duration,
    transcript: LogHandle,
}

impl BridgeClient {
    /// Spawn the bridge and send it the `init` command.
    ///
    /// Background tasks forward stdout/stderr until the process goes away.
    pub async fn spawn(
        config: &BridgeConfig,
        storage: &SessionStorage,
        events: EventSink,
    ) -> Result<Self, ClientError> {
        let mut cmd = Command::new(&config.program);
        cmd.args(&config.args)
            .env(SESSION_DIR_ENV, storage.path())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &config.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| ClientError::Spawn(format!("{}: {}", config.program, e)))?;
        log::info!(
            "Spawned bridge {} (pid {:?}, generation {})",
            config.program,
            child.id(),
            events.generation()
        );

        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ClientError::Spawn("Failed to capture stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ClientError::Spawn("Failed to capture stderr".to_string()))?;

        let client = Self {
            child: Arc::new(tokio::sync::Mutex::new(Some(child))),
            stdin: tokio::sync::Mutex::new(stdin),
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            closing: Arc::new(AtomicBool::new(false)),
            command_timeout: config.command_timeout,
            transcript: open_log_file(config.log_dir.as_deref(), "bridge"),
        };

        let transcript = Arc::clone(&client.transcript);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                log::debug!("bridge stderr: {}", line);
                log_line(&transcript, "STDERR", &line);
            }
        });

        tokio::spawn(read_stdout(
            stdout,
            events,
            Arc::clone(&client.pending),
            Arc::clone(&client.child),
            Arc::clone(&client.closing),
            Arc::clone(&client.transcript),
        ));

        let session_dir = storage.path().to_string_lossy();
        client
            .write_command(&BridgeCommand::Init {
                session_dir: &session_dir,
                headless: config.headless,
                browser_args: &config.browser_args,
            })
            .await?;

        Ok(client)
    }

    async fn write_command(&self, command: &BridgeCommand<'_>) -> Result<(), ClientError> {
        let line = encode(command).map_err(|e| ClientError::Protocol(e.to_string()))?;
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(ClientError::Closed)?;
        stdin.write_all(line.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        log_line(&self.transcript, "STDIN", &line);
        Ok(())
    }

    /// Send a command that carries `id` and wait for its ack.
    async fn request<'a>(
        &self,
        what: &str,
        build: impl FnOnce(u64) -> BridgeCommand<'a>,
    ) -> Result<(), ClientError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(id, tx);

        if let Err(e) = self.write_command(&build(id)).await {
            self.pending.lock().unwrap().remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.command_timeout, rx).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(detail))) => Err(ClientError::Rejected(detail)),
            Ok(Err(_)) => Err(ClientError::Closed),
            Err(_) => {
                self.pending.lock().unwrap().remove(&id);
                Err(ClientError::Timeout(what.to_string()))
            }
        }
    }
}

#[async_trait]
impl MessagingClient for BridgeClient {
    async fn send_message(&self, chat_id: &ChatId, body: &str) -> Result<(), ClientError> {
        if self.closing.load(Ordering::SeqCst) {
            return Err(ClientError::Closed);
        }
        self.request("send_message ack", |id| BridgeCommand::SendMessage {
            id,
            chat_id: chat_id.as_str(),
            body,
        })
        .await
    }

    async fn destroy(&self) -> Result<(), ClientError> {
        if self.closing.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Err(e) = self
            .request("destroy ack", |id| BridgeCommand::Destroy { id })
            .await
        {
            log::warn!("Bridge did not acknowledge destroy: {}", e);
        }

        // Closing stdin lets a well-behaved bridge exit on its own.
        self.stdin.lock().await.take();

        let Some(mut child) = self.child.lock().await.take() else {
            return Ok(());
        };
        if let Ok(Ok(status)) = tokio::time::timeout(EXIT_GRACE, child.wait()).await {
            log::info!("Bridge exited after destroy: {}", status);
            return Ok(());
        }
        child.start_kill()?;
        let status = child.wait().await?;
        log::info!("Bridge killed: {}", status);
        Ok(())
    }
}

async fn read_stdout(
    stdout: tokio::process::ChildStdout,
    events: EventSink,
    pending: PendingAcks,
    child: Arc<tokio::sync::Mutex<Option<Child>>>,
    closing: Arc<AtomicBool>,
    transcript: LogHandle,
) {
    let mut lines = BufReader::new(stdout).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        log_line(&transcript, "STDOUT", &line);
        match parse_line(&line) {
            Some(Inbound::Event(event)) => {
                log::debug!("bridge event: {:?}", event);
                if !events.emit(event) {
                    log::debug!("Session manager stopped listening; dropping bridge events");
                }
            }
            Some(Inbound::Ack { id, result }) => {
                if let Some(tx) = pending.lock().unwrap().remove(&id) {
                    let _ = tx.send(result);
                } else {
                    log::debug!("Ack for unknown request {}", id);
                }
            }
            None => log::debug!("bridge stdout: {}", line),
        }
    }

    // Dropping the senders fails every in-flight request with `Closed`.
    pending.lock().unwrap().clear();

    if closing.load(Ordering::SeqCst) {
        return;
    }

    let message = {
        let mut guard = child.lock().await;
        match guard.as_mut() {
            Some(process) => match tokio::time::timeout(EXIT_GRACE, process.wait()).await {
                Ok(Ok(status)) => match status.code() {
                    Some(code) => format!("bridge process exited with code {}", code),
                    None => format!("bridge process exited: {}", status),
                },
                _ => "bridge process exited (stdout closed)".to_string(),
            },
            None => return,
        }
    };
    log::warn!("{}", message);
    events.emit(ClientEvent::Error { message });
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn script(body: &str) -> BridgeConfig {
        BridgeConfig::new("sh", vec!["-c".to_string(), body.to_string()])
            .command_timeout(Duration::from_millis(500))
    }

    async fn spawn(
        config: &BridgeConfig,
    ) -> (BridgeClient, mpsc::UnboundedReceiver<(u64, ClientEvent)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let storage = SessionStorage::new("/tmp/wabot-bridge-test");
        let client = BridgeClient::spawn(config, &storage, EventSink::new(1, tx))
            .await
            .unwrap();
        (client, rx)
    }

    #[test]
    fn config_builder() {
        let config = BridgeConfig::new("node", vec!["bridge.js".to_string()])
            .working_dir("/opt/wabot")
            .headless(false)
            .browser_args(vec![])
            .log_dir("/var/log/wabot")
            .command_timeout(Duration::from_secs(5));

        assert_eq!(config.program, "node");
        assert_eq!(config.args, vec!["bridge.js"]);
        assert_eq!(config.working_dir, Some(PathBuf::from("/opt/wabot")));
        assert!(!config.headless);
        assert!(config.browser_args.is_empty());
        assert_eq!(config.log_dir, Some(PathBuf::from("/var/log/wabot")));
        assert_eq!(config.command_timeout, Duration::from_secs(5));
    }

    #[test]
    fn default_browser_args() {
        let config = BridgeConfig::new("node", vec![]);
        assert!(config.headless);
        assert_eq!(
            config.browser_args,
            vec!["--no-sandbox", "--disable-setuid-sandbox"]
        );
    }

    #[tokio::test]
    async fn forwards_lifecycle_events() {
        let config = script(
            r#"read init; echo '{"type":"qr","data":"ABC123"}'; echo 'loading...'; echo '{"type":"ready"}'; sleep 5"#,
        );
        let (client, mut rx) = spawn(&config).await;

        assert_eq!(
            rx.recv().await.unwrap(),
            (
                1,
                ClientEvent::Qr {
                    payload: "ABC123".into()
                }
            )
        );
        assert_eq!(rx.recv().await.unwrap(), (1, ClientEvent::Ready));
        client.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn send_message_waits_for_ack() {
        let config = script(
            r#"read init; read cmd; echo '{"type":"ack","id":1,"ok":true}'; read cmd; echo '{"type":"ack","id":2,"ok":false,"error":"not registered"}'; sleep 5"#,
        );
        let (client, _rx) = spawn(&config).await;
        let chat = ChatId::normalize("628123").unwrap();

        client.send_message(&chat, "hi").await.unwrap();
        let err = client.send_message(&chat, "again").await.unwrap_err();
        assert_eq!(err, ClientError::Rejected("not registered".into()));
        client.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn send_message_times_out() {
        let config = script("read init; sleep 5");
        let (client, _rx) = spawn(&config).await;
        let chat = ChatId::normalize("628123").unwrap();

        let err = client.send_message(&chat, "hi").await.unwrap_err();
        assert!(matches!(err, ClientError::Timeout(_)));
        client.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn unexpected_exit_is_reported() {
        let config = script("read init; exit 3");
        let (_client, mut rx) = spawn(&config).await;

        let (_, event) = rx.recv().await.unwrap();
        assert_eq!(
            event,
            ClientEvent::Error {
                message: "bridge process exited with code 3".into()
            }
        );
    }

    #[tokio::test]
    async fn destroy_is_quiet_and_idempotent() {
        let config = script(r#"read init; read cmd; echo '{"type":"ack","id":1,"ok":true}'; exit 0"#);
        let (client, mut rx) = spawn(&config).await;

        client.destroy().await.unwrap();
        client.destroy().await.unwrap();

        let chat = ChatId::normalize("628123").unwrap();
        assert_eq!(
            client.send_message(&chat, "late").await.unwrap_err(),
            ClientError::Closed
        );
        // No fault is reported for an exit we asked for.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn missing_program_fails_to_spawn() {
        let config = BridgeConfig::new("/nonexistent/wabot-bridge", vec![]);
        let (tx, _rx) = mpsc::unbounded_channel();
        let storage = SessionStorage::new("/tmp/wabot-bridge-test");
        let result = BridgeClient::spawn(&config, &storage, EventSink::new(1, tx)).await;
        assert!(matches!(result, Err(ClientError::Spawn(_))));
    }
}
