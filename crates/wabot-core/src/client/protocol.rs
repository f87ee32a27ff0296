//! Line protocol spoken with the bridge process.
//!
//! One JSON object per line in both directions. Commands carrying an `id`
//! are answered by an `ack` with the same id.

use serde::{Deserialize, Serialize};

use super::ClientEvent;

/// Commands written to the bridge's stdin.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum BridgeCommand<'a> {
    Init {
        session_dir: &'a str,
        headless: bool,
        browser_args: &'a [String],
    },
    SendMessage {
        id: u64,
        chat_id: &'a str,
        body: &'a str,
    },
    Destroy {
        id: u64,
    },
}

/// Lines read from the bridge's stdout.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum BridgeMessage {
    Qr {
        data: String,
    },
    Ready,
    Disconnected {
        reason: String,
    },
    AuthFailure {
        #[serde(default)]
        message: String,
    },
    ChangeState {
        state: String,
    },
    Error {
        message: String,
    },
    Ack {
        id: u64,
        ok: bool,
        #[serde(default)]
        error: Option<String>,
    },
}

/// What a parsed stdout line means for the client.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Inbound {
    Event(ClientEvent),
    Ack { id: u64, result: Result<(), String> },
}

/// Parse one stdout line. Returns `None` for blank or non-protocol lines.
pub(crate) fn parse_line(line: &str) -> Option<Inbound> {
    let trimmed = line.trim();
    if !trimmed.starts_with('{') {
        return None;
    }
    let message: BridgeMessage = serde_json::from_str(trimmed).ok()?;
    Some(match message {
        BridgeMessage::Qr { data } => Inbound::Event(ClientEvent::Qr { payload: data }),
        BridgeMessage::Ready => Inbound::Event(ClientEvent::Ready),
        BridgeMessage::Disconnected { reason } => {
            Inbound::Event(ClientEvent::Disconnected { reason })
        }
        BridgeMessage::AuthFailure { message } => {
            Inbound::Event(ClientEvent::AuthFailure { message })
        }
        BridgeMessage::ChangeState { state } => Inbound::Event(ClientEvent::ChangeState { state }),
        BridgeMessage::Error { message } => Inbound::Event(ClientEvent::Error { message }),
        BridgeMessage::Ack { id, ok, error } => Inbound::Ack {
            id,
            result: if ok {
                Ok(())
            } else {
                Err(error.unwrap_or_else(|| "rejected by bridge".to_string()))
            },
        },
    })
}

pub(crate) fn encode(command: &BridgeCommand<'_>) -> Result<String, serde_json::Error> {
    serde_json::to_string(command)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_lifecycle_events() {
        assert_eq!(
            parse_line(r#"{"type":"qr","data":"2@abc"}"#),
            Some(Inbound::Event(ClientEvent::Qr {
                payload: "2@abc".into()
            }))
        );
        assert_eq!(
            parse_line(r#"{"type":"ready"}"#),
            Some(Inbound::Event(ClientEvent::Ready))
        );
        assert_eq!(
            parse_line(r#"{"type":"disconnected","reason":"NAVIGATION"}"#),
            Some(Inbound::Event(ClientEvent::Disconnected {
                reason: "NAVIGATION".into()
            }))
        );
        assert_eq!(
            parse_line(r#"{"type":"auth_failure"}"#),
            Some(Inbound::Event(ClientEvent::AuthFailure {
                message: String::new()
            }))
        );
    }

    #[test]
    fn parses_acks() {
        assert_eq!(
            parse_line(r#"{"type":"ack","id":3,"ok":true}"#),
            Some(Inbound::Ack {
                id: 3,
                result: Ok(())
            })
        );
        assert_eq!(
            parse_line(r#"{"type":"ack","id":4,"ok":false,"error":"invalid wid"}"#),
            Some(Inbound::Ack {
                id: 4,
                result: Err("invalid wid".into())
            })
        );
        assert_eq!(
            parse_line(r#"{"type":"ack","id":5,"ok":false}"#),
            Some(Inbound::Ack {
                id: 5,
                result: Err("rejected by bridge".into())
            })
        );
    }

    #[test]
    fn ignores_noise() {
        assert_eq!(parse_line(""), None);
        assert_eq!(parse_line("Downloading Chromium r1095492"), None);
        assert_eq!(parse_line(r#"{"type":"unknown"}"#), None);
        assert_eq!(parse_line("{not json"), None);
    }

    #[test]
    fn encodes_commands() {
        let args = vec!["--no-sandbox".to_string()];
        let init = encode(&BridgeCommand::Init {
            session_dir: ".wwebjs_auth",
            headless: true,
            browser_args: &args,
        })
        .unwrap();
        assert_eq!(
            init,
            r#"{"type":"init","session_dir":".wwebjs_auth","headless":true,"browser_args":["--no-sandbox"]}"#
        );

        let send = encode(&BridgeCommand::SendMessage {
            id: 1,
            chat_id: "628@c.us",
            body: "hi",
        })
        .unwrap();
        assert_eq!(
            send,
            r#"{"type":"send_message","id":1,"chat_id":"628@c.us","body":"hi"}"#
        );

        assert_eq!(
            encode(&BridgeCommand::Destroy { id: 9 }).unwrap(),
            r#"{"type":"destroy","id":9}"#
        );
    }
}
