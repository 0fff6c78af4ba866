//! Client control frames and server event payloads.

use serde::Serialize;
use thiserror::Error;

pub const AUTH_COMMAND: &str = "AUTH";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    /// `AUTH <user_id>`
    Auth(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("empty frame")]
    Empty,
    #[error("AUTH takes exactly one user id")]
    AuthArity,
    #[error("unknown command {0:?}")]
    UnknownCommand(String),
    #[error("binary frames are not supported")]
    Binary,
}

pub fn parse_client_frame(text: &str) -> Result<ClientFrame, FrameError> {
    let mut parts = text.split_whitespace();
    let command = parts.next().ok_or(FrameError::Empty)?;
    if command != AUTH_COMMAND {
        return Err(FrameError::UnknownCommand(command.chars().take(32).collect()));
    }
    match (parts.next(), parts.next()) {
        (Some(user), None) => Ok(ClientFrame::Auth(user.to_string())),
        _ => Err(FrameError::AuthArity),
    }
}

/// Server-originated messages other than price broadcasts.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ServerEvent {
    ForceLiquidation {
        #[serde(rename = "positionId")]
        position_id: String,
    },
    Error {
        message: String,
    },
}

impl ServerEvent {
    pub fn to_json(&self) -> String {
        match serde_json::to_string(self) {
            Ok(json) => json,
            // Only string fields; serialization cannot fail.
            Err(_) => String::from(r#"{"event":"error","message":"internal"}"#),
        }
    }
}

impl From<&FrameError> for ServerEvent {
    fn from(err: &FrameError) -> Self {
        ServerEvent::Error {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_auth() {
        assert_eq!(parse_client_frame("AUTH u1"), Ok(ClientFrame::Auth("u1".to_string())));
        assert_eq!(parse_client_frame("  AUTH   u1 \n"), Ok(ClientFrame::Auth("u1".to_string())));
    }

    #[test]
    fn test_parse_violations() {
        assert_eq!(parse_client_frame(""), Err(FrameError::Empty));
        assert_eq!(parse_client_frame("AUTH"), Err(FrameError::AuthArity));
        assert_eq!(parse_client_frame("AUTH a b"), Err(FrameError::AuthArity));
        assert_eq!(
            parse_client_frame("auth u1"),
            Err(FrameError::UnknownCommand("auth".to_string()))
        );
        assert!(matches!(
            parse_client_frame("SUBSCRIBE prices"),
            Err(FrameError::UnknownCommand(_))
        ));
    }

    #[test]
    fn test_server_event_wire_shapes() {
        let liq = ServerEvent::ForceLiquidation {
            position_id: "p1".to_string(),
        };
        assert_eq!(liq.to_json(), r#"{"event":"force-liquidation","positionId":"p1"}"#);

        let err = ServerEvent::from(&FrameError::AuthArity);
        let value: serde_json::Value = serde_json::from_str(&err.to_json()).unwrap();
        assert_eq!(value["event"], "error");
        assert_eq!(value["message"], "AUTH takes exactly one user id");
    }
}
