//! Line protocol types.
//!
//! Requests are one JSON object per line, dispatched on `action`:
//!
//! ```json
//! {"action":"auth","appId":"portal"}
//! {"action":"callback","appId":"portal","sessionId":"...","queryString":"code=..."}
//! {"action":"check","appId":"portal","sessionId":"<token id>"}
//! {"action":"clear","appId":"portal","sessionId":"<token id>"}
//! {"action":"userInfo","appId":"portal","sessionId":"<token id>","select":["mail"]}
//! ```
//!
//! Replies are `{"type": ..., "value": ...}` with type one of `redirect`,
//! `complete`, `success`, `failure` or `error`.

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{EndpointError, Result};

/// Reply to any line that is not a JSON object.
pub const PROTOCOL_ERROR: &str = "Protocol error";

/// Reply to a missing or unknown action.
pub const NOT_UNDERSTOOD: &str = "Message is not understood";

/// Client requests.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Request {
    /// Start a login for an application.
    Auth { app_id: String },
    /// Complete a login with the provider's callback query string.
    Callback {
        app_id: String,
        session_id: String,
        query_string: String,
    },
    /// Verify (and refresh if needed) a user token.
    Check { app_id: String, session_id: String },
    /// Remove a user token and get the logout URL.
    Clear { app_id: String, session_id: String },
    /// Fetch the signed-in user's profile.
    UserInfo {
        app_id: String,
        session_id: String,
        #[serde(default, deserialize_with = "one_or_many")]
        select: Vec<String>,
    },
}

impl Request {
    pub fn action(&self) -> &'static str {
        match self {
            Request::Auth { .. } => "auth",
            Request::Callback { .. } => "callback",
            Request::Check { .. } => "check",
            Request::Clear { .. } => "clear",
            Request::UserInfo { .. } => "userInfo",
        }
    }
}

const ACTIONS: [&str; 5] = ["auth", "callback", "check", "clear", "userInfo"];

/// `select` may be a single string or a list of strings.
fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(field)) => vec![field],
        Some(OneOrMany::Many(fields)) => fields,
    })
}

/// Parse one protocol line.
///
/// Non-object lines are a protocol error; objects with a missing or unknown
/// action are not understood; known actions with bad fields are endpoint
/// errors naming the problem.
pub fn parse_request(line: &str) -> Result<Request> {
    let value: serde_json::Value = serde_json::from_str(line)
        .map_err(|_| EndpointError::Protocol(PROTOCOL_ERROR.to_string()))?;
    if !value.is_object() {
        return Err(EndpointError::Protocol(PROTOCOL_ERROR.to_string()));
    }

    let action = match value.get("action").and_then(|a| a.as_str()) {
        Some(action) if ACTIONS.contains(&action) => action.to_string(),
        _ => return Err(EndpointError::Endpoint(NOT_UNDERSTOOD.to_string())),
    };

    serde_json::from_value(value)
        .map_err(|e| EndpointError::Endpoint(format!("Invalid '{}' message: {}", action, e)))
}

/// Server replies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "value",
    rename_all = "lowercase",
    rename_all_fields = "camelCase"
)]
pub enum Reply {
    /// Send the browser to `uri`; `session_id` identifies the pending login.
    Redirect {
        session_id: String,
        timeout: i64,
        uri: String,
    },
    /// Login finished; `session_id` carries the new persistent token id.
    Complete { session_id: String },
    Success(serde_json::Value),
    Failure(String),
    Error(String),
}

impl Reply {
    pub fn error(message: impl Into<String>) -> Self {
        Reply::Error(message.into())
    }

    /// Serialize to a single line (without the terminator).
    pub fn to_line(&self) -> String {
        // Reply only holds strings, integers and JSON values.
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"type":"error","value":"Failed to encode reply"}"#.to_string()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_auth() {
        let request = parse_request(r#"{"action":"auth","appId":"portal"}"#).unwrap();
        assert_eq!(
            request,
            Request::Auth {
                app_id: "portal".to_string()
            }
        );
        assert_eq!(request.action(), "auth");
    }

    #[test]
    fn test_parse_callback() {
        let request = parse_request(
            r#"{"action":"callback","appId":"a","sessionId":"s","queryString":"code=1"}"#,
        )
        .unwrap();
        assert!(matches!(
            request,
            Request::Callback { ref query_string, .. } if query_string == "code=1"
        ));
    }

    #[test]
    fn test_parse_user_info_select_forms() {
        let one = parse_request(
            r#"{"action":"userInfo","appId":"a","sessionId":"s","select":"mail"}"#,
        )
        .unwrap();
        assert!(matches!(one, Request::UserInfo { ref select, .. } if select == &["mail"]));

        let many = parse_request(
            r#"{"action":"userInfo","appId":"a","sessionId":"s","select":["mail","id"]}"#,
        )
        .unwrap();
        assert!(matches!(many, Request::UserInfo { ref select, .. } if select.len() == 2));

        let none = parse_request(r#"{"action":"userInfo","appId":"a","sessionId":"s"}"#).unwrap();
        assert!(matches!(none, Request::UserInfo { ref select, .. } if select.is_empty()));

        let bad = parse_request(
            r#"{"action":"userInfo","appId":"a","sessionId":"s","select":5}"#,
        );
        assert!(matches!(bad, Err(EndpointError::Endpoint(_))));
    }

    #[test]
    fn test_protocol_errors() {
        for line in ["not json", "[1,2]", "\"auth\"", "{\"action\":"] {
            let err = parse_request(line).unwrap_err();
            assert!(matches!(err, EndpointError::Protocol(_)), "line: {}", line);
            assert_eq!(err.to_string(), PROTOCOL_ERROR);
        }
    }

    #[test]
    fn test_unknown_action() {
        for line in [r#"{"action":"dance"}"#, r#"{"appId":"a"}"#, r#"{"action":3}"#] {
            let err = parse_request(line).unwrap_err();
            assert_eq!(err.to_string(), NOT_UNDERSTOOD);
        }
    }

    #[test]
    fn test_missing_field() {
        let err = parse_request(r#"{"action":"check","appId":"a"}"#).unwrap_err();
        assert!(matches!(err, EndpointError::Endpoint(ref m) if m.contains("sessionId")));
    }

    #[test]
    fn test_reply_wire_format() {
        let redirect = Reply::Redirect {
            session_id: "s1".to_string(),
            timeout: 42,
            uri: "https://login".to_string(),
        };
        let value: serde_json::Value = serde_json::from_str(&redirect.to_line()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "type": "redirect",
                "value": {"sessionId": "s1", "timeout": 42, "uri": "https://login"}
            })
        );

        let complete: serde_json::Value = serde_json::from_str(
            &Reply::Complete {
                session_id: "tok".to_string(),
            }
            .to_line(),
        )
        .unwrap();
        assert_eq!(complete["value"]["sessionId"], "tok");

        let error: serde_json::Value =
            serde_json::from_str(&Reply::error("Protocol error").to_line()).unwrap();
        assert_eq!(
            error,
            serde_json::json!({"type": "error", "value": "Protocol error"})
        );
    }
}
