use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------
// Session record
// ---------------------------------------------------------------

/// Durable record of the last known authentication state.
///
/// Overwritten wholesale on every state transition, never field-merged;
/// read once at process start to decide whether a silent session restore
/// is worth attempting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    #[serde(default)]
    pub authenticated: bool,
    /// RFC3339; set iff `authenticated` is true.
    #[serde(default)]
    pub last_login: Option<String>,
    #[serde(default)]
    pub expired: Option<bool>,
    #[serde(default)]
    pub restore_error: Option<String>,
    #[serde(default)]
    pub restore_failed: Option<bool>,
    #[serde(default)]
    pub restored: bool,
}

impl SessionRecord {
    /// Record for a freshly confirmed authentication.
    pub fn authenticated_now(restored: bool) -> Self {
        Self {
            authenticated: true,
            last_login: Some(chrono::Utc::now().to_rfc3339()),
            expired: None,
            restore_error: None,
            restore_failed: None,
            restored,
        }
    }

    /// Record for a confirmed signed-out state.
    pub fn signed_out() -> Self {
        Self {
            authenticated: false,
            last_login: None,
            expired: Some(true),
            restore_error: None,
            restore_failed: None,
            restored: false,
        }
    }

    /// Record for a failed silent restore.
    pub fn restore_failed(reason: impl Into<String>) -> Self {
        Self {
            authenticated: false,
            last_login: None,
            expired: Some(true),
            restore_error: Some(reason.into()),
            restore_failed: Some(true),
            restored: false,
        }
    }

    /// Whether a silent restore should even be attempted.
    pub fn plausibly_authenticated(&self) -> bool {
        self.authenticated && self.restore_failed != Some(true)
    }
}

// ---------------------------------------------------------------
// Authentication state
// ---------------------------------------------------------------

/// Detector output. `Indeterminate` is treated as not-connected
/// everywhere (fail-closed); it differs from `Unauthenticated` only for
/// diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    Loading,
    Unauthenticated,
    Authenticated,
    Indeterminate,
}

impl AuthState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthState::Authenticated)
    }
}

/// Which evidence produced the state, for diagnostics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthDetails {
    pub element_count: u64,
    pub challenge_visible: bool,
    pub chat_list_matched: bool,
    pub strong_indicators_matched: bool,
}

// ---------------------------------------------------------------
// Chats
// ---------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatKind {
    Individual,
    Group,
    Unknown,
}

/// Caller-visible chat summary (no document handle).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatInfo {
    pub name: String,
    pub unread_count: u32,
    pub last_activity: Option<String>,
    pub kind: ChatKind,
    pub order: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadSummary {
    pub total_unread: u32,
    pub chats_with_unread: usize,
    pub unread_by_chat: Vec<(String, u32)>,
}

// ---------------------------------------------------------------
// Messages
// ---------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadStatus {
    Sent,
    Delivered,
    Read,
    Unknown,
}

/// One extracted message. Transient: produced per extraction call, never
/// persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Empty for self-sent messages; outgoing is inferred from markers.
    pub sender: String,
    pub text: String,
    /// Raw on-screen timestamp; None when no parseable timestamp exists.
    pub timestamp: Option<String>,
    pub is_outgoing: bool,
    pub read_status: ReadStatus,
}

// ---------------------------------------------------------------
// Orchestrator surface
// ---------------------------------------------------------------

/// Unified message-query parameters (`get-messages` boundary endpoint).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageQuery {
    pub limit: Option<usize>,
    pub unread: Option<bool>,
    pub chat: Option<String>,
    pub contact: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageBatch {
    pub chat_name: Option<String>,
    pub messages: Vec<Message>,
    pub count: usize,
    /// True when some elements were skipped during extraction.
    pub partial: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStartState {
    Authenticated,
    QrReady,
    Loading,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartOutcome {
    pub state: SessionStartState,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub authenticated: bool,
    pub state: AuthState,
    pub details: AuthDetails,
    pub session: SessionRecord,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrCode {
    /// `data:image/png;base64,...`
    pub data_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendReceipt {
    pub chat_name: String,
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authenticated_record_has_last_login() {
        let record = SessionRecord::authenticated_now(false);
        assert!(record.authenticated);
        assert!(record.last_login.is_some());
        assert!(record.plausibly_authenticated());
    }

    #[test]
    fn test_restore_failure_blocks_resume() {
        let record = SessionRecord::restore_failed("page never settled");
        assert!(!record.plausibly_authenticated());
        assert_eq!(record.restore_failed, Some(true));
        assert!(record.last_login.is_none());
    }

    #[test]
    fn test_empty_record_is_not_plausible() {
        assert!(!SessionRecord::default().plausibly_authenticated());
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let record = SessionRecord::signed_out();
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["authenticated"], false);
        assert!(json.get("lastLogin").is_some());
        assert!(json.get("restoreFailed").is_some());
    }
}
