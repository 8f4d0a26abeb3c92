//! Message extraction and sending against the open conversation pane.
//!
//! Extraction tries a small ordered set of structural signatures per
//! element (the remote UI shifts its internal markup across versions)
//! and skips elements that fail to parse instead of failing the batch.
//! Sending follows a roll-forward-or-fail-cleanly contract: either the
//! submission is confirmed, or the compose box is cleared so a retry
//! starts from a known state.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use wabridge_browser::BrowserSession;
use wabridge_core::{Error, Message, PollPolicy, ReadStatus, Result};

use crate::chats::ChatHandle;
use crate::selectors::{
    as_js_array, CHAT_LIST_CONTAINERS, CHAT_ROW_SELECTORS, COMPOSE_SELECTORS,
    HEADER_TITLE_SELECTORS, MESSAGE_SELECTORS,
};

/// Click the chat row at `index` in the raw visual order.
const CLICK_ROW_FN: &str = r#"
(containerSels, rowSels, index) => {
    let container = null;
    for (const sel of containerSels) {
        const el = document.querySelector(sel);
        if (el) { container = el; break; }
    }
    let rows = [];
    for (const sel of rowSels) {
        const found = (container || document).querySelectorAll(sel);
        if (found.length > 0) { rows = Array.from(found); break; }
    }
    const row = rows[index];
    if (!row) return false;
    row.click();
    return true;
}
"#;

/// Extract the last `limit` message elements of the open pane, oldest
/// first. Per-element fields are best-effort; interpretation happens on
/// the Rust side.
const EXTRACT_MESSAGES_FN: &str = r#"
(msgSels, limit) => {
    let els = [];
    for (const sel of msgSels) {
        const found = document.querySelectorAll(sel);
        if (found.length > 0) { els = Array.from(found); break; }
    }
    if (limit > 0 && els.length > limit) els = els.slice(-limit);
    return els.map(el => {
        let text = null;
        for (const sel of ["span[data-testid='msg-text']", "span.selectable-text", "div[data-testid='msg-text']"]) {
            const t = el.querySelector(sel);
            if (t && t.innerText.trim()) { text = t.innerText.trim(); break; }
        }
        let timestamp = null;
        for (const sel of ["span[data-testid='msg-meta-time']", "span[data-testid='msg-time']"]) {
            const t = el.querySelector(sel);
            if (t && t.innerText.trim()) { timestamp = t.innerText.trim(); break; }
        }
        const cls = el.className || '';
        const outgoing = cls.includes('message-out') || cls.includes('outgoing')
            || !!el.querySelector("[data-testid='msg-out']");
        let sender = null;
        for (const sel of ["span[data-testid='msg-sender']", "[data-testid='sender']"]) {
            const s = el.querySelector(sel);
            if (s && s.innerText.trim()) { sender = s.innerText.trim(); break; }
        }
        let status = null;
        const icon = el.querySelector("[data-testid*='check'], [data-icon*='check']");
        if (icon) status = icon.getAttribute('data-testid') || icon.getAttribute('data-icon');
        let media = null;
        if (!text) {
            if (el.querySelector("img[src*='blob'], [data-testid='image-thumb']")) media = 'image';
            else if (el.querySelector("[data-testid='audio-play'], audio")) media = 'audio';
            else if (el.querySelector("[data-icon='document'], [data-testid='document-thumb']")) media = 'document';
            else if (el.querySelector("video, [data-testid='video-thumb']")) media = 'video';
        }
        const empty = !text && !media && !(el.innerText || '').trim();
        return empty ? null : { text, timestamp, outgoing, sender, status, media };
    });
}
"#;

/// Name shown in the open conversation's header, if any.
const ACTIVE_CHAT_FN: &str = r#"
(headerSels) => {
    for (const sel of headerSels) {
        for (const el of document.querySelectorAll(sel)) {
            const r = el.getBoundingClientRect();
            if (r.width === 0 || r.height === 0) continue;
            const title = el.getAttribute('title') || el.innerText;
            if (title && title.trim().length > 0) return title.trim();
        }
    }
    return null;
}
"#;

/// Visible compose box state: present or not, and its current text.
const COMPOSE_STATE_FN: &str = r#"
(composeSels) => {
    for (const sel of composeSels) {
        for (const el of document.querySelectorAll(sel)) {
            const editable = el.getAttribute('contenteditable') === 'true' || el.tagName === 'INPUT';
            if (!editable) continue;
            const r = el.getBoundingClientRect();
            if (r.width === 0 || r.height === 0) continue;
            return { found: true, text: (el.innerText || el.value || '').trim() };
        }
    }
    return { found: false, text: '' };
}
"#;

/// Click and focus the visible compose box.
const FOCUS_COMPOSE_FN: &str = r#"
(composeSels) => {
    for (const sel of composeSels) {
        for (const el of document.querySelectorAll(sel)) {
            const editable = el.getAttribute('contenteditable') === 'true' || el.tagName === 'INPUT';
            if (!editable) continue;
            const r = el.getBoundingClientRect();
            if (r.width === 0 || r.height === 0) continue;
            el.click();
            el.focus();
            return true;
        }
    }
    return false;
}
"#;

/// Empty the compose box so a failed send leaves no half-typed text.
const CLEAR_COMPOSE_FN: &str = r#"
(composeSels) => {
    for (const sel of composeSels) {
        for (const el of document.querySelectorAll(sel)) {
            const editable = el.getAttribute('contenteditable') === 'true' || el.tagName === 'INPUT';
            if (!editable) continue;
            if (el.tagName === 'INPUT') { el.value = ''; }
            else { el.textContent = ''; }
            el.dispatchEvent(new Event('input', { bubbles: true }));
            return true;
        }
    }
    return false;
}
"#;

/// One message element as reported by the page.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessage {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub outgoing: bool,
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub media: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ComposeState {
    found: bool,
    #[serde(default)]
    text: String,
}

static TIME_LIKE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{1,2}:\d{2})|([AP]M)|(\d{1,2}/\d{1,2})").expect("valid regex"));

/// Keep a raw on-screen timestamp only when it looks like one.
pub fn normalize_timestamp(raw: Option<&str>) -> Option<String> {
    let raw = raw?.trim();
    if raw.is_empty() || !TIME_LIKE.is_match(raw) {
        return None;
    }
    Some(raw.to_string())
}

/// Map a status-icon marker to a read status.
pub fn map_read_status(marker: Option<&str>) -> ReadStatus {
    match marker {
        Some(m) if m.contains("dblcheck-ack") || m.contains("check-blue") => ReadStatus::Read,
        Some(m) if m.contains("dblcheck") => ReadStatus::Delivered,
        Some(m) if m.contains("check") => ReadStatus::Sent,
        _ => ReadStatus::Unknown,
    }
}

/// Turn one raw element into a [`Message`]. Returns None for elements
/// with nothing extractable; callers skip those and flag the batch as
/// partial.
pub fn parse_message(raw: RawMessage) -> Option<Message> {
    let text = match (raw.text, raw.media.as_deref()) {
        (Some(text), _) if !text.trim().is_empty() => text.trim().to_string(),
        (_, Some(media)) => format!("[{}]", media),
        _ => return None,
    };
    let sender = if raw.outgoing {
        // Self-sent rows carry no sender label; outgoing is inferred from
        // alignment markers instead.
        String::new()
    } else {
        raw.sender.unwrap_or_default().trim().to_string()
    };
    Some(Message {
        sender,
        text,
        timestamp: normalize_timestamp(raw.timestamp.as_deref()),
        is_outgoing: raw.outgoing,
        read_status: map_read_status(raw.status.as_deref()),
    })
}

/// Reads and writes messages in the currently open conversation pane.
pub struct MessageReader {
    /// Wait for the conversation pane after opening a chat.
    pane_wait: PollPolicy,
    /// Wait for the compose affordance before a send.
    compose_wait: PollPolicy,
    /// Wait for the compose box to empty after submitting.
    confirm_wait: PollPolicy,
}

impl MessageReader {
    pub fn new(pane_wait: PollPolicy, compose_wait: PollPolicy, confirm_wait: PollPolicy) -> Self {
        Self {
            pane_wait,
            compose_wait,
            confirm_wait,
        }
    }

    /// Open a chat by clicking its cached row. Fails with `StaleHandle`
    /// when the handle predates the current document epoch.
    pub async fn open_chat(&self, session: &BrowserSession, handle: &ChatHandle) -> Result<()> {
        if handle.epoch != session.epoch() {
            return Err(Error::StaleHandle(format!(
                "chat '{}' was scanned under document epoch {} (now {})",
                handle.name,
                handle.epoch,
                session.epoch()
            )));
        }

        let js = format!(
            "({})({}, {}, {})",
            CLICK_ROW_FN,
            as_js_array(CHAT_LIST_CONTAINERS),
            as_js_array(CHAT_ROW_SELECTORS),
            handle.row_index,
        );
        let clicked = session.eval(&js).await?;
        if clicked != serde_json::Value::Bool(true) {
            return Err(Error::StaleHandle(format!(
                "row {} for chat '{}' no longer resolves",
                handle.row_index, handle.name
            )));
        }

        // The pane is open once either a compose box or message elements
        // render.
        for _ in 0..self.pane_wait.attempts.max(1) {
            if self.compose_state(session).await?.found
                || !self.raw_messages(session, 1).await?.is_empty()
            {
                debug!(chat = %handle.name, "Conversation pane open");
                return Ok(());
            }
            tokio::time::sleep(self.pane_wait.interval()).await;
        }
        Err(Error::Timeout(format!(
            "conversation pane for '{}' did not open",
            handle.name
        )))
    }

    /// Name of the conversation currently open, if any.
    pub async fn active_chat(&self, session: &BrowserSession) -> Result<Option<String>> {
        let js = format!(
            "({})({})",
            ACTIVE_CHAT_FN,
            as_js_array(HEADER_TITLE_SELECTORS)
        );
        let value = session.eval(&js).await?;
        Ok(value.as_str().map(|s| s.to_string()))
    }

    async fn raw_messages(&self, session: &BrowserSession, limit: usize) -> Result<Vec<RawMessage>> {
        let js = format!(
            "({})({}, {})",
            EXTRACT_MESSAGES_FN,
            as_js_array(MESSAGE_SELECTORS),
            limit,
        );
        let value = session.eval(&js).await?;
        let elements: Vec<Option<RawMessage>> = serde_json::from_value(value)
            .map_err(|e| Error::Structural(format!("message sweep returned bad shape: {}", e)))?;
        Ok(elements.into_iter().flatten().collect())
    }

    /// Read up to `limit` messages from the open pane, most recent last.
    /// Elements that fail extraction are skipped; the bool reports
    /// whether the batch is partial.
    pub async fn read_messages(
        &self,
        session: &BrowserSession,
        limit: usize,
    ) -> Result<(Vec<Message>, bool)> {
        let raw = self.raw_messages(session, limit).await?;
        let total = raw.len();
        let messages: Vec<Message> = raw.into_iter().filter_map(parse_message).collect();
        let skipped = total - messages.len();
        if skipped > 0 {
            warn!(skipped, "Some message elements could not be extracted");
        }
        Ok((messages, skipped > 0))
    }

    async fn compose_state(&self, session: &BrowserSession) -> Result<ComposeState> {
        let js = format!("({})({})", COMPOSE_STATE_FN, as_js_array(COMPOSE_SELECTORS));
        let value = session.eval(&js).await?;
        Ok(serde_json::from_value(value).unwrap_or_default())
    }

    /// Send `text` into the currently open conversation.
    ///
    /// Either submission is confirmed (compose box observed empty) or the
    /// compose box is cleared before the error returns, so a caller retry
    /// never double-types.
    pub async fn send_message(&self, session: &BrowserSession, text: &str) -> Result<()> {
        // A conversation must be the active pane before anything is
        // typed; bail out without touching the DOM otherwise.
        if self.active_chat(session).await?.is_none() {
            return Err(Error::NoActiveChat);
        }

        // 1. Compose affordance must appear within the wait budget.
        let mut found = false;
        for _ in 0..self.compose_wait.attempts.max(1) {
            if self.compose_state(session).await?.found {
                found = true;
                break;
            }
            tokio::time::sleep(self.compose_wait.interval()).await;
        }
        if !found {
            return Err(Error::SendTimeout(
                "compose box did not appear".to_string(),
            ));
        }

        // 2. Focus and type.
        let js = format!("({})({})", FOCUS_COMPOSE_FN, as_js_array(COMPOSE_SELECTORS));
        let focused = session.eval(&js).await?;
        if focused != serde_json::Value::Bool(true) {
            return Err(Error::SendTimeout(
                "compose box could not be focused".to_string(),
            ));
        }
        session.cdp.insert_text(text).await?;

        // 3. Submit.
        session.cdp.press_key("Enter", "Enter").await?;

        // 4. Confirm: the compose box empties once the UI accepts the
        // message.
        for _ in 0..self.confirm_wait.attempts.max(1) {
            let state = self.compose_state(session).await?;
            if state.found && state.text.is_empty() {
                debug!("Send confirmed, compose box empty");
                return Ok(());
            }
            tokio::time::sleep(self.confirm_wait.interval()).await;
        }

        // Roll back to a clean compose box so a retry starts fresh.
        let js = format!("({})({})", CLEAR_COMPOSE_FN, as_js_array(COMPOSE_SELECTORS));
        if let Err(e) = session.eval(&js).await {
            warn!(error = %e, "Could not clear compose box after failed send");
        }
        Err(Error::SendRejected(
            "message was not accepted by the UI".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(text: Option<&str>, outgoing: bool) -> RawMessage {
        RawMessage {
            text: text.map(|s| s.to_string()),
            outgoing,
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_plain_incoming() {
        let mut message = raw(Some("hello"), false);
        message.sender = Some("Alice".to_string());
        message.timestamp = Some("14:32".to_string());
        message.status = Some("msg-check".to_string());
        let parsed = parse_message(message).unwrap();
        assert_eq!(parsed.text, "hello");
        assert_eq!(parsed.sender, "Alice");
        assert!(!parsed.is_outgoing);
        assert_eq!(parsed.timestamp.as_deref(), Some("14:32"));
        assert_eq!(parsed.read_status, ReadStatus::Sent);
    }

    #[test]
    fn test_outgoing_has_no_sender() {
        let mut message = raw(Some("on my way"), true);
        message.sender = Some("ignored".to_string());
        let parsed = parse_message(message).unwrap();
        assert!(parsed.is_outgoing);
        assert!(parsed.sender.is_empty());
    }

    #[test]
    fn test_media_placeholder_when_no_text() {
        let mut message = raw(None, false);
        message.media = Some("image".to_string());
        let parsed = parse_message(message).unwrap();
        assert_eq!(parsed.text, "[image]");
    }

    #[test]
    fn test_empty_element_is_skipped() {
        assert!(parse_message(raw(None, false)).is_none());
        assert!(parse_message(raw(Some("   "), false)).is_none());
    }

    #[test]
    fn test_unparseable_timestamp_becomes_none() {
        let mut message = raw(Some("hi"), false);
        message.timestamp = Some("loading...".to_string());
        let parsed = parse_message(message).unwrap();
        assert!(parsed.timestamp.is_none());
    }

    #[test]
    fn test_normalize_timestamp_variants() {
        assert_eq!(normalize_timestamp(Some("14:32")).as_deref(), Some("14:32"));
        assert_eq!(
            normalize_timestamp(Some("Yesterday 9:05 PM")).as_deref(),
            Some("Yesterday 9:05 PM")
        );
        assert_eq!(
            normalize_timestamp(Some("12/06/25")).as_deref(),
            Some("12/06/25")
        );
        assert!(normalize_timestamp(Some("just now-ish")).is_none());
        assert!(normalize_timestamp(None).is_none());
    }

    #[test]
    fn test_read_status_markers() {
        assert_eq!(map_read_status(Some("msg-check")), ReadStatus::Sent);
        assert_eq!(map_read_status(Some("msg-dblcheck")), ReadStatus::Delivered);
        assert_eq!(map_read_status(Some("msg-dblcheck-ack")), ReadStatus::Read);
        assert_eq!(map_read_status(Some("something-else")), ReadStatus::Unknown);
        assert_eq!(map_read_status(None), ReadStatus::Unknown);
    }

    #[test]
    fn test_parse_batch_skips_failures() {
        let elements = vec![
            raw(Some("first"), false),
            raw(None, false),
            raw(Some("third"), true),
        ];
        let messages: Vec<Message> = elements.into_iter().filter_map(parse_message).collect();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].text, "first");
        assert_eq!(messages[1].text, "third");
    }
}
