//! CSS selector signatures for the remote UI.
//!
//! The messaging client renders with shifting internal structure across
//! versions, so every lookup carries an ordered list of candidate
//! selectors, tried in priority order with first match winning. These
//! lists are the single accepted point of brittleness in the system:
//! when the remote markup changes, this file is what gets updated.

/// Login challenge (QR) candidates. A match still has to pass the
/// visibility and size checks in the probe script.
pub const CHALLENGE_SELECTORS: &[&str] = &[
    "canvas[aria-label='Scan me!']",
    "canvas[aria-label*='Scan']",
    "canvas[aria-label*='scan']",
    "[data-testid='qr-code']",
    "canvas[role='img']",
    "canvas",
];

/// Chat-list container candidates, outermost first.
pub const CHAT_LIST_CONTAINERS: &[&str] = &[
    "div[data-testid='chat-list']",
    "div[data-testid='side']",
    "div[role='application']",
];

/// One sidebar chat row.
pub const CHAT_ROW_SELECTORS: &[&str] = &[
    "div[data-testid='cell-frame-container']",
    "div[data-testid='chat-list'] div[role='listitem']",
    "div[data-testid='chat-list'] > div",
];

/// Unread-count badge inside a chat row.
pub const UNREAD_BADGE_SELECTORS: &[&str] = &[
    "[data-testid='unread-count']",
    "span[data-testid='unread-count']",
    "[aria-label*='unread']",
];

/// Last-activity timestamp inside a chat row.
pub const ROW_TIME_SELECTORS: &[&str] = &[
    "span[data-testid='msg-time']",
    "span[data-testid='time']",
    "span[title*=':']",
];

/// Strong authenticated-only affordances (compose box, search, header).
/// Any one of these visible is sufficient evidence of a session.
pub const STRONG_AUTH_SELECTORS: &[&str] = &[
    "[data-testid='conversation-compose-box-input']",
    "[data-testid='compose-box-input']",
    "[aria-label*='Search']",
    "[data-testid='menu']",
    "[data-testid='header']",
];

/// One message element inside the open conversation pane.
pub const MESSAGE_SELECTORS: &[&str] = &[
    "div[data-testid='msg-container']",
    "div[data-testid='conversation-panel-messages'] div[data-testid='msg-container']",
    "div[data-id*='msg']",
    "div[class*='message-in'], div[class*='message-out']",
];

/// The compose input of the open conversation.
pub const COMPOSE_SELECTORS: &[&str] = &[
    "[data-testid='conversation-compose-box-input']",
    "[data-testid='compose-box-input']",
    "footer div[contenteditable='true']",
    "div[contenteditable='true']",
];

/// Conversation header title candidates.
pub const HEADER_TITLE_SELECTORS: &[&str] = &[
    "[data-testid='conversation-header'] span[title]",
    "[data-testid='conversation-header'] span",
    "header span[title]",
];

/// Sidebar UI labels that are never chat names.
pub const UI_SKIP_WORDS: &[&str] = &[
    "search",
    "start",
    "new",
    "chat",
    "all",
    "unread",
    "favorites",
    "groups",
    "archived",
];

/// Serialize a selector list for injection into a page-side function.
pub fn as_js_array(selectors: &[&str]) -> String {
    serde_json::to_string(selectors).unwrap_or_else(|_| "[]".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_js_array_is_valid_json() {
        let encoded = as_js_array(CHAT_ROW_SELECTORS);
        let parsed: Vec<String> = serde_json::from_str(&encoded).unwrap();
        assert_eq!(parsed.len(), CHAT_ROW_SELECTORS.len());
    }
}
