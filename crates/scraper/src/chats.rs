//! Sidebar chat discovery and caching.
//!
//! One scan sweeps the chat-list region in visual order and rebuilds the
//! cache wholesale; entries from two different scans are never mixed, so
//! `order` always reflects a single document snapshot. Rows whose name
//! cannot be extracted, and rows on the operator's mute list, are
//! excluded entirely and the remaining rows renumbered densely.
//!
//! A [`ChatHandle`] does not hold a DOM node: it records the row's index
//! in the raw visual order plus the document epoch it was observed
//! under. A handle whose epoch no longer matches the live session is
//! stale and must not be dereferenced.

use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::{debug, info, warn};

use wabridge_browser::BrowserSession;
use wabridge_core::{ChatInfo, ChatKind, Error, PollPolicy, Result, UnreadSummary};

use crate::selectors::{
    as_js_array, CHAT_LIST_CONTAINERS, CHAT_ROW_SELECTORS, ROW_TIME_SELECTORS, UI_SKIP_WORDS,
    UNREAD_BADGE_SELECTORS,
};

/// Page-side row sweep. Returns rows in visual order with best-effort
/// name/badge/timestamp extraction; a row that yields no name comes back
/// with `name: null` and is filtered on the Rust side.
const SCAN_ROWS_FN: &str = r#"
(containerSels, rowSels, badgeSels, timeSels) => {
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
    return rows.map((el, i) => {
        let name = el.getAttribute('title') || null;
        if (!name) {
            const titled = el.querySelector('span[title], div[title]');
            if (titled) name = titled.getAttribute('title');
        }
        if (!name) {
            const lines = (el.innerText || '')
                .split('\n')
                .map(l => l.trim())
                .filter(l => l.length > 1 && !/^\d+$/.test(l));
            name = lines.length > 0 ? lines[0] : null;
        }
        let unread = null;
        for (const sel of badgeSels) {
            const badge = el.querySelector(sel);
            if (badge) {
                const text = (badge.innerText || '').trim();
                if (text) { unread = text; break; }
            }
        }
        let lastActivity = null;
        for (const sel of timeSels) {
            const t = el.querySelector(sel);
            if (t) {
                const v = (t.innerText || '').trim();
                if (v.includes(':') || v.includes('AM') || v.includes('PM') || v.includes('/')) {
                    lastActivity = v;
                    break;
                }
            }
        }
        const preview = (el.innerText || '').slice(0, 160);
        return { index: i, name, unread, lastActivity, preview };
    });
}
"#;

/// Reports whether the chat-list region exists yet and how many rows it
/// shows, to tell "still loading" apart from "genuinely empty".
const LIST_PRESENCE_FN: &str = r#"
(containerSels, rowSels) => {
    let containerFound = false;
    for (const sel of containerSels) {
        if (document.querySelector(sel)) { containerFound = true; break; }
    }
    let rowCount = 0;
    for (const sel of rowSels) {
        const n = document.querySelectorAll(sel).length;
        if (n > 0) { rowCount = n; break; }
    }
    return { containerFound, rowCount };
}
"#;

/// One raw sidebar row as reported by the page.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawChatRow {
    pub index: usize,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub unread: Option<String>,
    #[serde(default)]
    pub last_activity: Option<String>,
    #[serde(default)]
    pub preview: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListPresence {
    container_found: bool,
    row_count: u64,
}

/// Cached reference to one conversation row.
#[derive(Debug, Clone)]
pub struct ChatHandle {
    /// Unique within one scan.
    pub name: String,
    /// Index into the raw visual row list (pre-filter), used to click.
    pub row_index: usize,
    /// Document epoch the row was observed under.
    pub epoch: u64,
    pub unread_count: u32,
    pub last_activity: Option<String>,
    pub kind: ChatKind,
    /// Dense position in the filtered visual order, 0-based.
    pub order: usize,
    pub scanned_at: Instant,
}

impl ChatHandle {
    pub fn info(&self) -> ChatInfo {
        ChatInfo {
            name: self.name.clone(),
            unread_count: self.unread_count,
            last_activity: self.last_activity.clone(),
            kind: self.kind,
            order: self.order,
        }
    }
}

/// A chat name is meaningful when it is more than a character long and
/// is not one of the sidebar's own UI labels.
pub fn validate_chat_name(name: &str) -> bool {
    let trimmed = name.trim();
    if trimmed.len() < 2 {
        return false;
    }
    let lower = trimmed.to_lowercase();
    !UI_SKIP_WORDS.iter().any(|w| lower == *w)
}

/// Group-vs-individual heuristic over the row's visible text.
pub fn infer_kind(name: &str, preview: Option<&str>) -> ChatKind {
    if name.contains(',') || name.split_whitespace().count() > 4 {
        return ChatKind::Group;
    }
    if let Some(preview) = preview {
        // Group previews prefix messages with the sender's name.
        if preview.lines().count() > 2 && preview.contains(": ") {
            return ChatKind::Group;
        }
    }
    ChatKind::Individual
}

fn parse_unread(raw: Option<&str>) -> u32 {
    raw.and_then(|s| s.trim().parse::<u32>().ok()).unwrap_or(0)
}

/// Drop unresolved and denylisted rows and renumber the rest densely in
/// visual order. Pure; exercised directly by tests.
pub fn filter_rows(rows: Vec<RawChatRow>, denylist: &[String]) -> Vec<(RawChatRow, usize)> {
    let mut filtered: Vec<(RawChatRow, usize)> = Vec::new();
    for row in rows {
        let name = match row.name.as_deref() {
            Some(name) if validate_chat_name(name) => name.trim().to_string(),
            _ => {
                debug!(index = row.index, "Skipping row with unresolvable name");
                continue;
            }
        };
        if denylist.iter().any(|d| d == &name) {
            debug!(chat = %name, "Skipping muted chat");
            continue;
        }
        // Duplicate names cannot coexist in one cache generation; first
        // (topmost) row wins.
        if filtered
            .iter()
            .any(|(r, _)| r.name.as_deref().map(str::trim) == Some(name.as_str()))
        {
            warn!(chat = %name, "Duplicate chat name in sidebar, keeping topmost row");
            continue;
        }
        let order = filtered.len();
        filtered.push((row, order));
    }
    filtered
}

/// In-memory cache of the last successful sidebar scan.
pub struct ChatCache {
    entries: Vec<ChatHandle>,
    scanned_at: Option<Instant>,
    denylist: Vec<String>,
    row_wait: PollPolicy,
}

impl ChatCache {
    pub fn new(denylist: Vec<String>, row_wait: PollPolicy) -> Self {
        Self {
            entries: Vec::new(),
            scanned_at: None,
            denylist,
            row_wait,
        }
    }

    /// Rebuild the cache from the live sidebar. Replaces all entries
    /// wholesale; on any failure the previous entries are kept.
    pub async fn scan(&mut self, session: &BrowserSession) -> Result<usize> {
        self.wait_for_chat_list(session).await?;

        let js = format!(
            "({})({}, {}, {}, {})",
            SCAN_ROWS_FN,
            as_js_array(CHAT_LIST_CONTAINERS),
            as_js_array(CHAT_ROW_SELECTORS),
            as_js_array(UNREAD_BADGE_SELECTORS),
            as_js_array(ROW_TIME_SELECTORS),
        );
        let value = session.eval(&js).await?;
        let rows: Vec<RawChatRow> = serde_json::from_value(value)
            .map_err(|e| Error::Structural(format!("chat row sweep returned bad shape: {}", e)))?;

        let epoch = session.epoch();
        let now = Instant::now();
        let entries: Vec<ChatHandle> = filter_rows(rows, &self.denylist)
            .into_iter()
            .map(|(row, order)| {
                let name = row.name.unwrap_or_default().trim().to_string();
                ChatHandle {
                    kind: infer_kind(&name, row.preview.as_deref()),
                    unread_count: parse_unread(row.unread.as_deref()),
                    last_activity: row.last_activity,
                    row_index: row.index,
                    epoch,
                    order,
                    scanned_at: now,
                    name,
                }
            })
            .collect();

        info!(chats = entries.len(), "Chat list scanned");
        self.entries = entries;
        self.scanned_at = Some(now);
        Ok(self.entries.len())
    }

    /// Bounded wait for the chat-list region. Rows appearing ends the
    /// wait early; a container with zero rows after the full wait is a
    /// genuinely empty list; no container at all is a timeout.
    async fn wait_for_chat_list(&self, session: &BrowserSession) -> Result<()> {
        let js = format!(
            "({})({}, {})",
            LIST_PRESENCE_FN,
            as_js_array(CHAT_LIST_CONTAINERS),
            as_js_array(CHAT_ROW_SELECTORS),
        );
        let mut container_seen = false;
        for _ in 0..self.row_wait.attempts.max(1) {
            let value = session.eval(&js).await?;
            let presence: ListPresence = serde_json::from_value(value).unwrap_or_default();
            if presence.row_count > 0 {
                return Ok(());
            }
            container_seen = container_seen || presence.container_found;
            tokio::time::sleep(self.row_wait.interval()).await;
        }
        if container_seen {
            debug!("Chat list present but empty");
            Ok(())
        } else {
            Err(Error::Timeout(
                "chat list did not appear within the wait budget".to_string(),
            ))
        }
    }

    pub fn entries(&self) -> &[ChatHandle] {
        &self.entries
    }

    pub fn infos(&self) -> Vec<ChatInfo> {
        self.entries.iter().map(ChatHandle::info).collect()
    }

    /// Exact name lookup (case-insensitive), served from the last scan.
    pub fn lookup(&self, name: &str) -> Option<&ChatHandle> {
        let needle = name.trim().to_lowercase();
        self.entries
            .iter()
            .find(|c| c.name.to_lowercase() == needle)
    }

    /// Contact resolution: case-insensitive substring match, preferring
    /// individual chats over groups.
    pub fn resolve_contact(&self, contact: &str) -> Option<&ChatHandle> {
        let needle = contact.trim().to_lowercase();
        if needle.is_empty() {
            return None;
        }
        self.entries
            .iter()
            .filter(|c| c.name.to_lowercase().contains(&needle))
            .min_by_key(|c| (c.kind == ChatKind::Group, c.order))
    }

    /// First chat in visual order with unread messages.
    pub fn first_unread(&self) -> Option<&ChatHandle> {
        self.entries.iter().find(|c| c.unread_count > 0)
    }

    /// First chat in visual order.
    pub fn first(&self) -> Option<&ChatHandle> {
        self.entries.first()
    }

    pub fn unread_summary(&self) -> UnreadSummary {
        let unread_by_chat: Vec<(String, u32)> = self
            .entries
            .iter()
            .filter(|c| c.unread_count > 0)
            .map(|c| (c.name.clone(), c.unread_count))
            .collect();
        UnreadSummary {
            total_unread: unread_by_chat.iter().map(|(_, n)| n).sum(),
            chats_with_unread: unread_by_chat.len(),
            unread_by_chat,
        }
    }

    /// Whether the cache needs a rescan before serving a lookup.
    pub fn is_stale(&self, ttl: Duration) -> bool {
        match self.scanned_at {
            Some(at) => at.elapsed() > ttl,
            None => true,
        }
    }

    /// Drop all entries (explicit refresh request or epoch bump).
    pub fn invalidate(&mut self) {
        self.entries.clear();
        self.scanned_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(index: usize, name: Option<&str>) -> RawChatRow {
        RawChatRow {
            index,
            name: name.map(|s| s.to_string()),
            unread: None,
            last_activity: None,
            preview: None,
        }
    }

    #[test]
    fn test_unresolved_rows_are_excluded_and_order_dense() {
        let rows = vec![row(0, Some("Alice")), row(1, None), row(2, Some("Bob"))];
        let filtered = filter_rows(rows, &[]);
        assert_eq!(filtered.len(), 2);
        assert_eq!(filtered[0].0.name.as_deref(), Some("Alice"));
        assert_eq!(filtered[0].1, 0);
        assert_eq!(filtered[1].0.name.as_deref(), Some("Bob"));
        assert_eq!(filtered[1].1, 1);
        // The raw index of the surviving later row is untouched.
        assert_eq!(filtered[1].0.index, 2);
    }

    #[test]
    fn test_denylist_excludes_exact_names() {
        let rows = vec![
            row(0, Some("Alice")),
            row(1, Some("Muted Group")),
            row(2, Some("Bob")),
        ];
        let filtered = filter_rows(rows, &["Muted Group".to_string()]);
        let names: Vec<_> = filtered
            .iter()
            .map(|(r, _)| r.name.clone().unwrap())
            .collect();
        assert_eq!(names, vec!["Alice", "Bob"]);
        let orders: Vec<_> = filtered.iter().map(|(_, o)| *o).collect();
        assert_eq!(orders, vec![0, 1]);
    }

    #[test]
    fn test_ui_words_and_short_names_rejected() {
        assert!(!validate_chat_name("Archived"));
        assert!(!validate_chat_name("search"));
        assert!(!validate_chat_name("x"));
        assert!(!validate_chat_name("  "));
        assert!(validate_chat_name("Alice"));
        assert!(validate_chat_name("+972 50 000 0000"));
    }

    #[test]
    fn test_duplicate_names_keep_topmost() {
        let rows = vec![row(0, Some("Alice")), row(1, Some("Alice"))];
        let filtered = filter_rows(rows, &[]);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].0.index, 0);
    }

    #[test]
    fn test_infer_kind() {
        assert_eq!(infer_kind("Alice", None), ChatKind::Individual);
        assert_eq!(infer_kind("Alice, Bob, Carol", None), ChatKind::Group);
        assert_eq!(
            infer_kind("Team", Some("Dana: hi\nEli: hello\nDana: ok")),
            ChatKind::Group
        );
    }

    #[test]
    fn test_parse_unread() {
        assert_eq!(parse_unread(Some("3")), 3);
        assert_eq!(parse_unread(Some(" 12 ")), 12);
        assert_eq!(parse_unread(Some("new")), 0);
        assert_eq!(parse_unread(None), 0);
    }

    fn cache_with(names: &[(&str, u32, ChatKind)]) -> ChatCache {
        let mut cache = ChatCache::new(Vec::new(), PollPolicy::immediate(1));
        cache.entries = names
            .iter()
            .enumerate()
            .map(|(i, (name, unread, kind))| ChatHandle {
                name: name.to_string(),
                row_index: i,
                epoch: 0,
                unread_count: *unread,
                last_activity: None,
                kind: *kind,
                order: i,
                scanned_at: Instant::now(),
            })
            .collect();
        cache.scanned_at = Some(Instant::now());
        cache
    }

    #[test]
    fn test_lookup_round_trip_case_insensitive() {
        let cache = cache_with(&[("Alice", 0, ChatKind::Individual)]);
        assert!(cache.lookup("alice").is_some());
        assert!(cache.lookup("ALICE ").is_some());
        assert!(cache.lookup("Bob").is_none());
    }

    #[test]
    fn test_resolve_contact_prefers_individual() {
        let cache = cache_with(&[
            ("Dana and friends", 0, ChatKind::Group),
            ("Dana", 0, ChatKind::Individual),
        ]);
        let resolved = cache.resolve_contact("dana").unwrap();
        assert_eq!(resolved.name, "Dana");
    }

    #[test]
    fn test_first_unread_in_visual_order() {
        let cache = cache_with(&[
            ("Alice", 0, ChatKind::Individual),
            ("Bob", 2, ChatKind::Individual),
            ("Carol", 5, ChatKind::Individual),
        ]);
        assert_eq!(cache.first_unread().unwrap().name, "Bob");
    }

    #[test]
    fn test_unread_summary() {
        let cache = cache_with(&[
            ("Alice", 0, ChatKind::Individual),
            ("Bob", 2, ChatKind::Individual),
            ("Carol", 5, ChatKind::Individual),
        ]);
        let summary = cache.unread_summary();
        assert_eq!(summary.total_unread, 7);
        assert_eq!(summary.chats_with_unread, 2);
    }

    #[test]
    fn test_empty_cache_is_stale() {
        let cache = ChatCache::new(Vec::new(), PollPolicy::immediate(1));
        assert!(cache.is_stale(Duration::from_secs(60)));
    }

    #[test]
    fn test_invalidate_clears_entries() {
        let mut cache = cache_with(&[("Alice", 0, ChatKind::Individual)]);
        cache.invalidate();
        assert!(cache.entries().is_empty());
        assert!(cache.is_stale(Duration::from_secs(60)));
    }
}
