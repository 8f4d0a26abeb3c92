//! The single entry point over the automation stack.
//!
//! Owns one browser session, one authentication detector, one chat
//! cache, and the session-record store, and sequences them behind a
//! single mutex so DOM work never interleaves. Public operations map
//! one-to-one onto the boundary endpoints (`start-session`,
//! `close-session`, `get-status`, `get-qr-code`, `get-messages`,
//! `get-latest-message`, `send-message`).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use wabridge_browser::{BrowserSession, LaunchOptions, ProfileMode, ProfileStore};
use wabridge_core::{
    AuthDetails, AuthState, ChatInfo, ChatKind, Config, Error, MessageBatch, MessageQuery, Paths,
    PollPolicy, QrCode, Result, SendReceipt, SessionRecord, SessionStartState, StartOutcome,
    StatusReport, UnreadSummary,
};
use wabridge_scraper::{AuthDetector, ChatCache, ChatHandle, MessageReader};
use wabridge_storage::SessionStore;

use crate::live::LiveSession;
use crate::monitor::{spawn_monitor, MonitorHandle};
use crate::rate_limit::DomRateLimiter;

// DOM wait cadences. The component APIs take these as parameters, so
// tests drive the same loops with zero-length intervals.
const ROW_WAIT: PollPolicy = PollPolicy {
    attempts: 15,
    interval_ms: 2000,
};
const PANE_WAIT: PollPolicy = PollPolicy {
    attempts: 10,
    interval_ms: 500,
};
const COMPOSE_WAIT: PollPolicy = PollPolicy {
    attempts: 20,
    interval_ms: 500,
};
const CONFIRM_WAIT: PollPolicy = PollPolicy {
    attempts: 8,
    interval_ms: 250,
};
/// Settling wait used by an interactive `start_session` (the restore
/// path uses the much longer configured `auth_poll` instead).
const SETTLE_WAIT: PollPolicy = PollPolicy {
    attempts: 6,
    interval_ms: 5000,
};
/// Post-refresh verification attempts during restore.
const REFRESH_WAIT: PollPolicy = PollPolicy {
    attempts: 3,
    interval_ms: 10_000,
};

const DEFAULT_MESSAGE_LIMIT: usize = 10;

pub struct Orchestrator {
    config: Config,
    store: Arc<SessionStore>,
    detector: Arc<AuthDetector>,
    profiles: ProfileStore,
    limiter: DomRateLimiter,
    live: Arc<Mutex<Option<LiveSession>>>,
    /// Fast-fail flag maintained by the monitor and foreground checks.
    connected: Arc<AtomicBool>,
    monitor: Mutex<Option<MonitorHandle>>,
    /// Whether the current session's profile has been promoted to base.
    promoted: AtomicBool,
}

impl Orchestrator {
    pub fn new(config: Config, paths: &Paths) -> Self {
        let store = Arc::new(SessionStore::new(paths.session_file()));
        let detector = Arc::new(AuthDetector::new(store.clone()));
        let limiter = DomRateLimiter::from_min_delay(config.rate_limit_delay());
        let profiles = ProfileStore::new(paths.profiles_dir());
        Self {
            config,
            store,
            detector,
            profiles,
            limiter,
            live: Arc::new(Mutex::new(None)),
            connected: Arc::new(AtomicBool::new(false)),
            monitor: Mutex::new(None),
            promoted: AtomicBool::new(false),
        }
    }

    /// Last persisted session record.
    pub fn session_record(&self) -> SessionRecord {
        self.store.load()
    }

    /// Fast connectivity answer maintained by the background monitor.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn build_live(&self, browser: BrowserSession) -> LiveSession {
        let cache = ChatCache::new(self.config.muted_chats.clone(), ROW_WAIT);
        let reader = MessageReader::new(PANE_WAIT, COMPOSE_WAIT, CONFIRM_WAIT);
        LiveSession::new(browser, cache, reader)
    }

    async fn page_load_grace(&self) {
        tokio::time::sleep(Duration::from_secs(self.config.page_load_delay_secs)).await;
    }

    // ---------------------------------------------------------------
    // Startup restore
    // ---------------------------------------------------------------

    /// Attempt silent session restoration from the persisted record and
    /// the last known-good profile. Returns whether the session came
    /// back authenticated. Failures are recorded and reported as a plain
    /// `false`: a broken restore means "fresh authentication required",
    /// not a dead process.
    pub async fn try_restore(&self) -> Result<bool> {
        let record = self.store.load();
        if !record.plausibly_authenticated() {
            debug!("No plausible previous session; fresh authentication required");
            return Ok(false);
        }
        if !self.profiles.has_base() {
            warn!("Session record claims authentication but no base profile exists");
            self.store
                .save(&SessionRecord::restore_failed("no base profile on disk"))?;
            return Ok(false);
        }

        info!(last_login = ?record.last_login, "Attempting silent session restore");
        match self.restore_inner().await {
            Ok(true) => {
                info!("Session restored without re-authentication");
                Ok(true)
            }
            Ok(false) => {
                warn!("Session restore exhausted all attempts; QR scan required");
                self.store.save(&SessionRecord::restore_failed(
                    "session expired; QR scan required",
                ))?;
                self.teardown_live().await;
                Ok(false)
            }
            Err(e) => {
                warn!(error = %e, "Session restore failed");
                self.store
                    .save(&SessionRecord::restore_failed(e.to_string()))?;
                self.teardown_live().await;
                Ok(false)
            }
        }
    }

    async fn restore_inner(&self) -> Result<bool> {
        let profile_dir = self.profiles.acquire(ProfileMode::Resume)?;
        let browser = BrowserSession::launch(&LaunchOptions {
            profile_dir,
            headless: self.config.headless,
        })
        .await?;
        self.page_load_grace().await;

        let mut guard = self.live.lock().await;
        let live = guard.insert(self.build_live(browser));

        let (state, _) = self
            .detector
            .poll_until_authenticated(&live.browser, true, self.config.auth_poll)
            .await?;
        if state == AuthState::Authenticated {
            drop(guard);
            self.after_authenticated().await;
            return Ok(true);
        }

        // One page refresh retry: Chrome occasionally restores the
        // session only after a reload.
        info!("Restore attempts exhausted, retrying once after a page refresh");
        live.browser.reload().await?;
        drop(guard);
        self.page_load_grace().await;

        let mut guard = self.live.lock().await;
        let Some(live) = guard.as_mut() else {
            return Ok(false);
        };
        let (state, _) = self
            .detector
            .poll_until_authenticated(&live.browser, true, REFRESH_WAIT)
            .await?;
        drop(guard);

        if state == AuthState::Authenticated {
            self.after_authenticated().await;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    // ---------------------------------------------------------------
    // Session lifecycle
    // ---------------------------------------------------------------

    /// Start (or report on) the browser session.
    pub async fn start_session(&self) -> Result<StartOutcome> {
        self.limiter.acquire().await;

        if self.live.lock().await.is_some() {
            return self.report_start_state().await;
        }

        // Keep cookies from the last known-good profile when one exists.
        let mode = if self.profiles.has_base() {
            ProfileMode::Resume
        } else {
            ProfileMode::Fresh
        };
        let profile_dir = self.profiles.acquire(mode)?;
        let browser = BrowserSession::launch(&LaunchOptions {
            profile_dir,
            headless: self.config.headless,
        })
        .await?;
        self.page_load_grace().await;

        {
            let mut guard = self.live.lock().await;
            guard.replace(self.build_live(browser));
        }
        self.report_start_state().await
    }

    async fn report_start_state(&self) -> Result<StartOutcome> {
        let state = {
            let mut guard = self.live.lock().await;
            let live = guard.as_mut().ok_or(Error::NoSession)?;
            let (state, _) = self
                .detector
                .poll_until_settled(&live.browser, false, SETTLE_WAIT)
                .await?;
            state
        };

        match state {
            AuthState::Authenticated => {
                self.after_authenticated().await;
                Ok(StartOutcome {
                    state: SessionStartState::Authenticated,
                    message: "session authenticated".to_string(),
                })
            }
            AuthState::Unauthenticated => Ok(StartOutcome {
                state: SessionStartState::QrReady,
                message: "QR code ready for scanning".to_string(),
            }),
            AuthState::Loading | AuthState::Indeterminate => Ok(StartOutcome {
                state: SessionStartState::Loading,
                message: "page loaded, interface not recognized yet".to_string(),
            }),
        }
    }

    /// First confirmed authentication for this session: record the
    /// working profile as the new base and start the liveness monitor.
    async fn after_authenticated(&self) {
        self.connected.store(true, Ordering::SeqCst);

        if !self.promoted.swap(true, Ordering::SeqCst) {
            let guard = self.live.lock().await;
            if let Some(live) = guard.as_ref() {
                if let Err(e) = self.profiles.promote(live.browser.profile_dir()) {
                    warn!(error = %e, "Could not promote working profile to base");
                    self.promoted.store(false, Ordering::SeqCst);
                }
            }
        }

        let mut monitor = self.monitor.lock().await;
        if monitor.is_none() {
            *monitor = Some(spawn_monitor(
                self.live.clone(),
                self.detector.clone(),
                self.connected.clone(),
                Duration::from_secs(self.config.monitor_interval_secs),
            ));
        }
    }

    /// Close the browser session and stop the monitor. Safe to call when
    /// no session is live.
    pub async fn close_session(&self) -> Result<()> {
        self.teardown_live().await;
        info!("Session closed");
        Ok(())
    }

    async fn teardown_live(&self) {
        // Stop the monitor before taking the live lock; it may be
        // mid-iteration holding it.
        if let Some(handle) = self.monitor.lock().await.take() {
            handle.stop().await;
        }
        let mut guard = self.live.lock().await;
        if let Some(mut live) = guard.take() {
            live.browser.close().await;
        }
        self.connected.store(false, Ordering::SeqCst);
        self.promoted.store(false, Ordering::SeqCst);
    }

    // ---------------------------------------------------------------
    // Status / QR
    // ---------------------------------------------------------------

    pub async fn get_status(&self) -> Result<StatusReport> {
        {
            let guard = self.live.lock().await;
            if guard.is_none() {
                return Ok(self.offline_status());
            }
        }

        self.limiter.acquire().await;
        let state = {
            let mut guard = self.live.lock().await;
            let Some(live) = guard.as_mut() else {
                return Ok(self.offline_status());
            };
            self.detector.check(&live.browser, false).await?
        };
        let (state, details) = state;

        if state.is_authenticated() {
            self.after_authenticated().await;
        } else if state != AuthState::Loading {
            self.connected.store(false, Ordering::SeqCst);
        }

        Ok(StatusReport {
            authenticated: state.is_authenticated(),
            state,
            details,
            session: self.store.load(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        })
    }

    fn offline_status(&self) -> StatusReport {
        StatusReport {
            authenticated: false,
            state: AuthState::Indeterminate,
            details: AuthDetails::default(),
            session: self.store.load(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Capture the login challenge as a PNG data URL.
    pub async fn get_qr_code(&self) -> Result<QrCode> {
        self.limiter.acquire().await;
        let guard = self.live.lock().await;
        let live = guard.as_ref().ok_or(Error::NoSession)?;
        match self.detector.capture_qr_code(&live.browser).await? {
            Some(qr) => Ok(qr),
            None => Err(Error::Other(
                "no QR code visible; session may already be authenticated or still loading"
                    .to_string(),
            )),
        }
    }

    // ---------------------------------------------------------------
    // Messages
    // ---------------------------------------------------------------

    /// Unified message read. Resolves the target chat from the query
    /// (explicit name, contact, first-unread, or first in visual order),
    /// refreshes the cache when stale, and returns up to `limit`
    /// messages most-recent-last.
    pub async fn get_messages(&self, query: MessageQuery) -> Result<MessageBatch> {
        self.limiter.acquire().await;
        let mut guard = self.live.lock().await;
        let live = guard.as_mut().ok_or(Error::NoSession)?;
        self.ensure_authenticated(live).await?;

        let limit = query
            .limit
            .unwrap_or(DEFAULT_MESSAGE_LIMIT)
            .clamp(1, self.config.max_messages.max(1));

        self.ensure_cache_fresh(live).await?;

        let target = self.resolve_target(live, &query).await?;
        let Some(name) = target else {
            return Ok(MessageBatch {
                chat_name: None,
                messages: Vec::new(),
                count: 0,
                partial: false,
            });
        };

        let handle = self.open_with_heal(live, &name).await?;
        let (mut messages, partial) = live.reader.read_messages(&live.browser, limit).await?;
        if query.unread == Some(true) {
            messages.retain(|m| !m.is_outgoing);
        }
        if messages.len() > limit {
            messages = messages.split_off(messages.len() - limit);
        }
        Ok(MessageBatch {
            chat_name: Some(handle.name),
            count: messages.len(),
            messages,
            partial,
        })
    }

    /// Latest message: first chat with unread messages, else the most
    /// recent chat in visual order.
    pub async fn get_latest_message(&self) -> Result<MessageBatch> {
        self.limiter.acquire().await;
        let mut guard = self.live.lock().await;
        let live = guard.as_mut().ok_or(Error::NoSession)?;
        self.ensure_authenticated(live).await?;

        // The freshest possible view matters here; always rescan.
        live.cache.scan(&live.browser).await?;
        let target = live
            .cache
            .first_unread()
            .or_else(|| live.cache.first())
            .map(|h| h.name.clone());
        let Some(name) = target else {
            return Ok(MessageBatch {
                chat_name: None,
                messages: Vec::new(),
                count: 0,
                partial: false,
            });
        };

        let handle = self.open_with_heal(live, &name).await?;
        let (messages, partial) = live.reader.read_messages(&live.browser, 1).await?;
        Ok(MessageBatch {
            chat_name: Some(handle.name),
            count: messages.len(),
            messages,
            partial,
        })
    }

    /// Send a message to a chat resolved by exact name.
    pub async fn send_message(&self, chat: &str, text: &str) -> Result<SendReceipt> {
        if text.trim().is_empty() {
            return Err(Error::Other("refusing to send an empty message".to_string()));
        }
        self.limiter.acquire().await;
        let mut guard = self.live.lock().await;
        let live = guard.as_mut().ok_or(Error::NoSession)?;
        self.ensure_authenticated(live).await?;

        // A send targets whatever the sidebar shows right now; never
        // trust a cache older than this call.
        live.cache.scan(&live.browser).await?;
        let handle = self.open_with_heal(live, chat).await?;
        live.reader.send_message(&live.browser, text).await?;

        // Sidebar order changes after a send; refresh opportunistically.
        if let Err(e) = live.cache.scan(&live.browser).await {
            debug!(error = %e, "Post-send chat rescan failed");
        }

        info!(chat = %handle.name, "Message sent");
        Ok(SendReceipt {
            chat_name: handle.name,
            text: text.to_string(),
        })
    }

    // ---------------------------------------------------------------
    // Chat discovery
    // ---------------------------------------------------------------

    /// Current chat list in filtered visual order.
    pub async fn list_chats(&self) -> Result<Vec<ChatInfo>> {
        self.limiter.acquire().await;
        let mut guard = self.live.lock().await;
        let live = guard.as_mut().ok_or(Error::NoSession)?;
        self.ensure_authenticated(live).await?;
        self.ensure_cache_fresh(live).await?;
        let mut infos = live.cache.infos();
        infos.truncate(self.config.max_conversations);
        Ok(infos)
    }

    /// Individual (non-group) chats in sidebar order — the closest thing
    /// the scraped UI offers to a contact list.
    pub async fn list_contacts(&self) -> Result<Vec<ChatInfo>> {
        self.limiter.acquire().await;
        let mut guard = self.live.lock().await;
        let live = guard.as_mut().ok_or(Error::NoSession)?;
        self.ensure_authenticated(live).await?;
        self.ensure_cache_fresh(live).await?;
        let mut contacts: Vec<ChatInfo> = live
            .cache
            .infos()
            .into_iter()
            .filter(|c| c.kind == ChatKind::Individual)
            .collect();
        contacts.truncate(self.config.max_contacts);
        Ok(contacts)
    }

    /// Unread counts across all cached chats, without opening any.
    pub async fn unread_summary(&self) -> Result<UnreadSummary> {
        self.limiter.acquire().await;
        let mut guard = self.live.lock().await;
        let live = guard.as_mut().ok_or(Error::NoSession)?;
        self.ensure_authenticated(live).await?;
        self.ensure_cache_fresh(live).await?;
        Ok(live.cache.unread_summary())
    }

    // ---------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------

    /// Gate every read/write on a live authentication check. Ambiguous
    /// states (Loading, Indeterminate) fail closed.
    async fn ensure_authenticated(&self, live: &LiveSession) -> Result<()> {
        let (state, _) = self.detector.check(&live.browser, false).await?;
        if state.is_authenticated() {
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        } else {
            if state != AuthState::Loading {
                self.connected.store(false, Ordering::SeqCst);
            }
            Err(Error::NotAuthenticated)
        }
    }

    async fn ensure_cache_fresh(&self, live: &mut LiveSession) -> Result<()> {
        let ttl = Duration::from_secs(self.config.chat_cache_ttl_secs);
        if live.cache.is_stale(ttl) {
            live.cache.scan(&live.browser).await?;
        }
        Ok(())
    }

    /// Resolve the query to a concrete cached chat name.
    async fn resolve_target(
        &self,
        live: &mut LiveSession,
        query: &MessageQuery,
    ) -> Result<Option<String>> {
        if let Some(chat) = &query.chat {
            if let Some(handle) = live.cache.lookup(chat) {
                return Ok(Some(handle.name.clone()));
            }
            // Not cached: one forced rescan before giving up.
            live.cache.scan(&live.browser).await?;
            return match live.cache.lookup(chat) {
                Some(handle) => Ok(Some(handle.name.clone())),
                None => Err(Error::ChatNotFound(chat.clone())),
            };
        }
        if let Some(contact) = &query.contact {
            if let Some(handle) = live.cache.resolve_contact(contact) {
                return Ok(Some(handle.name.clone()));
            }
            live.cache.scan(&live.browser).await?;
            return match live.cache.resolve_contact(contact) {
                Some(handle) => Ok(Some(handle.name.clone())),
                None => Err(Error::ChatNotFound(contact.clone())),
            };
        }
        if query.unread == Some(true) {
            return Ok(live.cache.first_unread().map(|h| h.name.clone()));
        }
        Ok(live.cache.first().map(|h| h.name.clone()))
    }

    /// Open a chat by name, healing a stale handle with exactly one
    /// rescan before failing the operation.
    async fn open_with_heal(&self, live: &mut LiveSession, name: &str) -> Result<ChatHandle> {
        let handle = match live.cache.lookup(name).cloned() {
            Some(handle) => handle,
            None => {
                live.cache.scan(&live.browser).await?;
                live.cache
                    .lookup(name)
                    .cloned()
                    .ok_or_else(|| Error::ChatNotFound(name.to_string()))?
            }
        };

        match live.reader.open_chat(&live.browser, &handle).await {
            Ok(()) => {
                live.active_chat = Some(handle.name.clone());
                Ok(handle)
            }
            Err(Error::StaleHandle(reason)) => {
                debug!(chat = %name, %reason, "Stale chat handle, rescanning once");
                live.cache.scan(&live.browser).await?;
                let handle = live
                    .cache
                    .lookup(name)
                    .cloned()
                    .ok_or_else(|| Error::ChatNotFound(name.to_string()))?;
                live.reader.open_chat(&live.browser, &handle).await?;
                live.active_chat = Some(handle.name.clone());
                Ok(handle)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orchestrator_in(dir: &tempfile::TempDir) -> Orchestrator {
        let paths = Paths::with_base(dir.path().to_path_buf());
        Orchestrator::new(Config::default(), &paths)
    }

    #[tokio::test]
    async fn test_empty_session_file_requires_fresh_auth() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator_in(&dir);
        // No record on disk: no silent resume is attempted, no browser
        // is launched.
        let restored = orchestrator.try_restore().await.unwrap();
        assert!(!restored);
        assert!(orchestrator.live.lock().await.is_none());
        assert!(!orchestrator.session_record().authenticated);
    }

    #[tokio::test]
    async fn test_restore_without_profile_records_failure() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator_in(&dir);
        orchestrator
            .store
            .save(&SessionRecord::authenticated_now(false))
            .unwrap();

        let restored = orchestrator.try_restore().await.unwrap();
        assert!(!restored);
        let record = orchestrator.session_record();
        assert!(!record.authenticated);
        assert_eq!(record.restore_failed, Some(true));
        assert!(record.restore_error.is_some());
    }

    #[tokio::test]
    async fn test_operations_without_session_fail_typed() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator_in(&dir);
        let err = orchestrator
            .get_messages(MessageQuery::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoSession));
        let err = orchestrator.send_message("Alice", "hi").await.unwrap_err();
        assert!(matches!(err, Error::NoSession));
        let err = orchestrator.get_qr_code().await.unwrap_err();
        assert!(matches!(err, Error::NoSession));
    }

    #[tokio::test]
    async fn test_status_without_session_reports_offline() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator_in(&dir);
        let status = orchestrator.get_status().await.unwrap();
        assert!(!status.authenticated);
        assert_eq!(status.state, AuthState::Indeterminate);
        assert!(!orchestrator.is_connected());
    }

    #[tokio::test]
    async fn test_close_session_without_session_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator_in(&dir);
        orchestrator.close_session().await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_send_is_rejected_before_any_work() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator_in(&dir);
        let err = orchestrator.send_message("Alice", "   ").await.unwrap_err();
        assert!(matches!(err, Error::Other(_)));
    }
}
