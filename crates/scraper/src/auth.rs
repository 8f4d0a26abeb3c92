//! Authentication-state detection.
//!
//! Detection is split into three layers so the decision rule stays
//! testable without a browser: a one-shot page-side probe gathers raw
//! evidence into a [`DomProbe`]; [`classify`] turns a probe into an
//! [`AuthState`] through a fixed priority order; [`AuthDetector`] adds
//! idempotent persistence of state transitions on top.
//!
//! Priority order (first match wins):
//! 1. document too small → `Loading`
//! 2. visible login challenge → `Unauthenticated` — authoritative even
//!    when stale chat-list remnants are still in the DOM
//! 3. chat-list rows present → `Authenticated`
//! 4. strong authenticated-only affordances present → `Authenticated`
//! 5. otherwise → `Indeterminate` (treated as not connected)

use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use wabridge_browser::BrowserSession;
use wabridge_core::{AuthDetails, AuthState, PollPolicy, QrCode, Result, SessionRecord};
use wabridge_storage::SessionStore;

use crate::selectors::{
    as_js_array, CHALLENGE_SELECTORS, CHAT_ROW_SELECTORS, STRONG_AUTH_SELECTORS,
};

/// Below this many elements the document is still rendering.
const LOADING_MIN_ELEMENTS: u64 = 50;

/// Page-side evidence gatherer. Returns one JSON object per call; all
/// interpretation happens on the Rust side.
const PROBE_FN: &str = r#"
(challengeSels, rowSels, strongSels) => {
    const visible = (el) => {
        if (!el) return false;
        const r = el.getBoundingClientRect();
        return r.width > 0 && r.height > 0;
    };
    let challenge = false;
    for (const sel of challengeSels) {
        for (const el of document.querySelectorAll(sel)) {
            if (!visible(el)) continue;
            const r = el.getBoundingClientRect();
            if (r.width <= 50 || r.height <= 50) continue;
            const label = (el.getAttribute('aria-label') || '').toLowerCase();
            if (el.tagName === 'CANVAS' || label.includes('scan') || label.includes('qr')) {
                challenge = true;
                break;
            }
        }
        if (challenge) break;
    }
    let chatRows = 0;
    for (const sel of rowSels) {
        const n = document.querySelectorAll(sel).length;
        if (n > 0) { chatRows = n; break; }
    }
    let strong = false;
    for (const sel of strongSels) {
        if (visible(document.querySelector(sel))) { strong = true; break; }
    }
    return {
        elementCount: document.querySelectorAll('*').length,
        challengeVisible: challenge,
        chatRowCount: chatRows,
        strongIndicators: strong,
    };
}
"#;

/// Captures the visible challenge canvas as a PNG data URL.
const QR_CAPTURE_FN: &str = r#"
(challengeSels) => {
    for (const sel of challengeSels) {
        for (const el of document.querySelectorAll(sel)) {
            if (el.tagName !== 'CANVAS') continue;
            const r = el.getBoundingClientRect();
            if (r.width <= 50 || r.height <= 50) continue;
            try { return el.toDataURL('image/png'); } catch (e) {}
        }
    }
    return null;
}
"#;

/// Raw evidence from one document snapshot.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomProbe {
    #[serde(default)]
    pub element_count: u64,
    #[serde(default)]
    pub challenge_visible: bool,
    #[serde(default)]
    pub chat_row_count: u64,
    #[serde(default)]
    pub strong_indicators: bool,
}

/// Deterministic classification of one probe. Pure; see module docs for
/// the priority order.
pub fn classify(probe: &DomProbe) -> (AuthState, AuthDetails) {
    let details = AuthDetails {
        element_count: probe.element_count,
        challenge_visible: probe.challenge_visible,
        chat_list_matched: probe.chat_row_count > 0,
        strong_indicators_matched: probe.strong_indicators,
    };

    let state = if probe.element_count < LOADING_MIN_ELEMENTS {
        AuthState::Loading
    } else if probe.challenge_visible {
        AuthState::Unauthenticated
    } else if probe.chat_row_count > 0 || probe.strong_indicators {
        AuthState::Authenticated
    } else {
        AuthState::Indeterminate
    };

    (state, details)
}

/// The record to persist for a state transition, if any.
///
/// `Loading` is transient and never settles the tracked state, so an
/// Authenticated → Loading → Authenticated blip produces no writes.
/// Re-entering the current settled state also writes nothing.
pub fn record_for_transition(
    prev: Option<AuthState>,
    next: AuthState,
    restored: bool,
) -> Option<SessionRecord> {
    if next == AuthState::Loading || prev == Some(next) {
        return None;
    }
    match next {
        AuthState::Authenticated => Some(SessionRecord::authenticated_now(restored)),
        AuthState::Unauthenticated | AuthState::Indeterminate => {
            if prev == Some(AuthState::Authenticated) {
                Some(SessionRecord::signed_out())
            } else {
                None
            }
        }
        AuthState::Loading => None,
    }
}

/// Single source of truth for "are we connected".
///
/// `check` is side-effect-free with respect to the document but persists
/// session-record transitions as described in [`record_for_transition`].
pub struct AuthDetector {
    store: std::sync::Arc<SessionStore>,
    /// Last settled (non-Loading) state observed.
    last_state: Mutex<Option<AuthState>>,
}

impl AuthDetector {
    pub fn new(store: std::sync::Arc<SessionStore>) -> Self {
        Self {
            store,
            last_state: Mutex::new(None),
        }
    }

    /// Gather one probe from the live document.
    pub async fn probe(&self, session: &BrowserSession) -> Result<DomProbe> {
        let js = format!(
            "({})({}, {}, {})",
            PROBE_FN,
            as_js_array(CHALLENGE_SELECTORS),
            as_js_array(CHAT_ROW_SELECTORS),
            as_js_array(STRONG_AUTH_SELECTORS),
        );
        let value = session.eval(&js).await?;
        let probe = serde_json::from_value(value).unwrap_or_else(|e| {
            warn!(error = %e, "Auth probe returned unexpected shape, treating as empty document");
            DomProbe::default()
        });
        Ok(probe)
    }

    /// Probe, classify, and persist any state transition.
    ///
    /// `restored` marks the write for a transition into Authenticated as
    /// the result of a silent session restore.
    pub async fn check(
        &self,
        session: &BrowserSession,
        restored: bool,
    ) -> Result<(AuthState, AuthDetails)> {
        let probe = self.probe(session).await?;
        let (state, details) = classify(&probe);

        let mut last = self.last_state.lock().await;
        if let Some(record) = record_for_transition(*last, state, restored) {
            if record.authenticated {
                info!("Authentication detected");
            } else {
                warn!("Authentication lost (state: {:?})", state);
            }
            self.store.save(&record)?;
        }
        if state != AuthState::Loading {
            *last = Some(state);
        }
        drop(last);

        debug!(?state, ?details, "Authentication check");
        Ok((state, details))
    }

    /// Poll through the `Loading` state until the document settles,
    /// bounded by `policy`. Returns the first non-Loading observation, or
    /// the final Loading one once attempts are exhausted.
    pub async fn poll_until_settled(
        &self,
        session: &BrowserSession,
        restored: bool,
        policy: PollPolicy,
    ) -> Result<(AuthState, AuthDetails)> {
        let mut outcome = (AuthState::Loading, AuthDetails::default());
        for attempt in 0..policy.attempts.max(1) {
            outcome = self.check(session, restored).await?;
            if outcome.0 != AuthState::Loading {
                return Ok(outcome);
            }
            debug!(attempt = attempt + 1, "Document still loading");
            tokio::time::sleep(policy.interval()).await;
        }
        Ok(outcome)
    }

    /// Poll until the detector reports Authenticated, bounded by
    /// `policy`. Returns the final observation either way; the caller
    /// decides what a non-authenticated outcome means.
    pub async fn poll_until_authenticated(
        &self,
        session: &BrowserSession,
        restored: bool,
        policy: PollPolicy,
    ) -> Result<(AuthState, AuthDetails)> {
        let mut outcome = (AuthState::Loading, AuthDetails::default());
        for attempt in 0..policy.attempts.max(1) {
            outcome = self.check(session, restored).await?;
            if outcome.0 == AuthState::Authenticated {
                return Ok(outcome);
            }
            debug!(
                attempt = attempt + 1,
                state = ?outcome.0,
                "Not authenticated yet"
            );
            tokio::time::sleep(policy.interval()).await;
        }
        Ok(outcome)
    }

    /// Capture the visible login challenge as a PNG data URL.
    pub async fn capture_qr_code(&self, session: &BrowserSession) -> Result<Option<QrCode>> {
        let js = format!("({})({})", QR_CAPTURE_FN, as_js_array(CHALLENGE_SELECTORS));
        let value = session.eval(&js).await?;
        Ok(value.as_str().map(|data_url| QrCode {
            data_url: data_url.to_string(),
        }))
    }

    /// Last settled state, for status reporting without a live probe.
    pub async fn last_settled(&self) -> Option<AuthState> {
        *self.last_state.lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe(elements: u64, challenge: bool, rows: u64, strong: bool) -> DomProbe {
        DomProbe {
            element_count: elements,
            challenge_visible: challenge,
            chat_row_count: rows,
            strong_indicators: strong,
        }
    }

    #[test]
    fn test_small_document_is_loading() {
        let (state, _) = classify(&probe(10, false, 0, false));
        assert_eq!(state, AuthState::Loading);
    }

    #[test]
    fn test_loading_beats_challenge() {
        let (state, _) = classify(&probe(5, true, 0, false));
        assert_eq!(state, AuthState::Loading);
    }

    #[test]
    fn test_challenge_beats_chat_list() {
        // Stale chat rows still in the DOM must not override the challenge.
        let (state, details) = classify(&probe(500, true, 12, true));
        assert_eq!(state, AuthState::Unauthenticated);
        assert!(details.chat_list_matched);
    }

    #[test]
    fn test_chat_list_alone_authenticates() {
        let (state, _) = classify(&probe(500, false, 3, false));
        assert_eq!(state, AuthState::Authenticated);
    }

    #[test]
    fn test_strong_indicators_alone_authenticate() {
        let (state, details) = classify(&probe(500, false, 0, true));
        assert_eq!(state, AuthState::Authenticated);
        assert!(!details.chat_list_matched);
        assert!(details.strong_indicators_matched);
    }

    #[test]
    fn test_nothing_matched_is_indeterminate() {
        let (state, _) = classify(&probe(500, false, 0, false));
        assert_eq!(state, AuthState::Indeterminate);
    }

    #[test]
    fn test_transition_into_authenticated_writes() {
        let record = record_for_transition(None, AuthState::Authenticated, false).unwrap();
        assert!(record.authenticated);
        assert!(record.last_login.is_some());
    }

    #[test]
    fn test_reentering_authenticated_writes_nothing() {
        assert!(record_for_transition(
            Some(AuthState::Authenticated),
            AuthState::Authenticated,
            false
        )
        .is_none());
    }

    #[test]
    fn test_losing_authentication_clears_record() {
        let record = record_for_transition(
            Some(AuthState::Authenticated),
            AuthState::Unauthenticated,
            false,
        )
        .unwrap();
        assert!(!record.authenticated);
        assert!(record.last_login.is_none());
    }

    #[test]
    fn test_indeterminate_also_fails_closed() {
        let record = record_for_transition(
            Some(AuthState::Authenticated),
            AuthState::Indeterminate,
            false,
        )
        .unwrap();
        assert!(!record.authenticated);
    }

    #[test]
    fn test_loading_blip_writes_nothing() {
        assert!(
            record_for_transition(Some(AuthState::Authenticated), AuthState::Loading, false)
                .is_none()
        );
    }

    #[test]
    fn test_unauthenticated_from_cold_writes_nothing() {
        assert!(record_for_transition(None, AuthState::Unauthenticated, false).is_none());
    }

    #[test]
    fn test_restored_flag_carried_into_record() {
        let record = record_for_transition(None, AuthState::Authenticated, true).unwrap();
        assert!(record.restored);
    }

    #[tokio::test]
    async fn test_detector_persists_transition_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(SessionStore::new(dir.path().join("session.json")));
        let detector = AuthDetector::new(store.clone());

        // Simulate two identical authenticated observations through the
        // same transition logic the live check uses.
        let mut last = detector.last_state.lock().await;
        let first = record_for_transition(*last, AuthState::Authenticated, false);
        assert!(first.is_some());
        store.save(&first.unwrap()).unwrap();
        *last = Some(AuthState::Authenticated);
        let second = record_for_transition(*last, AuthState::Authenticated, false);
        assert!(second.is_none());
    }
}
