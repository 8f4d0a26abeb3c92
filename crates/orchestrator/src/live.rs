//! The live automation session: everything that touches the DOM.
//!
//! All of it sits behind one `tokio::sync::Mutex` owned by the
//! orchestrator — the single-writer boundary. The remote UI cannot be
//! safely interleaved (clicking a chat row mid-extraction is undefined),
//! so foreground operations and the background monitor alike must hold
//! the lock for the full duration of their DOM work.

use wabridge_browser::BrowserSession;
use wabridge_scraper::{ChatCache, MessageReader};

pub struct LiveSession {
    pub browser: BrowserSession,
    pub cache: ChatCache,
    pub reader: MessageReader,
    /// Name of the conversation currently opened by us, if any.
    pub active_chat: Option<String>,
}

impl LiveSession {
    pub fn new(browser: BrowserSession, cache: ChatCache, reader: MessageReader) -> Self {
        Self {
            browser,
            cache,
            reader,
            active_chat: None,
        }
    }
}
