pub mod config;
pub mod error;
pub mod paths;
pub mod types;

pub use config::{Config, PollPolicy};
pub use error::{Error, ErrorClass, Result};
pub use paths::Paths;
pub use types::{
    AuthDetails, AuthState, ChatInfo, ChatKind, Message, MessageBatch, MessageQuery, QrCode,
    ReadStatus, SendReceipt, SessionRecord, SessionStartState, StartOutcome, StatusReport,
    UnreadSummary,
};
