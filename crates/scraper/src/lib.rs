pub mod auth;
pub mod chats;
pub mod messages;
pub mod selectors;

pub use auth::{classify, record_for_transition, AuthDetector, DomProbe};
pub use chats::{filter_rows, infer_kind, validate_chat_name, ChatCache, ChatHandle, RawChatRow};
pub use messages::{map_read_status, normalize_timestamp, parse_message, MessageReader, RawMessage};
