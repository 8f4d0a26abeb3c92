use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Browser launch failed: {0}")]
    BrowserLaunch(String),

    #[error("CDP error: {0}")]
    Cdp(String),

    #[error("No profile available: {0}")]
    ProfileUnavailable(String),

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("No active session")]
    NoSession,

    #[error("Chat not found: {0}")]
    ChatNotFound(String),

    #[error("Chat handle is stale: {0}")]
    StaleHandle(String),

    #[error("No chat is currently open")]
    NoActiveChat,

    #[error("Send timed out: {0}")]
    SendTimeout(String),

    #[error("Send rejected: {0}")]
    SendRejected(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Page structure mismatch: {0}")]
    Structural(String),

    #[error("{0}")]
    Other(String),
}

/// Coarse failure class for the boundary layer (HTTP, CLI exit codes).
///
/// `AuthRequired` maps to "please (re)authenticate", `Transient` to a
/// retryable 5xx-class response, `Permanent` to a 4xx-class caller error,
/// `Fatal` to a hard failure that requires restarting the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    AuthRequired,
    Transient,
    Permanent,
    Fatal,
}

impl Error {
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::NotAuthenticated | Error::NoSession => ErrorClass::AuthRequired,
            Error::Cdp(_)
            | Error::Timeout(_)
            | Error::SendTimeout(_)
            | Error::Structural(_)
            | Error::StaleHandle(_) => ErrorClass::Transient,
            Error::ChatNotFound(_)
            | Error::NoActiveChat
            | Error::SendRejected(_)
            | Error::Config(_)
            | Error::ProfileUnavailable(_) => ErrorClass::Permanent,
            Error::BrowserLaunch(_) | Error::Io(_) => ErrorClass::Fatal,
            Error::Json(_) | Error::Other(_) => ErrorClass::Permanent,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_errors_map_to_auth_required() {
        assert_eq!(Error::NotAuthenticated.class(), ErrorClass::AuthRequired);
        assert_eq!(Error::NoSession.class(), ErrorClass::AuthRequired);
    }

    #[test]
    fn test_caller_errors_are_permanent() {
        assert_eq!(
            Error::ChatNotFound("nobody".into()).class(),
            ErrorClass::Permanent
        );
        assert_eq!(Error::NoActiveChat.class(), ErrorClass::Permanent);
    }

    #[test]
    fn test_dom_waits_are_transient() {
        assert_eq!(
            Error::Timeout("chat list".into()).class(),
            ErrorClass::Transient
        );
        assert_eq!(
            Error::SendTimeout("compose box".into()).class(),
            ErrorClass::Transient
        );
    }

    #[test]
    fn test_process_failures_are_fatal() {
        assert_eq!(
            Error::BrowserLaunch("chrome not found".into()).class(),
            ErrorClass::Fatal
        );
    }
}
