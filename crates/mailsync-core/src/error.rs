use thiserror::Error;

/// Errors surfaced by the sync engine and its collaborators.
///
/// Nothing in this workspace retries automatically except the login step of a
/// session, and only for [`Error::Connection`].
#[derive(Debug, Error)]
pub enum Error {
    /// Transport failure: dial, TLS handshake, dropped connection.
    #[error("connection error: {0}")]
    Connection(String),

    /// The server rejected the credentials.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// SELECT failed for this mailbox name.
    #[error("mailbox not found: {0}")]
    MailboxNotFound(String),

    /// The server returned no message, or no body, for a requested identifier.
    #[error("message {uid} not found in {mailbox}")]
    MessageNotFound { mailbox: String, uid: u32 },

    /// Malformed header, date or address.
    #[error("parse error: {0}")]
    Parse(String),

    /// Store query or write failure.
    #[error("persistence error: {0}")]
    Persistence(#[from] sqlx::Error),

    /// The server answered a command with NO/BAD for a reason not covered above.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Mutation attempted through a `Mail` that was already deleted.
    #[error("message {uid} in {mailbox} was already deleted")]
    MessageDeleted { mailbox: String, uid: u32 },

    #[error("{operation} timed out")]
    Timeout { operation: &'static str },

    #[error("configuration error: {0}")]
    Config(String),

    /// A background producer died or its channel closed before completion.
    #[error("background task failed: {0}")]
    Task(String),
}

impl Error {
    /// Whether retrying the same operation could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Connection(_) | Error::Timeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::Error;

    #[test]
    fn only_transport_failures_are_transient() {
        assert!(Error::Connection("reset".to_string()).is_transient());
        assert!(Error::Timeout { operation: "fetch" }.is_transient());
        assert!(!Error::Auth("bad password".to_string()).is_transient());
        assert!(!Error::MailboxNotFound("Nope".to_string()).is_transient());
        assert!(!Error::Parse("bad date".to_string()).is_transient());
    }

    #[test]
    fn message_not_found_names_mailbox_and_uid() {
        let err = Error::MessageNotFound {
            mailbox: "INBOX".to_string(),
            uid: 7,
        };
        assert_eq!(err.to_string(), "message 7 not found in INBOX");
    }
}
