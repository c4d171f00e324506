//! IMAP side of the sync: sessions, search, fetch, flag changes, message
//! assembly and the per-mailbox import loop.

use std::fmt;
use std::time::Duration;

use mailsync_core::{Error, Result};

mod assemble;
mod fetch;
mod flags;
mod imap_backend;
mod mail;
mod mailbox;
mod protocol;
mod search;
mod session;
mod sync;
#[cfg(test)]
mod testing;

pub use assemble::{ADDRESS_HEADS, Address, Header, flatten_addresses, inline_content, parse_header};
pub use fetch::RawMessage;
pub use imap_backend::{ImapConnector, ImapSession};
pub use mail::Mail;
pub use protocol::{
    FetchPart, FetchedMessage, Flag, FlagOp, MailConnector, MailSession, MailboxDescriptor,
    MailboxStatus, SearchCriteria, Uid,
};
pub use session::{MailClient, Streamed};
pub use sync::{MailboxOutcome, SyncEngine, SyncReport};

const DEFAULT_TLS_PORT: u16 = 993;
const DEFAULT_PLAIN_PORT: u16 = 143;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_CONNECT_RETRIES: u32 = 2;
const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(500);
const DEFAULT_FETCH_CHUNK_SIZE: usize = 200;

/// Credentials and transport settings for one remote account.
#[derive(Clone)]
pub struct ImapConfig {
    /// `host` or `host:port`.
    pub address: String,
    pub username: String,
    pub password: String,
    pub is_tls: bool,
    pub skip_tls_verify: bool,
    /// Deadline for one remote operation, login through logout. Batch
    /// fetches get it once per chunk. Also bounds every socket read and
    /// write. `None` waits forever.
    pub timeout: Option<Duration>,
    /// Extra login attempts after a connection failure.
    pub connect_retries: u32,
    /// Delay before the first retry; doubles on each further attempt.
    pub retry_backoff: Duration,
    /// Messages per UID FETCH command in a batch.
    pub fetch_chunk_size: usize,
}

impl fmt::Debug for ImapConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImapConfig")
            .field("address", &self.address)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("is_tls", &self.is_tls)
            .field("skip_tls_verify", &self.skip_tls_verify)
            .field("timeout", &self.timeout)
            .field("connect_retries", &self.connect_retries)
            .field("retry_backoff", &self.retry_backoff)
            .field("fetch_chunk_size", &self.fetch_chunk_size)
            .finish()
    }
}

impl ImapConfig {
    pub fn new(
        address: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        is_tls: bool,
    ) -> Self {
        Self {
            address: address.into(),
            username: username.into(),
            password: password.into(),
            is_tls,
            skip_tls_verify: false,
            timeout: Some(DEFAULT_TIMEOUT),
            connect_retries: DEFAULT_CONNECT_RETRIES,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            fetch_chunk_size: DEFAULT_FETCH_CHUNK_SIZE,
        }
    }

    /// Splits `address` into host and port, defaulting the port by transport.
    pub fn host_port(&self) -> Result<(String, u16)> {
        let address = self.address.trim();
        if address.is_empty() {
            return Err(Error::Config("imap address is empty".to_string()));
        }
        let default_port = if self.is_tls {
            DEFAULT_TLS_PORT
        } else {
            DEFAULT_PLAIN_PORT
        };
        match address.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() => {
                let port = port.parse::<u16>().map_err(|_| {
                    Error::Config(format!("invalid port in imap address {:?}", address))
                })?;
                Ok((host.to_string(), port))
            }
            Some(_) => Err(Error::Config(format!(
                "missing host in imap address {:?}",
                address
            ))),
            None => Ok((address.to_string(), default_port)),
        }
    }
}

/// An empty mailbox name means INBOX.
pub(crate) fn mailbox_or_inbox(name: &str) -> String {
    if name.trim().is_empty() {
        "INBOX".to_string()
    } else {
        name.to_string()
    }
}
