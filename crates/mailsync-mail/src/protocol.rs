//! The protocol-client capability the engine is written against.
//!
//! Everything above this seam talks in mailboxes, UIDs, search criteria and
//! flag operations; the IMAP wire format lives behind [`MailSession`].

use std::fmt;

use chrono::NaiveDate;
use tokio::sync::mpsc;

use mailsync_core::{Error, Result};

use crate::ImapConfig;

/// A UID within the currently selected mailbox of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Uid(pub u32);

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxDescriptor {
    pub name: String,
    /// False for `\Noselect` containers.
    pub selectable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MailboxStatus {
    pub exists: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchCriteria {
    All,
    Unseen,
    /// Messages whose Date header falls on or after this day.
    SentSince(NaiveDate),
}

impl SearchCriteria {
    pub fn to_imap(&self) -> String {
        match self {
            SearchCriteria::All => "ALL".to_string(),
            SearchCriteria::Unseen => "UNSEEN".to_string(),
            SearchCriteria::SentSince(date) => format!("SENTSINCE {}", date.format("%-d-%b-%Y")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPart {
    Header,
    Full,
}

impl FetchPart {
    /// PEEK keeps the server from setting `\Seen` as a side effect.
    pub fn to_imap(self) -> &'static str {
        match self {
            FetchPart::Header => "(UID FLAGS BODY.PEEK[HEADER])",
            FetchPart::Full => "(UID FLAGS BODY.PEEK[])",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedMessage {
    pub uid: Uid,
    pub flags: Vec<Flag>,
    pub header: Option<Vec<u8>>,
    pub body: Option<Vec<u8>>,
}

impl FetchedMessage {
    pub fn is_seen(&self) -> bool {
        self.flags.contains(&Flag::Seen)
    }

    /// Takes the bytes for the requested section, if the server returned them.
    pub fn into_section(self, part: FetchPart) -> Option<Vec<u8>> {
        match part {
            FetchPart::Header => self.header,
            FetchPart::Full => self.body,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Flag {
    Seen,
    Answered,
    Flagged,
    Deleted,
    Draft,
    Custom(String),
}

impl Flag {
    pub fn to_imap(&self) -> String {
        match self {
            Flag::Seen => "\\Seen".to_string(),
            Flag::Answered => "\\Answered".to_string(),
            Flag::Flagged => "\\Flagged".to_string(),
            Flag::Deleted => "\\Deleted".to_string(),
            Flag::Draft => "\\Draft".to_string(),
            Flag::Custom(name) => name.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagOp {
    Add,
    Remove,
}

/// Runs of consecutive UIDs collapse to `a:b`. Input must be ascending.
pub(crate) fn uid_set(uids: &[Uid]) -> String {
    let mut parts = Vec::new();
    let mut iter = uids.iter().map(|uid| uid.0).peekable();
    while let Some(start) = iter.next() {
        let mut end = start;
        while let Some(&next) = iter.peek() {
            if end.checked_add(1) != Some(next) {
                break;
            }
            end = next;
            iter.next();
        }
        if start == end {
            parts.push(start.to_string());
        } else {
            parts.push(format!("{}:{}", start, end));
        }
    }
    parts.join(",")
}

pub(crate) fn store_query(op: FlagOp, flags: &[Flag]) -> String {
    let sign = match op {
        FlagOp::Add => '+',
        FlagOp::Remove => '-',
    };
    let flags = flags
        .iter()
        .map(Flag::to_imap)
        .collect::<Vec<_>>()
        .join(" ");
    format!("{}FLAGS.SILENT ({})", sign, flags)
}

pub(crate) fn closed_stream() -> Error {
    Error::Task("stream receiver dropped before the producer finished".to_string())
}

/// Opens authenticated sessions.
pub trait MailConnector: Send + Sync + 'static {
    type Session: MailSession;

    /// Connects and authenticates. Transport failures are `Error::Connection`,
    /// rejected credentials are `Error::Auth`.
    fn login(&self, config: &ImapConfig) -> Result<Self::Session>;
}

/// One authenticated session. All calls block until the server answers.
pub trait MailSession: Send + 'static {
    /// Fails with `Error::MailboxNotFound` when the server refuses the name.
    fn select(&mut self, mailbox: &str) -> Result<MailboxStatus>;

    fn search(&mut self, criteria: &SearchCriteria) -> Result<Vec<Uid>>;

    /// Sends one item per message the server returned.
    fn fetch(
        &mut self,
        uids: &[Uid],
        part: FetchPart,
        out: &mpsc::Sender<FetchedMessage>,
    ) -> Result<()>;

    fn store(&mut self, uids: &[Uid], op: FlagOp, flags: &[Flag]) -> Result<()>;

    fn expunge(&mut self) -> Result<()>;

    fn list(
        &mut self,
        reference: &str,
        pattern: &str,
        out: &mpsc::Sender<MailboxDescriptor>,
    ) -> Result<()>;

    fn logout(self) -> Result<()>;
}
