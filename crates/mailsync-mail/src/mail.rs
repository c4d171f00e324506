use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use mailsync_core::{Email, Error, Result};

use crate::assemble::{ADDRESS_HEADS, Address, flatten_addresses};
use crate::fetch::RawMessage;
use crate::imap_backend::ImapConnector;
use crate::mailbox_or_inbox;
use crate::protocol::{FetchPart, Flag, FlagOp, MailConnector, Uid};
use crate::session::MailClient;

/// One remote message, loaded lazily through the client that found it.
///
/// A fresh `Mail` only knows its UID and mailbox. Headers and body are two
/// separate fetches. After [`delete`](Self::delete) succeeds the object is
/// inert: loads and flag changes fail with [`Error::MessageDeleted`].
pub struct Mail<'a, C: MailConnector = ImapConnector> {
    client: &'a MailClient<C>,
    pub uid: Uid,
    pub mailbox: String,
    pub date: Option<DateTime<Utc>>,
    pub subject: String,
    pub heads: HashMap<String, Vec<Address>>,
    pub content: Vec<u8>,
    pub seen: bool,
    deleted: bool,
}

impl<C: MailConnector> fmt::Debug for Mail<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mail")
            .field("uid", &self.uid)
            .field("mailbox", &self.mailbox)
            .field("date", &self.date)
            .field("subject", &self.subject)
            .field("heads", &self.heads)
            .field("content_len", &self.content.len())
            .field("seen", &self.seen)
            .field("deleted", &self.deleted)
            .finish()
    }
}

impl<'a, C: MailConnector> Mail<'a, C> {
    pub fn new(client: &'a MailClient<C>, mailbox: &str, uid: Uid) -> Self {
        Self {
            client,
            uid,
            mailbox: mailbox_or_inbox(mailbox),
            date: None,
            subject: String::new(),
            heads: HashMap::new(),
            content: Vec::new(),
            seen: false,
            deleted: false,
        }
    }

    /// Builds a fully loaded `Mail` from a full-message fetch.
    pub(crate) fn assembled(client: &'a MailClient<C>, mailbox: &str, raw: &RawMessage) -> Result<Self> {
        let header = raw.header(&ADDRESS_HEADS)?;
        let content = raw.inline_content()?;
        let mut mail = Self::new(client, mailbox, raw.uid);
        mail.date = Some(header.date);
        mail.subject = header.subject;
        mail.heads = header.addresses;
        mail.content = content;
        mail.seen = raw.is_seen();
        Ok(mail)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    fn ensure_live(&self) -> Result<()> {
        if self.deleted {
            return Err(Error::MessageDeleted {
                mailbox: self.mailbox.clone(),
                uid: self.uid.0,
            });
        }
        Ok(())
    }

    /// Fetches the header block and fills date, subject and `heads`.
    /// Nothing is updated unless every requested header parses.
    pub async fn load_header(&mut self, heads: &[&str]) -> Result<()> {
        self.ensure_live()?;
        let raw = self
            .client
            .fetch_one(self.uid, &self.mailbox, FetchPart::Header)
            .await?;
        let header = raw.header(heads)?;
        self.date = Some(header.date);
        self.subject = header.subject;
        self.heads = header.addresses;
        self.seen = raw.is_seen();
        Ok(())
    }

    /// Fetches the full message and keeps its inline parts as `content`.
    pub async fn load_body(&mut self) -> Result<()> {
        self.ensure_live()?;
        let raw = self
            .client
            .fetch_one(self.uid, &self.mailbox, FetchPart::Full)
            .await?;
        self.content = raw.inline_content()?;
        self.seen = raw.is_seen();
        Ok(())
    }

    /// Comma-joined addresses for a loaded header; empty if it was not loaded.
    pub fn heads_address_as_string(&self, head: &str) -> String {
        self.heads
            .get(head)
            .map(|list| flatten_addresses(list))
            .unwrap_or_default()
    }

    pub async fn set_read(&mut self, read: bool) -> Result<()> {
        self.ensure_live()?;
        let op = if read { FlagOp::Add } else { FlagOp::Remove };
        self.client
            .store(&self.mailbox, self.uid, op, &[Flag::Seen])
            .await?;
        self.seen = read;
        Ok(())
    }

    /// Removes the message from the server. Calling it again is a no-op.
    pub async fn delete(&mut self) -> Result<()> {
        if self.deleted {
            debug!(mailbox = %self.mailbox, uid = self.uid.0, "already deleted");
            return Ok(());
        }
        self.client.delete_mail(&self.mailbox, self.uid).await?;
        self.deleted = true;
        Ok(())
    }

    /// Maps a loaded message to a new persisted record for `account`.
    pub fn to_email(&self, account: &str) -> Result<Email> {
        let sent_at = self.date.ok_or_else(|| {
            Error::Parse(format!("message {} in {} has no loaded date", self.uid, self.mailbox))
        })?;
        Ok(Email {
            id: Uuid::new_v4(),
            from: self.heads_address_as_string("From"),
            to: self.heads_address_as_string("To"),
            cc: self.heads_address_as_string("Cc"),
            subject: self.subject.clone(),
            sent_at,
            body: String::from_utf8_lossy(&self.content).into_owned(),
            mailbox: self.mailbox.clone(),
            account: account.to_string(),
            tags: String::new(),
            is_read: self.seen,
        })
    }
}

impl<C: MailConnector> MailClient<C> {
    /// Unread messages as lazy `Mail`s, at most `limit` of them, lowest UID first.
    pub async fn unread_mails(&self, mailbox: &str, limit: usize) -> Result<Vec<Mail<'_, C>>> {
        let mailbox = mailbox_or_inbox(mailbox);
        let uids = self.find_unread(&mailbox).await?;
        Ok(uids
            .into_iter()
            .take(limit)
            .map(|uid| Mail::new(self, &mailbox, uid))
            .collect())
    }

    /// Fully assembled messages found by [`find_since`](Self::find_since).
    /// May include some sent before `since`.
    pub async fn last_mails(
        &self,
        mailbox: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Mail<'_, C>>> {
        let mailbox = mailbox_or_inbox(mailbox);
        let uids = self.find_since(&mailbox, since).await?;
        if uids.is_empty() {
            return Ok(Vec::new());
        }
        let batch = self.fetch_batch(&mailbox, &uids).await?;
        batch
            .iter()
            .map(|raw| Mail::assembled(self, &mailbox, raw))
            .collect()
    }
}
