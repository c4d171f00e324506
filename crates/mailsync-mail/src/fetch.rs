use std::collections::HashMap;

use tracing::debug;

use mailsync_core::{Error, Result};

use crate::assemble::{Header, inline_content, parse_header};
use crate::mailbox_or_inbox;
use crate::protocol::{FetchPart, FetchedMessage, Flag, MailConnector, MailSession, Uid};
use crate::session::MailClient;

/// MIME bytes of one fetched message, either the header block or the whole
/// message depending on what was asked for.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub uid: Uid,
    pub flags: Vec<Flag>,
    bytes: Vec<u8>,
}

impl RawMessage {
    pub fn new(uid: Uid, flags: Vec<Flag>, bytes: Vec<u8>) -> Self {
        Self { uid, flags, bytes }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn is_seen(&self) -> bool {
        self.flags.contains(&Flag::Seen)
    }

    pub fn header(&self, heads: &[&str]) -> Result<Header> {
        parse_header(&self.bytes, heads)
    }

    pub fn inline_content(&self) -> Result<Vec<u8>> {
        inline_content(&self.bytes)
    }
}

fn not_found(mailbox: &str, uid: Uid) -> Error {
    Error::MessageNotFound {
        mailbox: mailbox.to_string(),
        uid: uid.0,
    }
}

fn into_raw(message: FetchedMessage, part: FetchPart, mailbox: &str) -> Result<RawMessage> {
    let uid = message.uid;
    let flags = message.flags.clone();
    let bytes = message
        .into_section(part)
        .ok_or_else(|| not_found(mailbox, uid))?;
    Ok(RawMessage::new(uid, flags, bytes))
}

impl<C: MailConnector> MailClient<C> {
    /// Fetches the header block or the full message for one UID.
    pub async fn fetch_one(&self, uid: Uid, mailbox: &str, part: FetchPart) -> Result<RawMessage> {
        let mailbox = mailbox_or_inbox(mailbox);
        let name = mailbox.clone();
        let stream = self.stream("fetch", 1, move |session, tx| {
            session.select(&name)?;
            session.fetch(&[uid], part, &tx)
        });
        let fetched = self.deadline("fetch", 1, stream.collect()).await?;
        let message = fetched
            .into_iter()
            .find(|message| message.uid == uid)
            .ok_or_else(|| not_found(&mailbox, uid))?;
        into_raw(message, part, &mailbox)
    }

    /// Fetches full messages for `uids` inside one session, at most
    /// `fetch_chunk_size` per command.
    ///
    /// Returns an empty batch when the mailbox reports no messages on
    /// select. Otherwise every requested UID must come back with a body.
    /// Results are in ascending UID order.
    pub async fn fetch_batch(&self, mailbox: &str, uids: &[Uid]) -> Result<Vec<RawMessage>> {
        if uids.is_empty() {
            return Ok(Vec::new());
        }
        let mailbox = mailbox_or_inbox(mailbox);
        let mut requested = uids.to_vec();
        requested.sort_unstable();
        requested.dedup();

        let name = mailbox.clone();
        let wanted = requested.clone();
        let chunk_size = self.config().fetch_chunk_size.max(1);
        let chunks = requested.len().div_ceil(chunk_size);
        let stream = self.stream("fetch", requested.len(), move |session, tx| {
            let status = session.select(&name)?;
            if status.exists > 0 {
                for chunk in wanted.chunks(chunk_size) {
                    debug!(mailbox = %name, count = chunk.len(), "uid fetch");
                    session.fetch(chunk, FetchPart::Full, &tx)?;
                }
            }
            Ok(status.exists)
        });
        let (fetched, exists) = self
            .deadline("fetch", chunks, stream.collect_all())
            .await?;
        if exists == 0 {
            debug!(mailbox = %mailbox, "mailbox empty at fetch time");
            return Ok(Vec::new());
        }

        let mut by_uid: HashMap<Uid, FetchedMessage> = fetched
            .into_iter()
            .map(|message| (message.uid, message))
            .collect();
        let batch = requested
            .iter()
            .map(|&uid| {
                let message = by_uid.remove(&uid).ok_or_else(|| not_found(&mailbox, uid))?;
                into_raw(message, FetchPart::Full, &mailbox)
            })
            .collect::<Result<Vec<_>>>()?;
        debug!(mailbox = %mailbox, count = batch.len(), "fetched batch");
        Ok(batch)
    }
}
