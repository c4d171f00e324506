use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use mailsync_core::Result;

use crate::mailbox_or_inbox;
use crate::protocol::{MailConnector, MailSession, SearchCriteria, Uid};
use crate::session::MailClient;

impl<C: MailConnector> MailClient<C> {
    /// UIDs without `\Seen`.
    pub async fn find_unread(&self, mailbox: &str) -> Result<Vec<Uid>> {
        self.search(mailbox, SearchCriteria::Unseen).await
    }

    /// UIDs of everything sent after `since`, plus some older mail; every UID
    /// when `since` is `None`. Callers that need a strict cutoff filter the
    /// fetched messages again.
    pub async fn find_since(&self, mailbox: &str, since: Option<DateTime<Utc>>) -> Result<Vec<Uid>> {
        let criteria = match since {
            Some(since) => SearchCriteria::SentSince(sent_since_day(since)),
            None => SearchCriteria::All,
        };
        self.search(mailbox, criteria).await
    }

    /// Selects `mailbox` and runs one UID SEARCH. Results are ascending.
    pub async fn search(&self, mailbox: &str, criteria: SearchCriteria) -> Result<Vec<Uid>> {
        let mailbox = mailbox_or_inbox(mailbox);
        self.run("search", move |session| {
            session.select(&mailbox)?;
            let mut uids = session.search(&criteria)?;
            uids.sort_unstable();
            debug!(mailbox = %mailbox, query = %criteria.to_imap(), count = uids.len(), "search");
            Ok(uids)
        })
        .await
    }
}

/// SENTSINCE compares the calendar day in the sender's own zone. Offsets
/// stay within a day of UTC, so starting one day early never misses a
/// message sent after `since`.
fn sent_since_day(since: DateTime<Utc>) -> chrono::NaiveDate {
    (since - Duration::days(1)).date_naive()
}
