//! Incremental import: for each mailbox, fetch what is newer than the
//! newest stored record and write it in one batch.

use chrono::{DateTime, Utc};
use tracing::{debug, error, info};

use mailsync_core::{Email, EmailStore, Error, Result};

use crate::imap_backend::ImapConnector;
use crate::protocol::MailConnector;
use crate::session::MailClient;

#[derive(Debug)]
pub struct MailboxOutcome {
    pub mailbox: String,
    /// Rows written for this mailbox.
    pub result: Result<usize>,
}

#[derive(Debug, Default)]
pub struct SyncReport {
    pub outcomes: Vec<MailboxOutcome>,
}

impl SyncReport {
    pub fn imported(&self) -> usize {
        self.outcomes
            .iter()
            .filter_map(|outcome| outcome.result.as_ref().ok())
            .sum()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &Error)> {
        self.outcomes.iter().filter_map(|outcome| {
            outcome
                .result
                .as_ref()
                .err()
                .map(|err| (outcome.mailbox.as_str(), err))
        })
    }

    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }

    /// The first failed mailbox's error, if any mailbox failed.
    pub fn into_result(self) -> Result<usize> {
        let imported = self.imported();
        for outcome in self.outcomes {
            outcome.result?;
        }
        Ok(imported)
    }
}

/// Drives one sync run over every selectable mailbox of an account.
pub struct SyncEngine<S, C: MailConnector = ImapConnector> {
    client: MailClient<C>,
    store: S,
}

impl<S: EmailStore, C: MailConnector> SyncEngine<S, C> {
    pub fn new(client: MailClient<C>, store: S) -> Self {
        Self { client, store }
    }

    pub fn client(&self) -> &MailClient<C> {
        &self.client
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Processes every mailbox once. Listing failures abort the run; a
    /// failure inside one mailbox is recorded and the run moves on.
    pub async fn sync(&self) -> Result<SyncReport> {
        let account = self.client.account().to_string();
        let mailboxes = self.client.mailboxes().await?;
        let mut report = SyncReport::default();
        for mailbox in mailboxes {
            if !mailbox.selectable {
                debug!(mailbox = %mailbox.name, "skipping container");
                continue;
            }
            let result = self.sync_mailbox(&mailbox.name, &account).await;
            match &result {
                Ok(count) => info!(mailbox = %mailbox.name, imported = count, "mailbox synced"),
                Err(err) => error!(mailbox = %mailbox.name, error = %err, "mailbox sync failed"),
            }
            report.outcomes.push(MailboxOutcome {
                mailbox: mailbox.name,
                result,
            });
        }
        Ok(report)
    }

    /// Imports everything in `mailbox` newer than its watermark. Returns the
    /// number of rows written.
    pub async fn sync_mailbox(&self, mailbox: &str, account: &str) -> Result<usize> {
        let watermark = self.store.max_sent_date(mailbox, account).await?;
        debug!(mailbox, ?watermark, "watermark");

        let mails = self.client.last_mails(mailbox, watermark).await?;
        let emails = mails
            .iter()
            .filter(|mail| is_after_watermark(mail.date, watermark))
            .map(|mail| mail.to_email(account))
            .collect::<Result<Vec<Email>>>()?;
        if emails.is_empty() {
            return Ok(0);
        }
        self.store.bulk_insert(&emails).await?;
        Ok(emails.len())
    }
}

/// SENTSINCE matches whole days, so anything at or before the watermark has
/// already been imported.
fn is_after_watermark(sent: Option<DateTime<Utc>>, watermark: Option<DateTime<Utc>>) -> bool {
    match (sent, watermark) {
        (Some(sent), Some(watermark)) => sent > watermark,
        (Some(_), None) => true,
        (None, _) => false,
    }
}
