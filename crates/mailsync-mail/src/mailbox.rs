use tracing::debug;

use mailsync_core::Result;

use crate::protocol::{MailConnector, MailSession, MailboxDescriptor};
use crate::session::{MailClient, Streamed};

const LIST_BUFFER: usize = 10;

impl<C: MailConnector> MailClient<C> {
    /// Lists every mailbox under the root as it arrives from the server.
    pub fn mailbox_stream(&self) -> Streamed<MailboxDescriptor> {
        self.stream("list", LIST_BUFFER, |session, tx| {
            session.list("", "*", &tx)
        })
    }

    pub async fn mailboxes(&self) -> Result<Vec<MailboxDescriptor>> {
        let mailboxes = self.deadline("list", 1, self.mailbox_stream().collect()).await?;
        debug!(count = mailboxes.len(), "mailboxes listed");
        Ok(mailboxes)
    }
}
