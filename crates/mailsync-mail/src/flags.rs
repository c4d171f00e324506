use tracing::debug;

use mailsync_core::Result;

use crate::mailbox_or_inbox;
use crate::protocol::{Flag, FlagOp, MailConnector, MailSession, Uid};
use crate::session::MailClient;

impl<C: MailConnector> MailClient<C> {
    /// Adds or removes `flags` on one message with a single UID STORE.
    pub async fn store(&self, mailbox: &str, uid: Uid, op: FlagOp, flags: &[Flag]) -> Result<()> {
        let mailbox = mailbox_or_inbox(mailbox);
        let flags = flags.to_vec();
        self.run("store", move |session| {
            session.select(&mailbox)?;
            session.store(&[uid], op, &flags)?;
            debug!(mailbox = %mailbox, uid = uid.0, ?op, "flags stored");
            Ok(())
        })
        .await
    }

    /// Marks the message `\Deleted` and expunges in the same session.
    ///
    /// An expunge failure is returned as-is. The message then stays on the
    /// server with `\Deleted` set.
    pub async fn delete_mail(&self, mailbox: &str, uid: Uid) -> Result<()> {
        let mailbox = mailbox_or_inbox(mailbox);
        self.run("delete", move |session| {
            session.select(&mailbox)?;
            session.store(&[uid], FlagOp::Add, &[Flag::Deleted])?;
            session.expunge()?;
            debug!(mailbox = %mailbox, uid = uid.0, "message expunged");
            Ok(())
        })
        .await
    }
}
