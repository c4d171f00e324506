//! In-memory IMAP account and persistence double shared by the unit tests.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mailparse::MailHeaderMap;
use tokio::sync::mpsc;

use mailsync_core::{Email, EmailStore, Error, Result};

use crate::protocol::{
    FetchPart, FetchedMessage, Flag, FlagOp, MailConnector, MailSession, MailboxDescriptor,
    MailboxStatus, SearchCriteria, Uid,
};
use crate::{ImapConfig, MailClient};

pub(crate) const USERNAME: &str = "me@example.org";
pub(crate) const PASSWORD: &str = "secret";

pub(crate) fn config() -> ImapConfig {
    let mut config = ImapConfig::new("imap.example.org:993", USERNAME, PASSWORD, true);
    config.timeout = Some(Duration::from_secs(5));
    config.retry_backoff = Duration::from_millis(1);
    config
}

pub(crate) fn client(server: &FakeServer) -> MailClient<FakeServer> {
    MailClient::with_connector(config(), server.clone())
}

/// A single-part text/plain message.
pub(crate) fn message(from: &str, to: &str, subject: &str, date: &str, body: &str) -> Vec<u8> {
    format!(
        "From: {from}\r\nTo: {to}\r\nSubject: {subject}\r\nDate: {date}\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\r\n{body}\r\n"
    )
    .into_bytes()
}

/// A multipart/mixed message with one inline text part and one attachment.
pub(crate) fn message_with_attachment(date: &str, inline: &str, attached: &str) -> Vec<u8> {
    format!(
        "From: a@x.com\r\nTo: b@x.com\r\nSubject: report\r\nDate: {date}\r\n\
         MIME-Version: 1.0\r\n\
         Content-Type: multipart/mixed; boundary=\"sep\"\r\n\r\n\
         --sep\r\nContent-Type: text/plain; charset=utf-8\r\n\
         Content-Disposition: inline\r\n\r\n{inline}\r\n\
         --sep\r\nContent-Type: text/plain; name=\"notes.txt\"\r\n\
         Content-Disposition: attachment; filename=\"notes.txt\"\r\n\r\n{attached}\r\n\
         --sep--\r\n"
    )
    .into_bytes()
}

struct FakeMessage {
    uid: u32,
    raw: Vec<u8>,
    flags: Vec<Flag>,
}

struct FakeMailbox {
    name: String,
    selectable: bool,
    next_uid: u32,
    messages: Vec<FakeMessage>,
}

#[derive(Default)]
struct FakeState {
    mailboxes: Vec<FakeMailbox>,
    login_attempts: u32,
    logins: u32,
    logouts: u32,
    store_commands: u32,
    fetch_commands: u32,
    expunges: u32,
    failing_logins: u32,
    fail_expunge: bool,
    report_empty: bool,
    withheld: HashSet<u32>,
    stripped: HashSet<u32>,
    stall: Option<Duration>,
}

impl FakeState {
    fn mailbox_mut(&mut self, name: &str) -> Option<&mut FakeMailbox> {
        self.mailboxes.iter_mut().find(|mailbox| mailbox.name == name)
    }
}

/// Scripted IMAP account. Clones share state.
#[derive(Clone)]
pub(crate) struct FakeServer {
    state: Arc<Mutex<FakeState>>,
}

impl FakeServer {
    pub fn new() -> Self {
        let server = Self {
            state: Arc::new(Mutex::new(FakeState::default())),
        };
        server.add_mailbox("INBOX");
        server
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn add_mailbox(&self, name: &str) {
        self.push_mailbox(name, true);
    }

    pub fn add_container(&self, name: &str) {
        self.push_mailbox(name, false);
    }

    fn push_mailbox(&self, name: &str, selectable: bool) {
        self.lock().mailboxes.push(FakeMailbox {
            name: name.to_string(),
            selectable,
            next_uid: 1,
            messages: Vec::new(),
        });
    }

    pub fn append(&self, mailbox: &str, raw: Vec<u8>, seen: bool) -> Uid {
        let mut state = self.lock();
        let mailbox = state.mailbox_mut(mailbox).unwrap();
        let uid = mailbox.next_uid;
        mailbox.next_uid += 1;
        let flags = if seen { vec![Flag::Seen] } else { Vec::new() };
        mailbox.messages.push(FakeMessage { uid, raw, flags });
        Uid(uid)
    }

    pub fn flags(&self, mailbox: &str, uid: Uid) -> Vec<Flag> {
        let mut state = self.lock();
        let mailbox = state.mailbox_mut(mailbox).unwrap();
        mailbox
            .messages
            .iter()
            .find(|message| message.uid == uid.0)
            .map(|message| message.flags.clone())
            .unwrap_or_default()
    }

    pub fn contains(&self, mailbox: &str, uid: Uid) -> bool {
        let mut state = self.lock();
        let mailbox = state.mailbox_mut(mailbox).unwrap();
        mailbox.messages.iter().any(|message| message.uid == uid.0)
    }

    pub fn login_attempts(&self) -> u32 {
        self.lock().login_attempts
    }

    pub fn logins(&self) -> u32 {
        self.lock().logins
    }

    pub fn logouts(&self) -> u32 {
        self.lock().logouts
    }

    pub fn store_commands(&self) -> u32 {
        self.lock().store_commands
    }

    pub fn fetch_commands(&self) -> u32 {
        self.lock().fetch_commands
    }

    pub fn expunges(&self) -> u32 {
        self.lock().expunges
    }

    /// The next `count` logins fail at the transport level.
    pub fn fail_next_logins(&self, count: u32) {
        self.lock().failing_logins = count;
    }

    pub fn fail_expunge(&self) {
        self.lock().fail_expunge = true;
    }

    /// SELECT reports zero messages while SEARCH still sees them.
    pub fn report_empty(&self) {
        self.lock().report_empty = true;
    }

    /// Leaves `uid` out of every FETCH response.
    pub fn withhold(&self, uid: Uid) {
        self.lock().withheld.insert(uid.0);
    }

    /// Answers FETCH for `uid` without any section data.
    pub fn strip_body(&self, uid: Uid) {
        self.lock().stripped.insert(uid.0);
    }

    /// Every login blocks for `delay` first.
    pub fn stall(&self, delay: Duration) {
        self.lock().stall = Some(delay);
    }
}

impl MailConnector for FakeServer {
    type Session = FakeSession;

    fn login(&self, config: &ImapConfig) -> Result<FakeSession> {
        let stall = {
            let mut state = self.lock();
            state.login_attempts += 1;
            state.stall
        };
        if let Some(delay) = stall {
            std::thread::sleep(delay);
        }
        let mut state = self.lock();
        if state.failing_logins > 0 {
            state.failing_logins -= 1;
            return Err(Error::Connection("connection reset by peer".to_string()));
        }
        if config.username != USERNAME || config.password != PASSWORD {
            return Err(Error::Auth("[AUTHENTICATIONFAILED] invalid credentials".to_string()));
        }
        state.logins += 1;
        Ok(FakeSession {
            server: self.clone(),
            selected: None,
        })
    }
}

pub(crate) struct FakeSession {
    server: FakeServer,
    selected: Option<String>,
}

impl FakeSession {
    fn selected(&self) -> Result<String> {
        self.selected
            .clone()
            .ok_or_else(|| Error::Protocol("no mailbox selected".to_string()))
    }
}

/// The Date header's calendar day in its own offset, as SENTSINCE sees it.
fn sent_date(raw: &[u8]) -> Option<chrono::NaiveDate> {
    let (headers, _) = mailparse::parse_headers(raw).ok()?;
    let value = headers.get_first_value("Date")?;
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|date| date.date_naive())
}

fn header_section(raw: &[u8]) -> Vec<u8> {
    match raw.windows(4).position(|window| window == b"\r\n\r\n") {
        Some(pos) => raw[..pos + 4].to_vec(),
        None => raw.to_vec(),
    }
}

impl MailSession for FakeSession {
    fn select(&mut self, mailbox: &str) -> Result<MailboxStatus> {
        let mut state = self.server.lock();
        let report_empty = state.report_empty;
        match state.mailbox_mut(mailbox) {
            Some(found) if found.selectable => {
                let exists = if report_empty {
                    0
                } else {
                    found.messages.len() as u32
                };
                self.selected = Some(mailbox.to_string());
                Ok(MailboxStatus { exists })
            }
            _ => Err(Error::MailboxNotFound(mailbox.to_string())),
        }
    }

    fn search(&mut self, criteria: &SearchCriteria) -> Result<Vec<Uid>> {
        let selected = self.selected()?;
        let mut state = self.server.lock();
        let mailbox = state
            .mailbox_mut(&selected)
            .ok_or_else(|| Error::MailboxNotFound(selected.clone()))?;
        let uids = mailbox
            .messages
            .iter()
            .filter(|message| match criteria {
                SearchCriteria::All => true,
                SearchCriteria::Unseen => !message.flags.contains(&Flag::Seen),
                SearchCriteria::SentSince(since) => {
                    sent_date(&message.raw).is_some_and(|date| date >= *since)
                }
            })
            .map(|message| Uid(message.uid))
            .collect();
        Ok(uids)
    }

    fn fetch(
        &mut self,
        uids: &[Uid],
        part: FetchPart,
        out: &mpsc::Sender<FetchedMessage>,
    ) -> Result<()> {
        let selected = self.selected()?;
        let responses = {
            let mut state = self.server.lock();
            state.fetch_commands += 1;
            let withheld = state.withheld.clone();
            let stripped = state.stripped.clone();
            let mailbox = state
                .mailbox_mut(&selected)
                .ok_or_else(|| Error::MailboxNotFound(selected.clone()))?;
            mailbox
                .messages
                .iter()
                .filter(|message| uids.contains(&Uid(message.uid)))
                .filter(|message| !withheld.contains(&message.uid))
                .map(|message| {
                    let section = (!stripped.contains(&message.uid)).then(|| match part {
                        FetchPart::Header => header_section(&message.raw),
                        FetchPart::Full => message.raw.clone(),
                    });
                    let (header, body) = match part {
                        FetchPart::Header => (section, None),
                        FetchPart::Full => (None, section),
                    };
                    FetchedMessage {
                        uid: Uid(message.uid),
                        flags: message.flags.clone(),
                        header,
                        body,
                    }
                })
                .collect::<Vec<_>>()
        };
        for response in responses {
            out.blocking_send(response)
                .map_err(|_| crate::protocol::closed_stream())?;
        }
        Ok(())
    }

    fn store(&mut self, uids: &[Uid], op: FlagOp, flags: &[Flag]) -> Result<()> {
        let selected = self.selected()?;
        let mut state = self.server.lock();
        state.store_commands += 1;
        let mailbox = state
            .mailbox_mut(&selected)
            .ok_or_else(|| Error::MailboxNotFound(selected.clone()))?;
        for message in mailbox
            .messages
            .iter_mut()
            .filter(|message| uids.contains(&Uid(message.uid)))
        {
            for flag in flags {
                match op {
                    FlagOp::Add if !message.flags.contains(flag) => message.flags.push(flag.clone()),
                    FlagOp::Add => {}
                    FlagOp::Remove => message.flags.retain(|held| held != flag),
                }
            }
        }
        Ok(())
    }

    fn expunge(&mut self) -> Result<()> {
        let selected = self.selected()?;
        let mut state = self.server.lock();
        state.expunges += 1;
        if state.fail_expunge {
            return Err(Error::Protocol("EXPUNGE failed".to_string()));
        }
        let mailbox = state
            .mailbox_mut(&selected)
            .ok_or_else(|| Error::MailboxNotFound(selected.clone()))?;
        mailbox
            .messages
            .retain(|message| !message.flags.contains(&Flag::Deleted));
        Ok(())
    }

    fn list(
        &mut self,
        _reference: &str,
        _pattern: &str,
        out: &mpsc::Sender<MailboxDescriptor>,
    ) -> Result<()> {
        let names = self
            .server
            .lock()
            .mailboxes
            .iter()
            .map(|mailbox| MailboxDescriptor {
                name: mailbox.name.clone(),
                selectable: mailbox.selectable,
            })
            .collect::<Vec<_>>();
        for name in names {
            out.blocking_send(name)
                .map_err(|_| crate::protocol::closed_stream())?;
        }
        Ok(())
    }

    fn logout(self) -> Result<()> {
        self.server.lock().logouts += 1;
        Ok(())
    }
}

#[derive(Default)]
struct RecordingState {
    rows: Vec<Email>,
    insert_calls: u32,
    fail_inserts: bool,
}

/// Persistence double that keeps rows in memory and counts writes.
#[derive(Default)]
pub(crate) struct RecordingStore {
    state: Mutex<RecordingState>,
}

impl RecordingStore {
    pub fn insert_calls(&self) -> u32 {
        self.state.lock().unwrap().insert_calls
    }

    pub fn rows(&self) -> Vec<Email> {
        self.state.lock().unwrap().rows.clone()
    }

    pub fn seed(&self, email: Email) {
        self.state.lock().unwrap().rows.push(email);
    }

    pub fn fail_inserts(&self) {
        self.state.lock().unwrap().fail_inserts = true;
    }
}

#[async_trait]
impl EmailStore for RecordingStore {
    async fn max_sent_date(&self, mailbox: &str, account: &str) -> Result<Option<DateTime<Utc>>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .rows
            .iter()
            .filter(|email| email.mailbox == mailbox && email.account == account)
            .map(|email| email.sent_at)
            .max())
    }

    async fn bulk_insert(&self, emails: &[Email]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.insert_calls += 1;
        if state.fail_inserts {
            return Err(Error::Persistence(sqlx::Error::Protocol(
                "disk I/O error".to_string(),
            )));
        }
        state.rows.extend_from_slice(emails);
        Ok(())
    }
}
