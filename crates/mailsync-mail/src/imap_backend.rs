//! [`MailConnector`] over the `imap` crate.

use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use native_tls::TlsConnector;
use tokio::sync::mpsc;
use tracing::debug;

use mailsync_core::{Error, Result};

use crate::ImapConfig;
use crate::protocol::{
    FetchPart, FetchedMessage, Flag, FlagOp, MailConnector, MailSession, MailboxDescriptor,
    MailboxStatus, SearchCriteria, Uid, closed_stream, store_query, uid_set,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct ImapConnector;

pub struct ImapSession {
    inner: imap::Session<imap::Connection>,
}

impl MailConnector for ImapConnector {
    type Session = ImapSession;

    fn login(&self, config: &ImapConfig) -> Result<ImapSession> {
        let (host, port) = config.host_port()?;
        debug!(host = %host, port, tls = config.is_tls, "imap connect");
        let stream = open_stream(&host, port, config)?;
        let mut client = imap::Client::new(stream);
        client.read_greeting().map_err(command_error)?;
        let inner = client
            .login(&config.username, &config.password)
            .map_err(|(err, _)| login_error(err))?;
        debug!(host = %host, "imap login ok");
        Ok(ImapSession { inner })
    }
}

/// A socket whose reads and writes give up after `config.timeout`, so a
/// stalled server fails the call instead of pinning the worker thread.
fn open_stream(host: &str, port: u16, config: &ImapConfig) -> Result<imap::Connection> {
    let tcp = connect_tcp(host, port, config.timeout)?;
    tcp.set_read_timeout(config.timeout)
        .and_then(|()| tcp.set_write_timeout(config.timeout))
        .map_err(|err| Error::Connection(err.to_string()))?;
    if !config.is_tls {
        return Ok(Box::new(tcp));
    }
    let mut builder = TlsConnector::builder();
    if config.skip_tls_verify {
        builder.danger_accept_invalid_certs(true);
        builder.danger_accept_invalid_hostnames(true);
    }
    let connector = builder
        .build()
        .map_err(|err| Error::Connection(err.to_string()))?;
    let tls = connector
        .connect(host, tcp)
        .map_err(|err| Error::Connection(format!("tls handshake with {}: {}", host, err)))?;
    Ok(Box::new(tls))
}

fn connect_tcp(host: &str, port: u16, timeout: Option<Duration>) -> Result<TcpStream> {
    let Some(timeout) = timeout else {
        return TcpStream::connect((host, port)).map_err(|err| Error::Connection(err.to_string()));
    };
    let addrs = (host, port)
        .to_socket_addrs()
        .map_err(|err| Error::Connection(format!("resolving {}: {}", host, err)))?;
    let mut last = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(tcp) => return Ok(tcp),
            Err(err) => last = Some(err),
        }
    }
    Err(Error::Connection(match last {
        Some(err) => err.to_string(),
        None => format!("{} resolved to no addresses", host),
    }))
}

impl MailSession for ImapSession {
    fn select(&mut self, mailbox: &str) -> Result<MailboxStatus> {
        let selected = self.inner.select(mailbox).map_err(|err| {
            if is_transport(&err) {
                Error::Connection(err.to_string())
            } else {
                Error::MailboxNotFound(mailbox.to_string())
            }
        })?;
        Ok(MailboxStatus {
            exists: selected.exists,
        })
    }

    fn search(&mut self, criteria: &SearchCriteria) -> Result<Vec<Uid>> {
        let uids = self
            .inner
            .uid_search(criteria.to_imap())
            .map_err(command_error)?;
        Ok(uids.into_iter().map(Uid).collect())
    }

    fn fetch(
        &mut self,
        uids: &[Uid],
        part: FetchPart,
        out: &mpsc::Sender<FetchedMessage>,
    ) -> Result<()> {
        if uids.is_empty() {
            return Ok(());
        }
        let fetches = self
            .inner
            .uid_fetch(uid_set(uids), part.to_imap())
            .map_err(command_error)?;
        for fetch in fetches.iter() {
            let Some(uid) = fetch.uid else {
                continue;
            };
            let message = FetchedMessage {
                uid: Uid(uid),
                flags: fetch.flags().iter().filter_map(flag_from_imap).collect(),
                header: fetch.header().map(<[u8]>::to_vec),
                body: fetch.body().map(<[u8]>::to_vec),
            };
            out.blocking_send(message).map_err(|_| closed_stream())?;
        }
        Ok(())
    }

    fn store(&mut self, uids: &[Uid], op: FlagOp, flags: &[Flag]) -> Result<()> {
        self.inner
            .uid_store(uid_set(uids), store_query(op, flags))
            .map_err(command_error)?;
        Ok(())
    }

    fn expunge(&mut self) -> Result<()> {
        self.inner.expunge().map_err(command_error)?;
        Ok(())
    }

    fn list(
        &mut self,
        reference: &str,
        pattern: &str,
        out: &mpsc::Sender<MailboxDescriptor>,
    ) -> Result<()> {
        let reference = (!reference.is_empty()).then_some(reference);
        let names = self
            .inner
            .list(reference, Some(pattern))
            .map_err(command_error)?;
        for name in names.iter() {
            let selectable = !name
                .attributes()
                .iter()
                .any(|attr| matches!(attr, imap_proto::NameAttribute::NoSelect));
            let descriptor = MailboxDescriptor {
                name: name.name().to_string(),
                selectable,
            };
            out.blocking_send(descriptor).map_err(|_| closed_stream())?;
        }
        Ok(())
    }

    fn logout(mut self) -> Result<()> {
        self.inner.logout().map_err(command_error)
    }
}

fn is_transport(err: &imap::Error) -> bool {
    matches!(err, imap::Error::Io(_) | imap::Error::ConnectionLost)
}

fn login_error(err: imap::Error) -> Error {
    if is_transport(&err) {
        Error::Connection(err.to_string())
    } else {
        Error::Auth(err.to_string())
    }
}

fn command_error(err: imap::Error) -> Error {
    if is_transport(&err) {
        Error::Connection(err.to_string())
    } else {
        Error::Protocol(err.to_string())
    }
}

fn flag_from_imap(flag: &imap::types::Flag<'_>) -> Option<Flag> {
    match flag {
        imap::types::Flag::Seen => Some(Flag::Seen),
        imap::types::Flag::Answered => Some(Flag::Answered),
        imap::types::Flag::Flagged => Some(Flag::Flagged),
        imap::types::Flag::Deleted => Some(Flag::Deleted),
        imap::types::Flag::Draft => Some(Flag::Draft),
        imap::types::Flag::Custom(name) => Some(Flag::Custom(name.to_string())),
        _ => None,
    }
}
