use crate::config::ServerAddr;
use crate::mail::decoders::{decode_subject, format_address};
use crate::mail::fetcher::{Connect, MailboxSession, RawMessage};
use anyhow::{Result, anyhow};
use native_tls::TlsConnector;
use std::net::TcpStream;

/// Envelope plus the full message, without touching the \Seen flag.
const FETCH_QUERY: &str = "(UID ENVELOPE BODY.PEEK[])";

/// Opens TLS sessions authenticated with LOGIN.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImapConnector;

impl Connect for ImapConnector {
    type Session = ImapSession;

    fn connect(&self, server: &ServerAddr, user: &str, password: &str) -> Result<ImapSession> {
        let tls = TlsConnector::builder().build()?;
        let client = imap::connect(
            (server.host.as_str(), server.port),
            server.host.as_str(),
            &tls,
        )
        .map_err(|e| anyhow!("connect to {}:{} failed: {e}", server.host, server.port))?;

        // The unauthenticated client is dropped on failure, which closes the socket.
        let session = client
            .login(user, password)
            .map_err(|(e, _client)| anyhow!("IMAP login failed: {e}"))?;

        Ok(ImapSession { session })
    }
}

pub struct ImapSession {
    session: imap::Session<native_tls::TlsStream<TcpStream>>,
}

impl MailboxSession for ImapSession {
    fn select(&mut self, mailbox: &str) -> Result<()> {
        let mb = self
            .session
            .select(mailbox)
            .map_err(|e| anyhow!("select {mailbox} failed: {e}"))?;
        log::debug!("{mailbox} has {} messages", mb.exists);
        Ok(())
    }

    fn fetch(&mut self, uid_set: &str) -> Result<Vec<RawMessage>> {
        let fetches = self.session.uid_fetch(uid_set, FETCH_QUERY)?;
        Ok(fetches.iter().map(raw_message).collect())
    }

    fn logout(&mut self) -> Result<()> {
        self.session.logout()?;
        Ok(())
    }
}

fn raw_message(f: &imap::types::Fetch) -> RawMessage {
    let envelope = f.envelope();

    let subject = envelope
        .and_then(|env| env.subject)
        .map(decode_subject)
        .unwrap_or_default();

    let from = envelope
        .and_then(|env| env.from.as_ref())
        .and_then(|froms| froms.first())
        .map(|addr| format_address(addr.mailbox, addr.host))
        .unwrap_or_default();

    RawMessage {
        uid: f.uid,
        from,
        subject,
        body: f.body().map(|b| b.to_vec()),
    }
}
