use anyhow::Result;
use log::{error, warn};
use std::collections::HashSet;

use crate::config::{Config, FetchStrategy, ServerAddr};
use crate::domain::message::{FetchBatch, FetchedMessage, Uid};
use crate::store::watermark::WatermarkStore;

/// One entry of a UID FETCH response, before filtering.
#[derive(Debug, Clone, Default)]
pub struct RawMessage {
    pub uid: Option<Uid>,
    pub from: String,
    pub subject: String,
    /// `None` when the server response carried no readable body.
    pub body: Option<Vec<u8>>,
}

/// An authenticated session on one server.
pub trait MailboxSession {
    fn select(&mut self, mailbox: &str) -> Result<()>;
    /// UID FETCH envelope and full body for `uid_set`, in server order.
    fn fetch(&mut self, uid_set: &str) -> Result<Vec<RawMessage>>;
    fn logout(&mut self) -> Result<()>;
}

/// Opens an encrypted, authenticated session.
pub trait Connect {
    type Session: MailboxSession;
    fn connect(&self, server: &ServerAddr, user: &str, password: &str) -> Result<Self::Session>;
}

#[derive(Debug, Clone)]
pub struct FetchParams {
    pub server: String,
    pub user: String,
    pub password: String,
    pub mailbox: String,
    pub strategy: FetchStrategy,
}

impl FetchParams {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            server: cfg.imap_server.clone(),
            user: cfg.imap_user.clone(),
            password: cfg.imap_password.clone(),
            mailbox: cfg.mailbox.clone(),
            strategy: cfg.fetch_strategy,
        }
    }

    fn is_complete(&self) -> bool {
        !self.server.is_empty() && !self.user.is_empty() && !self.password.is_empty()
    }
}

/// Incremental fetch of messages above the watermark from a single mailbox.
pub struct FetchEngine<C: Connect> {
    connector: C,
    params: FetchParams,
}

impl<C: Connect> FetchEngine<C> {
    pub fn new(connector: C, params: FetchParams) -> Self {
        Self { connector, params }
    }

    pub fn params(&self) -> &FetchParams {
        &self.params
    }

    /// Fetch every message with a uid above `watermark`. Nothing is persisted.
    ///
    /// Missing connection parameters make this a no-op. Connect, login and select
    /// failures abort the call; once a session exists, logout always runs and its
    /// failure is only logged.
    pub fn fetch(&self, watermark: Uid) -> Result<FetchBatch> {
        if !self.params.is_complete() {
            return Ok(FetchBatch::default());
        }

        let server = ServerAddr::parse(&self.params.server)?;
        let mut session =
            self.connector
                .connect(&server, &self.params.user, &self.params.password)?;

        let result = self.fetch_in_session(&mut session, watermark);

        if let Err(e) = session.logout() {
            warn!("IMAP logout: {e}");
        }
        result
    }

    /// Fetch, then advance the store to the highest uid fetched.
    pub fn fetch_new(&self, store: &mut WatermarkStore) -> Result<FetchBatch> {
        let batch = self.fetch(store.last_uid())?;
        if let Err(e) = store.update_last_uid(&batch) {
            // The batch is still handed on; its messages come back next cycle.
            error!("could not persist watermark: {e}");
        }
        Ok(batch)
    }

    fn fetch_in_session(&self, session: &mut C::Session, watermark: Uid) -> Result<FetchBatch> {
        session.select(&self.params.mailbox)?;
        let uid_set = uid_set(self.params.strategy, watermark);
        let raw = session.fetch(&uid_set)?;
        Ok(filter_new(raw, watermark))
    }
}

fn uid_set(strategy: FetchStrategy, watermark: Uid) -> String {
    match strategy {
        FetchStrategy::All => "1:*".to_string(),
        FetchStrategy::UidRange => format!("{}:*", watermark.saturating_add(1).max(1)),
    }
}

/// Keep messages above `watermark` that have a uid and a body, in server order.
pub fn filter_new(raw: Vec<RawMessage>, watermark: Uid) -> FetchBatch {
    let mut seen = HashSet::new();
    let mut messages = Vec::new();
    let mut skipped = Vec::new();

    for m in raw {
        let Some(uid) = m.uid else {
            warn!("skipping fetch response without UID");
            continue;
        };
        if uid <= watermark || !seen.insert(uid) {
            continue;
        }
        let Some(body) = m.body else {
            warn!("UID {uid}: body missing from fetch response");
            skipped.push(uid);
            continue;
        };
        messages.push(FetchedMessage {
            uid,
            from: m.from,
            subject: m.subject,
            body,
        });
    }

    let max_uid = messages.iter().map(|m| m.uid).max();
    FetchBatch {
        messages,
        max_uid,
        skipped,
    }
}
