//! Persistent search: a search that stays open and streams changed entries.

use crate::connection::{Connection, OperationHandle};
use crate::consumer::{self, Consumer, ErrorConsumer};
use crate::controls::{EntryChangeNotificationControl, PersistentSearchControl, RequestControl, ResponseControl};
use crate::error::{Error, Result};
use crate::protocol::{LdapResult, Request, Response, SearchEntry, SearchRequest};
use tracing::{debug, info};

/// An entry pushed by a persistent search, with its change notification when the server sent one.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangedEntry {
    pub entry: SearchEntry,
    pub change: Option<EntryChangeNotificationControl>,
}

pub struct PersistentSearchClient<'a, C> {
    conn: &'a C,
    control: PersistentSearchControl,
    handle: Option<OperationHandle>,
    message_id: Option<i32>,
    on_entry: Option<Consumer<ChangedEntry>>,
    on_result: Option<Consumer<LdapResult>>,
    on_error: Option<ErrorConsumer>,
}

impl<'a, C: Connection> PersistentSearchClient<'a, C> {
    pub fn new(conn: &'a C, control: PersistentSearchControl) -> Self {
        Self {
            conn,
            control,
            handle: None,
            message_id: None,
            on_entry: None,
            on_result: None,
            on_error: None,
        }
    }

    pub fn on_entry(mut self, consumer: impl FnMut(ChangedEntry) -> anyhow::Result<()> + Send + 'static) -> Self {
        self.on_entry = Some(Box::new(consumer));
        self
    }

    pub fn on_result(mut self, consumer: impl FnMut(LdapResult) -> anyhow::Result<()> + Send + 'static) -> Self {
        self.on_result = Some(Box::new(consumer));
        self
    }

    pub fn on_error(mut self, consumer: impl FnMut(anyhow::Error) -> anyhow::Result<()> + Send + 'static) -> Self {
        self.on_error = Some(Box::new(consumer));
        self
    }

    /// Message id of the outstanding search.
    pub fn message_id(&self) -> Option<i32> {
        self.message_id
    }

    /// Send the search. Messages are delivered by [`run`](Self::run).
    pub async fn execute(&mut self, request: &SearchRequest) -> Result<()> {
        if self.handle.is_some() {
            return Err(Error::State("persistent search already running".to_string()));
        }
        let handle = self
            .conn
            .submit(Request::Search(request.clone()), vec![self.control.to_control()])
            .await?;
        info!(
            "Persistent search {} on {} (changes_only={})",
            handle.message_id(),
            request.base_object,
            self.control.changes_only
        );
        self.message_id = Some(handle.message_id());
        self.handle = Some(handle);
        Ok(())
    }

    /// Deliver messages until the server ends the search. A connection failure
    /// goes to the error consumer and is returned.
    pub async fn run(&mut self) -> Result<LdapResult> {
        loop {
            let handle = self
                .handle
                .as_mut()
                .ok_or_else(|| Error::State("persistent search not started".to_string()))?;
            let response = match handle.next().await {
                Ok(response) => response,
                Err(e) => {
                    self.handle = None;
                    consumer::report(&mut self.on_error, anyhow::anyhow!("persistent search failed: {}", e));
                    return Err(e);
                }
            };
            match response {
                Response::Entry(entry) => self.deliver_entry(entry),
                Response::Done(result) => {
                    self.handle = None;
                    consumer::deliver(&mut self.on_result, result.clone(), &mut self.on_error, "result");
                    return Ok(result);
                }
                other => debug!("Ignoring {:?} on persistent search", other),
            }
        }
    }

    fn deliver_entry(&mut self, entry: SearchEntry) {
        match EntryChangeNotificationControl::find(&entry.controls) {
            Ok(change) => {
                let changed = ChangedEntry { entry, change };
                consumer::deliver(&mut self.on_entry, changed, &mut self.on_error, "entry");
            }
            Err(e) => consumer::report(
                &mut self.on_error,
                anyhow::Error::new(e).context(format!("bad change notification on {}", entry.dn)),
            ),
        }
    }

    /// Abandon the outstanding search. No response is expected.
    pub async fn abandon(&mut self) -> Result<()> {
        let id = self
            .message_id
            .take()
            .ok_or_else(|| Error::State("no persistent search to abandon".to_string()))?;
        self.handle = None;
        debug!("Abandoning persistent search {}", id);
        self.conn.abandon(id).await
    }
}
