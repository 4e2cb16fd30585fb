//! RFC 4533 content synchronization.
//!
//! [`SyncReplClient`] sends the sync search and turns the messages of the
//! outstanding operation into consumer calls, persisting every cookie the
//! server hands out before the matching consumer runs. It does not own a
//! connection; [`SyncReplRunner`] ties it to one and keeps it alive.

pub mod cookie;
pub mod runner;

pub use cookie::{Csn, SyncCookie};
pub use runner::{RunnerSettings, SyncReplRunner};

use crate::connection::{Connection, OperationHandle};
use crate::consumer::{self, Consumer, ErrorConsumer};
use crate::controls::sync::SYNC_INFO_OID;
use crate::controls::{RequestControl, ResponseControl, SyncDoneControl, SyncInfo, SyncMode, SyncRequestControl, SyncStateControl};
use crate::cookie::CookieManager;
use crate::error::{Error, Result};
use crate::extop;
use crate::protocol::{IntermediateResponse, LdapResult, Request, Response, SearchEntry, SearchRequest};
use std::sync::Arc;
use tracing::{debug, info};

/// An entry of a sync search with its sync state, when attached.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncEntry {
    pub entry: SearchEntry,
    pub state: Option<SyncStateControl>,
}

pub struct SyncReplClient {
    mode: SyncMode,
    reload_hint: bool,
    cookies: Arc<dyn CookieManager>,
    handle: Option<OperationHandle>,
    complete: bool,
    result: Option<LdapResult>,
    on_entry: Option<Consumer<SyncEntry>>,
    on_result: Option<Consumer<LdapResult>>,
    on_message: Option<Consumer<SyncInfo>>,
    on_error: Option<ErrorConsumer>,
}

enum Drain {
    Cancelled(Result<LdapResult>),
    Message(Result<Response>),
}

impl SyncReplClient {
    pub fn new(mode: SyncMode, cookies: Arc<dyn CookieManager>) -> Self {
        Self {
            mode,
            reload_hint: false,
            cookies,
            handle: None,
            complete: false,
            result: None,
            on_entry: None,
            on_result: None,
            on_message: None,
            on_error: None,
        }
    }

    pub fn with_reload_hint(mut self, reload_hint: bool) -> Self {
        self.reload_hint = reload_hint;
        self
    }

    pub fn on_entry(mut self, consumer: impl FnMut(SyncEntry) -> anyhow::Result<()> + Send + 'static) -> Self {
        self.on_entry = Some(Box::new(consumer));
        self
    }

    pub fn on_result(mut self, consumer: impl FnMut(LdapResult) -> anyhow::Result<()> + Send + 'static) -> Self {
        self.on_result = Some(Box::new(consumer));
        self
    }

    /// Sync info intermediate messages.
    pub fn on_message(mut self, consumer: impl FnMut(SyncInfo) -> anyhow::Result<()> + Send + 'static) -> Self {
        self.on_message = Some(Box::new(consumer));
        self
    }

    pub fn on_error(mut self, consumer: impl FnMut(anyhow::Error) -> anyhow::Result<()> + Send + 'static) -> Self {
        self.on_error = Some(Box::new(consumer));
        self
    }

    pub fn mode(&self) -> SyncMode {
        self.mode
    }

    pub fn cookie_manager(&self) -> &Arc<dyn CookieManager> {
        &self.cookies
    }

    /// True once the terminal result of the current search was seen.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// True while a search is outstanding.
    pub fn is_active(&self) -> bool {
        self.handle.is_some()
    }

    pub fn message_id(&self) -> Option<i32> {
        self.handle.as_ref().map(|h| h.message_id())
    }

    /// Terminal result of the last search.
    pub fn result(&self) -> Option<&LdapResult> {
        self.result.as_ref()
    }

    /// Send the sync search, seeded with the stored cookie.
    pub async fn send<C: Connection>(&mut self, conn: &C, request: &SearchRequest) -> Result<()> {
        let cookie = self.cookies.read()?.filter(|c| !c.is_empty());
        let mut control = SyncRequestControl::new(self.mode, cookie);
        control.reload_hint = self.reload_hint;
        let handle = conn
            .submit(Request::Search(request.clone()), vec![control.to_control()])
            .await?;
        info!(
            "Sync search {} on {} ({:?}, cookie={})",
            handle.message_id(),
            request.base_object,
            self.mode,
            control
                .cookie
                .as_deref()
                .map(String::from_utf8_lossy)
                .unwrap_or_else(|| "none".into())
        );
        self.handle = Some(handle);
        self.complete = false;
        self.result = None;
        Ok(())
    }

    /// Forget the stored cookie so the next search starts with a full refresh.
    pub fn reset_cookie(&self) -> Result<()> {
        self.cookies.write(&[])
    }

    /// Read and deliver the next message of the outstanding search.
    pub async fn step(&mut self) -> Result<()> {
        let handle = self
            .handle
            .as_mut()
            .ok_or_else(|| Error::State("no sync search in progress".to_string()))?;
        match handle.next().await {
            Ok(response) => self.process(response),
            Err(e) => {
                self.handle = None;
                Err(e)
            }
        }
    }

    /// Deliver messages until the terminal result.
    pub async fn run(&mut self) -> Result<LdapResult> {
        while !self.complete {
            self.step().await?;
        }
        self.result
            .clone()
            .ok_or_else(|| Error::State("sync search finished without a result".to_string()))
    }

    /// Cancel the outstanding search with the Cancel extended operation.
    ///
    /// Messages of the search that arrive before the Cancel response are still
    /// delivered; on a connection that only reads on demand both operations
    /// have to be drained together.
    pub async fn cancel<C: Connection>(&mut self, conn: &C) -> Result<LdapResult> {
        let id = self
            .message_id()
            .ok_or_else(|| Error::State("no sync search to cancel".to_string()))?;
        let result = extop::cancel(conn, id).await?.result();
        tokio::pin!(result);
        let outcome = loop {
            let event = match self.handle.as_mut() {
                Some(handle) if !handle.is_done() => tokio::select! {
                    r = &mut result => Drain::Cancelled(r),
                    m = handle.next() => Drain::Message(m),
                },
                _ => Drain::Cancelled((&mut result).await),
            };
            match event {
                Drain::Cancelled(r) => break r,
                Drain::Message(Ok(response)) => self.process(response)?,
                Drain::Message(Err(e)) => {
                    debug!("Sync search {} ended while cancelling: {}", id, e);
                    self.handle = None;
                }
            }
        };
        self.handle = None;
        self.complete = true;
        outcome
    }

    fn store_cookie(&self, cookie: &[u8]) -> Result<()> {
        if cookie.is_empty() {
            return Ok(());
        }
        debug!("Sync cookie {}", String::from_utf8_lossy(cookie));
        self.cookies.write(cookie)
    }

    fn process(&mut self, response: Response) -> Result<()> {
        match response {
            Response::Entry(entry) => self.process_entry(entry),
            Response::Intermediate(message) => self.process_intermediate(message),
            Response::Done(result) => {
                self.complete = true;
                self.handle = None;
                match SyncDoneControl::find(&result.controls) {
                    Ok(Some(done)) => {
                        if let Some(ref cookie) = done.cookie {
                            self.store_cookie(cookie)?;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => consumer::report(&mut self.on_error, anyhow::Error::new(e).context("bad sync done control")),
                }
                info!("Sync search complete: {}", result.code);
                self.result = Some(result.clone());
                consumer::deliver(&mut self.on_result, result, &mut self.on_error, "result");
                Ok(())
            }
            Response::Reference(reference) => {
                debug!("Ignoring search reference {:?}", reference.urls);
                Ok(())
            }
        }
    }

    fn process_entry(&mut self, entry: SearchEntry) -> Result<()> {
        let state = match SyncStateControl::find(&entry.controls) {
            Ok(state) => state,
            Err(e) => {
                consumer::report(
                    &mut self.on_error,
                    anyhow::Error::new(e).context(format!("bad sync state on {}", entry.dn)),
                );
                None
            }
        };
        if let Some(cookie) = state.as_ref().and_then(|s| s.cookie.as_deref()) {
            self.store_cookie(cookie)?;
        }
        consumer::deliver(&mut self.on_entry, SyncEntry { entry, state }, &mut self.on_error, "entry");
        Ok(())
    }

    fn process_intermediate(&mut self, message: IntermediateResponse) -> Result<()> {
        if message.response_name.as_deref() != Some(SYNC_INFO_OID) {
            debug!("Ignoring intermediate response {:?}", message.response_name);
            return Ok(());
        }
        match SyncInfo::decode(message.response_value.as_deref().unwrap_or_default()) {
            Ok(info) => {
                if let Some(cookie) = info.cookie() {
                    self.store_cookie(cookie)?;
                }
                consumer::deliver(&mut self.on_message, info, &mut self.on_error, "sync info");
            }
            Err(e) => consumer::report(&mut self.on_error, anyhow::Error::new(e).context("bad sync info message")),
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::controls::sync::{SYNC_DONE_OID, SYNC_INFO_OID, SYNC_STATE_OID};
    use crate::controls::{SyncDoneControl, SyncInfo, SyncState, SyncStateControl};
    use crate::protocol::testing::entry;
    use crate::protocol::{Control, IntermediateResponse, LdapResult, Response, ResultCode};
    use uuid::Uuid;

    pub(crate) fn sync_entry(dn: &str, state: SyncState, cookie: Option<&str>) -> Response {
        let control = SyncStateControl {
            state,
            entry_uuid: Uuid::from_u128(0x0011_2233_4455_6677_8899_aabb_ccdd_eeff),
            cookie: cookie.map(|c| c.as_bytes().to_vec()),
        };
        let mut e = entry(dn);
        e.controls.push(Control::new(SYNC_STATE_OID, false, Some(control.encode_value())));
        Response::Entry(e)
    }

    pub(crate) fn sync_info(info: &SyncInfo) -> Response {
        Response::Intermediate(IntermediateResponse {
            response_name: Some(SYNC_INFO_OID.to_string()),
            response_value: Some(info.encode()),
            controls: Vec::new(),
        })
    }

    pub(crate) fn sync_done(code: ResultCode, cookie: Option<&str>) -> Response {
        let done = SyncDoneControl {
            cookie: cookie.map(|c| c.as_bytes().to_vec()),
            refresh_deletes: false,
        };
        let mut result = LdapResult::new(code);
        result.controls.push(Control::new(SYNC_DONE_OID, false, Some(done.encode_value())));
        Response::Done(result)
    }
}
