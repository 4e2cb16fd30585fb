//! Simple paged results searches.

use crate::connection::Connection;
use crate::controls::{PagedResultsControl, RequestControl, ResponseControl};
use crate::cookie::CookieManager;
use crate::error::{Error, Result};
use crate::protocol::{Control, Request, SearchRequest, SearchResponse};
use tracing::debug;

/// Runs a search one page at a time over a borrowed connection.
pub struct PagedResultsClient<'a, C> {
    conn: &'a C,
    page_size: i32,
    controls: Vec<Control>,
}

/// True when the response's paged results control carries a non-empty cookie.
pub fn has_more(response: &SearchResponse) -> Result<bool> {
    Ok(PagedResultsControl::find(&response.result.controls)?
        .map(|c| c.has_more())
        .unwrap_or(false))
}

impl<'a, C: Connection> PagedResultsClient<'a, C> {
    pub fn new(conn: &'a C, page_size: i32) -> Self {
        Self {
            conn,
            page_size,
            controls: Vec::new(),
        }
    }

    /// Extra controls sent with every page, e.g. server side sort.
    pub fn with_controls(mut self, controls: Vec<Control>) -> Self {
        self.controls = controls;
        self
    }

    async fn send(&self, request: &SearchRequest, cookie: Vec<u8>) -> Result<SearchResponse> {
        let mut controls = self.controls.clone();
        controls.push(PagedResultsControl::new(self.page_size, cookie).to_control());
        self.conn
            .submit(Request::Search(request.clone()), controls)
            .await?
            .search_response()
            .await
    }

    /// First page.
    pub async fn execute(&self, request: &SearchRequest) -> Result<SearchResponse> {
        self.send(request, Vec::new()).await
    }

    /// Page following `prior`, which must carry a non-empty cookie.
    pub async fn execute_after(&self, request: &SearchRequest, prior: &SearchResponse) -> Result<SearchResponse> {
        let control = PagedResultsControl::find(&prior.result.controls)?
            .ok_or_else(|| Error::InvalidArgument("response has no paged results control".to_string()))?;
        if !control.has_more() {
            return Err(Error::InvalidArgument("paged results cookie is empty".to_string()));
        }
        self.send(request, control.cookie).await
    }

    /// Page resuming from the manager's cookie. A non-empty response cookie is written back.
    pub async fn execute_with(&self, request: &SearchRequest, manager: &dyn CookieManager) -> Result<SearchResponse> {
        let cookie = manager.read()?.unwrap_or_default();
        let response = self.send(request, cookie).await?;
        if let Some(control) = PagedResultsControl::find(&response.result.controls)? {
            if control.has_more() {
                manager.write(&control.cookie)?;
            }
        }
        Ok(response)
    }

    /// Fetch every page. The returned result is the last page's, with all entries and references merged.
    pub async fn execute_to_completion(
        &self,
        request: &SearchRequest,
        manager: &dyn CookieManager,
    ) -> Result<SearchResponse> {
        let mut entries = Vec::new();
        let mut references = Vec::new();
        let mut pages = 0;
        loop {
            let page = self.execute_with(request, manager).await?;
            pages += 1;
            let more = has_more(&page)? && page.result.code.is_success();
            debug!(
                "Page {} of {}: {} entries, more={}",
                pages,
                request.base_object,
                page.entries.len(),
                more
            );
            entries.extend(page.entries);
            references.extend(page.references);
            if !more {
                return Ok(SearchResponse {
                    entries,
                    references,
                    result: page.result,
                });
            }
        }
    }
}
