use chrono::Local;
use serde_json::Value;

use crate::{client::PortalClient, info_time, models::SearchQuery, Result};

/// Walks every page of a search, starting at the query's page (normally 0).
///
/// Stops on the first empty page, or once `(page + 1) * size` reaches the total the server
/// reports. A page that still fails after all retries ends the walk with that error.
pub struct PageWalker<'a> {
    client: &'a PortalClient,
    query: SearchQuery,
    page: u32,
    done: bool,
}

impl<'a> PageWalker<'a> {
    pub fn new(client: &'a PortalClient, query: SearchQuery) -> Self {
        Self { client, page: query.page, query, done: false }
    }

    /// Rows of the next page, or `None` when the walk is over.
    pub async fn next_page(&mut self) -> Result<Option<Vec<Value>>> {
        if self.done {
            return Ok(None);
        }
        let start_time = Local::now();
        let query = self.query.at_page(self.page);
        let label = format!("search page {}", self.page);
        let client = self.client;
        let page = client.retry().run(&label, || client.search_page(&query)).await?;

        if page.rows.is_empty() {
            info_time!("Page {} is empty, search finished", self.page);
            self.done = true;
            return Ok(None);
        }
        info_time!(start_time, "Fetched page {}: {} rows", self.page, page.rows.len());

        let fetched = (u64::from(self.page) + 1) * u64::from(self.query.size);
        if page.total.is_some_and(|total| fetched >= total) {
            self.done = true;
        }
        self.page += 1;
        Ok(Some(page.rows))
    }
}
