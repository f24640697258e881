use std::sync::Arc;

use serde_json::Value;

use crate::{
    cipher::Codec,
    config::Config,
    models::{SearchPage, SearchQuery},
    request::{PortalRequest, PortalResponse, ReqwestTransport, Transport},
    retry::RetryPolicy,
    Result,
};

/// Client for the three portal endpoints and the report page images.
///
/// None of the calls retry on their own; callers wrap them in the client's [`RetryPolicy`].
#[derive(Clone)]
pub struct PortalClient {
    transport: Arc<dyn Transport>,
    codec: Codec,
    base_url: String,
    retry: RetryPolicy,
}

impl PortalClient {
    pub fn new(config: &Config) -> Result<Self> {
        let base_url = config.settings.base_url.trim_end_matches('/').to_string();
        let transport = ReqwestTransport::new(&base_url, config.timeout())?;
        Ok(Self::with_transport(
            Arc::new(transport),
            Codec::new(config.key),
            &base_url,
            config.retry_policy(),
        ))
    }

    pub fn with_transport(
        transport: Arc<dyn Transport>,
        codec: Codec,
        base_url: &str,
        retry: RetryPolicy,
    ) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        Self { transport, codec, base_url, retry }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn retry(&self) -> RetryPolicy {
        self.retry
    }

    /// One search request. The body is usually encrypted, plain JSON is accepted as well.
    pub async fn search(&self, query: &SearchQuery) -> Result<Value> {
        let url = format!("{}/api/baseQuery/completionQueryResultsData", self.base_url);
        let res = self
            .transport
            .send(PortalRequest::post_json(&url, query.to_payload()))
            .await?
            .error_for_status(&url)?;
        self.codec.decode_json(&res.text())
    }

    pub async fn search_page(&self, query: &SearchQuery) -> Result<SearchPage> {
        Ok(SearchPage::from_response(&self.search(query).await?))
    }

    pub async fn project_info(&self, project_id: &str) -> Result<Value> {
        let url = format!("{}/api/baseQuery/conclusionProjectInfo/{project_id}", self.base_url);
        let res = self
            .transport
            .send(PortalRequest::post_form(&url, Vec::new()))
            .await?
            .error_for_status(&url)?;
        res.json()
    }

    /// Resolves the image URL of report page `index` (1 based). `None` means there is no such page.
    pub async fn report_page_url(&self, project_id: &str, index: u32) -> Result<Option<String>> {
        let url = format!("{}/api/baseQuery/completeProjectReport", self.base_url);
        let form = vec![
            ("id".to_string(), project_id.to_string()),
            ("index".to_string(), index.to_string()),
        ];
        let res = self
            .transport
            .send(PortalRequest::post_form(&url, form))
            .await?
            .error_for_status(&url)?;
        let body = res.json()?;
        if body["code"].as_i64() != Some(200) {
            return Ok(None);
        }
        Ok(body["data"]["url"]
            .as_str()
            .filter(|path| !path.is_empty())
            .map(|path| self.absolute(path)))
    }

    /// Downloads one page image. Non-2xx responses become `Error::HttpStatus`.
    pub async fn fetch_image(&self, project_id: &str, url: &str) -> Result<PortalResponse> {
        let referer = format!("{}/finalDetails?id={project_id}", self.base_url);
        self.transport
            .send(PortalRequest::get(url).with_referer(referer))
            .await?
            .error_for_status(url)
    }

    fn absolute(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{path}", self.base_url)
        }
    }
}
