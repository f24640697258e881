use std::time::Duration;

use async_trait::async_trait;
use reqwest::{
    header::{self, HeaderMap, HeaderValue},
    Client, RequestBuilder,
};
use serde_json::Value;

use crate::{Error, Result};

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/144.0.0.0 Safari/537.36";
const JSON_CONTENT_TYPE: &str = "application/json;charset=UTF-8";
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Empty,
    Json(Value),
    Form(Vec<(String, String)>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PortalRequest {
    pub method: Method,
    pub url: String,
    pub body: Body,
    /// Overrides the default `Referer` header.
    pub referer: Option<String>,
}

impl PortalRequest {
    pub fn post_json(url: impl Into<String>, body: Value) -> Self {
        Self { method: Method::Post, url: url.into(), body: Body::Json(body), referer: None }
    }

    pub fn post_form(url: impl Into<String>, form: Vec<(String, String)>) -> Self {
        Self { method: Method::Post, url: url.into(), body: Body::Form(form), referer: None }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self { method: Method::Get, url: url.into(), body: Body::Empty, referer: None }
    }

    pub fn with_referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = Some(referer.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl PortalResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Turns a non-2xx response into `Error::HttpStatus`.
    pub fn error_for_status(self, url: &str) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(Error::HttpStatus { status: self.status, url: url.to_string() })
        }
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json(&self) -> Result<Value> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// The single seam between the scraper and the network.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: PortalRequest) -> Result<PortalResponse>;
}

/// Transport backed by one shared `reqwest::Client` carrying the portal's browser headers.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .default_headers(default_headers(base_url)?)
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

fn default_headers(base_url: &str) -> Result<HeaderMap> {
    let origin = HeaderValue::from_str(base_url)
        .map_err(|e| Error::Transport(format!("invalid base url {base_url}: {e}")))?;
    let mut headers = HeaderMap::new();
    headers.insert(header::ACCEPT, HeaderValue::from_static("application/json, text/plain, */*"));
    headers.insert(
        header::ACCEPT_LANGUAGE,
        HeaderValue::from_static("zh-CN,zh;q=0.9,en;q=0.8,en-GB;q=0.7,en-US;q=0.6"),
    );
    headers.insert(header::ORIGIN, origin.clone());
    headers.insert(header::REFERER, origin);
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer false"));
    Ok(headers)
}

impl ReqwestTransport {
    fn request_builder(&self, request: PortalRequest) -> RequestBuilder {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };
        builder = match request.body {
            Body::Empty if request.method == Method::Post => {
                builder.header(header::CONTENT_TYPE, FORM_CONTENT_TYPE)
            }
            Body::Empty => builder,
            // `json` keeps a content type that is already set.
            Body::Json(value) => {
                builder.header(header::CONTENT_TYPE, JSON_CONTENT_TYPE).json(&value)
            }
            Body::Form(form) => builder.form(&form),
        };
        if let Some(referer) = request.referer {
            builder = builder.header(header::REFERER, referer);
        }
        builder
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: PortalRequest) -> Result<PortalResponse> {
        let res = self.request_builder(request).send().await?;
        let status = res.status().as_u16();
        let content_type = res
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = res.bytes().await?.to_vec();
        Ok(PortalResponse { status, content_type, body })
    }
}
