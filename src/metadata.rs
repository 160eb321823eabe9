use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use tracing::debug;

use crate::error::CdsError;

pub const DEFAULT_METADATA_URL: &str = "https://cds.climate.copernicus.eu/api/v2.ui/resources";

/// What the store publishes about a product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductMetadata {
    pub selection_limit: u64,
    pub dimensions: Vec<(String, Vec<String>)>,
}

impl ProductMetadata {
    pub fn dimension(&self, name: &str) -> Option<&[String]> {
        self.dimensions
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, values)| values.as_slice())
    }
}

pub trait MetadataClient: Send + Sync {
    fn product_metadata(&self, product_id: &str) -> Result<ProductMetadata, CdsError>;
}

#[derive(Debug, Deserialize)]
struct ResourceDocument {
    selection_limit: Option<u64>,
    #[serde(default)]
    form: Vec<FormElement>,
}

#[derive(Debug, Deserialize)]
struct FormElement {
    name: Option<String>,
    #[serde(default)]
    details: Option<FormDetails>,
}

#[derive(Debug, Deserialize)]
struct FormDetails {
    #[serde(default)]
    values: Option<Vec<serde_json::Value>>,
}

/// Parses the store's resource document: `selection_limit` plus one
/// dimension per `form` element that lists `details.values`.
pub fn parse_resource_document(body: &str) -> Result<ProductMetadata, CdsError> {
    let document: ResourceDocument =
        serde_json::from_str(body).map_err(|err| CdsError::MetadataUnavailable(err.to_string()))?;
    let selection_limit = document.selection_limit.ok_or_else(|| {
        CdsError::MetadataUnavailable("resource document has no selection_limit".to_string())
    })?;

    let dimensions = document
        .form
        .into_iter()
        .filter_map(|element| {
            let name = element.name?;
            let values = element.details?.values?;
            let values: Vec<String> = values
                .into_iter()
                .filter_map(|value| match value {
                    serde_json::Value::String(text) => Some(text),
                    serde_json::Value::Number(number) => Some(number.to_string()),
                    _ => None,
                })
                .collect();
            (!values.is_empty()).then_some((name, values))
        })
        .collect();

    Ok(ProductMetadata {
        selection_limit,
        dimensions,
    })
}

#[derive(Clone)]
pub struct MetadataHttpClient {
    client: Client,
    base_url: String,
}

impl MetadataHttpClient {
    pub fn new() -> Result<Self, CdsError> {
        let base_url = std::env::var("CDS_METADATA_URL")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_METADATA_URL.to_string());
        Self::with_base_url(base_url)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, CdsError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("cds-dl/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| CdsError::MetadataUnavailable(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| CdsError::MetadataUnavailable(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn resource_url(&self, product_id: &str) -> String {
        format!("{}/{}", self.base_url, product_id)
    }

    fn send_with_retries(&self, url: &str) -> Result<reqwest::blocking::Response, CdsError> {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            match self.client.get(url).send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        debug!(url, status, delay_ms = delay, "retrying metadata request");
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        debug!(url, error = %err, delay_ms = delay, "retrying metadata request");
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(CdsError::MetadataUnavailable(err.to_string()));
                }
            }
        }
    }
}

impl MetadataClient for MetadataHttpClient {
    fn product_metadata(&self, product_id: &str) -> Result<ProductMetadata, CdsError> {
        let url = self.resource_url(product_id);
        let response = self.send_with_retries(&url)?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "metadata request failed".to_string());
            return Err(CdsError::MetadataStatus { status, message });
        }
        let body = response
            .text()
            .map_err(|err| CdsError::MetadataUnavailable(err.to_string()))?;
        parse_resource_document(&body)
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
