//! HTTP client for the Dune API.

use std::sync::Arc;

use reqwest::Url;
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::Value;

/// Rows requested per page by [`DuneClient::fetch_all_pages`].
pub const PAGE_SIZE: usize = 100;

const API_KEY_HEADER: &str = "X-Dune-API-Key";

#[derive(Debug, thiserror::Error)]
pub enum DuneError {
    #[error("Missing DUNE_API_KEY")]
    MissingApiKey,
    #[error("invalid Dune API URL: {0}")]
    InvalidBaseUrl(String),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Dune API returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("unexpected response shape: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Thin wrapper around `reqwest` that adds the API key and base URL.
///
/// The key is optional at construction; calls without one fail with
/// [`DuneError::MissingApiKey`] instead of the server refusing to start.
#[derive(Clone, Debug)]
pub struct DuneClient {
    http: reqwest::Client,
    base_url: Url,
    api_key: Option<Arc<str>>,
}

#[derive(Debug, Deserialize)]
struct ResultPage {
    result: ResultRows,
    #[serde(default)]
    next_offset: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct ResultRows {
    #[serde(default)]
    rows: Vec<Value>,
}

impl DuneClient {
    /// Client for the API rooted at `base_url`.
    ///
    /// Fails only when `base_url` cannot carry path segments. A missing
    /// `api_key` is reported per call instead.
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self, DuneError> {
        let base_url =
            Url::parse(base_url).map_err(|e| DuneError::InvalidBaseUrl(e.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(DuneError::InvalidBaseUrl(base_url.to_string()));
        }
        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
            api_key: api_key.map(Arc::from),
        })
    }

    /// Whether calls will carry an `X-Dune-API-Key` header.
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    fn url(&self, segments: &[&str]) -> Result<Url, DuneError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| DuneError::InvalidBaseUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// `GET` the endpoint at `segments` below the base URL.
    ///
    /// Segments are percent-encoded, so user input such as a chain name or a
    /// wallet address cannot escape its path position.
    pub(crate) async fn get_json(
        &self,
        segments: &[&str],
        query: &[(&str, String)],
    ) -> Result<Value, DuneError> {
        let api_key = self.api_key.as_deref().ok_or(DuneError::MissingApiKey)?;
        let url = self.url(segments)?;
        tracing::debug!(%url, "querying Dune");

        let response = self
            .http
            .get(url)
            .header(API_KEY_HEADER, api_key)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(%status, "Dune request failed");
            return Err(DuneError::Status { status, body });
        }
        Ok(response.json().await?)
    }

    /// The raw `result.rows` of a single response.
    pub(crate) async fn get_rows(
        &self,
        segments: &[&str],
        query: &[(&str, String)],
    ) -> Result<Vec<Value>, DuneError> {
        let page: ResultPage = serde_json::from_value(self.get_json(segments, query).await?)?;
        Ok(page.result.rows)
    }

    /// Follow `limit`/`offset` pagination until the result set is exhausted.
    ///
    /// A `next_offset` in the response is authoritative. Without one, only a
    /// completely full page means more rows may follow, and an empty page
    /// always ends the walk.
    pub(crate) async fn fetch_all_pages(
        &self,
        segments: &[&str],
        params: &[(&str, String)],
    ) -> Result<Vec<Value>, DuneError> {
        let mut rows = Vec::new();
        let mut offset = 0;
        loop {
            let mut query = params.to_vec();
            query.push(("limit", PAGE_SIZE.to_string()));
            query.push(("offset", offset.to_string()));

            let page: ResultPage = serde_json::from_value(self.get_json(segments, &query).await?)?;
            let fetched = page.result.rows.len();
            rows.extend(page.result.rows);

            let next = match page.next_offset {
                Some(next) if next > offset => Some(next),
                Some(_) => None,
                None if fetched == PAGE_SIZE => Some(offset + PAGE_SIZE),
                None => None,
            };
            match next {
                Some(next) if fetched > 0 => offset = next,
                _ => break,
            }
        }
        tracing::debug!(rows = rows.len(), "fetched all pages");
        Ok(rows)
    }
}

/// String value of `key` in a raw row, if it is a string.
pub(crate) fn str_field<'a>(row: &'a Value, key: &str) -> Option<&'a str> {
    row.get(key)?.as_str()
}

/// Project raw rows onto `T`. Rows that are not objects are skipped.
///
/// Call this after filtering, so rows the caller does not want never get
/// a chance to fail the projection.
pub(crate) fn project<T: DeserializeOwned>(
    rows: impl IntoIterator<Item = Value>,
) -> Result<Vec<T>, DuneError> {
    rows.into_iter()
        .filter(Value::is_object)
        .map(|row| serde_json::from_value(row).map_err(DuneError::from))
        .collect()
}
