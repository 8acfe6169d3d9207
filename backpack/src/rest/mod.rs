//! Unauthenticated access to Backpack's public market-data REST API.
//!
//! Only the depth snapshot is needed to seed a local book, so requests are
//! plain GETs with query parameters and no signing.

pub mod endpoints;

use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{BackpackError, Result};

/// Upper bound for one snapshot round trip. A hung request would otherwise
/// stall the supervisor while diffs pile up in the buffer.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest error body kept in [`BackpackError::Http`].
const MAX_ERROR_BODY: usize = 512;

/// Cheap to clone; clones share one connection pool.
#[derive(Debug, Clone)]
pub struct BackpackHttpClient {
    client: Client,
    base_url: String,
}

impl BackpackHttpClient {
    /// Client for `base_url` (e.g. `https://api.backpack.exchange`) with the
    /// default request timeout. A trailing slash is ignored.
    pub fn new(base_url: &str) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self::with_client(base_url, client)
    }

    /// Reuse an existing `reqwest` client.
    pub fn with_client(base_url: &str, client: Client) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET `path` and decode the JSON body.
    ///
    /// Non-2xx answers become [`BackpackError::Http`] with the (truncated)
    /// body. The body is buffered before decoding so a bad payload is a
    /// [`BackpackError::Json`], not a transport error.
    pub(crate) async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, ?query, "GET");

        let resp = self.client.get(&url).query(query).send().await?;
        let status = resp.status();
        let body = resp.bytes().await?;

        if !status.is_success() {
            let text = String::from_utf8_lossy(&body);
            let message: String = text.chars().take(MAX_ERROR_BODY).collect();
            return Err(BackpackError::Http {
                status: status.as_u16(),
                message,
            });
        }

        Ok(serde_json::from_slice(&body)?)
    }
}
