// Thing directory service client
//
// Paginated `GET /things?offset=&limit=` for Thing Descriptions and
// `GET /values/{thingID}` for the latest property values, both with a
// bearer token. Paging is strictly sequential; batch N+1 is requested only
// after batch N has been received.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use crate::error::Error;
use crate::td::ThingDescription;
use crate::transport::TransportConfig;

/// Default port of the directory service.
pub const DEFAULT_DIRECTORY_PORT: u16 = 8886;
/// Default number of TDs requested per page.
pub const DEFAULT_PAGE_SIZE: usize = 100;
/// Upper bound on values returned for a single Thing.
pub const MAX_VALUES_LIMIT: usize = 1000;
/// Default safety limit on the number of pages fetched by one listing.
pub const DEFAULT_MAX_PAGES: usize = 100;

const THINGS_PATH: &str = "/things";
const VALUES_PATH: &str = "/values/";

// ── Result types ────────────────────────────────────────────────────

/// Outcome of a full directory listing.
#[derive(Debug, Clone, Default)]
pub struct DirectoryListing {
    pub descriptions: Vec<ThingDescription>,
    /// The page limit was reached while the server still returned full
    /// pages; more TDs may exist.
    pub truncated: bool,
}

/// Latest known value of one property.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyValue {
    pub value: serde_json::Value,
    pub updated: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct RawPropertyValue {
    #[serde(default)]
    value: serde_json::Value,
    #[serde(default)]
    updated: Option<String>,
}

impl From<RawPropertyValue> for PropertyValue {
    fn from(raw: RawPropertyValue) -> Self {
        let updated = raw.updated.as_deref().and_then(|s| {
            DateTime::parse_from_rfc3339(s)
                .map(|d| d.with_timezone(&Utc))
                .map_err(|e| debug!(updated = s, error = %e, "unparseable value timestamp"))
                .ok()
        });
        Self {
            value: raw.value,
            updated,
        }
    }
}

// ── DirectoryClient ─────────────────────────────────────────────────

/// Client for a hub directory service.
pub struct DirectoryClient {
    http: reqwest::Client,
    base_url: Url,
    page_size: usize,
    max_pages: usize,
}

impl DirectoryClient {
    pub fn new(base_url: Url, transport: &TransportConfig) -> Result<Self, Error> {
        Ok(Self {
            http: transport.build_client()?,
            base_url,
            page_size: DEFAULT_PAGE_SIZE,
            max_pages: DEFAULT_MAX_PAGES,
        })
    }

    /// Number of TDs requested per page. `0` restores the default.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = if page_size == 0 {
            DEFAULT_PAGE_SIZE
        } else {
            page_size
        };
        self
    }

    /// Maximum number of pages one listing may fetch.
    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── Public API ──────────────────────────────────────────────────

    /// Fetch every TD in the directory.
    ///
    /// Stops at the first page shorter than the page size. Each TD gets its
    /// id parts applied before it is returned.
    pub async fn list_descriptions(&self, token: &SecretString) -> Result<DirectoryListing, Error> {
        let url = self.base_url.join(THINGS_PATH)?;
        debug!(%url, page_size = self.page_size, "listing directory");

        let mut listing = DirectoryListing::default();
        let mut offset = 0usize;
        let mut pages = 0usize;

        loop {
            let batch: Vec<ThingDescription> =
                self.get_batch(&url, offset, self.page_size, token).await?;
            let received = batch.len();
            pages += 1;
            listing.descriptions.extend(batch.into_iter().map(|mut td| {
                td.apply_id_parts();
                td
            }));
            offset += received;

            if received < self.page_size {
                break;
            }
            if pages >= self.max_pages {
                warn!(
                    pages,
                    received_total = listing.descriptions.len(),
                    "directory page limit reached, listing truncated"
                );
                listing.truncated = true;
                break;
            }
        }

        debug!(
            count = listing.descriptions.len(),
            pages, "directory listing complete"
        );
        Ok(listing)
    }

    /// Read the latest property values of one Thing.
    pub async fn read_property_values(
        &self,
        thing_id: &str,
        token: &SecretString,
    ) -> Result<HashMap<String, PropertyValue>, Error> {
        let mut url = self.base_url.join(VALUES_PATH)?;
        url.path_segments_mut()
            .map_err(|()| Error::Response {
                message: format!("directory URL cannot be a base: {}", self.base_url),
            })?
            .pop_if_empty()
            .push(thing_id);

        let raw: HashMap<String, RawPropertyValue> =
            self.get_batch(&url, 0, MAX_VALUES_LIMIT, token).await?;
        Ok(raw.into_iter().map(|(k, v)| (k, v.into())).collect())
    }

    // ── Request helper ──────────────────────────────────────────────

    async fn get_batch<T: DeserializeOwned>(
        &self,
        url: &Url,
        offset: usize,
        limit: usize,
        token: &SecretString,
    ) -> Result<T, Error> {
        debug!("GET {url} offset={offset} limit={limit}");

        let resp = self
            .http
            .get(url.clone())
            .query(&[("offset", offset.to_string()), ("limit", limit.to_string())])
            .header(
                reqwest::header::AUTHORIZATION,
                format!("bearer {}", token.expose_secret()),
            )
            .send()
            .await?;

        let status = resp.status();
        if status.is_client_error() || status.is_server_error() {
            let message = format!("Status code {status} for URL: {url}");
            debug!(%message, "directory request failed");
            return Err(Error::Unauthorized {
                status: status.as_u16(),
                message,
            });
        }

        let body = resp.text().await?;
        let value: serde_json::Value =
            serde_json::from_str(&body).map_err(|e| Error::Response {
                message: format!("response is not JSON for URL {url}: {e}"),
            })?;
        if value.is_null() {
            return Err(Error::Response {
                message: format!("missing content for URL: {url}"),
            });
        }

        serde_json::from_value(value).map_err(|e| {
            let preview = body.chars().take(200).collect::<String>();
            Error::Deserialization {
                message: format!("{e} (body preview: {preview:?})"),
                body,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_value_timestamp_parsing() {
        let ok: PropertyValue = RawPropertyValue {
            value: serde_json::json!(21.5),
            updated: Some("2024-03-01T10:00:00Z".into()),
        }
        .into();
        assert!(ok.updated.is_some());

        let bad: PropertyValue = RawPropertyValue {
            value: serde_json::Value::Null,
            updated: Some("yesterday".into()),
        }
        .into();
        assert!(bad.updated.is_none());
    }
}
