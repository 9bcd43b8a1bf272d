//! Confluence Cloud REST client implementing [`PageSource`].
//!
//! Authenticates with basic auth (account email + API token). Page content,
//! versions and attachments come from the v1 content API and child listings
//! from the v2 pages API. Every listing follows `_links.next` to the end. Word
//! exports come from the `exportword` action.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::contract::{
    Attachment, ExportError, FetchErrorKind, PageContent, PageFetchResult, PageRef, PageSource,
    PageVersion,
};

pub const EMAIL_ENV: &str = "CONFLUENCE_API_EMAIL";
pub const TOKEN_ENV: &str = "CONFLUENCE_API_TOKEN";

pub struct ConfluenceClient {
    base_url: String,
    email: String,
    token: String,
    http: Client,
}

#[derive(Debug, Deserialize)]
struct ContentResponse {
    id: String,
    title: String,
    body: Option<Body>,
    version: Option<VersionInfo>,
    space: Option<Space>,
}

#[derive(Debug, Deserialize)]
struct Body {
    storage: Option<Storage>,
}

#[derive(Debug, Deserialize)]
struct Storage {
    value: String,
}

#[derive(Debug, Deserialize)]
struct VersionInfo {
    number: i64,
    #[serde(default)]
    when: String,
}

#[derive(Debug, Deserialize)]
struct Space {
    key: String,
}

#[derive(Debug, Deserialize)]
struct Listing<T> {
    #[serde(default = "Vec::new")]
    results: Vec<T>,
    #[serde(rename = "_links", default)]
    links: Option<Links>,
}

#[derive(Debug, Default, Deserialize)]
struct Links {
    next: Option<String>,
    download: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChildPage {
    id: String,
    #[serde(default)]
    title: String,
}

#[derive(Debug, Deserialize)]
struct AttachmentEntry {
    id: String,
    title: String,
    version: Option<VersionInfo>,
    #[serde(rename = "_links", default)]
    links: Links,
}

impl ConfluenceClient {
    pub fn new(base_url: &str, email: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            email: email.into(),
            token: token.into(),
            http: Client::new(),
        }
    }

    /// Replaces the underlying HTTP client, e.g. to change proxy or timeout
    /// settings.
    pub fn with_http_client(mut self, http: Client) -> Self {
        self.http = http;
        self
    }

    /// Client with credentials from `CONFLUENCE_API_EMAIL` / `CONFLUENCE_API_TOKEN`.
    pub fn from_env(base_url: &str) -> Result<Self, ExportError> {
        let email = std::env::var(EMAIL_ENV).map_err(|_| ExportError::MissingCredentials(EMAIL_ENV))?;
        let token = std::env::var(TOKEN_ENV).map_err(|_| ExportError::MissingCredentials(TOKEN_ENV))?;
        info!(base_url = %base_url, email = %email, "Confluence client configured");
        Ok(Self::new(base_url, email, token))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path_or_url: &str) -> String {
        if path_or_url.starts_with("http://") || path_or_url.starts_with("https://") {
            path_or_url.to_string()
        } else {
            format!("{}{}", self.base_url, path_or_url)
        }
    }

    async fn get(&self, url: &str, query: &[(&str, String)]) -> Result<reqwest::Response, ExportError> {
        debug!(url = %url, ?query, "GET");
        self.http
            .get(url)
            .query(query)
            .basic_auth(&self.email, Some(&self.token))
            .send()
            .await
            .map_err(|e| ExportError::Transport {
                url: url.to_string(),
                message: e.to_string(),
            })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, ExportError> {
        let resp = self.get(url, query).await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ExportError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        resp.json::<T>().await.map_err(|e| ExportError::Malformed {
            url: url.to_string(),
            message: e.to_string(),
        })
    }

    /// Collects every page of a listing by following `_links.next`. The query
    /// goes with the first request only; next links carry their own.
    async fn get_all<T: serde::de::DeserializeOwned>(
        &self,
        first: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, ExportError> {
        let mut results = Vec::new();
        let mut next = Some(first.to_string());
        let mut params = query;
        while let Some(path) = next.take() {
            let url = self.url(&path);
            let listing: Listing<T> = self.get_json(&url, params).await?;
            params = &[];
            results.extend(listing.results);
            next = listing.links.and_then(|l| l.next).map(wiki_path);
        }
        Ok(results)
    }
}

/// v1 links are relative to the `/wiki` context path, v2 links already carry it.
fn wiki_path(link: String) -> String {
    if link.starts_with("/wiki") || link.starts_with("http") {
        link
    } else {
        format!("/wiki{link}")
    }
}

fn fetch_error_kind(status: StatusCode) -> FetchErrorKind {
    match status {
        StatusCode::NOT_FOUND => FetchErrorKind::NotFound,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => FetchErrorKind::Unauthorized,
        _ => FetchErrorKind::Other,
    }
}

fn into_content(raw: ContentResponse) -> PageContent {
    let (version_number, version_date) = raw
        .version
        .map(|v| (v.number, v.when))
        .unwrap_or((0, String::new()));
    PageContent {
        id: raw.id,
        title: raw.title,
        body_html: raw
            .body
            .and_then(|b| b.storage)
            .map(|s| s.value)
            .unwrap_or_default(),
        version_number,
        version_date,
        space_key: raw.space.map(|s| s.key).unwrap_or_default(),
    }
}

#[async_trait]
impl PageSource for ConfluenceClient {
    async fn fetch_page(&self, page_id: &str, version: Option<i64>) -> PageFetchResult {
        let url = format!("{}/wiki/rest/api/content/{}", self.base_url, page_id);
        let mut query = vec![("expand", "body.storage,version,space".to_string())];
        if let Some(v) = version {
            query.push(("status", "historical".to_string()));
            query.push(("version", v.to_string()));
        }

        let resp = match self.get(&url, &query).await {
            Ok(resp) => resp,
            Err(e) => {
                return PageFetchResult::Error {
                    kind: FetchErrorKind::Transport,
                    message: e.to_string(),
                }
            }
        };
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(page_id, ?version, status = %status, "Confluence refused page fetch");
            return PageFetchResult::Error {
                kind: fetch_error_kind(status),
                message: format!("HTTP {status}: {body}"),
            };
        }
        match resp.json::<ContentResponse>().await {
            Ok(raw) => PageFetchResult::Ok(into_content(raw)),
            Err(e) => PageFetchResult::Error {
                kind: FetchErrorKind::Malformed,
                message: e.to_string(),
            },
        }
    }

    async fn child_pages(&self, page_id: &str) -> Result<Vec<PageRef>, ExportError> {
        let children: Vec<ChildPage> = self
            .get_all(&format!("/wiki/api/v2/pages/{page_id}/children"), &[])
            .await?;
        debug!(page_id, count = children.len(), "Listed child pages");
        Ok(children
            .into_iter()
            .map(|c| PageRef {
                id: c.id,
                title: c.title,
            })
            .collect())
    }

    async fn page_versions(&self, page_id: &str) -> Result<Vec<PageVersion>, ExportError> {
        let versions: Vec<VersionInfo> = self
            .get_all(&format!("/wiki/rest/api/content/{page_id}/version"), &[])
            .await?;
        debug!(page_id, count = versions.len(), "Listed page versions");
        Ok(versions
            .into_iter()
            .map(|v| PageVersion {
                number: v.number,
                when: v.when,
            })
            .collect())
    }

    async fn attachments(&self, page_id: &str) -> Result<Vec<Attachment>, ExportError> {
        let entries: Vec<AttachmentEntry> = self
            .get_all(
                &format!("/wiki/rest/api/content/{page_id}/child/attachment"),
                &[("expand", "version".to_string())],
            )
            .await?;
        debug!(page_id, count = entries.len(), "Listed attachments");
        Ok(entries
            .into_iter()
            .map(|a| Attachment {
                id: a.id,
                title: a.title,
                version: a.version.map(|v| v.number),
                download_path: wiki_path(a.links.download.unwrap_or_default()),
            })
            .collect())
    }

    async fn download(&self, path_or_url: &str) -> Result<Vec<u8>, ExportError> {
        let url = self.url(path_or_url);
        let resp = self.get(&url, &[]).await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ExportError::Status {
                url,
                status: status.as_u16(),
                body: String::new(),
            });
        }
        let bytes = resp.bytes().await.map_err(|e| ExportError::Transport {
            url: url.clone(),
            message: e.to_string(),
        })?;
        Ok(bytes.to_vec())
    }

    fn word_export_path(&self, page_id: &str) -> String {
        format!("/wiki/exportword?pageId={page_id}")
    }
}
