//! WebDAV remote store on top of reqwest.
//!
//! Only PUT, GET, HEAD, DELETE, PROPFIND (depth 1) and MKCOL are used.

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;
use histsync_core::retry::{retry_with_policy, RetryPolicy};
use histsync_core::{Error, Result};
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, Method, Response, StatusCode};
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::store::{EntryKind, RemoteEntry, RemoteStore};
use crate::EndpointId;

const DAV_NS: &str = "DAV:";

const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:">
  <d:prop>
    <d:resourcetype/>
    <d:getcontentlength/>
  </d:prop>
</d:propfind>"#;

pub struct WebDavStore {
    base_url: Url,
    username: String,
    password: String,
    http: Client,
    retry: RetryPolicy,
}

impl WebDavStore {
    /// Creates a client for the collection at `url`.
    pub fn new(url: &str, username: &str, password: &str) -> Result<Self> {
        let trimmed = url.trim();
        if trimmed.is_empty() {
            return Err(Error::Config("WebDAV url is empty".to_string()));
        }
        let base_url = Url::parse(trimmed)
            .map_err(|e| Error::Config(format!("invalid WebDAV url '{}': {}", trimmed, e)))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "unsupported WebDAV scheme '{}'",
                base_url.scheme()
            )));
        }

        let http = Client::builder()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| Error::Internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url,
            username: username.to_string(),
            password: password.to_string(),
            http,
            retry: RetryPolicy::network(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn auth_header(&self) -> String {
        let raw = format!("{}:{}", self.username, self.password);
        format!("Basic {}", general_purpose::STANDARD.encode(raw))
    }

    fn base_path(&self) -> String {
        self.base_url.path().trim_end_matches('/').to_string()
    }

    /// URL of `name` under the collection; `dir` appends a trailing slash.
    fn object_url(&self, name: &str, dir: bool) -> Url {
        let mut path = self.base_path();
        for segment in name.split('/').filter(|s| !s.is_empty()) {
            path.push('/');
            path.push_str(&urlencoding::encode(segment));
        }
        if dir || path.is_empty() {
            path.push('/');
        }
        let mut url = self.base_url.clone();
        url.set_path(&path);
        url
    }

    fn method(name: &'static str) -> Result<Method> {
        Method::from_bytes(name.as_bytes())
            .map_err(|e| Error::Internal(format!("invalid WebDAV method {}: {}", name, e)))
    }

    /// Sends a request, retrying transport failures and 5xx answers.
    async fn execute(
        &self,
        method: Method,
        url: Url,
        body: Option<Bytes>,
        headers: &[(&'static str, &'static str)],
    ) -> Result<Response> {
        retry_with_policy(&self.retry, || {
            let mut request = self
                .http
                .request(method.clone(), url.clone())
                .header(AUTHORIZATION, self.auth_header());
            for (name, value) in headers {
                request = request.header(*name, *value);
            }
            if let Some(body) = &body {
                request = request.body(body.clone());
            }
            let label = format!("{} {}", method, url.path());

            async move {
                let response = request
                    .send()
                    .await
                    .map_err(|e| Error::RemoteConnection(format!("{}: {}", label, e)))?;
                let status = response.status();
                if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                    return Err(Error::RemoteConnection(format!("{}: {}", label, status)));
                }
                Ok(response)
            }
        })
        .await
    }

    /// Creates each missing collection along `dir`.
    async fn ensure_directory(&self, dir: &str) -> Result<()> {
        let mut current = String::new();
        for part in dir.split('/').filter(|s| !s.is_empty()) {
            if !current.is_empty() {
                current.push('/');
            }
            current.push_str(part);

            let response = self
                .execute(Self::method("MKCOL")?, self.object_url(&current, true), None, &[])
                .await?;
            match response.status() {
                // 405: already exists
                StatusCode::OK | StatusCode::CREATED | StatusCode::METHOD_NOT_ALLOWED => {}
                status => {
                    check_status(status, &current)?;
                    debug!(dir = %current, %status, "MKCOL returned unexpected status");
                }
            }
        }
        Ok(())
    }
}

/// Maps non-success statuses onto the error taxonomy.
fn check_status(status: StatusCode, name: &str) -> Result<()> {
    if status.is_success() {
        return Ok(());
    }
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(Error::RemoteAuth(format!(
            "{} rejected credentials for {}",
            status, name
        ))),
        StatusCode::NOT_FOUND => Err(Error::RemoteNotFound(name.to_string())),
        StatusCode::PRECONDITION_FAILED => Err(Error::AlreadyExists(name.to_string())),
        s if s.is_server_error() => Err(Error::RemoteConnection(format!("{}: {}", name, s))),
        s => Err(Error::Internal(format!("unexpected WebDAV status {} for {}", s, name))),
    }
}

/// Parses a depth-1 multistatus body listing `dir_path` (a decoded URL path).
pub(crate) fn parse_multistatus(xml: &str, dir_path: &str) -> Result<Vec<RemoteEntry>> {
    let doc = roxmltree::Document::parse(xml)
        .map_err(|e| Error::Decode(format!("invalid PROPFIND response: {}", e)))?;

    let requested = dir_path.trim_matches('/');
    let mut entries = Vec::new();

    for response in doc
        .descendants()
        .filter(|n| n.has_tag_name((DAV_NS, "response")))
    {
        let Some(href) = response
            .descendants()
            .find(|n| n.has_tag_name((DAV_NS, "href")))
            .and_then(|n| n.text())
        else {
            continue;
        };

        // Servers answer with either absolute URLs or absolute paths.
        let raw_path = match Url::parse(href.trim()) {
            Ok(url) => url.path().to_string(),
            Err(_) => href.trim().to_string(),
        };
        let decoded = urlencoding::decode(&raw_path)
            .map(|s| s.into_owned())
            .unwrap_or(raw_path);
        let path = decoded.trim_matches('/');
        if path == requested {
            continue;
        }

        let Some(name) = path.rsplit('/').next().filter(|s| !s.is_empty()) else {
            continue;
        };

        let is_collection = response
            .descendants()
            .find(|n| n.has_tag_name((DAV_NS, "resourcetype")))
            .map(|rt| rt.children().any(|c| c.has_tag_name((DAV_NS, "collection"))))
            .unwrap_or(false)
            || decoded.ends_with('/');

        let size = response
            .descendants()
            .find(|n| n.has_tag_name((DAV_NS, "getcontentlength")))
            .and_then(|n| n.text())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .unwrap_or(0);

        entries.push(RemoteEntry {
            name: name.to_string(),
            kind: if is_collection {
                EntryKind::Directory
            } else {
                EntryKind::File
            },
            size,
        });
    }

    Ok(entries)
}

#[async_trait]
impl RemoteStore for WebDavStore {
    async fn exists(&self, name: &str) -> Result<bool> {
        let response = self
            .execute(Method::HEAD, self.object_url(name, false), None, &[])
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status => check_status(status, name).map(|_| true),
        }
    }

    async fn read(&self, name: &str) -> Result<Bytes> {
        let response = self
            .execute(Method::GET, self.object_url(name, false), None, &[])
            .await?;
        check_status(response.status(), name)?;
        response
            .bytes()
            .await
            .map_err(|e| Error::RemoteConnection(format!("reading body of {}: {}", name, e)))
    }

    async fn write(&self, name: &str, data: Bytes, overwrite: bool) -> Result<()> {
        if let Some((parent, _)) = name.trim_start_matches('/').rsplit_once('/') {
            self.ensure_directory(parent).await?;
        }

        let headers: &[(&'static str, &'static str)] = if overwrite {
            &[("Content-Type", "application/json")]
        } else {
            // Not every server honours If-None-Match, so check first as well.
            if self.exists(name).await? {
                return Err(Error::AlreadyExists(name.to_string()));
            }
            &[("Content-Type", "application/json"), ("If-None-Match", "*")]
        };

        let size = data.len();
        let response = self
            .execute(Method::PUT, self.object_url(name, false), Some(data), headers)
            .await?;
        check_status(response.status(), name)?;
        debug!(name, size, "WebDAV PUT complete");
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let response = self
            .execute(Method::DELETE, self.object_url(name, false), None, &[])
            .await?;
        check_status(response.status(), name)
    }

    async fn list_directory(&self, path: &str) -> Result<Vec<RemoteEntry>> {
        let url = self.object_url(path, true);
        let response = self
            .execute(
                Self::method("PROPFIND")?,
                url.clone(),
                Some(Bytes::from_static(PROPFIND_BODY.as_bytes())),
                &[("Depth", "1"), ("Content-Type", "application/xml")],
            )
            .await?;
        check_status(response.status(), path)?;

        let body = response
            .text()
            .await
            .map_err(|e| Error::RemoteConnection(format!("reading PROPFIND body: {}", e)))?;
        let dir_path = urlencoding::decode(url.path())
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| url.path().to_string());

        let entries = parse_multistatus(&body, &dir_path)?;
        debug!(path, count = entries.len(), "PROPFIND listing");
        Ok(entries)
    }

    fn target_id(&self) -> EndpointId {
        EndpointId::from_str(&format!(
            "webdav:{}@{}",
            self.username,
            self.base_url.as_str().trim_end_matches('/')
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_url_encoding() {
        let store = WebDavStore::new("https://dav.example.com/remote/hist/", "u", "p").unwrap();
        assert_eq!(
            store.object_url("browser-history-total.json", false).as_str(),
            "https://dav.example.com/remote/hist/browser-history-total.json"
        );
        assert_eq!(
            store.object_url("a b/c.json", false).as_str(),
            "https://dav.example.com/remote/hist/a%20b/c.json"
        );
        assert_eq!(store.object_url("/", true).as_str(), "https://dav.example.com/remote/hist/");
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(WebDavStore::new("", "u", "p"), Err(Error::Config(_))));
        assert!(matches!(WebDavStore::new("not a url", "u", "p"), Err(Error::Config(_))));
        assert!(matches!(WebDavStore::new("ftp://x/", "u", "p"), Err(Error::Config(_))));
    }

    #[test]
    fn test_status_mapping() {
        assert!(check_status(StatusCode::CREATED, "x").is_ok());
        assert!(matches!(check_status(StatusCode::UNAUTHORIZED, "x"), Err(Error::RemoteAuth(_))));
        assert!(matches!(check_status(StatusCode::NOT_FOUND, "x"), Err(Error::RemoteNotFound(_))));
        assert!(matches!(
            check_status(StatusCode::PRECONDITION_FAILED, "x"),
            Err(Error::AlreadyExists(_))
        ));
        assert!(matches!(
            check_status(StatusCode::BAD_GATEWAY, "x"),
            Err(Error::RemoteConnection(_))
        ));
    }

    #[test]
    fn test_parse_multistatus() {
        let xml = r#"<?xml version="1.0"?>
<d:multistatus xmlns:d="DAV:">
  <d:response>
    <d:href>/remote/hist/</d:href>
    <d:propstat><d:prop><d:resourcetype><d:collection/></d:resourcetype></d:prop></d:propstat>
  </d:response>
  <d:response>
    <d:href>/remote/hist/browser-history-total.json</d:href>
    <d:propstat><d:prop><d:resourcetype/><d:getcontentlength>120</d:getcontentlength></d:prop></d:propstat>
  </d:response>
  <d:response>
    <d:href>https://dav.example.com/remote/hist/browser-history-increment-5.json</d:href>
    <d:propstat><d:prop><d:resourcetype/><d:getcontentlength>7</d:getcontentlength></d:prop></d:propstat>
  </d:response>
  <d:response>
    <d:href>/remote/hist/old%20stuff/</d:href>
    <d:propstat><d:prop><d:resourcetype><d:collection/></d:resourcetype></d:prop></d:propstat>
  </d:response>
</d:multistatus>"#;

        let entries = parse_multistatus(xml, "/remote/hist/").unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0], RemoteEntry::file("browser-history-total.json", 120));
        assert_eq!(entries[1], RemoteEntry::file("browser-history-increment-5.json", 7));
        assert_eq!(entries[2].name, "old stuff");
        assert_eq!(entries[2].kind, EntryKind::Directory);
    }

    #[test]
    fn test_parse_multistatus_rejects_garbage() {
        assert!(matches!(parse_multistatus("<<<", "/"), Err(Error::Decode(_))));
    }
}
