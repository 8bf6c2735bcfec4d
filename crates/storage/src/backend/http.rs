//! Artifactory-style HTTP repository.
//!
//! Enumeration goes through the Artifactory REST API:
//!
//! - `GET {base}/api/repositories` lists the repositories on the server;
//!   virtual repositories only aggregate others and are skipped.
//! - `GET {base}/api/storage/{repo}/{path}` lists one folder.
//!
//! Files are downloaded from `{base}/{repo}/{path}` with ranged `GET`
//! requests, one window at a time.
//!
//! The HTTP client is blocking; the async trait methods run each request on
//! the blocking pool, and the reader returned by `open` is used from a
//! blocking thread anyway.

use crate::Repository;
use crate::error::{Error, ErrorKind, Result};
use crate::node::{Node, NodeKind};
use crate::reader::{BoxSyncReadSeek, DEFAULT_WINDOW_SIZE, RangeFetch, WindowedReader};
use async_trait::async_trait;
use exn::ResultExt;
use percent_encoding::percent_decode_str;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::fmt;
use std::io::{self, Read};
use std::time::Duration;
use ureq::{Agent, AgentBuilder, Request, Response};
use url::Url;

/// Connection settings shared by every HTTP request of a run.
#[derive(Clone)]
pub struct HttpOptions {
    /// Bytes requested per ranged fetch.
    pub window_size: usize,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Bearer token sent with every request.
    pub token: Option<String>,
}
impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            timeout: Duration::from_secs(60),
            token: None,
        }
    }
}
impl fmt::Debug for HttpOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpOptions")
            .field("window_size", &self.window_size)
            .field("timeout", &self.timeout)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct RepositoryInfo {
    key: String,
    #[serde(rename = "type", default)]
    kind: String,
}
impl RepositoryInfo {
    fn is_virtual(&self) -> bool {
        self.key.to_ascii_lowercase().contains("virtual") || self.kind.to_ascii_lowercase().contains("virtual")
    }
}

#[derive(Debug, Deserialize)]
struct FolderInfo {
    #[serde(default)]
    children: Vec<ChildInfo>,
}

#[derive(Debug, Deserialize)]
struct ChildInfo {
    uri: String,
    #[serde(default)]
    folder: bool,
}

/// A ureq agent plus the `Authorization` header every request carries.
#[derive(Clone)]
struct Client {
    agent: Agent,
    authorization: Option<String>,
}
impl Client {
    fn new(options: &HttpOptions) -> Self {
        Self {
            agent: AgentBuilder::new().timeout(options.timeout).build(),
            authorization: options.token.as_ref().map(|token| format!("Bearer {token}")),
        }
    }

    fn request(&self, method: &str, url: &Url) -> Request {
        let request = self.agent.request_url(method, url);
        match &self.authorization {
            Some(value) => request.set("Authorization", value),
            None => request,
        }
    }
}
impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("authorization", &self.authorization.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

/// Map a non-success HTTP status to a storage error.
fn status_error(status: u16, url: &Url) -> Error {
    let kind = match status {
        404 => ErrorKind::NotFound(url.to_string()),
        401 | 403 => ErrorKind::PermissionDenied(url.to_string()),
        s => ErrorKind::Transport(format!("{url}: HTTP {s}")),
    };
    exn::Exn::from(kind)
}

/// Send a request, turning 4xx/5xx responses into errors. Blocking.
fn call(request: Request, url: &Url) -> Result<Response> {
    match request.call() {
        Ok(response) => Ok(response),
        Err(ureq::Error::Status(status, _)) => Err(status_error(status, url)),
        Err(err) => Err(err).or_raise(|| ErrorKind::Transport(url.to_string())),
    }
}

/// Repository served over HTTP(S) by an Artifactory-compatible server.
#[derive(Debug, Clone)]
pub struct HttpRepository {
    name: String,
    client: Client,
    base: Url,
    repositories: Vec<String>,
    window_size: usize,
}
impl HttpRepository {
    /// Create a repository for the server at `base`.
    ///
    /// When `repositories` is empty, every non-virtual repository the server
    /// reports becomes a crawl root.
    pub fn new(name: impl Into<String>, base: &str, repositories: Vec<String>, options: HttpOptions) -> Result<Self> {
        let base = Url::parse(base).or_raise(|| ErrorKind::InvalidLocation(base.to_string()))?;
        if base.cannot_be_a_base() {
            exn::bail!(ErrorKind::InvalidLocation(base.to_string()));
        }
        Ok(Self {
            name: name.into(),
            client: Client::new(&options),
            base,
            repositories,
            window_size: options.window_size,
        })
    }

    /// Resolve a single download URL to a repository rooted at its origin and
    /// the file node itself.
    ///
    /// Path segments are percent-decoded, so the node's name and key match
    /// what a crawl of the same server reports for that file.
    pub(crate) fn locate(location: &str, options: HttpOptions) -> Result<(Self, Node)> {
        let url = Url::parse(location).or_raise(|| ErrorKind::InvalidLocation(location.to_string()))?;
        let origin = url.origin().ascii_serialization();
        let mut parts = vec![origin.clone()];
        for segment in url.path_segments().into_iter().flatten().filter(|s| !s.is_empty()) {
            let decoded = percent_decode_str(segment)
                .decode_utf8()
                .or_raise(|| ErrorKind::InvalidLocation(location.to_string()))?;
            parts.push(decoded.into_owned());
        }
        if parts.len() < 2 {
            exn::bail!(ErrorKind::InvalidLocation(location.to_string()));
        }
        let repository = Self::new(origin.clone(), &origin, Vec::new(), options)?;
        Ok((repository, Node::file(parts, url.to_string())))
    }

    fn base_str(&self) -> &str {
        self.base.as_str().trim_end_matches('/')
    }

    /// Append path segments to the base URL, percent-encoding each one.
    fn join<I>(&self, segments: I) -> Result<Url>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut url = self.base.clone();
        {
            let Ok(mut path) = url.path_segments_mut() else {
                exn::bail!(ErrorKind::InvalidLocation(self.base.to_string()));
            };
            path.pop_if_empty().extend(segments);
        }
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned + Send + 'static>(&self, url: Url) -> Result<T> {
        let request = self.client.request("GET", &url);
        tokio::task::spawn_blocking(move || {
            let response = call(request, &url)?;
            response.into_json::<T>().or_raise(|| ErrorKind::Transport(format!("malformed listing from {url}")))
        })
        .await
        .or_raise(|| ErrorKind::BackendError("HTTP request task failed".to_string()))?
    }
}

#[async_trait]
impl Repository for HttpRepository {
    fn name(&self) -> &str {
        &self.name
    }

    async fn roots(&self) -> Result<Vec<Node>> {
        let keys = if self.repositories.is_empty() {
            let listed: Vec<RepositoryInfo> = self.get_json(self.join(["api", "repositories"])?).await?;
            tracing::debug!(server = %self.base, count = listed.len(), "Listed repositories");
            listed.into_iter().filter(|r| !r.is_virtual()).map(|r| r.key).collect()
        } else {
            self.repositories.clone()
        };
        keys.into_iter()
            .map(|key| {
                let location = self.join([key.as_str()])?;
                Ok(Node::directory(vec![self.base_str().to_string(), key], location.to_string()))
            })
            .collect()
    }

    async fn children(&self, node: &Node) -> Result<Vec<Node>> {
        if !node.is_directory() {
            exn::bail!(ErrorKind::InvalidLocation(format!("cannot list file {}", node.location())));
        }
        let segments = node.parts().get(1..).unwrap_or_default();
        let url = self.join(["api", "storage"].into_iter().chain(segments.iter().map(String::as_str)))?;
        let folder: FolderInfo = self.get_json(url).await?;
        folder
            .children
            .into_iter()
            .map(|child| {
                let name = child.uri.trim_start_matches('/').to_string();
                let kind = if child.folder { NodeKind::Directory } else { NodeKind::File };
                let location = self.join(segments.iter().map(String::as_str).chain([name.as_str()]))?;
                Ok(node.child(name, kind, location.to_string()))
            })
            .collect()
    }

    async fn open(&self, node: &Node) -> Result<BoxSyncReadSeek> {
        let url = Url::parse(node.location()).or_raise(|| ErrorKind::InvalidLocation(node.location().to_string()))?;
        let request = self.client.request("HEAD", &url);
        let head_url = url.clone();
        let len = tokio::task::spawn_blocking(move || {
            let response = call(request, &head_url)?;
            let len = response.header("Content-Length").and_then(|v| v.trim().parse::<u64>().ok());
            len.ok_or_else(|| exn::Exn::from(ErrorKind::Transport(format!("{head_url}: missing content length"))))
        })
        .await
        .or_raise(|| ErrorKind::BackendError("HTTP request task failed".to_string()))??;
        let fetch = HttpRangeFetch {
            client: self.client.clone(),
            url,
            len,
        };
        Ok(Box::new(WindowedReader::new(fetch, self.window_size)))
    }
}

/// Blocking ranged `GET`s against a single URL.
struct HttpRangeFetch {
    client: Client,
    url: Url,
    len: u64,
}
impl RangeFetch for HttpRangeFetch {
    fn len(&self) -> u64 {
        self.len
    }

    fn fetch(&mut self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        if len == 0 {
            return Ok(Vec::new());
        }
        let end = offset + len as u64 - 1;
        let request = self.client.request("GET", &self.url).set("Range", &format!("bytes={offset}-{end}"));
        let response = request.call().map_err(|err| io::Error::other(format!("{}: {err}", self.url)))?;
        let status = response.status();
        let mut reader = response.into_reader();
        match status {
            206 => {},
            // Server ignored the range and sent everything.
            200 => {
                io::copy(&mut reader.by_ref().take(offset), &mut io::sink())?;
            },
            status => {
                return Err(io::Error::other(format!("{}: unexpected HTTP {status} for ranged request", self.url)));
            },
        }
        let mut body = Vec::with_capacity(len);
        reader.take(len as u64).read_to_end(&mut body)?;
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn repository(base: &str) -> HttpRepository {
        HttpRepository::new("arti", base, Vec::new(), HttpOptions::default()).unwrap()
    }

    #[test]
    fn test_parse_repository_list() {
        let json = r#"[
            {"key": "libs-release", "type": "LOCAL", "url": "https://arti/artifactory/libs-release"},
            {"key": "remote-cache", "type": "REMOTE", "url": "https://arti/artifactory/remote-cache"},
            {"key": "all", "type": "VIRTUAL", "url": "https://arti/artifactory/all"},
            {"key": "libs-virtual", "type": "LOCAL", "url": "https://arti/artifactory/libs-virtual"}
        ]"#;
        let listed: Vec<RepositoryInfo> = serde_json::from_str(json).unwrap();
        let kept: Vec<_> = listed.into_iter().filter(|r| !r.is_virtual()).map(|r| r.key).collect();
        assert_eq!(kept, vec!["libs-release", "remote-cache"]);
    }

    #[test]
    fn test_parse_folder_listing() {
        let json = r#"{
            "repo": "libs-release",
            "path": "/com/acme",
            "created": "2024-01-01T00:00:00.000Z",
            "children": [
                {"uri": "/app.exe", "folder": false},
                {"uri": "/1.0", "folder": true}
            ]
        }"#;
        let folder: FolderInfo = serde_json::from_str(json).unwrap();
        assert_eq!(folder.children.len(), 2);
        assert_eq!(folder.children[0].uri, "/app.exe");
        assert!(!folder.children[0].folder);
        assert!(folder.children[1].folder);
        // A file's storage info has no children at all.
        let file: FolderInfo = serde_json::from_str(r#"{"repo": "r", "path": "/a.exe", "size": "12"}"#).unwrap();
        assert!(file.children.is_empty());
    }

    #[rstest]
    #[case("https://arti.example.com/artifactory", "https://arti.example.com/artifactory/api/repositories")]
    #[case("https://arti.example.com/artifactory/", "https://arti.example.com/artifactory/api/repositories")]
    #[case("http://localhost:8081", "http://localhost:8081/api/repositories")]
    fn test_join_api_url(#[case] base: &str, #[case] expected: &str) {
        assert_eq!(repository(base).join(["api", "repositories"]).unwrap().as_str(), expected);
    }

    #[test]
    fn test_join_encodes_segments() {
        let url = repository("https://arti.example.com/artifactory").join(["libs", "My App", "a#1.pdb"]).unwrap();
        assert_eq!(url.as_str(), "https://arti.example.com/artifactory/libs/My%20App/a%231.pdb");
    }

    #[tokio::test]
    async fn test_configured_roots_skip_listing() {
        let repository = HttpRepository::new(
            "arti",
            "https://arti.example.com/artifactory",
            vec!["libs-release".to_string()],
            HttpOptions::default(),
        )
        .unwrap();
        let roots = repository.roots().await.unwrap();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].key(), "https://arti.example.com/artifactory/libs-release");
        assert_eq!(roots[0].location(), "https://arti.example.com/artifactory/libs-release");
        assert!(roots[0].is_directory());
    }

    #[test]
    fn test_locate_url() {
        let (repository, node) =
            HttpRepository::locate("https://arti.example.com/artifactory/libs/app.exe", HttpOptions::default())
                .unwrap();
        assert_eq!(repository.name(), "https://arti.example.com");
        assert_eq!(node.name(), "app.exe");
        assert_eq!(node.parts().len(), 4);
        assert!(!node.is_directory());
        assert!(HttpRepository::locate("https://arti.example.com/", HttpOptions::default()).is_err());
        assert!(HttpRepository::locate("not a url", HttpOptions::default()).is_err());
    }

    #[tokio::test]
    async fn test_locate_decodes_segments_like_a_crawl() {
        let encoded = "https://arti.example.com/artifactory/libs/My%20App/a%231.pdb";
        let (_, located) = HttpRepository::locate(encoded, HttpOptions::default()).unwrap();
        assert_eq!(located.name(), "a#1.pdb");
        assert_eq!(located.location(), encoded);

        // The same file as a crawl from the configured `libs` root lists it.
        let repository = HttpRepository::new(
            "arti",
            "https://arti.example.com/artifactory",
            vec!["libs".to_string()],
            HttpOptions::default(),
        )
        .unwrap();
        let root = repository.roots().await.unwrap().remove(0);
        let folder = root.child("My App", NodeKind::Directory, "");
        let crawled = folder.child("a#1.pdb", NodeKind::File, encoded);
        assert_eq!(located.name(), crawled.name());
        assert_eq!(located.key(), crawled.key());
        assert!(HttpRepository::locate("https://arti.example.com/libs/bad%FF.pdb", HttpOptions::default()).is_err());
    }

    #[rstest]
    #[case(404, "not found")]
    #[case(401, "permission denied")]
    #[case(403, "permission denied")]
    #[case(502, "transport error")]
    fn test_status_error(#[case] status: u16, #[case] prefix: &str) {
        let url = Url::parse("https://arti.example.com/a.exe").unwrap();
        let err = status_error(status, &url);
        assert!((*err).to_string().starts_with(prefix), "{}", *err);
    }

    #[test]
    fn test_token_is_redacted_in_debug() {
        let options = HttpOptions {
            token: Some("secret".to_string()),
            ..HttpOptions::default()
        };
        assert!(!format!("{options:?}").contains("secret"));
        let repository = HttpRepository::new("arti", "https://arti", Vec::new(), options).unwrap();
        assert!(!format!("{repository:?}").contains("secret"));
    }
}
