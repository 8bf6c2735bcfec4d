//! S3-compatible repository.
//!
//! Walks a bucket (optionally below a key prefix) as if `/` in object keys
//! were a directory separator, using delimited `ListObjectsV2` calls. Objects
//! are read with ranged `GetObject` requests, one window at a time.
//!
//! # Credentials
//!
//! Credentials are passed in explicitly; the SDK credential chain is not
//! consulted.

use crate::error::{ErrorKind, Result};
use crate::node::{Node, NodeKind};
use crate::reader::{BoxSyncReadSeek, DEFAULT_WINDOW_SIZE, RangeFetch, WindowedReader};
use crate::{Repository, validate_path};
use async_trait::async_trait;
use aws_sdk_s3::{
    Client,
    config::{BehaviorVersion, Credentials, Region, retry::RetryConfig},
};
use exn::{OptionExt, ResultExt};
use std::io;
use tokio::runtime::Handle;

/// S3-compatible repository.
///
/// # Examples
///
/// ```no_run
/// use symsrv_storage::backend::S3Repository;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let repository = S3Repository::new(
///     "builds",
///     "build-artifacts",
///     Some("release/".to_string()),
///     "us-west-004",
///     Some("https://s3.us-west-004.backblazeb2.com".to_string()),
///     "access_key_id",
///     "secret_access_key",
/// ).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct S3Repository {
    name: String,
    client: Client,
    bucket: String,
    prefix: Option<String>,
    window_size: usize,
}

impl S3Repository {
    /// Create a new S3 repository.
    ///
    /// # Arguments
    /// * `name` - A name for this repository (used in logging)
    /// * `bucket` - S3 bucket name
    /// * `prefix` - Optional key prefix where the crawl starts
    /// * `region` - AWS region or provider-specific region
    /// * `endpoint` - Custom endpoint URL for S3-compatible services
    /// * `key_id` - Access key ID
    /// * `key_secret` - Secret access key
    pub async fn new(
        name: impl Into<String>,
        bucket: impl Into<String>,
        prefix: Option<String>,
        region: impl Into<String>,
        endpoint: Option<impl Into<String>>,
        key_id: impl Into<String>,
        key_secret: impl Into<String>,
    ) -> Result<Self> {
        let prefix = prefix
            .map(validate_path)
            .transpose()?
            .map(|p| p.to_str().map(|s| s.to_string()).ok_or_raise(|| ErrorKind::InvalidLocation(p.display().to_string())))
            .transpose()?;
        let credentials = Credentials::new(key_id, key_secret, None, None, "symsrv");
        let mut config_builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(Region::new(region.into()))
            // 1 initial attempt + 3 retries with exponential backoff.
            .retry_config(RetryConfig::standard().with_max_attempts(4))
            // Path-style addressing for S3-compatible services (MinIO, Backblaze).
            .force_path_style(true);
        if let Some(endpoint_url) = endpoint {
            config_builder = config_builder.endpoint_url(endpoint_url);
        }
        Ok(Self {
            name: name.into(),
            client: Client::from_conf(config_builder.build()),
            bucket: bucket.into(),
            prefix,
            window_size: DEFAULT_WINDOW_SIZE,
        })
    }

    /// Change the number of bytes fetched per ranged request.
    pub fn with_window_size(mut self, window_size: usize) -> Self {
        self.window_size = window_size;
        self
    }

    fn bucket_part(&self) -> String {
        format!("s3://{}", self.bucket)
    }

    fn location(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket, key)
    }
}

/// Object key of a node: everything after the bucket part.
fn object_key(node: &Node) -> String {
    node.parts().get(1..).unwrap_or_default().join("/")
}

/// `ListObjectsV2` prefix that lists the direct children of a directory key.
fn listing_prefix(key: &str) -> String {
    if key.is_empty() {
        return String::new();
    }
    format!("{}/", key.trim_end_matches('/'))
}

/// Base name of a listed key or common prefix, relative to the listing prefix.
///
/// Returns `None` for the directory marker object (the prefix itself).
fn entry_name<'a>(prefix: &str, key: &'a str) -> Option<&'a str> {
    let name = key.strip_prefix(prefix)?.trim_end_matches('/');
    (!name.is_empty()).then_some(name)
}

#[async_trait]
impl Repository for S3Repository {
    fn name(&self) -> &str {
        &self.name
    }

    async fn roots(&self) -> Result<Vec<Node>> {
        let mut parts = vec![self.bucket_part()];
        if let Some(prefix) = &self.prefix {
            parts.extend(prefix.split('/').filter(|s| !s.is_empty()).map(String::from));
        }
        let key = parts[1..].join("/");
        Ok(vec![Node::directory(parts, self.location(&key))])
    }

    async fn children(&self, node: &Node) -> Result<Vec<Node>> {
        if !node.is_directory() {
            exn::bail!(ErrorKind::InvalidLocation(format!("cannot list file {}", node.location())));
        }
        let prefix = listing_prefix(&object_key(node));
        let mut children = Vec::new();
        let mut continuation_token: Option<String> = None;
        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&prefix)
                .delimiter("/")
                .set_continuation_token(continuation_token.take())
                .send()
                .await
                .or_raise(|| ErrorKind::Transport(format!("failed to list {}", node.location())))?;
            for common in response.common_prefixes() {
                if let Some(name) = common.prefix().and_then(|p| entry_name(&prefix, p)) {
                    let location = self.location(&format!("{prefix}{name}"));
                    children.push(node.child(name, NodeKind::Directory, location));
                }
            }
            for object in response.contents() {
                if let Some(name) = object.key().and_then(|k| entry_name(&prefix, k)) {
                    let location = self.location(&format!("{prefix}{name}"));
                    children.push(node.child(name, NodeKind::File, location));
                }
            }
            match response.next_continuation_token() {
                Some(token) if response.is_truncated().unwrap_or(false) => {
                    continuation_token = Some(token.to_string());
                },
                _ => break,
            }
        }
        tracing::debug!(bucket = %self.bucket, prefix = %prefix, count = children.len(), "Listed objects");
        Ok(children)
    }

    async fn open(&self, node: &Node) -> Result<BoxSyncReadSeek> {
        let key = object_key(node);
        let head = match self.client.head_object().bucket(&self.bucket).key(&key).send().await {
            Ok(head) => head,
            Err(err) if err.as_service_error().is_some_and(|e| e.is_not_found()) => {
                exn::bail!(ErrorKind::NotFound(node.location().to_string()))
            },
            Err(err) => Err(err).or_raise(|| ErrorKind::Transport(node.location().to_string()))?,
        };
        let len = head
            .content_length()
            .and_then(|len| u64::try_from(len).ok())
            .ok_or_raise(|| ErrorKind::Transport(format!("{}: missing content length", node.location())))?;
        let fetch = S3RangeFetch {
            client: self.client.clone(),
            bucket: self.bucket.clone(),
            key,
            len,
            runtime: Handle::current(),
        };
        Ok(Box::new(WindowedReader::new(fetch, self.window_size)))
    }
}

/// Blocking ranged `GetObject`s against a single key.
struct S3RangeFetch {
    client: Client,
    bucket: String,
    key: String,
    len: u64,
    runtime: Handle,
}
impl RangeFetch for S3RangeFetch {
    fn len(&self) -> u64 {
        self.len
    }

    fn fetch(&mut self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        if len == 0 {
            return Ok(Vec::new());
        }
        let end = offset + len as u64 - 1;
        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&self.key)
            .range(format!("bytes={offset}-{end}"));
        self.runtime.block_on(async move {
            let output = request.send().await.map_err(io::Error::other)?;
            let body = output.body.collect().await.map_err(io::Error::other)?;
            Ok(body.into_bytes().to_vec())
        })
    }
}
