//! Configuration for symsrv.
//!
//! Values are layered, later sources winning:
//!
//! 1. built-in defaults,
//! 2. `<config dir>/symsrv/config.toml`, if it exists,
//! 3. an explicitly requested config file (which must exist),
//! 4. `SYMSRV_*` environment variables,
//! 5. command-line flags ([`Overrides`]).
//!
//! ```toml
//! store = "/srv/symbols"
//! threads = 16
//! exclude = ["/test/", "/obj/"]
//! link_mode = true
//!
//! # Only read by `publish --s3`.
//! s3_region = "us-west-004"
//! s3_endpoint = "https://s3.us-west-004.backblazeb2.com"
//! s3_key_id = "..."
//! s3_key_secret = "..."
//! ```

pub mod error;
mod load;

pub use crate::load::{Loader, Overrides, default_config_file, load};
use crate::error::{ErrorKind, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_THREADS: usize = 8;
pub const DEFAULT_FLUSH_EVERY: usize = 16;
pub const DEFAULT_WINDOW_SIZE: usize = 4 * 1024 * 1024;
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_S3_REGION: &str = "us-east-1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root directory of the symbol store (database, ledger, copied files).
    pub store: PathBuf,
    /// Concurrent directory listings during a crawl.
    pub threads: usize,
    /// Locations containing any of these substrings are skipped.
    #[serde(deserialize_with = "string_or_list")]
    pub exclude: Vec<String>,
    /// Write pointer files instead of copying artifact bytes.
    pub link_mode: bool,
    /// Republish artifacts the store already knows about.
    pub overwrite: bool,
    /// Persist the visited-location ledger after this many handled artifacts.
    pub flush_every: usize,
    /// Bytes fetched per ranged request when reading remote artifacts.
    pub window_size: usize,
    pub timeout_secs: u64,
    /// Bearer token for HTTP repositories.
    pub token: Option<String>,
    pub s3_region: String,
    /// Custom endpoint for S3-compatible services.
    pub s3_endpoint: Option<String>,
    pub s3_key_id: Option<String>,
    pub s3_key_secret: Option<String>,
}
impl Default for Config {
    fn default() -> Self {
        Self {
            store: PathBuf::from("symbols"),
            threads: DEFAULT_THREADS,
            exclude: Vec::new(),
            link_mode: false,
            overwrite: false,
            flush_every: DEFAULT_FLUSH_EVERY,
            window_size: DEFAULT_WINDOW_SIZE,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            token: None,
            s3_region: DEFAULT_S3_REGION.to_string(),
            s3_endpoint: None,
            s3_key_id: None,
            s3_key_secret: None,
        }
    }
}
impl Config {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Check value ranges that the schema alone cannot express.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("threads", self.threads as u64),
            ("flush_every", self.flush_every as u64),
            ("window_size", self.window_size as u64),
            ("timeout_secs", self.timeout_secs),
        ];
        for (name, value) in positive {
            if value == 0 {
                exn::bail!(ErrorKind::Invalid(format!("{name} must be at least 1")));
            }
        }
        if self.store.as_os_str().is_empty() {
            exn::bail!(ErrorKind::Invalid("store must not be empty".to_string()));
        }
        let optional = [
            ("token", &self.token),
            ("s3_endpoint", &self.s3_endpoint),
            ("s3_key_id", &self.s3_key_id),
            ("s3_key_secret", &self.s3_key_secret),
        ];
        for (name, value) in optional {
            if value.as_deref().is_some_and(str::is_empty) {
                exn::bail!(ErrorKind::Invalid(format!("{name} must not be empty when set")));
            }
        }
        if self.s3_region.is_empty() {
            exn::bail!(ErrorKind::Invalid("s3_region must not be empty".to_string()));
        }
        Ok(())
    }

    /// The S3 access key pair, which must be configured before a bucket can be
    /// crawled.
    pub fn s3_credentials(&self) -> Result<(&str, &str)> {
        match (self.s3_key_id.as_deref(), self.s3_key_secret.as_deref()) {
            (Some(id), Some(secret)) => Ok((id, secret)),
            _ => exn::bail!(ErrorKind::Invalid("s3_key_id and s3_key_secret must both be set".to_string())),
        }
    }
}

/// Split a comma-separated exclusion list, trimming entries and dropping
/// empty ones.
///
/// ```
/// use symsrv_config::parse_excludes;
/// assert_eq!(parse_excludes(" /test/ ,, /obj/"), vec!["/test/", "/obj/"]);
/// ```
pub fn parse_excludes(list: &str) -> Vec<String> {
    list.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect()
}

/// Accept either a TOML array or a comma-separated string (as environment
/// variables deliver it).
fn string_or_list<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrList {
        String(String),
        List(Vec<String>),
    }
    Ok(match StringOrList::deserialize(deserializer)? {
        StringOrList::String(list) => parse_excludes(&list),
        StringOrList::List(items) => items.iter().flat_map(|item| parse_excludes(item)).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("", vec![])]
    #[case("a", vec!["a"])]
    #[case("a,b", vec!["a", "b"])]
    #[case(" a , b ", vec!["a", "b"])]
    #[case("a,,b,", vec!["a", "b"])]
    #[case(" , ", vec![])]
    fn test_parse_excludes(#[case] input: &str, #[case] expected: Vec<&str>) {
        assert_eq!(parse_excludes(input), expected);
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.threads, 8);
        assert_eq!(config.flush_every, 16);
        assert_eq!(config.window_size, 4 * 1024 * 1024);
        assert_eq!(config.timeout(), Duration::from_secs(60));
    }

    #[rstest]
    #[case::threads(Config { threads: 0, ..Config::default() }, "threads")]
    #[case::flush(Config { flush_every: 0, ..Config::default() }, "flush_every")]
    #[case::window(Config { window_size: 0, ..Config::default() }, "window_size")]
    #[case::timeout(Config { timeout_secs: 0, ..Config::default() }, "timeout_secs")]
    #[case::store(Config { store: PathBuf::new(), ..Config::default() }, "store")]
    #[case::token(Config { token: Some(String::new()), ..Config::default() }, "token")]
    #[case::s3_key(Config { s3_key_id: Some(String::new()), ..Config::default() }, "s3_key_id")]
    #[case::s3_region(Config { s3_region: String::new(), ..Config::default() }, "s3_region")]
    fn test_validate_rejects(#[case] config: Config, #[case] field: &str) {
        let err = config.validate().unwrap_err();
        match &*err {
            ErrorKind::Invalid(message) => assert!(message.starts_with(field), "{message}"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_s3_credentials_need_both_halves() {
        let mut config = Config {
            s3_key_id: Some("id".to_string()),
            ..Config::default()
        };
        let err = config.s3_credentials().unwrap_err();
        assert!(matches!(&*err, ErrorKind::Invalid(_)));
        config.s3_key_secret = Some("secret".to_string());
        assert_eq!(config.s3_credentials().unwrap(), ("id", "secret"));
    }
}
