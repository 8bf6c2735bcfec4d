//! Content hash providers.
//!
//! A provider reads a seekable stream and returns the hash under which the
//! artifact is published, or `None` if it does not recognise the format.
//! Providers must never panic or fail on malformed input: a chain tries
//! several formats in turn and a miss is not an error.

use std::io::{self, SeekFrom};
use symsrv_storage::ReadSeek;

pub trait HashProvider: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Hash the stream, starting from its current position.
    fn hash(&self, stream: &mut dyn ReadSeek) -> Option<String>;
}

/// Try several providers in order; the first hash wins.
///
/// The stream is rewound to the start before each attempt.
#[derive(Default)]
pub struct FormatChain {
    providers: Vec<Box<dyn HashProvider>>,
}
impl FormatChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, provider: impl HashProvider + 'static) -> Self {
        self.providers.push(Box::new(provider));
        self
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
impl HashProvider for FormatChain {
    fn name(&self) -> &str {
        "chain"
    }

    fn hash(&self, stream: &mut dyn ReadSeek) -> Option<String> {
        for provider in &self.providers {
            if let Err(error) = stream.seek(SeekFrom::Start(0)) {
                tracing::debug!(%error, "Could not rewind stream between hash providers");
                return None;
            }
            if let Some(hash) = provider.hash(stream) {
                tracing::trace!(provider = provider.name(), %hash, "Hash provider matched");
                return Some(hash);
            }
        }
        None
    }
}

/// BLAKE3 digest of the whole stream, as lowercase hex.
///
/// Recognises every non-empty input. This is a content digest, not the
/// signature/age identifier a symbol server derives from PE or PDB headers;
/// a [`FormatChain`] with real format parsers in front of it keeps those
/// identifiers and falls back to this for anything else.
#[derive(Debug, Default, Clone, Copy)]
pub struct Blake3Digest;
impl HashProvider for Blake3Digest {
    fn name(&self) -> &str {
        "blake3"
    }

    fn hash(&self, stream: &mut dyn ReadSeek) -> Option<String> {
        let mut hasher = blake3::Hasher::new();
        match io::copy(stream, &mut hasher) {
            Ok(0) => None,
            Ok(_) => Some(hasher.finalize().to_hex().to_string()),
            Err(error) => {
                tracing::debug!(%error, "Read failed while hashing");
                None
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read};

    /// Recognises streams that start with a fixed magic and hashes the rest
    /// to the literal text that follows.
    struct Magic(&'static str);
    impl HashProvider for Magic {
        fn name(&self) -> &str {
            self.0
        }

        fn hash(&self, stream: &mut dyn ReadSeek) -> Option<String> {
            let mut contents = String::new();
            stream.read_to_string(&mut contents).ok()?;
            contents.strip_prefix(self.0).map(String::from)
        }
    }

    #[test]
    fn test_blake3_digest() {
        let mut stream = Cursor::new(b"abc".to_vec());
        let hash = Blake3Digest.hash(&mut stream).unwrap();
        assert_eq!(hash, blake3::hash(b"abc").to_hex().to_string());
        assert!(Blake3Digest.hash(&mut Cursor::new(Vec::new())).is_none());
    }

    #[test]
    fn test_chain_rewinds_between_providers() {
        let chain = FormatChain::new().with(Magic("PE:")).with(Magic("PDB:"));
        assert_eq!(chain.len(), 2);
        assert_eq!(chain.hash(&mut Cursor::new(b"PDB:H2".to_vec())).as_deref(), Some("H2"));
        assert_eq!(chain.hash(&mut Cursor::new(b"PE:H1".to_vec())).as_deref(), Some("H1"));
        assert_eq!(chain.hash(&mut Cursor::new(b"ELF".to_vec())), None);
    }

    #[test]
    fn test_chain_falls_back_to_digest() {
        let chain = FormatChain::new().with(Magic("PE:")).with(Blake3Digest);
        let hash = chain.hash(&mut Cursor::new(b"not a PE".to_vec())).unwrap();
        assert_eq!(hash, blake3::hash(b"not a PE").to_hex().to_string());
    }

    #[test]
    fn test_empty_chain_hashes_nothing() {
        let chain = FormatChain::new();
        assert!(chain.is_empty());
        assert_eq!(chain.hash(&mut Cursor::new(b"PE:H1".to_vec())), None);
    }

    #[test]
    fn test_chain_starts_from_beginning() {
        let mut stream = Cursor::new(b"PE:H1".to_vec());
        stream.read_exact(&mut [0u8; 3]).unwrap();
        let chain = FormatChain::new().with(Magic("PE:"));
        assert_eq!(chain.hash(&mut stream).as_deref(), Some("H1"));
    }
}
