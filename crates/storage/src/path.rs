//! Path normalization utilities.

use std::path::{Component, Path, PathBuf};

use crate::error::{ErrorKind, Result};

/// Unify path separators to forward slashes.
///
/// Locations arrive as Windows paths, Unix paths and URLs; exclusion rules are
/// written with forward slashes only.
///
/// ```
/// use symsrv_storage::normalize_separators;
/// assert_eq!(normalize_separators(r"C:\build\x64\app.pdb"), "C:/build/x64/app.pdb");
/// ```
pub fn normalize_separators(location: impl AsRef<str>) -> String {
    location.as_ref().replace('\\', "/")
}

/// Turn a path into a clean, repository-relative one.
///
/// A leading `/` is stripped rather than rejected, so `/sub/b.pdb` and
/// `sub/b.pdb` name the same file. `.` components and repeated separators
/// are dropped. Rejected: a `..` that would climb above the root, Windows
/// drive prefixes, null bytes, and paths that are empty once cleaned.
/// Backslashes are not treated as separators.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use symsrv_storage::validate_path;
/// assert!(validate_path("sub/b.pdb").is_ok());
/// assert!(validate_path("../etc/passwd").is_err());
/// assert_eq!(validate_path("a/./b//c.dll/").unwrap(), Path::new("a/b/c.dll"));
/// assert_eq!(validate_path("/sub/b.pdb").unwrap(), Path::new("sub/b.pdb"));
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let invalid = || ErrorKind::InvalidLocation(path.as_ref().display().to_string());
    let mut components = Vec::new();
    for component in path.as_ref().components() {
        match component {
            Component::Normal(s) => {
                // Null bytes pass through Path::components() on Unix but cause
                // truncation in C-based syscalls.
                if s.as_encoded_bytes().contains(&0) {
                    exn::bail!(invalid());
                }
                components.push(s)
            },
            Component::CurDir | Component::RootDir => {},
            Component::Prefix(_) => exn::bail!(invalid()),
            Component::ParentDir => {
                if components.pop().is_none() {
                    exn::bail!(invalid());
                }
            },
        }
    }
    if components.is_empty() {
        exn::bail!(invalid());
    }
    Ok(components.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(r"a\b\c.exe", "a/b/c.exe")]
    #[case("a/b/c.exe", "a/b/c.exe")]
    #[case(r"\\share\symbols/x.pdb", "//share/symbols/x.pdb")]
    #[case("https://example.com/a.dll", "https://example.com/a.dll")]
    fn test_normalize_separators(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalize_separators(input), expected);
    }

    #[test]
    fn test_valid_paths() {
        assert_eq!(validate("repo/a.exe").unwrap(), Path::new("repo/a.exe"));
        assert_eq!(validate("a//b/./c/").unwrap(), Path::new("a/b/c"));
        assert_eq!(validate("a/b/..").unwrap(), Path::new("a"));
    }

    #[test]
    fn test_leading_root_is_stripped() {
        assert_eq!(validate("/sub/b.pdb").unwrap(), Path::new("sub/b.pdb"));
        assert!(validate("/").is_err());
    }

    #[test]
    fn test_invalid_paths() {
        assert!(validate("../etc/passwd").is_err());
        assert!(validate("a/../../b").is_err());
        assert!(validate("a\0b").is_err());
        assert!(validate("").is_err());
        assert!(validate("./.").is_err());
    }
}
