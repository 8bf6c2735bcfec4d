//! Exclusion rules and artifact classification.

use symsrv_storage::normalize_separators;

const ARCHIVE_EXTENSIONS: &[&str] = &[".zip", ".nupkg"];
const SYMBOL_EXTENSIONS: &[&str] = &[".dll", ".exe", ".pdb"];

/// What the pipeline does with a file, judged by its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// `.zip` / `.nupkg`: a container of symbol files.
    Archive,
    /// `.dll` / `.exe` / `.pdb`: hashed and published directly.
    Symbol,
    /// Anything else.
    Other,
}
impl ArtifactKind {
    /// Classify by extension, ignoring case.
    pub fn from_name(name: &str) -> Self {
        let lowered = name.to_ascii_lowercase();
        let has = |extensions: &[&str]| extensions.iter().any(|ext| lowered.ends_with(ext));
        match (has(ARCHIVE_EXTENSIONS), has(SYMBOL_EXTENSIONS)) {
            (true, _) => Self::Archive,
            (_, true) => Self::Symbol,
            _ => Self::Other,
        }
    }

    /// Whether a crawl hands this file to the deploy queue at all.
    pub fn is_eligible(self) -> bool {
        !matches!(self, Self::Other)
    }
}

/// `true` if the location, with `\` normalized to `/`, contains any of the
/// (non-empty) exclusion substrings.
pub fn is_excluded(location: &str, excludes: &[String]) -> bool {
    if excludes.is_empty() {
        return false;
    }
    let normalized = normalize_separators(location);
    excludes.iter().any(|exclude| !exclude.is_empty() && normalized.contains(exclude.as_str()))
}
