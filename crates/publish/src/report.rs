use std::fmt;

/// Why an artifact was not published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Its location matched an exclusion substring.
    Excluded,
    /// The ledger already holds it from this or an earlier run.
    Visited,
    /// The store already knows its hash or filename and overwriting is off.
    Existing,
}

/// Counters for a whole publish run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub published: u64,
    /// Published artifacts that replaced an existing symbol.
    pub overwritten: u64,
    pub skipped_excluded: u64,
    pub skipped_visited: u64,
    pub skipped_existing: u64,
    pub failed: u64,
}
impl PublishReport {
    pub fn record_published(&mut self, overwritten: bool) {
        self.published += 1;
        if overwritten {
            self.overwritten += 1;
        }
    }

    pub fn record_skipped(&mut self, reason: SkipReason) {
        match reason {
            SkipReason::Excluded => self.skipped_excluded += 1,
            SkipReason::Visited => self.skipped_visited += 1,
            SkipReason::Existing => self.skipped_existing += 1,
        }
    }

    pub fn record_failed(&mut self) {
        self.failed += 1;
    }

    pub fn skipped(&self) -> u64 {
        self.skipped_excluded + self.skipped_visited + self.skipped_existing
    }

    /// Every artifact the pipeline saw.
    pub fn total(&self) -> u64 {
        self.published + self.skipped() + self.failed
    }
}
impl fmt::Display for PublishReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "published {} ({} overwritten), skipped {} ({} excluded, {} visited, {} existing), failed {}",
            self.published,
            self.overwritten,
            self.skipped(),
            self.skipped_excluded,
            self.skipped_visited,
            self.skipped_existing,
            self.failed,
        )
    }
}
