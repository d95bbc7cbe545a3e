//! Feed snapshots and diffing
//!
//! A feed is polled into a [`FeedSnapshot`]: its entries minus anything
//! matching the configured [`SkipPatterns`] (batch ranges, `[v0]` tags),
//! sorted by title. The snapshot is cached per feed and the next poll is
//! compared against it to find genuinely new releases.
//!
//! Two comparison rules exist:
//! - [`diff`] walks the fresh snapshot from its head and stops at the first
//!   entry equal to the cached head. It suits sources that list newest
//!   first, such as the page watcher's "latest releases" view.
//! - [`unseen`] keeps every fresh entry whose title is absent from the
//!   cached snapshot. Title-sorted feed snapshots use it, since a new
//!   episode can sort anywhere in the list.
//!
//! Both treat an empty cache as a first run and return everything.
//!
//! Fetching is behind the [`FeedFetcher`] trait with one implementation per
//! [`FeedKind`]:
//! - [`RssFeedFetcher`] for nyaa-style RSS (Atom accepted as a fallback)
//! - [`SubsPleaseClient`] for SubsPlease show pages and their JSON API

use crate::config::FeedKind;
use crate::error::Result;
use crate::types::FeedEntry;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

mod nyaa;
mod subsplease;

pub use self::nyaa::RssFeedFetcher;
pub use self::subsplease::SubsPleaseClient;

/// Patterns excluded from every snapshot by default: batch ranges such as
/// `(01-12)` and `[v0]` pre-release tags
pub const DEFAULT_SKIP_PATTERNS: [&str; 2] = [r"\(\s*\d+\s*\-\s*\d*\s*\)", r"\[v0\]"];

/// Fetches the raw entries of one feed
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    /// Fetch the current entries at `url`
    async fn fetch(&self, url: &str) -> Result<Vec<FeedEntry>>;
}

/// Fetchers for every [`FeedKind`], resolved once at startup
#[derive(Clone)]
pub struct FeedSources {
    nyaa_rss: Arc<dyn FeedFetcher>,
    subs_please: Arc<dyn FeedFetcher>,
}

impl FeedSources {
    /// Bundle one fetcher per feed kind
    pub fn new(nyaa_rss: Arc<dyn FeedFetcher>, subs_please: Arc<dyn FeedFetcher>) -> Self {
        Self {
            nyaa_rss,
            subs_please,
        }
    }

    /// Fetcher for a feed kind
    pub fn for_kind(&self, kind: FeedKind) -> &Arc<dyn FeedFetcher> {
        match kind {
            FeedKind::NyaaRss => &self.nyaa_rss,
            FeedKind::SubsPlease => &self.subs_please,
        }
    }
}

/// Compiled skip patterns
#[derive(Clone, Debug)]
pub struct SkipPatterns(Vec<Regex>);

impl SkipPatterns {
    /// Compile `patterns`, dropping (and logging) invalid ones
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Self {
        let compiled = patterns
            .iter()
            .filter_map(|pattern| {
                let pattern = pattern.as_ref();
                regex::RegexBuilder::new(pattern)
                    .size_limit(1024 * 1024)
                    .build()
                    .map_err(|e| {
                        warn!("Invalid skip pattern '{}': {}", pattern, e);
                    })
                    .ok()
            })
            .collect();
        Self(compiled)
    }

    /// Whether `title` matches any pattern
    pub fn matches(&self, title: &str) -> bool {
        self.0.iter().any(|p| p.is_match(title))
    }
}

impl Default for SkipPatterns {
    fn default() -> Self {
        Self::new(&DEFAULT_SKIP_PATTERNS)
    }
}

/// Filtered, title-sorted entries of one poll
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeedSnapshot(Vec<FeedEntry>);

impl FeedSnapshot {
    /// Drop skipped entries and sort the rest by title
    pub fn new(entries: Vec<FeedEntry>, skip: &SkipPatterns) -> Self {
        let mut entries: Vec<FeedEntry> = entries
            .into_iter()
            .filter(|e| !skip.matches(&e.title))
            .collect();
        entries.sort_by(|a, b| a.title.cmp(&b.title));
        Self(entries)
    }

    /// Decode a cached snapshot (`None` is an empty cache)
    pub fn from_cache(cached: Option<&str>) -> Result<Self> {
        match cached {
            Some(json) => Ok(serde_json::from_str(json)?),
            None => Ok(Self::default()),
        }
    }

    /// Encode for caching
    pub fn to_cache(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Entries in snapshot order
    pub fn entries(&self) -> &[FeedEntry] {
        &self.0
    }

    /// Copy of the snapshot without `dropped`
    pub fn without(&self, dropped: &[FeedEntry]) -> Self {
        Self(
            self.0
                .iter()
                .filter(|e| !dropped.contains(e))
                .cloned()
                .collect(),
        )
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the snapshot has no entries
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Entries at the head of `fresh` that precede the cached head
///
/// An empty `cached` yields all of `fresh`. When the cached head is no
/// longer present in `fresh`, every fresh entry is new.
pub fn diff<T: PartialEq + Clone>(cached: &[T], fresh: &[T]) -> Vec<T> {
    match cached.first() {
        None => fresh.to_vec(),
        Some(head) => fresh
            .iter()
            .take_while(|entry| *entry != head)
            .cloned()
            .collect(),
    }
}

/// Entries of `fresh` whose title does not appear in `cached`, in `fresh` order
pub fn unseen(cached: &FeedSnapshot, fresh: &FeedSnapshot) -> Vec<FeedEntry> {
    if cached.is_empty() {
        return fresh.0.clone();
    }

    fresh
        .0
        .iter()
        .filter(|entry| !cached.0.iter().any(|old| old.title == entry.title))
        .cloned()
        .collect()
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn entry(title: &str) -> FeedEntry {
        FeedEntry::with_torrent_url(title, format!("https://nyaa.si/download/{title}.torrent"))
    }

    #[test]
    fn diff_returns_entries_before_cached_head() {
        let cached = vec!["A", "B", "C"];
        let fresh = vec!["X", "A", "B", "C"];
        assert_eq!(diff(&cached, &fresh), vec!["X"]);
    }

    #[test]
    fn diff_with_empty_cache_returns_everything() {
        let fresh = vec!["X", "A"];
        assert_eq!(diff::<&str>(&[], &fresh), fresh);
    }

    #[test]
    fn diff_is_empty_when_nothing_changed() {
        let snapshot = vec!["A", "B"];
        assert!(diff(&snapshot, &snapshot).is_empty());
    }

    #[test]
    fn diff_returns_everything_when_cached_head_disappeared() {
        let cached = vec!["old"];
        let fresh = vec!["X", "Y"];
        assert_eq!(diff(&cached, &fresh), fresh);
    }

    #[test]
    fn snapshot_filters_and_sorts() {
        let snapshot = FeedSnapshot::new(
            vec![
                entry("[Group] Show - 02 [1080p].mkv"),
                entry("[Group] Show (01-12) [1080p]"),
                entry("[Group] Show - 01 [v0][1080p].mkv"),
                entry("[Group] Show - 01 [1080p].mkv"),
            ],
            &SkipPatterns::default(),
        );

        let titles: Vec<_> = snapshot.entries().iter().map(|e| e.title.as_str()).collect();
        assert_eq!(
            titles,
            vec!["[Group] Show - 01 [1080p].mkv", "[Group] Show - 02 [1080p].mkv"]
        );
    }

    #[test]
    fn unseen_finds_entries_sorted_into_the_middle() {
        let skip = SkipPatterns::default();
        let cached = FeedSnapshot::new(vec![entry("A"), entry("C")], &skip);
        let fresh = FeedSnapshot::new(vec![entry("A"), entry("B"), entry("C"), entry("D")], &skip);

        let titles: Vec<_> = unseen(&cached, &fresh)
            .into_iter()
            .map(|e| e.title)
            .collect();
        assert_eq!(titles, vec!["B", "D"]);
    }

    #[test]
    fn unseen_with_empty_cache_returns_everything() {
        let skip = SkipPatterns::default();
        let fresh = FeedSnapshot::new(vec![entry("B"), entry("A")], &skip);
        assert_eq!(unseen(&FeedSnapshot::default(), &fresh).len(), 2);
    }

    #[test]
    fn without_drops_entries_and_keeps_order() {
        let skip = SkipPatterns::default();
        let snapshot = FeedSnapshot::new(vec![entry("C"), entry("A"), entry("B")], &skip);

        let kept = snapshot.without(&[entry("B")]);
        let titles: Vec<_> = kept.entries().iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["A", "C"]);
        // Dropped entries are unseen again
        assert_eq!(unseen(&kept, &snapshot), vec![entry("B")]);
    }

    #[test]
    fn snapshot_cache_round_trip_and_empty_cache() {
        let skip = SkipPatterns::default();
        let snapshot = FeedSnapshot::new(vec![entry("A")], &skip);
        let json = snapshot.to_cache().unwrap();
        assert_eq!(FeedSnapshot::from_cache(Some(&json)).unwrap(), snapshot);
        assert!(FeedSnapshot::from_cache(None).unwrap().is_empty());
        assert!(FeedSnapshot::from_cache(Some("not json")).is_err());
    }

    #[test]
    fn invalid_skip_patterns_are_dropped() {
        let skip = SkipPatterns::new(&["(unclosed", r"\[Batch\]"]);
        assert!(skip.matches("[Group] Show [Batch]"));
        assert!(!skip.matches("[Group] Show - 01"));
    }
}
