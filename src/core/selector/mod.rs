use std::collections::HashSet;

use chrono::{DateTime, TimeDelta, Utc};
use regex::Regex;

use crate::core::feed::types::FeedEntry;
use crate::core::storage::SeenStore;

/// Title filter of a feed.
///
/// Patterns are anchored at the start of the title: `video` matches
/// "video clip" but not "my video". Use `.*video` to match anywhere. An
/// empty pattern matches every title.
#[derive(Debug, Clone)]
pub struct TitlePattern {
    source: String,
    regex: Option<Regex>,
}

impl TitlePattern {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        let regex = if pattern.is_empty() {
            None
        } else {
            Some(Regex::new(pattern)?)
        };
        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, title: &str) -> bool {
        // Leftmost match starts at 0 whenever any match does.
        self.regex
            .as_ref()
            .is_none_or(|regex| regex.find(title).is_some_and(|found| found.start() == 0))
    }
}

/// Age window applied to entry timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgeLimit {
    days: u32,
}

impl AgeLimit {
    pub fn days(days: u32) -> Self {
        Self { days }
    }

    pub fn as_days(&self) -> u32 {
        self.days
    }

    /// Oldest accepted timestamp, or `None` when the window reaches past
    /// the representable range.
    pub fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        now.checked_sub_signed(TimeDelta::days(i64::from(self.days)))
    }

    /// Undated entries count as age zero.
    pub fn admits(&self, published: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match (published, self.cutoff(now)) {
            (Some(published), Some(cutoff)) => published >= cutoff,
            _ => true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SelectionStats {
    pub considered: usize,
    pub too_old: usize,
    pub already_seen: usize,
    pub unmatched: usize,
    pub duplicates: usize,
}

#[derive(Debug)]
pub struct Selection<'a> {
    pub entries: Vec<&'a FeedEntry>,
    pub stats: SelectionStats,
}

/// Picks the entries of one feed that should be downloaded, in feed order.
pub fn select_entries<'a>(
    feed_url: &str,
    entries: &'a [FeedEntry],
    pattern: &TitlePattern,
    age_limit: AgeLimit,
    seen: &SeenStore,
    now: DateTime<Utc>,
) -> Selection<'a> {
    let mut stats = SelectionStats {
        considered: entries.len(),
        ..SelectionStats::default()
    };
    let mut picked_ids: HashSet<&str> = HashSet::new();
    let mut selected = Vec::new();

    for entry in entries {
        if !age_limit.admits(entry.published, now) {
            stats.too_old += 1;
            continue;
        }
        if seen.is_seen(feed_url, &entry.id) {
            stats.already_seen += 1;
            continue;
        }
        if !pattern.matches(&entry.title) {
            stats.unmatched += 1;
            continue;
        }
        if !picked_ids.insert(entry.id.as_str()) {
            stats.duplicates += 1;
            continue;
        }
        selected.push(entry);
    }

    Selection {
        entries: selected,
        stats,
    }
}
