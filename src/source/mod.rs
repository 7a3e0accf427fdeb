//! Source-control activity
//!
//! An [`ActivitySource`] lists the commits made inside a time window. The
//! GitHub implementation walks every configured repository; a repository
//! that cannot be read is logged and skipped so one bad entry does not hide
//! the rest of the day.

mod github;

pub use github::{GithubClient, next_page_url};

use crate::workflow::{Schema, Shape};
use async_trait::async_trait;
use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Half-open interval `[start, end)` of activity to fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Shape for ActivityWindow {
    fn schema() -> Schema {
        Schema::object([("start", Schema::String), ("end", Schema::String)])
    }
}

impl ActivityWindow {
    /// The whole UTC calendar day
    pub fn for_day(date: NaiveDate) -> Self {
        let start = date.and_time(chrono::NaiveTime::MIN).and_utc();
        let end = date
            .checked_add_days(Days::new(1))
            .map(|next| next.and_time(chrono::NaiveTime::MIN).and_utc())
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self { start, end }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }
}

/// One commit as reported by the source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    /// `owner/name`
    pub repository: String,
    pub sha: String,
    pub message: String,
    pub url: String,
    pub author: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl Commit {
    /// First line of the message
    pub fn headline(&self) -> &str {
        self.message.lines().next().unwrap_or_default()
    }

    pub fn short_sha(&self) -> &str {
        self.sha.get(..7).unwrap_or(&self.sha)
    }
}

impl Shape for Commit {
    fn schema() -> Schema {
        Schema::object([
            ("repository", Schema::String),
            ("sha", Schema::String),
            ("message", Schema::String),
            ("url", Schema::String),
            ("author", Schema::nullable(Schema::String)),
            ("timestamp", Schema::nullable(Schema::String)),
        ])
    }
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("invalid repository '{0}', expected owner/name")]
    InvalidRepository(String),

    #[error("request for {repository} failed: {message}")]
    Http { repository: String, message: String },

    #[error("{repository} returned HTTP {status}: {body}")]
    Status {
        repository: String,
        status: u16,
        body: String,
    },

    #[error("unexpected response for {repository}: {message}")]
    Decode { repository: String, message: String },

    #[error("source not configured: {0}")]
    Config(String),
}

/// Anything that can list commits for a window
#[async_trait]
pub trait ActivitySource: Send + Sync {
    /// Commits from every repository the source knows about
    async fn fetch_commits(&self, window: &ActivityWindow) -> Result<Vec<Commit>, SourceError>;

    fn name(&self) -> &str;
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns the same commits for any window and counts calls
    pub(crate) struct StaticSource {
        commits: Vec<Commit>,
        fail: bool,
        pub calls: AtomicUsize,
    }

    impl StaticSource {
        pub fn new(commits: Vec<Commit>) -> Self {
            Self {
                commits,
                fail: false,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn failing() -> Self {
            Self {
                commits: Vec::new(),
                fail: true,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ActivitySource for StaticSource {
        async fn fetch_commits(&self, _window: &ActivityWindow) -> Result<Vec<Commit>, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(SourceError::Config("no token".into()));
            }
            Ok(self.commits.clone())
        }

        fn name(&self) -> &str {
            "static"
        }
    }

    pub(crate) fn commit(repository: &str, sha: &str, message: &str) -> Commit {
        Commit {
            repository: repository.to_string(),
            sha: sha.to_string(),
            message: message.to_string(),
            url: format!("https://github.com/{}/commit/{}", repository, sha),
            author: Some("octocat".into()),
            timestamp: None,
        }
    }

    #[test]
    fn test_window_for_day() {
        let window = ActivityWindow::for_day(NaiveDate::from_ymd_opt(2024, 2, 28).unwrap());
        assert_eq!(window.start.to_rfc3339(), "2024-02-28T00:00:00+00:00");
        assert_eq!(window.end.to_rfc3339(), "2024-02-29T00:00:00+00:00");
        assert!(window.contains(window.start));
        assert!(!window.contains(window.end));
    }

    #[test]
    fn test_commit_helpers() {
        let c = commit("acme/api", "0123456789abcdef", "Add cache\n\nLonger body");
        assert_eq!(c.headline(), "Add cache");
        assert_eq!(c.short_sha(), "0123456");
        assert_eq!(commit("acme/api", "abc", "").short_sha(), "abc");
    }

    #[test]
    fn test_commit_matches_its_schema() {
        let c = Commit {
            timestamp: Some("2024-05-01T10:00:00Z".parse().unwrap()),
            ..commit("acme/api", "abc", "msg")
        };
        let value = serde_json::to_value(&c).unwrap();
        assert!(Commit::schema().validate(&value).is_ok());

        let value = serde_json::to_value(commit("acme/api", "abc", "msg")).unwrap();
        assert!(Commit::schema().validate(&value).is_ok());
    }
}
