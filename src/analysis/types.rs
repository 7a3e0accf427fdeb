//! Data flowing through the daily analysis workflow

use crate::source::Commit;
use crate::workflow::{ForeachItemError, Schema, Shape};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Run input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub date: NaiveDate,
    /// Analyze again even when a report for the date exists
    #[serde(default)]
    pub force_regenerate: bool,
}

impl Shape for AnalysisRequest {
    fn schema() -> Schema {
        Schema::object([("date", Schema::String)]).optional_field("force_regenerate", Schema::Boolean)
    }
}

/// Result of the lookup that decides whether the expensive path runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkipCheck {
    pub date: NaiveDate,
    pub proceed: bool,
    pub existing_log_id: Option<String>,
}

impl Shape for SkipCheck {
    fn schema() -> Schema {
        Schema::object([
            ("date", Schema::String),
            ("proceed", Schema::Boolean),
            ("existing_log_id", Schema::nullable(Schema::String)),
        ])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitCategory {
    Feature,
    Bugfix,
    Refactor,
    Docs,
    Test,
    Style,
    Perf,
    Build,
    Ci,
    Chore,
}

impl CommitCategory {
    /// Lenient parse of a model-provided label; unknown labels are chores
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "feature" | "feat" => Self::Feature,
            "bugfix" | "fix" | "bug" => Self::Bugfix,
            "refactor" => Self::Refactor,
            "docs" | "documentation" => Self::Docs,
            "test" | "tests" => Self::Test,
            "style" => Self::Style,
            "perf" | "performance" => Self::Perf,
            "build" => Self::Build,
            "ci" => Self::Ci,
            _ => Self::Chore,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Feature => "feature",
            Self::Bugfix => "bugfix",
            Self::Refactor => "refactor",
            Self::Docs => "docs",
            Self::Test => "test",
            Self::Style => "style",
            Self::Perf => "perf",
            Self::Build => "build",
            Self::Ci => "ci",
            Self::Chore => "chore",
        }
    }
}

impl fmt::Display for CommitCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Impact {
    Minor,
    Moderate,
    Major,
}

impl Impact {
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "major" | "high" => Self::Major,
            "moderate" | "medium" => Self::Moderate,
            _ => Self::Minor,
        }
    }
}

impl fmt::Display for Impact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Minor => "minor",
            Self::Moderate => "moderate",
            Self::Major => "major",
        })
    }
}

/// Per-commit analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitAnalysis {
    pub repository: String,
    pub sha: String,
    pub url: String,
    pub summary: String,
    pub category: CommitCategory,
    pub impact: Impact,
    pub technical_details: Vec<String>,
}

impl Shape for CommitAnalysis {
    fn schema() -> Schema {
        Schema::object([
            ("repository", Schema::String),
            ("sha", Schema::String),
            ("url", Schema::String),
            ("summary", Schema::String),
            ("category", Schema::String),
            ("impact", Schema::String),
            ("technical_details", Schema::array(Schema::String)),
        ])
    }
}

/// What the model is asked to return for one commit
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct CommitAnalysisReply {
    pub summary: String,
    pub category: String,
    pub impact: String,
    #[serde(default)]
    pub technical_details: Vec<String>,
}

impl CommitAnalysisReply {
    pub fn schema() -> Schema {
        Schema::object([
            ("summary", Schema::String),
            ("category", Schema::String),
            ("impact", Schema::String),
        ])
        .optional_field("technical_details", Schema::array(Schema::String))
    }

    pub fn into_analysis(self, commit: &Commit) -> CommitAnalysis {
        CommitAnalysis {
            repository: commit.repository.clone(),
            sha: commit.sha.clone(),
            url: commit.url.clone(),
            summary: self.summary.trim().to_string(),
            category: CommitCategory::from_label(&self.category),
            impact: Impact::from_label(&self.impact),
            technical_details: self.technical_details,
        }
    }
}

/// Fan-in of the per-commit analyses for one day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisCollection {
    pub date: NaiveDate,
    pub analyses: Vec<CommitAnalysis>,
    pub failed: Vec<ForeachItemError>,
}

impl AnalysisCollection {
    pub fn total_commits(&self) -> usize {
        self.analyses.len() + self.failed.len()
    }
}

impl Shape for AnalysisCollection {
    fn schema() -> Schema {
        Schema::object([
            ("date", Schema::String),
            ("analyses", Schema::array(CommitAnalysis::schema())),
            (
                "failed",
                Schema::array(Schema::object([
                    ("index", Schema::Integer),
                    ("step", Schema::String),
                    ("message", Schema::String),
                ])),
            ),
        ])
    }
}

/// Analyses of one repository, the unit of the repository fan-out
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryGroup {
    pub repository: String,
    pub date: NaiveDate,
    pub analyses: Vec<CommitAnalysis>,
}

impl Shape for RepositoryGroup {
    fn schema() -> Schema {
        Schema::object([
            ("repository", Schema::String),
            ("date", Schema::String),
            ("analyses", Schema::array(CommitAnalysis::schema())),
        ])
    }
}

/// Group analyses by repository, repositories in name order, commits in input order
pub fn group_by_repository(collection: &AnalysisCollection) -> Vec<RepositoryGroup> {
    let mut groups: BTreeMap<&str, Vec<CommitAnalysis>> = BTreeMap::new();
    for analysis in &collection.analyses {
        groups
            .entry(analysis.repository.as_str())
            .or_default()
            .push(analysis.clone());
    }

    groups
        .into_iter()
        .map(|(repository, analyses)| RepositoryGroup {
            repository: repository.to_string(),
            date: collection.date,
            analyses,
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Momentum {
    Accelerating,
    Steady,
    Slowing,
    Blocked,
}

impl Momentum {
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "accelerating" => Self::Accelerating,
            "slowing" => Self::Slowing,
            "blocked" => Self::Blocked,
            _ => Self::Steady,
        }
    }
}

impl fmt::Display for Momentum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Momentum::Accelerating => "accelerating",
            Momentum::Steady => "steady",
            Momentum::Slowing => "slowing",
            Momentum::Blocked => "blocked",
        };
        f.write_str(s)
    }
}

/// Day summary for one repository
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositorySummary {
    pub repository: String,
    pub commit_count: usize,
    pub summary: String,
    pub focus_areas: Vec<String>,
    pub momentum: Momentum,
}

impl RepositorySummary {
    /// Summary assembled from the commit analyses alone
    pub fn from_group(group: &RepositoryGroup) -> Self {
        let summary = group
            .analyses
            .iter()
            .map(|a| a.summary.as_str())
            .collect::<Vec<_>>()
            .join(" ");

        let mut focus_areas: Vec<String> = Vec::new();
        for analysis in &group.analyses {
            let label = analysis.category.to_string();
            if !focus_areas.contains(&label) {
                focus_areas.push(label);
            }
        }

        Self {
            repository: group.repository.clone(),
            commit_count: group.analyses.len(),
            summary,
            focus_areas,
            momentum: Momentum::Steady,
        }
    }
}

impl Shape for RepositorySummary {
    fn schema() -> Schema {
        Schema::object([
            ("repository", Schema::String),
            ("commit_count", Schema::Integer),
            ("summary", Schema::String),
            ("focus_areas", Schema::array(Schema::String)),
            ("momentum", Schema::String),
        ])
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RepositorySummaryReply {
    pub summary: String,
    #[serde(default)]
    pub focus_areas: Vec<String>,
    #[serde(default)]
    pub momentum: Option<String>,
}

impl RepositorySummaryReply {
    pub fn schema() -> Schema {
        Schema::object([("summary", Schema::String)])
            .optional_field("focus_areas", Schema::array(Schema::String))
            .optional_field("momentum", Schema::nullable(Schema::String))
    }

    pub fn into_summary(self, group: &RepositoryGroup) -> RepositorySummary {
        RepositorySummary {
            repository: group.repository.clone(),
            commit_count: group.analyses.len(),
            summary: self.summary.trim().to_string(),
            focus_areas: self.focus_areas,
            momentum: self
                .momentum
                .as_deref()
                .map(Momentum::from_label)
                .unwrap_or(Momentum::Steady),
        }
    }
}

/// Numbers computed from the analyses, independent of the model
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DailyMetrics {
    pub total_commits: usize,
    pub analyzed_commits: usize,
    pub failed_commits: usize,
    pub repositories: usize,
    pub categories: BTreeMap<String, usize>,
}

impl DailyMetrics {
    pub fn from_collection(collection: &AnalysisCollection) -> Self {
        let mut categories = BTreeMap::new();
        for analysis in &collection.analyses {
            *categories.entry(analysis.category.to_string()).or_insert(0) += 1;
        }

        let mut repositories: Vec<&str> = collection
            .analyses
            .iter()
            .map(|a| a.repository.as_str())
            .collect();
        repositories.sort_unstable();
        repositories.dedup();

        Self {
            total_commits: collection.total_commits(),
            analyzed_commits: collection.analyses.len(),
            failed_commits: collection.failed.len(),
            repositories: repositories.len(),
            categories,
        }
    }
}

/// The day's synthesized log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyReport {
    pub date: NaiveDate,
    pub title: String,
    pub haiku: String,
    pub narrative: String,
    pub highlights: Vec<String>,
    pub repositories: Vec<RepositorySummary>,
    pub metrics: DailyMetrics,
}

impl DailyReport {
    /// Report for a date with nothing to analyze
    pub fn day_of_rest(date: NaiveDate) -> Self {
        Self {
            date,
            title: "A Day of Rest".to_string(),
            haiku: "No commits today\nThe codebase breathes quietly\nTomorrow brings change"
                .to_string(),
            narrative: "No development activity was recorded for this date. Sometimes the most \
                        productive thing is to step back and let ideas percolate."
                .to_string(),
            highlights: vec!["No commits recorded".to_string()],
            repositories: Vec::new(),
            metrics: DailyMetrics::default(),
        }
    }
}

impl Shape for DailyReport {
    fn schema() -> Schema {
        Schema::object([
            ("date", Schema::String),
            ("title", Schema::String),
            ("haiku", Schema::String),
            ("narrative", Schema::String),
            ("highlights", Schema::array(Schema::String)),
            ("repositories", Schema::array(RepositorySummary::schema())),
            ("metrics", Schema::Any),
        ])
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct DailyReportReply {
    pub title: String,
    pub haiku: String,
    pub narrative: String,
    #[serde(default)]
    pub highlights: Vec<String>,
}

impl DailyReportReply {
    pub fn schema() -> Schema {
        Schema::object([
            ("title", Schema::String),
            ("haiku", Schema::String),
            ("narrative", Schema::String),
        ])
        .optional_field("highlights", Schema::array(Schema::String))
    }
}

/// What gets persisted under the date key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredLog {
    pub log_id: String,
    pub report: DailyReport,
    pub analyses: Vec<CommitAnalysis>,
    pub failed: Vec<ForeachItemError>,
    pub stored_at: chrono::DateTime<chrono::Utc>,
}

/// Run output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisOutcome {
    pub date: NaiveDate,
    pub log_id: String,
    /// A report for the date is in the store
    pub stored: bool,
    /// An existing report was returned without analyzing
    pub reused: bool,
    pub title: Option<String>,
}

impl Shape for AnalysisOutcome {
    fn schema() -> Schema {
        Schema::object([
            ("date", Schema::String),
            ("log_id", Schema::String),
            ("stored", Schema::Boolean),
            ("reused", Schema::Boolean),
            ("title", Schema::nullable(Schema::String)),
        ])
    }
}
