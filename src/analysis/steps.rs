//! Steps of the daily analysis workflow

use super::types::{
    AnalysisCollection, AnalysisOutcome, AnalysisRequest, CommitAnalysis, CommitAnalysisReply,
    DailyMetrics, DailyReport, DailyReportReply, RepositoryGroup, RepositorySummary,
    RepositorySummaryReply, SkipCheck, StoredLog,
};
use super::{log_id, log_key};
use crate::completion::{BackendRequest, CompletionService};
use crate::source::{ActivitySource, ActivityWindow, Commit};
use crate::store::Store;
use crate::template::{TemplateEngine, prompts};
use crate::workflow::{ItemResult, Step, StepContext, create_step, partition};
use anyhow::Context;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::{Value, json};
use std::sync::Arc;

pub const CHECK_EXISTING_LOG: &str = "check-existing-log";
pub const EARLY_EXIT: &str = "early-exit";
pub const FETCH_ACTIVITY: &str = "fetch-activity";
pub const ANALYZE_COMMIT: &str = "analyze-commit";
pub const COLLECT_ANALYSES: &str = "collect-analyses";
pub const GROUP_BY_REPOSITORY: &str = "group-by-repository";
pub const SUMMARIZE_REPOSITORY: &str = "summarize-repository";
pub const SYNTHESIZE_REPORT: &str = "synthesize-report";
pub const STORE_REPORT: &str = "store-report";

/// Prompt rendering plus the backend that answers
#[derive(Clone)]
pub struct Analyst {
    pub completion: CompletionService,
    pub templates: Arc<TemplateEngine>,
}

impl Analyst {
    fn request(&self, template: &str, ctx: &Value) -> anyhow::Result<BackendRequest> {
        let prompt = self.templates.render(template, ctx)?;
        let system = self.templates.render(prompts::SYSTEM, &json!({}))?;
        Ok(BackendRequest::new(prompt).with_system_prompt(system))
    }
}

/// Decide whether the date still needs analyzing
pub struct CheckExistingLog {
    store: Arc<dyn Store>,
}

impl CheckExistingLog {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Step for CheckExistingLog {
    type Input = AnalysisRequest;
    type Output = SkipCheck;

    fn id(&self) -> &str {
        CHECK_EXISTING_LOG
    }

    fn description(&self) -> &str {
        "Look up a stored report for the date"
    }

    async fn execute(&self, ctx: StepContext<AnalysisRequest>) -> anyhow::Result<SkipCheck> {
        let request = ctx.into_input();
        let proceed = SkipCheck {
            date: request.date,
            proceed: true,
            existing_log_id: None,
        };

        if request.force_regenerate {
            tracing::info!(date = %request.date, "Regenerating report on request");
            return Ok(proceed);
        }

        match self.store.find_by_key(&log_key(request.date)).await {
            Ok(Some(stored)) => {
                let existing = stored
                    .get("log_id")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| log_id(request.date));
                tracing::info!(date = %request.date, log_id = %existing, "Report already exists");
                Ok(SkipCheck {
                    proceed: false,
                    existing_log_id: Some(existing),
                    ..proceed
                })
            }
            Ok(None) => Ok(proceed),
            Err(e) => {
                // Upserts are keyed by date, so analyzing again is safe
                tracing::warn!(date = %request.date, error = %e, "Report lookup failed, analyzing anyway");
                Ok(proceed)
            }
        }
    }
}

/// Hand back the existing report id
pub fn early_exit() -> impl Step<Input = SkipCheck, Output = AnalysisOutcome> {
    create_step(EARLY_EXIT, |ctx: StepContext<SkipCheck>| async move {
        let check = ctx.into_input();
        anyhow::Ok(AnalysisOutcome {
            date: check.date,
            stored: check.existing_log_id.is_some(),
            log_id: check.existing_log_id.unwrap_or_default(),
            reused: true,
            title: None,
        })
    })
    .with_description("Return the stored report without analyzing")
}

/// Commits for the window; a failing source yields an empty day
pub struct FetchActivity {
    source: Arc<dyn ActivitySource>,
}

impl FetchActivity {
    pub fn new(source: Arc<dyn ActivitySource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Step for FetchActivity {
    type Input = ActivityWindow;
    type Output = Vec<Commit>;

    fn id(&self) -> &str {
        FETCH_ACTIVITY
    }

    fn description(&self) -> &str {
        "Fetch commits for the day"
    }

    async fn execute(&self, ctx: StepContext<ActivityWindow>) -> anyhow::Result<Vec<Commit>> {
        let window = ctx.into_input();
        match self.source.fetch_commits(&window).await {
            Ok(commits) => Ok(commits),
            Err(e) => {
                tracing::warn!(source = %self.source.name(), error = %e, "Activity fetch failed, treating the day as empty");
                Ok(Vec::new())
            }
        }
    }
}

/// One commit through the model
pub struct AnalyzeCommit {
    analyst: Analyst,
    max_message_chars: Option<usize>,
}

impl AnalyzeCommit {
    pub fn new(analyst: Analyst, max_message_chars: Option<usize>) -> Self {
        Self {
            analyst,
            max_message_chars,
        }
    }
}

#[async_trait]
impl Step for AnalyzeCommit {
    type Input = Commit;
    type Output = CommitAnalysis;

    fn id(&self) -> &str {
        ANALYZE_COMMIT
    }

    fn description(&self) -> &str {
        "Summarize and classify one commit"
    }

    async fn execute(&self, ctx: StepContext<Commit>) -> anyhow::Result<CommitAnalysis> {
        let commit = ctx.into_input();
        let request = self.analyst.request(
            prompts::COMMIT_ANALYSIS,
            &json!({ "commit": &commit, "max_chars": self.max_message_chars }),
        )?;

        let reply: CommitAnalysisReply = self
            .analyst
            .completion
            .complete_as(&request, &CommitAnalysisReply::schema())
            .await
            .with_context(|| format!("analysis of {}@{} failed", commit.repository, commit.short_sha()))?;

        Ok(reply.into_analysis(&commit))
    }
}

/// Fan-in of the commit slots; failed commits are kept aside
pub fn collect_analyses()
-> impl Step<Input = Vec<ItemResult<CommitAnalysis>>, Output = AnalysisCollection> {
    create_step(
        COLLECT_ANALYSES,
        |ctx: StepContext<Vec<ItemResult<CommitAnalysis>>>| async move {
            let check: SkipCheck = ctx.init_data()?;
            let (analyses, failed) = partition(ctx.into_input());
            for failure in &failed {
                tracing::warn!(index = failure.index, error = %failure.message, "Commit left out of the report");
            }
            tracing::info!(analyzed = analyses.len(), failed = failed.len(), "Collected commit analyses");

            anyhow::Ok(AnalysisCollection {
                date: check.date,
                analyses,
                failed,
            })
        },
    )
    .with_description("Separate analyzed commits from failed ones")
}

/// Day summary of one repository
pub struct SummarizeRepository {
    analyst: Analyst,
}

impl SummarizeRepository {
    pub fn new(analyst: Analyst) -> Self {
        Self { analyst }
    }
}

#[async_trait]
impl Step for SummarizeRepository {
    type Input = RepositoryGroup;
    type Output = RepositorySummary;

    fn id(&self) -> &str {
        SUMMARIZE_REPOSITORY
    }

    fn description(&self) -> &str {
        "Summarize the day in one repository"
    }

    async fn execute(&self, ctx: StepContext<RepositoryGroup>) -> anyhow::Result<RepositorySummary> {
        let group = ctx.into_input();
        let request = self.analyst.request(
            prompts::REPOSITORY_SUMMARY,
            &json!({
                "repository": &group.repository,
                "date": group.date,
                "analyses": &group.analyses,
            }),
        )?;

        let reply: RepositorySummaryReply = self
            .analyst
            .completion
            .complete_as(&request, &RepositorySummaryReply::schema())
            .await
            .with_context(|| format!("summary of {} failed", group.repository))?;

        Ok(reply.into_summary(&group))
    }
}

/// The day's report from the repository summaries
pub struct SynthesizeReport {
    analyst: Analyst,
}

impl SynthesizeReport {
    pub fn new(analyst: Analyst) -> Self {
        Self { analyst }
    }

    async fn narrate(
        &self,
        date: NaiveDate,
        repositories: &[RepositorySummary],
        metrics: &DailyMetrics,
    ) -> anyhow::Result<DailyReportReply> {
        let request = self.analyst.request(
            prompts::DAILY_REPORT,
            &json!({
                "date": date,
                "total_commits": metrics.total_commits,
                "failed_count": metrics.failed_commits,
                "repositories": repositories,
            }),
        )?;

        Ok(self
            .analyst
            .completion
            .complete_as(&request, &DailyReportReply::schema())
            .await?)
    }
}

#[async_trait]
impl Step for SynthesizeReport {
    type Input = Vec<ItemResult<RepositorySummary>>;
    type Output = DailyReport;

    fn id(&self) -> &str {
        SYNTHESIZE_REPORT
    }

    fn description(&self) -> &str {
        "Write the title, haiku and narrative for the day"
    }

    async fn execute(
        &self,
        ctx: StepContext<Vec<ItemResult<RepositorySummary>>>,
    ) -> anyhow::Result<DailyReport> {
        let collection: AnalysisCollection = ctx.step_result(COLLECT_ANALYSES)?;
        let groups: Vec<RepositoryGroup> = ctx.step_result(GROUP_BY_REPOSITORY)?;
        let date = collection.date;

        if collection.total_commits() == 0 {
            tracing::info!(%date, "No activity recorded");
            return Ok(DailyReport::day_of_rest(date));
        }

        let repositories: Vec<RepositorySummary> = groups
            .iter()
            .zip(ctx.into_input())
            .map(|(group, slot)| {
                slot.unwrap_or_else(|e| {
                    tracing::warn!(repository = %group.repository, error = %e.message, "Using plain repository summary");
                    RepositorySummary::from_group(group)
                })
            })
            .collect();
        let metrics = DailyMetrics::from_collection(&collection);

        if collection.analyses.is_empty() {
            return Ok(plain_report(date, repositories, metrics));
        }

        match self.narrate(date, &repositories, &metrics).await {
            Ok(reply) => {
                let highlights = if reply.highlights.is_empty() {
                    default_highlights(&repositories)
                } else {
                    reply.highlights
                };
                Ok(DailyReport {
                    date,
                    title: reply.title.trim().to_string(),
                    haiku: reply.haiku.trim().to_string(),
                    narrative: reply.narrative.trim().to_string(),
                    highlights,
                    repositories,
                    metrics,
                })
            }
            Err(e) => {
                tracing::warn!(%date, error = %e, "Report synthesis failed, writing plain report");
                Ok(plain_report(date, repositories, metrics))
            }
        }
    }
}

fn default_highlights(repositories: &[RepositorySummary]) -> Vec<String> {
    repositories
        .iter()
        .map(|r| format!("{}: {} commits", r.repository, r.commit_count))
        .collect()
}

/// Report assembled without the model
fn plain_report(
    date: NaiveDate,
    repositories: Vec<RepositorySummary>,
    metrics: DailyMetrics,
) -> DailyReport {
    let narrative = if repositories.is_empty() {
        format!(
            "{} commits were recorded, but none could be analyzed.",
            metrics.total_commits
        )
    } else {
        repositories
            .iter()
            .map(|r| format!("{}: {}", r.repository, r.summary))
            .collect::<Vec<_>>()
            .join("\n\n")
    };

    DailyReport {
        date,
        title: format!("Development log for {}", date),
        haiku: "Commits land in turn\nEach one a small step forward\nThe day's work is done"
            .to_string(),
        narrative,
        highlights: default_highlights(&repositories),
        repositories,
        metrics,
    }
}

/// Upsert the report under the date key
pub struct StoreReport {
    store: Arc<dyn Store>,
}

impl StoreReport {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Step for StoreReport {
    type Input = DailyReport;
    type Output = AnalysisOutcome;

    fn id(&self) -> &str {
        STORE_REPORT
    }

    fn description(&self) -> &str {
        "Persist the report, replacing any earlier one for the date"
    }

    async fn execute(&self, ctx: StepContext<DailyReport>) -> anyhow::Result<AnalysisOutcome> {
        let collection: AnalysisCollection = ctx.step_result(COLLECT_ANALYSES)?;
        let report = ctx.into_input();
        let date = report.date;
        let title = report.title.clone();

        let record = StoredLog {
            log_id: log_id(date),
            report,
            analyses: collection.analyses,
            failed: collection.failed,
            stored_at: chrono::Utc::now(),
        };
        let value = serde_json::to_value(&record)?;

        let stored = match self.store.upsert(&log_key(date), &value).await {
            Ok(()) => {
                tracing::info!(%date, log_id = %record.log_id, "Stored daily report");
                true
            }
            Err(e) => {
                tracing::warn!(%date, error = %e, "Failed to store daily report");
                false
            }
        };

        Ok(AnalysisOutcome {
            date,
            log_id: record.log_id,
            stored,
            reused: false,
            title: Some(title),
        })
    }
}
