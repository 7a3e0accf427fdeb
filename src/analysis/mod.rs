//! Daily source-control activity analysis
//!
//! ```text
//! check-existing-log -> route
//!                         |- already stored: early-exit
//!                         `- otherwise: analysis-pipeline
//!                              activity-window -> fetch-activity
//!                              -> foreach(analyze-commit) -> collect-analyses
//!                              -> group-by-repository -> foreach(summarize-repository)
//!                              -> synthesize-report -> store-report
//! ```
//!
//! Re-running a date that already has a report returns its id without
//! fetching or analyzing anything; `force_regenerate` overrides this and the
//! new report replaces the old one under the same key.

mod steps;
mod types;

pub use steps::{
    ANALYZE_COMMIT, Analyst, CHECK_EXISTING_LOG, COLLECT_ANALYSES, EARLY_EXIT, FETCH_ACTIVITY,
    GROUP_BY_REPOSITORY, STORE_REPORT, SUMMARIZE_REPOSITORY, SYNTHESIZE_REPORT,
};
pub use types::{
    AnalysisCollection, AnalysisOutcome, AnalysisRequest, CommitAnalysis, CommitCategory,
    DailyMetrics, DailyReport, Impact, Momentum, RepositoryGroup, RepositorySummary, SkipCheck,
    StoredLog, group_by_repository,
};

use crate::completion::CompletionService;
use crate::source::{ActivitySource, ActivityWindow};
use crate::store::Store;
use crate::template::TemplateEngine;
use crate::workflow::{Branch, BuildError, StepContext, Workflow, create_workflow};
use chrono::NaiveDate;
use std::sync::Arc;

pub const WORKFLOW_ID: &str = "daily-analysis";
pub const PIPELINE_ID: &str = "analysis-pipeline";

/// Store key of the report for `date`
pub fn log_key(date: NaiveDate) -> String {
    format!("daily-log:{}", date)
}

/// Id of the report for `date`
pub fn log_id(date: NaiveDate) -> String {
    format!("daily-{}", date)
}

/// Collaborators the workflow steps call into
#[derive(Clone)]
pub struct AnalysisDeps {
    pub source: Arc<dyn ActivitySource>,
    pub completion: CompletionService,
    pub store: Arc<dyn Store>,
    pub templates: Arc<TemplateEngine>,
    /// Commit messages are cut to this length in prompts
    pub max_message_chars: Option<usize>,
}

impl AnalysisDeps {
    fn analyst(&self) -> Analyst {
        Analyst {
            completion: self.completion.clone(),
            templates: self.templates.clone(),
        }
    }
}

/// Build the daily workflow; `concurrency` bounds both fan-outs
pub fn build_daily_workflow(
    deps: &AnalysisDeps,
    concurrency: usize,
) -> Result<Workflow<AnalysisRequest, AnalysisOutcome>, BuildError> {
    let pipeline = create_workflow::<SkipCheck>(PIPELINE_ID)
        .description("Fetch, analyze, summarize and store one day of activity")
        .map_as("activity-window", |ctx: &StepContext<SkipCheck>| {
            Ok(ActivityWindow::for_day(ctx.input().date))
        })
        .then(steps::FetchActivity::new(deps.source.clone()))
        .foreach(
            steps::AnalyzeCommit::new(deps.analyst(), deps.max_message_chars),
            concurrency,
        )
        .then(steps::collect_analyses())
        .map_as(GROUP_BY_REPOSITORY, |ctx: &StepContext<AnalysisCollection>| {
            Ok(group_by_repository(ctx.input()))
        })
        .foreach(steps::SummarizeRepository::new(deps.analyst()), concurrency)
        .then(steps::SynthesizeReport::new(deps.analyst()))
        .then(steps::StoreReport::new(deps.store.clone()))
        .commit()?;

    let route = Branch::new("route")
        .when(
            |ctx: StepContext<SkipCheck>| async move { anyhow::Ok(!ctx.input().proceed) },
            steps::early_exit(),
        )
        .otherwise_workflow(pipeline);

    create_workflow::<AnalysisRequest>(WORKFLOW_ID)
        .description("Daily source-control activity analysis")
        .then(steps::CheckExistingLog::new(deps.store.clone()))
        .branch(route)
        .commit()
}
