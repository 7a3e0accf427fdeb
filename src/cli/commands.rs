//! CLI command implementations

use super::output::{OutputEvent, OutputHandler};
use crate::analysis::{
    AnalysisDeps, AnalysisRequest, StoredLog, WORKFLOW_ID, build_daily_workflow, log_key,
};
use crate::completion::create_service;
use crate::config::DayflowConfig;
use crate::source::GithubClient;
use crate::store::{MemoryStore, SqliteStore, Store};
use crate::template::TemplateEngine;
use chrono::NaiveDate;
use std::sync::Arc;

/// Options of `dayflow run`
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub date: NaiveDate,
    pub force: bool,
    pub concurrency: Option<usize>,
}

fn template_engine(config: &DayflowConfig) -> TemplateEngine {
    match config.completion.resolved_prompts_dir() {
        Some(dir) => TemplateEngine::with_overrides(&dir),
        None => TemplateEngine::new(),
    }
}

/// Wire collaborators from configuration
fn build_deps(config: &DayflowConfig, store: Arc<dyn Store>) -> Result<AnalysisDeps, String> {
    let (name, backend) = config
        .completion_backend()
        .ok_or_else(|| "no enabled completion backend configured".to_string())?;
    let completion = create_service(name, backend)
        .map_err(|e| format!("Failed to create backend '{}': {}", name, e))?;
    let source = GithubClient::from_config(&config.github).map_err(|e| e.to_string())?;

    Ok(AnalysisDeps {
        source: Arc::new(source),
        completion,
        store,
        templates: Arc::new(template_engine(config)),
        max_message_chars: config.completion.max_message_chars,
    })
}

fn open_store(config: &DayflowConfig) -> Result<Arc<SqliteStore>, String> {
    let path = config.store.resolved_path();
    SqliteStore::open(&path)
        .map(Arc::new)
        .map_err(|e| format!("Failed to open store at {}: {}", path.display(), e))
}

/// Analyze one day using the configured backend, source and store
pub async fn run_analysis(
    config: &DayflowConfig,
    options: &RunOptions,
    handler: &dyn OutputHandler,
) -> Result<i32, String> {
    let store = open_store(config)?;
    let deps = build_deps(config, store.clone())?;
    let concurrency = options.concurrency.unwrap_or(config.defaults.concurrency);

    let request = AnalysisRequest {
        date: options.date,
        force_regenerate: options.force,
    };

    tokio::select! {
        code = execute_analysis(&deps, &store, request, concurrency, handler) => code,
        _ = tokio::signal::ctrl_c() => {
            handler.emit(OutputEvent::info("Interrupted"));
            Ok(130)
        }
    }
}

/// Build and run the daily workflow, recording the run in `history`
///
/// Returns 0 when a report is stored or reused and 1 otherwise. A failed run
/// still reports the nodes that completed before the failure.
pub async fn execute_analysis(
    deps: &AnalysisDeps,
    history: &SqliteStore,
    request: AnalysisRequest,
    concurrency: usize,
    handler: &dyn OutputHandler,
) -> Result<i32, String> {
    let workflow = build_daily_workflow(deps, concurrency).map_err(|e| e.to_string())?;

    handler.emit(OutputEvent::RunStart {
        workflow: workflow.id().to_string(),
        date: request.date.to_string(),
        force: request.force_regenerate,
    });

    match workflow.run(request).await {
        Ok(report) => {
            for record in &report.run.records {
                handler.emit(OutputEvent::node(record));
            }
            if let Err(e) = history.record_run(&report.run) {
                tracing::warn!(error = %e, "failed to record run history");
            }

            let outcome = report.output;
            let success = outcome.stored || outcome.reused;
            let value = serde_json::to_value(&outcome).map_err(|e| e.to_string())?;

            handler.emit(OutputEvent::RunComplete {
                run_id: report.run.run_id.clone(),
                duration_ms: report.run.duration_ms,
                outcome,
            });
            handler.result(success, Some(&value));

            Ok(if success { 0 } else { 1 })
        }
        Err(failure) => {
            for record in &failure.run.records {
                handler.emit(OutputEvent::node(record));
            }
            if let Err(e) = history.record_run(&failure.run) {
                tracing::warn!(error = %e, "failed to record run history");
            }

            handler.emit(OutputEvent::RunFailed {
                run_id: failure.run.run_id.clone(),
                node_id: failure.node_id.clone(),
                error: failure.error.to_string(),
                completed: failure
                    .run
                    .completed_nodes()
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
            });
            handler.result(false, None);

            Ok(1)
        }
    }
}

/// Print the stored log for `date`
pub async fn show_log(
    store: &dyn Store,
    date: NaiveDate,
    handler: &dyn OutputHandler,
) -> Result<i32, String> {
    let value = store
        .find_by_key(&log_key(date))
        .await
        .map_err(|e| format!("Failed to read log for {}: {}", date, e))?;

    let Some(value) = value else {
        handler.emit(OutputEvent::info(format!("No log stored for {}", date)));
        return Ok(1);
    };

    let log: StoredLog = serde_json::from_value(value)
        .map_err(|e| format!("Stored log for {} is unreadable: {}", date, e))?;
    handler.emit(OutputEvent::Log { log: Box::new(log) });

    Ok(0)
}

/// `show` against the configured store
pub async fn show(
    config: &DayflowConfig,
    date: NaiveDate,
    handler: &dyn OutputHandler,
) -> Result<i32, String> {
    let store = open_store(config)?;
    show_log(&*store, date, handler).await
}

/// List the most recent runs
pub fn history(store: &SqliteStore, limit: usize, handler: &dyn OutputHandler) -> Result<i32, String> {
    let entries = store
        .recent_runs(limit)
        .map_err(|e| format!("Failed to read run history: {}", e))?;
    handler.emit(OutputEvent::History { entries });
    Ok(0)
}

/// `history` against the configured store
pub fn list_history(
    config: &DayflowConfig,
    limit: usize,
    handler: &dyn OutputHandler,
) -> Result<i32, String> {
    let store = open_store(config)?;
    history(&store, limit, handler)
}

/// Check configuration, prompt templates and workflow definition
pub fn validate(config: &DayflowConfig, handler: &dyn OutputHandler) -> i32 {
    let mut failed = false;

    match config.validate() {
        Ok(()) => handler.emit(OutputEvent::info("✓ Configuration is valid")),
        Err(errors) => {
            failed = true;
            handler.emit(OutputEvent::info(format!(
                "✗ Configuration has {} error(s):",
                errors.len()
            )));
            for err in &errors {
                handler.emit(OutputEvent::info(format!("  - {}", err)));
            }
        }
    }

    match template_engine(config).validate() {
        Ok(()) => handler.emit(OutputEvent::info("✓ Prompt templates render")),
        Err(e) => {
            failed = true;
            handler.emit(OutputEvent::info(format!("✗ Prompt template error: {}", e)));
        }
    }

    let workflow = build_deps(config, Arc::new(MemoryStore::new()))
        .and_then(|deps| {
            build_daily_workflow(&deps, config.defaults.concurrency.max(1)).map_err(|e| e.to_string())
        });
    match workflow {
        Ok(wf) => {
            let ids: Vec<_> = wf.nodes().into_iter().map(|n| n.id).collect();
            handler.emit(OutputEvent::info(format!(
                "✓ Workflow '{}' is valid ({})",
                WORKFLOW_ID,
                ids.join(" → ")
            )));
        }
        Err(e) => {
            failed = true;
            handler.emit(OutputEvent::info(format!("✗ Workflow '{}': {}", WORKFLOW_ID, e)));
        }
    }

    if failed { 1 } else { 0 }
}

/// Check backend, GitHub access and store
pub async fn doctor(config: &DayflowConfig, handler: &dyn OutputHandler) -> i32 {
    let mut all_ok = true;

    handler.emit(OutputEvent::info("Checking completion backend..."));
    match config.completion_backend() {
        Some((name, backend)) => match create_service(name, backend) {
            Ok(service) if service.is_available().await => {
                let kind = if backend.is_http() { "http" } else { "cli" };
                handler.emit(OutputEvent::info(format!(
                    "✓ {} ({}: {})",
                    name, kind, backend.command
                )));
            }
            Ok(_) => {
                all_ok = false;
                handler.emit(OutputEvent::info(format!(
                    "✗ {} ({} - not available)",
                    name, backend.command
                )));
            }
            Err(e) => {
                all_ok = false;
                handler.emit(OutputEvent::info(format!("✗ {}: {}", name, e)));
            }
        },
        None => {
            all_ok = false;
            handler.emit(OutputEvent::info("  (no enabled backend configured)"));
        }
    }

    handler.emit(OutputEvent::info("\nChecking GitHub..."));
    let github = &config.github;
    if github.token().is_some() {
        handler.emit(OutputEvent::info(format!("✓ token found in ${}", github.token_env)));
    } else {
        handler.emit(OutputEvent::info(format!(
            "  ${} is not set, only public repositories can be read",
            github.token_env
        )));
    }
    if github.repositories.is_empty() {
        all_ok = false;
        handler.emit(OutputEvent::info("✗ no repositories configured"));
    } else {
        handler.emit(OutputEvent::info(format!(
            "✓ {} repositories: {}",
            github.repositories.len(),
            github.repositories.join(", ")
        )));
    }

    handler.emit(OutputEvent::info("\nChecking store..."));
    match open_store(config) {
        Ok(_) => handler.emit(OutputEvent::info(format!(
            "✓ {}",
            config.store.resolved_path().display()
        ))),
        Err(e) => {
            all_ok = false;
            handler.emit(OutputEvent::info(format!("✗ {}", e)));
        }
    }

    if all_ok { 0 } else { 1 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::log_id;
    use crate::cli::output::tests::RecordingHandler;
    use crate::completion::{CompletionService, ScriptedBackend};
    use crate::config::BackendConfig;
    use crate::source::tests::{StaticSource, commit};
    use tempfile::TempDir;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
    }

    fn deps(source: StaticSource, answers: Vec<&str>, store: Arc<SqliteStore>) -> AnalysisDeps {
        let answers = answers.into_iter().map(|a| Ok(a.to_string())).collect();
        AnalysisDeps {
            source: Arc::new(source),
            completion: CompletionService::new(Arc::new(ScriptedBackend::new(answers))),
            store,
            templates: Arc::new(TemplateEngine::new()),
            max_message_chars: None,
        }
    }

    fn request() -> AnalysisRequest {
        AnalysisRequest {
            date: date(),
            force_regenerate: false,
        }
    }

    fn config_with_store(dir: &TempDir) -> DayflowConfig {
        let mut config = DayflowConfig::default();
        config.store.path = dir.path().join("dayflow.db").to_string_lossy().to_string();
        config
    }

    #[tokio::test]
    async fn test_execute_analysis_records_history() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let deps = deps(
            StaticSource::new(vec![commit("acme/api", "a1", "Add cache")]),
            vec![
                r#"{"summary": "Adds a cache", "category": "feature", "impact": "minor", "technical_details": []}"#,
                r#"{"summary": "Caching", "focus_areas": [], "momentum": "steady"}"#,
                r#"{"title": "Cache Day", "haiku": "a\nb\nc", "narrative": "n", "highlights": []}"#,
            ],
            store.clone(),
        );
        let handler = RecordingHandler::default();

        let code = execute_analysis(&deps, &store, request(), 1, &handler).await.unwrap();
        assert_eq!(code, 0);

        let events = handler.events();
        assert!(matches!(events.first(), Some(OutputEvent::RunStart { .. })));
        match events.last() {
            Some(OutputEvent::RunComplete { outcome, .. }) => {
                assert!(outcome.stored);
                assert_eq!(outcome.log_id, log_id(date()));
                assert_eq!(outcome.title.as_deref(), Some("Cache Day"));
            }
            other => panic!("unexpected last event: {:?}", other),
        }

        let runs = store.recent_runs(10).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, "succeeded");
        assert_eq!(runs[0].workflow_name, WORKFLOW_ID);

        let results = handler.results.lock().unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].0);
    }

    #[tokio::test]
    async fn test_second_run_is_reused() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let deps = deps(StaticSource::new(Vec::new()), Vec::new(), store.clone());

        let first = RecordingHandler::default();
        assert_eq!(
            execute_analysis(&deps, &store, request(), 2, &first).await.unwrap(),
            0
        );

        let second = RecordingHandler::default();
        assert_eq!(
            execute_analysis(&deps, &store, request(), 2, &second).await.unwrap(),
            0
        );
        let reused = second.events().into_iter().any(|e| {
            matches!(e, OutputEvent::RunComplete { outcome, .. } if outcome.reused)
        });
        assert!(reused);
        assert_eq!(store.recent_runs(10).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_show_log() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let deps = deps(StaticSource::new(Vec::new()), Vec::new(), store.clone());
        execute_analysis(&deps, &store, request(), 1, &RecordingHandler::default())
            .await
            .unwrap();

        let handler = RecordingHandler::default();
        assert_eq!(show_log(&*store, date(), &handler).await.unwrap(), 0);
        match handler.events().first() {
            Some(OutputEvent::Log { log }) => {
                assert_eq!(log.log_id, log_id(date()));
                assert_eq!(log.report.title, "A Day of Rest");
            }
            other => panic!("unexpected event: {:?}", other),
        }

        let missing = RecordingHandler::default();
        let other_day = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();
        assert_eq!(show_log(&*store, other_day, &missing).await.unwrap(), 1);
        assert_eq!(missing.messages(), vec!["No log stored for 2024-05-02"]);
    }

    #[tokio::test]
    async fn test_history_lists_runs() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let deps = deps(StaticSource::new(Vec::new()), Vec::new(), store.clone());
        execute_analysis(&deps, &store, request(), 1, &RecordingHandler::default())
            .await
            .unwrap();

        let handler = RecordingHandler::default();
        assert_eq!(history(&store, 5, &handler).unwrap(), 0);
        match handler.events().first() {
            Some(OutputEvent::History { entries }) => assert_eq!(entries.len(), 1),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_show_uses_configured_store() {
        let dir = TempDir::new().unwrap();
        let config = config_with_store(&dir);
        let handler = RecordingHandler::default();

        assert_eq!(show(&config, date(), &handler).await.unwrap(), 1);
        assert!(dir.path().join("dayflow.db").exists());
    }

    #[test]
    fn test_validate_without_backend() {
        let dir = TempDir::new().unwrap();
        let config = config_with_store(&dir);
        let handler = RecordingHandler::default();

        assert_eq!(validate(&config, &handler), 1);
        let messages = handler.messages();
        assert!(messages.iter().any(|m| m.starts_with("✓ Configuration is valid")));
        assert!(messages.iter().any(|m| m.contains("no enabled completion backend")));
    }

    #[test]
    fn test_validate_with_backend() {
        let dir = TempDir::new().unwrap();
        let mut config = config_with_store(&dir);
        config.backends.insert(
            "echo".into(),
            BackendConfig {
                command: "echo".into(),
                ..Default::default()
            },
        );
        let handler = RecordingHandler::default();

        assert_eq!(validate(&config, &handler), 0);
        assert!(
            handler
                .messages()
                .iter()
                .any(|m| m.contains("check-existing-log → route"))
        );
    }

    #[tokio::test]
    async fn test_doctor_reports_missing_pieces() {
        let dir = TempDir::new().unwrap();
        let config = config_with_store(&dir);
        let handler = RecordingHandler::default();

        assert_eq!(doctor(&config, &handler).await, 1);
        let messages = handler.messages();
        assert!(messages.iter().any(|m| m.contains("no enabled backend")));
        assert!(messages.iter().any(|m| m.contains("no repositories configured")));
    }
}
