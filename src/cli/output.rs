//! Output handlers for CLI commands
//!
//! Supports console (pretty), JSON, and quiet output modes.

use crate::analysis::{AnalysisOutcome, StoredLog};
use crate::store::RunHistoryEntry;
use crate::workflow::{NodeKind, NodeRecord};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Output mode for CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    #[default]
    Console,
    Json,
    Quiet,
}

impl OutputMode {
    /// Parse from string
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => Self::Json,
            "quiet" => Self::Quiet,
            _ => Self::Console,
        }
    }
}

/// Events emitted while a command runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutputEvent {
    RunStart {
        workflow: String,
        date: String,
        force: bool,
    },
    NodeComplete {
        node_id: String,
        kind: NodeKind,
        duration_ms: u64,
    },
    RunComplete {
        run_id: String,
        duration_ms: u64,
        outcome: AnalysisOutcome,
    },
    RunFailed {
        run_id: String,
        node_id: Option<String>,
        error: String,
        completed: Vec<String>,
    },
    Log {
        log: Box<StoredLog>,
    },
    History {
        entries: Vec<RunHistoryEntry>,
    },
    Info {
        message: String,
    },
    Debug {
        message: String,
    },
}

impl OutputEvent {
    pub fn node(record: &NodeRecord) -> Self {
        Self::NodeComplete {
            node_id: record.node_id.clone(),
            kind: record.kind,
            duration_ms: record.duration_ms,
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::Info {
            message: message.into(),
        }
    }
}

/// Output handler trait
pub trait OutputHandler: Send + Sync {
    /// Emit an event
    fn emit(&self, event: OutputEvent);

    /// Write the final value of a command
    fn result(&self, success: bool, output: Option<&Value>);
}

/// Console output handler
pub struct ConsoleHandler {
    debug: bool,
}

impl ConsoleHandler {
    pub fn new(debug: bool) -> Self {
        Self { debug }
    }

    fn format_duration(ms: u64) -> String {
        if ms < 1000 {
            format!("{}ms", ms)
        } else {
            format!("{:.1}s", ms as f64 / 1000.0)
        }
    }
}

impl OutputHandler for ConsoleHandler {
    fn emit(&self, event: OutputEvent) {
        match event {
            OutputEvent::RunStart {
                workflow,
                date,
                force,
            } => {
                let suffix = if force { " (forced)" } else { "" };
                eprintln!("Running '{}' for {}{}", workflow, date, suffix);
            }
            OutputEvent::NodeComplete {
                node_id,
                kind,
                duration_ms,
            } => {
                eprintln!(
                    "  ✓ {} [{}] ({})",
                    node_id,
                    kind,
                    Self::format_duration(duration_ms)
                );
            }
            OutputEvent::RunComplete {
                duration_ms,
                outcome,
                ..
            } => {
                eprintln!();
                if outcome.reused {
                    eprintln!(
                        "✓ {} already analyzed: {}",
                        outcome.date, outcome.log_id
                    );
                } else if outcome.stored {
                    eprintln!(
                        "✓ Stored {} ({})",
                        outcome.log_id,
                        Self::format_duration(duration_ms)
                    );
                } else {
                    eprintln!(
                        "✗ Report for {} was built but not stored ({})",
                        outcome.date,
                        Self::format_duration(duration_ms)
                    );
                }
                if let Some(title) = outcome.title {
                    eprintln!("  {}", title);
                }
            }
            OutputEvent::RunFailed {
                node_id,
                error,
                completed,
                ..
            } => {
                eprintln!();
                match node_id {
                    Some(id) => eprintln!("✗ analysis failed at step {}: {}", id, error),
                    None => eprintln!("✗ analysis failed: {}", error),
                }
                if !completed.is_empty() {
                    eprintln!("  completed: {}", completed.join(" → "));
                }
            }
            OutputEvent::Log { log } => print_log(&log),
            OutputEvent::History { entries } => {
                if entries.is_empty() {
                    println!("(no runs recorded)");
                }
                for entry in entries {
                    let failure = match (&entry.failed_step, &entry.error_message) {
                        (Some(step), Some(error)) => format!("  at {}: {}", step, error),
                        _ => String::new(),
                    };
                    println!(
                        "{}  {}  {:<9} {:>3} steps {:>8}{}",
                        entry.started_at,
                        entry.run_id,
                        entry.status,
                        entry.completed_steps,
                        Self::format_duration(entry.duration_ms.max(0) as u64),
                        failure
                    );
                }
            }
            OutputEvent::Info { message } => {
                eprintln!("{}", message);
            }
            OutputEvent::Debug { message } => {
                if self.debug {
                    eprintln!("[debug] {}", message);
                }
            }
        }
    }

    fn result(&self, _success: bool, output: Option<&Value>) {
        if let Some(out) = output {
            match out {
                Value::String(s) => println!("{}", s),
                other => {
                    if let Ok(s) = serde_json::to_string_pretty(other) {
                        println!("{}", s);
                    }
                }
            }
        }
    }
}

fn print_log(log: &StoredLog) {
    let report = &log.report;
    println!("{} ({})", report.title, log.log_id);
    println!();
    for line in report.haiku.lines() {
        println!("  {}", line);
    }
    println!();
    println!("{}", report.narrative);
    if !report.highlights.is_empty() {
        println!();
        for highlight in &report.highlights {
            println!("- {}", highlight);
        }
    }
    for repo in &report.repositories {
        println!();
        println!("{} ({} commits, {})", repo.repository, repo.commit_count, repo.momentum);
        println!("  {}", repo.summary);
    }
    if !log.failed.is_empty() {
        println!();
        println!("{} commit(s) could not be analyzed", log.failed.len());
    }
}

/// JSON output handler
pub struct JsonHandler {
    pretty: bool,
}

impl JsonHandler {
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }

    fn print_json<T: Serialize>(&self, value: &T) {
        let json = if self.pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        };

        if let Ok(s) = json {
            println!("{}", s);
        }
    }
}

impl OutputHandler for JsonHandler {
    fn emit(&self, event: OutputEvent) {
        self.print_json(&event);
    }

    fn result(&self, success: bool, output: Option<&Value>) {
        #[derive(Serialize)]
        struct FinalResult<'a> {
            success: bool,
            output: Option<&'a Value>,
        }

        self.print_json(&FinalResult { success, output });
    }
}

/// Quiet handler that only prints the final value
pub struct QuietHandler;

impl OutputHandler for QuietHandler {
    fn emit(&self, _event: OutputEvent) {}

    fn result(&self, _success: bool, output: Option<&Value>) {
        if let Some(Value::String(s)) = output {
            println!("{}", s);
        } else if let Some(out) = output {
            println!("{}", out);
        }
    }
}

/// Create an output handler based on mode
pub fn create_handler(mode: OutputMode, debug: bool) -> Box<dyn OutputHandler> {
    match mode {
        OutputMode::Console => Box::new(ConsoleHandler::new(debug)),
        OutputMode::Json => Box::new(JsonHandler::new(true)),
        OutputMode::Quiet => Box::new(QuietHandler),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records everything it is given
    #[derive(Default)]
    pub(crate) struct RecordingHandler {
        pub events: Mutex<Vec<OutputEvent>>,
        pub results: Mutex<Vec<(bool, Option<Value>)>>,
    }

    impl RecordingHandler {
        pub fn events(&self) -> Vec<OutputEvent> {
            self.events.lock().unwrap().clone()
        }

        pub fn messages(&self) -> Vec<String> {
            self.events()
                .into_iter()
                .filter_map(|e| match e {
                    OutputEvent::Info { message } => Some(message),
                    _ => None,
                })
                .collect()
        }
    }

    impl OutputHandler for RecordingHandler {
        fn emit(&self, event: OutputEvent) {
            self.events.lock().unwrap().push(event);
        }

        fn result(&self, success: bool, output: Option<&Value>) {
            self.results
                .lock()
                .unwrap()
                .push((success, output.cloned()));
        }
    }

    #[test]
    fn test_output_mode_from_str() {
        assert_eq!(OutputMode::from_str("json"), OutputMode::Json);
        assert_eq!(OutputMode::from_str("QUIET"), OutputMode::Quiet);
        assert_eq!(OutputMode::from_str("console"), OutputMode::Console);
        assert_eq!(OutputMode::from_str("unknown"), OutputMode::Console);
    }

    #[test]
    fn test_console_format_duration() {
        assert_eq!(ConsoleHandler::format_duration(500), "500ms");
        assert_eq!(ConsoleHandler::format_duration(1000), "1.0s");
        assert_eq!(ConsoleHandler::format_duration(2500), "2.5s");
    }

    #[test]
    fn test_event_json_is_tagged() {
        let record = NodeRecord {
            node_id: "fetch-activity".into(),
            kind: NodeKind::Step,
            output: Value::Null,
            duration_ms: 12,
        };
        let json = serde_json::to_value(OutputEvent::node(&record)).unwrap();
        assert_eq!(json["type"], "NodeComplete");
        assert_eq!(json["node_id"], "fetch-activity");
        assert_eq!(json["kind"], "step");
        assert_eq!(json["duration_ms"], 12);
    }

    #[test]
    fn test_run_failed_event_round_trips() {
        let event = OutputEvent::RunFailed {
            run_id: "r1".into(),
            node_id: Some("store-report".into()),
            error: "disk full".into(),
            completed: vec!["check-existing-log".into()],
        };
        let text = serde_json::to_string(&event).unwrap();
        let back: OutputEvent = serde_json::from_str(&text).unwrap();
        match back {
            OutputEvent::RunFailed { node_id, completed, .. } => {
                assert_eq!(node_id.as_deref(), Some("store-report"));
                assert_eq!(completed, vec!["check-existing-log"]);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_recording_handler_captures_events() {
        let handler = RecordingHandler::default();
        handler.emit(OutputEvent::info("one"));
        handler.emit(OutputEvent::Debug {
            message: "two".into(),
        });
        handler.result(true, Some(&Value::String("done".into())));

        assert_eq!(handler.events().len(), 2);
        assert_eq!(handler.messages(), vec!["one"]);
        assert_eq!(handler.results.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_create_handler() {
        let _ = create_handler(OutputMode::Console, false);
        let _ = create_handler(OutputMode::Json, false);
        let _ = create_handler(OutputMode::Quiet, false);
    }
}
