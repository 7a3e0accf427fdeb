//! Built-in prompt templates

pub const COMMIT_ANALYSIS: &str = "commit_analysis";
pub const REPOSITORY_SUMMARY: &str = "repository_summary";
pub const DAILY_REPORT: &str = "daily_report";
pub const SYSTEM: &str = "system";

pub const BUILTIN_NAMES: &[&str] = &[COMMIT_ANALYSIS, REPOSITORY_SUMMARY, DAILY_REPORT, SYSTEM];

pub fn builtin(name: &str) -> Option<&'static str> {
    match name {
        COMMIT_ANALYSIS => Some(COMMIT_ANALYSIS_SRC),
        REPOSITORY_SUMMARY => Some(REPOSITORY_SUMMARY_SRC),
        DAILY_REPORT => Some(DAILY_REPORT_SRC),
        SYSTEM => Some(SYSTEM_SRC),
        _ => None,
    }
}

const SYSTEM_SRC: &str = "\
You are a senior engineer reviewing a developer's daily source-control activity. \
Be specific and concise. When asked for JSON, answer with a single JSON object and nothing else.";

const COMMIT_ANALYSIS_SRC: &str = r#"Analyze this commit.

Repository: {{ commit.repository }}
Commit: {{ commit.sha }}
{% if commit.author %}Author: {{ commit.author }}
{% endif %}
Message:
{{ commit.message | clip(max_chars) }}

Respond with JSON:
{
  "summary": "1-2 sentences on what the commit achieves",
  "category": "feature | bugfix | refactor | docs | test | style | perf | build | ci | chore",
  "impact": "minor | moderate | major",
  "technical_details": ["key technical changes"]
}"#;

const REPOSITORY_SUMMARY_SRC: &str = r#"Summarize today's work in {{ repository }} ({{ date }}).

{{ analyses | length }} analyzed commits:
{% for a in analyses %}- [{{ a.category }}/{{ a.impact }}] {{ a.summary }}
{% endfor %}
Respond with JSON:
{
  "summary": "short narrative of the day's progress in this repository",
  "focus_areas": ["main areas of focus"],
  "momentum": "accelerating | steady | slowing | blocked"
}"#;

const DAILY_REPORT_SRC: &str = r#"Write the daily development log for {{ date }}.

{{ total_commits }} commits across {{ repositories | length }} repositories.
{% for r in repositories %}
## {{ r.repository }} ({{ r.commit_count }} commits)
{{ r.summary }}
{% if r.focus_areas %}Focus: {{ r.focus_areas | join(", ") }}
{% endif %}{% endfor %}
{% if failed_count > 0 %}{{ failed_count }} commits could not be analyzed and are left out.
{% endif %}
Respond with JSON:
{
  "title": "compelling title for the day",
  "haiku": "three-line haiku about the day's work",
  "narrative": "2-3 paragraph story of the day",
  "highlights": ["key accomplishments"]
}"#;
