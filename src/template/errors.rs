//! Template errors with suggestions for misspelled names

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("undefined variable '{name}' in {template}{}", .suggestion.as_ref().map(|s| format!(", did you mean '{}'?", s)).unwrap_or_default())]
    UndefinedVariable {
        name: String,
        template: String,
        suggestion: Option<String>,
    },

    #[error("syntax error in {template} at line {line}: {message}")]
    Syntax {
        template: String,
        line: usize,
        message: String,
    },

    #[error("unknown template '{name}'{}", .suggestion.as_ref().map(|s| format!(", did you mean '{}'?", s)).unwrap_or_default())]
    UnknownTemplate {
        name: String,
        suggestion: Option<String>,
    },

    #[error("failed to render {template}: {source}")]
    Render {
        template: String,
        #[source]
        source: minijinja::Error,
    },
}

impl TemplateError {
    pub fn undefined_variable(
        name: impl Into<String>,
        template: impl Into<String>,
        known: &[&str],
    ) -> Self {
        let name = name.into();
        let suggestion = suggest_correction(&name, known);
        Self::UndefinedVariable {
            name,
            template: template.into(),
            suggestion,
        }
    }

    pub fn unknown_template(name: impl Into<String>, known: &[&str]) -> Self {
        let name = name.into();
        let suggestion = suggest_correction(&name, known);
        Self::UnknownTemplate { name, suggestion }
    }
}

/// Closest candidate within half the length of `typo` in edits
pub fn suggest_correction(typo: &str, candidates: &[&str]) -> Option<String> {
    let max_distance = (typo.len() / 2).max(2);
    candidates
        .iter()
        .map(|candidate| (levenshtein_distance(typo, candidate), *candidate))
        .filter(|(distance, _)| *distance <= max_distance)
        .min_by_key(|(distance, _)| *distance)
        .map(|(_, candidate)| candidate.to_string())
}

fn levenshtein_distance(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b.len()).collect();

    for (i, ca) in a.chars().enumerate() {
        let mut current = Vec::with_capacity(b.len() + 1);
        current.push(i + 1);
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != *cb);
            current.push(substitution.min(previous[j + 1] + 1).min(current[j] + 1));
        }
        previous = current;
    }

    previous[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levenshtein_distance() {
        assert_eq!(levenshtein_distance("kitten", "sitting"), 3);
        assert_eq!(levenshtein_distance("commit", "comit"), 1);
        assert_eq!(levenshtein_distance("", "abc"), 3);
        assert_eq!(levenshtein_distance("abc", ""), 3);
        assert_eq!(levenshtein_distance("same", "same"), 0);
    }

    #[test]
    fn test_suggest_correction() {
        let candidates = ["commit_analysis", "repository_summary", "daily_report"];
        assert_eq!(
            suggest_correction("comit_analysis", &candidates),
            Some("commit_analysis".into())
        );
        assert_eq!(suggest_correction("weather", &candidates), None);
        assert_eq!(suggest_correction("anything", &[]), None);
    }

    #[test]
    fn test_error_display() {
        let err = TemplateError::undefined_variable("comit", "commit_analysis", &["commit", "date"]);
        let msg = err.to_string();
        assert!(msg.contains("undefined variable 'comit' in commit_analysis"));
        assert!(msg.contains("did you mean 'commit'"));

        let err = TemplateError::unknown_template("nope", &[]);
        assert_eq!(err.to_string(), "unknown template 'nope'");
    }
}
