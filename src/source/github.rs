//! GitHub REST client for commit listings

use super::{ActivitySource, ActivityWindow, Commit, SourceError};
use crate::config::GithubConfig;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use serde::Deserialize;
use std::time::Duration;

const PER_PAGE: u32 = 100;

/// Lists commits through `GET /repos/{owner}/{repo}/commits`
#[derive(Debug, Clone)]
pub struct GithubClient {
    api_url: String,
    token: Option<String>,
    repositories: Vec<String>,
    max_pages: u32,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct CommitItem {
    sha: String,
    html_url: String,
    commit: CommitDetail,
    author: Option<UserRef>,
}

#[derive(Debug, Deserialize)]
struct CommitDetail {
    message: String,
    author: Option<GitAuthor>,
}

#[derive(Debug, Deserialize)]
struct GitAuthor {
    name: Option<String>,
    date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct UserRef {
    login: String,
}

impl CommitItem {
    fn into_commit(self, repository: &str) -> Commit {
        let (name, timestamp) = match self.commit.author {
            Some(author) => (author.name, author.date),
            None => (None, None),
        };

        Commit {
            repository: repository.to_string(),
            sha: self.sha,
            message: self.commit.message,
            url: self.html_url,
            author: self.author.map(|user| user.login).or(name),
            timestamp,
        }
    }
}

impl GithubClient {
    pub fn from_config(config: &GithubConfig) -> Result<Self, SourceError> {
        let client = Self::new(&config.api_url)?
            .with_repositories(config.repositories.clone())
            .with_max_pages(config.max_pages);
        Ok(match config.token() {
            Some(token) => client.with_token(token),
            None => client,
        })
    }

    pub fn new(api_url: impl Into<String>) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("dayflow/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| SourceError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            api_url: api_url.into(),
            token: None,
            repositories: Vec::new(),
            max_pages: 5,
            client,
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_repositories(mut self, repositories: Vec<String>) -> Self {
        self.repositories = repositories;
        self
    }

    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    pub fn repositories(&self) -> &[String] {
        &self.repositories
    }

    fn commits_url(&self, repository: &str) -> Result<String, SourceError> {
        let (owner, name) = split_repository(repository)?;
        Ok(format!(
            "{}/repos/{}/{}/commits",
            self.api_url.trim_end_matches('/'),
            owner,
            name
        ))
    }

    /// Every page of commits for one repository, up to `max_pages`
    pub async fn fetch_repository(
        &self,
        repository: &str,
        window: &ActivityWindow,
    ) -> Result<Vec<Commit>, SourceError> {
        let since = window.start.to_rfc3339_opts(SecondsFormat::Secs, true);
        let until = window.end.to_rfc3339_opts(SecondsFormat::Secs, true);
        let per_page = PER_PAGE.to_string();

        let mut request = self.client.get(self.commits_url(repository)?).query(&[
            ("since", since.as_str()),
            ("until", until.as_str()),
            ("per_page", per_page.as_str()),
        ]);
        let mut commits = Vec::new();

        for page in 1..=self.max_pages {
            request = request
                .header("Accept", "application/vnd.github+json")
                .header("X-GitHub-Api-Version", "2022-11-28");
            if let Some(token) = &self.token {
                request = request.bearer_auth(token);
            }

            let response = request.send().await.map_err(|e| SourceError::Http {
                repository: repository.to_string(),
                message: e.to_string(),
            })?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(SourceError::Status {
                    repository: repository.to_string(),
                    status: status.as_u16(),
                    body,
                });
            }

            let next = response
                .headers()
                .get(reqwest::header::LINK)
                .and_then(|value| value.to_str().ok())
                .and_then(next_page_url);

            let items: Vec<CommitItem> = response.json().await.map_err(|e| SourceError::Decode {
                repository: repository.to_string(),
                message: e.to_string(),
            })?;

            tracing::debug!(repository, page, count = items.len(), "Fetched commit page");
            commits.extend(items.into_iter().map(|item| item.into_commit(repository)));

            match next {
                Some(url) => request = self.client.get(url),
                None => return Ok(commits),
            }
        }

        tracing::warn!(
            repository,
            max_pages = self.max_pages,
            "Commit listing truncated at page limit"
        );
        Ok(commits)
    }
}

#[async_trait]
impl ActivitySource for GithubClient {
    async fn fetch_commits(&self, window: &ActivityWindow) -> Result<Vec<Commit>, SourceError> {
        if self.repositories.is_empty() {
            tracing::info!("No repositories configured for analysis");
            return Ok(Vec::new());
        }

        let mut commits = Vec::new();
        for repository in &self.repositories {
            match self.fetch_repository(repository, window).await {
                Ok(found) => commits.extend(found),
                Err(e) => tracing::warn!(repository = %repository, error = %e, "Skipping repository"),
            }
        }

        tracing::info!(
            commits = commits.len(),
            repositories = self.repositories.len(),
            "Fetched activity"
        );
        Ok(commits)
    }

    fn name(&self) -> &str {
        "github"
    }
}

fn split_repository(repository: &str) -> Result<(&str, &str), SourceError> {
    match repository.split_once('/') {
        Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => {
            Ok((owner, name))
        }
        _ => Err(SourceError::InvalidRepository(repository.to_string())),
    }
}

/// The `rel="next"` target of a `Link` header
pub fn next_page_url(link_header: &str) -> Option<String> {
    let re = Regex::new(r#"<([^>]+)>\s*;\s*rel="next""#).ok()?;
    re.captures(link_header)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}
