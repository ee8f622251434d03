use anyhow::{bail, Context, Result};
use chrono::FixedOffset;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::retry::RetryPolicy;

pub const DEFAULT_PLACEHOLDER_SUMMARY: &str = "[JIRA2YT] WIP";
const DEFAULT_EPIC_TYPE: &str = "epic";
const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    pub project_and_queue_key: String,
    pub final_status_for_wip_issue: String,
    #[serde(default = "default_placeholder_summary")]
    pub placeholder_summary: String,
    /// Destination type key that marks an issue as an epic.
    #[serde(default = "default_epic_type")]
    pub epic_type: String,
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub comments: CommentsConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Deserialize)]
pub struct ConnectionConfig {
    pub jira: JiraConfig,
    pub yandex_tracker: YandexTrackerConfig,
}

#[derive(Debug, Deserialize)]
pub struct JiraConfig {
    pub url: String,
    pub username: String,
    pub api_token: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct YandexTrackerConfig {
    pub token: String,
    pub org_id: String,
    #[serde(default)]
    pub account_type: AccountType,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Decides which header carries the organization id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    #[default]
    #[serde(alias = "360", alias = "org")]
    Organization,
    Cloud,
}

impl AccountType {
    pub fn org_header(&self) -> &'static str {
        match self {
            AccountType::Organization => "X-Org-ID",
            AccountType::Cloud => "X-Cloud-Org-ID",
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CommentsConfig {
    pub utc_offset_hours: i32,
    pub timezone_alias: String,
}

impl Default for CommentsConfig {
    fn default() -> Self {
        Self {
            utc_offset_hours: 3,
            timezone_alias: "MSK".into(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub delay_secs: u64,
    pub jitter_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            delay_secs: policy.delay.as_secs(),
            jitter_secs: policy.jitter.as_secs(),
        }
    }
}

fn default_placeholder_summary() -> String {
    DEFAULT_PLACEHOLDER_SUMMARY.into()
}

fn default_epic_type() -> String {
    DEFAULT_EPIC_TYPE.into()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl AppConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let required = [
            ("project_and_queue_key", &self.project_and_queue_key),
            ("final_status_for_wip_issue", &self.final_status_for_wip_issue),
            ("connection.jira.url", &self.connection.jira.url),
            ("connection.yandex_tracker.token", &self.connection.yandex_tracker.token),
            ("connection.yandex_tracker.org_id", &self.connection.yandex_tracker.org_id),
        ];
        for (path, value) in required {
            if value.trim().is_empty() {
                bail!("Config option '{path}' must not be empty");
            }
        }
        if self.project_and_queue_key.contains('-') {
            bail!("Config option 'project_and_queue_key' must not contain '-'");
        }
        if !(-23..=23).contains(&self.comments.utc_offset_hours) {
            bail!("Config option 'comments.utc_offset_hours' must be between -23 and 23");
        }
        if self.retry.max_attempts == 0 {
            bail!("Config option 'retry.max_attempts' must be at least 1");
        }
        Ok(())
    }

    pub fn comment_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.comments.utc_offset_hours * 3600)
            .unwrap_or_else(|| FixedOffset::east_opt(0).expect("UTC offset"))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            delay: Duration::from_secs(self.retry.delay_secs),
            jitter: Duration::from_secs(self.retry.jitter_secs),
        }
    }
}

pub fn load_config(path: &Path) -> Result<AppConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;
    AppConfig::from_toml_str(&contents)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}
