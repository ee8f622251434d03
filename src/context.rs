use chrono::FixedOffset;

use crate::config::AppConfig;
use crate::error::MigrationError;
use crate::mapper::FieldMapper;
use crate::model::key::IssueKey;
use crate::providers::{DestinationTracker, FieldTracker, SourceTracker};
use crate::retry::RetryPolicy;

/// Run-wide settings the engine needs from the configuration file.
#[derive(Debug, Clone)]
pub struct MigrationSettings {
    pub queue: String,
    pub wip_status: String,
    pub placeholder_summary: String,
    pub epic_type: String,
    pub comment_offset: FixedOffset,
    pub timezone_alias: String,
}

impl MigrationSettings {
    #[cfg(test)]
    pub fn new(queue: impl Into<String>, wip_status: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            wip_status: wip_status.into(),
            placeholder_summary: crate::config::DEFAULT_PLACEHOLDER_SUMMARY.into(),
            epic_type: "epic".into(),
            comment_offset: FixedOffset::east_opt(3 * 3600).expect("UTC+3"),
            timezone_alias: "MSK".into(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            queue: config.project_and_queue_key.clone(),
            wip_status: config.final_status_for_wip_issue.clone(),
            placeholder_summary: config.placeholder_summary.clone(),
            epic_type: config.epic_type.clone(),
            comment_offset: config.comment_offset(),
            timezone_alias: config.comments.timezone_alias.clone(),
        }
    }

    /// Destination key for a source key: same number, target queue.
    pub fn destination_key(&self, source: &IssueKey) -> IssueKey {
        source.in_queue(&self.queue)
    }

    /// Destination key for a link endpoint. Keys of other projects were not
    /// migrated into the queue and are passed through unchanged.
    pub fn link_key(&self, source: &IssueKey) -> IssueKey {
        if source.project.eq_ignore_ascii_case(&self.queue) {
            self.destination_key(source)
        } else {
            source.clone()
        }
    }

    /// First key of a migration range; numbering starts at 1.
    pub fn range_key(&self, number: u64) -> Result<IssueKey, MigrationError> {
        if number == 0 {
            return Err(MigrationError::Contract("task numbers start at 1".into()));
        }
        Ok(IssueKey::new(self.queue.clone(), number))
    }
}

/// Everything one migration run works with, built once and shared by
/// reference between the orchestrator, the link establisher and the driver.
pub struct RunContext<'a> {
    pub source: &'a dyn SourceTracker,
    pub destination: &'a dyn DestinationTracker,
    pub fields: &'a dyn FieldTracker,
    pub mapper: &'a FieldMapper,
    pub retry: &'a RetryPolicy,
    pub settings: &'a MigrationSettings,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> IssueKey {
        s.parse().unwrap()
    }

    #[test]
    fn link_key_requeues_own_project() {
        let settings = MigrationSettings::new("PROJ", "inProgress");
        assert_eq!(settings.link_key(&key("PROJ-7")), key("PROJ-7"));
    }

    #[test]
    fn link_key_keeps_foreign_project() {
        let settings = MigrationSettings::new("PROJ", "inProgress");
        assert_eq!(settings.link_key(&key("OTHER-2")), key("OTHER-2"));
        assert_eq!(settings.destination_key(&key("OTHER-2")), key("PROJ-2"));
    }

    #[test]
    fn range_key_rejects_zero() {
        let settings = MigrationSettings::new("PROJ", "inProgress");
        assert!(settings.range_key(0).is_err());
        assert_eq!(settings.range_key(10).unwrap(), key("PROJ-10"));
    }
}
