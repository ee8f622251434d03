use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::MigrationError;

/// Issue key of the form `PROJ-42`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IssueKey {
    pub project: String,
    pub number: u64,
}

impl IssueKey {
    pub fn new(project: impl Into<String>, number: u64) -> Self {
        Self {
            project: project.into(),
            number,
        }
    }

    /// The same issue number under another project/queue prefix.
    pub fn in_queue(&self, queue: &str) -> IssueKey {
        IssueKey::new(queue, self.number)
    }
}

impl FromStr for IssueKey {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (project, number) = s
            .rsplit_once('-')
            .ok_or_else(|| MigrationError::Contract(format!("malformed issue key '{s}'")))?;
        if project.is_empty() {
            return Err(MigrationError::Contract(format!("malformed issue key '{s}'")));
        }
        let number = number
            .parse::<u64>()
            .map_err(|_| MigrationError::Contract(format!("malformed issue key '{s}'")))?;
        Ok(IssueKey::new(project, number))
    }
}

impl TryFrom<String> for IssueKey {
    type Error = MigrationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<IssueKey> for String {
    fn from(key: IssueKey) -> Self {
        key.to_string()
    }
}

impl fmt::Display for IssueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.project, self.number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_displays() {
        let key: IssueKey = "PROJ-42".parse().unwrap();
        assert_eq!(key.project, "PROJ");
        assert_eq!(key.number, 42);
        assert_eq!(key.to_string(), "PROJ-42");
    }

    #[test]
    fn keeps_dashes_in_project() {
        let key: IssueKey = "MY-PROJ-7".parse().unwrap();
        assert_eq!(key.project, "MY-PROJ");
        assert_eq!(key.number, 7);
    }

    #[test]
    fn rejects_malformed_keys() {
        assert!("PROJ".parse::<IssueKey>().is_err());
        assert!("PROJ-x".parse::<IssueKey>().is_err());
        assert!("-12".parse::<IssueKey>().is_err());
    }

    #[test]
    fn requeue_is_idempotent() {
        let key: IssueKey = "PROJ-12".parse().unwrap();
        let once = key.in_queue("QUEUE");
        assert_eq!(once.to_string(), "QUEUE-12");
        assert_eq!(once.in_queue("QUEUE"), once);
    }

    #[test]
    fn orders_by_number_within_project() {
        let a: IssueKey = "PROJ-9".parse().unwrap();
        let b: IssueKey = "PROJ-10".parse().unwrap();
        assert!(a < b);
    }
}
