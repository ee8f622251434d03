use thiserror::Error;

/// Failure reported by one of the remote trackers.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("remote error {status}: {message}")]
    Remote { status: u16, message: String },
    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl TrackerError {
    /// Classify an HTTP status code returned alongside `message`.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            404 => TrackerError::NotFound(message),
            409 | 422 => TrackerError::Conflict(message),
            429 | 500..=599 => TrackerError::Transient(format!("HTTP {status}: {message}")),
            _ => TrackerError::Remote { status, message },
        }
    }
}

impl From<reqwest::Error> for TrackerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return TrackerError::Decode(err.to_string());
        }
        match err.status() {
            Some(status) => TrackerError::from_status(status.as_u16(), err.to_string()),
            None => TrackerError::Transient(err.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("no mapping for '{key}' in section '{table}'")]
    UnmappedValue { table: &'static str, key: String },
    #[error("unknown Yandex Tracker user: {0}")]
    UnknownUser(String),
    #[error("contract violation: {0}")]
    Contract(String),
    #[error("issue '{issue}' has no transition to status '{status}'")]
    NoTransition { issue: String, status: String },
    #[error("placeholder '{created}' already passed '{wanted}' but '{wanted}' still does not exist")]
    KeySequenceOvershoot { wanted: String, created: String },
    #[error(transparent)]
    Tracker(#[from] TrackerError),
}

impl MigrationError {
    /// Whether another attempt of the same remote operation could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MigrationError::Tracker(
                TrackerError::Transient(_) | TrackerError::Remote { .. } | TrackerError::Decode(_)
            )
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_map_to_taxonomy() {
        assert!(matches!(TrackerError::from_status(404, "x"), TrackerError::NotFound(_)));
        assert!(matches!(TrackerError::from_status(422, "x"), TrackerError::Conflict(_)));
        assert!(matches!(TrackerError::from_status(409, "x"), TrackerError::Conflict(_)));
        assert!(matches!(TrackerError::from_status(503, "x"), TrackerError::Transient(_)));
        assert!(matches!(TrackerError::from_status(429, "x"), TrackerError::Transient(_)));
        assert!(matches!(
            TrackerError::from_status(403, "x"),
            TrackerError::Remote { status: 403, .. }
        ));
    }

    #[test]
    fn mapping_errors_are_not_retried() {
        let unmapped = MigrationError::UnmappedValue { table: "types", key: "story".into() };
        assert!(!unmapped.is_retryable());
        assert!(!MigrationError::UnknownUser("jdoe".into()).is_retryable());
        assert!(!MigrationError::from(TrackerError::NotFound("PROJ-1".into())).is_retryable());
        assert!(!MigrationError::from(TrackerError::Conflict("linked".into())).is_retryable());
        assert!(MigrationError::from(TrackerError::Transient("timeout".into())).is_retryable());
    }
}
