use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

use super::key::IssueKey;

/// Outcome of looking an issue up by key.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    Found(T),
    NotFound,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DestinationIssue {
    pub id: String,
    pub key: IssueKey,
    pub status: String,
    /// Field values as returned by the tracker.
    pub raw: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteComment {
    pub id: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAttachment {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub id: String,
    pub to_status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteLink {
    pub id: String,
    pub relationship: String,
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryUser {
    pub uid: u64,
    pub login: String,
    pub display: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryComponent {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyRef {
    pub key: String,
}

/// Fields overwritten on every convergence run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommonFields {
    pub summary: String,
    #[serde(rename = "type")]
    pub issue_type: KeyRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<KeyRef>,
    pub assignee: Option<u64>,
    #[serde(rename = "createdBy")]
    pub created_by: Option<u64>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldPatch {
    Replace(Value),
    Diff { add: Vec<Value>, remove: Vec<Value> },
}

/// Destination field name -> patch, serialized as the update request body.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FieldPatchSet(pub BTreeMap<String, FieldPatch>);

impl FieldPatchSet {
    pub fn insert(&mut self, field: impl Into<String>, patch: FieldPatch) {
        self.0.insert(field.into(), patch);
    }

    #[cfg(test)]
    pub fn get(&self, field: &str) -> Option<&FieldPatch> {
        self.0.get(field)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.0.len()
    }
}
