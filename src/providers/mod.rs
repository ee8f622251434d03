pub mod jira;
pub mod yandex;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::TrackerError;
use crate::model::destination::{
    CommonFields, DestinationIssue, DirectoryComponent, DirectoryUser, FieldPatchSet, Lookup,
    RemoteAttachment, RemoteComment, RemoteLink, Transition,
};
use crate::model::key::IssueKey;
use crate::model::source::{SourceAttachment, SourceIssue};

/// Issue sets the migration reads from the source tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceQuery {
    /// `from..=to` ordered by key; open-ended when `to` is `None`.
    KeyRange { from: IssueKey, to: Option<IssueKey> },
    /// Children of an epic, which the source does not list as subtasks.
    EpicChildren(IssueKey),
}

impl SourceQuery {
    pub fn to_jql(&self) -> String {
        match self {
            SourceQuery::KeyRange { from, to: None } => {
                format!("key>={from} ORDER BY key ASC")
            }
            SourceQuery::KeyRange { from, to: Some(to) } => {
                format!("key>={from} AND key<={to} ORDER BY key ASC")
            }
            SourceQuery::EpicChildren(epic) => {
                format!("key!={epic} AND parentEpic IN ({epic}) ORDER BY key ASC")
            }
        }
    }
}

#[async_trait]
pub trait SourceTracker: Send + Sync {
    /// Every issue matching `query`, in key order, without a result cap.
    async fn search(&self, query: &SourceQuery) -> Result<Vec<SourceIssue>, TrackerError>;
    async fn download(&self, attachment: &SourceAttachment) -> Result<Vec<u8>, TrackerError>;
}

/// Issue, comment, attachment and workflow operations on the destination.
#[async_trait]
pub trait DestinationTracker: Send + Sync {
    async fn get_issue(&self, key: &IssueKey) -> Result<Lookup<DestinationIssue>, TrackerError>;
    async fn create_issue(&self, queue: &str, summary: &str)
        -> Result<DestinationIssue, TrackerError>;
    async fn edit_issue(&self, issue_id: &str, fields: &CommonFields) -> Result<(), TrackerError>;

    async fn comments(&self, issue_id: &str) -> Result<Vec<RemoteComment>, TrackerError>;
    async fn post_comment(&self, issue_id: &str, text: &str) -> Result<(), TrackerError>;
    async fn delete_comment(&self, issue_id: &str, comment_id: &str) -> Result<(), TrackerError>;

    async fn attachments(&self, issue_id: &str) -> Result<Vec<RemoteAttachment>, TrackerError>;
    async fn attach_file(
        &self,
        issue_id: &str,
        filename: &str,
        content: Vec<u8>,
    ) -> Result<(), TrackerError>;
    async fn delete_attachment(
        &self,
        issue_id: &str,
        attachment_id: &str,
    ) -> Result<(), TrackerError>;

    async fn transitions(&self, issue_id: &str) -> Result<Vec<Transition>, TrackerError>;
    async fn execute_transition(
        &self,
        issue_id: &str,
        transition_id: &str,
    ) -> Result<(), TrackerError>;

    async fn close(&self) {}
}

/// Field patches, links and directories on the destination.
#[async_trait]
pub trait FieldTracker: Send + Sync {
    /// Raw field values of an issue.
    async fn issue_fields(&self, key: &IssueKey) -> Result<Value, TrackerError>;
    async fn update_fields(&self, key: &IssueKey, patch: &FieldPatchSet)
        -> Result<(), TrackerError>;

    async fn links(&self, key: &IssueKey) -> Result<Vec<RemoteLink>, TrackerError>;
    /// Fails with `Conflict` when already linked and `NotFound` when
    /// either side does not exist.
    async fn create_link(
        &self,
        from: &IssueKey,
        to: &IssueKey,
        relationship: &str,
    ) -> Result<(), TrackerError>;
    async fn delete_link(&self, key: &IssueKey, link_id: &str) -> Result<(), TrackerError>;

    async fn users(&self) -> Result<Vec<DirectoryUser>, TrackerError>;
    async fn components(&self) -> Result<Vec<DirectoryComponent>, TrackerError>;
}
