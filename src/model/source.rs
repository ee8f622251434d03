use chrono::{DateTime, FixedOffset};
use serde_json::Value;

use super::key::IssueKey;
use crate::util::markup::wiki_to_markdown;

/// A Jira issue as read from the source tracker. Read-only for the whole run.
#[derive(Debug, Clone)]
pub struct SourceIssue {
    pub key: IssueKey,
    pub issue_type: String,
    pub priority: Option<String>,
    pub status: String,
    pub assignee: Option<SourceUser>,
    pub creator: Option<SourceUser>,
    pub summary: String,
    pub description: Option<RichText>,
    pub comments: Vec<SourceComment>,
    pub attachments: Vec<SourceAttachment>,
    pub links: Vec<SourceLink>,
    pub subtasks: Vec<IssueKey>,
    pub parent: Option<ParentRef>,
    /// The untyped `fields` object, walked by custom field paths.
    pub fields: Value,
    /// Whole issue payload, logged when the issue fails to migrate.
    pub raw: Value,
}

impl SourceIssue {
    pub fn has_relations(&self) -> bool {
        !self.links.is_empty() || !self.subtasks.is_empty() || self.parent.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUser {
    pub display_name: String,
}

#[derive(Debug, Clone)]
pub struct SourceComment {
    pub author: String,
    pub created: DateTime<FixedOffset>,
    pub body: RichText,
}

/// Description or comment text, tagged with the markup it was written in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RichText {
    /// Jira wiki markup.
    Wiki(String),
    /// Text flattened from a document tree; carries no markup.
    Plain(String),
}

impl RichText {
    pub fn as_str(&self) -> &str {
        match self {
            RichText::Wiki(text) | RichText::Plain(text) => text,
        }
    }

    pub fn is_blank(&self) -> bool {
        self.as_str().trim().is_empty()
    }

    /// Markdown for the destination. Plain text is already literal.
    pub fn to_markdown(&self) -> String {
        match self {
            RichText::Wiki(text) => wiki_to_markdown(text),
            RichText::Plain(text) => text.clone(),
        }
    }
}

impl From<&str> for RichText {
    fn from(text: &str) -> Self {
        RichText::Wiki(text.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct SourceAttachment {
    pub filename: String,
    pub content_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkType {
    pub name: String,
    pub inward: String,
    pub outward: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkDirection {
    /// `this -> target`
    Outward(IssueKey),
    /// `origin -> this`
    Inward(IssueKey),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLink {
    pub link_type: LinkType,
    pub direction: LinkDirection,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentRef {
    pub key: IssueKey,
    pub issue_type: String,
}
