use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, FixedOffset};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::{SourceQuery, SourceTracker};
use crate::config::JiraConfig;
use crate::error::TrackerError;
use crate::model::key::IssueKey;
use crate::model::source::{
    LinkDirection, LinkType, ParentRef, RichText, SourceAttachment, SourceComment, SourceIssue,
    SourceLink, SourceUser,
};
use crate::util::adf::rich_text;

const PAGE_SIZE: u32 = 100;

/// Jira REST API v2 client used as the migration source.
pub struct JiraClient {
    base_url: String,
    auth_header: String,
    client: reqwest::Client,
}

impl JiraClient {
    pub fn new(config: &JiraConfig) -> Result<Self> {
        let creds = format!("{}:{}", config.username, config.api_token);
        let encoded = base64::engine::general_purpose::STANDARD.encode(creds);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build Jira HTTP client")?;
        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            auth_header: format!("Basic {encoded}"),
            client,
        })
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, TrackerError> {
        let resp = self
            .client
            .get(url)
            .header("Authorization", &self.auth_header)
            .header("Accept", "application/json")
            .send()
            .await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(TrackerError::from_status(status.as_u16(), format!("GET {url}: {body}")))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, TrackerError> {
        let bytes = self.get(url).await?.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| TrackerError::Decode(format!("{url}: {e}")))
    }

    /// Search results carry only the first page of comments.
    async fn complete_comments(&self, issue: &mut SourceIssue, total: usize) -> Result<(), TrackerError> {
        let mut comments = Vec::with_capacity(total);
        let mut start_at = 0;
        loop {
            let url = format!(
                "{}/rest/api/2/issue/{}/comment?startAt={start_at}&maxResults={PAGE_SIZE}",
                self.base_url, issue.key
            );
            let page: CommentPage = self.get_json(&url).await?;
            let fetched = page.comments.len();
            for comment in page.comments {
                comments.push(comment.into_source()?);
            }
            start_at += fetched;
            if fetched == 0 || start_at >= page.total {
                break;
            }
        }
        debug!(issue = %issue.key, count = comments.len(), "fetched all comments");
        issue.comments = comments;
        Ok(())
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    #[serde(default)]
    total: usize,
    #[serde(default)]
    issues: Vec<Value>,
}

#[derive(Deserialize)]
struct JiraIssue {
    key: String,
    fields: IssueFields,
}

#[derive(Deserialize)]
struct IssueFields {
    summary: Option<String>,
    #[serde(default)]
    description: Value,
    issuetype: Option<NamedField>,
    status: Option<NamedField>,
    priority: Option<NamedField>,
    assignee: Option<UserField>,
    creator: Option<UserField>,
    comment: Option<CommentPage>,
    #[serde(default)]
    attachment: Vec<AttachmentField>,
    #[serde(default)]
    issuelinks: Vec<IssueLinkField>,
    #[serde(default)]
    subtasks: Vec<KeyField>,
    parent: Option<ParentField>,
}

#[derive(Deserialize)]
struct NamedField {
    name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserField {
    display_name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommentPage {
    #[serde(default)]
    comments: Vec<CommentField>,
    #[serde(default)]
    total: usize,
}

#[derive(Deserialize)]
struct CommentField {
    author: Option<UserField>,
    created: String,
    #[serde(default)]
    body: Value,
}

impl CommentField {
    fn into_source(self) -> Result<SourceComment, TrackerError> {
        Ok(SourceComment {
            author: self
                .author
                .map(|a| a.display_name)
                .unwrap_or_else(|| "Anonymous".into()),
            created: parse_timestamp(&self.created)?,
            body: rich_text(&self.body).unwrap_or_else(|| RichText::Plain(String::new())),
        })
    }
}

#[derive(Deserialize)]
struct AttachmentField {
    filename: String,
    content: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssueLinkField {
    #[serde(rename = "type")]
    link_type: LinkTypeField,
    outward_issue: Option<KeyField>,
    inward_issue: Option<KeyField>,
}

#[derive(Deserialize)]
struct LinkTypeField {
    name: String,
    inward: String,
    outward: String,
}

#[derive(Deserialize)]
struct KeyField {
    key: String,
}

#[derive(Deserialize)]
struct ParentField {
    key: String,
    fields: Option<ParentFields>,
}

#[derive(Deserialize)]
struct ParentFields {
    issuetype: Option<NamedField>,
}

/// Jira sends `2024-03-05T09:30:00.000+0000`.
fn parse_timestamp(value: &str) -> Result<DateTime<FixedOffset>, TrackerError> {
    DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f%z")
        .or_else(|_| DateTime::parse_from_rfc3339(value))
        .map_err(|e| TrackerError::Decode(format!("bad timestamp '{value}': {e}")))
}

fn parse_key(value: &str) -> Result<IssueKey, TrackerError> {
    value
        .parse()
        .map_err(|e| TrackerError::Decode(format!("{e}")))
}

/// Build a source issue from one raw search result. The second value is the
/// total comment count reported by the server.
fn parse_issue(raw: Value) -> Result<(SourceIssue, usize), TrackerError> {
    let issue: JiraIssue = serde_json::from_value(raw.clone())
        .map_err(|e| TrackerError::Decode(format!("issue payload: {e}")))?;
    let fields = issue.fields;

    let (comments, comment_total) = match fields.comment {
        Some(page) => {
            let total = page.total.max(page.comments.len());
            let comments = page
                .comments
                .into_iter()
                .map(CommentField::into_source)
                .collect::<Result<Vec<_>, _>>()?;
            (comments, total)
        }
        None => (Vec::new(), 0),
    };

    let mut links = Vec::new();
    for link in fields.issuelinks {
        let link_type = LinkType {
            name: link.link_type.name,
            inward: link.link_type.inward,
            outward: link.link_type.outward,
        };
        let direction = match (link.outward_issue, link.inward_issue) {
            (Some(target), _) => LinkDirection::Outward(parse_key(&target.key)?),
            (None, Some(origin)) => LinkDirection::Inward(parse_key(&origin.key)?),
            (None, None) => continue,
        };
        links.push(SourceLink { link_type, direction });
    }

    let parent = match fields.parent {
        Some(parent) => Some(ParentRef {
            key: parse_key(&parent.key)?,
            issue_type: parent
                .fields
                .and_then(|f| f.issuetype)
                .map(|t| t.name)
                .unwrap_or_default(),
        }),
        None => None,
    };

    let source = SourceIssue {
        key: parse_key(&issue.key)?,
        issue_type: fields.issuetype.map(|t| t.name).unwrap_or_default(),
        priority: fields.priority.map(|p| p.name),
        status: fields.status.map(|s| s.name).unwrap_or_default(),
        assignee: fields.assignee.map(|u| SourceUser { display_name: u.display_name }),
        creator: fields.creator.map(|u| SourceUser { display_name: u.display_name }),
        summary: fields.summary.unwrap_or_default(),
        description: rich_text(&fields.description),
        comments,
        attachments: fields
            .attachment
            .into_iter()
            .map(|a| SourceAttachment {
                filename: a.filename,
                content_url: a.content,
            })
            .collect(),
        links,
        subtasks: fields
            .subtasks
            .iter()
            .map(|s| parse_key(&s.key))
            .collect::<Result<_, _>>()?,
        parent,
        fields: raw.get("fields").cloned().unwrap_or(Value::Null),
        raw,
    };
    Ok((source, comment_total))
}

#[async_trait]
impl SourceTracker for JiraClient {
    async fn search(&self, query: &SourceQuery) -> Result<Vec<SourceIssue>, TrackerError> {
        let jql = query.to_jql();
        let mut issues = Vec::new();
        let mut start_at = 0;

        loop {
            let url = format!(
                "{}/rest/api/2/search?jql={}&startAt={start_at}&maxResults={PAGE_SIZE}&fields=*all",
                self.base_url,
                urlencoding::encode(&jql)
            );
            let page: SearchResponse = self.get_json(&url).await?;
            let fetched = page.issues.len();
            debug!(%jql, start_at, fetched, total = page.total, "fetched search page");

            for raw in page.issues {
                let (mut issue, comment_total) = parse_issue(raw)?;
                if comment_total > issue.comments.len() {
                    self.complete_comments(&mut issue, comment_total).await?;
                }
                issues.push(issue);
            }

            start_at += fetched;
            if fetched == 0 || start_at >= page.total {
                break;
            }
        }

        Ok(issues)
    }

    async fn download(&self, attachment: &SourceAttachment) -> Result<Vec<u8>, TrackerError> {
        let bytes = self.get(&attachment.content_url).await?.bytes().await?;
        debug!(filename = %attachment.filename, size = bytes.len(), "downloaded attachment");
        Ok(bytes.to_vec())
    }
}
