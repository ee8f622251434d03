use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response};
use serde::de::{DeserializeOwned, Deserializer};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use super::{DestinationTracker, FieldTracker};
use crate::config::YandexTrackerConfig;
use crate::error::TrackerError;
use crate::model::destination::{
    CommonFields, DestinationIssue, DirectoryComponent, DirectoryUser, FieldPatchSet, Lookup,
    RemoteAttachment, RemoteComment, RemoteLink, Transition,
};
use crate::model::key::IssueKey;

const API_URL: &str = "https://api.tracker.yandex.net/v2";
const USERS_PAGE_SIZE: usize = 100;
const COMMENTS_PAGE_SIZE: usize = 100;

/// Comments are paged by cursor: `id` names the last comment already seen.
fn comments_page_path(issue_id: &str, after: Option<&str>) -> String {
    let mut path = format!("/issues/{issue_id}/comments?perPage={COMMENTS_PAGE_SIZE}");
    if let Some(last) = after {
        path.push_str("&id=");
        path.push_str(&urlencoding::encode(last));
    }
    path
}

/// Yandex Tracker REST API v2 client; serves both destination traits.
pub struct YandexTrackerClient {
    base_url: String,
    auth_header: String,
    org_header: &'static str,
    org_id: String,
    client: reqwest::Client,
}

impl YandexTrackerClient {
    pub fn new(config: &YandexTrackerConfig) -> Result<Self> {
        Self::with_base_url(config, API_URL)
    }

    pub fn with_base_url(config: &YandexTrackerConfig, base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build Yandex Tracker HTTP client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_header: format!("OAuth {}", config.token),
            org_header: config.account_type.org_header(),
            org_id: config.org_id.clone(),
            client,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{path}", self.base_url))
            .header("Authorization", &self.auth_header)
            .header(self.org_header, &self.org_id)
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Response, TrackerError> {
        let resp = request.send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(TrackerError::from_status(status.as_u16(), format!("{what}: {body}")))
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        what: &str,
    ) -> Result<T, TrackerError> {
        let bytes = self.send(request, what).await?.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| TrackerError::Decode(format!("{what}: {e}")))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, TrackerError> {
        self.send_json(self.request(Method::GET, path), path).await
    }
}

/// Tracker ids come back as numbers for some entities and strings for others.
fn id_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("unexpected id {other}"))),
    }
}

#[derive(Deserialize)]
struct StatusRef {
    key: String,
}

#[derive(Deserialize)]
struct IssueBody {
    #[serde(deserialize_with = "id_string")]
    id: String,
    key: String,
    status: Option<StatusRef>,
}

fn parse_issue(raw: Value) -> Result<DestinationIssue, TrackerError> {
    let body: IssueBody = serde_json::from_value(raw.clone())
        .map_err(|e| TrackerError::Decode(format!("issue payload: {e}")))?;
    Ok(DestinationIssue {
        id: body.id,
        key: body
            .key
            .parse()
            .map_err(|e| TrackerError::Decode(format!("{e}")))?,
        status: body.status.map(|s| s.key).unwrap_or_default(),
        raw,
    })
}

#[derive(Deserialize)]
struct CommentBody {
    #[serde(deserialize_with = "id_string")]
    id: String,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct AttachmentBody {
    #[serde(deserialize_with = "id_string")]
    id: String,
    name: String,
}

#[derive(Deserialize)]
struct TransitionBody {
    id: String,
    to: Option<StatusRef>,
}

#[derive(Deserialize)]
struct LinkTypeBody {
    id: String,
}

#[derive(Deserialize)]
struct LinkedIssue {
    key: String,
}

#[derive(Deserialize)]
struct LinkBody {
    #[serde(deserialize_with = "id_string")]
    id: String,
    #[serde(rename = "type")]
    link_type: LinkTypeBody,
    object: LinkedIssue,
}

#[derive(Deserialize)]
struct UserBody {
    uid: u64,
    login: String,
    display: Option<String>,
}

#[derive(Deserialize)]
struct ComponentBody {
    id: u64,
    name: String,
}

#[async_trait]
impl DestinationTracker for YandexTrackerClient {
    async fn get_issue(&self, key: &IssueKey) -> Result<Lookup<DestinationIssue>, TrackerError> {
        match self.get_json::<Value>(&format!("/issues/{key}")).await {
            Ok(raw) => Ok(Lookup::Found(parse_issue(raw)?)),
            Err(TrackerError::NotFound(_)) => Ok(Lookup::NotFound),
            Err(e) => Err(e),
        }
    }

    async fn create_issue(
        &self,
        queue: &str,
        summary: &str,
    ) -> Result<DestinationIssue, TrackerError> {
        let request = self
            .request(Method::POST, "/issues/")
            .json(&json!({ "queue": queue, "summary": summary }));
        let raw: Value = self.send_json(request, "create issue").await?;
        parse_issue(raw)
    }

    async fn edit_issue(&self, issue_id: &str, fields: &CommonFields) -> Result<(), TrackerError> {
        let request = self
            .request(Method::PATCH, &format!("/issues/{issue_id}"))
            .json(fields);
        self.send(request, "edit issue").await?;
        Ok(())
    }

    async fn comments(&self, issue_id: &str) -> Result<Vec<RemoteComment>, TrackerError> {
        let mut comments = Vec::new();
        loop {
            let after = comments.last().map(|c: &RemoteComment| c.id.as_str());
            let batch: Vec<CommentBody> =
                self.get_json(&comments_page_path(issue_id, after)).await?;
            let fetched = batch.len();
            comments.extend(
                batch
                    .into_iter()
                    .map(|c| RemoteComment { id: c.id, text: c.text }),
            );
            // Short page means no cursor left
            if fetched < COMMENTS_PAGE_SIZE {
                break;
            }
        }
        Ok(comments)
    }

    async fn post_comment(&self, issue_id: &str, text: &str) -> Result<(), TrackerError> {
        let request = self
            .request(Method::POST, &format!("/issues/{issue_id}/comments"))
            .json(&json!({ "text": text }));
        self.send(request, "post comment").await?;
        Ok(())
    }

    async fn delete_comment(&self, issue_id: &str, comment_id: &str) -> Result<(), TrackerError> {
        let request = self.request(
            Method::DELETE,
            &format!("/issues/{issue_id}/comments/{comment_id}"),
        );
        self.send(request, "delete comment").await?;
        Ok(())
    }

    async fn attachments(&self, issue_id: &str) -> Result<Vec<RemoteAttachment>, TrackerError> {
        let attachments: Vec<AttachmentBody> =
            self.get_json(&format!("/issues/{issue_id}/attachments")).await?;
        Ok(attachments
            .into_iter()
            .map(|a| RemoteAttachment { id: a.id, name: a.name })
            .collect())
    }

    async fn attach_file(
        &self,
        issue_id: &str,
        filename: &str,
        content: Vec<u8>,
    ) -> Result<(), TrackerError> {
        let part = reqwest::multipart::Part::bytes(content).file_name(filename.to_string());
        let form = reqwest::multipart::Form::new().part("file", part);
        let request = self
            .request(Method::POST, &format!("/issues/{issue_id}/attachments/"))
            .multipart(form);
        self.send(request, "attach file").await?;
        Ok(())
    }

    async fn delete_attachment(
        &self,
        issue_id: &str,
        attachment_id: &str,
    ) -> Result<(), TrackerError> {
        let request = self.request(
            Method::DELETE,
            &format!("/issues/{issue_id}/attachments/{attachment_id}/"),
        );
        self.send(request, "delete attachment").await?;
        Ok(())
    }

    async fn transitions(&self, issue_id: &str) -> Result<Vec<Transition>, TrackerError> {
        let transitions: Vec<TransitionBody> =
            self.get_json(&format!("/issues/{issue_id}/transitions")).await?;
        Ok(transitions
            .into_iter()
            .map(|t| Transition {
                id: t.id,
                to_status: t.to.map(|s| s.key),
            })
            .collect())
    }

    async fn execute_transition(
        &self,
        issue_id: &str,
        transition_id: &str,
    ) -> Result<(), TrackerError> {
        let request = self
            .request(
                Method::POST,
                &format!("/issues/{issue_id}/transitions/{transition_id}/_execute"),
            )
            .json(&json!({}));
        self.send(request, "execute transition").await?;
        Ok(())
    }

    async fn close(&self) {
        debug!("closing Yandex Tracker client");
    }
}

#[async_trait]
impl FieldTracker for YandexTrackerClient {
    async fn issue_fields(&self, key: &IssueKey) -> Result<Value, TrackerError> {
        self.get_json(&format!("/issues/{key}")).await
    }

    async fn update_fields(
        &self,
        key: &IssueKey,
        patch: &FieldPatchSet,
    ) -> Result<(), TrackerError> {
        let request = self
            .request(Method::PATCH, &format!("/issues/{key}"))
            .json(patch);
        self.send(request, "update fields").await?;
        Ok(())
    }

    async fn links(&self, key: &IssueKey) -> Result<Vec<RemoteLink>, TrackerError> {
        let links: Vec<LinkBody> = self.get_json(&format!("/issues/{key}/links")).await?;
        Ok(links
            .into_iter()
            .map(|l| RemoteLink {
                id: l.id,
                relationship: l.link_type.id,
                target: l.object.key,
            })
            .collect())
    }

    async fn create_link(
        &self,
        from: &IssueKey,
        to: &IssueKey,
        relationship: &str,
    ) -> Result<(), TrackerError> {
        let request = self
            .request(Method::POST, &format!("/issues/{from}/links"))
            .json(&json!({ "relationship": relationship, "issue": to.to_string() }));
        self.send(request, "create link").await?;
        Ok(())
    }

    async fn delete_link(&self, key: &IssueKey, link_id: &str) -> Result<(), TrackerError> {
        let request = self.request(Method::DELETE, &format!("/issues/{key}/links/{link_id}"));
        self.send(request, "delete link").await?;
        Ok(())
    }

    async fn users(&self) -> Result<Vec<DirectoryUser>, TrackerError> {
        let mut users = Vec::new();
        for page in 1.. {
            let batch: Vec<UserBody> = self
                .get_json(&format!("/users?perPage={USERS_PAGE_SIZE}&page={page}"))
                .await?;
            let fetched = batch.len();
            users.extend(batch.into_iter().map(|u| DirectoryUser {
                uid: u.uid,
                login: u.login,
                display: u.display,
            }));
            if fetched < USERS_PAGE_SIZE {
                break;
            }
        }
        Ok(users)
    }

    async fn components(&self) -> Result<Vec<DirectoryComponent>, TrackerError> {
        let components: Vec<ComponentBody> = self.get_json("/components").await?;
        Ok(components
            .into_iter()
            .map(|c| DirectoryComponent { id: c.id, name: c.name })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AccountType;

    fn config(account_type: AccountType) -> YandexTrackerConfig {
        YandexTrackerConfig {
            token: "y0_token".into(),
            org_id: "123456".into(),
            account_type,
            timeout_secs: 5,
        }
    }

    #[test]
    fn parses_issue_payload() {
        let raw = json!({
            "self": "https://api.tracker.yandex.net/v2/issues/PROJ-4",
            "id": "5f1e2d3c4b5a",
            "key": "PROJ-4",
            "summary": "Crash",
            "status": { "key": "inProgress", "display": "In progress" },
            "tags": ["backend"]
        });
        let issue = parse_issue(raw).unwrap();

        assert_eq!(issue.id, "5f1e2d3c4b5a");
        assert_eq!(issue.key.to_string(), "PROJ-4");
        assert_eq!(issue.status, "inProgress");
        assert_eq!(issue.raw["tags"], json!(["backend"]));
    }

    #[test]
    fn numeric_ids_become_strings() {
        let comment: CommentBody =
            serde_json::from_value(json!({ "id": 42, "longId": "abc", "text": "hi" })).unwrap();
        assert_eq!(comment.id, "42");

        let link: LinkBody = serde_json::from_value(json!({
            "id": 1001,
            "type": { "id": "relates", "inward": "relates", "outward": "relates" },
            "direction": "outward",
            "object": { "key": "PROJ-2", "display": "Other" }
        }))
        .unwrap();
        assert_eq!(link.id, "1001");
        assert_eq!(link.link_type.id, "relates");
        assert_eq!(link.object.key, "PROJ-2");
    }

    #[test]
    fn comment_pages_follow_last_id() {
        assert_eq!(
            comments_page_path("5f1e", None),
            format!("/issues/5f1e/comments?perPage={COMMENTS_PAGE_SIZE}")
        );
        assert_eq!(
            comments_page_path("5f1e", Some("42")),
            format!("/issues/5f1e/comments?perPage={COMMENTS_PAGE_SIZE}&id=42")
        );
    }

    #[test]
    fn rejects_malformed_ids() {
        let parsed: Result<AttachmentBody, _> =
            serde_json::from_value(json!({ "id": [1], "name": "x" }));
        assert!(parsed.is_err());
    }

    #[test]
    fn transitions_expose_target_status() {
        let body: Vec<TransitionBody> = serde_json::from_value(json!([
            { "id": "closeMeta", "display": "Close", "to": { "key": "closed" } },
            { "id": "reopen" }
        ]))
        .unwrap();
        assert_eq!(body[0].to.as_ref().unwrap().key, "closed");
        assert!(body[1].to.is_none());
    }

    #[test]
    fn uses_org_header_for_account_type() {
        let org = YandexTrackerClient::new(&config(AccountType::Organization)).unwrap();
        assert_eq!(org.org_header, "X-Org-ID");
        assert_eq!(org.auth_header, "OAuth y0_token");

        let cloud =
            YandexTrackerClient::with_base_url(&config(AccountType::Cloud), "http://localhost/v2/")
                .unwrap();
        assert_eq!(cloud.org_header, "X-Cloud-Org-ID");
        assert_eq!(cloud.base_url, "http://localhost/v2");
    }
}
