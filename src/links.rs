use tracing::{debug, info, warn};

use crate::context::RunContext;
use crate::error::{MigrationError, TrackerError};
use crate::model::key::IssueKey;
use crate::model::source::{LinkDirection, SourceIssue};
use crate::providers::SourceQuery;

/// Relationship keys used for hierarchy links, translated through the
/// `relationships` table like any other link type.
const EPIC_RELATION: &str = "epic";
const SUBTASK_RELATION: &str = "subtask";

/// Rebuilds the destination link graph for source issues.
pub struct LinkEstablisher<'c, 'a> {
    ctx: &'c RunContext<'a>,
}

impl<'c, 'a> LinkEstablisher<'c, 'a> {
    pub fn new(ctx: &'c RunContext<'a>) -> Self {
        Self { ctx }
    }

    fn is_epic(&self, issue_type: &str) -> Result<bool, MigrationError> {
        Ok(self.ctx.mapper.issue_type(issue_type)? == self.ctx.settings.epic_type)
    }

    fn hierarchy_relation(&self, from_is_epic: bool) -> Result<String, MigrationError> {
        let relation = if from_is_epic { EPIC_RELATION } else { SUBTASK_RELATION };
        self.ctx.mapper.relationship(relation)
    }

    /// Epics do not list their children as subtasks; ask the source.
    async fn epic_children(&self, epic: &IssueKey) -> Result<Vec<IssueKey>, MigrationError> {
        let ctx = self.ctx;
        let query = SourceQuery::EpicChildren(epic.clone());
        let children = ctx
            .retry
            .run("search epic children", || async { Ok(ctx.source.search(&query).await?) })
            .await?;
        debug!(epic = %epic, count = children.len(), "found epic children");
        Ok(children.into_iter().map(|child| child.key).collect())
    }

    pub async fn establish(&self, issue: &SourceIssue) -> Result<(), MigrationError> {
        let settings = self.ctx.settings;
        let is_epic = self.is_epic(&issue.issue_type)?;
        let children = if is_epic {
            self.epic_children(&issue.key).await?
        } else {
            Vec::new()
        };

        if !issue.has_relations() && children.is_empty() {
            debug!(issue = %issue.key, "no links to establish");
            return Ok(());
        }
        info!(issue = %issue.key, "establishing links");

        let this = settings.destination_key(&issue.key);

        for link in &issue.links {
            let relationship = self.ctx.mapper.relationship(&link.link_type.outward)?;
            match &link.direction {
                LinkDirection::Outward(target) => {
                    self.link(&this, &settings.link_key(target), &relationship)
                        .await?
                }
                // Stored from the other side so the outward label reads correctly.
                LinkDirection::Inward(origin) => {
                    self.link(&settings.link_key(origin), &this, &relationship)
                        .await?
                }
            }
        }

        if !issue.subtasks.is_empty() || !children.is_empty() {
            let relationship = self.hierarchy_relation(is_epic)?;
            for child in issue.subtasks.iter().chain(children.iter()) {
                self.link(&this, &settings.link_key(child), &relationship)
                    .await?;
            }
        }

        // Parent is the "from" side; its type picks the relation.
        if let Some(parent) = &issue.parent {
            let relationship = self.hierarchy_relation(self.is_epic(&parent.issue_type)?)?;
            self.link(&settings.link_key(&parent.key), &this, &relationship)
                .await?;
        }

        Ok(())
    }

    /// Create one link, absorbing "already linked" and "target missing".
    async fn link(
        &self,
        from: &IssueKey,
        to: &IssueKey,
        relationship: &str,
    ) -> Result<(), MigrationError> {
        let ctx = self.ctx;
        info!(%from, %to, relationship, "creating link");
        let result = ctx
            .retry
            .run("create link", || async {
                Ok(ctx.fields.create_link(from, to, relationship).await?)
            })
            .await;

        match result {
            Err(MigrationError::Tracker(TrackerError::Conflict(detail))) => {
                warn!(%from, %to, relationship, %detail, "issues are already linked");
                Ok(())
            }
            Err(MigrationError::Tracker(TrackerError::NotFound(detail))) => {
                warn!(%from, %to, relationship, %detail, "link target not found");
                Ok(())
            }
            other => other,
        }
    }
}
