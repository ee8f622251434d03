use chrono::{DateTime, FixedOffset};
use tracing::{debug, info};

use crate::context::RunContext;
use crate::error::MigrationError;
use crate::model::destination::{CommonFields, DestinationIssue, KeyRef, Lookup, Transition};
use crate::model::key::IssueKey;
use crate::model::source::{RichText, SourceComment, SourceIssue};

/// Yandex Tracker names the "go to status X from anywhere" transition `XMeta`.
const TRANSITION_SUFFIX: &str = "Meta";

/// Status an issue should end up in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusTarget<'s> {
    /// Source status name, translated through the `statuses` table.
    Source(&'s str),
    /// Destination status key, used as is.
    Explicit(&'s str),
}

impl<'s> StatusTarget<'s> {
    /// Exactly one of the two must be given; empty strings count as absent.
    pub fn from_parts(
        source_status: Option<&'s str>,
        destination_status: Option<&'s str>,
    ) -> Result<Self, MigrationError> {
        let source_status = source_status.filter(|s| !s.is_empty());
        let destination_status = destination_status.filter(|s| !s.is_empty());
        match (source_status, destination_status) {
            (Some(name), None) => Ok(StatusTarget::Source(name)),
            (None, Some(key)) => Ok(StatusTarget::Explicit(key)),
            _ => Err(MigrationError::Contract(
                "either a source status or a destination status must be set, not both".into(),
            )),
        }
    }
}

fn status_matches(current: &str, wanted: &str) -> bool {
    current == wanted || format!("{current}{TRANSITION_SUFFIX}") == wanted
}

fn find_transition<'t>(transitions: &'t [Transition], wanted: &str) -> Option<&'t Transition> {
    let meta = format!("{wanted}{TRANSITION_SUFFIX}");
    transitions
        .iter()
        .find(|t| t.id == wanted || t.id == meta)
        .or_else(|| transitions.iter().find(|t| t.to_status.as_deref() == Some(wanted)))
}

/// First line of a migrated comment: who wrote it and when, in the
/// configured zone.
pub fn comment_header(
    author: &str,
    created: &DateTime<FixedOffset>,
    offset: &FixedOffset,
    timezone_alias: &str,
) -> String {
    let local = created.with_timezone(offset);
    format!(
        "{author} created {} {timezone_alias}",
        local.format("%d %B %Y at %H:%M")
    )
}

/// Drives one source issue to its converged destination state.
pub struct Converger<'c, 'a> {
    ctx: &'c RunContext<'a>,
}

impl<'c, 'a> Converger<'c, 'a> {
    pub fn new(ctx: &'c RunContext<'a>) -> Self {
        Self { ctx }
    }

    pub async fn converge(&self, issue: &SourceIssue) -> Result<DestinationIssue, MigrationError> {
        info!(issue = %issue.key, "trying to find existing issue or create it");
        let destination = self.find_or_create(issue).await?;
        self.fill_common_fields(&destination, issue).await?;
        self.fill_custom_fields(&destination, issue).await?;
        self.resync_comments(&destination, issue).await?;
        self.resync_attachments(&destination, issue).await?;
        self.reset_links(&destination.key).await?;
        Ok(destination)
    }

    /// Search for the destination issue, creating placeholders until it
    /// exists.
    ///
    /// The tracker numbers new issues sequentially, so placeholders created
    /// for a missing key may land on lower numbers first and fill the gap.
    pub async fn find_or_create(
        &self,
        issue: &SourceIssue,
    ) -> Result<DestinationIssue, MigrationError> {
        let ctx = self.ctx;
        let wanted = ctx.settings.destination_key(&issue.key);
        let target = StatusTarget::from_parts(Some(issue.status.as_str()), None)?;
        let mut last_created: Option<IssueKey> = None;

        loop {
            let lookup = ctx
                .retry
                .run("find issue", || async { Ok(ctx.destination.get_issue(&wanted).await?) })
                .await?;

            match lookup {
                Lookup::Found(found) => {
                    debug!(issue = %found.key, id = %found.id, "found destination issue");
                    self.reconcile_status(&found, target).await?;
                    return Ok(found);
                }
                Lookup::NotFound => {
                    // The previous placeholder should have filled the gap up to `wanted`.
                    if let Some(created) = last_created.take() {
                        if created.number >= wanted.number {
                            return Err(MigrationError::KeySequenceOvershoot {
                                wanted: wanted.to_string(),
                                created: created.to_string(),
                            });
                        }
                    }
                    // Lower numbers stay behind as WIP placeholders.
                    let placeholder = self.create_placeholder().await?;
                    last_created = Some(placeholder.key);
                }
            }
        }
    }

    /// Create a placeholder issue and move it to the WIP status right away;
    /// creation cannot set an arbitrary initial status.
    async fn create_placeholder(&self) -> Result<DestinationIssue, MigrationError> {
        let ctx = self.ctx;
        let settings = ctx.settings;
        let wip = StatusTarget::from_parts(None, Some(settings.wip_status.as_str()))?;
        let placeholder = ctx
            .retry
            .run("create placeholder issue", || async {
                Ok(ctx
                    .destination
                    .create_issue(&settings.queue, &settings.placeholder_summary)
                    .await?)
            })
            .await?;
        info!(issue = %placeholder.key, "created temporary issue");
        self.reconcile_status(&placeholder, wip).await?;
        Ok(placeholder)
    }

    /// Move `issue` to the target status. Returns whether a transition ran.
    pub async fn reconcile_status(
        &self,
        issue: &DestinationIssue,
        target: StatusTarget<'_>,
    ) -> Result<bool, MigrationError> {
        let ctx = self.ctx;
        let wanted = match target {
            StatusTarget::Source(name) => ctx.mapper.status(name)?,
            StatusTarget::Explicit(key) => key.to_string(),
        };

        if status_matches(&issue.status, &wanted) {
            debug!(issue = %issue.key, status = %issue.status, "status already up to date");
            return Ok(false);
        }

        match target {
            StatusTarget::Source(name) => info!(
                issue = %issue.key,
                from = %issue.status,
                to = %wanted,
                source_status = name,
                "updating status to match source"
            ),
            StatusTarget::Explicit(_) => info!(
                issue = %issue.key,
                from = %issue.status,
                to = %wanted,
                "updating status"
            ),
        }

        ctx.retry
            .run("change status", || async {
                let transitions = ctx.destination.transitions(&issue.id).await?;
                let transition = find_transition(&transitions, &wanted).ok_or_else(|| {
                    MigrationError::NoTransition {
                        issue: issue.key.to_string(),
                        status: wanted.clone(),
                    }
                })?;
                ctx.destination
                    .execute_transition(&issue.id, &transition.id)
                    .await?;
                Ok(())
            })
            .await?;
        Ok(true)
    }

    pub async fn fill_common_fields(
        &self,
        destination: &DestinationIssue,
        issue: &SourceIssue,
    ) -> Result<(), MigrationError> {
        let ctx = self.ctx;
        info!(issue = %destination.key, "filling common fields");

        let priority = issue
            .priority
            .as_deref()
            .map(|name| ctx.mapper.priority(name))
            .transpose()?
            .map(|key| KeyRef { key });
        let fields = CommonFields {
            summary: issue.summary.clone(),
            issue_type: KeyRef {
                key: ctx.mapper.issue_type(&issue.issue_type)?,
            },
            priority,
            assignee: ctx
                .mapper
                .resolve_user(issue.assignee.as_ref(), ctx.fields, ctx.retry)
                .await?,
            created_by: ctx
                .mapper
                .resolve_user(issue.creator.as_ref(), ctx.fields, ctx.retry)
                .await?,
            description: issue
                .description
                .as_ref()
                .filter(|d| !d.is_blank())
                .map(RichText::to_markdown),
        };

        ctx.retry
            .run("fill common fields", || async {
                Ok(ctx.destination.edit_issue(&destination.id, &fields).await?)
            })
            .await
    }

    pub async fn fill_custom_fields(
        &self,
        destination: &DestinationIssue,
        issue: &SourceIssue,
    ) -> Result<(), MigrationError> {
        let ctx = self.ctx;
        info!(issue = %destination.key, "filling additional fields");

        let current = ctx
            .retry
            .run("fetch issue fields", || async {
                Ok(ctx.fields.issue_fields(&destination.key).await?)
            })
            .await?;
        let patches = ctx
            .mapper
            .custom_field_patches(issue, &current, ctx.fields, ctx.retry)
            .await?;
        if patches.is_empty() {
            debug!(issue = %destination.key, "no additional fields to update");
            return Ok(());
        }
        debug!(issue = %destination.key, ?patches, "additional fields");

        ctx.retry
            .run("fill additional fields", || async {
                Ok(ctx.fields.update_fields(&destination.key, &patches).await?)
            })
            .await
    }

    fn render_comment(&self, comment: &SourceComment) -> String {
        let settings = self.ctx.settings;
        format!(
            "{}\n\n{}",
            comment_header(
                &comment.author,
                &comment.created,
                &settings.comment_offset,
                &settings.timezone_alias
            ),
            comment.body.to_markdown()
        )
    }

    /// Replace every destination comment with the source comments, in order.
    pub async fn resync_comments(
        &self,
        destination: &DestinationIssue,
        issue: &SourceIssue,
    ) -> Result<(), MigrationError> {
        let ctx = self.ctx;
        let rendered: Vec<String> = issue.comments.iter().map(|c| self.render_comment(c)).collect();

        ctx.retry
            .run("resync comments", || async {
                for existing in ctx.destination.comments(&destination.id).await? {
                    ctx.destination
                        .delete_comment(&destination.id, &existing.id)
                        .await?;
                }
                for (index, text) in rendered.iter().enumerate() {
                    info!(issue = %destination.key, comment = index + 1, "adding comment");
                    ctx.destination.post_comment(&destination.id, text).await?;
                }
                Ok(())
            })
            .await
    }

    /// Replace every destination attachment with the source attachments.
    pub async fn resync_attachments(
        &self,
        destination: &DestinationIssue,
        issue: &SourceIssue,
    ) -> Result<(), MigrationError> {
        let ctx = self.ctx;
        ctx.retry
            .run("resync attachments", || async {
                for existing in ctx.destination.attachments(&destination.id).await? {
                    ctx.destination
                        .delete_attachment(&destination.id, &existing.id)
                        .await?;
                }
                for attachment in &issue.attachments {
                    info!(
                        issue = %destination.key,
                        filename = %attachment.filename,
                        "adding attachment"
                    );
                    let content = ctx.source.download(attachment).await?;
                    ctx.destination
                        .attach_file(&destination.id, &attachment.filename, content)
                        .await?;
                }
                Ok(())
            })
            .await
    }

    /// Drop every link of the issue; the link establisher rebuilds them.
    pub async fn reset_links(&self, key: &IssueKey) -> Result<(), MigrationError> {
        let ctx = self.ctx;
        info!(issue = %key, "deleting all links");
        ctx.retry
            .run("delete links", || async {
                for link in ctx.fields.links(key).await? {
                    ctx.fields.delete_link(key, &link.id).await?;
                }
                Ok(())
            })
            .await
    }
}
