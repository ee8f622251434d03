use tracing::{debug, error, info};

use crate::context::RunContext;
use crate::converge::Converger;
use crate::error::MigrationError;
use crate::links::LinkEstablisher;
use crate::model::source::SourceIssue;
use crate::providers::SourceQuery;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Full migration: converge every issue, then rebuild its links.
    ConvergeIssues,
    /// Rebuild links only; destination issues must already exist.
    EstablishLinksOnly,
}

/// Inclusive range of task numbers; open-ended when `finish` is `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskRange {
    pub start: u64,
    pub finish: Option<u64>,
}

impl TaskRange {
    pub fn new(start: u64, finish: Option<u64>) -> Result<Self, MigrationError> {
        if start == 0 {
            return Err(MigrationError::Contract(
                "start task number must be at least 1".into(),
            ));
        }
        if let Some(finish) = finish {
            if finish < start {
                return Err(MigrationError::Contract(format!(
                    "finish task number {finish} is lower than start task number {start}"
                )));
            }
        }
        Ok(Self { start, finish })
    }
}

/// Walks the source range one issue at a time.
pub struct RunDriver<'c, 'a> {
    ctx: &'c RunContext<'a>,
    mode: RunMode,
}

impl<'c, 'a> RunDriver<'c, 'a> {
    pub fn new(ctx: &'c RunContext<'a>, mode: RunMode) -> Self {
        Self { ctx, mode }
    }

    /// Process every source issue in `range`; returns how many were handled.
    ///
    /// The first failure aborts the run. The destination client is closed
    /// either way.
    pub async fn run(&self, range: TaskRange) -> Result<usize, MigrationError> {
        let result = self.drive(range).await;
        self.ctx.destination.close().await;
        result
    }

    async fn drive(&self, range: TaskRange) -> Result<usize, MigrationError> {
        let ctx = self.ctx;
        let query = SourceQuery::KeyRange {
            from: ctx.settings.range_key(range.start)?,
            to: range.finish.map(|n| ctx.settings.range_key(n)).transpose()?,
        };
        info!(jql = %query.to_jql(), "searching source issues");
        let issues = ctx
            .retry
            .run("search source issues", || async { Ok(ctx.source.search(&query).await?) })
            .await?;
        info!(count = issues.len(), mode = ?self.mode, "starting run");

        for issue in &issues {
            if let Err(err) = self.process(issue).await {
                error!(issue = %issue.key, error = %err, "failed to process issue");
                debug!(issue = %issue.key, raw = %issue.raw, "source issue payload");
                return Err(err);
            }
        }

        info!(count = issues.len(), "run finished");
        Ok(issues.len())
    }

    async fn process(&self, issue: &SourceIssue) -> Result<(), MigrationError> {
        let links = LinkEstablisher::new(self.ctx);
        match self.mode {
            RunMode::ConvergeIssues => {
                Converger::new(self.ctx).converge(issue).await?;
                links.establish(issue).await
            }
            RunMode::EstablishLinksOnly => links.establish(issue).await,
        }
    }
}
