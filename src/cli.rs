use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

use crate::config;
use crate::context::{MigrationSettings, RunContext};
use crate::mapper::{self, FieldMapper};
use crate::providers::jira::JiraClient;
use crate::providers::yandex::YandexTrackerClient;
use crate::runner::{RunDriver, RunMode, TaskRange};

#[derive(Debug, Parser)]
#[command(name = "jira2yt", version, about = "Migrate Jira issues to Yandex Tracker")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[command(flatten)]
    pub run: RunArgs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Create or update every issue in the range, then rebuild its links
    ConvergeIssues,
    /// Rebuild links between issues that were already migrated
    EstablishLinksOnly,
}

impl Command {
    pub fn mode(&self) -> RunMode {
        match self {
            Command::ConvergeIssues => RunMode::ConvergeIssues,
            Command::EstablishLinksOnly => RunMode::EstablishLinksOnly,
        }
    }
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Connection and migration settings
    #[arg(long, global = true, env = "JIRA2YT_CONFIG_FILE", default_value = "config.toml")]
    pub config: PathBuf,

    /// Users, types, priorities, statuses, relationships and custom fields
    #[arg(long, global = true, env = "JIRA2YT_MAPPING_FILE", default_value = "mapping.toml")]
    pub mapping: PathBuf,

    /// First task number to process
    #[arg(
        long,
        global = true,
        env = "JIRA2YT_START_TASK_NUMBER",
        default_value_t = 1,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub start_task_number: u64,

    /// Last task number to process, inclusive; all remaining when omitted
    #[arg(
        long,
        global = true,
        env = "JIRA2YT_FINISH_TASK_NUMBER",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub finish_task_number: Option<u64>,
}

impl RunArgs {
    pub fn task_range(&self) -> Result<TaskRange> {
        Ok(TaskRange::new(self.start_task_number, self.finish_task_number)?)
    }
}

/// Load configuration and mapping, connect both trackers and run `cli.command`.
pub async fn handle(cli: Cli) -> Result<()> {
    // Reject a bad range before touching the network
    let range = cli.run.task_range()?;
    let config = config::load_config(&cli.run.config)?;
    let mapping = mapper::load_mapping(&cli.run.mapping)?;

    // One Yandex client serves both destination surfaces
    let source = JiraClient::new(&config.connection.jira)?;
    let destination = YandexTrackerClient::new(&config.connection.yandex_tracker)?;
    let mapper = FieldMapper::new(mapping);
    let retry = config.retry_policy();
    let settings = MigrationSettings::from_config(&config);

    let ctx = RunContext {
        source: &source,
        destination: &destination,
        fields: &destination,
        mapper: &mapper,
        retry: &retry,
        settings: &settings,
    };

    let mode = cli.command.mode();
    let handled = RunDriver::new(&ctx, mode)
        .run(range)
        .await
        .with_context(|| format!("Run {mode:?} stopped"))?;
    info!(handled, "migration finished");
    Ok(())
}
