mod auth;
mod completions;
mod file;
mod folder;
mod propertybag;

pub use auth::AuthCommand;
pub use completions::CompletionsCommand;
pub use file::FileCommand;
pub use folder::FolderCommand;
pub use propertybag::PropertybagCommand;

use anyhow::Result;
use clap::{Args, Subcommand};
use std::time::Duration;

use crate::copy_job::PollPolicy;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage authentication with SharePoint Online
    Auth(AuthCommand),

    /// File operations
    File(FileCommand),

    /// Folder operations
    Folder(FolderCommand),

    /// Web and folder property bag operations
    Propertybag(PropertybagCommand),

    /// Generate shell completion scripts
    Completions(CompletionsCommand),
}

/// Copy job polling budget, shared by the file and folder copy commands
#[derive(Debug, Args)]
pub struct PollArgs {
    /// Interval between copy job progress checks
    #[arg(long, default_value = "1800ms", value_parser = humantime::parse_duration)]
    poll_interval: Duration,

    /// Give up after this many progress checks report the job still in progress
    #[arg(long, default_value_t = 1000)]
    max_poll_attempts: u32,

    /// Consecutive failed progress checks tolerated before giving up
    #[arg(long, default_value_t = 5)]
    retry_attempts: u32,
}

impl PollArgs {
    pub fn policy(&self) -> PollPolicy {
        PollPolicy {
            poll_interval: self.poll_interval,
            max_poll_attempts: self.max_poll_attempts,
            max_transport_retries: self.retry_attempts,
        }
    }
}

/// All commands target SharePoint Online sites over https
pub fn ensure_sharepoint_url(url: &str) -> Result<()> {
    if !url.starts_with("https://") {
        anyhow::bail!("{} is not a valid SharePoint Online site URL", url);
    }
    Ok(())
}
