use anyhow::Result;
use clap::{Args, Subcommand};
use tracing::debug;

use super::PollArgs;
use crate::auth::Auth;
use crate::copy_job::{CopyJobPoller, create_copy_job};
use crate::spo_client::{SpoClient, tenant_url, url_combine};

#[derive(Debug, Args)]
pub struct FileCommand {
    #[command(subcommand)]
    command: FileCommands,
}

#[derive(Debug, Subcommand)]
enum FileCommands {
    /// Copy a file to another location
    Copy(FileCopyArgs),
}

#[derive(Debug, Args)]
struct FileCopyArgs {
    /// The URL of the site where the file is located
    #[arg(short = 'u', long)]
    web_url: String,

    /// Site-relative URL of the file to copy
    #[arg(short, long)]
    source_url: String,

    /// Server-relative URL where to copy the file
    #[arg(short, long)]
    target_url: String,

    /// If a file already exists at the target URL, move it to the recycle
    /// bin first. If omitted, the copy fails when the target exists.
    #[arg(long)]
    delete_if_already_exists: bool,

    #[command(flatten)]
    poll: PollArgs,
}

impl FileCommand {
    pub async fn execute(self) -> Result<()> {
        match self.command {
            FileCommands::Copy(args) => args.execute().await,
        }
    }
}

impl FileCopyArgs {
    async fn execute(self) -> Result<()> {
        super::ensure_sharepoint_url(&self.web_url)?;
        let tenant = tenant_url(&self.web_url)?;

        let auth = Auth::new()?;
        let token = auth.ensure_valid_token(&tenant).await?;
        let client = SpoClient::new(token.access_token.clone());

        // Explicit source check: CreateCopyJobs accepts files, folders or
        // batches of both, so a folder passed by mistake as the source
        // would otherwise surface as a misleading error later, especially
        // combined with --delete-if-already-exists.
        client
            .file_exists(&tenant, &self.web_url, &self.source_url)
            .await?;

        if self.delete_if_already_exists {
            let filename = self
                .source_url
                .rsplit(['/', '\\'])
                .next()
                .unwrap_or(&self.source_url);
            debug!(filename = %filename, "recycling target file if it exists");
            client
                .recycle_file(&tenant, &self.target_url, filename)
                .await?;
        }

        // All preconditions met, now create the copy job. Only the latest
        // version of the file is copied.
        let source_absolute_url = url_combine(&self.web_url, &self.source_url);
        let destination_uri = url_combine(&tenant, &self.target_url);
        let job = create_copy_job(
            &client,
            &self.web_url,
            &source_absolute_url,
            &destination_uri,
            true,
            &token.access_token,
        )
        .await?;

        println!("Copy job created, waiting for it to complete...");
        CopyJobPoller::new(
            &client,
            &self.web_url,
            &token.access_token,
            job,
            self.poll.policy(),
        )
        .run()
        .await?;

        println!("Done");
        Ok(())
    }
}
