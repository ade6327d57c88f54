use anyhow::Result;
use clap::{Args, Subcommand};
use tracing::debug;

use super::PollArgs;
use crate::auth::Auth;
use crate::client_svc::ClientSvc;
use crate::copy_job::{CopyJobPoller, create_copy_job};
use crate::spo_client::{SpoClient, format_relative_url, tenant_url, url_combine};

#[derive(Debug, Args)]
pub struct FolderCommand {
    #[command(subcommand)]
    command: FolderCommands,
}

#[derive(Debug, Subcommand)]
enum FolderCommands {
    /// Copy a folder to another location
    Copy(FolderCopyArgs),

    /// Rename a folder
    Rename(FolderRenameArgs),
}

#[derive(Debug, Args)]
struct FolderCopyArgs {
    /// The URL of the site where the folder is located
    #[arg(short = 'u', long)]
    web_url: String,

    /// Site-relative URL of the folder to copy
    #[arg(short, long)]
    source_url: String,

    /// Server-relative URL where to copy the folder
    #[arg(short, long)]
    target_url: String,

    #[command(flatten)]
    poll: PollArgs,
}

#[derive(Debug, Args)]
struct FolderRenameArgs {
    /// The URL of the site where the folder is located
    #[arg(short = 'u', long)]
    web_url: String,

    /// Site-relative URL of the folder to rename
    #[arg(short, long)]
    folder_url: String,

    /// New name for the folder
    #[arg(short, long)]
    name: String,
}

impl FolderCommand {
    pub async fn execute(self) -> Result<()> {
        match self.command {
            FolderCommands::Copy(args) => args.execute().await,
            FolderCommands::Rename(args) => args.execute().await,
        }
    }
}

impl FolderCopyArgs {
    async fn execute(self) -> Result<()> {
        super::ensure_sharepoint_url(&self.web_url)?;
        let tenant = tenant_url(&self.web_url)?;

        let auth = Auth::new()?;
        let token = auth.ensure_valid_token(&tenant).await?;
        let client = SpoClient::new(token.access_token.clone());

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

impl FolderRenameArgs {
    async fn execute(self) -> Result<()> {
        super::ensure_sharepoint_url(&self.web_url)?;
        let tenant = tenant_url(&self.web_url)?;

        let auth = Auth::new()?;
        let token = auth.ensure_valid_token(&tenant).await?;
        let client = SpoClient::new(token.access_token.clone());

        let context = client.get_request_digest(&self.web_url).await?;
        let svc = ClientSvc::new(
            &client,
            &self.web_url,
            &token.access_token,
            &context.form_digest_value,
        );

        let web_identity = svc.resolve_web_identity().await?;
        debug!(handle = %web_identity.handle, "resolved web identity");

        let folder_identity = svc
            .resolve_folder_identity(&web_identity, &format_relative_url(&self.folder_url))
            .await?;
        debug!(handle = %folder_identity.handle, "resolved folder identity");

        // The move target is the folder's own parent path with the last
        // segment replaced by the new name
        let current = folder_identity
            .server_relative_url
            .trim_end_matches('/')
            .to_string();
        let parent = &current[..current.rfind('/').unwrap_or(0)];
        let renamed_server_relative_url = format!("{}/{}", parent, self.name);
        println!("{}", renamed_server_relative_url);

        svc.move_folder(&folder_identity, &renamed_server_relative_url)
            .await?;

        println!("Done");
        Ok(())
    }
}
