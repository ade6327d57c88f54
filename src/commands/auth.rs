use crate::auth::Auth;
use anyhow::Result;
use clap::{Args, Subcommand};

#[derive(Debug, Args)]
pub struct AuthCommand {
    #[command(subcommand)]
    command: AuthCommands,
}

#[derive(Debug, Subcommand)]
enum AuthCommands {
    /// Login to a SharePoint Online tenant
    Login {
        /// Resource to authenticate against, eg. https://contoso.sharepoint.com
        #[arg(short, long)]
        resource: String,
    },

    /// Logout and remove saved credentials
    Logout,

    /// Check authentication status
    Status,
}

impl AuthCommand {
    pub async fn execute(self) -> Result<()> {
        let auth = Auth::new()?;

        match self.command {
            AuthCommands::Login { resource } => {
                super::ensure_sharepoint_url(&resource)?;
                auth.login(resource.trim_end_matches('/')).await
            }
            AuthCommands::Logout => auth.logout(),
            AuthCommands::Status => auth.check().await,
        }
    }
}
