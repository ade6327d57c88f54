use anyhow::Result;
use clap::{Args, Subcommand};
use tracing::debug;

use crate::auth::Auth;
use crate::client_svc::{ClientSvc, PermissionKind};
use crate::spo_client::{SpoClient, format_relative_url, tenant_url};

#[derive(Debug, Args)]
pub struct PropertybagCommand {
    #[command(subcommand)]
    command: PropertybagCommands,
}

#[derive(Debug, Subcommand)]
enum PropertybagCommands {
    /// Set a property bag value on a web or folder
    Set(PropertybagSetArgs),
}

#[derive(Debug, Args)]
struct PropertybagSetArgs {
    /// The URL of the site on which to set the property
    #[arg(short = 'u', long)]
    web_url: String,

    /// Key of the property to set
    #[arg(short, long)]
    key: String,

    /// Value to set
    #[arg(short, long)]
    value: String,

    /// Site-relative URL of the folder whose property bag to modify.
    /// When omitted, the web's own property bag is modified.
    #[arg(short, long)]
    folder: Option<String>,
}

impl PropertybagCommand {
    pub async fn execute(self) -> Result<()> {
        match self.command {
            PropertybagCommands::Set(args) => args.execute().await,
        }
    }
}

impl PropertybagSetArgs {
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

        // NoScript sites reject property bag writes server-side with an
        // opaque access-denied error, so detect the restriction up front
        let permissions = svc.effective_base_permissions(&web_identity).await?;
        if !permissions.has(PermissionKind::AddAndCustomizePages) {
            anyhow::bail!(
                "Site has NoScript enabled, and setting property bag values is not supported"
            );
        }

        let identity = match &self.folder {
            Some(folder) => {
                let folder_identity = svc
                    .resolve_folder_identity(&web_identity, &format_relative_url(folder))
                    .await?;
                debug!(handle = %folder_identity.handle, "resolved folder identity");
                folder_identity
            }
            None => web_identity,
        };

        svc.set_property(&identity, &self.key, &self.value).await?;

        println!("Done");
        Ok(())
    }
}
