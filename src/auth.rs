use anyhow::Result;
use oauth2::{
    AuthUrl, ClientId, DeviceAuthorizationUrl, RedirectUrl, Scope, TokenResponse, TokenUrl,
    basic::{BasicClient, BasicTokenResponse},
    devicecode::{DeviceAuthorizationResponse, EmptyExtraDeviceAuthorizationFields},
    reqwest::async_http_client,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use time::OffsetDateTime;

// Azure App registration details for spoctl
// - multitenant
// - public client flow
const CLIENT_ID: &str = "31359c7f-bd7e-475c-86db-fdb8c937548e";

// Common Microsoft Identity Platform (Azure AD v2.0) endpoints
const MS_AUTH_URL: &str = "https://login.microsoftonline.com/common/oauth2/v2.0/authorize";
const MS_TOKEN_URL: &str = "https://login.microsoftonline.com/common/oauth2/v2.0/token";
const MS_DEVICE_AUTH_URL: &str =
    "https://login.microsoftonline.com/common/oauth2/v2.0/devicecode";

/// Cached token for one SharePoint resource (https://<tenant>.sharepoint.com).
/// Tokens are resource-scoped: a token for one tenant is useless against
/// another, so the cache records which resource it was issued for.
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenCache {
    pub resource: String,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: OffsetDateTime,
}

impl TokenCache {
    pub fn is_expired(&self) -> bool {
        OffsetDateTime::now_utc() >= self.expires_at
    }

    pub fn from_token_response(resource: &str, token: BasicTokenResponse) -> Self {
        let expires_in = token.expires_in().unwrap_or(Duration::from_secs(3600));
        let expires_at =
            OffsetDateTime::now_utc() + time::Duration::seconds(expires_in.as_secs() as i64);

        Self {
            resource: resource.to_string(),
            access_token: token.access_token().secret().clone(),
            refresh_token: token.refresh_token().unwrap().secret().clone(),
            expires_at,
        }
    }
}

pub struct Auth {
    client: BasicClient,
    token_cache_path: PathBuf,
}

impl Auth {
    pub fn new() -> Result<Self> {
        // Create OAuth2 client for Microsoft identity platform
        let client = BasicClient::new(
            ClientId::new(CLIENT_ID.to_string()),
            None, // No client secret for public client
            AuthUrl::new(MS_AUTH_URL.to_string())?,
            Some(TokenUrl::new(MS_TOKEN_URL.to_string())?),
        )
        .set_device_authorization_url(DeviceAuthorizationUrl::new(
            MS_DEVICE_AUTH_URL.to_string(),
        )?)
        .set_redirect_uri(RedirectUrl::new("http://localhost".to_string())?); // Not used with device flow

        let token_cache_path = crate::config::place_config_file("token_cache.yaml")?;

        Ok(Self {
            client,
            token_cache_path,
        })
    }

    /// Performs device code authentication flow for a SharePoint resource
    pub async fn login(&self, resource: &str) -> Result<()> {
        println!(
            "Starting authentication flow for {} (client ID: {})",
            resource, CLIENT_ID
        );

        let scopes = vec![
            "offline_access".to_string(), // Required for refresh tokens
            format!("{}/AllSites.FullControl", resource),
        ];

        // Start device code flow
        let details: DeviceAuthorizationResponse<EmptyExtraDeviceAuthorizationFields> = self
            .client
            .exchange_device_code()?
            .add_scopes(scopes.iter().map(|s| Scope::new(s.clone())))
            .request_async(async_http_client)
            .await
            .map_err(|e| anyhow::anyhow!("Device code request failed: {:?}", e))?;

        // Display user instructions
        println!("\nTo sign in, use a web browser to open:");
        println!("  {}", details.verification_uri().as_str());
        println!("\nAnd enter the code: {}", details.user_code().secret());
        println!("\nWaiting for authentication...");

        // Poll for token (the library handles polling automatically)
        let token = self
            .client
            .exchange_device_access_token(&details)
            .request_async(async_http_client, tokio::time::sleep, None)
            .await
            .map_err(|e| anyhow::anyhow!("Token exchange failed: {:?}", e))?;

        let token_cache = TokenCache::from_token_response(resource, token);
        self.save_token_cache(&token_cache)?;

        // Verify the token works by fetching a request digest for the site
        let client = crate::spo_client::SpoClient::new(token_cache.access_token.clone());
        match client.get_request_digest(resource).await {
            Ok(context) => {
                println!(
                    "Authentication successful! You are connected to {}",
                    context.web_full_url
                );
            }
            Err(_) => {
                println!("Authentication successful! Token has been saved.");
            }
        }
        Ok(())
    }

    /// Returns a valid token for the given resource, refreshing it if expired
    pub async fn ensure_valid_token(&self, resource: &str) -> Result<TokenCache> {
        let mut token_cache = self
            .load_token_cache()
            .map_err(|_| anyhow::anyhow!("Not authenticated. Run 'spoctl auth login' first."))?;

        if token_cache.resource != resource {
            anyhow::bail!(
                "Logged in to {} but this command targets {}. Run 'spoctl auth login --resource {}' first.",
                token_cache.resource,
                resource,
                resource
            );
        }

        if token_cache.is_expired() {
            // Silently refresh the token
            let token = self
                .client
                .exchange_refresh_token(&oauth2::RefreshToken::new(
                    token_cache.refresh_token.clone(),
                ))
                .request_async(async_http_client)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to refresh token: {:?}", e))?;

            token_cache = TokenCache::from_token_response(resource, token);
            self.save_token_cache(&token_cache)?;
        }

        Ok(token_cache)
    }

    /// Checks if we're authenticated and the token is valid
    pub async fn check(&self) -> Result<()> {
        let cached = self
            .load_token_cache()
            .map_err(|_| anyhow::anyhow!("Not authenticated. Run 'spoctl auth login' first."))?;
        let resource = cached.resource.clone();

        let token = self.ensure_valid_token(&resource).await?;
        let client = crate::spo_client::SpoClient::new(token.access_token);
        let context = client.get_request_digest(&resource).await?;
        println!("Authenticated to {}", context.web_full_url);
        Ok(())
    }

    /// Logs out by removing the token cache
    pub fn logout(&self) -> Result<()> {
        if self.token_cache_path.exists() {
            std::fs::remove_file(&self.token_cache_path)?;
            println!("Successfully logged out");
            Ok(())
        } else {
            println!("Not logged in");
            Ok(())
        }
    }

    /// Saves token cache to file
    fn save_token_cache(&self, token_cache: &TokenCache) -> Result<()> {
        let yaml = serde_yaml::to_string(token_cache)?;
        std::fs::write(&self.token_cache_path, yaml)?;
        Ok(())
    }

    /// Loads token cache from file
    fn load_token_cache(&self) -> Result<TokenCache> {
        let yaml = std::fs::read_to_string(&self.token_cache_path)?;
        let token_cache: TokenCache = serde_yaml::from_str(&yaml)?;
        Ok(token_cache)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_cache_expiry() {
        let expired = TokenCache {
            resource: "https://contoso.sharepoint.com".to_string(),
            access_token: "ABC".to_string(),
            refresh_token: "DEF".to_string(),
            expires_at: OffsetDateTime::now_utc() - time::Duration::minutes(1),
        };
        assert!(expired.is_expired());

        let valid = TokenCache {
            expires_at: OffsetDateTime::now_utc() + time::Duration::minutes(30),
            ..expired
        };
        assert!(!valid.is_expired());
    }
}
