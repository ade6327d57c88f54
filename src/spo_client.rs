use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::SpoError;

/// Accept header value used by all SharePoint REST calls
pub const ODATA_NOMETADATA: &str = "application/json;odata=nometadata";

/// Response from the /_api/contextinfo endpoint
#[derive(Debug, Deserialize)]
pub struct ContextInfo {
    #[serde(rename = "FormDigestValue")]
    pub form_digest_value: String,
    #[serde(rename = "WebFullUrl")]
    pub web_full_url: String,
}

/// Minimal HTTP capability consumed by the copy job poller and the
/// ClientSvc resolvers. A rejected request (network failure or non-2xx
/// status) surfaces as `SpoError::Transport`; everything else is the
/// response body text.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: String,
    ) -> Result<String, SpoError>;

    async fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<String, SpoError>;
}

/// Client for SharePoint Online REST and ClientSvc endpoints
pub struct SpoClient {
    client: reqwest::Client,
    access_token: String,
}

impl SpoClient {
    /// Create a new SharePoint client with the given access token
    pub fn new(access_token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            access_token,
        }
    }

    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token)
    }

    /// Get a request digest (anti-forgery token) for the given site.
    /// ClientSvc mutations and some REST writes require it as the
    /// X-RequestDigest header.
    pub async fn get_request_digest(&self, site_url: &str) -> Result<ContextInfo, SpoError> {
        let url = format!("{}/_api/contextinfo", site_url);
        debug!(url = %url, "requesting context info");

        let bearer = self.bearer();
        let text = self
            .post(
                &url,
                &[
                    ("Authorization", bearer.as_str()),
                    ("Accept", ODATA_NOMETADATA),
                ],
                String::new(),
            )
            .await?;

        serde_json::from_str(&text)
            .map_err(|e| SpoError::Protocol(format!("Failed to parse context info response: {}", e)))
    }

    /// Check that a file exists at the given site-relative url.
    ///
    /// Called before creating a copy job: the CreateCopyJobs endpoint
    /// accepts files, folders or batches of both, so a folder passed as
    /// the source by mistake would otherwise produce a misleading error
    /// later, especially combined with delete-if-already-exists.
    pub async fn file_exists(
        &self,
        tenant_url: &str,
        web_url: &str,
        source_url: &str,
    ) -> Result<(), SpoError> {
        let web_server_relative_url = web_url.replacen(tenant_url, "", 1);
        let file_server_relative_url = format!("{}{}", web_server_relative_url, source_url);

        let url = format!(
            "{}/_api/web/GetFileByServerRelativeUrl('{}')/",
            web_url,
            urlencoding::encode(&file_server_relative_url)
        );
        debug!(url = %url, "checking source file exists");

        let bearer = self.bearer();
        self.get(
            &url,
            &[
                ("Authorization", bearer.as_str()),
                ("Accept", ODATA_NOMETADATA),
            ],
        )
        .await?;

        Ok(())
    }

    /// Move a file at the target location into the site recycle bin.
    /// A 404 means there is nothing to recycle and is not an error.
    ///
    /// The target site's WebFullUrl is unknown up front, so it is taken
    /// from the contextinfo response for the target folder's absolute url
    /// (same approach as Microsoft.SharePoint.Client.Web.WebUrlFromFolderUrlDirect).
    pub async fn recycle_file(
        &self,
        tenant_url: &str,
        target_url: &str,
        filename: &str,
    ) -> Result<(), SpoError> {
        let target_folder_absolute_url = url_combine(tenant_url, target_url);
        let context = self.get_request_digest(&target_folder_absolute_url).await?;
        debug!(web_full_url = %context.web_full_url, "resolved target web");

        let mut target = target_url.to_string();
        if !target.starts_with('/') {
            target = format!("/{}", target);
        }
        if !target.ends_with('/') {
            target.push('/');
        }

        let url = format!(
            "{}/_api/web/GetFileByServerRelativeUrl('{}')/recycle()",
            context.web_full_url,
            urlencoding::encode(&format!("{}{}", target, filename))
        );
        debug!(url = %url, "recycling existing target file");

        let response = self
            .client
            .post(&url)
            .header("Authorization", self.bearer())
            .header("X-HTTP-Method", "DELETE")
            .header("If-Match", "*")
            .header("Accept", ODATA_NOMETADATA)
            .send()
            .await
            .map_err(|e| SpoError::Transport(format!("Request to {} failed: {}", url, e)))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            // file does not exist so the copy can proceed
            return Ok(());
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SpoError::Transport(format!(
                "Request to recycle file failed (HTTP {}): {}",
                status, body
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl Transport for SpoClient {
    async fn post(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: String,
    ) -> Result<String, SpoError> {
        let mut request = self.client.post(url);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }

        let response = request
            .body(body)
            .send()
            .await
            .map_err(|e| SpoError::Transport(format!("Request to {} failed: {}", url, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SpoError::Transport(format!(
                "Request to {} failed (HTTP {}): {}",
                url, status, body
            )));
        }

        response
            .text()
            .await
            .map_err(|e| SpoError::Transport(format!("Failed to read response from {}: {}", url, e)))
    }

    async fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<String, SpoError> {
        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SpoError::Transport(format!("Request to {} failed: {}", url, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SpoError::Transport(format!(
                "Request to {} failed (HTTP {}): {}",
                url, status, body
            )));
        }

        response
            .text()
            .await
            .map_err(|e| SpoError::Transport(format!("Failed to read response from {}: {}", url, e)))
    }
}

/// Combine a base url and a relative url with exactly one slash between
/// them, eg. `https://contoso.com` + `/sites/abc/` -> `https://contoso.com/sites/abc`
pub fn url_combine(base_url: &str, relative_url: &str) -> String {
    let base = base_url.strip_suffix('/').unwrap_or(base_url);
    let relative = relative_url.strip_prefix('/').unwrap_or(relative_url);
    let relative = relative.strip_suffix('/').unwrap_or(relative);
    format!("{}/{}", base, relative)
}

/// Normalize a site-relative url to have a leading slash and no trailing slash
pub fn format_relative_url(relative_url: &str) -> String {
    let mut formatted = if relative_url.starts_with('/') {
        relative_url.to_string()
    } else {
        format!("/{}", relative_url)
    };

    if formatted.len() > 1 && formatted.ends_with('/') {
        formatted.pop();
    }

    formatted
}

/// Extract the tenant url (scheme + host) from a web url
pub fn tenant_url(web_url: &str) -> Result<String, SpoError> {
    let parsed = reqwest::Url::parse(web_url)
        .map_err(|e| SpoError::Protocol(format!("Invalid web url {}: {}", web_url, e)))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| SpoError::Protocol(format!("Web url {} has no host", web_url)))?;
    Ok(format!("{}://{}", parsed.scheme(), host))
}
