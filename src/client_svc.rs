use serde_json::Value;
use tracing::debug;

use crate::error::SpoError;
use crate::spo_client::Transport;

const APPLICATION_NAME: &str = "spoctl";

/// Server object identity resolved over ClientSvc.
///
/// The handle looks like `<GUID>|<GUID>:site:<GUID>:web:<GUID>` (with a
/// trailing `:folder:<GUID>` for folders). It is an opaque token: the
/// server requires it verbatim in subsequent request bodies and the
/// client never parses or reconstructs it.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectIdentity {
    pub handle: String,
    pub server_relative_url: String,
}

/// High/Low bitmask pair of a web's effective base permissions
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BasePermissions {
    pub high: u32,
    pub low: u32,
}

/// SP.PermissionKind values used by the commands
#[derive(Debug, Clone, Copy)]
#[allow(dead_code)]
pub enum PermissionKind {
    ViewPages = 18,
    AddAndCustomizePages = 19,
    ManageWeb = 31,
}

impl BasePermissions {
    /// Test a single permission bit. Kinds 1..=32 live in the low word,
    /// 33..=64 in the high word.
    pub fn has(&self, kind: PermissionKind) -> bool {
        let bit = kind as u32 - 1;
        if bit < 32 {
            self.low & (1 << bit) != 0
        } else {
            self.high & (1 << (bit - 32)) != 0
        }
    }
}

/// Response to a ProcessQuery request: an ordered sequence of
/// heterogeneous JSON records. The first record carries correlation
/// metadata; the rest share no structure, so consumers scan for the
/// record containing the field they need rather than indexing by
/// position.
#[derive(Debug)]
pub struct ClientSvcEnvelope {
    records: Vec<Value>,
}

impl ClientSvcEnvelope {
    pub fn parse(raw: &str) -> Result<Self, SpoError> {
        let records: Vec<Value> = serde_json::from_str(raw).map_err(|e| {
            SpoError::Protocol(format!("Failed to parse ClientSvc response: {}", e))
        })?;
        Ok(Self { records })
    }

    /// First non-null ErrorInfo value in any record. If one exists the
    /// whole envelope represents a failed operation and no other
    /// record's data can be trusted.
    pub fn find_error_info(&self) -> Option<&Value> {
        self.records
            .iter()
            .filter_map(|record| record.get("ErrorInfo"))
            .find(|info| !info.is_null())
    }

    /// First record containing the given field
    pub fn find_first_with_field(&self, field: &str) -> Option<&Value> {
        self.records.iter().find(|record| record.get(field).is_some())
    }

    /// Fail with the server-reported error if the envelope contains one.
    /// The server can report an error with no message text, in which
    /// case the message is the literal "ClientSvc unknown error".
    pub fn expect_no_error(&self) -> Result<(), SpoError> {
        if let Some(info) = self.find_error_info() {
            let message = info
                .get("ErrorMessage")
                .and_then(Value::as_str)
                .unwrap_or("");
            let message = if message.is_empty() {
                "ClientSvc unknown error"
            } else {
                message
            };
            return Err(SpoError::ClientSvc(message.to_string()));
        }
        Ok(())
    }

    /// Extract the first record with the given field, checking for an
    /// embedded error first. A missing field with no error means the
    /// server and client disagree on the protocol; not supposed to happen.
    fn require_field(&self, field: &str, not_found: &str) -> Result<&Value, SpoError> {
        self.expect_no_error()?;
        self.find_first_with_field(field)
            .ok_or_else(|| SpoError::Protocol(not_found.to_string()))
    }
}

/// Client for the `_vti_bin/client.svc/ProcessQuery` endpoint
pub struct ClientSvc<'a> {
    transport: &'a dyn Transport,
    web_url: String,
    access_token: String,
    form_digest_value: String,
}

impl<'a> ClientSvc<'a> {
    pub fn new(
        transport: &'a dyn Transport,
        web_url: &str,
        access_token: &str,
        form_digest_value: &str,
    ) -> Self {
        Self {
            transport,
            web_url: web_url.to_string(),
            access_token: access_token.to_string(),
            form_digest_value: form_digest_value.to_string(),
        }
    }

    /// Send one ProcessQuery request and decode the response envelope
    pub async fn process_query(&self, body: String) -> Result<ClientSvcEnvelope, SpoError> {
        let url = format!("{}/_vti_bin/client.svc/ProcessQuery", self.web_url);
        debug!(url = %url, body = %body, "ProcessQuery request");

        let bearer = format!("Bearer {}", self.access_token);
        let text = self
            .transport
            .post(
                &url,
                &[
                    ("Authorization", bearer.as_str()),
                    ("X-RequestDigest", self.form_digest_value.as_str()),
                ],
                body,
            )
            .await?;
        debug!(response = %text, "ProcessQuery response");

        ClientSvcEnvelope::parse(&text)
    }

    /// Resolve the object identity of the current web.
    ///
    /// This request has to be sent before any property bag or folder
    /// request can be constructed: both chain off the returned handle.
    pub async fn resolve_web_identity(&self) -> Result<ObjectIdentity, SpoError> {
        let envelope = self.process_query(web_identity_request_body()).await?;

        let record = envelope.require_field(
            "_ObjectIdentity_",
            "Cannot proceed. _ObjectIdentity_ not found",
        )?;

        Ok(ObjectIdentity {
            handle: record["_ObjectIdentity_"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
            server_relative_url: record["ServerRelativeUrl"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
        })
    }

    /// Resolve a folder's object identity by chaining
    /// GetFolderByServerRelativeUrl off a previously resolved web identity.
    ///
    /// The returned server-relative url is the one computed client-side,
    /// not echoed from the server, so a later move target path can be
    /// reconstructed from it exactly.
    pub async fn resolve_folder_identity(
        &self,
        web_identity: &ObjectIdentity,
        folder_url: &str,
    ) -> Result<ObjectIdentity, SpoError> {
        let server_relative_url =
            folder_server_relative_url(&web_identity.server_relative_url, folder_url);

        let envelope = self
            .process_query(folder_identity_request_body(
                &web_identity.handle,
                &server_relative_url,
            ))
            .await?;

        let record = envelope.require_field(
            "_ObjectIdentity_",
            "Cannot proceed. Folder _ObjectIdentity_ not found",
        )?;

        Ok(ObjectIdentity {
            handle: record["_ObjectIdentity_"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
            server_relative_url,
        })
    }

    /// Query the EffectiveBasePermissions scalar for a web identity.
    /// Commands use the bitmask to detect NoScript sites before
    /// attempting a mutation the server would reject.
    pub async fn effective_base_permissions(
        &self,
        web_identity: &ObjectIdentity,
    ) -> Result<BasePermissions, SpoError> {
        let envelope = self
            .process_query(permissions_request_body(&web_identity.handle))
            .await?;

        let record = envelope.require_field(
            "EffectiveBasePermissions",
            "Cannot proceed. EffectiveBasePermissions not found",
        )?;

        let permissions = &record["EffectiveBasePermissions"];
        Ok(BasePermissions {
            high: mask_word(&permissions["High"]),
            low: mask_word(&permissions["Low"]),
        })
    }

    /// Move (rename) a folder to a new server-relative url
    pub async fn move_folder(
        &self,
        folder_identity: &ObjectIdentity,
        target_server_relative_url: &str,
    ) -> Result<(), SpoError> {
        let envelope = self
            .process_query(move_folder_request_body(
                &folder_identity.handle,
                target_server_relative_url,
            ))
            .await?;
        envelope.expect_no_error()
    }

    /// Set one property bag value on a web or folder identity
    pub async fn set_property(
        &self,
        identity: &ObjectIdentity,
        key: &str,
        value: &str,
    ) -> Result<(), SpoError> {
        let envelope = self
            .process_query(set_property_request_body(&identity.handle, key, value))
            .await?;
        envelope.expect_no_error()
    }
}

/// Full server-relative path of a folder under a web. A root web ("/")
/// contributes nothing; any other web path is prefixed as-is, so the
/// caller is responsible for consistent leading slashes.
pub fn folder_server_relative_url(web_server_relative_url: &str, folder_url: &str) -> String {
    if web_server_relative_url == "/" {
        folder_url.to_string()
    } else {
        format!("{}{}", web_server_relative_url, folder_url)
    }
}

fn request_envelope(actions: &str, object_paths: &str) -> String {
    format!(
        r#"<Request AddExpandoFieldTypeSuffix="true" SchemaVersion="15.0.0.0" LibraryVersion="16.0.0.0" ApplicationName="{}" xmlns="http://schemas.microsoft.com/sharepoint/clientquery/2009"><Actions>{}</Actions><ObjectPaths>{}</ObjectPaths></Request>"#,
        APPLICATION_NAME, actions, object_paths
    )
}

fn web_identity_request_body() -> String {
    request_envelope(
        r#"<Query Id="1" ObjectPathId="5"><Query SelectAllProperties="false"><Properties><Property Name="ServerRelativeUrl" ScalarProperty="true" /></Properties></Query></Query>"#,
        r#"<Property Id="5" ParentId="3" Name="Web" /><StaticProperty Id="3" TypeId="{3747adcd-a3c3-41b9-bfab-4a64dd2f1e0a}" Name="Current" />"#,
    )
}

fn folder_identity_request_body(web_handle: &str, server_relative_url: &str) -> String {
    request_envelope(
        r#"<ObjectPath Id="10" ObjectPathId="9" /><ObjectIdentityQuery Id="11" ObjectPathId="9" /><Query Id="12" ObjectPathId="9"><Query SelectAllProperties="false"><Properties><Property Name="Properties" SelectAll="true"><Query SelectAllProperties="false"><Properties /></Query></Property></Properties></Query></Query>"#,
        &format!(
            r#"<Method Id="9" ParentId="5" Name="GetFolderByServerRelativeUrl"><Parameters><Parameter Type="String">{}</Parameter></Parameters></Method><Identity Id="5" Name="{}" />"#,
            xml_escape(server_relative_url),
            web_handle
        ),
    )
}

fn permissions_request_body(web_handle: &str) -> String {
    request_envelope(
        r#"<Query Id="11" ObjectPathId="5"><Query SelectAllProperties="false"><Properties><Property Name="EffectiveBasePermissions" ScalarProperty="true" /></Properties></Query></Query>"#,
        &format!(r#"<Identity Id="5" Name="{}" />"#, web_handle),
    )
}

fn move_folder_request_body(folder_handle: &str, target_server_relative_url: &str) -> String {
    request_envelope(
        &format!(
            r#"<Method Name="MoveTo" Id="32" ObjectPathId="26"><Parameters><Parameter Type="String">{}</Parameter></Parameters></Method>"#,
            xml_escape(target_server_relative_url)
        ),
        &format!(r#"<Identity Id="26" Name="{}" />"#, folder_handle),
    )
}

fn set_property_request_body(handle: &str, key: &str, value: &str) -> String {
    request_envelope(
        &format!(
            r#"<Method Name="SetFieldValue" Id="206" ObjectPathId="205"><Parameters><Parameter Type="String">{}</Parameter><Parameter Type="String">{}</Parameter></Parameters></Method><Method Name="Update" Id="207" ObjectPathId="198" />"#,
            xml_escape(key),
            xml_escape(value)
        ),
        &format!(
            r#"<Property Id="205" ParentId="198" Name="Properties" /><Identity Id="198" Name="{}" />"#,
            handle
        ),
    )
}

/// CSOM returns Int64 mask words either as numbers or as decimal strings
fn mask_word(value: &Value) -> u32 {
    match value {
        Value::Number(n) => n.as_u64().unwrap_or(0) as u32,
        Value::String(s) => s.parse::<u64>().unwrap_or(0) as u32,
        _ => 0,
    }
}

fn xml_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const WEB_HANDLE: &str =
        "e928ccad-f9fe-4b61-82e9-4a342cb71d32|740c6a0b-85e2-48a0-a494-e0f1759d4aa7:site:f3806c23-0c9f-42d3-bc7d-3895acc06d73:web:5a39e548-b3d7-4090-9cb9-0ce7cd85d275";

    fn envelope_from(records: Vec<Value>) -> ClientSvcEnvelope {
        ClientSvcEnvelope::parse(&serde_json::to_string(&records).unwrap()).unwrap()
    }

    #[test]
    fn error_takes_precedence_over_success_fields() {
        let envelope = envelope_from(vec![
            json!({"SchemaVersion": "15.0.0.0", "ErrorInfo": null}),
            json!({"ErrorInfo": {"ErrorMessage": "File Not Found.", "ErrorCode": -2147024894}}),
            json!({"_ObjectIdentity_": WEB_HANDLE, "ServerRelativeUrl": "/sites/abc"}),
        ]);

        let err = envelope
            .require_field("_ObjectIdentity_", "Cannot proceed. _ObjectIdentity_ not found")
            .unwrap_err();
        match err {
            SpoError::ClientSvc(message) => assert_eq!(message, "File Not Found."),
            other => panic!("expected ClientSvc error, got {:?}", other),
        }
    }

    #[test]
    fn empty_error_message_falls_back_to_unknown_error() {
        let envelope = envelope_from(vec![json!({"ErrorInfo": {"ErrorMessage": ""}})]);

        let err = envelope.expect_no_error().unwrap_err();
        match err {
            SpoError::ClientSvc(message) => assert_eq!(message, "ClientSvc unknown error"),
            other => panic!("expected ClientSvc error, got {:?}", other),
        }
    }

    #[test]
    fn null_error_info_is_not_an_error() {
        let envelope = envelope_from(vec![
            json!({"SchemaVersion": "15.0.0.0", "ErrorInfo": null}),
            json!({"_ObjectIdentity_": WEB_HANDLE, "ServerRelativeUrl": "/"}),
        ]);

        assert!(envelope.expect_no_error().is_ok());
        let record = envelope.find_first_with_field("_ObjectIdentity_").unwrap();
        assert_eq!(record["_ObjectIdentity_"], WEB_HANDLE);
    }

    #[test]
    fn missing_field_without_error_is_a_protocol_error() {
        let envelope = envelope_from(vec![json!({"SchemaVersion": "15.0.0.0", "ErrorInfo": null})]);

        let err = envelope
            .require_field("_ObjectIdentity_", "Cannot proceed. _ObjectIdentity_ not found")
            .unwrap_err();
        match err {
            SpoError::Protocol(message) => {
                assert_eq!(message, "Cannot proceed. _ObjectIdentity_ not found");
            }
            other => panic!("expected Protocol error, got {:?}", other),
        }
    }

    #[test]
    fn folder_path_under_root_web() {
        assert_eq!(
            folder_server_relative_url("/", "/Shared Documents"),
            "/Shared Documents"
        );
    }

    #[test]
    fn folder_path_under_site_web() {
        assert_eq!(
            folder_server_relative_url("/sites/abc", "/Shared Documents"),
            "/sites/abc/Shared Documents"
        );
    }

    #[test]
    fn identity_handle_passes_through_verbatim() {
        let body = folder_identity_request_body(WEB_HANDLE, "/sites/abc/Shared Documents");
        assert!(body.contains(&format!(r#"<Identity Id="5" Name="{}" />"#, WEB_HANDLE)));

        let folder_handle = format!("{}:folder:fbf2cd0e-9df3-4b45-b27e-c681d44281dc", WEB_HANDLE);
        let body = move_folder_request_body(&folder_handle, "/sites/abc/Renamed");
        assert!(body.contains(&format!(r#"<Identity Id="26" Name="{}" />"#, folder_handle)));
    }

    #[test]
    fn permission_bits_split_across_words() {
        // AddAndCustomizePages is kind 19, bit 18 of the low word
        let permissions = BasePermissions {
            high: 0,
            low: 1 << 18,
        };
        assert!(permissions.has(PermissionKind::AddAndCustomizePages));
        assert!(!permissions.has(PermissionKind::ViewPages));

        let noscript = BasePermissions {
            high: u32::MAX,
            low: u32::MAX & !(1 << 18),
        };
        assert!(!noscript.has(PermissionKind::AddAndCustomizePages));
        assert!(noscript.has(PermissionKind::ManageWeb));
    }

    #[test]
    fn mask_words_accept_numbers_and_strings() {
        assert_eq!(mask_word(&json!(2147483647u32)), 2147483647);
        assert_eq!(mask_word(&json!("4294705151")), 4294705151u64 as u32);
        assert_eq!(mask_word(&json!(null)), 0);
    }

    #[test]
    fn folder_path_is_escaped_in_request_body() {
        let body = folder_identity_request_body(WEB_HANDLE, "/sites/abc/R&D");
        assert!(body.contains("<Parameter Type=\"String\">/sites/abc/R&amp;D</Parameter>"));
    }
}
