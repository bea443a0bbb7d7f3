//! The bulk-mail transport seam.
//!
//! A [`Transport`] accepts one templated batch per call and answers with a
//! result per recipient, aligned with the request order. [`HttpTransport`]
//! speaks the JSON bulk-email API of an SES-compatible gateway.

use std::collections::BTreeMap;

use async_trait::async_trait;
use mailrun_common::outgoing;
use serde::{Deserialize, Serialize};

use crate::{error::TransportError, template::EmailTemplate};

/// Placeholder values substituted into a template.
pub type TemplateData = BTreeMap<String, String>;

/// One recipient of a bulk send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkEntry {
    pub to: String,
    /// Overrides applied on top of the request's default data.
    pub replacement_data: TemplateData,
}

/// A single templated batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkSendRequest {
    /// Rendered as `Name <address>`.
    pub sender: String,
    pub template_name: String,
    pub configuration_set: Option<String>,
    pub default_data: TemplateData,
    pub entries: Vec<BulkEntry>,
}

/// The transport's answer for one entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EntryResult {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl EntryResult {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.eq_ignore_ascii_case("SUCCESS")
    }
}

/// Result of registering a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateCreation {
    Created,
    /// A template with the same name is already registered.
    AlreadyExists,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one batch.
    ///
    /// The returned list is aligned with `request.entries`, but may be
    /// shorter than it.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when the batch as a whole could not be
    /// submitted.
    async fn send_bulk(&self, request: &BulkSendRequest) -> Result<Vec<EntryResult>, TransportError>;

    /// Register a template under its name.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] for any failure other than the name
    /// already being taken.
    async fn create_template(
        &self,
        template: &EmailTemplate,
    ) -> Result<TemplateCreation, TransportError>;
}

/// Connection settings for [`HttpTransport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Base URL of the bulk-email API, e.g. `https://mail-gateway.example.com`.
    ///
    /// Required for live sends and template creation.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Per-request timeout in seconds.
    ///
    /// Default: 30
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

const fn default_timeout_secs() -> u64 {
    30
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct WireBulkRequest<'a> {
    from_email_address: &'a str,
    default_content: WireDefaultContent<'a>,
    bulk_email_entries: Vec<WireEntry<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    configuration_set_name: Option<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct WireDefaultContent<'a> {
    template: WireTemplate<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct WireTemplate<'a> {
    template_name: &'a str,
    template_data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct WireEntry<'a> {
    destination: WireDestination<'a>,
    replacement_email_content: WireReplacement,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct WireDestination<'a> {
    to_addresses: [&'a str; 1],
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct WireReplacement {
    replacement_template: WireReplacementTemplate,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct WireReplacementTemplate {
    replacement_template_data: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireBulkResponse {
    #[serde(default)]
    bulk_email_entry_results: Vec<EntryResult>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct WireCreateTemplate<'a> {
    template_name: &'a str,
    template_content: WireTemplateContent<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct WireTemplateContent<'a> {
    subject: &'a str,
    text: &'a str,
    html: &'a str,
}

impl<'a> WireBulkRequest<'a> {
    fn from_request(request: &'a BulkSendRequest) -> Result<Self, TransportError> {
        let entries = request
            .entries
            .iter()
            .map(|entry| -> Result<WireEntry<'a>, TransportError> {
                Ok(WireEntry {
                    destination: WireDestination {
                        to_addresses: [entry.to.as_str()],
                    },
                    replacement_email_content: WireReplacement {
                        replacement_template: WireReplacementTemplate {
                            replacement_template_data: serde_json::to_string(
                                &entry.replacement_data,
                            )?,
                        },
                    },
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            from_email_address: &request.sender,
            default_content: WireDefaultContent {
                template: WireTemplate {
                    template_name: &request.template_name,
                    template_data: serde_json::to_string(&request.default_data)?,
                },
            },
            bulk_email_entries: entries,
            configuration_set_name: request.configuration_set.as_deref(),
        })
    }
}

/// [`Transport`] over an SES-style JSON API with bearer authentication.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpTransport {
    #[must_use]
    pub fn new(client: reqwest::Client, endpoint: &str, api_key: Option<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let request = self.client.post(format!("{}{path}", self.endpoint));
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}

async fn error_for_status(response: reqwest::Response) -> Result<reqwest::Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    if status.is_client_error() && status.as_u16() != 429 {
        return Err(TransportError::Rejected(format!("HTTP {}: {body}", status.as_u16())));
    }

    Err(TransportError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send_bulk(&self, request: &BulkSendRequest) -> Result<Vec<EntryResult>, TransportError> {
        let body = WireBulkRequest::from_request(request)?;

        outgoing!(
            level = DEBUG,
            "POST {}/v2/email/outbound-bulk-emails ({} entries)",
            self.endpoint,
            request.entries.len()
        );

        let response = self
            .post("/v2/email/outbound-bulk-emails")
            .json(&body)
            .send()
            .await?;

        let response = error_for_status(response)
            .await?
            .json::<WireBulkResponse>()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))?;

        Ok(response.bulk_email_entry_results)
    }

    async fn create_template(
        &self,
        template: &EmailTemplate,
    ) -> Result<TemplateCreation, TransportError> {
        outgoing!(level = DEBUG, "POST {}/v2/email/templates ({})", self.endpoint, template.name);

        let response = self
            .post("/v2/email/templates")
            .json(&WireCreateTemplate {
                template_name: &template.name,
                template_content: WireTemplateContent {
                    subject: &template.subject,
                    text: &template.text,
                    html: &template.html,
                },
            })
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::CONFLICT {
            return Ok(TemplateCreation::AlreadyExists);
        }

        error_for_status(response).await?;
        Ok(TemplateCreation::Created)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn request() -> BulkSendRequest {
        BulkSendRequest {
            sender: "Security Team <security@example.com>".to_string(),
            template_name: "notice".to_string(),
            configuration_set: None,
            default_data: [("name".to_string(), "customer".to_string())]
                .into_iter()
                .collect(),
            entries: vec![BulkEntry {
                to: "ana@example.com".to_string(),
                replacement_data: [
                    ("name".to_string(), "Ana".to_string()),
                    ("site_link".to_string(), "https://example.com".to_string()),
                ]
                .into_iter()
                .collect(),
            }],
        }
    }

    #[test]
    fn test_wire_request_shape() {
        let request = request();
        let wire = WireBulkRequest::from_request(&request).unwrap();
        let json = serde_json::to_value(&wire).unwrap();

        assert_eq!(
            json,
            serde_json::json!({
                "FromEmailAddress": "Security Team <security@example.com>",
                "DefaultContent": {
                    "Template": {
                        "TemplateName": "notice",
                        "TemplateData": "{\"name\":\"customer\"}"
                    }
                },
                "BulkEmailEntries": [{
                    "Destination": { "ToAddresses": ["ana@example.com"] },
                    "ReplacementEmailContent": {
                        "ReplacementTemplate": {
                            "ReplacementTemplateData":
                                "{\"name\":\"Ana\",\"site_link\":\"https://example.com\"}"
                        }
                    }
                }]
            })
        );
    }

    #[test]
    fn test_wire_request_configuration_set() {
        let mut request = request();
        request.configuration_set = Some("tracking".to_string());

        let json = serde_json::to_value(WireBulkRequest::from_request(&request).unwrap()).unwrap();
        assert_eq!(json["ConfigurationSetName"], "tracking");
    }

    #[test]
    fn test_wire_response() {
        let response: WireBulkResponse = serde_json::from_str(
            r#"{"BulkEmailEntryResults":[
                {"Status":"SUCCESS","MessageId":"0100-abc"},
                {"Status":"MESSAGE_REJECTED","Error":"Address blacklisted"}
            ]}"#,
        )
        .unwrap();

        let results = response.bulk_email_entry_results;
        assert_eq!(results.len(), 2);
        assert!(results[0].is_success());
        assert_eq!(results[0].message_id.as_deref(), Some("0100-abc"));
        assert!(!results[1].is_success());
        assert_eq!(results[1].error.as_deref(), Some("Address blacklisted"));
    }

    #[test]
    fn test_missing_results_field_is_empty() {
        let response: WireBulkResponse = serde_json::from_str("{}").unwrap();
        assert!(response.bulk_email_entry_results.is_empty());
    }

    #[test]
    fn test_endpoint_trailing_slash() {
        let transport = HttpTransport::new(reqwest::Client::new(), "https://gw.example.com/", None);
        assert_eq!(transport.endpoint, "https://gw.example.com");
    }
}
