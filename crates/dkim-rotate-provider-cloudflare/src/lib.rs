// # Cloudflare DNS Provider
//
// Publishes and retires DKIM TXT records through the Cloudflare API v4.
//
// ## Configuration
//
// ```yaml
// # providers file
// cloudflare:
//   type: cloudflare
//   api_token: "<token with Zone:DNS:Edit>"
//
// # domains file
// example.com:
//   key: rsakey
//   provider: cloudflare
//   parameters:
//     zone_id: 023e105f4ecef8ad9ca31a8372d0c353
//     ttl: 300        # optional, 1 = automatic
// ```
//
// ## Behavior
//
// - One HTTP request per provider call. Retries, timeouts around the whole
//   call and the decision to publish are owned by `RotationEngine`.
// - `add` returns `{"record_id": "<id>"}` as continuation data so that
//   `delete` can remove exactly that record once it expires.
// - The API token never appears in logs or `Debug` output.
//
// ## API Reference
//
// - Create DNS Record: POST `/zones/:zone_id/dns_records`
// - List DNS Records: GET `/zones/:zone_id/dns_records?type=TXT&name=...`
// - Delete DNS Record: DELETE `/zones/:zone_id/dns_records/:record_id`

use async_trait::async_trait;
use dkim_rotate_core::config::ProviderConfig;
use dkim_rotate_core::state::LedgerEntry;
use dkim_rotate_core::traits::{
    DeleteOutcome, DnsProvider, DnsProviderFactory, DomainParameters, PublishedRecord,
    RecordRequest,
};
use dkim_rotate_core::verify::{join_segments, parse_tags, tags_match};
use dkim_rotate_core::{Error, ProviderRegistry, Result};
use serde::Deserialize;
use std::time::Duration;

/// Cloudflare API base URL
const CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// Default HTTP timeout for API requests (30 seconds)
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// TTL value Cloudflare treats as "automatic"
const AUTOMATIC_TTL: u32 = 1;

const PROVIDER: &str = "cloudflare";

/// Response envelope shared by every API v4 endpoint
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct DnsRecord {
    id: String,
    #[serde(default)]
    content: String,
}

impl<T> Envelope<T> {
    fn into_result(self, context: &str) -> Result<T> {
        if !self.success {
            let messages: Vec<String> = self
                .errors
                .iter()
                .map(|e| format!("{} ({})", e.message, e.code))
                .collect();
            return Err(Error::provider(
                PROVIDER,
                format!("{} rejected: {}", context, messages.join("; ")),
            ));
        }
        self.result.ok_or_else(|| {
            Error::provider(PROVIDER, format!("{}: response has no result", context))
        })
    }
}

/// Cloudflare DNS provider
///
/// # Security
///
/// The Debug implementation does NOT expose the API token.
pub struct CloudflareProvider {
    /// Cloudflare API token
    /// ⚠️ NEVER log this value
    api_token: String,

    /// HTTP client for API requests
    client: reqwest::Client,

    api_base: String,
}

// Custom Debug implementation that hides the API token
impl std::fmt::Debug for CloudflareProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudflareProvider")
            .field("api_token", &"<REDACTED>")
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl CloudflareProvider {
    /// Create a new Cloudflare provider
    ///
    /// # Parameters
    ///
    /// - `api_token`: Cloudflare API token with Zone:DNS:Edit permissions
    ///
    /// # Errors
    ///
    /// Fails if the token is empty or the HTTP client cannot be built.
    pub fn new(api_token: impl Into<String>) -> Result<Self> {
        let api_token = api_token.into();
        if api_token.is_empty() {
            return Err(Error::config("Cloudflare API token cannot be empty"));
        }

        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::http(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            api_token,
            client,
            api_base: CLOUDFLARE_API_BASE.to_string(),
        })
    }

    /// Point the provider at another API endpoint
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn records_url(&self, zone_id: &str) -> String {
        format!("{}/zones/{}/dns_records", self.api_base, zone_id)
    }

    /// Send `request` and decode the API envelope
    async fn send<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        context: &str,
    ) -> Result<T> {
        let response = request
            .bearer_auth(&self.api_token)
            .header("Content-Type", "application/json")
            .send()
            .await
            .map_err(|e| Error::http(format!("{}: HTTP request failed: {}", context, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(status_error(status.as_u16(), context, &body));
        }

        let envelope: Envelope<T> = response.json().await.map_err(|e| {
            Error::provider(PROVIDER, format!("{}: failed to parse response: {}", context, e))
        })?;
        envelope.into_result(context)
    }

    async fn list_txt_records(&self, zone_id: &str, name: &str) -> Result<Vec<DnsRecord>> {
        tracing::debug!("Listing TXT records named {}", name);
        let request = self
            .client
            .get(self.records_url(zone_id))
            .query(&[("type", "TXT"), ("name", name)]);
        self.send(request, &format!("List TXT records {}", name)).await
    }
}

/// Map a non-2xx status to an error
fn status_error(status: u16, context: &str, body: &str) -> Error {
    match status {
        401 | 403 => Error::auth(format!(
            "{}: invalid API token or insufficient permissions (HTTP {})",
            context, status
        )),
        404 => Error::not_found(format!("{}: zone or record not found", context)),
        409 => Error::provider(
            PROVIDER,
            format!("{}: conflicting record exists (HTTP 409)", context),
        ),
        429 => Error::provider(
            PROVIDER,
            format!("{}: rate limit exceeded (HTTP 429)", context),
        ),
        500..=599 => Error::provider(
            PROVIDER,
            format!("{}: Cloudflare server error {} - {}", context, status, body),
        ),
        _ => Error::provider(
            PROVIDER,
            format!("{}: unexpected status {} - {}", context, status, body),
        ),
    }
}

/// TTL from the `ttl` domain parameter
fn ttl_from(params: &DomainParameters) -> Result<u32> {
    let Some(raw) = params.get("ttl") else {
        return Ok(AUTOMATIC_TTL);
    };
    let ttl: u32 = raw
        .trim()
        .parse()
        .map_err(|_| Error::config(format!("Cloudflare ttl '{}' is not a number", raw)))?;
    if ttl < AUTOMATIC_TTL {
        return Err(Error::config("Cloudflare ttl must be at least 1"));
    }
    Ok(ttl)
}

/// Whether a stored TXT value carries the same DKIM tags as `expected`
fn content_matches(stored: &str, expected: &str) -> bool {
    tags_match(&parse_tags(&join_segments(stored)), &parse_tags(expected))
}

#[async_trait]
impl DnsProvider for CloudflareProvider {
    fn provider_name(&self) -> &'static str {
        PROVIDER
    }

    fn required_parameters(&self) -> &'static [&'static str] {
        &["zone_id"]
    }

    /// Create the TXT record
    ///
    /// ```http
    /// POST /zones/:zone_id/dns_records
    /// {"type": "TXT", "name": "...", "content": "...", "ttl": 1}
    /// ```
    async fn add(&self, params: &DomainParameters, request: &RecordRequest) -> Result<PublishedRecord> {
        let zone_id = params.require(PROVIDER, "zone_id")?;
        let ttl = ttl_from(params)?;

        tracing::info!("Creating Cloudflare TXT record {}", request.name);
        let payload = serde_json::json!({
            "type": "TXT",
            "name": request.name,
            "content": request.chunked_content,
            "ttl": ttl,
        });

        let record: DnsRecord = self
            .send(
                self.client.post(self.records_url(zone_id)).json(&payload),
                &format!("Create TXT record {}", request.name),
            )
            .await?;

        tracing::debug!("Cloudflare record {} has id {}", request.name, record.id);
        Ok(PublishedRecord::now(request)
            .with_continuation(serde_json::json!({ "record_id": record.id })))
    }

    async fn check(&self, params: &DomainParameters, request: &RecordRequest) -> Result<bool> {
        let zone_id = params.require(PROVIDER, "zone_id")?;
        let records = self.list_txt_records(zone_id, &request.name).await?;
        Ok(records
            .iter()
            .any(|record| content_matches(&record.content, &request.content)))
    }

    async fn delete(&self, params: &DomainParameters, entry: &LedgerEntry) -> DeleteOutcome {
        let Some(zone_id) = params.get("zone_id") else {
            tracing::error!(
                "Cannot delete {}:{}: no zone_id configured",
                entry.domain,
                entry.selector
            );
            return DeleteOutcome::Failed;
        };
        let Some(record_id) = entry
            .continuation_data
            .as_ref()
            .and_then(|data| data.get("record_id"))
            .and_then(|id| id.as_str())
        else {
            tracing::error!(
                "Cannot delete {}:{}: no Cloudflare record id was stored",
                entry.domain,
                entry.selector
            );
            return DeleteOutcome::Failed;
        };

        let url = format!("{}/{}", self.records_url(zone_id), record_id);
        let context = format!("Delete record {} of {}", record_id, entry.domain);
        match self
            .send::<serde_json::Value>(self.client.delete(url), &context)
            .await
        {
            Ok(_) => DeleteOutcome::Succeeded,
            Err(Error::NotFound(_)) => {
                tracing::info!("{}: already gone", context);
                DeleteOutcome::Succeeded
            }
            Err(e) => {
                tracing::error!("{}", e);
                DeleteOutcome::Failed
            }
        }
    }
}

/// Factory for creating Cloudflare providers
pub struct CloudflareFactory;

impl DnsProviderFactory for CloudflareFactory {
    fn create(&self, config: &ProviderConfig) -> Result<Box<dyn DnsProvider>> {
        match config {
            ProviderConfig::Cloudflare { api_token } => {
                Ok(Box::new(CloudflareProvider::new(api_token.clone())?))
            }
            _ => Err(Error::config("Invalid config for Cloudflare provider")),
        }
    }
}

/// Register the Cloudflare provider with a registry
///
/// # Example
///
/// ```rust
/// use dkim_rotate_core::ProviderRegistry;
///
/// let registry = ProviderRegistry::with_builtin();
/// dkim_rotate_provider_cloudflare::register(&registry);
/// assert!(registry.has_provider("cloudflare"));
/// ```
pub fn register(registry: &ProviderRegistry) {
    registry.register_provider(PROVIDER, Box::new(CloudflareFactory));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> RecordRequest {
        RecordRequest {
            domain: "example.com".to_string(),
            selector: "202401".to_string(),
            name: "202401._domainkey.example.com".to_string(),
            content: "v=DKIM1; h=sha256; k=rsa; s=email; p=MIIBKEY".to_string(),
            chunked_content: "\"v=DKIM1; h=sha256; k=rsa; s=email; p=\" \"MIIBKEY\"".to_string(),
        }
    }

    #[test]
    fn test_factory_creation() {
        let factory = CloudflareFactory;
        let config = ProviderConfig::Cloudflare {
            api_token: "test_token".to_string(),
        };

        let provider = factory.create(&config).unwrap();
        assert_eq!(provider.provider_name(), "cloudflare");
        assert_eq!(provider.required_parameters(), &["zone_id"]);
    }

    #[test]
    fn test_factory_rejects_empty_token_and_other_configs() {
        let factory = CloudflareFactory;
        let empty = ProviderConfig::Cloudflare {
            api_token: String::new(),
        };
        assert!(factory.create(&empty).is_err());
        assert!(factory.create(&ProviderConfig::Null).is_err());
    }

    #[test]
    fn test_register() {
        let registry = ProviderRegistry::new();
        register(&registry);
        assert!(registry.has_provider("cloudflare"));
    }

    #[test]
    fn test_api_token_not_exposed_in_debug() {
        let provider = CloudflareProvider::new("secret_token_12345").unwrap();
        let debug_str = format!("{:?}", provider);
        assert!(!debug_str.contains("secret_token"));
        assert!(debug_str.contains("CloudflareProvider"));
    }

    #[test]
    fn test_ttl_parameter() {
        assert_eq!(ttl_from(&DomainParameters::new()).unwrap(), 1);
        assert_eq!(
            ttl_from(&DomainParameters::new().with("ttl", "300")).unwrap(),
            300
        );
        assert!(ttl_from(&DomainParameters::new().with("ttl", "0")).is_err());
        assert!(ttl_from(&DomainParameters::new().with("ttl", "soon")).is_err());
    }

    #[test]
    fn test_content_matches_quoted_and_plain() {
        let expected = request().content;
        assert!(content_matches(
            "\"v=DKIM1; h=sha256; k=rsa; s=email; p=\" \"MIIBKEY\"",
            &expected
        ));
        assert!(content_matches(
            "v=DKIM1; k=rsa; h=sha256; s=email; p=MIIBKEY",
            &expected
        ));
        assert!(!content_matches(
            "v=DKIM1; h=sha256; k=rsa; s=email; p=OLDKEY",
            &expected
        ));
    }

    #[test]
    fn test_status_error_mapping() {
        assert!(matches!(status_error(403, "op", ""), Error::Authentication(_)));
        assert!(matches!(status_error(404, "op", ""), Error::NotFound(_)));
        assert!(matches!(
            status_error(503, "op", "busy"),
            Error::Provider { .. }
        ));
    }

    #[test]
    fn test_envelope_errors() {
        let failed: Envelope<DnsRecord> = serde_json::from_str(
            r#"{"success": false, "errors": [{"code": 81057, "message": "Record already exists."}], "result": null}"#,
        )
        .unwrap();
        let err = failed.into_result("Create").unwrap_err();
        assert!(err.to_string().contains("81057"));

        let ok: Envelope<Vec<DnsRecord>> = serde_json::from_str(
            r#"{"success": true, "errors": [], "result": [{"id": "abc", "content": "v=DKIM1"}]}"#,
        )
        .unwrap();
        let records = ok.into_result("List").unwrap();
        assert_eq!(records[0].id, "abc");
    }

    #[tokio::test]
    async fn test_delete_without_record_id_fails() {
        let provider = CloudflareProvider::new("token").unwrap();
        let params = DomainParameters::new().with("zone_id", "zone");
        let entry = LedgerEntry::new(
            "example.com",
            "202301",
            chrono::NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
        );
        assert_eq!(provider.delete(&params, &entry).await, DeleteOutcome::Failed);

        let legacy = entry.with_continuation(serde_json::json!("-"));
        assert_eq!(provider.delete(&params, &legacy).await, DeleteOutcome::Failed);
    }
}
