//! Mediated HTTP host function (`http/fetch`).
//!
//! A catalyst's only network access is through this host. Every request is
//! validated in order: method allowlist, domain allowlist, body decode and
//! request-size cap, rate limit, SSRF check, and then executed with redirects
//! disabled and the policy timeout applied. Responses are capped by size
//! and normalized to UTF-8 (with U+FFFD substitution) or base64.
//!
//! Nothing here raises into the sandbox: every failure is returned to the
//! guest as `{"error": {"type", "message"}}`, and one `http.request`
//! telemetry event is emitted per request regardless of outcome.

// Layer 1: Standard library imports
use std::sync::Arc;
use std::time::{Duration, Instant};

// Layer 2: Third-party crate imports
use base64::Engine as _;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use url::Url;

// Layer 3: Internal module imports
use crate::core::config::EngineConfig;
use crate::core::error::{EngineError, EngineResult};
use crate::core::policy::Policy;
use crate::core::reference::ComponentRef;
use crate::core::telemetry::{TelemetryEvent, TelemetrySink};
use crate::host::protocol::{
    self, FetchRequest, FetchResponse, MultipartPart, ENCODING_BASE64,
};
use crate::security::rate_limiter::{RateDecision, RateLimiter};
use crate::security::ssrf;

/// Decoded request body.
enum RequestBody {
    None,
    Bytes(Vec<u8>),
    Multipart(Vec<DecodedPart>),
}

struct DecodedPart {
    name: String,
    data: Vec<u8>,
    filename: Option<String>,
    content_type: Option<String>,
}

/// A validated request, ready to send.
pub(crate) struct PreparedRequest {
    pub builder: reqwest::RequestBuilder,
    pub response_encoding: Option<String>,
}

/// Per-execution HTTP host.
///
/// Holds the execution's policy snapshot and identity; shared with the
/// streaming host, which reuses [`prepare`](HttpHost::prepare) for its own
/// pre-flight.
pub struct HttpHost {
    component_ref: ComponentRef,
    user_id: String,
    policy: Policy,
    limiter: Arc<RateLimiter>,
    telemetry: Arc<dyn TelemetrySink>,
    client: reqwest::Client,
    max_request_size: usize,
    max_response_size: usize,
    timeout_ms: u64,
    allow_private_networks: bool,
}

impl HttpHost {
    /// Build the host for one execution.
    ///
    /// The client never follows redirects; a redirect would bypass the
    /// domain allowlist and the SSRF check.
    pub fn new(
        component_ref: ComponentRef,
        user_id: impl Into<String>,
        policy: Policy,
        config: &EngineConfig,
        limiter: Arc<RateLimiter>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> EngineResult<Self> {
        let timeout_ms = policy.timeout_ms()?.unwrap_or(config.http_timeout_ms);
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(Duration::from_millis(config.http_timeout_ms))
            .build()
            .map_err(|e| EngineError::http_error_with_source("failed to build HTTP client", e))?;

        Ok(Self {
            component_ref,
            user_id: user_id.into(),
            max_request_size: policy.max_request_size.unwrap_or(config.max_request_size),
            max_response_size: policy.max_response_size.unwrap_or(config.max_response_size),
            policy,
            limiter,
            telemetry,
            client,
            timeout_ms,
            allow_private_networks: config.allow_private_networks,
        })
    }

    /// Response-size cap for this execution, shared with the stream host.
    pub(crate) fn max_response_size(&self) -> usize {
        self.max_response_size
    }

    /// Handle one `http/fetch.request` payload. Never raises.
    pub async fn fetch(&self, payload: &str) -> String {
        let request = match protocol::parse_payload::<FetchRequest>(payload) {
            Ok(request) => request,
            Err(err) => return protocol::encode_error(&err),
        };

        let started = Instant::now();
        let (method, host) = (request.method.to_ascii_uppercase(), host_of(&request.url));
        let result = self.fetch_inner(request).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let status = result.as_ref().ok().map(|r| r.status);
        self.telemetry.emit(TelemetryEvent::HttpRequest {
            component_ref: self.component_ref.to_string(),
            method,
            host,
            status,
            duration_ms,
        });

        match result {
            Ok(response) => protocol::encode_ok(&response),
            Err(err) => protocol::encode_error(&err),
        }
    }

    async fn fetch_inner(&self, request: FetchRequest) -> EngineResult<FetchResponse> {
        let prepared = self.prepare(&request).await?;
        let builder = prepared
            .builder
            .timeout(Duration::from_millis(self.timeout_ms));

        let response = builder.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status().as_u16();
        let headers = flatten_headers(response.headers());

        if let Some(len) = response.content_length() {
            if len as usize > self.max_response_size {
                return Err(EngineError::response_too_large(self.max_response_size));
            }
        }
        let bytes = response.bytes().await.map_err(|e| self.transport_error(e))?;
        if bytes.len() > self.max_response_size {
            return Err(EngineError::response_too_large(self.max_response_size));
        }

        let (body, body_encoding) = if prepared.response_encoding.as_deref() == Some(ENCODING_BASE64)
        {
            (
                base64::engine::general_purpose::STANDARD.encode(&bytes),
                Some(ENCODING_BASE64.to_string()),
            )
        } else {
            (String::from_utf8_lossy(&bytes).into_owned(), None)
        };

        Ok(FetchResponse {
            status,
            headers,
            body,
            body_encoding,
        })
    }

    /// Validate a request and build it, without sending.
    ///
    /// Order: method, domain, body decode + request-size cap, rate limit,
    /// SSRF. Shared by fetch and stream open.
    pub(crate) async fn prepare(&self, request: &FetchRequest) -> EngineResult<PreparedRequest> {
        let method_str = request.method.to_ascii_uppercase();
        if !self.policy.allows_method(&method_str) {
            return Err(EngineError::method_blocked(&method_str));
        }
        let method = reqwest::Method::from_bytes(method_str.as_bytes())
            .map_err(|_| EngineError::decode_error(format!("invalid HTTP method '{method_str}'")))?;

        let url = Url::parse(&request.url)
            .map_err(|e| EngineError::decode_error(format!("invalid URL '{}': {e}", request.url)))?;
        let host = url
            .host_str()
            .ok_or_else(|| EngineError::decode_error(format!("URL '{url}' has no host")))?
            .to_string();
        let port = url.port_or_known_default().unwrap_or(443);

        if !self.policy.allows_domain(&host) {
            return Err(EngineError::domain_blocked(&host));
        }

        let body = decode_body(request)?;
        let body_size = match &body {
            RequestBody::None => 0,
            RequestBody::Bytes(bytes) => bytes.len(),
            RequestBody::Multipart(parts) => parts.iter().map(|p| p.data.len()).sum(),
        };
        if body_size > self.max_request_size {
            return Err(EngineError::request_too_large(body_size, self.max_request_size));
        }

        match self
            .limiter
            .check(&self.user_id, &self.component_ref, &self.policy)?
        {
            RateDecision::Limited { retry_after_ms } => {
                return Err(EngineError::rate_limited(retry_after_ms));
            }
            RateDecision::Unlimited | RateDecision::Allowed { .. } => {}
        }

        if !self.allow_private_networks {
            ssrf::ensure_public_host(&host, port).await?;
        }

        let mut builder = self
            .client
            .request(method, url)
            .headers(build_headers(&request.headers)?);
        builder = match body {
            RequestBody::None => builder,
            RequestBody::Bytes(bytes) => builder.body(bytes),
            RequestBody::Multipart(parts) => builder.multipart(build_form(parts)?),
        };

        Ok(PreparedRequest {
            builder,
            response_encoding: request.response_encoding.clone(),
        })
    }

    fn transport_error(&self, err: reqwest::Error) -> EngineError {
        if err.is_timeout() {
            EngineError::timeout(self.timeout_ms)
        } else {
            EngineError::http_error_with_source(err.to_string(), err)
        }
    }
}

fn host_of(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| url.to_string())
}

fn decode_body(request: &FetchRequest) -> EngineResult<RequestBody> {
    if request.body.is_some() && request.multipart.is_some() {
        return Err(EngineError::decode_error(
            "request sets both body and multipart; pick one",
        ));
    }

    if let Some(body) = &request.body {
        let bytes = decode_with(body, request.body_encoding.as_deref())?;
        return Ok(RequestBody::Bytes(bytes));
    }

    if let Some(parts) = &request.multipart {
        let decoded = parts
            .iter()
            .map(decode_part)
            .collect::<EngineResult<Vec<_>>>()?;
        return Ok(RequestBody::Multipart(decoded));
    }

    Ok(RequestBody::None)
}

fn decode_part(part: &MultipartPart) -> EngineResult<DecodedPart> {
    Ok(DecodedPart {
        name: part.name.clone(),
        data: decode_with(&part.data, part.encoding.as_deref())?,
        filename: part.filename.clone(),
        content_type: part.content_type.clone(),
    })
}

fn decode_with(data: &str, encoding: Option<&str>) -> EngineResult<Vec<u8>> {
    match encoding {
        Some(ENCODING_BASE64) => base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|e| EngineError::decode_error(format!("invalid base64 body: {e}"))),
        Some(other) => Err(EngineError::decode_error(format!(
            "unsupported body encoding '{other}'"
        ))),
        None => Ok(data.as_bytes().to_vec()),
    }
}

fn build_headers(headers: &std::collections::HashMap<String, String>) -> EngineResult<HeaderMap> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| EngineError::decode_error(format!("invalid header name '{name}'")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| EngineError::decode_error(format!("invalid header value for '{name}'")))?;
        map.insert(name, value);
    }
    Ok(map)
}

fn build_form(parts: Vec<DecodedPart>) -> EngineResult<reqwest::multipart::Form> {
    let mut form = reqwest::multipart::Form::new();
    for part in parts {
        let mut piece = reqwest::multipart::Part::bytes(part.data);
        if let Some(filename) = part.filename {
            piece = piece.file_name(filename);
        }
        if let Some(content_type) = part.content_type {
            piece = piece
                .mime_str(&content_type)
                .map_err(|e| EngineError::decode_error(format!("invalid content type: {e}")))?;
        }
        form = form.part(part.name, piece);
    }
    Ok(form)
}

fn flatten_headers(headers: &HeaderMap) -> std::collections::HashMap<String, String> {
    let mut map = std::collections::HashMap::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        map.entry(name.as_str().to_string())
            .and_modify(|existing: &mut String| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    map
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]
    #![allow(clippy::panic)]

    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::core::policy::RateLimitConfig;
    use crate::core::telemetry::RecordingTelemetry;

    fn test_host(policy: Policy, telemetry: Arc<RecordingTelemetry>) -> HttpHost {
        HttpHost::new(
            ComponentRef::parse("catalyst:local.probe:1.0.0").unwrap(),
            "user-1",
            policy,
            &EngineConfig::default(),
            Arc::new(RateLimiter::new()),
            telemetry,
        )
        .unwrap()
    }

    /// Host wired for loopback mock servers (private-network check off).
    fn loopback_host(policy: Policy, telemetry: Arc<RecordingTelemetry>) -> HttpHost {
        let config = EngineConfig {
            allow_private_networks: true,
            ..EngineConfig::default()
        };
        HttpHost::new(
            ComponentRef::parse("catalyst:local.probe:1.0.0").unwrap(),
            "user-1",
            policy,
            &config,
            Arc::new(RateLimiter::new()),
            telemetry,
        )
        .unwrap()
    }

    fn wildcard_policy() -> Policy {
        Policy {
            allowed_domains: vec!["*".to_string()],
            ..Policy::default()
        }
    }

    fn error_type(response: &str) -> String {
        let value: serde_json::Value = serde_json::from_str(response).unwrap();
        value["error"]["type"].as_str().unwrap_or_default().to_string()
    }

    #[tokio::test]
    async fn test_domain_blocked_before_any_connection() {
        let telemetry = RecordingTelemetry::shared();
        let policy = Policy {
            allowed_domains: vec!["api.example.com".to_string()],
            ..Policy::default()
        };
        let host = test_host(policy, telemetry.clone());

        let response = host
            .fetch(r#"{"method": "GET", "url": "https://evil.com/steal"}"#)
            .await;
        assert_eq!(error_type(&response), "domain_blocked");
        assert!(response.contains("evil.com"));
        assert_eq!(telemetry.event_names(), vec!["http.request"]);
    }

    #[tokio::test]
    async fn test_method_blocked() {
        let telemetry = RecordingTelemetry::shared();
        let host = test_host(wildcard_policy(), telemetry);

        let response = host
            .fetch(r#"{"method": "DELETE", "url": "https://api.example.com/x"}"#)
            .await;
        assert_eq!(error_type(&response), "method_blocked");
    }

    #[tokio::test]
    async fn test_private_ip_blocked() {
        let telemetry = RecordingTelemetry::shared();
        let host = test_host(wildcard_policy(), telemetry);

        let response = host
            .fetch(r#"{"method": "GET", "url": "http://127.0.0.1:8080/admin"}"#)
            .await;
        assert_eq!(error_type(&response), "private_ip_blocked");
    }

    #[tokio::test]
    async fn test_body_and_multipart_rejected() {
        let telemetry = RecordingTelemetry::shared();
        let host = test_host(wildcard_policy(), telemetry);

        let response = host
            .fetch(
                r#"{"method": "POST", "url": "https://api.example.com/x",
                    "body": "a", "multipart": [{"name": "f", "data": "b"}]}"#,
            )
            .await;
        assert_eq!(error_type(&response), "decode_error");
    }

    #[tokio::test]
    async fn test_request_too_large() {
        let telemetry = RecordingTelemetry::shared();
        let policy = Policy {
            max_request_size: Some(4),
            ..wildcard_policy()
        };
        let host = test_host(policy, telemetry);

        let response = host
            .fetch(r#"{"method": "POST", "url": "https://api.example.com/x", "body": "toolarge"}"#)
            .await;
        assert_eq!(error_type(&response), "request_too_large");
    }

    #[tokio::test]
    async fn test_rate_limited_fetch() {
        let telemetry = RecordingTelemetry::shared();
        let policy = Policy {
            rate_limit: Some(RateLimitConfig {
                requests: 1,
                window: "1m".to_string(),
            }),
            ..wildcard_policy()
        };
        let host = test_host(policy, telemetry);

        // First request consumes the window (it fails later at DNS for this
        // fake domain, but the rate slot is taken during pre-flight).
        let _ = host
            .fetch(r#"{"method": "GET", "url": "https://no-such-host.invalid/"}"#)
            .await;
        let response = host
            .fetch(r#"{"method": "GET", "url": "https://no-such-host.invalid/"}"#)
            .await;
        assert_eq!(error_type(&response), "rate_limited");
    }

    #[tokio::test]
    async fn test_fetch_success_against_mock_server() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data"))
            .and(header("x-probe", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("hello world"))
            .mount(&server)
            .await;

        let telemetry = RecordingTelemetry::shared();
        let host = loopback_host(wildcard_policy(), telemetry.clone());
        let payload = json!({
            "method": "GET",
            "url": format!("{}/data", server.uri()),
            "headers": {"x-probe": "1"},
        })
        .to_string();
        let response = host.fetch(&payload).await;
        let value: serde_json::Value = serde_json::from_str(&response).unwrap();
        assert_eq!(value["status"], 200);
        assert_eq!(value["body"], "hello world");
        assert!(value.get("body_encoding").is_none());

        match &telemetry.events()[0] {
            TelemetryEvent::HttpRequest { status, .. } => assert_eq!(*status, Some(200)),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_base64_response_encoding() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8, 159, 146, 150]))
            .mount(&server)
            .await;

        let host = loopback_host(wildcard_policy(), RecordingTelemetry::shared());
        let payload = json!({
            "method": "GET",
            "url": format!("{}/bin", server.uri()),
            "response_encoding": "base64",
        })
        .to_string();
        let response = host.fetch(&payload).await;
        let value: serde_json::Value = serde_json::from_str(&response).unwrap();
        assert_eq!(value["body_encoding"], "base64");
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(value["body"].as_str().unwrap())
            .unwrap();
        assert_eq!(decoded, vec![0u8, 159, 146, 150]);
    }

    #[tokio::test]
    async fn test_invalid_utf8_substituted_in_plain_responses() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/garbled"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'h', b'i', 0xFF]))
            .mount(&server)
            .await;

        let host = loopback_host(wildcard_policy(), RecordingTelemetry::shared());
        let payload = json!({"method": "GET", "url": format!("{}/garbled", server.uri())}).to_string();
        let response = host.fetch(&payload).await;
        let value: serde_json::Value = serde_json::from_str(&response).unwrap();
        assert_eq!(value["body"], "hi\u{FFFD}");
    }

    #[tokio::test]
    async fn test_response_too_large() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/big"))
            .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(64)))
            .mount(&server)
            .await;

        let telemetry = RecordingTelemetry::shared();
        let config = EngineConfig {
            allow_private_networks: true,
            ..EngineConfig::default()
        };
        let policy = Policy {
            max_response_size: Some(16),
            ..wildcard_policy()
        };
        let host = HttpHost::new(
            ComponentRef::parse("catalyst:local.probe:1.0.0").unwrap(),
            "user-1",
            policy,
            &config,
            Arc::new(RateLimiter::new()),
            telemetry,
        )
        .unwrap();

        let payload = json!({"method": "GET", "url": format!("{}/big", server.uri())}).to_string();
        let response = host.fetch(&payload).await;
        assert_eq!(error_type(&response), "response_too_large");
    }

    #[tokio::test]
    async fn test_redirects_are_not_followed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/hop"))
            .respond_with(
                ResponseTemplate::new(302).insert_header("location", "https://evil.com/"),
            )
            .mount(&server)
            .await;

        let host = loopback_host(wildcard_policy(), RecordingTelemetry::shared());
        let payload = json!({"method": "GET", "url": format!("{}/hop", server.uri())}).to_string();
        let response = host.fetch(&payload).await;
        let value: serde_json::Value = serde_json::from_str(&response).unwrap();
        // The 302 comes back to the guest untouched.
        assert_eq!(value["status"], 302);
        assert_eq!(value["headers"]["location"], "https://evil.com/");
    }

    #[tokio::test]
    async fn test_telemetry_emitted_once_per_request() {
        let telemetry = RecordingTelemetry::shared();
        let host = test_host(wildcard_policy(), telemetry.clone());
        let _ = host
            .fetch(r#"{"method": "GET", "url": "http://10.0.0.1/x"}"#)
            .await;
        let events = telemetry.events();
        assert_eq!(events.len(), 1);
        match &events[0] {
            TelemetryEvent::HttpRequest { method, host, status, .. } => {
                assert_eq!(method, "GET");
                assert_eq!(host, "10.0.0.1");
                assert!(status.is_none());
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_decode_with_base64() {
        assert_eq!(decode_with("aGVsbG8=", Some("base64")).unwrap(), b"hello");
        assert_eq!(decode_with("hello", None).unwrap(), b"hello");
        assert!(decode_with("!!!", Some("base64")).is_err());
        assert!(decode_with("x", Some("rot13")).is_err());
    }
}
