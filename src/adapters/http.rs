//! HTTP request adapter and the two client families it can drive.
//!
//! Neither client decompresses transparently. The adapter owns
//! `Content-Encoding` handling, which is what makes wire and decoded sizes
//! separately observable.

use std::collections::BTreeMap;
use std::hint::black_box;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use clap::ValueEnum;
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{BenchError, OperationError, Result};
use crate::harness::{InvocationContext, Operation, Outcome, WireSize};
use crate::payload::PostBody;

pub const CONTENT_TYPE: &str = "Content-Type";
pub const JSON_CONTENT_TYPE: &str = "application/json";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub const ALL: [Method; 2] = [Method::Get, Method::Post];

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

/// A request validated once, when it is built.
#[derive(Clone, Debug)]
pub struct HttpRequest<B = PostBody> {
    url: String,
    method: Method,
    /// Names are case-sensitive here; values are opaque.
    headers: BTreeMap<String, String>,
    body: Option<B>,
    timeout: Duration,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Result<Self> {
        Self::build(Method::Get, url.into(), None)
    }
}

impl<B: Serialize> HttpRequest<B> {
    pub fn post(url: impl Into<String>, body: B) -> Result<Self> {
        Self::build(Method::Post, url.into(), Some(body))
    }

    fn build(method: Method, url: String, body: Option<B>) -> Result<Self> {
        let parsed = reqwest::Url::parse(&url)
            .map_err(|e| BenchError::Config(format!("invalid url '{url}': {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(BenchError::Config(format!(
                "unsupported scheme '{}' in '{url}'",
                parsed.scheme()
            )));
        }

        Ok(Self {
            url,
            method,
            headers: BTreeMap::new(),
            body,
            timeout: Duration::from_secs(5),
        })
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Result<Self> {
        let (name, value) = (name.into(), value.into());
        reqwest::header::HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| BenchError::Config(format!("invalid header name '{name}'")))?;
        reqwest::header::HeaderValue::from_str(&value)
            .map_err(|_| BenchError::Config(format!("invalid value for header '{name}'")))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        if timeout.is_zero() {
            return Err(BenchError::Config("request timeout must be > 0".into()));
        }
        self.timeout = timeout;
        Ok(self)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn body(&self) -> Option<&B> {
        self.body.as_ref()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Status, raw body and the first value of each response header.
#[derive(Clone, Debug, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
    headers: BTreeMap<String, String>,
}

impl HttpResponse {
    pub fn new<I, K, V>(status: u16, body: Vec<u8>, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut first = BTreeMap::new();
        for (name, value) in headers {
            first
                .entry(name.as_ref().to_ascii_lowercase())
                .or_insert_with(|| value.into());
        }
        Self {
            status,
            body,
            headers: first,
        }
    }

    /// Case-insensitive lookup of the first value.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Transport tuning handed to a client at construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClientSettings {
    /// Upper bound for a whole request, overridden per request.
    pub timeout: Duration,
    pub max_idle_connections: usize,
    pub max_idle_per_host: usize,
    pub idle_timeout: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_idle_connections: 1_000,
            max_idle_per_host: 100,
            idle_timeout: Duration::from_secs(30),
        }
    }
}

/// One request/response exchange. Implementations must not decompress or retry.
pub trait HttpClient: Send + Sync {
    fn name(&self) -> &'static str;

    fn execute(
        &self,
        method: Method,
        url: &str,
        headers: &BTreeMap<String, String>,
        body: Option<&[u8]>,
        timeout: Duration,
    ) -> std::result::Result<HttpResponse, OperationError>;
}

/// `reqwest` blocking client.
pub struct StandardClient {
    inner: reqwest::blocking::Client,
}

impl StandardClient {
    /// reqwest only bounds idle connections per host, so
    /// `max_idle_connections` has no counterpart here.
    pub fn new(settings: &ClientSettings) -> Result<Self> {
        let inner = reqwest::blocking::Client::builder()
            .timeout(settings.timeout)
            .pool_max_idle_per_host(settings.max_idle_per_host)
            .pool_idle_timeout(settings.idle_timeout)
            .build()
            .map_err(|e| BenchError::Config(format!("cannot build reqwest client: {e}")))?;
        Ok(Self { inner })
    }
}

impl HttpClient for StandardClient {
    fn name(&self) -> &'static str {
        "standard"
    }

    fn execute(
        &self,
        method: Method,
        url: &str,
        headers: &BTreeMap<String, String>,
        body: Option<&[u8]>,
        timeout: Duration,
    ) -> std::result::Result<HttpResponse, OperationError> {
        let method = match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
        };

        let mut request = self.inner.request(method, url).timeout(timeout);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(body) = body {
            request = request.body(body.to_vec());
        }

        let response = request
            .send()
            .map_err(|e| OperationError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let header_pairs: Vec<(String, String)> = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = response
            .bytes()
            .map_err(|e| OperationError::Body(e.to_string()))?
            .to_vec();

        Ok(HttpResponse::new(status, body, header_pairs))
    }
}

/// `ureq` agent: fewer layers, no async runtime underneath.
pub struct FastClient {
    agent: ureq::Agent,
}

impl FastClient {
    pub fn new(settings: &ClientSettings) -> Result<Self> {
        let agent = ureq::AgentBuilder::new()
            .timeout(settings.timeout)
            .max_idle_connections(settings.max_idle_connections)
            .max_idle_connections_per_host(settings.max_idle_per_host)
            .build();
        Ok(Self { agent })
    }
}

impl HttpClient for FastClient {
    fn name(&self) -> &'static str {
        "fast"
    }

    fn execute(
        &self,
        method: Method,
        url: &str,
        headers: &BTreeMap<String, String>,
        body: Option<&[u8]>,
        timeout: Duration,
    ) -> std::result::Result<HttpResponse, OperationError> {
        let mut request = self.agent.request(method.as_str(), url).timeout(timeout);
        for (name, value) in headers {
            request = request.set(name, value);
        }

        let sent = match body {
            Some(body) => request.send_bytes(body),
            None => request.call(),
        };
        // Non-2xx is still a response; the operation decides what it expects.
        let response = match sent {
            Ok(response) | Err(ureq::Error::Status(_, response)) => response,
            Err(ureq::Error::Transport(e)) => return Err(OperationError::Transport(e.to_string())),
        };

        let status = response.status();
        let header_pairs: Vec<(String, String)> = response
            .headers_names()
            .into_iter()
            .filter_map(|name| {
                let value = response.header(&name)?.to_string();
                Some((name, value))
            })
            .collect();

        let mut body = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut body)
            .map_err(|e| OperationError::Body(e.to_string()))?;

        Ok(HttpResponse::new(status, body, header_pairs))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpClientKind {
    Standard,
    Fast,
}

impl HttpClientKind {
    pub const ALL: [HttpClientKind; 2] = [HttpClientKind::Standard, HttpClientKind::Fast];

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpClientKind::Standard => "standard",
            HttpClientKind::Fast => "fast",
        }
    }

    pub fn library(&self) -> &'static str {
        match self {
            HttpClientKind::Standard => "reqwest",
            HttpClientKind::Fast => "ureq",
        }
    }

    pub fn build(&self, settings: &ClientSettings) -> Result<Arc<dyn HttpClient>> {
        let client: Arc<dyn HttpClient> = match self {
            HttpClientKind::Standard => Arc::new(StandardClient::new(settings)?),
            HttpClientKind::Fast => Arc::new(FastClient::new(settings)?),
        };
        Ok(client)
    }
}

/// Where the wire size of a response comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, ValueEnum)]
pub enum WireAccounting {
    /// Trust `Content-Length`; missing or unparsable means unreported.
    #[default]
    ContentLength,
    /// Count the raw body bytes as received.
    BodyLength,
}

impl WireAccounting {
    fn wire_size(&self, response: &HttpResponse) -> WireSize {
        match self {
            WireAccounting::ContentLength => response
                .header("Content-Length")
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map_or(WireSize::Unreported, WireSize::Reported),
            WireAccounting::BodyLength => WireSize::Reported(response.body.len() as u64),
        }
    }
}

/// Decoded length of `body` under `encoding`; `None` if it is not transformed.
fn decoded_len(
    encoding: Option<&str>,
    body: &[u8],
) -> std::result::Result<Option<u64>, OperationError> {
    let encoding = encoding.map(|e| e.trim().to_ascii_lowercase());
    match encoding.as_deref() {
        None | Some("") | Some("identity") => Ok(None),
        Some("gzip") | Some("x-gzip") => {
            let mut decoded = Vec::with_capacity(body.len() * 4);
            GzDecoder::new(body)
                .read_to_end(&mut decoded)
                .map_err(|e| OperationError::Body(format!("gzip: {e}")))?;
            Ok(Some(black_box(decoded).len() as u64))
        }
        Some(other) => Err(OperationError::UnsupportedEncoding(other.to_string())),
    }
}

/// One HTTP round trip per invocation, against a shared client.
pub struct HttpOperation<B = PostBody> {
    client: Arc<dyn HttpClient>,
    request: HttpRequest<B>,
    accounting: WireAccounting,
    expected_status: u16,
}

impl<B: Serialize> HttpOperation<B> {
    /// A request with a body gets `Content-Type: application/json` unless the
    /// caller supplied exactly that header key.
    pub fn new(client: Arc<dyn HttpClient>, mut request: HttpRequest<B>) -> Self {
        if request.body.is_some() && !request.headers.contains_key(CONTENT_TYPE) {
            request
                .headers
                .insert(CONTENT_TYPE.to_string(), JSON_CONTENT_TYPE.to_string());
        }
        Self {
            client,
            request,
            accounting: WireAccounting::default(),
            expected_status: 200,
        }
    }

    pub fn with_accounting(mut self, accounting: WireAccounting) -> Self {
        self.accounting = accounting;
        self
    }

    pub fn expect_status(mut self, status: u16) -> Self {
        self.expected_status = status;
        self
    }

    pub fn client_name(&self) -> &'static str {
        self.client.name()
    }

    pub fn request(&self) -> &HttpRequest<B> {
        &self.request
    }

    /// Send the request and return the response untouched.
    pub fn fetch(&self) -> std::result::Result<HttpResponse, OperationError> {
        let body = match &self.request.body {
            Some(body) => {
                Some(serde_json::to_vec(body).map_err(|e| OperationError::Marshal(e.to_string()))?)
            }
            None => None,
        };

        self.client.execute(
            self.request.method,
            &self.request.url,
            &self.request.headers,
            body.as_deref(),
            self.request.timeout,
        )
    }

    fn outcome(&self, response: &HttpResponse) -> std::result::Result<Outcome, OperationError> {
        if response.status != self.expected_status {
            return Err(OperationError::UnexpectedStatus {
                expected: self.expected_status,
                actual: response.status,
            });
        }

        match decoded_len(response.header("Content-Encoding"), &response.body)? {
            None => Ok(Outcome::identity(response.body.len() as u64)),
            Some(decoded) => Ok(Outcome::encoded(
                decoded,
                self.accounting.wire_size(response),
            )),
        }
    }
}

impl<B: Serialize + Send + Sync> Operation for HttpOperation<B> {
    fn invoke(&self, ctx: &InvocationContext) -> std::result::Result<Outcome, OperationError> {
        let response = self.fetch()?;
        let outcome = self.outcome(&response);
        if let Err(e) = &outcome {
            debug!(
                client = self.client.name(),
                iteration = ctx.iteration,
                status = response.status,
                error = %e,
                "request rejected"
            );
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{Fixture, HttpFixture, HttpFixtureConfig};
    use crate::payload::SizeClass;

    const CTX: InvocationContext = InvocationContext {
        iteration: 0,
        worker: 0,
    };

    fn client(kind: HttpClientKind) -> Arc<dyn HttpClient> {
        kind.build(&ClientSettings::default()).unwrap()
    }

    fn gzip_get(url: String) -> HttpRequest {
        HttpRequest::get(url)
            .unwrap()
            .with_header("User-Agent", "Benchmark-Client")
            .unwrap()
            .with_header("Accept-Encoding", "gzip")
            .unwrap()
    }

    #[test]
    fn test_get_identity_reports_decoded_length() {
        let fixture = HttpFixture::start(&HttpFixtureConfig::new(SizeClass::Small, false)).unwrap();
        for kind in HttpClientKind::ALL {
            let op = HttpOperation::new(client(kind), HttpRequest::get(fixture.url()).unwrap());
            let outcome = op.invoke(&CTX).unwrap();
            assert_eq!(outcome.decoded_bytes, 32, "{kind:?}");
            assert_eq!(outcome.wire, WireSize::Identity, "{kind:?}");
        }
        fixture.stop().unwrap();
    }

    #[test]
    fn test_gzip_reports_content_length_as_wire() {
        let fixture = HttpFixture::start(&HttpFixtureConfig::new(SizeClass::Medium, true)).unwrap();
        for kind in HttpClientKind::ALL {
            let op = HttpOperation::new(client(kind), gzip_get(fixture.url()));
            let outcome = op.invoke(&CTX).unwrap();
            assert_eq!(outcome.decoded_bytes, fixture.decoded_len() as u64);
            assert_eq!(outcome.wire, WireSize::Reported(fixture.body_len() as u64));
        }
    }

    #[test]
    fn test_body_length_accounting_counts_received_bytes() {
        let fixture = HttpFixture::start(&HttpFixtureConfig::new(SizeClass::Large, true)).unwrap();
        let op = HttpOperation::new(client(HttpClientKind::Fast), gzip_get(fixture.url()))
            .with_accounting(WireAccounting::BodyLength);
        let outcome = op.invoke(&CTX).unwrap();
        assert_eq!(outcome.wire, WireSize::Reported(fixture.body_len() as u64));
        assert!(outcome.decoded_bytes > fixture.body_len() as u64);
    }

    #[test]
    fn test_post_defaults_content_type() {
        let fixture = HttpFixture::start(&HttpFixtureConfig::new(SizeClass::Small, false)).unwrap();
        for kind in HttpClientKind::ALL {
            let request = HttpRequest::post(fixture.url(), PostBody::default()).unwrap();
            let op = HttpOperation::new(client(kind), request);
            assert_eq!(
                op.request().headers().get(CONTENT_TYPE).map(String::as_str),
                Some(JSON_CONTENT_TYPE)
            );
            assert_eq!(op.invoke(&CTX).unwrap().decoded_bytes, 32);
        }
        assert_eq!(fixture.served(), 2);
    }

    #[test]
    fn test_explicit_content_type_is_kept() {
        let request = HttpRequest::post("http://127.0.0.1:1/", PostBody::default())
            .unwrap()
            .with_header(CONTENT_TYPE, "text/plain")
            .unwrap();
        let op = HttpOperation::new(client(HttpClientKind::Fast), request);
        assert_eq!(op.request().headers()[CONTENT_TYPE], "text/plain");
    }

    #[test]
    fn test_unexpected_status_is_an_error() {
        let fixture = HttpFixture::start(&HttpFixtureConfig::new(SizeClass::Small, false)).unwrap();
        let op = HttpOperation::new(
            client(HttpClientKind::Standard),
            HttpRequest::get(fixture.url()).unwrap(),
        )
        .expect_status(204);
        assert!(matches!(
            op.invoke(&CTX),
            Err(OperationError::UnexpectedStatus {
                expected: 204,
                actual: 200
            })
        ));
    }

    #[test]
    fn test_refused_connection_is_a_transport_error() {
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let url = format!("http://127.0.0.1:{port}/");
        for kind in HttpClientKind::ALL {
            let request = HttpRequest::get(url.clone())
                .unwrap()
                .with_timeout(Duration::from_millis(500))
                .unwrap();
            let op = HttpOperation::new(client(kind), request);
            assert!(matches!(op.invoke(&CTX), Err(OperationError::Transport(_))));
        }
    }

    #[test]
    fn test_invalid_requests_are_rejected_at_construction() {
        assert!(HttpRequest::get("not a url").is_err());
        assert!(HttpRequest::get("ftp://127.0.0.1/").is_err());
        assert!(HttpRequest::get("http://127.0.0.1/")
            .unwrap()
            .with_header("bad header", "x")
            .is_err());
        assert!(HttpRequest::get("http://127.0.0.1/")
            .unwrap()
            .with_timeout(Duration::ZERO)
            .is_err());
    }

    #[test]
    fn test_response_headers_keep_first_value_case_insensitively() {
        let response = HttpResponse::new(
            200,
            Vec::new(),
            [("Set-Cookie", "a=1"), ("set-cookie", "b=2"), ("X-Id", "7")],
        );
        assert_eq!(response.header("SET-COOKIE"), Some("a=1"));
        assert_eq!(response.header("x-id"), Some("7"));
        assert_eq!(response.header("missing"), None);
    }

    #[test]
    fn test_missing_length_hint_is_unreported() {
        let response = HttpResponse::new(200, vec![1, 2, 3], [("Content-Length", "nope")]);
        assert_eq!(
            WireAccounting::ContentLength.wire_size(&response),
            WireSize::Unreported
        );
        assert_eq!(
            WireAccounting::BodyLength.wire_size(&response),
            WireSize::Reported(3)
        );
    }

    #[test]
    fn test_unknown_encoding_is_rejected() {
        assert!(matches!(
            decoded_len(Some("br"), b"xx"),
            Err(OperationError::UnsupportedEncoding(_))
        ));
        assert!(matches!(
            decoded_len(Some("gzip"), b"not gzip"),
            Err(OperationError::Body(_))
        ));
        assert_eq!(decoded_len(Some("identity"), b"xx").unwrap(), None);
    }
}
