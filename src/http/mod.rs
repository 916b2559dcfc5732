//! HTTP transport with a persistent cookie jar and recorded redirects.
//!
//! The session talks to the network only through the [`Transport`] trait.
//! [`HttpTransport`] is the reqwest implementation; it follows redirects
//! itself so every hop ends up in [`Response::history`].

mod request;
mod response;
mod user_agent;

pub use request::{normalize_proxy, Body, FileUpload, Request, RequestOptions};
pub use response::{parse_content_disposition_filename, Redirect, Response};
pub use user_agent::{random_user_agent, resolve_user_agent, IMPERSONATE_USER_AGENTS, USER_AGENT};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::LOCATION;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;
use url::Url;

/// Default timeout for HTTP requests in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Redirect hops followed before giving up.
pub const DEFAULT_MAX_REDIRECTS: usize = 10;

/// Error raised by a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Could not connect; retry-worthy.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The request timed out; retry-worthy.
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("too many redirects (limit {0})")]
    TooManyRedirects(usize),

    #[error("invalid proxy '{proxy}': {reason}")]
    InvalidProxy { proxy: String, reason: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Any other HTTP client failure (TLS, body decoding, ...).
    #[error("HTTP error: {0}")]
    Http(String),
}

impl TransportError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Connection(_) | TransportError::Timeout(_))
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() {
            TransportError::Connection(err.to_string())
        } else if err.is_timeout() {
            TransportError::Timeout(err.to_string())
        } else if err.is_builder() {
            TransportError::InvalidRequest(err.to_string())
        } else {
            TransportError::Http(err.to_string())
        }
    }
}

/// The network collaborator used by a session.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and buffer the whole response.
    async fn execute(&self, request: &Request) -> Result<Response, TransportError>;

    /// Cookies the store would send to `url`, as `(name, value)` pairs.
    async fn cookies(&self, _url: &Url) -> Vec<(String, String)> {
        Vec::new()
    }

    /// Store a `Set-Cookie` style string for `url`.
    async fn add_cookie(&self, _url: &Url, _cookie: &str) {}

    /// Forget every stored cookie.
    async fn clear_cookies(&self) {}
}

/// Settings for [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub timeout: Duration,
    pub user_agent: String,
    pub max_redirects: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: USER_AGENT.to_string(),
            max_redirects: DEFAULT_MAX_REDIRECTS,
        }
    }
}

struct ClientState {
    jar: Arc<Jar>,
    direct: Client,
    proxied: HashMap<String, Client>,
}

/// reqwest-backed transport sharing one cookie jar across all its clients.
///
/// reqwest binds proxies to a client, so a client is built (and cached)
/// per distinct proxy; all of them share the jar.
pub struct HttpTransport {
    config: TransportConfig,
    state: RwLock<ClientState>,
}

impl HttpTransport {
    /// Create a transport with default settings.
    pub fn new() -> Result<Self, TransportError> {
        Self::with_config(TransportConfig::default())
    }

    /// Create a transport with custom settings.
    pub fn with_config(config: TransportConfig) -> Result<Self, TransportError> {
        let jar = Arc::new(Jar::default());
        let direct = build_client(&config, &jar, None)?;
        Ok(Self {
            config,
            state: RwLock::new(ClientState {
                jar,
                direct,
                proxied: HashMap::new(),
            }),
        })
    }

    async fn client_for(&self, proxy: Option<&str>) -> Result<Client, TransportError> {
        let Some(proxy) = proxy else {
            return Ok(self.state.read().await.direct.clone());
        };
        let proxy = normalize_proxy(proxy);

        if let Some(client) = self.state.read().await.proxied.get(&proxy) {
            return Ok(client.clone());
        }

        let mut state = self.state.write().await;
        let client = build_client(&self.config, &state.jar, Some(&proxy))?;
        state.proxied.insert(proxy, client.clone());
        Ok(client)
    }
}

fn build_client(
    config: &TransportConfig,
    jar: &Arc<Jar>,
    proxy: Option<&str>,
) -> Result<Client, TransportError> {
    let mut builder = Client::builder()
        .user_agent(&config.user_agent)
        .timeout(config.timeout)
        .cookie_provider(jar.clone())
        .redirect(reqwest::redirect::Policy::none())
        .gzip(true)
        .brotli(true);

    if let Some(proxy) = proxy {
        let proxy_cfg = reqwest::Proxy::all(proxy).map_err(|e| TransportError::InvalidProxy {
            proxy: proxy.to_string(),
            reason: e.to_string(),
        })?;
        builder = builder.proxy(proxy_cfg);
    }

    builder
        .build()
        .map_err(|e| TransportError::InvalidRequest(format!("failed to build HTTP client: {}", e)))
}

fn apply_body(builder: RequestBuilder, body: &Body) -> Result<RequestBuilder, TransportError> {
    Ok(match body {
        Body::Empty => builder,
        Body::Form(pairs) => builder.form(pairs),
        Body::Json(value) => builder.json(value),
        Body::Bytes(bytes) => builder.body(bytes.clone()),
        Body::Multipart { fields, files } => {
            let mut form = reqwest::multipart::Form::new();
            for (name, value) in fields {
                form = form.text(name.clone(), value.clone());
            }
            for (name, file) in files {
                let mut part = reqwest::multipart::Part::bytes(file.content.to_vec())
                    .file_name(file.file_name.clone());
                if let Some(ref mime) = file.mime_type {
                    part = part.mime_str(mime)?;
                }
                form = form.part(name.clone(), part);
            }
            builder.multipart(form)
        }
    })
}

/// Method used for the next hop after a redirect with `status`.
fn redirected_method(status: StatusCode, method: &Method) -> Method {
    match status {
        StatusCode::SEE_OTHER if *method != Method::HEAD => Method::GET,
        StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND if *method == Method::POST => Method::GET,
        _ => method.clone(),
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: &Request) -> Result<Response, TransportError> {
        let client = self.client_for(request.options.proxy.as_deref()).await?;

        let mut method = request.method.clone();
        let mut url = request.full_url();
        let mut body = request.options.body.clone();
        let mut history = Vec::new();

        loop {
            let mut builder = client.request(method.clone(), url.clone());
            for (name, value) in &request.options.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            if let Some(timeout) = request.options.timeout {
                builder = builder.timeout(timeout);
            }
            builder = apply_body(builder, &body)?;

            debug!("Sending {} request to {}", method, url);
            let response = builder.send().await?;
            let status = response.status();

            if status.is_redirection() {
                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .map(|s| s.to_string());

                if let Some(location) = location {
                    if history.len() >= self.config.max_redirects {
                        return Err(TransportError::TooManyRedirects(self.config.max_redirects));
                    }
                    let next = url.join(&location).map_err(|e| {
                        TransportError::InvalidRequest(format!(
                            "bad redirect location '{}': {}",
                            location, e
                        ))
                    })?;
                    debug!("{} redirected to {} ({})", url, next, status);

                    let next_method = redirected_method(status, &method);
                    if next_method != method {
                        body = Body::Empty;
                    }
                    history.push(Redirect {
                        url: url.clone(),
                        status,
                    });
                    method = next_method;
                    url = next;
                    continue;
                }
            }

            let final_url = response.url().clone();
            let headers: Vec<(String, String)> = response
                .headers()
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|v| (name.as_str().to_string(), v.to_string()))
                })
                .collect();
            let bytes = response.bytes().await?;

            debug!("{} {} -> {} ({} bytes)", method, final_url, status, bytes.len());
            return Ok(Response::new(method, final_url, status, headers, bytes).with_history(history));
        }
    }

    async fn cookies(&self, url: &Url) -> Vec<(String, String)> {
        let state = self.state.read().await;
        let Some(header) = state.jar.cookies(url) else {
            return Vec::new();
        };
        header
            .to_str()
            .unwrap_or_default()
            .split(';')
            .filter_map(|pair| {
                let (name, value) = pair.split_once('=')?;
                Some((name.trim().to_string(), value.trim().to_string()))
            })
            .collect()
    }

    async fn add_cookie(&self, url: &Url, cookie: &str) {
        self.state.read().await.jar.add_cookie_str(cookie, url);
    }

    async fn clear_cookies(&self) {
        let mut state = self.state.write().await;
        let jar = Arc::new(Jar::default());
        match build_client(&self.config, &jar, None) {
            Ok(direct) => {
                state.jar = jar;
                state.direct = direct;
                state.proxied.clear();
                debug!("Cookie jar cleared");
            }
            Err(e) => tracing::warn!("Failed to rebuild HTTP client while clearing cookies: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(TransportError::Connection("refused".into()).is_transient());
        assert!(TransportError::Timeout("slow".into()).is_transient());
        assert!(!TransportError::TooManyRedirects(10).is_transient());
        assert!(!TransportError::Http("tls".into()).is_transient());
    }

    #[test]
    fn test_redirected_method() {
        assert_eq!(redirected_method(StatusCode::SEE_OTHER, &Method::POST), Method::GET);
        assert_eq!(redirected_method(StatusCode::FOUND, &Method::POST), Method::GET);
        assert_eq!(redirected_method(StatusCode::FOUND, &Method::GET), Method::GET);
        assert_eq!(
            redirected_method(StatusCode::TEMPORARY_REDIRECT, &Method::POST),
            Method::POST
        );
    }

    #[tokio::test]
    async fn test_follows_redirects_and_records_history() {
        let mut server = mockito::Server::new_async().await;
        let first = server
            .mock("GET", "/redirect/2")
            .with_status(302)
            .with_header("location", "/redirect/1")
            .create_async()
            .await;
        let second = server
            .mock("GET", "/redirect/1")
            .with_status(301)
            .with_header("location", "/get")
            .create_async()
            .await;
        let last = server
            .mock("GET", "/get")
            .with_status(200)
            .with_body("done")
            .create_async()
            .await;

        let transport = HttpTransport::new().unwrap();
        let url = Url::parse(&format!("{}/redirect/2", server.url())).unwrap();
        let response = transport
            .execute(&Request::new(Method::GET, url))
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.text(), "done");
        assert_eq!(response.history().len(), 2);
        assert_eq!(response.history()[0].status, StatusCode::FOUND);
        assert!(response.url.as_str().ends_with("/get"));

        first.assert_async().await;
        second.assert_async().await;
        last.assert_async().await;
    }

    #[tokio::test]
    async fn test_cookie_jar_persists_and_clears() {
        let mut server = mockito::Server::new_async().await;
        let _set = server
            .mock("GET", "/cookies/set")
            .with_status(200)
            .with_header("set-cookie", "flavour=oatmeal; Path=/")
            .create_async()
            .await;

        let transport = HttpTransport::new().unwrap();
        let url = Url::parse(&format!("{}/cookies/set", server.url())).unwrap();
        transport
            .execute(&Request::new(Method::GET, url.clone()))
            .await
            .unwrap();

        let cookies = transport.cookies(&url).await;
        assert_eq!(cookies, vec![("flavour".to_string(), "oatmeal".to_string())]);

        transport.clear_cookies().await;
        assert!(transport.cookies(&url).await.is_empty());
    }
}
