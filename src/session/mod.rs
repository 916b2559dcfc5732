//! Browser-like navigation over a [`Transport`].
//!
//! A [`Session`] opens pages, keeps a bounded back/forward history of
//! document and response snapshots, merges persistent header/proxy/user
//! agent overrides into every request, retries transient transport
//! failures with linear backoff, and optionally pauses between requests.
//!
//! Every navigating call takes `&mut self`, so one session cannot be
//! driven from two tasks at once. Use one session per task.

mod history;
mod parsers;
mod retry;

pub use history::{History, HistoryEntry, Visit};
pub use parsers::{parse_html, ParserFn, ParserRegistry, DEFAULT_CONTENT_TYPES};
pub use retry::{Politeness, RetryPolicy};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use reqwest::Method;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::SessionConfig;
use crate::document::{Document, Links, Node, Table};
use crate::download::{DownloadEvent, DownloadReport, Downloader};
use crate::error::{Error, Result};
use crate::filter::Filter;
use crate::forms::{Form, FormFilter, SubmitCheck};
use crate::http::{
    normalize_proxy, resolve_user_agent, HttpTransport, Redirect, Request, RequestOptions,
    Response, Transport,
};

/// Stateful browsing session.
pub struct Session {
    config: SessionConfig,
    transport: Arc<dyn Transport>,
    parsers: ParserRegistry,
    retry: RetryPolicy,
    politeness: Option<Politeness>,
    history: History,
    headers: BTreeMap<String, String>,
    proxy: Option<String>,
    user_agent: Option<String>,
    document: Option<Document>,
    response: Option<Response>,
}

impl Session {
    /// Session with default settings over the reqwest transport.
    pub fn new() -> Result<Self> {
        Self::with_config(SessionConfig::default())
    }

    /// Session over the reqwest transport.
    pub fn with_config(config: SessionConfig) -> Result<Self> {
        config.validate()?;
        let transport = HttpTransport::with_config(config.transport_config())?;
        Self::with_transport(config, Arc::new(transport))
    }

    /// Session over a caller-supplied transport.
    pub fn with_transport(config: SessionConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;

        let mut headers: BTreeMap<String, String> = config
            .headers
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
            .collect();
        let proxy = config.proxy.as_deref().map(normalize_proxy);
        let user_agent = config
            .user_agent
            .as_deref()
            .map(|ua| resolve_user_agent(Some(ua)));
        if let Some(ua) = &user_agent {
            headers.insert("user-agent".to_string(), ua.clone());
        }

        Ok(Self {
            retry: RetryPolicy::new(config.max_retries, config.retry_backoff()),
            politeness: config.delay.map(Politeness::from_millis),
            history: History::new(config.max_history),
            parsers: ParserRegistry::default(),
            headers,
            proxy,
            user_agent,
            document: None,
            response: None,
            transport,
            config,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    // ---- Overrides ----

    /// Persistent headers, lowercase names.
    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// Replace every persistent header.
    pub fn set_headers<I, K, V>(&mut self, headers: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        self.headers = headers
            .into_iter()
            .map(|(k, v)| (k.as_ref().to_ascii_lowercase(), v.into()))
            .collect();
    }

    pub fn add_header(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }

    /// Set the user agent for every later request.
    ///
    /// Also writes the `user-agent` persistent header. `"impersonate"`
    /// picks a real browser agent.
    pub fn set_user_agent(&mut self, user_agent: &str) {
        let resolved = resolve_user_agent(Some(user_agent));
        self.headers.insert("user-agent".to_string(), resolved.clone());
        self.user_agent = Some(resolved);
    }

    pub fn proxy(&self) -> Option<&str> {
        self.proxy.as_deref()
    }

    /// Route every later request through `proxy`, or stop proxying.
    pub fn set_proxy(&mut self, proxy: Option<&str>) {
        self.proxy = proxy.map(normalize_proxy);
    }

    /// Add or replace the document constructor for a content type.
    pub fn register_parser(&mut self, content_type: &str, parser: ParserFn) {
        self.parsers.register(content_type, parser);
    }

    fn merge_overrides(&self, mut request: Request) -> Request {
        for (name, value) in &self.headers {
            if !request.options.has_header(name) {
                request.options.headers.insert(name.clone(), value.clone());
            }
        }
        if request.options.proxy.is_none() {
            request.options.proxy = self.proxy.clone();
        }
        request
    }

    // ---- Navigation ----

    /// GET `url` and make it the current page.
    pub async fn open(&mut self, url: &str) -> Result<Response> {
        self.request(Method::GET, url, RequestOptions::default()).await
    }

    /// Send a request and make the result the current page.
    pub async fn request(
        &mut self,
        method: Method,
        url: &str,
        options: RequestOptions,
    ) -> Result<Response> {
        let url = Url::parse(url)?;
        self.navigate(Request::new(method, url).with_options(options))
            .await
    }

    /// GET a reference relative to the current page.
    pub async fn follow(&mut self, reference: &str) -> Result<Response> {
        self.follow_with(Method::GET, reference, RequestOptions::default())
            .await
    }

    /// Send a request to a reference relative to the current page.
    pub async fn follow_with(
        &mut self,
        method: Method,
        reference: &str,
        options: RequestOptions,
    ) -> Result<Response> {
        let url = self.join_url(reference)?;
        self.navigate(Request::new(method, url).with_options(options))
            .await
    }

    async fn navigate(&mut self, request: Request) -> Result<Response> {
        let request = self.merge_overrides(request);
        debug!("{} {}", request.method, request.full_url());

        let transport = &self.transport;
        let pending = &request;
        let response = self
            .retry
            .run(&request.url, move || transport.execute(pending))
            .await?;

        if let Some(politeness) = self.politeness {
            politeness.pause().await;
        }

        let content_type = response.content_type().unwrap_or_default().to_string();
        let Some(parser) = self.parsers.find(&content_type) else {
            if self.config.strict_parsers {
                return Err(Error::NoParser { content_type });
            }
            warn!(
                "No parser for content type '{}' at {}, page not stored",
                content_type, response.url
            );
            return Ok(response);
        };

        let mut document = parser(&response)?;
        if self.config.absolute_links {
            document.make_links_absolute();
        }

        info!("{} {} -> {}", response.method, response.url, response.status);
        self.commit(document, response.clone());
        Ok(response)
    }

    fn commit(&mut self, document: Document, response: Response) {
        if self.config.history {
            self.history.push(HistoryEntry {
                document: document.clone(),
                response: response.clone(),
            });
        }
        self.document = Some(document);
        self.response = Some(response);
    }

    fn restore(&mut self, entry: HistoryEntry) -> Response {
        debug!(
            "History cursor at {}/{}: {}",
            self.history.cursor(),
            self.history.len(),
            entry.response.url
        );
        self.document = Some(entry.document);
        self.response = Some(entry.response.clone());
        entry.response
    }

    /// Step back through history. The oldest stored page is reachable.
    pub async fn back(&mut self, steps: usize) -> Result<Response> {
        if !self.config.history {
            return Err(Error::HistoryDisabled);
        }
        let entry = self.history.back(steps)?.clone();
        Ok(self.restore(entry))
    }

    /// Step forward through history, up to the newest stored page.
    pub async fn forward(&mut self, steps: usize) -> Result<Response> {
        if !self.config.history {
            return Err(Error::HistoryDisabled);
        }
        let entry = self.history.forward(steps)?.clone();
        Ok(self.restore(entry))
    }

    /// Visit log, oldest first.
    pub fn history(&self) -> Result<Vec<Visit>> {
        if !self.config.history {
            return Err(Error::HistoryDisabled);
        }
        Ok(self.history.visits())
    }

    /// The raw history buffer.
    pub fn flow(&self) -> Result<&History> {
        if !self.config.history {
            return Err(Error::HistoryDisabled);
        }
        Ok(&self.history)
    }

    /// Forget history, cookies and every persistent override.
    pub async fn clear(&mut self) {
        self.history.clear();
        self.transport.clear_cookies().await;
        self.headers.clear();
        self.proxy = None;
        self.user_agent = None;
        self.document = None;
        self.response = None;
        info!("Session cleared");
    }

    // ---- Forms ----

    /// Submit `form` with `extra` pairs appended to its values.
    ///
    /// The response becomes the current page and is stored on the form.
    pub async fn submit(
        &mut self,
        form: &mut Form,
        extra: &[(String, String)],
    ) -> Result<Response> {
        let action = form.action_url()?;
        self.submit_form(form, action, extra).await
    }

    /// Submit `form` to `action` instead of its own action attribute.
    /// A relative `action` resolves against the form's page.
    pub async fn submit_to(
        &mut self,
        form: &mut Form,
        action: &str,
        extra: &[(String, String)],
    ) -> Result<Response> {
        let action = form.base_url().join(action)?;
        self.submit_form(form, action, extra).await
    }

    async fn submit_form(
        &mut self,
        form: &mut Form,
        action: Url,
        extra: &[(String, String)],
    ) -> Result<Response> {
        let (query, body) = form.submission_body(extra);
        let mut options = RequestOptions::new().body(body);
        options.query = query;

        let request = Request::new(form.submission_method(), action).with_options(options);
        let response = self.navigate(request).await?;
        form.set_result(response.clone());
        Ok(response)
    }

    /// POST plain pairs to `url`, or to the current page when `None`.
    pub async fn submit_values<I, K, V>(&mut self, url: Option<&str>, values: I) -> Result<Response>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let url = match url {
            Some(url) => Url::parse(url)?,
            None => self.url().cloned().ok_or(Error::NoPage)?,
        };
        let options = RequestOptions::new().form(values);
        self.navigate(Request::new(Method::POST, url).with_options(options))
            .await
    }

    /// Whether `response` satisfies every condition set in `check`.
    pub fn submit_check(&self, response: &Response, check: &SubmitCheck) -> bool {
        check.check(response)
    }

    // ---- Current page ----

    pub fn response(&self) -> Option<&Response> {
        self.response.as_ref()
    }

    pub fn document(&self) -> Option<&Document> {
        self.document.as_ref()
    }

    /// URL of the current page.
    pub fn url(&self) -> Option<&Url> {
        self.document.as_ref().map(|d| d.url())
    }

    /// Redirect hops that led to the current response.
    pub fn request_history(&self) -> &[Redirect] {
        self.response.as_ref().map(|r| r.history()).unwrap_or(&[])
    }

    fn page(&self) -> Result<&Document> {
        self.document.as_ref().ok_or(Error::NoPage)
    }

    /// Resolve a reference against the current page.
    pub fn join_url(&self, reference: &str) -> Result<Url> {
        Ok(self.page()?.join(reference)?)
    }

    /// Links on the current page; `tags` defaults to anchors.
    pub fn links(&self, tags: &[&str], filter: &Filter) -> Result<Links> {
        Ok(self.page()?.links(tags, filter))
    }

    pub fn forms(&self, filter: &FormFilter) -> Result<Vec<Form>> {
        Ok(self.page()?.forms(filter))
    }

    pub fn tables(&self) -> Result<Vec<Table>> {
        Ok(self.page()?.tables())
    }

    pub fn images(&self) -> Result<Vec<Url>> {
        Ok(self.page()?.images())
    }

    pub fn title(&self) -> Result<Option<String>> {
        Ok(self.page()?.title())
    }

    pub fn xpath(&self, expr: &str) -> Result<Vec<Node>> {
        Ok(self.page()?.xpath(expr)?)
    }

    pub fn css(&self, selector: &str) -> Result<Vec<Node>> {
        Ok(self.page()?.css(selector)?)
    }

    // ---- Cookies ----

    /// Cookies the jar would send to the current page.
    pub async fn cookies(&self) -> Vec<(String, String)> {
        match self.url() {
            Some(url) => self.transport.cookies(url).await,
            None => Vec::new(),
        }
    }

    /// Seed the jar with a `name=value` cookie for `url`.
    pub async fn add_cookie(&self, url: &str, cookie: &str) -> Result<()> {
        let url = Url::parse(url)?;
        self.transport.add_cookie(&url, cookie).await;
        Ok(())
    }

    // ---- Downloads ----

    fn downloader(&self, workers: usize) -> Downloader {
        let mut options = RequestOptions::new();
        options.headers = self.headers.clone();
        options.proxy = self.proxy.clone();
        Downloader::new(self.transport.clone(), workers).with_options(options)
    }

    /// Save one resource into `dir`. The current page is not changed.
    pub async fn download(
        &self,
        dir: impl AsRef<Path>,
        url: &str,
        name: Option<&str>,
    ) -> Result<PathBuf> {
        self.downloader(1).download(dir.as_ref(), url, name).await
    }

    /// Save many resources into `dir` concurrently.
    ///
    /// `workers` defaults to the configured pool size. Results arrive in
    /// completion order; one failure does not stop the others.
    pub async fn download_many<I, S>(
        &self,
        dir: impl AsRef<Path>,
        urls: I,
        workers: Option<usize>,
    ) -> DownloadReport
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.download_many_with_events(dir, urls, workers, None)
            .await
    }

    /// Like [`download_many`](Self::download_many), reporting progress on `events`.
    pub async fn download_many_with_events<I, S>(
        &self,
        dir: impl AsRef<Path>,
        urls: I,
        workers: Option<usize>,
        events: Option<mpsc::Sender<DownloadEvent>>,
    ) -> DownloadReport
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let workers = workers.unwrap_or(self.config.download_workers);
        let urls = urls.into_iter().map(Into::into).collect();
        self.downloader(workers)
            .download_many(dir.as_ref(), urls, events)
            .await
    }
}
