//! Proxy pool with liveness checks.
//!
//! A proxy is considered working when a request through it to the test
//! URL answers 200 and the JSON `origin` field reports the proxy's host.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use rand::seq::SliceRandom;
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::Result;
use crate::http::{normalize_proxy, HttpTransport, Request, RequestOptions, Transport};

/// Default endpoint echoing the caller's address as `{"origin": ...}`.
pub const DEFAULT_TEST_URL: &str = "https://httpbin.org/ip";

/// Default per-check timeout.
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Default number of concurrent checks.
pub const DEFAULT_TEST_WORKERS: usize = 10;

#[derive(Deserialize)]
struct Origin {
    origin: String,
}

/// One proxy and what is known about it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProxyRecord {
    pub address: String,
    pub working: bool,
    pub failures: u32,
}

impl ProxyRecord {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            working: true,
            failures: 0,
        }
    }

    /// Host part of the address.
    pub fn host(&self) -> Option<String> {
        Url::parse(&normalize_proxy(&self.address))
            .ok()
            .and_then(|u| u.host_str().map(String::from))
    }

    /// Check the proxy against `test_url` and update the record.
    pub async fn test(&mut self, transport: &dyn Transport, test_url: &Url, timeout: Duration) -> bool {
        let options = RequestOptions::new()
            .proxy(self.address.clone())
            .timeout(timeout);
        let request = Request::new(Method::GET, test_url.clone()).with_options(options);

        let working = match transport.execute(&request).await {
            Ok(response) if response.status == StatusCode::OK => {
                let origin = response.json::<Origin>().map(|o| o.origin).unwrap_or_default();
                self.host().is_some_and(|host| origin.contains(&host))
            }
            Ok(response) => {
                tracing::debug!("Proxy {} answered {}", self.address, response.status);
                false
            }
            Err(e) => {
                tracing::debug!("Proxy {} failed: {}", self.address, e);
                false
            }
        };

        if !working {
            self.failures += 1;
        }
        self.working = working;
        working
    }
}

/// A set of proxies to pick from.
pub struct ProxyPool {
    proxies: Vec<ProxyRecord>,
    transport: Arc<dyn Transport>,
    test_url: Url,
    timeout: Duration,
    workers: usize,
}

impl ProxyPool {
    /// Pool checking proxies with the reqwest transport.
    pub fn new() -> Result<Self> {
        Self::with_transport(Arc::new(HttpTransport::new()?))
    }

    pub fn with_transport(transport: Arc<dyn Transport>) -> Result<Self> {
        Ok(Self {
            proxies: Vec::new(),
            transport,
            test_url: Url::parse(DEFAULT_TEST_URL)?,
            timeout: DEFAULT_TEST_TIMEOUT,
            workers: DEFAULT_TEST_WORKERS,
        })
    }

    pub fn with_test_url(mut self, test_url: Url) -> Self {
        self.test_url = test_url;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Add addresses, checking them concurrently when `test` is set.
    /// Untested proxies are assumed to work.
    pub async fn load<I, S>(&mut self, addresses: I, test: bool)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut records: Vec<ProxyRecord> = addresses.into_iter().map(ProxyRecord::new).collect();
        if test {
            records = self.check(records).await;
        }
        self.proxies.extend(records);
    }

    /// Re-check every proxy in the pool.
    pub async fn test_all(&mut self) {
        let records = std::mem::take(&mut self.proxies);
        self.proxies = self.check(records).await;
    }

    async fn check(&self, records: Vec<ProxyRecord>) -> Vec<ProxyRecord> {
        let transport = self.transport.as_ref();
        let test_url = &self.test_url;
        let timeout = self.timeout;

        let checked: Vec<ProxyRecord> = stream::iter(records)
            .map(|mut record| async move {
                record.test(transport, test_url, timeout).await;
                record
            })
            .buffer_unordered(self.workers)
            .collect()
            .await;

        tracing::info!(
            "Checked {} proxies, {} working",
            checked.len(),
            checked.iter().filter(|r| r.working).count()
        );
        checked
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ProxyRecord> {
        self.proxies.iter()
    }

    pub fn get(&self, address: &str) -> Option<&ProxyRecord> {
        self.proxies.iter().find(|p| p.address == address)
    }

    pub fn working(&self) -> impl Iterator<Item = &ProxyRecord> {
        self.proxies.iter().filter(|p| p.working)
    }

    /// A random working proxy.
    pub fn random_working(&self) -> Option<&ProxyRecord> {
        let working: Vec<&ProxyRecord> = self.working().collect();
        working.choose(&mut rand::thread_rng()).copied()
    }
}
