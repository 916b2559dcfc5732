//! Parallel resource downloads.
//!
//! Worker tasks pull URLs from a shared queue, fetch them through the
//! session's transport and write each body to its own file. Progress can be
//! observed through [`DownloadEvent`]s.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use reqwest::Method;
use tokio::sync::{mpsc, Mutex};
use url::Url;

use crate::error::{Error, Result};
use crate::http::{Request, RequestOptions, Transport};
use crate::utils::{filename_from_url, sanitize_filename};

/// Events emitted while downloading.
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadEvent {
    /// A worker picked up a URL
    Started { worker_id: usize, url: String },
    /// The body was written to disk
    Completed {
        worker_id: usize,
        url: String,
        path: PathBuf,
        bytes: u64,
    },
    /// Fetching or writing failed
    Failed {
        worker_id: usize,
        url: String,
        error: String,
    },
}

/// Outcome of a batch, in completion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DownloadReport {
    pub downloaded: Vec<PathBuf>,
    /// `(url, error)` pairs.
    pub failed: Vec<(String, String)>,
}

impl DownloadReport {
    pub fn total(&self) -> usize {
        self.downloaded.len() + self.failed.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Fetches resources to local files.
#[derive(Clone)]
pub struct Downloader {
    transport: Arc<dyn Transport>,
    options: RequestOptions,
    workers: usize,
}

impl Downloader {
    pub fn new(transport: Arc<dyn Transport>, workers: usize) -> Self {
        Self {
            transport,
            options: RequestOptions::default(),
            workers: workers.max(1),
        }
    }

    /// Headers and proxy sent with every fetch.
    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    /// Fetch `url` into `dir` and return the written path.
    ///
    /// The file is called `name` when given, else after the last URL path
    /// segment, else after the response's `Content-Disposition` filename.
    pub async fn download(&self, dir: &Path, url: &str, name: Option<&str>) -> Result<PathBuf> {
        let (path, _) = fetch_to_file(
            self.transport.as_ref(),
            &self.options,
            dir,
            url,
            name,
            None,
        )
        .await?;
        Ok(path)
    }

    /// Download every URL with up to `workers` concurrent fetches.
    ///
    /// A failed item is recorded in the report and the batch carries on.
    /// Names are unique within a batch: a second `logo.png` is saved as
    /// `logo (1).png`.
    pub async fn download_many(
        &self,
        dir: &Path,
        urls: Vec<String>,
        events: Option<mpsc::Sender<DownloadEvent>>,
    ) -> DownloadReport {
        if urls.is_empty() {
            return DownloadReport::default();
        }

        let workers = self.workers.min(urls.len());
        let queue = Arc::new(Mutex::new(urls.into_iter().collect::<VecDeque<_>>()));
        let report = Arc::new(Mutex::new(DownloadReport::default()));
        let claimed = Arc::new(Mutex::new(HashSet::new()));
        let downloaded = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::with_capacity(workers);

        for worker_id in 0..workers {
            let transport = self.transport.clone();
            let options = self.options.clone();
            let dir = dir.to_path_buf();
            let queue = queue.clone();
            let report = report.clone();
            let claimed = claimed.clone();
            let downloaded = downloaded.clone();
            let failed = failed.clone();
            let events = events.clone();

            let handle = tokio::spawn(async move {
                loop {
                    // Claim the next URL
                    let Some(url) = queue.lock().await.pop_front() else {
                        break;
                    };

                    send_event(
                        &events,
                        DownloadEvent::Started {
                            worker_id,
                            url: url.clone(),
                        },
                    )
                    .await;

                    let fetched = fetch_to_file(
                        transport.as_ref(),
                        &options,
                        &dir,
                        &url,
                        None,
                        Some(&claimed),
                    )
                    .await;
                    match fetched {
                        Ok((path, bytes)) => {
                            downloaded.fetch_add(1, Ordering::Relaxed);
                            report.lock().await.downloaded.push(path.clone());
                            send_event(
                                &events,
                                DownloadEvent::Completed {
                                    worker_id,
                                    url,
                                    path,
                                    bytes,
                                },
                            )
                            .await;
                        }
                        Err(e) => {
                            failed.fetch_add(1, Ordering::Relaxed);
                            tracing::warn!("Download of {} failed: {}", url, e);
                            report
                                .lock()
                                .await
                                .failed
                                .push((url.clone(), e.to_string()));
                            send_event(
                                &events,
                                DownloadEvent::Failed {
                                    worker_id,
                                    url,
                                    error: e.to_string(),
                                },
                            )
                            .await;
                        }
                    }
                }
            });

            handles.push(handle);
        }

        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!("Download worker panicked: {}", e);
            }
        }

        tracing::info!(
            "Downloads finished: {} saved, {} failed",
            downloaded.load(Ordering::Relaxed),
            failed.load(Ordering::Relaxed)
        );

        let mut report = report.lock().await;
        std::mem::take(&mut *report)
    }
}

async fn send_event(events: &Option<mpsc::Sender<DownloadEvent>>, event: DownloadEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event).await;
    }
}

async fn fetch_to_file(
    transport: &dyn Transport,
    options: &RequestOptions,
    dir: &Path,
    url: &str,
    name: Option<&str>,
    claimed: Option<&Mutex<HashSet<String>>>,
) -> Result<(PathBuf, u64)> {
    let parsed = Url::parse(url)?;
    let request = Request::new(Method::GET, parsed.clone()).with_options(options.clone());
    let response = transport.execute(&request).await?;

    if !response.is_success() {
        return Err(Error::Download {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status),
        });
    }

    let file_name = name
        .map(String::from)
        .or_else(|| filename_from_url(&parsed))
        .or_else(|| response.content_disposition_filename())
        .ok_or_else(|| Error::Download {
            url: url.to_string(),
            reason: "cannot derive a file name".to_string(),
        })?;

    let mut file_name = sanitize_filename(&file_name);
    if let Some(claimed) = claimed {
        file_name = claim_name(&mut *claimed.lock().await, &file_name);
    }

    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(file_name);
    let content = response.bytes();
    tokio::fs::write(&path, content).await?;
    tracing::debug!("Saved {} ({} bytes) to {}", url, content.len(), path.display());

    Ok((path, content.len() as u64))
}

/// Reserve `name`, or the first free `stem (n).ext` after it.
fn claim_name(claimed: &mut HashSet<String>, name: &str) -> String {
    if claimed.insert(name.to_string()) {
        return name.to_string();
    }
    let path = Path::new(name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let mut n = 1;
    loop {
        let candidate = format!("{} ({}){}", stem, n, ext);
        if claimed.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}
