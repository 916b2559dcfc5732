//! delve - browser-like navigation, form filling and scraping over HTTP.
//!
//! A [`Session`] opens pages, follows links, fills and submits forms and
//! keeps a bounded back/forward history. Pages are queried through
//! [`Document`]: links, forms, tables, CSS selectors and an XPath subset.
//! Resources can be fetched to disk in parallel with [`Downloader`].

pub mod config;
pub mod document;
pub mod download;
pub mod error;
pub mod filter;
pub mod forms;
pub mod http;
pub mod proxy;
pub mod session;
pub mod utils;

pub use config::SessionConfig;
pub use document::{filter_nodes, CellValue, Document, DocumentError, Link, Links, Node, Row, Table};
pub use download::{DownloadEvent, DownloadReport, Downloader};
pub use error::{Error, Result};
pub use filter::{Filter, MatchMode};
pub use forms::{Field, FieldInput, FieldValue, Form, FormError, FormFilter, SubmitCheck};
pub use http::{
    FileUpload, HttpTransport, Request, RequestOptions, Response, Transport, TransportError,
};
pub use proxy::{ProxyPool, ProxyRecord};
pub use reqwest::{Method, StatusCode};
pub use session::{History, HistoryEntry, Session, Visit};
