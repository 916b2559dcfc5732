//! Shared utility functions.
//!
//! - `html`: escaping for serialised markup
//! - `files`: download file naming

mod files;
mod html;

pub use files::{filename_from_url, sanitize_filename};
pub use html::{escape_attr, escape_text};
