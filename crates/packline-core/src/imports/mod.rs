//! Dependency discovery for scripts and stylesheets.
//!
//! Scripts are scanned on the token stream from [`crate::js`], so specifiers
//! inside comments, strings and templates are never reported.

mod scan;

pub use scan::{scan_imports, scan_style_urls, style_url_specifier, ImportKind, ImportSpecCore};
