// src/checker/mod.rs
// =============================================================================
// The crawler's view of the web.
//
// Submodules:
// - http: fetches pages and probes link status
// - html: extracts raw hrefs from HTML pages
// =============================================================================

mod html;
mod http;

pub use html::extract_hrefs;
pub use http::{Fetched, Fetcher};
