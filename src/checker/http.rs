// src/checker/http.rs
// =============================================================================
// This module talks HTTP for the crawler.
//
// Key functionality:
// - fetch: GETs a page without following redirects and classifies the answer
//   as a page (with its HTML), a redirect (with its target), or an error
// - probe: a second, lightweight request made after a failed fetch to decide
//   whether the link is dead (403, 404 or 500)
//
// Redirects are not followed here. The crawl task follows them itself so the
// page URL it resolves child links against is the final one.
// =============================================================================

use std::time::Duration;

use anyhow::Result;
use reqwest::header::{CONTENT_TYPE, LOCATION};
use reqwest::{Client, StatusCode};
use thiserror::Error;

// From https://docs.rs/reqwest/latest/reqwest/struct.ClientBuilder.html#method.user_agent
pub const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

// Documents the crawler never parses for links
const SKIPPED_SUFFIXES: [&str; 2] = [".pdf", ".doc"];

/// Status of a link as reported by `Fetcher::probe`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkStatus {
    /// 2xx
    Ok,
    /// 3xx, holds the Location header
    Redirect(String),
    /// 403, 404 or 500
    Dead(u16),
    /// Any other status code, or no response at all
    Error(String),
}

impl LinkStatus {
    pub fn is_dead(&self) -> bool {
        matches!(self, LinkStatus::Dead(_))
    }
}

/// What a successful fetch produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fetched {
    /// A 2xx response. `html` is None for documents that are not HTML.
    Page { url: String, html: Option<String> },
    /// A 3xx response with its (possibly relative) Location.
    Redirect(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("request to {url} failed: {error_str}")]
    Request { url: String, error_str: String },

    #[error("{url} returned {status} status code")]
    Status { url: String, status: u16 },

    #[error("{url} redirected without a Location header")]
    MissingLocation { url: String },

    #[error("could not decode the body of {url}: {error_str}")]
    Decode { url: String, error_str: String },
}

/// HTTP client shared by all workers of a node.
///
/// Cloning is cheap: `reqwest::Client` is reference counted internally.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Fetcher { client })
    }

    /// GETs `url` and classifies the response.
    pub async fn fetch(&self, url: &str) -> Result<Fetched, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Request {
                url: url.to_string(),
                error_str: e.to_string(),
            })?;

        let status = response.status();

        if status.is_redirection() {
            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| FetchError::MissingLocation {
                    url: url.to_string(),
                })?;
            return Ok(Fetched::Redirect(location.to_string()));
        }

        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        if !is_html(&response, url) {
            return Ok(Fetched::Page {
                url: url.to_string(),
                html: None,
            });
        }

        let html = response.text().await.map_err(|e| FetchError::Decode {
            url: url.to_string(),
            error_str: e.to_string(),
        })?;

        Ok(Fetched::Page {
            url: url.to_string(),
            html: Some(html),
        })
    }

    /// Checks the status of `url` with a HEAD request, falling back to GET
    /// when the server does not allow HEAD.
    pub async fn probe(&self, url: &str) -> LinkStatus {
        let result = match self.client.head(url).send().await {
            Ok(response) if response.status() == StatusCode::METHOD_NOT_ALLOWED => {
                self.client.get(url).send().await
            }
            other => other,
        };

        match result {
            Ok(response) => analyze_response(&response),
            Err(e) => LinkStatus::Error(e.to_string()),
        }
    }
}

// Maps a response status onto a LinkStatus
//
// HTTP status codes:
// - 200-299: Success
// - 300-399: Redirect
// - 403, 404, 500: Dead
// - anything else: Error (not treated as broken)
fn analyze_response(response: &reqwest::Response) -> LinkStatus {
    let status = response.status();

    if status.is_success() {
        LinkStatus::Ok
    } else if status.is_redirection() {
        let target = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
            .to_string();
        LinkStatus::Redirect(target)
    } else if is_dead_status(status) {
        LinkStatus::Dead(status.as_u16())
    } else {
        LinkStatus::Error(format!("HTTP {}", status.as_u16()))
    }
}

pub fn is_dead_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::FORBIDDEN | StatusCode::NOT_FOUND | StatusCode::INTERNAL_SERVER_ERROR
    )
}

// A response is parsed for links only when it says it is HTML (or says nothing)
// and the URL does not name a document type we skip.
fn is_html(response: &reqwest::Response, url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or_default().to_ascii_lowercase();
    if SKIPPED_SUFFIXES.iter().any(|suffix| path.ends_with(suffix)) {
        return false;
    }

    match response.headers().get(CONTENT_TYPE).and_then(|v| v.to_str().ok()) {
        Some(content_type) => content_type.contains("html"),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use httpmock::Method;

    fn fetcher() -> Fetcher {
        Fetcher::new(Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_html_page() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/");
            then.status(200)
                .header("content-type", "text/html")
                .body("<a href=\"/x\">x</a>");
        });

        let url = server.url("/");
        let fetched = fetcher().fetch(&url).await.unwrap();

        assert_eq!(
            fetched,
            Fetched::Page {
                url,
                html: Some("<a href=\"/x\">x</a>".to_string())
            }
        );
    }

    #[tokio::test]
    async fn test_fetch_redirect_is_not_followed() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/old");
            then.status(301).header("location", "/new");
        });

        let fetched = fetcher().fetch(&server.url("/old")).await.unwrap();
        assert_eq!(fetched, Fetched::Redirect("/new".to_string()));
    }

    #[tokio::test]
    async fn test_fetch_error_status() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/missing");
            then.status(404);
        });

        let url = server.url("/missing");
        let error = fetcher().fetch(&url).await.unwrap_err();
        assert_eq!(error, FetchError::Status { url, status: 404 });
    }

    #[tokio::test]
    async fn test_fetch_skips_pdf_body() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/paper.pdf");
            then.status(200)
                .header("content-type", "application/pdf")
                .body("%PDF-1.4");
        });

        let url = server.url("/paper.pdf");
        let fetched = fetcher().fetch(&url).await.unwrap();
        assert_eq!(fetched, Fetched::Page { url, html: None });
    }

    #[tokio::test]
    async fn test_probe_dead_link() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(Method::HEAD).path("/gone");
            then.status(404);
        });

        let status = fetcher().probe(&server.url("/gone")).await;
        assert_eq!(status, LinkStatus::Dead(404));
        assert!(status.is_dead());
    }

    #[tokio::test]
    async fn test_probe_falls_back_to_get() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(Method::HEAD).path("/page");
            then.status(405);
        });
        server.mock(|when, then| {
            when.method(GET).path("/page");
            then.status(500);
        });

        let status = fetcher().probe(&server.url("/page")).await;
        assert_eq!(status, LinkStatus::Dead(500));
    }

    #[tokio::test]
    async fn test_probe_other_status_is_not_dead() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(Method::HEAD).path("/busy");
            then.status(503);
        });

        let status = fetcher().probe(&server.url("/busy")).await;
        assert_eq!(status, LinkStatus::Error("HTTP 503".to_string()));
        assert!(!status.is_dead());
    }

    #[test]
    fn test_dead_status_codes() {
        assert!(is_dead_status(StatusCode::FORBIDDEN));
        assert!(is_dead_status(StatusCode::NOT_FOUND));
        assert!(is_dead_status(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(!is_dead_status(StatusCode::GONE));
        assert!(!is_dead_status(StatusCode::SERVICE_UNAVAILABLE));
    }
}
